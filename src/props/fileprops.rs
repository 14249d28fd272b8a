//! File-backed property store.
//!
//! Each resource's dead properties live in a hidden sibling JSON file:
//! `.<basename>.properties` next to a file, and in the parent directory
//! for a collection. Because the documents are siblings, they travel
//! with their directory on a filesystem rename.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::FutureExt;
use log::debug;
use tokio::sync::Mutex;

use super::*;

const PROP_SUFFIX: &str = ".properties";

/// Is this directory entry one of our hidden property documents?
/// The engine filters these out of listings and tree walks.
pub(crate) fn is_prop_file(name: &[u8]) -> bool {
    name.starts_with(b".") && name.ends_with(PROP_SUFFIX.as_bytes())
}

/// `PropertyStore` persisting one JSON document per resource.
pub struct FilePropStore {
    root: PathBuf,
    // serializes load-modify-save cycles
    write_lock: Mutex<()>,
}

impl FilePropStore {
    pub fn new(root: impl Into<PathBuf>) -> Arc<FilePropStore> {
        Arc::new(FilePropStore {
            root: root.into(),
            write_lock: Mutex::new(()),
        })
    }

    // "/a/b.txt" -> <root>/a/.b.txt.properties ; "/" -> <root>/.properties
    fn doc_path(&self, internal: &str) -> PathBuf {
        let internal = internal.trim_end_matches('/');
        let (parent, base) = match internal.rfind('/') {
            Some(i) => (&internal[..i], &internal[i + 1..]),
            None => ("", internal),
        };
        let mut p = self.root.clone();
        for seg in parent.split('/').filter(|s| !s.is_empty()) {
            p.push(seg);
        }
        p.push(format!(".{}{}", base, PROP_SUFFIX));
        p
    }

    async fn load(path: &Path) -> PropMap {
        match tokio::fs::read(path).await {
            Ok(data) => match serde_json::from_slice(&data) {
                Ok(map) => map,
                Err(e) => {
                    // corrupt data is treated as empty
                    debug!("property document {} is corrupt: {}", path.display(), e);
                    PropMap::new()
                }
            },
            Err(_) => PropMap::new(),
        }
    }

    async fn save(path: &Path, map: &PropMap) -> PropResult<()> {
        if map.is_empty() {
            let _ = tokio::fs::remove_file(path).await;
            return Ok(());
        }
        let data = serde_json::to_vec(map)?;
        tokio::fs::write(path, data).await
    }
}

impl PropertyStore for FilePropStore {
    fn get_all<'a>(&'a self, path: &'a str) -> PropFuture<'a, PropMap> {
        async move { Ok(Self::load(&self.doc_path(path)).await) }.boxed()
    }

    fn get<'a>(
        &'a self,
        path: &'a str,
        ns: &'a str,
        name: &'a str,
    ) -> PropFuture<'a, Option<DeadProp>> {
        async move {
            let map = Self::load(&self.doc_path(path)).await;
            Ok(map.get(&qualified_name(ns, name)).cloned())
        }
        .boxed()
    }

    fn set<'a>(&'a self, path: &'a str, prop: DeadProp) -> PropFuture<'a, ()> {
        async move {
            let _guard = self.write_lock.lock().await;
            let doc = self.doc_path(path);
            let mut map = Self::load(&doc).await;
            map.insert(prop.qname(), prop);
            Self::save(&doc, &map).await
        }
        .boxed()
    }

    fn remove<'a>(&'a self, path: &'a str, ns: &'a str, name: &'a str) -> PropFuture<'a, bool> {
        async move {
            let _guard = self.write_lock.lock().await;
            let doc = self.doc_path(path);
            let mut map = Self::load(&doc).await;
            let removed = map.remove(&qualified_name(ns, name)).is_some();
            if removed {
                Self::save(&doc, &map).await?;
            }
            Ok(removed)
        }
        .boxed()
    }

    fn remove_all<'a>(&'a self, path: &'a str) -> PropFuture<'a, ()> {
        async move {
            let _guard = self.write_lock.lock().await;
            let _ = tokio::fs::remove_file(self.doc_path(path)).await;
            Ok(())
        }
        .boxed()
    }

    fn move_props<'a>(&'a self, from: &'a str, to: &'a str) -> PropFuture<'a, ()> {
        async move {
            let _guard = self.write_lock.lock().await;
            let src = self.doc_path(from);
            let dst = self.doc_path(to);
            match tokio::fs::rename(&src, &dst).await {
                Ok(()) => Ok(()),
                // no source document means nothing to migrate
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e),
            }
        }
        .boxed()
    }

    fn copy_props<'a>(&'a self, from: &'a str, to: &'a str) -> PropFuture<'a, ()> {
        async move {
            let _guard = self.write_lock.lock().await;
            let map = Self::load(&self.doc_path(from)).await;
            if map.is_empty() {
                return Ok(());
            }
            Self::save(&self.doc_path(to), &map).await
        }
        .boxed()
    }

    fn has<'a>(&'a self, path: &'a str) -> PropFuture<'a, bool> {
        async move { Ok(!Self::load(&self.doc_path(path)).await.is_empty()) }.boxed()
    }

    fn count<'a>(&'a self, path: &'a str) -> PropFuture<'a, usize> {
        async move { Ok(Self::load(&self.doc_path(path)).await.len()) }.boxed()
    }

    fn close<'a>(&'a self) -> PropFuture<'a, ()> {
        async move { Ok(()) }.boxed()
    }
}
