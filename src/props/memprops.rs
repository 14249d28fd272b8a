//! Ephemeral in-memory property store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures_util::FutureExt;

use super::*;

/// In-memory `PropertyStore`. Cloning is cheap; clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemPropStore {
    inner: Arc<Mutex<HashMap<String, PropMap>>>,
}

impl MemPropStore {
    pub fn new() -> Arc<MemPropStore> {
        Arc::new(MemPropStore::default())
    }

    // Keys owned by `path`: the path itself plus, for collections, every
    // descendant. Properties travel with the subtree on move/copy.
    fn matching_keys(map: &HashMap<String, PropMap>, path: &str) -> Vec<String> {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        map.keys()
            .filter(|k| k.as_str() == path || k.starts_with(&prefix))
            .cloned()
            .collect()
    }

    fn rekey(key: &str, from: &str, to: &str) -> String {
        if key == from {
            to.to_string()
        } else {
            format!("{}{}", to, &key[from.len()..])
        }
    }
}

impl PropertyStore for MemPropStore {
    fn get_all<'a>(&'a self, path: &'a str) -> PropFuture<'a, PropMap> {
        async move {
            let inner = self.inner.lock().unwrap();
            Ok(inner.get(path).cloned().unwrap_or_default())
        }
        .boxed()
    }

    fn get<'a>(
        &'a self,
        path: &'a str,
        ns: &'a str,
        name: &'a str,
    ) -> PropFuture<'a, Option<DeadProp>> {
        async move {
            let inner = self.inner.lock().unwrap();
            Ok(inner
                .get(path)
                .and_then(|m| m.get(&qualified_name(ns, name)))
                .cloned())
        }
        .boxed()
    }

    fn set<'a>(&'a self, path: &'a str, prop: DeadProp) -> PropFuture<'a, ()> {
        async move {
            let mut inner = self.inner.lock().unwrap();
            inner
                .entry(path.to_string())
                .or_default()
                .insert(prop.qname(), prop);
            Ok(())
        }
        .boxed()
    }

    fn remove<'a>(&'a self, path: &'a str, ns: &'a str, name: &'a str) -> PropFuture<'a, bool> {
        async move {
            let mut inner = self.inner.lock().unwrap();
            let removed = inner
                .get_mut(path)
                .map(|m| m.remove(&qualified_name(ns, name)).is_some())
                .unwrap_or(false);
            if let Some(m) = inner.get(path) {
                if m.is_empty() {
                    inner.remove(path);
                }
            }
            Ok(removed)
        }
        .boxed()
    }

    fn remove_all<'a>(&'a self, path: &'a str) -> PropFuture<'a, ()> {
        async move {
            let mut inner = self.inner.lock().unwrap();
            for key in Self::matching_keys(&inner, path) {
                inner.remove(&key);
            }
            Ok(())
        }
        .boxed()
    }

    fn move_props<'a>(&'a self, from: &'a str, to: &'a str) -> PropFuture<'a, ()> {
        async move {
            let mut inner = self.inner.lock().unwrap();
            for key in Self::matching_keys(&inner, from) {
                if let Some(props) = inner.remove(&key) {
                    inner.insert(Self::rekey(&key, from, to), props);
                }
            }
            Ok(())
        }
        .boxed()
    }

    fn copy_props<'a>(&'a self, from: &'a str, to: &'a str) -> PropFuture<'a, ()> {
        async move {
            let mut inner = self.inner.lock().unwrap();
            for key in Self::matching_keys(&inner, from) {
                if let Some(props) = inner.get(&key).cloned() {
                    inner.insert(Self::rekey(&key, from, to), props);
                }
            }
            Ok(())
        }
        .boxed()
    }

    fn has<'a>(&'a self, path: &'a str) -> PropFuture<'a, bool> {
        async move {
            let inner = self.inner.lock().unwrap();
            Ok(inner.get(path).map(|m| !m.is_empty()).unwrap_or(false))
        }
        .boxed()
    }

    fn count<'a>(&'a self, path: &'a str) -> PropFuture<'a, usize> {
        async move {
            let inner = self.inner.lock().unwrap();
            Ok(inner.get(path).map(|m| m.len()).unwrap_or(0))
        }
        .boxed()
    }

    fn close<'a>(&'a self) -> PropFuture<'a, ()> {
        async move {
            self.inner.lock().unwrap().clear();
            Ok(())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prop(ns: &str, name: &str, value: &str) -> DeadProp {
        DeadProp {
            namespace: ns.to_string(),
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    #[tokio::test]
    async fn set_get_remove() {
        let store = MemPropStore::new();
        store
            .set("/a.txt", prop("urn:x", "color", "red"))
            .await
            .unwrap();
        let got = store.get("/a.txt", "urn:x", "color").await.unwrap().unwrap();
        assert_eq!(got.value, "red");
        assert_eq!(store.count("/a.txt").await.unwrap(), 1);
        assert!(store.remove("/a.txt", "urn:x", "color").await.unwrap());
        assert!(!store.remove("/a.txt", "urn:x", "color").await.unwrap());
        assert!(!store.has("/a.txt").await.unwrap());
    }

    #[tokio::test]
    async fn set_overwrites_same_qname() {
        let store = MemPropStore::new();
        store.set("/f", prop("urn:x", "c", "1")).await.unwrap();
        store.set("/f", prop("urn:x", "c", "2")).await.unwrap();
        assert_eq!(store.count("/f").await.unwrap(), 1);
        assert_eq!(
            store.get("/f", "urn:x", "c").await.unwrap().unwrap().value,
            "2"
        );
    }

    #[tokio::test]
    async fn move_rekeys_copy_duplicates() {
        let store = MemPropStore::new();
        store.set("/one", prop("urn:x", "c", "v")).await.unwrap();

        store.copy_props("/one", "/two").await.unwrap();
        assert!(store.has("/one").await.unwrap());
        assert!(store.has("/two").await.unwrap());

        store.move_props("/one", "/three").await.unwrap();
        assert!(!store.has("/one").await.unwrap());
        assert!(store.has("/three").await.unwrap());
    }

    #[tokio::test]
    async fn move_carries_descendants() {
        let store = MemPropStore::new();
        store.set("/dir", prop("urn:x", "a", "1")).await.unwrap();
        store
            .set("/dir/file.txt", prop("urn:x", "b", "2"))
            .await
            .unwrap();
        store.move_props("/dir", "/renamed").await.unwrap();
        assert!(store.has("/renamed").await.unwrap());
        assert!(store.has("/renamed/file.txt").await.unwrap());
        assert!(!store.has("/dir/file.txt").await.unwrap());
    }

    #[tokio::test]
    async fn prefix_match_is_per_segment() {
        let store = MemPropStore::new();
        store.set("/dir", prop("urn:x", "a", "1")).await.unwrap();
        store.set("/dirty", prop("urn:x", "a", "1")).await.unwrap();
        store.remove_all("/dir").await.unwrap();
        assert!(store.has("/dirty").await.unwrap());
    }
}
