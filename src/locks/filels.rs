//! Persistent lock store backed by a JSON key-value document.
//!
//! Two key families are stored: `lock:token:<token>` mapping to the lock
//! record, and `lock:path:<path>` mapping to the token list for that
//! path. Locks survive a restart; expired ones are dropped on load and
//! on every query.

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use log::{debug, trace};
use serde_json::Value;
use tokio::sync::Mutex;

use super::memls::MemLockStore;
use super::*;

pub struct FileLockStore {
    doc_path: PathBuf,
    inner: Mutex<Vec<DavLock>>,
}

impl FileLockStore {
    /// Open (or create) the store at `doc_path`, loading any locks that
    /// are still alive.
    pub fn new(doc_path: impl Into<PathBuf>) -> io::Result<Arc<FileLockStore>> {
        let doc_path = doc_path.into();
        let mut locks = match std::fs::read(&doc_path) {
            Ok(data) => Self::from_document(&data),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e),
        };
        locks.retain(|l| !l.is_expired());
        Ok(Arc::new(FileLockStore {
            doc_path,
            inner: Mutex::new(locks),
        }))
    }

    /// Like `new`, but an unreadable document is logged and the store
    /// starts empty instead of failing construction.
    pub fn open_or_default(doc_path: impl Into<PathBuf>) -> Arc<FileLockStore> {
        let doc_path = doc_path.into();
        match Self::new(doc_path.clone()) {
            Ok(store) => store,
            Err(e) => {
                debug!("lock store {} unreadable ({}), starting empty", doc_path.display(), e);
                Arc::new(FileLockStore {
                    doc_path,
                    inner: Mutex::new(Vec::new()),
                })
            }
        }
    }

    fn from_document(data: &[u8]) -> Vec<DavLock> {
        let doc: BTreeMap<String, Value> = match serde_json::from_slice(data) {
            Ok(doc) => doc,
            Err(e) => {
                // corrupt store starts over empty
                debug!("lock store document is corrupt: {}", e);
                return Vec::new();
            }
        };
        doc.into_iter()
            .filter(|(k, _)| k.starts_with("lock:token:"))
            .filter_map(|(_, v)| serde_json::from_value(v).ok())
            .collect()
    }

    fn to_document(locks: &[DavLock]) -> BTreeMap<String, Value> {
        let mut doc = BTreeMap::new();
        let mut by_path: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for lock in locks {
            doc.insert(
                format!("lock:token:{}", lock.token),
                serde_json::to_value(lock).unwrap_or(Value::Null),
            );
            by_path.entry(&lock.path).or_default().push(&lock.token);
        }
        for (path, tokens) in by_path {
            doc.insert(
                format!("lock:path:{}", path),
                serde_json::to_value(tokens).unwrap_or(Value::Null),
            );
        }
        doc
    }

    async fn persist(&self, locks: &[DavLock]) {
        let doc = Self::to_document(locks);
        match serde_json::to_vec(&doc) {
            Ok(data) => {
                if let Err(e) = tokio::fs::write(&self.doc_path, data).await {
                    debug!("lock store persist failed: {}", e);
                }
            }
            Err(e) => debug!("lock store serialize failed: {}", e),
        }
    }

    // Prune in place; persist only when something was dropped.
    async fn prune(&self, locks: &mut Vec<DavLock>) {
        let before = locks.len();
        locks.retain(|l| !l.is_expired());
        if locks.len() != before {
            self.persist(locks).await;
        }
    }
}

impl LockStore for FileLockStore {
    fn create<'a>(
        &'a self,
        path: &'a str,
        scope: LockScope,
        owner: Option<String>,
        timeout: Option<Duration>,
        deep: bool,
    ) -> LockFuture<'a, Option<DavLock>> {
        async move {
            let mut locks = self.inner.lock().await;
            self.prune(&mut locks).await;
            if MemLockStore::find_conflict(&locks, path, scope, deep) {
                trace!("lock conflict on {}", path);
                return None;
            }
            let lock = DavLock::new(path, scope, owner, timeout, deep);
            locks.push(lock.clone());
            self.persist(&locks).await;
            Some(lock)
        }
        .boxed()
    }

    fn get<'a>(&'a self, token: &'a str) -> LockFuture<'a, Option<DavLock>> {
        async move {
            let mut locks = self.inner.lock().await;
            self.prune(&mut locks).await;
            locks.iter().find(|l| l.token == token).cloned()
        }
        .boxed()
    }

    fn locks_for<'a>(&'a self, path: &'a str) -> LockFuture<'a, Vec<DavLock>> {
        async move {
            let mut locks = self.inner.lock().await;
            self.prune(&mut locks).await;
            locks.iter().filter(|l| l.covers(path)).cloned().collect()
        }
        .boxed()
    }

    fn refresh<'a>(
        &'a self,
        token: &'a str,
        timeout: Option<Duration>,
    ) -> LockFuture<'a, Option<DavLock>> {
        async move {
            let mut locks = self.inner.lock().await;
            self.prune(&mut locks).await;
            let refreshed = {
                let lock = locks.iter_mut().find(|l| l.token == token)?;
                lock.expires = timeout.map(|d| SystemTime::now() + d);
                lock.clone()
            };
            self.persist(&locks).await;
            Some(refreshed)
        }
        .boxed()
    }

    fn remove<'a>(&'a self, token: &'a str) -> LockFuture<'a, bool> {
        async move {
            let mut locks = self.inner.lock().await;
            let before = locks.len();
            locks.retain(|l| l.token != token);
            let removed = locks.len() != before;
            if removed {
                self.persist(&locks).await;
            }
            removed
        }
        .boxed()
    }

    fn remove_expired<'a>(&'a self) -> LockFuture<'a, ()> {
        async move {
            let mut locks = self.inner.lock().await;
            self.prune(&mut locks).await;
        }
        .boxed()
    }

    fn is_locked<'a>(&'a self, path: &'a str) -> LockFuture<'a, bool> {
        async move {
            let mut locks = self.inner.lock().await;
            self.prune(&mut locks).await;
            locks.iter().any(|l| l.covers(path))
        }
        .boxed()
    }

    fn can_modify<'a>(&'a self, path: &'a str, token: Option<&'a str>) -> LockFuture<'a, bool> {
        async move {
            let mut locks = self.inner.lock().await;
            self.prune(&mut locks).await;
            let covering: Vec<&DavLock> = locks.iter().filter(|l| l.covers(path)).collect();
            if covering.is_empty() {
                return true;
            }
            match token {
                Some(token) => covering.iter().any(|l| l.token == token),
                None => false,
            }
        }
        .boxed()
    }

    fn close<'a>(&'a self) -> LockFuture<'a, ()> {
        async move {
            let locks = self.inner.lock().await;
            self.persist(&locks).await;
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn locks_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("locks.json");

        let token = {
            let ls = FileLockStore::new(&doc).unwrap();
            let l = ls
                .create(
                    "/f.txt",
                    LockScope::Exclusive,
                    Some("alice".to_string()),
                    Some(Duration::from_secs(3600)),
                    false,
                )
                .await
                .unwrap();
            ls.close().await;
            l.token
        };

        let ls = FileLockStore::new(&doc).unwrap();
        let l = ls.get(&token).await.unwrap();
        assert_eq!(l.path, "/f.txt");
        assert_eq!(l.owner.as_deref(), Some("alice"));
        assert!(ls.is_locked("/f.txt").await);
    }

    #[tokio::test]
    async fn expired_locks_dropped_on_reload() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("locks.json");

        {
            let ls = FileLockStore::new(&doc).unwrap();
            ls.create("/f", LockScope::Exclusive, None, Some(Duration::ZERO), false)
                .await
                .unwrap();
            ls.close().await;
        }

        let ls = FileLockStore::new(&doc).unwrap();
        assert!(!ls.is_locked("/f").await);
    }

    #[tokio::test]
    async fn document_carries_both_key_families() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("locks.json");
        let ls = FileLockStore::new(&doc).unwrap();
        let l = ls
            .create("/a", LockScope::Shared, None, None, false)
            .await
            .unwrap();

        let data = std::fs::read(&doc).unwrap();
        let parsed: BTreeMap<String, Value> = serde_json::from_slice(&data).unwrap();
        assert!(parsed.contains_key(&format!("lock:token:{}", l.token)));
        assert_eq!(
            parsed.get("lock:path:/a").unwrap(),
            &serde_json::json!([l.token])
        );
    }

    #[tokio::test]
    async fn corrupt_document_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("locks.json");
        std::fs::write(&doc, b"][").unwrap();
        let ls = FileLockStore::new(&doc).unwrap();
        assert!(!ls.is_locked("/anything").await);
    }

    #[tokio::test]
    async fn remove_unknown_token() {
        let dir = tempfile::tempdir().unwrap();
        let ls = FileLockStore::new(dir.path().join("locks.json")).unwrap();
        assert!(!ls.remove("opaquelocktoken:missing").await);
    }
}
