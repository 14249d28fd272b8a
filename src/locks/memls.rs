//! Ephemeral in-memory lock store.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::FutureExt;
use log::trace;

use super::*;

/// In-memory `LockStore`. One flat list under a mutex; every operation
/// prunes expired locks first, so an expired lock can never be observed.
#[derive(Debug, Default)]
pub struct MemLockStore {
    inner: Arc<Mutex<Vec<DavLock>>>,
}

impl MemLockStore {
    pub fn new() -> Arc<MemLockStore> {
        Arc::new(MemLockStore::default())
    }

    fn prune(locks: &mut Vec<DavLock>) {
        locks.retain(|l| !l.is_expired());
    }

    // Conflict check for a new lock request at `path`: covering locks
    // (self + deep ancestors) and, for a deep request, locks anywhere
    // below the path.
    pub(super) fn find_conflict(
        locks: &[DavLock],
        path: &str,
        scope: LockScope,
        deep: bool,
    ) -> bool {
        let below = format!("{}/", path.trim_end_matches('/'));
        locks.iter().any(|l| {
            let in_scope = l.covers(path) || (deep && l.path.starts_with(&below));
            in_scope && scopes_conflict(l.scope, scope)
        })
    }
}

impl LockStore for MemLockStore {
    fn create<'a>(
        &'a self,
        path: &'a str,
        scope: LockScope,
        owner: Option<String>,
        timeout: Option<Duration>,
        deep: bool,
    ) -> LockFuture<'a, Option<DavLock>> {
        async move {
            let mut locks = self.inner.lock().unwrap();
            Self::prune(&mut locks);
            if Self::find_conflict(&locks, path, scope, deep) {
                trace!("lock conflict on {}", path);
                return None;
            }
            let lock = DavLock::new(path, scope, owner, timeout, deep);
            trace!("lock {} created on {}", lock.token, path);
            locks.push(lock.clone());
            Some(lock)
        }
        .boxed()
    }

    fn get<'a>(&'a self, token: &'a str) -> LockFuture<'a, Option<DavLock>> {
        async move {
            let mut locks = self.inner.lock().unwrap();
            Self::prune(&mut locks);
            locks.iter().find(|l| l.token == token).cloned()
        }
        .boxed()
    }

    fn locks_for<'a>(&'a self, path: &'a str) -> LockFuture<'a, Vec<DavLock>> {
        async move {
            let mut locks = self.inner.lock().unwrap();
            Self::prune(&mut locks);
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
            let mut locks = self.inner.lock().unwrap();
            Self::prune(&mut locks);
            let lock = locks.iter_mut().find(|l| l.token == token)?;
            lock.expires = timeout.map(|d| SystemTime::now() + d);
            trace!("lock {} refreshed", token);
            Some(lock.clone())
        }
        .boxed()
    }

    fn remove<'a>(&'a self, token: &'a str) -> LockFuture<'a, bool> {
        async move {
            let mut locks = self.inner.lock().unwrap();
            let before = locks.len();
            locks.retain(|l| l.token != token);
            locks.len() != before
        }
        .boxed()
    }

    fn remove_expired<'a>(&'a self) -> LockFuture<'a, ()> {
        async move {
            let mut locks = self.inner.lock().unwrap();
            Self::prune(&mut locks);
        }
        .boxed()
    }

    fn is_locked<'a>(&'a self, path: &'a str) -> LockFuture<'a, bool> {
        async move {
            let mut locks = self.inner.lock().unwrap();
            Self::prune(&mut locks);
            locks.iter().any(|l| l.covers(path))
        }
        .boxed()
    }

    fn can_modify<'a>(&'a self, path: &'a str, token: Option<&'a str>) -> LockFuture<'a, bool> {
        async move {
            let mut locks = self.inner.lock().unwrap();
            Self::prune(&mut locks);
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
            self.inner.lock().unwrap().clear();
        }
        .boxed()
    }
}
