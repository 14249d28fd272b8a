//! Request-scoped stat cache.
//!
//! One instance is created per request and dropped with it; it is never
//! shared across requests. It dedupes `metadata()` calls on the same
//! path within the request, with a short TTL so a handler that mutates
//! can invalidate and re-observe.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::davpath::DavPath;
use crate::fs::{DavFileSystem, DavMetaData, FsError};

const STAT_TTL: Duration = Duration::from_secs(1);

pub(crate) struct StatCache {
    entries: Mutex<HashMap<String, (Instant, Result<Arc<dyn DavMetaData>, FsError>)>>,
}

impl StatCache {
    pub(crate) fn new() -> StatCache {
        StatCache {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) async fn metadata(
        &self,
        fs: &dyn DavFileSystem,
        path: &DavPath,
    ) -> Result<Arc<dyn DavMetaData>, FsError> {
        let key = path.as_internal_string();
        if let Some((stamp, res)) = self.entries.lock().unwrap().get(&key) {
            if stamp.elapsed() < STAT_TTL {
                return res.clone();
            }
        }
        let res = fs.metadata(path).await.map(Arc::from);
        self.entries
            .lock()
            .unwrap()
            .insert(key, (Instant::now(), res.clone()));
        res
    }

    /// Drop the cached entry after a mutation of `path`.
    pub(crate) fn invalidate(&self, path: &DavPath) {
        self.entries
            .lock()
            .unwrap()
            .remove(&path.as_internal_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::localfs::LocalFs;

    fn dp(s: &str) -> DavPath {
        DavPath::from_str_and_prefix(s, "").unwrap()
    }

    #[tokio::test]
    async fn caches_within_ttl() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f"), b"12345").unwrap();
        let fs = LocalFs::new(dir.path());
        let cache = StatCache::new();

        let m1 = cache.metadata(&*fs, &dp("/f")).await.unwrap();
        std::fs::remove_file(dir.path().join("f")).unwrap();
        // still served from cache
        let m2 = cache.metadata(&*fs, &dp("/f")).await.unwrap();
        assert_eq!(m1.len(), m2.len());

        cache.invalidate(&dp("/f"));
        assert_eq!(
            cache.metadata(&*fs, &dp("/f")).await.unwrap_err(),
            FsError::NotFound
        );
    }

    #[tokio::test]
    async fn negative_results_are_cached_too() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFs::new(dir.path());
        let cache = StatCache::new();

        assert!(cache.metadata(&*fs, &dp("/g")).await.is_err());
        std::fs::write(dir.path().join("g"), b"x").unwrap();
        assert!(cache.metadata(&*fs, &dp("/g")).await.is_err());
    }
}
