//! Lock model and lock stores.
//!
//! A lock covers its own path and, when deep, every descendant. On any
//! path at most one active exclusive lock can exist once ancestor
//! deep-locks are taken into account; shared locks coexist with shared
//! locks. An expired lock is indistinguishable from an absent one.

pub mod filels;
pub mod memls;

use std::time::{Duration, SystemTime};

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type LockFuture<'a, T> = BoxFuture<'a, T>;

/// Lock timeout applied when the client does not send one.
pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockScope {
    Exclusive,
    Shared,
}

/// One active lock. The type is always `write` (RFC 4918 defines no
/// other), kept in the record for the persisted JSON schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DavLock {
    pub token: String,
    /// Internal resource path, no trailing slash.
    pub path: String,
    pub scope: LockScope,
    #[serde(rename = "type")]
    pub lock_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(with = "iso8601")]
    pub created: SystemTime,
    #[serde(with = "iso8601_opt", skip_serializing_if = "Option::is_none", default)]
    pub expires: Option<SystemTime>,
    #[serde(rename = "depth", with = "depth_int")]
    pub deep: bool,
}

impl DavLock {
    pub(crate) fn new(
        path: &str,
        scope: LockScope,
        owner: Option<String>,
        timeout: Option<Duration>,
        deep: bool,
    ) -> DavLock {
        let now = SystemTime::now();
        DavLock {
            token: new_token(),
            path: path.to_string(),
            scope,
            lock_type: "write".to_string(),
            owner,
            created: now,
            expires: timeout.map(|d| now + d),
            deep,
        }
    }

    pub fn is_expired(&self) -> bool {
        match self.expires {
            Some(at) => SystemTime::now() >= at,
            None => false,
        }
    }

    /// Does this lock cover `path`: equal paths always, descendants only
    /// when the lock is deep.
    pub fn covers(&self, path: &str) -> bool {
        if self.path == path {
            return true;
        }
        if !self.deep {
            return false;
        }
        let prefix = if self.path == "/" {
            "/".to_string()
        } else {
            format!("{}/", self.path)
        };
        path.starts_with(&prefix)
    }

    /// Seconds until expiry, for `Timeout: Second-N` emission.
    pub fn remaining_secs(&self) -> Option<u64> {
        self.expires.map(|at| {
            at.duration_since(SystemTime::now())
                .map(|d| d.as_secs())
                .unwrap_or(0)
        })
    }
}

/// Two locks (or a lock and a requested scope) conflict unless both are
/// shared.
pub(crate) fn scopes_conflict(existing: LockScope, requested: LockScope) -> bool {
    existing == LockScope::Exclusive || requested == LockScope::Exclusive
}

/// Mint a globally unique opaque token.
pub(crate) fn new_token() -> String {
    format!("opaquelocktoken:{}", Uuid::new_v4())
}

/// Store of active locks. Implementations prune expired locks on every
/// query; `remove_expired` additionally runs from a periodic sweep.
pub trait LockStore: Send + Sync {
    /// Create a lock; `None` means a conflicting lock exists.
    fn create<'a>(
        &'a self,
        path: &'a str,
        scope: LockScope,
        owner: Option<String>,
        timeout: Option<Duration>,
        deep: bool,
    ) -> LockFuture<'a, Option<DavLock>>;
    /// Look up by token; expired locks read as absent (and are removed).
    fn get<'a>(&'a self, token: &'a str) -> LockFuture<'a, Option<DavLock>>;
    /// All locks covering `path`, including deep ancestor locks.
    fn locks_for<'a>(&'a self, path: &'a str) -> LockFuture<'a, Vec<DavLock>>;
    fn refresh<'a>(
        &'a self,
        token: &'a str,
        timeout: Option<Duration>,
    ) -> LockFuture<'a, Option<DavLock>>;
    fn remove<'a>(&'a self, token: &'a str) -> LockFuture<'a, bool>;
    fn remove_expired<'a>(&'a self) -> LockFuture<'a, ()>;
    fn is_locked<'a>(&'a self, path: &'a str) -> LockFuture<'a, bool>;
    /// True iff no covering locks exist, or `token` matches one of them.
    fn can_modify<'a>(&'a self, path: &'a str, token: Option<&'a str>) -> LockFuture<'a, bool>;
    fn close<'a>(&'a self) -> LockFuture<'a, ()>;
}

mod iso8601 {
    use std::time::SystemTime;

    use serde::{Deserialize, Deserializer, Serializer};
    use time::format_description::well_known::Rfc3339;
    use time::OffsetDateTime;

    pub fn serialize<S: Serializer>(t: &SystemTime, s: S) -> Result<S::Ok, S::Error> {
        let odt = OffsetDateTime::from(*t);
        s.serialize_str(&odt.format(&Rfc3339).map_err(serde::ser::Error::custom)?)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SystemTime, D::Error> {
        let s = String::deserialize(d)?;
        let odt = OffsetDateTime::parse(&s, &Rfc3339).map_err(serde::de::Error::custom)?;
        Ok(odt.into())
    }
}

mod iso8601_opt {
    use std::time::SystemTime;

    use serde::{Deserialize, Deserializer, Serializer};
    use time::format_description::well_known::Rfc3339;
    use time::OffsetDateTime;

    pub fn serialize<S: Serializer>(t: &Option<SystemTime>, s: S) -> Result<S::Ok, S::Error> {
        match t {
            Some(t) => super::iso8601::serialize(t, s),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<SystemTime>, D::Error> {
        let s = Option::<String>::deserialize(d)?;
        match s {
            Some(s) => {
                let odt =
                    OffsetDateTime::parse(&s, &Rfc3339).map_err(serde::de::Error::custom)?;
                Ok(Some(odt.into()))
            }
            None => Ok(None),
        }
    }
}

mod depth_int {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(deep: &bool, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i32(if *deep { i32::MAX } else { 0 })
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
        Ok(i32::deserialize(d)? != 0)
    }
}
