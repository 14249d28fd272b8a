//! Strong ETag derivation and `If-Match` / `If-None-Match` evaluation.
//!
//! The validator is derived from `(size, mtime_ms, canonical_path)`, so a
//! change to any of the three produces a new tag. Collections use the
//! same formula over the directory metadata.

use http::Request;

use crate::davpath::DavPath;
use crate::errors::{DavError, DavResult};
use crate::fs::DavMetaData;
use crate::util::systemtime_to_ms;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Etag(String);

impl Etag {
    /// `"<size>-<mtime_ms>-<hash8>"` where hash8 is the first 8 hex chars
    /// of the MD5 over `"<size>-<mtime_ms>-<path>"`.
    pub fn from_meta(meta: &dyn DavMetaData, path: &DavPath) -> Etag {
        let size = meta.len();
        let mtime_ms = meta.modified().map(systemtime_to_ms).unwrap_or(0);
        let digest = md5::compute(format!(
            "{}-{}-{}",
            size,
            mtime_ms,
            path.as_internal_string()
        ));
        let hex = format!("{:x}", digest);
        Etag(format!("\"{}-{}-{}\"", size, mtime_ms, &hex[..8]))
    }

    /// The quoted wire form.
    pub fn quoted(&self) -> &str {
        &self.0
    }

    /// Evaluate this tag against an `If-Match`/`If-None-Match` header
    /// value: `*` matches anything; otherwise the value is a comma list
    /// of (possibly `W/`-prefixed) quoted tags compared for exact
    /// equality on the quoted form.
    pub fn matches(&self, header: &str) -> bool {
        let header = header.trim();
        if header == "*" {
            return true;
        }
        header
            .split(',')
            .map(str::trim)
            .map(|t| t.strip_prefix("W/").unwrap_or(t))
            .any(|t| t.starts_with('"') && t.ends_with('"') && t == self.0)
    }
}

impl std::fmt::Display for Etag {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn header<'a>(req: &'a Request<()>, name: &str) -> Option<&'a str> {
    req.headers().get(name).and_then(|v| v.to_str().ok())
}

/// `If-Match`: pass when the header is absent or any tag matches.
/// A present header against a missing resource fails as well.
pub(crate) fn check_if_match(req: &Request<()>, etag: Option<&Etag>) -> DavResult<()> {
    match header(req, "if-match") {
        None => Ok(()),
        Some(value) => match etag {
            Some(etag) if etag.matches(value) => Ok(()),
            _ => Err(DavError::ETagMismatch),
        },
    }
}

/// `If-None-Match`: pass when the header is absent or nothing matches.
/// On a hit, safe methods get 304 and unsafe methods get 412.
pub(crate) fn check_if_none_match(
    req: &Request<()>,
    etag: Option<&Etag>,
    safe_method: bool,
) -> DavResult<()> {
    match (header(req, "if-none-match"), etag) {
        (Some(value), Some(etag)) if etag.matches(value) => {
            if safe_method {
                Err(DavError::NotModified)
            } else {
                Err(DavError::ETagMismatch)
            }
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::test_support::FakeMeta;
    use std::time::{Duration, UNIX_EPOCH};

    fn path() -> DavPath {
        DavPath::from_str_and_prefix("/dav/a.txt", "/dav").unwrap()
    }

    fn meta(size: u64, ms: u64) -> FakeMeta {
        FakeMeta {
            len: size,
            modified: UNIX_EPOCH + Duration::from_millis(ms),
            dir: false,
        }
    }

    #[test]
    fn changes_with_every_component() {
        let base = Etag::from_meta(&meta(5, 1000), &path());
        assert_ne!(base, Etag::from_meta(&meta(6, 1000), &path()));
        assert_ne!(base, Etag::from_meta(&meta(5, 1001), &path()));
        let other = DavPath::from_str_and_prefix("/dav/b.txt", "/dav").unwrap();
        assert_ne!(base, Etag::from_meta(&meta(5, 1000), &other));
    }

    #[test]
    fn quoted_form() {
        let e = Etag::from_meta(&meta(5, 1000), &path());
        let q = e.quoted();
        assert!(q.starts_with("\"5-1000-"));
        assert!(q.ends_with('"'));
    }

    #[test]
    fn star_matches_everything() {
        let e = Etag::from_meta(&meta(5, 1000), &path());
        assert!(e.matches("*"));
    }

    #[test]
    fn comma_list_and_weak_prefix() {
        let e = Etag::from_meta(&meta(5, 1000), &path());
        let q = e.quoted().to_string();
        assert!(e.matches(&format!("\"other\", {}", q)));
        assert!(e.matches(&format!("W/{}", q)));
        assert!(!e.matches("\"other\""));
    }

    #[test]
    fn unquoted_tags_do_not_match() {
        let e = Etag::from_meta(&meta(5, 1000), &path());
        let bare = e.quoted().trim_matches('"').to_string();
        assert!(!e.matches(&bare));
    }

    fn req(headers: &[(&str, &str)]) -> Request<()> {
        let mut b = Request::builder().uri("/dav/a.txt");
        for (k, v) in headers {
            b = b.header(*k, *v);
        }
        b.body(()).unwrap()
    }

    #[test]
    fn if_match_rules() {
        let e = Etag::from_meta(&meta(5, 1000), &path());
        assert!(check_if_match(&req(&[]), Some(&e)).is_ok());
        assert!(check_if_match(&req(&[("If-Match", e.quoted())]), Some(&e)).is_ok());
        assert!(matches!(
            check_if_match(&req(&[("If-Match", "\"zzz\"")]), Some(&e)),
            Err(DavError::ETagMismatch)
        ));
        // header against a missing resource fails
        assert!(check_if_match(&req(&[("If-Match", "*")]), None).is_err());
    }

    #[test]
    fn if_none_match_rules() {
        let e = Etag::from_meta(&meta(5, 1000), &path());
        assert!(check_if_none_match(&req(&[]), Some(&e), true).is_ok());
        assert!(matches!(
            check_if_none_match(&req(&[("If-None-Match", e.quoted())]), Some(&e), true),
            Err(DavError::NotModified)
        ));
        assert!(matches!(
            check_if_none_match(&req(&[("If-None-Match", "*")]), Some(&e), false),
            Err(DavError::ETagMismatch)
        ));
        // no resource: If-None-Match * passes
        assert!(check_if_none_match(&req(&[("If-None-Match", "*")]), None, false).is_ok());
    }
}
