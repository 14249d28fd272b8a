//! Parsers for the WebDAV request headers the engine consumes:
//! `Depth`, `Overwrite`, `Timeout`, `Destination`, `Lock-Token` and the
//! token part of `If`.

use std::time::Duration;

use http::Request;
use lazy_static::lazy_static;
use regex::Regex;

use crate::davpath::{contains_traversal, DavPath};
use crate::errors::DavError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    Zero,
    One,
    Infinity,
}

/// Parse the `Depth` header. Invalid or absent values fall back to
/// `default` (RFC 4918 defaults depth to infinity for PROPFIND).
pub(crate) fn depth(req: &Request<()>, default: Depth) -> Depth {
    match req.headers().get("depth").and_then(|v| v.to_str().ok()) {
        Some("0") => Depth::Zero,
        Some("1") => Depth::One,
        Some(s) if s.eq_ignore_ascii_case("infinity") => Depth::Infinity,
        _ => default,
    }
}

/// Parse the `Overwrite` header; default is `T`.
pub(crate) fn overwrite(req: &Request<()>) -> bool {
    match req.headers().get("overwrite").and_then(|v| v.to_str().ok()) {
        Some(s) => !s.trim().eq_ignore_ascii_case("f"),
        None => true,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DavTimeout {
    Infinite,
    Seconds(u64),
}

impl DavTimeout {
    pub(crate) fn as_duration(self) -> Option<Duration> {
        match self {
            DavTimeout::Infinite => None,
            DavTimeout::Seconds(s) => Some(Duration::from_secs(s)),
        }
    }
}

/// Parse the `Timeout` header. The value may be a comma-separated list of
/// alternatives; the first one we understand wins.
pub(crate) fn timeout(req: &Request<()>) -> Option<DavTimeout> {
    let value = req.headers().get("timeout").and_then(|v| v.to_str().ok())?;
    for spec in value.split(',') {
        let spec = spec.trim();
        if spec.eq_ignore_ascii_case("infinite") {
            return Some(DavTimeout::Infinite);
        }
        if let Some(secs) = spec.strip_prefix("Second-") {
            if let Ok(n) = secs.parse::<u64>() {
                return Some(DavTimeout::Seconds(n));
            }
        }
    }
    None
}

lazy_static! {
    // Simplified If-header grammar: we understand "(<token>)" and the
    // tagged form "</uri> (<token>)". The full RFC 4918 10.4 grammar
    // (Not-negation, entity-tag predicates) needs a dedicated parser.
    static ref IF_TOKEN: Regex = Regex::new(r"\(<([^>]+)>\)").unwrap();
}

/// Lock token from the request: the `If` header is tried first, then
/// `Lock-Token` with its angle brackets stripped.
pub(crate) fn lock_token(req: &Request<()>) -> Option<String> {
    if let Some(ifh) = req.headers().get("if").and_then(|v| v.to_str().ok()) {
        if let Some(caps) = IF_TOKEN.captures(ifh) {
            return Some(caps[1].to_string());
        }
    }
    req.headers()
        .get("lock-token")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().trim_start_matches('<').trim_end_matches('>').to_string())
}

// Strip a default port so that "host:80" == "host" under http.
fn normalize_authority(auth: &str, scheme: &str) -> String {
    let lower = auth.to_ascii_lowercase();
    match scheme {
        "http" => lower.strip_suffix(":80").unwrap_or(&lower).to_string(),
        "https" => lower.strip_suffix(":443").unwrap_or(&lower).to_string(),
        _ => lower,
    }
}

/// Parse and validate the `Destination` header for COPY/MOVE.
///
/// Accepts an absolute path, or an absolute URI whose scheme and
/// authority match the request. The path must carry the mount prefix and
/// pass the same traversal checks as the request path.
pub(crate) fn destination(req: &Request<()>, prefix: &str) -> Result<DavPath, DavError> {
    let value = match req.headers().get("destination") {
        Some(v) => v.to_str().map_err(|_| DavError::InvalidDestination)?,
        None => return Err(DavError::MissingDestination),
    };
    let value = value.trim();
    if value.is_empty() {
        return Err(DavError::MissingDestination);
    }
    if contains_traversal(value) {
        return Err(DavError::InvalidDestination);
    }

    let path = if value.starts_with('/') {
        value.to_string()
    } else {
        let uri: http::Uri = value.parse().map_err(|_| DavError::InvalidDestination)?;
        let scheme = uri.scheme_str().ok_or(DavError::InvalidDestination)?;
        let authority = uri.authority().ok_or(DavError::InvalidDestination)?;

        if let Some(req_scheme) = req.uri().scheme_str() {
            if !scheme.eq_ignore_ascii_case(req_scheme) {
                return Err(DavError::InvalidDestination);
            }
        }
        let req_auth = req
            .uri()
            .authority()
            .map(|a| a.as_str().to_string())
            .or_else(|| {
                req.headers()
                    .get(http::header::HOST)
                    .and_then(|h| h.to_str().ok())
                    .map(|s| s.to_string())
            })
            .ok_or(DavError::InvalidDestination)?;
        if normalize_authority(authority.as_str(), scheme) != normalize_authority(&req_auth, scheme)
        {
            return Err(DavError::InvalidDestination);
        }
        uri.path().to_string()
    };

    if contains_traversal(&path) {
        return Err(DavError::InvalidDestination);
    }
    DavPath::from_str_and_prefix(&path, prefix).map_err(|_| DavError::InvalidDestination)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(headers: &[(&str, &str)]) -> Request<()> {
        let mut b = Request::builder().method("COPY").uri("/dav/src.txt");
        for (k, v) in headers {
            b = b.header(*k, *v);
        }
        b.body(()).unwrap()
    }

    #[test]
    fn depth_parsing() {
        assert_eq!(depth(&req(&[("Depth", "0")]), Depth::Infinity), Depth::Zero);
        assert_eq!(depth(&req(&[("Depth", "1")]), Depth::Infinity), Depth::One);
        assert_eq!(
            depth(&req(&[("Depth", "Infinity")]), Depth::Zero),
            Depth::Infinity
        );
        // invalid values gracefully fall back
        assert_eq!(
            depth(&req(&[("Depth", "2")]), Depth::Infinity),
            Depth::Infinity
        );
        assert_eq!(depth(&req(&[]), Depth::Infinity), Depth::Infinity);
    }

    #[test]
    fn overwrite_parsing() {
        assert!(overwrite(&req(&[])));
        assert!(overwrite(&req(&[("Overwrite", "T")])));
        assert!(!overwrite(&req(&[("Overwrite", "F")])));
        assert!(!overwrite(&req(&[("Overwrite", "f")])));
    }

    #[test]
    fn timeout_parsing() {
        assert_eq!(
            timeout(&req(&[("Timeout", "Second-3600")])),
            Some(DavTimeout::Seconds(3600))
        );
        assert_eq!(
            timeout(&req(&[("Timeout", "Infinite")])),
            Some(DavTimeout::Infinite)
        );
        assert_eq!(
            timeout(&req(&[("Timeout", "Infinite, Second-604800")])),
            Some(DavTimeout::Infinite)
        );
        assert_eq!(timeout(&req(&[])), None);
        assert_eq!(timeout(&req(&[("Timeout", "Minute-5")])), None);
    }

    #[test]
    fn token_from_if_header() {
        let r = req(&[("If", "(<opaquelocktoken:abc-123>)")]);
        assert_eq!(lock_token(&r).as_deref(), Some("opaquelocktoken:abc-123"));
    }

    #[test]
    fn token_from_tagged_if_header() {
        let r = req(&[(
            "If",
            "</dav/f.txt> (<opaquelocktoken:xyz>)",
        )]);
        assert_eq!(lock_token(&r).as_deref(), Some("opaquelocktoken:xyz"));
    }

    #[test]
    fn token_from_lock_token_header() {
        let r = req(&[("Lock-Token", "<opaquelocktoken:tok>")]);
        assert_eq!(lock_token(&r).as_deref(), Some("opaquelocktoken:tok"));
    }

    #[test]
    fn destination_absolute_path() {
        let r = req(&[("Destination", "/dav/dst.txt")]);
        let d = destination(&r, "/dav").unwrap();
        assert_eq!(d.as_bytes(), b"/dst.txt");
    }

    #[test]
    fn destination_absolute_uri_same_host() {
        let mut b = Request::builder().method("COPY").uri("/dav/src.txt");
        b = b.header("Host", "example.com");
        b = b.header("Destination", "http://example.com/dav/dst.txt");
        let r = b.body(()).unwrap();
        let d = destination(&r, "/dav").unwrap();
        assert_eq!(d.as_bytes(), b"/dst.txt");
    }

    #[test]
    fn destination_cross_host_rejected() {
        let mut b = Request::builder().method("COPY").uri("/dav/src.txt");
        b = b.header("Host", "example.com");
        b = b.header("Destination", "http://evil.example.org/dav/dst.txt");
        let r = b.body(()).unwrap();
        assert!(matches!(
            destination(&r, "/dav"),
            Err(DavError::InvalidDestination)
        ));
    }

    #[test]
    fn destination_default_port_matches() {
        let mut b = Request::builder().method("COPY").uri("/dav/src.txt");
        b = b.header("Host", "example.com");
        b = b.header("Destination", "http://example.com:80/dav/dst.txt");
        let r = b.body(()).unwrap();
        assert!(destination(&r, "/dav").is_ok());
    }

    #[test]
    fn destination_traversal_rejected() {
        let r = req(&[("Destination", "/dav/../etc/passwd")]);
        assert!(matches!(
            destination(&r, "/dav"),
            Err(DavError::InvalidDestination)
        ));
    }

    #[test]
    fn destination_outside_prefix_rejected() {
        let r = req(&[("Destination", "/elsewhere/dst.txt")]);
        assert!(matches!(
            destination(&r, "/dav"),
            Err(DavError::InvalidDestination)
        ));
    }

    #[test]
    fn destination_missing() {
        let r = req(&[]);
        assert!(matches!(
            destination(&r, "/dav"),
            Err(DavError::MissingDestination)
        ));
    }
}
