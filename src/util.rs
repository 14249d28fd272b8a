use std::time::{SystemTime, UNIX_EPOCH};

use bitflags::bitflags;
use headers::Header;
use time::format_description::well_known::Rfc3339;
use time::macros::offset;

use crate::errors::DavError;
use crate::DavResult;

/// The methods the dispatcher routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DavMethod {
    Head,
    Get,
    Put,
    Options,
    PropFind,
    PropPatch,
    MkCol,
    Copy,
    Move,
    Delete,
    Lock,
    Unlock,
}

impl DavMethod {
    /// Does this method mutate the resource store.
    pub fn is_mutating(self) -> bool {
        matches!(
            self,
            DavMethod::Put
                | DavMethod::Delete
                | DavMethod::MkCol
                | DavMethod::Copy
                | DavMethod::Move
                | DavMethod::PropPatch
                | DavMethod::Lock
                | DavMethod::Unlock
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DavMethod::Head => "HEAD",
            DavMethod::Get => "GET",
            DavMethod::Put => "PUT",
            DavMethod::Options => "OPTIONS",
            DavMethod::PropFind => "PROPFIND",
            DavMethod::PropPatch => "PROPPATCH",
            DavMethod::MkCol => "MKCOL",
            DavMethod::Copy => "COPY",
            DavMethod::Move => "MOVE",
            DavMethod::Delete => "DELETE",
            DavMethod::Lock => "LOCK",
            DavMethod::Unlock => "UNLOCK",
        }
    }
}

bitflags! {
    /// A set of allowed methods.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DavMethodSet: u32 {
        const HEAD = 0x0001;
        const GET = 0x0002;
        const PUT = 0x0004;
        const OPTIONS = 0x0008;
        const PROPFIND = 0x0010;
        const PROPPATCH = 0x0020;
        const MKCOL = 0x0040;
        const COPY = 0x0080;
        const MOVE = 0x0100;
        const DELETE = 0x0200;
        const LOCK = 0x0400;
        const UNLOCK = 0x0800;

        const HTTP_RO = Self::HEAD.bits() | Self::GET.bits() | Self::OPTIONS.bits();
        const HTTP_RW = Self::HTTP_RO.bits() | Self::PUT.bits();
        const WEBDAV_RO = Self::HTTP_RO.bits() | Self::PROPFIND.bits();
    }
}

impl DavMethodSet {
    pub const WEBDAV_RW: Self = Self::all();

    pub fn contains_method(self, m: DavMethod) -> bool {
        let flag = match m {
            DavMethod::Head => DavMethodSet::HEAD,
            DavMethod::Get => DavMethodSet::GET,
            DavMethod::Put => DavMethodSet::PUT,
            DavMethod::Options => DavMethodSet::OPTIONS,
            DavMethod::PropFind => DavMethodSet::PROPFIND,
            DavMethod::PropPatch => DavMethodSet::PROPPATCH,
            DavMethod::MkCol => DavMethodSet::MKCOL,
            DavMethod::Copy => DavMethodSet::COPY,
            DavMethod::Move => DavMethodSet::MOVE,
            DavMethod::Delete => DavMethodSet::DELETE,
            DavMethod::Lock => DavMethodSet::LOCK,
            DavMethod::Unlock => DavMethodSet::UNLOCK,
        };
        self.contains(flag)
    }
}

// translate method into our own enum that has webdav methods as well.
pub fn dav_method(m: &http::Method) -> DavResult<DavMethod> {
    let m = match *m {
        http::Method::HEAD => DavMethod::Head,
        http::Method::GET => DavMethod::Get,
        http::Method::PUT => DavMethod::Put,
        http::Method::DELETE => DavMethod::Delete,
        http::Method::OPTIONS => DavMethod::Options,
        _ => match m.as_str() {
            "PROPFIND" => DavMethod::PropFind,
            "PROPPATCH" => DavMethod::PropPatch,
            "MKCOL" => DavMethod::MkCol,
            "COPY" => DavMethod::Copy,
            "MOVE" => DavMethod::Move,
            "LOCK" => DavMethod::Lock,
            "UNLOCK" => DavMethod::Unlock,
            _ => {
                return Err(DavError::UnknownDavMethod);
            }
        },
    };
    Ok(m)
}

// The method set advertised in Allow headers. Exactly the methods the
// dispatcher routes, nothing else.
pub(crate) const ALLOW_HEADER: &str = "GET, HEAD, PUT, DELETE, OPTIONS, PROPFIND, PROPPATCH, \
MKCOL, COPY, MOVE, LOCK, UNLOCK";

pub fn systemtime_to_offsetdatetime(t: SystemTime) -> time::OffsetDateTime {
    match t.duration_since(UNIX_EPOCH) {
        Ok(t) => {
            let tm = time::OffsetDateTime::from_unix_timestamp(t.as_secs() as i64).unwrap();
            tm.to_offset(offset!(UTC))
        }
        Err(_) => time::OffsetDateTime::UNIX_EPOCH.to_offset(offset!(UTC)),
    }
}

pub fn systemtime_to_httpdate(t: SystemTime) -> String {
    let d = headers::Date::from(t);
    let mut v = Vec::new();
    d.encode(&mut v);
    v[0].to_str().unwrap().to_owned()
}

pub fn systemtime_to_rfc3339(t: SystemTime) -> String {
    // 1996-12-19T16:39:57Z
    systemtime_to_offsetdatetime(t).format(&Rfc3339).unwrap()
}

/// Milliseconds since the epoch, clamped to zero for pre-epoch times.
pub fn systemtime_to_ms(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn test_rfc3339() {
        assert!(systemtime_to_rfc3339(UNIX_EPOCH) == "1970-01-01T00:00:00Z");
    }

    #[test]
    fn test_ms() {
        let t = UNIX_EPOCH + Duration::from_millis(1500);
        assert_eq!(systemtime_to_ms(t), 1500);
    }

    #[test]
    fn method_translation() {
        assert_eq!(dav_method(&http::Method::GET).unwrap(), DavMethod::Get);
        let m = http::Method::from_bytes(b"PROPFIND").unwrap();
        assert_eq!(dav_method(&m).unwrap(), DavMethod::PropFind);
        assert!(dav_method(&http::Method::POST).is_err());
    }

    #[test]
    fn mutating_set() {
        assert!(DavMethod::Put.is_mutating());
        assert!(DavMethod::PropPatch.is_mutating());
        assert!(!DavMethod::Get.is_mutating());
        assert!(!DavMethod::PropFind.is_mutating());
    }

    #[test]
    fn allow_header_matches_routable_set() {
        // every advertised method dispatches, and every method that
        // dispatches is advertised
        let advertised: Vec<&str> = ALLOW_HEADER.split(", ").collect();
        for name in &advertised {
            let m = http::Method::from_bytes(name.as_bytes()).unwrap();
            assert!(dav_method(&m).is_ok(), "advertised but not routed: {name}");
        }
        for m in [
            DavMethod::Head,
            DavMethod::Get,
            DavMethod::Put,
            DavMethod::Options,
            DavMethod::PropFind,
            DavMethod::PropPatch,
            DavMethod::MkCol,
            DavMethod::Copy,
            DavMethod::Move,
            DavMethod::Delete,
            DavMethod::Lock,
            DavMethod::Unlock,
        ] {
            assert!(
                advertised.contains(&m.as_str()),
                "routed but not advertised: {}",
                m.as_str()
            );
        }
        assert!(!advertised.contains(&"POST"));
        assert!(!advertised.contains(&"TRACE"));
    }

    #[test]
    fn method_sets() {
        assert!(DavMethodSet::all().contains_method(DavMethod::Lock));
        assert!(DavMethodSet::HTTP_RO.contains_method(DavMethod::Get));
        assert!(!DavMethodSet::HTTP_RO.contains_method(DavMethod::Put));
        assert!(DavMethodSet::WEBDAV_RO.contains_method(DavMethod::PropFind));
    }
}
