//! Utility module to handle the path part of an URL as a filesystem path.
//!
//! This is the path-safety gate of the engine: traversal signals are
//! rejected on both the raw (percent-encoded) and the decoded form of the
//! request path before anything touches the filesystem.

use std::error::Error;
use std::ffi::OsStr;
#[cfg(target_family = "unix")]
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use percent_encoding as pct;

use crate::errors::DavError;

// Encode all non-unreserved characters, except '/'.
// See RFC3986, and https://en.wikipedia.org/wiki/Percent-encoding .
const PATH_ENCODE_SET: &pct::AsciiSet = &pct::NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

// Substrings that signal a traversal attempt regardless of how the rest
// of the path decodes. Checked case-insensitively on the raw path.
const TRAVERSAL_SIGNALS: &[&str] = &[
    "../",
    "..\\",
    "%2e%2e%2f",
    "%2e%2e/",
    "..%2f",
    "%2e%2e%5c",
    "%252e%252e%252f",
];

/// URL path, with hidden prefix.
#[derive(Clone)]
pub struct DavPath {
    fullpath: Vec<u8>,
    pfxlen: Option<usize>,
}

/// Error returned by some of the DavPath methods.
#[derive(Debug)]
pub enum ParseError {
    /// cannot parse
    InvalidPath,
    /// outside of prefix
    PrefixMismatch,
    /// traversal signal present
    ForbiddenPath,
}

impl Error for ParseError {}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<ParseError> for DavError {
    fn from(_e: ParseError) -> Self {
        // All parse failures surface as the same response: 403 "Access denied".
        DavError::PathForbidden
    }
}

impl std::fmt::Display for DavPath {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_url_string())
    }
}

impl std::fmt::Debug for DavPath {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self.as_url_string_with_prefix())
    }
}

/// Raw traversal check, run on the percent-encoded request path and again
/// on its decoded form.
pub(crate) fn contains_traversal(raw: &str) -> bool {
    let lower = raw.to_ascii_lowercase();
    TRAVERSAL_SIGNALS.iter().any(|sig| lower.contains(sig))
}

// Strict per-segment percent decoding. Fails on '%' not followed by two
// hex digits, and on decoded NUL or '/'.
fn decode_segment(src: &[u8]) -> Result<Vec<u8>, ParseError> {
    let mut out = Vec::with_capacity(src.len());
    let mut i = 0;
    while i < src.len() {
        let b = src[i];
        if b == b'%' {
            let hex = src.get(i + 1..i + 3).ok_or(ParseError::InvalidPath)?;
            let hi = (hex[0] as char).to_digit(16).ok_or(ParseError::InvalidPath)?;
            let lo = (hex[1] as char).to_digit(16).ok_or(ParseError::InvalidPath)?;
            out.push((hi * 16 + lo) as u8);
            i += 3;
        } else {
            out.push(b);
            i += 1;
        }
    }
    if out.iter().any(|&x| x == 0 || x == b'/') {
        return Err(ParseError::InvalidPath);
    }
    Ok(out)
}

// make path safe:
// - raw path before decoding can contain only printable ascii
// - make sure path is absolute
// - remove query part (everything after ?)
// - merge consecutive slashes
// - process "." segments; ".." segments are forbidden outright
// - decode percent encoded bytes, fail on invalid encodings.
fn normalize_path(rp: &[u8]) -> Result<Vec<u8>, ParseError> {
    // must consist of printable ASCII
    if rp.iter().any(|&x| !(32..=126).contains(&x)) {
        return Err(ParseError::InvalidPath);
    }

    // don't allow fragments. query part gets deleted.
    let mut rawpath = rp;
    if let Some(pos) = rawpath.iter().position(|&x| x == b'?' || x == b'#') {
        if rawpath[pos] == b'#' {
            return Err(ParseError::InvalidPath);
        }
        rawpath = &rawpath[..pos];
    }

    // must start with "/"
    if rawpath.is_empty() || rawpath[0] != b'/' {
        return Err(ParseError::InvalidPath);
    }

    // traversal signals, raw form.
    let raw_str = std::str::from_utf8(rawpath).map_err(|_| ParseError::InvalidPath)?;
    if contains_traversal(raw_str) {
        return Err(ParseError::ForbiddenPath);
    }

    // split up in segments, decoding each one.
    let isdir = matches!(rawpath.last(), Some(b'/'));
    let mut v: Vec<Vec<u8>> = Vec::new();
    for segment in rawpath.split(|c| *c == b'/') {
        match segment {
            b"." | b"" => {}
            b".." => return Err(ParseError::ForbiddenPath),
            s => {
                let decoded = decode_segment(s)?;
                if decoded == b".." {
                    return Err(ParseError::ForbiddenPath);
                }
                v.push(decoded);
            }
        }
    }

    let mut path = Vec::with_capacity(rawpath.len());
    for seg in &v {
        path.push(b'/');
        path.extend_from_slice(seg);
    }
    if isdir || path.is_empty() {
        path.push(b'/');
    }

    // traversal signals, decoded form.
    if let Ok(s) = std::str::from_utf8(&path) {
        if contains_traversal(s) {
            return Err(ParseError::ForbiddenPath);
        }
    }
    Ok(path)
}

/// Comparison ignores any trailing slash, so /foo == /foo/
impl PartialEq for DavPath {
    fn eq(&self, rhs: &DavPath) -> bool {
        let mut a = self.fullpath.as_slice();
        if a.len() > 1 && a.ends_with(b"/") {
            a = &a[..a.len() - 1];
        }
        let mut b = rhs.fullpath.as_slice();
        if b.len() > 1 && b.ends_with(b"/") {
            b = &b[..b.len() - 1];
        }
        a == b
    }
}

impl DavPath {
    /// from URL encoded path
    pub fn new(src: &str) -> Result<DavPath, ParseError> {
        let path = normalize_path(src.as_bytes())?;
        Ok(DavPath {
            fullpath: path,
            pfxlen: None,
        })
    }

    /// Set prefix.
    pub fn set_prefix(&mut self, prefix: &str) -> Result<(), ParseError> {
        let path = &mut self.fullpath;
        let prefix = prefix.as_bytes();
        if !path.starts_with(prefix) {
            return Err(ParseError::PrefixMismatch);
        }
        let mut pfxlen = prefix.len();
        if prefix.ends_with(b"/") {
            pfxlen -= 1;
            if path[pfxlen] != b'/' {
                return Err(ParseError::PrefixMismatch);
            }
        } else if path.len() == pfxlen {
            path.push(b'/');
        }
        self.pfxlen = Some(pfxlen);
        Ok(())
    }

    /// from URL encoded path and non-encoded prefix.
    pub fn from_str_and_prefix(src: &str, prefix: &str) -> Result<DavPath, ParseError> {
        let path = normalize_path(src.as_bytes())?;
        let mut davpath = DavPath {
            fullpath: path,
            pfxlen: None,
        };
        davpath.set_prefix(prefix)?;
        Ok(davpath)
    }

    /// from request.uri
    pub fn from_uri_and_prefix(uri: &http::uri::Uri, prefix: &str) -> Result<Self, ParseError> {
        match uri.path() {
            path if path.starts_with('/') => DavPath::from_str_and_prefix(path, prefix),
            _ => Err(ParseError::InvalidPath),
        }
    }

    /// add a slash to the end of the path (if not already present).
    pub(crate) fn add_slash(&mut self) {
        if !self.is_collection() {
            self.fullpath.push(b'/');
        }
    }

    /// Add a segment to the end of the path.
    pub(crate) fn push_segment(&mut self, b: &[u8]) {
        if !self.is_collection() {
            self.fullpath.push(b'/');
        }
        self.fullpath.extend_from_slice(b);
    }

    // Return the prefix.
    fn get_prefix(&self) -> &[u8] {
        &self.fullpath[..self.pfxlen.unwrap_or(0)]
    }

    // Return the path without prefix.
    fn get_path(&self) -> &[u8] {
        &self.fullpath[self.pfxlen.unwrap_or(0)..]
    }

    /// return the URL prefix.
    pub fn prefix(&self) -> &str {
        std::str::from_utf8(self.get_prefix()).unwrap_or("")
    }

    /// as raw bytes, not encoded, no prefix.
    pub fn as_bytes(&self) -> &[u8] {
        self.get_path()
    }

    /// The internal path: decoded, prefix-stripped, no trailing slash
    /// (except for the root). Used as the key into property/lock stores.
    pub fn as_internal_string(&self) -> String {
        let mut b = self.get_path();
        if b.len() > 1 && b.ends_with(b"/") {
            b = &b[..b.len() - 1];
        }
        String::from_utf8_lossy(b).into_owned()
    }

    /// as URL encoded string, without prefix.
    pub fn as_url_string(&self) -> String {
        let p = pct::percent_encode(self.get_path(), PATH_ENCODE_SET).to_string();
        p
    }

    /// as URL encoded string, with prefix. This is the href emitted in
    /// Multi-Status documents.
    pub fn as_url_string_with_prefix(&self) -> String {
        let mut p = pct::percent_encode(self.get_prefix(), PATH_ENCODE_SET).to_string();
        p.push_str(&self.as_url_string());
        p
    }

    /// is this a collection i.e. does the original URL path end in "/".
    pub fn is_collection(&self) -> bool {
        self.get_path().ends_with(b"/")
    }

    /// is this the root of the mounted namespace.
    pub fn is_root(&self) -> bool {
        matches!(self.get_path(), b"/" | b"")
    }

    /// Return the parent directory. The root is its own parent.
    pub fn parent(&self) -> DavPath {
        if self.is_root() {
            let mut root = self.clone();
            root.add_slash();
            return root;
        }
        let mut segs = self
            .fullpath
            .split(|&c| c == b'/')
            .filter(|e| !e.is_empty())
            .collect::<Vec<&[u8]>>();
        segs.pop();
        if !segs.is_empty() {
            segs.push(b"");
        }
        segs.insert(0, b"");
        DavPath {
            pfxlen: self.pfxlen,
            fullpath: segs.join(&b'/').to_vec(),
        }
    }

    /// as OS specific Path, relative (no leading slash).
    ///
    /// Used to `push()` onto the root pathbuf.
    pub fn as_rel_ospath(&self) -> &Path {
        let spath = self.get_path();
        let mut path = if !spath.is_empty() { &spath[1..] } else { spath };
        if path.ends_with(b"/") {
            path = &path[..path.len() - 1];
        }
        #[cfg(not(target_os = "windows"))]
        let os_string = OsStr::from_bytes(path);
        #[cfg(target_os = "windows")]
        let os_string: &OsStr = std::str::from_utf8(path).unwrap().as_ref();
        Path::new(os_string)
    }

    /// The filename is the last segment of the path. Can be empty.
    pub fn file_name_bytes(&self) -> &[u8] {
        self.get_path()
            .split(|&c| c == b'/')
            .filter(|e| !e.is_empty())
            .last()
            .unwrap_or(b"")
    }

    /// The filename is the last segment of the path. Can be empty.
    pub fn file_name(&self) -> Option<&str> {
        let name = self.file_name_bytes();
        if name.is_empty() {
            None
        } else {
            std::str::from_utf8(name).ok()
        }
    }

    /// MIME type derived from the path suffix.
    pub(crate) fn get_mime_type_str(&self) -> &'static str {
        let name = self.file_name_bytes();
        let d = name.rsplitn(2, |&c| c == b'.').collect::<Vec<&[u8]>>();
        if d.len() > 1 {
            if let Ok(ext) = std::str::from_utf8(d[0]) {
                if let Some(t) = mime_guess::from_ext(ext).first_raw() {
                    return t;
                }
            }
        }
        "application/octet-stream"
    }

    /// Temporary sibling path used by the atomic PUT replacement.
    pub(crate) fn tmp_sibling(&self, suffix: &str) -> DavPath {
        let mut fullpath = self.fullpath.clone();
        if fullpath.ends_with(b"/") {
            fullpath.pop();
        }
        fullpath.extend_from_slice(suffix.as_bytes());
        DavPath {
            fullpath,
            pfxlen: self.pfxlen,
        }
    }
}
