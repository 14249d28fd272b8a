//! Single-range `Range: bytes=start-end?` parsing.
//!
//! Multi-range and suffix ranges are not served; those requests fall back
//! to a full-body 200. A syntactically valid range that does not fit the
//! resource yields 416 with `Content-Range: bytes */<size>`.

/// Inclusive byte range within a resource of known size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, size)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsedRange {
    /// No usable range; serve the whole body.
    None,
    /// A satisfiable range.
    Range(ByteRange),
    /// `bytes=` syntax understood but unsatisfiable for this size.
    Unsatisfiable,
}

/// Parse a `Range` header against a resource of `size` bytes.
///
/// Returns `None` (no range) for multi-range lists, suffix ranges
/// (`bytes=-N`), non-`bytes` units and malformed integers. A parsed
/// range is satisfiable iff `0 <= start < size` and, when an end is
/// given, `start <= end < size`.
pub fn parse(header: &str, size: u64) -> ParsedRange {
    let Some(spec) = header.strip_prefix("bytes=") else {
        return ParsedRange::None;
    };
    if spec.contains(',') {
        return ParsedRange::None;
    }
    let Some((start_str, end_str)) = spec.split_once('-') else {
        return ParsedRange::None;
    };
    let start_str = start_str.trim();
    let end_str = end_str.trim();

    // suffix ranges are not served
    if start_str.is_empty() {
        return ParsedRange::None;
    }
    let Ok(start) = start_str.parse::<u64>() else {
        return ParsedRange::None;
    };
    let end = if end_str.is_empty() {
        size.saturating_sub(1)
    } else {
        match end_str.parse::<u64>() {
            Ok(e) => e,
            Err(_) => return ParsedRange::None,
        }
    };

    if start >= size || end < start || end >= size {
        return ParsedRange::Unsatisfiable;
    }
    ParsedRange::Range(ByteRange { start, end })
}
