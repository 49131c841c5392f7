//! Byte-range qualifiers for GetObject.

use std::fmt;

/// A requested byte range, as carried by an HTTP `Range: bytes=...` header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RangeRequest {
    /// `bytes=start-end` (inclusive) or `bytes=start-` when `end` is `None`.
    Span { start: u64, end: Option<u64> },
    /// `bytes=-n`: the last `n` bytes of the object.
    Suffix(u64),
}

/// A range resolved against a concrete object size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObjectRange {
    pub start: u64,
    pub length: u64,
}

impl RangeRequest {
    /// Parse a single-range `Range` header value.
    ///
    /// Returns `None` for anything that is not a well-formed single byte range;
    /// such headers are ignored and the whole object is served.
    pub fn from_header(value: &str) -> Option<Self> {
        let spec = value.trim().strip_prefix("bytes=")?.trim();
        if spec.contains(',') {
            return None;
        }
        let (first, last) = spec.split_once('-')?;
        let (first, last) = (first.trim(), last.trim());

        if first.is_empty() {
            return last.parse().ok().map(RangeRequest::Suffix);
        }

        let start = first.parse().ok()?;
        let end = if last.is_empty() {
            None
        } else {
            let end: u64 = last.parse().ok()?;
            if end < start {
                return None;
            }
            Some(end)
        };
        Some(RangeRequest::Span { start, end })
    }

    /// Resolve against an object of `size` bytes.
    ///
    /// Returns `None` when the range is not satisfiable.
    pub fn resolve(&self, size: u64) -> Option<ObjectRange> {
        match *self {
            RangeRequest::Span { start, end } => {
                if start >= size {
                    return None;
                }
                let last = end.map_or(size - 1, |end| end.min(size - 1));
                Some(ObjectRange {
                    start,
                    length: last - start + 1,
                })
            }
            RangeRequest::Suffix(n) => {
                if n == 0 || size == 0 {
                    return None;
                }
                let length = n.min(size);
                Some(ObjectRange {
                    start: size - length,
                    length,
                })
            }
        }
    }
}

impl fmt::Display for RangeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeRequest::Span { start, end: Some(end) } => write!(f, "bytes={start}-{end}"),
            RangeRequest::Span { start, end: None } => write!(f, "bytes={start}-"),
            RangeRequest::Suffix(n) => write!(f, "bytes=-{n}"),
        }
    }
}

impl ObjectRange {
    /// Inclusive index of the last byte.
    pub fn end(&self) -> u64 {
        self.start + self.length.saturating_sub(1)
    }

    /// True when this range spans an entire object of `size` bytes.
    pub fn covers(&self, size: u64) -> bool {
        self.start == 0 && self.length == size
    }

    /// Value for a `Content-Range` response header.
    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end(), size)
    }

    /// Parse a `Content-Range: bytes start-end/total` value.
    ///
    /// The total is `None` when the server reported it as `*`.
    pub fn from_content_range(value: &str) -> Option<(Self, Option<u64>)> {
        let rest = value.trim().strip_prefix("bytes ")?;
        let (span, total) = rest.split_once('/')?;
        let (start, end) = span.split_once('-')?;
        let start: u64 = start.trim().parse().ok()?;
        let end: u64 = end.trim().parse().ok()?;
        if end < start {
            return None;
        }
        let total = match total.trim() {
            "*" => None,
            t => Some(t.parse().ok()?),
        };
        Some((
            ObjectRange {
                start,
                length: end - start + 1,
            },
            total,
        ))
    }
}
