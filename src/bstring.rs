//! Borrowed byte views used for zero-copy tag and token storage.
//!
//! A [`BString`] never owns the bytes it points to: it is a `{ptr, len}` pair
//! into either the [`hpx`](crate::hpx) parser's input buffer (a file buffer or
//! an mmap region) or into some other heap string whose lifetime the caller
//! tracks. Tag keys/values produced by the [`loader`](crate::loader) are
//! `BString`s pointing into the parser's buffer; they stay valid for as long
//! as that buffer does, which for a loaded document is the lifetime of the
//! run.

use std::fmt;
use std::str::Utf8Error;

/// A borrowed, possibly non-UTF-8, byte slice.
///
/// Cloning a `BString` copies the view, not the underlying bytes.
#[derive(Clone, Copy, Eq)]
pub struct BString<'a> {
    buf: &'a [u8],
}

impl<'a> BString<'a> {
    pub const fn new(buf: &'a [u8]) -> Self {
        BString { buf }
    }

    pub const fn empty() -> Self {
        BString { buf: &[] }
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_str(&self) -> Result<&'a str, Utf8Error> {
        std::str::from_utf8(self.buf)
    }

    /// Lossy string conversion for logging; never fails.
    pub fn to_string_lossy(&self) -> std::borrow::Cow<'a, str> {
        String::from_utf8_lossy(self.buf)
    }

    /// Trim leading/trailing ASCII whitespace, returning a new view into the
    /// same storage.
    pub fn trim(&self) -> BString<'a> {
        let mut start = 0;
        let mut end = self.buf.len();
        while start < end && self.buf[start].is_ascii_whitespace() {
            start += 1;
        }
        while end > start && self.buf[end - 1].is_ascii_whitespace() {
            end -= 1;
        }
        BString { buf: &self.buf[start..end] }
    }

    /// Strip one leading and one trailing byte, used by the matcher grammar
    /// for bracket syntax (`/re/`, `>1>`, `!x!`, `~x~`).
    pub fn strip_brackets(&self) -> BString<'a> {
        if self.buf.len() < 2 {
            return *self;
        }
        BString { buf: &self.buf[1..self.buf.len() - 1] }
    }

    pub fn first(&self) -> Option<u8> {
        self.buf.first().copied()
    }

    pub fn last(&self) -> Option<u8> {
        self.buf.last().copied()
    }

    pub fn parse_i64(&self) -> Option<i64> {
        self.as_str().ok()?.trim().parse().ok()
    }

    pub fn parse_u32(&self) -> Option<u32> {
        self.as_str().ok()?.trim().parse().ok()
    }

    pub fn parse_f64(&self) -> Option<f64> {
        self.as_str().ok()?.trim().parse().ok()
    }

    pub fn parse_bool(&self) -> Option<bool> {
        match self.as_str().ok()?.trim() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        }
    }

    /// Owns the view as a heap `String`, replacing invalid UTF-8 with U+FFFD.
    pub fn to_owned_string(&self) -> String {
        self.to_string_lossy().into_owned()
    }
}

impl PartialEq for BString<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.buf == other.buf
    }
}

impl std::hash::Hash for BString<'_> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.buf.hash(state);
    }
}

impl fmt::Debug for BString<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BString({:?})", self.to_string_lossy())
    }
}

impl fmt::Display for BString<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_lossy())
    }
}

impl<'a> From<&'a str> for BString<'a> {
    fn from(s: &'a str) -> Self {
        BString { buf: s.as_bytes() }
    }
}

impl<'a> From<&'a [u8]> for BString<'a> {
    fn from(buf: &'a [u8]) -> Self {
        BString { buf }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trim_strips_ascii_whitespace_only() {
        let b = BString::from("  hello \t\n");
        assert_eq!(b.trim().as_str().unwrap(), "hello");
    }

    #[test]
    fn strip_brackets_removes_first_and_last_byte() {
        let b = BString::from("/abc/");
        assert_eq!(b.strip_brackets().as_str().unwrap(), "abc");
    }

    #[test]
    fn parse_helpers_roundtrip() {
        assert_eq!(BString::from("42").parse_i64(), Some(42));
        assert_eq!(BString::from("3.5").parse_f64(), Some(3.5));
        assert_eq!(BString::from("true").parse_bool(), Some(true));
        assert_eq!(BString::from("nope").parse_i64(), None);
    }

    #[test]
    fn equality_is_byte_for_byte() {
        assert_eq!(BString::from("abc"), BString::from("abc"));
        assert_ne!(BString::from("abc"), BString::from("abd"));
    }
}
