//! Growable, binary-safe byte strings.
//!
//! A [`DynStr`] is a heap byte buffer that may contain arbitrary bytes
//! (including NUL) while still always keeping one zero byte just past the
//! content, so a pointer to the content doubles as a C string whenever the
//! content itself is NUL-free. Appends over-allocate — doubling while small,
//! in 1 MiB steps once past [`MAX_PREALLOC`] — so that building a string by
//! repeated concatenation does not reallocate per call.

use std::fmt;

use crate::error::{Error, Result};

/// Growth ceiling: beyond this content size, appends reserve exactly
/// `MAX_PREALLOC` extra bytes instead of doubling.
pub const MAX_PREALLOC: usize = 1024 * 1024;

/// A growable, binary-safe byte string with an always-present trailing NUL.
///
/// Invariants, preserved by every operation: `len() <= alloc()`, and the
/// byte at offset `len()` is zero.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DynStr {
    // Holds `len` content bytes followed by one zero byte; spare capacity
    // beyond that is the preallocation.
    buf: Vec<u8>,
}

impl DynStr {
    /// An empty string with no spare room.
    pub fn new() -> DynStr {
        DynStr { buf: vec![0] }
    }

    /// A string holding a copy of `init`.
    pub fn from_bytes(init: &[u8]) -> Result<DynStr> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(init.len() + 1)?;
        buf.extend_from_slice(init);
        buf.push(0);
        Ok(DynStr { buf })
    }

    /// The decimal rendition of `value`.
    pub fn from_i64(value: i64) -> Result<DynStr> {
        let (digits, len) = i64_digits(value);
        DynStr::from_bytes(&digits[..len])
    }

    /// Content length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len() - 1
    }

    /// True when the content is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes usable for content in the current allocation.
    #[inline]
    pub fn alloc(&self) -> usize {
        self.buf.capacity() - 1
    }

    /// Spare room: bytes that can be appended without reallocating.
    #[inline]
    pub fn avail(&self) -> usize {
        self.alloc() - self.len()
    }

    /// The content, without the trailing NUL.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.buf.len() - 1]
    }

    /// The content plus the trailing NUL, for C interop.
    #[inline]
    pub fn as_bytes_with_nul(&self) -> &[u8] {
        &self.buf
    }

    /// Ensure room for `addlen` more content bytes. Greedy: reserves twice
    /// the needed length while under [`MAX_PREALLOC`], a flat `MAX_PREALLOC`
    /// extra beyond it.
    pub fn make_room(&mut self, addlen: usize) -> Result<()> {
        if self.avail() >= addlen {
            return Ok(());
        }
        let len = self.len();
        let mut newlen = len + addlen;
        if newlen < MAX_PREALLOC {
            newlen *= 2;
        } else {
            newlen += MAX_PREALLOC;
        }
        // Capacity target is newlen + 1 for the NUL.
        self.buf.try_reserve_exact(newlen - len)?;
        Ok(())
    }

    /// Drop all spare capacity.
    pub fn shrink_to_fit(&mut self) {
        self.buf.shrink_to_fit();
    }

    /// Set the content length directly. Growing zero-fills the new region;
    /// `n` must not exceed `alloc()`.
    pub fn set_len(&mut self, n: usize) {
        assert!(n <= self.alloc());
        let len = self.len();
        if n < len {
            self.buf.truncate(n);
            self.buf.push(0);
        } else if n > len {
            self.buf.pop();
            self.buf.resize(n, 0);
            self.buf.push(0);
        }
    }

    /// Adjust the content length by a signed delta; see [`set_len`].
    ///
    /// [`set_len`]: DynStr::set_len
    pub fn incr_len(&mut self, incr: isize) {
        let n = self.len() as isize + incr;
        assert!(n >= 0);
        self.set_len(n as usize);
    }

    /// Grow to `n` content bytes, zero-filling the new region. Shorter or
    /// equal lengths are a no-op.
    pub fn grow_zero(&mut self, n: usize) -> Result<()> {
        let len = self.len();
        if n <= len {
            return Ok(());
        }
        self.make_room(n - len)?;
        self.set_len(n);
        Ok(())
    }

    /// Reset to empty without releasing the allocation.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.buf.push(0);
    }

    /// Append a copy of `t`.
    pub fn push_bytes(&mut self, t: &[u8]) -> Result<()> {
        self.make_room(t.len())?;
        self.buf.pop();
        self.buf.extend_from_slice(t);
        self.buf.push(0);
        Ok(())
    }

    /// Append another string's content.
    pub fn push_dynstr(&mut self, t: &DynStr) -> Result<()> {
        self.push_bytes(t.as_bytes())
    }

    /// Replace the content with a copy of `t`, keeping the allocation when
    /// it already fits.
    pub fn set_from(&mut self, t: &[u8]) -> Result<()> {
        self.clear();
        self.push_bytes(t)
    }

    /// Append formatted text, as in `s.push_fmt(format_args!("{}:{}", k, v))`.
    pub fn push_fmt(&mut self, args: fmt::Arguments<'_>) -> Result<()> {
        struct Adapter<'a> {
            s: &'a mut DynStr,
            err: Option<Error>,
        }
        impl fmt::Write for Adapter<'_> {
            fn write_str(&mut self, t: &str) -> fmt::Result {
                self.s.push_bytes(t.as_bytes()).map_err(|e| {
                    self.err = Some(e);
                    fmt::Error
                })
            }
        }
        let mut a = Adapter { s: self, err: None };
        match fmt::write(&mut a, args) {
            Ok(()) => Ok(()),
            Err(_) => Err(a
                .err
                .unwrap_or(Error::Encoding("formatted value reported an error"))),
        }
    }

    /// Remove any leading and trailing bytes contained in `cset`.
    pub fn trim(&mut self, cset: &[u8]) {
        let len = self.len();
        let b = self.as_bytes();
        let mut start = 0;
        let mut end = len;
        while start < end && cset.contains(&b[start]) {
            start += 1;
        }
        while end > start && cset.contains(&b[end - 1]) {
            end -= 1;
        }
        self.buf.copy_within(start..end, 0);
        self.buf.truncate(end - start);
        self.buf.push(0);
    }

    /// Keep only the inclusive range `[start, end]`, where negative indices
    /// count back from the end (`-1` is the last byte). An inverted or
    /// out-of-range request leaves an empty string.
    pub fn range(&mut self, start: isize, end: isize) {
        let len = self.len() as isize;
        if len == 0 {
            return;
        }
        let mut start = if start < 0 { (len + start).max(0) } else { start };
        let mut end = if end < 0 { (len + end).max(0) } else { end };
        let mut newlen = if start > end { 0 } else { end - start + 1 };
        if newlen != 0 {
            if start >= len {
                newlen = 0;
            } else if end >= len {
                end = len - 1;
                newlen = if start > end { 0 } else { end - start + 1 };
            }
        } else {
            start = 0;
        }
        let (start, newlen) = (start as usize, newlen as usize);
        if newlen > 0 && start > 0 {
            self.buf.copy_within(start..start + newlen, 0);
        }
        self.buf.truncate(newlen);
        self.buf.push(0);
    }

    /// ASCII-lowercase the content in place.
    pub fn make_ascii_lowercase(&mut self) {
        let n = self.len();
        self.buf[..n].make_ascii_lowercase();
    }

    /// ASCII-uppercase the content in place.
    pub fn make_ascii_uppercase(&mut self) {
        let n = self.len();
        self.buf[..n].make_ascii_uppercase();
    }

    /// Translate bytes: every occurrence of `from[i]` becomes `to[i]`.
    /// `from` and `to` must be the same length.
    pub fn map_chars(&mut self, from: &[u8], to: &[u8]) {
        assert_eq!(from.len(), to.len());
        let n = self.len();
        for b in &mut self.buf[..n] {
            if let Some(i) = from.iter().position(|f| f == b) {
                *b = to[i];
            }
        }
    }

    /// Append a double-quoted, escape-encoded rendition of `p`, suitable for
    /// logs and diagnostics.
    pub fn push_repr(&mut self, p: &[u8]) -> Result<()> {
        self.push_bytes(b"\"")?;
        for &b in p {
            match b {
                b'\\' => self.push_bytes(b"\\\\")?,
                b'"' => self.push_bytes(b"\\\"")?,
                b'\n' => self.push_bytes(b"\\n")?,
                b'\r' => self.push_bytes(b"\\r")?,
                b'\t' => self.push_bytes(b"\\t")?,
                0x07 => self.push_bytes(b"\\a")?,
                0x08 => self.push_bytes(b"\\b")?,
                0x20..=0x7e => self.push_bytes(&[b])?,
                _ => self.push_fmt(format_args!("\\x{:02x}", b))?,
            }
        }
        self.push_bytes(b"\"")
    }

    /// Split `s` around every occurrence of `sep`, binary-safe. Adjacent
    /// separators produce empty tokens; an empty separator yields no tokens.
    pub fn split(s: &[u8], sep: &[u8]) -> Result<Vec<DynStr>> {
        if sep.is_empty() {
            return Ok(Vec::new());
        }
        let mut tokens = Vec::new();
        let mut start = 0;
        let mut j = 0;
        while j + sep.len() <= s.len() {
            if &s[j..j + sep.len()] == sep {
                tokens.push(DynStr::from_bytes(&s[start..j])?);
                start = j + sep.len();
                j = start;
            } else {
                j += 1;
            }
        }
        tokens.push(DynStr::from_bytes(&s[start..])?);
        Ok(tokens)
    }

    /// Split a command line into arguments with shell-like quoting rules:
    /// single quotes preserve bytes (`\'` escapes a quote), double quotes
    /// process `\xHH` plus the `\n \r \t \b \a` escapes, and unquoted tokens
    /// end at whitespace. Returns `None` on unbalanced quotes or a closing
    /// quote not followed by whitespace.
    pub fn split_args(line: &[u8]) -> Option<Vec<DynStr>> {
        let mut argv = Vec::new();
        let mut i = 0;
        loop {
            while i < line.len() && line[i].is_ascii_whitespace() {
                i += 1;
            }
            if i >= line.len() {
                return Some(argv);
            }
            let mut current = DynStr::new();
            let mut inq = false;
            let mut insq = false;
            let mut done = false;
            while !done {
                let c = line.get(i).copied();
                if inq {
                    match c {
                        Some(b'\\')
                            if line.get(i + 1) == Some(&b'x')
                                && i + 3 < line.len()
                                && line[i + 2].is_ascii_hexdigit()
                                && line[i + 3].is_ascii_hexdigit() =>
                        {
                            let byte = hex_digit(line[i + 2]) * 16 + hex_digit(line[i + 3]);
                            current.push_bytes(&[byte]).ok()?;
                            i += 3;
                        }
                        Some(b'\\') if i + 1 < line.len() => {
                            i += 1;
                            let e = match line[i] {
                                b'n' => b'\n',
                                b'r' => b'\r',
                                b't' => b'\t',
                                b'b' => 0x08,
                                b'a' => 0x07,
                                other => other,
                            };
                            current.push_bytes(&[e]).ok()?;
                        }
                        Some(b'"') => {
                            // Closing quote must be followed by a space or
                            // the end of the line.
                            if let Some(&n) = line.get(i + 1) {
                                if !n.is_ascii_whitespace() {
                                    return None;
                                }
                            }
                            done = true;
                        }
                        Some(other) => current.push_bytes(&[other]).ok()?,
                        None => return None,
                    }
                } else if insq {
                    match c {
                        Some(b'\\') if line.get(i + 1) == Some(&b'\'') => {
                            i += 1;
                            current.push_bytes(b"'").ok()?;
                        }
                        Some(b'\'') => {
                            if let Some(&n) = line.get(i + 1) {
                                if !n.is_ascii_whitespace() {
                                    return None;
                                }
                            }
                            done = true;
                        }
                        Some(other) => current.push_bytes(&[other]).ok()?,
                        None => return None,
                    }
                } else {
                    match c {
                        Some(b' ') | Some(b'\n') | Some(b'\r') | Some(b'\t') | None => done = true,
                        Some(b'"') => inq = true,
                        Some(b'\'') => insq = true,
                        Some(other) => current.push_bytes(&[other]).ok()?,
                    }
                }
                if i < line.len() {
                    i += 1;
                }
            }
            argv.push(current);
        }
    }

    /// Join byte strings with a separator.
    pub fn join(argv: &[&[u8]], sep: &[u8]) -> Result<DynStr> {
        let mut s = DynStr::new();
        for (i, a) in argv.iter().enumerate() {
            s.push_bytes(a)?;
            if i != argv.len() - 1 {
                s.push_bytes(sep)?;
            }
        }
        Ok(s)
    }

    /// Join [`DynStr`]s with a separator.
    pub fn join_dynstr(argv: &[DynStr], sep: &[u8]) -> Result<DynStr> {
        let mut s = DynStr::new();
        for (i, a) in argv.iter().enumerate() {
            s.push_dynstr(a)?;
            if i != argv.len() - 1 {
                s.push_bytes(sep)?;
            }
        }
        Ok(s)
    }
}

#[inline]
fn hex_digit(b: u8) -> u8 {
    match b {
        b'0'..=b'9' => b - b'0',
        b'a'..=b'f' => b - b'a' + 10,
        _ => b - b'A' + 10,
    }
}

/// Render `value` as ASCII decimal into a fixed buffer, returning the
/// length used. 21 bytes covers `i64::MIN` with its sign.
pub(crate) fn i64_digits(value: i64) -> ([u8; 21], usize) {
    let mut buf = [0u8; 21];
    let negative = value < 0;
    let mut v = value.unsigned_abs();
    let mut n = 0;
    loop {
        buf[n] = b'0' + (v % 10) as u8;
        n += 1;
        v /= 10;
        if v == 0 {
            break;
        }
    }
    if negative {
        buf[n] = b'-';
        n += 1;
    }
    buf[..n].reverse();
    (buf, n)
}

impl Default for DynStr {
    fn default() -> Self {
        DynStr::new()
    }
}

impl std::ops::Deref for DynStr {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl AsRef<[u8]> for DynStr {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl PartialEq<[u8]> for DynStr {
    fn eq(&self, other: &[u8]) -> bool {
        self.as_bytes() == other
    }
}

impl fmt::Debug for DynStr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "DynStr({:?})", String::from_utf8_lossy(self.as_bytes()))
    }
}

impl fmt::Write for DynStr {
    fn write_str(&mut self, t: &str) -> fmt::Result {
        self.push_bytes(t.as_bytes()).map_err(|_| fmt::Error)
    }
}
