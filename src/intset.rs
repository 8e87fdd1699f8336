//! Sorted packed integer set with automatic element-width promotion.
//!
//! The whole set lives in one flat buffer that is also its wire image:
//! `encoding:u32le | length:u32le | length * encoding` bytes of sorted
//! signed little-endian integers. `encoding` (2, 4, or 8 bytes per element)
//! is always the smallest width that fits every stored value, and is only
//! ever promoted — removing the single wide element does not narrow the
//! remaining ones.

use byteorder::{ByteOrder, LittleEndian};
use rand::Rng;

use crate::error::{Error, Result};

const HDR: usize = 8;
const ENC_INT16: usize = 2;
const ENC_INT32: usize = 4;
const ENC_INT64: usize = 8;

/// A sorted set of `i64` values packed at the smallest sufficient width.
#[derive(Clone, PartialEq, Eq)]
pub struct IntSet {
    data: Vec<u8>,
}

impl IntSet {
    /// An empty set at 16-bit encoding.
    pub fn new() -> IntSet {
        let mut data = Vec::with_capacity(HDR);
        data.extend_from_slice(&(ENC_INT16 as u32).to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        IntSet { data }
    }

    /// Adopt a wire blob, validating the header, the payload size, and the
    /// strict ascending order of elements.
    pub fn from_bytes(data: Vec<u8>) -> Result<IntSet> {
        if data.len() < HDR {
            return Err(Error::Encoding("intset shorter than its header"));
        }
        let is = IntSet { data };
        let enc = is.encoding();
        if enc != ENC_INT16 && enc != ENC_INT32 && enc != ENC_INT64 {
            return Err(Error::Encoding("intset encoding not one of 2/4/8"));
        }
        let len = is.len();
        if is.data.len() != HDR + len * enc {
            return Err(Error::Encoding("intset length does not match payload"));
        }
        for i in 1..len {
            if is.get_at(i - 1, enc) >= is.get_at(i, enc) {
                return Err(Error::Encoding("intset elements not strictly ascending"));
            }
        }
        Ok(is)
    }

    /// Number of elements.
    #[inline]
    pub fn len(&self) -> usize {
        LittleEndian::read_u32(&self.data[4..8]) as usize
    }

    /// True when the set has no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size in bytes of the wire image.
    #[inline]
    pub fn blob_len(&self) -> usize {
        self.data.len()
    }

    /// The wire image: header plus packed payload.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Bytes per element currently in use (2, 4, or 8).
    #[inline]
    pub fn encoding(&self) -> usize {
        LittleEndian::read_u32(&self.data[0..4]) as usize
    }

    /// The element at `pos`, or `None` past the end.
    pub fn get(&self, pos: usize) -> Option<i64> {
        (pos < self.len()).then(|| self.get_at(pos, self.encoding()))
    }

    /// Membership test.
    pub fn contains(&self, value: i64) -> bool {
        value_encoding(value) <= self.encoding() && self.search(value).is_ok()
    }

    /// Insert `value`, keeping order and possibly promoting the encoding.
    /// Returns `false` when the value was already present.
    pub fn insert(&mut self, value: i64) -> Result<bool> {
        let enc = self.encoding();
        if value_encoding(value) > enc {
            // The new value is out of range for every stored element, so it
            // lands at one end of the upgraded set.
            self.upgrade_and_add(value)?;
            return Ok(true);
        }
        let pos = match self.search(value) {
            Ok(_) => return Ok(false),
            Err(pos) => pos,
        };
        self.data.try_reserve_exact(enc)?;
        let off = HDR + pos * enc;
        let end = self.data.len();
        self.data.resize(end + enc, 0);
        self.data.copy_within(off..end, off + enc);
        self.set_at(pos, enc, value);
        self.bump_len(1);
        Ok(true)
    }

    /// Remove `value`, shrinking the buffer. The encoding is never demoted.
    /// Returns `false` when the value was not present.
    pub fn remove(&mut self, value: i64) -> bool {
        let enc = self.encoding();
        if value_encoding(value) > enc {
            return false;
        }
        let pos = match self.search(value) {
            Ok(pos) => pos,
            Err(_) => return false,
        };
        let off = HDR + pos * enc;
        let end = self.data.len();
        self.data.copy_within(off + enc..end, off);
        self.data.truncate(end - enc);
        self.data.shrink_to_fit();
        self.bump_len(-1);
        true
    }

    /// A uniformly random element. The set must not be empty.
    pub fn random(&self, rng: &mut impl Rng) -> i64 {
        debug_assert!(!self.is_empty());
        self.get_at(rng.gen_range(0..self.len()), self.encoding())
    }

    fn set_encoding(&mut self, enc: usize) {
        self.data[0..4].copy_from_slice(&(enc as u32).to_le_bytes());
    }

    fn bump_len(&mut self, delta: isize) {
        let n = (self.len() as isize + delta) as u32;
        self.data[4..8].copy_from_slice(&n.to_le_bytes());
    }

    fn get_at(&self, pos: usize, enc: usize) -> i64 {
        let off = HDR + pos * enc;
        match enc {
            ENC_INT16 => LittleEndian::read_i16(&self.data[off..off + 2]) as i64,
            ENC_INT32 => LittleEndian::read_i32(&self.data[off..off + 4]) as i64,
            _ => LittleEndian::read_i64(&self.data[off..off + 8]),
        }
    }

    fn set_at(&mut self, pos: usize, enc: usize, value: i64) {
        let off = HDR + pos * enc;
        match enc {
            ENC_INT16 => LittleEndian::write_i16(&mut self.data[off..off + 2], value as i16),
            ENC_INT32 => LittleEndian::write_i32(&mut self.data[off..off + 4], value as i32),
            _ => LittleEndian::write_i64(&mut self.data[off..off + 8], value),
        }
    }

    /// Binary search over the packed payload: `Ok(pos)` when found,
    /// `Err(pos)` with the insertion position otherwise.
    fn search(&self, value: i64) -> Result<usize, usize> {
        let enc = self.encoding();
        let mut lo = 0;
        let mut hi = self.len();
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.get_at(mid, enc) < value {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        if lo < self.len() && self.get_at(lo, enc) == value {
            Ok(lo)
        } else {
            Err(lo)
        }
    }

    fn upgrade_and_add(&mut self, value: i64) -> Result<()> {
        let curenc = self.encoding();
        let newenc = value_encoding(value);
        let len = self.len();
        // Negative out-of-range values sort before everything stored,
        // positive ones after.
        let prepend = usize::from(value < 0);

        let target = HDR + (len + 1) * newenc;
        self.data.try_reserve_exact(target - self.data.len())?;
        self.data.resize(target, 0);
        // Widen in place from the highest index down so no source slot is
        // overwritten before it is read.
        for i in (0..len).rev() {
            let v = self.get_at(i, curenc);
            self.set_at(i + prepend, newenc, v);
        }
        self.set_encoding(newenc);
        if prepend == 1 {
            self.set_at(0, newenc, value);
        } else {
            self.set_at(len, newenc, value);
        }
        self.bump_len(1);
        Ok(())
    }
}

/// The smallest element width able to hold `v`.
fn value_encoding(v: i64) -> usize {
    if v < i32::MIN as i64 || v > i32::MAX as i64 {
        ENC_INT64
    } else if v < i16::MIN as i64 || v > i16::MAX as i64 {
        ENC_INT32
    } else {
        ENC_INT16
    }
}

impl Default for IntSet {
    fn default() -> Self {
        IntSet::new()
    }
}

impl std::fmt::Debug for IntSet {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let mut list = f.debug_list();
        for i in 0..self.len() {
            list.entry(&self.get(i).unwrap());
        }
        list.finish()
    }
}
