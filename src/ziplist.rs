//! Packed entry list: a doubly traversable sequence of small strings and
//! integers in one contiguous buffer.
//!
//! Wire layout, all in one allocation that is also the snapshot image:
//!
//! ```text
//! zlbytes:u32le | zltail:u32le | zllen:u16le | entry* | 0xFF
//! ```
//!
//! Each entry is `prevrawlen | encoding | payload`. `prevrawlen` records the
//! raw byte size of the *previous* entry (one byte below 254, else `0xFE`
//! plus a 32-bit little-endian length), which is what makes backward
//! traversal possible. The encoding byte is self-describing: three string
//! forms with 6/14/32-bit big-endian length prefixes, five big-endian
//! integer widths, and a 4-bit immediate form for 0..=12. Inserted bytes
//! that parse as a decimal `i64` are stored at the narrowest integer width.
//!
//! Because `prevrawlen` may be 1 or 5 bytes, growing one entry can force its
//! successor's field to widen, which grows the successor, and so on: the
//! cascade update. Fields are never shrunk once widened (a 5-byte field that
//! could fit in 1 is re-encoded in place), so a cascade cannot oscillate.
//!
//! Entry positions in this API are byte offsets into the buffer. Offsets
//! are invalidated by any mutation, exactly as the interior pointers they
//! stand in for.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::error::{Error, Result};

pub(crate) const HEADER: usize = 10;
const ZL_END: u8 = 0xFF;
const BIG_PREVLEN: usize = 254;

const STR_06B: u8 = 0x00;
const STR_14B: u8 = 0x40;
const STR_32B: u8 = 0x80;
const INT_16: u8 = 0xC0;
const INT_32: u8 = 0xD0;
const INT_64: u8 = 0xE0;
const INT_24: u8 = 0xF0;
const INT_8: u8 = 0xFE;
const INT_IMM_MIN: u8 = 0xF1;
const INT_IMM_MAX: u8 = 0xFD;

/// Which end of the list to push to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum End {
    Head,
    Tail,
}

/// A borrowed view of one entry: either raw bytes or a decoded integer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueRef<'a> {
    Bytes(&'a [u8]),
    Int(i64),
}

/// An owned entry value, as handed out by [`QuickList`](crate::QuickList).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    Bytes(Vec<u8>),
    Int(i64),
}

impl ValueRef<'_> {
    /// Copy into an owned [`Value`].
    pub fn to_owned(self) -> Value {
        match self {
            ValueRef::Bytes(b) => Value::Bytes(b.to_vec()),
            ValueRef::Int(v) => Value::Int(v),
        }
    }
}

impl Value {
    /// The decimal bytes an integer value round-trips through when pushed
    /// back into a packed structure.
    pub(crate) fn to_push_bytes(&self) -> Vec<u8> {
        match self {
            Value::Bytes(b) => b.clone(),
            Value::Int(v) => {
                let (buf, n) = crate::dynstr::i64_digits(*v);
                buf[..n].to_vec()
            }
        }
    }
}

/// Decoded metadata of one entry.
#[derive(Clone, Copy)]
pub(crate) struct EntryInfo {
    pub(crate) prevlen_size: usize,
    pub(crate) prevlen: usize,
    pub(crate) len_size: usize,
    pub(crate) len: usize,
    pub(crate) encoding: u8,
}

impl EntryInfo {
    #[inline]
    pub(crate) fn header(&self) -> usize {
        self.prevlen_size + self.len_size
    }
    #[inline]
    pub(crate) fn raw(&self) -> usize {
        self.header() + self.len
    }
}

/// Read-only decoding over a ziplist blob, whether it lives in a
/// [`ZipList`] or inside a quicklist node buffer.
#[derive(Clone, Copy)]
pub(crate) struct ZlView<'a>(pub(crate) &'a [u8]);

impl<'a> ZlView<'a> {
    pub(crate) fn zlbytes(&self) -> usize {
        LittleEndian::read_u32(&self.0[0..4]) as usize
    }

    pub(crate) fn tail_offset(&self) -> usize {
        LittleEndian::read_u32(&self.0[4..8]) as usize
    }

    pub(crate) fn zllen_raw(&self) -> u16 {
        LittleEndian::read_u16(&self.0[8..10])
    }

    pub(crate) fn decode_prevlen(&self, p: usize) -> (usize, usize) {
        if (self.0[p] as usize) < BIG_PREVLEN {
            (1, self.0[p] as usize)
        } else {
            (5, LittleEndian::read_u32(&self.0[p + 1..p + 5]) as usize)
        }
    }

    fn decode_encoding(&self, p: usize) -> (u8, usize, usize) {
        let b = self.0[p];
        if is_str(b) {
            match b & 0xC0 {
                STR_06B => (STR_06B, 1, (b & 0x3F) as usize),
                STR_14B => (
                    STR_14B,
                    2,
                    ((b & 0x3F) as usize) << 8 | self.0[p + 1] as usize,
                ),
                _ => (STR_32B, 5, BigEndian::read_u32(&self.0[p + 1..p + 5]) as usize),
            }
        } else {
            (b, 1, int_payload_len(b))
        }
    }

    pub(crate) fn entry_info(&self, p: usize) -> EntryInfo {
        let (prevlen_size, prevlen) = self.decode_prevlen(p);
        let (encoding, len_size, len) = self.decode_encoding(p + prevlen_size);
        EntryInfo {
            prevlen_size,
            prevlen,
            len_size,
            len,
            encoding,
        }
    }

    pub(crate) fn raw_len_at(&self, p: usize) -> usize {
        self.entry_info(p).raw()
    }

    fn load_int(&self, p: usize, encoding: u8) -> i64 {
        let d = self.0;
        match encoding {
            INT_8 => d[p] as i8 as i64,
            INT_16 => BigEndian::read_i16(&d[p..p + 2]) as i64,
            INT_24 => BigEndian::read_i24(&d[p..p + 3]) as i64,
            INT_32 => BigEndian::read_i32(&d[p..p + 4]) as i64,
            INT_64 => BigEndian::read_i64(&d[p..p + 8]),
            imm => (imm & 0x0F) as i64 - 1,
        }
    }

    pub(crate) fn index(&self, index: i64) -> Option<usize> {
        if index < 0 {
            let mut left = (-(index + 1)) as usize;
            let mut p = self.tail_offset();
            if self.0[p] == ZL_END {
                return None;
            }
            while left > 0 {
                let prevlen = self.decode_prevlen(p).1;
                if prevlen == 0 {
                    return None;
                }
                p -= prevlen;
                left -= 1;
            }
            Some(p)
        } else {
            let mut left = index as usize;
            let mut p = HEADER;
            loop {
                if self.0[p] == ZL_END {
                    return None;
                }
                if left == 0 {
                    return Some(p);
                }
                p += self.raw_len_at(p);
                left -= 1;
            }
        }
    }

    pub(crate) fn next(&self, at: usize) -> Option<usize> {
        if self.0[at] == ZL_END {
            return None;
        }
        let q = at + self.raw_len_at(at);
        (self.0[q] != ZL_END).then_some(q)
    }

    pub(crate) fn prev(&self, at: usize) -> Option<usize> {
        if self.0[at] == ZL_END {
            let t = self.tail_offset();
            return (self.0[t] != ZL_END).then_some(t);
        }
        if at == HEADER {
            return None;
        }
        Some(at - self.decode_prevlen(at).1)
    }

    pub(crate) fn get(&self, at: usize) -> Option<ValueRef<'a>> {
        if at >= self.0.len() - 1 || self.0[at] == ZL_END {
            return None;
        }
        let e = self.entry_info(at);
        let payload = at + e.header();
        if is_str(e.encoding) {
            Some(ValueRef::Bytes(&self.0[payload..payload + e.len]))
        } else {
            Some(ValueRef::Int(self.load_int(payload, e.encoding)))
        }
    }

    pub(crate) fn entry_eq(&self, at: usize, s: &[u8]) -> bool {
        match self.get(at) {
            Some(ValueRef::Bytes(b)) => b == s,
            Some(ValueRef::Int(v)) => parse_i64(s) == Some(v),
            None => false,
        }
    }

    pub(crate) fn len(&self) -> usize {
        let raw = self.zllen_raw() as usize;
        if raw < 0xFFFF {
            return raw;
        }
        let mut n = 0;
        let mut p = HEADER;
        while self.0[p] != ZL_END {
            n += 1;
            p += self.raw_len_at(p);
        }
        n
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.0[HEADER] == ZL_END
    }
}

/// The packed list.
#[derive(Clone)]
pub struct ZipList {
    data: Vec<u8>,
}

impl ZipList {
    /// An empty list: header, no entries, terminator.
    pub fn new() -> ZipList {
        let mut data = Vec::with_capacity(HEADER + 1);
        data.extend_from_slice(&((HEADER + 1) as u32).to_le_bytes());
        data.extend_from_slice(&(HEADER as u32).to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        data.push(ZL_END);
        ZipList { data }
    }

    /// Adopt a wire blob after a full structural walk: header fields,
    /// per-entry encodings, the `prevrawlen` chain, and the terminator.
    pub fn from_bytes(data: Vec<u8>) -> Result<ZipList> {
        if data.len() < HEADER + 1 {
            return Err(Error::Encoding("ziplist shorter than its header"));
        }
        let zl = ZipList { data };
        if zl.view().zlbytes() != zl.data.len() {
            return Err(Error::Encoding("ziplist zlbytes does not match size"));
        }
        if zl.data[zl.data.len() - 1] != ZL_END {
            return Err(Error::Encoding("ziplist missing terminator"));
        }
        let mut p = HEADER;
        let mut prev_raw = 0usize;
        let mut prev_start = 0usize;
        let mut count = 0usize;
        let mut last = None;
        while zl.data[p] != ZL_END {
            let e = zl.checked_entry(p)?;
            if e.prevlen != prev_raw {
                return Err(Error::Encoding("ziplist prevrawlen chain broken"));
            }
            if count > 0 && p - e.prevlen != prev_start {
                return Err(Error::Encoding("ziplist prevrawlen chain broken"));
            }
            prev_raw = e.raw();
            prev_start = p;
            last = Some(p);
            count += 1;
            p += e.raw();
            if p >= zl.data.len() {
                return Err(Error::Encoding("ziplist entry overruns buffer"));
            }
        }
        if p != zl.data.len() - 1 {
            return Err(Error::Encoding("ziplist bytes after terminator"));
        }
        let expect_tail = last.unwrap_or(HEADER);
        if zl.view().tail_offset() != expect_tail {
            return Err(Error::Encoding("ziplist zltail does not point at tail"));
        }
        let raw = zl.view().zllen_raw() as usize;
        if raw < 0xFFFF && raw != count {
            return Err(Error::Encoding("ziplist zllen does not match entries"));
        }
        Ok(zl)
    }

    /// Wrap bytes this crate itself produced, skipping validation.
    pub(crate) fn from_owned_unchecked(data: Vec<u8>) -> ZipList {
        ZipList { data }
    }

    /// Reserve room ahead of a mutation sequence so it cannot fail midway.
    pub(crate) fn reserve(&mut self, additional: usize) -> Result<()> {
        self.data.try_reserve(additional)?;
        Ok(())
    }

    /// Give up the backing buffer.
    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    #[inline]
    pub(crate) fn view(&self) -> ZlView<'_> {
        ZlView(&self.data)
    }

    /// Push to either end.
    pub fn push(&mut self, s: &[u8], end: End) -> Result<()> {
        let p = match end {
            End::Head => HEADER,
            End::Tail => self.data.len() - 1,
        };
        self.insert(p, s)
    }

    /// Insert before the entry at offset `at` (inserting at the terminator
    /// appends). Runs the cascade update when the successor's `prevrawlen`
    /// field changes width.
    pub fn insert(&mut self, at: usize, s: &[u8]) -> Result<()> {
        let appending = self.data[at] == ZL_END;
        // The new entry inherits the predecessor recorded at the insertion
        // point; when appending, that is the current tail's raw size.
        let prevlen = if !appending {
            self.view().decode_prevlen(at).1
        } else {
            let tail = self.view().tail_offset();
            if self.data[tail] != ZL_END {
                self.view().raw_len_at(tail)
            } else {
                0
            }
        };

        let parsed = parse_i64(s);
        let body_len = match parsed {
            Some(v) => 1 + int_payload_len(int_encoding_for(v)),
            None => str_header_size(s.len()) + s.len(),
        };
        let reqlen = prevlen_size_for(prevlen) + body_len;

        // How much the successor's prevrawlen field must change to record
        // the new entry's size.
        let mut forcelarge = false;
        let mut nextdiff: isize = if !appending {
            prevlen_size_for(reqlen) as isize - self.view().decode_prevlen(at).0 as isize
        } else {
            0
        };
        if nextdiff == -4 && reqlen < 4 {
            // Shrinking the field would free more bytes than the new entry
            // occupies; keep the wide field and re-encode in place.
            nextdiff = 0;
            forcelarge = true;
        }

        self.data
            .try_reserve(reqlen + if nextdiff > 0 { 4 } else { 0 })?;

        let old_tail = self.view().tail_offset();

        // Resize and rewrite the successor's prevrawlen field first; the
        // entry bytes then go in front of it.
        if !appending {
            match nextdiff {
                4 => {
                    self.data.splice(at..at, [0u8; 4]);
                    self.write_prevlen_wide(at, reqlen);
                }
                -4 => {
                    self.data.splice(at..at + 4, std::iter::empty());
                    self.data[at] = reqlen as u8;
                }
                _ => {
                    if forcelarge {
                        self.write_prevlen_wide(at, reqlen);
                    } else {
                        self.write_prevlen_at(at, reqlen);
                    }
                }
            }
        }

        let mut entry = Vec::with_capacity(reqlen);
        write_prevlen(&mut entry, prevlen);
        match parsed {
            Some(v) => {
                let enc = int_encoding_for(v);
                entry.push(enc);
                write_int_payload(&mut entry, enc, v);
            }
            None => {
                write_str_header(&mut entry, s.len());
                entry.extend_from_slice(s);
            }
        }
        debug_assert_eq!(entry.len(), reqlen);
        self.data.splice(at..at, entry);

        self.set_zlbytes();
        if appending {
            self.set_tail_offset(at);
        } else {
            let next_is_tail = old_tail == at;
            let tail = (old_tail + reqlen) as isize + if next_is_tail { 0 } else { nextdiff };
            self.set_tail_offset(tail as usize);
        }
        if nextdiff != 0 {
            self.cascade_update(at + reqlen);
        }
        self.bump_zllen(1);
        Ok(())
    }

    /// Remove the entry at offset `at`, returning the offset now holding
    /// the entry that followed it (which may be the terminator).
    pub fn remove(&mut self, at: usize) -> usize {
        self.delete_at(at, 1);
        at
    }

    /// Remove `num` entries starting at `index` (negative indexes from the
    /// tail). Returns how many were removed.
    pub fn remove_range(&mut self, index: i64, num: usize) -> usize {
        match self.index(index) {
            Some(p) => self.delete_at(p, num),
            None => 0,
        }
    }

    /// Offset of the entry at `index`; negative counts from the tail
    /// (`-1` is the last entry).
    pub fn index(&self, index: i64) -> Option<usize> {
        self.view().index(index)
    }

    /// Offset of the entry after `at`, if any.
    pub fn next(&self, at: usize) -> Option<usize> {
        self.view().next(at)
    }

    /// Offset of the entry before `at`; passing the terminator offset
    /// yields the tail entry.
    pub fn prev(&self, at: usize) -> Option<usize> {
        self.view().prev(at)
    }

    /// Decode the entry at `at`.
    pub fn get(&self, at: usize) -> Option<ValueRef<'_>> {
        self.view().get(at)
    }

    /// Search forward from `from` for an entry equal to `needle`, comparing
    /// `skip` entries apart (0 checks every entry).
    pub fn find(&self, from: usize, needle: &[u8], skip: usize) -> Option<usize> {
        let view = self.view();
        let mut p = from;
        let mut skipcnt = 0usize;
        // Lazily computed: needle parsed as an integer, if it is one.
        let mut needle_int: Option<Option<i64>> = None;
        while p < self.data.len() && self.data[p] != ZL_END {
            let e = view.entry_info(p);
            let payload = p + e.header();
            if skipcnt == 0 {
                if is_str(e.encoding) {
                    if e.len == needle.len() && self.data[payload..payload + e.len] == *needle {
                        return Some(p);
                    }
                } else {
                    let v = *needle_int.get_or_insert_with(|| parse_i64(needle));
                    if v == Some(view.load_int(payload, e.encoding)) {
                        return Some(p);
                    }
                }
                skipcnt = skip;
            } else {
                skipcnt -= 1;
            }
            p += e.raw();
        }
        None
    }

    /// True when the entry at `at` equals `s` (string compare for string
    /// entries, value compare after decimal parse for integer entries).
    pub fn entry_eq(&self, at: usize, s: &[u8]) -> bool {
        self.view().entry_eq(at, s)
    }

    /// Concatenate `second` onto `first`. The larger blob keeps its
    /// allocation; the junction entry's `prevrawlen` is rewritten and the
    /// cascade run across the seam.
    pub fn merge(first: ZipList, second: ZipList) -> Result<ZipList> {
        if second.is_empty() {
            return Ok(first);
        }
        if first.is_empty() {
            return Ok(second);
        }
        let first_len = first.len();
        let second_len = second.len();

        let (mut zl, junction, junction_prev, appended_tail) =
            if first.blob_len() >= second.blob_len() {
                let mut zl = first;
                zl.data
                    .try_reserve(second.data.len() - HEADER - 1 + 4)?;
                let junction_prev = zl.view().raw_len_at(zl.view().tail_offset());
                zl.data.truncate(zl.data.len() - 1);
                let junction = zl.data.len();
                zl.data.extend_from_slice(&second.data[HEADER..]);
                (zl, junction, junction_prev, second.view().tail_offset() - HEADER)
            } else {
                let mut zl = second;
                zl.data
                    .try_reserve(first.data.len() - HEADER - 1 + 4)?;
                let old_tail = zl.view().tail_offset() - HEADER;
                let junction_prev = first.view().raw_len_at(first.view().tail_offset());
                zl.data.splice(
                    HEADER..HEADER,
                    first.data[HEADER..first.data.len() - 1].iter().copied(),
                );
                let junction = HEADER + (first.data.len() - HEADER - 1);
                (zl, junction, junction_prev, old_tail)
            };

        // The junction entry previously led its list, so its field is one
        // byte holding zero; widen it if the new predecessor needs that.
        let grew = if prevlen_size_for(junction_prev) > zl.view().decode_prevlen(junction).0 {
            zl.data.splice(junction..junction, [0u8; 4]);
            zl.write_prevlen_wide(junction, junction_prev);
            true
        } else {
            zl.write_prevlen_at(junction, junction_prev);
            false
        };

        zl.set_zlbytes();
        let tail = junction + appended_tail + if grew && appended_tail != 0 { 4 } else { 0 };
        zl.set_tail_offset(tail);
        let total = first_len + second_len;
        zl.set_zllen_raw(total.min(0xFFFF) as u16);
        zl.cascade_update(junction);
        Ok(zl)
    }

    /// Number of entries. The stored count saturates at `0xFFFF`, after
    /// which this counts by scanning.
    pub fn len(&self) -> usize {
        self.view().len()
    }

    /// True when the list has no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.view().is_empty()
    }

    /// Size in bytes of the wire image.
    #[inline]
    pub fn blob_len(&self) -> usize {
        self.data.len()
    }

    /// The wire image.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    // ---- header fields ----

    fn set_zlbytes(&mut self) {
        let n = self.data.len() as u32;
        self.data[0..4].copy_from_slice(&n.to_le_bytes());
    }

    fn set_tail_offset(&mut self, off: usize) {
        self.data[4..8].copy_from_slice(&(off as u32).to_le_bytes());
    }

    fn set_zllen_raw(&mut self, n: u16) {
        self.data[8..10].copy_from_slice(&n.to_le_bytes());
    }

    fn bump_zllen(&mut self, delta: i32) {
        let cur = self.view().zllen_raw();
        if cur < u16::MAX {
            self.set_zllen_raw((cur as i32 + delta) as u16);
        }
    }

    /// Bounds- and form-checked entry decode for `from_bytes`.
    fn checked_entry(&self, p: usize) -> Result<EntryInfo> {
        let err = Error::Encoding("ziplist entry truncated or malformed");
        let end = self.data.len() - 1;
        let b = *self.data.get(p).ok_or(err.clone())?;
        let (prevlen_size, prevlen) = if (b as usize) < BIG_PREVLEN {
            (1, b as usize)
        } else {
            let raw = self.data.get(p + 1..p + 5).ok_or(err.clone())?;
            (5, u32::from_le_bytes(raw.try_into().unwrap()) as usize)
        };
        let ep = p + prevlen_size;
        let eb = *self.data.get(ep).ok_or(err.clone())?;
        let (len_size, len) = if is_str(eb) {
            match eb & 0xC0 {
                STR_06B => (1, (eb & 0x3F) as usize),
                STR_14B => (
                    2,
                    ((eb & 0x3F) as usize) << 8
                        | *self.data.get(ep + 1).ok_or(err.clone())? as usize,
                ),
                _ => {
                    let raw = self.data.get(ep + 1..ep + 5).ok_or(err.clone())?;
                    (5, u32::from_be_bytes(raw.try_into().unwrap()) as usize)
                }
            }
        } else {
            match eb {
                INT_8 | INT_16 | INT_24 | INT_32 | INT_64 => (1, int_payload_len(eb)),
                INT_IMM_MIN..=INT_IMM_MAX => (1, 0),
                _ => return Err(err),
            }
        };
        let info = EntryInfo {
            prevlen_size,
            prevlen,
            len_size,
            len,
            encoding: eb,
        };
        if p + info.raw() > end {
            return Err(err);
        }
        Ok(info)
    }

    // ---- entry writing ----

    fn write_prevlen_at(&mut self, p: usize, len: usize) {
        if (self.data[p] as usize) < BIG_PREVLEN {
            debug_assert!(len < BIG_PREVLEN);
            self.data[p] = len as u8;
        } else {
            self.write_prevlen_wide(p, len);
        }
    }

    fn write_prevlen_wide(&mut self, p: usize, len: usize) {
        self.data[p] = BIG_PREVLEN as u8;
        self.data[p + 1..p + 5].copy_from_slice(&(len as u32).to_le_bytes());
    }

    // ---- structural mutation ----

    /// The cascade: after the entry at `p` changed size, walk forward
    /// widening successors' `prevrawlen` fields until one already fits.
    fn cascade_update(&mut self, mut p: usize) {
        loop {
            if self.data[p] == ZL_END {
                break;
            }
            let rawlen = self.view().raw_len_at(p);
            let np = p + rawlen;
            if self.data[np] == ZL_END {
                break;
            }
            let next = self.view().entry_info(np);
            if next.prevlen == rawlen {
                break;
            }
            let need = prevlen_size_for(rawlen);
            if next.prevlen_size < need {
                let old_tail = self.view().tail_offset();
                self.data.splice(np..np, [0u8; 4]);
                self.write_prevlen_wide(np, rawlen);
                self.set_zlbytes();
                if old_tail != np {
                    self.set_tail_offset(old_tail + 4);
                }
                p = np;
            } else {
                if next.prevlen_size > need {
                    // Wide field stays wide; re-encode the value in place.
                    self.write_prevlen_wide(np, rawlen);
                } else {
                    self.write_prevlen_at(np, rawlen);
                }
                break;
            }
        }
    }

    /// Remove up to `num` entries starting at offset `at`. Returns the
    /// number removed.
    fn delete_at(&mut self, at: usize, num: usize) -> usize {
        if self.data[at] == ZL_END {
            return 0;
        }
        let first_prevlen = self.view().decode_prevlen(at).1;
        let mut cur = at;
        let mut deleted = 0usize;
        for _ in 0..num {
            if self.data[cur] == ZL_END {
                break;
            }
            cur += self.view().raw_len_at(cur);
            deleted += 1;
        }
        let totlen = cur - at;
        if totlen == 0 {
            return 0;
        }
        if self.data[cur] != ZL_END {
            let old_tail = self.view().tail_offset();
            let surviving_is_tail = old_tail == cur;
            let nextdiff =
                prevlen_size_for(first_prevlen) as isize - self.view().decode_prevlen(cur).0 as isize;
            self.data.splice(at..cur, std::iter::empty());
            match nextdiff {
                4 => {
                    // The surviving entry's field grows 1 -> 5 to record a
                    // wide predecessor.
                    self.data.splice(at..at, [0u8; 4]);
                    self.write_prevlen_wide(at, first_prevlen);
                }
                -4 => {
                    self.data.splice(at..at + 4, std::iter::empty());
                    self.data[at] = first_prevlen as u8;
                }
                _ => self.write_prevlen_at(at, first_prevlen),
            }
            self.set_zlbytes();
            let tail = old_tail as isize - totlen as isize
                + if surviving_is_tail { 0 } else { nextdiff };
            self.set_tail_offset(tail as usize);
            if nextdiff != 0 {
                self.cascade_update(at);
            }
        } else {
            // Deleting through the tail: the entry before the range, if
            // any, becomes the new tail.
            self.data.splice(at..cur, std::iter::empty());
            self.set_zlbytes();
            self.set_tail_offset(at - first_prevlen);
        }
        self.bump_zllen(-(deleted as i32));
        deleted
    }
}

impl Default for ZipList {
    fn default() -> Self {
        ZipList::new()
    }
}

impl std::fmt::Debug for ZipList {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let mut list = f.debug_list();
        let mut p = self.index(0);
        while let Some(at) = p {
            list.entry(&self.get(at).unwrap());
            p = self.next(at);
        }
        list.finish()
    }
}

#[inline]
fn is_str(encoding: u8) -> bool {
    encoding < 0xC0
}

fn prevlen_size_for(len: usize) -> usize {
    if len < BIG_PREVLEN {
        1
    } else {
        5
    }
}

fn write_prevlen(out: &mut Vec<u8>, len: usize) {
    if len < BIG_PREVLEN {
        out.push(len as u8);
    } else {
        out.push(BIG_PREVLEN as u8);
        out.extend_from_slice(&(len as u32).to_le_bytes());
    }
}

fn str_header_size(len: usize) -> usize {
    if len <= 0x3F {
        1
    } else if len <= 0x3FFF {
        2
    } else {
        5
    }
}

fn write_str_header(out: &mut Vec<u8>, len: usize) {
    if len <= 0x3F {
        out.push(STR_06B | len as u8);
    } else if len <= 0x3FFF {
        out.push(STR_14B | (len >> 8) as u8);
        out.push((len & 0xFF) as u8);
    } else {
        out.push(STR_32B);
        out.extend_from_slice(&(len as u32).to_be_bytes());
    }
}

/// The narrowest integer encoding able to hold `v`.
fn int_encoding_for(v: i64) -> u8 {
    if (0..=12).contains(&v) {
        INT_IMM_MIN + v as u8
    } else if i8::try_from(v).is_ok() {
        INT_8
    } else if i16::try_from(v).is_ok() {
        INT_16
    } else if (-0x80_0000..=0x7F_FFFF).contains(&v) {
        INT_24
    } else if i32::try_from(v).is_ok() {
        INT_32
    } else {
        INT_64
    }
}

fn int_payload_len(encoding: u8) -> usize {
    match encoding {
        INT_8 => 1,
        INT_16 => 2,
        INT_24 => 3,
        INT_32 => 4,
        INT_64 => 8,
        _ => 0, // immediate
    }
}

fn write_int_payload(out: &mut Vec<u8>, encoding: u8, v: i64) {
    match encoding {
        INT_8 => out.push(v as i8 as u8),
        INT_16 => out.extend_from_slice(&(v as i16).to_be_bytes()),
        INT_24 => {
            out.push((v >> 16) as u8);
            out.push((v >> 8) as u8);
            out.push(v as u8);
        }
        INT_32 => out.extend_from_slice(&(v as i32).to_be_bytes()),
        INT_64 => out.extend_from_slice(&v.to_be_bytes()),
        _ => {} // immediate: the value lives in the encoding byte
    }
}

/// Strict decimal parse: optional sign, no redundant leading zeros, must
/// fit `i64`. This is the test deciding whether pushed bytes are stored as
/// an integer.
pub(crate) fn parse_i64(s: &[u8]) -> Option<i64> {
    if s.is_empty() || s.len() > 20 {
        return None;
    }
    if s == b"0" {
        return Some(0);
    }
    let (neg, digits) = if s[0] == b'-' {
        (true, &s[1..])
    } else {
        (false, s)
    };
    if digits.is_empty() || !(b'1'..=b'9').contains(&digits[0]) {
        return None;
    }
    let mut v: u64 = 0;
    for &d in digits {
        if !d.is_ascii_digit() {
            return None;
        }
        v = v.checked_mul(10)?.checked_add((d - b'0') as u64)?;
    }
    if neg {
        if v > i64::MAX as u64 + 1 {
            None
        } else {
            Some((v as i128).wrapping_neg() as i64)
        }
    } else if v > i64::MAX as u64 {
        None
    } else {
        Some(v as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Walk the whole structure and assert every structural invariant:
    /// zlbytes, terminator, tail offset, the prevrawlen chain, and
    /// forward/backward traversal agreement.
    fn check(zl: &ZipList) {
        let b = zl.as_bytes();
        assert_eq!(zl.view().zlbytes(), b.len());
        assert_eq!(b[b.len() - 1], ZL_END);

        let mut forward = Vec::new();
        let mut p = HEADER;
        let mut prev_raw = 0;
        let mut last = None;
        while b[p] != ZL_END {
            let e = zl.view().entry_info(p);
            assert_eq!(e.prevlen, prev_raw, "prevrawlen mismatch at {}", p);
            prev_raw = e.raw();
            forward.push(p);
            last = Some(p);
            p += e.raw();
        }
        assert_eq!(zl.view().tail_offset(), last.unwrap_or(HEADER));

        let mut backward = Vec::new();
        let mut p = zl.prev(b.len() - 1);
        while let Some(at) = p {
            backward.push(at);
            p = zl.prev(at);
        }
        backward.reverse();
        assert_eq!(forward, backward);
        if (zl.view().zllen_raw() as usize) < 0xFFFF {
            assert_eq!(forward.len(), zl.len());
        }
    }

    fn values(zl: &ZipList) -> Vec<Value> {
        let mut out = Vec::new();
        let mut p = zl.index(0);
        while let Some(at) = p {
            out.push(zl.get(at).unwrap().to_owned());
            p = zl.next(at);
        }
        out
    }

    #[test]
    fn empty_layout() {
        let zl = ZipList::new();
        assert!(zl.is_empty());
        assert_eq!(zl.len(), 0);
        assert_eq!(hex::encode(zl.as_bytes()), "0b0000000a0000000000ff");
        check(&zl);
    }

    #[test]
    fn push_both_ends() {
        let mut zl = ZipList::new();
        zl.push(b"mid", End::Tail).unwrap();
        zl.push(b"front", End::Head).unwrap();
        zl.push(b"back", End::Tail).unwrap();
        check(&zl);
        assert_eq!(
            values(&zl),
            vec![
                Value::Bytes(b"front".to_vec()),
                Value::Bytes(b"mid".to_vec()),
                Value::Bytes(b"back".to_vec()),
            ]
        );
    }

    #[test]
    fn integer_encodings_and_payload_order() {
        let cases: &[(&[u8], i64)] = &[
            (b"0", 0),
            (b"12", 12),
            (b"13", 13),
            (b"-1", -1),
            (b"127", 127),
            (b"-128", -128),
            (b"32767", 32767),
            (b"8388607", 8_388_607),
            (b"-8388608", -8_388_608),
            (b"2147483647", 2_147_483_647),
            (b"9223372036854775807", i64::MAX),
            (b"-9223372036854775808", i64::MIN),
        ];
        let mut zl = ZipList::new();
        for (s, _) in cases {
            zl.push(s, End::Tail).unwrap();
        }
        check(&zl);
        for (i, (_, v)) in cases.iter().enumerate() {
            let at = zl.index(i as i64).unwrap();
            assert_eq!(zl.get(at), Some(ValueRef::Int(*v)));
        }

        // Spot-check the stored bytes: 13 is int8 (0xFE then the value),
        // 32767 is int16 big-endian.
        let mut one = ZipList::new();
        one.push(b"13", End::Tail).unwrap();
        assert_eq!(&one.as_bytes()[HEADER..], &[0x00, 0xFE, 13, 0xFF]);
        let mut one = ZipList::new();
        one.push(b"32767", End::Tail).unwrap();
        assert_eq!(&one.as_bytes()[HEADER..], &[0x00, 0xC0, 0x7F, 0xFF, 0xFF]);
        let mut one = ZipList::new();
        one.push(b"5", End::Tail).unwrap();
        assert_eq!(&one.as_bytes()[HEADER..], &[0x00, 0xF6, 0xFF]);
    }

    #[test]
    fn non_integers_stay_strings() {
        let inputs: &[&[u8]] = &[
            b"007",
            b"-0",
            b" 1",
            b"1 ",
            b"12a",
            b"",
            b"9223372036854775808",
        ];
        let mut zl = ZipList::new();
        for s in inputs {
            zl.push(s, End::Tail).unwrap();
        }
        check(&zl);
        for (i, s) in inputs.iter().enumerate() {
            let at = zl.index(i as i64).unwrap();
            assert_eq!(zl.get(at), Some(ValueRef::Bytes(s)));
        }
    }

    #[test]
    fn string_length_prefixes_are_big_endian() {
        let mut zl = ZipList::new();
        let s = vec![b'x'; 300];
        zl.push(&s, End::Tail).unwrap();
        // prevlen 0x00, then 0x40 | (300 >> 8), 300 & 0xff.
        assert_eq!(&zl.as_bytes()[HEADER..HEADER + 3], &[0x00, 0x41, 0x2C]);

        let mut zl = ZipList::new();
        let s = vec![b'y'; 20_000];
        zl.push(&s, End::Tail).unwrap();
        let hdr = &zl.as_bytes()[HEADER..HEADER + 6];
        assert_eq!(hdr[0], 0x00);
        assert_eq!(hdr[1], 0x80);
        assert_eq!(&hdr[2..6], &20_000u32.to_be_bytes());
        check(&zl);
    }

    #[test]
    fn insert_and_remove_middle() {
        let mut zl = ZipList::new();
        for s in [&b"a"[..], b"c", b"d"] {
            zl.push(s, End::Tail).unwrap();
        }
        let at = zl.index(1).unwrap();
        zl.insert(at, b"b").unwrap();
        check(&zl);
        assert_eq!(
            values(&zl),
            vec![
                Value::Bytes(b"a".to_vec()),
                Value::Bytes(b"b".to_vec()),
                Value::Bytes(b"c".to_vec()),
                Value::Bytes(b"d".to_vec()),
            ]
        );

        let at = zl.index(1).unwrap();
        let after = zl.remove(at);
        check(&zl);
        assert!(zl.entry_eq(after, b"c"));
        assert_eq!(zl.len(), 3);

        // Push-then-pop-last leaves the buffer unchanged.
        let before = zl.as_bytes().to_vec();
        zl.push(b"tmp", End::Tail).unwrap();
        let at = zl.index(-1).unwrap();
        assert!(zl.entry_eq(at, b"tmp"));
        zl.remove(at);
        assert_eq!(zl.as_bytes(), &before[..]);
    }

    #[test]
    fn remove_range_and_tail_delete() {
        let mut zl = ZipList::new();
        for i in 0..10 {
            zl.push(format!("v{}", i).as_bytes(), End::Tail).unwrap();
        }
        assert_eq!(zl.remove_range(2, 3), 3);
        check(&zl);
        assert_eq!(zl.len(), 7);
        assert!(zl.entry_eq(zl.index(2).unwrap(), b"v5"));

        // Delete through the end, negative start.
        assert_eq!(zl.remove_range(-2, 10), 2);
        check(&zl);
        assert_eq!(zl.len(), 5);
        assert!(zl.entry_eq(zl.index(-1).unwrap(), b"v6"));

        // Delete everything.
        assert_eq!(zl.remove_range(0, 100), 5);
        check(&zl);
        assert!(zl.is_empty());
    }

    #[test]
    fn negative_indexing() {
        let mut zl = ZipList::new();
        for i in 0..5 {
            zl.push(format!("{}", i + 100).as_bytes(), End::Tail).unwrap();
        }
        assert_eq!(zl.get(zl.index(-1).unwrap()), Some(ValueRef::Int(104)));
        assert_eq!(zl.get(zl.index(-5).unwrap()), Some(ValueRef::Int(100)));
        assert!(zl.index(-6).is_none());
        assert!(zl.index(5).is_none());
    }

    #[test]
    fn find_with_skip() {
        let mut zl = ZipList::new();
        for s in [&b"k1"[..], b"1", b"k2", b"2", b"k3", b"3"] {
            zl.push(s, End::Tail).unwrap();
        }
        let start = zl.index(0).unwrap();
        let at = zl.find(start, b"k3", 1).unwrap();
        assert!(zl.entry_eq(at, b"k3"));
        // Searching keys-only positions never sees the values.
        assert!(zl.find(start, b"2", 1).is_none());
        // Integer needle against integer entries.
        let at = zl.find(start, b"3", 0).unwrap();
        assert_eq!(zl.get(at), Some(ValueRef::Int(3)));
        assert!(zl.find(start, b"missing", 0).is_none());
    }

    #[test]
    fn cascade_after_head_insert() {
        // 200 entries of raw size 250 (prevlen 1 + header 2 + payload 247),
        // then a 300-byte entry at the head forces every prevrawlen after
        // it to widen from 1 to 5 bytes.
        let mut zl = ZipList::new();
        let payload = vec![b'e'; 247];
        for _ in 0..200 {
            zl.push(&payload, End::Tail).unwrap();
        }
        check(&zl);
        let before = zl.blob_len();

        let big = vec![b'B'; 297];
        zl.push(&big, End::Head).unwrap();
        check(&zl);
        assert_eq!(zl.len(), 201);
        // New entry is 300 raw bytes; all 200 old entries grew by 4.
        assert_eq!(zl.blob_len(), before + 300 + 200 * 4);
        assert_eq!(zl.get(zl.index(0).unwrap()), Some(ValueRef::Bytes(&big[..])));
        assert_eq!(
            zl.get(zl.index(200).unwrap()),
            Some(ValueRef::Bytes(&payload[..]))
        );
    }

    #[test]
    fn cascade_stops_when_field_already_wide() {
        // A 300-byte entry followed by small ones: the entry after it
        // already has a wide field, so deleting the big one rewrites that
        // field without cascading further.
        let mut zl = ZipList::new();
        zl.push(&vec![b'B'; 297], End::Tail).unwrap();
        zl.push(b"a", End::Tail).unwrap();
        zl.push(b"b", End::Tail).unwrap();
        check(&zl);
        zl.remove(zl.index(0).unwrap());
        check(&zl);
        assert_eq!(zl.len(), 2);
        assert!(zl.entry_eq(zl.index(0).unwrap(), b"a"));
    }

    #[test]
    fn force_large_keeps_wide_field() {
        // Build [X raw 250, A raw 300, B raw 254, C]; C's prevrawlen field
        // is 5 bytes. Deleting A shrinks B below 254, and the cascade
        // re-encodes 250 into C's wide field instead of shrinking it.
        let mut zl = ZipList::new();
        zl.push(&vec![b'x'; 247], End::Tail).unwrap();
        zl.push(&vec![b'a'; 297], End::Tail).unwrap();
        zl.push(&vec![b'b'; 247], End::Tail).unwrap();
        zl.push(b"cc", End::Tail).unwrap();
        assert_eq!(zl.view().entry_info(zl.index(3).unwrap()).prevlen_size, 5);

        zl.remove(zl.index(1).unwrap());
        check(&zl);
        let c = zl.view().entry_info(zl.index(2).unwrap());
        assert_eq!(c.prevlen_size, 5, "cascade does not shrink the field");
        assert_eq!(c.prevlen, 250);

        // Now insert a 2-raw-byte entry in front of C: shrinking C's field
        // would free more than the new entry needs, so the field stays
        // wide and holds the tiny length.
        let at = zl.index(2).unwrap();
        zl.insert(at, b"7").unwrap();
        check(&zl);
        let c = zl.view().entry_info(zl.index(3).unwrap());
        assert_eq!(c.prevlen_size, 5, "field not shrunk");
        assert_eq!(c.prevlen, 2, "immediate-int entry is 2 raw bytes");
        assert_eq!(
            values(&zl),
            vec![
                Value::Bytes(vec![b'x'; 247]),
                Value::Bytes(vec![b'b'; 247]),
                Value::Int(7),
                Value::Bytes(b"cc".to_vec()),
            ]
        );
    }

    #[test]
    fn merge_lists() {
        let mut a = ZipList::new();
        let mut b = ZipList::new();
        for i in 0..4 {
            a.push(format!("a{}", i).as_bytes(), End::Tail).unwrap();
        }
        for i in 0..3 {
            b.push(format!("b{}", i).as_bytes(), End::Tail).unwrap();
        }
        let merged = ZipList::merge(a.clone(), b.clone()).unwrap();
        check(&merged);
        assert_eq!(merged.len(), 7);
        let expect: Vec<Value> = ["a0", "a1", "a2", "a3", "b0", "b1", "b2"]
            .iter()
            .map(|s| Value::Bytes(s.as_bytes().to_vec()))
            .collect();
        assert_eq!(values(&merged), expect);

        // Merge picking the other side as the base.
        let mut big_b = ZipList::new();
        big_b.push(&vec![b'z'; 400], End::Tail).unwrap();
        let merged = ZipList::merge(a, big_b).unwrap();
        check(&merged);
        assert_eq!(merged.len(), 5);
        assert!(merged.entry_eq(merged.index(0).unwrap(), b"a0"));
        assert_eq!(
            merged.get(merged.index(4).unwrap()),
            Some(ValueRef::Bytes(&vec![b'z'; 400][..]))
        );

        // Merging across a big tail exercises the junction's wide field.
        let mut a2 = ZipList::new();
        a2.push(&vec![b'w'; 300], End::Tail).unwrap();
        let mut b2 = ZipList::new();
        b2.push(b"t", End::Tail).unwrap();
        let merged = ZipList::merge(a2, b2).unwrap();
        check(&merged);
        assert_eq!(merged.len(), 2);
        assert!(merged.entry_eq(merged.index(1).unwrap(), b"t"));

        let empty = ZipList::new();
        let mut one = ZipList::new();
        one.push(b"only", End::Tail).unwrap();
        let merged = ZipList::merge(empty, one).unwrap();
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn zllen_saturates_and_len_scans() {
        let mut zl = ZipList::new();
        for _ in 0..70_000 {
            zl.push(b"9", End::Tail).unwrap();
        }
        assert_eq!(zl.view().zllen_raw(), 0xFFFF);
        assert_eq!(zl.len(), 70_000);
        zl.remove_range(0, 10_000);
        assert_eq!(zl.len(), 60_000);
        check(&zl);
    }

    #[test]
    fn from_bytes_round_trip_and_rejection() {
        let mut zl = ZipList::new();
        let long = vec![b'q'; 1000];
        for s in [&b"alpha"[..], b"12345", b"-7", &long[..]] {
            zl.push(s, End::Tail).unwrap();
        }
        let back = ZipList::from_bytes(zl.as_bytes().to_vec()).unwrap();
        assert_eq!(values(&back), values(&zl));

        assert!(ZipList::from_bytes(vec![0; 5]).is_err());
        let mut blob = zl.as_bytes().to_vec();
        blob[0] ^= 1; // zlbytes wrong
        assert!(ZipList::from_bytes(blob).is_err());
        let mut blob = zl.as_bytes().to_vec();
        let n = blob.len();
        blob[n - 1] = 0; // terminator gone
        assert!(ZipList::from_bytes(blob).is_err());
        let mut blob = zl.as_bytes().to_vec();
        blob[HEADER] = 3; // first entry's prevlen must be zero
        assert!(ZipList::from_bytes(blob).is_err());
    }

    #[test]
    fn parse_i64_rules() {
        assert_eq!(parse_i64(b"0"), Some(0));
        assert_eq!(parse_i64(b"-1"), Some(-1));
        assert_eq!(parse_i64(b"9223372036854775807"), Some(i64::MAX));
        assert_eq!(parse_i64(b"-9223372036854775808"), Some(i64::MIN));
        assert_eq!(parse_i64(b"9223372036854775808"), None);
        assert_eq!(parse_i64(b"-9223372036854775809"), None);
        assert_eq!(parse_i64(b"00"), None);
        assert_eq!(parse_i64(b"01"), None);
        assert_eq!(parse_i64(b"-0"), None);
        assert_eq!(parse_i64(b""), None);
        assert_eq!(parse_i64(b"+1"), None);
        assert_eq!(parse_i64(b"1.5"), None);
    }
}
