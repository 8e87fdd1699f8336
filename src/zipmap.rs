//! Packed key→value map optimized for size.
//!
//! A [`ZipMap`] stores a small map of byte-string keys to byte-string
//! values in one contiguous buffer, which is also its wire image:
//!
//! ```text
//! zmlen | klen key vlen free value | ... | 0xFF
//! ```
//!
//! `zmlen` is one byte and saturates at 254, after which the length must be
//! recomputed by scanning. Length prefixes are one byte below 254, else
//! `0xFE` followed by a 32-bit little-endian length. `free` records unused
//! bytes left behind a value by a shrinking update; once it reaches 4 the
//! buffer is compacted. Lookup is a linear scan — the point of this
//! structure is memory, not asymptotics, and N stays small by policy.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};

const BIGLEN: u8 = 254;
const END: u8 = 0xFF;
const VALUE_MAX_FREE: usize = 4;

/// A packed byte-string map with O(N) lookup and minimal footprint.
#[derive(Clone)]
pub struct ZipMap {
    data: Vec<u8>,
}

impl ZipMap {
    /// An empty map: a zero count byte and the terminator.
    pub fn new() -> ZipMap {
        ZipMap {
            data: vec![0, END],
        }
    }

    /// Adopt a wire blob, validating the entry structure end to end.
    pub fn from_bytes(data: Vec<u8>) -> Result<ZipMap> {
        if data.len() < 2 {
            return Err(Error::Encoding("zipmap shorter than its minimal form"));
        }
        let mut p = 1;
        let mut count = 0usize;
        loop {
            let b = *data
                .get(p)
                .ok_or(Error::Encoding("zipmap missing terminator"))?;
            if b == END {
                if p + 1 != data.len() {
                    return Err(Error::Encoding("zipmap bytes after terminator"));
                }
                break;
            }
            let (klen, kbytes) = checked_len(&data, p)?;
            p += kbytes + klen;
            let (vlen, vbytes) = checked_len(&data, p)?;
            let free = *data
                .get(p + vbytes)
                .ok_or(Error::Encoding("zipmap entry truncated"))?
                as usize;
            p += vbytes + 1 + vlen + free;
            if p >= data.len() {
                return Err(Error::Encoding("zipmap entry truncated"));
            }
            count += 1;
        }
        if data[0] < BIGLEN && data[0] as usize != count {
            return Err(Error::Encoding("zipmap count does not match entries"));
        }
        Ok(ZipMap { data })
    }

    /// Map a key to a value, inserting or updating. Returns `true` when an
    /// existing key was updated.
    pub fn set(&mut self, key: &[u8], value: &[u8]) -> Result<bool> {
        let reqlen = required_len(key.len(), value.len());
        match self.lookup(key) {
            None => {
                // Append just before the terminator.
                self.data.try_reserve_exact(reqlen)?;
                let p = self.data.len() - 1;
                let total = self.data.len() + reqlen;
                self.data.resize(total, 0);
                self.data[total - 1] = END;
                self.write_entry(p, key, value, 0);
                if self.data[0] < BIGLEN {
                    self.data[0] += 1;
                }
                Ok(false)
            }
            Some(p) => {
                let mut freelen = self.raw_entry_len(p);
                if freelen < reqlen {
                    // Too small in place: grow and push the tail right.
                    self.data.try_reserve_exact(reqlen - freelen)?;
                    let old_total = self.data.len();
                    self.data.resize(old_total - freelen + reqlen, 0);
                    self.data.copy_within(p + freelen..old_total, p + reqlen);
                    freelen = reqlen;
                }
                let empty = freelen - reqlen;
                let vempty = if empty >= VALUE_MAX_FREE {
                    // Keep free space small: pull the tail left and shrink.
                    let old_total = self.data.len();
                    self.data.copy_within(p + freelen..old_total, p + reqlen);
                    self.data.truncate(old_total - empty);
                    0
                } else {
                    empty
                };
                self.write_entry(p, key, value, vempty as u8);
                Ok(true)
            }
        }
    }

    /// Remove a key. Returns `false` when it was not present.
    pub fn remove(&mut self, key: &[u8]) -> bool {
        let p = match self.lookup(key) {
            Some(p) => p,
            None => return false,
        };
        let freelen = self.raw_entry_len(p);
        let total = self.data.len();
        self.data.copy_within(p + freelen..total, p);
        self.data.truncate(total - freelen);
        if self.data[0] < BIGLEN {
            self.data[0] -= 1;
        }
        true
    }

    /// The value mapped to `key`.
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        let p = self.lookup(key)?;
        let p = p + self.raw_key_len(p);
        let vlen = self.decode_len(p);
        let start = p + len_bytes(vlen) + 1;
        Some(&self.data[start..start + vlen])
    }

    /// Membership test.
    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.lookup(key).is_some()
    }

    /// Iterate over `(key, value)` pairs in insertion order.
    pub fn iter(&self) -> Iter<'_> {
        Iter { zm: self, p: 1 }
    }

    /// Number of entries. After the stored count saturates at 254 this
    /// scans, and writes the exact count back once it has dropped below the
    /// ceiling again.
    pub fn len(&mut self) -> usize {
        if self.data[0] < BIGLEN {
            return self.data[0] as usize;
        }
        let n = self.iter().count();
        if n < BIGLEN as usize {
            self.data[0] = n as u8;
        }
        n
    }

    /// True when the map has no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data[1] == END
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

    /// Offset of the entry holding `key`, by linear scan.
    fn lookup(&self, key: &[u8]) -> Option<usize> {
        let mut p = 1;
        while self.data[p] != END {
            let klen = self.decode_len(p);
            let kbytes = len_bytes(klen);
            if klen == key.len() && self.data[p + kbytes..p + kbytes + klen] == *key {
                return Some(p);
            }
            p += kbytes + klen;
            p += self.raw_value_len(p);
        }
        None
    }

    fn decode_len(&self, p: usize) -> usize {
        let b = self.data[p];
        if b < BIGLEN {
            b as usize
        } else {
            LittleEndian::read_u32(&self.data[p + 1..p + 5]) as usize
        }
    }

    fn raw_key_len(&self, p: usize) -> usize {
        let klen = self.decode_len(p);
        len_bytes(klen) + klen
    }

    /// Bytes used by a value: length prefix, free byte, payload, free space.
    fn raw_value_len(&self, p: usize) -> usize {
        let vlen = self.decode_len(p);
        let used = len_bytes(vlen);
        used + 1 + self.data[p + used] as usize + vlen
    }

    fn raw_entry_len(&self, p: usize) -> usize {
        let klen = self.raw_key_len(p);
        klen + self.raw_value_len(p + klen)
    }

    fn write_len(&mut self, p: usize, len: usize) -> usize {
        if len < BIGLEN as usize {
            self.data[p] = len as u8;
            1
        } else {
            self.data[p] = BIGLEN;
            LittleEndian::write_u32(&mut self.data[p + 1..p + 5], len as u32);
            5
        }
    }

    fn write_entry(&mut self, mut p: usize, key: &[u8], value: &[u8], free: u8) {
        p += self.write_len(p, key.len());
        self.data[p..p + key.len()].copy_from_slice(key);
        p += key.len();
        p += self.write_len(p, value.len());
        self.data[p] = free;
        p += 1;
        self.data[p..p + value.len()].copy_from_slice(value);
    }
}

fn len_bytes(len: usize) -> usize {
    if len < BIGLEN as usize {
        1
    } else {
        5
    }
}

/// Bytes needed by a fresh entry: both payloads, two length prefixes, and
/// the free byte.
fn required_len(klen: usize, vlen: usize) -> usize {
    klen + vlen + 3 + if klen >= BIGLEN as usize { 4 } else { 0 }
        + if vlen >= BIGLEN as usize { 4 } else { 0 }
}

fn checked_len(data: &[u8], p: usize) -> Result<(usize, usize)> {
    let b = *data.get(p).ok_or(Error::Encoding("zipmap length truncated"))?;
    if b < BIGLEN {
        Ok((b as usize, 1))
    } else {
        let raw = data
            .get(p + 1..p + 5)
            .ok_or(Error::Encoding("zipmap length truncated"))?;
        Ok((LittleEndian::read_u32(raw) as usize, 5))
    }
}

impl Default for ZipMap {
    fn default() -> Self {
        ZipMap::new()
    }
}

impl std::fmt::Debug for ZipMap {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let mut map = f.debug_map();
        for (k, v) in self.iter() {
            map.entry(&String::from_utf8_lossy(k), &String::from_utf8_lossy(v));
        }
        map.finish()
    }
}

/// Borrowing iterator over `(key, value)` pairs.
pub struct Iter<'a> {
    zm: &'a ZipMap,
    p: usize,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (&'a [u8], &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let zm = self.zm;
        if zm.data[self.p] == END {
            return None;
        }
        let klen = zm.decode_len(self.p);
        let kstart = self.p + len_bytes(klen);
        let key = &zm.data[kstart..kstart + klen];
        let vp = kstart + klen;
        let vlen = zm.decode_len(vp);
        let vstart = vp + len_bytes(vlen) + 1;
        let value = &zm.data[vstart..vstart + vlen];
        self.p = vp + zm.raw_value_len(vp);
        Some((key, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn free_of(zm: &ZipMap, key: &[u8]) -> usize {
        let p = zm.lookup(key).unwrap();
        let p = p + zm.raw_key_len(p);
        let vlen = zm.decode_len(p);
        zm.data[p + len_bytes(vlen)] as usize
    }

    #[test]
    fn compact_wire_image() {
        let mut zm = ZipMap::new();
        zm.set(b"foo", b"bar").unwrap();
        zm.set(b"hello", b"world").unwrap();
        assert_eq!(
            zm.as_bytes(),
            b"\x02\x03foo\x03\x00bar\x05hello\x05\x00world\xff"
        );
        assert_eq!(zm.blob_len(), zm.as_bytes().len());
    }

    #[test]
    fn set_get_update() {
        let mut zm = ZipMap::new();
        assert!(!zm.set(b"name", b"foo").unwrap());
        assert!(!zm.set(b"surname", b"bar").unwrap());
        assert!(zm.set(b"name", b"baz").unwrap());
        assert_eq!(zm.get(b"name"), Some(&b"baz"[..]));
        assert_eq!(zm.get(b"surname"), Some(&b"bar"[..]));
        assert_eq!(zm.get(b"missing"), None);
        assert!(zm.contains_key(b"surname"));
        assert_eq!(zm.len(), 2);
    }

    #[test]
    fn shrinking_updates_accrue_free_then_compact() {
        let mut zm = ZipMap::new();
        zm.set(b"foo", b"bar").unwrap();
        let size = zm.blob_len();

        zm.set(b"foo", b"hi").unwrap();
        assert_eq!(free_of(&zm, b"foo"), 1);
        assert_eq!(zm.blob_len(), size, "one free byte, no realloc");

        zm.set(b"foo", b"a").unwrap();
        assert_eq!(free_of(&zm, b"foo"), 2);
        assert_eq!(zm.blob_len(), size);

        zm.set(b"foo", b"longerthanbefore_________________").unwrap();
        assert!(free_of(&zm, b"foo") < 4);
        assert!(zm.blob_len() > size);
        assert_eq!(zm.get(b"foo"), Some(&b"longerthanbefore_________________"[..]));
    }

    #[test]
    fn free_reaching_four_compacts() {
        let mut zm = ZipMap::new();
        zm.set(b"k", b"12345678").unwrap();
        zm.set(b"tail", b"x").unwrap();
        let size = zm.blob_len();
        zm.set(b"k", b"1234").unwrap();
        // free would be 4: compacted instead.
        assert_eq!(free_of(&zm, b"k"), 0);
        assert_eq!(zm.blob_len(), size - 4);
        assert_eq!(zm.get(b"tail"), Some(&b"x"[..]));
    }

    #[test]
    fn remove_and_iterate() {
        let mut zm = ZipMap::new();
        zm.set(b"a", b"1").unwrap();
        zm.set(b"b", b"2").unwrap();
        zm.set(b"c", b"3").unwrap();
        assert!(zm.remove(b"b"));
        assert!(!zm.remove(b"b"));
        let pairs: Vec<(Vec<u8>, Vec<u8>)> = zm
            .iter()
            .map(|(k, v)| (k.to_vec(), v.to_vec()))
            .collect();
        assert_eq!(
            pairs,
            vec![(b"a".to_vec(), b"1".to_vec()), (b"c".to_vec(), b"3".to_vec())]
        );
        // Everything reported by iteration is reachable through get.
        for (k, v) in zm.iter() {
            assert_eq!(zm.get(k), Some(v));
        }
        assert_eq!(zm.len(), 2);
    }

    #[test]
    fn long_keys_and_values() {
        let key = vec![b'k'; 400];
        let val = vec![b'v'; 300];
        let mut zm = ZipMap::new();
        zm.set(&key, &val).unwrap();
        zm.set(b"short", b"s").unwrap();
        assert_eq!(zm.get(&key), Some(&val[..]));
        assert_eq!(zm.get(b"short"), Some(&b"s"[..]));
        let back = ZipMap::from_bytes(zm.as_bytes().to_vec()).unwrap();
        assert_eq!(back.get(&key), Some(&val[..]));
    }

    #[test]
    fn saturated_count_recomputes_and_writes_back() {
        let mut zm = ZipMap::new();
        for i in 0..300u32 {
            zm.set(format!("k{}", i).as_bytes(), b"v").unwrap();
        }
        assert_eq!(zm.as_bytes()[0], BIGLEN, "count saturates");
        assert_eq!(zm.len(), 300, "saturated count forces a scan");
        for i in 0..60u32 {
            assert!(zm.remove(format!("k{}", i).as_bytes()));
        }
        assert_eq!(zm.as_bytes()[0], BIGLEN, "deletes do not touch a saturated count");
        assert_eq!(zm.len(), 240);
        assert_eq!(zm.as_bytes()[0], 240, "exact count written back");
    }

    #[test]
    fn from_bytes_rejects_corruption() {
        assert!(ZipMap::from_bytes(vec![0]).is_err());
        assert!(ZipMap::from_bytes(vec![0, 0x01]).is_err()); // no terminator
        let mut zm = ZipMap::new();
        zm.set(b"a", b"b").unwrap();
        let mut blob = zm.as_bytes().to_vec();
        blob.pop(); // drop terminator
        assert!(ZipMap::from_bytes(blob).is_err());
        let mut blob = zm.as_bytes().to_vec();
        blob[0] = 7; // wrong count
        assert!(ZipMap::from_bytes(blob).is_err());
    }
}
