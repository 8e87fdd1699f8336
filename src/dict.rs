//! Chained hash map with incremental, two-table rehashing.
//!
//! A [`Dict`] holds two power-of-two-sized tables. All entries normally
//! live in table 0; when the load factor reaches 1 the next size is
//! allocated as table 1 and `rehashidx` starts walking table 0's buckets.
//! Every mutating operation then migrates one bucket (bounded by ten empty
//! buckets scanned), so no single call ever pays for a full resize —
//! the point of the scheme is O(1) worst-case work per operation, not just
//! amortized. While any iterator is live the migration pauses, keeping
//! chains stable under a walk. Lookups consult both tables; inserts go to
//! the new table so the old one only ever shrinks.
//!
//! Key behavior is supplied by a [`DictType`]: the hash and the equality
//! predicate. Ownership of keys and values rides on Rust's usual `Clone` /
//! `Drop` rather than duplicate/destructor callbacks.
//!
//! Entry chains are singly linked heap nodes manipulated through raw
//! pointers, LIFO at the head. The pointers never escape this module;
//! every public return is a borrow tied to the dictionary.

use std::marker::PhantomData;
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use rand::Rng;
use tracing::trace;

use crate::error::{Error, Result};
use crate::hash;

const INITIAL_SIZE: usize = 4;
const FORCE_RESIZE_RATIO: usize = 5;
const EMPTY_VISITS_PER_STEP: usize = 10;

static RESIZE_ENABLED: AtomicBool = AtomicBool::new(true);

/// Allow or forbid automatic table growth process-wide. Even while
/// forbidden, a table whose load ratio exceeds 5:1 is still expanded.
pub fn set_resize_enabled(enabled: bool) {
    RESIZE_ENABLED.store(enabled, Ordering::Relaxed);
}

/// Whether automatic table growth is currently allowed.
pub fn resize_enabled() -> bool {
    RESIZE_ENABLED.load(Ordering::Relaxed)
}

/// Pluggable key behavior: how keys hash and compare.
pub trait DictType<K> {
    fn hash(&self, key: &K) -> u32;
    fn key_eq(&self, a: &K, b: &K) -> bool;
}

/// Byte-string keys under the process-seeded hash.
#[derive(Clone, Copy, Debug, Default)]
pub struct BytesType;

impl DictType<Vec<u8>> for BytesType {
    fn hash(&self, key: &Vec<u8>) -> u32 {
        hash::bytes_hash(key)
    }
    fn key_eq(&self, a: &Vec<u8>, b: &Vec<u8>) -> bool {
        a == b
    }
}

/// Byte-string keys compared and hashed with ASCII case folded away.
#[derive(Clone, Copy, Debug, Default)]
pub struct CaseFoldType;

impl DictType<Vec<u8>> for CaseFoldType {
    fn hash(&self, key: &Vec<u8>) -> u32 {
        hash::bytes_hash_nocase(key)
    }
    fn key_eq(&self, a: &Vec<u8>, b: &Vec<u8>) -> bool {
        a.eq_ignore_ascii_case(b)
    }
}

/// A dictionary over byte-string keys with the default hash.
pub type BytesDict<V> = Dict<Vec<u8>, V, BytesType>;

struct Entry<K, V> {
    key: K,
    val: V,
    next: *mut Entry<K, V>,
}

struct Table<K, V> {
    buckets: Vec<*mut Entry<K, V>>,
    used: usize,
}

impl<K, V> Table<K, V> {
    fn empty() -> Self {
        Table {
            buckets: Vec::new(),
            used: 0,
        }
    }

    #[inline]
    fn size(&self) -> usize {
        self.buckets.len()
    }

    #[inline]
    fn mask(&self) -> usize {
        self.buckets.len() - 1
    }
}

/// The hash map. See the module docs for the rehashing scheme.
pub struct Dict<K, V, T: DictType<K>> {
    typ: T,
    ht: [Table<K, V>; 2],
    /// −1 when not rehashing, else the next table-0 bucket to migrate.
    rehashidx: isize,
    /// Live safe iterators; while nonzero no rehash step runs.
    iterators: usize,
    marker: PhantomData<Box<Entry<K, V>>>,
}

impl<K, V, T: DictType<K>> Dict<K, V, T> {
    /// A dictionary with explicit key behavior.
    pub fn with_type(typ: T) -> Self {
        Dict {
            typ,
            ht: [Table::empty(), Table::empty()],
            rehashidx: -1,
            iterators: 0,
            marker: PhantomData,
        }
    }

    /// A dictionary with the type's default key behavior.
    pub fn new() -> Self
    where
        T: Default,
    {
        Self::with_type(T::default())
    }

    /// Number of entries across both tables.
    #[inline]
    pub fn len(&self) -> usize {
        self.ht[0].used + self.ht[1].used
    }

    /// True when no entries are stored.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of buckets across both tables.
    #[inline]
    pub fn slots(&self) -> usize {
        self.ht[0].size() + self.ht[1].size()
    }

    /// True while an incremental rehash is in progress.
    #[inline]
    pub fn is_rehashing(&self) -> bool {
        self.rehashidx != -1
    }

    /// Insert a new key. Fails with [`Error::KeyExists`] on a duplicate.
    pub fn insert(&mut self, key: K, val: V) -> Result<()> {
        if self.is_rehashing() {
            self.rehash_step();
        }
        self.insert_new(key, val)
    }

    /// Insert or overwrite. Returns `true` when the key was newly inserted.
    pub fn replace(&mut self, key: K, val: V) -> Result<bool> {
        if self.is_rehashing() {
            self.rehash_step();
        }
        if let Some(e) = self.find_ptr(&key) {
            // SAFETY: the entry is owned by this dict and outlives the call;
            // writing the value cannot move the entry.
            unsafe {
                (*e).val = val;
            }
            return Ok(false);
        }
        self.insert_new(key, val)?;
        Ok(true)
    }

    /// Borrow the value for `key`.
    pub fn get(&self, key: &K) -> Option<&V> {
        // SAFETY: entries live until removed, and removal needs `&mut self`.
        self.find_ptr(key).map(|e| unsafe { &(*e).val })
    }

    /// Borrow the stored key and value for `key`.
    pub fn get_key_value(&self, key: &K) -> Option<(&K, &V)> {
        self.find_ptr(key).map(|e| unsafe {
            let e = &*e;
            (&e.key, &e.val)
        })
    }

    /// Mutably borrow the value for `key`.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        if self.is_rehashing() {
            self.rehash_step();
        }
        // SAFETY: exclusive access; the entry stays put while borrowed.
        self.find_ptr(key).map(|e| unsafe { &mut (*e).val })
    }

    /// Membership test.
    pub fn contains_key(&self, key: &K) -> bool {
        self.find_ptr(key).is_some()
    }

    /// Remove `key`, returning the owned pair so the caller decides whether
    /// to keep or drop the value.
    pub fn remove(&mut self, key: &K) -> Option<(K, V)> {
        if self.ht[0].size() == 0 {
            return None;
        }
        if self.is_rehashing() {
            self.rehash_step();
        }
        let h = self.typ.hash(key) as usize;
        for t in 0..2 {
            let idx = h & self.ht[t].mask();
            // SAFETY: the link cursor and entry pointers all belong to this
            // dict's chains; unlinking re-establishes a well-formed chain
            // before the entry box is reclaimed.
            unsafe {
                let mut link: *mut *mut Entry<K, V> = &mut self.ht[t].buckets[idx];
                while !(*link).is_null() {
                    let e = *link;
                    if self.typ.key_eq(&(*e).key, key) {
                        *link = (*e).next;
                        self.ht[t].used -= 1;
                        let boxed = Box::from_raw(e);
                        return Some((boxed.key, boxed.val));
                    }
                    link = &mut (*e).next;
                }
            }
            if !self.is_rehashing() {
                break;
            }
        }
        None
    }

    /// Grow (or initially size) the table to hold `size` entries, rounded
    /// up to a power of two. Starts an incremental rehash when entries
    /// already exist. Fails while a rehash is running or when `size` is
    /// below the current population.
    pub fn expand(&mut self, size: usize) -> Result<()> {
        if self.is_rehashing() || self.ht[0].used > size {
            return Err(Error::ResizeForbidden);
        }
        let realsize = next_power(size);
        if realsize == self.ht[0].size() {
            return Err(Error::ResizeForbidden);
        }
        let mut buckets: Vec<*mut Entry<K, V>> = Vec::new();
        buckets.try_reserve_exact(realsize)?;
        buckets.resize(realsize, ptr::null_mut());
        let table = Table { buckets, used: 0 };
        if self.ht[0].size() == 0 {
            self.ht[0] = table;
        } else {
            trace!(from = self.ht[0].size(), to = realsize, "dict expand, rehash begins");
            self.ht[1] = table;
            self.rehashidx = 0;
        }
        Ok(())
    }

    /// Shrink to the smallest power of two holding the current entries
    /// (never below the initial size). Fails while rehashing or while
    /// resizing is disabled.
    pub fn shrink_to_fit(&mut self) -> Result<()> {
        if !resize_enabled() || self.is_rehashing() {
            return Err(Error::ResizeForbidden);
        }
        let minimal = self.ht[0].used.max(INITIAL_SIZE);
        self.expand(minimal)
    }

    /// Run up to `n` bucket migrations. Returns `true` while more remain.
    ///
    /// Each migration step first skips up to ten empty buckets; hitting
    /// that bound ends the call early so a sparse table cannot stall one
    /// operation.
    pub fn rehash(&mut self, n: usize) -> bool {
        if !self.is_rehashing() {
            return false;
        }
        let mut empty_visits = n * EMPTY_VISITS_PER_STEP;
        for _ in 0..n {
            if self.ht[0].used == 0 {
                break;
            }
            debug_assert!((self.rehashidx as usize) < self.ht[0].size());
            while self.ht[0].buckets[self.rehashidx as usize].is_null() {
                self.rehashidx += 1;
                empty_visits -= 1;
                if empty_visits == 0 {
                    return true;
                }
            }
            let idx = self.rehashidx as usize;
            let mut de = self.ht[0].buckets[idx];
            self.ht[0].buckets[idx] = ptr::null_mut();
            // SAFETY: entries are relinked, never freed, so every pointer
            // stays valid; each entry lands in exactly one new chain.
            while !de.is_null() {
                unsafe {
                    let next = (*de).next;
                    let h = self.typ.hash(&(*de).key) as usize & self.ht[1].mask();
                    (*de).next = self.ht[1].buckets[h];
                    self.ht[1].buckets[h] = de;
                    self.ht[0].used -= 1;
                    self.ht[1].used += 1;
                    de = next;
                }
            }
            self.rehashidx += 1;
        }
        if self.ht[0].used == 0 {
            self.ht[0] = mem::replace(&mut self.ht[1], Table::empty());
            self.rehashidx = -1;
            trace!(slots = self.ht[0].size(), "incremental rehash complete");
            return false;
        }
        true
    }

    /// Rehash in 100-step batches until `ms` milliseconds have elapsed or
    /// the migration completes. Returns the number of steps run.
    pub fn rehash_for_ms(&mut self, ms: u64) -> usize {
        let start = Instant::now();
        let mut steps = 0;
        while self.rehash(100) {
            steps += 100;
            if start.elapsed().as_millis() as u64 > ms {
                break;
            }
        }
        steps
    }

    /// Drop every entry, keeping the configured key behavior. `progress`
    /// is invoked with the bucket index every 65 536 buckets, so hosts can
    /// interleave work while emptying a huge table.
    pub fn clear_with<F: FnMut(usize)>(&mut self, mut progress: F) {
        for t in 0..2 {
            let table = mem::replace(&mut self.ht[t], Table::empty());
            for (i, &head) in table.buckets.iter().enumerate() {
                if i & 65535 == 0 {
                    progress(i);
                }
                let mut de = head;
                // SAFETY: each entry box was created by insert and is
                // reclaimed exactly once here.
                while !de.is_null() {
                    unsafe {
                        let boxed = Box::from_raw(de);
                        de = boxed.next;
                    }
                }
            }
        }
        self.rehashidx = -1;
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.clear_with(|_| {});
    }

    /// A uniformly-random-ish entry: a random non-empty bucket (buckets
    /// already migrated out of table 0 are skipped), then a random chain
    /// position. Fair enough for sampling, not statistically uniform.
    pub fn random_entry(&self, rng: &mut impl Rng) -> Option<(&K, &V)> {
        if self.is_empty() {
            return None;
        }
        let mut he;
        if self.is_rehashing() {
            let ri = self.rehashidx as usize;
            loop {
                let h = ri + rng.gen_range(0..self.slots() - ri);
                he = if h >= self.ht[0].size() {
                    self.ht[1].buckets[h - self.ht[0].size()]
                } else {
                    self.ht[0].buckets[h]
                };
                if !he.is_null() {
                    break;
                }
            }
        } else {
            loop {
                he = self.ht[0].buckets[rng.gen_range(0..self.ht[0].size()) & self.ht[0].mask()];
                if !he.is_null() {
                    break;
                }
            }
        }
        // SAFETY: chain pointers are valid while the dict is borrowed.
        unsafe {
            let mut listlen = 0;
            let mut p = he;
            while !p.is_null() {
                listlen += 1;
                p = (*p).next;
            }
            let mut p = he;
            for _ in 0..rng.gen_range(0..listlen) {
                p = (*p).next;
            }
            let e = &*p;
            Some((&e.key, &e.val))
        }
    }

    /// Sample up to `count` entries by walking contiguous buckets from a
    /// random start, bounded by `count * 10` bucket steps. May return
    /// fewer entries than asked, and is not uniform — it trades that for
    /// speed.
    pub fn sample_entries(&self, rng: &mut impl Rng, count: usize) -> Vec<(&K, &V)> {
        let count = count.min(self.len());
        let mut out = Vec::with_capacity(count);
        if count == 0 {
            return out;
        }
        let tables = if self.is_rehashing() { 2 } else { 1 };
        let maxsizemask = if tables == 2 && self.ht[1].size() > self.ht[0].size() {
            self.ht[1].mask()
        } else {
            self.ht[0].mask()
        };
        let mut maxsteps = count * 10;
        let mut i = rng.gen_range(0..=maxsizemask);
        let mut emptylen = 0usize;
        while out.len() < count && maxsteps > 0 {
            maxsteps -= 1;
            for j in 0..tables {
                if tables == 2 && j == 0 && i < self.rehashidx as usize {
                    // Every bucket below rehashidx already migrated; jump
                    // ahead unless table 1 still covers this index.
                    if i >= self.ht[1].size() {
                        i = self.rehashidx as usize;
                    }
                    continue;
                }
                if i >= self.ht[j].size() {
                    continue;
                }
                let mut he = self.ht[j].buckets[i];
                if he.is_null() {
                    emptylen += 1;
                    if emptylen >= 5 && emptylen > count {
                        i = rng.gen_range(0..=maxsizemask);
                        emptylen = 0;
                    }
                } else {
                    emptylen = 0;
                    // SAFETY: as in `random_entry`.
                    while !he.is_null() {
                        let e = unsafe { &*he };
                        out.push((&e.key, &e.val));
                        if out.len() == count {
                            return out;
                        }
                        he = e.next;
                    }
                }
            }
            i = (i + 1) & maxsizemask;
        }
        out
    }

    /// One step of a full-table walk that stays correct across resizes.
    ///
    /// Call with cursor 0, feed each returned cursor back in, stop when 0
    /// comes back. Every entry present for the whole cycle is visited at
    /// least once; entries added or removed mid-cycle may be seen any
    /// number of times. The cursor advances by reverse-binary increment,
    /// which is what makes it stable when the table size changes between
    /// calls.
    pub fn scan<F: FnMut(&K, &V)>(&self, cursor: u64, mut f: F) -> u64 {
        if self.is_empty() {
            return 0;
        }
        let mut v = cursor;
        let emit_chain = |mut de: *mut Entry<K, V>, f: &mut F| {
            // SAFETY: chain pointers valid for the duration of the borrow.
            while !de.is_null() {
                let e = unsafe { &*de };
                f(&e.key, &e.val);
                de = e.next;
            }
        };
        if !self.is_rehashing() {
            let m0 = self.ht[0].mask() as u64;
            emit_chain(self.ht[0].buckets[(v & m0) as usize], &mut f);
            v |= !m0;
            v = v.reverse_bits().wrapping_add(1).reverse_bits();
        } else {
            // Walk the smaller table's bucket, then every bucket of the
            // larger table that maps onto it.
            let (t0, t1) = if self.ht[0].size() > self.ht[1].size() {
                (1, 0)
            } else {
                (0, 1)
            };
            let m0 = self.ht[t0].mask() as u64;
            let m1 = self.ht[t1].mask() as u64;
            emit_chain(self.ht[t0].buckets[(v & m0) as usize], &mut f);
            loop {
                emit_chain(self.ht[t1].buckets[(v & m1) as usize], &mut f);
                v |= !m1;
                v = v.reverse_bits().wrapping_add(1).reverse_bits();
                if v & (m0 ^ m1) == 0 {
                    break;
                }
            }
        }
        v
    }

    /// A read-only iterator. No mutation may happen while it lives (the
    /// borrow checker enforces what the original asked callers to promise);
    /// the state fingerprint is still taken and re-checked on drop as a
    /// cheap corruption tripwire in debug builds.
    pub fn iter(&self) -> Iter<'_, K, V, T> {
        Iter {
            d: self,
            table: 0,
            index: -1,
            entry: ptr::null_mut(),
            fingerprint: self.fingerprint(),
        }
    }

    /// An iterator that tolerates mutation through its own methods:
    /// [`SafeIter::insert`], [`SafeIter::remove`], and
    /// [`SafeIter::remove_current`]. While it lives, rehash steps are
    /// suppressed so chains stay stable; entries present at both creation
    /// and drop are yielded exactly once, entries inserted mid-walk may or
    /// may not appear.
    pub fn safe_iter(&mut self) -> SafeIter<'_, K, V, T> {
        self.iterators += 1;
        SafeIter {
            table: 0,
            index: -1,
            cur: ptr::null_mut(),
            next_to_yield: ptr::null_mut(),
            d: self,
        }
    }

    /// Mix of the six state words (both tables' storage pointer, size, and
    /// population). Different table states produce different values with
    /// high probability; equality is the "nothing changed" check.
    pub fn fingerprint(&self) -> u64 {
        let words = [
            self.ht[0].buckets.as_ptr() as u64,
            self.ht[0].size() as u64,
            self.ht[0].used as u64,
            self.ht[1].buckets.as_ptr() as u64,
            self.ht[1].size() as u64,
            self.ht[1].used as u64,
        ];
        let mut h: u64 = 0;
        for w in words {
            h = h.wrapping_add(w);
            h = (!h).wrapping_add(h << 21);
            h ^= h >> 24;
            h = h.wrapping_add(h << 3).wrapping_add(h << 8);
            h ^= h >> 14;
            h = h.wrapping_add(h << 2).wrapping_add(h << 4);
            h ^= h >> 28;
            h = h.wrapping_add(h << 31);
        }
        h
    }

    fn rehash_step(&mut self) {
        if self.iterators == 0 {
            self.rehash(1);
        }
    }

    fn insert_new(&mut self, key: K, val: V) -> Result<()> {
        let idx = match self.bucket_for(&key)? {
            Some(idx) => idx,
            None => return Err(Error::KeyExists),
        };
        let t = usize::from(self.is_rehashing());
        let entry = Box::into_raw(Box::new(Entry {
            key,
            val,
            next: self.ht[t].buckets[idx],
        }));
        self.ht[t].buckets[idx] = entry;
        self.ht[t].used += 1;
        Ok(())
    }

    /// Bucket index a new key would go to (in table 1 during rehash), or
    /// `None` when the key is already present. Triggers expansion.
    fn bucket_for(&mut self, key: &K) -> Result<Option<usize>> {
        self.expand_if_needed()?;
        let h = self.typ.hash(key) as usize;
        let mut idx = 0;
        for t in 0..2 {
            idx = h & self.ht[t].mask();
            let mut he = self.ht[t].buckets[idx];
            // SAFETY: chain walk over entries owned by this dict.
            while !he.is_null() {
                unsafe {
                    if self.typ.key_eq(&(*he).key, key) {
                        return Ok(None);
                    }
                    he = (*he).next;
                }
            }
            if !self.is_rehashing() {
                break;
            }
        }
        Ok(Some(idx))
    }

    fn expand_if_needed(&mut self) -> Result<()> {
        if self.is_rehashing() {
            return Ok(());
        }
        if self.ht[0].size() == 0 {
            return self.expand(INITIAL_SIZE);
        }
        if self.ht[0].used >= self.ht[0].size()
            && (resize_enabled() || self.ht[0].used / self.ht[0].size() > FORCE_RESIZE_RATIO)
        {
            return self.expand(self.ht[0].used * 2);
        }
        Ok(())
    }

    fn find_ptr(&self, key: &K) -> Option<*mut Entry<K, V>> {
        if self.ht[0].size() == 0 {
            return None;
        }
        let h = self.typ.hash(key) as usize;
        for t in 0..2 {
            let idx = h & self.ht[t].mask();
            let mut he = self.ht[t].buckets[idx];
            // SAFETY: chain walk over entries owned by this dict.
            while !he.is_null() {
                unsafe {
                    if self.typ.key_eq(&(*he).key, key) {
                        return Some(he);
                    }
                    he = (*he).next;
                }
            }
            if !self.is_rehashing() {
                break;
            }
        }
        None
    }

    /// Unlink a specific entry from a known bucket.
    ///
    /// # Safety
    /// `target` must be a live entry currently linked in `self.ht[table]`
    /// bucket `index`.
    unsafe fn unlink_entry(
        &mut self,
        table: usize,
        index: usize,
        target: *mut Entry<K, V>,
    ) -> Option<(K, V)> {
        let mut link: *mut *mut Entry<K, V> = &mut self.ht[table].buckets[index];
        while !(*link).is_null() {
            let e = *link;
            if e == target {
                *link = (*e).next;
                self.ht[table].used -= 1;
                let boxed = Box::from_raw(e);
                return Some((boxed.key, boxed.val));
            }
            link = &mut (*e).next;
        }
        None
    }
}

impl<K, V, T: DictType<K> + Default> Default for Dict<K, V, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, T: DictType<K>> Drop for Dict<K, V, T> {
    fn drop(&mut self) {
        self.clear();
    }
}

fn next_power(size: usize) -> usize {
    let size = size.min(usize::MAX / 2);
    let mut i = INITIAL_SIZE;
    while i < size {
        i <<= 1;
    }
    i
}

/// Read-only iterator; see [`Dict::iter`].
pub struct Iter<'a, K, V, T: DictType<K>> {
    d: &'a Dict<K, V, T>,
    table: usize,
    index: isize,
    entry: *mut Entry<K, V>,
    fingerprint: u64,
}

impl<'a, K, V, T: DictType<K>> Iterator for Iter<'a, K, V, T> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.entry.is_null() {
                loop {
                    self.index += 1;
                    if (self.index as usize) < self.d.ht[self.table].size() {
                        break;
                    }
                    if self.d.is_rehashing() && self.table == 0 {
                        self.table = 1;
                        self.index = -1;
                        continue;
                    }
                    return None;
                }
                self.entry = self.d.ht[self.table].buckets[self.index as usize];
            } else {
                // SAFETY: the shared borrow on the dict pins every entry.
                self.entry = unsafe { (*self.entry).next };
            }
            if !self.entry.is_null() {
                let e = unsafe { &*self.entry };
                return Some((&e.key, &e.val));
            }
        }
    }
}

impl<K, V, T: DictType<K>> Drop for Iter<'_, K, V, T> {
    fn drop(&mut self) {
        debug_assert_eq!(
            self.fingerprint,
            self.d.fingerprint(),
            "dict mutated under a read-only iterator"
        );
    }
}

/// Mutation-tolerant iterator; see [`Dict::safe_iter`].
///
/// Captures the current and next entry on each step, so removing the
/// current entry never breaks the walk.
pub struct SafeIter<'a, K, V, T: DictType<K>> {
    d: &'a mut Dict<K, V, T>,
    table: usize,
    index: isize,
    /// Last yielded entry; null once removed or before the first step.
    cur: *mut Entry<K, V>,
    /// Entry the next step will yield; captured eagerly.
    next_to_yield: *mut Entry<K, V>,
}

impl<K, V, T: DictType<K>> SafeIter<'_, K, V, T> {
    /// Advance and borrow the next entry.
    #[allow(clippy::should_implement_trait)] // lends borrows of self, not 'a
    pub fn next(&mut self) -> Option<(&K, &V)> {
        while self.next_to_yield.is_null() {
            self.index += 1;
            if (self.index as usize) >= self.d.ht[self.table].size() {
                if self.d.is_rehashing() && self.table == 0 {
                    self.table = 1;
                    self.index = -1;
                    continue;
                }
                self.cur = ptr::null_mut();
                return None;
            }
            self.next_to_yield = self.d.ht[self.table].buckets[self.index as usize];
        }
        let e = self.next_to_yield;
        self.cur = e;
        // SAFETY: rehash is suppressed and every mutation path below keeps
        // the captured pointers either valid or nulled.
        unsafe {
            self.next_to_yield = (*e).next;
            let e = &*e;
            Some((&e.key, &e.val))
        }
    }

    /// Remove the entry most recently yielded by [`next`](SafeIter::next).
    pub fn remove_current(&mut self) -> Option<(K, V)> {
        if self.cur.is_null() {
            return None;
        }
        let target = self.cur;
        self.cur = ptr::null_mut();
        // SAFETY: `cur` was yielded from this bucket, no rehash has run
        // since (suppressed), and inserts only prepend — it is still
        // linked exactly there. The captured next entry is unaffected.
        unsafe { self.d.unlink_entry(self.table, self.index as usize, target) }
    }

    /// Remove an arbitrary key during the walk.
    pub fn remove(&mut self, key: &K) -> Option<(K, V)> {
        // Shield the captured pointers before the entry disappears.
        unsafe {
            if !self.next_to_yield.is_null() && self.d.typ.key_eq(&(*self.next_to_yield).key, key)
            {
                self.next_to_yield = (*self.next_to_yield).next;
            }
            if !self.cur.is_null() && self.d.typ.key_eq(&(*self.cur).key, key) {
                self.cur = ptr::null_mut();
            }
        }
        self.d.remove(key)
    }

    /// Insert during the walk. The new entry may or may not be visited.
    pub fn insert(&mut self, key: K, val: V) -> Result<()> {
        self.d.insert(key, val)
    }

    /// Entries currently stored.
    pub fn len(&self) -> usize {
        self.d.len()
    }
}

impl<K, V, T: DictType<K>> Drop for SafeIter<'_, K, V, T> {
    fn drop(&mut self) {
        self.d.iterators -= 1;
    }
}
