//! Doubly linked list of ziplist nodes: O(1) ends with bounded node sizes.
//!
//! A [`QuickList`] chains small ziplists together so that a long list keeps
//! the memory density of the packed encoding without ever paying a large
//! cascade: the per-node size policy (`fill`) caps how big any one ziplist
//! may grow. Interior nodes can additionally be LZF-compressed; the
//! `compress_depth` option keeps that many nodes at each end raw so that
//! push/pop traffic never touches the codec.
//!
//! Nodes live in an index-linked arena (`u32` links into one `Vec`), which
//! gives the same O(1) link/unlink surgery as intrusive pointers without
//! any of their aliasing hazards.

use std::mem;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::Result;
use crate::lzf;
use crate::ziplist::{self, End, Value, ZipList, ZlView};

const NIL: u32 = u32::MAX;
/// Hard per-node ziplist cap when `fill` counts entries; bounds the cost of
/// any single cascade update.
const SIZE_SAFETY_LIMIT: usize = 8192;
/// Nodes smaller than this are never worth compressing.
const MIN_COMPRESS_BYTES: usize = 48;
/// Byte budgets selected by fill = -1 .. -5.
const FILL_OPT_LEVELS: [usize; 5] = [4096, 8192, 16384, 32768, 65536];
const FILL_MIN: i32 = -5;

const ENTER_BACK: i64 = i64::MAX;

/// Size and compression policy, the shape hosts keep in their config.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Options {
    /// Negative: per-node byte budget tier (−1 → 4 KiB ... −5 → 64 KiB).
    /// Non-negative: max entries per node, with an 8 KiB byte guard.
    pub fill: i32,
    /// Number of nodes at each end left uncompressed; 0 disables
    /// compression entirely.
    pub compress_depth: u32,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            fill: -2,
            compress_depth: 0,
        }
    }
}

/// Iteration direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Encoding {
    Raw,
    Lzf,
}

#[derive(Clone)]
struct Node {
    prev: u32,
    next: u32,
    /// Raw ziplist blob, or the LZF stream when `encoding == Lzf`.
    data: Vec<u8>,
    /// Uncompressed ziplist size in bytes.
    sz: u32,
    count: u16,
    encoding: Encoding,
    /// Temporarily decompressed for an operation; recompress when done.
    recompress: bool,
    /// Compression was tried and declined (too small or no gain).
    attempted_compress: bool,
}

impl Node {
    fn from_ziplist(zl: ZipList) -> Node {
        let count = zl.len().min(u16::MAX as usize) as u16;
        let sz = zl.blob_len() as u32;
        Node {
            prev: NIL,
            next: NIL,
            data: zl.into_bytes(),
            sz,
            count,
            encoding: Encoding::Raw,
            recompress: false,
            attempted_compress: false,
        }
    }
}

/// A list of packed-list nodes. See the module docs.
pub struct QuickList {
    nodes: Vec<Node>,
    free: Vec<u32>,
    head: u32,
    tail: u32,
    /// Total entries across all nodes.
    count: usize,
    fill: i32,
    compress: u32,
}

impl QuickList {
    /// A list with the default policy (8 KiB nodes, no compression).
    pub fn new() -> QuickList {
        Self::with_options(Options::default())
    }

    /// A list with an explicit size/compression policy.
    pub fn with_options(opts: Options) -> QuickList {
        QuickList {
            nodes: Vec::new(),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
            count: 0,
            fill: opts.fill.max(FILL_MIN),
            compress: opts.compress_depth.min(u16::MAX as u32),
        }
    }

    /// Build from an existing ziplist by exploding it into pushes.
    pub fn from_ziplist(opts: Options, zl: ZipList) -> Result<QuickList> {
        let mut ql = QuickList::with_options(opts);
        ql.extend_from_ziplist(zl)?;
        Ok(ql)
    }

    /// The active policy.
    pub fn options(&self) -> Options {
        Options {
            fill: self.fill,
            compress_depth: self.compress,
        }
    }

    /// Change the per-node size policy for future inserts.
    pub fn set_fill(&mut self, fill: i32) {
        self.fill = fill.max(FILL_MIN);
    }

    /// Change the compression depth. Applies lazily as nodes are touched.
    pub fn set_compress_depth(&mut self, depth: u32) {
        self.compress = depth.min(u16::MAX as u32);
    }

    /// Total entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    /// True when no entries are stored.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Number of nodes.
    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    /// Push to an end. Returns `true` when a new node had to be created.
    pub fn push(&mut self, value: &[u8], end: End) -> Result<bool> {
        let target = match end {
            End::Head => self.head,
            End::Tail => self.tail,
        };
        if self.allow_insert(target, value.len()) {
            self.with_ziplist(target, |zl| zl.push(value, end))?;
            self.count += 1;
            return Ok(false);
        }
        let node = self.node_with_single(value)?;
        self.link_node(target, node, end == End::Tail);
        self.count += 1;
        Ok(true)
    }

    /// Push to the front.
    pub fn push_front(&mut self, value: &[u8]) -> Result<bool> {
        self.push(value, End::Head)
    }

    /// Push to the back.
    pub fn push_back(&mut self, value: &[u8]) -> Result<bool> {
        self.push(value, End::Tail)
    }

    /// Pop from an end; ownership of the bytes moves to the caller.
    pub fn pop(&mut self, end: End) -> Option<Value> {
        if self.count == 0 {
            return None;
        }
        let n = match end {
            End::Head => self.head,
            End::Tail => self.tail,
        };
        // End nodes are raw by policy; the guard costs nothing when so.
        self.decompress_for_use(n);
        let offset = match end {
            End::Head => 0,
            End::Tail => self.node(n).count as usize - 1,
        };
        let value = self.node_value(n, offset);
        if !self.del_index(n, offset) {
            self.recompress_only(n);
        }
        Some(value)
    }

    /// Pop from the front.
    pub fn pop_front(&mut self) -> Option<Value> {
        self.pop(End::Head)
    }

    /// Pop from the back.
    pub fn pop_back(&mut self) -> Option<Value> {
        self.pop(End::Tail)
    }

    /// The entry at `index` (negative counts from the back).
    pub fn get(&self, index: i64) -> Option<Value> {
        let (n, offset) = self.locate(index)?;
        Some(self.node_value(n, offset))
    }

    /// True when the entry at `index` equals `s`, with the packed-list
    /// string/integer comparison rules.
    pub fn entry_eq(&self, index: i64, s: &[u8]) -> bool {
        match self.get(index) {
            Some(Value::Bytes(b)) => b == s,
            Some(Value::Int(v)) => ziplist::parse_i64(s) == Some(v),
            None => false,
        }
    }

    /// Insert `value` before the entry at `index`.
    pub fn insert_before(&mut self, index: i64, value: &[u8]) -> Result<bool> {
        match self.locate(index) {
            Some((n, offset)) => {
                self.insert_at(n, offset, value, false)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Insert `value` after the entry at `index`.
    pub fn insert_after(&mut self, index: i64, value: &[u8]) -> Result<bool> {
        match self.locate(index) {
            Some((n, offset)) => {
                self.insert_at(n, offset, value, true)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Replace the entry at `index`. Returns `false` when out of range.
    pub fn replace(&mut self, index: i64, value: &[u8]) -> Result<bool> {
        let (n, offset) = match self.locate(index) {
            Some(x) => x,
            None => return Ok(false),
        };
        self.decompress_for_use(n);
        let replaced = self.with_ziplist(n, |zl| -> Result<()> {
            // Reserve up front so the delete/insert pair cannot fail midway.
            zl.reserve(value.len() + 16)?;
            let at = zl.index(offset as i64).expect("offset within node");
            let at = zl.remove(at);
            zl.insert(at, value)
        });
        self.recompress_only(n);
        replaced?;
        Ok(true)
    }

    /// Remove up to `count` entries starting at `start` (negative from the
    /// back). Returns how many were removed.
    pub fn remove_range(&mut self, start: i64, count: usize) -> usize {
        if count == 0 || self.count == 0 {
            return 0;
        }
        let (mut node, mut offset) = match self.locate(start) {
            Some(x) => x,
            None => return 0,
        };
        let mut extent = if start >= 0 {
            count.min(self.count - start as usize)
        } else {
            count.min((-start) as usize)
        };
        let mut removed = 0;
        while extent > 0 && node != NIL {
            let next = self.node(node).next;
            let node_cnt = self.node(node).count as usize;
            let del = (node_cnt - offset).min(extent);
            if offset == 0 && del == node_cnt {
                self.del_node(node);
            } else {
                self.decompress_for_use(node);
                self.with_ziplist(node, |zl| {
                    zl.remove_range(offset as i64, del);
                });
                self.count -= del;
                if self.node(node).count == 0 {
                    self.del_node(node);
                } else {
                    self.recompress_only(node);
                }
            }
            removed += del;
            extent -= del;
            offset = 0;
            node = next;
        }
        removed
    }

    /// Move the back entry to the front.
    pub fn rotate(&mut self) -> Result<()> {
        if self.count <= 1 {
            return Ok(());
        }
        let tail = self.tail;
        let value = self.node_value(tail, self.node(tail).count as usize - 1);
        self.push(&value.to_push_bytes(), End::Head)?;
        // In a single-node list the head push shifted the tail entry;
        // re-locate it by index before deleting.
        let (n, offset) = self.locate(-1).expect("nonempty list has a tail entry");
        if !self.del_index(n, offset) {
            self.recompress_only(n);
        }
        Ok(())
    }

    /// Adopt a whole ziplist blob as one new tail node.
    pub fn append_ziplist(&mut self, zl: ZipList) {
        if zl.is_empty() {
            return;
        }
        let node = Node::from_ziplist(zl);
        let cnt = node.count as usize;
        let i = self.alloc_node(node);
        self.link_node(self.tail, i, true);
        self.count += cnt;
    }

    /// Append every entry of a ziplist as individual pushes, re-encoding
    /// each under this list's node policy.
    pub fn extend_from_ziplist(&mut self, zl: ZipList) -> Result<()> {
        let mut p = zl.index(0);
        while let Some(at) = p {
            let v = zl.get(at).expect("walk yields entries").to_owned();
            self.push(&v.to_push_bytes(), End::Tail)?;
            p = zl.next(at);
        }
        Ok(())
    }

    /// Iterate entries in `dir` order.
    pub fn iter(&self, dir: Direction) -> Iter<'_> {
        Iter {
            ql: self,
            node: match dir {
                Direction::Forward => self.head,
                Direction::Backward => self.tail,
            },
            zi: None,
            enter_offset: match dir {
                Direction::Forward => 0,
                Direction::Backward => -1,
            },
            direction: dir,
            cache: None,
        }
    }

    /// Iterate starting from the entry at `index`.
    pub fn iter_from(&self, dir: Direction, index: i64) -> Option<Iter<'_>> {
        let (node, offset) = self.locate(index)?;
        Some(Iter {
            ql: self,
            node,
            zi: None,
            enter_offset: offset as i64,
            direction: dir,
            cache: None,
        })
    }

    /// Iterate with support for deleting the current entry.
    pub fn iter_mut(&mut self, dir: Direction) -> IterMut<'_> {
        let node = match dir {
            Direction::Forward => self.head,
            Direction::Backward => self.tail,
        };
        IterMut {
            ql: self,
            node,
            zi: None,
            next_offset: match dir {
                Direction::Forward => 0,
                Direction::Backward => ENTER_BACK,
            },
            direction: dir,
            cur: None,
        }
    }

    /// Per-node wire view for persistence: the stored blob (compressed or
    /// raw), in list order.
    pub fn raw_nodes(&self) -> impl Iterator<Item = RawNode<'_>> {
        let ql = self;
        std::iter::successors((self.head != NIL).then_some(self.head), move |&i| {
            let n = ql.node(i).next;
            (n != NIL).then_some(n)
        })
        .map(move |i| {
            let n = ql.node(i);
            RawNode {
                data: &n.data,
                raw_size: n.sz as usize,
                compressed: n.encoding == Encoding::Lzf,
                count: n.count as usize,
            }
        })
    }

    // ---- arena & links ----

    #[inline]
    fn node(&self, i: u32) -> &Node {
        &self.nodes[i as usize]
    }

    #[inline]
    fn node_mut(&mut self, i: u32) -> &mut Node {
        &mut self.nodes[i as usize]
    }

    fn alloc_node(&mut self, node: Node) -> u32 {
        if let Some(i) = self.free.pop() {
            self.nodes[i as usize] = node;
            i
        } else {
            self.nodes.push(node);
            (self.nodes.len() - 1) as u32
        }
    }

    fn node_with_single(&mut self, value: &[u8]) -> Result<u32> {
        let mut zl = ZipList::new();
        zl.push(value, End::Tail)?;
        Ok(self.alloc_node(Node::from_ziplist(zl)))
    }

    /// Link `new` after (or before) `old`; `old == NIL` means the list was
    /// empty. The displaced neighbor is handed to the compressor, since it
    /// may just have become an interior node.
    fn link_node(&mut self, old: u32, new: u32, after: bool) {
        if old == NIL {
            self.head = new;
            self.tail = new;
        } else if after {
            let oldnext = self.node(old).next;
            self.node_mut(new).prev = old;
            self.node_mut(new).next = oldnext;
            self.node_mut(old).next = new;
            if oldnext != NIL {
                self.node_mut(oldnext).prev = new;
            }
            if self.tail == old {
                self.tail = new;
            }
        } else {
            let oldprev = self.node(old).prev;
            self.node_mut(new).next = old;
            self.node_mut(new).prev = oldprev;
            self.node_mut(old).prev = new;
            if oldprev != NIL {
                self.node_mut(oldprev).next = new;
            }
            if self.head == old {
                self.head = new;
            }
        }
        if old != NIL {
            self.apply_compress(Some(old));
        }
    }

    fn del_node(&mut self, i: u32) {
        self.count -= self.node(i).count as usize;
        let (prev, next) = (self.node(i).prev, self.node(i).next);
        if prev != NIL {
            self.node_mut(prev).next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.node_mut(next).prev = prev;
        } else {
            self.tail = prev;
        }
        let n = self.node_mut(i);
        *n = Node {
            prev: NIL,
            next: NIL,
            data: Vec::new(),
            sz: 0,
            count: 0,
            encoding: Encoding::Raw,
            recompress: false,
            attempted_compress: false,
        };
        self.free.push(i);
        if self.compress != 0 {
            // A raw end node may have been removed; re-establish the
            // uncompressed margins.
            self.apply_compress(None);
        }
    }

    /// Operate on a node's ziplist, refreshing its byte/entry counters.
    /// The node must be raw.
    fn with_ziplist<R>(&mut self, i: u32, f: impl FnOnce(&mut ZipList) -> R) -> R {
        debug_assert_eq!(self.node(i).encoding, Encoding::Raw);
        let data = mem::take(&mut self.node_mut(i).data);
        let mut zl = ZipList::from_owned_unchecked(data);
        let r = f(&mut zl);
        let n = self.node_mut(i);
        n.count = zl.len().min(u16::MAX as usize) as u16;
        n.sz = zl.blob_len() as u32;
        n.data = zl.into_bytes();
        r
    }

    /// Node and in-node entry index of the list-wide `index`.
    fn locate(&self, index: i64) -> Option<(u32, usize)> {
        let forward = index >= 0;
        let mut remaining = if forward {
            index as usize
        } else {
            (-(index + 1)) as usize
        };
        if remaining >= self.count {
            return None;
        }
        let mut n = if forward { self.head } else { self.tail };
        loop {
            let c = self.node(n).count as usize;
            if remaining < c {
                let offset = if forward { remaining } else { c - 1 - remaining };
                return Some((n, offset));
            }
            remaining -= c;
            n = if forward {
                self.node(n).next
            } else {
                self.node(n).prev
            };
        }
    }

    /// Decode one entry out of a node, through a transient buffer when the
    /// node is compressed (pure read, no state change).
    fn node_value(&self, n: u32, offset: usize) -> Value {
        let node = self.node(n);
        let read = |bytes: &[u8]| {
            let view = ZlView(bytes);
            let at = view.index(offset as i64).expect("offset within node");
            view.get(at).expect("entry at offset").to_owned()
        };
        match node.encoding {
            Encoding::Raw => read(&node.data),
            Encoding::Lzf => {
                let Some(raw) = lzf::decompress(&node.data, node.sz as usize) else {
                    unreachable!("lzf node produced by this list failed to decode");
                };
                read(&raw)
            }
        }
    }

    // ---- inserts ----

    /// The insert engine: put `value` before/after entry `offset` of node
    /// `n`, splitting or spilling into neighbors when the node is full.
    fn insert_at(&mut self, n: u32, offset: usize, value: &[u8], after: bool) -> Result<()> {
        let full = !self.allow_insert(n, value.len());
        let node_cnt = self.node(n).count as usize;
        let at_tail = offset == node_cnt - 1;
        let at_head = offset == 0;
        let next = self.node(n).next;
        let prev = self.node(n).prev;

        if !full {
            self.decompress_for_use(n);
            let inserted = self.with_ziplist(n, |zl| {
                let at = zl.index(offset as i64).expect("offset within node");
                if after {
                    match zl.next(at) {
                        Some(q) => zl.insert(q, value),
                        None => zl.push(value, End::Tail),
                    }
                } else {
                    zl.insert(at, value)
                }
            });
            self.recompress_only(n);
            inserted?;
            self.count += 1;
        } else if at_tail && after && next != NIL && self.allow_insert(next, value.len()) {
            // Spill into the next node's head.
            self.decompress_for_use(next);
            let pushed = self.with_ziplist(next, |zl| zl.push(value, End::Head));
            self.recompress_only(next);
            pushed?;
            self.count += 1;
        } else if at_head && !after && prev != NIL && self.allow_insert(prev, value.len()) {
            // Spill into the previous node's tail.
            self.decompress_for_use(prev);
            let pushed = self.with_ziplist(prev, |zl| zl.push(value, End::Tail));
            self.recompress_only(prev);
            pushed?;
            self.count += 1;
        } else if (at_tail && after) || (at_head && !after) {
            // Boundary insert with full neighbors: fresh node.
            let new = self.node_with_single(value)?;
            self.link_node(n, new, after);
            self.count += 1;
        } else {
            // Interior of a full node: split it and push onto the new half.
            self.decompress_for_use(n);
            let new = match self.split_insert(n, offset, value, after) {
                Ok(new) => new,
                Err(e) => {
                    self.recompress_only(n);
                    return Err(e);
                }
            };
            self.count += 1;
            self.link_node(n, new, after);
            trace!(entries = node_cnt, offset, "full node split on interior insert");
            self.merge_around(n);
        }
        Ok(())
    }

    /// Split node `n`'s ziplist around `offset` and put `value` into the
    /// new half. With `after`, `n` keeps `[0..=offset]` and the new node
    /// takes the rest with `value` at its head; otherwise `n` keeps
    /// `[offset..]` and the new node takes `[0..offset)` with `value` at
    /// its tail. Both halves are carved out of copies and `n` is only
    /// replaced once every fallible step has succeeded, so an allocation
    /// failure leaves the list exactly as it was. Returns the new node,
    /// not yet linked.
    fn split_insert(&mut self, n: u32, offset: usize, value: &[u8], after: bool) -> Result<u32> {
        let count = self.node(n).count as usize;
        let mut keep = ZipList::from_owned_unchecked(self.node(n).data.clone());
        let mut other = ZipList::from_owned_unchecked(self.node(n).data.clone());
        if after {
            keep.remove_range(offset as i64 + 1, count);
            other.remove_range(0, offset + 1);
            other.push(value, End::Head)?;
        } else {
            keep.remove_range(0, offset);
            other.remove_range(offset as i64, count);
            other.push(value, End::Tail)?;
        }
        self.with_ziplist(n, |zl| *zl = keep);
        Ok(self.alloc_node(Node::from_ziplist(other)))
    }

    /// After a split, try to knit the neighborhood back into as few nodes
    /// as the fill policy allows.
    fn merge_around(&mut self, center: u32) {
        let prev = self.node(center).prev;
        let prev_prev = if prev != NIL { self.node(prev).prev } else { NIL };
        let next = self.node(center).next;
        let next_next = if next != NIL { self.node(next).next } else { NIL };
        if self.allow_merge(prev_prev, prev) {
            self.merge_nodes(prev_prev, prev);
        }
        if self.allow_merge(next, next_next) {
            self.merge_nodes(next, next_next);
        }
        let prev = self.node(center).prev;
        let center = if self.allow_merge(prev, center) {
            self.merge_nodes(prev, center)
        } else {
            center
        };
        let next = self.node(center).next;
        if self.allow_merge(center, next) {
            self.merge_nodes(center, next);
        }
    }

    /// Merge adjacent nodes `a` then `b` into `a`, freeing `b`. Skipped
    /// (harmlessly) when the reservation fails.
    fn merge_nodes(&mut self, a: u32, b: u32) -> u32 {
        self.decompress_for_use(a);
        self.decompress_for_use(b);
        let mut da = mem::take(&mut self.node_mut(a).data);
        let mut db = mem::take(&mut self.node_mut(b).data);
        if da.try_reserve(db.len() + 4).is_err() || db.try_reserve(da.len() + 4).is_err() {
            self.node_mut(a).data = da;
            self.node_mut(b).data = db;
            self.recompress_only(a);
            self.recompress_only(b);
            return a;
        }
        let Ok(zl) = ZipList::merge(
            ZipList::from_owned_unchecked(da),
            ZipList::from_owned_unchecked(db),
        ) else {
            unreachable!("merge cannot fail after reservation");
        };
        let n = self.node_mut(a);
        n.count = zl.len().min(u16::MAX as usize) as u16;
        n.sz = zl.blob_len() as u32;
        n.data = zl.into_bytes();
        self.node_mut(b).count = 0;
        self.del_node(b);
        self.apply_compress(Some(a));
        a
    }

    /// Remove one entry (by in-node index); frees the node when emptied.
    /// Returns `true` when the node was deleted.
    fn del_index(&mut self, n: u32, offset: usize) -> bool {
        let emptied = self.with_ziplist(n, |zl| {
            let at = zl.index(offset as i64).expect("offset within node");
            zl.remove(at);
            zl.is_empty()
        });
        self.count -= 1;
        if emptied {
            self.del_node(n);
        }
        emptied
    }

    // ---- fill policy ----

    fn allow_insert(&self, i: u32, sz: usize) -> bool {
        if i == NIL {
            return false;
        }
        let node = self.node(i);
        // Worst-case entry overhead for this payload.
        let prev_overhead = if sz < 254 { 1 } else { 5 };
        let len_overhead = if sz < 64 {
            1
        } else if sz < 16384 {
            2
        } else {
            5
        };
        let new_sz = node.sz as usize + sz + prev_overhead + len_overhead;
        if size_meets_optimization(new_sz, self.fill) {
            true
        } else if new_sz > SIZE_SAFETY_LIMIT {
            false
        } else {
            (node.count as i32) < self.fill
        }
    }

    fn allow_merge(&self, a: u32, b: u32) -> bool {
        if a == NIL || b == NIL {
            return false;
        }
        // One ziplist header disappears in a merge.
        let merge_sz = self.node(a).sz as usize + self.node(b).sz as usize - 11;
        let count = self.node(a).count as u32 + self.node(b).count as u32;
        if size_meets_optimization(merge_sz, self.fill) {
            true
        } else if merge_sz > SIZE_SAFETY_LIMIT {
            false
        } else {
            count as i32 <= self.fill
        }
    }

    // ---- compression ----

    fn compress_node(&mut self, i: u32) {
        let n = self.node_mut(i);
        n.recompress = false;
        if n.encoding == Encoding::Lzf {
            return;
        }
        if (n.sz as usize) < MIN_COMPRESS_BYTES {
            n.attempted_compress = true;
            return;
        }
        match lzf::compress(&n.data) {
            Some(c) if c.len() + MIN_COMPRESS_BYTES < n.sz as usize => {
                trace!(raw = n.sz, packed = c.len(), "node compressed");
                n.data = c;
                n.encoding = Encoding::Lzf;
                n.attempted_compress = false;
            }
            _ => {
                // Not enough gain to be worth the decompression tax.
                n.attempted_compress = true;
            }
        }
    }

    /// Fully decompress a node, clearing any pending-recompress mark.
    fn decompress_node(&mut self, i: u32) {
        let n = self.node_mut(i);
        n.recompress = false;
        if n.encoding == Encoding::Lzf {
            let Some(raw) = lzf::decompress(&n.data, n.sz as usize) else {
                unreachable!("lzf node produced by this list failed to decode");
            };
            n.data = raw;
            n.encoding = Encoding::Raw;
        }
    }

    /// Decompress for a single operation, marking the node to be
    /// recompressed when the operation finishes.
    fn decompress_for_use(&mut self, i: u32) {
        if self.node(i).encoding == Encoding::Lzf {
            self.decompress_node(i);
            self.node_mut(i).recompress = true;
        }
    }

    fn recompress_only(&mut self, i: u32) {
        if self.node(i).recompress {
            self.compress_node(i);
        }
    }

    fn apply_compress(&mut self, node: Option<u32>) {
        self.apply_compress_opt(node);
    }

    /// Enforce the depth policy: walk `compress_depth` nodes inward from
    /// both ends decompressing them, compress `node` if it lies deeper
    /// than that, and compress the first node past each margin (the one
    /// that just slid out of it).
    fn apply_compress_opt(&mut self, node: Option<u32>) {
        if self.compress == 0 || self.node_count() < self.compress as usize * 2 {
            return;
        }
        let mut forward = self.head;
        let mut reverse = self.tail;
        let mut in_depth = false;
        for _ in 0..self.compress {
            self.decompress_node(forward);
            self.decompress_node(reverse);
            if Some(forward) == node || Some(reverse) == node {
                in_depth = true;
            }
            // The margins met in the middle: every node is within depth.
            if forward == reverse || self.node(forward).next == reverse {
                return;
            }
            forward = self.node(forward).next;
            reverse = self.node(reverse).prev;
        }
        if !in_depth {
            if let Some(n) = node {
                self.compress_node(n);
            }
        }
        // forward and reverse now sit one node beyond each margin.
        self.compress_node(forward);
        self.compress_node(reverse);
    }
}

impl Default for QuickList {
    fn default() -> Self {
        QuickList::new()
    }
}

impl Clone for QuickList {
    fn clone(&self) -> Self {
        let mut out = QuickList::with_options(self.options());
        let mut i = self.head;
        while i != NIL {
            let n = self.node(i);
            let copy = Node {
                prev: NIL,
                next: NIL,
                data: n.data.clone(),
                sz: n.sz,
                count: n.count,
                encoding: n.encoding,
                recompress: false,
                attempted_compress: n.attempted_compress,
            };
            let idx = out.alloc_node(copy);
            let tail = out.tail;
            out.link_node(tail, idx, true);
            out.count += n.count as usize;
            i = n.next;
        }
        out
    }
}

impl std::fmt::Debug for QuickList {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("QuickList")
            .field("entries", &self.count)
            .field("nodes", &self.node_count())
            .field("fill", &self.fill)
            .field("compress_depth", &self.compress)
            .finish()
    }
}

/// One node's stored blob, for the host's persistence layer.
pub struct RawNode<'a> {
    /// The bytes as stored: a raw ziplist, or an LZF stream.
    pub data: &'a [u8],
    /// Uncompressed ziplist size (equals `data.len()` for raw nodes).
    pub raw_size: usize,
    /// Whether `data` is an LZF stream.
    pub compressed: bool,
    /// Entries in this node.
    pub count: usize,
}

/// Read-only entry iterator; see [`QuickList::iter`].
pub struct Iter<'a> {
    ql: &'a QuickList,
    node: u32,
    zi: Option<usize>,
    enter_offset: i64,
    direction: Direction,
    /// Owned decompressed copy of the current node when it is LZF; reads
    /// never mutate the list.
    cache: Option<(u32, Vec<u8>)>,
}

impl Iter<'_> {
    fn ensure_cache(&mut self) {
        if self.ql.node(self.node).encoding == Encoding::Lzf
            && !matches!(&self.cache, Some((i, _)) if *i == self.node)
        {
            let n = self.ql.node(self.node);
            let Some(raw) = lzf::decompress(&n.data, n.sz as usize) else {
                unreachable!("lzf node produced by this list failed to decode");
            };
            self.cache = Some((self.node, raw));
        }
    }

    fn advance_node(&mut self) {
        self.node = match self.direction {
            Direction::Forward => self.ql.node(self.node).next,
            Direction::Backward => self.ql.node(self.node).prev,
        };
        self.zi = None;
        self.enter_offset = match self.direction {
            Direction::Forward => 0,
            Direction::Backward => -1,
        };
    }
}

impl Iterator for Iter<'_> {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        loop {
            if self.node == NIL {
                return None;
            }
            self.ensure_cache();
            let (value, next_zi) = {
                let node = self.ql.node(self.node);
                let bytes: &[u8] = match &self.cache {
                    Some((i, data)) if *i == self.node => data,
                    _ => &node.data,
                };
                let view = ZlView(bytes);
                let at = match self.zi {
                    Some(at) => Some(at),
                    None => view.index(self.enter_offset),
                };
                match at {
                    Some(at) => (
                        view.get(at).map(|v| v.to_owned()),
                        match self.direction {
                            Direction::Forward => view.next(at),
                            Direction::Backward => view.prev(at),
                        },
                    ),
                    None => (None, None),
                }
            };
            match value {
                Some(v) => {
                    self.zi = next_zi;
                    if next_zi.is_none() {
                        self.advance_node();
                    }
                    return Some(v);
                }
                None => self.advance_node(),
            }
        }
    }
}

/// Entry iterator supporting removal of the current entry; see
/// [`QuickList::iter_mut`].
pub struct IterMut<'a> {
    ql: &'a mut QuickList,
    node: u32,
    zi: Option<usize>,
    /// In-node index of the entry the next step yields; `ENTER_BACK`
    /// resolves to the node's last entry on entry.
    next_offset: i64,
    direction: Direction,
    /// Node and in-node index of the last yielded entry.
    cur: Option<(u32, usize)>,
}

impl IterMut<'_> {
    /// Advance and return the next entry.
    pub fn next_entry(&mut self) -> Option<Value> {
        loop {
            if self.node == NIL {
                self.cur = None;
                return None;
            }
            self.ql.decompress_for_use(self.node);
            let count = self.ql.node(self.node).count as i64;
            if self.next_offset == ENTER_BACK {
                self.next_offset = count - 1;
            }
            if self.next_offset < 0 || self.next_offset >= count {
                self.ql.recompress_only(self.node);
                self.node = match self.direction {
                    Direction::Forward => self.ql.node(self.node).next,
                    Direction::Backward => self.ql.node(self.node).prev,
                };
                self.zi = None;
                self.next_offset = match self.direction {
                    Direction::Forward => 0,
                    Direction::Backward => ENTER_BACK,
                };
                continue;
            }
            let (value, next_zi) = {
                let view = ZlView(&self.ql.node(self.node).data);
                let at = match self.zi {
                    Some(at) => at,
                    None => view.index(self.next_offset).expect("offset within node"),
                };
                let v = view.get(at).expect("entry at offset").to_owned();
                (
                    v,
                    match self.direction {
                        Direction::Forward => view.next(at),
                        Direction::Backward => view.prev(at),
                    },
                )
            };
            self.cur = Some((self.node, self.next_offset as usize));
            self.zi = next_zi;
            self.next_offset += match self.direction {
                Direction::Forward => 1,
                Direction::Backward => -1,
            };
            return Some(value);
        }
    }

    /// Remove the entry most recently yielded by
    /// [`next_entry`](IterMut::next_entry), returning it.
    pub fn remove_current(&mut self) -> Option<Value> {
        let (n, offset) = self.cur.take()?;
        let next = self.ql.node(n).next;
        let prev = self.ql.node(n).prev;
        let value = self.ql.node_value(n, offset);
        let deleted = self.ql.del_index(n, offset);
        self.zi = None;
        if deleted {
            match self.direction {
                Direction::Forward => {
                    self.node = next;
                    self.next_offset = 0;
                }
                Direction::Backward => {
                    self.node = prev;
                    self.next_offset = ENTER_BACK;
                }
            }
        } else if self.direction == Direction::Forward {
            // Entries after the removed one shifted left.
            self.next_offset -= 1;
        }
        Some(value)
    }
}

impl Drop for IterMut<'_> {
    fn drop(&mut self) {
        if self.node != NIL {
            self.ql.recompress_only(self.node);
        }
    }
}

fn size_meets_optimization(sz: usize, fill: i32) -> bool {
    if fill >= 0 {
        return false;
    }
    let idx = (-fill - 1) as usize;
    idx < FILL_OPT_LEVELS.len() && sz <= FILL_OPT_LEVELS[idx]
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Structural invariants: link symmetry, counters, the compression
    /// margins, and per-node counter accuracy.
    fn check(ql: &QuickList) {
        let mut seen = 0usize;
        let mut nodes = 0usize;
        let mut order = Vec::new();
        let mut i = ql.head;
        let mut prev = NIL;
        while i != NIL {
            let n = ql.node(i);
            assert_eq!(n.prev, prev, "prev link broken");
            assert!(n.count > 0, "empty nodes are always freed");
            match n.encoding {
                Encoding::Raw => assert_eq!(n.sz as usize, n.data.len()),
                Encoding::Lzf => {
                    let raw = lzf::decompress(&n.data, n.sz as usize).unwrap();
                    assert_eq!(raw.len(), n.sz as usize);
                    assert_eq!(ZlView(&raw).len(), n.count as usize);
                }
            }
            if n.encoding == Encoding::Raw {
                assert_eq!(ZlView(&n.data).len(), n.count as usize);
            }
            seen += n.count as usize;
            nodes += 1;
            order.push(i);
            prev = i;
            i = n.next;
        }
        assert_eq!(prev, ql.tail);
        assert_eq!(seen, ql.len());
        assert_eq!(nodes, ql.node_count());

        if ql.compress > 0 && nodes >= ql.compress as usize * 2 {
            let d = ql.compress as usize;
            for (pos, &i) in order.iter().enumerate() {
                let from_tail = nodes - 1 - pos;
                if pos < d || from_tail < d {
                    assert_eq!(
                        ql.node(i).encoding,
                        Encoding::Raw,
                        "end node within depth {} must stay raw",
                        d
                    );
                }
            }
        }
    }

    fn entries(ql: &QuickList) -> Vec<Value> {
        ql.iter(Direction::Forward).collect()
    }

    fn bytes(s: &str) -> Value {
        Value::Bytes(s.as_bytes().to_vec())
    }

    #[test]
    fn push_pop_both_ends() {
        let mut ql = QuickList::new();
        assert!(ql.push_back(b"b").unwrap(), "first push creates a node");
        assert!(!ql.push_back(b"c").unwrap());
        assert!(!ql.push_front(b"a").unwrap());
        check(&ql);
        assert_eq!(ql.len(), 3);
        assert_eq!(entries(&ql), vec![bytes("a"), bytes("b"), bytes("c")]);

        assert_eq!(ql.pop_front(), Some(bytes("a")));
        assert_eq!(ql.pop_back(), Some(bytes("c")));
        assert_eq!(ql.pop_back(), Some(bytes("b")));
        assert_eq!(ql.pop_back(), None);
        assert!(ql.is_empty());
        assert_eq!(ql.node_count(), 0);
    }

    #[test]
    fn integers_round_trip_through_packed_encoding() {
        let mut ql = QuickList::new();
        ql.push_back(b"12345").unwrap();
        ql.push_back(b"-9876543210").unwrap();
        ql.push_back(b"not-a-number").unwrap();
        assert_eq!(ql.get(0), Some(Value::Int(12345)));
        assert_eq!(ql.get(1), Some(Value::Int(-9876543210)));
        assert_eq!(ql.get(2), Some(bytes("not-a-number")));
        assert_eq!(ql.get(-3), Some(Value::Int(12345)));
        assert_eq!(ql.get(3), None);
        assert!(ql.entry_eq(0, b"12345"));
        assert!(!ql.entry_eq(0, b"12346"));
        // Rotate re-encodes the integer through its decimal form.
        ql.rotate().unwrap();
        assert_eq!(ql.get(0), Some(bytes("not-a-number")));
        assert_eq!(ql.get(1), Some(Value::Int(12345)));
        check(&ql);
    }

    #[test]
    fn entry_count_fill_caps_nodes() {
        let mut ql = QuickList::with_options(Options {
            fill: 4,
            compress_depth: 0,
        });
        for i in 0..10 {
            ql.push_back(format!("e{}", i).as_bytes()).unwrap();
        }
        check(&ql);
        assert_eq!(ql.len(), 10);
        assert_eq!(ql.node_count(), 3, "4+4+2 under fill=4");
    }

    #[test]
    fn byte_budget_fill_caps_nodes() {
        // fill=-1: 4 KiB nodes. 100 entries of ~110 bytes ≈ 3 nodes.
        let mut ql = QuickList::with_options(Options {
            fill: -1,
            compress_depth: 0,
        });
        let payload = vec![b'p'; 108];
        for _ in 0..100 {
            ql.push_back(&payload).unwrap();
        }
        check(&ql);
        assert!(ql.node_count() >= 3);
        for n in ql.raw_nodes() {
            assert!(n.raw_size <= 4096);
        }
    }

    #[test]
    fn split_on_interior_insert() {
        let mut ql = QuickList::with_options(Options {
            fill: 128,
            compress_depth: 0,
        });
        for i in 0..128 {
            ql.push_back(format!("item-{:03}", i).as_bytes()).unwrap();
        }
        assert_eq!(ql.node_count(), 1);

        assert!(ql.insert_before(64, b"wedge").unwrap());
        check(&ql);
        assert_eq!(ql.len(), 129);
        assert!(ql.node_count() >= 2, "full node split");

        let got = entries(&ql);
        assert_eq!(got[63], bytes("item-063"));
        assert_eq!(got[64], bytes("wedge"));
        assert_eq!(got[65], bytes("item-064"));
        assert_eq!(got[128], bytes("item-127"));
    }

    #[test]
    fn split_nodes_inside_depth_get_compressed() {
        let mut ql = QuickList::with_options(Options {
            fill: 10,
            compress_depth: 1,
        });
        let payload = vec![b'z'; 60];
        for _ in 0..50 {
            ql.push_back(&payload).unwrap();
        }
        check(&ql);
        assert!(ql.node_count() >= 5);
        // Interior insert into node 3-ish.
        assert!(ql.insert_after(25, &payload).unwrap());
        check(&ql);
        assert_eq!(ql.len(), 51);
        // Some interior node ended up compressed.
        assert!(ql.raw_nodes().any(|n| n.compressed));
    }

    #[test]
    fn insert_spills_into_neighbors() {
        let mut ql = QuickList::with_options(Options {
            fill: 3,
            compress_depth: 0,
        });
        for s in [&b"a"[..], b"b", b"c", b"d"] {
            ql.push_back(s).unwrap();
        }
        assert_eq!(ql.node_count(), 2);
        // After the tail entry of the full first node, with room in the
        // second: the entry spills into the second node's head.
        ql.insert_after(2, b"c2").unwrap();
        check(&ql);
        assert_eq!(ql.node_count(), 2, "no split needed");
        assert_eq!(
            entries(&ql),
            vec![bytes("a"), bytes("b"), bytes("c"), bytes("c2"), bytes("d")]
        );
        // Before the head entry of the full first node, with no previous
        // neighbor: a fresh node is linked in.
        ql.insert_before(0, b"a0").unwrap();
        check(&ql);
        assert_eq!(entries(&ql)[0], bytes("a0"));
        assert_eq!(ql.len(), 6);
    }

    #[test]
    fn rotate_moves_tail_to_head() {
        let mut ql = QuickList::with_options(Options {
            fill: 5,
            compress_depth: 0,
        });
        for i in 0..15 {
            ql.push_back(format!("{}", i).as_bytes()).unwrap();
        }
        assert_eq!(ql.node_count(), 3);

        ql.rotate().unwrap();
        check(&ql);
        assert_eq!(ql.len(), 15);
        let got = entries(&ql);
        assert_eq!(got[0], Value::Int(14));
        assert_eq!(got[1], Value::Int(0));
        assert_eq!(got[14], Value::Int(13));

        // Rotating the rest of the old tail node away frees it.
        let nodes_before = ql.node_count();
        for _ in 0..4 {
            ql.rotate().unwrap();
        }
        check(&ql);
        assert_eq!(ql.len(), 15);
        assert!(ql.node_count() <= nodes_before + 1);
        let got = entries(&ql);
        assert_eq!(got[0], Value::Int(10));
        assert_eq!(got[4], Value::Int(14));
        assert_eq!(got[5], Value::Int(0));

        // Degenerate cases.
        let mut one = QuickList::new();
        one.push_back(b"solo").unwrap();
        one.rotate().unwrap();
        assert_eq!(entries(&one), vec![bytes("solo")]);
        let mut two = QuickList::new();
        two.push_back(b"x").unwrap();
        two.push_back(b"y").unwrap();
        two.rotate().unwrap();
        assert_eq!(entries(&two), vec![bytes("y"), bytes("x")]);
    }

    #[test]
    fn compression_policy_keeps_ends_raw() {
        let mut ql = QuickList::with_options(Options {
            fill: 1,
            compress_depth: 2,
        });
        let payload = vec![b'r'; 100];
        for _ in 0..10 {
            ql.push_back(&payload).unwrap();
        }
        check(&ql);
        assert_eq!(ql.node_count(), 10);
        let states: Vec<bool> = ql.raw_nodes().map(|n| n.compressed).collect();
        assert_eq!(states[0..2], [false, false]);
        assert_eq!(states[8..10], [false, false]);
        assert!(states[2..8].iter().all(|&c| c), "interior nodes compressed");

        // Reads decompress transiently and stay correct.
        for i in 0..10 {
            assert_eq!(ql.get(i), Some(Value::Bytes(payload.clone())));
        }
        check(&ql);
        // Popping keeps the margins raw.
        ql.pop_front().unwrap();
        ql.pop_back().unwrap();
        check(&ql);
    }

    #[test]
    fn incompressible_small_nodes_mark_attempted() {
        let mut ql = QuickList::with_options(Options {
            fill: 1,
            compress_depth: 1,
        });
        for i in 0..6 {
            ql.push_back(format!("t{}", i).as_bytes()).unwrap();
        }
        check(&ql);
        // Interior nodes are tiny (< 48 bytes): never compressed, but the
        // attempt is recorded.
        let mut i = ql.head;
        let mut interior_attempted = 0;
        let mut pos = 0;
        while i != NIL {
            let n = ql.node(i);
            assert_eq!(n.encoding, Encoding::Raw);
            if pos > 0 && pos < 5 && n.attempted_compress {
                interior_attempted += 1;
            }
            pos += 1;
            i = n.next;
        }
        assert!(interior_attempted > 0);
    }

    #[test]
    fn remove_range_spanning_nodes() {
        let mut ql = QuickList::with_options(Options {
            fill: 5,
            compress_depth: 0,
        });
        for i in 0..25 {
            ql.push_back(format!("{}", i).as_bytes()).unwrap();
        }
        assert_eq!(ql.remove_range(3, 12), 12);
        check(&ql);
        assert_eq!(ql.len(), 13);
        let got = entries(&ql);
        assert_eq!(got[0..3], [Value::Int(0), Value::Int(1), Value::Int(2)]);
        assert_eq!(got[3], Value::Int(15));

        // Negative start; count clamps at the end of the list.
        assert_eq!(ql.remove_range(-4, 100), 4);
        check(&ql);
        assert_eq!(ql.len(), 9);
        assert_eq!(*entries(&ql).last().unwrap(), Value::Int(20));

        assert_eq!(ql.remove_range(50, 3), 0);
        assert_eq!(ql.remove_range(0, 100), 9);
        assert!(ql.is_empty());
        assert_eq!(ql.node_count(), 0);
    }

    #[test]
    fn replace_in_place_and_on_compressed_nodes() {
        let mut ql = QuickList::with_options(Options {
            fill: 1,
            compress_depth: 1,
        });
        let payload = vec![b'q'; 80];
        for _ in 0..8 {
            ql.push_back(&payload).unwrap();
        }
        check(&ql);
        assert!(ql.replace(4, b"swapped-in").unwrap());
        check(&ql);
        assert_eq!(ql.get(4), Some(bytes("swapped-in")));
        assert_eq!(ql.len(), 8);
        assert!(!ql.replace(100, b"nope").unwrap());
    }

    #[test]
    fn iteration_both_directions_and_from_index() {
        let mut ql = QuickList::with_options(Options {
            fill: 3,
            compress_depth: 0,
        });
        for i in 0..10 {
            ql.push_back(format!("{}", i).as_bytes()).unwrap();
        }
        let fwd: Vec<Value> = ql.iter(Direction::Forward).collect();
        let mut back: Vec<Value> = ql.iter(Direction::Backward).collect();
        back.reverse();
        assert_eq!(fwd, back);
        assert_eq!(fwd.len(), 10);
        assert_eq!(fwd[7], Value::Int(7));

        let from: Vec<Value> = ql.iter_from(Direction::Forward, 7).unwrap().collect();
        assert_eq!(from, vec![Value::Int(7), Value::Int(8), Value::Int(9)]);
        let rev_from: Vec<Value> = ql.iter_from(Direction::Backward, 2).unwrap().collect();
        assert_eq!(rev_from, vec![Value::Int(2), Value::Int(1), Value::Int(0)]);
        assert!(ql.iter_from(Direction::Forward, 10).is_none());
    }

    #[test]
    fn iter_mut_removes_while_walking() {
        let mut ql = QuickList::with_options(Options {
            fill: 4,
            compress_depth: 0,
        });
        for i in 0..20 {
            ql.push_back(format!("{}", i).as_bytes()).unwrap();
        }
        {
            let mut it = ql.iter_mut(Direction::Forward);
            while let Some(v) = it.next_entry() {
                if let Value::Int(n) = v {
                    if n % 2 == 0 {
                        assert_eq!(it.remove_current(), Some(Value::Int(n)));
                    }
                }
            }
        }
        check(&ql);
        assert_eq!(ql.len(), 10);
        assert_eq!(
            entries(&ql),
            (0..20)
                .filter(|n| n % 2 == 1)
                .map(Value::Int)
                .collect::<Vec<_>>()
        );

        // Backward direction, removing everything, frees all nodes.
        {
            let mut it = ql.iter_mut(Direction::Backward);
            while it.next_entry().is_some() {
                it.remove_current();
            }
        }
        assert!(ql.is_empty());
        assert_eq!(ql.node_count(), 0);
    }

    #[test]
    fn adopt_and_explode_ziplists() {
        let mut zl = ZipList::new();
        for s in [&b"x"[..], b"y", b"42"] {
            zl.push(s, End::Tail).unwrap();
        }

        let mut ql = QuickList::new();
        ql.push_back(b"pre").unwrap();
        ql.append_ziplist(zl.clone());
        check(&ql);
        assert_eq!(ql.len(), 4);
        assert_eq!(ql.node_count(), 2, "adopted blob becomes its own node");
        assert_eq!(ql.get(3), Some(Value::Int(42)));

        let ql2 = QuickList::from_ziplist(Options::default(), zl).unwrap();
        check(&ql2);
        assert_eq!(
            entries(&ql2),
            vec![bytes("x"), bytes("y"), Value::Int(42)]
        );
        assert_eq!(ql2.node_count(), 1, "exploded entries re-pack normally");

        ql.extend_from_ziplist(ZipList::new()).unwrap();
        assert_eq!(ql.len(), 4);
    }

    #[test]
    fn clone_is_deep() {
        let mut ql = QuickList::with_options(Options {
            fill: 1,
            compress_depth: 1,
        });
        let payload = vec![b'c'; 90];
        for _ in 0..8 {
            ql.push_back(&payload).unwrap();
        }
        let copy = ql.clone();
        check(&copy);
        assert_eq!(entries(&copy), entries(&ql));

        let mut copy = copy;
        copy.pop_front();
        assert_eq!(copy.len(), 7);
        assert_eq!(ql.len(), 8, "original untouched");
    }

    #[test]
    fn raw_nodes_expose_persistable_blobs() {
        let mut ql = QuickList::with_options(Options {
            fill: 1,
            compress_depth: 1,
        });
        let payload = vec![b'w'; 120];
        for _ in 0..6 {
            ql.push_back(&payload).unwrap();
        }
        check(&ql);
        let mut total = 0;
        for n in ql.raw_nodes() {
            total += n.count;
            let raw = if n.compressed {
                lzf::decompress(n.data, n.raw_size).unwrap()
            } else {
                assert_eq!(n.raw_size, n.data.len());
                n.data.to_vec()
            };
            let zl = ZipList::from_bytes(raw).unwrap();
            assert_eq!(zl.len(), n.count);
        }
        assert_eq!(total, ql.len());
    }

    #[test]
    fn oversized_single_entry_gets_its_own_node() {
        let mut ql = QuickList::with_options(Options {
            fill: -1,
            compress_depth: 0,
        });
        ql.push_back(b"small").unwrap();
        let huge = vec![b'h'; 10_000];
        assert!(ql.push_back(&huge).unwrap(), "over-limit entry forces a node");
        check(&ql);
        assert_eq!(ql.get(1), Some(Value::Bytes(huge)));
    }

    #[test]
    fn options_serde_round_trip() {
        let opts = Options {
            fill: -3,
            compress_depth: 2,
        };
        let json = serde_json::to_string(&opts).unwrap();
        let back: Options = serde_json::from_str(&json).unwrap();
        assert_eq!(opts, back);
        assert!(
            serde_json::from_str::<Options>(r#"{"fill":1,"compress_depth":0,"typo":3}"#).is_err(),
            "unknown config keys are rejected"
        );
    }
}
