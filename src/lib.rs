//! Compact in-memory container primitives for the value layer of a
//! key/value store.
//!
//! Most collections in a typical key/value workload are small: a hash with
//! a dozen fields, a list with a handful of items, a set of a few small
//! integers. This crate holds such values in representations optimized for
//! exactly that case — single flat byte buffers with self-describing entry
//! encodings — and provides the asymptotically efficient structures they
//! are promoted to once they grow. An O(N) lookup over twenty packed
//! entries beats a pointer-chasing tree both in bytes and in cache misses;
//! once N stops being small, the host promotes the value and the packed
//! form retires.
//!
//! The containers:
//!
//! * [`DynStr`] — growable, binary-safe byte string with an append-friendly
//!   preallocation policy.
//! * [`IntSet`] — sorted packed integer set with automatic 16→32→64-bit
//!   element promotion.
//! * [`ZipList`] — packed, doubly traversable list of small strings and
//!   integers.
//! * [`ZipMap`] — packed key→value pairs with the same philosophy.
//! * [`Dict`] — chained hash map with incremental two-table rehashing,
//!   resize-stable scan cursors, and misuse-detecting iterators.
//! * [`QuickList`] — doubly linked list of ziplist nodes with bounded node
//!   sizes and LZF compression of interior nodes.
//!
//! The `ZipList`, `ZipMap`, and `IntSet` buffer layouts are wire formats:
//! `as_bytes()` is directly usable as a snapshot image and each type has a
//! checked `from_bytes` loader. Everything else is in-memory only.
//!
//! ```
//! use packval::{End, ValueRef, ZipList};
//!
//! let mut zl = ZipList::new();
//! zl.push(b"user:1000", End::Tail)?;
//! zl.push(b"42", End::Tail)?;
//! // "42" parses as an integer and is stored in two bytes.
//! let at = zl.index(1).unwrap();
//! assert_eq!(zl.get(at), Some(ValueRef::Int(42)));
//! # Ok::<(), packval::Error>(())
//! ```
//!
//! All containers are single-owner: no internal synchronization, no
//! suspension points. Arrange sharding externally if you need parallelism.

pub mod dict;
pub mod dynstr;
pub mod error;
pub mod hash;
pub mod intset;
pub mod lzf;
pub mod quicklist;
pub mod zipmap;
pub mod ziplist;

pub use self::dict::{
    resize_enabled, set_resize_enabled, BytesDict, BytesType, CaseFoldType, Dict, DictType,
    SafeIter,
};
pub use self::dynstr::{DynStr, MAX_PREALLOC};
pub use self::error::{Error, Result};
pub use self::hash::{hash_seed, set_hash_seed};
pub use self::intset::IntSet;
pub use self::quicklist::{Direction, Options as QuickListOptions, QuickList, RawNode};
pub use self::zipmap::ZipMap;
pub use self::ziplist::{End, Value, ValueRef, ZipList};
