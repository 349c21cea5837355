//! # leafstore - Disk-Backed Ordered Fixed-Record Storage
//!
//! leafstore is a single-threaded ordered-key storage engine for fixed-width
//! records. The separator structure lives in memory while the record payload
//! lives in fixed-size leaf pages persisted in a single page file, cached
//! through a bounded LRU buffer pool. It targets data sets too large for
//! memory whose working set fits in a bounded page cache.
//!
//! ## Quick Start
//!
//! ```ignore
//! use leafstore::{Store, StoreConfig};
//!
//! let config = StoreConfig {
//!     page_size: 4096,
//!     record_size: 200,
//!     key_size: 20,
//!     fanout: 4,
//!     multiset: false,
//!     max_pages: 8,
//! };
//!
//! let mut store = Store::open("data/pages.bin", "data/btree.bin", config)?;
//! store.insert(&record)?;
//! let cursor = store.search_key(&key)?;
//! store.close()?;
//! ```
//!
//! ## Architecture
//!
//! Three subsystems compose bottom-up:
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │        Engine API (Store)           │
//! ├──────────────────┬──────────────────┤
//! │    IndexTree     │     cursors      │
//! │ (in-memory sep.) │                  │
//! ├──────────────────┴──────────────────┤
//! │        BufferPool (LRU cache)       │
//! ├─────────────────────────────────────┤
//! │   LeafPage images + PageFile I/O    │
//! └─────────────────────────────────────┘
//! ```
//!
//! - [`storage`]: leaf pages, buffer pool, page file, pool header
//! - [`index`]: in-memory B-tree mapping separator keys to leaf pages
//! - [`Store`]: ordered insert, lookup, range scan, erase
//!
//! ## File Layout
//!
//! ```text
//! pages.bin    page 0: pool header; page N: one leaf image each
//! btree.bin    serialized separator tree, rewritten on close
//! ```
//!
//! Records compare byte-lexicographically on their first `key_size` bytes.
//! All persisted integers are little-endian.
//!
//! ## Concurrency
//!
//! None. A single engine instance owns both files for its lifetime and all
//! operations run to completion on the calling thread.

pub mod config;
pub mod index;
pub mod storage;
pub mod store;

pub use config::{PageGeometry, StoreConfig};
pub use index::{IndexTree, PageRef};
pub use storage::{BufferPool, LeafPage, PageFile};
pub use store::{Cursor, Scan, Store};
