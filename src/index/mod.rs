//! # Index Module
//!
//! The in-memory side of the engine: an ordered B-tree over *separators*,
//! where each separator names the minimum key of one leaf page and carries a
//! descriptor locating that leaf in the page file.
//!
//! ## Separators and Descriptors
//!
//! A descriptor is either `Real(page_index)` for a live leaf or
//! `Placeholder` for a leaf that does not exist yet and is created on first
//! touch. The leftmost entry is the *sentinel*: seeded with the all-zero key
//! and a placeholder, it catches every key below the first real separator.
//! The sentinel's key is not required to track its leaf's minimum; every
//! other separator's key always equals its leaf's minimum key.
//!
//! The tree never points into page storage. Leaves are referenced only by
//! numeric page index, so the leaf chain's forward links cannot form an
//! ownership cycle with the index.
//!
//! ## Shape
//!
//! A classic B-tree of minimum degree `fanout`: every node holds at most
//! `2 * fanout - 1` separators, every non-root node at least `fanout - 1`.
//! Entries are totally ordered by `(key bytes, page rank)` with
//! `Placeholder` ranking below every real page, which keeps duplicate keys
//! (multiset mode) deterministic.
//!
//! ## Persistence
//!
//! The tree serializes to a sidecar file rewritten on close and re-read on
//! startup; see [`persist`] for the format.

mod node;
pub mod persist;

pub use node::{IndexTree, PageRef, SepKey, Separator};
