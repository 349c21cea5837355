//! # Buffer Pool
//!
//! A bounded, pin-aware LRU cache of resident leaf pages that doubles as the
//! allocator of page slots in the page file.
//!
//! ## Caching and Pinning
//!
//! Resident leaves are shared out as `Rc<RefCell<LeafPage>>` handles. The
//! pool keeps one reference itself, so a page is pinned exactly when its
//! strong count exceeds one. Eviction scans from the cold end of the
//! recency order, skips pinned pages, and writes dirty victims back to the
//! page file. When every resident page is pinned the pool reports
//! exhaustion instead of waiting; there is no queueing in a single-threaded
//! engine.
//!
//! Only `get_page` and `get_new_page` touch recency; `query_page` and
//! `flush` deliberately leave the LRU order alone.
//!
//! ## Slot Allocation
//!
//! New pages prefer the `empty_pages_start` frontier while it lies below the
//! file length, then the discarded list, and finally extend the file by one
//! page. Discarding returns a slot to the frontier when it is contiguous
//! with it, otherwise to the discarded list. The frontier and the list are
//! persisted in the page-0 header (see [`super::header`]).

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use eyre::{bail, ensure, Result};
use hashbrown::HashSet;
use lru::LruCache;
use tracing::{debug, trace};

use super::header::PoolHeader;
use super::leaf::LeafPage;
use super::pagefile::PageFile;
use crate::config::PageGeometry;

/// Shared handle to a resident leaf. Holding a clone outside the pool pins
/// the page against eviction.
pub type PageSlot = Rc<RefCell<LeafPage>>;

pub struct BufferPool {
    file: PageFile,
    geometry: PageGeometry,
    max_pages: usize,
    /// Recency order only; capacity is enforced by `make_room`, because
    /// strict LRU must skip pinned pages.
    cache: LruCache<u64, PageSlot>,
    empty_pages_start: u64,
    discarded: Vec<u64>,
    discarded_set: HashSet<u64>,
    scratch: Vec<u8>,
}

impl BufferPool {
    /// Opens (or creates) the page file and restores the allocator state
    /// from the page-0 header.
    pub fn open<P: AsRef<Path>>(
        path: P,
        geometry: PageGeometry,
        max_pages: usize,
    ) -> Result<Self> {
        ensure!(max_pages >= 4, "max_pages must be at least 4");

        let (mut file, created) = PageFile::open(path, geometry.page_size)?;
        let mut scratch = vec![0u8; geometry.page_size];

        let (empty_pages_start, discarded) = if created {
            (geometry.page_size as u64, Vec::new())
        } else {
            file.read_page(0, &mut scratch)?;
            PoolHeader::decode(&scratch)?
        };

        ensure!(
            empty_pages_start != 0 && empty_pages_start % geometry.page_size as u64 == 0,
            "pool header frontier {} is not page-aligned",
            empty_pages_start
        );
        let mut discarded_set = HashSet::with_capacity(discarded.len());
        for &offset in &discarded {
            ensure!(
                offset != 0 && offset % geometry.page_size as u64 == 0,
                "discarded offset {} is not page-aligned",
                offset
            );
            ensure!(
                discarded_set.insert(offset),
                "discarded offset {} listed twice in pool header",
                offset
            );
        }

        Ok(Self {
            file,
            geometry,
            max_pages,
            cache: LruCache::unbounded(),
            empty_pages_start,
            discarded,
            discarded_set,
            scratch,
        })
    }

    pub fn max_pages(&self) -> usize {
        self.max_pages
    }

    /// Number of resident pages.
    pub fn resident(&self) -> usize {
        self.cache.len()
    }

    pub fn empty_pages_start(&self) -> u64 {
        self.empty_pages_start
    }

    pub fn discarded(&self) -> &[u64] {
        &self.discarded
    }

    /// Whether the page at `offset` is currently resident. Does not touch
    /// the recency order.
    pub fn query_page(&self, offset: u64) -> bool {
        self.cache.contains(&offset)
    }

    fn check_offset(&self, offset: u64) -> Result<()> {
        ensure!(
            offset != 0 && offset % self.geometry.page_size as u64 == 0,
            "page offset {} is not a non-zero multiple of the page size",
            offset
        );
        ensure!(
            offset + self.geometry.page_size as u64 <= self.file.len(),
            "page offset {} is beyond the page file",
            offset
        );
        Ok(())
    }

    /// Returns the resident handle for `offset`, loading the page from disk
    /// if necessary. Promotes the page to the front of the recency order.
    pub fn get_page(&mut self, offset: u64) -> Result<PageSlot> {
        self.check_offset(offset)?;

        if let Some(slot) = self.cache.get(&offset) {
            return Ok(Rc::clone(slot));
        }

        self.make_room()?;
        self.file.read_page(offset, &mut self.scratch)?;
        let page = LeafPage::decode(self.geometry, offset, &self.scratch)?;
        let slot = Rc::new(RefCell::new(page));
        self.cache.put(offset, Rc::clone(&slot));
        trace!(offset, "loaded leaf page");
        Ok(slot)
    }

    /// Allocates a page slot and constructs a fresh empty leaf in memory
    /// with `next_offset = next_hint`, without reading the disk. Returns the
    /// handle and the chosen byte offset.
    pub fn get_new_page(&mut self, next_hint: u64) -> Result<(PageSlot, u64)> {
        self.make_room()?;

        let page_size = self.geometry.page_size as u64;
        let offset = if self.empty_pages_start + page_size <= self.file.len() {
            let offset = self.empty_pages_start;
            self.empty_pages_start += page_size;
            offset
        } else if let Some(offset) = self.discarded.pop() {
            self.discarded_set.remove(&offset);
            offset
        } else {
            let offset = self.file.grow()?;
            self.empty_pages_start = offset + page_size;
            offset
        };

        debug_assert!(!self.cache.contains(&offset), "allocated a resident slot");
        let page = LeafPage::new_empty(self.geometry, offset, next_hint);
        let slot = Rc::new(RefCell::new(page));
        self.cache.put(offset, Rc::clone(&slot));
        debug!(offset, "allocated leaf page");
        Ok((slot, offset))
    }

    /// Drops the page from the cache without write-back and returns its slot
    /// to the allocator: to the frontier when contiguous with it, otherwise
    /// to the discarded list. The caller must have released every handle.
    pub fn discard_page(&mut self, offset: u64) -> Result<()> {
        self.check_offset(offset)?;
        let page_size = self.geometry.page_size as u64;
        ensure!(
            offset < self.empty_pages_start,
            "page offset {} was never allocated (frontier {})",
            offset,
            self.empty_pages_start
        );
        ensure!(
            !self.discarded_set.contains(&offset),
            "page offset {} is already discarded",
            offset
        );

        if let Some(slot) = self.cache.peek(&offset) {
            ensure!(
                Rc::strong_count(slot) == 1,
                "discarding pinned page at offset {}",
                offset
            );
            self.cache.pop(&offset);
        }

        if offset + page_size == self.empty_pages_start {
            self.empty_pages_start = offset;
        } else {
            self.discarded.push(offset);
            self.discarded_set.insert(offset);
        }
        debug!(offset, frontier = self.empty_pages_start, "discarded leaf page");
        Ok(())
    }

    /// Evicts least-recently-used unpinned pages until a slot is free,
    /// writing dirty victims back. Fails when every resident page is pinned.
    fn make_room(&mut self) -> Result<()> {
        while self.cache.len() >= self.max_pages {
            let victim = self
                .cache
                .iter()
                .rev()
                .find(|(_, slot)| Rc::strong_count(slot) == 1)
                .map(|(offset, _)| *offset);

            let Some(offset) = victim else {
                bail!(
                    "buffer pool exhausted: all {} resident pages are pinned",
                    self.cache.len()
                );
            };

            if let Some(slot) = self.cache.pop(&offset) {
                let page = slot.borrow();
                if page.is_dirty() {
                    page.encode_into(&mut self.scratch)?;
                    self.file.write_page(offset, &self.scratch)?;
                }
                trace!(offset, "evicted leaf page");
            }
        }
        Ok(())
    }

    /// Writes back every dirty resident page and persists the allocator
    /// header. Leaves residency and recency untouched.
    pub fn flush(&mut self) -> Result<()> {
        let resident: Vec<(u64, PageSlot)> = self
            .cache
            .iter()
            .map(|(offset, slot)| (*offset, Rc::clone(slot)))
            .collect();
        for (offset, slot) in resident {
            let mut page = slot.borrow_mut();
            if page.is_dirty() {
                page.encode_into(&mut self.scratch)?;
                self.file.write_page(offset, &self.scratch)?;
                page.clear_dirty();
            }
        }

        PoolHeader::encode(&mut self.scratch, self.empty_pages_start, &self.discarded)?;
        self.file.write_page(0, &self.scratch)?;
        self.file.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{StoreConfig, NO_NEXT_LEAF};
    use tempfile::tempdir;

    const PAGE: u64 = 256;

    fn geometry() -> PageGeometry {
        StoreConfig {
            page_size: PAGE as usize,
            record_size: 16,
            key_size: 4,
            fanout: 4,
            multiset: false,
            max_pages: 4,
        }
        .geometry()
    }

    fn open_pool(dir: &tempfile::TempDir, max_pages: usize) -> BufferPool {
        BufferPool::open(dir.path().join("pages.bin"), geometry(), max_pages).unwrap()
    }

    fn record(key: u32) -> Vec<u8> {
        let mut r = vec![0u8; 16];
        r[..4].copy_from_slice(&key.to_be_bytes());
        r
    }

    #[test]
    fn fresh_pool_starts_after_header_page() {
        let dir = tempdir().unwrap();

        let pool = open_pool(&dir, 4);

        assert_eq!(pool.empty_pages_start(), PAGE);
        assert!(pool.discarded().is_empty());
        assert_eq!(pool.resident(), 0);
    }

    #[test]
    fn get_new_page_allocates_sequential_offsets() {
        let dir = tempdir().unwrap();
        let mut pool = open_pool(&dir, 4);

        let (_, first) = pool.get_new_page(NO_NEXT_LEAF).unwrap();
        let (_, second) = pool.get_new_page(NO_NEXT_LEAF).unwrap();

        assert_eq!(first, PAGE);
        assert_eq!(second, 2 * PAGE);
        assert_eq!(pool.empty_pages_start(), 3 * PAGE);
    }

    #[test]
    fn new_page_carries_next_hint_without_disk_read() {
        let dir = tempdir().unwrap();
        let mut pool = open_pool(&dir, 4);

        let (slot, _) = pool.get_new_page(7 * PAGE).unwrap();

        assert_eq!(slot.borrow().next_offset(), 7 * PAGE);
        assert!(slot.borrow().is_empty());
    }

    #[test]
    fn eviction_writes_back_and_reload_roundtrips() {
        let dir = tempdir().unwrap();
        let mut pool = open_pool(&dir, 4);

        let (slot, offset) = pool.get_new_page(NO_NEXT_LEAF).unwrap();
        slot.borrow_mut().insert(&record(42), true).unwrap();
        drop(slot);

        // Fill the pool past capacity so the first page is evicted.
        for _ in 0..4 {
            let (slot, _) = pool.get_new_page(NO_NEXT_LEAF).unwrap();
            drop(slot);
        }
        assert!(!pool.query_page(offset));

        let slot = pool.get_page(offset).unwrap();
        let page = slot.borrow();
        assert_eq!(page.len(), 1);
        assert!(page.search(&42u32.to_be_bytes()).is_some());
    }

    #[test]
    fn capacity_with_unpinned_pages_evicts_lru() {
        let dir = tempdir().unwrap();
        let mut pool = open_pool(&dir, 4);

        let mut offsets = Vec::new();
        for _ in 0..4 {
            let (slot, offset) = pool.get_new_page(NO_NEXT_LEAF).unwrap();
            drop(slot);
            offsets.push(offset);
        }
        assert_eq!(pool.resident(), 4);

        // Touch the oldest so the second-oldest becomes the LRU victim.
        let slot = pool.get_page(offsets[0]).unwrap();
        drop(slot);

        let (_, extra) = pool.get_new_page(NO_NEXT_LEAF).unwrap();

        assert_eq!(pool.resident(), 4);
        assert!(pool.query_page(offsets[0]));
        assert!(!pool.query_page(offsets[1]));
        assert!(pool.query_page(extra));
    }

    #[test]
    fn all_pages_pinned_fails_with_pool_exhausted() {
        let dir = tempdir().unwrap();
        let mut pool = open_pool(&dir, 4);

        let mut pins = Vec::new();
        for _ in 0..4 {
            let (slot, _) = pool.get_new_page(NO_NEXT_LEAF).unwrap();
            pins.push(slot);
        }

        let result = pool.get_new_page(NO_NEXT_LEAF);

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("exhausted"));

        // Releasing one pin makes allocation succeed again.
        pins.pop();
        assert!(pool.get_new_page(NO_NEXT_LEAF).is_ok());
    }

    #[test]
    fn discard_tail_page_reclaims_frontier() {
        let dir = tempdir().unwrap();
        let mut pool = open_pool(&dir, 4);

        let (_, first) = pool.get_new_page(NO_NEXT_LEAF).unwrap();
        let (_, second) = pool.get_new_page(NO_NEXT_LEAF).unwrap();
        assert_eq!(pool.empty_pages_start(), 3 * PAGE);

        pool.discard_page(second).unwrap();

        assert_eq!(pool.empty_pages_start(), 2 * PAGE);
        assert!(pool.discarded().is_empty());

        pool.discard_page(first).unwrap();
        assert_eq!(pool.empty_pages_start(), PAGE);
    }

    #[test]
    fn discard_interior_page_goes_to_list_and_is_reused() {
        let dir = tempdir().unwrap();
        let mut pool = open_pool(&dir, 4);

        let (_, first) = pool.get_new_page(NO_NEXT_LEAF).unwrap();
        let (_, _second) = pool.get_new_page(NO_NEXT_LEAF).unwrap();

        pool.discard_page(first).unwrap();
        assert_eq!(pool.discarded(), &[first]);

        // Frontier equals the file length, so the discarded slot is reused.
        let (_, reused) = pool.get_new_page(NO_NEXT_LEAF).unwrap();
        assert_eq!(reused, first);
        assert!(pool.discarded().is_empty());
    }

    #[test]
    fn discard_rejects_double_discard_and_unknown_pages() {
        let dir = tempdir().unwrap();
        let mut pool = open_pool(&dir, 4);

        let (_, first) = pool.get_new_page(NO_NEXT_LEAF).unwrap();
        let (_, _second) = pool.get_new_page(NO_NEXT_LEAF).unwrap();
        pool.discard_page(first).unwrap();

        assert!(pool.discard_page(first).is_err());
        assert!(pool.discard_page(0).is_err());
        assert!(pool.discard_page(100).is_err());
        assert!(pool.discard_page(50 * PAGE).is_err());
    }

    #[test]
    fn discard_of_pinned_page_is_an_error() {
        let dir = tempdir().unwrap();
        let mut pool = open_pool(&dir, 4);

        let (slot, offset) = pool.get_new_page(NO_NEXT_LEAF).unwrap();

        let result = pool.discard_page(offset);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("pinned"));
        drop(slot);
    }

    #[test]
    fn get_page_rejects_header_and_unaligned_offsets() {
        let dir = tempdir().unwrap();
        let mut pool = open_pool(&dir, 4);

        assert!(pool.get_page(0).is_err());
        assert!(pool.get_page(PAGE / 2).is_err());
    }

    #[test]
    fn flush_persists_header_across_reopen() {
        let dir = tempdir().unwrap();
        let first;
        {
            let mut pool = open_pool(&dir, 4);
            let (_, a) = pool.get_new_page(NO_NEXT_LEAF).unwrap();
            let (_, _b) = pool.get_new_page(NO_NEXT_LEAF).unwrap();
            let (_, _c) = pool.get_new_page(NO_NEXT_LEAF).unwrap();
            pool.discard_page(a).unwrap();
            first = a;
            pool.flush().unwrap();
        }

        let pool = open_pool(&dir, 4);

        assert_eq!(pool.empty_pages_start(), 4 * PAGE);
        assert_eq!(pool.discarded(), &[first]);
    }

    #[test]
    fn flush_persists_dirty_pages_across_reopen() {
        let dir = tempdir().unwrap();
        let offset;
        {
            let mut pool = open_pool(&dir, 4);
            let (slot, o) = pool.get_new_page(NO_NEXT_LEAF).unwrap();
            slot.borrow_mut().insert(&record(7), true).unwrap();
            offset = o;
            pool.flush().unwrap();
        }

        let mut pool = open_pool(&dir, 4);
        let slot = pool.get_page(offset).unwrap();

        assert!(slot.borrow().search(&7u32.to_be_bytes()).is_some());
    }

    #[test]
    fn reopen_rejects_corrupt_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pages.bin");
        {
            let mut pool = BufferPool::open(&path, geometry(), 4).unwrap();
            pool.flush().unwrap();
        }
        // Misalign the frontier.
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[0] = 7;
        std::fs::write(&path, bytes).unwrap();

        assert!(BufferPool::open(&path, geometry(), 4).is_err());
    }
}
