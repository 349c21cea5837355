//! # Store - the Engine API
//!
//! `Store` ties the three subsystems together: it routes every operation
//! through the [`IndexTree`] to a leaf page index, asks the [`BufferPool`]
//! for the resident [`LeafPage`], and delegates the payload work to the
//! leaf. Structural maintenance (split, merge, borrow, placeholder
//! materialization) happens here, with the separator tree updated in the
//! same step.
//!
//! ## Routing
//!
//! Point operations route through `find_page` (the rightmost separator at
//! or below the key); range scans start at `find_page_lb` (strictly below,
//! so equal-key runs are never skipped) and then walk the leaf chain's
//! `next_offset` links. The chain, not the tree, decides physical
//! adjacency: merge and borrow always act on `next_offset`'s leaf.
//!
//! ## Split
//!
//! A full leaf splits into a fresh page allocated with the old forward link
//! as its next-hint; the promote record's key becomes a new separator and
//! the insert retries into whichever half owns the record.
//!
//! ## Erase
//!
//! After the record is removed the successor record is captured, then the
//! structural pass runs: an empty leaf is discarded (its separator erased,
//! or reverted to the placeholder sentinel, and the predecessor's forward
//! link repaired); a changed minimum refreshes the separator key; an
//! underfull leaf merges with or borrows from its chain successor. The
//! cursor handed back is re-located afterwards, so it is never stale.
//!
//! ## Cursors
//!
//! A [`Cursor`] is a plain `(page offset, slot)` pair. It holds no page
//! handle; every operation re-acquires the page, which pins it only for
//! that operation's duration. Cursors are invalidated by writes other than
//! the one that returned them.
//!
//! ## Multiset Caveat
//!
//! With duplicate keys an equal-key run may span several leaves. Exact
//! full-record search and erase inspect the run's rightmost-separator leaf,
//! as the separator disambiguation by page index dictates; a payload living
//! in an earlier leaf of the run is reported absent. Key-based operations
//! (`search_key`, `search_lb`, `search_ub`, scans) walk the chain and see
//! every record.

use std::path::{Path, PathBuf};

use eyre::{bail, ensure, eyre, Result};
use tracing::{debug, warn};

use crate::config::{PageGeometry, StoreConfig, NO_NEXT_LEAF};
use crate::index::{persist, IndexTree, PageRef, SepKey};
use crate::storage::{BufferPool, PageSlot};

/// Position of one record: the leaf's byte offset and the slot within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    offset: u64,
    slot: usize,
}

pub struct Store {
    pool: BufferPool,
    tree: IndexTree,
    config: StoreConfig,
    geometry: PageGeometry,
    index_path: PathBuf,
    record_count: u64,
    closed: bool,
}

impl Store {
    /// Opens the engine over its two files, creating them when absent. The
    /// configuration must match the one an existing index file was written
    /// with.
    pub fn open<P: AsRef<Path>, Q: AsRef<Path>>(
        pages_path: P,
        index_path: Q,
        config: StoreConfig,
    ) -> Result<Self> {
        config.validate()?;
        let geometry = config.geometry();
        let index_path = index_path.as_ref().to_path_buf();
        let (tree, record_count) = persist::read_index(&index_path, &config)?;
        let pool = BufferPool::open(pages_path, geometry, config.max_pages)?;

        Ok(Self {
            pool,
            tree,
            config,
            geometry,
            index_path,
            record_count,
            closed: false,
        })
    }

    /// Live records in the store.
    pub fn len(&self) -> u64 {
        self.record_count
    }

    pub fn is_empty(&self) -> bool {
        self.record_count == 0
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// The separator tree, for diagnostics.
    pub fn index(&self) -> &IndexTree {
        &self.tree
    }

    /// The buffer pool, for diagnostics.
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    fn key_of<'a>(&self, record: &'a [u8]) -> &'a [u8] {
        &record[..self.config.key_size]
    }

    fn check_record(&self, record: &[u8]) -> Result<()> {
        ensure!(
            record.len() == self.config.record_size,
            "record is {} bytes, record size is {}",
            record.len(),
            self.config.record_size
        );
        Ok(())
    }

    fn check_probe(&self, probe: &[u8]) -> Result<()> {
        ensure!(
            probe.len() == self.config.key_size || probe.len() == self.config.record_size,
            "probe is {} bytes, expected key ({}) or record ({}) width",
            probe.len(),
            self.config.key_size,
            self.config.record_size
        );
        Ok(())
    }

    /// Inserts a record. Returns the cursor of the stored record and whether
    /// a new record was written; in set mode a duplicate key yields the
    /// existing record's cursor and `false`.
    pub fn insert(&mut self, record: &[u8]) -> Result<(Option<Cursor>, bool)> {
        self.check_record(record)?;

        if self.tree.is_empty() {
            let (handle, offset) = self.pool.get_new_page(NO_NEXT_LEAF)?;
            let (slot, inserted) = handle.borrow_mut().insert(record, self.config.multiset)?;
            debug_assert!(inserted);
            let page_index = self.geometry.page_index(offset);
            self.tree
                .initialize_pages(self.key_of(record), page_index, PageRef::Placeholder)?;
            self.record_count += 1;
            let slot = slot.ok_or_else(|| eyre!("insert into fresh leaf returned no slot"))?;
            return Ok((Some(Cursor { offset, slot }), true));
        }

        let key = self.key_of(record);
        let (sep_key, page_ref) = self
            .tree
            .find_page(key)
            .ok_or_else(|| eyre!("separator tree lost its sentinel"))?;
        let (handle, offset) = self.leaf_for_insert(&sep_key, page_ref)?;

        let (slot, inserted) = handle.borrow_mut().insert(record, self.config.multiset)?;
        if inserted {
            self.record_count += 1;
            let slot = slot.ok_or_else(|| eyre!("leaf insert returned no slot"))?;
            return Ok((Some(Cursor { offset, slot }), true));
        }
        if let Some(existing) = slot {
            return Ok((Some(Cursor { offset, slot: existing }), false));
        }

        // Full leaf; a set-mode duplicate must still be reported without
        // splitting.
        if !self.config.multiset {
            let existing = handle.borrow().search(key);
            if let Some(existing) = existing {
                return Ok((Some(Cursor { offset, slot: existing }), false));
            }
        }

        self.split_and_insert(handle, offset, record)
    }

    /// Resolves the routed descriptor to a resident leaf, materializing the
    /// placeholder sentinel on first touch.
    fn leaf_for_insert(&mut self, sep_key: &SepKey, page_ref: PageRef) -> Result<(PageSlot, u64)> {
        match page_ref {
            PageRef::Real(index) => {
                let offset = self.geometry.page_offset(index);
                Ok((self.pool.get_page(offset)?, offset))
            }
            PageRef::Placeholder => {
                let next_hint = self
                    .tree
                    .successor(sep_key, PageRef::Placeholder)
                    .and_then(|(_, page)| match page {
                        PageRef::Real(index) => Some(self.geometry.page_offset(index)),
                        PageRef::Placeholder => None,
                    })
                    .unwrap_or(NO_NEXT_LEAF);
                let (handle, offset) = self.pool.get_new_page(next_hint)?;
                self.tree
                    .resolve_placeholder(sep_key, self.geometry.page_index(offset))?;
                debug!(offset, "materialized sentinel leaf");
                Ok((handle, offset))
            }
        }
    }

    fn split_and_insert(
        &mut self,
        handle: PageSlot,
        offset: u64,
        record: &[u8],
    ) -> Result<(Option<Cursor>, bool)> {
        let next_hint = handle.borrow().next_offset();
        let (right_handle, right_offset) = self.pool.get_new_page(next_hint)?;
        let promote = handle
            .borrow_mut()
            .split_with(&mut right_handle.borrow_mut());

        let right_index = self.geometry.page_index(right_offset);
        self.tree
            .insert_page(&promote[..self.config.key_size], PageRef::Real(right_index))?;

        // The record joins whichever half owns its position; placement uses
        // the same full-record order as the leaf itself.
        let (target, target_offset) = if record >= promote.as_slice() {
            (right_handle, right_offset)
        } else {
            (handle, offset)
        };
        let (slot, inserted) = target.borrow_mut().insert(record, self.config.multiset)?;
        if !inserted {
            return Ok((None, false));
        }
        self.record_count += 1;
        let slot = slot.ok_or_else(|| eyre!("post-split insert returned no slot"))?;
        Ok((Some(Cursor { offset: target_offset, slot }), true))
    }

    /// First record `>=` the probe (a key or a full record), walking the
    /// leaf chain from the range-scan entry leaf.
    pub fn search_lb(&mut self, probe: &[u8]) -> Result<Option<Cursor>> {
        self.check_probe(probe)?;
        let Some(start) = self.scan_entry_leaf(probe)? else {
            return Ok(None);
        };

        let mut offset = start;
        loop {
            let handle = self.pool.get_page(offset)?;
            let found = handle.borrow().search_lb(probe);
            if let Some(slot) = found {
                return Ok(Some(Cursor { offset, slot }));
            }
            let next = handle.borrow().next_offset();
            if next == NO_NEXT_LEAF {
                return Ok(None);
            }
            offset = next;
        }
    }

    /// First record `>` the probe.
    pub fn search_ub(&mut self, probe: &[u8]) -> Result<Option<Cursor>> {
        self.check_probe(probe)?;
        let Some(start) = self.scan_entry_leaf(probe)? else {
            return Ok(None);
        };

        let mut offset = start;
        loop {
            let handle = self.pool.get_page(offset)?;
            let found = handle.borrow().search_ub(probe);
            if let Some(slot) = found {
                return Ok(Some(Cursor { offset, slot }));
            }
            let next = handle.borrow().next_offset();
            if next == NO_NEXT_LEAF {
                return Ok(None);
            }
            offset = next;
        }
    }

    /// Exact match for the probe: a full record matches that record, a key
    /// matches the first record carrying it.
    pub fn search(&mut self, probe: &[u8]) -> Result<Option<Cursor>> {
        let Some(cursor) = self.search_lb(probe)? else {
            return Ok(None);
        };
        let record = self.record_at(cursor)?;
        let n = probe.len().min(record.len());
        Ok((probe[..n] == record[..n]).then_some(cursor))
    }

    /// Exact match by key.
    pub fn search_key(&mut self, key: &[u8]) -> Result<Option<Cursor>> {
        ensure!(
            key.len() == self.config.key_size,
            "key is {} bytes, key size is {}",
            key.len(),
            self.config.key_size
        );
        self.search(key)
    }

    /// The leaf where a scan for `probe` must start: the leaf of the
    /// strictly-preceding separator, so an equal-key run is entered at its
    /// head. An unmaterialized sentinel start skips ahead to the first real
    /// leaf.
    fn scan_entry_leaf(&mut self, probe: &[u8]) -> Result<Option<u64>> {
        let key = &probe[..self.config.key_size.min(probe.len())];
        let Some((sep_key, page_ref)) = self.tree.find_page_lb(key) else {
            return Ok(None);
        };
        match page_ref {
            PageRef::Real(index) => Ok(Some(self.geometry.page_offset(index))),
            PageRef::Placeholder => {
                let next = self
                    .tree
                    .successor(&sep_key, PageRef::Placeholder)
                    .and_then(|(_, page)| match page {
                        PageRef::Real(index) => Some(self.geometry.page_offset(index)),
                        PageRef::Placeholder => None,
                    });
                Ok(next)
            }
        }
    }

    /// Cursor to the first record in key order, `None` when the store is
    /// empty.
    pub fn begin(&mut self) -> Result<Option<Cursor>> {
        let Some((first_key, first_page)) = self.tree.first() else {
            return Ok(None);
        };
        let page = match first_page {
            PageRef::Real(index) => Some(index),
            PageRef::Placeholder => self
                .tree
                .successor(&first_key, PageRef::Placeholder)
                .and_then(|(_, page)| match page {
                    PageRef::Real(index) => Some(index),
                    PageRef::Placeholder => None,
                }),
        };
        let Some(index) = page else {
            return Ok(None);
        };

        let offset = self.geometry.page_offset(index);
        let handle = self.pool.get_page(offset)?;
        let slot = handle.borrow().min_slot();
        let slot = slot.ok_or_else(|| eyre!("leaf at offset {offset} is empty but indexed"))?;
        Ok(Some(Cursor { offset, slot }))
    }

    /// The record under a cursor.
    pub fn record_at(&mut self, cursor: Cursor) -> Result<Vec<u8>> {
        let handle = self.pool.get_page(cursor.offset)?;
        let page = handle.borrow();
        ensure!(
            page.is_occupied(cursor.slot),
            "invalid cursor: slot {} of leaf at offset {} holds no record",
            cursor.slot,
            cursor.offset
        );
        Ok(page.record(cursor.slot).to_vec())
    }

    /// Cursor to the in-order successor record, `None` at the end.
    pub fn advance(&mut self, cursor: Cursor) -> Result<Option<Cursor>> {
        let handle = self.pool.get_page(cursor.offset)?;
        let (next_slot, next_offset) = {
            let page = handle.borrow();
            ensure!(
                page.is_occupied(cursor.slot),
                "invalid cursor: slot {} of leaf at offset {} holds no record",
                cursor.slot,
                cursor.offset
            );
            (page.next_occupied(cursor.slot + 1), page.next_offset())
        };

        if let Some(slot) = next_slot {
            return Ok(Some(Cursor { offset: cursor.offset, slot }));
        }
        if next_offset == NO_NEXT_LEAF {
            return Ok(None);
        }
        let next_handle = self.pool.get_page(next_offset)?;
        let slot = next_handle.borrow().min_slot();
        let slot =
            slot.ok_or_else(|| eyre!("leaf at offset {next_offset} is empty but chained"))?;
        Ok(Some(Cursor { offset: next_offset, slot }))
    }

    /// Erases the exact record. Returns a cursor to its successor, `None`
    /// when the record is absent or was the last in order.
    pub fn erase(&mut self, record: &[u8]) -> Result<Option<Cursor>> {
        self.check_record(record)?;
        if self.tree.is_empty() {
            return Ok(None);
        }

        let key = self.key_of(record);
        let Some((sep_key, page_ref)) = self.tree.find_page(key) else {
            return Ok(None);
        };
        let PageRef::Real(index) = page_ref else {
            // The key routes below every live leaf; nothing to erase.
            return Ok(None);
        };

        let offset = self.geometry.page_offset(index);
        let handle = self.pool.get_page(offset)?;
        let erased = handle.borrow_mut().erase(record);
        let Some(successor_slot) = erased else {
            return Ok(None);
        };
        self.record_count -= 1;
        self.finish_erase(handle, sep_key, index, successor_slot)
    }

    /// Erases the record under the cursor. A stale cursor is an error.
    pub fn erase_at(&mut self, cursor: Cursor) -> Result<Option<Cursor>> {
        let handle = self.pool.get_page(cursor.offset)?;
        let index = self.geometry.page_index(cursor.offset);
        let min_key = {
            let page = handle.borrow();
            ensure!(
                page.is_occupied(cursor.slot),
                "invalid cursor: slot {} of leaf at offset {} holds no record",
                cursor.slot,
                cursor.offset
            );
            let min = page
                .min_slot()
                .ok_or_else(|| eyre!("occupied leaf has no minimum"))?;
            SepKey::from_slice(page.key(min))
        };
        // The sentinel's separator keeps the zero key, not the leaf minimum.
        let sep_key = match self.tree.first() {
            Some((key, PageRef::Real(first))) if first == index => key,
            _ => min_key,
        };

        let successor_slot = handle.borrow_mut().erase_slot(cursor.slot)?;
        self.record_count -= 1;
        self.finish_erase(handle, sep_key, index, successor_slot)
    }

    /// Post-erase structural pass. `sep_key` names the leaf's separator as
    /// of before the erase (for the sentinel, the sentinel key).
    fn finish_erase(
        &mut self,
        handle: PageSlot,
        sep_key: SepKey,
        index: u32,
        successor_slot: Option<usize>,
    ) -> Result<Option<Cursor>> {
        let offset = self.geometry.page_offset(index);

        // Capture the successor record before the structure shifts under it.
        let successor: Option<Vec<u8>> = match successor_slot {
            Some(slot) => Some(handle.borrow().record(slot).to_vec()),
            None => {
                let next = handle.borrow().next_offset();
                if next == NO_NEXT_LEAF {
                    None
                } else {
                    let next_handle = self.pool.get_page(next)?;
                    let page = next_handle.borrow();
                    page.min_slot().map(|slot| page.record(slot).to_vec())
                }
            }
        };

        let is_sentinel = self.tree.first() == Some((sep_key.clone(), PageRef::Real(index)));
        let len = handle.borrow().len();

        if len == 0 {
            let next = handle.borrow().next_offset();
            drop(handle);
            self.repair_predecessor_link(&sep_key, index, offset, next)?;
            self.pool.discard_page(offset)?;
            if is_sentinel {
                self.tree.unresolve_page(&sep_key, index)?;
            } else {
                self.tree.erase_page(&sep_key, PageRef::Real(index))?;
            }
        } else {
            let min_key = {
                let page = handle.borrow();
                let min = page
                    .min_slot()
                    .ok_or_else(|| eyre!("non-empty leaf has no minimum"))?;
                SepKey::from_slice(page.key(min))
            };
            if !is_sentinel && min_key != sep_key {
                // The erased record was the leaf minimum; refresh the
                // separator.
                self.tree.erase_page(&sep_key, PageRef::Real(index))?;
                self.tree.insert_page(&min_key, PageRef::Real(index))?;
            }

            if len < self.geometry.record_count / 2 {
                self.rebalance(handle, index)?;
            }
        }

        // Re-locate the captured successor so the cursor is never stale.
        match successor {
            None => Ok(None),
            Some(record) => self.search_lb(&record),
        }
    }

    /// Merges with or borrows from the chain successor of an underfull
    /// leaf. The rightmost leaf has no successor and stays underfull until
    /// its left neighbor rebalances.
    fn rebalance(&mut self, handle: PageSlot, index: u32) -> Result<()> {
        let next = handle.borrow().next_offset();
        if next == NO_NEXT_LEAF {
            return Ok(());
        }

        let right_handle = self.pool.get_page(next)?;
        let right_index = self.geometry.page_index(next);
        let right_key = {
            let page = right_handle.borrow();
            let min = page
                .min_slot()
                .ok_or_else(|| eyre!("leaf at offset {next} is empty but chained"))?;
            SepKey::from_slice(page.key(min))
        };

        let fits = handle.borrow().len() + right_handle.borrow().len()
            <= self.geometry.record_count;
        if fits {
            handle
                .borrow_mut()
                .merge_with(&mut right_handle.borrow_mut());
            drop(right_handle);
            self.pool.discard_page(next)?;
            self.tree.erase_page(&right_key, PageRef::Real(right_index))?;
            debug!(left = index, right = right_index, "merged underfull leaf");
        } else {
            let new_min = handle
                .borrow_mut()
                .borrow_from(&mut right_handle.borrow_mut());
            self.tree.erase_page(&right_key, PageRef::Real(right_index))?;
            self.tree.insert_page(
                &new_min[..self.config.key_size],
                PageRef::Real(right_index),
            )?;
            debug!(left = index, right = right_index, "borrowed into underfull leaf");
        }
        Ok(())
    }

    /// Points the chain predecessor of a discarded leaf at the leaf's old
    /// successor. Starts from the tree predecessor and walks forward, which
    /// also covers equal-key runs whose page indices are out of chain
    /// order.
    fn repair_predecessor_link(
        &mut self,
        sep_key: &SepKey,
        index: u32,
        erased_offset: u64,
        next: u64,
    ) -> Result<()> {
        let Some((_, page)) = self.tree.predecessor(sep_key, PageRef::Real(index)) else {
            return Ok(());
        };
        let PageRef::Real(start_index) = page else {
            // Unmaterialized sentinel: the discarded leaf headed the chain.
            return Ok(());
        };

        let mut offset = self.geometry.page_offset(start_index);
        loop {
            let handle = self.pool.get_page(offset)?;
            let link = handle.borrow().next_offset();
            if link == erased_offset {
                handle.borrow_mut().set_next_offset(next);
                return Ok(());
            }
            if link == NO_NEXT_LEAF || link == next {
                bail!(
                    "leaf chain does not reach the leaf at offset {erased_offset}; \
                     forward links are inconsistent"
                );
            }
            offset = link;
        }
    }

    /// Iterator over all records in key order.
    pub fn scan(&mut self) -> Result<Scan<'_>> {
        let cursor = self.begin()?;
        Ok(Scan { store: self, cursor })
    }

    /// Iterator over records starting at the first key `>=` the probe.
    pub fn scan_from(&mut self, probe: &[u8]) -> Result<Scan<'_>> {
        let cursor = self.search_lb(probe)?;
        Ok(Scan { store: self, cursor })
    }

    /// Byte offsets of the leaf chain in order, for diagnostics and tests.
    pub fn leaf_chain(&mut self) -> Result<Vec<u64>> {
        let Some(cursor) = self.begin()? else {
            return Ok(Vec::new());
        };
        let mut offsets = Vec::new();
        let mut offset = cursor.offset;
        loop {
            offsets.push(offset);
            let handle = self.pool.get_page(offset)?;
            let next = handle.borrow().next_offset();
            if next == NO_NEXT_LEAF {
                return Ok(offsets);
            }
            ensure!(
                !offsets.contains(&next),
                "leaf chain cycles back to offset {next}"
            );
            offset = next;
        }
    }

    /// Writes every dirty page, the pool header, and the index image.
    pub fn flush(&mut self) -> Result<()> {
        self.pool.flush()?;
        persist::write_index(&self.index_path, &self.tree, &self.config, self.record_count)
    }

    /// Persists everything and consumes the store.
    pub fn close(mut self) -> Result<()> {
        self.flush()?;
        self.closed = true;
        Ok(())
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(error) = self.flush() {
                warn!(%error, "failed to persist store on drop");
            }
        }
    }
}

/// Streaming record iterator; yields owned records in key order.
pub struct Scan<'a> {
    store: &'a mut Store,
    cursor: Option<Cursor>,
}

impl Iterator for Scan<'_> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        let cursor = self.cursor?;
        let step = (|| {
            let record = self.store.record_at(cursor)?;
            self.cursor = self.store.advance(cursor)?;
            Ok(record)
        })();
        if step.is_err() {
            self.cursor = None;
        }
        Some(step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config() -> StoreConfig {
        StoreConfig {
            page_size: 256,
            record_size: 16,
            key_size: 4,
            fanout: 4,
            multiset: false,
            max_pages: 4,
        }
    }

    fn open(dir: &tempfile::TempDir, config: StoreConfig) -> Store {
        Store::open(
            dir.path().join("pages.bin"),
            dir.path().join("btree.bin"),
            config,
        )
        .unwrap()
    }

    fn record(key: u32) -> Vec<u8> {
        let mut r = vec![0u8; 16];
        r[..4].copy_from_slice(&key.to_be_bytes());
        r[4..8].copy_from_slice(&key.to_le_bytes());
        r
    }

    fn keys_of(store: &mut Store) -> Vec<u32> {
        store
            .scan()
            .unwrap()
            .map(|r| u32::from_be_bytes(r.unwrap()[..4].try_into().unwrap()))
            .collect()
    }

    #[test]
    fn first_insert_creates_one_leaf_and_one_real_separator() {
        let dir = tempdir().unwrap();
        let mut store = open(&dir, config());

        let (cursor, inserted) = store.insert(&record(5)).unwrap();

        assert!(inserted);
        assert!(cursor.is_some());
        assert_eq!(store.len(), 1);
        assert_eq!(store.index().real_len(), 1);
        assert_eq!(store.leaf_chain().unwrap().len(), 1);
    }

    #[test]
    fn routing_below_first_separator_materializes_sentinel() {
        let dir = tempdir().unwrap();
        let mut store = open(&dir, config());

        store.insert(&record(100)).unwrap();
        store.insert(&record(5)).unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.index().real_len(), 2);
        // Two leaves now: the sentinel's (holding 5) chained before the
        // first (holding 100).
        assert_eq!(store.leaf_chain().unwrap().len(), 2);
        assert_eq!(keys_of(&mut store), vec![5, 100]);
    }

    #[test]
    fn search_lb_ub_cross_leaf_boundaries() {
        let dir = tempdir().unwrap();
        let mut store = open(&dir, config());
        let per_leaf = store.config().geometry().record_count as u32;
        for n in 0..3 * per_leaf {
            store.insert(&record(n * 2)).unwrap();
        }

        let lb = store.search_lb(&(3u32).to_be_bytes()).unwrap().unwrap();
        assert_eq!(store.record_at(lb).unwrap(), record(4));

        let max = (3 * per_leaf - 1) * 2;
        let ub = store.search_ub(&max.to_be_bytes()).unwrap();
        assert!(ub.is_none());

        let lb_max = store.search_lb(&max.to_be_bytes()).unwrap().unwrap();
        assert_eq!(store.record_at(lb_max).unwrap(), record(max));
    }

    #[test]
    fn erase_at_cursor_and_stale_cursor_errors() {
        let dir = tempdir().unwrap();
        let mut store = open(&dir, config());
        for n in 0..5 {
            store.insert(&record(n)).unwrap();
        }

        let cursor = store.search_key(&2u32.to_be_bytes()).unwrap().unwrap();
        let successor = store.erase_at(cursor).unwrap().unwrap();
        assert_eq!(store.record_at(successor).unwrap(), record(3));
        assert_eq!(store.len(), 4);

        // The same cursor is now stale.
        assert!(store.erase_at(cursor).is_err());
    }

    #[test]
    fn scan_from_starts_mid_range() {
        let dir = tempdir().unwrap();
        let mut store = open(&dir, config());
        for n in 0..40 {
            store.insert(&record(n)).unwrap();
        }

        let collected: Vec<u32> = store
            .scan_from(&25u32.to_be_bytes())
            .unwrap()
            .map(|r| u32::from_be_bytes(r.unwrap()[..4].try_into().unwrap()))
            .collect();

        assert_eq!(collected, (25..40).collect::<Vec<u32>>());
    }

    #[test]
    fn erase_all_returns_to_sentinel_only() {
        let dir = tempdir().unwrap();
        let mut store = open(&dir, config());
        for n in 0..50 {
            store.insert(&record(n)).unwrap();
        }

        for n in 0..50 {
            store.erase(&record(n)).unwrap();
        }

        assert_eq!(store.len(), 0);
        assert_eq!(store.index().real_len(), 0);
        assert!(store.index().len() >= 1);
        assert!(store.begin().unwrap().is_none());
        assert_eq!(store.leaf_chain().unwrap().len(), 0);

        // The store is usable again afterwards.
        store.insert(&record(7)).unwrap();
        assert_eq!(keys_of(&mut store), vec![7]);
    }

    #[test]
    fn separator_refreshes_when_leaf_minimum_erased() {
        let dir = tempdir().unwrap();
        let mut store = open(&dir, config());
        let per_leaf = store.config().geometry().record_count as u32;
        // Two full leaves.
        for n in 0..2 * per_leaf {
            store.insert(&record(n)).unwrap();
        }
        let chain = store.leaf_chain().unwrap();
        assert!(chain.len() >= 2);

        // Erase the second leaf's minimum; its separator must track the new
        // minimum, keeping searches in that leaf correct.
        let second_min = {
            let cursor = store.begin().unwrap().unwrap();
            let mut cursor = cursor;
            loop {
                let next = store.advance(cursor).unwrap().unwrap();
                if next.offset != cursor.offset {
                    break store.record_at(next).unwrap();
                }
                cursor = next;
            }
        };
        store.erase(&second_min).unwrap();

        let entries: Vec<(Vec<u8>, PageRef)> = store
            .index()
            .iter()
            .map(|(key, page)| (key.to_vec(), page))
            .collect();
        for (key, page) in entries {
            if let PageRef::Real(index) = page {
                let offset = store.geometry.page_offset(index);
                let handle = store.pool.get_page(offset).unwrap();
                let page = handle.borrow();
                let min = page.min_slot().unwrap();
                let is_sentinel = store.tree.first()
                    == Some((SepKey::from_slice(&key), PageRef::Real(index)));
                if !is_sentinel {
                    assert_eq!(
                        page.key(min),
                        key.as_slice(),
                        "separator does not match leaf minimum"
                    );
                }
            }
        }
    }

    #[test]
    fn duplicate_insert_reports_existing_cursor() {
        let dir = tempdir().unwrap();
        let mut store = open(&dir, config());

        let (first, inserted_first) = store.insert(&record(9)).unwrap();
        let (second, inserted_second) = store.insert(&record(9)).unwrap();

        assert!(inserted_first);
        assert!(!inserted_second);
        assert_eq!(first, second);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn probe_width_is_validated() {
        let dir = tempdir().unwrap();
        let mut store = open(&dir, config());
        store.insert(&record(1)).unwrap();

        assert!(store.search(&[0u8; 3]).is_err());
        assert!(store.search_key(&[0u8; 16]).is_err());
        assert!(store.insert(&[0u8; 4]).is_err());
        assert!(store.erase(&[0u8; 4]).is_err());
    }

    #[test]
    fn len_tracks_inserts_and_erases() {
        let dir = tempdir().unwrap();
        let mut store = open(&dir, config());

        for n in 0..30 {
            store.insert(&record(n)).unwrap();
        }
        for n in 10..20 {
            store.erase(&record(n)).unwrap();
        }
        // Erasing absent records does not change the count.
        store.erase(&record(99)).unwrap();

        assert_eq!(store.len(), 20);
        assert_eq!(keys_of(&mut store).len(), 20);
    }
}
