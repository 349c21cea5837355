//! Pool header layout for page 0 of the page file.
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -------------------------------------------
//! 0       8     empty_pages_start (u64 LE)
//! 8       8     discarded_count   (u64 LE)
//! 16      8*N   discarded_offsets (u64 LE each)
//! ...           zero padding to page_size
//! ```
//!
//! `empty_pages_start` is the allocation frontier: no page at or beyond it
//! has ever been assigned to a leaf. `discarded_offsets` lists page slots
//! below the frontier that were handed back. Together with the frontier the
//! list covers exactly the page slots not owned by any live leaf.

use eyre::{ensure, Result};
use zerocopy::little_endian::U64;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

pub const POOL_HEADER_SIZE: usize = 16;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct PoolHeader {
    empty_pages_start: U64,
    discarded_count: U64,
}

const _: () = assert!(std::mem::size_of::<PoolHeader>() == POOL_HEADER_SIZE);

impl PoolHeader {
    pub fn new(empty_pages_start: u64, discarded_count: u64) -> Self {
        Self {
            empty_pages_start: U64::new(empty_pages_start),
            discarded_count: U64::new(discarded_count),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        ensure!(
            bytes.len() >= POOL_HEADER_SIZE,
            "buffer too small for PoolHeader: {} < {}",
            bytes.len(),
            POOL_HEADER_SIZE
        );

        Self::ref_from_bytes(&bytes[..POOL_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse PoolHeader: {:?}", e))
    }

    pub fn empty_pages_start(&self) -> u64 {
        self.empty_pages_start.get()
    }

    pub fn discarded_count(&self) -> u64 {
        self.discarded_count.get()
    }

    /// Encodes the header and the discarded-offset list into a page image.
    pub fn encode(page: &mut [u8], empty_pages_start: u64, discarded: &[u64]) -> Result<()> {
        let needed = POOL_HEADER_SIZE + discarded.len() * 8;
        ensure!(
            needed <= page.len(),
            "{} discarded offsets do not fit in a {}-byte header page",
            discarded.len(),
            page.len()
        );

        page.fill(0);
        let header = Self::new(empty_pages_start, discarded.len() as u64);
        page[..POOL_HEADER_SIZE].copy_from_slice(header.as_bytes());
        for (i, &offset) in discarded.iter().enumerate() {
            let at = POOL_HEADER_SIZE + i * 8;
            page[at..at + 8].copy_from_slice(&offset.to_le_bytes());
        }
        Ok(())
    }

    /// Decodes the frontier and the discarded-offset list from a page image.
    pub fn decode(page: &[u8]) -> Result<(u64, Vec<u64>)> {
        let header = Self::from_bytes(page)?;
        let count = header.discarded_count() as usize;
        ensure!(
            POOL_HEADER_SIZE + count * 8 <= page.len(),
            "pool header claims {} discarded offsets, page holds at most {}",
            count,
            (page.len() - POOL_HEADER_SIZE) / 8
        );

        let mut discarded = Vec::with_capacity(count);
        for i in 0..count {
            let at = POOL_HEADER_SIZE + i * 8;
            discarded.push(u64::from_le_bytes(page[at..at + 8].try_into().unwrap()));
        }
        Ok((header.empty_pages_start(), discarded))
    }
}
