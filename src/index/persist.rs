//! Index file round-trip (`btree.bin`).
//!
//! ## File Layout
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -------------------------------------------
//! 0       16    magic: "leafstore index\0"
//! 16      4     version (u32 LE)
//! 20      4     page_size (u32 LE)
//! 24      4     record_size (u32 LE)
//! 28      4     key_size (u32 LE)
//! 32      4     fanout (u32 LE)
//! 36      4     flags (u32 LE, bit 0 = multiset)
//! 40      8     record_count (u64 LE, live records in the engine)
//! 48      8     separator_count (u64 LE)
//! 56      ...   separators, ascending: key bytes, tag (0 = placeholder,
//!               1 = real), page index (u32 LE)
//! ```
//!
//! The header echoes the store configuration; reopening with different
//! parameters is an error rather than silent misreads. Separators are
//! dumped in ascending order and bulk-rebuilt by ascending insertion, which
//! is deterministic, so round-trip equality holds.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use eyre::{bail, ensure, Result, WrapErr};
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::node::{IndexTree, PageRef};
use crate::config::StoreConfig;

pub const INDEX_MAGIC: &[u8; 16] = b"leafstore index\0";
pub const INDEX_VERSION: u32 = 1;
pub const INDEX_HEADER_SIZE: usize = 56;

const FLAG_MULTISET: u32 = 1;

const TAG_PLACEHOLDER: u8 = 0;
const TAG_REAL: u8 = 1;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct IndexFileHeader {
    magic: [u8; 16],
    version: U32,
    page_size: U32,
    record_size: U32,
    key_size: U32,
    fanout: U32,
    flags: U32,
    record_count: U64,
    separator_count: U64,
}

const _: () = assert!(std::mem::size_of::<IndexFileHeader>() == INDEX_HEADER_SIZE);

impl IndexFileHeader {
    fn new(config: &StoreConfig, record_count: u64, separator_count: u64) -> Self {
        Self {
            magic: *INDEX_MAGIC,
            version: U32::new(INDEX_VERSION),
            page_size: U32::new(config.page_size as u32),
            record_size: U32::new(config.record_size as u32),
            key_size: U32::new(config.key_size as u32),
            fanout: U32::new(config.fanout as u32),
            flags: U32::new(if config.multiset { FLAG_MULTISET } else { 0 }),
            record_count: U64::new(record_count),
            separator_count: U64::new(separator_count),
        }
    }

    fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        ensure!(
            bytes.len() >= INDEX_HEADER_SIZE,
            "buffer too small for IndexFileHeader: {} < {}",
            bytes.len(),
            INDEX_HEADER_SIZE
        );

        let header = Self::ref_from_bytes(&bytes[..INDEX_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse IndexFileHeader: {:?}", e))?;

        ensure!(&header.magic == INDEX_MAGIC, "invalid magic in index file");
        ensure!(
            header.version.get() == INDEX_VERSION,
            "unsupported index file version: {} (expected {})",
            header.version.get(),
            INDEX_VERSION
        );
        Ok(header)
    }

    fn check_config(&self, config: &StoreConfig) -> Result<()> {
        ensure!(
            self.page_size.get() as usize == config.page_size
                && self.record_size.get() as usize == config.record_size
                && self.key_size.get() as usize == config.key_size
                && self.fanout.get() as usize == config.fanout
                && (self.flags.get() & FLAG_MULTISET != 0) == config.multiset,
            "index file was written with page_size={} record_size={} key_size={} \
             fanout={} multiset={}, reopened with page_size={} record_size={} \
             key_size={} fanout={} multiset={}",
            self.page_size.get(),
            self.record_size.get(),
            self.key_size.get(),
            self.fanout.get(),
            self.flags.get() & FLAG_MULTISET != 0,
            config.page_size,
            config.record_size,
            config.key_size,
            config.fanout,
            config.multiset,
        );
        Ok(())
    }
}

/// Serializes the tree and the engine's record count to `path`, replacing
/// any previous image.
pub fn write_index<P: AsRef<Path>>(
    path: P,
    tree: &IndexTree,
    config: &StoreConfig,
    record_count: u64,
) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .wrap_err_with(|| format!("failed to create directory '{}'", parent.display()))?;
        }
    }

    let header = IndexFileHeader::new(config, record_count, tree.len() as u64);
    let mut buf = Vec::with_capacity(INDEX_HEADER_SIZE + tree.len() * (config.key_size + 5));
    buf.extend_from_slice(header.as_bytes());

    for (key, page) in tree.iter() {
        buf.extend_from_slice(key);
        match page {
            PageRef::Placeholder => {
                buf.push(TAG_PLACEHOLDER);
                buf.extend_from_slice(&0u32.to_le_bytes());
            }
            PageRef::Real(index) => {
                buf.push(TAG_REAL);
                buf.extend_from_slice(&index.to_le_bytes());
            }
        }
    }

    let mut file = File::create(path)
        .wrap_err_with(|| format!("failed to create index file '{}'", path.display()))?;
    file.write_all(&buf)?;
    file.sync_all()
        .wrap_err_with(|| format!("failed to sync index file '{}'", path.display()))?;
    Ok(())
}

/// Reads the tree and the persisted record count back from `path`.
///
/// A missing or empty file yields a fresh empty tree with a zero count. A
/// present file whose config echo disagrees with `config` is an error.
pub fn read_index<P: AsRef<Path>>(path: P, config: &StoreConfig) -> Result<(IndexTree, u64)> {
    let path = path.as_ref();
    let mut tree = IndexTree::new(config.key_size, config.fanout, config.multiset);

    if !path.exists() {
        return Ok((tree, 0));
    }
    let mut bytes = Vec::new();
    File::open(path)
        .wrap_err_with(|| format!("failed to open index file '{}'", path.display()))?
        .read_to_end(&mut bytes)?;
    if bytes.is_empty() {
        return Ok((tree, 0));
    }

    let header = IndexFileHeader::from_bytes(&bytes)?;
    header.check_config(config)?;
    let separator_count = header.separator_count.get() as usize;
    let entry_size = config.key_size + 5;
    ensure!(
        bytes.len() == INDEX_HEADER_SIZE + separator_count * entry_size,
        "index file is {} bytes, expected {} for {} separators",
        bytes.len(),
        INDEX_HEADER_SIZE + separator_count * entry_size,
        separator_count
    );

    let mut at = INDEX_HEADER_SIZE;
    for _ in 0..separator_count {
        let key = &bytes[at..at + config.key_size];
        let tag = bytes[at + config.key_size];
        let page_bytes = &bytes[at + config.key_size + 1..at + entry_size];
        let page_index = u32::from_le_bytes(page_bytes.try_into().unwrap());
        let page = match tag {
            TAG_PLACEHOLDER => PageRef::Placeholder,
            TAG_REAL => PageRef::Real(page_index),
            other => bail!("unknown separator tag {other:#04x} in index file"),
        };
        tree.insert_page_raw(key, page)?;
        at += entry_size;
    }

    Ok((tree, header.record_count.get()))
}
