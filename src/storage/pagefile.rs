//! Page-granular file I/O.
//!
//! `PageFile` wraps one `std::fs::File` and exposes reads, writes, and
//! growth in whole-page units. Every offset handed to it must be a multiple
//! of the page size and inside the current file length; violations are
//! argument errors, not silent truncation. The file is created one page
//! long (the header slot) when missing.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use eyre::{ensure, Result, WrapErr};

#[derive(Debug)]
pub struct PageFile {
    file: File,
    path: PathBuf,
    page_size: usize,
    len: u64,
}

impl PageFile {
    /// Opens the page file, creating it with a single (header) page slot if
    /// it does not exist yet. Returns the handle and whether it was created.
    pub fn open<P: AsRef<Path>>(path: P, page_size: usize) -> Result<(Self, bool)> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).wrap_err_with(|| {
                    format!("failed to create directory '{}'", parent.display())
                })?;
            }
        }

        let created = !path.exists();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .wrap_err_with(|| format!("failed to open page file '{}'", path.display()))?;

        let mut len = file.metadata()?.len();
        if created || len < page_size as u64 {
            file.set_len(page_size as u64)?;
            len = page_size as u64;
        }
        ensure!(
            len % page_size as u64 == 0,
            "page file '{}' length {} is not a multiple of page size {}",
            path.display(),
            len,
            page_size
        );

        Ok((
            Self {
                file,
                path,
                page_size,
                len,
            },
            created,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    fn check_offset(&self, offset: u64) -> Result<()> {
        ensure!(
            offset % self.page_size as u64 == 0,
            "offset {} is not aligned to page size {}",
            offset,
            self.page_size
        );
        ensure!(
            offset + self.page_size as u64 <= self.len,
            "offset {} is beyond page file length {}",
            offset,
            self.len
        );
        Ok(())
    }

    /// Reads one page into `buf`, which must be exactly one page long.
    pub fn read_page(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        ensure!(
            buf.len() == self.page_size,
            "read buffer is {} bytes, page size is {}",
            buf.len(),
            self.page_size
        );
        self.check_offset(offset)?;

        self.file.seek(SeekFrom::Start(offset))?;
        self.file
            .read_exact(buf)
            .wrap_err_with(|| format!("failed to read page at offset {offset}"))?;
        Ok(())
    }

    /// Writes one page from `buf`, which must be exactly one page long.
    pub fn write_page(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        ensure!(
            buf.len() == self.page_size,
            "write buffer is {} bytes, page size is {}",
            buf.len(),
            self.page_size
        );
        self.check_offset(offset)?;

        self.file.seek(SeekFrom::Start(offset))?;
        self.file
            .write_all(buf)
            .wrap_err_with(|| format!("failed to write page at offset {offset}"))?;
        Ok(())
    }

    /// Extends the file by one zeroed page slot and returns its offset.
    pub fn grow(&mut self) -> Result<u64> {
        let offset = self.len;
        self.len += self.page_size as u64;
        self.file
            .set_len(self.len)
            .wrap_err("failed to extend page file")?;
        Ok(offset)
    }

    pub fn sync(&self) -> Result<()> {
        self.file.sync_all().wrap_err("failed to sync page file")
    }
}
