//! # Page Store
//!
//! Owns the tree file: an 8-byte header holding the root page address,
//! followed by a slab of fixed-size page images.
//!
//! ```text
//! +--------------------+------------+------------+------------+----
//! | root address (i64) |   page 0   |   page 1   |   page 2   | ...
//! +--------------------+------------+------------+------------+----
//! 0                    8            8+S          8+2S
//! ```
//!
//! Every image is exactly `layout.page_size()` bytes, so a page can be
//! rewritten in place at the address it was first stored at. New pages are
//! appended at end-of-file; there is no free list, deleted pages simply
//! stop being referenced.
//!
//! The header is `-1` while the tree is empty, the same null sentinel used
//! for child pointers inside pages.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use eyre::{ensure, Result, WrapErr};
use tracing::debug;

use crate::encoding::{ByteReader, ByteWriter, Record};

use super::page::{decode_child, encode_child, Page, PageAddress, PageLayout};

const HEADER_SIZE: u64 = 8;

/// File-backed allocator and reader/writer of fixed-size pages.
pub struct FilePageStore {
    file: File,
    layout: PageLayout,
    /// Offset where the next appended page will land.
    end: u64,
}

impl FilePageStore {
    /// Opens an existing tree file or creates an empty one.
    ///
    /// A fresh file gets a null root header. An existing file must be a
    /// header plus a whole number of pages of this layout's size.
    pub fn open_or_create(path: &Path, layout: PageLayout) -> Result<Self> {
        ensure!(
            layout.order >= 3,
            "tree order {} is below the minimum of 3",
            layout.order
        );

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .wrap_err_with(|| format!("failed to open tree file {}", path.display()))?;

        let file_len = file.metadata()?.len();
        if file_len == 0 {
            file.write_all(&(-1i64).to_le_bytes())?;
            debug!(path = %path.display(), "initialized empty tree file");
            return Ok(Self {
                file,
                layout,
                end: HEADER_SIZE,
            });
        }

        let page_size = layout.page_size() as u64;
        ensure!(
            file_len >= HEADER_SIZE && (file_len - HEADER_SIZE) % page_size == 0,
            "corrupt tree file {}: length {} is not a header plus whole pages of {} bytes",
            path.display(),
            file_len,
            page_size
        );
        debug!(
            path = %path.display(),
            pages = (file_len - HEADER_SIZE) / page_size,
            "opened tree file"
        );
        Ok(Self {
            file,
            layout,
            end: file_len,
        })
    }

    pub fn layout(&self) -> &PageLayout {
        &self.layout
    }

    /// Number of page slots currently in the file.
    pub fn page_count(&self) -> u64 {
        (self.end - HEADER_SIZE) / self.layout.page_size() as u64
    }

    pub fn read_root_address(&mut self) -> Result<Option<PageAddress>> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut raw = [0u8; 8];
        self.file
            .read_exact(&mut raw)
            .wrap_err("failed to read root header")?;
        decode_child(&mut ByteReader::new(&raw))
    }

    pub fn write_root_address(&mut self, root: Option<PageAddress>) -> Result<()> {
        let mut out = ByteWriter::with_capacity(8);
        encode_child(&mut out, root);
        self.file.seek(SeekFrom::Start(0))?;
        self.file
            .write_all(out.as_slice())
            .wrap_err("failed to write root header")?;
        Ok(())
    }

    /// Reads and decodes the page at `address`.
    pub fn load<K, V>(&mut self, address: PageAddress) -> Result<Page<K, V>>
    where
        K: Record + Ord + Clone,
        V: Record + Clone,
    {
        ensure!(
            self.page_offset_is_valid(address),
            "page address {} is not a page slot in this file",
            address
        );
        let mut image = vec![0u8; self.layout.page_size()];
        self.file.seek(SeekFrom::Start(address.offset()))?;
        self.file
            .read_exact(&mut image)
            .wrap_err_with(|| format!("short read of page {}", address))?;

        let mut page = Page::decode(&self.layout, &image)
            .wrap_err_with(|| format!("failed to decode page {}", address))?;
        page.address = Some(address);
        Ok(page)
    }

    /// Writes `page` at its address, appending it at end-of-file first if
    /// it has none. Returns the address written to.
    pub fn store<K, V>(&mut self, page: &mut Page<K, V>) -> Result<PageAddress>
    where
        K: Record + Ord + Clone,
        V: Record + Clone,
    {
        let address = match page.address {
            Some(addr) => addr,
            None => self.reserve_slot(),
        };
        page.address = Some(address);

        let image = page.encode_into(&self.layout)?;
        self.file.seek(SeekFrom::Start(address.offset()))?;
        self.file
            .write_all(&image)
            .wrap_err_with(|| format!("failed to write page {}", address))?;
        Ok(address)
    }

    /// Assigns an end-of-file address to `page` without writing its
    /// contents yet. Used when a page's image must embed the address of a
    /// sibling that does not exist on disk yet.
    pub fn reserve<K, V>(&mut self, page: &mut Page<K, V>) -> PageAddress
    where
        K: Record + Ord + Clone,
        V: Record + Clone,
    {
        let address = match page.address {
            Some(addr) => addr,
            None => self.reserve_slot(),
        };
        page.address = Some(address);
        address
    }

    /// Flushes file contents to stable storage.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_data().wrap_err("failed to sync tree file")
    }

    fn reserve_slot(&mut self) -> PageAddress {
        let address = PageAddress::new(self.end);
        self.end += self.layout.page_size() as u64;
        address
    }

    fn page_offset_is_valid(&self, address: PageAddress) -> bool {
        let off = address.offset();
        off >= HEADER_SIZE
            && off < self.end
            && (off - HEADER_SIZE) % self.layout.page_size() as u64 == 0
    }
}

impl std::fmt::Debug for FilePageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilePageStore")
            .field("page_size", &self.layout.page_size())
            .field("pages", &self.page_count())
            .finish()
    }
}
