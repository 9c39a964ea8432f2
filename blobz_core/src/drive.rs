use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use tracing::{debug, trace};

use crate::blob::BlobType;
use crate::error::{BlobError, Result};
use crate::sector::{check_block_buffer, BlockSource, SectorReader};

/// Hardware sector size of optical drives.
pub const DRIVE_SECTOR_SIZE: u32 = 2048;

/// A raw device read in whole sectors.
///
/// Block and character devices report a zero length in their metadata, so the
/// size is taken by seeking to the end instead.
pub struct DriveReader {
    file: File,
    size: u64,
    sector_size: u32,
}

impl DriveReader {
    /// Open `path` as a drive behind a sector cache of [`DRIVE_SECTOR_SIZE`] blocks.
    pub fn open(path: impl AsRef<Path>) -> Result<SectorReader<Self>> {
        Self::open_with_sector_size(path, DRIVE_SECTOR_SIZE)
    }

    pub fn open_with_sector_size(
        path: impl AsRef<Path>,
        sector_size: u32,
    ) -> Result<SectorReader<Self>> {
        let path = path.as_ref();
        let mut file = File::open(path)?;
        let size = file.seek(SeekFrom::End(0))?;
        debug!(path = %path.display(), size, sector_size, "opened drive");
        let drive = Self {
            file,
            size,
            sector_size,
        };
        SectorReader::with_block_size(drive, sector_size)
    }

    fn sector_count(&self) -> u64 {
        self.size.div_ceil(u64::from(self.sector_size))
    }
}

impl BlockSource for DriveReader {
    fn blob_type(&self) -> BlobType {
        BlobType::Drive
    }

    fn raw_size(&self) -> u64 {
        self.size
    }

    fn data_size(&self) -> u64 {
        self.size
    }

    fn block_size(&self) -> u32 {
        self.sector_size
    }

    fn fetch_block(&mut self, block: u64, out: &mut [u8]) -> Result<()> {
        check_block_buffer(self.sector_size, 1, out)?;
        if block >= self.sector_count() {
            return Err(BlobError::BlockOutOfRange {
                block,
                count: self.sector_count(),
            });
        }
        let start = block * u64::from(self.sector_size);
        let len = (self.size - start).min(out.len() as u64) as usize;
        self.file.seek(SeekFrom::Start(start))?;
        self.file.read_exact(&mut out[..len])?;
        Ok(())
    }

    /// One seek and one contiguous read for the whole run.
    fn fetch_aligned_run(&mut self, first_block: u64, count: u64, out: &mut [u8]) -> Result<()> {
        check_block_buffer(self.sector_size, count, out)?;
        let end = first_block + count;
        if end > self.sector_count() {
            return Err(BlobError::BlockOutOfRange {
                block: end - 1,
                count: self.sector_count(),
            });
        }
        trace!(first_block, count, "drive run read");
        self.file
            .seek(SeekFrom::Start(first_block * u64::from(self.sector_size)))?;
        self.file.read_exact(out)?;
        Ok(())
    }
}
