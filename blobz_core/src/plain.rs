use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use tracing::debug;

use crate::blob::{check_range, BlobReader, BlobType};
use crate::error::Result;

/// An uncompressed image stored as an ordinary file.
///
/// Byte ranges map one-to-one onto the file, so no sector cache is involved.
pub struct PlainFileReader {
    file: File,
    size: u64,
}

impl PlainFileReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        debug!(path = %path.display(), size, "opened plain blob");
        Ok(Self { file, size })
    }
}

impl BlobReader for PlainFileReader {
    fn blob_type(&self) -> BlobType {
        BlobType::Plain
    }

    fn raw_size(&self) -> u64 {
        self.size
    }

    fn data_size(&self) -> u64 {
        self.size
    }

    fn read(&mut self, offset: u64, out: &mut [u8]) -> Result<()> {
        check_range(offset, out.len() as u64, self.size)?;
        if out.is_empty() {
            return Ok(());
        }
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(out)?;
        Ok(())
    }
}
