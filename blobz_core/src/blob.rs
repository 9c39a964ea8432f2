use std::fmt;

use crate::error::{BlobError, Result};

/// Bump whenever [`BlobType`] gains, loses or reorders a variant.
///
/// Anything that persists blob classifications (e.g. a scanned-library cache)
/// keys on this value and must discard entries written under another revision.
pub const BLOB_TYPE_REVISION: u32 = 1;

/// Backing-store variant behind a [`BlobReader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlobType {
    /// An ordinary file holding the raw image.
    Plain,
    /// A raw block or character device, read in hardware sectors.
    Drive,
    /// A directory tree presented as an image. Classified, not readable.
    Directory,
    /// A block-compressed blob (see [`crate::format`]).
    Compressed,
}

impl BlobType {
    pub fn name(self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Drive => "drive",
            Self::Directory => "directory",
            Self::Compressed => "compressed",
        }
    }
}

impl fmt::Display for BlobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Uniform byte-range read access to an immutable blob.
///
/// `read` takes `&mut self`: a reader serves one logical consumer at a time.
/// Consumers that need parallelism open independent readers on the same path.
pub trait BlobReader: Send {
    /// Backing-store variant. Never performs I/O.
    fn blob_type(&self) -> BlobType;

    /// Bytes occupied on the backing medium.
    fn raw_size(&self) -> u64;

    /// Logical (uncompressed) size as a consumer sees it.
    fn data_size(&self) -> u64;

    /// Fill `out` with the bytes at `offset..offset + out.len()`.
    ///
    /// Fails with [`BlobError::OutOfRange`] before any I/O when the range
    /// reaches past [`data_size`](Self::data_size). On any error the contents
    /// of `out` are unspecified.
    fn read(&mut self, offset: u64, out: &mut [u8]) -> Result<()>;

    /// Allocate and read `size` bytes at `offset`.
    fn read_vec(&mut self, offset: u64, size: usize) -> Result<Vec<u8>> {
        check_range(offset, size as u64, self.data_size())?;
        let mut out = vec![0u8; size];
        self.read(offset, &mut out)?;
        Ok(out)
    }
}

impl<T: BlobReader + ?Sized> BlobReader for Box<T> {
    fn blob_type(&self) -> BlobType {
        (**self).blob_type()
    }

    fn raw_size(&self) -> u64 {
        (**self).raw_size()
    }

    fn data_size(&self) -> u64 {
        (**self).data_size()
    }

    fn read(&mut self, offset: u64, out: &mut [u8]) -> Result<()> {
        (**self).read(offset, out)
    }
}

/// Reject `offset..offset + size` unless it lies within `0..data_size`.
pub fn check_range(offset: u64, size: u64, data_size: u64) -> Result<()> {
    match offset.checked_add(size) {
        Some(end) if end <= data_size => Ok(()),
        _ => Err(BlobError::OutOfRange {
            offset,
            size,
            data_size,
        }),
    }
}
