//! Blob error types

use std::path::PathBuf;

use thiserror::Error;

use crate::blob::BlobType;

/// Result alias used throughout `blobz_core`.
pub type Result<T> = std::result::Result<T, BlobError>;

/// Errors produced by blob readers, the sector cache and the compression driver.
#[derive(Debug, Error)]
pub enum BlobError {
    /// A byte-range read reaches past the logical end of the blob.
    #[error("read of {size} bytes at offset {offset} exceeds data size {data_size}")]
    OutOfRange {
        /// Requested start offset
        offset: u64,
        /// Requested length
        size: u64,
        /// Logical size of the blob
        data_size: u64,
    },

    /// A block fetch names a block the container does not have.
    #[error("block {block} out of range (block count {count})")]
    BlockOutOfRange {
        /// Requested block number
        block: u64,
        /// Number of blocks in the blob
        count: u64,
    },

    /// The backing medium failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A block decoded to something other than what the block table promises.
    #[error("block {block} is corrupt: {reason}")]
    Corrupt {
        /// Block number
        block: u64,
        /// What was wrong with it
        reason: String,
    },

    /// The stored checksum of a block's compressed span does not match its bytes.
    #[error("block {block} checksum mismatch: expected {expected:016x}, got {actual:016x}")]
    ChecksumMismatch {
        /// Block number
        block: u64,
        /// Checksum recorded in the block table
        expected: u64,
        /// Checksum of the bytes actually read
        actual: u64,
    },

    /// Header or block table failed validation.
    #[error("invalid compressed blob: {0}")]
    InvalidContainer(String),

    /// `read` was called on a sector reader before its block size was configured.
    #[error("sector reader used before its block size was set")]
    BlockSizeNotSet,

    /// Block size is zero or beyond what the format can record.
    #[error("invalid block size {0}")]
    InvalidBlockSize(u64),

    /// An attempt to change the block size of a configured sector reader.
    #[error("block size is fixed at {current}; refusing to change it to {requested}")]
    BlockSizeLocked {
        /// Configured block size
        current: u32,
        /// Rejected new block size
        requested: u32,
    },

    /// A block size or block buffer that disagrees with the source's own block size.
    #[error("source has {native}-byte blocks; refusing block size {requested}")]
    BlockSizeMismatch {
        /// Block size the source was built with
        native: u32,
        /// Rejected block size or buffer length
        requested: u64,
    },

    /// The codec handed to the reader is not the one the file was written with.
    #[error("codec mismatch: file uses codec {file} but provided codec has id {provided}")]
    CodecMismatch {
        /// Codec id stored in the header
        file: u16,
        /// Id of the codec that was supplied
        provided: u16,
    },

    /// No codec is registered for this id.
    #[error("unknown codec id {0}")]
    UnknownCodec(u16),

    /// The codec reported a failure.
    #[error("codec error: {0}")]
    Codec(String),

    /// The path was classified, but no adapter handles that blob type.
    #[error("{0} blobs are not supported")]
    UnsupportedBlobType(BlobType),

    /// The compression input is already a compressed blob.
    #[error("{} is already a compressed blob", .0.display())]
    AlreadyCompressed(PathBuf),

    /// A writer was fed more or fewer bytes than it was created for.
    #[error("writer declared {declared} bytes of data but received {written}")]
    DataSizeMismatch {
        /// Size passed to `Writer::create`
        declared: u64,
        /// Bytes actually written
        written: u64,
    },

    /// The progress callback asked the driver to stop.
    #[error("operation cancelled")]
    Cancelled,
}

impl BlobError {
    /// The request named bytes or blocks that do not exist; no I/O was attempted.
    pub fn is_out_of_range(&self) -> bool {
        matches!(self, Self::OutOfRange { .. } | Self::BlockOutOfRange { .. })
    }

    /// The stored data is damaged (as opposed to unreadable or out of range).
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::Corrupt { .. } | Self::ChecksumMismatch { .. } | Self::InvalidContainer(_)
        )
    }

    pub(crate) fn corrupt(block: u64, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            block,
            reason: reason.into(),
        }
    }
}
