//! On-disk layout of a compressed blob.
//!
//! ```text
//! [HEADER: 32 bytes]
//! [BLOCK TABLE: 24 bytes × block_count]
//! [BLOCK DATA: one independently compressed span per block]
//! ```
//!
//! Every integer is little-endian. Spans are located only through the block
//! table; nothing assumes they are contiguous or proportional to block size.

use crate::error::{BlobError, Result};

/// Magic number at offset 0, stored as a little-endian u32.
pub const MAGIC: u32 = 0xB10B_C001;

/// Only format version understood by this crate.
pub const VERSION: u16 = 1;

/// Fixed size of the header in bytes.
///   magic:u32 + version:u16 + codec_id:u16 + sub_type:u32 + block_size:u32
///   + data_size:u64 + block_count:u32 + flags:u32
///   = 4 + 2 + 2 + 4 + 4 + 8 + 4 + 4 = 32
pub const HEADER_SIZE: u64 = 32;

/// Size of each BlockEntry in the block table, in bytes.
///   offset:u64 + compressed_len:u32 + raw_len:u32 + checksum:u64 = 24
pub const BLOCK_ENTRY_SIZE: u64 = 24;

/// Default block size: 16 KB.
pub const DEFAULT_BLOCK_SIZE: u32 = 16 * 1024;

/// Largest block size the table can describe (lengths must stay below bit 31).
pub const MAX_BLOCK_SIZE: u32 = 64 * 1024 * 1024;

// ── Flags ──────────────────────────────────────────────────────────────────

/// Each block carries an xxhash3-64 checksum of its on-disk span.
pub const FLAG_HAS_CHECKSUM: u32 = 1 << 0;

/// Bit 31 of `compressed_len` on disk: the span holds the raw block verbatim.
const STORED_BIT: u32 = 1 << 31;

// ── Codec IDs ──────────────────────────────────────────────────────────────

pub const CODEC_PASSTHROUGH: u16 = 0;
pub const CODEC_ZLIB: u16 = 1;
pub const CODEC_ZSTD: u16 = 2;
pub const CODEC_LZ4: u16 = 3;

/// `true` when `buf` starts with the compressed blob magic.
pub fn has_magic(buf: &[u8]) -> bool {
    buf.len() >= 4 && u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) == MAGIC
}

/// Number of blocks needed to hold `data_size` bytes.
pub fn block_count_for(data_size: u64, block_size: u32) -> u64 {
    data_size.div_ceil(u64::from(block_size))
}

// ── Header ─────────────────────────────────────────────────────────────────

/// Decoded representation of the 32-byte header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobHeader {
    pub version: u16,
    pub codec_id: u16,
    /// Opaque value chosen by whoever compressed the blob.
    pub sub_type: u32,
    /// Nominal raw bytes per block (the last block may be smaller).
    pub block_size: u32,
    /// Logical (uncompressed) size of the whole blob.
    pub data_size: u64,
    pub block_count: u32,
    pub flags: u32,
}

impl BlobHeader {
    /// Serialize to exactly `HEADER_SIZE` bytes.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE as usize] {
        let mut buf = [0u8; HEADER_SIZE as usize];
        buf[0..4].copy_from_slice(&MAGIC.to_le_bytes());
        buf[4..6].copy_from_slice(&self.version.to_le_bytes());
        buf[6..8].copy_from_slice(&self.codec_id.to_le_bytes());
        buf[8..12].copy_from_slice(&self.sub_type.to_le_bytes());
        buf[12..16].copy_from_slice(&self.block_size.to_le_bytes());
        buf[16..24].copy_from_slice(&self.data_size.to_le_bytes());
        buf[24..28].copy_from_slice(&self.block_count.to_le_bytes());
        buf[28..32].copy_from_slice(&self.flags.to_le_bytes());
        buf
    }

    /// Deserialize from `HEADER_SIZE` bytes and check that the fields agree
    /// with each other.
    pub fn from_bytes(buf: &[u8; HEADER_SIZE as usize]) -> Result<Self> {
        if !has_magic(buf) {
            return Err(BlobError::InvalidContainer(
                "invalid magic, not a compressed blob".into(),
            ));
        }
        let header = Self {
            version: u16::from_le_bytes([buf[4], buf[5]]),
            codec_id: u16::from_le_bytes([buf[6], buf[7]]),
            sub_type: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
            block_size: u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]),
            data_size: u64::from_le_bytes([
                buf[16], buf[17], buf[18], buf[19], buf[20], buf[21], buf[22], buf[23],
            ]),
            block_count: u32::from_le_bytes([buf[24], buf[25], buf[26], buf[27]]),
            flags: u32::from_le_bytes([buf[28], buf[29], buf[30], buf[31]]),
        };

        if header.version != VERSION {
            return Err(BlobError::InvalidContainer(format!(
                "unsupported version {} (only version {VERSION} is supported)",
                header.version
            )));
        }
        if header.block_size == 0 || header.block_size > MAX_BLOCK_SIZE {
            return Err(BlobError::InvalidContainer(format!(
                "block size {} out of range",
                header.block_size
            )));
        }
        let expected = block_count_for(header.data_size, header.block_size);
        if u64::from(header.block_count) != expected {
            return Err(BlobError::InvalidContainer(format!(
                "block count {} does not cover data size {} at block size {} (expected {expected})",
                header.block_count, header.data_size, header.block_size
            )));
        }
        Ok(header)
    }

    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    /// Byte offset of the first block span.
    pub fn data_offset(&self) -> u64 {
        HEADER_SIZE + u64::from(self.block_count) * BLOCK_ENTRY_SIZE
    }

    /// Raw length block `idx` must decode to.
    pub fn expected_raw_len(&self, idx: u64) -> u32 {
        let block_size = u64::from(self.block_size);
        let start = idx * block_size;
        (self.data_size.saturating_sub(start)).min(block_size) as u32
    }
}

// ── Block table entry ──────────────────────────────────────────────────────

/// One entry in the block table: locates and describes a single block span.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockEntry {
    /// Byte offset of the span from the start of the file.
    pub offset: u64,
    /// Length of the span in bytes.
    pub compressed_len: u32,
    /// Length of the original uncompressed data in bytes.
    pub raw_len: u32,
    /// xxhash3-64 of the span bytes.
    pub checksum: u64,
    /// The span holds the raw bytes because compression did not shrink them.
    pub stored: bool,
}

impl BlockEntry {
    /// Serialize to exactly `BLOCK_ENTRY_SIZE` bytes.
    pub fn to_bytes(&self) -> [u8; BLOCK_ENTRY_SIZE as usize] {
        let mut buf = [0u8; BLOCK_ENTRY_SIZE as usize];
        let len_field = if self.stored {
            self.compressed_len | STORED_BIT
        } else {
            self.compressed_len
        };
        buf[0..8].copy_from_slice(&self.offset.to_le_bytes());
        buf[8..12].copy_from_slice(&len_field.to_le_bytes());
        buf[12..16].copy_from_slice(&self.raw_len.to_le_bytes());
        buf[16..24].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    /// Deserialize from `BLOCK_ENTRY_SIZE` bytes.
    pub fn from_bytes(buf: &[u8; BLOCK_ENTRY_SIZE as usize]) -> Self {
        let len_field = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
        Self {
            offset: u64::from_le_bytes([
                buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7],
            ]),
            compressed_len: len_field & !STORED_BIT,
            raw_len: u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]),
            checksum: u64::from_le_bytes([
                buf[16], buf[17], buf[18], buf[19], buf[20], buf[21], buf[22], buf[23],
            ]),
            stored: len_field & STORED_BIT != 0,
        }
    }
}

/// Check a freshly loaded block table against its header and the file length.
///
/// Every span must sit between the end of the table and `file_len`, every
/// raw length must match the block size (the final block may be shorter) and
/// the raw lengths must add up to `data_size`.
pub fn validate_table(header: &BlobHeader, entries: &[BlockEntry], file_len: u64) -> Result<()> {
    if entries.len() as u64 != u64::from(header.block_count) {
        return Err(BlobError::InvalidContainer(format!(
            "block table has {} entries, header says {}",
            entries.len(),
            header.block_count
        )));
    }

    let data_offset = header.data_offset();
    let mut total = 0u64;
    for (idx, entry) in entries.iter().enumerate() {
        let idx = idx as u64;
        let expected = header.expected_raw_len(idx);
        if entry.raw_len != expected {
            return Err(BlobError::InvalidContainer(format!(
                "block {idx} raw length {} (expected {expected})",
                entry.raw_len
            )));
        }
        if entry.stored && entry.compressed_len != entry.raw_len {
            return Err(BlobError::InvalidContainer(format!(
                "stored block {idx} has span length {} but raw length {}",
                entry.compressed_len, entry.raw_len
            )));
        }
        let end = entry.offset.checked_add(u64::from(entry.compressed_len));
        match end {
            Some(end) if entry.offset >= data_offset && end <= file_len => {}
            _ => {
                return Err(BlobError::InvalidContainer(format!(
                    "block {idx} span {}+{} lies outside {data_offset}..{file_len}",
                    entry.offset, entry.compressed_len
                )));
            }
        }
        total += u64::from(entry.raw_len);
    }

    if total != header.data_size {
        return Err(BlobError::InvalidContainer(format!(
            "block table covers {total} bytes, header says {}",
            header.data_size
        )));
    }
    Ok(())
}
