use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use xxhash_rust::xxh3::xxh3_64;

use crate::codec::Codec;
use crate::error::{BlobError, Result};
use crate::format::{
    block_count_for, BlobHeader, BlockEntry, BLOCK_ENTRY_SIZE, FLAG_HAS_CHECKSUM, HEADER_SIZE,
    MAX_BLOCK_SIZE, VERSION,
};

/// Deletes a half-written output file unless [`keep`](Self::keep) is called.
///
/// Declare it before the file handle it guards so the handle closes first.
pub(crate) struct PartialFile {
    path: PathBuf,
    keep: bool,
}

impl PartialFile {
    pub(crate) fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            keep: false,
        }
    }

    pub(crate) fn keep(&mut self) {
        self.keep = true;
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed incomplete output"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "could not remove incomplete output"),
        }
    }
}

/// Outcome of a completed [`Writer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteSummary {
    pub block_count: u64,
    /// Blocks kept verbatim because compression did not shrink them.
    pub stored_blocks: u64,
    pub data_size: u64,
    /// Final size of the compressed blob file.
    pub file_size: u64,
}

/// Streaming writer for compressed blobs.
///
/// # Write contract
/// The logical size is declared up front so the block table can be reserved
/// directly after the header. Call [`write`](Self::write) any number of times
/// with arbitrary-sized slices; independent blocks are compressed whenever
/// `block_size` raw bytes have been gathered. Call [`finish`](Self::finish)
/// to flush the final partial block and seal the file.
///
/// # Format layout written
/// ```text
/// [HEADER: 32 zero bytes placeholder]
/// [BLOCK TABLE: 24 zero bytes × N placeholder]
/// [BLOCK 0] [BLOCK 1] ... [BLOCK N-1]      ← independent compressed spans
/// ← seek back, write the real block table, then the real header
/// ```
///
/// Until `finish` succeeds the header is all zeroes and no reader accepts the
/// file. A writer dropped before that deletes the file.
pub struct Writer {
    file: File,
    guard: PartialFile,
    codec: Box<dyn Codec>,
    header: BlobHeader,
    /// Pending raw bytes not yet flushed into a block.
    pending: Vec<u8>,
    /// In-memory block table, written back on `finish()`.
    entries: Vec<BlockEntry>,
    /// Current write position in the file (mirrors the file cursor).
    current_offset: u64,
    /// Raw bytes accepted so far.
    written: u64,
    stored_blocks: u64,
}

impl Writer {
    /// Create a new compressed blob at `path` that will hold `data_size` bytes.
    ///
    /// Overwrites any existing file. `sub_type` is recorded verbatim in the header.
    pub fn create(
        path: impl AsRef<Path>,
        codec: Box<dyn Codec>,
        sub_type: u32,
        block_size: u32,
        data_size: u64,
    ) -> Result<Self> {
        if block_size == 0 || block_size > MAX_BLOCK_SIZE {
            return Err(BlobError::InvalidBlockSize(u64::from(block_size)));
        }
        let block_count = u32::try_from(block_count_for(data_size, block_size)).map_err(|_| {
            BlobError::InvalidContainer(format!(
                "{data_size} bytes at block size {block_size} needs more than {} blocks",
                u32::MAX
            ))
        })?;

        let path = path.as_ref();
        let mut file = File::create(path)?;
        let guard = PartialFile::new(path);

        let header = BlobHeader {
            version: VERSION,
            codec_id: codec.id(),
            sub_type,
            block_size,
            data_size,
            block_count,
            flags: FLAG_HAS_CHECKSUM,
        };

        // Placeholder header and table; both are patched in finish().
        let reserved = header.data_offset();
        io::copy(&mut io::repeat(0).take(reserved), &mut file)?;

        debug!(
            path = %path.display(),
            codec = codec.name(),
            block_size,
            block_count,
            data_size,
            "creating compressed blob"
        );

        Ok(Self {
            file,
            guard,
            codec,
            header,
            pending: Vec::with_capacity(block_size as usize),
            entries: Vec::with_capacity(block_count as usize),
            current_offset: reserved,
            written: 0,
            stored_blocks: 0,
        })
    }

    /// Buffer `data` and flush complete blocks as they fill up.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        let written = self.written + data.len() as u64;
        if written > self.header.data_size {
            return Err(BlobError::DataSizeMismatch {
                declared: self.header.data_size,
                written,
            });
        }
        self.written = written;

        let block_size = self.header.block_size as usize;
        let mut data = data;
        while !data.is_empty() {
            // Whole blocks straight from the caller's slice skip the copy.
            if self.pending.is_empty() && data.len() >= block_size {
                let (block, rest) = data.split_at(block_size);
                self.flush_block(block)?;
                data = rest;
                continue;
            }
            let take = (block_size - self.pending.len()).min(data.len());
            self.pending.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.pending.len() == block_size {
                let raw = std::mem::take(&mut self.pending);
                self.flush_block(&raw)?;
                self.pending = raw;
                self.pending.clear();
            }
        }
        Ok(())
    }

    /// Compress `raw` as a single block and append its span to the file.
    fn flush_block(&mut self, raw: &[u8]) -> Result<()> {
        let block = self.entries.len() as u64;
        let compressed = self
            .codec
            .compress_block(raw)
            .map_err(|e| BlobError::Codec(format!("block {block}: {e:#}")))?;

        // Blocks that do not shrink are kept verbatim.
        let stored = compressed.len() >= raw.len();
        let span: &[u8] = if stored { raw } else { &compressed };
        if stored {
            self.stored_blocks += 1;
        }

        self.file.write_all(span)?;
        self.entries.push(BlockEntry {
            offset: self.current_offset,
            compressed_len: span.len() as u32,
            raw_len: raw.len() as u32,
            checksum: xxh3_64(span),
            stored,
        });
        self.current_offset += span.len() as u64;
        Ok(())
    }

    /// Raw bytes accepted so far.
    pub fn bytes_in(&self) -> u64 {
        self.written
    }

    /// Span bytes written so far.
    pub fn bytes_out(&self) -> u64 {
        self.current_offset - self.header.data_offset()
    }

    /// Flush the final partial block, write the block table and header, and
    /// sync the file to disk.
    pub fn finish(mut self) -> Result<WriteSummary> {
        if !self.pending.is_empty() {
            let remaining = std::mem::take(&mut self.pending);
            self.flush_block(&remaining)?;
        }
        if self.written != self.header.data_size {
            return Err(BlobError::DataSizeMismatch {
                declared: self.header.data_size,
                written: self.written,
            });
        }

        // ── Block table ─────────────────────────────────────────────────────
        let mut table = Vec::with_capacity(self.entries.len() * BLOCK_ENTRY_SIZE as usize);
        for entry in &self.entries {
            table.extend_from_slice(&entry.to_bytes());
        }
        self.file.seek(SeekFrom::Start(HEADER_SIZE))?;
        self.file.write_all(&table)?;

        // ── Header last: only now does the file look like a blob ────────────
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&self.header.to_bytes())?;
        self.file.sync_all()?;
        self.guard.keep();

        Ok(WriteSummary {
            block_count: self.entries.len() as u64,
            stored_blocks: self.stored_blocks,
            data_size: self.header.data_size,
            file_size: self.current_offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compressed::CompressedBlob;
    use std::sync::Arc;

    /// Halves runs of equal bytes into (count, byte) pairs; enough to exercise
    /// both compressed and stored spans without an external codec.
    struct PairRle;

    impl Codec for PairRle {
        fn id(&self) -> u16 {
            0x7e57
        }

        fn name(&self) -> &'static str {
            "pair-rle"
        }

        fn compress_block(&self, raw: &[u8]) -> anyhow::Result<Vec<u8>> {
            let mut out = Vec::new();
            for run in raw.chunk_by(|a, b| a == b) {
                for piece in run.chunks(255) {
                    out.push(piece.len() as u8);
                    out.push(piece[0]);
                }
            }
            Ok(out)
        }

        fn decompress_block(&self, compressed: &[u8], raw_len: usize) -> anyhow::Result<Vec<u8>> {
            if compressed.len() % 2 != 0 {
                anyhow::bail!("odd-length rle stream");
            }
            let mut out = Vec::with_capacity(raw_len);
            for pair in compressed.chunks_exact(2) {
                out.extend(std::iter::repeat(pair[1]).take(pair[0] as usize));
            }
            Ok(out)
        }
    }

    #[test]
    fn writes_arbitrary_slices_into_fixed_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slices.blob");
        let data: Vec<u8> = (0..1000u32).map(|i| (i / 50) as u8).collect();

        let mut w = Writer::create(&path, Box::new(PairRle), 9, 128, data.len() as u64).unwrap();
        for piece in data.chunks(77) {
            w.write(piece).unwrap();
        }
        let summary = w.finish().unwrap();
        assert_eq!(summary.block_count, 8);
        assert_eq!(summary.stored_blocks, 0);
        assert_eq!(summary.file_size, std::fs::metadata(&path).unwrap().len());

        let mut blob = CompressedBlob::open(&path, Arc::new(PairRle)).unwrap();
        assert_eq!(blob.header().sub_type, 9);
        let mut back = Vec::new();
        for i in 0..blob.block_count() {
            back.extend(blob.read_block(i).unwrap());
        }
        assert_eq!(back, data);
    }

    #[test]
    fn incompressible_blocks_are_stored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stored.blob");
        // Alternating bytes double in size under PairRle.
        let data: Vec<u8> = (0..64u8).collect();

        let mut w = Writer::create(&path, Box::new(PairRle), 0, 16, 64).unwrap();
        w.write(&data).unwrap();
        let summary = w.finish().unwrap();
        assert_eq!(summary.stored_blocks, 4);

        let mut blob = CompressedBlob::open(&path, Arc::new(PairRle)).unwrap();
        assert!(blob.entries().iter().all(|e| e.stored && e.compressed_len == 16));
        assert_eq!(blob.read_block(3).unwrap(), data[48..].to_vec());
    }

    #[test]
    fn dropped_writer_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abandoned.blob");
        let mut w = Writer::create(&path, Box::new(PairRle), 0, 16, 64).unwrap();
        w.write(&[1u8; 40]).unwrap();
        assert!(path.exists());
        drop(w);
        assert!(!path.exists());
    }

    #[test]
    fn short_input_fails_and_removes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.blob");
        let mut w = Writer::create(&path, Box::new(PairRle), 0, 16, 64).unwrap();
        w.write(&[1u8; 40]).unwrap();
        assert!(matches!(
            w.finish(),
            Err(BlobError::DataSizeMismatch {
                declared: 64,
                written: 40
            })
        ));
        assert!(!path.exists());
    }

    #[test]
    fn overlong_input_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("long.blob");
        let mut w = Writer::create(&path, Box::new(PairRle), 0, 16, 8).unwrap();
        assert!(w.write(&[0u8; 9]).is_err());
    }

    #[test]
    fn zero_block_size_is_rejected_before_touching_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zero.blob");
        assert!(matches!(
            Writer::create(&path, Box::new(PairRle), 0, 0, 8),
            Err(BlobError::InvalidBlockSize(0))
        ));
        assert!(!path.exists());
    }
}
