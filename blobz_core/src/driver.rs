//! Batch conversion between raw blobs and compressed blobs.
//!
//! Progress callbacks receive a status line and the completed fraction after
//! every block. Returning `false` cancels: the driver stops at that block
//! boundary, deletes the partial output and fails with [`BlobError::Cancelled`].

use std::fs::File;
use std::io::{BufWriter, Read, Seek, Write};
use std::path::Path;

use tracing::{info, warn};

use crate::blob::{BlobReader, BlobType};
use crate::codec::{Codec, CodecLookup};
use crate::compressed::{read_header, CompressedBlob};
use crate::error::{BlobError, Result};
use crate::factory::{detect_blob_type, open_uncompressed, resolve_codec};
use crate::format::{block_count_for, DEFAULT_BLOCK_SIZE, MAX_BLOCK_SIZE};
use crate::writer::{PartialFile, WriteSummary, Writer};

/// Settings for [`compress_blob`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressOptions {
    /// Raw bytes per independently compressed block.
    pub block_size: u32,
    /// Opaque value recorded in the header.
    pub sub_type: u32,
}

impl Default for CompressOptions {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            sub_type: 0,
        }
    }
}

impl CompressOptions {
    pub fn with_block_size(mut self, block_size: u32) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_sub_type(mut self, sub_type: u32) -> Self {
        self.sub_type = sub_type;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 || self.block_size > MAX_BLOCK_SIZE {
            return Err(BlobError::InvalidBlockSize(u64::from(self.block_size)));
        }
        Ok(())
    }
}

/// Progress callback that never cancels.
pub fn no_progress(_text: &str, _fraction: f32) -> bool {
    true
}

/// Compress all of `source` into a new compressed blob at `output`.
pub fn compress_blob(
    source: &mut dyn BlobReader,
    output: impl AsRef<Path>,
    codec: Box<dyn Codec>,
    options: &CompressOptions,
    mut progress: impl FnMut(&str, f32) -> bool,
) -> Result<WriteSummary> {
    options.validate()?;
    let output = output.as_ref();
    let data_size = source.data_size();
    let block_size = u64::from(options.block_size);
    let block_count = block_count_for(data_size, options.block_size);

    let mut writer = Writer::create(output, codec, options.sub_type, options.block_size, data_size)?;
    let mut buf = vec![0u8; options.block_size as usize];

    for idx in 0..block_count {
        let start = idx * block_size;
        let len = (data_size - start).min(block_size) as usize;
        source.read(start, &mut buf[..len])?;
        writer.write(&buf[..len])?;

        let fraction = (idx + 1) as f32 / block_count as f32;
        let ratio = if writer.bytes_in() == 0 {
            0.0
        } else {
            writer.bytes_out() as f64 * 100.0 / writer.bytes_in() as f64
        };
        let text = format!("{:.0}% compressed (ratio {ratio:.0}%)", fraction * 100.0);
        if !progress(&text, fraction) {
            warn!(block = idx, output = %output.display(), "compression cancelled");
            return Err(BlobError::Cancelled);
        }
    }

    let summary = writer.finish()?;
    info!(
        output = %output.display(),
        blocks = summary.block_count,
        stored = summary.stored_blocks,
        data_size = summary.data_size,
        file_size = summary.file_size,
        "compression finished"
    );
    Ok(summary)
}

/// Write the plaintext of `source` to `output`, block by block. Returns the
/// number of bytes written.
pub fn decompress_blob<R: Read + Seek>(
    source: &mut CompressedBlob<R>,
    output: impl AsRef<Path>,
    mut progress: impl FnMut(&str, f32) -> bool,
) -> Result<u64> {
    let output = output.as_ref();
    let file = File::create(output)?;
    let mut guard = PartialFile::new(output);
    let mut out = BufWriter::new(file);

    let block_count = source.block_count();
    let mut written = 0u64;
    for idx in 0..block_count {
        let block = source.read_block(idx)?;
        out.write_all(&block)?;
        written += block.len() as u64;

        let fraction = (idx + 1) as f32 / block_count as f32;
        let text = format!("{:.0}% decompressed", fraction * 100.0);
        if !progress(&text, fraction) {
            warn!(block = idx, output = %output.display(), "decompression cancelled");
            return Err(BlobError::Cancelled);
        }
    }

    let file = out.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    drop(file);
    guard.keep();

    info!(output = %output.display(), bytes = written, "decompression finished");
    Ok(written)
}

/// Compress the blob at `input` (plain file or drive) into `output`.
///
/// Inputs that are already compressed blobs are refused.
pub fn compress_file_to_blob(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    codec: Box<dyn Codec>,
    options: &CompressOptions,
    progress: impl FnMut(&str, f32) -> bool,
) -> Result<WriteSummary> {
    let input = input.as_ref();
    let blob_type = detect_blob_type(input)?;
    if blob_type == BlobType::Compressed {
        return Err(BlobError::AlreadyCompressed(input.to_path_buf()));
    }
    let mut source = open_uncompressed(input, blob_type)?;
    compress_blob(source.as_mut(), output, codec, options, progress)
}

/// Decompress the compressed blob at `input` into a plain file at `output`.
pub fn decompress_blob_to_file(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    lookup: CodecLookup,
    progress: impl FnMut(&str, f32) -> bool,
) -> Result<u64> {
    let input = input.as_ref();
    let header = read_header(input)?;
    let codec = resolve_codec(lookup, header.codec_id)?;
    let mut blob = CompressedBlob::open(input, codec)?;
    decompress_blob(&mut blob, output, progress)
}
