use std::io::{Read, Write};

use anyhow::Context;
use blobz_core::format::CODEC_ZLIB;
use blobz_core::Codec;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

/// zlib (deflate) block codec, the default for new blobs.
///
/// Slower to decode than lz4 but smaller, and readable by any zlib
/// implementation.
pub struct ZlibCodec {
    /// Compression level, 0 to 9.
    pub level: u32,
}

impl Default for ZlibCodec {
    fn default() -> Self {
        Self { level: 9 }
    }
}

impl ZlibCodec {
    pub fn new(level: u32) -> Self {
        Self { level: level.min(9) }
    }
}

impl Codec for ZlibCodec {
    fn id(&self) -> u16 {
        CODEC_ZLIB
    }

    fn name(&self) -> &'static str {
        "zlib"
    }

    fn compress_block(&self, raw: &[u8]) -> anyhow::Result<Vec<u8>> {
        let mut encoder = ZlibEncoder::new(
            Vec::with_capacity(raw.len() / 2),
            Compression::new(self.level),
        );
        encoder.write_all(raw)?;
        Ok(encoder.finish()?)
    }

    fn decompress_block(&self, compressed: &[u8], raw_len: usize) -> anyhow::Result<Vec<u8>> {
        let mut raw = Vec::with_capacity(raw_len);
        // One byte of slack so an overlong stream shows up as a length mismatch.
        ZlibDecoder::new(compressed)
            .take(raw_len as u64 + 1)
            .read_to_end(&mut raw)
            .context("zlib decompress error")?;
        Ok(raw)
    }
}
