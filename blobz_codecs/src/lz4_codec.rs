use anyhow::{bail, ensure};
use blobz_core::format::CODEC_LZ4;
use blobz_core::Codec;

/// Length of the little-endian raw-size prefix on every span.
const SIZE_PREFIX: usize = 4;

/// LZ4 block codec.
///
/// The cheapest codec to decode, which suits images that are mostly read
/// back through the sector cache. Each span is the raw length as a u32
/// followed by one LZ4 block.
pub struct Lz4Codec;

impl Codec for Lz4Codec {
    fn id(&self) -> u16 {
        CODEC_LZ4
    }

    fn name(&self) -> &'static str {
        "lz4"
    }

    fn compress_block(&self, raw: &[u8]) -> anyhow::Result<Vec<u8>> {
        Ok(lz4_flex::compress_prepend_size(raw))
    }

    fn decompress_block(&self, compressed: &[u8], raw_len: usize) -> anyhow::Result<Vec<u8>> {
        let Some((prefix, body)) = compressed.split_first_chunk::<SIZE_PREFIX>() else {
            bail!("lz4 span of {} bytes has no size prefix", compressed.len());
        };
        let declared = u32::from_le_bytes(*prefix) as usize;
        // Checked before decoding so a bogus prefix never drives the allocation.
        ensure!(
            declared == raw_len,
            "lz4 span declares {declared} bytes, block table says {raw_len}"
        );
        let mut raw = vec![0u8; raw_len];
        let written = lz4_flex::block::decompress_into(body, &mut raw)
            .map_err(|e| anyhow::anyhow!("lz4 decompress error: {e}"))?;
        raw.truncate(written);
        Ok(raw)
    }
}
