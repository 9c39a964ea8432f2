use blobz_core::format::CODEC_PASSTHROUGH;
use blobz_core::Codec;

/// Identity codec, id 0.
///
/// Every span it produces is as long as its block, so the writer records all
/// of them as stored. A blob written this way is a plain image with a block
/// table and checksums in front, which makes it handy for images that hold
/// already-compressed payloads.
pub struct PassThroughCodec;

impl Codec for PassThroughCodec {
    fn id(&self) -> u16 {
        CODEC_PASSTHROUGH
    }

    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn compress_block(&self, raw: &[u8]) -> anyhow::Result<Vec<u8>> {
        Ok(raw.to_owned())
    }

    /// Returns the span as is; a span whose length differs from the block
    /// table is caught by the reader's length check.
    fn decompress_block(&self, span: &[u8], _raw_len: usize) -> anyhow::Result<Vec<u8>> {
        Ok(span.to_owned())
    }
}
