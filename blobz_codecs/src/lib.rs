mod lz4_codec;
mod passthrough;
mod zlib_codec;
mod zstd_codec;

pub use lz4_codec::Lz4Codec;
pub use passthrough::PassThroughCodec;
pub use zlib_codec::ZlibCodec;
pub use zstd_codec::ZstdCodec;

use blobz_core::format::{CODEC_LZ4, CODEC_PASSTHROUGH, CODEC_ZLIB, CODEC_ZSTD};
use blobz_core::Codec;
use std::sync::Arc;

/// Resolve a codec from its on-disk `codec_id`.
///
/// Matches [`blobz_core::CodecLookup`], so it can be handed straight to
/// `create_blob_reader` and `decompress_blob_to_file`.
pub fn codec_by_id(id: u16) -> anyhow::Result<Arc<dyn Codec>> {
    match id {
        CODEC_PASSTHROUGH => Ok(Arc::new(PassThroughCodec)),
        CODEC_ZLIB => Ok(Arc::new(ZlibCodec::default())),
        CODEC_ZSTD => Ok(Arc::new(ZstdCodec::default())),
        CODEC_LZ4 => Ok(Arc::new(Lz4Codec)),
        _ => anyhow::bail!(
            "unknown codec id {}; supported: 0 (passthrough), 1 (zlib), 2 (zstd), 3 (lz4)",
            id
        ),
    }
}
