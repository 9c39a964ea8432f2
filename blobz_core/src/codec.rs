use std::sync::Arc;

/// Block compression abstraction.
///
/// Each `Codec` implementation:
/// - Is identified by a stable numeric `id()` stored in the compressed blob header.
/// - Must compress/decompress individual blocks independently. No cross-block
///   state is permitted; this is what lets a reader decode any block alone.
pub trait Codec: Send + Sync {
    /// Stable codec ID stored in the file header.
    fn id(&self) -> u16;

    /// Human-readable codec name for CLI display.
    fn name(&self) -> &'static str;

    /// Compress a single independent block.
    fn compress_block(&self, raw: &[u8]) -> anyhow::Result<Vec<u8>>;

    /// Decompress a single independent block.
    ///
    /// `raw_len` is the decompressed length recorded in the block table. Codecs
    /// may use it to size their output; the caller checks the result length
    /// against it regardless.
    fn decompress_block(&self, compressed: &[u8], raw_len: usize) -> anyhow::Result<Vec<u8>>;
}

/// Resolves the codec id found in a file header to an implementation.
///
/// `blobz_codecs::codec_by_id` is the bundled resolver.
pub type CodecLookup = fn(u16) -> anyhow::Result<Arc<dyn Codec>>;
