pub mod blob;
pub mod codec;
pub mod compressed;
pub mod drive;
pub mod driver;
pub mod error;
pub mod factory;
pub mod format;
pub mod plain;
pub mod sector;
pub mod writer;

pub use blob::{BlobReader, BlobType, BLOB_TYPE_REVISION};
pub use codec::{Codec, CodecLookup};
pub use compressed::{open_compressed, read_header, CompressedBlob, CompressedBlobReader};
pub use drive::DriveReader;
pub use driver::{
    compress_blob, compress_file_to_blob, decompress_blob, decompress_blob_to_file, no_progress,
    CompressOptions,
};
pub use error::{BlobError, Result};
pub use factory::{create_blob_reader, detect_blob_type};
pub use format::{BlobHeader, BlockEntry, HEADER_SIZE, MAGIC};
pub use plain::PlainFileReader;
pub use sector::{BlockSource, CacheStats, SectorReader, CACHE_SIZE};
pub use writer::{WriteSummary, Writer};
