//! Picks the right [`BlobReader`] for a path.

use std::fs::{self, File};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::blob::{BlobReader, BlobType};
use crate::codec::{Codec, CodecLookup};
use crate::compressed::{open_compressed, read_header};
use crate::drive::DriveReader;
use crate::error::{BlobError, Result};
use crate::format::has_magic;
use crate::plain::PlainFileReader;

/// Classify `path` by medium type and, for regular files, by format marker.
pub fn detect_blob_type(path: impl AsRef<Path>) -> Result<BlobType> {
    let path = path.as_ref();
    let meta = fs::metadata(path)?;
    let blob_type = if meta.is_dir() {
        BlobType::Directory
    } else if is_device(&meta) {
        BlobType::Drive
    } else {
        let mut magic = Vec::with_capacity(4);
        File::open(path)?.take(4).read_to_end(&mut magic)?;
        if has_magic(&magic) {
            BlobType::Compressed
        } else {
            BlobType::Plain
        }
    };
    debug!(path = %path.display(), %blob_type, "detected blob type");
    Ok(blob_type)
}

#[cfg(unix)]
fn is_device(meta: &fs::Metadata) -> bool {
    use std::os::unix::fs::FileTypeExt;
    let file_type = meta.file_type();
    file_type.is_block_device() || file_type.is_char_device()
}

#[cfg(not(unix))]
fn is_device(_meta: &fs::Metadata) -> bool {
    false
}

/// Open `path` with whichever reader handles it.
///
/// Compressed blobs get their codec from `lookup` using the id in the header.
/// Fails when nothing recognises the input.
pub fn create_blob_reader(
    path: impl AsRef<Path>,
    lookup: CodecLookup,
) -> Result<Box<dyn BlobReader>> {
    let path = path.as_ref();
    match detect_blob_type(path)? {
        BlobType::Compressed => {
            let header = read_header(path)?;
            let codec = resolve_codec(lookup, header.codec_id)?;
            Ok(Box::new(open_compressed(path, codec)?))
        }
        other => open_uncompressed(path, other),
    }
}

/// Open a blob whose type is already known not to be [`BlobType::Compressed`].
pub(crate) fn open_uncompressed(path: &Path, blob_type: BlobType) -> Result<Box<dyn BlobReader>> {
    match blob_type {
        BlobType::Plain => Ok(Box::new(PlainFileReader::open(path)?)),
        BlobType::Drive => Ok(Box::new(DriveReader::open(path)?)),
        other => Err(BlobError::UnsupportedBlobType(other)),
    }
}

pub(crate) fn resolve_codec(lookup: CodecLookup, id: u16) -> Result<Arc<dyn Codec>> {
    lookup(id).map_err(|e| {
        debug!(codec_id = id, error = %e, "codec lookup failed");
        BlobError::UnknownCodec(id)
    })
}
