//! End-to-end tests: raw file → compressed blob → byte-range reads and back.
use std::path::{Path, PathBuf};

use blobz_codecs::{codec_by_id, Lz4Codec, PassThroughCodec, ZlibCodec, ZstdCodec};
use blobz_core::format::BLOCK_ENTRY_SIZE;
use blobz_core::{
    compress_blob, compress_file_to_blob, create_blob_reader, decompress_blob_to_file,
    detect_blob_type, no_progress, open_compressed, BlobError, BlobReader, BlobType, BlockEntry,
    BlockSource, Codec, CompressOptions, CompressedBlob, PlainFileReader, SectorReader,
    HEADER_SIZE,
};
use proptest::prelude::*;
use std::sync::Arc;
use tempfile::TempDir;
use xxhash_rust::xxh3::xxh3_64;

/// Generate `len` deterministic bytes using a simple LCG.
fn pseudo_random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = seed;
    (0..len)
        .map(|_| {
            rng = rng
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (rng >> 56) as u8
        })
        .collect()
}

/// Generate `len` highly compressible bytes (repeating pattern).
fn compressible_bytes(len: usize) -> Vec<u8> {
    let pattern = b"the quick brown fox jumps over the lazy dog. ";
    (0..len).map(|i| pattern[i % pattern.len()]).collect()
}

// ── helpers ───────────────────────────────────────────────────────────────

fn write_plain(dir: &TempDir, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, data).unwrap();
    path
}

/// Compress `data` with `codec` at `block_size`; returns the blob's path.
fn compress_bytes(dir: &TempDir, data: &[u8], block_size: u32, codec: Box<dyn Codec>) -> PathBuf {
    let input = write_plain(dir, "input.bin", data);
    let output = dir.path().join("output.blob");
    let options = CompressOptions::default().with_block_size(block_size);
    compress_file_to_blob(&input, &output, codec, &options, no_progress).unwrap();
    output
}

/// Table entry `idx` of the blob at `path`.
fn table_entry(path: &Path, idx: usize, codec: Arc<dyn Codec>) -> BlockEntry {
    CompressedBlob::open(path, codec).unwrap().entries()[idx].clone()
}

/// Overwrite table entry `idx` in a raw blob image.
fn patch_entry(bytes: &mut [u8], idx: usize, entry: &BlockEntry) {
    let at = HEADER_SIZE as usize + idx * BLOCK_ENTRY_SIZE as usize;
    bytes[at..at + BLOCK_ENTRY_SIZE as usize].copy_from_slice(&entry.to_bytes());
}

fn decompress_to_vec(dir: &TempDir, blob: &Path) -> Vec<u8> {
    let output = dir.path().join("restored.bin");
    decompress_blob_to_file(blob, &output, codec_by_id, no_progress).unwrap();
    std::fs::read(output).unwrap()
}

// ── tests ──────────────────────────────────────────────────────────────────

#[test]
fn roundtrip_every_codec() {
    let data = compressible_bytes(5 * 4096 + 1234);
    let codecs: Vec<Box<dyn Codec>> = vec![
        Box::new(PassThroughCodec),
        Box::new(ZlibCodec::default()),
        Box::new(ZstdCodec::default()),
        Box::new(Lz4Codec),
    ];
    for codec in codecs {
        let name = codec.name();
        let dir = TempDir::new().unwrap();
        let blob = compress_bytes(&dir, &data, 4096, codec);
        assert_eq!(decompress_to_vec(&dir, &blob), data, "codec {name}");
    }
}

#[test]
fn zlib_shrinks_compressible_data() {
    let data = compressible_bytes(64 * 1024);
    let dir = TempDir::new().unwrap();
    let blob = compress_bytes(&dir, &data, 16 * 1024, Box::new(ZlibCodec::default()));

    let reader = create_blob_reader(&blob, codec_by_id).unwrap();
    assert_eq!(reader.blob_type(), BlobType::Compressed);
    assert_eq!(reader.data_size(), data.len() as u64);
    assert_eq!(reader.raw_size(), std::fs::metadata(&blob).unwrap().len());
    assert!(reader.raw_size() < reader.data_size() / 4);
}

/// Four-byte blocks over 0..10: three blocks of 4, 4 and 2 bytes; a read at
/// offset 3 has to stitch blocks 0 and 1 together.
#[test]
fn ten_byte_example() {
    let data: Vec<u8> = (0u8..10).collect();
    let dir = TempDir::new().unwrap();
    let blob = compress_bytes(&dir, &data, 4, Box::new(ZlibCodec::default()));

    let mut reader = open_compressed(&blob, Arc::new(ZlibCodec::default())).unwrap();
    let raw_lens: Vec<u32> = reader.source().entries().iter().map(|e| e.raw_len).collect();
    assert_eq!(raw_lens, vec![4, 4, 2]);

    assert_eq!(reader.read_vec(3, 4).unwrap(), vec![3, 4, 5, 6]);
    assert_eq!(reader.read_vec(0, 10).unwrap(), data);
}

#[test]
fn bounds_are_enforced_at_the_end_of_data() {
    let data = pseudo_random_bytes(10_000, 7);
    let dir = TempDir::new().unwrap();
    let blob = compress_bytes(&dir, &data, 1024, Box::new(ZstdCodec::default()));
    let mut reader = create_blob_reader(&blob, codec_by_id).unwrap();
    let end = reader.data_size();

    let mut one = [0u8; 1];
    let err = reader.read(end, &mut one).unwrap_err();
    assert!(err.is_out_of_range(), "got {err}");
    reader.read(end - 1, &mut one).unwrap();
    assert_eq!(one[0], data[data.len() - 1]);

    let mut big = vec![0u8; 2];
    assert!(reader.read(end - 1, &mut big).unwrap_err().is_out_of_range());
}

/// Read only block N without touching blocks 0..N-1.
#[test]
fn random_access_skips_prior_blocks() {
    const NUM_BLOCKS: usize = 16;
    const TARGET_BLOCK: u64 = 12;
    const BLOCK: usize = 4096;

    let data = pseudo_random_bytes(NUM_BLOCKS * BLOCK, 0xDEAD_BEEF);
    let dir = TempDir::new().unwrap();
    let blob = compress_bytes(&dir, &data, BLOCK as u32, Box::new(ZstdCodec::default()));

    let mut r = CompressedBlob::open(&blob, Arc::new(ZstdCodec::default())).unwrap();
    assert_eq!(r.block_count(), NUM_BLOCKS as u64);
    let raw = r.read_block(TARGET_BLOCK).unwrap();

    let start = TARGET_BLOCK as usize * BLOCK;
    assert_eq!(raw.as_slice(), &data[start..start + BLOCK]);
    assert!(r.read_block(NUM_BLOCKS as u64).unwrap_err().is_out_of_range());
}

#[test]
fn warm_cache_returns_the_same_bytes_as_cold_reads() {
    let data = compressible_bytes(40 * 512 + 100);
    let dir = TempDir::new().unwrap();
    let blob = compress_bytes(&dir, &data, 512, Box::new(Lz4Codec));

    let ranges: Vec<(u64, usize)> = pseudo_random_bytes(200, 3)
        .chunks(2)
        .map(|pair| (u64::from(pair[0]) * 70, usize::from(pair[1]) * 3 + 1))
        .collect();

    let mut warm = open_compressed(&blob, Arc::new(Lz4Codec)).unwrap();
    for &(offset, size) in &ranges {
        let hot = warm.read_vec(offset, size).unwrap();
        let mut cold = open_compressed(&blob, Arc::new(Lz4Codec)).unwrap();
        let fresh = cold.read_vec(offset, size).unwrap();
        assert_eq!(hot, fresh, "offset={offset} size={size}");
        assert_eq!(hot.as_slice(), &data[offset as usize..offset as usize + size]);
    }
    assert!(warm.stats().hits > 0);
}

#[test]
fn aligned_run_matches_block_by_block_decoding() {
    let data = pseudo_random_bytes(10 * 256, 11);
    let dir = TempDir::new().unwrap();
    let blob = compress_bytes(&dir, &data, 256, Box::new(ZlibCodec::default()));

    let mut reader = open_compressed(&blob, Arc::new(ZlibCodec::default())).unwrap();
    let run = reader.read_vec(2 * 256, 5 * 256).unwrap();
    assert_eq!(reader.stats().aligned_runs, 1);
    assert_eq!(reader.stats().misses, 0);

    let mut blocks = CompressedBlob::open(&blob, Arc::new(ZlibCodec::default())).unwrap();
    let mut expected = Vec::new();
    for idx in 2..7 {
        expected.extend(blocks.read_block(idx).unwrap());
    }
    assert_eq!(run, expected);
}

#[test]
fn table_covers_exactly_the_data() {
    for len in [0usize, 1, 4095, 4096, 4097, 3 * 4096] {
        let data = compressible_bytes(len);
        let dir = TempDir::new().unwrap();
        let blob = compress_bytes(&dir, &data, 4096, Box::new(ZlibCodec::default()));
        let r = CompressedBlob::open(&blob, Arc::new(ZlibCodec::default())).unwrap();

        let total: u64 = r.entries().iter().map(|e| u64::from(e.raw_len)).sum();
        assert_eq!(total, len as u64);
        if let Some(last) = r.entries().last() {
            let expected = match len % 4096 {
                0 => 4096,
                rem => rem as u32,
            };
            assert_eq!(last.raw_len, expected, "len={len}");
        } else {
            assert_eq!(len, 0);
        }
        assert_eq!(decompress_to_vec(&dir, &blob), data);
    }
}

#[test]
fn incompressible_blocks_are_stored_verbatim() {
    let data = pseudo_random_bytes(8 * 1024, 0x1234_5678);
    let dir = TempDir::new().unwrap();
    let input = write_plain(&dir, "noise.bin", &data);
    let output = dir.path().join("noise.blob");
    let options = CompressOptions::default().with_block_size(1024);

    let summary = compress_file_to_blob(
        &input,
        &output,
        Box::new(ZlibCodec::default()),
        &options,
        no_progress,
    )
    .unwrap();
    assert_eq!(summary.block_count, 8);
    assert_eq!(summary.stored_blocks, 8);
    assert_eq!(decompress_to_vec(&dir, &output), data);
}

#[test]
fn progress_reports_every_block() {
    let data = compressible_bytes(4 * 1000);
    let dir = TempDir::new().unwrap();
    let input = write_plain(&dir, "in.bin", &data);
    let output = dir.path().join("out.blob");

    let mut seen = Vec::new();
    compress_file_to_blob(
        &input,
        &output,
        Box::new(ZlibCodec::default()),
        &CompressOptions::default().with_block_size(1000),
        |text: &str, fraction: f32| {
            seen.push((text.to_string(), fraction));
            true
        },
    )
    .unwrap();

    assert_eq!(seen.len(), 4);
    assert!(seen.windows(2).all(|w| w[0].1 < w[1].1));
    assert_eq!(seen[3].1, 1.0);
    assert!(seen[3].0.starts_with("100% compressed"));
}

#[test]
fn cancelled_compression_leaves_no_file() {
    let data = compressible_bytes(10 * 1024);
    let dir = TempDir::new().unwrap();
    let input = write_plain(&dir, "in.bin", &data);
    let output = dir.path().join("cancelled.blob");

    let result = compress_file_to_blob(
        &input,
        &output,
        Box::new(ZlibCodec::default()),
        &CompressOptions::default().with_block_size(1024),
        |_: &str, fraction: f32| fraction < 0.5,
    );
    assert!(matches!(result, Err(BlobError::Cancelled)));
    assert!(!output.exists());
}

#[test]
fn cancelled_decompression_leaves_no_file() {
    let data = compressible_bytes(10 * 1024);
    let dir = TempDir::new().unwrap();
    let blob = compress_bytes(&dir, &data, 1024, Box::new(ZstdCodec::default()));
    let output = dir.path().join("partial.bin");

    let result = decompress_blob_to_file(&blob, &output, codec_by_id, |_: &str, f: f32| f < 0.3);
    assert!(matches!(result, Err(BlobError::Cancelled)));
    assert!(!output.exists());
}

#[test]
fn failing_source_leaves_no_file() {
    struct Flaky {
        inner: PlainFileReader,
    }

    impl BlobReader for Flaky {
        fn blob_type(&self) -> BlobType {
            BlobType::Plain
        }
        fn raw_size(&self) -> u64 {
            self.inner.raw_size()
        }
        fn data_size(&self) -> u64 {
            self.inner.data_size()
        }
        fn read(&mut self, offset: u64, out: &mut [u8]) -> blobz_core::Result<()> {
            if offset >= 2048 {
                return Err(std::io::Error::other("medium error").into());
            }
            self.inner.read(offset, out)
        }
    }

    let dir = TempDir::new().unwrap();
    let input = write_plain(&dir, "in.bin", &compressible_bytes(8192));
    let output = dir.path().join("broken.blob");
    let mut source = Flaky {
        inner: PlainFileReader::open(&input).unwrap(),
    };

    let result = compress_blob(
        &mut source,
        &output,
        Box::new(ZlibCodec::default()),
        &CompressOptions::default().with_block_size(1024),
        no_progress,
    );
    assert!(matches!(result, Err(BlobError::Io(_))));
    assert!(!output.exists());
}

#[test]
fn flipped_byte_is_reported_as_corruption() {
    let data = compressible_bytes(4 * 2048);
    let dir = TempDir::new().unwrap();
    let blob = compress_bytes(&dir, &data, 2048, Box::new(ZlibCodec::default()));

    let span_offset = {
        let r = CompressedBlob::open(&blob, Arc::new(ZlibCodec::default())).unwrap();
        r.entries()[2].offset as usize
    };
    let mut bytes = std::fs::read(&blob).unwrap();
    bytes[span_offset + 1] ^= 0xFF;
    std::fs::write(&blob, &bytes).unwrap();

    let mut reader = open_compressed(&blob, Arc::new(ZlibCodec::default())).unwrap();
    // Blocks before the damage still read fine.
    assert_eq!(reader.read_vec(0, 4096).unwrap(), data[..4096].to_vec());
    let err = reader.read_vec(2 * 2048 + 10, 5).unwrap_err();
    assert!(err.is_corruption(), "got {err}");
    assert!(matches!(err, BlobError::ChecksumMismatch { block: 2, .. }));
    // Never substituted on a retry either.
    assert!(reader.read_vec(2 * 2048, 1).unwrap_err().is_corruption());
}

#[test]
fn undecodable_span_with_valid_checksum_is_corrupt() {
    let data = compressible_bytes(4 * 2048);
    let dir = TempDir::new().unwrap();
    let blob = compress_bytes(&dir, &data, 2048, Box::new(ZlibCodec::default()));

    let mut entry = table_entry(&blob, 1, Arc::new(ZlibCodec::default()));
    assert!(!entry.stored);
    let span = entry.offset as usize..(entry.offset + u64::from(entry.compressed_len)) as usize;
    let mut bytes = std::fs::read(&blob).unwrap();
    bytes[span.clone()].fill(0xFF);
    entry.checksum = xxh3_64(&bytes[span]);
    patch_entry(&mut bytes, 1, &entry);
    std::fs::write(&blob, &bytes).unwrap();

    let mut reader = open_compressed(&blob, Arc::new(ZlibCodec::default())).unwrap();
    assert_eq!(reader.read_vec(0, 2048).unwrap(), data[..2048].to_vec());
    let err = reader.read_vec(2048 + 5, 10).unwrap_err();
    assert!(matches!(err, BlobError::Corrupt { block: 1, .. }), "got {err}");
    assert!(err.is_corruption());
}

#[test]
fn decoded_length_disagreeing_with_the_table_is_corrupt() {
    let data = pseudo_random_bytes(3 * 1024, 99);
    let dir = TempDir::new().unwrap();
    let blob = compress_bytes(&dir, &data, 1024, Box::new(PassThroughCodec));

    // Passthrough spans are stored verbatim; relabel block 0 as a 1000-byte
    // coded span so the codec hands back fewer bytes than raw_len promises.
    let mut entry = table_entry(&blob, 0, Arc::new(PassThroughCodec));
    assert!(entry.stored);
    let mut bytes = std::fs::read(&blob).unwrap();
    let start = entry.offset as usize;
    entry.stored = false;
    entry.compressed_len = 1000;
    entry.checksum = xxh3_64(&bytes[start..start + 1000]);
    patch_entry(&mut bytes, 0, &entry);
    std::fs::write(&blob, &bytes).unwrap();

    let mut reader = open_compressed(&blob, Arc::new(PassThroughCodec)).unwrap();
    let err = reader.read_vec(10, 1).unwrap_err();
    assert!(matches!(err, BlobError::Corrupt { block: 0, .. }), "got {err}");
    assert_eq!(reader.read_vec(1024, 2048).unwrap(), data[1024..].to_vec());

    let output = dir.path().join("restored.bin");
    let result = decompress_blob_to_file(&blob, &output, codec_by_id, no_progress);
    assert!(matches!(result, Err(BlobError::Corrupt { block: 0, .. })));
    assert!(!output.exists());
}

#[test]
fn sector_cache_refuses_a_foreign_block_size() {
    let data: Vec<u8> = (0u8..16).collect();
    let dir = TempDir::new().unwrap();
    let blob = compress_bytes(&dir, &data, 4, Box::new(ZlibCodec::default()));
    let open = || CompressedBlob::open(&blob, Arc::new(ZlibCodec::default())).unwrap();

    for wrong in [8u32, 2] {
        let err = SectorReader::with_block_size(open(), wrong).err().unwrap();
        assert!(
            matches!(err, BlobError::BlockSizeMismatch { native: 4, .. }),
            "got {err}"
        );
    }

    let mut blob_blocks = open();
    let mut wide = [0u8; 8];
    assert!(matches!(
        blob_blocks.fetch_block(1, &mut wide),
        Err(BlobError::BlockSizeMismatch { native: 4, requested: 8 })
    ));
    let mut narrow = [0u8; 2];
    assert!(matches!(
        blob_blocks.fetch_block(0, &mut narrow),
        Err(BlobError::BlockSizeMismatch { native: 4, requested: 2 })
    ));

    let mut reader = SectorReader::with_block_size(blob_blocks, 4).unwrap();
    assert_eq!(reader.read_vec(8, 4).unwrap(), vec![8, 9, 10, 11]);
    assert_eq!(reader.read_vec(0, 1).unwrap(), vec![0]);
}

#[test]
fn truncated_blob_is_rejected_on_open() {
    let data = compressible_bytes(4 * 2048);
    let dir = TempDir::new().unwrap();
    let blob = compress_bytes(&dir, &data, 2048, Box::new(ZlibCodec::default()));

    let bytes = std::fs::read(&blob).unwrap();
    std::fs::write(&blob, &bytes[..bytes.len() - 3]).unwrap();

    let err = create_blob_reader(&blob, codec_by_id).err().unwrap();
    assert!(err.is_corruption(), "got {err}");
}

#[test]
fn codec_mismatch_error() {
    let dir = TempDir::new().unwrap();
    let blob = compress_bytes(&dir, b"hello world", 4096, Box::new(ZstdCodec::default()));

    let err = CompressedBlob::open(&blob, Arc::new(Lz4Codec)).err().unwrap();
    assert!(
        err.to_string().contains("codec mismatch"),
        "error message should mention codec mismatch, got: {err}"
    );
}

#[test]
fn factory_classifies_inputs() {
    let data = compressible_bytes(3000);
    let dir = TempDir::new().unwrap();
    let plain = write_plain(&dir, "plain.iso", &data);
    let blob = compress_bytes(&dir, &data, 1024, Box::new(ZlibCodec::default()));

    assert_eq!(detect_blob_type(&plain).unwrap(), BlobType::Plain);
    assert_eq!(detect_blob_type(&blob).unwrap(), BlobType::Compressed);
    assert_eq!(detect_blob_type(dir.path()).unwrap(), BlobType::Directory);

    let mut plain_reader = create_blob_reader(&plain, codec_by_id).unwrap();
    let mut blob_reader = create_blob_reader(&blob, codec_by_id).unwrap();
    assert_eq!(plain_reader.blob_type(), BlobType::Plain);
    assert_eq!(
        plain_reader.read_vec(1000, 1500).unwrap(),
        blob_reader.read_vec(1000, 1500).unwrap()
    );

    assert!(matches!(
        create_blob_reader(dir.path(), codec_by_id),
        Err(BlobError::UnsupportedBlobType(BlobType::Directory))
    ));
    assert!(matches!(
        create_blob_reader(dir.path().join("missing.iso"), codec_by_id),
        Err(BlobError::Io(_))
    ));
}

#[test]
fn compressing_a_compressed_blob_is_refused() {
    let dir = TempDir::new().unwrap();
    let blob = compress_bytes(&dir, &compressible_bytes(5000), 1024, Box::new(Lz4Codec));
    let again = dir.path().join("again.blob");

    let result = compress_file_to_blob(
        &blob,
        &again,
        Box::new(Lz4Codec),
        &CompressOptions::default(),
        no_progress,
    );
    assert!(matches!(result, Err(BlobError::AlreadyCompressed(_))));
    assert!(!again.exists());
}

#[test]
fn unknown_codec_id_is_reported() {
    struct Mystery;

    impl Codec for Mystery {
        fn id(&self) -> u16 {
            900
        }
        fn name(&self) -> &'static str {
            "mystery"
        }
        fn compress_block(&self, raw: &[u8]) -> anyhow::Result<Vec<u8>> {
            Ok(raw.to_vec())
        }
        fn decompress_block(&self, compressed: &[u8], _raw_len: usize) -> anyhow::Result<Vec<u8>> {
            Ok(compressed.to_vec())
        }
    }

    let dir = TempDir::new().unwrap();
    let blob = compress_bytes(&dir, b"abcdefgh", 4, Box::new(Mystery));
    assert!(matches!(
        create_blob_reader(&blob, codec_by_id),
        Err(BlobError::UnknownCodec(900))
    ));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn any_range_matches_the_linear_slice(
        data in proptest::collection::vec(any::<u8>(), 1..3000),
        block_size in 1u32..300,
        picks in proptest::collection::vec((any::<u16>(), any::<u16>()), 1..20),
    ) {
        let dir = TempDir::new().unwrap();
        let blob = compress_bytes(&dir, &data, block_size, Box::new(ZlibCodec::default()));
        let mut reader = create_blob_reader(&blob, codec_by_id).unwrap();

        for (a, b) in picks {
            let offset = usize::from(a) % data.len();
            let size = usize::from(b) % (data.len() - offset + 1);
            let got = reader.read_vec(offset as u64, size).unwrap();
            prop_assert_eq!(got.as_slice(), &data[offset..offset + size]);
        }
    }
}
