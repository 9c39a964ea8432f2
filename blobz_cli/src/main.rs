use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use blobz_codecs::{codec_by_id, Lz4Codec, PassThroughCodec, ZlibCodec, ZstdCodec};
use blobz_core::format::DEFAULT_BLOCK_SIZE;
use blobz_core::{
    compress_file_to_blob, create_blob_reader, decompress_blob_to_file, open_compressed,
    read_header, BlobReader, Codec, CompressOptions, CompressedBlob,
};

// ── CLI definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "blobz",
    about = "Compress disc images into random-access blobs, inspect them, and read byte ranges",
    version
)]
struct Cli {
    /// Log debug output (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress a plain image or drive into a compressed blob
    Compress {
        /// Source image or device
        input: PathBuf,
        /// Destination compressed blob
        output: PathBuf,
        /// Codec to use: zlib | zstd | lz4 | passthrough
        #[arg(short, long, default_value = "zlib", env = "BLOBZ_CODEC")]
        codec: String,
        /// Compression level (zlib 0–9, zstd 1–22; ignored by other codecs)
        #[arg(long)]
        level: Option<i32>,
        /// Raw bytes per block
        #[arg(short, long, default_value_t = DEFAULT_BLOCK_SIZE, env = "BLOBZ_BLOCK_SIZE")]
        block_size: u32,
        /// Opaque sub-type recorded in the header
        #[arg(long, default_value_t = 0)]
        sub_type: u32,
    },
    /// Fully decompress a compressed blob back to a plain image
    Decompress {
        /// Source compressed blob
        input: PathBuf,
        /// Destination image
        output: PathBuf,
    },
    /// Print header metadata and block table statistics
    Inspect {
        /// Compressed blob to inspect
        file: PathBuf,
        /// Print per-block details
        #[arg(long)]
        blocks: bool,
    },
    /// Read a byte range from any supported blob
    Read {
        /// Blob file, image or device
        file: PathBuf,
        /// Logical byte offset
        #[arg(long)]
        offset: u64,
        /// Number of bytes to read
        #[arg(long)]
        size: usize,
        /// Write raw bytes to a file instead of printing a hex dump
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Decompress a single block by index
    ReadBlock {
        /// Compressed blob
        file: PathBuf,
        /// Zero-based block index to read
        #[arg(short, long)]
        index: u64,
        /// Write raw bytes to a file instead of printing a hex dump
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Benchmark random byte-range reads through the sector cache
    Bench {
        /// Compressed blob
        file: PathBuf,
        /// Number of random reads
        #[arg(short, long, default_value_t = 1000)]
        count: u64,
        /// Bytes per read
        #[arg(short, long, default_value_t = 2048)]
        size: u64,
        /// Fixed random seed for reproducibility
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
}

// ── Helpers ────────────────────────────────────────────────────────────────

fn codec_from_name(name: &str, level: Option<i32>) -> anyhow::Result<Box<dyn Codec>> {
    match name {
        "passthrough" | "pass" | "none" => Ok(Box::new(PassThroughCodec)),
        "zlib" | "deflate" => Ok(Box::new(match level {
            Some(level) => ZlibCodec::new(level.max(0) as u32),
            None => ZlibCodec::default(),
        })),
        "zstd" | "z" => Ok(Box::new(ZstdCodec::new(level.unwrap_or(3)))),
        "lz4" | "l" => Ok(Box::new(Lz4Codec)),
        other => anyhow::bail!(
            "unknown codec '{}'. Valid options: zlib, zstd, lz4, passthrough",
            other
        ),
    }
}

fn open_blob(file: &Path) -> anyhow::Result<CompressedBlob> {
    let header = read_header(file).with_context(|| format!("reading header of {:?}", file))?;
    let codec = codec_by_id(header.codec_id)?;
    Ok(CompressedBlob::open(file, codec)?)
}

fn human_bytes(n: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut v = n as f64;
    let mut unit = 0;
    while v >= 1024.0 && unit < UNITS.len() - 1 {
        v /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", n)
    } else {
        format!("{:.2} {}", v, UNITS[unit])
    }
}

fn print_progress(text: &str, _fraction: f32) -> bool {
    eprint!("\r  {:<40}", text);
    let _ = io::stderr().flush();
    true
}

fn hex_dump(label: &str, raw: &[u8]) {
    let preview = &raw[..raw.len().min(256)];
    println!("--- {} ({} bytes, first {} shown) ---", label, raw.len(), preview.len());
    for (i, chunk) in preview.chunks(16).enumerate() {
        print!("  {:04x}  ", i * 16);
        for b in chunk {
            print!("{:02x} ", b);
        }
        for _ in chunk.len()..16 {
            print!("   ");
        }
        print!("  |");
        for b in chunk {
            if b.is_ascii_graphic() || *b == b' ' {
                print!("{}", *b as char);
            } else {
                print!(".");
            }
        }
        println!("|");
    }
    if raw.len() > 256 {
        println!("  ... ({} bytes remaining not shown)", raw.len() - 256);
    }
}

fn emit(label: &str, raw: &[u8], output: Option<PathBuf>) -> anyhow::Result<()> {
    match output {
        Some(path) => {
            std::fs::write(&path, raw).with_context(|| format!("writing {:?}", path))?;
            eprintln!("  written to {:?}", path);
        }
        None => hex_dump(label, raw),
    }
    Ok(())
}

// ── Subcommand implementations ─────────────────────────────────────────────

fn run_compress(
    input: PathBuf,
    output: PathBuf,
    codec_name: &str,
    level: Option<i32>,
    block_size: u32,
    sub_type: u32,
) -> anyhow::Result<()> {
    let codec = codec_from_name(codec_name, level)?;
    let codec_display = codec.name().to_string();
    let options = CompressOptions::default()
        .with_block_size(block_size)
        .with_sub_type(sub_type);

    let t0 = Instant::now();
    let summary = compress_file_to_blob(&input, &output, codec, &options, print_progress)
        .with_context(|| format!("compressing {:?} into {:?}", input, output))?;
    let elapsed = t0.elapsed();
    eprintln!();

    let ratio = if summary.file_size == 0 {
        1.0
    } else {
        summary.data_size as f64 / summary.file_size as f64
    };
    eprintln!("  codec       : {}", codec_display);
    eprintln!("  block size  : {}", human_bytes(u64::from(block_size)));
    eprintln!("  blocks      : {} ({} stored)", summary.block_count, summary.stored_blocks);
    eprintln!("  raw size    : {}", human_bytes(summary.data_size));
    eprintln!("  compressed  : {}", human_bytes(summary.file_size));
    eprintln!("  ratio       : {:.2}x", ratio);
    eprintln!(
        "  throughput  : {}/s",
        human_bytes((summary.data_size as f64 / elapsed.as_secs_f64()) as u64)
    );
    eprintln!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    Ok(())
}

fn run_decompress(input: PathBuf, output: PathBuf) -> anyhow::Result<()> {
    let t0 = Instant::now();
    let total_raw = decompress_blob_to_file(&input, &output, codec_by_id, print_progress)
        .with_context(|| format!("decompressing {:?} into {:?}", input, output))?;
    let elapsed = t0.elapsed();
    eprintln!();

    eprintln!("  raw size    : {}", human_bytes(total_raw));
    eprintln!(
        "  throughput  : {}/s",
        human_bytes((total_raw as f64 / elapsed.as_secs_f64()) as u64)
    );
    eprintln!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    Ok(())
}

fn run_inspect(file: PathBuf, show_blocks: bool) -> anyhow::Result<()> {
    let blob = open_blob(&file)?;
    let header = blob.header();
    let file_size = std::fs::metadata(&file)?.len();

    println!("=== Compressed blob: {:?} ===", file);
    println!();
    println!("  format version : {}", header.version);
    println!("  codec          : {} (id={})", blob.codec().name(), header.codec_id);
    println!("  sub-type       : {}", header.sub_type);
    println!("  block size     : {}", human_bytes(u64::from(header.block_size)));
    println!("  block count    : {}", blob.block_count());
    println!("  data size      : {}", human_bytes(header.data_size));
    println!("  compressed     : {}", human_bytes(blob.compressed_size()));
    println!("  file on disk   : {}", human_bytes(file_size));
    println!("  ratio          : {:.2}x", blob.ratio());
    println!("  flags          : 0x{:08x}", header.flags);

    if show_blocks {
        println!();
        println!(
            "  {:>8}  {:>14}  {:>12}  {:>12}  {:>6}  {:>16}",
            "block", "file offset", "compressed", "raw", "stored", "checksum"
        );
        println!("  {}", "-".repeat(76));
        for (i, e) in blob.entries().iter().enumerate() {
            println!(
                "  {:>8}  {:>14}  {:>12}  {:>12}  {:>6}  {:016x}",
                i,
                e.offset,
                human_bytes(u64::from(e.compressed_len)),
                human_bytes(u64::from(e.raw_len)),
                if e.stored { "yes" } else { "no" },
                e.checksum
            );
        }
    }

    Ok(())
}

fn run_read(
    file: PathBuf,
    offset: u64,
    size: usize,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let mut reader = create_blob_reader(&file, codec_by_id)
        .with_context(|| format!("opening {:?}", file))?;
    eprintln!(
        "{} blob, {} logical / {} on disk",
        reader.blob_type(),
        human_bytes(reader.data_size()),
        human_bytes(reader.raw_size())
    );

    let t0 = Instant::now();
    let raw = reader.read_vec(offset, size)?;
    let elapsed = t0.elapsed();
    eprintln!(
        "  read {} in {:.3}ms",
        human_bytes(raw.len() as u64),
        elapsed.as_secs_f64() * 1000.0
    );

    emit(&format!("offset {}", offset), &raw, output)
}

fn run_read_block(file: PathBuf, index: u64, output: Option<PathBuf>) -> anyhow::Result<()> {
    let mut blob = open_blob(&file)?;
    let entry = blob
        .entries()
        .get(index as usize)
        .with_context(|| format!("block {} out of range (total {})", index, blob.block_count()))?;

    eprintln!(
        "seeking to block {} (offset {} bytes from file start)...",
        index, entry.offset
    );

    let t0 = Instant::now();
    let raw = blob.read_block(index)?;
    let elapsed = t0.elapsed();

    eprintln!(
        "  decoded {} in {:.3}ms",
        human_bytes(raw.len() as u64),
        elapsed.as_secs_f64() * 1000.0
    );

    emit(&format!("block {}", index), &raw, output)
}

fn run_bench(file: PathBuf, count: u64, size: u64, seed: u64) -> anyhow::Result<()> {
    let header = read_header(&file)?;
    let mut reader = open_compressed(&file, codec_by_id(header.codec_id)?)?;
    let data_size = reader.data_size();

    if data_size < size || count == 0 {
        anyhow::bail!(
            "nothing to benchmark: {} reads of {} bytes from {} bytes",
            count,
            size,
            data_size
        );
    }

    // Simple LCG for reproducible random offsets (no external dep)
    let span = data_size - size + 1;
    let offsets: Vec<u64> = {
        let mut rng = seed;
        (0..count)
            .map(|_| {
                rng = rng.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                (rng >> 33) % span
            })
            .collect()
    };

    eprintln!(
        "benchmarking {} random {} reads across {}...",
        count,
        human_bytes(size),
        human_bytes(data_size)
    );

    let mut buf = vec![0u8; size as usize];
    let t0 = Instant::now();
    let mut latencies_us: Vec<u64> = Vec::with_capacity(count as usize);

    for &offset in &offsets {
        let t = Instant::now();
        reader.read(offset, &mut buf)?;
        latencies_us.push(t.elapsed().as_micros() as u64);
    }

    let elapsed = t0.elapsed();
    latencies_us.sort_unstable();

    let pick = |q: f64| {
        let idx = (latencies_us.len() as f64 * q) as usize;
        latencies_us[idx.min(latencies_us.len() - 1)]
    };
    let stats = reader.stats();
    let total = size * count;

    println!();
    println!("=== Random Range Read Benchmark ===");
    println!("  reads       : {}", count);
    println!("  total read  : {}", human_bytes(total));
    println!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    println!(
        "  throughput  : {}/s",
        human_bytes((total as f64 / elapsed.as_secs_f64()) as u64)
    );
    println!(
        "  cache       : {} hits, {} misses ({:.1}% hit), {} aligned runs",
        stats.hits,
        stats.misses,
        stats.hit_ratio() * 100.0,
        stats.aligned_runs
    );
    println!("  latency:");
    println!("    min  : {} µs", pick(0.0));
    println!("    p50  : {} µs", pick(0.50));
    println!("    p95  : {} µs", pick(0.95));
    println!("    p99  : {} µs", pick(0.99));
    println!("    max  : {} µs", pick(1.0));

    Ok(())
}

// ── Entry point ────────────────────────────────────────────────────────────

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.command {
        Commands::Compress {
            input,
            output,
            codec,
            level,
            block_size,
            sub_type,
        } => run_compress(input, output, &codec, level, block_size, sub_type),
        Commands::Decompress { input, output } => run_decompress(input, output),
        Commands::Inspect { file, blocks } => run_inspect(file, blocks),
        Commands::Read {
            file,
            offset,
            size,
            output,
        } => run_read(file, offset, size, output),
        Commands::ReadBlock {
            file,
            index,
            output,
        } => run_read_block(file, index, output),
        Commands::Bench {
            file,
            count,
            size,
            seed,
        } => run_bench(file, count, size, seed),
    }
}
