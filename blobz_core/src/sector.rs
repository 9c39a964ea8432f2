//! Sector cache: byte-range reads on top of block-only backing stores.
//!
//! A [`SectorReader`] owns one [`BlockSource`] and a direct-mapped cache of
//! [`CACHE_SIZE`] blocks. Block `n` always lives in slot `n % CACHE_SIZE`, so
//! two blocks exactly `CACHE_SIZE` apart evict each other; strided access at
//! that stride misses on every read. Runs of two or more whole blocks go
//! straight to [`BlockSource::fetch_aligned_run`] and are not cached.

use tracing::trace;

use crate::blob::{check_range, BlobReader, BlobType};
use crate::error::{BlobError, Result};
use crate::format::{block_count_for, MAX_BLOCK_SIZE};

/// Number of direct-mapped cache slots per reader.
pub const CACHE_SIZE: usize = 32;

/// A backing store that can only be read in whole blocks.
pub trait BlockSource: Send {
    fn blob_type(&self) -> BlobType;

    fn raw_size(&self) -> u64;

    fn data_size(&self) -> u64;

    /// Bytes per block, fixed when the source was built.
    fn block_size(&self) -> u32;

    /// Read block `block` into `out`, whose length is [`block_size`](Self::block_size).
    ///
    /// The final block of a blob may hold fewer bytes; implementations fill
    /// its valid prefix. Blocks past the end are an error.
    fn fetch_block(&mut self, block: u64, out: &mut [u8]) -> Result<()>;

    /// Read `count` consecutive whole blocks starting at `first_block` into `out`.
    ///
    /// The default fetches block by block. Sources that can serve a run in one
    /// request (a contiguous device read, say) override it; results must be
    /// identical either way.
    fn fetch_aligned_run(&mut self, first_block: u64, count: u64, out: &mut [u8]) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        let block_size = out.len() / count as usize;
        for (i, chunk) in out.chunks_exact_mut(block_size).enumerate() {
            self.fetch_block(first_block + i as u64, chunk)?;
        }
        Ok(())
    }
}

/// Per-reader cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Multi-block reads handed to `fetch_aligned_run`.
    pub aligned_runs: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }
}

#[derive(Default)]
struct CacheSlot {
    tag: Option<u64>,
    data: Vec<u8>,
}

/// Fail unless `out` is exactly `count` blocks of `native` bytes.
pub(crate) fn check_block_buffer(native: u32, count: u64, out: &[u8]) -> Result<()> {
    let expected = u64::from(native).checked_mul(count);
    if expected != Some(out.len() as u64) {
        return Err(BlobError::BlockSizeMismatch {
            native,
            requested: out.len() as u64 / count.max(1),
        });
    }
    Ok(())
}

/// Splits byte-range reads into block fetches and caches single blocks.
pub struct SectorReader<S> {
    source: S,
    block_size: Option<u32>,
    slots: [CacheSlot; CACHE_SIZE],
    stats: CacheStats,
}

impl<S: BlockSource> SectorReader<S> {
    /// Wrap `source`. [`set_block_size`](Self::set_block_size) must be called
    /// before the first read.
    pub fn new(source: S) -> Self {
        Self {
            source,
            block_size: None,
            slots: std::array::from_fn(|_| CacheSlot::default()),
            stats: CacheStats::default(),
        }
    }

    /// Wrap `source` and fix its block size in one step.
    pub fn with_block_size(source: S, block_size: u32) -> Result<Self> {
        let mut reader = Self::new(source);
        reader.set_block_size(block_size)?;
        Ok(reader)
    }

    /// Fix the block size. It must equal the source's own block size and
    /// cannot change once set.
    pub fn set_block_size(&mut self, block_size: u32) -> Result<()> {
        if block_size == 0 || block_size > MAX_BLOCK_SIZE {
            return Err(BlobError::InvalidBlockSize(u64::from(block_size)));
        }
        if let Some(current) = self.block_size {
            if current != block_size {
                return Err(BlobError::BlockSizeLocked {
                    current,
                    requested: block_size,
                });
            }
        }
        let native = self.source.block_size();
        if native != block_size {
            return Err(BlobError::BlockSizeMismatch {
                native,
                requested: u64::from(block_size),
            });
        }
        self.block_size = Some(block_size);
        Ok(())
    }

    pub fn block_size(&self) -> Option<u32> {
        self.block_size
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn into_inner(self) -> S {
        self.source
    }

    fn configured_block_size(&self) -> Result<u32> {
        self.block_size.ok_or(BlobError::BlockSizeNotSet)
    }

    /// Contents of block `block`, served from the cache when possible.
    ///
    /// The slice covers only the block's valid bytes and stays borrowed from
    /// the reader, so it must be copied out before the next call.
    pub fn cached_block(&mut self, block: u64) -> Result<&[u8]> {
        let block_size = self.configured_block_size()?;
        let Self {
            source,
            slots,
            stats,
            ..
        } = self;

        let data_size = source.data_size();
        let start = block
            .checked_mul(u64::from(block_size))
            .ok_or(BlobError::BlockOutOfRange {
                block,
                count: block_count_for(data_size, block_size),
            })?;
        let valid = data_size.saturating_sub(start).min(u64::from(block_size)) as usize;

        let slot = &mut slots[(block % CACHE_SIZE as u64) as usize];
        if slot.tag == Some(block) {
            stats.hits += 1;
            trace!(block, "sector cache hit");
            return Ok(&slot.data[..valid]);
        }

        stats.misses += 1;
        trace!(block, evicted = ?slot.tag, "sector cache miss");
        // A failed fetch must not leave the previous tag pointing at clobbered data.
        slot.tag = None;
        slot.data.clear();
        slot.data.resize(block_size as usize, 0);
        source.fetch_block(block, &mut slot.data)?;
        slot.tag = Some(block);
        Ok(&slot.data[..valid])
    }
}

impl<S: BlockSource> BlobReader for SectorReader<S> {
    fn blob_type(&self) -> BlobType {
        self.source.blob_type()
    }

    fn raw_size(&self) -> u64 {
        self.source.raw_size()
    }

    fn data_size(&self) -> u64 {
        self.source.data_size()
    }

    fn read(&mut self, offset: u64, out: &mut [u8]) -> Result<()> {
        let block_size = u64::from(self.configured_block_size()?);
        check_range(offset, out.len() as u64, self.source.data_size())?;

        let mut pos = offset;
        let mut done = 0usize;
        while done < out.len() {
            let remain = (out.len() - done) as u64;
            let block = pos / block_size;
            let pos_in_block = pos % block_size;

            if pos_in_block == 0 && remain >= 2 * block_size {
                let count = remain / block_size;
                let len = (count * block_size) as usize;
                trace!(first_block = block, count, "aligned run read");
                self.stats.aligned_runs += 1;
                self.source
                    .fetch_aligned_run(block, count, &mut out[done..done + len])?;
                done += len;
                pos += len as u64;
                continue;
            }

            let take = (block_size - pos_in_block).min(remain) as usize;
            let start = pos_in_block as usize;
            let data = self.cached_block(block)?;
            out[done..done + take].copy_from_slice(&data[start..start + take]);
            done += take;
            pos += take as u64;
        }
        Ok(())
    }
}
