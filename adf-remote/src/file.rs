use adf_core::{Error, RemoteOptions, Result};
use log::debug;

use crate::cache::BlockCache;
use crate::client::RangeClient;
use crate::url::RemoteUrl;

/// A remote object presented as a random-access, read-only file.
///
/// Open performs a HEAD (following one region redirect) and prefetches the
/// file head; reads are served block-wise out of the LRU cache, fetching
/// missing blocks with coalesced range GETs.
pub struct RemoteFile {
    client: RangeClient,
    cache: BlockCache,
    size: u64,
    accept_ranges: bool,
}

impl RemoteFile {
    pub fn open(url: &str, opts: &RemoteOptions) -> Result<Self> {
        let parsed = RemoteUrl::parse(url)?;
        let mut client = RangeClient::new(parsed, opts.clone())?;
        let head = client.head()?;
        debug!(
            "opened {url}: {} bytes, ranges {}",
            head.size,
            if head.accept_ranges { "ok" } else { "not advertised" }
        );

        let mut file = Self {
            client,
            cache: BlockCache::new(opts.block_size, opts.cache_blocks),
            size: head.size,
            accept_ranges: head.accept_ranges,
        };
        file.prefetch(opts.prefetch_size)?;
        Ok(file)
    }

    /// Warm the cache with the first `n` bytes. The HDF5 superblock,
    /// object headers and chunk indexes cluster at the front, so this
    /// removes most per-dataset round trips.
    fn prefetch(&mut self, n: usize) -> Result<()> {
        let n = (n as u64).min(self.size);
        if n == 0 {
            return Ok(());
        }
        let data = self.client.get_range(0, n - 1)?;
        let block_size = self.cache.block_size();
        for (i, chunk) in data.chunks(block_size).enumerate() {
            // Keep at most `capacity` blocks; later blocks of a large
            // prefetch would only evict the earlier ones.
            if i >= self.cache.capacity() {
                break;
            }
            self.cache.insert(i as u64, chunk.to_vec());
        }
        Ok(())
    }

    pub fn len(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn url(&self) -> &str {
        self.client.url().as_str()
    }

    pub fn accept_ranges(&self) -> bool {
        self.accept_ranges
    }

    /// Fill `out` from `[offset, offset + out.len())`.
    pub fn read_at(&mut self, offset: u64, out: &mut [u8]) -> Result<()> {
        if out.is_empty() {
            return Ok(());
        }
        if offset + out.len() as u64 > self.size {
            return Err(Error::Io(format!(
                "{}: read of {} bytes at {offset} past end ({})",
                self.url(),
                out.len(),
                self.size
            )));
        }

        if let Err(missing) = self.cache.try_read(offset, out) {
            self.fetch_blocks(&missing)?;
            self.cache
                .try_read(offset, out)
                .map_err(|_| Error::Internal("blocks vanished after fetch".to_string()))?;
        }
        Ok(())
    }

    /// The driver is read-only end to end.
    pub fn write_at(&mut self, _offset: u64, _data: &[u8]) -> Result<()> {
        Err(Error::ReadOnly(self.url().to_string()))
    }

    pub fn cache_stats(&self) -> (u64, u64, usize) {
        (self.cache.hits(), self.cache.misses(), self.cache.resident())
    }

    /// Fetch missing blocks, coalescing adjacent indexes into single range
    /// requests.
    fn fetch_blocks(&mut self, missing: &[u64]) -> Result<()> {
        let block_size = self.cache.block_size() as u64;
        let mut run_start = 0usize;
        while run_start < missing.len() {
            let mut run_end = run_start;
            while run_end + 1 < missing.len() && missing[run_end + 1] == missing[run_end] + 1 {
                run_end += 1;
            }
            let first = missing[run_start];
            let last = missing[run_end];
            let byte_start = first * block_size;
            let byte_end = ((last + 1) * block_size).min(self.size) - 1;
            let data = self.client.get_range(byte_start, byte_end)?;
            for (i, chunk) in data.chunks(block_size as usize).enumerate() {
                self.cache.insert(first + i as u64, chunk.to_vec());
            }
            run_start = run_end + 1;
        }
        Ok(())
    }
}
