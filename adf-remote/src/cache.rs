use std::num::NonZeroUsize;
use std::ops::Range;

use lru::LruCache;

/// Fixed-size block cache in front of the range client.
///
/// Blocks are keyed by block index (`offset / block_size`). The final
/// block of a file may be short; whatever the server returned is stored
/// verbatim.
pub struct BlockCache {
    block_size: usize,
    blocks: LruCache<u64, Vec<u8>>,
    hits: u64,
    misses: u64,
}

impl BlockCache {
    pub fn new(block_size: usize, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            block_size,
            blocks: LruCache::new(capacity),
            hits: 0,
            misses: 0,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn capacity(&self) -> usize {
        self.blocks.cap().get()
    }

    /// Block indexes covering `[offset, offset + len)`.
    pub fn covering(&self, offset: u64, len: usize) -> Range<u64> {
        let first = offset / self.block_size as u64;
        let last = (offset + len.max(1) as u64 - 1) / self.block_size as u64;
        first..last + 1
    }

    /// Serve a read entirely from resident blocks. Succeeds only when every
    /// covering block is present; otherwise returns the missing block
    /// indexes and leaves `out` untouched.
    pub fn try_read(&mut self, offset: u64, out: &mut [u8]) -> Result<(), Vec<u64>> {
        if out.is_empty() {
            return Ok(());
        }
        let covering = self.covering(offset, out.len());
        let missing: Vec<u64> = covering
            .clone()
            .filter(|b| !self.blocks.contains(b))
            .collect();
        if !missing.is_empty() {
            self.misses += 1;
            return Err(missing);
        }

        let mut written = 0usize;
        for block in covering {
            let data = self.blocks.get(&block).expect("checked resident above");
            let block_start = block * self.block_size as u64;
            let from = (offset + written as u64 - block_start) as usize;
            let n = (out.len() - written).min(data.len().saturating_sub(from));
            out[written..written + n].copy_from_slice(&data[from..from + n]);
            written += n;
            if n == 0 {
                break;
            }
        }
        debug_assert_eq!(written, out.len(), "short block inside a read");
        self.hits += 1;
        Ok(())
    }

    /// Insert one fetched block, evicting the least-recently-used entry
    /// once over capacity.
    pub fn insert(&mut self, block: u64, data: Vec<u8>) {
        self.blocks.put(block, data);
    }

    pub fn contains(&self, block: u64) -> bool {
        self.blocks.contains(&block)
    }

    pub fn resident(&self) -> usize {
        self.blocks.len()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(cache: &mut BlockCache, block: u64, len: usize, byte: u8) {
        cache.insert(block, vec![byte; len]);
    }

    #[test]
    fn read_spanning_blocks() {
        let mut cache = BlockCache::new(8, 4);
        filled(&mut cache, 0, 8, 1);
        filled(&mut cache, 1, 8, 2);
        let mut out = [0u8; 10];
        cache.try_read(3, &mut out).unwrap();
        assert_eq!(&out[..5], &[1, 1, 1, 1, 1]);
        assert_eq!(&out[5..], &[2, 2, 2, 2, 2]);
        assert_eq!(cache.hits(), 1);
    }

    #[test]
    fn miss_reports_missing_blocks() {
        let mut cache = BlockCache::new(8, 4);
        filled(&mut cache, 0, 8, 1);
        let mut out = [0u8; 16];
        let missing = cache.try_read(4, &mut out).unwrap_err();
        assert_eq!(missing, vec![1, 2]);
        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.hits(), 0);
    }

    // After N distinct inserts with capacity K, exactly min(N, K) blocks
    // are resident.
    #[test]
    fn lru_eviction_bounds_residency() {
        let mut cache = BlockCache::new(8, 3);
        for block in 0..5 {
            filled(&mut cache, block, 8, block as u8);
        }
        assert_eq!(cache.resident(), 3);
        assert!(!cache.contains(0));
        assert!(!cache.contains(1));
        assert!(cache.contains(2) && cache.contains(3) && cache.contains(4));
    }

    #[test]
    fn access_refreshes_recency() {
        let mut cache = BlockCache::new(4, 2);
        filled(&mut cache, 0, 4, 0);
        filled(&mut cache, 1, 4, 1);
        let mut out = [0u8; 4];
        cache.try_read(0, &mut out).unwrap(); // touch block 0
        filled(&mut cache, 2, 4, 2); // evicts block 1
        assert!(cache.contains(0));
        assert!(!cache.contains(1));
    }

    #[test]
    fn short_final_block() {
        let mut cache = BlockCache::new(8, 2);
        cache.insert(0, vec![9; 5]); // 5-byte file
        let mut out = [0u8; 5];
        cache.try_read(0, &mut out).unwrap();
        assert_eq!(out, [9; 5]);
    }
}
