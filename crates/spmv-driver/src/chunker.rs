//! Splitting byte ranges into engine-sized chunks

use crate::error::{Result, SpmvError};

/// Splits a byte range into chunks no longer than one DMA descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferChunker {
    max_chunk: u32,
}

impl TransferChunker {
    /// Create a chunker bounded by `max_chunk` bytes
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if `max_chunk` is zero.
    pub fn new(max_chunk: u32) -> Result<Self> {
        if max_chunk == 0 {
            return Err(SpmvError::configuration("max chunk must be non-zero"));
        }
        Ok(Self { max_chunk })
    }

    /// Largest chunk this chunker emits
    pub const fn max_chunk(&self) -> u32 {
        self.max_chunk
    }

    /// Size of the next chunk when `remaining` bytes are left
    pub fn next_chunk(&self, remaining: u64) -> u32 {
        // Fits in u32 because it is bounded by max_chunk
        remaining.min(u64::from(self.max_chunk)) as u32
    }

    /// Lazily split `total_bytes` into chunks
    ///
    /// The iterator is `Clone`, so a partially consumed sequence can be
    /// restarted from any point.
    pub fn decompose(&self, total_bytes: u64) -> Chunks {
        Chunks {
            remaining: total_bytes,
            max_chunk: self.max_chunk,
        }
    }

    /// Number of chunks `total_bytes` splits into
    pub fn chunk_count(&self, total_bytes: u64) -> u64 {
        total_bytes.div_ceil(u64::from(self.max_chunk))
    }
}

/// Split `total_bytes` into chunk sizes bounded by `max_chunk`
///
/// # Errors
///
/// Returns `Configuration` if `max_chunk` is zero.
pub fn decompose(total_bytes: u64, max_chunk: u32) -> Result<Vec<u32>> {
    Ok(TransferChunker::new(max_chunk)?.decompose(total_bytes).collect())
}

/// Iterator over chunk sizes
#[derive(Debug, Clone)]
pub struct Chunks {
    remaining: u64,
    max_chunk: u32,
}

impl Iterator for Chunks {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.remaining == 0 {
            return None;
        }
        let chunk = self.remaining.min(u64::from(self.max_chunk)) as u32;
        self.remaining -= u64::from(chunk);
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining.div_ceil(u64::from(self.max_chunk));
        match usize::try_from(n) {
            Ok(n) => (n, Some(n)),
            Err(_) => (usize::MAX, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_split() {
        assert_eq!(decompose(200, 64).unwrap(), vec![64, 64, 64, 8]);
    }

    #[test]
    fn empty_range_has_no_chunks() {
        assert!(decompose(0, 64).unwrap().is_empty());
    }

    #[test]
    fn zero_limit_rejected() {
        assert!(TransferChunker::new(0).unwrap_err().is_configuration());
    }

    #[test]
    fn chunks_cover_range_exactly() {
        for max in [1u32, 7, 64, 16_376, 67_108_800] {
            let chunker = TransferChunker::new(max).unwrap();
            for total in [0u64, 1, 63, 64, 65, 200, 1_000_003, 200_000_000] {
                let chunks: Vec<u32> = chunker.decompose(total).collect();
                assert_eq!(chunks.iter().map(|&c| u64::from(c)).sum::<u64>(), total);
                assert!(chunks.iter().all(|&c| c > 0 && c <= max));
                assert_eq!(chunks.len() as u64, chunker.chunk_count(total));
            }
        }
    }

    #[test]
    fn restart_from_clone() {
        let chunker = TransferChunker::new(64).unwrap();
        let mut it = chunker.decompose(150);
        it.next();
        let rest: Vec<u32> = it.clone().collect();
        assert_eq!(rest, vec![64, 22]);
        assert_eq!(it.collect::<Vec<_>>(), rest);
    }

    #[test]
    fn next_chunk_clamps() {
        let chunker = TransferChunker::new(16_376).unwrap();
        assert_eq!(chunker.next_chunk(5), 5);
        assert_eq!(chunker.next_chunk(u64::MAX), 16_376);
    }
}
