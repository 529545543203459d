//! Chunk planning: partitions a file into contiguous byte ranges.

use crate::types::Chunk;

/// Partitions `[0, file_size)` into `ceil(file_size / chunk_size)` chunks.
///
/// Part `i` covers `[(i-1) * chunk_size, min(i * chunk_size, file_size))`,
/// so the ranges are gapless and non-overlapping and the final chunk
/// carries whatever remains. A file no larger than one chunk yields a
/// single chunk covering the whole file; an empty file yields no chunks.
///
/// Boundaries are computed from the part index each iteration rather than
/// a running remainder, so the last chunk cannot drift off the file end.
pub fn plan_chunks(file_size: u64, chunk_size: u64) -> Vec<Chunk> {
    if file_size == 0 || chunk_size == 0 {
        return Vec::new();
    }

    let count = file_size.div_ceil(chunk_size);
    (1..=count)
        .map(|i| Chunk {
            number: i as u32,
            start: (i - 1) * chunk_size,
            end: (i * chunk_size).min(file_size),
        })
        .collect()
}
