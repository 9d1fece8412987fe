//! Shared fixtures for integration tests

#![allow(dead_code)]

use menc::container::CHUNK_SIZE;

/// Deterministic fixture: the byte pattern 0, 1, ..., 255 repeated to `len`.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 256) as u8).collect()
}

/// Fixture sizes around the chunk boundaries.
pub fn boundary_sizes() -> [usize; 6] {
    [
        0,
        1,
        CHUNK_SIZE - 1,
        CHUNK_SIZE,
        CHUNK_SIZE + 1,
        3 * CHUNK_SIZE + 100,
    ]
}
