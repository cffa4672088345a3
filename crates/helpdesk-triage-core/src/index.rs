//! Approximate nearest-neighbour bucketing for ticket embeddings.
//!
//! Random-hyperplane LSH: each vector is projected onto
//! `BANDS × BAND_BITS` hyperplanes, the sign bits are grouped into bands,
//! and each band becomes one bucket key of the form `b<band>:<bits>`.
//! Two unit vectors at cosine 0.9 agree on a single hyperplane with
//! probability ≈ 0.86, so they share at least one band with probability
//! ≈ 0.95. Lower-similarity pairs collide much less often.
//!
//! Hyperplanes are derived from SHA-256 of a fixed seed, so keys are
//! stable across processes and builds. No RNG state is kept.

use sha2::{Digest, Sha256};

/// Number of bands (bucket keys per vector).
pub const BANDS: usize = 6;
/// Sign bits per band.
pub const BAND_BITS: usize = 6;

const SEED: &[u8] = b"helpdesk-triage/lsh/v1";

/// Component values for one hyperplane, uniform in `[-1, 1]`.
fn hyperplane(plane: usize, dims: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(dims);
    let mut block = 0u32;
    while out.len() < dims {
        let mut hasher = Sha256::new();
        hasher.update(SEED);
        hasher.update((plane as u32).to_le_bytes());
        hasher.update(block.to_le_bytes());
        let digest = hasher.finalize();
        for word in digest.chunks_exact(4) {
            if out.len() == dims {
                break;
            }
            let raw = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
            out.push((raw as f64 / u32::MAX as f64 * 2.0 - 1.0) as f32);
        }
        block += 1;
    }
    out
}

/// Bucket keys for `vector`. Empty input yields no keys.
pub fn band_keys(vector: &[f32]) -> Vec<String> {
    if vector.is_empty() {
        return Vec::new();
    }
    let mut keys = Vec::with_capacity(BANDS);
    for band in 0..BANDS {
        let mut bits = 0u32;
        for bit in 0..BAND_BITS {
            let plane = hyperplane(band * BAND_BITS + bit, vector.len());
            let projection: f32 = plane.iter().zip(vector).map(|(p, v)| p * v).sum();
            if projection >= 0.0 {
                bits |= 1 << bit;
            }
        }
        keys.push(format!("b{}:{:02x}", band, bits));
    }
    keys
}
