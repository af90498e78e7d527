//! Vector types and the optional SimHash projector (component A).
//!
//! A [`Vector`] is a dense `f32` vector of known dimension. `dot`/`norm`/
//! `cosine_similarity` are the fundamentals; everything upstream (encoder,
//! resonance detector) builds on these three functions.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Below this norm a vector is treated as the zero vector for similarity
/// purposes, avoiding NaN from division by (near-)zero.
const ZERO_NORM_EPSILON: f32 = 1e-10;

/// A dense, fixed-dimension vector of 32-bit floats.
pub type Vector = Vec<f32>;

/// Euclidean (L2) norm.
pub fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Dot product. Panics if the two vectors have different lengths — callers
/// within this crate never compare vectors of mismatched dimension.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len(), "dot product requires equal-length vectors");
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Cosine similarity. Defined as `0.0` whenever either vector's norm is below
/// [`ZERO_NORM_EPSILON`], matching the resonance detector's "zero-norm agents
/// score 0" rule rather than producing NaN.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let (na, nb) = (norm(a), norm(b));
    if na < ZERO_NORM_EPSILON || nb < ZERO_NORM_EPSILON {
        return 0.0;
    }
    dot(a, b) / (na * nb)
}

/// L2-normalize a vector in place. Returns `false` (leaving `v` unchanged) if
/// the norm is below [`ZERO_NORM_EPSILON`].
pub fn normalize(v: &mut [f32]) -> bool {
    let n = norm(v);
    if n < ZERO_NORM_EPSILON {
        return false;
    }
    for x in v.iter_mut() {
        *x /= n;
    }
    true
}

/// Default bit-width for the SimHash projection, locked in by the Phase 1
/// experiments this component is ported from.
pub const DEFAULT_PROJECTED_DIM: usize = 10_000;
/// Default deterministic seed for the random hyperplane matrix.
pub const DEFAULT_PROJECTOR_SEED: u64 = 42;
/// Default seed for breaking ties in [`bundle_binary`].
pub const DEFAULT_BUNDLE_TIE_SEED: u64 = 0;

/// Projects dense `f32` vectors onto a packed binary space via random
/// hyperplanes (SimHash), and measures similarity between projections with
/// Hamming distance.
///
/// Hyperplanes are generated once at construction from a deterministic seed,
/// so every process that constructs a `SimHashProjector` with the same
/// `(input_dim, bits, seed)` produces bit-identical projections.
pub struct SimHashProjector {
    bits: usize,
    packed_len: usize,
    planes: Vec<Vec<f32>>,
    popcount_lut: [u8; 256],
}

impl SimHashProjector {
    /// `input_dim` is the dimension of vectors this projector accepts.
    /// `bits` is the projected dimension `D`. `seed` deterministically seeds
    /// the hyperplane matrix.
    pub fn new(input_dim: usize, bits: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let planes = (0..bits)
            .map(|_| (0..input_dim).map(|_| rng.gen::<f32>() * 2.0 - 1.0).collect())
            .collect();
        let mut popcount_lut = [0u8; 256];
        for (i, slot) in popcount_lut.iter_mut().enumerate() {
            *slot = (i as u8).count_ones() as u8;
        }
        Self {
            bits,
            packed_len: (bits + 7) / 8,
            planes,
            popcount_lut,
        }
    }

    pub fn with_defaults(input_dim: usize) -> Self {
        Self::new(input_dim, DEFAULT_PROJECTED_DIM, DEFAULT_PROJECTOR_SEED)
    }

    /// Projected (packed) dimension in bytes.
    pub fn packed_dim(&self) -> usize {
        self.packed_len
    }

    /// Projects a dense vector to a packed binary vector: one bit per
    /// hyperplane, set when the dot product with that hyperplane is
    /// non-negative.
    pub fn project(&self, dense: &[f32]) -> Vec<u8> {
        let mut packed = vec![0u8; self.packed_len];
        for (i, plane) in self.planes.iter().enumerate() {
            if dot(dense, plane) >= 0.0 {
                packed[i / 8] |= 1 << (i % 8);
            }
        }
        packed
    }

    /// Hamming similarity between two packed binary vectors: `1 - popcount(a
    /// xor b) / D`.
    pub fn similarity(&self, a: &[u8], b: &[u8]) -> f32 {
        let diff: u32 = a
            .iter()
            .zip(b.iter())
            .map(|(x, y)| self.popcount_lut[(x ^ y) as usize] as u32)
            .sum();
        1.0 - (diff as f32) / (self.bits as f32)
    }
}

/// Bitwise-majority-vote bundle of packed binary vectors into one. Ties at
/// even input counts are broken with a seeded coin flip per tied bit.
///
/// # Panics
/// Panics if `vectors` is empty.
pub fn bundle_binary(vectors: &[Vec<u8>], bits: usize, tie_seed: u64) -> Vec<u8> {
    assert!(!vectors.is_empty(), "cannot bundle an empty list of vectors");
    if vectors.len() == 1 {
        return vectors[0].clone();
    }

    let n = vectors.len();
    let threshold = n as f32 / 2.0;
    let mut counts = vec![0u32; bits];
    for v in vectors {
        for bit_idx in 0..bits {
            let byte = v[bit_idx / 8];
            if (byte >> (bit_idx % 8)) & 1 == 1 {
                counts[bit_idx] += 1;
            }
        }
    }

    let packed_len = (bits + 7) / 8;
    let mut result = vec![0u8; packed_len];
    let mut rng = StdRng::seed_from_u64(tie_seed);
    for (bit_idx, &count) in counts.iter().enumerate() {
        let count = count as f32;
        let set = if count > threshold {
            true
        } else if count == threshold {
            rng.gen_bool(0.5)
        } else {
            false
        };
        if set {
            result[bit_idx / 8] |= 1 << (bit_idx % 8);
        }
    }
    result
}
