//! Bloom filter over string ids.
//!
//! The filter never reports a false negative: after `add(x)`, `has(x)` is
//! always true. False positives occur with roughly the configured rate.
//!
//! Sizing follows the classic formulas:
//!
//! ```text
//! m = ceil(n * ln(fpr) / ln(1 / 2^ln2))
//! k = (m / n) * ln2
//! ```

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::bitfield::{BitField, BufferPool};
use crate::error::{CoreError, Result};
use crate::hash::murmur3_32;

/// Highest false-positive rate a filter is built with. Past this point a
/// filter carries no useful signal.
pub const MAX_FPR: f64 = 0.5;

/// Lowest accepted false-positive rate.
pub const MIN_FPR: f64 = 1e-6;

/// Sizing options for [`BloomFilter::with_options`].
#[derive(Debug, Clone, Default)]
pub struct BloomOptions {
    /// Expected number of items.
    pub size: usize,
    /// Target false-positive rate. Required when `m` is unset.
    pub fpr: Option<f64>,
    /// Total number of bits. Derived from `size` and `fpr` when unset.
    pub m: Option<usize>,
    /// Number of hash functions. Derived from `m` and `size` when unset.
    pub k: Option<f64>,
    /// Lower bound applied to `k`.
    pub max_hashes: Option<usize>,
}

/// Wire form of a filter: base64 bit buffer plus hash seeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedBloomFilter {
    pub d: String,
    pub s: Vec<u32>,
}

/// A Bloom filter using seeded MurmurHash3 functions.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: BitField,
    seeds: Vec<u32>,
}

impl BloomFilter {
    /// Build a filter for `size` items at the given false-positive rate.
    pub fn new(size: usize, fpr: f64) -> Self {
        let (m, k) = dimensions(size, fpr);
        Self::from_parts(BitField::new(m), k, &mut rand::thread_rng())
    }

    /// Like [`BloomFilter::new`] with an explicit seed source.
    pub fn with_rng<R: Rng + ?Sized>(size: usize, fpr: f64, rng: &mut R) -> Self {
        let (m, k) = dimensions(size, fpr);
        Self::from_parts(BitField::new(m), k, rng)
    }

    /// Like [`BloomFilter::new`] with the bit buffer taken from `pool`.
    pub fn from_pool(size: usize, fpr: f64, pool: &mut BufferPool) -> Self {
        let (m, k) = dimensions(size, fpr);
        Self::from_parts(BitField::from_pool(m, pool), k, &mut rand::thread_rng())
    }

    /// Build a filter from explicit options.
    pub fn with_options(options: &BloomOptions) -> Result<Self> {
        let size = options.size.max(1);
        let m = match (options.m, options.fpr) {
            (Some(m), _) => m.max(1),
            (None, Some(fpr)) => bit_count(size, fpr),
            (None, None) => {
                return Err(CoreError::InvalidFilter(
                    "either a bit count or a false-positive rate is required".into(),
                ))
            }
        };
        let mut k = options
            .k
            .unwrap_or_else(|| (m as f64 / size as f64) * std::f64::consts::LN_2);
        if let Some(max_hashes) = options.max_hashes {
            k = k.max(max_hashes as f64);
        }
        Ok(Self::from_parts(
            BitField::new(m),
            hash_count(k),
            &mut rand::thread_rng(),
        ))
    }

    fn from_parts<R: Rng + ?Sized>(bits: BitField, k: usize, rng: &mut R) -> Self {
        let seeds = (0..k).map(|_| rng.gen()).collect();
        Self { bits, seeds }
    }

    /// Add a single id.
    pub fn add(&mut self, value: &str) {
        let size = self.bits.bit_size();
        for &seed in &self.seeds {
            let idx = murmur3_32(value.as_bytes(), seed) as usize % size;
            self.bits.set(idx, true);
        }
    }

    /// Add every id yielded by `values`.
    pub fn extend<I, S>(&mut self, values: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for value in values {
            self.add(value.as_ref());
        }
    }

    /// Membership test. `false` is definitive; `true` may be a false positive.
    pub fn has(&self, value: &str) -> bool {
        let size = self.bits.bit_size();
        self.seeds
            .iter()
            .all(|&seed| self.bits.get(murmur3_32(value.as_bytes(), seed) as usize % size))
    }

    /// Fraction of bits set. Diagnostic only.
    pub fn fill_rate(&self) -> f64 {
        self.bits.count_ones() as f64 / self.bits.bit_size() as f64
    }

    /// Zero all bits and draw fresh seeds, keeping the allocation.
    pub fn clear(&mut self) -> &mut Self {
        self.clear_with_rng(&mut rand::thread_rng())
    }

    pub fn clear_with_rng<R: Rng + ?Sized>(&mut self, rng: &mut R) -> &mut Self {
        self.bits.clear();
        for seed in &mut self.seeds {
            *seed = rng.gen();
        }
        self
    }

    /// Hand the bit buffer back to `pool`.
    pub fn reuse(self, pool: &mut BufferPool) {
        self.bits.reuse(pool);
    }

    pub fn byte_size(&self) -> usize {
        self.bits.byte_size()
    }

    pub fn bit_size(&self) -> usize {
        self.bits.bit_size()
    }

    pub fn hash_count(&self) -> usize {
        self.seeds.len()
    }

    pub fn seeds(&self) -> &[u32] {
        &self.seeds
    }

    pub fn encode(&self) -> EncodedBloomFilter {
        EncodedBloomFilter {
            d: BASE64.encode(self.bits.buffer()),
            s: self.seeds.clone(),
        }
    }

    /// Restore a filter from its wire form.
    pub fn decode(encoded: &EncodedBloomFilter) -> Result<Self> {
        let (buffer, seeds) = decode_parts(encoded)?;
        Ok(Self {
            bits: BitField::from_buffer(buffer),
            seeds,
        })
    }

    /// Replace this filter's contents with `encoded`, releasing the old
    /// buffer to `pool`.
    pub fn restore(&mut self, encoded: &EncodedBloomFilter, pool: &mut BufferPool) -> Result<()> {
        let (buffer, seeds) = decode_parts(encoded)?;
        pool.release(self.bits.set_buffer(buffer));
        self.seeds = seeds;
        Ok(())
    }
}

fn decode_parts(encoded: &EncodedBloomFilter) -> Result<(Vec<u8>, Vec<u32>)> {
    if encoded.s.is_empty() {
        return Err(CoreError::InvalidFilter("empty seed list".into()));
    }
    let buffer = BASE64
        .decode(encoded.d.as_bytes())
        .map_err(|e| CoreError::InvalidFilter(format!("bad bit buffer: {}", e)))?;
    if buffer.is_empty() {
        return Err(CoreError::InvalidFilter("empty bit buffer".into()));
    }
    Ok((buffer, encoded.s.clone()))
}

/// Clamp a requested false-positive rate into the usable range.
pub fn clamp_fpr(fpr: f64) -> f64 {
    if fpr.is_nan() {
        return MAX_FPR;
    }
    fpr.clamp(MIN_FPR, MAX_FPR)
}

fn dimensions(size: usize, fpr: f64) -> (usize, usize) {
    let size = size.max(1);
    let m = bit_count(size, fpr);
    let k = (m as f64 / size as f64) * std::f64::consts::LN_2;
    (m, hash_count(k))
}

fn bit_count(size: usize, fpr: f64) -> usize {
    let ln2 = std::f64::consts::LN_2;
    let denom = (1.0 / 2f64.powf(ln2)).ln();
    let m = (size as f64 * clamp_fpr(fpr).ln() / denom).ceil();
    (m as usize).max(1)
}

fn hash_count(k: f64) -> usize {
    (k.ceil() as usize).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_no_false_negatives() {
        let mut filter = BloomFilter::new(500, 0.1);
        let ids: Vec<String> = (0..500).map(|i| format!("commit-{}", i)).collect();
        filter.extend(&ids);
        for id in &ids {
            assert!(filter.has(id));
        }
    }

    #[test]
    fn test_empty_filter_has_nothing() {
        let filter = BloomFilter::new(0, 0.5);
        assert!(!filter.has("anything"));
        assert_eq!(filter.fill_rate(), 0.0);
    }

    #[test]
    fn test_sizing() {
        // n = 1000, fpr = 0.01 -> m = 9586, k = ceil(6.64) = 7
        let filter = BloomFilter::new(1000, 0.01);
        assert_eq!(filter.byte_size(), 9586usize.div_ceil(8));
        assert_eq!(filter.hash_count(), 7);
    }

    #[test]
    fn test_fpr_is_capped() {
        let capped = BloomFilter::new(100, 0.9);
        let half = BloomFilter::new(100, 0.5);
        assert_eq!(capped.byte_size(), half.byte_size());
        assert_eq!(capped.hash_count(), half.hash_count());
    }

    #[test]
    fn test_false_positive_rate_near_target() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut filter = BloomFilter::with_rng(1000, 0.01, &mut rng);
        for i in 0..1000 {
            filter.add(&format!("member-{}", i));
        }
        let trials = 20_000;
        let hits = (0..trials)
            .filter(|i| filter.has(&format!("outsider-{}", i)))
            .count();
        let rate = hits as f64 / trials as f64;
        assert!(rate < 0.03, "observed fpr {}", rate);
    }

    #[test]
    fn test_options_explicit_dimensions() {
        let filter = BloomFilter::with_options(&BloomOptions {
            size: 10,
            m: Some(80),
            k: Some(3.0),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(filter.bit_size(), 80);
        assert_eq!(filter.hash_count(), 3);
    }

    #[test]
    fn test_options_max_hashes_raises_k() {
        let filter = BloomFilter::with_options(&BloomOptions {
            size: 100,
            fpr: Some(0.5),
            max_hashes: Some(4),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(filter.hash_count(), 4);
    }

    #[test]
    fn test_options_require_fpr_or_m() {
        let result = BloomFilter::with_options(&BloomOptions {
            size: 10,
            ..Default::default()
        });
        assert!(matches!(result, Err(CoreError::InvalidFilter(_))));
    }

    #[test]
    fn test_encode_decode_behaves_identically() {
        let mut filter = BloomFilter::new(200, 0.05);
        for i in 0..200 {
            filter.add(&format!("id-{}", i));
        }
        let decoded = BloomFilter::decode(&filter.encode()).unwrap();

        assert_eq!(decoded.byte_size(), filter.byte_size());
        assert_eq!(decoded.seeds(), filter.seeds());
        assert_eq!(decoded.fill_rate(), filter.fill_rate());
        for i in 0..1000 {
            let candidate = format!("id-{}", i);
            assert_eq!(decoded.has(&candidate), filter.has(&candidate));
        }
    }

    #[test]
    fn test_decode_rejects_malformed() {
        let good = BloomFilter::new(10, 0.1).encode();

        let no_seeds = EncodedBloomFilter { d: good.d.clone(), s: vec![] };
        assert!(BloomFilter::decode(&no_seeds).is_err());

        let bad_bits = EncodedBloomFilter { d: "%%%".into(), s: good.s.clone() };
        assert!(BloomFilter::decode(&bad_bits).is_err());

        let no_bits = EncodedBloomFilter { d: String::new(), s: good.s };
        assert!(BloomFilter::decode(&no_bits).is_err());

        // Non-integer seeds never reach decode: the schema rejects them.
        let json = r#"{"d":"AAAA","s":["x"]}"#;
        assert!(serde_json::from_str::<EncodedBloomFilter>(json).is_err());
    }

    #[test]
    fn test_clear_reseeds_and_keeps_size() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut filter = BloomFilter::with_rng(100, 0.1, &mut rng);
        filter.add("a");
        let seeds = filter.seeds().to_vec();
        let bytes = filter.byte_size();

        filter.clear_with_rng(&mut rng);
        assert_eq!(filter.fill_rate(), 0.0);
        assert_eq!(filter.byte_size(), bytes);
        assert_ne!(filter.seeds(), &seeds[..]);
    }

    #[test]
    fn test_restore_releases_old_buffer() {
        let mut pool = BufferPool::new();
        let mut target = BloomFilter::from_pool(50, 0.2, &mut pool);
        let mut source = BloomFilter::new(400, 0.01);
        source.add("x");

        target.restore(&source.encode(), &mut pool).unwrap();
        assert_eq!(pool.idle(), 1);
        assert!(target.has("x"));
        assert_eq!(target.byte_size(), source.byte_size());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_added_values_always_present(
                ids in prop::collection::hash_set("[a-z0-9]{1,24}", 1..200),
                fpr in 0.01f64..0.5,
            ) {
                let mut filter = BloomFilter::new(ids.len(), fpr);
                filter.extend(&ids);
                for id in &ids {
                    prop_assert!(filter.has(id));
                }
            }
        }
    }
}
