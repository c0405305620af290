// Match Cachers - De-duplication of certificate matches
//
// Memory/accuracy trade-offs are determined by the chosen implementation.

use bloomfilter::Bloom;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// A cache of previously observed certificate matches.
///
/// Implementations record each certificate they are shown and report whether
/// it had been recorded before. The search engine consults the cacher once
/// per match, from a single task, so implementations do not need internal
/// synchronization.
pub trait Cacher: Send {
    /// Add the given DER-encoded certificate to the cache and return whether
    /// it was already present.
    fn cache(&mut self, cert_der: &[u8]) -> bool;
}

/// SHA-256 over the raw DER bytes, the key used by all caching variants.
fn fingerprint(cert_der: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(cert_der);
    hasher.finalize().into()
}

/// NopCacher does not cache certificates, disabling de-duplication.
#[derive(Debug, Default, Clone, Copy)]
pub struct NopCacher;

impl Cacher for NopCacher {
    /// Always returns false.
    fn cache(&mut self, _cert_der: &[u8]) -> bool {
        false
    }
}

/// Sha256MapCacher keeps a set of SHA-256 certificate fingerprints.
///
/// De-duplication is exact. Memory grows linearly with the number of
/// distinct matches.
#[derive(Debug, Default)]
pub struct Sha256MapCacher {
    fingerprints: HashSet<[u8; 32]>,
}

impl Sha256MapCacher {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Cacher for Sha256MapCacher {
    /// Calculates the SHA-256 fingerprint of the given certificate and uses
    /// it to determine membership in the cache. Insert and lookup are fused
    /// so the fingerprint is only computed once.
    fn cache(&mut self, cert_der: &[u8]) -> bool {
        !self.fingerprints.insert(fingerprint(cert_der))
    }
}

/// BloomCacher uses a bloom filter to cache certificate matches.
///
/// Because bloom filters are probabilistic data structures, they may
/// occasionally report false-positives, causing a certificate match to be
/// silently dropped by the search. The reverse never happens: a certificate
/// the filter has genuinely recorded is always reported as seen. If
/// full-and-complete results are required with absolute certainty, use
/// [`Sha256MapCacher`] instead.
pub struct BloomCacher {
    filter: Bloom<[u8; 32]>,
}

impl BloomCacher {
    /// Returns a BloomCacher that uses `count_estimate` and
    /// `false_positive_rate` to determine the size of the underlying bloom
    /// filter. Both are fixed for the lifetime of the filter.
    pub fn new(count_estimate: usize, false_positive_rate: f64) -> Self {
        Self {
            filter: Bloom::new_for_fp_rate(count_estimate, false_positive_rate),
        }
    }
}

impl Cacher for BloomCacher {
    /// Uses the bloom filter to determine membership in the cache, fusing
    /// the membership test with insertion.
    fn cache(&mut self, cert_der: &[u8]) -> bool {
        self.filter.check_and_set(&fingerprint(cert_der))
    }
}
