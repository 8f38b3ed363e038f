// ChaCha20 DRBG with SHA-512 key derivation and observability metadata

use std::sync::{Mutex, Weak};
use std::time::{Duration, Instant};

use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::{ChaCha20, Key, Nonce};
use http::header::{HeaderMap, HeaderName, HeaderValue};
use sha2::{Digest, Sha512};
use thiserror::Error;

use crate::metrics;
use crate::rng::reservoir::EntropyReservoir;

/// Minimum seed length accepted by [`Drbg::new`].
pub const MIN_SEED_BYTES: usize = 32;

/// Seed length minted for per-connection instances.
pub const CONNECTION_SEED_BYTES: usize = 32;

const KEY_BYTES: usize = 32;
const NONCE_BYTES: usize = 12;

pub const X_RNG_VERSION: HeaderName = HeaderName::from_static("x-rng-version");
pub const X_RNG_SOURCE: HeaderName = HeaderName::from_static("x-rng-source");
pub const X_RNG_DRBG: HeaderName = HeaderName::from_static("x-rng-drbg");
pub const X_RNG_RESEED_AGE_MS: HeaderName = HeaderName::from_static("x-rng-reseed-age-ms");
pub const X_RNG_RESEED_INTERVAL_MS: HeaderName =
    HeaderName::from_static("x-rng-reseed-interval-ms");
pub const X_RNG_RESEED_SIZE_BITS: HeaderName = HeaderName::from_static("x-rng-reseed-size-bits");
pub const X_RNG_ENTROPY_BUFFERED_KB: HeaderName =
    HeaderName::from_static("x-rng-entropy-buffered-kb");
pub const X_RNG_ENTROPY_BUFFERED_PCT: HeaderName =
    HeaderName::from_static("x-rng-entropy-buffered-%");

#[derive(Debug, Error)]
pub enum DrbgError {
    #[error("seed too short: {len} bytes, need at least {min}")]
    SeedTooShort { len: usize, min: usize },
}

/// Observability metadata attached to a DRBG instance.
///
/// The reservoir reference is weak: metadata must never keep the reservoir
/// alive past shutdown, and a dropped reservoir simply reports empty.
#[derive(Clone, Default)]
pub struct DrbgMetadata {
    pub version: String,
    pub source: String,
    pub algo: String,
    pub reseed_interval: Duration,
    pub reseed_size_bits: usize,
    pub reservoir: Weak<EntropyReservoir>,
}

/// Point-in-time copy of a DRBG's metadata and gauges.
#[derive(Debug, Clone)]
pub struct MetadataSnapshot {
    pub version: String,
    pub source: String,
    pub algo: String,
    pub reseed_age_ms: u64,
    pub reseed_interval_ms: u64,
    pub reseed_size_bits: usize,
    pub buffered_bytes: usize,
    pub fill_pct: usize,
}

struct DrbgState {
    key: [u8; KEY_BYTES],
    nonce: [u8; NONCE_BYTES],
    cipher: ChaCha20,
    reseeded_at: Instant,
    meta: DrbgMetadata,
}

/// Deterministic random byte generator.
///
/// The keystream is ChaCha20 keyed by `(key, nonce)` where both come out of
/// a SHA-512 digest: `key = H[0..32]`, `nonce = H[32..44]`. Key, nonce,
/// cipher state and reseed timestamp live behind one mutex so every consumer
/// observes them from the same keystream epoch; a `read` runs entirely
/// before or entirely after a `reseed`, never interleaved.
pub struct Drbg {
    state: Mutex<DrbgState>,
}

fn split_digest(digest: &[u8]) -> ([u8; KEY_BYTES], [u8; NONCE_BYTES]) {
    let mut key = [0u8; KEY_BYTES];
    let mut nonce = [0u8; NONCE_BYTES];
    key.copy_from_slice(&digest[..KEY_BYTES]);
    nonce.copy_from_slice(&digest[KEY_BYTES..KEY_BYTES + NONCE_BYTES]);
    (key, nonce)
}

fn keystream(key: &[u8; KEY_BYTES], nonce: &[u8; NONCE_BYTES]) -> ChaCha20 {
    ChaCha20::new(Key::from_slice(key), Nonce::from_slice(nonce))
}

impl Drbg {
    /// Build a DRBG from `seed`, which must be at least 32 bytes.
    pub fn new(seed: &[u8]) -> Result<Self, DrbgError> {
        if seed.len() < MIN_SEED_BYTES {
            return Err(DrbgError::SeedTooShort {
                len: seed.len(),
                min: MIN_SEED_BYTES,
            });
        }

        let digest = Sha512::digest(seed);
        let (key, nonce) = split_digest(&digest);

        Ok(Self {
            state: Mutex::new(DrbgState {
                cipher: keystream(&key, &nonce),
                key,
                nonce,
                reseeded_at: Instant::now(),
                meta: DrbgMetadata::default(),
            }),
        })
    }

    /// Derive a fresh per-connection instance from `master`.
    ///
    /// The master's keystream advances by the minted seed length, so
    /// instances derived at different moments are domain-separated in the
    /// master's output and statistically independent of each other.
    pub fn for_connection(master: &Drbg) -> Result<Drbg, DrbgError> {
        let seed = master.derive(CONNECTION_SEED_BYTES);
        Drbg::new(&seed)
    }

    /// XOR the keystream into `out`, advancing the stream by `out.len()`.
    ///
    /// An empty `out` is a no-op and does not advance the stream.
    pub fn read(&self, out: &mut [u8]) {
        if out.is_empty() {
            return;
        }
        let mut state = self.state.lock().unwrap();
        state.cipher.apply_keystream(out);
        drop(state);
        metrics::add_bytes_generated(out.len() as u64);
    }

    /// Mix `seed` into the key and start a new keystream epoch.
    ///
    /// The new key and nonce come from `SHA-512(current_key ∥ seed)`;
    /// rebuilding the keystream discards the prior cipher state, so earlier
    /// output cannot be reconstructed without the prior key.
    pub fn reseed(&self, seed: &[u8]) {
        let mut state = self.state.lock().unwrap();

        let mut hasher = Sha512::new();
        hasher.update(state.key);
        hasher.update(seed);
        let digest = hasher.finalize();

        let (key, nonce) = split_digest(&digest);
        state.key = key;
        state.nonce = nonce;
        state.cipher = keystream(&key, &nonce);
        state.reseeded_at = Instant::now();
    }

    /// Mint `n` keystream bytes, advancing this instance by `n`.
    pub fn derive(&self, n: usize) -> Vec<u8> {
        let mut seed = vec![0u8; n];
        self.read(&mut seed);
        seed
    }

    /// Time since the last reseed (or construction).
    pub fn reseed_age(&self) -> Duration {
        self.state.lock().unwrap().reseeded_at.elapsed()
    }

    pub fn set_metadata(&self, meta: DrbgMetadata) {
        self.state.lock().unwrap().meta = meta;
    }

    /// Capture metadata and gauges in one consistent snapshot.
    pub fn metadata(&self) -> MetadataSnapshot {
        let state = self.state.lock().unwrap();
        let (buffered_bytes, fill_pct) = match state.meta.reservoir.upgrade() {
            Some(reservoir) => {
                let (len, capacity) = reservoir.snapshot();
                (len, if capacity == 0 { 0 } else { len * 100 / capacity })
            }
            None => (0, 0),
        };

        MetadataSnapshot {
            version: state.meta.version.clone(),
            source: state.meta.source.clone(),
            algo: state.meta.algo.clone(),
            reseed_age_ms: state.reseeded_at.elapsed().as_millis() as u64,
            reseed_interval_ms: state.meta.reseed_interval.as_millis() as u64,
            reseed_size_bits: state.meta.reseed_size_bits,
            buffered_bytes,
            fill_pct,
        }
    }

    /// Emit the observability headers for a response.
    ///
    /// All values come from one [`metadata`](Self::metadata) snapshot, so a
    /// concurrent reseed cannot tear the age/interval pair. Identity tags
    /// that are not valid header values are skipped rather than mangled.
    pub fn write_headers(&self, headers: &mut HeaderMap) {
        let snap = self.metadata();

        if let Ok(value) = HeaderValue::from_str(&snap.version) {
            headers.insert(X_RNG_VERSION, value);
        }
        if let Ok(value) = HeaderValue::from_str(&snap.source) {
            headers.insert(X_RNG_SOURCE, value);
        }
        if let Ok(value) = HeaderValue::from_str(&snap.algo) {
            headers.insert(X_RNG_DRBG, value);
        }
        headers.insert(X_RNG_RESEED_AGE_MS, HeaderValue::from(snap.reseed_age_ms));
        headers.insert(
            X_RNG_RESEED_INTERVAL_MS,
            HeaderValue::from(snap.reseed_interval_ms),
        );
        headers.insert(
            X_RNG_RESEED_SIZE_BITS,
            HeaderValue::from(snap.reseed_size_bits as u64),
        );
        headers.insert(
            X_RNG_ENTROPY_BUFFERED_KB,
            HeaderValue::from((snap.buffered_bytes / 1024) as u64),
        );
        headers.insert(
            X_RNG_ENTROPY_BUFFERED_PCT,
            HeaderValue::from(snap.fill_pct as u64),
        );
    }
}
