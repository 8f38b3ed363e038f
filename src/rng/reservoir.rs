// Bounded entropy reservoir continuously topped up from the QRNG device

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::metrics;

/// Default pause between refill attempts when the device yields nothing.
pub const DEFAULT_FILL_DELAY: Duration = Duration::from_millis(10);

/// Backoff applied when the device cannot be opened.
const OPEN_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Errors surfaced to reservoir consumers.
///
/// Transient device failures are never surfaced here; the producer retries
/// those silently. Consumers only see terminal conditions.
#[derive(Debug, Error)]
pub enum ReservoirError {
    #[error("reservoir stopped with {available} of {requested} requested bytes buffered")]
    Stopped { available: usize, requested: usize },

    #[error("requested {requested} bytes exceeds reservoir capacity {capacity}")]
    RequestTooLarge { requested: usize, capacity: usize },
}

/// Bounded byte queue between the QRNG device and DRBG consumers.
///
/// A dedicated producer thread drains the device into the queue; consumers
/// take prefixes with [`get`](Self::get). The producer appends at the tail,
/// consumers drain from the head, and the length never exceeds `capacity`.
/// Consumers block on a data-available condition while the queue is short;
/// the producer blocks on a space-available condition while it is full.
pub struct EntropyReservoir {
    pool: Mutex<VecDeque<u8>>,
    data_available: Condvar,
    space_available: Condvar,
    capacity: usize,
    device_path: PathBuf,
    fill_delay: Duration,
    stopped: AtomicBool,
}

impl EntropyReservoir {
    /// Create a reservoir over `device_path` and start its producer thread.
    ///
    /// `capacity` must be non-zero; a zero-capacity reservoir could never
    /// satisfy any request and is a construction bug.
    pub fn new(device_path: impl AsRef<Path>, capacity: usize, fill_delay: Duration) -> Arc<Self> {
        assert!(capacity > 0, "reservoir capacity must be non-zero");

        let reservoir = Arc::new(Self {
            pool: Mutex::new(VecDeque::with_capacity(capacity)),
            data_available: Condvar::new(),
            space_available: Condvar::new(),
            capacity,
            device_path: device_path.as_ref().to_path_buf(),
            fill_delay,
            stopped: AtomicBool::new(false),
        });

        let producer = Arc::clone(&reservoir);
        thread::Builder::new()
            .name("qrng-fill".into())
            .spawn(move || producer.fill_loop())
            .expect("failed to spawn QRNG producer thread");

        reservoir
    }

    /// Take exactly `n` bytes from the head of the reservoir.
    ///
    /// Blocks until enough bytes are buffered. Returns an owned copy; the
    /// internal queue never aliases returned data. Fails only when the
    /// reservoir is stopped and the request can no longer be satisfied, or
    /// when `n` exceeds the capacity and could never be satisfied at all.
    pub fn get(&self, n: usize) -> Result<Vec<u8>, ReservoirError> {
        if n == 0 {
            return Ok(Vec::new());
        }
        if n > self.capacity {
            return Err(ReservoirError::RequestTooLarge {
                requested: n,
                capacity: self.capacity,
            });
        }

        let mut pool = self.pool.lock().unwrap();
        while pool.len() < n {
            if self.stopped.load(Ordering::SeqCst) {
                return Err(ReservoirError::Stopped {
                    available: pool.len(),
                    requested: n,
                });
            }
            pool = self.data_available.wait(pool).unwrap();
        }

        let out: Vec<u8> = pool.drain(..n).collect();
        drop(pool);
        self.space_available.notify_all();
        Ok(out)
    }

    /// Signal the producer to exit and wake all blocked consumers.
    ///
    /// Idempotent; later calls are no-ops.
    pub fn stop(&self) {
        let already_stopped = {
            // Flip the flag under the pool lock so no waiter can miss the
            // wakeup between its stop-check and its condvar wait.
            let _pool = self.pool.lock().unwrap();
            self.stopped.swap(true, Ordering::SeqCst)
        };
        if !already_stopped {
            self.data_available.notify_all();
            self.space_available.notify_all();
        }
    }

    /// Non-blocking observability snapshot: `(buffered_bytes, capacity)`.
    pub fn snapshot(&self) -> (usize, usize) {
        let pool = self.pool.lock().unwrap();
        (pool.len(), self.capacity)
    }

    /// Whether [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn fill_loop(&self) {
        while !self.stopped.load(Ordering::SeqCst) {
            let free = {
                let mut pool = self.pool.lock().unwrap();
                while pool.len() >= self.capacity {
                    if self.stopped.load(Ordering::SeqCst) {
                        return;
                    }
                    pool = self.space_available.wait(pool).unwrap();
                }
                self.capacity - pool.len()
            };

            let chunk = match self.read_device(free) {
                Ok(chunk) => chunk,
                Err(err) => {
                    debug!(
                        device = %self.device_path.display(),
                        error = %err,
                        "QRNG device open failed, retrying"
                    );
                    thread::sleep(OPEN_RETRY_DELAY);
                    continue;
                }
            };

            if chunk.is_empty() {
                thread::sleep(self.fill_delay);
                continue;
            }

            let mut pool = self.pool.lock().unwrap();
            pool.extend(chunk);
            drop(pool);
            metrics::inc_fill_events();
            self.data_available.notify_all();
        }
    }

    /// Read up to `want` bytes from the device.
    ///
    /// The device is reopened for every refill: some drivers expose a fixed
    /// read window per open, so a fresh open bounds the yield to `want`.
    /// Short reads are accumulated; a mid-stream read error ends the refill
    /// and whatever was read so far is still returned.
    fn read_device(&self, want: usize) -> io::Result<Vec<u8>> {
        let mut device = File::open(&self.device_path)?;
        let mut chunk = vec![0u8; want];
        let mut filled = 0;

        while filled < want {
            match device.read(&mut chunk[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) => {
                    debug!(
                        device = %self.device_path.display(),
                        error = %err,
                        "QRNG read error mid-refill"
                    );
                    break;
                }
            }
        }

        chunk.truncate(filled);
        Ok(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// Fake QRNG device: a file the producer reopens (and therefore
    /// re-reads from the start) on every refill, so it acts as an
    /// endless byte source.
    fn fake_device(content: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn get_serves_exact_bytes_from_device() {
        let device = fake_device(&[0xAA; 8192]);
        let reservoir = EntropyReservoir::new(device.path(), 4096, DEFAULT_FILL_DELAY);

        let bytes = reservoir.get(4096).unwrap();
        assert_eq!(bytes.len(), 4096);
        assert!(bytes.iter().all(|&b| b == 0xAA), "device bytes must pass through unchanged");

        let (len, capacity) = reservoir.snapshot();
        assert!(len <= capacity, "fill level must never exceed capacity");

        reservoir.stop();
    }

    #[test]
    fn get_zero_returns_immediately() {
        // Device that can never be opened; get(0) must not touch it.
        let reservoir =
            EntropyReservoir::new("/nonexistent/qrng-device", 64, DEFAULT_FILL_DELAY);
        assert!(reservoir.get(0).unwrap().is_empty());
        reservoir.stop();
    }

    #[test]
    fn get_blocks_until_producer_accumulates_enough() {
        // 16-byte device window, so a 64-byte request needs several refills.
        let device = fake_device(&[0x33; 16]);
        let reservoir = EntropyReservoir::new(device.path(), 64, Duration::from_millis(1));

        let bytes = reservoir.get(64).unwrap();
        assert_eq!(bytes.len(), 64);
        assert!(bytes.iter().all(|&b| b == 0x33));

        reservoir.stop();
    }

    #[test]
    fn split_reads_match_single_read() {
        let pattern: Vec<u8> = (0u8..=255).collect();

        let device_a = fake_device(&pattern);
        let split = EntropyReservoir::new(device_a.path(), 256, DEFAULT_FILL_DELAY);
        let mut split_bytes = split.get(2).unwrap();
        split_bytes.extend(split.get(3).unwrap());
        split.stop();

        let device_b = fake_device(&pattern);
        let single = EntropyReservoir::new(device_b.path(), 256, DEFAULT_FILL_DELAY);
        let single_bytes = single.get(5).unwrap();
        single.stop();

        assert_eq!(split_bytes, single_bytes);
        assert_eq!(split_bytes, pattern[..5]);
    }

    #[test]
    fn stop_is_idempotent_and_fails_unsatisfiable_gets() {
        let reservoir =
            EntropyReservoir::new("/nonexistent/qrng-device", 64, DEFAULT_FILL_DELAY);

        reservoir.stop();
        reservoir.stop();
        assert!(reservoir.is_stopped());

        match reservoir.get(1) {
            Err(ReservoirError::Stopped { available, requested }) => {
                assert_eq!(available, 0);
                assert_eq!(requested, 1);
            }
            other => panic!("expected Stopped error, got {:?}", other.map(|b| b.len())),
        }
    }

    #[test]
    fn oversized_request_fails_fast() {
        let device = fake_device(&[0x11; 128]);
        let reservoir = EntropyReservoir::new(device.path(), 64, DEFAULT_FILL_DELAY);

        match reservoir.get(65) {
            Err(ReservoirError::RequestTooLarge { requested, capacity }) => {
                assert_eq!(requested, 65);
                assert_eq!(capacity, 64);
            }
            other => panic!("expected RequestTooLarge, got {:?}", other.map(|b| b.len())),
        }

        reservoir.stop();
    }

    #[test]
    fn fill_events_counter_advances() {
        let before = metrics::counters().reservoir_fill_events;

        let device = fake_device(&[0x77; 1024]);
        let reservoir = EntropyReservoir::new(device.path(), 512, DEFAULT_FILL_DELAY);
        let _ = reservoir.get(512).unwrap();
        reservoir.stop();

        assert!(metrics::counters().reservoir_fill_events > before);
    }
}
