// Process-wide counters and the plaintext metrics exposition

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::rng::drbg::Drbg;
use crate::rng::reservoir::EntropyReservoir;

// Monotonic counters, updated lock-free from every subsystem.
static BYTES_GENERATED: AtomicU64 = AtomicU64::new(0);
static RESEED_COUNT: AtomicU64 = AtomicU64::new(0);
static HTTP_REQUESTS: AtomicU64 = AtomicU64::new(0);
static RESERVOIR_FILL_EVENTS: AtomicU64 = AtomicU64::new(0);

pub fn add_bytes_generated(n: u64) {
    BYTES_GENERATED.fetch_add(n, Ordering::Relaxed);
}

pub fn inc_reseeds() {
    RESEED_COUNT.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_http_requests() {
    HTTP_REQUESTS.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_fill_events() {
    RESERVOIR_FILL_EVENTS.fetch_add(1, Ordering::Relaxed);
}

/// Point-in-time copy of all process counters.
#[derive(Debug, Clone, Copy)]
pub struct CounterSnapshot {
    pub bytes_generated: u64,
    pub reseed_count: u64,
    pub http_requests: u64,
    pub reservoir_fill_events: u64,
}

pub fn counters() -> CounterSnapshot {
    CounterSnapshot {
        bytes_generated: BYTES_GENERATED.load(Ordering::Relaxed),
        reseed_count: RESEED_COUNT.load(Ordering::Relaxed),
        http_requests: HTTP_REQUESTS.load(Ordering::Relaxed),
        reservoir_fill_events: RESERVOIR_FILL_EVENTS.load(Ordering::Relaxed),
    }
}

/// Render the exposition served at `/metrics`.
///
/// Line-oriented plaintext: `# HELP` and `# TYPE` preambles followed by one
/// sample per series. Gauges are computed from the master DRBG and the
/// reservoir at render time.
pub fn render(master: &Drbg, reservoir: &EntropyReservoir) -> String {
    let snapshot = counters();
    let reseed_age_ms = master.reseed_age().as_millis() as u64;
    let (buffered, capacity) = reservoir.snapshot();
    let fill_pct = if capacity == 0 { 0 } else { buffered * 100 / capacity };

    let mut out = String::with_capacity(1024);

    let _ = writeln!(out, "# HELP rng_mb_generated_total Total mebibytes generated by DRBG reads");
    let _ = writeln!(out, "# TYPE rng_mb_generated_total counter");
    let _ = writeln!(out, "rng_mb_generated_total {}", snapshot.bytes_generated / 1024 / 1024);
    let _ = writeln!(out);

    let _ = writeln!(out, "# HELP rng_reseeds_total Total master DRBG reseeds");
    let _ = writeln!(out, "# TYPE rng_reseeds_total counter");
    let _ = writeln!(out, "rng_reseeds_total {}", snapshot.reseed_count);
    let _ = writeln!(out);

    let _ = writeln!(out, "# HELP rng_reseed_age_ms Milliseconds since the last master reseed");
    let _ = writeln!(out, "# TYPE rng_reseed_age_ms gauge");
    let _ = writeln!(out, "rng_reseed_age_ms {}", reseed_age_ms);
    let _ = writeln!(out);

    let _ = writeln!(out, "# HELP qrng_buffer_capacity_kb Current reservoir fill in kibibytes");
    let _ = writeln!(out, "# TYPE qrng_buffer_capacity_kb gauge");
    let _ = writeln!(out, "qrng_buffer_capacity_kb {}", buffered / 1024);
    let _ = writeln!(out);

    let _ = writeln!(out, "# HELP qrng_buffer_capacity_pct Reservoir fill as a percentage of capacity");
    let _ = writeln!(out, "# TYPE qrng_buffer_capacity_pct gauge");
    let _ = writeln!(out, "qrng_buffer_capacity_pct {}", fill_pct);
    let _ = writeln!(out);

    let _ = writeln!(out, "# HELP http_requests_total Total random-bytes requests served");
    let _ = writeln!(out, "# TYPE http_requests_total counter");
    let _ = writeln!(out, "http_requests_total {}", snapshot.http_requests);
    let _ = writeln!(out);

    let _ = writeln!(out, "# HELP qrng_fill_events_total Total producer refills appended to the reservoir");
    let _ = writeln!(out, "# TYPE qrng_fill_events_total counter");
    let _ = writeln!(out, "qrng_fill_events_total {}", snapshot.reservoir_fill_events);

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::reservoir::DEFAULT_FILL_DELAY;
    use std::io::Write as IoWrite;
    use tempfile::NamedTempFile;

    #[test]
    fn counters_are_monotonic() {
        let before = counters();
        add_bytes_generated(10);
        inc_reseeds();
        inc_http_requests();
        inc_fill_events();
        let after = counters();

        assert!(after.bytes_generated >= before.bytes_generated + 10);
        assert!(after.reseed_count >= before.reseed_count + 1);
        assert!(after.http_requests >= before.http_requests + 1);
        assert!(after.reservoir_fill_events >= before.reservoir_fill_events + 1);
    }

    #[test]
    fn render_emits_required_series_with_preambles() {
        let mut device = NamedTempFile::new().unwrap();
        device.write_all(&[0x9C; 2048]).unwrap();
        device.flush().unwrap();

        let reservoir = EntropyReservoir::new(device.path(), 1024, DEFAULT_FILL_DELAY);
        let master = Drbg::new(&[0x21; 32]).unwrap();

        let body = render(&master, &reservoir);
        reservoir.stop();

        for series in [
            "rng_mb_generated_total",
            "rng_reseeds_total",
            "rng_reseed_age_ms",
            "qrng_buffer_capacity_kb",
            "qrng_buffer_capacity_pct",
            "http_requests_total",
        ] {
            assert!(
                body.contains(&format!("# HELP {series} ")),
                "missing HELP for {series}"
            );
            assert!(
                body.contains(&format!("# TYPE {series} ")),
                "missing TYPE for {series}"
            );
            assert!(
                body.lines().any(|line| line.starts_with(&format!("{series} "))),
                "missing sample for {series}"
            );
        }
    }
}
