// Service configuration, parsed from CLI flags and environment

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::Serialize;

/// Entropy source identity advertised in headers and health output.
pub const DEFAULT_SOURCE_TAG: &str = "QRNG-idQuantique-QuantisPCI";

/// DRBG algorithm tag; fixed, the service only speaks ChaCha20.
pub const DRBG_ALGO_TAG: &str = "ChaCha20";

#[derive(Debug, Clone, Parser, Serialize)]
#[command(
    name = "entropyd",
    about = "High-throughput entropy service backed by a hardware QRNG device",
    version
)]
pub struct ServiceConfig {
    /// Path to the QRNG character device
    #[arg(long, env = "ENTROPYD_DEVICE", default_value = "/dev/qrandom0")]
    pub device: PathBuf,

    /// Entropy reservoir capacity in bytes
    #[arg(long, env = "ENTROPYD_CAPACITY", default_value_t = 2 * 1024 * 1024)]
    pub capacity: usize,

    /// HTTP listen address
    #[arg(long, env = "ENTROPYD_LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Interval between master DRBG reseeds (e.g. "2s", "500ms")
    #[arg(
        long,
        env = "ENTROPYD_RESEED_INTERVAL",
        default_value = "2s",
        value_parser = humantime::parse_duration
    )]
    pub reseed_interval: Duration,

    /// Bytes drawn from the reservoir per reseed (and for the initial seed)
    #[arg(long, env = "ENTROPYD_RESEED_BYTES", default_value_t = 64)]
    pub reseed_bytes: usize,

    /// Producer pause when the device yields no bytes (e.g. "10ms")
    #[arg(
        long,
        env = "ENTROPYD_FILL_DELAY",
        default_value = "10ms",
        value_parser = humantime::parse_duration
    )]
    pub fill_delay: Duration,

    /// Entropy source identity tag reported to clients
    #[arg(long, env = "ENTROPYD_SOURCE", default_value = DEFAULT_SOURCE_TAG)]
    pub source: String,
}
