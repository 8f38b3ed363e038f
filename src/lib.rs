//! QRNG-backed entropy service.
//!
//! Three-layer pipeline: an [`EntropyReservoir`] drains the hardware device
//! into a bounded in-memory queue; a master [`Drbg`] is seeded from the
//! reservoir and periodically reseeded; per-connection DRBGs derived from
//! the master produce the bytes clients actually receive. The HTTP surface
//! in [`server`] exposes the byte stream, a health snapshot, and a metrics
//! exposition.

pub mod config;
pub mod metrics;
pub mod rng;
pub mod server;

// Re-export the main service types for convenience
pub use config::ServiceConfig;
pub use rng::{Drbg, DrbgError, DrbgMetadata, EntropyReservoir, ReservoirError};
pub use server::AppState;
