pub mod drbg;
pub mod reseed;
pub mod reservoir;


// Re-exports
pub use drbg::{Drbg, DrbgError, DrbgMetadata, MetadataSnapshot};
pub use reseed::reseed_loop;
pub use reservoir::{EntropyReservoir, ReservoirError};
