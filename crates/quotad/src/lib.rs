//! quotad library: the per-pool driver used by the `quotad` binary.

pub mod driver;

pub use driver::{PoolDriver, epoch_millis};
