//! Live race context: cache, data-source boundary and the OpenF1 adapter.

pub mod cache;
#[cfg(feature = "remote")]
pub mod openf1;
pub mod source;

pub use cache::ContextCache;
pub use source::{MockRaceData, RaceDataSource};
