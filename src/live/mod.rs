//! Live Data
//!
//! Bounded per-device buffers for streamed readings.
//!
//! - **Recent buffer**: the newest readings, for live display
//! - **History buffer**: a longer window, for trend views
//! - **Quality tallies**: counts of normal/estimated/questionable/bad readings

mod ring;
mod store;

pub use ring::RingBuffer;
pub use store::{DataQualityTally, DeviceStatusEntry, LiveDataStore, LiveUpdate, QualityEntry};
