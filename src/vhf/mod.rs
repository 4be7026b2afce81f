//! VHF presence detector (spec.md §2 C3, §4.3): frequency-bin variance+count
//! classification plus the MQTT/CBOR-driven analysis unit built on it.

mod bins;
mod unit;

pub use bins::{AcceptedSignal, FrequencyBin, VhfEngine};
pub use unit::VhfUnit;
