//! Sensor ingestion: the radio capability, notification frame decoding,
//! one producer per paired sensor and the discovery unit.

pub mod decode;
pub mod producer;
pub mod radio;
pub mod simulated;
pub mod supervisor;

pub use producer::ProducerConfig;
pub use radio::{LinkEvent, Radio, RadioError, RadioFuture};
pub use simulated::{SimulatedDevice, SimulatedRadio};
pub use supervisor::{Ingestion, matches_prefix};
