//! # TUBii dataclasses
//!
//! Everything which goes over the wire or is exchanged
//! between the TUBii server and its collaborators:
//!
//! * telemetry records (trigger batches, status records)
//!   as expected by the downstream data server
//! * the configuration snapshot which can be stored
//!   and restored through a configuration store
//! * the error types shared by the server crates
//!

pub mod errors;
pub mod serialization;
pub mod records;
pub mod config;

#[macro_use] extern crate log;

pub use records::{
    GenericRecordHeader,
    TriggerRecord,
    MegaRecord,
    StatusRecord,
    TelemetryRecord,
};
pub use config::{
    ConfigField,
    DeviceConfig,
};

/// Create an instance of a struct with
/// random field values, used for testing
#[cfg(feature = "random")]
pub trait FromRandom {
  fn from_random() -> Self;
}
