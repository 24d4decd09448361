//! Shared infrastructure of the TUBii server
//!
//! * settings  - process configuration, stored as TOML
//! * logging   - env_logger setup and log forwarding to the log server
//! * stream    - outbound connections to the data and log collectors
//! * config_store - persistence of DeviceConfig snapshots
//!

pub mod constants;
pub mod settings;
pub mod logging;
pub mod stream;
pub mod config_store;

#[macro_use] extern crate log;

pub use settings::TubiiSettings;
pub use logging::{
    init_logger,
    color_log,
    LogOptions,
};
pub use stream::{
    Attempt,
    ConnectionState,
    Connector,
    TcpConnector,
    StreamClient,
    TelemetryStreamClient,
    LogStreamClient,
};
pub use config_store::{
    ConfigStore,
    JsonFileStore,
    MemoryStore,
};
