//! Settings of the TUBii server process
//!
//! All settings can be written to and read from
//! a TOML file. Host names given on the command
//! line override the ones in the file.

use std::fs::File;
use std::io::{
    Write,
    Read,
};
use std::fmt;
use std::time::Duration;

extern crate toml;

use tubii_dataclasses::errors::SettingsError;

use crate::constants::*;

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct TubiiSettings {
  /// Port the command socket binds to
  pub command_port             : u16,
  /// Host of the data server (telemetry)
  pub data_host                : String,
  pub data_port                : u16,
  /// Host of the log server
  pub log_host                 : String,
  pub log_port                 : u16,
  /// Prefix of every forwarded log line
  pub log_name                 : String,
  /// Try to reconnect lost collector streams
  /// in this interval
  pub reconnect_interval_sec   : u64,
  /// Give up a single connection attempt
  /// after this time
  pub connect_timeout_ms       : u64,
  /// Readout the trigger FIFO every this many ms
  pub readout_interval_ms      : u64,
  /// Send a status record every this many ms
  pub status_interval_ms       : u64,
  /// Number of FIFO reads per readout tick
  pub fifo_read_budget         : usize,
  /// Maximum number of trigger records per MegaRecord
  pub batch_capacity           : usize,
  /// Drain the FIFO right after start-up. If false,
  /// readout has to be enabled with startReadout
  pub readout_on_start         : bool,
  /// Directory holding saved device configurations
  pub config_store_dir         : String,
  /// Device which exposes the physical address space
  pub mem_device               : String,
  /// Maximum number of unsent bytes per collector
  /// stream before records get dropped
  pub max_pending_bytes        : usize,
}

impl TubiiSettings {
  pub fn new() -> Self {
    TubiiSettings {
      command_port             : COMMAND_PORT,
      data_host                : String::from(DEFAULT_DATA_HOST),
      data_port                : DATA_SERVER_PORT,
      log_host                 : String::from(DEFAULT_LOG_HOST),
      log_port                 : LOG_SERVER_PORT,
      log_name                 : String::from(DEFAULT_LOG_NAME),
      reconnect_interval_sec   : RECONNECT_INTERVAL_SEC,
      connect_timeout_ms       : CONNECT_TIMEOUT_MS,
      readout_interval_ms      : READOUT_INTERVAL_MS,
      status_interval_ms       : STATUS_INTERVAL_MS,
      fifo_read_budget         : FIFO_READ_BUDGET,
      batch_capacity           : BATCH_CAPACITY,
      readout_on_start         : true,
      config_store_dir         : String::from(CONFIG_STORE_DIR),
      mem_device               : String::from(MEM_DEVICE),
      max_pending_bytes        : MAX_PENDING_BYTES,
    }
  }

  pub fn reconnect_interval(&self) -> Duration {
    Duration::from_secs(self.reconnect_interval_sec)
  }

  pub fn connect_timeout(&self) -> Duration {
    Duration::from_millis(self.connect_timeout_ms)
  }

  pub fn readout_interval(&self) -> Duration {
    Duration::from_millis(self.readout_interval_ms)
  }

  pub fn status_interval(&self) -> Duration {
    Duration::from_millis(self.status_interval_ms)
  }

  /// The address the command socket binds to
  pub fn command_address(&self) -> String {
    format!("tcp://*:{}", self.command_port)
  }

  /// Write the settings to a toml file
  ///
  /// # Arguments
  ///
  /// * filename : the suffix ".toml" will be added
  ///              if it is missing
  pub fn to_toml(&self, mut filename : String) -> Result<(), SettingsError> {
    if !filename.ends_with(".toml") {
      filename += ".toml";
    }
    info!("Will write to file {}!", filename);
    let toml_string = match toml::to_string_pretty(&self) {
      Err(err) => {
        error!("Unable to serialize toml! {err}");
        return Err(SettingsError::TomlDecoding(err.to_string()));
      }
      Ok(toml_string) => toml_string
    };
    let mut file = File::create(&filename)?;
    file.write_all(toml_string.as_bytes())?;
    debug!("Wrote settings to {}!", filename);
    Ok(())
  }

  /// Load settings from a toml file
  pub fn from_toml(filename : &str) -> Result<TubiiSettings, SettingsError> {
    let mut toml_string = String::from("");
    match File::open(filename) {
      Err(err) => {
        error!("Unable to open {}! {}", filename, err);
        return Err(SettingsError::from(err));
      }
      Ok(mut file) => {
        file.read_to_string(&mut toml_string)?;
      }
    }
    match toml::from_str(&toml_string) {
      Err(err) => {
        error!("Can't interpret toml! {}", err);
        Err(SettingsError::TomlDecoding(err.to_string()))
      }
      Ok(settings) => Ok(settings)
    }
  }
}

impl fmt::Display for TubiiSettings {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let disp : String;
    match toml::to_string(self) {
      Err(err) => {
        error!("Serialization error! {err}");
        disp = String::from("-- SERIALIZATION ERROR! --");
      }
      Ok(_disp) => {
        disp = _disp;
      }
    }
    write!(f, "<TubiiSettings :\n{}>", disp)
  }
}

impl Default for TubiiSettings {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_match_the_deployed_server() {
    let settings = TubiiSettings::new();
    assert_eq!(settings.command_port, 4001);
    assert_eq!(settings.log_port, 4001);
    assert_eq!(settings.reconnect_interval(), Duration::from_secs(10));
    assert_eq!(settings.command_address(), "tcp://*:4001");
    assert_eq!(settings.data_host, "daq1");
    assert_eq!(settings.log_host, "minard");
  }

  #[test]
  fn partial_toml_is_refused() {
    let result : Result<TubiiSettings, _> = toml::from_str("command_port = 5000\n");
    assert!(result.is_err());
  }
}
