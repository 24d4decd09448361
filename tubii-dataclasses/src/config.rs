//! Device configuration snapshots
//!
//! A [`DeviceConfig`] maps the names of the configurable
//! registers to their 32bit values. It is the unit which is
//! exchanged with a configuration store, serialized as a
//! flat json object.

use std::fmt;
use std::str::FromStr;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::DeviceError;

/// The fixed set of fields a configuration
/// snapshot may carry
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConfigField {
  ControlReg,
  TriggerMask,
  SpeakerMask,
  CounterMask,
  CaenGainReg,
  CaenChannelReg,
  LockoutReg,
  DgtReg,
  DacReg,
  ComboEnableMask,
  ComboMask,
  CounterMode,
  ClockStatus,
  PrescaleValue,
  PrescaleChannel,
  BurstRate,
  BurstChannel,
}

impl ConfigField {

  pub const ALL : [ConfigField; 17] = [
    ConfigField::ControlReg,
    ConfigField::TriggerMask,
    ConfigField::SpeakerMask,
    ConfigField::CounterMask,
    ConfigField::CaenGainReg,
    ConfigField::CaenChannelReg,
    ConfigField::LockoutReg,
    ConfigField::DgtReg,
    ConfigField::DacReg,
    ConfigField::ComboEnableMask,
    ConfigField::ComboMask,
    ConfigField::CounterMode,
    ConfigField::ClockStatus,
    ConfigField::PrescaleValue,
    ConfigField::PrescaleChannel,
    ConfigField::BurstRate,
    ConfigField::BurstChannel,
  ];

  pub fn name(&self) -> &'static str {
    match self {
      ConfigField::ControlReg      => "control_reg",
      ConfigField::TriggerMask     => "trigger_mask",
      ConfigField::SpeakerMask     => "speaker_mask",
      ConfigField::CounterMask     => "counter_mask",
      ConfigField::CaenGainReg     => "caen_gain_reg",
      ConfigField::CaenChannelReg  => "caen_channel_reg",
      ConfigField::LockoutReg      => "lockout_reg",
      ConfigField::DgtReg          => "dgt_reg",
      ConfigField::DacReg          => "dac_reg",
      ConfigField::ComboEnableMask => "combo_enable_mask",
      ConfigField::ComboMask       => "combo_mask",
      ConfigField::CounterMode     => "counter_mode",
      ConfigField::ClockStatus     => "clock_status",
      ConfigField::PrescaleValue   => "prescale_value",
      ConfigField::PrescaleChannel => "prescale_channel",
      ConfigField::BurstRate       => "burst_rate",
      ConfigField::BurstChannel    => "burst_channel",
    }
  }

  /// Fields which are recorded, but never written
  /// back to the hardware
  pub fn is_read_only(&self) -> bool {
    *self == ConfigField::ClockStatus
  }
}

impl fmt::Display for ConfigField {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "{}", self.name())
  }
}

impl FromStr for ConfigField {
  type Err = DeviceError;

  fn from_str(name : &str) -> Result<Self, Self::Err> {
    for field in ConfigField::ALL {
      if field.name() == name {
        return Ok(field);
      }
    }
    Err(DeviceError::UnknownConfigField(String::from(name)))
  }
}

///////////////////////////////////////////////

/// Snapshot of all configurable registers
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceConfig {
  values : BTreeMap<String, u32>,
}

impl DeviceConfig {

  pub fn new() -> Self {
    Self {
      values : BTreeMap::<String, u32>::new()
    }
  }

  pub fn set(&mut self, field : ConfigField, value : u32) {
    self.values.insert(String::from(field.name()), value);
  }

  pub fn get(&self, field : ConfigField) -> Option<u32> {
    self.values.get(field.name()).copied()
  }

  /// Set a field by its name, as it might come from
  /// a store which does not know about ConfigField
  pub fn set_by_name(&mut self, name : &str, value : u32) {
    self.values.insert(String::from(name), value);
  }

  pub fn len(&self) -> usize {
    self.values.len()
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }

  /// Resolve every entry to a known field.
  ///
  /// Fails on the first unknown name, so that a
  /// snapshot is either applied completely or not
  /// at all.
  pub fn fields(&self) -> Result<Vec<(ConfigField, u32)>, DeviceError> {
    let mut fields = Vec::<(ConfigField, u32)>::with_capacity(self.values.len());
    for (name, value) in &self.values {
      let field = ConfigField::from_str(name)?;
      fields.push((field, *value));
    }
    Ok(fields)
  }

  pub fn to_json(&self) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(self)
  }

  pub fn from_json(input : &str) -> Result<Self, serde_json::Error> {
    serde_json::from_str(input)
  }
}

impl fmt::Display for DeviceConfig {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let mut repr = String::from("<DeviceConfig:");
    for (name, value) in &self.values {
      repr += &(format!("\n  {:<18} : {:#x}", name, value));
    }
    write!(f, "{}>", repr)
  }
}
