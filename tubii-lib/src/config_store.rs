//! Persistence of device configuration snapshots
//!
//! A store hands out an opaque numeric key for every
//! saved snapshot, which can later be used to load it
//! again.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use tubii_dataclasses::config::DeviceConfig;
use tubii_dataclasses::errors::ConfigStoreError;

pub trait ConfigStore {
  /// Persist a snapshot, returns the key under
  /// which it can be loaded
  fn save(&mut self, config : &DeviceConfig) -> Result<u32, ConfigStoreError>;

  fn load(&mut self, key : u32) -> Result<DeviceConfig, ConfigStoreError>;
}

/// Keeps every snapshot as a json file
/// `tubii_config_<key>.json` in a directory
#[derive(Debug, Clone)]
pub struct JsonFileStore {
  pub dir : PathBuf,
}

impl JsonFileStore {
  pub fn new(dir : &str) -> Self {
    Self {
      dir : PathBuf::from(dir)
    }
  }

  fn path_for(&self, key : u32) -> PathBuf {
    self.dir.join(format!("tubii_config_{}.json", key))
  }

  /// Largest key in use, 0 for an empty store
  fn last_key(&self) -> Result<u32, ConfigStoreError> {
    let mut last = 0u32;
    let entries = match fs::read_dir(&self.dir) {
      Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
      Err(err) => return Err(ConfigStoreError::from(err)),
      Ok(entries) => entries
    };
    for entry in entries {
      let entry = entry?;
      let fname = entry.file_name();
      let fname = fname.to_string_lossy();
      let key = fname.strip_prefix("tubii_config_")
        .and_then(|rest| rest.strip_suffix(".json"))
        .and_then(|key| key.parse::<u32>().ok());
      if let Some(key) = key {
        last = last.max(key);
      }
    }
    Ok(last)
  }
}

impl ConfigStore for JsonFileStore {

  fn save(&mut self, config : &DeviceConfig) -> Result<u32, ConfigStoreError> {
    fs::create_dir_all(&self.dir)?;
    let key = match self.last_key()?.checked_add(1) {
      None      => return Err(ConfigStoreError::Io(String::from("key space exhausted"))),
      Some(key) => key
    };
    let path = self.path_for(key);
    fs::write(&path, config.to_json()?)?;
    info!("Saved device configuration as {}", path.display());
    Ok(key)
  }

  fn load(&mut self, key : u32) -> Result<DeviceConfig, ConfigStoreError> {
    let path = self.path_for(key);
    let content = match fs::read_to_string(&path) {
      Err(err) if err.kind() == ErrorKind::NotFound => {
        return Err(ConfigStoreError::NoSuchKey(key));
      }
      Err(err)    => return Err(ConfigStoreError::from(err)),
      Ok(content) => content
    };
    debug!("Loading device configuration from {}", path.display());
    Ok(DeviceConfig::from_json(&content)?)
  }
}

/// Store without persistence, for testing and
/// for running against the simulated bus
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
  configs : Vec<DeviceConfig>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self {
      configs : Vec::<DeviceConfig>::new()
    }
  }
}

impl ConfigStore for MemoryStore {

  fn save(&mut self, config : &DeviceConfig) -> Result<u32, ConfigStoreError> {
    self.configs.push(config.clone());
    Ok(self.configs.len() as u32)
  }

  fn load(&mut self, key : u32) -> Result<DeviceConfig, ConfigStoreError> {
    if key == 0 {
      return Err(ConfigStoreError::NoSuchKey(key));
    }
    match self.configs.get(key as usize - 1) {
      None         => Err(ConfigStoreError::NoSuchKey(key)),
      Some(config) => Ok(config.clone())
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tubii_dataclasses::config::ConfigField;

  #[test]
  fn memory_store_keys_start_at_one() {
    let mut store  = MemoryStore::new();
    let mut config = DeviceConfig::new();
    config.set(ConfigField::ControlReg, 58);
    assert_eq!(store.save(&config), Ok(1));
    assert_eq!(store.load(1), Ok(config));
    assert_eq!(store.load(0), Err(ConfigStoreError::NoSuchKey(0)));
    assert_eq!(store.load(2), Err(ConfigStoreError::NoSuchKey(2)));
  }

  #[test]
  fn json_store_numbers_files() {
    let dir = std::env::temp_dir().join(format!("tubii-config-store-{}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    let mut store = JsonFileStore {
      dir : dir.clone()
    };
    let mut config = DeviceConfig::new();
    config.set(ConfigField::TriggerMask, 0xff);
    assert_eq!(store.save(&config), Ok(1));
    config.set(ConfigField::TriggerMask, 0x0f);
    assert_eq!(store.save(&config), Ok(2));
    assert_eq!(store.load(2).unwrap().get(ConfigField::TriggerMask), Some(0x0f));
    assert_eq!(store.load(1).unwrap().get(ConfigField::TriggerMask), Some(0xff));
    assert_eq!(store.load(3), Err(ConfigStoreError::NoSuchKey(3)));
    fs::write(dir.join("tubii_config_9.json"), "not json").unwrap();
    assert!(matches!(store.load(9), Err(ConfigStoreError::Decode(_))));
    let _ = fs::remove_dir_all(&dir);
  }
}
