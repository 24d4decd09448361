//! Error types shared by the TUBii crates
//!
//! Every error renders as `<ErrorType: detail>` through
//! `fmt::Display`, except for the [`DispatchError`], which
//! renders as the message part of a `-<message>` reply.

use std::error::Error;
use std::fmt;

/// Problems while decoding (or encoding) wire records
#[derive(Debug, Clone, PartialEq)]
pub enum SerializationError {
  StreamTooShort,
  WrongByteSize,
  UnknownRecordId(u32),
  WrongRecordVersion(u32),
  RecordTooLarge(usize),
}

impl fmt::Display for SerializationError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let etype : String;
    match self {
      SerializationError::StreamTooShort => {
        etype = String::from("StreamTooShort");
      },
      SerializationError::WrongByteSize => {
        etype = String::from("WrongByteSize");
      },
      SerializationError::UnknownRecordId(id) => {
        etype = format!("UnknownRecordId {:#x}", id);
      },
      SerializationError::WrongRecordVersion(version) => {
        etype = format!("WrongRecordVersion {}", version);
      },
      SerializationError::RecordTooLarge(nbytes) => {
        etype = format!("RecordTooLarge ({} bytes)", nbytes);
      }
    }
    write!(f, "<SerializationError: {}>", etype)
  }
}

impl Error for SerializationError {
}

///////////////////////////////////////////////

/// A register window could not be mapped.
///
/// This is always fatal at start-up.
#[derive(Debug, Clone, PartialEq)]
pub enum MappingError {
  DeviceOpen    { path : String, reason : String },
  Mmap          { window : String, reason : String },
  InvalidWindow { window : String, base : u64, limit : usize },
}

impl fmt::Display for MappingError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let etype : String;
    match self {
      MappingError::DeviceOpen {path, reason} => {
        etype = format!("can not open {}: {}", path, reason);
      },
      MappingError::Mmap {window, reason} => {
        etype = format!("mmap of window {} failed: {}", window, reason);
      },
      MappingError::InvalidWindow {window, base, limit} => {
        etype = format!("window {} with base {:#x} and limit {:#x} is not valid", window, base, limit);
      }
    }
    write!(f, "<MappingError: {}>", etype)
  }
}

impl Error for MappingError {
}

///////////////////////////////////////////////

/// A device operation refused its arguments or
/// the hardware flagged the requested setting
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceError {
  InvalidArgument(String),
  HardwareRejected(String),
  UnknownConfigField(String),
}

impl fmt::Display for DeviceError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      DeviceError::InvalidArgument(msg) => {
        write!(f, "<DeviceError: InvalidArgument: {}>", msg)
      },
      DeviceError::HardwareRejected(msg) => {
        write!(f, "<DeviceError: HardwareRejected: {}>", msg)
      },
      DeviceError::UnknownConfigField(name) => {
        write!(f, "<DeviceError: UnknownConfigField: {}>", name)
      }
    }
  }
}

impl Error for DeviceError {
}

///////////////////////////////////////////////

/// Failure of the configuration store collaborator
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigStoreError {
  Io(String),
  Decode(String),
  NoSuchKey(u32),
}

impl fmt::Display for ConfigStoreError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      ConfigStoreError::Io(msg)       => write!(f, "<ConfigStoreError: Io: {}>", msg),
      ConfigStoreError::Decode(msg)   => write!(f, "<ConfigStoreError: Decode: {}>", msg),
      ConfigStoreError::NoSuchKey(key) => write!(f, "<ConfigStoreError: NoSuchKey: {}>", key),
    }
  }
}

impl Error for ConfigStoreError {
}

impl From<std::io::Error> for ConfigStoreError {
  fn from(err : std::io::Error) -> Self {
    ConfigStoreError::Io(err.to_string())
  }
}

impl From<serde_json::Error> for ConfigStoreError {
  fn from(err : serde_json::Error) -> Self {
    ConfigStoreError::Decode(err.to_string())
  }
}

///////////////////////////////////////////////

/// Anything which goes wrong with a collector
/// connection. Never reaches a command caller.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamError {
  Connect(String),
  Write(String),
  PeerClosed,
}

impl fmt::Display for StreamError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      StreamError::Connect(msg) => write!(f, "<StreamError: Connect: {}>", msg),
      StreamError::Write(msg)   => write!(f, "<StreamError: Write: {}>", msg),
      StreamError::PeerClosed   => write!(f, "<StreamError: PeerClosed>"),
    }
  }
}

impl Error for StreamError {
}

///////////////////////////////////////////////

#[derive(Debug, Clone, PartialEq)]
pub enum SettingsError {
  Io(String),
  TomlDecoding(String),
}

impl fmt::Display for SettingsError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      SettingsError::Io(msg)           => write!(f, "<SettingsError: Io: {}>", msg),
      SettingsError::TomlDecoding(msg) => write!(f, "<SettingsError: TomlDecoding: {}>", msg),
    }
  }
}

impl Error for SettingsError {
}

impl From<std::io::Error> for SettingsError {
  fn from(err : std::io::Error) -> Self {
    SettingsError::Io(err.to_string())
  }
}

///////////////////////////////////////////////

/// Everything which makes a command fail.
///
/// The Display impl is the text of the error
/// reply, without the leading `-`.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchError {
  UnknownCommand(String),
  ArityMismatch   { command : String, expected : usize, got : usize },
  InvalidArgument { command : String, position : usize, value : String, reason : String },
  Device(DeviceError),
  ConfigStore(ConfigStoreError),
}

impl fmt::Display for DispatchError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      DispatchError::UnknownCommand(name) => {
        write!(f, "unknown command '{}'", name)
      },
      DispatchError::ArityMismatch {command, expected, got} => {
        write!(f, "{} expects {} arguments, got {}", command, expected - 1, got.saturating_sub(1))
      },
      DispatchError::InvalidArgument {command, position, value, reason} => {
        write!(f, "{}: argument {} '{}' is invalid ({})", command, position, value, reason)
      },
      DispatchError::Device(err) => {
        match err {
          DeviceError::InvalidArgument(msg)    => write!(f, "invalid argument: {}", msg),
          DeviceError::HardwareRejected(msg)   => write!(f, "hardware rejected: {}", msg),
          DeviceError::UnknownConfigField(msg) => write!(f, "unknown config field: {}", msg),
        }
      },
      DispatchError::ConfigStore(err) => {
        write!(f, "config store: {}", err)
      }
    }
  }
}

impl Error for DispatchError {
}

impl From<DeviceError> for DispatchError {
  fn from(err : DeviceError) -> Self {
    DispatchError::Device(err)
  }
}

impl From<ConfigStoreError> for DispatchError {
  fn from(err : ConfigStoreError) -> Self {
    DispatchError::ConfigStore(err)
  }
}
