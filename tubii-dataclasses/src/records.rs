//! Telemetry records shipped to the data server
//!
//! Every record on the wire is a [`GenericRecordHeader`]
//! followed by `record_length` payload bytes. All words
//! are in network byte order.
//!
//! ```text
//! GenericRecordHeader { RecordID, RecordLength, RecordVersion }
//! MegaRecord          { count, TriggerRecord[count] }
//! TriggerRecord       { GTID, TrigWord }
//! StatusRecord        { Clock, LastEmittedGTID, CurrentHardwareGTID, FifoState }
//! ```

use std::fmt;

cfg_if::cfg_if! {
  if #[cfg(feature = "random")] {
    use crate::FromRandom;
    extern crate rand;
    use rand::Rng;
  }
}

use crate::serialization::{
    Serialization,
    SerializationError,
    parse_u32,
    try_parse_u32,
    push_u32,
};

/// Protocol version of all records
pub const RECORD_VERSION : u32 = 0;

/// RecordID of a batch of trigger records
pub const MEGA_RECORD    : u32 = 0x0000_000E;

/// RecordID of the periodic status record
pub const TUBII_STATUS   : u32 = 0x0000_000F;

/// Refuse to decode payloads larger than this.
/// A corrupted length word should not make us
/// allocate gigabytes.
pub const MAX_RECORD_LENGTH : usize = 1 << 20;

/// Framing of every telemetry record
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct GenericRecordHeader {
  pub record_id      : u32,
  /// payload size in bytes, header excluded
  pub record_length  : u32,
  pub record_version : u32,
}

impl GenericRecordHeader {
  pub fn new(record_id : u32, record_length : u32) -> Self {
    Self {
      record_id,
      record_length,
      record_version : RECORD_VERSION,
    }
  }
}

impl Serialization for GenericRecordHeader {
  const SIZE : usize = 12;

  fn from_bytestream(stream : &Vec<u8>,
                     pos    : &mut usize)
    -> Result<Self, SerializationError> {
    Self::verify_fixed(stream, pos)?;
    let record_id      = parse_u32(stream, pos);
    let record_length  = parse_u32(stream, pos);
    let record_version = parse_u32(stream, pos);
    Ok(Self {
      record_id,
      record_length,
      record_version
    })
  }

  fn to_bytestream(&self) -> Vec<u8> {
    let mut stream = Vec::<u8>::with_capacity(Self::SIZE);
    push_u32(&mut stream, self.record_id);
    push_u32(&mut stream, self.record_length);
    push_u32(&mut stream, self.record_version);
    stream
  }
}

///////////////////////////////////////////////

/// One hardware trigger, as read from the FIFO
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct TriggerRecord {
  pub gtid      : u32,
  pub trig_word : u32,
}

impl TriggerRecord {
  pub fn new(gtid : u32, trig_word : u32) -> Self {
    Self {
      gtid,
      trig_word
    }
  }
}

impl fmt::Display for TriggerRecord {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "<TriggerRecord: GTID {} TrigWord {:#010x}>", self.gtid, self.trig_word)
  }
}

impl Serialization for TriggerRecord {
  const SIZE : usize = 8;

  fn from_bytestream(stream : &Vec<u8>,
                     pos    : &mut usize)
    -> Result<Self, SerializationError> {
    Self::verify_fixed(stream, pos)?;
    let gtid      = parse_u32(stream, pos);
    let trig_word = parse_u32(stream, pos);
    Ok(Self::new(gtid, trig_word))
  }

  fn to_bytestream(&self) -> Vec<u8> {
    let mut stream = Vec::<u8>::with_capacity(Self::SIZE);
    push_u32(&mut stream, self.gtid);
    push_u32(&mut stream, self.trig_word);
    stream
  }
}

#[cfg(feature = "random")]
impl FromRandom for TriggerRecord {
  fn from_random() -> Self {
    let mut rng = rand::thread_rng();
    Self {
      gtid      : rng.gen::<u32>(),
      trig_word : rng.gen::<u32>(),
    }
  }
}

///////////////////////////////////////////////

/// A batch of trigger records collected during
/// one readout tick, in the order they were read
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MegaRecord {
  pub records : Vec<TriggerRecord>,
}

impl MegaRecord {
  pub fn new() -> Self {
    Self {
      records : Vec::<TriggerRecord>::new()
    }
  }

  pub fn with_capacity(capacity : usize) -> Self {
    Self {
      records : Vec::<TriggerRecord>::with_capacity(capacity)
    }
  }

  pub fn count(&self) -> u32 {
    self.records.len() as u32
  }

  pub fn is_empty(&self) -> bool {
    self.records.is_empty()
  }

  /// Payload size in bytes
  pub fn payload_size(&self) -> usize {
    4 + self.records.len() * TriggerRecord::SIZE
  }
}

impl fmt::Display for MegaRecord {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let mut repr = format!("<MegaRecord: {} records", self.records.len());
    if let (Some(first), Some(last)) = (self.records.first(), self.records.last()) {
      repr += &(format!(", GTID {} .. {}", first.gtid, last.gtid));
    }
    write!(f, "{}>", repr)
  }
}

impl Serialization for MegaRecord {

  fn from_bytestream(stream : &Vec<u8>,
                     pos    : &mut usize)
    -> Result<Self, SerializationError> {
    let count = try_parse_u32(stream, pos)? as usize;
    if count * TriggerRecord::SIZE > MAX_RECORD_LENGTH {
      return Err(SerializationError::RecordTooLarge(count * TriggerRecord::SIZE));
    }
    let mut mega = Self::with_capacity(count);
    for _ in 0..count {
      mega.records.push(TriggerRecord::from_bytestream(stream, pos)?);
    }
    Ok(mega)
  }

  fn to_bytestream(&self) -> Vec<u8> {
    let mut stream = Vec::<u8>::with_capacity(self.payload_size());
    push_u32(&mut stream, self.count());
    for rec in &self.records {
      stream.extend_from_slice(&rec.to_bytestream());
    }
    stream
  }
}

#[cfg(feature = "random")]
impl FromRandom for MegaRecord {
  fn from_random() -> Self {
    let mut rng = rand::thread_rng();
    let n_records = rng.gen_range(1..100);
    let start     = rng.gen::<u32>();
    let mut mega  = Self::with_capacity(n_records);
    for k in 0..n_records {
      mega.records.push(TriggerRecord::new(start.wrapping_add(k as u32), rng.gen::<u32>()));
    }
    mega
  }
}

///////////////////////////////////////////////

/// Liveness record, sent once per status tick
/// regardless of trigger activity
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct StatusRecord {
  pub clock        : u32,
  /// last GTID which was put into a batch
  pub last_gtid    : u32,
  /// GTID counter of the hardware right now
  pub current_gtid : u32,
  pub fifo_state   : u32,
}

impl StatusRecord {
  pub fn new() -> Self {
    Self {
      clock        : 0,
      last_gtid    : 0,
      current_gtid : 0,
      fifo_state   : 0,
    }
  }
}

impl fmt::Display for StatusRecord {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let mut repr = String::from("<StatusRecord:");
    repr += &(format!("\n  Clock        : {}", self.clock));
    repr += &(format!("\n  last GTID    : {}", self.last_gtid));
    repr += &(format!("\n  current GTID : {}", self.current_gtid));
    repr += &(format!("\n  FIFO state   : {:#x}>", self.fifo_state));
    write!(f, "{}", repr)
  }
}

impl Serialization for StatusRecord {
  const SIZE : usize = 16;

  fn from_bytestream(stream : &Vec<u8>,
                     pos    : &mut usize)
    -> Result<Self, SerializationError> {
    Self::verify_fixed(stream, pos)?;
    let mut status    = Self::new();
    status.clock        = parse_u32(stream, pos);
    status.last_gtid    = parse_u32(stream, pos);
    status.current_gtid = parse_u32(stream, pos);
    status.fifo_state   = parse_u32(stream, pos);
    Ok(status)
  }

  fn to_bytestream(&self) -> Vec<u8> {
    let mut stream = Vec::<u8>::with_capacity(Self::SIZE);
    push_u32(&mut stream, self.clock);
    push_u32(&mut stream, self.last_gtid);
    push_u32(&mut stream, self.current_gtid);
    push_u32(&mut stream, self.fifo_state);
    stream
  }
}

#[cfg(feature = "random")]
impl FromRandom for StatusRecord {
  fn from_random() -> Self {
    let mut rng = rand::thread_rng();
    Self {
      clock        : rng.gen_range(0..2),
      last_gtid    : rng.gen::<u32>(),
      current_gtid : rng.gen::<u32>(),
      fifo_state   : rng.gen::<u32>(),
    }
  }
}

///////////////////////////////////////////////

/// A complete record as it goes over the wire,
/// header included
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryRecord {
  Mega(MegaRecord),
  Status(StatusRecord),
}

impl TelemetryRecord {

  pub fn record_id(&self) -> u32 {
    match self {
      TelemetryRecord::Mega(_)   => MEGA_RECORD,
      TelemetryRecord::Status(_) => TUBII_STATUS,
    }
  }

  pub fn header(&self) -> GenericRecordHeader {
    let length = match self {
      TelemetryRecord::Mega(mega) => mega.payload_size(),
      TelemetryRecord::Status(_)  => StatusRecord::SIZE,
    };
    GenericRecordHeader::new(self.record_id(), length as u32)
  }
}

impl fmt::Display for TelemetryRecord {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      TelemetryRecord::Mega(mega)     => write!(f, "{}", mega),
      TelemetryRecord::Status(status) => write!(f, "{}", status),
    }
  }
}

impl From<MegaRecord> for TelemetryRecord {
  fn from(mega : MegaRecord) -> Self {
    TelemetryRecord::Mega(mega)
  }
}

impl From<StatusRecord> for TelemetryRecord {
  fn from(status : StatusRecord) -> Self {
    TelemetryRecord::Status(status)
  }
}

impl Serialization for TelemetryRecord {

  /// Decode header and payload. The position marker is
  /// left after the announced payload, even if the
  /// payload decoder consumed less.
  fn from_bytestream(stream : &Vec<u8>,
                     pos    : &mut usize)
    -> Result<Self, SerializationError> {
    let header = GenericRecordHeader::from_bytestream(stream, pos)?;
    if header.record_version != RECORD_VERSION {
      return Err(SerializationError::WrongRecordVersion(header.record_version));
    }
    let length = header.record_length as usize;
    if length > MAX_RECORD_LENGTH {
      return Err(SerializationError::RecordTooLarge(length));
    }
    if stream.len() < *pos + length {
      return Err(SerializationError::StreamTooShort);
    }
    let payload_start = *pos;
    let record = match header.record_id {
      MEGA_RECORD => {
        // the count must not reach past the announced payload
        let mut peek = *pos;
        let count = if length >= 4 {
          try_parse_u32(stream, &mut peek)? as usize
        } else {
          0
        };
        if length < 4 || count.checked_mul(TriggerRecord::SIZE).map(|n| n + 4) != Some(length) {
          error!("MegaRecord header announces {} bytes, but the payload holds {} triggers", length, count);
          return Err(SerializationError::WrongByteSize);
        }
        TelemetryRecord::Mega(MegaRecord::from_bytestream(stream, pos)?)
      },
      TUBII_STATUS => {
        if length != StatusRecord::SIZE {
          return Err(SerializationError::WrongByteSize);
        }
        TelemetryRecord::Status(StatusRecord::from_bytestream(stream, pos)?)
      },
      unknown => {
        *pos = payload_start + length;
        return Err(SerializationError::UnknownRecordId(unknown));
      }
    };
    *pos = payload_start + length;
    Ok(record)
  }

  fn to_bytestream(&self) -> Vec<u8> {
    let mut stream = self.header().to_bytestream();
    match self {
      TelemetryRecord::Mega(mega)     => stream.extend_from_slice(&mega.to_bytestream()),
      TelemetryRecord::Status(status) => stream.extend_from_slice(&status.to_bytestream()),
    }
    stream
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn mega_record_wire_layout() {
    let mut mega = MegaRecord::new();
    mega.records.push(TriggerRecord::new(5, 0xAB));
    mega.records.push(TriggerRecord::new(6, 0xCD));
    let bytes = TelemetryRecord::from(mega).to_bytestream();
    let expected : Vec<u8> = vec![
      0,0,0,0x0E,   // RecordID
      0,0,0,20,     // RecordLength : count + 2 records
      0,0,0,0,      // RecordVersion
      0,0,0,2,      // count
      0,0,0,5, 0,0,0,0xAB,
      0,0,0,6, 0,0,0,0xCD];
    assert_eq!(bytes, expected);
  }

  #[test]
  fn status_record_header() {
    let status = StatusRecord {
      clock        : 1,
      last_gtid    : 41,
      current_gtid : 42,
      fifo_state   : 0,
    };
    let header = TelemetryRecord::from(status).header();
    assert_eq!(header.record_id, TUBII_STATUS);
    assert_eq!(header.record_length, 16);
    assert_eq!(header.record_version, RECORD_VERSION);
  }

  #[test]
  fn corrupted_count_is_a_framing_error() {
    let mut mega = MegaRecord::new();
    mega.records.push(TriggerRecord::new(5, 0xAB));
    let mut bytes = TelemetryRecord::from(mega).to_bytestream();
    // claim 1000 triggers in a 12 byte payload
    bytes[12..16].copy_from_slice(&1000u32.to_be_bytes());
    let mut pos = 0usize;
    assert_eq!(TelemetryRecord::from_bytestream(&bytes, &mut pos),
               Err(SerializationError::WrongByteSize));
    // same with more bytes following, which must not be
    // mistaken for the rest of the record
    bytes.extend_from_slice(&[0u8; 64]);
    let mut pos = 0usize;
    assert_eq!(TelemetryRecord::from_bytestream(&bytes, &mut pos),
               Err(SerializationError::WrongByteSize));
  }

  #[test]
  fn unknown_record_id_is_skipped() {
    let mut bytes = GenericRecordHeader::new(0x42, 4).to_bytestream();
    bytes.extend_from_slice(&[1,2,3,4]);
    bytes.extend_from_slice(&TelemetryRecord::from(StatusRecord::new()).to_bytestream());
    let mut pos = 0usize;
    assert_eq!(TelemetryRecord::from_bytestream(&bytes, &mut pos),
               Err(SerializationError::UnknownRecordId(0x42)));
    assert_eq!(pos, 16);
    let next = TelemetryRecord::from_bytestream(&bytes, &mut pos).unwrap();
    assert_eq!(next, TelemetryRecord::Status(StatusRecord::new()));
  }

  #[test]
  fn wrong_version_is_refused() {
    let mut header = GenericRecordHeader::new(TUBII_STATUS, 16);
    header.record_version = 3;
    let mut bytes = header.to_bytestream();
    bytes.extend_from_slice(&StatusRecord::new().to_bytestream());
    let mut pos = 0usize;
    assert_eq!(TelemetryRecord::from_bytestream(&bytes, &mut pos),
               Err(SerializationError::WrongRecordVersion(3)));
  }

  #[test]
  fn truncated_payload() {
    let bytes = TelemetryRecord::from(StatusRecord::new()).to_bytestream();
    let mut pos = 0usize;
    assert_eq!(TelemetryRecord::from_bytestream(&bytes[..20].to_vec(), &mut pos),
               Err(SerializationError::StreamTooShort));
  }
}
