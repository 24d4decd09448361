//! Serialization/Deserialization helpers
//!
//! All TUBii telemetry goes out in network byte
//! order (big endian), so unlike the helpers of
//! most other daq software, these parse big endian
//! words.

pub use crate::errors::SerializationError;

/// Get an u32 from a big endian bytestream and
/// move on the position marker
///
/// # Arguments
///
/// * bs  : the bytestream
/// * pos : position of the first byte, will be advanced by 4
pub fn parse_u32(bs : &Vec::<u8>, pos : &mut usize) -> u32 {
  let value = u32::from_be_bytes([bs[*pos], bs[*pos+1], bs[*pos+2], bs[*pos+3]]);
  *pos += 4;
  value
}

/// Same as parse_u32, but fails gracefully when the
/// stream ends before the word does
pub fn try_parse_u32(bs : &Vec::<u8>, pos : &mut usize) -> Result<u32, SerializationError> {
  if bs.len() < *pos + 4 {
    return Err(SerializationError::StreamTooShort);
  }
  Ok(parse_u32(bs, pos))
}

/// Append an u32 in network byte order
pub fn push_u32(stream : &mut Vec<u8>, value : u32) {
  stream.extend_from_slice(&value.to_be_bytes());
}

/// Encoding and decoding of wire records
///
/// Records have no head/tail markers, they are
/// framed by the GenericRecordHeader.
pub trait Serialization {

  /// The size of the serialized representation in
  /// bytes. 0 for variable sized structs.
  const SIZE : usize = 0;

  /// Make sure there are at least SIZE bytes
  /// left in the stream after pos
  fn verify_fixed(stream : &Vec<u8>,
                  pos    : &usize) -> Result<(), SerializationError> {
    if stream.len() < *pos + Self::SIZE {
      return Err(SerializationError::StreamTooShort);
    }
    Ok(())
  }

  /// Decode a serializable from a bytestream
  fn from_bytestream(bytestream : &Vec<u8>,
                     pos        : &mut usize)
    -> Result<Self, SerializationError>
    where Self : Sized;

  /// Encode a serializable to a bytestream
  fn to_bytestream(&self) -> Vec<u8>;
}
