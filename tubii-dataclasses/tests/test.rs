use tubii_dataclasses::FromRandom;
use tubii_dataclasses::serialization::Serialization;
use tubii_dataclasses::records::{
    MegaRecord,
    StatusRecord,
    TelemetryRecord,
    GenericRecordHeader,
    MEGA_RECORD,
};

#[test]
fn serialization_megarecord() {
  for _ in 0..100 {
    let mega   = MegaRecord::from_random();
    let record = TelemetryRecord::from(mega.clone());
    let bytes  = record.to_bytestream();
    assert_eq!(bytes.len(), GenericRecordHeader::SIZE + 4 + 8*mega.records.len());
    let mut pos = 0usize;
    let header = GenericRecordHeader::from_bytestream(&bytes, &mut pos).unwrap();
    assert_eq!(header.record_id, MEGA_RECORD);
    assert_eq!(header.record_length as usize, bytes.len() - GenericRecordHeader::SIZE);
    let mut pos = 0usize;
    assert_eq!(TelemetryRecord::from_bytestream(&bytes, &mut pos).unwrap(), record);
    assert_eq!(pos, bytes.len());
  }
}

#[test]
fn serialization_statusrecord() {
  for _ in 0..100 {
    let status = StatusRecord::from_random();
    let bytes  = TelemetryRecord::from(status).to_bytestream();
    let mut pos = 0usize;
    let test   = TelemetryRecord::from_bytestream(&bytes, &mut pos).unwrap();
    assert_eq!(test, TelemetryRecord::Status(status));
  }
}

#[test]
fn concatenated_records_decode_in_order() {
  let first  = TelemetryRecord::from(MegaRecord::from_random());
  let second = TelemetryRecord::from(StatusRecord::from_random());
  let mut bytes = first.to_bytestream();
  bytes.extend_from_slice(&second.to_bytestream());
  let mut pos = 0usize;
  assert_eq!(TelemetryRecord::from_bytestream(&bytes, &mut pos).unwrap(), first);
  assert_eq!(TelemetryRecord::from_bytestream(&bytes, &mut pos).unwrap(), second);
  assert_eq!(pos, bytes.len());
}
