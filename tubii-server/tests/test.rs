use std::time::{
    Duration,
    Instant,
};

use log::Level;

use tubii_dataclasses::config::ConfigField;
use tubii_dataclasses::records::TelemetryRecord;
use tubii_dataclasses::serialization::Serialization;

use tubii_lib::TubiiSettings;
use tubii_lib::config_store::MemoryStore;
use tubii_lib::logging::forward_channel;
use tubii_lib::stream::{
    ConnectionState,
    MemoryConnector,
    TelemetryStreamClient,
    LogStreamClient,
};

use tubii_server::registers::*;
use tubii_server::commands::{
    Command,
    Reply,
};
use tubii_server::{
    DeviceModel,
    SimBus,
    TubiiServer,
};

type SimServer = TubiiServer<MemoryConnector, MemoryConnector, MemoryStore>;

/// A server on simulated registers, talking to an
/// in-memory data collector
fn sim_server(accept : bool, now : Instant) -> (SimServer, SimBus, MemoryConnector) {
  let mut bus  = SimBus::new();
  let device   = DeviceModel::map_all(&mut bus).unwrap();
  let settings = TubiiSettings::new();
  let data_peer = MemoryConnector::new(accept);
  let data = TelemetryStreamClient::new(data_peer.clone(),
                                        settings.reconnect_interval(),
                                        settings.max_pending_bytes);
  let mut server = TubiiServer::new(device, MemoryStore::new(), data, None, None, &settings, now);
  server.start(now);
  (server, bus, data_peer)
}

fn received_records(peer : &MemoryConnector) -> Vec<TelemetryRecord> {
  let bytes = peer.peer.borrow().received.clone();
  let mut pos     = 0usize;
  let mut records = Vec::<TelemetryRecord>::new();
  while pos < bytes.len() {
    records.push(TelemetryRecord::from_bytestream(&bytes, &mut pos).unwrap());
  }
  records
}

fn command(server : &mut SimServer, line : &str) -> Reply {
  server.handle_command(line, Instant::now())
}

#[test]
fn readout_ships_a_megarecord() {
  let now = Instant::now();
  let (mut server, bus, peer) = sim_server(true, now);
  let fifo = bus.window("fifo").unwrap();
  fifo.queue_reads(FIFO_TRIGWORD, &[0xA, 0xB, 0xC]);
  fifo.queue_reads(FIFO_GTID, &[1, 2, 3]);
  server.on_timers(now);
  let records = received_records(&peer);
  assert_eq!(records.len(), 1);
  match &records[0] {
    TelemetryRecord::Mega(mega) => {
      let gtids : Vec<u32> = mega.records.iter().map(|r| r.gtid).collect();
      let words : Vec<u32> = mega.records.iter().map(|r| r.trig_word).collect();
      assert_eq!(gtids, vec![1, 2, 3]);
      assert_eq!(words, vec![0xA, 0xB, 0xC]);
    }
    other => panic!("Expected a MegaRecord, got {}", other),
  }
}

#[test]
fn status_follows_the_readout() {
  let now = Instant::now();
  let (mut server, bus, peer) = sim_server(true, now);
  let fifo = bus.window("fifo").unwrap();
  fifo.queue_reads(FIFO_TRIGWORD, &[0x1, 0x2]);
  fifo.queue_reads(FIFO_GTID, &[41, 42]);
  server.on_timers(now);
  // nothing new in the FIFO, only the status goes out
  server.on_timers(now + Duration::from_millis(1000));
  let records = received_records(&peer);
  assert_eq!(records.len(), 2);
  match &records[1] {
    TelemetryRecord::Status(status) => {
      assert_eq!(status.last_gtid, 42);
      assert_eq!(status.clock, 0);
    }
    other => panic!("Expected a StatusRecord, got {}", other),
  }
}

#[test]
fn rate_mode_latches_counters_on_status() {
  let now = Instant::now();
  let (mut server, bus, _peer) = sim_server(true, now);
  assert_eq!(command(&mut server, "countMode 1"), Reply::ok());
  let counters = bus.window("counters").unwrap();
  counters.clear_log();
  server.on_timers(now + Duration::from_millis(1000));
  assert_eq!(counters.writes(), vec![(COUNTER_LATCH, 1), (COUNTER_LATCH, 0)]);
}

#[test]
fn stopped_readout_leaves_the_fifo_alone() {
  let now = Instant::now();
  let (mut server, bus, peer) = sim_server(true, now);
  assert_eq!(command(&mut server, "stopReadout"), Reply::ok());
  let fifo = bus.window("fifo").unwrap();
  fifo.queue_reads(FIFO_TRIGWORD, &[0x7]);
  fifo.queue_reads(FIFO_GTID, &[100]);
  fifo.clear_log();
  server.on_timers(now);
  assert!(fifo.accesses().is_empty());
  assert!(peer.peer.borrow().received.is_empty());
  assert_eq!(command(&mut server, "startReadout"), Reply::ok());
  server.on_timers(now + Duration::from_millis(1000));
  let records = received_records(&peer);
  assert!(matches!(&records[0], TelemetryRecord::Mega(mega) if mega.records[0].gtid == 100));
}

#[test]
fn records_are_dropped_while_disconnected() {
  let now = Instant::now();
  let (mut server, bus, peer) = sim_server(false, now);
  let fifo = bus.window("fifo").unwrap();
  fifo.queue_reads(FIFO_TRIGWORD, &[0x1]);
  fifo.queue_reads(FIFO_GTID, &[5]);
  server.on_timers(now);
  assert_eq!(server.data.client.stats.dropped, 1);
  peer.peer.borrow_mut().accept = true;
  server.poll_streams(now + Duration::from_secs(10));
  assert!(server.data.client.is_connected());
  // the dropped batch is not replayed
  assert!(peer.peer.borrow().received.is_empty());
}

#[test]
fn deadline_follows_the_timers() {
  let now = Instant::now();
  let (mut server, _bus, _peer) = sim_server(true, now);
  assert_eq!(server.next_deadline(now), Duration::ZERO);
  server.on_timers(now);
  assert_eq!(server.next_deadline(now), Duration::from_millis(1));
}

#[test]
fn handshake_in_progress_keeps_the_loop_awake() {
  let now = Instant::now();
  let mut bus  = SimBus::new();
  let device   = DeviceModel::map_all(&mut bus).unwrap();
  let settings = TubiiSettings::new();
  let data_peer = MemoryConnector::new(true);
  data_peer.peer.borrow_mut().slow_accept = true;
  let data = TelemetryStreamClient::new(data_peer.clone(),
                                        settings.reconnect_interval(),
                                        settings.max_pending_bytes);
  let mut server = TubiiServer::new(device, MemoryStore::new(), data, None, None, &settings, now);
  server.start(now);
  assert_eq!(command(&mut server, "stopReadout"), Reply::ok());
  server.on_timers(now);
  assert_eq!(server.data.client.state(), ConnectionState::Connecting);
  assert_eq!(server.next_deadline(now), Duration::from_millis(1));
  data_peer.peer.borrow_mut().slow_accept = false;
  server.poll_streams(now);
  assert!(server.data.client.is_connected());
  assert_eq!(server.next_deadline(now), Duration::from_millis(1000));
}

#[test]
fn forwarded_log_lines_reach_the_log_server() {
  let now = Instant::now();
  let mut bus  = SimBus::new();
  let device   = DeviceModel::map_all(&mut bus).unwrap();
  let settings = TubiiSettings::new();
  let (forward, lines) = forward_channel(&settings.log_name, 2);
  let log_peer = MemoryConnector::new(true);
  let log  = LogStreamClient::new(log_peer.clone(), settings.reconnect_interval(), 1024);
  let data = TelemetryStreamClient::new(MemoryConnector::new(true), settings.reconnect_interval(), 1024);
  let mut server = TubiiServer::new(device, MemoryStore::new(), data, Some(log), Some(lines), &settings, now);
  server.start(now);
  forward.forward(Level::Warn, &format_args!("clock lost"));
  forward.forward(Level::Info, &format_args!("readout started"));
  forward.forward(Level::Info, &format_args!("does not fit"));
  server.pump_logs(now);
  let received = String::from_utf8(log_peer.peer.borrow().received.clone()).unwrap();
  assert_eq!(received, "tubii: WARNING clock lost\n\
                        tubii: NOTICE readout started\n\
                        tubii: WARNING skipped 1 log messages\n");
}

///////////////////////////////////////////////

/// The command followed by n arguments
fn with_args(cmd : &Command, n : usize) -> String {
  let mut line = String::from(cmd.name());
  for _ in 0..n {
    line += " 7";
  }
  line
}

#[test]
fn every_command_checks_arity_before_touching_hardware() {
  let (mut server, bus, _peer) = sim_server(true, Instant::now());
  bus.clear_logs();
  let mut n_sent = 0u64;
  for cmd in Command::ALL {
    let n_args = cmd.arity() - 1;
    let mut lines = vec![with_args(&cmd, n_args + 1)];
    if n_args > 0 {
      lines.push(with_args(&cmd, n_args - 1));
    }
    if n_args > 1 {
      // the bare name
      lines.push(with_args(&cmd, 0));
    }
    for line in lines {
      let reply = command(&mut server, &line);
      assert!(reply.is_error(), "{} -> {}", line, reply);
      assert!(reply.to_string().contains("arguments"), "{}", reply);
      n_sent += 1;
    }
  }
  assert_eq!(bus.n_accesses(), 0);
  assert_eq!(server.dispatcher.n_errors, n_sent);
}

#[test]
fn malformed_arguments_are_refused() {
  let (mut server, bus, _peer) = sim_server(true, Instant::now());
  bus.clear_logs();
  let reply = command(&mut server, "setGenericDelay 1.5ns");
  assert_eq!(reply.to_string(), "-setGenericDelay: argument 1 '1.5ns' is invalid (not a number)");
  let reply = command(&mut server, "setTriggerMask 12abc");
  assert!(reply.is_error());
  let reply = command(&mut server, "setTriggerMask -1");
  assert!(reply.is_error());
  assert_eq!(bus.n_accesses(), 0);
  assert_eq!(command(&mut server, "bogus").to_string(), "-unknown command 'bogus'");
  assert!(command(&mut server, "").is_error());
}

#[test]
fn basic_commands() {
  let (mut server, bus, _peer) = sim_server(true, Instant::now());
  assert_eq!(command(&mut server, "ping"), Reply::Status(String::from("PING")));
  assert_eq!(command(&mut server, "initialise"), Reply::ok());
  assert_eq!(command(&mut server, "setTriggerMask 0x10"), Reply::ok());
  assert_eq!(command(&mut server, "getTriggerMask"), Reply::Integer(16));
  assert_eq!(command(&mut server, "setCounterMask 010"), Reply::ok());
  assert_eq!(command(&mut server, "getCounterMask"), Reply::Integer(8));
  assert_eq!(command(&mut server, "getControlReg"), Reply::Integer(58));
  assert_eq!(command(&mut server, "setECalBit 1"), Reply::ok());
  assert_eq!(command(&mut server, "getControlReg"), Reply::Integer(62));
  assert!(command(&mut server, "setECalBit 2").is_error());
  assert_eq!(command(&mut server, "setGTDelays 10 20"), Reply::ok());
  assert_eq!(command(&mut server, "getLODelay"), Reply::Integer(10));
  assert_eq!(command(&mut server, "getDGTDelay"), Reply::Integer(20));
  assert_eq!(command(&mut server, "gtdelay 150"), Reply::ok());
  assert_eq!(command(&mut server, "getGTDelay"), Reply::Integer(15));
  assert_eq!(command(&mut server, "setTellieDelay 100"), Reply::ok());
  assert_eq!(command(&mut server, "getTellieDelay"), Reply::Integer(10));
  assert_eq!(command(&mut server, "getGenericDelay"), Reply::Integer(0));
  bus.window("gtid").unwrap().poke(GTID_CURRENT, 777);
  assert_eq!(command(&mut server, "getCurrentGTID"), Reply::Integer(777));
  assert_eq!(command(&mut server, "softGT"), Reply::ok());
  assert_eq!(bus.window("gtid").unwrap().writes(), vec![(SOFT_GT, 1), (SOFT_GT, 0)]);
}

#[test]
fn clock_reset_is_idempotent() {
  let (mut server, bus, _peer) = sim_server(true, Instant::now());
  let clocks = bus.window("clocks").unwrap();
  assert_eq!(command(&mut server, "clockReset 0"), Reply::ok());
  assert_eq!(command(&mut server, "clockReset 0"), Reply::ok());
  assert_eq!(clocks.writes(), vec![(CLOCK_RESET, 0), (CLOCK_RESET, 0)]);
  assert!(command(&mut server, "clockReset 2").is_error());
  assert_eq!(clocks.writes().len(), 2);
}

#[test]
fn pulser_readback() {
  let (mut server, bus, _peer) = sim_server(true, Instant::now());
  assert_eq!(command(&mut server, "setGenericPulser 1000 0.5 10"), Reply::ok());
  assert_eq!(command(&mut server, "getGenericRate"), Reply::Integer(1000));
  assert_eq!(command(&mut server, "getGenericPulseWidth"), Reply::Integer(500_000));
  assert_eq!(command(&mut server, "getGenericNPulses"), Reply::Integer(10));
  let pulser = bus.window("tellie_pulser").unwrap();
  assert!(command(&mut server, "setTelliePulser 0 0.5 10").is_error());
  assert!(command(&mut server, "setTelliePulser 100 1.5 10").is_error());
  assert!(pulser.writes().is_empty());
}

#[test]
fn meta_trigger_errors() {
  let (mut server, bus, _peer) = sim_server(true, Instant::now());
  assert_eq!(command(&mut server, "trigBurst 10 3"), Reply::ok());
  let reply = command(&mut server, "trigBurst 10 32");
  assert!(reply.to_string().starts_with("-invalid argument"), "{}", reply);
  bus.window("prescale").unwrap().poke(META_ERROR, 1);
  let reply = command(&mut server, "trigPrescale 4 2");
  assert!(reply.to_string().starts_with("-hardware rejected"), "{}", reply);
  assert!(command(&mut server, "trigPrescale 0.2 2").is_error());
}

#[test]
fn save_and_load_config() {
  let (mut server, bus, _peer) = sim_server(true, Instant::now());
  assert_eq!(command(&mut server, "initialise"), Reply::ok());
  let saved_setup = [
    "setControlReg 0x3E",
    "setTriggerMask 0x10",
    "setSpeakerMask 0x20",
    "setCounterMask 0x30",
    "setCAENWords 0x41 0x42",
    "setGTDelays 51 52",
    "setDACThreshold 2000",
    "trigCombo 0x3 0x1",
    "countMode 1",
    "trigPrescale 4 2",
    "trigBurst 100 3",
  ];
  for line in saved_setup {
    assert_eq!(command(&mut server, line), Reply::ok(), "{}", line);
  }
  let clocks = bus.window("clocks").unwrap();
  clocks.poke(CLOCK_STATUS, 1);
  let saved = server.device.snapshot();
  assert_eq!(command(&mut server, "saveConfig"), Reply::Integer(1));

  let other_setup = [
    "setControlReg 0x3A",
    "setTriggerMask 5",
    "setSpeakerMask 0",
    "setCounterMask 0",
    "setCAENWords 0 0",
    "setGTDelays 0 0",
    "setDACThreshold 0",
    "trigCombo 0 0",
    "countMode 0",
    "trigPrescale 9 7",
    "trigBurst 5 8",
  ];
  for line in other_setup {
    assert_eq!(command(&mut server, line), Reply::ok(), "{}", line);
  }
  clocks.poke(CLOCK_STATUS, 0);
  let changed = server.device.snapshot();
  let writable : Vec<ConfigField> = ConfigField::ALL.iter()
    .copied()
    .filter(|field| !field.is_read_only())
    .collect();
  assert_eq!(writable.len(), 16);
  for field in &writable {
    assert_ne!(changed.get(*field), saved.get(*field), "{} was not changed", field);
  }

  clocks.clear_log();
  assert_eq!(command(&mut server, "loadConfig 1"), Reply::ok());
  let restored = server.device.snapshot();
  for field in &writable {
    assert_eq!(restored.get(*field), saved.get(*field), "{} was not restored", field);
  }
  // the clock status is never written back
  assert_eq!(restored.get(ConfigField::ClockStatus), Some(0));
  assert!(clocks.writes().is_empty());
  let reply = command(&mut server, "loadConfig 99");
  assert!(reply.to_string().starts_with("-config store"), "{}", reply);
}

#[test]
fn manual_fifo_readout_ships_a_megarecord() {
  let now = Instant::now();
  let (mut server, bus, peer) = sim_server(true, now);
  let fifo = bus.window("fifo").unwrap();
  fifo.queue_reads(FIFO_TRIGWORD, &[0x5, 0x6]);
  fifo.queue_reads(FIFO_GTID, &[20, 21]);
  assert_eq!(command(&mut server, "GetFifoTrigger"), Reply::ok());
  let records = received_records(&peer);
  assert_eq!(records.len(), 1);
  match &records[0] {
    TelemetryRecord::Mega(mega) => {
      let gtids : Vec<u32> = mega.records.iter().map(|r| r.gtid).collect();
      assert_eq!(gtids, vec![20, 21]);
    }
    other => panic!("Expected a MegaRecord, got {}", other),
  }
  assert_eq!(server.engine.last_gtid(), 21);
  // nothing new, nothing shipped
  assert_eq!(command(&mut server, "GetFifoTrigger"), Reply::ok());
  assert_eq!(received_records(&peer).len(), 1);
}

#[test]
fn raw_shift_register_commands() {
  let (mut server, bus, _peer) = sim_server(true, Instant::now());
  let regs = bus.window("shift_regs").unwrap();
  regs.clear_log();
  assert_eq!(command(&mut server, "muxer 5"), Reply::ok());
  assert_eq!(command(&mut server, "muxenable 1"), Reply::ok());
  assert_eq!(command(&mut server, "loadShift 0x3A"), Reply::ok());
  assert_eq!(command(&mut server, "dataready 1"), Reply::ok());
  assert_eq!(regs.writes(), vec![(MUX_SELECT, 5), (MUX_ENABLE, 1),
                                 (SHIFT_LOAD, 0x3A), (SHIFT_DATA_READY, 1)]);
  let reply = command(&mut server, "muxer 8");
  assert!(reply.to_string().starts_with("-invalid argument"), "{}", reply);
  assert!(command(&mut server, "muxenable 2").is_error());
  assert_eq!(regs.writes().len(), 4);
}
