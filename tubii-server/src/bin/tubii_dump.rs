//! tubii-dump - a stand-in for the data server
//!
//! Listens for the telemetry stream of tubii-server
//! and prints every record it receives. Meant for
//! bench tests, when there is no data server around.

#[macro_use] extern crate log;

use std::io::Read;
use std::net::{
    TcpListener,
    TcpStream,
};
use std::process::exit;

use clap::Parser;
use colored::Colorize;

use tubii_dataclasses::records::TelemetryRecord;
use tubii_dataclasses::serialization::Serialization;
use tubii_dataclasses::errors::SerializationError;

use tubii_lib::{
    init_logger,
    LogOptions,
};
use tubii_lib::constants::DATA_SERVER_PORT;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct DumpArgs {
  /// Port to listen on
  #[arg(short, long, default_value_t = DATA_SERVER_PORT)]
  port    : u16,
  /// Only print a summary line per record
  #[arg(long, default_value_t = false)]
  summary : bool,
}

/// Counts over one connection
#[derive(Debug, Default)]
struct DumpStats {
  n_mega     : usize,
  n_status   : usize,
  n_triggers : usize,
}

fn print_record(record : &TelemetryRecord, summary : bool, stats : &mut DumpStats) {
  let stamp = chrono::Local::now().format("%H:%M:%S%.3f").to_string();
  match record {
    TelemetryRecord::Mega(mega) => {
      stats.n_mega     += 1;
      stats.n_triggers += mega.records.len();
      let first = mega.records.first().map(|r| r.gtid).unwrap_or(0);
      let last  = mega.records.last().map(|r| r.gtid).unwrap_or(0);
      println!("{} {} {} triggers, GTID {} to {}",
               stamp, "MEGA".green().bold(), mega.count(), first, last);
      if !summary {
        for trigger in &mega.records {
          println!("    {}", trigger);
        }
      }
    }
    TelemetryRecord::Status(status) => {
      stats.n_status += 1;
      if summary {
        println!("{} {} clock {} last GTID {} current GTID {}",
                 stamp, "STATUS".blue().bold(), status.clock, status.last_gtid, status.current_gtid);
      } else {
        println!("{} {} {}", stamp, "STATUS".blue().bold(), status);
      }
    }
  }
}

/// Decode everything complete in the buffer and remove
/// it. Returns false if the stream can not be framed
/// any more.
fn decode_buffered(buffer : &mut Vec<u8>, summary : bool, stats : &mut DumpStats) -> bool {
  let mut pos = 0usize;
  loop {
    let start = pos;
    match TelemetryRecord::from_bytestream(buffer, &mut pos) {
      Ok(record) => print_record(&record, summary, stats),
      Err(SerializationError::StreamTooShort) => {
        pos = start;
        break;
      }
      Err(SerializationError::UnknownRecordId(id)) => {
        println!("{} record with unknown id {:#x}", "SKIP".yellow().bold(), id);
      }
      Err(err) => {
        error!("Lost framing of the telemetry stream! {}", err);
        return false;
      }
    }
  }
  buffer.drain(..pos);
  true
}

fn dump_connection(mut stream : TcpStream, summary : bool) {
  let peer = stream.peer_addr().map(|a| a.to_string()).unwrap_or(String::from("<unknown>"));
  info!("Connection from {}", peer);
  let mut stats  = DumpStats::default();
  let mut buffer = Vec::<u8>::new();
  let mut chunk  = [0u8; 65536];
  loop {
    match stream.read(&mut chunk) {
      Ok(0) => break,
      Ok(nbytes) => {
        buffer.extend_from_slice(&chunk[..nbytes]);
        if !decode_buffered(&mut buffer, summary, &mut stats) {
          break;
        }
      }
      Err(err) => {
        warn!("Reading from {} failed! {}", peer, err);
        break;
      }
    }
  }
  info!("{} disconnected after {} MegaRecords ({} triggers) and {} status records",
        peer, stats.n_mega, stats.n_triggers, stats.n_status);
}

fn main() {
  let args = DumpArgs::parse();
  if let Err(err) = init_logger(LogOptions::new()) {
    eprintln!("Unable to set up logging! {}", err);
    exit(1);
  }
  let listener = match TcpListener::bind(("0.0.0.0", args.port)) {
    Err(err) => {
      error!("Unable to listen on port {}! {}", args.port, err);
      exit(1);
    }
    Ok(listener) => listener
  };
  info!("Waiting for telemetry on port {}", args.port);
  for incoming in listener.incoming() {
    match incoming {
      Err(err)   => warn!("Failed to accept connection! {}", err),
      Ok(stream) => dump_connection(stream, args.summary),
    }
  }
}
