//! tubii-server - control and trigger readout for TUBii
//!
//! Runs on the board itself. Maps the register windows,
//! runs the power-on sequence and then serves commands
//! on a ZMQ REP socket while draining the trigger FIFO
//! to the data server.

#[macro_use] extern crate log;

use std::process::exit;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Instant;

use clap::{
    Parser,
    ArgAction,
};
use signal_hook::consts::{
    SIGINT,
    SIGTERM,
};

use tubii_lib::{
    TubiiSettings,
    LogOptions,
    init_logger,
    TcpConnector,
    TelemetryStreamClient,
    LogStreamClient,
    JsonFileStore,
};
use tubii_lib::constants::LOG_FORWARD_CAPACITY;
use tubii_lib::logging::{
    forward_channel,
    level_from_verbosity,
};

use tubii_server::{
    DeviceModel,
    DevMemBus,
    SimBus,
    TubiiServer,
};
use tubii_server::server::run;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct TubiiArgs {
  /// Host of the log server
  #[arg(long)]
  log_server   : Option<String>,
  /// Host of the data server
  #[arg(long)]
  data_server  : Option<String>,
  /// Append the log to this file instead
  /// of writing it to stderr
  #[arg(long)]
  logfile      : Option<String>,
  /// More output, can be given twice
  #[arg(short, long, action = ArgAction::Count)]
  verbose      : u8,
  /// Less output, can be given twice
  #[arg(short, long, action = ArgAction::Count)]
  quiet        : u8,
  /// Settings file (.toml)
  #[arg(short, long)]
  config       : Option<String>,
  /// Run against simulated registers instead of /dev/mem
  #[arg(long, default_value_t = false)]
  simulate     : bool,
  /// Write the default settings to this file and exit
  #[arg(long)]
  write_config : Option<String>,
}

fn main() {
  let args = TubiiArgs::parse();

  if let Some(path) = args.write_config {
    let settings = TubiiSettings::new();
    match settings.to_toml(path.clone()) {
      Err(err) => {
        eprintln!("Unable to write settings to {}! {}", path, err);
        exit(1);
      }
      Ok(_) => {
        println!("=> Wrote default settings to {}", path);
        exit(0);
      }
    }
  }

  let mut settings = match &args.config {
    None => TubiiSettings::new(),
    Some(path) => {
      match TubiiSettings::from_toml(path) {
        Err(err) => {
          eprintln!("CRITICAL! Unable to parse .toml settings file {}! {}", path, err);
          exit(1);
        }
        Ok(settings) => settings
      }
    }
  };
  if let Some(host) = args.log_server {
    settings.log_host = host;
  }
  if let Some(host) = args.data_server {
    settings.data_host = host;
  }

  let (forward, forwarded) = forward_channel(&settings.log_name, LOG_FORWARD_CAPACITY);
  let log_options = LogOptions {
    level   : level_from_verbosity(args.verbose, args.quiet),
    logfile : args.logfile,
    forward : Some(forward),
  };
  if let Err(err) = init_logger(log_options) {
    eprintln!("CRITICAL! Unable to set up logging! {}", err);
    exit(1);
  }
  info!("Starting tubii-server with settings\n{}", settings);

  let mapped = if args.simulate {
    warn!("Running against simulated registers, no hardware will be touched!");
    DeviceModel::map_all(&mut SimBus::new())
  } else {
    DeviceModel::map_all(&mut DevMemBus::new(&settings.mem_device))
  };
  let mut device = match mapped {
    Err(err) => {
      error!("CRITICAL! Unable to map the TUBii registers! {}", err);
      exit(1);
    }
    Ok(device) => device
  };
  let report = device.initialise();
  if !report.is_clean() {
    error!("TUBii initialisation incomplete! {}", report);
  }

  let store = JsonFileStore::new(&settings.config_store_dir);
  let data  = TelemetryStreamClient::new(
    TcpConnector::new(&settings.data_host, settings.data_port, settings.connect_timeout()),
    settings.reconnect_interval(),
    settings.max_pending_bytes);
  let log   = LogStreamClient::new(
    TcpConnector::new(&settings.log_host, settings.log_port, settings.connect_timeout()),
    settings.reconnect_interval(),
    settings.max_pending_bytes);
  let mut server = TubiiServer::new(device, store, data, Some(log), Some(forwarded),
                                    &settings, Instant::now());

  let ctx = zmq::Context::new();
  let socket = match ctx.socket(zmq::REP) {
    Err(err) => {
      error!("CRITICAL! Unable to create 0MQ REP socket! {}", err);
      exit(1);
    }
    Ok(socket) => socket
  };
  let address = settings.command_address();
  if let Err(err) = socket.bind(&address) {
    error!("CRITICAL! Unable to bind command socket to {}! {}", address, err);
    exit(1);
  }
  info!("Listening for commands on {}", address);

  let stop = Arc::new(AtomicBool::new(false));
  for signal in [SIGINT, SIGTERM] {
    if let Err(err) = signal_hook::flag::register(signal, Arc::clone(&stop)) {
      error!("CRITICAL! Unable to register handler for signal {}! {}", signal, err);
      exit(1);
    }
  }

  if let Err(err) = run(&mut server, &socket, &stop) {
    error!("Event loop failed! {}", err);
    exit(1);
  }
  info!("tubii-server stopped");
}

#[cfg(test)]
mod tests {
  use super::*;
  use clap::CommandFactory;

  #[test]
  fn arguments_are_consistent() {
    TubiiArgs::command().debug_assert();
  }
}
