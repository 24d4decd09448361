//! The event loop of the TUBii server
//!
//! Everything runs on one thread. The loop waits on the
//! command socket until the next timer is due, then
//!
//! * answers queued commands, one reply each
//! * drains the trigger FIFO (readout tick)
//! * sends a status record (status tick)
//! * drives the collector streams and forwards log lines
//!
//! Since nothing else touches the device, no locking
//! is needed.

use std::time::{
    Duration,
    Instant,
};
use std::sync::atomic::{
    AtomicBool,
    Ordering,
};

use tubii_dataclasses::records::TelemetryRecord;

use tubii_lib::TubiiSettings;
use tubii_lib::config_store::ConfigStore;
use tubii_lib::logging::ForwardedLines;
use tubii_lib::stream::{
    Connector,
    TelemetryStreamClient,
    LogStreamClient,
};

use crate::device::DeviceModel;
use crate::readout::FifoReadoutEngine;
use crate::commands::{
    CommandDispatcher,
    ManualReadout,
    Reply,
};

/// Wait at most this long for commands, even if
/// no timer is due
const MAX_POLL_MS : u64 = 1000;

/// Lends the readout engine and the data stream
/// to a command for a single FIFO drain
struct FifoDrain<'a, D : Connector> {
  engine : &'a mut FifoReadoutEngine,
  data   : &'a mut TelemetryStreamClient<D>,
  now    : Instant,
}

impl<D : Connector> ManualReadout for FifoDrain<'_, D> {
  fn read_fifo_once(&mut self, device : &mut DeviceModel) -> usize {
    let report = self.engine.tick(&mut device.fifo);
    match report.batch {
      None        => 0,
      Some(batch) => {
        let n_new = batch.records.len();
        self.data.send_record(&TelemetryRecord::from(batch), self.now);
        n_new
      }
    }
  }
}

pub struct TubiiServer<D : Connector, L : Connector, S : ConfigStore> {
  pub device        : DeviceModel,
  pub dispatcher    : CommandDispatcher<S>,
  pub engine        : FifoReadoutEngine,
  pub data          : TelemetryStreamClient<D>,
  pub log           : Option<LogStreamClient<L>>,
  forwarded         : Option<ForwardedLines>,
  log_name          : String,
  readout_interval  : Duration,
  /// readout is checked this often while
  /// it is disabled
  idle_interval     : Duration,
  status_interval   : Duration,
  next_readout      : Instant,
  next_status       : Instant,
}

impl<D : Connector, L : Connector, S : ConfigStore> TubiiServer<D, L, S> {

  /// Assemble the server. The device has to be mapped
  /// (and usually initialised) already.
  pub fn new(mut device : DeviceModel,
             store      : S,
             data       : TelemetryStreamClient<D>,
             log        : Option<LogStreamClient<L>>,
             forwarded  : Option<ForwardedLines>,
             settings   : &TubiiSettings,
             now        : Instant) -> Self {
    device.set_readout_enabled(settings.readout_on_start);
    Self {
      device,
      dispatcher       : CommandDispatcher::new(store),
      engine           : FifoReadoutEngine::new(settings.fifo_read_budget, settings.batch_capacity),
      data,
      log,
      forwarded,
      log_name         : settings.log_name.clone(),
      readout_interval : settings.readout_interval(),
      idle_interval    : settings.status_interval(),
      status_interval  : settings.status_interval(),
      next_readout     : now,
      next_status      : now + settings.status_interval(),
    }
  }

  /// First connection attempts of the collector streams
  pub fn start(&mut self, now : Instant) {
    if let Some(log) = self.log.as_mut() {
      log.client.start(now);
    }
    self.data.client.start(now);
  }

  pub fn handle_command(&mut self, line : &str, now : Instant) -> Reply {
    let mut drain = FifoDrain {
      engine : &mut self.engine,
      data   : &mut self.data,
      now,
    };
    self.dispatcher.dispatch(&mut self.device, &mut drain, line)
  }

  fn readout_tick(&mut self, now : Instant) {
    if !self.device.readout_enabled() {
      self.next_readout = now + self.idle_interval;
      return;
    }
    let report = self.engine.tick(&mut self.device.fifo);
    if let Some(batch) = report.batch {
      let record = TelemetryRecord::from(batch);
      self.data.send_record(&record, now);
    }
    self.next_readout = now + self.readout_interval;
  }

  fn status_tick(&mut self, now : Instant) {
    let status = self.engine.status(&mut self.device);
    trace!("{}", status);
    self.data.send_record(&TelemetryRecord::from(status), now);
    self.next_status = now + self.status_interval;
  }

  /// Run the readout and status ticks which are due
  pub fn on_timers(&mut self, now : Instant) {
    if now >= self.next_readout {
      self.readout_tick(now);
    }
    if now >= self.next_status {
      self.status_tick(now);
    }
  }

  /// Move forwarded log lines to the log stream
  pub fn pump_logs(&mut self, now : Instant) {
    let lines = match self.forwarded.as_ref() {
      None        => return,
      Some(lines) => lines
    };
    let queued  = lines.drain();
    let skipped = lines.take_skipped();
    // without a log stream the lines only go to the local log
    if let Some(log) = self.log.as_mut() {
      for line in queued {
        log.send_line(&line, now);
      }
      if skipped > 0 {
        let notice = format!("{}: WARNING skipped {} log messages\n", self.log_name, skipped);
        log.send_line(&notice, now);
      }
    }
  }

  /// Reconnect and flush the collector streams
  pub fn poll_streams(&mut self, now : Instant) {
    self.data.client.poll(now);
    if let Some(log) = self.log.as_mut() {
      log.client.poll(now);
    }
  }

  /// How long the loop may wait for commands
  pub fn next_deadline(&self, now : Instant) -> Duration {
    let mut deadline = self.next_readout.min(self.next_status);
    if let Some(due) = self.data.client.next_attempt() {
      deadline = deadline.min(due);
    }
    let mut busy = self.data.client.needs_service();
    if let Some(log) = self.log.as_ref() {
      if let Some(due) = log.client.next_attempt() {
        deadline = deadline.min(due);
      }
      busy |= log.client.needs_service();
    }
    // pending bytes and running handshakes are
    // checked on the readout cadence
    if busy {
      deadline = deadline.min(now + self.readout_interval);
    }
    deadline
      .saturating_duration_since(now)
      .min(Duration::from_millis(MAX_POLL_MS))
  }

  /// One pass over everything which is due
  pub fn service(&mut self, now : Instant) {
    self.on_timers(now);
    self.poll_streams(now);
    self.pump_logs(now);
  }
}

/// Answer every command queued on the socket
fn serve_commands<D, L, S>(server : &mut TubiiServer<D, L, S>,
                           socket : &zmq::Socket) -> Result<usize, zmq::Error>
  where D : Connector,
        L : Connector,
        S : ConfigStore {
  let mut n_served = 0usize;
  loop {
    match socket.recv_bytes(zmq::DONTWAIT) {
      Err(zmq::Error::EAGAIN) | Err(zmq::Error::EINTR) => break,
      Err(err) => return Err(err),
      Ok(bytes) => {
        let line  = String::from_utf8_lossy(&bytes);
        let reply = server.handle_command(&line, Instant::now());
        socket.send(reply.to_string().as_bytes(), 0)?;
        n_served += 1;
      }
    }
  }
  Ok(n_served)
}

/// Run the server until stop is set.
///
/// The socket has to be a bound REP socket. After
/// the stop flag is seen, queued commands are
/// answered once more and the streams are flushed.
pub fn run<D, L, S>(server : &mut TubiiServer<D, L, S>,
                    socket : &zmq::Socket,
                    stop   : &AtomicBool) -> Result<(), zmq::Error>
  where D : Connector,
        L : Connector,
        S : ConfigStore {
  server.start(Instant::now());
  info!("Entering event loop");
  while !stop.load(Ordering::Relaxed) {
    server.service(Instant::now());
    let timeout = server.next_deadline(Instant::now()).as_millis() as i64;
    match socket.poll(zmq::POLLIN, timeout) {
      Err(zmq::Error::EINTR) => continue,
      Err(err) => return Err(err),
      Ok(0)    => (),
      Ok(_)    => {
        serve_commands(server, socket)?;
      }
    }
  }
  info!("Stop requested, shutting down");
  let n_late = serve_commands(server, socket)?;
  if n_late > 0 {
    debug!("Answered {} commands during shutdown", n_late);
  }
  let now = Instant::now();
  server.pump_logs(now);
  server.poll_streams(now);
  info!("Served {} commands ({} failed), read {} triggers in {} batches, {} GTID gaps",
        server.dispatcher.n_commands, server.dispatcher.n_errors,
        server.engine.n_records, server.engine.n_batches, server.engine.n_gaps);
  Ok(())
}
