//! Outbound connections to the collectors
//!
//! A [`StreamClient`] owns exactly one connection to a
//! collector (the data server or the log server). It is
//! driven by the event loop through [`StreamClient::poll`]
//! and never blocks, neither on a write nor on connecting.
//! A connection attempt is started, left in the Connecting
//! state and finished by a later poll. Failed attempts are
//! repeated on a fixed interval, forever. Whatever is sent
//! while there is no connection is dropped and counted.
//!
//! The actual transport is hidden behind a [`Connector`],
//! so tests can replace the TCP socket with an in-memory
//! peer.

use std::io::{
    self,
    Read,
    Write,
    ErrorKind,
};
use std::fmt;
use std::net::{
    IpAddr,
    SocketAddr,
    TcpStream,
    ToSocketAddrs,
};
use std::thread;
use std::time::{
    Duration,
    Instant,
};
use std::rc::Rc;
use std::cell::RefCell;

use crossbeam_channel::{
    bounded,
    Receiver,
    TryRecvError,
};
use socket2::{
    Domain,
    Protocol,
    Socket,
    Type,
};

use tubii_dataclasses::errors::StreamError;
use tubii_dataclasses::records::TelemetryRecord;
use tubii_dataclasses::serialization::Serialization;

/// Connection state of a StreamClient
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConnectionState {
  Disconnected,
  /// A connection attempt is in flight
  Connecting,
  Connected,
}

impl fmt::Display for ConnectionState {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let repr = match self {
      ConnectionState::Disconnected => "Disconnected",
      ConnectionState::Connecting   => "Connecting",
      ConnectionState::Connected    => "Connected",
    };
    write!(f, "<ConnectionState: {}>", repr)
  }
}

/// A connection attempt which did not fail right away
pub enum Attempt<S> {
  /// the connection is up
  Ready(S),
  /// the handshake is still running, see Connector::finish
  InProgress(S),
}

/// Opens streams to one peer
pub trait Connector {
  type Stream : Read + Write;

  /// Human readable peer address, for logging
  fn peer(&self) -> String;

  /// Give up on an attempt which is in progress
  /// for this long
  fn connect_timeout(&self) -> Duration;

  /// Start a new connection. This must not block,
  /// and the stream has to be non-blocking.
  fn connect(&mut self) -> io::Result<Attempt<Self::Stream>>;

  /// Check on an attempt in progress. Ok(true) once
  /// the connection is up, Ok(false) while it is
  /// still being set up.
  fn finish(&mut self, stream : &mut Self::Stream) -> io::Result<bool>;
}

type Resolution = io::Result<Vec<SocketAddr>>;

/// Connects to host:port over TCP.
///
/// Host names are resolved on a helper thread, once.
/// Until the answer is there, connection attempts fail.
#[derive(Debug, Clone)]
pub struct TcpConnector {
  pub host    : String,
  pub port    : u16,
  pub timeout : Duration,
  addrs       : Vec<SocketAddr>,
  next_addr   : usize,
  resolving   : Option<Receiver<Resolution>>,
}

impl TcpConnector {
  pub fn new(host : &str, port : u16, timeout : Duration) -> Self {
    let mut connector = Self {
      host      : String::from(host),
      port,
      timeout,
      addrs     : Vec::<SocketAddr>::new(),
      next_addr : 0,
      resolving : None,
    };
    match host.parse::<IpAddr>() {
      Ok(ip) => connector.addrs.push(SocketAddr::new(ip, port)),
      Err(_) => connector.resolve(),
    }
    connector
  }

  /// Start a lookup of the host name in the background
  fn resolve(&mut self) {
    let (tx, rx) = bounded::<Resolution>(1);
    let host = self.host.clone();
    let port = self.port;
    let lookup = thread::Builder::new()
      .name(String::from("tubii-resolver"))
      .spawn(move || {
        let result = (host.as_str(), port)
          .to_socket_addrs()
          .map(|addrs| addrs.collect::<Vec<SocketAddr>>());
        // nobody is listening any more if the connector is gone
        tx.send(result).ok();
      });
    match lookup {
      Err(err) => error!("Unable to start lookup of {}! {}", self.host, err),
      Ok(_)    => self.resolving = Some(rx),
    }
  }

  /// The address for the next attempt. Attempts
  /// go round robin over all resolved addresses.
  fn next_address(&mut self) -> io::Result<SocketAddr> {
    if self.addrs.is_empty() {
      let answer = match self.resolving.as_ref() {
        None     => Err(TryRecvError::Disconnected),
        Some(rx) => rx.try_recv(),
      };
      match answer {
        Err(TryRecvError::Empty) => {
          return Err(io::Error::new(ErrorKind::WouldBlock,
                                    format!("{} is still being looked up", self.host)));
        }
        Err(TryRecvError::Disconnected) => {
          // lookup died, try again next time
          self.resolving = None;
          self.resolve();
          return Err(io::Error::new(ErrorKind::NotFound,
                                    format!("lookup of {} failed", self.host)));
        }
        Ok(Err(err)) => {
          self.resolve();
          return Err(err);
        }
        Ok(Ok(addrs)) => {
          self.resolving = None;
          debug!("{} resolves to {:?}", self.host, addrs);
          self.addrs = addrs;
        }
      }
    }
    if self.addrs.is_empty() {
      self.resolve();
      return Err(io::Error::new(ErrorKind::NotFound,
                                format!("{} does not resolve", self.peer())));
    }
    let addr = self.addrs[self.next_addr % self.addrs.len()];
    self.next_addr = self.next_addr.wrapping_add(1);
    Ok(addr)
  }
}

/// connect(2) on a non-blocking socket
fn connect_in_progress(err : &io::Error) -> bool {
  err.raw_os_error() == Some(libc::EINPROGRESS) || err.kind() == ErrorKind::WouldBlock
}

impl Connector for TcpConnector {
  type Stream = TcpStream;

  fn peer(&self) -> String {
    format!("{}:{}", self.host, self.port)
  }

  fn connect_timeout(&self) -> Duration {
    self.timeout
  }

  fn connect(&mut self) -> io::Result<Attempt<TcpStream>> {
    let addr   = self.next_address()?;
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nonblocking(true)?;
    let ready = match socket.connect(&addr.into()) {
      Ok(())  => true,
      Err(err) if connect_in_progress(&err) => false,
      Err(err) => return Err(err),
    };
    let stream : TcpStream = socket.into();
    stream.set_nodelay(true)?;
    if ready {
      Ok(Attempt::Ready(stream))
    } else {
      Ok(Attempt::InProgress(stream))
    }
  }

  fn finish(&mut self, stream : &mut TcpStream) -> io::Result<bool> {
    if let Some(err) = stream.take_error()? {
      return Err(err);
    }
    match stream.peer_addr() {
      Ok(_) => Ok(true),
      Err(err) if err.kind() == ErrorKind::NotConnected => Ok(false),
      Err(err) => Err(err),
    }
  }
}

/// Counters of a StreamClient
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct StreamStats {
  /// messages accepted for sending
  pub sent             : usize,
  /// messages dropped, for whatever reason
  pub dropped          : usize,
  /// successful connection attempts
  pub connects         : usize,
  /// failed connection attempts
  pub failed_attempts  : usize,
}

/// Resilient connection to a collector
pub struct StreamClient<C : Connector> {
  name                  : String,
  connector             : C,
  stream                : Option<C::Stream>,
  state                 : ConnectionState,
  retry_interval        : Duration,
  next_attempt          : Option<Instant>,
  pending               : Vec<u8>,
  max_pending           : usize,
  dropped_while_down    : usize,
  pub stats             : StreamStats,
}

impl<C : Connector> StreamClient<C> {

  /// A new, disconnected client. Call start to
  /// make the first connection attempt.
  ///
  /// # Arguments
  ///
  /// * name           : used in log messages, e.g. "data stream"
  /// * connector      : opens the actual connection
  /// * retry_interval : wait this long after a failed attempt
  /// * max_pending    : bytes which may wait for the socket
  pub fn new(name           : &str,
             connector      : C,
             retry_interval : Duration,
             max_pending    : usize) -> Self {
    Self {
      name               : String::from(name),
      connector,
      stream             : None,
      state              : ConnectionState::Disconnected,
      retry_interval,
      next_attempt       : None,
      pending            : Vec::<u8>::new(),
      max_pending,
      dropped_while_down : 0,
      stats              : StreamStats::default(),
    }
  }

  pub fn state(&self) -> ConnectionState {
    self.state
  }

  pub fn is_connected(&self) -> bool {
    self.state == ConnectionState::Connected
  }

  pub fn pending_bytes(&self) -> usize {
    self.pending.len()
  }

  /// When the next connection attempt is due, or when
  /// the attempt in progress times out
  pub fn next_attempt(&self) -> Option<Instant> {
    match self.state {
      ConnectionState::Connected => None,
      _ => self.next_attempt
    }
  }

  /// True while poll has work to do on every pass,
  /// i.e. bytes are waiting or a handshake is running
  pub fn needs_service(&self) -> bool {
    !self.pending.is_empty() || self.state == ConnectionState::Connecting
  }

  /// Make the initial connection attempt
  pub fn start(&mut self, now : Instant) {
    info!("Starting {} to {}", self.name, self.connector.peer());
    self.attempt(now);
  }

  fn attempt(&mut self, now : Instant) {
    match self.connector.connect() {
      Err(err) => self.attempt_failed(now, StreamError::Connect(err.to_string())),
      Ok(Attempt::Ready(stream)) => {
        self.stream = Some(stream);
        self.established();
      }
      Ok(Attempt::InProgress(stream)) => {
        debug!("{} connecting to {}", self.name, self.connector.peer());
        self.stream       = Some(stream);
        self.state        = ConnectionState::Connecting;
        self.next_attempt = Some(now + self.connector.connect_timeout());
      }
    }
  }

  /// See if the handshake is done
  fn check_connecting(&mut self, now : Instant) {
    let progress = match self.stream.as_mut() {
      None         => Err(io::Error::from(ErrorKind::NotConnected)),
      Some(stream) => self.connector.finish(stream),
    };
    match progress {
      Ok(true) => self.established(),
      Ok(false) => {
        if let Some(deadline) = self.next_attempt {
          if now >= deadline {
            let err = StreamError::Connect(format!("no answer within {} ms",
                                                   self.connector.connect_timeout().as_millis()));
            self.attempt_failed(now, err);
          }
        }
      }
      Err(err) => self.attempt_failed(now, StreamError::Connect(err.to_string())),
    }
  }

  fn attempt_failed(&mut self, now : Instant, err : StreamError) {
    if self.stats.failed_attempts == 0 || self.stats.connects > 0 {
      warn!("{} to {} unavailable, retrying every {}s! {}",
            self.name, self.connector.peer(), self.retry_interval.as_secs(), err);
    } else {
      debug!("{} to {} still unavailable! {}", self.name, self.connector.peer(), err);
    }
    self.stats.failed_attempts += 1;
    self.stream       = None;
    self.state        = ConnectionState::Disconnected;
    self.next_attempt = Some(now + self.retry_interval);
  }

  fn established(&mut self) {
    self.state        = ConnectionState::Connected;
    self.next_attempt = None;
    self.stats.connects += 1;
    if self.dropped_while_down > 0 {
      warn!("{} connected to {}, {} messages were dropped while disconnected",
            self.name, self.connector.peer(), self.dropped_while_down);
    } else {
      info!("{} connected to {}", self.name, self.connector.peer());
    }
    self.dropped_while_down = 0;
  }

  /// Forget the connection and schedule the next attempt
  fn disconnect(&mut self, now : Instant, err : StreamError) {
    warn!("{} to {} lost! {}", self.name, self.connector.peer(), err);
    self.stream = None;
    self.pending.clear();
    self.state        = ConnectionState::Disconnected;
    self.next_attempt = Some(now + self.retry_interval);
  }

  /// Drive the client. Reconnects when an attempt is
  /// due, detects a closed peer and pushes out pending
  /// bytes.
  pub fn poll(&mut self, now : Instant) {
    match self.state {
      ConnectionState::Disconnected => {
        match self.next_attempt {
          Some(due) if due > now => (),
          _ => self.attempt(now),
        }
      }
      ConnectionState::Connecting => self.check_connecting(now),
      ConnectionState::Connected => {
        if let Err(err) = self.check_peer() {
          self.disconnect(now, err);
          return;
        }
        self.flush(now);
      }
    }
  }

  /// The collectors never talk back, so readable data
  /// is discarded. A read of 0 bytes means the peer
  /// closed the connection.
  fn check_peer(&mut self) -> Result<(), StreamError> {
    let stream = match self.stream.as_mut() {
      None => return Err(StreamError::PeerClosed),
      Some(stream) => stream
    };
    let mut buf = [0u8; 256];
    loop {
      match stream.read(&mut buf) {
        Ok(0) => return Err(StreamError::PeerClosed),
        Ok(_) => continue,
        Err(err) if err.kind() == ErrorKind::WouldBlock  => return Ok(()),
        Err(err) if err.kind() == ErrorKind::Interrupted => continue,
        Err(err) => return Err(StreamError::Write(err.to_string())),
      }
    }
  }

  /// Write as much of the pending bytes as the
  /// socket takes right now
  pub fn flush(&mut self, now : Instant) {
    let mut failure : Option<StreamError> = None;
    if let Some(stream) = self.stream.as_mut() {
      while !self.pending.is_empty() {
        match stream.write(&self.pending) {
          Ok(0) => {
            failure = Some(StreamError::PeerClosed);
            break;
          }
          Ok(nbytes) => {
            self.pending.drain(..nbytes);
          }
          Err(err) if err.kind() == ErrorKind::WouldBlock  => break,
          Err(err) if err.kind() == ErrorKind::Interrupted => continue,
          Err(err) => {
            failure = Some(StreamError::Write(err.to_string()));
            break;
          }
        }
      }
    }
    if let Some(err) = failure {
      self.disconnect(now, err);
    }
  }

  /// Queue a message and try to write it right away.
  ///
  /// Returns false if the message was dropped, because
  /// there is no connection or too many bytes are
  /// already waiting.
  pub fn send(&mut self, bytes : &[u8], now : Instant) -> bool {
    if self.state != ConnectionState::Connected {
      self.stats.dropped      += 1;
      self.dropped_while_down += 1;
      return false;
    }
    if self.pending.len() + bytes.len() > self.max_pending {
      self.stats.dropped += 1;
      debug!("{} backlog of {} bytes is full, dropping message", self.name, self.pending.len());
      return false;
    }
    self.pending.extend_from_slice(bytes);
    self.stats.sent += 1;
    self.flush(now);
    true
  }
}

///////////////////////////////////////////////

/// Ships telemetry records to the data server
pub struct TelemetryStreamClient<C : Connector> {
  pub client : StreamClient<C>,
}

impl<C : Connector> TelemetryStreamClient<C> {
  pub fn new(connector : C, retry_interval : Duration, max_pending : usize) -> Self {
    Self {
      client : StreamClient::new("data stream", connector, retry_interval, max_pending)
    }
  }

  pub fn send_record(&mut self, record : &TelemetryRecord, now : Instant) -> bool {
    self.client.send(&record.to_bytestream(), now)
  }
}

/// Ships log lines to the log server
pub struct LogStreamClient<C : Connector> {
  pub client : StreamClient<C>,
}

impl<C : Connector> LogStreamClient<C> {
  pub fn new(connector : C, retry_interval : Duration, max_pending : usize) -> Self {
    Self {
      client : StreamClient::new("log stream", connector, retry_interval, max_pending)
    }
  }

  /// The line is sent as it is, it should be
  /// newline terminated
  pub fn send_line(&mut self, line : &str, now : Instant) -> bool {
    self.client.send(line.as_bytes(), now)
  }
}

///////////////////////////////////////////////

/// Shared state of an in-memory peer
#[derive(Debug, Default)]
pub struct MemoryPeer {
  /// accept connection attempts
  pub accept       : bool,
  /// leave attempts in progress until this is cleared,
  /// then accept or refuse them
  pub slow_accept  : bool,
  /// make writes return WouldBlock
  pub stall        : bool,
  /// the current connection was closed by the peer
  pub closed       : bool,
  /// every connection attempt, successful or not
  pub attempts     : usize,
  /// everything received over all connections
  pub received     : Vec<u8>,
}

/// An in-memory stand-in for a collector, for
/// running the stream clients without a network
#[derive(Debug, Clone)]
pub struct MemoryConnector {
  pub peer    : Rc<RefCell<MemoryPeer>>,
  pub timeout : Duration,
}

impl MemoryConnector {
  pub fn new(accept : bool) -> Self {
    let peer = MemoryPeer {
      accept,
      ..MemoryPeer::default()
    };
    Self {
      peer    : Rc::new(RefCell::new(peer)),
      timeout : Duration::from_millis(500),
    }
  }
}

pub struct MemoryStream {
  peer : Rc<RefCell<MemoryPeer>>,
}

impl Read for MemoryStream {
  fn read(&mut self, _buf : &mut [u8]) -> io::Result<usize> {
    if self.peer.borrow().closed {
      return Ok(0);
    }
    Err(io::Error::from(ErrorKind::WouldBlock))
  }
}

impl Write for MemoryStream {
  fn write(&mut self, buf : &[u8]) -> io::Result<usize> {
    let mut peer = self.peer.borrow_mut();
    if peer.closed {
      return Err(io::Error::from(ErrorKind::BrokenPipe));
    }
    if peer.stall {
      return Err(io::Error::from(ErrorKind::WouldBlock));
    }
    peer.received.extend_from_slice(buf);
    Ok(buf.len())
  }

  fn flush(&mut self) -> io::Result<()> {
    Ok(())
  }
}

impl Connector for MemoryConnector {
  type Stream = MemoryStream;

  fn peer(&self) -> String {
    String::from("memory")
  }

  fn connect_timeout(&self) -> Duration {
    self.timeout
  }

  fn connect(&mut self) -> io::Result<Attempt<MemoryStream>> {
    let mut peer = self.peer.borrow_mut();
    peer.attempts += 1;
    let stream = MemoryStream {
      peer : self.peer.clone()
    };
    if peer.slow_accept {
      return Ok(Attempt::InProgress(stream));
    }
    if !peer.accept {
      return Err(io::Error::from(ErrorKind::ConnectionRefused));
    }
    peer.closed = false;
    Ok(Attempt::Ready(stream))
  }

  fn finish(&mut self, _stream : &mut MemoryStream) -> io::Result<bool> {
    let mut peer = self.peer.borrow_mut();
    if peer.slow_accept {
      return Ok(false);
    }
    if !peer.accept {
      return Err(io::Error::from(ErrorKind::ConnectionRefused));
    }
    peer.closed = false;
    Ok(true)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn client(accept : bool) -> (StreamClient<MemoryConnector>, Rc<RefCell<MemoryPeer>>) {
    let connector = MemoryConnector::new(accept);
    let peer      = connector.peer.clone();
    (StreamClient::new("test stream", connector, Duration::from_secs(10), 64), peer)
  }

  #[test]
  fn initial_attempt_happens_at_start() {
    let (mut client, peer) = client(true);
    assert_eq!(client.state(), ConnectionState::Disconnected);
    client.start(Instant::now());
    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(peer.borrow().attempts, 1);
  }

  #[test]
  fn retries_only_on_the_interval() {
    let (mut client, peer) = client(false);
    let t0 = Instant::now();
    client.start(t0);
    assert_eq!(client.next_attempt(), Some(t0 + Duration::from_secs(10)));
    client.poll(t0 + Duration::from_secs(5));
    assert_eq!(peer.borrow().attempts, 1);
    client.poll(t0 + Duration::from_secs(10));
    assert_eq!(peer.borrow().attempts, 2);
    client.poll(t0 + Duration::from_secs(19));
    assert_eq!(peer.borrow().attempts, 2);
    client.poll(t0 + Duration::from_secs(20));
    assert_eq!(peer.borrow().attempts, 3);
    assert_eq!(client.state(), ConnectionState::Disconnected);
  }

  #[test]
  fn stays_connecting_until_the_handshake_completes() {
    let (mut client, peer) = client(true);
    peer.borrow_mut().slow_accept = true;
    let t0 = Instant::now();
    client.start(t0);
    assert_eq!(client.state(), ConnectionState::Connecting);
    assert!(client.needs_service());
    assert!(!client.send(&[0u8; 8], t0));
    client.poll(t0 + Duration::from_millis(100));
    assert_eq!(client.state(), ConnectionState::Connecting);
    assert_eq!(peer.borrow().attempts, 1);
    peer.borrow_mut().slow_accept = false;
    client.poll(t0 + Duration::from_millis(200));
    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(client.stats.connects, 1);
    assert!(client.send(&[1u8; 8], t0));
    assert_eq!(peer.borrow().received, vec![1u8; 8]);
  }

  #[test]
  fn unanswered_handshake_times_out() {
    let (mut client, peer) = client(true);
    peer.borrow_mut().slow_accept = true;
    let t0 = Instant::now();
    client.start(t0);
    assert_eq!(client.next_attempt(), Some(t0 + Duration::from_millis(500)));
    client.poll(t0 + Duration::from_millis(499));
    assert_eq!(client.state(), ConnectionState::Connecting);
    let t1 = t0 + Duration::from_millis(500);
    client.poll(t1);
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(client.stats.failed_attempts, 1);
    assert_eq!(client.next_attempt(), Some(t1 + Duration::from_secs(10)));
  }

  #[test]
  fn refused_handshake_is_a_failed_attempt() {
    let (mut client, peer) = client(false);
    peer.borrow_mut().slow_accept = true;
    let t0 = Instant::now();
    client.start(t0);
    assert_eq!(client.state(), ConnectionState::Connecting);
    peer.borrow_mut().slow_accept = false;
    client.poll(t0);
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(client.next_attempt(), Some(t0 + Duration::from_secs(10)));
  }

  #[test]
  fn stalled_peer_fills_backlog() {
    let (mut client, peer) = client(true);
    let now = Instant::now();
    client.start(now);
    peer.borrow_mut().stall = true;
    assert!(client.send(&[0u8; 40], now));
    assert!(!client.send(&[1u8; 40], now));
    assert_eq!(client.pending_bytes(), 40);
    peer.borrow_mut().stall = false;
    client.poll(now);
    assert_eq!(client.pending_bytes(), 0);
    assert_eq!(peer.borrow().received.len(), 40);
    assert_eq!(client.stats.dropped, 1);
  }

  #[test]
  fn peer_close_is_detected_on_poll() {
    let (mut client, peer) = client(true);
    let now = Instant::now();
    client.start(now);
    peer.borrow_mut().closed = true;
    client.poll(now);
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(client.next_attempt(), Some(now + Duration::from_secs(10)));
  }
}
