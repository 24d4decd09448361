//! Logging setup
//!
//! The server logs through the `log` facade into an
//! env_logger backend. Besides the local output (stderr
//! or a log file), every record can be forwarded as a
//! single line to the log server. Forwarded lines are
//! queued in a bounded channel which the event loop
//! drains, so logging itself never blocks.

use std::io::Write;
use std::fmt;
use std::fs::OpenOptions;
use std::sync::Arc;
use std::sync::atomic::{
    AtomicUsize,
    Ordering,
};

use log::{
    Level,
    LevelFilter,
};
use colored::{
    Colorize,
    ColoredString,
};
use crossbeam_channel::{
    bounded,
    Sender,
    Receiver,
};

use tubii_dataclasses::errors::SettingsError;

/// Make sure that the loglevel is in color, even
/// though not using pretty_env logger
pub fn color_log(level : &Level) -> ColoredString {
  match level {
    Level::Error    => String::from(" ERROR!").red(),
    Level::Warn     => String::from(" WARN  ").yellow(),
    Level::Info     => String::from(" Info  ").green(),
    Level::Debug    => String::from(" debug ").blue(),
    Level::Trace    => String::from(" trace ").cyan(),
  }
}

/// Translate the counted -v/-q flags into a level filter.
///
/// Info is the default, every -v goes one level up
/// (Debug, Trace) and every -q one level down (Warn,
/// Error). Logging can not be switched off entirely.
pub fn level_from_verbosity(verbose : u8, quiet : u8) -> LevelFilter {
  let level = 3i16 + verbose as i16 - quiet as i16;
  match level.clamp(1, 5) {
    1 => LevelFilter::Error,
    2 => LevelFilter::Warn,
    3 => LevelFilter::Info,
    4 => LevelFilter::Debug,
    _ => LevelFilter::Trace,
  }
}

/// Level names as the log server knows them
pub fn forward_level_name(level : Level) -> &'static str {
  match level {
    Level::Error => "ERROR",
    Level::Warn  => "WARNING",
    Level::Info  => "NOTICE",
    Level::Debug => "VERBOSE",
    Level::Trace => "DEBUG",
  }
}

/// One line for the log server, newline terminated
pub fn format_forward_line(name : &str, level : Level, args : &fmt::Arguments) -> String {
  format!("{}: {} {}\n", name, forward_level_name(level), args)
}

/// Sending side of the log forwarding, owned by the logger
#[derive(Debug, Clone)]
pub struct LogForward {
  name    : String,
  sender  : Sender<String>,
  skipped : Arc<AtomicUsize>,
}

impl LogForward {
  /// Queue a line, or count it as skipped if the
  /// channel is full
  pub fn forward(&self, level : Level, args : &fmt::Arguments) {
    let line = format_forward_line(&self.name, level, args);
    if self.sender.try_send(line).is_err() {
      self.skipped.fetch_add(1, Ordering::Relaxed);
    }
  }
}

/// Receiving side of the log forwarding, drained
/// by the event loop
#[derive(Debug)]
pub struct ForwardedLines {
  receiver : Receiver<String>,
  skipped  : Arc<AtomicUsize>,
}

impl ForwardedLines {

  /// All lines queued so far
  pub fn drain(&self) -> Vec<String> {
    self.receiver.try_iter().collect()
  }

  /// Number of lines which did not fit in the channel
  /// since the last call
  pub fn take_skipped(&self) -> usize {
    self.skipped.swap(0, Ordering::Relaxed)
  }
}

/// Create both ends of the log forwarding
///
/// # Arguments
///
/// * name     : prefix of every line, e.g. "tubii"
/// * capacity : maximum number of queued lines
pub fn forward_channel(name : &str, capacity : usize) -> (LogForward, ForwardedLines) {
  let (sender, receiver) = bounded::<String>(capacity);
  let skipped = Arc::new(AtomicUsize::new(0));
  let forward = LogForward {
    name    : String::from(name),
    sender,
    skipped : skipped.clone(),
  };
  let lines = ForwardedLines {
    receiver,
    skipped,
  };
  (forward, lines)
}

/// How the logger should be set up
#[derive(Debug)]
pub struct LogOptions {
  pub level   : LevelFilter,
  /// Append to this file instead of writing to stderr
  pub logfile : Option<String>,
  pub forward : Option<LogForward>,
}

impl LogOptions {
  pub fn new() -> Self {
    Self {
      level   : LevelFilter::Info,
      logfile : None,
      forward : None,
    }
  }
}

impl Default for LogOptions {
  fn default() -> Self {
    Self::new()
  }
}

/// Set up the environmental (env) logger
/// with our format
///
/// Ensure that timestamps, lines and module paths
/// are printed in the logging output. RUST_LOG, if
/// set, overrides the level given in the options.
pub fn init_logger(options : LogOptions) -> Result<(), SettingsError> {
  let mut builder = env_logger::Builder::new();
  builder.filter_level(options.level);
  if let Ok(filters) = std::env::var("RUST_LOG") {
    builder.parse_filters(&filters);
  }
  if let Some(path) = &options.logfile {
    let file = OpenOptions::new()
      .create(true)
      .append(true)
      .open(path)?;
    colored::control::set_override(false);
    builder.target(env_logger::Target::Pipe(Box::new(file)));
  }
  let forward = options.forward;
  builder.format(move |buf, record| {
    if let Some(fwd) = &forward {
      fwd.forward(record.level(), record.args());
    }
    writeln!( buf, "{stamp} [{level}][{module_path}:{line}] {args}",
      stamp       = chrono::Local::now().format("%d-%m-%Y %H:%M:%S%.3f"),
      level       = color_log(&record.level()),
      module_path = record.module_path().unwrap_or("<unknown>"),
      line        = record.line().unwrap_or(0),
      args        = record.args()
      )
  });
  match builder.try_init() {
    Err(err) => Err(SettingsError::Io(err.to_string())),
    Ok(_)    => Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn verbosity_flags() {
    assert_eq!(level_from_verbosity(0, 0), LevelFilter::Info);
    assert_eq!(level_from_verbosity(1, 0), LevelFilter::Debug);
    assert_eq!(level_from_verbosity(5, 0), LevelFilter::Trace);
    assert_eq!(level_from_verbosity(0, 1), LevelFilter::Warn);
    assert_eq!(level_from_verbosity(0, 9), LevelFilter::Error);
    assert_eq!(level_from_verbosity(2, 2), LevelFilter::Info);
  }

  #[test]
  fn forwarded_lines_are_prefixed() {
    let (forward, lines) = forward_channel("tubii", 4);
    forward.forward(Level::Warn, &format_args!("missed GTID {}", 6));
    assert_eq!(lines.drain(), vec![String::from("tubii: WARNING missed GTID 6\n")]);
  }

  #[test]
  fn full_channel_counts_skipped_lines() {
    let (forward, lines) = forward_channel("tubii", 2);
    for k in 0..5 {
      forward.forward(Level::Info, &format_args!("line {}", k));
    }
    assert_eq!(lines.take_skipped(), 3);
    assert_eq!(lines.take_skipped(), 0);
    assert_eq!(lines.drain().len(), 2);
  }
}
