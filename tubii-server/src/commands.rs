//! Command protocol of the TUBii server
//!
//! A request is a single line of whitespace separated
//! tokens, the command name followed by its arguments.
//! Every command has a fixed number of tokens. The reply
//! is one of
//!
//! * `+<status>`  success, e.g. `+OK`
//! * `:<integer>` a value
//! * `-<message>` an error
//!
//! Arguments are parsed strictly: unsigned integers
//! accept decimal, `0x` hex and leading-`0` octal, floats
//! have to be finite. Anything else, e.g. trailing
//! characters, is refused before the hardware is touched.

use std::fmt;

use tubii_dataclasses::errors::{
    DeviceError,
    DispatchError,
};
use tubii_lib::config_store::ConfigStore;

use crate::device::DeviceModel;
use crate::control::{
    DelayLine,
    Pulser,
};

/// Reply to a command
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
  Status(String),
  Integer(u64),
  Error(String),
}

impl Reply {
  pub fn ok() -> Self {
    Reply::Status(String::from("OK"))
  }

  pub fn is_error(&self) -> bool {
    matches!(self, Reply::Error(_))
  }
}

impl fmt::Display for Reply {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      Reply::Status(status) => write!(f, "+{}", status),
      Reply::Integer(value) => write!(f, ":{}", value),
      Reply::Error(msg)     => write!(f, "-{}", msg),
    }
  }
}

impl From<u32> for Reply {
  fn from(value : u32) -> Self {
    Reply::Integer(value as u64)
  }
}

///////////////////////////////////////////////

/// Pulsers which can be programmed
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PulserLine {
  Generic,
  Smellie,
  Tellie,
  MZHappy,
}

/// Lines with readback commands
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EllieLine {
  Generic,
  Smellie,
  Tellie,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DelayTarget {
  Generic,
  Smellie,
  Tellie,
  Gt,
  TrigWord,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MaskKind {
  Trigger,
  Speaker,
  Counter,
}

/// Every command the server understands
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Command {
  Ping,
  Initialise,
  ClockReset,
  ClockStatus,
  SetAllowableClockMisses,
  MZHappy,
  SetPulser(PulserLine),
  GetRate(EllieLine),
  GetPulseWidth(EllieLine),
  GetNPulses(EllieLine),
  SetDelay(DelayTarget),
  GetDelay(EllieLine),
  GetGTDelay,
  SetMask(MaskKind),
  GetMask(MaskKind),
  SetSpeakerScale,
  CountLatch,
  CountReset,
  CountMode,
  TrigBurst,
  TrigCombo,
  TrigPrescale,
  TrigButton,
  SetGTDelays,
  GetLODelay,
  GetDGTDelay,
  SetCAENWords,
  GetCAENGainPathWord,
  GetCAENChannelSelectWord,
  SetControlReg,
  GetControlReg,
  SetECalBit,
  SetDACThreshold,
  GetDACThreshold,
  DataReady,
  LoadShift,
  MuxEnable,
  Muxer,
  GetCurrentTrigger,
  GetFifoTrigger,
  GetCurrentGTID,
  ResetGTID,
  SoftGT,
  ResetFIFO,
  StartReadout,
  StopReadout,
  SaveConfig,
  LoadConfig,
}

/// How an argument has to be parsed
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ArgKind {
  Unsigned,
  Float,
}

use ArgKind::{Unsigned as U, Float as F};

impl Command {

  /// Every command, e.g. for listing them
  pub const ALL : [Command; 67] = [
    Command::Ping,
    Command::Initialise,
    Command::ClockReset,
    Command::ClockStatus,
    Command::SetAllowableClockMisses,
    Command::MZHappy,
    Command::SetPulser(PulserLine::Generic),
    Command::SetPulser(PulserLine::Smellie),
    Command::SetPulser(PulserLine::Tellie),
    Command::SetPulser(PulserLine::MZHappy),
    Command::GetRate(EllieLine::Generic),
    Command::GetRate(EllieLine::Smellie),
    Command::GetRate(EllieLine::Tellie),
    Command::GetPulseWidth(EllieLine::Generic),
    Command::GetPulseWidth(EllieLine::Smellie),
    Command::GetPulseWidth(EllieLine::Tellie),
    Command::GetNPulses(EllieLine::Generic),
    Command::GetNPulses(EllieLine::Smellie),
    Command::GetNPulses(EllieLine::Tellie),
    Command::SetDelay(DelayTarget::Generic),
    Command::SetDelay(DelayTarget::Smellie),
    Command::SetDelay(DelayTarget::Tellie),
    Command::SetDelay(DelayTarget::Gt),
    Command::SetDelay(DelayTarget::TrigWord),
    Command::GetDelay(EllieLine::Generic),
    Command::GetDelay(EllieLine::Smellie),
    Command::GetDelay(EllieLine::Tellie),
    Command::GetGTDelay,
    Command::SetMask(MaskKind::Trigger),
    Command::SetMask(MaskKind::Speaker),
    Command::SetMask(MaskKind::Counter),
    Command::GetMask(MaskKind::Trigger),
    Command::GetMask(MaskKind::Speaker),
    Command::GetMask(MaskKind::Counter),
    Command::SetSpeakerScale,
    Command::CountLatch,
    Command::CountReset,
    Command::CountMode,
    Command::TrigBurst,
    Command::TrigCombo,
    Command::TrigPrescale,
    Command::TrigButton,
    Command::SetGTDelays,
    Command::GetLODelay,
    Command::GetDGTDelay,
    Command::SetCAENWords,
    Command::GetCAENGainPathWord,
    Command::GetCAENChannelSelectWord,
    Command::SetControlReg,
    Command::GetControlReg,
    Command::SetECalBit,
    Command::SetDACThreshold,
    Command::GetDACThreshold,
    Command::DataReady,
    Command::LoadShift,
    Command::MuxEnable,
    Command::Muxer,
    Command::GetCurrentTrigger,
    Command::GetFifoTrigger,
    Command::GetCurrentGTID,
    Command::ResetGTID,
    Command::SoftGT,
    Command::ResetFIFO,
    Command::StartReadout,
    Command::StopReadout,
    Command::SaveConfig,
    Command::LoadConfig,
  ];

  /// Look up a command by its exact (case sensitive) name
  pub fn from_name(name : &str) -> Option<Command> {
    let command = match name {
      "ping"                     => Command::Ping,
      "initialise"               => Command::Initialise,
      "clockReset"               => Command::ClockReset,
      "clockStatus"              => Command::ClockStatus,
      "setAllowableClockMisses"  => Command::SetAllowableClockMisses,
      "MZHappy"                  => Command::MZHappy,
      "setGenericPulser"         => Command::SetPulser(PulserLine::Generic),
      "setSmelliePulser"         => Command::SetPulser(PulserLine::Smellie),
      "setTelliePulser"          => Command::SetPulser(PulserLine::Tellie),
      "setMZHappyPulser"         => Command::SetPulser(PulserLine::MZHappy),
      "getGenericRate"           => Command::GetRate(EllieLine::Generic),
      "getSmellieRate"           => Command::GetRate(EllieLine::Smellie),
      "getTellieRate"            => Command::GetRate(EllieLine::Tellie),
      "getGenericPulseWidth"     => Command::GetPulseWidth(EllieLine::Generic),
      "getSmelliePulseWidth"     => Command::GetPulseWidth(EllieLine::Smellie),
      "getTelliePulseWidth"      => Command::GetPulseWidth(EllieLine::Tellie),
      "getGenericNPulses"        => Command::GetNPulses(EllieLine::Generic),
      "getSmellieNPulses"        => Command::GetNPulses(EllieLine::Smellie),
      "getTellieNPulses"         => Command::GetNPulses(EllieLine::Tellie),
      "setGenericDelay"          => Command::SetDelay(DelayTarget::Generic),
      "setSmellieDelay"          => Command::SetDelay(DelayTarget::Smellie),
      "setTellieDelay"           => Command::SetDelay(DelayTarget::Tellie),
      "gtdelay"                  => Command::SetDelay(DelayTarget::Gt),
      "setTrigWordDelay"         => Command::SetDelay(DelayTarget::TrigWord),
      "getGenericDelay"          => Command::GetDelay(EllieLine::Generic),
      "getSmellieDelay"          => Command::GetDelay(EllieLine::Smellie),
      "getTellieDelay"           => Command::GetDelay(EllieLine::Tellie),
      "getGTDelay"               => Command::GetGTDelay,
      "setTriggerMask"           => Command::SetMask(MaskKind::Trigger),
      "setSpeakerMask"           => Command::SetMask(MaskKind::Speaker),
      "setCounterMask"           => Command::SetMask(MaskKind::Counter),
      "getTriggerMask"           => Command::GetMask(MaskKind::Trigger),
      "getSpeakerMask"           => Command::GetMask(MaskKind::Speaker),
      "getCounterMask"           => Command::GetMask(MaskKind::Counter),
      "setSpeakerScale"          => Command::SetSpeakerScale,
      "countLatch"               => Command::CountLatch,
      "countReset"               => Command::CountReset,
      "countMode"                => Command::CountMode,
      "trigBurst"                => Command::TrigBurst,
      "trigCombo"                => Command::TrigCombo,
      "trigPrescale"             => Command::TrigPrescale,
      "trigButton"               => Command::TrigButton,
      "setGTDelays"              => Command::SetGTDelays,
      "getLODelay"               => Command::GetLODelay,
      "getDGTDelay"              => Command::GetDGTDelay,
      "setCAENWords"             => Command::SetCAENWords,
      "getCAENGainPathWord"      => Command::GetCAENGainPathWord,
      "getCAENChannelSelectWord" => Command::GetCAENChannelSelectWord,
      "setControlReg"            => Command::SetControlReg,
      "getControlReg"            => Command::GetControlReg,
      "setECalBit"               => Command::SetECalBit,
      "setDACThreshold"          => Command::SetDACThreshold,
      "getDACThreshold"          => Command::GetDACThreshold,
      "dataready"                => Command::DataReady,
      "loadShift"                => Command::LoadShift,
      "muxenable"                => Command::MuxEnable,
      "muxer"                    => Command::Muxer,
      "GetCurrentTrigger"        => Command::GetCurrentTrigger,
      "GetFifoTrigger"           => Command::GetFifoTrigger,
      "getCurrentGTID"           => Command::GetCurrentGTID,
      "resetGTID"                => Command::ResetGTID,
      "softGT"                   => Command::SoftGT,
      "resetFIFO"                => Command::ResetFIFO,
      "startReadout"             => Command::StartReadout,
      "stopReadout"              => Command::StopReadout,
      "saveConfig"               => Command::SaveConfig,
      "loadConfig"               => Command::LoadConfig,
      _ => return None
    };
    Some(command)
  }

  pub fn name(&self) -> &'static str {
    match self {
      Command::Ping                              => "ping",
      Command::Initialise                        => "initialise",
      Command::ClockReset                        => "clockReset",
      Command::ClockStatus                       => "clockStatus",
      Command::SetAllowableClockMisses           => "setAllowableClockMisses",
      Command::MZHappy                           => "MZHappy",
      Command::SetPulser(PulserLine::Generic)    => "setGenericPulser",
      Command::SetPulser(PulserLine::Smellie)    => "setSmelliePulser",
      Command::SetPulser(PulserLine::Tellie)     => "setTelliePulser",
      Command::SetPulser(PulserLine::MZHappy)    => "setMZHappyPulser",
      Command::GetRate(EllieLine::Generic)       => "getGenericRate",
      Command::GetRate(EllieLine::Smellie)       => "getSmellieRate",
      Command::GetRate(EllieLine::Tellie)        => "getTellieRate",
      Command::GetPulseWidth(EllieLine::Generic) => "getGenericPulseWidth",
      Command::GetPulseWidth(EllieLine::Smellie) => "getSmelliePulseWidth",
      Command::GetPulseWidth(EllieLine::Tellie)  => "getTelliePulseWidth",
      Command::GetNPulses(EllieLine::Generic)    => "getGenericNPulses",
      Command::GetNPulses(EllieLine::Smellie)    => "getSmellieNPulses",
      Command::GetNPulses(EllieLine::Tellie)     => "getTellieNPulses",
      Command::SetDelay(DelayTarget::Generic)    => "setGenericDelay",
      Command::SetDelay(DelayTarget::Smellie)    => "setSmellieDelay",
      Command::SetDelay(DelayTarget::Tellie)     => "setTellieDelay",
      Command::SetDelay(DelayTarget::Gt)         => "gtdelay",
      Command::SetDelay(DelayTarget::TrigWord)   => "setTrigWordDelay",
      Command::GetDelay(EllieLine::Generic)      => "getGenericDelay",
      Command::GetDelay(EllieLine::Smellie)      => "getSmellieDelay",
      Command::GetDelay(EllieLine::Tellie)       => "getTellieDelay",
      Command::GetGTDelay                        => "getGTDelay",
      Command::SetMask(MaskKind::Trigger)        => "setTriggerMask",
      Command::SetMask(MaskKind::Speaker)        => "setSpeakerMask",
      Command::SetMask(MaskKind::Counter)        => "setCounterMask",
      Command::GetMask(MaskKind::Trigger)        => "getTriggerMask",
      Command::GetMask(MaskKind::Speaker)        => "getSpeakerMask",
      Command::GetMask(MaskKind::Counter)        => "getCounterMask",
      Command::SetSpeakerScale                   => "setSpeakerScale",
      Command::CountLatch                        => "countLatch",
      Command::CountReset                        => "countReset",
      Command::CountMode                         => "countMode",
      Command::TrigBurst                         => "trigBurst",
      Command::TrigCombo                         => "trigCombo",
      Command::TrigPrescale                      => "trigPrescale",
      Command::TrigButton                        => "trigButton",
      Command::SetGTDelays                       => "setGTDelays",
      Command::GetLODelay                        => "getLODelay",
      Command::GetDGTDelay                       => "getDGTDelay",
      Command::SetCAENWords                      => "setCAENWords",
      Command::GetCAENGainPathWord               => "getCAENGainPathWord",
      Command::GetCAENChannelSelectWord          => "getCAENChannelSelectWord",
      Command::SetControlReg                     => "setControlReg",
      Command::GetControlReg                     => "getControlReg",
      Command::SetECalBit                        => "setECalBit",
      Command::SetDACThreshold                   => "setDACThreshold",
      Command::GetDACThreshold                   => "getDACThreshold",
      Command::DataReady                         => "dataready",
      Command::LoadShift                         => "loadShift",
      Command::MuxEnable                         => "muxenable",
      Command::Muxer                             => "muxer",
      Command::GetCurrentTrigger                 => "GetCurrentTrigger",
      Command::GetFifoTrigger                    => "GetFifoTrigger",
      Command::GetCurrentGTID                    => "getCurrentGTID",
      Command::ResetGTID                         => "resetGTID",
      Command::SoftGT                            => "softGT",
      Command::ResetFIFO                         => "resetFIFO",
      Command::StartReadout                      => "startReadout",
      Command::StopReadout                       => "stopReadout",
      Command::SaveConfig                        => "saveConfig",
      Command::LoadConfig                        => "loadConfig",
    }
  }

  /// The arguments, in order
  pub fn args(&self) -> &'static [ArgKind] {
    match self {
      Command::ClockReset
      | Command::SetAllowableClockMisses
      | Command::SetMask(_)
      | Command::SetSpeakerScale
      | Command::CountLatch
      | Command::CountReset
      | Command::CountMode
      | Command::SetControlReg
      | Command::SetECalBit
      | Command::SetDACThreshold
      | Command::DataReady
      | Command::LoadShift
      | Command::MuxEnable
      | Command::Muxer
      | Command::LoadConfig    => &[U],
      Command::SetPulser(_)    => &[F, F, U],
      Command::SetDelay(_)     => &[F],
      Command::TrigBurst
      | Command::TrigPrescale  => &[F, U],
      Command::TrigCombo
      | Command::SetGTDelays
      | Command::SetCAENWords  => &[U, U],
      _ => &[]
    }
  }

  /// Number of tokens, including the name
  pub fn arity(&self) -> usize {
    1 + self.args().len()
  }

  /// Run the command. This is the only place where
  /// the dispatcher touches the device.
  pub fn execute(&self,
                 args    : &Args,
                 device  : &mut DeviceModel,
                 store   : &mut dyn ConfigStore,
                 readout : &mut dyn ManualReadout) -> Result<Reply, DispatchError> {
    let reply = match self {
      Command::Ping => Reply::Status(String::from("PING")),
      Command::Initialise => {
        let report = device.initialise();
        if !report.is_clean() {
          let steps : Vec<&str> = report.failures.iter().map(|(step, _)| *step).collect();
          return Err(DispatchError::Device(DeviceError::HardwareRejected(
            format!("initialisation steps failed: {}", steps.join(", ")))));
        }
        Reply::ok()
      }
      Command::ClockReset => {
        device.clock.reset(args.unsigned(0))?;
        Reply::ok()
      }
      Command::ClockStatus => Reply::from(device.clock.status()),
      Command::SetAllowableClockMisses => {
        device.clock.set_allowable_misses(args.unsigned(0));
        Reply::ok()
      }
      Command::MZHappy => {
        device.mzhappy.configure(1.0, 0.5, 1_000_000_000)?;
        Reply::ok()
      }
      Command::SetPulser(line) => {
        pulser_mut(device, *line).configure(args.float(0), args.float(1), args.unsigned(2))?;
        Reply::ok()
      }
      Command::GetRate(line)       => Reply::from(pulser(device, *line).rate()),
      Command::GetPulseWidth(line) => Reply::from(pulser(device, *line).width_ns()),
      Command::GetNPulses(line)    => Reply::from(pulser(device, *line).pulse_count()),
      Command::SetDelay(target) => {
        delay_line_mut(device, *target).set_delay_ns(args.float(0))?;
        Reply::ok()
      }
      Command::GetDelay(line) => {
        let target = match line {
          EllieLine::Generic => DelayTarget::Generic,
          EllieLine::Smellie => DelayTarget::Smellie,
          EllieLine::Tellie  => DelayTarget::Tellie,
        };
        Reply::from(delay_line(device, target).delay_ticks())
      }
      Command::GetGTDelay => Reply::from(device.gt_delay.delay_ticks()),
      Command::SetMask(kind) => {
        let mask = args.unsigned(0);
        match kind {
          MaskKind::Trigger => device.outputs.set_trigger_mask(mask),
          MaskKind::Speaker => device.outputs.set_speaker_mask(mask),
          MaskKind::Counter => device.outputs.set_counter_mask(mask),
        }
        Reply::ok()
      }
      Command::GetMask(kind) => {
        match kind {
          MaskKind::Trigger => Reply::from(device.outputs.trigger_mask()),
          MaskKind::Speaker => Reply::from(device.outputs.speaker_mask()),
          MaskKind::Counter => Reply::from(device.outputs.counter_mask()),
        }
      }
      Command::SetSpeakerScale => {
        device.speaker_scale.set(args.unsigned(0));
        Reply::ok()
      }
      Command::CountLatch => {
        device.counters.latch(args.unsigned(0));
        Reply::ok()
      }
      Command::CountReset => {
        device.counters.reset(args.unsigned(0));
        Reply::ok()
      }
      Command::CountMode => {
        device.counters.set_mode(args.unsigned(0));
        Reply::ok()
      }
      Command::TrigBurst => {
        device.burst.set_burst(args.float(0), args.unsigned(1))?;
        Reply::ok()
      }
      Command::TrigCombo => {
        device.combo.set_combo(args.unsigned(0), args.unsigned(1))?;
        Reply::ok()
      }
      Command::TrigPrescale => {
        device.prescale.set_prescale(args.float(0), args.unsigned(1))?;
        Reply::ok()
      }
      Command::TrigButton => {
        device.button.fire();
        Reply::ok()
      }
      Command::SetGTDelays => {
        device.shift_regs.set_gt_delays(args.unsigned(0), args.unsigned(1));
        Reply::ok()
      }
      Command::GetLODelay  => Reply::from(device.shift_regs.lo_delay()),
      Command::GetDGTDelay => Reply::from(device.shift_regs.dgt_delay()),
      Command::SetCAENWords => {
        device.shift_regs.set_caen_words(args.unsigned(0), args.unsigned(1));
        Reply::ok()
      }
      Command::GetCAENGainPathWord      => Reply::from(device.shift_regs.caen_gain_path()),
      Command::GetCAENChannelSelectWord => Reply::from(device.shift_regs.caen_channel_select()),
      Command::SetControlReg => {
        device.shift_regs.set_control_reg(args.unsigned(0));
        Reply::ok()
      }
      Command::GetControlReg => Reply::from(device.shift_regs.control_reg()),
      Command::SetECalBit => {
        device.shift_regs.set_ecal(args.unsigned(0))?;
        Reply::ok()
      }
      Command::SetDACThreshold => {
        device.shift_regs.set_dac_threshold(args.unsigned(0));
        Reply::ok()
      }
      Command::GetDACThreshold   => Reply::from(device.shift_regs.dac_threshold()),
      Command::DataReady => {
        device.shift_regs.set_data_ready(args.unsigned(0));
        Reply::ok()
      }
      Command::LoadShift => {
        device.shift_regs.load_shift(args.unsigned(0));
        Reply::ok()
      }
      Command::MuxEnable => {
        device.shift_regs.set_mux_enable(args.unsigned(0))?;
        Reply::ok()
      }
      Command::Muxer => {
        device.shift_regs.set_mux(args.unsigned(0))?;
        Reply::ok()
      }
      Command::GetCurrentTrigger => Reply::from(device.outputs.current_trigger()),
      Command::GetFifoTrigger => {
        let n_new = readout.read_fifo_once(device);
        debug!("Manual FIFO readout found {} new triggers", n_new);
        Reply::ok()
      }
      Command::GetCurrentGTID    => Reply::from(device.gtid.current()),
      Command::ResetGTID => {
        device.gtid.reset();
        Reply::ok()
      }
      Command::SoftGT => {
        device.gtid.soft_gt();
        Reply::ok()
      }
      Command::ResetFIFO => {
        device.fifo.reset();
        Reply::ok()
      }
      Command::StartReadout => {
        device.set_readout_enabled(true);
        Reply::ok()
      }
      Command::StopReadout => {
        device.set_readout_enabled(false);
        Reply::ok()
      }
      Command::SaveConfig => {
        let config = device.snapshot();
        let key    = store.save(&config)?;
        Reply::from(key)
      }
      Command::LoadConfig => {
        let config = store.load(args.unsigned(0))?;
        device.apply(&config)?;
        Reply::ok()
      }
    };
    Ok(reply)
  }
}

/// The readout side of the server, as far as
/// commands reach into it
pub trait ManualReadout {
  /// Drain the FIFO once, outside of the readout
  /// timer, and ship whatever is new. Returns the
  /// number of new records.
  fn read_fifo_once(&mut self, device : &mut DeviceModel) -> usize;
}

impl fmt::Display for Command {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "{}", self.name())
  }
}

fn pulser(device : &DeviceModel, line : EllieLine) -> &Pulser {
  match line {
    EllieLine::Generic => &device.generic_pulser,
    EllieLine::Smellie => &device.smellie_pulser,
    EllieLine::Tellie  => &device.tellie_pulser,
  }
}

fn pulser_mut(device : &mut DeviceModel, line : PulserLine) -> &mut Pulser {
  match line {
    PulserLine::Generic => &mut device.generic_pulser,
    PulserLine::Smellie => &mut device.smellie_pulser,
    PulserLine::Tellie  => &mut device.tellie_pulser,
    PulserLine::MZHappy => &mut device.mzhappy,
  }
}

fn delay_line(device : &DeviceModel, target : DelayTarget) -> &DelayLine {
  match target {
    DelayTarget::Generic  => &device.generic_delay,
    DelayTarget::Smellie  => &device.smellie_delay,
    DelayTarget::Tellie   => &device.tellie_delay,
    DelayTarget::Gt       => &device.gt_delay,
    DelayTarget::TrigWord => &device.trigword_delay,
  }
}

fn delay_line_mut(device : &mut DeviceModel, target : DelayTarget) -> &mut DelayLine {
  match target {
    DelayTarget::Generic  => &mut device.generic_delay,
    DelayTarget::Smellie  => &mut device.smellie_delay,
    DelayTarget::Tellie   => &mut device.tellie_delay,
    DelayTarget::Gt       => &mut device.gt_delay,
    DelayTarget::TrigWord => &mut device.trigword_delay,
  }
}

///////////////////////////////////////////////

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Arg {
  Unsigned(u32),
  Float(f32),
}

/// Parsed arguments of a command, checked
/// against the command's ArgKinds
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Args {
  values : Vec<Arg>,
}

impl Args {

  /// Parse the argument tokens (name excluded)
  pub fn parse(command : &Command, tokens : &[&str]) -> Result<Args, DispatchError> {
    let mut values = Vec::<Arg>::with_capacity(tokens.len());
    for (k, (kind, token)) in command.args().iter().zip(tokens.iter()).enumerate() {
      let parsed = match kind {
        ArgKind::Unsigned => parse_unsigned(token).map(Arg::Unsigned),
        ArgKind::Float    => parse_float(token).map(Arg::Float),
      };
      match parsed {
        Err(reason) => {
          return Err(DispatchError::InvalidArgument {
            command  : String::from(command.name()),
            position : k + 1,
            value    : String::from(*token),
            reason
          });
        }
        Ok(arg) => values.push(arg)
      }
    }
    Ok(Args { values })
  }

  /// The k'th argument as unsigned. The kind is
  /// guaranteed by parse, so a mismatch gives 0.
  pub fn unsigned(&self, k : usize) -> u32 {
    match self.values.get(k) {
      Some(Arg::Unsigned(value)) => *value,
      _ => 0
    }
  }

  pub fn float(&self, k : usize) -> f32 {
    match self.values.get(k) {
      Some(Arg::Float(value)) => *value,
      _ => 0.0
    }
  }
}

/// Parse an unsigned 32bit integer, the way strtoul
/// with base 0 does, but refuse signs, empty strings,
/// trailing characters and values out of range
pub fn parse_unsigned(token : &str) -> Result<u32, String> {
  let (digits, radix) = if let Some(hex) = token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
    (hex, 16)
  } else if token.len() > 1 && token.starts_with('0') {
    (&token[1..], 8)
  } else {
    (token, 10)
  };
  if digits.is_empty() {
    return Err(String::from("empty number"));
  }
  if !digits.chars().all(|c| c.is_digit(radix)) {
    return Err(format!("not a base {} number", radix));
  }
  match u32::from_str_radix(digits, radix) {
    Err(_)    => Err(String::from("out of range")),
    Ok(value) => Ok(value)
  }
}

/// Parse a finite 32bit float
pub fn parse_float(token : &str) -> Result<f32, String> {
  match token.parse::<f32>() {
    Err(_) => Err(String::from("not a number")),
    Ok(value) if !value.is_finite() => Err(String::from("out of range")),
    Ok(value) => Ok(value)
  }
}

///////////////////////////////////////////////

/// Turns request lines into device operations
/// and replies
pub struct CommandDispatcher<S : ConfigStore> {
  pub store      : S,
  pub n_commands : u64,
  pub n_errors   : u64,
}

impl<S : ConfigStore> CommandDispatcher<S> {

  pub fn new(store : S) -> Self {
    Self {
      store,
      n_commands : 0,
      n_errors   : 0,
    }
  }

  /// Handle one request. There is always
  /// exactly one reply.
  pub fn dispatch(&mut self,
                  device  : &mut DeviceModel,
                  readout : &mut dyn ManualReadout,
                  line    : &str) -> Reply {
    self.n_commands += 1;
    match self.try_dispatch(device, readout, line) {
      Err(err) => {
        self.n_errors += 1;
        debug!("Command '{}' failed! {}", line.trim(), err);
        Reply::Error(err.to_string())
      }
      Ok(reply) => {
        trace!("Command '{}' -> {}", line.trim(), reply);
        reply
      }
    }
  }

  fn try_dispatch(&mut self,
                  device  : &mut DeviceModel,
                  readout : &mut dyn ManualReadout,
                  line    : &str) -> Result<Reply, DispatchError> {
    let tokens : Vec<&str> = line.split_whitespace().collect();
    let name = tokens.first().copied().unwrap_or("");
    let command = match Command::from_name(name) {
      None          => return Err(DispatchError::UnknownCommand(String::from(name))),
      Some(command) => command
    };
    if tokens.len() != command.arity() {
      return Err(DispatchError::ArityMismatch {
        command  : String::from(command.name()),
        expected : command.arity(),
        got      : tokens.len(),
      });
    }
    let args = Args::parse(&command, &tokens[1..])?;
    command.execute(&args, device, &mut self.store, readout)
  }
}
