//! The TUBii board as a whole
//!
//! [`DeviceModel`] owns every mapped register window.
//! There is exactly one instance per process, which is
//! handed by reference to the command dispatcher and
//! the readout engine.

use std::fmt;

use tubii_dataclasses::config::{
    ConfigField,
    DeviceConfig,
};
use tubii_dataclasses::errors::{
    DeviceError,
    MappingError,
};

use crate::registers::*;
use crate::memory::RegisterBus;
use crate::control::*;

/// Steps of the power-on sequence which failed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InitReport {
  pub failures : Vec<(&'static str, DeviceError)>,
  pub n_steps  : usize,
}

impl InitReport {
  pub fn is_clean(&self) -> bool {
    self.failures.is_empty()
  }
}

impl fmt::Display for InitReport {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    if self.is_clean() {
      return write!(f, "<InitReport: {} steps ok>", self.n_steps);
    }
    let failed : Vec<String> = self.failures.iter()
      .map(|(step, err)| format!("{} ({})", step, err))
      .collect();
    write!(f, "<InitReport: {} of {} steps failed: {}>", self.failures.len(), self.n_steps, failed.join(", "))
  }
}

type InitStep = fn(&mut DeviceModel) -> Result<(), DeviceError>;

/// The power-on sequence, in order
const INIT_SEQUENCE : [(&str, InitStep); 10] = [
  ("mzhappy pulser", |dev| dev.mzhappy.configure(1.0, 0.5, 1_000_000_000)),
  ("fifo reset",     |dev| { dev.fifo.reset(); Ok(()) }),
  ("caen words",     |dev| { dev.shift_regs.set_caen_words(255, 255); Ok(()) }),
  ("gt delays",      |dev| { dev.shift_regs.set_gt_delays(153, 153); Ok(()) }),
  ("dac threshold",  |dev| { dev.shift_regs.set_dac_threshold(4095); Ok(()) }),
  ("control reg",    |dev| { dev.shift_regs.set_control_reg(58); Ok(()) }),
  ("speaker mask",   |dev| { dev.outputs.set_speaker_mask(0x100_0000); Ok(()) }),
  ("counter mask",   |dev| { dev.outputs.set_counter_mask(0x100_0000); Ok(()) }),
  ("trigger mask",   |dev| { dev.outputs.set_trigger_mask(0); Ok(()) }),
  ("speaker scale",  |dev| { dev.speaker_scale.set(1); Ok(()) }),
];

pub struct DeviceModel {
  pub clock          : Clock,
  pub generic_delay  : DelayLine,
  pub smellie_delay  : DelayLine,
  pub tellie_delay   : DelayLine,
  pub gt_delay       : DelayLine,
  pub trigword_delay : DelayLine,
  pub generic_pulser : Pulser,
  pub smellie_pulser : Pulser,
  pub tellie_pulser  : Pulser,
  pub mzhappy        : Pulser,
  pub outputs        : TriggerOutputs,
  pub counters       : Counters,
  pub speaker_scale  : SpeakerScale,
  pub button         : Button,
  pub burst          : MetaTrigger,
  pub combo          : MetaTrigger,
  pub prescale       : MetaTrigger,
  pub shift_regs     : ShiftRegisters,
  pub gtid           : GtidUnit,
  pub fifo           : FifoUnit,
  /// Drain the FIFO on readout ticks
  readout_enabled    : bool,
}

impl DeviceModel {

  /// Map every register window. Any failure here
  /// is fatal, the board can not be operated with
  /// a window missing.
  pub fn map_all(bus : &mut dyn RegisterBus) -> Result<Self, MappingError> {
    let mut map = |name : &str, base : u64| bus.map(name, base, WINDOW_SIZE);
    let device = Self {
      shift_regs     : ShiftRegisters::new(map("shift_regs", SHIFT_REGS_BASE)?),
      clock          : Clock::new(map("clocks", CLOCKS_BASE)?),
      counters       : Counters::new(map("counters", COUNTERS_BASE)?),
      outputs        : TriggerOutputs::new(map("trigger_out", TRIGGER_OUT_BASE)?),
      gtid           : GtidUnit::new(map("gtid", GTID_BASE)?),
      fifo           : FifoUnit::new(map("fifo", FIFO_BASE)?),
      speaker_scale  : SpeakerScale::new(map("speaker_scale", SPEAKER_SCALE_BASE)?),
      burst          : MetaTrigger::new(MetaTriggerKind::Burst, map("burst", BURST_BASE)?),
      button         : Button::new(map("button", BUTTON_BASE)?),
      combo          : MetaTrigger::new(MetaTriggerKind::Combo, map("combo", COMBO_BASE)?),
      prescale       : MetaTrigger::new(MetaTriggerKind::Prescale, map("prescale", PRESCALE_BASE)?),
      generic_pulser : Pulser::new("generic", map("generic_pulser", GENERIC_PULSER_BASE)?),
      smellie_pulser : Pulser::new("smellie", map("smellie_pulser", SMELLIE_PULSER_BASE)?),
      tellie_pulser  : Pulser::new("tellie", map("tellie_pulser", TELLIE_PULSER_BASE)?),
      mzhappy        : Pulser::new("mzhappy", map("mzhappy_pulser", MZHAPPY_PULSER_BASE)?),
      generic_delay  : DelayLine::new("generic", map("generic_delay", GENERIC_DELAY_BASE)?),
      smellie_delay  : DelayLine::new("smellie", map("smellie_delay", SMELLIE_DELAY_BASE)?),
      tellie_delay   : DelayLine::new("tellie", map("tellie_delay", TELLIE_DELAY_BASE)?),
      gt_delay       : DelayLine::new("gt", map("gt_delay", GT_DELAY_BASE)?),
      trigword_delay : DelayLine::new("trigword", map("trigword_delay", TRIGWORD_DELAY_BASE)?),
      readout_enabled : false,
    };
    info!("Mapped all register windows");
    Ok(device)
  }

  /// Run the power-on sequence.
  ///
  /// All steps are run, even if earlier ones fail.
  /// The failures are collected in the report.
  pub fn initialise(&mut self) -> InitReport {
    let mut report = InitReport {
      failures : Vec::new(),
      n_steps  : INIT_SEQUENCE.len(),
    };
    for (step, action) in INIT_SEQUENCE {
      match action(self) {
        Err(err) => {
          error!("Initialisation step {} failed! {}", step, err);
          report.failures.push((step, err));
        }
        Ok(_) => trace!("Initialisation step {} done", step)
      }
    }
    if report.is_clean() {
      info!("TUBii initialised");
    }
    report
  }

  pub fn readout_enabled(&self) -> bool {
    self.readout_enabled
  }

  pub fn set_readout_enabled(&mut self, enabled : bool) {
    if enabled != self.readout_enabled {
      info!("Trigger readout {}", if enabled {"started"} else {"stopped"});
    }
    self.readout_enabled = enabled;
  }

  /// Current register value of a config field
  pub fn read_field(&self, field : ConfigField) -> u32 {
    match field {
      ConfigField::ControlReg      => self.shift_regs.control_reg(),
      ConfigField::TriggerMask     => self.outputs.trigger_mask(),
      ConfigField::SpeakerMask     => self.outputs.speaker_mask(),
      ConfigField::CounterMask     => self.outputs.counter_mask(),
      ConfigField::CaenGainReg     => self.shift_regs.caen_gain_path(),
      ConfigField::CaenChannelReg  => self.shift_regs.caen_channel_select(),
      ConfigField::LockoutReg      => self.shift_regs.lo_delay(),
      ConfigField::DgtReg          => self.shift_regs.dgt_delay(),
      ConfigField::DacReg          => self.shift_regs.dac_threshold(),
      ConfigField::ComboEnableMask => self.combo.params().0,
      ConfigField::ComboMask       => self.combo.params().1,
      ConfigField::CounterMode     => self.counters.mode(),
      ConfigField::ClockStatus     => self.clock.status(),
      ConfigField::PrescaleValue   => self.prescale.params().0,
      ConfigField::PrescaleChannel => self.prescale.params().1,
      ConfigField::BurstRate       => self.burst.params().0,
      ConfigField::BurstChannel    => self.burst.params().1,
    }
  }

  /// Restore a single field. The clock status
  /// is only ever reported, never written.
  fn write_field(&mut self, field : ConfigField, value : u32) {
    match field {
      ConfigField::ControlReg      => self.shift_regs.set_control_reg(value),
      ConfigField::TriggerMask     => self.outputs.set_trigger_mask(value),
      ConfigField::SpeakerMask     => self.outputs.set_speaker_mask(value),
      ConfigField::CounterMask     => self.outputs.set_counter_mask(value),
      ConfigField::CaenGainReg     => {
        let channel = self.shift_regs.caen_channel_select();
        self.shift_regs.set_caen_words(value, channel);
      }
      ConfigField::CaenChannelReg  => {
        let gain = self.shift_regs.caen_gain_path();
        self.shift_regs.set_caen_words(gain, value);
      }
      ConfigField::LockoutReg      => {
        let dgt = self.shift_regs.dgt_delay();
        self.shift_regs.set_gt_delays(value, dgt);
      }
      ConfigField::DgtReg          => {
        let lo = self.shift_regs.lo_delay();
        self.shift_regs.set_gt_delays(lo, value);
      }
      ConfigField::DacReg          => self.shift_regs.set_dac_threshold(value),
      ConfigField::ComboEnableMask => self.combo.set_param_a(value),
      ConfigField::ComboMask       => self.combo.set_param_b(value),
      ConfigField::CounterMode     => self.counters.set_mode(value),
      ConfigField::ClockStatus     => (),
      ConfigField::PrescaleValue   => self.prescale.set_param_a(value),
      ConfigField::PrescaleChannel => self.prescale.set_param_b(value),
      ConfigField::BurstRate       => self.burst.set_param_a(value),
      ConfigField::BurstChannel    => self.burst.set_param_b(value),
    }
  }

  /// Read back every configurable register
  pub fn snapshot(&self) -> DeviceConfig {
    let mut config = DeviceConfig::new();
    for field in ConfigField::ALL {
      config.set(field, self.read_field(field));
    }
    config
  }

  /// Write a snapshot to the hardware.
  ///
  /// An unknown field fails the whole snapshot
  /// before a single register is touched.
  pub fn apply(&mut self, config : &DeviceConfig) -> Result<(), DeviceError> {
    let fields = config.fields()?;
    for (field, value) in fields {
      if field.is_read_only() {
        debug!("Ignoring {} = {} from the snapshot", field, value);
        continue;
      }
      self.write_field(field, value);
    }
    info!("Restored {} configuration fields", config.len());
    Ok(())
  }
}
