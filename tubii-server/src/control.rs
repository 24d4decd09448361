//! The hardware units of the TUBii board
//!
//! Each unit owns its register window and turns
//! validated arguments into register reads/writes.
//! Arguments are checked before anything is written,
//! so a rejected call leaves the hardware untouched.
//!
//! For the mapping of registers/addresses,
//! see `registers.rs`

use tubii_dataclasses::errors::DeviceError;
use tubii_dataclasses::records::TriggerRecord;

use crate::registers::*;
use crate::memory::RegisterWindow;
use crate::readout::TriggerSource;

/// Write 1 and then 0, for registers which act
/// on a rising edge
fn strobe(window : &mut Box<dyn RegisterWindow>, offset : u32) {
  window.write(offset, 1);
  window.write(offset, 0);
}

/// Convert a delay to clock ticks
///
/// # Arguments
///
/// * ns : delay in nanoseconds, 0 to 655350 ns
pub fn ns_to_ticks(ns : f32) -> Result<u32, DeviceError> {
  if !ns.is_finite() || ns < 0.0 {
    return Err(DeviceError::InvalidArgument(format!("delay of {} ns", ns)));
  }
  let ticks = (ns / NS_PER_TICK).round();
  if ticks > MAX_DELAY_TICKS as f32 {
    return Err(DeviceError::InvalidArgument(
      format!("delay of {} ns exceeds the maximum of {} ns", ns, MAX_DELAY_TICKS as f32 * NS_PER_TICK)));
  }
  Ok(ticks as u32)
}

/// Register values (period, low ticks) for
/// a pulser
pub fn pulser_words(rate_hz : f32, width_fraction : f32) -> Result<(u32, u32), DeviceError> {
  if !rate_hz.is_finite() || rate_hz <= 0.0 || rate_hz > MAX_PULSER_RATE_HZ {
    return Err(DeviceError::InvalidArgument(
      format!("pulser rate {} Hz, has to be > 0 and <= {} Hz", rate_hz, MAX_PULSER_RATE_HZ)));
  }
  if !width_fraction.is_finite() || width_fraction <= 0.0 || width_fraction >= 1.0 {
    return Err(DeviceError::InvalidArgument(
      format!("pulse width {}, has to be a fraction of the period", width_fraction)));
  }
  let period = (CLOCK_HZ / rate_hz as f64).round();
  if period > u32::MAX as f64 {
    return Err(DeviceError::InvalidArgument(format!("pulser rate {} Hz is too low", rate_hz)));
  }
  let high = (period * width_fraction as f64).round();
  if high < 1.0 || high >= period {
    return Err(DeviceError::InvalidArgument(
      format!("pulse width {} at {} Hz does not fit the {} ns clock", width_fraction, rate_hz, NS_PER_TICK)));
  }
  let period = period as u32;
  let high   = high as u32;
  Ok((period, period - high))
}

///////////////////////////////////////////////

pub struct Clock {
  window : Box<dyn RegisterWindow>,
}

impl Clock {
  pub fn new(window : Box<dyn RegisterWindow>) -> Self {
    Self { window }
  }

  /// Select the clock (0 or 1)
  pub fn reset(&mut self, state : u32) -> Result<(), DeviceError> {
    if state > 1 {
      return Err(DeviceError::InvalidArgument(
        format!("invalid clock choice {}, choose 0 or 1", state)));
    }
    self.window.write(CLOCK_RESET, state);
    Ok(())
  }

  pub fn status(&self) -> u32 {
    self.window.read(CLOCK_STATUS)
  }

  pub fn set_allowable_misses(&mut self, misses : u32) {
    self.window.write(CLOCK_MISSES, misses);
  }

  pub fn allowable_misses(&self) -> u32 {
    self.window.read(CLOCK_MISSES)
  }
}

///////////////////////////////////////////////

pub struct DelayLine {
  name   : &'static str,
  window : Box<dyn RegisterWindow>,
}

impl DelayLine {
  pub fn new(name : &'static str, window : Box<dyn RegisterWindow>) -> Self {
    Self { name, window }
  }

  /// Set the delay, returns the programmed ticks
  pub fn set_delay_ns(&mut self, ns : f32) -> Result<u32, DeviceError> {
    let ticks = ns_to_ticks(ns)?;
    debug!("Setting {} delay to {} ticks", self.name, ticks);
    self.window.write(DELAY_TICKS, ticks);
    Ok(ticks)
  }

  pub fn delay_ticks(&self) -> u32 {
    self.window.read(DELAY_TICKS)
  }
}

///////////////////////////////////////////////

/// A pulse generator. The output is high for
/// (period - low) ticks of every period.
pub struct Pulser {
  name   : &'static str,
  window : Box<dyn RegisterWindow>,
}

impl Pulser {
  pub fn new(name : &'static str, window : Box<dyn RegisterWindow>) -> Self {
    Self { name, window }
  }

  /// Program and start the pulser
  ///
  /// # Arguments
  ///
  /// * rate_hz        : pulse frequency
  /// * width_fraction : fraction of the period the output is high
  /// * n_pulses       : number of pulses
  pub fn configure(&mut self, rate_hz : f32, width_fraction : f32, n_pulses : u32)
    -> Result<(), DeviceError> {
    let (period, low) = pulser_words(rate_hz, width_fraction)?;
    debug!("{} pulser: period {} ticks, low {} ticks, {} pulses", self.name, period, low, n_pulses);
    self.window.write(PULSER_LOW, low);
    self.window.write(PULSER_PERIOD, period);
    self.window.write(PULSER_COUNT, n_pulses);
    strobe(&mut self.window, PULSER_LOAD);
    Ok(())
  }

  fn period(&self) -> u32 {
    self.window.read(PULSER_PERIOD)
  }

  fn high_ticks(&self) -> u32 {
    self.period().saturating_sub(self.window.read(PULSER_LOW))
  }

  /// Rate in Hz, 0 if the pulser is not programmed
  pub fn rate(&self) -> u32 {
    match self.period() {
      0      => 0,
      period => (CLOCK_HZ / period as f64).round() as u32
    }
  }

  pub fn width_fraction(&self) -> f32 {
    match self.period() {
      0      => 0.0,
      period => self.high_ticks() as f32 / period as f32
    }
  }

  pub fn width_ns(&self) -> u32 {
    self.high_ticks().saturating_mul(NS_PER_TICK as u32)
  }

  pub fn pulse_count(&self) -> u32 {
    self.window.read(PULSER_COUNT)
  }
}

///////////////////////////////////////////////

/// Trigger, speaker and counter masks select which
/// channels feed the respective output
pub struct TriggerOutputs {
  window : Box<dyn RegisterWindow>,
}

impl TriggerOutputs {
  pub fn new(window : Box<dyn RegisterWindow>) -> Self {
    Self { window }
  }

  pub fn set_trigger_mask(&mut self, mask : u32) {
    self.window.write(TRIGGER_MASK, mask);
  }

  pub fn trigger_mask(&self) -> u32 {
    self.window.read(TRIGGER_MASK)
  }

  pub fn set_speaker_mask(&mut self, mask : u32) {
    self.window.write(SPEAKER_MASK, mask);
  }

  pub fn speaker_mask(&self) -> u32 {
    self.window.read(SPEAKER_MASK)
  }

  pub fn set_counter_mask(&mut self, mask : u32) {
    self.window.write(COUNTER_MASK, mask);
  }

  pub fn counter_mask(&self) -> u32 {
    self.window.read(COUNTER_MASK)
  }

  /// The trigger word the board sees right now
  pub fn current_trigger(&self) -> u32 {
    self.window.read(CURRENT_TRIGGER)
  }
}

///////////////////////////////////////////////

pub struct Counters {
  window : Box<dyn RegisterWindow>,
}

impl Counters {
  pub fn new(window : Box<dyn RegisterWindow>) -> Self {
    Self { window }
  }

  pub fn latch(&mut self, value : u32) {
    self.window.write(COUNTER_LATCH, value);
  }

  pub fn reset(&mut self, value : u32) {
    self.window.write(COUNTER_RESET, value);
  }

  pub fn set_mode(&mut self, mode : u32) {
    self.window.write(COUNTER_MODE, mode);
  }

  pub fn mode(&self) -> u32 {
    self.window.read(COUNTER_MODE)
  }

  /// In rate mode, the counters are latched once
  /// per status period
  pub fn in_rate_mode(&self) -> bool {
    self.mode() == 1
  }

  pub fn pulse_latch(&mut self) {
    strobe(&mut self.window, COUNTER_LATCH);
  }
}

///////////////////////////////////////////////

pub struct SpeakerScale {
  window : Box<dyn RegisterWindow>,
}

impl SpeakerScale {
  pub fn new(window : Box<dyn RegisterWindow>) -> Self {
    Self { window }
  }

  pub fn set(&mut self, scale : u32) {
    self.window.write(SPEAKER_SCALE, scale);
  }

  pub fn get(&self) -> u32 {
    self.window.read(SPEAKER_SCALE)
  }
}

pub struct Button {
  window : Box<dyn RegisterWindow>,
}

impl Button {
  pub fn new(window : Box<dyn RegisterWindow>) -> Self {
    Self { window }
  }

  /// Fire a single trigger, like pushing
  /// the button on the front panel
  pub fn fire(&mut self) {
    strobe(&mut self.window, BUTTON_FIRE);
  }
}

///////////////////////////////////////////////

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MetaTriggerKind {
  Burst,
  Combo,
  Prescale,
}

impl MetaTriggerKind {
  pub fn name(&self) -> &'static str {
    match self {
      MetaTriggerKind::Burst    => "burst",
      MetaTriggerKind::Combo    => "combo",
      MetaTriggerKind::Prescale => "prescale",
    }
  }
}

/// Burst, combo and prescale triggers. They take two
/// parameters and flag settings they can not realize
/// in their error register.
pub struct MetaTrigger {
  kind   : MetaTriggerKind,
  window : Box<dyn RegisterWindow>,
}

impl MetaTrigger {
  pub fn new(kind : MetaTriggerKind, window : Box<dyn RegisterWindow>) -> Self {
    Self { kind, window }
  }

  fn check_channel(&self, channel : u32) -> Result<(), DeviceError> {
    if channel >= 32 {
      return Err(DeviceError::InvalidArgument(
        format!("{} trigger channel {} does not exist", self.kind.name(), channel)));
    }
    Ok(())
  }

  /// Write both parameters and read back the error flag
  fn program(&mut self, param_a : u32, param_b : u32) -> Result<(), DeviceError> {
    self.window.write(META_PARAM_A, param_a);
    self.window.write(META_PARAM_B, param_b);
    let flag = self.window.read(META_ERROR);
    if flag != 0 {
      return Err(DeviceError::HardwareRejected(
        format!("{} trigger with parameters {} and {} (error flag {:#x})",
                self.kind.name(), param_a, param_b, flag)));
    }
    Ok(())
  }

  /// Burst trigger: fire if the rate on channel exceeds rate_hz
  pub fn set_burst(&mut self, rate_hz : f32, channel : u32) -> Result<(), DeviceError> {
    self.check_channel(channel)?;
    if !rate_hz.is_finite() || rate_hz.round() < 1.0 || rate_hz.round() > u32::MAX as f32 {
      return Err(DeviceError::InvalidArgument(format!("burst rate {} Hz", rate_hz)));
    }
    self.program(rate_hz.round() as u32, channel)
  }

  /// Combo trigger: fire if all enabled channels match the logic mask
  pub fn set_combo(&mut self, enable_mask : u32, logic_mask : u32) -> Result<(), DeviceError> {
    self.program(enable_mask, logic_mask)
  }

  /// Prescale trigger: pass on every factor'th trigger of channel
  pub fn set_prescale(&mut self, factor : f32, channel : u32) -> Result<(), DeviceError> {
    self.check_channel(channel)?;
    if !factor.is_finite() || factor.round() < 1.0 || factor.round() > u32::MAX as f32 {
      return Err(DeviceError::InvalidArgument(format!("prescale factor {}", factor)));
    }
    self.program(factor.round() as u32, channel)
  }

  /// Raw parameter registers, as they go into a config snapshot
  pub fn params(&self) -> (u32, u32) {
    (self.window.read(META_PARAM_A), self.window.read(META_PARAM_B))
  }

  pub fn set_param_a(&mut self, value : u32) {
    self.window.write(META_PARAM_A, value);
  }

  pub fn set_param_b(&mut self, value : u32) {
    self.window.write(META_PARAM_B, value);
  }
}

///////////////////////////////////////////////

/// Registers which are shifted into the board:
/// control register, CAEN words, DAC threshold
/// and the GT delays
pub struct ShiftRegisters {
  window : Box<dyn RegisterWindow>,
}

impl ShiftRegisters {
  pub fn new(window : Box<dyn RegisterWindow>) -> Self {
    Self { window }
  }

  pub fn set_control_reg(&mut self, value : u32) {
    self.window.write(CONTROL_REG, value);
  }

  pub fn control_reg(&self) -> u32 {
    self.window.read(CONTROL_REG)
  }

  /// Switch the ECal bit of the control register,
  /// leaving all other bits alone
  pub fn set_ecal(&mut self, on : u32) -> Result<(), DeviceError> {
    if on > 1 {
      return Err(DeviceError::InvalidArgument(
        String::from("ECals can only be set on (1) or off (0)")));
    }
    let value = (self.control_reg() & !CONTROL_ECAL_BIT) | (on * CONTROL_ECAL_BIT);
    self.set_control_reg(value);
    Ok(())
  }

  pub fn set_caen_words(&mut self, gain_path : u32, channel_select : u32) {
    self.window.write(CAEN_GAIN_PATH, gain_path);
    self.window.write(CAEN_CHANNEL_SELECT, channel_select);
  }

  pub fn caen_gain_path(&self) -> u32 {
    self.window.read(CAEN_GAIN_PATH)
  }

  pub fn caen_channel_select(&self) -> u32 {
    self.window.read(CAEN_CHANNEL_SELECT)
  }

  pub fn set_dac_threshold(&mut self, value : u32) {
    self.window.write(DAC_THRESHOLD, value);
  }

  pub fn dac_threshold(&self) -> u32 {
    self.window.read(DAC_THRESHOLD)
  }

  pub fn set_gt_delays(&mut self, lo : u32, dgt : u32) {
    self.window.write(LO_DELAY, lo);
    self.window.write(DGT_DELAY, dgt);
  }

  pub fn lo_delay(&self) -> u32 {
    self.window.read(LO_DELAY)
  }

  pub fn dgt_delay(&self) -> u32 {
    self.window.read(DGT_DELAY)
  }

  /// Raw data ready line of the shift register chain
  pub fn set_data_ready(&mut self, value : u32) {
    trace!("Shift register data ready {}", value);
    self.window.write(SHIFT_DATA_READY, value);
  }

  /// Shift a raw word into the register picked by the mux
  pub fn load_shift(&mut self, value : u32) {
    trace!("Loading {:#x} into the shift registers", value);
    self.window.write(SHIFT_LOAD, value);
  }

  pub fn set_mux_enable(&mut self, on : u32) -> Result<(), DeviceError> {
    if on > 1 {
      return Err(DeviceError::InvalidArgument(
        String::from("the mux can only be enabled (1) or disabled (0)")));
    }
    self.window.write(MUX_ENABLE, on);
    Ok(())
  }

  pub fn set_mux(&mut self, select : u32) -> Result<(), DeviceError> {
    if select > MAX_MUX_SELECT {
      return Err(DeviceError::InvalidArgument(
        format!("mux output {} does not exist, the mux has {}", select, MAX_MUX_SELECT + 1)));
    }
    self.window.write(MUX_SELECT, select);
    Ok(())
  }
}

///////////////////////////////////////////////

pub struct GtidUnit {
  window : Box<dyn RegisterWindow>,
}

impl GtidUnit {
  pub fn new(window : Box<dyn RegisterWindow>) -> Self {
    Self { window }
  }

  pub fn current(&self) -> u32 {
    self.window.read(GTID_CURRENT)
  }

  pub fn reset(&mut self) {
    strobe(&mut self.window, GTID_RESET);
  }

  /// Issue a software global trigger
  pub fn soft_gt(&mut self) {
    strobe(&mut self.window, SOFT_GT);
  }
}

/// The trigger FIFO. If it is empty, it keeps
/// returning the last record.
pub struct FifoUnit {
  window : Box<dyn RegisterWindow>,
}

impl FifoUnit {
  pub fn new(window : Box<dyn RegisterWindow>) -> Self {
    Self { window }
  }

  pub fn status(&self) -> u32 {
    self.window.read(FIFO_STATUS)
  }

  pub fn reset(&mut self) {
    strobe(&mut self.window, FIFO_RESET);
  }

  /// Read the head of the FIFO. The trigger word
  /// has to be read first, reading the GTID pops
  /// the record.
  pub fn pop(&mut self) -> TriggerRecord {
    let trig_word = self.window.read(FIFO_TRIGWORD);
    let gtid      = self.window.read(FIFO_GTID);
    TriggerRecord::new(gtid, trig_word)
  }
}

impl TriggerSource for FifoUnit {
  fn next_record(&mut self) -> TriggerRecord {
    self.pop()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::memory::{RegisterBus, SimBus};

  fn sim(name : &str) -> (Box<dyn RegisterWindow>, crate::memory::SimWindow) {
    let mut bus = SimBus::new();
    let window = bus.map(name, 0x43C0_0000, WINDOW_SIZE).unwrap();
    (window, bus.window(name).unwrap())
  }

  #[test]
  fn delay_conversion() {
    assert_eq!(ns_to_ticks(0.0), Ok(0));
    assert_eq!(ns_to_ticks(1530.0), Ok(153));
    assert_eq!(ns_to_ticks(14.9), Ok(1));
    assert_eq!(ns_to_ticks(655350.0), Ok(65535));
    assert!(ns_to_ticks(655360.0).is_err());
    assert!(ns_to_ticks(-10.0).is_err());
    assert!(ns_to_ticks(f32::NAN).is_err());
  }

  #[test]
  fn pulser_arithmetic() {
    assert_eq!(pulser_words(1.0, 0.5), Ok((100_000_000, 50_000_000)));
    assert_eq!(pulser_words(1000.0, 0.25), Ok((100_000, 75_000)));
    assert!(pulser_words(0.0, 0.5).is_err());
    assert!(pulser_words(60e6, 0.5).is_err());
    assert!(pulser_words(1000.0, 1.0).is_err());
    // 50 MHz is two ticks, 1% of that rounds to 0 ticks high
    assert!(pulser_words(50e6, 0.01).is_err());
  }

  #[test]
  fn pulser_reads_back() {
    let (window, _sim) = sim("pulser");
    let mut pulser = Pulser::new("generic", window);
    pulser.configure(1000.0, 0.25, 42).unwrap();
    assert_eq!(pulser.rate(), 1000);
    assert_eq!(pulser.width_ns(), 250_000);
    assert_eq!(pulser.width_fraction(), 0.25);
    assert_eq!(pulser.pulse_count(), 42);
  }

  #[test]
  fn rejected_pulser_leaves_registers_alone() {
    let (window, sim) = sim("pulser");
    let mut pulser = Pulser::new("generic", window);
    assert!(pulser.configure(-5.0, 0.5, 10).is_err());
    assert!(sim.writes().is_empty());
  }

  #[test]
  fn ecal_bit_keeps_the_rest() {
    let (window, sim) = sim("shift_regs");
    let mut regs = ShiftRegisters::new(window);
    regs.set_control_reg(58);
    regs.set_ecal(1).unwrap();
    assert_eq!(sim.peek(CONTROL_REG), 62);
    regs.set_ecal(0).unwrap();
    assert_eq!(sim.peek(CONTROL_REG), 58);
    assert!(regs.set_ecal(2).is_err());
  }

  #[test]
  fn mux_is_range_checked() {
    let (window, sim) = sim("shift_regs");
    let mut regs = ShiftRegisters::new(window);
    regs.set_mux(5).unwrap();
    regs.set_mux_enable(1).unwrap();
    regs.load_shift(0x99);
    regs.set_data_ready(1);
    assert_eq!(sim.writes(), vec![(MUX_SELECT, 5), (MUX_ENABLE, 1), (SHIFT_LOAD, 0x99), (SHIFT_DATA_READY, 1)]);
    assert!(matches!(regs.set_mux(8), Err(DeviceError::InvalidArgument(_))));
    assert!(matches!(regs.set_mux_enable(2), Err(DeviceError::InvalidArgument(_))));
    assert_eq!(sim.writes().len(), 4);
  }

  #[test]
  fn meta_trigger_error_flag() {
    let (window, sim) = sim("burst");
    let mut burst = MetaTrigger::new(MetaTriggerKind::Burst, window);
    assert!(burst.set_burst(100.0, 3).is_ok());
    assert_eq!(burst.params(), (100, 3));
    sim.poke(META_ERROR, 1);
    assert!(matches!(burst.set_burst(100.0, 3), Err(DeviceError::HardwareRejected(_))));
    assert!(matches!(burst.set_burst(100.0, 32), Err(DeviceError::InvalidArgument(_))));
    assert!(matches!(burst.set_burst(0.2, 3), Err(DeviceError::InvalidArgument(_))));
  }

  #[test]
  fn fifo_reads_trigword_before_gtid() {
    let (window, sim) = sim("fifo");
    let mut fifo = FifoUnit::new(window);
    sim.queue_reads(FIFO_TRIGWORD, &[0xAA]);
    sim.queue_reads(FIFO_GTID, &[17]);
    assert_eq!(fifo.pop(), TriggerRecord::new(17, 0xAA));
    let offsets : Vec<u32> = sim.accesses().iter().map(|a| match a {
      crate::memory::Access::Read {offset, ..}  => *offset,
      crate::memory::Access::Write {offset, ..} => *offset,
    }).collect();
    assert_eq!(offsets, vec![FIFO_TRIGWORD, FIFO_GTID]);
  }
}
