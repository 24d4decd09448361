//! Register map of the TUBii programmable logic
//!
//! Every hardware function sits in its own 64 kB AXI
//! window. Registers are 32bit words, so register N of
//! a window lives at byte offset 4*N.
//!
//! Unused register numbers inside a window are not
//! listed.

/// Size of every register window in bytes
pub const WINDOW_SIZE : usize = 0x10000;

/// Byte offset of register n
pub const fn reg(n : u32) -> u32 {
  4*n
}

//========== shift registers =============
//
// control register, CAEN attenuator words,
// discriminator threshold and GT delays are
// shifted into the board through this window
//=========================================

pub const SHIFT_REGS_BASE     : u64 = 0x43C0_0000;
/// raw access to the shift register chain
pub const SHIFT_DATA_READY    : u32 = reg(0);
pub const SHIFT_LOAD          : u32 = reg(1);
pub const MUX_ENABLE          : u32 = reg(2);
pub const MUX_SELECT          : u32 = reg(3);
pub const CONTROL_REG         : u32 = reg(10);
pub const CAEN_GAIN_PATH      : u32 = reg(11);
pub const CAEN_CHANNEL_SELECT : u32 = reg(12);
pub const DAC_THRESHOLD       : u32 = reg(13);
/// LO* (lockout) delay
pub const LO_DELAY            : u32 = reg(14);
pub const DGT_DELAY           : u32 = reg(15);

/// ECal bit inside the control register
pub const CONTROL_ECAL_BIT    : u32 = 0x4;
/// The mux picks one of 8 shift registers
pub const MAX_MUX_SELECT      : u32 = 7;

//=============== clocks =================

pub const CLOCKS_BASE         : u64 = 0x43C1_0000;
/// write 0 or 1
pub const CLOCK_RESET         : u32 = reg(0);
pub const CLOCK_STATUS        : u32 = reg(1);
pub const CLOCK_MISSES        : u32 = reg(2);

//============== counters ================

pub const COUNTERS_BASE       : u64 = 0x43C2_0000;
pub const COUNTER_LATCH       : u32 = reg(0);
pub const COUNTER_RESET       : u32 = reg(1);
/// 1 is rate mode, latched every status tick
pub const COUNTER_MODE        : u32 = reg(2);

//============ trigger outputs ===========

pub const TRIGGER_OUT_BASE    : u64 = 0x43C3_0000;
pub const TRIGGER_MASK        : u32 = reg(0);
pub const SPEAKER_MASK        : u32 = reg(1);
pub const COUNTER_MASK        : u32 = reg(2);
pub const CURRENT_TRIGGER     : u32 = reg(3);

//================ GTID ==================

pub const GTID_BASE           : u64 = 0x43C4_0000;
pub const GTID_CURRENT        : u32 = reg(0);
pub const GTID_RESET          : u32 = reg(1);
pub const SOFT_GT             : u32 = reg(2);

//================ FIFO ==================

pub const FIFO_BASE           : u64 = 0x43C5_0000;
pub const FIFO_TRIGWORD       : u32 = reg(0);
/// reading this register pops the FIFO
pub const FIFO_GTID           : u32 = reg(1);
pub const FIFO_STATUS         : u32 = reg(2);
pub const FIFO_RESET          : u32 = reg(3);

//============ speaker prescale ==========

pub const SPEAKER_SCALE_BASE  : u64 = 0x43C6_0000;
pub const SPEAKER_SCALE       : u32 = reg(0);

//============ meta triggers =============
//
// burst, combo and prescale share a layout,
// register 1 flags rejected settings
//=========================================

pub const BURST_BASE          : u64 = 0x43C7_0000;
pub const BUTTON_BASE         : u64 = 0x43C8_0000;
pub const COMBO_BASE          : u64 = 0x43C9_0000;
pub const PRESCALE_BASE       : u64 = 0x43CA_0000;

pub const META_ERROR          : u32 = reg(1);
/// burst rate [Hz], combo enable mask, prescale factor
pub const META_PARAM_A        : u32 = reg(2);
/// burst channel, combo logic mask, prescale channel
pub const META_PARAM_B        : u32 = reg(3);
pub const BUTTON_FIRE         : u32 = reg(0);

//=============== pulsers ================

pub const GENERIC_PULSER_BASE : u64 = 0x43CB_0000;
pub const SMELLIE_PULSER_BASE : u64 = 0x43CC_0000;
pub const TELLIE_PULSER_BASE  : u64 = 0x43CD_0000;
pub const MZHAPPY_PULSER_BASE : u64 = 0x43CE_0000;

/// clock ticks the output stays low, period - high
pub const PULSER_LOW          : u32 = reg(0);
pub const PULSER_PERIOD       : u32 = reg(1);
pub const PULSER_LOAD         : u32 = reg(2);
pub const PULSER_COUNT        : u32 = reg(3);

//================ delays ================

pub const GENERIC_DELAY_BASE  : u64 = 0x43CF_0000;
pub const SMELLIE_DELAY_BASE  : u64 = 0x43D0_0000;
pub const TELLIE_DELAY_BASE   : u64 = 0x43D1_0000;
pub const GT_DELAY_BASE       : u64 = 0x43D2_0000;
pub const TRIGWORD_DELAY_BASE : u64 = 0x43D3_0000;

pub const DELAY_TICKS         : u32 = reg(3);

//=============== timing =================

/// The fabric runs at 100 MHz
pub const CLOCK_HZ            : f64 = 100e6;
pub const NS_PER_TICK         : f32 = 10.0;
pub const MAX_DELAY_TICKS     : u32 = 0xFFFF;
pub const MAX_PULSER_RATE_HZ  : f32 = 50e6;
