//! Control and trigger readout for the TUBii board
//!
//! * registers - register map of the programmable logic
//! * memory    - mapping register windows (/dev/mem or simulated)
//! * control   - the individual hardware units (clock, pulsers, ...)
//! * device    - the board as a whole, init sequence and snapshots
//! * readout   - draining the trigger FIFO into MegaRecords
//! * commands  - the command protocol
//! * server    - the event loop tying everything together
//!

pub mod registers;
pub mod memory;
pub mod control;
pub mod device;
pub mod readout;
pub mod commands;
pub mod server;

#[macro_use] extern crate log;

pub use memory::{
    RegisterBus,
    RegisterWindow,
    DevMemBus,
    SimBus,
};
pub use device::DeviceModel;
pub use readout::FifoReadoutEngine;
pub use commands::{
    CommandDispatcher,
    Reply,
};
pub use server::TubiiServer;
