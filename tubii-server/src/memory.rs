//! Register access through memory mapped windows
//!
//! On the board, the register windows of the
//! programmable logic are mapped from /dev/mem. Once
//! a window is mapped, reads and writes can not fail.
//! Accessing an offset outside of a window is a bug
//! and panics.
//!
//! For running without hardware there is [`SimBus`],
//! a register bank in plain memory which records every
//! access.

extern crate memmap;

use std::fs::File;
use std::ptr;
use std::rc::Rc;
use std::cell::RefCell;
use std::collections::{
    HashMap,
    VecDeque,
};

use memmap::MmapMut;

use tubii_dataclasses::errors::MappingError;

/// Pages have to be aligned on this boundary
pub const PAGE_SIZE : u64 = 4096;

/// The size of a 32bit unsigned int in byte
/// (all words in registers are u32)
pub const SIZEOF_U32 : usize = 4;

/// A mapped window of 32bit registers
pub trait RegisterWindow {
  fn name(&self) -> &str;

  /// Size of the window in bytes
  fn len(&self) -> usize;

  /// Read the register at the byte offset
  fn read(&self, offset : u32) -> u32;

  /// Write the register at the byte offset
  fn write(&mut self, offset : u32, value : u32);
}

/// Something which can map register windows
pub trait RegisterBus {
  /// Map limit bytes starting at the physical address base
  fn map(&mut self, name : &str, base : u64, limit : usize)
    -> Result<Box<dyn RegisterWindow>, MappingError>;
}

/// Panic if the offset does not address a
/// full word inside the window
fn check_offset(window : &str, len : usize, offset : u32) {
  assert!(offset as usize % SIZEOF_U32 == 0 && offset as usize + SIZEOF_U32 <= len,
          "Register offset {:#x} is outside of window {} ({:#x} bytes)!", offset, window, len);
}

fn check_window(name : &str, base : u64, limit : usize) -> Result<(), MappingError> {
  if limit == 0 || limit % SIZEOF_U32 != 0 || base % PAGE_SIZE != 0 {
    return Err(MappingError::InvalidWindow {
      window : String::from(name),
      base,
      limit
    });
  }
  Ok(())
}

///////////////////////////////////////////////

/// Maps windows of the physical address space
/// through a memory device, usually /dev/mem
#[derive(Debug)]
pub struct DevMemBus {
  pub device : String,
  mapped     : Vec<(u64, usize)>,
}

impl DevMemBus {
  pub fn new(device : &str) -> Self {
    Self {
      device : String::from(device),
      mapped : Vec::<(u64, usize)>::new(),
    }
  }
}

impl RegisterBus for DevMemBus {

  fn map(&mut self, name : &str, base : u64, limit : usize)
    -> Result<Box<dyn RegisterWindow>, MappingError> {
    check_window(name, base, limit)?;
    for (other_base, other_limit) in &self.mapped {
      if base < other_base + *other_limit as u64 && *other_base < base + limit as u64 {
        return Err(MappingError::Mmap {
          window : String::from(name),
          reason : format!("overlaps with the window at {:#x}", other_base)
        });
      }
    }
    let file = match File::options()
      .read(true)
      .write(true)
      .open(&self.device) {
      Err(err) => {
        return Err(MappingError::DeviceOpen {
          path   : self.device.clone(),
          reason : err.to_string()
        });
      }
      Ok(file) => file
    };
    // SAFETY: the window is a register bank, which is
    // not touched by anything else in this process
    let mmap = unsafe {
      memmap::MmapOptions::new()
        .offset(base)
        .len(limit)
        .map_mut(&file)
    };
    match mmap {
      Err(err) => {
        Err(MappingError::Mmap {
          window : String::from(name),
          reason : err.to_string()
        })
      }
      Ok(mmap) => {
        debug!("Mapped window {} at {:#x} ({:#x} bytes)", name, base, limit);
        self.mapped.push((base, limit));
        Ok(Box::new(DevMemWindow {
          name : String::from(name),
          mmap
        }))
      }
    }
  }
}

/// A register window in the physical address space.
/// Unmapped when dropped.
pub struct DevMemWindow {
  name : String,
  mmap : MmapMut,
}

impl RegisterWindow for DevMemWindow {

  fn name(&self) -> &str {
    &self.name
  }

  fn len(&self) -> usize {
    self.mmap.len()
  }

  fn read(&self, offset : u32) -> u32 {
    check_offset(&self.name, self.mmap.len(), offset);
    let p = self.mmap.as_ptr() as *const u32;
    unsafe {
      ptr::read_volatile(p.add(offset as usize / SIZEOF_U32))
    }
  }

  fn write(&mut self, offset : u32, value : u32) {
    check_offset(&self.name, self.mmap.len(), offset);
    let p = self.mmap.as_mut_ptr() as *mut u32;
    unsafe {
      ptr::write_volatile(p.add(offset as usize / SIZEOF_U32), value);
    }
  }
}

///////////////////////////////////////////////

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Access {
  Read  { offset : u32, value : u32 },
  Write { offset : u32, value : u32 },
}

/// Register bank of a simulated window
#[derive(Debug, Default)]
pub struct SimBank {
  pub registers : Vec<u32>,
  /// Values handed out by subsequent reads of an
  /// offset. Once a queue runs dry, the last value
  /// stays in the register, which is what the FIFO
  /// does when it is empty.
  pub reads     : HashMap<u32, VecDeque<u32>>,
  pub log       : Vec<Access>,
}

/// A simulated register window. Clones share
/// the same bank.
#[derive(Debug, Clone)]
pub struct SimWindow {
  name : String,
  bank : Rc<RefCell<SimBank>>,
}

impl SimWindow {
  pub fn new(name : &str, limit : usize) -> Self {
    let bank = SimBank {
      registers : vec![0u32; limit / SIZEOF_U32],
      ..SimBank::default()
    };
    Self {
      name : String::from(name),
      bank : Rc::new(RefCell::new(bank)),
    }
  }

  /// Look at a register without logging the access
  pub fn peek(&self, offset : u32) -> u32 {
    self.bank.borrow().registers[offset as usize / SIZEOF_U32]
  }

  /// Set a register without logging the access,
  /// e.g. a status register set by the hardware
  pub fn poke(&self, offset : u32, value : u32) {
    self.bank.borrow_mut().registers[offset as usize / SIZEOF_U32] = value;
  }

  /// Queue values for the following reads of offset
  pub fn queue_reads(&self, offset : u32, values : &[u32]) {
    self.bank.borrow_mut().reads
      .entry(offset)
      .or_default()
      .extend(values.iter().copied());
  }

  pub fn accesses(&self) -> Vec<Access> {
    self.bank.borrow().log.clone()
  }

  pub fn writes(&self) -> Vec<(u32, u32)> {
    self.bank.borrow().log.iter().filter_map(|access| {
      match access {
        Access::Write {offset, value} => Some((*offset, *value)),
        Access::Read {..} => None
      }
    }).collect()
  }

  pub fn clear_log(&self) {
    self.bank.borrow_mut().log.clear();
  }
}

impl RegisterWindow for SimWindow {

  fn name(&self) -> &str {
    &self.name
  }

  fn len(&self) -> usize {
    self.bank.borrow().registers.len() * SIZEOF_U32
  }

  fn read(&self, offset : u32) -> u32 {
    check_offset(&self.name, self.len(), offset);
    let mut bank = self.bank.borrow_mut();
    let index = offset as usize / SIZEOF_U32;
    let queued = bank.reads.get_mut(&offset).and_then(|queue| queue.pop_front());
    if let Some(value) = queued {
      bank.registers[index] = value;
    }
    let value = bank.registers[index];
    bank.log.push(Access::Read {offset, value});
    value
  }

  fn write(&mut self, offset : u32, value : u32) {
    check_offset(&self.name, self.len(), offset);
    let mut bank = self.bank.borrow_mut();
    bank.registers[offset as usize / SIZEOF_U32] = value;
    bank.log.push(Access::Write {offset, value});
  }
}

/// A register bus without hardware. Every mapped
/// window stays accessible by its name.
#[derive(Debug, Default)]
pub struct SimBus {
  windows : HashMap<String, SimWindow>,
}

impl SimBus {
  pub fn new() -> Self {
    Self {
      windows : HashMap::<String, SimWindow>::new()
    }
  }

  /// The window mapped under this name
  pub fn window(&self, name : &str) -> Option<SimWindow> {
    self.windows.get(name).cloned()
  }

  /// Clear the access logs of all windows
  pub fn clear_logs(&self) {
    for window in self.windows.values() {
      window.clear_log();
    }
  }

  /// Number of logged accesses over all windows
  pub fn n_accesses(&self) -> usize {
    self.windows.values().map(|w| w.bank.borrow().log.len()).sum()
  }
}

impl RegisterBus for SimBus {

  fn map(&mut self, name : &str, base : u64, limit : usize)
    -> Result<Box<dyn RegisterWindow>, MappingError> {
    check_window(name, base, limit)?;
    if self.windows.contains_key(name) {
      return Err(MappingError::Mmap {
        window : String::from(name),
        reason : String::from("already mapped")
      });
    }
    trace!("Simulating window {} at {:#x}", name, base);
    let window = SimWindow::new(name, limit);
    self.windows.insert(String::from(name), window.clone());
    Ok(Box::new(window))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn queued_reads_repeat_last_value() {
    let mut bus = SimBus::new();
    let window = bus.map("fifo", 0x43C5_0000, 0x10000).unwrap();
    let sim = bus.window("fifo").unwrap();
    sim.queue_reads(4, &[5, 6]);
    assert_eq!(window.read(4), 5);
    assert_eq!(window.read(4), 6);
    assert_eq!(window.read(4), 6);
    assert_eq!(sim.accesses().len(), 3);
  }

  #[test]
  fn windows_map_once() {
    let mut bus = SimBus::new();
    assert!(bus.map("clocks", 0x43C1_0000, 0x10000).is_ok());
    assert!(bus.map("clocks", 0x43C1_0000, 0x10000).is_err());
    assert!(matches!(bus.map("odd", 0x43C1_0010, 0x10000),
                     Err(MappingError::InvalidWindow {..})));
  }

  #[test]
  #[should_panic]
  fn offset_outside_window_panics() {
    let mut bus = SimBus::new();
    let mut window = bus.map("clocks", 0x43C1_0000, 0x10).unwrap();
    window.write(0x10, 1);
  }

  #[test]
  fn missing_device_is_a_mapping_error() {
    let mut bus = DevMemBus::new("/nonexistent/mem");
    assert!(matches!(bus.map("clocks", 0x43C1_0000, 0x10000),
                     Err(MappingError::DeviceOpen {..})));
  }
}
