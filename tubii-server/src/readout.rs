//! Trigger readout
//!
//! On every readout tick the FIFO is read a fixed number
//! of times. The FIFO keeps handing out its last record
//! when it is empty, so a record with the GTID we saw
//! last is not a new trigger. New records are collected
//! into a MegaRecord, in the order they were read, and
//! checked for gaps in the GTID sequence.

use std::fmt;

use tubii_dataclasses::records::{
    TriggerRecord,
    MegaRecord,
    StatusRecord,
};

use crate::device::DeviceModel;

/// Anything which hands out trigger records,
/// one per call
pub trait TriggerSource {
  fn next_record(&mut self) -> TriggerRecord;
}

/// GTIDs between last and next were never seen
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct GtidGap {
  pub last : u32,
  pub next : u32,
}

impl GtidGap {
  pub fn first_missing(&self) -> u32 {
    self.last.wrapping_add(1)
  }

  pub fn last_missing(&self) -> u32 {
    self.next.wrapping_sub(1)
  }

  pub fn n_missing(&self) -> u32 {
    self.next.wrapping_sub(self.last).wrapping_sub(1)
  }
}

impl fmt::Display for GtidGap {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "<GtidGap: {} -> {}, missed {}..={}>",
           self.last, self.next, self.first_missing(), self.last_missing())
  }
}

/// Result of one readout tick
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TickReport {
  /// New records, None if there were none
  pub batch     : Option<MegaRecord>,
  pub gaps      : Vec<GtidGap>,
  /// new records which did not fit into the batch
  pub discarded : usize,
}

#[derive(Debug, Clone)]
pub struct FifoReadoutEngine {
  last_gtid       : u32,
  seen_any        : bool,
  read_budget     : usize,
  capacity        : usize,
  pub n_records   : u64,
  pub n_batches   : u64,
  pub n_gaps      : u64,
  pub n_discarded : u64,
}

impl FifoReadoutEngine {

  /// # Arguments
  ///
  /// * read_budget : FIFO reads per tick
  /// * capacity    : maximum number of records per batch
  pub fn new(read_budget : usize, capacity : usize) -> Self {
    Self {
      last_gtid   : 0,
      seen_any    : false,
      read_budget,
      capacity,
      n_records   : 0,
      n_batches   : 0,
      n_gaps      : 0,
      n_discarded : 0,
    }
  }

  /// The GTID of the last record which was taken
  pub fn last_gtid(&self) -> u32 {
    self.last_gtid
  }

  /// Check a new record against the one before
  fn check_gap(&self, gtid : u32) -> Option<GtidGap> {
    // 0 and 1 show up after GTID resets
    if !self.seen_any || gtid == 0 || gtid == 1 {
      return None;
    }
    if gtid == self.last_gtid.wrapping_add(1) {
      return None;
    }
    Some(GtidGap {
      last : self.last_gtid,
      next : gtid
    })
  }

  /// Drain the source for one tick
  pub fn tick(&mut self, source : &mut dyn TriggerSource) -> TickReport {
    let mut report = TickReport::default();
    let mut batch  = MegaRecord::with_capacity(self.capacity.min(self.read_budget));
    for _ in 0..self.read_budget {
      let record = source.next_record();
      if record.gtid == self.last_gtid {
        continue;
      }
      if let Some(gap) = self.check_gap(record.gtid) {
        warn!("GTID gap after {}, missed {} to {} ({} triggers)",
              gap.last, gap.first_missing(), gap.last_missing(), gap.n_missing());
        report.gaps.push(gap);
      }
      self.last_gtid = record.gtid;
      self.seen_any  = true;
      if batch.records.len() < self.capacity {
        batch.records.push(record);
      } else {
        report.discarded += 1;
      }
    }
    if report.discarded > 0 {
      warn!("Batch full, discarded {} records up to GTID {}", report.discarded, self.last_gtid);
    }
    self.n_records   += batch.records.len() as u64;
    self.n_gaps      += report.gaps.len() as u64;
    self.n_discarded += report.discarded as u64;
    if !batch.is_empty() {
      self.n_batches += 1;
      trace!("Read {}", batch);
      report.batch = Some(batch);
    }
    report
  }

  /// Build the status record. If the counters are in
  /// rate mode, they get latched first.
  pub fn status(&self, device : &mut DeviceModel) -> StatusRecord {
    if device.counters.in_rate_mode() {
      device.counters.pulse_latch();
    }
    StatusRecord {
      clock        : device.clock.status(),
      last_gtid    : self.last_gtid,
      current_gtid : device.gtid.current(),
      fifo_state   : device.fifo.status(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::VecDeque;

  /// Hands out the given GTIDs, then repeats the last one
  struct Replay {
    gtids : VecDeque<u32>,
    last  : u32,
  }

  impl Replay {
    fn new(gtids : &[u32]) -> Self {
      Self {
        gtids : gtids.iter().copied().collect(),
        last  : 0,
      }
    }
  }

  impl TriggerSource for Replay {
    fn next_record(&mut self) -> TriggerRecord {
      if let Some(gtid) = self.gtids.pop_front() {
        self.last = gtid;
      }
      TriggerRecord::new(self.last, self.last ^ 0xFF)
    }
  }

  /// Engine which has already seen GTID start
  fn primed(start : u32) -> FifoReadoutEngine {
    let mut engine = FifoReadoutEngine::new(1000, 1000);
    engine.tick(&mut Replay::new(&[start]));
    engine
  }

  fn gtids(report : &TickReport) -> Vec<u32> {
    match &report.batch {
      None => Vec::new(),
      Some(batch) => batch.records.iter().map(|r| r.gtid).collect()
    }
  }

  #[test]
  fn gap_is_reported() {
    let mut engine = primed(4);
    let report = engine.tick(&mut Replay::new(&[5, 7]));
    assert_eq!(report.gaps, vec![GtidGap { last : 5, next : 7 }]);
    assert_eq!(report.gaps[0].first_missing(), 6);
    assert_eq!(report.gaps[0].last_missing(), 6);
    assert_eq!(gtids(&report), vec![5, 7]);
  }

  #[test]
  fn consecutive_gtids_have_no_gap() {
    let mut engine = primed(4);
    let report = engine.tick(&mut Replay::new(&[5, 6, 7]));
    assert!(report.gaps.is_empty());
    assert_eq!(gtids(&report), vec![5, 6, 7]);
  }

  #[test]
  fn wrap_is_not_a_gap() {
    let mut engine = primed(0xFFFF_FFFD);
    let report = engine.tick(&mut Replay::new(&[0xFFFF_FFFE, 0xFFFF_FFFF, 0]));
    assert!(report.gaps.is_empty());
    assert_eq!(gtids(&report), vec![0xFFFF_FFFE, 0xFFFF_FFFF, 0]);
    assert_eq!(engine.last_gtid(), 0);
  }

  #[test]
  fn gtid_reset_is_not_a_gap() {
    let mut engine = primed(500);
    let report = engine.tick(&mut Replay::new(&[1, 2]));
    assert!(report.gaps.is_empty());
  }

  #[test]
  fn first_record_is_not_a_gap() {
    let mut engine = FifoReadoutEngine::new(1000, 1000);
    let report = engine.tick(&mut Replay::new(&[1234]));
    assert!(report.gaps.is_empty());
    assert_eq!(gtids(&report), vec![1234]);
  }

  #[test]
  fn idle_fifo_emits_nothing() {
    let mut engine = primed(9);
    // an empty FIFO keeps returning its last record
    let report = engine.tick(&mut Replay::new(&[9]));
    assert_eq!(report.batch, None);
    assert_eq!(engine.n_batches, 1);
  }

  #[test]
  fn one_batch_per_tick() {
    let mut engine = primed(99);
    let new : Vec<u32> = (100..350).collect();
    let report = engine.tick(&mut Replay::new(&new));
    let batch = report.batch.unwrap();
    assert_eq!(batch.count(), 250);
    assert_eq!(report.discarded, 0);
  }

  #[test]
  fn overflow_drops_newest() {
    let mut engine = FifoReadoutEngine::new(10, 4);
    let report = engine.tick(&mut Replay::new(&[1, 2, 3, 4, 5, 6, 7]));
    assert_eq!(gtids(&report), vec![1, 2, 3, 4]);
    assert_eq!(report.discarded, 3);
    assert_eq!(engine.last_gtid(), 7);
    let report = engine.tick(&mut Replay::new(&[8]));
    assert!(report.gaps.is_empty());
    assert_eq!(gtids(&report), vec![8]);
  }

  #[test]
  fn read_budget_bounds_a_tick() {
    let mut engine = FifoReadoutEngine::new(3, 1000);
    let mut source = Replay::new(&[1, 2, 3, 4, 5]);
    assert_eq!(gtids(&engine.tick(&mut source)), vec![1, 2, 3]);
    assert_eq!(gtids(&engine.tick(&mut source)), vec![4, 5]);
  }
}
