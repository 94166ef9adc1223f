//! Sources of heap memory.
//!
//! A [`ProgramBreak`] owns a region starting at [`start`](ProgramBreak::start)
//! whose upper bound only moves up. Everything the heap stores, headers
//! included, is reached through offsets from that start.

use std::slice;

use libc::{c_void, intptr_t, sbrk};
use log::{trace, warn};

use crate::error::HeapError;

pub trait ProgramBreak {
  /// Address of the first byte of the region.
  fn start(&self) -> usize;

  /// Current break, as an offset from [`start`](ProgramBreak::start).
  fn current(&self) -> usize;

  /// Moves the break up by `increment` bytes and returns the offset where
  /// the new memory begins.
  fn extend(
    &mut self,
    increment: usize,
  ) -> Result<usize, HeapError>;

  /// `len` bytes at `offset`. The range must lie inside memory returned by
  /// [`extend`](ProgramBreak::extend).
  fn bytes(
    &self,
    offset: usize,
    len: usize,
  ) -> &[u8];

  fn bytes_mut(
    &mut self,
    offset: usize,
    len: usize,
  ) -> &mut [u8];
}

/// The process program break, moved with `sbrk(2)`.
///
/// Other code in the process may move the break too (the system allocator
/// does). The region handed back by [`extend`](ProgramBreak::extend) then
/// starts past the end of the previous one and the heap sees a gap.
#[derive(Debug)]
pub struct Sbrk {
  start: usize,
  end: usize,
}

impl Sbrk {
  pub fn new() -> Self {
    let start = unsafe { sbrk(0) } as usize;
    trace!("sbrk: heap starts at {:#x}", start);
    Self { start, end: 0 }
  }
}

impl Default for Sbrk {
  fn default() -> Self {
    Self::new()
  }
}

impl ProgramBreak for Sbrk {
  fn start(&self) -> usize {
    self.start
  }

  fn current(&self) -> usize {
    (unsafe { sbrk(0) } as usize).saturating_sub(self.start)
  }

  fn extend(
    &mut self,
    increment: usize,
  ) -> Result<usize, HeapError> {
    let requested = increment;
    let Ok(delta) = intptr_t::try_from(increment) else {
      return Err(HeapError::OutOfMemory { requested });
    };

    let address = unsafe { sbrk(delta) };

    if sbrk_failed(address) {
      warn!("sbrk({}) failed", increment);
      return Err(HeapError::OutOfMemory { requested });
    }

    let address = address as usize;

    if self.end == 0 && address < self.start {
      self.start = address;
    }

    if address < self.start + self.end {
      // The break was lowered under memory we still hand out.
      warn!("program break moved below the heap end, refusing to grow");
      if sbrk_failed(unsafe { sbrk(-delta) }) {
        warn!("undoing sbrk({}) failed, the break stays raised", increment);
      }
      return Err(HeapError::OutOfMemory { requested });
    }

    let offset = address - self.start;
    trace!("sbrk({}) -> {:#x} (offset {})", increment, address, offset);
    self.end = offset + increment;

    Ok(offset)
  }

  fn bytes(
    &self,
    offset: usize,
    len: usize,
  ) -> &[u8] {
    debug_assert!(offset + len <= self.end);
    unsafe { slice::from_raw_parts((self.start + offset) as *const u8, len) }
  }

  fn bytes_mut(
    &mut self,
    offset: usize,
    len: usize,
  ) -> &mut [u8] {
    debug_assert!(offset + len <= self.end);
    unsafe { slice::from_raw_parts_mut((self.start + offset) as *mut u8, len) }
  }
}

/// `sbrk(2)` reports failure as `(void *) -1`.
fn sbrk_failed(address: *mut c_void) -> bool {
  address == usize::MAX as *mut c_void
}

/// A fixed-capacity byte region with its own break.
///
/// Useful for heaps that must not touch the process break, and for
/// deterministic tests: offsets are the same on every run.
#[derive(Debug)]
pub struct Arena {
  memory: Box<[u8]>,
  brk: usize,
}

impl Arena {
  pub fn new(capacity: usize) -> Self {
    Self {
      memory: vec![0; capacity].into_boxed_slice(),
      brk: 0,
    }
  }

  pub fn capacity(&self) -> usize {
    self.memory.len()
  }
}

impl ProgramBreak for Arena {
  fn start(&self) -> usize {
    self.memory.as_ptr() as usize
  }

  fn current(&self) -> usize {
    self.brk
  }

  fn extend(
    &mut self,
    increment: usize,
  ) -> Result<usize, HeapError> {
    if increment > self.memory.len() - self.brk {
      warn!(
        "arena exhausted: {} bytes requested, {} left",
        increment,
        self.memory.len() - self.brk
      );
      return Err(HeapError::OutOfMemory { requested: increment });
    }

    let offset = self.brk;
    self.brk += increment;
    trace!("arena break {} -> {}", offset, self.brk);

    Ok(offset)
  }

  fn bytes(
    &self,
    offset: usize,
    len: usize,
  ) -> &[u8] {
    &self.memory[offset..offset + len]
  }

  fn bytes_mut(
    &mut self,
    offset: usize,
    len: usize,
  ) -> &mut [u8] {
    &mut self.memory[offset..offset + len]
  }
}
