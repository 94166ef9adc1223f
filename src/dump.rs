use std::fmt;

use crate::{Heap, block::HEADER_SIZE, brk::ProgramBreak};

/// Human readable listing of a heap, one line per block.
///
/// ```text
/// start_heap = 0x55d4c5a1e000
/// >>>
/// Block 01: [OCCUPIED] size = 500 bytes
/// Block 02: [FREE] size = 468 bytes
/// >>>
/// brk = 0x55d4c5a1e408
/// ```
pub struct Dump<'a, B: ProgramBreak> {
  heap: &'a Heap<B>,
}

impl<B: ProgramBreak> fmt::Display for Dump<'_, B> {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    let brk = self.heap.break_source();

    writeln!(f, "start_heap = {:#x}", brk.start())?;
    writeln!(f, ">>>")?;
    for (i, block) in self.heap.blocks().enumerate() {
      writeln!(
        f,
        "Block {:02}: [{}] size = {} bytes",
        i + 1,
        if block.is_free { "FREE" } else { "OCCUPIED" },
        block.size
      )?;
    }
    writeln!(f, ">>>")?;
    write!(f, "brk = {:#x}", brk.start() + brk.current())
  }
}

/// Totals over every block of a heap.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapStats {
  pub blocks: usize,
  pub free_blocks: usize,
  /// Payload bytes in free blocks.
  pub free_bytes: usize,
  /// Payload bytes in occupied blocks.
  pub used_bytes: usize,
  /// Bytes from the heap start to its end, headers and gaps included.
  pub heap_size: usize,
  /// Bytes inside `heap_size` that belong to no block, left where
  /// something else moved the break between two extensions.
  pub gap_bytes: usize,
}

impl HeapStats {
  /// Bytes spent on headers.
  pub fn overhead(&self) -> usize {
    self.blocks * HEADER_SIZE
  }
}

impl<B: ProgramBreak> Heap<B> {
  pub fn display(&self) -> Dump<'_, B> {
    Dump { heap: self }
  }

  /// Prints [`display`](Heap::display) to stdout.
  pub fn dump(&self) {
    println!("{}", self.display());
  }

  /// `free_bytes + used_bytes + overhead() + gap_bytes == heap_size`.
  pub fn stats(&self) -> HeapStats {
    let mut stats = self.blocks().fold(
      HeapStats {
        heap_size: self.brk(),
        ..HeapStats::default()
      },
      |mut stats, block| {
        stats.blocks += 1;
        if block.is_free {
          stats.free_blocks += 1;
          stats.free_bytes += block.size;
        } else {
          stats.used_bytes += block.size;
        }
        stats
      },
    );
    stats.gap_bytes =
      stats.heap_size - stats.free_bytes - stats.used_bytes - stats.overhead();
    stats
  }
}
