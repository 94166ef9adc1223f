use std::{error, fmt};

/// Failures reported by a [`Heap`](crate::Heap).
///
/// Neither variant leaves the block list in a different state than before
/// the failing call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeapError {
  /// The break could not be moved far enough to hold `requested` bytes
  /// (header included).
  OutOfMemory { requested: usize },
  /// The handle does not name an occupied block of this heap.
  InvalidFree { offset: usize },
}

impl fmt::Display for HeapError {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    match self {
      HeapError::OutOfMemory { requested } => {
        write!(f, "out of memory: cannot extend heap by {} bytes", requested)
      }
      HeapError::InvalidFree { offset } => {
        write!(f, "invalid free of payload at offset {:#x}", offset)
      }
    }
  }
}

impl error::Error for HeapError {}
