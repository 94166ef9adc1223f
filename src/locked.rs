use spin::{Mutex, MutexGuard};

use crate::{
  Heap,
  block::Payload,
  brk::{ProgramBreak, Sbrk},
  error::HeapError,
};

/// A [`Heap`] behind a single spin lock.
///
/// The lock covers the whole operation: the list walk, splicing, and the
/// call that moves the break.
pub struct LockedHeap<B: ProgramBreak = Sbrk> {
  inner: Mutex<Heap<B>>,
}

impl LockedHeap<Sbrk> {
  pub fn new() -> Self {
    Self::with_heap(Heap::new())
  }
}

impl Default for LockedHeap<Sbrk> {
  fn default() -> Self {
    Self::new()
  }
}

impl<B: ProgramBreak> LockedHeap<B> {
  pub fn with_heap(heap: Heap<B>) -> Self {
    Self {
      inner: Mutex::new(heap),
    }
  }

  /// Exclusive access for a sequence of operations.
  pub fn lock(&self) -> MutexGuard<'_, Heap<B>> {
    self.inner.lock()
  }

  pub fn allocate(
    &self,
    size: usize,
  ) -> Result<Payload, HeapError> {
    self.inner.lock().allocate(size)
  }

  pub fn release(
    &self,
    payload: Payload,
  ) -> Result<(), HeapError> {
    self.inner.lock().release(payload)
  }

  pub fn dump(&self) {
    self.inner.lock().dump();
  }

  pub fn into_inner(self) -> Heap<B> {
    self.inner.into_inner()
  }
}
