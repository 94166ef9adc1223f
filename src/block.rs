use std::mem;

use bytemuck::{Pod, Zeroable};

/// Offset of the sentinel list head. It never names real heap memory.
pub const HEAD: usize = usize::MAX;

/// Bytes taken by a [`Header`] in front of every payload.
pub const HEADER_SIZE: usize = mem::size_of::<Header>();

/// Metadata stored in the heap bytes at the start of every block.
///
/// Links are offsets from the heap start, or [`HEAD`].
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, Default, PartialEq, Eq)]
pub struct Header {
  pub size: usize,
  pub free: usize,
  pub next: usize,
  pub prev: usize,
}

impl Header {
  pub fn new(
    size: usize,
    is_free: bool,
  ) -> Self {
    Self {
      size,
      free: is_free as usize,
      next: HEAD,
      prev: HEAD,
    }
  }

  pub fn is_free(&self) -> bool {
    self.free != 0
  }

  pub fn set_free(
    &mut self,
    is_free: bool,
  ) {
    self.free = is_free as usize;
  }

  pub fn decode(bytes: &[u8]) -> Self {
    bytemuck::pod_read_unaligned(bytes)
  }

  pub fn encode(&self) -> &[u8] {
    bytemuck::bytes_of(self)
  }
}

/// Read-only view of one block, as yielded by [`Heap::blocks`](crate::Heap::blocks).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Block {
  /// Offset of the header from the heap start.
  pub offset: usize,
  /// Usable payload bytes.
  pub size: usize,
  pub is_free: bool,
}

impl Block {
  /// Offset of the first byte after the payload.
  pub fn end(&self) -> usize {
    self.offset + HEADER_SIZE + self.size
  }
}

/// Handle to an allocated payload.
///
/// It records which heap issued it and where the payload starts, so a
/// handle from another heap is rejected instead of corrupting the list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Payload {
  pub(crate) heap: usize,
  pub(crate) offset: usize,
}

impl Payload {
  /// Offset of the payload from the heap start.
  pub fn offset(&self) -> usize {
    self.offset
  }

  pub(crate) fn header(&self) -> Option<usize> {
    self.offset.checked_sub(HEADER_SIZE)
  }
}
