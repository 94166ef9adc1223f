//! The circular, address-ordered list of block headers.
//!
//! ```text
//!          ┌──────────────────────────────────────────────────────┐
//!          ▼                                                      │
//!   ┌────────────┐ next ┌────────────┐ next ┌────────────┐ next   │
//!   │    HEAD    │─────►│ block @ 0  │─────►│ block @ 536│────────┘
//!   │ (sentinel) │◄─────│            │◄─────│            │
//!   └────────────┘ prev └────────────┘ prev └────────────┘
//!         ▲                                       │ prev
//!         └───────────────────────────────────────┘
//! ```
//!
//! `HEAD` lives in the [`Heap`] struct (`first`/`last`); every other node is
//! a [`Header`] stored in heap memory.

use std::iter::FusedIterator;

use log::trace;

use crate::{
  Heap,
  block::{Block, HEAD, HEADER_SIZE, Header},
  brk::ProgramBreak,
};

impl<B: ProgramBreak> Heap<B> {
  pub(crate) fn header(
    &self,
    block: usize,
  ) -> Header {
    Header::decode(self.brk.bytes(block, HEADER_SIZE))
  }

  pub(crate) fn write_header(
    &mut self,
    block: usize,
    header: Header,
  ) {
    self
      .brk
      .bytes_mut(block, HEADER_SIZE)
      .copy_from_slice(header.encode());
  }

  fn set_next(
    &mut self,
    node: usize,
    next: usize,
  ) {
    if node == HEAD {
      self.first = next;
    } else {
      let mut header = self.header(node);
      header.next = next;
      self.write_header(node, header);
    }
  }

  fn set_prev(
    &mut self,
    node: usize,
    prev: usize,
  ) {
    if node == HEAD {
      self.last = prev;
    } else {
      let mut header = self.header(node);
      header.prev = prev;
      self.write_header(node, header);
    }
  }

  /// First free block, in address order, holding at least `size` bytes.
  pub(crate) fn find_free_block(
    &self,
    size: usize,
  ) -> Option<usize> {
    let mut current = self.first;

    while current != HEAD {
      let header = self.header(current);
      if header.is_free() && header.size >= size {
        return Some(current);
      }
      current = header.next;
    }

    None
  }

  /// Splices the header at `block` between `prev` and `next`.
  pub(crate) fn insert(
    &mut self,
    block: usize,
    prev: usize,
    next: usize,
  ) {
    trace!("list: insert {} between {} and {}", block, prev, next);

    self.set_prev(next, block);

    let mut header = self.header(block);
    header.next = next;
    header.prev = prev;
    self.write_header(block, header);

    self.set_next(prev, block);
  }

  pub(crate) fn insert_tail(
    &mut self,
    block: usize,
  ) {
    self.insert(block, self.last, HEAD);
  }

  /// Unlinks the header at `block`. Its bytes are left as they are.
  pub(crate) fn remove(
    &mut self,
    block: usize,
  ) {
    trace!("list: remove {}", block);

    let header = self.header(block);
    self.set_next(header.prev, header.next);
    self.set_prev(header.next, header.prev);
  }

  /// Whether a header of this heap starts at `block`.
  pub(crate) fn contains(
    &self,
    block: usize,
  ) -> bool {
    self
      .blocks()
      .take_while(|b| b.offset <= block)
      .any(|b| b.offset == block)
  }

  /// Every block, in address order. Iterate with `.rev()` to walk the
  /// `prev` links instead.
  pub fn blocks(&self) -> Blocks<'_, B> {
    Blocks {
      heap: self,
      front: self.first,
      back: self.last,
      done: self.first == HEAD,
    }
  }

  /// Panics unless the list is circular in both directions, ordered and
  /// free of overlapping blocks.
  #[cfg(test)]
  pub(crate) fn assert_well_formed(&self) {
    let forward: Vec<Block> = self.blocks().collect();
    let mut backward: Vec<Block> = self.blocks().rev().collect();
    backward.reverse();
    assert_eq!(forward, backward);

    let mut current = self.first;
    let mut prev = HEAD;
    let mut steps = 0;
    while current != HEAD {
      let header = self.header(current);
      assert_eq!(header.prev, prev, "broken prev link at {}", current);
      prev = current;
      current = header.next;
      steps += 1;
      assert!(steps <= forward.len(), "list does not return to HEAD");
    }
    assert_eq!(self.last, prev);

    for pair in forward.windows(2) {
      assert!(pair[0].end() <= pair[1].offset, "{:?} overlaps {:?}", pair[0], pair[1]);
    }
    if let Some(tail) = forward.last() {
      assert!(tail.end() <= self.end);
    }
  }
}

/// Iterator returned by [`Heap::blocks`].
pub struct Blocks<'a, B: ProgramBreak> {
  heap: &'a Heap<B>,
  front: usize,
  back: usize,
  done: bool,
}

impl<B: ProgramBreak> Iterator for Blocks<'_, B> {
  type Item = Block;

  fn next(&mut self) -> Option<Block> {
    if self.done {
      return None;
    }

    let offset = self.front;
    let header = self.heap.header(offset);
    if offset == self.back {
      self.done = true;
    } else {
      self.front = header.next;
    }

    Some(Block {
      offset,
      size: header.size,
      is_free: header.is_free(),
    })
  }
}

impl<B: ProgramBreak> DoubleEndedIterator for Blocks<'_, B> {
  fn next_back(&mut self) -> Option<Block> {
    if self.done {
      return None;
    }

    let offset = self.back;
    let header = self.heap.header(offset);
    if offset == self.front {
      self.done = true;
    } else {
      self.back = header.prev;
    }

    Some(Block {
      offset,
      size: header.size,
      is_free: header.is_free(),
    })
  }
}

impl<B: ProgramBreak> FusedIterator for Blocks<'_, B> {}
