use std::sync::atomic::{AtomicUsize, Ordering};

use log::{debug, warn};

use crate::{
  block::{HEAD, HEADER_SIZE, Header, Payload},
  brk::{ProgramBreak, Sbrk},
  config::HeapConfig,
  error::HeapError,
};

/// Largest request that still leaves room for a header without
/// overflowing.
const MAX_REQUEST: usize = isize::MAX as usize - HEADER_SIZE;

static NEXT_HEAP_ID: AtomicUsize = AtomicUsize::new(0);

/// A first-fit heap with splitting and coalescing, grown through a
/// [`ProgramBreak`].
///
/// The heap never gives memory back to its break source: freed blocks stay
/// in the list until they are reused or merged into a neighbour.
pub struct Heap<B: ProgramBreak = Sbrk> {
  pub(crate) id: usize,
  pub(crate) brk: B,
  /// `next` link of the sentinel.
  pub(crate) first: usize,
  /// `prev` link of the sentinel.
  pub(crate) last: usize,
  /// End of the last region obtained from `brk`.
  pub(crate) end: usize,
  obtained: usize,
  config: HeapConfig,
}

impl Heap<Sbrk> {
  /// A heap on the process program break, starting at the current break.
  pub fn new() -> Self {
    Self::with_break(Sbrk::new())
  }
}

impl Default for Heap<Sbrk> {
  fn default() -> Self {
    Self::new()
  }
}

impl<B: ProgramBreak> Heap<B> {
  pub fn with_break(brk: B) -> Self {
    Self::with_config(brk, HeapConfig::default())
  }

  pub fn with_config(
    brk: B,
    config: HeapConfig,
  ) -> Self {
    let end = brk.current();
    Self {
      id: NEXT_HEAP_ID.fetch_add(1, Ordering::Relaxed),
      brk,
      first: HEAD,
      last: HEAD,
      end,
      obtained: 0,
      config,
    }
  }

  pub fn config(&self) -> &HeapConfig {
    &self.config
  }

  /// Hands out a block with at least `size` usable bytes.
  ///
  /// The block records exactly `size` bytes, and a request for zero bytes
  /// is served as a request for one. Freed blocks are reused first-fit;
  /// the break only moves when none is large enough.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> Result<Payload, HeapError> {
    if size > MAX_REQUEST {
      warn!("allocate({}): request too large", size);
      return Err(HeapError::OutOfMemory { requested: size });
    }

    let size = size.max(1);

    if let Some(block) = self.find_free_block(size) {
      self.split(block, size);

      let mut header = self.header(block);
      header.set_free(false);
      self.write_header(block, header);

      debug!("allocate({}): reused block at {} ({} bytes)", size, block, header.size);
      return Ok(self.payload_of(block));
    }

    let block = self.extend(size)?;
    debug!("allocate({}): new block at {}", size, block);

    Ok(self.payload_of(block))
  }

  /// Returns the block behind `payload` to the heap and merges it with
  /// free neighbours.
  ///
  /// A handle that is not an occupied block of this heap (foreign, made
  /// up, or already released) leaves the heap untouched and yields
  /// [`HeapError::InvalidFree`]; ignoring that error is safe.
  pub fn release(
    &mut self,
    payload: Payload,
  ) -> Result<(), HeapError> {
    let Some(block) = self.occupied(&payload) else {
      warn!("release: rejected payload at offset {}", payload.offset);
      return Err(HeapError::InvalidFree { offset: payload.offset });
    };

    let mut header = self.header(block);
    header.set_free(true);
    self.write_header(block, header);
    debug!("release: block at {} ({} bytes)", block, header.size);

    self.coalesce_forward(block);
    self.coalesce_backward(block);

    Ok(())
  }

  /// Usable bytes of an occupied block.
  pub fn usable_size(
    &self,
    payload: &Payload,
  ) -> Option<usize> {
    self
      .occupied(payload)
      .map(|block| self.header(block).size)
  }

  pub fn payload(
    &self,
    payload: &Payload,
  ) -> Option<&[u8]> {
    let size = self.usable_size(payload)?;
    Some(self.brk.bytes(payload.offset, size))
  }

  pub fn payload_mut(
    &mut self,
    payload: &Payload,
  ) -> Option<&mut [u8]> {
    let size = self.usable_size(payload)?;
    Some(self.brk.bytes_mut(payload.offset, size))
  }

  /// Absolute address of a payload.
  pub fn address(
    &self,
    payload: &Payload,
  ) -> usize {
    self.brk.start() + payload.offset
  }

  /// Address the heap grows from.
  pub fn start_heap(&self) -> usize {
    self.brk.start()
  }

  /// End of the memory this heap has obtained, as an offset from
  /// [`start_heap`](Heap::start_heap).
  pub fn brk(&self) -> usize {
    self.end
  }

  pub(crate) fn break_source(&self) -> &B {
    &self.brk
  }

  fn payload_of(
    &self,
    block: usize,
  ) -> Payload {
    Payload {
      heap: self.id,
      offset: block + HEADER_SIZE,
    }
  }

  /// Header offset of `payload` if it names an occupied block of this heap.
  fn occupied(
    &self,
    payload: &Payload,
  ) -> Option<usize> {
    if payload.heap != self.id {
      return None;
    }

    let block = payload.header()?;
    if !self.contains(block) || self.header(block).is_free() {
      return None;
    }

    Some(block)
  }

  /// Moves the break to fit one more occupied block of `size` bytes and
  /// appends it to the list.
  fn extend(
    &mut self,
    size: usize,
  ) -> Result<usize, HeapError> {
    let total = HEADER_SIZE + size;

    if let Some(limit) = self.config.limit {
      if self.obtained.saturating_add(total) > limit {
        warn!("extend({}): heap limit of {} bytes reached", total, limit);
        return Err(HeapError::OutOfMemory { requested: total });
      }
    }

    let block = self.brk.extend(total)?;
    debug_assert!(block >= self.end);

    self.obtained += total;
    self.end = block + total;

    self.write_header(block, Header::new(size, false));
    self.insert_tail(block);

    Ok(block)
  }

  /// Shrinks the block at `block` to `size` bytes when the rest can hold a
  /// header and at least `min_split` bytes, and lists the rest as free.
  fn split(
    &mut self,
    block: usize,
    size: usize,
  ) {
    let mut header = self.header(block);
    if header.size < size + HEADER_SIZE + self.config.min_split {
      return;
    }

    let remainder = block + HEADER_SIZE + size;
    let remainder_size = header.size - size - HEADER_SIZE;
    debug!("split: {} bytes at {} -> {} + {}", header.size, block, size, remainder_size);

    self.write_header(remainder, Header::new(remainder_size, true));

    let next = header.next;
    header.size = size;
    self.write_header(block, header);

    self.insert(remainder, block, next);
  }

  fn coalesce_forward(
    &mut self,
    block: usize,
  ) {
    let mut header = self.header(block);
    let next = header.next;
    if next == HEAD {
      return;
    }

    let successor = self.header(next);
    if !successor.is_free() || block + HEADER_SIZE + header.size != next {
      return;
    }

    debug!("coalesce: {} absorbs {} ({} bytes)", block, next, successor.size);
    header.size += HEADER_SIZE + successor.size;
    self.write_header(block, header);
    self.remove(next);
  }

  fn coalesce_backward(
    &mut self,
    block: usize,
  ) {
    let header = self.header(block);
    let prev = header.prev;
    if prev == HEAD {
      return;
    }

    let mut predecessor = self.header(prev);
    if !predecessor.is_free() || prev + HEADER_SIZE + predecessor.size != block {
      return;
    }

    debug!("coalesce: {} absorbs {} ({} bytes)", prev, block, header.size);
    predecessor.size += HEADER_SIZE + header.size;
    self.write_header(prev, predecessor);
    self.remove(block);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::mem;

  use crate::{block::Block, brk::Arena};

  use test_log::test;

  /// Arena whose next extension starts `gap` bytes past the current break,
  /// like a process break that something else moved in between.
  struct Gappy {
    arena: Arena,
    gap: usize,
  }

  impl ProgramBreak for Gappy {
    fn start(&self) -> usize {
      self.arena.start()
    }

    fn current(&self) -> usize {
      self.arena.current()
    }

    fn extend(
      &mut self,
      increment: usize,
    ) -> Result<usize, HeapError> {
      let gap = mem::take(&mut self.gap);
      if gap > 0 {
        self.arena.extend(gap)?;
      }
      self.arena.extend(increment)
    }

    fn bytes(
      &self,
      offset: usize,
      len: usize,
    ) -> &[u8] {
      self.arena.bytes(offset, len)
    }

    fn bytes_mut(
      &mut self,
      offset: usize,
      len: usize,
    ) -> &mut [u8] {
      self.arena.bytes_mut(offset, len)
    }
  }

  /// Two 64-byte blocks with 40 foreign bytes between them.
  fn gapped_pair() -> (Heap<Gappy>, Payload, Payload) {
    let mut heap = Heap::with_break(Gappy {
      arena: Arena::new(4096),
      gap: 0,
    });

    let a = heap.allocate(64).unwrap();
    heap.brk.gap = 40;
    let b = heap.allocate(64).unwrap();

    (heap, a, b)
  }

  fn offsets<B: ProgramBreak>(heap: &Heap<B>) -> Vec<(usize, bool, usize)> {
    heap.blocks().map(|b| (b.offset, b.is_free, b.size)).collect()
  }

  fn heap() -> Heap<Arena> {
    Heap::with_break(Arena::new(64 * 1024))
  }

  fn layout<B: ProgramBreak>(heap: &Heap<B>) -> Vec<(bool, usize)> {
    heap.blocks().map(|b| (b.is_free, b.size)).collect()
  }

  #[test]
  fn allocation_is_at_least_the_requested_size() {
    let mut heap = heap();

    for size in [1, 7, 8, 9, 100, 1000, 4097] {
      let payload = heap.allocate(size).unwrap();
      assert_eq!(heap.usable_size(&payload), Some(size));
    }
    heap.assert_well_formed();
  }

  #[test]
  fn zero_size_is_served_as_one_byte() {
    let mut heap = heap();

    let payload = heap.allocate(0).unwrap();

    assert_eq!(heap.usable_size(&payload), Some(1));
    assert_eq!(heap.brk(), HEADER_SIZE + 1);
  }

  #[test]
  fn payload_follows_its_header() {
    let mut heap = heap();

    let first = heap.allocate(40).unwrap();
    let second = heap.allocate(40).unwrap();

    assert_eq!(first.offset(), HEADER_SIZE);
    assert_eq!(second.offset(), HEADER_SIZE + 40 + HEADER_SIZE);
    assert_eq!(heap.address(&first), heap.start_heap() + HEADER_SIZE);
  }

  #[test]
  fn payload_bytes_are_kept_apart() {
    let mut heap = heap();

    let a = heap.allocate(16).unwrap();
    let b = heap.allocate(16).unwrap();

    heap.payload_mut(&a).unwrap().fill(0xAA);
    heap.payload_mut(&b).unwrap().fill(0xBB);

    assert!(heap.payload(&a).unwrap().iter().all(|&x| x == 0xAA));
    assert!(heap.payload(&b).unwrap().iter().all(|&x| x == 0xBB));
    heap.assert_well_formed();
  }

  #[test]
  fn freed_block_is_reused_without_growing() {
    let mut heap = heap();

    let a = heap.allocate(64).unwrap();
    heap.allocate(64).unwrap();
    let brk = heap.brk();

    heap.release(a).unwrap();
    let again = heap.allocate(48).unwrap();

    assert_eq!(again.offset(), a.offset());
    assert_eq!(heap.brk(), brk);
  }

  #[test]
  fn split_leaves_a_free_remainder() {
    let mut heap = heap();

    let big = heap.allocate(256).unwrap();
    heap.release(big).unwrap();
    heap.allocate(64).unwrap();

    let blocks: Vec<Block> = heap.blocks().collect();
    assert_eq!(layout(&heap), vec![(false, 64), (true, 256 - 64 - HEADER_SIZE)]);
    assert_eq!(blocks[0].size + blocks[1].size, 256 - HEADER_SIZE);
    assert_eq!(blocks[1].offset, blocks[0].end());
    heap.assert_well_formed();
  }

  #[test]
  fn small_leftover_is_not_split_off() {
    let mut heap = heap();

    let block = heap.allocate(HEADER_SIZE + 64).unwrap();
    heap.release(block).unwrap();

    // The remainder could hold a header but not the minimum split.
    let reused = heap.allocate(64).unwrap();

    assert_eq!(layout(&heap), vec![(false, HEADER_SIZE + 64)]);
    assert_eq!(heap.usable_size(&reused), Some(HEADER_SIZE + 64));
  }

  #[test]
  fn min_split_is_configurable() {
    let config = HeapConfig::default().with_min_split(128);
    let mut heap = Heap::with_config(Arena::new(4096), config);

    let block = heap.allocate(256).unwrap();
    heap.release(block).unwrap();
    heap.allocate(128).unwrap();

    assert_eq!(layout(&heap), vec![(false, 256)]);
  }

  #[test]
  fn adjacent_free_blocks_coalesce_forward() {
    let mut heap = heap();

    let a = heap.allocate(40).unwrap();
    let b = heap.allocate(80).unwrap();
    heap.allocate(8).unwrap();

    heap.release(b).unwrap();
    assert_eq!(heap.blocks().count(), 3);

    heap.release(a).unwrap();
    assert_eq!(layout(&heap), vec![(true, 40 + 80 + HEADER_SIZE), (false, 8)]);
    heap.assert_well_formed();
  }

  #[test]
  fn adjacent_free_blocks_coalesce_backward() {
    let mut heap = heap();

    let a = heap.allocate(40).unwrap();
    let b = heap.allocate(80).unwrap();
    heap.allocate(8).unwrap();

    heap.release(a).unwrap();
    heap.release(b).unwrap();

    assert_eq!(layout(&heap), vec![(true, 40 + 80 + HEADER_SIZE), (false, 8)]);
    heap.assert_well_formed();
  }

  #[test]
  fn middle_block_merges_both_ways() {
    let mut heap = heap();

    let a = heap.allocate(16).unwrap();
    let b = heap.allocate(24).unwrap();
    let c = heap.allocate(32).unwrap();
    heap.allocate(8).unwrap();

    heap.release(a).unwrap();
    heap.release(c).unwrap();
    assert_eq!(heap.blocks().count(), 4);

    heap.release(b).unwrap();
    assert_eq!(
      layout(&heap),
      vec![(true, 16 + 24 + 32 + 2 * HEADER_SIZE), (false, 8)]
    );
    heap.assert_well_formed();
  }

  #[test]
  fn occupied_block_stops_merging() {
    let mut heap = heap();

    let a = heap.allocate(16).unwrap();
    heap.allocate(16).unwrap();
    let c = heap.allocate(16).unwrap();

    heap.release(a).unwrap();
    heap.release(c).unwrap();

    assert_eq!(layout(&heap), vec![(true, 16), (false, 16), (true, 16)]);
  }

  #[test]
  fn double_free_is_rejected_and_harmless() {
    let mut heap = heap();

    let a = heap.allocate(16).unwrap();
    heap.allocate(16).unwrap();
    heap.release(a).unwrap();
    let before = layout(&heap);

    assert_eq!(
      heap.release(a),
      Err(HeapError::InvalidFree { offset: a.offset() })
    );
    assert_eq!(layout(&heap), before);
    heap.assert_well_formed();
  }

  #[test]
  fn release_of_a_merged_away_block_is_rejected() {
    let mut heap = heap();

    let a = heap.allocate(16).unwrap();
    let b = heap.allocate(16).unwrap();
    heap.release(a).unwrap();
    heap.release(b).unwrap();

    assert!(heap.release(b).is_err());
    assert_eq!(layout(&heap), vec![(true, 32 + HEADER_SIZE)]);
  }

  #[test]
  fn foreign_and_made_up_handles_are_rejected() {
    let mut heap = heap();
    let mut other = Heap::with_break(Arena::new(1024));

    let mine = heap.allocate(16).unwrap();
    let theirs = other.allocate(16).unwrap();
    assert_eq!(mine.offset(), theirs.offset());

    assert!(heap.release(theirs).is_err());

    let inside = Payload { heap: heap.id, offset: mine.offset() + 8 };
    assert!(heap.release(inside).is_err());

    let underflow = Payload { heap: heap.id, offset: 0 };
    assert!(heap.release(underflow).is_err());

    assert_eq!(layout(&heap), vec![(false, 16)]);
    assert!(heap.payload(&theirs).is_none());
  }

  #[test]
  fn exhausted_break_fails_without_side_effects() {
    let mut heap = Heap::with_break(Arena::new(256));

    heap.allocate(100).unwrap();
    let before = layout(&heap);
    let brk = heap.brk();

    assert_eq!(
      heap.allocate(200),
      Err(HeapError::OutOfMemory { requested: HEADER_SIZE + 200 })
    );
    assert_eq!(layout(&heap), before);
    assert_eq!(heap.brk(), brk);

    // Smaller requests still fit.
    heap.allocate(64).unwrap();
    heap.assert_well_formed();
  }

  #[test]
  fn configured_limit_caps_growth() {
    let config = HeapConfig::default().with_limit(2 * (HEADER_SIZE + 64));
    let mut heap = Heap::with_config(Arena::new(4096), config);

    heap.allocate(64).unwrap();
    heap.allocate(64).unwrap();

    assert!(matches!(heap.allocate(8), Err(HeapError::OutOfMemory { .. })));
  }

  #[test]
  fn oversized_request_fails_instead_of_overflowing() {
    let mut heap = heap();

    assert_eq!(
      heap.allocate(usize::MAX),
      Err(HeapError::OutOfMemory { requested: usize::MAX })
    );
    assert_eq!(heap.blocks().count(), 0);
  }

  #[test]
  fn reference_trace() {
    let mut heap = heap();

    // 1: one occupied block.
    let p = heap.allocate(1000).unwrap();
    assert_eq!(layout(&heap), vec![(false, 1000)]);
    assert_eq!(heap.brk(), HEADER_SIZE + 1000);

    // 2: freed in place.
    heap.release(p).unwrap();
    assert_eq!(layout(&heap), vec![(true, 1000)]);

    // 3: split into 500 + remainder.
    let q = heap.allocate(500).unwrap();
    assert_eq!(q.offset(), p.offset());
    let remainder = 1000 - 500 - HEADER_SIZE;
    #[cfg(target_pointer_width = "64")]
    assert_eq!(remainder, 468);
    assert_eq!(layout(&heap), vec![(false, 500), (true, remainder)]);

    // 4: the remainder is too small to split again and is taken whole.
    let r = heap.allocate(462).unwrap();
    assert_eq!(layout(&heap), vec![(false, 500), (false, remainder)]);

    // 5: nothing fits, the break grows by exactly one block.
    let brk = heap.brk();
    let s = heap.allocate(5000).unwrap();
    assert_eq!(heap.brk(), brk + HEADER_SIZE + 5000);
    assert_eq!(
      layout(&heap),
      vec![(false, 500), (false, remainder), (false, 5000)]
    );

    // 6..8: everything folds back into one free block.
    heap.release(r).unwrap();
    assert_eq!(
      layout(&heap),
      vec![(false, 500), (true, remainder), (false, 5000)]
    );
    heap.release(q).unwrap();
    assert_eq!(layout(&heap), vec![(true, 1000), (false, 5000)]);
    heap.release(s).unwrap();
    assert_eq!(layout(&heap), vec![(true, 1000 + HEADER_SIZE + 5000)]);

    assert_eq!(heap.brk(), 2 * HEADER_SIZE + 6000);
    heap.assert_well_formed();
  }

  #[test]
  fn release_order_does_not_matter() {
    let orders = [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];

    for order in orders {
      let mut heap = heap();
      let payloads = [
        heap.allocate(24).unwrap(),
        heap.allocate(56).unwrap(),
        heap.allocate(8).unwrap(),
      ];

      for i in order {
        heap.release(payloads[i]).unwrap();
        heap.assert_well_formed();
      }

      assert_eq!(layout(&heap), vec![(true, 24 + 56 + 8 + 2 * HEADER_SIZE)]);
    }
  }

  #[test]
  fn interleaved_churn_keeps_the_list_consistent() {
    let mut heap = Heap::with_break(Arena::new(1 << 20));
    let mut live = Vec::new();
    let mut seed: u32 = 0x2545_F491;

    for round in 0..500 {
      seed ^= seed << 13;
      seed ^= seed >> 17;
      seed ^= seed << 5;

      if live.is_empty() || seed % 3 != 0 {
        let size = (seed % 300) as usize;
        let payload = heap.allocate(size).unwrap();
        heap.payload_mut(&payload).unwrap().fill(round as u8);
        live.push((payload, round as u8));
      } else {
        let (payload, tag) = live.swap_remove(seed as usize % live.len());
        assert!(heap.payload(&payload).unwrap().iter().all(|&x| x == tag));
        heap.release(payload).unwrap();
      }

      heap.assert_well_formed();
    }

    for (payload, _) in live.drain(..) {
      heap.release(payload).unwrap();
    }
    heap.assert_well_formed();

    let blocks: Vec<Block> = heap.blocks().collect();
    assert_eq!(blocks.len(), 1);
    assert!(blocks[0].is_free);
    assert_eq!(blocks[0].end(), heap.brk());
  }

  #[test]
  fn blocks_across_a_gap_are_not_merged_forward() {
    let (mut heap, a, b) = gapped_pair();
    assert_eq!(b.offset(), HEADER_SIZE + 64 + 40 + HEADER_SIZE);

    heap.release(b).unwrap();
    heap.release(a).unwrap();

    assert_eq!(
      offsets(&heap),
      vec![(0, true, 64), (HEADER_SIZE + 64 + 40, true, 64)]
    );
    heap.assert_well_formed();
  }

  #[test]
  fn blocks_across_a_gap_are_not_merged_backward() {
    let (mut heap, a, b) = gapped_pair();

    heap.release(a).unwrap();
    heap.release(b).unwrap();

    assert_eq!(
      offsets(&heap),
      vec![(0, true, 64), (HEADER_SIZE + 64 + 40, true, 64)]
    );
    heap.assert_well_formed();
  }

  #[test]
  fn gap_is_counted_apart_from_blocks() {
    let (heap, _, _) = gapped_pair();

    let stats = heap.stats();

    assert_eq!(stats.gap_bytes, 40);
    assert_eq!(stats.heap_size, 2 * (HEADER_SIZE + 64) + 40);
    assert_eq!(
      stats.free_bytes + stats.used_bytes + stats.overhead() + stats.gap_bytes,
      stats.heap_size
    );
  }

  #[test]
  fn gap_does_not_stop_reuse_on_either_side() {
    let (mut heap, a, b) = gapped_pair();
    heap.release(a).unwrap();
    heap.release(b).unwrap();
    let brk = heap.brk();

    assert_eq!(heap.allocate(64).unwrap().offset(), a.offset());
    assert_eq!(heap.allocate(64).unwrap().offset(), b.offset());
    assert_eq!(heap.brk(), brk);
  }
}
