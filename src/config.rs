use crate::{align, align::WORD};

/// Tunables of a [`Heap`](crate::Heap).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeapConfig {
  /// Smallest payload a split may leave behind. A free block is only split
  /// when the remainder, after paying for its own header, holds at least
  /// this many bytes.
  pub min_split: usize,
  /// Upper bound on the bytes the heap obtains from its break source.
  pub limit: Option<usize>,
}

impl Default for HeapConfig {
  fn default() -> Self {
    Self {
      min_split: WORD,
      limit: None,
    }
  }
}

impl HeapConfig {
  pub fn with_min_split(
    mut self,
    min_split: usize,
  ) -> Self {
    self.min_split = align!(min_split.clamp(1, isize::MAX as usize));
    self
  }

  pub fn with_limit(
    mut self,
    limit: usize,
  ) -> Self {
    self.limit = Some(limit);
    self
  }
}
