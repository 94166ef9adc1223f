/// Size of the natural machine word. Every block size is a multiple of it.
pub const WORD: usize = core::mem::size_of::<usize>();

/// Rounds `$value` up to the next multiple of the machine word.
///
/// The caller is responsible for making sure `$value + WORD - 1` does not
/// overflow; [`Heap::allocate`](crate::Heap::allocate) checks this before
/// rounding.
///
/// # Examples
///
/// ```rust
/// use brkheap::align;
///
/// match std::mem::size_of::<usize>() {
///     8 => assert_eq!(align!(13), 16), // 64 bit machine.
///     4 => assert_eq!(align!(11), 12), // 32 bit machine.
///     _ => {},
/// };
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    ($value + $crate::align::WORD - 1) & !($crate::align::WORD - 1)
  };
}
