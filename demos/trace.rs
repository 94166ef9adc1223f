//! Replays the reference allocate/free trace on the real program break.
//!
//! Run with `--step` to pause after every step, e.g. to inspect the
//! process with `pmap` or `gdb`. Set `RUST_LOG=trace` to see every `sbrk`.

use std::io::Read;

use brkheap::{Heap, Payload};

/// Waits until the user presses ENTER.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

fn print_alloc(
  heap: &Heap,
  size: usize,
  payload: &Payload,
) {
  println!(
    "Allocated {} bytes, address = {:#x}, usable = {} bytes",
    size,
    heap.address(payload),
    heap.usable_size(payload).unwrap_or(0)
  );
}

fn main() {
  env_logger::init();

  let pause = std::env::args().any(|arg| arg == "--step");
  let mut heap = Heap::new();

  let step = |n: usize, heap: &Heap| {
    println!("=== After step {} ===", n);
    heap.dump();
    if pause {
      block_until_enter_pressed();
    }
  };

  let allocate = |heap: &mut Heap, size: usize| -> Option<Payload> {
    match heap.allocate(size) {
      Ok(payload) => {
        print_alloc(heap, size, &payload);
        Some(payload)
      }
      Err(err) => {
        eprintln!("allocate({}) failed: {}", size, err);
        None
      }
    }
  };

  let release = |heap: &mut Heap, payload: Option<Payload>| {
    if let Some(payload) = payload {
      if let Err(err) = heap.release(payload) {
        eprintln!("release failed: {}", err);
      }
    }
  };

  // 1) one block of 1000 bytes
  let p = allocate(&mut heap, 1000);
  step(1, &heap);

  // 2) free it again
  release(&mut heap, p);
  step(2, &heap);

  // 3) 500 bytes, carved out of the free block
  let q = allocate(&mut heap, 500);
  step(3, &heap);

  // 4) 462 bytes, takes the whole remainder
  let r = allocate(&mut heap, 462);
  step(4, &heap);

  // 5) 5000 bytes, the break has to move
  let s = allocate(&mut heap, 5000);
  step(5, &heap);

  release(&mut heap, r);
  step(6, &heap);

  release(&mut heap, q);
  step(7, &heap);

  release(&mut heap, s);
  step(8, &heap);

  let stats = heap.stats();
  println!(
    "\n{} block(s), {} free bytes, {} bytes obtained from the OS",
    stats.blocks, stats.free_bytes, stats.heap_size
  );
}
