//! # brkheap - A first-fit heap on the program break
//!
//! This crate provides a **free-list allocator** that grows a single heap
//! region by moving a program break (`sbrk(2)`, or a private byte arena)
//! and keeps every block of that region, free or occupied, in one
//! circular doubly linked list.
//!
//! ## Overview
//!
//! ```text
//!   Heap Layout:
//!
//!   start_heap                                                        brk
//!   ▼                                                                  ▼
//!   ┌────────┬──────────────┬────────┬─────────┬────────┬──────────────┐
//!   │ Header │   Payload    │ Header │ Payload │ Header │   Payload    │
//!   │ OCCP   │   500 bytes  │ FREE   │ 468     │ OCCP   │  5000 bytes  │
//!   └────────┴──────────────┴────────┴─────────┴────────┴──────────────┘
//!       │          ▲            ▲ │                ▲
//!       │          │            │ │                │
//!       └──── next ┼────────────┘ └────── next ────┘
//!                  │
//!              Payload handed to the caller
//! ```
//!
//! - **Allocation** walks the list and takes the first free block that is
//!   large enough (first-fit). An oversized block is split and the rest
//!   stays listed as free. Only when nothing fits does the break move.
//! - **Release** marks the block free and merges it with a free neighbour
//!   on either side, as long as the two touch in memory.
//! - The heap never shrinks.
//!
//! ## Crate Structure
//!
//! ```text
//!   brkheap
//!   ├── align      - Word rounding (align!) for tunables
//!   ├── block      - Header encoding, block views, payload handles
//!   ├── brk        - ProgramBreak sources: Sbrk and Arena
//!   ├── config     - HeapConfig
//!   ├── dump       - Block listing and HeapStats
//!   ├── error      - HeapError
//!   ├── heap       - Heap: allocate, release, split, coalesce
//!   ├── list       - Block list: find, insert, remove, iterate
//!   └── locked     - LockedHeap for shared use
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use brkheap::{Arena, Heap};
//!
//! let mut heap = Heap::with_break(Arena::new(4096));
//!
//! let p = heap.allocate(1000).unwrap();
//! heap.payload_mut(&p).unwrap()[0] = 42;
//! heap.release(p).unwrap();
//!
//! // The freed block is split to serve the next request.
//! let q = heap.allocate(500).unwrap();
//! assert_eq!(q.offset(), p.offset());
//! heap.dump();
//! ```
//!
//! ## Blocks
//!
//! Headers live inside the heap, in front of their payload. They hold
//! offsets rather than pointers:
//!
//! ```text
//!   ┌───────────────────────┬────────────────────────────────┐
//!   │    Block Header       │         Payload                │
//!   │  ┌─────────────────┐  │                                │
//!   │  │ size: N         │  │  ┌──────────────────────────┐  │
//!   │  │ free: 0 / 1     │  │  │                          │  │
//!   │  │ next: offset    │  │  │     N bytes usable       │  │
//!   │  │ prev: offset    │  │  │                          │  │
//!   │  └─────────────────┘  │  └──────────────────────────┘  │
//!   │      32 bytes         │                                │
//!   └───────────────────────┴────────────────────────────────┘
//!                           ▲
//!                           └── Payload::offset()
//! ```
//!
//! ## Limitations
//!
//! - **Single-threaded core**: use [`LockedHeap`] to share a heap
//! - **No shrinking**: freed memory is reused, never returned to the OS
//! - **No alignment**: blocks keep the exact requested size, so payloads
//!   are byte slices with no alignment promise

pub mod align;
mod block;
pub mod brk;
mod config;
mod dump;
mod error;
mod heap;
mod list;
mod locked;

pub use block::{Block, HEADER_SIZE, Payload};
pub use brk::{Arena, ProgramBreak, Sbrk};
pub use config::HeapConfig;
pub use dump::{Dump, HeapStats};
pub use error::HeapError;
pub use heap::Heap;
pub use list::Blocks;
pub use locked::LockedHeap;
