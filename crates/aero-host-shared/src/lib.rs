//! Shared linear memory between the host and the execution unit.
//!
//! The execution unit allocates one linear buffer and hands it to the host in its `INIT`
//! message. The host reads and writes it through three typed views:
//!
//! - [`ByteView`]: `u8` elements (device I/O staging, compile request ranges)
//! - [`HalfView`]: `u16` elements
//! - [`WordView`]: `i32` elements (the async pointer block and HUD statistics)
//!
//! All views alias the same storage. The backing store is an array of 32-bit atomics so every
//! access is well defined while the other side is running; byte and half-word accesses are
//! implemented on top of the containing word (little-endian).

#![forbid(unsafe_code)]

mod heap;
pub mod layout;

pub use heap::{ByteView, HalfView, HeapError, SharedHeap, WordView};
pub use layout::AsyncPtr;
