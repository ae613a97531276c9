use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeapError {
    #[error("out of bounds: offset={offset} len={len} capacity={capacity}")]
    OutOfBounds {
        offset: usize,
        len: usize,
        capacity: usize,
    },

    #[error("integer overflow while computing heap offsets")]
    OffsetOverflow,
}

/// Shared linear buffer owned jointly by the host and the execution unit.
///
/// Cloning a `SharedHeap` clones the handle, not the memory.
#[derive(Clone)]
pub struct SharedHeap {
    words: Arc<[AtomicI32]>,
    byte_len: usize,
}

impl SharedHeap {
    /// Allocate a zeroed heap of `byte_len` bytes.
    ///
    /// Storage is rounded up to a whole number of words; the views still report `byte_len`.
    pub fn new(byte_len: usize) -> Self {
        let word_len = byte_len.div_ceil(4);
        let words: Arc<[AtomicI32]> = (0..word_len).map(|_| AtomicI32::new(0)).collect();
        Self { words, byte_len }
    }

    pub fn byte_len(&self) -> usize {
        self.byte_len
    }

    /// Returns true when both handles refer to the same memory.
    pub fn same_memory(&self, other: &SharedHeap) -> bool {
        Arc::ptr_eq(&self.words, &other.words)
    }

    pub fn bytes(&self) -> ByteView<'_> {
        ByteView { heap: self }
    }

    pub fn halves(&self) -> HalfView<'_> {
        HalfView { heap: self }
    }

    pub fn words(&self) -> WordView<'_> {
        WordView { heap: self }
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<(), HeapError> {
        let end = offset.checked_add(len).ok_or(HeapError::OffsetOverflow)?;
        if end > self.byte_len {
            return Err(HeapError::OutOfBounds {
                offset,
                len,
                capacity: self.byte_len,
            });
        }
        Ok(())
    }

    #[inline]
    fn load_byte(&self, offset: usize) -> u8 {
        let word = self.words[offset / 4].load(Ordering::SeqCst) as u32;
        (word >> ((offset % 4) * 8)) as u8
    }

    #[inline]
    fn store_byte(&self, offset: usize, value: u8) {
        let shift = (offset % 4) * 8;
        let mask = !(0xFFu32 << shift) as i32;
        let bits = ((value as u32) << shift) as i32;
        // Single read-modify-write so neighbouring bytes written by the other side survive.
        let _ = self.words[offset / 4].fetch_update(Ordering::SeqCst, Ordering::SeqCst, |w| {
            Some((w & mask) | bits)
        });
    }
}

impl fmt::Debug for SharedHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedHeap")
            .field("byte_len", &self.byte_len)
            .finish_non_exhaustive()
    }
}

/// `u8` view over a [`SharedHeap`].
#[derive(Clone, Copy)]
pub struct ByteView<'a> {
    heap: &'a SharedHeap,
}

impl ByteView<'_> {
    pub fn len(&self) -> usize {
        self.heap.byte_len
    }

    pub fn is_empty(&self) -> bool {
        self.heap.byte_len == 0
    }

    /// Panics if `index` is out of bounds, like slice indexing.
    pub fn get(&self, index: usize) -> u8 {
        assert!(index < self.len(), "byte index {index} out of bounds");
        self.heap.load_byte(index)
    }

    /// Panics if `index` is out of bounds, like slice indexing.
    pub fn set(&self, index: usize, value: u8) {
        assert!(index < self.len(), "byte index {index} out of bounds");
        self.heap.store_byte(index, value);
    }

    /// Copy `dst.len()` bytes starting at `offset` out of the heap.
    ///
    /// Whole aligned words are copied with one load each; only the unaligned edges go byte by
    /// byte.
    pub fn read_into(&self, offset: usize, dst: &mut [u8]) -> Result<(), HeapError> {
        self.heap.check_range(offset, dst.len())?;
        let (head, body) = dst.split_at_mut(unaligned_head(offset, dst.len()));
        for (i, b) in head.iter_mut().enumerate() {
            *b = self.heap.load_byte(offset + i);
        }

        let mut pos = offset + head.len();
        let mut words = body.chunks_exact_mut(4);
        for chunk in &mut words {
            let word = self.heap.words[pos / 4].load(Ordering::SeqCst) as u32;
            chunk.copy_from_slice(&word.to_le_bytes());
            pos += 4;
        }
        for b in words.into_remainder() {
            *b = self.heap.load_byte(pos);
            pos += 1;
        }
        Ok(())
    }

    /// Copy `src` into the heap starting at `offset`.
    ///
    /// Whole aligned words are stored directly; the unaligned edges use per-byte
    /// read-modify-write so neighbouring bytes survive.
    pub fn write_from(&self, offset: usize, src: &[u8]) -> Result<(), HeapError> {
        self.heap.check_range(offset, src.len())?;
        let (head, body) = src.split_at(unaligned_head(offset, src.len()));
        for (i, b) in head.iter().enumerate() {
            self.heap.store_byte(offset + i, *b);
        }

        let mut pos = offset + head.len();
        let words = body.chunks_exact(4);
        let tail = words.remainder();
        for chunk in words {
            let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            self.heap.words[pos / 4].store(word as i32, Ordering::SeqCst);
            pos += 4;
        }
        for b in tail {
            self.heap.store_byte(pos, *b);
            pos += 1;
        }
        Ok(())
    }

    /// Snapshot `len` bytes starting at `offset`.
    pub fn to_vec(&self, offset: usize, len: usize) -> Result<Vec<u8>, HeapError> {
        let mut out = vec![0u8; len];
        self.read_into(offset, &mut out)?;
        Ok(out)
    }
}

/// Bytes before the first word boundary at or after `offset`, capped at `len`.
fn unaligned_head(offset: usize, len: usize) -> usize {
    ((4 - offset % 4) % 4).min(len)
}

/// `u16` view over a [`SharedHeap`]. Indices are in half-words.
#[derive(Clone, Copy)]
pub struct HalfView<'a> {
    heap: &'a SharedHeap,
}

impl HalfView<'_> {
    pub fn len(&self) -> usize {
        self.heap.byte_len / 2
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> u16 {
        assert!(index < self.len(), "half-word index {index} out of bounds");
        let word = self.heap.words[index / 2].load(Ordering::SeqCst) as u32;
        (word >> ((index % 2) * 16)) as u16
    }

    pub fn set(&self, index: usize, value: u16) {
        assert!(index < self.len(), "half-word index {index} out of bounds");
        let shift = (index % 2) * 16;
        let mask = !(0xFFFFu32 << shift) as i32;
        let bits = ((value as u32) << shift) as i32;
        let _ = self.heap.words[index / 2].fetch_update(Ordering::SeqCst, Ordering::SeqCst, |w| {
            Some((w & mask) | bits)
        });
    }
}

/// `i32` view over a [`SharedHeap`]. Indices are in words.
#[derive(Clone, Copy)]
pub struct WordView<'a> {
    heap: &'a SharedHeap,
}

impl WordView<'_> {
    pub fn len(&self) -> usize {
        self.heap.byte_len / 4
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> i32 {
        self.heap.words[index].load(Ordering::SeqCst)
    }

    pub fn set(&self, index: usize, value: i32) {
        self.heap.words[index].store(value, Ordering::SeqCst);
    }

    /// Bounds-checked read for indices supplied by the execution unit.
    pub fn try_get(&self, index: usize) -> Option<i32> {
        (index < self.len()).then(|| self.get(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn views_alias_the_same_storage() {
        let heap = SharedHeap::new(16);
        heap.words().set(1, 0x4433_2211);

        assert_eq!(heap.bytes().get(4), 0x11);
        assert_eq!(heap.bytes().get(7), 0x44);
        assert_eq!(heap.halves().get(2), 0x2211);
        assert_eq!(heap.halves().get(3), 0x4433);

        heap.bytes().set(5, 0xAA);
        assert_eq!(heap.words().get(1), 0x44_33_AA_11);
        heap.halves().set(3, 0xBEEF);
        assert_eq!(heap.words().get(1) as u32, 0xBEEF_AA11);
    }

    #[test]
    fn unaligned_byte_ranges_roundtrip() {
        let heap = SharedHeap::new(64);
        let data: Vec<u8> = (1..=13).collect();
        heap.bytes().write_from(3, &data).unwrap();

        assert_eq!(heap.bytes().to_vec(3, 13).unwrap(), data);
        // Neighbours untouched.
        assert_eq!(heap.bytes().get(2), 0);
        assert_eq!(heap.bytes().get(16), 0);
    }

    #[test]
    fn long_ranges_copy_words_and_keep_edges() {
        let heap = SharedHeap::new(64);
        heap.bytes().set(0, 0xEE);
        heap.bytes().set(38, 0xDD);
        let data: Vec<u8> = (0..37).map(|i| i * 3 + 1).collect();
        heap.bytes().write_from(1, &data).unwrap();

        assert_eq!(heap.bytes().to_vec(1, 37).unwrap(), data);
        assert_eq!(heap.bytes().get(0), 0xEE);
        assert_eq!(heap.bytes().get(38), 0xDD);
        assert_eq!(heap.words().get(1) as u32, u32::from_le_bytes([
            data[3], data[4], data[5], data[6]
        ]));

        // Aligned and shorter than a word.
        heap.bytes().write_from(40, &[9, 8]).unwrap();
        assert_eq!(heap.bytes().to_vec(40, 4).unwrap(), [9, 8, 0, 0]);
    }

    #[test]
    fn out_of_bounds_ranges_are_rejected() {
        let heap = SharedHeap::new(10);
        let err = heap.bytes().write_from(8, &[0u8; 4]).unwrap_err();
        assert_eq!(
            err,
            HeapError::OutOfBounds {
                offset: 8,
                len: 4,
                capacity: 10
            }
        );
        assert_eq!(
            heap.bytes().to_vec(usize::MAX, 2).unwrap_err(),
            HeapError::OffsetOverflow
        );
        assert_eq!(heap.words().try_get(1), Some(0));
        assert_eq!(heap.words().try_get(2), None);
    }

    #[test]
    fn clones_share_memory() {
        let heap = SharedHeap::new(8);
        let other = heap.clone();
        other.words().set(0, -2);
        assert_eq!(heap.words().get(0), -2);
        assert!(heap.same_memory(&other));
        assert!(!heap.same_memory(&SharedHeap::new(8)));
    }
}
