//! Async pointer block contract.
//!
//! The execution unit reserves a small block of words in the shared heap and reports its byte
//! offset in the `INIT` message (`asyncPtrOffset`). The host uses it to wake the unit out of a
//! blocking wait. Compatibility with the unit depends on these exact offsets and values.

use crate::SharedHeap;

/// Word index (relative to the async pointer) of the interrupt word.
pub const INTERRUPT_WORD: usize = 0;

/// Word index (relative to the async pointer) of the module-compile completion flag.
pub const COMPILE_FLAG_WORD: usize = 5;

/// Value stored in the interrupt word to request that the unit drains its message queue.
pub const INTERRUPT_SENTINEL: i32 = -2;

/// Value stored in the compile flag word once a synchronously awaited module is posted.
pub const WASM_MODULE_COMPLETE: i32 = 1;

/// Word index of the async pointer block inside a [`SharedHeap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsyncPtr {
    word: usize,
}

impl AsyncPtr {
    /// Build from the byte offset reported by the execution unit.
    pub const fn from_byte_offset(offset: u32) -> Self {
        Self {
            word: (offset >> 2) as usize,
        }
    }

    pub const fn word(self) -> usize {
        self.word
    }

    pub const fn byte_offset(self) -> u32 {
        (self.word as u32) << 2
    }

    /// Store the interrupt sentinel.
    ///
    /// Must happen before the message it announces is posted; the unit only re-checks its queue
    /// after observing the sentinel.
    pub fn raise_interrupt(self, heap: &SharedHeap) {
        heap.words()
            .set(self.word + INTERRUPT_WORD, INTERRUPT_SENTINEL);
    }

    pub fn interrupt_pending(self, heap: &SharedHeap) -> bool {
        heap.words().get(self.word + INTERRUPT_WORD) == INTERRUPT_SENTINEL
    }

    pub fn clear_interrupt(self, heap: &SharedHeap) {
        heap.words().set(self.word + INTERRUPT_WORD, 0);
    }

    pub fn mark_module_complete(self, heap: &SharedHeap) {
        heap.words()
            .set(self.word + COMPILE_FLAG_WORD, WASM_MODULE_COMPLETE);
    }

    pub fn module_complete(self, heap: &SharedHeap) -> bool {
        heap.words().get(self.word + COMPILE_FLAG_WORD) == WASM_MODULE_COMPLETE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_offset_is_converted_to_word_index() {
        let ptr = AsyncPtr::from_byte_offset(0x40);
        assert_eq!(ptr.word(), 0x10);
        assert_eq!(ptr.byte_offset(), 0x40);
    }

    #[test]
    fn interrupt_and_compile_flag_land_on_reserved_words() {
        let heap = SharedHeap::new(256);
        let ptr = AsyncPtr::from_byte_offset(32);

        ptr.raise_interrupt(&heap);
        assert_eq!(heap.words().get(8), -2);
        assert!(ptr.interrupt_pending(&heap));

        ptr.mark_module_complete(&heap);
        assert_eq!(heap.words().get(13), WASM_MODULE_COMPLETE);
        assert!(ptr.module_complete(&heap));

        ptr.clear_interrupt(&heap);
        assert!(!ptr.interrupt_pending(&heap));
        // Other words are untouched.
        assert_eq!(heap.words().get(9), 0);
    }
}
