//! Boundary tags. Every block starts with a header word and ends with a
//! footer word, both holding the block size and the allocated bit:
//!
//! ```text
//!            +----------------------------+
//!            | size                   | a | <- header (4 bytes)
//! payload -> +----------------------------+
//!            | next free (only if free)   |
//!            +----------------------------+
//!            | prev free (only if free)   |
//!            +----------------------------+
//!            |            ...             |
//!            +----------------------------+
//!            | size                   | a | <- footer (4 bytes)
//!            +----------------------------+
//! ```
//!
//! Sizes are multiples of [`ALIGNMENT`], so the three low bits of a tag are
//! always zero and the lowest one stores the allocated flag. Since the footer
//! of a block sits right before the header of the next one, the size of the
//! previous block can be read without knowing where it starts.

use crate::config::MAX_HEAP_LIMIT;

/// Size of a tag or a free list link.
pub(crate) const WORD_SIZE: usize = 4;

/// Header plus footer.
pub(crate) const DOUBLE_WORD: usize = 2 * WORD_SIZE;

/// Every payload handed out is aligned to this many bytes.
pub const ALIGNMENT: usize = 8;

/// Header, footer and the two free list links.
pub const MIN_BLOCK_SIZE: usize = 2 * DOUBLE_WORD;

const ALLOCATED_BIT: u32 = 0x1;
const SIZE_MASK: u32 = !0x7;

/// Rounds `size` up to the nearest multiple of [`ALIGNMENT`]. `size` must be
/// small enough not to overflow.
#[inline]
pub const fn align(size: usize) -> usize {
    (size + ALIGNMENT - 1) & !(ALIGNMENT - 1)
}

/// Size of the block needed to hold `size` payload bytes, including tags and
/// padding. Returns `None` if such a block could never exist.
#[inline]
pub(crate) fn block_size_for(size: usize) -> Option<usize> {
    let payload = size.checked_add(ALIGNMENT - 1)? & !(ALIGNMENT - 1);
    let block_size = payload.checked_add(DOUBLE_WORD)?.max(MIN_BLOCK_SIZE);

    (block_size <= MAX_HEAP_LIMIT).then_some(block_size)
}

/// Decoded boundary tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Tag {
    pub size: usize,
    pub allocated: bool,
}

impl Tag {
    #[inline]
    pub const fn new(size: usize, allocated: bool) -> Self {
        Self { size, allocated }
    }

    /// Tag of the epilogue, the zero sized allocated block at the top.
    pub const EPILOGUE: Self = Self::new(0, true);

    #[inline]
    pub const fn pack(self) -> u32 {
        self.size as u32 | if self.allocated { ALLOCATED_BIT } else { 0 }
    }

    #[inline]
    pub const fn unpack(word: u32) -> Self {
        Self {
            size: (word & SIZE_MASK) as usize,
            allocated: word & ALLOCATED_BIT != 0,
        }
    }

    /// Decodes the tag stored at `offset`.
    #[inline]
    pub fn read(mem: &[u8], offset: usize) -> Self {
        Self::unpack(read_word(mem, offset))
    }

    /// Encodes this tag at `offset`.
    #[inline]
    pub fn write(self, mem: &mut [u8], offset: usize) {
        debug_assert_eq!(self.size % ALIGNMENT, 0);
        write_word(mem, offset, self.pack());
    }
}

/// Reads the 32 bit word at `offset`. Panics if the word is not entirely
/// inside `mem`.
#[inline]
pub(crate) fn read_word(mem: &[u8], offset: usize) -> u32 {
    let mut word = [0; WORD_SIZE];
    word.copy_from_slice(&mem[offset..offset + WORD_SIZE]);
    u32::from_ne_bytes(word)
}

/// Writes a 32 bit word at `offset`. Panics if the word is not entirely inside
/// `mem`.
#[inline]
pub(crate) fn write_word(mem: &mut [u8], offset: usize, value: u32) {
    mem[offset..offset + WORD_SIZE].copy_from_slice(&value.to_ne_bytes());
}
