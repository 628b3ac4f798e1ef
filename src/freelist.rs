use crate::{
    block::{Block, PROLOGUE},
    tag::{read_word, write_word, WORD_SIZE},
};

/// When a block is free its payload is of no use to anyone, so we keep the
/// free list links right there. The list is doubly linked and stores arena
/// offsets instead of addresses, which keeps each link at 4 bytes and lets
/// every access go through a bounds checked slice:
///
/// ```text
/// +----------------------------+
/// | header                     |
/// +----------------------------+ <- payload offset
/// | offset of next free block  |  <---+
/// +----------------------------+      | links, 0 means none
/// | offset of prev free block  |  <---+
/// +----------------------------+
/// |          ......            |
/// +----------------------------+
/// | footer                     |
/// +----------------------------+
/// ```
///
/// New blocks are always inserted at the head (`root`), so the most recently
/// released memory is the first candidate for the next allocation. Following
/// `next` from `root` eventually reaches the prologue, which is allocated and
/// never handed out, so it works as the terminator of every walk:
///
/// ```text
///            next           next           next
///  root -> +------+  -->  +------+  -->  +------+  -->  +----------+
///          | Free |       | Free |       | Free |       | Prologue |
///          +------+  <--  +------+  <--  +------+  <--  +----------+
///            prev           prev           prev
/// ```
///
/// Offset 0 is the padding word before the prologue, no payload ever lives
/// there, so it doubles as the null link.
#[derive(Debug)]
pub(crate) struct FreeList {
    /// Most recently inserted block, or [`PROLOGUE`] when the list is empty.
    root: Block,
    /// Number of free blocks in the list.
    len: usize,
}

const NONE: u32 = 0;

#[inline]
fn decode(link: u32) -> Option<Block> {
    (link != NONE).then_some(Block::at(link as usize))
}

#[inline]
fn encode(block: Option<Block>) -> u32 {
    block.map_or(NONE, |block| block.offset() as u32)
}

impl FreeList {
    pub const fn new() -> Self {
        Self {
            root: PROLOGUE,
            len: 0,
        }
    }

    #[inline]
    pub fn root(&self) -> Block {
        self.root
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Free block after `block`, in the direction of the prologue.
    #[inline]
    pub fn next_of(mem: &[u8], block: Block) -> Option<Block> {
        decode(read_word(mem, block.offset()))
    }

    /// Free block before `block`, in the direction of the root.
    #[inline]
    pub fn prev_of(mem: &[u8], block: Block) -> Option<Block> {
        decode(read_word(mem, block.offset() + WORD_SIZE))
    }

    #[inline]
    fn set_next(mem: &mut [u8], block: Block, next: Option<Block>) {
        write_word(mem, block.offset(), encode(next));
    }

    #[inline]
    fn set_prev(mem: &mut [u8], block: Block, prev: Option<Block>) {
        write_word(mem, block.offset() + WORD_SIZE, encode(prev));
    }

    /// Writes the links of the prologue, which terminates the list. Called
    /// once when the heap is laid out.
    pub fn terminate(&mut self, mem: &mut [u8]) {
        Self::set_next(mem, PROLOGUE, None);
        Self::set_prev(mem, PROLOGUE, None);
        *self = Self::new();
    }

    /// Makes `block` the new root. `block` must be free and not already in
    /// the list, except for being the root itself, in which case nothing
    /// happens.
    pub fn insert_at_head(&mut self, mem: &mut [u8], block: Block) {
        if block == self.root {
            return;
        }

        Self::set_prev(mem, self.root, Some(block));
        Self::set_next(mem, block, Some(self.root));
        Self::set_prev(mem, block, None);

        self.root = block;
        self.len += 1;
    }

    /// Splices `block` out of the list. `block` must currently be in it.
    pub fn remove(&mut self, mem: &mut [u8], block: Block) {
        let next = Self::next_of(mem, block).unwrap_or(PROLOGUE);

        if block == self.root {
            self.root = next;
            Self::set_prev(mem, next, None);
        } else {
            let prev = Self::prev_of(mem, block);
            if let Some(prev) = prev {
                Self::set_next(mem, prev, Some(next));
            }
            Self::set_prev(mem, next, prev);
        }

        self.len -= 1;
    }

    /// First fit: the first block, starting at the root, that can hold
    /// `size` bytes.
    pub fn find_fit(&self, mem: &[u8], size: usize) -> Option<Block> {
        self.iter(mem).find(|block| block.size(mem) >= size)
    }

    /// Iterates over the free blocks from the root to the prologue, excluding
    /// the prologue.
    pub fn iter<'m>(&self, mem: &'m [u8]) -> Iter<'m> {
        Iter {
            mem,
            current: self.root,
        }
    }
}

/// See [`FreeList::iter`].
pub(crate) struct Iter<'m> {
    mem: &'m [u8],
    current: Block,
}

impl Iterator for Iter<'_> {
    type Item = Block;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current == PROLOGUE {
            return None;
        }

        let block = self.current;
        self.current = FreeList::next_of(self.mem, block).unwrap_or(PROLOGUE);

        Some(block)
    }
}
