use crate::tag::{Tag, DOUBLE_WORD, MIN_BLOCK_SIZE, WORD_SIZE};

/// Offset of the prologue payload. The arena starts with one padding word so
/// that, after the prologue header, every payload lands on an 8 byte
/// boundary:
///
/// ```text
///  0        4          8                  16         20         24
///  +--------+----------+------------------+----------+----------+----
///  | unused | prologue | prologue payload | prologue | epilogue | first
///  |        | header   | (free list end)  | footer   | header   | block
///  +--------+----------+------------------+----------+----------+----
/// ```
pub(crate) const PROLOGUE: Block = Block::at(DOUBLE_WORD);

/// Bytes written by heap initialization: padding, prologue and epilogue.
pub(crate) const INITIAL_LAYOUT_SIZE: usize = WORD_SIZE + MIN_BLOCK_SIZE + WORD_SIZE;

/// A block identified by the arena offset of its payload. This is only a
/// handle, every query reads the boundary tags from the arena bytes it's
/// given, so it never dangles and never aliases anything. All accesses go
/// through slice indexing, an invalid handle panics instead of touching memory
/// outside the arena.
///
/// Neighbors are computed from sizes alone:
///
/// ```text
///          prev footer   header                footer   next header
///        ------+------+--------+---------------+--------+--------+------
///         prev | size | size|a |    payload    | size|a | size|a |  next
///        ------+------+--------+---------------+--------+--------+------
///                              ^                                  ^
///                              self                               self + size
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct Block(usize);

impl Block {
    #[inline]
    pub const fn at(offset: usize) -> Self {
        Self(offset)
    }

    /// Arena offset of the payload.
    #[inline]
    pub const fn offset(self) -> usize {
        self.0
    }

    #[inline]
    pub const fn header_offset(self) -> usize {
        self.0 - WORD_SIZE
    }

    /// Footer location for a block of `size` bytes starting here.
    #[inline]
    pub const fn footer_offset(self, size: usize) -> usize {
        self.0 + size - DOUBLE_WORD
    }

    #[inline]
    pub fn header(self, mem: &[u8]) -> Tag {
        Tag::read(mem, self.header_offset())
    }

    /// Footer tag, located through the size stored in the header.
    #[inline]
    pub fn footer(self, mem: &[u8]) -> Tag {
        Tag::read(mem, self.footer_offset(self.size(mem)))
    }

    /// Total block size, tags included.
    #[inline]
    pub fn size(self, mem: &[u8]) -> usize {
        self.header(mem).size
    }

    #[inline]
    pub fn is_allocated(self, mem: &[u8]) -> bool {
        self.header(mem).allocated
    }

    /// Number of bytes between header and footer.
    #[inline]
    pub fn payload_size(self, mem: &[u8]) -> usize {
        self.size(mem) - DOUBLE_WORD
    }

    /// Footer of the physically previous block.
    #[inline]
    pub fn prev_footer(self, mem: &[u8]) -> Tag {
        Tag::read(mem, self.0 - DOUBLE_WORD)
    }

    #[inline]
    pub fn next(self, mem: &[u8]) -> Block {
        Block(self.0 + self.size(mem))
    }

    #[inline]
    pub fn prev(self, mem: &[u8]) -> Block {
        Block(self.0 - self.prev_footer(mem).size)
    }

    /// Writes header and footer so that this block spans `size` bytes.
    #[inline]
    pub fn write(self, mem: &mut [u8], size: usize, allocated: bool) {
        let tag = Tag::new(size, allocated);
        tag.write(mem, self.header_offset());
        tag.write(mem, self.footer_offset(size));
    }

    /// Marks this position as the epilogue. Only the header is written, the
    /// epilogue has no payload and no footer.
    #[inline]
    pub fn write_epilogue(self, mem: &mut [u8]) {
        Tag::EPILOGUE.write(mem, self.header_offset());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::ALIGNMENT;

    /// Lays out a prologue, the given blocks and an epilogue into a buffer.
    fn layout(blocks: &[(usize, bool)]) -> Vec<u8> {
        let total: usize = blocks.iter().map(|(size, _)| size).sum();
        let mut mem = vec![0; INITIAL_LAYOUT_SIZE + total];

        PROLOGUE.write(&mut mem, MIN_BLOCK_SIZE, true);
        let mut block = PROLOGUE.next(&mem);
        for &(size, allocated) in blocks {
            block.write(&mut mem, size, allocated);
            block = block.next(&mem);
        }
        block.write_epilogue(&mut mem);

        mem
    }

    #[test]
    fn initial_layout_is_aligned() {
        assert_eq!(PROLOGUE.offset() % ALIGNMENT, 0);
        assert_eq!(INITIAL_LAYOUT_SIZE, 24);

        let mem = layout(&[]);
        let epilogue = PROLOGUE.next(&mem);
        assert_eq!(epilogue.offset(), INITIAL_LAYOUT_SIZE);
        assert_eq!(epilogue.header(&mem), Tag::EPILOGUE);
    }

    #[test]
    fn neighbors_from_sizes() {
        let mem = layout(&[(32, true), (48, false), (16, true)]);

        let first = PROLOGUE.next(&mem);
        assert_eq!(first.offset(), 24);
        assert_eq!(first.size(&mem), 32);
        assert!(first.is_allocated(&mem));
        assert_eq!(first.payload_size(&mem), 24);

        let second = first.next(&mem);
        assert_eq!(second.offset(), 56);
        assert!(!second.is_allocated(&mem));
        assert_eq!(second.header(&mem), second.footer(&mem));
        assert_eq!(second.prev(&mem), first);
        assert_eq!(second.prev_footer(&mem), Tag::new(32, true));

        let third = second.next(&mem);
        assert_eq!(third.prev(&mem), second);
        assert_eq!(first.prev(&mem), PROLOGUE);

        let epilogue = third.next(&mem);
        assert_eq!(epilogue.header(&mem), Tag::EPILOGUE);
        assert_eq!(epilogue.offset(), mem.len());
    }

    #[test]
    fn rewriting_tags_resizes_the_block() {
        let mut mem = layout(&[(64, false)]);
        let block = PROLOGUE.next(&mem);

        block.write(&mut mem, 24, true);
        let rest = block.next(&mem);
        rest.write(&mut mem, 40, false);

        assert_eq!(block.footer(&mem), Tag::new(24, true));
        assert_eq!(rest.offset(), block.offset() + 24);
        assert_eq!(rest.header(&mem), rest.footer(&mem));
        assert_eq!(rest.next(&mem).header(&mem), Tag::EPILOGUE);
    }
}
