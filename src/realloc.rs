use crate::{
    arena::HeapArena,
    block::Block,
    heap::Heap,
    tag::{block_size_for, DOUBLE_WORD, MIN_BLOCK_SIZE},
    AllocError, Pointer,
};

/// How a resize request was satisfied. Strategies are tried in declaration
/// order, only [`Resize::Relocate`] can fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Resize {
    /// The block was big enough to split off a free remainder.
    Shrink,
    /// The block already had exactly the required size.
    InPlace,
    /// The free block right before was absorbed, the payload moved down.
    AbsorbPrev,
    /// The free block right after was absorbed.
    AbsorbNext,
    /// A new block was allocated, contents copied and the old one released.
    Relocate,
}

impl<A: HeapArena> Heap<A> {
    /// Changes the size of the allocation at `address` to `size` bytes,
    /// moving it if necessary. Returns the address of the resized allocation,
    /// whose first `min(old size, size)` bytes are preserved.
    ///
    /// - `address == None` behaves like [`Heap::allocate`].
    /// - `size == 0` behaves like [`Heap::release`] and returns `Ok(None)`.
    ///
    /// On failure the original allocation is left untouched.
    ///
    /// # Safety
    ///
    /// Same as [`Heap::release`]: `address` must be a live allocation of this
    /// heap.
    pub unsafe fn resize(&mut self, address: Pointer<u8>, size: usize) -> Result<Pointer<u8>, AllocError> {
        let Some(address) = address else {
            return self.allocate(size);
        };

        if size == 0 {
            self.release(Some(address));
            return Ok(None);
        }

        let block = self.allocated_block_of(address)?;
        let (block, strategy) = self.reallocate(block, size)?;

        log::trace!("resize({address:p}, {size}) -> {strategy:?}, block {}", block.offset());

        Ok(Some(self.pointer_to(block)))
    }

    /// Resizes the allocated `block` so it can hold `size` payload bytes.
    pub(crate) fn reallocate(&mut self, block: Block, size: usize) -> Result<(Block, Resize), AllocError> {
        let required = block_size_for(size).ok_or(AllocError::OutOfMemory { requested: size })?;
        let mem = self.arena.bytes();
        let old = block.size(mem);

        if old >= required + MIN_BLOCK_SIZE {
            self.shrink(block, old, required);
            return Ok((block, Resize::Shrink));
        }

        if old == required {
            return Ok((block, Resize::InPlace));
        }

        let prev_footer = block.prev_footer(mem);
        if !prev_footer.allocated && old + prev_footer.size >= required + MIN_BLOCK_SIZE {
            let block = self.absorb_prev(block, old, required);
            return Ok((block, Resize::AbsorbPrev));
        }

        let next = block.next(mem);
        let next_header = next.header(mem);
        if !next_header.allocated && old + next_header.size >= required + MIN_BLOCK_SIZE {
            self.absorb_next(block, next, old, required);
            return Ok((block, Resize::AbsorbNext));
        }

        let new_block = self.allocate_block(required)?;
        let count = old.min(required) - DOUBLE_WORD;
        self.arena
            .bytes_mut()
            .copy_within(block.offset()..block.offset() + count, new_block.offset());
        self.free_block(block);

        Ok((new_block, Resize::Relocate))
    }

    /// Cuts the allocated `block` of `old` bytes down to `required` bytes and
    /// releases the tail:
    ///
    /// ```text
    /// +------------------------------+------+       +----------+-------------------+------+
    /// |          Alloc (old)         | Next |  -->  |  Alloc   | Free (old - req)  | Next |
    /// +------------------------------+------+       +----------+-------------------+------+
    /// ```
    ///
    /// If the next block is free, the tail merges with it.
    fn shrink(&mut self, block: Block, old: usize, required: usize) {
        let mem = self.arena.bytes_mut();
        block.write(mem, required, true);

        let remainder = block.next(mem);
        remainder.write(mem, old - required, false);

        self.release_remainder(remainder);
    }

    /// Moves `block` downwards into the free block right before it. The
    /// payload moves to the start of the previous block, and whatever is left
    /// after `required` bytes becomes a free block:
    ///
    /// ```text
    /// +-------------+----------+      +--------------------+------+
    /// |    Free     |  Alloc   | -->  |       Alloc        | Free |
    /// +-------------+----------+      +--------------------+------+
    ///  ^             |                 ^
    ///  |             +--- payload -----+
    ///  new address        moves here
    /// ```
    ///
    /// Source and destination may overlap, so the move must handle that.
    fn absorb_prev(&mut self, block: Block, old: usize, required: usize) -> Block {
        let mem = self.arena.bytes_mut();
        let prev = block.prev(mem);
        let total = old + prev.size(mem);

        // The links of `prev` get overwritten by the move, unlink it first.
        self.free_list.remove(mem, prev);

        let count = old.min(required) - DOUBLE_WORD;
        mem.copy_within(block.offset()..block.offset() + count, prev.offset());

        prev.write(mem, required, true);
        let remainder = prev.next(mem);
        remainder.write(mem, total - required, false);

        self.release_remainder(remainder);

        prev
    }

    /// Grows `block` upwards into the free `next` block. The payload doesn't
    /// move.
    ///
    /// ```text
    /// +----------+-------------+      +--------------------+------+
    /// |  Alloc   |    Free     | -->  |       Alloc        | Free |
    /// +----------+-------------+      +--------------------+------+
    /// ```
    fn absorb_next(&mut self, block: Block, next: Block, old: usize, required: usize) {
        let mem = self.arena.bytes_mut();
        let total = old + next.size(mem);

        self.free_list.remove(mem, next);

        block.write(mem, required, true);
        let remainder = block.next(mem);
        remainder.write(mem, total - required, false);

        self.release_remainder(remainder);
    }

    /// Merges a freshly cut free `remainder` with its neighbors and puts it in
    /// the free list.
    fn release_remainder(&mut self, remainder: Block) {
        let remainder = self.coalesce(remainder);
        self.free_list.insert_at_head(self.arena.bytes_mut(), remainder);
    }
}

#[cfg(test)]
mod tests {
    use std::ptr::NonNull;

    use super::*;
    use crate::{config::HeapConfig, tag::Tag};

    fn block_at(heap: &Heap, address: NonNull<u8>) -> Block {
        heap.allocated_block_of(address).unwrap()
    }

    fn fill(address: NonNull<u8>, len: usize, value: u8) {
        unsafe { address.as_ptr().write_bytes(value, len) };
    }

    fn assert_filled(address: NonNull<u8>, len: usize, value: u8) {
        let bytes = unsafe { std::slice::from_raw_parts(address.as_ptr(), len) };
        assert!(bytes.iter().all(|byte| *byte == value));
    }

    #[test]
    fn resize_none_allocates() {
        let mut heap = Heap::new();
        let address = unsafe { heap.resize(None, 100) }.unwrap().unwrap();
        assert!(unsafe { heap.usable_size(address) } >= 100);
        assert_eq!(unsafe { heap.resize(None, 0) }, Ok(None));
    }

    #[test]
    fn resize_to_zero_releases() {
        let mut heap = Heap::new();
        let address = heap.allocate(100).unwrap();
        assert_eq!(heap.free_blocks(), 1);

        assert_eq!(unsafe { heap.resize(address, 0) }, Ok(None));
        assert_eq!(heap.free_blocks(), 1);
        assert_eq!(heap.free_list.root().size(heap.arena.bytes()), 4096);
    }

    #[test]
    fn shrink_splits_and_merges_forward() {
        let mut heap = Heap::new();
        let address = heap.allocate(1000).unwrap().unwrap();
        let block = block_at(&heap, address);

        let (resized, strategy) = heap.reallocate(block, 10).unwrap();
        assert_eq!((resized, strategy), (block, Resize::Shrink));

        let mem = heap.arena.bytes();
        assert_eq!(block.header(mem), Tag::new(24, true));
        // The tail merged with the free rest of the chunk.
        let tail = block.next(mem);
        assert_eq!(tail.header(mem), Tag::new(4096 - 24, false));
        assert_eq!(heap.free_blocks(), 1);
        assert_eq!(heap.free_list.root(), tail);
    }

    #[test]
    fn same_size_stays_in_place() {
        let mut heap = Heap::new();
        let address = heap.allocate(40).unwrap().unwrap();
        let block = block_at(&heap, address);

        assert_eq!(heap.reallocate(block, 40).unwrap(), (block, Resize::InPlace));
        // Rounds up to the same 48 byte block.
        assert_eq!(heap.reallocate(block, 33).unwrap(), (block, Resize::InPlace));
        assert_eq!(block.size(heap.arena.bytes()), 48);
    }

    #[test]
    fn small_shrink_without_free_neighbors_relocates() {
        let mut heap = Heap::new();
        let address = heap.allocate(40).unwrap().unwrap();
        let _guard = heap.allocate(8).unwrap();
        fill(address, 40, 4);

        // 48 byte block, 40 byte block needed: the 8 spare bytes can't be a
        // block of their own.
        let block = block_at(&heap, address);
        let (moved, strategy) = heap.reallocate(block, 32).unwrap();
        assert_eq!(strategy, Resize::Relocate);
        assert_ne!(moved, block);

        let mem = heap.arena.bytes();
        assert_eq!(moved.header(mem), Tag::new(40, true));
        assert!(!block.is_allocated(mem));
        assert_filled(heap.pointer_to(moved), 32, 4);
        heap.check().unwrap();
    }

    #[test]
    fn small_shrink_absorbs_free_prev() {
        let mut heap = Heap::new();
        let a = heap.allocate(200).unwrap();
        let b = heap.allocate(40).unwrap().unwrap();
        let _guard = heap.allocate(8).unwrap();
        fill(b, 40, 6);
        unsafe { heap.release(a) };

        let block = block_at(&heap, b);
        let prev = block.prev(heap.arena.bytes());
        assert_eq!(heap.reallocate(block, 32).unwrap(), (prev, Resize::AbsorbPrev));

        // 208 + 48 bytes available, 40 needed.
        let mem = heap.arena.bytes();
        assert_eq!(prev.header(mem), Tag::new(40, true));
        assert_eq!(prev.next(mem).header(mem), Tag::new(216, false));
        assert_filled(heap.pointer_to(prev), 32, 6);
        heap.check().unwrap();
    }

    #[test]
    fn small_shrink_absorbs_free_next() {
        let mut heap = Heap::new();
        let address = heap.allocate(40).unwrap().unwrap();
        let block = block_at(&heap, address);

        assert_eq!(heap.reallocate(block, 32).unwrap(), (block, Resize::AbsorbNext));

        let mem = heap.arena.bytes();
        assert_eq!(block.header(mem), Tag::new(40, true));
        assert_eq!(block.next(mem).header(mem), Tag::new(4096 - 40, false));
        heap.check().unwrap();
    }

    /// Allocated block of 48 bytes right after a free block of 32 bytes, with
    /// an allocated guard after it.
    fn heap_with_free_prev() -> (Heap, Block, Block) {
        let mut heap = Heap::new();
        let prev = heap.allocate(24).unwrap();
        let address = heap.allocate(40).unwrap().unwrap();
        let _guard = heap.allocate(8).unwrap();
        fill(address, 40, 8);
        unsafe { heap.release(prev) };

        let block = block_at(&heap, address);
        let prev = block.prev(heap.arena.bytes());
        (heap, block, prev)
    }

    /// Allocated block of 48 bytes right before a free block of 32 bytes,
    /// with an allocated guard after both.
    fn heap_with_free_next() -> (Heap, Block) {
        let mut heap = Heap::new();
        let address = heap.allocate(40).unwrap().unwrap();
        let next = heap.allocate(24).unwrap();
        let _guard = heap.allocate(8).unwrap();
        fill(address, 40, 8);
        unsafe { heap.release(next) };

        let block = block_at(&heap, address);
        (heap, block)
    }

    #[test]
    fn prev_absorb_threshold_is_exact() {
        // 48 + 32 = 80 bytes. A 72 byte block would leave 8 bytes, so the
        // free prev is skipped and the block relocates.
        let (mut heap, block, _) = heap_with_free_prev();
        let (moved, strategy) = heap.reallocate(block, 64).unwrap();
        assert_eq!(strategy, Resize::Relocate);
        assert!(moved > block);
        assert_filled(heap.pointer_to(moved), 40, 8);
        heap.check().unwrap();

        // A 64 byte block leaves exactly the minimum block size.
        let (mut heap, block, prev) = heap_with_free_prev();
        assert_eq!(heap.reallocate(block, 56).unwrap(), (prev, Resize::AbsorbPrev));
        let mem = heap.arena.bytes();
        assert_eq!(prev.header(mem), Tag::new(64, true));
        assert_eq!(prev.next(mem).header(mem), Tag::new(MIN_BLOCK_SIZE, false));
        assert_filled(heap.pointer_to(prev), 40, 8);
        heap.check().unwrap();
    }

    #[test]
    fn next_absorb_threshold_is_exact() {
        let (mut heap, block) = heap_with_free_next();
        let (moved, strategy) = heap.reallocate(block, 64).unwrap();
        assert_eq!(strategy, Resize::Relocate);
        assert_ne!(moved, block);
        assert_filled(heap.pointer_to(moved), 40, 8);
        heap.check().unwrap();

        let (mut heap, block) = heap_with_free_next();
        assert_eq!(heap.reallocate(block, 56).unwrap(), (block, Resize::AbsorbNext));
        let mem = heap.arena.bytes();
        assert_eq!(block.header(mem), Tag::new(64, true));
        assert_eq!(block.next(mem).header(mem), Tag::new(MIN_BLOCK_SIZE, false));
        assert_filled(heap.pointer_to(block), 40, 8);
        heap.check().unwrap();
    }

    #[test]
    fn grow_into_next_block() {
        let mut heap = Heap::new();
        let address = heap.allocate(64).unwrap().unwrap();
        fill(address, 64, 7);

        let block = block_at(&heap, address);
        assert_eq!(heap.reallocate(block, 512).unwrap(), (block, Resize::AbsorbNext));

        let mem = heap.arena.bytes();
        assert_eq!(block.header(mem), Tag::new(520, true));
        assert_eq!(block.footer(mem), Tag::new(520, true));
        assert_eq!(block.next(mem).header(mem), Tag::new(4096 - 520, false));
        assert_filled(address, 64, 7);
    }

    #[test]
    fn grow_into_prev_block_moves_payload() {
        let mut heap = Heap::new();
        let a = heap.allocate(200).unwrap();
        let b = heap.allocate(100).unwrap().unwrap();
        let _guard = heap.allocate(8).unwrap();

        fill(b, 100, 9);
        unsafe { heap.release(a) };

        let block = block_at(&heap, b);
        let prev = block.prev(heap.arena.bytes());
        let (moved, strategy) = heap.reallocate(block, 250).unwrap();
        assert_eq!(strategy, Resize::AbsorbPrev);
        assert_eq!(moved, prev);

        let mem = heap.arena.bytes();
        // 208 + 112 bytes available, 264 needed, 56 left over.
        assert_eq!(moved.header(mem), Tag::new(264, true));
        assert_eq!(moved.next(mem).header(mem), Tag::new(56, false));
        assert_eq!(heap.free_list.root(), moved.next(mem));
        assert_filled(heap.pointer_to(moved), 100, 9);
    }

    #[test]
    fn absorbing_prev_merges_leftover_with_next() {
        let mut heap = Heap::new();
        let a = heap.allocate(200).unwrap();
        let b = heap.allocate(100).unwrap().unwrap();
        let c = heap.allocate(16).unwrap();
        let _guard = heap.allocate(8).unwrap();

        fill(b, 100, 3);
        unsafe {
            heap.release(a);
            heap.release(c);
        }
        assert_eq!(heap.free_blocks(), 3);

        let moved = unsafe { heap.resize(Some(b), 250) }.unwrap().unwrap();
        assert!(moved < b);
        assert_filled(moved, 100, 3);

        // 56 bytes left from A + B merged with C (24 bytes).
        let block = block_at(&heap, moved);
        let mem = heap.arena.bytes();
        assert_eq!(block.next(mem).header(mem), Tag::new(80, false));
        assert_eq!(heap.free_blocks(), 2);
    }

    #[test]
    fn relocate_when_no_neighbor_helps() {
        let mut heap = Heap::new();
        let a = heap.allocate(64).unwrap().unwrap();
        let _guard = heap.allocate(8).unwrap();
        fill(a, 64, 5);

        let block = block_at(&heap, a);
        let (moved, strategy) = heap.reallocate(block, 256).unwrap();
        assert_eq!(strategy, Resize::Relocate);
        assert_ne!(moved, block);
        assert_filled(heap.pointer_to(moved), 64, 5);
        assert!(!block.is_allocated(heap.arena.bytes()));
    }

    #[test]
    fn failed_relocation_leaves_block_untouched() {
        let mut heap = Heap::with_config(HeapConfig::new().with_max_heap(4200));
        let a = heap.allocate(64).unwrap().unwrap();
        let _guard = heap.allocate(8).unwrap();
        fill(a, 64, 1);

        let size = heap.heap_size();
        let free = heap.free_blocks();
        let result = unsafe { heap.resize(Some(a), 8000) };

        assert_eq!(result, Err(AllocError::OutOfMemory { requested: 8008 }));
        assert_eq!(heap.heap_size(), size);
        assert_eq!(heap.free_blocks(), free);
        assert_eq!(unsafe { heap.usable_size(a) }, 64);
        assert_filled(a, 64, 1);
    }

    #[test]
    fn resize_rejects_foreign_pointers() {
        let mut heap = Heap::new();
        let address = heap.allocate(32).unwrap().unwrap();
        unsafe {
            heap.release(Some(address));
            assert!(matches!(
                heap.resize(Some(address), 64),
                Err(AllocError::InvalidPointer { .. })
            ));
        }
    }

    #[test]
    fn shrink_then_grow_back_keeps_contents() {
        let mut heap = Heap::new();
        let address = heap.allocate(256).unwrap();
        let bytes: Vec<u8> = (0..64).collect();
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), address.unwrap().as_ptr(), 64);

            let shrunk = heap.resize(address, 64).unwrap();
            assert_eq!(shrunk, address);
            let grown = heap.resize(shrunk, 256).unwrap();
            assert_eq!(grown, address);

            let contents = std::slice::from_raw_parts(grown.unwrap().as_ptr(), 64);
            assert_eq!(contents, &bytes[..]);
        }
    }
}
