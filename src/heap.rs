use std::ptr::NonNull;

use crate::{
    arena::{HeapArena, MappedArena},
    block::{Block, INITIAL_LAYOUT_SIZE, PROLOGUE},
    config::{HeapConfig, MAX_HEAP_LIMIT},
    freelist::FreeList,
    tag::{align, block_size_for, write_word, ALIGNMENT, MIN_BLOCK_SIZE},
    AllocError, Pointer,
};

/// Dynamic memory allocator over a single growable arena. Blocks carry
/// boundary tags at both ends and free blocks are linked through their own
/// payloads into an explicit LIFO list (see [`crate::freelist`]). The heap
/// looks like this at any point between two calls:
///
/// ```text
/// +---+----------+-------+------+-------+-------+-----+----------+
/// |pad| prologue | Alloc | Free | Alloc | Alloc | ... | epilogue |
/// +---+----------+-------+------+-------+-------+-----+----------+
///                           ^
///                           +--- somewhere in the free list
/// ```
///
/// No two free blocks are ever adjacent, every free block is in the free list
/// and the free list holds nothing else.
///
/// This struct is not thread safe and needs mutable borrows to operate. Wrap
/// it in a lock to share it, [`crate::LockedHeap`] does exactly that.
#[derive(Debug)]
pub struct Heap<A: HeapArena = MappedArena> {
    /// Where blocks live.
    pub(crate) arena: A,
    /// Free blocks, most recently released first.
    pub(crate) free_list: FreeList,
    /// Minimum growth whenever no free block fits.
    pub(crate) chunk_size: usize,
    /// Whether the prologue and epilogue are in place.
    pub(crate) initialized: bool,
}

impl Heap<MappedArena> {
    /// Heap with the default configuration. No memory is mapped until the
    /// first allocation.
    pub const fn new() -> Self {
        Self::with_config(HeapConfig::new())
    }

    pub const fn with_config(config: HeapConfig) -> Self {
        Self::with_arena(MappedArena::with_capacity(config.max_heap), config)
    }
}

impl Default for Heap<MappedArena> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: HeapArena> Heap<A> {
    /// Builds a heap on top of a host supplied arena. The arena must be
    /// empty. `config.max_heap` is not used, the arena decides its own
    /// limits.
    pub const fn with_arena(arena: A, config: HeapConfig) -> Self {
        Self {
            arena,
            free_list: FreeList::new(),
            chunk_size: config.chunk_size,
            initialized: false,
        }
    }

    /// Lays out the prologue and epilogue and grows the heap by one chunk.
    /// Calling it again does nothing. [`Heap::allocate`] and
    /// [`Heap::resize`] initialize the heap on demand, so calling this is
    /// only necessary to pay the cost upfront.
    ///
    /// If the sentinels fit but the first chunk doesn't, the heap stays
    /// initialized and empty and the error is still reported.
    pub fn init(&mut self) -> Result<(), AllocError> {
        if self.initialized {
            return Ok(());
        }

        let start = self.arena.sbrk(INITIAL_LAYOUT_SIZE)?;
        debug_assert_eq!(start, 0, "heap arena must start empty");

        let mem = self.arena.bytes_mut();
        write_word(mem, 0, 0);
        PROLOGUE.write(mem, MIN_BLOCK_SIZE, true);
        PROLOGUE.next(mem).write_epilogue(mem);
        self.free_list.terminate(mem);
        self.initialized = true;

        log::debug!("heap initialized at {:p}", self.arena.base());

        self.extend(self.chunk_size)?;

        Ok(())
    }

    /// Allocates a block that can hold at least `size` bytes and returns the
    /// address of its payload, aligned to [`ALIGNMENT`]. Returns `Ok(None)`
    /// when `size` is zero.
    pub fn allocate(&mut self, size: usize) -> Result<Pointer<u8>, AllocError> {
        if size == 0 {
            return Ok(None);
        }

        self.init_for(size)?;

        let block_size = block_size_for(size).ok_or(AllocError::OutOfMemory { requested: size })?;
        let block = self.allocate_block(block_size)?;

        log::trace!("allocate({size}) -> block {} ({block_size} bytes)", block.offset());

        Ok(Some(self.pointer_to(block)))
    }

    /// Releases the block that `address` points into. `None` is ignored.
    ///
    /// # Safety
    ///
    /// `address` must have been returned by this heap and must not have been
    /// released since. Pointers that obviously don't belong to this heap are
    /// detected and ignored, but double releases that happen to land on a
    /// block that's been reallocated cannot be told apart from valid calls.
    pub unsafe fn release(&mut self, address: Pointer<u8>) {
        let Some(address) = address else {
            return;
        };

        match self.allocated_block_of(address) {
            Ok(block) => {
                log::trace!("release({address:p}) -> block {}", block.offset());
                self.free_block(block);
            }
            Err(err) => log::warn!("release ignored: {err}"),
        }
    }

    /// Number of payload bytes usable at `address`, which is at least what
    /// was requested when it was allocated.
    ///
    /// # Safety
    ///
    /// `address` must be a live allocation of this heap.
    pub unsafe fn usable_size(&self, address: NonNull<u8>) -> usize {
        match self.allocated_block_of(address) {
            Ok(block) => block.payload_size(self.arena.bytes()),
            Err(_) => 0,
        }
    }

    /// Lowest address of the arena.
    pub fn heap_lo(&self) -> NonNull<u8> {
        self.arena.base()
    }

    /// Highest valid address of the arena, the byte right before the top.
    /// Equal to [`Heap::heap_lo`] while the heap is empty.
    pub fn heap_hi(&self) -> NonNull<u8> {
        let base = self.arena.base();
        match self.arena.len() {
            0 => base,
            len => unsafe { base.add(len - 1) },
        }
    }

    /// Number of bytes taken from the arena. Never decreases.
    pub fn heap_size(&self) -> usize {
        self.arena.len()
    }

    /// Number of blocks in the free list.
    pub fn free_blocks(&self) -> usize {
        self.free_list.len()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Same as [`Heap::init`] but reports failures in terms of the request
    /// that triggered the initialization.
    pub(crate) fn init_for(&mut self, size: usize) -> Result<(), AllocError> {
        if self.initialized {
            return Ok(());
        }

        self.init().map_err(|_| AllocError::OutOfMemory { requested: size })
    }

    /// Finds or makes a free block of at least `block_size` bytes and marks
    /// it allocated.
    pub(crate) fn allocate_block(&mut self, block_size: usize) -> Result<Block, AllocError> {
        let block = match self.free_list.find_fit(self.arena.bytes(), block_size) {
            Some(block) => block,
            None => self.extend(block_size.max(self.chunk_size))?,
        };

        self.place(block, block_size);

        Ok(block)
    }

    /// Marks `block` free, merges it with its free neighbors and puts the
    /// result at the head of the free list.
    pub(crate) fn free_block(&mut self, block: Block) {
        let mem = self.arena.bytes_mut();
        let size = block.size(mem);
        block.write(mem, size, false);

        let block = self.coalesce(block);
        self.free_list.insert_at_head(self.arena.bytes_mut(), block);
    }

    /// Grows the arena by `bytes`, rounded up to the alignment unit, and
    /// turns the new space into a free block. The old epilogue header becomes
    /// the header of the new block and a new epilogue is written at the top:
    ///
    /// ```text
    /// Before:
    ///
    /// +-----+-------+----------+
    /// | ... | Block | epilogue |
    /// +-----+-------+----------+
    ///                          ^
    ///                          old top
    ///
    /// After:
    ///
    /// +-----+-------+-----------------------------------+----------+
    /// | ... | Block |             New block             | epilogue |
    /// +-----+-------+-----------------------------------+----------+
    ///                                                              ^
    ///                                                              new top
    /// ```
    ///
    /// Growth is never smaller than [`MIN_BLOCK_SIZE`] and never takes the
    /// arena past [`MAX_HEAP_LIMIT`], which would no longer fit in a tag.
    ///
    /// If the block right before the old top was free, both are merged. The
    /// result is inserted at the head of the free list and returned. If the
    /// arena can't grow, nothing changes.
    pub(crate) fn extend(&mut self, bytes: usize) -> Result<Block, AllocError> {
        let available = MAX_HEAP_LIMIT.saturating_sub(self.arena.len());
        let size = (bytes <= available)
            .then(|| align(bytes.max(MIN_BLOCK_SIZE)))
            .filter(|size| *size <= available)
            .ok_or(AllocError::OutOfMemory { requested: bytes })?;

        let old_top = self.arena.sbrk(size)?;
        log::debug!("heap grew by {size} bytes, top at offset {}", old_top + size);

        let mem = self.arena.bytes_mut();
        let block = Block::at(old_top);
        block.write(mem, size, false);
        block.next(mem).write_epilogue(mem);

        let block = self.coalesce(block);
        self.free_list.insert_at_head(self.arena.bytes_mut(), block);

        Ok(block)
    }

    /// Carves an allocated block of `block_size` bytes out of the free
    /// `block`. When what's left is too small to be a block on its own the
    /// whole block is handed out, otherwise it's split and the remainder goes
    /// back to the free list:
    ///
    /// ```text
    /// Before:
    ///
    /// +------------------------------------------+
    /// |                   Free                   |
    /// +------------------------------------------+
    ///
    /// After:
    ///
    /// +--------------------+---------------------+
    /// | Alloc (block_size) |   Free (remainder)  |
    /// +--------------------+---------------------+
    /// ```
    pub(crate) fn place(&mut self, block: Block, block_size: usize) {
        let mem = self.arena.bytes_mut();
        let total = block.size(mem);

        self.free_list.remove(mem, block);

        if total - block_size < MIN_BLOCK_SIZE {
            block.write(mem, total, true);
        } else {
            block.write(mem, block_size, true);
            let remainder = block.next(mem);
            remainder.write(mem, total - block_size, false);
            self.free_list.insert_at_head(mem, remainder);
        }
    }

    /// Merges the free `block`, which is not in the free list yet, with its
    /// physical neighbors if they are free. Neighbors that get merged are
    /// removed from the free list. Returns the merged block, which starts at
    /// the previous block if that one was free.
    ///
    /// ```text
    /// +----------+---------+----------+        +--------------------------+
    /// | Free (A) | New (B) | Free (C) |  --->  |    Free (A + B + C)      |
    /// +----------+---------+----------+        +--------------------------+
    /// ```
    pub(crate) fn coalesce(&mut self, block: Block) -> Block {
        let mem = self.arena.bytes_mut();

        let prev_free = !block.prev_footer(mem).allocated;
        let next = block.next(mem);
        let next_free = !next.is_allocated(mem);
        let mut size = block.size(mem);

        match (prev_free, next_free) {
            (false, false) => block,

            (false, true) => {
                self.free_list.remove(mem, next);
                size += next.size(mem);
                block.write(mem, size, false);
                block
            }

            (true, false) => {
                let prev = block.prev(mem);
                self.free_list.remove(mem, prev);
                size += prev.size(mem);
                prev.write(mem, size, false);
                prev
            }

            (true, true) => {
                let prev = block.prev(mem);
                self.free_list.remove(mem, prev);
                self.free_list.remove(mem, next);
                size += prev.size(mem) + next.size(mem);
                prev.write(mem, size, false);
                prev
            }
        }
    }

    /// Address of the payload of `block`.
    #[inline]
    pub(crate) fn pointer_to(&self, block: Block) -> NonNull<u8> {
        unsafe { self.arena.base().add(block.offset()) }
    }

    /// Block whose payload starts at `address`. Only checks that such a block
    /// could exist: inside the arena, past the prologue and aligned.
    pub(crate) fn block_of(&self, address: NonNull<u8>) -> Result<Block, AllocError> {
        let invalid = AllocError::InvalidPointer {
            address: address.as_ptr() as usize,
        };

        let offset = (address.as_ptr() as usize)
            .checked_sub(self.arena.base().as_ptr() as usize)
            .ok_or(invalid)?;

        let valid = self.initialized
            && offset % ALIGNMENT == 0
            && offset > PROLOGUE.offset()
            && offset < self.arena.len();

        valid.then(|| Block::at(offset)).ok_or(invalid)
    }

    /// Like [`Heap::block_of`] but also requires the block to be allocated.
    pub(crate) fn allocated_block_of(&self, address: NonNull<u8>) -> Result<Block, AllocError> {
        let block = self.block_of(address)?;

        if block.is_allocated(self.arena.bytes()) {
            Ok(block)
        } else {
            Err(AllocError::InvalidPointer {
                address: address.as_ptr() as usize,
            })
        }
    }
}
