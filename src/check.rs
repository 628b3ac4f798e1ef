//! Heap consistency checker and dump, meant for tests and debugging. Both
//! walk every block from the prologue to the epilogue and then the free list
//! from its root, so they are linear in the size of the heap.

use std::{collections::BTreeSet, fmt};

use crate::{
    arena::HeapArena,
    block::{Block, PROLOGUE},
    error::CheckError,
    freelist::FreeList,
    heap::Heap,
    tag::{Tag, ALIGNMENT, MIN_BLOCK_SIZE, WORD_SIZE},
};

/// Summary of a heap that passed [`Heap::check`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Bytes taken from the arena, sentinels included.
    pub heap_size: usize,
    /// Allocated blocks, sentinels excluded.
    pub allocated_blocks: usize,
    /// Sum of the sizes of allocated blocks, tags included.
    pub allocated_bytes: usize,
    pub free_blocks: usize,
    pub free_bytes: usize,
    /// Size of the largest free block, tags included.
    pub largest_free_block: usize,
}

impl HeapStats {
    /// Fraction of the heap taken by allocated blocks.
    pub fn utilization(&self) -> f64 {
        match self.heap_size {
            0 => 0.0,
            size => self.allocated_bytes as f64 / size as f64,
        }
    }
}

impl<A: HeapArena> Heap<A> {
    /// Verifies every structural invariant of the heap:
    ///
    /// - Sentinels are intact.
    /// - Every block has a valid size, its payload is aligned, it lies inside
    ///   the arena and its header matches its footer.
    /// - No two adjacent blocks are free.
    /// - The free list reaches every free block exactly once, only free
    ///   blocks, with consistent back links, and ends at the prologue.
    ///
    /// Returns statistics about the heap if everything holds.
    pub fn check(&self) -> Result<HeapStats, CheckError> {
        let mem = self.arena.bytes();
        let mut stats = HeapStats {
            heap_size: mem.len(),
            ..HeapStats::default()
        };

        if !self.initialized {
            return Ok(stats);
        }

        let sentinel = Tag::new(MIN_BLOCK_SIZE, true);
        if PROLOGUE.header(mem) != sentinel || PROLOGUE.footer(mem) != sentinel {
            return Err(CheckError::Sentinel {
                offset: PROLOGUE.offset(),
            });
        }

        let free = self.check_blocks(mem, &mut stats)?;
        self.check_free_list(mem, &free)?;

        Ok(stats)
    }

    /// Walks the heap in address order. Returns the offsets of free blocks.
    fn check_blocks(&self, mem: &[u8], stats: &mut HeapStats) -> Result<BTreeSet<usize>, CheckError> {
        let mut free = BTreeSet::new();
        let mut previous_free: Option<Block> = None;
        let mut block = PROLOGUE.next(mem);

        loop {
            let offset = block.offset();
            if offset > mem.len() {
                return Err(CheckError::OutOfBounds { offset });
            }

            let header = block.header(mem);
            if header.size == 0 {
                if !header.allocated || offset != mem.len() {
                    return Err(CheckError::Sentinel { offset });
                }
                break;
            }

            if header.size % ALIGNMENT != 0 || header.size < MIN_BLOCK_SIZE {
                return Err(CheckError::BadSize {
                    offset,
                    size: header.size,
                });
            }
            if offset % ALIGNMENT != 0 {
                return Err(CheckError::Misaligned { offset });
            }
            if offset + header.size > mem.len() {
                return Err(CheckError::OutOfBounds { offset });
            }

            let footer = block.footer(mem);
            if header != footer {
                return Err(CheckError::TagMismatch {
                    offset,
                    header: header.pack(),
                    footer: footer.pack(),
                });
            }

            if header.allocated {
                stats.allocated_blocks += 1;
                stats.allocated_bytes += header.size;
                previous_free = None;
            } else {
                if let Some(first) = previous_free {
                    return Err(CheckError::Uncoalesced {
                        first: first.offset(),
                        second: offset,
                    });
                }
                stats.free_blocks += 1;
                stats.free_bytes += header.size;
                stats.largest_free_block = stats.largest_free_block.max(header.size);
                free.insert(offset);
                previous_free = Some(block);
            }

            block = block.next(mem);
        }

        Ok(free)
    }

    /// Walks the free list from the root and compares it against the free
    /// blocks found in the heap.
    fn check_free_list(&self, mem: &[u8], free: &BTreeSet<usize>) -> Result<(), CheckError> {
        let mut visited = BTreeSet::new();
        let mut expected_prev = None;
        let mut block = self.free_list.root();

        while block != PROLOGUE {
            let offset = block.offset();

            if !free.contains(&offset) {
                return Err(CheckError::NotFree { offset });
            }
            if !visited.insert(offset) {
                return Err(CheckError::Cycle { offset });
            }
            if FreeList::prev_of(mem, block) != expected_prev {
                return Err(CheckError::BrokenLink { offset });
            }

            expected_prev = Some(block);
            block = FreeList::next_of(mem, block).ok_or(CheckError::BrokenLink { offset })?;
        }

        if FreeList::prev_of(mem, PROLOGUE) != expected_prev {
            return Err(CheckError::BrokenLink {
                offset: PROLOGUE.offset(),
            });
        }

        if visited.len() != free.len() {
            return Err(CheckError::Unlisted {
                missing: free.len() - visited.len(),
            });
        }

        if visited.len() != self.free_list.len() {
            return Err(CheckError::LengthMismatch {
                recorded: self.free_list.len(),
                counted: visited.len(),
            });
        }

        Ok(())
    }

    /// Human readable listing of the heap range, every block and the free
    /// list. See [`HeapDump`].
    pub fn dump(&self) -> HeapDump<'_, A> {
        HeapDump { heap: self }
    }

    /// [`Heap::dump`] rendered to a string.
    pub fn diagnostic_dump(&self) -> String {
        self.dump().to_string()
    }
}

/// Formats a heap like this:
///
/// ```text
/// heap [0x7f3a1c000000 ~ 0x7f3a1c001017] 4120 bytes
/// blocks:
///   [      8..24    ] 16 A prologue
///   [     24..136   ] 112 A
///   [    136..4120  ] 3984 F
///   [   4120        ] 0 A epilogue
/// free list: root -> 136 [3984] -> prologue
/// ```
///
/// The dump never panics on a corrupted heap, it stops at the first block
/// that doesn't make sense.
pub struct HeapDump<'h, A: HeapArena> {
    heap: &'h Heap<A>,
}

impl<A: HeapArena> fmt::Display for HeapDump<'_, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let heap = self.heap;
        let mem = heap.arena.bytes();

        writeln!(
            f,
            "heap [{:p} ~ {:p}] {} bytes",
            heap.heap_lo(),
            heap.heap_hi(),
            heap.heap_size()
        )?;

        if !heap.initialized {
            return writeln!(f, "not initialized");
        }

        writeln!(f, "blocks:")?;
        let mut block = PROLOGUE;
        let mut count = 0;
        loop {
            let offset = block.offset();
            if offset < WORD_SIZE || offset > mem.len() {
                writeln!(f, "  [{offset:>7}] out of bounds")?;
                break;
            }

            let tag = block.header(mem);
            let status = if tag.allocated { 'A' } else { 'F' };

            if tag.size == 0 {
                writeln!(f, "  [{offset:>7}        ] 0 {status} epilogue")?;
                break;
            }
            if tag.size % ALIGNMENT != 0 || offset + tag.size > mem.len() {
                writeln!(f, "  [{offset:>7}        ] {} {status} corrupted", tag.size)?;
                break;
            }

            let end = offset + tag.size;
            let label = if block == PROLOGUE { " prologue" } else { "" };
            writeln!(f, "  [{offset:>7}..{end:<7}] {} {status}{label}", tag.size)?;

            block = block.next(mem);
            count += 1;
        }

        write!(f, "free list: root")?;
        let mut entry = heap.free_list.root();
        for _ in 0..=count {
            if entry == PROLOGUE {
                break;
            }
            let offset = entry.offset();
            if offset < WORD_SIZE || offset + WORD_SIZE * 2 > mem.len() {
                write!(f, " -> {offset} out of bounds")?;
                return writeln!(f);
            }
            write!(f, " -> {offset} [{}]", entry.size(mem))?;
            entry = FreeList::next_of(mem, entry).unwrap_or(PROLOGUE);
        }
        writeln!(f, " -> prologue")
    }
}
