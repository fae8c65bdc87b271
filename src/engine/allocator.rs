//! Pooled fixed-size chunk allocator.
//!
//! Chunks come in exactly two sizes (8 KiB and 16 KiB), which makes a
//! slab-style allocator a natural fit: each size class owns a list of slabs,
//! each slab is one contiguous host allocation carved into fixed-size blocks,
//! and a per-slab bitset tracks which blocks are free.
//!
//! Slabs are allocated with their block size as alignment, so every block
//! handed out is aligned to its size class. That keeps the chunk data area
//! alignment guarantees trivial and would also permit pointer→slab
//! derivation by masking, although lookup here is a short linear scan.
//!
//! Empty slabs are not returned to the host eagerly; [`ChunkAllocator::flush`]
//! releases them in one sweep so that churny workloads (defragmentation,
//! mass despawns) can reuse warm memory.

use std::alloc::{alloc, dealloc, Layout};
use std::ptr::NonNull;

use crate::engine::error::AllocError;
use crate::engine::types::{CHUNK_LARGE_BYTES, CHUNK_SMALL_BYTES};

/// Chunk size class.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SizeClass {
    /// 8 KiB blocks.
    Small = 0,
    /// 16 KiB blocks.
    Large = 1,
}

impl SizeClass {
    /// Size in bytes of one block of this class.
    #[inline]
    pub const fn block_bytes(self) -> usize {
        match self {
            SizeClass::Small => CHUNK_SMALL_BYTES,
            SizeClass::Large => CHUNK_LARGE_BYTES,
        }
    }

    /// Number of blocks carved out of one slab of this class.
    #[inline]
    const fn blocks_per_slab(self) -> u32 {
        match self {
            SizeClass::Small => 32,
            SizeClass::Large => 16,
        }
    }

    /// Picks the smallest size class able to hold `total_bytes`.
    ///
    /// ## Panics
    /// Panics if `total_bytes` exceeds the large class. Chunk layout
    /// computation guarantees this never happens for archetype-produced
    /// sizes.
    #[inline]
    pub fn for_bytes(total_bytes: usize) -> SizeClass {
        assert!(total_bytes <= CHUNK_LARGE_BYTES, "chunk size {total_bytes} exceeds the large size class");
        if total_bytes <= CHUNK_SMALL_BYTES {
            SizeClass::Small
        } else {
            SizeClass::Large
        }
    }

    /// Reconstructs a size class from its stored `u8` form.
    #[inline]
    pub const fn from_u8(raw: u8) -> SizeClass {
        if raw == 0 { SizeClass::Small } else { SizeClass::Large }
    }
}

/// One contiguous host allocation carved into fixed-size blocks.
struct Slab {
    mem: NonNull<u8>,
    /// Bit `i` set means block `i` is free.
    free_mask: u64,
}

impl Slab {
    #[inline]
    fn contains(&self, ptr: NonNull<u8>, slab_bytes: usize) -> bool {
        let base = self.mem.as_ptr() as usize;
        let p = ptr.as_ptr() as usize;
        p >= base && p < base + slab_bytes
    }
}

/// A size-class pool: the slab list plus derived geometry.
struct Pool {
    class: SizeClass,
    slabs: Vec<Slab>,
}

impl Pool {
    fn new(class: SizeClass) -> Self {
        Self { class, slabs: Vec::new() }
    }

    #[inline]
    fn full_mask(&self) -> u64 {
        let blocks = self.class.blocks_per_slab();
        if blocks == 64 { u64::MAX } else { (1u64 << blocks) - 1 }
    }

    #[inline]
    fn slab_bytes(&self) -> usize {
        self.class.block_bytes() * self.class.blocks_per_slab() as usize
    }

    #[inline]
    fn layout(&self) -> Layout {
        // Aligning the slab to the block size keeps every block
        // block-aligned, which the chunk header/data split relies on.
        Layout::from_size_align(self.slab_bytes(), self.class.block_bytes())
            .expect("slab layout is statically valid")
    }

    fn alloc_block(&mut self) -> Result<NonNull<u8>, AllocError> {
        let block_bytes = self.class.block_bytes();

        for slab in &mut self.slabs {
            if slab.free_mask != 0 {
                let bit = slab.free_mask.trailing_zeros();
                slab.free_mask &= slab.free_mask - 1;
                // SAFETY: bit < blocks_per_slab, so the offset stays inside
                // the slab allocation.
                let ptr = unsafe { slab.mem.as_ptr().add(bit as usize * block_bytes) };
                return Ok(unsafe { NonNull::new_unchecked(ptr) });
            }
        }

        // All slabs full. Grow the pool by one slab.
        let layout = self.layout();
        // SAFETY: layout has non-zero size.
        let mem = unsafe { alloc(layout) };
        let Some(mem) = NonNull::new(mem) else {
            return Err(AllocError { bytes: layout.size() });
        };

        let mut slab = Slab { mem, free_mask: self.full_mask() };
        slab.free_mask &= slab.free_mask - 1; // claim block 0
        self.slabs.push(slab);
        Ok(mem)
    }

    fn free_block(&mut self, ptr: NonNull<u8>) {
        let slab_bytes = self.slab_bytes();
        let block_bytes = self.class.block_bytes();

        for slab in &mut self.slabs {
            if !slab.contains(ptr, slab_bytes) {
                continue;
            }
            let offset = ptr.as_ptr() as usize - slab.mem.as_ptr() as usize;
            debug_assert_eq!(offset % block_bytes, 0, "pointer does not address a block start");
            let bit = (offset / block_bytes) as u32;
            debug_assert_eq!(slab.free_mask >> bit & 1, 0, "double free of chunk block");
            slab.free_mask |= 1u64 << bit;
            return;
        }

        unreachable!("freed pointer does not belong to this pool");
    }

    fn flush(&mut self) {
        let full = self.full_mask();
        let layout = self.layout();
        self.slabs.retain(|slab| {
            if slab.free_mask == full {
                // SAFETY: the slab was allocated with exactly this layout.
                unsafe { dealloc(slab.mem.as_ptr(), layout) };
                false
            } else {
                true
            }
        });
    }

    fn used_blocks(&self) -> u64 {
        let blocks = self.class.blocks_per_slab() as u64;
        self.slabs
            .iter()
            .map(|s| blocks - s.free_mask.count_ones() as u64)
            .sum()
    }

    fn free_blocks(&self) -> u64 {
        self.slabs.iter().map(|s| s.free_mask.count_ones() as u64).sum()
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        let layout = self.layout();
        for slab in self.slabs.drain(..) {
            // SAFETY: every slab was allocated with this pool's layout.
            unsafe { dealloc(slab.mem.as_ptr(), layout) };
        }
    }
}

/// Allocator usage counters exposed through `World::diag`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChunkAllocatorStats {
    /// Total bytes currently held from the host allocator.
    pub allocated_bytes: u64,
    /// Bytes of blocks handed out and not yet freed.
    pub used_bytes: u64,
    /// Number of live slabs across both pools.
    pub slab_count: u64,
    /// Number of free blocks available without growing.
    pub free_block_count: u64,
}

/// Pooled allocator for 8 KiB and 16 KiB chunk blocks.
///
/// ## Purpose
/// Eliminates per-chunk host allocation cost and guarantees size-class
/// alignment for every block it hands out.
///
/// ## Invariants
/// - Every pointer returned by [`alloc`](Self::alloc) is aligned to its
///   size class.
/// - A block is either owned by exactly one live chunk or marked free in
///   its slab's bitset, never both.
pub struct ChunkAllocator {
    pools: [Pool; 2],
}

impl ChunkAllocator {
    /// Creates an allocator with empty pools; no host memory is reserved.
    pub fn new() -> Self {
        Self { pools: [Pool::new(SizeClass::Small), Pool::new(SizeClass::Large)] }
    }

    /// Allocates one block large enough for `total_bytes`.
    ///
    /// ## Behavior
    /// Picks the smallest size class that fits, pops a free block, and
    /// grows the pool by one slab when every slab is full.
    ///
    /// ## Errors
    /// [`AllocError`] only when the host allocator refuses to provide a new
    /// slab.
    pub fn alloc(&mut self, total_bytes: usize) -> Result<(NonNull<u8>, SizeClass), AllocError> {
        let class = SizeClass::for_bytes(total_bytes);
        let ptr = self.pools[class as usize].alloc_block()?;
        Ok((ptr, class))
    }

    /// Returns a block to its slab's free list.
    ///
    /// The block's memory is not released to the host here; see
    /// [`flush`](Self::flush).
    pub fn free(&mut self, ptr: NonNull<u8>, class: SizeClass) {
        self.pools[class as usize].free_block(ptr);
    }

    /// Releases fully free slabs back to the host allocator.
    pub fn flush(&mut self) {
        for pool in &mut self.pools {
            pool.flush();
        }
    }

    /// Current usage counters.
    pub fn stats(&self) -> ChunkAllocatorStats {
        let mut stats = ChunkAllocatorStats::default();
        for pool in &self.pools {
            let block_bytes = pool.class.block_bytes() as u64;
            let blocks_per_slab = pool.class.blocks_per_slab() as u64;
            stats.allocated_bytes += pool.slabs.len() as u64 * blocks_per_slab * block_bytes;
            stats.used_bytes += pool.used_blocks() * block_bytes;
            stats.slab_count += pool.slabs.len() as u64;
            stats.free_block_count += pool.free_blocks();
        }
        stats
    }
}

impl Default for ChunkAllocator {
    fn default() -> Self {
        Self::new()
    }
}
