//! Per-frame bump arena
//!
//! Every serialized indirect buffer of a frame lives in that frame's
//! [`FrameArena`]. Allocation is a bump of the storage tail; there is no
//! per-allocation free. Rebuilding a frame's batches resets the arena, and the
//! whole arena is released at once when its frame is evicted from the retained
//! history.
//!
//! Callers hold [`ArenaHandle`]s, never references. A handle carries the
//! generation of the arena that issued it, and every arena (and every reset or
//! release) takes a fresh generation, so a handle used after its frame retired, or
//! against another frame's arena, resolves to `None`.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::PoolError;

/// Allocation alignment (GPU indirect buffers want 4-byte records)
const ALIGNMENT: usize = 4;

/// Storage pre-reserved at arena creation
const INITIAL_STORAGE: usize = 64 * 1024;

static NEXT_GENERATION: AtomicU32 = AtomicU32::new(1);

fn next_generation() -> u32 {
    NEXT_GENERATION.fetch_add(1, Ordering::Relaxed)
}

/// Handle to an arena allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArenaHandle {
    index: u32,
    generation: u32,
}

impl ArenaHandle {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

#[derive(Debug, Clone, Copy)]
struct Allocation {
    offset: usize,
    len: usize,
}

/// Bump allocator owned by a single frame
#[derive(Debug)]
pub struct FrameArena {
    storage: Vec<u8>,
    allocations: Vec<Allocation>,
    generation: u32,
    capacity: usize,
    high_water: usize,
    released: bool,
}

impl FrameArena {
    /// Create an arena that refuses to grow past `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            storage: Vec::with_capacity(capacity.min(INITIAL_STORAGE)),
            allocations: Vec::new(),
            generation: next_generation(),
            capacity,
            high_water: 0,
            released: false,
        }
    }

    /// Unbounded throwaway arena for one-off batches
    pub fn scratch() -> Self {
        Self {
            storage: Vec::new(),
            allocations: Vec::new(),
            generation: next_generation(),
            capacity: usize::MAX,
            high_water: 0,
            released: false,
        }
    }

    /// Reserve `len` zeroed bytes
    pub fn allocate(&mut self, len: usize) -> Result<ArenaHandle, PoolError> {
        let offset = self.storage.len().next_multiple_of(ALIGNMENT);
        let end = offset.saturating_add(len);
        if self.released || end > self.capacity {
            return Err(PoolError::ArenaExhausted {
                requested: len,
                remaining: self.remaining(),
            });
        }

        self.storage.resize(end, 0);
        self.high_water = self.high_water.max(end);

        let index = self.allocations.len() as u32;
        self.allocations.push(Allocation { offset, len });
        Ok(ArenaHandle {
            index,
            generation: self.generation,
        })
    }

    fn resolve(&self, handle: ArenaHandle) -> Option<Allocation> {
        if handle.generation != self.generation {
            if cfg!(debug_assertions) {
                tracing::warn!(
                    index = handle.index,
                    handle_generation = handle.generation,
                    arena_generation = self.generation,
                    "arena handle used outside its frame"
                );
            }
            return None;
        }
        self.allocations.get(handle.index as usize).copied()
    }

    pub fn get(&self, handle: ArenaHandle) -> Option<&[u8]> {
        let alloc = self.resolve(handle)?;
        self.storage.get(alloc.offset..alloc.offset + alloc.len)
    }

    pub fn get_mut(&mut self, handle: ArenaHandle) -> Option<&mut [u8]> {
        let alloc = self.resolve(handle)?;
        self.storage.get_mut(alloc.offset..alloc.offset + alloc.len)
    }

    /// Like [`FrameArena::get`], but reports a stale handle as an error
    pub fn try_get(&self, handle: ArenaHandle) -> Result<&[u8], PoolError> {
        self.get(handle).ok_or(PoolError::StaleHandle {
            index: handle.index,
            generation: handle.generation,
        })
    }

    /// Drop every allocation but keep the storage for reuse
    ///
    /// Takes a fresh generation, so handles issued before the reset no longer
    /// resolve. A released arena stays released.
    pub fn reset(&mut self) {
        self.storage.clear();
        self.allocations.clear();
        self.generation = next_generation();
    }

    /// Free all storage at once and invalidate every outstanding handle
    pub fn release(&mut self) {
        self.storage = Vec::new();
        self.allocations = Vec::new();
        self.generation = next_generation();
        self.released = true;
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Bytes currently handed out, padding included
    pub fn bytes_used(&self) -> usize {
        self.storage.len()
    }

    /// Largest `bytes_used` ever reached
    pub fn high_water(&self) -> usize {
        self.high_water
    }

    pub fn remaining(&self) -> usize {
        if self.released {
            0
        } else {
            self.capacity.saturating_sub(self.storage.len())
        }
    }

    pub fn allocation_count(&self) -> usize {
        self.allocations.len()
    }
}
