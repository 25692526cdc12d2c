//! Draw batches and indirect command serialization
//!
//! A [`DrawBatch`] accumulates commands that share primitive type, index type,
//! vertex/index buffers and a mergeable [`StateSignature`]. Finalizing a batch
//! sorts it for buffer locality and serializes one indirect record per command
//! into the frame arena.
//!
//! # Wire format
//!
//! Records are tightly packed, native byte order, 4-byte fields:
//!
//! | kind        | size | fields                                                        |
//! |-------------|------|---------------------------------------------------------------|
//! | non-indexed | 16   | `count, instance_count, first_vertex, base_instance`          |
//! | indexed     | 20   | `count, instance_count, first_index, base_vertex (i32), base_instance` |
//!
//! These match `DrawArraysIndirectCommand`/`DrawElementsIndirectCommand`,
//! `VkDrawIndirectCommand`/`VkDrawIndexedIndirectCommand` and wgpu's
//! `DrawIndirectArgs`/`DrawIndexedIndirectArgs` exactly.

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};

use bytemuck::{Pod, Zeroable};

use crate::arena::{ArenaHandle, FrameArena};
use crate::command::{DrawCommand, DrawFlags, IndexType, PrimitiveType};
use crate::error::PoolError;
use crate::state::StateSignature;

/// Non-indexed indirect draw record
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawIndirectArgs {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub first_vertex: u32,
    pub base_instance: u32,
}

/// Indexed indirect draw record
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawIndexedIndirectArgs {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub base_vertex: i32,
    pub base_instance: u32,
}

/// Size of a non-indexed record in bytes
pub const DRAW_INDIRECT_SIZE: usize = 16;
/// Size of an indexed record in bytes
pub const DRAW_INDEXED_INDIRECT_SIZE: usize = 20;

const _: () = assert!(std::mem::size_of::<DrawIndirectArgs>() == DRAW_INDIRECT_SIZE);
const _: () = assert!(std::mem::size_of::<DrawIndexedIndirectArgs>() == DRAW_INDEXED_INDIRECT_SIZE);

/// One decoded indirect record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndirectRecord {
    Draw(DrawIndirectArgs),
    DrawIndexed(DrawIndexedIndirectArgs),
}

impl IndirectRecord {
    /// Record for a validated command (counts and offsets are non-negative)
    pub fn from_command(cmd: &DrawCommand) -> Self {
        if cmd.is_indexed() {
            IndirectRecord::DrawIndexed(DrawIndexedIndirectArgs {
                index_count: cmd.index_count() as u32,
                instance_count: cmd.instance_count() as u32,
                first_index: cmd.first_index() as u32,
                base_vertex: cmd.base_vertex(),
                base_instance: cmd.base_instance() as u32,
            })
        } else {
            IndirectRecord::Draw(DrawIndirectArgs {
                vertex_count: cmd.vertex_count() as u32,
                instance_count: cmd.instance_count() as u32,
                first_vertex: cmd.first_vertex() as u32,
                base_instance: cmd.base_instance() as u32,
            })
        }
    }

    fn bytes(&self) -> &[u8] {
        match self {
            IndirectRecord::Draw(args) => bytemuck::bytes_of(args),
            IndirectRecord::DrawIndexed(args) => bytemuck::bytes_of(args),
        }
    }
}

/// Record stride for indexed or non-indexed buffers
pub fn indirect_stride(indexed: bool) -> usize {
    if indexed {
        DRAW_INDEXED_INDIRECT_SIZE
    } else {
        DRAW_INDIRECT_SIZE
    }
}

/// Decode a serialized indirect buffer
///
/// Returns `None` if the length is not a whole number of records.
pub fn decode_indirect(bytes: &[u8], indexed: bool) -> Option<Vec<IndirectRecord>> {
    let stride = indirect_stride(indexed);
    if bytes.len() % stride != 0 {
        return None;
    }
    let records = bytes
        .chunks_exact(stride)
        .map(|chunk| {
            if indexed {
                IndirectRecord::DrawIndexed(bytemuck::pod_read_unaligned(chunk))
            } else {
                IndirectRecord::Draw(bytemuck::pod_read_unaligned(chunk))
            }
        })
        .collect();
    Some(records)
}

// =============================================================================
// DrawBatch
// =============================================================================

/// Accumulator of compatible draw commands
#[derive(Debug)]
pub struct DrawBatch {
    id: u32,
    state: StateSignature,
    primitive: PrimitiveType,
    index_type: IndexType,
    indexed: bool,
    vertex_buffer: i32,
    index_buffer: i32,
    capacity: usize,
    commands: Vec<DrawCommand>,
    total_vertices: u64,
    total_indices: u64,
    total_instances: u64,
    finalized: AtomicBool,
    indirect: Option<ArenaHandle>,
}

impl DrawBatch {
    /// Create an empty batch keyed on `template`'s primitive, buffers and state
    pub fn new(id: u32, template: &DrawCommand, capacity: usize) -> Self {
        Self {
            id,
            state: *template.state(),
            primitive: template.primitive(),
            index_type: template.index_type(),
            indexed: template.is_indexed(),
            vertex_buffer: template.vertex_buffer(),
            index_buffer: template.index_buffer(),
            capacity: capacity.max(1),
            commands: Vec::with_capacity(capacity.clamp(1, 64)),
            total_vertices: 0,
            total_indices: 0,
            total_instances: 0,
            finalized: AtomicBool::new(false),
            indirect: None,
        }
    }

    /// Whether `cmd` may join this batch (ignores fullness)
    pub fn is_compatible(&self, cmd: &DrawCommand) -> bool {
        cmd.primitive() == self.primitive
            && cmd.is_indexed() == self.indexed
            && cmd.vertex_buffer() == self.vertex_buffer
            && (!self.indexed
                || (cmd.index_type() == self.index_type && cmd.index_buffer() == self.index_buffer))
            && cmd.state().can_merge_with(&self.state)
    }

    /// Whether `cmd` can be added right now
    pub fn accepts(&self, cmd: &DrawCommand) -> bool {
        !self.is_finalized() && !self.is_full() && self.is_compatible(cmd)
    }

    pub fn add(&mut self, cmd: DrawCommand) -> Result<(), PoolError> {
        if self.is_finalized() {
            return Err(PoolError::BatchFinalized(self.id));
        }
        if self.is_full() {
            return Err(PoolError::BatchFull {
                batch: self.id,
                capacity: self.capacity,
            });
        }
        if !self.is_compatible(&cmd) {
            return Err(PoolError::IncompatibleCommand {
                batch: self.id,
                command: cmd.id(),
            });
        }

        let instances = cmd.instance_count().max(0) as u64;
        self.total_vertices += cmd.vertex_count().max(0) as u64 * instances;
        self.total_indices += cmd.index_count().max(0) as u64 * instances;
        self.total_instances += instances;
        self.commands.push(cmd);
        Ok(())
    }

    /// Sort for buffer locality and serialize the indirect buffer
    ///
    /// One-shot: a second call fails with [`PoolError::BatchFinalized`].
    /// On failure the batch stays open.
    pub fn finalize(&mut self, arena: &mut FrameArena) -> Result<ArenaHandle, PoolError> {
        if self
            .finalized
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(PoolError::BatchFinalized(self.id));
        }

        match self.serialize(arena) {
            Ok(handle) => {
                self.indirect = Some(handle);
                Ok(handle)
            }
            Err(e) => {
                self.finalized.store(false, Ordering::Release);
                Err(e)
            }
        }
    }

    fn serialize(&mut self, arena: &mut FrameArena) -> Result<ArenaHandle, PoolError> {
        if self.commands.is_empty() {
            return Err(PoolError::EmptyBatch(self.id));
        }

        // Back-to-front order of order-dependent blending must survive
        if !self.state.blend_mode().is_order_dependent() {
            self.commands.sort_by_key(DrawCommand::first_vertex);
        }

        let stride = indirect_stride(self.indexed);
        let handle = arena.allocate(self.commands.len() * stride)?;
        let buffer = arena.get_mut(handle).ok_or(PoolError::StaleHandle {
            index: handle.index(),
            generation: handle.generation(),
        })?;
        for (slot, cmd) in buffer.chunks_exact_mut(stride).zip(&self.commands) {
            slot.copy_from_slice(IndirectRecord::from_command(cmd).bytes());
        }
        Ok(handle)
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn state(&self) -> &StateSignature {
        &self.state
    }

    pub fn primitive(&self) -> PrimitiveType {
        self.primitive
    }

    pub fn index_type(&self) -> IndexType {
        self.index_type
    }

    pub fn is_indexed(&self) -> bool {
        self.indexed
    }

    pub fn vertex_buffer(&self) -> i32 {
        self.vertex_buffer
    }

    pub fn index_buffer(&self) -> i32 {
        self.index_buffer
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.commands.len() >= self.capacity
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::Acquire)
    }

    /// Whether this batch holds a single skip-optimization draw
    pub fn is_singleton(&self) -> bool {
        self.capacity == 1
            && self
                .commands
                .first()
                .is_some_and(|c| c.flags().contains(DrawFlags::SKIP_OPTIMIZATION))
    }

    pub fn total_vertices(&self) -> u64 {
        self.total_vertices
    }

    pub fn total_indices(&self) -> u64 {
        self.total_indices
    }

    pub fn total_instances(&self) -> u64 {
        self.total_instances
    }

    pub fn indirect_handle(&self) -> Option<ArenaHandle> {
        self.indirect
    }

    /// Expected serialized size in bytes
    pub fn indirect_len(&self) -> usize {
        self.commands.len() * indirect_stride(self.indexed)
    }
}

// =============================================================================
// BatchView
// =============================================================================

/// A finalized batch together with its resolved indirect buffer
///
/// This is what executors receive: the arena bytes are only borrowable while
/// the owning frame is alive.
#[derive(Debug, Clone, Copy)]
pub struct BatchView<'a> {
    batch: &'a DrawBatch,
    indirect: &'a [u8],
}

impl<'a> BatchView<'a> {
    /// Resolve `batch`'s indirect buffer in `arena`
    pub fn new(batch: &'a DrawBatch, arena: &'a FrameArena) -> Result<Self, PoolError> {
        let handle = batch
            .indirect_handle()
            .ok_or(PoolError::EmptyBatch(batch.id()))?;
        let indirect = arena.try_get(handle)?;
        Ok(Self { batch, indirect })
    }

    pub fn batch(&self) -> &'a DrawBatch {
        self.batch
    }

    /// Serialized indirect records, ready for upload
    pub fn indirect_bytes(&self) -> &'a [u8] {
        self.indirect
    }

    pub fn records(&self) -> Vec<IndirectRecord> {
        decode_indirect(self.indirect, self.batch.is_indexed()).unwrap_or_default()
    }
}

impl Deref for BatchView<'_> {
    type Target = DrawBatch;

    fn deref(&self) -> &DrawBatch {
        self.batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::BlendMode;

    fn draw(id: u64, first_vertex: i32) -> DrawCommand {
        DrawCommand::builder()
            .vertices(1, first_vertex, 3)
            .state(StateSignature::new(0, 1, 1))
            .build(id)
    }

    fn indexed(id: u64, first_index: i32, base_vertex: i32) -> DrawCommand {
        DrawCommand::builder()
            .vertices(1, 0, 100)
            .indexed(2, IndexType::U16, first_index, 6)
            .base_vertex(base_vertex)
            .instances(3, 7)
            .state(StateSignature::new(0, 1, 1))
            .build(id)
    }

    #[test]
    fn test_record_sizes_match_graphics_apis() {
        assert_eq!(std::mem::size_of::<DrawIndirectArgs>(), 16);
        assert_eq!(std::mem::size_of::<DrawIndexedIndirectArgs>(), 20);
    }

    #[test]
    fn test_add_tracks_totals() {
        let first = indexed(0, 0, 0);
        let mut batch = DrawBatch::new(0, &first, 8);
        batch.add(first).unwrap();
        batch.add(indexed(1, 6, 4)).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.total_indices(), 36);
        assert_eq!(batch.total_vertices(), 600);
        assert_eq!(batch.total_instances(), 6);
    }

    #[test]
    fn test_add_rejects_incompatible() {
        let first = draw(0, 0);
        let mut batch = DrawBatch::new(0, &first, 8);
        let other = draw(1, 0).with_state(StateSignature::new(0, 2, 1));
        assert_eq!(
            batch.add(other),
            Err(PoolError::IncompatibleCommand {
                batch: 0,
                command: 1
            })
        );
    }

    #[test]
    fn test_add_accepts_different_uniforms() {
        let first = draw(0, 0);
        let mut batch = DrawBatch::new(0, &first, 8);
        let other = draw(1, 3).with_state(first.state().with_uniforms(99));
        assert!(batch.accepts(&other));
        batch.add(other).unwrap();
    }

    #[test]
    fn test_add_respects_capacity() {
        let first = draw(0, 0);
        let mut batch = DrawBatch::new(3, &first, 1);
        batch.add(first).unwrap();
        assert!(batch.is_full());
        assert_eq!(
            batch.add(draw(1, 3)),
            Err(PoolError::BatchFull {
                batch: 3,
                capacity: 1
            })
        );
    }

    #[test]
    fn test_finalize_is_one_shot_and_freezes_batch() {
        let mut arena = FrameArena::new(1024);
        let first = draw(0, 0);
        let mut batch = DrawBatch::new(0, &first, 8);
        batch.add(first).unwrap();
        batch.finalize(&mut arena).unwrap();
        assert!(batch.is_finalized());
        assert_eq!(batch.finalize(&mut arena), Err(PoolError::BatchFinalized(0)));
        assert_eq!(batch.add(draw(1, 3)), Err(PoolError::BatchFinalized(0)));
    }

    #[test]
    fn test_finalize_empty_batch_fails_and_stays_open() {
        let mut arena = FrameArena::new(1024);
        let mut batch = DrawBatch::new(0, &draw(0, 0), 8);
        assert_eq!(batch.finalize(&mut arena), Err(PoolError::EmptyBatch(0)));
        assert!(!batch.is_finalized());
    }

    #[test]
    fn test_finalize_sorts_by_first_vertex() {
        let mut arena = FrameArena::new(1024);
        let first = draw(0, 90);
        let mut batch = DrawBatch::new(0, &first, 8);
        batch.add(first).unwrap();
        batch.add(draw(1, 30)).unwrap();
        batch.add(draw(2, 60)).unwrap();
        batch.finalize(&mut arena).unwrap();
        let order: Vec<i32> = batch.commands().iter().map(|c| c.first_vertex()).collect();
        assert_eq!(order, vec![30, 60, 90]);
    }

    #[test]
    fn test_finalize_keeps_alpha_blend_order() {
        let mut arena = FrameArena::new(1024);
        let state = StateSignature::new(0, 1, 1).with_blend_mode(BlendMode::AlphaBlend);
        let first = draw(0, 90).with_state(state);
        let mut batch = DrawBatch::new(0, &first, 8);
        batch.add(first).unwrap();
        batch.add(draw(1, 30).with_state(state)).unwrap();
        batch.finalize(&mut arena).unwrap();
        let order: Vec<u64> = batch.commands().iter().map(|c| c.id()).collect();
        assert_eq!(order, vec![0, 1]);
    }

    #[test]
    fn test_non_indexed_buffer_round_trip() {
        let mut arena = FrameArena::new(1024);
        let first = draw(0, 0).with_instances(2, 5);
        let mut batch = DrawBatch::new(0, &first, 8);
        batch.add(first).unwrap();
        batch.add(draw(1, 3).with_instances(2, 9)).unwrap();
        batch.finalize(&mut arena).unwrap();

        let view = BatchView::new(&batch, &arena).unwrap();
        assert_eq!(view.indirect_bytes().len(), 2 * DRAW_INDIRECT_SIZE);
        assert_eq!(
            view.records(),
            vec![
                IndirectRecord::Draw(DrawIndirectArgs {
                    vertex_count: 3,
                    instance_count: 2,
                    first_vertex: 0,
                    base_instance: 5,
                }),
                IndirectRecord::Draw(DrawIndirectArgs {
                    vertex_count: 3,
                    instance_count: 2,
                    first_vertex: 3,
                    base_instance: 9,
                }),
            ]
        );
    }

    #[test]
    fn test_indexed_buffer_byte_layout() {
        let mut arena = FrameArena::new(1024);
        let first = indexed(0, 12, -4);
        let mut batch = DrawBatch::new(0, &first, 8);
        batch.add(first).unwrap();
        let handle = batch.finalize(&mut arena).unwrap();

        let bytes = arena.get(handle).unwrap();
        assert_eq!(bytes.len(), DRAW_INDEXED_INDIRECT_SIZE);
        let word = |i: usize| u32::from_ne_bytes(bytes[i * 4..i * 4 + 4].try_into().unwrap());
        assert_eq!(word(0), 6);
        assert_eq!(word(1), 3);
        assert_eq!(word(2), 12);
        assert_eq!(word(3) as i32, -4);
        assert_eq!(word(4), 7);
    }

    #[test]
    fn test_decode_rejects_partial_records() {
        assert!(decode_indirect(&[0u8; 17], false).is_none());
        assert_eq!(decode_indirect(&[0u8; 40], true).map(|r| r.len()), Some(2));
    }

    #[test]
    fn test_view_requires_finalized_batch() {
        let arena = FrameArena::new(64);
        let batch = DrawBatch::new(4, &draw(0, 0), 8);
        assert!(matches!(
            BatchView::new(&batch, &arena),
            Err(PoolError::EmptyBatch(4))
        ));
    }
}
