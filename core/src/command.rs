//! Draw commands
//!
//! A [`DrawCommand`] is an immutable description of one draw: which range of
//! vertices/indices to rasterize, with which buffers, under which
//! [`StateSignature`]. Two hashes are computed once at construction:
//!
//! - `geometry_hash` identifies the shape of the draw's data (buffers, ranges, topology)
//! - `full_hash` adds state and instancing, and is the key for exact-duplicate detection
//!
//! Counts, offsets and buffer ids are signed because that is how host graphics
//! APIs pass them; [`crate::validation`] rejects the negative ones.

use std::hash::{Hash, Hasher};
use std::time::Instant;

use crate::state::StateSignature;

bitflags::bitflags! {
    /// Per-draw flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DrawFlags: u32 {
        /// Draw reads an index buffer
        const INDEXED = 1 << 0;
        /// Draw has more than one instance
        const INSTANCED = 1 << 1;
        /// Draw was itself issued as an indirect draw by the host
        const INDIRECT = 1 << 2;
        /// Never merge this draw with others
        const SKIP_OPTIMIZATION = 1 << 3;
        /// Geometry is not expected to change between frames
        const STATIC_HINT = 1 << 4;
        /// Geometry is rewritten every frame
        const DYNAMIC_HINT = 1 << 5;
        /// Draw was culled upstream and must not be rendered
        const CULLED = 1 << 6;
        /// Draw was produced by merging other draws
        const MERGED = 1 << 7;
        /// Scheduling hint: render as early as possible
        const HIGH_PRIORITY = 1 << 8;
        /// Scheduling hint: render last
        const LOW_PRIORITY = 1 << 9;
    }
}

/// Primitive topology
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum PrimitiveType {
    Points = 0,
    Lines = 1,
    LineLoop = 2,
    LineStrip = 3,
    #[default]
    Triangles = 4,
    TriangleStrip = 5,
    TriangleFan = 6,
    Quads = 7,
    Patches = 8,
}

impl PrimitiveType {
    /// Smallest element count that produces at least one primitive
    pub fn min_elements(self) -> i32 {
        match self {
            PrimitiveType::Points | PrimitiveType::Patches => 1,
            PrimitiveType::Lines | PrimitiveType::LineLoop | PrimitiveType::LineStrip => 2,
            PrimitiveType::Triangles | PrimitiveType::TriangleStrip | PrimitiveType::TriangleFan => {
                3
            }
            PrimitiveType::Quads => 4,
        }
    }
}

/// Index element type
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum IndexType {
    U8 = 0,
    #[default]
    U16 = 1,
    U32 = 2,
}

impl IndexType {
    /// Size of one index in bytes
    pub fn size_bytes(self) -> u32 {
        match self {
            IndexType::U8 => 1,
            IndexType::U16 => 2,
            IndexType::U32 => 4,
        }
    }
}

/// Bounding sphere in world space
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BoundingSphere {
    pub center: [f32; 3],
    pub radius: f32,
}

/// Immutable draw descriptor
#[derive(Debug, Clone)]
pub struct DrawCommand {
    id: u64,
    submitted_at: Instant,
    primitive: PrimitiveType,
    index_type: IndexType,
    vertex_count: i32,
    index_count: i32,
    instance_count: i32,
    first_vertex: i32,
    first_index: i32,
    base_vertex: i32,
    base_instance: i32,
    vertex_buffer: i32,
    index_buffer: i32,
    index_offset: i64,
    state: StateSignature,
    flags: DrawFlags,
    depth: f32,
    bounds: Option<BoundingSphere>,
    geometry_hash: u64,
    full_hash: u64,
}

impl DrawCommand {
    /// Start building a command
    pub fn builder() -> DrawCommandBuilder {
        DrawCommandBuilder::new()
    }

    fn rehash(mut self) -> Self {
        let mut hasher = xxhash_rust::xxh3::Xxh3::new();
        self.primitive.hash(&mut hasher);
        self.index_type.hash(&mut hasher);
        self.is_indexed().hash(&mut hasher);
        self.vertex_count.hash(&mut hasher);
        self.index_count.hash(&mut hasher);
        self.first_vertex.hash(&mut hasher);
        self.first_index.hash(&mut hasher);
        self.base_vertex.hash(&mut hasher);
        self.vertex_buffer.hash(&mut hasher);
        self.index_buffer.hash(&mut hasher);
        self.index_offset.hash(&mut hasher);
        self.geometry_hash = hasher.finish();

        self.state.full_hash().hash(&mut hasher);
        self.instance_count.hash(&mut hasher);
        self.base_instance.hash(&mut hasher);
        self.flags.contains(DrawFlags::INSTANCED).hash(&mut hasher);
        self.full_hash = hasher.finish();
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn submitted_at(&self) -> Instant {
        self.submitted_at
    }

    pub fn primitive(&self) -> PrimitiveType {
        self.primitive
    }

    pub fn index_type(&self) -> IndexType {
        self.index_type
    }

    pub fn vertex_count(&self) -> i32 {
        self.vertex_count
    }

    pub fn index_count(&self) -> i32 {
        self.index_count
    }

    pub fn instance_count(&self) -> i32 {
        self.instance_count
    }

    pub fn first_vertex(&self) -> i32 {
        self.first_vertex
    }

    pub fn first_index(&self) -> i32 {
        self.first_index
    }

    pub fn base_vertex(&self) -> i32 {
        self.base_vertex
    }

    pub fn base_instance(&self) -> i32 {
        self.base_instance
    }

    pub fn vertex_buffer(&self) -> i32 {
        self.vertex_buffer
    }

    pub fn index_buffer(&self) -> i32 {
        self.index_buffer
    }

    pub fn index_offset(&self) -> i64 {
        self.index_offset
    }

    pub fn state(&self) -> &StateSignature {
        &self.state
    }

    pub fn flags(&self) -> DrawFlags {
        self.flags
    }

    pub fn depth(&self) -> f32 {
        self.depth
    }

    pub fn bounds(&self) -> Option<BoundingSphere> {
        self.bounds
    }

    pub fn geometry_hash(&self) -> u64 {
        self.geometry_hash
    }

    pub fn full_hash(&self) -> u64 {
        self.full_hash
    }

    pub fn is_indexed(&self) -> bool {
        self.flags.contains(DrawFlags::INDEXED)
    }

    /// Element count that drives rasterization: indices if indexed, else vertices
    pub fn effective_count(&self) -> i32 {
        if self.is_indexed() {
            self.index_count
        } else {
            self.vertex_count
        }
    }

    /// Vertices processed by this draw across all instances
    pub fn total_vertices(&self) -> u64 {
        self.effective_count().max(0) as u64 * self.instance_count.max(0) as u64
    }

    /// Lightweight key used to track recurring draw patterns across frames
    ///
    /// Deliberately coarse: topology, index type, shader, VAO and vertex buffer.
    pub fn pattern_hash(&self) -> u64 {
        let mut hasher = xxhash_rust::xxh3::Xxh3::new();
        self.primitive.hash(&mut hasher);
        self.index_type.hash(&mut hasher);
        self.state.shader().hash(&mut hasher);
        self.state.vao().hash(&mut hasher);
        self.vertex_buffer.hash(&mut hasher);
        hasher.finish()
    }

    pub fn with_state(mut self, state: StateSignature) -> Self {
        self.state = state;
        self.rehash()
    }

    pub fn with_depth(mut self, depth: f32) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_flags(mut self, flags: DrawFlags) -> Self {
        self.flags = flags;
        self.rehash()
    }

    pub fn with_instances(mut self, instance_count: i32, base_instance: i32) -> Self {
        self.instance_count = instance_count;
        self.base_instance = base_instance;
        self.flags.set(DrawFlags::INSTANCED, instance_count > 1);
        self.rehash()
    }

    pub fn with_bounds(mut self, bounds: Option<BoundingSphere>) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.id = id;
        self
    }
}

/// Value equality: identity (id, timestamp) is not part of the value
impl PartialEq for DrawCommand {
    fn eq(&self, other: &Self) -> bool {
        self.full_hash == other.full_hash
            && self.geometry_hash == other.geometry_hash
            && self.primitive == other.primitive
            && self.index_type == other.index_type
            && self.vertex_count == other.vertex_count
            && self.index_count == other.index_count
            && self.instance_count == other.instance_count
            && self.first_vertex == other.first_vertex
            && self.first_index == other.first_index
            && self.base_vertex == other.base_vertex
            && self.base_instance == other.base_instance
            && self.vertex_buffer == other.vertex_buffer
            && self.index_buffer == other.index_buffer
            && self.index_offset == other.index_offset
            && self.state == other.state
            && self.flags == other.flags
            && self.depth == other.depth
            && self.bounds == other.bounds
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Fluent builder for [`DrawCommand`]
#[derive(Debug, Clone)]
pub struct DrawCommandBuilder {
    primitive: PrimitiveType,
    index_type: IndexType,
    vertex_count: i32,
    index_count: i32,
    instance_count: i32,
    first_vertex: i32,
    first_index: i32,
    base_vertex: i32,
    base_instance: i32,
    vertex_buffer: i32,
    index_buffer: i32,
    index_offset: i64,
    state: StateSignature,
    flags: DrawFlags,
    depth: f32,
    bounds: Option<BoundingSphere>,
}

impl DrawCommandBuilder {
    pub fn new() -> Self {
        Self {
            primitive: PrimitiveType::Triangles,
            index_type: IndexType::U16,
            vertex_count: 0,
            index_count: 0,
            instance_count: 1,
            first_vertex: 0,
            first_index: 0,
            base_vertex: 0,
            base_instance: 0,
            vertex_buffer: 0,
            index_buffer: 0,
            index_offset: 0,
            state: StateSignature::default(),
            flags: DrawFlags::empty(),
            depth: 0.0,
            bounds: None,
        }
    }

    pub fn primitive(mut self, primitive: PrimitiveType) -> Self {
        self.primitive = primitive;
        self
    }

    /// Vertex range read from `vertex_buffer`
    pub fn vertices(mut self, vertex_buffer: i32, first_vertex: i32, vertex_count: i32) -> Self {
        self.vertex_buffer = vertex_buffer;
        self.first_vertex = first_vertex;
        self.vertex_count = vertex_count;
        self
    }

    /// Index range read from `index_buffer`; marks the draw as indexed
    pub fn indexed(
        mut self,
        index_buffer: i32,
        index_type: IndexType,
        first_index: i32,
        index_count: i32,
    ) -> Self {
        self.index_buffer = index_buffer;
        self.index_type = index_type;
        self.first_index = first_index;
        self.index_count = index_count;
        self.index_offset = first_index as i64 * index_type.size_bytes() as i64;
        self.flags |= DrawFlags::INDEXED;
        self
    }

    pub fn base_vertex(mut self, base_vertex: i32) -> Self {
        self.base_vertex = base_vertex;
        self
    }

    pub fn instances(mut self, instance_count: i32, base_instance: i32) -> Self {
        self.instance_count = instance_count;
        self.base_instance = base_instance;
        self.flags.set(DrawFlags::INSTANCED, instance_count > 1);
        self
    }

    pub fn state(mut self, state: StateSignature) -> Self {
        self.state = state;
        self
    }

    pub fn depth(mut self, depth: f32) -> Self {
        self.depth = depth;
        self
    }

    pub fn flag(mut self, flag: DrawFlags) -> Self {
        self.flags |= flag;
        self
    }

    pub fn bounds(mut self, center: [f32; 3], radius: f32) -> Self {
        self.bounds = Some(BoundingSphere { center, radius });
        self
    }

    /// Finish the command with the given id, stamped with the current time
    pub fn build(self, id: u64) -> DrawCommand {
        DrawCommand {
            id,
            submitted_at: Instant::now(),
            primitive: self.primitive,
            index_type: self.index_type,
            vertex_count: self.vertex_count,
            index_count: self.index_count,
            instance_count: self.instance_count,
            first_vertex: self.first_vertex,
            first_index: self.first_index,
            base_vertex: self.base_vertex,
            base_instance: self.base_instance,
            vertex_buffer: self.vertex_buffer,
            index_buffer: self.index_buffer,
            index_offset: self.index_offset,
            state: self.state,
            flags: self.flags,
            depth: self.depth,
            bounds: self.bounds,
            geometry_hash: 0,
            full_hash: 0,
        }
        .rehash()
    }
}

impl Default for DrawCommandBuilder {
    fn default() -> Self {
        Self::new()
    }
}
