//! Render state signatures
//!
//! A [`StateSignature`] is the minimal set of pipeline settings that must match
//! for two draws to share a batch. It is an immutable value: every `with_*`
//! helper returns a new signature with its cached hashes recomputed.
//!
//! Three derived views drive the pipeline:
//! - [`StateSignature::sort_key`] packs the expensive fields into one ordered `u64`
//! - [`StateSignature::can_merge_with`] decides batch compatibility (uniforms may differ)
//! - [`StateSignature::state_change_count`] weights each differing field by bind cost

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Blend mode of a draw
///
/// Ordered by how early the mode can render: opaque-like modes sort first and
/// are drawn front-to-back, blended modes are drawn back-to-front.
#[repr(u8)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum BlendMode {
    /// No blending, full depth writes
    #[default]
    Opaque = 0,
    /// Alpha-tested cutout (still depth-sortable like opaque geometry)
    AlphaTest = 1,
    /// Standard `src_alpha, 1 - src_alpha` blending
    AlphaBlend = 2,
    /// `one, one` additive blending
    Additive = 3,
    /// `dst_color, zero` multiplicative blending
    Multiplicative = 4,
    /// Application-defined blend equation
    Custom = 5,
}

impl BlendMode {
    /// Opaque-like modes are sorted front-to-back and may be freely reordered.
    pub fn is_opaque_like(self) -> bool {
        matches!(self, BlendMode::Opaque | BlendMode::AlphaTest)
    }

    /// Blend equations whose result depends on draw order.
    ///
    /// Additive and multiplicative blending commute, so draws using them can be
    /// reordered inside a batch. Alpha and custom blending cannot.
    pub fn is_order_dependent(self) -> bool {
        matches!(self, BlendMode::AlphaBlend | BlendMode::Custom)
    }
}

/// Depth comparison function
#[repr(u8)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum DepthFunc {
    Never = 0,
    #[default]
    Less = 1,
    Equal = 2,
    LessEqual = 3,
    Greater = 4,
    NotEqual = 5,
    GreaterEqual = 6,
    Always = 7,
}

/// Face culling mode
#[repr(u8)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum CullFace {
    None = 0,
    #[default]
    Back = 1,
    Front = 2,
    FrontAndBack = 3,
}

/// Polygon rasterization mode
#[repr(u8)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum PolygonMode {
    #[default]
    Fill = 0,
    Line = 1,
    Point = 2,
}

// =============================================================================
// Sort key layout and state-change weights
// =============================================================================

const FRAMEBUFFER_SHIFT: u32 = 56;
const FRAMEBUFFER_MASK: u64 = 0xFF;
const SHADER_SHIFT: u32 = 40;
const SHADER_MASK: u64 = 0xFFFF;
const BLEND_SHIFT: u32 = 37;
const BLEND_MASK: u64 = 0x7;
const VAO_SHIFT: u32 = 21;
const VAO_MASK: u64 = 0xFFFF;
const DEPTH_SHIFT: u32 = 16;
const CULL_SHIFT: u32 = 14;
const POLYGON_SHIFT: u32 = 12;

/// Relative cost of rebinding each piece of state.
///
/// Framebuffer switches flush tile memory, shader switches rebuild pipelines,
/// and so on down to cull/polygon toggles which are nearly free.
pub mod change_cost {
    pub const FRAMEBUFFER: u32 = 10;
    pub const SHADER: u32 = 8;
    pub const BLEND: u32 = 5;
    pub const VAO: u32 = 4;
    pub const TEXTURES: u32 = 3;
    pub const UNIFORMS: u32 = 2;
    pub const DEPTH: u32 = 2;
    pub const SCISSOR: u32 = 1;
    pub const POLYGON: u32 = 1;
    pub const CULL: u32 = 1;
}

/// Immutable render-state key
#[derive(Debug, Clone, Copy)]
pub struct StateSignature {
    framebuffer: u32,
    shader: u32,
    blend_mode: BlendMode,
    vao: u32,
    texture_hash: u64,
    uniform_hash: u64,
    depth_func: DepthFunc,
    depth_write: bool,
    depth_test: bool,
    cull_face: CullFace,
    scissor: bool,
    polygon_mode: PolygonMode,
    /// Hash of every field except `uniform_hash`
    primary_hash: u64,
    /// Hash of every field
    full_hash: u64,
}

impl StateSignature {
    /// Create a signature for the given framebuffer, shader program and VAO.
    ///
    /// Everything else starts at the usual opaque defaults: depth test and
    /// write on with `Less`, back-face culling, filled polygons.
    pub fn new(framebuffer: u32, shader: u32, vao: u32) -> Self {
        Self {
            framebuffer,
            shader,
            blend_mode: BlendMode::Opaque,
            vao,
            texture_hash: 0,
            uniform_hash: 0,
            depth_func: DepthFunc::Less,
            depth_write: true,
            depth_test: true,
            cull_face: CullFace::Back,
            scissor: false,
            polygon_mode: PolygonMode::Fill,
            primary_hash: 0,
            full_hash: 0,
        }
        .rehash()
    }

    fn rehash(mut self) -> Self {
        let mut hasher = xxhash_rust::xxh3::Xxh3::new();
        self.framebuffer.hash(&mut hasher);
        self.shader.hash(&mut hasher);
        self.blend_mode.hash(&mut hasher);
        self.vao.hash(&mut hasher);
        self.texture_hash.hash(&mut hasher);
        self.depth_func.hash(&mut hasher);
        self.depth_write.hash(&mut hasher);
        self.depth_test.hash(&mut hasher);
        self.cull_face.hash(&mut hasher);
        self.scissor.hash(&mut hasher);
        self.polygon_mode.hash(&mut hasher);
        self.primary_hash = hasher.finish();

        self.uniform_hash.hash(&mut hasher);
        self.full_hash = hasher.finish();
        self
    }

    pub fn with_framebuffer(mut self, framebuffer: u32) -> Self {
        self.framebuffer = framebuffer;
        self.rehash()
    }

    pub fn with_shader(mut self, shader: u32) -> Self {
        self.shader = shader;
        self.rehash()
    }

    pub fn with_blend_mode(mut self, blend_mode: BlendMode) -> Self {
        self.blend_mode = blend_mode;
        self.rehash()
    }

    pub fn with_vao(mut self, vao: u32) -> Self {
        self.vao = vao;
        self.rehash()
    }

    pub fn with_textures(mut self, texture_hash: u64) -> Self {
        self.texture_hash = texture_hash;
        self.rehash()
    }

    pub fn with_uniforms(mut self, uniform_hash: u64) -> Self {
        self.uniform_hash = uniform_hash;
        self.rehash()
    }

    pub fn with_depth(mut self, test: bool, write: bool, func: DepthFunc) -> Self {
        self.depth_test = test;
        self.depth_write = write;
        self.depth_func = func;
        self.rehash()
    }

    pub fn with_cull_face(mut self, cull_face: CullFace) -> Self {
        self.cull_face = cull_face;
        self.rehash()
    }

    pub fn with_scissor(mut self, scissor: bool) -> Self {
        self.scissor = scissor;
        self.rehash()
    }

    pub fn with_polygon_mode(mut self, polygon_mode: PolygonMode) -> Self {
        self.polygon_mode = polygon_mode;
        self.rehash()
    }

    pub fn framebuffer(&self) -> u32 {
        self.framebuffer
    }

    pub fn shader(&self) -> u32 {
        self.shader
    }

    pub fn blend_mode(&self) -> BlendMode {
        self.blend_mode
    }

    pub fn vao(&self) -> u32 {
        self.vao
    }

    pub fn texture_hash(&self) -> u64 {
        self.texture_hash
    }

    pub fn uniform_hash(&self) -> u64 {
        self.uniform_hash
    }

    pub fn depth_func(&self) -> DepthFunc {
        self.depth_func
    }

    pub fn depth_write(&self) -> bool {
        self.depth_write
    }

    pub fn depth_test(&self) -> bool {
        self.depth_test
    }

    pub fn cull_face(&self) -> CullFace {
        self.cull_face
    }

    pub fn scissor(&self) -> bool {
        self.scissor
    }

    pub fn polygon_mode(&self) -> PolygonMode {
        self.polygon_mode
    }

    /// Hash of everything that must match for two draws to merge
    pub fn primary_hash(&self) -> u64 {
        self.primary_hash
    }

    /// Hash of the complete signature, uniforms included
    pub fn full_hash(&self) -> u64 {
        self.full_hash
    }

    /// Pack the signature into a single ordered key
    ///
    /// Priority (most significant first): framebuffer > shader > blend > VAO >
    /// depth bits > cull > polygon. Sorting by this key clusters draws so the
    /// most expensive state changes happen least often. Ids wider than their
    /// field are masked, which only coarsens the grouping.
    pub fn sort_key(&self) -> u64 {
        let depth_bits = ((self.depth_test as u64) << 4)
            | ((self.depth_write as u64) << 3)
            | (self.depth_func as u64 & 0x7);

        ((self.framebuffer as u64 & FRAMEBUFFER_MASK) << FRAMEBUFFER_SHIFT)
            | ((self.shader as u64 & SHADER_MASK) << SHADER_SHIFT)
            | ((self.blend_mode as u64 & BLEND_MASK) << BLEND_SHIFT)
            | ((self.vao as u64 & VAO_MASK) << VAO_SHIFT)
            | (depth_bits << DEPTH_SHIFT)
            | ((self.cull_face as u64 & 0x3) << CULL_SHIFT)
            | ((self.polygon_mode as u64 & 0x3) << POLYGON_SHIFT)
    }

    /// Whether two draws with these signatures may share a batch
    ///
    /// Uniforms are excluded: they are updated per draw inside a batch.
    pub fn can_merge_with(&self, other: &StateSignature) -> bool {
        self.primary_hash == other.primary_hash && self.same_fields_except_uniforms(other)
    }

    fn same_fields_except_uniforms(&self, other: &StateSignature) -> bool {
        self.framebuffer == other.framebuffer
            && self.shader == other.shader
            && self.blend_mode == other.blend_mode
            && self.vao == other.vao
            && self.texture_hash == other.texture_hash
            && self.depth_func == other.depth_func
            && self.depth_write == other.depth_write
            && self.depth_test == other.depth_test
            && self.cull_face == other.cull_face
            && self.scissor == other.scissor
            && self.polygon_mode == other.polygon_mode
    }

    /// Weighted cost of switching from `self` to `other`
    pub fn state_change_count(&self, other: &StateSignature) -> u32 {
        let mut cost = 0;
        if self.framebuffer != other.framebuffer {
            cost += change_cost::FRAMEBUFFER;
        }
        if self.shader != other.shader {
            cost += change_cost::SHADER;
        }
        if self.blend_mode != other.blend_mode {
            cost += change_cost::BLEND;
        }
        if self.vao != other.vao {
            cost += change_cost::VAO;
        }
        if self.texture_hash != other.texture_hash {
            cost += change_cost::TEXTURES;
        }
        if self.uniform_hash != other.uniform_hash {
            cost += change_cost::UNIFORMS;
        }
        if self.depth_func != other.depth_func
            || self.depth_write != other.depth_write
            || self.depth_test != other.depth_test
        {
            cost += change_cost::DEPTH;
        }
        if self.scissor != other.scissor {
            cost += change_cost::SCISSOR;
        }
        if self.polygon_mode != other.polygon_mode {
            cost += change_cost::POLYGON;
        }
        if self.cull_face != other.cull_face {
            cost += change_cost::CULL;
        }
        cost
    }
}

impl Default for StateSignature {
    fn default() -> Self {
        Self::new(0, 0, 0)
    }
}

impl PartialEq for StateSignature {
    fn eq(&self, other: &Self) -> bool {
        self.full_hash == other.full_hash
            && self.uniform_hash == other.uniform_hash
            && self.same_fields_except_uniforms(other)
    }
}

impl Eq for StateSignature {}

impl Hash for StateSignature {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.full_hash);
    }
}

/// Sum of weighted state changes across consecutive signatures
pub fn weighted_state_changes<'a>(states: impl IntoIterator<Item = &'a StateSignature>) -> u64 {
    let mut total = 0u64;
    let mut previous: Option<&StateSignature> = None;
    for state in states {
        if let Some(prev) = previous {
            total += prev.state_change_count(state) as u64;
        }
        previous = Some(state);
    }
    total
}
