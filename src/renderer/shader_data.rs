use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec4};

/// Number of textures addressable from one batch draw call.
/// Must match the sampler array length in `shaders/quad.frag`.
pub const MAX_TEXTURE_SLOTS: usize = 16;

pub const VERTICES_PER_QUAD: usize = 4;
pub const INDICES_PER_QUAD: usize = 6;

/// Per-slot uniform contents, written into the mapped buffer each frame.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, Pod, Zeroable)]
pub struct PerFrameData {
    pub viewproj: Mat4,
}

/// One corner of a batched quad, written straight into a mapped vertex buffer.
///
/// `slot` is the shifted texture slot index: 0 means untextured (pure vertex
/// color), `n + 1` means texture slot `n`. The 16-byte-aligned `color` leads
/// so the struct packs without implicit padding.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct QuadVertex {
    pub color: Vec4,
    pub position: Vec2,
    pub texcoord: Vec2,
    pub slot: u32,
    pub _padding: [u32; 3],
}
