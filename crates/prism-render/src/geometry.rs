// SPDX-License-Identifier: CEPL-1.0
//! Mesh data and the combined vertex+index buffer layout.

use bytemuck::{Pod, Zeroable};
use serde::Deserialize;

/// Interleaved position + colour, both `vec3`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub color: [f32; 3],
}

impl Vertex {
    pub const STRIDE: u32 = std::mem::size_of::<Vertex>() as u32;
    pub const POS_OFFSET: u32 = std::mem::offset_of!(Vertex, pos) as u32;
    pub const COLOR_OFFSET: u32 = std::mem::offset_of!(Vertex, color) as u32;

    const fn new(pos: [f32; 3], color: [f32; 3]) -> Self {
        Self { pos, color }
    }
}

pub const CUBE_VERTICES: [Vertex; 8] = [
    // front (+z)
    Vertex::new([-0.5, -0.5, 0.5], [1.0, 0.0, 0.0]),
    Vertex::new([0.5, -0.5, 0.5], [0.0, 1.0, 0.0]),
    Vertex::new([0.5, 0.5, 0.5], [0.0, 0.0, 1.0]),
    Vertex::new([-0.5, 0.5, 0.5], [1.0, 1.0, 1.0]),
    // back (-z)
    Vertex::new([-0.5, -0.5, -0.5], [1.0, 1.0, 0.0]),
    Vertex::new([0.5, -0.5, -0.5], [0.0, 1.0, 1.0]),
    Vertex::new([0.5, 0.5, -0.5], [1.0, 0.0, 1.0]),
    Vertex::new([-0.5, 0.5, -0.5], [0.5, 0.5, 0.5]),
];

#[rustfmt::skip]
pub const CUBE_INDICES: [u16; 36] = [
    0, 1, 2, 2, 3, 0, // front
    1, 5, 6, 6, 2, 1, // right
    5, 4, 7, 7, 6, 5, // back
    4, 0, 3, 3, 7, 4, // left
    3, 2, 6, 6, 7, 3, // top
    4, 5, 1, 1, 0, 4, // bottom
];

pub const TRIANGLE_VERTICES: [Vertex; 3] = [
    Vertex::new([0.0, -0.5, 0.0], [1.0, 0.0, 0.0]),
    Vertex::new([0.5, 0.5, 0.0], [0.0, 1.0, 0.0]),
    Vertex::new([-0.5, 0.5, 0.0], [0.0, 0.0, 1.0]),
];

pub const TRIANGLE_INDICES: [u16; 3] = [0, 1, 2];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MeshKind {
    #[default]
    Cube,
    Triangle,
}

/// Borrowed view of one indexed mesh.
#[derive(Clone, Copy, Debug)]
pub struct Mesh<'a> {
    pub vertices: &'a [Vertex],
    pub indices: &'a [u16],
}

impl MeshKind {
    pub fn mesh(self) -> Mesh<'static> {
        match self {
            MeshKind::Cube => Mesh {
                vertices: &CUBE_VERTICES,
                indices: &CUBE_INDICES,
            },
            MeshKind::Triangle => Mesh {
                vertices: &TRIANGLE_VERTICES,
                indices: &TRIANGLE_INDICES,
            },
        }
    }
}

/// Byte layout of a buffer holding vertices at offset 0 and indices right
/// after them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CombinedLayout {
    pub vertex_bytes: u64,
    pub index_offset: u64,
    pub index_bytes: u64,
    pub index_count: u32,
}

impl CombinedLayout {
    pub fn of(mesh: &Mesh<'_>) -> Self {
        let vertex_bytes = std::mem::size_of_val(mesh.vertices) as u64;
        let index_bytes = std::mem::size_of_val(mesh.indices) as u64;
        Self {
            vertex_bytes,
            index_offset: vertex_bytes,
            index_bytes,
            index_count: mesh.indices.len() as u32,
        }
    }

    #[inline]
    pub fn total_bytes(&self) -> u64 {
        self.vertex_bytes + self.index_bytes
    }
}

impl Mesh<'_> {
    /// Vertex bytes followed by index bytes, sized from the slices themselves.
    pub fn pack_combined(&self) -> Vec<u8> {
        let layout = CombinedLayout::of(self);
        let mut out = Vec::with_capacity(layout.total_bytes() as usize);
        out.extend_from_slice(bytemuck::cast_slice(self.vertices));
        out.extend_from_slice(bytemuck::cast_slice(self.indices));
        out
    }
}
