// SPDX-License-Identifier: CEPL-1.0
use bytemuck::{Pod, Zeroable};
use prism_math::{orbit_view, spin_model, vulkan_perspective, Mat4};

use crate::RenderSize;

/// Matches the `std140` block bound at set 0, binding 0 in the vertex shader.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct UniformBufferObject {
    pub model: Mat4,
    pub view: Mat4,
    pub proj: Mat4,
}

impl UniformBufferObject {
    pub const SIZE: u64 = std::mem::size_of::<UniformBufferObject>() as u64;

    /// Transforms for the spinning cube `elapsed` seconds after start.
    pub fn spinning(elapsed: f32, size: RenderSize) -> Self {
        Self {
            model: spin_model(elapsed),
            view: orbit_view(),
            proj: vulkan_perspective(size.width, size.height),
        }
    }
}
