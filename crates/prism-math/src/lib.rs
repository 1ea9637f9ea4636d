// SPDX-License-Identifier: CEPL-1.0
//! Small math layer over `glam` for the sandbox: colour conversion and the
//! transforms that spin the cube.

pub use glam::{Mat4, Vec3};

/// Standard piecewise sRGB → linear transfer for one channel in `[0, 1]`.
pub fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

/// 8-bit sRGB colour to linear RGBA with opaque alpha.
pub fn srgb8_to_linear(rgb: [u8; 3]) -> [f32; 4] {
    [
        srgb_to_linear(rgb[0] as f32 / 255.0),
        srgb_to_linear(rgb[1] as f32 / 255.0),
        srgb_to_linear(rgb[2] as f32 / 255.0),
        1.0,
    ]
}

/// Degrees per second the model turns about +Z.
pub const SPIN_DEG_PER_SEC: f32 = 90.0;

pub fn spin_model(elapsed_secs: f32) -> Mat4 {
    Mat4::from_rotation_z(elapsed_secs * SPIN_DEG_PER_SEC.to_radians())
}

/// Camera at (2, 2, 2) looking at the origin, +Z up.
pub fn orbit_view() -> Mat4 {
    Mat4::look_at_rh(Vec3::splat(2.0), Vec3::ZERO, Vec3::Z)
}

/// 45° perspective with depth in `[0, 1]` and Y flipped for Vulkan clip space.
/// A zero height is treated as a square aspect.
pub fn vulkan_perspective(width: u32, height: u32) -> Mat4 {
    let aspect = if height == 0 {
        1.0
    } else {
        width as f32 / height as f32
    };
    let mut proj = Mat4::perspective_rh(45f32.to_radians(), aspect, 0.1, 10.0);
    proj.y_axis.y *= -1.0;
    proj
}
