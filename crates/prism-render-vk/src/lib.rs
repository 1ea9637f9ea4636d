// SPDX-License-Identifier: CEPL-1.0
//! Vulkan backend: device selection, swapchain lifecycle, staging uploads
//! and two frames in flight behind the [`prism_render::Renderer`] facade.

pub mod buffer;
pub mod commands;
pub mod device;
pub mod error;
pub mod frame;
pub mod instance;
pub mod pipeline;
mod renderer;
pub mod surface;
pub mod swapchain;

pub use error::{Result, VkError};
pub use renderer::VkRenderer;
