// SPDX-License-Identifier: CEPL-1.0
//! Presentable image chain plus everything sized by it: image views, the
//! optional depth target and framebuffers.

use ash::khr::swapchain;
use ash::vk;
use prism_render::settings::PresentPreference;
use prism_render::{AcquireOutcome, PresentOutcome, RenderSize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::buffer::find_memory_type;
use crate::device::{DeviceContext, ResolvedFamilies};
use crate::error::{Result, VkError, VkResultExt};
use crate::surface::{Surface, SurfaceSupport};

pub const PREFERRED_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_SRGB,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// BGRA8 sRGB with the standard colour space when offered, else the first.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| *f == PREFERRED_FORMAT)
        .or_else(|| formats.first().copied())
}

/// FIFO is the only mode every surface guarantees.
pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    pref: PresentPreference,
) -> vk::PresentModeKHR {
    match pref {
        PresentPreference::Mailbox if modes.contains(&vk::PresentModeKHR::MAILBOX) => {
            vk::PresentModeKHR::MAILBOX
        }
        _ => vk::PresentModeKHR::FIFO,
    }
}

/// Surface-fixed extent when the driver reports one, else `want` clamped to
/// the allowed range.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One more than the minimum, capped by the maximum (0 means no maximum).
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let want = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        want.min(caps.max_image_count)
    } else {
        want
    }
}

/// Concurrent across both families when they differ, exclusive otherwise.
pub fn sharing_for(families: ResolvedFamilies) -> (vk::SharingMode, Vec<u32>) {
    if families.is_shared() {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    } else {
        (
            vk::SharingMode::CONCURRENT,
            vec![families.graphics, families.present],
        )
    }
}

struct DepthTarget {
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
}

pub struct Swapchain {
    loader: swapchain::Device,
    handle: vk::SwapchainKHR,
    format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    depth_format: Option<vk::Format>,
    depth: Option<DepthTarget>,
    framebuffers: Vec<vk::Framebuffer>,
    present_pref: PresentPreference,
    device: Arc<DeviceContext>,
}

impl Swapchain {
    /// Swapchain, views and depth target. Framebuffers come later through
    /// [`Swapchain::attach_framebuffers`] once the render pass exists.
    pub fn new(
        device: &Arc<DeviceContext>,
        surface: &Surface,
        size: RenderSize,
        present_pref: PresentPreference,
        depth_format: Option<vk::Format>,
    ) -> Result<Self> {
        let loader = swapchain::Device::new(device.instance().raw(), device.raw());
        let mut chain = Self {
            loader,
            handle: vk::SwapchainKHR::null(),
            format: PREFERRED_FORMAT,
            present_mode: vk::PresentModeKHR::FIFO,
            extent: vk::Extent2D::default(),
            images: Vec::new(),
            views: Vec::new(),
            depth_format,
            depth: None,
            framebuffers: Vec::new(),
            present_pref,
            device: Arc::clone(device),
        };
        unsafe { chain.build(surface, size)? };
        Ok(chain)
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format.format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    #[inline]
    pub fn view_count(&self) -> usize {
        self.views.len()
    }

    #[inline]
    pub fn framebuffer_count(&self) -> usize {
        self.framebuffers.len()
    }

    pub fn framebuffer(&self, image_index: u32) -> vk::Framebuffer {
        self.framebuffers[image_index as usize]
    }

    unsafe fn build(&mut self, surface: &Surface, size: RenderSize) -> Result<()> {
        let raw = self.device.raw();
        let SurfaceSupport {
            capabilities: caps,
            formats,
            present_modes,
        } = surface.query(self.device.physical())?;

        let format = choose_surface_format(&formats).ok_or(VkError::NoSuitableAdapter)?;
        let present_mode = choose_present_mode(&present_modes, self.present_pref);
        let extent = choose_extent(&caps, size);
        let min_image_count = choose_image_count(&caps);
        let (sharing_mode, family_indices) = sharing_for(self.device.families());

        let pre_transform = if caps
            .supported_transforms
            .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
        {
            vk::SurfaceTransformFlagsKHR::IDENTITY
        } else {
            caps.current_transform
        };

        let info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: surface.handle(),
            min_image_count,
            image_format: format.format,
            image_color_space: format.color_space,
            image_extent: extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: sharing_mode,
            queue_family_index_count: family_indices.len() as u32,
            p_queue_family_indices: family_indices.as_ptr(),
            pre_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode,
            clipped: vk::TRUE,
            ..Default::default()
        };
        self.handle = self.loader.create_swapchain(&info, None)?;
        self.format = format;
        self.present_mode = present_mode;
        self.extent = extent;
        self.images = self.loader.get_swapchain_images(self.handle)?;

        for &image in &self.images {
            let view = create_view(raw, image, format.format, vk::ImageAspectFlags::COLOR)?;
            self.views.push(view);
        }

        if let Some(depth_format) = self.depth_format {
            self.depth = Some(self.create_depth(depth_format)?);
        }

        info!(
            format = ?format.format,
            color_space = ?format.color_space,
            present_mode = ?present_mode,
            width = extent.width,
            height = extent.height,
            images = self.images.len(),
            sharing = ?sharing_mode,
            "swapchain created"
        );
        Ok(())
    }

    unsafe fn create_depth(&self, format: vk::Format) -> Result<DepthTarget> {
        let raw = self.device.raw();
        let info = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            image_type: vk::ImageType::TYPE_2D,
            format,
            extent: vk::Extent3D {
                width: self.extent.width,
                height: self.extent.height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        let image = raw.create_image(&info, None)?;
        let req = raw.get_image_memory_requirements(image);
        let memory_type = match find_memory_type(
            self.device.memory_properties(),
            req.memory_type_bits,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ) {
            Ok(t) => t,
            Err(e) => {
                raw.destroy_image(image, None);
                return Err(e);
            }
        };
        let alloc = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: req.size,
            memory_type_index: memory_type,
            ..Default::default()
        };
        let memory = match raw.allocate_memory(&alloc, None) {
            Ok(m) => m,
            Err(e) => {
                raw.destroy_image(image, None);
                return Err(e.into());
            }
        };
        let target = DepthTarget {
            image,
            memory,
            view: vk::ImageView::null(),
        };
        if let Err(e) = raw.bind_image_memory(image, memory, 0) {
            destroy_depth(raw, target);
            return Err(e.into());
        }
        match create_view(raw, image, format, vk::ImageAspectFlags::DEPTH) {
            Ok(view) => Ok(DepthTarget { view, ..target }),
            Err(e) => {
                destroy_depth(raw, target);
                Err(e)
            }
        }
    }

    /// One framebuffer per swapchain image, colour view plus shared depth.
    pub fn attach_framebuffers(&mut self, render_pass: vk::RenderPass) -> Result<()> {
        let raw = self.device.raw();
        for &view in &self.views {
            let mut attachments = vec![view];
            if let Some(depth) = &self.depth {
                attachments.push(depth.view);
            }
            let info = vk::FramebufferCreateInfo {
                s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
                render_pass,
                attachment_count: attachments.len() as u32,
                p_attachments: attachments.as_ptr(),
                width: self.extent.width,
                height: self.extent.height,
                layers: 1,
                ..Default::default()
            };
            let fb = unsafe { raw.create_framebuffer(&info, None)? };
            self.framebuffers.push(fb);
        }
        Ok(())
    }

    /// Rebuild the chain, views, depth and framebuffers for `size`, releasing
    /// whatever is still alive first. Callers must have idled the device. The
    /// colour format may not change since the render pass and pipeline
    /// depend on it.
    pub fn rebuild(
        &mut self,
        surface: &Surface,
        size: RenderSize,
        render_pass: vk::RenderPass,
    ) -> Result<()> {
        let before = self.format.format;
        self.release();
        unsafe { self.build(surface, size)? };
        if self.format.format != before {
            return Err(VkError::SwapchainFormatChanged {
                before,
                after: self.format.format,
            });
        }
        self.attach_framebuffers(render_pass)?;
        debug!(
            images = self.images.len(),
            framebuffers = self.framebuffers.len(),
            "swapchain rebuilt"
        );
        Ok(())
    }

    pub fn acquire(&self, signal: vk::Semaphore) -> Result<AcquireOutcome> {
        let result = unsafe {
            self.loader
                .acquire_next_image(self.handle, u64::MAX, signal, vk::Fence::null())
        };
        match result {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Ready {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err::<AcquireOutcome, _>(e).during("vkAcquireNextImageKHR"),
        }
    }

    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> Result<PresentOutcome> {
        let info = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait,
            swapchain_count: 1,
            p_swapchains: &self.handle,
            p_image_indices: &image_index,
            ..Default::default()
        };
        match unsafe { self.loader.queue_present(queue, &info) } {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err::<PresentOutcome, _>(e).during("vkQueuePresentKHR"),
        }
    }

    /// Destroy framebuffers, depth, views and the chain, in that order. Safe
    /// to call more than once.
    pub fn release(&mut self) {
        let raw = self.device.raw();
        unsafe {
            for fb in self.framebuffers.drain(..) {
                raw.destroy_framebuffer(fb, None);
            }
            if let Some(depth) = self.depth.take() {
                destroy_depth(raw, depth);
            }
            for view in self.views.drain(..) {
                raw.destroy_image_view(view, None);
            }
            // images belong to the swapchain
            self.images.clear();
            if self.handle != vk::SwapchainKHR::null() {
                self.loader.destroy_swapchain(self.handle, None);
                self.handle = vk::SwapchainKHR::null();
            }
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.release();
    }
}

unsafe fn create_view(
    raw: &ash::Device,
    image: vk::Image,
    format: vk::Format,
    aspect_mask: vk::ImageAspectFlags,
) -> Result<vk::ImageView> {
    let info = vk::ImageViewCreateInfo {
        s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
        image,
        view_type: vk::ImageViewType::TYPE_2D,
        format,
        subresource_range: vk::ImageSubresourceRange {
            aspect_mask,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        },
        ..Default::default()
    };
    Ok(raw.create_image_view(&info, None)?)
}

unsafe fn destroy_depth(raw: &ash::Device, depth: DepthTarget) {
    if depth.view != vk::ImageView::null() {
        raw.destroy_image_view(depth.view, None);
    }
    raw.destroy_image(depth.image, None);
    raw.free_memory(depth.memory, None);
}
