// SPDX-License-Identifier: CEPL-1.0
use ash::khr::surface;
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::sync::Arc;

use crate::error::{Result, VkError};
use crate::instance::InstanceContext;

/// What a surface offers on one adapter.
#[derive(Clone, Debug, Default)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

pub struct Surface {
    loader: surface::Instance,
    handle: vk::SurfaceKHR,
    // keeps the instance alive until the surface is gone
    _instance: Arc<InstanceContext>,
}

impl Surface {
    pub fn new(
        instance: Arc<InstanceContext>,
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
    ) -> Result<Self> {
        let dh = display
            .display_handle()
            .map_err(|e| VkError::WindowHandle(e.to_string()))?
            .as_raw();
        let wh = window
            .window_handle()
            .map_err(|e| VkError::WindowHandle(e.to_string()))?
            .as_raw();

        let loader = surface::Instance::new(instance.entry(), instance.raw());
        let handle =
            unsafe { ash_window::create_surface(instance.entry(), instance.raw(), dh, wh, None)? };
        Ok(Self {
            loader,
            handle,
            _instance: instance,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    pub fn supports_present(&self, phys: vk::PhysicalDevice, family: u32) -> bool {
        unsafe {
            self.loader
                .get_physical_device_surface_support(phys, family, self.handle)
                .unwrap_or(false)
        }
    }

    pub fn query(&self, phys: vk::PhysicalDevice) -> Result<SurfaceSupport> {
        unsafe {
            Ok(SurfaceSupport {
                capabilities: self
                    .loader
                    .get_physical_device_surface_capabilities(phys, self.handle)?,
                formats: self
                    .loader
                    .get_physical_device_surface_formats(phys, self.handle)?,
                present_modes: self
                    .loader
                    .get_physical_device_surface_present_modes(phys, self.handle)?,
            })
        }
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe { self.loader.destroy_surface(self.handle, None) };
    }
}
