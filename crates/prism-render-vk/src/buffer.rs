// SPDX-License-Identifier: CEPL-1.0
//! Buffers, memory-type selection and the blocking staging transfers.

use ash::vk;
use bytemuck::Pod;
use std::ptr::NonNull;
use std::sync::Arc;
use tracing::debug;

use crate::commands::CommandPool;
use crate::device::DeviceContext;
use crate::error::{Result, VkError};

/// First memory type allowed by `type_filter` whose flags include `required`.
pub fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    required: vk::MemoryPropertyFlags,
) -> Result<u32> {
    (0..props.memory_type_count)
        .find(|&i| {
            (type_filter & (1 << i)) != 0
                && props.memory_types[i as usize]
                    .property_flags
                    .contains(required)
        })
        .ok_or(VkError::NoSuitableMemoryType {
            type_filter,
            required,
        })
}

pub const HOST_COHERENT: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw()
        | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

/// A buffer with its own allocation bound at offset 0.
pub struct Buffer {
    handle: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    device: Arc<DeviceContext>,
}

impl Buffer {
    pub fn new(
        device: &Arc<DeviceContext>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        let raw = device.raw();
        let info = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        unsafe {
            let handle = raw.create_buffer(&info, None)?;
            let req = raw.get_buffer_memory_requirements(handle);
            let memory_type =
                match find_memory_type(device.memory_properties(), req.memory_type_bits, properties)
                {
                    Ok(t) => t,
                    Err(e) => {
                        raw.destroy_buffer(handle, None);
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
                    raw.destroy_buffer(handle, None);
                    return Err(e.into());
                }
            };
            // from here on Drop releases both
            let buffer = Self {
                handle,
                memory,
                size,
                device: Arc::clone(device),
            };
            raw.bind_buffer_memory(handle, memory, 0)?;
            Ok(buffer)
        }
    }

    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.handle
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Copy `bytes` into host-visible memory through a temporary mapping.
    fn write_bytes(&self, bytes: &[u8]) -> Result<()> {
        let raw = self.device.raw();
        unsafe {
            let ptr = raw.map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr as *mut u8, bytes.len());
            raw.unmap_memory(self.memory);
        }
        Ok(())
    }

    fn read_bytes(&self) -> Result<Vec<u8>> {
        let raw = self.device.raw();
        let mut out = vec![0u8; self.size as usize];
        unsafe {
            let ptr = raw.map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())?;
            std::ptr::copy_nonoverlapping(ptr as *const u8, out.as_mut_ptr(), out.len());
            raw.unmap_memory(self.memory);
        }
        Ok(out)
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        let raw = self.device.raw();
        unsafe {
            raw.destroy_buffer(self.handle, None);
            raw.free_memory(self.memory, None);
        }
    }
}

/// Host-visible, coherent buffer mapped for its whole lifetime. Used for the
/// per-slot uniforms, which are rewritten every frame.
pub struct MappedBuffer {
    ptr: NonNull<u8>,
    buffer: Buffer,
}

impl MappedBuffer {
    pub fn new(
        device: &Arc<DeviceContext>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> Result<Self> {
        let buffer = Buffer::new(device, size, usage, HOST_COHERENT)?;
        let ptr = unsafe {
            device
                .raw()
                .map_memory(buffer.memory, 0, size, vk::MemoryMapFlags::empty())?
        };
        let ptr = NonNull::new(ptr as *mut u8)
            .ok_or(VkError::Vulkan(vk::Result::ERROR_MEMORY_MAP_FAILED))?;
        Ok(Self { ptr, buffer })
    }

    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer.handle
    }

    /// Copy `value` to the start of the mapping. A value larger than the
    /// buffer is rejected rather than cut short.
    pub fn write<T: Pod>(&mut self, value: &T) -> Result<()> {
        let bytes = bytemuck::bytes_of(value);
        check_fits(bytes.len(), self.buffer.size)?;
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.ptr.as_ptr(), bytes.len()) };
        Ok(())
    }
}

fn check_fits(needed: usize, capacity: vk::DeviceSize) -> Result<()> {
    if needed as vk::DeviceSize > capacity {
        return Err(VkError::MappedOverflow { needed, capacity });
    }
    Ok(())
}

impl Drop for MappedBuffer {
    fn drop(&mut self) {
        unsafe { self.buffer.device.raw().unmap_memory(self.buffer.memory) };
    }
}

/// Blocking host -> device-local copy through a transient staging buffer.
/// Only used at initialisation.
pub fn upload_via_staging(
    device: &Arc<DeviceContext>,
    pool: &CommandPool,
    data: &[u8],
    usage: vk::BufferUsageFlags,
) -> Result<Buffer> {
    let size = data.len() as vk::DeviceSize;

    // 1) staging (HOST_VISIBLE|COHERENT)
    let staging = Buffer::new(device, size, vk::BufferUsageFlags::TRANSFER_SRC, HOST_COHERENT)?;
    staging.write_bytes(data)?;

    // 2) device-local destination
    let dst = Buffer::new(
        device,
        size,
        usage | vk::BufferUsageFlags::TRANSFER_DST,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )?;

    // 3) one-shot copy, waits for the queue to drain
    let region = vk::BufferCopy {
        src_offset: 0,
        dst_offset: 0,
        size,
    };
    pool.one_shot(|raw, cmd| unsafe {
        raw.cmd_copy_buffer(cmd, staging.handle, dst.handle, std::slice::from_ref(&region));
    })?;

    debug!(bytes = size, "staged upload complete");
    Ok(dst)
}

/// Blocking device -> host copy of all of `src`. `src` needs TRANSFER_SRC usage.
pub fn download_via_staging(
    device: &Arc<DeviceContext>,
    pool: &CommandPool,
    src: &Buffer,
) -> Result<Vec<u8>> {
    let readback = Buffer::new(
        device,
        src.size,
        vk::BufferUsageFlags::TRANSFER_DST,
        HOST_COHERENT,
    )?;
    let region = vk::BufferCopy {
        src_offset: 0,
        dst_offset: 0,
        size: src.size,
    };
    pool.one_shot(|raw, cmd| unsafe {
        raw.cmd_copy_buffer(cmd, src.handle, readback.handle, std::slice::from_ref(&region));
    })?;
    readback.read_bytes()
}
