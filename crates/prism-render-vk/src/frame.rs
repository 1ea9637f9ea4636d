// SPDX-License-Identifier: CEPL-1.0
//! Per-slot GPU objects. Sync primitives are rebuilt with the swapchain;
//! command buffers, uniforms and descriptor sets live for the whole run.

use ash::vk;
use prism_render::uniforms::UniformBufferObject;
use std::sync::Arc;

use crate::buffer::MappedBuffer;
use crate::commands::CommandPool;
use crate::device::DeviceContext;
use crate::error::{Result, VkResultExt};

pub struct Semaphore {
    handle: vk::Semaphore,
    device: Arc<DeviceContext>,
}

impl Semaphore {
    pub fn new(device: &Arc<DeviceContext>) -> Result<Self> {
        let info = vk::SemaphoreCreateInfo::default();
        let handle = unsafe { device.raw().create_semaphore(&info, None)? };
        Ok(Self {
            handle,
            device: Arc::clone(device),
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.handle
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe { self.device.raw().destroy_semaphore(self.handle, None) };
    }
}

pub struct Fence {
    handle: vk::Fence,
    device: Arc<DeviceContext>,
}

impl Fence {
    pub fn new(device: &Arc<DeviceContext>, signaled: bool) -> Result<Self> {
        let info = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: if signaled {
                vk::FenceCreateFlags::SIGNALED
            } else {
                vk::FenceCreateFlags::empty()
            },
            ..Default::default()
        };
        let handle = unsafe { device.raw().create_fence(&info, None)? };
        Ok(Self {
            handle,
            device: Arc::clone(device),
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.handle
    }

    /// No timeout.
    pub fn wait(&self) -> Result<()> {
        unsafe {
            self.device
                .raw()
                .wait_for_fences(&[self.handle], true, u64::MAX)
                .during("vkWaitForFences")
        }
    }

    pub fn reset(&self) -> Result<()> {
        unsafe { Ok(self.device.raw().reset_fences(&[self.handle])?) }
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe { self.device.raw().destroy_fence(self.handle, None) };
    }
}

/// One slot's synchronisation. The fence starts signaled so the first wait
/// on a fresh slot returns immediately.
pub struct SlotSync {
    pub image_available: Semaphore,
    pub render_finished: Semaphore,
    pub in_flight: Fence,
}

impl SlotSync {
    pub fn new(device: &Arc<DeviceContext>) -> Result<Self> {
        Ok(Self {
            image_available: Semaphore::new(device)?,
            render_finished: Semaphore::new(device)?,
            in_flight: Fence::new(device, true)?,
        })
    }
}

/// Replace every element of `slots` with `count` fresh ones. The old
/// elements are dropped before the first new one is built, and a failed
/// build leaves only the ones built so far.
pub fn rebuild_slots<T, E>(
    slots: &mut Vec<T>,
    count: usize,
    mut build: impl FnMut(usize) -> std::result::Result<T, E>,
) -> std::result::Result<(), E> {
    slots.clear();
    slots.reserve(count);
    for i in 0..count {
        slots.push(build(i)?);
    }
    Ok(())
}

pub struct DescriptorPool {
    handle: vk::DescriptorPool,
    device: Arc<DeviceContext>,
}

impl DescriptorPool {
    /// Room for `sets` sets of one uniform buffer each.
    pub fn for_uniform_sets(device: &Arc<DeviceContext>, sets: u32) -> Result<Self> {
        let sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: sets,
        }];
        let info = vk::DescriptorPoolCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
            max_sets: sets,
            pool_size_count: sizes.len() as u32,
            p_pool_sizes: sizes.as_ptr(),
            ..Default::default()
        };
        let handle = unsafe { device.raw().create_descriptor_pool(&info, None)? };
        Ok(Self {
            handle,
            device: Arc::clone(device),
        })
    }

    pub fn allocate(
        &self,
        layout: vk::DescriptorSetLayout,
        count: usize,
    ) -> Result<Vec<vk::DescriptorSet>> {
        let layouts = vec![layout; count];
        let info = vk::DescriptorSetAllocateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
            descriptor_pool: self.handle,
            descriptor_set_count: count as u32,
            p_set_layouts: layouts.as_ptr(),
            ..Default::default()
        };
        Ok(unsafe { self.device.raw().allocate_descriptor_sets(&info)? })
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        // frees its sets too
        unsafe { self.device.raw().destroy_descriptor_pool(self.handle, None) };
    }
}

/// The long-lived half of a frame slot.
pub struct SlotResources {
    pub command_buffer: vk::CommandBuffer,
    pub descriptor_set: vk::DescriptorSet,
    pub uniforms: MappedBuffer,
}

/// One command buffer, one mapped uniform buffer and one descriptor set
/// pointing at it, per slot.
pub fn create_slot_resources(
    device: &Arc<DeviceContext>,
    commands: &CommandPool,
    descriptors: &DescriptorPool,
    layout: vk::DescriptorSetLayout,
    count: usize,
) -> Result<Vec<SlotResources>> {
    let command_buffers = commands.allocate(count as u32)?;
    let sets = descriptors.allocate(layout, count)?;

    let mut slots = Vec::with_capacity(count);
    for (command_buffer, descriptor_set) in command_buffers.into_iter().zip(sets) {
        let uniforms = MappedBuffer::new(
            device,
            UniformBufferObject::SIZE,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
        )?;
        let info = vk::DescriptorBufferInfo {
            buffer: uniforms.handle(),
            offset: 0,
            range: UniformBufferObject::SIZE,
        };
        let write = vk::WriteDescriptorSet {
            s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
            dst_set: descriptor_set,
            dst_binding: 0,
            descriptor_count: 1,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            p_buffer_info: &info,
            ..Default::default()
        };
        unsafe { device.raw().update_descriptor_sets(&[write], &[]) };
        slots.push(SlotResources {
            command_buffer,
            descriptor_set,
            uniforms,
        });
    }
    Ok(slots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    /// Counts live instances.
    struct Tracked(Rc<Cell<usize>>);

    impl Tracked {
        fn new(live: &Rc<Cell<usize>>) -> Self {
            live.set(live.get() + 1);
            Tracked(Rc::clone(live))
        }
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.set(self.0.get() - 1);
        }
    }

    #[test]
    fn rebuild_twice_matches_rebuild_once() {
        let live = Rc::new(Cell::new(0));
        let mut slots = Vec::new();

        rebuild_slots(&mut slots, 2, |_| Ok::<_, ()>(Tracked::new(&live))).unwrap();
        let after_one = live.get();
        rebuild_slots(&mut slots, 2, |_| Ok::<_, ()>(Tracked::new(&live))).unwrap();

        assert_eq!(after_one, 2);
        assert_eq!(live.get(), after_one);
        assert_eq!(slots.len(), 2);
    }

    #[test]
    fn old_slots_are_gone_before_new_ones_are_built() {
        let live = Rc::new(Cell::new(0));
        let mut slots = Vec::new();
        rebuild_slots(&mut slots, 3, |_| Ok::<_, ()>(Tracked::new(&live))).unwrap();

        let mut seen = Vec::new();
        rebuild_slots(&mut slots, 3, |_| {
            seen.push(live.get());
            Ok::<_, ()>(Tracked::new(&live))
        })
        .unwrap();
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[test]
    fn failed_rebuild_leaks_nothing() {
        let live = Rc::new(Cell::new(0));
        let mut slots = Vec::new();
        rebuild_slots(&mut slots, 2, |_| Ok::<_, ()>(Tracked::new(&live))).unwrap();

        let err = rebuild_slots(&mut slots, 2, |i| {
            if i == 1 {
                Err("fence creation failed")
            } else {
                Ok(Tracked::new(&live))
            }
        });
        assert!(err.is_err());
        assert_eq!(slots.len(), 1);
        assert_eq!(live.get(), 1);
        drop(slots);
        assert_eq!(live.get(), 0);
    }
}
