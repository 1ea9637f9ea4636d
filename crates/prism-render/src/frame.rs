// SPDX-License-Identifier: CEPL-1.0
//! Frames-in-flight pacing shared by every explicit-sync backend.
//!
//! The CPU may run at most [`FRAMES_IN_FLIGHT`] frames ahead of the GPU. Each
//! slot owns a fence and two semaphores on the backend side; this module only
//! decides *when* each of them is waited on, reset, submitted and presented:
//!
//! ```text
//! wait(fence[slot]) -> acquire(image_available[slot])
//!     out-of-date or resize pending -> recreate, skip the frame
//!     ok -> reset(fence, cmd) -> record -> uniforms -> submit -> present
//!         out-of-date / suboptimal / resize pending -> recreate
//!         otherwise slot = (slot + 1) % FRAMES_IN_FLIGHT
//! ```
//!
//! Recreation always resets the slot counter to 0.

use anyhow::Result;
use tracing::debug;

use crate::{wait_until_drawable, RenderSize, WindowHost};

/// Number of frame slots the CPU cycles through.
pub const FRAMES_IN_FLIGHT: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image is ready; `suboptimal` images are still rendered to.
    Ready { image_index: u32, suboptimal: bool },
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The frame was submitted and presented from `slot`.
    Presented {
        slot: usize,
        image_index: u32,
        recreated: bool,
    },
    /// Nothing was submitted; the swapchain was rebuilt instead.
    Skipped,
}

/// GPU-side steps of one frame. Implemented by a backend; slot indices are
/// always in `0..FRAMES_IN_FLIGHT`.
pub trait FrameOps {
    /// Block until the fence of `slot` is signaled.
    fn wait_for_slot(&mut self, slot: usize) -> Result<()>;

    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome>;

    /// Reset the fence and command buffer of `slot`. Only called after a
    /// successful acquire.
    fn reset_slot(&mut self, slot: usize) -> Result<()>;

    fn record(&mut self, slot: usize, image_index: u32) -> Result<()>;

    fn update_uniforms(&mut self, slot: usize) -> Result<()>;

    fn submit(&mut self, slot: usize) -> Result<()>;

    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome>;

    /// Tear down and rebuild every swapchain-sized object (images, views,
    /// framebuffers) and every slot's sync primitives for `size`.
    fn recreate_swapchain(&mut self, size: RenderSize) -> Result<()>;
}

#[derive(Debug)]
pub struct FrameSynchronizer {
    current: usize,
    frames_in_flight: usize,
    recreations: u64,
}

impl Default for FrameSynchronizer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSynchronizer {
    pub fn new() -> Self {
        Self {
            current: 0,
            frames_in_flight: FRAMES_IN_FLIGHT,
            recreations: 0,
        }
    }

    #[inline]
    pub fn current_frame(&self) -> usize {
        self.current
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    /// Number of swapchain recreations performed so far.
    #[inline]
    pub fn recreations(&self) -> u64 {
        self.recreations
    }

    /// Drive one frame through `ops`. `resize_requested` is the external
    /// resize flag; it is cleared whenever it causes a recreation.
    pub fn draw<O: FrameOps + ?Sized>(
        &mut self,
        ops: &mut O,
        host: &mut dyn WindowHost,
        resize_requested: &mut bool,
    ) -> Result<FrameOutcome> {
        let slot = self.current;
        ops.wait_for_slot(slot)?;

        let image_index = match ops.acquire_image(slot)? {
            AcquireOutcome::OutOfDate => {
                debug!(slot, "acquire: swapchain out of date, skipping frame");
                *resize_requested = false;
                self.recreate(ops, host)?;
                return Ok(FrameOutcome::Skipped);
            }
            AcquireOutcome::Ready { .. } if *resize_requested => {
                debug!(slot, "acquire: resize pending, skipping frame");
                *resize_requested = false;
                self.recreate(ops, host)?;
                return Ok(FrameOutcome::Skipped);
            }
            AcquireOutcome::Ready { image_index, .. } => image_index,
        };

        ops.reset_slot(slot)?;
        ops.record(slot, image_index)?;
        ops.update_uniforms(slot)?;
        ops.submit(slot)?;

        let presented = ops.present(slot, image_index)?;
        if presented != PresentOutcome::Presented || *resize_requested {
            debug!(slot, ?presented, resize = *resize_requested, "present: recreating");
            *resize_requested = false;
            self.recreate(ops, host)?;
            return Ok(FrameOutcome::Presented {
                slot,
                image_index,
                recreated: true,
            });
        }

        self.current = (self.current + 1) % self.frames_in_flight;
        Ok(FrameOutcome::Presented {
            slot,
            image_index,
            recreated: false,
        })
    }

    /// Wait for a drawable window, rebuild the swapchain and restart the
    /// slot cycle at 0.
    pub fn recreate<O: FrameOps + ?Sized>(
        &mut self,
        ops: &mut O,
        host: &mut dyn WindowHost,
    ) -> Result<()> {
        let size = wait_until_drawable(host);
        ops.recreate_swapchain(size)?;
        self.current = 0;
        self.recreations += 1;
        Ok(())
    }
}
