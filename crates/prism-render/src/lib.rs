// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

pub mod assets;
pub mod frame;
pub mod geometry;
pub mod settings;
pub mod uniforms;

pub use frame::{
    AcquireOutcome, FrameOps, FrameOutcome, FrameSynchronizer, PresentOutcome, FRAMES_IN_FLIGHT,
};
pub use settings::RenderSettings;

pub const WINDOW_TITLE: &str = "prism";
pub const DEFAULT_EXTENT: RenderSize = RenderSize {
    width: 1280,
    height: 720,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A minimized window reports a zero-area framebuffer; nothing can be
    /// presented to it.
    pub fn is_drawable(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

/// What the renderer needs from the windowing layer while it runs.
pub trait WindowHost {
    /// Current framebuffer size in physical pixels.
    fn framebuffer_size(&self) -> RenderSize;

    /// Block until the windowing layer has delivered at least one event.
    /// Only used while waiting for a drawable size, so resizes delivered
    /// here need no separate notification.
    fn wait_for_event(&mut self);
}

/// Blocks on the host's event wait until the framebuffer has a non-zero area.
pub fn wait_until_drawable(host: &mut dyn WindowHost) -> RenderSize {
    loop {
        let size = host.framebuffer_size();
        if size.is_drawable() {
            return size;
        }
        host.wait_for_event();
    }
}

/// The contract every backend implements. Exactly one backend is compiled
/// into a binary, so callers name the concrete type rather than `dyn Renderer`.
pub trait Renderer {
    /// One-time setup. Any creation failure is fatal.
    fn init(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: &RenderSettings,
    ) -> Result<Self>
    where
        Self: Sized;

    /// Render exactly one frame, recovering from resize/out-of-date internally.
    fn draw(&mut self, host: &mut dyn WindowHost) -> Result<FrameOutcome>;

    /// Wait for the GPU to go idle and release every GPU object. Idempotent.
    fn cleanup(&mut self);

    /// Set by the event loop on a resize event, consumed by the next `draw`.
    fn signal_resize(&mut self);

    fn resize_pending(&self) -> bool;
}
