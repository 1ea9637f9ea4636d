// SPDX-License-Identifier: CEPL-1.0
//! Desktop window and event pump. The caller owns the frame loop: it polls
//! events between frames, and the renderer blocks on events while the window
//! is minimized.

pub use winit;

use anyhow::{anyhow, Context, Result};
use prism_render::{RenderSize, WindowHost};
use std::time::Duration;
use tracing::{debug, info};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::platform::pump_events::{EventLoopExtPumpEvents, PumpStatus};
use winit::window::{Window, WindowId};

/// Zero-area while minimized, otherwise the inner size.
pub fn effective_size(minimized: Option<bool>, inner: PhysicalSize<u32>) -> RenderSize {
    if minimized == Some(true) {
        RenderSize::new(0, 0)
    } else {
        RenderSize::new(inner.width, inner.height)
    }
}

#[derive(Default)]
struct EventState {
    title: String,
    initial: Option<RenderSize>,
    id: Option<WindowId>,
    created: Option<Window>,
    create_error: Option<String>,
    resized: bool,
    close_requested: bool,
}

impl ApplicationHandler for EventState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.id.is_some() || self.create_error.is_some() {
            return;
        }
        let size = self.initial.unwrap_or(prism_render::DEFAULT_EXTENT);
        let attrs = Window::default_attributes()
            .with_title(self.title.clone())
            .with_inner_size(PhysicalSize::new(size.width, size.height));
        match event_loop.create_window(attrs) {
            Ok(window) => {
                self.id = Some(window.id());
                self.created = Some(window);
            }
            Err(e) => self.create_error = Some(e.to_string()),
        }
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, id: WindowId, event: WindowEvent) {
        if Some(id) != self.id {
            return;
        }
        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.close_requested = true;
            }
            WindowEvent::Resized(size) => {
                debug!(width = size.width, height = size.height, "Resized");
                self.resized = true;
            }
            _ => {}
        }
    }
}

impl EventState {
    /// Fold one pump's outcome into the state. A blocking pump only runs
    /// inside the renderer's wait for a drawable size, which reads the final
    /// size itself, so resizes seen there are already accounted for.
    fn settle(&mut self, status: PumpStatus, blocking: bool) {
        if let PumpStatus::Exit(_) = status {
            self.close_requested = true;
        }
        if blocking {
            self.resized = false;
        }
    }
}

pub struct DesktopWindow {
    window: Window,
    state: EventState,
    event_loop: EventLoop<()>,
    last_drawable: RenderSize,
}

impl DesktopWindow {
    pub fn open(title: &str, size: RenderSize) -> Result<Self> {
        let mut event_loop = EventLoop::new().context("create event loop")?;
        let mut state = EventState {
            title: title.to_owned(),
            initial: Some(size),
            ..Default::default()
        };

        // The window appears on the first `resumed`, which may take a few pumps.
        let window = loop {
            if let PumpStatus::Exit(code) =
                event_loop.pump_app_events(Some(Duration::ZERO), &mut state)
            {
                return Err(anyhow!("event loop exited ({code}) before a window opened"));
            }
            if let Some(err) = state.create_error.take() {
                return Err(anyhow!("create_window: {err}"));
            }
            if let Some(window) = state.created.take() {
                break window;
            }
        };

        let inner = window.inner_size();
        info!(title, width = inner.width, height = inner.height, "window opened");
        Ok(Self {
            last_drawable: RenderSize::new(inner.width.max(1), inner.height.max(1)),
            window,
            state,
            event_loop,
        })
    }

    #[inline]
    pub fn window(&self) -> &Window {
        &self.window
    }

    /// Handle whatever is queued without blocking.
    pub fn poll_events(&mut self) {
        let status = self
            .event_loop
            .pump_app_events(Some(Duration::ZERO), &mut self.state);
        self.state.settle(status, false);
        self.remember_drawable();
    }

    fn remember_drawable(&mut self) {
        let size = effective_size(self.window.is_minimized(), self.window.inner_size());
        if size.is_drawable() {
            self.last_drawable = size;
        }
    }

    /// Returns the resize flag and clears it.
    pub fn take_resized(&mut self) -> bool {
        std::mem::take(&mut self.state.resized)
    }

    #[inline]
    pub fn should_close(&self) -> bool {
        self.state.close_requested
    }
}

impl WindowHost for DesktopWindow {
    fn framebuffer_size(&self) -> RenderSize {
        let size = effective_size(self.window.is_minimized(), self.window.inner_size());
        // A close while minimized must not leave the renderer waiting forever.
        if !size.is_drawable() && self.state.close_requested {
            return self.last_drawable;
        }
        size
    }

    fn wait_for_event(&mut self) {
        let status = self.event_loop.pump_app_events(None, &mut self.state);
        self.state.settle(status, true);
        self.remember_drawable();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimized_reports_zero_area() {
        let inner = PhysicalSize::new(1280, 720);
        assert_eq!(
            effective_size(Some(true), inner),
            RenderSize::new(0, 0)
        );
        assert!(!effective_size(Some(true), inner).is_drawable());
    }

    #[test]
    fn unknown_minimized_state_trusts_inner_size() {
        let inner = PhysicalSize::new(800, 600);
        assert_eq!(effective_size(None, inner), RenderSize::new(800, 600));
        assert_eq!(effective_size(Some(false), inner), RenderSize::new(800, 600));
        // some platforms only shrink the client area
        assert!(!effective_size(None, PhysicalSize::new(0, 0)).is_drawable());
    }

    #[test]
    fn resize_seen_while_waiting_is_not_replayed() {
        let mut state = EventState {
            resized: true,
            ..Default::default()
        };
        state.settle(PumpStatus::Continue, true);
        assert!(!state.resized);
        assert!(!state.close_requested);
    }

    #[test]
    fn polling_keeps_the_resize_for_the_next_frame() {
        let mut state = EventState {
            resized: true,
            ..Default::default()
        };
        state.settle(PumpStatus::Continue, false);
        assert!(state.resized);
    }

    #[test]
    fn loop_exit_counts_as_close() {
        let mut state = EventState::default();
        state.settle(PumpStatus::Exit(0), false);
        assert!(state.close_requested);
    }
}
