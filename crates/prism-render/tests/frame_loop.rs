// SPDX-License-Identifier: CEPL-1.0
//! Frame pacing scenarios driven through a recording `FrameOps`.

use std::collections::VecDeque;

use anyhow::{anyhow, Result};
use prism_render::{
    AcquireOutcome, FrameOps, FrameOutcome, FrameSynchronizer, PresentOutcome, RenderSize,
    WindowHost, DEFAULT_EXTENT, FRAMES_IN_FLIGHT,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Call {
    Wait(usize),
    Acquire(usize),
    Reset(usize),
    Record(usize, u32),
    Uniforms(usize),
    Submit(usize),
    Present(usize, u32),
    Recreate(RenderSize),
}

/// Scripted swapchain with `image_count` images, handing them out round-robin.
struct Recorder {
    calls: Vec<Call>,
    image_count: u32,
    next_image: u32,
    acquire_script: VecDeque<AcquireOutcome>,
    present_script: VecDeque<PresentOutcome>,
    fail_submit: bool,
    /// Image counts the surface reports on successive recreations.
    resized_image_counts: VecDeque<u32>,
    /// Views, framebuffers and sync primitives ever built or destroyed.
    created: usize,
    destroyed: usize,
    /// Size of the set built by the last (re)creation.
    current_set: usize,
}

impl Recorder {
    fn new(image_count: u32) -> Self {
        Self {
            calls: Vec::new(),
            image_count,
            next_image: 0,
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            fail_submit: false,
            resized_image_counts: VecDeque::new(),
            created: Self::objects_for(image_count),
            destroyed: 0,
            current_set: Self::objects_for(image_count),
        }
    }

    fn live_objects(&self) -> usize {
        self.created - self.destroyed
    }

    fn objects_for(image_count: u32) -> usize {
        2 * image_count as usize + 3 * FRAMES_IN_FLIGHT
    }

    fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }

    fn submits(&self) -> usize {
        self.count(|c| matches!(c, Call::Submit(_)))
    }

    fn recreates(&self) -> usize {
        self.count(|c| matches!(c, Call::Recreate(_)))
    }
}

impl FrameOps for Recorder {
    fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
        self.calls.push(Call::Wait(slot));
        Ok(())
    }

    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome> {
        self.calls.push(Call::Acquire(slot));
        if let Some(scripted) = self.acquire_script.pop_front() {
            return Ok(scripted);
        }
        let image_index = self.next_image;
        self.next_image = (self.next_image + 1) % self.image_count;
        Ok(AcquireOutcome::Ready {
            image_index,
            suboptimal: false,
        })
    }

    fn reset_slot(&mut self, slot: usize) -> Result<()> {
        self.calls.push(Call::Reset(slot));
        Ok(())
    }

    fn record(&mut self, slot: usize, image_index: u32) -> Result<()> {
        self.calls.push(Call::Record(slot, image_index));
        Ok(())
    }

    fn update_uniforms(&mut self, slot: usize) -> Result<()> {
        self.calls.push(Call::Uniforms(slot));
        Ok(())
    }

    fn submit(&mut self, slot: usize) -> Result<()> {
        if self.fail_submit {
            return Err(anyhow!("vkQueueSubmit: device lost"));
        }
        self.calls.push(Call::Submit(slot));
        Ok(())
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome> {
        self.calls.push(Call::Present(slot, image_index));
        Ok(self
            .present_script
            .pop_front()
            .unwrap_or(PresentOutcome::Presented))
    }

    fn recreate_swapchain(&mut self, size: RenderSize) -> Result<()> {
        assert!(size.is_drawable(), "recreated with zero extent");
        self.calls.push(Call::Recreate(size));
        self.destroyed += self.current_set;
        if let Some(count) = self.resized_image_counts.pop_front() {
            self.image_count = count;
        }
        self.current_set = Self::objects_for(self.image_count);
        self.created += self.current_set;
        self.next_image = 0;
        Ok(())
    }
}

struct Host {
    sizes: VecDeque<RenderSize>,
    current: RenderSize,
    waits: usize,
}

impl Host {
    fn visible() -> Self {
        Self::scripted(DEFAULT_EXTENT, std::iter::empty())
    }

    fn scripted(current: RenderSize, later: impl IntoIterator<Item = RenderSize>) -> Self {
        Self {
            sizes: later.into_iter().collect(),
            current,
            waits: 0,
        }
    }
}

impl WindowHost for Host {
    fn framebuffer_size(&self) -> RenderSize {
        self.current
    }

    fn wait_for_event(&mut self) {
        self.waits += 1;
        if let Some(next) = self.sizes.pop_front() {
            self.current = next;
        }
    }
}

#[test]
fn ten_frames_cycle_slots_without_recreation() {
    let mut ops = Recorder::new(3);
    let mut host = Host::visible();
    let mut sync = FrameSynchronizer::new();
    let mut resize = false;

    let mut slots = Vec::new();
    for _ in 0..10 {
        slots.push(sync.current_frame());
        let outcome = sync.draw(&mut ops, &mut host, &mut resize).unwrap();
        assert!(matches!(
            outcome,
            FrameOutcome::Presented {
                recreated: false,
                ..
            }
        ));
    }

    assert_eq!(slots, [0, 1, 0, 1, 0, 1, 0, 1, 0, 1]);
    assert_eq!(ops.recreates(), 0);
    assert_eq!(sync.recreations(), 0);
    assert_eq!(ops.submits(), 10);
    assert_eq!(host.waits, 0);
}

#[test]
fn resize_before_third_frame_recreates_once_without_submitting() {
    let mut ops = Recorder::new(3);
    let mut host = Host::visible();
    let mut sync = FrameSynchronizer::new();
    let mut resize = false;

    for _ in 0..2 {
        sync.draw(&mut ops, &mut host, &mut resize).unwrap();
    }
    let submits_before = ops.submits();
    let calls_before = ops.calls.len();

    resize = true;
    let outcome = sync.draw(&mut ops, &mut host, &mut resize).unwrap();

    assert_eq!(outcome, FrameOutcome::Skipped);
    assert!(!resize, "flag is consumed");
    assert_eq!(ops.recreates(), 1);
    assert_eq!(ops.submits(), submits_before);
    let third = &ops.calls[calls_before..];
    assert!(!third.iter().any(|c| matches!(
        c,
        Call::Reset(_) | Call::Record(..) | Call::Submit(_) | Call::Present(..)
    )));
    assert_eq!(sync.current_frame(), 0);
}

#[test]
fn fence_wait_precedes_reset_of_the_same_slot() {
    let mut ops = Recorder::new(2);
    let mut host = Host::visible();
    let mut sync = FrameSynchronizer::new();
    let mut resize = false;

    ops.present_script = [
        PresentOutcome::Presented,
        PresentOutcome::Presented,
        PresentOutcome::Suboptimal,
    ]
    .into();
    for i in 0..12 {
        resize = i == 7;
        sync.draw(&mut ops, &mut host, &mut resize).unwrap();
    }

    // each reset is preceded by a wait on that slot with no reset between
    let mut waited = [false; FRAMES_IN_FLIGHT];
    let mut resets = 0;
    for call in &ops.calls {
        match *call {
            Call::Wait(s) => waited[s] = true,
            Call::Reset(s) => {
                assert!(waited[s], "slot {s} reset without a fence wait");
                waited[s] = false;
                resets += 1;
            }
            _ => {}
        }
    }
    assert_eq!(resets, ops.submits());
}

#[test]
fn out_of_date_acquire_skips_and_leaves_fence_alone() {
    let mut ops = Recorder::new(3);
    ops.acquire_script = [AcquireOutcome::OutOfDate].into();
    let mut host = Host::visible();
    let mut sync = FrameSynchronizer::new();
    let mut resize = false;

    let outcome = sync.draw(&mut ops, &mut host, &mut resize).unwrap();

    assert_eq!(outcome, FrameOutcome::Skipped);
    assert_eq!(
        ops.calls,
        [
            Call::Wait(0),
            Call::Acquire(0),
            Call::Recreate(DEFAULT_EXTENT)
        ]
    );
}

#[test]
fn suboptimal_acquire_still_renders() {
    let mut ops = Recorder::new(3);
    ops.acquire_script = [AcquireOutcome::Ready {
        image_index: 2,
        suboptimal: true,
    }]
    .into();
    let mut host = Host::visible();
    let mut sync = FrameSynchronizer::new();
    let mut resize = false;

    let outcome = sync.draw(&mut ops, &mut host, &mut resize).unwrap();
    assert_eq!(
        outcome,
        FrameOutcome::Presented {
            slot: 0,
            image_index: 2,
            recreated: false
        }
    );
    assert_eq!(sync.current_frame(), 1);
}

#[test]
fn suboptimal_present_submits_once_then_recreates() {
    let mut ops = Recorder::new(3);
    ops.present_script = [PresentOutcome::Presented, PresentOutcome::Suboptimal].into();
    let mut host = Host::visible();
    let mut sync = FrameSynchronizer::new();
    let mut resize = false;

    sync.draw(&mut ops, &mut host, &mut resize).unwrap();
    let start = ops.calls.len();
    let outcome = sync.draw(&mut ops, &mut host, &mut resize).unwrap();

    assert_eq!(
        outcome,
        FrameOutcome::Presented {
            slot: 1,
            image_index: 1,
            recreated: true
        }
    );
    assert_eq!(
        &ops.calls[start..],
        [
            Call::Wait(1),
            Call::Acquire(1),
            Call::Reset(1),
            Call::Record(1, 1),
            Call::Uniforms(1),
            Call::Submit(1),
            Call::Present(1, 1),
            Call::Recreate(DEFAULT_EXTENT),
        ]
    );
    assert_eq!(sync.current_frame(), 0);
}

#[test]
fn out_of_date_present_recreates_after_presenting() {
    let mut ops = Recorder::new(2);
    ops.present_script = [PresentOutcome::OutOfDate].into();
    let mut host = Host::visible();
    let mut sync = FrameSynchronizer::new();
    let mut resize = false;

    sync.draw(&mut ops, &mut host, &mut resize).unwrap();
    assert_eq!(ops.submits(), 1);
    assert_eq!(ops.recreates(), 1);
    assert!(matches!(ops.calls.last(), Some(Call::Recreate(_))));
}

#[test]
fn minimized_window_blocks_before_recreating() {
    let mut ops = Recorder::new(3);
    ops.acquire_script = [AcquireOutcome::OutOfDate].into();
    let mut host = Host::scripted(
        RenderSize::new(0, 0),
        [
            RenderSize::new(0, 0),
            RenderSize::new(0, 0),
            RenderSize::new(640, 480),
        ],
    );
    let mut sync = FrameSynchronizer::new();
    let mut resize = false;

    sync.draw(&mut ops, &mut host, &mut resize).unwrap();

    assert_eq!(host.waits, 3);
    assert_eq!(ops.calls.last(), Some(&Call::Recreate(RenderSize::new(640, 480))));
    assert_eq!(ops.recreates(), 1);
}

#[test]
fn back_to_back_recreations_do_not_leak() {
    let mut ops = Recorder::new(3);
    let mut host = Host::visible();
    let mut sync = FrameSynchronizer::new();

    ops.resized_image_counts = [2, 4].into();

    sync.recreate(&mut ops, &mut host).unwrap();
    assert_eq!(ops.live_objects(), 2 * 2 + 3 * FRAMES_IN_FLIGHT);
    sync.recreate(&mut ops, &mut host).unwrap();

    // only the newest set survives; both older sets were torn down in full
    assert_eq!(ops.live_objects(), 2 * 4 + 3 * FRAMES_IN_FLIGHT);
    assert_eq!(
        ops.destroyed,
        Recorder::objects_for(3) + Recorder::objects_for(2)
    );
    assert_eq!(sync.recreations(), 2);
    assert_eq!(sync.current_frame(), 0);
    assert_eq!(ops.image_count, 4);
}

#[test]
fn recreation_restarts_the_slot_cycle() {
    let mut ops = Recorder::new(3);
    let mut host = Host::visible();
    let mut sync = FrameSynchronizer::new();
    let mut resize = false;

    sync.draw(&mut ops, &mut host, &mut resize).unwrap();
    assert_eq!(sync.current_frame(), 1);
    resize = true;
    sync.draw(&mut ops, &mut host, &mut resize).unwrap();
    assert_eq!(sync.current_frame(), 0);

    let mut slots = Vec::new();
    for _ in 0..4 {
        slots.push(sync.current_frame());
        sync.draw(&mut ops, &mut host, &mut resize).unwrap();
    }
    assert_eq!(slots, [0, 1, 0, 1]);
}

#[test]
fn submit_failure_propagates_and_keeps_slot() {
    let mut ops = Recorder::new(3);
    ops.fail_submit = true;
    let mut host = Host::visible();
    let mut sync = FrameSynchronizer::new();
    let mut resize = false;

    let err = sync.draw(&mut ops, &mut host, &mut resize).unwrap_err();
    assert!(err.to_string().contains("device lost"));
    assert_eq!(sync.current_frame(), 0);
    assert_eq!(ops.recreates(), 0);
}
