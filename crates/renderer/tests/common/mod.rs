//! A scripted GPU that records every call the frame orchestrator makes.
//!
//! Fences model an asynchronous GPU: submitting does not signal them, a
//! driver wait does. Waits on a fence already flagged signaled are logged as
//! non-blocking so tests can tell the two apart.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use framepace_renderer::{
    AcquireOutcome, Context, Extent, FrameFence, FrameGpu, GlobalUniform, PresentOutcome,
    RendererResult, TargetInfo,
};
use framepace_rhi::swapchain::{determine_image_count, max_frames_in_flight};
use framepace_rhi::vk;
use glam::Mat4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    CreateFence { fence: usize, signaled: bool },
    CreateSemaphore(usize),
    Build { width: u32, height: u32 },
    Acquire { semaphore: usize },
    FenceWait { fence: usize, blocked: bool },
    FenceReset(usize),
    BeginRecording(u32),
    EndRecording(u32),
    Global(u32),
    Object(u32),
    Submit { image: u32, wait: usize, signal: usize, fence: usize },
    Present { image: u32, semaphore: usize },
    WaitIdle,
    Release,
    DropFence(usize),
    DropSemaphore(usize),
}

/// Driver behaviour the test scripts ahead of time.
#[derive(Debug, Default)]
pub struct Script {
    /// Surface (min, max) image counts returned by successive builds; the
    /// last one sticks.
    pub image_limits: VecDeque<(u32, u32)>,
    /// 1-based acquire calls that report a stale surface.
    pub stale_acquires: Vec<u64>,
    /// 1-based acquire calls that time out.
    pub timed_out_acquires: Vec<u64>,
    /// 1-based present calls that report a stale surface.
    pub stale_presents: Vec<u64>,
    /// Number of upcoming blocking fence waits that time out.
    pub fence_timeouts: u32,
}

#[derive(Debug, Default)]
pub struct MockState {
    pub log: Vec<Call>,
    pub script: Script,
    limits: (u32, u32),
    next_fence: usize,
    next_semaphore: usize,
    acquires: u64,
    presents: u64,
    next_image: u32,
    pub image_count: u32,
    pub extent: Extent,
    /// Rebuilds of the image array; the chain itself is never replaced.
    pub image_generation: u32,
}

pub type Shared = Rc<RefCell<MockState>>;

pub struct MockFence {
    pub id: usize,
    signaled: bool,
    state: Shared,
}

impl FrameFence for MockFence {
    fn wait(&mut self, _timeout_ns: u64) -> RendererResult<bool> {
        let mut state = self.state.borrow_mut();
        if self.signaled {
            state.log.push(Call::FenceWait {
                fence: self.id,
                blocked: false,
            });
            return Ok(true);
        }

        state.log.push(Call::FenceWait {
            fence: self.id,
            blocked: true,
        });
        if state.script.fence_timeouts > 0 {
            state.script.fence_timeouts -= 1;
            return Ok(false);
        }
        self.signaled = true;
        Ok(true)
    }

    fn reset(&mut self) -> RendererResult<()> {
        self.state.borrow_mut().log.push(Call::FenceReset(self.id));
        self.signaled = false;
        Ok(())
    }

    fn is_signaled(&self) -> bool {
        self.signaled
    }
}

impl Drop for MockFence {
    fn drop(&mut self) {
        self.state.borrow_mut().log.push(Call::DropFence(self.id));
    }
}

pub struct MockSemaphore {
    pub id: usize,
    state: Shared,
}

impl Drop for MockSemaphore {
    fn drop(&mut self) {
        self.state.borrow_mut().log.push(Call::DropSemaphore(self.id));
    }
}

pub struct MockGpu {
    state: Shared,
}

impl MockGpu {
    /// A GPU whose surface reports `min`..=`max` images, plus the shared
    /// state to inspect and script it.
    pub fn new(min: u32, max: u32) -> (Self, Shared) {
        let state = Rc::new(RefCell::new(MockState {
            limits: (min, max),
            ..MockState::default()
        }));
        (
            Self {
                state: state.clone(),
            },
            state,
        )
    }

    fn log(&self, call: Call) {
        self.state.borrow_mut().log.push(call);
    }
}

impl FrameGpu for MockGpu {
    type Fence = MockFence;
    type Semaphore = MockSemaphore;

    fn create_fence(&mut self, signaled: bool) -> RendererResult<MockFence> {
        let mut state = self.state.borrow_mut();
        let id = state.next_fence;
        state.next_fence += 1;
        state.log.push(Call::CreateFence {
            fence: id,
            signaled,
        });
        Ok(MockFence {
            id,
            signaled,
            state: self.state.clone(),
        })
    }

    fn create_semaphore(&mut self) -> RendererResult<MockSemaphore> {
        let mut state = self.state.borrow_mut();
        let id = state.next_semaphore;
        state.next_semaphore += 1;
        state.log.push(Call::CreateSemaphore(id));
        Ok(MockSemaphore {
            id,
            state: self.state.clone(),
        })
    }

    fn build_targets(&mut self, width: u32, height: u32) -> RendererResult<TargetInfo> {
        let mut state = self.state.borrow_mut();
        if let Some(limits) = state.script.image_limits.pop_front() {
            state.limits = limits;
        }

        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: state.limits.0,
            max_image_count: state.limits.1,
            ..Default::default()
        };
        let image_count = determine_image_count(&capabilities);

        state.log.push(Call::Build { width, height });
        state.image_count = image_count;
        state.extent = Extent::new(width, height);
        state.next_image = 0;
        state.image_generation += 1;

        Ok(TargetInfo {
            image_count,
            max_frames_in_flight: max_frames_in_flight(image_count),
            extent: state.extent,
        })
    }

    fn acquire_next_image(
        &mut self,
        signal: &MockSemaphore,
        _timeout_ns: u64,
    ) -> RendererResult<AcquireOutcome> {
        let mut state = self.state.borrow_mut();
        state.acquires += 1;
        state.log.push(Call::Acquire {
            semaphore: signal.id,
        });

        let call = state.acquires;
        if state.script.stale_acquires.contains(&call) {
            return Ok(AcquireOutcome::Stale);
        }
        if state.script.timed_out_acquires.contains(&call) {
            return Ok(AcquireOutcome::TimedOut);
        }

        let image = state.next_image;
        state.next_image = (image + 1) % state.image_count;
        Ok(AcquireOutcome::Acquired(image))
    }

    fn present(&mut self, image: u32, wait: &MockSemaphore) -> RendererResult<PresentOutcome> {
        let mut state = self.state.borrow_mut();
        state.presents += 1;
        state.log.push(Call::Present {
            image,
            semaphore: wait.id,
        });

        let call = state.presents;
        if state.script.stale_presents.contains(&call) {
            Ok(PresentOutcome::Stale)
        } else {
            Ok(PresentOutcome::Presented)
        }
    }

    fn begin_recording(&mut self, image: u32, _extent: Extent) -> RendererResult<()> {
        self.log(Call::BeginRecording(image));
        Ok(())
    }

    fn end_recording(&mut self, image: u32) -> RendererResult<()> {
        self.log(Call::EndRecording(image));
        Ok(())
    }

    fn update_global_state(&mut self, image: u32, _uniform: &GlobalUniform) -> RendererResult<()> {
        self.log(Call::Global(image));
        Ok(())
    }

    fn update_object(&mut self, image: u32, _model: Mat4) -> RendererResult<()> {
        self.log(Call::Object(image));
        Ok(())
    }

    fn submit(
        &mut self,
        image: u32,
        wait: &MockSemaphore,
        signal: &MockSemaphore,
        fence: &mut MockFence,
    ) -> RendererResult<()> {
        self.log(Call::Submit {
            image,
            wait: wait.id,
            signal: signal.id,
            fence: fence.id,
        });
        Ok(())
    }

    fn wait_idle(&mut self) -> RendererResult<()> {
        self.log(Call::WaitIdle);
        Ok(())
    }

    fn release(&mut self) {
        self.log(Call::Release);
    }
}

/// A context over a mock surface reporting `min`..=`max` images, initialized
/// at `width`x`height`.
pub fn context(min: u32, max: u32, width: u32, height: u32) -> (Context<MockGpu>, Shared) {
    let (gpu, state) = MockGpu::new(min, max);
    let mut context = Context::new(gpu, u64::MAX);
    context
        .initialize(width, height)
        .expect("mock initialization cannot fail");
    (context, state)
}

/// Runs one full frame, asserting it was not skipped.
pub fn run_frame(context: &mut Context<MockGpu>) {
    let status = context.begin_frame(0.016).expect("begin_frame failed");
    assert_eq!(status, framepace_renderer::FrameStatus::Proceed);
    context.update_object(Mat4::IDENTITY).expect("update_object failed");
    context.end_frame(0.016).expect("end_frame failed");
}

/// Log entries recorded from `from` onwards.
pub fn log_since(state: &Shared, from: usize) -> Vec<Call> {
    state.borrow().log[from..].to_vec()
}

pub fn log_len(state: &Shared) -> usize {
    state.borrow().log.len()
}

pub fn builds(state: &Shared) -> Vec<(u32, u32)> {
    state
        .borrow()
        .log
        .iter()
        .filter_map(|call| match call {
            Call::Build { width, height } => Some((*width, *height)),
            _ => None,
        })
        .collect()
}
