//! Scripted in-memory runtime for driving the core without a headset.

use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use crate::engine::xr::swapchain::{COLOR_FORMAT, SwapchainManager, SwapchainSpec};
use crate::engine::xr::{
    EnvironmentBlend, Fov, FrameState, Pose, ProjectionLayer, RuntimeEvent, SessionState, SwapchainImages, View,
    ViewConfiguration, XrRuntime,
};
use crate::engine::{EngineError, EngineResult};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    BeginSession,
    EndSession,
    WaitFrame,
    BeginFrame,
    LocateViews,
    /// `layers` is 0 for an empty layer list, otherwise the projection view count.
    EndFrame { layers: usize },
    CreateSwapchain(usize),
    Acquire(usize),
    Wait(usize),
    Release(usize),
    /// The swapchain handle for this eye was dropped.
    Destroy(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub display_time: i64,
    pub blend: EnvironmentBlend,
    pub layer: Option<ProjectionLayer>,
}

type Log = Rc<RefCell<Vec<Call>>>;

fn fault(what: &str, eye: usize) -> EngineError {
    tracing::debug!("[FakeRuntime] injected {what} failure on eye {eye}");
    EngineError::Xr(openxr::sys::Result::ERROR_RUNTIME_FAILURE)
}

pub struct FakeSwapchain {
    eye: usize,
    images: usize,
    next: u32,
    fail_acquire: bool,
    fail_wait: bool,
    log: Log,
}

impl Drop for FakeSwapchain {
    fn drop(&mut self) {
        self.log.borrow_mut().push(Call::Destroy(self.eye));
    }
}

impl SwapchainImages for FakeSwapchain {
    fn enumerate_images(&self) -> EngineResult<Vec<u64>> {
        Ok((0..self.images as u64).map(|i| 0x1000 + (self.eye as u64) * 0x100 + i).collect())
    }

    fn acquire_image(&mut self) -> EngineResult<u32> {
        self.log.borrow_mut().push(Call::Acquire(self.eye));
        if self.fail_acquire {
            return Err(fault("acquire", self.eye));
        }
        let index = self.next;
        self.next = (self.next + 1) % self.images as u32;
        Ok(index)
    }

    fn wait_image(&mut self, _timeout: Option<Duration>) -> EngineResult<()> {
        self.log.borrow_mut().push(Call::Wait(self.eye));
        if self.fail_wait {
            return Err(fault("wait", self.eye));
        }
        Ok(())
    }

    fn release_image(&mut self) -> EngineResult<()> {
        self.log.borrow_mut().push(Call::Release(self.eye));
        Ok(())
    }
}

/// Events and frame states are consumed front to back. Once the frame
/// script is empty every frame should render.
pub struct FakeRuntime {
    log: Log,
    events: VecDeque<RuntimeEvent>,
    frames: VecDeque<bool>,
    clock: i64,
    view_configs: Vec<ViewConfiguration>,
    views: Vec<View>,
    formats: Vec<u32>,
    created: Vec<SwapchainSpec>,
    failing_swapchain: HashSet<usize>,
    failing_acquire: HashSet<usize>,
    failing_wait: HashSet<usize>,
    fail_locate: bool,
    wait_frame_errors: VecDeque<openxr::sys::Result>,
    begin_frame_errors: VecDeque<openxr::sys::Result>,
    end_frame_errors: VecDeque<openxr::sys::Result>,
    begin_session_errors: VecDeque<openxr::sys::Result>,
    frame_open: bool,
    pub submissions: Vec<Submission>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        let eye_view = |x: f32| View {
            pose: Pose {
                position: [x, 0.0, 0.0],
                orientation: [0.0, 0.0, 0.0, 1.0],
            },
            fov: Fov {
                angle_left: -0.8,
                angle_right: 0.8,
                angle_up: 0.8,
                angle_down: -0.8,
            },
        };

        Self {
            log: Rc::new(RefCell::new(Vec::new())),
            events: VecDeque::new(),
            frames: VecDeque::new(),
            clock: 1_000_000,
            view_configs: vec![
                ViewConfiguration {
                    recommended_width: 64,
                    recommended_height: 48,
                    recommended_sample_count: 1,
                };
                2
            ],
            views: vec![eye_view(-0.032), eye_view(0.032)],
            formats: vec![COLOR_FORMAT],
            created: Vec::new(),
            failing_swapchain: HashSet::new(),
            failing_acquire: HashSet::new(),
            failing_wait: HashSet::new(),
            fail_locate: false,
            wait_frame_errors: VecDeque::new(),
            begin_frame_errors: VecDeque::new(),
            end_frame_errors: VecDeque::new(),
            begin_session_errors: VecDeque::new(),
            frame_open: false,
            submissions: Vec::new(),
        }
    }

    pub fn push_event(&mut self, event: RuntimeEvent) {
        self.events.push_back(event);
    }

    pub fn push_states(&mut self, states: &[SessionState]) {
        for &s in states {
            self.push_event(RuntimeEvent::SessionStateChanged(s));
        }
    }

    pub fn push_frames(&mut self, should_render: bool, count: usize) {
        self.frames.extend(std::iter::repeat_n(should_render, count));
    }

    pub fn set_views(&mut self, views: Vec<View>) {
        self.views = views;
    }

    pub fn set_formats(&mut self, formats: Vec<u32>) {
        self.formats = formats;
    }

    pub fn fail_swapchain_for_eye(&mut self, eye: usize) {
        self.failing_swapchain.insert(eye);
    }

    pub fn fail_acquire_for_eye(&mut self, eye: usize) {
        self.failing_acquire.insert(eye);
    }

    pub fn fail_wait_for_eye(&mut self, eye: usize) {
        self.failing_wait.insert(eye);
    }

    pub fn fail_locate(&mut self) {
        self.fail_locate = true;
    }

    /// The next `wait_frame` returns `result`.
    pub fn fail_next_wait_frame(&mut self, result: openxr::sys::Result) {
        self.wait_frame_errors.push_back(result);
    }

    /// The next `begin_frame` returns `result` without opening a frame.
    pub fn fail_next_begin_frame(&mut self, result: openxr::sys::Result) {
        self.begin_frame_errors.push_back(result);
    }

    /// The next `end_frame` returns `result`. The frame still counts as closed.
    pub fn fail_next_end_frame(&mut self, result: openxr::sys::Result) {
        self.end_frame_errors.push_back(result);
    }

    pub fn fail_next_begin_session(&mut self, result: openxr::sys::Result) {
        self.begin_session_errors.push_back(result);
    }

    pub fn created_specs(&self) -> &[SwapchainSpec] {
        &self.created
    }

    pub fn calls(&self) -> Vec<Call> {
        self.log.borrow().clone()
    }

    pub fn clear_calls(&mut self) {
        self.log.borrow_mut().clear();
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.log.borrow().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: Call) {
        self.log.borrow_mut().push(call);
    }
}

impl XrRuntime for FakeRuntime {
    type Swapchain = FakeSwapchain;

    fn view_configurations(&self) -> &[ViewConfiguration] {
        &self.view_configs
    }

    fn poll_event(&mut self) -> EngineResult<Option<RuntimeEvent>> {
        Ok(self.events.pop_front())
    }

    fn begin_session(&mut self) -> EngineResult<()> {
        self.record(Call::BeginSession);
        match self.begin_session_errors.pop_front() {
            Some(result) => Err(EngineError::Xr(result)),
            None => Ok(()),
        }
    }

    fn end_session(&mut self) -> EngineResult<()> {
        self.record(Call::EndSession);
        Ok(())
    }

    fn wait_frame(&mut self) -> EngineResult<FrameState> {
        self.record(Call::WaitFrame);
        if let Some(result) = self.wait_frame_errors.pop_front() {
            return Err(EngineError::Xr(result));
        }
        self.clock += 11_111_111;
        Ok(FrameState {
            predicted_display_time: self.clock,
            should_render: self.frames.pop_front().unwrap_or(true),
        })
    }

    fn begin_frame(&mut self) -> EngineResult<()> {
        assert!(!self.frame_open, "begin_frame while a frame is open");
        self.record(Call::BeginFrame);
        if let Some(result) = self.begin_frame_errors.pop_front() {
            return Err(EngineError::Xr(result));
        }
        self.frame_open = true;
        Ok(())
    }

    fn locate_views(&mut self, _display_time: i64) -> EngineResult<Vec<View>> {
        assert!(self.frame_open, "locate_views outside a frame");
        self.record(Call::LocateViews);
        if self.fail_locate {
            return Err(EngineError::Xr(openxr::sys::Result::ERROR_TIME_INVALID));
        }
        Ok(self.views.clone())
    }

    fn end_frame(
        &mut self,
        display_time: i64,
        blend: EnvironmentBlend,
        layer: Option<&ProjectionLayer>,
        _swapchains: &SwapchainManager<FakeSwapchain>,
    ) -> EngineResult<()> {
        assert!(self.frame_open, "end_frame without begin_frame");
        self.frame_open = false;
        self.record(Call::EndFrame {
            layers: layer.map_or(0, |l| l.views.len()),
        });
        if let Some(result) = self.end_frame_errors.pop_front() {
            return Err(EngineError::Xr(result));
        }
        self.submissions.push(Submission {
            display_time,
            blend,
            layer: layer.cloned(),
        });
        Ok(())
    }

    fn supported_swapchain_formats(&self) -> EngineResult<Vec<u32>> {
        Ok(self.formats.clone())
    }

    fn create_swapchain(&mut self, spec: &SwapchainSpec) -> EngineResult<FakeSwapchain> {
        let eye = self.created.len();
        self.record(Call::CreateSwapchain(eye));
        if self.failing_swapchain.contains(&eye) {
            return Err(fault("create_swapchain", eye));
        }
        self.created.push(*spec);

        Ok(FakeSwapchain {
            eye,
            images: 3,
            next: 0,
            fail_acquire: self.failing_acquire.contains(&eye),
            fail_wait: self.failing_wait.contains(&eye),
            log: self.log.clone(),
        })
    }
}
