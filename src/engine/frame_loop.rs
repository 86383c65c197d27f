//! The per-frame control flow of the render thread.
//!
//! One `tick` is one loop iteration: drain runtime events, then either back
//! off (no running session) or run exactly one begin/end frame pair. A frame
//! is never left open: every path that got past `begin_frame` reaches
//! `end_frame`, with an empty layer list when nothing valid was rendered.
//!
//! A failed frame call costs that frame only. Session or instance loss is
//! the one frame error that ends the loop.

use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use crate::engine::camera::StereoCamera;
use crate::engine::config::EngineConfig;
use crate::engine::frame_timing::FrameTiming;
use crate::engine::graphics::{EyeRenderer, EyeTarget};
use crate::engine::xr::{
    EnvironmentBlend, ProjectionLayer, ProjectionView, RuntimeEvent, SessionAction, SessionState,
    SessionStateMachine, SwapchainManager, XrRuntime,
};
use crate::engine::{EngineError, EngineResult};

/// What one iteration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStep {
    /// The session asked the loop to terminate.
    Exit,
    /// No running session; slept the backoff.
    Idle,
    /// Runtime said not to render; empty frame submitted.
    Skipped,
    /// Both eyes rendered and the projection layer submitted.
    Rendered,
    /// Something failed after `begin_frame`; empty frame submitted.
    Dropped,
}

pub struct FrameLoop<'a, R: XrRuntime, G: EyeRenderer> {
    runtime: &'a mut R,
    swapchains: &'a mut SwapchainManager<R::Swapchain>,
    renderer: &'a mut G,
    session: SessionStateMachine,
    camera: StereoCamera,
    idle_backoff: Duration,
    image_wait_timeout: Option<Duration>,
    timing: FrameTiming,
    stats_interval: u64,
}

impl<'a, R: XrRuntime, G: EyeRenderer> FrameLoop<'a, R, G> {
    pub fn new(
        runtime: &'a mut R,
        swapchains: &'a mut SwapchainManager<R::Swapchain>,
        renderer: &'a mut G,
        config: &EngineConfig,
    ) -> Self {
        Self {
            runtime,
            swapchains,
            renderer,
            session: SessionStateMachine::new(),
            camera: config.camera(),
            idle_backoff: config.idle_backoff(),
            image_wait_timeout: config.image_wait_timeout(),
            timing: FrameTiming::new(1000, config.frame_budget_ms),
            stats_interval: config.stats_interval,
        }
    }

    /// Loop until the session exits or `stop` returns true. `stop` is only
    /// consulted between frames.
    pub fn run(&mut self, mut stop: impl FnMut() -> bool) -> EngineResult<()> {
        info!("[FrameLoop] started");
        loop {
            if stop() {
                info!("[FrameLoop] stop requested");
                break;
            }
            if self.tick()? == LoopStep::Exit {
                info!("[FrameLoop] session exiting");
                break;
            }
        }
        if self.timing.total_frames > 0 {
            info!("[FrameTiming] {}", self.timing.stats());
        }
        Ok(())
    }

    pub fn tick(&mut self) -> EngineResult<LoopStep> {
        self.drain_events()?;

        if self.session.should_exit() {
            return Ok(LoopStep::Exit);
        }

        if !self.session.is_running() {
            if !self.idle_backoff.is_zero() {
                thread::sleep(self.idle_backoff);
            }
            return Ok(LoopStep::Idle);
        }

        let wait_start = Instant::now();
        let frame = match self.runtime.wait_frame() {
            Ok(frame) => frame,
            Err(e) => return self.frame_call_failed("wait_frame", e),
        };
        if let Err(e) = self.runtime.begin_frame() {
            return self.frame_call_failed("begin_frame", e);
        }
        let wait = wait_start.elapsed();
        let display_time = frame.predicted_display_time;

        if !frame.should_render {
            trace!("[FrameLoop] skip frame at {display_time}");
            if let Err(e) = self
                .runtime
                .end_frame(display_time, EnvironmentBlend::Opaque, None, &*self.swapchains)
            {
                return self.frame_call_failed("end_frame", e);
            }
            return Ok(LoopStep::Skipped);
        }

        let render_start = Instant::now();
        let rendered = self.render_views(display_time);
        let render = render_start.elapsed();

        let submit_start = Instant::now();
        let (layer, mut step) = match &rendered {
            Ok(layer) => (Some(layer), LoopStep::Rendered),
            Err(e) => {
                warn!("[FrameLoop] dropping frame at {display_time}: {e}");
                (None, LoopStep::Dropped)
            }
        };
        if let Err(e) = self
            .runtime
            .end_frame(display_time, EnvironmentBlend::Opaque, layer, &*self.swapchains)
        {
            if e.is_session_lost() {
                return Err(e);
            }
            warn!("[FrameLoop] end_frame failed at {display_time}: {e}");
            step = LoopStep::Dropped;
        }
        if step == LoopStep::Dropped {
            self.timing.record_dropped();
        }
        self.timing.record(wait, render, submit_start.elapsed());

        if self.stats_interval > 0 && self.timing.total_frames % self.stats_interval == 0 {
            debug!("[FrameTiming] {}", self.timing.stats());
        }

        Ok(step)
    }

    fn frame_call_failed(&mut self, call: &str, e: EngineError) -> EngineResult<LoopStep> {
        if e.is_session_lost() {
            return Err(e);
        }
        warn!("[FrameLoop] {call} failed, dropping frame: {e}");
        self.timing.record_dropped();
        Ok(LoopStep::Dropped)
    }

    /// Poll until the queue is empty.
    fn drain_events(&mut self) -> EngineResult<()> {
        while let Some(event) = self.runtime.poll_event()? {
            match event {
                RuntimeEvent::SessionStateChanged(state) => self.on_state_changed(state)?,
                RuntimeEvent::InstanceLossPending => self.session.instance_loss_pending(),
                RuntimeEvent::EventsLost(count) => warn!("[FrameLoop] runtime lost {count} events"),
                RuntimeEvent::Other => trace!("[FrameLoop] ignored runtime event"),
            }
        }
        Ok(())
    }

    fn on_state_changed(&mut self, state: SessionState) -> EngineResult<()> {
        let action = match self.session.observe(state) {
            Ok(action) => action,
            // Already logged by the state machine; the recorded state is unchanged.
            Err(EngineError::InvalidTransition { .. }) => return Ok(()),
            Err(e) => return Err(e),
        };

        match action {
            SessionAction::Begin => match self.runtime.begin_session() {
                Ok(()) => self.session.set_running(true),
                Err(e) if e.is_session_lost() => return Err(e),
                // Stays idle until the runtime moves the session on.
                Err(e) => warn!("[FrameLoop] begin_session failed: {e}"),
            },
            SessionAction::End => {
                if let Err(e) = self.runtime.end_session() {
                    warn!("[FrameLoop] end_session failed: {e}");
                }
                self.session.set_running(false);
            }
            SessionAction::Exit | SessionAction::None => {}
        }
        Ok(())
    }

    /// Locate views and draw every eye. Every eye is attempted even after a
    /// failure so each acquired image goes back to the runtime; the first
    /// error is returned and the caller submits nothing.
    fn render_views(&mut self, display_time: i64) -> EngineResult<ProjectionLayer> {
        let views = self.runtime.locate_views(display_time)?;
        if views.len() != self.swapchains.len() {
            return Err(EngineError::ViewCountMismatch {
                expected: self.swapchains.len(),
                actual: views.len(),
            });
        }

        if let Err(e) = self.renderer.prepare_frame() {
            warn!("[FrameLoop] prepare_frame failed: {e}");
        }

        let timeout = self.image_wait_timeout;
        let mut layer = ProjectionLayer {
            views: Vec::with_capacity(views.len()),
        };
        let mut first_error = None;

        for (eye, view) in views.iter().enumerate() {
            let mvp = self.camera.eye_mvp(view);
            let renderer = &mut *self.renderer;

            let drawn = self.swapchains.render_into(eye, timeout, |image_index, rect| {
                renderer.render_eye(&EyeTarget {
                    eye,
                    image_index,
                    rect,
                    mvp,
                })
            });

            match drawn.and_then(|()| self.swapchains.image_rect(eye)) {
                Ok(image_rect) => layer.views.push(ProjectionView {
                    eye,
                    pose: view.pose,
                    fov: view.fov,
                    image_rect,
                }),
                Err(e) => {
                    warn!("[FrameLoop] eye {eye}: {e}");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(layer),
        }
    }
}
