//! XR runtime boundary: the data the core exchanges with the runtime and the
//! seam traits the frame loop drives.
//!
//! `OpenXrRuntime` is the production implementation. Everything above this
//! module only sees `XrRuntime`/`SwapchainImages`.

#[cfg(test)]
pub mod fake;
pub mod openxr_runtime;
pub mod session_state;
pub mod swapchain;

pub use openxr_runtime::{OpenXrRuntime, OpenXrSwapchain, XrBootstrap};
pub use session_state::{SessionAction, SessionState, SessionStateMachine};
pub use swapchain::{SwapchainManager, SwapchainSpec};

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::EngineResult;

/// Head-mounted stereo: one view per eye.
pub const STEREO_VIEW_COUNT: usize = 2;

/// Position (meters) + orientation (unit quaternion, xyzw).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: [f32; 3],
    pub orientation: [f32; 4],
}

impl Pose {
    pub const IDENTITY: Self = Self {
        position: [0.0; 3],
        orientation: [0.0, 0.0, 0.0, 1.0],
    };
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Four half-angles in radians. `angle_left` and `angle_down` are negative
/// for a frustum centered on the view direction.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Fov {
    pub angle_left: f32,
    pub angle_right: f32,
    pub angle_up: f32,
    pub angle_down: f32,
}

/// One eye's located view for a given display time.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct View {
    pub pose: Pose,
    pub fov: Fov,
}

/// Per-eye recommended image size, fixed for the session's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewConfiguration {
    pub recommended_width: u32,
    pub recommended_height: u32,
    pub recommended_sample_count: u32,
}

/// Output of the frame-timing call. Consumed immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameState {
    /// Runtime clock, nanoseconds.
    pub predicted_display_time: i64,
    pub should_render: bool,
}

/// Pixel sub-rectangle of a swapchain image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EyeRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnvironmentBlend {
    #[default]
    Opaque,
}

/// Named coordinate frame content poses are expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceSpaceKind {
    /// Head-locked.
    #[default]
    View,
    Local,
    Stage,
}

/// One eye's entry in the projection layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectionView {
    pub eye: usize,
    pub pose: Pose,
    pub fov: Fov,
    pub image_rect: EyeRect,
}

/// The single projection layer submitted per rendered frame.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProjectionLayer {
    pub views: Vec<ProjectionView>,
}

/// Events the core consumes from the runtime's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeEvent {
    SessionStateChanged(SessionState),
    InstanceLossPending,
    EventsLost(u32),
    /// Anything else the runtime reports; drained and ignored.
    Other,
}

/// Per-eye presentable image ring.
///
/// Ordering contract per frame: `acquire_image` -> `wait_image` -> render ->
/// `release_image`. `SwapchainManager` enforces it; implementations only
/// forward to the runtime.
pub trait SwapchainImages {
    /// Opaque GPU image handles, indexed by the value `acquire_image` returns.
    fn enumerate_images(&self) -> EngineResult<Vec<u64>>;
    fn acquire_image(&mut self) -> EngineResult<u32>;
    /// `None` waits without bound.
    fn wait_image(&mut self, timeout: Option<Duration>) -> EngineResult<()>;
    fn release_image(&mut self) -> EngineResult<()>;
}

/// Every runtime call the core makes.
pub trait XrRuntime {
    type Swapchain: SwapchainImages;

    fn view_configurations(&self) -> &[ViewConfiguration];

    /// Non-blocking. `Ok(None)` means the queue is empty.
    fn poll_event(&mut self) -> EngineResult<Option<RuntimeEvent>>;

    /// Declares the stereo view configuration.
    fn begin_session(&mut self) -> EngineResult<()>;
    fn end_session(&mut self) -> EngineResult<()>;

    /// Blocks until the runtime paces the next frame. No timeout.
    fn wait_frame(&mut self) -> EngineResult<FrameState>;
    fn begin_frame(&mut self) -> EngineResult<()>;
    fn locate_views(&mut self, display_time: i64) -> EngineResult<Vec<View>>;

    /// `layer == None` submits an empty layer list.
    fn end_frame(
        &mut self,
        display_time: i64,
        blend: EnvironmentBlend,
        layer: Option<&ProjectionLayer>,
        swapchains: &SwapchainManager<Self::Swapchain>,
    ) -> EngineResult<()>;

    fn supported_swapchain_formats(&self) -> EngineResult<Vec<u32>>;
    fn create_swapchain(&mut self, spec: &SwapchainSpec) -> EngineResult<Self::Swapchain>;
}
