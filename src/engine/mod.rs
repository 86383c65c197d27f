pub mod camera;
pub mod cli;
pub mod config;
pub mod frame_loop;
pub mod frame_timing;
pub mod graphics;
pub mod host;
pub mod math;
pub mod windowing;
pub mod xr;

pub use config::EngineConfig;
pub use host::Engine;
pub use windowing::Windowing;

use thiserror::Error;

use crate::engine::xr::{EyeRect, SessionState};

/// Startup step a fatal-init error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStage {
    Loader,
    Instance,
    System,
    GraphicsRequirements,
    GraphicsContext,
    Session,
    ReferenceSpace,
    Swapchains,
    SceneResources,
}

impl InitStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Loader => "runtime loader",
            Self::Instance => "instance creation",
            Self::System => "system query",
            Self::GraphicsRequirements => "graphics requirements query",
            Self::GraphicsContext => "graphics context creation",
            Self::Session => "session creation",
            Self::ReferenceSpace => "reference space creation",
            Self::Swapchains => "swapchain creation",
            Self::SceneResources => "scene resource setup",
        }
    }
}

impl std::fmt::Display for InitStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine-level error type.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Startup failed; the render thread never enters the frame loop.
    #[error("{stage} failed: {reason}")]
    Init { stage: InitStage, reason: String },

    #[error("OpenXR call failed: {0}")]
    Xr(#[from] openxr::sys::Result),

    #[error("vulkan: {0}")]
    Vulkan(String),

    #[error("session transition {from:?} -> {to:?} is not allowed")]
    InvalidTransition { from: SessionState, to: SessionState },

    #[error("swapchain for eye {eye} already has image {index} acquired")]
    ImageAlreadyAcquired { eye: usize, index: u32 },

    #[error("swapchain for eye {eye} has no acquired image")]
    NoImageAcquired { eye: usize },

    #[error("no swapchain for eye {0}")]
    UnknownEye(usize),

    #[error("image rect {0:?} exceeds the runtime's signed extent")]
    RectOutOfRange(EyeRect),

    #[error("runtime located {actual} views, expected {expected}")]
    ViewCountMismatch { expected: usize, actual: usize },

    #[error("config: {0}")]
    Config(String),

    #[error("video frame: {0}")]
    VideoFrame(String),

    #[error("windowing: {0}")]
    Windowing(String),

    #[error("render thread panicked")]
    RenderThreadPanicked,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn init(stage: InitStage, reason: impl std::fmt::Display) -> Self {
        Self::Init {
            stage,
            reason: reason.to_string(),
        }
    }

    pub fn vulkan(reason: impl std::fmt::Display) -> Self {
        Self::Vulkan(reason.to_string())
    }

    /// The runtime has lost the session or instance; nothing more can be
    /// submitted on it.
    pub fn is_session_lost(&self) -> bool {
        matches!(
            self,
            Self::Xr(openxr::sys::Result::ERROR_SESSION_LOST | openxr::sys::Result::ERROR_INSTANCE_LOST)
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
