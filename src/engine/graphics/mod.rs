pub mod context;
pub mod mesh;
pub mod video_texture;
pub mod vulkano_renderer;

pub use context::GraphicsContext;
pub use mesh::{CpuMesh, CpuVertex, MeshFactory};
pub use video_texture::{StillImageSource, VideoFrame, VideoFrameSource, VideoTexture};
pub use vulkano_renderer::VulkanoEyeRenderer;

use crate::engine::EngineResult;
use crate::engine::math::Mat4;
use crate::engine::xr::EyeRect;

/// Where and how one eye is drawn this frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeTarget {
    pub eye: usize,
    /// Index returned by the eye's swapchain acquire.
    pub image_index: u32,
    pub rect: EyeRect,
    pub mvp: Mat4,
}

/// GPU side of the per-eye draw.
///
/// `render_eye` is only ever called between the eye's image wait and release,
/// and must not return before the GPU has finished writing the image.
pub trait EyeRenderer {
    /// Once per rendered frame, before any eye.
    fn prepare_frame(&mut self) -> EngineResult<()> {
        Ok(())
    }

    /// Bind the image as render target, set viewport/scissor to `rect`, clear,
    /// draw the content plane with `mvp`.
    fn render_eye(&mut self, target: &EyeTarget) -> EngineResult<()>;
}
