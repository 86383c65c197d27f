//! Externally written texture meant to receive decoded video frames.
//!
//! The render thread owns the image; the host only ever sees its opaque id.
//! The per-eye draw does not sample it yet.

use std::path::Path;
use std::sync::Arc;

use ash::vk::Handle;
use tracing::{debug, info};
use vulkano::VulkanObject;
use vulkano::buffer::{Buffer, BufferCreateInfo, BufferUsage};
use vulkano::command_buffer::{
    AutoCommandBufferBuilder, CommandBufferUsage, CopyBufferToImageInfo, PrimaryCommandBufferAbstract,
};
use vulkano::format::Format;
use vulkano::image::{Image, ImageCreateInfo, ImageType, ImageUsage};
use vulkano::memory::allocator::{AllocationCreateInfo, MemoryTypeFilter};
use vulkano::sync::GpuFuture;

use crate::engine::graphics::GraphicsContext;
use crate::engine::{EngineError, EngineResult};

/// One decoded RGBA8 frame, rows top to bottom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl VideoFrame {
    pub fn validate(&self, width: u32, height: u32) -> EngineResult<()> {
        if self.width != width || self.height != height {
            return Err(EngineError::VideoFrame(format!(
                "frame is {}x{}, texture is {width}x{height}",
                self.width, self.height
            )));
        }

        let expected_len = width as usize * height as usize * 4;
        if self.rgba.len() != expected_len {
            return Err(EngineError::VideoFrame(format!(
                "rgba length mismatch: got={}, expected={expected_len}",
                self.rgba.len()
            )));
        }

        Ok(())
    }
}

/// Supplies decoded frames to the render thread.
pub trait VideoFrameSource: Send {
    /// `Ok(None)` when no new frame is available since the last call.
    fn next_frame(&mut self) -> EngineResult<Option<VideoFrame>>;
}

/// Decodes one PNG/JPEG file and hands it out once.
pub struct StillImageSource {
    pending: Option<VideoFrame>,
}

impl StillImageSource {
    /// Decode `path`, resized to `size` if it does not already match.
    pub fn open(path: &Path, size: [u32; 2]) -> EngineResult<Self> {
        let decoded = image::open(path)
            .map_err(|e| EngineError::VideoFrame(format!("{}: {e}", path.display())))?
            .to_rgba8();

        let decoded = if decoded.dimensions() == (size[0], size[1]) {
            decoded
        } else {
            debug!(
                "[VideoTexture] resizing {} from {:?} to {size:?}",
                path.display(),
                decoded.dimensions()
            );
            image::imageops::resize(&decoded, size[0], size[1], image::imageops::FilterType::Triangle)
        };

        let (width, height) = decoded.dimensions();
        Ok(Self::from_frame(VideoFrame {
            width,
            height,
            rgba: decoded.into_raw(),
        }))
    }

    pub fn from_frame(frame: VideoFrame) -> Self {
        Self {
            pending: Some(frame),
        }
    }
}

impl VideoFrameSource for StillImageSource {
    fn next_frame(&mut self) -> EngineResult<Option<VideoFrame>> {
        Ok(self.pending.take())
    }
}

pub struct VideoTexture {
    image: Arc<Image>,
    width: u32,
    height: u32,
}

impl VideoTexture {
    pub fn new(ctx: &GraphicsContext, width: u32, height: u32) -> Result<Self, Box<dyn std::error::Error>> {
        if width == 0 || height == 0 {
            return Err("video texture has zero size".into());
        }

        let image = Image::new(
            ctx.memory_allocator.clone(),
            ImageCreateInfo {
                image_type: ImageType::Dim2d,
                format: Format::R8G8B8A8_UNORM,
                extent: [width, height, 1],
                usage: ImageUsage::TRANSFER_DST | ImageUsage::SAMPLED,
                ..Default::default()
            },
            AllocationCreateInfo {
                memory_type_filter: MemoryTypeFilter::PREFER_DEVICE,
                ..Default::default()
            },
        )?;

        info!("[VideoTexture] {width}x{height} R8G8B8A8_UNORM ready");

        Ok(Self {
            image,
            width,
            height,
        })
    }

    /// Opaque id handed to the host. Never zero for a live texture.
    pub fn id(&self) -> u64 {
        self.image.handle().as_raw()
    }

    /// Staging copy into the texture; blocks until the copy has finished.
    pub fn upload_rgba8(&self, ctx: &GraphicsContext, frame: &VideoFrame) -> EngineResult<()> {
        frame.validate(self.width, self.height)?;
        self.copy_from_host(ctx, &frame.rgba).map_err(EngineError::vulkan)
    }

    fn copy_from_host(&self, ctx: &GraphicsContext, rgba: &[u8]) -> Result<(), Box<dyn std::error::Error>> {
        let staging = Buffer::from_iter(
            ctx.memory_allocator.clone(),
            BufferCreateInfo {
                usage: BufferUsage::TRANSFER_SRC,
                ..Default::default()
            },
            AllocationCreateInfo {
                memory_type_filter: MemoryTypeFilter::PREFER_HOST | MemoryTypeFilter::HOST_SEQUENTIAL_WRITE,
                ..Default::default()
            },
            rgba.iter().copied(),
        )?;

        let mut cbb = AutoCommandBufferBuilder::primary(
            ctx.command_buffer_allocator.clone(),
            ctx.queue_family_index(),
            CommandBufferUsage::OneTimeSubmit,
        )?;
        cbb.copy_buffer_to_image(CopyBufferToImageInfo::buffer_image(staging, self.image.clone()))?;
        let cb = cbb.build()?;

        cb.execute(ctx.queue.clone())?
            .then_signal_fence_and_flush()?
            .wait(None)?;

        Ok(())
    }
}
