//! Per-eye presentable image rings and the acquire/wait/release protocol.
//!
//! Contract:
//! - One ring per eye, sized to that eye's recommended rectangle, one fixed
//!   color format, one sample per pixel.
//! - At most one image per ring is acquired-and-unreleased at any time; a
//!   second `acquire` before `release` is an error, never forwarded to the
//!   runtime.
//! - `render_into` releases on every exit path once acquire succeeded.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::xr::{EyeRect, SwapchainImages, ViewConfiguration, XrRuntime};
use crate::engine::{EngineError, EngineResult, InitStage};

/// The single color format every eye ring uses (raw `VkFormat`).
pub const COLOR_FORMAT: u32 = vulkano::format::Format::R8G8B8A8_SRGB as u32;

/// What the runtime is asked to create for one eye.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainSpec {
    pub width: u32,
    pub height: u32,
    pub format: u32,
    pub sample_count: u32,
}

impl SwapchainSpec {
    pub fn for_view(view: &ViewConfiguration) -> Self {
        Self {
            width: view.recommended_width,
            height: view.recommended_height,
            format: COLOR_FORMAT,
            sample_count: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImageState {
    Available,
    Acquired(u32),
    /// Acquired and waited; safe to render into.
    Ready(u32),
}

struct EyeSwapchain<S> {
    images: S,
    handles: Vec<u64>,
    rect: EyeRect,
    state: ImageState,
}

pub struct SwapchainManager<S: SwapchainImages> {
    eyes: Vec<EyeSwapchain<S>>,
}

impl<S: SwapchainImages> SwapchainManager<S> {
    /// Create one ring per view configuration. Any failing eye aborts the
    /// whole set; rings created so far are torn down on the way out.
    pub fn create<R>(runtime: &mut R, views: &[ViewConfiguration]) -> EngineResult<Self>
    where
        R: XrRuntime<Swapchain = S>,
    {
        let supported = runtime
            .supported_swapchain_formats()
            .map_err(|e| EngineError::init(InitStage::Swapchains, e))?;
        if !supported.contains(&COLOR_FORMAT) {
            return Err(EngineError::init(
                InitStage::Swapchains,
                format!("color format {COLOR_FORMAT} not offered by runtime (offered: {supported:?})"),
            ));
        }

        let mut manager = Self {
            eyes: Vec::with_capacity(views.len()),
        };

        for (eye, view) in views.iter().enumerate() {
            let spec = SwapchainSpec::for_view(view);
            let images = runtime
                .create_swapchain(&spec)
                .map_err(|e| EngineError::init(InitStage::Swapchains, format!("eye {eye}: {e}")))?;
            let handles = images
                .enumerate_images()
                .map_err(|e| EngineError::init(InitStage::Swapchains, format!("eye {eye}: {e}")))?;

            info!(
                "[Swapchain] eye {eye}: {}x{} format={} images={}",
                spec.width,
                spec.height,
                spec.format,
                handles.len()
            );

            manager.eyes.push(EyeSwapchain {
                images,
                handles,
                rect: EyeRect {
                    x: 0,
                    y: 0,
                    width: spec.width,
                    height: spec.height,
                },
                state: ImageState::Available,
            });
        }

        Ok(manager)
    }

    pub fn len(&self) -> usize {
        self.eyes.len()
    }

    fn eye(&self, eye: usize) -> EngineResult<&EyeSwapchain<S>> {
        self.eyes.get(eye).ok_or(EngineError::UnknownEye(eye))
    }

    fn eye_mut(&mut self, eye: usize) -> EngineResult<&mut EyeSwapchain<S>> {
        self.eyes.get_mut(eye).ok_or(EngineError::UnknownEye(eye))
    }

    /// Full-image rectangle; equals the recommended size the ring was made with.
    pub fn image_rect(&self, eye: usize) -> EngineResult<EyeRect> {
        Ok(self.eye(eye)?.rect)
    }

    pub fn image_handles(&self, eye: usize) -> EngineResult<&[u64]> {
        Ok(&self.eye(eye)?.handles)
    }

    pub fn images(&self, eye: usize) -> EngineResult<&S> {
        Ok(&self.eye(eye)?.images)
    }

    pub fn acquire(&mut self, eye: usize) -> EngineResult<u32> {
        let slot = self.eye_mut(eye)?;
        match slot.state {
            ImageState::Acquired(index) | ImageState::Ready(index) => {
                Err(EngineError::ImageAlreadyAcquired { eye, index })
            }
            ImageState::Available => {
                let index = slot.images.acquire_image()?;
                slot.state = ImageState::Acquired(index);
                Ok(index)
            }
        }
    }

    pub fn wait(&mut self, eye: usize, timeout: Option<Duration>) -> EngineResult<()> {
        let slot = self.eye_mut(eye)?;
        match slot.state {
            ImageState::Available => Err(EngineError::NoImageAcquired { eye }),
            ImageState::Ready(_) => Ok(()),
            ImageState::Acquired(index) => {
                slot.images.wait_image(timeout)?;
                slot.state = ImageState::Ready(index);
                Ok(())
            }
        }
    }

    /// Hand the acquired image back to the runtime. The slot is free again
    /// even if the runtime call fails.
    pub fn release(&mut self, eye: usize) -> EngineResult<()> {
        let slot = self.eye_mut(eye)?;
        match slot.state {
            ImageState::Available => Err(EngineError::NoImageAcquired { eye }),
            ImageState::Acquired(index) | ImageState::Ready(index) => {
                if let ImageState::Acquired(_) = slot.state {
                    warn!("[Swapchain] eye {eye}: releasing image {index} that was never waited on");
                }
                slot.state = ImageState::Available;
                slot.images.release_image()
            }
        }
    }

    /// acquire -> wait -> `render(image_index, rect)` -> release.
    ///
    /// Release happens whether wait or render fail; the first error wins.
    pub fn render_into<F>(&mut self, eye: usize, timeout: Option<Duration>, render: F) -> EngineResult<()>
    where
        F: FnOnce(u32, EyeRect) -> EngineResult<()>,
    {
        let index = self.acquire(eye)?;
        let rect = self.image_rect(eye)?;

        let outcome = self.wait(eye, timeout).and_then(|()| render(index, rect));
        let released = self.release(eye);
        if let Err(e) = &released {
            warn!("[Swapchain] eye {eye}: release failed: {e}");
        }

        outcome.and(released)
    }

    /// Destroy every ring. Safe on a partial set and safe to call twice.
    pub fn teardown(&mut self) {
        for (eye, mut slot) in self.eyes.drain(..).enumerate() {
            match slot.state {
                ImageState::Ready(_) => {
                    if let Err(e) = slot.images.release_image() {
                        warn!("[Swapchain] eye {eye}: release during teardown failed: {e}");
                    }
                }
                ImageState::Acquired(index) => {
                    warn!("[Swapchain] eye {eye}: image {index} still acquired at teardown");
                }
                ImageState::Available => {}
            }
            debug!("[Swapchain] eye {eye}: destroyed");
        }
    }
}

impl<S: SwapchainImages> Drop for SwapchainManager<S> {
    fn drop(&mut self) {
        self.teardown();
    }
}
