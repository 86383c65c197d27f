//! `XrRuntime` over a real OpenXR runtime with the Vulkan graphics binding.

use std::time::Duration;

use openxr as xr;
use tracing::{debug, info, trace, warn};

use crate::engine::graphics::GraphicsContext;
use crate::engine::xr::swapchain::{SwapchainManager, SwapchainSpec};
use crate::engine::xr::{
    EnvironmentBlend, EyeRect, Fov, FrameState, Pose, ProjectionLayer, ReferenceSpaceKind, RuntimeEvent,
    STEREO_VIEW_COUNT, SwapchainImages, View, ViewConfiguration, XrRuntime,
};
use crate::engine::{EngineError, EngineResult, InitStage};

const VIEW_TYPE: xr::ViewConfigurationType = xr::ViewConfigurationType::PRIMARY_STEREO;

/// Instance + system, before any graphics exist.
///
/// The graphics context has to be built from this (the runtime dictates the
/// Vulkan version, extensions and physical device) before a session can be
/// created.
pub struct XrBootstrap {
    pub instance: xr::Instance,
    pub system: xr::SystemId,
    pub view_configs: Vec<ViewConfiguration>,
}

impl XrBootstrap {
    pub fn new(app_name: &str) -> EngineResult<Self> {
        let entry = unsafe { xr::Entry::load() }.map_err(|e| EngineError::init(InitStage::Loader, e))?;

        let available = entry
            .enumerate_extensions()
            .map_err(|e| EngineError::init(InitStage::Loader, e))?;
        if !available.khr_vulkan_enable {
            return Err(EngineError::init(
                InitStage::Instance,
                "runtime does not offer XR_KHR_vulkan_enable",
            ));
        }

        let mut enabled = xr::ExtensionSet::default();
        enabled.khr_vulkan_enable = true;

        let instance = entry
            .create_instance(
                &xr::ApplicationInfo {
                    application_name: app_name,
                    application_version: 0,
                    engine_name: env!("CARGO_PKG_NAME"),
                    engine_version: 0,
                    api_version: xr::Version::new(1, 0, 0),
                },
                &enabled,
                &[],
            )
            .map_err(|e| EngineError::init(InitStage::Instance, e))?;

        if let Ok(props) = instance.properties() {
            info!("[XR] runtime: {} {}", props.runtime_name, props.runtime_version);
        }

        let system = instance
            .system(xr::FormFactor::HEAD_MOUNTED_DISPLAY)
            .map_err(|e| EngineError::init(InitStage::System, e))?;

        let view_configs = instance
            .enumerate_view_configuration_views(system, VIEW_TYPE)
            .map_err(|e| EngineError::init(InitStage::System, e))?
            .into_iter()
            .map(|v| ViewConfiguration {
                recommended_width: v.recommended_image_rect_width,
                recommended_height: v.recommended_image_rect_height,
                recommended_sample_count: v.recommended_swapchain_sample_count,
            })
            .collect::<Vec<_>>();
        if view_configs.len() != STEREO_VIEW_COUNT {
            return Err(EngineError::init(
                InitStage::System,
                format!("expected {STEREO_VIEW_COUNT} stereo views, runtime reports {}", view_configs.len()),
            ));
        }
        for (eye, v) in view_configs.iter().enumerate() {
            info!("[XR] eye {eye}: recommended {}x{}", v.recommended_width, v.recommended_height);
        }

        let blend_modes = instance
            .enumerate_environment_blend_modes(system, VIEW_TYPE)
            .map_err(|e| EngineError::init(InitStage::System, e))?;
        if !blend_modes.contains(&xr::EnvironmentBlendMode::OPAQUE) {
            warn!("[XR] runtime does not list the opaque blend mode: {blend_modes:?}");
        }

        Ok(Self {
            instance,
            system,
            view_configs,
        })
    }
}

pub struct OpenXrSwapchain {
    handle: xr::Swapchain<xr::Vulkan>,
}

impl SwapchainImages for OpenXrSwapchain {
    fn enumerate_images(&self) -> EngineResult<Vec<u64>> {
        Ok(self.handle.enumerate_images()?)
    }

    fn acquire_image(&mut self) -> EngineResult<u32> {
        Ok(self.handle.acquire_image()?)
    }

    fn wait_image(&mut self, timeout: Option<Duration>) -> EngineResult<()> {
        let timeout = match timeout {
            Some(d) => xr::Duration::from_nanos(i64::try_from(d.as_nanos()).unwrap_or(i64::MAX)),
            None => xr::Duration::INFINITE,
        };
        self.handle.wait_image(timeout)?;
        Ok(())
    }

    fn release_image(&mut self) -> EngineResult<()> {
        self.handle.release_image()?;
        Ok(())
    }
}

/// Live session. Fields are declared in teardown order: space, frame
/// stream/waiter, session, then the instance.
pub struct OpenXrRuntime {
    space: xr::Space,
    frame_stream: xr::FrameStream<xr::Vulkan>,
    frame_waiter: xr::FrameWaiter,
    session: xr::Session<xr::Vulkan>,
    event_buffer: xr::EventDataBuffer,
    view_configs: Vec<ViewConfiguration>,
    instance: xr::Instance,
}

impl OpenXrRuntime {
    pub fn new(bootstrap: XrBootstrap, graphics: &GraphicsContext, space: ReferenceSpaceKind) -> EngineResult<Self> {
        let XrBootstrap {
            instance,
            system,
            view_configs,
        } = bootstrap;

        let (session, frame_waiter, frame_stream) = unsafe {
            instance.create_session::<xr::Vulkan>(system, &graphics.session_create_info())
        }
        .map_err(|e| EngineError::init(InitStage::Session, e))?;
        info!("[XR] session created");

        let space = session
            .create_reference_space(space.into(), xr::Posef::IDENTITY)
            .map_err(|e| EngineError::init(InitStage::ReferenceSpace, e))?;

        Ok(Self {
            space,
            frame_stream,
            frame_waiter,
            session,
            event_buffer: xr::EventDataBuffer::new(),
            view_configs,
            instance,
        })
    }

    fn projection_views<'s>(
        layer: &ProjectionLayer,
        swapchains: &'s SwapchainManager<OpenXrSwapchain>,
    ) -> EngineResult<Vec<xr::CompositionLayerProjectionView<'s, xr::Vulkan>>> {
        layer
            .views
            .iter()
            .map(|v| {
                let images = swapchains.images(v.eye)?;
                Ok::<_, EngineError>(xr::CompositionLayerProjectionView::new()
                    .pose(v.pose.into())
                    .fov(v.fov.into())
                    .sub_image(
                        xr::SwapchainSubImage::new()
                            .swapchain(&images.handle)
                            .image_array_index(0)
                            .image_rect(xr::Rect2Di::try_from(v.image_rect)?),
                    ))
            })
            .collect()
    }
}

impl XrRuntime for OpenXrRuntime {
    type Swapchain = OpenXrSwapchain;

    fn view_configurations(&self) -> &[ViewConfiguration] {
        &self.view_configs
    }

    fn poll_event(&mut self) -> EngineResult<Option<RuntimeEvent>> {
        let Some(event) = self.instance.poll_event(&mut self.event_buffer)? else {
            return Ok(None);
        };

        use xr::Event::*;
        let event = match event {
            SessionStateChanged(e) => RuntimeEvent::SessionStateChanged(e.state().into()),
            InstanceLossPending(_) => RuntimeEvent::InstanceLossPending,
            EventsLost(e) => RuntimeEvent::EventsLost(e.lost_event_count()),
            _ => RuntimeEvent::Other,
        };
        Ok(Some(event))
    }

    fn begin_session(&mut self) -> EngineResult<()> {
        self.session.begin(VIEW_TYPE)?;
        info!("[XR] session begun (primary stereo)");
        Ok(())
    }

    fn end_session(&mut self) -> EngineResult<()> {
        self.session.end()?;
        info!("[XR] session ended");
        Ok(())
    }

    fn wait_frame(&mut self) -> EngineResult<FrameState> {
        let state = self.frame_waiter.wait()?;
        Ok(FrameState {
            predicted_display_time: state.predicted_display_time.as_nanos(),
            should_render: state.should_render,
        })
    }

    fn begin_frame(&mut self) -> EngineResult<()> {
        self.frame_stream.begin()?;
        Ok(())
    }

    fn locate_views(&mut self, display_time: i64) -> EngineResult<Vec<View>> {
        let (flags, views) = self
            .session
            .locate_views(VIEW_TYPE, xr::Time::from_nanos(display_time), &self.space)?;
        trace!("[XR] located {} views, flags {flags:?}", views.len());

        Ok(views
            .into_iter()
            .map(|v| View {
                pose: v.pose.into(),
                fov: v.fov.into(),
            })
            .collect())
    }

    fn end_frame(
        &mut self,
        display_time: i64,
        blend: EnvironmentBlend,
        layer: Option<&ProjectionLayer>,
        swapchains: &SwapchainManager<OpenXrSwapchain>,
    ) -> EngineResult<()> {
        let time = xr::Time::from_nanos(display_time);
        let blend = blend.into();

        let Some(layer) = layer else {
            self.frame_stream.end(time, blend, &[])?;
            return Ok(());
        };

        let views = match Self::projection_views(layer, swapchains) {
            Ok(views) => views,
            Err(e) => {
                // Still close the frame so begin/end stay paired.
                self.frame_stream.end(time, blend, &[])?;
                return Err(e);
            }
        };

        let projection = xr::CompositionLayerProjection::new()
            .space(&self.space)
            .views(&views);
        self.frame_stream.end(time, blend, &[&projection])?;
        Ok(())
    }

    fn supported_swapchain_formats(&self) -> EngineResult<Vec<u32>> {
        Ok(self.session.enumerate_swapchain_formats()?)
    }

    fn create_swapchain(&mut self, spec: &SwapchainSpec) -> EngineResult<OpenXrSwapchain> {
        let handle = self.session.create_swapchain(&xr::SwapchainCreateInfo {
            create_flags: xr::SwapchainCreateFlags::EMPTY,
            usage_flags: xr::SwapchainUsageFlags::COLOR_ATTACHMENT | xr::SwapchainUsageFlags::SAMPLED,
            format: spec.format,
            sample_count: spec.sample_count,
            width: spec.width,
            height: spec.height,
            face_count: 1,
            array_size: 1,
            mip_count: 1,
        })?;
        Ok(OpenXrSwapchain { handle })
    }
}

impl Drop for OpenXrRuntime {
    fn drop(&mut self) {
        debug!("[XR] destroying reference space, session and instance");
    }
}

impl From<ReferenceSpaceKind> for xr::ReferenceSpaceType {
    fn from(kind: ReferenceSpaceKind) -> Self {
        match kind {
            ReferenceSpaceKind::View => xr::ReferenceSpaceType::VIEW,
            ReferenceSpaceKind::Local => xr::ReferenceSpaceType::LOCAL,
            ReferenceSpaceKind::Stage => xr::ReferenceSpaceType::STAGE,
        }
    }
}

impl From<EnvironmentBlend> for xr::EnvironmentBlendMode {
    fn from(blend: EnvironmentBlend) -> Self {
        match blend {
            EnvironmentBlend::Opaque => xr::EnvironmentBlendMode::OPAQUE,
        }
    }
}

impl From<xr::Posef> for Pose {
    fn from(p: xr::Posef) -> Self {
        Self {
            position: [p.position.x, p.position.y, p.position.z],
            orientation: [p.orientation.x, p.orientation.y, p.orientation.z, p.orientation.w],
        }
    }
}

impl From<Pose> for xr::Posef {
    fn from(p: Pose) -> Self {
        xr::Posef {
            orientation: xr::Quaternionf {
                x: p.orientation[0],
                y: p.orientation[1],
                z: p.orientation[2],
                w: p.orientation[3],
            },
            position: xr::Vector3f {
                x: p.position[0],
                y: p.position[1],
                z: p.position[2],
            },
        }
    }
}

impl From<xr::Fovf> for Fov {
    fn from(f: xr::Fovf) -> Self {
        Self {
            angle_left: f.angle_left,
            angle_right: f.angle_right,
            angle_up: f.angle_up,
            angle_down: f.angle_down,
        }
    }
}

impl From<Fov> for xr::Fovf {
    fn from(f: Fov) -> Self {
        xr::Fovf {
            angle_left: f.angle_left,
            angle_right: f.angle_right,
            angle_up: f.angle_up,
            angle_down: f.angle_down,
        }
    }
}

/// OpenXR extents are signed; a rect wider than `i32::MAX` cannot be submitted.
impl TryFrom<EyeRect> for xr::Rect2Di {
    type Error = EngineError;

    fn try_from(r: EyeRect) -> EngineResult<Self> {
        let (Ok(width), Ok(height)) = (i32::try_from(r.width), i32::try_from(r.height)) else {
            return Err(EngineError::RectOutOfRange(r));
        };
        Ok(xr::Rect2Di {
            offset: xr::Offset2Di { x: r.x, y: r.y },
            extent: xr::Extent2Di { width, height },
        })
    }
}
