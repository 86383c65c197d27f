use std::mem::size_of;
use std::sync::Arc;

use ash::vk::Handle;
use tracing::{debug, info, trace, warn};
use vulkano::buffer::{Buffer, BufferContents, BufferCreateInfo, BufferUsage, Subbuffer};
use vulkano::command_buffer::{
    AutoCommandBufferBuilder, CommandBufferUsage, PrimaryCommandBufferAbstract, RenderPassBeginInfo,
    SubpassBeginInfo, SubpassEndInfo,
};
use vulkano::format::{ClearValue, Format};
use vulkano::image::sys::RawImage;
use vulkano::image::view::ImageView;
use vulkano::image::{Image, ImageCreateInfo, ImageType, ImageUsage};
use vulkano::memory::allocator::{AllocationCreateInfo, MemoryTypeFilter};
use vulkano::pipeline::graphics::color_blend::{ColorBlendAttachmentState, ColorBlendState};
use vulkano::pipeline::graphics::input_assembly::InputAssemblyState;
use vulkano::pipeline::graphics::multisample::MultisampleState;
use vulkano::pipeline::graphics::rasterization::RasterizationState;
use vulkano::pipeline::graphics::subpass::PipelineSubpassType;
use vulkano::pipeline::graphics::vertex_input::{
    VertexInputAttributeDescription, VertexInputBindingDescription, VertexInputRate, VertexInputState,
};
use vulkano::pipeline::graphics::viewport::{Scissor, Viewport, ViewportState};
use vulkano::pipeline::layout::{PipelineDescriptorSetLayoutCreateInfo, PipelineLayout};
use vulkano::pipeline::{DynamicState, GraphicsPipeline, Pipeline, PipelineShaderStageCreateInfo};
use vulkano::render_pass::{Framebuffer, FramebufferCreateInfo, RenderPass, Subpass};
use vulkano::shader::ShaderStages;
use vulkano::sync::GpuFuture;

use crate::engine::config::EngineConfig;
use crate::engine::graphics::mesh::{CpuVertex, MeshFactory};
use crate::engine::graphics::video_texture::{VideoFrameSource, VideoTexture};
use crate::engine::graphics::{EyeRenderer, EyeTarget, GraphicsContext};
use crate::engine::xr::SwapchainImages;
use crate::engine::xr::swapchain::SwapchainManager;
use crate::engine::{EngineError, EngineResult, InitStage};

type BoxResult<T> = Result<T, Box<dyn std::error::Error>>;

mod plane_vs {
    vulkano_shaders::shader! {
        ty: "vertex",
        src: r"
            #version 450

            layout(location = 0) in vec3 pos;
            layout(location = 1) in vec2 uv;

            layout(push_constant) uniform EyePush {
                mat4 mvp;
                vec4 tint;
            } push;

            layout(location = 0) out vec2 v_uv;
            layout(location = 1) out vec4 v_tint;

            void main() {
                v_uv = uv;
                v_tint = push.tint;
                gl_Position = push.mvp * vec4(pos, 1.0);
            }
        ",
    }
}

mod plane_fs {
    vulkano_shaders::shader! {
        ty: "fragment",
        src: r"
            #version 450

            layout(location = 0) in vec2 v_uv;
            layout(location = 1) in vec4 v_tint;

            layout(location = 0) out vec4 f_color;

            void main() {
                f_color = v_tint;
            }
        ",
    }
}

/// Matches `EyePush` in the vertex shader. `mvp` is column-major.
#[derive(BufferContents, Clone, Copy, Debug, Default)]
#[repr(C, align(16))]
struct EyePush {
    mvp: [[f32; 4]; 4],
    tint: [f32; 4],
}

/// Draws the content plane into XR swapchain images.
///
/// Holds one framebuffer per (eye, swapchain image). The images themselves
/// stay owned by the runtime.
pub struct VulkanoEyeRenderer<'a> {
    ctx: &'a GraphicsContext,
    pipeline: Arc<GraphicsPipeline>,
    framebuffers: Vec<Vec<Arc<Framebuffer>>>,
    vertices: Subbuffer<[CpuVertex]>,
    indices: Subbuffer<[u32]>,
    index_count: u32,
    clear_color: [f32; 4],
    plane_color: [f32; 4],
    video_texture: VideoTexture,
    video_source: Option<Box<dyn VideoFrameSource>>,
    frames: u64,
}

impl<'a> VulkanoEyeRenderer<'a> {
    /// Build every scene resource. Any failure aborts setup.
    pub fn new<S: SwapchainImages>(
        ctx: &'a GraphicsContext,
        swapchains: &SwapchainManager<S>,
        config: &EngineConfig,
        video_source: Option<Box<dyn VideoFrameSource>>,
    ) -> EngineResult<Self> {
        Self::build(ctx, swapchains, config, video_source)
            .map_err(|e| EngineError::init(InitStage::SceneResources, e))
    }

    fn build<S: SwapchainImages>(
        ctx: &'a GraphicsContext,
        swapchains: &SwapchainManager<S>,
        config: &EngineConfig,
        video_source: Option<Box<dyn VideoFrameSource>>,
    ) -> BoxResult<Self> {
        let device = ctx.device.clone();

        let render_pass = vulkano::single_pass_renderpass!(
            device.clone(),
            attachments: {
                color: {
                    format: Format::R8G8B8A8_SRGB,
                    samples: 1,
                    load_op: Clear,
                    store_op: Store,
                },
            },
            pass: {
                color: [color],
                depth_stencil: {},
            }
        )?;

        let mut framebuffers = Vec::with_capacity(swapchains.len());
        for eye in 0..swapchains.len() {
            let rect = swapchains.image_rect(eye)?;
            let per_image = swapchains
                .image_handles(eye)?
                .iter()
                .map(|&handle| {
                    let view = Self::wrap_swapchain_image(ctx, handle, [rect.width, rect.height])?;
                    let framebuffer = Framebuffer::new(
                        render_pass.clone(),
                        FramebufferCreateInfo {
                            attachments: vec![view],
                            ..Default::default()
                        },
                    )?;
                    Ok::<_, Box<dyn std::error::Error>>(framebuffer)
                })
                .collect::<BoxResult<Vec<_>>>()?;
            debug!("[EyeRenderer] eye {eye}: {} framebuffers", per_image.len());
            framebuffers.push(per_image);
        }

        let pipeline = Self::build_pipeline(ctx, render_pass)?;

        let mesh = MeshFactory::content_plane();
        let vertices = Buffer::from_iter(
            ctx.memory_allocator.clone(),
            BufferCreateInfo {
                usage: BufferUsage::VERTEX_BUFFER,
                ..Default::default()
            },
            AllocationCreateInfo {
                memory_type_filter: MemoryTypeFilter::PREFER_DEVICE | MemoryTypeFilter::HOST_SEQUENTIAL_WRITE,
                ..Default::default()
            },
            mesh.vertices.iter().copied(),
        )?;
        let indices = Buffer::from_iter(
            ctx.memory_allocator.clone(),
            BufferCreateInfo {
                usage: BufferUsage::INDEX_BUFFER,
                ..Default::default()
            },
            AllocationCreateInfo {
                memory_type_filter: MemoryTypeFilter::PREFER_DEVICE | MemoryTypeFilter::HOST_SEQUENTIAL_WRITE,
                ..Default::default()
            },
            mesh.indices_u32.iter().copied(),
        )?;

        let [video_w, video_h] = config.video.size;
        let video_texture = VideoTexture::new(ctx, video_w, video_h)?;

        info!("[EyeRenderer] scene resources ready");

        Ok(Self {
            ctx,
            pipeline,
            framebuffers,
            vertices,
            indices,
            index_count: mesh.index_count(),
            clear_color: config.clear_color,
            plane_color: config.plane.color,
            video_texture,
            video_source,
            frames: 0,
        })
    }

    /// View over a runtime-owned image. Vulkano never destroys it.
    fn wrap_swapchain_image(ctx: &GraphicsContext, handle: u64, extent: [u32; 2]) -> BoxResult<Arc<ImageView>> {
        let raw = unsafe {
            RawImage::from_handle_borrowed(
                ctx.device.clone(),
                ash::vk::Image::from_raw(handle),
                ImageCreateInfo {
                    image_type: ImageType::Dim2d,
                    format: Format::R8G8B8A8_SRGB,
                    extent: [extent[0], extent[1], 1],
                    usage: ImageUsage::COLOR_ATTACHMENT | ImageUsage::SAMPLED,
                    ..Default::default()
                },
            )?
        };
        // The runtime allocated and bound the memory.
        let image: Arc<Image> = Arc::new(unsafe { raw.assume_bound() });
        Ok(ImageView::new_default(image)?)
    }

    fn build_pipeline(ctx: &GraphicsContext, render_pass: Arc<RenderPass>) -> BoxResult<Arc<GraphicsPipeline>> {
        let device = ctx.device.clone();

        let vs = plane_vs::load(device.clone())?;
        let fs = plane_fs::load(device.clone())?;

        let stages = [
            PipelineShaderStageCreateInfo::new(vs.entry_point("main").ok_or("missing plane vertex entry point")?),
            PipelineShaderStageCreateInfo::new(fs.entry_point("main").ok_or("missing plane fragment entry point")?),
        ];

        let layout = PipelineLayout::new(
            device.clone(),
            PipelineDescriptorSetLayoutCreateInfo::from_stages(&stages)
                .into_pipeline_layout_create_info(device.clone())?,
        )?;

        let push_size = size_of::<EyePush>() as u32;
        let has_push_block = layout
            .push_constant_ranges()
            .iter()
            .any(|r| r.stages.intersects(ShaderStages::VERTEX) && r.offset + r.size >= push_size);
        if !has_push_block {
            return Err("vertex shader does not declare the EyePush push-constant block".into());
        }

        // Only position and uv of `CpuVertex` are consumed.
        let vertex_input_state = VertexInputState::new()
            .binding(
                0,
                VertexInputBindingDescription {
                    stride: size_of::<CpuVertex>() as u32,
                    input_rate: VertexInputRate::Vertex,
                    ..Default::default()
                },
            )
            .attribute(
                0,
                VertexInputAttributeDescription {
                    binding: 0,
                    format: Format::R32G32B32_SFLOAT,
                    offset: 0,
                    ..Default::default()
                },
            )
            .attribute(
                1,
                VertexInputAttributeDescription {
                    binding: 0,
                    format: Format::R32G32_SFLOAT,
                    offset: 12,
                    ..Default::default()
                },
            );

        let subpass = Subpass::from(render_pass, 0).ok_or("missing subpass 0")?;
        let mut pipeline_ci = vulkano::pipeline::graphics::GraphicsPipelineCreateInfo::layout(layout);
        pipeline_ci.stages = stages.into_iter().collect();
        pipeline_ci.vertex_input_state = Some(vertex_input_state);
        pipeline_ci.input_assembly_state = Some(InputAssemblyState::default());
        pipeline_ci.viewport_state = Some(ViewportState::default());
        pipeline_ci.rasterization_state = Some(RasterizationState::default());
        pipeline_ci.multisample_state = Some(MultisampleState::default());
        pipeline_ci.depth_stencil_state = None;
        pipeline_ci.color_blend_state = Some(ColorBlendState::with_attachment_states(
            1,
            ColorBlendAttachmentState::default(),
        ));
        pipeline_ci.dynamic_state = [DynamicState::Viewport, DynamicState::Scissor]
            .into_iter()
            .collect();
        pipeline_ci.subpass = Some(PipelineSubpassType::BeginRenderPass(subpass));

        Ok(GraphicsPipeline::new(device, None, pipeline_ci)?)
    }

    /// Opaque id of the external video texture.
    pub fn video_texture_id(&self) -> u64 {
        self.video_texture.id()
    }

    fn upload_pending_video_frame(&mut self) -> EngineResult<()> {
        let Some(source) = self.video_source.as_mut() else {
            return Ok(());
        };

        if let Some(frame) = source.next_frame()? {
            self.video_texture.upload_rgba8(self.ctx, &frame)?;
            debug!("[EyeRenderer] uploaded {}x{} video frame", frame.width, frame.height);
        }

        Ok(())
    }

    fn record_and_submit(&self, target: &EyeTarget) -> BoxResult<()> {
        let framebuffer = self
            .framebuffers
            .get(target.eye)
            .and_then(|images| images.get(target.image_index as usize))
            .ok_or_else(|| format!("no framebuffer for eye {} image {}", target.eye, target.image_index))?
            .clone();

        let mut render_pass_begin = RenderPassBeginInfo::framebuffer(framebuffer);
        render_pass_begin.clear_values = vec![Some(ClearValue::from(self.clear_color))];

        let rect = target.rect;
        let viewport = Viewport {
            offset: [rect.x as f32, rect.y as f32],
            extent: [rect.width as f32, rect.height as f32],
            depth_range: 0.0..=1.0,
            ..Default::default()
        };
        let scissor = Scissor {
            offset: [rect.x.max(0) as u32, rect.y.max(0) as u32],
            extent: [rect.width, rect.height],
            ..Default::default()
        };

        let push = EyePush {
            mvp: target.mvp.to_cols_array_2d(),
            tint: self.plane_color,
        };

        let mut cbb = AutoCommandBufferBuilder::primary(
            self.ctx.command_buffer_allocator.clone(),
            self.ctx.queue_family_index(),
            CommandBufferUsage::OneTimeSubmit,
        )?;

        cbb.begin_render_pass(render_pass_begin, SubpassBeginInfo::default())?;
        cbb.set_viewport(0, vec![viewport].into())?;
        cbb.set_scissor(0, vec![scissor].into())?;
        cbb.bind_pipeline_graphics(self.pipeline.clone())?;
        cbb.push_constants(self.pipeline.layout().clone(), 0, push)?;
        cbb.bind_vertex_buffers(0, self.vertices.clone())?;
        cbb.bind_index_buffer(self.indices.clone())?;
        unsafe {
            cbb.draw_indexed(self.index_count, 1, 0, 0, 0)?;
        }
        cbb.end_render_pass(SubpassEndInfo::default())?;

        let cb = cbb.build()?;

        // The image is released right after this returns, so the GPU must be done.
        cb.execute(self.ctx.queue.clone())?
            .then_signal_fence_and_flush()?
            .wait(None)?;

        Ok(())
    }
}

impl EyeRenderer for VulkanoEyeRenderer<'_> {
    fn prepare_frame(&mut self) -> EngineResult<()> {
        self.frames += 1;
        if self.frames == 1 {
            info!("[EyeRenderer] first frame");
        }

        if let Err(e) = self.upload_pending_video_frame() {
            warn!("[EyeRenderer] video frame upload failed: {e}");
        }

        Ok(())
    }

    fn render_eye(&mut self, target: &EyeTarget) -> EngineResult<()> {
        trace!(
            "[EyeRenderer] eye {} image {} rect {}x{}",
            target.eye, target.image_index, target.rect.width, target.rect.height
        );
        self.record_and_submit(target).map_err(EngineError::vulkan)
    }
}

impl Drop for VulkanoEyeRenderer<'_> {
    fn drop(&mut self) {
        debug!(
            "[EyeRenderer] destroying {} framebuffers",
            self.framebuffers.iter().map(Vec::len).sum::<usize>()
        );
        self.framebuffers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::math::Mat4;

    #[test]
    fn push_block_is_a_mat4_and_a_vec4() {
        assert_eq!(size_of::<EyePush>(), 80);
    }

    #[test]
    fn push_block_carries_column_major_mvp() {
        let mvp = Mat4::from_translation([1.0, 2.0, 3.0]);
        let push = EyePush {
            mvp: mvp.to_cols_array_2d(),
            tint: [1.0; 4],
        };
        assert_eq!(push.mvp[3], [1.0, 2.0, 3.0, 1.0]);
    }
}
