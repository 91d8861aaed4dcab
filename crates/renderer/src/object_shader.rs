//! The built-in object shader.
//!
//! # Overview
//!
//! Loads `Builtin.ObjectShader.vert.spv` and `Builtin.ObjectShader.frag.spv`
//! and owns everything drawing with them needs:
//!
//! - a global uniform layout (set 0, binding 0, vertex stage)
//! - per swap-chain image: one host-visible [`GlobalUniform`] buffer and one
//!   descriptor set pointing at it
//! - a pipeline layout with one `mat4` vertex push constant for the model
//! - the graphics pipeline for the main render pass
//!
//! Per-image state is rebuilt by [`ObjectShader::ensure_image_count`] when a
//! swap-chain rebuild changes the image count; the pipeline survives.

use std::path::Path;
use std::sync::Arc;

use framepace_rhi::buffer::{Buffer, BufferUsage};
use framepace_rhi::command::CommandBuffer;
use framepace_rhi::descriptor::{
    DescriptorPool, DescriptorSetLayout, uniform_buffer_binding, write_uniform_buffer,
};
use framepace_rhi::device::Device;
use framepace_rhi::pipeline::{
    ColorBlendAttachment, CompareOp, CullMode, FrontFace, GraphicsPipelineBuilder, Pipeline,
    PipelineLayout,
};
use framepace_rhi::render_pass::RenderPass;
use framepace_rhi::shader::{Shader, ShaderStage};
use framepace_rhi::vertex::Vertex;
use framepace_rhi::vk;
use glam::Mat4;
use tracing::{debug, info, warn};

use crate::error::RendererResult;
use crate::ubo::{GlobalUniform, OBJECT_PUSH_CONSTANT_SIZE};

/// Base name of the shader blobs.
pub const OBJECT_SHADER_NAME: &str = "Builtin.ObjectShader";

const ENTRY_POINT: &str = "main";

const GLOBAL_UNIFORM_BINDING: u32 = 0;

/// Uniform buffers and descriptor sets, one of each per swap-chain image.
struct PerImage {
    sets: Vec<vk::DescriptorSet>,
    buffers: Vec<Buffer>,
    // Sets are freed with the pool
    _pool: DescriptorPool,
}

pub struct ObjectShader {
    device: Arc<Device>,
    per_image: PerImage,
    pipeline: Pipeline,
    pipeline_layout: PipelineLayout,
    global_layout: DescriptorSetLayout,
}

impl ObjectShader {
    /// Loads the shader blobs from `shader_dir` and builds the pipeline.
    ///
    /// Returns `Ok(None)` with a warning when either blob is missing, so the
    /// caller can fall back to clear-only frames.
    ///
    /// # Errors
    ///
    /// Returns an error if a blob exists but is malformed, or if any Vulkan
    /// object creation fails.
    pub fn load(
        device: Arc<Device>,
        shader_dir: &Path,
        render_pass: &RenderPass,
        image_count: u32,
    ) -> RendererResult<Option<Self>> {
        let vert_path = ShaderStage::Vertex.spirv_path(shader_dir, OBJECT_SHADER_NAME);
        let frag_path = ShaderStage::Fragment.spirv_path(shader_dir, OBJECT_SHADER_NAME);

        for path in [&vert_path, &frag_path] {
            if !path.exists() {
                warn!(
                    "Shader {:?} not found, frames will only be cleared",
                    path
                );
                return Ok(None);
            }
        }

        let vertex_shader =
            Shader::from_spirv_file(device.clone(), &vert_path, ShaderStage::Vertex, ENTRY_POINT)?;
        let fragment_shader = Shader::from_spirv_file(
            device.clone(),
            &frag_path,
            ShaderStage::Fragment,
            ENTRY_POINT,
        )?;

        let global_layout = DescriptorSetLayout::new(
            device.clone(),
            &[uniform_buffer_binding(
                GLOBAL_UNIFORM_BINDING,
                vk::ShaderStageFlags::VERTEX,
            )],
        )?;

        let push_constant_range = vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::VERTEX)
            .offset(0)
            .size(OBJECT_PUSH_CONSTANT_SIZE);

        let pipeline_layout = PipelineLayout::new(
            device.clone(),
            &[global_layout.handle()],
            &[push_constant_range],
        )?;

        let pipeline = GraphicsPipelineBuilder::new()
            .vertex_shader(&vertex_shader)
            .fragment_shader(&fragment_shader)
            .vertex_binding(Vertex::binding_description())
            .vertex_attributes(&Vertex::attribute_descriptions())
            .cull_mode(CullMode::Back)
            .front_face(FrontFace::CounterClockwise)
            .depth_test_enable(true)
            .depth_write_enable(true)
            .depth_compare_op(CompareOp::Less)
            .color_blend_attachment(ColorBlendAttachment::alpha_blend())
            .render_pass(render_pass, 0)
            .build(device.clone(), &pipeline_layout)?;

        // Shader modules are only needed until the pipeline exists
        drop(vertex_shader);
        drop(fragment_shader);

        let per_image = Self::create_per_image(&device, &global_layout, image_count)?;

        info!("Object shader loaded from {:?}", shader_dir);

        Ok(Some(Self {
            device,
            per_image,
            pipeline,
            pipeline_layout,
            global_layout,
        }))
    }

    fn create_per_image(
        device: &Arc<Device>,
        layout: &DescriptorSetLayout,
        image_count: u32,
    ) -> RendererResult<PerImage> {
        let pool_sizes = [vk::DescriptorPoolSize::default()
            .ty(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(image_count)];
        let pool = DescriptorPool::new(device.clone(), image_count, &pool_sizes)?;

        let layouts = vec![layout.handle(); image_count as usize];
        let sets = pool.allocate(&layouts)?;

        let buffers = (0..image_count)
            .map(|_| {
                Buffer::new(
                    device.clone(),
                    BufferUsage::Uniform,
                    GlobalUniform::SIZE as vk::DeviceSize,
                    true,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!("Object shader state created for {} image(s)", image_count);

        Ok(PerImage {
            sets,
            buffers,
            _pool: pool,
        })
    }

    /// Rebuilds the per-image uniform state if the image count changed.
    ///
    /// The caller guarantees the GPU is idle.
    ///
    /// # Errors
    ///
    /// Returns an error if allocation fails; the old state is kept then.
    pub fn ensure_image_count(&mut self, image_count: u32) -> RendererResult<()> {
        if self.per_image.sets.len() == image_count as usize {
            return Ok(());
        }
        self.per_image = Self::create_per_image(&self.device, &self.global_layout, image_count)?;
        Ok(())
    }

    /// Uploads `uniform` for `image`, then binds the pipeline and the image's
    /// descriptor set on `cmd`.
    ///
    /// # Errors
    ///
    /// Returns an error if the uniform upload fails.
    ///
    /// # Panics
    ///
    /// Panics if `cmd` is not recording.
    pub fn use_global(
        &self,
        cmd: &CommandBuffer,
        image: usize,
        uniform: &GlobalUniform,
    ) -> RendererResult<()> {
        let buffer = &self.per_image.buffers[image];
        let set = self.per_image.sets[image];

        buffer.load(0, bytemuck::bytes_of(uniform))?;
        write_uniform_buffer(
            &self.device,
            set,
            GLOBAL_UNIFORM_BINDING,
            buffer.handle(),
            0,
            GlobalUniform::SIZE as vk::DeviceSize,
        );

        cmd.bind_pipeline(self.pipeline.bind_point(), self.pipeline.handle());
        cmd.bind_descriptor_sets(
            self.pipeline.bind_point(),
            self.pipeline_layout.handle(),
            0,
            &[set],
        );
        Ok(())
    }

    /// Pushes the model matrix for the next draw.
    pub fn push_model(&self, cmd: &CommandBuffer, model: &Mat4) {
        cmd.push_constants(
            self.pipeline_layout.handle(),
            vk::ShaderStageFlags::VERTEX,
            0,
            model,
        );
    }
}
