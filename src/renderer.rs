//! Per-frame mesh rendering.
//!
//! [`MeshRenderer::render`] binds the output, clears it, uploads the scene
//! constants and then walks the model mesh by mesh, part by part, binding the
//! full pipeline state for each part before issuing one indexed draw.
//!
//! The renderer owns the device objects that are not tied to an asset: the
//! state object cache and the shared material sampler. Both are dropped by
//! [`release`](MeshRenderer::release) on device loss.

use crate::camera::SceneState;
use crate::error::GpuError;
use crate::graphics::{
    CommandContext, DeviceResources, FrameTargets, RenderDevice, SamplerDesc,
};
use crate::loader::ShaderLoader;
use crate::mesh::Model;
use crate::states::{StateCache, StateKey};

/// Cornflower blue.
pub const DEFAULT_CLEAR_COLOR: [f32; 4] = [0.392_156_87, 0.584_313_75, 0.929_411_8, 1.0];

const BLEND_FACTOR: [f32; 4] = [0.0; 4];
const SAMPLE_MASK: u32 = 0xffff_ffff;

/// Everything a frame reads but does not own.
pub struct FrameInputs<'a, D: RenderDevice> {
    pub scene: &'a SceneState,
    pub shaders: &'a ShaderLoader<D>,
    pub model: Option<&'a Model<D>>,
}

pub struct MeshRenderer<D: RenderDevice> {
    states: StateCache<D>,
    sampler: Option<D::Sampler>,
    clear_color: [f32; 4],
}

impl<D: RenderDevice> MeshRenderer<D> {
    pub fn new(clear_color: [f32; 4]) -> Self {
        Self {
            states: StateCache::new(),
            sampler: None,
            clear_color,
        }
    }

    /// Creates the device objects owned by the renderer.
    pub fn create_device_resources(&mut self, device: &D) -> Result<(), GpuError> {
        self.sampler = Some(device.create_sampler(&SamplerDesc::LINEAR_WRAP)?);
        Ok(())
    }

    /// Drops every device object. State objects are recreated lazily.
    pub fn release(&mut self) {
        self.states.clear();
        self.sampler = None;
    }

    pub fn clear_color(&self) -> [f32; 4] {
        self.clear_color
    }

    pub fn state_cache(&self) -> &StateCache<D> {
        &self.states
    }

    /// Draws one frame. Returns `Ok(false)` without touching the context when
    /// the shaders are not loaded yet or there is no back buffer.
    pub fn render<R>(&mut self, resources: &mut R, inputs: FrameInputs<'_, D>) -> Result<bool, GpuError>
    where
        R: DeviceResources<Device = D>,
    {
        let (Some(vertex), Some(pixel)) =
            (inputs.shaders.vertex_stage(), inputs.shaders.pixel_stage())
        else {
            return Ok(false);
        };

        let device = resources.device();
        let viewport = resources.screen_viewport();
        let Some(FrameTargets {
            context,
            render_target,
            depth_stencil,
        }) = resources.frame_targets()
        else {
            log::trace!("no back buffer this frame");
            return Ok(false);
        };

        context.set_viewport(viewport);
        context.set_render_targets(render_target, depth_stencil);
        context.clear_render_target(render_target, self.clear_color);
        context.clear_depth_stencil(depth_stencil, 1.0, 0);

        context.update_buffer(
            &pixel.constant_buffer,
            bytemuck::bytes_of(inputs.scene.constants()),
        )?;

        let Some(model) = inputs.model else {
            return Ok(true);
        };
        let sampler = self.sampler.as_ref().ok_or(GpuError::MissingBinding("sampler"))?;
        let states = self.states.get_or_create(&device, &StateKey::MESH)?;

        for mesh in &model.meshes {
            for part in &mesh.parts {
                context.set_blend_state(&states.blend, BLEND_FACTOR, SAMPLE_MASK);
                context.set_depth_stencil_state(&states.depth_stencil, 0);
                context.set_rasterizer_state(&states.rasterizer);

                context.set_input_layout(&vertex.layout);
                context.set_vertex_buffer(
                    0,
                    &part.vertex_buffer,
                    part.vertex_stride,
                    part.vertex_offset,
                );
                context.set_index_buffer(&part.index_buffer, part.index_format, part.index_offset);

                context.set_vertex_shader(&vertex.shader);
                context.set_pixel_shader(&pixel.shader);
                context.set_constant_buffer(0, &pixel.constant_buffer);
                context.set_texture(0, &mesh.material_for(part).texture);
                context.set_sampler(0, sampler);

                context.set_primitive_topology(part.topology);
                context.draw_indexed(part.index_count, part.start_index, 0)?;
            }
        }

        Ok(true)
    }
}
