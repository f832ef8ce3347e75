//! [`RenderDevice`] and [`CommandContext`] on top of wgpu.
//!
//! wgpu has no separate blend/depth/rasterizer objects and no immediate
//! binding model: all fixed-function state is baked into a
//! [`wgpu::RenderPipeline`] and draws are recorded inside a render pass. The
//! context therefore tracks bindings like an immediate-mode API and, at every
//! `draw_indexed`, snapshots them into a recorded draw:
//!
//! - the pipeline is looked up by the ids of the bound shaders, input layout
//!   and state objects (created on first use, then cached),
//! - the constant buffer becomes a bind group at group 0,
//! - the texture and sampler become a bind group at group 1.
//!
//! [`WgpuContext::submit`] replays the recorded draws in one render pass
//! whose load operations come from the recorded clears.
//!
//! Shader "bytecode" is WGSL source text. The vertex file must contain one
//! `@vertex` entry point and the pixel file one `@fragment` entry point.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use wgpu::util::DeviceExt;

use crate::error::GpuError;
use crate::graphics::{
    AddressMode, BlendDesc, BlendFactor, BlendOp, BufferDesc, BufferUsage, CommandContext,
    CompareFunction, CullMode, DepthStencilDesc, FillMode, FilterMode, IndexFormat,
    InputElementDesc, PrimitiveTopology, RasterizerDesc, RenderDevice, SamplerDesc, VertexFormat,
    Viewport,
};

/// Depth-stencil format of the depth target and every pipeline.
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24PlusStencil8;

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Clone, Debug)]
pub struct WgpuShader {
    id: u64,
    module: wgpu::ShaderModule,
}

#[derive(Clone, Debug)]
pub struct WgpuInputLayout {
    id: u64,
    attributes: Vec<wgpu::VertexAttribute>,
}

#[derive(Clone, Debug)]
pub struct WgpuBuffer {
    id: u64,
    buffer: wgpu::Buffer,
    size: u64,
}

impl WgpuBuffer {
    pub fn size(&self) -> u64 {
        self.size
    }
}

#[derive(Clone, Debug)]
pub struct WgpuTexture {
    id: u64,
    view: wgpu::TextureView,
}

#[derive(Clone, Debug)]
pub struct WgpuSampler {
    id: u64,
    sampler: wgpu::Sampler,
}

#[derive(Clone, Debug)]
pub struct WgpuBlendState {
    id: u64,
    blend: Option<wgpu::BlendState>,
    write_mask: wgpu::ColorWrites,
}

#[derive(Clone, Debug)]
pub struct WgpuDepthStencilState {
    id: u64,
    depth_write_enabled: bool,
    depth_compare: wgpu::CompareFunction,
}

#[derive(Clone, Debug)]
pub struct WgpuRasterizerState {
    id: u64,
    front_face: wgpu::FrontFace,
    cull_mode: Option<wgpu::Face>,
    polygon_mode: wgpu::PolygonMode,
    unclipped_depth: bool,
}

/// A wgpu device and queue plus the layouts shared by every pipeline.
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    color_format: wgpu::TextureFormat,
    constants_layout: wgpu::BindGroupLayout,
    material_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    lost: Arc<AtomicBool>,
}

impl WgpuDevice {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, color_format: wgpu::TextureFormat) -> Self {
        let lost = Arc::new(AtomicBool::new(false));
        let flag = lost.clone();
        device.set_device_lost_callback(move |reason, message| {
            if matches!(reason, wgpu::DeviceLostReason::Destroyed) {
                log::debug!("wgpu device destroyed: {message}");
                return;
            }
            log::error!("wgpu device lost ({reason:?}): {message}");
            flag.store(true, Ordering::Release);
        });

        let constants_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Scene Constants Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let material_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Material Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Mesh Pipeline Layout"),
            bind_group_layouts: &[&constants_layout, &material_layout],
            push_constant_ranges: &[],
        });

        Self {
            device,
            queue,
            color_format,
            constants_layout,
            material_layout,
            pipeline_layout,
            lost,
        }
    }

    /// Set once the driver reports the device lost. Never cleared: a lost
    /// device is replaced, not revived.
    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    pub fn raw(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Runs `create` inside a validation error scope and turns a captured
    /// error into [`GpuError::Creation`].
    fn scoped<T>(&self, what: &'static str, create: impl FnOnce(&wgpu::Device) -> T) -> Result<T, GpuError> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = create(&self.device);
        let validation = pollster::block_on(self.device.pop_error_scope());
        let oom = pollster::block_on(self.device.pop_error_scope());

        if oom.is_some() {
            return Err(GpuError::OutOfMemory);
        }
        match validation {
            Some(err) => Err(GpuError::creation(what, err)),
            None => Ok(value),
        }
    }

    fn shader(&self, bytecode: &[u8], entry: &str, label: &str) -> Result<WgpuShader, GpuError> {
        let source = wgsl_source(bytecode, entry)?;
        let module = self
            .scoped("shader module", |device| {
                device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(label),
                    source: wgpu::ShaderSource::Wgsl(source.into()),
                })
            })
            .map_err(|e| GpuError::InvalidShader(e.to_string()))?;
        Ok(WgpuShader {
            id: next_id(),
            module,
        })
    }
}

impl RenderDevice for WgpuDevice {
    type VertexShader = WgpuShader;
    type PixelShader = WgpuShader;
    type InputLayout = WgpuInputLayout;
    type Buffer = WgpuBuffer;
    type Texture = WgpuTexture;
    type Sampler = WgpuSampler;
    type BlendState = WgpuBlendState;
    type DepthStencilState = WgpuDepthStencilState;
    type RasterizerState = WgpuRasterizerState;

    fn create_vertex_shader(&self, bytecode: &[u8]) -> Result<WgpuShader, GpuError> {
        self.shader(bytecode, "@vertex", "Mesh Vertex Shader")
    }

    fn create_pixel_shader(&self, bytecode: &[u8]) -> Result<WgpuShader, GpuError> {
        self.shader(bytecode, "@fragment", "Mesh Pixel Shader")
    }

    fn create_input_layout(
        &self,
        elements: &[InputElementDesc],
        vs_bytecode: &[u8],
    ) -> Result<WgpuInputLayout, GpuError> {
        let source = wgsl_source(vs_bytecode, "@vertex")?;
        let attributes = vertex_attributes(elements, source)?;
        Ok(WgpuInputLayout {
            id: next_id(),
            attributes,
        })
    }

    fn create_buffer(
        &self,
        desc: &BufferDesc<'_>,
        contents: Option<&[u8]>,
    ) -> Result<WgpuBuffer, GpuError> {
        let usage = buffer_usage(desc.usage);
        let buffer = self.scoped("buffer", |device| match contents {
            Some(data) => device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(desc.label),
                contents: data,
                usage,
            }),
            None => device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(desc.label),
                size: desc.size,
                usage,
                mapped_at_creation: false,
            }),
        })?;
        Ok(WgpuBuffer {
            id: next_id(),
            buffer,
            size: desc.size,
        })
    }

    fn create_texture_rgba8(
        &self,
        width: u32,
        height: u32,
        pixels: &[u8],
        label: &str,
    ) -> Result<WgpuTexture, GpuError> {
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(GpuError::creation(
                "texture",
                format!("{label}: expected {expected} bytes of RGBA8, got {}", pixels.len()),
            ));
        }
        let texture = self.scoped("texture", |device| {
            device.create_texture_with_data(
                &self.queue,
                &wgpu::TextureDescriptor {
                    label: Some(label),
                    size: wgpu::Extent3d {
                        width,
                        height,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: wgpu::TextureFormat::Rgba8UnormSrgb,
                    usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                    view_formats: &[],
                },
                wgpu::util::TextureDataOrder::LayerMajor,
                pixels,
            )
        })?;
        Ok(WgpuTexture {
            id: next_id(),
            view: texture.create_view(&wgpu::TextureViewDescriptor::default()),
        })
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> Result<WgpuSampler, GpuError> {
        let address = match desc.address {
            AddressMode::Wrap => wgpu::AddressMode::Repeat,
            AddressMode::Clamp => wgpu::AddressMode::ClampToEdge,
        };
        let filter = match desc.filter {
            FilterMode::Nearest => wgpu::FilterMode::Nearest,
            FilterMode::Linear => wgpu::FilterMode::Linear,
        };
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Material Sampler"),
            address_mode_u: address,
            address_mode_v: address,
            address_mode_w: address,
            mag_filter: filter,
            min_filter: filter,
            mipmap_filter: filter,
            ..Default::default()
        });
        Ok(WgpuSampler {
            id: next_id(),
            sampler,
        })
    }

    fn create_blend_state(&self, desc: &BlendDesc) -> Result<WgpuBlendState, GpuError> {
        Ok(WgpuBlendState {
            id: next_id(),
            blend: blend_state(desc),
            write_mask: wgpu::ColorWrites::from_bits_truncate(desc.write_mask.0 as u32),
        })
    }

    fn create_depth_stencil_state(
        &self,
        desc: &DepthStencilDesc,
    ) -> Result<WgpuDepthStencilState, GpuError> {
        if desc.stencil_enabled {
            return Err(GpuError::creation(
                "depth-stencil state",
                "stencil testing is not supported",
            ));
        }
        Ok(WgpuDepthStencilState {
            id: next_id(),
            depth_write_enabled: desc.depth_test && desc.depth_write,
            depth_compare: if desc.depth_test {
                compare_function(desc.depth_compare)
            } else {
                wgpu::CompareFunction::Always
            },
        })
    }

    fn create_rasterizer_state(
        &self,
        desc: &RasterizerDesc,
    ) -> Result<WgpuRasterizerState, GpuError> {
        let features = self.device.features();
        let polygon_mode = match desc.fill {
            FillMode::Solid => wgpu::PolygonMode::Fill,
            FillMode::Wireframe if features.contains(wgpu::Features::POLYGON_MODE_LINE) => {
                wgpu::PolygonMode::Line
            }
            FillMode::Wireframe => {
                return Err(GpuError::creation(
                    "rasterizer state",
                    "wireframe fill needs POLYGON_MODE_LINE",
                ));
            }
        };
        let unclipped_depth = !desc.depth_clip;
        if unclipped_depth && !features.contains(wgpu::Features::DEPTH_CLIP_CONTROL) {
            return Err(GpuError::creation(
                "rasterizer state",
                "disabling depth clip needs DEPTH_CLIP_CONTROL",
            ));
        }
        if !desc.multisample {
            log::debug!("multisample off requested; targets are single-sampled anyway");
        }
        Ok(WgpuRasterizerState {
            id: next_id(),
            front_face: if desc.front_counter_clockwise {
                wgpu::FrontFace::Ccw
            } else {
                wgpu::FrontFace::Cw
            },
            cull_mode: match desc.cull {
                CullMode::None => None,
                CullMode::Front => Some(wgpu::Face::Front),
                CullMode::Back => Some(wgpu::Face::Back),
            },
            polygon_mode,
            unclipped_depth,
        })
    }
}

/// Identity of everything baked into a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PipelineKey {
    vertex_shader: u64,
    pixel_shader: u64,
    input_layout: u64,
    vertex_stride: u32,
    blend: u64,
    depth_stencil: u64,
    rasterizer: u64,
    topology: PrimitiveTopology,
    strip_index_format: Option<IndexFormat>,
    sample_mask: u32,
}

#[derive(Default)]
struct Bindings {
    blend: Option<WgpuBlendState>,
    blend_constant: [f32; 4],
    sample_mask: u32,
    depth_stencil: Option<WgpuDepthStencilState>,
    stencil_ref: u32,
    rasterizer: Option<WgpuRasterizerState>,
    input_layout: Option<WgpuInputLayout>,
    vertex_buffer: Option<(WgpuBuffer, u32, u64)>,
    index_buffer: Option<(WgpuBuffer, IndexFormat, u64)>,
    vertex_shader: Option<WgpuShader>,
    pixel_shader: Option<WgpuShader>,
    constant_buffer: Option<WgpuBuffer>,
    texture: Option<WgpuTexture>,
    sampler: Option<WgpuSampler>,
    topology: Option<PrimitiveTopology>,
}

struct RecordedDraw {
    pipeline: wgpu::RenderPipeline,
    constants: wgpu::BindGroup,
    material: wgpu::BindGroup,
    vertex_buffer: wgpu::Buffer,
    vertex_offset: u64,
    index_buffer: wgpu::Buffer,
    index_format: wgpu::IndexFormat,
    index_offset: u64,
    indices: Range<u32>,
    base_vertex: i32,
    viewport: Option<Viewport>,
    blend_constant: [f32; 4],
    stencil_ref: u32,
}

#[derive(Default)]
struct Recording {
    color_target: Option<wgpu::TextureView>,
    depth_target: Option<wgpu::TextureView>,
    clear_color: Option<[f32; 4]>,
    clear_depth: Option<(f32, u8)>,
    draws: Vec<RecordedDraw>,
}

/// Immediate-mode recorder replayed by [`submit`](Self::submit).
pub struct WgpuContext {
    device: Arc<WgpuDevice>,
    bindings: Bindings,
    viewport: Option<Viewport>,
    recording: Recording,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
    constant_groups: HashMap<u64, wgpu::BindGroup>,
    material_groups: HashMap<(u64, u64), wgpu::BindGroup>,
}

impl WgpuContext {
    pub fn new(device: Arc<WgpuDevice>) -> Self {
        Self {
            device,
            bindings: Bindings {
                sample_mask: u32::MAX,
                ..Default::default()
            },
            viewport: None,
            recording: Recording::default(),
            pipelines: HashMap::new(),
            constant_groups: HashMap::new(),
            material_groups: HashMap::new(),
        }
    }

    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    /// Encodes and submits everything recorded since the last submit.
    ///
    /// Bindings persist across submits; the recording does not.
    pub fn submit(&mut self) {
        let recording = std::mem::take(&mut self.recording);
        let Some(color_target) = recording.color_target else {
            return;
        };

        let device = &self.device;
        let mut encoder = device
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Spinmesh Frame Encoder"),
            });

        {
            let color_load = match recording.clear_color {
                Some([r, g, b, a]) => wgpu::LoadOp::Clear(wgpu::Color {
                    r: r as f64,
                    g: g as f64,
                    b: b as f64,
                    a: a as f64,
                }),
                None => wgpu::LoadOp::Load,
            };
            let (depth_load, stencil_load) = match recording.clear_depth {
                Some((depth, stencil)) => (
                    wgpu::LoadOp::Clear(depth),
                    wgpu::LoadOp::Clear(stencil as u32),
                ),
                None => (wgpu::LoadOp::Load, wgpu::LoadOp::Load),
            };

            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Mesh Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &color_target,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: color_load,
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: recording.depth_target.as_ref().map(|view| {
                    wgpu::RenderPassDepthStencilAttachment {
                        view,
                        depth_ops: Some(wgpu::Operations {
                            load: depth_load,
                            store: wgpu::StoreOp::Store,
                        }),
                        stencil_ops: Some(wgpu::Operations {
                            load: stencil_load,
                            store: wgpu::StoreOp::Store,
                        }),
                    }
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            for draw in &recording.draws {
                if let Some(vp) = draw.viewport {
                    pass.set_viewport(vp.x, vp.y, vp.width, vp.height, vp.min_depth, vp.max_depth);
                }
                let [r, g, b, a] = draw.blend_constant;
                pass.set_blend_constant(wgpu::Color {
                    r: r as f64,
                    g: g as f64,
                    b: b as f64,
                    a: a as f64,
                });
                pass.set_stencil_reference(draw.stencil_ref);
                pass.set_pipeline(&draw.pipeline);
                pass.set_bind_group(0, &draw.constants, &[]);
                pass.set_bind_group(1, &draw.material, &[]);
                pass.set_vertex_buffer(0, draw.vertex_buffer.slice(draw.vertex_offset..));
                pass.set_index_buffer(draw.index_buffer.slice(draw.index_offset..), draw.index_format);
                pass.draw_indexed(draw.indices.clone(), draw.base_vertex, 0..1);
            }
        }

        device.queue.submit(std::iter::once(encoder.finish()));
    }

    fn pipeline(&mut self, key: PipelineKey) -> Result<wgpu::RenderPipeline, GpuError> {
        if let Some(pipeline) = self.pipelines.get(&key) {
            return Ok(pipeline.clone());
        }

        let b = &self.bindings;
        let (Some(vs), Some(ps), Some(layout), Some(blend), Some(depth), Some(raster)) = (
            &b.vertex_shader,
            &b.pixel_shader,
            &b.input_layout,
            &b.blend,
            &b.depth_stencil,
            &b.rasterizer,
        ) else {
            return Err(GpuError::MissingBinding("pipeline state"));
        };

        let device = &self.device;
        let pipeline = device.scoped("render pipeline", |raw| {
            raw.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("Mesh Pipeline"),
                layout: Some(&device.pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &vs.module,
                    entry_point: None,
                    buffers: &[wgpu::VertexBufferLayout {
                        array_stride: key.vertex_stride as wgpu::BufferAddress,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &layout.attributes,
                    }],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &ps.module,
                    entry_point: None,
                    targets: &[Some(wgpu::ColorTargetState {
                        format: device.color_format,
                        blend: blend.blend,
                        write_mask: blend.write_mask,
                    })],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: primitive_topology(key.topology),
                    strip_index_format: key.strip_index_format.map(index_format),
                    front_face: raster.front_face,
                    cull_mode: raster.cull_mode,
                    unclipped_depth: raster.unclipped_depth,
                    polygon_mode: raster.polygon_mode,
                    conservative: false,
                },
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: DEPTH_FORMAT,
                    depth_write_enabled: depth.depth_write_enabled,
                    depth_compare: depth.depth_compare,
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState {
                    count: 1,
                    mask: key.sample_mask as u64,
                    alpha_to_coverage_enabled: false,
                },
                multiview: None,
                cache: None,
            })
        })?;

        log::debug!("created pipeline for {key:?} ({} cached)", self.pipelines.len() + 1);
        self.pipelines.insert(key, pipeline.clone());
        Ok(pipeline)
    }

    fn constants_group(&mut self, buffer: &WgpuBuffer) -> wgpu::BindGroup {
        let device = &self.device;
        self.constant_groups
            .entry(buffer.id)
            .or_insert_with(|| {
                device.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("Scene Constants Bind Group"),
                    layout: &device.constants_layout,
                    entries: &[wgpu::BindGroupEntry {
                        binding: 0,
                        resource: buffer.buffer.as_entire_binding(),
                    }],
                })
            })
            .clone()
    }

    fn material_group(&mut self, texture: &WgpuTexture, sampler: &WgpuSampler) -> wgpu::BindGroup {
        let device = &self.device;
        self.material_groups
            .entry((texture.id, sampler.id))
            .or_insert_with(|| {
                device.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("Material Bind Group"),
                    layout: &device.material_layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: wgpu::BindingResource::TextureView(&texture.view),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: wgpu::BindingResource::Sampler(&sampler.sampler),
                        },
                    ],
                })
            })
            .clone()
    }
}

fn ensure_slot_zero(what: &str, slot: u32) -> bool {
    if slot != 0 {
        log::warn!("ignoring {what} bound to slot {slot}; only slot 0 is used");
        return false;
    }
    true
}

impl CommandContext for WgpuContext {
    type Device = WgpuDevice;
    type RenderTarget = wgpu::TextureView;
    type DepthStencil = wgpu::TextureView;

    fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = Some(viewport);
    }

    fn set_render_targets(&mut self, target: &wgpu::TextureView, depth: &wgpu::TextureView) {
        self.recording.color_target = Some(target.clone());
        self.recording.depth_target = Some(depth.clone());
    }

    fn clear_render_target(&mut self, target: &wgpu::TextureView, color: [f32; 4]) {
        if self.recording.color_target.is_none() {
            self.recording.color_target = Some(target.clone());
        }
        self.recording.clear_color = Some(color);
    }

    fn clear_depth_stencil(&mut self, depth: &wgpu::TextureView, value: f32, stencil: u8) {
        if self.recording.depth_target.is_none() {
            self.recording.depth_target = Some(depth.clone());
        }
        self.recording.clear_depth = Some((value, stencil));
    }

    fn update_buffer(&mut self, buffer: &WgpuBuffer, data: &[u8]) -> Result<(), GpuError> {
        if data.len() as u64 > buffer.size {
            return Err(GpuError::BufferOverflow {
                len: data.len() as u64,
                size: buffer.size,
            });
        }
        self.device.queue.write_buffer(&buffer.buffer, 0, data);
        Ok(())
    }

    fn set_blend_state(&mut self, state: &WgpuBlendState, blend_factor: [f32; 4], sample_mask: u32) {
        self.bindings.blend = Some(state.clone());
        self.bindings.blend_constant = blend_factor;
        self.bindings.sample_mask = sample_mask;
    }

    fn set_depth_stencil_state(&mut self, state: &WgpuDepthStencilState, stencil_ref: u32) {
        self.bindings.depth_stencil = Some(state.clone());
        self.bindings.stencil_ref = stencil_ref;
    }

    fn set_rasterizer_state(&mut self, state: &WgpuRasterizerState) {
        self.bindings.rasterizer = Some(state.clone());
    }

    fn set_input_layout(&mut self, layout: &WgpuInputLayout) {
        self.bindings.input_layout = Some(layout.clone());
    }

    fn set_vertex_buffer(&mut self, slot: u32, buffer: &WgpuBuffer, stride: u32, offset: u64) {
        if ensure_slot_zero("vertex buffer", slot) {
            self.bindings.vertex_buffer = Some((buffer.clone(), stride, offset));
        }
    }

    fn set_index_buffer(&mut self, buffer: &WgpuBuffer, format: IndexFormat, offset: u64) {
        self.bindings.index_buffer = Some((buffer.clone(), format, offset));
    }

    fn set_vertex_shader(&mut self, shader: &WgpuShader) {
        self.bindings.vertex_shader = Some(shader.clone());
    }

    fn set_pixel_shader(&mut self, shader: &WgpuShader) {
        self.bindings.pixel_shader = Some(shader.clone());
    }

    fn set_constant_buffer(&mut self, slot: u32, buffer: &WgpuBuffer) {
        if ensure_slot_zero("constant buffer", slot) {
            self.bindings.constant_buffer = Some(buffer.clone());
        }
    }

    fn set_texture(&mut self, slot: u32, texture: &WgpuTexture) {
        if ensure_slot_zero("texture", slot) {
            self.bindings.texture = Some(texture.clone());
        }
    }

    fn set_sampler(&mut self, slot: u32, sampler: &WgpuSampler) {
        if ensure_slot_zero("sampler", slot) {
            self.bindings.sampler = Some(sampler.clone());
        }
    }

    fn set_primitive_topology(&mut self, topology: PrimitiveTopology) {
        self.bindings.topology = Some(topology);
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        start_index: u32,
        base_vertex: i32,
    ) -> Result<(), GpuError> {
        let b = &self.bindings;
        let (vertex_buffer, stride, vertex_offset) = b
            .vertex_buffer
            .clone()
            .ok_or(GpuError::MissingBinding("vertex buffer"))?;
        let (index_buffer, format, index_offset) = b
            .index_buffer
            .clone()
            .ok_or(GpuError::MissingBinding("index buffer"))?;
        let constant_buffer = b
            .constant_buffer
            .clone()
            .ok_or(GpuError::MissingBinding("constant buffer"))?;
        let texture = b.texture.clone().ok_or(GpuError::MissingBinding("texture"))?;
        let sampler = b.sampler.clone().ok_or(GpuError::MissingBinding("sampler"))?;
        let topology = b.topology.ok_or(GpuError::MissingBinding("primitive topology"))?;
        let id = |v: Option<u64>, what| v.ok_or(GpuError::MissingBinding(what));

        let key = PipelineKey {
            vertex_shader: id(b.vertex_shader.as_ref().map(|s| s.id), "vertex shader")?,
            pixel_shader: id(b.pixel_shader.as_ref().map(|s| s.id), "pixel shader")?,
            input_layout: id(b.input_layout.as_ref().map(|l| l.id), "input layout")?,
            vertex_stride: stride,
            blend: id(b.blend.as_ref().map(|s| s.id), "blend state")?,
            depth_stencil: id(b.depth_stencil.as_ref().map(|s| s.id), "depth-stencil state")?,
            rasterizer: id(b.rasterizer.as_ref().map(|s| s.id), "rasterizer state")?,
            topology,
            strip_index_format: is_strip(topology).then_some(format),
            sample_mask: b.sample_mask,
        };
        let blend_constant = b.blend_constant;
        let stencil_ref = b.stencil_ref;

        let pipeline = self.pipeline(key)?;
        let constants = self.constants_group(&constant_buffer);
        let material = self.material_group(&texture, &sampler);

        self.recording.draws.push(RecordedDraw {
            pipeline,
            constants,
            material,
            vertex_buffer: vertex_buffer.buffer,
            vertex_offset,
            index_buffer: index_buffer.buffer,
            index_format: index_format(format),
            index_offset,
            indices: start_index..start_index + index_count,
            base_vertex,
            viewport: self.viewport,
            blend_constant,
            stencil_ref,
        });
        Ok(())
    }
}

/// Decodes WGSL text and checks it declares `entry` (`@vertex` or
/// `@fragment`).
fn wgsl_source<'a>(bytes: &'a [u8], entry: &str) -> Result<&'a str, GpuError> {
    let source = std::str::from_utf8(bytes)
        .map_err(|e| GpuError::InvalidShader(format!("shader is not UTF-8 WGSL: {e}")))?;
    if !source.contains(entry) {
        return Err(GpuError::InvalidShader(format!("no {entry} entry point")));
    }
    Ok(source)
}

/// Maps input elements to wgpu attributes, assigning shader locations in
/// element order. Each location must be declared by the vertex shader.
fn vertex_attributes(
    elements: &[InputElementDesc],
    vs_source: &str,
) -> Result<Vec<wgpu::VertexAttribute>, GpuError> {
    if elements.is_empty() {
        return Err(GpuError::creation("input layout", "no input elements"));
    }
    elements
        .iter()
        .enumerate()
        .map(|(location, element)| {
            let location = location as u32;
            if !vs_source.contains(&format!("@location({location})")) {
                return Err(GpuError::creation(
                    "input layout",
                    format!(
                        "vertex shader has no input at location {location} for {}",
                        element.semantic
                    ),
                ));
            }
            if element.slot != 0 {
                return Err(GpuError::creation(
                    "input layout",
                    format!("{} uses slot {}; only slot 0 is supported", element.semantic, element.slot),
                ));
            }
            Ok(wgpu::VertexAttribute {
                format: vertex_format(element.format),
                offset: element.offset as wgpu::BufferAddress,
                shader_location: location,
            })
        })
        .collect()
}

fn buffer_usage(usage: BufferUsage) -> wgpu::BufferUsages {
    let base = match usage {
        BufferUsage::Vertex => wgpu::BufferUsages::VERTEX,
        BufferUsage::Index => wgpu::BufferUsages::INDEX,
        BufferUsage::Constant => wgpu::BufferUsages::UNIFORM,
    };
    base | wgpu::BufferUsages::COPY_DST
}

fn vertex_format(format: VertexFormat) -> wgpu::VertexFormat {
    match format {
        VertexFormat::Float32x2 => wgpu::VertexFormat::Float32x2,
        VertexFormat::Float32x3 => wgpu::VertexFormat::Float32x3,
        VertexFormat::Float32x4 => wgpu::VertexFormat::Float32x4,
    }
}

fn index_format(format: IndexFormat) -> wgpu::IndexFormat {
    match format {
        IndexFormat::Uint16 => wgpu::IndexFormat::Uint16,
        IndexFormat::Uint32 => wgpu::IndexFormat::Uint32,
    }
}

fn is_strip(topology: PrimitiveTopology) -> bool {
    matches!(
        topology,
        PrimitiveTopology::LineStrip | PrimitiveTopology::TriangleStrip
    )
}

fn primitive_topology(topology: PrimitiveTopology) -> wgpu::PrimitiveTopology {
    match topology {
        PrimitiveTopology::PointList => wgpu::PrimitiveTopology::PointList,
        PrimitiveTopology::LineList => wgpu::PrimitiveTopology::LineList,
        PrimitiveTopology::LineStrip => wgpu::PrimitiveTopology::LineStrip,
        PrimitiveTopology::TriangleList => wgpu::PrimitiveTopology::TriangleList,
        PrimitiveTopology::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
    }
}

fn compare_function(func: CompareFunction) -> wgpu::CompareFunction {
    match func {
        CompareFunction::Never => wgpu::CompareFunction::Never,
        CompareFunction::Less => wgpu::CompareFunction::Less,
        CompareFunction::Equal => wgpu::CompareFunction::Equal,
        CompareFunction::LessEqual => wgpu::CompareFunction::LessEqual,
        CompareFunction::Greater => wgpu::CompareFunction::Greater,
        CompareFunction::NotEqual => wgpu::CompareFunction::NotEqual,
        CompareFunction::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
        CompareFunction::Always => wgpu::CompareFunction::Always,
    }
}

fn blend_factor(factor: BlendFactor) -> wgpu::BlendFactor {
    match factor {
        BlendFactor::Zero => wgpu::BlendFactor::Zero,
        BlendFactor::One => wgpu::BlendFactor::One,
        BlendFactor::SrcColor => wgpu::BlendFactor::Src,
        BlendFactor::OneMinusSrcColor => wgpu::BlendFactor::OneMinusSrc,
        BlendFactor::SrcAlpha => wgpu::BlendFactor::SrcAlpha,
        BlendFactor::OneMinusSrcAlpha => wgpu::BlendFactor::OneMinusSrcAlpha,
        BlendFactor::DstColor => wgpu::BlendFactor::Dst,
        BlendFactor::OneMinusDstColor => wgpu::BlendFactor::OneMinusDst,
        BlendFactor::DstAlpha => wgpu::BlendFactor::DstAlpha,
        BlendFactor::OneMinusDstAlpha => wgpu::BlendFactor::OneMinusDstAlpha,
    }
}

fn blend_op(op: BlendOp) -> wgpu::BlendOperation {
    match op {
        BlendOp::Add => wgpu::BlendOperation::Add,
        BlendOp::Subtract => wgpu::BlendOperation::Subtract,
        BlendOp::ReverseSubtract => wgpu::BlendOperation::ReverseSubtract,
        BlendOp::Min => wgpu::BlendOperation::Min,
        BlendOp::Max => wgpu::BlendOperation::Max,
    }
}

fn blend_state(desc: &BlendDesc) -> Option<wgpu::BlendState> {
    if !desc.enabled {
        return None;
    }
    let component = |c: crate::graphics::BlendComponent| wgpu::BlendComponent {
        src_factor: blend_factor(c.src),
        dst_factor: blend_factor(c.dst),
        operation: blend_op(c.op),
    };
    Some(wgpu::BlendState {
        color: component(desc.color),
        alpha: component(desc.alpha),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::Vertex3d;

    const VS: &str = "
        @group(0) @binding(0) var<uniform> scene: mat4x4<f32>;
        @vertex fn main(@location(0) p: vec3<f32>, @location(1) n: vec3<f32>,
                        @location(2) uv: vec2<f32>) -> @builtin(position) vec4<f32> {
            return scene * vec4<f32>(p, 1.0);
        }";

    #[test]
    fn opaque_blend_maps_to_replace() {
        assert_eq!(blend_state(&BlendDesc::OPAQUE), Some(wgpu::BlendState::REPLACE));

        let disabled = BlendDesc {
            enabled: false,
            ..BlendDesc::OPAQUE
        };
        assert_eq!(blend_state(&disabled), None);
    }

    #[test]
    fn input_layout_follows_vertex_shader_locations() {
        let attributes = vertex_attributes(&Vertex3d::INPUT_ELEMENTS, VS).unwrap();
        assert_eq!(
            attributes,
            [
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: 12,
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: 24,
                    shader_location: 2,
                    format: wgpu::VertexFormat::Float32x2,
                },
            ]
        );
    }

    #[test]
    fn input_layout_rejects_undeclared_location() {
        let vs = VS.replace("@location(2)", "@location(3)");
        let err = vertex_attributes(&Vertex3d::INPUT_ELEMENTS, &vs).unwrap_err();
        assert!(err.to_string().contains("location 2"));
    }

    #[test]
    fn shader_source_needs_its_entry_point() {
        assert!(wgsl_source(VS.as_bytes(), "@vertex").is_ok());
        assert!(matches!(
            wgsl_source(VS.as_bytes(), "@fragment"),
            Err(GpuError::InvalidShader(_))
        ));
        assert!(matches!(
            wgsl_source(&[0xff, 0xfe], "@vertex"),
            Err(GpuError::InvalidShader(_))
        ));
    }

    #[test]
    fn strip_topologies_need_an_index_format() {
        assert!(is_strip(PrimitiveTopology::TriangleStrip));
        assert!(!is_strip(PrimitiveTopology::TriangleList));
        assert_eq!(
            primitive_topology(PrimitiveTopology::LineStrip),
            wgpu::PrimitiveTopology::LineStrip
        );
    }

    #[test]
    fn buffers_are_writable() {
        assert!(buffer_usage(BufferUsage::Constant).contains(wgpu::BufferUsages::UNIFORM));
        assert!(buffer_usage(BufferUsage::Index).contains(wgpu::BufferUsages::COPY_DST));
    }
}
