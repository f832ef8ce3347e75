//! Graphics capabilities consumed by the renderer.
//!
//! The renderer never touches a concrete graphics API. Instead it is handed:
//!
//! - a [`RenderDevice`] for creating GPU objects (shared across threads so the
//!   asset loader can build shaders off the render thread),
//! - a [`CommandContext`] for binding state and issuing draws,
//! - a [`DeviceResources`] host tying both together with the presentation
//!   target, viewport and orientation queries.
//!
//! The descriptor types in this module are plain, hashable mirrors of the
//! state a backend needs. They double as cache keys for
//! [`StateCache`](crate::states::StateCache).
//!
//! The wgpu implementation lives in [`wgpu_backend`](crate::wgpu_backend).

use std::sync::Arc;

use glam::Mat4;

use crate::error::{AssetError, GpuError};

/// Blend factor applied to a source or destination term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstColor,
    OneMinusDstColor,
    DstAlpha,
    OneMinusDstAlpha,
}

/// Operation combining the weighted source and destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendOp {
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

/// One half (colour or alpha) of a blend equation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendComponent {
    pub src: BlendFactor,
    pub dst: BlendFactor,
    pub op: BlendOp,
}

impl BlendComponent {
    /// `src * 1 + dst * 0`.
    pub const REPLACE: Self = Self {
        src: BlendFactor::One,
        dst: BlendFactor::Zero,
        op: BlendOp::Add,
    };
}

/// Channel write mask for the colour target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColorWriteMask(pub u8);

impl ColorWriteMask {
    pub const RED: Self = Self(0b0001);
    pub const GREEN: Self = Self(0b0010);
    pub const BLUE: Self = Self(0b0100);
    pub const ALPHA: Self = Self(0b1000);
    pub const ALL: Self = Self(0b1111);
}

/// Output-merger blend state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendDesc {
    pub enabled: bool,
    pub color: BlendComponent,
    pub alpha: BlendComponent,
    pub write_mask: ColorWriteMask,
}

impl BlendDesc {
    /// Blending enabled with an additive `ONE`/`ZERO` equation, i.e. the
    /// source replaces the destination.
    pub const OPAQUE: Self = Self {
        enabled: true,
        color: BlendComponent::REPLACE,
        alpha: BlendComponent::REPLACE,
        write_mask: ColorWriteMask::ALL,
    };
}

/// Depth comparison function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareFunction {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

/// Depth/stencil test state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthStencilDesc {
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare: CompareFunction,
    pub stencil_enabled: bool,
}

impl DepthStencilDesc {
    /// Depth test and write on, `LessEqual`, stencil off.
    pub const DEPTH_DEFAULT: Self = Self {
        depth_test: true,
        depth_write: true,
        depth_compare: CompareFunction::LessEqual,
        stencil_enabled: false,
    };
}

/// Which faces are discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CullMode {
    None,
    Front,
    Back,
}

/// Triangle fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FillMode {
    Solid,
    Wireframe,
}

/// Rasterizer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RasterizerDesc {
    pub fill: FillMode,
    pub cull: CullMode,
    pub front_counter_clockwise: bool,
    pub depth_clip: bool,
    pub multisample: bool,
}

impl RasterizerDesc {
    /// Solid fill, back faces culled, depth clip and multisampling on.
    pub const CULL_BACK: Self = Self {
        fill: FillMode::Solid,
        cull: CullMode::Back,
        front_counter_clockwise: false,
        depth_clip: true,
        multisample: true,
    };
}

/// Format of one vertex attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    Float32x2,
    Float32x3,
    Float32x4,
}

impl VertexFormat {
    /// Size of the attribute in bytes.
    pub const fn size(self) -> u32 {
        match self {
            VertexFormat::Float32x2 => 8,
            VertexFormat::Float32x3 => 12,
            VertexFormat::Float32x4 => 16,
        }
    }
}

/// One entry of an input layout: where an attribute sits inside a vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InputElementDesc {
    pub semantic: &'static str,
    pub format: VertexFormat,
    pub offset: u32,
    pub slot: u32,
}

/// Width of the values in an index buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    Uint16,
    Uint32,
}

impl IndexFormat {
    pub const fn size(self) -> u64 {
        match self {
            IndexFormat::Uint16 => 2,
            IndexFormat::Uint32 => 4,
        }
    }
}

/// How indices are assembled into primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    TriangleList,
    TriangleStrip,
}

/// What a buffer is bound as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    Vertex,
    Index,
    Constant,
}

/// Buffer creation parameters.
#[derive(Debug, Clone)]
pub struct BufferDesc<'a> {
    pub label: &'a str,
    pub size: u64,
    pub usage: BufferUsage,
}

/// Texture filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterMode {
    Nearest,
    Linear,
}

/// Texture coordinate addressing outside `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressMode {
    Wrap,
    Clamp,
}

/// Sampler creation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerDesc {
    pub filter: FilterMode,
    pub address: AddressMode,
}

impl SamplerDesc {
    pub const LINEAR_WRAP: Self = Self {
        filter: FilterMode::Linear,
        address: AddressMode::Wrap,
    };
}

/// Rectangle of the render target that primitives are mapped into.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    /// Viewport covering a whole `width` × `height` target.
    pub fn full(width: f32, height: f32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width,
            height,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

/// Logical output size of the presentation target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutputSize {
    pub width: f32,
    pub height: f32,
}

impl OutputSize {
    /// Width over height. A degenerate height yields `1.0`.
    pub fn aspect_ratio(&self) -> f32 {
        if self.height > 0.0 {
            self.width / self.height
        } else {
            1.0
        }
    }
}

/// Creates GPU objects.
///
/// Implementations must be shareable across threads: the asset loader calls
/// the shader and buffer constructors from worker threads.
pub trait RenderDevice: Send + Sync + 'static {
    type VertexShader: Clone + Send + 'static;
    type PixelShader: Clone + Send + 'static;
    type InputLayout: Clone + Send + 'static;
    type Buffer: Clone + Send + 'static;
    type Texture: Clone + Send + 'static;
    type Sampler: Clone + Send + 'static;
    type BlendState: Clone + Send + 'static;
    type DepthStencilState: Clone + Send + 'static;
    type RasterizerState: Clone + Send + 'static;

    fn create_vertex_shader(&self, bytecode: &[u8]) -> Result<Self::VertexShader, GpuError>;

    fn create_pixel_shader(&self, bytecode: &[u8]) -> Result<Self::PixelShader, GpuError>;

    /// Builds an input layout, validated against the vertex shader bytecode
    /// it will be used with.
    fn create_input_layout(
        &self,
        elements: &[InputElementDesc],
        vs_bytecode: &[u8],
    ) -> Result<Self::InputLayout, GpuError>;

    /// Creates a buffer, optionally initialised with `contents`.
    fn create_buffer(
        &self,
        desc: &BufferDesc<'_>,
        contents: Option<&[u8]>,
    ) -> Result<Self::Buffer, GpuError>;

    /// Creates a sampled 2D texture from tightly packed RGBA8 pixels.
    fn create_texture_rgba8(
        &self,
        width: u32,
        height: u32,
        pixels: &[u8],
        label: &str,
    ) -> Result<Self::Texture, GpuError>;

    fn create_sampler(&self, desc: &SamplerDesc) -> Result<Self::Sampler, GpuError>;

    fn create_blend_state(&self, desc: &BlendDesc) -> Result<Self::BlendState, GpuError>;

    fn create_depth_stencil_state(
        &self,
        desc: &DepthStencilDesc,
    ) -> Result<Self::DepthStencilState, GpuError>;

    fn create_rasterizer_state(
        &self,
        desc: &RasterizerDesc,
    ) -> Result<Self::RasterizerState, GpuError>;
}

/// Immediate-mode command recording: bind state, then draw.
///
/// Bindings persist until overwritten. A draw uses whatever is bound at the
/// time it is issued.
pub trait CommandContext {
    type Device: RenderDevice;
    type RenderTarget;
    type DepthStencil;

    fn set_viewport(&mut self, viewport: Viewport);

    fn set_render_targets(&mut self, target: &Self::RenderTarget, depth: &Self::DepthStencil);

    fn clear_render_target(&mut self, target: &Self::RenderTarget, color: [f32; 4]);

    fn clear_depth_stencil(&mut self, depth: &Self::DepthStencil, value: f32, stencil: u8);

    /// Replaces the whole contents of `buffer` with `data`.
    fn update_buffer(
        &mut self,
        buffer: &<Self::Device as RenderDevice>::Buffer,
        data: &[u8],
    ) -> Result<(), GpuError>;

    fn set_blend_state(
        &mut self,
        state: &<Self::Device as RenderDevice>::BlendState,
        blend_factor: [f32; 4],
        sample_mask: u32,
    );

    fn set_depth_stencil_state(
        &mut self,
        state: &<Self::Device as RenderDevice>::DepthStencilState,
        stencil_ref: u32,
    );

    fn set_rasterizer_state(&mut self, state: &<Self::Device as RenderDevice>::RasterizerState);

    fn set_input_layout(&mut self, layout: &<Self::Device as RenderDevice>::InputLayout);

    fn set_vertex_buffer(
        &mut self,
        slot: u32,
        buffer: &<Self::Device as RenderDevice>::Buffer,
        stride: u32,
        offset: u64,
    );

    fn set_index_buffer(
        &mut self,
        buffer: &<Self::Device as RenderDevice>::Buffer,
        format: IndexFormat,
        offset: u64,
    );

    fn set_vertex_shader(&mut self, shader: &<Self::Device as RenderDevice>::VertexShader);

    fn set_pixel_shader(&mut self, shader: &<Self::Device as RenderDevice>::PixelShader);

    fn set_constant_buffer(&mut self, slot: u32, buffer: &<Self::Device as RenderDevice>::Buffer);

    fn set_texture(&mut self, slot: u32, texture: &<Self::Device as RenderDevice>::Texture);

    fn set_sampler(&mut self, slot: u32, sampler: &<Self::Device as RenderDevice>::Sampler);

    fn set_primitive_topology(&mut self, topology: PrimitiveTopology);

    /// Draws `index_count` indices starting at `start_index`, adding
    /// `base_vertex` to each index.
    fn draw_indexed(
        &mut self,
        index_count: u32,
        start_index: u32,
        base_vertex: i32,
    ) -> Result<(), GpuError>;
}

/// Per-frame borrow of the context and its output targets.
pub struct FrameTargets<'a, C: CommandContext> {
    pub context: &'a mut C,
    pub render_target: &'a C::RenderTarget,
    pub depth_stencil: &'a C::DepthStencil,
}

/// The host that owns the device, swapchain and depth buffer.
pub trait DeviceResources {
    type Device: RenderDevice;
    type Context: CommandContext<Device = Self::Device>;

    /// Shared handle to the current device. Replaced after a device loss.
    fn device(&self) -> Arc<Self::Device>;

    /// Context plus the current back buffer and depth target, or `None` when
    /// no back buffer is available this frame.
    fn frame_targets(&mut self) -> Option<FrameTargets<'_, Self::Context>>;

    /// Logical size of the output.
    fn output_size(&self) -> OutputSize;

    /// Viewport covering the whole output.
    fn screen_viewport(&self) -> Viewport;

    /// Rotation that corrects for the display orientation.
    fn orientation_transform_3d(&self) -> Mat4;
}

/// Listener notified by the host when its device goes away and comes back.
pub trait DeviceNotify<R: DeviceResources> {
    /// The device is gone. Release every object created from it.
    fn on_device_lost(&mut self);

    /// A new device is in place. Recreate everything released on loss.
    fn on_device_restored(&mut self, resources: &mut R) -> Result<(), AssetError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aspect_ratio_guards_zero_height() {
        let size = OutputSize {
            width: 800.0,
            height: 0.0,
        };
        assert_eq!(size.aspect_ratio(), 1.0);

        let size = OutputSize {
            width: 800.0,
            height: 600.0,
        };
        assert!((size.aspect_ratio() - 4.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn opaque_blend_replaces_destination() {
        let desc = BlendDesc::OPAQUE;
        assert!(desc.enabled);
        assert_eq!(desc.color.src, BlendFactor::One);
        assert_eq!(desc.color.dst, BlendFactor::Zero);
        assert_eq!(desc.alpha, desc.color);
        assert_eq!(desc.write_mask, ColorWriteMask::ALL);
    }
}
