//! Recording device used by the unit tests.
//!
//! Every object gets an id from a process-wide counter, so objects from two
//! devices never compare equal. The context records commands instead of
//! executing them.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use glam::Mat4;

use crate::error::GpuError;
use crate::graphics::{
    BlendDesc, BufferDesc, BufferUsage, CommandContext, DepthStencilDesc, DeviceResources,
    FrameTargets, IndexFormat, InputElementDesc, OutputSize, PrimitiveTopology, RasterizerDesc,
    RenderDevice, SamplerDesc, Viewport,
};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Shader bytes starting with this prefix fail to compile.
pub const BAD_SHADER: &[u8] = b"bad";

#[derive(Clone, Debug, PartialEq)]
pub struct TestHandle {
    pub id: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TestBuffer {
    pub id: u64,
    pub size: u64,
    pub usage: BufferUsage,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TestTexture {
    pub id: u64,
    pub width: u32,
    pub height: u32,
}

#[derive(Default)]
pub struct TestDevice {
    created: Mutex<HashSet<u64>>,
    textures: AtomicU64,
    states: AtomicU64,
}

impl TestDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Whether `id` was handed out by this device.
    pub fn created(&self, id: u64) -> bool {
        self.created.lock().unwrap().contains(&id)
    }

    pub fn textures_created(&self) -> u64 {
        self.textures.load(Ordering::Relaxed)
    }

    pub fn state_objects_created(&self) -> u64 {
        self.states.load(Ordering::Relaxed)
    }

    fn handle(&self) -> TestHandle {
        TestHandle { id: self.track() }
    }

    fn track(&self) -> u64 {
        let id = next_id();
        self.created.lock().unwrap().insert(id);
        id
    }

    fn shader(&self, bytecode: &[u8]) -> Result<TestHandle, GpuError> {
        if bytecode.is_empty() || bytecode.starts_with(BAD_SHADER) {
            return Err(GpuError::InvalidShader("rejected by test device".into()));
        }
        Ok(self.handle())
    }
}

impl RenderDevice for TestDevice {
    type VertexShader = TestHandle;
    type PixelShader = TestHandle;
    type InputLayout = TestHandle;
    type Buffer = TestBuffer;
    type Texture = TestTexture;
    type Sampler = TestHandle;
    type BlendState = TestHandle;
    type DepthStencilState = TestHandle;
    type RasterizerState = TestHandle;

    fn create_vertex_shader(&self, bytecode: &[u8]) -> Result<TestHandle, GpuError> {
        self.shader(bytecode)
    }

    fn create_pixel_shader(&self, bytecode: &[u8]) -> Result<TestHandle, GpuError> {
        self.shader(bytecode)
    }

    fn create_input_layout(
        &self,
        elements: &[InputElementDesc],
        vs_bytecode: &[u8],
    ) -> Result<TestHandle, GpuError> {
        if elements.is_empty() || vs_bytecode.is_empty() {
            return Err(GpuError::creation("input layout", "empty layout"));
        }
        Ok(self.handle())
    }

    fn create_buffer(
        &self,
        desc: &BufferDesc<'_>,
        contents: Option<&[u8]>,
    ) -> Result<TestBuffer, GpuError> {
        if let Some(data) = contents {
            assert_eq!(data.len() as u64, desc.size, "{} contents size", desc.label);
        }
        Ok(TestBuffer {
            id: self.track(),
            size: desc.size,
            usage: desc.usage,
        })
    }

    fn create_texture_rgba8(
        &self,
        width: u32,
        height: u32,
        pixels: &[u8],
        _label: &str,
    ) -> Result<TestTexture, GpuError> {
        assert_eq!(pixels.len(), (width * height * 4) as usize);
        self.textures.fetch_add(1, Ordering::Relaxed);
        Ok(TestTexture {
            id: self.track(),
            width,
            height,
        })
    }

    fn create_sampler(&self, _desc: &SamplerDesc) -> Result<TestHandle, GpuError> {
        Ok(self.handle())
    }

    fn create_blend_state(&self, _desc: &BlendDesc) -> Result<TestHandle, GpuError> {
        self.states.fetch_add(1, Ordering::Relaxed);
        Ok(self.handle())
    }

    fn create_depth_stencil_state(
        &self,
        _desc: &DepthStencilDesc,
    ) -> Result<TestHandle, GpuError> {
        self.states.fetch_add(1, Ordering::Relaxed);
        Ok(self.handle())
    }

    fn create_rasterizer_state(&self, _desc: &RasterizerDesc) -> Result<TestHandle, GpuError> {
        self.states.fetch_add(1, Ordering::Relaxed);
        Ok(self.handle())
    }
}

/// One recorded context call. Objects are identified by id.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Viewport(Viewport),
    RenderTargets { target: u64, depth: u64 },
    ClearColor([f32; 4]),
    ClearDepth { depth: f32, stencil: u8 },
    UpdateBuffer { id: u64, len: usize },
    Blend(u64),
    DepthStencil(u64),
    Rasterizer(u64),
    InputLayout(u64),
    VertexBuffer { slot: u32, id: u64, stride: u32, offset: u64 },
    IndexBuffer { id: u64, format: IndexFormat, offset: u64 },
    VertexShader(u64),
    PixelShader(u64),
    ConstantBuffer { slot: u32, id: u64 },
    Texture { slot: u32, id: u64 },
    Sampler { slot: u32, id: u64 },
    Topology(PrimitiveTopology),
    DrawIndexed { index_count: u32, start_index: u32, base_vertex: i32 },
}

impl Command {
    /// Object id referenced by this command, if any.
    pub fn object_id(&self) -> Option<u64> {
        match *self {
            Command::UpdateBuffer { id, .. }
            | Command::Blend(id)
            | Command::DepthStencil(id)
            | Command::Rasterizer(id)
            | Command::InputLayout(id)
            | Command::VertexBuffer { id, .. }
            | Command::IndexBuffer { id, .. }
            | Command::VertexShader(id)
            | Command::PixelShader(id)
            | Command::ConstantBuffer { id, .. }
            | Command::Texture { id, .. }
            | Command::Sampler { id, .. } => Some(id),
            _ => None,
        }
    }
}

#[derive(Default)]
pub struct TestContext {
    pub commands: Vec<Command>,
}

impl TestContext {
    /// Index counts of the recorded draws, in order.
    pub fn draw_counts(&self) -> Vec<u32> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                Command::DrawIndexed { index_count, .. } => Some(*index_count),
                _ => None,
            })
            .collect()
    }

    pub fn object_ids(&self) -> Vec<u64> {
        self.commands.iter().filter_map(Command::object_id).collect()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TestTarget {
    pub id: u64,
}

impl CommandContext for TestContext {
    type Device = TestDevice;
    type RenderTarget = TestTarget;
    type DepthStencil = TestTarget;

    fn set_viewport(&mut self, viewport: Viewport) {
        self.commands.push(Command::Viewport(viewport));
    }

    fn set_render_targets(&mut self, target: &TestTarget, depth: &TestTarget) {
        self.commands.push(Command::RenderTargets {
            target: target.id,
            depth: depth.id,
        });
    }

    fn clear_render_target(&mut self, _target: &TestTarget, color: [f32; 4]) {
        self.commands.push(Command::ClearColor(color));
    }

    fn clear_depth_stencil(&mut self, _depth: &TestTarget, value: f32, stencil: u8) {
        self.commands.push(Command::ClearDepth {
            depth: value,
            stencil,
        });
    }

    fn update_buffer(&mut self, buffer: &TestBuffer, data: &[u8]) -> Result<(), GpuError> {
        if data.len() as u64 > buffer.size {
            return Err(GpuError::BufferOverflow {
                len: data.len() as u64,
                size: buffer.size,
            });
        }
        self.commands.push(Command::UpdateBuffer {
            id: buffer.id,
            len: data.len(),
        });
        Ok(())
    }

    fn set_blend_state(&mut self, state: &TestHandle, _factor: [f32; 4], _mask: u32) {
        self.commands.push(Command::Blend(state.id));
    }

    fn set_depth_stencil_state(&mut self, state: &TestHandle, _stencil_ref: u32) {
        self.commands.push(Command::DepthStencil(state.id));
    }

    fn set_rasterizer_state(&mut self, state: &TestHandle) {
        self.commands.push(Command::Rasterizer(state.id));
    }

    fn set_input_layout(&mut self, layout: &TestHandle) {
        self.commands.push(Command::InputLayout(layout.id));
    }

    fn set_vertex_buffer(&mut self, slot: u32, buffer: &TestBuffer, stride: u32, offset: u64) {
        self.commands.push(Command::VertexBuffer {
            slot,
            id: buffer.id,
            stride,
            offset,
        });
    }

    fn set_index_buffer(&mut self, buffer: &TestBuffer, format: IndexFormat, offset: u64) {
        self.commands.push(Command::IndexBuffer {
            id: buffer.id,
            format,
            offset,
        });
    }

    fn set_vertex_shader(&mut self, shader: &TestHandle) {
        self.commands.push(Command::VertexShader(shader.id));
    }

    fn set_pixel_shader(&mut self, shader: &TestHandle) {
        self.commands.push(Command::PixelShader(shader.id));
    }

    fn set_constant_buffer(&mut self, slot: u32, buffer: &TestBuffer) {
        self.commands.push(Command::ConstantBuffer {
            slot,
            id: buffer.id,
        });
    }

    fn set_texture(&mut self, slot: u32, texture: &TestTexture) {
        self.commands.push(Command::Texture {
            slot,
            id: texture.id,
        });
    }

    fn set_sampler(&mut self, slot: u32, sampler: &TestHandle) {
        self.commands.push(Command::Sampler {
            slot,
            id: sampler.id,
        });
    }

    fn set_primitive_topology(&mut self, topology: PrimitiveTopology) {
        self.commands.push(Command::Topology(topology));
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        start_index: u32,
        base_vertex: i32,
    ) -> Result<(), GpuError> {
        self.commands.push(Command::DrawIndexed {
            index_count,
            start_index,
            base_vertex,
        });
        Ok(())
    }
}

/// Host with a swappable device and a fixed-size output.
pub struct TestResources {
    pub device: Arc<TestDevice>,
    pub context: TestContext,
    pub size: OutputSize,
    pub has_back_buffer: bool,
    target: TestTarget,
    depth: TestTarget,
}

impl TestResources {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            device: TestDevice::new(),
            context: TestContext::default(),
            size: OutputSize { width, height },
            has_back_buffer: true,
            target: TestTarget { id: next_id() },
            depth: TestTarget { id: next_id() },
        }
    }

    /// Replaces the device, as a host does after a device loss.
    pub fn replace_device(&mut self) -> Arc<TestDevice> {
        std::mem::replace(&mut self.device, TestDevice::new())
    }
}

impl DeviceResources for TestResources {
    type Device = TestDevice;
    type Context = TestContext;

    fn device(&self) -> Arc<TestDevice> {
        self.device.clone()
    }

    fn frame_targets(&mut self) -> Option<FrameTargets<'_, TestContext>> {
        if !self.has_back_buffer {
            return None;
        }
        Some(FrameTargets {
            context: &mut self.context,
            render_target: &self.target,
            depth_stencil: &self.depth,
        })
    }

    fn output_size(&self) -> OutputSize {
        self.size
    }

    fn screen_viewport(&self) -> Viewport {
        Viewport::full(self.size.width, self.size.height)
    }

    fn orientation_transform_3d(&self) -> Mat4 {
        Mat4::IDENTITY
    }
}
