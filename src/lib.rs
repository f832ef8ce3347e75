//! # Spinmesh
//!
//! **A single textured mesh, spinning, drawn through an immediate-mode pipeline.**
//!
//! The core ([`SpinMain`]) is generic over three injected capabilities:
//!
//! - [`RenderDevice`] creates GPU objects and is shared with loader threads,
//! - [`CommandContext`] binds state and issues draws,
//! - [`DeviceResources`] is the host owning both plus the output targets.
//!
//! [`GpuContext`] is the wgpu/winit host used by the binary.
//!
//! ## Frame flow
//!
//! ```ignore
//! use spinmesh::*;
//!
//! let mut main = SpinMain::new(&gpu, &AppConfig::default())?;
//! loop {
//!     if gpu.is_device_lost() {
//!         gpu.handle_device_lost(&mut main)?;
//!     }
//!     main.poll_assets()?;
//!     main.update();
//!     if gpu.begin_frame()? {
//!         let rendered = main.render(&mut gpu)?;
//!         gpu.end_frame(rendered);
//!     }
//! }
//! ```
//!
//! Shaders load on worker threads; nothing is drawn until both stages are in
//! and the timer has ticked once. The mesh (`.cmo`) loads synchronously.

mod app;
pub mod camera;
pub mod cmo;
mod config;
mod error;
mod gpu;
mod graphics;
mod loader;
mod logging;
mod mesh;
mod renderer;
mod states;
mod texture;
mod timer;
mod wgpu_backend;

#[cfg(test)]
mod test_device;

pub use app::{Lifecycle, SpinMain};
pub use camera::{ConstantBufferData, SceneState, SceneTransforms};
pub use config::{AppConfig, AssetPaths};
pub use error::{AssetError, GpuError};
pub use gpu::GpuContext;
pub use graphics::{
    AddressMode, BlendComponent, BlendDesc, BlendFactor, BlendOp, BufferDesc, BufferUsage,
    ColorWriteMask, CommandContext, CompareFunction, CullMode, DepthStencilDesc, DeviceNotify,
    DeviceResources, FillMode, FilterMode, FrameTargets, IndexFormat, InputElementDesc,
    OutputSize, PrimitiveTopology, RasterizerDesc, RenderDevice, SamplerDesc, VertexFormat,
    Viewport,
};
pub use loader::{LoadStatus, PixelStage, ShaderLoader, VertexStage};
pub use logging::{LoggingConfig, init_logging};
pub use mesh::{Material, Mesh, MeshPart, Model, Vertex3d};
pub use renderer::{DEFAULT_CLEAR_COLOR, FrameInputs, MeshRenderer};
pub use states::{StateCache, StateKey, StateSet};
pub use texture::TextureFactory;
pub use timer::{FrameTime, StepTimer};
pub use wgpu_backend::{WgpuContext, WgpuDevice};

// Re-export glam math types for convenience
pub use glam::{Mat4, Vec3};
