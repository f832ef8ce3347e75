//! The spinning-mesh application core.
//!
//! [`SpinMain`] owns the scene, the frame timer, the shader loader, the model
//! and the renderer. The host drives it once per frame:
//!
//! ```ignore
//! main.poll_assets()?;
//! main.update();
//! if gpu.begin_frame()? {
//!     let rendered = main.render(&mut gpu)?;
//!     gpu.end_frame(rendered);
//! }
//! ```
//!
//! and forwards window resizes to [`SpinMain::on_window_size_changed`] and
//! device loss to the [`DeviceNotify`] implementation.

use std::time::Duration;

use crate::camera::SceneState;
use crate::config::{AppConfig, AssetPaths};
use crate::error::{AssetError, GpuError};
use crate::graphics::{DeviceNotify, DeviceResources, RenderDevice};
use crate::loader::{LoadStatus, ShaderLoader};
use crate::mesh::Model;
use crate::renderer::{FrameInputs, MeshRenderer};
use crate::texture::TextureFactory;
use crate::timer::StepTimer;

/// Whether device objects are currently usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Normal,
    DeviceLost,
}

pub struct SpinMain<D: RenderDevice> {
    assets: AssetPaths,
    timer: StepTimer,
    scene: SceneState,
    shaders: ShaderLoader<D>,
    model: Option<Model<D>>,
    renderer: MeshRenderer<D>,
    lifecycle: Lifecycle,
}

impl<D: RenderDevice> SpinMain<D> {
    /// Builds every resource and starts the shader loads.
    ///
    /// Blocks while the mesh file is read and uploaded; the shaders arrive
    /// later through [`poll_assets`](Self::poll_assets).
    pub fn new<R>(resources: &R, config: &AppConfig) -> Result<Self, AssetError>
    where
        R: DeviceResources<Device = D>,
    {
        let mut timer = StepTimer::new();
        timer.set_fixed_time_step(config.fixed_time_step);

        let mut main = Self {
            assets: config.assets.clone(),
            timer,
            scene: SceneState::new(resources.output_size(), resources.orientation_transform_3d()),
            shaders: ShaderLoader::new(),
            model: None,
            renderer: MeshRenderer::new(config.clear_color),
            lifecycle: Lifecycle::Normal,
        };
        main.create_device_dependent_resources(resources)?;
        main.create_window_size_dependent_resources(resources);
        main.timer.reset_elapsed_time();
        Ok(main)
    }

    /// Collects shader loads that finished since the last call.
    pub fn poll_assets(&mut self) -> Result<(), AssetError> {
        self.shaders.poll()
    }

    /// Ticks the timer and advances the scene for each update it yields.
    pub fn update(&mut self) {
        let scene = &mut self.scene;
        self.timer.tick(|time| scene.advance(time.elapsed_seconds));
    }

    /// Like [`update`](Self::update) with an explicit frame delta.
    pub fn update_by(&mut self, delta: Duration) {
        let scene = &mut self.scene;
        self.timer.advance(delta, |time| scene.advance(time.elapsed_seconds));
    }

    /// Renders one frame. `Ok(false)` means nothing was drawn: no update has
    /// run yet, the shaders are still loading, the device is lost or there
    /// is no back buffer.
    pub fn render<R>(&mut self, resources: &mut R) -> Result<bool, GpuError>
    where
        R: DeviceResources<Device = D>,
    {
        if self.lifecycle == Lifecycle::DeviceLost || self.timer.frame_count() == 0 {
            return Ok(false);
        }
        self.renderer.render(
            resources,
            FrameInputs {
                scene: &self.scene,
                shaders: &self.shaders,
                model: self.model.as_ref(),
            },
        )
    }

    /// Rebuilds the size-dependent transforms. Device objects are untouched.
    pub fn on_window_size_changed<R>(&mut self, resources: &R)
    where
        R: DeviceResources<Device = D>,
    {
        self.create_window_size_dependent_resources(resources);
        let size = resources.output_size();
        log::debug!("output resized to {}x{}", size.width, size.height);
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn scene(&self) -> &SceneState {
        &self.scene
    }

    pub fn timer(&self) -> &StepTimer {
        &self.timer
    }

    pub fn load_status(&self) -> LoadStatus {
        self.shaders.status()
    }

    pub fn model(&self) -> Option<&Model<D>> {
        self.model.as_ref()
    }

    fn create_device_dependent_resources<R>(&mut self, resources: &R) -> Result<(), AssetError>
    where
        R: DeviceResources<Device = D>,
    {
        let device = resources.device();
        self.shaders.start(
            device.clone(),
            &self.assets.vertex_shader,
            &self.assets.pixel_shader,
        )?;
        self.renderer.create_device_resources(&device)?;

        let mut textures = TextureFactory::new(device.clone(), self.assets.texture_dir());
        self.model = Some(Model::from_cmo_file(&*device, &self.assets.mesh, &mut textures)?);
        Ok(())
    }

    fn create_window_size_dependent_resources<R>(&mut self, resources: &R)
    where
        R: DeviceResources<Device = D>,
    {
        self.scene
            .rebuild(resources.output_size(), resources.orientation_transform_3d());
    }
}

impl<D, R> DeviceNotify<R> for SpinMain<D>
where
    D: RenderDevice,
    R: DeviceResources<Device = D>,
{
    fn on_device_lost(&mut self) {
        log::warn!("device lost, releasing device resources");
        self.shaders.release();
        self.model = None;
        self.renderer.release();
        self.lifecycle = Lifecycle::DeviceLost;
    }

    fn on_device_restored(&mut self, resources: &mut R) -> Result<(), AssetError> {
        self.create_device_dependent_resources(resources)?;
        self.create_window_size_dependent_resources(resources);
        // the mesh reload blocked; don't feed that stall into the rotation
        self.timer.reset_elapsed_time();
        self.lifecycle = Lifecycle::Normal;
        log::info!("device restored");
        Ok(())
    }
}
