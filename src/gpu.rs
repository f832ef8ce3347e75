//! Window-backed GPU host.
//!
//! [`GpuContext`] owns the wgpu instance, adapter, surface and depth target
//! and hands the renderer a [`WgpuDevice`] and [`WgpuContext`] through the
//! [`DeviceResources`] trait.
//!
//! A frame is bracketed by [`begin_frame`](GpuContext::begin_frame), which
//! acquires the next surface texture, and [`end_frame`](GpuContext::end_frame),
//! which submits the recorded commands and presents.
//!
//! When the driver reports the device lost, [`GpuContext::is_device_lost`]
//! turns true. The owner then calls
//! [`handle_device_lost`](GpuContext::handle_device_lost), which tells the
//! listener to release its objects, builds a fresh device on the same adapter
//! and tells the listener to recreate them.

use std::sync::Arc;

use glam::Mat4;
use winit::window::Window;

use crate::error::{AssetError, GpuError};
use crate::graphics::{DeviceNotify, DeviceResources, FrameTargets, OutputSize, Viewport};
use crate::wgpu_backend::{DEPTH_FORMAT, WgpuContext, WgpuDevice};

struct AcquiredFrame {
    surface_texture: wgpu::SurfaceTexture,
    view: wgpu::TextureView,
}

pub struct GpuContext {
    window: Arc<Window>,
    instance: wgpu::Instance,
    surface: wgpu::Surface<'static>,
    adapter: wgpu::Adapter,
    device: Arc<WgpuDevice>,
    context: WgpuContext,
    config: wgpu::SurfaceConfiguration,
    depth_view: wgpu::TextureView,
    frame: Option<AcquiredFrame>,
}

impl GpuContext {
    /// Creates the instance, surface, adapter and device for `window`.
    pub fn new(window: Arc<Window>) -> Result<Self, GpuError> {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let surface = instance
            .create_surface(window.clone())
            .map_err(|e| GpuError::creation("surface", e))?;

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::default(),
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .map_err(|e| GpuError::creation("adapter", e))?;
        log::info!("using adapter {:?}", adapter.get_info().name);

        let surface_caps = surface.get_capabilities(&adapter);
        let format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .or(surface_caps.formats.first())
            .copied()
            .ok_or_else(|| GpuError::creation("surface", "no supported formats"))?;

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: surface_caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };

        let device = Arc::new(create_device(&adapter, format)?);
        surface.configure(device.raw(), &config);
        let depth_view = create_depth_view(device.raw(), &config);

        Ok(Self {
            window,
            instance,
            surface,
            adapter,
            context: WgpuContext::new(device.clone()),
            device,
            config,
            depth_view,
            frame: None,
        })
    }

    pub fn window(&self) -> &Arc<Window> {
        &self.window
    }

    /// Resizes the surface and depth target. Zero sizes (minimised window)
    /// are ignored.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.config.width = width;
        self.config.height = height;
        self.surface.configure(self.device.raw(), &self.config);
        self.depth_view = create_depth_view(self.device.raw(), &self.config);
    }

    pub fn width(&self) -> u32 {
        self.config.width
    }

    pub fn height(&self) -> u32 {
        self.config.height
    }

    pub fn is_device_lost(&self) -> bool {
        self.device.is_lost()
    }

    /// Acquires the next back buffer. `Ok(false)` means skip this frame.
    pub fn begin_frame(&mut self) -> Result<bool, GpuError> {
        let surface_texture = match self.surface.get_current_texture() {
            Ok(texture) => texture,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                log::debug!("surface outdated, reconfiguring");
                self.surface.configure(self.device.raw(), &self.config);
                return Ok(false);
            }
            Err(wgpu::SurfaceError::OutOfMemory) => return Err(GpuError::OutOfMemory),
            Err(e) => {
                log::warn!("skipping frame: {e}");
                return Ok(false);
            }
        };
        let view = surface_texture
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        self.frame = Some(AcquiredFrame {
            surface_texture,
            view,
        });
        Ok(true)
    }

    /// Submits the recorded work and presents when `rendered` is set;
    /// otherwise discards the back buffer.
    pub fn end_frame(&mut self, rendered: bool) {
        let Some(frame) = self.frame.take() else {
            return;
        };
        if rendered {
            self.context.submit();
            self.window.pre_present_notify();
            frame.surface_texture.present();
        }
    }

    /// Replaces a lost device and walks `listener` through loss and restore.
    pub fn handle_device_lost(
        &mut self,
        listener: &mut dyn DeviceNotify<Self>,
    ) -> Result<(), AssetError> {
        log::warn!("recreating device after loss");
        listener.on_device_lost();
        self.frame = None;

        let device = match create_device(&self.adapter, self.config.format) {
            Ok(device) => device,
            Err(e) => {
                log::warn!("adapter unusable ({e}), requesting a new one");
                self.adapter = pollster::block_on(self.instance.request_adapter(
                    &wgpu::RequestAdapterOptions {
                        power_preference: wgpu::PowerPreference::default(),
                        compatible_surface: Some(&self.surface),
                        force_fallback_adapter: false,
                    },
                ))
                .map_err(|e| GpuError::creation("adapter", e))?;
                create_device(&self.adapter, self.config.format)?
            }
        };
        self.device = Arc::new(device);
        self.context = WgpuContext::new(self.device.clone());
        self.surface.configure(self.device.raw(), &self.config);
        self.depth_view = create_depth_view(self.device.raw(), &self.config);

        listener.on_device_restored(self)
    }
}

impl DeviceResources for GpuContext {
    type Device = WgpuDevice;
    type Context = WgpuContext;

    fn device(&self) -> Arc<WgpuDevice> {
        self.device.clone()
    }

    fn frame_targets(&mut self) -> Option<FrameTargets<'_, WgpuContext>> {
        let frame = self.frame.as_ref()?;
        Some(FrameTargets {
            context: &mut self.context,
            render_target: &frame.view,
            depth_stencil: &self.depth_view,
        })
    }

    fn output_size(&self) -> OutputSize {
        OutputSize {
            width: self.config.width as f32,
            height: self.config.height as f32,
        }
    }

    fn screen_viewport(&self) -> Viewport {
        Viewport::full(self.config.width as f32, self.config.height as f32)
    }

    /// Desktop windows never rotate.
    fn orientation_transform_3d(&self) -> Mat4 {
        Mat4::IDENTITY
    }
}

fn create_device(adapter: &wgpu::Adapter, format: wgpu::TextureFormat) -> Result<WgpuDevice, GpuError> {
    let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
        label: Some("Spinmesh Device"),
        required_features: wgpu::Features::empty(),
        required_limits: wgpu::Limits::default(),
        memory_hints: Default::default(),
        trace: Default::default(),
        experimental_features: Default::default(),
    }))
    .map_err(|e| GpuError::creation("device", e))?;
    Ok(WgpuDevice::new(device, queue, format))
}

fn create_depth_view(device: &wgpu::Device, config: &wgpu::SurfaceConfiguration) -> wgpu::TextureView {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Depth Texture"),
        size: wgpu::Extent3d {
            width: config.width,
            height: config.height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: DEPTH_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    texture.create_view(&wgpu::TextureViewDescriptor::default())
}
