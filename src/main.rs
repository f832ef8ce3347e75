use std::sync::Arc;

use anyhow::Context;
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use spinmesh::{AppConfig, GpuContext, LoggingConfig, SpinMain, WgpuDevice, init_logging};

enum App {
    Pending(AppConfig),
    Running {
        window: Arc<Window>,
        gpu: GpuContext,
        main: SpinMain<WgpuDevice>,
    },
    Failed,
}

impl App {
    fn start(config: &AppConfig, event_loop: &ActiveEventLoop) -> anyhow::Result<Self> {
        let attrs = Window::default_attributes()
            .with_title(&config.title)
            .with_inner_size(winit::dpi::LogicalSize::new(config.width, config.height));
        let window = Arc::new(
            event_loop
                .create_window(attrs)
                .context("failed to create window")?,
        );

        let gpu = GpuContext::new(window.clone()).context("failed to initialise GPU")?;
        let main = SpinMain::new(&gpu, config).context("failed to load assets")?;
        window.request_redraw();
        Ok(App::Running { window, gpu, main })
    }

    fn frame(gpu: &mut GpuContext, main: &mut SpinMain<WgpuDevice>) -> anyhow::Result<()> {
        if gpu.is_device_lost() {
            gpu.handle_device_lost(main)
                .context("failed to restore device")?;
        }

        main.poll_assets().context("asset load failed")?;
        main.update();

        if !gpu.begin_frame()? {
            return Ok(());
        }
        let rendered = main.render(gpu).context("render failed")?;
        gpu.end_frame(rendered);
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        log::error!("{err:#}");
        *self = App::Failed;
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if let App::Pending(config) = self {
            match App::start(config, event_loop) {
                Ok(running) => *self = running,
                Err(err) => self.fail(event_loop, err),
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let App::Running { window, gpu, main } = self else {
            return;
        };

        match event {
            WindowEvent::CloseRequested => {
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                gpu.resize(size.width, size.height);
                main.on_window_size_changed(&*gpu);
            }
            WindowEvent::RedrawRequested => {
                let result = App::frame(gpu, main);
                window.request_redraw();
                if let Err(err) = result {
                    self.fail(event_loop, err);
                }
            }
            _ => {}
        }
    }
}

fn main() -> anyhow::Result<()> {
    let config = AppConfig::default();
    init_logging(LoggingConfig {
        env_filter: config.log_filter.clone(),
        ..Default::default()
    });

    let event_loop = EventLoop::new().context("failed to create event loop")?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::Pending(config);
    event_loop.run_app(&mut app)?;

    if matches!(app, App::Failed) {
        anyhow::bail!("spinmesh exited after an error");
    }
    Ok(())
}
