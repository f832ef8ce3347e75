//! Asynchronous shader loading.
//!
//! [`ShaderLoader::start`] spawns one worker per shader stage. Each worker
//! reads its file, creates the GPU objects on the shared device and sends them
//! back to the render thread:
//!
//! - the vertex worker produces the vertex shader and the input layout,
//! - the pixel worker produces the pixel shader and the constant buffer.
//!
//! The render thread collects results in [`ShaderLoader::poll`]. The stages
//! complete independently and in no particular order. Completion is also
//! published through atomic flags ([`LoadStatus`]) for observers on other
//! threads.
//!
//! Loads cannot be cancelled. Every message carries the generation it was
//! started in; [`ShaderLoader::release`] bumps the generation, so a worker that
//! finishes after a device loss has its result (built on the old device)
//! dropped on arrival.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use crate::camera::ConstantBufferData;
use crate::error::AssetError;
use crate::graphics::{BufferDesc, BufferUsage, RenderDevice};
use crate::mesh::Vertex3d;

/// Vertex shader plus the input layout built from its bytecode.
pub struct VertexStage<D: RenderDevice> {
    pub shader: D::VertexShader,
    pub layout: D::InputLayout,
}

/// Pixel shader plus the constant buffer the shaders read.
pub struct PixelStage<D: RenderDevice> {
    pub shader: D::PixelShader,
    pub constant_buffer: D::Buffer,
}

/// Thread-safe view of which stages have finished loading.
#[derive(Clone, Debug, Default)]
pub struct LoadStatus {
    vertex: Arc<AtomicBool>,
    pixel: Arc<AtomicBool>,
}

impl LoadStatus {
    pub fn vertex_ready(&self) -> bool {
        self.vertex.load(Ordering::Acquire)
    }

    pub fn pixel_ready(&self) -> bool {
        self.pixel.load(Ordering::Acquire)
    }

    pub fn is_complete(&self) -> bool {
        self.vertex_ready() && self.pixel_ready()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Vertex,
    Pixel,
}

impl Stage {
    fn name(self) -> &'static str {
        match self {
            Stage::Vertex => "vertex shader",
            Stage::Pixel => "pixel shader",
        }
    }
}

enum Loaded<D: RenderDevice> {
    Vertex(VertexStage<D>),
    Pixel(PixelStage<D>),
}

struct Message<D: RenderDevice> {
    generation: u64,
    stage: Stage,
    result: Result<Loaded<D>, AssetError>,
}

struct Worker {
    stage: Stage,
    handle: JoinHandle<()>,
}

pub struct ShaderLoader<D: RenderDevice> {
    tx: flume::Sender<Message<D>>,
    rx: flume::Receiver<Message<D>>,
    generation: u64,
    workers: Vec<Worker>,
    vertex: Option<VertexStage<D>>,
    pixel: Option<PixelStage<D>>,
    status: LoadStatus,
}

impl<D: RenderDevice> Default for ShaderLoader<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: RenderDevice> ShaderLoader<D> {
    pub fn new() -> Self {
        let (tx, rx) = flume::unbounded();
        Self {
            tx,
            rx,
            generation: 0,
            workers: Vec::new(),
            vertex: None,
            pixel: None,
            status: LoadStatus::default(),
        }
    }

    /// Starts loading both stages on `device`. Returns immediately.
    ///
    /// Anything loaded or loading before is released first.
    pub fn start(
        &mut self,
        device: Arc<D>,
        vertex_shader: &Path,
        pixel_shader: &Path,
    ) -> Result<(), AssetError> {
        self.release();
        log::debug!("starting shader loads, generation {}", self.generation);

        let vs_device = device.clone();
        self.spawn(Stage::Vertex, vertex_shader, move |bytes| {
            let shader = vs_device.create_vertex_shader(bytes)?;
            let layout = vs_device.create_input_layout(&Vertex3d::INPUT_ELEMENTS, bytes)?;
            Ok(Loaded::Vertex(VertexStage { shader, layout }))
        })?;

        self.spawn(Stage::Pixel, pixel_shader, move |bytes| {
            let shader = device.create_pixel_shader(bytes)?;
            let constant_buffer = device.create_buffer(
                &BufferDesc {
                    label: "Scene Constants",
                    size: ConstantBufferData::SIZE,
                    usage: BufferUsage::Constant,
                },
                None,
            )?;
            Ok(Loaded::Pixel(PixelStage {
                shader,
                constant_buffer,
            }))
        })
    }

    /// Collects finished loads. A failed load is returned once as an error.
    pub fn poll(&mut self) -> Result<(), AssetError> {
        // Sample before draining: a worker that has exited has already sent.
        let exited: Vec<Stage> = self
            .workers
            .iter()
            .filter(|w| w.handle.is_finished())
            .map(|w| w.stage)
            .collect();

        while let Ok(message) = self.rx.try_recv() {
            if message.generation == self.generation {
                self.workers.retain(|w| w.stage != message.stage);
            } else {
                log::debug!(
                    "dropping {} from stale generation {}",
                    message.stage.name(),
                    message.generation
                );
                continue;
            }
            match message.result? {
                Loaded::Vertex(stage) => {
                    log::info!("vertex shader ready");
                    self.vertex = Some(stage);
                }
                Loaded::Pixel(stage) => {
                    log::info!("pixel shader ready");
                    self.pixel = Some(stage);
                }
            }
        }

        if let Some(worker) = self.workers.iter().find(|w| exited.contains(&w.stage)) {
            let stage = worker.stage;
            self.workers.retain(|w| w.stage != stage);
            return Err(AssetError::WorkerDisconnected(stage.name()));
        }
        Ok(())
    }

    pub fn vertex_stage(&self) -> Option<&VertexStage<D>> {
        self.vertex.as_ref()
    }

    pub fn pixel_stage(&self) -> Option<&PixelStage<D>> {
        self.pixel.as_ref()
    }

    /// Both stages collected and usable for drawing.
    pub fn is_ready(&self) -> bool {
        self.vertex.is_some() && self.pixel.is_some()
    }

    pub fn status(&self) -> LoadStatus {
        self.status.clone()
    }

    /// Generation of the most recent [`start`](Self::start).
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Drops loaded objects and abandons in-flight loads.
    pub fn release(&mut self) {
        self.vertex = None;
        self.pixel = None;
        self.workers.clear();
        self.status = LoadStatus::default();
        self.generation += 1;
    }

    fn spawn<F>(&mut self, stage: Stage, path: &Path, build: F) -> Result<(), AssetError>
    where
        F: FnOnce(&[u8]) -> Result<Loaded<D>, AssetError> + Send + 'static,
    {
        let tx = self.tx.clone();
        let generation = self.generation;
        let done = match stage {
            Stage::Vertex => self.status.vertex.clone(),
            Stage::Pixel => self.status.pixel.clone(),
        };
        let path: PathBuf = path.to_owned();
        let thread_path = path.clone();

        let handle = thread::Builder::new()
            .name(format!("spinmesh {} loader", stage.name()))
            .spawn(move || {
                let result = std::fs::read(&thread_path)
                    .map_err(|e| AssetError::io(&thread_path, e))
                    .and_then(|bytes| {
                        log::debug!("read {} ({} bytes)", thread_path.display(), bytes.len());
                        build(&bytes)
                    });
                if let Err(e) = &result {
                    log::error!("{} load failed: {e}", stage.name());
                }
                let ok = result.is_ok();
                let sent = tx
                    .send(Message {
                        generation,
                        stage,
                        result,
                    })
                    .is_ok();
                if sent && ok {
                    done.store(true, Ordering::Release);
                }
            })
            .map_err(|e| AssetError::io(path, e))?;

        self.workers.push(Worker { stage, handle });
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::test_device::{BAD_SHADER, TestDevice};
    use std::time::{Duration, Instant};

    pub(crate) struct ShaderFiles {
        pub dir: tempfile::TempDir,
        pub vs: PathBuf,
        pub ps: PathBuf,
    }

    pub(crate) fn shader_files(vs: &[u8], ps: &[u8]) -> ShaderFiles {
        let dir = tempfile::tempdir().unwrap();
        let vs_path = dir.path().join("mesh_vs.wgsl");
        let ps_path = dir.path().join("mesh_ps.wgsl");
        std::fs::write(&vs_path, vs).unwrap();
        std::fs::write(&ps_path, ps).unwrap();
        ShaderFiles {
            dir,
            vs: vs_path,
            ps: ps_path,
        }
    }

    /// Polls until both stages are ready or `poll` fails.
    pub(crate) fn wait_ready<D: RenderDevice>(
        loader: &mut ShaderLoader<D>,
    ) -> Result<(), AssetError> {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !loader.is_ready() {
            loader.poll()?;
            assert!(Instant::now() < deadline, "shader load timed out");
            thread::sleep(Duration::from_millis(1));
        }
        Ok(())
    }

    #[test]
    fn loads_both_stages() {
        let files = shader_files(b"vs", b"ps");
        let device = TestDevice::new();
        let mut loader = ShaderLoader::new();
        assert!(!loader.is_ready());

        loader.start(device.clone(), &files.vs, &files.ps).unwrap();
        wait_ready(&mut loader).unwrap();

        assert!(loader.status().is_complete());
        let pixel = loader.pixel_stage().unwrap();
        assert_eq!(pixel.constant_buffer.size, ConstantBufferData::SIZE);
        assert_eq!(pixel.constant_buffer.usage, BufferUsage::Constant);
        assert!(device.created(loader.vertex_stage().unwrap().layout.id));
    }

    #[test]
    fn shader_creation_failure_is_reported() {
        let files = shader_files(b"vs", BAD_SHADER);
        let mut loader = ShaderLoader::new();
        loader.start(TestDevice::new(), &files.vs, &files.ps).unwrap();

        let err = wait_ready(&mut loader).unwrap_err();
        assert!(matches!(err, AssetError::Gpu(_)));
        assert!(loader.pixel_stage().is_none());
        assert!(!loader.status().pixel_ready());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let files = shader_files(b"vs", b"ps");
        let missing = files.dir.path().join("missing.wgsl");
        let mut loader = ShaderLoader::new();
        loader.start(TestDevice::new(), &missing, &files.ps).unwrap();

        let err = wait_ready(&mut loader).unwrap_err();
        assert!(matches!(err, AssetError::Io { .. }));
    }

    #[test]
    fn results_from_an_older_generation_are_dropped() {
        let files = shader_files(b"vs", b"ps");
        let old_device = TestDevice::new();
        let new_device = TestDevice::new();
        let mut loader = ShaderLoader::new();

        loader.start(old_device.clone(), &files.vs, &files.ps).unwrap();
        let old_status = loader.status();
        let first = loader.generation();

        // Let the old workers deliver into the channel before restarting.
        let deadline = Instant::now() + Duration::from_secs(5);
        while !old_status.is_complete() {
            assert!(Instant::now() < deadline, "shader load timed out");
            thread::sleep(Duration::from_millis(1));
        }

        loader.start(new_device.clone(), &files.vs, &files.ps).unwrap();
        assert!(loader.generation() > first);
        wait_ready(&mut loader).unwrap();

        let vertex = loader.vertex_stage().unwrap();
        let pixel = loader.pixel_stage().unwrap();
        assert!(new_device.created(vertex.shader.id));
        assert!(new_device.created(pixel.constant_buffer.id));
        assert!(!old_device.created(vertex.shader.id));
    }

    #[test]
    fn release_discards_stages() {
        let files = shader_files(b"vs", b"ps");
        let mut loader = ShaderLoader::new();
        loader.start(TestDevice::new(), &files.vs, &files.ps).unwrap();
        let old_status = loader.status();
        wait_ready(&mut loader).unwrap();

        loader.release();
        assert!(!loader.is_ready());
        assert!(!loader.status().vertex_ready());
        assert!(old_status.is_complete());
    }
}
