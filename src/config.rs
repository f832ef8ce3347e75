use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::renderer::DEFAULT_CLEAR_COLOR;

/// Files loaded at startup and after every device restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetPaths {
    pub mesh: PathBuf,
    pub vertex_shader: PathBuf,
    pub pixel_shader: PathBuf,
}

impl Default for AssetPaths {
    fn default() -> Self {
        Self::in_dir("assets")
    }
}

impl AssetPaths {
    /// The default file names inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            mesh: dir.join("spinmesh.cmo"),
            vertex_shader: dir.join("mesh_vs.wgsl"),
            pixel_shader: dir.join("mesh_ps.wgsl"),
        }
    }

    /// Directory material textures are looked up in: the mesh's directory.
    pub fn texture_dir(&self) -> PathBuf {
        self.mesh
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub assets: AssetPaths,
    /// `None` runs one update per frame with the real elapsed time.
    pub fixed_time_step: Option<Duration>,
    pub log_filter: Option<String>,
    pub clear_color: [f32; 4],
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "Spinmesh".to_string(),
            width: 800,
            height: 600,
            assets: AssetPaths::default(),
            fixed_time_step: None,
            log_filter: None,
            clear_color: DEFAULT_CLEAR_COLOR,
        }
    }
}

impl AppConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn assets(mut self, assets: AssetPaths) -> Self {
        self.assets = assets;
        self
    }

    pub fn fixed_time_step(mut self, step: Duration) -> Self {
        self.fixed_time_step = Some(step);
        self
    }

    pub fn log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = Some(filter.into());
        self
    }

    pub fn clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_assets_live_in_assets_dir() {
        let paths = AssetPaths::default();
        assert_eq!(paths.mesh, Path::new("assets/spinmesh.cmo"));
        assert_eq!(paths.vertex_shader, Path::new("assets/mesh_vs.wgsl"));
        assert_eq!(paths.texture_dir(), Path::new("assets"));
    }

    #[test]
    fn builder_overrides_defaults() {
        let config = AppConfig::new()
            .title("Teapot")
            .size(1280, 720)
            .fixed_time_step(Duration::from_millis(16));
        assert_eq!(config.title, "Teapot");
        assert_eq!((config.width, config.height), (1280, 720));
        assert_eq!(config.fixed_time_step, Some(Duration::from_millis(16)));
        assert_eq!(config.clear_color, DEFAULT_CLEAR_COLOR);
    }
}
