use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{AssetError, GpuError};
use crate::graphics::RenderDevice;

/// Resolves material texture names to GPU textures.
///
/// Texture names from the mesh file are looked up relative to `search_dir`.
/// Each file is decoded once; materials without a texture, or whose texture
/// file does not exist, share a single 1×1 white texture.
pub struct TextureFactory<D: RenderDevice> {
    device: Arc<D>,
    search_dir: PathBuf,
    cache: HashMap<String, D::Texture>,
    default_texture: Option<D::Texture>,
}

impl<D: RenderDevice> TextureFactory<D> {
    pub fn new(device: Arc<D>, search_dir: impl Into<PathBuf>) -> Self {
        Self {
            device,
            search_dir: search_dir.into(),
            cache: HashMap::new(),
            default_texture: None,
        }
    }

    /// The shared white texture used by untextured materials.
    pub fn default_texture(&mut self) -> Result<D::Texture, GpuError> {
        if let Some(texture) = &self.default_texture {
            return Ok(texture.clone());
        }
        let texture = self.device.create_texture_rgba8(
            1,
            1,
            &[255, 255, 255, 255],
            "Default White Texture",
        )?;
        self.default_texture = Some(texture.clone());
        Ok(texture)
    }

    /// Texture for a material's texture name.
    ///
    /// A missing file falls back to the white texture; a file that exists but
    /// cannot be decoded is an error.
    pub fn texture_for(&mut self, name: Option<&str>) -> Result<D::Texture, AssetError> {
        let Some(name) = name.filter(|n| !n.is_empty()) else {
            return Ok(self.default_texture()?);
        };
        if let Some(texture) = self.cache.get(name) {
            return Ok(texture.clone());
        }

        let path = self.search_dir.join(file_name(name));
        if !path.is_file() {
            log::warn!(
                "texture {} not found, using default white texture",
                path.display()
            );
            let texture = self.default_texture()?;
            self.cache.insert(name.to_owned(), texture.clone());
            return Ok(texture);
        }

        let texture = self.load_file(&path)?;
        log::debug!("loaded texture {}", path.display());
        self.cache.insert(name.to_owned(), texture.clone());
        Ok(texture)
    }

    fn load_file(&self, path: &Path) -> Result<D::Texture, AssetError> {
        let img = image::open(path)
            .map_err(|source| AssetError::Image {
                path: path.to_owned(),
                source,
            })?
            .to_rgba8();
        let (width, height) = img.dimensions();
        let label = path.to_string_lossy();
        Ok(self
            .device
            .create_texture_rgba8(width, height, &img, &label)?)
    }
}

/// Mesh files store paths authored on another machine; keep only the file name.
fn file_name(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_device::TestDevice;

    #[test]
    fn strips_authoring_directories() {
        assert_eq!(file_name(r"C:\art\wood.png"), "wood.png");
        assert_eq!(file_name("textures/wood.png"), "wood.png");
        assert_eq!(file_name("wood.png"), "wood.png");
    }

    #[test]
    fn missing_texture_falls_back_to_white() {
        let device = TestDevice::new();
        let dir = tempfile::tempdir().unwrap();
        let mut factory = TextureFactory::new(device.clone(), dir.path());

        let white = factory.default_texture().unwrap();
        let missing = factory.texture_for(Some("nope.png")).unwrap();
        let none = factory.texture_for(None).unwrap();

        assert_eq!(white.id, missing.id);
        assert_eq!(white.id, none.id);
        assert_eq!(device.textures_created(), 1);
    }

    #[test]
    fn decodes_texture_once() {
        let device = TestDevice::new();
        let dir = tempfile::tempdir().unwrap();
        let img = image::RgbaImage::from_pixel(2, 3, image::Rgba([10, 20, 30, 255]));
        img.save(dir.path().join("checker.png")).unwrap();

        let mut factory = TextureFactory::new(device.clone(), dir.path());
        let a = factory.texture_for(Some(r"D:\src\checker.png")).unwrap();
        let b = factory.texture_for(Some(r"D:\src\checker.png")).unwrap();

        assert_eq!(a.id, b.id);
        assert_eq!((a.width, a.height), (2, 3));
        assert_eq!(device.textures_created(), 1);
    }

    #[test]
    fn corrupt_texture_is_an_error() {
        let device = TestDevice::new();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.png"), b"not a png").unwrap();

        let mut factory = TextureFactory::new(device, dir.path());
        assert!(matches!(
            factory.texture_for(Some("bad.png")),
            Err(AssetError::Image { .. })
        ));
    }
}
