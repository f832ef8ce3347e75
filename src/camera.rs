//! Scene transforms and the constant-buffer payload.
//!
//! All matrices use glam's column-vector convention (`clip = proj * view *
//! world * v`) and are uploaded column-major, which is what WGSL's
//! `mat4x4<f32>` expects. That is the transposed form of the row-vector
//! product `world * view * proj`, so no extra transpose is needed at upload.

use glam::{Mat4, Vec3};

use crate::graphics::OutputSize;

/// Vertical field of view for landscape outputs (70 degrees).
pub const FOV_Y_DEGREES: f32 = 70.0;
/// Vertical field of view used when the output is taller than wide.
pub const PORTRAIT_FOV_Y: f32 = 2.0;
pub const Z_NEAR: f32 = 0.1;
pub const Z_FAR: f32 = 1000.0;

pub const EYE: Vec3 = Vec3::new(0.0, 0.7, 1.5);
pub const TARGET: Vec3 = Vec3::new(0.0, -0.1, 0.0);
pub const UP: Vec3 = Vec3::Y;

pub const MODEL_SCALE: f32 = 0.05;
pub const MODEL_TRANSLATION: Vec3 = Vec3::new(0.0, -10.0, -30.0);

/// Right-handed perspective for `aspect`, composed with the display
/// orientation correction.
pub fn projection(aspect: f32, orientation: Mat4) -> Mat4 {
    let fov_y = if aspect < 1.0 {
        PORTRAIT_FOV_Y
    } else {
        FOV_Y_DEGREES.to_radians()
    };
    orientation * Mat4::perspective_rh(fov_y, aspect, Z_NEAR, Z_FAR)
}

/// Fixed look-at camera.
pub fn view() -> Mat4 {
    Mat4::look_at_rh(EYE, TARGET, UP)
}

/// Model placement for an accumulated Y rotation in radians:
/// scale, then rotate, then translate.
pub fn world(rotation: f32) -> Mat4 {
    Mat4::from_translation(MODEL_TRANSLATION)
        * Mat4::from_rotation_y(rotation)
        * Mat4::from_scale(Vec3::splat(MODEL_SCALE))
}

/// GPU layout of the per-frame constant buffer.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ConstantBufferData {
    /// Model space to clip space.
    pub world_view_proj: [[f32; 4]; 4],
    /// Model space to world space.
    pub world: [[f32; 4]; 4],
}

impl ConstantBufferData {
    pub const SIZE: u64 = std::mem::size_of::<ConstantBufferData>() as u64;

    pub fn pack(transforms: &SceneTransforms) -> Self {
        Self {
            world_view_proj: transforms.world_view_proj().to_cols_array_2d(),
            world: transforms.world.to_cols_array_2d(),
        }
    }
}

impl Default for ConstantBufferData {
    fn default() -> Self {
        Self::pack(&SceneTransforms::default())
    }
}

/// The three matrices the renderer draws with.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SceneTransforms {
    pub world: Mat4,
    pub view: Mat4,
    pub proj: Mat4,
}

impl Default for SceneTransforms {
    fn default() -> Self {
        Self {
            world: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            proj: Mat4::IDENTITY,
        }
    }
}

impl SceneTransforms {
    pub fn world_view_proj(&self) -> Mat4 {
        self.proj * self.view * self.world
    }
}

/// CPU-side scene state: transforms, rotation accumulator and the constant
/// buffer mirror.
///
/// `proj` and `view` change only through [`rebuild`](Self::rebuild) (resize
/// and device restore); `world` changes through `rebuild` and
/// [`advance`](Self::advance). The mirror is repacked by both, so it always
/// reflects the latest call.
#[derive(Clone, Debug, Default)]
pub struct SceneState {
    transforms: SceneTransforms,
    rotation: f32,
    constants: ConstantBufferData,
}

impl SceneState {
    pub fn new(size: OutputSize, orientation: Mat4) -> Self {
        let mut state = Self::default();
        state.rebuild(size, orientation);
        state
    }

    /// Recomputes the size-dependent transforms and repacks the mirror.
    pub fn rebuild(&mut self, size: OutputSize, orientation: Mat4) {
        self.transforms.proj = projection(size.aspect_ratio(), orientation);
        self.transforms.view = view();
        self.transforms.world = world(self.rotation);
        self.constants = ConstantBufferData::pack(&self.transforms);
    }

    /// Advances the rotation by `elapsed_seconds` radians and repacks.
    pub fn advance(&mut self, elapsed_seconds: f64) {
        self.rotation += elapsed_seconds as f32;
        self.transforms.world = world(self.rotation);
        self.constants = ConstantBufferData::pack(&self.transforms);
    }

    pub fn rotation(&self) -> f32 {
        self.rotation
    }

    pub fn transforms(&self) -> &SceneTransforms {
        &self.transforms
    }

    pub fn constants(&self) -> &ConstantBufferData {
        &self.constants
    }
}
