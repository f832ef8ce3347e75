//! Cache of blend, depth-stencil and rasterizer state objects.
//!
//! State objects are created on first request for a descriptor tuple and
//! reused afterwards. The cache belongs to one device: it is cleared on
//! device loss together with every other device-dependent resource.

use std::collections::HashMap;

use crate::error::GpuError;
use crate::graphics::{BlendDesc, DepthStencilDesc, RasterizerDesc, RenderDevice};

/// Full fixed-function state for a draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateKey {
    pub blend: BlendDesc,
    pub depth_stencil: DepthStencilDesc,
    pub rasterizer: RasterizerDesc,
}

impl StateKey {
    /// State used for every mesh part: opaque blend, `LessEqual` depth,
    /// back-face culling.
    pub const MESH: Self = Self {
        blend: BlendDesc::OPAQUE,
        depth_stencil: DepthStencilDesc::DEPTH_DEFAULT,
        rasterizer: RasterizerDesc::CULL_BACK,
    };
}

/// State objects created for one [`StateKey`].
pub struct StateSet<D: RenderDevice> {
    pub blend: D::BlendState,
    pub depth_stencil: D::DepthStencilState,
    pub rasterizer: D::RasterizerState,
}

pub struct StateCache<D: RenderDevice> {
    sets: HashMap<StateKey, StateSet<D>>,
}

impl<D: RenderDevice> Default for StateCache<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: RenderDevice> StateCache<D> {
    pub fn new() -> Self {
        Self {
            sets: HashMap::new(),
        }
    }

    /// Returns the state objects for `key`, creating them on first use.
    pub fn get_or_create(&mut self, device: &D, key: &StateKey) -> Result<&StateSet<D>, GpuError> {
        if !self.sets.contains_key(key) {
            let set = StateSet {
                blend: device.create_blend_state(&key.blend)?,
                depth_stencil: device.create_depth_stencil_state(&key.depth_stencil)?,
                rasterizer: device.create_rasterizer_state(&key.rasterizer)?,
            };
            log::debug!("created state objects for {key:?}");
            self.sets.insert(*key, set);
        }
        Ok(&self.sets[key])
    }

    /// Drops every cached object.
    pub fn clear(&mut self) {
        self.sets.clear();
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphics::CullMode;
    use crate::test_device::TestDevice;

    #[test]
    fn reuses_objects_for_same_key() {
        let device = TestDevice::new();
        let mut cache = StateCache::new();

        let first = cache
            .get_or_create(&*device, &StateKey::MESH)
            .unwrap()
            .blend
            .id;
        let second = cache
            .get_or_create(&*device, &StateKey::MESH)
            .unwrap()
            .blend
            .id;

        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);
        assert_eq!(device.state_objects_created(), 3);
    }

    #[test]
    fn distinct_keys_get_distinct_objects() {
        let device = TestDevice::new();
        let mut cache = StateCache::new();
        let mut wire = StateKey::MESH;
        wire.rasterizer.cull = CullMode::None;

        cache.get_or_create(&*device, &StateKey::MESH).unwrap();
        cache.get_or_create(&*device, &wire).unwrap();
        assert_eq!(cache.len(), 2);

        cache.clear();
        assert!(cache.is_empty());
    }
}
