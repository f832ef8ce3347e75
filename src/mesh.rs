//! GPU-resident model data: vertex format, meshes and mesh parts.
//!
//! A [`Model`] owns an ordered list of [`Mesh`]es; each mesh owns an ordered
//! list of [`MeshPart`]s plus the [`Material`]s its parts refer to. Everything
//! here is immutable after load. The whole model is thrown away and rebuilt
//! when the device is lost.
//!
//! # Vertex Layout
//!
//! The [`Vertex3d`] struct uses the following GPU layout (32 bytes per vertex):
//!
//! | Attribute | Format    | Offset | Shader Location |
//! |-----------|-----------|--------|-----------------|
//! | position  | Float32x3 | 0      | 0               |
//! | normal    | Float32x3 | 12     | 1               |
//! | uv        | Float32x2 | 24     | 2               |
//!
//! The same layout is exposed as [`Vertex3d::INPUT_ELEMENTS`], from which
//! each backend builds its input layout.

use std::path::Path;

use crate::cmo::{self, RawMesh, RawModel};
use crate::error::AssetError;
use crate::graphics::{
    BufferDesc, BufferUsage, IndexFormat, InputElementDesc, PrimitiveTopology, RenderDevice,
    VertexFormat,
};
use crate::texture::TextureFactory;

/// A vertex for 3D mesh rendering with position, normal, and texture coordinates.
///
/// Uses `#[repr(C)]` for a predictable memory layout and derives
/// [`bytemuck::Pod`] so vertex slices can be uploaded as bytes.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex3d {
    /// The 3D position of this vertex in model space.
    pub position: [f32; 3],
    /// The surface normal vector.
    pub normal: [f32; 3],
    /// Texture coordinates, typically in the range [0, 1].
    pub uv: [f32; 2],
}

impl Vertex3d {
    /// Byte stride between consecutive vertices.
    pub const STRIDE: u32 = std::mem::size_of::<Vertex3d>() as u32;

    /// Input layout for this vertex: three tightly packed attributes in slot 0.
    pub const INPUT_ELEMENTS: [InputElementDesc; 3] = [
        InputElementDesc {
            semantic: "POSITION",
            format: VertexFormat::Float32x3,
            offset: 0,
            slot: 0,
        },
        InputElementDesc {
            semantic: "NORMAL",
            format: VertexFormat::Float32x3,
            offset: 12,
            slot: 0,
        },
        InputElementDesc {
            semantic: "TEXCOORD",
            format: VertexFormat::Float32x2,
            offset: 24,
            slot: 0,
        },
    ];

    pub fn new(position: [f32; 3], normal: [f32; 3], uv: [f32; 2]) -> Self {
        Self {
            position,
            normal,
            uv,
        }
    }
}

/// Surface description shared by the parts of one mesh.
pub struct Material<D: RenderDevice> {
    pub name: String,
    /// Texture sampled by the pixel shader; a 1×1 white texture when the
    /// material has none.
    pub texture: D::Texture,
}

/// A drawable slice of a mesh: one topology, one material, one draw call.
pub struct MeshPart<D: RenderDevice> {
    pub vertex_buffer: D::Buffer,
    pub vertex_stride: u32,
    pub vertex_offset: u64,
    pub index_buffer: D::Buffer,
    pub index_format: IndexFormat,
    pub index_offset: u64,
    pub start_index: u32,
    pub index_count: u32,
    pub topology: PrimitiveTopology,
    /// Index into the owning mesh's materials.
    pub material: usize,
}

/// A named group of parts sharing a material table.
pub struct Mesh<D: RenderDevice> {
    pub name: String,
    pub parts: Vec<MeshPart<D>>,
    pub materials: Vec<Material<D>>,
}

impl<D: RenderDevice> Mesh<D> {
    /// Material used by `part`.
    pub fn material_for(&self, part: &MeshPart<D>) -> &Material<D> {
        &self.materials[part.material]
    }
}

/// All meshes loaded from one mesh file, in file order.
pub struct Model<D: RenderDevice> {
    pub meshes: Vec<Mesh<D>>,
}

impl<D: RenderDevice> Model<D> {
    /// Reads and uploads a compiled mesh file. Blocks the calling thread.
    pub fn from_cmo_file(
        device: &D,
        path: impl AsRef<Path>,
        textures: &mut TextureFactory<D>,
    ) -> Result<Self, AssetError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| AssetError::io(path, e))?;
        let model = Self::from_cmo_bytes(device, &bytes, textures)?;
        log::info!(
            "loaded mesh {} ({} meshes, {} parts)",
            path.display(),
            model.meshes.len(),
            model.part_count()
        );
        Ok(model)
    }

    /// Parses compiled mesh bytes and uploads them.
    pub fn from_cmo_bytes(
        device: &D,
        bytes: &[u8],
        textures: &mut TextureFactory<D>,
    ) -> Result<Self, AssetError> {
        let raw = cmo::parse(bytes)?;
        Self::from_raw(device, &raw, textures)
    }

    /// Uploads already parsed geometry.
    pub fn from_raw(
        device: &D,
        raw: &RawModel,
        textures: &mut TextureFactory<D>,
    ) -> Result<Self, AssetError> {
        let meshes = raw
            .meshes
            .iter()
            .map(|mesh| upload_mesh(device, mesh, textures))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { meshes })
    }

    /// Total number of parts across all meshes.
    pub fn part_count(&self) -> usize {
        self.meshes.iter().map(|m| m.parts.len()).sum()
    }
}

fn upload_mesh<D: RenderDevice>(
    device: &D,
    raw: &RawMesh,
    textures: &mut TextureFactory<D>,
) -> Result<Mesh<D>, AssetError> {
    let mut materials = Vec::with_capacity(raw.materials.len().max(1));
    for mat in &raw.materials {
        materials.push(Material {
            name: mat.name.clone(),
            texture: textures.texture_for(mat.texture.as_deref())?,
        });
    }
    if materials.is_empty() {
        materials.push(Material {
            name: String::from("default"),
            texture: textures.default_texture()?,
        });
    }

    let vertex_buffers = raw
        .vertex_buffers
        .iter()
        .map(|vertices| {
            device.create_buffer(
                &BufferDesc {
                    label: "Mesh Vertex Buffer",
                    size: std::mem::size_of_val(vertices.as_slice()) as u64,
                    usage: BufferUsage::Vertex,
                },
                Some(bytemuck::cast_slice(vertices)),
            )
        })
        .collect::<Result<Vec<_>, _>>()?;

    let index_buffers = raw
        .index_buffers
        .iter()
        .map(|indices| {
            device.create_buffer(
                &BufferDesc {
                    label: "Mesh Index Buffer",
                    size: std::mem::size_of_val(indices.as_slice()) as u64,
                    usage: BufferUsage::Index,
                },
                Some(bytemuck::cast_slice(indices)),
            )
        })
        .collect::<Result<Vec<_>, _>>()?;

    let parts = raw
        .submeshes
        .iter()
        .map(|sub| MeshPart {
            vertex_buffer: vertex_buffers[sub.vertex_buffer as usize].clone(),
            vertex_stride: Vertex3d::STRIDE,
            vertex_offset: 0,
            index_buffer: index_buffers[sub.index_buffer as usize].clone(),
            index_format: IndexFormat::Uint16,
            index_offset: 0,
            start_index: sub.start_index,
            index_count: sub.primitive_count * 3,
            topology: PrimitiveTopology::TriangleList,
            material: if raw.materials.is_empty() {
                0
            } else {
                sub.material as usize
            },
        })
        .collect();

    Ok(Mesh {
        name: raw.name.clone(),
        parts,
        materials,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmo::{RawMaterial, SubMesh};
    use crate::test_device::TestDevice;

    fn quad() -> Vec<Vertex3d> {
        vec![
            Vertex3d::new([-0.5, -0.5, 0.0], [0.0, 0.0, 1.0], [0.0, 0.0]),
            Vertex3d::new([0.5, -0.5, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0]),
            Vertex3d::new([0.5, 0.5, 0.0], [0.0, 0.0, 1.0], [1.0, 1.0]),
            Vertex3d::new([-0.5, 0.5, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0]),
        ]
    }

    #[test]
    fn vertex_layout_is_tightly_packed() {
        assert_eq!(Vertex3d::STRIDE, 32);
        let mut expected = 0;
        for element in Vertex3d::INPUT_ELEMENTS {
            assert_eq!(element.offset, expected);
            assert_eq!(element.slot, 0);
            expected += element.format.size();
        }
        assert_eq!(expected, Vertex3d::STRIDE);
    }

    #[test]
    fn upload_creates_parts_in_submesh_order() {
        let device = TestDevice::new();
        let mut textures = TextureFactory::new(device.clone(), std::env::temp_dir());
        let raw = RawModel {
            meshes: vec![RawMesh {
                name: "quad".into(),
                materials: vec![],
                submeshes: vec![
                    SubMesh {
                        material: 0,
                        index_buffer: 0,
                        vertex_buffer: 0,
                        start_index: 0,
                        primitive_count: 1,
                    },
                    SubMesh {
                        material: 0,
                        index_buffer: 0,
                        vertex_buffer: 0,
                        start_index: 3,
                        primitive_count: 1,
                    },
                ],
                index_buffers: vec![vec![0, 1, 2, 2, 3, 0]],
                vertex_buffers: vec![quad()],
                ..Default::default()
            }],
        };

        let model = Model::from_raw(&*device, &raw, &mut textures).unwrap();
        assert_eq!(model.part_count(), 2);

        let mesh = &model.meshes[0];
        assert_eq!(mesh.materials.len(), 1);
        assert_eq!(mesh.parts[0].start_index, 0);
        assert_eq!(mesh.parts[1].start_index, 3);
        assert!(mesh.parts.iter().all(|p| p.index_count == 3));
        assert!(mesh.parts.iter().all(|p| p.vertex_stride == 32));
        assert_eq!(mesh.parts[0].vertex_buffer.size, 4 * 32);
        assert_eq!(mesh.parts[0].index_buffer.size, 6 * 2);
    }

    #[test]
    fn untextured_materials_share_default_texture() {
        let device = TestDevice::new();
        let mut textures = TextureFactory::new(device.clone(), std::env::temp_dir());
        let material = |name: &str| RawMaterial {
            name: name.into(),
            texture: None,
        };
        let raw = RawModel {
            meshes: vec![RawMesh {
                name: "two".into(),
                materials: vec![material("a"), material("b")],
                ..Default::default()
            }],
        };

        let model = Model::from_raw(&*device, &raw, &mut textures).unwrap();
        let mats = &model.meshes[0].materials;
        assert_eq!(mats[0].texture.id, mats[1].texture.id);
        assert_eq!(mats[1].name, "b");
    }
}
