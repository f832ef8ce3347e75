//! Reader for compiled mesh object (`.cmo`) files.
//!
//! A CMO file is a little-endian sequence of meshes. Each mesh carries its
//! materials, a list of submeshes, 16-bit index buffers, vertex buffers,
//! optional skinning data and bounding extents, optionally followed by a
//! skeleton and animation clips:
//!
//! ```text
//! u32 mesh_count
//! mesh:
//!   string name
//!   u32 material_count, material[material_count]
//!   u8  has_skeleton
//!   u32 submesh_count,  submesh[submesh_count]       (5 × u32)
//!   u32 ib_count,       { u32 n, u16[n] }[ib_count]
//!   u32 vb_count,       { u32 n, vertex[n] }[vb_count] (52 bytes each)
//!   u32 skin_count,     { u32 n, skin[n] }[skin_count] (32 bytes each)
//!   extents                                          (10 × f32)
//!   [bones, clips]                                   (if has_skeleton)
//! string: u32 char count (including NUL), UTF-16LE chars
//! ```
//!
//! Parsing is CPU-only; [`Model`](crate::Model) uploads the result. File
//! vertices are repacked into [`Vertex3d`]: tangent and colour are dropped.
//! Skinning, skeleton and animation data are validated for size and skipped.

use crate::error::AssetError;
use crate::mesh::Vertex3d;

const MAX_TEXTURES: usize = 8;
const MATERIAL_BODY_SIZE: usize = 4 * (4 + 4 + 4 + 1 + 4 + 16);
const FILE_VERTEX_SIZE: usize = 52;
const SKINNING_VERTEX_SIZE: usize = 32;
const BONE_SIZE: usize = 4 + 3 * 64;
const CLIP_HEADER_SIZE: usize = 12;
const KEYFRAME_SIZE: usize = 4 + 4 + 64;

/// Material fields the renderer cares about.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawMaterial {
    pub name: String,
    /// File name of the first texture slot, if any.
    pub texture: Option<String>,
}

/// One draw range inside a mesh.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SubMesh {
    pub material: u32,
    pub index_buffer: u32,
    pub vertex_buffer: u32,
    pub start_index: u32,
    pub primitive_count: u32,
}

/// Bounding sphere and box of a mesh.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MeshExtents {
    pub center: [f32; 3],
    pub radius: f32,
    pub min: [f32; 3],
    pub max: [f32; 3],
}

/// A parsed mesh, still on the CPU.
#[derive(Clone, Debug, Default)]
pub struct RawMesh {
    pub name: String,
    pub materials: Vec<RawMaterial>,
    pub submeshes: Vec<SubMesh>,
    pub index_buffers: Vec<Vec<u16>>,
    pub vertex_buffers: Vec<Vec<Vertex3d>>,
    pub extents: MeshExtents,
    pub has_skeleton: bool,
}

/// Every mesh of a file, in file order.
#[derive(Clone, Debug, Default)]
pub struct RawModel {
    pub meshes: Vec<RawMesh>,
}

/// Parses a whole CMO file.
pub fn parse(bytes: &[u8]) -> Result<RawModel, AssetError> {
    let mut r = Reader::new(bytes);
    let mesh_count = r.u32()?;
    if mesh_count == 0 {
        return Err(AssetError::parse(0, "file contains no meshes"));
    }

    let mut meshes = Vec::with_capacity(mesh_count.min(64) as usize);
    for _ in 0..mesh_count {
        meshes.push(read_mesh(&mut r)?);
    }

    if r.remaining() > 0 {
        log::debug!("ignoring {} trailing bytes in mesh file", r.remaining());
    }
    Ok(RawModel { meshes })
}

fn read_mesh(r: &mut Reader<'_>) -> Result<RawMesh, AssetError> {
    let name = r.string()?;

    let material_count = r.u32()?;
    let mut materials = Vec::new();
    for _ in 0..material_count {
        materials.push(read_material(r)?);
    }

    let has_skeleton = r.u8()? != 0;

    let submesh_offset = r.offset();
    let submesh_count = r.u32()?;
    let mut submeshes = Vec::new();
    for _ in 0..submesh_count {
        submeshes.push(SubMesh {
            material: r.u32()?,
            index_buffer: r.u32()?,
            vertex_buffer: r.u32()?,
            start_index: r.u32()?,
            primitive_count: r.u32()?,
        });
    }

    let ib_count = r.u32()?;
    let mut index_buffers = Vec::new();
    for _ in 0..ib_count {
        let n = r.u32()? as usize;
        let len = n
            .checked_mul(2)
            .ok_or_else(|| r.error("index count overflow"))?;
        let bytes = r.take(len)?;
        index_buffers.push(
            bytes
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]))
                .collect(),
        );
    }

    let vb_count = r.u32()?;
    let mut vertex_buffers = Vec::new();
    for _ in 0..vb_count {
        let n = r.u32()? as usize;
        let len = n
            .checked_mul(FILE_VERTEX_SIZE)
            .ok_or_else(|| r.error("vertex count overflow"))?;
        let bytes = r.take(len)?;
        vertex_buffers.push(bytes.chunks_exact(FILE_VERTEX_SIZE).map(repack_vertex).collect());
    }

    let skin_count = r.u32()?;
    for _ in 0..skin_count {
        let n = r.u32()? as usize;
        let len = n
            .checked_mul(SKINNING_VERTEX_SIZE)
            .ok_or_else(|| r.error("skinning vertex count overflow"))?;
        r.skip(len)?;
    }

    let extents = MeshExtents {
        center: r.f32x3()?,
        radius: r.f32()?,
        min: r.f32x3()?,
        max: r.f32x3()?,
    };

    if has_skeleton {
        skip_skeleton(r)?;
    }

    let mesh = RawMesh {
        name,
        materials,
        submeshes,
        index_buffers,
        vertex_buffers,
        extents,
        has_skeleton,
    };
    validate(&mesh, submesh_offset)?;
    Ok(mesh)
}

fn read_material(r: &mut Reader<'_>) -> Result<RawMaterial, AssetError> {
    let name = r.string()?;
    // colours, specular power and uv transform
    r.skip(MATERIAL_BODY_SIZE)?;
    let _pixel_shader = r.string()?;

    let mut texture = None;
    for _ in 0..MAX_TEXTURES {
        let t = r.string()?;
        if texture.is_none() && !t.is_empty() {
            texture = Some(t);
        }
    }

    Ok(RawMaterial { name, texture })
}

fn skip_skeleton(r: &mut Reader<'_>) -> Result<(), AssetError> {
    let bone_count = r.u32()?;
    for _ in 0..bone_count {
        r.string()?;
        r.skip(BONE_SIZE)?;
    }

    let clip_count = r.u32()?;
    for _ in 0..clip_count {
        r.string()?;
        let header = r.take(CLIP_HEADER_SIZE)?;
        let keys = u32::from_le_bytes([header[8], header[9], header[10], header[11]]) as usize;
        let len = keys
            .checked_mul(KEYFRAME_SIZE)
            .ok_or_else(|| r.error("keyframe count overflow"))?;
        r.skip(len)?;
    }
    Ok(())
}

fn validate(mesh: &RawMesh, offset: usize) -> Result<(), AssetError> {
    for (i, sub) in mesh.submeshes.iter().enumerate() {
        if !mesh.materials.is_empty() && sub.material as usize >= mesh.materials.len() {
            return Err(AssetError::parse(
                offset,
                format!("submesh {i} of '{}' uses missing material {}", mesh.name, sub.material),
            ));
        }
        let Some(indices) = mesh.index_buffers.get(sub.index_buffer as usize) else {
            return Err(AssetError::parse(
                offset,
                format!("submesh {i} of '{}' uses missing index buffer {}", mesh.name, sub.index_buffer),
            ));
        };
        if mesh.vertex_buffers.get(sub.vertex_buffer as usize).is_none() {
            return Err(AssetError::parse(
                offset,
                format!("submesh {i} of '{}' uses missing vertex buffer {}", mesh.name, sub.vertex_buffer),
            ));
        }
        let end = sub.start_index as u64 + sub.primitive_count as u64 * 3;
        if end > indices.len() as u64 {
            return Err(AssetError::parse(
                offset,
                format!(
                    "submesh {i} of '{}' reads indices up to {end}, buffer holds {}",
                    mesh.name,
                    indices.len()
                ),
            ));
        }
    }
    Ok(())
}

fn repack_vertex(c: &[u8]) -> Vertex3d {
    let f = |at: usize| f32::from_le_bytes([c[at], c[at + 1], c[at + 2], c[at + 3]]);
    // position 0, normal 12, tangent 24, colour 40, uv 44
    Vertex3d::new([f(0), f(4), f(8)], [f(12), f(16), f(20)], [f(44), f(48)])
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn offset(&self) -> usize {
        self.pos
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn error(&self, message: &str) -> AssetError {
        AssetError::parse(self.pos, message)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], AssetError> {
        if len > self.remaining() {
            return Err(AssetError::parse(
                self.pos,
                format!("unexpected end of data: need {len} bytes, {} left", self.remaining()),
            ));
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn skip(&mut self, len: usize) -> Result<(), AssetError> {
        self.take(len).map(|_| ())
    }

    fn u8(&mut self) -> Result<u8, AssetError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, AssetError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn f32(&mut self) -> Result<f32, AssetError> {
        Ok(f32::from_bits(self.u32()?))
    }

    fn f32x3(&mut self) -> Result<[f32; 3], AssetError> {
        Ok([self.f32()?, self.f32()?, self.f32()?])
    }

    fn string(&mut self) -> Result<String, AssetError> {
        let chars = self.u32()? as usize;
        let len = chars
            .checked_mul(2)
            .ok_or_else(|| self.error("string length overflow"))?;
        let bytes = self.take(len)?;
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        let s = String::from_utf16_lossy(&units);
        Ok(s.trim_end_matches('\0').to_owned())
    }
}

/// Byte-level CMO writer for tests.
#[cfg(test)]
pub(crate) mod writer {
    use super::*;

    #[derive(Default)]
    pub struct CmoWriter {
        pub bytes: Vec<u8>,
    }

    impl CmoWriter {
        pub fn u8(&mut self, v: u8) -> &mut Self {
            self.bytes.push(v);
            self
        }

        pub fn u32(&mut self, v: u32) -> &mut Self {
            self.bytes.extend_from_slice(&v.to_le_bytes());
            self
        }

        pub fn f32(&mut self, v: f32) -> &mut Self {
            self.bytes.extend_from_slice(&v.to_le_bytes());
            self
        }

        pub fn string(&mut self, s: &str) -> &mut Self {
            let units: Vec<u16> = s.encode_utf16().chain(std::iter::once(0)).collect();
            self.u32(units.len() as u32);
            for u in units {
                self.bytes.extend_from_slice(&u.to_le_bytes());
            }
            self
        }

        pub fn material(&mut self, name: &str, texture: &str) -> &mut Self {
            self.string(name);
            for _ in 0..(MATERIAL_BODY_SIZE / 4) {
                self.f32(0.5);
            }
            self.string("");
            self.string(texture);
            for _ in 1..MAX_TEXTURES {
                self.string("");
            }
            self
        }

        pub fn vertex(&mut self, position: [f32; 3], uv: [f32; 2]) -> &mut Self {
            for p in position {
                self.f32(p);
            }
            for n in [0.0, 1.0, 0.0] {
                self.f32(n);
            }
            for t in [1.0, 0.0, 0.0, 1.0] {
                self.f32(t);
            }
            self.u32(0xffff_ffff);
            for t in uv {
                self.f32(t);
            }
            self
        }

        pub fn extents(&mut self) -> &mut Self {
            for _ in 0..10 {
                self.f32(1.0);
            }
            self
        }

        /// A single mesh with one vertex buffer of `vertex_count` vertices, one
        /// index buffer of `index_count` zero indices and one submesh per entry
        /// of `parts` (start index, primitive count).
        pub fn simple_mesh(
            &mut self,
            name: &str,
            vertex_count: u32,
            index_count: u32,
            parts: &[(u32, u32)],
        ) -> &mut Self {
            self.string(name);
            self.u32(1).material("mat", "");
            self.u8(0);
            self.u32(parts.len() as u32);
            for &(start, prims) in parts {
                self.u32(0).u32(0).u32(0).u32(start).u32(prims);
            }
            self.u32(1).u32(index_count);
            for _ in 0..index_count {
                self.bytes.extend_from_slice(&0u16.to_le_bytes());
            }
            self.u32(1).u32(vertex_count);
            for i in 0..vertex_count {
                self.vertex([i as f32, 0.0, 0.0], [0.0, 1.0]);
            }
            self.u32(0);
            self.extents()
        }
    }
}
