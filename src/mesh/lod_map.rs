//! `MeshLodMap`: one `MeshMap` per LOD, mirroring `DataLodMap`.

use crate::error::{CoreError, CoreResult};

use super::map::MeshMap;

pub struct MeshLodMap {
    lods: Vec<MeshMap>,
}

impl MeshLodMap {
    pub fn new(lod_count: u8) -> Self {
        let lods = (0..lod_count).map(MeshMap::new).collect();
        Self { lods }
    }

    pub fn lod_count(&self) -> u8 {
        self.lods.len() as u8
    }

    pub fn lod(&self, index: u8) -> CoreResult<&MeshMap> {
        self.lods.get(index as usize).ok_or(CoreError::LodOutOfRange {
            lod: index,
            lod_count: self.lod_count(),
        })
    }
}
