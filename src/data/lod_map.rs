//! `DataLodMap`: a fixed-size array of `DataMap`s, one per LOD (spec.md §3).

use crate::constants::core::MAX_LOD_COUNT;
use crate::error::{CoreError, CoreResult};

use super::map::DataMap;

pub struct DataLodMap {
    lods: Vec<DataMap>,
}

impl DataLodMap {
    pub fn new(lod_count: u8, block_size_po2: u32) -> CoreResult<Self> {
        if lod_count == 0 || lod_count > MAX_LOD_COUNT {
            return Err(CoreError::InvalidLodCount(lod_count));
        }
        let mut lods = Vec::with_capacity(lod_count as usize);
        for lod in 0..lod_count {
            lods.push(DataMap::new(block_size_po2, lod)?);
        }
        Ok(Self { lods })
    }

    pub fn lod_count(&self) -> u8 {
        self.lods.len() as u8
    }

    pub fn lod(&self, index: u8) -> CoreResult<&DataMap> {
        self.lods.get(index as usize).ok_or(CoreError::LodOutOfRange {
            lod: index,
            lod_count: self.lod_count(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_or_excessive_lod_count() {
        assert!(DataLodMap::new(0, 16).is_err());
        assert!(DataLodMap::new(33, 16).is_err());
        assert!(DataLodMap::new(32, 16).is_ok());
    }

    #[test]
    fn each_lod_map_carries_its_own_index() {
        let map = DataLodMap::new(4, 16).unwrap();
        for lod in 0..4 {
            assert_eq!(map.lod(lod).unwrap().lod_index(), lod);
        }
        assert!(map.lod(4).is_err());
    }
}
