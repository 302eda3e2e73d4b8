//! Block-level and per-voxel sparse metadata.
//!
//! spec.md §3/§4.1: "optional per-block + per-voxel variant-typed metadata
//! (sparse map keyed by local position)". Modeled as a small closed
//! `Variant` enum (the teacher has no direct equivalent; this follows the
//! shape of `persistence::compression::CompressedData`-style plain data
//! structs elsewhere in the teacher, kept serde-derived so it can ride the
//! same wire format as everything else) rather than pulling in a
//! full dynamic-typing crate.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::math::LocalPos;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Variant {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, Default)]
pub struct BlockMetadata {
    block: Option<Variant>,
    per_voxel: HashMap<LocalPos, Variant>,
}

impl BlockMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block(&self) -> Option<&Variant> {
        self.block.as_ref()
    }

    pub fn set_block(&mut self, value: Option<Variant>) {
        self.block = value;
    }

    pub fn get_voxel(&self, pos: LocalPos) -> Option<&Variant> {
        self.per_voxel.get(&pos)
    }

    pub fn set_voxel(&mut self, pos: LocalPos, value: Option<Variant>) {
        match value {
            Some(v) => {
                self.per_voxel.insert(pos, v);
            }
            None => {
                self.per_voxel.remove(&pos);
            }
        }
    }

    pub fn len_sparse(&self) -> usize {
        self.per_voxel.len()
    }

    /// Copy per-voxel metadata whose local position lies within `[min, max)`
    /// in one axis-aligned swipe, offsetting into the destination metadata.
    pub fn copy_area(
        &self,
        min: (u16, u16, u16),
        max: (u16, u16, u16),
        dst: &mut BlockMetadata,
        dst_origin: (u16, u16, u16),
    ) {
        for (pos, value) in self.per_voxel.iter() {
            if pos.x >= min.0
                && pos.x < max.0
                && pos.y >= min.1
                && pos.y < max.1
                && pos.z >= min.2
                && pos.z < max.2
            {
                let dst_pos = LocalPos::new(
                    dst_origin.0 + (pos.x - min.0),
                    dst_origin.1 + (pos.1 - min.1),
                    dst_origin.2 + (pos.2 - min.2),
                );
                dst.set_voxel(dst_pos, Some(value.clone()));
            }
        }
    }

    /// Remove all per-voxel metadata inside `[min, max)`.
    pub fn clear_area(&mut self, min: (u16, u16, u16), max: (u16, u16, u16)) {
        self.per_voxel.retain(|pos, _| {
            !(pos.x >= min.0
                && pos.x < max.0
                && pos.y >= min.1
                && pos.y < max.1
                && pos.z >= min.2
                && pos.z < max.2)
        });
    }
}
