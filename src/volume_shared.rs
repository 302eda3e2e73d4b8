//! State shared by every task belonging to one volume: its maps, its
//! dependency handles, its callback sink, and the loading-blocks sets
//! that deduplicate in-flight loads per LOD (spec.md §5/§6).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::allocator::ChunkAllocator;
use crate::config::VolumeConfig;
use crate::data::modifiers::ModifierStack;
use crate::data::DataLodMap;
use crate::dependency::DependencyRegistry;
use crate::loading_blocks::LoadingBlocks;
use crate::mesh::MeshLodMap;
use crate::output::VolumeCallbacks;
use crate::priority::ViewersSnapshot;
use crate::tasks::pool::TaskPool;

pub struct VolumeShared {
    pub config: VolumeConfig,
    pub data: DataLodMap,
    pub mesh: MeshLodMap,
    pub modifiers: ModifierStack,
    pub callbacks: Arc<dyn VolumeCallbacks>,
    pub loading_blocks: Vec<LoadingBlocks>,
    pub pool: Arc<TaskPool>,
    pub allocator: Arc<ChunkAllocator>,
    pub deps: DependencyRegistry,
    viewers: Mutex<Arc<ViewersSnapshot>>,
    /// Positions flagged for LOD propagation at LOD0 (spec.md §4.10),
    /// drained first by the update task each tick.
    pub blocks_pending_lodding_lod0: Mutex<Vec<crate::math::ChunkPos>>,
    /// Whether any currently registered viewer requires collisions,
    /// refreshed by the applier whenever it republishes the viewer
    /// snapshot; read by `MeshBlockTask` submission to set its
    /// `collision_hint` (spec.md §4.5.d/§4.12).
    collision_requested: AtomicBool,
}

impl VolumeShared {
    pub fn new(
        config: VolumeConfig,
        callbacks: Arc<dyn VolumeCallbacks>,
        pool: Arc<TaskPool>,
        deps: DependencyRegistry,
    ) -> Self {
        let lod_count = config.lod_count;
        let data = DataLodMap::new(lod_count, config.chunk_size).expect("validated config");
        let mesh = MeshLodMap::new(lod_count);
        let loading_blocks = (0..lod_count).map(|_| LoadingBlocks::new()).collect();
        Self {
            config,
            data,
            mesh,
            modifiers: ModifierStack::new(),
            callbacks,
            loading_blocks,
            pool,
            allocator: Arc::new(ChunkAllocator::new()),
            deps,
            viewers: Mutex::new(ViewersSnapshot::empty()),
            blocks_pending_lodding_lod0: Mutex::new(Vec::new()),
            collision_requested: AtomicBool::new(false),
        }
    }

    pub fn current_viewers(&self) -> Arc<ViewersSnapshot> {
        self.viewers.lock().clone()
    }

    pub fn publish_viewers(&self, snapshot: Arc<ViewersSnapshot>) {
        *self.viewers.lock() = snapshot;
    }

    pub fn set_collision_requested(&self, requested: bool) {
        self.collision_requested.store(requested, Ordering::Relaxed);
    }

    pub fn collision_requested(&self) -> bool {
        self.collision_requested.load(Ordering::Relaxed)
    }

    pub fn max_lod(&self) -> u8 {
        self.config.lod_count.saturating_sub(1)
    }

    pub fn loading_blocks(&self, lod: u8) -> &LoadingBlocks {
        &self.loading_blocks[lod as usize]
    }
}
