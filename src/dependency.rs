//! Dependency snapshots (spec.md §3/§5): immutable records referencing the
//! current generator/stream/mesher. Replacing any of them publishes a new
//! handle and marks the old one `invalid`, so every in-flight task still
//! holding the old `Arc` observes the flip without needing a lock —
//! mirroring `original_source/engine/priority_dependency.h`'s comment
//! that viewer/dependency reads are intentionally lock-free because a
//! stale read only costs one extra tick before self-cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::interfaces::{Generator, Mesher, Stream};

pub struct StreamingDependency {
    pub generator: Option<Arc<dyn Generator>>,
    pub stream: Option<Arc<dyn Stream>>,
    valid: AtomicBool,
}

impl StreamingDependency {
    pub fn new(generator: Option<Arc<dyn Generator>>, stream: Option<Arc<dyn Stream>>) -> Arc<Self> {
        Arc::new(Self {
            generator,
            stream,
            valid: AtomicBool::new(true),
        })
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::Release);
    }
}

pub struct MeshingDependency {
    pub mesher: Option<Arc<dyn Mesher>>,
    valid: AtomicBool,
}

impl MeshingDependency {
    pub fn new(mesher: Option<Arc<dyn Mesher>>) -> Arc<Self> {
        Arc::new(Self {
            mesher,
            valid: AtomicBool::new(true),
        })
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::Release);
    }
}

/// Holds the volume's current dependency handles and replaces them
/// atomically, invalidating the previous snapshot.
pub struct DependencyRegistry {
    streaming: parking_lot::Mutex<Arc<StreamingDependency>>,
    meshing: parking_lot::Mutex<Arc<MeshingDependency>>,
}

impl DependencyRegistry {
    pub fn new(streaming: Arc<StreamingDependency>, meshing: Arc<MeshingDependency>) -> Self {
        Self {
            streaming: parking_lot::Mutex::new(streaming),
            meshing: parking_lot::Mutex::new(meshing),
        }
    }

    pub fn streaming(&self) -> Arc<StreamingDependency> {
        self.streaming.lock().clone()
    }

    pub fn meshing(&self) -> Arc<MeshingDependency> {
        self.meshing.lock().clone()
    }

    pub fn replace_streaming(&self, new_dep: Arc<StreamingDependency>) {
        let mut slot = self.streaming.lock();
        slot.invalidate();
        *slot = new_dep;
    }

    pub fn replace_meshing(&self, new_dep: Arc<MeshingDependency>) {
        let mut slot = self.meshing.lock();
        slot.invalidate();
        *slot = new_dep;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replacing_streaming_invalidates_the_old_handle() {
        let dep_a = StreamingDependency::new(None, None);
        let dep_b = StreamingDependency::new(None, None);
        let registry = DependencyRegistry::new(dep_a.clone(), MeshingDependency::new(None));
        assert!(dep_a.is_valid());
        registry.replace_streaming(dep_b.clone());
        assert!(!dep_a.is_valid());
        assert!(dep_b.is_valid());
        assert!(Arc::ptr_eq(&registry.streaming(), &dep_b));
    }
}
