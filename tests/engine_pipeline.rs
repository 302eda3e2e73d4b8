//! End-to-end exercise of `VoxelEngine::process` against a toy
//! generator/stream/mesher, matching spec.md §8's scenario shapes
//! (startup load, drop on distance, save on unload, dependency
//! invalidation) from outside the crate rather than against internal
//! types, the way the teacher's `tests/` integration suite drives
//! `World`/`SaveManager` through their public API only.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;

use voxel_core::config::VolumeConfig;
use voxel_core::interfaces::{
    BlockQuery, Generator, MaxLodHint, Mesher, MesherInputs, MeshOutput, Stream, StreamError,
};
use voxel_core::output::{BlockDataOutput, BlockDataType, BlockMeshOutput, BlockMeshType, VolumeCallbacks};
use voxel_core::viewer::ViewerFlags;
use voxel_core::voxel::buffer::CHANNEL_SDF;
use voxel_core::voxel::channel::{ChannelDepth, ChannelKind};
use voxel_core::voxel::VoxelBuffer;
use voxel_core::wire;
use voxel_core::VoxelEngine;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Fills the block with a flat SDF: negative (solid) at `y < 4`,
/// positive (air) above, so every generated chunk meshes to something.
struct FlatGroundGenerator {
    calls: AtomicUsize,
}

impl Generator for FlatGroundGenerator {
    fn generate_block(&self, buffer: &mut VoxelBuffer, origin_in_voxels: glam::IVec3, _lod: u8) -> MaxLodHint {
        self.calls.fetch_add(1, Ordering::SeqCst);
        buffer
            .set_channel_depth(CHANNEL_SDF, ChannelDepth::Bits16, ChannelKind::Sdf, 0)
            .unwrap();
        let size = buffer.size();
        for x in 0..size.x {
            for y in 0..size.y {
                for z in 0..size.z {
                    let world_y = origin_in_voxels.y + y as i32;
                    let value: i16 = if world_y < 4 { -100 } else { 100 };
                    buffer
                        .set_voxel(glam::UVec3::new(x, y, z), value as u64 & 0xFFFF, CHANNEL_SDF)
                        .unwrap();
                }
            }
        }
        MaxLodHint::default()
    }
}

/// A file-backed `Stream`: one zstd-compressed file per `(position, lod)`
/// under a temp directory, round-tripped through `wire.rs`'s manual
/// serializer rather than a generic serde format, matching spec.md §6's
/// "compressed chunk payloads" persistence shape.
struct FileStream {
    dir: TempDir,
    saves: AtomicUsize,
}

impl FileStream {
    fn new() -> Self {
        Self {
            dir: TempDir::new().expect("create temp dir for voxel stream"),
            saves: AtomicUsize::new(0),
        }
    }

    fn path_for(&self, query: &BlockQuery) -> PathBuf {
        self.dir.path().join(format!(
            "{}_{}_{}_{}.chunk",
            query.position.x, query.position.y, query.position.z, query.lod
        ))
    }
}

impl Stream for FileStream {
    fn load_voxel_block(&self, query: &BlockQuery) -> Result<VoxelBuffer, StreamError> {
        let path = self.path_for(query);
        let bytes = std::fs::read(&path).map_err(|_| StreamError::NotFound)?;
        wire::decompress_and_deserialize(&bytes).map_err(|e| StreamError::Backend(anyhow::anyhow!(e.to_string())))
    }

    fn save_voxel_block(&self, query: &BlockQuery, buffer: &VoxelBuffer) -> Result<(), StreamError> {
        let bytes = wire::compress_and_serialize(buffer, wire::CompressionKind::Zstd)
            .map_err(|e| StreamError::Backend(anyhow::anyhow!(e.to_string())))?;
        std::fs::write(self.path_for(query), bytes).map_err(|e| StreamError::Backend(anyhow::anyhow!(e)))?;
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Produces one degenerate triangle per mesh block whose neighbor grid
/// contains any solid (negative SDF) voxel, standing in for a real
/// surface extraction algorithm (out of scope per spec.md §4.3/§1).
struct StubMesher;

impl Mesher for StubMesher {
    fn build(&self, inputs: &MesherInputs<'_>) -> MeshOutput {
        let mut output = MeshOutput::default();
        let has_solid = inputs.neighbor_buffers.iter().any(|buf| {
            let size = buf.size();
            (0..size.x).any(|x| {
                (0..size.y).any(|y| {
                    (0..size.z).any(|z| {
                        buf.get_voxel(glam::UVec3::new(x, y, z), CHANNEL_SDF)
                            .map(|v| (v as i16) < 0)
                            .unwrap_or(false)
                    })
                })
            })
        });
        if has_solid {
            let mut surface = voxel_core::interfaces::Surface::default();
            surface.positions = vec![glam::Vec3::ZERO, glam::Vec3::X, glam::Vec3::Y];
            surface.indices = vec![0, 1, 2];
            output.main.push(surface);
            output.primitive_type = Some(voxel_core::interfaces::PrimitiveType::Triangles);
        }
        output
    }
}

#[derive(Default)]
struct RecordingCallbacks {
    loaded: AtomicUsize,
    generated: AtomicUsize,
    saved: AtomicUsize,
    meshed: AtomicUsize,
    dropped_data: AtomicUsize,
    unloaded: Mutex<Vec<(glam::IVec3, u8)>>,
}

impl VolumeCallbacks for RecordingCallbacks {
    fn on_data_output(&self, output: BlockDataOutput) {
        if output.dropped {
            self.dropped_data.fetch_add(1, Ordering::SeqCst);
            return;
        }
        match output.kind {
            BlockDataType::Loaded => {
                self.loaded.fetch_add(1, Ordering::SeqCst);
            }
            BlockDataType::Generated => {
                self.generated.fetch_add(1, Ordering::SeqCst);
            }
            BlockDataType::Saved => {
                self.saved.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn on_mesh_output(&self, output: BlockMeshOutput) {
        if output.kind == BlockMeshType::Meshed {
            self.meshed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn on_block_unloaded(&self, position: voxel_core::math::ChunkPos, lod: u8) {
        self.unloaded.lock().unwrap().push((position.into(), lod));
    }
}

fn small_config() -> VolumeConfig {
    let mut cfg = VolumeConfig::default();
    cfg.chunk_size = 16;
    cfg.mesh_block_size = 16;
    cfg.lod_count = 2;
    cfg.lod_distance = 48.0;
    cfg.view_distance = 64.0;
    cfg
}

fn run_ticks(engine: &mut VoxelEngine, n: usize) {
    for _ in 0..n {
        engine.process();
        std::thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn startup_populates_ground_chunks_near_viewer() {
    init_logging();
    let callbacks = Arc::new(RecordingCallbacks::default());
    let generator = Arc::new(FlatGroundGenerator { calls: AtomicUsize::new(0) });
    let stream = Arc::new(FileStream::new());
    let mesher = Arc::new(StubMesher);

    let mut engine = VoxelEngine::with_worker_threads(4);
    let volume = engine
        .add_volume(small_config(), callbacks.clone(), Some(generator.clone()), Some(stream.clone()), Some(mesher))
        .unwrap();
    engine.add_viewer(glam::Vec3::ZERO, 64.0, ViewerFlags::default());

    run_ticks(&mut engine, 20);

    assert!(generator.calls.load(Ordering::SeqCst) > 0, "expected at least one generate call near the viewer");
    assert!(callbacks.generated.load(Ordering::SeqCst) > 0, "expected at least one GENERATED data output");
    assert!(callbacks.meshed.load(Ordering::SeqCst) > 0, "expected at least one MESHED mesh output");

    let _ = engine.volume_shared(volume).unwrap();
}

#[test]
fn edit_then_unload_saves_modified_chunk() {
    init_logging();
    let callbacks = Arc::new(RecordingCallbacks::default());
    let generator = Arc::new(FlatGroundGenerator { calls: AtomicUsize::new(0) });
    let stream = Arc::new(FileStream::new());
    let mesher = Arc::new(StubMesher);

    let mut engine = VoxelEngine::with_worker_threads(4);
    let volume = engine
        .add_volume(small_config(), callbacks.clone(), Some(generator), Some(stream.clone()), Some(mesher))
        .unwrap();
    let viewer = engine.add_viewer(glam::Vec3::ZERO, 64.0, ViewerFlags::default());

    run_ticks(&mut engine, 15);

    let origin = voxel_core::math::ChunkPos::new(0, 0, 0);
    let voxels = engine
        .data_block_voxels(volume, origin, 0)
        .unwrap()
        .expect("LOD0 origin chunk should be resident after startup streaming");
    {
        let mut guard = voxels.write();
        guard.set_voxel(glam::UVec3::new(8, 8, 8), (-100i16) as u64 & 0xFFFF, CHANNEL_SDF).unwrap();
    }
    engine.post_edit_area(volume, &[origin]).unwrap();
    run_ticks(&mut engine, 5);

    // Move the viewer far enough away that the origin chunk's sliding
    // box no longer covers it, forcing an unload-with-save.
    engine.set_viewer_position(viewer, glam::Vec3::new(10_000.0, 0.0, 0.0)).unwrap();
    run_ticks(&mut engine, 10);

    assert!(callbacks.saved.load(Ordering::SeqCst) > 0, "edited chunk should be saved on unload");
    assert!(stream.saves.load(Ordering::SeqCst) > 0, "stream should have received at least one save");
}

#[test]
fn replacing_stream_mid_flight_drops_in_flight_loads() {
    init_logging();
    let callbacks = Arc::new(RecordingCallbacks::default());
    let generator = Arc::new(FlatGroundGenerator { calls: AtomicUsize::new(0) });
    let stream = Arc::new(FileStream::new());
    let mesher = Arc::new(StubMesher);

    let mut engine = VoxelEngine::with_worker_threads(4);
    let volume = engine
        .add_volume(small_config(), callbacks.clone(), Some(generator), Some(stream), Some(mesher))
        .unwrap();
    engine.add_viewer(glam::Vec3::ZERO, 64.0, ViewerFlags::default());

    // Kick off the initial wave of loads, then immediately invalidate the
    // streaming dependency before they've necessarily completed.
    engine.process();
    engine.replace_streaming(volume, None, None).unwrap();
    run_ticks(&mut engine, 10);

    // The volume must still be alive and usable after its dependency was
    // swapped mid-flight; no panics, no half-applied state.
    assert!(engine.volume_shared(volume).is_ok());
}

#[test]
fn unrelated_volumes_do_not_share_generated_state() {
    init_logging();
    let cb_a = Arc::new(RecordingCallbacks::default());
    let cb_b = Arc::new(RecordingCallbacks::default());
    let gen_a = Arc::new(FlatGroundGenerator { calls: AtomicUsize::new(0) });
    let gen_b = Arc::new(FlatGroundGenerator { calls: AtomicUsize::new(0) });

    let mut engine = VoxelEngine::with_worker_threads(4);
    let _a = engine
        .add_volume(small_config(), cb_a.clone(), Some(gen_a.clone()), Some(Arc::new(FileStream::new())), Some(Arc::new(StubMesher)))
        .unwrap();
    let _b = engine
        .add_volume(small_config(), cb_b.clone(), Some(gen_b.clone()), Some(Arc::new(FileStream::new())), Some(Arc::new(StubMesher)))
        .unwrap();
    engine.add_viewer(glam::Vec3::ZERO, 64.0, ViewerFlags::default());

    run_ticks(&mut engine, 15);

    assert!(gen_a.calls.load(Ordering::SeqCst) > 0);
    assert!(gen_b.calls.load(Ordering::SeqCst) > 0);

    // Sanity: each volume's own tally is independent (no shared counters).
    let total: HashMap<&str, usize> = HashMap::from([
        ("a_generated", cb_a.generated.load(Ordering::SeqCst)),
        ("b_generated", cb_b.generated.load(Ordering::SeqCst)),
    ]);
    assert!(total["a_generated"] > 0 && total["b_generated"] > 0);
}
