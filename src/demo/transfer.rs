use std::{collections::VecDeque, sync::Arc};

use anyhow::Context;
use arbor_gpu::{
    GpuContext,
    mesh::{Mesh, MeshBuffers, MeshletBuilder, SequentialMeshlets},
};

use super::gameplay::grid;

const RESIDENT_MESHES: usize = 8;

/// Streams `count` meshes through the mesh buffers with uploads, eviction and
/// compaction only, one frame per mesh. Needs nothing beyond transfers and
/// barriers, so every backend can run it.
pub fn stream_meshes(context: &Arc<GpuContext>, count: u32) -> anyhow::Result<()> {
    let buffers = MeshBuffers::new(context, 64).context("failed to create mesh buffers")?;
    let builder: Arc<dyn MeshletBuilder> = Arc::new(SequentialMeshlets::default());
    let recorder = context.default_recorder();
    let mut resident = VecDeque::new();

    for asset_id in 0..count {
        let _span = tracing::trace_span!("stream_mesh", asset = asset_id).entered();
        let geometry = grid(2 + asset_id % 15);

        recorder.begin_event(format!("asset {asset_id}"));
        let mut mesh = Mesh::new(buffers.clone(), builder.clone());
        mesh.set_vertices(recorder, geometry.vertices)?;
        mesh.set_normals(recorder, geometry.normals)?;
        mesh.set_indices(recorder, geometry.indices)?;
        resident.push_back(mesh);

        if resident.len() > RESIDENT_MESHES {
            resident.pop_front();
            buffers.compact(recorder);
            for mesh in &resident {
                mesh.refresh_descriptor(recorder)?;
            }
        }
        recorder.end_event();

        context
            .end_frame()
            .with_context(|| format!("failed to stream asset {asset_id}"))?;
    }

    log::info!(
        "streamed {count} meshes, {} vertices resident in a buffer of {}",
        buffers.vertices.allocated_ranges().iter().map(|(_, n)| n).sum::<u64>(),
        buffers.vertices.capacity()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use arbor_gpu::{GpuConfig, HeadlessDevice};

    use super::*;

    #[test]
    fn streaming_keeps_the_newest_meshes_packed() {
        let device = Arc::new(HeadlessDevice::new());
        let context = GpuContext::new(device.clone(), GpuConfig::minimal()).unwrap();

        stream_meshes(&context, 20).unwrap();

        let stats = device.stats();
        assert_eq!(stats.submits, 20);
        assert!(stats.buffers_destroyed > 0);
    }
}
