use std::{sync::Arc, time::Duration};

use anyhow::Context;
use arbor_gpu::{
    GpuContext,
    mesh::{Mesh, MeshBuffers, MeshletBuilder, SequentialMeshlets},
};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use super::messages::{
    EngineControl, RenderRequest, ShutdownPhase, UploadComplete, UploadRequest,
};

/// Builds meshes into the shared mesh buffers through the default recorder.
///
/// `geometry_lock` is held from the first allocation until the finished mesh
/// is queued for the render thread, so compaction never sees a mesh whose
/// descriptor it cannot refresh.
pub fn upload_thread(
    context: Arc<GpuContext>,
    buffers: MeshBuffers,
    geometry_lock: Arc<Mutex<()>>,
    upload_rx: Receiver<UploadRequest>,
    render_tx: Sender<RenderRequest>,
    complete_tx: Sender<UploadComplete>,
    control: Arc<EngineControl>,
) -> anyhow::Result<()> {
    let builder: Arc<dyn MeshletBuilder> = Arc::new(SequentialMeshlets::default());
    let recorder = context.default_recorder();

    while control.phase() != ShutdownPhase::StopUpload {
        let request = match upload_rx.recv_timeout(Duration::from_millis(10)) {
            Ok(request) => request,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        if control.phase() != ShutdownPhase::Running {
            continue;
        }

        let _span = tracing::trace_span!("upload_mesh", asset = request.asset_id).entered();
        let asset_id = request.asset_id;
        let geometry = request.geometry;
        {
            let _guard = geometry_lock.lock();
            let mut mesh = Mesh::new(buffers.clone(), builder.clone());
            mesh.set_vertices(recorder, geometry.vertices)
                .with_context(|| format!("failed to upload vertices of asset {asset_id}"))?;
            mesh.set_normals(recorder, geometry.normals)
                .with_context(|| format!("failed to upload normals of asset {asset_id}"))?;
            mesh.set_indices(recorder, geometry.indices)
                .with_context(|| format!("failed to upload indices of asset {asset_id}"))?;

            log::debug!(
                "Upload thread: uploaded {asset_id} ({} meshlets)",
                mesh.meshlet_count()
            );
            if render_tx.send(RenderRequest { asset_id, mesh }).is_err() {
                break;
            }
        }
        let _ = complete_tx.send(UploadComplete { asset_id });
    }
    log::debug!("Upload Thread shutting down");

    Ok(())
}
