use std::{collections::VecDeque, sync::Arc, time::Duration};

use anyhow::Context;
use arbor_gpu::{
    CommandRecorder, GpuContext, GraphicsBuffer, Texture, TextureSpec,
    buffer::BufferSpec,
    command::{BindPoint, BindingKind, CommandSignature, IndirectKind, PipelineDesc, PipelineState},
    device::BufferUsage,
    mesh::{Mesh, MeshBuffers},
};
use ash::vk;
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
#[cfg(feature = "tracing")]
use tracy_client::{frame_mark, plot};

use super::messages::{EngineControl, RenderRequest, ShutdownPhase};

const MAX_MESHES: usize = 24;
const COMPACT_INTERVAL: u64 = 16;
const WIDTH: u32 = 320;
const HEIGHT: u32 = 180;

struct FrameResources {
    cull: Arc<PipelineState>,
    draw: Arc<PipelineState>,
    color: Texture,
    depth: Texture,
    arguments: GraphicsBuffer<[u32; 3]>,
    signature: CommandSignature,
}

impl FrameResources {
    fn new(context: &Arc<GpuContext>) -> anyhow::Result<Self> {
        let cull = context.create_pipeline(
            PipelineDesc::compute("cull")
                .bind(BindingKind::Constants, BindPoint::new(0, 0), 0)
                .bind(BindingKind::ShaderResource, BindPoint::new(0, 0), 1)
                .bind(BindingKind::UnorderedAccess, BindPoint::new(0, 0), 2),
        );
        let draw = context.create_pipeline(
            PipelineDesc::graphics("meshlets")
                .bind(BindingKind::ShaderResource, BindPoint::new(0, 0), 0)
                .bind(BindingKind::ShaderResource, BindPoint::new(1, 0), 1)
                .bind(BindingKind::ShaderResource, BindPoint::new(2, 0), 2)
                .bind(BindingKind::ShaderResource, BindPoint::new(3, 0), 3),
        );

        let color = context
            .create_texture(
                TextureSpec::color(WIDTH, HEIGHT, vk::Format::R8G8B8A8_UNORM)
                    .clear_color([0.05, 0.05, 0.1, 1.0])
                    .debug_name("scene color"),
            )
            .context("failed to create color target")?;
        let depth = context
            .create_texture(TextureSpec::depth(WIDTH, HEIGHT).debug_name("scene depth"))
            .context("failed to create depth target")?;

        let arguments = context
            .create_buffer(
                BufferSpec::new(MAX_MESHES as u64)
                    .usage(BufferUsage::Indirect)
                    .with_counter()
                    .debug_name("mesh dispatch arguments"),
            )
            .context("failed to create indirect argument buffer")?;

        Ok(Self {
            cull,
            draw,
            color,
            depth,
            arguments,
            signature: CommandSignature::packed(IndirectKind::DispatchMesh),
        })
    }

    fn record(&self, recorder: &CommandRecorder, buffers: &MeshBuffers, mesh_count: u32) -> anyhow::Result<()> {
        recorder.begin_event("frame");

        recorder.begin_event("cull");
        recorder.reset_counter(&self.arguments)?;
        recorder.set_pipeline(&self.cull);
        recorder.set_constants(BindPoint::new(0, 0), 0, &[mesh_count]);
        recorder.bind_srv(BindPoint::new(0, 0), &buffers.meshes);
        recorder.bind_uav(BindPoint::new(0, 0), &self.arguments);
        recorder.dispatch_threads([mesh_count, 1, 1], [64, 1, 1]);
        recorder.barrier_uav(&[&self.arguments]);
        recorder.end_event();

        recorder.begin_event("draw");
        recorder.set_pipeline(&self.draw);
        recorder.set_render_target(Some(&self.color), Some(&self.depth));
        recorder.clear_render_target(&self.color, None);
        recorder.clear_depth(&self.depth);
        recorder.bind_srv(BindPoint::new(0, 0), &buffers.vertices);
        recorder.bind_srv(BindPoint::new(1, 0), &buffers.primitives);
        recorder.bind_srv(BindPoint::new(2, 0), &buffers.meshlets);
        recorder.bind_srv(BindPoint::new(3, 0), &buffers.meshes);
        recorder.execute_indirect(self.signature, &self.arguments, mesh_count, 0);
        recorder.end_event();

        recorder.present(&self.color);
        recorder.end_event();
        Ok(())
    }
}

pub fn render_thread(
    context: Arc<GpuContext>,
    buffers: MeshBuffers,
    geometry_lock: Arc<Mutex<()>>,
    render_rx: Receiver<RenderRequest>,
    control: Arc<EngineControl>,
) -> anyhow::Result<()> {
    let resources = FrameResources::new(&context).context("failed to create frame resources")?;
    let recorder = context.default_recorder();
    let mut meshes: VecDeque<(u32, Mesh)> = VecDeque::new();

    while control.phase() != ShutdownPhase::StopRender {
        let frame = control.frames();
        let _frame_span = tracing::trace_span!("frame", frame).entered();

        meshes.extend(render_rx.try_iter().map(|r| (r.asset_id, r.mesh)));
        while meshes.len() > MAX_MESHES {
            if let Some((asset_id, _)) = meshes.pop_front() {
                log::debug!("Render: evicted {asset_id}");
            }
        }

        if frame % COMPACT_INTERVAL == COMPACT_INTERVAL - 1 {
            let _guard = geometry_lock.lock();
            meshes.extend(render_rx.try_iter().map(|r| (r.asset_id, r.mesh)));
            buffers.compact(recorder);
            for (_, mesh) in &meshes {
                mesh.refresh_descriptor(recorder)?;
            }
        }

        resources.record(recorder, &buffers, meshes.len() as u32)?;
        context.end_frame().context("failed to end frame")?;
        control.frame_rendered();

        #[cfg(feature = "tracing")]
        {
            plot!("resident meshes", meshes.len() as f64);
            frame_mark();
        }

        // Paces the loop so the producer threads get a share of the recorder.
        std::thread::sleep(Duration::from_millis(1));
    }

    log::debug!("Render Thread shutting down with {} meshes", meshes.len());
    Ok(())
}
