use std::sync::{Arc, mpsc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Context;
use arbor_gpu::{GpuContext, mesh::MeshBuffers};
use crossbeam_channel::unbounded;
use parking_lot::Mutex;

use super::gameplay::gameplay_thread;
use super::messages::{EngineControl, ShutdownPhase};
use super::render::render_thread;
use super::upload::upload_thread;

const MESH_BUFFER_CAPACITY: u64 = 1024;

type WorkerError = (&'static str, anyhow::Error);

/// Runs `work` on a named thread; its error, if any, goes to the watchdog.
fn spawn_worker(
    name: &'static str,
    errors: &mpsc::Sender<WorkerError>,
    work: impl FnOnce() -> anyhow::Result<()> + Send + 'static,
) -> anyhow::Result<JoinHandle<()>> {
    let errors = errors.clone();
    let handle = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            if let Err(e) = work() {
                let _ = errors.send((name, e));
            }
        })
        .with_context(|| format!("failed to spawn {name} thread"))?;
    Ok(handle)
}

/// Owns the worker threads of the demo and their shutdown order.
pub struct Engine {
    context: Arc<GpuContext>,
    control: Arc<EngineControl>,
    gameplay: Option<JoinHandle<()>>,
    upload: Option<JoinHandle<()>>,
    render: Option<JoinHandle<()>>,
}

impl Engine {
    pub fn new(context: Arc<GpuContext>) -> anyhow::Result<Self> {
        let buffers = MeshBuffers::new(&context, MESH_BUFFER_CAPACITY)
            .context("failed to create mesh buffers")?;
        let geometry_lock = Arc::new(Mutex::new(()));
        let control = Arc::new(EngineControl::new());

        let (upload_tx, upload_rx) = unbounded();
        let (render_tx, render_rx) = unbounded();
        let (complete_tx, complete_rx) = unbounded();
        let (error_tx, error_rx) = mpsc::channel::<WorkerError>();

        let render = {
            let (context, buffers, lock, control) =
                (context.clone(), buffers.clone(), geometry_lock.clone(), control.clone());
            spawn_worker("render", &error_tx, move || {
                render_thread(context, buffers, lock, render_rx, control)
            })?
        };

        let upload = {
            let (context, control) = (context.clone(), control.clone());
            spawn_worker("upload", &error_tx, move || {
                upload_thread(
                    context,
                    buffers,
                    geometry_lock,
                    upload_rx,
                    render_tx,
                    complete_tx,
                    control,
                )
            })?
        };

        let gameplay = {
            let control = control.clone();
            spawn_worker("gameplay", &error_tx, move || {
                gameplay_thread(upload_tx, complete_rx, control)
            })?
        };
        drop(error_tx);

        {
            let control = control.clone();
            thread::Builder::new()
                .name("thread_watchdog".to_string())
                .spawn(move || {
                    for (name, e) in error_rx {
                        log::error!("Thread {} failed: {:?}", name, e);
                        control.fail();
                    }
                })
                .context("failed to spawn watchdog thread")?;
        }

        Ok(Self {
            context,
            control,
            gameplay: Some(gameplay),
            upload: Some(upload),
            render: Some(render),
        })
    }

    /// Blocks until `frames` frames have been rendered or a worker fails.
    pub fn run(&self, frames: u64) -> anyhow::Result<()> {
        while self.control.frames() < frames {
            anyhow::ensure!(
                !self.control.failed(),
                "a worker thread failed after {} frames",
                self.control.frames()
            );
            thread::sleep(Duration::from_millis(5));
        }
        log::info!("rendered {} frames", self.control.frames());
        Ok(())
    }

    /// Stops producers before consumers so no request is left half handled.
    pub fn shutdown(&mut self) -> anyhow::Result<()> {
        let stages = [
            (ShutdownPhase::StopGameplay, self.gameplay.take()),
            (ShutdownPhase::StopUpload, self.upload.take()),
            (ShutdownPhase::StopRender, self.render.take()),
        ];
        for (phase, handle) in stages {
            self.control.set_phase(phase);
            if let Some(handle) = handle {
                handle.join().ok();
            }
        }

        // Flush whatever the workers retired on their way out.
        self.context.end_frame().context("failed to flush final frame")?;
        Ok(())
    }
}
