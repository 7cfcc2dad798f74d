use std::sync::Arc;

use anyhow::Context;
use arbor_gpu::{GpuConfig, GpuContext, HeadlessDevice};

use crate::demo::Engine;

mod demo;

const DEFAULT_FRAMES: u64 = 240;

fn main() -> anyhow::Result<()> {
    log4rs::init_file("log4rs.yml", Default::default())
        .context("failed to load logging config file")?;

    #[cfg(feature = "tracing")]
    {
        use tracing_subscriber::layer::SubscriberExt;

        let subscriber = tracing_subscriber::registry().with(tracing_tracy::TracyLayer::default());
        tracing::subscriber::set_global_default(subscriber)
            .context("failed to install tracy subscriber")?;
    }

    let frames = match std::env::var("ARBOR_FRAMES") {
        Ok(value) => value
            .parse()
            .with_context(|| format!("ARBOR_FRAMES is not a frame count: '{value}'"))?,
        Err(_) => DEFAULT_FRAMES,
    };

    match std::env::var("ARBOR_BACKEND").as_deref() {
        Ok("headless") | Err(_) => run_headless(frames),
        Ok("headless-stream") => {
            let context = GpuContext::new(Arc::new(HeadlessDevice::new()), GpuConfig::default())
                .context("failed to create GPU context")?;
            demo::stream_meshes(&context, stream_count(frames)?)
        }
        #[cfg(feature = "vulkan")]
        Ok("vulkan") => run_vulkan(frames),
        Ok(other) => anyhow::bail!("unknown ARBOR_BACKEND '{other}'"),
    }
}

fn stream_count(frames: u64) -> anyhow::Result<u32> {
    u32::try_from(frames).context("ARBOR_FRAMES is too large")
}

fn run_headless(frames: u64) -> anyhow::Result<()> {
    let device = Arc::new(HeadlessDevice::new());
    let context = GpuContext::new(device.clone(), GpuConfig::default())
        .context("failed to create GPU context")?;

    let mut engine = Engine::new(context).context("failed to start engine")?;
    let result = engine.run(frames);
    engine.shutdown().context("failed to shut down engine")?;
    result?;

    log::info!("device stats: {:?}", device.stats());
    Ok(())
}

/// The Vulkan backend only translates transfers and barriers, so it runs the
/// streaming half of the demo.
#[cfg(feature = "vulkan")]
fn run_vulkan(frames: u64) -> anyhow::Result<()> {
    let device = arbor_gpu::vulkan::VulkanDevice::new().context("failed to create Vulkan device")?;
    let context = GpuContext::new(Arc::new(device), GpuConfig::default())
        .context("failed to create GPU context")?;

    demo::stream_meshes(&context, stream_count(frames)?)
}
