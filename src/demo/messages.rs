use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

use arbor_gpu::mesh::Mesh;

/// Procedural geometry produced by gameplay.
#[derive(Debug)]
pub struct Geometry {
    pub vertices: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub indices: Vec<u32>,
}

#[derive(Debug)]
pub struct UploadRequest {
    pub asset_id: u32,
    pub geometry: Geometry,
}

pub struct RenderRequest {
    pub asset_id: u32,
    pub mesh: Mesh,
}

#[derive(Debug)]
pub struct UploadComplete {
    pub asset_id: u32,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ShutdownPhase {
    Running,
    StopGameplay,
    StopUpload,
    StopRender,
}

pub struct EngineControl {
    phase: AtomicU8,
    frames: AtomicU64,
    failed: AtomicBool,
}

impl EngineControl {
    pub fn new() -> Self {
        Self {
            phase: AtomicU8::new(ShutdownPhase::Running as u8),
            frames: AtomicU64::new(0),
            failed: AtomicBool::new(false),
        }
    }

    pub fn set_phase(&self, phase: ShutdownPhase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    pub fn phase(&self) -> ShutdownPhase {
        match self.phase.load(Ordering::Acquire) {
            0 => ShutdownPhase::Running,
            1 => ShutdownPhase::StopGameplay,
            2 => ShutdownPhase::StopUpload,
            _ => ShutdownPhase::StopRender,
        }
    }

    pub fn frame_rendered(&self) -> u64 {
        self.frames.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    pub fn fail(&self) {
        self.failed.store(true, Ordering::Release);
    }

    pub fn failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }
}
