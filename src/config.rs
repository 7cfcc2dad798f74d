pub const fn kib(n: u64) -> u64 {
    n * 1024
}

pub const fn mib(n: u64) -> u64 {
    n * 1024 * 1024
}

#[derive(Clone, Debug)]
pub struct GpuConfig {
    /// Number of upload rings; one per frame the CPU may run ahead of the GPU.
    pub frames_in_flight: usize,

    /// Bytes of staging memory per upload ring (default: 32 MB)
    pub upload_ring_size: u64,

    /// Bytes of the intermediate buffer used to move data within one buffer (default: 8 MB)
    pub scratch_size: u64,

    /// Upper bound for any single growable buffer; the device limit still applies.
    pub max_buffer_size: u64,
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            upload_ring_size: mib(32),
            scratch_size: mib(8),
            max_buffer_size: mib(2048),
        }
    }
}

impl GpuConfig {
    /// Small footprint for tests and tools.
    pub fn minimal() -> Self {
        Self {
            frames_in_flight: 2,
            upload_ring_size: kib(64),
            scratch_size: kib(4),
            max_buffer_size: mib(64),
        }
    }

    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames.max(1);
        self
    }

    pub fn with_upload_ring_size(mut self, size: u64) -> Self {
        self.upload_ring_size = size;
        self
    }

    pub fn with_scratch_size(mut self, size: u64) -> Self {
        self.scratch_size = size.max(1);
        self
    }

    pub fn with_max_buffer_size(mut self, size: u64) -> Self {
        self.max_buffer_size = size;
        self
    }
}
