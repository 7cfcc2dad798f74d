use anyhow::Context;
use parking_lot::Mutex;

use crate::device::{BufferDesc, BufferKey, Device};

/// Placement of staged bytes inside a host-visible buffer.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Staged {
    pub buffer: BufferKey,
    pub offset: u64,
}

struct RingCursor {
    ring: usize,
    offset: u64,
}

/// Host-visible staging memory shared by every recorder, one ring per frame
/// in flight. Its cursor lock is always taken inside a recorder lock.
pub(crate) struct UploadRing {
    rings: Vec<BufferKey>,
    size: u64,
    cursor: Mutex<RingCursor>,
}

impl UploadRing {
    pub fn new(device: &dyn Device, frames_in_flight: usize, size: u64) -> anyhow::Result<Self> {
        let rings = (0..frames_in_flight.max(1))
            .map(|i| {
                device
                    .create_buffer(&BufferDesc::staging(size, format!("upload ring {i}")))
                    .context("failed to create upload ring")
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Self {
            rings,
            size,
            cursor: Mutex::new(RingCursor { ring: 0, offset: 0 }),
        })
    }

    /// Copies `data` into the current ring at an offset aligned to `align`.
    ///
    /// Returns `None` when the ring has no room left this frame.
    pub fn stage(
        &self,
        device: &dyn Device,
        data: &[u8],
        align: u64,
    ) -> anyhow::Result<Option<Staged>> {
        let mut cursor = self.cursor.lock();
        let offset = cursor.offset.next_multiple_of(align.max(1));
        let end = offset + data.len() as u64;
        if end > self.size {
            return Ok(None);
        }

        let buffer = self.rings[cursor.ring];
        device
            .write_mapped(buffer, offset, data)
            .context("failed to write upload ring")?;
        cursor.offset = end;

        Ok(Some(Staged { buffer, offset }))
    }

    /// Moves to the next frame's ring. Only valid once everything staged into
    /// that ring has executed.
    pub fn advance(&self) {
        let mut cursor = self.cursor.lock();
        cursor.ring = (cursor.ring + 1) % self.rings.len();
        cursor.offset = 0;
    }

    pub fn used(&self) -> u64 {
        self.cursor.lock().offset
    }

    pub fn destroy(&self, device: &dyn Device) {
        for ring in &self.rings {
            device.destroy_buffer(*ring);
        }
    }
}
