use std::{sync::Arc, time::Duration};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use super::messages::{EngineControl, Geometry, ShutdownPhase, UploadComplete, UploadRequest};

/// Flat `n` x `n` quad grid in the XZ plane.
pub fn grid(n: u32) -> Geometry {
    let n = n.max(1);
    let side = n + 1;
    let mut vertices = Vec::with_capacity((side * side) as usize);
    for z in 0..side {
        for x in 0..side {
            vertices.push([x as f32 / n as f32, 0.0, z as f32 / n as f32]);
        }
    }
    let normals = vec![[0.0, 1.0, 0.0]; vertices.len()];

    let mut indices = Vec::with_capacity((n * n * 6) as usize);
    for z in 0..n {
        for x in 0..n {
            let i = z * side + x;
            indices.extend_from_slice(&[i, i + side, i + 1, i + 1, i + side, i + side + 1]);
        }
    }

    Geometry {
        vertices,
        normals,
        indices,
    }
}

pub fn gameplay_thread(
    upload_tx: Sender<UploadRequest>,
    complete_rx: Receiver<UploadComplete>,
    control: Arc<EngineControl>,
) -> anyhow::Result<()> {
    let mut next_asset = 1u32;
    'outer: while control.phase() == ShutdownPhase::Running {
        let asset_id = next_asset;
        next_asset += 1;

        let geometry = grid(2 + asset_id % 15);
        if upload_tx.send(UploadRequest { asset_id, geometry }).is_err() {
            break;
        }

        loop {
            match complete_rx.recv_timeout(Duration::from_millis(50)) {
                Ok(msg) => {
                    log::debug!("Gameplay: upload complete {}", msg.asset_id);
                    break;
                }
                Err(RecvTimeoutError::Timeout) if control.phase() == ShutdownPhase::Running => {}
                Err(_) => break 'outer,
            }
        }

        std::thread::sleep(Duration::from_millis(2));
    }

    log::debug!("Gameplay Thread shutting down");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_indices_stay_in_range() {
        let geometry = grid(3);
        assert_eq!(geometry.vertices.len(), 16);
        assert_eq!(geometry.indices.len(), 54);
        assert!(geometry.indices.iter().all(|&i| (i as usize) < geometry.vertices.len()));
    }
}
