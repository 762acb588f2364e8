use std::time::{Duration, Instant};

use metal::MTLCommandBufferStatus;

use crate::error::{MeshSplatError, Result};

pub fn commit_and_wait_with_timeout(
    command_buffer: &metal::CommandBufferRef,
    stage: &'static str,
    timeout: Duration,
) -> Result<()> {
    command_buffer.commit();
    let start = Instant::now();

    loop {
        match command_buffer.status() {
            MTLCommandBufferStatus::Completed => return Ok(()),
            MTLCommandBufferStatus::Error => {
                return Err(MeshSplatError::CommandBufferFailed { stage });
            }
            _ => {
                if start.elapsed() >= timeout {
                    return Err(MeshSplatError::Timeout {
                        stage,
                        timeout_ms: timeout.as_millis() as u64,
                    });
                }
                std::thread::sleep(Duration::from_millis(1));
            }
        }
    }
}

/// Like [`commit_and_wait_with_timeout`], but a fatal failure latches `gpu_disabled`.
pub fn commit_and_wait_or_disable_gpu(
    command_buffer: &metal::CommandBufferRef,
    stage: &'static str,
    timeout: Duration,
    gpu_disabled: &mut bool,
) -> Result<()> {
    commit_and_wait_with_timeout(command_buffer, stage, timeout).inspect_err(|err| {
        if err.should_disable_gpu() {
            log::error!("disabling Metal backend after {stage}: {err}");
            *gpu_disabled = true;
        }
    })
}
