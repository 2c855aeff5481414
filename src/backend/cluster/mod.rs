//! Cluster backend (`spec.md` §4.5): submit to, poll, and cancel jobs on a
//! PBS/Torque-compatible batch queue.

pub mod accessibility;
pub mod driver;
pub mod qstat;
pub mod submit;

use std::time::Duration;

use crate::config::Config;
use crate::error::JobError;
use crate::handle::JobHandle;

use super::finalize_and_raise;

/// Liveness: the rendezvous directory is authoritative (it is what drives
/// completion-hook firing); `qstat`'s `job_state` is consulted only to
/// decide whether the job is still worth polling when the rendezvous
/// hasn't caught up yet (`spec.md` §4.5, "Liveness").
pub fn alive(handle: &mut JobHandle) -> bool {
    if handle.end_time.is_some() {
        return false;
    }
    handle.observe();
    if handle.end_time.is_some() {
        return false;
    }
    let Some(job_id) = handle.job_id.clone() else {
        return false;
    };
    let state = qstat::job_state(&handle.config, &job_id);
    matches!(state.as_deref(), Some("r") | Some("q") | Some("e"))
}

/// Poll at a 2-second cadence until the rendezvous directory shows a
/// terminal result (`spec.md` §5, "Suspension / blocking points").
pub fn wait(handle: &mut JobHandle) -> Result<(), JobError> {
    loop {
        handle.observe();
        if handle.end_time.is_some() {
            break;
        }
        std::thread::sleep(Duration::from_secs(2));
    }
    finalize_and_raise(handle)
}

/// `qdel`, with a 3-second then 7-second grace period before declaring
/// failure (`spec.md` §4.5, "Cancellation").
pub fn kill(handle: &mut JobHandle) -> Result<bool, JobError> {
    let Some(job_id) = handle.job_id.clone() else {
        return Ok(true);
    };

    let first_output = run_qdel(&handle.config, &job_id)?;
    std::thread::sleep(Duration::from_secs(3));
    if !alive(handle) {
        return Ok(true);
    }

    let second_output = run_qdel(&handle.config, &job_id)?;
    std::thread::sleep(Duration::from_secs(7));
    if !alive(handle) {
        return Ok(true);
    }

    Err(JobError::Scheduler(format!(
        "qdel failed to cancel job {job_id} after two attempts:\n{first_output}{second_output}"
    )))
}

fn run_qdel(config: &Config, job_id: &str) -> Result<String, JobError> {
    let output = std::process::Command::new(&config.qdel)
        .arg(job_id)
        .output()
        .map_err(|e| JobError::Scheduler(format!("failed to invoke qdel: {e}")))?;
    Ok(format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    ))
}
