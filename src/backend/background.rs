//! Local background backend (`spec.md` §4.4): fork a supervisor process
//! that runs the exec helper and exits hard, while the controller tracks
//! it by pid.

use std::time::{Duration, SystemTime};

use nix::sys::signal::{self, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag};
use nix::unistd::{fork, ForkResult, Pid};

use crate::error::JobError;
use crate::handle::JobHandle;

use super::finalize_and_raise;

/// Fork a supervisor for `handle`'s command. The tempdir already exists
/// (created in `JobHandle::new`, before this call) so both processes agree
/// on its path. Returns once the fork has happened; the parent never
/// blocks on the child here.
///
/// # Safety-relevant note
/// `fork(2)` in a process that may have other threads only guarantees the
/// calling thread survives in the child; the child here performs no
/// further thread-sensitive work before either `exec`ing (inside
/// `exec::run`) or calling `_exit`, so this is safe in practice for a
/// library with no background threads of its own.
pub fn spawn(handle: &mut JobHandle) -> Result<(), JobError> {
    handle.start_time = Some(SystemTime::now());
    let rendezvous = handle.rendezvous();
    let request = handle.build_exec_request();

    // SAFETY: the child performs only `exec::run` (which itself forks again
    // before calling into libc beyond async-signal-safe operations) and a
    // hard `_exit`; no user-level finalizers run in the child path.
    match unsafe { fork() }.map_err(|e| JobError::Setup(format!("fork failed: {e}")))? {
        ForkResult::Parent { child, .. } => {
            handle.pid = Some(child.as_raw() as u32);
            Ok(())
        }
        ForkResult::Child => {
            let status = crate::exec::run(request, &rendezvous);
            // Hard exit: bypass the host runtime's Drop-based cleanup of
            // parent-owned resources (`spec.md` §9, "hard exit in the
            // supervisor"). `exec::run` has already written status/died.
            unsafe { libc::_exit(if status.is_ok() { 0 } else { 1 }) }
        }
    }
}

/// No-op signal probe plus a non-blocking reap, per `spec.md` §4.4 step 4.
pub fn alive(handle: &mut JobHandle) -> bool {
    if handle.end_time.is_some() {
        return false;
    }
    let Some(pid) = handle.pid else {
        return false;
    };
    reap_if_exited(pid);
    let addressable = signal::kill(Pid::from_raw(pid as i32), None).is_ok();
    handle.observe();
    if handle.end_time.is_some() {
        return false;
    }
    addressable
}

/// Block via `waitpid`, then read the final rendezvous state.
pub fn wait(handle: &mut JobHandle) -> Result<(), JobError> {
    if let Some(pid) = handle.pid {
        let _ = waitpid(Pid::from_raw(pid as i32), None);
    }
    finalize_and_raise(handle)
}

/// Sequentially escalate `QUIT`, `INT`, `TERM`, `KILL` with a one-second
/// pause and a reap after each, returning success iff the supervisor is no
/// longer signal-addressable afterward (`spec.md` §4.4 step 6, §8
/// invariant 4).
pub fn kill(handle: &mut JobHandle) -> Result<bool, JobError> {
    let Some(pid) = handle.pid else {
        return Ok(true);
    };
    let nix_pid = Pid::from_raw(pid as i32);
    for sig in [Signal::SIGQUIT, Signal::SIGINT, Signal::SIGTERM, Signal::SIGKILL] {
        let _ = signal::kill(nix_pid, sig);
        std::thread::sleep(Duration::from_secs(1));
        reap_if_exited(pid);
        if signal::kill(nix_pid, None).is_err() {
            handle.observe();
            return Ok(true);
        }
    }
    handle.observe();
    Ok(signal::kill(nix_pid, None).is_err())
}

fn reap_if_exited(pid: u32) {
    let _ = waitpid(Pid::from_raw(pid as i32), Some(WaitPidFlag::WNOHANG));
}
