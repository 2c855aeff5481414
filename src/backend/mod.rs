//! The three execution backends (`spec.md` §4.3–§4.5), plus shared
//! finalization logic used by the two backends that poll a rendezvous
//! directory instead of running synchronously.

pub mod background;
pub mod cluster;
pub mod foreground;

use crate::error::{looks_like_cancellation_signal, JobError};
use crate::handle::JobHandle;

/// Read the rendezvous directory, then decide whether the observed error
/// (if any) should be raised to the caller: cancellation-pattern errors
/// observed after `kill()` was called are suppressed (`spec.md` §4.8, §8
/// invariant 4) — stored in `error_string` but not raised.
pub(crate) fn finalize_and_raise(handle: &mut JobHandle) -> Result<(), JobError> {
    handle.observe();
    if let Some(msg) = handle.error_string.clone() {
        let suppressed = handle.told_to_die && looks_like_cancellation_signal(&msg);
        if handle.raise_error && !suppressed {
            let formatted = handle.format_error_report(&msg);
            return Err(JobError::Runtime(formatted));
        }
    }
    Ok(())
}
