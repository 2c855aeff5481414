//! Local foreground backend (`spec.md` §4.3): call the exec helper
//! synchronously in the calling process.

use std::time::SystemTime;

use crate::error::JobError;
use crate::handle::JobHandle;

/// Run `handle`'s command to completion. Always records `start_time`,
/// `end_time`, and `exit_status`, and fires completion hooks exactly once
/// on success. On failure, stores the formatted diagnostic in
/// `error_string` and, if `raise_error` is set, returns it as an error.
pub fn run(handle: &mut JobHandle) -> Result<(), JobError> {
    handle.start_time = Some(SystemTime::now());
    let rendezvous = handle.rendezvous();
    let request = handle.build_exec_request();

    match crate::exec::run(request, &rendezvous) {
        Ok(outcome) => {
            handle.end_time = Some(SystemTime::now());
            handle.host = Some(outcome.host);
            handle.exit_status = Some(0);
            handle.signal = None;
            handle.fire_hooks_once();
            Ok(())
        }
        Err(e) => {
            handle.end_time = Some(SystemTime::now());
            if let Ok(Some(rec)) = rendezvous.read_status() {
                if let Some((exit_code, signal)) = rec.decode() {
                    handle.exit_status = exit_code;
                    handle.signal = signal;
                }
                if rec.host.is_some() {
                    handle.host = rec.host;
                }
            }
            let inner = e.as_inner_text();
            let formatted = handle.format_error_report(&inner);
            handle.error_string = Some(formatted.clone());
            if handle.raise_error && !e.is_suppressible_cancellation() {
                Err(JobError::Runtime(formatted))
            } else {
                Ok(())
            }
        }
    }
}
