//! The exec helper (`spec.md` §4.1): spawn a command with redirected
//! stdin/stdout/stderr, forward stop-signals to the child, and record a
//! status record (and, on failure, a die-file) into the job's rendezvous
//! directory.
//!
//! Unlike a `fork`+`dup2`-in-place implementation, `std::process::Command`
//! configures the child's descriptors directly via `Stdio` without ever
//! touching the calling process's own fds — so, unlike `spec.md`'s
//! step-by-step description, there is no "save the parent's descriptors,
//! then restore them" bracket here: the parent's fds are simply never
//! altered. The externally observable contract (child gets the right
//! stdio, status/die files get written, teardown always runs) is
//! preserved.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::Pid;

use crate::error::JobError;
use crate::rendezvous::{Rendezvous, StatusRecord};
use crate::sink::Sink;

/// A command to execute: either a tokenized argv or a single string handed
/// to the shell (`spec.md` §3: "ordered sequence of argv tokens (or a
/// single shell string)").
#[derive(Debug, Clone)]
pub enum CommandSpec {
    Argv(Vec<String>),
    Shell(String),
}

impl CommandSpec {
    pub fn display(&self) -> String {
        match self {
            CommandSpec::Argv(v) => v.join(" "),
            CommandSpec::Shell(s) => s.clone(),
        }
    }

    fn to_std_command(&self) -> Command {
        match self {
            CommandSpec::Argv(v) => {
                let mut cmd = Command::new(&v[0]);
                cmd.args(&v[1..]);
                cmd
            }
            CommandSpec::Shell(s) => {
                let mut cmd = Command::new("/bin/sh");
                cmd.arg("-c").arg(s);
                cmd
            }
        }
    }
}

/// One exec-helper invocation.
pub struct ExecRequest {
    pub command: CommandSpec,
    pub stdin: Sink,
    pub stdout: Sink,
    pub stderr: Sink,
    pub working_dir: Option<PathBuf>,
}

/// Outcome of a successful (exit 0, no signal) run.
#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub raw_status: i32,
    pub host: String,
}

/// Run `req`, writing `start`/`end`/`ret`/`host` to `rendezvous`'s `status`
/// file and, on any failure, a `died` file with a formatted message.
/// Returns `Ok` only on a clean exit (status 0, no signal).
pub fn run(req: ExecRequest, rendezvous: &Rendezvous) -> Result<ExecOutcome, JobError> {
    let stdin_prep = prepare_input(&req.stdin, rendezvous.dir())?;
    let tie = sinks_tied(&req.stdout, &req.stderr);
    let stdout_prep = prepare_output(&req.stdout, rendezvous.dir(), "stdout")?;
    let stderr_prep = if tie {
        None
    } else {
        Some(prepare_output(&req.stderr, rendezvous.dir(), "stderr")?)
    };

    rendezvous.write_start().map_err(JobError::from)?;

    let result = spawn_and_wait(&req, &stdin_prep, &stdout_prep, stderr_prep.as_ref(), tie);

    // Finalize sinks (read back in-memory captures, invoke consumer
    // callbacks) unconditionally, mirroring the spec's "teardown always
    // runs" rule.
    finalize_output(&req.stdout, &stdout_prep);
    match &stderr_prep {
        Some(prep) => finalize_output(&req.stderr, prep),
        None => finalize_output(&req.stderr, &stdout_prep),
    }

    let host = hostname();
    match result {
        Ok(raw_status) => {
            rendezvous
                .write_end(raw_status, &host)
                .map_err(JobError::from)?;
            finish(req.command.display(), raw_status, &host, rendezvous)
        }
        Err(e) => {
            // Setup/spawn failed before we ever had a status to record;
            // still surface the failure via the die-file for async/cluster
            // observers.
            let msg = format!("exec setup failed: {e}");
            let _ = rendezvous.write_died(&msg);
            Err(e)
        }
    }
}

fn finish(
    command_display: String,
    raw_status: i32,
    host: &str,
    rendezvous: &Rendezvous,
) -> Result<ExecOutcome, JobError> {
    let rec = StatusRecord {
        ret: Some(raw_status),
        ..Default::default()
    };
    let (exit_code, signal_num) = rec.decode().unwrap_or((None, None));

    if exit_code == Some(0) && signal_num.is_none() {
        return Ok(ExecOutcome {
            raw_status,
            host: host.to_string(),
        });
    }

    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    let msg = match signal_num {
        Some(sig) => format!(
            "command failed: '{command_display}' on host {host} as user {user}: \
             raw status {raw_status}, killed by signal {sig}"
        ),
        None => format!(
            "command failed: '{command_display}' on host {host} as user {user}: \
             raw status {raw_status}, exit value {}",
            exit_code.unwrap_or(-1)
        ),
    };
    let _ = rendezvous.write_died(&msg);
    Err(JobError::Runtime(msg))
}

/// Spawn the child (in its own process group) and wait for it, forwarding
/// any of SIGQUIT/SIGINT/SIGTERM the *controller* receives while waiting to
/// the child's process group (`spec.md` §9 design note, option (a)). Returns
/// the raw wait status, or a [`JobError::Cancelled`] if a forwarded signal
/// killed the child before it could exit on its own terms — that case is
/// reported to the caller as cancellation rather than a generic failure.
fn spawn_and_wait(
    req: &ExecRequest,
    stdin_prep: &Prepared,
    stdout_prep: &Prepared,
    stderr_prep: Option<&Prepared>,
    tie: bool,
) -> Result<i32, JobError> {
    let mut cmd = req.command.to_std_command();
    if let Some(dir) = &req.working_dir {
        cmd.current_dir(dir);
    }
    cmd.stdin(stdin_prep.stdio()?);
    cmd.stdout(stdout_prep.stdio()?);
    if tie {
        cmd.stderr(stdout_prep.stdio()?);
    } else {
        cmd.stderr(stderr_prep.expect("stderr_prep present when not tied").stdio()?);
    }

    // SAFETY: the closure only calls async-signal-safe `setsid(2)`.
    unsafe {
        use std::os::unix::process::CommandExt;
        cmd.pre_exec(|| {
            nix::unistd::setsid()
                .map(|_| ())
                .map_err(|e| std::io::Error::from_raw_os_error(e as i32))
        });
    }

    let guard = SignalGuard::install()?;
    let mut child = cmd
        .spawn()
        .map_err(|e| JobError::Setup(format!("exec failed: {e}")))?;
    let pid = child.id();

    let outcome = wait_with_forwarding(&mut child, pid);
    drop(guard);

    let (raw_status, forwarded) = outcome?;
    if let Some(sig_name) = forwarded {
        return Err(JobError::Cancelled(format!("Got signal {sig_name}")));
    }
    Ok(raw_status)
}

fn wait_with_forwarding(
    child: &mut Child,
    pid: u32,
) -> Result<(i32, Option<String>), JobError> {
    use std::os::unix::process::ExitStatusExt;

    let pgid = Pid::from_raw(pid as i32);
    let mut forwarded: Option<String> = None;
    loop {
        let caught = CAUGHT_SIGNAL.swap(0, Ordering::SeqCst);
        if caught != 0 && forwarded.is_none() {
            if let Ok(sig) = Signal::try_from(caught) {
                let _ = signal::kill(Pid::from_raw(-pgid.as_raw()), sig);
                forwarded = Some(sig.as_str().to_string());
            }
        }
        match child.try_wait() {
            Ok(Some(status)) => return Ok((status.into_raw(), forwarded)),
            Ok(None) => std::thread::sleep(Duration::from_millis(50)),
            Err(e) => return Err(JobError::Runtime(format!("wait failed: {e}"))),
        }
    }
}

static CAUGHT_SIGNAL: AtomicI32 = AtomicI32::new(0);

extern "C" fn record_signal(sig: libc::c_int) {
    CAUGHT_SIGNAL.store(sig, Ordering::SeqCst);
}

/// Installs handlers for the catchable stop-signals (SIGKILL cannot be
/// trapped by any handler; callers that need to deliver KILL use
/// `kill(2)`/`nix::sys::signal::kill` directly against the job's pid, as
/// the background/cluster backends' `kill` escalation sequences do)
/// and restores the previous handlers on drop, regardless of how the
/// guarded block exits.
struct SignalGuard {
    saved: Vec<(Signal, SigAction)>,
}

impl SignalGuard {
    fn install() -> Result<Self, JobError> {
        let action = SigAction::new(
            SigHandler::Handler(record_signal),
            SaFlags::empty(),
            SigSet::empty(),
        );
        let mut saved = Vec::new();
        for sig in [Signal::SIGQUIT, Signal::SIGINT, Signal::SIGTERM] {
            // SAFETY: `record_signal` only performs an async-signal-safe
            // atomic store.
            let old = unsafe { signal::sigaction(sig, &action) }
                .map_err(|e| JobError::Setup(format!("sigaction({sig}): {e}")))?;
            saved.push((sig, old));
        }
        CAUGHT_SIGNAL.store(0, Ordering::SeqCst);
        Ok(SignalGuard { saved })
    }
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        for (sig, old) in &self.saved {
            // SAFETY: restoring a previously-saved disposition.
            let _ = unsafe { signal::sigaction(*sig, old) };
        }
    }
}

// ---------------------------------------------------------------------
// Sink preparation / finalization
// ---------------------------------------------------------------------

enum Prepared {
    Inherit,
    Null,
    File(std::fs::File),
    /// A spool file written by the child (stdout/stderr); finalized by
    /// reading it back after the child exits.
    Spool(PathBuf),
}

impl Prepared {
    fn stdio(&self) -> Result<Stdio, JobError> {
        Ok(match self {
            Prepared::Inherit => Stdio::inherit(),
            Prepared::Null => Stdio::null(),
            Prepared::File(f) => {
                let dup = f.try_clone().map_err(JobError::from)?;
                Stdio::from(dup)
            }
            Prepared::Spool(p) => {
                let f = std::fs::File::create(p).map_err(JobError::from)?;
                Stdio::from(f)
            }
        })
    }
}

fn sinks_tied(stdout: &Sink, stderr: &Sink) -> bool {
    match (stdout, stderr) {
        (Sink::Path(a), Sink::Path(b)) => a == b,
        (Sink::InMemory(a), Sink::InMemory(b)) => Arc::ptr_eq(a, b),
        _ => false,
    }
}

fn prepare_input(sink: &Sink, tempdir: &Path) -> Result<Prepared, JobError> {
    use std::os::fd::{FromRawFd, RawFd};

    match sink {
        Sink::Absent => Ok(Prepared::Null),
        Sink::Path(p) => {
            let f = std::fs::File::open(p).map_err(JobError::from)?;
            Ok(Prepared::File(f))
        }
        Sink::Owned(f) => {
            let dup = f.try_clone().map_err(JobError::from)?;
            Ok(Prepared::File(dup))
        }
        Sink::Borrowed(fd) => {
            let dup_fd: RawFd = nix::unistd::dup(*fd)
                .map_err(|e| JobError::Setup(format!("dup stdin fd: {e}")))?;
            // SAFETY: `dup` returned a freshly duplicated, owned descriptor.
            Ok(Prepared::File(unsafe { std::fs::File::from_raw_fd(dup_fd) }))
        }
        Sink::InMemory(buf) => {
            let path = tempdir.join("stdin.spool");
            let bytes = buf.lock().expect("sink buffer lock poisoned").clone();
            std::fs::write(&path, &bytes).map_err(JobError::from)?;
            let f = std::fs::File::open(&path).map_err(JobError::from)?;
            Ok(Prepared::File(f))
        }
        Sink::Bytes(bytes) => {
            let path = tempdir.join("stdin.spool");
            std::fs::write(&path, bytes).map_err(JobError::from)?;
            let f = std::fs::File::open(&path).map_err(JobError::from)?;
            Ok(Prepared::File(f))
        }
        Sink::Producer(producer) => {
            let path = tempdir.join("stdin.spool");
            {
                let mut f = std::fs::File::create(&path).map_err(JobError::from)?;
                let mut cb = producer.lock().expect("producer lock poisoned");
                while let Some(chunk) = cb() {
                    f.write_all(&chunk).map_err(JobError::from)?;
                }
            }
            let f = std::fs::File::open(&path).map_err(JobError::from)?;
            Ok(Prepared::File(f))
        }
        Sink::Consumer(_) => Err(JobError::Usage(
            "a consumer callback sink is only valid for stdout/stderr".to_string(),
        )),
    }
}

fn prepare_output(sink: &Sink, tempdir: &Path, label: &str) -> Result<Prepared, JobError> {
    use std::os::fd::{FromRawFd, RawFd};

    match sink {
        Sink::Absent => Ok(Prepared::Null),
        Sink::Path(p) => {
            let f = std::fs::File::create(p).map_err(JobError::from)?;
            Ok(Prepared::File(f))
        }
        Sink::Owned(f) => {
            let dup = f.try_clone().map_err(JobError::from)?;
            Ok(Prepared::File(dup))
        }
        Sink::Borrowed(fd) => {
            let dup_fd: RawFd = nix::unistd::dup(*fd)
                .map_err(|e| JobError::Setup(format!("dup {label} fd: {e}")))?;
            // SAFETY: see above.
            Ok(Prepared::File(unsafe { std::fs::File::from_raw_fd(dup_fd) }))
        }
        Sink::InMemory(_) | Sink::Consumer(_) => {
            Ok(Prepared::Spool(tempdir.join(format!("{label}.spool"))))
        }
        Sink::Bytes(_) | Sink::Producer(_) => Err(JobError::Usage(format!(
            "a byte-sequence/producer sink is only valid for stdin, not {label}"
        ))),
    }
}

fn finalize_output(sink: &Sink, prepared: &Prepared) {
    let Prepared::Spool(path) = prepared else {
        return;
    };
    let Ok(mut f) = std::fs::File::open(path) else {
        return;
    };
    match sink {
        Sink::InMemory(buf) => {
            let mut data = Vec::new();
            if f.read_to_end(&mut data).is_ok() {
                *buf.lock().expect("sink buffer lock poisoned") = data;
            }
        }
        Sink::Consumer(consumer) => {
            let mut text = String::new();
            if f.read_to_string(&mut text).is_ok() {
                let mut cb = consumer.lock().expect("consumer lock poisoned");
                for line in text.lines() {
                    cb(line);
                }
            }
        }
        _ => {}
    }
}

fn hostname() -> String {
    gethostname::gethostname()
        .into_string()
        .unwrap_or_else(|_| "unknown-host".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendezvous_in(dir: &Path) -> Rendezvous {
        Rendezvous::new(dir)
    }

    #[test]
    fn successful_command_writes_status_and_returns_ok() {
        let dir = tempfile::tempdir().expect("tmp");
        let rv = rendezvous_in(dir.path());
        let req = ExecRequest {
            command: CommandSpec::Argv(vec!["true".to_string()]),
            stdin: Sink::Absent,
            stdout: Sink::Path(rv.out_path()),
            stderr: Sink::Path(rv.err_path()),
            working_dir: None,
        };
        let outcome = run(req, &rv).expect("true should succeed");
        assert_eq!(outcome.raw_status, 0);
        assert!(rv.status_path().exists());
        assert!(!rv.died_path().exists());
    }

    #[test]
    fn failing_command_writes_died_file_and_returns_runtime_error() {
        let dir = tempfile::tempdir().expect("tmp");
        let rv = rendezvous_in(dir.path());
        let req = ExecRequest {
            command: CommandSpec::Argv(vec!["false".to_string()]),
            stdin: Sink::Absent,
            stdout: Sink::Path(rv.out_path()),
            stderr: Sink::Path(rv.err_path()),
            working_dir: None,
        };
        let err = run(req, &rv).expect_err("false should fail");
        assert!(matches!(err, JobError::Runtime(_)));
        assert!(rv.died_path().exists());
    }

    #[test]
    fn in_memory_stdout_is_captured() {
        let dir = tempfile::tempdir().expect("tmp");
        let rv = rendezvous_in(dir.path());
        let (stdout_sink, buf) = Sink::in_memory();
        let req = ExecRequest {
            command: CommandSpec::Shell("echo hello".to_string()),
            stdin: Sink::Absent,
            stdout: stdout_sink,
            stderr: Sink::Path(rv.err_path()),
            working_dir: None,
        };
        run(req, &rv).expect("echo should succeed");
        let captured = buf.lock().expect("lock");
        assert_eq!(String::from_utf8_lossy(&captured).trim(), "hello");
    }

    #[test]
    fn consumer_sink_sees_each_line() {
        let dir = tempfile::tempdir().expect("tmp");
        let rv = rendezvous_in(dir.path());
        let lines = Arc::new(Mutex::new(Vec::new()));
        let lines2 = Arc::clone(&lines);
        let stdout_sink = Sink::consumer(move |line: &str| {
            lines2.lock().expect("lock").push(line.to_string());
        });
        let req = ExecRequest {
            command: CommandSpec::Shell("printf 'a\\nb\\n'".to_string()),
            stdin: Sink::Absent,
            stdout: stdout_sink,
            stderr: Sink::Path(rv.err_path()),
            working_dir: None,
        };
        run(req, &rv).expect("printf should succeed");
        assert_eq!(*lines.lock().expect("lock"), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn bytes_sink_feeds_stdin() {
        let dir = tempfile::tempdir().expect("tmp");
        let rv = rendezvous_in(dir.path());
        let (stdout_sink, buf) = Sink::in_memory();
        let req = ExecRequest {
            command: CommandSpec::Argv(vec!["cat".to_string()]),
            stdin: Sink::Bytes(b"ping".to_vec()),
            stdout: stdout_sink,
            stderr: Sink::Path(rv.err_path()),
            working_dir: None,
        };
        run(req, &rv).expect("cat should succeed");
        assert_eq!(&*buf.lock().expect("lock"), b"ping");
    }
}
