//! The central `JobHandle` type (`spec.md` §3): one abstraction over
//! foreground, background, and cluster execution, exposing the same
//! lifecycle operations regardless of mode.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::backend;
use crate::config::Config;
use crate::error::{self, JobError};
use crate::exec::{CommandSpec, ExecRequest};
use crate::hooks::{Hook, HookList};
use crate::rendezvous::Rendezvous;
use crate::sink::Sink;
use crate::tempdir::{self, JobTempdir};

/// One of the three execution modes a handle is permanently bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    Foreground,
    Background,
    Cluster,
}

/// Cluster resource request (`spec.md` §3, §4.5, §8 S8).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Resources {
    pub nodes: Option<u32>,
    pub procs_per_node: Option<u32>,
    pub vmem_megabytes: Option<u64>,
}

impl Resources {
    /// Render the `-l` resource string: `nodes=<n>[:ppn=<p>],vmem=<m>m`,
    /// fields sorted lexically by key, unset fields omitted.
    pub fn to_resource_string(&self) -> Option<String> {
        let mut fields: Vec<(&str, String)> = Vec::new();
        if let Some(n) = self.nodes {
            let mut s = format!("nodes={n}");
            if let Some(p) = self.procs_per_node {
                s.push_str(&format!(":ppn={p}"));
            }
            fields.push(("nodes", s));
        }
        if let Some(v) = self.vmem_megabytes {
            fields.push(("vmem", format!("vmem={v}m")));
        }
        if fields.is_empty() {
            return None;
        }
        fields.sort_by_key(|(k, _)| *k);
        Some(
            fields
                .into_iter()
                .map(|(_, v)| v)
                .collect::<Vec<_>>()
                .join(","),
        )
    }
}

/// Options accepted by every constructor (`spec.md` §6). Unlike the
/// source's untyped option map, an unknown key cannot be expressed at all
/// here — the compiler rejects it, which is a stricter and strictly
/// earlier enforcement of the same "unknown keys fail immediately" rule.
pub struct JobOptions {
    pub in_file: Sink,
    pub out_file: Sink,
    pub err_file: Sink,
    pub working_dir: Option<PathBuf>,
    pub temp_base: Option<PathBuf>,
    pub existing_temp: Option<PathBuf>,
    pub raise_error: bool,
    pub die_on_destroy: bool,
    pub on_completion: Vec<Hook>,
    pub jobname: Option<String>,
    pub nodes: Option<u32>,
    pub procs_per_node: Option<u32>,
    pub vmem: Option<u64>,
    pub queue: Option<String>,
    pub max_cluster_jobs: Option<u64>,
    pub config: Option<Arc<Config>>,
}

impl Default for JobOptions {
    fn default() -> Self {
        JobOptions {
            in_file: Sink::Absent,
            out_file: Sink::Absent,
            err_file: Sink::Absent,
            working_dir: None,
            temp_base: None,
            existing_temp: None,
            raise_error: true,
            die_on_destroy: false,
            on_completion: Vec::new(),
            jobname: None,
            nodes: None,
            procs_per_node: None,
            vmem: None,
            queue: None,
            max_cluster_jobs: None,
            config: None,
        }
    }
}

/// The job abstraction (`spec.md` §3). Fields are `pub(crate)` so the
/// `backend` submodules can drive the lifecycle directly; external callers
/// use the methods below.
pub struct JobHandle {
    pub(crate) mode: Mode,
    pub(crate) command: CommandSpec,
    pub(crate) command_for_error: String,
    pub(crate) in_sink: Sink,
    pub(crate) out_sink: Sink,
    pub(crate) err_sink: Sink,
    pub(crate) working_dir: Option<PathBuf>,
    pub(crate) tempdir: JobTempdir,
    pub(crate) raise_error: bool,
    pub(crate) die_on_destroy: bool,
    pub(crate) on_completion: HookList,
    pub(crate) completion_fired: bool,
    pub(crate) told_to_die: bool,
    pub(crate) pid: Option<u32>,
    pub(crate) job_id: Option<String>,
    pub(crate) queue: Option<String>,
    pub(crate) resources: Resources,
    pub(crate) max_cluster_jobs: u64,
    pub(crate) start_time: Option<SystemTime>,
    pub(crate) end_time: Option<SystemTime>,
    pub(crate) host: Option<String>,
    pub(crate) exit_status: Option<i32>,
    pub(crate) signal: Option<i32>,
    pub(crate) properties: HashMap<String, String>,
    pub(crate) error_string: Option<String>,
    pub(crate) config: Arc<Config>,
    pub(crate) one_shot_overload_warning_fired: bool,
}

impl JobHandle {
    /// Run synchronously in the foreground; blocks until the command exits.
    pub fn run(command: CommandSpec, options: JobOptions) -> Result<JobHandle, JobError> {
        guard_foreground_background()?;
        let mut handle = JobHandle::new(Mode::Foreground, command, options)?;
        backend::foreground::run(&mut handle)?;
        Ok(handle)
    }

    /// Fork a supervisor process and return immediately; track it by pid.
    pub fn run_async(command: CommandSpec, options: JobOptions) -> Result<JobHandle, JobError> {
        guard_foreground_background()?;
        let mut handle = JobHandle::new(Mode::Background, command, options)?;
        backend::background::spawn(&mut handle)?;
        Ok(handle)
    }

    /// Submit to the PBS/Torque-compatible cluster queue.
    pub fn run_cluster(command: CommandSpec, options: JobOptions) -> Result<JobHandle, JobError> {
        let mut handle = JobHandle::new(Mode::Cluster, command, options)?;
        backend::cluster::submit::submit(&mut handle)?;
        Ok(handle)
    }

    fn new(mode: Mode, command: CommandSpec, options: JobOptions) -> Result<JobHandle, JobError> {
        let config = options.config.unwrap_or_else(|| Arc::new(Config::load()));

        let jobname = options
            .jobname
            .unwrap_or_else(|| derive_jobname(&command));

        let tempdir = match options.existing_temp {
            Some(path) => JobTempdir::adopt(path).map_err(|e| {
                JobError::Setup(format!("existing_temp is not usable: {e}"))
            })?,
            None => {
                let base = options
                    .temp_base
                    .or_else(|| config.temp_base.clone())
                    .unwrap_or_else(tempdir::default_base);
                JobTempdir::create(&base, &config.lib_tag, &jobname)
                    .map_err(|e| JobError::Setup(format!("tempdir creation failed: {e}")))?
            }
        };

        let rendezvous = Rendezvous::new(tempdir.path());
        let out_sink = default_output_sink(options.out_file, rendezvous.out_path());
        let err_sink = default_output_sink(options.err_file, rendezvous.err_path());

        if mode == Mode::Cluster {
            backend::cluster::accessibility::check(
                &config,
                tempdir.path(),
                &out_sink,
                &err_sink,
                options.working_dir.as_deref(),
            )?;
        }

        let mut on_completion = HookList::new();
        for hook in options.on_completion {
            on_completion.push(hook);
        }

        Ok(JobHandle {
            mode,
            command_for_error: command.display(),
            command,
            in_sink: options.in_file,
            out_sink,
            err_sink,
            working_dir: options.working_dir,
            tempdir,
            raise_error: options.raise_error,
            die_on_destroy: options.die_on_destroy,
            on_completion,
            completion_fired: false,
            told_to_die: false,
            pid: None,
            job_id: None,
            queue: options.queue,
            resources: Resources {
                nodes: options.nodes,
                procs_per_node: options.procs_per_node,
                vmem_megabytes: options.vmem,
            },
            max_cluster_jobs: options.max_cluster_jobs.unwrap_or(config.max_cluster_jobs),
            start_time: None,
            end_time: None,
            host: None,
            exit_status: None,
            signal: None,
            properties: HashMap::new(),
            error_string: None,
            config,
            one_shot_overload_warning_fired: false,
        })
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn job_id(&self) -> Option<&str> {
        self.job_id.as_deref()
    }

    pub fn tempdir_path(&self) -> &Path {
        self.tempdir.path()
    }

    pub fn start_time(&self) -> Option<SystemTime> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<SystemTime> {
        self.end_time
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// The decoded exit code, or `None` if the job hasn't terminated
    /// cleanly (still running, killed by signal, or failed to start).
    pub fn exit_status(&mut self) -> Option<i32> {
        self.observe();
        self.exit_status
    }

    pub fn error_string(&self) -> Option<&str> {
        self.error_string.as_deref()
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    /// Whether the job is still running. Lazily polls the rendezvous
    /// directory (background/cluster) or `qstat` (cluster) and fires
    /// completion hooks the first time a terminal state is observed.
    pub fn alive(&mut self) -> bool {
        match self.mode {
            Mode::Foreground => false,
            Mode::Background => backend::background::alive(self),
            Mode::Cluster => backend::cluster::alive(self),
        }
    }

    /// Block until the job terminates.
    pub fn wait(&mut self) -> Result<(), JobError> {
        match self.mode {
            Mode::Foreground => Ok(()),
            Mode::Background => backend::background::wait(self),
            Mode::Cluster => backend::cluster::wait(self),
        }
    }

    /// Request cancellation. Marks `told_to_die` so that a subsequent
    /// `Got signal SIG(INT|QUIT|TERM)` observation is suppressed from
    /// `raise_error` surfacing (`spec.md` §4.8, §8 invariant 4).
    pub fn kill(&mut self) -> Result<bool, JobError> {
        self.told_to_die = true;
        match self.mode {
            Mode::Foreground => Ok(true),
            Mode::Background => backend::background::kill(self),
            Mode::Cluster => backend::cluster::kill(self),
        }
    }

    /// Remove the tempdir (a no-op for `existing_temp`-adopted
    /// directories; idempotent if already removed).
    pub fn cleanup(&mut self) -> std::io::Result<()> {
        self.tempdir.cleanup()
    }

    pub fn out(&self) -> String {
        read_sink_text(&self.out_sink)
    }

    pub fn err(&self) -> String {
        read_sink_text(&self.err_sink)
    }

    /// The filesystem path backing the stdout sink, if it is path-based
    /// (true for the default sink and any `out_file` set to a path).
    pub fn out_path(&self) -> Option<&Path> {
        self.out_sink.as_path()
    }

    /// The filesystem path backing the stderr sink, if it is path-based.
    pub fn err_path(&self) -> Option<&Path> {
        self.err_sink.as_path()
    }

    pub fn to_serialized(&self) -> SerializedHandle {
        SerializedHandle {
            mode: self.mode,
            command_display: self.command_for_error.clone(),
            tempdir: self.tempdir.path().to_path_buf(),
            pid: self.pid,
            job_id: self.job_id.clone(),
            queue: self.queue.clone(),
            resources: self.resources.clone(),
            max_cluster_jobs: self.max_cluster_jobs,
            start_time_unix: self.start_time.and_then(to_unix),
            end_time_unix: self.end_time.and_then(to_unix),
            host: self.host.clone(),
            exit_status: self.exit_status,
            signal: self.signal,
            error_string: self.error_string.clone(),
            properties: self.properties.clone(),
            out_path: self.out_sink.as_path().map(Path::to_path_buf),
            err_path: self.err_sink.as_path().map(Path::to_path_buf),
            tempdir_owned: self.tempdir.owned(),
        }
    }

    /// Resume observation-only supervision of a handle serialized by a
    /// prior controller process (`spec.md` §6, "Handle serialization
    /// contract"). Ownership of the tempdir carries over from the
    /// originating handle (`tempdir_owned`), so `cleanup` on the resumed
    /// handle can actually delete a directory the original process
    /// created; no hooks are attached (closures do not serialize) and the
    /// command is only available in its display form, sufficient for
    /// observation and diagnostics but not for re-execution.
    pub fn from_serialized(s: SerializedHandle, config: Arc<Config>) -> std::io::Result<JobHandle> {
        let tempdir = JobTempdir::resume(s.tempdir, s.tempdir_owned)?;
        let out_sink = s.out_path.clone().map(Sink::Path).unwrap_or(Sink::Absent);
        let err_sink = s.err_path.map(Sink::Path).unwrap_or(Sink::Absent);
        Ok(JobHandle {
            mode: s.mode,
            command_for_error: s.command_display.clone(),
            command: CommandSpec::Shell(s.command_display),
            in_sink: Sink::Absent,
            out_sink,
            err_sink,
            working_dir: None,
            tempdir,
            raise_error: true,
            die_on_destroy: false,
            on_completion: HookList::new(),
            completion_fired: s.exit_status.is_some() || s.error_string.is_some(),
            told_to_die: false,
            pid: s.pid,
            job_id: s.job_id,
            queue: s.queue,
            resources: s.resources,
            max_cluster_jobs: s.max_cluster_jobs,
            start_time: s.start_time_unix.map(from_unix),
            end_time: s.end_time_unix.map(from_unix),
            host: s.host,
            exit_status: s.exit_status,
            signal: s.signal,
            properties: s.properties,
            error_string: s.error_string,
            config,
            one_shot_overload_warning_fired: false,
        })
    }

    // -- shared internals used by `backend` ------------------------------

    pub(crate) fn build_exec_request(&mut self) -> ExecRequest {
        ExecRequest {
            command: self.command.clone(),
            stdin: take_sink_for_exec(&mut self.in_sink),
            stdout: take_sink_for_exec(&mut self.out_sink),
            stderr: take_sink_for_exec(&mut self.err_sink),
            working_dir: self.working_dir.clone(),
        }
    }

    pub(crate) fn rendezvous(&self) -> Rendezvous {
        Rendezvous::new(self.tempdir.path())
    }

    /// Lazily read the rendezvous directory: if a die-file is present, the
    /// job has failed (error propagation takes precedence, hooks do not
    /// fire, `spec.md` §4.7); otherwise, if the status file records a
    /// completed run, finalize success and fire hooks exactly once.
    pub(crate) fn observe(&mut self) {
        if self.end_time.is_some() {
            return;
        }
        let rv = self.rendezvous();
        if rv.died_exists_uncached() {
            let msg = rv.read_died().unwrap_or_else(|| "job died".to_string());
            self.end_time = Some(SystemTime::now());
            self.error_string = Some(msg);
            // The exec helper writes `status` before `died` on a non-zero
            // exit (only a setup/spawn failure skips it), so a `ret` is
            // usually there too; recover it so `exit_status`/`signal`
            // reflect the real result instead of staying `None`.
            if let Ok(Some(rec)) = rv.read_status() {
                if let Some(start) = rec.start {
                    self.start_time.get_or_insert(from_unix(start));
                }
                let (exit_code, signal) = rec.decode().unwrap_or((None, None));
                self.exit_status = exit_code;
                self.signal = signal;
                if rec.host.is_some() {
                    self.host = rec.host;
                }
            }
            return;
        }
        let Ok(Some(rec)) = rv.read_status() else {
            return;
        };
        if let Some(start) = rec.start {
            self.start_time.get_or_insert(from_unix(start));
        }
        if rec.ret.is_none() {
            return;
        }
        let (exit_code, signal) = rec.decode().unwrap_or((None, None));
        self.end_time = rec.end.map(from_unix).or(Some(SystemTime::now()));
        self.host = rec.host;
        self.exit_status = exit_code;
        self.signal = signal;
        if exit_code == Some(0) && signal.is_none() {
            self.fire_hooks_once();
        }
    }

    pub(crate) fn fire_hooks_once(&mut self) {
        if self.completion_fired {
            return;
        }
        self.completion_fired = true;
        let mut hooks = self.on_completion.take();
        for hook in hooks.iter_mut() {
            hook(self);
        }
    }

    /// Build the formatted diagnostic report (`spec.md` §4.6) for
    /// `inner_message`, gathering cluster context when in cluster mode.
    pub(crate) fn format_error_report(&self, inner_message: &str) -> String {
        let out_path = self.out_sink.as_path();
        let err_path = self.err_sink.as_path();
        let err_contents = err_path.and_then(|p| std::fs::read_to_string(p).ok());
        let qstat_dump = if self.mode == Mode::Cluster {
            self.job_id
                .as_deref()
                .and_then(|id| backend::cluster::qstat::dump_for(id, &self.config))
        } else {
            None
        };
        let cluster = if self.mode == Mode::Cluster {
            Some(error::ClusterErrorContext {
                job_id: self.job_id.as_deref().unwrap_or("unknown"),
                err_file_contents: err_contents.as_deref(),
                qstat_dump: qstat_dump.as_deref(),
            })
        } else {
            None
        };
        let ctx = error::ErrorContext {
            lib_tag: &self.config.lib_tag,
            command_display: self.command_for_error.clone(),
            start_time: self.start_time,
            out_path,
            err_path,
            cluster,
        };
        error::format_error(&ctx, inner_message)
    }

    pub(crate) fn config(&self) -> &Arc<Config> {
        &self.config
    }
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("mode", &self.mode)
            .field("command", &self.command_for_error)
            .field("tempdir", &self.tempdir.path())
            .field("pid", &self.pid)
            .field("job_id", &self.job_id)
            .field("exit_status", &self.exit_status)
            .field("error_string", &self.error_string)
            .finish()
    }
}

impl Drop for JobHandle {
    fn drop(&mut self) {
        if self.die_on_destroy && matches!(self.mode, Mode::Background | Mode::Cluster) {
            let _ = self.kill();
            let _ = self.tempdir.cleanup();
        } else if self.mode == Mode::Foreground {
            let _ = self.tempdir.cleanup();
        }
        // Background/cluster handles without die_on_destroy leave their
        // tempdir in place: a later controller may still want to observe
        // or resume them (`spec.md` §3, destruction rules).
    }
}

/// Stable byte-representable subset of a [`JobHandle`]'s state (`spec.md`
/// §6, "Handle serialization contract"). In-memory buffers, live streams,
/// and completion hooks are intentionally absent: they cannot survive a
/// process restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializedHandle {
    pub mode: Mode,
    pub command_display: String,
    pub tempdir: PathBuf,
    pub pid: Option<u32>,
    pub job_id: Option<String>,
    pub queue: Option<String>,
    pub resources: Resources,
    pub max_cluster_jobs: u64,
    pub start_time_unix: Option<u64>,
    pub end_time_unix: Option<u64>,
    pub host: Option<String>,
    pub exit_status: Option<i32>,
    pub signal: Option<i32>,
    pub error_string: Option<String>,
    pub properties: HashMap<String, String>,
    pub out_path: Option<PathBuf>,
    pub err_path: Option<PathBuf>,
    /// Whether the process that created this `SerializedHandle` owned its
    /// tempdir (as opposed to having adopted an `existing_temp`). Carried
    /// across processes so a resumed handle's `cleanup` can tell the
    /// difference (`spec.md` §6).
    pub tempdir_owned: bool,
}

fn guard_foreground_background() -> Result<(), JobError> {
    if std::env::var_os("PROCJOB_FOREGROUND_BACKGROUND_DISABLED").is_some() {
        return Err(JobError::Usage(
            "foreground/background execution is disabled by \
             PROCJOB_FOREGROUND_BACKGROUND_DISABLED; use run_cluster"
                .to_string(),
        ));
    }
    Ok(())
}

fn derive_jobname(command: &CommandSpec) -> String {
    let display = command.display();
    let first_token = display.split_whitespace().next().unwrap_or("job");
    Path::new(first_token)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("job")
        .to_string()
}

fn default_output_sink(sink: Sink, default_path: PathBuf) -> Sink {
    if sink.is_absent() {
        Sink::Path(default_path)
    } else {
        sink
    }
}

/// Move a sink into an [`ExecRequest`] without requiring `Sink: Clone`:
/// path/descriptor/shared-state variants are cheaply duplicated in place
/// (so the handle can still read them back afterward), while `Owned`
/// and `Bytes` are one-shot and taken outright.
fn take_sink_for_exec(sink: &mut Sink) -> Sink {
    match sink {
        Sink::Absent => Sink::Absent,
        Sink::Path(p) => Sink::Path(p.clone()),
        Sink::Borrowed(fd) => Sink::Borrowed(*fd),
        Sink::InMemory(buf) => Sink::InMemory(Arc::clone(buf)),
        Sink::Producer(p) => Sink::Producer(Arc::clone(p)),
        Sink::Consumer(c) => Sink::Consumer(Arc::clone(c)),
        Sink::Owned(_) | Sink::Bytes(_) => std::mem::replace(sink, Sink::Absent),
    }
}

fn read_sink_text(sink: &Sink) -> String {
    match sink {
        Sink::Path(p) => std::fs::read_to_string(p).unwrap_or_default(),
        Sink::InMemory(buf) => {
            String::from_utf8_lossy(&buf.lock().expect("sink buffer lock poisoned")).into_owned()
        }
        _ => String::new(),
    }
}

fn to_unix(t: SystemTime) -> Option<u64> {
    t.duration_since(UNIX_EPOCH).ok().map(|d| d.as_secs())
}

fn from_unix(secs: u64) -> SystemTime {
    UNIX_EPOCH + std::time::Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Arc<Config> {
        Arc::new(Config::default())
    }

    #[test]
    fn foreground_success_sets_exit_status_and_fires_hook() {
        let base = tempfile::tempdir().expect("base");
        let fired = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let fired2 = Arc::clone(&fired);
        let options = JobOptions {
            temp_base: Some(base.path().to_path_buf()),
            config: Some(test_config()),
            on_completion: vec![Box::new(move |_h: &JobHandle| {
                fired2.store(true, std::sync::atomic::Ordering::SeqCst);
            })],
            ..Default::default()
        };
        let mut handle =
            JobHandle::run(CommandSpec::Argv(vec!["true".to_string()]), options).expect("run");
        assert_eq!(handle.exit_status(), Some(0));
        assert!(fired.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(handle.out(), "");
        assert_eq!(handle.err(), "");
    }

    #[test]
    fn foreground_failure_is_surfaced_when_raise_error() {
        let base = tempfile::tempdir().expect("base");
        let options = JobOptions {
            temp_base: Some(base.path().to_path_buf()),
            config: Some(test_config()),
            raise_error: true,
            ..Default::default()
        };
        let err = JobHandle::run(CommandSpec::Argv(vec!["false".to_string()]), options)
            .expect_err("false should fail");
        assert!(err.as_inner_text().contains("command failed: 'false'"));
        assert!(err.as_inner_text().contains("last few lines of stderr:"));
    }

    #[test]
    fn foreground_failure_is_stored_when_raise_error_false() {
        let base = tempfile::tempdir().expect("base");
        let options = JobOptions {
            temp_base: Some(base.path().to_path_buf()),
            config: Some(test_config()),
            raise_error: false,
            ..Default::default()
        };
        let mut handle =
            JobHandle::run(CommandSpec::Argv(vec!["false".to_string()]), options).expect("run");
        assert!(handle.error_string().is_some());
        assert_eq!(handle.exit_status(), Some(1));
    }

    #[test]
    fn resumed_handle_inherits_tempdir_ownership_and_can_clean_up() {
        let base = tempfile::tempdir().expect("base");
        let options = JobOptions {
            temp_base: Some(base.path().to_path_buf()),
            config: Some(test_config()),
            ..Default::default()
        };
        let handle =
            JobHandle::run(CommandSpec::Argv(vec!["true".to_string()]), options).expect("run");
        let tempdir = handle.tempdir_path().to_path_buf();
        let serialized = handle.to_serialized();
        assert!(serialized.tempdir_owned);
        std::mem::forget(handle); // this process still owns `tempdir`; don't delete it here

        let mut resumed =
            JobHandle::from_serialized(serialized, test_config()).expect("resume");
        assert!(tempdir.is_dir());
        resumed.cleanup().expect("cleanup");
        assert!(!tempdir.is_dir());
    }

    #[test]
    fn resource_string_matches_spec_example() {
        let r = Resources {
            nodes: Some(2),
            procs_per_node: Some(4),
            vmem_megabytes: Some(8192),
        };
        assert_eq!(r.to_resource_string().as_deref(), Some("nodes=2:ppn=4,vmem=8192m"));
    }

    #[test]
    fn existing_temp_is_not_owned() {
        let dir = tempfile::tempdir().expect("dir");
        let options = JobOptions {
            existing_temp: Some(dir.path().to_path_buf()),
            config: Some(test_config()),
            ..Default::default()
        };
        let mut handle =
            JobHandle::run(CommandSpec::Argv(vec!["true".to_string()]), options).expect("run");
        assert!(!handle.tempdir.owned());
        handle.cleanup().expect("cleanup");
        assert!(dir.path().is_dir(), "existing_temp must survive cleanup");
    }
}
