//! `pjob` — command-line front end for the `procjob` library.
//!
//! All stdout is JSON only. Tracing logs go to stderr.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use procjob::schema::{self, CleanupData, JobData, KillData};
use procjob::{CommandSpec, Config, JobHandle, JobOptions, Mode, SerializedHandle};

#[derive(Debug, Parser)]
#[command(name = "pjob")]
#[command(about = "Run, track and cancel jobs in the foreground, in the background, or on a cluster", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v, -vv); logs go to stderr.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

/// Flags shared by `run`, `run-async` and `run-cluster`: everything
/// `JobOptions` exposes except the cluster-only resource request fields.
#[derive(Debug, clap::Args)]
struct CommonRunArgs {
    /// Path to read stdin from.
    #[arg(long = "in")]
    in_file: Option<PathBuf>,

    /// Path to write stdout to (default: a file inside the job's tempdir).
    #[arg(long)]
    out: Option<PathBuf>,

    /// Path to write stderr to (default: a file inside the job's tempdir).
    #[arg(long)]
    err: Option<PathBuf>,

    /// Working directory for the command.
    #[arg(long)]
    working_dir: Option<PathBuf>,

    /// Base directory under which the job's tempdir is created.
    #[arg(long)]
    temp_base: Option<PathBuf>,

    /// Name used when deriving the tempdir name (default: command basename).
    #[arg(long)]
    jobname: Option<String>,

    /// Run `command` through `/bin/sh -c` instead of as argv tokens.
    #[arg(long)]
    shell: bool,

    /// Treat a non-zero exit or signal as success (do not return an error).
    #[arg(long)]
    no_raise_error: bool,

    /// Command and arguments to run.
    #[arg(required = true, trailing_var_arg = true)]
    command: Vec<String>,
}

impl CommonRunArgs {
    fn command_spec(&self) -> CommandSpec {
        if self.shell {
            CommandSpec::Shell(self.command.join(" "))
        } else {
            CommandSpec::Argv(self.command.clone())
        }
    }

    fn job_options(&self, config: Arc<Config>) -> JobOptions {
        JobOptions {
            in_file: path_sink(self.in_file.clone()),
            out_file: path_sink(self.out.clone()),
            err_file: path_sink(self.err.clone()),
            working_dir: self.working_dir.clone(),
            temp_base: self.temp_base.clone(),
            jobname: self.jobname.clone(),
            raise_error: !self.no_raise_error,
            config: Some(config),
            ..Default::default()
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a command synchronously in the foreground.
    Run {
        #[command(flatten)]
        common: CommonRunArgs,
    },

    /// Fork a supervisor process and return immediately.
    #[command(name = "run-async")]
    RunAsync {
        #[command(flatten)]
        common: CommonRunArgs,
    },

    /// Submit a command to the PBS/Torque cluster queue.
    #[command(name = "run-cluster")]
    RunCluster {
        #[command(flatten)]
        common: CommonRunArgs,

        /// Number of nodes to request.
        #[arg(long)]
        nodes: Option<u32>,

        /// Processes per node to request.
        #[arg(long)]
        ppn: Option<u32>,

        /// Virtual memory to request, in megabytes.
        #[arg(long)]
        vmem: Option<u64>,

        /// Queue to submit into.
        #[arg(long)]
        queue: Option<String>,

        /// Override the configured admission threshold.
        #[arg(long)]
        max_cluster_jobs: Option<u64>,
    },

    /// Report whether a job is still running.
    Status {
        /// The job's tempdir, as printed by `run`/`run-async`/`run-cluster`.
        #[arg(long)]
        tempdir: PathBuf,
    },

    /// Block until a job terminates.
    Wait {
        #[arg(long)]
        tempdir: PathBuf,
    },

    /// Cancel a running job.
    Kill {
        #[arg(long)]
        tempdir: PathBuf,
    },

    /// Remove a job's tempdir.
    Cleanup {
        #[arg(long)]
        tempdir: PathBuf,
    },

    /// [Internal] Run the command on a cluster compute node and report back
    /// through the rendezvous directory the driver script points at.
    #[command(name = "_cluster-run", hide = true)]
    ClusterRun {
        #[arg(long)]
        tempdir: PathBuf,

        #[arg(long)]
        out: PathBuf,

        #[arg(long)]
        err: PathBuf,

        #[arg(long)]
        working_dir: Option<PathBuf>,

        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,
    },
}

fn path_sink(path: Option<PathBuf>) -> procjob::sink::Sink {
    match path {
        Some(p) => procjob::sink::Sink::Path(p),
        None => procjob::sink::Sink::Absent,
    }
}

fn main() {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    // Logs always go to stderr so stdout remains JSON-only.
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();

    let result = run(cli);
    if let Err(e) = result {
        if e.downcast_ref::<JobNotFound>().is_some() {
            schema::ErrorResponse::new("job_not_found", format!("{e:#}"), false).print();
        } else {
            schema::ErrorResponse::new("internal_error", format!("{e:#}"), false).print();
        }
        std::process::exit(1);
    }
}

/// Error marker distinguishing "no job at this tempdir" from any other
/// failure, mirrored on the handle-file lookup path in [`load_handle`].
#[derive(Debug)]
struct JobNotFound(PathBuf);

impl std::fmt::Display for JobNotFound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "no job recorded at {}", self.0.display())
    }
}

impl std::error::Error for JobNotFound {}

fn handle_file(tempdir: &Path) -> PathBuf {
    tempdir.join("handle.json")
}

/// Persist the subset of handle state needed to resume observation in a
/// later invocation (`status`/`wait`/`kill`/`cleanup` run as separate
/// processes from the one that started the job).
fn save_handle(handle: &JobHandle) -> Result<()> {
    let serialized = handle.to_serialized();
    let text = serde_json::to_string_pretty(&serialized)?;
    std::fs::write(handle_file(handle.tempdir_path()), text)?;
    Ok(())
}

fn load_handle(tempdir: &Path, config: Arc<Config>) -> Result<JobHandle> {
    let path = handle_file(tempdir);
    let text = std::fs::read_to_string(&path).map_err(|_| JobNotFound(tempdir.to_path_buf()))?;
    let serialized: SerializedHandle =
        serde_json::from_str(&text).context("handle.json is not valid JSON")?;
    Ok(JobHandle::from_serialized(serialized, config)?)
}

fn job_data(handle: &mut JobHandle) -> JobData {
    // Touch liveness so a just-finished job's terminal fields are current.
    let _ = handle.alive();
    let exit_code = handle.exit_status();
    let state = if handle.error_string().is_some() {
        "failed"
    } else if exit_code.is_some() {
        "exited"
    } else {
        "running"
    };
    JobData {
        job_id: handle.job_id().map(str::to_string).unwrap_or_else(|| {
            handle.tempdir_path().display().to_string()
        }),
        mode: match handle.mode() {
            Mode::Foreground => "foreground",
            Mode::Background => "background",
            Mode::Cluster => "cluster",
        }
        .to_string(),
        tempdir: handle.tempdir_path().display().to_string(),
        pid: handle.pid(),
        cluster_job_id: if handle.mode() == Mode::Cluster {
            handle.job_id().map(str::to_string)
        } else {
            None
        },
        state: state.to_string(),
        exit_code,
        signal: None,
        error: handle.error_string().map(str::to_string),
        stdout_log_path: handle
            .out_path()
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
        stderr_log_path: handle
            .err_path()
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run { common } => {
            let config = Arc::new(Config::load());
            let options = common.job_options(config);
            let mut handle = JobHandle::run(common.command_spec(), options)
                .context("command failed")?;
            save_handle(&handle)?;
            schema::Response::new("run", job_data(&mut handle)).print();
            // `handle.json` was just written into the tempdir for later
            // `status`/`wait`/`kill`/`cleanup` invocations to pick up; a
            // foreground handle's `Drop` auto-removes its tempdir, which
            // would delete that file the instant this process exits, so
            // forget the handle instead of letting it run.
            std::mem::forget(handle);
        }

        Command::RunAsync { common } => {
            let config = Arc::new(Config::load());
            let options = common.job_options(config);
            let mut handle = JobHandle::run_async(common.command_spec(), options)
                .context("failed to start background job")?;
            save_handle(&handle)?;
            schema::Response::new("run-async", job_data(&mut handle)).print();
        }

        Command::RunCluster {
            common,
            nodes,
            ppn,
            vmem,
            queue,
            max_cluster_jobs,
        } => {
            let config = Arc::new(Config::load());
            let mut options = common.job_options(Arc::clone(&config));
            options.nodes = nodes;
            options.procs_per_node = ppn;
            options.vmem = vmem;
            options.queue = queue;
            options.max_cluster_jobs = max_cluster_jobs;
            let mut handle = JobHandle::run_cluster(common.command_spec(), options)
                .context("failed to submit cluster job")?;
            save_handle(&handle)?;
            schema::Response::new("run-cluster", job_data(&mut handle)).print();
        }

        Command::Status { tempdir } => {
            let config = Arc::new(Config::load());
            let mut handle = load_handle(&tempdir, config)?;
            schema::Response::new("status", job_data(&mut handle)).print();
        }

        Command::Wait { tempdir } => {
            let config = Arc::new(Config::load());
            let mut handle = load_handle(&tempdir, config)?;
            let wait_result = handle.wait();
            save_handle(&handle)?;
            wait_result.context("job failed")?;
            schema::Response::new("wait", job_data(&mut handle)).print();
        }

        Command::Kill { tempdir } => {
            let config = Arc::new(Config::load());
            let mut handle = load_handle(&tempdir, config)?;
            let killed = handle.kill().context("failed to cancel job")?;
            save_handle(&handle)?;
            schema::Response::new(
                "kill",
                KillData {
                    job_id: handle.job_id().map(str::to_string).unwrap_or_else(|| {
                        handle.tempdir_path().display().to_string()
                    }),
                    killed,
                },
            )
            .print();
        }

        Command::Cleanup { tempdir } => {
            let config = Arc::new(Config::load());
            let mut handle = load_handle(&tempdir, config)?;
            let job_id = handle
                .job_id()
                .map(str::to_string)
                .unwrap_or_else(|| handle.tempdir_path().display().to_string());
            handle.cleanup().context("failed to remove tempdir")?;
            let removed = !tempdir.is_dir();
            let _ = std::fs::remove_file(handle_file(&tempdir));
            schema::Response::new(
                "cleanup",
                CleanupData {
                    job_id,
                    removed,
                },
            )
            .print();
        }

        Command::ClusterRun {
            tempdir,
            out,
            err,
            working_dir,
            command,
        } => {
            let config = Arc::new(Config::load());
            let options = JobOptions {
                out_file: procjob::sink::Sink::Path(out),
                err_file: procjob::sink::Sink::Path(err),
                working_dir,
                existing_temp: Some(tempdir),
                config: Some(config),
                ..Default::default()
            };
            let mut handle = JobHandle::run(CommandSpec::Argv(command), options)
                .context("command failed")?;
            let exit_code = handle.exit_status().unwrap_or(1);
            schema::Response::new("run", job_data(&mut handle)).print();
            std::process::exit(exit_code);
        }
    }
    Ok(())
}
