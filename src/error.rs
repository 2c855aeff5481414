//! Error kinds and the diagnostic formatter (`spec.md` §4.6, §7).

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Local};

/// The five error Kinds from `spec.md` §7.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// Bad option key, undefined argument, invalid mode/sink combination.
    #[error("{0}")]
    Usage(String),
    /// Tempdir creation failure, cwd change failure, exec failure.
    #[error("{0}")]
    Setup(String),
    /// Non-zero exit, non-ignored signal, OS error during wait.
    #[error("{0}")]
    Runtime(String),
    /// Signal received after `told_to_die`; stored but not raised.
    #[error("{0}")]
    Cancelled(String),
    /// Unparseable qsub output, qdel failing twice, qstat repeatedly
    /// failing.
    #[error("{0}")]
    Scheduler(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl JobError {
    /// Whether this error matches the cancellation pattern of `spec.md`
    /// §4.8 (`Got signal SIG(INT|QUIT|TERM)` after `told_to_die`), and so
    /// should be suppressed from `raise_error` surfacing.
    pub fn is_suppressible_cancellation(&self) -> bool {
        matches!(self, JobError::Cancelled(_))
    }

    pub fn as_inner_text(&self) -> String {
        self.to_string()
    }
}

/// Returns `true` if `message` matches `Got signal SIG(INT|QUIT|TERM)`,
/// independent of whether it has already been wrapped as a [`JobError`].
pub fn looks_like_cancellation_signal(message: &str) -> bool {
    for name in ["SIGINT", "SIGQUIT", "SIGTERM"] {
        if message.contains(&format!("Got signal {name}")) {
            return true;
        }
    }
    false
}

/// Everything the formatter needs to know about a failed job, gathered by
/// the caller (typically [`crate::handle::JobHandle`]) so this module has
/// no dependency on the handle type.
pub struct ErrorContext<'a> {
    pub lib_tag: &'a str,
    pub command_display: String,
    pub start_time: Option<SystemTime>,
    pub out_path: Option<&'a Path>,
    pub err_path: Option<&'a Path>,
    pub cluster: Option<ClusterErrorContext<'a>>,
}

pub struct ClusterErrorContext<'a> {
    pub job_id: &'a str,
    /// Raw contents of the error-sink file, scanned for `=>> PBS:` resource
    /// manager warning lines.
    pub err_file_contents: Option<&'a str>,
    /// A fresh `qstat -f <jobid>` dump, appended verbatim for context.
    pub qstat_dump: Option<&'a str>,
}

const TAIL_LINES: usize = 20;

/// Build the multi-line, library-tag-prefixed diagnostic report described
/// in `spec.md` §4.6.
pub fn format_error(ctx: &ErrorContext, inner_message: &str) -> String {
    let mut lines = Vec::new();

    if let Some(cluster) = &ctx.cluster {
        lines.push(format!("job id: {}", cluster.job_id));
        if let Some(contents) = cluster.err_file_contents {
            for warn_line in contents.lines().filter(|l| l.starts_with("=>> PBS:")) {
                lines.push(warn_line.to_string());
            }
        }
    }

    if let Some(start) = ctx.start_time {
        lines.push(format!("start time: {}", format_local(start)));
    }
    lines.push(format!("current time: {}", format_local(SystemTime::now())));
    lines.push(format!("command: {}", ctx.command_display));
    lines.push(format!(
        "error: {}",
        inner_message.trim_end_matches(['.', '!', '\n', ' '])
    ));

    if let Some(out) = ctx.out_path {
        lines.push("last few lines of stdout:".to_string());
        lines.extend(tail_lines(out, TAIL_LINES));
    }
    if let Some(err) = ctx.err_path {
        lines.push("last few lines of stderr:".to_string());
        lines.extend(tail_lines(err, TAIL_LINES));
    }

    if let Some(cluster) = &ctx.cluster {
        if let Some(dump) = cluster.qstat_dump {
            lines.push(format!("qstat -f {}:", cluster.job_id));
            lines.extend(dump.lines().map(str::to_string));
        }
    }

    lines
        .into_iter()
        .map(|l| format!("[{}] {l}", ctx.lib_tag))
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_local(t: SystemTime) -> String {
    let dt: DateTime<Local> = t.into();
    dt.format("%Y-%m-%d %H:%M:%S %Z").to_string()
}

/// Read the last `n` lines of `path`, lossily decoded. Returns an empty
/// vector (not an error) when the file is missing or unreadable — tailing
/// is best-effort diagnostics, not load-bearing logic.
fn tail_lines(path: &Path, n: usize) -> Vec<String> {
    let Ok(data) = std::fs::read(path) else {
        return Vec::new();
    };
    let text = String::from_utf8_lossy(&data);
    let all: Vec<&str> = text.lines().collect();
    let skip = all.len().saturating_sub(n);
    all[skip..].iter().map(|s| s.to_string()).collect()
}

/// Resolve a `PathBuf` version of [`tail_lines`] for callers that only have
/// an owned path (e.g. after a sink has been finalized).
pub fn tail_file(path: &PathBuf, n: usize) -> Vec<String> {
    tail_lines(path, n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_pattern_detected() {
        assert!(looks_like_cancellation_signal("Got signal SIGTERM"));
        assert!(looks_like_cancellation_signal("Got signal SIGINT while waiting"));
        assert!(!looks_like_cancellation_signal("Got signal SIGKILL"));
    }

    #[test]
    fn format_error_includes_command_and_tail() {
        let dir = tempfile::tempdir().expect("tmp");
        let err_path = dir.path().join("err");
        std::fs::write(&err_path, "line1\nline2\n").expect("write");

        let ctx = ErrorContext {
            lib_tag: "procjob",
            command_display: "false".to_string(),
            start_time: Some(SystemTime::now()),
            out_path: None,
            err_path: Some(&err_path),
            cluster: None,
        };
        let report = format_error(&ctx, "command failed: 'false'.");
        assert!(report.contains("command: false"));
        assert!(report.contains("last few lines of stderr:"));
        assert!(report.contains("line2"));
        assert!(report.contains("command failed: 'false'"));
        assert!(report.lines().all(|l| l.starts_with("[procjob]")));
    }

    #[test]
    fn cluster_context_prepends_job_id_and_pbs_warnings() {
        let ctx = ErrorContext {
            lib_tag: "procjob",
            command_display: "sleep 1".to_string(),
            start_time: None,
            out_path: None,
            err_path: None,
            cluster: Some(ClusterErrorContext {
                job_id: "123.server",
                err_file_contents: Some("=>> PBS: job killed: walltime\nnormal stderr\n"),
                qstat_dump: Some("Job Id: 123.server\n    job_state = C\n"),
            }),
        };
        let report = format_error(&ctx, "non-zero exit");
        assert!(report.contains("job id: 123.server"));
        assert!(report.contains("=>> PBS: job killed: walltime"));
        assert!(report.contains("qstat -f 123.server:"));
    }
}
