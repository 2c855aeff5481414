//! Cluster filesystem accessibility check (`spec.md` §4.5, "Filesystem
//! accessibility check"), run once when a cluster-mode handle is
//! constructed.

use std::path::Path;

use crate::config::Config;
use crate::error::JobError;
use crate::sink::Sink;

/// Verify `tempdir`, `out_sink`, `err_sink`, and (if set) `working_dir` are
/// all filesystem paths reachable from cluster compute nodes. Live
/// streams and non-path sinks (in-memory, producer, consumer) are
/// rejected outright: there is no process on the submitting host for a
/// remote job to hand a descriptor or callback to (`spec.md` §9, open
/// question (c) — rejecting the configuration rather than attempting to
/// silently tie mismatched sinks).
pub fn check(
    config: &Config,
    tempdir: &Path,
    out_sink: &Sink,
    err_sink: &Sink,
    working_dir: Option<&Path>,
) -> Result<(), JobError> {
    let out_path = require_path_sink(out_sink, "out_file")?;
    let err_path = require_path_sink(err_sink, "err_file")?;

    require_accessible(config, "tempdir", tempdir)?;
    require_accessible(config, "out_file", out_path)?;
    require_accessible(config, "err_file", err_path)?;
    if let Some(wd) = working_dir {
        require_accessible(config, "working_dir", wd)?;
    }
    Ok(())
}

fn require_path_sink<'a>(sink: &'a Sink, label: &str) -> Result<&'a Path, JobError> {
    sink.as_path()
        .ok_or_else(|| JobError::Usage(format!("{label} must be a filesystem path for cluster mode")))
}

fn require_accessible(config: &Config, label: &str, path: &Path) -> Result<(), JobError> {
    if config.path_is_cluster_accessible(path) {
        Ok(())
    } else {
        Err(JobError::Usage(format!(
            "{label} path {} is not reachable from cluster compute nodes",
            path.display()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn rejects_live_stream_out_sink() {
        let config = Config::default();
        let err = check(&config, Path::new("/home/x"), &Sink::Borrowed(1), &Sink::Path(PathBuf::from("/home/x/err")), None)
            .expect_err("live stream should be rejected");
        assert!(matches!(err, JobError::Usage(_)));
    }

    #[test]
    fn rejects_inaccessible_tempdir() {
        let config = Config::default();
        let out = Sink::Path(PathBuf::from("/home/x/out"));
        let err_sink = Sink::Path(PathBuf::from("/home/x/err"));
        let err = check(&config, Path::new("/tmp/scratch"), &out, &err_sink, None)
            .expect_err("tmp should be rejected");
        assert!(matches!(err, JobError::Usage(_)));
    }

    #[test]
    fn accepts_paths_under_home() {
        let config = Config::default();
        let out = Sink::Path(PathBuf::from("/home/x/out"));
        let err_sink = Sink::Path(PathBuf::from("/home/x/err"));
        check(&config, Path::new("/home/x/tmp"), &out, &err_sink, Some(Path::new("/home/x"))).expect("should pass");
    }
}
