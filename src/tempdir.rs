//! Per-job tempdir management (`spec.md` §4.2).
//!
//! A job's tempdir is the filesystem rendezvous for its `status`/`died`
//! default `out`/`err` files. Layout:
//!
//! ```text
//! <base>/<user>-<libtag>-tempfiles/<seg>/<seg>/<seg>/<seg>/<seg>/<jobname>-XXXXXX
//! ```
//!
//! where the five two-character `seg` directories shard what would
//! otherwise be a single enormous flat directory, and the `XXXXXX` tail
//! uses the OS's atomic unique-name facility (`mkdtemp`, via the `tempfile`
//! crate) rather than a check-then-create race.

use std::path::{Path, PathBuf};

use rand::Rng;

const MARKER_SUFFIX: &str = "-tempfiles";

/// A job's rendezvous directory, either created by [`JobTempdir::create`]
/// or adopted from a caller-supplied `existing_temp` via
/// [`JobTempdir::adopt`].
#[derive(Debug)]
pub struct JobTempdir {
    path: PathBuf,
    /// `false` when adopted from `existing_temp`: cleanup must not delete a
    /// directory the caller owns (`spec.md` §3, `existing_temp` invariant).
    owned: bool,
}

impl JobTempdir {
    /// Create a fresh, uniquely-named tempdir under `base` for `jobname`.
    pub fn create(base: &Path, lib_tag: &str, jobname: &str) -> std::io::Result<Self> {
        let marker = base.join(format!("{}-{lib_tag}{MARKER_SUFFIX}", username()));
        let mut shard = marker;
        for _ in 0..5 {
            shard = shard.join(random_segment());
        }
        std::fs::create_dir_all(&shard)?;

        let safe_jobname = sanitize_jobname(jobname);
        let tmp = tempfile::Builder::new()
            .prefix(&format!("{safe_jobname}-"))
            .rand_bytes(6)
            .tempdir_in(&shard)?;
        // Disown the guard: the handle's own cleanup() rules govern removal,
        // not this function's stack frame.
        #[allow(deprecated)]
        let path = tmp.into_path();
        Ok(JobTempdir { path, owned: true })
    }

    /// Adopt a caller-owned directory (`existing_temp`). It must already
    /// exist and be writable; the handle will never delete it.
    pub fn adopt(path: PathBuf) -> std::io::Result<Self> {
        if !path.is_dir() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("existing_temp is not a directory: {}", path.display()),
            ));
        }
        let probe = path.join(".procjob-writable-probe");
        std::fs::write(&probe, b"")?;
        let _ = std::fs::remove_file(&probe);
        Ok(JobTempdir { path, owned: false })
    }

    /// Restore a directory from a previously recorded path and ownership
    /// bit (`spec.md` §6, "Handle serialization contract"). Unlike
    /// [`JobTempdir::adopt`], which always yields an unowned directory,
    /// `resume` can reconstruct a handle that owns a directory it did not
    /// itself create in this process — and, since a resumed handle must
    /// still report a removed job's last known state, tolerates a path
    /// that no longer exists.
    pub fn resume(path: PathBuf, owned: bool) -> std::io::Result<Self> {
        Ok(JobTempdir { path, owned })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn owned(&self) -> bool {
        self.owned
    }

    /// Remove the tempdir and walk upward removing now-empty ancestor shard
    /// directories, stopping at the `…-tempfiles` marker directory (never
    /// removed, since other jobs share it) or at the first non-empty
    /// ancestor. A no-op (idempotent) when the directory is adopted
    /// (`existing_temp`) or already gone.
    pub fn cleanup(&self) -> std::io::Result<()> {
        if !self.owned {
            return Ok(());
        }
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        let mut dir = self.path.parent().map(Path::to_path_buf);
        while let Some(d) = dir {
            let is_marker = d
                .file_name()
                .and_then(|s| s.to_str())
                .is_some_and(|s| s.ends_with(MARKER_SUFFIX));
            if is_marker {
                break;
            }
            let Ok(mut entries) = std::fs::read_dir(&d) else {
                break;
            };
            if entries.next().is_some() {
                break; // not empty; other jobs still live under this shard
            }
            if std::fs::remove_dir(&d).is_err() {
                break;
            }
            dir = d.parent().map(Path::to_path_buf);
        }
        Ok(())
    }
}

/// Default tempdir base: the OS temp directory, unless overridden by
/// [`crate::config::Config::temp_base`].
pub fn default_base() -> PathBuf {
    std::env::temp_dir()
}

fn username() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

fn random_segment() -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    (0..2)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Strip path separators and other characters that would make `jobname`
/// unsafe as a single path component.
fn sanitize_jobname(jobname: &str) -> String {
    let cleaned: String = jobname
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "job".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_cleanup_round_trip() {
        let base = tempfile::tempdir().expect("base");
        let jt = JobTempdir::create(base.path(), "testtag", "mycmd").expect("create");
        assert!(jt.path().is_dir());
        assert!(jt.owned());
        jt.cleanup().expect("cleanup");
        assert!(!jt.path().exists());
    }

    #[test]
    fn cleanup_removes_empty_shard_ancestors_but_not_marker() {
        let base = tempfile::tempdir().expect("base");
        let jt = JobTempdir::create(base.path(), "testtag", "mycmd").expect("create");
        jt.cleanup().expect("cleanup");

        // Walk up from the job dir's original location: every shard segment
        // should be gone, but the `<user>-testtag-tempfiles` marker survives.
        let marker = base
            .path()
            .join(format!("{}-testtag-tempfiles", username()));
        assert!(marker.is_dir(), "marker directory should remain");
        let mut remaining = 0;
        for entry in std::fs::read_dir(&marker).expect("read marker") {
            let _ = entry;
            remaining += 1;
        }
        assert_eq!(remaining, 0, "shard segments should all be cleaned up");
    }

    #[test]
    fn adopted_existing_temp_is_not_owned_and_survives_cleanup() {
        let dir = tempfile::tempdir().expect("dir");
        let jt = JobTempdir::adopt(dir.path().to_path_buf()).expect("adopt");
        assert!(!jt.owned());
        jt.cleanup().expect("cleanup is a no-op");
        assert!(dir.path().is_dir(), "existing_temp must survive cleanup");
    }

    #[test]
    fn resume_restores_recorded_ownership() {
        let base = tempfile::tempdir().expect("base");
        let jt = JobTempdir::create(base.path(), "testtag", "mycmd").expect("create");
        let path = jt.path().to_path_buf();
        let owned = jt.owned();
        std::mem::forget(jt); // avoid double-cleanup in this test

        let resumed = JobTempdir::resume(path.clone(), owned).expect("resume");
        assert!(resumed.owned());
        resumed.cleanup().expect("cleanup");
        assert!(!path.exists());
    }

    #[test]
    fn resume_tolerates_a_removed_directory() {
        let missing = std::env::temp_dir().join("procjob-resume-missing-xyz");
        let resumed = JobTempdir::resume(missing, true).expect("resume");
        assert!(resumed.owned());
    }

    #[test]
    fn adopt_rejects_missing_directory() {
        let missing = std::env::temp_dir().join("procjob-definitely-missing-xyz");
        assert!(JobTempdir::adopt(missing).is_err());
    }

    #[test]
    fn jobname_is_sanitized() {
        assert_eq!(sanitize_jobname("../../etc"), ".._.._etc");
        assert_eq!(sanitize_jobname(""), "job");
    }
}
