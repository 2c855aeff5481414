//! The filesystem rendezvous protocol between the exec helper (running in a
//! child or a remote cluster node) and the controlling process, per
//! `spec.md` §3 and §6.
//!
//! Four files live in a job's tempdir:
//!
//! - `status` — `start:<unix>` / `end:<unix>` / `ret:<raw_status>` /
//!   `host:<hostname>` lines, appended as each becomes known.
//! - `died` — present iff the exec helper captured an exception; its
//!   *existence* is the canonical failure signal for async/cluster modes.
//! - `out` / `err` — default stdout/stderr sinks when the caller supplies
//!   none.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Parsed contents of the `status` file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusRecord {
    pub start: Option<u64>,
    pub end: Option<u64>,
    /// Raw `waitpid`-style status (exit code and signal packed together, as
    /// `libc::WIFEXITED`/`WIFSIGNALED` decode it).
    pub ret: Option<i32>,
    pub host: Option<String>,
}

impl StatusRecord {
    fn parse(text: &str) -> Self {
        let mut rec = StatusRecord::default();
        for line in text.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            match key {
                "start" => rec.start = value.parse().ok(),
                "end" => rec.end = value.parse().ok(),
                "ret" => rec.ret = value.parse().ok(),
                "host" => rec.host = Some(value.to_string()),
                _ => {}
            }
        }
        rec
    }

    /// Decode the raw wait status into `(exit_code, signal_number)`, the way
    /// POSIX `WIFEXITED`/`WEXITSTATUS`/`WIFSIGNALED`/`WTERMSIG` would.
    pub fn decode(&self) -> Option<(Option<i32>, Option<i32>)> {
        let raw = self.ret?;
        let exited = raw & 0x7f == 0;
        if exited {
            Some((Some((raw >> 8) & 0xff), None))
        } else {
            let sig = raw & 0x7f;
            Some((None, Some(sig)))
        }
    }
}

/// Handle to one job's rendezvous directory.
#[derive(Debug, Clone)]
pub struct Rendezvous {
    dir: PathBuf,
}

impl Rendezvous {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Rendezvous { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn status_path(&self) -> PathBuf {
        self.dir.join("status")
    }

    pub fn died_path(&self) -> PathBuf {
        self.dir.join("died")
    }

    pub fn out_path(&self) -> PathBuf {
        self.dir.join("out")
    }

    pub fn err_path(&self) -> PathBuf {
        self.dir.join("err")
    }

    fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
        let mut f = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(f, "{line}")
    }

    pub fn write_start(&self) -> std::io::Result<()> {
        Self::append_line(&self.status_path(), &format!("start:{}", now_unix()))
    }

    /// Append the `end`/`ret`/`host` lines once the child has been reaped.
    pub fn write_end(&self, raw_status: i32, host: &str) -> std::io::Result<()> {
        let path = self.status_path();
        Self::append_line(&path, &format!("end:{}", now_unix()))?;
        Self::append_line(&path, &format!("ret:{raw_status}"))?;
        Self::append_line(&path, &format!("host:{host}"))
    }

    pub fn read_status(&self) -> std::io::Result<Option<StatusRecord>> {
        match std::fs::read_to_string(self.status_path()) {
            Ok(text) => Ok(Some(StatusRecord::parse(&text))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn write_died(&self, message: &str) -> std::io::Result<()> {
        std::fs::write(self.died_path(), message)
    }

    pub fn read_died(&self) -> Option<String> {
        std::fs::read_to_string(self.died_path()).ok()
    }

    /// Check for the die-file's existence via a directory scan rather than
    /// `Path::exists`, so that a positive attribute cache on a shared (NFS)
    /// filesystem cannot hide a file a cluster job just created (`spec.md`
    /// §5, "NFS caching").
    pub fn died_exists_uncached(&self) -> bool {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return false;
        };
        entries
            .filter_map(|e| e.ok())
            .any(|e| e.file_name() == "died")
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
