//! Process-wide configuration.
//!
//! Mirrors the teacher's `jobstore::resolve_root` priority chain (CLI flag >
//! environment variable > XDG/base-dirs default), generalized to every knob
//! a [`crate::handle::JobHandle`] needs that is not per-call: the tempdir
//! base, the library tag embedded in tempdir names and error messages, the
//! cluster admission threshold, the `qsub`/`qstat`/`qdel` binary names, and
//! the path-prefix allowlist used by the cluster accessibility check
//! (`spec.md` §6; this resolves Open Question (a) from §9 — the allowlist
//! is configurable, not hard-coded).

use std::path::PathBuf;
use std::time::Duration;

use directories::BaseDirs;
use serde::{Deserialize, Serialize};

/// Library tag embedded in tempdir names (`<user>-<tag>-tempfiles`) and as
/// the per-line prefix in [`crate::error::format_error`] output.
pub const DEFAULT_LIB_TAG: &str = "procjob";

/// Default admission threshold for cluster submissions.
pub const DEFAULT_MAX_CLUSTER_JOBS: u64 = 2000;

/// Default qstat cache freshness window.
pub const DEFAULT_QSTAT_CACHE_TTL: Duration = Duration::from_secs(3);

fn default_prefixes() -> Vec<String> {
    vec![
        "/data/shared".to_string(),
        "/data/prod".to_string(),
        "/data/trunk".to_string(),
        "/home".to_string(),
        "/crypt".to_string(),
    ]
}

/// Process-wide defaults. Constructed once (by [`Config::load`] or
/// [`Config::default`]) and shared via `Arc` by callers that want a single
/// configuration across many handles; each [`crate::handle::JobHandle`] may
/// also be built with a one-off `Config` for tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Tag embedded in tempdir names and diagnostics.
    pub lib_tag: String,
    /// Base directory under which per-job tempdirs are created. `None`
    /// means "ask the OS for its temp directory at tempdir-creation time".
    pub temp_base: Option<PathBuf>,
    /// Admission threshold for cluster submissions.
    pub max_cluster_jobs: u64,
    /// `qsub` binary name or path.
    pub qsub: String,
    /// `qstat` binary name or path.
    pub qstat: String,
    /// `qdel` binary name or path.
    pub qdel: String,
    /// Path prefixes considered reachable from cluster compute nodes.
    /// A path is accepted if it starts with one of these, optionally after
    /// stripping a `/net/<host>` NFS automount prefix.
    pub cluster_path_prefixes: Vec<String>,
    /// How long a cached `qstat -f` view is considered fresh, in seconds.
    pub qstat_cache_ttl_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            lib_tag: DEFAULT_LIB_TAG.to_string(),
            temp_base: None,
            max_cluster_jobs: DEFAULT_MAX_CLUSTER_JOBS,
            qsub: "qsub".to_string(),
            qstat: "qstat".to_string(),
            qdel: "qdel".to_string(),
            cluster_path_prefixes: default_prefixes(),
            qstat_cache_ttl_secs: DEFAULT_QSTAT_CACHE_TTL.as_secs(),
        }
    }
}

impl Config {
    pub fn qstat_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.qstat_cache_ttl_secs)
    }

    /// Resolve the config file path: `$PROCJOB_CONFIG`, else
    /// `<config_dir>/procjob/config.toml` via `directories::BaseDirs`.
    pub fn config_path() -> Option<PathBuf> {
        if let Ok(p) = std::env::var("PROCJOB_CONFIG") {
            if !p.is_empty() {
                return Some(PathBuf::from(p));
            }
        }
        BaseDirs::new().map(|b| b.config_dir().join("procjob").join("config.toml"))
    }

    /// Load configuration: start from [`Config::default`], overlay the TOML
    /// config file if present and parseable, then overlay environment
    /// variable overrides. Never fails — a missing or invalid config file
    /// is logged and ignored, matching the teacher's "best effort, fall
    /// back to a sane default" posture in `jobstore::resolve_root`.
    pub fn load() -> Self {
        let mut cfg = Config::default();

        if let Some(path) = Self::config_path() {
            if let Ok(text) = std::fs::read_to_string(&path) {
                match toml::from_str::<Config>(&text) {
                    Ok(parsed) => cfg = parsed,
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "ignoring unparseable config file");
                    }
                }
            }
        }

        cfg.apply_env_overrides();
        cfg
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("PROCJOB_LIB_TAG") {
            if !v.is_empty() {
                self.lib_tag = v;
            }
        }
        if let Ok(v) = std::env::var("PROCJOB_TEMP_BASE") {
            if !v.is_empty() {
                self.temp_base = Some(PathBuf::from(v));
            }
        }
        if let Ok(v) = std::env::var("PROCJOB_MAX_CLUSTER_JOBS") {
            if let Ok(n) = v.parse() {
                self.max_cluster_jobs = n;
            }
        }
        if let Ok(v) = std::env::var("PROCJOB_QSUB") {
            if !v.is_empty() {
                self.qsub = v;
            }
        }
        if let Ok(v) = std::env::var("PROCJOB_QSTAT") {
            if !v.is_empty() {
                self.qstat = v;
            }
        }
        if let Ok(v) = std::env::var("PROCJOB_QDEL") {
            if !v.is_empty() {
                self.qdel = v;
            }
        }
    }

    /// Whether `path` is on an filesystem prefix reachable from cluster
    /// nodes, per `spec.md` §6. Strips an optional `/net/<host>` NFS
    /// automount prefix before matching.
    pub fn path_is_cluster_accessible(&self, path: &std::path::Path) -> bool {
        let s = path.to_string_lossy();
        let stripped = strip_net_prefix(&s);
        self.cluster_path_prefixes
            .iter()
            .any(|prefix| stripped.starts_with(prefix.as_str()))
    }
}

/// Strip a leading `/net/<host>` segment (NFS automounter convention), if
/// present, returning the remainder unchanged otherwise.
fn strip_net_prefix(s: &str) -> &str {
    if let Some(rest) = s.strip_prefix("/net/") {
        if let Some(slash) = rest.find('/') {
            return &rest[slash..];
        }
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_prefixes_include_home() {
        let cfg = Config::default();
        assert!(cfg.cluster_path_prefixes.iter().any(|p| p == "/home"));
    }

    #[test]
    fn accessible_path_under_home() {
        let cfg = Config::default();
        assert!(cfg.path_is_cluster_accessible(std::path::Path::new("/home/alice/work")));
    }

    #[test]
    fn inaccessible_path_under_tmp() {
        let cfg = Config::default();
        assert!(!cfg.path_is_cluster_accessible(std::path::Path::new("/tmp/scratch")));
    }

    #[test]
    fn net_prefix_is_stripped_before_matching() {
        let cfg = Config::default();
        assert!(cfg.path_is_cluster_accessible(std::path::Path::new("/net/gizmo/home/alice")));
    }

    #[test]
    fn strip_net_prefix_handles_bare_host() {
        assert_eq!(strip_net_prefix("/net/gizmo"), "/net/gizmo");
    }
}
