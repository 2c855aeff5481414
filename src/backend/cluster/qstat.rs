//! Process-wide `qstat -f` cache (`spec.md` §4.5, "qstat caching", and §5,
//! "Shared resources").

use std::collections::HashMap;
use std::process::Command;
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

use crate::config::Config;

/// A parsed `qstat -f` snapshot: one record per `Job Id:` block, each a
/// lowercased `key -> value` map.
#[derive(Debug, Clone, Default)]
pub struct QstatView {
    pub records: HashMap<String, HashMap<String, String>>,
    pub raw: String,
}

struct CacheState {
    fetched_at: Option<Instant>,
    view: QstatView,
}

fn cache() -> &'static Mutex<CacheState> {
    static CACHE: OnceLock<Mutex<CacheState>> = OnceLock::new();
    CACHE.get_or_init(|| {
        Mutex::new(CacheState {
            fetched_at: None,
            view: QstatView::default(),
        })
    })
}

/// Force the next [`view`] call to re-run `qstat -f`, regardless of the
/// cache's age (called after a successful submission or cancellation).
pub fn invalidate() {
    cache().lock().expect("qstat cache lock poisoned").fetched_at = None;
}

/// Return the current view, refreshing it if the cache is older than
/// `config.qstat_cache_ttl()` or has been invalidated. A single `qstat`
/// failure triggers one retry after 3 seconds; if that also fails, an
/// empty view is cached and a warning logged (`spec.md` §4.5).
pub fn view(config: &Config) -> QstatView {
    let mut guard = cache().lock().expect("qstat cache lock poisoned");
    let stale = guard
        .fetched_at
        .map(|t| t.elapsed() >= config.qstat_cache_ttl())
        .unwrap_or(true);
    if stale {
        let fresh = run_qstat(config).or_else(|| {
            std::thread::sleep(Duration::from_secs(3));
            run_qstat(config)
        });
        match fresh {
            Some(view) => guard.view = view,
            None => {
                tracing::warn!("qstat failed twice in a row; reporting an empty queue view");
                guard.view = QstatView::default();
            }
        }
        guard.fetched_at = Some(Instant::now());
    }
    guard.view.clone()
}

pub fn job_state(config: &Config, job_id: &str) -> Option<String> {
    view(config)
        .records
        .get(job_id)
        .and_then(|r| r.get("job_state"))
        .cloned()
}

pub fn queued_count(config: &Config) -> u64 {
    view(config).records.len() as u64
}

/// Run a fresh, uncached `qstat -f <job_id>` for diagnostics (`spec.md`
/// §4.6, "append a `qstat -f <jobid>` dump").
pub fn dump_for(job_id: &str, config: &Config) -> Option<String> {
    let output = Command::new(&config.qstat).arg("-f").arg(job_id).output().ok()?;
    Some(format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    ))
}

fn run_qstat(config: &Config) -> Option<QstatView> {
    let output = Command::new(&config.qstat).arg("-f").output().ok()?;
    let combined = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    if combined.lines().any(|l| l.starts_with("qstat:")) {
        return None;
    }
    Some(parse(&combined))
}

fn parse(text: &str) -> QstatView {
    let mut records: HashMap<String, HashMap<String, String>> = HashMap::new();
    let mut current: Option<String> = None;
    for line in text.lines() {
        if let Some(id) = line.strip_prefix("Job Id: ") {
            let id = id.trim().to_string();
            records.entry(id.clone()).or_default();
            current = Some(id);
            continue;
        }
        let Some(id) = &current else { continue };
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim().to_lowercase();
        if key.contains('=') || key.contains(':') {
            continue;
        }
        records
            .get_mut(id)
            .expect("current job id always has a record entry")
            .insert(key, value.trim().to_lowercase());
    }
    QstatView { records, raw: text.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_job_id_blocks_and_lowercases() {
        let text = "Job Id: 123.server\n    Job_Name = MyJob\n    job_state = R\n\nJob Id: 456.server\n    job_state = Q\n";
        let view = parse(text);
        assert_eq!(view.records.len(), 2);
        assert_eq!(view.records["123.server"]["job_state"], "r");
        assert_eq!(view.records["456.server"]["job_state"], "q");
    }

    #[test]
    fn lines_without_an_equals_sign_are_ignored() {
        let text = "Job Id: 1.server\n    not a key value line\n    job_state = R\n";
        let view = parse(text);
        assert_eq!(view.records["1.server"].len(), 1);
        assert_eq!(view.records["1.server"]["job_state"], "r");
    }
}
