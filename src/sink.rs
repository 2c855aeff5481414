//! Redirection sinks — the polymorphic stdin/stdout/stderr sources and
//! destinations described in `spec.md` §4.1 and designed in §9 as "a
//! statically-typed port should represent each sink as a tagged variant".
//!
//! Each variant gets its own setup routine (in [`crate::exec`]) that turns
//! it into an open file descriptor to hand the child, and its own
//! finalization routine that runs after the child exits (reading captured
//! bytes back for in-memory sinks, invoking a consumer callback per line).

use std::fmt;
use std::fs::File;
use std::os::fd::RawFd;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Shared buffer used by [`Sink::InMemory`]. Cheap to clone; all clones see
/// the same bytes once the exec helper finalizes the sink.
pub type SharedBuffer = Arc<Mutex<Vec<u8>>>;

type ProducerFn = dyn FnMut() -> Option<Vec<u8>> + Send;
type ConsumerFn = dyn FnMut(&str) + Send;

/// One redirection source (stdin) or sink (stdout/stderr).
pub enum Sink {
    /// Inherit from the caller (stdin) or discard to the null device
    /// (stdout/stderr).
    Absent,
    /// Open (stdin) or create (stdout/stderr) a path on the filesystem.
    /// The only variant serializable into a [`crate::handle::SerializedHandle`].
    Path(PathBuf),
    /// An already-open stream the caller hands ownership of.
    Owned(File),
    /// An already-open stream the caller keeps ownership of; we only dup
    /// its descriptor.
    Borrowed(RawFd),
    /// Spooled through a temp file; for stdout/stderr, read back into the
    /// shared buffer after the child exits.
    InMemory(SharedBuffer),
    /// A fixed byte sequence, concatenated and spooled (stdin only).
    Bytes(Vec<u8>),
    /// Repeatedly invoked until it returns `None`; output is spooled
    /// (stdin only).
    Producer(Arc<Mutex<ProducerFn>>),
    /// Invoked once per line of captured output after the child exits
    /// (stdout/stderr only).
    Consumer(Arc<Mutex<ConsumerFn>>),
}

impl Sink {
    pub fn in_memory() -> (Sink, SharedBuffer) {
        let buf: SharedBuffer = Arc::new(Mutex::new(Vec::new()));
        (Sink::InMemory(buf.clone()), buf)
    }

    pub fn producer<F>(f: F) -> Sink
    where
        F: FnMut() -> Option<Vec<u8>> + Send + 'static,
    {
        Sink::Producer(Arc::new(Mutex::new(f)))
    }

    pub fn consumer<F>(f: F) -> Sink
    where
        F: FnMut(&str) + Send + 'static,
    {
        Sink::Consumer(Arc::new(Mutex::new(f)))
    }

    /// Whether this sink wraps a live, non-path file descriptor. Cluster
    /// mode rejects these (`spec.md` §4.5: "Live streams are rejected for
    /// cluster mode.").
    pub fn is_live_stream(&self) -> bool {
        matches!(self, Sink::Owned(_) | Sink::Borrowed(_))
    }

    /// The filesystem path backing this sink, if any. Used by the cluster
    /// accessibility check and by the serialization contract.
    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Sink::Path(p) => Some(p.as_path()),
            _ => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Sink::Absent)
    }
}

impl fmt::Debug for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sink::Absent => write!(f, "Sink::Absent"),
            Sink::Path(p) => write!(f, "Sink::Path({})", p.display()),
            Sink::Owned(_) => write!(f, "Sink::Owned(<fd>)"),
            Sink::Borrowed(fd) => write!(f, "Sink::Borrowed({fd})"),
            Sink::InMemory(_) => write!(f, "Sink::InMemory(<buffer>)"),
            Sink::Bytes(b) => write!(f, "Sink::Bytes({} bytes)", b.len()),
            Sink::Producer(_) => write!(f, "Sink::Producer(<callback>)"),
            Sink::Consumer(_) => write!(f, "Sink::Consumer(<callback>)"),
        }
    }
}

impl Default for Sink {
    fn default() -> Self {
        Sink::Absent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_sink_shares_buffer() {
        let (sink, buf) = Sink::in_memory();
        if let Sink::InMemory(inner) = &sink {
            inner.lock().expect("lock").extend_from_slice(b"hi");
        }
        assert_eq!(&*buf.lock().expect("lock"), b"hi");
    }

    #[test]
    fn live_streams_are_detected() {
        assert!(Sink::Borrowed(0).is_live_stream());
        assert!(!Sink::Absent.is_live_stream());
        assert!(!Sink::Path(PathBuf::from("/tmp/x")).is_live_stream());
    }

    #[test]
    fn path_accessor() {
        let s = Sink::Path(PathBuf::from("/tmp/x"));
        assert_eq!(s.as_path(), Some(Path::new("/tmp/x")));
        assert_eq!(Sink::Absent.as_path(), None);
    }
}
