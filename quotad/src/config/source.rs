//! Pluggable configuration persistence
//!
//! A [`ConfigSource`] stores config revisions and tells subscribers when a
//! new revision is readable. Notifications carry no payload: the watcher
//! always re-reads the latest revision, so bursts of writes coalesce.

use std::fs;
use std::path::PathBuf;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{ConfigError, ServiceConfig};

/// Capacity of a single subscriber's notification channel. A full channel
/// means the subscriber already has a wake-up pending, so dropping the
/// notification loses nothing.
const NOTIFY_BUFFER: usize = 4;

/// Where service configuration lives and how changes are announced.
pub trait ConfigSource: Send + Sync {
    /// Read the latest revision. `None` when nothing has been persisted yet.
    fn read(&self) -> Result<Option<ServiceConfig>, ConfigError>;

    /// Persist a new revision and notify subscribers.
    fn persist(&self, cfg: &ServiceConfig) -> Result<(), ConfigError>;

    /// Subscribe to change notifications. Each message means "a new
    /// revision is readable".
    fn subscribe(&self) -> mpsc::Receiver<()>;

    /// Prior revisions, oldest first. Used by the admin surface.
    fn historical(&self) -> Result<Vec<ServiceConfig>, ConfigError>;
}

#[derive(Default)]
struct Subscribers(Mutex<Vec<mpsc::Sender<()>>>);

impl Subscribers {
    fn add(&self) -> mpsc::Receiver<()> {
        let (tx, rx) = mpsc::channel(NOTIFY_BUFFER);
        self.0.lock().push(tx);
        rx
    }

    fn notify(&self) {
        // try_send: never block a persist on a slow subscriber. Closed
        // receivers are dropped from the list.
        self.0.lock().retain(|tx| match tx.try_send(()) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(())) => true,
            Err(mpsc::error::TrySendError::Closed(())) => false,
        });
    }
}

/// In-memory revision list. The default source for tests and for servers
/// run without a backing file.
#[derive(Default)]
pub struct MemorySource {
    revisions: Mutex<Vec<ServiceConfig>>,
    subscribers: Subscribers,
}

impl MemorySource {
    pub fn new() -> Self {
        MemorySource::default()
    }

    /// Seed the source with an initial revision.
    pub fn with_initial(cfg: ServiceConfig) -> Self {
        let source = MemorySource::new();
        source.revisions.lock().push(cfg);
        source
    }
}

impl ConfigSource for MemorySource {
    fn read(&self) -> Result<Option<ServiceConfig>, ConfigError> {
        Ok(self.revisions.lock().last().cloned())
    }

    fn persist(&self, cfg: &ServiceConfig) -> Result<(), ConfigError> {
        self.revisions.lock().push(cfg.clone());
        self.subscribers.notify();
        Ok(())
    }

    fn subscribe(&self) -> mpsc::Receiver<()> {
        self.subscribers.add()
    }

    fn historical(&self) -> Result<Vec<ServiceConfig>, ConfigError> {
        Ok(self.revisions.lock().clone())
    }
}

/// JSON document on disk. Writes go through a temp file and an atomic
/// rename so readers never observe a torn document. Change notifications
/// fire on this process's own persists; external edits are picked up on
/// the next read.
pub struct FileSource {
    path: PathBuf,
    history: Mutex<Vec<ServiceConfig>>,
    subscribers: Subscribers,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileSource {
            path: path.into(),
            history: Mutex::new(Vec::new()),
            subscribers: Subscribers::default(),
        }
    }
}

impl ConfigSource for FileSource {
    fn read(&self) -> Result<Option<ServiceConfig>, ConfigError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let cfg = serde_json::from_str(&raw).map_err(|e| ConfigError::Malformed(e.to_string()))?;
        Ok(Some(cfg))
    }

    fn persist(&self, cfg: &ServiceConfig) -> Result<(), ConfigError> {
        let doc = serde_json::to_string_pretty(cfg)
            .map_err(|e| ConfigError::Malformed(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, doc)?;
        fs::rename(&tmp, &self.path)?;

        self.history.lock().push(cfg.clone());
        self.subscribers.notify();
        Ok(())
    }

    fn subscribe(&self) -> mpsc::Receiver<()> {
        self.subscribers.add()
    }

    fn historical(&self) -> Result<Vec<ServiceConfig>, ConfigError> {
        Ok(self.history.lock().clone())
    }
}
