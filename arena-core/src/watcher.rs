//! Recursive change watcher for agent source trees.
//!
//! The notification backend only watches single directories, so the tree is
//! registered directory by directory from an explicit worklist bounded by a
//! maximum depth. A background task turns backend events into
//! [`WatchEvent`]s and feeds the [`RebuildGate`].
//!
//! Registration is all-or-nothing: if any directory fails to register, the
//! ones already registered are released before the error is returned.

use crate::config::Config;
use crate::error::{ArenaError, Result};
use crate::gate::RebuildGate;
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecursiveMode};
use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Raw backend output, as produced by the notify callback.
pub type RawEvent = notify::Result<Event>;

/// Watch registration settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchOptions {
    /// Deepest directory level registered; the root is level 0.
    pub max_depth: usize,
    /// Directory names skipped together with their subtrees.
    pub ignore_dirs: BTreeSet<String>,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl WatchOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_depth: config.watch_max_depth,
            ignore_dirs: config.watch_ignore_dirs.iter().cloned().collect(),
        }
    }

    fn is_ignored_name(&self, name: &std::ffi::OsStr) -> bool {
        name.to_str().is_some_and(|n| self.ignore_dirs.contains(n))
    }
}

/// Kind of change that can trigger a rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOp {
    Write,
    Create,
    Remove,
}

impl fmt::Display for WatchOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchOp::Write => write!(f, "write"),
            WatchOp::Create => write!(f, "create"),
            WatchOp::Remove => write!(f, "remove"),
        }
    }
}

/// A single change in the watched tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub path: PathBuf,
    pub op: WatchOp,
}

impl WatchEvent {
    /// Translate a backend event, one [`WatchEvent`] per affected path.
    ///
    /// Access and metadata-only events never trigger a rebuild.
    pub fn from_notify(event: &Event) -> Vec<WatchEvent> {
        let op = match &event.kind {
            EventKind::Create(_) => WatchOp::Create,
            EventKind::Modify(ModifyKind::Metadata(_)) => return Vec::new(),
            EventKind::Modify(_) => WatchOp::Write,
            EventKind::Remove(_) => WatchOp::Remove,
            EventKind::Access(_) | EventKind::Any | EventKind::Other => return Vec::new(),
        };

        event.paths.iter().map(|path| WatchEvent { path: path.clone(), op }).collect()
    }
}

/// A per-directory notification primitive.
pub trait WatchBackend: Send {
    /// Start watching `dir` itself (not its subdirectories).
    fn watch(&mut self, dir: &Path) -> Result<()>;

    /// Stop watching `dir`.
    fn unwatch(&mut self, dir: &Path) -> Result<()>;
}

impl WatchBackend for notify::RecommendedWatcher {
    fn watch(&mut self, dir: &Path) -> Result<()> {
        notify::Watcher::watch(self, dir, RecursiveMode::NonRecursive).map_err(|e| {
            ArenaError::WatchFailed { reason: format!("cannot watch {}: {}", dir.display(), e) }
        })
    }

    fn unwatch(&mut self, dir: &Path) -> Result<()> {
        notify::Watcher::unwatch(self, dir).map_err(|e| ArenaError::WatchFailed {
            reason: format!("cannot unwatch {}: {}", dir.display(), e),
        })
    }
}

/// Directories to register under `root`, root first, breadth-first.
///
/// Directories deeper than `max_depth` are left out silently, as are
/// ignored names and everything below them. Symlinked directories are not
/// followed.
pub fn registration_plan(root: &Path, options: &WatchOptions) -> Result<Vec<PathBuf>> {
    let mut plan = Vec::new();
    let mut worklist = VecDeque::from([(root.to_path_buf(), 0usize)]);

    while let Some((dir, depth)) = worklist.pop_front() {
        plan.push(dir.clone());

        if depth >= options.max_depth {
            continue;
        }

        let entries = std::fs::read_dir(&dir).map_err(|e| ArenaError::WatchFailed {
            reason: format!("cannot read {}: {}", dir.display(), e),
        })?;

        let mut children = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| ArenaError::WatchFailed {
                reason: format!("cannot read {}: {}", dir.display(), e),
            })?;
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir {
                continue;
            }
            if options.is_ignored_name(&entry.file_name()) {
                debug!("Not watching ignored directory {}", entry.path().display());
                continue;
            }
            children.push(entry.path());
        }

        children.sort();
        worklist.extend(children.into_iter().map(|child| (child, depth + 1)));
    }

    Ok(plan)
}

/// Register every directory in `dirs`, releasing all of them on the first failure.
fn register_all(backend: &mut dyn WatchBackend, dirs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut registered: Vec<PathBuf> = Vec::with_capacity(dirs.len());

    for dir in dirs {
        if let Err(err) = backend.watch(dir) {
            for done in registered.iter().rev() {
                if let Err(e) = backend.unwatch(done) {
                    warn!("Failed to release watch on {}: {}", done.display(), e);
                }
            }
            return Err(err);
        }
        registered.push(dir.clone());
    }

    Ok(registered)
}

/// Whether a change at `path` should be ignored for a tree rooted at `root`.
fn is_filtered(path: &Path, root: &Path, options: &WatchOptions) -> bool {
    let Ok(relative) = path.strip_prefix(root) else {
        return false;
    };

    let components: Vec<Component> = relative.components().collect();
    let ignored = components
        .iter()
        .any(|c| matches!(c, Component::Normal(name) if options.is_ignored_name(name)));
    if ignored {
        return true;
    }

    // The directory holding the changed entry must be within the watched depth
    components.len().saturating_sub(1) > options.max_depth
}

/// Forward backend events to the gate until the channel closes or the backend fails.
async fn forward_events(
    mut events: UnboundedReceiver<RawEvent>,
    gate: Arc<RebuildGate>,
    root: PathBuf,
    options: WatchOptions,
) {
    while let Some(raw) = events.recv().await {
        match raw {
            Ok(event) => {
                for change in WatchEvent::from_notify(&event) {
                    if is_filtered(&change.path, &root, &options) {
                        debug!(path = %change.path.display(), "Ignoring change");
                        continue;
                    }
                    debug!(path = %change.path.display(), op = %change.op, "Change detected");
                    gate.signal();
                }
            }
            Err(e) => {
                error!("File watcher error: {}", e);
                gate.fail(e.to_string());
                return;
            }
        }
    }
    debug!("Watch event channel closed");
}

/// Live watch registration. Dropping it releases every watch.
pub struct WatchHandle {
    backend: Option<Box<dyn WatchBackend>>,
    registered: Vec<PathBuf>,
    task: Option<JoinHandle<()>>,
}

impl WatchHandle {
    /// Directories currently registered, in registration order.
    pub fn registered(&self) -> &[PathBuf] {
        &self.registered
    }

    /// Release all watches and stop the forwarding task. Idempotent.
    pub fn close(&mut self) {
        if let Some(mut backend) = self.backend.take() {
            for dir in self.registered.iter().rev() {
                if let Err(e) = backend.unwatch(dir) {
                    // Directories removed since registration are already gone
                    debug!("{}", e);
                }
            }
            debug!("Released {} watches", self.registered.len());
        }
        self.registered.clear();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchHandle")
            .field("registered", &self.registered.len())
            .field("open", &self.backend.is_some())
            .finish()
    }
}

/// Registers source trees for change notification.
pub struct RecursiveWatcher;

impl RecursiveWatcher {
    /// Watch `root` with the platform's notification backend.
    ///
    /// Must be called from within a tokio runtime.
    #[instrument(skip_all, fields(root = %root.display()))]
    pub fn register(
        root: &Path,
        options: &WatchOptions,
        gate: Arc<RebuildGate>,
    ) -> Result<WatchHandle> {
        let (tx, rx) = mpsc::unbounded_channel();
        let backend = notify::recommended_watcher(move |event: RawEvent| {
            // The receiver is gone once the handle is closed
            let _ = tx.send(event);
        })
        .map_err(|e| ArenaError::WatchFailed { reason: format!("cannot start watcher: {}", e) })?;

        Self::register_with(backend, rx, root, options, gate)
    }

    /// Watch `root` with an explicit backend and its event channel.
    pub fn register_with<B>(
        mut backend: B,
        events: UnboundedReceiver<RawEvent>,
        root: &Path,
        options: &WatchOptions,
        gate: Arc<RebuildGate>,
    ) -> Result<WatchHandle>
    where
        B: WatchBackend + 'static,
    {
        let plan = registration_plan(root, options)?;
        let registered = register_all(&mut backend, &plan)?;
        info!("Watching {} directories under {}", registered.len(), root.display());

        let task = tokio::spawn(forward_events(events, gate, root.to_path_buf(), options.clone()));

        Ok(WatchHandle { backend: Some(Box::new(backend)), registered, task: Some(task) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, MetadataKind, RemoveKind};
    use std::fs;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct RecordingBackend {
        log: Arc<Mutex<Vec<(&'static str, PathBuf)>>>,
        fail_on: Option<PathBuf>,
    }

    impl RecordingBackend {
        fn calls(&self, op: &str) -> Vec<PathBuf> {
            let log = self.log.lock().unwrap();
            log.iter().filter(|(o, _)| *o == op).map(|(_, p)| p.clone()).collect()
        }
    }

    impl WatchBackend for RecordingBackend {
        fn watch(&mut self, dir: &Path) -> Result<()> {
            if self.fail_on.as_deref() == Some(dir) {
                return Err(ArenaError::watch(format!("no space left for {}", dir.display())));
            }
            self.log.lock().unwrap().push(("watch", dir.to_path_buf()));
            Ok(())
        }

        fn unwatch(&mut self, dir: &Path) -> Result<()> {
            self.log.lock().unwrap().push(("unwatch", dir.to_path_buf()));
            Ok(())
        }
    }

    fn nested(root: &Path, depth: usize) -> PathBuf {
        let mut path = root.to_path_buf();
        for _ in 0..depth {
            path.push("d");
        }
        path
    }

    #[test]
    fn test_plan_includes_root_and_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src/lib")).unwrap();
        fs::create_dir_all(dir.path().join("assets")).unwrap();
        fs::write(dir.path().join("Dockerfile"), "FROM scratch").unwrap();

        let plan = registration_plan(dir.path(), &WatchOptions::default()).unwrap();
        assert_eq!(
            plan,
            vec![
                dir.path().to_path_buf(),
                dir.path().join("assets"),
                dir.path().join("src"),
                dir.path().join("src/lib"),
            ]
        );
    }

    #[test]
    fn test_plan_stops_at_max_depth() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(nested(dir.path(), 150)).unwrap();

        let plan = registration_plan(dir.path(), &WatchOptions::default()).unwrap();
        assert_eq!(plan.len(), 101);
        assert_eq!(plan.last(), Some(&nested(dir.path(), 100)));
        assert!(!plan.contains(&nested(dir.path(), 101)));
    }

    #[test]
    fn test_plan_skips_ignored_directories_but_not_siblings() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".git/objects")).unwrap();
        fs::create_dir_all(dir.path().join("a")).unwrap();
        fs::create_dir_all(dir.path().join("z")).unwrap();

        let plan = registration_plan(dir.path(), &WatchOptions::default()).unwrap();
        let expected = vec![dir.path().to_path_buf(), dir.path().join("a"), dir.path().join("z")];
        assert_eq!(plan, expected);
    }

    #[test]
    fn test_register_all_returns_directories_in_plan_order() {
        let plan = vec![PathBuf::from("/src"), PathBuf::from("/src/a"), PathBuf::from("/src/b")];
        let mut backend = RecordingBackend::default();

        let registered = register_all(&mut backend, &plan).unwrap();
        assert_eq!(registered, plan);
        assert_eq!(backend.calls("watch"), plan);
        assert!(backend.calls("unwatch").is_empty());
    }

    #[tokio::test]
    async fn test_failed_registration_releases_everything() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a")).unwrap();
        fs::create_dir_all(dir.path().join("b")).unwrap();

        let backend =
            RecordingBackend { fail_on: Some(dir.path().join("b")), ..RecordingBackend::default() };
        let (_tx, rx) = mpsc::unbounded_channel();
        let gate = Arc::new(RebuildGate::new());

        let result = RecursiveWatcher::register_with(
            backend.clone(),
            rx,
            dir.path(),
            &WatchOptions::default(),
            gate,
        );

        assert!(matches!(result, Err(ArenaError::WatchFailed { .. })));
        let watched = backend.calls("watch");
        let mut released = backend.calls("unwatch");
        released.reverse();
        assert_eq!(watched, vec![dir.path().to_path_buf(), dir.path().join("a")]);
        assert_eq!(released, watched);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_releases_watches() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();

        let backend = RecordingBackend::default();
        let (_tx, rx) = mpsc::unbounded_channel();
        let mut handle = RecursiveWatcher::register_with(
            backend.clone(),
            rx,
            dir.path(),
            &WatchOptions::default(),
            Arc::new(RebuildGate::new()),
        )
        .unwrap();
        assert_eq!(handle.registered().len(), 2);

        handle.close();
        handle.close();
        drop(handle);

        assert_eq!(backend.calls("unwatch").len(), 2);
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_events_signal_gate_once_per_burst() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let gate = Arc::new(RebuildGate::new());
        let _handle = RecursiveWatcher::register_with(
            RecordingBackend::default(),
            rx,
            dir.path(),
            &WatchOptions::default(),
            gate.clone(),
        )
        .unwrap();

        for i in 0..10 {
            let event = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
                .add_path(dir.path().join(format!("file{}.py", i)));
            tx.send(Ok(event)).unwrap();
        }
        settle().await;

        assert!(gate.is_pending());
        assert_eq!(gate.coalesced(), 9);
        gate.wait().await.unwrap();
        assert!(!gate.is_pending());
    }

    #[tokio::test]
    async fn test_create_and_remove_trigger_but_access_does_not() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let gate = Arc::new(RebuildGate::new());
        let _handle = RecursiveWatcher::register_with(
            RecordingBackend::default(),
            rx,
            dir.path(),
            &WatchOptions::default(),
            gate.clone(),
        )
        .unwrap();

        let path = dir.path().join("main.py");
        tx.send(Ok(Event::new(EventKind::Access(AccessKind::Any)).add_path(path.clone()))).unwrap();
        tx.send(Ok(Event::new(EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)))
            .add_path(path.clone())))
            .unwrap();
        settle().await;
        assert!(!gate.is_pending());

        let create = Event::new(EventKind::Create(CreateKind::File)).add_path(path.clone());
        tx.send(Ok(create)).unwrap();
        settle().await;
        assert!(gate.is_pending());
        gate.wait().await.unwrap();

        tx.send(Ok(Event::new(EventKind::Remove(RemoveKind::File)).add_path(path))).unwrap();
        settle().await;
        assert!(gate.is_pending());
    }

    #[tokio::test]
    async fn test_changes_in_ignored_or_too_deep_directories_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let gate = Arc::new(RebuildGate::new());
        let options = WatchOptions { max_depth: 2, ..WatchOptions::default() };
        let backend = RecordingBackend::default();
        let _handle =
            RecursiveWatcher::register_with(backend, rx, dir.path(), &options, gate.clone())
                .unwrap();

        let write = |path: PathBuf| {
            Ok(Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Any))).add_path(path))
        };
        tx.send(write(dir.path().join(".git/index"))).unwrap();
        tx.send(write(dir.path().join(".git"))).unwrap();
        tx.send(write(dir.path().join("src/.git/HEAD"))).unwrap();
        tx.send(write(nested(dir.path(), 3).join("deep.txt"))).unwrap();
        settle().await;
        assert!(!gate.is_pending());

        tx.send(write(nested(dir.path(), 2).join("ok.txt"))).unwrap();
        settle().await;
        assert!(gate.is_pending());
    }

    #[tokio::test]
    async fn test_backend_error_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let gate = Arc::new(RebuildGate::new());
        let _handle = RecursiveWatcher::register_with(
            RecordingBackend::default(),
            rx,
            dir.path(),
            &WatchOptions::default(),
            gate.clone(),
        )
        .unwrap();

        tx.send(Err(notify::Error::generic("event queue overflow"))).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(2), gate.wait()).await.unwrap();
        match result {
            Err(ArenaError::WatchFailed { reason }) => assert!(reason.contains("overflow")),
            other => panic!("expected WatchFailed, got {:?}", other),
        }
    }
}
