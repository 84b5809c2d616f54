//! Monitored directory: keeps the catalog in sync with the ZIM files of a
//! folder

use crate::error::Result;
use crate::library::{Library, LibraryEvent};
use crate::zim::is_zim_path;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const DEBOUNCE: Duration = Duration::from_millis(500);

/// Books added to and removed from the catalog by one scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl MonitorDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// ZIM files directly inside `dir`
pub fn list_zims(dir: &Path) -> Result<BTreeSet<PathBuf>> {
    let dir = dir.canonicalize()?;
    let mut zims = BTreeSet::new();
    for entry in std::fs::read_dir(&dir)? {
        let path = entry?.path();
        if is_zim_path(&path) && path.is_file() {
            zims.insert(path);
        }
    }
    Ok(zims)
}

/// Scan `dir` and apply additions and removals to the library
pub fn load_monitor_dir(library: &Library, dir: &Path) -> Result<MonitorDiff> {
    let found = list_zims(dir)?;
    let diff = library.apply_monitor_dir(found);
    if !diff.is_empty() {
        log::info!(
            "Monitored directory {:?}: {} added, {} removed",
            dir,
            diff.added.len(),
            diff.removed.len()
        );
    }
    library.emit(LibraryEvent::BooksChanged);
    library.save()?;
    Ok(diff)
}

/// Run [`load_monitor_dir`] on a background thread
pub fn async_load_monitor_dir(library: Arc<Library>, dir: PathBuf) -> JoinHandle<Result<MonitorDiff>> {
    std::thread::spawn(move || load_monitor_dir(&library, &dir))
}

/// Seed the known monitor-dir content from the books already in the catalog
pub fn init_monitor_dir(library: &Library, dir: &Path) {
    library.set_monitor_dir_zims(library.library_zims_in_dir(dir));
}

/// Watches a directory and rescans it whenever ZIM files appear or vanish.
///
/// Watching stops when the value is dropped.
pub struct DirWatcher {
    watcher: Option<RecommendedWatcher>,
    worker: Option<JoinHandle<()>>,
}

impl DirWatcher {
    pub fn start(library: Arc<Library>, dir: PathBuf) -> Result<Self> {
        init_monitor_dir(&library, &dir);
        load_monitor_dir(&library, &dir)?;

        let (tx, rx) = std::sync::mpsc::channel::<()>();
        let mut watcher = notify::recommended_watcher(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    if is_relevant(&event) {
                        let _ = tx.send(());
                    }
                }
                Err(e) => log::error!("Monitored directory watcher error: {}", e),
            },
        )?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        log::info!("Watching {:?} for ZIM files", dir);

        let worker = std::thread::spawn(move || {
            // Ends once the watcher, and with it the sender, is dropped
            while rx.recv().is_ok() {
                // Coalesce bursts, e.g. a file being copied in chunks
                while rx.recv_timeout(DEBOUNCE).is_ok() {}
                if let Err(e) = load_monitor_dir(&library, &dir) {
                    log::warn!("Failed to rescan {:?}: {}", dir, e);
                }
            }
            log::debug!("Monitored directory worker for {:?} stopped", dir);
        });

        Ok(Self {
            watcher: Some(watcher),
            worker: Some(worker),
        })
    }
}

impl Drop for DirWatcher {
    fn drop(&mut self) {
        drop(self.watcher.take());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn is_relevant(event: &notify::Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Remove(_) | EventKind::Modify(notify::event::ModifyKind::Name(_))
    ) && event.paths.iter().any(|p| is_zim_path(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zim::tests::write_zim;
    use uuid::Uuid;

    #[test]
    fn test_list_zims_ignores_other_files() {
        let dir = tempfile::tempdir().unwrap();
        write_zim(dir.path(), "a.zim", Uuid::new_v4());
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        std::fs::write(dir.path().join("b.zim.part"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("sub.zim")).unwrap();

        let zims = list_zims(dir.path()).unwrap();
        assert_eq!(zims.len(), 1);
        assert!(zims.iter().next().unwrap().ends_with("a.zim"));
    }

    #[test]
    fn test_load_monitor_dir_diffs() {
        let lib_dir = tempfile::tempdir().unwrap();
        let watched = tempfile::tempdir().unwrap();
        let library = Library::open(lib_dir.path()).unwrap();

        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let first_path = write_zim(watched.path(), "first.zim", first);
        write_zim(watched.path(), "second.zim", second);

        let diff = load_monitor_dir(&library, watched.path()).unwrap();
        assert_eq!(diff.added.len(), 2);
        assert!(diff.removed.is_empty());
        assert_eq!(library.book_ids().len(), 2);

        // Nothing changed
        assert!(load_monitor_dir(&library, watched.path()).unwrap().is_empty());

        std::fs::remove_file(&first_path).unwrap();
        let third = Uuid::new_v4();
        write_zim(watched.path(), "third.zim", third);

        let diff = load_monitor_dir(&library, watched.path()).unwrap();
        assert_eq!(diff.added, vec![third.to_string()]);
        assert_eq!(diff.removed, vec![first.to_string()]);
        assert!(library.book(&first.to_string()).is_none());
        assert!(library.book(&second.to_string()).is_some());
        assert_eq!(library.monitor_dir_zims().len(), 2);
    }

    #[test]
    fn test_invalid_files_are_skipped() {
        let lib_dir = tempfile::tempdir().unwrap();
        let watched = tempfile::tempdir().unwrap();
        let library = Library::open(lib_dir.path()).unwrap();
        std::fs::write(watched.path().join("broken.zim"), [0u8; 100]).unwrap();

        let diff = load_monitor_dir(&library, watched.path()).unwrap();
        assert!(diff.is_empty());
        assert!(library.book_ids().is_empty());
    }

    #[test]
    fn test_init_seeds_from_library() {
        let lib_dir = tempfile::tempdir().unwrap();
        let watched = tempfile::tempdir().unwrap();
        let library = Library::open(lib_dir.path()).unwrap();
        let uuid = Uuid::new_v4();
        let path = write_zim(watched.path(), "known.zim", uuid);
        library.open_book_from_path(&path).unwrap();

        init_monitor_dir(&library, watched.path());
        let diff = load_monitor_dir(&library, watched.path()).unwrap();
        assert!(diff.is_empty());
    }

    #[test]
    fn test_async_load() {
        let lib_dir = tempfile::tempdir().unwrap();
        let watched = tempfile::tempdir().unwrap();
        let library = Arc::new(Library::open(lib_dir.path()).unwrap());
        write_zim(watched.path(), "a.zim", Uuid::new_v4());

        let diff = async_load_monitor_dir(library.clone(), watched.path().to_path_buf())
            .join()
            .unwrap()
            .unwrap();
        assert_eq!(diff.added.len(), 1);
    }

    #[test]
    fn test_dir_watcher_initial_scan() {
        let lib_dir = tempfile::tempdir().unwrap();
        let watched = tempfile::tempdir().unwrap();
        let library = Arc::new(Library::open(lib_dir.path()).unwrap());
        write_zim(watched.path(), "a.zim", Uuid::new_v4());

        let watcher = DirWatcher::start(library.clone(), watched.path().to_path_buf()).unwrap();
        assert_eq!(library.book_ids().len(), 1);
        drop(watcher);
    }

    /// Poll `cond` until it holds or the watcher had ample time to rescan
    fn wait_for(cond: impl Fn() -> bool) -> bool {
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while std::time::Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        cond()
    }

    #[test]
    fn test_dir_watcher_follows_changes() {
        let lib_dir = tempfile::tempdir().unwrap();
        let watched = tempfile::tempdir().unwrap();
        let library = Arc::new(Library::open(lib_dir.path()).unwrap());
        let watcher = DirWatcher::start(library.clone(), watched.path().to_path_buf()).unwrap();
        assert!(library.book_ids().is_empty());

        let uuid = Uuid::new_v4();
        let path = write_zim(watched.path(), "a.zim", uuid);
        assert!(wait_for(|| library.book(&uuid.to_string()).is_some()));

        std::fs::remove_file(&path).unwrap();
        assert!(wait_for(|| library.book(&uuid.to_string()).is_none()));
        drop(watcher);
    }
}
