//! Local content catalog
//!
//! Books and bookmarks are kept in memory behind a lock and written to two
//! JSON files in the library directory.

use crate::error::{Error, Result};
use crate::monitor::MonitorDiff;
use crate::types::{Book, Bookmark, Filter, SortBy};
use crate::zim;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub const LIBRARY_FILE: &str = "library.json";
pub const BOOKMARKS_FILE: &str = "library.bookmarks.json";

/// Read access to the catalog, as needed by the download tracker
pub trait Catalog: Send + Sync {
    /// Identifiers of every book, in a stable order
    fn book_ids(&self) -> Vec<String>;

    fn book(&self, id: &str) -> Option<Book>;
}

/// Change notifications emitted by the library
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibraryEvent {
    BooksChanged,
    BookmarksChanged,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LibraryFile {
    books: Vec<Book>,
}

#[derive(Debug, Default)]
struct LibraryInner {
    books: BTreeMap<String, Book>,
    bookmarks: Vec<Bookmark>,
    monitor_dir_zims: BTreeSet<PathBuf>,
}

pub struct Library {
    dir: PathBuf,
    inner: RwLock<LibraryInner>,
    event_sender: async_channel::Sender<LibraryEvent>,
    event_receiver: async_channel::Receiver<LibraryEvent>,
}

impl Library {
    /// Load the library stored in `dir`; missing files give an empty library
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let mut inner = LibraryInner::default();
        let library_path = dir.join(LIBRARY_FILE);
        if library_path.exists() {
            let file: LibraryFile = serde_json::from_slice(&std::fs::read(&library_path)?)?;
            inner.books = file.books.into_iter().map(|b| (b.id.clone(), b)).collect();
        }
        let bookmarks_path = dir.join(BOOKMARKS_FILE);
        if bookmarks_path.exists() {
            inner.bookmarks = serde_json::from_slice(&std::fs::read(&bookmarks_path)?)?;
        }
        log::info!(
            "Loaded library from {:?}: {} books, {} bookmarks",
            dir,
            inner.books.len(),
            inner.bookmarks.len()
        );

        let (event_sender, event_receiver) = async_channel::bounded(16);
        Ok(Self {
            dir,
            inner: RwLock::new(inner),
            event_sender,
            event_receiver,
        })
    }

    /// Receiver of change notifications.
    ///
    /// Notifications are coalesced: when nobody drains the channel, further
    /// ones are dropped.
    pub fn events(&self) -> async_channel::Receiver<LibraryEvent> {
        self.event_receiver.clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, LibraryInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, LibraryInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn emit(&self, event: LibraryEvent) {
        let _ = self.event_sender.try_send(event);
    }

    pub fn book_ids(&self) -> Vec<String> {
        self.read().books.keys().cloned().collect()
    }

    pub fn book(&self, id: &str) -> Option<Book> {
        self.read().books.get(id).cloned()
    }

    pub fn book_by_path(&self, path: &Path) -> Option<Book> {
        let path = path.to_string_lossy();
        self.read().books.values().find(|b| b.path == path).cloned()
    }

    /// Ids of the books accepted by `filter`, sorted by `sort_by`
    pub fn list_book_ids(&self, filter: &Filter, sort_by: SortBy, ascending: bool) -> Vec<String> {
        let inner = self.read();
        let mut books: Vec<&Book> = inner.books.values().filter(|b| filter.accepts(b)).collect();
        match sort_by {
            SortBy::Title => books.sort_by(|a, b| {
                a.title.to_lowercase().cmp(&b.title.to_lowercase()).then_with(|| a.id.cmp(&b.id))
            }),
            SortBy::Size => books.sort_by(|a, b| a.size.cmp(&b.size).then_with(|| a.id.cmp(&b.id))),
            SortBy::Date => {
                books.sort_by(|a, b| a.added_at.cmp(&b.added_at).then_with(|| a.id.cmp(&b.id)))
            }
            SortBy::Id => books.sort_by(|a, b| a.id.cmp(&b.id)),
        }
        if !ascending {
            books.reverse();
        }
        books.into_iter().map(|b| b.id.clone()).collect()
    }

    /// Add or replace a book. Returns `true` if the id was not known yet.
    pub fn add_book(&self, book: Book) -> bool {
        let added = self.write().books.insert(book.id.clone(), book).is_none();
        self.emit(LibraryEvent::BooksChanged);
        added
    }

    pub fn remove_book(&self, id: &str) -> Option<Book> {
        let removed = self.write().books.remove(id);
        if removed.is_some() {
            self.emit(LibraryEvent::BooksChanged);
        }
        removed
    }

    fn modify_book<F>(&self, id: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut Book),
    {
        {
            let mut inner = self.write();
            let book = inner
                .books
                .get_mut(id)
                .ok_or_else(|| Error::NotFound(format!("book {}", id)))?;
            f(book);
        }
        self.emit(LibraryEvent::BooksChanged);
        Ok(())
    }

    /// Associate an engine transfer with a book
    pub fn set_download_id(&self, id: &str, download_id: &str) -> Result<()> {
        self.modify_book(id, |book| book.download_id = download_id.to_string())
    }

    pub fn clear_download_id(&self, id: &str) -> Result<()> {
        self.modify_book(id, |book| book.download_id.clear())
    }

    pub fn set_book_path(&self, id: &str, path: &str) -> Result<()> {
        self.modify_book(id, |book| book.path = path.to_string())
    }

    /// Register the archive at `zim_path` and return its book id.
    ///
    /// A path that is already in the library resolves to the existing book.
    pub fn open_book_from_path(&self, zim_path: &Path) -> Result<String> {
        let canonical = zim_path.canonicalize()?;
        if let Some(book) = self.book_by_path(&canonical) {
            return Ok(book.id);
        }

        let book = zim::book_from_path(&canonical)?;
        let id = book.id.clone();
        log::info!("Adding {:?} to the library as {}", canonical, id);
        self.add_book(book);
        self.save()?;
        Ok(id)
    }

    pub fn add_bookmark(&self, bookmark: Bookmark) {
        self.write().bookmarks.push(bookmark);
        self.emit(LibraryEvent::BookmarksChanged);
    }

    /// Remove the bookmarks of `book_id` pointing at `url`; returns whether
    /// any was removed
    pub fn remove_bookmark(&self, book_id: &str, url: &str) -> bool {
        let removed = {
            let mut inner = self.write();
            let before = inner.bookmarks.len();
            inner.bookmarks.retain(|b| !(b.book_id == book_id && b.url == url));
            inner.bookmarks.len() != before
        };
        if removed {
            self.emit(LibraryEvent::BookmarksChanged);
        }
        removed
    }

    pub fn bookmarks(&self) -> Vec<Bookmark> {
        self.read().bookmarks.clone()
    }

    pub fn bookmarks_for(&self, book_id: &str) -> Vec<Bookmark> {
        self.read()
            .bookmarks
            .iter()
            .filter(|b| b.book_id == book_id)
            .cloned()
            .collect()
    }

    /// Write books and bookmarks to the library directory
    pub fn save(&self) -> Result<()> {
        let (books, bookmarks) = {
            let inner = self.read();
            let file = LibraryFile {
                books: inner.books.values().cloned().collect(),
            };
            (serde_json::to_vec_pretty(&file)?, serde_json::to_vec_pretty(&inner.bookmarks)?)
        };
        write_atomically(&self.dir.join(LIBRARY_FILE), &books)?;
        write_atomically(&self.dir.join(BOOKMARKS_FILE), &bookmarks)?;
        log::debug!("Saved library to {:?}", self.dir);
        Ok(())
    }

    pub fn set_monitor_dir_zims(&self, zims: impl IntoIterator<Item = PathBuf>) {
        self.write().monitor_dir_zims = zims.into_iter().collect();
    }

    pub fn monitor_dir_zims(&self) -> Vec<PathBuf> {
        self.read().monitor_dir_zims.iter().cloned().collect()
    }

    /// Paths of the local books stored directly in `dir`
    pub fn library_zims_in_dir(&self, dir: &Path) -> Vec<PathBuf> {
        let dir = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
        self.read()
            .books
            .values()
            .filter(|b| b.is_local())
            .map(|b| PathBuf::from(&b.path))
            .filter(|p| p.parent() == Some(dir.as_path()))
            .collect()
    }

    /// Replace the known monitor-dir content with `found` and apply the
    /// difference to the catalog
    pub(crate) fn apply_monitor_dir(&self, found: BTreeSet<PathBuf>) -> MonitorDiff {
        let mut diff = MonitorDiff::default();
        let mut inner = self.write();

        let added: Vec<PathBuf> = found.difference(&inner.monitor_dir_zims).cloned().collect();
        let removed: Vec<PathBuf> = inner.monitor_dir_zims.difference(&found).cloned().collect();
        inner.monitor_dir_zims = found;

        for path in added {
            let known = inner.books.values().any(|b| Path::new(&b.path) == path);
            if known {
                continue;
            }
            match zim::book_from_path(&path) {
                Ok(book) => {
                    log::info!("New archive in monitored directory: {:?}", path);
                    diff.added.push(book.id.clone());
                    inner.books.insert(book.id.clone(), book);
                }
                Err(e) => log::warn!("Skipping {:?}: {}", path, e),
            }
        }

        for path in removed {
            let ids: Vec<String> = inner
                .books
                .values()
                .filter(|b| Path::new(&b.path) == path)
                .map(|b| b.id.clone())
                .collect();
            for id in ids {
                log::info!("Archive left monitored directory: {:?}", path);
                inner.books.remove(&id);
                diff.removed.push(id);
            }
        }

        diff
    }
}

impl Catalog for Library {
    fn book_ids(&self) -> Vec<String> {
        Library::book_ids(self)
    }

    fn book(&self, id: &str) -> Option<Book> {
        Library::book(self, id)
    }
}

impl Drop for Library {
    fn drop(&mut self) {
        if let Err(e) = self.save() {
            log::error!("Failed to save library to {:?}: {}", self.dir, e);
        }
    }
}

fn write_atomically(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
