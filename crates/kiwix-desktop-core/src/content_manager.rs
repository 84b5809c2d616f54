//! Catalog side of downloads
//!
//! [`ContentManager`] ties the [`Library`] to the [`DownloadManager`]: it
//! attaches download ids to books when transfers start and applies updater
//! events to the catalog.

use crate::download_manager::{DownloadEvent, DownloadManager, VanishReason};
use crate::engine::Downloader;
use crate::error::{Error, Result};
use crate::library::Library;
use crate::types::{DownloadInfo, DownloadState, DownloadStatus};
use std::path::Path;
use std::sync::Arc;

/// Catalog change caused by a download event
#[derive(Debug, Clone, PartialEq)]
pub enum BookChange {
    /// The archive is on disk and the book now points at it
    Completed { book_id: String, path: String },
    /// The engine gave up on the transfer; the book lost its download id
    Failed { book_id: String, info: DownloadInfo },
    /// The transfer is gone; the book lost its download id
    Vanished { book_id: String, reason: VanishReason },
    Progress { book_id: String, state: DownloadState },
}

pub struct ContentManager {
    library: Arc<Library>,
    downloads: DownloadManager,
}

impl ContentManager {
    /// Build the manager and start polling when downloading is available
    pub fn new(library: Arc<Library>, downloader: Option<Downloader>) -> Result<Self> {
        let downloads = DownloadManager::new(library.clone(), downloader);
        if downloads.downloading_functionality_available() {
            downloads.start_download_updater()?;
        }
        Ok(Self::from_parts(library, downloads))
    }

    pub fn from_parts(library: Arc<Library>, downloads: DownloadManager) -> Self {
        Self { library, downloads }
    }

    pub fn library(&self) -> &Arc<Library> {
        &self.library
    }

    pub fn downloads(&self) -> &DownloadManager {
        &self.downloads
    }

    /// Start downloading book `id` into `dir`
    pub fn download_book(&self, id: &str, dir: &Path) -> Result<String> {
        let book = self
            .library
            .book(id)
            .ok_or_else(|| Error::NotFound(format!("book {}", id)))?;
        if book.is_local() {
            log::info!("{} is already on disk at {}", id, book.path);
            return Ok(String::new());
        }

        let did = self.downloads.start_download(&book, dir)?;
        self.library.set_download_id(id, &did)?;
        self.library.save()?;
        Ok(did)
    }

    pub fn pause_book(&self, id: &str) -> Result<()> {
        self.downloads.pause_download(id)
    }

    pub fn resume_book(&self, id: &str) -> Result<()> {
        self.downloads.resume_download(id)
    }

    /// Cancel the download of `id`; the book stays in the catalog as a
    /// remote entry
    pub fn cancel_book(&self, id: &str) -> Result<bool> {
        let cancelled = self.downloads.cancel_download(id)?;
        if cancelled {
            self.forget_download(id)?;
        }
        Ok(cancelled)
    }

    fn forget_download(&self, id: &str) -> Result<()> {
        self.downloads.remove_download(id);
        if self.library.book(id).is_some() {
            self.library.clear_download_id(id)?;
            self.library.save()?;
        }
        Ok(())
    }

    /// Apply an updater event to the catalog
    pub fn handle_event(&self, event: &DownloadEvent) -> Result<BookChange> {
        match event {
            DownloadEvent::Updated { book_id, info } if info.status == DownloadStatus::Complete => {
                self.library.set_book_path(book_id, &info.path)?;
                self.forget_download(book_id)?;
                log::info!("Download of {} completed: {}", book_id, info.path);
                Ok(BookChange::Completed {
                    book_id: book_id.clone(),
                    path: info.path.clone(),
                })
            }
            DownloadEvent::Updated { book_id, info } if info.status == DownloadStatus::Error => {
                self.forget_download(book_id)?;
                log::warn!("Download of {} failed", book_id);
                Ok(BookChange::Failed {
                    book_id: book_id.clone(),
                    info: info.clone(),
                })
            }
            DownloadEvent::Updated { book_id, info } => Ok(BookChange::Progress {
                book_id: book_id.clone(),
                state: DownloadState::from_info(info),
            }),
            DownloadEvent::Disappeared { book_id, reason } => {
                self.forget_download(book_id)?;
                Ok(BookChange::Vanished {
                    book_id: book_id.clone(),
                    reason: reason.clone(),
                })
            }
        }
    }
}
