//! Download lifecycle tracking
//!
//! [`DownloadManager`] keeps one [`DownloadRecord`] per catalog entry being
//! downloaded. A background thread polls the engine every second and reports
//! progress and disappearance through [`DownloadEvent`]s.
//!
//! Pause and cancel may race with completion in two ways, both treated as
//! no-ops: the frontend already cleared the book's download id after a
//! completion event, or the engine finished the transfer before handling the
//! request and answers with [`EngineError::AlreadyFinished`].

use crate::engine::Downloader;
use crate::error::{EngineError, Error, Result};
use crate::library::Catalog;
use crate::storage::{check_that_book_can_be_saved, FreeSpace, SystemStorage};
use crate::types::{
    Book, DownloadInfo, DownloadOptions, DownloadPhase, DownloadRecord, DownloadState, DownloadStatus,
};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Delay between two polls of the engine
pub const UPDATE_INTERVAL: Duration = Duration::from_millis(1000);

/// Events beyond this many undrained ones are dropped, except
/// `Disappeared`, which is held back and re-sent on the next tick
const EVENT_CAPACITY: usize = 1024;

/// Notifications sent from the updater to the frontend
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadEvent {
    /// Fresh engine data for a tracked download
    Updated { book_id: String, info: DownloadInfo },
    /// The download can no longer be followed; the frontend should clear the
    /// book's download id and remove the record
    Disappeared { book_id: String, reason: VanishReason },
}

impl DownloadEvent {
    pub fn book_id(&self) -> &str {
        match self {
            DownloadEvent::Updated { book_id, .. } | DownloadEvent::Disappeared { book_id, .. } => book_id,
        }
    }
}

/// Why a tracked download vanished
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VanishReason {
    /// The catalog entry is gone or no longer carries a download id
    NoDownloadId,
    /// The engine does not know the transfer anymore
    NotFound,
    /// The transfer was removed from the engine
    Removed,
    /// The engine could not be queried
    QueryFailed(String),
}

/// State shared with the updater thread
struct Shared {
    catalog: Arc<dyn Catalog>,
    downloader: Option<Downloader>,
    downloads: Mutex<HashMap<String, DownloadRecord>>,
    event_sender: async_channel::Sender<DownloadEvent>,
    held_events: Mutex<VecDeque<DownloadEvent>>,
}

impl Shared {
    fn downloads(&self) -> MutexGuard<'_, HashMap<String, DownloadRecord>> {
        self.downloads.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn held_events(&self) -> MutexGuard<'_, VecDeque<DownloadEvent>> {
        self.held_events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: DownloadEvent) {
        match self.event_sender.try_send(event) {
            Ok(()) => {}
            // The frontend must see every disappearance to clean up the book
            Err(async_channel::TrySendError::Full(event @ DownloadEvent::Disappeared { .. })) => {
                log::warn!("Event channel full, holding back {:?}", event);
                self.held_events().push_back(event);
            }
            Err(e) => log::warn!("Dropping download event: {}", e),
        }
    }

    /// Re-send the events `emit` could not deliver, oldest first
    fn flush_held_events(&self) {
        let mut held = self.held_events();
        while let Some(event) = held.pop_front() {
            match self.event_sender.try_send(event) {
                Ok(()) => {}
                Err(async_channel::TrySendError::Full(event)) => {
                    held.push_front(event);
                    break;
                }
                Err(async_channel::TrySendError::Closed(_)) => {
                    held.clear();
                    break;
                }
            }
        }
    }

    fn download_id(&self, book_id: &str) -> Result<String> {
        self.catalog
            .book(book_id)
            .map(|book| book.download_id)
            .ok_or_else(|| Error::NotFound(format!("book {}", book_id)))
    }

    fn query(&self, book_id: &str) -> std::result::Result<DownloadInfo, VanishReason> {
        let downloader = self
            .downloader
            .as_ref()
            .ok_or_else(|| VanishReason::QueryFailed(Error::DownloadUnavailable.to_string()))?;
        let did = self
            .download_id(book_id)
            .ok()
            .filter(|did| !did.is_empty())
            .ok_or(VanishReason::NoDownloadId)?;
        let download = downloader.get_download(&did).map_err(|e| match e {
            EngineError::NotFound(_) => VanishReason::NotFound,
            other => VanishReason::QueryFailed(other.to_string()),
        })?;
        Ok(download.info())
    }

    /// One poll of every tracked download
    fn update_downloads(&self) {
        self.flush_held_events();
        let book_ids: Vec<String> = self
            .downloads()
            .iter()
            .filter(|(_, record)| record.phase != DownloadPhase::Vanished)
            .map(|(id, _)| id.clone())
            .collect();

        for book_id in book_ids {
            match self.query(&book_id) {
                Ok(info) if info.status == DownloadStatus::Removed => {
                    self.vanish(book_id, VanishReason::Removed);
                }
                Ok(info) => {
                    {
                        let mut downloads = self.downloads();
                        let Some(record) = downloads.get_mut(&book_id) else {
                            continue;
                        };
                        record.state.update(&info);
                        record.phase = info.status.into();
                    }
                    self.emit(DownloadEvent::Updated { book_id, info });
                }
                Err(reason) => self.vanish(book_id, reason),
            }
        }
    }

    fn vanish(&self, book_id: String, reason: VanishReason) {
        {
            let mut downloads = self.downloads();
            let Some(record) = downloads.get_mut(&book_id) else {
                return;
            };
            record.phase = DownloadPhase::Vanished;
        }
        match &reason {
            VanishReason::QueryFailed(msg) => log::warn!("Lost track of download of {}: {}", book_id, msg),
            other => log::info!("Download of {} disappeared: {:?}", book_id, other),
        }
        self.emit(DownloadEvent::Disappeared { book_id, reason });
    }
}

struct Updater {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

pub struct DownloadManager {
    shared: Arc<Shared>,
    storage: Arc<dyn FreeSpace>,
    event_receiver: async_channel::Receiver<DownloadEvent>,
    updater: Mutex<Option<Updater>>,
}

impl DownloadManager {
    /// Create the tracker and restore the downloads recorded in the catalog.
    /// `downloader` is `None` when downloading is not configured.
    pub fn new(catalog: Arc<dyn Catalog>, downloader: Option<Downloader>) -> Self {
        Self::with_storage(catalog, downloader, Arc::new(SystemStorage))
    }

    pub fn with_storage(
        catalog: Arc<dyn Catalog>,
        downloader: Option<Downloader>,
        storage: Arc<dyn FreeSpace>,
    ) -> Self {
        let (event_sender, event_receiver) = async_channel::bounded(EVENT_CAPACITY);
        let manager = Self {
            shared: Arc::new(Shared {
                catalog,
                downloader,
                downloads: Mutex::new(HashMap::new()),
                event_sender,
                held_events: Mutex::new(VecDeque::new()),
            }),
            storage,
            event_receiver,
            updater: Mutex::new(None),
        };
        manager.restore_downloads();
        manager
    }

    /// Install a paused placeholder for every book that still has a download
    /// id; the first poll replaces it with live data
    fn restore_downloads(&self) {
        let mut downloads = self.shared.downloads();
        for book_id in self.shared.catalog.book_ids() {
            let Some(book) = self.shared.catalog.book(&book_id) else {
                continue;
            };
            if book.is_downloading() {
                downloads.insert(book_id, DownloadRecord::restored());
            }
        }
        if !downloads.is_empty() {
            log::info!("Restored {} downloads", downloads.len());
        }
    }

    pub fn downloading_functionality_available(&self) -> bool {
        self.shared.downloader.is_some()
    }

    fn downloader(&self) -> Result<&Downloader> {
        self.shared.downloader.as_ref().ok_or(Error::DownloadUnavailable)
    }

    /// Receiver of updater notifications
    pub fn events(&self) -> async_channel::Receiver<DownloadEvent> {
        self.event_receiver.clone()
    }

    /// Start the polling thread unless it is already running
    pub fn start_download_updater(&self) -> Result<()> {
        let mut updater = self.updater.lock().unwrap_or_else(PoisonError::into_inner);
        if updater.is_some() {
            return Ok(());
        }

        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let shared = self.shared.clone();
        let handle = std::thread::Builder::new()
            .name("download-updater".to_string())
            .spawn(move || {
                log::debug!("Download updater started");
                while flag.load(Ordering::Acquire) {
                    shared.update_downloads();
                    let deadline = Instant::now() + UPDATE_INTERVAL;
                    while flag.load(Ordering::Acquire) {
                        let now = Instant::now();
                        if now >= deadline {
                            break;
                        }
                        std::thread::park_timeout(deadline - now);
                    }
                }
                log::debug!("Download updater stopped");
            })?;

        *updater = Some(Updater { running, handle });
        Ok(())
    }

    /// Stop the polling thread and wait until it has exited
    pub fn stop_download_updater(&self) {
        let updater = self
            .updater
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(updater) = updater {
            updater.running.store(false, Ordering::Release);
            updater.handle.thread().unpark();
            if updater.handle.join().is_err() {
                log::error!("Download updater panicked");
            }
        }
    }

    /// Poll the engine once for every tracked download
    pub fn update_downloads(&self) {
        self.shared.update_downloads();
    }

    /// Current engine data for the download of `book_id`
    pub fn download_info(&self, book_id: &str) -> Result<DownloadInfo> {
        let downloader = self.downloader()?;
        let did = self.shared.download_id(book_id)?;
        if did.is_empty() {
            return Err(Error::NotFound(format!("download of {}", book_id)));
        }
        Ok(downloader.get_download(&did)?.info())
    }

    /// Start downloading `book` into `target_dir` and return the engine's
    /// download id, which the caller attaches to the book
    pub fn start_download(&self, book: &Book, target_dir: &Path) -> Result<String> {
        let downloader = self.downloader()?;
        check_that_book_can_be_saved(book, target_dir, self.storage.as_ref())?;

        let options = DownloadOptions::in_dir(target_dir.to_string_lossy());
        let download = downloader
            .start_download(&book.url, &options)
            .map_err(|e| unavailable(&book.id, e))?;

        self.shared
            .downloads()
            .insert(book.id.clone(), DownloadRecord::default());
        log::info!("Started download of {} as {}", book.id, download.did());
        Ok(download.did().to_string())
    }

    pub fn pause_download(&self, book_id: &str) -> Result<()> {
        let downloader = self.downloader()?;
        let did = self.shared.download_id(book_id)?;
        if did.is_empty() {
            log::debug!("Not pausing {}: download already finished", book_id);
            return Ok(());
        }

        let download = downloader
            .get_download(&did)
            .map_err(|e| unavailable(book_id, e))?;
        if download.status() == DownloadStatus::Active {
            match download.pause_download() {
                Ok(()) => log::info!("Paused download of {}", book_id),
                Err(e) if e.is_already_finished() => {
                    log::debug!("Download of {} finished before it could be paused", book_id)
                }
                Err(e) => return Err(unavailable(book_id, e)),
            }
        }
        Ok(())
    }

    pub fn resume_download(&self, book_id: &str) -> Result<()> {
        let downloader = self.downloader()?;
        let did = self.shared.download_id(book_id)?;
        if did.is_empty() {
            return Ok(());
        }

        let download = downloader
            .get_download(&did)
            .map_err(|e| unavailable(book_id, e))?;
        if download.status() == DownloadStatus::Paused {
            download
                .resume_download()
                .map_err(|e| unavailable(book_id, e))?;
            log::info!("Resumed download of {}", book_id);
        }
        Ok(())
    }

    /// Cancel the download of `book_id`. Returns `false` when there was
    /// nothing left to cancel.
    pub fn cancel_download(&self, book_id: &str) -> Result<bool> {
        let downloader = self.downloader()?;
        let did = self.shared.download_id(book_id)?;
        if did.is_empty() {
            log::debug!("Not cancelling {}: download already finished", book_id);
            return Ok(false);
        }

        let download = downloader
            .get_download(&did)
            .map_err(|e| unavailable(book_id, e))?;
        match download.cancel_download() {
            Ok(()) => {
                log::info!("Cancelled download of {}", book_id);
                Ok(true)
            }
            Err(e) if e.is_already_finished() => {
                log::debug!("Download of {} finished before it could be cancelled", book_id);
                Ok(false)
            }
            Err(e) => Err(unavailable(book_id, e)),
        }
    }

    /// Forget the record of `book_id`; the engine is left untouched
    pub fn remove_download(&self, book_id: &str) -> bool {
        self.shared.downloads().remove(book_id).is_some()
    }

    pub fn download_record(&self, book_id: &str) -> Option<DownloadRecord> {
        self.shared.downloads().get(book_id).cloned()
    }

    pub fn download_state(&self, book_id: &str) -> Option<DownloadState> {
        self.download_record(book_id).map(|record| record.state)
    }

    pub fn tracked_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.shared.downloads().keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl Drop for DownloadManager {
    fn drop(&mut self) {
        self.stop_download_updater();
    }
}

fn unavailable(book_id: &str, err: EngineError) -> Error {
    log::warn!("Download engine failed for {}: {}", book_id, err);
    Error::DownloadUnavailable
}
