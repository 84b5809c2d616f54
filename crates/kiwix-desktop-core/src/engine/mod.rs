//! Download engine client
//!
//! A synchronous facade over the aria2 download daemon. The daemon is reached
//! through [`DownloadBackend`]; [`Downloader`] and [`Download`] expose the
//! operations the download tracker needs.

mod aria2;
mod daemon;

pub use aria2::{Aria2Backend, Aria2Client};
pub use daemon::Aria2Daemon;

use crate::error::EngineError;
use crate::types::{DownloadInfo, DownloadOptions, DownloadStatus, Settings};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Metalink downloads are followed at most this many times
const MAX_FOLLOW_HOPS: usize = 4;
const READY_ATTEMPTS: usize = 50;
const READY_DELAY: Duration = Duration::from_millis(100);

/// Status fields of one transfer as returned by the daemon
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawStatus {
    pub status: DownloadStatus,
    pub completed_length: u64,
    pub total_length: u64,
    pub download_speed: u64,
    /// Path of the first file of the transfer, empty if not known yet
    pub path: String,
    /// Transfers spawned by this one, e.g. the payload of a metalink
    pub followed_by: Vec<String>,
}

/// Blocking access to a download daemon
pub trait DownloadBackend: Send + Sync {
    /// Queue a new transfer and return its id
    fn add_uri(&self, uris: &[String], options: &DownloadOptions) -> Result<String, EngineError>;

    fn tell_status(&self, gid: &str) -> Result<RawStatus, EngineError>;

    fn pause(&self, gid: &str) -> Result<(), EngineError>;

    fn unpause(&self, gid: &str) -> Result<(), EngineError>;

    fn remove(&self, gid: &str) -> Result<(), EngineError>;
}

/// How to reach the aria2 daemon
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Endpoint of an already running daemon; `None` spawns a private one
    pub rpc_url: Option<String>,
    pub secret: Option<String>,
    pub aria2_path: PathBuf,
    pub rpc_port: u16,
    /// aria2 session file, reloaded when a private daemon starts
    pub session_file: PathBuf,
}

fn local_rpc_url(port: u16) -> String {
    format!("http://127.0.0.1:{}/jsonrpc", port)
}

/// Convert settings to engine configuration; `None` when downloading is
/// disabled
pub fn settings_to_engine_config(settings: &Settings) -> Option<EngineConfig> {
    if !settings.download_enabled {
        return None;
    }

    let rpc_url = Some(settings.aria2_rpc_url.clone()).filter(|u| !u.is_empty());
    let secret = Some(settings.aria2_rpc_secret.clone())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            // Only reached when no secret was persisted
            rpc_url
                .is_none()
                .then(|| uuid::Uuid::new_v4().simple().to_string())
        });

    Some(EngineConfig {
        rpc_url,
        secret,
        aria2_path: PathBuf::from(&settings.aria2_path),
        rpc_port: settings.aria2_rpc_port,
        session_file: PathBuf::from(&settings.library_dir).join("kiwix.session"),
    })
}

/// Entry point of the download engine
#[derive(Clone)]
pub struct Downloader {
    backend: Arc<dyn DownloadBackend>,
    // Keeps a private daemon alive as long as any clone exists
    _daemon: Option<Arc<Aria2Daemon>>,
}

impl Downloader {
    pub fn new(backend: Arc<dyn DownloadBackend>) -> Self {
        Self {
            backend,
            _daemon: None,
        }
    }

    /// Connect to the configured daemon. Without an RPC URL, a daemon already
    /// answering on the local port with our secret is reused; otherwise a
    /// private one is spawned. Waits until the daemon answers.
    pub fn connect(config: &EngineConfig) -> Result<Self, EngineError> {
        let url = config
            .rpc_url
            .clone()
            .unwrap_or_else(|| local_rpc_url(config.rpc_port));
        let backend = Arc::new(Aria2Backend::new(Aria2Client::new(
            url.clone(),
            config.secret.clone(),
        )?)?);

        let daemon = match &config.rpc_url {
            Some(_) => None,
            None => match backend.version() {
                Ok(version) => {
                    log::info!("Reusing aria2 {} already running at {}", version, url);
                    None
                }
                Err(_) => Some(Arc::new(Aria2Daemon::spawn(config, backend.clone())?)),
            },
        };

        let mut last_error = None;
        for _ in 0..READY_ATTEMPTS {
            match backend.version() {
                Ok(version) => {
                    log::info!("Connected to aria2 {} at {}", version, url);
                    return Ok(Self {
                        backend: backend as Arc<dyn DownloadBackend>,
                        _daemon: daemon,
                    });
                }
                Err(e) => {
                    last_error = Some(e);
                    std::thread::sleep(READY_DELAY);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| EngineError::Unreachable(url)))
    }

    pub fn start_download(&self, url: &str, options: &DownloadOptions) -> Result<Download, EngineError> {
        let did = self.backend.add_uri(&[url.to_string()], options)?;
        log::debug!("aria2 accepted {} as {}", url, did);
        Ok(Download::new(self.backend.clone(), did))
    }

    /// Handle on an existing transfer, with its status already fetched
    pub fn get_download(&self, did: &str) -> Result<Download, EngineError> {
        let mut download = Download::new(self.backend.clone(), did.to_string());
        download.update_status(true)?;
        Ok(download)
    }
}

/// Handle on one transfer of the daemon
pub struct Download {
    backend: Arc<dyn DownloadBackend>,
    did: String,
    followed_did: Option<String>,
    status: RawStatus,
}

impl Download {
    fn new(backend: Arc<dyn DownloadBackend>, did: String) -> Self {
        Self {
            backend,
            did,
            followed_did: None,
            status: RawStatus::default(),
        }
    }

    /// Id under which the transfer was created
    pub fn did(&self) -> &str {
        &self.did
    }

    /// Id of the transfer actually carrying the payload
    pub fn active_did(&self) -> &str {
        self.followed_did.as_deref().unwrap_or(&self.did)
    }

    /// Refresh the cached status. With `follow`, a transfer that spawned
    /// follow-up transfers (metalink) reports the status of the payload.
    pub fn update_status(&mut self, follow: bool) -> Result<(), EngineError> {
        let mut gid = self.active_did().to_string();
        let mut status = self.backend.tell_status(&gid)?;
        if follow {
            let mut hops = 0;
            while let Some(next) = status.followed_by.first().cloned() {
                if hops == MAX_FOLLOW_HOPS {
                    break;
                }
                gid = next;
                status = self.backend.tell_status(&gid)?;
                hops += 1;
            }
            if gid != self.did {
                self.followed_did = Some(gid);
            }
        }
        self.status = status;
        Ok(())
    }

    pub fn status(&self) -> DownloadStatus {
        self.status.status
    }

    pub fn completed_length(&self) -> u64 {
        self.status.completed_length
    }

    pub fn total_length(&self) -> u64 {
        self.status.total_length
    }

    pub fn download_speed(&self) -> u64 {
        self.status.download_speed
    }

    pub fn path(&self) -> &str {
        &self.status.path
    }

    pub fn info(&self) -> DownloadInfo {
        DownloadInfo {
            status: self.status(),
            completed_length: self.completed_length(),
            total_length: self.total_length(),
            download_speed: self.download_speed(),
            path: self.path().to_string(),
        }
    }

    pub fn pause_download(&self) -> Result<(), EngineError> {
        self.backend.pause(self.active_did())
    }

    pub fn resume_download(&self) -> Result<(), EngineError> {
        self.backend.unpause(self.active_did())
    }

    pub fn cancel_download(&self) -> Result<(), EngineError> {
        self.backend.remove(self.active_did())
    }
}
