//! Error handling for the Kiwix desktop core

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("downloading is not available")]
    DownloadUnavailable,

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("download engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid zim file: {0}")]
    InvalidZim(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("filesystem watcher error: {0}")]
    Watcher(#[from] notify::Error),

    #[error("channel error: {0}")]
    Channel(String),
}

impl Error {
    /// Title and body translation keys for errors that are shown to the user.
    ///
    /// Returns `None` for internal errors, which frontends should only log.
    pub fn user_facing(&self) -> Option<(&'static str, &'static str)> {
        match self {
            Error::DownloadUnavailable => {
                Some(("download-unavailable", "download-unavailable-text"))
            }
            Error::Storage(storage) => Some(("download-storage-error", storage.text_key())),
            _ => None,
        }
    }
}

/// Why a target directory cannot receive a download
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("download directory does not exist")]
    DirMissing,

    #[error("download directory is not writable")]
    DirNotWritable,

    #[error("not enough free space: {required} bytes required, {available:?} available")]
    InsufficientSpace {
        required: u64,
        available: Option<u64>,
    },
}

impl StorageError {
    pub fn text_key(&self) -> &'static str {
        match self {
            StorageError::DirMissing => "download-dir-missing",
            StorageError::DirNotWritable => "download-dir-not-writable",
            StorageError::InsufficientSpace { .. } => "download-storage-error-text",
        }
    }
}

/// Errors reported by the download engine client.
///
/// Only [`EngineError::AlreadyFinished`] is benign: aria2 refuses to pause or
/// remove a transfer that completed in the meantime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("download already finished: {0}")]
    AlreadyFinished(String),

    #[error("unknown download: {0}")]
    NotFound(String),

    #[error("aria2 error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("download engine unreachable: {0}")]
    Unreachable(String),

    #[error("unexpected engine response: {0}")]
    Protocol(String),

    #[error("failed to start download engine: {0}")]
    Spawn(String),
}

impl EngineError {
    /// Classify a JSON-RPC error object returned by aria2
    pub fn from_rpc(code: i64, message: String) -> Self {
        if message.contains("is not found") {
            EngineError::NotFound(message)
        } else if message.contains("cannot be paused now")
            || message.contains("Active Download not found")
        {
            EngineError::AlreadyFinished(message)
        } else {
            EngineError::Rpc { code, message }
        }
    }

    pub fn is_already_finished(&self) -> bool {
        matches!(self, EngineError::AlreadyFinished(_))
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            EngineError::Protocol(err.to_string())
        } else {
            EngineError::Unreachable(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_rpc_errors() {
        assert!(matches!(
            EngineError::from_rpc(1, "GID 2089b05ecca3d829 is not found".into()),
            EngineError::NotFound(_)
        ));
        assert!(EngineError::from_rpc(1, "GID#2089b05ecca3d829 cannot be paused now".into())
            .is_already_finished());
        assert!(
            EngineError::from_rpc(1, "Active Download not found for GID#2089b05ecca3d829".into())
                .is_already_finished()
        );
        assert_eq!(
            EngineError::from_rpc(1, "Unauthorized".into()),
            EngineError::Rpc {
                code: 1,
                message: "Unauthorized".into()
            }
        );
    }

    #[test]
    fn test_user_facing_keys() {
        assert_eq!(
            Error::DownloadUnavailable.user_facing(),
            Some(("download-unavailable", "download-unavailable-text"))
        );
        assert_eq!(
            Error::Storage(StorageError::DirNotWritable).user_facing(),
            Some(("download-storage-error", "download-dir-not-writable"))
        );
        assert_eq!(
            Error::Storage(StorageError::InsufficientSpace {
                required: 10,
                available: Some(5)
            })
            .user_facing(),
            Some(("download-storage-error", "download-storage-error-text"))
        );
        assert!(Error::NotFound("book".into()).user_facing().is_none());
        assert!(Error::Engine(EngineError::Unreachable("x".into()))
            .user_facing()
            .is_none());
    }
}
