//! Settings database operations

use crate::db::Database;
use crate::error::Result;
use crate::types::Settings;
use rusqlite::params;

/// Settings database operations
pub struct SettingsDb;

impl SettingsDb {
    /// Keys understood by [`SettingsDb::load`]
    pub const KEYS: [&'static str; 8] = [
        "library_dir",
        "download_dir",
        "monitor_dir",
        "download_enabled",
        "aria2_path",
        "aria2_rpc_port",
        "aria2_rpc_url",
        "aria2_rpc_secret",
    ];

    /// Load all settings from database
    pub fn load(db: &Database) -> Result<Settings> {
        let mut settings = Settings::default();

        db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT key, value FROM settings")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;

            for row in rows {
                let (key, value) = row?;
                match key.as_str() {
                    "library_dir" => settings.library_dir = expand_home(value),
                    "download_dir" => settings.download_dir = expand_home(value),
                    "monitor_dir" => settings.monitor_dir = expand_home(value),
                    "download_enabled" => {
                        settings.download_enabled = value == "true";
                    }
                    "aria2_path" => settings.aria2_path = expand_home(value),
                    "aria2_rpc_port" => {
                        settings.aria2_rpc_port = value.parse().unwrap_or(6800);
                    }
                    "aria2_rpc_url" => settings.aria2_rpc_url = value,
                    "aria2_rpc_secret" => settings.aria2_rpc_secret = value,
                    _ => {
                        log::debug!("Ignoring unknown setting {}", key);
                    }
                }
            }

            Ok(())
        })?;

        Ok(settings)
    }

    /// Save a single setting
    pub fn set(db: &Database, key: &str, value: &str) -> Result<()> {
        db.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO settings (key, value, updated_at) VALUES (?1, ?2, CURRENT_TIMESTAMP)",
                params![key, value],
            )?;
            Ok(())
        })
    }

    /// Save all settings
    pub fn save(db: &Database, settings: &Settings) -> Result<()> {
        Self::set(db, "library_dir", &settings.library_dir)?;
        Self::set(db, "download_dir", &settings.download_dir)?;
        Self::set(db, "monitor_dir", &settings.monitor_dir)?;
        Self::set(db, "download_enabled", if settings.download_enabled { "true" } else { "false" })?;
        Self::set(db, "aria2_path", &settings.aria2_path)?;
        Self::set(db, "aria2_rpc_port", &settings.aria2_rpc_port.to_string())?;
        Self::set(db, "aria2_rpc_url", &settings.aria2_rpc_url)?;
        Self::set(db, "aria2_rpc_secret", &settings.aria2_rpc_secret)?;
        Ok(())
    }

    /// Give the local aria2 daemon a stable RPC secret, so every process of
    /// the user reaches the same daemon. Nothing is stored when a remote
    /// daemon is configured or a secret is already set.
    pub fn ensure_rpc_secret(db: &Database, settings: &mut Settings) -> Result<()> {
        if !settings.aria2_rpc_url.is_empty() || !settings.aria2_rpc_secret.is_empty() {
            return Ok(());
        }
        let secret = uuid::Uuid::new_v4().simple().to_string();
        Self::set(db, "aria2_rpc_secret", &secret)?;
        log::debug!("Generated a new aria2 RPC secret");
        settings.aria2_rpc_secret = secret;
        Ok(())
    }

    /// Get a single setting value
    pub fn get(db: &Database, key: &str) -> Result<Option<String>> {
        db.with_conn(|conn| {
            let result = conn.query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            );

            match result {
                Ok(value) => Ok(Some(value)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
    }
}

/// Expand a leading `~` to the home directory
fn expand_home(value: String) -> String {
    if let Some(rest) = value.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest).to_string_lossy().to_string();
        }
    } else if value == "~" {
        if let Some(home) = dirs::home_dir() {
            return home.to_string_lossy().to_string();
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_key_is_saved() {
        let db = Database::in_memory().unwrap();
        SettingsDb::save(&db, &Settings::default()).unwrap();
        for key in SettingsDb::KEYS {
            assert!(SettingsDb::get(&db, key).unwrap().is_some(), "{} not saved", key);
        }
    }

    #[test]
    fn test_defaults_when_empty() {
        let db = Database::in_memory().unwrap();
        let settings = SettingsDb::load(&db).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.aria2_rpc_port, 6800);
        assert!(settings.download_enabled);
        assert!(settings.monitor_dir().is_none());
    }

    #[test]
    fn test_save_and_load() {
        let db = Database::in_memory().unwrap();
        let settings = Settings {
            library_dir: "/srv/kiwix".into(),
            download_dir: "/srv/kiwix/zims".into(),
            monitor_dir: "/srv/kiwix/watch".into(),
            download_enabled: false,
            aria2_path: "/usr/local/bin/aria2c".into(),
            aria2_rpc_port: 42042,
            aria2_rpc_url: "http://127.0.0.1:6800/jsonrpc".into(),
            aria2_rpc_secret: "s3cret".into(),
        };
        SettingsDb::save(&db, &settings).unwrap();
        assert_eq!(SettingsDb::load(&db).unwrap(), settings);
        assert_eq!(
            SettingsDb::get(&db, "aria2_rpc_port").unwrap().as_deref(),
            Some("42042")
        );
    }

    #[test]
    fn test_bad_values_fall_back() {
        let db = Database::in_memory().unwrap();
        SettingsDb::set(&db, "aria2_rpc_port", "not a port").unwrap();
        SettingsDb::set(&db, "unknown_key", "x").unwrap();
        let settings = SettingsDb::load(&db).unwrap();
        assert_eq!(settings.aria2_rpc_port, 6800);
        assert_eq!(SettingsDb::get(&db, "missing").unwrap(), None);
    }

    #[test]
    fn test_rpc_secret_is_persisted_once() {
        let db = Database::in_memory().unwrap();
        let mut first = SettingsDb::load(&db).unwrap();
        SettingsDb::ensure_rpc_secret(&db, &mut first).unwrap();
        assert_eq!(first.aria2_rpc_secret.len(), 32);

        let mut second = SettingsDb::load(&db).unwrap();
        assert_eq!(second.aria2_rpc_secret, first.aria2_rpc_secret);
        SettingsDb::ensure_rpc_secret(&db, &mut second).unwrap();
        assert_eq!(second.aria2_rpc_secret, first.aria2_rpc_secret);
    }

    #[test]
    fn test_no_rpc_secret_for_remote_daemon() {
        let db = Database::in_memory().unwrap();
        let mut settings = Settings {
            aria2_rpc_url: "http://127.0.0.1:6800/jsonrpc".into(),
            ..Settings::default()
        };
        SettingsDb::ensure_rpc_secret(&db, &mut settings).unwrap();
        assert!(settings.aria2_rpc_secret.is_empty());
        assert_eq!(SettingsDb::get(&db, "aria2_rpc_secret").unwrap(), None);
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/abs".into()), "/abs");
        if let Some(home) = dirs::home_dir() {
            assert_eq!(
                expand_home("~/zims".into()),
                home.join("zims").to_string_lossy()
            );
        }
    }
}
