//! Database module - SQLite persistence for application settings

mod connection;
mod settings;

pub use connection::{app_data_dir, get_db_path, init_database, init_database_at, Database};
pub use settings::SettingsDb;
