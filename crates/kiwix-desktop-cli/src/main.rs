//! Kiwix Desktop CLI - command line frontend for the Kiwix desktop core
//!
//! Manages the local catalog, the monitored directory and book downloads.

mod commands;

use clap::{Parser, Subcommand};
use kiwix_desktop_core::{init_database, init_database_at, Database, SettingsDb, Settings};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "kiwix-desktop")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Library directory (overrides the stored setting)
    #[arg(long, env = "KIWIX_LIBRARY_DIR", global = true)]
    library_dir: Option<PathBuf>,

    /// Settings database
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the books of the library
    List {
        /// Only books present on disk
        #[arg(long, conflicts_with = "remote")]
        local: bool,
        /// Only books not present on disk
        #[arg(long)]
        remote: bool,
        /// Only books being downloaded
        #[arg(long)]
        downloading: bool,
        /// Case-insensitive match on the title
        #[arg(short, long)]
        query: Option<String>,
        /// Sort key: title, size, date or id
        #[arg(short, long, default_value = "title")]
        sort: String,
        /// Sort in descending order
        #[arg(long)]
        desc: bool,
    },
    /// Add ZIM files to the library
    Add {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Add a downloadable book to the library
    AddRemote {
        id: String,
        url: String,
        /// Size in bytes
        size: u64,
        #[arg(short, long)]
        title: Option<String>,
    },
    /// Remove a book from the library
    Remove { id: String },
    /// Sync the library with the monitored directory once
    Scan { dir: Option<PathBuf> },
    /// Keep the library in sync with the monitored directory
    Watch { dir: Option<PathBuf> },
    /// Download a book and follow its progress
    Download {
        id: String,
        /// Target directory (defaults to the download directory setting)
        #[arg(short, long)]
        dir: Option<PathBuf>,
        /// Return once the download has started
        #[arg(long)]
        detach: bool,
    },
    /// Pause the download of a book
    Pause { id: String },
    /// Resume the download of a book
    Resume { id: String },
    /// Cancel the download of a book
    Cancel { id: String },
    /// Follow the downloads in progress until they end
    Follow,
    /// Manage bookmarks
    #[command(subcommand)]
    Bookmark(BookmarkCommand),
    /// Show or change settings
    #[command(subcommand)]
    Settings(SettingsCommand),
}

#[derive(Subcommand, Debug)]
pub enum BookmarkCommand {
    Add {
        book_id: String,
        url: String,
        #[arg(short, long, default_value = "")]
        title: String,
    },
    Remove { book_id: String, url: String },
    List { book_id: Option<String> },
}

#[derive(Subcommand, Debug)]
pub enum SettingsCommand {
    Show,
    Set { key: String, value: String },
}

fn open_database(path: Option<&PathBuf>) -> kiwix_desktop_core::Result<Database> {
    match path {
        Some(path) => init_database_at(path),
        None => init_database(),
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    log::debug!("Starting Kiwix Desktop CLI v{}", env!("CARGO_PKG_VERSION"));

    let db = match open_database(args.db.as_ref()) {
        Ok(db) => db,
        Err(e) => {
            log::error!("Failed to initialize database: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut settings = SettingsDb::load(&db).unwrap_or_else(|e| {
        log::warn!("Failed to load settings, using defaults: {}", e);
        Settings::default()
    });
    if let Err(e) = SettingsDb::ensure_rpc_secret(&db, &mut settings) {
        log::warn!("Failed to store the aria2 RPC secret: {}", e);
    }
    if let Some(dir) = &args.library_dir {
        settings.library_dir = dir.to_string_lossy().to_string();
    }

    match commands::run(args.command, &db, &settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.user_facing() {
                Some((title, text)) => eprintln!("{} ({}): {}", title, text, e),
                None => eprintln!("Error: {}", e),
            }
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_download() {
        let args = Args::parse_from(["kiwix-desktop", "download", "wiki", "--dir", "/zims"]);
        match args.command {
            Command::Download { id, dir, detach } => {
                assert_eq!(id, "wiki");
                assert_eq!(dir, Some(PathBuf::from("/zims")));
                assert!(!detach);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_global_options_after_subcommand() {
        let args = Args::parse_from(["kiwix-desktop", "list", "--library-dir", "/lib", "--local"]);
        assert_eq!(args.library_dir, Some(PathBuf::from("/lib")));
        assert!(matches!(args.command, Command::List { local: true, .. }));
    }

    #[test]
    fn test_local_conflicts_with_remote() {
        assert!(Args::try_parse_from(["kiwix-desktop", "list", "--local", "--remote"]).is_err());
    }

    #[test]
    fn test_parse_settings_set() {
        let args = Args::parse_from(["kiwix-desktop", "settings", "set", "monitor_dir", "/zims"]);
        assert!(matches!(
            args.command,
            Command::Settings(SettingsCommand::Set { ref key, ref value }) if key == "monitor_dir" && value == "/zims"
        ));
    }
}
