//! Command implementations

use crate::{BookmarkCommand, Command, SettingsCommand};
use kiwix_desktop_core::monitor::load_monitor_dir;
use kiwix_desktop_core::{
    convert_to_units, settings_to_engine_config, Book, BookChange, Bookmark, ContentManager, Database,
    DirWatcher, Downloader, Error, Filter, Library, LibraryEvent, Result, Settings, SettingsDb, SortBy,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub fn run(command: Command, db: &Database, settings: &Settings) -> Result<()> {
    match command {
        Command::List {
            local,
            remote,
            downloading,
            query,
            sort,
            desc,
        } => {
            let library = open_library(settings)?;
            let filter = Filter {
                query,
                local,
                remote,
                downloading,
            };
            for id in library.list_book_ids(&filter, SortBy::from(sort.as_str()), !desc) {
                if let Some(book) = library.book(&id) {
                    print_book(&book);
                }
            }
            Ok(())
        }
        Command::Add { paths } => {
            let library = open_library(settings)?;
            for path in paths {
                let id = library.open_book_from_path(&path)?;
                println!("{} {}", id, path.display());
            }
            Ok(())
        }
        Command::AddRemote { id, url, size, title } => {
            let library = open_library(settings)?;
            let mut book = Book::remote(id.clone(), url, size);
            book.title = title.unwrap_or_else(|| id.clone());
            if !library.add_book(book) {
                println!("Replaced {}", id);
            }
            library.save()
        }
        Command::Remove { id } => {
            let library = open_library(settings)?;
            let book = library
                .remove_book(&id)
                .ok_or_else(|| Error::NotFound(format!("book {}", id)))?;
            if book.is_downloading() {
                log::warn!("{} was being downloaded; the transfer is left running", id);
            }
            library.save()
        }
        Command::Scan { dir } => {
            let dir = monitor_dir(dir, settings)?;
            let library = open_library(settings)?;
            let diff = load_monitor_dir(&library, &dir)?;
            for id in &diff.added {
                println!("+ {}", id);
            }
            for id in &diff.removed {
                println!("- {}", id);
            }
            Ok(())
        }
        Command::Watch { dir } => watch(monitor_dir(dir, settings)?, open_library(settings)?),
        Command::Download { id, dir, detach } => {
            let manager = content_manager(settings)?;
            let dir = dir.unwrap_or_else(|| PathBuf::from(&settings.download_dir));
            let did = manager.download_book(&id, &dir)?;
            if did.is_empty() {
                println!("{} is already on disk", id);
                return Ok(());
            }
            println!("Downloading {} into {} ({})", id, dir.display(), did);
            if detach {
                Ok(())
            } else {
                follow(&manager)
            }
        }
        Command::Pause { id } => content_manager(settings)?.pause_book(&id),
        Command::Resume { id } => content_manager(settings)?.resume_book(&id),
        Command::Cancel { id } => {
            if !content_manager(settings)?.cancel_book(&id)? {
                println!("Nothing to cancel for {}", id);
            }
            Ok(())
        }
        Command::Follow => follow(&content_manager(settings)?),
        Command::Bookmark(cmd) => {
            let library = open_library(settings)?;
            bookmark_command(cmd, &library)
        }
        Command::Settings(cmd) => settings_command(cmd, db, settings),
    }
}

/// Keep the library in sync with `dir` until the process is killed
fn watch(dir: PathBuf, library: Arc<Library>) -> Result<()> {
    let events = library.events();
    let _watcher = DirWatcher::start(library.clone(), dir)?;
    while let Ok(event) = events.recv_blocking() {
        if event == LibraryEvent::BooksChanged {
            log::info!("Library now holds {} books", library.book_ids().len());
        }
    }
    Ok(())
}

fn open_library(settings: &Settings) -> Result<Arc<Library>> {
    Ok(Arc::new(Library::open(&settings.library_dir)?))
}

fn content_manager(settings: &Settings) -> Result<ContentManager> {
    let library = open_library(settings)?;
    ContentManager::new(library, connect_engine(settings))
}

/// Reach the download engine, `None` when downloading is disabled or the
/// daemon cannot be started
fn connect_engine(settings: &Settings) -> Option<Downloader> {
    let config = settings_to_engine_config(settings)?;
    match Downloader::connect(&config) {
        Ok(downloader) => Some(downloader),
        Err(e) => {
            log::error!("Failed to start download engine: {}", e);
            None
        }
    }
}

fn monitor_dir(dir: Option<PathBuf>, settings: &Settings) -> Result<PathBuf> {
    dir.or_else(|| settings.monitor_dir())
        .ok_or_else(|| Error::NotFound("monitored directory (set monitor_dir)".into()))
}

/// Print download progress until every download has completed, failed or
/// vanished
fn follow(manager: &ContentManager) -> Result<()> {
    if !manager.downloads().downloading_functionality_available() {
        return Err(Error::DownloadUnavailable);
    }
    let events = manager.downloads().events();
    while !manager.downloads().tracked_ids().is_empty() {
        let event = events
            .recv_blocking()
            .map_err(|e| Error::Channel(e.to_string()))?;
        match manager.handle_event(&event)? {
            BookChange::Progress { book_id, state } => {
                let paused = if state.paused { " (paused)" } else { "" };
                println!(
                    "{}: {}% {} {}{}",
                    book_id, state.progress, state.completed_length, state.download_speed, paused
                );
            }
            BookChange::Completed { book_id, path } => println!("{}: done, saved to {}", book_id, path),
            BookChange::Failed { book_id, info } => {
                println!("{}: download failed at {}", book_id, convert_to_units(info.completed_length as f64))
            }
            BookChange::Vanished { book_id, reason } => println!("{}: download lost ({:?})", book_id, reason),
        }
    }
    Ok(())
}

fn print_book(book: &Book) {
    let location = if book.is_downloading() {
        "downloading"
    } else if book.is_local() {
        book.path.as_str()
    } else {
        book.url.as_str()
    };
    println!(
        "{}\t{}\t{}\t{}",
        book.id,
        book.title,
        convert_to_units(book.size as f64),
        location
    );
}

fn bookmark_command(cmd: BookmarkCommand, library: &Library) -> Result<()> {
    match cmd {
        BookmarkCommand::Add { book_id, url, title } => {
            if library.book(&book_id).is_none() {
                return Err(Error::NotFound(format!("book {}", book_id)));
            }
            library.add_bookmark(Bookmark::new(book_id, url, title));
        }
        BookmarkCommand::Remove { book_id, url } => {
            if !library.remove_bookmark(&book_id, &url) {
                return Err(Error::NotFound(format!("bookmark {} in {}", url, book_id)));
            }
        }
        BookmarkCommand::List { book_id } => {
            let bookmarks = match &book_id {
                Some(id) => library.bookmarks_for(id),
                None => library.bookmarks(),
            };
            for bookmark in bookmarks {
                println!("{}\t{}\t{}", bookmark.book_id, bookmark.url, bookmark.title);
            }
            return Ok(());
        }
    }
    library.save()
}

fn settings_command(cmd: SettingsCommand, db: &Database, settings: &Settings) -> Result<()> {
    match cmd {
        SettingsCommand::Show => {
            for (key, value) in settings_entries(settings) {
                println!("{} = {}", key, value);
            }
        }
        SettingsCommand::Set { key, value } => {
            if !SettingsDb::KEYS.contains(&key.as_str()) {
                return Err(Error::NotFound(format!("setting {}", key)));
            }
            let value = match key.as_str() {
                "library_dir" | "download_dir" | "monitor_dir" if !value.is_empty() => {
                    absolute(Path::new(&value))
                }
                _ => value,
            };
            SettingsDb::set(db, &key, &value)?;
        }
    }
    Ok(())
}

fn settings_entries(settings: &Settings) -> Vec<(&'static str, String)> {
    let secret = if settings.aria2_rpc_secret.is_empty() { "" } else { "********" };
    vec![
        ("library_dir", settings.library_dir.clone()),
        ("download_dir", settings.download_dir.clone()),
        ("monitor_dir", settings.monitor_dir.clone()),
        ("download_enabled", settings.download_enabled.to_string()),
        ("aria2_path", settings.aria2_path.clone()),
        ("aria2_rpc_port", settings.aria2_rpc_port.to_string()),
        ("aria2_rpc_url", settings.aria2_rpc_url.clone()),
        ("aria2_rpc_secret", secret.to_string()),
    ]
}

fn absolute(path: &Path) -> String {
    std::path::absolute(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .to_string()
}
