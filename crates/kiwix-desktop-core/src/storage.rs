//! Checks run on a target directory before a download starts

use crate::error::StorageError;
use crate::types::Book;
use std::fs;
use std::path::Path;

/// Source of free-space figures
pub trait FreeSpace: Send + Sync {
    /// Bytes available to the current user in `dir`, `None` if unknown
    fn available_space(&self, dir: &Path) -> Option<u64>;
}

/// Reads free space from the mounted disks
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemStorage;

impl FreeSpace for SystemStorage {
    fn available_space(&self, dir: &Path) -> Option<u64> {
        let dir = dir.canonicalize().ok()?;
        let disks = sysinfo::Disks::new_with_refreshed_list();
        disks
            .list()
            .iter()
            .filter(|disk| dir.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| disk.available_space())
    }
}

/// Make sure `book` fits in `dir`: the directory must exist, be writable and
/// have at least `book.size` bytes free
pub fn check_that_book_can_be_saved(
    book: &Book,
    dir: &Path,
    space: &dyn FreeSpace,
) -> Result<(), StorageError> {
    if !dir.is_dir() {
        return Err(StorageError::DirMissing);
    }
    if !is_writable(dir) {
        return Err(StorageError::DirNotWritable);
    }
    match space.available_space(dir) {
        Some(available) if available >= book.size => Ok(()),
        available => Err(StorageError::InsufficientSpace {
            required: book.size,
            available,
        }),
    }
}

/// Permission bits can lie (ACLs, read-only mounts), so try creating a file
fn is_writable(dir: &Path) -> bool {
    let test_file = dir.join(format!(".kiwix-write-test-{}", std::process::id()));
    match fs::File::create(&test_file) {
        Ok(_) => {
            let _ = fs::remove_file(&test_file);
            true
        }
        Err(_) => false,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Reports a fixed amount of free space
    pub(crate) struct FixedSpace(pub Option<u64>);

    impl FreeSpace for FixedSpace {
        fn available_space(&self, _dir: &Path) -> Option<u64> {
            self.0
        }
    }

    fn book(size: u64) -> Book {
        Book::remote("id", "https://download.kiwix.org/a.zim", size)
    }

    #[test]
    fn test_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert_eq!(
            check_that_book_can_be_saved(&book(1), &missing, &FixedSpace(Some(10))),
            Err(StorageError::DirMissing)
        );
    }

    #[test]
    fn test_file_is_not_a_dir() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file");
        fs::write(&file, b"").unwrap();
        assert_eq!(
            check_that_book_can_be_saved(&book(1), &file, &FixedSpace(Some(10))),
            Err(StorageError::DirMissing)
        );
    }

    #[test]
    fn test_space() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(check_that_book_can_be_saved(&book(10), dir.path(), &FixedSpace(Some(10))), Ok(()));
        assert_eq!(
            check_that_book_can_be_saved(&book(11), dir.path(), &FixedSpace(Some(10))),
            Err(StorageError::InsufficientSpace {
                required: 11,
                available: Some(10)
            })
        );
        assert_eq!(
            check_that_book_can_be_saved(&book(0), dir.path(), &FixedSpace(None)),
            Err(StorageError::InsufficientSpace {
                required: 0,
                available: None
            })
        );
    }

    #[test]
    fn test_writable_check_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(is_writable(dir.path()));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
