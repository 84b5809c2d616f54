//! Minimal ZIM header reader
//!
//! Only the fixed-size header is read: enough to identify an archive and
//! register it in the catalog. Content access belongs to the ZIM reader.

use crate::error::{Error, Result};
use crate::types::Book;
use chrono::Utc;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use uuid::Uuid;

const ZIM_MAGIC: u32 = 0x044D_495A;
/// Magic, versions and uuid: the start of the 80-byte header
const HEADER_PREFIX_LEN: usize = 24;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZimHeader {
    pub major_version: u16,
    pub minor_version: u16,
    pub uuid: Uuid,
}

/// Read and validate the header of the archive at `path`
pub fn read_header(path: &Path) -> Result<ZimHeader> {
    let mut file = File::open(path)?;
    let mut buf = [0u8; HEADER_PREFIX_LEN];
    file.read_exact(&mut buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::InvalidZim(format!("{}: truncated header", path.display()))
        } else {
            Error::Io(e)
        }
    })?;
    parse_header(&buf).ok_or_else(|| Error::InvalidZim(format!("{}: bad magic number", path.display())))
}

fn parse_header(buf: &[u8; HEADER_PREFIX_LEN]) -> Option<ZimHeader> {
    let magic = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if magic != ZIM_MAGIC {
        return None;
    }
    let mut uuid = [0u8; 16];
    uuid.copy_from_slice(&buf[8..24]);
    Some(ZimHeader {
        major_version: u16::from_le_bytes([buf[4], buf[5]]),
        minor_version: u16::from_le_bytes([buf[6], buf[7]]),
        uuid: Uuid::from_bytes(uuid),
    })
}

/// Build a catalog entry for a local archive
pub fn book_from_path(path: &Path) -> Result<Book> {
    let path = path.canonicalize()?;
    let header = read_header(&path)?;
    let size = path.metadata()?.len();
    let title = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    Ok(Book {
        id: header.uuid.to_string(),
        path: path.to_string_lossy().to_string(),
        size,
        url: String::new(),
        title,
        added_at: Some(Utc::now()),
        download_id: String::new(),
    })
}

/// Whether `path` looks like a ZIM archive by name
pub fn is_zim_path(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("zim"))
        .unwrap_or(false)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    /// Write a file carrying a valid ZIM header with the given uuid
    pub(crate) fn write_zim(dir: &Path, name: &str, uuid: Uuid) -> PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(&ZIM_MAGIC.to_le_bytes()).unwrap();
        file.write_all(&6u16.to_le_bytes()).unwrap();
        file.write_all(&1u16.to_le_bytes()).unwrap();
        file.write_all(uuid.as_bytes()).unwrap();
        file.write_all(&[0u8; 56]).unwrap();
        path
    }

    #[test]
    fn test_read_header() {
        let dir = tempfile::tempdir().unwrap();
        let uuid = Uuid::new_v4();
        let path = write_zim(dir.path(), "wikipedia_en_all.zim", uuid);

        let header = read_header(&path).unwrap();
        assert_eq!(header.major_version, 6);
        assert_eq!(header.minor_version, 1);
        assert_eq!(header.uuid, uuid);
    }

    #[test]
    fn test_book_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let uuid = Uuid::new_v4();
        let path = write_zim(dir.path(), "wiktionary_fr.zim", uuid);

        let book = book_from_path(&path).unwrap();
        assert_eq!(book.id, uuid.to_string());
        assert_eq!(book.title, "wiktionary_fr");
        assert_eq!(book.size, 80);
        assert!(book.is_local());
        assert!(!book.is_downloading());
    }

    #[test]
    fn test_rejects_bad_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.zim");
        std::fs::write(&path, [0u8; 80]).unwrap();
        assert!(matches!(read_header(&path), Err(Error::InvalidZim(_))));
    }

    #[test]
    fn test_rejects_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.zim");
        std::fs::write(&path, ZIM_MAGIC.to_le_bytes()).unwrap();
        assert!(matches!(read_header(&path), Err(Error::InvalidZim(_))));
    }

    #[test]
    fn test_identifying_prefix_is_enough() {
        let dir = tempfile::tempdir().unwrap();
        let uuid = Uuid::new_v4();
        let full = std::fs::read(write_zim(dir.path(), "full.zim", uuid)).unwrap();

        let path = dir.path().join("prefix.zim");
        std::fs::write(&path, &full[..HEADER_PREFIX_LEN]).unwrap();
        assert_eq!(read_header(&path).unwrap().uuid, uuid);

        std::fs::write(&path, &full[..HEADER_PREFIX_LEN - 1]).unwrap();
        assert!(matches!(read_header(&path), Err(Error::InvalidZim(_))));
    }

    #[test]
    fn test_is_zim_path() {
        assert!(is_zim_path(Path::new("/a/b.zim")));
        assert!(is_zim_path(Path::new("B.ZIM")));
        assert!(!is_zim_path(Path::new("b.zim.part")));
        assert!(!is_zim_path(Path::new("zim")));
    }
}
