//! Read-only access to the Kobo desktop device database.
//!
//! `Kobo.sqlite` is stored with file-format version bytes that SQLite refuses
//! to open read-only, so every connection goes through a private copy with
//! those two header bytes reset to the legacy (rollback journal) value.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, Row};
use std::collections::HashMap;
use std::fs;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::instrument;

/// Offset of the write/read file-format version bytes in the SQLite header.
const HEADER_VERSION_OFFSET: u64 = 18;
const HEADER_VERSION_PATCH: [u8; 2] = [0x01, 0x01];

const USER_IDS: &str = "SELECT UserID FROM user";
const CONTENT_KEYS: &str = "
    SELECT elementid, elementkey
    FROM content_keys, content
    WHERE volumeid = ?1 AND volumeid = contentid";
const PROTECTED_VOLUMES: &str = "
    SELECT DISTINCT volumeid, Title, Attribution, Series, SeriesNumber
    FROM content_keys, content
    WHERE contentid = volumeid";
const CONTENT: &str = "
    SELECT Title, Attribution, Series, SeriesNumber
    FROM content
    WHERE ContentID = ?1";

/// Title, author and series of one `content` row.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContentRecord {
    pub title: Option<String>,
    pub author: Option<String>,
    pub series: Option<String>,
    pub series_number: Option<String>,
}

/// A volume that has content keys, with its content record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProtectedVolume {
    pub volume_id: String,
    pub record: ContentRecord,
}

/// A read-only connection to a patched copy of the device database. The copy
/// is deleted when this is dropped.
#[derive(Debug)]
pub struct Database {
    conn: Connection,
    _copy: NamedTempFile,
}

impl Database {
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let copy = patched_copy(path)?;
        let conn = Connection::open_with_flags(
            copy.path(),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .or_raise(|| ErrorKind::Database)?;
        tracing::debug!("Opened device database");
        Ok(Self { conn, _copy: copy })
    }

    /// Every registered local user id, in table order.
    pub fn user_ids(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(USER_IDS).or_raise(|| ErrorKind::Database)?;
        let rows = stmt.query_map([], |row| text(row, 0)).or_raise(|| ErrorKind::Database)?;
        let mut ids = Vec::new();
        for id in rows {
            if let Some(id) = id.or_raise(|| ErrorKind::Database)? {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    /// Archive entry path to base64 wrapped content key, for one volume.
    pub fn content_keys(&self, volume_id: &str) -> Result<HashMap<String, String>> {
        let mut stmt = self.conn.prepare(CONTENT_KEYS).or_raise(|| ErrorKind::Database)?;
        let rows = stmt
            .query_map([volume_id], |row| Ok((text(row, 0)?, text(row, 1)?)))
            .or_raise(|| ErrorKind::Database)?;
        let mut keys = HashMap::new();
        for row in rows {
            if let (Some(element), Some(key)) = row.or_raise(|| ErrorKind::Database)? {
                keys.insert(element, key);
            }
        }
        Ok(keys)
    }

    /// All distinct volumes that have content keys.
    pub fn protected_volumes(&self) -> Result<Vec<ProtectedVolume>> {
        let mut stmt = self.conn.prepare(PROTECTED_VOLUMES).or_raise(|| ErrorKind::Database)?;
        let rows = stmt
            .query_map([], |row| Ok((text(row, 0)?, record(row, 1)?)))
            .or_raise(|| ErrorKind::Database)?;
        let mut volumes = Vec::new();
        for row in rows {
            if let (Some(volume_id), record) = row.or_raise(|| ErrorKind::Database)? {
                volumes.push(ProtectedVolume { volume_id, record });
            }
        }
        Ok(volumes)
    }

    /// The content record for a content id, if there is one.
    pub fn content(&self, content_id: &str) -> Result<Option<ContentRecord>> {
        let mut stmt = self.conn.prepare(CONTENT).or_raise(|| ErrorKind::Database)?;
        let mut rows = stmt.query([content_id]).or_raise(|| ErrorKind::Database)?;
        match rows.next().or_raise(|| ErrorKind::Database)? {
            Some(row) => Ok(Some(record(row, 0).or_raise(|| ErrorKind::Database)?)),
            None => Ok(None),
        }
    }
}

/// Copy the database into a temporary file and patch its header.
fn patched_copy(path: &Path) -> Result<NamedTempFile> {
    let mut copy = NamedTempFile::new().or_raise(|| ErrorKind::Database)?;
    let mut original = fs::File::open(path).or_raise(|| ErrorKind::Database)?;
    std::io::copy(&mut original, copy.as_file_mut()).or_raise(|| ErrorKind::Database)?;
    let file = copy.as_file_mut();
    file.seek(SeekFrom::Start(HEADER_VERSION_OFFSET)).or_raise(|| ErrorKind::Database)?;
    file.write_all(&HEADER_VERSION_PATCH).or_raise(|| ErrorKind::Database)?;
    file.sync_all().or_raise(|| ErrorKind::Database)?;
    Ok(copy)
}

/// Four consecutive columns starting at `start`: title, author, series and
/// series number.
fn record(row: &Row<'_>, start: usize) -> rusqlite::Result<ContentRecord> {
    Ok(ContentRecord {
        title: text(row, start)?,
        author: text(row, start + 1)?,
        series: text(row, start + 2)?,
        series_number: text(row, start + 3)?,
    })
}

/// A column as text. Kobo stores some numbers (series numbers, user ids on
/// older versions) with numeric affinity.
fn text(row: &Row<'_>, index: usize) -> rusqlite::Result<Option<String>> {
    Ok(match row.get_ref(index)? {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{self, OWNER, STRANGER};

    #[test]
    fn test_header_is_patched_before_open() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = test_helpers::create_database(temp_dir.path(), &[]);
        // Mark the original as a WAL database, like the desktop app leaves it.
        let mut bytes = fs::read(&path).unwrap();
        bytes[18] = 2;
        bytes[19] = 2;
        fs::write(&path, &bytes).unwrap();

        let db = Database::open(&path).unwrap();
        assert_eq!(db.user_ids().unwrap(), vec![STRANGER, OWNER]);
        // The original file is left alone.
        assert_eq!(&fs::read(&path).unwrap()[18..20], &[2, 2]);
    }

    #[test]
    fn test_open_missing_database() {
        let temp_dir = tempfile::tempdir().unwrap();
        let err = Database::open(temp_dir.path().join("Kobo.sqlite")).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Database));
    }

    #[test]
    fn test_queries() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = test_helpers::create_database(
            temp_dir.path(),
            &[test_helpers::Volume {
                id: "vol-1",
                title: Some("Ｂｏｏｋ　１"),
                series_number: Some(3),
                keys: &[("OEBPS/a.xhtml", "d3JhcHBlZA=="), ("OEBPS/b.xhtml", "a2V5")],
            }],
        );
        test_helpers::add_content(&path, "plain-1", Some("Plain"));
        let db = Database::open(&path).unwrap();

        let keys = db.content_keys("vol-1").unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys["OEBPS/a.xhtml"], "d3JhcHBlZA==");
        assert!(db.content_keys("plain-1").unwrap().is_empty());
        assert!(db.content_keys("missing").unwrap().is_empty());

        let volumes = db.protected_volumes().unwrap();
        assert_eq!(volumes.len(), 1);
        assert_eq!(volumes[0].volume_id, "vol-1");
        assert_eq!(volumes[0].record.title.as_deref(), Some("Ｂｏｏｋ　１"));
        assert_eq!(volumes[0].record.series_number.as_deref(), Some("3"));

        let plain = db.content("plain-1").unwrap().unwrap();
        assert_eq!(plain.title.as_deref(), Some("Plain"));
        assert_eq!(db.content("missing").unwrap(), None);
        // Bound, not interpolated.
        assert_eq!(db.content("x' OR '1'='1").unwrap(), None);
    }
}
