//! Fixtures: a device database and kepub archives encrypted the way Kobo
//! desktop encrypts them.

use crate::keys::{HardwareAddress, UserKey, derive_user_keys};
use aes::Aes128;
use aes::cipher::block_padding::{NoPadding, Pkcs7};
use aes::cipher::{BlockEncryptMut, KeyInit};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rusqlite::{Connection, params};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

type Aes128EcbEnc = ecb::Encryptor<Aes128>;

pub const STRANGER: &str = "stranger";
pub const OWNER: &str = "owner";
pub const ADDRESS: HardwareAddress = HardwareAddress::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

/// The key the library's books are wrapped with: the owner's, with the
/// oldest salt. Never the first candidate.
pub fn owner_key() -> UserKey {
    derive_user_keys(&ADDRESS, &[STRANGER.to_string(), OWNER.to_string()])[1]
}

/// An arbitrary user key.
pub fn user_key(seed: u8) -> UserKey {
    let mut key = [0u8; 16];
    key.copy_from_slice(&Sha256::digest([seed])[..16]);
    key
}

pub fn encrypt(key: &[u8], plain: &[u8]) -> Vec<u8> {
    Aes128EcbEnc::new_from_slice(key).unwrap().encrypt_padded_vec_mut::<Pkcs7>(plain)
}

pub fn wrap(user_key: &UserKey, content_key: &[u8; 16]) -> String {
    let wrapped = Aes128EcbEnc::new_from_slice(user_key).unwrap().encrypt_padded_vec_mut::<NoPadding>(content_key);
    STANDARD.encode(wrapped)
}

pub struct Entry {
    pub name: String,
    pub data: Vec<u8>,
    pub encrypted: bool,
}
impl Entry {
    pub fn plain(name: &str, data: &[u8]) -> Self {
        Self { name: name.to_string(), data: data.to_vec(), encrypted: false }
    }

    pub fn encrypted(name: &str, data: &[u8]) -> Self {
        Self { name: name.to_string(), data: data.to_vec(), encrypted: true }
    }
}

pub struct Kepub {
    pub path: PathBuf,
    pub content_keys: HashMap<String, String>,
}

/// Write `entries` as a kepub, encrypting the marked ones, each with its own
/// content key wrapped by `user_key`.
pub fn create_kepub(folder: &Path, file_name: &str, entries: &[Entry], user_key: &UserKey) -> Kepub {
    fs::create_dir_all(folder).unwrap();
    let path = folder.join(file_name);
    let mut writer = ZipWriter::new(File::create(&path).unwrap());
    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut content_keys = HashMap::new();
    for entry in entries {
        let options = if entry.name == "mimetype" { stored } else { deflated };
        writer.start_file(entry.name.as_str(), options).unwrap();
        if entry.encrypted {
            let mut content_key = [0u8; 16];
            content_key.copy_from_slice(&Sha256::digest(entry.name.as_bytes())[..16]);
            writer.write_all(&encrypt(&content_key, &entry.data)).unwrap();
            content_keys.insert(entry.name.clone(), wrap(user_key, &content_key));
        } else {
            writer.write_all(&entry.data).unwrap();
        }
    }
    writer.finish().unwrap();
    Kepub { path, content_keys }
}

/// Every entry's name and decompressed contents, in archive order.
pub fn read_zip(path: &Path) -> Vec<(String, Vec<u8>)> {
    let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
    (0..archive.len())
        .map(|index| {
            let mut entry = archive.by_index(index).unwrap();
            let mut data = Vec::new();
            entry.read_to_end(&mut data).unwrap();
            (entry.name().to_string(), data)
        })
        .collect()
}

pub struct Volume<'a> {
    pub id: &'a str,
    pub title: Option<&'a str>,
    pub series_number: Option<i64>,
    /// Entry path and wrapped content key.
    pub keys: &'a [(&'a str, &'a str)],
}

/// Create `Kobo.sqlite` in `folder` with both users and the given volumes.
pub fn create_database(folder: &Path, volumes: &[Volume<'_>]) -> PathBuf {
    let path = folder.join("Kobo.sqlite");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(
        "CREATE TABLE user (UserID TEXT NOT NULL, UserKey TEXT);
         CREATE TABLE content (
             ContentID TEXT NOT NULL,
             Title TEXT,
             Attribution TEXT,
             Series TEXT,
             SeriesNumber
         );
         CREATE TABLE content_keys (volumeid TEXT, elementid TEXT, elementkey TEXT);",
    )
    .unwrap();
    for user in [STRANGER, OWNER] {
        conn.execute("INSERT INTO user (UserID) VALUES (?1)", [user]).unwrap();
    }
    for volume in volumes {
        conn.execute(
            "INSERT INTO content (ContentID, Title, Attribution, Series, SeriesNumber) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![volume.id, volume.title, "An Author", "A Series", volume.series_number],
        )
        .unwrap();
        for &(element, key) in volume.keys {
            conn.execute(
                "INSERT INTO content_keys (volumeid, elementid, elementkey) VALUES (?1, ?2, ?3)",
                [volume.id, element, key],
            )
            .unwrap();
        }
    }
    path
}

/// Add a `content` row without keys.
pub fn add_content(database: &Path, id: &str, title: Option<&str>) {
    let conn = Connection::open(database).unwrap();
    conn.execute("INSERT INTO content (ContentID, Title) VALUES (?1, ?2)", params![id, title]).unwrap();
}
