//! The Kobo desktop library provider.

use crate::db::{ContentRecord, Database};
use crate::drm;
use crate::error::{ErrorKind, Result, categorize, output_error};
use crate::keys::{self, HardwareAddress, UserKey};
use exn::ResultExt;
use once_cell::unsync::OnceCell;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::instrument;
use unbind_book::{Book, Destination, EPUB_EXTENSION, Provider, full_to_half, natural_sort_by_key};

const DATABASE_FILE: &str = "Kobo.sqlite";
const BOOKS_DIR: &str = "kepub";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BookKind {
    /// Has content keys; decrypting removes the DRM.
    Protected,
    /// Decrypting is a plain copy.
    Unprotected,
}

/// A book in the Kobo library, identified by its volume id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KoboBook {
    volume_id: String,
    title: String,
    path: PathBuf,
    kind: BookKind,
    author: Option<String>,
    series: Option<String>,
    series_number: Option<String>,
}
impl KoboBook {
    fn new(volume_id: String, record: ContentRecord, path: PathBuf, kind: BookKind) -> Self {
        let title = full_to_half(record.title.as_deref().unwrap_or(&volume_id));
        Self {
            volume_id,
            title,
            path,
            kind,
            author: record.author,
            series: record.series,
            series_number: record.series_number,
        }
    }

    pub fn volume_id(&self) -> &str {
        &self.volume_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> BookKind {
        self.kind
    }

    pub fn author(&self) -> Option<&str> {
        self.author.as_deref()
    }

    pub fn series(&self) -> Option<&str> {
        self.series.as_deref()
    }

    pub fn series_number(&self) -> Option<&str> {
        self.series_number.as_deref()
    }
}
impl Book for KoboBook {
    fn title(&self) -> Option<&str> {
        Some(&self.title)
    }
}

/// A Kobo desktop library: `Kobo.sqlite` and the `kepub/` book folder.
///
/// User keys and the book list are computed on first use and kept for the
/// lifetime of the provider.
#[derive(Debug)]
pub struct Kobo {
    root: PathBuf,
    db: Database,
    address: Option<HardwareAddress>,
    keys: OnceCell<Vec<UserKey>>,
    books: OnceCell<Vec<KoboBook>>,
}

impl Kobo {
    #[instrument(skip_all, fields(root = %root.as_ref().display()))]
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        if !root.is_dir() {
            exn::bail!(ErrorKind::SourceUnavailable(root.to_path_buf()));
        }
        let db = Database::open(root.join(DATABASE_FILE))?;
        Ok(Self { root: root.to_path_buf(), db, address: None, keys: OnceCell::new(), books: OnceCell::new() })
    }

    /// Derive user keys from `address` instead of this machine's own.
    pub fn with_hardware_address(mut self, address: HardwareAddress) -> Self {
        self.address = Some(address);
        self.keys = OnceCell::new();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every candidate user key, derived once.
    pub fn user_keys(&self) -> Result<&[UserKey]> {
        let keys = self.keys.get_or_try_init(|| {
            let address = match self.address {
                Some(address) => address,
                None => HardwareAddress::detect()?,
            };
            keys::user_keys(&self.db, &address)
        })?;
        Ok(keys.as_slice())
    }

    /// All books, protected and unprotected, in natural title order.
    pub fn library(&self) -> Result<&[KoboBook]> {
        Ok(self.books.get_or_try_init(|| self.enumerate())?.as_slice())
    }

    /// Titles in enumeration order.
    pub fn book_names(&self) -> Result<Vec<&str>> {
        Ok(self.library()?.iter().map(|book| book.title.as_str()).collect())
    }

    /// Decrypt `book` to `destination`.
    #[instrument(skip_all, fields(volume = %book.volume_id, kind = ?book.kind))]
    pub fn decrypt_to(&self, book: &KoboBook, destination: &Destination) -> Result<PathBuf> {
        match book.kind {
            BookKind::Unprotected => {
                let path = destination.copy_from(&book.path).map_err(output_error)?;
                tracing::info!(path = %path.display(), "Book copied");
                Ok(path)
            },
            BookKind::Protected => {
                let content_keys = self.db.content_keys(&book.volume_id)?;
                let user_keys = self.user_keys()?;
                drm::remove_drm(&book.path, destination, &book.volume_id, user_keys, &content_keys)
            },
        }
    }

    #[instrument(skip_all, fields(root = %self.root.display()))]
    fn enumerate(&self) -> Result<Vec<KoboBook>> {
        let books_dir = self.root.join(BOOKS_DIR);
        let mut books = Vec::new();
        let mut seen = HashSet::new();

        for volume in self.db.protected_volumes()? {
            let path = books_dir.join(&volume.volume_id);
            if !path.is_file() {
                tracing::trace!(volume = %volume.volume_id, "Protected volume not downloaded");
                continue;
            }
            seen.insert(volume.volume_id.clone());
            books.push(KoboBook::new(volume.volume_id, volume.record, path, BookKind::Protected));
        }

        for file_name in downloaded(&books_dir)? {
            if seen.contains(&file_name) {
                continue;
            }
            if let Some(record) = self.db.content(&file_name)? {
                let path = books_dir.join(&file_name);
                books.push(KoboBook::new(file_name, record, path, BookKind::Unprotected));
            }
        }

        natural_sort_by_key(&mut books, |book| book.title.as_str());
        tracing::debug!(count = books.len(), "Enumerated Kobo library");
        Ok(books)
    }
}

/// File names in the book folder, sorted. No folder means no books.
fn downloaded(books_dir: &Path) -> Result<Vec<String>> {
    let entries = match fs::read_dir(books_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).or_raise(|| ErrorKind::SourceUnavailable(books_dir.to_path_buf())),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(ErrorKind::Io)?;
        if entry.file_type().map_err(ErrorKind::Io)?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

impl Provider for Kobo {
    type Book = KoboBook;

    fn name(&self) -> &str {
        "Kobo"
    }

    fn books(&self) -> unbind_book::error::Result<&[KoboBook]> {
        self.library().map_err(categorize)
    }

    fn decrypt(&self, book: &KoboBook, folder: &Path, name: Option<&str>) -> unbind_book::error::Result<PathBuf> {
        let destination = Destination::vacant(folder, name.unwrap_or(&book.title), EPUB_EXTENSION)?;
        self.decrypt_to(book, &destination).map_err(categorize)
    }
}
