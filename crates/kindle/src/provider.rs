//! The Kindle content folder provider.

use crate::error::{ErrorKind, Result, categorize, output_error};
use crate::header;
use crate::service::{DrmService, Status, UnpackService};
use exn::ResultExt;
use once_cell::unsync::OnceCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tempfile::TempDir;
use tracing::instrument;
use unbind_book::{Book, Destination, EPUB_EXTENSION, Provider, natural_sort_by_key};

const STAGING_PREFIX: &str = ".unbind-kindle-";

/// A Kindle book file. The title is read from the file header on first use
/// and kept for the lifetime of this value.
#[derive(Debug)]
pub struct KindleBook {
    path: PathBuf,
    keys: Rc<[PathBuf]>,
    title: OnceCell<Option<String>>,
}
impl KindleBook {
    fn new(path: PathBuf, keys: Rc<[PathBuf]>) -> Self {
        Self { path, keys, title: OnceCell::new() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Key files the decryption service is given for this book.
    pub fn keys(&self) -> &[PathBuf] {
        &self.keys
    }

    /// The file name without its extension.
    pub fn stem(&self) -> &str {
        self.path.file_stem().and_then(|s| s.to_str()).unwrap_or_default()
    }
}
impl Book for KindleBook {
    fn title(&self) -> Option<&str> {
        self.title
            .get_or_init(|| match header::read_title(&self.path) {
                Ok(title) => title,
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), error = %e, "Unreadable book header");
                    None
                },
            })
            .as_deref()
    }
}

/// A Kindle content folder whose books are decrypted by a [`DrmService`] and
/// unpacked by an [`UnpackService`].
pub struct Kindle<D, U> {
    root: PathBuf,
    keys: Rc<[PathBuf]>,
    extensions: Vec<String>,
    drm: D,
    unpack: U,
    books: OnceCell<Vec<KindleBook>>,
}

impl<D: DrmService, U: UnpackService> Kindle<D, U> {
    /// Open the content folder at `root`. When `key_file` doesn't exist yet
    /// the DRM service is asked to create it.
    #[instrument(skip_all, fields(root = %root.as_ref().display()))]
    pub fn new(root: impl AsRef<Path>, key_file: impl Into<PathBuf>, drm: D, unpack: U) -> Result<Self> {
        let root = root.as_ref();
        if !root.is_dir() {
            exn::bail!(ErrorKind::SourceUnavailable(root.to_path_buf()));
        }
        let key_file = key_file.into();
        if !key_file.exists() {
            tracing::info!(key_file = %key_file.display(), "Kindle key missing; fetching");
            if let Some(parent) = key_file.parent() {
                fs::create_dir_all(parent).map_err(ErrorKind::Io)?;
            }
            drm.fetch_key(&key_file).or_raise(|| ErrorKind::KeyUnavailable(key_file.clone()))?;
            if !key_file.exists() {
                exn::bail!(ErrorKind::KeyUnavailable(key_file));
            }
        }
        Ok(Self {
            root: root.to_path_buf(),
            keys: Rc::from(vec![key_file]),
            extensions: vec!["azw".to_string()],
            drm,
            unpack,
            books: OnceCell::new(),
        })
    }

    /// Book file extensions to look for, without the leading dot. Matched
    /// case-insensitively.
    pub fn with_extensions(mut self, extensions: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.extensions = extensions.into_iter().map(Into::into).collect();
        self.books = OnceCell::new();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All books under the content folder, in natural title order (file stem
    /// for books without a readable title).
    pub fn library(&self) -> Result<&[KindleBook]> {
        Ok(self.books.get_or_try_init(|| self.enumerate())?.as_slice())
    }

    #[instrument(skip_all, fields(root = %self.root.display()))]
    fn enumerate(&self) -> Result<Vec<KindleBook>> {
        let mut books = Vec::new();
        let mut stack = vec![self.root.clone()];
        while let Some(current) = stack.pop() {
            for entry in fs::read_dir(&current).map_err(ErrorKind::Io)? {
                let entry = entry.map_err(ErrorKind::Io)?;
                let file_type = entry.file_type().map_err(ErrorKind::Io)?;
                let path = entry.path();
                if file_type.is_dir() {
                    stack.push(path);
                } else if file_type.is_file() && self.is_book(&path) {
                    books.push(KindleBook::new(path, Rc::clone(&self.keys)));
                }
            }
        }
        books.sort_by(|a, b| a.path.cmp(&b.path));
        natural_sort_by_key(&mut books, |book| book.title().unwrap_or(book.stem()));
        tracing::debug!(count = books.len(), "Enumerated Kindle library");
        Ok(books)
    }

    fn is_book(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|wanted| wanted.eq_ignore_ascii_case(ext)))
    }

    /// Decrypt and unpack `book` into `{folder}/{name}.epub` (the book's file
    /// stem when `name` is absent).
    ///
    /// Intermediate files live in a temporary directory inside `folder`,
    /// removed whatever the outcome.
    #[instrument(skip_all, fields(book = %book.path.display()))]
    pub fn decrypt_to(&self, book: &KindleBook, folder: &Path, name: Option<&str>) -> Result<PathBuf> {
        let destination =
            Destination::vacant(folder, name.unwrap_or(book.stem()), EPUB_EXTENSION).map_err(output_error)?;
        let workspace = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(destination.folder())
            .map_err(ErrorKind::Io)?;

        let decrypted_dir = subdirectory(&workspace, "decrypted")?;
        if self.drm.decrypt(&book.path, &book.keys, &decrypted_dir)? == Status::Failure {
            exn::bail!(ErrorKind::DecryptionFailed(book.path.clone()));
        }
        let Some(intermediate) = files(&decrypted_dir)?.into_iter().next() else {
            exn::bail!(ErrorKind::DecryptionFailed(book.path.clone()));
        };

        let unpacked_dir = subdirectory(&workspace, "unpacked")?;
        self.unpack.unpack(&intermediate, &unpacked_dir)?;
        let Some(epub) = files(&unpacked_dir)?.into_iter().find(|path| is_epub(path)) else {
            exn::bail!(ErrorKind::NothingUnpacked(book.path.clone()));
        };

        let path = destination.copy_from(&epub).map_err(output_error)?;
        tracing::info!(path = %path.display(), "Book decrypted");
        Ok(path)
    }
}

impl<D: DrmService, U: UnpackService> Provider for Kindle<D, U> {
    type Book = KindleBook;

    fn name(&self) -> &str {
        "Kindle"
    }

    fn books(&self) -> unbind_book::error::Result<&[KindleBook]> {
        self.library().map_err(categorize)
    }

    fn decrypt(&self, book: &KindleBook, folder: &Path, name: Option<&str>) -> unbind_book::error::Result<PathBuf> {
        self.decrypt_to(book, folder, name).map_err(categorize)
    }
}

fn subdirectory(workspace: &TempDir, name: &str) -> Result<PathBuf> {
    let path = workspace.path().join(name);
    fs::create_dir(&path).map_err(ErrorKind::Io)?;
    Ok(path)
}

/// Every file below `dir`, sorted by path.
fn files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in fs::read_dir(&current).map_err(ErrorKind::Io)? {
            let entry = entry.map_err(ErrorKind::Io)?;
            let file_type = entry.file_type().map_err(ErrorKind::Io)?;
            if file_type.is_dir() {
                stack.push(entry.path());
            } else if file_type.is_file() {
                files.push(entry.path());
            }
        }
    }
    files.sort();
    Ok(files)
}

fn is_epub(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()).is_some_and(|ext| ext.eq_ignore_ascii_case(EPUB_EXTENSION))
}
