//! Book and provider capabilities.
//!
//! Every library source (a Kobo desktop library, a Kindle content folder,
//! ...) implements [`Provider`] on its own terms: there is no shared base
//! implementation, only the small capability set the aggregator needs.
//!
//! - A [`Book`] can report its title.
//! - A [`Provider`] enumerates its books once (memoized) and can decrypt one
//!   of them into an output folder.
//!
//! [`Source`] is the object-safe view of a provider, so that sources with
//! different book types can sit side by side in one [`SourceHandle`] list.

pub mod error;
mod output;
mod text;

pub use crate::output::Destination;
pub use crate::text::{full_to_half, natural_cmp, natural_sort_by_key};

use crate::error::{ErrorKind, Result};
use std::path::{Path, PathBuf};

/// File extension of decrypted e-books.
pub const EPUB_EXTENSION: &str = "epub";

pub type SourceHandle = Box<dyn Source>;

/// A single book owned by a [`Provider`].
pub trait Book {
    /// Human readable title, if one can be determined.
    fn title(&self) -> Option<&str>;
}

/// A library source.
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use unbind_book::{Book, Provider, error::Result};
///
/// fn decrypt_everything<P: Provider>(provider: &P, folder: &Path) -> Result<usize> {
///     let mut written = 0;
///     for book in provider.books()? {
///         match provider.decrypt(book, folder, None) {
///             Ok(_) => written += 1,
///             Err(e) => eprintln!("{}: {e}", book.title().unwrap_or("Unknown")),
///         }
///     }
///     Ok(written)
/// }
/// ```
pub trait Provider {
    type Book: Book;

    /// Name of the source, used for logging.
    fn name(&self) -> &str;

    /// All books of this source.
    ///
    /// Computed on first access and cached for the lifetime of the provider;
    /// repeated calls return the cached list without touching the source.
    fn books(&self) -> Result<&[Self::Book]>;

    /// Decrypt `book` into `folder`, named `{name}.epub` (or after the
    /// book's own title when `name` is absent).
    ///
    /// Returns the path of the created file. Never overwrites an existing
    /// file: a collision fails with [`OutputExists`](ErrorKind::OutputExists).
    fn decrypt(&self, book: &Self::Book, folder: &Path, name: Option<&str>) -> Result<PathBuf>;
}

/// Object-safe view of a [`Provider`], addressing books by their position in
/// [`Provider::books`].
pub trait Source {
    fn name(&self) -> &str;

    /// Titles of all books, in enumeration order.
    fn titles(&self) -> Result<Vec<Option<String>>>;

    /// Decrypt the book at `index`, see [`Provider::decrypt`].
    fn decrypt_nth(&self, index: usize, folder: &Path, name: Option<&str>) -> Result<PathBuf>;
}

impl<P: Provider> Source for P {
    fn name(&self) -> &str {
        Provider::name(self)
    }

    fn titles(&self) -> Result<Vec<Option<String>>> {
        Ok(self.books()?.iter().map(|book| book.title().map(str::to_string)).collect())
    }

    fn decrypt_nth(&self, index: usize, folder: &Path, name: Option<&str>) -> Result<PathBuf> {
        let books = self.books()?;
        let Some(book) = books.get(index) else {
            exn::bail!(ErrorKind::BookNotFound(index));
        };
        self.decrypt(book, folder, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Titled(Option<&'static str>);
    impl Book for Titled {
        fn title(&self) -> Option<&str> {
            self.0
        }
    }

    struct Shelf {
        books: Vec<Titled>,
        decrypted: Cell<usize>,
    }
    impl Provider for Shelf {
        type Book = Titled;

        fn name(&self) -> &str {
            "shelf"
        }

        fn books(&self) -> Result<&[Titled]> {
            Ok(&self.books)
        }

        fn decrypt(&self, book: &Titled, folder: &Path, name: Option<&str>) -> Result<PathBuf> {
            self.decrypted.set(self.decrypted.get() + 1);
            let stem = name.or(book.title()).unwrap_or("untitled");
            Ok(folder.join(format!("{stem}.{EPUB_EXTENSION}")))
        }
    }

    fn shelf() -> Shelf {
        Shelf { books: vec![Titled(Some("First")), Titled(None)], decrypted: Cell::new(0) }
    }

    #[test]
    fn test_source_titles_follow_enumeration_order() {
        let source: SourceHandle = Box::new(shelf());
        assert_eq!(source.name(), "shelf");
        assert_eq!(source.titles().unwrap(), vec![Some("First".to_string()), None]);
    }

    #[test]
    fn test_decrypt_nth_resolves_book() {
        let shelf = shelf();
        let path = shelf.decrypt_nth(0, Path::new("/out"), None).unwrap();
        assert_eq!(path, Path::new("/out/First.epub"));
        let path = shelf.decrypt_nth(1, Path::new("/out"), Some("renamed")).unwrap();
        assert_eq!(path, Path::new("/out/renamed.epub"));
        assert_eq!(shelf.decrypted.get(), 2);
    }

    #[test]
    fn test_decrypt_nth_out_of_range() {
        let shelf = shelf();
        let err = shelf.decrypt_nth(2, Path::new("/out"), None).unwrap_err();
        assert!(matches!(&*err, ErrorKind::BookNotFound(2)));
        assert_eq!(shelf.decrypted.get(), 0);
    }
}
