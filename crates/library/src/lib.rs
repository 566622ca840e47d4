//! One flat book list over every configured source.
//!
//! A [`Library`] owns the sources (Kobo first, then Kindle when built from
//! [`Settings`]) and concatenates their book lists in order. Books are
//! addressed by their position in that list; decrypting resolves the
//! position back to the owning source.
//!
//! ```no_run
//! use unbind_config::Settings;
//! use unbind_library::{Format, Library};
//!
//! let settings = Settings::load().unwrap();
//! let library = Library::from_settings(&settings);
//! for (index, title) in library.titles().iter().enumerate() {
//!     println!("{index:>4}  {title}");
//! }
//! let folder = unbind_library::default_output(&settings);
//! for result in library.decrypt_many(&[0, 2], &folder, Format::Epub) {
//!     match result {
//!         Ok(path) => println!("wrote {}", path.display()),
//!         Err(e) => eprintln!("{e}"),
//!     }
//! }
//! ```

/// Errors are reported in the shared cross-source taxonomy.
pub use unbind_book::error;

use crate::error::{ErrorKind, Result};
use once_cell::unsync::OnceCell;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::instrument;
use unbind_book::SourceHandle;
use unbind_config::{KindleSettings, KoboSettings, Settings};
use unbind_convert::CBZ_EXTENSION;
use unbind_kindle::{CommandDrm, CommandTemplate, CommandUnpack, Kindle};
use unbind_kobo::{HardwareAddress, Kobo};

/// Shown for books whose source can't tell their title.
pub const UNKNOWN_TITLE: &str = "Unknown";
const SCRATCH_PREFIX: &str = ".unbind-images-";

/// Output format of a decrypt.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Format {
    /// The decrypted e-book as it is.
    #[default]
    Epub,
    /// Page images only, for image-based books.
    Cbz,
}

/// A book in the flat listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub title: Option<String>,
    /// Name of the source the book comes from.
    pub source: String,
    source_index: usize,
    book_index: usize,
}
impl Entry {
    pub fn title_or_unknown(&self) -> &str {
        self.title.as_deref().unwrap_or(UNKNOWN_TITLE)
    }
}

pub struct Library {
    sources: Vec<SourceHandle>,
    entries: OnceCell<Vec<Entry>>,
}

impl fmt::Debug for Library {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.sources.iter().map(|source| source.name()).collect();
        f.debug_struct("Library").field("sources", &names).finish_non_exhaustive()
    }
}

impl Library {
    pub fn new(sources: Vec<SourceHandle>) -> Self {
        Self { sources, entries: OnceCell::new() }
    }

    /// Every configured source that can be opened, Kobo first. Sources that
    /// aren't configured or fail to open are left out.
    #[instrument(skip_all)]
    pub fn from_settings(settings: &Settings) -> Self {
        let mut sources: Vec<SourceHandle> = Vec::new();
        match open_kobo(&settings.kobo) {
            Some(Ok(kobo)) => sources.push(Box::new(kobo)),
            Some(Err(e)) => tracing::warn!(error = %e, "Kobo library skipped"),
            None => tracing::debug!("Kobo library not configured"),
        }
        match open_kindle(&settings.kindle) {
            Some(Ok(kindle)) => sources.push(Box::new(kindle)),
            Some(Err(e)) => tracing::warn!(error = %e, "Kindle library skipped"),
            None => tracing::debug!("Kindle library not configured"),
        }
        Self::new(sources)
    }

    pub fn sources(&self) -> &[SourceHandle] {
        &self.sources
    }

    /// All books of all sources, in source order then each source's own
    /// order. A source whose books can't be listed contributes nothing.
    pub fn books(&self) -> &[Entry] {
        self.entries.get_or_init(|| self.enumerate())
    }

    /// Book titles in listing order, `Unknown` where there is none.
    pub fn titles(&self) -> Vec<&str> {
        self.books().iter().map(Entry::title_or_unknown).collect()
    }

    /// Decrypt the book at `index` into `folder`, named after its listed
    /// title (the source's own naming for untitled books).
    pub fn decrypt(&self, index: usize, folder: &Path) -> Result<PathBuf> {
        let (entry, source) = self.resolve(index)?;
        source.decrypt_nth(entry.book_index, folder, entry.title.as_deref())
    }

    /// Decrypt the book at `index` and keep only its page images, as
    /// `{folder}/{title}.cbz`. The intermediate e-book never reaches `folder`.
    #[instrument(skip(self, folder), fields(folder = %folder.display()))]
    pub fn decrypt_images(&self, index: usize, folder: &Path) -> Result<PathBuf> {
        let (entry, source) = self.resolve(index)?;
        fs::create_dir_all(folder).map_err(ErrorKind::Io)?;
        let scratch = tempfile::Builder::new().prefix(SCRATCH_PREFIX).tempdir_in(folder).map_err(ErrorKind::Io)?;
        let epub = source.decrypt_nth(entry.book_index, scratch.path(), entry.title.as_deref())?;
        let stem = epub.file_stem().map(|s| s.to_string_lossy().into_owned());
        let stem = stem.as_deref().unwrap_or_else(|| entry.title_or_unknown());
        let output = folder.join(format!("{stem}.{CBZ_EXTENSION}"));
        unbind_convert::epub_to_cbz(&epub, &output).map_err(unbind_convert::error::categorize)?;
        Ok(output)
    }

    /// Decrypt several books. One result per requested index, in request
    /// order; a failed book doesn't stop the others.
    #[instrument(skip(self, folder), fields(folder = %folder.display()))]
    pub fn decrypt_many(&self, indexes: &[usize], folder: &Path, format: Format) -> Vec<Result<PathBuf>> {
        let results: Vec<Result<PathBuf>> = indexes
            .iter()
            .map(|&index| {
                let result = match format {
                    Format::Epub => self.decrypt(index, folder),
                    Format::Cbz => self.decrypt_images(index, folder),
                };
                if let Err(e) = &result {
                    tracing::warn!(index, error = %e, "Book not decrypted");
                }
                result
            })
            .collect();
        let written = results.iter().filter(|result| result.is_ok()).count();
        tracing::info!(written, failed = results.len() - written, "Batch finished");
        results
    }

    fn resolve(&self, index: usize) -> Result<(&Entry, &SourceHandle)> {
        let Some(entry) = self.books().get(index) else {
            exn::bail!(ErrorKind::BookNotFound(index));
        };
        Ok((entry, &self.sources[entry.source_index]))
    }

    #[instrument(skip_all, fields(sources = self.sources.len()))]
    fn enumerate(&self) -> Vec<Entry> {
        let mut entries = Vec::new();
        for (source_index, source) in self.sources.iter().enumerate() {
            let titles = match source.titles() {
                Ok(titles) => titles,
                Err(e) => {
                    tracing::warn!(source = source.name(), error = %e, "Books of source not listed");
                    continue;
                },
            };
            tracing::debug!(source = source.name(), books = titles.len(), "Source listed");
            entries.extend(titles.into_iter().enumerate().map(|(book_index, title)| Entry {
                title,
                source: source.name().to_string(),
                source_index,
                book_index,
            }));
        }
        entries
    }
}

/// The configured output folder, or the parent of the working directory.
pub fn default_output(settings: &Settings) -> PathBuf {
    settings.output_folder()
}

fn open_kobo(settings: &KoboSettings) -> Option<unbind_kobo::error::Result<Kobo>> {
    let dir = settings.dir.as_ref()?;
    Some(Kobo::new(dir).and_then(|kobo| match &settings.hardware_address {
        Some(address) => Ok(kobo.with_hardware_address(address.parse::<HardwareAddress>()?)),
        None => Ok(kobo),
    }))
}

fn open_kindle(settings: &KindleSettings) -> Option<unbind_kindle::error::Result<Kindle<CommandDrm, CommandUnpack>>> {
    let dir = settings.dir.as_ref()?;
    let open = || -> unbind_kindle::error::Result<_> {
        let template = |argv: Option<&[String]>| argv.map(CommandTemplate::new).transpose();
        let drm = CommandDrm::new(
            template(settings.key_command.as_deref())?,
            template(settings.decrypt_command.as_deref())?,
        );
        let unpack = CommandUnpack::new(template(settings.unpack_command.as_deref())?);
        Ok(Kindle::new(dir, settings.key_file(), drm, unpack)?.with_extensions(settings.extensions.iter().cloned()))
    };
    Some(open())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::cell::RefCell;
    use std::io::{Cursor, Write};
    use std::rc::Rc;
    use unbind_book::{Book, EPUB_EXTENSION, Provider};
    use zip::ZipWriter;
    use zip::write::SimpleFileOptions;

    const PAGE: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 1, 2, 3];

    struct Titled(Option<&'static str>);
    impl Book for Titled {
        fn title(&self) -> Option<&str> {
            self.0
        }
    }

    /// In-memory source writing a one-page comic for every book, except
    /// books titled `locked`. Like the Kindle folder, it names output after
    /// the requested name only, never its own titles.
    struct Shelf {
        name: &'static str,
        books: Vec<Titled>,
        listable: bool,
        log: Rc<RefCell<Vec<String>>>,
    }
    impl Provider for Shelf {
        type Book = Titled;

        fn name(&self) -> &str {
            self.name
        }

        fn books(&self) -> unbind_book::error::Result<&[Titled]> {
            if !self.listable {
                exn::bail!(ErrorKind::Database);
            }
            Ok(&self.books)
        }

        fn decrypt(&self, book: &Titled, folder: &Path, name: Option<&str>) -> unbind_book::error::Result<PathBuf> {
            let stem = name.unwrap_or("untitled");
            self.log.borrow_mut().push(format!("{}/{stem}", self.name));
            if book.title() == Some("locked") {
                exn::bail!(ErrorKind::DecryptionFailed(stem.to_string()));
            }
            let path = folder.join(format!("{stem}.{EPUB_EXTENSION}"));
            if path.exists() {
                exn::bail!(ErrorKind::OutputExists(path));
            }
            fs::write(&path, comic()).map_err(ErrorKind::Io)?;
            Ok(path)
        }
    }

    fn comic() -> Vec<u8> {
        let container = r#"<container><rootfiles><rootfile full-path="content.opf"/></rootfiles></container>"#;
        let package = r#"<package><manifest><item id="p" href="page.jpg"/></manifest><spine><itemref idref="p"/></spine></package>"#;
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in [
            ("META-INF/container.xml", container.as_bytes()),
            ("content.opf", package.as_bytes()),
            ("page.jpg", PAGE),
        ] {
            writer.start_file(name, SimpleFileOptions::default()).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn shelf(name: &'static str, titles: &[Option<&'static str>], log: &Rc<RefCell<Vec<String>>>) -> SourceHandle {
        Box::new(Shelf {
            name,
            books: titles.iter().map(|&title| Titled(title)).collect(),
            listable: true,
            log: Rc::clone(log),
        })
    }

    fn failure(result: &Result<PathBuf>) -> &ErrorKind {
        result.as_ref().unwrap_err()
    }

    fn library(log: &Rc<RefCell<Vec<String>>>) -> Library {
        Library::new(vec![
            shelf("kobo", &[Some("Vol 1"), Some("locked")], log),
            shelf("kindle", &[None, Some("Manga")], log),
        ])
    }

    #[test]
    fn test_books_are_concatenated_in_source_order() {
        let library = library(&Rc::default());
        let books = library.books();
        let listed: Vec<(&str, Option<&str>)> =
            books.iter().map(|entry| (entry.source.as_str(), entry.title.as_deref())).collect();
        assert_eq!(
            listed,
            vec![("kobo", Some("Vol 1")), ("kobo", Some("locked")), ("kindle", None), ("kindle", Some("Manga"))]
        );
        assert_eq!(library.titles(), vec!["Vol 1", "locked", UNKNOWN_TITLE, "Manga"]);
        // Memoized.
        assert!(std::ptr::eq(books, library.books()));
    }

    #[test]
    fn test_unlistable_source_contributes_nothing() {
        let log = Rc::default();
        let broken: SourceHandle =
            Box::new(Shelf { name: "broken", books: vec![Titled(Some("x"))], listable: false, log: Rc::clone(&log) });
        let library = Library::new(vec![broken, shelf("kindle", &[Some("Manga")], &log)]);
        assert_eq!(library.titles(), vec!["Manga"]);
    }

    #[rstest]
    #[case(0, "kobo/Vol 1")]
    #[case(3, "kindle/Manga")]
    #[case(2, "kindle/untitled")]
    fn test_decrypt_routes_to_owning_source(#[case] index: usize, #[case] expected: &str) {
        let log = Rc::default();
        let library = library(&log);
        let temp_dir = tempfile::tempdir().unwrap();
        let path = library.decrypt(index, temp_dir.path()).unwrap();
        assert!(path.exists());
        assert_eq!(*log.borrow(), vec![expected.to_string()]);
    }

    #[test]
    fn test_decrypt_names_output_after_listed_title() {
        let library = library(&Rc::default());
        let temp_dir = tempfile::tempdir().unwrap();
        assert_eq!(library.decrypt(3, temp_dir.path()).unwrap(), temp_dir.path().join("Manga.epub"));
        assert_eq!(library.decrypt(2, temp_dir.path()).unwrap(), temp_dir.path().join("untitled.epub"));
        let epub = library.decrypt_many(&[0], temp_dir.path(), Format::Epub).remove(0).unwrap();
        let cbz = library.decrypt_many(&[0], temp_dir.path(), Format::Cbz).remove(0).unwrap();
        assert_eq!(epub.file_stem(), cbz.file_stem());
        assert_eq!(epub.file_stem().unwrap(), "Vol 1");
    }

    #[test]
    fn test_decrypt_out_of_range() {
        let log = Rc::default();
        let library = library(&log);
        let err = library.decrypt(4, Path::new("/nowhere")).unwrap_err();
        assert!(matches!(&*err, ErrorKind::BookNotFound(4)));
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_decrypt_many_keeps_going() {
        let library = library(&Rc::default());
        let temp_dir = tempfile::tempdir().unwrap();
        let results = library.decrypt_many(&[1, 0, 9, 3], temp_dir.path(), Format::Epub);
        assert_eq!(results.len(), 4);
        assert!(matches!(failure(&results[0]), ErrorKind::DecryptionFailed(_)));
        assert_eq!(results[1].as_ref().unwrap(), &temp_dir.path().join("Vol 1.epub"));
        assert!(matches!(failure(&results[2]), ErrorKind::BookNotFound(9)));
        assert_eq!(results[3].as_ref().unwrap(), &temp_dir.path().join("Manga.epub"));
    }

    #[test]
    fn test_decrypt_images() {
        let library = library(&Rc::default());
        let temp_dir = tempfile::tempdir().unwrap();
        let folder = temp_dir.path().join("out");
        let path = library.decrypt_images(3, &folder).unwrap();
        assert_eq!(path, folder.join("Manga.cbz"));

        let mut archive = zip::ZipArchive::new(fs::File::open(&path).unwrap()).unwrap();
        assert_eq!(archive.len(), 1);
        let mut page = archive.by_index(0).unwrap();
        assert_eq!(page.name(), "00001.jpg");
        let mut data = Vec::new();
        std::io::Read::read_to_end(&mut page, &mut data).unwrap();
        assert_eq!(data, PAGE);
        // The intermediate e-book and its scratch folder are gone.
        let names: Vec<_> = fs::read_dir(&folder).unwrap().map(|entry| entry.unwrap().file_name()).collect();
        assert_eq!(names, vec!["Manga.cbz"]);
    }

    #[test]
    fn test_decrypt_images_never_overwrites() {
        let library = library(&Rc::default());
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join("Manga.cbz"), b"mine").unwrap();
        let results = library.decrypt_many(&[3, 1], temp_dir.path(), Format::Cbz);
        assert!(matches!(failure(&results[0]), ErrorKind::OutputExists(_)));
        assert!(matches!(failure(&results[1]), ErrorKind::DecryptionFailed(_)));
        assert_eq!(fs::read(temp_dir.path().join("Manga.cbz")).unwrap(), b"mine");
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_from_settings_skips_unavailable_sources() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        assert!(Library::from_settings(&settings).sources().is_empty());

        settings.kobo.dir = Some(temp_dir.path().join("no-kobo"));
        settings.kindle.dir = Some(temp_dir.path().join("no-kindle"));
        let library = Library::from_settings(&settings);
        assert!(library.sources().is_empty());
        assert!(library.books().is_empty());
    }

    #[test]
    fn test_open_kobo() {
        assert!(open_kobo(&KoboSettings::default()).is_none());
        // A folder without a device database.
        let temp_dir = tempfile::tempdir().unwrap();
        let settings = KoboSettings { dir: Some(temp_dir.path().to_path_buf()), hardware_address: None };
        assert!(open_kobo(&settings).is_some_and(|kobo| kobo.is_err()));
    }

    #[test]
    fn test_default_output_prefers_configuration() {
        let settings = Settings { output: Some(PathBuf::from("/books")), ..Default::default() };
        assert_eq!(default_output(&settings), PathBuf::from("/books"));
    }
}
