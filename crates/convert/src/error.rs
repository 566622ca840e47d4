//! Convert Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::PathBuf;
use unbind_book::error::ErrorKind as BookErrorKind;

/// A conversion error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for conversion operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The input is not a readable ZIP archive.
    #[display("unreadable archive: {}", _0.display())]
    Archive(#[error(not(source))] PathBuf),
    /// A required entry (container, package, spine document or image) is
    /// missing from the archive.
    #[display("missing archive entry: {_0}")]
    MissingEntry(#[error(not(source))] String),
    /// `META-INF/container.xml` names no package document.
    #[display("container has no rootfile")]
    NoRootfile,
    /// An XML document could not be parsed.
    #[display("malformed XML: {_0}")]
    Xml(#[error(not(source))] String),
    /// The spine references an id the manifest doesn't declare.
    #[display("spine references unknown manifest item: {_0}")]
    UnknownItem(#[error(not(source))] String),
    #[display("output already exists: {}", _0.display())]
    OutputExists(#[error(not(source))] PathBuf),
    #[display("I/O error: {_0}")]
    Io(IoError),
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_))
    }

    /// The shared [`unbind_book`] category of this error.
    pub fn category(&self) -> BookErrorKind {
        match self {
            Self::Archive(path) => BookErrorKind::MalformedArchive(path.display().to_string()),
            Self::MissingEntry(name) => BookErrorKind::MalformedArchive(name.clone()),
            Self::NoRootfile | Self::Xml(_) | Self::UnknownItem(_) => BookErrorKind::MalformedManifest(self.to_string()),
            Self::OutputExists(path) => BookErrorKind::OutputExists(path.clone()),
            Self::Io(err) => BookErrorKind::Io(IoError::new(err.kind(), err.to_string())),
        }
    }
}

/// Raise a conversion error as the matching shared [`unbind_book`] error,
/// keeping the original as its child.
pub fn categorize(err: Error) -> unbind_book::error::Error {
    let category = err.category();
    err.raise(category)
}

pub(crate) fn output_error(err: unbind_book::error::Error) -> Error {
    let kind = match &*err {
        BookErrorKind::OutputExists(path) => ErrorKind::OutputExists(path.clone()),
        other => ErrorKind::Io(IoError::other(other.to_string())),
    };
    err.raise(kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ErrorKind::NoRootfile, "malformed manifest: container has no rootfile")]
    #[case(ErrorKind::UnknownItem("p1".into()), "malformed manifest: spine references unknown manifest item: p1")]
    #[case(ErrorKind::MissingEntry("OEBPS/a.jpg".into()), "malformed archive: OEBPS/a.jpg")]
    fn test_categories(#[case] kind: ErrorKind, #[case] expected: &str) {
        let err = categorize(Error::from(kind));
        assert_eq!((*err).to_string(), expected);
    }
}
