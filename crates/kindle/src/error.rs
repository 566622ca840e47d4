//! Kindle Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::PathBuf;
use unbind_book::error::ErrorKind as BookErrorKind;

/// A Kindle error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for Kindle operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The Kindle content directory does not exist.
    #[display("Kindle directory not found: {}", _0.display())]
    SourceUnavailable(#[error(not(source))] PathBuf),
    /// The key file is missing and could not be generated.
    #[display("Kindle key unavailable: {}", _0.display())]
    KeyUnavailable(#[error(not(source))] PathBuf),
    /// No command is configured for a delegated service.
    #[display("{_0} command not configured")]
    ServiceNotConfigured(#[error(not(source))] &'static str),
    /// The configured program is not installed or not on `PATH`.
    #[display("program not found: {_0}")]
    ProgramNotFound(#[error(not(source))] String),
    /// A delegated service exited abnormally. `None` when killed by a signal.
    #[display("{program} exited with code {code:?}")]
    ServiceFailed {
        program: String,
        code: Option<i32>,
    },
    /// The decryption service rejected the book or produced nothing.
    #[display("could not decrypt: {}", _0.display())]
    DecryptionFailed(#[error(not(source))] PathBuf),
    /// The unpacking service produced no e-book.
    #[display("unpacking produced no epub: {}", _0.display())]
    NothingUnpacked(#[error(not(source))] PathBuf),
    #[display("output already exists: {}", _0.display())]
    OutputExists(#[error(not(source))] PathBuf),
    /// The book header is truncated or not a Palm database.
    #[display("invalid book header: {_0}")]
    InvalidHeader(#[error(not(source))] &'static str),
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

    /// The shared category this error is reported as at the provider boundary.
    pub(crate) fn category(&self) -> BookErrorKind {
        match self {
            Self::SourceUnavailable(path) => BookErrorKind::SourceUnavailable(path.clone()),
            Self::KeyUnavailable(_)
            | Self::ServiceNotConfigured(_)
            | Self::ProgramNotFound(_)
            | Self::ServiceFailed { .. } => BookErrorKind::ExternalService,
            Self::DecryptionFailed(path) => BookErrorKind::DecryptionFailed(path.display().to_string()),
            Self::NothingUnpacked(path) => BookErrorKind::MalformedArchive(path.display().to_string()),
            Self::OutputExists(path) => BookErrorKind::OutputExists(path.clone()),
            Self::InvalidHeader(detail) => BookErrorKind::MalformedArchive(detail.to_string()),
            Self::Io(err) => BookErrorKind::Io(IoError::new(err.kind(), err.to_string())),
        }
    }
}

/// Raise a Kindle error as the matching shared [`unbind_book`] error, keeping
/// the original as its child.
pub(crate) fn categorize(err: Error) -> unbind_book::error::Error {
    let category = err.category();
    err.raise(category)
}

/// Raise an output error from the shared [`Destination`](unbind_book::Destination)
/// as the matching Kindle error.
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

    #[test]
    fn error_kind_display() {
        let err = ErrorKind::ServiceFailed { program: "dedrm".into(), code: Some(2) };
        assert_eq!(err.to_string(), "dedrm exited with code Some(2)");
        assert_eq!(ErrorKind::ServiceNotConfigured("decrypt").to_string(), "decrypt command not configured");
    }

    #[test]
    fn error_categories() {
        let err = categorize(Error::from(ErrorKind::ProgramNotFound("dedrm".into())));
        assert!(matches!(&*err, BookErrorKind::ExternalService));
        let err = categorize(Error::from(ErrorKind::DecryptionFailed(PathBuf::from("/k/B.azw"))));
        assert!(matches!(&*err, BookErrorKind::DecryptionFailed(p) if p == "/k/B.azw"));
    }
}
