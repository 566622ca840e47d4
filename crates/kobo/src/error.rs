//! Kobo Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::PathBuf;
use unbind_book::error::ErrorKind as BookErrorKind;

/// A Kobo error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for Kobo operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The Kobo desktop data directory does not exist.
    #[display("Kobo directory not found: {}", _0.display())]
    SourceUnavailable(#[error(not(source))] PathBuf),
    /// No hardware network address could be found on this machine. Configure
    /// one explicitly.
    #[display("hardware network address unavailable")]
    IdentityUnavailable,
    #[display("invalid hardware network address: {_0}")]
    InvalidHardwareAddress(#[error(not(source))] String),
    /// The device database could not be copied, opened or queried.
    #[display("database error")]
    Database,
    /// None of the candidate user keys decrypted the book.
    #[display("no user key could decrypt volume: {_0}")]
    DecryptionFailed(#[error(not(source))] String),
    #[display("output already exists: {}", _0.display())]
    OutputExists(#[error(not(source))] PathBuf),
    /// The book file is not a readable ZIP archive.
    #[display("unreadable book archive: {_0}")]
    Archive(#[error(not(source))] String),
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
            Self::IdentityUnavailable | Self::InvalidHardwareAddress(_) => BookErrorKind::IdentityUnavailable,
            Self::Database => BookErrorKind::Database,
            Self::DecryptionFailed(volume) => BookErrorKind::DecryptionFailed(volume.clone()),
            Self::OutputExists(path) => BookErrorKind::OutputExists(path.clone()),
            Self::Archive(detail) => BookErrorKind::MalformedArchive(detail.clone()),
            Self::Io(err) => BookErrorKind::Io(IoError::new(err.kind(), err.to_string())),
        }
    }
}

/// Raise a Kobo error as the matching shared [`unbind_book`] error, keeping
/// the original as its child.
pub(crate) fn categorize(err: Error) -> unbind_book::error::Error {
    let category = err.category();
    err.raise(category)
}

/// Raise an output error from the shared [`Destination`](unbind_book::Destination)
/// as the matching Kobo error.
pub(crate) fn output_error(err: unbind_book::error::Error) -> Error {
    let kind = match &*err {
        BookErrorKind::OutputExists(path) => ErrorKind::OutputExists(path.clone()),
        other => ErrorKind::Io(IoError::other(other.to_string())),
    };
    err.raise(kind)
}
