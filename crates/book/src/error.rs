//! Book Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. It is the taxonomy shared by every
//! provider: source crates keep their own, more detailed, error kinds and
//! raise one of these at the [`Provider`](crate::Provider) boundary with
//! their own error attached as a child.

use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::PathBuf;

/// A book error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for book operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The provider's backing directory is missing. Fatal to that provider
    /// only; other providers are unaffected.
    #[display("library source unavailable: {}", _0.display())]
    SourceUnavailable(#[error(not(source))] PathBuf),
    /// The hardware network identifier could not be obtained.
    #[display("hardware network identifier unavailable")]
    IdentityUnavailable,
    /// No candidate key decrypted the book. Needs new key material.
    #[display("no key could decrypt book: {_0}")]
    DecryptionFailed(#[error(not(source))] String),
    /// The destination of a decrypt or conversion already exists.
    #[display("output already exists: {}", _0.display())]
    OutputExists(#[error(not(source))] PathBuf),
    /// The document's container, package or spine could not be understood.
    #[display("malformed manifest: {_0}")]
    MalformedManifest(#[error(not(source))] String),
    /// The archive is unreadable or lacks a required entry.
    #[display("malformed archive: {_0}")]
    MalformedArchive(#[error(not(source))] String),
    /// Book index does not exist in the enumeration.
    #[display("no book at index {_0}")]
    BookNotFound(#[error(not(source))] usize),
    /// The device database could not be opened or queried.
    #[display("database error")]
    Database,
    /// A delegated decryption or unpacking service misbehaved.
    #[display("external service error")]
    ExternalService,
    /// Underlying I/O error
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
    ///
    /// Trying every candidate key is an enumeration, not a retry: a
    /// [`DecryptionFailed`](Self::DecryptionFailed) book stays failed until
    /// the key material changes.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exn::ResultExt;

    #[test]
    fn error_kind_display() {
        assert_eq!(
            ErrorKind::OutputExists(PathBuf::from("/out/Book.epub")).to_string(),
            "output already exists: /out/Book.epub"
        );
        assert_eq!(ErrorKind::BookNotFound(3).to_string(), "no book at index 3");
        assert_eq!(ErrorKind::DecryptionFailed("vol-1".into()).to_string(), "no key could decrypt book: vol-1");
    }

    #[test]
    fn error_kind_retryable() {
        assert!(!ErrorKind::DecryptionFailed("vol-1".into()).is_retryable());
        assert!(!ErrorKind::IdentityUnavailable.is_retryable());
        assert!(ErrorKind::Io(IoError::other("disk")).is_retryable());
    }

    #[test]
    fn error_from_result() {
        let result: std::result::Result<(), IoError> = Err(IoError::other("boom"));
        let err: Result<()> = result.or_raise(|| ErrorKind::Database);
        assert!(matches!(&*err.unwrap_err(), ErrorKind::Database));
    }
}
