//! No-clobber output files.
//!
//! Decrypted books are first written to a staging file next to their final
//! location and only moved into place once complete. The move refuses to
//! replace an existing file, so a failed or colliding decrypt never leaves a
//! partial file behind and never touches somebody else's.

use crate::error::{ErrorKind, Result};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::{Builder, NamedTempFile};
use tracing::instrument;

const STAGING_PREFIX: &str = ".unbind-";
const STAGING_SUFFIX: &str = ".part";

/// Final location of an output file: `{folder}/{stem}.{extension}`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Destination {
    folder: PathBuf,
    path: PathBuf,
}
impl Destination {
    pub fn new(folder: impl AsRef<Path>, stem: &str, extension: &str) -> Self {
        let folder = folder.as_ref().to_path_buf();
        let path = folder.join(format!("{stem}.{extension}"));
        Self { folder, path }
    }

    /// Destination for a full output path. A bare file name lands in the
    /// current directory.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let folder = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Self { folder, path }
    }

    /// Same as [`new()`](Self::new), but fails with
    /// [`OutputExists`](ErrorKind::OutputExists) if the file is already there.
    /// Creates the output folder when it doesn't exist yet.
    pub fn vacant(folder: impl AsRef<Path>, stem: &str, extension: &str) -> Result<Self> {
        let destination = Self::new(folder, stem, extension);
        if destination.path.exists() {
            exn::bail!(ErrorKind::OutputExists(destination.path));
        }
        fs::create_dir_all(&destination.folder).map_err(ErrorKind::Io)?;
        Ok(destination)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Create an empty staging file in the destination folder. The file is
    /// removed when dropped, unless [committed](Self::commit).
    pub fn staging(&self) -> Result<NamedTempFile> {
        Ok(Builder::new()
            .prefix(STAGING_PREFIX)
            .suffix(STAGING_SUFFIX)
            .tempfile_in(&self.folder)
            .map_err(ErrorKind::Io)?)
    }

    /// Move a finished staging file into place, without ever replacing an
    /// existing file.
    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub fn commit(&self, mut staged: NamedTempFile) -> Result<PathBuf> {
        staged.flush().map_err(ErrorKind::Io)?;
        match staged.persist_noclobber(&self.path) {
            Ok(_) => {
                tracing::debug!("Output committed");
                Ok(self.path.clone())
            },
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                exn::bail!(ErrorKind::OutputExists(self.path.clone()))
            },
            Err(e) => Err(ErrorKind::Io(e.error).into()),
        }
    }

    /// Byte-for-byte copy of `source` to this destination.
    pub fn copy_from(&self, source: &Path) -> Result<PathBuf> {
        let mut input = File::open(source).map_err(ErrorKind::Io)?;
        let mut staged = self.staging()?;
        io::copy(&mut input, &mut staged).map_err(ErrorKind::Io)?;
        self.commit(staged)
    }
}
