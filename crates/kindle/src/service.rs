//! Delegated decryption and unpacking.
//!
//! Kindle books are decrypted and unpacked by external tools. Both are opaque
//! capabilities here: [`DrmService`] turns a book into intermediate files, and
//! [`UnpackService`] turns an intermediate file into an e-book.
//!
//! The command-line implementations run argv templates. Placeholders
//! `{input}`, `{output}` and `{key}` are substituted inside any argument; an
//! argument that is exactly `{keys}` expands to one argument per key file.

use crate::error::{ErrorKind, Result};
use exn::{OptionExt, ResultExt};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::instrument;

/// Outcome reported by the decryption service.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Success,
    Failure,
}
impl Status {
    /// `0` is success and `1` the service's failure code. Any other code
    /// is not a status at all; the service misbehaved.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Success),
            1 => Some(Self::Failure),
            _ => None,
        }
    }
}

pub trait DrmService {
    /// Produce the key file at `destination`.
    fn fetch_key(&self, destination: &Path) -> Result<()>;

    /// Decrypt `book` with `keys`, writing intermediate files into `output_dir`.
    fn decrypt(&self, book: &Path, keys: &[PathBuf], output_dir: &Path) -> Result<Status>;
}

pub trait UnpackService {
    /// Unpack `intermediate` into `output_dir`, which then contains an `.epub`.
    fn unpack(&self, intermediate: &Path, output_dir: &Path) -> Result<()>;
}

/// Values substituted into a [`CommandTemplate`].
#[derive(Debug, Default)]
struct Substitutions<'a> {
    input: Option<&'a Path>,
    output: Option<&'a Path>,
    keys: &'a [PathBuf],
}

/// A program and its argument templates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandTemplate {
    program: PathBuf,
    args: Vec<String>,
}
impl CommandTemplate {
    /// Resolve the first element of `argv` on `PATH` (or as a path).
    pub fn new(argv: &[String]) -> Result<Self> {
        let (program, args) = argv.split_first().ok_or_raise(|| ErrorKind::ProgramNotFound(String::new()))?;
        let program = which::which(program).or_raise(|| ErrorKind::ProgramNotFound(program.clone()))?;
        Ok(Self { program, args: args.to_vec() })
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn args(&self, with: &Substitutions<'_>) -> Vec<String> {
        let input = with.input.map(|p| p.display().to_string()).unwrap_or_default();
        let output = with.output.map(|p| p.display().to_string()).unwrap_or_default();
        let key = with.keys.first().map(|p| p.display().to_string()).unwrap_or_default();
        let mut args = Vec::with_capacity(self.args.len() + with.keys.len());
        for arg in &self.args {
            if arg == "{keys}" {
                args.extend(with.keys.iter().map(|p| p.display().to_string()));
                continue;
            }
            args.push(arg.replace("{input}", &input).replace("{output}", &output).replace("{key}", &key));
        }
        args
    }

    /// Run to completion and return the exit code (`None` when killed by a
    /// signal).
    #[instrument(skip_all, fields(program = %self.program.display()))]
    fn run(&self, with: &Substitutions<'_>) -> Result<Option<i32>> {
        let output = Command::new(&self.program)
            .args(self.args(with))
            .output()
            .or_raise(|| ErrorKind::ProgramNotFound(self.program.display().to_string()))?;
        tracing::debug!(
            status = %output.status,
            stdout = %String::from_utf8_lossy(&output.stdout).trim_end(),
            stderr = %String::from_utf8_lossy(&output.stderr).trim_end(),
            "Command finished"
        );
        Ok(output.status.code())
    }

    fn failed(&self, code: Option<i32>) -> ErrorKind {
        ErrorKind::ServiceFailed { program: self.program.display().to_string(), code }
    }
}

/// Decryption through external commands.
#[derive(Clone, Debug, Default)]
pub struct CommandDrm {
    key: Option<CommandTemplate>,
    decrypt: Option<CommandTemplate>,
}
impl CommandDrm {
    pub fn new(key: Option<CommandTemplate>, decrypt: Option<CommandTemplate>) -> Self {
        Self { key, decrypt }
    }
}
impl DrmService for CommandDrm {
    fn fetch_key(&self, destination: &Path) -> Result<()> {
        let command = self.key.as_ref().ok_or_raise(|| ErrorKind::ServiceNotConfigured("key"))?;
        let keys = [destination.to_path_buf()];
        let with = Substitutions { output: Some(destination), keys: &keys, ..Default::default() };
        match command.run(&with)? {
            Some(0) => Ok(()),
            code => exn::bail!(command.failed(code)),
        }
    }

    fn decrypt(&self, book: &Path, keys: &[PathBuf], output_dir: &Path) -> Result<Status> {
        let command = self.decrypt.as_ref().ok_or_raise(|| ErrorKind::ServiceNotConfigured("decrypt"))?;
        let with = Substitutions { input: Some(book), output: Some(output_dir), keys };
        let code = command.run(&with)?;
        match code.and_then(Status::from_code) {
            Some(status) => Ok(status),
            None => exn::bail!(command.failed(code)),
        }
    }
}

/// Unpacking through an external command.
#[derive(Clone, Debug, Default)]
pub struct CommandUnpack {
    unpack: Option<CommandTemplate>,
}
impl CommandUnpack {
    pub fn new(unpack: Option<CommandTemplate>) -> Self {
        Self { unpack }
    }
}
impl UnpackService for CommandUnpack {
    fn unpack(&self, intermediate: &Path, output_dir: &Path) -> Result<()> {
        let command = self.unpack.as_ref().ok_or_raise(|| ErrorKind::ServiceNotConfigured("unpack"))?;
        let with = Substitutions { input: Some(intermediate), output: Some(output_dir), ..Default::default() };
        match command.run(&with)? {
            Some(0) => Ok(()),
            code => exn::bail!(command.failed(code)),
        }
    }
}
