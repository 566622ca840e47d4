//! Configuration loading for unbind.
//!
//! Settings are layered with [`figment`]: built-in defaults, then the TOML
//! configuration file, then environment variables prefixed with `UNBIND_`
//! (nested keys separated by a double underscore, e.g. `UNBIND_KOBO__DIR`).
//!
//! ```toml
//! output = "/home/me/Books"
//!
//! [kobo]
//! dir = "/home/me/.local/share/Kobo/Kobo Desktop Edition"
//! # hardware_address = "AA:BB:CC:DD:EE:FF"
//!
//! [kindle]
//! dir = "/home/me/Documents/My Kindle Content"
//! decrypt_command = ["python3", "k4mobidedrm.py", "-k", "{keys}", "{input}", "{output}"]
//! unpack_command = ["python3", "kindleunpack.py", "{input}", "{output}"]
//! ```
//!
//! A missing configuration file is not an error: every source is optional,
//! and an unconfigured source is simply left out of the library.

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::instrument;

const CONFIG_FILE: &str = "config.toml";
const ENV_PREFIX: &str = "UNBIND_";
const ENV_SEPARATOR: &str = "__";
const KINDLE_KEY_FILE: &str = "kindlekey.k4i";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Default output folder for decrypted books.
    pub output: Option<PathBuf>,
    pub kobo: KoboSettings,
    pub kindle: KindleSettings,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KoboSettings {
    /// Kobo desktop data directory, containing `Kobo.sqlite` and `kepub/`.
    pub dir: Option<PathBuf>,
    /// Hardware network address to derive keys from instead of this
    /// machine's own (for libraries copied from another computer).
    pub hardware_address: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KindleSettings {
    pub dir: Option<PathBuf>,
    /// Key material for the decryption service. Created by `key_command`
    /// when missing.
    pub key_file: Option<PathBuf>,
    /// Book file extensions, without the leading dot.
    pub extensions: Vec<String>,
    pub key_command: Option<Vec<String>>,
    pub decrypt_command: Option<Vec<String>>,
    pub unpack_command: Option<Vec<String>>,
}
impl Default for KindleSettings {
    fn default() -> Self {
        Self {
            dir: None,
            key_file: None,
            extensions: vec!["azw".to_string()],
            key_command: None,
            decrypt_command: None,
            unpack_command: None,
        }
    }
}

impl Settings {
    /// Load settings from the default configuration file (if there is one)
    /// and the environment.
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) => Self::load_from(path),
            None => {
                tracing::debug!("No configuration directory on this system; using defaults and environment only");
                Self::figment(None).extract().map_err(|e| ErrorKind::Invalid(e.to_string()).into())
            },
        }
    }

    /// Load settings from a specific configuration file and the environment.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            File::open(path).or_raise(|| ErrorKind::Load(path.to_path_buf()))?;
        } else {
            tracing::debug!("Configuration file not found; using defaults and environment only");
        }
        Self::figment(Some(path)).extract().map_err(|e| ErrorKind::Invalid(e.to_string()).into())
    }

    /// `config.toml` inside the platform's configuration directory.
    pub fn default_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    /// The configured output folder, or the parent of the current working
    /// directory when none is configured.
    pub fn output_folder(&self) -> PathBuf {
        if let Some(output) = &self.output {
            return output.clone();
        }
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        cwd.parent().map(Path::to_path_buf).unwrap_or(cwd)
    }

    fn figment(path: Option<&Path>) -> Figment {
        let figment = Figment::from(Serialized::defaults(Settings::default()));
        let figment = match path {
            Some(path) => figment.merge(Toml::file(path)),
            None => figment,
        };
        figment.merge(Env::prefixed(ENV_PREFIX).split(ENV_SEPARATOR))
    }

    fn project_dirs() -> Option<ProjectDirs> {
        ProjectDirs::from("", "", "unbind")
    }
}

impl KindleSettings {
    /// The configured key file, or `kindlekey.k4i` in the configuration
    /// directory.
    pub fn key_file(&self) -> PathBuf {
        if let Some(key_file) = &self.key_file {
            return key_file.clone();
        }
        Settings::project_dirs()
            .map(|dirs| dirs.config_dir().join(KINDLE_KEY_FILE))
            .unwrap_or_else(|| PathBuf::from(KINDLE_KEY_FILE))
    }
}
