//! The tracked source URL and its on-disk home.

use std::{fs, io, path::PathBuf};
use url::Url;

/// The only accepted shape for a tracked URL.
pub const TRACKED_URL_PREFIX: &str = "https://yandex.ru/video/preview/";

/// The persisted service configuration.
///
/// An empty [`Config::default_video_url`] means no URL is being tracked.
#[derive(Debug, Default, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Config {
    /// The source page currently being tracked.
    #[serde(default, rename = "defaultVideoUrl")]
    pub default_video_url: String,
}

/// The reason a tracked URL couldn't be updated.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The new URL doesn't start with [`TRACKED_URL_PREFIX`].
    #[error("the tracked URL must start with \"https://yandex.ru/video/preview/\"")]
    InvalidPrefix,
    /// The new URL isn't a URL at all.
    #[error("the tracked URL is malformed")]
    Malformed(#[from] url::ParseError),
    /// The config file couldn't be written.
    #[error("unable to persist the config file")]
    Io(#[from] io::Error),
}

/// A [`Config`] persisted wholesale to a single JSON file, re-read on every
/// access so external edits are picked up without a restart.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    /// Create a [`ConfigStore`] backed by the file at `path`.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        ConfigStore { path: path.into() }
    }

    /// Read the whole config from disk. A missing or unreadable file falls
    /// back to the empty default.
    pub fn read(&self) -> Config {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Config::default()
            },
            Err(e) => {
                log::warn!(
                    "Unable to read the config file at \"{}\": {}",
                    self.path.display(),
                    e
                );
                return Config::default();
            },
        };

        match serde_json::from_str(&raw) {
            Ok(config) => config,
            Err(e) => {
                log::warn!(
                    "Ignoring the malformed config file at \"{}\": {}",
                    self.path.display(),
                    e
                );
                Config::default()
            },
        }
    }

    /// The tracked source URL, or `None` when nothing is configured.
    pub fn tracked_url(&self) -> Option<Url> {
        let config = self.read();

        if config.default_video_url.is_empty() {
            return None;
        }

        match Url::parse(&config.default_video_url) {
            Ok(url) => Some(url),
            Err(e) => {
                log::warn!(
                    "The stored tracked URL \"{}\" is malformed: {}",
                    config.default_video_url,
                    e
                );
                None
            },
        }
    }

    /// Validate `new_url` and persist it as the tracked URL.
    ///
    /// Anything that doesn't start with [`TRACKED_URL_PREFIX`] is rejected
    /// before the config file is touched.
    pub fn set_tracked_url(&self, new_url: &str) -> Result<Url, ConfigError> {
        if !new_url.starts_with(TRACKED_URL_PREFIX) {
            return Err(ConfigError::InvalidPrefix);
        }

        let url = Url::parse(new_url)?;

        let mut config = self.read();
        config.default_video_url = new_url.to_string();
        self.write(&config)?;

        Ok(url)
    }

    fn write(&self, config: &Config) -> io::Result<()> {
        let raw = serde_json::to_string_pretty(config)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(&self.path, raw)
    }
}
