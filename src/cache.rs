//! A cache used to skip unnecessary extraction runs.

use std::{
    collections::HashMap,
    fs, io,
    path::PathBuf,
    time::{Duration, SystemTime},
};
use url::Url;

/// How long a [`CacheEntry`] stays fresh before the next lookup triggers a
/// new extraction.
pub const CACHE_EXPIRY: Duration = Duration::from_millis(3_600_000);

/// A mapping from source page URLs to previously extracted frame URLs.
#[derive(Debug, Default, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Cache {
    entries: HashMap<Url, CacheEntry>,
}

impl Cache {
    /// Create a new, empty [`Cache`].
    pub fn new() -> Self { Cache::default() }

    /// Lookup a particular [`CacheEntry`].
    pub fn lookup(&self, url: &Url) -> Option<&CacheEntry> {
        self.entries.get(url)
    }

    /// Add a new [`CacheEntry`] to the cache, replacing any previous entry
    /// for the same source URL.
    pub fn insert(&mut self, url: Url, entry: CacheEntry) {
        self.entries.insert(url, entry);
    }

    /// The extracted URL for `url`, if an entry exists and is younger than
    /// `expiry`. Stale entries are ignored, not removed.
    pub fn fresh_url(&self, url: &Url, expiry: Duration) -> Option<&Url> {
        let entry = self.lookup(url)?;

        if let Ok(age) = entry.timestamp.elapsed() {
            if age < expiry {
                return Some(&entry.url);
            }
        }

        None
    }
}

/// A timestamped extraction result.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CacheEntry {
    /// When the extraction was done.
    #[serde(with = "epoch_ms")]
    pub timestamp: SystemTime,
    /// The embedded frame URL that was found.
    pub url: Url,
}

impl CacheEntry {
    /// Create a new [`CacheEntry`].
    pub const fn new(timestamp: SystemTime, url: Url) -> Self {
        CacheEntry { timestamp, url }
    }
}

/// Timestamps persist as integer milliseconds since the Unix epoch, the
/// format already used by existing cache files.
mod epoch_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    pub fn serialize<S: Serializer>(
        time: &SystemTime,
        ser: S,
    ) -> Result<S::Ok, S::Error> {
        let millis = time
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        ser.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        de: D,
    ) -> Result<SystemTime, D::Error> {
        let millis = u64::deserialize(de)?;
        Ok(UNIX_EPOCH + Duration::from_millis(millis))
    }
}

/// A [`Cache`] persisted wholesale to a single JSON file.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStore {
    path: PathBuf,
}

impl CacheStore {
    /// Create a [`CacheStore`] backed by the file at `path`. The file isn't
    /// touched until the first [`CacheStore::save()`].
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        CacheStore { path: path.into() }
    }

    /// Read the whole cache from disk. A missing or unreadable file falls
    /// back to an empty cache.
    pub fn load(&self) -> Cache {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Cache::new()
            },
            Err(e) => {
                log::warn!(
                    "Unable to read the cache file at \"{}\": {}",
                    self.path.display(),
                    e
                );
                return Cache::new();
            },
        };

        match serde_json::from_str(&raw) {
            Ok(cache) => cache,
            Err(e) => {
                log::warn!(
                    "Ignoring the malformed cache file at \"{}\": {}",
                    self.path.display(),
                    e
                );
                Cache::new()
            },
        }
    }

    /// Write the whole cache back to disk, replacing the previous contents.
    pub fn save(&self, cache: &Cache) -> io::Result<()> {
        let raw = serde_json::to_string_pretty(cache)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(&self.path, raw)
    }
}
