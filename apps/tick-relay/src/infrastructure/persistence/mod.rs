//! Average Persistence
//!
//! JSON file implementation of the [`AverageStore`] port.
//!
//! # File Format
//!
//! ```json
//! {
//!   "BINANCE:ETHBTC": 0.0521,
//!   "BINANCE:ETHUSDT": 2012.47
//! }
//! ```
//!
//! Writes go to a sibling `.tmp` file which is fsynced and renamed over the
//! target, so a reader sees either the previous file or the new one.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::application::ports::{AverageStore, PersistenceError};
use crate::domain::streaming::AverageMapping;

/// Averages stored as one pretty-printed JSON object.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Create a store for the file at `path`. Nothing is touched on disk
    /// until the first `load` or `save`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the averages file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn ensure_parent(&self) -> Result<(), PersistenceError> {
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => {
                fs::create_dir_all(dir).map_err(|source| io_error(dir, source))
            }
            _ => Ok(()),
        }
    }

    fn parse(&self, raw: &str) -> AverageMapping {
        let value: serde_json::Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Averages file is corrupt, starting empty");
                return AverageMapping::new();
            }
        };

        let serde_json::Value::Object(entries) = value else {
            tracing::warn!(path = %self.path.display(), "Averages file is not a JSON object, starting empty");
            return AverageMapping::new();
        };

        entries
            .into_iter()
            .filter_map(|(symbol, value)| match value.as_f64() {
                Some(average) if average.is_finite() => Some((symbol, average)),
                _ => {
                    tracing::warn!(symbol = %symbol, value = %value, "Skipping non-numeric average");
                    None
                }
            })
            .collect()
    }
}

impl AverageStore for JsonFileStore {
    fn load(&self) -> AverageMapping {
        if let Err(e) = self.ensure_parent() {
            tracing::warn!(error = %e, "Could not create data directory");
            return AverageMapping::new();
        }

        match fs::read_to_string(&self.path) {
            Ok(raw) => {
                let averages = self.parse(&raw);
                tracing::info!(
                    path = %self.path.display(),
                    symbols = averages.len(),
                    "Loaded persisted averages"
                );
                averages
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "No persisted averages, starting empty");
                AverageMapping::new()
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Could not read averages file, starting empty");
                AverageMapping::new()
            }
        }
    }

    fn save(&self, averages: &AverageMapping) -> Result<(), PersistenceError> {
        self.ensure_parent()?;

        let data = serde_json::to_vec_pretty(averages)?;
        let tmp_path = self.tmp_path();

        {
            let mut file = File::create(&tmp_path).map_err(|source| io_error(&tmp_path, source))?;
            file.write_all(&data)
                .map_err(|source| io_error(&tmp_path, source))?;
            file.sync_all()
                .map_err(|source| io_error(&tmp_path, source))?;
        }
        fs::rename(&tmp_path, &self.path).map_err(|source| io_error(&self.path, source))?;

        tracing::debug!(path = %self.path.display(), symbols = averages.len(), "Saved averages");
        Ok(())
    }
}

fn io_error(path: &Path, source: io::Error) -> PersistenceError {
    PersistenceError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn mapping(pairs: &[(&str, f64)]) -> AverageMapping {
        pairs.iter().map(|(s, v)| ((*s).to_string(), *v)).collect()
    }

    #[test]
    fn missing_directory_is_created_and_load_is_empty() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("nested").join("data");
        let store = JsonFileStore::new(dir.join("hourly-averages.json"));

        assert!(store.load().is_empty());
        assert!(dir.is_dir());
    }

    #[test]
    fn save_then_load_round_trips() {
        let tmp = TempDir::new().unwrap();
        let store = JsonFileStore::new(tmp.path().join("hourly-averages.json"));
        let averages = mapping(&[("A", 150.0), ("B", 0.0521)]);

        store.save(&averages).unwrap();
        assert_eq!(store.load(), averages);
        assert!(!store.tmp_path().exists());
    }

    #[test]
    fn save_overwrites_previous_file() {
        let tmp = TempDir::new().unwrap();
        let store = JsonFileStore::new(tmp.path().join("hourly-averages.json"));

        store.save(&mapping(&[("A", 1.0)])).unwrap();
        store.save(&mapping(&[("A", 2.0)])).unwrap();
        assert_eq!(store.load(), mapping(&[("A", 2.0)]));
    }

    #[test]
    fn file_is_pretty_json_object() {
        let tmp = TempDir::new().unwrap();
        let store = JsonFileStore::new(tmp.path().join("hourly-averages.json"));
        store.save(&mapping(&[("SYM", 150.0)])).unwrap();

        let raw = fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains('\n'));
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["SYM"], 150.0);
    }

    #[test]
    fn corrupt_file_yields_empty_mapping() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("hourly-averages.json");
        fs::write(&path, "{not json").unwrap();

        assert!(JsonFileStore::new(path).load().is_empty());
    }

    #[test]
    fn non_object_file_yields_empty_mapping() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("hourly-averages.json");
        fs::write(&path, "[1, 2, 3]").unwrap();

        assert!(JsonFileStore::new(path).load().is_empty());
    }

    #[test]
    fn non_numeric_entries_are_skipped() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("hourly-averages.json");
        fs::write(&path, r#"{"A": 10.5, "B": "oops", "C": null}"#).unwrap();

        assert_eq!(JsonFileStore::new(path).load(), mapping(&[("A", 10.5)]));
    }

    #[test]
    fn save_into_unwritable_location_errors() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("blocker");
        fs::write(&blocker, "file, not a directory").unwrap();
        let store = JsonFileStore::new(blocker.join("hourly-averages.json"));

        let err = store.save(&mapping(&[("A", 1.0)])).unwrap_err();
        assert!(matches!(err, PersistenceError::Io { .. }));
    }
}
