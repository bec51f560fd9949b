//! Dataset and session persistence.
//!
//! Both stores are small JSON documents replaced atomically: the new content
//! is written to a temporary file next to the target and renamed over it, so
//! an interrupted save never leaves a truncated dataset behind.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::StoreError;
use crate::models::Dataset;
use crate::scrapers::browser::BrowserCookie;

/// Where the merged dataset lives between runs.
pub trait DatasetStore: Send + Sync {
    /// Load the dataset, or `None` if none has been written yet.
    fn load(&self) -> Result<Option<Dataset>, StoreError>;
    fn save(&self, dataset: &Dataset) -> Result<(), StoreError>;
    fn location(&self) -> String;
}

/// Where session cookies live between runs.
pub trait SessionStore: Send + Sync {
    fn load(&self) -> Result<Vec<BrowserCookie>, StoreError>;
    fn save(&self, cookies: &[BrowserCookie]) -> Result<(), StoreError>;
}

/// Write `bytes` to `path` through a sibling temp file and rename.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent).map_err(|e| StoreError::io(&parent, e))?;

    let mut tmp = NamedTempFile::new_in(&parent).map_err(|e| StoreError::io(&parent, e))?;
    tmp.write_all(bytes).map_err(|e| StoreError::io(path, e))?;
    tmp.flush().map_err(|e| StoreError::io(path, e))?;
    tmp.persist(path).map_err(|e| StoreError::io(path, e.error))?;
    Ok(())
}

fn read_optional(path: &Path) -> Result<Option<String>, StoreError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

/// Dataset stored as a single JSON file.
#[derive(Debug, Clone)]
pub struct JsonDatasetStore {
    path: PathBuf,
    pretty: bool,
}

impl JsonDatasetStore {
    pub fn new(path: impl Into<PathBuf>, pretty: bool) -> Self {
        Self {
            path: path.into(),
            pretty,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DatasetStore for JsonDatasetStore {
    fn load(&self) -> Result<Option<Dataset>, StoreError> {
        let Some(content) = read_optional(&self.path)? else {
            return Ok(None);
        };
        let mut dataset: Dataset =
            serde_json::from_str(&content).map_err(|e| StoreError::json(&self.path, e))?;
        dataset.normalize_keys();
        debug!(
            "Loaded dataset from {:?}: {} listings, {} details, {} failures",
            self.path,
            dataset.listings.len(),
            dataset.details.len(),
            dataset.failed_details.len()
        );
        Ok(Some(dataset))
    }

    fn save(&self, dataset: &Dataset) -> Result<(), StoreError> {
        let bytes = if self.pretty {
            serde_json::to_vec_pretty(dataset)
        } else {
            serde_json::to_vec(dataset)
        }
        .map_err(|e| StoreError::json(&self.path, e))?;
        write_atomic(&self.path, &bytes)
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// Browser storage-state document. Only `cookies` is read; other keys the
/// browser writes (such as `origins`) are carried through unchanged.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StorageState {
    #[serde(default)]
    cookies: Vec<BrowserCookie>,
    #[serde(flatten)]
    rest: serde_json::Map<String, serde_json::Value>,
}

/// Session cookies kept in a browser storage-state file.
#[derive(Debug, Clone)]
pub struct StorageStateFile {
    path: PathBuf,
}

impl StorageStateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_state(&self) -> Result<StorageState, StoreError> {
        match read_optional(&self.path)? {
            Some(content) => serde_json::from_str(&content).map_err(|e| StoreError::json(&self.path, e)),
            None => Ok(StorageState::default()),
        }
    }
}

impl SessionStore for StorageStateFile {
    fn load(&self) -> Result<Vec<BrowserCookie>, StoreError> {
        Ok(self.read_state()?.cookies)
    }

    fn save(&self, cookies: &[BrowserCookie]) -> Result<(), StoreError> {
        // a corrupt previous file is simply replaced
        let mut state = self.read_state().unwrap_or_default();
        state.cookies = cookies.to_vec();
        let bytes = serde_json::to_vec_pretty(&state).map_err(|e| StoreError::json(&self.path, e))?;
        write_atomic(&self.path, &bytes)
    }
}

/// In-process dataset store.
#[derive(Debug, Default)]
pub struct MemoryDatasetStore {
    dataset: Mutex<Option<Dataset>>,
    saves: Mutex<usize>,
}

impl MemoryDatasetStore {
    pub fn new(dataset: Option<Dataset>) -> Self {
        Self {
            dataset: Mutex::new(dataset),
            saves: Mutex::new(0),
        }
    }

    pub fn snapshot(&self) -> Option<Dataset> {
        self.dataset.lock().ok().and_then(|d| d.clone())
    }

    pub fn save_count(&self) -> usize {
        self.saves.lock().map(|n| *n).unwrap_or(0)
    }
}

impl DatasetStore for MemoryDatasetStore {
    fn load(&self) -> Result<Option<Dataset>, StoreError> {
        Ok(self.snapshot())
    }

    fn save(&self, dataset: &Dataset) -> Result<(), StoreError> {
        if let Ok(mut slot) = self.dataset.lock() {
            *slot = Some(dataset.clone());
        }
        if let Ok(mut n) = self.saves.lock() {
            *n += 1;
        }
        Ok(())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}

/// In-process session store.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    cookies: Mutex<Vec<BrowserCookie>>,
}

impl MemorySessionStore {
    pub fn new(cookies: Vec<BrowserCookie>) -> Self {
        Self {
            cookies: Mutex::new(cookies),
        }
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Result<Vec<BrowserCookie>, StoreError> {
        Ok(self.cookies.lock().map(|c| c.clone()).unwrap_or_default())
    }

    fn save(&self, cookies: &[BrowserCookie]) -> Result<(), StoreError> {
        if let Ok(mut slot) = self.cookies.lock() {
            *slot = cookies.to_vec();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Listing;
    use tempfile::TempDir;

    #[test]
    fn missing_dataset_loads_as_none() {
        let dir = TempDir::new().unwrap();
        let store = JsonDatasetStore::new(dir.path().join("gpus.json"), false);
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn dataset_round_trips_through_file() {
        let dir = TempDir::new().unwrap();
        let store = JsonDatasetStore::new(dir.path().join("out").join("gpus.json"), true);
        let mut dataset = Dataset::empty(2024, 2025, vec!["AMD".into()], "year_{year}~mfgr_{manufacturer}");
        dataset
            .listings
            .push(Listing::new("AMD", 2024, "RX 7600", "https://www.techpowerup.com/gpu-specs/rx-7600.c4153"));
        dataset.count = 1;
        store.save(&dataset).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.listings, dataset.listings);
        assert_eq!(loaded.count, 1);
        let text = std::fs::read_to_string(store.path()).unwrap();
        assert!(!text.contains("failed_details"));
    }

    #[test]
    fn malformed_dataset_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gpus.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = JsonDatasetStore::new(&path, false);
        assert!(matches!(store.load(), Err(StoreError::Json { .. })));
    }

    #[test]
    fn storage_state_keeps_other_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(
            &path,
            r#"{"cookies":[{"name":"a","value":"1","domain":".techpowerup.com","path":"/","httpOnly":true,"secure":true,"sameSite":"Lax"}],"origins":[{"origin":"x"}]}"#,
        )
        .unwrap();
        let store = StorageStateFile::new(&path);
        let cookies = store.load().unwrap();
        assert_eq!(cookies.len(), 1);
        assert!(cookies[0].http_only);

        store
            .save(&[BrowserCookie::new("b", "2", ".techpowerup.com")])
            .unwrap();
        let raw: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["cookies"][0]["name"], "b");
        assert_eq!(raw["origins"][0]["origin"], "x");
    }
}
