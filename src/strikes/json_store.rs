//! JSON-file backed strike store.
//!
//! The whole document lives in memory. Every mutation rewrites the file by
//! writing a temp file in the same directory and renaming it over the target,
//! so a crash leaves either the old or the new document on disk.

use super::models::*;
use super::StrikeStore;
use crate::queue::StrikeKey;
use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

/// On-disk value: either a full record or a bare legacy counter.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredEntry {
    Record(StrikeRecord),
    Count(u32),
}

struct StoreState {
    records: BTreeMap<StrikeKey, StrikeRecord>,
    /// Set when the last write failed; the next write or flush retries.
    dirty: bool,
}

pub struct JsonFileStrikeStore {
    path: PathBuf,
    state: Mutex<StoreState>,
}

impl JsonFileStrikeStore {
    /// Open the store at `path`. A missing or unreadable document starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = match Self::load(&path) {
            Ok(records) => {
                info!("Loaded {} strike records from {:?}", records.len(), path);
                records
            }
            Err(PersistenceError::Read { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                info!("No strike file at {:?}, starting empty", path);
                BTreeMap::new()
            }
            Err(e) => {
                warn!("{}; starting with an empty strike list", e);
                BTreeMap::new()
            }
        };
        Self {
            path,
            state: Mutex::new(StoreState {
                records,
                dirty: false,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> Result<BTreeMap<StrikeKey, StrikeRecord>, PersistenceError> {
        let content = std::fs::read_to_string(path).map_err(|source| PersistenceError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: BTreeMap<String, StoredEntry> =
            serde_json::from_str(&content).map_err(|source| PersistenceError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let now = chrono::Utc::now();
        let mut records = BTreeMap::new();
        for (key, entry) in raw {
            let Some(key) = StrikeKey::parse(&key) else {
                warn!("Skipping malformed strike key {:?}", key);
                continue;
            };
            let record = match entry {
                StoredEntry::Record(r) => r,
                StoredEntry::Count(count) => StrikeRecord {
                    count,
                    ..StrikeRecord::new(now)
                },
            };
            records.insert(key, record);
        }
        Ok(records)
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("strike store lock poisoned"))
    }

    fn write_document(
        path: &Path,
        records: &BTreeMap<StrikeKey, StrikeRecord>,
    ) -> Result<(), PersistenceError> {
        let write_err = |reason: String| PersistenceError::Write {
            path: path.to_path_buf(),
            reason,
        };

        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|e| write_err(e.to_string()))?;

        let body = serde_json::to_vec_pretty(records).map_err(|e| write_err(e.to_string()))?;
        let mut tmp =
            tempfile::NamedTempFile::new_in(&dir).map_err(|e| write_err(e.to_string()))?;
        tmp.write_all(&body).map_err(|e| write_err(e.to_string()))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| write_err(e.to_string()))?;
        tmp.persist(path).map_err(|e| write_err(e.error.to_string()))?;
        Ok(())
    }

    /// Write the current document. Failures are logged and leave the state
    /// dirty so the next mutation retries.
    fn persist(&self, state: &mut StoreState) {
        match Self::write_document(&self.path, &state.records) {
            Ok(()) => {
                if state.dirty {
                    info!("Strike file {:?} written after earlier failure", self.path);
                }
                state.dirty = false;
            }
            Err(e) => {
                error!("{}", e);
                state.dirty = true;
            }
        }
    }
}

impl StrikeStore for JsonFileStrikeStore {
    fn get(&self, key: &StrikeKey) -> Result<Option<StrikeRecord>> {
        Ok(self.lock()?.records.get(key).cloned())
    }

    fn apply(
        &self,
        key: &StrikeKey,
        delta: StrikeDelta,
        snapshot: &ProgressSnapshot,
    ) -> Result<StrikeRecord> {
        let mut state = self.lock()?;
        let record = state
            .records
            .entry(key.clone())
            .or_insert_with(|| StrikeRecord::new(snapshot.observed_at));
        record.count = delta.apply_to(record.count);
        snapshot.merge_into(record);
        let updated = record.clone();

        self.persist(&mut state);
        Ok(updated)
    }

    fn remove(&self, key: &StrikeKey) -> Result<bool> {
        let mut state = self.lock()?;
        let existed = state.records.remove(key).is_some();
        if existed {
            self.persist(&mut state);
        }
        Ok(existed)
    }

    fn list(&self) -> Result<Vec<(StrikeKey, StrikeRecord)>> {
        Ok(self
            .lock()?
            .records
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn clear(&self) -> Result<usize> {
        let mut state = self.lock()?;
        let removed = state.records.len();
        state.records.clear();
        self.persist(&mut state);
        Ok(removed)
    }

    fn sweep(&self, service: &str, seen: &HashSet<StrikeKey>) -> Result<Vec<StrikeKey>> {
        let mut state = self.lock()?;
        let mut changed = false;
        let mut stale = Vec::new();

        for (key, record) in state.records.iter_mut() {
            if key.service() != service || seen.contains(key) {
                continue;
            }
            record.missed_polls += 1;
            changed = true;
            if record.missed_polls >= STALE_AFTER_MISSED_POLLS {
                stale.push(key.clone());
            }
        }
        for key in &stale {
            debug!("Pruning stale strike record {}", key);
            state.records.remove(key);
        }

        if changed {
            self.persist(&mut state);
        }
        Ok(stale)
    }

    fn flush(&self) -> Result<()> {
        let mut state = self.lock()?;
        if !state.dirty {
            return Ok(());
        }
        Self::write_document(&self.path, &state.records)?;
        state.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    fn snapshot(size_left: u64, progressed: bool) -> ProgressSnapshot {
        ProgressSnapshot {
            observed_at: Utc::now(),
            size_left,
            progressed,
            tracker_error_count: 0,
            zero_seeders_since: None,
            reason: None,
        }
    }

    fn create_store() -> (JsonFileStrikeStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStrikeStore::open(dir.path().join("strikes.json"));
        (store, dir)
    }

    #[test]
    fn test_missing_file_starts_empty() {
        let (store, _dir) = create_store();
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("strikes.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = JsonFileStrikeStore::open(&path);
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_apply_creates_and_increments() {
        let (store, _dir) = create_store();
        let key = StrikeKey::new("sonarr", 1);

        let r = store.apply(&key, StrikeDelta::Add(1), &snapshot(100, false)).unwrap();
        assert_eq!(r.count, 1);
        assert_eq!(r.last_size_left, Some(100));

        let r = store.apply(&key, StrikeDelta::Add(1), &snapshot(100, false)).unwrap();
        assert_eq!(r.count, 2);
        assert_eq!(store.get(&key).unwrap().unwrap().count, 2);
    }

    #[test]
    fn test_apply_subtract_clamps() {
        let (store, _dir) = create_store();
        let key = StrikeKey::new("sonarr", 1);
        store.apply(&key, StrikeDelta::Add(1), &snapshot(100, false)).unwrap();

        let r = store
            .apply(&key, StrikeDelta::Subtract(3), &snapshot(50, true))
            .unwrap();
        assert_eq!(r.count, 0);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data").join("strikes.json");
        let key = StrikeKey::new("radarr", 42);
        let first_seen;
        {
            let store = JsonFileStrikeStore::open(&path);
            let r = store.apply(&key, StrikeDelta::Add(2), &snapshot(10, false)).unwrap();
            first_seen = r.first_seen;
        }

        let store = JsonFileStrikeStore::open(&path);
        let record = store.get(&key).unwrap().unwrap();
        assert_eq!(record.count, 2);
        assert_eq!(record.first_seen, first_seen);
        assert_eq!(record.last_size_left, Some(10));
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("strikes.json");
        let store = JsonFileStrikeStore::open(&path);
        store
            .apply(&StrikeKey::new("sonarr", 1), StrikeDelta::Add(1), &snapshot(1, false))
            .unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_loads_legacy_integer_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("strikes.json");
        std::fs::write(&path, r#"{"sonarr:5": 2, "bogus": 1}"#).unwrap();

        let store = JsonFileStrikeStore::open(&path);
        let records = store.list().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].0, StrikeKey::new("sonarr", 5));
        assert_eq!(records[0].1.count, 2);
        assert_eq!(records[0].1.last_size_left, None);
    }

    #[test]
    fn test_remove_and_clear() {
        let (store, _dir) = create_store();
        let a = StrikeKey::new("sonarr", 1);
        let b = StrikeKey::new("sonarr", 2);
        store.apply(&a, StrikeDelta::Add(1), &snapshot(1, false)).unwrap();
        store.apply(&b, StrikeDelta::Add(1), &snapshot(1, false)).unwrap();

        assert!(store.remove(&a).unwrap());
        assert!(!store.remove(&a).unwrap());
        assert_eq!(store.clear().unwrap(), 1);
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_sweep_needs_two_missed_polls() {
        let (store, _dir) = create_store();
        let gone = StrikeKey::new("sonarr", 1);
        let kept = StrikeKey::new("sonarr", 2);
        let other = StrikeKey::new("radarr", 1);
        for key in [&gone, &kept, &other] {
            store.apply(key, StrikeDelta::Add(1), &snapshot(1, false)).unwrap();
        }
        let seen: HashSet<StrikeKey> = [kept.clone()].into_iter().collect();

        assert!(store.sweep("sonarr", &seen).unwrap().is_empty());
        assert!(store.get(&gone).unwrap().is_some());

        assert_eq!(store.sweep("sonarr", &seen).unwrap(), vec![gone.clone()]);
        assert!(store.get(&gone).unwrap().is_none());
        assert!(store.get(&kept).unwrap().is_some());
        assert!(store.get(&other).unwrap().is_some());
    }

    #[test]
    fn test_sweep_counter_resets_when_item_reappears() {
        let (store, _dir) = create_store();
        let key = StrikeKey::new("sonarr", 1);
        store.apply(&key, StrikeDelta::Add(1), &snapshot(1, false)).unwrap();

        store.sweep("sonarr", &HashSet::new()).unwrap();
        store.apply(&key, StrikeDelta::Unchanged, &snapshot(1, false)).unwrap();
        store.sweep("sonarr", &HashSet::new()).unwrap();

        assert_eq!(store.get(&key).unwrap().unwrap().missed_polls, 1);
    }

    #[test]
    fn test_first_seen_kept_on_update() {
        let (store, _dir) = create_store();
        let key = StrikeKey::new("lidarr", 3);
        let mut early = snapshot(10, false);
        early.observed_at = Utc::now() - Duration::hours(2);
        let r1 = store.apply(&key, StrikeDelta::Unchanged, &early).unwrap();
        let r2 = store.apply(&key, StrikeDelta::Add(1), &snapshot(10, false)).unwrap();
        assert_eq!(r1.first_seen, r2.first_seen);
    }
}
