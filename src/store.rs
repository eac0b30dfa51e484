//! Revision store: an immutable snapshot of every migration record in a
//! versions directory.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{RebaseError, Result};
use crate::scan::{ScanError, scan_artifact};

/// One migration artifact, reduced to its identity and linkage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionRecord {
    pub id: String,
    /// `None` marks a root.
    pub predecessor: Option<String>,
    /// Path of the artifact holding this record.
    pub location: PathBuf,
    /// Full original text of the artifact.
    pub payload: String,
}

impl RevisionRecord {
    /// Scan `payload` and build the record it declares.
    pub fn from_payload(location: impl Into<PathBuf>, payload: impl Into<String>) -> Result<Self> {
        let location = location.into();
        let payload = payload.into();
        let scan = scan_artifact(&payload).map_err(|source| RebaseError::MalformedRecord {
            location: location.clone(),
            source,
        })?;

        Ok(Self {
            id: scan.revision,
            predecessor: scan.down_revision,
            location,
            payload,
        })
    }

    pub fn is_root(&self) -> bool {
        self.predecessor.is_none()
    }
}

/// All revision records of one run, keyed by revision id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevisionStore {
    records: BTreeMap<String, RevisionRecord>,
}

impl RevisionStore {
    /// Load every `*.py` artifact directly inside `dir`.
    ///
    /// `__init__.py`, other files and subdirectories are skipped. Files are
    /// read in name order so that duplicate-id diagnostics are stable.
    pub fn load(dir: &Path) -> Result<Self> {
        let entries = fs::read_dir(dir).map_err(|e| RebaseError::io(dir, e))?;

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| RebaseError::io(dir, e))?;
            let path = entry.path();
            if is_artifact(&path) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut records = Vec::with_capacity(paths.len());
        for path in paths {
            let payload = fs::read_to_string(&path).map_err(|e| RebaseError::io(&path, e))?;
            let record = RevisionRecord::from_payload(path, payload)?;
            tracing::debug!(
                revision = %record.id,
                predecessor = record.predecessor.as_deref().unwrap_or("None"),
                file = %record.location.display(),
                "loaded revision"
            );
            records.push(record);
        }

        let store = Self::from_records(records)?;
        tracing::info!(count = store.len(), dir = %dir.display(), "loaded revision store");
        Ok(store)
    }

    /// Build a store from already-scanned records.
    pub fn from_records(records: impl IntoIterator<Item = RevisionRecord>) -> Result<Self> {
        let mut map: BTreeMap<String, RevisionRecord> = BTreeMap::new();
        for record in records {
            if let Some(existing) = map.get(&record.id) {
                return Err(RebaseError::MalformedRecord {
                    location: record.location.clone(),
                    source: ScanError::DuplicateId {
                        revision: record.id.clone(),
                        first: existing.location.display().to_string(),
                    },
                });
            }
            map.insert(record.id.clone(), record);
        }
        Ok(Self { records: map })
    }

    pub fn get(&self, id: &str) -> Option<&RevisionRecord> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in revision-id order.
    pub fn records(&self) -> impl Iterator<Item = &RevisionRecord> {
        self.records.values()
    }

    /// Revisions that no other record names as its predecessor, in id order.
    pub fn heads(&self) -> Vec<&str> {
        let referenced: HashSet<&str> = self
            .records
            .values()
            .filter_map(|r| r.predecessor.as_deref())
            .collect();

        self.records
            .keys()
            .map(String::as_str)
            .filter(|id| !referenced.contains(id))
            .collect()
    }

    /// A copy of this snapshot with the artifact of `id` replaced by `payload`.
    ///
    /// The new payload is scanned like any loaded artifact, so the projected
    /// store reflects exactly what a fresh load would see after the write.
    pub fn with_payload(&self, id: &str, payload: impl Into<String>) -> Result<Self> {
        let current = self
            .get(id)
            .ok_or_else(|| RebaseError::UnknownRevision(id.to_string()))?;
        let replacement = RevisionRecord::from_payload(current.location.clone(), payload)?;

        let mut records = self.records.clone();
        records.remove(id);
        if let Some(existing) = records.get(&replacement.id) {
            return Err(RebaseError::MalformedRecord {
                location: replacement.location.clone(),
                source: ScanError::DuplicateId {
                    revision: replacement.id.clone(),
                    first: existing.location.display().to_string(),
                },
            });
        }
        records.insert(replacement.id.clone(), replacement);

        Ok(Self { records })
    }
}

fn is_artifact(path: &Path) -> bool {
    path.is_file()
        && path.extension().is_some_and(|ext| ext == "py")
        && path.file_name().is_some_and(|name| name != "__init__.py")
}
