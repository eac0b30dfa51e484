//! Record rewriting.
//!
//! Only the value token of the `down_revision` declaration changes. The
//! `revision` declaration, whitespace, comments and migration code stay
//! byte-identical.
//!
//! # Atomic Writes
//!
//! The rewritten artifact is written with a write-to-temp-then-rename
//! pattern:
//! 1. Write to `<artifact>.rebase.tmp` in the same directory
//! 2. fsync the temp file
//! 3. Rename over the artifact
//! 4. fsync the directory
//!
//! Readers therefore observe either the original or the fully rewritten
//! artifact, never a partial write.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::{RebaseError, Result};
use crate::scan::scan_artifact;
use crate::store::RevisionRecord;

/// A planned rewrite of one artifact, computed entirely in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewrite {
    pub revision: String,
    pub location: PathBuf,
    pub previous: Option<String>,
    pub predecessor: String,
    /// Payload the plan was computed from.
    pub original: String,
    pub updated: String,
}

impl Rewrite {
    /// Compute the rewrite of `record` so that it points at `new_predecessor`.
    pub fn prepare(record: &RevisionRecord, new_predecessor: &str) -> Result<Self> {
        let updated = rewrite(record, new_predecessor)?;

        Ok(Self {
            revision: record.id.clone(),
            location: record.location.clone(),
            previous: record.predecessor.clone(),
            predecessor: new_predecessor.to_string(),
            original: record.payload.clone(),
            updated,
        })
    }

    /// The `down_revision` line before and after the rewrite.
    pub fn changed_line(&self) -> (String, String) {
        let before = self.original.lines().zip(self.updated.lines()).find(|(a, b)| a != b);
        match before {
            Some((a, b)) => (a.to_string(), b.to_string()),
            None => (String::new(), String::new()),
        }
    }

    /// Atomically replace the artifact on disk.
    ///
    /// Refuses to write if the file no longer holds the payload the plan was
    /// computed from.
    pub fn commit(&self) -> Result<()> {
        let on_disk = fs::read_to_string(&self.location)
            .map_err(|e| RebaseError::io(&self.location, e))?;
        if on_disk != self.original {
            return Err(RebaseError::ArtifactChanged {
                location: self.location.clone(),
            });
        }

        write_atomic(&self.location, &self.updated).map_err(|e| RebaseError::io(&self.location, e))?;
        tracing::info!(
            revision = %self.revision,
            from = self.previous.as_deref().unwrap_or("None"),
            to = %self.predecessor,
            file = %self.location.display(),
            "rewrote down_revision"
        );
        Ok(())
    }
}

/// Return `record`'s payload with its `down_revision` value replaced.
///
/// The declaration is re-located with the same scanner the store used; if
/// it cannot be found (or now declares another revision) the payload has
/// drifted from the record and nothing is rewritten.
pub fn rewrite(record: &RevisionRecord, new_predecessor: &str) -> Result<String> {
    let not_found = || RebaseError::RewriteTargetNotFound {
        revision: record.id.clone(),
        location: record.location.clone(),
    };

    let scan = scan_artifact(&record.payload).map_err(|_| not_found())?;
    if scan.revision != record.id {
        return Err(not_found());
    }

    let preferred = scan.down_revision_quote.unwrap_or(scan.revision_quote);
    let quote = if new_predecessor.contains(preferred) {
        if preferred == '\'' { '"' } else { '\'' }
    } else {
        preferred
    };

    let payload = &record.payload;
    let span = scan.down_revision_span;
    let mut updated = String::with_capacity(payload.len() + new_predecessor.len());
    updated.push_str(&payload[..span.start]);
    updated.push(quote);
    updated.push_str(new_predecessor);
    updated.push(quote);
    updated.push_str(&payload[span.end..]);

    Ok(updated)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".rebase.tmp");
    PathBuf::from(name)
}

/// Write `contents` to `path` so that the file is either fully replaced or
/// left untouched.
pub fn write_atomic(path: &Path, contents: &str) -> io::Result<()> {
    let tmp = temp_path(path);

    let result = (|| -> io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp, path)
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fsync_dir(parent)?;
    }
    Ok(())
}

#[cfg(unix)]
fn fsync_dir(dir: &Path) -> io::Result<()> {
    fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn fsync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::artifact;
    use pretty_assertions::assert_eq;

    fn record(payload: &str) -> RevisionRecord {
        RevisionRecord::from_payload("versions/x.py", payload).unwrap()
    }

    #[test]
    fn replaces_only_the_value_token() {
        let original = "revision = 'b1'\ndown_revision = 'a0'   # keep me\n\ndef upgrade():\n    op.execute(\"down_revision = 'a0'\")\n";
        let updated = rewrite(&record(original), "t9").unwrap();

        assert_eq!(
            updated,
            "revision = 'b1'\ndown_revision = 't9'   # keep me\n\ndef upgrade():\n    op.execute(\"down_revision = 'a0'\")\n"
        );
    }

    #[test]
    fn root_takes_revision_quote_style() {
        let original = "revision: str = \"a0\"\ndown_revision: Union[str, None] = None\n";
        let updated = rewrite(&record(original), "t9").unwrap();
        assert_eq!(
            updated,
            "revision: str = \"a0\"\ndown_revision: Union[str, None] = \"t9\"\n"
        );
    }

    #[test]
    fn keeps_existing_quote_style() {
        let original = "revision = 'b1'\ndown_revision = \"a0\"\n";
        let updated = rewrite(&record(original), "t9").unwrap();
        assert_eq!(updated, "revision = 'b1'\ndown_revision = \"t9\"\n");
    }

    #[test]
    fn drifted_payload_is_not_rewritten() {
        let mut rec = record(&artifact("b1", Some("a0")));
        rec.payload = "# emptied\n".to_string();

        assert!(matches!(
            rewrite(&rec, "t9"),
            Err(RebaseError::RewriteTargetNotFound { revision, .. }) if revision == "b1"
        ));

        let mut rec = record(&artifact("b1", Some("a0")));
        rec.payload = artifact("other", Some("a0"));
        assert!(matches!(
            rewrite(&rec, "t9"),
            Err(RebaseError::RewriteTargetNotFound { .. })
        ));
    }

    #[test]
    fn changed_line_reports_declaration() {
        let rec = record(&artifact("b1", Some("a0")));
        let rw = Rewrite::prepare(&rec, "t9").unwrap();
        assert_eq!(
            rw.changed_line(),
            ("down_revision = 'a0'".to_string(), "down_revision = 't9'".to_string())
        );
    }

    #[test]
    fn commit_writes_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("002_b1.py");
        fs::write(&path, artifact("b1", Some("a0"))).unwrap();

        let rec = RevisionRecord::from_payload(&path, artifact("b1", Some("a0"))).unwrap();
        let rw = Rewrite::prepare(&rec, "t9").unwrap();
        rw.commit().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), rw.updated);
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn commit_refuses_changed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("002_b1.py");
        fs::write(&path, artifact("b1", Some("a0"))).unwrap();

        let rec = RevisionRecord::from_payload(&path, artifact("b1", Some("a0"))).unwrap();
        let rw = Rewrite::prepare(&rec, "t9").unwrap();
        fs::write(&path, artifact("b1", Some("zz"))).unwrap();

        assert!(matches!(rw.commit(), Err(RebaseError::ArtifactChanged { .. })));
        assert_eq!(fs::read_to_string(&path).unwrap(), artifact("b1", Some("zz")));
    }

    #[test]
    fn write_atomic_failure_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("x.py");

        assert!(write_atomic(&path, "revision = 'x'\n").is_err());
        assert!(!temp_path(&path).exists());
    }
}
