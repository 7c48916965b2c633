//! Line-oriented, append-only state file.
//!
//! Each line is `<call_id>\t<status>\t<rfc3339 timestamp>`. The first line for
//! an id creates its entry; later lines for the same id are status
//! transitions folded into that entry on load. Lines starting with `#` are
//! comments (compaction writes one). The file stays readable with `cat`.

use crate::defaults;
use crate::error::{CallSentryError, Result};
use crate::state::{ProcessingEntry, ProcessingStatus, StateStore};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// File-backed [`StateStore`].
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
    ceiling: usize,
    retain: usize,
}

/// Parsed view of the file.
struct Snapshot {
    entries: Vec<ProcessingEntry>,
    /// The file ends in a fragment with no newline (torn or in-flight write).
    dangling_tail: bool,
}

impl Snapshot {
    fn find(&self, call_id: &str) -> Option<&ProcessingEntry> {
        self.entries.iter().find(|e| e.call_id == call_id)
    }
}

impl FileStateStore {
    /// Store at `path` with the default compaction thresholds.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_limits(
            path,
            defaults::COMPACTION_CEILING,
            defaults::COMPACTION_RETAIN,
        )
    }

    /// Store at `path` compacting to `retain` entries once `ceiling` is exceeded.
    pub fn with_limits(path: impl Into<PathBuf>, ceiling: usize, retain: usize) -> Self {
        Self {
            path: path.into(),
            ceiling,
            retain: retain.min(ceiling),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn snapshot(&self) -> Result<Snapshot> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Snapshot {
                    entries: Vec::new(),
                    dangling_tail: false,
                });
            }
            Err(e) => {
                return Err(CallSentryError::StateStore {
                    message: format!("Failed to read {}: {e}", self.path.display()),
                });
            }
        };

        let mut entries: Vec<ProcessingEntry> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut dangling_tail = false;

        for (lineno, raw) in content.split_inclusive('\n').enumerate() {
            if !raw.ends_with('\n') {
                warn!(
                    path = %self.path.display(),
                    line = lineno + 1,
                    "ignoring incomplete trailing record"
                );
                dangling_tail = true;
                continue;
            }
            let parsed = match parse_line(raw) {
                None => continue,
                Some(Ok(p)) => p,
                Some(Err(reason)) => {
                    warn!(
                        path = %self.path.display(),
                        line = lineno + 1,
                        "skipping corrupt state line: {reason}"
                    );
                    continue;
                }
            };

            match index.get(&parsed.call_id) {
                Some(&i) => {
                    entries[i].status = parsed.status;
                    entries[i].recorded_at = parsed.recorded_at;
                }
                None => {
                    index.insert(parsed.call_id.clone(), entries.len());
                    entries.push(parsed);
                }
            }
        }

        Ok(Snapshot {
            entries,
            dangling_tail,
        })
    }

    /// Append one full record in a single write and force it to disk.
    fn append(&self, call_id: &str, status: ProcessingStatus, after_fragment: bool) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| self.write_error(e))?;
        }

        let mut line = String::new();
        if after_fragment {
            // Terminate the torn fragment so it stays one corrupt line.
            line.push('\n');
        }
        line.push_str(&format_line(call_id, status, Utc::now()));

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.write_error(e))?;
        file.write_all(line.as_bytes())
            .map_err(|e| self.write_error(e))?;
        file.sync_data().map_err(|e| self.write_error(e))?;
        Ok(())
    }

    fn rewrite(&self, entries: &[ProcessingEntry], total: usize) -> Result<()> {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| defaults::STATE_FILE_NAME.to_string());
        let tmp_path = self.path.with_file_name(format!("{file_name}.compact.tmp"));

        let mut body = format!(
            "# compacted at {}: kept {} of {} entries\n",
            Utc::now().to_rfc3339(),
            entries.len(),
            total
        );
        for entry in entries {
            body.push_str(&format_line(&entry.call_id, entry.status, entry.recorded_at));
        }

        let mut tmp = File::create(&tmp_path).map_err(|e| self.write_error(e))?;
        tmp.write_all(body.as_bytes())
            .map_err(|e| self.write_error(e))?;
        tmp.sync_all().map_err(|e| self.write_error(e))?;
        drop(tmp);

        fs::rename(&tmp_path, &self.path).map_err(|e| self.write_error(e))?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
            && let Ok(dir) = File::open(parent)
            && let Err(e) = dir.sync_all()
        {
            warn!(path = %parent.display(), "failed to sync state directory: {e}");
        }
        Ok(())
    }

    fn write_error(&self, e: std::io::Error) -> CallSentryError {
        CallSentryError::StateStore {
            message: format!("Failed to write {}: {e}", self.path.display()),
        }
    }
}

impl StateStore for FileStateStore {
    fn load_all(&self) -> Result<HashSet<String>> {
        let snapshot = self.snapshot()?;
        Ok(snapshot.entries.into_iter().map(|e| e.call_id).collect())
    }

    fn record(&self, call_id: &str, status: ProcessingStatus) -> Result<bool> {
        check_call_id(call_id)?;
        let snapshot = self.snapshot()?;
        if let Some(existing) = snapshot.find(call_id) {
            debug!(
                call_id,
                existing = %existing.status,
                requested = %status,
                "call already recorded, not appending"
            );
            return Ok(false);
        }
        self.append(call_id, status, snapshot.dangling_tail)?;
        debug!(call_id, %status, "recorded call");
        Ok(true)
    }

    fn complete(&self, call_id: &str, status: ProcessingStatus) -> Result<()> {
        check_call_id(call_id)?;
        let snapshot = self.snapshot()?;
        match snapshot.find(call_id) {
            Some(existing) if existing.status == status => return Ok(()),
            Some(_) => {}
            None => warn!(call_id, %status, "completing a call with no entry"),
        }
        self.append(call_id, status, snapshot.dangling_tail)?;
        debug!(call_id, %status, "committed status");
        Ok(())
    }

    fn entries(&self) -> Result<Vec<ProcessingEntry>> {
        Ok(self.snapshot()?.entries)
    }

    fn compact_if_needed(&self) -> Result<Option<usize>> {
        let entries = self.snapshot()?.entries;
        let total = entries.len();
        if total <= self.ceiling {
            return Ok(None);
        }
        let evicted = total - self.retain;
        self.rewrite(&entries[evicted..], total)?;
        info!(
            path = %self.path.display(),
            kept = self.retain,
            evicted,
            "compacted state store"
        );
        Ok(Some(evicted))
    }
}

/// Whether `call_id` can be written as the first field of a line and read back.
pub fn is_storable_call_id(call_id: &str) -> bool {
    !call_id.is_empty()
        && !call_id
            .chars()
            .any(|c| c.is_whitespace() || c.is_control())
}

fn check_call_id(call_id: &str) -> Result<()> {
    if is_storable_call_id(call_id) {
        Ok(())
    } else {
        Err(CallSentryError::StateStore {
            message: format!("call id {call_id:?} contains whitespace or control characters"),
        })
    }
}

fn format_line(call_id: &str, status: ProcessingStatus, at: DateTime<Utc>) -> String {
    format!("{call_id}\t{status}\t{}\n", at.to_rfc3339())
}

/// `None` for blank and comment lines, `Some(Err)` for corrupt ones.
fn parse_line(raw: &str) -> Option<std::result::Result<ProcessingEntry, String>> {
    let line = raw.trim_end_matches(['\n', '\r']);
    if line.trim().is_empty() || line.starts_with('#') {
        return None;
    }

    let fields: Vec<&str> = line.split('\t').collect();
    let [call_id, status, recorded_at] = fields.as_slice() else {
        return Some(Err(format!("expected 3 fields, found {}", fields.len())));
    };
    if !is_storable_call_id(call_id) {
        return Some(Err(format!("invalid call id '{call_id}'")));
    }
    let status = match status.parse::<ProcessingStatus>() {
        Ok(s) => s,
        Err(e) => return Some(Err(e)),
    };
    let recorded_at = match DateTime::parse_from_rfc3339(recorded_at) {
        Ok(t) => t.with_timezone(&Utc),
        Err(e) => return Some(Err(format!("bad timestamp '{recorded_at}': {e}"))),
    };

    Some(Ok(ProcessingEntry {
        call_id: (*call_id).to_string(),
        status,
        recorded_at,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> FileStateStore {
        FileStateStore::new(dir.path().join("processed_calls.txt"))
    }

    #[test]
    fn load_all_on_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(store.load_all().unwrap().is_empty());
        assert!(store.entries().unwrap().is_empty());
    }

    #[test]
    fn record_then_load_contains_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        assert!(store.record("c1", ProcessingStatus::Processing).unwrap());
        assert!(store.record("c2", ProcessingStatus::Processing).unwrap());

        let ids = store.load_all().unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains("c1"));
        assert!(ids.contains("c2"));
    }

    #[test]
    fn record_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        assert!(store.record("c1", ProcessingStatus::Processing).unwrap());
        assert!(!store.record("c1", ProcessingStatus::AlertFailed).unwrap());
        assert!(!store.record("c1", ProcessingStatus::Processing).unwrap());

        let entries = store.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, ProcessingStatus::Processing);

        let raw = fs::read_to_string(store.path()).unwrap();
        assert_eq!(raw.lines().count(), 1, "no second line may be appended");
    }

    #[test]
    fn complete_updates_status_without_new_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.record("c1", ProcessingStatus::Processing).unwrap();
        store
            .complete("c1", ProcessingStatus::AnalyzedIgnore)
            .unwrap();

        let entries = store.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].call_id, "c1");
        assert_eq!(entries[0].status, ProcessingStatus::AnalyzedIgnore);
    }

    #[test]
    fn complete_with_same_status_does_not_append() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.record("c1", ProcessingStatus::Processing).unwrap();
        store.complete("c1", ProcessingStatus::NoRecording).unwrap();
        store.complete("c1", ProcessingStatus::NoRecording).unwrap();

        let raw = fs::read_to_string(store.path()).unwrap();
        assert_eq!(raw.lines().count(), 2);
    }

    #[test]
    fn ids_that_cannot_round_trip_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        for id in ["call 42", "call\t42", "call\n42", "call\u{7}42", ""] {
            assert!(
                matches!(
                    store.record(id, ProcessingStatus::Processing),
                    Err(CallSentryError::StateStore { .. })
                ),
                "record accepted {id:?}"
            );
            assert!(store.complete(id, ProcessingStatus::AnalyzedIgnore).is_err());
        }
        assert!(!store.path().exists(), "nothing may be written");

        assert!(store.record("call-42", ProcessingStatus::Processing).unwrap());
        assert!(!store.record("call-42", ProcessingStatus::Processing).unwrap());
        assert!(store.load_all().unwrap().contains("call-42"));
    }

    #[test]
    fn storable_call_ids() {
        assert!(is_storable_call_id("5f0c-42_ab.c"));
        assert!(is_storable_call_id("звонок-1"));
        assert!(!is_storable_call_id(""));
        assert!(!is_storable_call_id("a b"));
        assert!(!is_storable_call_id("a\u{0}b"));
    }

    #[test]
    fn entries_keep_first_appearance_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.record("a", ProcessingStatus::Processing).unwrap();
        store.record("b", ProcessingStatus::Processing).unwrap();
        store.complete("a", ProcessingStatus::CriticalAlertSent).unwrap();

        let ids: Vec<_> = store
            .entries()
            .unwrap()
            .into_iter()
            .map(|e| e.call_id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn corrupt_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let good = format_line("good", ProcessingStatus::AnalyzedIgnore, Utc::now());
        let content = format!(
            "# comment line\n\
             only-one-field\n\
             bad\tnot_a_status\t2025-01-01T00:00:00+00:00\n\
             bad2\tprocessing\tyesterday\n\
             \n\
             {good}"
        );
        fs::write(store.path(), content).unwrap();

        let entries = store.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].call_id, "good");
    }

    #[test]
    fn torn_trailing_record_is_ignored_and_next_append_is_clean() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.record("c1", ProcessingStatus::Processing).unwrap();

        let mut file = OpenOptions::new().append(true).open(store.path()).unwrap();
        file.write_all(b"c2\tproc").unwrap();
        drop(file);

        let ids = store.load_all().unwrap();
        assert_eq!(ids.len(), 1, "partial record must not be visible");

        assert!(store.record("c3", ProcessingStatus::Processing).unwrap());
        let ids = store.load_all().unwrap();
        assert!(ids.contains("c1"));
        assert!(ids.contains("c3"));
        assert!(!ids.contains("c2"));
    }

    #[test]
    fn file_is_human_readable() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.record("abc-123", ProcessingStatus::Processing).unwrap();

        let raw = fs::read_to_string(store.path()).unwrap();
        assert!(raw.starts_with("abc-123\tprocessing\t"));
        assert!(raw.ends_with('\n'));
    }

    #[test]
    fn no_compaction_at_or_below_ceiling() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::with_limits(dir.path().join("s.txt"), 5, 3);
        for i in 0..5 {
            store
                .record(&format!("c{i}"), ProcessingStatus::Processing)
                .unwrap();
        }
        assert_eq!(store.compact_if_needed().unwrap(), None);
        assert_eq!(store.entries().unwrap().len(), 5);
    }

    #[test]
    fn compaction_keeps_most_recent_entries_with_marker() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::with_limits(dir.path().join("s.txt"), 5, 3);
        for i in 0..6 {
            store
                .record(&format!("c{i}"), ProcessingStatus::Processing)
                .unwrap();
        }
        store.complete("c5", ProcessingStatus::AlertFailed).unwrap();

        assert_eq!(store.compact_if_needed().unwrap(), Some(3));

        let entries = store.entries().unwrap();
        let ids: Vec<_> = entries.iter().map(|e| e.call_id.as_str()).collect();
        assert_eq!(ids, vec!["c3", "c4", "c5"]);
        assert_eq!(entries[2].status, ProcessingStatus::AlertFailed);

        let raw = fs::read_to_string(store.path()).unwrap();
        assert!(raw.starts_with("# compacted at "));
        assert_eq!(raw.lines().count(), 4);
    }

    #[test]
    fn default_compaction_bound() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let mut body = String::new();
        let now = Utc::now();
        for i in 0..1001 {
            body.push_str(&format_line(
                &format!("call-{i:04}"),
                ProcessingStatus::AnalyzedIgnore,
                now,
            ));
        }
        fs::write(store.path(), body).unwrap();

        assert_eq!(store.compact_if_needed().unwrap(), Some(201));
        let ids = store.load_all().unwrap();
        assert_eq!(ids.len(), 800);
        assert!(!ids.contains("call-0000"));
        assert!(!ids.contains("call-0200"));
        assert!(ids.contains("call-0201"));
        assert!(ids.contains("call-1000"));

        // Evicted ids are fresh again.
        assert!(store.record("call-0000", ProcessingStatus::Processing).unwrap());
    }
}
