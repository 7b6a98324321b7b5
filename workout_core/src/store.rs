//! Durable store for sessions, exercise logs and set logs.
//!
//! Every write is conditional so queued writes can be replayed safely:
//! sessions and exercise logs carry a version that must move forward, set
//! logs are deduplicated by id. A write that lost the race comes back as
//! [`WriteOutcome::Stale`] instead of overwriting newer data.

use crate::{Error, ExerciseLog, Result, Session, SetLog};
use chrono::Utc;
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use uuid::Uuid;

/// Result of a conditional write
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The record was written
    Applied,
    /// The same version is already stored; nothing changed
    Duplicate,
    /// A newer version is already stored; the write was rejected
    Stale,
}

/// Decide a conditional write from the stored and incoming versions
pub fn compare_versions(stored: Option<u64>, incoming: u64) -> WriteOutcome {
    match stored {
        None => WriteOutcome::Applied,
        Some(v) if v < incoming => WriteOutcome::Applied,
        Some(v) if v == incoming => WriteOutcome::Duplicate,
        Some(_) => WriteOutcome::Stale,
    }
}

/// Record-oriented durable storage
pub trait SessionStore {
    fn load_session(&self, session_id: Uuid) -> Result<Option<Session>>;

    /// Most recently created session for a user
    fn latest_session(&self, user_id: &str) -> Result<Option<Session>>;

    fn save_session(&mut self, session: &Session) -> Result<WriteOutcome>;

    fn upsert_exercise_log(&mut self, log: &ExerciseLog) -> Result<WriteOutcome>;

    fn insert_set_log(&mut self, set: &SetLog) -> Result<WriteOutcome>;

    fn exercise_logs(&self, session_id: Uuid) -> Result<Vec<ExerciseLog>>;

    fn set_logs(&self, session_id: Uuid) -> Result<Vec<SetLog>>;
}

// ============================================================================
// In-memory store
// ============================================================================

/// In-process store with a switch to simulate outages
#[derive(Debug)]
pub struct MemoryStore {
    sessions: HashMap<Uuid, Session>,
    exercise_logs: HashMap<Uuid, ExerciseLog>,
    set_logs: Vec<SetLog>,
    online: bool,
    writes_applied: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            sessions: HashMap::new(),
            exercise_logs: HashMap::new(),
            set_logs: Vec::new(),
            online: true,
            writes_applied: 0,
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every call fails with `StoreUnavailable`
    pub fn set_online(&mut self, online: bool) {
        self.online = online;
    }

    pub fn writes_applied(&self) -> usize {
        self.writes_applied
    }

    fn check_online(&self) -> Result<()> {
        if self.online {
            Ok(())
        } else {
            Err(Error::StoreUnavailable("memory store is offline".into()))
        }
    }

    fn record(&mut self, outcome: WriteOutcome) -> WriteOutcome {
        if outcome == WriteOutcome::Applied {
            self.writes_applied += 1;
        }
        outcome
    }
}

impl SessionStore for MemoryStore {
    fn load_session(&self, session_id: Uuid) -> Result<Option<Session>> {
        self.check_online()?;
        Ok(self.sessions.get(&session_id).cloned())
    }

    fn latest_session(&self, user_id: &str) -> Result<Option<Session>> {
        self.check_online()?;
        Ok(self
            .sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .max_by_key(|s| s.created_at)
            .cloned())
    }

    fn save_session(&mut self, session: &Session) -> Result<WriteOutcome> {
        self.check_online()?;
        let outcome = compare_versions(
            self.sessions.get(&session.id).map(|s| s.version),
            session.version,
        );
        if outcome == WriteOutcome::Applied {
            self.sessions.insert(session.id, session.clone());
        }
        Ok(self.record(outcome))
    }

    fn upsert_exercise_log(&mut self, log: &ExerciseLog) -> Result<WriteOutcome> {
        self.check_online()?;
        let outcome = compare_versions(
            self.exercise_logs.get(&log.id).map(|l| u64::from(l.revision)),
            u64::from(log.revision),
        );
        if outcome == WriteOutcome::Applied {
            self.exercise_logs.insert(log.id, log.clone());
        }
        Ok(self.record(outcome))
    }

    fn insert_set_log(&mut self, set: &SetLog) -> Result<WriteOutcome> {
        self.check_online()?;
        if self.set_logs.iter().any(|s| s.id == set.id) {
            return Ok(WriteOutcome::Duplicate);
        }
        self.set_logs.push(set.clone());
        Ok(self.record(WriteOutcome::Applied))
    }

    fn exercise_logs(&self, session_id: Uuid) -> Result<Vec<ExerciseLog>> {
        self.check_online()?;
        let mut logs: Vec<_> = self
            .exercise_logs
            .values()
            .filter(|l| l.session_id == session_id)
            .cloned()
            .collect();
        logs.sort_by_key(|l| (l.started_at, l.order_index));
        Ok(logs)
    }

    fn set_logs(&self, session_id: Uuid) -> Result<Vec<SetLog>> {
        self.check_online()?;
        Ok(self
            .set_logs
            .iter()
            .filter(|s| s.session_id == session_id)
            .cloned()
            .collect())
    }
}

// ============================================================================
// File-backed store
// ============================================================================

/// Directory-backed store.
///
/// Layout under the root:
/// - `sessions/<id>.json` - one session record, rewritten atomically
/// - `exercise_logs/<session_id>.json` - all exercise logs of a session
/// - `set_logs/<session_id>.jsonl` - append-only set log
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn session_path(&self, session_id: Uuid) -> PathBuf {
        self.root.join("sessions").join(format!("{}.json", session_id))
    }

    fn exercise_logs_path(&self, session_id: Uuid) -> PathBuf {
        self.root
            .join("exercise_logs")
            .join(format!("{}.json", session_id))
    }

    fn set_logs_path(&self, session_id: Uuid) -> PathBuf {
        self.root
            .join("set_logs")
            .join(format!("{}.jsonl", session_id))
    }
}

impl SessionStore for FileStore {
    fn load_session(&self, session_id: Uuid) -> Result<Option<Session>> {
        read_json(&self.session_path(session_id))
    }

    fn latest_session(&self, user_id: &str) -> Result<Option<Session>> {
        let dir = self.root.join("sessions");
        if !dir.exists() {
            return Ok(None);
        }

        let mut latest: Option<Session> = None;
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            let Some(session) = read_json::<Session>(&path)? else {
                continue;
            };
            if session.user_id != user_id {
                continue;
            }
            if latest
                .as_ref()
                .map_or(true, |l| session.created_at > l.created_at)
            {
                latest = Some(session);
            }
        }
        Ok(latest)
    }

    fn save_session(&mut self, session: &Session) -> Result<WriteOutcome> {
        let path = self.session_path(session.id);
        with_lock(&path, || {
            let stored = read_json_for_update::<Session>(&path)?.map(|s| s.version);
            let outcome = compare_versions(stored, session.version);
            if outcome == WriteOutcome::Applied {
                write_json_atomic(&path, session)?;
                tracing::debug!("Saved session {} v{}", session.id, session.version);
            }
            Ok(outcome)
        })
    }

    fn upsert_exercise_log(&mut self, log: &ExerciseLog) -> Result<WriteOutcome> {
        let path = self.exercise_logs_path(log.session_id);
        with_lock(&path, || {
            let mut logs = read_json_for_update::<Vec<ExerciseLog>>(&path)?.unwrap_or_default();
            let position = logs.iter().position(|l| l.id == log.id);
            let outcome = compare_versions(
                position.map(|i| u64::from(logs[i].revision)),
                u64::from(log.revision),
            );
            if outcome == WriteOutcome::Applied {
                match position {
                    Some(i) => logs[i] = log.clone(),
                    None => logs.push(log.clone()),
                }
                write_json_atomic(&path, &logs)?;
                tracing::debug!("Saved exercise log {} r{}", log.id, log.revision);
            }
            Ok(outcome)
        })
    }

    fn insert_set_log(&mut self, set: &SetLog) -> Result<WriteOutcome> {
        let path = self.set_logs_path(set.session_id);
        ensure_parent_dir(&path)?;

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        file.lock_exclusive()?;

        let existing = read_jsonl::<SetLog>(&file, &path)?;
        let outcome = if existing.iter().any(|s| s.id == set.id) {
            WriteOutcome::Duplicate
        } else {
            let torn_tail = ends_mid_line(&file)?;
            let mut writer = std::io::BufWriter::new(&file);
            let line = serde_json::to_string(set)?;
            if torn_tail {
                writer.write_all(b"\n")?;
            }
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
            writer.flush()?;
            tracing::debug!("Appended set log {} for session {}", set.id, set.session_id);
            WriteOutcome::Applied
        };

        file.unlock()?;
        Ok(outcome)
    }

    fn exercise_logs(&self, session_id: Uuid) -> Result<Vec<ExerciseLog>> {
        Ok(read_json(&self.exercise_logs_path(session_id))?.unwrap_or_default())
    }

    fn set_logs(&self, session_id: Uuid) -> Result<Vec<SetLog>> {
        let path = self.set_logs_path(session_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&path)?;
        file.lock_shared()?;
        let sets = read_jsonl(&file, &path)?;
        file.unlock()?;
        Ok(sets)
    }
}

// ============================================================================
// File helpers
// ============================================================================

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Run `f` while holding an exclusive lock on `<path>.lock`.
///
/// The data file itself is replaced by rename, so the lock lives beside it.
fn with_lock<R>(path: &Path, f: impl FnOnce() -> Result<R>) -> Result<R> {
    ensure_parent_dir(path)?;
    let lock_path = path.with_extension("lock");
    let lock = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)?;
    lock.lock_exclusive()?;
    let result = f();
    lock.unlock()?;
    result
}

/// Read a JSON record with a shared lock.
///
/// Missing files read as `None`; corrupt files are logged and also read as
/// `None` so one bad record cannot take the whole store down.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match parse_json_file(path)? {
        Some(Ok(value)) => Ok(Some(value)),
        Some(Err(e)) => {
            tracing::warn!("Failed to parse {:?}: {}. Ignoring record.", path, e);
            Ok(None)
        }
        None => Ok(None),
    }
}

/// Read a record that is about to be rewritten.
///
/// A corrupt file is moved aside before the caller writes over it, so what
/// it held can still be recovered by hand.
pub(crate) fn read_json_for_update<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match parse_json_file(path)? {
        Some(Ok(value)) => Ok(Some(value)),
        Some(Err(e)) => {
            let aside = quarantine(path)?;
            tracing::warn!(
                "Failed to parse {:?}: {}. Moved it to {:?} before rewriting.",
                path,
                e,
                aside
            );
            Ok(None)
        }
        None => Ok(None),
    }
}

fn parse_json_file<T: DeserializeOwned>(
    path: &Path,
) -> Result<Option<std::result::Result<T, serde_json::Error>>> {
    if !path.exists() {
        return Ok(None);
    }

    let file = File::open(path)?;
    file.lock_shared()?;
    let mut contents = String::new();
    let read = BufReader::new(&file).read_to_string(&mut contents);
    file.unlock()?;
    read?;

    Ok(Some(serde_json::from_str(&contents)))
}

/// Rename a corrupt file to `<name>.corrupt-<timestamp>` next to it
fn quarantine(path: &Path) -> Result<PathBuf> {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".corrupt-{}", Utc::now().format("%Y%m%dT%H%M%S%3f")));
    let aside = path.with_file_name(name);
    std::fs::rename(path, &aside)?;
    Ok(aside)
}

/// Atomically replace `path` with the JSON form of `value`
///
/// Writes to a temp file in the same directory, syncs it, then renames it
/// over the original.
pub(crate) fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    ensure_parent_dir(path)?;

    let temp = NamedTempFile::new_in(path.parent().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::Other, "record path missing parent")
    })?)?;

    {
        let mut writer = std::io::BufWriter::new(temp.as_file());
        let contents = serde_json::to_string(value)?;
        writer.write_all(contents.as_bytes())?;
        writer.flush()?;
    }

    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// Whether the last append was cut off before its newline
fn ends_mid_line(mut file: &File) -> Result<bool> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(false);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

fn read_jsonl<T: DeserializeOwned>(file: &File, path: &Path) -> Result<Vec<T>> {
    let mut records = Vec::new();
    for (line_num, line_result) in BufReader::new(file).lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(&line) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!(
                    "Failed to parse {:?} at line {}: {}",
                    path,
                    line_num + 1,
                    e
                );
            }
        }
    }
    Ok(records)
}
