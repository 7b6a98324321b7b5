//! Offline sync queue.
//!
//! Every engine mutation becomes one queue item carrying the full record to
//! write. Items replay FIFO per session; a failing item blocks the later
//! items of its session (but not other sessions) until it succeeds, runs out
//! of retries, or the caller acknowledges it. Replays are idempotent: item
//! ids that already synced are ignored, and the store's conditional writes
//! turn duplicates into no-ops.

use crate::store::{read_json_for_update, write_json_atomic, SessionStore, WriteOutcome};
use crate::{Error, ExerciseLog, Result, Session, SetLog};
use chrono::{DateTime, Duration, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fs::{File, OpenOptions};
use std::path::Path;
use uuid::Uuid;

/// How many synced ids are remembered for replay dedupe
const SYNCED_HISTORY: usize = 1024;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    SaveSession,
    UpsertExerciseLog,
    InsertSetLog,
}

/// The record a queue item writes
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "record", rename_all = "snake_case")]
pub enum SyncPayload {
    Session(Session),
    ExerciseLog(ExerciseLog),
    SetLog(SetLog),
}

impl SyncPayload {
    pub fn action(&self) -> SyncAction {
        match self {
            SyncPayload::Session(_) => SyncAction::SaveSession,
            SyncPayload::ExerciseLog(_) => SyncAction::UpsertExerciseLog,
            SyncPayload::SetLog(_) => SyncAction::InsertSetLog,
        }
    }

    pub fn session_id(&self) -> Uuid {
        match self {
            SyncPayload::Session(s) => s.id,
            SyncPayload::ExerciseLog(l) => l.session_id,
            SyncPayload::SetLog(s) => s.session_id,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Syncing,
    Synced,
    Failed,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SyncItem {
    pub id: Uuid,
    pub session_id: Uuid,
    pub action: SyncAction,
    pub payload: SyncPayload,
    pub timestamp: DateTime<Utc>,
    pub retry_count: u32,
    pub status: SyncStatus,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl SyncItem {
    pub fn new(payload: SyncPayload, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id: payload.session_id(),
            action: payload.action(),
            payload,
            timestamp: now,
            retry_count: 0,
            status: SyncStatus::Pending,
            next_attempt_at: None,
            last_error: None,
        }
    }

    pub fn is_exhausted(&self, max_retries: u32) -> bool {
        self.status == SyncStatus::Failed && self.retry_count >= max_retries
    }
}

/// Retry limits and backoff
#[derive(Clone, Debug)]
pub struct SyncPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_backoff: Duration::milliseconds(500),
            max_backoff: Duration::seconds(60),
        }
    }
}

impl SyncPolicy {
    /// Delay before the next attempt after `retry_count` failures
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let factor = 2i64.saturating_pow(retry_count.saturating_sub(1));
        let millis = self
            .base_backoff
            .num_milliseconds()
            .saturating_mul(factor)
            .min(self.max_backoff.num_milliseconds());
        Duration::milliseconds(millis)
    }
}

/// Outcome of one flush pass
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub attempted: usize,
    pub synced: usize,
    pub failed: usize,
    pub skipped: usize,
    pub exhausted: usize,
}

/// An item that ran out of retries
#[derive(Clone, Debug, PartialEq)]
pub struct FailedSync {
    pub item_id: Uuid,
    pub session_id: Uuid,
    pub action: SyncAction,
    pub attempts: u32,
    pub last_error: String,
}

/// Persistence health as seen by callers
#[derive(Clone, Debug, PartialEq)]
pub enum SyncHealth {
    Healthy,
    /// Writes are queued but still being retried
    Degraded { pending: usize },
    /// Some writes gave up and need acknowledgement
    Fatal { failed: Vec<FailedSync> },
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SyncQueue {
    items: VecDeque<SyncItem>,
    synced: VecDeque<Uuid>,
    #[serde(skip)]
    policy: SyncPolicy,
}

impl SyncQueue {
    pub fn new(policy: SyncPolicy) -> Self {
        Self {
            items: VecDeque::new(),
            synced: VecDeque::new(),
            policy,
        }
    }

    pub fn policy(&self) -> &SyncPolicy {
        &self.policy
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> impl Iterator<Item = &SyncItem> {
        self.items.iter()
    }

    pub fn pending_for(&self, session_id: Uuid) -> usize {
        self.items
            .iter()
            .filter(|i| i.session_id == session_id)
            .count()
    }

    /// Queue a write; returns the new item id
    pub fn enqueue(&mut self, payload: SyncPayload, now: DateTime<Utc>) -> Uuid {
        let item = SyncItem::new(payload, now);
        let id = item.id;
        tracing::debug!("Queued {:?} for session {}", item.action, item.session_id);
        self.items.push_back(item);
        id
    }

    /// Queue an existing item, e.g. one re-read after a restart.
    ///
    /// Returns false if the item already synced or is already queued.
    pub fn enqueue_item(&mut self, item: SyncItem) -> bool {
        if self.synced.contains(&item.id) || self.items.iter().any(|i| i.id == item.id) {
            tracing::debug!("Ignoring duplicate sync item {}", item.id);
            return false;
        }
        self.items.push_back(item);
        true
    }

    pub fn was_synced(&self, item_id: Uuid) -> bool {
        self.synced.contains(&item_id)
    }

    /// Replay queued items against the store
    pub fn flush<S: SessionStore + ?Sized>(
        &mut self,
        store: &mut S,
        now: DateTime<Utc>,
    ) -> FlushReport {
        let policy = self.policy.clone();
        let mut report = FlushReport::default();
        let mut blocked = HashSet::new();

        for item in self.items.iter_mut() {
            if blocked.contains(&item.session_id) {
                report.skipped += 1;
                continue;
            }
            if item.is_exhausted(policy.max_retries) {
                blocked.insert(item.session_id);
                report.exhausted += 1;
                continue;
            }
            if item.next_attempt_at.map_or(false, |at| at > now) {
                blocked.insert(item.session_id);
                report.skipped += 1;
                continue;
            }

            item.status = SyncStatus::Syncing;
            report.attempted += 1;

            match apply_payload(store, &item.payload) {
                Ok(outcome) => {
                    if outcome == WriteOutcome::Stale {
                        tracing::warn!(
                            "Store already holds newer data than {:?} item {}; dropping it",
                            item.action,
                            item.id
                        );
                    }
                    item.status = SyncStatus::Synced;
                    item.last_error = None;
                    report.synced += 1;
                }
                Err(e) => {
                    item.status = SyncStatus::Failed;
                    item.last_error = Some(e.to_string());
                    item.retry_count = if e.is_retryable() {
                        item.retry_count + 1
                    } else {
                        policy.max_retries
                    };

                    if item.retry_count >= policy.max_retries {
                        item.next_attempt_at = None;
                        report.exhausted += 1;
                        tracing::error!(
                            "Sync item {} for session {} gave up after {} attempts: {}",
                            item.id,
                            item.session_id,
                            item.retry_count,
                            e
                        );
                    } else {
                        let delay = policy.backoff(item.retry_count);
                        item.next_attempt_at = Some(now + delay);
                        tracing::warn!(
                            "Sync item {} failed (attempt {}), retrying in {}ms: {}",
                            item.id,
                            item.retry_count,
                            delay.num_milliseconds(),
                            e
                        );
                    }
                    blocked.insert(item.session_id);
                    report.failed += 1;
                }
            }
        }

        let mut remaining = VecDeque::with_capacity(self.items.len());
        for item in self.items.drain(..) {
            if item.status == SyncStatus::Synced {
                self.synced.push_back(item.id);
            } else {
                remaining.push_back(item);
            }
        }
        self.items = remaining;
        while self.synced.len() > SYNCED_HISTORY {
            self.synced.pop_front();
        }

        if report.attempted > 0 {
            tracing::debug!("Sync flush: {:?}", report);
        }
        report
    }

    pub fn exhausted(&self) -> Vec<FailedSync> {
        self.items
            .iter()
            .filter(|i| i.is_exhausted(self.policy.max_retries))
            .map(|i| FailedSync {
                item_id: i.id,
                session_id: i.session_id,
                action: i.action,
                attempts: i.retry_count,
                last_error: i.last_error.clone().unwrap_or_default(),
            })
            .collect()
    }

    pub fn health(&self) -> SyncHealth {
        let failed = self.exhausted();
        if !failed.is_empty() {
            SyncHealth::Fatal { failed }
        } else if !self.items.is_empty() {
            SyncHealth::Degraded {
                pending: self.items.len(),
            }
        } else {
            SyncHealth::Healthy
        }
    }

    /// Error out on the first exhausted item
    pub fn ensure_healthy(&self) -> Result<()> {
        match self.exhausted().into_iter().next() {
            Some(f) => Err(Error::SyncExhausted {
                item_id: f.item_id,
                attempts: f.attempts,
                last_error: f.last_error,
            }),
            None => Ok(()),
        }
    }

    /// Drop exhausted items of a session after the caller saw them
    pub fn acknowledge_failed(&mut self, session_id: Uuid) -> Vec<SyncItem> {
        let max_retries = self.policy.max_retries;
        let (dropped, kept): (Vec<_>, Vec<_>) = self
            .items
            .drain(..)
            .partition(|i| i.session_id == session_id && i.is_exhausted(max_retries));
        self.items = kept.into();
        for item in &dropped {
            tracing::warn!(
                "Acknowledged lost {:?} write {} for session {}",
                item.action,
                item.id,
                session_id
            );
        }
        dropped
    }

    /// Give exhausted items of a session a fresh set of retries
    pub fn requeue_failed(&mut self, session_id: Uuid) -> usize {
        let max_retries = self.policy.max_retries;
        let mut count = 0;
        for item in self.items.iter_mut() {
            if item.session_id == session_id && item.is_exhausted(max_retries) {
                item.retry_count = 0;
                item.status = SyncStatus::Pending;
                item.next_attempt_at = None;
                count += 1;
            }
        }
        count
    }

    /// Load a persisted queue.
    ///
    /// A missing file yields an empty queue. So does a corrupt one, after it
    /// has been moved aside so the next save cannot erase it.
    pub fn load(path: &Path, policy: SyncPolicy) -> Result<Self> {
        let mut queue: SyncQueue = read_json_for_update(path)?.unwrap_or_default();
        queue.policy = policy;
        // An item caught mid-flight by a crash goes back to pending
        for item in queue.items.iter_mut() {
            if item.status == SyncStatus::Syncing {
                item.status = SyncStatus::Pending;
            }
        }
        tracing::debug!("Loaded {} queued writes from {:?}", queue.items.len(), path);
        Ok(queue)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)?;
        tracing::debug!("Saved {} queued writes to {:?}", self.items.len(), path);
        Ok(())
    }

    pub(crate) fn set_policy(&mut self, policy: SyncPolicy) {
        self.policy = policy;
    }
}

/// Exclusive hold on a persisted queue file, released on drop.
///
/// Take it before [`SyncQueue::load`] and keep it until after
/// [`SyncQueue::save`]; another process doing the same waits in between.
pub struct QueueLock {
    file: File,
}

impl QueueLock {
    pub fn acquire(queue_path: &Path) -> Result<Self> {
        if let Some(parent) = queue_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(queue_path.with_extension("lock"))?;
        file.lock_exclusive()?;
        tracing::debug!("Locked sync queue {:?}", queue_path);
        Ok(Self { file })
    }
}

impl Drop for QueueLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            tracing::warn!("Failed to unlock sync queue: {}", e);
        }
    }
}

fn apply_payload<S: SessionStore + ?Sized>(
    store: &mut S,
    payload: &SyncPayload,
) -> Result<WriteOutcome> {
    match payload {
        SyncPayload::Session(session) => store.save_session(session),
        SyncPayload::ExerciseLog(log) => store.upsert_exercise_log(log),
        SyncPayload::SetLog(set) => store.insert_set_log(set),
    }
}
