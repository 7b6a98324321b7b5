//! Session engine.
//!
//! Owns the in-memory view of every session it has touched and drives the
//! state machine, log tracker, telemetry cache and sync queue for each call.
//! A mutating call completes in memory first; the resulting writes are then
//! queued and (by default) flushed to the store. A failed flush never fails
//! the call, it shows up in [`SessionEngine::sync_status`] instead.

use crate::catalog::WorkoutCatalog;
use crate::clock::Clock;
use crate::config::{millis, Config};
use crate::machine::{self, Effect, SessionEvent, Transition};
use crate::store::SessionStore;
use crate::summary::{build_summary, HistoricalBests, SessionSummary};
use crate::sync::{FlushReport, SyncHealth, SyncItem, SyncPayload, SyncPolicy, SyncQueue};
use crate::telemetry::{self, TelemetryCache};
use crate::tracker::LogTracker;
use crate::{
    Error, ExerciseLog, RealTimeSessionData, Result, Session, SetData, SetLog, SkipReason,
};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use uuid::Uuid;

/// Runtime knobs for the engine
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub sync: SyncPolicy,
    /// Minimum gap between telemetry-only session writes
    pub telemetry_debounce: Duration,
    /// Flush the queue after every mutating call
    pub auto_flush: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sync: SyncPolicy::default(),
            telemetry_debounce: Duration::seconds(2),
            auto_flush: true,
        }
    }
}

impl From<&Config> for EngineConfig {
    fn from(config: &Config) -> Self {
        Self {
            sync: SyncPolicy::from(&config.sync),
            telemetry_debounce: millis(config.telemetry.debounce_ms),
            auto_flush: true,
        }
    }
}

pub struct SessionEngine<S, K, C> {
    store: S,
    catalog: K,
    clock: C,
    sessions: HashMap<Uuid, Session>,
    tracker: LogTracker,
    telemetry: TelemetryCache,
    queue: SyncQueue,
    config: EngineConfig,
}

impl<S, K, C> SessionEngine<S, K, C>
where
    S: SessionStore,
    K: WorkoutCatalog,
    C: Clock,
{
    pub fn new(store: S, catalog: K, clock: C, config: EngineConfig) -> Self {
        Self {
            store,
            catalog,
            clock,
            sessions: HashMap::new(),
            tracker: LogTracker::new(),
            telemetry: TelemetryCache::new(config.telemetry_debounce),
            queue: SyncQueue::new(config.sync.clone()),
            config,
        }
    }

    /// Resume with writes left over from an earlier run
    pub fn with_queue(mut self, mut queue: SyncQueue) -> Self {
        queue.set_policy(self.config.sync.clone());
        self.queue = queue;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    pub fn into_parts(self) -> (S, SyncQueue) {
        (self.store, self.queue)
    }

    // --- session lifecycle ---

    /// Create an idle session for a workout
    pub fn create_session(
        &mut self,
        user_id: &str,
        workout_id: &str,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> Result<Session> {
        let plan = self
            .catalog
            .workout(workout_id)
            .ok_or_else(|| Error::WorkoutNotFound(workout_id.to_string()))?
            .clone();

        if let Some(session_id) = self.active_session_for(user_id) {
            return Err(Error::SessionAlreadyActive { session_id });
        }

        let now = self.clock.now();
        let session = Session::new(user_id, &plan, scheduled_at, now);
        self.tracker.hydrate(session.id, Vec::new(), Vec::new());
        tracing::info!(
            "Created session {} for user '{}' ({})",
            session.id,
            user_id,
            plan.name
        );

        let session = self.commit(session, now);
        self.after_mutation(now);
        Ok(session)
    }

    pub fn start_session(&mut self, session_id: Uuid) -> Result<Session> {
        self.transition(session_id, SessionEvent::Start)
    }

    pub fn pause_session(&mut self, session_id: Uuid) -> Result<Session> {
        self.transition(session_id, SessionEvent::Pause)
    }

    pub fn resume_session(&mut self, session_id: Uuid) -> Result<Session> {
        self.transition(session_id, SessionEvent::Resume)
    }

    /// Complete a session; an exercise still in progress is closed as failed
    pub fn complete_session(&mut self, session_id: Uuid) -> Result<Session> {
        self.close_session(session_id, SessionEvent::Complete)
    }

    /// Cancel a session; its queued writes still drain
    pub fn cancel_session(&mut self, session_id: Uuid) -> Result<Session> {
        self.close_session(session_id, SessionEvent::Cancel)
    }

    pub fn start_rest(&mut self, session_id: Uuid) -> Result<Session> {
        self.transition(session_id, SessionEvent::StartRest)
    }

    pub fn skip_rest(&mut self, session_id: Uuid) -> Result<Session> {
        self.transition(session_id, SessionEvent::SkipRest)
    }

    // --- exercises and sets ---

    pub fn start_exercise(
        &mut self,
        session_id: Uuid,
        index: usize,
    ) -> Result<(Session, ExerciseLog)> {
        let session = self.load(session_id)?;
        let now = self.clock.now();
        let transition = machine::apply(&session, &SessionEvent::ExerciseStarted { index }, now)?;

        self.tracker.check_can_begin(session_id, index)?;
        let planned = self
            .catalog
            .planned_exercise(&session.workout_id, index)
            .ok_or_else(|| Error::ExerciseNotFound {
                workout_id: session.workout_id.clone(),
                index,
            })?
            .clone();
        let log = self.tracker.begin_exercise(session_id, &planned, now)?;

        self.queue
            .enqueue(SyncPayload::ExerciseLog(log.clone()), now);
        let session = self.finish(transition, now);
        Ok((session, log))
    }

    pub fn complete_exercise(
        &mut self,
        session_id: Uuid,
        exercise_log_id: Uuid,
    ) -> Result<(Session, ExerciseLog)> {
        let session = self.load(session_id)?;
        let now = self.clock.now();
        let transition = machine::apply(&session, &SessionEvent::ExerciseCompleted, now)?;
        let log = self
            .tracker
            .complete_exercise(session_id, exercise_log_id, now)?;
        Ok(self.finish_with_log(transition, log, now))
    }

    /// Close an exercise as skipped; the completion counter is left alone
    pub fn skip_exercise(
        &mut self,
        session_id: Uuid,
        exercise_log_id: Uuid,
        reason: SkipReason,
        notes: Option<String>,
        alternative_exercise_id: Option<String>,
    ) -> Result<(Session, ExerciseLog)> {
        let session = self.load(session_id)?;
        let now = self.clock.now();
        let transition = machine::apply(&session, &SessionEvent::ExerciseSkipped, now)?;
        let log = self.tracker.skip_exercise(
            session_id,
            exercise_log_id,
            reason,
            notes,
            alternative_exercise_id,
            now,
        )?;
        tracing::info!(
            "Skipped '{}' in session {} ({:?})",
            log.exercise_id,
            session_id,
            reason
        );
        Ok(self.finish_with_log(transition, log, now))
    }

    pub fn fail_exercise(
        &mut self,
        session_id: Uuid,
        exercise_log_id: Uuid,
        notes: Option<String>,
    ) -> Result<(Session, ExerciseLog)> {
        let session = self.load(session_id)?;
        let now = self.clock.now();
        let transition = machine::apply(&session, &SessionEvent::ExerciseFailed, now)?;
        let log = self
            .tracker
            .fail_exercise(session_id, exercise_log_id, notes, now)?;
        Ok(self.finish_with_log(transition, log, now))
    }

    pub fn complete_set(
        &mut self,
        session_id: Uuid,
        exercise_log_id: Uuid,
        data: SetData,
    ) -> Result<(Session, SetLog)> {
        let session = self.load(session_id)?;
        let now = self.clock.now();
        let event = SessionEvent::SetCompleted {
            set_number: data.set_number,
            reps: data.reps_completed,
        };
        let transition = machine::apply(&session, &event, now)?;
        let set = self
            .tracker
            .record_set(session_id, exercise_log_id, data, now)?;

        self.queue.enqueue(SyncPayload::SetLog(set.clone()), now);
        let session = self.finish(transition, now);
        Ok((session, set))
    }

    // --- reads ---

    pub fn get_session(&mut self, session_id: Uuid) -> Result<Option<Session>> {
        match self.load(session_id) {
            Ok(session) => Ok(Some(session)),
            Err(Error::SessionNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Most recently created session of a user
    pub fn get_latest_session(&mut self, user_id: &str) -> Result<Option<Session>> {
        let in_memory = self
            .sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .max_by_key(|s| s.created_at)
            .cloned();

        let stored = match self.store.latest_session(user_id) {
            Ok(stored) => stored,
            Err(e) if in_memory.is_some() => {
                tracing::warn!("Falling back to in-memory sessions for '{}': {}", user_id, e);
                None
            }
            Err(e) => return Err(e),
        };

        match (in_memory, stored) {
            (Some(mem), Some(stored)) if stored.created_at > mem.created_at => {
                self.load(stored.id).map(Some)
            }
            (Some(mem), _) => Ok(Some(mem)),
            (None, Some(stored)) => self.load(stored.id).map(Some),
            (None, None) => Ok(None),
        }
    }

    pub fn exercise_logs(&mut self, session_id: Uuid) -> Result<Vec<ExerciseLog>> {
        self.load(session_id)?;
        Ok(self.tracker.exercise_logs(session_id).to_vec())
    }

    pub fn set_logs(&mut self, session_id: Uuid) -> Result<Vec<SetLog>> {
        self.load(session_id)?;
        Ok(self.tracker.set_logs(session_id).to_vec())
    }

    /// Build the report for a completed session
    pub fn summarize(
        &mut self,
        session_id: Uuid,
        history: Option<&HistoricalBests>,
    ) -> Result<SessionSummary> {
        let session = self.load(session_id)?;
        build_summary(
            &session,
            self.tracker.exercise_logs(session_id),
            self.tracker.set_logs(session_id),
            history,
        )
    }

    // --- telemetry ---

    /// Latest cached snapshot, without touching the store
    pub fn telemetry(&self, session_id: Uuid) -> Option<&RealTimeSessionData> {
        self.telemetry.get(session_id)
    }

    /// Refresh timers for a session.
    ///
    /// The snapshot always lands in the cache; a session write carrying it
    /// is queued at most once per debounce interval.
    pub fn tick(&mut self, session_id: Uuid) -> Result<RealTimeSessionData> {
        let mut session = self.load(session_id)?;
        let now = self.clock.now();
        let snapshot = telemetry::capture(&session, self.rest_target(&session), now);
        self.telemetry.update(snapshot.clone());

        if !session.is_terminal() && self.telemetry.due_for_write(session_id, now) {
            session.real_time_data = Some(snapshot.clone());
            session.version += 1;
            session.updated_at = now;
            self.telemetry.mark_persisted(session_id, now);
            self.queue.enqueue(SyncPayload::Session(session.clone()), now);
            self.sessions.insert(session_id, session);
            self.after_mutation(now);
        }
        Ok(snapshot)
    }

    // --- sync ---

    pub fn flush(&mut self) -> FlushReport {
        let now = self.clock.now();
        self.queue.flush(&mut self.store, now)
    }

    pub fn sync_status(&self) -> SyncHealth {
        self.queue.health()
    }

    /// Drop a session's exhausted writes once the caller has seen them
    pub fn acknowledge_failed(&mut self, session_id: Uuid) -> Vec<SyncItem> {
        self.queue.acknowledge_failed(session_id)
    }

    pub fn requeue_failed(&mut self, session_id: Uuid) -> usize {
        self.queue.requeue_failed(session_id)
    }

    /// Drop a finished session from memory once its writes have drained.
    ///
    /// Returns false if the session is still live or has queued writes.
    pub fn evict(&mut self, session_id: Uuid) -> bool {
        let finished = self
            .sessions
            .get(&session_id)
            .map_or(false, Session::is_terminal);
        if !finished || self.queue.pending_for(session_id) > 0 {
            return false;
        }
        self.sessions.remove(&session_id);
        self.tracker.forget(session_id);
        self.telemetry.remove(session_id);
        tracing::debug!("Evicted session {} from memory", session_id);
        true
    }

    // --- internals ---

    fn transition(&mut self, session_id: Uuid, event: SessionEvent) -> Result<Session> {
        let session = self.load(session_id)?;
        let now = self.clock.now();
        let transition = machine::apply(&session, &event, now)?;
        Ok(self.finish(transition, now))
    }

    /// Move to a terminal state without leaving an exercise log open
    fn close_session(&mut self, session_id: Uuid, event: SessionEvent) -> Result<Session> {
        let session = self.load(session_id)?;
        let now = self.clock.now();
        let transition = machine::apply(&session, &event, now)?;

        let open = self.tracker.active_exercise(session_id).map(|log| log.id);
        if let Some(log_id) = open {
            let note = format!(
                "still in progress when the session was {}",
                transition.session.status().as_str()
            );
            let log = self
                .tracker
                .fail_exercise(session_id, log_id, Some(note), now)?;
            tracing::warn!(
                "Closed exercise log {} ('{}') as failed with session {}",
                log.id,
                log.exercise_id,
                session_id
            );
            self.queue.enqueue(SyncPayload::ExerciseLog(log), now);
        }
        Ok(self.finish(transition, now))
    }

    fn finish(&mut self, transition: Transition, now: DateTime<Utc>) -> Session {
        log_effects(transition.session.id, &transition.effects);
        let session = self.commit(transition.session, now);
        self.after_mutation(now);
        session
    }

    fn finish_with_log(
        &mut self,
        transition: Transition,
        log: ExerciseLog,
        now: DateTime<Utc>,
    ) -> (Session, ExerciseLog) {
        self.queue
            .enqueue(SyncPayload::ExerciseLog(log.clone()), now);
        (self.finish(transition, now), log)
    }

    /// Make a snapshot current: cache, telemetry and a queued write
    fn commit(&mut self, mut session: Session, now: DateTime<Utc>) -> Session {
        let snapshot = telemetry::capture(&session, self.rest_target(&session), now);
        session.real_time_data = Some(snapshot.clone());
        self.telemetry.update(snapshot);
        self.telemetry.mark_persisted(session.id, now);

        self.queue.enqueue(SyncPayload::Session(session.clone()), now);
        self.sessions.insert(session.id, session.clone());
        session
    }

    fn after_mutation(&mut self, now: DateTime<Utc>) {
        if !self.config.auto_flush {
            return;
        }
        let report = self.queue.flush(&mut self.store, now);
        if report.failed > 0 || report.exhausted > 0 {
            tracing::warn!(
                "{} writes pending after flush ({} failed, {} exhausted)",
                self.queue.len(),
                report.failed,
                report.exhausted
            );
        }
    }

    fn rest_target(&self, session: &Session) -> Option<u32> {
        session
            .current_exercise_index
            .and_then(|index| self.catalog.planned_exercise(&session.workout_id, index))
            .map(|planned| planned.rest_seconds)
    }

    /// The current snapshot of a session, reading it in from the store
    /// (with any queued writes laid over it) on first use
    fn load(&mut self, session_id: Uuid) -> Result<Session> {
        if let Some(session) = self.sessions.get(&session_id) {
            return Ok(session.clone());
        }

        let (stored, mut exercises, mut sets) = match self.read_stored(session_id) {
            Ok(records) => records,
            Err(e) if e.is_retryable() && self.queue.pending_for(session_id) > 0 => {
                tracing::warn!(
                    "Store unreachable, rebuilding session {} from queued writes: {}",
                    session_id,
                    e
                );
                (None, Vec::new(), Vec::new())
            }
            Err(e) => return Err(e),
        };

        let mut session = stored;
        for item in self.queue.items().filter(|i| i.session_id == session_id) {
            match &item.payload {
                SyncPayload::Session(queued) => {
                    if session.as_ref().map_or(true, |s| queued.version > s.version) {
                        session = Some(queued.clone());
                    }
                }
                SyncPayload::ExerciseLog(queued) => {
                    match exercises.iter_mut().find(|e| e.id == queued.id) {
                        Some(existing) if existing.revision < queued.revision => {
                            *existing = queued.clone();
                        }
                        Some(_) => {}
                        None => exercises.push(queued.clone()),
                    }
                }
                SyncPayload::SetLog(queued) => {
                    if !sets.iter().any(|s| s.id == queued.id) {
                        sets.push(queued.clone());
                    }
                }
            }
        }

        let session = session.ok_or(Error::SessionNotFound(session_id))?;
        tracing::debug!(
            "Loaded session {} (version {}, {} exercise logs, {} sets)",
            session_id,
            session.version,
            exercises.len(),
            sets.len()
        );
        self.tracker.hydrate(session_id, exercises, sets);
        if session.is_terminal() {
            if let Some(open) = self.tracker.active_exercise(session_id) {
                debug_assert!(
                    false,
                    "terminal session {} has exercise log {} in progress",
                    session_id, open.id
                );
                tracing::warn!(
                    "Session {} is {} but exercise log {} is still in progress",
                    session_id,
                    session.status().as_str(),
                    open.id
                );
            }
        }
        if let Some(snapshot) = session.real_time_data.clone() {
            self.telemetry.update(snapshot);
        }
        self.sessions.insert(session_id, session.clone());
        Ok(session)
    }

    fn read_stored(
        &self,
        session_id: Uuid,
    ) -> Result<(Option<Session>, Vec<ExerciseLog>, Vec<SetLog>)> {
        let session = self.store.load_session(session_id)?;
        if session.is_none() {
            return Ok((None, Vec::new(), Vec::new()));
        }
        Ok((
            session,
            self.store.exercise_logs(session_id)?,
            self.store.set_logs(session_id)?,
        ))
    }

    /// A non-terminal session of this user, if any
    fn active_session_for(&mut self, user_id: &str) -> Option<Uuid> {
        let in_memory = self
            .sessions
            .values()
            .find(|s| s.user_id == user_id && !s.is_terminal())
            .map(|s| s.id);
        if in_memory.is_some() {
            return in_memory;
        }

        let latest = match self.store.latest_session(user_id) {
            Ok(latest) => latest?,
            Err(e) => {
                tracing::warn!(
                    "Could not check stored sessions of '{}' before creating: {}",
                    user_id,
                    e
                );
                return None;
            }
        };
        if self.sessions.contains_key(&latest.id) {
            return None;
        }
        match self.load(latest.id) {
            Ok(session) if !session.is_terminal() => Some(session.id),
            _ => None,
        }
    }
}

fn log_effects(session_id: Uuid, effects: &[Effect]) {
    for effect in effects {
        match effect {
            Effect::StatusChanged { from, to } => {
                tracing::info!(
                    "Session {}: {} -> {}",
                    session_id,
                    from.as_str(),
                    to.as_str()
                );
            }
            Effect::PhaseChanged { from, to } => {
                tracing::debug!("Session {} phase {:?} -> {:?}", session_id, from, to);
            }
            Effect::PauseClosed(pause) => {
                tracing::debug!(
                    "Session {} resumed after {}s paused",
                    session_id,
                    pause.duration_seconds
                );
            }
            Effect::CountersChanged => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{get_default_catalog, StaticCatalog};
    use crate::clock::ManualClock;
    use crate::store::{MemoryStore, WriteOutcome};
    use crate::{ExerciseStatus, Phase, SessionStatus, TimerMode};
    use chrono::TimeZone;

    type TestEngine = SessionEngine<MemoryStore, &'static StaticCatalog, ManualClock>;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 7, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn engine() -> (TestEngine, ManualClock) {
        crate::logging::init_test();
        let clock = ManualClock::new(t(0));
        let engine = SessionEngine::new(
            MemoryStore::new(),
            get_default_catalog(),
            clock.clone(),
            EngineConfig::default(),
        );
        (engine, clock)
    }

    fn set(n: u32, reps: u32) -> SetData {
        SetData {
            set_number: n,
            reps_completed: reps,
            weight_kg: Some(16.0),
            rpe: Some(7),
            ..Default::default()
        }
    }

    #[test]
    fn test_full_workout_with_a_skip() {
        let (mut engine, clock) = engine();
        let session = engine.create_session("alex", "full_body_a", None).unwrap();
        let id = session.id;
        assert_eq!(session.status(), SessionStatus::Idle);
        assert_eq!(session.total_exercises, 3);

        engine.start_session(id).unwrap();
        clock.advance_secs(60);

        let (_, squat) = engine.start_exercise(id, 0).unwrap();
        engine.complete_set(id, squat.id, set(1, 10)).unwrap();
        engine.complete_set(id, squat.id, set(2, 10)).unwrap();
        engine.complete_exercise(id, squat.id).unwrap();

        let (_, push) = engine.start_exercise(id, 1).unwrap();
        let (session, skipped) = engine
            .skip_exercise(id, push.id, SkipReason::Injury, Some("wrist".into()), None)
            .unwrap();
        assert_eq!(skipped.status, ExerciseStatus::Skipped);
        assert_eq!(session.exercises_completed, 1);

        let (_, row) = engine.start_exercise(id, 2).unwrap();
        for n in 1..=3 {
            clock.advance_secs(45);
            engine.complete_set(id, row.id, set(n, 10)).unwrap();
        }
        engine.complete_exercise(id, row.id).unwrap();

        clock.advance_secs(30);
        let session = engine.complete_session(id).unwrap();
        assert_eq!(session.status(), SessionStatus::Completed);
        assert_eq!(session.exercises_completed, 2);
        assert_eq!(session.sets_completed, 5);
        assert_eq!(session.total_reps, 50);
        assert!((session.completion_percentage() - 66.67).abs() < 0.01);

        // Everything reached the store
        assert_eq!(engine.sync_status(), SyncHealth::Healthy);
        let stored = engine.store().load_session(id).unwrap().unwrap();
        assert_eq!(stored.version, session.version);
        assert_eq!(engine.store().set_logs(id).unwrap().len(), 5);
    }

    #[test]
    fn test_pause_resume_durations() {
        let (mut engine, clock) = engine();
        let id = engine.create_session("alex", "full_body_a", None).unwrap().id;

        engine.start_session(id).unwrap();
        clock.set(t(100));
        engine.pause_session(id).unwrap();
        clock.set(t(130));
        let resumed = engine.resume_session(id).unwrap();
        assert_eq!(resumed.status(), SessionStatus::Exercise);
        clock.set(t(500));
        let done = engine.complete_session(id).unwrap();

        assert_eq!(done.total_paused_seconds, 30);
        assert_eq!(done.total_duration_seconds, Some(500));
        assert_eq!(done.active_duration_seconds, Some(470));
        assert_eq!(done.pause_timestamps.len(), 1);
    }

    #[test]
    fn test_set_out_of_sequence() {
        let (mut engine, _clock) = engine();
        let id = engine.create_session("alex", "full_body_a", None).unwrap().id;
        engine.start_session(id).unwrap();
        let (_, log) = engine.start_exercise(id, 0).unwrap();

        let err = engine.complete_set(id, log.id, set(2, 10)).unwrap_err();
        assert!(matches!(
            err,
            Error::SetSequenceError {
                expected: 1,
                got: 2
            }
        ));
        // Nothing changed
        let session = engine.get_session(id).unwrap().unwrap();
        assert_eq!(session.sets_completed, 0);
        assert!(engine.set_logs(id).unwrap().is_empty());
    }

    #[test]
    fn test_second_exercise_while_one_active() {
        let (mut engine, _clock) = engine();
        let id = engine.create_session("alex", "full_body_a", None).unwrap().id;
        engine.start_session(id).unwrap();
        let (_, first) = engine.start_exercise(id, 0).unwrap();

        let err = engine.start_exercise(id, 1).unwrap_err();
        assert!(
            matches!(err, Error::ExerciseAlreadyActive { exercise_log_id } if exercise_log_id == first.id)
        );
    }

    #[test]
    fn test_pause_idle_session_is_invalid() {
        let (mut engine, _clock) = engine();
        let id = engine.create_session("alex", "full_body_a", None).unwrap().id;

        let err = engine.pause_session(id).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidTransition {
                from: SessionStatus::Idle,
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_ids() {
        let (mut engine, _clock) = engine();
        assert!(matches!(
            engine.create_session("alex", "nope", None),
            Err(Error::WorkoutNotFound(_))
        ));
        assert!(matches!(
            engine.start_session(Uuid::new_v4()),
            Err(Error::SessionNotFound(_))
        ));
        assert!(engine.get_session(Uuid::new_v4()).unwrap().is_none());

        let id = engine.create_session("alex", "full_body_a", None).unwrap().id;
        engine.start_session(id).unwrap();
        assert!(matches!(
            engine.start_exercise(id, 7),
            Err(Error::ExerciseNotFound { index: 7, .. })
        ));
    }

    #[test]
    fn test_one_active_session_per_user() {
        let (mut engine, _clock) = engine();
        let first = engine.create_session("alex", "full_body_a", None).unwrap();

        let err = engine
            .create_session("alex", "upper_push", None)
            .unwrap_err();
        assert!(matches!(err, Error::SessionAlreadyActive { session_id } if session_id == first.id));

        // Other users are unaffected
        engine.create_session("sam", "upper_push", None).unwrap();

        engine.cancel_session(first.id).unwrap();
        engine.create_session("alex", "upper_push", None).unwrap();
    }

    #[test]
    fn test_terminal_session_rejects_mutations() {
        let (mut engine, _clock) = engine();
        let id = engine.create_session("alex", "full_body_a", None).unwrap().id;
        engine.start_session(id).unwrap();
        let (_, log) = engine.start_exercise(id, 0).unwrap();
        engine.cancel_session(id).unwrap();

        for result in [
            engine.start_rest(id).map(|_| ()),
            engine.cancel_session(id).map(|_| ()),
            engine.complete_set(id, log.id, set(1, 10)).map(|_| ()),
            engine.complete_exercise(id, log.id).map(|_| ()),
        ] {
            assert!(matches!(
                result,
                Err(Error::SessionTerminated {
                    status: SessionStatus::Cancelled,
                    ..
                })
            ));
        }
        // Cancelling closed the open log rather than orphaning it
        let logs = engine.exercise_logs(id).unwrap();
        assert_eq!(logs[0].status, ExerciseStatus::Failed);
    }

    #[test]
    fn test_completing_closes_open_exercise() {
        let (mut engine, clock) = engine();
        let id = engine.create_session("alex", "full_body_a", None).unwrap().id;
        engine.start_session(id).unwrap();
        let (_, log) = engine.start_exercise(id, 0).unwrap();
        engine.complete_set(id, log.id, set(1, 10)).unwrap();
        clock.advance_secs(90);

        let session = engine.complete_session(id).unwrap();
        assert_eq!(session.status(), SessionStatus::Completed);
        assert_eq!(session.exercises_completed, 0);

        let closed = engine.store().exercise_logs(id).unwrap();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].status, ExerciseStatus::Failed);
        assert_eq!(closed[0].completed_at, Some(t(90)));
        assert!(closed[0]
            .failure_notes
            .as_deref()
            .unwrap()
            .contains("completed"));
        assert_eq!(engine.sync_status(), SyncHealth::Healthy);

        // A fresh engine reads the closed log back without complaint
        let (store, _queue) = engine.into_parts();
        let mut engine =
            SessionEngine::new(store, get_default_catalog(), clock, EngineConfig::default());
        let logs = engine.exercise_logs(id).unwrap();
        assert_eq!(logs[0].status, ExerciseStatus::Failed);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "in progress")]
    fn test_orphaned_exercise_log_asserts_on_load() {
        let (mut engine, clock) = engine();
        let id = engine.create_session("alex", "full_body_a", None).unwrap().id;
        engine.start_session(id).unwrap();
        let (_, log) = engine.start_exercise(id, 0).unwrap();
        engine.complete_session(id).unwrap();
        let (mut store, _queue) = engine.into_parts();

        // Reopen the log behind the engine's back
        let mut reopened = log;
        reopened.revision = 10;
        store.upsert_exercise_log(&reopened).unwrap();

        let mut engine =
            SessionEngine::new(store, get_default_catalog(), clock, EngineConfig::default());
        let _ = engine.get_session(id);
    }

    #[test]
    fn test_oversized_reps_rejected_without_touching_counters() {
        let (mut engine, _clock) = engine();
        let id = engine.create_session("alex", "full_body_a", None).unwrap().id;
        engine.start_session(id).unwrap();
        let (_, log) = engine.start_exercise(id, 0).unwrap();

        for _ in 0..2 {
            assert!(matches!(
                engine.complete_set(id, log.id, set(1, u32::MAX)),
                Err(Error::InvalidSetData(_))
            ));
        }
        let session = engine.get_session(id).unwrap().unwrap();
        assert_eq!(session.sets_completed, 0);
        assert_eq!(session.total_reps, 0);
        assert!(engine.set_logs(id).unwrap().is_empty());
    }

    #[test]
    fn test_failed_exercise_is_not_restartable() {
        let (mut engine, _clock) = engine();
        let id = engine.create_session("alex", "full_body_a", None).unwrap().id;
        engine.start_session(id).unwrap();
        let (_, log) = engine.start_exercise(id, 0).unwrap();

        let (session, failed) = engine
            .fail_exercise(id, log.id, Some("grip gave out".into()))
            .unwrap();
        assert_eq!(failed.status, ExerciseStatus::Failed);
        assert_eq!(session.exercises_completed, 0);

        assert!(matches!(
            engine.start_exercise(id, 0),
            Err(Error::ExerciseAlreadyLogged { index: 0 })
        ));
        assert!(matches!(
            engine.complete_exercise(id, log.id),
            Err(Error::ExerciseLogClosed { .. })
        ));
    }

    #[test]
    fn test_rest_toggle_and_telemetry() {
        let (mut engine, clock) = engine();
        let id = engine.create_session("alex", "full_body_a", None).unwrap().id;
        engine.start_session(id).unwrap();
        let (_, log) = engine.start_exercise(id, 0).unwrap();
        engine.complete_set(id, log.id, set(1, 10)).unwrap();

        let resting = engine.start_rest(id).unwrap();
        assert_eq!(resting.current_phase, Some(Phase::Rest));
        assert_eq!(resting.sets_completed, 1);

        clock.advance_secs(30);
        let snapshot = engine.tick(id).unwrap();
        assert_eq!(snapshot.timer_mode, TimerMode::Countdown);
        assert_eq!(snapshot.rest_remaining_seconds, Some(60));
        assert_eq!(engine.telemetry(id), Some(&snapshot));

        let back = engine.skip_rest(id).unwrap();
        assert_eq!(back.current_phase, Some(Phase::WorkingSet));
        assert_eq!(back.sets_completed, 1);
        assert_eq!(back.phase_started_at, Some(clock.now()));
    }

    #[test]
    fn test_tick_writes_are_debounced() {
        let (mut engine, clock) = engine();
        let id = engine.create_session("alex", "full_body_a", None).unwrap().id;
        let started = engine.start_session(id).unwrap();

        clock.advance_secs(1);
        engine.tick(id).unwrap();
        let session = engine.get_session(id).unwrap().unwrap();
        assert_eq!(session.version, started.version);

        clock.advance_secs(5);
        let snapshot = engine.tick(id).unwrap();
        assert_eq!(snapshot.phase_elapsed_seconds, 6);
        let session = engine.get_session(id).unwrap().unwrap();
        assert_eq!(session.version, started.version + 1);
        assert_eq!(session.real_time_data, Some(snapshot));
    }

    #[test]
    fn test_offline_calls_succeed_and_sync_later() {
        let (mut engine, clock) = engine();
        engine.store_mut().set_online(false);

        let session = engine.create_session("alex", "full_body_a", None).unwrap();
        let started = engine.start_session(session.id).unwrap();
        assert_eq!(started.status(), SessionStatus::Warmup);
        assert_eq!(engine.sync_status(), SyncHealth::Degraded { pending: 2 });

        engine.store_mut().set_online(true);
        clock.advance_secs(5);
        let report = engine.flush();
        assert_eq!(report.synced, 2);
        assert_eq!(engine.sync_status(), SyncHealth::Healthy);

        let stored = engine.store().load_session(session.id).unwrap().unwrap();
        assert_eq!(stored.version, started.version);
    }

    #[test]
    fn test_exhausted_writes_need_acknowledgement() {
        let (mut engine, clock) = engine();
        engine.store_mut().set_online(false);
        let id = engine.create_session("alex", "full_body_a", None).unwrap().id;

        for _ in 0..4 {
            clock.advance_secs(61);
            engine.flush();
        }
        match engine.sync_status() {
            SyncHealth::Fatal { failed } => {
                assert_eq!(failed.len(), 1);
                assert_eq!(failed[0].session_id, id);
                assert_eq!(failed[0].attempts, 5);
            }
            other => panic!("expected fatal sync status, got {:?}", other),
        }

        // The session itself is still usable in memory
        engine.start_session(id).unwrap();

        let dropped = engine.acknowledge_failed(id);
        assert_eq!(dropped.len(), 1);
        assert_eq!(engine.sync_status(), SyncHealth::Degraded { pending: 1 });
    }

    #[test]
    fn test_cancelled_session_still_drains_queue() {
        let (mut engine, clock) = engine();
        engine.store_mut().set_online(false);
        let id = engine.create_session("alex", "full_body_a", None).unwrap().id;
        engine.start_session(id).unwrap();
        let (_, log) = engine.start_exercise(id, 0).unwrap();
        engine.complete_set(id, log.id, set(1, 10)).unwrap();
        let cancelled = engine.cancel_session(id).unwrap();

        engine.store_mut().set_online(true);
        clock.advance_secs(5);
        engine.flush();
        assert_eq!(engine.sync_status(), SyncHealth::Healthy);

        let stored = engine.store().load_session(id).unwrap().unwrap();
        assert_eq!(stored.status(), SessionStatus::Cancelled);
        assert_eq!(stored.version, cancelled.version);
        assert_eq!(engine.store().set_logs(id).unwrap().len(), 1);
        let logs = engine.store().exercise_logs(id).unwrap();
        assert_eq!(logs[0].status, ExerciseStatus::Failed);
    }

    #[test]
    fn test_replayed_writes_are_duplicates() {
        let (mut engine, _clock) = engine();
        let session = engine.create_session("alex", "full_body_a", None).unwrap();
        let session = engine.start_session(session.id).unwrap();

        let outcome = engine.store_mut().save_session(&session).unwrap();
        assert_eq!(outcome, WriteOutcome::Duplicate);

        let mut older = session.clone();
        older.version -= 1;
        let outcome = engine.store_mut().save_session(&older).unwrap();
        assert_eq!(outcome, WriteOutcome::Stale);
    }

    #[test]
    fn test_new_engine_hydrates_from_store() {
        let (mut engine, clock) = engine();
        let id = engine.create_session("alex", "full_body_a", None).unwrap().id;
        engine.start_session(id).unwrap();
        let (_, log) = engine.start_exercise(id, 0).unwrap();
        engine.complete_set(id, log.id, set(1, 10)).unwrap();
        let (store, _queue) = engine.into_parts();

        let mut engine = SessionEngine::new(
            store,
            get_default_catalog(),
            clock.clone(),
            EngineConfig::default(),
        );
        let latest = engine.get_latest_session("alex").unwrap().unwrap();
        assert_eq!(latest.id, id);
        assert_eq!(latest.sets_completed, 1);

        assert!(matches!(
            engine.start_exercise(id, 1),
            Err(Error::ExerciseAlreadyActive { .. })
        ));
        assert!(matches!(
            engine.complete_set(id, log.id, set(3, 10)),
            Err(Error::SetSequenceError { expected: 2, .. })
        ));
        assert!(matches!(
            engine.create_session("alex", "upper_push", None),
            Err(Error::SessionAlreadyActive { .. })
        ));
    }

    #[test]
    fn test_queued_writes_overlay_stale_store() {
        let (mut engine, clock) = engine();
        engine.store_mut().set_online(false);
        let id = engine.create_session("alex", "full_body_a", None).unwrap().id;
        engine.start_session(id).unwrap();
        let (store, queue) = engine.into_parts();

        // Store is back but the old writes were never flushed
        let mut engine = SessionEngine::new(
            store,
            get_default_catalog(),
            clock.clone(),
            EngineConfig {
                auto_flush: false,
                ..EngineConfig::default()
            },
        )
        .with_queue(queue);
        engine.store_mut().set_online(true);

        let session = engine.get_session(id).unwrap().unwrap();
        assert_eq!(session.status(), SessionStatus::Warmup);
        assert_eq!(engine.queue().len(), 2);
    }

    #[test]
    fn test_synced_history_survives_restart() {
        let (mut engine, clock) = engine();
        engine.config.auto_flush = false;
        engine.create_session("alex", "full_body_a", None).unwrap();
        let item = engine.queue().items().next().unwrap().clone();
        engine.flush();
        let (store, queue) = engine.into_parts();
        assert!(queue.is_empty());

        let mut engine = SessionEngine::new(
            store,
            get_default_catalog(),
            clock.clone(),
            EngineConfig::default(),
        )
        .with_queue(queue);
        assert!(engine.queue().was_synced(item.id));
        // A stale copy of the same write is refused before reaching the store
        assert!(!engine.queue.enqueue_item(item));
        assert!(engine.queue().is_empty());
    }

    #[test]
    fn test_summary_after_completion() {
        let (mut engine, clock) = engine();
        let id = engine.create_session("alex", "full_body_a", None).unwrap().id;
        engine.start_session(id).unwrap();
        let (_, log) = engine.start_exercise(id, 0).unwrap();
        engine.complete_set(id, log.id, set(1, 10)).unwrap();

        assert!(matches!(
            engine.summarize(id, None),
            Err(Error::SessionNotCompleted(_))
        ));

        engine.complete_exercise(id, log.id).unwrap();
        clock.advance_secs(600);
        engine.complete_session(id).unwrap();

        let summary = engine.summarize(id, None).unwrap();
        assert_eq!(summary.total_sets, 1);
        assert_eq!(summary.total_reps, 10);
        assert_eq!(summary.total_volume_kg, 160.0);
        assert_eq!(summary.exercises_completed, 1);
        assert_eq!(summary.total_duration_seconds, 600);
    }

    #[test]
    fn test_evict_only_drained_finished_sessions() {
        let (mut engine, clock) = engine();
        let id = engine.create_session("alex", "full_body_a", None).unwrap().id;
        engine.start_session(id).unwrap();
        assert!(!engine.evict(id));

        engine.store_mut().set_online(false);
        engine.cancel_session(id).unwrap();
        assert!(!engine.evict(id));

        engine.store_mut().set_online(true);
        clock.advance_secs(5);
        engine.flush();
        assert!(engine.evict(id));
        assert!(engine.telemetry(id).is_none());

        // Still readable from the store
        let session = engine.get_session(id).unwrap().unwrap();
        assert_eq!(session.status(), SessionStatus::Cancelled);
    }

    #[test]
    fn test_latest_session_prefers_newest() {
        let (mut engine, clock) = engine();
        let first = engine.create_session("alex", "full_body_a", None).unwrap();
        engine.cancel_session(first.id).unwrap();
        clock.advance_secs(10);
        let second = engine.create_session("alex", "mobility_flow", None).unwrap();

        let latest = engine.get_latest_session("alex").unwrap().unwrap();
        assert_eq!(latest.id, second.id);
        assert!(engine.get_latest_session("nobody").unwrap().is_none());
    }
}
