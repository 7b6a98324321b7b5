//! Realtime telemetry cache.
//!
//! Holds the latest counters per session for sub-second UI reads. The cache
//! is last-writer-wins on `last_updated_at`: an older snapshot (for example
//! one read back from the durable store) never replaces a newer one.

use crate::ledger::elapsed_since;
use crate::{Phase, RealTimeSessionData, Session, SessionStatus, TimerMode};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use uuid::Uuid;

/// Build a snapshot of a session as of `now`.
///
/// `rest_target_seconds` is the planned rest for the current exercise.
pub fn capture(
    session: &Session,
    rest_target_seconds: Option<u32>,
    now: DateTime<Utc>,
) -> RealTimeSessionData {
    let status = session.status();

    // Timers freeze while paused and once the session has ended
    let reference = session
        .paused_at()
        .or_else(|| session.completed_at())
        .or_else(|| session.cancelled_at())
        .unwrap_or(now);

    let open_pause = elapsed_since(session.paused_at(), now);
    let phase_elapsed = elapsed_since(session.phase_started_at, reference);

    let in_rest = session.current_phase == Some(Phase::Rest)
        && matches!(status, SessionStatus::Rest | SessionStatus::Paused);
    let rest_remaining = match (in_rest, rest_target_seconds) {
        (true, Some(target)) => Some((i64::from(target) - phase_elapsed).max(0)),
        _ => None,
    };

    let timer_mode = match status {
        SessionStatus::Rest => TimerMode::Countdown,
        SessionStatus::Warmup | SessionStatus::Exercise => TimerMode::Stopwatch,
        _ => TimerMode::Stopped,
    };

    RealTimeSessionData {
        session_id: session.id,
        status,
        current_exercise_index: session.current_exercise_index,
        current_set_index: session.current_set_index,
        current_phase: session.current_phase,
        phase_elapsed_seconds: phase_elapsed,
        elapsed_seconds: session
            .total_duration_seconds
            .unwrap_or_else(|| elapsed_since(session.started_at, now)),
        paused_seconds: session.total_paused_seconds + open_pause,
        rest_remaining_seconds: rest_remaining,
        exercises_completed: session.exercises_completed,
        sets_completed: session.sets_completed,
        total_reps: session.total_reps,
        timer_mode,
        last_updated_at: now,
    }
}

/// Latest snapshot per session, with debounce bookkeeping for store writes
#[derive(Debug)]
pub struct TelemetryCache {
    entries: HashMap<Uuid, RealTimeSessionData>,
    last_persisted: HashMap<Uuid, DateTime<Utc>>,
    debounce: Duration,
}

impl TelemetryCache {
    pub fn new(debounce: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            last_persisted: HashMap::new(),
            debounce,
        }
    }

    pub fn get(&self, session_id: Uuid) -> Option<&RealTimeSessionData> {
        self.entries.get(&session_id)
    }

    /// Merge a snapshot; returns false if it was older than what we hold
    pub fn update(&mut self, snapshot: RealTimeSessionData) -> bool {
        match self.entries.get(&snapshot.session_id) {
            Some(current) if current.last_updated_at > snapshot.last_updated_at => {
                tracing::debug!(
                    "Ignoring stale telemetry for {} ({} < {})",
                    snapshot.session_id,
                    snapshot.last_updated_at,
                    current.last_updated_at
                );
                false
            }
            _ => {
                self.entries.insert(snapshot.session_id, snapshot);
                true
            }
        }
    }

    /// Whether enough time has passed to write telemetry to the store again
    pub fn due_for_write(&self, session_id: Uuid, now: DateTime<Utc>) -> bool {
        match self.last_persisted.get(&session_id) {
            Some(last) => now - *last >= self.debounce,
            None => true,
        }
    }

    pub fn mark_persisted(&mut self, session_id: Uuid, at: DateTime<Utc>) {
        self.last_persisted.insert(session_id, at);
    }

    pub fn remove(&mut self, session_id: Uuid) {
        self.entries.remove(&session_id);
        self.last_persisted.remove(&session_id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::{apply, SessionEvent};
    use crate::{PlannedExercise, WorkoutPlan};

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn session() -> Session {
        let plan = WorkoutPlan {
            id: "plan".into(),
            name: "Plan".into(),
            exercises: vec![PlannedExercise {
                exercise_id: "squat".into(),
                name: "Squat".into(),
                order_index: 0,
                target_sets: 3,
                target_reps: Some(5),
                target_duration_seconds: None,
                rest_seconds: 90,
            }],
        };
        Session::new("user", &plan, None, t(0))
    }

    fn step(s: &Session, event: SessionEvent, at: i64) -> Session {
        apply(s, &event, t(at)).unwrap().session
    }

    #[test]
    fn test_rest_countdown() {
        let s = step(&session(), SessionEvent::Start, 0);
        let s = step(&s, SessionEvent::ExerciseStarted { index: 0 }, 10);
        let s = step(&s, SessionEvent::StartRest, 60);

        let snap = capture(&s, Some(90), t(100));
        assert_eq!(snap.timer_mode, TimerMode::Countdown);
        assert_eq!(snap.phase_elapsed_seconds, 40);
        assert_eq!(snap.rest_remaining_seconds, Some(50));
        assert_eq!(snap.elapsed_seconds, 100);

        let late = capture(&s, Some(90), t(500));
        assert_eq!(late.rest_remaining_seconds, Some(0));
    }

    #[test]
    fn test_paused_timers_freeze() {
        let s = step(&session(), SessionEvent::Start, 0);
        let s = step(&s, SessionEvent::ExerciseStarted { index: 0 }, 10);
        let s = step(&s, SessionEvent::Pause, 30);

        let snap = capture(&s, Some(90), t(50));
        assert_eq!(snap.timer_mode, TimerMode::Stopped);
        assert_eq!(snap.phase_elapsed_seconds, 20);
        assert_eq!(snap.paused_seconds, 20);
        assert_eq!(snap.rest_remaining_seconds, None);
    }

    #[test]
    fn test_cache_never_regresses() {
        let s = step(&session(), SessionEvent::Start, 0);
        let mut cache = TelemetryCache::new(Duration::seconds(2));

        assert!(cache.update(capture(&s, None, t(20))));
        assert!(!cache.update(capture(&s, None, t(10))));
        assert_eq!(cache.get(s.id).unwrap().last_updated_at, t(20));

        assert!(cache.update(capture(&s, None, t(20))));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_debounce_window() {
        let id = Uuid::new_v4();
        let mut cache = TelemetryCache::new(Duration::seconds(2));
        assert!(cache.due_for_write(id, t(0)));

        cache.mark_persisted(id, t(0));
        assert!(!cache.due_for_write(id, t(1)));
        assert!(cache.due_for_write(id, t(2)));

        cache.remove(id);
        assert!(cache.due_for_write(id, t(1)));
    }
}
