//! Exercise and set log tracker.
//!
//! Append-only audit trail of what the user actually did. At most one
//! exercise log per session is in progress, set numbers climb by exactly
//! one per exercise log, and closed exercise logs and set logs are never
//! edited afterwards.

use crate::{
    Error, ExerciseLog, ExerciseStatus, PlannedExercise, Result, SetData, SetLog, SkipReason,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

/// In-memory logs, keyed by session
#[derive(Debug, Default)]
pub struct LogTracker {
    exercises: HashMap<Uuid, Vec<ExerciseLog>>,
    sets: HashMap<Uuid, Vec<SetLog>>,
}

impl LogTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace everything known about a session with records from the store
    pub fn hydrate(&mut self, session_id: Uuid, exercises: Vec<ExerciseLog>, sets: Vec<SetLog>) {
        let mut exercises = exercises;
        exercises.sort_by_key(|e| (e.started_at, e.order_index));
        let mut sets = sets;
        sets.sort_by_key(|s| (s.exercise_log_id, s.set_number));

        let active = exercises
            .iter()
            .filter(|e| e.status == ExerciseStatus::InProgress)
            .count();
        debug_assert!(
            active <= 1,
            "session {} loaded with {} in-progress exercise logs",
            session_id,
            active
        );
        if active > 1 {
            tracing::warn!(
                "Session {} loaded with {} in-progress exercise logs",
                session_id,
                active
            );
        }

        self.exercises.insert(session_id, exercises);
        self.sets.insert(session_id, sets);
    }

    pub fn forget(&mut self, session_id: Uuid) {
        self.exercises.remove(&session_id);
        self.sets.remove(&session_id);
    }

    pub fn exercise_logs(&self, session_id: Uuid) -> &[ExerciseLog] {
        self.exercises
            .get(&session_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn set_logs(&self, session_id: Uuid) -> &[SetLog] {
        self.sets.get(&session_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn exercise_log(&self, session_id: Uuid, log_id: Uuid) -> Option<&ExerciseLog> {
        self.exercise_logs(session_id).iter().find(|e| e.id == log_id)
    }

    pub fn active_exercise(&self, session_id: Uuid) -> Option<&ExerciseLog> {
        self.exercise_logs(session_id)
            .iter()
            .find(|e| e.status == ExerciseStatus::InProgress)
    }

    pub fn completed_exercise_count(&self, session_id: Uuid) -> usize {
        self.exercise_logs(session_id)
            .iter()
            .filter(|e| e.status == ExerciseStatus::Completed)
            .count()
    }

    pub fn set_count(&self, session_id: Uuid) -> usize {
        self.set_logs(session_id).len()
    }

    /// Highest set number recorded for an exercise log, 0 when none
    pub fn last_set_number(&self, session_id: Uuid, exercise_log_id: Uuid) -> u32 {
        self.set_logs(session_id)
            .iter()
            .filter(|s| s.exercise_log_id == exercise_log_id)
            .map(|s| s.set_number)
            .max()
            .unwrap_or(0)
    }

    /// Check that a new exercise may start, without recording anything
    pub fn check_can_begin(&self, session_id: Uuid, order_index: usize) -> Result<()> {
        if let Some(active) = self.active_exercise(session_id) {
            return Err(Error::ExerciseAlreadyActive {
                exercise_log_id: active.id,
            });
        }
        let already_logged = self
            .exercise_logs(session_id)
            .iter()
            .any(|e| e.order_index == order_index && e.status.is_terminal());
        if already_logged {
            return Err(Error::ExerciseAlreadyLogged { index: order_index });
        }
        Ok(())
    }

    /// Open an in-progress log for a planned exercise
    pub fn begin_exercise(
        &mut self,
        session_id: Uuid,
        planned: &PlannedExercise,
        now: DateTime<Utc>,
    ) -> Result<ExerciseLog> {
        self.check_can_begin(session_id, planned.order_index)?;

        let log = ExerciseLog {
            id: Uuid::new_v4(),
            session_id,
            exercise_id: planned.exercise_id.clone(),
            order_index: planned.order_index,
            status: ExerciseStatus::InProgress,
            target_sets: planned.target_sets,
            target_reps: planned.target_reps,
            target_duration_seconds: planned.target_duration_seconds,
            skip_reason: None,
            skip_notes: None,
            alternative_exercise_id: None,
            failure_notes: None,
            started_at: Some(now),
            completed_at: None,
            revision: 1,
        };

        tracing::debug!(
            "Exercise log {} started for '{}' (index {})",
            log.id,
            log.exercise_id,
            log.order_index
        );
        self.exercises.entry(session_id).or_default().push(log.clone());
        Ok(log)
    }

    /// Check that an exercise log may be closed, returning a copy of it
    pub fn check_open(&self, session_id: Uuid, log_id: Uuid) -> Result<ExerciseLog> {
        let log = self
            .exercise_log(session_id, log_id)
            .ok_or(Error::ExerciseLogNotFound(log_id))?;
        if log.status.is_terminal() {
            return Err(Error::ExerciseLogClosed {
                exercise_log_id: log_id,
                status: log.status,
            });
        }
        Ok(log.clone())
    }

    pub fn complete_exercise(
        &mut self,
        session_id: Uuid,
        log_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ExerciseLog> {
        self.close(session_id, log_id, now, |log| {
            log.status = ExerciseStatus::Completed;
        })
    }

    pub fn skip_exercise(
        &mut self,
        session_id: Uuid,
        log_id: Uuid,
        reason: SkipReason,
        notes: Option<String>,
        alternative_exercise_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ExerciseLog> {
        self.close(session_id, log_id, now, |log| {
            log.status = ExerciseStatus::Skipped;
            log.skip_reason = Some(reason);
            log.skip_notes = notes;
            log.alternative_exercise_id = alternative_exercise_id;
        })
    }

    pub fn fail_exercise(
        &mut self,
        session_id: Uuid,
        log_id: Uuid,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ExerciseLog> {
        self.close(session_id, log_id, now, |log| {
            log.status = ExerciseStatus::Failed;
            log.failure_notes = notes;
        })
    }

    fn close<F>(
        &mut self,
        session_id: Uuid,
        log_id: Uuid,
        now: DateTime<Utc>,
        f: F,
    ) -> Result<ExerciseLog>
    where
        F: FnOnce(&mut ExerciseLog),
    {
        self.check_open(session_id, log_id)?;
        let log = self
            .exercises
            .get_mut(&session_id)
            .and_then(|logs| logs.iter_mut().find(|e| e.id == log_id))
            .ok_or(Error::ExerciseLogNotFound(log_id))?;

        f(log);
        log.completed_at = Some(now);
        log.revision += 1;
        tracing::debug!("Exercise log {} closed as {:?}", log.id, log.status);
        Ok(log.clone())
    }

    /// Check a set against the sequence rules, returning its exercise log
    pub fn check_set(
        &self,
        session_id: Uuid,
        exercise_log_id: Uuid,
        data: &SetData,
    ) -> Result<ExerciseLog> {
        data.validate()?;
        let log = self.check_open(session_id, exercise_log_id)?;

        let expected = self.last_set_number(session_id, exercise_log_id) + 1;
        if data.set_number != expected {
            return Err(Error::SetSequenceError {
                expected,
                got: data.set_number,
            });
        }
        if data.set_number > log.target_sets {
            return Err(Error::SetLimitReached {
                target_sets: log.target_sets,
            });
        }
        Ok(log)
    }

    /// Append a set log
    pub fn record_set(
        &mut self,
        session_id: Uuid,
        exercise_log_id: Uuid,
        data: SetData,
        now: DateTime<Utc>,
    ) -> Result<SetLog> {
        self.check_set(session_id, exercise_log_id, &data)?;

        let set = SetLog {
            id: Uuid::new_v4(),
            session_id,
            exercise_log_id,
            set_number: data.set_number,
            reps_completed: data.reps_completed,
            weight_kg: data.weight_kg,
            duration_actual_seconds: data.duration_actual_seconds,
            rpe: data.rpe,
            form_quality: data.form_quality,
            notes: data.notes,
            completed_at: now,
        };

        tracing::debug!(
            "Set {} recorded for exercise log {} ({} reps)",
            set.set_number,
            exercise_log_id,
            set.reps_completed
        );
        self.sets.entry(session_id).or_default().push(set.clone());
        Ok(set)
    }
}
