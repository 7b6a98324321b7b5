//! Session summary builder.
//!
//! A summary is a pure function of a completed session, its logs and
//! optionally what the user achieved before. Inputs are put into a fixed
//! order and every float is rounded, so identical inputs always serialize
//! to identical bytes.

use crate::{
    Error, ExerciseLog, ExerciseStatus, Result, Session, SessionStatus, SetLog, SkipReason,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

const COMPLETION_WEIGHT: f64 = 0.5;
const VOLUME_WEIGHT: f64 = 0.3;
const CONSISTENCY_WEIGHT: f64 = 0.2;

/// RPE spread at which consistency bottoms out (half the 1-10 range)
const RPE_SPREAD_LIMIT: f64 = 4.5;

/// Best results from earlier sessions
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct HistoricalBests {
    /// Best single-set `weight × reps` per exercise id
    pub exercise_bests: BTreeMap<String, f64>,
    /// Total volume of each earlier session
    pub session_volumes: Vec<f64>,
}

impl HistoricalBests {
    pub fn from_summaries(summaries: &[SessionSummary]) -> Self {
        let mut bests = Self::default();
        for summary in summaries {
            bests.session_volumes.push(summary.total_volume_kg);
            for exercise in &summary.exercises {
                if let Some(value) = exercise.best_set_volume_kg {
                    bests.record_best(&exercise.exercise_id, value);
                }
            }
        }
        bests
    }

    pub fn record_best(&mut self, exercise_id: &str, value: f64) {
        let entry = self
            .exercise_bests
            .entry(exercise_id.to_string())
            .or_insert(value);
        if value > *entry {
            *entry = value;
        }
    }

    pub fn average_volume_kg(&self) -> Option<f64> {
        if self.session_volumes.is_empty() {
            return None;
        }
        Some(self.session_volumes.iter().sum::<f64>() / self.session_volumes.len() as f64)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ExerciseSummary {
    pub exercise_log_id: Uuid,
    pub exercise_id: String,
    pub order_index: usize,
    pub status: ExerciseStatus,
    pub sets_completed: u32,
    pub total_reps: u32,
    pub volume_kg: f64,
    pub best_set_volume_kg: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PersonalRecord {
    pub exercise_id: String,
    pub best_set_volume_kg: f64,
    pub previous_best_kg: Option<f64>,
}

/// Final report of a completed session
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub user_id: String,
    pub workout_id: String,
    pub completed_at: DateTime<Utc>,

    pub total_duration_seconds: i64,
    pub active_duration_seconds: i64,
    pub total_paused_seconds: i64,

    pub total_volume_kg: f64,
    pub total_reps: u32,
    pub total_sets: u32,
    pub average_rpe: Option<f64>,
    pub average_form_quality: Option<f64>,

    pub total_exercises: u32,
    pub exercises_completed: u32,
    pub exercises_skipped: u32,
    pub exercises_failed: u32,
    pub completion_percentage: f64,
    pub skip_reasons: BTreeMap<SkipReason, u32>,

    pub exercises: Vec<ExerciseSummary>,
    pub personal_records: Vec<PersonalRecord>,
    pub performance_score: f64,
}

/// Build the summary of a completed session
pub fn build_summary(
    session: &Session,
    exercise_logs: &[ExerciseLog],
    set_logs: &[SetLog],
    history: Option<&HistoricalBests>,
) -> Result<SessionSummary> {
    let completed_at = match session.completed_at() {
        Some(at) => at,
        None => return Err(Error::SessionNotCompleted(session.id)),
    };
    debug_assert_eq!(session.status(), SessionStatus::Completed);

    let mut logs: Vec<&ExerciseLog> = exercise_logs
        .iter()
        .filter(|l| l.session_id == session.id)
        .collect();
    logs.sort_by(|a, b| a.order_index.cmp(&b.order_index).then(a.id.cmp(&b.id)));

    let mut sets: Vec<&SetLog> = set_logs
        .iter()
        .filter(|s| s.session_id == session.id)
        .collect();
    sets.sort_by(|a, b| {
        a.exercise_log_id
            .cmp(&b.exercise_log_id)
            .then(a.set_number.cmp(&b.set_number))
    });

    let exercises: Vec<ExerciseSummary> = logs
        .iter()
        .map(|log| summarize_exercise(log, &sets))
        .collect();

    let total_volume: f64 = exercises.iter().map(|e| e.volume_kg).sum();
    let total_reps = sets
        .iter()
        .fold(0u32, |total, s| total.saturating_add(s.reps_completed));

    let rpes: Vec<f64> = sets.iter().filter_map(|s| s.rpe).map(f64::from).collect();
    let forms: Vec<f64> = sets
        .iter()
        .filter_map(|s| s.form_quality)
        .map(f64::from)
        .collect();

    let count = |status: ExerciseStatus| logs.iter().filter(|l| l.status == status).count() as u32;
    let exercises_completed = count(ExerciseStatus::Completed);

    let mut skip_reasons = BTreeMap::new();
    for log in &logs {
        if let (ExerciseStatus::Skipped, Some(reason)) = (log.status, log.skip_reason) {
            *skip_reasons.entry(reason).or_insert(0) += 1;
        }
    }

    let completion_rate = if session.total_exercises == 0 {
        0.0
    } else {
        f64::from(exercises_completed) / f64::from(session.total_exercises)
    };

    let personal_records = detect_personal_records(&exercises, history);
    let performance_score = performance_score(
        completion_rate,
        total_volume,
        history.and_then(HistoricalBests::average_volume_kg),
        &rpes,
    );

    Ok(SessionSummary {
        session_id: session.id,
        user_id: session.user_id.clone(),
        workout_id: session.workout_id.clone(),
        completed_at,
        total_duration_seconds: session.total_duration_seconds.unwrap_or(0),
        active_duration_seconds: session.active_duration_seconds.unwrap_or(0),
        total_paused_seconds: session.total_paused_seconds,
        total_volume_kg: round2(total_volume),
        total_reps,
        total_sets: sets.len() as u32,
        average_rpe: mean(&rpes).map(round2),
        average_form_quality: mean(&forms).map(round2),
        total_exercises: session.total_exercises,
        exercises_completed,
        exercises_skipped: count(ExerciseStatus::Skipped),
        exercises_failed: count(ExerciseStatus::Failed),
        completion_percentage: round2(completion_rate * 100.0),
        skip_reasons,
        exercises,
        personal_records,
        performance_score,
    })
}

fn summarize_exercise(log: &ExerciseLog, sets: &[&SetLog]) -> ExerciseSummary {
    let own: Vec<&&SetLog> = sets.iter().filter(|s| s.exercise_log_id == log.id).collect();
    let volume: f64 = own.iter().filter_map(|s| s.volume_kg()).sum();
    let best = own
        .iter()
        .filter_map(|s| s.volume_kg())
        .fold(None, |best: Option<f64>, v| Some(best.map_or(v, |b| b.max(v))));

    ExerciseSummary {
        exercise_log_id: log.id,
        exercise_id: log.exercise_id.clone(),
        order_index: log.order_index,
        status: log.status,
        sets_completed: own.len() as u32,
        total_reps: own
            .iter()
            .fold(0u32, |total, s| total.saturating_add(s.reps_completed)),
        volume_kg: round2(volume),
        best_set_volume_kg: best.map(round2),
    }
}

/// An exercise sets a record when its best set beats every earlier one.
/// The first weighted result for an exercise counts as a record.
fn detect_personal_records(
    exercises: &[ExerciseSummary],
    history: Option<&HistoricalBests>,
) -> Vec<PersonalRecord> {
    let mut bests: BTreeMap<&str, f64> = BTreeMap::new();
    for exercise in exercises {
        if let Some(value) = exercise.best_set_volume_kg {
            let entry = bests.entry(exercise.exercise_id.as_str()).or_insert(value);
            if value > *entry {
                *entry = value;
            }
        }
    }

    bests
        .into_iter()
        .filter(|(_, value)| *value > 0.0)
        .filter_map(|(exercise_id, value)| {
            let previous = history.and_then(|h| h.exercise_bests.get(exercise_id).copied());
            match previous {
                Some(prev) if value <= prev => None,
                _ => Some(PersonalRecord {
                    exercise_id: exercise_id.to_string(),
                    best_set_volume_kg: value,
                    previous_best_kg: previous,
                }),
            }
        })
        .collect()
}

/// Composite score in `[0, 100]`.
///
/// Completion counts for half, volume against the historical average for
/// 30%, and RPE consistency for 20%. Without history the volume term falls
/// back to the completion rate.
pub fn performance_score(
    completion_rate: f64,
    total_volume_kg: f64,
    historical_average_kg: Option<f64>,
    rpes: &[f64],
) -> f64 {
    let volume = match historical_average_kg {
        Some(avg) if avg > 0.0 => (total_volume_kg / avg).min(1.0),
        _ => completion_rate,
    };

    let consistency = match std_dev(rpes) {
        Some(sd) => 1.0 - (sd / RPE_SPREAD_LIMIT).min(1.0),
        None => 1.0,
    };

    let raw = COMPLETION_WEIGHT * completion_rate
        + VOLUME_WEIGHT * volume
        + CONSISTENCY_WEIGHT * consistency;
    round2((raw * 100.0).clamp(0.0, 100.0))
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Population standard deviation; needs at least two samples
fn std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    Some(var.sqrt())
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
