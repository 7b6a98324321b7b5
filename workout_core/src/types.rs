//! Core domain types for the workout session engine.
//!
//! This module defines the records the engine owns and persists:
//! - Sessions and their explicit state
//! - Exercise and set logs
//! - Pause intervals and the realtime telemetry snapshot
//! - Workout plans read from the catalog

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Session State
// ============================================================================

/// Flat discriminant of [`SessionState`], used for display and errors
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Warmup,
    Exercise,
    Rest,
    Paused,
    Completed,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Warmup => "warmup",
            SessionStatus::Exercise => "exercise",
            SessionStatus::Rest => "rest",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
        }
    }
}

/// Top-level session state; timestamps that only make sense in one state
/// live on that variant.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Warmup,
    Exercise,
    Rest,
    Paused { paused_at: DateTime<Utc> },
    Completed { completed_at: DateTime<Utc> },
    Cancelled { cancelled_at: DateTime<Utc> },
}

impl SessionState {
    pub fn status(&self) -> SessionStatus {
        match self {
            SessionState::Idle => SessionStatus::Idle,
            SessionState::Warmup => SessionStatus::Warmup,
            SessionState::Exercise => SessionStatus::Exercise,
            SessionState::Rest => SessionStatus::Rest,
            SessionState::Paused { .. } => SessionStatus::Paused,
            SessionState::Completed { .. } => SessionStatus::Completed,
            SessionState::Cancelled { .. } => SessionStatus::Cancelled,
        }
    }
}

/// Sub-state inside an active session
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Warmup,
    WorkingSet,
    Rest,
}

/// One closed pause interval
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PauseTimestamp {
    pub paused_at: DateTime<Utc>,
    pub resumed_at: DateTime<Utc>,
    pub duration_seconds: i64,
}

// ============================================================================
// Telemetry Snapshot
// ============================================================================

/// How a caller should render the running timer
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimerMode {
    Stopped,
    Stopwatch,
    Countdown,
}

/// Denormalized counters for low-latency reads.
///
/// Always rebuildable from the session and its logs.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RealTimeSessionData {
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub current_exercise_index: Option<usize>,
    pub current_set_index: u32,
    pub current_phase: Option<Phase>,
    pub phase_elapsed_seconds: i64,
    pub elapsed_seconds: i64,
    pub paused_seconds: i64,
    pub rest_remaining_seconds: Option<i64>,
    pub exercises_completed: u32,
    pub sets_completed: u32,
    pub total_reps: u32,
    pub timer_mode: TimerMode,
    pub last_updated_at: DateTime<Utc>,
}

// ============================================================================
// Session
// ============================================================================

/// One attempt at a workout
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: Uuid,
    pub user_id: String,
    pub workout_id: String,
    pub state: SessionState,
    pub current_phase: Option<Phase>,
    pub phase_started_at: Option<DateTime<Utc>>,
    pub current_exercise_index: Option<usize>,
    pub current_set_index: u32,

    pub total_exercises: u32,
    pub exercises_completed: u32,
    pub total_sets: u32,
    pub sets_completed: u32,
    pub total_reps: u32,

    pub created_at: DateTime<Utc>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub resumed_at: Option<DateTime<Utc>>,
    pub total_paused_seconds: i64,
    pub total_duration_seconds: Option<i64>,
    pub active_duration_seconds: Option<i64>,
    pub pause_timestamps: Vec<PauseTimestamp>,

    pub real_time_data: Option<RealTimeSessionData>,

    /// Bumped on every write; the store rejects anything not newer
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create a session in `idle` for the given plan totals
    pub fn new(
        user_id: impl Into<String>,
        plan: &WorkoutPlan,
        scheduled_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            workout_id: plan.id.clone(),
            state: SessionState::Idle,
            current_phase: None,
            phase_started_at: None,
            current_exercise_index: None,
            current_set_index: 0,
            total_exercises: plan.exercises.len() as u32,
            exercises_completed: 0,
            total_sets: plan.total_sets(),
            sets_completed: 0,
            total_reps: 0,
            created_at: now,
            scheduled_at,
            started_at: None,
            resumed_at: None,
            total_paused_seconds: 0,
            total_duration_seconds: None,
            active_duration_seconds: None,
            pause_timestamps: Vec::new(),
            real_time_data: None,
            version: 1,
            updated_at: now,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.state.status()
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// Start of the pause currently in progress, if any
    pub fn paused_at(&self) -> Option<DateTime<Utc>> {
        match self.state {
            SessionState::Paused { paused_at } => Some(paused_at),
            _ => None,
        }
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        match self.state {
            SessionState::Completed { completed_at } => Some(completed_at),
            _ => None,
        }
    }

    pub fn cancelled_at(&self) -> Option<DateTime<Utc>> {
        match self.state {
            SessionState::Cancelled { cancelled_at } => Some(cancelled_at),
            _ => None,
        }
    }

    /// Live completion percentage; 0 for an empty workout
    pub fn completion_percentage(&self) -> f64 {
        if self.total_exercises == 0 {
            return 0.0;
        }
        f64::from(self.exercises_completed) / f64::from(self.total_exercises) * 100.0
    }
}

// ============================================================================
// Exercise and Set Logs
// ============================================================================

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExerciseStatus {
    Pending,
    InProgress,
    Completed,
    Skipped,
    Failed,
}

impl ExerciseStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExerciseStatus::Completed | ExerciseStatus::Skipped | ExerciseStatus::Failed
        )
    }
}

/// Why an exercise was skipped
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Injury,
    Pain,
    EquipmentUnavailable,
    TooDifficult,
    TimeConstraint,
    Other,
}

impl std::str::FromStr for SkipReason {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "injury" => Ok(SkipReason::Injury),
            "pain" => Ok(SkipReason::Pain),
            "equipment" | "equipment_unavailable" => Ok(SkipReason::EquipmentUnavailable),
            "too_difficult" | "difficult" => Ok(SkipReason::TooDifficult),
            "time" | "time_constraint" => Ok(SkipReason::TimeConstraint),
            "other" => Ok(SkipReason::Other),
            other => Err(Error::Other(format!("Unknown skip reason: {}", other))),
        }
    }
}

/// One exercise attempt within a session
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ExerciseLog {
    pub id: Uuid,
    pub session_id: Uuid,
    pub exercise_id: String,
    pub order_index: usize,
    pub status: ExerciseStatus,
    pub target_sets: u32,
    pub target_reps: Option<u32>,
    pub target_duration_seconds: Option<u32>,
    pub skip_reason: Option<SkipReason>,
    pub skip_notes: Option<String>,
    pub alternative_exercise_id: Option<String>,
    pub failure_notes: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Bumped on each status change so replays cannot regress the record
    pub revision: u32,
}

/// Upper bound on reps reported for a single set
pub const MAX_REPS_PER_SET: u32 = 1000;

/// What the caller reports for a finished set
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SetData {
    pub set_number: u32,
    pub reps_completed: u32,
    pub weight_kg: Option<f64>,
    pub duration_actual_seconds: Option<u32>,
    pub rpe: Option<u8>,
    pub form_quality: Option<u8>,
    pub notes: Option<String>,
}

impl SetData {
    pub fn validate(&self) -> Result<()> {
        if self.reps_completed > MAX_REPS_PER_SET {
            return Err(Error::InvalidSetData(format!(
                "reps_completed {} above {}",
                self.reps_completed, MAX_REPS_PER_SET
            )));
        }
        if let Some(rpe) = self.rpe {
            if !(1..=10).contains(&rpe) {
                return Err(Error::InvalidSetData(format!("rpe {} outside 1-10", rpe)));
            }
        }
        if let Some(form) = self.form_quality {
            if !(1..=5).contains(&form) {
                return Err(Error::InvalidSetData(format!(
                    "form_quality {} outside 1-5",
                    form
                )));
            }
        }
        if let Some(weight) = self.weight_kg {
            if !weight.is_finite() || weight < 0.0 {
                return Err(Error::InvalidSetData(format!("weight_kg {} is invalid", weight)));
            }
        }
        Ok(())
    }
}

/// Immutable record of one completed set
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SetLog {
    pub id: Uuid,
    pub session_id: Uuid,
    pub exercise_log_id: Uuid,
    pub set_number: u32,
    pub reps_completed: u32,
    pub weight_kg: Option<f64>,
    pub duration_actual_seconds: Option<u32>,
    pub rpe: Option<u8>,
    pub form_quality: Option<u8>,
    pub notes: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl SetLog {
    /// `weight_kg × reps`, only for weighted sets
    pub fn volume_kg(&self) -> Option<f64> {
        self.weight_kg.map(|w| w * f64::from(self.reps_completed))
    }
}

// ============================================================================
// Workout Plans
// ============================================================================

/// One planned exercise in a workout
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PlannedExercise {
    pub exercise_id: String,
    pub name: String,
    pub order_index: usize,
    pub target_sets: u32,
    #[serde(default)]
    pub target_reps: Option<u32>,
    #[serde(default)]
    pub target_duration_seconds: Option<u32>,
    pub rest_seconds: u32,
}

/// An ordered list of planned exercises
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WorkoutPlan {
    pub id: String,
    pub name: String,
    pub exercises: Vec<PlannedExercise>,
}

impl WorkoutPlan {
    pub fn total_sets(&self) -> u32 {
        self.exercises
            .iter()
            .fold(0u32, |total, e| total.saturating_add(e.target_sets))
    }
}
