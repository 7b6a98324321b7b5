//! Session state machine.
//!
//! Every transition is a pure function of the current session snapshot, an
//! event and the time it happened. The result is the next snapshot plus a
//! list of effects describing what changed, so the engine can log and
//! persist without the machine touching any store.
//!
//! Legal top-level transitions:
//!
//! ```text
//! idle -> warmup -> exercise <-> rest
//! warmup|exercise|rest -> paused -> exercise|rest
//! warmup|exercise|rest|paused -> completed
//! any non-terminal -> cancelled
//! ```

use crate::ledger;
use crate::{Error, Phase, PauseTimestamp, Result, Session, SessionState, SessionStatus};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Something that happened to a session
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    Start,
    Pause,
    Resume,
    Complete,
    Cancel,
    StartRest,
    SkipRest,
    ExerciseStarted { index: usize },
    ExerciseCompleted,
    ExerciseSkipped,
    ExerciseFailed,
    SetCompleted { set_number: u32, reps: u32 },
}

/// Observable consequence of a transition
#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    StatusChanged {
        from: SessionStatus,
        to: SessionStatus,
    },
    PhaseChanged {
        from: Option<Phase>,
        to: Option<Phase>,
    },
    PauseClosed(PauseTimestamp),
    CountersChanged,
}

/// Next snapshot plus what changed
#[derive(Clone, Debug)]
pub struct Transition {
    pub session: Session,
    pub effects: Vec<Effect>,
}

/// Apply one event to a session snapshot
pub fn apply(session: &Session, event: &SessionEvent, now: DateTime<Utc>) -> Result<Transition> {
    let from = session.status();
    if from.is_terminal() {
        return Err(Error::SessionTerminated {
            session_id: session.id,
            status: from,
        });
    }

    let mut next = session.clone();
    let mut effects = Vec::new();

    match event {
        SessionEvent::Start => {
            require(from, &[SessionStatus::Idle], "start")?;
            next.state = SessionState::Warmup;
            next.started_at = Some(now);
            set_phase(&mut next, Some(Phase::Warmup), now, &mut effects);
        }

        SessionEvent::Pause => {
            require_active(from, "pause")?;
            next.state = SessionState::Paused { paused_at: now };
        }

        SessionEvent::Resume => {
            let paused_at = match session.state {
                SessionState::Paused { paused_at } => paused_at,
                _ => {
                    return Err(Error::InvalidTransition {
                        from,
                        action: "resume",
                    })
                }
            };
            let pause = close_open_pause(&mut next, paused_at, now, &mut effects);

            // Phase timers exclude the time spent paused
            if let Some(started) = next.phase_started_at {
                next.phase_started_at = Some(started + Duration::seconds(pause.duration_seconds));
            }
            next.resumed_at = Some(now);
            next.state = if next.current_phase == Some(Phase::Rest) {
                SessionState::Rest
            } else {
                SessionState::Exercise
            };
        }

        SessionEvent::Complete => {
            require(
                from,
                &[
                    SessionStatus::Warmup,
                    SessionStatus::Exercise,
                    SessionStatus::Rest,
                    SessionStatus::Paused,
                ],
                "complete",
            )?;
            if let SessionState::Paused { paused_at } = session.state {
                close_open_pause(&mut next, paused_at, now, &mut effects);
            }
            let total = ledger::elapsed_since(next.started_at, now);
            next.total_duration_seconds = Some(total);
            next.active_duration_seconds =
                Some(ledger::active_duration(total, next.total_paused_seconds));
            next.state = SessionState::Completed { completed_at: now };
        }

        SessionEvent::Cancel => {
            if let SessionState::Paused { paused_at } = session.state {
                close_open_pause(&mut next, paused_at, now, &mut effects);
            }
            if next.started_at.is_some() {
                let total = ledger::elapsed_since(next.started_at, now);
                next.total_duration_seconds = Some(total);
                next.active_duration_seconds =
                    Some(ledger::active_duration(total, next.total_paused_seconds));
            }
            next.state = SessionState::Cancelled { cancelled_at: now };
        }

        SessionEvent::StartRest => {
            require(from, &[SessionStatus::Exercise], "start rest in")?;
            next.state = SessionState::Rest;
            set_phase(&mut next, Some(Phase::Rest), now, &mut effects);
        }

        SessionEvent::SkipRest => {
            require(from, &[SessionStatus::Rest], "skip rest in")?;
            next.state = SessionState::Exercise;
            set_phase(&mut next, Some(Phase::WorkingSet), now, &mut effects);
        }

        SessionEvent::ExerciseStarted { index } => {
            require_active(from, "start an exercise in")?;
            next.state = SessionState::Exercise;
            next.current_exercise_index = Some(*index);
            next.current_set_index = 0;
            set_phase(&mut next, Some(Phase::WorkingSet), now, &mut effects);
        }

        SessionEvent::ExerciseCompleted => {
            require_active(from, "complete an exercise in")?;
            if next.exercises_completed >= next.total_exercises {
                return Err(Error::Consistency(format!(
                    "session {} already completed {} of {} exercises",
                    next.id, next.exercises_completed, next.total_exercises
                )));
            }
            next.exercises_completed += 1;
            effects.push(Effect::CountersChanged);
        }

        SessionEvent::ExerciseSkipped | SessionEvent::ExerciseFailed => {
            require_active(from, "close an exercise in")?;
        }

        SessionEvent::SetCompleted { set_number, reps } => {
            require(
                from,
                &[SessionStatus::Exercise, SessionStatus::Rest],
                "complete a set in",
            )?;
            if next.sets_completed >= next.total_sets {
                return Err(Error::Consistency(format!(
                    "session {} already completed {} of {} sets",
                    next.id, next.sets_completed, next.total_sets
                )));
            }
            next.total_reps = next.total_reps.checked_add(*reps).ok_or_else(|| {
                Error::Consistency(format!(
                    "session {} rep counter overflows adding {}",
                    next.id, reps
                ))
            })?;
            next.sets_completed += 1;
            next.current_set_index = *set_number;
            effects.push(Effect::CountersChanged);
        }
    }

    let to = next.status();
    if from != to {
        effects.insert(0, Effect::StatusChanged { from, to });
    }
    next.version += 1;
    next.updated_at = now;

    Ok(Transition {
        session: next,
        effects,
    })
}

/// Fold a sequence of timestamped events over a starting snapshot
pub fn replay(initial: &Session, events: &[(SessionEvent, DateTime<Utc>)]) -> Result<Session> {
    events
        .iter()
        .try_fold(initial.clone(), |session, (event, at)| {
            apply(&session, event, *at).map(|t| t.session)
        })
}

fn require(from: SessionStatus, allowed: &[SessionStatus], action: &'static str) -> Result<()> {
    if allowed.contains(&from) {
        Ok(())
    } else {
        Err(Error::InvalidTransition { from, action })
    }
}

fn require_active(from: SessionStatus, action: &'static str) -> Result<()> {
    require(
        from,
        &[
            SessionStatus::Warmup,
            SessionStatus::Exercise,
            SessionStatus::Rest,
        ],
        action,
    )
}

fn set_phase(
    session: &mut Session,
    phase: Option<Phase>,
    now: DateTime<Utc>,
    effects: &mut Vec<Effect>,
) {
    if session.current_phase != phase {
        effects.push(Effect::PhaseChanged {
            from: session.current_phase,
            to: phase,
        });
    }
    session.current_phase = phase;
    session.phase_started_at = Some(now);
}

fn close_open_pause(
    session: &mut Session,
    paused_at: DateTime<Utc>,
    now: DateTime<Utc>,
    effects: &mut Vec<Effect>,
) -> PauseTimestamp {
    let pause = ledger::close_pause(paused_at, now);
    session.pause_timestamps.push(pause.clone());
    session.total_paused_seconds = ledger::total_paused(&session.pause_timestamps);
    effects.push(Effect::PauseClosed(pause.clone()));
    pause
}
