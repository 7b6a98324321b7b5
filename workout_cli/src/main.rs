use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;
use workout_core::sync::SyncPolicy;
use workout_core::*;

type Engine<'a> = SessionEngine<FileStore, &'a StaticCatalog, SystemClock>;

#[derive(Parser)]
#[command(name = "lift")]
#[command(about = "Workout session tracker", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Print records as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List available workouts
    Workouts,

    /// Create an idle session
    Create {
        #[arg(long)]
        user: String,

        #[arg(long)]
        workout: String,

        /// When the session is planned for (RFC 3339)
        #[arg(long)]
        scheduled_at: Option<DateTime<Utc>>,
    },

    /// Start a session (warmup)
    Start { session: Uuid },

    Pause { session: Uuid },

    Resume { session: Uuid },

    /// Finish a session
    Complete { session: Uuid },

    /// Abandon a session
    Cancel { session: Uuid },

    /// Start, complete, skip or fail an exercise
    #[command(subcommand)]
    Exercise(ExerciseCommand),

    /// Record a completed set
    Set {
        session: Uuid,

        /// Exercise log the set belongs to
        #[arg(long)]
        log: Uuid,

        #[arg(long)]
        number: u32,

        #[arg(long)]
        reps: u32,

        #[arg(long)]
        weight: Option<f64>,

        /// Actual duration in seconds, for timed exercises
        #[arg(long)]
        duration: Option<u32>,

        /// Rate of perceived exertion (1-10)
        #[arg(long)]
        rpe: Option<u8>,

        /// Form quality (1-5)
        #[arg(long)]
        form: Option<u8>,

        #[arg(long)]
        notes: Option<String>,
    },

    /// Start or skip a rest period
    #[command(subcommand)]
    Rest(RestCommand),

    /// Show a session with its logs
    Show { session: Uuid },

    /// Show a user's most recent session
    Latest {
        #[arg(long)]
        user: String,
    },

    /// Summarize a completed session
    Summary {
        session: Uuid,

        /// Append the summary to the history archive
        #[arg(long)]
        archive: bool,
    },

    /// Replay queued writes and report sync health
    Sync {
        /// Drop exhausted writes of this session
        #[arg(long)]
        ack: Option<Uuid>,

        /// Retry exhausted writes of this session
        #[arg(long, conflicts_with = "ack")]
        requeue: Option<Uuid>,
    },
}

#[derive(Subcommand)]
enum ExerciseCommand {
    Start {
        session: Uuid,

        /// Position of the exercise in the workout
        #[arg(long)]
        index: usize,
    },

    Complete {
        session: Uuid,

        #[arg(long)]
        log: Uuid,
    },

    Skip {
        session: Uuid,

        #[arg(long)]
        log: Uuid,

        /// injury, pain, equipment, difficult, time or other
        #[arg(long)]
        reason: SkipReason,

        #[arg(long)]
        notes: Option<String>,

        /// Exercise done instead
        #[arg(long)]
        alternative: Option<String>,
    },

    Fail {
        session: Uuid,

        #[arg(long)]
        log: Uuid,

        #[arg(long)]
        notes: Option<String>,
    },
}

#[derive(Subcommand)]
enum RestCommand {
    Start { session: Uuid },
    Skip { session: Uuid },
}

fn main() -> Result<()> {
    workout_core::logging::init_with_level("warn");

    let cli = Cli::parse();

    let config = Config::load()?;
    let data_dir = cli.data_dir.clone().unwrap_or_else(|| config.data.data_dir.clone());
    std::fs::create_dir_all(&data_dir)?;

    let catalog = get_default_catalog()
        .clone()
        .with_custom(&config.catalog.custom);
    let errors = catalog.validate();
    if !errors.is_empty() {
        eprintln!("Catalog validation errors:");
        for error in errors {
            eprintln!("  - {}", error);
        }
        return Err(Error::CatalogValidation("Invalid catalog".into()));
    }

    // Held until the queue is saved so concurrent runs cannot drop each
    // other's queued writes
    let queue_path = data_dir.join("sync_queue.json");
    let _queue_lock = QueueLock::acquire(&queue_path)?;
    let queue = SyncQueue::load(&queue_path, SyncPolicy::from(&config.sync))?;
    let mut engine = SessionEngine::new(
        FileStore::new(&data_dir),
        &catalog,
        SystemClock,
        EngineConfig::from(&config),
    )
    .with_queue(queue);

    let result = run(&cli, &mut engine, &catalog, &data_dir);

    // Persist whatever is still queued, even when the command failed
    engine.queue().save(&queue_path)?;
    result
}

fn run(cli: &Cli, engine: &mut Engine, catalog: &StaticCatalog, data_dir: &Path) -> Result<()> {
    let json = cli.json;

    match &cli.command {
        Commands::Workouts => {
            let plans: Vec<&WorkoutPlan> = catalog
                .workout_ids()
                .into_iter()
                .filter_map(|id| catalog.workout(id))
                .collect();
            if json {
                print_json(&plans)?;
            } else {
                for plan in plans {
                    println!(
                        "{:<16} {} ({} exercises, {} sets)",
                        plan.id,
                        plan.name,
                        plan.exercises.len(),
                        plan.total_sets()
                    );
                }
            }
        }

        Commands::Create {
            user,
            workout,
            scheduled_at,
        } => {
            let session = engine.create_session(user, workout, *scheduled_at)?;
            print_session(json, &session)?;
        }

        Commands::Start { session } => print_session(json, &engine.start_session(*session)?)?,
        Commands::Pause { session } => print_session(json, &engine.pause_session(*session)?)?,
        Commands::Resume { session } => print_session(json, &engine.resume_session(*session)?)?,
        Commands::Complete { session } => {
            print_session(json, &engine.complete_session(*session)?)?
        }
        Commands::Cancel { session } => print_session(json, &engine.cancel_session(*session)?)?,

        Commands::Exercise(command) => {
            let (session, log) = match command {
                ExerciseCommand::Start { session, index } => {
                    engine.start_exercise(*session, *index)?
                }
                ExerciseCommand::Complete { session, log } => {
                    engine.complete_exercise(*session, *log)?
                }
                ExerciseCommand::Skip {
                    session,
                    log,
                    reason,
                    notes,
                    alternative,
                } => engine.skip_exercise(
                    *session,
                    *log,
                    *reason,
                    notes.clone(),
                    alternative.clone(),
                )?,
                ExerciseCommand::Fail {
                    session,
                    log,
                    notes,
                } => engine.fail_exercise(*session, *log, notes.clone())?,
            };
            if json {
                print_json(&serde_json::json!({ "session": session, "exercise_log": log }))?;
            } else {
                println!(
                    "Exercise log {} '{}' #{}: {:?}",
                    log.id, log.exercise_id, log.order_index, log.status
                );
                println!("{}", session_line(&session));
            }
        }

        Commands::Set {
            session,
            log,
            number,
            reps,
            weight,
            duration,
            rpe,
            form,
            notes,
        } => {
            let data = SetData {
                set_number: *number,
                reps_completed: *reps,
                weight_kg: *weight,
                duration_actual_seconds: *duration,
                rpe: *rpe,
                form_quality: *form,
                notes: notes.clone(),
            };
            let (session, set) = engine.complete_set(*session, *log, data)?;
            if json {
                print_json(&serde_json::json!({ "session": session, "set_log": set }))?;
            } else {
                println!("Set {} logged: {} reps", set.set_number, set.reps_completed);
                println!("{}", session_line(&session));
            }
        }

        Commands::Rest(RestCommand::Start { session }) => {
            print_session(json, &engine.start_rest(*session)?)?
        }
        Commands::Rest(RestCommand::Skip { session }) => {
            print_session(json, &engine.skip_rest(*session)?)?
        }

        Commands::Show { session } => {
            let id = *session;
            let session = engine
                .get_session(id)?
                .ok_or(Error::SessionNotFound(id))?;
            let rest_target = session
                .current_exercise_index
                .and_then(|index| catalog.planned_exercise(&session.workout_id, index))
                .map(|planned| planned.rest_seconds);
            let telemetry = workout_core::telemetry::capture(&session, rest_target, Utc::now());
            let exercise_logs = engine.exercise_logs(id)?;
            let set_logs = engine.set_logs(id)?;
            if json {
                print_json(&serde_json::json!({
                    "session": session,
                    "telemetry": telemetry,
                    "exercise_logs": exercise_logs,
                    "set_logs": set_logs,
                }))?;
            } else {
                println!("{}", session_line(&session));
                println!(
                    "  elapsed {}s, paused {}s, phase {:?} for {}s",
                    telemetry.elapsed_seconds,
                    telemetry.paused_seconds,
                    telemetry.current_phase,
                    telemetry.phase_elapsed_seconds
                );
                if let Some(remaining) = telemetry.rest_remaining_seconds {
                    println!("  rest remaining {}s", remaining);
                }
                for log in &exercise_logs {
                    let sets = set_logs
                        .iter()
                        .filter(|s| s.exercise_log_id == log.id)
                        .count();
                    println!(
                        "  #{} {:<16} {:?} ({}/{} sets) [{}]",
                        log.order_index,
                        log.exercise_id,
                        log.status,
                        sets,
                        log.target_sets,
                        log.id
                    );
                }
            }
        }

        Commands::Latest { user } => match engine.get_latest_session(user)? {
            Some(session) => print_session(json, &session)?,
            None if json => println!("null"),
            None => println!("No sessions for '{}'", user),
        },

        Commands::Summary { session, archive } => {
            let id = *session;
            let user_id = engine
                .get_session(id)?
                .ok_or(Error::SessionNotFound(id))?
                .user_id;
            let history_path = data_dir.join("history.csv");
            let history = load_history(&history_path, &user_id)?;
            let summary = engine.summarize(id, Some(&history))?;
            if *archive {
                append_summary(&history_path, &summary)?;
            }
            if json {
                print_json(&summary)?;
            } else {
                print_summary(&summary);
            }
        }

        Commands::Sync { ack, requeue } => {
            if let Some(session_id) = ack {
                let dropped = engine.acknowledge_failed(*session_id);
                tracing::info!("Acknowledged {} lost writes", dropped.len());
                if !json {
                    println!("Dropped {} failed writes", dropped.len());
                }
            }
            if let Some(session_id) = requeue {
                let count = engine.requeue_failed(*session_id);
                if !json {
                    println!("Requeued {} failed writes", count);
                }
            }

            let report = engine.flush();
            let health = engine.sync_status();
            if json {
                let failed = match &health {
                    SyncHealth::Fatal { failed } => failed
                        .iter()
                        .map(|f| {
                            serde_json::json!({
                                "item_id": f.item_id,
                                "session_id": f.session_id,
                                "attempts": f.attempts,
                                "last_error": f.last_error,
                            })
                        })
                        .collect(),
                    _ => Vec::new(),
                };
                print_json(&serde_json::json!({
                    "synced": report.synced,
                    "failed": report.failed,
                    "pending": engine.queue().len(),
                    "exhausted": failed,
                }))?;
            } else {
                println!(
                    "Synced {} writes, {} pending",
                    report.synced,
                    engine.queue().len()
                );
                match &health {
                    SyncHealth::Healthy => println!("Sync healthy"),
                    SyncHealth::Degraded { pending } => {
                        println!("Sync degraded: {} writes awaiting retry", pending)
                    }
                    SyncHealth::Fatal { failed } => {
                        for f in failed {
                            println!(
                                "Lost write {} for session {} after {} attempts: {}",
                                f.item_id, f.session_id, f.attempts, f.last_error
                            );
                        }
                    }
                }
            }
            engine.queue().ensure_healthy()?;
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_session(json: bool, session: &Session) -> Result<()> {
    if json {
        print_json(session)
    } else {
        println!("{}", session_line(session));
        Ok(())
    }
}

fn session_line(session: &Session) -> String {
    format!(
        "Session {} [{}] {}: {}/{} exercises, {}/{} sets, {} reps",
        session.id,
        session.status().as_str(),
        session.workout_id,
        session.exercises_completed,
        session.total_exercises,
        session.sets_completed,
        session.total_sets,
        session.total_reps
    )
}

fn print_summary(summary: &SessionSummary) {
    println!("Session {} ({})", summary.session_id, summary.workout_id);
    println!(
        "  Duration: {}s ({}s active, {}s paused)",
        summary.total_duration_seconds,
        summary.active_duration_seconds,
        summary.total_paused_seconds
    );
    println!(
        "  Exercises: {} completed, {} skipped, {} failed of {} ({:.1}%)",
        summary.exercises_completed,
        summary.exercises_skipped,
        summary.exercises_failed,
        summary.total_exercises,
        summary.completion_percentage
    );
    println!(
        "  Volume: {:.1} kg over {} sets, {} reps",
        summary.total_volume_kg, summary.total_sets, summary.total_reps
    );
    if let Some(rpe) = summary.average_rpe {
        println!("  Average RPE: {:.1}", rpe);
    }
    for pr in &summary.personal_records {
        println!(
            "  PR: {} {:.1} kg (previous {})",
            pr.exercise_id,
            pr.best_set_volume_kg,
            pr.previous_best_kg
                .map(|kg| format!("{:.1} kg", kg))
                .unwrap_or_else(|| "none".into())
        );
    }
    println!("  Performance score: {:.0}", summary.performance_score);
}
