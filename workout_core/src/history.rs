//! Summary history archive.
//!
//! Completed summaries are appended to a CSV file so later sessions can
//! detect personal records and compare volume without replaying old logs.
//! One row is written per exercise with a weighted best; sessions without
//! any weighted sets still get a single row so their volume counts.

use crate::summary::{HistoricalBests, SessionSummary};
use crate::Result;
use chrono::{DateTime, Utc};
use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::path::Path;

/// A row in the history CSV
#[derive(Debug, Serialize, Deserialize)]
struct HistoryRow {
    session_id: String,
    user_id: String,
    workout_id: String,
    completed_at: String,
    session_volume_kg: f64,
    exercise_id: Option<String>,
    best_set_volume_kg: Option<f64>,
}

fn rows_for(summary: &SessionSummary) -> Vec<HistoryRow> {
    let row = |exercise_id: Option<String>, best: Option<f64>| HistoryRow {
        session_id: summary.session_id.to_string(),
        user_id: summary.user_id.clone(),
        workout_id: summary.workout_id.clone(),
        completed_at: summary.completed_at.to_rfc3339(),
        session_volume_kg: summary.total_volume_kg,
        exercise_id,
        best_set_volume_kg: best,
    };

    let rows: Vec<HistoryRow> = summary
        .exercises
        .iter()
        .filter_map(|e| {
            e.best_set_volume_kg
                .map(|best| row(Some(e.exercise_id.clone()), Some(best)))
        })
        .collect();

    if rows.is_empty() {
        vec![row(None, None)]
    } else {
        rows
    }
}

/// Append a summary to the history CSV (creates it with headers if needed)
///
/// The file is fsynced before returning.
pub fn append_summary(csv_path: &Path, summary: &SessionSummary) -> Result<usize> {
    if let Some(parent) = csv_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(csv_path)?;

    let needs_headers = file.metadata()?.len() == 0;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(needs_headers)
        .from_writer(file);

    let rows = rows_for(summary);
    for row in &rows {
        writer.serialize(row)?;
    }

    writer.flush()?;
    let file = writer
        .into_inner()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    file.sync_all()?;

    tracing::info!(
        "Archived summary of session {} ({} rows)",
        summary.session_id,
        rows.len()
    );
    Ok(rows.len())
}

/// Load a user's historical bests from the CSV
///
/// Returns empty history if the file doesn't exist. Rows that fail to parse
/// are logged and skipped.
pub fn load_history(csv_path: &Path, user_id: &str) -> Result<HistoricalBests> {
    load_history_since(csv_path, user_id, None)
}

/// Like [`load_history`], limited to sessions completed at or after `since`
pub fn load_history_since(
    csv_path: &Path,
    user_id: &str,
    since: Option<DateTime<Utc>>,
) -> Result<HistoricalBests> {
    let mut history = HistoricalBests::default();
    if !csv_path.exists() {
        return Ok(history);
    }

    let mut reader = ReaderBuilder::new().has_headers(true).from_path(csv_path)?;
    let mut seen_sessions = HashSet::new();

    for result in reader.deserialize::<HistoryRow>() {
        let row = match result {
            Ok(row) => row,
            Err(e) => {
                tracing::warn!("Failed to deserialize history row: {}", e);
                continue;
            }
        };
        if row.user_id != user_id {
            continue;
        }
        if let Some(since) = since {
            match DateTime::parse_from_rfc3339(&row.completed_at) {
                Ok(at) if at.with_timezone(&Utc) >= since => {}
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!("Invalid completed_at in history row: {}", e);
                    continue;
                }
            }
        }

        if seen_sessions.insert(row.session_id.clone()) {
            history.session_volumes.push(row.session_volume_kg);
        }
        if let (Some(exercise_id), Some(best)) = (&row.exercise_id, row.best_set_volume_kg) {
            history.record_best(exercise_id, best);
        }
    }

    tracing::debug!(
        "Loaded history for {}: {} sessions, {} exercises",
        user_id,
        history.session_volumes.len(),
        history.exercise_bests.len()
    );
    Ok(history)
}
