#![forbid(unsafe_code)]

//! Core domain model and session engine for Lift.
//!
//! This crate provides:
//! - Domain types (sessions, exercise and set logs, workout plans)
//! - The session state machine and pause ledger
//! - Exercise/set log tracking
//! - Realtime telemetry and the offline sync queue
//! - Durable stores (in-memory and file-backed)
//! - Session summaries and the summary history archive

pub mod types;
pub mod error;
pub mod clock;
pub mod catalog;
pub mod config;
pub mod logging;
pub mod ledger;
pub mod machine;
pub mod tracker;
pub mod telemetry;
pub mod store;
pub mod sync;
pub mod summary;
pub mod history;
pub mod engine;

// Re-export commonly used types
pub use error::{Error, ErrorClass, Result};
pub use types::*;
pub use clock::{Clock, ManualClock, SystemClock};
pub use catalog::{build_default_catalog, get_default_catalog, StaticCatalog, WorkoutCatalog};
pub use config::Config;
pub use store::{FileStore, MemoryStore, SessionStore, WriteOutcome};
pub use sync::{FlushReport, QueueLock, SyncHealth, SyncQueue};
pub use summary::{HistoricalBests, SessionSummary};
pub use history::{append_summary, load_history};
pub use engine::{EngineConfig, SessionEngine};
