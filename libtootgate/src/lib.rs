//! Tootgate - a cautious posting agent for Mastodon
//!
//! This library holds everything behind the `toot-*` tools: it checks a
//! candidate post against the account's recent history, enforces a minimum
//! interval between posts, asks the operator for confirmation, publishes
//! (optionally with one image) and keeps an audit trail of every decision.

pub mod audit;
pub mod config;
pub mod confirm;
pub mod duplicate;
pub mod error;
pub mod history;
pub mod logging;
pub mod rate_gate;
pub mod sequencer;
pub mod session;
pub mod timeline;
pub mod types;

// Re-export commonly used types
pub use audit::{AuditLog, LogEntry};
pub use config::Config;
pub use confirm::{ConfirmationPolicy, ConfirmationProvider};
pub use error::{ConfigError, Result, TimelineError, TootgateError};
pub use sequencer::{PostOutcome, RejectReason, SequencerState};
pub use session::{RunReport, Session, SessionSettings};
pub use types::{Account, Candidate, CandidateDraft, HistoricalPost};
