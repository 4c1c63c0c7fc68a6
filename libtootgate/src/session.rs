//! One authenticated posting session
//!
//! `Session` is the entry point the binaries use. It owns the timeline
//! client, the account it authenticated as, the history cache and the audit
//! log, and wires the duplicate check, the rate gate and the sequencer into a
//! single run.
//!
//! # Example
//!
//! ```no_run
//! use libtootgate::confirm::ConsoleConfirmation;
//! use libtootgate::session::{Session, SessionSettings};
//! use libtootgate::timeline::mastodon::MastodonTimeline;
//! use libtootgate::types::{Candidate, CandidateDraft};
//! use libtootgate::Config;
//!
//! # async fn example() -> libtootgate::Result<()> {
//! let config = Config::load()?;
//! let timeline = MastodonTimeline::from_config(&config)?;
//! let mut session = Session::connect(Box::new(timeline), SessionSettings::from_config(&config)?).await?;
//!
//! let candidate = Candidate::compose(CandidateDraft::default(), None, config.limits());
//! let report = session.run(&candidate, &mut ConsoleConfirmation).await?;
//! println!("{}", report.outcome.kind());
//!
//! session.finish(&config.audit_dir()?);
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono_tz::Tz;
use tracing::{info, warn};

use crate::audit::AuditLog;
use crate::config::Config;
use crate::confirm::{ConfirmationGate, ConfirmationPolicy, ConfirmationProvider};
use crate::duplicate::{self, DuplicateMatch};
use crate::error::Result;
use crate::history::HistoryCache;
use crate::rate_gate::{NoHistory, RateGate, RateGateResult, TASK_HOURS_SINCE};
use crate::sequencer::{Eligibility, PostOutcome, PostSequencer, SequencerState, Transition};
use crate::timeline::RemoteTimeline;
use crate::types::{Account, Candidate, HistoricalPost};

/// Knobs a session needs, taken from [`Config`]
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub minimum_interval_hours: f64,
    pub timezone: Tz,
    pub policy: ConfirmationPolicy,
    pub settling_delay: Duration,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            minimum_interval_hours: config.posting.minimum_interval_hours,
            timezone: config.timezone()?,
            policy: config.posting.confirmation,
            settling_delay: config.settling_delay(),
        })
    }

    pub fn with_policy(self, policy: ConfirmationPolicy) -> Self {
        Self { policy, ..self }
    }
}

/// Everything one `run` decided and did
#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: PostOutcome,
    pub final_state: SequencerState,
    pub transitions: Vec<Transition>,
    pub duplicate: Option<DuplicateMatch>,
    /// `None` when the account had never posted
    pub rate: Option<RateGateResult>,
}

pub struct Session {
    timeline: Box<dyn RemoteTimeline>,
    account: Account,
    settings: SessionSettings,
    history: HistoryCache,
    audit: AuditLog,
}

impl Session {
    /// Authenticate and open a session
    ///
    /// # Errors
    ///
    /// An authentication failure is fatal: nothing else is attempted.
    pub async fn connect(mut timeline: Box<dyn RemoteTimeline>, settings: SessionSettings) -> Result<Self> {
        let account = timeline.authenticate().await?;

        let mut audit = AuditLog::new(settings.timezone);
        audit.append(
            "connected",
            format!("{} at {} as {}", timeline.name(), timeline.location(), account),
        );
        info!(account = %account, instance = %timeline.location(), "Authenticated");

        Ok(Self {
            history: HistoryCache::new(account.id.clone()),
            timeline,
            account,
            settings,
            audit,
        })
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Human-readable summary of the connection
    pub fn describe(&self) -> String {
        format!(
            "connection to {} associated with {}",
            self.timeline.location(),
            self.account
        )
    }

    /// The account's recent posts, fetched at most once per session
    pub async fn history(&mut self) -> Result<&[HistoricalPost]> {
        self.history.recent_posts(self.timeline.as_ref()).await
    }

    /// Rate-gate verdict for right now
    pub async fn rate_status(&mut self) -> Result<std::result::Result<RateGateResult, NoHistory>> {
        let gate = RateGate::new(self.settings.minimum_interval_hours, self.settings.timezone);
        let history = self.history.recent_posts(self.timeline.as_ref()).await?;
        Ok(gate.evaluate_now(history, &mut self.audit))
    }

    /// Take one candidate through duplicate check, rate gate and posting
    ///
    /// # Errors
    ///
    /// Only a failed history fetch is an error. Rejections and remote failures
    /// while posting are reported in the [`RunReport`].
    pub async fn run(&mut self, candidate: &Candidate, provider: &mut dyn ConfirmationProvider) -> Result<RunReport> {
        for warning in candidate.warnings() {
            warn!(%warning, "Candidate warning");
            self.audit.append("candidate_warning", warning.to_string());
        }

        let gate = RateGate::new(self.settings.minimum_interval_hours, self.settings.timezone);
        let history = self.history.recent_posts(self.timeline.as_ref()).await?;

        let duplicate = duplicate::check(candidate, history, &mut self.audit);
        let rate = gate.evaluate_now(history, &mut self.audit);
        if rate.is_err() {
            self.audit.append(TASK_HOURS_SINCE, "no previous posts");
        }

        let eligibility = Eligibility {
            duplicate: duplicate.clone(),
            rate: rate.clone(),
        };
        let sequencer = PostSequencer::new(
            self.settings.settling_delay,
            ConfirmationGate::new(self.settings.policy),
        );
        let report = sequencer
            .run(candidate, &eligibility, self.timeline.as_ref(), provider, &mut self.audit)
            .await;

        if report.outcome.is_published() {
            self.history.invalidate();
        }

        Ok(RunReport {
            final_state: report.final_state(),
            outcome: report.outcome,
            transitions: report.transitions,
            duplicate,
            rate: rate.ok(),
        })
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn audit_mut(&mut self) -> &mut AuditLog {
        &mut self.audit
    }

    /// End the session and write the audit log into `dir`
    pub fn finish(self, dir: &Path) -> Option<PathBuf> {
        self.audit.flush(dir)
    }
}
