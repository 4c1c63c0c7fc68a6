//! Posting state machine
//!
//! ```text
//! Idle -> Validated -> [MediaPending -> MediaUploaded ->] Publishing -> Published
//!   \          \              \               \               \
//!    `-------------------------------------------------------------> Rejected | Failed
//! ```
//!
//! Nothing mutating reaches the remote side before the candidate is
//! validated, its image file is found and the confirmation gate approves.
//! Every transition is recorded in the audit log under the target state's
//! name, so a run can be reconstructed from the log alone.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::audit::AuditLog;
use crate::confirm::{ConfirmationGate, ConfirmationPrompt, ConfirmationProvider, Refusal};
use crate::duplicate::DuplicateMatch;
use crate::error::{TimelineError, TootgateError};
use crate::rate_gate::{NoHistory, RateGateResult};
use crate::timeline::RemoteTimeline;
use crate::types::{Candidate, MediaHandle, PostReceipt, StatusRequest};

/// Default wait between a media upload and the publish that references it
pub const DEFAULT_SETTLING_DELAY: Duration = Duration::from_secs(8);

/// Where a run is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SequencerState {
    Idle,
    Validated,
    MediaPending,
    MediaUploaded,
    Publishing,
    Published,
    Rejected,
    Failed,
}

impl SequencerState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SequencerState::Published | SequencerState::Rejected | SequencerState::Failed
        )
    }

    /// Whether the state machine has an edge from `self` to `next`
    pub fn can_transition_to(self, next: SequencerState) -> bool {
        use SequencerState::*;

        if self.is_terminal() {
            return false;
        }
        match next {
            Rejected | Failed => true,
            Validated => self == Idle,
            MediaPending => self == Validated,
            MediaUploaded => self == MediaPending,
            Publishing => matches!(self, Validated | MediaUploaded),
            Published => self == Publishing,
            Idle => false,
        }
    }

    /// Audit task name for entering this state
    pub fn task_name(self) -> &'static str {
        match self {
            SequencerState::Idle => "idle",
            SequencerState::Validated => "validated",
            SequencerState::MediaPending => "media_pending",
            SequencerState::MediaUploaded => "media_uploaded",
            SequencerState::Publishing => "publishing",
            SequencerState::Published => "published",
            SequencerState::Rejected => "rejected",
            SequencerState::Failed => "failed",
        }
    }
}

impl fmt::Display for SequencerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.task_name())
    }
}

/// One edge taken during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub from: SequencerState,
    pub to: SequencerState,
    /// Sequence number of the audit entry recording it
    pub seq: u64,
}

/// Why a run ended without posting, with nothing sent
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectReason {
    Duplicate(DuplicateMatch),
    RateLimited(RateGateResult),
    Confirmation { refusal: Refusal },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Duplicate(m) => write!(
                f,
                "already posted as {} at {}",
                m.post_id,
                m.created_at.to_rfc3339()
            ),
            RejectReason::RateLimited(r) => write!(
                f,
                "only {:.2} hours since the last post, minimum is {}; try again at {} (in {})",
                r.hours_since_last_post,
                r.minimum_interval_hours,
                r.next_eligible_at.to_rfc3339(),
                humantime::format_duration(Duration::from_secs(r.wait().as_secs()))
            ),
            RejectReason::Confirmation { refusal } => write!(f, "not confirmed: {}", refusal),
        }
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq)]
pub enum PostOutcome {
    Published {
        receipt: PostReceipt,
        media: Option<MediaHandle>,
    },
    Rejected(RejectReason),
    Failed(TimelineError),
}

impl PostOutcome {
    pub fn is_published(&self) -> bool {
        matches!(self, PostOutcome::Published { .. })
    }

    /// Machine-friendly outcome tag
    pub fn kind(&self) -> &'static str {
        match self {
            PostOutcome::Published { .. } => "published",
            PostOutcome::Rejected(_) => "rejected",
            PostOutcome::Failed(_) => "failed",
        }
    }
}

/// Results of the checks that run before the sequencer
#[derive(Debug, Clone, PartialEq)]
pub struct Eligibility {
    pub duplicate: Option<DuplicateMatch>,
    pub rate: Result<RateGateResult, NoHistory>,
}

impl Eligibility {
    /// First-ever post that matches nothing
    pub fn first_post() -> Self {
        Self {
            duplicate: None,
            rate: Err(NoHistory),
        }
    }
}

/// What a run did
#[derive(Debug, Clone)]
pub struct SequencerReport {
    pub outcome: PostOutcome,
    pub transitions: Vec<Transition>,
}

impl SequencerReport {
    pub fn final_state(&self) -> SequencerState {
        self.transitions
            .last()
            .map(|t| t.to)
            .unwrap_or(SequencerState::Idle)
    }

    /// States visited, starting with `Idle`
    pub fn path(&self) -> Vec<SequencerState> {
        std::iter::once(SequencerState::Idle)
            .chain(self.transitions.iter().map(|t| t.to))
            .collect()
    }
}

/// Drives one candidate from `Idle` to a terminal state
pub struct PostSequencer {
    settling_delay: Duration,
    gate: ConfirmationGate,
    state: SequencerState,
    transitions: Vec<Transition>,
}

impl PostSequencer {
    pub fn new(settling_delay: Duration, gate: ConfirmationGate) -> Self {
        Self {
            settling_delay,
            gate,
            state: SequencerState::Idle,
            transitions: Vec::new(),
        }
    }

    pub fn state(&self) -> SequencerState {
        self.state
    }

    /// Run the candidate through the state machine
    ///
    /// Remote calls are awaited one at a time. Rejections and remote failures
    /// end up in the returned outcome rather than as errors.
    pub async fn run(
        mut self,
        candidate: &Candidate,
        eligibility: &Eligibility,
        timeline: &dyn RemoteTimeline,
        provider: &mut dyn ConfirmationProvider,
        audit: &mut AuditLog,
    ) -> SequencerReport {
        let outcome = self
            .drive(candidate, eligibility, timeline, provider, audit)
            .await;
        SequencerReport {
            outcome,
            transitions: self.transitions,
        }
    }

    async fn drive(
        &mut self,
        candidate: &Candidate,
        eligibility: &Eligibility,
        timeline: &dyn RemoteTimeline,
        provider: &mut dyn ConfirmationProvider,
        audit: &mut AuditLog,
    ) -> PostOutcome {
        // Idle -> Validated
        if let Some(found) = &eligibility.duplicate {
            return self.reject(RejectReason::Duplicate(found.clone()), audit);
        }
        match &eligibility.rate {
            Ok(result) if !result.eligible => {
                return self.reject(RejectReason::RateLimited(result.clone()), audit);
            }
            Ok(result) => self.advance(
                SequencerState::Validated,
                json!({
                    "text": candidate.composed_text(),
                    "hours_since_last_post": result.hours_since_last_post,
                }),
                audit,
            ),
            Err(NoHistory) => self.advance(
                SequencerState::Validated,
                json!({ "text": candidate.composed_text(), "first_post": true }),
                audit,
            ),
        }

        // Validated -> MediaPending
        let image = match &candidate.image_path {
            Some(path) if !path.is_file() => {
                return self.fail(TimelineError::MissingMediaFile(path.clone()), audit);
            }
            Some(path) => {
                self.advance(
                    SequencerState::MediaPending,
                    json!({ "path": path.display().to_string(), "alt_text": candidate.image_alt_text }),
                    audit,
                );
                Some(path)
            }
            None => None,
        };

        if let Some(refusal) = self.confirm(candidate, provider, audit) {
            return self.reject(RejectReason::Confirmation { refusal }, audit);
        }

        // MediaPending -> MediaUploaded -> Publishing
        let media = match image {
            Some(path) => {
                let handle = match timeline.upload_media(path, &candidate.image_alt_text).await {
                    Ok(handle) => handle,
                    Err(e) => return self.fail(into_timeline_error(e), audit),
                };
                self.advance(
                    SequencerState::MediaUploaded,
                    json!({ "media_id": handle.0 }),
                    audit,
                );

                info!(delay = ?self.settling_delay, "Waiting for uploaded media to settle");
                tokio::time::sleep(self.settling_delay).await;
                Some(handle)
            }
            None => None,
        };

        let request = StatusRequest {
            text: candidate.composed_text().to_string(),
            spoiler_text: candidate.spoiler_text.clone(),
            sensitive: candidate.sensitive,
            media: media.clone(),
        };
        self.advance(
            SequencerState::Publishing,
            serde_json::to_value(&request).unwrap_or_default(),
            audit,
        );

        // Publishing -> Published
        match timeline.create_status(&request).await {
            Ok(receipt) => {
                self.advance(
                    SequencerState::Published,
                    serde_json::to_value(&receipt).unwrap_or_default(),
                    audit,
                );
                info!(id = %receipt.id, url = ?receipt.url, "Status published");
                PostOutcome::Published { receipt, media }
            }
            Err(e) => self.fail(into_timeline_error(e), audit),
        }
    }

    /// Consult the gate; `Some` means the post must not go out
    fn confirm(
        &mut self,
        candidate: &Candidate,
        provider: &mut dyn ConfirmationProvider,
        audit: &mut AuditLog,
    ) -> Option<Refusal> {
        let prompt = ConfirmationPrompt {
            token: self.gate.token(),
            text: candidate.composed_text().to_string(),
            image_name: candidate.image_name(),
            alt_text: candidate.image_alt_text.clone(),
            month: candidate.month,
            day: candidate.day,
        };

        match self.gate.evaluate(prompt, provider) {
            Ok(Ok(())) => {
                audit.append("confirmed", format!("policy {}", self.gate.policy()));
                None
            }
            Ok(Err(refusal)) => Some(refusal),
            Err(e) => {
                warn!(error = %e, "Confirmation could not be read");
                Some(Refusal::OperatorCancelled)
            }
        }
    }

    fn advance(&mut self, to: SequencerState, detail: serde_json::Value, audit: &mut AuditLog) {
        debug_assert!(
            self.state.can_transition_to(to),
            "illegal transition {} -> {}",
            self.state,
            to
        );
        let seq = audit.append(to.task_name(), detail.to_string());
        self.transitions.push(Transition {
            from: self.state,
            to,
            seq,
        });
        self.state = to;
    }

    fn reject(&mut self, reason: RejectReason, audit: &mut AuditLog) -> PostOutcome {
        info!(reason = %reason, "Post rejected");
        let detail = serde_json::to_value(&reason).unwrap_or_else(|_| json!(reason.to_string()));
        self.advance(SequencerState::Rejected, detail, audit);
        PostOutcome::Rejected(reason)
    }

    fn fail(&mut self, error: TimelineError, audit: &mut AuditLog) -> PostOutcome {
        warn!(error = %error, from = %self.state, "Post failed");
        self.advance(
            SequencerState::Failed,
            json!({ "error": error.kind(), "message": error.to_string() }),
            audit,
        );
        PostOutcome::Failed(error)
    }
}

fn into_timeline_error(error: TootgateError) -> TimelineError {
    match error {
        TootgateError::Timeline(e) => e,
        other => TimelineError::Transport(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confirm::{ConfirmationPolicy, ScriptedConfirmation};
    use crate::timeline::mock::MockTimeline;
    use crate::types::{CandidateDraft, CandidateLimits};
    use chrono::{TimeZone, Utc};
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn candidate(image_path: Option<PathBuf>) -> Candidate {
        Candidate::compose(
            CandidateDraft {
                month: 12,
                day: 28,
                image_alt_text: "A pump".to_string(),
                tags: "OTD".to_string(),
                post_text: "A turbine pump".to_string(),
                url: Some("https://x".to_string()),
                ..Default::default()
            },
            image_path,
            CandidateLimits::default(),
        )
    }

    fn sequencer(policy: ConfirmationPolicy) -> PostSequencer {
        PostSequencer::new(Duration::ZERO, ConfirmationGate::with_token(policy, 'K'))
    }

    fn tasks(audit: &AuditLog) -> Vec<&str> {
        audit.entries().iter().map(|e| e.task.as_str()).collect()
    }

    #[test]
    fn test_transition_table() {
        use SequencerState::*;

        assert!(Idle.can_transition_to(Validated));
        assert!(Validated.can_transition_to(MediaPending));
        assert!(Validated.can_transition_to(Publishing));
        assert!(MediaPending.can_transition_to(MediaUploaded));
        assert!(MediaUploaded.can_transition_to(Publishing));
        assert!(Publishing.can_transition_to(Published));

        assert!(!Idle.can_transition_to(Publishing));
        assert!(!MediaPending.can_transition_to(Publishing));
        assert!(!Validated.can_transition_to(Published));

        for state in [Idle, Validated, MediaPending, MediaUploaded, Publishing] {
            assert!(state.can_transition_to(Rejected));
            assert!(state.can_transition_to(Failed));
            assert!(!state.is_terminal());
        }
        for state in [Published, Rejected, Failed] {
            assert!(state.is_terminal());
            assert!(!state.can_transition_to(Failed));
        }
    }

    #[tokio::test]
    async fn test_no_image_path_skips_upload() {
        let timeline = MockTimeline::with_history(vec![]);
        let mut provider = ScriptedConfirmation::default();
        let mut audit = AuditLog::new(chrono_tz::UTC);

        let report = sequencer(ConfirmationPolicy::Always)
            .run(&candidate(None), &Eligibility::first_post(), &timeline, &mut provider, &mut audit)
            .await;

        assert!(report.outcome.is_published());
        assert_eq!(
            report.path(),
            vec![
                SequencerState::Idle,
                SequencerState::Validated,
                SequencerState::Publishing,
                SequencerState::Published
            ]
        );
        assert_eq!(timeline.upload_count(), 0);
        assert_eq!(timeline.published()[0].text, "A turbine pump #OTD https://x");
        assert_eq!(timeline.published()[0].media, None);
    }

    #[tokio::test]
    async fn test_media_path_uploads_then_publishes() {
        let dir = TempDir::new().unwrap();
        let image = dir.path().join("month-12-day-28.jpeg");
        std::fs::write(&image, b"jpeg").unwrap();

        let timeline = MockTimeline::with_history(vec![]);
        let mut provider = ScriptedConfirmation::default();
        let mut audit = AuditLog::new(chrono_tz::UTC);

        let report = sequencer(ConfirmationPolicy::Always)
            .run(&candidate(Some(image.clone())), &Eligibility::first_post(), &timeline, &mut provider, &mut audit)
            .await;

        assert_eq!(report.final_state(), SequencerState::Published);
        assert_eq!(
            report.path(),
            vec![
                SequencerState::Idle,
                SequencerState::Validated,
                SequencerState::MediaPending,
                SequencerState::MediaUploaded,
                SequencerState::Publishing,
                SequencerState::Published
            ]
        );
        match &report.outcome {
            PostOutcome::Published { media, .. } => {
                assert_eq!(media.as_ref().unwrap().0, "media-1");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        let calls = timeline.calls();
        let calls = calls.lock().unwrap();
        assert_eq!(calls.uploaded, vec![(image, "A pump".to_string())]);
        assert_eq!(calls.published[0].media, Some(MediaHandle("media-1".to_string())));
    }

    #[tokio::test]
    async fn test_each_transition_logged_once() {
        let timeline = MockTimeline::with_history(vec![]);
        let mut provider = ScriptedConfirmation::default();
        let mut audit = AuditLog::new(chrono_tz::UTC);

        let report = sequencer(ConfirmationPolicy::Always)
            .run(&candidate(None), &Eligibility::first_post(), &timeline, &mut provider, &mut audit)
            .await;

        for transition in &report.transitions {
            let entries: Vec<_> = audit
                .entries()
                .iter()
                .filter(|e| e.seq == transition.seq)
                .collect();
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].task, transition.to.task_name());
        }
        assert_eq!(tasks(&audit), vec!["validated", "confirmed", "publishing", "published"]);
    }

    #[tokio::test]
    async fn test_missing_image_fails_without_remote_calls() {
        let timeline = MockTimeline::with_history(vec![]);
        let mut provider = ScriptedConfirmation::echo_token();
        let mut audit = AuditLog::new(chrono_tz::UTC);
        let missing = PathBuf::from("/definitely/not/here.jpeg");

        let report = sequencer(ConfirmationPolicy::Interactive)
            .run(&candidate(Some(missing.clone())), &Eligibility::first_post(), &timeline, &mut provider, &mut audit)
            .await;

        assert_eq!(report.outcome, PostOutcome::Failed(TimelineError::MissingMediaFile(missing)));
        assert_eq!(report.final_state(), SequencerState::Failed);
        assert_eq!(timeline.upload_count(), 0);
        assert_eq!(timeline.publish_count(), 0);
        assert_eq!(provider.call_count(), 0);
        assert!(audit.find("failed").unwrap().detail.contains("missing_media_file"));
    }

    #[tokio::test]
    async fn test_duplicate_rejects_before_validation() {
        let timeline = MockTimeline::with_history(vec![]);
        let mut provider = ScriptedConfirmation::echo_token();
        let mut audit = AuditLog::new(chrono_tz::UTC);
        let found = DuplicateMatch {
            post_id: "42".to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 12, 27, 9, 0, 0).unwrap(),
        };
        let eligibility = Eligibility {
            duplicate: Some(found.clone()),
            rate: Err(NoHistory),
        };

        let report = sequencer(ConfirmationPolicy::Always)
            .run(&candidate(None), &eligibility, &timeline, &mut provider, &mut audit)
            .await;

        assert_eq!(report.outcome, PostOutcome::Rejected(RejectReason::Duplicate(found)));
        assert_eq!(report.path(), vec![SequencerState::Idle, SequencerState::Rejected]);
        assert_eq!(timeline.publish_count(), 0);
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_rate_limited_rejects() {
        let timeline = MockTimeline::with_history(vec![]);
        let mut provider = ScriptedConfirmation::default();
        let mut audit = AuditLog::new(chrono_tz::UTC);
        let now = Utc.with_ymd_and_hms(2024, 12, 28, 18, 0, 0).unwrap();
        let rate = RateGateResult {
            hours_since_last_post: 5.0,
            minimum_interval_hours: 20.0,
            eligible: false,
            next_eligible_at: (now + chrono::Duration::hours(15)).with_timezone(&chrono_tz::UTC),
        };
        let eligibility = Eligibility {
            duplicate: None,
            rate: Ok(rate.clone()),
        };

        let report = sequencer(ConfirmationPolicy::Always)
            .run(&candidate(None), &eligibility, &timeline, &mut provider, &mut audit)
            .await;

        let reason = RejectReason::RateLimited(rate);
        assert!(reason.to_string().ends_with("(in 15h)"));
        assert_eq!(report.outcome, PostOutcome::Rejected(reason));
        assert_eq!(timeline.publish_count(), 0);
        let detail = &audit.find("rejected").unwrap().detail;
        assert!(detail.contains("rate_limited"));
        assert!(detail.contains("next_eligible_at"));
    }

    #[tokio::test]
    async fn test_never_policy_rejects_after_file_check() {
        let dir = TempDir::new().unwrap();
        let image = dir.path().join("a.jpeg");
        std::fs::write(&image, b"jpeg").unwrap();

        let timeline = MockTimeline::with_history(vec![]);
        let mut provider = ScriptedConfirmation::echo_token();
        let mut audit = AuditLog::new(chrono_tz::UTC);

        let report = sequencer(ConfirmationPolicy::Never)
            .run(&candidate(Some(image)), &Eligibility::first_post(), &timeline, &mut provider, &mut audit)
            .await;

        assert_eq!(
            report.outcome,
            PostOutcome::Rejected(RejectReason::Confirmation {
                refusal: Refusal::PolicyDeclined
            })
        );
        assert_eq!(report.final_state(), SequencerState::Rejected);
        assert_eq!(timeline.upload_count(), 0);
        assert_eq!(timeline.publish_count(), 0);
    }

    #[tokio::test]
    async fn test_token_mismatch_rejects() {
        let timeline = MockTimeline::with_history(vec![]);
        let mut provider = ScriptedConfirmation::entering("y");
        let mut audit = AuditLog::new(chrono_tz::UTC);

        let report = sequencer(ConfirmationPolicy::Interactive)
            .run(&candidate(None), &Eligibility::first_post(), &timeline, &mut provider, &mut audit)
            .await;

        assert!(matches!(
            report.outcome,
            PostOutcome::Rejected(RejectReason::Confirmation {
                refusal: Refusal::TokenMismatch { expected: 'K', .. }
            })
        ));
        assert_eq!(provider.call_count(), 1);
        assert_eq!(timeline.publish_count(), 0);
    }

    #[tokio::test]
    async fn test_upload_failure_never_publishes() {
        let dir = TempDir::new().unwrap();
        let image = dir.path().join("a.jpeg");
        std::fs::write(&image, b"jpeg").unwrap();

        let timeline = MockTimeline::with_history(vec![]).failing_upload("413 Payload Too Large");
        let mut provider = ScriptedConfirmation::default();
        let mut audit = AuditLog::new(chrono_tz::UTC);

        let report = sequencer(ConfirmationPolicy::Always)
            .run(&candidate(Some(image)), &Eligibility::first_post(), &timeline, &mut provider, &mut audit)
            .await;

        assert!(matches!(report.outcome, PostOutcome::Failed(TimelineError::Upload(_))));
        assert_eq!(timeline.upload_count(), 1);
        assert_eq!(timeline.publish_count(), 0);
    }

    #[tokio::test]
    async fn test_publish_failure_after_upload() {
        let dir = TempDir::new().unwrap();
        let image = dir.path().join("a.jpeg");
        std::fs::write(&image, b"jpeg").unwrap();

        let timeline = MockTimeline::with_history(vec![]).failing_publish("HTTP 422");
        let mut provider = ScriptedConfirmation::default();
        let mut audit = AuditLog::new(chrono_tz::UTC);

        let report = sequencer(ConfirmationPolicy::Always)
            .run(&candidate(Some(image)), &Eligibility::first_post(), &timeline, &mut provider, &mut audit)
            .await;

        assert!(matches!(report.outcome, PostOutcome::Failed(TimelineError::Publish(_))));
        assert_eq!(
            report.path(),
            vec![
                SequencerState::Idle,
                SequencerState::Validated,
                SequencerState::MediaPending,
                SequencerState::MediaUploaded,
                SequencerState::Publishing,
                SequencerState::Failed
            ]
        );
    }

    #[tokio::test]
    async fn test_settling_delay_is_observed() {
        let dir = TempDir::new().unwrap();
        let image = dir.path().join("a.jpeg");
        std::fs::write(&image, b"jpeg").unwrap();

        let timeline = MockTimeline::with_history(vec![]);
        let mut provider = ScriptedConfirmation::default();
        let mut audit = AuditLog::new(chrono_tz::UTC);
        let delay = Duration::from_millis(50);

        let started = std::time::Instant::now();
        PostSequencer::new(delay, ConfirmationGate::with_token(ConfirmationPolicy::Always, 'K'))
            .run(&candidate(Some(image)), &Eligibility::first_post(), &timeline, &mut provider, &mut audit)
            .await;

        assert!(started.elapsed() >= delay);
    }
}
