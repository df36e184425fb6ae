//! Message intake: validation, context update, prioritization, enqueue.
//!
//! A submission is either rejected synchronously with a [`ValidationError`]
//! and no side effects, or it updates its session context and enqueues
//! exactly one [`AnalysisRequest`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::IntakeConfig;
use crate::error::ValidationError;
use crate::lexicon;
use crate::scheduler::AnalysisQueue;
use crate::session::{ContextSnapshot, SessionTracker};
use crate::types::{Message, MessageMetadata, Sender};

/// Hints supplied by the capture collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SubmissionContext {
    /// A prior filter already flagged the message.
    pub prefiltered: bool,
    pub language: Option<String>,
    pub has_code: Option<bool>,
    pub has_links: Option<bool>,
}

/// Raw message as submitted. Every field is optional on the wire so that
/// validation, not deserialization, decides what is rejected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Submission {
    pub text: String,
    pub sender: String,
    pub platform: String,
    pub session_id: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub context: Option<SubmissionContext>,
}

impl Submission {
    /// Build a submission with the required fields.
    pub fn new(
        session_id: impl Into<String>,
        sender: Sender,
        text: impl Into<String>,
        platform: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            sender: sender.as_str().to_string(),
            platform: platform.into(),
            session_id: session_id.into(),
            timestamp: None,
            context: None,
        }
    }

    /// Mark as flagged by a prior filter.
    pub fn prefiltered(mut self) -> Self {
        self.context.get_or_insert_with(SubmissionContext::default).prefiltered = true;
        self
    }

    /// Set the capture time.
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Unit of work handed to the scheduler.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub message: Message,
    /// Session context as of this message
    pub context: ContextSnapshot,
    /// Fixed at enqueue time
    pub priority: u32,
    /// Tie-breaker, increasing in enqueue order
    pub sequence: u64,
    pub enqueued_at: DateTime<Utc>,
}

/// Acknowledgement returned to the submitter.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionReceipt {
    pub message_id: String,
    pub session_id: String,
    pub priority: u32,
    pub queue_depth: usize,
}

/// Check a submission's required fields, returning the parsed sender.
pub fn validate(submission: &Submission, config: &IntakeConfig) -> Result<Sender, ValidationError> {
    if submission.text.trim().is_empty() {
        return Err(ValidationError::EmptyContent);
    }
    let length = submission.text.chars().count();
    if length > config.max_message_length {
        return Err(ValidationError::ContentTooLong {
            length,
            max: config.max_message_length,
        });
    }
    let sender = submission
        .sender
        .parse::<Sender>()
        .map_err(|_| ValidationError::InvalidSender {
            sender: submission.sender.clone(),
        })?;
    if submission.session_id.trim().is_empty() {
        return Err(ValidationError::MissingSessionId);
    }
    if submission.platform.trim().is_empty() {
        return Err(ValidationError::MissingPlatform);
    }
    Ok(sender)
}

/// Additive priority computed once at intake.
#[derive(Debug, Clone)]
pub struct PriorityPolicy {
    base: u32,
    flagged_boost: u32,
    platform_boost: u32,
    long_session_boost: u32,
    long_session_secs: i64,
    high_criticality_platforms: Vec<String>,
}

impl PriorityPolicy {
    /// Build from intake configuration.
    pub fn from_config(config: &IntakeConfig) -> Self {
        Self {
            base: config.base_priority,
            flagged_boost: config.flagged_boost,
            platform_boost: config.platform_boost,
            long_session_boost: config.long_session_boost,
            long_session_secs: config.long_session_secs,
            high_criticality_platforms: config
                .high_criticality_platforms
                .iter()
                .map(|p| p.to_lowercase())
                .collect(),
        }
    }

    /// Priority for a message given its context.
    pub fn priority(&self, message: &Message, context: &ContextSnapshot, prefiltered: bool) -> u32 {
        let mut priority = self.base;
        if prefiltered {
            priority += self.flagged_boost;
        }
        let platform = message.platform.to_lowercase();
        if self.high_criticality_platforms.iter().any(|p| *p == platform) {
            priority += self.platform_boost;
        }
        if context.duration_secs > self.long_session_secs {
            priority += self.long_session_boost;
        }
        priority
    }
}

/// Admits submissions into the analysis queue.
pub struct Intake {
    config: IntakeConfig,
    policy: PriorityPolicy,
    sessions: Arc<SessionTracker>,
    queue: Arc<AnalysisQueue>,
    admission: Mutex<()>,
}

impl Intake {
    /// Create an intake stage writing to `queue`.
    pub fn new(config: IntakeConfig, sessions: Arc<SessionTracker>, queue: Arc<AnalysisQueue>) -> Self {
        let policy = PriorityPolicy::from_config(&config);
        Self {
            config,
            policy,
            sessions,
            queue,
            admission: Mutex::new(()),
        }
    }

    /// Validate and enqueue one submission.
    pub async fn submit(&self, submission: Submission) -> Result<SubmissionReceipt, ValidationError> {
        let sender = validate(&submission, &self.config).map_err(|e| {
            debug!(session_id = %submission.session_id, reason = %e, "Submission rejected");
            e
        })?;

        // Capacity check, context update and push happen under one lock so a
        // rejected submission never touches the session.
        let _admission = self.admission.lock().await;
        if self.queue.is_full() {
            debug!(session_id = %submission.session_id, "Submission rejected: queue is full");
            return Err(ValidationError::QueueFull {
                capacity: self.queue.capacity(),
            });
        }

        let hints = submission.context.unwrap_or_default();
        let metadata = MessageMetadata {
            language: hints.language,
            has_code: hints
                .has_code
                .unwrap_or_else(|| lexicon::contains_code(&submission.text)),
            has_links: hints
                .has_links
                .unwrap_or_else(|| lexicon::contains_links(&submission.text)),
        };
        let message = Message::new(
            submission.session_id.trim(),
            sender,
            submission.text,
            submission.platform.trim(),
            submission.timestamp.unwrap_or_else(Utc::now),
        )
        .with_metadata(metadata);

        let severity = lexicon::lexical_severity(&message.text);
        let context = self.sessions.record(&message, severity).await;
        let priority = self.policy.priority(&message, &context, hints.prefiltered);

        let request = AnalysisRequest {
            priority,
            sequence: self.queue.next_sequence(),
            enqueued_at: Utc::now(),
            message,
            context,
        };
        let message_id = request.message.id.clone();
        let session_id = request.message.session_id.clone();

        let queue_depth = self
            .queue
            .push(request)
            .map_err(|_| ValidationError::QueueFull {
                capacity: self.queue.capacity(),
            })?;

        debug!(
            message_id = %message_id,
            session_id = %session_id,
            priority,
            queue_depth,
            "Message enqueued"
        );

        Ok(SubmissionReceipt {
            message_id,
            session_id,
            priority,
            queue_depth,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use chrono::Duration as ChronoDuration;
    use tokio_test::{assert_err, assert_ok};

    fn intake_with(capacity: usize) -> (Intake, Arc<SessionTracker>, Arc<AnalysisQueue>) {
        let sessions = Arc::new(SessionTracker::new(SessionConfig::default()));
        let queue = Arc::new(AnalysisQueue::new(capacity));
        let intake = Intake::new(IntakeConfig::default(), sessions.clone(), queue.clone());
        (intake, sessions, queue)
    }

    fn submission(text: &str) -> Submission {
        Submission::new("s1", Sender::User, text, "claude")
    }

    #[test]
    fn test_validation_reasons() {
        let config = IntakeConfig::default();
        let cases = [
            (Submission { text: "   ".into(), ..submission("x") }, "invalid message content"),
            (
                Submission { text: "x".repeat(10_001), ..submission("x") },
                "message content too long",
            ),
            (Submission { sender: "bot".into(), ..submission("hi") }, "invalid sender"),
            (Submission { session_id: "".into(), ..submission("hi") }, "missing session id"),
            (Submission { platform: " ".into(), ..submission("hi") }, "missing platform"),
        ];
        for (sub, reason) in cases {
            assert_eq!(validate(&sub, &config).unwrap_err().to_string(), reason);
        }
    }

    #[test]
    fn test_sender_case_insensitive() {
        let config = IntakeConfig::default();
        let sub = Submission { sender: "user".into(), ..submission("hi") };
        assert_eq!(validate(&sub, &config).unwrap(), Sender::User);
        let sub = Submission { sender: "Assistant".into(), ..submission("hi") };
        assert_eq!(validate(&sub, &config).unwrap(), Sender::Ai);
    }

    #[test]
    fn test_text_at_max_length_accepted() {
        let config = IntakeConfig::default();
        let sub = Submission { text: "é".repeat(10_000), ..submission("x") };
        assert!(validate(&sub, &config).is_ok());
    }

    #[tokio::test]
    async fn test_rejection_has_no_side_effects() {
        let (intake, sessions, queue) = intake_with(10);
        let err = assert_err!(intake.submit(submission("")).await);
        assert_eq!(err, ValidationError::EmptyContent);
        assert!(queue.is_empty());
        assert_eq!(sessions.active_sessions().await, 0);
    }

    #[tokio::test]
    async fn test_accepted_submission_enqueues_once() {
        let (intake, sessions, queue) = intake_with(10);
        let receipt = assert_ok!(intake.submit(submission("hello there")).await);
        assert_eq!(receipt.session_id, "s1");
        assert_eq!(receipt.priority, 1);
        assert_eq!(receipt.queue_depth, 1);
        assert_eq!(queue.len(), 1);
        assert_eq!(sessions.snapshot("s1").await.unwrap().message_count, 1);

        let request = queue.pop().unwrap();
        assert_eq!(request.message.id, receipt.message_id);
        assert_eq!(request.context.message_count, 1);
    }

    #[tokio::test]
    async fn test_full_queue_rejects_without_context_mutation() {
        let (intake, sessions, queue) = intake_with(1);
        intake.submit(submission("first")).await.unwrap();
        let err = intake
            .submit(Submission::new("s2", Sender::User, "second", "claude"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "queue is full");
        assert_eq!(queue.len(), 1);
        assert!(sessions.snapshot("s2").await.is_none());
    }

    #[tokio::test]
    async fn test_priority_boosts() {
        let (intake, _, _) = intake_with(10);
        let flagged = intake.submit(submission("hi").prefiltered()).await.unwrap();
        assert_eq!(flagged.priority, 11);

        let platform = intake
            .submit(Submission::new("s2", Sender::User, "hi", "ChatGPT"))
            .await
            .unwrap();
        assert_eq!(platform.priority, 6);

        let start = Utc::now() - ChronoDuration::seconds(400);
        intake
            .submit(Submission::new("s3", Sender::User, "hi", "claude").at(start))
            .await
            .unwrap();
        let long = intake
            .submit(Submission::new("s3", Sender::User, "still here", "claude").at(Utc::now()))
            .await
            .unwrap();
        assert_eq!(long.priority, 3);
    }

    #[tokio::test]
    async fn test_same_text_twice_creates_two_messages() {
        let (intake, _, queue) = intake_with(10);
        let first = intake.submit(submission("same text")).await.unwrap();
        let second = intake.submit(submission("same text")).await.unwrap();
        assert_ne!(first.message_id, second.message_id);

        let requests = queue.pop_batch(2);
        assert_eq!(requests[0].context.message_count, 1);
        assert_eq!(requests[1].context.message_count, 2);
    }

    #[tokio::test]
    async fn test_metadata_derived_when_not_supplied() {
        let (intake, _, queue) = intake_with(10);
        intake
            .submit(submission("check https://example.com for the code"))
            .await
            .unwrap();
        let request = queue.pop().unwrap();
        assert!(request.message.metadata.has_links);
        assert!(!request.message.metadata.has_code);
    }

    #[test]
    fn test_submission_deserializes_leniently() {
        let sub: Submission = serde_json::from_str(r#"{"text": "hi"}"#).unwrap();
        assert_eq!(sub.text, "hi");
        assert!(sub.session_id.is_empty());
        assert_eq!(
            validate(&sub, &IntakeConfig::default()).unwrap_err(),
            ValidationError::InvalidSender { sender: String::new() }
        );

        let sub: Submission = serde_json::from_str(
            r#"{"text": "hi", "sender": "USER", "platform": "claude", "sessionId": "s1",
                "context": {"prefiltered": true}}"#,
        )
        .unwrap();
        assert!(sub.context.unwrap().prefiltered);
    }
}
