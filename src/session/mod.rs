//! Rolling per-conversation context.
//!
//! A [`SessionContext`] is created on the first message of a session and
//! updated by intake on every subsequent one. In-flight analyses read an
//! immutable [`ContextSnapshot`] taken at intake time. Contexts idle for
//! longer than the configured timeout are evicted by a periodic sweep.

pub mod signals;

pub use signals::{EscalationPattern, RepetitionLevel, RepetitionSignal};

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::types::{Message, Sender, ThreatLevel};

/// One message as remembered by the session window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowEntry {
    pub message_id: String,
    pub sender: Sender,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// Lexical severity computed at intake
    pub severity: ThreatLevel,
}

/// Mutable per-session state, owned by the tracker.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub window: VecDeque<WindowEntry>,
    pub participants: BTreeSet<Sender>,
    /// Highest severity seen over the session's lifetime
    pub cumulative_threat: ThreatLevel,
    pub message_count: u64,
}

impl SessionContext {
    fn new(session_id: &str, at: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.to_string(),
            started_at: at,
            last_activity: at,
            window: VecDeque::new(),
            participants: BTreeSet::new(),
            cumulative_threat: ThreatLevel::None,
            message_count: 0,
        }
    }

    fn record(
        &mut self,
        message: &Message,
        at: DateTime<Utc>,
        severity: ThreatLevel,
        config: &SessionConfig,
    ) {
        self.message_count += 1;
        self.participants.insert(message.sender);
        self.cumulative_threat = self.cumulative_threat.max(severity);
        self.started_at = self.started_at.min(at);
        self.last_activity = self.last_activity.max(at);

        self.window.push_back(WindowEntry {
            message_id: message.id.clone(),
            sender: message.sender,
            text: message.text.clone(),
            timestamp: at,
            severity,
        });

        while self.window.len() > config.max_window_messages.max(1) {
            self.window.pop_front();
        }
        let oldest_allowed = self.last_activity - ChronoDuration::seconds(config.window_duration_secs);
        while self.window.len() > 1
            && self
                .window
                .front()
                .is_some_and(|entry| entry.timestamp < oldest_allowed)
        {
            self.window.pop_front();
        }
    }

    /// Seconds between the first and latest message.
    pub fn duration_secs(&self) -> i64 {
        (self.last_activity - self.started_at).num_seconds().max(0)
    }

    fn is_idle(&self, now: DateTime<Utc>, timeout_secs: i64) -> bool {
        now - self.last_activity > ChronoDuration::seconds(timeout_secs)
    }

    /// Immutable copy with derived signals.
    pub fn snapshot(&self, config: &SessionConfig) -> ContextSnapshot {
        let severities: Vec<ThreatLevel> = self.window.iter().map(|e| e.severity).collect();
        let escalation =
            signals::escalation(&severities, config.escalation_window, config.escalation_delta);
        let repetition = signals::repetition(
            self.window.iter().map(|e| e.text.as_str()),
            config.medium_repetition,
            config.high_repetition,
        );
        let urgency_indicators = self
            .window
            .back()
            .map(|e| signals::urgency_indicators(&e.text))
            .unwrap_or_default();

        ContextSnapshot {
            session_id: self.session_id.clone(),
            started_at: self.started_at,
            last_activity: self.last_activity,
            duration_secs: self.duration_secs(),
            message_count: self.message_count,
            participants: self.participants.iter().copied().collect(),
            recent_messages: self.window.iter().cloned().collect(),
            cumulative_threat: self.cumulative_threat,
            escalation,
            repetition,
            urgency_indicators,
        }
    }
}

/// Read-only view of a session handed to analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub duration_secs: i64,
    pub message_count: u64,
    pub participants: Vec<Sender>,
    pub recent_messages: Vec<WindowEntry>,
    pub cumulative_threat: ThreatLevel,
    pub escalation: EscalationPattern,
    pub repetition: RepetitionSignal,
    pub urgency_indicators: Vec<String>,
}

/// Tracks contexts for every active session.
pub struct SessionTracker {
    config: SessionConfig,
    sessions: RwLock<HashMap<String, SessionContext>>,
}

impl SessionTracker {
    /// Create an empty tracker.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Create or update the context for the message's session and return a
    /// snapshot reflecting the message.
    ///
    /// A context that has been idle past the timeout is replaced, even if
    /// the sweep has not run yet.
    pub async fn record(&self, message: &Message, severity: ThreatLevel) -> ContextSnapshot {
        self.record_at(message, severity, Utc::now()).await
    }

    /// [`SessionTracker::record`] with the receiving clock at `now`.
    ///
    /// Message timestamps later than `now` are clamped to `now`, so a
    /// submitter clock running ahead cannot keep a session alive past the
    /// idle timeout.
    pub async fn record_at(
        &self,
        message: &Message,
        severity: ThreatLevel,
        now: DateTime<Utc>,
    ) -> ContextSnapshot {
        let at = message.timestamp.min(now);
        let mut sessions = self.sessions.write().await;

        let expired = sessions
            .get(&message.session_id)
            .is_some_and(|ctx| ctx.is_idle(at, self.config.timeout_secs));
        if expired {
            debug!(session_id = %message.session_id, "Replacing expired session context");
            sessions.remove(&message.session_id);
        }

        let context = sessions
            .entry(message.session_id.clone())
            .or_insert_with(|| SessionContext::new(&message.session_id, at));
        context.record(message, at, severity, &self.config);
        context.snapshot(&self.config)
    }

    /// Snapshot of a session, if tracked.
    pub async fn snapshot(&self, session_id: &str) -> Option<ContextSnapshot> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|ctx| ctx.snapshot(&self.config))
    }

    /// Number of tracked sessions.
    pub async fn active_sessions(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Evict sessions idle at `now` for longer than the timeout.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, ctx| !ctx.is_idle(now, self.config.timeout_secs));
        let evicted = before - sessions.len();
        if evicted > 0 {
            info!(evicted, remaining = sessions.len(), "Evicted idle sessions");
        }
        evicted
    }

    /// Evict sessions idle now.
    pub async fn sweep(&self) -> usize {
        self.sweep_at(Utc::now()).await
    }

    /// Run the sweep every `sweep_interval_secs` until the task is aborted.
    pub fn spawn_sweeper(self: Arc<Self>) -> JoinHandle<()> {
        let period = std::time::Duration::from_secs(self.config.sweep_interval_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // First tick fires immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                self.sweep().await;
            }
        })
    }
}
