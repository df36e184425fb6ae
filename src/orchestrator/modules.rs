//! Registered analysis modules.
//!
//! Each module is an entry in a table keyed by [`ModuleId`]: its settings
//! plus a projector selecting the message and context fields it needs.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::backend::ModuleRequest;
use crate::config::{ModuleSettings, ModulesConfig};
use crate::session::ContextSnapshot;
use crate::types::{Message, ModuleId};

/// Builds a module's `(message, context)` payload.
pub type Projector = fn(&Message, &ContextSnapshot) -> (Value, Value);

/// One registered module.
#[derive(Clone)]
pub struct ModuleSpec {
    pub id: ModuleId,
    pub settings: ModuleSettings,
    pub projector: Projector,
}

impl std::fmt::Debug for ModuleSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleSpec")
            .field("id", &self.id)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ModuleSpec {
    /// Request body for analyzing `message` with this module.
    pub fn request(&self, message: &Message, context: &ContextSnapshot) -> ModuleRequest {
        let (message, context) = (self.projector)(message, context);
        ModuleRequest {
            module: self.id,
            message,
            context,
            config: self.settings.clone(),
        }
    }
}

/// Table of every known module.
#[derive(Debug, Clone)]
pub struct ModuleRegistry {
    modules: BTreeMap<ModuleId, ModuleSpec>,
}

fn projector_for(id: ModuleId) -> Projector {
    match id {
        ModuleId::PromptInjection => project_prompt_injection,
        ModuleId::Manipulation => project_manipulation,
        ModuleId::Emotion => project_emotion,
        ModuleId::Escalation => project_escalation,
    }
}

impl ModuleRegistry {
    /// Build the table from configuration. Modules missing from the
    /// configuration are registered disabled.
    pub fn from_config(config: &ModulesConfig) -> Self {
        let modules = ModuleId::ALL
            .into_iter()
            .map(|id| {
                let settings = config.get(id).cloned().unwrap_or_else(|| ModuleSettings {
                    endpoint: id.as_str().to_string(),
                    enabled: false,
                    fallback_enabled: false,
                    sensitivity: 0.5,
                });
                (
                    id,
                    ModuleSpec {
                        id,
                        settings,
                        projector: projector_for(id),
                    },
                )
            })
            .collect();
        Self { modules }
    }

    /// Look up a module.
    pub fn get(&self, id: ModuleId) -> Option<&ModuleSpec> {
        self.modules.get(&id)
    }

    /// Every registered module, in dispatch order.
    pub fn all(&self) -> impl Iterator<Item = &ModuleSpec> {
        self.modules.values()
    }

    /// Enabled modules, in dispatch order.
    pub fn enabled(&self) -> impl Iterator<Item = &ModuleSpec> {
        self.modules.values().filter(|m| m.settings.enabled)
    }
}

fn project_prompt_injection(message: &Message, context: &ContextSnapshot) -> (Value, Value) {
    (
        json!({
            "id": message.id,
            "text": message.text,
            "sender": message.sender,
            "platform": message.platform,
            "hasCode": message.metadata.has_code,
            "hasLinks": message.metadata.has_links,
        }),
        json!({
            "messageCount": context.message_count,
            "cumulativeThreat": context.cumulative_threat,
        }),
    )
}

fn project_manipulation(message: &Message, context: &ContextSnapshot) -> (Value, Value) {
    let recent: Vec<Value> = context
        .recent_messages
        .iter()
        .map(|e| json!({"sender": e.sender, "text": e.text}))
        .collect();
    (
        json!({
            "id": message.id,
            "text": message.text,
            "sender": message.sender,
        }),
        json!({
            "recentMessages": recent,
            "participants": context.participants,
            "repetition": context.repetition,
            "urgencyIndicators": context.urgency_indicators,
        }),
    )
}

fn project_emotion(message: &Message, context: &ContextSnapshot) -> (Value, Value) {
    let own_recent: Vec<&str> = context
        .recent_messages
        .iter()
        .filter(|e| e.sender == message.sender)
        .map(|e| e.text.as_str())
        .collect();
    (
        json!({
            "id": message.id,
            "text": message.text,
            "sender": message.sender,
            "language": message.metadata.language,
        }),
        json!({
            "senderHistory": own_recent,
            "escalation": context.escalation,
        }),
    )
}

fn project_escalation(message: &Message, context: &ContextSnapshot) -> (Value, Value) {
    let severities: Vec<Value> = context
        .recent_messages
        .iter()
        .map(|e| json!({"timestamp": e.timestamp, "severity": e.severity}))
        .collect();
    (
        json!({
            "id": message.id,
            "text": message.text,
            "timestamp": message.timestamp,
        }),
        json!({
            "durationSecs": context.duration_secs,
            "messageCount": context.message_count,
            "escalation": context.escalation,
            "cumulativeThreat": context.cumulative_threat,
            "severityHistory": severities,
        }),
    )
}
