use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one interview call
///
/// `Idle -> Connecting -> Active -> Ended`, with `Error` reachable from any
/// non-idle state. `Ended` and `Error` are terminal for the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Idle,
    Connecting,
    Active,
    Ended,
    Error,
}

impl CallStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallStatus::Ended | CallStatus::Error)
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallStatus::Idle => "idle",
            CallStatus::Connecting => "connecting",
            CallStatus::Active => "active",
            CallStatus::Ended => "ended",
            CallStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// What a provider session needs to join its call
#[derive(Clone, PartialEq, Eq)]
pub enum SessionCredential {
    Retell { call_id: String, access_token: String },
    ElevenLabs { signed_url: String },
}

impl SessionCredential {
    /// Provider call id, when the credential carries one
    pub fn call_id(&self) -> Option<&str> {
        match self {
            SessionCredential::Retell { call_id, .. } => Some(call_id),
            SessionCredential::ElevenLabs { .. } => None,
        }
    }
}

// Tokens and signed urls stay out of logs
impl fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionCredential::Retell { call_id, .. } => f
                .debug_struct("Retell")
                .field("call_id", call_id)
                .field("access_token", &"<redacted>")
                .finish(),
            SessionCredential::ElevenLabs { .. } => f
                .debug_struct("ElevenLabs")
                .field("signed_url", &"<redacted>")
                .finish(),
        }
    }
}

/// Events a provider session reports while connected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    AgentStartTalking,
    AgentStopTalking,
    /// The remote side hung up
    CallEnded,
    Error(String),
}

/// Point-in-time view of a call for display or polling
#[derive(Debug, Clone, Serialize)]
pub struct CallSnapshot {
    pub session_id: String,
    pub status: CallStatus,
    pub call_id: Option<String>,
    pub error: Option<String>,
    pub elapsed_secs: u64,
    pub is_muted: bool,
    pub is_video_paused: bool,
    pub is_user_speaking: bool,
    pub is_agent_speaking: bool,
}

/// Delivered once to the end callback
#[derive(Debug, Clone, Serialize)]
pub struct CallSummary {
    pub session_id: String,
    pub call_id: Option<String>,
    pub status: CallStatus,
    pub elapsed_secs: u64,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&CallStatus::Connecting).unwrap();
        assert_eq!(json, "\"connecting\"");
        assert_eq!(CallStatus::Error.to_string(), "error");
    }

    #[test]
    fn test_terminal_states() {
        assert!(!CallStatus::Idle.is_terminal());
        assert!(!CallStatus::Active.is_terminal());
        assert!(CallStatus::Ended.is_terminal());
        assert!(CallStatus::Error.is_terminal());
    }

    #[test]
    fn test_credential_debug_redacts_secrets() {
        let credential = SessionCredential::Retell {
            call_id: "call_1".into(),
            access_token: "secret-token".into(),
        };
        let debug = format!("{:?}", credential);
        assert!(debug.contains("call_1"));
        assert!(!debug.contains("secret-token"));
    }
}
