//! Turn-level streaming events.
//!
//! `TurnEvent` is what a caller reads from a running turn: model text as it
//! arrives, tool observations, visible notices for terminal conditions, and
//! exactly one final `Done`.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::react::TaskExecution;

/// Events emitted by a turn, in order.
///
/// - `chunk`: model text, forwarded as soon as it arrives
/// - `observation`: a tool result fed back into a ReAct cycle
/// - `notice`: an informational or error message for the user
/// - `done`: the turn is over; nothing follows it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    Chunk { content: String },

    Observation { content: String },

    Notice { level: NoticeLevel, content: String },

    Done { outcome: TurnOutcome },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Error,
}

/// How a turn ended.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnOutcome {
    /// A plain turn streamed to completion.
    Completed,
    /// A plain turn failed after (possibly) partial output.
    Failed { error: String },
    /// A tool-augmented turn; the execution record carries its outcome.
    React(TaskExecution),
}

impl TurnEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Chunk { .. } => "chunk",
            Self::Observation { .. } => "observation",
            Self::Notice { .. } => "notice",
            Self::Done { .. } => "done",
        }
    }

    /// Text meant for display, if this event carries any.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Chunk { content }
            | Self::Observation { content }
            | Self::Notice { content, .. } => Some(content),
            Self::Done { .. } => None,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done { .. })
    }

    pub(crate) fn chunk(content: impl Into<String>) -> Self {
        Self::Chunk {
            content: content.into(),
        }
    }

    pub(crate) fn info(content: impl Into<String>) -> Self {
        Self::Notice {
            level: NoticeLevel::Info,
            content: content.into(),
        }
    }

    pub(crate) fn error(content: impl Into<String>) -> Self {
        Self::Notice {
            level: NoticeLevel::Error,
            content: content.into(),
        }
    }
}

/// Send one event unless `cancel` fires first. `None` means the turn is
/// over for the sender: cancelled, or the receiver is gone.
pub(crate) async fn emit(
    tx: &mpsc::Sender<TurnEvent>,
    cancel: &CancellationToken,
    event: TurnEvent,
) -> Option<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        sent = tx.send(event) => sent.ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serialization_chunk() {
        let json = serde_json::to_string(&TurnEvent::chunk("Hello")).unwrap();
        assert!(json.contains(r#""type":"chunk""#));
        assert!(json.contains(r#""content":"Hello""#));
    }

    #[test]
    fn event_serialization_notice() {
        let json = serde_json::to_string(&TurnEvent::error("boom")).unwrap();
        assert!(json.contains(r#""type":"notice""#));
        assert!(json.contains(r#""level":"error""#));
    }

    #[test]
    fn event_serialization_done() {
        let event = TurnEvent::Done {
            outcome: TurnOutcome::Failed {
                error: "backend gone".into(),
            },
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"done""#));
        assert!(json.contains(r#""kind":"failed""#));
        assert_eq!(event.event_type(), "done");
        assert!(event.text().is_none());
    }

    #[test]
    fn event_deserialization() {
        let json = r#"{"type":"observation","content":"hi"}"#;
        let event: TurnEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.text(), Some("hi"));
        assert!(!event.is_done());
    }
}
