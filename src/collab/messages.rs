use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::registry::Segment;

/// Viewer identity as supplied by the identity collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PeerIdentity {
    pub user_id: String,
    pub display_name: String,
    pub color_tag: String,
}

/// Cursor/selection position inside one segment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SelectionRange {
    pub segment_id: String,
    pub start: usize,
    pub end: usize,
}

/// Live record of a connected viewer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Presence {
    pub user_id: String,
    pub display_name: String,
    pub color_tag: String,
    pub selection_range: Option<SelectionRange>,
}

/// Typed messages exchanged between sessions viewing the same unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CollabMessage {
    #[serde(rename_all = "camelCase")]
    PresenceUpdate {
        session_id: String,
        identity: PeerIdentity,
        selection: Option<SelectionRange>,
        at: DateTime<Utc>,
    },

    #[serde(rename_all = "camelCase")]
    Heartbeat {
        session_id: String,
        at: DateTime<Utc>,
    },

    /// Full-segment payloads, never field-level patches.
    #[serde(rename_all = "camelCase")]
    ContentUpdate {
        session_id: String,
        segments: Vec<Segment>,
        at: DateTime<Utc>,
    },

    #[serde(rename_all = "camelCase")]
    Leave {
        session_id: String,
        at: DateTime<Utc>,
    },
}

impl CollabMessage {
    pub fn session_id(&self) -> &str {
        match self {
            CollabMessage::PresenceUpdate { session_id, .. }
            | CollabMessage::Heartbeat { session_id, .. }
            | CollabMessage::ContentUpdate { session_id, .. }
            | CollabMessage::Leave { session_id, .. } => session_id,
        }
    }
}
