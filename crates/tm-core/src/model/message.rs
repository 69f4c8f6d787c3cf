use serde::{Deserialize, Serialize};

use super::source::SourceItem;
use super::state::SyncSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SyncAction {
    Upsert,
    Archive,
}

impl SyncAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upsert => "UPSERT",
            Self::Archive => "ARCHIVE",
        }
    }
}

/// One unit of sync work flowing through the durable queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncMessage {
    pub action: SyncAction,
    pub source_item_id: String,
    /// Inline item snapshot to avoid an immediate re-fetch. Webhook payloads
    /// are considered fresh.
    #[serde(default)]
    pub snapshot: Option<SourceItem>,
    pub source: SyncSource,
    #[serde(default)]
    pub attempt: u32,
}

impl SyncMessage {
    pub fn upsert(source_item_id: &str, source: SyncSource) -> Self {
        Self {
            action: SyncAction::Upsert,
            source_item_id: source_item_id.to_string(),
            snapshot: None,
            source,
            attempt: 0,
        }
    }

    pub fn archive(source_item_id: &str, source: SyncSource) -> Self {
        Self {
            action: SyncAction::Archive,
            source_item_id: source_item_id.to_string(),
            snapshot: None,
            source,
            attempt: 0,
        }
    }

    pub fn with_snapshot(mut self, snapshot: SourceItem) -> Self {
        self.snapshot = Some(snapshot);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_serializes_uppercase() {
        assert_eq!(
            serde_json::to_string(&SyncAction::Upsert).unwrap(),
            "\"UPSERT\""
        );
        assert_eq!(
            serde_json::to_string(&SyncAction::Archive).unwrap(),
            "\"ARCHIVE\""
        );
    }

    #[test]
    fn message_round_trips() {
        let msg = SyncMessage::upsert("t1", SyncSource::Webhook);
        let json = serde_json::to_string(&msg).unwrap();
        let back: SyncMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.action, SyncAction::Upsert);
        assert_eq!(back.source_item_id, "t1");
        assert!(back.snapshot.is_none());
        assert_eq!(back.attempt, 0);
    }
}
