use serde::{Deserialize, Serialize};
use serde_with::{base64::Base64, serde_as};

/// Replica update carried by the sync frames
#[serde_as]
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncPayload {
    #[serde_as(as = "Base64")]
    #[serde(default)]
    pub update: Vec<u8>,
    /// Version the sender already has; only meaningful on sync-step-1
    #[serde_as(as = "Option<Base64>")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_vector: Option<Vec<u8>>,
}

impl SyncPayload {
    pub fn update(update: Vec<u8>) -> Self {
        Self { update, state_vector: None }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PresencePayload {
    pub display_name: Option<String>,
    pub color: Option<String>,
    pub cursor: Option<serde_json::Value>,
}

/// Frames a client may send over the session socket
#[derive(Deserialize, Debug)]
#[serde(tag = "type")]
pub enum ReceivedMessage {
    #[serde(rename = "sync-step-1")]
    SyncStep1(SyncPayload),
    #[serde(rename = "sync-step-2")]
    SyncStep2(SyncPayload),
    #[serde(rename = "sync-update")]
    SyncUpdate(SyncPayload),
    /// Opaque; relayed verbatim, never parsed further
    #[serde(rename = "awareness")]
    Awareness(serde_json::Map<String, serde_json::Value>),
    #[serde(rename = "presence")]
    Presence(PresencePayload),
    #[serde(other)]
    Unknown,
}

/// Frames the relay sends to clients
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum SendMessage {
    #[serde(rename = "sync-step-2")]
    SyncStep2(SyncPayload),
    #[serde(rename = "sync-update")]
    SyncUpdate(SyncPayload),
}
