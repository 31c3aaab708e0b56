use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(pub i64);
    };
}

id_newtype!(ChannelId);
id_newtype!(MessageId);

/// Server-assigned monotonic counter per channel. Gapless, so the oldest
/// loaded sequence is a valid backfill cursor.
pub type SequenceNumber = u64;

/// Canonical user identifier.
///
/// Upstream identity providers are inconsistent about casing and padding, so
/// the raw id is canonicalized exactly once, on construction (including
/// deserialization). Every later comparison is plain equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct UserId(String);

impl UserId {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for UserId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(UserId::new(raw))
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Client-generated identity for a message that has not been acknowledged by
/// the server yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TempId(pub uuid::Uuid);

impl TempId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The unit of message grouping: a direct conversation keyed by the peer's
/// user id, or a group channel keyed by its channel id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ConversationId {
    Direct(UserId),
    Channel(ChannelId),
}

impl ConversationId {
    pub fn channel(&self) -> Option<ChannelId> {
        match self {
            ConversationId::Channel(channel_id) => Some(*channel_id),
            ConversationId::Direct(_) => None,
        }
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversationId::Direct(user_id) => write!(f, "dm:{user_id}"),
            ConversationId::Channel(channel_id) => write!(f, "channel:{}", channel_id.0),
        }
    }
}
