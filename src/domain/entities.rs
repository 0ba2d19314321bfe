//! Domain entities. Pure data structures for the core business.
//!
//! No Telegram/IO types here; adapters map into these.

use serde::{Deserialize, Serialize};

/// A group or channel the user participates in. Stored per user in `user_groups`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(rename = "type")]
    pub kind: GroupKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupKind {
    Group,
    Supergroup,
    Channel,
}

/// A single message from a group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i32,
    pub group_id: i64,
    pub date: i64,
    pub text: String,
    pub media: Option<MediaReference>,
    pub from_user_id: Option<i64>,
    pub reply_to_msg_id: Option<i32>,
}

/// Reference to downloadable media. Resolved by the client adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaReference {
    pub message_id: i32,
    pub group_id: i64,
    pub media_type: MediaType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Photo,
    Video,
    Document,
    Audio,
    Voice,
    Sticker,
    Animation,
    Other,
}

impl MediaType {
    /// File extension used when the media is written to disk.
    pub fn extension(self) -> &'static str {
        match self {
            MediaType::Photo => "jpg",
            MediaType::Video => "mp4",
            MediaType::Document => "bin",
            MediaType::Audio => "ogg",
            MediaType::Voice => "ogg",
            MediaType::Sticker => "webp",
            MediaType::Animation => "mp4",
            MediaType::Other => "bin",
        }
    }
}

/// Opaque challenge returned by the remote service after a login code was sent.
/// Must be handed back unchanged to complete sign-in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub opaque_hash: String,
}

/// Result of submitting a login code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignInOutcome {
    Authorized,
    /// The account has a cloud password; completing it is not handled by this service.
    TwoFactorRequired { hint: Option<String> },
}
