//! Map grammers types to domain entities.

use crate::domain::{GroupKind, MediaReference, MediaType, Message};
use grammers_client::peer::Peer;
use grammers_client::tl;

/// Group kind of a dialog peer. Private chats are not groups.
///
/// * `Peer::Group` → Group, or Supergroup when megagroup.
/// * `Peer::Channel` → Channel (broadcast).
pub fn group_kind_from_peer(peer: &Peer) -> Option<GroupKind> {
    match peer {
        Peer::User(_) => None,
        Peer::Group(g) => Some(if g.is_megagroup() {
            GroupKind::Supergroup
        } else {
            GroupKind::Group
        }),
        Peer::Channel(_) => Some(GroupKind::Channel),
    }
}

/// Map a raw history message. Service messages and empty slots yield `None`.
pub fn message_to_domain(msg: &tl::enums::Message, group_id: i64) -> Option<Message> {
    let tl::enums::Message::Message(m) = msg else {
        return None;
    };
    let from_user_id = m.from_id.as_ref().and_then(|f| match f {
        tl::enums::Peer::User(u) => Some(u.user_id),
        _ => None,
    });
    let reply_to_msg_id = m
        .reply_to
        .as_ref()
        .and_then(|r| match r {
            tl::enums::MessageReplyHeader::Header(h) => Some(h.reply_to_msg_id),
            _ => None,
        })
        .flatten();

    Some(Message {
        id: m.id,
        group_id,
        // Prefer edit_date so the stored version carries the edit timestamp.
        date: m.edit_date.map(i64::from).unwrap_or(i64::from(m.date)),
        text: m.message.clone(),
        media: media_reference(m, group_id),
        from_user_id,
        reply_to_msg_id,
    })
}

fn media_reference(m: &tl::types::Message, group_id: i64) -> Option<MediaReference> {
    let media_type = match m.media.as_ref()? {
        tl::enums::MessageMedia::Photo(_) => MediaType::Photo,
        tl::enums::MessageMedia::Document(d) => match d.document.as_ref() {
            Some(tl::enums::Document::Document(doc)) => media_type_from_mime(&doc.mime_type),
            _ => MediaType::Document,
        },
        _ => return None,
    };
    Some(MediaReference {
        message_id: m.id,
        group_id,
        media_type,
    })
}

fn media_type_from_mime(mime: &str) -> MediaType {
    match mime {
        "application/x-tgsticker" | "image/webp" => MediaType::Sticker,
        "image/gif" => MediaType::Animation,
        "audio/ogg" => MediaType::Voice,
        m if m.starts_with("video/") => MediaType::Video,
        m if m.starts_with("audio/") => MediaType::Audio,
        _ => MediaType::Document,
    }
}
