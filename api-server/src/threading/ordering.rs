//! Conversation order for the messages of one thread.

use std::collections::{HashMap, HashSet};

use rocket_okapi::okapi::schemars::JsonSchema;
use serde::Serialize;
use uuid::Uuid;

use crate::models::Message;

/// A message together with its reply depth inside the thread.
#[derive(Debug, Clone, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ThreadedMessage {
    #[serde(flatten)]
    pub message: Message,
    pub depth: i32,
}

/// Parent of `message` among `known` ids: In-Reply-To first, then the closest reference.
fn parent_id<'a>(message: &'a Message, known: &HashSet<&str>) -> Option<&'a str> {
    message
        .in_reply_to
        .as_deref()
        .into_iter()
        .chain(message.references.iter().rev().map(String::as_str))
        .find(|id| *id != message.message_id && known.contains(id))
}

/// Depth-first, pre-order layout of a thread.
///
/// Each message follows its parent and siblings are ordered by date. Messages whose
/// parent is not part of the thread start their own subtree at depth 0.
pub fn order_thread(messages: Vec<Message>) -> Vec<ThreadedMessage> {
    let known: HashSet<&str> = messages.iter().map(|m| m.message_id.as_str()).collect();

    let mut roots: Vec<&Message> = Vec::new();
    let mut children: HashMap<&str, Vec<&Message>> = HashMap::new();
    for message in &messages {
        match parent_id(message, &known) {
            Some(parent) => children.entry(parent).or_default().push(message),
            None => roots.push(message),
        }
    }

    let by_date = |a: &&Message, b: &&Message| {
        a.sent_at
            .cmp(&b.sent_at)
            .then(a.thread_position.cmp(&b.thread_position))
    };
    roots.sort_by(by_date);
    for siblings in children.values_mut() {
        siblings.sort_by(by_date);
    }

    fn visit(
        message: &Message,
        depth: i32,
        children: &HashMap<&str, Vec<&Message>>,
        seen: &mut HashSet<Uuid>,
        result: &mut Vec<ThreadedMessage>,
    ) {
        if !seen.insert(message.id) {
            return;
        }
        result.push(ThreadedMessage {
            message: message.clone(),
            depth,
        });
        if let Some(replies) = children.get(message.message_id.as_str()) {
            for reply in replies {
                visit(reply, depth + 1, children, seen, result);
            }
        }
    }

    let mut seen = HashSet::new();
    let mut result = Vec::with_capacity(messages.len());
    for root in &roots {
        visit(root, 0, &children, &mut seen, &mut result);
    }

    // Reply cycles never reach a root.
    let mut leftovers: Vec<&Message> = messages.iter().filter(|m| !seen.contains(&m.id)).collect();
    leftovers.sort_by(by_date);
    for message in leftovers {
        visit(message, 0, &children, &mut seen, &mut result);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MessageDirection, NewMessage};
    use chrono::{Duration, TimeZone, Utc};

    fn msg(id: &str, parent: Option<&str>, minute: i64) -> Message {
        NewMessage {
            user_id: 1,
            direction: MessageDirection::Inbound,
            message_id: id.to_string(),
            in_reply_to: parent.map(str::to_string),
            references: Vec::new(),
            subject: "s".into(),
            from_blob: None,
            to_blob: None,
            cc_blob: None,
            text_body: None,
            html_body: None,
            sent_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minute),
            endpoint_id: None,
        }
        .into_message(Uuid::new_v4(), Uuid::nil(), 0)
    }

    fn ids(ordered: &[ThreadedMessage]) -> Vec<(&str, i32)> {
        ordered
            .iter()
            .map(|m| (m.message.message_id.as_str(), m.depth))
            .collect()
    }

    #[test]
    fn replies_follow_their_parent() {
        let ordered = order_thread(vec![
            msg("c", Some("a"), 3),
            msg("b", Some("a"), 1),
            msg("a", None, 0),
            msg("b1", Some("b"), 2),
        ]);
        assert_eq!(
            ids(&ordered),
            vec![("a", 0), ("b", 1), ("b1", 2), ("c", 1)]
        );
    }

    #[test]
    fn references_stand_in_for_missing_in_reply_to() {
        let mut reply = msg("b", None, 1);
        reply.references = vec!["a".into(), "zz".into()];
        let ordered = order_thread(vec![reply, msg("a", None, 0)]);
        assert_eq!(ids(&ordered), vec![("a", 0), ("b", 1)]);
    }

    #[test]
    fn orphans_and_cycles_are_kept() {
        let ordered = order_thread(vec![
            msg("x", Some("y"), 5),
            msg("y", Some("x"), 4),
            msg("a", None, 0),
            msg("o", Some("gone"), 1),
        ]);
        assert_eq!(ordered.len(), 4);
        assert_eq!(ids(&ordered)[..2], [("a", 0), ("o", 0)]);
        assert_eq!(ids(&ordered)[2], ("y", 0));
    }
}
