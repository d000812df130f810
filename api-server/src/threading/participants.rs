//! Participant extraction for threads.
//!
//! Participants are keyed by lowercase address and kept in first-seen order. An
//! unnamed entry is upgraded the first time a named occurrence of the same address
//! shows up; after that the named form sticks.

use std::collections::HashMap;

use thiserror::Error;
use uuid::Uuid;

use crate::addresses::{Mailbox, PartialParse, parse_optional_blob};
use crate::models::{Message, MessageDirection};
use crate::store::{MailStore, StoreError};

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Thread not found")]
    ThreadNotFound,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Insertion-ordered, case-insensitively deduplicated set of mailboxes.
#[derive(Debug, Clone, Default)]
pub struct ParticipantSet {
    order: Vec<String>,
    entries: HashMap<String, Mailbox>,
}

impl ParticipantSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_mailboxes<I: IntoIterator<Item = Mailbox>>(mailboxes: I) -> Self {
        let mut set = Self::new();
        set.extend(mailboxes);
        set
    }

    /// Add a mailbox. Returns true when the set changed.
    pub fn insert(&mut self, mailbox: Mailbox) -> bool {
        let key = mailbox.key();
        if key.is_empty() {
            return false;
        }

        match self.entries.get_mut(&key) {
            None => {
                self.order.push(key.clone());
                self.entries.insert(key, mailbox);
                true
            }
            Some(existing) if !existing.has_name() && mailbox.has_name() => {
                *existing = mailbox;
                true
            }
            Some(_) => false,
        }
    }

    /// Add every mailbox, returning true when anything changed.
    pub fn extend<I: IntoIterator<Item = Mailbox>>(&mut self, mailboxes: I) -> bool {
        let mut changed = false;
        for mailbox in mailboxes {
            changed |= self.insert(mailbox);
        }
        changed
    }

    pub fn contains(&self, address: &str) -> bool {
        self.entries.contains_key(&address.trim().to_lowercase())
    }

    /// True when any of `mailboxes` shares an address with this set.
    pub fn overlaps(&self, mailboxes: &[Mailbox]) -> bool {
        mailboxes.iter().any(|m| self.entries.contains_key(&m.key()))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn mailboxes(&self) -> Vec<Mailbox> {
        self.order
            .iter()
            .filter_map(|key| self.entries.get(key))
            .cloned()
            .collect()
    }

    pub fn displays(&self) -> Vec<String> {
        self.order
            .iter()
            .filter_map(|key| self.entries.get(key))
            .map(Mailbox::display)
            .collect()
    }
}

/// Every address on a message in header order: from, to, then cc.
///
/// Outbound messages contribute only from and to.
pub fn message_mailboxes(message: &Message) -> PartialParse<Vec<Mailbox>> {
    let mut fields: Vec<(&'static str, Option<&str>)> = vec![
        ("from", message.from_blob.as_deref()),
        ("to", message.to_blob.as_deref()),
    ];
    if message.direction == MessageDirection::Inbound {
        fields.push(("cc", message.cc_blob.as_deref()));
    }

    collect_fields(message.id, &fields)
}

/// Mailboxes of a message that has not been stored yet. All three fields count.
pub fn blob_mailboxes(
    from: Option<&str>,
    to: Option<&str>,
    cc: Option<&str>,
) -> PartialParse<Vec<Mailbox>> {
    collect_fields(Uuid::nil(), &[("from", from), ("to", to), ("cc", cc)])
}

fn collect_fields(
    message_id: Uuid,
    fields: &[(&'static str, Option<&str>)],
) -> PartialParse<Vec<Mailbox>> {
    let mut result: PartialParse<Vec<Mailbox>> = PartialParse::default();
    for (field, blob) in fields {
        let parsed = parse_optional_blob(*blob);
        result.value.extend(parsed.value);
        result.issues.extend(
            parsed
                .issues
                .into_iter()
                .map(|issue| issue.in_field(message_id, field)),
        );
    }
    result
}

/// Build the participant list of a thread from its messages.
///
/// Inbound messages are visited before outbound ones, each in the order given.
/// Malformed blobs are skipped and reported through the returned issues.
pub fn collect_participants(messages: &[Message]) -> PartialParse<Vec<String>> {
    let mut set = ParticipantSet::new();
    let mut issues = Vec::new();

    let inbound = messages
        .iter()
        .filter(|m| m.direction == MessageDirection::Inbound);
    let outbound = messages
        .iter()
        .filter(|m| m.direction == MessageDirection::Outbound);

    for message in inbound.chain(outbound) {
        let parsed = message_mailboxes(message);
        set.extend(parsed.value);
        issues.extend(parsed.issues);
    }

    if !issues.is_empty() {
        log::debug!(
            "participant extraction skipped {} malformed address entries",
            issues.len()
        );
    }

    PartialParse {
        value: set.displays(),
        issues,
    }
}

/// Participant list for a thread owned by `user_id`.
pub async fn thread_participants(
    store: &dyn MailStore,
    user_id: i32,
    thread_id: Uuid,
) -> Result<PartialParse<Vec<String>>, ExtractError> {
    if store.get_thread(user_id, thread_id).await?.is_none() {
        return Err(ExtractError::ThreadNotFound);
    }

    let messages = store.list_thread_messages(user_id, thread_id).await?;
    Ok(collect_participants(&messages))
}
