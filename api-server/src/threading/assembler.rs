//! Thread assembly for newly stored messages.
//!
//! A message joins an existing thread when its In-Reply-To or References point at a
//! message (or thread root) already known for the same account. Without a header
//! match, a thread with the same normalized subject that recently saw activity and
//! shares a participant is reused. Otherwise the message roots a new thread.

use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::config::ThreadingConfig;
use super::participants::{ParticipantSet, blob_mailboxes};
use super::subject::normalize_subject;
use crate::addresses::{Mailbox, ParseIssue};
use crate::models::{Message, NewMessage, Thread};
use crate::store::{MailStore, NewThread, StoreResult};

/// How a message found its thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ThreadMatch {
    Reference,
    Subject,
    Created,
}

/// Result of placing a message into a thread.
#[derive(Debug, Clone)]
pub struct Assignment {
    pub thread: Thread,
    pub message: Message,
    pub matched: ThreadMatch,
    /// Address entries of the message that could not be parsed.
    pub issues: Vec<ParseIssue>,
}

impl Assignment {
    pub fn position(&self) -> i32 {
        self.message.thread_position.unwrap_or_default()
    }
}

pub struct ThreadAssembler<'a> {
    store: &'a dyn MailStore,
    config: &'a ThreadingConfig,
}

impl<'a> ThreadAssembler<'a> {
    pub fn new(store: &'a dyn MailStore, config: &'a ThreadingConfig) -> Self {
        Self { store, config }
    }

    /// Store `message` inside the thread it belongs to, creating one if needed.
    ///
    /// Persistence failures are returned as-is; nothing is retried here.
    pub async fn assemble(&self, message: NewMessage) -> StoreResult<Assignment> {
        let parsed = blob_mailboxes(
            message.from_blob.as_deref(),
            message.to_blob.as_deref(),
            message.cc_blob.as_deref(),
        );
        let participants = ParticipantSet::from_mailboxes(parsed.value).mailboxes();
        let normalized_subject = normalize_subject(&message.subject);

        let (existing, matched) = match self.match_by_reference(&message).await? {
            Some(thread) => (Some(thread), ThreadMatch::Reference),
            None => match self
                .match_by_subject(&message, &normalized_subject, &participants)
                .await?
            {
                Some(thread) => (Some(thread), ThreadMatch::Subject),
                None => (None, ThreadMatch::Created),
            },
        };

        let (thread, stored) = match existing {
            Some(thread) => {
                log::debug!(
                    "message {} joins thread {} ({:?})",
                    message.message_id,
                    thread.id,
                    matched
                );
                self.store
                    .append_to_thread(thread.id, message, &participants)
                    .await?
            }
            None => {
                log::debug!("message {} starts a new thread", message.message_id);
                let seed = NewThread {
                    root_message_id: message.message_id.clone(),
                    normalized_subject,
                    participants,
                };
                self.store.create_thread(message, seed).await?
            }
        };

        Ok(Assignment {
            thread,
            message: stored,
            matched,
            issues: parsed.issues,
        })
    }

    async fn match_by_reference(&self, message: &NewMessage) -> StoreResult<Option<Thread>> {
        let mut candidates: Vec<String> = Vec::new();
        if let Some(parent) = &message.in_reply_to {
            candidates.push(parent.clone());
        }
        for reference in message.references.iter().rev() {
            if !candidates.contains(reference) {
                candidates.push(reference.clone());
            }
        }
        candidates.retain(|id| id != &message.message_id);

        if candidates.is_empty() {
            return Ok(None);
        }

        self.store
            .find_thread_by_message_ids(message.user_id, &candidates)
            .await
    }

    async fn match_by_subject(
        &self,
        message: &NewMessage,
        normalized_subject: &str,
        participants: &[Mailbox],
    ) -> StoreResult<Option<Thread>> {
        if !self.config.subject_matching || normalized_subject.is_empty() || participants.is_empty()
        {
            return Ok(None);
        }

        let Some(since) = message
            .sent_at
            .checked_sub_signed(self.config.subject_window)
        else {
            log::debug!(
                "subject window before {} is out of range, skipping subject match",
                message.sent_at
            );
            return Ok(None);
        };
        let candidates = self
            .store
            .find_threads_by_subject(message.user_id, normalized_subject, since)
            .await?;

        Ok(candidates.into_iter().find(|thread| {
            ParticipantSet::from_mailboxes(thread.participants.iter().cloned())
                .overlaps(participants)
        }))
    }
}
