//! Address blob parsing.
//!
//! Messages store their sender and recipient lists as serialized text. Inbound
//! messages carry JSON objects of the shape `{"text": ..., "addresses": [{"name",
//! "address"}]}`, outbound messages carry a single RFC 5322 mailbox string for the
//! sender and a JSON array of mailbox strings for recipients. Every parse path here
//! returns a [`PartialParse`] so callers keep whatever was readable and still learn
//! which parts were not.

use std::fmt;

use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// A single address with an optional display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Mailbox {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub address: String,
}

impl Mailbox {
    /// Build a mailbox, treating blank names as absent.
    pub fn new(name: Option<&str>, address: &str) -> Self {
        let name = name
            .map(|n| n.trim().trim_matches('"').trim())
            .filter(|n| !n.is_empty())
            .map(str::to_string);
        Mailbox {
            name,
            address: address.trim().to_string(),
        }
    }

    /// Case-insensitive identity used for deduplication.
    pub fn key(&self) -> String {
        self.address.to_lowercase()
    }

    pub fn has_name(&self) -> bool {
        self.name.is_some()
    }

    /// `"Name <email>"` when a name is known, otherwise the bare address.
    pub fn display(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} <{}>", name, self.address),
            None => f.write_str(&self.address),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressParseError {
    #[error("address blob is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("unsupported address entry: {0}")]
    UnsupportedShape(String),
    #[error("invalid mailbox '{0}'")]
    InvalidMailbox(String),
}

/// A parse failure together with where it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIssue {
    pub message_id: Option<Uuid>,
    pub field: Option<&'static str>,
    pub error: AddressParseError,
}

impl ParseIssue {
    pub fn new(error: AddressParseError) -> Self {
        ParseIssue {
            message_id: None,
            field: None,
            error,
        }
    }

    pub fn in_field(mut self, message_id: Uuid, field: &'static str) -> Self {
        self.message_id = Some(message_id);
        self.field = Some(field);
        self
    }
}

impl fmt::Display for ParseIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.message_id, self.field) {
            (Some(id), Some(field)) => write!(f, "message {id} {field}: {}", self.error),
            (Some(id), None) => write!(f, "message {id}: {}", self.error),
            _ => write!(f, "{}", self.error),
        }
    }
}

/// A value assembled from possibly malformed input, with the issues that were skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialParse<T> {
    pub value: T,
    pub issues: Vec<ParseIssue>,
}

impl<T> PartialParse<T> {
    pub fn clean(value: T) -> Self {
        PartialParse {
            value,
            issues: Vec::new(),
        }
    }

    /// True when nothing was dropped while parsing.
    pub fn is_complete(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> PartialParse<U> {
        PartialParse {
            value: f(self.value),
            issues: self.issues,
        }
    }

    pub fn issue_messages(&self) -> Vec<String> {
        self.issues.iter().map(ToString::to_string).collect()
    }
}

impl<T: Default> Default for PartialParse<T> {
    fn default() -> Self {
        PartialParse::clean(T::default())
    }
}

/// Parse a stored address blob.
///
/// Accepted shapes: `{"addresses": [...]}`, `{"name", "address"}`, a JSON array of
/// address objects or mailbox strings, a JSON string, or a raw RFC 5322 address list.
/// Empty input yields no mailboxes and no issues.
pub fn parse_blob(raw: &str) -> PartialParse<Vec<Mailbox>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return PartialParse::default();
    }

    if trimmed.starts_with('"') {
        // Either a JSON string or a mailbox with a quoted display name.
        return match serde_json::from_str::<Value>(trimmed) {
            Ok(value) => parse_value(&value),
            Err(_) => parse_mailbox_list(trimmed),
        };
    }

    if trimmed.starts_with(['{', '[']) {
        match serde_json::from_str::<Value>(trimmed) {
            Ok(value) => parse_value(&value),
            Err(err) => PartialParse {
                value: Vec::new(),
                issues: vec![ParseIssue::new(AddressParseError::InvalidJson(
                    err.to_string(),
                ))],
            },
        }
    } else {
        parse_mailbox_list(trimmed)
    }
}

/// Parse an optional blob column; `None` is treated as empty.
pub fn parse_optional_blob(raw: Option<&str>) -> PartialParse<Vec<Mailbox>> {
    raw.map(parse_blob).unwrap_or_default()
}

/// Parse a comma separated RFC 5322 address list, flattening groups.
pub fn parse_mailbox_list(raw: &str) -> PartialParse<Vec<Mailbox>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return PartialParse::default();
    }

    let parsed = match mailparse::addrparse(raw) {
        Ok(list) => list,
        Err(_) => {
            return PartialParse {
                value: Vec::new(),
                issues: vec![ParseIssue::new(AddressParseError::InvalidMailbox(
                    raw.to_string(),
                ))],
            };
        }
    };

    let mut result: PartialParse<Vec<Mailbox>> = PartialParse::default();
    for addr in parsed.iter() {
        let singles: Vec<&mailparse::SingleInfo> = match addr {
            mailparse::MailAddr::Single(info) => vec![info],
            mailparse::MailAddr::Group(group) => group.addrs.iter().collect(),
        };
        for info in singles {
            if is_plausible_address(&info.addr) {
                result
                    .value
                    .push(Mailbox::new(info.display_name.as_deref(), &info.addr));
            } else {
                result
                    .issues
                    .push(ParseIssue::new(AddressParseError::InvalidMailbox(
                        info.addr.clone(),
                    )));
            }
        }
    }

    if result.value.is_empty() && result.issues.is_empty() {
        result
            .issues
            .push(ParseIssue::new(AddressParseError::InvalidMailbox(
                raw.to_string(),
            )));
    }

    result
}

fn parse_value(value: &Value) -> PartialParse<Vec<Mailbox>> {
    match value {
        Value::Null => PartialParse::default(),
        Value::Array(items) => {
            let mut result: PartialParse<Vec<Mailbox>> = PartialParse::default();
            for item in items {
                let parsed = parse_entry(item);
                result.value.extend(parsed.value);
                result.issues.extend(parsed.issues);
            }
            result
        }
        Value::Object(map) => match map.get("addresses") {
            Some(inner) => parse_value(inner),
            None => parse_entry(value),
        },
        Value::String(text) => parse_mailbox_list(text),
        other => PartialParse {
            value: Vec::new(),
            issues: vec![ParseIssue::new(AddressParseError::UnsupportedShape(
                other.to_string(),
            ))],
        },
    }
}

fn parse_entry(entry: &Value) -> PartialParse<Vec<Mailbox>> {
    match entry {
        Value::String(text) => parse_mailbox_list(text),
        Value::Object(map) => {
            let address = map
                .get("address")
                .or_else(|| map.get("email"))
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|addr| is_plausible_address(addr));
            let name = map.get("name").and_then(Value::as_str);

            match address {
                Some(address) => PartialParse::clean(vec![Mailbox::new(name, address)]),
                None => PartialParse {
                    value: Vec::new(),
                    issues: vec![ParseIssue::new(AddressParseError::UnsupportedShape(
                        entry.to_string(),
                    ))],
                },
            }
        }
        Value::Null => PartialParse::default(),
        other => PartialParse {
            value: Vec::new(),
            issues: vec![ParseIssue::new(AddressParseError::UnsupportedShape(
                other.to_string(),
            ))],
        },
    }
}

fn is_plausible_address(addr: &str) -> bool {
    let addr = addr.trim();
    match addr.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && !domain.is_empty() && !addr.contains(char::is_whitespace)
        }
        None => false,
    }
}
