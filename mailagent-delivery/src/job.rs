//! The queue payload and how it turns into an envelope.
//!
//! A job carries a fully rendered RFC 5322 message. When the job doesn't list
//! its recipients they are taken from the `To`, `Cc` and `Bcc` headers, and the
//! `Bcc` header never reaches the relay.

use std::fmt;

use mailparse::{MailAddr, MailHeaderMap};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::DeliveryError;

const RECIPIENT_HEADERS: [&str; 3] = ["To", "Cc", "Bcc"];

/// Opaque identifier of the mail record a job was created for.
///
/// Producers send either a number or a string; it is only ever logged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobId {
    Number(u64),
    Text(String),
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(id) => write!(f, "{id}"),
            Self::Text(id) => f.write_str(id),
        }
    }
}

/// A unit of work consumed from a queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailJob {
    pub outgoing_mail: JobId,
    pub message: String,
    #[serde(default, deserialize_with = "nullable_list")]
    pub recipients: Vec<String>,
}

fn nullable_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<Vec<String>>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// Envelope and body ready to hand to a relay session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedMail {
    pub sender: String,
    pub recipients: Vec<String>,
    pub message: String,
}

impl MailJob {
    /// Decode a job from a queue message body.
    pub fn from_slice(body: &[u8]) -> Result<Self, DeliveryError> {
        Ok(serde_json::from_slice(body)?)
    }

    /// Encode the job the way producers publish it.
    pub fn to_vec(&self) -> Result<Vec<u8>, DeliveryError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Work out the envelope and the body that is actually transmitted.
    pub fn prepare(&self) -> Result<PreparedMail, DeliveryError> {
        let (headers, _) = mailparse::parse_headers(self.message.as_bytes())?;

        let sender = headers
            .get_first_value("From")
            .and_then(|from| envelope_address(&from))
            .ok_or(DeliveryError::MissingSender)?;

        let recipients = if self.recipients.is_empty() {
            header_recipients(&headers)
        } else {
            self.recipients
                .iter()
                .filter_map(|recipient| envelope_address(recipient))
                .collect()
        };

        if recipients.is_empty() {
            return Err(DeliveryError::NoRecipients);
        }

        Ok(PreparedMail {
            sender,
            recipients,
            message: strip_header(&self.message, "Bcc"),
        })
    }
}

fn header_recipients(headers: &[mailparse::MailHeader<'_>]) -> Vec<String> {
    RECIPIENT_HEADERS
        .iter()
        .flat_map(|name| headers.get_all_values(name))
        .flat_map(|value| {
            value
                .split(',')
                .filter_map(envelope_address)
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Reduce an address as written in a header to the bare mailbox used in the envelope.
///
/// Returns `None` for empty fragments. Anything `mailparse` can't make sense of is
/// passed through trimmed.
fn envelope_address(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    let parsed = mailparse::addrparse(value).ok().and_then(|list| {
        list.iter().find_map(|addr| match addr {
            MailAddr::Single(info) => Some(info.addr.clone()),
            MailAddr::Group(group) => group.addrs.first().map(|info| info.addr.clone()),
        })
    });

    Some(parsed.unwrap_or_else(|| value.to_string()))
}

/// Remove every occurrence of a header, including folded continuation lines.
///
/// Only the header block is touched; the body and all other lines are kept byte for byte.
#[must_use]
pub fn strip_header(message: &str, name: &str) -> String {
    let mut output = String::with_capacity(message.len());
    let mut in_headers = true;
    let mut skipping = false;

    for line in message.split_inclusive('\n') {
        if in_headers {
            if line.trim_end_matches(['\r', '\n']).is_empty() {
                in_headers = false;
            } else if line.starts_with([' ', '\t']) {
                if skipping {
                    continue;
                }
            } else {
                skipping = line
                    .split_once(':')
                    .is_some_and(|(field, _)| field.trim_end().eq_ignore_ascii_case(name));
                if skipping {
                    continue;
                }
            }
        }

        output.push_str(line);
    }

    output
}
