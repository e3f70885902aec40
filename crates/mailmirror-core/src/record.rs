//! Fetched message records and their delivery status.

use std::fmt;

/// Delivery status of a message, derived from Gmail label data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    /// Message was received.
    Received,
    /// Message was sent by the account owner.
    Sent,
    /// Message was sent to the owner's own inbox.
    SentReceived,
    /// Message is a draft.
    Draft,
    /// Server provided no label data.
    Unknown,
}

impl MessageStatus {
    /// Derives the status from an `X-GM-LABELS` set.
    ///
    /// `None` means the attribute was absent (non-Gmail server); a status is
    /// never fabricated in that case.
    #[must_use]
    pub fn from_labels<S: AsRef<str>>(labels: Option<&[S]>) -> Self {
        let Some(labels) = labels else {
            return Self::Unknown;
        };

        let has = |needle: &str| labels.iter().any(|l| l.as_ref() == needle);

        if has("\\Sent") && has("\\Inbox") {
            Self::SentReceived
        } else if has("\\Sent") {
            Self::Sent
        } else if has("\\Draft") {
            Self::Draft
        } else {
            Self::Received
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Received => "Received",
            Self::Sent => "Sent",
            Self::SentReceived => "Sent+Received",
            Self::Draft => "Draft",
            Self::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// One fully fetched message, ready for the sink.
#[derive(Debug, Clone)]
pub struct Record {
    /// Sequence number within the currently selected folder.
    pub seq: u32,
    /// Mailbox-scoped unique identifier.
    pub uid: u32,
    /// Server INTERNALDATE, e.g. `01-Jan-2020 10:20:30 +0000`.
    pub internal_date: String,
    /// Raw RFC822 message bytes.
    pub body: Vec<u8>,
    /// Derived delivery status.
    pub status: MessageStatus,
}
