//! Channel model shared by the inbound pollers and the reply dispatcher.

use serde::{Deserialize, Serialize};

use crate::domain::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Slack,
}

impl Channel {
    pub fn label(self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Slack => "slack",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("channel api error: {0}")]
    Api(String),
    #[error("auth error: {0}")]
    Auth(String),
    #[error("missing routing field: {0}")]
    MissingRoute(&'static str),
}

/// One message as fetched from a channel, before persistence.
#[derive(Debug, Clone)]
pub struct RawInbound {
    /// Channel-level unique id; used for deduplication and `mark_consumed`.
    pub external_id: String,
    pub sender: String,
    pub sender_name: Option<String>,
    pub subject: Option<String>,
    /// Body with markup already reduced to plain text.
    pub body: String,
    pub channel_id: Option<String>,
    pub thread_ts: Option<String>,
    /// Email message id used for reply threading.
    pub msg_id: Option<String>,
}

/// Routing fields a reply needs, lifted off the message record.
#[derive(Debug, Clone)]
pub struct ReplyRoute {
    pub channel: Channel,
    pub msg_id: Option<String>,
    pub channel_id: Option<String>,
    pub thread_ts: Option<String>,
}

impl ReplyRoute {
    pub fn for_message(message: &Message) -> Self {
        Self {
            channel: message.source,
            msg_id: message.msg_id.clone(),
            channel_id: message.channel_id.clone(),
            thread_ts: message.thread_ts.clone(),
        }
    }

    /// Whether the route carries the fields its channel requires.
    pub fn is_deliverable(&self) -> bool {
        match self.channel {
            Channel::Email => self.msg_id.is_some(),
            Channel::Slack => self.channel_id.is_some(),
        }
    }
}

/// A two-way connection to one external channel.
pub trait ChannelAdapter: Send + Sync {
    fn channel(&self) -> Channel;

    /// Pull messages not yet consumed from the channel.
    fn fetch_unread(&self) -> Result<Vec<RawInbound>, AdapterError>;

    /// Deliver a reply along the given route.
    fn send_reply(&self, route: &ReplyRoute, text: &str) -> Result<(), AdapterError>;

    /// Tell the channel the message was taken in (read receipt or no-op).
    fn mark_consumed(&self, external_id: &str) -> Result<(), AdapterError>;
}
