//! Slack Web API adapter.
//!
//! Listens by polling `conversations.history` on the configured channels
//! and replies with `chat.postMessage`. Slack has no read receipt for bot
//! polling, so `mark_consumed` is a no-op and re-fetched messages are
//! absorbed by the ingestion dedupe on the external id.

use serde::{Deserialize, Serialize};

use crate::channel::{AdapterError, Channel, ChannelAdapter, RawInbound, ReplyRoute};

const SLACK_API: &str = "https://slack.com/api";
const HISTORY_PAGE_SIZE: u32 = 20;

pub struct SlackAdapter {
    bot_token: String,
    channels: Vec<String>,
    api_base: String,
    client: reqwest::blocking::Client,
}

impl SlackAdapter {
    pub fn new(bot_token: impl Into<String>, channels: Vec<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            channels,
            api_base: SLACK_API.to_string(),
            client: reqwest::blocking::Client::new(),
        }
    }

    /// Point the adapter at a different endpoint (tests).
    pub fn with_endpoint(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn history(&self, channel: &str) -> Result<Vec<RawInbound>, AdapterError> {
        let url = format!(
            "{}/conversations.history?channel={}&limit={}",
            self.api_base, channel, HISTORY_PAGE_SIZE
        );
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.bot_token)
            .send()?;
        let parsed: HistoryResponse = response.json()?;
        if !parsed.ok {
            return Err(AdapterError::Api(format!(
                "conversations.history failed: {}",
                parsed.error.unwrap_or_default()
            )));
        }

        let mut unread = Vec::new();
        for message in parsed.messages {
            // Bot posts and channel events (joins, edits) stay out of the
            // pipeline.
            if message.subtype.is_some() || message.bot_id.is_some() {
                continue;
            }
            let (Some(user), Some(text)) = (message.user, message.text) else {
                continue;
            };
            if text.trim().is_empty() {
                continue;
            }
            unread.push(RawInbound {
                external_id: format!("{}:{}", channel, message.ts),
                sender: user,
                sender_name: None,
                subject: None,
                body: text,
                channel_id: Some(channel.to_string()),
                thread_ts: Some(message.ts),
                msg_id: None,
            });
        }
        Ok(unread)
    }
}

impl ChannelAdapter for SlackAdapter {
    fn channel(&self) -> Channel {
        Channel::Slack
    }

    fn fetch_unread(&self) -> Result<Vec<RawInbound>, AdapterError> {
        let mut unread = Vec::new();
        for channel in &self.channels {
            unread.extend(self.history(channel)?);
        }
        Ok(unread)
    }

    fn send_reply(&self, route: &ReplyRoute, text: &str) -> Result<(), AdapterError> {
        let channel_id = route
            .channel_id
            .as_deref()
            .ok_or(AdapterError::MissingRoute("channel_id"))?;

        let request = PostMessageRequest {
            channel: channel_id,
            text,
            thread_ts: route.thread_ts.as_deref(),
        };
        let url = format!("{}/chat.postMessage", self.api_base);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.bot_token)
            .json(&request)
            .send()?;
        let parsed: PostMessageResponse = response.json()?;
        if !parsed.ok {
            return Err(AdapterError::Api(format!(
                "chat.postMessage failed: {}",
                parsed.error.unwrap_or_default()
            )));
        }
        Ok(())
    }

    fn mark_consumed(&self, _external_id: &str) -> Result<(), AdapterError> {
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct PostMessageRequest<'a> {
    channel: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    thread_ts: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    messages: Vec<SlackMessage>,
}

#[derive(Debug, Deserialize)]
struct SlackMessage {
    ts: String,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    bot_id: Option<String>,
}
