//! Inbound channel polling and authorization gating.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::channel::{Channel, ChannelAdapter, RawInbound};
use crate::domain::Message;
use crate::jobs::{PipelineError, PipelineJob};
use crate::store::RecordStore;

pub trait AuthorizationService: Send + Sync {
    fn is_authorized(&self, identity: &str) -> bool;
}

/// Allowlist gate; an empty list admits everyone.
pub struct AllowlistAuthorizer {
    allowed: Vec<String>,
}

impl AllowlistAuthorizer {
    pub fn new(allowed: Vec<String>) -> Self {
        Self {
            allowed: allowed
                .into_iter()
                .map(|entry| entry.to_ascii_lowercase())
                .collect(),
        }
    }
}

impl AuthorizationService for AllowlistAuthorizer {
    fn is_authorized(&self, identity: &str) -> bool {
        self.allowed.is_empty() || self.allowed.contains(&identity.to_ascii_lowercase())
    }
}

/// Job: pull unread messages off one channel and persist them as pending.
pub struct InboundPollJob {
    store: Arc<dyn RecordStore>,
    adapter: Arc<dyn ChannelAdapter>,
    authorizer: Arc<dyn AuthorizationService>,
}

impl InboundPollJob {
    pub fn new(
        store: Arc<dyn RecordStore>,
        adapter: Arc<dyn ChannelAdapter>,
        authorizer: Arc<dyn AuthorizationService>,
    ) -> Self {
        Self {
            store,
            adapter,
            authorizer,
        }
    }

    fn ingest(&self, raw: &RawInbound) -> Result<bool, PipelineError> {
        // The channel delivers at least once; the external id makes a second
        // fetch of the same message a no-op.
        if self.store.message_by_external_id(&raw.external_id)?.is_some() {
            debug!("message {} already ingested, consuming", raw.external_id);
            self.adapter.mark_consumed(&raw.external_id)?;
            return Ok(false);
        }

        if !self.authorizer.is_authorized(&raw.sender) {
            // Consumed but never persisted: an unauthorized message must not
            // appear in any later stage's query.
            warn!(
                "unauthorized sender {} on {}, consuming without ingest",
                raw.sender,
                self.adapter.channel()
            );
            self.adapter.mark_consumed(&raw.external_id)?;
            return Ok(false);
        }

        let content = match raw.subject.as_deref() {
            Some(subject) if !subject.trim().is_empty() => {
                format!("{}\n\n{}", subject.trim(), raw.body)
            }
            _ => raw.body.clone(),
        };

        let mut message = Message::inbound(
            self.adapter.channel(),
            raw.sender.clone(),
            raw.sender_name.clone().unwrap_or_else(|| raw.sender.clone()),
            content,
        );
        message.external_id = Some(raw.external_id.clone());
        message.msg_id = raw.msg_id.clone();
        message.channel_id = raw.channel_id.clone();
        message.thread_ts = raw.thread_ts.clone();

        self.store.create_message(&message)?;
        // Consume only after the record is safe; a failure here re-fetches
        // the message and the dedupe check absorbs it.
        self.adapter.mark_consumed(&raw.external_id)?;
        info!(
            "ingested {} message {} from {}",
            message.source, message.mid, message.sender
        );
        Ok(true)
    }
}

impl PipelineJob for InboundPollJob {
    fn name(&self) -> &'static str {
        match self.adapter.channel() {
            Channel::Email => "email-poller",
            Channel::Slack => "slack-poller",
        }
    }

    fn run_once(&self) -> Result<usize, PipelineError> {
        let unread = self.adapter.fetch_unread()?;
        let mut ingested = 0usize;
        for raw in unread {
            match self.ingest(&raw) {
                Ok(true) => ingested += 1,
                Ok(false) => {}
                Err(err) => error!("failed to ingest message {}: {}", raw.external_id, err),
            }
        }
        Ok(ingested)
    }
}
