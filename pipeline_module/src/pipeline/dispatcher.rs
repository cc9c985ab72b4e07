//! Reply delivery back to the originating channel.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::channel::{Channel, ChannelAdapter, ReplyRoute};
use crate::domain::{Message, MessageStatus};
use crate::jobs::{PipelineError, PipelineJob};
use crate::store::RecordStore;

/// Job: deliver every synthesized reply exactly once.
pub struct DispatchJob {
    store: Arc<dyn RecordStore>,
    adapters: HashMap<Channel, Arc<dyn ChannelAdapter>>,
}

impl DispatchJob {
    pub fn new(
        store: Arc<dyn RecordStore>,
        adapters: HashMap<Channel, Arc<dyn ChannelAdapter>>,
    ) -> Self {
        Self { store, adapters }
    }

    /// Deliver one message's reply; `Ok(false)` covers every benign skip.
    pub fn dispatch(&self, message: &Message) -> Result<bool, PipelineError> {
        // successful is sticky; nothing is ever redelivered.
        if message.status == MessageStatus::Successful {
            return Ok(false);
        }
        if !message.has_reply() {
            debug!("message {} has no reply yet, skipping dispatch", message.mid);
            return Ok(false);
        }

        let route = ReplyRoute::for_message(message);
        if !route.is_deliverable() {
            // Left in processed for operator attention or a later backfill;
            // never silently marked successful.
            warn!(
                "message {} is missing the routing fields for {}, leaving undelivered",
                message.mid, message.source
            );
            return Ok(false);
        }

        let adapter = match self.adapters.get(&message.source) {
            Some(adapter) => adapter,
            None => {
                warn!(
                    "no adapter registered for {}, leaving message {} undelivered",
                    message.source, message.mid
                );
                return Ok(false);
            }
        };

        // Claim the message for this delivery attempt.
        if !self.store.transition_message(
            message.mid,
            MessageStatus::Processed,
            MessageStatus::Handling,
        )? {
            debug!("message {} is being dispatched by another worker", message.mid);
            return Ok(false);
        }

        let reply = message.reply.as_deref().unwrap_or_default();
        match adapter.send_reply(&route, reply) {
            Ok(()) => {
                if !self.store.transition_message(
                    message.mid,
                    MessageStatus::Handling,
                    MessageStatus::Successful,
                )? {
                    warn!(
                        "message {} left handling while we delivered it",
                        message.mid
                    );
                    return Ok(false);
                }
                info!("delivered reply for message {} via {}", message.mid, message.source);
                Ok(true)
            }
            Err(err) => {
                error!("delivery failed for message {}: {}", message.mid, err);
                // Release the claim so the next cycle retries.
                self.store.transition_message(
                    message.mid,
                    MessageStatus::Handling,
                    MessageStatus::Processed,
                )?;
                Ok(false)
            }
        }
    }
}

impl PipelineJob for DispatchJob {
    fn name(&self) -> &'static str {
        "reply-dispatcher"
    }

    fn run_once(&self) -> Result<usize, PipelineError> {
        let candidates = self.store.messages_with_status(MessageStatus::Processed)?;
        let mut settled = 0usize;
        for message in candidates {
            match self.dispatch(&message) {
                Ok(true) => settled += 1,
                Ok(false) => {}
                Err(err) => error!("failed to dispatch message {}: {}", message.mid, err),
            }
        }
        Ok(settled)
    }
}
