//! Direct conversational replies for greeting-classified messages.
//!
//! Greetings bypass the task pipeline entirely: no tasks are created and
//! the synthesizer never sees them. The handler writes the reply straight
//! onto the message and leaves it for the dispatcher.

use std::sync::Arc;

use tracing::{error, info};

use crate::domain::Message;
use crate::jobs::PipelineError;
use crate::llm::{ChatMessage, ClientPool, LlmError};
use crate::store::RecordStore;

const GREETING_SYSTEM_PROMPT: &str = "You are a helpful assistant responding to messages. Be polite and conversational. Refer to the user's name if available in the history. Keep responses concise.";

/// Written when the conversational model fails.
pub const GREETING_FALLBACK_REPLY: &str =
    "I received your message. How can I assist you further?";

pub trait GreetingResponder: Send + Sync {
    fn respond(
        &self,
        sender: &str,
        content: &str,
        history: &[Message],
    ) -> Result<String, LlmError>;
}

/// Responder backed by a per-sender client from the pool.
pub struct LlmGreetingResponder {
    pool: Arc<ClientPool>,
}

impl LlmGreetingResponder {
    pub fn new(pool: Arc<ClientPool>) -> Self {
        Self { pool }
    }
}

impl GreetingResponder for LlmGreetingResponder {
    fn respond(
        &self,
        sender: &str,
        content: &str,
        history: &[Message],
    ) -> Result<String, LlmError> {
        let mut messages = vec![ChatMessage::system(GREETING_SYSTEM_PROMPT)];
        for past in history {
            if !past.content.trim().is_empty() {
                messages.push(ChatMessage::user(past.content.clone()));
            }
            if let Some(reply) = past.reply.as_deref() {
                if !reply.trim().is_empty() {
                    messages.push(ChatMessage::assistant(reply));
                }
            }
        }
        messages.push(ChatMessage::user(content));

        let client = self.pool.client_for(sender);
        client.chat(&messages)
    }
}

pub struct GreetingHandler {
    store: Arc<dyn RecordStore>,
    responder: Arc<dyn GreetingResponder>,
    history_limit: usize,
}

impl GreetingHandler {
    pub fn new(
        store: Arc<dyn RecordStore>,
        responder: Arc<dyn GreetingResponder>,
        history_limit: usize,
    ) -> Self {
        Self {
            store,
            responder,
            history_limit,
        }
    }

    /// Write a conversational reply onto the message.
    pub fn handle(&self, message: &Message) -> Result<bool, PipelineError> {
        let history: Vec<Message> = self
            .store
            .recent_messages_for_sender(&message.sender, self.history_limit)?
            .into_iter()
            .filter(|past| past.mid != message.mid)
            .collect();

        let reply = match self
            .responder
            .respond(&message.sender, &message.content, &history)
        {
            Ok(reply) if !reply.trim().is_empty() => reply,
            Ok(_) => GREETING_FALLBACK_REPLY.to_string(),
            Err(err) => {
                error!("greeting reply failed for message {}: {}", message.mid, err);
                GREETING_FALLBACK_REPLY.to_string()
            }
        };

        let mut updated = match self.store.message(message.mid)? {
            Some(current) => current,
            None => return Ok(false),
        };
        if updated.has_reply() {
            return Ok(false);
        }
        updated.reply = Some(reply);
        updated.completion_date = Some(chrono::Utc::now());
        self.store.update_message(&updated)?;
        info!("wrote greeting reply for message {}", updated.mid);
        Ok(true)
    }
}
