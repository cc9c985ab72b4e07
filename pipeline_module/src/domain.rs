//! Message and task records and their status state machines.
//!
//! Every pipeline stage communicates with the others exclusively through
//! these records in the store; there is no in-process shared state between
//! stages. The `status`/`processed` fields are what order the stages: a
//! stage's selection query structurally cannot pick up a record that has not
//! passed the stage before it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::channel::Channel;

/// Classification assigned to an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Meeting,
    Transcript,
    Instructions,
    Greeting,
}

impl MessageType {
    pub const ALL: [MessageType; 4] = [
        MessageType::Meeting,
        MessageType::Transcript,
        MessageType::Instructions,
        MessageType::Greeting,
    ];

    pub fn label(self) -> &'static str {
        match self {
            MessageType::Meeting => "meeting",
            MessageType::Transcript => "transcript",
            MessageType::Instructions => "instructions",
            MessageType::Greeting => "greeting",
        }
    }

    /// Whether messages of this type fan out into platform tasks.
    pub fn spawns_tasks(self) -> bool {
        matches!(self, MessageType::Transcript | MessageType::Instructions)
    }
}

/// Message lifecycle.
///
/// Transitions (everything else is invalid):
///
/// ```text
/// pending ──classifier──▶ processed
/// processed ──synthesizer claim──▶ claiming ──commit/revert──▶ processed
/// processed ──dispatcher claim──▶ handling ──delivered──▶ successful
///                                  handling ──send failed──▶ processed
/// ```
///
/// `successful` is sticky: no stage ever selects or mutates a message once it
/// is there. `failed` is a terminal parking state reachable only through
/// operator action, never written by the pipeline itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Processed,
    Claiming,
    Handling,
    Successful,
    Failed,
}

impl MessageStatus {
    pub fn label(self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Processed => "processed",
            MessageStatus::Claiming => "claiming",
            MessageStatus::Handling => "handling",
            MessageStatus::Successful => "successful",
            MessageStatus::Failed => "failed",
        }
    }

    /// Valid transition table for the conditional-update primitive.
    pub fn can_transition_to(self, next: MessageStatus) -> bool {
        use MessageStatus::*;
        matches!(
            (self, next),
            (Pending, Processed)
                | (Processed, Claiming)
                | (Claiming, Processed)
                | (Processed, Handling)
                | (Handling, Successful)
                | (Handling, Processed)
        )
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One inbound communication moving through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub mid: Uuid,
    pub source: Channel,
    pub sender: String,
    pub username: String,
    pub content: String,
    pub message_datetime: DateTime<Utc>,
    #[serde(default)]
    pub message_type: Option<MessageType>,
    pub processed: bool,
    pub status: MessageStatus,
    #[serde(default)]
    pub reply: Option<String>,
    #[serde(default)]
    pub completion_date: Option<DateTime<Utc>>,
    /// Channel-level id used to deduplicate re-fetched inbound messages.
    #[serde(default)]
    pub external_id: Option<String>,
    /// Email message id, required to thread the reply.
    #[serde(default)]
    pub msg_id: Option<String>,
    /// Slack channel, required to post the reply.
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub thread_ts: Option<String>,
}

impl Message {
    /// Fresh record as the pollers persist it.
    pub fn inbound(source: Channel, sender: String, username: String, content: String) -> Self {
        Self {
            mid: Uuid::new_v4(),
            source,
            sender,
            username,
            content,
            message_datetime: Utc::now(),
            message_type: None,
            processed: false,
            status: MessageStatus::Pending,
            reply: None,
            completion_date: None,
            external_id: None,
            msg_id: None,
            channel_id: None,
            thread_ts: None,
        }
    }

    pub fn has_reply(&self) -> bool {
        self.reply
            .as_deref()
            .map(|value| !value.trim().is_empty())
            .unwrap_or(false)
    }
}

/// Which external platform a task belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPlatform {
    Git,
    Jira,
}

impl TaskPlatform {
    pub const ALL: [TaskPlatform; 2] = [TaskPlatform::Git, TaskPlatform::Jira];

    pub fn label(self) -> &'static str {
        match self {
            TaskPlatform::Git => "git",
            TaskPlatform::Jira => "jira",
        }
    }

    /// Normalize the free-form platform string the extraction model emits.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "git" | "github" => Some(TaskPlatform::Git),
            "jira" => Some(TaskPlatform::Jira),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Task lifecycle.
///
/// `pending` is the only non-terminal state. A single executor pass moves a
/// task to `processed` or `failed` (terminal, reply set exactly once); the
/// synthesizer flips terminal tasks to `successful` after the owning
/// message's reply is committed. A task never returns to `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processed,
    Failed,
    Successful,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskStatus::Pending)
    }

    pub fn label(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processed => "processed",
            TaskStatus::Failed => "failed",
            TaskStatus::Successful => "successful",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A delegated unit of work extracted from a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: Uuid,
    /// Owning message.
    pub mid: Uuid,
    pub platform: TaskPlatform,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    /// Raw result text from the platform agent; empty until execution.
    #[serde(default)]
    pub reply: String,
    pub creation_date: DateTime<Utc>,
    #[serde(default)]
    pub completion_date: Option<DateTime<Utc>>,
    /// Consecutive executor passes whose verdict stayed ambiguous.
    #[serde(default)]
    pub stale_verdicts: u32,
}

impl Task {
    pub fn new(mid: Uuid, platform: TaskPlatform, title: String, description: String) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            mid,
            platform,
            title,
            description,
            status: TaskStatus::Pending,
            reply: String::new(),
            creation_date: Utc::now(),
            completion_date: None,
            stale_verdicts: 0,
        }
    }

    pub fn has_reply(&self) -> bool {
        !self.reply.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transition_table() {
        use MessageStatus::*;
        assert!(Pending.can_transition_to(Processed));
        assert!(Processed.can_transition_to(Claiming));
        assert!(Claiming.can_transition_to(Processed));
        assert!(Processed.can_transition_to(Handling));
        assert!(Handling.can_transition_to(Successful));
        assert!(Handling.can_transition_to(Processed));

        // successful is sticky
        assert!(!Successful.can_transition_to(Processed));
        assert!(!Successful.can_transition_to(Handling));
        // no stage skipping
        assert!(!Pending.can_transition_to(Claiming));
        assert!(!Pending.can_transition_to(Successful));
        assert!(!Claiming.can_transition_to(Successful));
    }

    #[test]
    fn platform_normalization() {
        assert_eq!(TaskPlatform::parse("git"), Some(TaskPlatform::Git));
        assert_eq!(TaskPlatform::parse("GitHub"), Some(TaskPlatform::Git));
        assert_eq!(TaskPlatform::parse(" jira "), Some(TaskPlatform::Jira));
        assert_eq!(TaskPlatform::parse("trello"), None);
        assert_eq!(TaskPlatform::parse(""), None);
    }

    #[test]
    fn inbound_message_defaults() {
        let msg = Message::inbound(
            Channel::Email,
            "a@example.com".into(),
            "A".into(),
            "hello".into(),
        );
        assert_eq!(msg.status, MessageStatus::Pending);
        assert!(!msg.processed);
        assert!(msg.message_type.is_none());
        assert!(!msg.has_reply());
    }

    #[test]
    fn task_reply_presence() {
        let mut task = Task::new(Uuid::new_v4(), TaskPlatform::Git, "t".into(), "d".into());
        assert!(!task.has_reply());
        task.reply = "  ".into();
        assert!(!task.has_reply());
        task.reply = "done".into();
        assert!(task.has_reply());
    }
}
