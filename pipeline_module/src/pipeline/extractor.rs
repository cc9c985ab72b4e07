//! Task extraction: decompose message content into platform task records.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::domain::{Message, Task, TaskPlatform};
use crate::jobs::PipelineError;
use crate::llm::{ChatClient, LlmError};
use crate::store::RecordStore;

const EXTRACTION_PROMPT: &str = r#"You are a task analyzer. Given message content, extract each GitHub and Jira related task and decide whether each task belongs in GitHub or Jira. Analyze the message content completely and make sure no GitHub or Jira related task is left behind.

Required JSON format:
[
  {
    "title": "Short task title",
    "description": "Detailed task description",
    "platform": "jira" or "git"
  }
]

Always include the GitHub repository name in both title and description for the git platform. Always include the project key and project name in capital letters for the jira platform. Return ONLY the JSON array, with an empty array when the message contains no actionable task.

Content:
"""
{content}
"""
"#;

/// Reply written when the content held nothing actionable, so the message
/// completes without ever entering the synthesizer's wait.
pub const NO_TASKS_REPLY: &str =
    "Sorry, I can't help with that right now - but I'm happy to answer another question!";

/// A task as proposed by the extraction model, platform already normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDraft {
    pub title: String,
    pub description: String,
    pub platform: TaskPlatform,
}

pub trait TaskExtractor: Send + Sync {
    /// Zero drafts is a valid outcome; a malformed model answer must come
    /// back as an empty list, never an error.
    fn extract(&self, content: &str) -> Result<Vec<TaskDraft>, LlmError>;
}

pub struct LlmTaskExtractor {
    client: ChatClient,
}

impl LlmTaskExtractor {
    pub fn new(client: ChatClient) -> Self {
        Self { client }
    }
}

#[derive(Debug, Deserialize)]
struct RawDraft {
    title: String,
    #[serde(default)]
    description: String,
    platform: String,
}

/// Parse the model's answer; unparseable JSON or unknown platforms degrade
/// to fewer (possibly zero) drafts instead of failing the message.
fn parse_drafts(answer: &str) -> Vec<TaskDraft> {
    let stripped = strip_code_fence(answer);
    let raw: Vec<RawDraft> = match serde_json::from_str(stripped) {
        Ok(parsed) => parsed,
        Err(err) => {
            warn!("could not parse task extraction output: {}", err);
            return Vec::new();
        }
    };

    raw.into_iter()
        .filter_map(|draft| match TaskPlatform::parse(&draft.platform) {
            Some(platform) => Some(TaskDraft {
                description: if draft.description.trim().is_empty() {
                    draft.title.clone()
                } else {
                    draft.description
                },
                title: draft.title,
                platform,
            }),
            None => {
                warn!(
                    "dropping extracted task '{}' with unknown platform '{}'",
                    draft.title, draft.platform
                );
                None
            }
        })
        .collect()
}

fn strip_code_fence(answer: &str) -> &str {
    let trimmed = answer.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    trimmed.strip_suffix("```").unwrap_or(trimmed).trim()
}

impl TaskExtractor for LlmTaskExtractor {
    fn extract(&self, content: &str) -> Result<Vec<TaskDraft>, LlmError> {
        let prompt = EXTRACTION_PROMPT.replace("{content}", content);
        let answer = self.client.complete(&prompt)?;
        Ok(parse_drafts(&answer))
    }
}

/// Turns a classified message into persisted pending task records.
pub struct TaskFanout {
    store: Arc<dyn RecordStore>,
    extractor: Arc<dyn TaskExtractor>,
}

impl TaskFanout {
    pub fn new(store: Arc<dyn RecordStore>, extractor: Arc<dyn TaskExtractor>) -> Self {
        Self { store, extractor }
    }

    /// Extract and persist tasks for `message`; returns how many were
    /// posted. Re-invocation after tasks exist is a no-op.
    pub fn extract_and_post(&self, message: &Message) -> Result<usize, PipelineError> {
        if !self.store.tasks_for_message(message.mid)?.is_empty() {
            debug!("message {} already has tasks, skipping extraction", message.mid);
            return Ok(0);
        }

        // Transport failure degrades to "no tasks" like a parse failure
        // does; the fallback reply below keeps the message moving.
        let drafts = match self.extractor.extract(&message.content) {
            Ok(drafts) => drafts,
            Err(err) => {
                error!("task extraction failed for message {}: {}", message.mid, err);
                Vec::new()
            }
        };

        if drafts.is_empty() {
            info!("no tasks found in message {}", message.mid);
            let mut updated = match self.store.message(message.mid)? {
                Some(current) => current,
                None => return Ok(0),
            };
            if !updated.has_reply() {
                updated.reply = Some(NO_TASKS_REPLY.to_string());
                updated.completion_date = Some(chrono::Utc::now());
                self.store.update_message(&updated)?;
            }
            return Ok(0);
        }

        let count = drafts.len();
        for draft in drafts {
            let task = Task::new(message.mid, draft.platform, draft.title, draft.description);
            info!(
                "posting {} task '{}' for message {}",
                task.platform, task.title, message.mid
            );
            self.store.create_task(&task)?;
        }
        Ok(count)
    }
}
