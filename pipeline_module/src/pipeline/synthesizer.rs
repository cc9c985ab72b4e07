//! Reply synthesis: fan-in of task results into one user-facing reply.
//!
//! This is the stage with the claim/verify state machine. A message is only
//! merged once every task it owns carries a reply; the `processed ->
//! claiming -> processed` transition keeps two synthesizer workers from
//! both committing, and the commit re-reads the record to detect anything
//! that superseded the claim.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::domain::{Message, MessageStatus, Task, TaskStatus};
use crate::jobs::{PipelineError, PipelineJob};
use crate::llm::{ChatClient, LlmError};
use crate::store::RecordStore;

const SUMMARY_PROMPT: &str = r#"You are an assistant generating a final user-facing response. Use ONLY the tasks listed below and their replies to create a well-structured summary.

Instructions:
- DO NOT include or repeat the task titles.
- Summarize the results naturally as if informing the user of completed work.
- Include all relevant links and names exactly as provided.
- Use a clear, friendly, and professional tone.
- Do not add any information not found in the input.

Tasks and responses:
{details}

Final response to the user:"#;

/// Written when the merge model fails; the message still completes.
pub const SUMMARY_FALLBACK_REPLY: &str =
    "An error occurred while generating a response for your message.";

/// The `{title, reply}` pair fed into the merge prompt.
#[derive(Debug, Clone)]
pub struct CompletedTask {
    pub title: String,
    pub reply: String,
}

impl CompletedTask {
    fn from_tasks(tasks: &[Task]) -> Vec<Self> {
        tasks
            .iter()
            .map(|task| Self {
                title: task.title.clone(),
                reply: task.reply.clone(),
            })
            .collect()
    }
}

pub trait ReplySummarizer: Send + Sync {
    fn summarize(&self, results: &[CompletedTask]) -> Result<String, LlmError>;
}

pub struct LlmReplySummarizer {
    client: ChatClient,
}

impl LlmReplySummarizer {
    pub fn new(client: ChatClient) -> Self {
        Self { client }
    }
}

impl ReplySummarizer for LlmReplySummarizer {
    fn summarize(&self, results: &[CompletedTask]) -> Result<String, LlmError> {
        let details = results
            .iter()
            .map(|task| format!("Title: {}\nReply: {}", task.title, task.reply))
            .collect::<Vec<_>>()
            .join("\n\n");
        let prompt = SUMMARY_PROMPT.replace("{details}", &details);
        self.client.complete(&prompt)
    }
}

/// Job: merge task replies into message replies once all tasks reported.
pub struct SynthesizeJob {
    store: Arc<dyn RecordStore>,
    summarizer: Arc<dyn ReplySummarizer>,
    max_wait: Duration,
    check_interval: Duration,
}

impl SynthesizeJob {
    pub fn new(
        store: Arc<dyn RecordStore>,
        summarizer: Arc<dyn ReplySummarizer>,
        max_wait: Duration,
        check_interval: Duration,
    ) -> Self {
        Self {
            store,
            summarizer,
            max_wait,
            check_interval,
        }
    }

    fn wants(message: &Message) -> bool {
        message.processed
            && !message.has_reply()
            && message
                .message_type
                .map(|label| label.spawns_tasks())
                .unwrap_or(false)
    }

    /// Attempt one synthesis; `Ok(false)` covers every benign abort (tasks
    /// outstanding, claim lost, commit superseded).
    pub fn try_synthesize(&self, message: &Message) -> Result<bool, PipelineError> {
        let tasks = match self.wait_for_replies(message)? {
            Some(tasks) => tasks,
            None => return Ok(false),
        };

        // Claim. Losing simply means another worker got here first.
        if !self.store.transition_message(
            message.mid,
            MessageStatus::Processed,
            MessageStatus::Claiming,
        )? {
            debug!("lost synthesis claim for message {}", message.mid);
            return Ok(false);
        }

        let committed = self.merge_and_commit(message, &tasks);
        if committed.is_err() {
            // Never leave a message stranded in claiming.
            if let Err(revert_err) = self.store.transition_message(
                message.mid,
                MessageStatus::Claiming,
                MessageStatus::Processed,
            ) {
                error!(
                    "failed to revert claim on message {}: {}",
                    message.mid, revert_err
                );
            }
        }
        committed
    }

    fn merge_and_commit(
        &self,
        message: &Message,
        tasks: &[Task],
    ) -> Result<bool, PipelineError> {
        // Merge failure degrades to the fallback reply rather than holding
        // the claim open.
        let completed = CompletedTask::from_tasks(tasks);
        let summary = match self.summarizer.summarize(&completed) {
            Ok(summary) if !summary.trim().is_empty() => summary,
            Ok(_) => SUMMARY_FALLBACK_REPLY.to_string(),
            Err(err) => {
                error!("reply merge failed for message {}: {}", message.mid, err);
                SUMMARY_FALLBACK_REPLY.to_string()
            }
        };

        // Commit: re-read and require the claim to still be ours before
        // writing anything.
        let mut current = match self.store.message(message.mid)? {
            Some(current) => current,
            None => return Ok(false),
        };
        if current.status != MessageStatus::Claiming {
            warn!(
                "message {} no longer claiming (now {}), abandoning synthesis",
                current.mid, current.status
            );
            return Ok(false);
        }
        current.reply = Some(summary);
        current.completion_date = Some(chrono::Utc::now());
        current.status = MessageStatus::Processed;
        self.store.update_message(&current)?;
        info!("synthesized reply for message {}", current.mid);

        // Tasks that fed a committed reply are done for good.
        for task in tasks {
            if task.status.is_terminal() && task.status != TaskStatus::Successful {
                let mut finished = task.clone();
                finished.status = TaskStatus::Successful;
                self.store.update_task(&finished)?;
            }
        }
        Ok(true)
    }

    /// Bounded poll for the fan-in precondition: a non-empty task set where
    /// every task has a reply. No claim is held while waiting, so a worker
    /// dying here strands nothing.
    fn wait_for_replies(&self, message: &Message) -> Result<Option<Vec<Task>>, PipelineError> {
        let mut waited = Duration::ZERO;
        loop {
            let tasks = self.store.tasks_for_message(message.mid)?;
            if tasks.is_empty() {
                // Zero-task messages are finished by the extractor's
                // fallback reply, never by the synthesizer.
                debug!("message {} owns no tasks, skipping synthesis", message.mid);
                return Ok(None);
            }
            if tasks.iter().all(|task| task.has_reply()) {
                return Ok(Some(tasks));
            }
            if waited >= self.max_wait {
                warn!(
                    "timed out waiting for task replies on message {}, retrying next cycle",
                    message.mid
                );
                return Ok(None);
            }
            debug!(
                "waiting for task replies on message {} ({}s/{}s)",
                message.mid,
                waited.as_secs(),
                self.max_wait.as_secs()
            );
            std::thread::sleep(self.check_interval);
            waited += self.check_interval;
        }
    }
}

impl PipelineJob for SynthesizeJob {
    fn name(&self) -> &'static str {
        "reply-synthesizer"
    }

    fn run_once(&self) -> Result<usize, PipelineError> {
        let candidates = self.store.messages_with_status(MessageStatus::Processed)?;
        let mut settled = 0usize;
        for message in candidates.into_iter().filter(Self::wants) {
            match self.try_synthesize(&message) {
                Ok(true) => settled += 1,
                Ok(false) => {}
                Err(err) => error!("failed to synthesize message {}: {}", message.mid, err),
            }
        }
        Ok(settled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use crate::domain::{MessageType, TaskPlatform};
    use crate::store::InMemoryStore;

    struct JoiningSummarizer;

    impl ReplySummarizer for JoiningSummarizer {
        fn summarize(&self, results: &[CompletedTask]) -> Result<String, LlmError> {
            Ok(results
                .iter()
                .map(|task| task.reply.as_str())
                .collect::<Vec<_>>()
                .join(" and "))
        }
    }

    struct FailingSummarizer;

    impl ReplySummarizer for FailingSummarizer {
        fn summarize(&self, _results: &[CompletedTask]) -> Result<String, LlmError> {
            Err(LlmError::EmptyResponse)
        }
    }

    fn seeded(store: &InMemoryStore, label: MessageType) -> Message {
        let mut msg = Message::inbound(
            Channel::Slack,
            "U1".to_string(),
            "Ada".to_string(),
            "do things".to_string(),
        );
        msg.processed = true;
        msg.status = MessageStatus::Processed;
        msg.message_type = Some(label);
        store.create_message(&msg).expect("create");
        msg
    }

    fn finished_task(store: &InMemoryStore, msg: &Message, reply: &str) -> Task {
        let mut task = Task::new(msg.mid, TaskPlatform::Git, "t".into(), "d".into());
        task.status = TaskStatus::Processed;
        task.reply = reply.to_string();
        task.completion_date = Some(chrono::Utc::now());
        store.create_task(&task).expect("create");
        task
    }

    fn quick_job(store: Arc<InMemoryStore>, summarizer: Arc<dyn ReplySummarizer>) -> SynthesizeJob {
        SynthesizeJob::new(
            store,
            summarizer,
            Duration::from_millis(30),
            Duration::from_millis(10),
        )
    }

    #[test]
    fn merges_all_task_replies_and_finishes_tasks() {
        let store = Arc::new(InMemoryStore::new());
        let msg = seeded(&store, MessageType::Instructions);
        finished_task(&store, &msg, "repo demo created");
        finished_task(&store, &msg, "project DEMO created");

        let job = quick_job(store.clone(), Arc::new(JoiningSummarizer));
        assert_eq!(job.run_once().expect("run"), 1);

        let stored = store.message(msg.mid).expect("get").expect("exists");
        assert_eq!(
            stored.reply.as_deref(),
            Some("repo demo created and project DEMO created")
        );
        assert_eq!(stored.status, MessageStatus::Processed);
        assert!(stored.completion_date.is_some());

        let tasks = store.tasks_for_message(msg.mid).expect("tasks");
        assert!(tasks.iter().all(|t| t.status == TaskStatus::Successful));
    }

    #[test]
    fn waits_out_then_abandons_incomplete_tasks() {
        let store = Arc::new(InMemoryStore::new());
        let msg = seeded(&store, MessageType::Transcript);
        finished_task(&store, &msg, "done");
        // A task that never reports.
        store
            .create_task(&Task::new(msg.mid, TaskPlatform::Jira, "stuck".into(), "d".into()))
            .expect("create");

        let job = quick_job(store.clone(), Arc::new(JoiningSummarizer));
        assert_eq!(job.run_once().expect("run"), 0);

        let stored = store.message(msg.mid).expect("get").expect("exists");
        assert_eq!(stored.status, MessageStatus::Processed);
        assert!(!stored.has_reply());
    }

    #[test]
    fn zero_task_message_is_skipped() {
        let store = Arc::new(InMemoryStore::new());
        seeded(&store, MessageType::Instructions);

        let job = quick_job(store.clone(), Arc::new(JoiningSummarizer));
        assert_eq!(job.run_once().expect("run"), 0);
    }

    #[test]
    fn merge_failure_commits_fallback_reply() {
        let store = Arc::new(InMemoryStore::new());
        let msg = seeded(&store, MessageType::Instructions);
        finished_task(&store, &msg, "done");

        let job = quick_job(store.clone(), Arc::new(FailingSummarizer));
        assert_eq!(job.run_once().expect("run"), 1);

        let stored = store.message(msg.mid).expect("get").expect("exists");
        assert_eq!(stored.reply.as_deref(), Some(SUMMARY_FALLBACK_REPLY));
        assert_eq!(stored.status, MessageStatus::Processed);
    }

    #[test]
    fn lost_claim_aborts_without_writing() {
        let store = Arc::new(InMemoryStore::new());
        let msg = seeded(&store, MessageType::Instructions);
        finished_task(&store, &msg, "done");

        // Another worker already claimed the message.
        assert!(store
            .transition_message(msg.mid, MessageStatus::Processed, MessageStatus::Claiming)
            .expect("claim"));

        let job = quick_job(store.clone(), Arc::new(JoiningSummarizer));
        let synthesized = job.try_synthesize(&msg).expect("attempt");
        assert!(!synthesized);

        let stored = store.message(msg.mid).expect("get").expect("exists");
        assert_eq!(stored.status, MessageStatus::Claiming);
        assert!(!stored.has_reply());
    }

    #[test]
    fn greeting_messages_never_selected() {
        let store = Arc::new(InMemoryStore::new());
        let msg = seeded(&store, MessageType::Greeting);
        finished_task(&store, &msg, "spurious");

        let job = quick_job(store.clone(), Arc::new(JoiningSummarizer));
        assert_eq!(job.run_once().expect("run"), 0);
        let stored = store.message(msg.mid).expect("get").expect("exists");
        assert!(!stored.has_reply());
    }
}
