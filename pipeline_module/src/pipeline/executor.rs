//! Per-task execution worker.
//!
//! Claims one pending task under a TTL lock, hands its description to the
//! platform agent, then runs a second model pass to read a status out of the
//! agent's free-form answer. The task record is written to a terminal,
//! reply-bearing state exactly once.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use task_runner_module::PlatformRunner;

use crate::domain::{Task, TaskPlatform, TaskStatus};
use crate::jobs::{PipelineError, PipelineJob};
use crate::llm::{ChatClient, LlmError};
use crate::lock::{acquire_guard, WorkLock};
use crate::store::RecordStore;

const VERIFICATION_PROMPT: &str = r#"Analyze the following {platform} API response and determine if the operation was successful or resulted in an error.

Response: {response}

Return ONLY one of the following status values:
- "completed" if the operation was successful
- "failed" if there was an error
- "pending" if the status is unclear

Status:"#;

/// Stored on a task whose agent answer was blank.
const EMPTY_RESULT_REPLY: &str = "(platform agent returned an empty response)";

pub trait ResultVerifier: Send + Sync {
    fn verify(&self, platform: TaskPlatform, raw: &str) -> Result<TaskStatus, LlmError>;
}

pub struct LlmResultVerifier {
    client: ChatClient,
}

impl LlmResultVerifier {
    pub fn new(client: ChatClient) -> Self {
        Self { client }
    }
}

impl ResultVerifier for LlmResultVerifier {
    fn verify(&self, platform: TaskPlatform, raw: &str) -> Result<TaskStatus, LlmError> {
        let prompt = VERIFICATION_PROMPT
            .replace("{platform}", platform.label())
            .replace("{response}", raw);
        let verdict = self.client.complete(&prompt)?;
        let lowered = verdict.trim().to_ascii_lowercase();
        // "completed" maps onto the stored terminal status "processed".
        Ok(if lowered.contains("completed") {
            TaskStatus::Processed
        } else if lowered.contains("failed") {
            TaskStatus::Failed
        } else if lowered.contains("pending") {
            TaskStatus::Pending
        } else {
            warn!("unexpected verifier verdict '{}', defaulting to pending", verdict);
            TaskStatus::Pending
        })
    }
}

/// Job: drain pending git and jira tasks, one lock-guarded execution each.
pub struct TaskExecutionJob {
    store: Arc<dyn RecordStore>,
    lock: Arc<dyn WorkLock>,
    runners: HashMap<TaskPlatform, Arc<dyn PlatformRunner>>,
    verifier: Arc<dyn ResultVerifier>,
    lock_ttl: Duration,
    stale_verdict_limit: u32,
}

impl TaskExecutionJob {
    pub fn new(
        store: Arc<dyn RecordStore>,
        lock: Arc<dyn WorkLock>,
        runners: HashMap<TaskPlatform, Arc<dyn PlatformRunner>>,
        verifier: Arc<dyn ResultVerifier>,
        lock_ttl: Duration,
        stale_verdict_limit: u32,
    ) -> Self {
        Self {
            store,
            lock,
            runners,
            verifier,
            lock_ttl,
            stale_verdict_limit,
        }
    }

    fn lock_key(task: &Task) -> String {
        format!("task:{}:{}", task.platform, task.task_id)
    }

    /// Execute one pending task; `Ok(true)` means it reached a terminal
    /// state in this pass.
    pub fn execute_one(&self, task: &Task) -> Result<bool, PipelineError> {
        let key = Self::lock_key(task);
        let guard = match acquire_guard(self.lock.as_ref(), &key, self.lock_ttl)? {
            Some(guard) => guard,
            None => {
                // Another worker owns this task for now; not an error.
                debug!("task {} is locked by another worker", task.task_id);
                return Ok(false);
            }
        };

        // Re-read under the lock: the listing may be stale.
        let mut current = match self.store.task(task.platform, task.task_id)? {
            Some(current) => current,
            None => return Ok(false),
        };
        if current.status != TaskStatus::Pending {
            return Ok(false);
        }

        let runner = match self.runners.get(&current.platform) {
            Some(runner) => runner,
            None => {
                warn!(
                    "no runner configured for {} tasks, leaving task {} pending",
                    current.platform, current.task_id
                );
                return Ok(false);
            }
        };

        let input = format!("{}: {}", current.title, current.description);
        info!("executing {} task {}: {}", current.platform, current.task_id, current.title);

        let (status, reply) = match runner.run(&input) {
            Ok(raw) => {
                let verdict = match self.verifier.verify(current.platform, &raw) {
                    Ok(verdict) => verdict,
                    Err(err) => {
                        error!("result verification failed for task {}: {}", current.task_id, err);
                        TaskStatus::Pending
                    }
                };
                match verdict {
                    TaskStatus::Pending => {
                        return self.record_stale_verdict(&mut current, &raw);
                    }
                    terminal => {
                        let reply = if raw.trim().is_empty() {
                            EMPTY_RESULT_REPLY.to_string()
                        } else {
                            raw
                        };
                        (terminal, reply)
                    }
                }
            }
            // Tool failure is terminal: the error text becomes the reply so
            // the owning message can still complete.
            Err(err) => (TaskStatus::Failed, format!("task execution failed: {err}")),
        };

        current.status = status;
        current.reply = reply;
        current.completion_date = Some(chrono::Utc::now());
        self.store.update_task(&current)?;
        info!("task {} finished with status {}", current.task_id, current.status);

        drop(guard);
        Ok(true)
    }

    /// An ambiguous verdict leaves the task pending for a later retry, up
    /// to a limit; after that it is failed so the owning message can move.
    fn record_stale_verdict(&self, task: &mut Task, raw: &str) -> Result<bool, PipelineError> {
        task.stale_verdicts += 1;
        if task.stale_verdicts >= self.stale_verdict_limit {
            task.status = TaskStatus::Failed;
            task.reply = format!(
                "no clear outcome after {} attempts; last response: {}",
                task.stale_verdicts, raw
            );
            task.completion_date = Some(chrono::Utc::now());
            self.store.update_task(task)?;
            warn!(
                "task {} failed after {} ambiguous verdicts",
                task.task_id, task.stale_verdicts
            );
            return Ok(true);
        }

        self.store.update_task(task)?;
        info!(
            "task {} verdict unclear ({}/{}), staying pending",
            task.task_id, task.stale_verdicts, self.stale_verdict_limit
        );
        Ok(false)
    }
}

impl PipelineJob for TaskExecutionJob {
    fn name(&self) -> &'static str {
        "task-executor"
    }

    fn run_once(&self) -> Result<usize, PipelineError> {
        let mut settled = 0usize;
        for platform in TaskPlatform::ALL {
            for task in self.store.pending_tasks(platform)? {
                match self.execute_one(&task) {
                    Ok(true) => settled += 1,
                    Ok(false) => {}
                    Err(err) => error!("failed to execute task {}: {}", task.task_id, err),
                }
            }
        }
        Ok(settled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::InMemoryWorkLock;
    use crate::store::InMemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use task_runner_module::RunnerError;
    use uuid::Uuid;

    struct CountingRunner {
        calls: AtomicUsize,
        response: String,
    }

    impl CountingRunner {
        fn new(response: &str) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                response: response.to_string(),
            })
        }
    }

    impl PlatformRunner for CountingRunner {
        fn run(&self, _description: &str) -> Result<String, RunnerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.response.clone())
        }
    }

    struct BrokenRunner;

    impl PlatformRunner for BrokenRunner {
        fn run(&self, _description: &str) -> Result<String, RunnerError> {
            Err(RunnerError::MissingEndpoint("GIT_AGENT_URL".to_string()))
        }
    }

    struct FixedVerifier(TaskStatus);

    impl ResultVerifier for FixedVerifier {
        fn verify(&self, _platform: TaskPlatform, _raw: &str) -> Result<TaskStatus, LlmError> {
            Ok(self.0)
        }
    }

    fn job(
        store: Arc<InMemoryStore>,
        lock: Arc<InMemoryWorkLock>,
        runner: Arc<dyn PlatformRunner>,
        verifier: Arc<dyn ResultVerifier>,
    ) -> TaskExecutionJob {
        let mut runners: HashMap<TaskPlatform, Arc<dyn PlatformRunner>> = HashMap::new();
        runners.insert(TaskPlatform::Git, runner.clone());
        runners.insert(TaskPlatform::Jira, runner);
        TaskExecutionJob::new(store, lock, runners, verifier, Duration::from_secs(300), 3)
    }

    fn pending_task(store: &InMemoryStore, platform: TaskPlatform) -> Task {
        let task = Task::new(Uuid::new_v4(), platform, "create repo".into(), "repo demo".into());
        store.create_task(&task).expect("create");
        task
    }

    #[test]
    fn successful_run_lands_processed_with_reply() {
        let store = Arc::new(InMemoryStore::new());
        let lock = Arc::new(InMemoryWorkLock::new());
        let runner = CountingRunner::new("repository demo created");
        let exec = job(
            store.clone(),
            lock,
            runner.clone(),
            Arc::new(FixedVerifier(TaskStatus::Processed)),
        );
        let task = pending_task(&store, TaskPlatform::Git);

        assert_eq!(exec.run_once().expect("run"), 1);

        let stored = store
            .task(TaskPlatform::Git, task.task_id)
            .expect("get")
            .expect("exists");
        assert_eq!(stored.status, TaskStatus::Processed);
        assert_eq!(stored.reply, "repository demo created");
        assert!(stored.completion_date.is_some());
        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn runner_failure_is_terminal_with_error_reply() {
        let store = Arc::new(InMemoryStore::new());
        let lock = Arc::new(InMemoryWorkLock::new());
        let exec = job(
            store.clone(),
            lock,
            Arc::new(BrokenRunner),
            Arc::new(FixedVerifier(TaskStatus::Processed)),
        );
        let task = pending_task(&store, TaskPlatform::Jira);

        exec.run_once().expect("run");

        let stored = store
            .task(TaskPlatform::Jira, task.task_id)
            .expect("get")
            .expect("exists");
        assert_eq!(stored.status, TaskStatus::Failed);
        assert!(stored.has_reply());
        assert!(stored.completion_date.is_some());
    }

    #[test]
    fn held_lock_skips_execution() {
        let store = Arc::new(InMemoryStore::new());
        let lock = Arc::new(InMemoryWorkLock::new());
        let runner = CountingRunner::new("ok");
        let exec = job(
            store.clone(),
            lock.clone(),
            runner.clone(),
            Arc::new(FixedVerifier(TaskStatus::Processed)),
        );
        let task = pending_task(&store, TaskPlatform::Git);

        // Simulate a concurrent worker owning the task.
        let key = format!("task:git:{}", task.task_id);
        assert!(lock.acquire(&key, Duration::from_secs(300)).expect("hold"));

        assert_eq!(exec.run_once().expect("run"), 0);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 0);

        let stored = store
            .task(TaskPlatform::Git, task.task_id)
            .expect("get")
            .expect("exists");
        assert_eq!(stored.status, TaskStatus::Pending);
        assert!(stored.completion_date.is_none());
    }

    #[test]
    fn terminal_task_is_not_rerun() {
        let store = Arc::new(InMemoryStore::new());
        let lock = Arc::new(InMemoryWorkLock::new());
        let runner = CountingRunner::new("done");
        let exec = job(
            store.clone(),
            lock,
            runner.clone(),
            Arc::new(FixedVerifier(TaskStatus::Processed)),
        );
        pending_task(&store, TaskPlatform::Git);

        exec.run_once().expect("first");
        exec.run_once().expect("second");
        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn ambiguous_verdicts_escalate_to_failed() {
        let store = Arc::new(InMemoryStore::new());
        let lock = Arc::new(InMemoryWorkLock::new());
        let runner = CountingRunner::new("maybe?");
        let exec = job(
            store.clone(),
            lock,
            runner,
            Arc::new(FixedVerifier(TaskStatus::Pending)),
        );
        let task = pending_task(&store, TaskPlatform::Git);

        // Two ambiguous passes stay pending without a reply.
        exec.run_once().expect("first");
        exec.run_once().expect("second");
        let stored = store
            .task(TaskPlatform::Git, task.task_id)
            .expect("get")
            .expect("exists");
        assert_eq!(stored.status, TaskStatus::Pending);
        assert!(!stored.has_reply());
        assert_eq!(stored.stale_verdicts, 2);

        // The third crosses the limit.
        exec.run_once().expect("third");
        let stored = store
            .task(TaskPlatform::Git, task.task_id)
            .expect("get")
            .expect("exists");
        assert_eq!(stored.status, TaskStatus::Failed);
        assert!(stored.has_reply());
    }

    #[test]
    fn verifier_maps_labels() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(
                serde_json::json!({
                    "choices": [{ "message": { "role": "assistant", "content": "\"completed\"" } }]
                })
                .to_string(),
            )
            .create();

        let verifier = LlmResultVerifier::new(ChatClient::new(server.url(), "k", "m"));
        let verdict = verifier
            .verify(TaskPlatform::Git, "created the repo")
            .expect("verify");
        assert_eq!(verdict, TaskStatus::Processed);
    }
}
