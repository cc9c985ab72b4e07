//! Intent classification and routing for freshly ingested messages.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::domain::{Message, MessageStatus, MessageType};
use crate::jobs::{PipelineError, PipelineJob};
use crate::llm::{ChatClient, LlmError};
use crate::store::RecordStore;

use super::extractor::TaskFanout;
use super::greeting::GreetingHandler;

const CLASSIFICATION_PROMPT: &str = r#"You are a message classification assistant. Classify the message content into EXACTLY ONE of the following categories:
"meeting" - content primarily about organizing or referencing a meeting: invitations with date/time details, video conferencing links, scheduling or rescheduling discussions.
"transcript" - content capturing actual conversation dialogue, with named speakers followed by their statements, often a back-and-forth about GitHub repositories or Jira tickets, or a summary that explicitly references spoken exchanges.
"instructions" - clear action items or task directives related to GitHub or Jira, NOT in dialogue format: "Please create a new GitHub repository for XYZ", "Create a Jira board for the XYZ project", "Update the story points on DEV-123".
"greeting" - anything that does not clearly fit the above: simple greetings, questions about wellbeing, casual conversation, brief acknowledgments.

Rules:
- Select exactly one category for the primary purpose of the message.
- For mixed content, prioritize the main intent (a greeting plus GitHub instructions is "instructions").
- Named speakers with quotations strongly indicate "transcript".
- Mentions of GitHub/Jira without specific tasks do not qualify as "instructions".

Message content:
{body}

Return exactly one word from the list above. If uncertain, choose "greeting"."#;

/// Reply written when a message arrives with no usable content.
const EMPTY_CONTENT_REPLY: &str =
    "I received your message but could not find any content in it. How can I help?";

pub trait IntentClassifier: Send + Sync {
    fn classify(&self, content: &str) -> Result<MessageType, LlmError>;
}

pub struct LlmIntentClassifier {
    client: ChatClient,
}

impl LlmIntentClassifier {
    pub fn new(client: ChatClient) -> Self {
        Self { client }
    }

    /// Accept a recognized label anywhere in the model's answer; `None`
    /// means nothing recognizable came back.
    fn scan_label(answer: &str) -> Option<MessageType> {
        let lowered = answer.to_ascii_lowercase();
        MessageType::ALL
            .into_iter()
            .find(|label| lowered.contains(label.label()))
    }
}

impl IntentClassifier for LlmIntentClassifier {
    fn classify(&self, content: &str) -> Result<MessageType, LlmError> {
        let prompt = CLASSIFICATION_PROMPT.replace("{body}", content);
        let answer = self.client.complete(&prompt)?;
        match Self::scan_label(&answer) {
            Some(label) => Ok(label),
            None => {
                warn!("unrecognized classification '{}', defaulting to greeting", answer);
                Ok(MessageType::Greeting)
            }
        }
    }
}

/// Job: classify every unprocessed message and route it onward.
pub struct ClassifyJob {
    store: Arc<dyn RecordStore>,
    classifier: Arc<dyn IntentClassifier>,
    fanout: Arc<TaskFanout>,
    greeter: Arc<GreetingHandler>,
}

impl ClassifyJob {
    pub fn new(
        store: Arc<dyn RecordStore>,
        classifier: Arc<dyn IntentClassifier>,
        fanout: Arc<TaskFanout>,
        greeter: Arc<GreetingHandler>,
    ) -> Self {
        Self {
            store,
            classifier,
            fanout,
            greeter,
        }
    }

    fn classify_and_route(&self, message: &Message) -> Result<(), PipelineError> {
        // Re-running on an already-classified message is a no-op.
        if message.processed {
            return Ok(());
        }

        let content = message.content.trim();
        let label = if content.is_empty() {
            MessageType::Greeting
        } else {
            // LLM failure resolves to greeting: a mis-classified message
            // still gets a reply instead of getting stuck.
            match self.classifier.classify(content) {
                Ok(label) => label,
                Err(err) => {
                    error!("classification failed for message {}: {}", message.mid, err);
                    MessageType::Greeting
                }
            }
        };

        // The pending -> processed transition doubles as the claim; a
        // concurrent classifier that loses it must not route again.
        if !self
            .store
            .transition_message(message.mid, MessageStatus::Pending, MessageStatus::Processed)?
        {
            debug!("message {} already claimed by another classifier", message.mid);
            return Ok(());
        }

        let mut updated = match self.store.message(message.mid)? {
            Some(current) => current,
            None => return Ok(()),
        };
        updated.message_type = Some(label);
        updated.processed = true;
        if content.is_empty() {
            updated.reply = Some(EMPTY_CONTENT_REPLY.to_string());
            updated.completion_date = Some(chrono::Utc::now());
        }
        self.store.update_message(&updated)?;
        info!("classified message {} as {}", updated.mid, label.label());

        if content.is_empty() {
            return Ok(());
        }

        match label {
            MessageType::Greeting => {
                self.greeter.handle(&updated)?;
            }
            MessageType::Transcript | MessageType::Instructions => {
                self.fanout.extract_and_post(&updated)?;
            }
            MessageType::Meeting => {
                // Meeting handling is not wired up; the record stays parked
                // for operator attention.
                info!("message {} classified as meeting, no handler registered", updated.mid);
            }
        }
        Ok(())
    }
}

impl PipelineJob for ClassifyJob {
    fn name(&self) -> &'static str {
        "classifier"
    }

    fn run_once(&self) -> Result<usize, PipelineError> {
        let messages = self.store.unprocessed_messages()?;
        let mut settled = 0usize;
        for message in messages {
            match self.classify_and_route(&message) {
                Ok(()) => settled += 1,
                Err(err) => error!("failed to classify message {}: {}", message.mid, err),
            }
        }
        Ok(settled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use crate::llm::ChatClient;
    use crate::pipeline::extractor::{TaskDraft, TaskExtractor};
    use crate::pipeline::greeting::GreetingResponder;
    use crate::store::InMemoryStore;

    struct FixedClassifier(MessageType);

    impl IntentClassifier for FixedClassifier {
        fn classify(&self, _content: &str) -> Result<MessageType, LlmError> {
            Ok(self.0)
        }
    }

    struct FailingClassifier;

    impl IntentClassifier for FailingClassifier {
        fn classify(&self, _content: &str) -> Result<MessageType, LlmError> {
            Err(LlmError::EmptyResponse)
        }
    }

    struct NoDrafts;

    impl TaskExtractor for NoDrafts {
        fn extract(&self, _content: &str) -> Result<Vec<TaskDraft>, LlmError> {
            Ok(Vec::new())
        }
    }

    struct EchoResponder;

    impl GreetingResponder for EchoResponder {
        fn respond(
            &self,
            _sender: &str,
            content: &str,
            _history: &[Message],
        ) -> Result<String, LlmError> {
            Ok(format!("hello back: {content}"))
        }
    }

    fn job_with(classifier: Arc<dyn IntentClassifier>) -> (Arc<InMemoryStore>, ClassifyJob) {
        let store = Arc::new(InMemoryStore::new());
        let fanout = Arc::new(TaskFanout::new(store.clone(), Arc::new(NoDrafts)));
        let greeter = Arc::new(GreetingHandler::new(store.clone(), Arc::new(EchoResponder), 10));
        let job = ClassifyJob::new(store.clone(), classifier, fanout, greeter);
        (store, job)
    }

    fn seeded(store: &InMemoryStore, content: &str) -> Message {
        let msg = Message::inbound(
            Channel::Slack,
            "U1".to_string(),
            "Ada".to_string(),
            content.to_string(),
        );
        store.create_message(&msg).expect("create");
        msg
    }

    #[test]
    fn greeting_gets_direct_reply_and_no_tasks() {
        let (store, job) = job_with(Arc::new(FixedClassifier(MessageType::Greeting)));
        let msg = seeded(&store, "hey, how are you?");

        assert_eq!(job.run_once().expect("run"), 1);

        let stored = store.message(msg.mid).expect("get").expect("exists");
        assert_eq!(stored.message_type, Some(MessageType::Greeting));
        assert!(stored.processed);
        assert_eq!(stored.status, MessageStatus::Processed);
        assert!(stored.has_reply());
        assert!(store.tasks_for_message(msg.mid).expect("tasks").is_empty());
    }

    #[test]
    fn classifier_error_defaults_to_greeting() {
        let (store, job) = job_with(Arc::new(FailingClassifier));
        let msg = seeded(&store, "anything at all");

        job.run_once().expect("run");

        let stored = store.message(msg.mid).expect("get").expect("exists");
        assert_eq!(stored.message_type, Some(MessageType::Greeting));
        assert!(stored.has_reply());
    }

    #[test]
    fn empty_content_finalized_without_llm() {
        let (store, job) = job_with(Arc::new(FailingClassifier));
        let msg = seeded(&store, "   ");

        job.run_once().expect("run");

        let stored = store.message(msg.mid).expect("get").expect("exists");
        assert!(stored.processed);
        assert_eq!(stored.message_type, Some(MessageType::Greeting));
        assert_eq!(stored.reply.as_deref(), Some(EMPTY_CONTENT_REPLY));
    }

    #[test]
    fn reprocessing_is_a_noop() {
        let (store, job) = job_with(Arc::new(FixedClassifier(MessageType::Greeting)));
        let msg = seeded(&store, "hello");

        job.run_once().expect("first");
        let after_first = store.message(msg.mid).expect("get").expect("exists");

        // Second pass selects nothing and changes nothing.
        assert_eq!(job.run_once().expect("second"), 0);
        let after_second = store.message(msg.mid).expect("get").expect("exists");
        assert_eq!(after_first.reply, after_second.reply);
        assert_eq!(after_first.status, after_second.status);
    }

    #[test]
    fn label_scan_accepts_embedded_labels() {
        assert_eq!(
            LlmIntentClassifier::scan_label("I think this is: instructions."),
            Some(MessageType::Instructions)
        );
        assert_eq!(
            LlmIntentClassifier::scan_label("TRANSCRIPT"),
            Some(MessageType::Transcript)
        );
        assert_eq!(LlmIntentClassifier::scan_label("no idea"), None);
    }

    #[test]
    fn llm_classifier_parses_over_http() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(
                serde_json::json!({
                    "choices": [{ "message": { "role": "assistant", "content": "instructions" } }]
                })
                .to_string(),
            )
            .create();

        let classifier = LlmIntentClassifier::new(ChatClient::new(server.url(), "k", "m"));
        let label = classifier.classify("create a repo").expect("classify");
        assert_eq!(label, MessageType::Instructions);
    }
}
