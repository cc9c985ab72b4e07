//! The pipeline stages, each an independently scheduled job over the
//! shared store: poll -> classify -> extract -> execute -> synthesize ->
//! dispatch, with greetings short-circuiting straight to dispatch.

pub mod classifier;
pub mod dispatcher;
pub mod executor;
pub mod extractor;
pub mod greeting;
pub mod poller;
pub mod synthesizer;

pub use classifier::{ClassifyJob, IntentClassifier, LlmIntentClassifier};
pub use dispatcher::DispatchJob;
pub use executor::{LlmResultVerifier, ResultVerifier, TaskExecutionJob};
pub use extractor::{LlmTaskExtractor, TaskDraft, TaskExtractor, TaskFanout, NO_TASKS_REPLY};
pub use greeting::{
    GreetingHandler, GreetingResponder, LlmGreetingResponder, GREETING_FALLBACK_REPLY,
};
pub use poller::{AllowlistAuthorizer, AuthorizationService, InboundPollJob};
pub use synthesizer::{
    CompletedTask, LlmReplySummarizer, ReplySummarizer, SynthesizeJob, SUMMARY_FALLBACK_REPLY,
};
