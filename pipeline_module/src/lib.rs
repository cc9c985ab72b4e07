pub mod adapters;
pub mod channel;
pub mod config;
pub mod domain;
pub mod jobs;
pub mod llm;
pub mod lock;
pub mod pipeline;
pub mod store;

pub use channel::{AdapterError, Channel, ChannelAdapter, RawInbound, ReplyRoute};
pub use config::ServiceConfig;
pub use domain::{Message, MessageStatus, MessageType, Task, TaskPlatform, TaskStatus};
pub use jobs::{run_job_loop, spawn_job, PipelineError, PipelineJob};
pub use llm::{ChatClient, ChatMessage, ClientPool, LlmError};
pub use lock::{acquire_guard, InMemoryWorkLock, LockError, MongoWorkLock, WorkLock};
pub use store::{connect_database, InMemoryStore, MongoStore, RecordStore, StoreError};
