//! Persistence for message and task records.
//!
//! The store is the only shared state between pipeline stages. Everything a
//! stage needs (selection queries, whole-record updates, and the conditional
//! status transition used for claiming) lives behind one trait, with a
//! MongoDB implementation for the service and an in-memory one for tests.

mod memory;
mod mongo;

pub use memory::InMemoryStore;
pub use mongo::{connect_database, MongoStore};

use uuid::Uuid;

use crate::domain::{Message, MessageStatus, Task, TaskPlatform};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("mongodb error: {0}")]
    Mongo(#[from] mongodb::error::Error),
    #[error("bson encode error: {0}")]
    BsonSer(#[from] mongodb::bson::ser::Error),
    #[error("{what} {id} not found")]
    NotFound { what: &'static str, id: Uuid },
    #[error("invalid status transition {from} -> {to}")]
    InvalidTransition {
        from: MessageStatus,
        to: MessageStatus,
    },
}

pub trait RecordStore: Send + Sync {
    fn create_message(&self, message: &Message) -> Result<(), StoreError>;
    fn message(&self, mid: Uuid) -> Result<Option<Message>, StoreError>;
    /// Whole-record write; the caller is expected to hold a claim when the
    /// record is contended.
    fn update_message(&self, message: &Message) -> Result<(), StoreError>;
    fn unprocessed_messages(&self) -> Result<Vec<Message>, StoreError>;
    fn messages_with_status(&self, status: MessageStatus) -> Result<Vec<Message>, StoreError>;
    fn message_by_external_id(&self, external_id: &str) -> Result<Option<Message>, StoreError>;
    /// Most recent messages for one sender, oldest first.
    fn recent_messages_for_sender(
        &self,
        sender: &str,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError>;

    /// Conditional state transition: move `mid` from `expected` to `next`
    /// only if its stored status still equals `expected`. Returns whether
    /// this caller won the transition. Transitions outside the documented
    /// table are rejected outright.
    fn transition_message(
        &self,
        mid: Uuid,
        expected: MessageStatus,
        next: MessageStatus,
    ) -> Result<bool, StoreError>;

    fn create_task(&self, task: &Task) -> Result<(), StoreError>;
    fn update_task(&self, task: &Task) -> Result<(), StoreError>;
    fn task(&self, platform: TaskPlatform, task_id: Uuid) -> Result<Option<Task>, StoreError>;
    fn pending_tasks(&self, platform: TaskPlatform) -> Result<Vec<Task>, StoreError>;
    /// All tasks owned by a message, across both platform collections.
    fn tasks_for_message(&self, mid: Uuid) -> Result<Vec<Task>, StoreError>;
}

pub(crate) fn check_transition(
    from: MessageStatus,
    to: MessageStatus,
) -> Result<(), StoreError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(StoreError::InvalidTransition { from, to })
    }
}
