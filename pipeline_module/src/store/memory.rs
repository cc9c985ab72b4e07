//! In-memory store used by unit and integration tests.

use std::collections::HashMap;
use std::sync::Mutex;

use uuid::Uuid;

use crate::domain::{Message, MessageStatus, Task, TaskPlatform};

use super::{check_transition, RecordStore, StoreError};

#[derive(Default)]
struct Inner {
    messages: HashMap<Uuid, Message>,
    git_tasks: HashMap<Uuid, Task>,
    jira_tasks: HashMap<Uuid, Task>,
}

impl Inner {
    fn tasks(&self, platform: TaskPlatform) -> &HashMap<Uuid, Task> {
        match platform {
            TaskPlatform::Git => &self.git_tasks,
            TaskPlatform::Jira => &self.jira_tasks,
        }
    }

    fn tasks_mut(&mut self, platform: TaskPlatform) -> &mut HashMap<Uuid, Task> {
        match platform {
            TaskPlatform::Git => &mut self.git_tasks,
            TaskPlatform::Jira => &mut self.jira_tasks,
        }
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for InMemoryStore {
    fn create_message(&self, message: &Message) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.messages.insert(message.mid, message.clone());
        Ok(())
    }

    fn message(&self, mid: Uuid) -> Result<Option<Message>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.messages.get(&mid).cloned())
    }

    fn update_message(&self, message: &Message) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.messages.contains_key(&message.mid) {
            return Err(StoreError::NotFound {
                what: "message",
                id: message.mid,
            });
        }
        inner.messages.insert(message.mid, message.clone());
        Ok(())
    }

    fn unprocessed_messages(&self) -> Result<Vec<Message>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut found: Vec<Message> = inner
            .messages
            .values()
            .filter(|m| !m.processed)
            .cloned()
            .collect();
        found.sort_by_key(|m| m.message_datetime);
        Ok(found)
    }

    fn messages_with_status(&self, status: MessageStatus) -> Result<Vec<Message>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut found: Vec<Message> = inner
            .messages
            .values()
            .filter(|m| m.status == status)
            .cloned()
            .collect();
        found.sort_by_key(|m| m.message_datetime);
        Ok(found)
    }

    fn message_by_external_id(&self, external_id: &str) -> Result<Option<Message>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .messages
            .values()
            .find(|m| m.external_id.as_deref() == Some(external_id))
            .cloned())
    }

    fn recent_messages_for_sender(
        &self,
        sender: &str,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut found: Vec<Message> = inner
            .messages
            .values()
            .filter(|m| m.sender == sender)
            .cloned()
            .collect();
        found.sort_by_key(|m| m.message_datetime);
        if found.len() > limit {
            found.drain(..found.len() - limit);
        }
        Ok(found)
    }

    fn transition_message(
        &self,
        mid: Uuid,
        expected: MessageStatus,
        next: MessageStatus,
    ) -> Result<bool, StoreError> {
        check_transition(expected, next)?;
        let mut inner = self.inner.lock().unwrap();
        let message = inner.messages.get_mut(&mid).ok_or(StoreError::NotFound {
            what: "message",
            id: mid,
        })?;
        if message.status != expected {
            return Ok(false);
        }
        message.status = next;
        Ok(true)
    }

    fn create_task(&self, task: &Task) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.tasks_mut(task.platform).insert(task.task_id, task.clone());
        Ok(())
    }

    fn update_task(&self, task: &Task) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let tasks = inner.tasks_mut(task.platform);
        if !tasks.contains_key(&task.task_id) {
            return Err(StoreError::NotFound {
                what: "task",
                id: task.task_id,
            });
        }
        tasks.insert(task.task_id, task.clone());
        Ok(())
    }

    fn task(&self, platform: TaskPlatform, task_id: Uuid) -> Result<Option<Task>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.tasks(platform).get(&task_id).cloned())
    }

    fn pending_tasks(&self, platform: TaskPlatform) -> Result<Vec<Task>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut found: Vec<Task> = inner
            .tasks(platform)
            .values()
            .filter(|t| t.status == crate::domain::TaskStatus::Pending)
            .cloned()
            .collect();
        found.sort_by_key(|t| t.creation_date);
        Ok(found)
    }

    fn tasks_for_message(&self, mid: Uuid) -> Result<Vec<Task>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut found: Vec<Task> = inner
            .git_tasks
            .values()
            .chain(inner.jira_tasks.values())
            .filter(|t| t.mid == mid)
            .cloned()
            .collect();
        found.sort_by_key(|t| t.creation_date);
        Ok(found)
    }
}
