//! MongoDB-backed store.
//!
//! Messages live in one collection; git and jira tasks keep their own
//! collections, matching the records the rest of the system reads. The
//! conditional status transition maps onto `find_one_and_update` with the
//! expected status in the filter, which is what makes the claim steps safe
//! across concurrent workers.

use mongodb::bson::doc;
use mongodb::options::FindOptions;
use mongodb::sync::{Client, Collection, Database};
use tracing::info;
use uuid::Uuid;

use crate::domain::{Message, MessageStatus, Task, TaskPlatform};

use super::{check_transition, RecordStore, StoreError};

const MESSAGES: &str = "messages";
const GIT_TASKS: &str = "git_tasks";
const JIRA_TASKS: &str = "jira_tasks";

/// Connect and ping, resolving the database name from the URI path when
/// present.
pub fn connect_database(url: &str, default_name: &str) -> Result<Database, StoreError> {
    let client = Client::with_uri_str(url)?;
    let database = client
        .default_database()
        .unwrap_or_else(|| client.database(default_name));
    database.run_command(doc! { "ping": 1 }, None)?;
    info!("connected to mongodb database {}", database.name());
    Ok(database)
}

pub struct MongoStore {
    messages: Collection<Message>,
    git_tasks: Collection<Task>,
    jira_tasks: Collection<Task>,
}

impl MongoStore {
    pub fn new(database: &Database) -> Self {
        Self {
            messages: database.collection(MESSAGES),
            git_tasks: database.collection(GIT_TASKS),
            jira_tasks: database.collection(JIRA_TASKS),
        }
    }

    fn tasks(&self, platform: TaskPlatform) -> &Collection<Task> {
        match platform {
            TaskPlatform::Git => &self.git_tasks,
            TaskPlatform::Jira => &self.jira_tasks,
        }
    }

    fn collect_messages(
        &self,
        filter: mongodb::bson::Document,
        options: Option<FindOptions>,
    ) -> Result<Vec<Message>, StoreError> {
        let cursor = self.messages.find(filter, options)?;
        let mut found = Vec::new();
        for message in cursor {
            found.push(message?);
        }
        Ok(found)
    }
}

impl RecordStore for MongoStore {
    fn create_message(&self, message: &Message) -> Result<(), StoreError> {
        self.messages.insert_one(message, None)?;
        Ok(())
    }

    fn message(&self, mid: Uuid) -> Result<Option<Message>, StoreError> {
        Ok(self
            .messages
            .find_one(doc! { "mid": mid.to_string() }, None)?)
    }

    fn update_message(&self, message: &Message) -> Result<(), StoreError> {
        let result = self.messages.replace_one(
            doc! { "mid": message.mid.to_string() },
            message,
            None,
        )?;
        if result.matched_count == 0 {
            return Err(StoreError::NotFound {
                what: "message",
                id: message.mid,
            });
        }
        Ok(())
    }

    fn unprocessed_messages(&self) -> Result<Vec<Message>, StoreError> {
        let options = FindOptions::builder()
            .sort(doc! { "message_datetime": 1 })
            .build();
        self.collect_messages(doc! { "processed": false }, Some(options))
    }

    fn messages_with_status(&self, status: MessageStatus) -> Result<Vec<Message>, StoreError> {
        let options = FindOptions::builder()
            .sort(doc! { "message_datetime": 1 })
            .build();
        self.collect_messages(doc! { "status": status.label() }, Some(options))
    }

    fn message_by_external_id(&self, external_id: &str) -> Result<Option<Message>, StoreError> {
        Ok(self
            .messages
            .find_one(doc! { "external_id": external_id }, None)?)
    }

    fn recent_messages_for_sender(
        &self,
        sender: &str,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let options = FindOptions::builder()
            .sort(doc! { "message_datetime": -1 })
            .limit(limit as i64)
            .build();
        let mut found = self.collect_messages(doc! { "sender": sender }, Some(options))?;
        found.reverse();
        Ok(found)
    }

    fn transition_message(
        &self,
        mid: Uuid,
        expected: MessageStatus,
        next: MessageStatus,
    ) -> Result<bool, StoreError> {
        check_transition(expected, next)?;
        let updated = self.messages.find_one_and_update(
            doc! { "mid": mid.to_string(), "status": expected.label() },
            doc! { "$set": { "status": next.label() } },
            None,
        )?;
        Ok(updated.is_some())
    }

    fn create_task(&self, task: &Task) -> Result<(), StoreError> {
        self.tasks(task.platform).insert_one(task, None)?;
        Ok(())
    }

    fn update_task(&self, task: &Task) -> Result<(), StoreError> {
        let result = self.tasks(task.platform).replace_one(
            doc! { "task_id": task.task_id.to_string() },
            task,
            None,
        )?;
        if result.matched_count == 0 {
            return Err(StoreError::NotFound {
                what: "task",
                id: task.task_id,
            });
        }
        Ok(())
    }

    fn task(&self, platform: TaskPlatform, task_id: Uuid) -> Result<Option<Task>, StoreError> {
        Ok(self
            .tasks(platform)
            .find_one(doc! { "task_id": task_id.to_string() }, None)?)
    }

    fn pending_tasks(&self, platform: TaskPlatform) -> Result<Vec<Task>, StoreError> {
        let options = FindOptions::builder()
            .sort(doc! { "creation_date": 1 })
            .build();
        let cursor = self
            .tasks(platform)
            .find(doc! { "status": "pending" }, options)?;
        let mut found = Vec::new();
        for task in cursor {
            found.push(task?);
        }
        Ok(found)
    }

    fn tasks_for_message(&self, mid: Uuid) -> Result<Vec<Task>, StoreError> {
        let mut found = Vec::new();
        for platform in TaskPlatform::ALL {
            let cursor = self
                .tasks(platform)
                .find(doc! { "mid": mid.to_string() }, None)?;
            for task in cursor {
                found.push(task?);
            }
        }
        found.sort_by_key(|t| t.creation_date);
        Ok(found)
    }
}
