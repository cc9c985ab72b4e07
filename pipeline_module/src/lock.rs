//! Short-TTL mutual exclusion between concurrent workers.
//!
//! Acquisition is set-if-absent-with-expiry: holding the lock means our key
//! document exists and has not expired. A worker that dies mid-task leaks
//! its key until the TTL runs out, after which another worker takes over.
//! A crash costs at most one redundant re-execution, never a stuck task.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use mongodb::bson::{doc, Document};
use mongodb::sync::{Collection, Database};
use tracing::warn;

const LOCKS: &str = "work_locks";

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("mongodb error: {0}")]
    Mongo(#[from] mongodb::error::Error),
}

pub trait WorkLock: Send + Sync {
    /// Set-if-absent with expiry; `true` means this caller now holds `key`.
    fn acquire(&self, key: &str, ttl: Duration) -> Result<bool, LockError>;
    fn release(&self, key: &str) -> Result<(), LockError>;
}

/// Holds a key until dropped; release failures are logged, not raised.
pub struct LockGuard<'a> {
    lock: &'a dyn WorkLock,
    key: String,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.lock.release(&self.key) {
            warn!("failed to release lock {}: {}", self.key, err);
        }
    }
}

/// Try to take `key`; `None` means another worker owns it this cycle.
pub fn acquire_guard<'a>(
    lock: &'a dyn WorkLock,
    key: &str,
    ttl: Duration,
) -> Result<Option<LockGuard<'a>>, LockError> {
    if lock.acquire(key, ttl)? {
        Ok(Some(LockGuard {
            lock,
            key: key.to_string(),
        }))
    } else {
        Ok(None)
    }
}

#[derive(Default)]
pub struct InMemoryWorkLock {
    held: Mutex<HashMap<String, Instant>>,
}

impl InMemoryWorkLock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WorkLock for InMemoryWorkLock {
    fn acquire(&self, key: &str, ttl: Duration) -> Result<bool, LockError> {
        let mut held = self.held.lock().unwrap();
        let now = Instant::now();
        match held.get(key) {
            Some(expires_at) if *expires_at > now => Ok(false),
            _ => {
                held.insert(key.to_string(), now + ttl);
                Ok(true)
            }
        }
    }

    fn release(&self, key: &str) -> Result<(), LockError> {
        self.held.lock().unwrap().remove(key);
        Ok(())
    }
}

/// Lock keys stored as `_id`s in a MongoDB collection; the unique index on
/// `_id` is the set-if-absent primitive.
pub struct MongoWorkLock {
    locks: Collection<Document>,
}

impl MongoWorkLock {
    pub fn new(database: &Database) -> Self {
        Self {
            locks: database.collection(LOCKS),
        }
    }
}

impl WorkLock for MongoWorkLock {
    fn acquire(&self, key: &str, ttl: Duration) -> Result<bool, LockError> {
        let now = chrono::Utc::now();
        let expires_at = now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());

        // Reap an expired holder before trying to take the key.
        self.locks
            .delete_one(doc! { "_id": key, "expires_at": { "$lt": now.to_rfc3339() } }, None)?;

        match self.locks.insert_one(
            doc! { "_id": key, "expires_at": expires_at.to_rfc3339() },
            None,
        ) {
            Ok(_) => Ok(true),
            Err(err) if is_duplicate_key(&err) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn release(&self, key: &str) -> Result<(), LockError> {
        self.locks.delete_one(doc! { "_id": key }, None)?;
        Ok(())
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    use mongodb::error::{ErrorKind, WriteFailure};
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write_error)) if write_error.code == 11000
    )
}
