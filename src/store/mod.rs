//! Continuation store: the one durable, shared piece of state.
//!
//! Maps a project id to its latest strategic intent and continuation token.
//! Writes are merge-upserts: fields absent from a `StateUpdate` keep their
//! stored values, and `updated_at` is stamped by the store on every write.
//! There is no locking; concurrent writers to one project are last-write-wins.

pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::errors::StoreError;
use crate::reasoning::ContinuationToken;

pub use sqlite::{SqliteStore, StoreHandle};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategicState {
    pub project_id: String,
    pub strategic_intent: String,
    pub continuation_token: Option<ContinuationToken>,
    pub updated_at: DateTime<Utc>,
}

/// A partial write. `None` fields are left untouched on existing records.
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub strategic_intent: Option<String>,
    pub continuation_token: Option<ContinuationToken>,
}

impl StateUpdate {
    pub fn intent(intent: impl Into<String>) -> Self {
        Self {
            strategic_intent: Some(intent.into()),
            continuation_token: None,
        }
    }

    pub fn with_token(mut self, token: Option<ContinuationToken>) -> Self {
        self.continuation_token = token;
        self
    }
}

#[async_trait]
pub trait ContinuationStore: Send + Sync {
    async fn get(&self, project_id: &str) -> Result<Option<StrategicState>, StoreError>;

    /// Upsert `update` and return the record as stored after the write.
    async fn merge(&self, project_id: &str, update: StateUpdate) -> Result<StrategicState, StoreError>;
}
