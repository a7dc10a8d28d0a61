//! Persistence collaborator for finished generations.
//!
//! The orchestrator only *offers* records; durability, retrieval and
//! deletion are the sink's business. [`InMemoryHistory`] backs the default
//! server and the tests.

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::artifact::SiteArtifact;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One stored generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    /// Prompt for generations, instruction for modifications.
    pub prompt: String,
    pub artifact: SiteArtifact,
    /// `data:` URL of the source image, for image generations.
    pub source_image: Option<String>,
}

impl HistoryRecord {
    pub fn new(prompt: impl Into<String>, artifact: SiteArtifact, source_image: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            prompt: prompt.into(),
            artifact,
            source_image,
        }
    }
}

/// Receives finished artifacts.
pub trait HistorySink: Send + Sync {
    fn offer(&self, record: HistoryRecord) -> BoxFuture<'_, ()>;
}

/// Newest-first, process-local history.
#[derive(Debug, Default)]
pub struct InMemoryHistory {
    records: RwLock<Vec<HistoryRecord>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn list(&self) -> Vec<HistoryRecord> {
        self.records.read().await.clone()
    }

    pub async fn get(&self, id: Uuid) -> Option<HistoryRecord> {
        self.records.read().await.iter().find(|r| r.id == id).cloned()
    }

    /// Returns whether a record was removed.
    pub async fn delete(&self, id: Uuid) -> bool {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|r| r.id != id);
        records.len() != before
    }

    pub async fn clear(&self) {
        self.records.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl HistorySink for InMemoryHistory {
    fn offer(&self, record: HistoryRecord) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            debug!(id = %record.id, "Storing history record");
            self.records.write().await.insert(0, record);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::SectionKind;

    fn artifact(html: &str) -> SiteArtifact {
        let mut artifact = SiteArtifact::default();
        artifact.set(SectionKind::Html, html.to_string());
        artifact
    }

    #[tokio::test]
    async fn test_newest_first() {
        let history = InMemoryHistory::new();
        history.offer(HistoryRecord::new("one", artifact("1"), None)).await;
        history.offer(HistoryRecord::new("two", artifact("2"), None)).await;

        let records = history.list().await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].prompt, "two");
        assert_eq!(records[1].prompt, "one");
    }

    #[tokio::test]
    async fn test_get_and_delete() {
        let history = InMemoryHistory::new();
        let record = HistoryRecord::new("p", artifact("x"), Some("data:image/png;base64,AA==".into()));
        let id = record.id;
        history.offer(record).await;

        assert_eq!(history.get(id).await.unwrap().prompt, "p");
        assert!(history.delete(id).await);
        assert!(!history.delete(id).await);
        assert!(history.get(id).await.is_none());
        assert!(history.is_empty().await);
    }

    #[tokio::test]
    async fn test_clear() {
        let history = InMemoryHistory::new();
        history.offer(HistoryRecord::new("p", artifact("x"), None)).await;
        history.clear().await;
        assert_eq!(history.len().await, 0);
    }
}
