use async_trait::async_trait;
use quotebot_core::Timestamp;
use quotebot_db::{BotState, Database, DbResult};

/// Where successful publications get recorded.
///
/// [`Database`] is the only production implementation.
#[async_trait]
pub trait PublicationLog: Send + Sync {
    /// Mark the candidate used, record the id as published and advance
    /// `last_posted_at`, all at once.
    async fn finish_publication(&self, id: &str, now: Timestamp) -> DbResult<BotState>;

    /// Record only the published id.
    async fn mark_posted(&self, id: &str, now: Timestamp) -> DbResult<bool>;
}

#[async_trait]
impl PublicationLog for Database {
    async fn finish_publication(&self, id: &str, now: Timestamp) -> DbResult<BotState> {
        Database::finish_publication(self, id, now).await
    }

    async fn mark_posted(&self, id: &str, now: Timestamp) -> DbResult<bool> {
        Database::mark_posted(self, id, now).await
    }
}
