use quotebot_core::Timestamp;
use quotebot_core::filter::MembershipOracle;
use redb_bincode::ReadableTable as _;
use tracing::{debug, info};

use crate::{
    BotState, BotStatePatch, Database, DbError, DbResult, LOG_TARGET, bot_state, candidates,
    candidates_pending, posted,
};

impl Database {
    pub async fn get_state(&self) -> DbResult<BotState> {
        self.read_with(|tx| {
            let state_table = tx.open_table(&bot_state::TABLE)?;
            Self::read_state_tx(&state_table)
        })
        .await
    }

    /// Merge `patch` into the stored state; fields left `None` keep their
    /// current value. Returns the resulting state.
    pub async fn set_state(&self, patch: BotStatePatch) -> DbResult<BotState> {
        self.write_with(|tx| {
            let mut state_table = tx.open_table(&bot_state::TABLE)?;
            Self::update_state_tx(patch, &mut state_table)
        })
        .await
    }

    pub(crate) fn read_state_tx(
        state_table: &impl bot_state::ReadableTable,
    ) -> DbResult<BotState> {
        Ok(state_table
            .get(&())?
            .map(|g| g.value())
            .unwrap_or_default())
    }

    pub(crate) fn update_state_tx(
        patch: BotStatePatch,
        state_table: &mut bot_state::Table,
    ) -> DbResult<BotState> {
        let current = Self::read_state_tx(&*state_table)?;
        if patch.is_empty() {
            return Ok(current);
        }
        let updated = current.apply(patch);
        state_table.insert(&(), &updated)?;
        debug!(target: LOG_TARGET, state = ?updated, "Updated bot state");
        Ok(updated)
    }

    pub async fn has_posted(&self, id: &str) -> DbResult<bool> {
        let id = id.to_owned();
        self.read_with(|tx| {
            let posted_table = tx.open_table(&posted::TABLE)?;
            Ok(posted_table.get(&id)?.is_some())
        })
        .await
    }

    /// Record `id` as published. Returns `false` if it already was.
    pub async fn mark_posted(&self, id: &str, now: Timestamp) -> DbResult<bool> {
        let id = id.to_owned();
        self.write_with(|tx| {
            let mut posted_table = tx.open_table(&posted::TABLE)?;
            Self::mark_posted_tx(&id, now, &mut posted_table)
        })
        .await
    }

    pub(crate) fn mark_posted_tx(
        id: &String,
        now: Timestamp,
        posted_table: &mut posted::Table,
    ) -> DbResult<bool> {
        if posted_table.get(id)?.is_some() {
            return Ok(false);
        }
        posted_table.insert(id, &now)?;
        Ok(true)
    }

    /// Bookkeeping after a successful publish, in a single transaction: the
    /// candidate becomes used, its id joins the published set and
    /// `last_posted_at` moves to `now`.
    pub async fn finish_publication(&self, id: &str, now: Timestamp) -> DbResult<BotState> {
        let id = id.to_owned();
        self.write_with(|tx| {
            let mut candidates_table = tx.open_table(&candidates::TABLE)?;
            let mut pending_table = tx.open_table(&candidates_pending::TABLE)?;
            let mut posted_table = tx.open_table(&posted::TABLE)?;
            let mut state_table = tx.open_table(&bot_state::TABLE)?;

            Self::mark_used_tx(&id, now, &mut candidates_table, &mut pending_table)?;
            Self::mark_posted_tx(&id, now, &mut posted_table)?;
            let state = Self::update_state_tx(
                BotStatePatch {
                    last_posted_at: Some(now),
                    ..Default::default()
                },
                &mut state_table,
            )?;

            info!(target: LOG_TARGET, candidate_id = %id, "Recorded publication");
            Ok(state)
        })
        .await
    }
}

#[async_trait::async_trait]
impl MembershipOracle for Database {
    type Error = DbError;

    async fn contains(&self, id: &str) -> Result<bool, Self::Error> {
        self.has_posted(id).await
    }
}
