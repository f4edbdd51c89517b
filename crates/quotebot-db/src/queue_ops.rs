use std::cmp::Ordering;
use std::time::Duration;

use quotebot_core::{Candidate, Timestamp};
use redb_bincode::ReadableTable as _;
use tracing::{debug, info};

use crate::{Database, DbResult, LOG_TARGET, candidates, candidates_pending};

/// Claim order: highest score first, most recently fetched on ties.
pub fn claim_order(a: &Candidate, b: &Candidate) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.fetched_at.cmp(&a.fetched_at))
}

impl Database {
    /// Number of candidates not used yet (reserved ones included).
    pub async fn queue_size(&self) -> DbResult<usize> {
        self.read_with(|tx| {
            let pending_table = tx.open_table(&candidates_pending::TABLE)?;
            let mut count = 0;
            for entry in pending_table.range::<String>(..)? {
                entry?;
                count += 1;
            }
            Ok(count)
        })
        .await
    }

    /// Insert new candidates; ids already known (pending or used) are
    /// skipped and never updated.
    ///
    /// Returns the number of rows actually inserted.
    pub async fn enqueue(&self, new_candidates: &[Candidate]) -> DbResult<usize> {
        self.write_with(|tx| {
            let mut candidates_table = tx.open_table(&candidates::TABLE)?;
            let mut pending_table = tx.open_table(&candidates_pending::TABLE)?;

            let mut inserted = 0;
            for candidate in new_candidates {
                if candidates_table.get(&candidate.id)?.is_some() {
                    debug!(target: LOG_TARGET, candidate_id = %candidate.id, "Candidate already known, skipping");
                    continue;
                }
                let candidate = Candidate {
                    reserved_until: None,
                    used_at: None,
                    ..candidate.clone()
                };
                candidates_table.insert(&candidate.id, &candidate)?;
                pending_table.insert(&candidate.id, &())?;
                inserted += 1;
            }

            info!(target: LOG_TARGET, offered = new_candidates.len(), inserted, "Enqueued candidates");
            Ok(inserted)
        })
        .await
    }

    /// Atomically pick the best claimable candidate and reserve it until
    /// `now + lease`.
    ///
    /// A candidate is claimable when it is not used and has no live lease.
    /// Since the selection and the reservation happen in one write
    /// transaction, two callers can never both receive the same candidate
    /// while its lease is live.
    pub async fn claim_next(&self, now: Timestamp, lease: Duration) -> DbResult<Option<Candidate>> {
        self.write_with(|tx| {
            let mut candidates_table = tx.open_table(&candidates::TABLE)?;
            let pending_table = tx.open_table(&candidates_pending::TABLE)?;

            let mut best: Option<Candidate> = None;
            for entry in pending_table.range::<String>(..)? {
                let (id, _) = entry?;
                let Some(candidate) = candidates_table.get(&id.value())?.map(|g| g.value()) else {
                    continue;
                };
                if !candidate.is_claimable(now) {
                    continue;
                }
                if best
                    .as_ref()
                    .is_none_or(|b| claim_order(&candidate, b) == Ordering::Less)
                {
                    best = Some(candidate);
                }
            }

            let Some(mut candidate) = best else {
                debug!(target: LOG_TARGET, "No claimable candidate");
                return Ok(None);
            };

            candidate.reserved_until = Some(now.saturating_add(lease));
            candidates_table.insert(&candidate.id, &candidate)?;

            debug!(
                target: LOG_TARGET,
                candidate_id = %candidate.id,
                score = candidate.score,
                reserved_until = %now.saturating_add(lease),
                "Claimed candidate"
            );
            Ok(Some(candidate))
        })
        .await
    }

    /// Drop the reservation, making the candidate claimable again right away.
    ///
    /// Returns `false` if the candidate is unknown or already used.
    pub async fn release(&self, id: &str) -> DbResult<bool> {
        let id = id.to_owned();
        self.write_with(|tx| {
            let mut candidates_table = tx.open_table(&candidates::TABLE)?;
            let Some(mut candidate) = candidates_table.get(&id)?.map(|g| g.value()) else {
                return Ok(false);
            };
            if candidate.is_used() {
                return Ok(false);
            }
            candidate.reserved_until = None;
            candidates_table.insert(&id, &candidate)?;
            debug!(target: LOG_TARGET, candidate_id = %id, "Released candidate");
            Ok(true)
        })
        .await
    }

    /// Terminal transition: set `used_at` and clear the reservation.
    ///
    /// Returns `false` if the candidate is unknown or was already used, in
    /// which case nothing changes.
    pub async fn mark_used(&self, id: &str, now: Timestamp) -> DbResult<bool> {
        let id = id.to_owned();
        self.write_with(|tx| {
            let mut candidates_table = tx.open_table(&candidates::TABLE)?;
            let mut pending_table = tx.open_table(&candidates_pending::TABLE)?;
            Self::mark_used_tx(&id, now, &mut candidates_table, &mut pending_table)
        })
        .await
    }

    pub(crate) fn mark_used_tx(
        id: &String,
        now: Timestamp,
        candidates_table: &mut candidates::Table,
        pending_table: &mut candidates_pending::Table,
    ) -> DbResult<bool> {
        let Some(mut candidate) = candidates_table.get(id)?.map(|g| g.value()) else {
            return Ok(false);
        };
        if candidate.is_used() {
            return Ok(false);
        }
        candidate.used_at = Some(now);
        candidate.reserved_until = None;
        candidates_table.insert(id, &candidate)?;
        pending_table.remove(id)?;
        debug!(target: LOG_TARGET, candidate_id = %id, "Marked candidate used");
        Ok(true)
    }

    pub async fn get_candidate(&self, id: &str) -> DbResult<Option<Candidate>> {
        let id = id.to_owned();
        self.read_with(|tx| {
            let candidates_table = tx.open_table(&candidates::TABLE)?;
            Ok(candidates_table.get(&id)?.map(|g| g.value()))
        })
        .await
    }

    /// All not-yet-used candidates, in claim order.
    pub async fn list_pending(&self) -> DbResult<Vec<Candidate>> {
        self.read_with(|tx| {
            let candidates_table = tx.open_table(&candidates::TABLE)?;
            let pending_table = tx.open_table(&candidates_pending::TABLE)?;

            let mut pending = Vec::new();
            for entry in pending_table.range::<String>(..)? {
                let (id, _) = entry?;
                if let Some(candidate) = candidates_table.get(&id.value())? {
                    pending.push(candidate.value());
                }
            }
            pending.sort_by(claim_order);
            Ok(pending)
        })
        .await
    }

    /// Delete used candidates whose `used_at` is before `before`.
    ///
    /// The published-ids set is not affected, so pruned posts are still
    /// never reposted.
    pub async fn prune_used(&self, before: Timestamp) -> DbResult<usize> {
        self.write_with(|tx| {
            let mut candidates_table = tx.open_table(&candidates::TABLE)?;

            let mut stale = Vec::new();
            for entry in candidates_table.range::<String>(..)? {
                let (id, candidate) = entry?;
                if candidate.value().used_at.is_some_and(|used_at| used_at < before) {
                    stale.push(id.value());
                }
            }

            for id in &stale {
                candidates_table.remove(id)?;
            }

            if !stale.is_empty() {
                info!(target: LOG_TARGET, count = stale.len(), "Pruned used candidates");
            }
            Ok(stale.len())
        })
        .await
    }
}
