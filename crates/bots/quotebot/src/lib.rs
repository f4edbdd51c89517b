pub mod commentary;
pub mod config;
pub mod platform;
pub mod publication;
mod report;
pub mod selection;
pub mod server;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable as _};
use quotebot_core::{Candidate, Timestamp};
use quotebot_db::{BotStatePatch, Database, DbError};
use quotebot_util_error::FmtCompact as _;
use quotebot_x_api::XApiError;
use snafu::{ResultExt as _, Snafu};
use tracing::{debug, error, info, instrument, warn};

pub use self::report::{CycleReport, FetchSummary, PostedItem, SkipReason};
use crate::commentary::{CommentGenerator, comment_len};
use crate::config::BotConfig;
use crate::platform::Platform;
use crate::publication::PublicationLog;
use crate::selection::select_candidates;

pub const PROJECT_NAME: &str = "quotebot";
pub const LOG_TARGET: &str = "quotebot::bot";

/// Source of "now" for a cycle. Read at every step that stamps the store.
pub type Clock = dyn Fn() -> Timestamp + Send + Sync;

#[derive(Debug, Snafu)]
pub enum BotError {
    #[snafu(transparent)]
    Database { source: DbError },
    #[snafu(display("Search failed"))]
    Search { source: XApiError },
    #[snafu(display("Publishing quote of {candidate_id} failed"))]
    Publish {
        candidate_id: String,
        source: XApiError,
    },
    #[snafu(display("Published {post_id} quoting {candidate_id}, but failed to record it"))]
    RecordPublication {
        candidate_id: String,
        post_id: String,
        source: DbError,
    },
}

pub type BotResult<T> = std::result::Result<T, BotError>;

/// How a drain pass over the queue ended.
enum Drain {
    /// Queue empty, attempts exhausted, or post budget reached
    Finished,
    /// Publishing hit a rate limit; the cycle must stop
    RateLimited(Duration),
}

/// Clears the running flag when dropped.
struct RunningGuard<'a>(&'a AtomicBool);

impl<'a> RunningGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

async fn release_logged(db: &Database, id: &str) {
    if let Err(err) = db.release(id).await {
        warn!(target: LOG_TARGET, candidate_id = %id, err = %err.fmt_compact(), "Failed to release candidate");
    }
}

/// Candidates claimed by a drain pass and not settled yet.
///
/// If the pass is dropped before it finishes, whatever is still held is
/// released from a background task instead of staying reserved until the
/// lease expires.
struct Reservations {
    db: Arc<Database>,
    ids: Vec<String>,
}

impl Reservations {
    fn new(db: Arc<Database>) -> Self {
        Self { db, ids: vec![] }
    }

    fn hold(&mut self, id: &str) {
        self.ids.push(id.to_owned());
    }

    /// Stop tracking `id`; it must not be released anymore.
    fn settle(&mut self, id: &str) {
        self.ids.retain(|held| held != id);
    }

    async fn release_all(&mut self) {
        while let Some(id) = self.ids.last().cloned() {
            release_logged(&self.db, &id).await;
            self.ids.pop();
        }
    }
}

impl Drop for Reservations {
    fn drop(&mut self) {
        if self.ids.is_empty() {
            return;
        }
        let ids = std::mem::take(&mut self.ids);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(target: LOG_TARGET, count = ids.len(), "Drain pass cancelled, releasing its reservations");
                let db = self.db.clone();
                handle.spawn(async move {
                    for id in ids {
                        release_logged(&db, &id).await;
                    }
                });
            }
            Err(_) => {
                warn!(target: LOG_TARGET, count = ids.len(), "Drain pass cancelled outside a runtime, reservations expire with their lease");
            }
        }
    }
}

/// Retries of the store write that follows a successful publish.
fn bookkeeping_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(2))
        .with_max_times(3)
}

/// The quote bot: everything one run cycle needs, opened once at startup.
pub struct Bot {
    db: Arc<Database>,
    publications: Arc<dyn PublicationLog>,
    platform: Arc<dyn Platform>,
    generator: Arc<dyn CommentGenerator>,
    config: BotConfig,
    running: AtomicBool,
}

impl Bot {
    pub fn new(
        db: Arc<Database>,
        platform: Arc<dyn Platform>,
        generator: Arc<dyn CommentGenerator>,
        config: BotConfig,
    ) -> Self {
        Self {
            publications: db.clone(),
            db,
            platform,
            generator,
            config,
            running: AtomicBool::new(false),
        }
    }

    /// Record publications somewhere other than the bot's own database.
    pub fn with_publication_log(self, publications: Arc<dyn PublicationLog>) -> Self {
        Self {
            publications,
            ..self
        }
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    pub async fn run_cycle(&self) -> BotResult<CycleReport> {
        self.run_cycle_with(&Timestamp::now).await
    }

    /// [`Self::run_cycle_with`] with the clock stopped at `now`.
    pub async fn run_cycle_at(&self, now: Timestamp) -> BotResult<CycleReport> {
        self.run_cycle_with(&move || now).await
    }

    /// One invocation: post from the queue if the post interval elapsed,
    /// refill the queue when it runs low, and try one more claim if the
    /// first pass came up short.
    ///
    /// Overlapping calls on the same `Bot` are rejected with
    /// [`SkipReason::AlreadyRunning`]. Overlapping processes are safe too,
    /// since claiming a candidate is atomic in the store.
    #[instrument(skip_all)]
    pub async fn run_cycle_with(&self, clock: &Clock) -> BotResult<CycleReport> {
        let Some(_guard) = RunningGuard::acquire(&self.running) else {
            info!(target: LOG_TARGET, "Cycle already running, skipping");
            return Ok(CycleReport::skipped(SkipReason::AlreadyRunning));
        };

        let now = clock();
        let state = self.db.get_state().await?;
        if now.duration_since(state.last_posted_at) < self.config.post_interval {
            info!(
                target: LOG_TARGET,
                %now,
                last_posted_at = %state.last_posted_at,
                "Post interval not reached"
            );
            return Ok(CycleReport {
                last_posted_at: Some(state.last_posted_at),
                ..CycleReport::skipped(SkipReason::IntervalNotReached)
            });
        }

        let mut report = CycleReport::default();

        if let Drain::RateLimited(retry_after) = self
            .drain_queue(clock, self.config.max_claim_attempts, &mut report)
            .await?
        {
            return Ok(report.finish_rate_limited(retry_after));
        }

        if self.refill_due(clock()).await? {
            if let Some(retry_after) = self.refill(clock, &mut report).await? {
                return Ok(report.finish_rate_limited(retry_after));
            }
        }

        if report.posted.len() < self.config.max_posts_per_run {
            if let Drain::RateLimited(retry_after) = self
                .drain_queue(clock, self.config.post_refill_claim_attempts, &mut report)
                .await?
            {
                return Ok(report.finish_rate_limited(retry_after));
            }
        }

        Ok(report.finish())
    }

    /// Claim-and-post until the post budget is spent, the queue has nothing
    /// claimable, or `max_attempts` claims ended without a post.
    ///
    /// Candidates skipped for a too-short comment stay reserved until the
    /// pass ends, so the next claim moves on to a different one.
    async fn drain_queue(
        &self,
        clock: &Clock,
        max_attempts: usize,
        report: &mut CycleReport,
    ) -> BotResult<Drain> {
        let mut held = Reservations::new(self.db.clone());
        let res = self
            .drain_queue_inner(clock, max_attempts, report, &mut held)
            .await;
        held.release_all().await;
        res
    }

    async fn drain_queue_inner(
        &self,
        clock: &Clock,
        max_attempts: usize,
        report: &mut CycleReport,
        held: &mut Reservations,
    ) -> BotResult<Drain> {
        let mut attempts = 0;

        while attempts < max_attempts && report.posted.len() < self.config.max_posts_per_run {
            let Some(candidate) = self.db.claim_next(clock(), self.config.lease).await? else {
                debug!(target: LOG_TARGET, "Nothing claimable in queue");
                break;
            };
            held.hold(&candidate.id);

            if self.db.has_posted(&candidate.id).await? {
                // Posted out of band since it was queued
                debug!(target: LOG_TARGET, candidate_id = %candidate.id, "Dropping stale candidate");
                self.db.mark_used(&candidate.id, clock()).await?;
                held.settle(&candidate.id);
                continue;
            }

            attempts += 1;

            let Some(comment) = self.comment_for(&candidate).await else {
                continue;
            };

            match self.platform.publish(&candidate.id, &comment).await {
                Ok(created) => {
                    // The post exists from here on, so never release it
                    held.settle(&candidate.id);
                    self.record_publication(&candidate.id, &created.id, clock())
                        .await?;
                    info!(
                        target: LOG_TARGET,
                        candidate_id = %candidate.id,
                        post_id = %created.id,
                        score = candidate.score,
                        "Published quote post"
                    );
                    report.posted.push(PostedItem {
                        id: candidate.id,
                        post_id: created.id,
                        score: candidate.score,
                        likes: candidate.like_count,
                        comment,
                    });
                }
                Err(XApiError::RateLimited { retry_after }) => {
                    warn!(
                        target: LOG_TARGET,
                        candidate_id = %candidate.id,
                        retry_after_ms = retry_after.as_millis(),
                        "Publishing rate limited"
                    );
                    return Ok(Drain::RateLimited(retry_after));
                }
                Err(source) => {
                    return Err(source).context(PublishSnafu {
                        candidate_id: candidate.id,
                    });
                }
            }
        }

        Ok(Drain::Finished)
    }

    /// Store the outcome of a successful publish.
    ///
    /// The full bookkeeping is retried a few times. If it still fails, at
    /// least the published id is recorded, which keeps the candidate from
    /// being quoted again once its lease expires.
    async fn record_publication(
        &self,
        candidate_id: &str,
        post_id: &str,
        now: Timestamp,
    ) -> BotResult<()> {
        let publications = &self.publications;
        let res = (|| async move { publications.finish_publication(candidate_id, now).await })
            .retry(bookkeeping_backoff())
            .notify(|err, delay| {
                warn!(
                    target: LOG_TARGET,
                    %candidate_id,
                    %post_id,
                    err = %err.fmt_compact(),
                    delay_ms = delay.as_millis(),
                    "Retrying publication bookkeeping"
                );
            })
            .await;

        let Err(source) = res else {
            return Ok(());
        };

        error!(
            target: LOG_TARGET,
            %candidate_id,
            %post_id,
            err = %source.fmt_compact(),
            "Published, but failed to record the publication"
        );
        match self.publications.mark_posted(candidate_id, now).await {
            Ok(_) => {
                warn!(target: LOG_TARGET, %candidate_id, %post_id, "Recorded the published id only");
            }
            Err(err) => {
                error!(
                    target: LOG_TARGET,
                    %candidate_id,
                    %post_id,
                    err = %err.fmt_compact(),
                    "Failed to record the published id, the post may be repeated"
                );
            }
        }

        Err(source).context(RecordPublicationSnafu {
            candidate_id,
            post_id,
        })
    }

    /// The comment to post, or `None` if the generator failed or came up
    /// with something too short.
    async fn comment_for(&self, candidate: &Candidate) -> Option<String> {
        let comment = match self.generator.generate(&candidate.text).await {
            Ok(comment) => comment.trim().to_owned(),
            Err(err) => {
                warn!(
                    target: LOG_TARGET,
                    candidate_id = %candidate.id,
                    err = %err.fmt_compact(),
                    "Comment generation failed"
                );
                return None;
            }
        };

        if comment_len(&comment) < self.config.min_comment_chars {
            debug!(
                target: LOG_TARGET,
                candidate_id = %candidate.id,
                chars = comment_len(&comment),
                "Comment too short"
            );
            return None;
        }

        Some(comment)
    }

    /// Queue below the low-water mark, fetch interval elapsed, and no
    /// pending backoff deadline.
    async fn refill_due(&self, now: Timestamp) -> BotResult<bool> {
        let queue_size = self.db.queue_size().await?;
        let state = self.db.get_state().await?;

        let due = queue_size < self.config.low_water_mark
            && self.config.fetch_interval <= now.duration_since(state.last_fetch_at)
            && state.next_fetch_at <= now;

        debug!(
            target: LOG_TARGET,
            queue_size,
            last_fetch_at = %state.last_fetch_at,
            next_fetch_at = %state.next_fetch_at,
            due,
            "Checked refill"
        );
        Ok(due)
    }

    /// Search, select and enqueue.
    ///
    /// Returns the wait reported by the platform if the search was rate
    /// limited, after recording the backoff deadline.
    async fn refill(&self, clock: &Clock, report: &mut CycleReport) -> BotResult<Option<Duration>> {
        let query = self.config.search_query();

        let res = self
            .platform
            .search(&query, self.config.search_max_results)
            .await;
        let now = clock();

        let posts = match res {
            Ok(posts) => posts,
            Err(XApiError::RateLimited { retry_after }) => {
                let wait = if retry_after.is_zero() {
                    self.config.default_backoff
                } else {
                    retry_after
                };
                let next_fetch_at = now.saturating_add(wait);
                self.db
                    .set_state(BotStatePatch {
                        next_fetch_at: Some(next_fetch_at),
                        ..Default::default()
                    })
                    .await?;
                warn!(
                    target: LOG_TARGET,
                    retry_after_ms = wait.as_millis(),
                    next_fetch_at = %next_fetch_at,
                    "Search rate limited, backing off"
                );
                return Ok(Some(wait));
            }
            Err(source) => return Err(source).context(SearchSnafu),
        };

        let found = posts.len();
        let selected = select_candidates(posts, self.db.as_ref(), &self.config, now).await?;
        let enqueued = self.db.enqueue(&selected).await?;

        self.db
            .set_state(BotStatePatch {
                last_fetch_at: Some(now),
                next_fetch_at: Some(Timestamp::ZERO),
                ..Default::default()
            })
            .await?;

        self.db
            .prune_used(now.saturating_sub(self.config.used_retention))
            .await?;

        info!(
            target: LOG_TARGET,
            found,
            selected = selected.len(),
            enqueued,
            "Refilled queue"
        );
        report.fetch = Some(FetchSummary {
            query,
            found,
            selected: selected.len(),
            enqueued,
        });
        Ok(None)
    }
}
