use quotebot_core::filter::{self, MembershipOracle, not_posted_yet};
use quotebot_core::{Candidate, EngagementMetrics, Timestamp, scoring};
use quotebot_db::claim_order;
use quotebot_x_api::Post;
use tracing::trace;

use crate::LOG_TARGET;
use crate::config::BotConfig;

/// Turn raw search results into the candidates worth enqueueing.
///
/// A post survives if its text passes the content filter, it was never
/// posted, it has at least `min_likes` likes and scores at least
/// `score_threshold`. Survivors are ranked best first and cut to
/// `target_pool_size`.
pub async fn select_candidates<M>(
    posts: Vec<Post>,
    posted: &M,
    config: &BotConfig,
    now: Timestamp,
) -> Result<Vec<Candidate>, M::Error>
where
    M: MembershipOracle + ?Sized,
{
    let mut selected = Vec::new();

    for post in posts {
        if !filter::is_candidate_text(&post.text) {
            trace!(target: LOG_TARGET, post_id = %post.id, "Filtered out by content");
            continue;
        }
        if !not_posted_yet(&post.id, posted).await? {
            trace!(target: LOG_TARGET, post_id = %post.id, "Already posted");
            continue;
        }

        let metrics = EngagementMetrics::from(post.public_metrics);
        if metrics.likes < config.min_likes {
            continue;
        }
        let score = scoring::score(&metrics);
        if score < config.score_threshold {
            continue;
        }

        selected.push(Candidate::new(post.id, post.text, metrics.likes, score, now));
    }

    selected.sort_by(claim_order);
    selected.truncate(config.target_pool_size);
    Ok(selected)
}
