//! Engagement-based ranking of search results.

use crate::EngagementMetrics;

pub const LIKE_WEIGHT: f64 = 1.0;
pub const REPOST_WEIGHT: f64 = 2.0;
pub const REPLY_WEIGHT: f64 = 1.5;

/// `likes + 2 * reposts + 1.5 * replies`
pub fn score(metrics: &EngagementMetrics) -> f64 {
    metrics.likes as f64 * LIKE_WEIGHT
        + metrics.reposts as f64 * REPOST_WEIGHT
        + metrics.replies as f64 * REPLY_WEIGHT
}
