use std::time::Duration;

use quotebot_x_api::query::{DEFAULT_SEED_TERM, build_search_query};

pub const DEFAULT_POST_INTERVAL: Duration = Duration::from_secs(2 * 60 * 60);
pub const DEFAULT_FETCH_INTERVAL: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_LEASE: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_USED_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Tuning of a single run cycle.
#[derive(Debug, Clone, bon::Builder)]
pub struct BotConfig {
    /// Minimum spacing between successful posts
    #[builder(default = DEFAULT_POST_INTERVAL)]
    pub post_interval: Duration,
    /// Minimum spacing between refill searches
    #[builder(default = DEFAULT_FETCH_INTERVAL)]
    pub fetch_interval: Duration,
    /// Refill is considered only below this many queued candidates
    #[builder(default = 5)]
    pub low_water_mark: usize,
    /// How many of the best search results are enqueued per refill
    #[builder(default = 20)]
    pub target_pool_size: usize,
    #[builder(default = DEFAULT_LEASE)]
    pub lease: Duration,
    /// Claims per drain pass that may end without a post
    #[builder(default = 5)]
    pub max_claim_attempts: usize,
    /// Claims the pass after a refill may spend without a post
    #[builder(default = 1)]
    pub post_refill_claim_attempts: usize,
    #[builder(default = 1)]
    pub max_posts_per_run: usize,
    #[builder(default = 8)]
    pub min_comment_chars: usize,
    #[builder(default = 800)]
    pub min_likes: u64,
    #[builder(default = 3500.0)]
    pub score_threshold: f64,
    #[builder(default = 50)]
    pub search_max_results: u32,
    #[builder(into, default = DEFAULT_SEED_TERM.to_owned())]
    pub seed_term: String,
    #[builder(into, default = "ja".to_owned())]
    pub lang: String,
    /// Refill pause after a rate-limited search that did not say how long
    /// to wait
    #[builder(default = DEFAULT_BACKOFF)]
    pub default_backoff: Duration,
    /// Used candidates older than this are pruned after each refill
    #[builder(default = DEFAULT_USED_RETENTION)]
    pub used_retention: Duration,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl BotConfig {
    pub fn search_query(&self) -> String {
        build_search_query(&self.seed_term, &self.lang)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_deployed_bot() {
        let config = BotConfig::default();
        assert_eq!(config.post_interval, Duration::from_secs(7200));
        assert_eq!(config.lease, Duration::from_secs(900));
        assert_eq!(config.max_claim_attempts, 5);
        assert_eq!(config.post_refill_claim_attempts, 1);
        assert_eq!(config.min_likes, 800);
        assert_eq!(config.score_threshold, 3500.0);
        assert_eq!(
            config.search_query(),
            "(の) lang:ja -is:reply -is:retweet"
        );
    }
}
