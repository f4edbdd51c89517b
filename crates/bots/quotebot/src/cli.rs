use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use quotebot::commentary::{DEFAULT_OPENAI_API_BASE, DEFAULT_OPENAI_MODEL};
use quotebot::config::BotConfig;
use quotebot_x_api::query::DEFAULT_SEED_TERM;
use quotebot_x_api::{DEFAULT_API_BASE, RateLimitPolicy};

/// Quote bot - quote-posts trending posts with a short generated comment
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Opts {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub cmd: OptsCmd,
}

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Directory holding the bot database
    #[arg(long, env = "QUOTEBOT_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(flatten)]
    pub x: XOpts,

    #[command(flatten)]
    pub openai: OpenAiOpts,

    #[command(flatten)]
    pub tuning: TuningOpts,
}

static PROJECT_DIRS: LazyLock<Option<directories::ProjectDirs>> =
    LazyLock::new(|| directories::ProjectDirs::from("", "", "quotebot"));

impl GlobalOpts {
    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref().or_else(|| {
            PROJECT_DIRS
                .as_ref()
                .map(|dirs| dirs.state_dir().unwrap_or_else(|| dirs.data_local_dir()))
        })
    }
}

#[derive(Debug, Args)]
pub struct XOpts {
    /// App bearer token, used for search
    #[arg(long, env = "X_BEARER_TOKEN", hide_env_values = true, global = true)]
    pub x_bearer_token: Option<String>,

    /// OAuth2 user access token, used for posting
    #[arg(long, env = "X_USER_ACCESS_TOKEN", hide_env_values = true, global = true)]
    pub x_user_access_token: Option<String>,

    #[arg(long, env = "X_API_BASE", default_value = DEFAULT_API_BASE, global = true)]
    pub x_api_base: String,

    /// Timeout of every X API request
    #[arg(long, env = "X_API_TIMEOUT_MS", default_value_t = 15_000, global = true)]
    pub x_api_timeout_ms: u64,

    /// What search does when rate limited: `surface` or `retry`
    #[arg(long, env = "RATE_LIMIT_POLICY", default_value_t = RateLimitPolicy::Surface, global = true)]
    pub rate_limit_policy: RateLimitPolicy,
}

impl XOpts {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.x_api_timeout_ms)
    }
}

#[derive(Debug, Args)]
pub struct OpenAiOpts {
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true, global = true)]
    pub openai_api_key: Option<String>,

    #[arg(long, env = "OPENAI_API_BASE", default_value = DEFAULT_OPENAI_API_BASE, global = true)]
    pub openai_api_base: String,

    #[arg(long, env = "OPENAI_MODEL", default_value = DEFAULT_OPENAI_MODEL, global = true)]
    pub openai_model: String,
}

#[derive(Debug, Args)]
pub struct TuningOpts {
    /// Minimum spacing between posts, in seconds
    #[arg(long, env = "POST_INTERVAL_SECONDS", default_value_t = 7200, global = true)]
    pub post_interval_seconds: u64,

    /// Minimum spacing between refill searches, in seconds
    #[arg(long, env = "FETCH_INTERVAL_SECONDS", default_value_t = 1800, global = true)]
    pub fetch_interval_seconds: u64,

    /// Refill when fewer candidates than this are queued
    #[arg(long, env = "LOW_WATER_MARK", default_value_t = 5, global = true)]
    pub low_water_mark: usize,

    /// Candidates enqueued per refill
    #[arg(long, env = "TARGET_POOL_SIZE", default_value_t = 20, global = true)]
    pub target_pool_size: usize,

    /// How long a claimed candidate stays reserved, in seconds
    #[arg(long, env = "LEASE_SECONDS", default_value_t = 900, global = true)]
    pub lease_seconds: u64,

    #[arg(long, env = "MAX_CLAIM_ATTEMPTS", default_value_t = 5, global = true)]
    pub max_claim_attempts: usize,

    /// Claim attempts of the pass that follows a refill
    #[arg(long, env = "POST_REFILL_CLAIM_ATTEMPTS", default_value_t = 1, global = true)]
    pub post_refill_claim_attempts: usize,

    #[arg(long, env = "MAX_POSTS_PER_RUN", default_value_t = 1, global = true)]
    pub max_posts_per_run: usize,

    #[arg(long, env = "MIN_COMMENT_CHARS", default_value_t = 8, global = true)]
    pub min_comment_chars: usize,

    /// Minimum like count of a candidate
    #[arg(long, env = "MIN_FAVES", default_value_t = 800, global = true)]
    pub min_faves: u64,

    #[arg(long, env = "SCORE_THRESHOLD", default_value_t = 3500.0, global = true)]
    pub score_threshold: f64,

    #[arg(long, env = "SEARCH_MAX_RESULTS", default_value_t = 50, global = true)]
    pub search_max_results: u32,

    /// Plain search term; operator-only queries are refused by the API
    #[arg(long, env = "SEED_TERM", default_value = DEFAULT_SEED_TERM, global = true)]
    pub seed_term: String,

    /// Language filter of the search query
    #[arg(long, env = "SEARCH_LANG", default_value = "ja", global = true)]
    pub lang: String,

    /// Refill pause after a rate limit without timing info, in seconds
    #[arg(long, env = "DEFAULT_BACKOFF_SECONDS", default_value_t = 900, global = true)]
    pub default_backoff_seconds: u64,

    /// How long used candidates are kept, in seconds
    #[arg(long, env = "USED_RETENTION_SECONDS", default_value_t = 7 * 24 * 60 * 60, global = true)]
    pub used_retention_seconds: u64,
}

impl TuningOpts {
    pub fn to_config(&self) -> BotConfig {
        BotConfig::builder()
            .post_interval(Duration::from_secs(self.post_interval_seconds))
            .fetch_interval(Duration::from_secs(self.fetch_interval_seconds))
            .low_water_mark(self.low_water_mark)
            .target_pool_size(self.target_pool_size)
            .lease(Duration::from_secs(self.lease_seconds))
            .max_claim_attempts(self.max_claim_attempts)
            .post_refill_claim_attempts(self.post_refill_claim_attempts)
            .max_posts_per_run(self.max_posts_per_run)
            .min_comment_chars(self.min_comment_chars)
            .min_likes(self.min_faves)
            .score_threshold(self.score_threshold)
            .search_max_results(self.search_max_results)
            .seed_term(self.seed_term.clone())
            .lang(self.lang.clone())
            .default_backoff(Duration::from_secs(self.default_backoff_seconds))
            .used_retention(Duration::from_secs(self.used_retention_seconds))
            .build()
    }
}

#[derive(Debug, Subcommand)]
pub enum OptsCmd {
    /// Serve the HTTP trigger (`/health`, `/run`)
    Serve {
        #[arg(long, env = "QUOTEBOT_LISTEN", default_value = "0.0.0.0:10000")]
        listen: SocketAddr,

        /// Shared secret expected in `x-run-key` or `?key=`
        #[arg(long, env = "QUOTEBOT_RUN_KEY", hide_env_values = true)]
        run_key: String,
    },
    /// Run a single cycle and print the result as JSON
    RunOnce,

    /// Development and debugging commands
    #[command(subcommand)]
    Dev(DevCmd),
}

#[derive(Debug, Subcommand)]
pub enum DevCmd {
    /// Run the configured search and print the selected candidates without
    /// touching the queue
    Search,
    /// Print the pending queue and the bot state
    Queue,
}
