//! Minimal X (formerly Twitter) API v2 client: recent search and quote
//! posting, with timeouts, bounded retries and typed rate-limit errors.

mod error;
pub mod query;
pub mod rate_limit;
mod retry;

use std::time::{Duration, SystemTime};

use backon::Retryable as _;
use quotebot_core::EngagementMetrics;
use quotebot_util_error::FmtCompact as _;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt as _, ensure};
use tracing::{debug, instrument};
use url::Url;

pub use self::error::*;
pub use self::retry::{RateLimitPolicy, RetryPolicy};
use crate::query::{clamp_max_results, validate_query};
use crate::rate_limit::retry_after_from_headers;

const LOG_TARGET: &str = "quotebot::x_api";

pub const DEFAULT_API_BASE: &str = "https://api.x.com";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
pub const USER_AGENT: &str = concat!("quotebot/", env!("CARGO_PKG_VERSION"));

const SEARCH_PATH: &str = "2/tweets/search/recent";
const POSTS_PATH: &str = "2/tweets";
const SEARCH_TWEET_FIELDS: &str = "public_metrics,created_at,lang";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicMetrics {
    #[serde(default)]
    pub like_count: u64,
    #[serde(default)]
    pub retweet_count: u64,
    #[serde(default)]
    pub reply_count: u64,
    #[serde(default)]
    pub quote_count: u64,
}

impl From<PublicMetrics> for EngagementMetrics {
    fn from(m: PublicMetrics) -> Self {
        Self {
            likes: m.like_count,
            reposts: m.retweet_count,
            replies: m.reply_count,
        }
    }
}

/// A post as returned by the search endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub public_metrics: PublicMetrics,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub lang: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedPost {
    pub id: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Option<Vec<Post>>,
}

#[derive(Deserialize)]
struct CreatePostResponse {
    data: CreatedPost,
}

#[derive(Serialize)]
struct CreatePostRequest<'a> {
    text: &'a str,
    quote_tweet_id: &'a str,
}

#[derive(Debug, Clone)]
pub struct XApiClient {
    http: reqwest::Client,
    base_url: Url,
    retry: RetryPolicy,
    rate_limit_policy: RateLimitPolicy,
}

#[bon::bon]
impl XApiClient {
    #[builder(finish_fn(name = "build"))]
    pub fn new(
        #[builder(into, default = DEFAULT_API_BASE.to_owned())] base_url: String,
        #[builder(default = DEFAULT_TIMEOUT)] timeout: Duration,
        #[builder(default)] retry: RetryPolicy,
        #[builder(default)] rate_limit_policy: RateLimitPolicy,
    ) -> XApiResult<Self> {
        let mut base_url = Url::parse(&base_url).context(BaseUrlSnafu)?;
        // Endpoint paths are joined relative to the base
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .context(ClientInitSnafu)?;

        Ok(Self {
            http,
            base_url,
            retry,
            rate_limit_policy,
        })
    }
}

impl XApiClient {
    fn endpoint(&self, path: &str) -> XApiResult<Url> {
        self.base_url.join(path).context(BaseUrlSnafu)
    }

    /// Search posts from the last 7 days.
    ///
    /// `max_results` is clamped to the range the service accepts. A response
    /// without a `data` field is an empty result.
    #[instrument(skip_all, fields(query = %query))]
    pub async fn search_recent(
        &self,
        token: &str,
        query: &str,
        max_results: u32,
    ) -> XApiResult<Vec<Post>> {
        ensure!(
            !token.trim().is_empty(),
            ValidationSnafu {
                reason: "bearer token is required"
            }
        );
        validate_query(query)?;

        let mut url = self.endpoint(SEARCH_PATH)?;
        url.query_pairs_mut()
            .append_pair("query", query)
            .append_pair("max_results", &clamp_max_results(max_results).to_string())
            .append_pair("tweet.fields", SEARCH_TWEET_FIELDS);

        let url = &url;
        let policy = self.rate_limit_policy;
        let res: SearchResponse = (|| async move {
            self.send_json(self.http.get(url.clone()).bearer_auth(token))
                .await
        })
        .retry(self.retry.backoff())
        .when(|e| e.is_retryable() || (policy == RateLimitPolicy::Retry && e.is_rate_limited()))
        .notify(|e, delay| {
            debug!(
                target: LOG_TARGET,
                err = %e.fmt_compact(),
                delay_ms = delay.as_millis(),
                "Retrying search"
            );
        })
        .await?;

        let posts = res.data.unwrap_or_default();
        debug!(target: LOG_TARGET, count = posts.len(), "Search returned posts");
        Ok(posts)
    }

    /// Publish `text` as a quote of `quote_post_id`.
    ///
    /// Server failures are retried; a rate limit is always returned to the
    /// caller as [`XApiError::RateLimited`].
    #[instrument(skip_all, fields(quote_post_id = %quote_post_id))]
    pub async fn create_quote_post(
        &self,
        token: &str,
        quote_post_id: &str,
        text: &str,
    ) -> XApiResult<CreatedPost> {
        ensure!(
            !token.trim().is_empty(),
            ValidationSnafu {
                reason: "user access token is required"
            }
        );
        ensure!(
            !quote_post_id.trim().is_empty(),
            ValidationSnafu {
                reason: "quoted post id is required"
            }
        );
        ensure!(
            !text.trim().is_empty(),
            ValidationSnafu {
                reason: "post text is required"
            }
        );

        let url = &self.endpoint(POSTS_PATH)?;
        let body = &CreatePostRequest {
            text,
            quote_tweet_id: quote_post_id,
        };
        let res: CreatePostResponse = (|| async move {
            self.send_json(self.http.post(url.clone()).bearer_auth(token).json(body))
                .await
        })
        .retry(self.retry.backoff())
        .when(XApiError::is_retryable)
        .notify(|e, delay| {
            debug!(
                target: LOG_TARGET,
                err = %e.fmt_compact(),
                delay_ms = delay.as_millis(),
                "Retrying publish"
            );
        })
        .await?;

        debug!(target: LOG_TARGET, post_id = %res.data.id, "Created quote post");
        Ok(res.data)
    }

    async fn send_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> XApiResult<T> {
        let resp = req.send().await.context(RequestSnafu)?;
        let status = resp.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = retry_after_from_headers(resp.headers(), SystemTime::now());
            return RateLimitedSnafu { retry_after }.fail();
        }

        let body = resp.bytes().await.context(RequestSnafu)?;
        if status.is_server_error() {
            return TransientSnafu {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body),
            }
            .fail();
        }
        if !status.is_success() {
            return RejectedSnafu {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body),
            }
            .fail();
        }

        serde_json::from_slice(&body).context(DecodeSnafu)
    }
}
