use async_trait::async_trait;
use quotebot_x_api::{CreatedPost, Post, XApiClient, XApiResult};

/// The social platform the bot reads from and posts to.
#[async_trait]
pub trait Platform: Send + Sync {
    async fn search(&self, query: &str, max_results: u32) -> XApiResult<Vec<Post>>;

    async fn publish(&self, quote_post_id: &str, text: &str) -> XApiResult<CreatedPost>;
}

/// [`Platform`] backed by the X API, holding the credentials each
/// operation needs.
pub struct XPlatform {
    client: XApiClient,
    bearer_token: String,
    user_access_token: String,
}

impl XPlatform {
    pub fn new(client: XApiClient, bearer_token: String, user_access_token: String) -> Self {
        Self {
            client,
            bearer_token,
            user_access_token,
        }
    }
}

#[async_trait]
impl Platform for XPlatform {
    async fn search(&self, query: &str, max_results: u32) -> XApiResult<Vec<Post>> {
        self.client
            .search_recent(&self.bearer_token, query, max_results)
            .await
    }

    async fn publish(&self, quote_post_id: &str, text: &str) -> XApiResult<CreatedPost> {
        self.client
            .create_quote_post(&self.user_access_token, quote_post_id, text)
            .await
    }
}
