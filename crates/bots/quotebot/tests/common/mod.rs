#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use quotebot::Bot;
use quotebot::commentary::{CommentError, CommentGenerator, CommentResult};
use quotebot::config::BotConfig;
use quotebot::platform::Platform;
use quotebot::publication::PublicationLog;
use quotebot_core::{Candidate, Timestamp};
use quotebot_db::{BotState, Database, DbError, DbResult};
use quotebot_util_error::BoxedError;
use quotebot_x_api::{CreatedPost, Post, PublicMetrics, XApiError, XApiResult};
use tempfile::TempDir;
use tokio::sync::{Mutex, Notify};

/// A fixed "now" for deterministic cycles.
pub const NOW: Timestamp = Timestamp::from_millis(1_700_000_000_000);

pub const GOOD_COMMENT: &str = "なるほど、これは面白い視点ですね";

pub enum SearchReply {
    Posts(Vec<Post>),
    RateLimited(Duration),
    Rejected,
}

pub enum PublishReply {
    Ok,
    RateLimited(Duration),
    Rejected,
}

/// Scripted platform. Search replies are consumed in order (an exhausted
/// script returns no posts); every publish gets `publish_reply`.
pub struct MockPlatform {
    search_script: Mutex<VecDeque<SearchReply>>,
    publish_reply: Mutex<PublishReply>,
    pub searches: AtomicUsize,
    pub published: Mutex<Vec<(String, String)>>,
}

impl MockPlatform {
    pub fn new(search_script: Vec<SearchReply>) -> Self {
        Self {
            search_script: Mutex::new(search_script.into()),
            publish_reply: Mutex::new(PublishReply::Ok),
            searches: AtomicUsize::new(0),
            published: Mutex::new(vec![]),
        }
    }

    pub fn with_publish_reply(self, reply: PublishReply) -> Self {
        Self {
            publish_reply: Mutex::new(reply),
            ..self
        }
    }

    pub fn search_count(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }

    pub async fn published_ids(&self) -> Vec<String> {
        self.published
            .lock()
            .await
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }
}

#[async_trait]
impl Platform for MockPlatform {
    async fn search(&self, _query: &str, _max_results: u32) -> XApiResult<Vec<Post>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        match self.search_script.lock().await.pop_front() {
            None => Ok(vec![]),
            Some(SearchReply::Posts(posts)) => Ok(posts),
            Some(SearchReply::RateLimited(retry_after)) => {
                Err(XApiError::RateLimited { retry_after })
            }
            Some(SearchReply::Rejected) => Err(XApiError::Rejected {
                status: 403,
                body: "forbidden".into(),
            }),
        }
    }

    async fn publish(&self, quote_post_id: &str, text: &str) -> XApiResult<CreatedPost> {
        match *self.publish_reply.lock().await {
            PublishReply::Ok => {
                let mut published = self.published.lock().await;
                published.push((quote_post_id.to_owned(), text.to_owned()));
                Ok(CreatedPost {
                    id: format!("quote-{}", published.len()),
                    text: text.to_owned(),
                })
            }
            PublishReply::RateLimited(retry_after) => Err(XApiError::RateLimited { retry_after }),
            PublishReply::Rejected => Err(XApiError::Rejected {
                status: 403,
                body: "duplicate content".into(),
            }),
        }
    }
}

pub enum CommentReply {
    Text(&'static str),
    Fail,
}

/// Replies per source text, [`GOOD_COMMENT`] for anything else.
#[derive(Default)]
pub struct MockGenerator {
    replies: HashMap<String, CommentReply>,
    pub calls: AtomicUsize,
    /// When set, `generate` signals `entered` and waits for `release`.
    gate: Option<(Arc<Notify>, Arc<Notify>)>,
}

impl MockGenerator {
    pub fn reply(mut self, text: &str, reply: CommentReply) -> Self {
        self.replies.insert(text.to_owned(), reply);
        self
    }

    pub fn gated(entered: Arc<Notify>, release: Arc<Notify>) -> Self {
        Self {
            gate: Some((entered, release)),
            ..Self::default()
        }
    }
}

#[async_trait]
impl CommentGenerator for MockGenerator {
    async fn generate(&self, text: &str) -> CommentResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some((entered, release)) = &self.gate {
            entered.notify_one();
            release.notified().await;
        }
        match self.replies.get(text) {
            None => Ok(GOOD_COMMENT.to_owned()),
            Some(CommentReply::Text(s)) => Ok((*s).to_owned()),
            Some(CommentReply::Fail) => Err(CommentError::Rejected {
                status: 500,
                body: "model overloaded".into(),
            }),
        }
    }
}

/// Fails the first `failures` calls of `finish_publication`, then
/// delegates to the database.
pub struct FlakyPublicationLog {
    db: Arc<Database>,
    failures: AtomicUsize,
    pub finish_calls: AtomicUsize,
}

impl FlakyPublicationLog {
    pub fn new(db: Arc<Database>, failures: usize) -> Self {
        Self {
            db,
            failures: AtomicUsize::new(failures),
            finish_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PublicationLog for FlakyPublicationLog {
    async fn finish_publication(&self, id: &str, now: Timestamp) -> DbResult<BotState> {
        self.finish_calls.fetch_add(1, Ordering::SeqCst);
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(DbError::from(BoxedError::from("disk full")));
        }
        self.db.finish_publication(id, now).await
    }

    async fn mark_posted(&self, id: &str, now: Timestamp) -> DbResult<bool> {
        self.db.mark_posted(id, now).await
    }
}

pub struct Harness {
    _dir: TempDir,
    pub db: Arc<Database>,
    pub platform: Arc<MockPlatform>,
    pub generator: Arc<MockGenerator>,
    pub bot: Arc<Bot>,
}

impl Harness {
    pub async fn new(config: BotConfig, platform: MockPlatform, generator: MockGenerator) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Arc::new(
            Database::open(dir.path().join("quotebot.redb"))
                .await
                .expect("open db"),
        );
        let platform = Arc::new(platform);
        let generator = Arc::new(generator);
        let bot = Arc::new(Bot::new(
            db.clone(),
            platform.clone(),
            generator.clone(),
            config,
        ));

        Self {
            _dir: dir,
            db,
            platform,
            generator,
            bot,
        }
    }
}

/// Config that accepts any post, so tests only exercise the cycle logic.
pub fn permissive_config() -> BotConfig {
    BotConfig::builder()
        .min_likes(0)
        .score_threshold(0.0)
        .fetch_interval(Duration::ZERO)
        .build()
}

pub fn post(id: &str, likes: u64) -> Post {
    Post {
        id: id.into(),
        text: format!("今日のできごと{id}について詳しく書いてみました"),
        public_metrics: PublicMetrics {
            like_count: likes,
            ..Default::default()
        },
        created_at: None,
        lang: Some("ja".into()),
    }
}

pub fn candidate(id: &str, score: f64) -> Candidate {
    Candidate::new(
        id,
        format!("候補{id}の本文です、十分な長さがあります"),
        score as u64,
        score,
        NOW.saturating_sub(Duration::from_secs(60)),
    )
}

/// Poll `check` until it holds, for at most two seconds.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
