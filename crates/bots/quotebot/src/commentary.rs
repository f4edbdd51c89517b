use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt as _, Snafu};
use tracing::debug;
use unicode_segmentation::UnicodeSegmentation as _;
use url::Url;

use crate::LOG_TARGET;

pub const DEFAULT_OPENAI_API_BASE: &str = "https://api.openai.com";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

/// Hard cap on whatever the model returns.
pub const MAX_COMMENT_CHARS: usize = 60;

const TEMPERATURE: f32 = 0.9;
const CHAT_COMPLETIONS_PATH: &str = "v1/chat/completions";

#[derive(Debug, Snafu)]
pub enum CommentError {
    #[snafu(display("Comment request failed"))]
    Request { source: reqwest::Error },
    #[snafu(display("Comment request rejected: HTTP {status}: {body}"))]
    Rejected { status: u16, body: String },
    #[snafu(display("Malformed completion response"))]
    Decode { source: serde_json::Error },
    #[snafu(display("Invalid API base url"))]
    BaseUrl { source: url::ParseError },
}

pub type CommentResult<T> = std::result::Result<T, CommentError>;

/// Writes the short comment attached to a quote post.
///
/// An empty string means "nothing worth posting"; the caller enforces its
/// own minimum length.
#[async_trait]
pub trait CommentGenerator: Send + Sync {
    async fn generate(&self, text: &str) -> CommentResult<String>;
}

/// Length in user-perceived characters.
pub fn comment_len(comment: &str) -> usize {
    comment.graphemes(true).count()
}

/// Trim, then cut to at most `max_chars` user-perceived characters.
pub fn truncate_comment(comment: &str, max_chars: usize) -> String {
    comment.trim().graphemes(true).take(max_chars).collect()
}

pub fn build_prompt(text: &str) -> String {
    format!(
        "以下のX投稿を引用するための日本語コメントを1文生成してください。\n\
         \n\
         条件：\n\
         ・40文字以内\n\
         ・感想、気づき、補足のいずれか\n\
         ・煽り、命令、勧誘は禁止\n\
         ・自然な口語（です/ます でもOK）\n\
         ・投稿の内容をコピペしない（言い換える）\n\
         ・絵文字は0〜1個まで\n\
         \n\
         投稿内容：\n\
         「{text}」\n"
    )
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// [`CommentGenerator`] using the OpenAI chat completions API.
pub struct OpenAiCommentGenerator {
    http: reqwest::Client,
    url: Url,
    api_key: String,
    model: String,
}

#[bon::bon]
impl OpenAiCommentGenerator {
    #[builder(finish_fn(name = "build"))]
    pub fn new(
        #[builder(into)] api_key: String,
        #[builder(into, default = DEFAULT_OPENAI_API_BASE.to_owned())] base_url: String,
        #[builder(into, default = DEFAULT_OPENAI_MODEL.to_owned())] model: String,
        #[builder(default = Duration::from_secs(30))] timeout: Duration,
    ) -> CommentResult<Self> {
        let mut base_url = Url::parse(&base_url).context(BaseUrlSnafu)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let url = base_url.join(CHAT_COMPLETIONS_PATH).context(BaseUrlSnafu)?;

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context(RequestSnafu)?;

        Ok(Self {
            http,
            url,
            api_key,
            model,
        })
    }
}

#[async_trait]
impl CommentGenerator for OpenAiCommentGenerator {
    async fn generate(&self, text: &str) -> CommentResult<String> {
        let prompt = build_prompt(text);
        let req = ChatRequest {
            model: &self.model,
            temperature: TEMPERATURE,
            messages: [ChatMessage {
                role: "user",
                content: &prompt,
            }],
        };

        let resp = self
            .http
            .post(self.url.clone())
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .context(RequestSnafu)?;
        let status = resp.status();
        let body = resp.bytes().await.context(RequestSnafu)?;
        if !status.is_success() {
            return RejectedSnafu {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body),
            }
            .fail();
        }

        let resp: ChatResponse = serde_json::from_slice(&body).context(DecodeSnafu)?;
        let content = resp
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        let comment = truncate_comment(&content, MAX_COMMENT_CHARS);
        debug!(target: LOG_TARGET, chars = comment_len(&comment), "Generated comment");
        Ok(comment)
    }
}
