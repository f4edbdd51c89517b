use std::time::Duration;

use snafu::Snafu;

/// Everything the X API client can fail with.
///
/// Callers are expected to `match` on the variant: `RateLimited` carries the
/// time to wait before the next request, `Transient` is a server-side
/// failure that survived the retry budget, `Validation` is raised before
/// anything goes over the wire, and the rest are fatal.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum XApiError {
    #[snafu(display("Rate limited, retry after {}ms", retry_after.as_millis()))]
    RateLimited { retry_after: Duration },
    #[snafu(display("Transient server failure: HTTP {status}"))]
    Transient { status: u16, body: String },
    #[snafu(display("Invalid request: {reason}"))]
    Validation { reason: String },
    #[snafu(display("HTTP request failed"))]
    Request { source: reqwest::Error },
    #[snafu(display("Request rejected: HTTP {status}: {body}"))]
    Rejected { status: u16, body: String },
    #[snafu(display("Malformed response body"))]
    Decode { source: serde_json::Error },
    #[snafu(display("Invalid API base url"))]
    BaseUrl { source: url::ParseError },
    #[snafu(display("Failed to build HTTP client"))]
    ClientInit { source: reqwest::Error },
}

pub type XApiResult<T> = std::result::Result<T, XApiError>;

impl XApiError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Whether the request may be sent again as is.
    ///
    /// Rate limits are not included: whether to wait them out is a policy
    /// decision of the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}
