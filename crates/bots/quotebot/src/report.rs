use std::time::Duration;

use quotebot_core::Timestamp;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    IntervalNotReached,
    RateLimited,
    NoCandidates,
    AlreadyRunning,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::IntervalNotReached => "interval_not_reached",
            Self::RateLimited => "rate_limited",
            Self::NoCandidates => "no_candidates",
            Self::AlreadyRunning => "already_running",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostedItem {
    /// Id of the quoted post
    pub id: String,
    /// Id of the created quote post
    pub post_id: String,
    pub score: f64,
    pub likes: u64,
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchSummary {
    pub query: String,
    pub found: usize,
    pub selected: usize,
    pub enqueued: usize,
}

/// Outcome of one run cycle.
///
/// `skipped` is `true` whenever nothing was posted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleReport {
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<SkipReason>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub posted: Vec<PostedItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetch: Option<FetchSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_posted_at: Option<Timestamp>,
}

impl CycleReport {
    pub fn skipped(reason: SkipReason) -> Self {
        Self {
            skipped: true,
            reason: Some(reason),
            ..Self::default()
        }
    }

    pub(crate) fn finish(mut self) -> Self {
        self.skipped = self.posted.is_empty();
        if self.skipped && self.reason.is_none() {
            self.reason = Some(SkipReason::NoCandidates);
        }
        self
    }

    pub(crate) fn finish_rate_limited(mut self, retry_after: Duration) -> Self {
        self.reason = Some(SkipReason::RateLimited);
        self.retry_after_ms = Some(u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX));
        self.skipped = self.posted.is_empty();
        self
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn skip_serializes_compactly() {
        let report = CycleReport::skipped(SkipReason::IntervalNotReached);
        assert_eq!(
            serde_json::to_value(&report).expect("serializable"),
            json!({ "skipped": true, "reason": "interval_not_reached" })
        );
    }

    #[test]
    fn reason_strings_match_serialization() {
        for reason in [
            SkipReason::IntervalNotReached,
            SkipReason::RateLimited,
            SkipReason::NoCandidates,
            SkipReason::AlreadyRunning,
        ] {
            assert_eq!(
                serde_json::to_value(reason).expect("serializable"),
                json!(reason.as_str())
            );
        }
    }
}
