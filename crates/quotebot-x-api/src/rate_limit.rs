use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::header::HeaderMap;

/// Used when a 429 response carries no usable timing headers.
pub const RETRY_AFTER_FALLBACK: Duration = Duration::from_secs(60);

/// Added on top of a reset deadline, to absorb clock skew.
pub const RESET_SAFETY_BUFFER: Duration = Duration::from_secs(2);

const RETRY_AFTER: &str = "retry-after";
const RATE_LIMIT_RESET: &str = "x-rate-limit-reset";

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
}

/// How long to wait after a rate-limited response.
///
/// An explicit `retry-after` (in seconds) wins. Otherwise the
/// `x-rate-limit-reset` epoch deadline is compared against `now`, plus
/// [`RESET_SAFETY_BUFFER`]. Otherwise [`RETRY_AFTER_FALLBACK`].
pub fn retry_after_from_headers(headers: &HeaderMap, now: SystemTime) -> Duration {
    if let Some(secs) = header_u64(headers, RETRY_AFTER) {
        return Duration::from_secs(secs);
    }

    if let Some(reset_secs) = header_u64(headers, RATE_LIMIT_RESET) {
        let now = now.duration_since(UNIX_EPOCH).unwrap_or_default();
        let reset = Duration::from_secs(reset_secs);
        return reset.saturating_sub(now) + RESET_SAFETY_BUFFER;
    }

    RETRY_AFTER_FALLBACK
}

#[cfg(test)]
mod tests {
    use reqwest::header::HeaderValue;

    use super::*;

    const NOW_SECS: u64 = 1_700_000_000;

    fn now() -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(NOW_SECS)
    }

    #[test]
    fn explicit_retry_after_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("120"));
        headers.insert(
            RATE_LIMIT_RESET,
            HeaderValue::from_str(&(NOW_SECS + 900).to_string()).expect("valid"),
        );
        assert_eq!(
            retry_after_from_headers(&headers, now()),
            Duration::from_secs(120)
        );
    }

    #[test]
    fn reset_deadline_gets_buffer() {
        let mut headers = HeaderMap::new();
        headers.insert(
            RATE_LIMIT_RESET,
            HeaderValue::from_str(&(NOW_SECS + 900).to_string()).expect("valid"),
        );
        assert_eq!(
            retry_after_from_headers(&headers, now()),
            Duration::from_secs(902)
        );
    }

    #[test]
    fn reset_in_the_past_waits_only_the_buffer() {
        let mut headers = HeaderMap::new();
        headers.insert(
            RATE_LIMIT_RESET,
            HeaderValue::from_str(&(NOW_SECS - 10).to_string()).expect("valid"),
        );
        assert_eq!(
            retry_after_from_headers(&headers, now()),
            RESET_SAFETY_BUFFER
        );
    }

    #[test]
    fn garbage_headers_fall_back() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("soon"));
        assert_eq!(
            retry_after_from_headers(&headers, now()),
            RETRY_AFTER_FALLBACK
        );
        assert_eq!(
            retry_after_from_headers(&HeaderMap::new(), now()),
            RETRY_AFTER_FALLBACK
        );
    }
}
