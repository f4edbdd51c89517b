use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::Timestamp;

/// Public engagement counters of a post, as reported by the platform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngagementMetrics {
    pub likes: u64,
    pub reposts: u64,
    pub replies: u64,
}

/// A discovered post held in the queue, waiting to be quoted.
///
/// Lifecycle: unclaimed, then reserved by a claim (`reserved_until` set),
/// then either released back to unclaimed or used. Once `used_at` is set the
/// record is never modified again.
#[derive(Debug, Encode, Decode, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    pub text: String,
    pub like_count: u64,
    /// Rank computed once, when the candidate was enqueued.
    pub score: f64,
    pub fetched_at: Timestamp,
    /// Expiry of the current claim lease, if any.
    pub reserved_until: Option<Timestamp>,
    pub used_at: Option<Timestamp>,
}

impl Candidate {
    pub fn new(
        id: impl Into<String>,
        text: impl Into<String>,
        like_count: u64,
        score: f64,
        fetched_at: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            like_count,
            score,
            fetched_at,
            reserved_until: None,
            used_at: None,
        }
    }

    pub fn is_used(&self) -> bool {
        self.used_at.is_some()
    }

    /// Not used, and either never reserved or its lease expired by `now`.
    pub fn is_claimable(&self, now: Timestamp) -> bool {
        !self.is_used()
            && self
                .reserved_until
                .is_none_or(|reserved_until| reserved_until <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_expiry_makes_candidate_claimable_again() {
        let mut c = Candidate::new("1", "text", 10, 10.0, Timestamp::from_millis(0));
        assert!(c.is_claimable(Timestamp::from_millis(1)));

        c.reserved_until = Some(Timestamp::from_millis(100));
        assert!(!c.is_claimable(Timestamp::from_millis(99)));
        assert!(c.is_claimable(Timestamp::from_millis(100)));

        c.used_at = Some(Timestamp::from_millis(50));
        assert!(!c.is_claimable(Timestamp::from_millis(1_000)));
    }
}
