mod candidate;
pub mod filter;
pub mod scoring;
mod timestamp;

pub use self::candidate::{Candidate, EngagementMetrics};
pub use self::timestamp::Timestamp;
