use snafu::ensure;

use crate::{ValidationSnafu, XApiResult};

/// Engagement-threshold operators that most API plans refuse. Queries
/// containing them are rejected before sending, since the service does not
/// reject them consistently.
pub const BLOCKED_OPERATORS: &[&str] = &["min_faves:", "min_retweets:", "min_replies:"];

/// A pure-operator query is refused by the service, so there is always a
/// plain search term.
pub const DEFAULT_SEED_TERM: &str = "の";

pub const MIN_SEARCH_RESULTS: u32 = 10;
pub const MAX_SEARCH_RESULTS: u32 = 100;

pub fn validate_query(query: &str) -> XApiResult<()> {
    ensure!(
        !query.trim().is_empty(),
        ValidationSnafu {
            reason: "search query is required"
        }
    );

    let lowercase = query.to_lowercase();
    if let Some(op) = BLOCKED_OPERATORS.iter().find(|op| lowercase.contains(*op)) {
        return ValidationSnafu {
            reason: format!("query uses unsupported operator `{op}`"),
        }
        .fail();
    }

    Ok(())
}

pub fn clamp_max_results(max_results: u32) -> u32 {
    max_results.clamp(MIN_SEARCH_RESULTS, MAX_SEARCH_RESULTS)
}

/// `(<seed>) lang:<lang> -is:reply -is:retweet`
pub fn build_search_query(seed: &str, lang: &str) -> String {
    let seed = seed.trim();
    let seed = if seed.is_empty() {
        DEFAULT_SEED_TERM
    } else {
        seed
    };
    format!("({seed}) lang:{lang} -is:reply -is:retweet")
}
