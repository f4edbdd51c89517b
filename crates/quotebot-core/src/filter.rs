//! Content filtering applied to search results before they become
//! candidates.
//!
//! Filtering is deliberately conservative: anything that looks sensitive,
//! like a solicitation, or like spam is dropped. All matching against the
//! denylist happens on [`normalize_text`] output, so full-width/half-width
//! and case variants of a denied term are caught too.

use std::collections::{BTreeSet, HashSet};
use std::convert::Infallible;
use std::sync::LazyLock;

use unicode_normalization::UnicodeNormalization as _;

/// Sensitive, inflammatory and solicitation terms.
pub const DEFAULT_DENYLIST: &[&str] = &[
    "死",
    "殺",
    "自殺",
    "事故",
    "炎上",
    "晒し",
    "誹謗中傷",
    "選挙",
    "政党",
    "宗教",
    "裏垢",
    "エロ",
    "無修正",
    "稼げる",
    "副業",
    "投資サロン",
    "line追加",
    "ライン追加",
    "dmください",
];

static DEFAULT_FILTER: LazyLock<ContentFilter> = LazyLock::new(ContentFilter::default);

/// Canonical form used for matching: NFKC (folds full-width/half-width
/// forms), whitespace runs collapsed to a single space, trimmed, lowercased.
pub fn normalize_text(text: &str) -> String {
    let folded: String = text.nfkc().collect();
    folded
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// A character that is spam when repeated `min_run` times in a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepeatRule {
    pub ch: char,
    pub min_run: usize,
    pub ignore_case: bool,
}

impl RepeatRule {
    pub const fn new(ch: char, min_run: usize) -> Self {
        Self {
            ch,
            min_run,
            ignore_case: false,
        }
    }

    pub const fn ignoring_case(mut self) -> Self {
        self.ignore_case = true;
        self
    }

    fn matches(&self, c: char) -> bool {
        c == self.ch || (self.ignore_case && c.to_lowercase().eq(self.ch.to_lowercase()))
    }

    fn found_in(&self, raw: &str) -> bool {
        let mut run = 0;
        for c in raw.chars() {
            if self.matches(c) {
                run += 1;
                if self.min_run <= run {
                    return true;
                }
            } else {
                run = 0;
            }
        }
        false
    }
}

pub const DEFAULT_REPEAT_RULES: &[RepeatRule] = &[
    RepeatRule::new('w', 6).ignoring_case(),
    RepeatRule::new('ｗ', 6),
    RepeatRule::new('!', 4),
    RepeatRule::new('！', 4),
    RepeatRule::new('?', 4),
    RepeatRule::new('？', 4),
    RepeatRule::new('…', 6),
];

/// Thresholds of the spam heuristic. Each `*_count` is the number of
/// occurrences at which a text is considered spam.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpamRules {
    pub url_count: usize,
    pub min_normalized_chars: usize,
    pub hashtag_count: usize,
    pub mention_count: usize,
    pub repeat_rules: Vec<RepeatRule>,
}

impl Default for SpamRules {
    fn default() -> Self {
        Self {
            url_count: 2,
            min_normalized_chars: 12,
            hashtag_count: 6,
            mention_count: 4,
            repeat_rules: DEFAULT_REPEAT_RULES.to_vec(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContentFilter {
    /// Stored normalized.
    denylist: Vec<String>,
    spam: SpamRules,
}

impl Default for ContentFilter {
    fn default() -> Self {
        Self::new(DEFAULT_DENYLIST, SpamRules::default())
    }
}

impl ContentFilter {
    pub fn new<I, S>(denylist: I, spam: SpamRules) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            denylist: denylist
                .into_iter()
                .map(|term| normalize_text(term.as_ref()))
                .filter(|term| !term.is_empty())
                .collect(),
            spam,
        }
    }

    pub fn is_safe_text(&self, text: &str) -> bool {
        let normalized = normalize_text(text);
        !self
            .denylist
            .iter()
            .any(|term| normalized.contains(term.as_str()))
    }

    pub fn looks_like_spam(&self, text: &str) -> bool {
        let rules = &self.spam;

        let url_count = text.matches("http://").count() + text.matches("https://").count();
        if rules.url_count <= url_count {
            return true;
        }

        if normalize_text(text).chars().count() < rules.min_normalized_chars {
            return true;
        }

        if rules.hashtag_count <= text.chars().filter(|c| matches!(c, '#' | '＃')).count() {
            return true;
        }

        if rules.mention_count <= text.chars().filter(|c| *c == '@').count() {
            return true;
        }

        rules.repeat_rules.iter().any(|rule| rule.found_in(text))
    }

    /// Non-empty, safe, and not spam.
    pub fn is_candidate_text(&self, text: &str) -> bool {
        !text.trim().is_empty() && self.is_safe_text(text) && !self.looks_like_spam(text)
    }
}

/// [`ContentFilter::is_safe_text`] with the default denylist.
pub fn is_safe_text(text: &str) -> bool {
    DEFAULT_FILTER.is_safe_text(text)
}

/// [`ContentFilter::looks_like_spam`] with the default rules.
pub fn looks_like_spam(text: &str) -> bool {
    DEFAULT_FILTER.looks_like_spam(text)
}

/// [`ContentFilter::is_candidate_text`] with the default rules.
pub fn is_candidate_text(text: &str) -> bool {
    DEFAULT_FILTER.is_candidate_text(text)
}

/// Source of truth for "was this id already published".
///
/// Implementations may be in-memory sets or remote/persistent stores; callers
/// always `.await` the answer.
#[async_trait::async_trait]
pub trait MembershipOracle: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn contains(&self, id: &str) -> Result<bool, Self::Error>;
}

#[async_trait::async_trait]
impl MembershipOracle for HashSet<String> {
    type Error = Infallible;

    async fn contains(&self, id: &str) -> Result<bool, Self::Error> {
        Ok(HashSet::contains(self, id))
    }
}

#[async_trait::async_trait]
impl MembershipOracle for BTreeSet<String> {
    type Error = Infallible;

    async fn contains(&self, id: &str) -> Result<bool, Self::Error> {
        Ok(BTreeSet::contains(self, id))
    }
}

/// `false` if `id` is empty or already known to `posted`.
pub async fn not_posted_yet<M>(id: &str, posted: &M) -> Result<bool, M::Error>
where
    M: MembershipOracle + ?Sized,
{
    if id.trim().is_empty() {
        return Ok(false);
    }
    Ok(!posted.contains(id).await?)
}
