//! Chat moderation: banned words and links.
//!
//! A [`ModerationPolicy`] is immutable once built. [`ModerationFilter`] holds
//! the active policy behind an `Arc` and replaces it by swapping the pointer
//! under a short write lock. A `check` clones the `Arc` first and classifies
//! against that one policy, so it sees either the old list or the new one in
//! full, never a blend.

use crate::observability::metrics::record_policy_replaced;
use regex::Regex;
use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tracing::info;

/// Any token starting with `http://` or `https://` followed by non-whitespace.
pub const DEFAULT_LINK_PATTERN: &str = r"(?i)https?://\S+";

/// Classification of one chat text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Permitted,
    BlockedByWord,
    BlockedByLink,
}

impl Verdict {
    #[must_use]
    pub const fn is_blocked(&self) -> bool {
        !matches!(self, Verdict::Permitted)
    }

    /// Returns the verdict for logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Verdict::Permitted => "permitted",
            Verdict::BlockedByWord => "banned_word",
            Verdict::BlockedByLink => "link",
        }
    }
}

#[derive(Debug, Error)]
pub enum ModerationError {
    #[error("invalid link pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// One immutable version of the banned-word list plus the link pattern.
#[derive(Debug)]
pub struct ModerationPolicy {
    version: u64,
    words: Vec<String>,
    lowered: Vec<String>,
    link_pattern: Regex,
}

impl ModerationPolicy {
    fn build<I, S>(version: u64, words: I, link_pattern: Regex) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut kept = Vec::new();
        let mut lowered = Vec::new();
        for word in words {
            let word = word.as_ref().trim();
            if word.is_empty() {
                continue;
            }
            let lower = word.to_lowercase();
            if seen.insert(lower.clone()) {
                kept.push(word.to_string());
                lowered.push(lower);
            }
        }

        Self {
            version,
            words: kept,
            lowered,
            link_pattern,
        }
    }

    /// Monotonic version; 0 for the startup policy.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Banned words: trimmed, de-duplicated case-insensitively, first spelling kept.
    #[must_use]
    pub fn words(&self) -> &[String] {
        &self.words
    }

    /// Classify `text` against this policy.
    #[must_use]
    pub fn check(&self, text: &str) -> Verdict {
        if !self.lowered.is_empty() {
            let haystack = text.to_lowercase();
            if self.lowered.iter().any(|word| haystack.contains(word.as_str())) {
                return Verdict::BlockedByWord;
            }
        }
        if self.link_pattern.is_match(text) {
            return Verdict::BlockedByLink;
        }
        Verdict::Permitted
    }
}

/// Holder of the active policy.
#[derive(Debug)]
pub struct ModerationFilter {
    policy: RwLock<Arc<ModerationPolicy>>,
}

impl ModerationFilter {
    /// Build a filter with the default link pattern.
    pub fn new<I, S>(words: I) -> Result<Self, ModerationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::with_link_pattern(words, DEFAULT_LINK_PATTERN)
    }

    /// Build a filter with a custom link pattern.
    pub fn with_link_pattern<I, S>(words: I, link_pattern: &str) -> Result<Self, ModerationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let link_pattern = Regex::new(link_pattern)?;
        Ok(Self {
            policy: RwLock::new(Arc::new(ModerationPolicy::build(0, words, link_pattern))),
        })
    }

    /// The active policy.
    #[must_use]
    pub fn current(&self) -> Arc<ModerationPolicy> {
        Arc::clone(&self.policy.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Classify `text` against the active policy.
    #[must_use]
    pub fn check(&self, text: &str) -> Verdict {
        self.current().check(text)
    }

    /// Active banned words.
    #[must_use]
    pub fn banned_words(&self) -> Vec<String> {
        self.current().words().to_vec()
    }

    /// Replace the banned-word list wholesale and return the list now in force.
    ///
    /// The new policy is built outside the lock; only the pointer swap happens
    /// under it. Replacing with the same list is a no-op in effect.
    pub fn replace_policy<I, S>(&self, words: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let link_pattern = self.current().link_pattern.clone();
        let mut next = ModerationPolicy::build(0, words, link_pattern);
        let installed = next.words().to_vec();
        let version = {
            let mut policy = self.policy.write().unwrap_or_else(PoisonError::into_inner);
            next.version = policy.version() + 1;
            let version = next.version;
            *policy = Arc::new(next);
            version
        };

        record_policy_replaced();
        info!(
            target: "room.moderation",
            version = version,
            banned_words = installed.len(),
            "Moderation policy replaced"
        );
        installed
    }
}
