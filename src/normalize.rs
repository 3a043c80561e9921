//! Query normalization shared by the matcher, decomposer and context extractor.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeSet;

lazy_static! {
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
    static ref FILLER_PREFIX: Regex = Regex::new(concat!(
        r"^(please |can you |could you |show me |give me |tell me |",
        r"what are |what is |list |the )+"
    ))
    .unwrap();
}

/// Words that carry no analytical meaning when scoring keyword overlap
const STOPWORDS: &[&str] = &[
    "a", "an", "the", "of", "in", "on", "for", "to", "by", "and", "or", "me", "my", "is", "are",
    "was", "were", "what", "which", "with", "please", "show", "give", "tell", "from", "at", "do",
    "does", "did", "it", "its", "our", "we", "us", "how", "much", "many",
];

/// Lowercase, strip punctuation, collapse whitespace and drop leading filler
/// ("please", "show me", "the", ...). Digits and hyphenated words survive.
pub fn normalize_query(query: &str) -> String {
    let lowered: String = query
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() || c == '-' {
                c
            } else {
                ' '
            }
        })
        .collect();

    let collapsed = WHITESPACE.replace_all(lowered.trim(), " ").to_string();
    strip_filler(&collapsed)
}

/// Drop leading filler from lowercase text with collapsed whitespace
pub fn strip_filler(text: &str) -> String {
    FILLER_PREFIX.replace(text, "").trim().to_string()
}

pub fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(&token)
}

/// Content tokens of an already-normalized string
pub fn tokens(normalized: &str) -> BTreeSet<String> {
    normalized
        .split_whitespace()
        .filter(|t| !is_stopword(t))
        .map(|t| t.to_string())
        .collect()
}

/// Rough token estimate used for prompt and context sizing (~4 chars per token)
pub fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() + 3) / 4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_query() {
        assert_eq!(
            normalize_query("Please, show me the TOP selling models!!"),
            "top selling models"
        );
        assert_eq!(
            normalize_query("The stock at the Pune plant"),
            "stock at the pune plant"
        );
        assert_eq!(
            normalize_query("  Why did   EV sales drop yesterday? "),
            "why did ev sales drop yesterday"
        );
    }

    #[test]
    fn test_tokens_drop_stopwords() {
        let t = tokens("the top selling models in the northeast");
        assert!(t.contains("top"));
        assert!(t.contains("northeast"));
        assert!(!t.contains("the"));
        assert!(!t.contains("in"));
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }
}
