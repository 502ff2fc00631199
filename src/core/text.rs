//! Text Heuristics
//!
//! Shared word-level scoring used by the thought classifier, working-buffer
//! retrieval, and consolidation novelty. Everything here is pure and
//! allocation-light; similarity is jaccard over lowercase word bags.

use std::collections::HashSet;

/// Split text into a lowercase bag of words
///
/// Words are maximal runs of alphanumeric characters; everything else is a
/// separator.
#[must_use]
pub fn word_bag(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Number of whitespace-separated tokens
#[must_use]
pub fn token_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Jaccard similarity of two word bags, in [0, 1]
///
/// Two empty bags are identical by convention (1.0); one empty bag against a
/// non-empty one is fully dissimilar (0.0).
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        return 0.0;
    }
    intersection as f32 / union as f32
}

/// Jaccard similarity of two raw texts
#[must_use]
pub fn similarity(a: &str, b: &str) -> f32 {
    jaccard(&word_bag(a), &word_bag(b))
}

/// How many entries of `vocab` occur as words in `bag`
#[must_use]
pub fn vocab_hits(bag: &HashSet<String>, vocab: &[&str]) -> usize {
    vocab.iter().filter(|v| bag.contains(**v)).count()
}

/// Whether the text contains at least one ASCII digit
#[must_use]
pub fn has_numeral(text: &str) -> bool {
    text.chars().any(|c| c.is_ascii_digit())
}

/// Whether the text contains a quoted span (single, double, or backtick)
#[must_use]
pub fn has_quoted_span(text: &str) -> bool {
    for quote in ['"', '\'', '`'] {
        let mut indices = text.char_indices().filter(|(_, c)| *c == quote);
        if indices.next().is_some() && indices.next().is_some() {
            return true;
        }
    }
    false
}

/// Count of clause separators (commas, semicolons, colons, dashes)
#[must_use]
pub fn clause_separators(text: &str) -> usize {
    text.chars()
        .filter(|c| matches!(c, ',' | ';' | ':' | '-'))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_bag_lowercases_and_splits() {
        let bag = word_bag("Design a Lock-Free queue!");
        assert!(bag.contains("design"));
        assert!(bag.contains("lock"));
        assert!(bag.contains("free"));
        assert!(bag.contains("queue"));
        assert!(!bag.contains("Design"));
    }

    #[test]
    fn jaccard_identical_texts() {
        assert!((similarity("alpha beta gamma", "gamma beta alpha") - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn jaccard_disjoint_texts() {
        assert_eq!(similarity("alpha beta", "gamma delta"), 0.0);
    }

    #[test]
    fn jaccard_partial_overlap() {
        // {a, b} vs {b, c}: intersection 1, union 3
        let s = similarity("a b", "b c");
        assert!((s - 1.0 / 3.0).abs() < 0.001);
    }

    #[test]
    fn jaccard_empty_conventions() {
        assert!((similarity("", "") - 1.0).abs() < f32::EPSILON);
        assert_eq!(similarity("", "something"), 0.0);
    }

    #[test]
    fn numeral_and_quote_detection() {
        assert!(has_numeral("retry 3 times"));
        assert!(!has_numeral("retry some times"));
        assert!(has_quoted_span("the \"flaky\" test"));
        assert!(has_quoted_span("value `x` is stale"));
        assert!(!has_quoted_span("no quotes here"));
    }

    #[test]
    fn clause_separator_count() {
        assert_eq!(clause_separators("a, b; c: d-e"), 4);
        assert_eq!(clause_separators("plain words"), 0);
    }

    #[test]
    fn vocab_hit_count() {
        let bag = word_bag("optimize the concurrent scheduler design");
        assert_eq!(vocab_hits(&bag, &["optimize", "design", "missing"]), 2);
    }
}
