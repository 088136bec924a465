//! Tokenisation helpers shared by the lexical backends, the hashing embedder
//! and the keyword analyzer.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\p{L}\p{N}]+(?:['’][\p{L}]+)?").expect("valid token regex"));

static SENTENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^.!?\n]+[.!?]?").expect("valid sentence regex"));

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "been", "but", "by", "do", "does", "for", "from",
    "had", "has", "have", "he", "her", "his", "i", "if", "in", "into", "is", "it", "its", "me",
    "my", "no", "not", "of", "on", "or", "our", "she", "so", "than", "that", "the", "their",
    "them", "then", "there", "these", "they", "this", "to", "was", "we", "were", "what", "when",
    "which", "who", "will", "with", "you", "your",
];

/// Lower-cased word tokens in order of appearance.
pub fn tokenize(text: &str) -> Vec<String> {
    TOKEN_RE
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

pub fn is_stopword(token: &str) -> bool {
    STOPWORDS.binary_search(&token).is_ok()
}

/// Tokens with stopwords removed. Falls back to every token when the text
/// consists of stopwords only.
pub fn content_tokens(text: &str) -> Vec<String> {
    let all = tokenize(text);
    let filtered: Vec<String> = all.iter().filter(|t| !is_stopword(t)).cloned().collect();
    if filtered.is_empty() {
        all
    } else {
        filtered
    }
}

/// Sentences in order, trimmed, empty ones dropped.
pub fn sentences(text: &str) -> Vec<&str> {
    SENTENCE_RE
        .find_iter(text)
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Lower-cased, whitespace-collapsed form used for cache keys and
/// exact-duplicate detection.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Truncate on a char boundary to at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Fraction of query tokens found in `haystack`, in `[0, 1]`.
pub fn overlap_score(query_tokens: &[String], haystack: &HashSet<String>) -> f64 {
    if query_tokens.is_empty() {
        return 0.0;
    }
    let hits = query_tokens.iter().filter(|t| haystack.contains(*t)).count();
    hits as f64 / query_tokens.len() as f64
}

/// How well a (possibly multi-word) name matches a query: `1.0` when the
/// whole normalized name occurs in the query, otherwise the share of the
/// name's non-stopword tokens present in `query_tokens`.
pub fn name_match_score(name: &str, query_norm: &str, query_tokens: &HashSet<String>) -> f64 {
    let name_norm = normalize(name);
    if name_norm.is_empty() {
        return 0.0;
    }
    if query_norm.contains(&name_norm) {
        return 1.0;
    }
    let name_tokens = tokenize(name);
    if name_tokens.is_empty() {
        return 0.0;
    }
    let hits = name_tokens
        .iter()
        .filter(|t| !is_stopword(t) && query_tokens.contains(*t))
        .count();
    hits as f64 / name_tokens.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stopwords_are_sorted_for_binary_search() {
        let mut sorted = STOPWORDS.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, STOPWORDS);
    }

    #[test]
    fn tokenize_lowercases_and_strips_punctuation() {
        assert_eq!(
            tokenize("User prefers Coffee, not tea!"),
            vec!["user", "prefers", "coffee", "not", "tea"]
        );
    }

    #[test]
    fn content_tokens_drop_stopwords() {
        assert_eq!(
            content_tokens("I like the coffee in the morning"),
            vec!["like", "coffee", "morning"]
        );
        assert_eq!(content_tokens("it is"), vec!["it", "is"]);
    }

    #[test]
    fn sentences_split_on_terminators() {
        assert_eq!(
            sentences("First one. Second one! Third"),
            vec!["First one.", "Second one!", "Third"]
        );
    }

    #[test]
    fn normalize_collapses_whitespace() {
        assert_eq!(normalize("  Coffee   PLEASE \n now "), "coffee please now");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn overlap_is_fraction_of_query() {
        let hay: HashSet<String> = ["coffee", "morning"].iter().map(|s| s.to_string()).collect();
        let q = vec!["coffee".to_string(), "tea".to_string()];
        assert!((overlap_score(&q, &hay) - 0.5).abs() < f64::EPSILON);
        assert_eq!(overlap_score(&[], &hay), 0.0);
    }

    #[test]
    fn name_match_prefers_full_names() {
        let q = "where does alice smith live";
        let tokens: HashSet<String> = tokenize(q).into_iter().collect();
        assert_eq!(name_match_score("Alice Smith", q, &tokens), 1.0);
        assert!((name_match_score("Alice Jones", q, &tokens) - 0.5).abs() < 1e-9);
        assert_eq!(name_match_score("Bob", q, &tokens), 0.0);
    }
}
