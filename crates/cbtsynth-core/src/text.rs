//! Word-level text utilities shared by the validator, the store's fact scan
//! and the composer. Words follow Unicode segmentation (UAX #29).

use unicode_segmentation::UnicodeSegmentation;

const STOPWORDS: &[&str] = &[
    "a", "about", "after", "again", "all", "also", "am", "an", "and", "any", "are", "as", "at",
    "be", "because", "been", "before", "being", "both", "but", "by", "can", "could", "did", "do",
    "does", "doing", "each", "even", "for", "from", "get", "got", "had", "has", "have", "having",
    "he", "her", "here", "hers", "him", "his", "how", "i", "if", "in", "into", "is", "it", "its",
    "just", "like", "me", "more", "most", "my", "myself", "no", "nor", "not", "now", "of", "off",
    "on", "once", "one", "only", "or", "other", "our", "ours", "out", "over", "own", "really",
    "so", "some", "such", "than", "that", "the", "their", "them", "then", "there", "these",
    "they", "this", "those", "through", "to", "too", "under", "until", "up", "us", "very", "was",
    "we", "were", "what", "when", "where", "which", "while", "who", "whom", "why", "will", "with",
    "would", "you", "your", "yours", "yourself",
];

pub fn is_stopword(word: &str) -> bool {
    STOPWORDS.contains(&word)
}

pub fn word_count(text: &str) -> usize {
    text.unicode_words().count()
}

/// Lowercase words joined by single spaces. Punctuation and spacing
/// differences disappear, so substring tests become format-insensitive.
pub fn normalize(text: &str) -> String {
    text.unicode_words()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normalized, stemmed content words in order of appearance.
/// Contractions and stopwords are dropped.
pub fn content_tokens(text: &str) -> Vec<String> {
    text.unicode_words()
        .map(str::to_lowercase)
        .filter(|w| !w.contains('\'') && !w.contains('\u{2019}'))
        .filter(|w| !is_stopword(w))
        .filter(|w| w.chars().count() > 1 || w.chars().all(|c| c.is_ascii_digit()))
        .map(|w| stem(&w))
        .collect()
}

/// Light suffix stripping. Good enough to equate "worrying"/"worried"/"worries".
pub fn stem(word: &str) -> String {
    let len = word.chars().count();
    if !word.is_ascii() || len <= 3 {
        return word.to_string();
    }
    if let Some(base) = word.strip_suffix("ies").filter(|_| len > 4) {
        return format!("{base}y");
    }
    if let Some(base) = word.strip_suffix("ied").filter(|_| len > 4) {
        return format!("{base}y");
    }
    if let Some(base) = word.strip_suffix("ing").filter(|_| len > 5) {
        return undouble(base);
    }
    if let Some(base) = word.strip_suffix("ed").filter(|_| len > 4) {
        return undouble(base);
    }
    if let Some(base) = word.strip_suffix("ly").filter(|_| len > 5) {
        return base.to_string();
    }
    if let Some(base) = word.strip_suffix("es").filter(|b| len > 4 && ends_with_sibilant(b)) {
        return base.to_string();
    }
    if let Some(base) = word.strip_suffix('s').filter(|b| !b.ends_with('s') && !b.ends_with('u')) {
        return base.to_string();
    }
    word.to_string()
}

fn ends_with_sibilant(base: &str) -> bool {
    ["s", "x", "z", "ch", "sh"].iter().any(|s| base.ends_with(s))
}

// "stopped" -> "stopp" -> "stop"; keeps "ll"/"ss" ("called", "missed").
fn undouble(base: &str) -> String {
    let bytes = base.as_bytes();
    let n = bytes.len();
    if n >= 2 && bytes[n - 1] == bytes[n - 2] && !matches!(bytes[n - 1], b'l' | b's' | b'z') {
        return base[..n - 1].to_string();
    }
    base.to_string()
}

/// Truncate to at most `max_chars` characters on a word boundary, appending "...".
pub fn clip(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    let trimmed = match cut.rfind(char::is_whitespace) {
        Some(idx) if idx > max_chars / 2 => &cut[..idx],
        _ => cut.as_str(),
    };
    format!("{}...", trimmed.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_words_not_punctuation() {
        assert_eq!(word_count("I'm worried -- really worried."), 4);
        assert_eq!(word_count(""), 0);
    }

    #[test]
    fn normalize_collapses_format() {
        assert_eq!(normalize("Thought:  I'm a FAILURE!"), "thought i'm a failure");
    }

    #[test]
    fn content_tokens_drop_stopwords_and_stem() {
        let tokens = content_tokens("I keep worrying that my manager will fire me");
        assert_eq!(tokens, vec!["keep", "worry", "manager", "fire"]);
    }

    #[test]
    fn stem_variants_converge() {
        assert_eq!(stem("worries"), "worry");
        assert_eq!(stem("worried"), "worry");
        assert_eq!(stem("mistakes"), "mistake");
        assert_eq!(stem("stopped"), "stop");
        assert_eq!(stem("boxes"), "box");
        assert_eq!(stem("called"), "call");
        assert_eq!(stem("class"), "class");
        assert_eq!(stem("focus"), "focus");
    }

    #[test]
    fn clip_on_word_boundary() {
        assert_eq!(clip("short", 10), "short");
        assert_eq!(clip("one two three four five", 12), "one two...");
    }
}
