//! Keyword extraction shared by the text index and the matching engine.

use std::collections::BTreeSet;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "at", "by", "for", "from", "in", "is", "it", "my", "near", "of", "on", "or", "the",
    "to", "was", "with",
];

/// Lowercased alphanumeric words of at least two characters, minus stopwords.
pub fn tokenize(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 2)
        .map(str::to_lowercase)
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .collect()
}

/// Keywords of an item: title and description together.
pub fn item_terms(title: &str, description: &str) -> BTreeSet<String> {
    let mut terms = tokenize(title);
    terms.extend(tokenize(description));
    terms
}

/// Jaccard similarity of two token sets; 0 when both are empty.
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

const LIKE_ESCAPE: char = '!';

/// Escapes LIKE wildcards so user text matches literally (`ESCAPE '!'`).
pub fn escape_like_pattern(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '%' | '_' | LIKE_ESCAPE) {
            out.push(LIKE_ESCAPE);
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_lowercases_and_drops_noise() {
        let t = tokenize("Black Leather WALLET, lost at the station!");
        let words: Vec<&str> = t.iter().map(String::as_str).collect();
        assert_eq!(words, vec!["black", "leather", "lost", "station", "wallet"]);
    }

    #[test]
    fn tokenize_keeps_unicode_words() {
        let t = tokenize("Schlüssel am Bahnhof");
        assert!(t.contains("schlüssel"));
        assert!(t.contains("bahnhof"));
    }

    #[test]
    fn jaccard_overlap() {
        let a = tokenize("red umbrella");
        let b = tokenize("red umbrella with hook");
        assert!((jaccard(&a, &b) - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(jaccard(&BTreeSet::new(), &BTreeSet::new()), 0.0);
    }

    #[test]
    fn escape_like() {
        assert_eq!(escape_like_pattern("50%_off!"), "50!%!_off!!");
    }
}
