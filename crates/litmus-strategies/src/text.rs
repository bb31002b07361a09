//! Answer normalisation and string similarity shared by the matchers.

use regex::Regex;
use std::sync::OnceLock;

/// SQuAD-style normalisation: lowercase, punctuation stripped, articles
/// dropped, whitespace collapsed.
pub fn normalize_answer(s: &str) -> String {
    let lowered: String = s
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();
    lowered
        .split_whitespace()
        .filter(|w| !matches!(*w, "a" | "an" | "the"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normalised Levenshtein similarity over characters, in [0, 1].
pub fn char_similarity(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(a, b)
}

/// Edit-distance similarity over whitespace tokens, in [0, 1].
pub fn token_similarity(a: &str, b: &str) -> f64 {
    let ta: Vec<&str> = a.split_whitespace().collect();
    let tb: Vec<&str> = b.split_whitespace().collect();
    let longest = ta.len().max(tb.len());
    if longest == 0 {
        return 1.0;
    }
    let d = strsim::generic_levenshtein(&ta, &tb);
    1.0 - d as f64 / longest as f64
}

/// Token-overlap F1 between two normalised answers.
pub fn token_f1(prediction: &str, truth: &str) -> f64 {
    let p: Vec<String> = normalize_answer(prediction)
        .split_whitespace()
        .map(str::to_string)
        .collect();
    let t: Vec<String> = normalize_answer(truth)
        .split_whitespace()
        .map(str::to_string)
        .collect();
    if p.is_empty() || t.is_empty() {
        return if p == t { 1.0 } else { 0.0 };
    }
    let mut remaining = t.clone();
    let mut common = 0usize;
    for tok in &p {
        if let Some(i) = remaining.iter().position(|x| x == tok) {
            remaining.swap_remove(i);
            common += 1;
        }
    }
    if common == 0 {
        return 0.0;
    }
    let precision = common as f64 / p.len() as f64;
    let recall = common as f64 / t.len() as f64;
    2.0 * precision * recall / (precision + recall)
}

/// First decimal number in `text`.
pub fn first_number(text: &str) -> Option<f64> {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-?\d+(?:\.\d+)?").unwrap())
        .find(text)
        .and_then(|m| m.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalisation_matches_squad_rules() {
        assert_eq!(normalize_answer("  The  Eiffel Tower! "), "eiffel tower");
        assert_eq!(normalize_answer("An apple, a day"), "apple day");
    }

    #[test]
    fn similarities_are_bounded() {
        assert_eq!(char_similarity("abc", "abc"), 1.0);
        assert!(char_similarity("kitten", "sitting") < 1.0);
        assert_eq!(token_similarity("the cat sat", "the cat sat"), 1.0);
        assert!((token_similarity("the cat sat", "the dog sat") - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(token_similarity("", ""), 1.0);
    }

    #[test]
    fn token_f1_partial_overlap() {
        assert_eq!(token_f1("Paris", "paris"), 1.0);
        assert!((token_f1("Paris France", "Paris") - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(token_f1("London", "Paris"), 0.0);
    }

    #[test]
    fn number_extraction() {
        assert_eq!(first_number("I'd say 72.5 out of 100"), Some(72.5));
        assert_eq!(first_number("none"), None);
        assert_eq!(first_number("score: -3 then 9"), Some(-3.0));
    }
}
