//! Jaccard similarity over normalized prompt word sets

use std::collections::HashSet;

/// Lower-case a prompt and strip punctuation down to word tokens
fn normalize(prompt: &str) -> String {
    prompt
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect()
}

/// Jaccard similarity of two prompts' word sets, in [0, 1]
///
/// Word order and repetition are ignored; only vocabulary overlap counts.
pub fn jaccard(a: &str, b: &str) -> f64 {
    let a_norm = normalize(a);
    let b_norm = normalize(b);
    let a_set: HashSet<&str> = a_norm.split_whitespace().collect();
    let b_set: HashSet<&str> = b_norm.split_whitespace().collect();

    if a_set.is_empty() && b_set.is_empty() {
        return 0.0;
    }

    let intersection = a_set.intersection(&b_set).count();
    let union = a_set.union(&b_set).count();
    intersection as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_prompts_score_one() {
        assert!((jaccard("write a roadmap", "write a roadmap") - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn case_and_punctuation_are_ignored() {
        assert!((jaccard("Write a Roadmap!", "write a roadmap") - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn word_order_is_ignored() {
        assert!((jaccard("roadmap a write", "write a roadmap") - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn disjoint_prompts_score_zero() {
        assert!((jaccard("alpha beta", "gamma delta") - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn partial_overlap() {
        // {a, b, c} vs {a, b, d}: 2 shared of 4 distinct
        assert!((jaccard("a b c", "a b d") - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_prompts_score_zero() {
        assert!((jaccard("", "") - 0.0).abs() < f64::EPSILON);
        assert!((jaccard("something", "") - 0.0).abs() < f64::EPSILON);
    }
}
