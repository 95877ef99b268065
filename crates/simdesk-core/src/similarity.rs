//! Case-insensitive Sørensen–Dice similarity over character n-grams.

use std::collections::HashMap;

/// Score two strings in `[0, 1]` using n-grams of `ngram_len` chars.
///
/// Shared n-grams are counted as a multiset: each n-gram in `b` consumes
/// at most one matching occurrence from `a`. Strings equal after
/// lowercasing always score 1.0; otherwise a string shorter than
/// `ngram_len` scores 0.
pub fn dice(a: &str, b: &str, ngram_len: usize) -> f64 {
    let n = ngram_len.max(1);
    let a: Vec<char> = a.to_lowercase().chars().collect();
    let b: Vec<char> = b.to_lowercase().chars().collect();

    if a == b {
        return 1.0;
    }
    if a.len() < n || b.len() < n {
        return 0.0;
    }

    let mut counts: HashMap<&[char], usize> = HashMap::new();
    for gram in a.windows(n) {
        *counts.entry(gram).or_insert(0) += 1;
    }

    let mut shared = 0usize;
    for gram in b.windows(n) {
        if let Some(count) = counts.get_mut(gram) {
            if *count > 0 {
                *count -= 1;
                shared += 1;
            }
        }
    }

    let total = a.len() + b.len() - 2 * (n - 1);
    (2 * shared) as f64 / total as f64
}
