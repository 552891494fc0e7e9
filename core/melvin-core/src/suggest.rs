//! "Did you mean" lookups for misspelled names and keywords.

/// Default similarity a candidate must exceed to be suggested.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.7;

/// Returns the candidate most similar to `name`, if any scores above `threshold`.
///
/// Ties keep the first candidate, so callers should pass candidates in a
/// stable order.
pub fn closest_match<'a, I>(name: &str, candidates: I, threshold: f64) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut best: Option<(f64, &str)> = None;
    for candidate in candidates {
        if candidate == name {
            continue;
        }
        let score = strsim::jaro(candidate, name);
        if score > threshold && best.is_none_or(|(s, _)| score > s) {
            best = Some((score, candidate));
        }
    }
    best.map(|(_, c)| c.to_string())
}
