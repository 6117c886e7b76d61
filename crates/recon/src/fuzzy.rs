//! String similarity scores on a 0..=100 scale.
//!
//! `ratio` is the indel similarity `2 * LCS / (len_a + len_b)`. `partial_ratio`
//! slides the shorter string across the longer one and keeps the best window
//! score, so `"comcast"` against `"comcast cable communications"` scores 100.
//! Both operate on chars and are case-sensitive; callers clean input first.

fn lcs_len(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let mut prev = vec![0usize; b.len() + 1];
    let mut cur = vec![0usize; b.len() + 1];
    for &ca in a {
        for (j, &cb) in b.iter().enumerate() {
            cur[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                cur[j].max(prev[j + 1])
            };
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

fn ratio_chars(a: &[char], b: &[char]) -> u8 {
    let total = a.len() + b.len();
    if total == 0 || a.is_empty() || b.is_empty() {
        return 0;
    }
    let score = 200.0 * lcs_len(a, b) as f64 / total as f64;
    score.round() as u8
}

pub fn ratio(a: &str, b: &str) -> u8 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    ratio_chars(&a, &b)
}

pub fn partial_ratio(a: &str, b: &str) -> u8 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (short, long) = if a.len() <= b.len() { (&a, &b) } else { (&b, &a) };
    if short.is_empty() {
        return 0;
    }
    let mut best = 0;
    for window in long.windows(short.len()) {
        best = best.max(ratio_chars(short, window));
        if best == 100 {
            break;
        }
    }
    best
}

/// Best of the full and partial scores.
pub fn similarity(a: &str, b: &str) -> u8 {
    ratio(a, b).max(partial_ratio(a, b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_strings_score_100() {
        assert_eq!(ratio("comcast", "comcast"), 100);
        assert_eq!(partial_ratio("comcast", "comcast"), 100);
    }

    #[test]
    fn empty_scores_zero() {
        assert_eq!(ratio("", "comcast"), 0);
        assert_eq!(partial_ratio("", "comcast"), 0);
        assert_eq!(similarity("", ""), 0);
    }

    #[test]
    fn ratio_matches_indel_formula() {
        // LCS("kitten", "sitting") = 4, 2*4/13 = 0.615
        assert_eq!(ratio("kitten", "sitting"), 62);
    }

    #[test]
    fn partial_finds_substring() {
        assert_eq!(partial_ratio("comcast", "comcast cable communications"), 100);
        assert!(ratio("comcast", "comcast cable communications") < 50);
    }

    #[test]
    fn unrelated_strings_score_low() {
        assert!(similarity("at&t", "starlink") < 70);
    }

    mod prop {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn bounded_and_symmetric(a in "[a-z &]{0,16}", b in "[a-z &]{0,16}") {
                let r = ratio(&a, &b);
                let p = partial_ratio(&a, &b);
                prop_assert!(r <= 100);
                prop_assert!(p <= 100);
                prop_assert_eq!(r, ratio(&b, &a));
                prop_assert_eq!(similarity(&a, &b), similarity(&b, &a));
            }

            #[test]
            fn self_similarity_is_full(a in "[a-z]{1,16}") {
                prop_assert_eq!(similarity(&a, &a), 100);
            }
        }
    }
}
