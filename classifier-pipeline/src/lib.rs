//! Naive-Bayes / chi-square classifier pipeline.
//!
//! Pure numeric functions over [`classifier_core::Pool`],
//! [`classifier_core::Clue`] and [`classifier_core::Item`]: probability
//! estimation with bias, clue-list precomputation, clue selection, and
//! Fisher's-method chi-square combination. `classifier-tagger` calls
//! into these from the `Tagger` state machine; none of this module
//! mutates a `Tagger` directly.

use classifier_core::{Clue, ClueList, Item, PipelineError, Pool};

/// Unknown-word prior probability (`X` in the probability formula).
pub const UNKNOWN_WORD_PROB: f64 = 0.5;

/// Unknown-word strength (`S` in the probability formula).
pub const UNKNOWN_WORD_STRENGTH: f64 = 0.45;

const S_TIMES_X: f64 = UNKNOWN_WORD_STRENGTH * UNKNOWN_WORD_PROB;

/// Minimum clue strength to survive selection.
pub const MIN_PROB_STRENGTH: f64 = 0.1;

/// Floor on the number of clues kept for classification.
pub const MAX_DISCRIMINATORS: usize = 150;

/// Fraction of an item's distinct tokens that may additionally be kept
/// as clues beyond [`MAX_DISCRIMINATORS`].
pub const MAX_CLUES_RATIO: f64 = 0.5;

/// Underflow threshold below which `chi2_combine`'s running products
/// are rescaled via a mantissa/exponent split.
const TINY_VAL: f64 = 1e-200;

// ============================================================================
// PROBABILITY ESTIMATION
// ============================================================================

/// One pool's contribution to a probability estimate: how many times
/// the token occurred in that pool, and the pool's (possibly
/// bias-adjusted) total size.
#[derive(Debug, Clone, Copy)]
pub struct ProbToken {
    pub token_count: u64,
    pub pool_size: f64,
}

fn compute_ratios(tokens: &[ProbToken]) -> Vec<f64> {
    tokens
        .iter()
        .map(|t| {
            if t.pool_size > 0.0 {
                t.token_count as f64 / t.pool_size
            } else {
                0.0
            }
        })
        .collect()
}

fn filtered_average(values: &[f64]) -> f64 {
    let (sum, count) = values
        .iter()
        .filter(|&&v| v > 0.0)
        .fold((0.0, 0u32), |(sum, count), &v| (sum + v, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// N provides a measure of confidence in a probability estimate for a
/// token: each token count weighted by the size of the opposite pools,
/// divided by the size of the pool the count came from.
fn compute_n(
    foregrounds: &[ProbToken],
    backgrounds: &[ProbToken],
    fg_total_tokens: f64,
    bg_total_tokens: f64,
) -> f64 {
    let fg_ns: Vec<f64> = foregrounds
        .iter()
        .map(|t| {
            if t.pool_size > 0.0 {
                t.token_count as f64 * bg_total_tokens / t.pool_size
            } else {
                0.0
            }
        })
        .collect();
    let bg_ns: Vec<f64> = backgrounds
        .iter()
        .map(|t| {
            if t.pool_size > 0.0 {
                t.token_count as f64 * fg_total_tokens / t.pool_size
            } else {
                0.0
            }
        })
        .collect();
    filtered_average(&fg_ns) + filtered_average(&bg_ns)
}

/// Naive-Bayes probability that a token belongs to the foreground
/// pools rather than the background pools, given their relative
/// weight (`fg_total_tokens`/`bg_total_tokens`, already bias-adjusted
/// and truncated to whole tokens by the caller).
pub fn probability(
    foregrounds: &[ProbToken],
    backgrounds: &[ProbToken],
    fg_total_tokens: i64,
    bg_total_tokens: i64,
) -> f64 {
    if fg_total_tokens <= 0 && bg_total_tokens <= 0 {
        return UNKNOWN_WORD_PROB;
    }
    let fg_total = fg_total_tokens.max(1) as f64;
    let bg_total = bg_total_tokens.max(1) as f64;

    let fg_ratio = filtered_average(&compute_ratios(foregrounds));
    let bg_ratio = filtered_average(&compute_ratios(backgrounds));
    if fg_ratio == 0.0 && bg_ratio == 0.0 {
        return UNKNOWN_WORD_PROB;
    }
    let ratio = fg_ratio / (fg_ratio + bg_ratio);
    let n = compute_n(foregrounds, backgrounds, fg_total, bg_total);
    (S_TIMES_X + n * ratio) / (UNKNOWN_WORD_STRENGTH + n)
}

// ============================================================================
// PRECOMPUTE: BUILD A CLUE LIST FROM TRAINED POOLS
// ============================================================================

/// Build a [`ClueList`] from a tagger's trained pools and the item
/// cache's random background, per the naive-Bayes formula above.
/// Walks the background first, then new tokens in the positive pool,
/// then new tokens in the negative pool, so no token is visited twice.
pub fn precompute(positive: &Pool, negative: &Pool, background: &Pool, bias: f64) -> ClueList {
    let mut clues = ClueList::new();

    let fg_pool_size = positive.total_tokens() as f64 / bias;
    let neg_pool_size = negative.total_tokens() as f64 * bias;
    let bg_pool_size = background.total_tokens() as f64 * bias;
    let fg_total_tokens = fg_pool_size as i64;
    let bg_total_tokens = (neg_pool_size + bg_pool_size) as i64;

    let prob_for = |fg_count: u64, neg_count: u64, bg_count: u64| -> f64 {
        let fg = ProbToken { token_count: fg_count, pool_size: fg_pool_size };
        let neg = ProbToken { token_count: neg_count, pool_size: neg_pool_size };
        let bgt = ProbToken { token_count: bg_count, pool_size: bg_pool_size };
        probability(&[fg], &[neg, bgt], fg_total_tokens, bg_total_tokens)
    };

    for (token_id, freq) in background.tokens() {
        let prob = prob_for(
            positive.token_frequency(token_id),
            negative.token_frequency(token_id),
            freq,
        );
        clues.add_clue(token_id, prob);
    }
    for (token_id, freq) in positive.tokens() {
        if clues.get_clue(token_id).is_some() {
            continue;
        }
        let prob = prob_for(
            freq,
            negative.token_frequency(token_id),
            background.token_frequency(token_id),
        );
        clues.add_clue(token_id, prob);
    }
    for (token_id, freq) in negative.tokens() {
        if clues.get_clue(token_id).is_some() {
            continue;
        }
        let prob = prob_for(
            positive.token_frequency(token_id),
            freq,
            background.token_frequency(token_id),
        );
        clues.add_clue(token_id, prob);
    }

    clues
}

// ============================================================================
// CLUE SELECTION
// ============================================================================

/// Select the clues to classify `item` with: tokens present in both
/// the item and the clue list whose strength is at least
/// [`MIN_PROB_STRENGTH`], sorted by descending strength (ties keep
/// ascending token-id order, matching iteration order), capped at
/// `max(MAX_DISCRIMINATORS, MAX_CLUES_RATIO * item.num_distinct_tokens())`.
pub fn select_clues<'a>(clues: &'a ClueList, item: &Item) -> Vec<&'a Clue> {
    let max_clues = ((MAX_CLUES_RATIO * item.num_distinct_tokens() as f64) as usize)
        .max(MAX_DISCRIMINATORS);

    let mut selected: Vec<&Clue> = item
        .tokens()
        .filter_map(|(id, _)| clues.get_clue(id))
        .filter(|clue| clue.strength() >= MIN_PROB_STRENGTH)
        .collect();

    selected.sort_by(|a, b| b.strength().partial_cmp(&a.strength()).unwrap());
    selected.truncate(max_clues);
    selected
}

// ============================================================================
// CHI-SQUARE COMBINATION
// ============================================================================

/// `frexp`-equivalent split of `x` into mantissa `m` (with
/// `0.5 <= |m| < 1.0`) and exponent `e` such that `x == m * 2^e`.
/// `std` has no `frexp`; this reconstructs it from the IEEE-754 bit
/// layout rather than pulling in a libm binding.
fn frexp(x: f64) -> (f64, i32) {
    if x == 0.0 || !x.is_finite() {
        return (x, 0);
    }
    let bits = x.to_bits();
    let exponent_field = ((bits >> 52) & 0x7ff) as i32;
    if exponent_field == 0 {
        // Subnormal: scale up into normal range before recursing.
        let (m, e) = frexp(x * 2f64.powi(54));
        return (m, e - 54);
    }
    let sign = bits & 0x8000_0000_0000_0000;
    let mantissa_bits = bits & 0x000f_ffff_ffff_ffff;
    let new_bits = sign | (1022u64 << 52) | mantissa_bits;
    (f64::from_bits(new_bits), exponent_field - 1022)
}

/// Upper-tail chi-square survival function: P(X >= x2) for `v` degrees
/// of freedom. `v` must be even and positive; returns -1.0 otherwise.
pub fn chi2q(x2: f64, v: i32) -> f64 {
    if v <= 0 || v % 2 != 0 {
        return -1.0;
    }
    let m = x2 / 2.0;
    let max_i = v / 2;
    let mut sum = (-m).exp();
    let mut term = sum;
    for i in 1..=max_i {
        term *= m / i as f64;
        sum += term;
    }
    sum.min(1.0)
}

/// Combine clue probabilities via Fisher's method with a chi-square
/// test, reproducing the manual underflow-avoidance split described
/// in the probability pipeline's design notes.
pub fn chi2_combine(probabilities: &[f64]) -> f64 {
    let mut h = 1.0f64;
    let mut s = 1.0f64;
    let mut h_exp = 0i32;
    let mut s_exp = 0i32;

    for &p in probabilities {
        s *= 1.0 - p;
        h *= p;

        if s < TINY_VAL {
            let (m, e) = frexp(s);
            s = m;
            s_exp += e;
        }
        if h < TINY_VAL {
            let (m, e) = frexp(h);
            h = m;
            h_exp += e;
        }
    }

    let s_log = s.ln() + s_exp as f64 * std::f64::consts::LN_2;
    let h_log = h.ln() + h_exp as f64 * std::f64::consts::LN_2;
    let n = probabilities.len() as i32;

    let s_final = 1.0 - chi2q(-2.0 * s_log, n * 2);
    let h_final = 1.0 - chi2q(-2.0 * h_log, n * 2);
    (s_final - h_final + 1.0) / 2.0
}

/// Classify `item` against a precomputed clue list, returning a
/// strength in [0, 1]. Returns [`UNKNOWN_WORD_PROB`] if no clue
/// survives selection.
pub fn classify(clues: &ClueList, item: &Item) -> f64 {
    let selected = select_clues(clues, item);
    if selected.is_empty() {
        return UNKNOWN_WORD_PROB;
    }
    let probs: Vec<f64> = selected.iter().map(|c| c.probability()).collect();
    chi2_combine(&probs)
}

/// Validate a raw (x2, v) chi-square query before calling [`chi2q`],
/// returning a typed error instead of the sentinel -1.0 where a caller
/// wants to propagate a `Result`.
pub fn chi2q_checked(x2: f64, v: i32) -> Result<f64, PipelineError> {
    let result = chi2q(x2, v);
    if result < 0.0 {
        Err(PipelineError::InvalidChiSquareInput { v, x2 })
    } else {
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn pool_from(tokens: &[(u32, u32)]) -> Pool {
        let mut item = Item::new("urn:test", Utc::now());
        for &(id, freq) in tokens {
            item.add_token(id, freq);
        }
        let mut pool = Pool::new();
        pool.add_item(&item);
        pool
    }

    fn item_from(tokens: &[(u32, u32)]) -> Item {
        let mut item = Item::new("urn:test-item", Utc::now());
        for &(id, freq) in tokens {
            item.add_token(id, freq);
        }
        item
    }

    #[test]
    fn probability_with_bias_one() {
        let positive = pool_from(&[(1, 5), (2, 15)]);
        let negative = pool_from(&[(1, 5), (2, 5)]);
        let background = Pool::new();
        let clues = precompute(&positive, &negative, &background, 1.0);
        let prob = clues.get_clue(1).unwrap().probability();
        assert!((prob - 0.33912483912).abs() < 1e-6, "got {prob}");
    }

    #[test]
    fn probability_with_bias_eleven_tenths() {
        let positive = pool_from(&[(1, 5), (2, 15)]);
        let negative = pool_from(&[(1, 5), (2, 5)]);
        let background = Pool::new();
        let clues = precompute(&positive, &negative, &background, 1.1);
        let prob = clues.get_clue(1).unwrap().probability();
        assert!((prob - 0.383957).abs() < 1e-6, "got {prob}");
    }

    fn clue_list(pairs: &[(u32, f64)]) -> ClueList {
        let mut clues = ClueList::new();
        for &(id, p) in pairs {
            clues.add_clue(id, p);
        }
        clues
    }

    #[test]
    fn classify_combines_four_clues() {
        let clues = clue_list(&[(1, 0.75), (2, 0.51), (3, 0.1), (4, 0.95)]);
        let item = item_from(&[(1, 1), (2, 1), (3, 1), (4, 1)]);
        let strength = classify(&clues, &item);
        assert!((strength - 0.69125149517).abs() < 1e-6, "got {strength}");
    }

    #[test]
    fn classify_with_no_surviving_clues_is_unknown_prior() {
        let clues = clue_list(&[(1, 0.75), (2, 0.51), (3, 0.1), (4, 0.95)]);
        let item = item_from(&[(10, 10)]);
        assert_eq!(classify(&clues, &item), 0.5);
    }

    #[test]
    fn classify_single_surviving_clue() {
        let clues = clue_list(&[(1, 0.75), (2, 0.51), (3, 0.1), (4, 0.95)]);
        let item = item_from(&[(4, 1)]);
        let strength = classify(&clues, &item);
        assert!((strength - 0.89947100800).abs() < 1e-6, "got {strength}");
    }

    #[test]
    fn select_clues_filters_by_strength_threshold() {
        let clues = clue_list(&[(1, 0.75), (2, 0.51), (3, 0.1), (4, 0.95)]);
        let item = item_from(&[(1, 1), (2, 1)]);
        let selected = select_clues(&clues, &item);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].token_id(), 1);
    }

    #[test]
    fn select_clues_sorts_descending_by_strength() {
        let clues = clue_list(&[(1, 0.75), (2, 0.51), (3, 0.1), (4, 0.95)]);
        let item = item_from(&[(1, 1), (2, 1), (4, 1)]);
        let selected = select_clues(&clues, &item);
        let ids: Vec<u32> = selected.iter().map(|c| c.token_id()).collect();
        assert_eq!(ids, vec![4, 1]);
    }

    #[test]
    fn chi2q_rejects_odd_degrees_of_freedom() {
        assert_eq!(chi2q(10.0, 11), -1.0);
    }

    #[test]
    fn chi2q_rejects_non_positive_degrees_of_freedom() {
        assert_eq!(chi2q(10.0, 0), -1.0);
    }

    #[test]
    fn chi2q_saturates_at_one() {
        assert_eq!(chi2q(100.0, 300), 1.0);
    }

    #[test]
    fn chi2q_saturates_at_zero() {
        assert!(chi2q(1000.0, 300) < 1e-9);
    }

    #[test]
    fn chi2q_matches_pinned_value() {
        let q = chi2q(375.0, 400);
        assert!((q - 0.82913752732).abs() < 1e-6, "got {q}");
    }

    #[test]
    fn chi2q_checked_surfaces_typed_error() {
        let err = chi2q_checked(10.0, 11).unwrap_err();
        assert_eq!(err, PipelineError::InvalidChiSquareInput { v: 11, x2: 10.0 });
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn chi2q_is_always_in_unit_interval_or_sentinel(x2 in 0.0f64..2000.0, dof in 1i32..500) {
            let v = dof * 2;
            let q = chi2q(x2, v);
            prop_assert!(q == -1.0 || (0.0..=1.0).contains(&q));
        }

        #[test]
        fn chi2_combine_of_uniform_probabilities_is_in_unit_interval(
            p in 0.001f64..0.999, n in 1usize..20
        ) {
            let probs = vec![p; n];
            let combined = chi2_combine(&probs);
            prop_assert!((0.0..=1.0).contains(&combined));
        }

        #[test]
        fn probability_is_always_in_unit_interval(
            fg_count in 0u64..1000, fg_pool in 1.0f64..10000.0,
            neg_count in 0u64..1000, neg_pool in 1.0f64..10000.0,
            bg_count in 0u64..1000, bg_pool in 1.0f64..10000.0,
        ) {
            let fg = ProbToken { token_count: fg_count, pool_size: fg_pool };
            let neg = ProbToken { token_count: neg_count, pool_size: neg_pool };
            let bgt = ProbToken { token_count: bg_count, pool_size: bg_pool };
            let p = probability(&[fg], &[neg, bgt], fg_pool as i64, (neg_pool + bg_pool) as i64);
            prop_assert!((0.0..=1.0).contains(&p));
        }
    }
}
