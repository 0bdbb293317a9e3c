//! RFC 2782 target ordering.
//!
//! Endpoints are grouped into tiers of equal priority, tiers are emitted in
//! ascending priority, and within each tier members are drawn one at a time
//! with probability proportional to their weight. Members of weight zero are
//! only drawn once every remaining member of the tier has weight zero, at
//! which point the draw is uniform.

use rand::Rng;

use crate::Endpoint;

/// Order `candidates` for use, drawing intra-tier order from the thread RNG.
pub fn rank(candidates: Vec<Endpoint>) -> Vec<Endpoint> {
    rank_with_rng(candidates, &mut rand::thread_rng())
}

/// Order `candidates` for use, drawing intra-tier order from `rng`.
pub fn rank_with_rng<R: Rng + ?Sized>(mut candidates: Vec<Endpoint>, rng: &mut R) -> Vec<Endpoint> {
    // Staging order only; the weighted draw below decides the final order.
    candidates.sort_by_key(|ep| (ep.priority, ep.weight));

    for tier in candidates.chunk_by_mut(|a, b| a.priority == b.priority) {
        shuffle_by_weight(tier, rng);
    }
    candidates
}

/// Weighted permutation of a single tier, in place.
///
/// Position `next` is the output cursor: everything before it has been drawn,
/// everything from it on is still in the pool. A drawn member is swapped to the
/// cursor and its weight leaves the pool total.
fn shuffle_by_weight<R: Rng + ?Sized>(tier: &mut [Endpoint], rng: &mut R) {
    let mut sum: u64 = tier.iter().map(|ep| u64::from(ep.weight)).sum();

    for next in 0..tier.len().saturating_sub(1) {
        let pool = &tier[next..];
        let picked = if sum == 0 {
            rng.gen_range(0..pool.len())
        } else {
            let r = rng.gen_range(0..sum);
            let mut running = 0u64;
            pool.iter()
                .position(|ep| {
                    running += u64::from(ep.weight);
                    running > r
                })
                .unwrap_or(0)
        };

        tier.swap(next, next + picked);
        sum -= u64::from(tier[next].weight);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rand::{rngs::StdRng, SeedableRng};

    use super::*;

    fn ep(host: &str, priority: u16, weight: u16) -> Endpoint {
        Endpoint::new(host, 53, priority, weight)
    }

    fn hosts(eps: &[Endpoint]) -> Vec<&str> {
        eps.iter().map(|e| e.host.as_str()).collect()
    }

    #[test]
    fn empty_input() {
        assert!(rank(Vec::new()).is_empty());
    }

    #[test]
    fn single_member_tier_untouched() {
        let ranked = rank(vec![ep("c", 30, 0), ep("a", 10, 7), ep("b", 20, 0)]);
        assert_eq!(hosts(&ranked), ["a", "b", "c"]);
        assert_eq!(ranked[0].weight, 7);
    }

    #[test]
    fn sorted_by_priority() {
        let mut rng = StdRng::seed_from_u64(7);
        let input = vec![
            ep("a", 5, 10),
            ep("b", 1, 0),
            ep("c", 3, 3),
            ep("d", 1, 50),
            ep("e", 5, 0),
            ep("f", 3, 3),
            ep("g", 0, 1),
        ];

        for _ in 0..200 {
            let ranked = rank_with_rng(input.clone(), &mut rng);
            assert_eq!(ranked.len(), input.len());
            assert!(ranked.windows(2).all(|w| w[0].priority <= w[1].priority));
        }
    }

    #[test]
    fn tier_boundaries_are_stable() {
        let mut rng = StdRng::seed_from_u64(11);
        let input = vec![ep("a", 2, 1), ep("b", 1, 1), ep("c", 2, 1), ep("d", 1, 1)];

        for _ in 0..100 {
            let ranked = rank_with_rng(input.clone(), &mut rng);
            let mut first = hosts(&ranked[..2]);
            let mut second = hosts(&ranked[2..]);
            first.sort_unstable();
            second.sort_unstable();
            assert_eq!(first, ["b", "d"]);
            assert_eq!(second, ["a", "c"]);
        }
    }

    #[test]
    fn zero_weight_drawn_last() {
        let mut rng = StdRng::seed_from_u64(3);
        let input = vec![ep("zero", 1, 0), ep("x", 1, 1), ep("y", 1, 4)];

        for _ in 0..500 {
            let ranked = rank_with_rng(input.clone(), &mut rng);
            assert_eq!(ranked[2].host, "zero");
        }
    }

    #[test]
    fn first_pick_proportional_to_weight() {
        let mut rng = StdRng::seed_from_u64(42);
        let input = vec![ep("light", 1, 10), ep("heavy", 1, 30), ep("mid", 1, 20)];
        let trials = 60_000;

        let mut firsts: HashMap<String, u32> = HashMap::new();
        for _ in 0..trials {
            let ranked = rank_with_rng(input.clone(), &mut rng);
            *firsts.entry(ranked[0].host.clone()).or_default() += 1;
        }

        let share = |h: &str| f64::from(firsts[h]) / f64::from(trials);
        assert!((share("light") - 1.0 / 6.0).abs() < 0.02, "light={}", share("light"));
        assert!((share("mid") - 2.0 / 6.0).abs() < 0.02, "mid={}", share("mid"));
        assert!((share("heavy") - 3.0 / 6.0).abs() < 0.02, "heavy={}", share("heavy"));
    }

    #[test]
    fn all_zero_weight_is_uniform() {
        let mut rng = StdRng::seed_from_u64(99);
        let input = vec![ep("a", 4, 0), ep("b", 4, 0), ep("c", 4, 0)];
        let trials = 30_000;

        let mut orders: HashMap<Vec<String>, u32> = HashMap::new();
        for _ in 0..trials {
            let ranked = rank_with_rng(input.clone(), &mut rng);
            let order = ranked.into_iter().map(|e| e.host).collect();
            *orders.entry(order).or_default() += 1;
        }

        // Every one of the 3! permutations shows up about equally often.
        assert_eq!(orders.len(), 6);
        for (order, count) in &orders {
            let share = f64::from(*count) / f64::from(trials);
            assert!((share - 1.0 / 6.0).abs() < 0.02, "{order:?} share {share}");
        }
    }

    #[test]
    fn max_weights_do_not_overflow() {
        let input = vec![ep("a", 1, u16::MAX), ep("b", 1, u16::MAX), ep("c", 1, u16::MAX)];
        let ranked = rank(input);
        let mut got = hosts(&ranked);
        got.sort_unstable();
        assert_eq!(got, ["a", "b", "c"]);
    }
}
