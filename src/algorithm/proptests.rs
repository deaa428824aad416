//! Property-based tests for PSI variants
//!
//! Tests for:
//! - Exactness: DH result equals the plain set intersection
//! - Soundness: every result is a subset of the local set
//! - Order independence: input permutation never changes the result
//! - Completeness: the Bloom variant never misses a true match

use super::{new_algorithm, AlgorithmConfig, AlgorithmKind, PsiAlgorithm, PsiPayload};
use crate::types::{Identifier, IntersectionResult, PrivateSet};
use proptest::prelude::*;
use std::collections::BTreeSet;

fn to_set(values: &BTreeSet<String>) -> PrivateSet {
    values.iter().cloned().map(Identifier::from).collect()
}

fn exchange(
    kind: AlgorithmKind,
    a: &PrivateSet,
    b: &PrivateSet,
) -> (IntersectionResult, IntersectionResult) {
    let config = AlgorithmConfig::new(kind);
    let mut psi_a: Box<dyn PsiAlgorithm> = new_algorithm(&config).unwrap();
    let mut psi_b: Box<dyn PsiAlgorithm> = new_algorithm(&config).unwrap();

    let mut from_a: Vec<PsiPayload> = vec![psi_a.propose(a).unwrap()];
    let mut from_b: Vec<PsiPayload> = vec![psi_b.propose(b).unwrap()];

    for round in 0..psi_a.rounds() {
        let reply_a = psi_a.respond(round, &from_b[round as usize]).unwrap();
        let reply_b = psi_b.respond(round, &from_a[round as usize]).unwrap();
        if let Some(reply) = reply_a {
            from_a.push(reply);
        }
        if let Some(reply) = reply_b {
            from_b.push(reply);
        }
    }

    (
        psi_a.finalize_intersection(&from_b).unwrap(),
        psi_b.finalize_intersection(&from_a).unwrap(),
    )
}

fn expected(a: &BTreeSet<String>, b: &BTreeSet<String>) -> IntersectionResult {
    a.intersection(b).cloned().map(Identifier::from).collect()
}

fn token_sets() -> impl Strategy<Value = (BTreeSet<String>, BTreeSet<String>)> {
    // Small alphabet so overlaps are common
    (
        prop::collection::btree_set("[a-f][0-9]", 0..12),
        prop::collection::btree_set("[a-f][0-9]", 0..12),
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: DH exactness
    /// For all finite A, B the computed intersection equals A ∩ B on both sides
    #[test]
    fn dh_result_equals_set_intersection((a, b) in token_sets()) {
        let (res_a, res_b) = exchange(AlgorithmKind::DhDoubleMask, &to_set(&a), &to_set(&b));
        let want = expected(&a, &b);

        prop_assert_eq!(&res_a, &want);
        prop_assert_eq!(&res_b, &want);
    }

    /// Property: Soundness
    /// IntersectionResult ⊆ PrivateSet for every participant
    #[test]
    fn results_are_subsets_of_local_sets((a, b) in token_sets()) {
        for kind in [AlgorithmKind::DhDoubleMask, AlgorithmKind::BloomFilter] {
            let set_a = to_set(&a);
            let set_b = to_set(&b);
            let (res_a, res_b) = exchange(kind, &set_a, &set_b);

            prop_assert!(res_a.is_subset_of(&set_a));
            prop_assert!(res_b.is_subset_of(&set_b));
        }
    }

    /// Property: Order independence
    /// Building the set from a permuted list gives the same result
    #[test]
    fn permuted_input_gives_same_result(
        (a, b) in token_sets(),
        seed in any::<u64>(),
    ) {
        use rand::seq::SliceRandom;
        use rand::SeedableRng;

        let mut shuffled: Vec<String> = a.iter().cloned().collect();
        shuffled.shuffle(&mut rand::rngs::StdRng::seed_from_u64(seed));
        let permuted: PrivateSet = shuffled.into_iter().map(Identifier::from).collect();

        let (original, _) = exchange(AlgorithmKind::DhDoubleMask, &to_set(&a), &to_set(&b));
        let (reordered, _) = exchange(AlgorithmKind::DhDoubleMask, &permuted, &to_set(&b));

        prop_assert_eq!(original, reordered);
    }

    /// Property: Bloom completeness
    /// The approximate variant never drops a true match
    #[test]
    fn bloom_has_no_false_negatives((a, b) in token_sets()) {
        let (res_a, res_b) = exchange(AlgorithmKind::BloomFilter, &to_set(&a), &to_set(&b));
        let want = expected(&a, &b);

        for id in want.iter() {
            prop_assert!(res_a.contains(id));
            prop_assert!(res_b.contains(id));
        }
    }
}
