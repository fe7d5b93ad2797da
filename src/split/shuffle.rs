//! Single shuffle split, optionally stratified by class.
//!
//! The test share is `ceil(test_fraction * n)` samples. Stratified splits
//! allocate the test share across classes proportionally, handing leftover
//! slots to the classes with the largest fractional remainders.

use crate::error::{Error, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::collections::BTreeMap;

/// Split positions `0..n` into sorted `(train, test)` lists.
pub fn train_test_split(
    n: usize,
    classes: Option<&[usize]>,
    test_fraction: f64,
    rng: &mut StdRng,
) -> Result<(Vec<usize>, Vec<usize>)> {
    let n_test = (test_fraction * n as f64).ceil() as usize;
    if n_test == 0 || n_test >= n {
        return Err(Error::config(format!(
            "test fraction {test_fraction} of {n} samples leaves an empty partition"
        )));
    }

    let (mut train, mut test) = match classes {
        None => {
            let mut order: Vec<usize> = (0..n).collect();
            order.shuffle(rng);
            let test = order.split_off(n - n_test);
            (order, test)
        }
        Some(classes) => stratified(classes, n_test, rng)?,
    };
    train.sort_unstable();
    test.sort_unstable();
    Ok((train, test))
}

fn stratified(classes: &[usize], n_test: usize, rng: &mut StdRng) -> Result<(Vec<usize>, Vec<usize>)> {
    let n = classes.len();
    let mut members: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (position, class) in classes.iter().enumerate() {
        members.entry(*class).or_default().push(position);
    }

    if let Some((class, group)) = members.iter().find(|(_, g)| g.len() < 2) {
        return Err(Error::config(format!(
            "stratification class {class} has only {} member; each class needs at least 2 (try fewer bins)",
            group.len()
        )));
    }
    let n_classes = members.len();
    if n_test < n_classes || n - n_test < n_classes {
        return Err(Error::config(format!(
            "cannot stratify {n_classes} classes into a {n_test}/{} split (try fewer bins or a larger partition)",
            n - n_test
        )));
    }

    let counts: Vec<usize> = members.values().map(Vec::len).collect();
    let allocation = approximate_mode(&counts, n_test, rng);

    let mut train = Vec::with_capacity(n - n_test);
    let mut test = Vec::with_capacity(n_test);
    for (mut group, take) in members.into_values().zip(allocation) {
        group.shuffle(rng);
        test.extend_from_slice(&group[..take]);
        train.extend_from_slice(&group[take..]);
    }
    Ok((train, test))
}

/// Proportional integer allocation of `draw` slots over class `counts`.
pub(crate) fn approximate_mode(counts: &[usize], draw: usize, rng: &mut StdRng) -> Vec<usize> {
    let total: usize = counts.iter().sum();
    let continuous: Vec<f64> = counts.iter().map(|&c| c as f64 * draw as f64 / total as f64).collect();
    let mut allocation: Vec<usize> = continuous.iter().map(|c| c.floor() as usize).collect();
    let mut need = draw.saturating_sub(allocation.iter().sum());

    let mut order: Vec<usize> = (0..counts.len()).collect();
    order.shuffle(rng);
    order.sort_by(|&a, &b| {
        let ra = continuous[a] - continuous[a].floor();
        let rb = continuous[b] - continuous[b].floor();
        rb.total_cmp(&ra)
    });
    for class in order.into_iter().cycle().take(counts.len() * 2) {
        if need == 0 {
            break;
        }
        if allocation[class] < counts[class] {
            allocation[class] += 1;
            need -= 1;
        }
    }
    allocation
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;

    #[test]
    fn test_plain_split_sizes() {
        let mut rng = StdRng::seed_from_u64(1);
        let (train, test) = train_test_split(100, None, 0.2, &mut rng).expect("split");
        assert_eq!(test.len(), 20);
        assert_eq!(train.len(), 80);
        assert!(train.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_test_size_rounds_up() {
        let mut rng = StdRng::seed_from_u64(1);
        let (_, test) = train_test_split(11, None, 0.25, &mut rng).expect("split");
        assert_eq!(test.len(), 3);
    }

    #[test]
    fn test_stratified_preserves_proportions() {
        let classes: Vec<usize> = (0..100).map(|i| usize::from(i % 4 == 0)).collect();
        let mut rng = StdRng::seed_from_u64(3);
        let (train, test) = train_test_split(100, Some(&classes), 0.2, &mut rng).expect("split");
        assert_eq!(test.iter().filter(|&&i| classes[i] == 1).count(), 5);
        assert_eq!(train.iter().filter(|&&i| classes[i] == 1).count(), 20);
    }

    #[test]
    fn test_singleton_class_rejected() {
        let classes = vec![0, 0, 0, 0, 1];
        let mut rng = StdRng::seed_from_u64(3);
        assert!(train_test_split(5, Some(&classes), 0.4, &mut rng).unwrap_err().is_config_error());
    }

    #[test]
    fn test_reproducible_with_seed() {
        let a = train_test_split(50, None, 0.3, &mut StdRng::seed_from_u64(8)).expect("split");
        let b = train_test_split(50, None, 0.3, &mut StdRng::seed_from_u64(8)).expect("split");
        assert_eq!(a, b);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_split_is_partition(n in 10usize..300, frac in 0.05f64..0.6, seed in any::<u64>(), k in 1usize..4) {
            let n_test = (frac * n as f64).ceil() as usize;
            prop_assume!(n_test >= k && n - n_test >= k);
            let classes: Vec<usize> = (0..n).map(|i| i % k).collect();
            let mut rng = StdRng::seed_from_u64(seed);
            let (train, test) = train_test_split(n, Some(&classes), frac, &mut rng).expect("split");
            let mut all: Vec<usize> = train.iter().chain(&test).copied().collect();
            all.sort_unstable();
            prop_assert_eq!(all, (0..n).collect::<Vec<_>>());
            prop_assert_eq!(test.len(), n_test);
        }

        #[test]
        fn prop_allocation_sums_to_draw(counts in proptest::collection::vec(1usize..50, 1..8), seed in any::<u64>()) {
            let total: usize = counts.iter().sum();
            let draw = total / 2;
            let allocation = approximate_mode(&counts, draw, &mut StdRng::seed_from_u64(seed));
            prop_assert_eq!(allocation.iter().sum::<usize>(), draw);
            for (a, c) in allocation.iter().zip(&counts) {
                prop_assert!(a <= c);
            }
        }
    }
}
