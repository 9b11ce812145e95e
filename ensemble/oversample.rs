//! Seeded random oversampling of the minority class.

use ndarray::ArrayView1;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Returns row indices of a class-balanced resample of `target`.
///
/// Every original row appears once, then minority rows are drawn with
/// replacement until both classes have the majority count. Indices are ordered
/// original rows first, draws after. A single-class target is returned as is.
pub fn random_oversample(target: ArrayView1<f64>, seed: u64) -> Vec<usize> {
    let (positives, negatives): (Vec<usize>, Vec<usize>) =
        (0..target.len()).partition(|&i| target[i] == 1.0);
    let mut indices: Vec<usize> = (0..target.len()).collect();
    if positives.is_empty() || negatives.is_empty() {
        log::warn!("Oversampling skipped: the training target contains a single class.");
        return indices;
    }

    let (minority, deficit) = if positives.len() < negatives.len() {
        (&positives, negatives.len() - positives.len())
    } else {
        (&negatives, positives.len() - negatives.len())
    };
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    indices.extend((0..deficit).map(|_| minority[rng.gen_range(0..minority.len())]));
    log::info!(
        "Oversampled {} minority rows ({} positives, {} negatives before)",
        deficit,
        positives.len(),
        negatives.len()
    );
    indices
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn classes_are_balanced_and_originals_kept() {
        let target = array![0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0];
        let indices = random_oversample(target.view(), 42);
        assert_eq!(indices.len(), 10);
        assert_eq!(&indices[..7], &[0, 1, 2, 3, 4, 5, 6]);
        let positives = indices.iter().filter(|&&i| target[i] == 1.0).count();
        assert_eq!(positives, 5);
    }

    #[test]
    fn same_seed_gives_same_draws() {
        let target = array![1.0, 0.0, 0.0, 0.0, 0.0];
        assert_eq!(
            random_oversample(target.view(), 7),
            random_oversample(target.view(), 7)
        );
    }

    #[test]
    fn single_class_is_left_alone() {
        let target = array![0.0, 0.0];
        assert_eq!(random_oversample(target.view(), 1), vec![0, 1]);
    }
}
