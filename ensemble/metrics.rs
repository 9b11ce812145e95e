//! Diagnostics on predicted probabilities.

use ndarray::ArrayView1;

/// Area under the ROC curve via the rank-sum statistic, with tied scores
/// sharing their average rank. `None` when only one class is present or the
/// two views differ in length.
pub fn roc_auc(scores: ArrayView1<f64>, labels: ArrayView1<f64>) -> Option<f64> {
    let n = scores.len();
    if n != labels.len() {
        return None;
    }
    let positives = labels.iter().filter(|&&y| y == 1.0).count();
    let negatives = n - positives;
    if positives == 0 || negatives == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut positive_rank_sum = 0.0;
    let mut start = 0;
    while start < n {
        let mut end = start;
        while end + 1 < n && scores[order[end + 1]] == scores[order[start]] {
            end += 1;
        }
        // Ranks are 1-based.
        let average_rank = (start + end) as f64 / 2.0 + 1.0;
        for &i in &order[start..=end] {
            if labels[i] == 1.0 {
                positive_rank_sum += average_rank;
            }
        }
        start = end + 1;
    }

    let p = positives as f64;
    Some((positive_rank_sum - p * (p + 1.0) / 2.0) / (p * negatives as f64))
}

/// True when predictions carry no ranking information (constant or non-finite).
pub fn is_degenerate(predictions: ArrayView1<f64>) -> bool {
    if predictions.iter().any(|v| !v.is_finite()) {
        return true;
    }
    let (min, max) = predictions
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    max - min <= 1e-12
}
