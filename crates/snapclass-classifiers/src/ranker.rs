//! Top-K ranking of probability vectors

use crate::labels::LabelTable;
use snapclass_core::PredictionEntry;
use std::cmp::Ordering;

/// Sorts probabilities descending and pairs them with labels
pub struct ResultRanker;

impl ResultRanker {
    /// Rank `probabilities` and keep the `k` best entries
    ///
    /// Ties keep their original index order, so the output is deterministic.
    /// NaN values sort after every number. Indices without a label get a
    /// `"Class {i}"` placeholder.
    pub fn rank(probabilities: &[f32], labels: &LabelTable, k: usize) -> Vec<PredictionEntry> {
        let mut order: Vec<usize> = (0..probabilities.len()).collect();
        // sort_by is stable
        order.sort_by(|&a, &b| descending(probabilities[a], probabilities[b]));

        order
            .into_iter()
            .take(k)
            .map(|index| PredictionEntry {
                index,
                label: labels.get(index).into_owned(),
                probability: probabilities[index],
            })
            .collect()
    }
}

fn descending(a: f32, b: f32) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
    }
}
