// ============================================================
// Layer 5 — Weighted KNN Monitor
// ============================================================
// Measures representation quality without training a classifier:
//
//   1. embed every training image (memory bank), L2-normalised
//   2. embed every validation image (queries), L2-normalised
//   3. cosine similarity of each query to the whole bank
//   4. the k most similar bank entries vote for their label,
//      each vote weighted by exp(similarity / T)
//   5. accuracy = share of queries whose top-voted label is right
//
// Runs on the inner (non-autodiff) backend; similarities are
// computed with one matmul per query batch, the voting in
// plain Rust.
//
// Reference: Wu et al. (2018) Instance Discrimination, §3.4

use anyhow::{ensure, Result};
use burn::prelude::*;

use crate::data::{batcher::EvalBatch, loader::BatchLoader};
use crate::ml::{loss::l2_normalize, model::ContrastiveModel};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KnnParams {
    pub k:           usize,
    pub temperature: f64,
    pub num_classes: usize,
}

/// Label chosen by the weighted vote of the `k` most similar bank entries.
/// `similarities[j]` is the query's similarity to bank entry `j`.
pub fn knn_vote(similarities: &[f32], bank_labels: &[usize], params: &KnnParams) -> usize {
    let k = params.k.min(similarities.len());
    if k == 0 {
        return 0;
    }

    let mut order: Vec<usize> = (0..similarities.len()).collect();
    // Only the top-k need to be in front, their internal order doesn't matter
    order.select_nth_unstable_by(k - 1, |&a, &b| similarities[b].total_cmp(&similarities[a]));

    let mut scores = vec![0.0f64; params.num_classes.max(1)];
    for &j in &order[..k] {
        let label = bank_labels[j];
        if label < scores.len() {
            scores[label] += (similarities[j] as f64 / params.temperature).exp();
        }
    }

    scores
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(label, _)| label)
        .unwrap_or(0)
}

/// Normalised embeddings of every image a loader yields
fn embed_all<B: Backend>(
    model:  &ContrastiveModel<B>,
    loader: &BatchLoader<EvalBatch<B>>,
) -> (Vec<Tensor<B, 2>>, Vec<usize>) {
    let mut features = Vec::with_capacity(loader.num_batches());
    let mut labels   = Vec::with_capacity(loader.num_items());
    for batch in loader.iter() {
        features.push(l2_normalize(model.embed(batch.images)));
        labels.extend(batch.labels);
    }
    (features, labels)
}

/// KNN top-1 accuracy in percent of `val_loader` against `memory_loader`
pub fn validate_knn<B: Backend>(
    model:         &ContrastiveModel<B>,
    memory_loader: &BatchLoader<EvalBatch<B>>,
    val_loader:    &BatchLoader<EvalBatch<B>>,
    params:        &KnnParams,
) -> Result<f64> {
    let (bank_parts, bank_labels) = embed_all(model, memory_loader);
    ensure!(!bank_parts.is_empty(), "KNN memory bank is empty");
    // [D, M], transposed once for every query batch
    let bank_t = Tensor::cat(bank_parts, 0).transpose();
    let bank_size = bank_labels.len();

    let mut correct = 0usize;
    let mut total   = 0usize;
    for batch in val_loader.iter() {
        let queries = l2_normalize(model.embed(batch.images));
        let sims: Vec<f32> = queries
            .matmul(bank_t.clone())
            .into_data()
            .convert::<f32>()
            .to_vec()
            .map_err(|e| anyhow::anyhow!("Cannot read similarities: {e:?}"))?;

        for (row, &label) in sims.chunks(bank_size).zip(batch.labels.iter()) {
            if knn_vote(row, &bank_labels, params) == label {
                correct += 1;
            }
            total += 1;
        }
    }

    ensure!(total > 0, "KNN validation set is empty");
    Ok(100.0 * correct as f64 / total as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(k: usize) -> KnnParams {
        KnnParams { k, temperature: 0.1, num_classes: 3 }
    }

    #[test]
    fn nearest_neighbour_wins_with_k_one() {
        let sims   = [0.1, 0.9, 0.3];
        let labels = [0, 2, 1];
        assert_eq!(knn_vote(&sims, &labels, &params(1)), 2);
    }

    #[test]
    fn majority_of_top_k_outvotes_a_single_closer_entry() {
        let sims   = [0.90, 0.85, 0.84, -0.5];
        let labels = [0, 1, 1, 0];
        assert_eq!(knn_vote(&sims, &labels, &params(3)), 1);
    }

    #[test]
    fn low_temperature_lets_similarity_dominate() {
        let sims   = [0.99, 0.50, 0.50];
        let labels = [0, 1, 1];
        let sharp  = KnnParams { k: 3, temperature: 0.01, num_classes: 2 };
        assert_eq!(knn_vote(&sims, &labels, &sharp), 0);
    }

    #[test]
    fn k_larger_than_the_bank_is_clamped() {
        assert_eq!(knn_vote(&[0.2, 0.4], &[1, 1], &params(200)), 1);
        assert_eq!(knn_vote(&[], &[], &params(5)), 0);
    }
}
