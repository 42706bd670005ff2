// ============================================================
// Layer 4 — Batch Loader
// ============================================================
// Walks a dataset in the order given by a ShardSampler and
// hands groups of `batch_size` items to a Batcher:
//
//   sampler.indices()  → [17, 3, 42, 8, ...]    (this rank)
//   chunks(batch_size) → [[17, 3], [42, 8], ...]
//   batcher.batch(...) → ContrastiveBatch / EvalBatch
//
// Batches are built lazily while iterating, so a whole epoch
// is never materialised. Training passes go through
// `iter_epoch`, which moves the sampler to that epoch first, so
// a shuffled shard is visited in a new order every epoch.
//
// Reference: Burn Book §4 (Dataloaders)
//            Rust Book §13 (Iterators)

use std::sync::Arc;

use burn::data::{dataloader::batcher::Batcher, dataset::Dataset};

use crate::data::{dataset::ImageItem, sampler::ShardSampler};

pub struct BatchLoader<O> {
    dataset:    Arc<dyn Dataset<ImageItem>>,
    batcher:    Arc<dyn Batcher<ImageItem, O>>,
    sampler:    Arc<ShardSampler>,
    batch_size: usize,
    /// A trailing batch smaller than this is dropped
    min_batch:  usize,
}

impl<O> BatchLoader<O> {
    pub fn new(
        dataset:    Arc<dyn Dataset<ImageItem>>,
        batcher:    Arc<dyn Batcher<ImageItem, O>>,
        sampler:    Arc<ShardSampler>,
        batch_size: usize,
        min_batch:  usize,
    ) -> Self {
        Self { dataset, batcher, sampler, batch_size: batch_size.max(1), min_batch: min_batch.max(1) }
    }

    /// Items this rank visits per epoch, before dropping a short tail
    pub fn num_items(&self) -> usize {
        self.sampler.num_samples()
    }

    pub fn num_batches(&self) -> usize {
        let items = self.num_items();
        let full  = items / self.batch_size;
        let tail  = items % self.batch_size;
        full + usize::from(tail >= self.min_batch)
    }

    /// One pass over this rank's shard in the order of `epoch`
    pub fn iter_epoch(&self, epoch: usize) -> impl Iterator<Item = O> + '_ {
        self.sampler.set_epoch(epoch);
        self.iter()
    }

    /// One pass over this rank's shard for the sampler's current epoch
    pub fn iter(&self) -> impl Iterator<Item = O> + '_ {
        let indices = self.sampler.indices();
        let batches: Vec<Vec<usize>> = indices
            .chunks(self.batch_size)
            .filter(|chunk| chunk.len() >= self.min_batch)
            .map(|chunk| chunk.to_vec())
            .collect();

        batches.into_iter().map(move |chunk| {
            let items: Vec<ImageItem> =
                chunk.into_iter().filter_map(|i| self.dataset.get(i)).collect();
            self.batcher.batch(items)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::ImageDataset;

    /// Batcher that just reports which labels it received
    struct LabelBatcher;

    impl Batcher<ImageItem, Vec<usize>> for LabelBatcher {
        fn batch(&self, items: Vec<ImageItem>) -> Vec<usize> {
            items.into_iter().map(|i| i.label).collect()
        }
    }

    fn dataset(n: usize) -> Arc<dyn Dataset<ImageItem>> {
        let items = (0..n).map(|i| ImageItem::new(vec![0.0; 3], i)).collect();
        Arc::new(ImageDataset::new(items, 1))
    }

    #[test]
    fn sequential_loader_keeps_short_tail() {
        let loader = BatchLoader::new(
            dataset(5),
            Arc::new(LabelBatcher),
            Arc::new(ShardSampler::sequential(5)),
            2,
            1,
        );
        assert_eq!(loader.num_batches(), 3);
        let batches: Vec<Vec<usize>> = loader.iter().collect();
        assert_eq!(batches, vec![vec![0, 1], vec![2, 3], vec![4]]);
    }

    #[test]
    fn tail_below_minimum_is_dropped() {
        let loader = BatchLoader::new(
            dataset(5),
            Arc::new(LabelBatcher),
            Arc::new(ShardSampler::sequential(5)),
            2,
            2,
        );
        assert_eq!(loader.num_batches(), 2);
        assert_eq!(loader.iter().count(), 2);
    }

    #[test]
    fn loader_follows_the_rank_shard() {
        let loader = BatchLoader::new(
            dataset(8),
            Arc::new(LabelBatcher),
            Arc::new(ShardSampler::new(8, 2, 1, false, 0)),
            4,
            1,
        );
        let batches: Vec<Vec<usize>> = loader.iter().collect();
        assert_eq!(batches, vec![vec![1, 3, 5, 7]]);
    }

    #[test]
    fn single_rank_epochs_are_reshuffled() {
        let loader = BatchLoader::new(
            dataset(16),
            Arc::new(LabelBatcher),
            Arc::new(ShardSampler::new(16, 1, 0, true, 7)),
            16,
            1,
        );
        let first:  Vec<usize> = loader.iter_epoch(0).flatten().collect();
        let second: Vec<usize> = loader.iter_epoch(1).flatten().collect();
        assert_ne!(first, second);

        for mut order in [first.clone(), second] {
            order.sort_unstable();
            assert_eq!(order, (0..16).collect::<Vec<_>>());
        }
        // Going back to an epoch repeats its order
        assert_eq!(loader.iter_epoch(0).flatten().collect::<Vec<_>>(), first);
    }
}
