// ============================================================
// Layer 4 — Image Batchers
// ============================================================
// Implements Burn's Batcher trait for the two kinds of batches
// the driver consumes:
//
//   ContrastiveBatcher → ContrastiveBatch { view1, view2 }
//       two independently augmented views per image, used by
//       the pretraining step
//   EvalBatcher        → EvalBatch { images, labels }
//       plain normalised images, used to fill the KNN memory
//       bank and to query it
//
// Both flatten N images into one Vec<f32>, create a 1D tensor
// and reshape it to [N, 3, H, W].
//
// Reference: Burn Book §4 (Batcher)

use std::sync::Mutex;

use burn::{data::dataloader::batcher::Batcher, prelude::*};
use rand::{rngs::StdRng, SeedableRng};

use crate::data::{
    augment::Augmentation,
    dataset::{normalize, ImageItem, CHANNELS},
};

fn images_to_tensor<B: Backend>(
    flat:       Vec<f32>,
    batch_size: usize,
    image_size: usize,
    device:     &B::Device,
) -> Tensor<B, 4> {
    Tensor::<B, 1>::from_floats(flat.as_slice(), device)
        .reshape([batch_size, CHANNELS, image_size, image_size])
}

// ─── ContrastiveBatch ─────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct ContrastiveBatch<B: Backend> {
    /// First augmented view — shape: [batch_size, 3, H, W]
    pub view1: Tensor<B, 4>,
    /// Second augmented view — same shape
    pub view2: Tensor<B, 4>,
    /// Labels are never used for training, only carried along
    pub labels: Vec<usize>,
}

impl<B: Backend> ContrastiveBatch<B> {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

// ─── ContrastiveBatcher ───────────────────────────────────────────────────────
pub struct ContrastiveBatcher<B: Backend> {
    device:       B::Device,
    image_size:   usize,
    augmentation: Augmentation,
    /// Batcher::batch takes &self, so the RNG lives behind a mutex
    rng:          Mutex<StdRng>,
}

impl<B: Backend> ContrastiveBatcher<B> {
    pub fn new(device: B::Device, image_size: usize, augmentation: Augmentation, seed: u64) -> Self {
        Self { device, image_size, augmentation, rng: Mutex::new(StdRng::seed_from_u64(seed)) }
    }
}

impl<B: Backend> Batcher<ImageItem, ContrastiveBatch<B>> for ContrastiveBatcher<B> {
    fn batch(&self, items: Vec<ImageItem>) -> ContrastiveBatch<B> {
        let batch_size = items.len();
        let size       = self.image_size;
        let pixels     = CHANNELS * size * size;

        let mut view1 = Vec::with_capacity(batch_size * pixels);
        let mut view2 = Vec::with_capacity(batch_size * pixels);
        {
            // A poisoned lock still holds a usable RNG
            let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            for item in &items {
                let mut a = self.augmentation.apply(&item.pixels, size, &mut *rng);
                let mut b = self.augmentation.apply(&item.pixels, size, &mut *rng);
                normalize(&mut a, size);
                normalize(&mut b, size);
                view1.extend(a);
                view2.extend(b);
            }
        }

        ContrastiveBatch {
            view1:  images_to_tensor(view1, batch_size, size, &self.device),
            view2:  images_to_tensor(view2, batch_size, size, &self.device),
            labels: items.iter().map(|i| i.label).collect(),
        }
    }
}

// ─── EvalBatch ────────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct EvalBatch<B: Backend> {
    /// Normalised images — shape: [batch_size, 3, H, W]
    pub images: Tensor<B, 4>,
    pub labels: Vec<usize>,
}

#[derive(Clone, Debug)]
pub struct EvalBatcher<B: Backend> {
    device:     B::Device,
    image_size: usize,
}

impl<B: Backend> EvalBatcher<B> {
    pub fn new(device: B::Device, image_size: usize) -> Self {
        Self { device, image_size }
    }
}

impl<B: Backend> Batcher<ImageItem, EvalBatch<B>> for EvalBatcher<B> {
    fn batch(&self, items: Vec<ImageItem>) -> EvalBatch<B> {
        let batch_size = items.len();
        let size       = self.image_size;

        let flat: Vec<f32> = items
            .iter()
            .flat_map(|item| {
                let mut px = item.pixels.clone();
                normalize(&mut px, size);
                px
            })
            .collect();

        EvalBatch {
            images: images_to_tensor(flat, batch_size, size, &self.device),
            labels: items.iter().map(|i| i.label).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn items(n: usize, size: usize) -> Vec<ImageItem> {
        (0..n)
            .map(|i| ImageItem::new(vec![0.5; CHANNELS * size * size], i % 3))
            .collect()
    }

    #[test]
    fn contrastive_batch_has_two_views_of_equal_shape() {
        let batcher = ContrastiveBatcher::<TestBackend>::new(
            Default::default(),
            8,
            Augmentation::default(),
            0,
        );
        let batch = batcher.batch(items(4, 8));
        assert_eq!(batch.view1.dims(), [4, 3, 8, 8]);
        assert_eq!(batch.view2.dims(), [4, 3, 8, 8]);
        assert_eq!(batch.labels, vec![0, 1, 2, 0]);
    }

    #[test]
    fn eval_batch_is_normalised_without_augmentation() {
        let batcher = EvalBatcher::<TestBackend>::new(Default::default(), 2);
        let batch   = batcher.batch(items(2, 2));
        assert_eq!(batch.images.dims(), [2, 3, 2, 2]);

        let values: Vec<f32> = batch.images.into_data().convert::<f32>().to_vec().unwrap();
        let expected_red = (0.5 - crate::data::dataset::MEAN[0]) / crate::data::dataset::STD[0];
        assert!((values[0] - expected_red).abs() < 1e-5);
        assert!((values[3] - expected_red).abs() < 1e-5);
    }
}
