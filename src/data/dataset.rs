// ============================================================
// Layer 4 — Image Dataset
// ============================================================
// In-memory labelled images, stored CHW as f32 in [0, 1]:
//
//   pixels[c * H * W + y * W + x]
//
// Both CIFAR-10 and the synthetic set end up here, so every
// later stage (augmentation, batching, KNN) sees one format.
//
// Reference: Burn Book §4 (Datasets)

use burn::data::dataset::Dataset;

/// RGB images only
pub const CHANNELS: usize = 3;

/// Per-channel mean / std used to normalise inputs (CIFAR-10 statistics)
pub const MEAN: [f32; CHANNELS] = [0.4914, 0.4822, 0.4465];
pub const STD:  [f32; CHANNELS] = [0.2470, 0.2435, 0.2616];

/// One labelled image.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageItem {
    /// CHW, values in [0, 1]
    pub pixels: Vec<f32>,
    pub label:  usize,
}

impl ImageItem {
    pub fn new(pixels: Vec<f32>, label: usize) -> Self {
        Self { pixels, label }
    }
}

pub struct ImageDataset {
    items:      Vec<ImageItem>,
    image_size: usize,
}

impl ImageDataset {
    pub fn new(items: Vec<ImageItem>, image_size: usize) -> Self {
        debug_assert!(items
            .iter()
            .all(|i| i.pixels.len() == CHANNELS * image_size * image_size));
        Self { items, image_size }
    }

    pub fn image_size(&self) -> usize {
        self.image_size
    }

    /// Number of distinct labels, assuming labels are 0..n
    pub fn num_classes(&self) -> usize {
        self.items.iter().map(|i| i.label + 1).max().unwrap_or(0)
    }
}

impl Dataset<ImageItem> for ImageDataset {
    fn get(&self, index: usize) -> Option<ImageItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// Normalise CHW pixels in place with `MEAN` / `STD`
pub fn normalize(pixels: &mut [f32], image_size: usize) {
    let plane = image_size * image_size;
    for (c, channel) in pixels.chunks_mut(plane).enumerate().take(CHANNELS) {
        for v in channel {
            *v = (*v - MEAN[c]) / STD[c];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dataset_exposes_items_and_classes() {
        let items = vec![
            ImageItem::new(vec![0.0; CHANNELS * 4], 0),
            ImageItem::new(vec![1.0; CHANNELS * 4], 3),
        ];
        let ds = ImageDataset::new(items, 2);
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.num_classes(), 4);
        assert_eq!(ds.get(1).unwrap().label, 3);
        assert!(ds.get(2).is_none());
    }

    #[test]
    fn normalize_uses_per_channel_statistics() {
        let mut pixels = vec![MEAN[0], MEAN[1], MEAN[2] + STD[2]];
        normalize(&mut pixels, 1);
        assert!(pixels[0].abs() < 1e-6);
        assert!(pixels[1].abs() < 1e-6);
        assert!((pixels[2] - 1.0).abs() < 1e-6);
    }
}
