// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Turns an image source into the batches the epoch loop eats:
//
//   CIFAR-10 .bin files / synthetic generator
//       │
//       ▼
//   ImageDataset      → implements Burn's Dataset trait
//       │
//       ▼
//   ShardSampler      → which indices this rank visits
//       │
//       ▼
//   Augmentation      → random crop / flip / jitter / grayscale
//       │
//       ▼
//   Contrastive- / EvalBatcher → Burn Batcher, [N, 3, H, W]
//       │
//       ▼
//   BatchLoader       → lazy iterator over one epoch
//
// `registry::build_dataset` assembles the whole chain by name.
//
// Reference: Burn Book §4 (Datasets and Dataloaders)
//            Rust Book §13 (Iterators and Closures)

/// Random crop, flip, colour jitter and grayscale
pub mod augment;

/// Burn Batcher implementations
pub mod batcher;

/// CIFAR-10 binary format reader
pub mod cifar;

/// In-memory image dataset
pub mod dataset;

/// Sampler-driven batch iterator
pub mod loader;

/// Dataset lookup by name
pub mod registry;

/// Rank-sharded, epoch-shuffled index order
pub mod sampler;

/// Shuffles and splits data into train/validation sets
pub mod splitter;

/// Class-conditional random images
pub mod synthetic;
