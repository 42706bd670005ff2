// ============================================================
// Layer 4 — Dataset Registry
// ============================================================
// Resolves `cfg.set` to a concrete image source and wires up
// the three loaders the epoch loop needs:
//
//   trn_loader     — two augmented views, sharded by rank,
//                    reshuffled every epoch by `iter_epoch`
//   memory_loader  — plain training images, in order
//                    (the KNN memory bank)
//   val_loader     — plain validation images, in order
//                    (the KNN queries)
//
// Known sets:
//   Cifar10   — binary batches under data_dir
//   Synthetic — seeded prototype images, split 80/20

use std::sync::Arc;

use anyhow::{ensure, Result};
use burn::{data::dataset::Dataset, tensor::backend::AutodiffBackend};
use rand::{rngs::StdRng, SeedableRng};

use crate::application::pretrain_use_case::PretrainConfig;
use crate::data::{
    augment::Augmentation,
    batcher::{ContrastiveBatch, ContrastiveBatcher, EvalBatch, EvalBatcher},
    cifar,
    dataset::{ImageDataset, ImageItem},
    loader::BatchLoader,
    sampler::ShardSampler,
    splitter::split_train_val,
    synthetic,
};
use crate::domain::errors::LookupError;

pub const KNOWN_SETS: [&str; 2] = ["Cifar10", "Synthetic"];

const TRAIN_FRACTION: f64 = 0.8;

/// Everything the epoch loop needs from a dataset.
pub struct DataBundle<B: AutodiffBackend> {
    pub trn_loader:    BatchLoader<ContrastiveBatch<B>>,
    pub memory_loader: BatchLoader<EvalBatch<B::InnerBackend>>,
    pub val_loader:    BatchLoader<EvalBatch<B::InnerBackend>>,
    pub num_classes:   usize,
}

/// Load (train, val) images for `cfg.set`
fn load_images(cfg: &PretrainConfig) -> Result<(Vec<ImageItem>, Vec<ImageItem>, usize)> {
    match cfg.set.as_str() {
        "Cifar10" => {
            ensure!(
                cfg.image_size == cifar::IMAGE_SIZE,
                "Cifar10 images are {0}x{0}, but image_size is {1}",
                cifar::IMAGE_SIZE,
                cfg.image_size
            );
            let (train, test) = cifar::load(&cfg.data_dir)?;
            Ok((train, test, cifar::IMAGE_SIZE))
        }
        "Synthetic" => {
            let seed  = cfg.seed.unwrap_or(0);
            let items = synthetic::generate(
                cfg.synthetic_samples,
                cfg.synthetic_classes,
                cfg.image_size,
                seed,
            );
            let mut rng = StdRng::seed_from_u64(seed);
            let (train, val) = split_train_val(items, TRAIN_FRACTION, &mut rng);
            Ok((train, val, cfg.image_size))
        }
        other => Err(LookupError::dataset(other, &KNOWN_SETS).into()),
    }
}

/// Build the loaders for `cfg.set` on `device`
pub fn build_dataset<B: AutodiffBackend>(
    cfg:    &PretrainConfig,
    device: &B::Device,
) -> Result<DataBundle<B>> {
    tracing::info!("=> Getting {} dataset", cfg.set);

    let (train, val, image_size) = load_images(cfg)?;
    ensure!(!train.is_empty(), "{} has no training images", cfg.set);
    ensure!(!val.is_empty(), "{} has no validation images", cfg.set);

    let train = Arc::new(ImageDataset::new(train, image_size));
    let val   = Arc::new(ImageDataset::new(val, image_size));
    let num_classes = train.num_classes().max(val.num_classes());

    let seed    = cfg.seed.unwrap_or(0);
    let rank    = cfg.rank();
    let sampler = Arc::new(ShardSampler::new(train.len(), cfg.world_size, rank, true, seed));

    // Different augmentation stream per rank, same stream per restart
    let augment_seed = seed.wrapping_add(rank as u64).wrapping_mul(0x9E37_79B9);
    let trn_loader = BatchLoader::new(
        train.clone(),
        Arc::new(ContrastiveBatcher::<B>::new(
            device.clone(),
            image_size,
            Augmentation::default(),
            augment_seed,
        )),
        sampler,
        cfg.batch_size,
        2,
    );

    let eval_batcher = Arc::new(EvalBatcher::<B::InnerBackend>::new(device.clone(), image_size));
    let memory_loader = BatchLoader::new(
        train.clone(),
        eval_batcher.clone(),
        Arc::new(ShardSampler::sequential(train.len())),
        cfg.batch_size,
        1,
    );
    let val_loader = BatchLoader::new(
        val.clone(),
        eval_batcher,
        Arc::new(ShardSampler::sequential(val.len())),
        cfg.batch_size,
        1,
    );

    tracing::info!(
        "{}: {} train / {} val images, {} classes, {} batches per epoch on rank {}",
        cfg.set,
        train.len(),
        val.len(),
        num_classes,
        trn_loader.num_batches(),
        rank
    );

    Ok(DataBundle { trn_loader, memory_loader, val_loader, num_classes })
}
