// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// All tensor math of a pretraining run lives here. The data
// layer hands over ready batches; everything from the forward
// pass to the optimizer step is in this layer.
//
// What's in this layer:
//
//   model.rs      — conv backbone + projector (+ predictor)
//                   forward → (embedding, projection, prediction?)
//
//   loss.rs       — NT-Xent (SimCLR) and negative cosine
//                   with stop-gradient (SimSiam)
//
//   optimizer.rs  — sgd / adam / rmsprop / adamw behind
//                   per-group learning rates
//
//   lr_policy.rs  — constant / cosine / multistep / exponential,
//                   stepped once per epoch
//
//   knn.rs        — weighted KNN accuracy of the embeddings
//
//   trainers/     — `default` and `accumulate` epoch bodies
//
//   sync.rs       — weight broadcast and gradient averaging
//                   across the ranks of a run
//
//   driver.rs     — the epoch loop: resume, train, validate,
//                   checkpoint, barrier
//
// Reference: Burn Book §3 (Building Blocks)
//            Burn Book §5 (Training)
//            Chen et al. (2020) SimCLR, Chen & He (2021) SimSiam

/// Conv backbone with projection / prediction heads
pub mod model;

/// Contrastive and non-contrastive criteria
pub mod loss;

/// Optimizer factory and parameter groups
pub mod optimizer;

/// Learning-rate policies
pub mod lr_policy;

/// KNN monitor
pub mod knn;

/// Trainer registry
pub mod trainers;

/// Keeping the replicas of a multi-rank run identical
pub mod sync;

/// Epoch loop with resume and checkpointing
pub mod driver;
