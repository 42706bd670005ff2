// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// This layer orchestrates the other layers to accomplish one
// goal each: pretraining a model, or evaluating a saved one.
//
// Rules for this layer:
//   - No tensor math here (that's Layer 5)
//   - No printing to stdout (that's Layer 1)
//   - Only workflow coordination and run configuration
//
// Reference: Clean Architecture pattern
//            Rust Book §7 (Module System)

// Run configuration and the multi-rank pretraining launcher
pub mod pretrain_use_case;

// KNN evaluation of an experiment's newest checkpoint
pub mod eval_use_case;
