// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust types and traits that describe a pretraining run,
// independent of how tensors are computed or where files go.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O
//   - Only plain Rust structs, enums, and traits
//
// Reference: Rust Book §5 (Structs), §10 (Traits)

// Arch, optimizer kind and parameter groups
pub mod run;

// Learning-rate policy and scalar sink abstractions
pub mod traits;

// Errors returned by the name-based registries
pub mod errors;
