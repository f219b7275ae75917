//! Umbrella crate: re-exports the decoder/lifter surface for embeddings that
//! want a single dependency.

pub use tern_ir as ir;
pub use tern_types as types;
pub use tern_x86 as x86;
