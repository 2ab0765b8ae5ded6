//! Input and output
#[cfg(feature = "serde")]
mod checkpoint;

#[cfg(feature = "serde")]
pub use checkpoint::{CheckpointPart, CheckpointSummary};
