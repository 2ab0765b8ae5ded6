//! Types

mod config;
mod error;
pub use config::{is_permutation, LayoutConfig, LayoutSpec};
pub use error::{ErrorKind, LayoutError};

/// The extremum computed by a collective reduction
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum Extremum {
    /// Smallest value
    Min,
    /// Largest value
    Max,
}
