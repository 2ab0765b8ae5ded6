//! Distributed phase-space grids
//!
//! An N-dimensional array is distributed over a process grid in one of several layouts.
//! Each layout orders the axes of the array differently and splits its leading axes over
//! the processes, so that the trailing axes are always held whole and contiguous. Data is
//! moved between layouts with MPI all-to-all exchanges.
#![cfg_attr(feature = "strict", deny(warnings), deny(unused_crate_dependencies))]
#![warn(missing_docs)]

pub mod grid;
pub mod io;
pub mod layout;
pub mod process_grid;
pub mod traits;
pub mod types;

pub use grid::DistributedGrid;
pub use layout::{Layout, LayoutManager, LayoutSwapper};
pub use types::{LayoutConfig, LayoutError};
