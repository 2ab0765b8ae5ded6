//! Traits

mod handler;
#[cfg(feature = "serde")]
mod io;

pub use handler::LayoutHandler;
#[cfg(feature = "serde")]
pub use io::RONCheckpoint;
