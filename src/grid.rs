//! Grids
mod distributed;

pub use distributed::DistributedGrid;

#[cfg(test)]
pub(crate) use distributed::test;
