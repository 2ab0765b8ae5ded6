//! Layouts and transposes
mod description;
pub mod exchange;
mod graph;
mod manager;
mod swapper;

pub use description::{Layout, TransposeKind};
pub use exchange::ExchangePlan;
pub use graph::LayoutSet;
pub use manager::LayoutManager;
pub use swapper::LayoutSwapper;
