//! Layout handlers
use crate::{
    layout::Layout,
    types::{Extremum, LayoutError},
};
use mpi::traits::Equivalence;

/// An object that knows a set of layouts and can move data between them.
///
/// All methods that communicate are collective over the processes of the handler.
pub trait LayoutHandler {
    /// The layout called `name`
    fn layout(&self, name: &str) -> Result<&Layout, LayoutError>;

    /// The number of elements a buffer needs to hold any layout
    fn buffer_size(&self) -> usize;

    /// Move the values in `source`, stored in the layout `source_name`, into `dest` in the
    /// layout `dest_name`.
    ///
    /// `buf` is used for intermediate results when the transpose takes several steps.
    fn transpose<T: Equivalence + Copy + Default>(
        &self,
        source: &[T],
        dest: &mut [T],
        source_name: &str,
        dest_name: &str,
        buf: Option<&mut [T]>,
    ) -> Result<(), LayoutError>;

    /// The minimum or maximum of `local` over the processes holding one copy of the data
    fn all_reduce<T: Equivalence + Copy + Default>(&self, local: T, op: Extremum) -> T;

    /// Wait for every process
    fn barrier(&self);

    /// The rank of this process
    fn rank(&self) -> usize;

    /// The number of processes
    fn size(&self) -> usize;
}
