//! Checkpoint I/O
use crate::types::LayoutError;
use std::path::Path;

pub trait RONCheckpoint {
    //! Parallel checkpoints in RON format
    //!
    //! Rank 0 writes a summary file `{name}_{time:06}.ron` and every rank writes the
    //! hyperslab it holds to `{name}_{time:06}.{rank}.ron`.

    /// Write the current values to `folder`
    fn write_checkpoint(
        &self,
        folder: impl AsRef<Path>,
        time: usize,
        name_convention: &str,
    ) -> Result<(), LayoutError>;

    /// Read values from `folder`. If `time` is `None` the latest checkpoint is read.
    ///
    /// The checkpoint must have been written in a layout with the same dimension ordering as
    /// the current layout. It may have been written by a different number of processes.
    fn load_checkpoint(
        &mut self,
        folder: impl AsRef<Path>,
        time: Option<usize>,
        name_convention: &str,
    ) -> Result<(), LayoutError>;
}
