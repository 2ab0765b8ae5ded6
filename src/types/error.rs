//! Errors
use thiserror::Error;

/// The category of a [`LayoutError`]
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum ErrorKind {
    /// The layouts, process grid or communicator cannot be set up as requested
    Configuration,
    /// A transpose or lookup refers to a layout that cannot be reached
    Routing,
    /// An operation was called in a state that does not permit it
    Usage,
    /// Reading or writing a checkpoint failed
    Io,
}

/// Errors raised while building layouts or moving data between them
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum LayoutError {
    /// Dims order is not a permutation of the axes
    #[error("dims order {dims_order:?} of layout '{name}' is not a permutation of 0..{ndims}")]
    InvalidPermutation {
        name: String,
        dims_order: Vec<usize>,
        ndims: usize,
    },

    /// Process grid has zero entries or more axes than the layout
    #[error("process grid {nprocs:?} is not valid for a {ndims}-dimensional layout")]
    InvalidProcessGrid { nprocs: Vec<usize>, ndims: usize },

    /// Process coordinates outside the process grid
    #[error("process coordinates {coords:?} do not lie in the process grid {nprocs:?}")]
    InvalidCoordinates {
        coords: Vec<usize>,
        nprocs: Vec<usize>,
    },

    /// Two layouts share a name
    #[error("layout name '{name}' is registered more than once")]
    DuplicateLayoutName { name: String },

    /// No layouts were given
    #[error("no layouts were configured")]
    EmptyConfiguration,

    /// A layout has no single-step neighbour
    #[error("layout '{name}' cannot be reached from any other layout in a single transpose")]
    IncompatibleLayout { name: String },

    /// No admissible process grid exists
    #[error("{nprocs} processes cannot be arranged in a grid bounded by {bounds:?}")]
    ProcessGridFactorisation { nprocs: usize, bounds: Vec<usize> },

    /// Communicator size does not fit the process grid
    #[error("communicator has {actual} processes but the layouts need a multiple of {expected}")]
    CommunicatorSizeMismatch { expected: usize, actual: usize },

    /// Each layout group needs its own process grid
    #[error("{groups} layout groups were given with {grids} process grids")]
    GroupCountMismatch { groups: usize, grids: usize },

    /// A layout group cannot be reached from the others
    #[error("layout group {group} shares no pivot layout with the other groups")]
    NoPivot { group: usize },

    /// Coordinate values do not match the global shape
    #[error("coordinate axes have lengths {actual:?} but the layouts use the global shape {expected:?}")]
    EtaGridMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Layout table could not be parsed
    #[error("cannot parse layout table: {message}")]
    Parse { message: String },

    /// Layout name is not registered
    #[error("unknown layout '{name}'")]
    UnknownLayout { name: String },

    /// Layouts are registered but not connected
    #[error("no sequence of transposes leads from '{from}' to '{to}'")]
    NoRoute { from: String, to: String },

    /// Buffer cannot hold every layout
    #[error("buffer holds {len} elements but {required} are required")]
    BufferTooSmall { len: usize, required: usize },

    /// Saved values have not been restored or freed
    #[error("grid values are already saved")]
    SaveOutstanding,

    /// Restore or free without saved values
    #[error("no grid values have been saved")]
    NothingSaved,

    /// Save slot was not allocated
    #[error("grid was created without memory for saved values")]
    NoSaveMemory,

    /// Message is too long for an MPI count
    #[error("{count} values do not fit in an MPI count")]
    CountOverflow { count: usize },

    /// Wrong number of fixed indices for a slice
    #[error("expected {expected} fixed indices but got {actual}")]
    SliceIndexCount { expected: usize, actual: usize },

    /// Processes requested different transposes
    #[error("processes disagree on the transpose from '{from}' to '{to}'")]
    CollectiveMismatch { from: String, to: String },

    /// Checkpoint was written in another layout
    #[error("checkpoint was written with dims order {found:?} but the layout uses {expected:?}")]
    CheckpointLayoutMismatch {
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    /// Checkpoint could not be read or written
    #[error("checkpoint error: {message}")]
    Checkpoint { message: String },
}

impl LayoutError {
    /// The category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidPermutation { .. }
            | Self::InvalidProcessGrid { .. }
            | Self::InvalidCoordinates { .. }
            | Self::DuplicateLayoutName { .. }
            | Self::EmptyConfiguration
            | Self::IncompatibleLayout { .. }
            | Self::ProcessGridFactorisation { .. }
            | Self::CommunicatorSizeMismatch { .. }
            | Self::GroupCountMismatch { .. }
            | Self::EtaGridMismatch { .. }
            | Self::Parse { .. }
            | Self::NoPivot { .. } => ErrorKind::Configuration,
            Self::UnknownLayout { .. } | Self::NoRoute { .. } => ErrorKind::Routing,
            Self::BufferTooSmall { .. }
            | Self::SaveOutstanding
            | Self::NothingSaved
            | Self::NoSaveMemory
            | Self::SliceIndexCount { .. }
            | Self::CountOverflow { .. }
            | Self::CollectiveMismatch { .. } => ErrorKind::Usage,
            Self::CheckpointLayoutMismatch { .. } | Self::Checkpoint { .. } => ErrorKind::Io,
        }
    }
}

impl From<std::io::Error> for LayoutError {
    fn from(e: std::io::Error) -> Self {
        Self::Checkpoint {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::{ErrorKind, LayoutError};

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            LayoutError::DuplicateLayoutName {
                name: String::from("poloidal")
            }
            .kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            LayoutError::NoRoute {
                from: String::from("a"),
                to: String::from("b")
            }
            .kind(),
            ErrorKind::Routing
        );
        assert_eq!(LayoutError::SaveOutstanding.kind(), ErrorKind::Usage);
        assert_eq!(
            LayoutError::from(std::io::Error::other("disk full")).kind(),
            ErrorKind::Io
        );
    }

    #[test]
    fn test_error_message() {
        let e = LayoutError::InvalidPermutation {
            name: String::from("broken"),
            dims_order: vec![0, 0, 1, 2],
            ndims: 4,
        };
        assert_eq!(
            e.to_string(),
            "dims order [0, 0, 1, 2] of layout 'broken' is not a permutation of 0..4"
        );
    }
}
