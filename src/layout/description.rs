//! Description of one distributed layout
use crate::{
    process_grid::balanced_split,
    types::{is_permutation, LayoutError},
};
use itertools::izip;
use std::ops::Range;

/// How two layouts on the same process grid are connected by a single transpose
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum TransposeKind {
    /// The distributed axes are identical so only the local axis order changes
    Local,
    /// The distributed axis on process-grid axis `axis` changes and the data is exchanged
    /// between the processes along that axis
    Exchange {
        /// The process-grid axis
        axis: usize,
    },
}

/// A fixed ordering of the axes of an N-dimensional array and its partitioning across a
/// process grid.
///
/// The first `nprocs.len()` local axes are distributed, local axis `k` over process-grid
/// axis `k`. The remaining local axes are stored whole on every process, so the trailing
/// axes of the local array are always contiguous.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    name: String,
    dims_order: Vec<usize>,
    inv_dims_order: Vec<usize>,
    nprocs: Vec<usize>,
    coords: Vec<usize>,
    global_shape: Vec<usize>,
    mpi_starts: Vec<Vec<usize>>,
    mpi_lengths: Vec<Vec<usize>>,
    starts: Vec<usize>,
    ends: Vec<usize>,
    shape: Vec<usize>,
    size: usize,
}

impl Layout {
    /// Create new
    ///
    /// `global_shape` is indexed by global axis and `coords` are the coordinates of this
    /// process in the process grid `nprocs`.
    pub fn new(
        name: &str,
        nprocs: &[usize],
        dims_order: &[usize],
        global_shape: &[usize],
        coords: &[usize],
    ) -> Result<Self, LayoutError> {
        let ndims = global_shape.len();
        if dims_order.len() != ndims || !is_permutation(dims_order) {
            return Err(LayoutError::InvalidPermutation {
                name: String::from(name),
                dims_order: dims_order.to_vec(),
                ndims,
            });
        }
        if nprocs.len() > ndims || nprocs.contains(&0) {
            return Err(LayoutError::InvalidProcessGrid {
                nprocs: nprocs.to_vec(),
                ndims,
            });
        }
        if coords.len() != nprocs.len() || izip!(coords, nprocs).any(|(c, p)| c >= p) {
            return Err(LayoutError::InvalidCoordinates {
                coords: coords.to_vec(),
                nprocs: nprocs.to_vec(),
            });
        }

        let mut inv_dims_order = vec![0; ndims];
        for (i, j) in dims_order.iter().enumerate() {
            inv_dims_order[*j] = i;
        }

        let (mpi_starts, mpi_lengths): (Vec<_>, Vec<_>) = izip!(nprocs, dims_order)
            .map(|(p, g)| balanced_split(global_shape[*g], *p))
            .unzip();

        let mut starts = vec![0; ndims];
        let mut ends = dims_order.iter().map(|g| global_shape[*g]).collect::<Vec<_>>();
        for (axis, c) in coords.iter().enumerate() {
            starts[axis] = mpi_starts[axis][*c];
            ends[axis] = starts[axis] + mpi_lengths[axis][*c];
        }
        let shape = izip!(&starts, &ends).map(|(s, e)| e - s).collect::<Vec<_>>();
        let size = shape.iter().product();

        Ok(Self {
            name: String::from(name),
            dims_order: dims_order.to_vec(),
            inv_dims_order,
            nprocs: nprocs.to_vec(),
            coords: coords.to_vec(),
            global_shape: global_shape.to_vec(),
            mpi_starts,
            mpi_lengths,
            starts,
            ends,
            shape,
            size,
        })
    }

    /// Name of the layout
    pub fn name(&self) -> &str {
        &self.name
    }
    /// For each local axis, the global axis that it stores
    pub fn dims_order(&self) -> &[usize] {
        &self.dims_order
    }
    /// For each global axis, the local axis that stores it
    pub fn inv_dims_order(&self) -> &[usize] {
        &self.inv_dims_order
    }
    /// Number of processes along each process-grid axis
    pub fn nprocs(&self) -> &[usize] {
        &self.nprocs
    }
    /// Coordinates of this process in the process grid
    pub fn coords(&self) -> &[usize] {
        &self.coords
    }
    /// Number of dimensions
    pub fn ndims(&self) -> usize {
        self.dims_order.len()
    }
    /// Number of distributed axes
    pub fn ndistributed(&self) -> usize {
        self.nprocs.len()
    }
    /// First global index held on this process, for each local axis
    pub fn starts(&self) -> &[usize] {
        &self.starts
    }
    /// One past the last global index held on this process, for each local axis
    pub fn ends(&self) -> &[usize] {
        &self.ends
    }
    /// First global index held on this process, indexed by global axis
    pub fn origin(&self) -> Vec<usize> {
        self.inv_dims_order
            .iter()
            .map(|axis| self.starts[*axis])
            .collect()
    }
    /// Shape of the local array
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }
    /// Number of elements in the local array
    pub fn size(&self) -> usize {
        self.size
    }
    /// Shape of the global array, in the local axis order
    pub fn full_shape(&self) -> Vec<usize> {
        self.dims_order
            .iter()
            .map(|g| self.global_shape[*g])
            .collect()
    }
    /// Shape of the global array, indexed by global axis
    pub fn global_shape(&self) -> &[usize] {
        &self.global_shape
    }
    /// Start of the range held by each process along the distributed local `axis`
    pub fn mpi_starts(&self, axis: usize) -> &[usize] {
        &self.mpi_starts[axis]
    }
    /// Length of the range held by each process along the distributed local `axis`
    pub fn mpi_lengths(&self, axis: usize) -> &[usize] {
        &self.mpi_lengths[axis]
    }

    /// Global ranges held by the process at `coords`, indexed by global axis
    pub fn block_at(&self, coords: &[usize]) -> Vec<Range<usize>> {
        let mut block = self.global_shape.iter().map(|n| 0..*n).collect::<Vec<_>>();
        for (axis, c) in coords.iter().enumerate() {
            let start = self.mpi_starts[axis][*c];
            block[self.dims_order[axis]] = start..start + self.mpi_lengths[axis][*c];
        }
        block
    }

    /// Global ranges held by this process, indexed by global axis
    pub fn block(&self) -> Vec<Range<usize>> {
        self.block_at(&self.coords)
    }

    /// Convert local indices into global indices
    pub fn global_indices(&self, local: &[usize]) -> Vec<usize> {
        let mut global = vec![0; self.ndims()];
        for (i, (l, s)) in izip!(local, &self.starts).enumerate() {
            global[self.dims_order[i]] = l + s;
        }
        global
    }

    /// The local index of `global_index` along `global_axis`, if it is held on this process
    pub fn local_index(&self, global_axis: usize, global_index: usize) -> Option<usize> {
        let axis = self.inv_dims_order[global_axis];
        (self.starts[axis]..self.ends[axis])
            .contains(&global_index)
            .then(|| global_index - self.starts[axis])
    }

    /// Row-major strides of the local array, indexed by local axis
    pub fn strides(&self) -> Vec<usize> {
        let mut strides = vec![1; self.ndims()];
        for i in (0..self.ndims().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * self.shape[i + 1];
        }
        strides
    }

    /// Can data be moved from this layout to `other` in one step, and how?
    ///
    /// Layouts are only connected if they share the process grid and their dimension orderings
    /// differ by a single swap. Swapping two local axes needs no communication. Swapping a
    /// distributed axis with a local one exchanges data along that process-grid axis.
    pub fn transpose_kind(&self, other: &Layout) -> Option<TransposeKind> {
        if self.nprocs != other.nprocs || self.global_shape != other.global_shape {
            return None;
        }
        let changed = (0..self.ndims())
            .filter(|k| self.dims_order[*k] != other.dims_order[*k])
            .collect::<Vec<_>>();
        let ndistributed = self.ndistributed();
        match changed[..] {
            [] => Some(TransposeKind::Local),
            [a, _] if a >= ndistributed => Some(TransposeKind::Local),
            [a, b] if b >= ndistributed => Some(TransposeKind::Exchange { axis: a }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::{Layout, TransposeKind};
    use crate::types::ErrorKind;

    fn layout(dims_order: &[usize], coords: &[usize]) -> Layout {
        Layout::new("test", &[2, 3], dims_order, &[40, 20, 10, 30], coords).unwrap()
    }

    #[test]
    fn test_dims_order() {
        let l = layout(&[0, 3, 2, 1], &[0, 0]);
        assert_eq!(l.dims_order(), [0, 3, 2, 1]);
        assert_eq!(l.inv_dims_order(), [0, 3, 2, 1]);

        let l = layout(&[0, 2, 3, 1], &[0, 0]);
        assert_eq!(l.dims_order(), [0, 2, 3, 1]);
        assert_eq!(l.inv_dims_order(), [0, 3, 1, 2]);

        let l = layout(&[2, 1, 0, 3], &[0, 0]);
        assert_eq!(l.dims_order(), [2, 1, 0, 3]);
        assert_eq!(l.inv_dims_order(), [2, 1, 0, 3]);
    }

    #[test]
    fn test_invalid_permutation() {
        let e = Layout::new("broken", &[2, 2], &[0, 1, 1, 3], &[4, 4, 4, 4], &[0, 0]).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_invalid_coordinates() {
        assert!(Layout::new("a", &[2, 2], &[0, 1, 2, 3], &[4, 4, 4, 4], &[2, 0]).is_err());
        assert!(Layout::new("a", &[2, 0], &[0, 1, 2, 3], &[4, 4, 4, 4], &[0, 0]).is_err());
        assert!(Layout::new("a", &[2], &[0, 1, 2, 3], &[4, 4, 4, 4], &[0, 0]).is_err());
    }

    #[test]
    fn test_starts_and_ends() {
        // 40 points of r over 2 processes and 30 points of v over 3 processes
        let l = layout(&[0, 3, 1, 2], &[1, 2]);
        assert_eq!(l.starts(), [20, 20, 0, 0]);
        assert_eq!(l.ends(), [40, 30, 20, 10]);
        assert_eq!(l.shape(), [20, 10, 20, 10]);
        assert_eq!(l.size(), 20 * 10 * 20 * 10);
        assert_eq!(l.full_shape(), vec![40, 30, 20, 10]);
        assert_eq!(l.mpi_starts(1), [0, 10, 20]);
        assert_eq!(l.mpi_lengths(0), [20, 20]);
    }

    #[test]
    fn test_uneven_split() {
        let l = Layout::new("a", &[3], &[1, 0], &[4, 10], &[0]).unwrap();
        assert_eq!(l.shape(), [4, 4]);
        let l = Layout::new("a", &[3], &[1, 0], &[4, 10], &[2]).unwrap();
        assert_eq!(l.starts(), [7, 0]);
        assert_eq!(l.shape(), [3, 4]);
    }

    #[test]
    fn test_empty_partition() {
        let l = Layout::new("a", &[4], &[0, 1], &[2, 5], &[3]).unwrap();
        assert_eq!(l.shape(), [0, 5]);
        assert_eq!(l.size(), 0);
        assert_eq!(l.local_index(0, 1), None);
    }

    #[test]
    fn test_global_indices() {
        let l = layout(&[0, 3, 1, 2], &[1, 2]);
        assert_eq!(l.global_indices(&[1, 2, 3, 4]), vec![21, 3, 4, 22]);
        assert_eq!(l.local_index(3, 22), Some(2));
        assert_eq!(l.local_index(3, 2), None);
        assert_eq!(l.local_index(1, 7), Some(7));
    }

    #[test]
    fn test_blocks() {
        let l = layout(&[0, 3, 1, 2], &[1, 2]);
        assert_eq!(l.block(), vec![20..40, 0..20, 0..10, 20..30]);
        assert_eq!(l.block_at(&[0, 0]), vec![0..20, 0..20, 0..10, 0..10]);
    }

    #[test]
    fn test_strides() {
        let l = layout(&[0, 3, 1, 2], &[1, 2]);
        assert_eq!(l.strides(), vec![2000, 200, 10, 1]);
    }

    #[test]
    fn test_transpose_kind() {
        let fs = layout(&[0, 3, 1, 2], &[0, 0]);
        let vp = layout(&[0, 2, 1, 3], &[0, 0]);
        let pol = layout(&[3, 2, 1, 0], &[0, 0]);
        let fs2 = layout(&[0, 3, 2, 1], &[0, 0]);
        assert_eq!(
            fs.transpose_kind(&vp),
            Some(TransposeKind::Exchange { axis: 1 })
        );
        assert_eq!(
            vp.transpose_kind(&pol),
            Some(TransposeKind::Exchange { axis: 0 })
        );
        assert_eq!(fs.transpose_kind(&pol), None);
        assert_eq!(fs.transpose_kind(&fs2), Some(TransposeKind::Local));
    }

    #[test]
    fn test_transpose_kind_needs_single_swap() {
        // the distributed axes differ in one slot but three positions change
        let a = layout(&[1, 3, 0, 2], &[0, 0]);
        let b = layout(&[0, 3, 2, 1], &[0, 0]);
        assert_eq!(a.transpose_kind(&b), None);
        assert_eq!(b.transpose_kind(&a), None);

        let fs = layout(&[0, 3, 1, 2], &[0, 0]);
        assert_eq!(fs.transpose_kind(&layout(&[0, 2, 3, 1], &[0, 0])), None);
        // swapping the two distributed axes is not a single exchange
        assert_eq!(fs.transpose_kind(&layout(&[3, 0, 1, 2], &[0, 0])), None);
        assert_eq!(
            fs.transpose_kind(&layout(&[1, 3, 0, 2], &[0, 0])),
            Some(TransposeKind::Exchange { axis: 0 })
        );
    }

    #[test]
    fn test_origin() {
        let l = layout(&[0, 3, 1, 2], &[1, 2]);
        assert_eq!(l.origin(), vec![20, 0, 0, 20]);
    }
}
