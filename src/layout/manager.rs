//! Transposes between the layouts of one process grid
use super::{
    exchange::{all_reduce_extremum, chain, exchange, permute_local, ExchangePlan},
    Layout, LayoutSet, TransposeKind,
};
use crate::{
    process_grid::coordinates_of,
    traits::LayoutHandler,
    types::{Extremum, LayoutConfig, LayoutError},
};
use itertools::Itertools;
use mpi::{
    topology::CartesianCommunicator,
    traits::{Communicator, CommunicatorCollectives, Equivalence},
    Count,
};
use tracing::{debug, info};

/// The layouts of a distributed array on one Cartesian process grid.
///
/// Every process of the communicator must create the manager with the same arguments and
/// must call [LayoutManager::transpose] with the same layout names in the same order.
pub struct LayoutManager {
    comm: CartesianCommunicator,
    sub_comms: Vec<CartesianCommunicator>,
    layouts: LayoutSet,
}

impl LayoutManager {
    /// Create new
    ///
    /// The communicator must contain exactly `nprocs.iter().product()` processes.
    pub fn new<C: Communicator>(
        comm: &C,
        config: &LayoutConfig,
        nprocs: &[usize],
        global_shape: &[usize],
    ) -> Result<Self, LayoutError> {
        if nprocs.is_empty() || nprocs.contains(&0) {
            return Err(LayoutError::InvalidProcessGrid {
                nprocs: nprocs.to_vec(),
                ndims: global_shape.len(),
            });
        }
        let expected = nprocs.iter().product::<usize>();
        let actual = comm.size() as usize;
        if actual != expected {
            return Err(LayoutError::CommunicatorSizeMismatch { expected, actual });
        }

        // The Cartesian communicator is not reordered so its coordinates are row-major in the
        // rank of `comm`.
        let coords = coordinates_of(comm.rank() as usize, nprocs);
        let layouts = LayoutSet::new(config, nprocs, global_shape, &coords)?;

        let dims = nprocs.iter().map(|p| *p as Count).collect_vec();
        let comm = comm
            .create_cartesian_communicator(&dims, &vec![false; dims.len()], false)
            .ok_or(LayoutError::CommunicatorSizeMismatch { expected, actual })?;
        debug_assert_eq!(
            comm.rank_to_coordinates(comm.rank())
                .iter()
                .map(|c| *c as usize)
                .collect_vec(),
            coords
        );
        let sub_comms = (0..nprocs.len())
            .map(|axis| {
                let retain = (0..nprocs.len()).map(|k| k == axis).collect_vec();
                comm.subgroup(&retain)
            })
            .collect_vec();

        if comm.rank() == 0 {
            info!(
                nprocs = ?nprocs,
                global_shape = ?global_shape,
                layouts = ?layouts.layouts().iter().map(|l| l.name()).collect_vec(),
                "created layout manager"
            );
        }

        Ok(Self {
            comm,
            sub_comms,
            layouts,
        })
    }

    /// The Cartesian communicator
    pub fn comm(&self) -> &CartesianCommunicator {
        &self.comm
    }

    /// The communicator of the processes along process-grid axis `axis`
    pub fn sub_comm(&self, axis: usize) -> &CartesianCommunicator {
        &self.sub_comms[axis]
    }

    /// The layouts
    pub fn layouts(&self) -> &LayoutSet {
        &self.layouts
    }

    /// Number of processes along each process-grid axis
    pub fn nprocs(&self) -> &[usize] {
        self.layouts.get(0).nprocs()
    }

    /// Coordinates of this process in the process grid
    pub fn coords(&self) -> &[usize] {
        self.layouts.get(0).coords()
    }

    /// Check that `len` elements can hold any layout
    pub(crate) fn check_len(&self, len: usize) -> Result<(), LayoutError> {
        if len < self.layouts.buffer_size() {
            Err(LayoutError::BufferTooSmall {
                len,
                required: self.layouts.buffer_size(),
            })
        } else {
            Ok(())
        }
    }

    /// Move the values in `source`, stored in the layout `source_name`, into `dest` in the
    /// layout `dest_name`.
    ///
    /// If the layouts are not neighbours the data is moved along the shortest route,
    /// alternating between `dest` and `buf` (or an internal buffer if `buf` is `None`).
    /// `source` is never written to.
    pub fn transpose<T: Equivalence + Copy + Default>(
        &self,
        source: &[T],
        dest: &mut [T],
        source_name: &str,
        dest_name: &str,
        buf: Option<&mut [T]>,
    ) -> Result<(), LayoutError> {
        self.check_len(source.len())?;
        self.check_len(dest.len())?;
        if let Some(b) = &buf {
            self.check_len(b.len())?;
        }
        let route = self
            .layouts
            .transpose_route(source_name, dest_name, self.comm.rank() == 0)?;
        #[cfg(debug_assertions)]
        self.check_agreement(source_name, dest_name)?;

        let steps = route.len() - 1;
        if steps == 0 {
            let n = self.layouts.get(route[0]).size();
            dest[..n].copy_from_slice(&source[..n]);
            return Ok(());
        }
        debug!(from = source_name, to = dest_name, steps, "transpose");

        let mut scratch = vec![];
        let inter: &mut [T] = match buf {
            Some(b) => b,
            None => {
                if steps > 1 {
                    scratch = vec![T::default(); self.layouts.buffer_size()];
                }
                &mut scratch
            }
        };
        chain(steps, source, dest, inter, |k, src, dst| {
            self.step(
                self.layouts.get(route[k]),
                self.layouts.get(route[k + 1]),
                src,
                dst,
            )
        })
    }

    fn step<T: Equivalence + Copy + Default>(
        &self,
        from: &Layout,
        to: &Layout,
        src: &[T],
        dst: &mut [T],
    ) -> Result<(), LayoutError> {
        match from.transpose_kind(to) {
            Some(TransposeKind::Local) => permute_local(from, src, to, dst),
            Some(TransposeKind::Exchange { axis }) => {
                let plan = ExchangePlan::along_axis(from, to, axis);
                exchange(&self.sub_comms[axis], &plan, from, src, to, dst)
            }
            None => Err(LayoutError::NoRoute {
                from: from.name().to_string(),
                to: to.name().to_string(),
            }),
        }
    }

    /// Check that every process requested the same transpose
    #[cfg(debug_assertions)]
    fn check_agreement(&self, from: &str, to: &str) -> Result<(), LayoutError> {
        use std::hash::{DefaultHasher, Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        (from, to).hash(&mut hasher);
        let local = hasher.finish();
        let low = all_reduce_extremum(&self.comm, local, Extremum::Min);
        let high = all_reduce_extremum(&self.comm, local, Extremum::Max);
        if low == high {
            Ok(())
        } else {
            Err(LayoutError::CollectiveMismatch {
                from: from.to_string(),
                to: to.to_string(),
            })
        }
    }
}

impl LayoutHandler for LayoutManager {
    fn layout(&self, name: &str) -> Result<&Layout, LayoutError> {
        self.layouts.layout(name)
    }

    fn buffer_size(&self) -> usize {
        self.layouts.buffer_size()
    }

    fn transpose<T: Equivalence + Copy + Default>(
        &self,
        source: &[T],
        dest: &mut [T],
        source_name: &str,
        dest_name: &str,
        buf: Option<&mut [T]>,
    ) -> Result<(), LayoutError> {
        LayoutManager::transpose(self, source, dest, source_name, dest_name, buf)
    }

    fn all_reduce<T: Equivalence + Copy + Default>(&self, local: T, op: Extremum) -> T {
        all_reduce_extremum(&self.comm, local, op)
    }

    fn barrier(&self) {
        self.comm.barrier();
    }

    fn rank(&self) -> usize {
        self.comm.rank() as usize
    }

    fn size(&self) -> usize {
        self.comm.size() as usize
    }
}
