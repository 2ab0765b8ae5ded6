//! Redistribution of hyperslabs between processes
use super::Layout;
use crate::types::{Extremum, LayoutError};
use itertools::izip;
use mpi::{
    collective::SystemOperation,
    datatype::{Partition, PartitionMut},
    traits::{Communicator, CommunicatorCollectives, Equivalence},
    Count,
};
use ndarray::{ArrayBase, ArrayViewD, ArrayViewMutD, IxDyn, RawData, Slice};
use std::ops::Range;

/// A hyperslab of the global array, one range per global axis
pub type Block = Vec<Range<usize>>;

/// The intersection of two hyperslabs
pub fn intersect(a: &[Range<usize>], b: &[Range<usize>]) -> Block {
    izip!(a, b)
        .map(|(x, y)| {
            let start = x.start.max(y.start);
            start..x.end.min(y.end).max(start)
        })
        .collect()
}

/// Number of indices in a hyperslab
pub fn block_len(block: &[Range<usize>]) -> usize {
    block.iter().map(|r| r.len()).product()
}

fn too_small(len: usize, required: usize) -> LayoutError {
    LayoutError::BufferTooSmall { len, required }
}

/// The local array of `layout` stored at the start of `data`, with its axes in global order
pub fn global_view<'a, T>(
    layout: &Layout,
    data: &'a [T],
) -> Result<ArrayViewD<'a, T>, LayoutError> {
    let len = data.len();
    let local = data
        .get(..layout.size())
        .ok_or_else(|| too_small(len, layout.size()))?;
    let view = ArrayViewD::from_shape(IxDyn(layout.shape()), local)
        .map_err(|_| too_small(len, layout.size()))?;
    Ok(view.permuted_axes(layout.inv_dims_order()))
}

/// Mutable version of [global_view]
pub fn global_view_mut<'a, T>(
    layout: &Layout,
    data: &'a mut [T],
) -> Result<ArrayViewMutD<'a, T>, LayoutError> {
    let len = data.len();
    let local = data
        .get_mut(..layout.size())
        .ok_or_else(|| too_small(len, layout.size()))?;
    let view = ArrayViewMutD::from_shape(IxDyn(layout.shape()), local)
        .map_err(|_| too_small(len, layout.size()))?;
    Ok(view.permuted_axes(layout.inv_dims_order()))
}

// Restrict `view`, whose first index is `origin`, to the indices in `block`.
fn restrict<S: RawData>(view: &mut ArrayBase<S, IxDyn>, origin: &[usize], block: &[Range<usize>]) {
    view.slice_each_axis_inplace(|ax| {
        let (range, start) = (&block[ax.axis.index()], origin[ax.axis.index()]);
        Slice::from(range.start - start..range.end - start)
    });
}

/// Copy the values of `src` that lie in `block` into `dst`.
///
/// `src_origin` and `dst_origin` are the indices of the first entries of the two arrays. The
/// arrays, origins and `block` must all use the same axis order. Returns the number of values
/// copied.
pub fn copy_block<T: Copy>(
    mut src: ArrayViewD<'_, T>,
    src_origin: &[usize],
    mut dst: ArrayViewMutD<'_, T>,
    dst_origin: &[usize],
    block: &[Range<usize>],
) -> usize {
    let n = block_len(block);
    if n > 0 {
        restrict(&mut src, src_origin, block);
        restrict(&mut dst, dst_origin, block);
        dst.assign(&src);
    }
    n
}

/// Append the part of `data` (stored in `source`) that lies in `block` to `out`.
///
/// The values are written iterating the global axes in `order`, last axis fastest.
pub fn pack<T: Copy>(
    source: &Layout,
    data: &[T],
    block: &[Range<usize>],
    order: &[usize],
    out: &mut Vec<T>,
) -> Result<(), LayoutError> {
    if block_len(block) == 0 {
        return Ok(());
    }
    let mut view = global_view(source, data)?;
    restrict(&mut view, &source.origin(), block);
    out.extend(view.permuted_axes(order).iter().copied());
    Ok(())
}

/// Read the part of `data` (stored in `dest`) that lies in `block` from `input`, in `order`
///
/// Returns the number of values read.
pub fn unpack<T: Copy>(
    dest: &Layout,
    data: &mut [T],
    block: &[Range<usize>],
    order: &[usize],
    input: &[T],
) -> Result<usize, LayoutError> {
    let n = block_len(block);
    if n == 0 {
        return Ok(0);
    }
    let mut view = global_view_mut(dest, data)?;
    restrict(&mut view, &dest.origin(), block);
    let mut view = view.permuted_axes(order);
    let values = input.get(..n).ok_or_else(|| too_small(input.len(), n))?;
    let values =
        ArrayViewD::from_shape(view.raw_dim(), values).map_err(|_| too_small(input.len(), n))?;
    view.assign(&values);
    Ok(n)
}

/// Reorder the local array of `source` into the local array of `dest`.
///
/// Both layouts must hold the same global indices on this process.
pub fn permute_local<T: Copy>(
    source: &Layout,
    src: &[T],
    dest: &Layout,
    dst: &mut [T],
) -> Result<(), LayoutError> {
    let from = global_view(source, src)?;
    global_view_mut(dest, dst)?.assign(&from);
    Ok(())
}

/// The hyperslabs sent to and received from each peer of a communicator in one
/// redistribution step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangePlan {
    order: Vec<usize>,
    send: Vec<Block>,
    recv: Vec<Block>,
}

impl ExchangePlan {
    /// Create new
    ///
    /// `send[q]` and `recv[q]` are the hyperslabs exchanged with the process of rank `q`.
    /// Both sides serialise a hyperslab by iterating the global axes in `order`.
    pub fn new(order: Vec<usize>, send: Vec<Block>, recv: Vec<Block>) -> Self {
        debug_assert_eq!(send.len(), recv.len());
        Self { order, send, recv }
    }

    /// The plan for a transpose between two layouts that differ in the distributed axis of
    /// process-grid axis `axis`. The peers are the processes along that axis.
    pub fn along_axis(source: &Layout, dest: &Layout, axis: usize) -> Self {
        let own_source = source.block();
        let own_dest = dest.block();
        let mut peer = source.coords().to_vec();
        let (send, recv) = (0..source.nprocs()[axis])
            .map(|q| {
                peer[axis] = q;
                (
                    intersect(&own_source, &dest.block_at(&peer)),
                    intersect(&source.block_at(&peer), &own_dest),
                )
            })
            .unzip();
        Self::new(dest.dims_order().to_vec(), send, recv)
    }

    /// Number of peers
    pub fn npeers(&self) -> usize {
        self.send.len()
    }

    /// Number of values sent to each peer
    pub fn send_counts(&self) -> Vec<usize> {
        self.send.iter().map(|b| block_len(b)).collect()
    }

    /// Number of values received from each peer
    pub fn recv_counts(&self) -> Vec<usize> {
        self.recv.iter().map(|b| block_len(b)).collect()
    }

    /// Pack the values sent to every peer, in peer order
    pub fn pack<T: Copy>(&self, source: &Layout, data: &[T]) -> Result<Vec<T>, LayoutError> {
        let mut out = Vec::with_capacity(self.send_counts().iter().sum());
        for block in &self.send {
            pack(source, data, block, &self.order, &mut out)?;
        }
        Ok(out)
    }

    /// Unpack the values received from every peer, in peer order
    pub fn unpack<T: Copy>(
        &self,
        dest: &Layout,
        received: &[T],
        data: &mut [T],
    ) -> Result<(), LayoutError> {
        let mut offset = 0;
        for block in &self.recv {
            offset += unpack(dest, data, block, &self.order, &received[offset..])?;
        }
        Ok(())
    }
}

fn counts_and_displacements(counts: &[usize]) -> Result<(Vec<Count>, Vec<Count>), LayoutError> {
    let to_count =
        |n: usize| Count::try_from(n).map_err(|_| LayoutError::CountOverflow { count: n });
    let displs = counts
        .iter()
        .scan(0, |state, &x| {
            let old = *state;
            *state += x;
            Some(old)
        })
        .map(to_count)
        .collect::<Result<Vec<_>, _>>()?;
    let counts = counts
        .iter()
        .map(|c| to_count(*c))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((counts, displs))
}

/// Carry out `plan` on `comm`: every process sends its hyperslabs of `src` and receives its
/// hyperslabs of `dst` in a single all-to-all.
pub fn exchange<C: Communicator, T: Equivalence + Copy + Default>(
    comm: &C,
    plan: &ExchangePlan,
    source: &Layout,
    src: &[T],
    dest: &Layout,
    dst: &mut [T],
) -> Result<(), LayoutError> {
    debug_assert_eq!(plan.npeers(), comm.size() as usize);
    let send = plan.pack(source, src)?;
    let recv_counts = plan.recv_counts();
    let mut recv = vec![T::default(); recv_counts.iter().sum()];

    let (send_counts, send_displs) = counts_and_displacements(&plan.send_counts())?;
    let (recv_counts, recv_displs) = counts_and_displacements(&recv_counts)?;
    {
        let send_partition = Partition::new(&send[..], send_counts, send_displs);
        let mut recv_partition = PartitionMut::new(&mut recv[..], recv_counts, recv_displs);
        comm.all_to_all_varcount_into(&send_partition, &mut recv_partition);
    }

    plan.unpack(dest, &recv, dst)
}

/// The minimum or maximum of `local` over every process of `comm`
pub fn all_reduce_extremum<C: Communicator, T: Equivalence + Copy + Default>(
    comm: &C,
    local: T,
    op: Extremum,
) -> T {
    let mut global = T::default();
    match op {
        Extremum::Min => comm.all_reduce_into(&local, &mut global, SystemOperation::min()),
        Extremum::Max => comm.all_reduce_into(&local, &mut global, SystemOperation::max()),
    }
    global
}

/// Run `steps` redistribution steps from `source` to `dest`.
///
/// Intermediate results alternate between `dest` and `inter` so that the last step writes
/// to `dest`. `source` is only read. `inter` is not touched if `steps == 1`.
pub fn chain<T>(
    steps: usize,
    source: &[T],
    dest: &mut [T],
    inter: &mut [T],
    mut step: impl FnMut(usize, &[T], &mut [T]) -> Result<(), LayoutError>,
) -> Result<(), LayoutError> {
    for k in 0..steps {
        let into_dest = (steps - 1 - k) % 2 == 0;
        match (k == 0, into_dest) {
            (true, true) => step(k, source, dest)?,
            (true, false) => step(k, source, inter)?,
            (false, true) => step(k, inter, dest)?,
            (false, false) => step(k, dest, inter)?,
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test {
    use super::{
        block_len, chain, copy_block, counts_and_displacements, global_view, intersect,
        permute_local, ExchangePlan,
    };
    use crate::{
        layout::{Layout, TransposeKind},
        process_grid::{coordinates_of, rank_of},
        types::{ErrorKind, LayoutError},
    };
    use itertools::Itertools;
    use mpi::Count;
    use ndarray::{ArrayViewD, ArrayViewMutD, IxDyn};

    /// The test function `I * n4 * n3 * n2 + J * n4 * n3 + K * n4 + L`, for any dimension
    pub(crate) fn f(global: &[usize], global_shape: &[usize]) -> f64 {
        global
            .iter()
            .zip(global_shape)
            .fold(0, |acc, (g, n)| acc * n + g) as f64
    }

    /// The local array of `layout` filled with `f`
    pub(crate) fn fill(layout: &Layout, buffer_size: usize) -> Vec<f64> {
        let mut data = vec![-1.0; buffer_size];
        let shape = layout.shape().to_vec();
        for (offset, local) in shape
            .iter()
            .map(|n| 0..*n)
            .multi_cartesian_product()
            .enumerate()
        {
            data[offset] = f(&layout.global_indices(&local), layout.global_shape());
        }
        data
    }

    /// Check that the local array of `layout` holds `f`
    pub(crate) fn check(layout: &Layout, data: &[f64]) {
        let shape = layout.shape().to_vec();
        for (offset, local) in shape
            .iter()
            .map(|n| 0..*n)
            .multi_cartesian_product()
            .enumerate()
        {
            let global = layout.global_indices(&local);
            assert_eq!(
                data[offset],
                f(&global, layout.global_shape()),
                "layout {} local {local:?} global {global:?}",
                layout.name()
            );
        }
    }

    /// The layout `dims_order` on every process of the grid `nprocs`, in rank order
    pub(crate) fn all_ranks(
        name: &str,
        nprocs: &[usize],
        dims_order: &[usize],
        global_shape: &[usize],
    ) -> Vec<Layout> {
        (0..nprocs.iter().product())
            .map(|rank| {
                Layout::new(
                    name,
                    nprocs,
                    dims_order,
                    global_shape,
                    &coordinates_of(rank, nprocs),
                )
                .unwrap()
            })
            .collect()
    }

    /// Carry out one exchange for every process at once. `peers[r]` lists the ranks of the
    /// communicator that process `r` exchanges with, in communicator order.
    pub(crate) fn simulate(
        plans: &[ExchangePlan],
        peers: &[Vec<usize>],
        sources: &[Layout],
        src: &[Vec<f64>],
        dests: &[Layout],
        dst: &mut [Vec<f64>],
    ) {
        let nranks = plans.len();
        // messages[from][to]
        let mut messages = vec![vec![vec![]; nranks]; nranks];
        for r in 0..nranks {
            let packed = plans[r].pack(&sources[r], &src[r]).unwrap();
            let mut offset = 0;
            for (q, count) in plans[r].send_counts().iter().enumerate() {
                messages[r][peers[r][q]] = packed[offset..offset + count].to_vec();
                offset += count;
            }
        }
        for r in 0..nranks {
            let received = peers[r]
                .iter()
                .flat_map(|q| messages[*q][r].iter().copied())
                .collect_vec();
            assert_eq!(received.len(), plans[r].recv_counts().iter().sum::<usize>());
            plans[r].unpack(&dests[r], &received, &mut dst[r]).unwrap();
        }
    }

    /// Transpose the data of every process from `sources` to `dests` in one step
    pub(crate) fn simulate_step(
        sources: &[Layout],
        src: &[Vec<f64>],
        dests: &[Layout],
        dst: &mut [Vec<f64>],
    ) {
        let nprocs = sources[0].nprocs().to_vec();
        match sources[0].transpose_kind(&dests[0]).unwrap() {
            TransposeKind::Local => {
                for r in 0..sources.len() {
                    permute_local(&sources[r], &src[r], &dests[r], &mut dst[r]).unwrap();
                }
            }
            TransposeKind::Exchange { axis } => {
                let plans = sources
                    .iter()
                    .zip(dests)
                    .map(|(s, d)| ExchangePlan::along_axis(s, d, axis))
                    .collect_vec();
                let peers = (0..sources.len())
                    .map(|r| {
                        let mut coords = coordinates_of(r, &nprocs);
                        (0..nprocs[axis])
                            .map(|q| {
                                coords[axis] = q;
                                rank_of(&coords, &nprocs)
                            })
                            .collect_vec()
                    })
                    .collect_vec();
                simulate(&plans, &peers, sources, src, dests, dst);
            }
        }
    }

    #[test]
    fn test_intersect() {
        assert_eq!(
            intersect(&[0..5, 2..8], &[3..10, 0..4]),
            vec![3..5, 2..4]
        );
        let empty = intersect(&[0..5, 2..8], &[6..10, 0..4]);
        assert_eq!(block_len(&empty), 0);
    }

    #[test]
    fn test_chain_alternates() {
        let source = [1];
        let mut dest = [0];
        let mut inter = [0];
        let mut visited = vec![];
        chain(3, &source, &mut dest, &mut inter, |k, src, dst| {
            visited.push((k, src[0]));
            dst[0] = src[0] + 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(visited, vec![(0, 1), (1, 2), (2, 3)]);
        assert_eq!(dest[0], 4);
        assert_eq!(source[0], 1);

        let mut dest = [0];
        let mut inter = [0];
        chain(2, &source, &mut dest, &mut inter, |_, src, dst| {
            dst[0] = src[0] * 10;
            Ok(())
        })
        .unwrap();
        assert_eq!(dest[0], 100);
        assert_eq!(inter[0], 10);
    }

    #[test]
    fn test_permute_local() {
        let a = Layout::new("a", &[1], &[0, 1, 2], &[2, 3, 4], &[0]).unwrap();
        let b = Layout::new("b", &[1], &[0, 2, 1], &[2, 3, 4], &[0]).unwrap();
        let src = fill(&a, a.size());
        let mut dst = vec![0.0; b.size()];
        permute_local(&a, &src, &b, &mut dst).unwrap();
        check(&b, &dst);

        let mut short = vec![0.0; b.size() - 1];
        assert_eq!(
            permute_local(&a, &src, &b, &mut short).unwrap_err().kind(),
            ErrorKind::Usage
        );
    }

    #[test]
    fn test_global_view() {
        // local axes (z, r, theta) of a (4, 3, 2) array
        let l = Layout::new("a", &[2], &[2, 0, 1], &[4, 3, 2], &[1]).unwrap();
        let data = fill(&l, l.size());
        let view = global_view(&l, &data).unwrap();
        assert_eq!(view.shape(), [4, 3, 1]);
        for (index, value) in view.indexed_iter() {
            let global = [index[0], index[1], index[2] + 1];
            assert_eq!(*value, f(&global, l.global_shape()));
        }
    }

    #[test]
    fn test_copy_block() {
        // a 4x4 array starting at (0, 0) and a 2x3 array starting at (2, 1)
        let src = (0..16).collect_vec();
        let mut dst = vec![0; 6];
        let n = copy_block(
            ArrayViewD::from_shape(IxDyn(&[4, 4]), &src[..]).unwrap(),
            &[0, 0],
            ArrayViewMutD::from_shape(IxDyn(&[2, 3]), &mut dst[..]).unwrap(),
            &[2, 1],
            &[3..4, 1..3],
        );
        assert_eq!(n, 2);
        assert_eq!(dst, vec![0, 0, 0, 13, 14, 0]);

        let n = copy_block(
            ArrayViewD::from_shape(IxDyn(&[4, 4]), &src[..]).unwrap(),
            &[0, 0],
            ArrayViewMutD::from_shape(IxDyn(&[2, 3]), &mut dst[..]).unwrap(),
            &[2, 1],
            &[4..4, 1..3],
        );
        assert_eq!(n, 0);
    }

    #[test]
    fn test_counts_and_displacements() {
        let (counts, displs) = counts_and_displacements(&[2, 3, 0, 4]).unwrap();
        assert_eq!(counts, [2, 3, 0, 4]);
        assert_eq!(displs, [0, 2, 5, 5]);

        let big = Count::MAX as usize;
        let e = counts_and_displacements(&[big + 1]).unwrap_err();
        assert_eq!(e, LayoutError::CountOverflow { count: big + 1 });
        assert_eq!(e.kind(), ErrorKind::Usage);
        // the displacement of the last peer no longer fits
        assert!(counts_and_displacements(&[big, 1, 1]).is_err());
    }

    macro_rules! make_tests {
        ($name:ident, $nprocs:expr, $shape:expr) => {
            paste::item! {
                #[test]
                fn [< test_transpose_chain_ $name >]() {
                    // move data around a cycle of single swaps and back to the start
                    let nprocs = $nprocs;
                    let shape = $shape;
                    let orders: [&[usize]; 7] = [
                        &[0, 3, 1, 2],
                        &[0, 3, 2, 1],
                        &[0, 1, 2, 3],
                        &[2, 1, 0, 3],
                        &[2, 3, 0, 1],
                        &[0, 3, 2, 1],
                        &[0, 3, 1, 2],
                    ];
                    let layouts = orders
                        .iter()
                        .map(|o| all_ranks("l", &nprocs, o, &shape))
                        .collect_vec();
                    let size = layouts
                        .iter()
                        .flatten()
                        .map(|l| l.size())
                        .max()
                        .unwrap();
                    let mut data = layouts[0].iter().map(|l| fill(l, size)).collect_vec();
                    let original = data.clone();
                    for (from, to) in layouts.iter().tuple_windows() {
                        let mut next = vec![vec![0.0; size]; data.len()];
                        simulate_step(from, &data, to, &mut next);
                        for (l, d) in to.iter().zip(&next) {
                            check(l, d);
                        }
                        data = next;
                    }
                    for (l, (a, b)) in layouts[6].iter().zip(data.iter().zip(&original)) {
                        assert_eq!(a[..l.size()], b[..l.size()]);
                    }
                }
            }
        };
    }

    make_tests!(grid_1x1, [1, 1], [4, 3, 5, 2]);
    make_tests!(grid_2x2, [2, 2], [10, 10, 10, 10]);
    make_tests!(grid_3x2, [3, 2], [7, 5, 4, 6]);
    make_tests!(grid_2x3_uneven, [2, 3], [5, 4, 7, 4]);
    make_tests!(grid_4x1_empty, [4, 1], [3, 2, 3, 3]);
    make_tests!(grid_1x4_empty, [1, 4], [3, 2, 2, 2]);
}
