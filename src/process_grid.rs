//! Process grids
use crate::types::LayoutError;
use itertools::Itertools;

/// Split `n` indices over `p` processes.
///
/// Returns the start and the number of indices of each process. The counts differ by at most
/// one and the first `n % p` processes hold the extra index. If `p > n` the trailing processes
/// hold no indices.
pub fn balanced_split(n: usize, p: usize) -> (Vec<usize>, Vec<usize>) {
    let base = n / p;
    let rem = n % p;
    let lengths = (0..p).map(|rank| base + usize::from(rank < rem)).collect_vec();
    let starts = lengths
        .iter()
        .scan(0, |state, &x| {
            let old = *state;
            *state += x;
            Some(old)
        })
        .collect_vec();
    (starts, lengths)
}

/// Coordinates of `rank` in a row-major process grid with extents `dims`
pub fn coordinates_of(rank: usize, dims: &[usize]) -> Vec<usize> {
    let mut coords = vec![0; dims.len()];
    let mut rest = rank;
    for (c, d) in coords.iter_mut().zip(dims).rev() {
        *c = rest % d;
        rest /= d;
    }
    coords
}

/// Rank of the process at `coords` in a row-major process grid with extents `dims`
pub fn rank_of(coords: &[usize], dims: &[usize]) -> usize {
    coords.iter().zip(dims).fold(0, |rank, (c, d)| rank * d + c)
}

/// Choose a 2D process grid for a 4D phase-space grid `(r, theta, z, v)`.
///
/// The first process-grid axis distributes `r` or `v` and the second distributes `z` or `v`
/// depending on the layout, so the number of processes along each axis is bounded by the
/// shorter of the two.
pub fn compute_2d_process_grid(
    global_shape: &[usize; 4],
    nprocs: usize,
) -> Result<[usize; 2], LayoutError> {
    let max0 = global_shape[0].min(global_shape[3]);
    let max1 = global_shape[2].min(global_shape[3]);
    compute_2d_process_grid_from_max(max0, max1, nprocs)
}

/// Choose a 2D process grid with at most `max0` and `max1` processes along each axis.
///
/// Among the factorisations `p0 * p1 == nprocs` the one with the smallest maximal number of
/// points per process is chosen. Ties are broken by preferring the grid closest to a square,
/// then the smaller `p0`.
pub fn compute_2d_process_grid_from_max(
    max0: usize,
    max1: usize,
    nprocs: usize,
) -> Result<[usize; 2], LayoutError> {
    (1..=nprocs)
        .filter(|p0| nprocs % p0 == 0)
        .map(|p0| [p0, nprocs / p0])
        .filter(|[p0, p1]| *p0 <= max0 && *p1 <= max1)
        .min_by_key(|[p0, p1]| {
            (
                max0.div_ceil(*p0).max(max1.div_ceil(*p1)),
                p0.abs_diff(*p1),
                *p0,
            )
        })
        .ok_or(LayoutError::ProcessGridFactorisation {
            nprocs,
            bounds: vec![max0, max1],
        })
}
