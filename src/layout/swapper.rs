//! Transposes between layouts on different process grids
use super::{
    exchange::{all_reduce_extremum, chain, exchange, intersect, ExchangePlan},
    Layout, LayoutManager,
};
use crate::{
    process_grid::{coordinates_of, rank_of},
    traits::LayoutHandler,
    types::{Extremum, LayoutConfig, LayoutError},
};
use itertools::{izip, Itertools};
use mpi::{
    topology::{Color, SimpleCommunicator},
    traits::{Communicator, CommunicatorCollectives, Equivalence},
    Count,
};
use std::{
    cell::Cell,
    collections::{HashMap, VecDeque},
};
use tracing::{debug, info};

/// The position of the processes of a replica inside one layout group.
///
/// A group with fewer processes than the largest group is duplicated: each process belongs
/// to one copy of the group and has a position inside that copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct GroupPlacement {
    reference: Vec<usize>,
    nprocs: Vec<usize>,
    retained: Option<Vec<usize>>,
}

impl GroupPlacement {
    /// Place the process grid `nprocs` inside the process grid `reference`.
    ///
    /// If `nprocs` matches a subsequence of the axes of `reference` the group follows those
    /// axes, so that each copy of the group is a slice of the reference grid. Otherwise the
    /// copies are contiguous blocks of ranks.
    pub(crate) fn new(reference: &[usize], nprocs: &[usize]) -> Result<Self, LayoutError> {
        let total = reference.iter().product::<usize>();
        let n = nprocs.iter().product::<usize>();
        if n == 0 || total % n != 0 {
            return Err(LayoutError::CommunicatorSizeMismatch {
                expected: n,
                actual: total,
            });
        }
        let mut retained = vec![];
        let mut next = 0;
        for p in nprocs {
            match (next..reference.len()).find(|a| reference[*a] == *p) {
                Some(a) => {
                    retained.push(a);
                    next = a + 1;
                }
                None => break,
            }
        }
        Ok(Self {
            reference: reference.to_vec(),
            nprocs: nprocs.to_vec(),
            retained: (retained.len() == nprocs.len()).then_some(retained),
        })
    }

    /// Number of processes in one copy of the group
    pub(crate) fn group_size(&self) -> usize {
        self.nprocs.iter().product()
    }

    /// The copy of the group containing the process with replica rank `rank`, and the
    /// position of that process inside the copy
    pub(crate) fn place(&self, rank: usize) -> (usize, usize) {
        match &self.retained {
            Some(axes) => {
                let coords = coordinates_of(rank, &self.reference);
                let (inside, outside): (Vec<_>, Vec<_>) =
                    (0..self.reference.len()).partition(|a| axes.contains(a));
                let position = rank_of(
                    &inside.iter().map(|a| coords[*a]).collect_vec(),
                    &self.nprocs,
                );
                let copy = rank_of(
                    &outside.iter().map(|a| coords[*a]).collect_vec(),
                    &outside.iter().map(|a| self.reference[*a]).collect_vec(),
                );
                (copy, position)
            }
            None => (rank / self.group_size(), rank % self.group_size()),
        }
    }
}

/// For each pair of groups, the first pair of layouts (one from each group) that share a
/// dimension ordering
pub(crate) fn find_pivots(groups: &[LayoutConfig]) -> Vec<Vec<Option<(usize, usize)>>> {
    groups
        .iter()
        .enumerate()
        .map(|(i, a)| {
            groups
                .iter()
                .enumerate()
                .map(|(j, b)| {
                    if i == j {
                        return None;
                    }
                    a.layouts()
                        .iter()
                        .enumerate()
                        .cartesian_product(b.layouts().iter().enumerate())
                        .find(|((_, x), (_, y))| x.dims_order == y.dims_order)
                        .map(|((p, _), (q, _))| (p, q))
                })
                .collect()
        })
        .collect()
}

/// Shortest sequence of groups from `from` to `to` in which consecutive groups share a pivot
pub(crate) fn group_route(
    pivots: &[Vec<Option<(usize, usize)>>],
    from: usize,
    to: usize,
) -> Option<Vec<usize>> {
    let mut previous = vec![None; pivots.len()];
    let mut visited = vec![false; pivots.len()];
    let mut queue = VecDeque::from([from]);
    visited[from] = true;
    while let Some(i) = queue.pop_front() {
        if i == to {
            let mut route = vec![to];
            let mut current = to;
            while let Some(p) = previous[current] {
                route.push(p);
                current = p;
            }
            route.reverse();
            return Some(route);
        }
        for (j, pivot) in pivots[i].iter().enumerate() {
            if pivot.is_some() && !visited[j] {
                visited[j] = true;
                previous[j] = Some(i);
                queue.push_back(j);
            }
        }
    }
    None
}

/// The exchange moving a pivot layout from one group to the same dimension ordering in
/// another group.
///
/// `source` and `dest` are the layouts on the process with replica rank `rank`. A process
/// sends to the processes of its own copy of the source group.
pub(crate) fn pivot_plan(
    source: &Layout,
    source_placement: &GroupPlacement,
    dest: &Layout,
    dest_placement: &GroupPlacement,
    rank: usize,
    nranks: usize,
) -> ExchangePlan {
    let own_source = source.block();
    let own_dest = dest.block();
    let (own_copy, _) = source_placement.place(rank);
    let empty = vec![0..0; source.ndims()];
    let (send, recv) = (0..nranks)
        .map(|r| {
            let (copy, source_position) = source_placement.place(r);
            if copy != own_copy {
                return (empty.clone(), empty.clone());
            }
            let (_, dest_position) = dest_placement.place(r);
            (
                intersect(
                    &own_source,
                    &dest.block_at(&coordinates_of(dest_position, dest.nprocs())),
                ),
                intersect(
                    &source.block_at(&coordinates_of(source_position, source.nprocs())),
                    &own_dest,
                ),
            )
        })
        .unzip();
    ExchangePlan::new(dest.dims_order().to_vec(), send, recv)
}

enum Step<'a> {
    Within {
        group: usize,
        from: &'a str,
        to: &'a str,
    },
    Across {
        from_group: usize,
        from_layout: usize,
        to_group: usize,
        to_layout: usize,
    },
}

/// Layouts spread over several layout groups, each with its own process grid.
///
/// The processes are split into replicas the size of the largest process grid. Inside a
/// replica each group is duplicated as often as needed to use every process. Data moves
/// between groups through pivot layouts: layouts of two groups that share a dimension
/// ordering.
pub struct LayoutSwapper {
    world: SimpleCommunicator,
    replica: SimpleCommunicator,
    managers: Vec<LayoutManager>,
    placements: Vec<GroupPlacement>,
    groups: HashMap<String, usize>,
    pivots: Vec<Vec<Option<(usize, usize)>>>,
    current: Cell<usize>,
    buffer_size: usize,
}

impl LayoutSwapper {
    /// Create new
    ///
    /// `layout_groups[i]` is distributed over the process grid `nprocs[i]`. The size of
    /// `comm` must be a multiple of the largest process grid. Layout names must be unique
    /// across all groups and `initial` names the layout the data starts in.
    pub fn new<C: Communicator>(
        comm: &C,
        layout_groups: &[LayoutConfig],
        nprocs: &[Vec<usize>],
        global_shape: &[usize],
        initial: &str,
    ) -> Result<Self, LayoutError> {
        if layout_groups.is_empty() {
            return Err(LayoutError::EmptyConfiguration);
        }
        if layout_groups.len() != nprocs.len() {
            return Err(LayoutError::GroupCountMismatch {
                groups: layout_groups.len(),
                grids: nprocs.len(),
            });
        }

        let mut groups = HashMap::new();
        for (i, config) in layout_groups.iter().enumerate() {
            config.validate()?;
            for spec in config.layouts() {
                if groups.insert(spec.name.clone(), i).is_some() {
                    return Err(LayoutError::DuplicateLayoutName {
                        name: spec.name.clone(),
                    });
                }
            }
        }
        let current = *groups.get(initial).ok_or_else(|| LayoutError::UnknownLayout {
            name: initial.to_string(),
        })?;

        let pivots = find_pivots(layout_groups);
        if let Some(group) =
            (0..layout_groups.len()).find(|g| group_route(&pivots, 0, *g).is_none())
        {
            return Err(LayoutError::NoPivot { group });
        }

        let largest = nprocs
            .iter()
            .position_max_by_key(|n| n.iter().product::<usize>())
            .unwrap_or(0);
        let replica_size = nprocs[largest].iter().product::<usize>();
        let size = comm.size() as usize;
        if replica_size == 0 || size % replica_size != 0 {
            return Err(LayoutError::CommunicatorSizeMismatch {
                expected: replica_size,
                actual: size,
            });
        }
        let placements = nprocs
            .iter()
            .map(|n| GroupPlacement::new(&nprocs[largest], n))
            .collect::<Result<Vec<_>, _>>()?;

        let world = comm.duplicate();
        let replica_index = comm.rank() as usize / replica_size;
        let replica = comm
            .split_by_color(Color::with_value(replica_index as Count))
            .ok_or(LayoutError::CommunicatorSizeMismatch {
                expected: replica_size,
                actual: size,
            })?;

        let managers = izip!(layout_groups, nprocs, &placements)
            .map(|(config, n, placement)| {
                let (copy, position) = placement.place(replica.rank() as usize);
                let group_comm = replica
                    .split_by_color_with_key(Color::with_value(copy as Count), position as Count)
                    .ok_or(LayoutError::CommunicatorSizeMismatch {
                        expected: placement.group_size(),
                        actual: replica_size,
                    })?;
                LayoutManager::new(&group_comm, config, n, global_shape)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let buffer_size = managers
            .iter()
            .map(|m| m.layouts().buffer_size())
            .max()
            .unwrap_or(0);

        if world.rank() == 0 {
            info!(
                groups = layout_groups.len(),
                replicas = size / replica_size,
                "created layout swapper"
            );
        }

        Ok(Self {
            world,
            replica,
            managers,
            placements,
            groups,
            pivots,
            current: Cell::new(current),
            buffer_size,
        })
    }

    /// The communicator of all processes
    pub fn world(&self) -> &SimpleCommunicator {
        &self.world
    }

    /// The communicator of the processes holding one full copy of the data
    pub fn replica(&self) -> &SimpleCommunicator {
        &self.replica
    }

    /// The layout managers, one per group
    pub fn managers(&self) -> &[LayoutManager] {
        &self.managers
    }

    /// The group containing the layout called `name`
    pub fn group_of(&self, name: &str) -> Result<usize, LayoutError> {
        self.groups
            .get(name)
            .copied()
            .ok_or_else(|| LayoutError::UnknownLayout {
                name: name.to_string(),
            })
    }

    /// The manager of the group that the data was last moved to
    pub fn current_manager(&self) -> &LayoutManager {
        &self.managers[self.current.get()]
    }

    /// The largest local size of any layout of any group
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Move the values in `source`, stored in the layout `source_name`, into `dest` in the
    /// layout `dest_name`.
    ///
    /// Layouts of different groups are connected through pivot layouts. Intermediate results
    /// are stored in `buf`, or in an internal buffer if `buf` is `None`.
    pub fn transpose<T: Equivalence + Copy + Default>(
        &self,
        source: &[T],
        dest: &mut [T],
        source_name: &str,
        dest_name: &str,
        buf: Option<&mut [T]>,
    ) -> Result<(), LayoutError> {
        let from = self.group_of(source_name)?;
        let to = self.group_of(dest_name)?;
        if from == to {
            self.managers[from].transpose(source, dest, source_name, dest_name, buf)?;
            self.current.set(to);
            return Ok(());
        }
        for len in [Some(source.len()), Some(dest.len()), buf.as_ref().map(|b| b.len())]
            .into_iter()
            .flatten()
        {
            if len < self.buffer_size {
                return Err(LayoutError::BufferTooSmall {
                    len,
                    required: self.buffer_size,
                });
            }
        }

        let steps = self.steps(from, to, source_name, dest_name)?;
        debug!(
            from = source_name,
            to = dest_name,
            steps = steps.len(),
            "transpose between layout groups"
        );

        let mut scratch = vec![];
        let inter: &mut [T] = match buf {
            Some(b) => b,
            None => {
                if steps.len() > 1 {
                    scratch = vec![T::default(); self.buffer_size];
                }
                &mut scratch
            }
        };
        chain(steps.len(), source, dest, inter, |k, src, dst| match &steps[k] {
            Step::Within { group, from, to } => {
                self.managers[*group].transpose(src, dst, from, to, None)
            }
            Step::Across {
                from_group,
                from_layout,
                to_group,
                to_layout,
            } => self.repartition(*from_group, *from_layout, *to_group, *to_layout, src, dst),
        })?;
        self.current.set(to);
        Ok(())
    }

    fn steps<'a>(
        &'a self,
        from: usize,
        to: usize,
        source_name: &'a str,
        dest_name: &'a str,
    ) -> Result<Vec<Step<'a>>, LayoutError> {
        let no_route = || LayoutError::NoRoute {
            from: source_name.to_string(),
            to: dest_name.to_string(),
        };
        let route = group_route(&self.pivots, from, to).ok_or_else(no_route)?;
        let mut steps = vec![];
        let mut name = source_name;
        for (g, h) in route.into_iter().tuple_windows() {
            let (a, b) = self.pivots[g][h].ok_or_else(no_route)?;
            let pivot = self.managers[g].layouts().get(a).name();
            if name != pivot {
                steps.push(Step::Within {
                    group: g,
                    from: name,
                    to: pivot,
                });
            }
            steps.push(Step::Across {
                from_group: g,
                from_layout: a,
                to_group: h,
                to_layout: b,
            });
            name = self.managers[h].layouts().get(b).name();
        }
        if name != dest_name {
            steps.push(Step::Within {
                group: to,
                from: name,
                to: dest_name,
            });
        }
        Ok(steps)
    }

    fn repartition<T: Equivalence + Copy + Default>(
        &self,
        from_group: usize,
        from_layout: usize,
        to_group: usize,
        to_layout: usize,
        src: &[T],
        dst: &mut [T],
    ) -> Result<(), LayoutError> {
        let source = self.managers[from_group].layouts().get(from_layout);
        let dest = self.managers[to_group].layouts().get(to_layout);
        let plan = pivot_plan(
            source,
            &self.placements[from_group],
            dest,
            &self.placements[to_group],
            self.replica.rank() as usize,
            self.replica.size() as usize,
        );
        exchange(&self.replica, &plan, source, src, dest, dst)
    }
}

impl LayoutHandler for LayoutSwapper {
    fn layout(&self, name: &str) -> Result<&Layout, LayoutError> {
        self.managers[self.group_of(name)?].layouts().layout(name)
    }

    fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn transpose<T: Equivalence + Copy + Default>(
        &self,
        source: &[T],
        dest: &mut [T],
        source_name: &str,
        dest_name: &str,
        buf: Option<&mut [T]>,
    ) -> Result<(), LayoutError> {
        LayoutSwapper::transpose(self, source, dest, source_name, dest_name, buf)
    }

    fn all_reduce<T: Equivalence + Copy + Default>(&self, local: T, op: Extremum) -> T {
        all_reduce_extremum(&self.replica, local, op)
    }

    fn barrier(&self) {
        self.world.barrier();
    }

    fn rank(&self) -> usize {
        self.world.rank() as usize
    }

    fn size(&self) -> usize {
        self.world.size() as usize
    }
}
