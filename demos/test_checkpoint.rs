//? mpirun -n {{NPROCESSES}} --features "serde"

#[cfg(feature = "serde")]
use mpi::{
    environment::Universe,
    traits::{Communicator, CommunicatorCollectives},
};
#[cfg(feature = "serde")]
use ndarray::Dimension;
#[cfg(feature = "serde")]
use phasegrid::{
    process_grid::compute_2d_process_grid,
    traits::{LayoutHandler, RONCheckpoint},
    types::ErrorKind,
    DistributedGrid, LayoutConfig, LayoutManager,
};

#[cfg(feature = "serde")]
fn value(global: &[usize]) -> f64 {
    global
        .iter()
        .enumerate()
        .map(|(i, g)| (i + 1) as f64 * (*g as f64).sin())
        .sum()
}

#[cfg(feature = "serde")]
fn fill<H: LayoutHandler>(grid: &mut DistributedGrid<'_, f64, H>) {
    let layout = grid.layout();
    for (index, v) in grid.view_mut().indexed_iter_mut() {
        *v = value(&layout.global_indices(index.slice()));
    }
}

#[cfg(feature = "serde")]
fn check<H: LayoutHandler>(grid: &DistributedGrid<'_, f64, H>) {
    for (index, v) in grid.view().indexed_iter() {
        assert_eq!(*v, value(&grid.get_global_indices(index.slice())));
    }
}

#[cfg(feature = "serde")]
fn test_checkpoint<C: Communicator>(comm: &C) {
    let npts = [6, 5, 4, 6];
    let folder = format!("_examples_checkpoint_{}ranks", comm.size());
    let eta = npts
        .iter()
        .map(|n| (0..*n).map(|i| i as f64).collect::<Vec<_>>())
        .collect::<Vec<_>>();

    let nprocs = compute_2d_process_grid(&npts, comm.size() as usize).unwrap();
    let manager = LayoutManager::new(comm, &LayoutConfig::gyrokinetic(), &nprocs, &npts).unwrap();
    let mut grid = DistributedGrid::new(&eta, &manager, "poloidal", false).unwrap();
    fill(&mut grid);
    grid.write_checkpoint(&folder, 12, "grid").unwrap();

    // read back on the same processes
    let mut loaded = DistributedGrid::new(&eta, &manager, "poloidal", false).unwrap();
    loaded.load_checkpoint(&folder, None, "grid").unwrap();
    check(&loaded);

    // the dimension ordering must match
    let mut wrong = DistributedGrid::<f64, _>::new(&eta, &manager, "v_parallel", false).unwrap();
    let e = wrong.load_checkpoint(&folder, Some(12), "grid").unwrap_err();
    assert_eq!(e.kind(), ErrorKind::Io);

    // read back with a different process grid
    let flipped = [nprocs[1], nprocs[0]];
    if flipped[0] <= npts[0].min(npts[3]) && flipped[1] <= npts[2].min(npts[3]) {
        let other =
            LayoutManager::new(comm, &LayoutConfig::gyrokinetic(), &flipped, &npts).unwrap();
        let mut reread = DistributedGrid::new(&eta, &other, "poloidal", false).unwrap();
        reread.load_checkpoint(&folder, Some(12), "grid").unwrap();
        check(&reread);
    }

    comm.barrier();
    if comm.rank() == 0 {
        std::fs::remove_dir_all(&folder).unwrap();
    }
}

#[cfg(feature = "serde")]
fn main() {
    let universe: Universe = mpi::initialize().unwrap();
    let world = universe.world();

    if world.rank() == 0 {
        println!("Testing checkpoints");
    }
    test_checkpoint(&world);
}
#[cfg(not(feature = "serde"))]
fn main() {}
