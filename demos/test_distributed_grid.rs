//? mpirun -n {{NPROCESSES}}

use approx::assert_relative_eq;
use mpi::{environment::Universe, traits::Communicator};
use ndarray::Dimension;
use phasegrid::{
    process_grid::compute_2d_process_grid, traits::LayoutHandler, types::ErrorKind,
    DistributedGrid, LayoutConfig, LayoutManager,
};

fn f(global: &[usize], shape: &[usize]) -> f64 {
    global
        .iter()
        .zip(shape)
        .fold(0, |acc, (g, n)| acc * n + g) as f64
}

fn eta_grid(npts: &[usize]) -> Vec<Vec<f64>> {
    npts.iter()
        .map(|n| (0..*n).map(|i| i as f64 / *n as f64).collect())
        .collect()
}

fn fill<H: LayoutHandler>(grid: &mut DistributedGrid<'_, f64, H>) {
    let shape = grid.n_global_coords().to_vec();
    let layout = grid.layout();
    for (index, value) in grid.view_mut().indexed_iter_mut() {
        *value = f(&layout.global_indices(index.slice()), &shape);
    }
}

fn check<H: LayoutHandler>(grid: &DistributedGrid<'_, f64, H>) {
    for (index, value) in grid.view().indexed_iter() {
        let global = grid.get_global_indices(index.slice());
        assert_eq!(*value, f(&global, grid.n_global_coords()));
    }
}

/// Test moving a grid through its layouts
fn test_set_layout<C: Communicator>(comm: &C) {
    let npts = [10, 10, 10, 10];
    let nprocs = compute_2d_process_grid(&npts, comm.size() as usize).unwrap();
    let manager = LayoutManager::new(comm, &LayoutConfig::gyrokinetic(), &nprocs, &npts).unwrap();
    let eta = eta_grid(&npts);
    let mut grid = DistributedGrid::new(&eta, &manager, "flux_surface", true).unwrap();
    fill(&mut grid);

    for name in ["v_parallel", "poloidal", "flux_surface", "poloidal", "v_parallel"] {
        grid.set_layout(name).unwrap();
        assert_eq!(grid.current_layout(), name);
        check(&grid);

        // the last axes are contiguous in every layout
        let n = grid.layout().ndims();
        let fixed = vec![0; n - 1];
        if grid.layout().size() > 0 {
            assert_eq!(grid.get_1d_slice(&fixed).unwrap().strides(), [1]);
            let s = grid.get_2d_slice(&fixed[1..]).unwrap();
            assert_eq!(s.strides()[1], 1);
            assert_eq!(s.strides()[0], s.shape()[1] as isize);
        }
    }
}

/// Test that saved values survive transposes
fn test_save_and_restore<C: Communicator>(comm: &C) {
    let npts = [8, 6, 4, 6];
    let nprocs = compute_2d_process_grid(&npts, comm.size() as usize).unwrap();
    let manager = LayoutManager::new(comm, &LayoutConfig::gyrokinetic(), &nprocs, &npts).unwrap();
    let eta = eta_grid(&npts);
    let mut grid = DistributedGrid::new(&eta, &manager, "v_parallel", true).unwrap();
    fill(&mut grid);

    grid.save_grid_values().unwrap();
    assert_eq!(
        grid.save_grid_values().unwrap_err().kind(),
        ErrorKind::Usage
    );
    grid.set_layout("flux_surface").unwrap();
    grid.local_data_mut().fill(-1.0);
    grid.set_layout("poloidal").unwrap();
    grid.restore_grid_values().unwrap();
    assert_eq!(grid.current_layout(), "v_parallel");
    check(&grid);
    assert!(grid.restore_grid_values().is_err());

    grid.save_grid_values().unwrap();
    grid.free_grid_save().unwrap();
    assert!(grid.free_grid_save().is_err());
}

/// Test reductions over the whole grid and over fixed indices
fn test_min_max<C: Communicator>(comm: &C) {
    let npts = [10, 10, 10, 10];
    let nprocs = compute_2d_process_grid(&npts, comm.size() as usize).unwrap();
    let manager = LayoutManager::new(comm, &LayoutConfig::gyrokinetic(), &nprocs, &npts).unwrap();
    let eta = eta_grid(&npts);
    let mut grid = DistributedGrid::new(&eta, &manager, "flux_surface", false).unwrap();
    fill(&mut grid);

    assert_relative_eq!(grid.get_min(None), 0.0);
    assert_relative_eq!(grid.get_max(None), 9999.0);
    // r is distributed so not every process holds r = 7
    assert_relative_eq!(grid.get_min(Some((0, 7))), 7000.0);
    assert_relative_eq!(grid.get_max(Some((0, 7))), 7999.0);
    assert_relative_eq!(grid.get_max(Some((3, 2))), 9992.0);
    grid.set_layout("poloidal").unwrap();
    assert_relative_eq!(grid.get_min(Some((2, 5))), 50.0);
}

/// Run tests
fn main() {
    let universe: Universe = mpi::initialize().unwrap();
    let world = universe.world();
    let rank = world.rank();

    if rank == 0 {
        println!("Testing set layout");
    }
    test_set_layout(&world);

    if rank == 0 {
        println!("Testing save and restore");
    }
    test_save_and_restore(&world);

    if rank == 0 {
        println!("Testing min and max");
    }
    test_min_max(&world);
}
