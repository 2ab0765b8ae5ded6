//? mpirun -n 4

use mpi::{environment::Universe, traits::Communicator};
use ndarray::Dimension;
use phasegrid::{
    process_grid::compute_2d_process_grid, DistributedGrid, LayoutConfig, LayoutManager,
};
use std::f64::consts::PI;
use tracing_subscriber::EnvFilter;

/// Distributing a 4D distribution function and moving it between layouts
fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let universe: Universe = mpi::initialize().unwrap();
    let comm = universe.world();
    let rank = comm.rank();

    // Points in r, theta, z and v
    let npts = [20, 16, 12, 10];
    let eta_grid = [
        (0..npts[0])
            .map(|i| 0.1 + 0.9 * i as f64 / (npts[0] - 1) as f64)
            .collect::<Vec<_>>(),
        (0..npts[1])
            .map(|i| 2.0 * PI * i as f64 / npts[1] as f64)
            .collect(),
        (0..npts[2])
            .map(|i| 10.0 * i as f64 / npts[2] as f64)
            .collect(),
        (0..npts[3])
            .map(|i| -5.0 + 10.0 * i as f64 / (npts[3] - 1) as f64)
            .collect(),
    ];

    // Split the processes so that every layout can be distributed
    let nprocs = compute_2d_process_grid(&npts, comm.size() as usize).unwrap();
    let manager =
        LayoutManager::new(&comm, &LayoutConfig::gyrokinetic(), &nprocs, &npts).unwrap();

    let mut grid = DistributedGrid::new(&eta_grid, &manager, "flux_surface", true).unwrap();

    // Set a Maxwellian in v, modulated in theta
    let layout = grid.layout();
    for (index, value) in grid.view_mut().indexed_iter_mut() {
        let global = layout.global_indices(index.slice());
        let theta = eta_grid[1][global[1]];
        let v = eta_grid[3][global[3]];
        *value = (-0.5 * v * v).exp() * (1.0 + 0.1 * theta.cos());
    }

    for name in ["v_parallel", "poloidal", "flux_surface"] {
        grid.set_layout(name).unwrap();
        let max = grid.get_max(None);
        if rank == 0 {
            println!(
                "layout {name}: local shape {:?}, maximum {max:.4}",
                grid.layout().shape()
            );
        }
    }

    // Only the processes holding v = 0 see the maximum of the Maxwellian
    let centre = npts[3] / 2;
    let local = grid.local_max(Some((3, centre)));
    println!(
        "process {rank} at {:?}: local maximum at v index {centre} is {local:.4}",
        manager.coords()
    );
}
