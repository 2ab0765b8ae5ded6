//? mpirun -n {{NPROCESSES}}

use itertools::Itertools;
use mpi::{environment::Universe, traits::Communicator};
use phasegrid::{
    layout::Layout, process_grid::compute_2d_process_grid_from_max, traits::LayoutHandler,
    LayoutConfig, LayoutSwapper,
};

fn f(global: &[usize], shape: &[usize]) -> f64 {
    global
        .iter()
        .zip(shape)
        .fold(0, |acc, (g, n)| acc * n + g) as f64
}

fn fill(layout: &Layout, data: &mut [f64]) {
    for (offset, local) in layout
        .shape()
        .iter()
        .map(|n| 0..*n)
        .multi_cartesian_product()
        .enumerate()
    {
        data[offset] = f(&layout.global_indices(&local), layout.global_shape());
    }
}

fn check(layout: &Layout, data: &[f64]) {
    for (offset, local) in layout
        .shape()
        .iter()
        .map(|n| 0..*n)
        .multi_cartesian_product()
        .enumerate()
    {
        let global = layout.global_indices(&local);
        assert_eq!(
            data[offset],
            f(&global, layout.global_shape()),
            "wrong value in layout {} at {global:?}",
            layout.name()
        );
    }
}

/// Layouts of the 3D fields (r, theta, z)
///
/// The 2D group is used to solve for the fields, the 1D groups to interpolate them.
fn field_groups() -> Vec<LayoutConfig> {
    vec![
        LayoutConfig::poisson(),
        LayoutConfig::new().with("v_parallel_1d", &[0, 2, 1]),
        LayoutConfig::new()
            .with("mode_solve_1d", &[1, 2, 0])
            .with("poloidal_1d", &[2, 1, 0]),
    ]
}

/// Test transposes inside and between layout groups
fn test_swapper<C: Communicator>(comm: &C, replica_size: usize) {
    let npts = [9, 8, 7];
    let [p0, p1] = compute_2d_process_grid_from_max(npts[0], npts[2], replica_size).unwrap();
    let nprocs = vec![vec![p0, p1], vec![p0], vec![p1]];
    let swapper =
        LayoutSwapper::new(comm, &field_groups(), &nprocs, &npts, "v_parallel_2d").unwrap();

    let size = swapper.buffer_size();
    let mut source = vec![0.0; size];
    let mut dest = vec![0.0; size];

    fill(swapper.layout("v_parallel_2d").unwrap(), &mut source);
    let original = source.clone();
    let mut current = "v_parallel_2d";
    for next in [
        "mode_solve",
        "v_parallel_1d",
        "poloidal_1d",
        "mode_solve_1d",
        "v_parallel_2d",
    ] {
        swapper
            .transpose(&source, &mut dest, current, next, None)
            .unwrap();
        check(swapper.layout(next).unwrap(), &dest);
        assert!(
            swapper.current_manager().layouts().contains(next),
            "current manager does not hold {next}"
        );
        std::mem::swap(&mut source, &mut dest);
        current = next;
    }
    let n = swapper.layout("v_parallel_2d").unwrap().size();
    assert_eq!(source[..n], original[..n]);
}

/// Test that a group without a pivot is rejected
fn test_no_pivot<C: Communicator>(comm: &C) {
    let groups = [
        LayoutConfig::poisson(),
        LayoutConfig::new().with("poloidal_1d", &[2, 1, 0]),
    ];
    let n = comm.size() as usize;
    let nprocs = [vec![n, 1], vec![n]];
    let result = LayoutSwapper::new(comm, &groups, &nprocs, &[8, 8, 8], "mode_solve");
    assert!(result.is_err());
}

/// Run tests
fn main() {
    let universe: Universe = mpi::initialize().unwrap();
    let world = universe.world();
    let rank = world.rank();
    let size = world.size() as usize;

    if rank == 0 {
        println!("Testing layout swapper with one replica");
    }
    test_swapper(&world, size);

    if size % 2 == 0 {
        if rank == 0 {
            println!("Testing layout swapper with two replicas");
        }
        test_swapper(&world, size / 2);
    }

    if rank == 0 {
        println!("Testing missing pivots");
    }
    test_no_pivot(&world);
}
