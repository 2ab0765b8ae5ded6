//? mpirun -n {{NPROCESSES}}

use itertools::Itertools;
use mpi::{environment::Universe, traits::Communicator};
use phasegrid::{
    layout::Layout, process_grid::compute_2d_process_grid, LayoutConfig, LayoutManager,
};

/// The value I * n4 * n3 * n2 + J * n4 * n3 + K * n4 + L at global index (I, J, K, L)
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

/// Test every transpose between neighbouring layouts
fn test_direct_transposes<C: Communicator>(comm: &C, npts: [usize; 4]) {
    let nprocs = compute_2d_process_grid(&npts, comm.size() as usize).unwrap();
    let manager = LayoutManager::new(comm, &LayoutConfig::gyrokinetic(), &nprocs, &npts).unwrap();
    let layouts = manager.layouts();
    let mut source = vec![0.0; layouts.buffer_size()];
    let mut dest = vec![0.0; layouts.buffer_size()];

    for (from, to) in [
        ("flux_surface", "v_parallel"),
        ("v_parallel", "poloidal"),
        ("poloidal", "v_parallel"),
        ("v_parallel", "flux_surface"),
        ("poloidal", "poloidal"),
    ] {
        fill(layouts.layout(from).unwrap(), &mut source);
        manager.transpose(&source, &mut dest, from, to, None).unwrap();
        check(layouts.layout(to).unwrap(), &dest);
    }
}

/// Test a transpose that needs an intermediate layout
fn test_indirect_transpose<C: Communicator>(comm: &C, npts: [usize; 4]) {
    let nprocs = compute_2d_process_grid(&npts, comm.size() as usize).unwrap();
    let manager = LayoutManager::new(comm, &LayoutConfig::gyrokinetic(), &nprocs, &npts).unwrap();
    let layouts = manager.layouts();
    let mut source = vec![0.0; layouts.buffer_size()];
    let mut dest = vec![0.0; layouts.buffer_size()];
    let mut buf = vec![0.0; layouts.buffer_size()];

    fill(layouts.layout("flux_surface").unwrap(), &mut source);
    let original = source.clone();

    manager
        .transpose(&source, &mut dest, "flux_surface", "poloidal", Some(&mut buf))
        .unwrap();
    check(layouts.layout("poloidal").unwrap(), &dest);
    assert_eq!(source, original);

    dest.fill(0.0);
    manager
        .transpose(&source, &mut dest, "flux_surface", "poloidal", None)
        .unwrap();
    check(layouts.layout("poloidal").unwrap(), &dest);

    manager
        .transpose(&dest, &mut source, "poloidal", "flux_surface", Some(&mut buf))
        .unwrap();
    assert_eq!(source, original);
}

/// Test the layouts 0123, 0321, 1320 and 1302
fn test_odd_layouts<C: Communicator>(comm: &C) {
    let npts = [10, 10, 10, 10];
    let nprocs = compute_2d_process_grid(&npts, comm.size() as usize).unwrap();
    let config = LayoutConfig::new()
        .with("0123", &[0, 1, 2, 3])
        .with("0321", &[0, 3, 2, 1])
        .with("1320", &[1, 3, 2, 0])
        .with("1302", &[1, 3, 0, 2]);
    let manager = LayoutManager::new(comm, &config, &nprocs, &npts).unwrap();
    let layouts = manager.layouts();
    let mut source = vec![0.0; layouts.buffer_size()];
    let mut dest = vec![0.0; layouts.buffer_size()];

    fill(layouts.layout("1320").unwrap(), &mut source);
    for (from, to) in [
        ("1320", "1302"),
        ("1302", "0321"),
        ("0321", "0123"),
        ("0123", "1302"),
    ] {
        manager.transpose(&source, &mut dest, from, to, None).unwrap();
        check(layouts.layout(to).unwrap(), &dest);
        std::mem::swap(&mut source, &mut dest);
    }
}

/// Test a process grid that leaves some processes without points
fn test_empty_partitions<C: Communicator>(comm: &C) {
    let npts = [2, 3, 4, 2];
    let nprocs = [comm.size() as usize, 1];
    let manager = LayoutManager::new(comm, &LayoutConfig::gyrokinetic(), &nprocs, &npts).unwrap();
    let layouts = manager.layouts();
    let mut source = vec![0.0; layouts.buffer_size().max(1)];
    let mut dest = vec![0.0; layouts.buffer_size().max(1)];

    fill(layouts.layout("flux_surface").unwrap(), &mut source);
    for (from, to) in [
        ("flux_surface", "v_parallel"),
        ("v_parallel", "poloidal"),
        ("poloidal", "flux_surface"),
    ] {
        manager.transpose(&source, &mut dest, from, to, None).unwrap();
        check(layouts.layout(to).unwrap(), &dest);
        std::mem::swap(&mut source, &mut dest);
    }
}

/// Test that too small buffers are rejected
fn test_small_buffer<C: Communicator>(comm: &C) {
    let npts = [10, 10, 10, 10];
    let nprocs = compute_2d_process_grid(&npts, comm.size() as usize).unwrap();
    let manager = LayoutManager::new(comm, &LayoutConfig::gyrokinetic(), &nprocs, &npts).unwrap();
    let source = vec![0.0; manager.layouts().buffer_size()];
    let mut dest = vec![0.0; manager.layouts().buffer_size() - 1];
    assert!(manager
        .transpose(&source, &mut dest, "flux_surface", "v_parallel", None)
        .is_err());
}

/// Run tests
fn main() {
    let universe: Universe = mpi::initialize().unwrap();
    let world = universe.world();
    let rank = world.rank();

    if rank == 0 {
        println!("Testing direct transposes");
    }
    test_direct_transposes(&world, [10, 10, 10, 10]);
    test_direct_transposes(&world, [11, 7, 9, 13]);

    if rank == 0 {
        println!("Testing indirect transposes");
    }
    test_indirect_transpose(&world, [10, 10, 10, 10]);
    test_indirect_transpose(&world, [12, 5, 7, 9]);

    if rank == 0 {
        println!("Testing odd layouts");
    }
    test_odd_layouts(&world);

    if rank == 0 {
        println!("Testing empty partitions");
    }
    test_empty_partitions(&world);

    if rank == 0 {
        println!("Testing buffer sizes");
    }
    test_small_buffer(&world);
}
