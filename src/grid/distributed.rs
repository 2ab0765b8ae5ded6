//! Distributed grid
use crate::{
    layout::Layout,
    traits::LayoutHandler,
    types::{Extremum, LayoutError},
};
use mpi::traits::Equivalence;
use ndarray::{
    ArrayView1, ArrayView2, ArrayViewD, ArrayViewMut1, ArrayViewMut2, ArrayViewMutD, Axis, Ix1,
    Ix2, IxDyn,
};
use num::Float;
use std::{mem, ops::Range};
use tracing::debug;

/// Values of a function on a distributed N-dimensional grid.
///
/// The values are stored in the current layout. Changing the layout moves the values between
/// processes through the layout handler.
pub struct DistributedGrid<'a, T, H: LayoutHandler> {
    handler: &'a H,
    eta_grid: &'a [Vec<f64>],
    layout: &'a Layout,
    data: Vec<T>,
    buffer: Vec<T>,
    save: Option<Vec<T>>,
    saved_layout: Option<&'a Layout>,
}

impl<'a, T: Equivalence + Copy + Default, H: LayoutHandler> DistributedGrid<'a, T, H> {
    /// Create new
    ///
    /// `eta_grid[i]` holds the coordinate values along global axis `i`. If `allocate_save` is
    /// true, memory is allocated for one saved copy of the values.
    pub fn new(
        eta_grid: &'a [Vec<f64>],
        handler: &'a H,
        layout_name: &str,
        allocate_save: bool,
    ) -> Result<Self, LayoutError> {
        let layout = handler.layout(layout_name)?;
        let lengths = eta_grid.iter().map(|e| e.len()).collect::<Vec<_>>();
        if lengths != layout.global_shape() {
            return Err(LayoutError::EtaGridMismatch {
                expected: layout.global_shape().to_vec(),
                actual: lengths,
            });
        }
        let size = handler.buffer_size();
        Ok(Self {
            handler,
            eta_grid,
            layout,
            data: vec![T::default(); size],
            buffer: vec![T::default(); size],
            save: allocate_save.then(|| vec![T::default(); size]),
            saved_layout: None,
        })
    }

    /// Number of points along each global axis
    pub fn n_global_coords(&self) -> &[usize] {
        self.layout.global_shape()
    }

    /// Coordinate values along each global axis
    pub fn eta_grid(&self) -> &'a [Vec<f64>] {
        self.eta_grid
    }

    /// Name of the current layout
    pub fn current_layout(&self) -> &str {
        self.layout.name()
    }

    /// The current layout
    pub fn layout(&self) -> &'a Layout {
        self.layout
    }

    /// The layout called `name`
    pub fn layout_by_name(&self, name: &str) -> Result<&'a Layout, LayoutError> {
        self.handler.layout(name)
    }

    /// The layout handler
    pub fn handler(&self) -> &'a H {
        self.handler
    }

    /// Local indices and coordinate values along local axis `i`
    pub fn get_coords(&self, i: usize) -> impl Iterator<Item = (usize, f64)> + 'a {
        self.get_coord_vals(i).iter().copied().enumerate()
    }

    /// Local indices and coordinate values along global axis `i`
    pub fn get_eta(&self, i: usize) -> impl Iterator<Item = (usize, f64)> + 'a {
        let axis = self.layout.inv_dims_order()[i];
        self.eta_grid[i][self.layout.starts()[axis]..self.layout.ends()[axis]]
            .iter()
            .copied()
            .enumerate()
    }

    /// Coordinate values held on this process along local axis `i`
    pub fn get_coord_vals(&self, i: usize) -> &'a [f64] {
        let layout = self.layout;
        &self.eta_grid[layout.dims_order()[i]][layout.starts()[i]..layout.ends()[i]]
    }

    /// Global indices held on this process along local axis `i`
    pub fn get_global_idx_vals(&self, i: usize) -> Range<usize> {
        self.layout.starts()[i]..self.layout.ends()[i]
    }

    /// Convert local indices into global indices
    pub fn get_global_indices(&self, local: &[usize]) -> Vec<usize> {
        self.layout.global_indices(local)
    }

    /// The local values as an array in the current layout
    pub fn view(&self) -> ArrayViewD<'_, T> {
        ArrayViewD::from_shape(IxDyn(self.layout.shape()), &self.data[..self.layout.size()])
            .expect("buffer holds the current layout")
    }

    /// The local values as a mutable array in the current layout
    pub fn view_mut(&mut self) -> ArrayViewMutD<'_, T> {
        let size = self.layout.size();
        ArrayViewMutD::from_shape(IxDyn(self.layout.shape()), &mut self.data[..size])
            .expect("buffer holds the current layout")
    }

    fn check_fixed(&self, fixed: &[usize], free: usize) -> Result<(), LayoutError> {
        let expected = self.layout.ndims().saturating_sub(free);
        if fixed.len() == expected && self.layout.ndims() >= free {
            Ok(())
        } else {
            Err(LayoutError::SliceIndexCount {
                expected,
                actual: fixed.len(),
            })
        }
    }

    /// The values along the last local axis, at the local indices `fixed` of the other axes
    pub fn get_1d_slice(&self, fixed: &[usize]) -> Result<ArrayView1<'_, T>, LayoutError> {
        self.check_fixed(fixed, 1)?;
        let mut view = self.view();
        for i in fixed {
            view = view.index_axis_move(Axis(0), *i);
        }
        Ok(view
            .into_dimensionality::<Ix1>()
            .expect("one axis remains"))
    }

    /// Mutable values along the last local axis
    pub fn get_1d_slice_mut(
        &mut self,
        fixed: &[usize],
    ) -> Result<ArrayViewMut1<'_, T>, LayoutError> {
        self.check_fixed(fixed, 1)?;
        let mut view = self.view_mut();
        for i in fixed {
            view = view.index_axis_move(Axis(0), *i);
        }
        Ok(view
            .into_dimensionality::<Ix1>()
            .expect("one axis remains"))
    }

    /// The values on the last two local axes, at the local indices `fixed` of the other axes
    pub fn get_2d_slice(&self, fixed: &[usize]) -> Result<ArrayView2<'_, T>, LayoutError> {
        self.check_fixed(fixed, 2)?;
        let mut view = self.view();
        for i in fixed {
            view = view.index_axis_move(Axis(0), *i);
        }
        Ok(view
            .into_dimensionality::<Ix2>()
            .expect("two axes remain"))
    }

    /// Mutable values on the last two local axes
    pub fn get_2d_slice_mut(
        &mut self,
        fixed: &[usize],
    ) -> Result<ArrayViewMut2<'_, T>, LayoutError> {
        self.check_fixed(fixed, 2)?;
        let mut view = self.view_mut();
        for i in fixed {
            view = view.index_axis_move(Axis(0), *i);
        }
        Ok(view
            .into_dimensionality::<Ix2>()
            .expect("two axes remain"))
    }

    /// Move the values into the layout `name`.
    ///
    /// This is collective. If save memory was allocated and no values are saved, it is used
    /// as scratch space for transposes that take several steps.
    pub fn set_layout(&mut self, name: &str) -> Result<(), LayoutError> {
        let layout = self.handler.layout(name)?;
        let buf = match (&mut self.save, self.saved_layout) {
            (Some(save), None) => Some(&mut save[..]),
            _ => None,
        };
        self.handler
            .transpose(&self.data, &mut self.buffer, self.layout.name(), name, buf)?;
        mem::swap(&mut self.data, &mut self.buffer);
        debug!(from = self.layout.name(), to = name, "set layout");
        self.layout = layout;
        Ok(())
    }

    /// Has memory been allocated for saved values?
    pub fn has_save_memory(&self) -> bool {
        self.save.is_some()
    }

    /// Are values currently saved?
    pub fn is_saved(&self) -> bool {
        self.saved_layout.is_some()
    }

    /// Save a copy of the current values and layout.
    ///
    /// The copy is kept until it is restored or freed.
    pub fn save_grid_values(&mut self) -> Result<(), LayoutError> {
        let save = self.save.as_mut().ok_or(LayoutError::NoSaveMemory)?;
        if self.saved_layout.is_some() {
            return Err(LayoutError::SaveOutstanding);
        }
        let size = self.layout.size();
        save[..size].copy_from_slice(&self.data[..size]);
        self.saved_layout = Some(self.layout);
        Ok(())
    }

    /// Replace the current values and layout with the saved ones
    pub fn restore_grid_values(&mut self) -> Result<(), LayoutError> {
        let save = self.save.as_mut().ok_or(LayoutError::NoSaveMemory)?;
        let layout = self.saved_layout.take().ok_or(LayoutError::NothingSaved)?;
        mem::swap(&mut self.data, save);
        self.layout = layout;
        Ok(())
    }

    /// Discard the saved values
    pub fn free_grid_save(&mut self) -> Result<(), LayoutError> {
        if self.save.is_none() {
            return Err(LayoutError::NoSaveMemory);
        }
        self.saved_layout
            .take()
            .map(|_| ())
            .ok_or(LayoutError::NothingSaved)
    }

    /// The local values, in the current layout
    pub fn local_data(&self) -> &[T] {
        &self.data[..self.layout.size()]
    }

    /// The local values, in the current layout
    pub fn local_data_mut(&mut self) -> &mut [T] {
        let size = self.layout.size();
        &mut self.data[..size]
    }
}

impl<T: Equivalence + Copy + Default + Float, H: LayoutHandler> DistributedGrid<'_, T, H> {
    fn local_extremum(&self, fixed: Option<(usize, usize)>, op: Extremum) -> T {
        let (start, pick): (T, fn(T, T) -> T) = match op {
            Extremum::Min => (T::infinity(), T::min),
            Extremum::Max => (T::neg_infinity(), T::max),
        };
        let view = self.view();
        match fixed {
            None => view.iter().fold(start, |a, b| pick(a, *b)),
            Some((global_axis, index)) => match self.layout.local_index(global_axis, index) {
                Some(local) => view
                    .index_axis(Axis(self.layout.inv_dims_order()[global_axis]), local)
                    .iter()
                    .fold(start, |a, b| pick(a, *b)),
                None => start,
            },
        }
    }

    /// Smallest value held on this process.
    ///
    /// If `fixed = Some((axis, index))` only values with global index `index` along global
    /// axis `axis` are considered. Returns infinity if there are no such values.
    pub fn local_min(&self, fixed: Option<(usize, usize)>) -> T {
        self.local_extremum(fixed, Extremum::Min)
    }

    /// Largest value held on this process.
    ///
    /// Returns negative infinity if there are no values to consider.
    pub fn local_max(&self, fixed: Option<(usize, usize)>) -> T {
        self.local_extremum(fixed, Extremum::Max)
    }

    /// Smallest value of the grid. This is collective.
    pub fn get_min(&self, fixed: Option<(usize, usize)>) -> T {
        self.handler.all_reduce(self.local_min(fixed), Extremum::Min)
    }

    /// Largest value of the grid. This is collective.
    pub fn get_max(&self, fixed: Option<(usize, usize)>) -> T {
        self.handler.all_reduce(self.local_max(fixed), Extremum::Max)
    }
}
