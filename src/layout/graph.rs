//! The layouts of one process grid and the transposes connecting them
use super::Layout;
use crate::types::{LayoutConfig, LayoutError};
use std::collections::{HashMap, VecDeque};
use tracing::warn;

/// A table of layouts sharing one process grid.
///
/// Two layouts are neighbours if a single transpose connects them (see
/// [Layout::transpose_kind]).
#[derive(Debug, Clone)]
pub struct LayoutSet {
    layouts: Vec<Layout>,
    indices: HashMap<String, usize>,
    neighbours: Vec<Vec<usize>>,
    buffer_size: usize,
}

impl LayoutSet {
    /// Create new
    ///
    /// Every layout must be reachable from another by a single transpose, unless the table
    /// contains only one layout.
    pub fn new(
        config: &LayoutConfig,
        nprocs: &[usize],
        global_shape: &[usize],
        coords: &[usize],
    ) -> Result<Self, LayoutError> {
        config.validate()?;
        let layouts = config
            .layouts()
            .iter()
            .map(|spec| Layout::new(&spec.name, nprocs, &spec.dims_order, global_shape, coords))
            .collect::<Result<Vec<_>, _>>()?;

        let neighbours = layouts
            .iter()
            .enumerate()
            .map(|(i, a)| {
                layouts
                    .iter()
                    .enumerate()
                    .filter(|(j, b)| *j != i && a.transpose_kind(b).is_some())
                    .map(|(j, _)| j)
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();
        if layouts.len() > 1 {
            if let Some(i) = neighbours.iter().position(|n| n.is_empty()) {
                return Err(LayoutError::IncompatibleLayout {
                    name: layouts[i].name().to_string(),
                });
            }
        }

        let indices = layouts
            .iter()
            .enumerate()
            .map(|(i, l)| (l.name().to_string(), i))
            .collect();
        let buffer_size = layouts.iter().map(|l| l.size()).max().unwrap_or(0);

        Ok(Self {
            layouts,
            indices,
            neighbours,
            buffer_size,
        })
    }

    /// The layouts, in table order
    pub fn layouts(&self) -> &[Layout] {
        &self.layouts
    }

    /// The layout at `index` in the table
    pub fn get(&self, index: usize) -> &Layout {
        &self.layouts[index]
    }

    /// Does the table contain a layout called `name`?
    pub fn contains(&self, name: &str) -> bool {
        self.indices.contains_key(name)
    }

    /// Position of the layout called `name` in the table
    pub fn index(&self, name: &str) -> Result<usize, LayoutError> {
        self.indices
            .get(name)
            .copied()
            .ok_or_else(|| LayoutError::UnknownLayout {
                name: name.to_string(),
            })
    }

    /// The layout called `name`
    pub fn layout(&self, name: &str) -> Result<&Layout, LayoutError> {
        Ok(&self.layouts[self.index(name)?])
    }

    /// The largest local size of any layout
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Layouts reachable from the layout at `index` in a single transpose
    pub fn neighbours(&self, index: usize) -> &[usize] {
        &self.neighbours[index]
    }

    /// Shortest sequence of layouts leading from `from` to `to`, both ends included.
    ///
    /// Ties between routes of equal length are broken by table order.
    pub fn route(&self, from: &str, to: &str) -> Result<Vec<usize>, LayoutError> {
        let start = self.index(from)?;
        let end = self.index(to)?;
        let mut previous = vec![None; self.layouts.len()];
        let mut visited = vec![false; self.layouts.len()];
        let mut queue = VecDeque::from([start]);
        visited[start] = true;
        while let Some(i) = queue.pop_front() {
            if i == end {
                let mut route = vec![end];
                let mut current = end;
                while let Some(p) = previous[current] {
                    route.push(p);
                    current = p;
                }
                route.reverse();
                return Ok(route);
            }
            for j in &self.neighbours[i] {
                if !visited[*j] {
                    visited[*j] = true;
                    previous[*j] = Some(i);
                    queue.push_back(*j);
                }
            }
        }
        Err(LayoutError::NoRoute {
            from: from.to_string(),
            to: to.to_string(),
        })
    }

    /// The route of a transpose from `from` to `to`
    ///
    /// If `report` is set, a route that needs more than one step is logged as a warning.
    pub fn transpose_route(
        &self,
        from: &str,
        to: &str,
        report: bool,
    ) -> Result<Vec<usize>, LayoutError> {
        let route = self.route(from, to)?;
        if report && route.len() > 2 {
            warn!(
                route = ?route.iter().map(|i| self.layouts[*i].name()).collect::<Vec<_>>(),
                "no direct transpose from '{from}' to '{to}'"
            );
        }
        Ok(route)
    }

    /// The names of the layouts along [LayoutSet::route]
    pub fn route_names(&self, from: &str, to: &str) -> Result<Vec<&str>, LayoutError> {
        Ok(self
            .route(from, to)?
            .into_iter()
            .map(|i| self.layouts[i].name())
            .collect())
    }
}
