//! RON checkpoints
use crate::{
    grid::DistributedGrid,
    layout::{
        exchange::{copy_block, global_view_mut, intersect},
        Layout,
    },
    traits::{LayoutHandler, RONCheckpoint},
    types::{Extremum, LayoutError},
};
use itertools::{izip, Itertools};
use mpi::traits::Equivalence;
use ndarray::{ArrayViewD, IxDyn};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::info;

/// Summary of a parallel checkpoint, written by rank 0
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CheckpointSummary {
    /// Number of part files
    pub mpi_ranks: usize,
    /// Dimension ordering of the layout the checkpoint was written in
    pub dims_order: Vec<usize>,
    /// Shape of the global array in that ordering
    pub full_shape: Vec<usize>,
}

/// The values held by one process
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CheckpointPart<T> {
    /// Name of the layout
    pub layout: String,
    /// Dimension ordering of the layout
    pub dims_order: Vec<usize>,
    /// First global index held, for each local axis
    pub starts: Vec<usize>,
    /// One past the last global index held, for each local axis
    pub ends: Vec<usize>,
    /// The values, in row-major order
    pub values: Vec<T>,
}

fn io_error(path: &Path, e: impl std::fmt::Display) -> LayoutError {
    LayoutError::Checkpoint {
        message: format!("{}: {e}", path.display()),
    }
}

fn read_ron<D: serde::de::DeserializeOwned>(path: &Path) -> Result<D, LayoutError> {
    let content = fs::read_to_string(path).map_err(|e| io_error(path, e))?;
    ron::from_str(&content).map_err(|e| io_error(path, e))
}

fn write_ron<S: serde::Serialize>(path: &Path, value: &S) -> Result<(), LayoutError> {
    let content = ron::to_string(value).map_err(|e| io_error(path, e))?;
    fs::write(path, content).map_err(|e| io_error(path, e))
}

pub(crate) fn summary_path(folder: &Path, name_convention: &str, time: usize) -> PathBuf {
    folder.join(format!("{name_convention}_{time:06}.ron"))
}

pub(crate) fn part_path(folder: &Path, name_convention: &str, time: usize, rank: usize) -> PathBuf {
    folder.join(format!("{name_convention}_{time:06}.{rank}.ron"))
}

/// The time of the latest checkpoint in `folder`
pub(crate) fn latest_time(folder: &Path, name_convention: &str) -> Result<usize, LayoutError> {
    let prefix = format!("{name_convention}_");
    fs::read_dir(folder)
        .map_err(|e| io_error(folder, e))?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            entry
                .file_name()
                .to_str()
                .and_then(|f| f.strip_prefix(&prefix))
                .and_then(|f| f.strip_suffix(".ron"))
                .and_then(|t| t.parse::<usize>().ok())
        })
        .max()
        .ok_or_else(|| LayoutError::Checkpoint {
            message: format!(
                "no checkpoint called '{name_convention}' in {}",
                folder.display()
            ),
        })
}

/// Copy the values of `part` that lie in `layout` into `data`.
///
/// Returns the number of values copied.
pub(crate) fn copy_overlap<T: Copy>(
    part: &CheckpointPart<T>,
    layout: &Layout,
    data: &mut [T],
) -> Result<usize, LayoutError> {
    if part.dims_order != layout.dims_order() {
        return Err(LayoutError::CheckpointLayoutMismatch {
            expected: layout.dims_order().to_vec(),
            found: part.dims_order.clone(),
        });
    }
    let part_shape = izip!(&part.starts, &part.ends)
        .map(|(s, e)| e.saturating_sub(*s))
        .collect_vec();
    if part.starts.len() != layout.ndims()
        || part.ends.len() != layout.ndims()
        || part.values.len() != part_shape.iter().product::<usize>()
    {
        return Err(LayoutError::Checkpoint {
            message: format!(
                "part of layout '{}' holds {} values for the hyperslab {:?}..{:?}",
                part.layout,
                part.values.len(),
                part.starts,
                part.ends
            ),
        });
    }

    // both arrays are viewed with their axes in global order
    let inv = layout.inv_dims_order();
    let part_block = inv
        .iter()
        .map(|axis| part.starts[*axis]..part.ends[*axis])
        .collect_vec();
    let part_origin = part_block.iter().map(|r| r.start).collect_vec();
    let values = ArrayViewD::from_shape(IxDyn(&part_shape), &part.values[..])
        .map_err(|e| LayoutError::Checkpoint {
            message: e.to_string(),
        })?
        .permuted_axes(inv);
    Ok(copy_block(
        values,
        &part_origin,
        global_view_mut(layout, data)?,
        &layout.origin(),
        &intersect(&part_block, &layout.block()),
    ))
}

impl<T, H> RONCheckpoint for DistributedGrid<'_, T, H>
where
    T: Equivalence + Copy + Default + serde::Serialize + serde::de::DeserializeOwned,
    H: LayoutHandler,
{
    fn write_checkpoint(
        &self,
        folder: impl AsRef<Path>,
        time: usize,
        name_convention: &str,
    ) -> Result<(), LayoutError> {
        let folder = folder.as_ref();
        let layout = self.layout();
        let handler = self.handler();
        let rank = handler.rank();
        let summary = if rank == 0 {
            info!(folder = %folder.display(), time, "writing checkpoint");
            fs::create_dir_all(folder)
                .map_err(|e| io_error(folder, e))
                .and_then(|_| {
                    write_ron(
                        &summary_path(folder, name_convention, time),
                        &CheckpointSummary {
                            mpi_ranks: handler.size(),
                            dims_order: layout.dims_order().to_vec(),
                            full_shape: layout.full_shape(),
                        },
                    )
                })
        } else {
            Ok(())
        };

        // every process reaches both barriers, whatever fails
        handler.barrier();
        let part = if handler.all_reduce(u8::from(summary.is_ok()), Extremum::Min) == 1 {
            write_ron(
                &part_path(folder, name_convention, time, rank),
                &CheckpointPart {
                    layout: layout.name().to_string(),
                    dims_order: layout.dims_order().to_vec(),
                    starts: layout.starts().to_vec(),
                    ends: layout.ends().to_vec(),
                    values: self.local_data().to_vec(),
                },
            )
        } else {
            Err(LayoutError::Checkpoint {
                message: format!(
                    "summary of checkpoint {time} in {} was not written",
                    folder.display()
                ),
            })
        };
        handler.barrier();
        let complete = handler.all_reduce(u8::from(part.is_ok()), Extremum::Min) == 1;

        summary.and(part)?;
        if complete {
            Ok(())
        } else {
            Err(LayoutError::Checkpoint {
                message: format!(
                    "checkpoint {time} in {} is missing parts from other processes",
                    folder.display()
                ),
            })
        }
    }

    fn load_checkpoint(
        &mut self,
        folder: impl AsRef<Path>,
        time: Option<usize>,
        name_convention: &str,
    ) -> Result<(), LayoutError> {
        let folder = folder.as_ref();
        let time = match time {
            Some(t) => t,
            None => latest_time(folder, name_convention)?,
        };
        let summary: CheckpointSummary = read_ron(&summary_path(folder, name_convention, time))?;
        let layout = self.layout();
        if summary.dims_order != layout.dims_order() {
            return Err(LayoutError::CheckpointLayoutMismatch {
                expected: layout.dims_order().to_vec(),
                found: summary.dims_order,
            });
        }
        if summary.full_shape != layout.full_shape() {
            return Err(LayoutError::Checkpoint {
                message: format!(
                    "checkpoint has shape {:?} but the grid has shape {:?}",
                    summary.full_shape,
                    layout.full_shape()
                ),
            });
        }

        let mut copied = 0;
        for r in 0..summary.mpi_ranks {
            let part: CheckpointPart<T> = read_ron(&part_path(folder, name_convention, time, r))?;
            copied += copy_overlap(&part, layout, self.local_data_mut())?;
        }
        if copied < layout.size() {
            return Err(LayoutError::Checkpoint {
                message: format!(
                    "checkpoint holds {copied} of the {} values of this process",
                    layout.size()
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::{copy_overlap, latest_time, part_path, summary_path, CheckpointPart};
    use crate::{
        grid::{
            test::{check, eta_grid, fill, SerialHandler},
            DistributedGrid,
        },
        layout::Layout,
        traits::RONCheckpoint,
        types::{ErrorKind, LayoutConfig, LayoutError},
    };
    use std::{fs, path::PathBuf};

    fn folder(name: &str) -> PathBuf {
        let folder = std::env::temp_dir().join(format!("phasegrid_{name}_{}", std::process::id()));
        let _ = fs::remove_dir_all(&folder);
        folder
    }

    #[test]
    fn test_file_names() {
        let folder = PathBuf::from("out");
        assert_eq!(
            summary_path(&folder, "grid", 42),
            PathBuf::from("out/grid_000042.ron")
        );
        assert_eq!(
            part_path(&folder, "grid", 42, 3),
            PathBuf::from("out/grid_000042.3.ron")
        );
    }

    #[test]
    fn test_copy_overlap() {
        // the process holds rows 2..4 of a 4x3 array
        let layout = Layout::new("rows", &[2], &[0, 1], &[4, 3], &[1]).unwrap();
        let part = CheckpointPart {
            layout: String::from("rows"),
            dims_order: vec![0, 1],
            starts: vec![1, 0],
            ends: vec![3, 3],
            values: vec![3, 4, 5, 6, 7, 8],
        };
        let mut data = vec![0; 6];
        assert_eq!(copy_overlap(&part, &layout, &mut data).unwrap(), 3);
        assert_eq!(data, vec![6, 7, 8, 0, 0, 0]);
    }

    #[test]
    fn test_copy_overlap_transposed() {
        // local axes (column, row) of a 4x3 array, the process holds columns 0..2
        let layout = Layout::new("columns", &[2], &[1, 0], &[4, 3], &[0]).unwrap();
        assert_eq!(layout.shape(), [2, 4]);
        let part = CheckpointPart {
            layout: String::from("columns"),
            dims_order: vec![1, 0],
            starts: vec![1, 0],
            ends: vec![3, 4],
            values: vec![10, 11, 12, 13, 20, 21, 22, 23],
        };
        let mut data = vec![0; 8];
        assert_eq!(copy_overlap(&part, &layout, &mut data).unwrap(), 4);
        assert_eq!(data, vec![0, 0, 0, 0, 10, 11, 12, 13]);
    }

    #[test]
    fn test_copy_overlap_bad_part() {
        let layout = Layout::new("rows", &[1], &[0, 1], &[4, 3], &[0]).unwrap();
        let part = CheckpointPart {
            layout: String::from("rows"),
            dims_order: vec![0, 1],
            starts: vec![0, 0],
            ends: vec![2, 3],
            values: vec![1.0; 5],
        };
        let mut data = vec![0.0; 12];
        let e = copy_overlap(&part, &layout, &mut data).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_copy_overlap_wrong_order() {
        let layout = Layout::new("rows", &[1], &[0, 1], &[4, 3], &[0]).unwrap();
        let part = CheckpointPart {
            layout: String::from("columns"),
            dims_order: vec![1, 0],
            starts: vec![0, 0],
            ends: vec![3, 4],
            values: vec![0.0; 12],
        };
        let mut data = vec![0.0; 12];
        let e = copy_overlap(&part, &layout, &mut data).unwrap_err();
        assert_eq!(
            e,
            LayoutError::CheckpointLayoutMismatch {
                expected: vec![0, 1],
                found: vec![1, 0]
            }
        );
        assert_eq!(e.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_write_and_load() {
        let shape = [4, 3, 5, 2];
        let handler = SerialHandler::new(&LayoutConfig::gyrokinetic(), &shape);
        let eta = eta_grid(&shape);
        let folder = folder("write_and_load");

        let mut grid = DistributedGrid::new(&eta, &handler, "v_parallel", false).unwrap();
        fill(&mut grid);
        grid.write_checkpoint(&folder, 3, "grid").unwrap();
        grid.local_data_mut().fill(0.0);
        grid.write_checkpoint(&folder, 1, "grid").unwrap();
        assert_eq!(latest_time(&folder, "grid").unwrap(), 3);

        let mut loaded = DistributedGrid::new(&eta, &handler, "v_parallel", false).unwrap();
        loaded.load_checkpoint(&folder, None, "grid").unwrap();
        check(&loaded);

        loaded.load_checkpoint(&folder, Some(1), "grid").unwrap();
        assert!(loaded.local_data().iter().all(|v| *v == 0.0));

        let mut other = DistributedGrid::<f64, _>::new(&eta, &handler, "poloidal", false).unwrap();
        let e = other.load_checkpoint(&folder, Some(3), "grid").unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Io);

        let e = other.load_checkpoint(&folder, Some(7), "grid").unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Io);
        fs::remove_dir_all(&folder).unwrap();
    }

    #[test]
    fn test_failed_write_reaches_barriers() {
        let shape = [4, 3, 5, 2];
        let handler = SerialHandler::new(&LayoutConfig::gyrokinetic(), &shape);
        let eta = eta_grid(&shape);
        let folder = folder("failed_write");
        // a file where the folder should be
        fs::write(&folder, "").unwrap();

        let grid = DistributedGrid::<f64, _>::new(&eta, &handler, "poloidal", false).unwrap();
        let e = grid.write_checkpoint(&folder, 0, "grid").unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Io);
        assert_eq!(handler.barriers(), 2);
        fs::remove_file(&folder).unwrap();
    }

    #[test]
    fn test_no_checkpoint() {
        let folder = folder("no_checkpoint");
        fs::create_dir_all(&folder).unwrap();
        assert!(latest_time(&folder, "grid").is_err());
        fs::remove_dir_all(&folder).unwrap();
    }
}
