//! VTK export of the aerodynamic grids and a background writer for the
//! per-step results.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;

use faer::Mat;
use itertools::Itertools;
use tracing::debug;
use vtkio::model::*;

use crate::coupled::StepOutput;
use crate::error::{AeroelasticError, Result};
use crate::grid::{panel_vertices, AeroTimestep, LiftingSurface};

/// Quad cells over panel grids stacked one after another.
fn quad_cells(grids: &[(usize, usize)]) -> Cells {
    let mut connectivity = Vec::new();
    let mut offset = 0;
    grids.iter().for_each(|&(m, n)| {
        (0..n).for_each(|i_n| {
            (0..m).for_each(|i_m| {
                connectivity.extend(panel_vertices(m, i_m, i_n).map(|v| (offset + v) as u64));
            });
        });
        offset += (m + 1) * (n + 1);
    });
    let n_cells = connectivity.len() / 4;
    Cells {
        cell_verts: VertexNumbers::XML {
            connectivity,
            offsets: (1..n_cells + 1).map(|i| 4 * i as u64).collect_vec(),
        },
        types: vec![CellType::Quad; n_cells],
    }
}

fn vectors(name: &str, data: Vec<f32>) -> Attribute {
    Attribute::DataArray(DataArrayBase {
        name: name.to_string(),
        elem: ElementType::Vectors,
        data: IOBuffer::F32(data),
    })
}

fn scalars(name: &str, data: Vec<f32>) -> Attribute {
    Attribute::DataArray(DataArrayBase {
        name: name.to_string(),
        elem: ElementType::Scalars {
            num_comp: 1,
            lookup_table: None,
        },
        data: IOBuffer::F32(data),
    })
}

/// Lifting surfaces with circulation per panel and velocities and loads per
/// vertex.
pub fn aero_grid_as_vtk(aero: &AeroTimestep) -> Vtk {
    let surfaces = &aero.surfaces;
    let columns = |field: fn(&LiftingSurface) -> &Mat<f64>, rows: usize| {
        surfaces
            .iter()
            .flat_map(|s| {
                let f = field(s);
                (0..f.ncols())
                    .flat_map(move |v| (0..rows).map(move |i| f[(i, v)] as f32))
                    .collect_vec()
            })
            .collect_vec()
    };

    Vtk {
        version: Version { major: 4, minor: 2 },
        title: String::new(),
        byte_order: ByteOrder::LittleEndian,
        file_path: None,
        data: DataSet::inline(UnstructuredGridPiece {
            points: IOBuffer::F64(
                surfaces
                    .iter()
                    .flat_map(|s| s.zeta.col_iter().flat_map(|c| [c[0], c[1], c[2]]).collect_vec())
                    .collect_vec(),
            ),
            cells: quad_cells(&surfaces.iter().map(|s| (s.m, s.n)).collect_vec()),
            data: Attributes {
                point: vec![
                    vectors("ExternalVelocity", columns(|s| &s.u_ext, 3)),
                    vectors("GridVelocity", columns(|s| &s.zeta_dot, 3)),
                    vectors("Force", columns(|s| &s.forces, 3)),
                    vectors("UnsteadyForce", columns(|s| &s.dynamic_forces, 3)),
                ],
                cell: vec![scalars(
                    "Gamma",
                    surfaces
                        .iter()
                        .flat_map(|s| {
                            (0..s.n)
                                .flat_map(|i_n| (0..s.m).map(move |i_m| s.gamma[(i_m, i_n)] as f32))
                                .collect_vec()
                        })
                        .collect_vec(),
                )],
            },
        }),
    }
}

/// Wake panels with their circulation.
pub fn wake_as_vtk(aero: &AeroTimestep) -> Vtk {
    let wakes = &aero.wakes;
    Vtk {
        version: Version { major: 4, minor: 2 },
        title: String::new(),
        byte_order: ByteOrder::LittleEndian,
        file_path: None,
        data: DataSet::inline(UnstructuredGridPiece {
            points: IOBuffer::F64(
                wakes
                    .iter()
                    .flat_map(|w| w.zeta_star.col_iter().flat_map(|c| [c[0], c[1], c[2]]).collect_vec())
                    .collect_vec(),
            ),
            cells: quad_cells(&wakes.iter().map(|w| (w.rows, w.n)).collect_vec()),
            data: Attributes {
                point: vec![scalars(
                    "DistanceToTrailingEdge",
                    wakes
                        .iter()
                        .flat_map(|w| w.dist_to_orig.iter().map(|&d| d as f32))
                        .collect_vec(),
                )],
                cell: vec![scalars(
                    "Gamma",
                    wakes
                        .iter()
                        .flat_map(|w| {
                            (0..w.n)
                                .flat_map(|i_n| (0..w.rows).map(move |i_m| w.gamma_star[(i_m, i_n)] as f32))
                                .collect_vec()
                        })
                        .collect_vec(),
                )],
            },
        }),
    }
}

fn export(vtk: Vtk, path: PathBuf) -> Result<()> {
    vtk.export_ascii(&path)
        .map_err(|e| AeroelasticError::Vtk(format!("{}: {e}", path.display())))
}

//------------------------------------------------------------------------------
// Background writer
//------------------------------------------------------------------------------

/// Writes each accepted step on its own thread: one row of total loads per
/// step to `force_history.csv` and, optionally, the grid and wake as VTK.
pub struct OutputWriter {
    sender: Option<Sender<StepOutput>>,
    handle: Option<JoinHandle<Result<usize>>>,
}

impl OutputWriter {
    pub fn spawn(folder: impl AsRef<Path>, write_vtk: bool) -> Result<Self> {
        let folder = folder.as_ref().to_path_buf();
        std::fs::create_dir_all(&folder)?;
        let mut file = BufWriter::new(File::create(folder.join("force_history.csv"))?);
        writeln!(
            file,
            "# tstep, t, fx_G, fy_G, fz_G, mx_G, my_G, mz_G, fx_unsteady_G, fy_unsteady_G, fz_unsteady_G, mx_unsteady_G, my_unsteady_G, mz_unsteady_G"
        )?;

        let (sender, receiver) = mpsc::channel();
        let handle = std::thread::spawn(move || write_steps(receiver, file, folder, write_vtk));
        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
        })
    }

    /// Sender to hand to the dynamic solver.
    pub fn sender(&self) -> Option<Sender<StepOutput>> {
        self.sender.clone()
    }

    /// Closes the channel once every sender is dropped, waits for the queue
    /// to drain and returns the number of steps written.
    pub fn finish(mut self) -> Result<usize> {
        self.sender.take();
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| AeroelasticError::Io(std::io::Error::other("output thread panicked")))?,
            None => Ok(0),
        }
    }
}

fn write_steps(
    receiver: Receiver<StepOutput>,
    mut file: BufWriter<File>,
    folder: PathBuf,
    write_vtk: bool,
) -> Result<usize> {
    let mut count = 0;
    for step in receiver {
        let values = step
            .aero
            .total_steady_force_g
            .iter()
            .chain(step.aero.total_unsteady_force_g.iter())
            .map(|v| format!("{v:.12e}"))
            .join(", ");
        writeln!(file, "{}, {:.12e}, {values}", step.timestep, step.t)?;
        if write_vtk {
            export(
                aero_grid_as_vtk(&step.aero),
                folder.join(format!("aero_{:0>4}.vtk", step.timestep)),
            )?;
            export(
                wake_as_vtk(&step.aero),
                folder.join(format!("wake_{:0>4}.vtk", step.timestep)),
            )?;
        }
        debug!(timestep = step.timestep, "output written");
        count += 1;
    }
    file.flush()?;
    Ok(count)
}
