//! Panel grids of the lifting surfaces, their wakes and nonlifting bodies,
//! plus the per-timestep aerodynamic snapshot.
//!
//! Geometry is stored column-wise as `[3][n_vertices]` with the chordwise
//! index running fastest: vertex `(i_m, i_n)` is column `i_n * (m + 1) + i_m`
//! and panel `(i_m, i_n)` is entry `i_n * m + i_m`. Panel corners are
//! `A = (i_m, i_n)`, `B = (i_m + 1, i_n)`, `C = (i_m + 1, i_n + 1)` and
//! `D = (i_m, i_n + 1)`; the vortex ring runs `A -> B -> C -> D`.

use std::cell::OnceCell;

use faer::prelude::*;
use itertools::Itertools;

use crate::error::{AeroelasticError, Result};
use crate::structure::StructTimestep;
use crate::util::{
    add, col3, cross, mat3_vec, norm, normalize, scale, set_col3, sub, Vec3,
};

/// Index of vertex `(i_m, i_n)` in a grid with `m` chordwise panels.
#[inline]
pub fn vertex_index(m: usize, i_m: usize, i_n: usize) -> usize {
    i_n * (m + 1) + i_m
}

/// Index of panel `(i_m, i_n)` in a grid with `m` chordwise panels.
#[inline]
pub fn panel_index(m: usize, i_m: usize, i_n: usize) -> usize {
    i_n * m + i_m
}

/// Corner coordinates `[A, B, C, D]` of panel `(i_m, i_n)`.
pub fn panel_corners(zeta: MatRef<f64>, m: usize, i_m: usize, i_n: usize) -> [Vec3; 4] {
    [
        col3(zeta, vertex_index(m, i_m, i_n)),
        col3(zeta, vertex_index(m, i_m + 1, i_n)),
        col3(zeta, vertex_index(m, i_m + 1, i_n + 1)),
        col3(zeta, vertex_index(m, i_m, i_n + 1)),
    ]
}

/// Corner vertex indices `[A, B, C, D]` of panel `(i_m, i_n)`.
pub fn panel_vertices(m: usize, i_m: usize, i_n: usize) -> [usize; 4] {
    [
        vertex_index(m, i_m, i_n),
        vertex_index(m, i_m + 1, i_n),
        vertex_index(m, i_m + 1, i_n + 1),
        vertex_index(m, i_m, i_n + 1),
    ]
}

/// Unit normal and area of a quadrilateral panel from its diagonals.
pub fn panel_normal_area(corners: &[Vec3; 4]) -> (Vec3, f64) {
    let c = cross(sub(corners[2], corners[0]), sub(corners[3], corners[1]));
    (normalize(c), 0.5 * norm(c))
}

/// Mean of the four corners.
pub fn panel_centre(corners: &[Vec3; 4]) -> Vec3 {
    scale(
        0.25,
        add(add(corners[0], corners[1]), add(corners[2], corners[3])),
    )
}

/// Mean over the panel corners of a vertex field `[3][n_vertices]`.
pub fn panel_average(field: MatRef<f64>, m: usize, i_m: usize, i_n: usize) -> Vec3 {
    panel_vertices(m, i_m, i_n)
        .iter()
        .fold([0., 0., 0.], |acc, &v| add(acc, scale(0.25, col3(field, v))))
}

//------------------------------------------------------------------------------
// Panel geometry shared by lifting and nonlifting surfaces
//------------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PanelGeometry {
    pub normals: Mat<f64>,     // Unit normals `[3][n_panels]`
    pub areas: Vec<f64>,       // Panel areas `[n_panels]`
    pub collocation: Mat<f64>, // Collocation points `[3][n_panels]`
}

impl PanelGeometry {
    pub fn from_zeta(zeta: MatRef<f64>, m: usize, n: usize) -> Self {
        let mut normals = Mat::zeros(3, m * n);
        let mut collocation = Mat::zeros(3, m * n);
        let mut areas = vec![0.; m * n];
        (0..n).cartesian_product(0..m).for_each(|(i_n, i_m)| {
            let p = panel_index(m, i_m, i_n);
            let corners = panel_corners(zeta, m, i_m, i_n);
            let (normal, area) = panel_normal_area(&corners);
            set_col3(normals.as_mut(), p, normal);
            set_col3(collocation.as_mut(), p, panel_centre(&corners));
            areas[p] = area;
        });
        Self {
            normals,
            areas,
            collocation,
        }
    }
}

//------------------------------------------------------------------------------
// Lifting surface
//------------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LiftingSurface {
    pub m: usize,                // Chordwise panels
    pub n: usize,                // Spanwise panels
    pub zeta: Mat<f64>,          // Vertex positions in G orientation, relative to the A origin `[3][n_vertices]`
    pub zeta_dot: Mat<f64>,      // Vertex velocities `[3][n_vertices]`
    pub u_ext: Mat<f64>,         // External flow at each vertex `[3][n_vertices]`
    pub geometry: PanelGeometry, // Normals, areas and collocation points
    pub gamma: Mat<f64>,         // Ring circulation `[m][n]`
    pub gamma_dot: Mat<f64>,     // Circulation rate `[m][n]`
    pub forces: Mat<f64>,        // Steady force and moment at each vertex, G frame `[6][n_vertices]`
    pub dynamic_forces: Mat<f64>, // Unsteady force and moment at each vertex `[6][n_vertices]`
}

impl LiftingSurface {
    pub fn new(m: usize, n: usize) -> Self {
        let n_vertices = (m + 1) * (n + 1);
        Self {
            m,
            n,
            zeta: Mat::zeros(3, n_vertices),
            zeta_dot: Mat::zeros(3, n_vertices),
            u_ext: Mat::zeros(3, n_vertices),
            geometry: PanelGeometry::from_zeta(Mat::<f64>::zeros(3, n_vertices).as_ref(), m, n),
            gamma: Mat::zeros(m, n),
            gamma_dot: Mat::zeros(m, n),
            forces: Mat::zeros(6, n_vertices),
            dynamic_forces: Mat::zeros(6, n_vertices),
        }
    }

    pub fn n_vertices(&self) -> usize {
        (self.m + 1) * (self.n + 1)
    }

    pub fn n_panels(&self) -> usize {
        self.m * self.n
    }

    pub fn is_empty(&self) -> bool {
        self.m == 0 || self.n == 0
    }

    /// Replaces the vertex positions and refreshes normals, areas and
    /// collocation points.
    pub fn set_zeta(&mut self, zeta: Mat<f64>) {
        self.zeta = zeta;
        self.update_geometry();
    }

    pub fn update_geometry(&mut self) {
        self.geometry = PanelGeometry::from_zeta(self.zeta.as_ref(), self.m, self.n);
    }

    pub fn corners(&self, i_m: usize, i_n: usize) -> [Vec3; 4] {
        panel_corners(self.zeta.as_ref(), self.m, i_m, i_n)
    }

    /// Trailing edge vertices `[3][n + 1]`.
    pub fn trailing_edge(&self) -> Mat<f64> {
        Mat::from_fn(3, self.n + 1, |i, i_n| {
            self.zeta[(i, vertex_index(self.m, self.m, i_n))]
        })
    }

    /// Circulation of the trailing edge panel row `[n]`.
    pub fn trailing_edge_gamma(&self) -> Vec<f64> {
        if self.m == 0 {
            return vec![0.; self.n];
        }
        (0..self.n).map(|i_n| self.gamma[(self.m - 1, i_n)]).collect()
    }

    /// Leading to trailing edge distance of each spanwise vertex column.
    pub fn local_chords(&self) -> Vec<f64> {
        (0..=self.n)
            .map(|i_n| {
                norm(sub(
                    col3(self.zeta.as_ref(), vertex_index(self.m, self.m, i_n)),
                    col3(self.zeta.as_ref(), vertex_index(self.m, 0, i_n)),
                ))
            })
            .collect()
    }
}

//------------------------------------------------------------------------------
// Wake surface
//------------------------------------------------------------------------------

/// Wake attached to the trailing edge of a lifting surface. Vertex row 0 sits
/// on the trailing edge and holds the newest shed vorticity; `rows` never
/// exceeds the configured `mstar`.
#[derive(Debug, Clone)]
pub struct WakeSurface {
    pub rows: usize,            // Current number of panel rows
    pub n: usize,               // Spanwise panels, equal to the parent surface
    pub zeta_star: Mat<f64>,    // Vertex positions `[3][(rows + 1)(n + 1)]`
    pub gamma_star: Mat<f64>,   // Ring circulation `[rows][n]`
    pub dist_to_orig: Vec<f64>, // Distance along the wake from the trailing edge `[(rows + 1)(n + 1)]`
}

impl WakeSurface {
    /// Wake with no panels, only the trailing edge line.
    pub fn empty(trailing_edge: MatRef<f64>) -> Self {
        let n = trailing_edge.ncols().saturating_sub(1);
        Self {
            rows: 0,
            n,
            zeta_star: trailing_edge.to_owned(),
            gamma_star: Mat::zeros(0, n),
            dist_to_orig: vec![0.; n + 1],
        }
    }

    /// Wake from vertex rows, with the distances recomputed along each column.
    /// Fewer than two vertex rows give a wake without panels.
    pub fn from_vertices(zeta_star: Mat<f64>, gamma_star: Mat<f64>, n: usize) -> Self {
        let rows = (zeta_star.ncols() / (n + 1)).saturating_sub(1);
        let mut wake = Self {
            rows,
            n,
            zeta_star,
            gamma_star,
            dist_to_orig: vec![],
        };
        wake.update_distances();
        wake
    }

    pub fn n_vertices(&self) -> usize {
        (self.rows + 1) * (self.n + 1)
    }

    pub fn n_panels(&self) -> usize {
        self.rows * self.n
    }

    pub fn vertex(&self, i_m: usize, i_n: usize) -> Vec3 {
        col3(self.zeta_star.as_ref(), vertex_index(self.rows, i_m, i_n))
    }

    pub fn corners(&self, i_m: usize, i_n: usize) -> [Vec3; 4] {
        panel_corners(self.zeta_star.as_ref(), self.rows, i_m, i_n)
    }

    /// Mean distance from the trailing edge of the panel's corners.
    pub fn panel_distance(&self, i_m: usize, i_n: usize) -> f64 {
        panel_vertices(self.rows, i_m, i_n)
            .iter()
            .map(|&v| self.dist_to_orig[v])
            .sum::<f64>()
            / 4.
    }

    /// Cumulative distance of every vertex from the trailing edge, measured
    /// along its spanwise column.
    pub fn update_distances(&mut self) {
        let mut dist = vec![0.; self.n_vertices()];
        (0..=self.n).for_each(|i_n| {
            (1..=self.rows).for_each(|i_m| {
                let a = vertex_index(self.rows, i_m - 1, i_n);
                let b = vertex_index(self.rows, i_m, i_n);
                dist[b] = dist[a]
                    + norm(sub(
                        col3(self.zeta_star.as_ref(), b),
                        col3(self.zeta_star.as_ref(), a),
                    ));
            });
        });
        self.dist_to_orig = dist;
    }
}

//------------------------------------------------------------------------------
// Nonlifting body
//------------------------------------------------------------------------------

/// Closed or open body represented by constant strength source panels.
#[derive(Debug, Clone)]
pub struct NonliftingSurface {
    pub m: usize,
    pub n: usize,
    pub zeta: Mat<f64>,          // `[3][n_vertices]`
    pub zeta_dot: Mat<f64>,      // `[3][n_vertices]`
    pub u_ext: Mat<f64>,         // `[3][n_vertices]`
    pub geometry: PanelGeometry, // Outward normals
    pub sigma: Mat<f64>,         // Source strength `[m][n]`
    pub pressure_coefficient: Mat<f64>, // `[m][n]`
}

impl NonliftingSurface {
    pub fn new(m: usize, n: usize, zeta: Mat<f64>) -> Self {
        let n_vertices = (m + 1) * (n + 1);
        let geometry = PanelGeometry::from_zeta(zeta.as_ref(), m, n);
        Self {
            m,
            n,
            zeta,
            zeta_dot: Mat::zeros(3, n_vertices),
            u_ext: Mat::zeros(3, n_vertices),
            geometry,
            sigma: Mat::zeros(m, n),
            pressure_coefficient: Mat::zeros(m, n),
        }
    }

    pub fn n_panels(&self) -> usize {
        self.m * self.n
    }

    pub fn is_empty(&self) -> bool {
        self.m == 0 || self.n == 0
    }
}

#[derive(Debug, Clone, Default)]
pub struct NonliftingTimestep {
    pub surfaces: Vec<NonliftingSurface>,
}

//------------------------------------------------------------------------------
// Timestep snapshot
//------------------------------------------------------------------------------

/// Loads at the structural nodes, B frame `[6][n_nodes]`.
#[derive(Debug, Clone)]
pub struct BeamForces {
    pub steady: Mat<f64>,
    pub unsteady: Mat<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct AeroTimestep {
    pub surfaces: Vec<LiftingSurface>,
    pub wakes: Vec<WakeSurface>,

    // Aggregates per surface: force and moment about the A origin
    pub inertial_steady_forces: Vec<[f64; 6]>,   // G frame
    pub inertial_unsteady_forces: Vec<[f64; 6]>, // G frame
    pub body_steady_forces: Vec<[f64; 6]>,       // A frame
    pub body_unsteady_forces: Vec<[f64; 6]>,     // A frame

    // Totals from the nodal loads
    pub total_steady_force_g: [f64; 6],
    pub total_unsteady_force_g: [f64; 6],
    pub total_steady_force_a: [f64; 6],
    pub total_unsteady_force_a: [f64; 6],

    /// Loads mapped to the beam nodes, computed on first access
    pub beam_forces: OnceCell<BeamForces>,
}

impl AeroTimestep {
    /// Snapshot with zeroed fields for the given surfaces, each with an empty
    /// wake at its trailing edge.
    pub fn new(surfaces: Vec<LiftingSurface>) -> Self {
        let n_surf = surfaces.len();
        let wakes = surfaces
            .iter()
            .map(|s| WakeSurface::empty(s.trailing_edge().as_ref()))
            .collect();
        Self {
            surfaces,
            wakes,
            inertial_steady_forces: vec![[0.; 6]; n_surf],
            inertial_unsteady_forces: vec![[0.; 6]; n_surf],
            body_steady_forces: vec![[0.; 6]; n_surf],
            body_unsteady_forces: vec![[0.; 6]; n_surf],
            ..Default::default()
        }
    }

    pub fn n_surf(&self) -> usize {
        self.surfaces.len()
    }

    /// Copy for the next timestep with the derived caches cleared.
    pub fn next(&self) -> Self {
        let mut ts = self.clone();
        ts.beam_forces = OnceCell::new();
        ts
    }

    pub fn zeta(&self) -> Vec<Mat<f64>> {
        self.surfaces.iter().map(|s| s.zeta.clone()).collect()
    }
}

//------------------------------------------------------------------------------
// Grid definition and generation
//------------------------------------------------------------------------------

/// Already parsed description of one lifting surface: each spanwise vertex
/// column `i_n` is attached to structural node `node_ids[i_n]` and every
/// vertex carries an offset in that node's B frame.
#[derive(Debug, Clone)]
pub struct SurfaceDefinition {
    pub m: usize,
    pub n: usize,
    pub node_ids: Vec<usize>, // Structural node per spanwise vertex column `[n + 1]`
    pub offsets: Mat<f64>,    // Vertex offsets in the node B frame `[3][(m + 1)(n + 1)]`
}

impl SurfaceDefinition {
    pub fn validate(&self, surface: usize, n_nodes: usize) -> Result<()> {
        if self.m == 0 {
            return Err(AeroelasticError::config(
                "grid.m",
                format!("surface {surface} needs at least one chordwise panel"),
            ));
        }
        if self.n == 0 {
            return Err(AeroelasticError::config(
                "grid.n",
                format!("surface {surface} needs at least one spanwise panel"),
            ));
        }
        if self.node_ids.len() != self.n + 1 {
            return Err(AeroelasticError::Dimension {
                what: "surface node list",
                expected: self.n + 1,
                found: self.node_ids.len(),
            });
        }
        if self.offsets.nrows() != 3 || self.offsets.ncols() != (self.m + 1) * (self.n + 1) {
            return Err(AeroelasticError::Dimension {
                what: "surface vertex offsets",
                expected: (self.m + 1) * (self.n + 1),
                found: self.offsets.ncols(),
            });
        }
        if (0..self.offsets.ncols()).any(|v| (0..3).any(|i| !self.offsets[(i, v)].is_finite())) {
            return Err(AeroelasticError::config(
                "grid.offsets",
                format!("surface {surface} has non-finite vertex offsets"),
            ));
        }
        if let Some(&node) = self.node_ids.iter().find(|&&id| id >= n_nodes) {
            return Err(AeroelasticError::config(
                "grid.node_ids",
                format!("surface {surface} references node {node}, model has {n_nodes}"),
            ));
        }
        Ok(())
    }
}

/// Vertex positions of a surface from the structural state,
/// `zeta = C_GA (pos + C_AB offset)`.
pub fn generate_zeta(def: &SurfaceDefinition, beam: &StructTimestep) -> Mat<f64> {
    let cga = beam.cga();
    let mut zeta = Mat::zeros(3, (def.m + 1) * (def.n + 1));
    (0..=def.n).for_each(|i_n| {
        let node = def.node_ids[i_n];
        let cab = beam.cab(node);
        let pos = col3(beam.pos.as_ref(), node);
        (0..=def.m).for_each(|i_m| {
            let v = vertex_index(def.m, i_m, i_n);
            let r = mat3_vec(cab.as_ref(), col3(def.offsets.as_ref(), v));
            set_col3(zeta.as_mut(), v, mat3_vec(cga.as_ref(), add(pos, r)));
        });
    });
    zeta
}

/// Vertex velocities of a surface from the structural state,
/// `zeta_dot = C_GA (v + omega x (pos + r) + pos_dot + C_AB (Omega_B x offset))`.
pub fn generate_zeta_dot(def: &SurfaceDefinition, beam: &StructTimestep) -> Mat<f64> {
    let cga = beam.cga();
    let v_a = [beam.for_vel[0], beam.for_vel[1], beam.for_vel[2]];
    let omega_a = [beam.for_vel[3], beam.for_vel[4], beam.for_vel[5]];
    let mut zeta_dot = Mat::zeros(3, (def.m + 1) * (def.n + 1));
    (0..=def.n).for_each(|i_n| {
        let node = def.node_ids[i_n];
        let cab = beam.cab(node);
        let pos = col3(beam.pos.as_ref(), node);
        let pos_dot = col3(beam.pos_dot.as_ref(), node);
        let omega_b = col3(beam.psi_dot.as_ref(), node);
        (0..=def.m).for_each(|i_m| {
            let v = vertex_index(def.m, i_m, i_n);
            let offset = col3(def.offsets.as_ref(), v);
            let r = add(pos, mat3_vec(cab.as_ref(), offset));
            let local = mat3_vec(cab.as_ref(), cross(omega_b, offset));
            let vel = add(add(v_a, cross(omega_a, r)), add(pos_dot, local));
            set_col3(zeta_dot.as_mut(), v, mat3_vec(cga.as_ref(), vel));
        });
    });
    zeta_dot
}

/// Builds the lifting surfaces of a snapshot from their definitions.
pub fn generate_surfaces(defs: &[SurfaceDefinition], beam: &StructTimestep) -> Vec<LiftingSurface> {
    defs.iter()
        .map(|def| {
            let mut surface = LiftingSurface::new(def.m, def.n);
            surface.set_zeta(generate_zeta(def, beam));
            surface.zeta_dot = generate_zeta_dot(def, beam);
            surface
        })
        .collect()
}

/// Moves the grid of an existing snapshot with the structure, keeping its
/// circulation and wake.
pub fn update_surfaces(defs: &[SurfaceDefinition], aero: &mut AeroTimestep, beam: &StructTimestep) {
    aero.surfaces.iter_mut().zip(defs).for_each(|(surface, def)| {
        surface.set_zeta(generate_zeta(def, beam));
        surface.zeta_dot = generate_zeta_dot(def, beam);
    });
    aero.beam_forces.take();
}

/// Planar rectangular wing along the A frame y axis, chord along +x.
/// Nodes lie on the elastic axis at `y = y_root + span * i_n / n`.
#[derive(Debug, Clone)]
pub struct RectangularWing {
    pub chord: f64,
    pub span: f64,
    pub m: usize,
    pub n: usize,
    pub elastic_axis: f64, // Chord fraction behind the leading edge
    pub y_root: f64,
}

impl RectangularWing {
    pub fn new(chord: f64, span: f64, m: usize, n: usize) -> Self {
        Self {
            chord,
            span,
            m,
            n,
            elastic_axis: 0.25,
            y_root: 0.,
        }
    }

    pub fn elastic_axis(mut self, fraction: f64) -> Self {
        self.elastic_axis = fraction;
        self
    }

    pub fn y_root(mut self, y: f64) -> Self {
        self.y_root = y;
        self
    }

    /// Node positions on the elastic axis `[3][n + 1]`.
    pub fn node_positions(&self) -> Mat<f64> {
        let n = self.n.max(1) as f64;
        Mat::from_fn(3, self.n + 1, |i, i_n| match i {
            1 => self.y_root + self.span * (i_n as f64) / n,
            _ => 0.,
        })
    }

    /// Surface definition attached to nodes `first_node..first_node + n + 1`.
    /// A wing without panels gives a definition that fails validation.
    pub fn definition(&self, first_node: usize) -> SurfaceDefinition {
        let m = self.m.max(1) as f64;
        let offsets = Mat::from_fn(3, (self.m + 1) * (self.n + 1), |i, v| match i {
            0 => {
                let i_m = v % (self.m + 1);
                self.chord * ((i_m as f64) / m - self.elastic_axis)
            }
            _ => 0.,
        });
        SurfaceDefinition {
            m: self.m,
            n: self.n,
            node_ids: (first_node..first_node + self.n + 1).collect(),
            offsets,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_panel_normal_and_area() {
        struct Case {
            corners: [Vec3; 4],
            normal: Vec3,
            area: f64,
        }

        let cases = vec![
            Case {
                corners: [[0., 0., 0.], [1., 0., 0.], [1., 1., 0.], [0., 1., 0.]],
                normal: [0., 0., 1.],
                area: 1.,
            },
            Case {
                corners: [[0., 0., 0.], [0., 0., 2.], [0., 3., 2.], [0., 3., 0.]],
                normal: [-1., 0., 0.],
                area: 6.,
            },
        ];

        for case in cases {
            let (normal, area) = panel_normal_area(&case.corners);
            for i in 0..3 {
                assert_relative_eq!(normal[i], case.normal[i], epsilon = 1e-14);
            }
            assert_relative_eq!(area, case.area, epsilon = 1e-14);
        }
    }

    #[test]
    fn test_rectangular_wing_geometry() {
        let wing = RectangularWing::new(2., 8., 4, 8);
        let beam = StructTimestep::new(wing.node_positions());
        let surfaces = generate_surfaces(&[wing.definition(0)], &beam);
        let s = &surfaces[0];

        assert_eq!(s.n_vertices(), 45);
        assert_eq!(s.n_panels(), 32);
        assert_relative_eq!(s.geometry.areas.iter().sum::<f64>(), 16., epsilon = 1e-12);
        (0..s.n_panels()).for_each(|p| assert_relative_eq!(s.geometry.normals[(2, p)], 1.));

        // Leading edge half a chord ahead of the elastic axis
        assert_relative_eq!(s.zeta[(0, vertex_index(4, 0, 3))], -0.5, epsilon = 1e-14);
        assert_relative_eq!(s.trailing_edge()[(0, 2)], 1.5, epsilon = 1e-14);
        s.local_chords()
            .iter()
            .for_each(|&c| assert_relative_eq!(c, 2., epsilon = 1e-14));
    }

    #[test]
    fn test_zeta_dot_of_rotating_frame() {
        let wing = RectangularWing::new(1., 4., 1, 2).elastic_axis(0.);
        let mut beam = StructTimestep::new(wing.node_positions());
        beam.for_vel = [0., 0., 0., 0., 0., 3.];
        let zeta_dot = generate_zeta_dot(&wing.definition(0), &beam);

        // Trailing edge of the tip: r = (1, 4, 0), omega x r = (-12, 3, 0)
        let v = vertex_index(1, 1, 2);
        assert_relative_eq!(zeta_dot[(0, v)], -12., epsilon = 1e-12);
        assert_relative_eq!(zeta_dot[(1, v)], 3., epsilon = 1e-12);
        assert_relative_eq!(zeta_dot[(2, v)], 0., epsilon = 1e-12);
    }

    #[test]
    fn test_degenerate_definitions_rejected() {
        struct Case {
            def: SurfaceDefinition,
            field: &'static str,
        }

        let mut offsets = RectangularWing::new(1., 4., 2, 2).definition(0);
        offsets.offsets[(0, 3)] = f64::NAN;
        let cases = vec![
            Case {
                def: RectangularWing::new(1., 4., 0, 4).definition(0),
                field: "grid.m",
            },
            Case {
                def: RectangularWing::new(1., 4., 2, 0).definition(0),
                field: "grid.n",
            },
            Case {
                def: offsets,
                field: "grid.offsets",
            },
        ];

        for case in cases {
            match case.def.validate(0, 5) {
                Err(AeroelasticError::Config { field, .. }) => assert_eq!(field, case.field),
                other => panic!("expected config error for {}, got {:?}", case.field, other),
            }
        }

        // No vertices at all gives an empty wake instead of underflowing
        let wake = WakeSurface::from_vertices(Mat::zeros(3, 0), Mat::zeros(0, 1), 1);
        assert_eq!(wake.rows, 0);
        assert_eq!(wake.n_panels(), 0);
    }

    #[test]
    fn test_wake_distances() {
        let zeta_star = Mat::from_fn(3, 6, |i, v| match i {
            0 => (v % 3) as f64 * 0.5,
            1 => (v / 3) as f64,
            _ => 0.,
        });
        let wake = WakeSurface::from_vertices(zeta_star, Mat::zeros(2, 1), 1);
        assert_eq!(wake.rows, 2);
        assert_relative_eq!(wake.dist_to_orig[2], 1.0, epsilon = 1e-14);
        assert_relative_eq!(wake.dist_to_orig[4], 0.5, epsilon = 1e-14);
        assert_relative_eq!(wake.panel_distance(1, 0), 0.75, epsilon = 1e-14);
    }
}
