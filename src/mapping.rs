//! Transfer of loads and motions between the aerodynamic grid and the
//! structural nodes.
//!
//! Every vertex of spanwise column `i_n` of a surface belongs to one
//! structural node. Loads go G -> A -> B with the moment taken about the
//! node; linear gains relate grid perturbations (G frame, three components
//! per vertex, surfaces concatenated) to nodal degrees of freedom (A frame
//! translation and small rotation vector per free node, then the optional
//! rigid body degrees of freedom).

use faer::prelude::*;
use itertools::Itertools;

use crate::error::{AeroelasticError, Result};
use crate::grid::{AeroTimestep, BeamForces, LiftingSurface, SurfaceDefinition};
use crate::structure::StructTimestep;
use crate::util::{add, col3, cross, mat3_vec, mat3t_vec, skew, sub, Vec3};

#[derive(Debug, Clone)]
struct SurfaceMap {
    m: usize,
    n: usize,
    node_ids: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct AeroStructMapping {
    surfaces: Vec<SurfaceMap>,
    pub n_nodes: usize,
}

impl AeroStructMapping {
    pub fn new(defs: &[SurfaceDefinition], n_nodes: usize) -> Result<Self> {
        defs.iter()
            .enumerate()
            .try_for_each(|(i, def)| def.validate(i, n_nodes))?;
        Ok(Self {
            surfaces: defs
                .iter()
                .map(|def| SurfaceMap {
                    m: def.m,
                    n: def.n,
                    node_ids: def.node_ids.clone(),
                })
                .collect(),
            n_nodes,
        })
    }

    pub fn n_surf(&self) -> usize {
        self.surfaces.len()
    }

    /// Total number of grid vertices over all surfaces.
    pub fn n_vertices(&self) -> usize {
        self.surfaces.iter().map(|s| (s.m + 1) * (s.n + 1)).sum()
    }

    /// Structural node carrying `vertex` of `surface`.
    pub fn node(&self, surface: usize, vertex: usize) -> usize {
        let s = &self.surfaces[surface];
        s.node_ids[vertex / (s.m + 1)]
    }

    fn check_surfaces(&self, found: usize) -> Result<()> {
        if found != self.surfaces.len() {
            return Err(AeroelasticError::Dimension {
                what: "mapped surfaces",
                expected: self.surfaces.len(),
                found,
            });
        }
        Ok(())
    }

    /// Nodal loads in each node's B frame `[6][n_nodes]` from vertex loads
    /// `[6][n_vertices]` in G. `zeta` are the vertex positions in G relative
    /// to the A origin.
    pub fn aero_to_struct_forces(
        &self,
        forces: &[MatRef<f64>],
        zeta: &[MatRef<f64>],
        beam: &StructTimestep,
    ) -> Result<Mat<f64>> {
        self.check_surfaces(forces.len())?;
        self.check_surfaces(zeta.len())?;
        let cga = beam.cga();
        let mut forces_a = Mat::<f64>::zeros(6, self.n_nodes);

        for (i_surf, (f, z)) in forces.iter().zip(zeta).enumerate() {
            let s = &self.surfaces[i_surf];
            if f.ncols() != (s.m + 1) * (s.n + 1) {
                return Err(AeroelasticError::Dimension {
                    what: "surface vertex forces",
                    expected: (s.m + 1) * (s.n + 1),
                    found: f.ncols(),
                });
            }
            (0..f.ncols()).for_each(|v| {
                let node = self.node(i_surf, v);
                let f_a = mat3t_vec(cga.as_ref(), col3(f.subrows(0, 3), v));
                let m_a = mat3t_vec(cga.as_ref(), col3(f.subrows(3, 3), v));
                let arm = sub(mat3t_vec(cga.as_ref(), col3(*z, v)), col3(beam.pos.as_ref(), node));
                let moment = add(m_a, cross(arm, f_a));
                (0..3).for_each(|i| {
                    forces_a[(i, node)] += f_a[i];
                    forces_a[(3 + i, node)] += moment[i];
                });
            });
        }

        // A -> B
        let mut forces_b = Mat::zeros(6, self.n_nodes);
        (0..self.n_nodes).for_each(|node| {
            let cab = beam.cab(node);
            let f = mat3t_vec(cab.as_ref(), col3(forces_a.subrows(0, 3), node));
            let m = mat3t_vec(cab.as_ref(), col3(forces_a.subrows(3, 3), node));
            (0..3).for_each(|i| {
                forces_b[(i, node)] = f[i];
                forces_b[(3 + i, node)] = m[i];
            });
        });
        Ok(forces_b)
    }

    /// Steady and unsteady loads of a snapshot at the structural nodes.
    pub fn beam_forces(&self, aero: &AeroTimestep, beam: &StructTimestep) -> Result<BeamForces> {
        let zeta = aero.surfaces.iter().map(|s| s.zeta.as_ref()).collect_vec();
        let steady = aero.surfaces.iter().map(|s| s.forces.as_ref()).collect_vec();
        let unsteady = aero
            .surfaces
            .iter()
            .map(|s| s.dynamic_forces.as_ref())
            .collect_vec();
        Ok(BeamForces {
            steady: self.aero_to_struct_forces(&steady, &zeta, beam)?,
            unsteady: self.aero_to_struct_forces(&unsteady, &zeta, beam)?,
        })
    }

    //--------------------------------------------------------------------------
    // Linear gains
    //--------------------------------------------------------------------------

    /// Gains about the state `beam` with grid `surfaces`. `dof_of_node[i]` is
    /// the first of the six flexible degrees of freedom of node `i` (`None`
    /// when clamped); `num_dof_rig` is 0 or 6, the rigid block being the
    /// frame translation and rotation (A frame).
    pub fn gains(
        &self,
        surfaces: &[LiftingSurface],
        beam: &StructTimestep,
        dof_of_node: &[Option<usize>],
        num_dof_rig: usize,
    ) -> Result<MappingGains> {
        self.check_surfaces(surfaces.len())?;
        if dof_of_node.len() != self.n_nodes {
            return Err(AeroelasticError::Dimension {
                what: "node freedom map",
                expected: self.n_nodes,
                found: dof_of_node.len(),
            });
        }
        if num_dof_rig != 0 && num_dof_rig != 6 {
            return Err(AeroelasticError::config(
                "linear.num_dof_rig",
                "must be 0 (clamped) or 6 (free flying)",
            ));
        }

        let num_dof_flex = dof_of_node.iter().flatten().count() * 6;
        let n_dof = num_dof_flex + num_dof_rig;
        let n_aero = 3 * self.n_vertices();
        let cga = beam.cga();
        let v_a = [beam.for_vel[0], beam.for_vel[1], beam.for_vel[2]];
        let omega = [beam.for_vel[3], beam.for_vel[4], beam.for_vel[5]];
        let cga_omega = &cga * &skew(omega);

        let mut kdisp = Mat::<f64>::zeros(n_aero, n_dof);
        let mut kvel_vel = Mat::<f64>::zeros(n_aero, n_dof);
        let mut kvel_disp = Mat::<f64>::zeros(n_aero, n_dof);

        let mut vertex_dof = Vec::with_capacity(self.n_vertices());
        let mut row = 0;
        for (i_surf, s) in surfaces.iter().enumerate() {
            for v in 0..s.n_vertices() {
                let node = self.node(i_surf, v);
                let zeta_a = mat3t_vec(cga.as_ref(), col3(s.zeta.as_ref(), v));
                let arm = sub(zeta_a, col3(beam.pos.as_ref(), node));
                vertex_dof.push(dof_of_node[node]);

                if let Some(dof) = dof_of_node[node] {
                    // C_GA [I, -r~]
                    let block = translation_rotation(cga.as_ref(), arm);
                    kdisp.as_mut().submatrix_mut(row, dof, 3, 6).copy_from(&block);
                    kvel_vel.as_mut().submatrix_mut(row, dof, 3, 6).copy_from(&block);
                    // C_GA omega~ [I, -r~]
                    let moving = translation_rotation(cga_omega.as_ref(), arm);
                    kvel_disp.as_mut().submatrix_mut(row, dof, 3, 6).copy_from(&moving);
                }

                if num_dof_rig == 6 {
                    let block = translation_rotation(cga.as_ref(), zeta_a);
                    kdisp.as_mut().submatrix_mut(row, num_dof_flex, 3, 6).copy_from(&block);
                    kvel_vel.as_mut().submatrix_mut(row, num_dof_flex, 3, 6).copy_from(&block);
                    // Frame rotation turns the vertex velocity with it
                    let u_a = add(v_a, cross(omega, zeta_a));
                    let turn = (&cga * &skew(u_a)) * Scale(-1.);
                    kvel_disp.as_mut().submatrix_mut(row, num_dof_flex + 3, 3, 3).copy_from(&turn);
                }
                row += 3;
            }
        }

        Ok(MappingGains {
            kforces: kdisp.transpose().to_owned(),
            kdisp,
            kvel_vel,
            kvel_disp,
            vertex_dof,
            cga,
            num_dof_flex,
            num_dof_rig,
        })
    }
}

/// `C [I, -skew(r)]`, a 3x6 block.
fn translation_rotation(c: MatRef<f64>, r: Vec3) -> Mat<f64> {
    let mut block = Mat::zeros(3, 6);
    block.as_mut().submatrix_mut(0, 0, 3, 3).copy_from(c);
    let rotation = (c * skew(r).as_ref()) * Scale(-1.);
    block.as_mut().submatrix_mut(0, 3, 3, 3).copy_from(&rotation);
    block
}

/// Linear relations between grid and structural perturbations. The frame
/// orientation is a displacement degree of freedom, so grid positions depend
/// on displacements only and there is no displacement-from-velocity gain.
#[derive(Debug, Clone)]
pub struct MappingGains {
    pub kdisp: Mat<f64>,     // Grid displacement wrt nodal displacement `[3 nv][n_dof]`
    pub kvel_vel: Mat<f64>,  // Grid velocity wrt nodal velocity `[3 nv][n_dof]`
    pub kvel_disp: Mat<f64>, // Grid velocity wrt nodal displacement `[3 nv][n_dof]`
    pub kforces: Mat<f64>,   // Nodal loads (A frame) wrt vertex forces `[n_dof][3 nv]`
    pub vertex_dof: Vec<Option<usize>>, // First flexible dof of each vertex's node
    pub cga: Mat<f64>,
    pub num_dof_flex: usize,
    pub num_dof_rig: usize,
}

impl MappingGains {
    pub fn n_dof(&self) -> usize {
        self.num_dof_flex + self.num_dof_rig
    }

    pub fn n_aero(&self) -> usize {
        self.kdisp.nrows()
    }
}

/// Nodal loads rotated from each node's B frame to A `[6][n_nodes]`.
pub fn nodal_b_to_a(forces_b: MatRef<f64>, beam: &StructTimestep) -> Mat<f64> {
    let mut forces_a = Mat::zeros(6, forces_b.ncols());
    (0..forces_b.ncols()).for_each(|node| {
        let cab = beam.cab(node);
        let f = mat3_vec(cab.as_ref(), col3(forces_b.subrows(0, 3), node));
        let m = mat3_vec(cab.as_ref(), col3(forces_b.subrows(3, 3), node));
        (0..3).for_each(|i| {
            forces_a[(i, node)] = f[i];
            forces_a[(3 + i, node)] = m[i];
        });
    });
    forces_a
}

/// Resultant of B frame nodal loads in A, moment about the A origin.
pub fn total_forces_a(forces_b: MatRef<f64>, beam: &StructTimestep) -> [f64; 6] {
    let forces_a = nodal_b_to_a(forces_b, beam);
    let mut total = [0.; 6];
    (0..forces_a.ncols()).for_each(|node| {
        let f = col3(forces_a.subrows(0, 3), node);
        let m = add(
            col3(forces_a.subrows(3, 3), node),
            cross(col3(beam.pos.as_ref(), node), f),
        );
        (0..3).for_each(|i| {
            total[i] += f[i];
            total[3 + i] += m[i];
        });
    });
    total
}

/// Rotates an A frame 6-vector to G.
pub fn a_to_g(total_a: &[f64; 6], beam: &StructTimestep) -> [f64; 6] {
    let cga = beam.cga();
    let f = mat3_vec(cga.as_ref(), [total_a[0], total_a[1], total_a[2]]);
    let m = mat3_vec(cga.as_ref(), [total_a[3], total_a[4], total_a[5]]);
    [f[0], f[1], f[2], m[0], m[1], m[2]]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{generate_surfaces, generate_zeta, RectangularWing};
    use crate::util::{quat_compose, quat_from_rotation_vector};
    use approx::assert_relative_eq;
    use equator::assert;
    use faer::utils::approx::*;

    fn twisted_wing() -> (RectangularWing, StructTimestep) {
        let wing = RectangularWing::new(1.5, 6., 3, 4).elastic_axis(0.4);
        let mut beam = StructTimestep::new(wing.node_positions());
        (0..beam.n_nodes()).for_each(|node| {
            let q = quat_from_rotation_vector([0., 0.05 * node as f64, 0.02]);
            beam.set_node_quat(node, q);
        });
        beam.quat_a = quat_from_rotation_vector([0.1, -0.3, 0.2]);
        (wing, beam)
    }

    #[test]
    fn test_force_conservation() {
        let (wing, beam) = twisted_wing();
        let def = wing.definition(0);
        let mapping = AeroStructMapping::new(&[def.clone()], beam.n_nodes()).unwrap();
        let surfaces = generate_surfaces(&[def], &beam);
        let s = &surfaces[0];

        let forces_g = Mat::from_fn(6, s.n_vertices(), |i, v| {
            if i < 3 {
                ((i + 1) as f64) * (1. + 0.1 * v as f64) * if v % 2 == 0 { 1. } else { -0.5 }
            } else {
                0.
            }
        });
        let forces_b = mapping
            .aero_to_struct_forces(&[forces_g.as_ref()], &[s.zeta.as_ref()], &beam)
            .unwrap();
        let total = a_to_g(&total_forces_a(forces_b.as_ref(), &beam), &beam);

        // Direct resultant in G about the A origin
        let mut expected = [0.; 6];
        (0..s.n_vertices()).for_each(|v| {
            let f = col3(forces_g.as_ref(), v);
            let m = cross(col3(s.zeta.as_ref(), v), f);
            (0..3).for_each(|i| {
                expected[i] += f[i];
                expected[3 + i] += m[i];
            });
        });
        (0..6).for_each(|i| assert_relative_eq!(total[i], expected[i], epsilon = 1e-10));
    }

    #[test]
    fn test_kforces_is_kdisp_transpose() {
        let (wing, mut beam) = twisted_wing();
        beam.for_vel = [1., 0., 0., 0., 0., 0.5];
        let def = wing.definition(0);
        let mapping = AeroStructMapping::new(&[def.clone()], beam.n_nodes()).unwrap();
        let surfaces = generate_surfaces(&[def], &beam);
        let dof_of_node = (0..beam.n_nodes())
            .map(|node| if node == 0 { None } else { Some(6 * (node - 1)) })
            .collect_vec();

        for num_dof_rig in [0, 6] {
            let gains = mapping.gains(&surfaces, &beam, &dof_of_node, num_dof_rig).unwrap();
            assert_eq!(gains.n_dof(), 24 + num_dof_rig);
            assert_eq!(gains.n_aero(), 3 * 20);
            let approx_eq = CwiseMat(ApproxEq::eps());
            assert!(gains.kforces ~ gains.kdisp.transpose().to_owned());
        }
    }

    #[test]
    fn test_kdisp_matches_finite_difference() {
        let (wing, beam) = twisted_wing();
        let def = wing.definition(0);
        let mapping = AeroStructMapping::new(&[def.clone()], beam.n_nodes()).unwrap();
        let surfaces = generate_surfaces(&[def.clone()], &beam);
        let dof_of_node = (0..beam.n_nodes()).map(|node| Some(6 * node)).collect_vec();
        let gains = mapping.gains(&surfaces, &beam, &dof_of_node, 0).unwrap();

        let h = 1e-7;
        let node = 2;
        for k in 0..6 {
            let mut perturbed = beam.clone();
            if k < 3 {
                perturbed.pos[(k, node)] += h;
            } else {
                let mut rv = [0.; 3];
                rv[k - 3] = h;
                let q = quat_compose(quat_from_rotation_vector(rv), beam.node_quat(node));
                perturbed.set_node_quat(node, q);
            }
            let zeta = generate_zeta(&def, &perturbed);
            (0..zeta.ncols()).for_each(|v| {
                (0..3).for_each(|i| {
                    let fd = (zeta[(i, v)] - surfaces[0].zeta[(i, v)]) / h;
                    assert_relative_eq!(
                        fd,
                        gains.kdisp[(3 * v + i, 6 * node + k)],
                        epsilon = 1e-6
                    );
                });
            });
        }
    }

    #[test]
    fn test_invalid_node_reference() {
        let wing = RectangularWing::new(1., 4., 2, 4);
        match AeroStructMapping::new(&[wing.definition(1)], 5) {
            Err(AeroelasticError::Config { field, .. }) => assert_eq!(field, "grid.node_ids"),
            other => panic!("expected config error, got {:?}", other.map(|_| ())),
        }
    }
}
