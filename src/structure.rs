//! Structural state and the seam to the structural solver.
//!
//! The nonlinear beam solver itself lives outside this crate; it is reached
//! through [`StructuralSolver`]. Two reference implementations are provided:
//! a rigid body moving with a prescribed frame velocity and a small
//! displacement linear static model.

use faer::prelude::*;
use tracing::debug;

use crate::error::{AeroelasticError, Result};
use crate::util::{
    col3, mat3_vec, quat_as_matrix, quat_as_rotation_vector, quat_compose,
    quat_from_rotation_vector, quat_inverse, set_col3, Quat, Vec3, QUAT_IDENTITY,
};

#[derive(Debug, Clone)]
pub struct StructTimestep {
    pub pos: Mat<f64>,     // Node positions in A `[3][n_nodes]`
    pub quat: Mat<f64>,    // Node B frame orientation relative to A `[4][n_nodes]`
    pub pos_dot: Mat<f64>, // Node velocities relative to A, A frame `[3][n_nodes]`
    pub psi_dot: Mat<f64>, // Node angular velocity relative to A, B frame `[3][n_nodes]`
    pub for_pos: [f64; 6], // A origin position in G, and rotation vector
    pub for_vel: [f64; 6], // A frame velocity and angular velocity, A frame
    pub quat_a: Quat,      // Orientation of A relative to G
    pub steady_applied_forces: Mat<f64>,   // B frame `[6][n_nodes]`
    pub unsteady_applied_forces: Mat<f64>, // B frame `[6][n_nodes]`
}

impl StructTimestep {
    /// Undeformed state at rest with every B frame aligned with A.
    pub fn new(pos: Mat<f64>) -> Self {
        let n_nodes = pos.ncols();
        Self {
            pos,
            quat: Mat::from_fn(4, n_nodes, |i, _| QUAT_IDENTITY[i]),
            pos_dot: Mat::zeros(3, n_nodes),
            psi_dot: Mat::zeros(3, n_nodes),
            for_pos: [0.; 6],
            for_vel: [0.; 6],
            quat_a: QUAT_IDENTITY,
            steady_applied_forces: Mat::zeros(6, n_nodes),
            unsteady_applied_forces: Mat::zeros(6, n_nodes),
        }
    }

    pub fn n_nodes(&self) -> usize {
        self.pos.ncols()
    }

    pub fn node_quat(&self, node: usize) -> Quat {
        [
            self.quat[(0, node)],
            self.quat[(1, node)],
            self.quat[(2, node)],
            self.quat[(3, node)],
        ]
    }

    pub fn set_node_quat(&mut self, node: usize, q: Quat) {
        (0..4).for_each(|i| self.quat[(i, node)] = q[i]);
    }

    /// Rotation from A to G.
    pub fn cga(&self) -> Mat<f64> {
        quat_as_matrix(self.quat_a)
    }

    /// Rotation from the node B frame to A.
    pub fn cab(&self, node: usize) -> Mat<f64> {
        quat_as_matrix(self.node_quat(node))
    }

    /// Position of the A origin in G.
    pub fn origin(&self) -> Vec3 {
        [self.for_pos[0], self.for_pos[1], self.for_pos[2]]
    }

    /// Copy for the next timestep.
    pub fn next(&self) -> Self {
        self.clone()
    }

    /// Integrates the frame position and orientation over `dt` with the
    /// current `for_vel`.
    pub fn advance_frame(&mut self, dt: f64) {
        let cga = self.cga();
        let v_g = mat3_vec(cga.as_ref(), [self.for_vel[0], self.for_vel[1], self.for_vel[2]]);
        let omega_a = [self.for_vel[3], self.for_vel[4], self.for_vel[5]];
        (0..3).for_each(|i| self.for_pos[i] += v_g[i] * dt);
        let dq = quat_from_rotation_vector([omega_a[0] * dt, omega_a[1] * dt, omega_a[2] * dt]);
        self.quat_a = quat_compose(self.quat_a, dq);
        let rv = quat_as_rotation_vector(self.quat_a);
        self.for_pos[3..6].copy_from_slice(&rv);
    }

    /// Applied loads used by the structural solvers, B frame `[6][n_nodes]`.
    pub fn total_applied_forces(&self, include_unsteady: bool) -> Mat<f64> {
        if include_unsteady {
            &self.steady_applied_forces + &self.unsteady_applied_forces
        } else {
            self.steady_applied_forces.clone()
        }
    }
}

/// Per-call information for a structural step.
#[derive(Debug, Clone, Copy)]
pub struct StepInfo {
    pub timestep: usize,
    pub t: f64,
    pub dt: f64,
    pub include_unsteady: bool,
}

pub trait StructuralSolver {
    /// Static equilibrium under the applied loads of `state`, updated in place.
    fn solve_static(&mut self, state: &mut StructTimestep) -> Result<()>;

    /// Advances from `previous` to `next` under the applied loads of `next`.
    /// `next` starts as a copy of `previous` with the new loads set.
    fn step(
        &mut self,
        previous: &StructTimestep,
        next: &mut StructTimestep,
        info: StepInfo,
    ) -> Result<()>;
}

//------------------------------------------------------------------------------
// Rigid body with prescribed frame velocity
//------------------------------------------------------------------------------

/// Undeformable structure whose A frame follows a prescribed velocity
/// history; the last entry is held once the history runs out.
#[derive(Debug, Clone)]
pub struct RigidPrescribed {
    pub for_vel: Vec<[f64; 6]>,
}

impl RigidPrescribed {
    pub fn new(for_vel: Vec<[f64; 6]>) -> Self {
        Self { for_vel }
    }

    /// Constant rotation about an A frame axis, as for a rotor.
    pub fn rotor(rotation_velocity: Vec3) -> Self {
        Self {
            for_vel: vec![[
                0.,
                0.,
                0.,
                rotation_velocity[0],
                rotation_velocity[1],
                rotation_velocity[2],
            ]],
        }
    }

    pub fn velocity(&self, timestep: usize) -> [f64; 6] {
        self.for_vel
            .get(timestep)
            .or(self.for_vel.last())
            .copied()
            .unwrap_or([0.; 6])
    }
}

impl StructuralSolver for RigidPrescribed {
    fn solve_static(&mut self, _state: &mut StructTimestep) -> Result<()> {
        Ok(())
    }

    fn step(
        &mut self,
        _previous: &StructTimestep,
        next: &mut StructTimestep,
        info: StepInfo,
    ) -> Result<()> {
        next.for_vel = self.velocity(info.timestep);
        next.advance_frame(info.dt);
        next.pos_dot.fill(0.);
        next.psi_dot.fill(0.);
        Ok(())
    }
}

//------------------------------------------------------------------------------
// Linear static structure
//------------------------------------------------------------------------------

/// Small displacement model `K u = f` about a reference configuration.
/// `dof_of_node[i]` is the first of the six degrees of freedom of node `i`,
/// or `None` if the node is clamped. Loads are converted to A before the
/// solve; rotations are applied as small rotation vectors in A.
#[derive(Debug, Clone)]
pub struct LinearStatic {
    pub pos_ref: Mat<f64>,
    pub quat_ref: Mat<f64>,
    pub stiffness: Mat<f64>,
    pub dof_of_node: Vec<Option<usize>>,
    n_dofs: usize,
}

impl LinearStatic {
    pub fn new(
        reference: &StructTimestep,
        stiffness: Mat<f64>,
        dof_of_node: Vec<Option<usize>>,
    ) -> Result<Self> {
        let n_dofs = dof_of_node.iter().flatten().count() * 6;
        if stiffness.nrows() != n_dofs || stiffness.ncols() != n_dofs {
            return Err(AeroelasticError::Dimension {
                what: "structural stiffness matrix",
                expected: n_dofs,
                found: stiffness.nrows(),
            });
        }
        if dof_of_node.len() != reference.n_nodes() {
            return Err(AeroelasticError::Dimension {
                what: "node freedom map",
                expected: reference.n_nodes(),
                found: dof_of_node.len(),
            });
        }
        Ok(Self {
            pos_ref: reference.pos.clone(),
            quat_ref: reference.quat.clone(),
            stiffness,
            dof_of_node,
            n_dofs,
        })
    }

    /// Uncoupled translational and rotational springs at every node except
    /// the clamped one.
    pub fn nodal_springs(
        reference: &StructTimestep,
        k_translation: f64,
        k_rotation: f64,
        clamped_node: usize,
    ) -> Result<Self> {
        let mut next = 0;
        let dof_of_node = (0..reference.n_nodes())
            .map(|node| {
                if node == clamped_node {
                    None
                } else {
                    next += 6;
                    Some(next - 6)
                }
            })
            .collect::<Vec<_>>();
        let stiffness = Mat::from_fn(next, next, |i, j| match (i == j, i % 6 < 3) {
            (true, true) => k_translation,
            (true, false) => k_rotation,
            _ => 0.,
        });
        Self::new(reference, stiffness, dof_of_node)
    }

    pub fn n_dofs(&self) -> usize {
        self.n_dofs
    }

    /// Load vector in A from B frame nodal loads.
    fn load_vector(&self, state: &StructTimestep, forces_b: &Mat<f64>) -> Mat<f64> {
        let mut f = Mat::zeros(self.n_dofs, 1);
        self.dof_of_node
            .iter()
            .enumerate()
            .filter_map(|(node, dof)| dof.map(|d| (node, d)))
            .for_each(|(node, dof)| {
                let cab = state.cab(node);
                let force = mat3_vec(cab.as_ref(), col3(forces_b.subrows(0, 3), node));
                let moment = mat3_vec(cab.as_ref(), col3(forces_b.subrows(3, 3), node));
                (0..3).for_each(|i| {
                    f[(dof + i, 0)] = force[i];
                    f[(dof + 3 + i, 0)] = moment[i];
                });
            });
        f
    }

    fn solve(&self, state: &mut StructTimestep, include_unsteady: bool, timestep: usize) -> Result<()> {
        let f = self.load_vector(state, &state.total_applied_forces(include_unsteady));
        let u = self.stiffness.partial_piv_lu().solve(&f);
        if let Some(i) = (0..self.n_dofs).find(|&i| !u[(i, 0)].is_finite()) {
            return Err(AeroelasticError::NonFinite {
                timestep,
                surface: i / 6,
                quantity: "structural displacement",
            });
        }

        state.pos.copy_from(&self.pos_ref);
        state.quat.copy_from(&self.quat_ref);
        self.dof_of_node
            .iter()
            .enumerate()
            .filter_map(|(node, dof)| dof.map(|d| (node, d)))
            .for_each(|(node, dof)| {
                let p = col3(self.pos_ref.as_ref(), node);
                set_col3(
                    state.pos.as_mut(),
                    node,
                    [p[0] + u[(dof, 0)], p[1] + u[(dof + 1, 0)], p[2] + u[(dof + 2, 0)]],
                );
                let dq = quat_from_rotation_vector([
                    u[(dof + 3, 0)],
                    u[(dof + 4, 0)],
                    u[(dof + 5, 0)],
                ]);
                let q_ref = [
                    self.quat_ref[(0, node)],
                    self.quat_ref[(1, node)],
                    self.quat_ref[(2, node)],
                    self.quat_ref[(3, node)],
                ];
                state.set_node_quat(node, quat_compose(dq, q_ref));
            });
        debug!(timestep, max_displacement = u.norm_max(), "linear static solve");
        Ok(())
    }
}

impl StructuralSolver for LinearStatic {
    fn solve_static(&mut self, state: &mut StructTimestep) -> Result<()> {
        self.solve(state, false, 0)
    }

    /// Quasi-static response to the current loads, with node velocities from
    /// the change in position over the step.
    fn step(
        &mut self,
        previous: &StructTimestep,
        next: &mut StructTimestep,
        info: StepInfo,
    ) -> Result<()> {
        self.solve(next, info.include_unsteady, info.timestep)?;
        next.advance_frame(info.dt);
        next.pos_dot = (&next.pos - &previous.pos) * Scale(1. / info.dt);
        (0..next.n_nodes()).for_each(|node| {
            let dq = quat_compose(
                quat_inverse(previous.node_quat(node)),
                next.node_quat(node),
            );
            let rv = quat_as_rotation_vector(dq);
            set_col3(
                next.psi_dot.as_mut(),
                node,
                [rv[0] / info.dt, rv[1] / info.dt, rv[2] / info.dt],
            );
        });
        Ok(())
    }
}
