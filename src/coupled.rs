//! Static and dynamic fluid-structure coupling loops.
//!
//! The orchestrator owns the [`SimulationData`] history. Each step borrows
//! the last accepted snapshots and builds the next ones, which are appended
//! once the coupling iteration has finished.

use std::sync::mpsc::Sender;

use faer::prelude::*;
use tracing::{debug, info, warn};

use crate::aero_solver::{StaticUvlm, StepUvlm};
use crate::config::{DynamicCoupledSettings, StaticCoupledSettings};
use crate::error::{AeroelasticError, Result};
use crate::forces::{cached_beam_forces, AeroForcesCalculator};
use crate::grid::{generate_surfaces, update_surfaces, AeroTimestep, NonliftingTimestep, SurfaceDefinition};
use crate::mapping::AeroStructMapping;
use crate::structure::{StepInfo, StructTimestep, StructuralSolver};

//------------------------------------------------------------------------------
// History
//------------------------------------------------------------------------------

/// Time-aligned aerodynamic and structural snapshots; index 0 is the initial
/// condition.
#[derive(Debug, Clone)]
pub struct SimulationData {
    pub aero: Vec<AeroTimestep>,
    pub structure: Vec<StructTimestep>,
    pub nonlifting: Option<Vec<NonliftingTimestep>>,
}

impl SimulationData {
    pub fn new(aero: AeroTimestep, structure: StructTimestep, nonlifting: Option<NonliftingTimestep>) -> Self {
        Self {
            aero: vec![aero],
            structure: vec![structure],
            nonlifting: nonlifting.map(|n| vec![n]),
        }
    }

    pub fn len(&self) -> usize {
        self.aero.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aero.is_empty()
    }

    fn last(&self) -> (&AeroTimestep, &StructTimestep, Option<&NonliftingTimestep>) {
        let n = self.len() - 1;
        (
            &self.aero[n],
            &self.structure[n],
            self.nonlifting.as_ref().and_then(|v| v.last()),
        )
    }

    fn push(&mut self, aero: AeroTimestep, structure: StructTimestep, nonlifting: Option<NonliftingTimestep>) {
        self.aero.push(aero);
        self.structure.push(structure);
        if let (Some(history), Some(n)) = (self.nonlifting.as_mut(), nonlifting) {
            history.push(n);
        }
    }
}

/// Accepted step posted to the output channel.
#[derive(Debug, Clone)]
pub struct StepOutput {
    pub timestep: usize,
    pub t: f64,
    pub aero: AeroTimestep,
    pub structure: StructTimestep,
}

/// Outcome of a coupling iteration.
#[derive(Debug, Clone, Copy)]
pub struct Convergence {
    pub iterations: usize,
    pub residual: f64,
    pub converged: bool,
}

/// Relative change of the structural positions between two iterates.
fn position_residual(new: &StructTimestep, old: &StructTimestep) -> f64 {
    let change = (&new.pos - &old.pos).norm_l2();
    change / new.pos.norm_l2().max(f64::EPSILON)
}

/// `(1 - r) new + r old`
fn relax(new: MatRef<f64>, old: MatRef<f64>, r: f64) -> Mat<f64> {
    new * Scale(1. - r) + old * Scale(r)
}

fn non_convergence(
    solver: &'static str,
    strict: bool,
    timestep: usize,
    conv: Convergence,
) -> Result<()> {
    if strict {
        return Err(AeroelasticError::NonConvergence {
            solver,
            timestep,
            iterations: conv.iterations,
            residual: conv.residual,
        });
    }
    warn!(
        solver,
        timestep,
        iterations = conv.iterations,
        residual = conv.residual,
        "coupling did not converge, keeping last iterate"
    );
    Ok(())
}

//------------------------------------------------------------------------------
// Static coupling
//------------------------------------------------------------------------------

pub struct StaticCoupled<S: StructuralSolver> {
    pub settings: StaticCoupledSettings,
    aero: StaticUvlm,
    structure: S,
    defs: Vec<SurfaceDefinition>,
    mapping: AeroStructMapping,
}

impl<S: StructuralSolver> StaticCoupled<S> {
    pub fn new(
        settings: &StaticCoupledSettings,
        aero: StaticUvlm,
        structure: S,
        defs: Vec<SurfaceDefinition>,
        n_nodes: usize,
    ) -> Result<Self> {
        settings.validate()?;
        let mapping = AeroStructMapping::new(&defs, n_nodes)?;
        Ok(Self {
            settings: settings.clone(),
            aero,
            structure,
            defs,
            mapping,
        })
    }

    pub fn mapping(&self) -> &AeroStructMapping {
        &self.mapping
    }

    /// Aeroelastic equilibrium starting from `beam`. The loads are ramped
    /// over `n_load_steps`; each load step iterates aerodynamics, load
    /// transfer and structure until the positions settle. Errors and log
    /// records carry the load step index in place of a timestep.
    pub fn solve(
        &mut self,
        mut beam: StructTimestep,
        mut nonlifting: Option<NonliftingTimestep>,
    ) -> Result<(SimulationData, Convergence)> {
        let s = &self.settings;
        let mut aero = AeroTimestep::new(generate_surfaces(&self.defs, &beam));
        let mut conv = Convergence {
            iterations: 0,
            residual: f64::INFINITY,
            converged: false,
        };

        for load_step in 0..s.n_load_steps {
            let load_factor = (load_step + 1) as f64 / s.n_load_steps as f64;
            conv.converged = false;
            for iteration in 0..s.max_iter {
                update_surfaces(&self.defs, &mut aero, &beam);
                self.aero.solve(&mut aero, &beam, nonlifting.as_mut(), load_step)?;

                let forces = cached_beam_forces(&aero, &self.mapping, &beam)?;
                let r = if load_step == 0 && iteration == 0 {
                    0.
                } else {
                    s.relaxation_factor
                };
                beam.steady_applied_forces = relax(
                    (&forces.steady * Scale(load_factor)).as_ref(),
                    beam.steady_applied_forces.as_ref(),
                    r,
                );
                beam.unsteady_applied_forces.fill(0.);

                let previous = beam.clone();
                self.structure.solve_static(&mut beam)?;
                conv.iterations = iteration + 1;
                conv.residual = position_residual(&beam, &previous);
                debug!(load_step, iteration, residual = conv.residual, "static coupling");

                if conv.iterations >= s.minimum_steps && conv.residual < s.tolerance {
                    conv.converged = true;
                    break;
                }
            }
            if !conv.converged {
                non_convergence("static coupled", s.strict, load_step, conv)?;
            }
        }

        // Aerodynamics on the final shape
        update_surfaces(&self.defs, &mut aero, &beam);
        self.aero.solve(&mut aero, &beam, nonlifting.as_mut(), s.n_load_steps - 1)?;
        info!(
            iterations = conv.iterations,
            residual = conv.residual,
            converged = conv.converged,
            "static coupled solution"
        );
        Ok((SimulationData::new(aero, beam, nonlifting), conv))
    }
}

//------------------------------------------------------------------------------
// Dynamic coupling
//------------------------------------------------------------------------------

pub struct DynamicCoupled<S: StructuralSolver> {
    pub settings: DynamicCoupledSettings,
    aero: StepUvlm,
    structure: S,
    defs: Vec<SurfaceDefinition>,
    mapping: AeroStructMapping,
    for_vel: Option<Vec<[f64; 6]>>,
    forces: Option<AeroForcesCalculator>,
    output: Option<Sender<StepOutput>>,
}

impl<S: StructuralSolver> DynamicCoupled<S> {
    pub fn new(
        settings: &DynamicCoupledSettings,
        aero: StepUvlm,
        structure: S,
        defs: Vec<SurfaceDefinition>,
        n_nodes: usize,
    ) -> Result<Self> {
        settings.validate()?;
        let mapping = AeroStructMapping::new(&defs, n_nodes)?;
        Ok(Self {
            settings: settings.clone(),
            aero,
            structure,
            defs,
            mapping,
            for_vel: None,
            forces: None,
            output: None,
        })
    }

    /// Frame velocity per timestep, entry `i` used for step `i + 1`; the last
    /// entry is held afterwards.
    pub fn with_prescribed_motion(mut self, for_vel: Vec<[f64; 6]>) -> Self {
        self.for_vel = Some(for_vel);
        self
    }

    pub fn with_forces(mut self, calculator: AeroForcesCalculator) -> Self {
        self.forces = Some(calculator);
        self
    }

    pub fn with_output(mut self, sender: Sender<StepOutput>) -> Self {
        self.output = Some(sender);
        self
    }

    pub fn mapping(&self) -> &AeroStructMapping {
        &self.mapping
    }

    /// Runs `n_time_steps` steps from the last snapshot of `data`.
    pub fn run(&mut self, data: &mut SimulationData) -> Result<()> {
        (0..self.settings.n_time_steps).try_for_each(|_| self.step(data).map(|_| ()))
    }

    /// Advances one timestep and appends the result to `data`.
    ///
    /// Each substep steps the structure under the current loads, then solves
    /// the aerodynamics on the resulting shape and relaxes the loads. The
    /// residual is the change of the structural positions, so the accepted
    /// aerodynamic snapshot always belongs to the accepted structure; the
    /// loads it produces are stored on the structure as the first guess of
    /// the next step and are not part of the convergence check.
    pub fn step(&mut self, data: &mut SimulationData) -> Result<Convergence> {
        let s = &self.settings;
        let timestep = data.len();
        let (dt, t) = (s.dt, timestep as f64 * s.dt);
        let info = StepInfo {
            timestep,
            t,
            dt,
            include_unsteady: s.include_unsteady_force_contribution,
        };
        let (previous_aero, previous_beam, previous_nonlifting) = data.last();

        // Loads of the previous step are the first guess
        let mut beam = previous_beam.next();
        let mut aero = previous_aero.next();
        let mut nonlifting = previous_nonlifting.cloned();
        let mut conv = Convergence {
            iterations: 0,
            residual: f64::INFINITY,
            converged: false,
        };

        for substep in 0..s.fsi_substeps {
            let mut candidate = previous_beam.next();
            candidate.steady_applied_forces = beam.steady_applied_forces.clone();
            candidate.unsteady_applied_forces = beam.unsteady_applied_forces.clone();
            if let Some(history) = &self.for_vel {
                if let Some(v) = history.get(timestep - 1).or(history.last()) {
                    candidate.for_vel = *v;
                }
            }
            self.structure.step(previous_beam, &mut candidate, info)?;
            conv.residual = position_residual(&candidate, &beam);
            conv.iterations = substep + 1;
            beam = candidate;

            aero = previous_aero.next();
            nonlifting = previous_nonlifting.cloned();
            update_surfaces(&self.defs, &mut aero, &beam);
            self.aero.step(
                previous_aero,
                previous_beam,
                &mut aero,
                &beam,
                nonlifting.as_mut(),
                t,
                dt,
                timestep,
            )?;

            let forces = cached_beam_forces(&aero, &self.mapping, &beam)?;
            let r = s.relaxation_factor;
            beam.steady_applied_forces = relax(forces.steady.as_ref(), beam.steady_applied_forces.as_ref(), r);
            beam.unsteady_applied_forces = if s.include_unsteady_force_contribution {
                relax(forces.unsteady.as_ref(), beam.unsteady_applied_forces.as_ref(), r)
            } else {
                Mat::zeros(6, beam.n_nodes())
            };
            debug!(timestep, substep, residual = conv.residual, "fsi substep");

            if conv.iterations >= s.minimum_steps && conv.residual < s.fsi_tolerance {
                conv.converged = true;
                break;
            }
        }
        if !conv.converged {
            non_convergence("fsi", s.strict, timestep, conv)?;
        }

        if let Some(calculator) = &self.forces {
            calculator.calculate(&mut aero, &beam, timestep)?;
        }
        info!(timestep, t, substeps = conv.iterations, residual = conv.residual, "time step");

        if let Some(sender) = &self.output {
            let message = StepOutput {
                timestep,
                t,
                aero: aero.next(),
                structure: beam.clone(),
            };
            if sender.send(message).is_err() {
                warn!(timestep, "output receiver dropped, disabling output");
                self.output = None;
            }
        }
        data.push(aero, beam, nonlifting);
        Ok(conv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ForcesSettings, UvlmSettings, WakeSettings};
    use crate::grid::RectangularWing;
    use crate::structure::{LinearStatic, RigidPrescribed};
    use crate::velocity::{SteadyVelocityField, VelocityField};
    use crate::vlm::solver::total_force;
    use approx::assert_relative_eq;
    use std::sync::mpsc;

    fn uvlm_settings(dt: f64) -> UvlmSettings {
        let alpha = 5f64.to_radians();
        UvlmSettings {
            velocity_field: VelocityField::Steady(SteadyVelocityField {
                u_inf: 10.,
                u_inf_direction: [alpha.cos(), 0., alpha.sin()],
            }),
            dt,
            ..Default::default()
        }
    }

    fn wing() -> (Vec<SurfaceDefinition>, StructTimestep) {
        let wing = RectangularWing::new(1., 8., 3, 8).y_root(-4.);
        (vec![wing.definition(0)], StructTimestep::new(wing.node_positions()))
    }

    fn wake() -> WakeSettings {
        WakeSettings {
            mstar: 16,
            ..Default::default()
        }
    }

    #[test]
    fn test_static_rigid_converges_in_one_iteration() {
        let (defs, beam) = wing();
        let aero = StaticUvlm::new(&uvlm_settings(0.1), &wake()).unwrap();
        let mut solver =
            StaticCoupled::new(&StaticCoupledSettings::default(), aero, RigidPrescribed::new(vec![]), defs, 9)
                .unwrap();
        let (data, conv) = solver.solve(beam, None).unwrap();
        assert!(conv.converged);
        assert_eq!(conv.iterations, 1);
        assert_eq!(data.len(), 1);

        // Applied loads balance the aerodynamic lift
        let lift = total_force(data.aero[0].surfaces[0].forces.as_ref())[2];
        let applied = (0..9).map(|i| data.structure[0].steady_applied_forces[(2, i)]).sum::<f64>();
        assert!(lift > 0.);
        assert_relative_eq!(applied, lift, max_relative = 1e-10);
    }

    #[test]
    fn test_static_flexible_wing_bends_up() {
        let (defs, beam) = wing();
        let springs = LinearStatic::nodal_springs(&beam, 5e3, 5e3, 4).unwrap();
        let settings = StaticCoupledSettings {
            n_load_steps: 2,
            relaxation_factor: 0.2,
            tolerance: 1e-8,
            ..Default::default()
        };
        let aero = StaticUvlm::new(&uvlm_settings(0.1), &wake()).unwrap();
        let mut solver = StaticCoupled::new(&settings, aero, springs, defs, 9).unwrap();
        let (data, conv) = solver.solve(beam.clone(), None).unwrap();
        assert!(conv.converged);

        let tip = data.structure[0].pos[(2, 8)];
        let root = data.structure[0].pos[(2, 4)];
        assert_eq!(root, 0.);
        assert!(tip > 0.);
        // Symmetric wing, symmetric deflection
        assert_relative_eq!(data.structure[0].pos[(2, 0)], tip, max_relative = 1e-6);
    }

    #[test]
    fn test_static_strict_non_convergence() {
        let (defs, beam) = wing();
        let springs = LinearStatic::nodal_springs(&beam, 5e3, 5e3, 4).unwrap();
        let settings = StaticCoupledSettings {
            max_iter: 1,
            minimum_steps: 2,
            strict: true,
            ..Default::default()
        };
        let aero = StaticUvlm::new(&uvlm_settings(0.1), &wake()).unwrap();
        let mut solver = StaticCoupled::new(&settings, aero, springs, defs.clone(), 9).unwrap();
        match solver.solve(beam.clone(), None) {
            Err(AeroelasticError::NonConvergence { solver, iterations, .. }) => {
                assert_eq!(solver, "static coupled");
                assert_eq!(iterations, 1);
            }
            other => panic!("expected non-convergence, got {:?}", other.map(|_| ())),
        }

        // Lenient mode keeps the last iterate
        let settings = StaticCoupledSettings {
            strict: false,
            ..settings
        };
        let springs = LinearStatic::nodal_springs(&beam, 5e3, 5e3, 4).unwrap();
        let aero = StaticUvlm::new(&uvlm_settings(0.1), &wake()).unwrap();
        let mut solver = StaticCoupled::new(&settings, aero, springs, defs, 9).unwrap();
        let (_, conv) = solver.solve(beam, None).unwrap();
        assert!(!conv.converged);
    }

    /// Holds the first solution, then oscillates about it.
    struct Oscillating {
        calls: usize,
    }

    impl StructuralSolver for Oscillating {
        fn solve_static(&mut self, state: &mut StructTimestep) -> Result<()> {
            if self.calls > 0 {
                state.pos[(2, 0)] += if self.calls % 2 == 0 { 0.1 } else { -0.1 };
            }
            self.calls += 1;
            Ok(())
        }

        fn step(&mut self, _: &StructTimestep, _: &mut StructTimestep, _: StepInfo) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_static_non_convergence_reports_load_step() {
        let (defs, beam) = wing();
        let settings = StaticCoupledSettings {
            n_load_steps: 3,
            max_iter: 2,
            strict: true,
            ..Default::default()
        };
        let aero = StaticUvlm::new(&uvlm_settings(0.1), &wake()).unwrap();
        let mut solver = StaticCoupled::new(&settings, aero, Oscillating { calls: 0 }, defs, 9).unwrap();
        match solver.solve(beam, None) {
            Err(AeroelasticError::NonConvergence { timestep, iterations, .. }) => {
                assert_eq!(timestep, 1);
                assert_eq!(iterations, 2);
            }
            other => panic!("expected non-convergence, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_dynamic_snapshot_matches_accepted_structure() {
        let dt = 0.05;
        let (defs, beam) = wing();
        let aero = AeroTimestep::new(generate_surfaces(&defs, &beam));
        let mut data = SimulationData::new(aero, beam.clone(), None);
        let settings = DynamicCoupledSettings {
            dt,
            relaxation_factor: 0.,
            fsi_tolerance: 1e-9,
            ..Default::default()
        };
        let springs = LinearStatic::nodal_springs(&beam, 2e4, 2e4, 4).unwrap();
        let mut solver = DynamicCoupled::new(
            &settings,
            StepUvlm::new(&uvlm_settings(dt), &wake()).unwrap(),
            springs,
            defs.clone(),
            9,
        )
        .unwrap();
        let conv = solver.step(&mut data).unwrap();
        assert!(conv.converged);
        assert!(conv.iterations >= 2);

        let (aero, structure) = (&data.aero[1], &data.structure[1]);
        assert!(structure.pos[(2, 8)] > 0.);
        let zeta = crate::grid::generate_zeta(&defs[0], structure);
        (0..zeta.ncols()).for_each(|v| {
            (0..3).for_each(|i| assert_eq!(aero.surfaces[0].zeta[(i, v)], zeta[(i, v)]))
        });

        // Stored loads are the ones of the accepted aerodynamic snapshot
        let forces = solver.mapping().beam_forces(aero, structure).unwrap();
        (0..9).for_each(|node| {
            assert_relative_eq!(
                structure.steady_applied_forces[(2, node)],
                forces.steady[(2, node)],
                epsilon = 1e-10
            )
        });
    }

    #[test]
    fn test_dynamic_history_and_output() {
        let dt = 0.025;
        let (defs, beam) = wing();
        let uvlm = uvlm_settings(dt);
        let aero = AeroTimestep::new(generate_surfaces(&defs, &beam));
        let mut data = SimulationData::new(aero, beam.clone(), None);

        let settings = DynamicCoupledSettings {
            n_time_steps: 30,
            dt,
            ..Default::default()
        };
        let mapping = AeroStructMapping::new(&defs, 9).unwrap();
        let calculator = AeroForcesCalculator::new(
            &ForcesSettings {
                screen_output: false,
                ..Default::default()
            },
            mapping,
        )
        .unwrap();
        let (tx, rx) = mpsc::channel();
        let mut solver = DynamicCoupled::new(
            &settings,
            StepUvlm::new(&uvlm, &wake()).unwrap(),
            RigidPrescribed::new(vec![[0.; 6]]),
            defs,
            9,
        )
        .unwrap()
        .with_forces(calculator)
        .with_output(tx);
        solver.run(&mut data).unwrap();
        drop(solver);

        assert_eq!(data.len(), 31);
        assert_eq!(data.structure.len(), 31);
        let received = rx.iter().collect::<Vec<_>>();
        assert_eq!(received.len(), 30);
        assert_eq!(received[0].timestep, 1);
        assert_relative_eq!(received[29].t, 30. * dt, epsilon = 1e-12);

        // Wake grows one row per step up to mstar
        assert_eq!(data.aero[5].wakes[0].rows, 5);
        assert_eq!(data.aero[30].wakes[0].rows, 16);
        // Lift builds up after the impulsive start
        let lift = |i: usize| data.aero[i].total_steady_force_g[2];
        assert!(lift(2) > 0.);
        assert!(lift(30) > lift(2));
    }

    #[test]
    fn test_prescribed_frame_motion() {
        let dt = 0.05;
        let (defs, beam) = wing();
        let aero = AeroTimestep::new(generate_surfaces(&defs, &beam));
        let mut data = SimulationData::new(aero, beam.clone(), None);
        let settings = DynamicCoupledSettings {
            n_time_steps: 4,
            dt,
            ..Default::default()
        };
        let springs = LinearStatic::nodal_springs(&beam, 1e9, 1e9, 4).unwrap();
        let mut solver = DynamicCoupled::new(
            &settings,
            StepUvlm::new(&uvlm_settings(dt), &wake()).unwrap(),
            springs,
            defs,
            9,
        )
        .unwrap()
        .with_prescribed_motion(vec![[0., 0., 1., 0., 0., 0.]]);
        solver.run(&mut data).unwrap();

        // Plunging upwards at 1 m/s
        assert_relative_eq!(data.structure[4].for_pos[2], 4. * dt, epsilon = 1e-12);
        assert_eq!(data.structure[4].for_vel[2], 1.);
    }
}
