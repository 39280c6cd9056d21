//! Interconnection of the linear aerodynamics with the linear structure.

use faer::prelude::*;
use tracing::info;

use crate::config::LinearSettings;
use crate::error::{AeroelasticError, Result};
use crate::linear::beam::LinearBeam;
use crate::linear::state_space::{couple, StateSpace};
use crate::linear::uvlm::LinearUvlm;
use crate::mapping::MappingGains;
use crate::util::{mat3t_vec, skew};

fn add_block(mut m: MatMut<f64>, row: usize, col: usize, block: MatRef<f64>) {
    for j in 0..block.ncols() {
        for i in 0..block.nrows() {
            m[(row + i, col + j)] += block[(i, j)];
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblerState {
    Uninitialized,
    ComponentsInitialised,
    GainsComputed,
    Assembled,
}

impl AssemblerState {
    fn name(&self) -> &'static str {
        match self {
            AssemblerState::Uninitialized => "uninitialized",
            AssemblerState::ComponentsInitialised => "components initialised",
            AssemblerState::GainsComputed => "gains computed",
            AssemblerState::Assembled => "assembled",
        }
    }
}

/// Aerodynamic stiffness and damping seen by the structure, to be added to
/// its `K` and `C`. Blocks are split into flexible (`s`) and rigid (`r`)
/// degrees of freedom, rows first.
#[derive(Debug, Clone)]
pub struct LinAeroGains {
    pub kss: Mat<f64>, // Follower moment arm stiffness
    pub krs: Mat<f64>, // Frame moment wrt flexible displacement
    pub css: Mat<f64>,
    pub csr: Mat<f64>,
    pub crs: Mat<f64>,
    pub crr: Mat<f64>,
}

impl LinAeroGains {
    fn n_flex(&self) -> usize {
        self.kss.nrows()
    }

    fn n_rig(&self) -> usize {
        self.crr.nrows()
    }

    pub fn stiffness(&self) -> Mat<f64> {
        let (ns, nr) = (self.n_flex(), self.n_rig());
        let mut k = Mat::zeros(ns + nr, ns + nr);
        k.as_mut().submatrix_mut(0, 0, ns, ns).copy_from(&self.kss);
        k.as_mut().submatrix_mut(ns, 0, nr, ns).copy_from(&self.krs);
        k
    }

    pub fn damping(&self) -> Mat<f64> {
        let (ns, nr) = (self.n_flex(), self.n_rig());
        let mut c = Mat::zeros(ns + nr, ns + nr);
        c.as_mut().submatrix_mut(0, 0, ns, ns).copy_from(&self.css);
        c.as_mut().submatrix_mut(0, ns, ns, nr).copy_from(&self.csr);
        c.as_mut().submatrix_mut(ns, 0, nr, ns).copy_from(&self.crs);
        c.as_mut().submatrix_mut(ns, ns, nr, nr).copy_from(&self.crr);
        c
    }
}

/// Coupled aeroelastic system. States are `[aero; beam]`, inputs
/// `[zeta, zeta_dot, u_ext, nodal loads]` and outputs
/// `[vertex forces, q, q']`.
#[derive(Debug, Clone)]
pub struct AssembledSystem {
    pub ss: StateSpace,
    pub kas: Mat<f64>, // Beam outputs to aerodynamic inputs
    pub ksa: Mat<f64>, // Aerodynamic outputs to beam inputs
    pub n_aero_states: usize,
    pub n_beam_states: usize,
}

pub struct LinearAeroelastic {
    pub settings: LinearSettings,
    state: AssemblerState,
    uvlm: Option<LinearUvlm>,
    beam: Option<LinearBeam>,
    mapping: Option<MappingGains>,
    gains: Option<LinAeroGains>,
}

impl LinearAeroelastic {
    pub fn new(settings: &LinearSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            settings: settings.clone(),
            state: AssemblerState::Uninitialized,
            uvlm: None,
            beam: None,
            mapping: None,
            gains: None,
        })
    }

    pub fn state(&self) -> AssemblerState {
        self.state
    }

    fn require(&self, expected: AssemblerState, operation: &'static str) -> Result<()> {
        if self.state != expected {
            return Err(AeroelasticError::InvalidState {
                operation,
                state: self.state.name(),
            });
        }
        Ok(())
    }

    /// Drops every component; the assembler starts over.
    pub fn reset(&mut self) {
        *self = Self {
            settings: self.settings.clone(),
            state: AssemblerState::Uninitialized,
            uvlm: None,
            beam: None,
            mapping: None,
            gains: None,
        };
    }

    pub fn initialise(
        &mut self,
        uvlm: LinearUvlm,
        beam: LinearBeam,
        mapping: MappingGains,
    ) -> Result<()> {
        self.require(AssemblerState::Uninitialized, "initialise components")?;
        let dimension = |what, expected, found| {
            if expected == found {
                Ok(())
            } else {
                Err(AeroelasticError::Dimension {
                    what,
                    expected,
                    found,
                })
            }
        };
        dimension("aerodynamic grid inputs", mapping.n_aero(), 3 * uvlm.n_vertices)?;
        dimension("structural degrees of freedom", mapping.n_dof(), beam.n_dof())?;
        dimension("rigid degrees of freedom", self.settings.num_dof_rig, beam.num_dof_rig)?;
        dimension("rigid degrees of freedom", self.settings.num_dof_rig, mapping.num_dof_rig)?;
        if (uvlm.ss.dt - self.settings.dt).abs() > f64::EPSILON * self.settings.dt {
            return Err(AeroelasticError::config(
                "linear.dt",
                "aerodynamic state-space was built with a different time step",
            ));
        }

        self.uvlm = Some(uvlm);
        self.beam = Some(beam);
        self.mapping = Some(mapping);
        self.state = AssemblerState::ComponentsInitialised;
        Ok(())
    }

    /// Stiffness from the reference loads acting on moving moment arms and
    /// damping from the frozen-circulation velocity loads.
    pub fn compute_gains(&mut self) -> Result<&LinAeroGains> {
        self.require(AssemblerState::ComponentsInitialised, "compute gains")?;
        let (Some(uvlm), Some(mapping)) = (&self.uvlm, &self.mapping) else {
            return Err(AeroelasticError::InvalidState {
                operation: "compute gains",
                state: "missing components",
            });
        };
        let ns = mapping.num_dof_flex;
        let nr = mapping.num_dof_rig;
        let mut k = Mat::<f64>::zeros(ns + nr, ns + nr);

        for (v, f_g) in uvlm.forces0.iter().enumerate() {
            let f_a = mat3t_vec(mapping.cga.as_ref(), *f_g);
            // f~ C_AG
            let f_cag = &skew(f_a) * mapping.cga.transpose();
            let rows = mapping.kdisp.as_ref().subrows(3 * v, 3);
            if let Some(dof) = mapping.vertex_dof[v] {
                let block = &f_cag * rows.submatrix(0, dof + 3, 3, 3);
                add_block(k.as_mut(), dof + 3, dof + 3, block.as_ref());
            }
            if nr == 6 {
                let block = &f_cag * rows.subcols(0, ns);
                add_block(k.as_mut(), ns + 3, 0, block.as_ref());
            }
        }

        let c = (&mapping.kforces * &uvlm.dfv * &mapping.kvel_vel) * Scale(-1.);
        let gains = LinAeroGains {
            kss: k.as_ref().submatrix(0, 0, ns, ns).to_owned(),
            krs: k.as_ref().submatrix(ns, 0, nr, ns).to_owned(),
            css: c.as_ref().submatrix(0, 0, ns, ns).to_owned(),
            csr: c.as_ref().submatrix(0, ns, ns, nr).to_owned(),
            crs: c.as_ref().submatrix(ns, 0, nr, ns).to_owned(),
            crr: c.as_ref().submatrix(ns, ns, nr, nr).to_owned(),
        };
        self.state = AssemblerState::GainsComputed;
        Ok(self.gains.insert(gains))
    }

    /// Couples both systems. Terminal: a new assembly needs [`Self::reset`].
    pub fn assemble(&mut self) -> Result<AssembledSystem> {
        self.require(AssemblerState::GainsComputed, "assemble")?;
        let (Some(uvlm), Some(beam), Some(mapping), Some(gains)) =
            (&self.uvlm, &self.beam, &self.mapping, &self.gains)
        else {
            return Err(AeroelasticError::InvalidState {
                operation: "assemble",
                state: "missing components",
            });
        };

        let mut beam = beam.clone();
        let damping = if uvlm.velocity_terms_in_beam {
            gains.damping()
        } else {
            Mat::zeros(beam.n_dof(), beam.n_dof())
        };
        beam.add_aero_terms(gains.stiffness().as_ref(), damping.as_ref())?;
        let beam_ss = beam.state_space(self.settings.dt)?;

        let nv3 = 3 * uvlm.n_vertices;
        let n_dof = beam.n_dof();
        // [[Kdisp, 0], [Kvel_disp, Kvel_vel], [0, 0]]: grid positions do not
        // depend on the structural velocities and the gust input stays open
        let mut kas = Mat::<f64>::zeros(3 * nv3, 2 * n_dof);
        kas.as_mut().submatrix_mut(0, 0, nv3, n_dof).copy_from(&mapping.kdisp);
        kas.as_mut()
            .submatrix_mut(nv3, 0, nv3, n_dof)
            .copy_from(&mapping.kvel_disp);
        kas.as_mut()
            .submatrix_mut(nv3, n_dof, nv3, n_dof)
            .copy_from(&mapping.kvel_vel);
        let ksa = mapping.kforces.clone();

        let ss = couple(&uvlm.ss, &beam_ss, kas.as_ref(), ksa.as_ref())?;
        let system = AssembledSystem {
            n_aero_states: uvlm.ss.states(),
            n_beam_states: beam_ss.states(),
            ss,
            kas,
            ksa,
        };
        info!(
            states = system.ss.states(),
            inputs = system.ss.inputs(),
            outputs = system.ss.outputs(),
            "linear aeroelastic system assembled"
        );
        self.state = AssemblerState::Assembled;
        Ok(system)
    }
}
