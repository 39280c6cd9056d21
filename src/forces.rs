//! Aggregate aerodynamic loads: per-surface resultants, totals through the
//! beam nodes, coefficients and text export.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::info;

use crate::config::ForcesSettings;
use crate::error::Result;
use crate::grid::{AeroTimestep, BeamForces};
use crate::mapping::{a_to_g, total_forces_a, AeroStructMapping};
use crate::structure::StructTimestep;
use crate::util::{add, col3, cross, mat3t_vec};

/// Loads at the beam nodes of a snapshot, mapped on first access.
pub fn cached_beam_forces<'a>(
    aero: &'a AeroTimestep,
    mapping: &AeroStructMapping,
    beam: &StructTimestep,
) -> Result<&'a BeamForces> {
    if let Some(forces) = aero.beam_forces.get() {
        return Ok(forces);
    }
    let forces = mapping.beam_forces(aero, beam)?;
    Ok(aero.beam_forces.get_or_init(|| forces))
}

pub struct AeroForcesCalculator {
    pub settings: ForcesSettings,
    mapping: AeroStructMapping,
}

impl AeroForcesCalculator {
    pub fn new(settings: &ForcesSettings, mapping: AeroStructMapping) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            settings: settings.clone(),
            mapping,
        })
    }

    /// Fills the per-surface resultants and the totals of `aero`.
    pub fn calculate(&self, aero: &mut AeroTimestep, beam: &StructTimestep, timestep: usize) -> Result<()> {
        let cga = beam.cga();
        let n_surf = aero.n_surf();
        aero.inertial_steady_forces = vec![[0.; 6]; n_surf];
        aero.inertial_unsteady_forces = vec![[0.; 6]; n_surf];
        aero.body_steady_forces = vec![[0.; 6]; n_surf];
        aero.body_unsteady_forces = vec![[0.; 6]; n_surf];

        for (i_surf, s) in aero.surfaces.iter().enumerate() {
            for (forces, inertial, body) in [
                (
                    &s.forces,
                    &mut aero.inertial_steady_forces[i_surf],
                    &mut aero.body_steady_forces[i_surf],
                ),
                (
                    &s.dynamic_forces,
                    &mut aero.inertial_unsteady_forces[i_surf],
                    &mut aero.body_unsteady_forces[i_surf],
                ),
            ] {
                (0..s.n_vertices()).for_each(|v| {
                    let f = col3(forces.subrows(0, 3), v);
                    let m = add(
                        col3(forces.subrows(3, 3), v),
                        cross(col3(s.zeta.as_ref(), v), f),
                    );
                    (0..3).for_each(|i| {
                        inertial[i] += f[i];
                        inertial[3 + i] += m[i];
                    });
                });
                let f = mat3t_vec(cga.as_ref(), [inertial[0], inertial[1], inertial[2]]);
                let m = mat3t_vec(cga.as_ref(), [inertial[3], inertial[4], inertial[5]]);
                *body = [f[0], f[1], f[2], m[0], m[1], m[2]];
            }
        }

        let (steady_a, unsteady_a) = {
            let beam_forces = cached_beam_forces(aero, &self.mapping, beam)?;
            (
                total_forces_a(beam_forces.steady.as_ref(), beam),
                total_forces_a(beam_forces.unsteady.as_ref(), beam),
            )
        };
        aero.total_steady_force_a = steady_a;
        aero.total_unsteady_force_a = unsteady_a;
        aero.total_steady_force_g = a_to_g(&steady_a, beam);
        aero.total_unsteady_force_g = a_to_g(&unsteady_a, beam);

        if self.settings.screen_output {
            self.screen_output(aero, timestep);
        }
        Ok(())
    }

    fn screen_output(&self, aero: &AeroTimestep, timestep: usize) {
        let (steady, unsteady) = if self.settings.coefficients {
            (
                self.coefficients(&aero.total_steady_force_g),
                self.coefficients(&aero.total_unsteady_force_g),
            )
        } else {
            (aero.total_steady_force_g, aero.total_unsteady_force_g)
        };
        if self.settings.unsteady {
            info!(
                timestep,
                coefficients = self.settings.coefficients,
                fx = steady[0],
                fy = steady[1],
                fz = steady[2],
                mx = steady[3],
                my = steady[4],
                mz = steady[5],
                fx_unsteady = unsteady[0],
                fy_unsteady = unsteady[1],
                fz_unsteady = unsteady[2],
                mx_unsteady = unsteady[3],
                my_unsteady = unsteady[4],
                mz_unsteady = unsteady[5],
                "aerodynamic loads (G)"
            );
        } else {
            info!(
                timestep,
                coefficients = self.settings.coefficients,
                fx = steady[0],
                fy = steady[1],
                fz = steady[2],
                mx = steady[3],
                my = steady[4],
                mz = steady[5],
                "aerodynamic loads (G)"
            );
        }
    }

    /// Non-dimensional loads: forces over `q S`, roll and yaw moments over
    /// `q S b`, pitch moment over `q S c`.
    pub fn coefficients(&self, total: &[f64; 6]) -> [f64; 6] {
        let scale = self.scales();
        std::array::from_fn(|i| total[i] / scale[i])
    }

    /// Inverse of [`Self::coefficients`].
    pub fn dimensional(&self, coefficients: &[f64; 6]) -> [f64; 6] {
        let scale = self.scales();
        std::array::from_fn(|i| coefficients[i] * scale[i])
    }

    fn scales(&self) -> [f64; 6] {
        let qs = self.settings.q_ref * self.settings.s_ref;
        [
            qs,
            qs,
            qs,
            qs * self.settings.b_ref,
            qs * self.settings.c_ref,
            qs * self.settings.b_ref,
        ]
    }

    /// Writes `forces_<name>` and `moments_<name>` into `folder`, one row per
    /// snapshot with steady and unsteady values in G and A.
    pub fn write_text_files(&self, folder: &Path, history: &[AeroTimestep]) -> Result<()> {
        std::fs::create_dir_all(folder)?;
        for (prefix, symbol, offset) in [("forces", "f", 0), ("moments", "m", 3)] {
            let path = folder.join(format!("{prefix}_{}", self.settings.text_file_name));
            let mut file = BufWriter::new(File::create(path)?);
            let header = ["steady_G", "unsteady_G", "steady_a", "unsteady_a"]
                .iter()
                .flat_map(|kind| ["x", "y", "z"].map(|c| format!("{symbol}{c}_{kind}")))
                .collect::<Vec<_>>()
                .join(", ");
            writeln!(file, "# tstep, {header}")?;
            for (timestep, aero) in history.iter().enumerate() {
                let values = [
                    &aero.total_steady_force_g,
                    &aero.total_unsteady_force_g,
                    &aero.total_steady_force_a,
                    &aero.total_unsteady_force_a,
                ]
                .iter()
                .flat_map(|t| (0..3).map(move |i| format!("{:.12e}", t[offset + i])))
                .collect::<Vec<_>>()
                .join(", ");
                writeln!(file, "{timestep}, {values}")?;
            }
            file.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{generate_surfaces, RectangularWing};
    use crate::util::quat_from_rotation_vector;
    use approx::assert_relative_eq;
    use faer::Mat;

    fn calculator(settings: ForcesSettings) -> (AeroForcesCalculator, AeroTimestep, StructTimestep) {
        let wing = RectangularWing::new(1., 4., 2, 4);
        let mut beam = StructTimestep::new(wing.node_positions());
        beam.quat_a = quat_from_rotation_vector([0., 0.2, 0.]);
        let def = wing.definition(0);
        let mapping = AeroStructMapping::new(&[def.clone()], beam.n_nodes()).unwrap();
        let mut aero = AeroTimestep::new(generate_surfaces(&[def], &beam));
        let nv = aero.surfaces[0].n_vertices();
        aero.surfaces[0].forces = Mat::from_fn(6, nv, |i, _| if i == 2 { 1. } else { 0. });
        aero.surfaces[0].dynamic_forces = Mat::from_fn(6, nv, |i, _| if i == 0 { 0.5 } else { 0. });
        (AeroForcesCalculator::new(&settings, mapping).unwrap(), aero, beam)
    }

    #[test]
    fn test_coefficient_round_trip() {
        let settings = ForcesSettings {
            q_ref: 61.25,
            s_ref: 32.,
            b_ref: 16.,
            c_ref: 2.,
            ..Default::default()
        };
        let (calc, _, _) = calculator(settings);
        let total = [120., -3., 4500., 250., -800., 12.];
        let c = calc.coefficients(&total);
        assert_relative_eq!(c[2], 4500. / (61.25 * 32.), epsilon = 1e-14);
        assert_relative_eq!(c[4], -800. / (61.25 * 32. * 2.), epsilon = 1e-14);
        let back = calc.dimensional(&c);
        (0..6).for_each(|i| assert_relative_eq!(back[i], total[i], max_relative = 1e-14));
    }

    #[test]
    fn test_steady_and_unsteady_totals_are_independent() {
        let (calc, mut aero, beam) = calculator(ForcesSettings {
            screen_output: false,
            ..Default::default()
        });
        calc.calculate(&mut aero, &beam, 0).unwrap();
        assert!(aero.beam_forces.get().is_some());

        // 15 vertices with unit fz and 0.5 fx
        assert_relative_eq!(aero.total_steady_force_g[2], 15., epsilon = 1e-12);
        assert_relative_eq!(aero.total_steady_force_g[0], 0., epsilon = 1e-12);
        assert_relative_eq!(aero.total_unsteady_force_g[0], 7.5, epsilon = 1e-12);
        assert_relative_eq!(aero.total_unsteady_force_g[2], 0., epsilon = 1e-12);
        (0..6).for_each(|i| {
            assert_relative_eq!(
                aero.inertial_steady_forces[0][i],
                aero.total_steady_force_g[i],
                epsilon = 1e-10
            );
            assert_relative_eq!(
                aero.body_unsteady_forces[0][i],
                aero.total_unsteady_force_a[i],
                epsilon = 1e-10
            );
        });
    }

    #[test]
    fn test_text_files() {
        let (calc, mut aero, beam) = calculator(ForcesSettings {
            screen_output: false,
            write_text_file: true,
            ..Default::default()
        });
        calc.calculate(&mut aero, &beam, 0).unwrap();
        let folder = std::env::temp_dir().join("vortexbeam_forces_test");
        calc.write_text_files(&folder, &[aero.clone(), aero]).unwrap();

        let text = std::fs::read_to_string(folder.join("moments_aeroforces.txt")).unwrap();
        let lines = text.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("# tstep, mx_steady_G"));
        assert_eq!(lines[1].split(", ").count(), 13);
        assert!(lines[2].starts_with("1, "));
    }
}
