use std::path::Path;
use std::process::ExitCode;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use vortexbeam::{
    aero_solver::{StaticUvlm, StepUvlm},
    config::SimulationConfig,
    coupled::{DynamicCoupled, StaticCoupled},
    error::Result,
    forces::AeroForcesCalculator,
    grid::RectangularWing,
    mapping::AeroStructMapping,
    output::OutputWriter,
    structure::{LinearStatic, StructTimestep},
};

const OUT_DIR: &str = "output";

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run(std::env::args().nth(1)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(config_path: Option<String>) -> Result<()> {
    let config = match config_path {
        Some(path) => SimulationConfig::from_file(path)?,
        None => SimulationConfig::default(),
    };

    // Flexible rectangular wing clamped at mid span
    let wing = RectangularWing::new(1., 16., 4, 16).y_root(-8.);
    let beam = StructTimestep::new(wing.node_positions());
    let n_nodes = beam.n_nodes();
    let defs = vec![wing.definition(0)];
    let springs = LinearStatic::nodal_springs(&beam, 2e4, 2e4, n_nodes / 2)?;

    let aero = StaticUvlm::new(&config.uvlm, &config.wake)?;
    let mut static_solver =
        StaticCoupled::new(&config.static_coupled, aero, springs.clone(), defs.clone(), n_nodes)?;
    let (mut data, _) = static_solver.solve(beam, None)?;

    let calculator = AeroForcesCalculator::new(&config.forces, AeroStructMapping::new(&defs, n_nodes)?)?;
    calculator.calculate(&mut data.aero[0], &data.structure[0], 0)?;

    if config.uvlm.horseshoe {
        warn!("horseshoe wake selected, skipping the time-marching solution");
    } else if config.dynamic_coupled.n_time_steps > 0 {
        let writer = OutputWriter::spawn(OUT_DIR, true)?;
        let mut dynamic_solver = DynamicCoupled::new(
            &config.dynamic_coupled,
            StepUvlm::new(&config.uvlm, &config.wake)?,
            springs,
            defs.clone(),
            n_nodes,
        )?
        .with_forces(AeroForcesCalculator::new(
            &config.forces,
            AeroStructMapping::new(&defs, n_nodes)?,
        )?);
        if let Some(sender) = writer.sender() {
            dynamic_solver = dynamic_solver.with_output(sender);
        }
        dynamic_solver.run(&mut data)?;
        drop(dynamic_solver);
        let written = writer.finish()?;
        info!(steps = written, folder = OUT_DIR, "output complete");
    }

    if config.forces.write_text_file {
        calculator.write_text_files(Path::new(OUT_DIR), &data.aero)?;
    }
    Ok(())
}
