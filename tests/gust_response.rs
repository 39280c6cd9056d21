use approx::assert_relative_eq;
use itertools::Itertools;
use vortexbeam::{
    aero_solver::{StaticUvlm, StepUvlm},
    config::{DynamicCoupledSettings, ForcesSettings, StaticCoupledSettings, UvlmSettings, WakeSettings},
    coupled::{DynamicCoupled, StaticCoupled},
    forces::AeroForcesCalculator,
    grid::{RectangularWing, SurfaceDefinition},
    mapping::AeroStructMapping,
    structure::{RigidPrescribed, StructTimestep},
    velocity::{GustProfile, GustVelocityField, VelocityField},
};

const U_INF: f64 = 10.;
const DT: f64 = 0.025;

#[test]
fn test_one_minus_cosine_gust_on_rigid_wing() {
    let alpha = 3f64.to_radians();
    let uvlm = UvlmSettings {
        velocity_field: VelocityField::Gust(GustVelocityField {
            u_inf: U_INF,
            u_inf_direction: [alpha.cos(), 0., alpha.sin()],
            profile: GustProfile::OneMinusCosine,
            u_de: 1.,
            gust_length: 2.,
            offset: 1.,
            gust_direction: [0., 0., 1.],
        }),
        dt: DT,
        ..Default::default()
    };
    let wake = WakeSettings {
        mstar: 40,
        ..Default::default()
    };

    //--------------------------------------------------------------------------
    // Steady initial condition, gust still upstream
    //--------------------------------------------------------------------------

    let wing = RectangularWing::new(1., 12., 4, 12).y_root(-6.);
    let beam = StructTimestep::new(wing.node_positions());
    let n_nodes = beam.n_nodes();
    let defs = vec![wing.definition(0)];

    let mut static_solver = StaticCoupled::new(
        &StaticCoupledSettings::default(),
        StaticUvlm::new(&uvlm, &wake).unwrap(),
        RigidPrescribed::new(vec![]),
        defs.clone(),
        n_nodes,
    )
    .unwrap();
    let (mut data, _) = static_solver.solve(beam, None).unwrap();

    let forces = ForcesSettings {
        screen_output: false,
        ..Default::default()
    };
    let calculator = |defs: &[SurfaceDefinition]| {
        AeroForcesCalculator::new(&forces, AeroStructMapping::new(defs, n_nodes).unwrap()).unwrap()
    };
    calculator(&defs)
        .calculate(&mut data.aero[0], &data.structure[0], 0)
        .unwrap();
    let baseline = data.aero[0].total_steady_force_g[2];
    assert!(baseline > 0.);

    //--------------------------------------------------------------------------
    // Time marching through the gust
    //--------------------------------------------------------------------------

    let settings = DynamicCoupledSettings {
        n_time_steps: 80,
        dt: DT,
        ..Default::default()
    };
    let mut solver = DynamicCoupled::new(
        &settings,
        StepUvlm::new(&uvlm, &wake).unwrap(),
        RigidPrescribed::new(vec![[0.; 6]]),
        defs.clone(),
        n_nodes,
    )
    .unwrap()
    .with_forces(calculator(&defs));
    solver.run(&mut data).unwrap();
    assert_eq!(data.len(), 81);

    let lift = data.aero.iter().map(|a| a.total_steady_force_g[2]).collect_vec();

    // Undisturbed until the gust front reaches the leading edge at t = 0.075
    assert_relative_eq!(lift[1], baseline, max_relative = 0.02);

    // Peak while the gust crosses the wing
    let (i_peak, peak) = lift
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, &l)| (i, l))
        .unwrap();
    assert!(peak > 1.2 * baseline);
    assert!((5..=25).contains(&i_peak), "peak at step {i_peak}");

    // Recovered once the gust is well downstream
    assert_relative_eq!(lift[80], baseline, max_relative = 0.05);
}
