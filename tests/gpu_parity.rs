//! Runs the same scenario on both backends. Skipped when no adapter that can
//! run compute shaders is available.

use glam::{Vec2, Vec4};
use jetfluid::{
    CpuBackend, FluidConfig, FluidError, FluidSimulation, GpuBackend, GpuContext, GridRole, Jet,
    Resolution, StepBackend,
};

fn gpu_simulation(config: FluidConfig) -> Option<FluidSimulation<GpuBackend>> {
    let _ = env_logger::builder().is_test(true).try_init();
    let context = match GpuContext::new_blocking() {
        Ok(context) => context,
        Err(e) => {
            eprintln!("skipping GPU test: {e}");
            return None;
        }
    };
    let mut sim = FluidSimulation::new(GpuBackend::new(context).unwrap());
    sim.initialize(config).unwrap();
    Some(sim)
}

fn assert_close(a: Vec4, b: Vec4, tol: f32, what: &str) {
    assert!(
        (a - b).abs().max_element() <= tol,
        "{what}: expected {a} to be within {tol} of {b}"
    );
}

#[test]
fn gpu_matches_cpu_over_a_few_frames() {
    let config = FluidConfig::new(Resolution::new(20, 12), 4, 0.999);
    let Some(mut gpu) = gpu_simulation(config.clone()) else {
        return;
    };
    let mut cpu = FluidSimulation::new(CpuBackend::new());
    cpu.initialize(config).unwrap();

    let jets = [
        Jet::new(Vec2::new(5.0, 6.0), Vec2::new(0.8, 0.2), Vec4::new(1.0, 0.2, 0.1, 1.0), 3.0),
        Jet::new(Vec2::new(14.0, 4.0), Vec2::new(-0.5, 0.6), Vec4::new(0.1, 0.3, 1.0, 1.0), 2.5),
    ];
    for frame in 0..3 {
        let jets: &[Jet] = if frame == 2 { &[] } else { &jets };
        gpu.advance(jets).unwrap();
        cpu.advance(jets).unwrap();
    }

    let gpu_image = gpu.latest_image().unwrap().unwrap();
    let cpu_image = cpu.latest_image().unwrap().unwrap();
    assert_eq!(gpu_image.resolution, cpu_image.resolution);
    for (i, (g, c)) in gpu_image.pixels.iter().zip(cpu_image.pixels.iter()).enumerate() {
        assert_close(*g, *c, 1e-3, &format!("draw cell {i}"));
    }

    let gpu_phys = gpu.physical_state().unwrap();
    let cpu_phys = cpu.physical_state().unwrap();
    for (i, (g, c)) in gpu_phys.iter().zip(cpu_phys.iter()).enumerate() {
        assert_close(*g, *c, 1e-3, &format!("physical cell {i}"));
    }
}

#[test]
fn gpu_single_jet_scenario() {
    let config = FluidConfig::new(Resolution::new(4, 4), 1, 1.0);
    let Some(mut sim) = gpu_simulation(config) else {
        return;
    };
    let jet = Jet::new(Vec2::new(2.0, 2.0), Vec2::new(1.0, 0.0), Vec4::ONE, 1.0);
    sim.step_once(&[jet]).unwrap();

    let phys = sim.physical_state().unwrap();
    assert!(phys[2 * 4 + 2].x > 0.0);
    for (i, cell) in phys.iter().enumerate() {
        if i != 2 * 4 + 2 {
            assert_eq!((cell.x, cell.y), (0.0, 0.0), "cell {i}");
        }
    }
}

#[test]
fn gpu_bindings_ping_pong() {
    let config = FluidConfig::new(Resolution::new(9, 9), 1, 0.999);
    let Some(mut sim) = gpu_simulation(config) else {
        return;
    };
    let before = sim.bindings().unwrap();
    assert!(!before.aliased());
    sim.step_once(&[]).unwrap();
    let after = sim.bindings().unwrap();
    assert_eq!(after.draw_in, before.draw_out);
    assert_eq!(after.phys_out, before.phys_in);

    sim.run_frame(&[], 0).unwrap();
    let image = sim.latest_image().unwrap().unwrap();
    assert!(image.pixels.iter().all(|p| *p == Vec4::ZERO));
}

#[test]
fn gpu_rejects_grid_wider_than_one_dispatch() {
    let config = FluidConfig::new(Resolution::new(8, 8), 1, 0.999);
    let Some(mut sim) = gpu_simulation(config) else {
        return;
    };
    // 75000 tiles across, more than a device guarantees per dimension.
    let wide = FluidConfig::new(Resolution::new(600_000, 1), 1, 0.999);
    match sim.reset(wide) {
        Err(FluidError::ResourceExhausted { role, resolution, .. }) => {
            assert_eq!(role, GridRole::Physical);
            assert_eq!(resolution, Resolution::new(600_000, 1));
        }
        other => panic!("expected ResourceExhausted, got {other:?}"),
    }
    assert!(!sim.is_initialized());
    assert!(matches!(sim.step_once(&[]), Err(FluidError::NotInitialized)));
}

#[test]
fn gpu_read_of_unknown_buffer_fails() {
    let config = FluidConfig::new(Resolution::new(8, 8), 1, 0.999);
    let Some(mut sim) = gpu_simulation(config.clone()) else {
        return;
    };
    let mut cpu = FluidSimulation::new(CpuBackend::new());
    cpu.initialize(config.clone()).unwrap();
    let foreign = cpu.bindings().unwrap().draw_out;
    assert!(matches!(
        sim.backend().read_draw(foreign),
        Err(FluidError::Dispatch(_))
    ));

    sim.step_once(&[]).unwrap();
    let stale = sim.published_buffer().unwrap();
    sim.reset(config).unwrap();
    assert!(matches!(
        sim.backend().read_draw(stale),
        Err(FluidError::Dispatch(_))
    ));
    assert!(sim.latest_image().unwrap().is_none());
}
