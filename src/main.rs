use std::f32::consts::TAU;

use anyhow::Context;
use glam::{Vec2, Vec4};

use jetfluid::{
    CpuBackend, FluidConfig, FluidSimulation, GpuBackend, GpuContext, Jet, Resolution,
    StepBackend,
    rendering::{FramebufferSink, PresentationSink},
    spawn_simulation,
};

const WINDOW_WIDTH: usize = 256;
const WINDOW_HEIGHT: usize = 256;

const SIM_WIDTH: u32 = 512;
const SIM_HEIGHT: u32 = 512;

const FRAMES: u32 = 120;

fn main() -> anyhow::Result<()> {
    jetfluid::logging::init(log::LevelFilter::Info).context("failed to install logger")?;

    let config = FluidConfig::new(Resolution::new(SIM_WIDTH, SIM_HEIGHT), 8, 0.999);
    let benchmark = std::env::args().nth(1).as_deref() == Some("bench");

    match GpuContext::new_blocking().and_then(GpuBackend::new) {
        Ok(backend) => dispatch(FluidSimulation::new(backend), config, benchmark),
        Err(e) => {
            log::warn!("GPU unavailable ({e}), falling back to the CPU backend");
            dispatch(FluidSimulation::new(CpuBackend::new()), config, benchmark)
        }
    }
}

fn dispatch<B: StepBackend + Send + 'static>(
    mut sim: FluidSimulation<B>,
    config: FluidConfig,
    benchmark: bool,
) -> anyhow::Result<()> {
    sim.initialize(config.clone())?;
    if benchmark {
        run_benchmark(sim, config.steps_per_frame)
    } else {
        run_headless(sim)
    }
}

/// Jets evenly spaced on a circle, each blowing tangentially.
fn orbiting_jets(phase: f32) -> Vec<Jet> {
    let center = Vec2::new(SIM_WIDTH as f32, SIM_HEIGHT as f32) * 0.5;
    let radius = SIM_WIDTH.min(SIM_HEIGHT) as f32 * 0.3;
    (0..3)
        .map(|i| {
            let angle = phase + i as f32 * TAU / 3.0;
            let dir = Vec2::from_angle(angle);
            let color = Vec4::new(
                0.4 + 0.6 * fastrand::f32(),
                0.4 + 0.6 * fastrand::f32(),
                0.4 + 0.6 * fastrand::f32(),
                1.0,
            );
            Jet::new(center + dir * radius, dir.perp() * 1.5, color * 0.05, 12.0)
        })
        .collect()
}

fn run_headless<B: StepBackend>(mut sim: FluidSimulation<B>) -> anyhow::Result<()> {
    let mut sink = FramebufferSink::new(WINDOW_WIDTH, WINDOW_HEIGHT);

    for frame in 0..FRAMES {
        let jets = orbiting_jets(frame as f32 * 0.02);
        sim.advance(&jets)?;
        if let Some(image) = sim.latest_image()? {
            sink.present(&image);
        }
        if frame % 30 == 0 {
            log::info!(
                "frame {frame}: mean brightness {:.4}, {}μs per step",
                sink.mean_brightness(),
                sim.average_step_time().as_micros()
            );
        }
    }

    log::info!(
        "{} frames, {} steps, {}μs average step",
        sink.frames_presented,
        sim.steps(),
        sim.average_step_time().as_micros()
    );
    sim.shutdown();
    Ok(())
}

fn run_benchmark<B: StepBackend + Send + 'static>(
    sim: FluidSimulation<B>,
    steps_per_frame: u32,
) -> anyhow::Result<()> {
    let handle = spawn_simulation(sim, orbiting_jets(0.0), steps_per_frame, 0)?;

    for i in (1..=10).rev() {
        println!("{i}...");
        std::thread::sleep(std::time::Duration::from_secs(1));
    }

    let stats = handle.stop()?;
    println!(
        "{} frames ({} steps) took an average execution time of {}μs",
        stats.frames,
        stats.steps,
        stats.average_frame_exec_time.as_micros()
    );
    println!("\n\nSegments:\n");
    let longest_name = stats.segments.iter().map(|i| i.0.len()).max().unwrap_or(0);
    for (name, time) in stats.segments {
        println!("{} {}μs", pad(name, longest_name + 2), time.as_micros());
    }
    Ok(())
}

fn pad(s: &str, len: usize) -> String {
    if s.len() >= len {
        return s.to_string();
    }
    format!("{s}{}", " ".repeat(len - s.len()))
}
