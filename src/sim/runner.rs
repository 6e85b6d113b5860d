//! Running a simulation on its own thread, publishing one image per frame.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use arc_swap::ArcSwap;

use crate::{
    error::FluidError,
    grid::DrawImage,
    jets::Jet,
    sim::{FluidSimulation, StepBackend},
};

#[non_exhaustive]
#[derive(Debug, Default)]
pub struct SimulationStatistics {
    pub frames: u32,
    pub steps: u64,
    pub average_frame_exec_time: Duration,
    pub segments: Vec<(&'static str, Duration)>,
}

/// Handle to a simulation running on a background thread.
pub struct SimulationHandle {
    jets: Arc<Mutex<Vec<Jet>>>,
    stop: Arc<AtomicBool>,
    latest_frame: Arc<ArcSwap<Option<DrawImage>>>,
    join_handle: thread::JoinHandle<Result<SimulationStatistics, FluidError>>,
}

/// Move `simulation` onto a new thread and run `steps_per_frame` steps per
/// frame at up to `frame_rate` frames per second (`0` means unthrottled).
/// Fails with [`FluidError::NotInitialized`] unless `simulation` has been
/// initialized.
pub fn spawn_simulation<B>(
    simulation: FluidSimulation<B>,
    jets: Vec<Jet>,
    steps_per_frame: u32,
    frame_rate: u32,
) -> Result<SimulationHandle, FluidError>
where
    B: StepBackend + Send + 'static,
{
    if !simulation.is_initialized() {
        return Err(FluidError::NotInitialized);
    }
    let jets = Arc::new(Mutex::new(jets));
    let stop = Arc::new(AtomicBool::new(false));
    let latest_frame = Arc::new(ArcSwap::from_pointee(None));
    let j = Arc::clone(&jets);
    let s = Arc::clone(&stop);
    let l = Arc::clone(&latest_frame);
    let join_handle =
        thread::spawn(move || sim_thread(simulation, j, s, l, steps_per_frame, frame_rate));
    Ok(SimulationHandle {
        jets,
        stop,
        latest_frame,
        join_handle,
    })
}

impl SimulationHandle {
    /// The image of the most recently completed frame.
    pub fn latest_frame(&self) -> Arc<Option<DrawImage>> {
        self.latest_frame.load_full()
    }

    /// Replace the jet list used from the next frame on.
    pub fn set_jets(&self, jets: Vec<Jet>) {
        match self.jets.lock() {
            Ok(mut current) => *current = jets,
            Err(poisoned) => *poisoned.into_inner() = jets,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join_handle.is_finished()
    }

    /// Ask the thread to stop after its current frame and wait for it.
    pub fn stop(self) -> Result<SimulationStatistics, FluidError> {
        self.stop.store(true, Ordering::Relaxed);
        self.join_handle
            .join()
            .unwrap_or_else(|_| Err(FluidError::Dispatch("simulation thread panicked".into())))
    }
}

/// Run the segments in order while `$cond` holds, timing each one, and
/// evaluate to the per-iteration average of every segment.
macro_rules! segment_bench_while {
    (while ($cond:expr) { $({$name:literal : $($contents:stmt)*}),+ $(,)? }) => {{
        let mut segments = vec![$(($name, std::time::Duration::new(0, 0))),+];
        let mut cur_segments = Vec::with_capacity(segments.len());
        let mut iter_count: u32 = 0;

        while $cond {
            cur_segments.clear();

            $(
                let segment_start = std::time::Instant::now();
                $($contents)*
                cur_segments.push(segment_start.elapsed());
            )+

            for (idx, item) in cur_segments.iter().enumerate() {
                segments[idx].1 += *item;
            }
            iter_count += 1;
        }

        for s in segments.iter_mut() {
            s.1 /= iter_count.max(1);
        }
        (segments, iter_count)
    }}
}

fn sim_thread<B: StepBackend>(
    mut simulation: FluidSimulation<B>,
    jets: Arc<Mutex<Vec<Jet>>>,
    stop: Arc<AtomicBool>,
    latest_frame: Arc<ArcSwap<Option<DrawImage>>>,
    steps_per_frame: u32,
    frame_rate: u32,
) -> Result<SimulationStatistics, FluidError> {
    let frame_time = (frame_rate > 0).then(|| Duration::from_secs_f32((frame_rate as f32).recip()));
    let mut end_of_last_frame = Instant::now();
    let mut total_time = Duration::ZERO;
    let mut failure = None;

    #[allow(redundant_semicolons)]
    let (segments, frames) = segment_bench_while!(
    while (failure.is_none() && !stop.load(Ordering::Relaxed)) {
        {
            "copy jets":
            let frame_jets = match jets.lock() {
                Ok(jets) => jets.clone(),
                Err(poisoned) => poisoned.into_inner().clone(),
            };
        },
        {
            "run frame":
            if let Err(e) = simulation.run_frame(&frame_jets, steps_per_frame) {
                log::error!("simulation frame failed: {e}");
                failure = Some(e);
            }
        },
        {
            "publish":
            if failure.is_none() {
                match simulation.latest_image() {
                    Ok(Some(image)) => latest_frame.store(Arc::new(Some(image))),
                    Ok(None) => {}
                    Err(e) => failure = Some(e),
                }
            }
        },
        {
            "pace":
            total_time += end_of_last_frame.elapsed();
            if let Some(frame_time) = frame_time {
                let to_wait = frame_time.saturating_sub(end_of_last_frame.elapsed());
                if !to_wait.is_zero() {
                    thread::sleep(to_wait);
                }
            }
            end_of_last_frame = Instant::now();
        }
    }
    );

    if let Some(e) = failure {
        return Err(e);
    }
    Ok(SimulationStatistics {
        frames,
        steps: simulation.steps(),
        average_frame_exec_time: total_time / frames.max(1),
        segments,
    })
}

#[cfg(test)]
mod tests {
    use glam::{Vec2, Vec4};

    use super::*;
    use crate::{
        config::{FluidConfig, Resolution},
        sim::cpu::CpuBackend,
    };

    #[test]
    fn runner_publishes_frames_and_reports_segments() {
        let mut sim = FluidSimulation::new(CpuBackend::new());
        sim.initialize(FluidConfig::new(Resolution::new(16, 16), 2, 0.999))
            .unwrap();
        let jet = Jet::new(Vec2::new(8.0, 8.0), Vec2::new(0.5, 0.0), Vec4::ONE, 3.0);
        let handle = spawn_simulation(sim, vec![jet], 2, 0).unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        while handle.latest_frame().is_none() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        let frame = handle.latest_frame();
        handle.set_jets(Vec::new());

        let image = Option::as_ref(&frame).expect("a frame was published");
        assert_eq!(image.resolution, Resolution::new(16, 16));
        assert!(image.get(8, 8).x > 0.0);

        let stats = handle.stop().unwrap();
        assert!(stats.frames >= 1);
        assert_eq!(stats.steps, u64::from(stats.frames) * 2);
        let names: Vec<_> = stats.segments.iter().map(|s| s.0).collect();
        assert_eq!(names, ["copy jets", "run frame", "publish", "pace"]);
    }

    #[test]
    fn uninitialized_simulation_is_not_spawned() {
        let sim = FluidSimulation::new(CpuBackend::new());
        let result = spawn_simulation(sim, Vec::new(), 1, 0);
        assert!(matches!(result, Err(FluidError::NotInitialized)));
    }

    #[test]
    fn simulation_shut_down_before_spawning_is_rejected() {
        let mut sim = FluidSimulation::new(CpuBackend::new());
        sim.initialize(FluidConfig::new(Resolution::new(8, 8), 1, 0.999))
            .unwrap();
        sim.shutdown();
        assert!(matches!(
            spawn_simulation(sim, Vec::new(), 1, 0),
            Err(FluidError::NotInitialized)
        ));
    }
}
