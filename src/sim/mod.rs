use std::time::{Duration, Instant};

use glam::Vec4;

use crate::{
    config::{FluidConfig, KernelParams, MAX_STEPS_PER_FRAME, Resolution},
    error::FluidError,
    grid::{BufferId, DrawImage},
    jets::{Jet, JetUpload},
};

pub mod cpu;
pub mod gpucompute;
pub mod kernel;
pub mod runner;

/// The storage a step reads from and writes to. `phys_in`/`phys_out` and
/// `draw_in`/`draw_out` never name the same buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StepBindings {
    pub phys_in: BufferId,
    pub phys_out: BufferId,
    pub draw_in: BufferId,
    pub draw_out: BufferId,
}

impl StepBindings {
    pub fn aliased(&self) -> bool {
        let ids = [self.phys_in, self.phys_out, self.draw_in, self.draw_out];
        ids.iter()
            .enumerate()
            .any(|(i, a)| ids[i + 1..].iter().any(|b| a == b))
    }
}

/// Something that can hold the four grids and run the step kernel over them.
pub trait StepBackend {
    fn name(&self) -> &'static str;

    /// Allocate both grid pairs zeroed at `params.resolution`, releasing any
    /// previous allocation first. `params` stays constant until the next call.
    fn allocate(&mut self, params: &KernelParams) -> Result<(), FluidError>;

    /// Free all grids. Calling this on a released backend does nothing.
    fn release(&mut self);

    fn resolution(&self) -> Option<Resolution>;

    fn bindings(&self) -> Option<StepBindings>;

    /// Run the kernel once over the whole grid and return once every output
    /// cell has been written.
    fn dispatch(&mut self, jets: &JetUpload) -> Result<(), FluidError>;

    /// Exchange the input and output halves of both pairs.
    fn swap(&mut self);

    fn read_draw(&self, id: BufferId) -> Result<DrawImage, FluidError>;

    /// The current physical input grid, row-major.
    fn read_physical(&self) -> Result<Vec<Vec4>, FluidError>;
}

/// Drives a backend step by step: uploads jets, dispatches the kernel,
/// publishes the draw output and swaps buffer roles.
pub struct FluidSimulation<B: StepBackend> {
    backend: B,
    config: Option<FluidConfig>,
    published: Option<BufferId>,
    steps: u64,
    step_time: Duration,
}

impl<B: StepBackend> FluidSimulation<B> {
    /// Wrap `backend`. Nothing is allocated until `initialize`.
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            config: None,
            published: None,
            steps: 0,
            step_time: Duration::ZERO,
        }
    }

    pub fn initialize(&mut self, config: FluidConfig) -> Result<(), FluidError> {
        self.reset(config)
    }

    /// Discard all simulation state and start over with `config`. An invalid
    /// `config` is rejected before anything is touched.
    pub fn reset(&mut self, config: FluidConfig) -> Result<(), FluidError> {
        config.validate()?;
        self.shutdown();

        let params = KernelParams::from(&config);
        self.backend.allocate(&params)?;
        log::info!(
            "{} simulation initialized at {}, decay {}, {} steps per frame",
            self.backend.name(),
            config.resolution,
            config.decay,
            config.steps_per_frame
        );
        self.config = Some(config);
        Ok(())
    }

    /// Release all grids. Safe to call at any time, any number of times.
    pub fn shutdown(&mut self) {
        if self.config.take().is_some() {
            log::info!(
                "{} simulation shut down after {} steps",
                self.backend.name(),
                self.steps
            );
        }
        self.backend.release();
        self.published = None;
        self.steps = 0;
        self.step_time = Duration::ZERO;
    }

    /// Advance the simulation by one step.
    pub fn step_once(&mut self, jets: &[Jet]) -> Result<(), FluidError> {
        if self.config.is_none() {
            return Err(FluidError::NotInitialized);
        }
        let bindings = self.backend.bindings().ok_or(FluidError::NotInitialized)?;
        debug_assert!(!bindings.aliased());

        let start = Instant::now();
        let upload = JetUpload::upload(jets);
        self.backend.dispatch(&upload)?;
        self.published = Some(bindings.draw_out);
        self.backend.swap();

        self.step_time += start.elapsed();
        self.steps += 1;
        log::trace!("step {} done with {} jets", self.steps, upload.count());
        Ok(())
    }

    /// Run `steps_per_frame` steps in order. Values above 50 are clamped.
    pub fn run_frame(&mut self, jets: &[Jet], steps_per_frame: u32) -> Result<(), FluidError> {
        if self.config.is_none() {
            return Err(FluidError::NotInitialized);
        }
        let steps = if steps_per_frame > MAX_STEPS_PER_FRAME {
            log::warn!("clamping {steps_per_frame} steps per frame to {MAX_STEPS_PER_FRAME}");
            MAX_STEPS_PER_FRAME
        } else {
            steps_per_frame
        };
        for _ in 0..steps {
            self.step_once(jets)?;
        }
        log::debug!("frame done: {steps} steps, {} total", self.steps);
        Ok(())
    }

    /// Run one frame with the configured number of steps.
    pub fn advance(&mut self, jets: &[Jet]) -> Result<(), FluidError> {
        let steps = self
            .config
            .as_ref()
            .ok_or(FluidError::NotInitialized)?
            .steps_per_frame;
        self.run_frame(jets, steps)
    }

    /// The draw output of the most recently completed step, or `None` before
    /// the first step.
    pub fn latest_image(&self) -> Result<Option<DrawImage>, FluidError> {
        match self.published {
            Some(id) => self.backend.read_draw(id).map(Some),
            None => Ok(None),
        }
    }

    pub fn published_buffer(&self) -> Option<BufferId> {
        self.published
    }

    pub fn physical_state(&self) -> Result<Vec<Vec4>, FluidError> {
        self.backend.read_physical()
    }

    pub fn bindings(&self) -> Option<StepBindings> {
        self.backend.bindings()
    }

    pub fn resolution(&self) -> Option<Resolution> {
        self.backend.resolution()
    }

    pub fn config(&self) -> Option<&FluidConfig> {
        self.config.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.config.is_some()
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn average_step_time(&self) -> Duration {
        match self.steps {
            0 => Duration::ZERO,
            n => self.step_time.div_f64(n as f64),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[cfg(test)]
    pub(crate) fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}

impl<B: StepBackend> Drop for FluidSimulation<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
