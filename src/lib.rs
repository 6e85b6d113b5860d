//! Real-time 2D fluid simulation driven by jets that inject velocity and
//! dye into a grid.
//!
//! A [`FluidSimulation`] owns a [`StepBackend`] holding two ping-ponged grid
//! pairs: the physical field (velocity, density) and the draw field (dye).
//! Every step advects both fields semi-Lagrangian style, damps them by the
//! configured decay, splats the active jets and swaps the buffer roles. The
//! same step runs on the host ([`CpuBackend`]) or as a wgpu compute shader
//! ([`GpuBackend`]).

pub mod config;
pub mod error;
pub mod grid;
pub mod jets;
pub mod logging;
pub mod rendering;
pub mod sim;
pub mod util;

pub use config::{FluidConfig, KernelParams, Resolution};
pub use error::{ConfigError, FluidError};
pub use grid::{BufferId, DrawImage, GridRole};
pub use jets::{Jet, JetUpload};
pub use sim::{
    FluidSimulation, StepBackend, StepBindings,
    cpu::CpuBackend,
    gpucompute::{GpuBackend, GpuContext},
    runner::{SimulationHandle, SimulationStatistics, spawn_simulation},
};
