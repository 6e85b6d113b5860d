use crate::{config::Resolution, grid::GridRole};

/// A configuration value the simulation refuses to start with.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("resolution must be positive in both axes, got {width}x{height}")]
    InvalidResolution { width: u32, height: u32 },

    #[error("decay must lie in [{min}, {max}], got {value}", min = crate::config::MIN_DECAY, max = crate::config::MAX_DECAY)]
    DecayOutOfRange { value: f32 },

    #[error("steps per frame must be at most {max}, got {value}", max = crate::config::MAX_STEPS_PER_FRAME)]
    StepsPerFrameOutOfRange { value: u32 },
}

/// Error type for every fallible simulation operation.
#[derive(Debug, thiserror::Error)]
pub enum FluidError {
    #[error("invalid configuration: {0}")]
    Configuration(#[from] ConfigError),

    #[error("could not allocate {role} grid at {resolution}: {reason}")]
    ResourceExhausted {
        role: GridRole,
        resolution: Resolution,
        reason: String,
    },

    /// The device failed to run a step or a readback. Fatal for the run.
    #[error("step dispatch failed: {0}")]
    Dispatch(String),

    #[error("no suitable GPU adapter found: {0}")]
    NoAdapter(#[from] wgpu::RequestAdapterError),

    #[error("failed to request GPU device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),

    #[error("buffer mapping failed: {0}")]
    BufferMap(#[from] wgpu::BufferAsyncError),

    #[error("simulation is not initialized")]
    NotInitialized,
}
