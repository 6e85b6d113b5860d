use std::fmt;

use bytemuck::{Pod, Zeroable};

use crate::error::ConfigError;

pub const MIN_DECAY: f32 = 0.999;
pub const MAX_DECAY: f32 = 1.0;
pub const MAX_STEPS_PER_FRAME: u32 = 50;

/// Grid dimensions in cells.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn cell_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// The parameters a host hands the simulation on initialize and reset.
#[derive(Clone, Debug, PartialEq)]
pub struct FluidConfig {
    /// Size of both the physical and the draw grid
    pub resolution: Resolution,
    /// Number of steps `FluidSimulation::advance` runs per frame, at most 50
    pub steps_per_frame: u32,
    /// Multiplicative damping applied to the advected state every step.
    /// Must lie in `[0.999, 1.0]`; `1.0` disables fading entirely.
    pub decay: f32,
}

impl FluidConfig {
    pub fn new(resolution: Resolution, steps_per_frame: u32, decay: f32) -> Self {
        Self {
            resolution,
            steps_per_frame,
            decay,
        }
    }

    /// Build a configuration, pulling `steps_per_frame` and `decay` into
    /// their allowed ranges instead of rejecting them. Meant for hosts that
    /// drive the values from sliders.
    pub fn clamped(resolution: Resolution, steps_per_frame: u32, decay: f32) -> Self {
        let decay = if decay.is_nan() {
            MIN_DECAY
        } else {
            decay.clamp(MIN_DECAY, MAX_DECAY)
        };
        Self {
            resolution,
            steps_per_frame: steps_per_frame.min(MAX_STEPS_PER_FRAME),
            decay,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.resolution.is_valid() {
            return Err(ConfigError::InvalidResolution {
                width: self.resolution.width,
                height: self.resolution.height,
            });
        }
        if !(MIN_DECAY..=MAX_DECAY).contains(&self.decay) {
            return Err(ConfigError::DecayOutOfRange { value: self.decay });
        }
        if self.steps_per_frame > MAX_STEPS_PER_FRAME {
            return Err(ConfigError::StepsPerFrameOutOfRange {
                value: self.steps_per_frame,
            });
        }
        Ok(())
    }
}

impl Default for FluidConfig {
    fn default() -> Self {
        Self::new(Resolution::new(512, 512), 8, 0.999)
    }
}

/// The uniform block the step kernel reads. Layout matches `Params` in
/// `sim/shader.wgsl`.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct KernelParams {
    pub resolution: [u32; 2],
    pub decay: f32,
    pub njets: u32,
}

impl KernelParams {
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.resolution[0], self.resolution[1])
    }

    pub fn with_jet_count(self, njets: u32) -> Self {
        Self { njets, ..self }
    }
}

impl From<&FluidConfig> for KernelParams {
    fn from(config: &FluidConfig) -> Self {
        Self {
            resolution: [config.resolution.width, config.resolution.height],
            decay: config.decay,
            njets: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_reference_setup() {
        let config = FluidConfig::default();
        assert_eq!(config.resolution, Resolution::new(512, 512));
        assert_eq!(config.steps_per_frame, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_width_is_rejected() {
        let config = FluidConfig::new(Resolution::new(0, 16), 1, 1.0);
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidResolution {
                width: 0,
                height: 16
            })
        );
    }

    #[test]
    fn decay_outside_range_is_rejected() {
        for decay in [0.5, 1.01, f32::NAN] {
            let config = FluidConfig::new(Resolution::new(4, 4), 1, decay);
            assert!(matches!(
                config.validate(),
                Err(ConfigError::DecayOutOfRange { .. })
            ));
        }
    }

    #[test]
    fn too_many_steps_are_rejected() {
        let config = FluidConfig::new(Resolution::new(4, 4), 51, 1.0);
        assert_eq!(
            config.validate(),
            Err(ConfigError::StepsPerFrameOutOfRange { value: 51 })
        );
    }

    #[test]
    fn clamped_pulls_values_into_range() {
        let config = FluidConfig::clamped(Resolution::new(4, 4), 400, 0.2);
        assert_eq!(config.steps_per_frame, MAX_STEPS_PER_FRAME);
        assert_eq!(config.decay, MIN_DECAY);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn kernel_params_layout_is_sixteen_bytes() {
        let params = KernelParams::from(&FluidConfig::default());
        assert_eq!(std::mem::size_of::<KernelParams>(), 16);
        assert_eq!(params.resolution, [512, 512]);
        assert_eq!(params.njets, 0);
        assert_eq!(params.with_jet_count(3).njets, 3);
    }
}
