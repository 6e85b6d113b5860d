use glam::Vec4;

use crate::{
    config::{KernelParams, Resolution},
    error::FluidError,
    grid::{BufferId, DrawImage, GridPair, GridRole},
    jets::JetUpload,
    sim::{StepBackend, StepBindings, kernel},
};

struct CpuGrids {
    physical: GridPair,
    draw: GridPair,
    params: KernelParams,
}

/// Runs the step kernel on the host, one rayon task per grid row.
#[derive(Default)]
pub struct CpuBackend {
    grids: Option<CpuGrids>,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the current draw input, for tests that need a known dye field.
    #[cfg(test)]
    pub(crate) fn seed_draw(&mut self, f: impl Fn(u32, u32) -> Vec4) {
        if let Some(grids) = self.grids.as_mut() {
            let width = grids.params.resolution[0] as usize;
            for (i, cell) in grids.draw.input_mut().cells_mut().iter_mut().enumerate() {
                *cell = f((i % width) as u32, (i / width) as u32);
            }
        }
    }
}

impl StepBackend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn allocate(&mut self, params: &KernelParams) -> Result<(), FluidError> {
        self.release();
        let resolution = params.resolution();
        let physical = GridPair::allocate(resolution, GridRole::Physical)?;
        let draw = GridPair::allocate(resolution, GridRole::Draw)?;
        self.grids = Some(CpuGrids {
            physical,
            draw,
            params: *params,
        });
        Ok(())
    }

    fn release(&mut self) {
        self.grids = None;
    }

    fn resolution(&self) -> Option<Resolution> {
        self.grids.as_ref().map(|g| g.physical.resolution())
    }

    fn bindings(&self) -> Option<StepBindings> {
        self.grids.as_ref().map(|g| StepBindings {
            phys_in: g.physical.input().id(),
            phys_out: g.physical.output().id(),
            draw_in: g.draw.input().id(),
            draw_out: g.draw.output().id(),
        })
    }

    fn dispatch(&mut self, jets: &JetUpload) -> Result<(), FluidError> {
        let grids = self.grids.as_mut().ok_or(FluidError::NotInitialized)?;
        let params = grids.params.with_jet_count(jets.count());
        let (phys_in, phys_out) = grids.physical.split();
        let (draw_in, draw_out) = grids.draw.split();
        kernel::run_step(phys_in, draw_in, jets, &params, phys_out, draw_out);
        Ok(())
    }

    fn swap(&mut self) {
        if let Some(grids) = self.grids.as_mut() {
            grids.physical.swap();
            grids.draw.swap();
        }
    }

    fn read_draw(&self, id: BufferId) -> Result<DrawImage, FluidError> {
        let grids = self.grids.as_ref().ok_or(FluidError::NotInitialized)?;
        grids
            .draw
            .find(id)
            .map(|buffer| buffer.to_image())
            .ok_or_else(|| FluidError::Dispatch(format!("draw buffer {id:?} is not allocated")))
    }

    fn read_physical(&self) -> Result<Vec<Vec4>, FluidError> {
        let grids = self.grids.as_ref().ok_or(FluidError::NotInitialized)?;
        Ok(grids.physical.input().cells().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FluidConfig;

    fn allocated(width: u32, height: u32) -> CpuBackend {
        let mut backend = CpuBackend::new();
        let config = FluidConfig::new(Resolution::new(width, height), 1, 1.0);
        backend.allocate(&KernelParams::from(&config)).unwrap();
        backend
    }

    #[test]
    fn reading_a_foreign_buffer_fails() {
        let backend = allocated(4, 4);
        let other = allocated(4, 4);
        let foreign = other.bindings().unwrap().draw_out;
        assert!(matches!(
            backend.read_draw(foreign),
            Err(FluidError::Dispatch(_))
        ));
        assert!(matches!(
            backend.read_draw(BufferId::next()),
            Err(FluidError::Dispatch(_))
        ));
    }

    #[test]
    fn released_backend_reads_nothing() {
        let mut backend = allocated(2, 2);
        let id = backend.bindings().unwrap().draw_in;
        backend.release();
        backend.release();
        assert!(backend.bindings().is_none());
        assert!(matches!(
            backend.read_draw(id),
            Err(FluidError::NotInitialized)
        ));
    }
}
