//! Host-side grids and their ping-pong pairing.
//!
//! A grid is a row-major array of four-channel float cells. Reads outside the
//! grid clamp to the nearest edge cell; they never wrap and never fail.

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use glam::{Vec2, Vec4};

use crate::{config::Resolution, error::FluidError};

/// Which of the two simulated fields a grid holds.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum GridRole {
    /// Velocity in `xy`, density in `z`, curl in `w`
    Physical,
    /// Dye color
    Draw,
}

impl fmt::Display for GridRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GridRole::Physical => f.write_str("physical"),
            GridRole::Draw => f.write_str("draw"),
        }
    }
}

/// Identity of one piece of grid storage. Unique for the lifetime of the
/// process, so two ids compare equal only if they name the same storage.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BufferId(u64);

impl BufferId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        BufferId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Clamp-at-edge index into a row-major grid.
#[inline(always)]
pub fn clamped_index(resolution: Resolution, x: i32, y: i32) -> usize {
    let x = x.clamp(0, resolution.width as i32 - 1) as usize;
    let y = y.clamp(0, resolution.height as i32 - 1) as usize;
    y * resolution.width as usize + x
}

#[inline(always)]
fn mix(a: Vec4, b: Vec4, t: f32) -> Vec4 {
    a * (1.0 - t) + b * t
}

/// Bilinear sample of `cells` at `pos`, clamping to the edge.
pub fn sample_bilinear(cells: &[Vec4], resolution: Resolution, pos: Vec2) -> Vec4 {
    let max = Vec2::new(
        (resolution.width - 1) as f32,
        (resolution.height - 1) as f32,
    );
    let p = pos.clamp(Vec2::ZERO, max);
    let base = p.floor();
    let f = p - base;
    let (x, y) = (base.x as i32, base.y as i32);

    let a = cells[clamped_index(resolution, x, y)];
    let b = cells[clamped_index(resolution, x + 1, y)];
    let c = cells[clamped_index(resolution, x, y + 1)];
    let d = cells[clamped_index(resolution, x + 1, y + 1)];
    mix(mix(a, b, f.x), mix(c, d, f.x), f.y)
}

/// One owned, zero-initialized grid.
#[derive(Debug)]
pub struct GridBuffer {
    id: BufferId,
    resolution: Resolution,
    cells: Vec<Vec4>,
}

impl GridBuffer {
    pub fn zeroed(resolution: Resolution, role: GridRole) -> Result<Self, FluidError> {
        let mut cells = Vec::new();
        cells
            .try_reserve_exact(resolution.cell_count())
            .map_err(|e| FluidError::ResourceExhausted {
                role,
                resolution,
                reason: e.to_string(),
            })?;
        cells.resize(resolution.cell_count(), Vec4::ZERO);
        Ok(Self {
            id: BufferId::next(),
            resolution,
            cells,
        })
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn cells(&self) -> &[Vec4] {
        &self.cells
    }

    pub(crate) fn cells_mut(&mut self) -> &mut [Vec4] {
        &mut self.cells
    }

    pub fn get(&self, x: i32, y: i32) -> Vec4 {
        self.cells[clamped_index(self.resolution, x, y)]
    }

    pub fn sample(&self, pos: Vec2) -> Vec4 {
        sample_bilinear(&self.cells, self.resolution, pos)
    }

    pub fn to_image(&self) -> DrawImage {
        DrawImage {
            resolution: self.resolution,
            pixels: self.cells.clone(),
        }
    }
}

/// The `In`/`Out` pair for one grid role. Both halves always share the same
/// resolution; `swap` exchanges their identities.
#[derive(Debug)]
pub struct GridPair {
    role: GridRole,
    input: GridBuffer,
    output: GridBuffer,
}

impl GridPair {
    /// Allocate two zeroed grids for `role`.
    pub fn allocate(resolution: Resolution, role: GridRole) -> Result<Self, FluidError> {
        let input = GridBuffer::zeroed(resolution, role)?;
        let output = GridBuffer::zeroed(resolution, role)?;
        Ok(Self {
            role,
            input,
            output,
        })
    }

    pub fn role(&self) -> GridRole {
        self.role
    }

    pub fn resolution(&self) -> Resolution {
        self.input.resolution
    }

    pub fn input(&self) -> &GridBuffer {
        &self.input
    }

    pub fn output(&self) -> &GridBuffer {
        &self.output
    }

    #[cfg(test)]
    pub(crate) fn input_mut(&mut self) -> &mut GridBuffer {
        &mut self.input
    }

    /// Borrow the read-only and the write-only half at the same time.
    pub fn split(&mut self) -> (&GridBuffer, &mut GridBuffer) {
        (&self.input, &mut self.output)
    }

    pub fn swap(&mut self) {
        std::mem::swap(&mut self.input, &mut self.output);
    }

    pub fn find(&self, id: BufferId) -> Option<&GridBuffer> {
        [&self.input, &self.output]
            .into_iter()
            .find(|buffer| buffer.id == id)
    }
}

/// A host-side copy of a draw grid, ready to hand to a presentation sink.
#[derive(Clone, Debug, PartialEq)]
pub struct DrawImage {
    pub resolution: Resolution,
    pub pixels: Vec<Vec4>,
}

impl DrawImage {
    pub fn from_cells(resolution: Resolution, cells: &[[f32; 4]]) -> Self {
        Self {
            resolution,
            pixels: cells.iter().map(|c| Vec4::from_array(*c)).collect(),
        }
    }

    pub fn get(&self, x: u32, y: u32) -> Vec4 {
        self.pixels[clamped_index(self.resolution, x as i32, y as i32)]
    }

    /// Exact comparison on the underlying bits, so `NaN`s and signed zeros
    /// count as differences.
    pub fn bits_eq(&self, other: &DrawImage) -> bool {
        self.resolution == other.resolution
            && self
                .pixels
                .iter()
                .zip(other.pixels.iter())
                .all(|(a, b)| a.to_array().map(f32::to_bits) == b.to_array().map(f32::to_bits))
    }
}
