//! The per-cell step, run on the host. `shader.wgsl` implements the same
//! update for the GPU and must be kept in sync with this file.

use glam::{Vec2, Vec4};
use rayon::{
    iter::{IndexedParallelIterator, ParallelIterator},
    slice::ParallelSliceMut,
};

use crate::{
    config::KernelParams,
    grid::GridBuffer,
    jets::{GpuJet, JetUpload, falloff},
};

/// Edge length of the square thread group the GPU kernel is dispatched in.
pub const TILE_SIZE: u32 = 8;

/// Number of tiles needed to cover `resolution` in each axis. Partial tiles
/// are dispatched in full and the kernel discards invocations past the edge.
pub fn tile_count(resolution: [u32; 2]) -> [u32; 2] {
    [
        resolution[0].div_ceil(TILE_SIZE),
        resolution[1].div_ceil(TILE_SIZE),
    ]
}

#[inline(always)]
fn curl(phys_in: &GridBuffer, x: i32, y: i32) -> f32 {
    let dvy_dx = (phys_in.get(x + 1, y).y - phys_in.get(x - 1, y).y) * 0.5;
    let dvx_dy = (phys_in.get(x, y + 1).x - phys_in.get(x, y - 1).x) * 0.5;
    dvy_dx - dvx_dy
}

#[inline(always)]
fn mix2(a: Vec2, b: Vec2, t: f32) -> Vec2 {
    a * (1.0 - t) + b * t
}

/// Compute the next physical and draw value of cell `(x, y)`.
pub fn step_cell(
    x: u32,
    y: u32,
    phys_in: &GridBuffer,
    draw_in: &GridBuffer,
    jets: &[GpuJet],
    params: &KernelParams,
) -> (Vec4, Vec4) {
    let (cx, cy) = (x as i32, y as i32);
    let pos = Vec2::new(x as f32, y as f32);

    // Trace back along this cell's velocity and pick up what was there.
    let here = phys_in.get(cx, cy);
    let source = pos - here.truncate().truncate();
    let mut phys = phys_in.sample(source) * params.decay;
    let mut color = draw_in.sample(source) * params.decay;

    for jet in jets.iter().take(params.njets as usize) {
        let w = falloff(pos.distance(Vec2::from_array(jet.position)), jet.size);
        if w > 0.0 {
            let velocity = mix2(
                Vec2::new(phys.x, phys.y),
                Vec2::from_array(jet.velocity),
                w,
            );
            phys = Vec4::new(velocity.x, velocity.y, phys.z + w, phys.w);
            color += Vec4::from_array(jet.color) * w;
        }
    }

    phys.w = curl(phys_in, cx, cy);
    (phys, color)
}

/// Run one full step: every cell of the outputs is written exactly once from
/// the inputs. The caller guarantees inputs and outputs are distinct grids of
/// equal resolution.
pub fn run_step(
    phys_in: &GridBuffer,
    draw_in: &GridBuffer,
    jets: &JetUpload,
    params: &KernelParams,
    phys_out: &mut GridBuffer,
    draw_out: &mut GridBuffer,
) {
    let width = params.resolution[0] as usize;
    let records = jets.records();
    phys_out
        .cells_mut()
        .par_chunks_mut(width)
        .zip(draw_out.cells_mut().par_chunks_mut(width))
        .enumerate()
        .for_each(|(y, (phys_row, draw_row))| {
            for (x, (phys, draw)) in phys_row.iter_mut().zip(draw_row.iter_mut()).enumerate() {
                (*phys, *draw) =
                    step_cell(x as u32, y as u32, phys_in, draw_in, records, params);
            }
        });
}
