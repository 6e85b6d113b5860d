use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec4};

/// A point source that injects velocity and dye for the step it is active in.
/// Positions and sizes are in grid cells, velocity in cells per step.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Jet {
    pub position: Vec2,
    pub velocity: Vec2,
    pub color: Vec4,
    pub size: f32,
}

impl Jet {
    pub fn new(position: Vec2, velocity: Vec2, color: Vec4, size: f32) -> Self {
        Self {
            position,
            velocity,
            color,
            size,
        }
    }

    /// Influence of this jet on a cell at `cell`: `1` at the jet center,
    /// falling off linearly to `0` at `size` cells away.
    #[inline(always)]
    pub fn weight_at(&self, cell: Vec2) -> f32 {
        falloff(cell.distance(self.position), self.size)
    }
}

/// Linear falloff truncated at `size`. Matches `jet_weight` in the shader.
#[inline(always)]
pub fn falloff(distance: f32, size: f32) -> f32 {
    if size <= 0.0 || distance >= size {
        return 0.0;
    }
    1.0 - distance / size
}

/// One jet as laid out in the kernel's storage buffer (std430, 48 bytes).
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct GpuJet {
    pub position: [f32; 2],
    pub velocity: [f32; 2],
    pub color: [f32; 4],
    pub size: f32,
    pub padding: [f32; 3],
}

impl From<&Jet> for GpuJet {
    fn from(jet: &Jet) -> Self {
        Self {
            position: jet.position.to_array(),
            velocity: jet.velocity.to_array(),
            color: jet.color.to_array(),
            size: jet.size,
            padding: [0.0; 3],
        }
    }
}

/// The jet list packed for one step. Built fresh every step and dropped
/// once the step has been dispatched.
#[derive(Clone, Debug, Default)]
pub struct JetUpload {
    records: Vec<GpuJet>,
}

impl JetUpload {
    pub fn upload(jets: &[Jet]) -> Self {
        Self {
            records: jets.iter().map(GpuJet::from).collect(),
        }
    }

    /// The value of `njets` the kernel is given.
    pub fn count(&self) -> u32 {
        self.records.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[GpuJet] {
        &self.records
    }

    /// Bytes for the GPU storage buffer. A binding can't be empty, so an
    /// empty list becomes one zeroed record the kernel never reads.
    pub fn gpu_bytes(&self) -> &[u8] {
        static PLACEHOLDER: [GpuJet; 1] = [GpuJet {
            position: [0.0; 2],
            velocity: [0.0; 2],
            color: [0.0; 4],
            size: 0.0,
            padding: [0.0; 3],
        }];
        if self.records.is_empty() {
            bytemuck::cast_slice(&PLACEHOLDER)
        } else {
            bytemuck::cast_slice(&self.records)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jet_at(x: f32, y: f32) -> Jet {
        Jet::new(Vec2::new(x, y), Vec2::X, Vec4::ONE, 2.0)
    }

    #[test]
    fn gpu_record_matches_wgsl_stride() {
        assert_eq!(std::mem::size_of::<GpuJet>(), 48);
    }

    #[test]
    fn upload_keeps_order_and_count() {
        let jets = [jet_at(1.0, 2.0), jet_at(3.0, 4.0), jet_at(5.0, 6.0)];
        let upload = JetUpload::upload(&jets);
        assert_eq!(upload.count(), 3);
        assert_eq!(upload.records()[1].position, [3.0, 4.0]);
        assert_eq!(upload.gpu_bytes().len(), 3 * 48);
    }

    #[test]
    fn empty_upload_has_zero_count_but_bindable_bytes() {
        let upload = JetUpload::upload(&[]);
        assert!(upload.is_empty());
        assert_eq!(upload.count(), 0);
        assert_eq!(upload.gpu_bytes().len(), 48);
        assert!(upload.gpu_bytes().iter().all(|b| *b == 0));
    }

    #[test]
    fn falloff_is_linear_and_truncated() {
        assert_eq!(falloff(0.0, 2.0), 1.0);
        assert_eq!(falloff(1.0, 2.0), 0.5);
        assert_eq!(falloff(2.0, 2.0), 0.0);
        assert_eq!(falloff(5.0, 2.0), 0.0);
    }

    #[test]
    fn non_positive_size_has_no_influence() {
        assert_eq!(falloff(0.0, 0.0), 0.0);
        assert_eq!(falloff(0.0, -1.0), 0.0);
    }

    #[test]
    fn weight_uses_distance_to_center() {
        let jet = jet_at(2.0, 2.0);
        assert_eq!(jet.weight_at(Vec2::new(2.0, 2.0)), 1.0);
        assert_eq!(jet.weight_at(Vec2::new(3.0, 2.0)), 0.5);
    }
}
