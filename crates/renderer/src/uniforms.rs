use bytemuck::{Pod, Zeroable};

/// Field order mirrors the `MilkStageUniforms` block the preprocessor
/// declares; both sides are std140 vec4-aligned.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct StageUniforms {
    pub rand_preset: [f32; 4],
    pub rand_frame: [f32; 4],
    /// time, fps, frame, progress.
    pub c0: [f32; 4],
    /// bass, mid, treb, vol.
    pub c1: [f32; 4],
    /// bass_att, mid_att, treb_att, vol_att.
    pub c2: [f32; 4],
    /// Blur chain min/max scale+bias packing.
    pub c3: [f32; 4],
    /// aspect.xy, 1/aspect.xy.
    pub c4: [f32; 4],
    pub roam_cos: [f32; 4],
    pub roam_sin: [f32; 4],
    pub slow_roam_cos: [f32; 4],
    pub slow_roam_sin: [f32; 4],
}

impl StageUniforms {
    /// Fills the roam vectors the way composite shaders expect: slow
    /// sinusoids at four fixed rates of the supplied clock.
    pub fn set_roam(&mut self, time: f64) {
        const RATES: [f64; 4] = [0.3, 1.3, 5.0, 20.0];
        const SLOW_RATES: [f64; 4] = [0.005, 0.008, 0.013, 0.022];
        for i in 0..4 {
            self.roam_cos[i] = ((time * RATES[i]).cos() * 0.5 + 0.5) as f32;
            self.roam_sin[i] = ((time * RATES[i]).sin() * 0.5 + 0.5) as f32;
            self.slow_roam_cos[i] = ((time * SLOW_RATES[i]).cos() * 0.5 + 0.5) as f32;
            self.slow_roam_sin[i] = ((time * SLOW_RATES[i]).sin() * 0.5 + 0.5) as f32;
        }
    }
}
