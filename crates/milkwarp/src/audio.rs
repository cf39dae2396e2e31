//! Sound analysis: waveform in, damped three-band levels out.
//!
//! Each frame takes one block of waveform samples, runs a forward FFT, and
//! folds the spectrum into bass/mid/treb band energies. Levels are reported
//! relative to a long-term per-band average, so a steady signal reads near
//! 1.0 regardless of absolute volume, and a hit reads as a spike. The `_att`
//! variants are additionally smoothed for code that wants slow envelopes.

use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

/// Samples consumed per frame per channel.
pub const WAVEFORM_SAMPLES: usize = 576;

const BANDS: usize = 3;

/// Expression-variable view of the current frame's audio.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AudioLevels {
    pub bass: f32,
    pub mid: f32,
    pub treb: f32,
    pub vol: f32,
    pub bass_att: f32,
    pub mid_att: f32,
    pub treb_att: f32,
    pub vol_att: f32,
}

pub struct AudioAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    buffer: Vec<Complex<f32>>,
    long_avg: [f32; BANDS],
    att: [f32; BANDS],
    vol_att: f32,
    primed: bool,
}

impl AudioAnalyzer {
    pub fn new() -> Self {
        let mut planner = FftPlanner::new();
        Self {
            fft: planner.plan_fft_forward(WAVEFORM_SAMPLES),
            buffer: vec![Complex::default(); WAVEFORM_SAMPLES],
            long_avg: [0.0; BANDS],
            att: [0.0; BANDS],
            vol_att: 0.0,
            primed: false,
        }
    }

    /// Analyzes one frame of waveform. Short input is zero-padded; extra
    /// samples beyond [`WAVEFORM_SAMPLES`] are ignored.
    pub fn update(&mut self, waveform: &[f32], fps: f64) -> AudioLevels {
        for (i, slot) in self.buffer.iter_mut().enumerate() {
            *slot = Complex::new(waveform.get(i).copied().unwrap_or(0.0), 0.0);
        }
        self.fft.process(&mut self.buffer);

        // Bins 1..=n/2 split into three equal bands; bin 0 is DC.
        let usable = WAVEFORM_SAMPLES / 2;
        let band_width = usable / BANDS;
        let mut imm = [0.0f32; BANDS];
        for (i, band) in imm.iter_mut().enumerate() {
            let start = 1 + i * band_width;
            *band = self.buffer[start..start + band_width]
                .iter()
                .map(|c| c.norm())
                .sum();
        }

        if !self.primed {
            self.long_avg = imm;
            self.primed = true;
        }

        let avg_rate = adjust_rate(0.992, fps);
        let att_rate = adjust_rate(0.8, fps);
        let mut rel = [0.0f32; BANDS];
        for i in 0..BANDS {
            self.long_avg[i] = self.long_avg[i] * avg_rate + imm[i] * (1.0 - avg_rate);
            rel[i] = if self.long_avg[i] > 1e-6 {
                imm[i] / self.long_avg[i]
            } else {
                0.0
            };
            self.att[i] = self.att[i] * att_rate + rel[i] * (1.0 - att_rate);
        }

        let vol = (rel[0] + rel[1] + rel[2]) / 3.0;
        self.vol_att = self.vol_att * att_rate + vol * (1.0 - att_rate);

        AudioLevels {
            bass: rel[0],
            mid: rel[1],
            treb: rel[2],
            vol,
            bass_att: self.att[0],
            mid_att: self.att[1],
            treb_att: self.att[2],
            vol_att: self.vol_att,
        }
    }
}

impl Default for AudioAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

/// Rescales a per-frame damping rate tuned at 30fps to the actual frame
/// rate, so envelope speed is independent of refresh rate.
fn adjust_rate(rate_at_30fps: f32, fps: f64) -> f32 {
    let fps = fps.clamp(1.0, 1000.0) as f32;
    rate_at_30fps.powf(30.0 / fps)
}
