//! RMS loudness meter used by the visualizer snapshot.

use core::f32::consts::PI;

use m4a_ir::StereoSample;

/// Low-pass cutoff of the squared signal, in Hz.
pub const METER_LOWPASS_FREQ: f32 = 5.0;

/// First-order low-pass over the squared signal of each side.
#[derive(Clone, Debug)]
pub struct Loudness {
    alpha: f32,
    avg_left_sq: f32,
    avg_right_sq: f32,
    left: f32,
    right: f32,
}

impl Loudness {
    pub fn new(lowpass_freq: f32, sample_rate: u32) -> Self {
        let rc = 1.0 / (lowpass_freq * 2.0 * PI);
        let dt = 1.0 / sample_rate as f32;
        Self {
            alpha: dt / (rc + dt),
            avg_left_sq: 0.0,
            avg_right_sq: 0.0,
            left: 0.0,
            right: 0.0,
        }
    }

    /// Feed one block and update the reading.
    pub fn process(&mut self, buffer: &[StereoSample]) {
        for s in buffer {
            self.avg_left_sq += self.alpha * (s.left * s.left - self.avg_left_sq);
            self.avg_right_sq += self.alpha * (s.right * s.right - self.avg_right_sq);
        }
        // scaled so a full-scale sine reads 1.0
        self.left = libm::sqrtf(self.avg_left_sq) * core::f32::consts::SQRT_2;
        self.right = libm::sqrtf(self.avg_right_sq) * core::f32::consts::SQRT_2;
    }

    /// Current (left, right) reading.
    pub fn level(&self) -> (f32, f32) {
        (self.left, self.right)
    }

    pub fn reset(&mut self) {
        self.avg_left_sq = 0.0;
        self.avg_right_sq = 0.0;
        self.left = 0.0;
        self.right = 0.0;
    }
}
