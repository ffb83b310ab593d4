//! Stereo sample type.

use core::ops::{Add, AddAssign, Mul};

/// A stereo audio sample pair (32-bit float, nominal range -1.0..1.0).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StereoSample {
    pub left: f32,
    pub right: f32,
}

impl StereoSample {
    /// Create a silent sample.
    pub const fn silence() -> Self {
        Self { left: 0.0, right: 0.0 }
    }

    pub const fn new(left: f32, right: f32) -> Self {
        Self { left, right }
    }

    /// Convert to clamped 16-bit integers.
    pub fn to_i16(self) -> (i16, i16) {
        let conv = |v: f32| (v * 32768.0).clamp(-32768.0, 32767.0) as i16;
        (conv(self.left), conv(self.right))
    }

    pub fn is_silent(self) -> bool {
        self.left == 0.0 && self.right == 0.0
    }
}

impl Add for StereoSample {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.left + rhs.left, self.right + rhs.right)
    }
}

impl AddAssign for StereoSample {
    fn add_assign(&mut self, rhs: Self) {
        self.left += rhs.left;
        self.right += rhs.right;
    }
}

impl Mul<f32> for StereoSample {
    type Output = Self;

    fn mul(self, rhs: f32) -> Self {
        Self::new(self.left * rhs, self.right * rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_i16_clamps() {
        assert_eq!(StereoSample::new(2.0, -2.0).to_i16(), (32767, -32768));
        assert_eq!(StereoSample::new(0.5, 0.0).to_i16(), (16384, 0));
    }

    #[test]
    fn arithmetic() {
        let mut a = StereoSample::new(0.25, -0.5);
        a += StereoSample::new(0.25, 0.5);
        assert_eq!(a, StereoSample::new(0.5, 0.0));
        assert_eq!(a * 2.0, StereoSample::new(1.0, 0.0));
    }
}
