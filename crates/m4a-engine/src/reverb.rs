//! Per-track reverb post-filters.
//!
//! All variants share a circular delay line of `(rate / 60) * dma_buffers`
//! stereo samples with two read/write taps. Processing runs in chunks that
//! stop at whichever internal index wraps first.

use m4a_ir::{ReverbType, StereoSample, AGB_FPS};

#[derive(Clone, Debug)]
enum Variant {
    /// Plain feedback of both taps, scaled by the intensity.
    Normal,
    /// Cross-channel feedback through an extra one-frame buffer.
    Gs1 { gs: Vec<StereoSample> },
    /// Cross-channel feedback with tuned coefficients and a short extra buffer.
    Gs2 { gs: Vec<StereoSample>, gs_pos: usize, prim: f32, sec: f32 },
    /// Experimental all-pass.
    Test,
}

#[derive(Clone, Debug)]
pub struct Reverb {
    variant: Variant,
    intensity: f32,
    buffer: Vec<StereoSample>,
    pos: usize,
    pos2: usize,
    pos2_start: usize,
}

impl Reverb {
    /// Build the reverb selected by `kind`. `level` is the 7-bit reverb amount.
    pub fn new(kind: ReverbType, level: u8, sample_rate: u32, num_dma_buffers: u8) -> Self {
        let frame_len = (sample_rate / AGB_FPS) as usize;
        let len = frame_len * num_dma_buffers.max(2) as usize;

        let (variant, level, pos2) = match kind {
            ReverbType::Normal => (Variant::Normal, level, frame_len),
            ReverbType::None => (Variant::Normal, 0, frame_len),
            ReverbType::Gs1 => (Variant::Gs1 { gs: vec![StereoSample::silence(); frame_len] }, level, 0),
            ReverbType::Gs2 => (Self::gs2(frame_len, 0.414_062_5, -0.0625), level, len - frame_len / 3),
            ReverbType::Mgat => (Self::gs2(frame_len, 0.25, -0.046_875), level, len - frame_len / 3),
            ReverbType::Test => (Variant::Test, level, frame_len),
        };

        let mut reverb = Self {
            variant,
            intensity: 0.0,
            buffer: vec![StereoSample::silence(); len],
            pos: 0,
            pos2,
            pos2_start: pos2,
        };
        reverb.set_level(level);
        reverb
    }

    fn gs2(frame_len: usize, prim: f32, sec: f32) -> Variant {
        let gs_len = (frame_len / 2).max(1);
        Variant::Gs2 { gs: vec![StereoSample::silence(); gs_len], gs_pos: 0, prim, sec }
    }

    pub fn set_level(&mut self, level: u8) {
        self.intensity = f32::from(level) / 128.0;
    }

    pub fn intensity(&self) -> f32 {
        self.intensity
    }

    /// Forget all delayed signal.
    pub fn reset(&mut self) {
        self.buffer.fill(StereoSample::silence());
        self.pos = 0;
        self.pos2 = self.pos2_start;
        match &mut self.variant {
            Variant::Gs1 { gs } => gs.fill(StereoSample::silence()),
            Variant::Gs2 { gs, gs_pos, .. } => {
                gs.fill(StereoSample::silence());
                *gs_pos = 0;
            }
            Variant::Normal | Variant::Test => {}
        }
    }

    /// Apply the reverb in place.
    pub fn process(&mut self, mut buffer: &mut [StereoSample]) {
        if self.buffer.is_empty() {
            return;
        }
        while !buffer.is_empty() {
            let count = self.process_chunk(buffer);
            buffer = &mut buffer[count..];
        }
    }

    /// Process up to the next wrap point; returns the number of samples handled.
    fn process_chunk(&mut self, buffer: &mut [StereoSample]) -> usize {
        let len = self.buffer.len();
        let rbuf = &mut self.buffer;
        let mut pos = self.pos;
        let mut pos2 = self.pos2;

        let count = match &mut self.variant {
            Variant::Normal => {
                let count = (len - pos).min(len - pos2).min(buffer.len());
                for sample in &mut buffer[..count] {
                    let rev = (rbuf[pos].left + rbuf[pos].right + rbuf[pos2].left + rbuf[pos2].right)
                        * self.intensity
                        * 0.25;
                    sample.left += rev;
                    sample.right += rev;
                    rbuf[pos] = *sample;
                    pos += 1;
                    pos2 += 1;
                }
                count
            }
            Variant::Gs1 { gs } => {
                let count = (len - pos).min(gs.len() - pos2).min(buffer.len());
                for sample in &mut buffer[..count] {
                    let mix = *sample + gs[pos2];
                    let old = rbuf[pos];
                    *sample = mix;
                    rbuf[pos] = mix;
                    gs[pos2] = StereoSample::new(
                        0.25 * mix.left + 0.25 * old.right,
                        0.25 * mix.right + 0.25 * old.left,
                    );
                    pos += 1;
                    pos2 += 1;
                }
                if pos2 == gs.len() {
                    pos2 = 0;
                }
                count
            }
            Variant::Gs2 { gs, gs_pos, prim, sec } => {
                let count = (len - pos)
                    .min(len - pos2)
                    .min(gs.len() - *gs_pos)
                    .min(buffer.len());
                for sample in &mut buffer[..count] {
                    let mix = *sample + gs[*gs_pos];
                    let old = rbuf[pos];
                    *sample = mix;
                    rbuf[pos] = mix;
                    let tap = rbuf[pos2].right * 0.25;
                    gs[*gs_pos] = StereoSample::new(
                        old.left * *prim + old.right * *sec + tap,
                        old.right * *prim + old.left * *sec + mix.right * 0.25,
                    );
                    pos += 1;
                    pos2 += 1;
                    *gs_pos += 1;
                }
                if *gs_pos == gs.len() {
                    *gs_pos = 0;
                }
                count
            }
            Variant::Test => {
                const G: f32 = 0.8;
                let count = (len - pos).min(len - pos2).min(buffer.len());
                for sample in &mut buffer[..count] {
                    let feedback = rbuf[pos];
                    let new_feedback = *sample + feedback * G;
                    *sample = new_feedback * -G + feedback;
                    rbuf[pos] = new_feedback * -1.0;
                    pos += 1;
                    pos2 += 1;
                }
                count
            }
        };

        if pos == len {
            pos = 0;
        }
        if pos2 == len {
            pos2 = 0;
        }
        self.pos = pos;
        self.pos2 = pos2;
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [ReverbType; 6] = [
        ReverbType::Normal,
        ReverbType::None,
        ReverbType::Gs1,
        ReverbType::Gs2,
        ReverbType::Mgat,
        ReverbType::Test,
    ];

    fn peak(block: &[StereoSample]) -> f32 {
        block.iter().map(|s| s.left.abs().max(s.right.abs())).fold(0.0, f32::max)
    }

    #[test]
    fn silence_stays_silent() {
        for kind in ALL {
            let mut rev = Reverb::new(kind, 0x7F, 48_000, 3);
            let mut block = vec![StereoSample::silence(); 200];
            for _ in 0..50 {
                rev.process(&mut block);
                assert!(block.iter().all(|s| s.is_silent()), "{kind:?}");
            }
        }
    }

    #[test]
    fn reset_matches_fresh_instance() {
        for kind in ALL {
            let mut used = Reverb::new(kind, 0x60, 48_000, 3);
            let mut block = vec![StereoSample::new(0.5, -0.25); 300];
            used.process(&mut block);
            used.reset();

            let mut fresh = Reverb::new(kind, 0x60, 48_000, 3);
            let mut a = vec![StereoSample::new(0.1, 0.2); 1000];
            let mut b = a.clone();
            used.process(&mut a);
            fresh.process(&mut b);
            assert_eq!(a, b, "{kind:?}");
        }
    }

    #[test]
    fn impulse_is_bounded_and_decays() {
        for kind in ALL {
            let mut rev = Reverb::new(kind, 0x40, 48_000, 3);
            let mut block = vec![StereoSample::silence(); 200];
            block[0] = StereoSample::new(1.0, 1.0);
            let mut late_peak = 0.0f32;
            for i in 0..800 {
                rev.process(&mut block);
                let p = peak(&block);
                assert!(p.is_finite() && p <= 1.0 + 1e-6, "{kind:?} block {i} peak {p}");
                if i >= 700 {
                    late_peak = late_peak.max(p);
                }
                block.fill(StereoSample::silence());
            }
            assert!(late_peak < 1e-3, "{kind:?} still ringing: {late_peak}");
        }
    }

    #[test]
    fn normal_echo_arrives_one_frame_later() {
        // 48 kHz: one hardware frame is 800 samples, buffer spans 2 frames.
        let mut rev = Reverb::new(ReverbType::Normal, 64, 48_000, 2);
        let mut block = vec![StereoSample::silence(); 800];
        block[0] = StereoSample::new(1.0, 0.0);
        rev.process(&mut block);
        assert_eq!(block[0], StereoSample::new(1.0, 0.0));
        assert!(block[1..].iter().all(|s| s.is_silent()));

        // The secondary tap reads the impulse back after wrapping.
        block.fill(StereoSample::silence());
        rev.process(&mut block);
        let expected = 1.0 * 0.5 * 0.25;
        assert!((block[0].left - expected).abs() < 1e-6);
        assert!((block[0].right - expected).abs() < 1e-6);
    }

    #[test]
    fn none_variant_passes_input_through() {
        let mut rev = Reverb::new(ReverbType::None, 0x7F, 48_000, 2);
        let input: Vec<_> = (0..300).map(|i| StereoSample::new(i as f32 / 300.0, 0.1)).collect();
        for _ in 0..10 {
            let mut block = input.clone();
            rev.process(&mut block);
            assert_eq!(block, input);
        }
    }

    #[test]
    fn set_level_changes_intensity_only() {
        let mut rev = Reverb::new(ReverbType::Normal, 0, 48_000, 2);
        assert_eq!(rev.intensity(), 0.0);
        rev.set_level(0x40);
        assert_eq!(rev.intensity(), 0.5);
        assert_eq!(rev.buffer.len(), 1600);
    }
}
