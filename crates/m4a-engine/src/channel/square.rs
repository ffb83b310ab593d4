//! Square wave channels 1 and 2, with the hardware frequency sweep on 1.

use m4a_ir::{EnvState, ResamplerType, StereoSample, VoiceFlags, AGB_FPS, INTERFRAMES};

use super::psg::{freq_to_timer, timer_to_freq, CgbEnvelope};
use super::ChannelCore;
use crate::mixer::MixingArgs;
use crate::resampler::Resampler;

const PATTERNS: [[f32; 8]; 4] = [
    [0.875, -0.125, -0.125, -0.125, -0.125, -0.125, -0.125, -0.125],
    [0.75, 0.75, -0.25, -0.25, -0.25, -0.25, -0.25, -0.25],
    [0.5, 0.5, 0.5, 0.5, -0.5, -0.5, -0.5, -0.5],
    [0.25, 0.25, 0.25, 0.25, 0.25, 0.25, -0.75, -0.75],
];

#[derive(Clone, Debug)]
pub struct SquareChannel {
    pub(crate) cgb: CgbEnvelope,
    duty: u32,
    resampler: Resampler,
    pos: usize,
    sweep: u8,
    sweep_enabled: bool,
    sweep_convergence: f32,
    sweep_coeff: f32,
    sweep_start_count: i16,
    /// Hardware timer, kept fractional for sub-frame accuracy.
    sweep_timer: f32,
}

impl SquareChannel {
    pub fn new(duty: u32, sweep: u8, sustain_bug: bool) -> Self {
        Self {
            cgb: CgbEnvelope::new(false, false, sustain_bug),
            duty,
            resampler: Resampler::new(ResamplerType::Blep),
            pos: 0,
            sweep,
            sweep_enabled: sweep_enabled(sweep),
            sweep_convergence: sweep_convergence(sweep),
            sweep_coeff: sweep_coeff(sweep),
            sweep_start_count: -1,
            sweep_timer: 1.0,
        }
    }

    pub fn sweep_timer(&self) -> f32 {
        self.sweep_timer
    }

    pub(crate) fn voice_flags(&self) -> VoiceFlags {
        VoiceFlags::square(self.duty.min(3), self.sweep != 0)
    }

    pub(crate) fn set_pitch(&mut self, core: &mut ChannelCore, pitch: i16) {
        if !core.stop || core.freq <= 0.0 {
            let exp = f32::from(i16::from(core.note.midi_key_pitch) - 69) / 12.0 + f32::from(pitch) / 768.0;
            core.freq = 3520.0 * libm::powf(2.0, exp);
        }

        // the start frequency of a sweep can only be set once
        if self.sweep_enabled && self.sweep_start_count < 0 {
            self.sweep_timer = freq_to_timer(core.freq / 8.0);
            let time = i16::from(sweep_time(self.sweep));
            self.sweep_start_count = time * (AGB_FPS * INTERFRAMES) as i16;
        }
    }

    pub(crate) fn process(
        &mut self,
        core: &mut ChannelCore,
        out: &mut [StereoSample],
        scratch: &mut [f32],
        args: &MixingArgs,
    ) -> bool {
        self.cgb.step(core);
        if core.env_state == EnvState::Dead {
            return true;
        }
        self.cgb.update_vol_fade(core);
        if out.is_empty() {
            return true;
        }

        let inter_step = if self.sweep_enabled {
            8.0 * timer_to_freq(self.sweep_timer) * args.sample_rate_inv
        } else {
            core.freq * args.sample_rate_inv
        };

        let scratch = &mut scratch[..out.len()];
        let pattern = &PATTERNS[(self.duty % 4) as usize];
        let pos = &mut self.pos;
        self.resampler.process(scratch, inter_step, |buf, required| {
            while buf.len() < required {
                buf.push(pattern[*pos]);
                *pos = (*pos + 1) % pattern.len();
            }
            true
        });
        self.cgb.vol_fade.accumulate(out, scratch, args.samples_per_buffer_inv);

        if self.sweep_enabled {
            if self.sweep_start_count == 0 {
                self.sweep_timer *= self.sweep_coeff;
                self.sweep_timer = if sweep_ascending(self.sweep) {
                    self.sweep_timer.min(self.sweep_convergence)
                } else {
                    self.sweep_timer.max(self.sweep_convergence)
                };
            } else if self.sweep_start_count > 0 {
                self.sweep_start_count = (self.sweep_start_count - 128).max(0);
            }
        }
        true
    }
}

fn sweep_enabled(sweep: u8) -> bool {
    sweep < 0x80 && sweep & 0x7 != 0
}

fn sweep_ascending(sweep: u8) -> bool {
    sweep & 0x8 == 0
}

fn sweep_time(sweep: u8) -> u8 {
    (sweep & 0x70) >> 4
}

/// Per-tick timer multiplier equivalent to the hardware sweep rate.
fn sweep_coeff(sweep: u8) -> f32 {
    let time = sweep_time(sweep);
    if time == 0 {
        return 1.0;
    }
    let shifts = sweep & 7;
    let step = if sweep_ascending(sweep) {
        (128 + (128 >> shifts)) as f32 / 128.0
    } else {
        (128 - (128 >> shifts)) as f32 / 128.0
    };
    let hardware_rate = 128.0 / f32::from(time);
    let tick_rate = (AGB_FPS * INTERFRAMES) as f32;
    libm::powf(step, hardware_rate / tick_rate)
}

/// Timer value the sweep settles at.
fn sweep_convergence(sweep: u8) -> f32 {
    if sweep_ascending(sweep) {
        2047.0
    } else {
        // timer -= timer >> shift stops changing once the shift yields zero
        ((1u32 << (sweep & 7)) - 1) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::test_util::{args, note};
    use crate::channel::{Channel, TrackId, Voice};
    use m4a_ir::Adsr;

    fn channel(duty: u32, sweep: u8) -> Channel {
        let mut chn = Channel::new(
            TrackId::new(0, 0),
            note(69, 0),
            Adsr::new(0, 0, 15, 0),
            Voice::Square(SquareChannel::new(duty, sweep, false)),
        );
        chn.set_vol(0x100, 0);
        chn.set_pitch(0);
        chn
    }

    #[test]
    fn a4_square_is_440_hz() {
        let chn = channel(2, 0);
        assert!((chn.freq() - 3520.0).abs() < 1e-3);
        assert_eq!(chn.voice_flags(), VoiceFlags::PSG_SQ_50);
    }

    #[test]
    fn renders_audible_square() {
        let mut chn = channel(2, 0);
        let args = args(48_000);
        let mut scratch = vec![0.0; 200];
        let mut peak = 0.0f32;
        for _ in 0..8 {
            let mut out = vec![StereoSample::silence(); 200];
            chn.process(&mut out, &mut scratch, &args);
            peak = out.iter().map(|s| s.left.abs()).fold(peak, f32::max);
        }
        assert!(peak > 0.1, "peak {peak}");
        assert!(peak < 1.0);
    }

    #[test]
    fn ascending_sweep_converges_to_timer_limit() {
        let mut chn = channel(2, 0x32);
        assert_eq!(chn.voice_flags(), VoiceFlags::PSG_SQ_50_SWEEP);
        let args = args(48_000);
        let mut scratch = vec![0.0; 200];
        let Voice::Square(sq) = &chn.voice else { unreachable!() };
        let start = sq.sweep_timer();
        for _ in 0..2000 {
            let mut out = vec![StereoSample::silence(); 200];
            chn.process(&mut out, &mut scratch, &args);
        }
        let Voice::Square(sq) = &chn.voice else { unreachable!() };
        assert!(sq.sweep_timer() > start);
        assert_eq!(sq.sweep_timer(), 2047.0);
    }

    #[test]
    fn descending_sweep_converges_to_shift_floor() {
        assert_eq!(sweep_convergence(0x3A), 3.0);
        assert!(sweep_coeff(0x3A) < 1.0);
        assert!(sweep_coeff(0x32) > 1.0);
    }

    #[test]
    fn disabled_sweeps() {
        assert!(!sweep_enabled(0x80));
        assert!(!sweep_enabled(0x30));
        assert!(sweep_enabled(0x31));
        assert_eq!(sweep_coeff(0x01), 1.0);
    }

    #[test]
    fn set_pitch_during_release_keeps_frequency() {
        let mut chn = channel(2, 0);
        chn.release(false);
        chn.set_pitch(768);
        assert!((chn.freq() - 3520.0).abs() < 1e-3);
    }
}
