//! Programmable wave channel (channel 3).

use m4a_ir::{EnvState, ResamplerType, Rom, StereoSample, AGB_MAP_ROM};

use super::psg::CgbEnvelope;
use super::{ChannelCore, VolumeFade};
use crate::mixer::MixingArgs;
use crate::resampler::Resampler;

const WAVE_BYTES: usize = 16;

#[derive(Clone, Debug)]
pub struct WaveChannel {
    pub(crate) cgb: CgbEnvelope,
    wave: [u8; WAVE_BYTES],
    resampler: Resampler,
    pos: u32,
    dc_100: f32,
    dc_75: f32,
    dc_50: f32,
    dc_25: f32,
    accurate_quantization: bool,
    accurate_volume: bool,
}

/// Mean of the wave after applying `level` to each nibble, as a DC offset.
fn dc_correction(wave: &[u8; WAVE_BYTES], level: impl Fn(u8) -> u8) -> f32 {
    let sum: f32 = wave
        .iter()
        .flat_map(|b| [b >> 4, b & 0xF])
        .map(|n| f32::from(level(n)) / 16.0)
        .sum();
    -sum / 32.0
}

/// Hardware volume steps of the wave channel.
fn snap_volume(x: f32) -> f32 {
    let level = if x < 1.5 / 32.0 {
        0.0
    } else if x < 5.5 / 32.0 {
        4.0
    } else if x < 9.5 / 32.0 {
        8.0
    } else if x < 13.5 / 32.0 {
        12.0
    } else {
        16.0
    };
    level / 32.0
}

/// Output shifts, gain compensation and DC offset for a volume level.
#[derive(Clone, Copy)]
struct Quantizer {
    shift_a: u32,
    shift_b: u32,
    scale: f32,
    dc: f32,
}

impl Quantizer {
    fn apply(self, nibble: u8) -> f32 {
        (f32::from((nibble >> self.shift_a) + (nibble >> self.shift_b)) + self.dc) * self.scale
    }
}

impl WaveChannel {
    /// `wave_ptr` is the cartridge address of the 16-byte wave; anything
    /// invalid plays silence.
    pub fn new(
        rom: &Rom,
        wave_ptr: u32,
        accurate_quantization: bool,
        accurate_volume: bool,
        sustain_bug: bool,
    ) -> Self {
        let mut wave = [0u8; WAVE_BYTES];
        if wave_ptr >= AGB_MAP_ROM {
            let pos = (wave_ptr - AGB_MAP_ROM) as usize;
            if rom.valid_range(pos, WAVE_BYTES) {
                if let Ok(bytes) = rom.slice(pos, WAVE_BYTES) {
                    wave.copy_from_slice(bytes);
                }
            }
        }

        let dc_100 = dc_correction(&wave, |n| n);
        let (dc_75, dc_50, dc_25) = if accurate_quantization {
            (
                dc_correction(&wave, |n| (n >> 2) + (n >> 1)),
                dc_correction(&wave, |n| n >> 1),
                dc_correction(&wave, |n| n >> 2),
            )
        } else {
            (0.0, 0.0, 0.0)
        };

        Self {
            cgb: CgbEnvelope::new(accurate_volume, true, sustain_bug),
            wave,
            resampler: Resampler::new(ResamplerType::Blep),
            pos: 0,
            dc_100,
            dc_75,
            dc_50,
            dc_25,
            accurate_quantization,
            accurate_volume,
        }
    }

    pub fn wave(&self) -> &[u8; WAVE_BYTES] {
        &self.wave
    }

    pub(crate) fn set_pitch(&mut self, core: &mut ChannelCore, pitch: i16) {
        let exp = f32::from(i16::from(core.note.midi_key_pitch) - 69) / 12.0 + f32::from(pitch) / 768.0;
        core.freq = 440.0 * 16.0 * libm::powf(2.0, exp);
    }

    fn get_vol(&self) -> VolumeFade {
        let fade = self.cgb.vol_fade;
        if !self.accurate_volume {
            return fade;
        }
        VolumeFade {
            from_left: snap_volume(fade.from_left),
            from_right: snap_volume(fade.from_right),
            to_left: snap_volume(fade.to_left),
            to_right: snap_volume(fade.to_right),
        }
    }

    fn quantizer(&self, vol: f32) -> Quantizer {
        let (shift_a, shift_b, scale, dc) = if vol < 6.0 / 32.0 {
            (2, 4, 4.0, self.dc_25)
        } else if vol < 10.0 / 32.0 {
            (1, 4, 2.0, self.dc_50)
        } else if vol < 14.0 / 32.0 {
            (1, 2, 4.0 / 3.0, self.dc_75)
        } else {
            (0, 4, 1.0, self.dc_100)
        };
        Quantizer { shift_a, shift_b, scale, dc: dc * 16.0 }
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

        let vol = self.get_vol();
        let inter_step = core.freq * args.sample_rate_inv;
        let scratch = &mut scratch[..out.len()];
        let quantizers = self.accurate_quantization.then(|| {
            (
                self.quantizer(vol.from_left.max(vol.from_right)),
                self.quantizer(vol.to_left.max(vol.to_right)),
            )
        });

        let wave = &self.wave;
        let pos = &mut self.pos;
        let mut next_nibble = move || {
            let p = *pos % 32;
            *pos = pos.wrapping_add(1);
            let byte = wave[(p / 2) as usize];
            if p % 2 == 0 {
                byte >> 4
            } else {
                byte & 0xF
            }
        };

        if let Some((from, to)) = quantizers {
            self.resampler.process(scratch, inter_step, |buf, required| {
                let count = required.saturating_sub(buf.len());
                let t_inc = 1.0 / count.max(1) as f32;
                let mut t = 0.0;
                for _ in 0..count {
                    let nibble = next_nibble();
                    let a = from.apply(nibble);
                    let b = to.apply(nibble);
                    buf.push((a + t * (b - a)) / 16.0);
                    t += t_inc;
                }
                true
            });
        } else {
            let dc = self.dc_100;
            self.resampler.process(scratch, inter_step, |buf, required| {
                while buf.len() < required {
                    buf.push(f32::from(next_nibble()) / 16.0 + dc);
                }
                true
            });
        }
        vol.accumulate(out, scratch, args.samples_per_buffer_inv);
        true
    }
}
