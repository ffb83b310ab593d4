//! Noise channel (channel 4).
//!
//! Noise is generated at the LFSR clock, held to the DAC rate with a
//! nearest-neighbour resampler, then band-limited to the output rate with
//! the sinc resampler.

use m4a_ir::{EnvState, ResamplerType, StereoSample, VoiceFlags};

use super::psg::CgbEnvelope;
use super::ChannelCore;
use crate::mixer::MixingArgs;
use crate::resampler::Resampler;

/// DAC output rates selected by the low bits of the DAC configuration.
const DAC_RATES: [f32; 4] = [32_768.0, 65_536.0, 131_072.0, 262_144.0];

#[derive(Clone, Debug)]
struct Lfsr {
    state: u16,
    mask: u16,
}

impl Lfsr {
    fn new(np: u32) -> Self {
        if np & 1 == 0 {
            Self { state: 0x4000, mask: 0x6000 }
        } else {
            Self { state: 0x40, mask: 0x60 }
        }
    }

    fn next(&mut self) -> f32 {
        let high = self.state & 1 != 0;
        self.state >>= 1;
        if high {
            self.state ^= self.mask;
            0.5
        } else {
            -0.5
        }
    }
}

#[derive(Clone, Debug)]
pub struct NoiseChannel {
    pub(crate) cgb: CgbEnvelope,
    np: u32,
    hold: Resampler,
    band_limit: Resampler,
    lfsr: Lfsr,
}

impl NoiseChannel {
    pub fn new(np: u32, sustain_bug: bool) -> Self {
        Self {
            cgb: CgbEnvelope::new(false, false, sustain_bug),
            np,
            hold: Resampler::new(ResamplerType::Nearest),
            band_limit: Resampler::new(ResamplerType::Sinc),
            lfsr: Lfsr::new(np),
        }
    }

    pub(crate) fn voice_flags(&self) -> VoiceFlags {
        if self.np == 0 {
            VoiceFlags::PSG_NOISE_15
        } else {
            VoiceFlags::PSG_NOISE_7
        }
    }

    pub(crate) fn set_pitch(&mut self, core: &mut ChannelCore, pitch: i16) {
        core.freq = noise_freq(f32::from(core.note.midi_key_pitch) + f32::from(pitch) / 64.0);
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

        let dac_rate = DAC_RATES[usize::from(args.dac_config) % DAC_RATES.len()];
        let hold_step = core.freq / dac_rate;
        let scratch = &mut scratch[..out.len()];

        let hold = &mut self.hold;
        let lfsr = &mut self.lfsr;
        self.band_limit.process(scratch, dac_rate * args.sample_rate_inv, |buf, required| {
            if buf.len() >= required {
                return true;
            }
            let start = buf.len();
            buf.resize(required, 0.0);
            hold.process(&mut buf[start..], hold_step, |raw, needed| {
                while raw.len() < needed {
                    raw.push(lfsr.next());
                }
                true
            })
        });
        self.cgb.vol_fade.accumulate(out, scratch, args.samples_per_buffer_inv);
        true
    }
}

/// LFSR clock for a (fractional) key.
fn noise_freq(key: f32) -> f32 {
    let freq = if key < 76.0 {
        4096.0 * libm::powf(8.0, (key - 60.0) / 12.0)
    } else if key < 78.0 {
        65_536.0 * libm::powf(2.0, (key - 76.0) / 2.0)
    } else if key < 80.0 {
        131_072.0 * libm::powf(2.0, key - 78.0)
    } else {
        524_288.0
    };
    freq.max(4.5714)
}
