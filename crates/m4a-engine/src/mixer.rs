//! Render tick mixing.
//!
//! Channels render into the buffer of the track that started them, PCM
//! first so the per-track reverb only colours sample playback, then the
//! tone generators. The master fade is applied per track before the
//! unmuted tracks are summed into the master buffer.

use alloc::vec::Vec;

use m4a_ir::{
    samples_per_buffer, AgbplaySoundMode, Mp2kSoundMode, StereoSample, AGB_FPS, INTERFRAMES,
};
use tracing::debug;

use crate::channel::{ChannelKind, ChannelPool};
use crate::player::{track_mut, Player};
use crate::reverb::Reverb;

/// Hardware PCM mixing rates selectable by the sound mode's frequency field.
const FIXED_MODE_RATES: [u32; 16] = [
    0, 5734, 7884, 10512, 13379, 15768, 18157, 21024, 26758, 31536, 36314, 40137, 42048, 0, 0, 0,
];

/// Exponent of the fade-out curve.
const FADE_CURVE: f32 = 10.0 / 6.0;

/// Mixing rate for fixed-frequency instruments at frequency code `freq`.
pub fn fixed_mode_rate(freq: u8) -> u32 {
    FIXED_MODE_RATES[usize::from(freq) % FIXED_MODE_RATES.len()]
}

/// Per-tick parameters handed to every channel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MixingArgs {
    /// PCM master volume as a gain.
    pub vol: f32,
    pub fixed_mode_rate: u32,
    pub sample_rate: u32,
    pub sample_rate_inv: f32,
    pub samples_per_buffer_inv: f32,
    pub dac_config: u8,
}

impl MixingArgs {
    pub fn new(sample_rate: u32, vol: u8, freq: u8, dac_config: u8) -> Self {
        let spb = samples_per_buffer(sample_rate).max(1);
        Self {
            vol: (f32::from(vol) + 1.0) / 16.0,
            fixed_mode_rate: fixed_mode_rate(freq),
            sample_rate,
            sample_rate_inv: 1.0 / sample_rate as f32,
            samples_per_buffer_inv: 1.0 / spb as f32,
            dac_config,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Mixer {
    sample_rate: u32,
    samples_per_buffer: usize,
    fixed_mode_rate: u32,
    master_volume: f32,
    fade_pos: f32,
    fade_step: f32,
    fade_interframes_left: u32,
    scratch: Vec<f32>,
}

impl Mixer {
    pub fn new(sample_rate: u32, master_volume: f32) -> Self {
        let samples_per_buffer = samples_per_buffer(sample_rate);
        Self {
            sample_rate,
            samples_per_buffer,
            fixed_mode_rate: fixed_mode_rate(4),
            master_volume,
            fade_pos: 1.0,
            fade_step: 0.0,
            fade_interframes_left: 0,
            scratch: alloc::vec![0.0; samples_per_buffer],
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn samples_per_buffer(&self) -> usize {
        self.samples_per_buffer
    }

    pub fn fixed_mode_rate(&self) -> u32 {
        self.fixed_mode_rate
    }

    /// Reverb delay length in hardware DMA buffers.
    pub fn num_dma_buffers(&self, dma_buffer_len: u32) -> u8 {
        let frame = self.fixed_mode_rate / AGB_FPS;
        if frame == 0 {
            return 2;
        }
        u8::try_from(dma_buffer_len / frame).unwrap_or(u8::MAX).max(2)
    }

    /// A fresh reverb for one track under the current configuration.
    pub fn make_reverb(&self, agbplay: &AgbplaySoundMode, rev: u8) -> Reverb {
        Reverb::new(
            agbplay.reverb_type,
            rev & 0x7F,
            self.sample_rate,
            self.num_dma_buffers(agbplay.dma_buffer_len),
        )
    }

    /// Apply a new reverb amount to every track.
    pub fn update_reverb(&mut self, players: &mut [Player], rev: u8) {
        for trk in players.iter_mut().flat_map(|p| p.tracks.iter_mut()) {
            trk.reverb.set_level(rev & 0x7F);
        }
    }

    /// Pick up a new frequency code; rebuilds every reverb since the delay
    /// length depends on it.
    pub fn update_fixed_mode_rate(
        &mut self,
        players: &mut [Player],
        mp2k: &Mp2kSoundMode,
        agbplay: &AgbplaySoundMode,
    ) {
        self.fixed_mode_rate = fixed_mode_rate(mp2k.freq);
        debug!(rate = self.fixed_mode_rate, "fixed mode rate");
        let reverb = self.make_reverb(agbplay, mp2k.rev);
        for trk in players.iter_mut().flat_map(|p| p.tracks.iter_mut()) {
            trk.reverb = reverb.clone();
        }
    }

    /// Render one tick into the track buffers and `master`.
    pub fn process(
        &mut self,
        players: &mut [Player],
        channels: &mut ChannelPool,
        master: &mut Vec<StereoSample>,
        mode: &Mp2kSoundMode,
    ) {
        let spb = self.samples_per_buffer;
        master.clear();
        master.resize(spb, StereoSample::silence());
        for trk in players.iter_mut().flat_map(|p| p.tracks.iter_mut()) {
            trk.audio_buffer.clear();
            trk.audio_buffer.resize(spb, StereoSample::silence());
        }

        let args = MixingArgs::new(self.sample_rate, mode.vol, mode.freq, mode.dac_config);
        self.scratch.resize(spb, 0.0);

        Self::mix_kind(&mut self.scratch, ChannelKind::Pcm, players, channels, &args);

        for trk in players.iter_mut().flat_map(|p| p.tracks.iter_mut()) {
            trk.reverb.process(&mut trk.audio_buffer);
        }

        for kind in ChannelKind::CGB {
            Self::mix_kind(&mut self.scratch, kind, players, channels, &args);
        }

        channels.purge_dead();

        let (from, to) = self.step_fade();
        let step = (to - from) * args.samples_per_buffer_inv;
        for trk in players.iter_mut().flat_map(|p| p.tracks.iter_mut()) {
            let mut level = from;
            for s in trk.audio_buffer.iter_mut() {
                *s = *s * level;
                level += step;
            }
        }

        for trk in players.iter().flat_map(|p| p.tracks.iter()).filter(|t| !t.muted) {
            for (m, s) in master.iter_mut().zip(&trk.audio_buffer) {
                *m += *s;
            }
        }
    }

    fn mix_kind(
        scratch: &mut [f32],
        kind: ChannelKind,
        players: &mut [Player],
        channels: &mut ChannelPool,
        args: &MixingArgs,
    ) {
        channels.for_each_mut(kind, |chn| {
            if let Some(trk) = track_mut(players, chn.origin()) {
                chn.process(&mut trk.audio_buffer, scratch, args);
            }
        });
    }

    /// Master gain at the start and end of this tick.
    fn step_fade(&mut self) -> (f32, f32) {
        if self.fade_interframes_left == 0 {
            return (self.master_volume, self.master_volume);
        }
        let gain = |pos: f32| {
            if pos < 0.0 {
                0.0
            } else {
                self.master_volume * libm::powf(pos, FADE_CURVE)
            }
        };
        let from = gain(self.fade_pos);
        let to = gain(self.fade_pos + self.fade_step);
        self.fade_pos += self.fade_step;
        self.fade_interframes_left -= 1;
        (from, to)
    }

    pub fn reset_fade(&mut self) {
        self.fade_pos = 0.0;
        self.fade_interframes_left = 0;
    }

    pub fn start_fade_out(&mut self, millis: u32) {
        self.fade_pos = 1.0;
        self.fade_interframes_left = fade_interframes(millis);
        self.fade_step = -1.0 / self.fade_interframes_left.max(1) as f32;
    }

    pub fn start_fade_in(&mut self, millis: u32) {
        self.fade_pos = 0.0;
        self.fade_interframes_left = fade_interframes(millis);
        self.fade_step = 1.0 / self.fade_interframes_left.max(1) as f32;
    }

    pub fn is_fade_done(&self) -> bool {
        self.fade_interframes_left == 0
    }
}

fn fade_interframes(millis: u32) -> u32 {
    (millis as f32 / 1000.0 * (AGB_FPS * INTERFRAMES) as f32) as u32
}
