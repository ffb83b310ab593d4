//! Sounding channels.
//!
//! A channel is created by a note-on and lives in the [`ChannelPool`] until
//! its envelope reaches [`EnvState::Dead`]. It remembers the track that
//! started it (for mixing into that track's buffer) and the track it is
//! currently attached to (cleared when the track lets go of it).

mod noise;
mod pcm;
mod pool;
mod psg;
mod square;
mod wave;

pub use noise::NoiseChannel;
pub use pcm::{PcmChannel, PcmSource};
pub use pool::{ChannelId, ChannelPool};
pub use psg::CgbEnvelope;
pub use square::SquareChannel;
pub use wave::WaveChannel;

use m4a_ir::{Adsr, EnvState, Note, StereoSample, VoiceFlags};

use crate::mixer::MixingArgs;

/// Identifies a track across players; orders by player, then track.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TrackId {
    pub player: u8,
    pub track: u8,
}

impl TrackId {
    pub const fn new(player: usize, track: usize) -> Self {
        Self { player: player as u8, track: track as u8 }
    }
}

/// Which of the five hardware channel lists a channel lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Pcm,
    Square1,
    Square2,
    Wave,
    Noise,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 5] =
        [Self::Pcm, Self::Square1, Self::Square2, Self::Wave, Self::Noise];
    pub const CGB: [ChannelKind; 4] = [Self::Square1, Self::Square2, Self::Wave, Self::Noise];

    pub(crate) const fn index(self) -> usize {
        self as usize
    }
}

/// State common to every channel variant.
#[derive(Clone, Debug)]
pub struct ChannelCore {
    pub note: Note,
    pub env: Adsr,
    pub env_state: EnvState,
    pub stop: bool,
    pub freq: f32,
}

impl ChannelCore {
    pub fn new(note: Note, env: Adsr) -> Self {
        Self { note, env, env_state: EnvState::Init, stop: false, freq: 0.0 }
    }
}

/// Per-render-tick gain ramp for both sides.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct VolumeFade {
    pub from_left: f32,
    pub from_right: f32,
    pub to_left: f32,
    pub to_right: f32,
}

impl VolumeFade {
    fn scaled(self, factor: f32) -> Self {
        Self {
            from_left: self.from_left * factor,
            from_right: self.from_right * factor,
            to_left: self.to_left * factor,
            to_right: self.to_right * factor,
        }
    }

    /// Add `samples` into `out`, ramping the gain from the start to the end values.
    fn accumulate(self, out: &mut [StereoSample], samples: &[f32], samples_per_buffer_inv: f32) {
        let l_step = (self.to_left - self.from_left) * samples_per_buffer_inv;
        let r_step = (self.to_right - self.from_right) * samples_per_buffer_inv;
        let mut l_vol = self.from_left;
        let mut r_vol = self.from_right;
        for (o, s) in out.iter_mut().zip(samples) {
            o.left += s * l_vol;
            o.right += s * r_vol;
            l_vol += l_step;
            r_vol += r_step;
        }
    }
}

#[derive(Clone, Debug)]
pub enum Voice {
    Pcm(PcmChannel),
    Square(SquareChannel),
    Wave(WaveChannel),
    Noise(NoiseChannel),
}

/// A live channel in the pool.
#[derive(Clone, Debug)]
pub struct Channel {
    pub(crate) core: ChannelCore,
    /// Track currently holding the channel; `None` once released by the track.
    pub(crate) track: Option<TrackId>,
    /// Track whose buffer the channel is mixed into.
    pub(crate) origin: TrackId,
    /// Creation order, used to find the newest note for a note-off.
    pub(crate) serial: u64,
    pub(crate) voice: Voice,
}

impl Channel {
    pub fn new(origin: TrackId, note: Note, env: Adsr, voice: Voice) -> Self {
        let env = match voice {
            Voice::Pcm(_) => env,
            _ => env.cgb_masked(),
        };
        let mut core = ChannelCore::new(note, env);
        if let Voice::Pcm(pcm) = &voice {
            if pcm.is_invalid() {
                core.env_state = EnvState::Dead;
            }
        }
        Self { core, track: Some(origin), origin, serial: 0, voice }
    }

    pub fn note(&self) -> &Note {
        &self.core.note
    }

    pub fn env(&self) -> &Adsr {
        &self.core.env
    }

    pub fn env_state(&self) -> EnvState {
        self.core.env_state
    }

    pub fn freq(&self) -> f32 {
        self.core.freq
    }

    pub fn track(&self) -> Option<TrackId> {
        self.track
    }

    pub fn origin(&self) -> TrackId {
        self.origin
    }

    pub fn voice(&self) -> &Voice {
        &self.voice
    }

    pub fn is_dead(&self) -> bool {
        self.core.env_state == EnvState::Dead
    }

    pub fn is_releasing(&self) -> bool {
        self.core.stop
    }

    pub fn is_fast_releasing(&self) -> bool {
        match &self.voice {
            Voice::Pcm(_) => false,
            Voice::Square(c) => c.cgb.fast_release,
            Voice::Wave(c) => c.cgb.fast_release,
            Voice::Noise(c) => c.cgb.fast_release,
        }
    }

    /// Let go of the track without silencing the channel.
    pub fn detach(&mut self) {
        self.track = None;
    }

    /// Silence immediately.
    pub fn kill(&mut self) {
        self.core.env_state = EnvState::Dead;
        self.track = None;
    }

    /// Start the release phase. `fast` skips straight to the final fade on
    /// tone generator channels.
    pub fn release(&mut self, fast: bool) {
        self.core.stop = true;
        match &mut self.voice {
            Voice::Pcm(_) => {}
            Voice::Square(c) => c.cgb.fast_release = fast,
            Voice::Wave(c) => c.cgb.fast_release = fast,
            Voice::Noise(c) => c.cgb.fast_release = fast,
        }
    }

    /// Count down the note length. Returns whether the note is still held.
    pub fn tick_note(&mut self) -> bool {
        let core = &mut self.core;
        let held = match self.voice {
            Voice::Pcm(_) => !core.stop,
            _ => core.env_state < EnvState::Release,
        };
        if !held {
            return false;
        }
        if core.note.length > 0 {
            core.note.length -= 1;
            if core.note.length == 0 {
                self.release(false);
                return false;
            }
        }
        true
    }

    pub fn set_vol(&mut self, vol: u16, pan: i16) {
        match &mut self.voice {
            Voice::Pcm(c) => c.set_vol(&self.core, vol, pan),
            Voice::Square(c) => c.cgb.set_vol(&self.core, vol, pan),
            Voice::Wave(c) => c.cgb.set_vol(&self.core, vol, pan),
            Voice::Noise(c) => c.cgb.set_vol(&self.core, vol, pan),
        }
    }

    pub fn set_pitch(&mut self, pitch: i16) {
        match &mut self.voice {
            Voice::Pcm(c) => c.set_pitch(&mut self.core, pitch),
            Voice::Square(c) => c.set_pitch(&mut self.core, pitch),
            Voice::Wave(c) => c.set_pitch(&mut self.core, pitch),
            Voice::Noise(c) => c.set_pitch(&mut self.core, pitch),
        }
    }

    /// Render one tick into `out`, using `scratch` (same length) for the
    /// resampled mono signal.
    pub fn process(&mut self, out: &mut [StereoSample], scratch: &mut [f32], args: &MixingArgs) {
        if self.is_dead() {
            return;
        }
        let keep_going = match &mut self.voice {
            Voice::Pcm(c) => c.process(&mut self.core, out, scratch, args),
            Voice::Square(c) => c.process(&mut self.core, out, scratch, args),
            Voice::Wave(c) => c.process(&mut self.core, out, scratch, args),
            Voice::Noise(c) => c.process(&mut self.core, out, scratch, args),
        };
        if !keep_going {
            self.kill();
        }
    }

    pub fn voice_flags(&self) -> VoiceFlags {
        match &self.voice {
            Voice::Pcm(c) => c.voice_flags(),
            Voice::Square(c) => c.voice_flags(),
            Voice::Wave(_) => VoiceFlags::PSG_WAVE,
            Voice::Noise(c) => c.voice_flags(),
        }
    }

    /// Envelope level on the 0..=255 (PCM) or 0..=15 (CGB) scale.
    pub fn env_level(&self) -> u8 {
        match &self.voice {
            Voice::Pcm(c) => c.env_level(),
            Voice::Square(c) => c.cgb.level(),
            Voice::Wave(c) => c.cgb.level(),
            Voice::Noise(c) => c.cgb.level(),
        }
    }
}
