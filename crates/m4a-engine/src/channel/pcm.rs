//! Direct sound (PCM) channels.
//!
//! Besides plain signed 8-bit samples this handles two compressed formats
//! found in commercial games, and the procedural synth voices that some
//! games mark with a zero loop and zero length header.

use m4a_ir::{EnvState, ResamplerType, Rom, SampleInfo, StereoSample, VoiceFlags, INTERFRAMES};
use tracing::warn;

use super::{ChannelCore, VolumeFade};
use crate::mixer::MixingArgs;
use crate::resampler::Resampler;

const DPCM_BLOCK_SIZE: usize = 64;
const DPCM_BLOCK_BYTES: usize = 0x21;
const DPCM_DELTAS: [i8; 16] = [0, 1, 4, 9, 16, 25, 36, 49, -64, -49, -36, -25, -16, -9, -4, -1];

// Synth parameter bytes, relative to the start of the sample data.
const SYNTH_KIND: usize = 1;
const DUTY_BASE: usize = 2;
const DUTY_STEP: usize = 3;
const DEPTH: usize = 4;
const INIT_DUTY: usize = 5;

/// How the sample data of a PCM channel is produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PcmSource {
    /// The sample failed validation; the channel starts dead.
    Invalid,
    Pcm,
    GamefreakDpcm,
    CamelotAdpcm,
    SynthPwm,
    SynthSaw,
    SynthTri,
}

impl PcmSource {
    pub fn is_synth(self) -> bool {
        matches!(self, Self::SynthPwm | Self::SynthSaw | Self::SynthTri)
    }
}

/// Read position and decoder state for the sample fetchers.
#[derive(Clone, Debug)]
struct Cursor {
    pos: u32,
    adpcm_level: i16,
    adpcm_shift: u8,
    dpcm_block: Option<usize>,
    dpcm_decoded: [i8; DPCM_BLOCK_SIZE],
}

impl Cursor {
    fn new() -> Self {
        Self {
            pos: 0,
            adpcm_level: 0,
            adpcm_shift: 0x38,
            dpcm_block: None,
            dpcm_decoded: [0; DPCM_BLOCK_SIZE],
        }
    }

    /// Append samples produced by `next` until `buf` holds `required`,
    /// following the loop or zero-filling once the end is reached.
    fn fill<F>(&mut self, info: &SampleInfo, buf: &mut Vec<f32>, required: usize, mut next: F) -> bool
    where
        F: FnMut(&mut Self) -> f32,
    {
        if buf.len() >= required {
            return true;
        }
        let mut i = buf.len();
        buf.resize(required, 0.0);

        while i < required {
            if self.pos >= info.end_pos {
                if info.loop_enabled {
                    self.pos = info.loop_pos;
                } else {
                    buf[i..].fill(0.0);
                    return false;
                }
            }
            let til_end = (info.end_pos - self.pos) as usize;
            let count = til_end.min(required - i);
            for slot in &mut buf[i..i + count] {
                *slot = next(self);
                self.pos += 1;
            }
            i += count;

            if self.pos >= info.end_pos {
                if info.loop_enabled {
                    self.pos = info.loop_pos;
                } else {
                    buf[i..].fill(0.0);
                    return false;
                }
            }
        }
        true
    }

    fn pcm(&mut self, data: &[u8]) -> f32 {
        data.get(self.pos as usize).map_or(0.0, |&b| f32::from(b as i8) / 128.0)
    }

    fn dpcm(&mut self, data: &[u8]) -> f32 {
        let pos = self.pos as usize;
        let block = pos / DPCM_BLOCK_SIZE;
        if self.dpcm_block != Some(block) {
            let byte = |off: usize| data.get(block * DPCM_BLOCK_BYTES + off).copied().unwrap_or(0);
            let mut acc = byte(0) as i8;
            self.dpcm_decoded[0] = acc;
            acc = acc.wrapping_add(DPCM_DELTAS[usize::from(byte(1) & 0xF)]);
            self.dpcm_decoded[1] = acc;
            for (j, h) in (2..DPCM_BLOCK_SIZE).step_by(2).zip(2..) {
                let b = byte(h);
                acc = acc.wrapping_add(DPCM_DELTAS[usize::from(b >> 4)]);
                self.dpcm_decoded[j] = acc;
                acc = acc.wrapping_add(DPCM_DELTAS[usize::from(b & 0xF)]);
                self.dpcm_decoded[j + 1] = acc;
            }
            self.dpcm_block = Some(block);
        }
        f32::from(self.dpcm_decoded[pos % DPCM_BLOCK_SIZE]) / 128.0
    }

    fn adpcm(&mut self, data: &[u8]) -> f32 {
        let lo = self.pos & 1 != 0;
        let byte = data.get((self.pos >> 1) as usize).copied().unwrap_or(0) as i8;
        let d = i32::from(byte);
        let mut nibble = if lo { d.wrapping_shl(28) } else { d.wrapping_shl(24) } & (0xF000_0000u32 as i32);

        if self.adpcm_shift <= 63 {
            let shift = u32::from(self.adpcm_shift >> 1);
            self.adpcm_level = i32::from(self.adpcm_level).wrapping_add(nibble >> shift) as i16;
        }
        if nibble < 0 {
            nibble = nibble.wrapping_neg();
        }
        self.adpcm_shift = self.adpcm_shift.wrapping_add(4).wrapping_sub(((nibble as u32) >> 28) as u8);

        f32::from(self.adpcm_level) / 128.0
    }
}

/// A channel playing a sample from the cartridge.
#[derive(Clone, Debug)]
pub struct PcmChannel {
    rom: Rom,
    info: SampleInfo,
    fixed: bool,
    source: PcmSource,
    resampler: Option<Resampler>,
    synth: [u8; 8],
    cursor: Cursor,
    inter_pos: f32,

    env_inter_step: u8,
    env_level_cur: u8,
    env_level_prev: u8,
    left_vol_cur: u8,
    left_vol_prev: u8,
    right_vol_cur: u8,
    right_vol_prev: u8,
}

impl PcmChannel {
    /// Validate the sample against the ROM and pick the decoder.
    ///
    /// On validation failure the channel is created in the invalid state and
    /// dies on attach.
    pub fn new(
        rom: Rom,
        mut info: SampleInfo,
        fixed: bool,
        resampler_normal: ResamplerType,
        resampler_fixed: ResamplerType,
    ) -> Self {
        let pos = info.sample_pos;
        let mut synth = [0u8; 8];
        let mut resampler = None;

        let source = if info.loop_pos == 0 && info.end_pos == 0 {
            match rom.slice(info.data_pos(), 8) {
                Ok(bytes) if rom.valid_range(pos, 16 + 8) => {
                    synth.copy_from_slice(bytes);
                    match synth[SYNTH_KIND] {
                        0 => PcmSource::SynthPwm,
                        1 => PcmSource::SynthSaw,
                        _ => PcmSource::SynthTri,
                    }
                }
                _ => {
                    warn!(pos = format_args!("{pos:#08x}"), "synth sample reaches beyond end of file");
                    PcmSource::Invalid
                }
            }
        } else {
            resampler = Some(Resampler::new(if fixed { resampler_fixed } else { resampler_normal }));
            if info.gamefreak_compressed {
                let real_end = (info.end_pos as usize).div_ceil(DPCM_BLOCK_SIZE) * DPCM_BLOCK_BYTES;
                if rom.valid_range(pos, 16 + real_end) {
                    PcmSource::GamefreakDpcm
                } else {
                    warn!(pos = format_args!("{pos:#08x}"), "DPCM data reaches beyond end of file");
                    PcmSource::Invalid
                }
            } else if info.end_pos >= 0x8000_0000 {
                info.end_pos = info.end_pos.wrapping_neg();
                info.loop_enabled = false;
                if rom.valid_range(pos, 16 + info.end_pos as usize / 2) {
                    PcmSource::CamelotAdpcm
                } else {
                    warn!(pos = format_args!("{pos:#08x}"), "ADPCM data reaches beyond end of file");
                    PcmSource::Invalid
                }
            } else if rom.valid_range(pos, 16 + info.end_pos as usize) {
                PcmSource::Pcm
            } else {
                warn!(pos = format_args!("{pos:#08x}"), "PCM data reaches beyond end of file");
                PcmSource::Invalid
            }
        };

        // a loop that starts at or after the end would never produce a sample
        if info.loop_pos >= info.end_pos {
            info.loop_enabled = false;
        }

        Self {
            rom,
            info,
            fixed,
            source,
            resampler,
            synth,
            cursor: Cursor::new(),
            inter_pos: 0.0,
            env_inter_step: 0,
            env_level_cur: 0,
            env_level_prev: 0,
            left_vol_cur: 0,
            left_vol_prev: 0,
            right_vol_cur: 0,
            right_vol_prev: 0,
        }
    }

    pub fn source(&self) -> PcmSource {
        self.source
    }

    pub fn sample_info(&self) -> &SampleInfo {
        &self.info
    }

    pub fn is_fixed(&self) -> bool {
        self.fixed
    }

    pub(crate) fn is_invalid(&self) -> bool {
        self.source == PcmSource::Invalid
    }

    pub(crate) fn env_level(&self) -> u8 {
        self.env_level_cur
    }

    pub(crate) fn voice_flags(&self) -> VoiceFlags {
        match self.source {
            PcmSource::Invalid => VoiceFlags::empty(),
            PcmSource::Pcm => VoiceFlags::PCM,
            PcmSource::GamefreakDpcm => VoiceFlags::DPCM_GAMEFREAK,
            PcmSource::CamelotAdpcm => VoiceFlags::ADPCM_CAMELOT,
            PcmSource::SynthPwm => VoiceFlags::SYNTH_PWM,
            PcmSource::SynthSaw => VoiceFlags::SYNTH_SAW,
            PcmSource::SynthTri => VoiceFlags::SYNTH_TRI,
        }
    }

    pub(crate) fn set_vol(&mut self, core: &ChannelCore, vol: u16, pan: i16) {
        if core.stop {
            return;
        }
        let mut pan = (i32::from(pan) + i32::from(core.note.rhythm_pan)).clamp(-128, 128);
        // lets a track pan of 63 reach the right edge while keeping 0 centred
        if pan >= 126 {
            pan = 128;
        }
        let base = i64::from(core.note.velocity) * i64::from(vol);
        self.left_vol_cur = ((base * i64::from(128 - pan)) >> 15).clamp(0, 255) as u8;
        self.right_vol_cur = ((base * i64::from(pan + 128)) >> 15).clamp(0, 255) as u8;
    }

    pub(crate) fn set_pitch(&mut self, core: &mut ChannelCore, pitch: i16) {
        if !core.stop || core.freq <= 0.0 {
            let exp = f32::from(i16::from(core.note.midi_key_pitch) - 60) / 12.0 + f32::from(pitch) / 768.0;
            core.freq = self.info.mid_c_freq * libm::powf(2.0, exp);
        }
    }

    fn get_vol(&self) -> VolumeFade {
        let base = f32::from(self.env_level_prev);
        let delta = (f32::from(self.env_level_cur) - base) / INTERFRAMES as f32;
        let from_env = base + delta * f32::from(self.env_inter_step);
        let to_env = base + delta * f32::from(self.env_inter_step + 1);
        const SCALE: f32 = 1.0 / 65536.0;
        VolumeFade {
            from_left: f32::from(self.left_vol_prev) * from_env * SCALE,
            from_right: f32::from(self.right_vol_prev) * from_env * SCALE,
            to_left: f32::from(self.left_vol_cur) * to_env * SCALE,
            to_right: f32::from(self.right_vol_cur) * to_env * SCALE,
        }
    }

    fn update_vol_fade(&mut self) {
        self.left_vol_prev = self.left_vol_cur;
        self.right_vol_prev = self.right_vol_cur;
    }

    fn step_envelope(&mut self, core: &mut ChannelCore) {
        if core.env_state == EnvState::Init {
            if core.stop {
                core.env_state = EnvState::Dead;
                return;
            }
            // the volume is only known once the track has applied it
            self.update_vol_fade();
            self.env_level_prev = if core.env.att == 0xFF { 0xFF } else { 0 };
            self.env_level_cur = 0;
            self.env_inter_step = 0;
            core.env_state = EnvState::Attack;
        } else {
            self.env_inter_step += 1;
            if u32::from(self.env_inter_step) < INTERFRAMES {
                return;
            }
            self.env_level_prev = self.env_level_cur;
            self.env_inter_step = 0;
        }

        let env = core.env;
        let note = &mut core.note;
        match core.env_state {
            EnvState::PseudoEcho => {
                note.pseudo_echo_len = note.pseudo_echo_len.saturating_sub(1);
                if note.pseudo_echo_len == 0 {
                    core.env_state = EnvState::Die;
                    self.env_level_cur = 0;
                }
            }
            EnvState::Die if core.stop => core.env_state = EnvState::Dead,
            _ if core.stop => {
                self.env_level_cur = ((u32::from(self.env_level_cur) * u32::from(env.rel)) >> 8) as u8;
                // also triggers with a zero echo length, releasing early like the driver does
                if self.env_level_cur <= note.pseudo_echo_vol {
                    self.enter_echo_or_die(core);
                }
            }
            EnvState::Decay => {
                self.env_level_cur = ((u32::from(self.env_level_cur) * u32::from(env.dec)) >> 8) as u8;
                if self.env_level_cur <= env.sus {
                    self.env_level_cur = env.sus;
                    if self.env_level_cur == 0 {
                        self.enter_echo_or_die(core);
                    } else {
                        core.env_state = EnvState::Sustain;
                    }
                }
            }
            EnvState::Attack => {
                let level = u32::from(self.env_level_cur) + u32::from(env.att);
                if level >= 0xFF {
                    self.env_level_cur = 0xFF;
                    core.env_state = EnvState::Decay;
                } else {
                    self.env_level_cur = level as u8;
                }
            }
            _ => {}
        }
    }

    fn enter_echo_or_die(&mut self, core: &mut ChannelCore) {
        if core.note.pseudo_echo_vol == 0 || core.note.pseudo_echo_len == 0 {
            core.env_state = EnvState::Die;
            self.env_level_cur = 0;
        } else {
            core.env_state = EnvState::PseudoEcho;
            self.env_level_cur = core.note.pseudo_echo_vol;
        }
    }

    /// Returns `false` once a non-looping sample has run out.
    pub(crate) fn process(
        &mut self,
        core: &mut ChannelCore,
        out: &mut [StereoSample],
        scratch: &mut [f32],
        args: &MixingArgs,
    ) -> bool {
        self.step_envelope(core);
        if core.env_state == EnvState::Dead || out.is_empty() {
            return true;
        }

        let vol = self.get_vol().scaled(args.vol);
        let synth = self.source.is_synth();
        let mut inter_step = if self.fixed && !synth {
            args.fixed_mode_rate as f32 * args.sample_rate_inv
        } else {
            core.freq * args.sample_rate_inv
        };
        let scratch = &mut scratch[..out.len()];

        let running = if synth {
            inter_step /= 64.0;
            match self.source {
                PcmSource::SynthPwm => self.render_pwm(scratch, inter_step, args.samples_per_buffer_inv),
                PcmSource::SynthSaw => self.render_saw(scratch, inter_step),
                _ => self.render_tri(scratch, inter_step),
            }
            true
        } else {
            self.render_sample(scratch, inter_step)
        };
        vol.accumulate(out, scratch, args.samples_per_buffer_inv);

        self.update_vol_fade();
        running
    }

    fn render_sample(&mut self, scratch: &mut [f32], inter_step: f32) -> bool {
        let Some(resampler) = self.resampler.as_mut() else {
            return false;
        };
        let data = self.rom.bytes().get(self.info.data_pos()..).unwrap_or(&[]);
        let info = &self.info;
        let cursor = &mut self.cursor;
        match self.source {
            PcmSource::Pcm => resampler.process(scratch, inter_step, |buf, required| {
                cursor.fill(info, buf, required, |c| c.pcm(data))
            }),
            PcmSource::GamefreakDpcm => resampler.process(scratch, inter_step, |buf, required| {
                cursor.fill(info, buf, required, |c| c.dpcm(data))
            }),
            PcmSource::CamelotAdpcm => resampler.process(scratch, inter_step, |buf, required| {
                cursor.fill(info, buf, required, |c| c.adpcm(data))
            }),
            _ => false,
        }
    }

    fn render_pwm(&mut self, scratch: &mut [f32], inter_step: f32, samples_per_buffer_inv: f32) {
        let step = u32::from(self.synth[DUTY_STEP]) << 24;
        let from_pos = if self.env_inter_step == 0 {
            self.cursor.pos = self.cursor.pos.wrapping_add(step);
            self.cursor.pos
        } else {
            self.cursor.pos
        };
        let to_pos = from_pos.wrapping_add(step);

        let (base, depth, init) = (self.synth[DUTY_BASE], self.synth[DEPTH], self.synth[INIT_DUTY]);
        let from_thresh = pwm_threshold(from_pos, base, depth, init);
        let to_thresh = pwm_threshold(to_pos, base, depth, init);

        let delta = to_thresh - from_thresh;
        let inter = INTERFRAMES as f32;
        let mut threshold = from_thresh + delta * (f32::from(self.env_inter_step) / inter);
        let thresh_step = delta / inter * samples_per_buffer_inv;

        for s in scratch.iter_mut() {
            let base = if self.inter_pos < threshold { 0.5 } else { -0.5 };
            *s = base + 0.5 - threshold;
            threshold += thresh_step;
            self.inter_pos += inter_step;
            if self.inter_pos >= 1.0 {
                self.inter_pos -= 1.0;
            }
        }
    }

    fn render_saw(&mut self, scratch: &mut [f32], inter_step: f32) {
        const FIX: u32 = 0x70;
        let mut pos = self.cursor.pos;
        for s in scratch.iter_mut() {
            self.inter_pos += inter_step;
            if self.inter_pos >= 1.0 {
                self.inter_pos -= 1.0;
            }
            let var1 = ((self.inter_pos * 256.0) as u32).wrapping_sub(FIX);
            let var2 = ((self.inter_pos * 65536.0) as u32) << 17;
            let var3 = var1.wrapping_sub(var2 >> 27);
            pos = var3.wrapping_add(((pos as i32) >> 1) as u32);
            *s = (pos as i32) as f32 / 256.0;
        }
        self.cursor.pos = pos;
    }

    fn render_tri(&mut self, scratch: &mut [f32], inter_step: f32) {
        for s in scratch.iter_mut() {
            self.inter_pos += inter_step;
            if self.inter_pos >= 1.0 {
                self.inter_pos -= 1.0;
            }
            *s = if self.inter_pos < 0.5 {
                4.0 * self.inter_pos - 1.0
            } else {
                3.0 - 4.0 * self.inter_pos
            };
        }
    }
}

/// Duty threshold of the pulse synth for a modulation position.
fn pwm_threshold(val: u32, base: u8, depth: u8, init: u8) -> f32 {
    let mut t = (u32::from(init) << 24).wrapping_add(val);
    t = if (t as i32) < 0 { !t >> 8 } else { t >> 8 };
    t = t.wrapping_mul(u32::from(depth)).wrapping_add(u32::from(base) << 24);
    t as f32 / 4_294_967_296.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::test_util::{args, note};
    use crate::channel::{Channel, TrackId, Voice};
    use m4a_ir::Adsr;

    /// ROM with a sample header at 0x100 followed by `data`.
    fn rom_with_sample(loop_pos: u32, end_pos: u32, loop_flag: u8, data: &[u8]) -> (Rom, SampleInfo) {
        let mut bytes = vec![0u8; 0x100];
        bytes.extend_from_slice(&[0, 0, 0, loop_flag]);
        bytes.extend_from_slice(&(440u32 * 1024).to_le_bytes());
        bytes.extend_from_slice(&loop_pos.to_le_bytes());
        bytes.extend_from_slice(&end_pos.to_le_bytes());
        bytes.extend_from_slice(data);
        bytes.resize(bytes.len() + 64, 0);
        let info = SampleInfo {
            sample_pos: 0x100,
            mid_c_freq: 440.0,
            loop_pos,
            end_pos,
            loop_enabled: loop_flag & 0xC0 != 0,
            gamefreak_compressed: false,
        };
        (Rom::from_vec(bytes), info)
    }

    fn channel(rom: Rom, info: SampleInfo, adsr: Adsr) -> Channel {
        let pcm = PcmChannel::new(rom, info, false, ResamplerType::Nearest, ResamplerType::Nearest);
        Channel::new(TrackId::new(0, 0), note(60, 0), adsr, Voice::Pcm(pcm))
    }

    fn render(chn: &mut Channel, ticks: usize) -> Vec<StereoSample> {
        let args = args(48_000);
        let mut all = Vec::new();
        let mut scratch = vec![0.0; 200];
        for _ in 0..ticks {
            let mut out = vec![StereoSample::silence(); 200];
            chn.process(&mut out, &mut scratch, &args);
            all.extend(out);
        }
        all
    }

    #[test]
    fn envelope_level_is_monotonic_within_each_phase() {
        const STEPS: [u8; 6] = [0x00, 0x33, 0x66, 0x99, 0xCC, 0xFF];
        let (rom, info) = rom_with_sample(0, 16, 0x40, &[0x20; 16]);
        for att in STEPS {
            for dec in STEPS {
                for sus in STEPS {
                    for rel in STEPS {
                        for stop_at in [3, 40, 200] {
                            let pcm = PcmChannel::new(
                                rom.clone(),
                                info,
                                false,
                                ResamplerType::Nearest,
                                ResamplerType::Nearest,
                            );
                            check_pcm_monotonic(pcm, Adsr::new(att, dec, sus, rel), stop_at);
                        }
                    }
                }
            }
        }
    }

    fn check_pcm_monotonic(mut pcm: PcmChannel, adsr: Adsr, stop_at: usize) {
        let mut core = ChannelCore::new(note(60, 0), adsr);
        for tick in 0..stop_at + 2000 {
            if tick == stop_at {
                core.stop = true;
            }
            let (state, level) = (core.env_state, pcm.env_level_cur);
            pcm.step_envelope(&mut core);
            if core.env_state == EnvState::Dead {
                return;
            }
            let now = pcm.env_level_cur;
            if core.env_state != state {
                continue;
            }
            // a released note decays from whatever phase it was in
            if core.stop {
                assert!(now <= level, "{adsr:?} released {state:?} rose {level} -> {now}");
                continue;
            }
            match state {
                EnvState::Attack => assert!(now >= level, "{adsr:?} attack fell {level} -> {now}"),
                EnvState::Decay | EnvState::Die => {
                    assert!(now <= level, "{adsr:?} {state:?} rose {level} -> {now}")
                }
                EnvState::Sustain => assert_eq!(now, level, "{adsr:?} sustain moved"),
                _ => {}
            }
        }
        panic!("{adsr:?} still alive long after release");
    }

    #[test]
    fn sample_past_end_of_rom_starts_dead() {
        let (rom, mut info) = rom_with_sample(0, 16, 0, &[0; 16]);
        info.end_pos = 0x10_0000;
        let pcm = PcmChannel::new(rom, info, false, ResamplerType::Blamp, ResamplerType::Blamp);
        assert_eq!(pcm.source(), PcmSource::Invalid);
        let chn = Channel::new(TrackId::new(0, 0), note(60, 0), Adsr::default(), Voice::Pcm(pcm));
        assert!(chn.is_dead());
    }

    #[test]
    fn source_detection() {
        let (rom, info) = rom_with_sample(0, 0, 0, &[0, 1, 0, 0, 0, 0, 0, 0]);
        let pcm = PcmChannel::new(rom, info, false, ResamplerType::Blamp, ResamplerType::Blamp);
        assert_eq!(pcm.source(), PcmSource::SynthSaw);
        assert_eq!(pcm.voice_flags(), VoiceFlags::SYNTH_SAW);

        let (rom, mut info) = rom_with_sample(0, 64, 0, &[0; 64]);
        info.gamefreak_compressed = true;
        let pcm = PcmChannel::new(rom, info, false, ResamplerType::Blamp, ResamplerType::Blamp);
        assert_eq!(pcm.source(), PcmSource::GamefreakDpcm);

        let (rom, info) = rom_with_sample(0, 32u32.wrapping_neg(), 0, &[0; 16]);
        let pcm = PcmChannel::new(rom, info, false, ResamplerType::Blamp, ResamplerType::Blamp);
        assert_eq!(pcm.source(), PcmSource::CamelotAdpcm);
        assert_eq!(pcm.sample_info().end_pos, 32);
    }

    #[test]
    fn one_shot_sample_plays_then_dies() {
        let (rom, info) = rom_with_sample(0, 400, 0, &[0x40; 400]);
        let mut chn = channel(rom, info, Adsr::new(0xFF, 0xFF, 0xFF, 0));
        chn.set_vol(0x7F * 2, 0);
        chn.set_pitch(0);
        // 440 Hz at middle C with key 60 plays one source sample per 109 output samples
        let out = render(&mut chn, 4);
        assert!(out.iter().any(|s| s.left > 0.0 && s.right > 0.0));
        assert!(!chn.is_dead());

        let args = args(48_000);
        chn.core.freq = 48_000.0;
        let mut scratch = vec![0.0; 200];
        for _ in 0..4 {
            let mut out = vec![StereoSample::silence(); 200];
            chn.process(&mut out, &mut scratch, &args);
        }
        assert!(chn.is_dead());
    }

    #[test]
    fn looping_sample_keeps_playing() {
        let (rom, info) = rom_with_sample(0, 8, 0x40, &[0x40; 8]);
        let mut chn = channel(rom, info, Adsr::new(0xFF, 0xFF, 0xFF, 0));
        chn.set_vol(0xFF, 0);
        chn.set_pitch(0);
        chn.core.freq = 48_000.0;
        render(&mut chn, 50);
        assert!(!chn.is_dead());
        // a sustain of 0xFF is reached on the first decay frame
        assert_eq!(chn.env_state(), EnvState::Sustain);
    }

    #[test]
    fn release_fades_to_dead() {
        let (rom, info) = rom_with_sample(0, 8, 0x40, &[0x40; 8]);
        let mut chn = channel(rom, info, Adsr::new(0xFF, 0xFF, 0xFF, 0x80));
        chn.set_vol(0xFF, 0);
        chn.set_pitch(0);
        render(&mut chn, 8);
        chn.release(false);
        let mut ticks = 0;
        while !chn.is_dead() && ticks < 500 {
            render(&mut chn, 1);
            ticks += 1;
        }
        assert!(chn.is_dead(), "still alive after {ticks} ticks");
        assert!(ticks > INTERFRAMES as usize);
    }

    #[test]
    fn release_before_first_tick_is_silent() {
        let (rom, info) = rom_with_sample(0, 8, 0x40, &[0x40; 8]);
        let mut chn = channel(rom, info, Adsr::default());
        chn.release(false);
        let out = render(&mut chn, 1);
        assert!(chn.is_dead());
        assert!(out.iter().all(|s| s.is_silent()));
    }

    #[test]
    fn hard_right_pan_reaches_edge() {
        let (rom, info) = rom_with_sample(0, 8, 0x40, &[0x40; 8]);
        let mut chn = channel(rom, info, Adsr::default());
        chn.set_vol(0x100, 126);
        let Voice::Pcm(pcm) = &chn.voice else { unreachable!() };
        assert_eq!(pcm.left_vol_cur, 0);
        assert!(pcm.right_vol_cur > 0);
    }

    #[test]
    fn dpcm_block_decoding() {
        let mut cursor = Cursor::new();
        let mut data = vec![0u8; DPCM_BLOCK_BYTES];
        data[0] = 10;
        data[1] = 0x01; // +1
        data[2] = 0x2F; // +4, -1
        assert_eq!(cursor.dpcm(&data), 10.0 / 128.0);
        cursor.pos = 1;
        assert_eq!(cursor.dpcm(&data), 11.0 / 128.0);
        cursor.pos = 2;
        assert_eq!(cursor.dpcm(&data), 15.0 / 128.0);
        cursor.pos = 3;
        assert_eq!(cursor.dpcm(&data), 14.0 / 128.0);
    }

    #[test]
    fn adpcm_first_nibbles() {
        let mut cursor = Cursor::new();
        // high nibble first: 0x1 at shift 0x38 adds 0x1000_0000 >> 28 = 1
        let data = [0x10u8];
        assert_eq!(cursor.adpcm(&data), 1.0 / 128.0);
        assert_eq!(cursor.adpcm_shift, 0x38 + 4 - 1);
    }

    #[test]
    fn pwm_threshold_centre() {
        // no depth: the threshold is just the base duty
        assert_eq!(pwm_threshold(0, 0x80, 0, 0), 0.5);
        assert_eq!(pwm_threshold(0x1234_5678, 0x40, 0, 0x20), 0.25);
    }

    #[test]
    fn triangle_synth_is_bounded() {
        let (rom, info) = rom_with_sample(0, 0, 0, &[0, 2, 0, 0, 0, 0, 0, 0]);
        let mut chn = channel(rom, info, Adsr::default());
        chn.set_vol(0xFF, 0);
        chn.set_pitch(0);
        let out = render(&mut chn, 10);
        let peak = out.iter().map(|s| s.left.abs()).fold(0.0, f32::max);
        assert!(peak > 0.0);
        assert!(peak <= 1.0);
    }
}
