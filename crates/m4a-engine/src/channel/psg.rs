//! Envelope and panning shared by the tone generator channels.
//!
//! The hardware envelope only moves in steps of one level per envelope
//! period. Volume and pan changes are latched and applied when the envelope
//! steps, and pan collapses to left, centre or right.

use m4a_ir::{EnvState, INTERFRAMES};

use super::{ChannelCore, VolumeFade};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CgbPan {
    Left,
    #[default]
    Center,
    Right,
}

/// Targets of the `goto`-style transitions between envelope phases.
enum Jump {
    DecayStart,
    SustainStart,
    SustainState,
    PseudoEchoStart,
}

#[derive(Clone, Debug)]
pub struct CgbEnvelope {
    use_stairstep: bool,
    is_ch3: bool,
    sustain_bug: bool,
    pub(crate) fast_release: bool,
    vol: u16,
    pan: i16,
    sus_bug_update: bool,

    inter_step: u8,
    level_cur: u8,
    peak: u8,
    sustain: u8,
    frame_count: u8,
    fade_level: f32,
    pub(crate) vol_fade: VolumeFade,
    pan_cur: CgbPan,
    pan_prev: CgbPan,
}

impl CgbEnvelope {
    /// `use_stairstep` holds the level until the last sub-frame of each
    /// period instead of ramping; `is_ch3` marks the wave channel.
    pub fn new(use_stairstep: bool, is_ch3: bool, sustain_bug: bool) -> Self {
        Self {
            use_stairstep,
            is_ch3,
            sustain_bug,
            fast_release: false,
            vol: 0,
            pan: 0,
            sus_bug_update: false,
            inter_step: 0,
            level_cur: 0,
            peak: 0,
            sustain: 0,
            frame_count: 0,
            fade_level: 0.0,
            vol_fade: VolumeFade::default(),
            pan_cur: CgbPan::Center,
            pan_prev: CgbPan::Center,
        }
    }

    pub fn level(&self) -> u8 {
        self.level_cur
    }

    pub fn pan(&self) -> CgbPan {
        self.pan_cur
    }

    pub(crate) fn set_vol(&mut self, core: &ChannelCore, vol: u16, pan: i16) {
        if core.stop {
            return;
        }
        self.vol = vol;
        self.pan = pan.clamp(-128, 127);
        self.sus_bug_update = true;
    }

    fn pseudo_echo_level(&self, core: &ChannelCore) -> u8 {
        ((u32::from(self.peak) * u32::from(core.note.pseudo_echo_vol) + 0xFF) >> 8) as u8
    }

    /// Advance the envelope by one render tick.
    pub(crate) fn step(&mut self, core: &mut ChannelCore) {
        let jump = if core.env_state == EnvState::Init {
            if core.stop {
                core.env_state = EnvState::Dead;
                return;
            }
            self.apply_vol(core);
            self.pan_prev = self.pan_cur;
            self.inter_step = 0;
            self.level_cur = 0;
            self.frame_count = core.env.att;
            core.env_state = EnvState::Attack;

            if self.frame_count > 0 {
                self.fade_level = 0.0;
                return;
            }
            let echo = self.pseudo_echo_level(core);
            if core.env.dec > 0 {
                self.fade_level = f32::from(self.peak);
            } else if self.sustain > 0 {
                self.fade_level = f32::from(self.sustain);
            } else if echo > 0 {
                self.fade_level = f32::from(echo);
            }
            Jump::DecayStart
        } else {
            if self.fast_release && core.env_state != EnvState::Die {
                self.inter_step = if core.env.rel == 0 || core.env_state == EnvState::PseudoEcho {
                    (INTERFRAMES - 1) as u8
                } else {
                    0
                };
                core.env_state = EnvState::Die;
                self.frame_count = 1;
                return;
            }

            self.inter_step += 1;
            if u32::from(self.inter_step) < INTERFRAMES {
                return;
            }
            self.inter_step = 0;
            self.frame_count = self.frame_count.saturating_sub(1);

            match self.next_jump(core) {
                Some(jump) => jump,
                None => return,
            }
        };
        self.run(core, jump);
    }

    /// Work done at an envelope period boundary; returns where to continue.
    fn next_jump(&mut self, core: &mut ChannelCore) -> Option<Jump> {
        if core.env_state == EnvState::PseudoEcho {
            self.frame_count = 1;
            core.note.pseudo_echo_len = core.note.pseudo_echo_len.saturating_sub(1);
            if core.note.pseudo_echo_len == 0 {
                core.env_state = EnvState::Die;
                self.inter_step = (INTERFRAMES - 1) as u8;
            }
            return None;
        }

        if core.stop && core.env_state < EnvState::Release {
            core.env_state = EnvState::Release;
            self.frame_count = core.env.rel;
            if self.level_cur == 0 || self.frame_count == 0 {
                return Some(Jump::PseudoEchoStart);
            }
            return None;
        }

        if self.frame_count != 0 {
            return None;
        }

        self.apply_vol(core);
        match core.env_state {
            EnvState::Release => {
                self.level_cur = self.level_cur.saturating_sub(1);
                if self.level_cur == 0 {
                    return Some(Jump::PseudoEchoStart);
                }
                self.frame_count = core.env.rel;
                None
            }
            EnvState::Sustain => Some(Jump::SustainState),
            EnvState::Decay => {
                self.level_cur = self.level_cur.saturating_sub(1);
                if self.level_cur <= self.sustain {
                    return Some(Jump::SustainStart);
                }
                self.frame_count = core.env.dec;
                None
            }
            EnvState::Attack => {
                self.level_cur += 1;
                if self.level_cur >= self.peak {
                    return Some(Jump::DecayStart);
                }
                self.frame_count = core.env.att;
                None
            }
            EnvState::Die => {
                core.env_state = EnvState::Dead;
                None
            }
            _ => None,
        }
    }

    fn run(&mut self, core: &mut ChannelCore, mut jump: Jump) {
        loop {
            jump = match jump {
                Jump::DecayStart => {
                    core.env_state = EnvState::Decay;
                    self.frame_count = core.env.dec;
                    // skip a decay that has nothing to do
                    if self.peak == 0 || self.frame_count == 0 || self.peak == self.sustain {
                        Jump::SustainStart
                    } else {
                        self.level_cur = self.peak;
                        return;
                    }
                }
                Jump::SustainStart => {
                    if core.env.sus == 0 {
                        core.env_state = EnvState::Release;
                        Jump::PseudoEchoStart
                    } else {
                        core.env_state = EnvState::Sustain;
                        self.level_cur = self.sustain;
                        Jump::SustainState
                    }
                }
                Jump::SustainState => {
                    if self.sustain_bug {
                        // the driver only refreshes the sustain level every 7th frame
                        self.frame_count = 7;
                        if self.is_ch3 {
                            self.level_cur = self.sustain;
                        }
                    } else {
                        self.frame_count = 1;
                        self.level_cur = self.sustain;
                    }
                    return;
                }
                Jump::PseudoEchoStart => {
                    self.frame_count = 1;
                    self.level_cur = self.pseudo_echo_level(core);
                    if self.level_cur != 0 && core.note.pseudo_echo_len != 0 {
                        core.env_state = EnvState::PseudoEcho;
                    } else {
                        core.env_state = EnvState::Die;
                        self.inter_step = (INTERFRAMES - 1) as u8;
                    }
                    return;
                }
            };
        }
    }

    /// Compute this tick's gain ramp from the envelope position.
    pub(crate) fn update_vol_fade(&mut self, core: &ChannelCore) {
        let mut interframes =
            (u32::from(self.frame_count) * INTERFRAMES).saturating_sub(u32::from(self.inter_step));
        let level_to = match core.env_state {
            EnvState::Attack => self.level_cur.saturating_add(1),
            EnvState::Decay | EnvState::Release => self.level_cur.saturating_sub(1),
            EnvState::Sustain | EnvState::PseudoEcho => {
                interframes = 1;
                self.level_cur
            }
            EnvState::Die => 0,
            EnvState::Init | EnvState::Dead => self.level_cur,
        };
        let level_to = f32::from(level_to);
        let interframes = interframes.max(1);

        let new_level = if self.use_stairstep {
            if interframes == 1 {
                level_to
            } else {
                self.fade_level
            }
        } else {
            self.fade_level + (level_to - self.fade_level) / interframes as f32
        };

        const SCALE: f32 = 1.0 / 32.0;
        self.vol_fade = VolumeFade {
            from_left: if self.pan_prev == CgbPan::Right { 0.0 } else { self.fade_level * SCALE },
            from_right: if self.pan_prev == CgbPan::Left { 0.0 } else { self.fade_level * SCALE },
            to_left: if self.pan_cur == CgbPan::Right { 0.0 } else { new_level * SCALE },
            to_right: if self.pan_cur == CgbPan::Left { 0.0 } else { new_level * SCALE },
        };
        self.pan_prev = self.pan_cur;
        self.fade_level = new_level;
    }

    /// Latch volume and pan into peak, sustain and the pan position.
    fn apply_vol(&mut self, core: &ChannelCore) {
        let pan = i32::from(self.pan);
        let vol = i32::from(self.vol);
        let rhythm_pan = i32::from(core.note.rhythm_pan);
        let velocity = i32::from(core.note.velocity);

        let trk_l = ((127 - pan) * vol) >> 8;
        let trk_r = ((pan + 128) * vol) >> 8;
        let chn_l = (((127 - rhythm_pan) * velocity) * trk_l) >> 14;
        let chn_r = (((rhythm_pan + 128) * velocity) * trk_r) >> 14;

        self.pan_cur = if chn_r / 2 >= chn_l {
            CgbPan::Right
        } else if chn_l / 2 >= chn_r {
            CgbPan::Left
        } else {
            CgbPan::Center
        };

        if self.sustain_bug
            && !self.is_ch3
            && self.sus_bug_update
            && core.env_state == EnvState::Sustain
        {
            self.level_cur = self.sustain;
            self.sus_bug_update = false;
        }

        self.peak = ((chn_l + chn_r) >> 4).clamp(0, 15) as u8;
        self.sustain = ((i32::from(self.peak) * i32::from(core.env.sus) + 15) >> 4).clamp(0, 15) as u8;
    }
}

/// Frequency of a tone generator timer value.
pub(crate) fn timer_to_freq(timer: f32) -> f32 {
    131_072.0 / (2048.0 - timer.clamp(0.0, 2047.0))
}

/// Tone generator timer value for a frequency.
pub(crate) fn freq_to_timer(freq: f32) -> f32 {
    2048.0 - (131_072.0 / freq.max(f32::MIN_POSITIVE)).min(2047.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::test_util::note;
    use m4a_ir::Adsr;

    fn core(adsr: Adsr) -> ChannelCore {
        ChannelCore::new(note(60, 0), adsr.cgb_masked())
    }

    fn run_frames(env: &mut CgbEnvelope, core: &mut ChannelCore, frames: usize) {
        for _ in 0..frames * INTERFRAMES as usize {
            if core.env_state == EnvState::Dead {
                break;
            }
            env.step(core);
            if core.env_state != EnvState::Dead {
                env.update_vol_fade(core);
            }
        }
    }

    #[test]
    fn full_volume_centre_peaks_at_fifteen() {
        let mut env = CgbEnvelope::new(false, false, false);
        let mut core = core(Adsr::new(0, 0, 15, 0));
        env.set_vol(&core, 0x100, 0);
        env.step(&mut core);
        assert_eq!(env.peak, 15);
        assert_eq!(env.pan(), CgbPan::Center);
        assert_eq!(core.env_state, EnvState::Sustain);
        assert_eq!(env.level(), 15);
    }

    #[test]
    fn hard_pan_collapses_to_one_side() {
        let mut env = CgbEnvelope::new(false, false, false);
        let mut core = core(Adsr::new(0, 0, 15, 0));
        env.set_vol(&core, 0x100, 127);
        env.step(&mut core);
        assert_eq!(env.pan(), CgbPan::Right);
        env.update_vol_fade(&core);
        assert_eq!(env.vol_fade.to_left, 0.0);
        assert!(env.vol_fade.to_right > 0.0);
    }

    #[test]
    fn attack_ramps_one_level_per_period() {
        let mut env = CgbEnvelope::new(false, false, false);
        let mut core = core(Adsr::new(1, 0, 15, 0));
        env.set_vol(&core, 0x100, 0);
        env.step(&mut core);
        assert_eq!(core.env_state, EnvState::Attack);
        assert_eq!(env.level(), 0);
        run_frames(&mut env, &mut core, 3);
        assert_eq!(env.level(), 3);
        run_frames(&mut env, &mut core, 20);
        assert_eq!(core.env_state, EnvState::Sustain);
    }

    #[test]
    fn zero_sustain_dies_after_decay() {
        let mut env = CgbEnvelope::new(false, false, false);
        let mut core = core(Adsr::new(0, 1, 0, 0));
        env.set_vol(&core, 0x100, 0);
        env.step(&mut core);
        assert_eq!(core.env_state, EnvState::Decay);
        run_frames(&mut env, &mut core, 40);
        assert_eq!(core.env_state, EnvState::Dead);
    }

    #[test]
    fn fast_release_stops_quickly() {
        let mut env = CgbEnvelope::new(false, false, false);
        let mut core = core(Adsr::new(0, 0, 15, 7));
        env.set_vol(&core, 0x100, 0);
        run_frames(&mut env, &mut core, 2);
        core.stop = true;
        env.fast_release = true;
        run_frames(&mut env, &mut core, 3);
        assert_eq!(core.env_state, EnvState::Dead);
    }

    #[test]
    fn pseudo_echo_holds_then_dies() {
        let mut env = CgbEnvelope::new(false, false, false);
        let mut core = core(Adsr::new(0, 0, 15, 0));
        core.note.pseudo_echo_vol = 0x80;
        core.note.pseudo_echo_len = 3;
        env.set_vol(&core, 0x100, 0);
        run_frames(&mut env, &mut core, 2);
        core.stop = true;
        run_frames(&mut env, &mut core, 1);
        assert_eq!(core.env_state, EnvState::PseudoEcho);
        assert_eq!(env.level(), 8);
        run_frames(&mut env, &mut core, 10);
        assert_eq!(core.env_state, EnvState::Dead);
    }

    #[test]
    fn stairstep_holds_level_until_last_subframe() {
        let mut env = CgbEnvelope::new(true, true, false);
        let mut core = core(Adsr::new(2, 0, 15, 0));
        env.set_vol(&core, 0x100, 0);
        env.step(&mut core);
        env.update_vol_fade(&core);
        assert_eq!(env.vol_fade.to_left, 0.0);
    }

    /// Attack at full volume straight into sustain (level 15).
    fn sustaining(is_ch3: bool, sustain_bug: bool) -> (CgbEnvelope, ChannelCore) {
        let mut env = CgbEnvelope::new(false, is_ch3, sustain_bug);
        let mut core = core(Adsr::new(0, 0, 15, 0));
        env.set_vol(&core, 0x100, 0);
        env.step(&mut core);
        assert_eq!(core.env_state, EnvState::Sustain);
        assert_eq!(env.level(), 15);
        (env, core)
    }

    #[test]
    fn sustain_bug_refreshes_every_seventh_frame() {
        let (mut env, mut core) = sustaining(false, true);
        assert_eq!(env.frame_count, 7);
        run_frames(&mut env, &mut core, 6);
        assert_eq!(env.frame_count, 1);
        run_frames(&mut env, &mut core, 1);
        assert_eq!(env.frame_count, 7);
        assert_eq!(core.env_state, EnvState::Sustain);
        assert_eq!(env.level(), 15);

        let (mut env, mut core) = sustaining(false, false);
        assert_eq!(env.frame_count, 1);
        run_frames(&mut env, &mut core, 1);
        assert_eq!(env.frame_count, 1);
    }

    #[test]
    fn sustain_bug_latches_the_previous_sustain_on_tone_channels() {
        let (mut env, mut core) = sustaining(false, true);
        // half volume: peak and sustain become 7
        env.set_vol(&core, 0x80, 0);
        run_frames(&mut env, &mut core, 6);
        assert_eq!(env.level(), 15);
        assert_eq!(env.sustain, 15);

        // the update flag loads the sustain computed before this change
        run_frames(&mut env, &mut core, 1);
        assert_eq!(env.level(), 15);
        assert_eq!(env.sustain, 7);
        assert!(!env.sus_bug_update);

        // without another volume change the level stays put
        run_frames(&mut env, &mut core, 7);
        assert_eq!(env.level(), 15);

        env.set_vol(&core, 0x80, 0);
        run_frames(&mut env, &mut core, 7);
        assert_eq!(env.level(), 7);
    }

    #[test]
    fn without_sustain_bug_volume_changes_apply_next_frame() {
        let (mut env, mut core) = sustaining(false, false);
        env.set_vol(&core, 0x80, 0);
        run_frames(&mut env, &mut core, 1);
        assert_eq!(env.level(), 7);
    }

    #[test]
    fn sustain_bug_on_wave_channel_reloads_each_period() {
        let (mut env, mut core) = sustaining(true, true);
        env.set_vol(&core, 0x80, 0);
        run_frames(&mut env, &mut core, 6);
        assert_eq!(env.level(), 15);
        run_frames(&mut env, &mut core, 1);
        assert_eq!(env.level(), 7);
        assert_eq!(env.frame_count, 7);
    }

    #[test]
    fn envelope_level_is_monotonic_within_each_phase() {
        for sustain_bug in [false, true] {
            for att in 0..8 {
                for dec in 0..8 {
                    for sus in 0..16 {
                        for rel in 0..8 {
                            for stop_at in [3, 40, 200] {
                                let adsr = Adsr::new(att, dec, sus, rel);
                                check_cgb_monotonic(adsr, sustain_bug, stop_at);
                            }
                        }
                    }
                }
            }
        }
    }

    fn check_cgb_monotonic(adsr: Adsr, sustain_bug: bool, stop_at: usize) {
        let mut env = CgbEnvelope::new(false, false, sustain_bug);
        let mut core = core(adsr);
        env.set_vol(&core, 0x100, 0);

        for tick in 0..stop_at + 2000 {
            if tick == stop_at {
                core.stop = true;
            }
            let (state, level) = (core.env_state, env.level());
            env.step(&mut core);
            if core.env_state == EnvState::Dead {
                return;
            }
            env.update_vol_fade(&core);

            let now = env.level();
            assert!(now <= 15, "{adsr:?} level {now}");
            if core.env_state != state {
                continue;
            }
            match state {
                EnvState::Attack => assert!(now >= level, "{adsr:?} attack fell {level} -> {now}"),
                EnvState::Decay | EnvState::Release | EnvState::Die => {
                    assert!(now <= level, "{adsr:?} {state:?} rose {level} -> {now}")
                }
                _ => {}
            }
        }
        panic!("{adsr:?} still alive long after release");
    }

    #[test]
    fn timer_conversions_invert() {
        let freq = 440.0;
        let back = timer_to_freq(freq_to_timer(freq));
        assert!((back - freq).abs() < 0.01);
        assert_eq!(timer_to_freq(2047.0), 131_072.0);
    }
}
