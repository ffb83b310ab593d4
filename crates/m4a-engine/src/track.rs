//! Sequencer registers of one track.

use alloc::vec::Vec;

use arrayvec::ArrayVec;
use m4a_ir::{ActiveNotes, StereoSample, VoiceFlags, PROG_UNDEFINED, TRACK_CALL_STACK_SIZE};

use crate::channel::{ChannelPool, TrackId};
use crate::loudness::{Loudness, METER_LOWPASS_FREQ};
use crate::reverb::Reverb;

/// What the LFO modulates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Modt {
    #[default]
    Pitch,
    Vol,
    Pan,
    /// Any other byte: the LFO runs but modulates nothing.
    None,
}

impl From<u8> for Modt {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Pitch,
            1 => Self::Vol,
            2 => Self::Pan,
            _ => Self::None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Track {
    pub id: TrackId,
    /// ROM offset of the next byte to execute.
    pub pos: usize,
    pub return_pos: ArrayVec<usize, TRACK_CALL_STACK_SIZE>,
    pub modt: Modt,
    /// Running status: the last command byte `>= 0xBD`.
    pub last_cmd: u8,
    pub pitch: i16,
    pub last_note_key: u8,
    pub last_note_vel: u8,
    pub last_note_len: u8,
    pub rept_count: u8,
    pub prog: u8,
    pub vol: u8,
    pub mod_depth: u8,
    pub bendr: u8,
    pub priority: u8,
    pub lfos: u8,
    pub lfodl: u8,
    pub lfodl_count: u8,
    pub lfo_phase: u8,
    pub lfo_value: i8,
    pub pseudo_echo_vol: u8,
    pub pseudo_echo_len: u8,
    pub delay: u16,
    pub pan: i8,
    pub bend: i8,
    pub tune: i8,
    pub key_shift: i8,
    pub muted: bool,
    pub enabled: bool,
    pub update_volume: bool,
    pub update_pitch: bool,

    pub active_notes: ActiveNotes,
    pub active_voice_types: VoiceFlags,
    pub audio_buffer: Vec<StereoSample>,
    pub reverb: Reverb,
    pub loudness: Loudness,
}

impl Track {
    pub fn new(id: TrackId, reverb: Reverb, sample_rate: u32) -> Self {
        let mut trk = Self {
            id,
            pos: 0,
            return_pos: ArrayVec::new(),
            modt: Modt::Pitch,
            last_cmd: 0,
            pitch: 0,
            last_note_key: 0,
            last_note_vel: 0,
            last_note_len: 0,
            rept_count: 0,
            prog: PROG_UNDEFINED,
            vol: 0,
            mod_depth: 0,
            bendr: 2,
            priority: 0,
            lfos: 22,
            lfodl: 0,
            lfodl_count: 0,
            lfo_phase: 0,
            lfo_value: 0,
            pseudo_echo_vol: 0,
            pseudo_echo_len: 0,
            delay: 0,
            pan: 0,
            bend: 0,
            tune: 0,
            key_shift: 0,
            muted: false,
            enabled: false,
            update_volume: false,
            update_pitch: false,
            active_notes: ActiveNotes::new(),
            active_voice_types: VoiceFlags::empty(),
            audio_buffer: Vec::new(),
            reverb,
            loudness: Loudness::new(METER_LOWPASS_FREQ, sample_rate),
        };
        trk.init(0);
        trk
    }

    /// Reset every register and point the track at `pos`; 0 disables it.
    pub fn init(&mut self, pos: usize) {
        self.pos = pos;
        self.return_pos.clear();
        self.modt = Modt::Pitch;
        self.last_cmd = 0;
        self.pitch = 0;
        self.last_note_key = 0;
        self.last_note_vel = 0;
        self.last_note_len = 0;
        self.rept_count = 0;
        self.prog = PROG_UNDEFINED;
        self.vol = 0;
        self.mod_depth = 0;
        self.bendr = 2;
        self.priority = 0;
        self.lfos = 22;
        self.lfodl = 0;
        self.lfodl_count = 0;
        self.lfo_phase = 0;
        self.lfo_value = 0;
        self.pseudo_echo_vol = 0;
        self.pseudo_echo_len = 0;
        self.delay = 0;
        self.pan = 0;
        self.bend = 0;
        self.tune = 0;
        self.key_shift = 0;
        self.muted = false;
        self.enabled = pos != 0;
        self.update_volume = false;
        self.update_pitch = false;
        self.active_notes.clear();
        self.active_voice_types = VoiceFlags::empty();
        self.loudness.reset();
        self.reverb.reset();
    }

    /// Silence every channel the track still holds.
    pub fn stop(&mut self, channels: &mut ChannelPool) {
        if !self.enabled {
            return;
        }
        for chn in channels.of_track_mut(self.id) {
            chn.kill();
        }
    }

    pub fn pattern_level(&self) -> usize {
        self.return_pos.len()
    }

    pub fn get_pitch(&self) -> i16 {
        let mut p = i32::from(self.tune)
            + i32::from(self.bend) * i32::from(self.bendr)
            + i32::from(self.key_shift) * 64;
        if self.modt == Modt::Pitch {
            p += i32::from(self.lfo_value) * 4;
        }
        p as i16
    }

    pub fn get_vol(&self) -> u16 {
        let mut v = i32::from(self.vol) << 1;
        if self.modt == Modt::Vol {
            v = (v * (i32::from(self.lfo_value) + 128)) >> 7;
        }
        v as u16
    }

    pub fn get_pan(&self) -> i16 {
        let mut p = i16::from(self.pan) << 1;
        if self.modt == Modt::Pan {
            p += i16::from(self.lfo_value);
        }
        p
    }

    pub fn reset_lfo_value(&mut self) {
        self.lfo_value = 0;
        self.lfo_phase = 0;
        if self.modt == Modt::Pitch {
            self.update_pitch = true;
        } else {
            self.update_volume = true;
        }
    }
}
