//! Bytecode interpreter for MP2K track data.
//!
//! Every render tick each playing player adds its tempo to an accumulator
//! and runs one sequencer step on all of its tracks per 600 units. A step
//! counts down held notes, then executes opcodes until one of them sets a
//! wait. Opcodes below 0x80 reuse the last command byte (running status).

use m4a_ir::{
    AgbplaySoundMode, CgbPolyphony, EnvState, Note, Rom, RomError, BPM_PER_FRAME, INTERFRAMES,
    LOOP_ENDLESS, MEMACC_AREA_SIZE, NUM_NOTES, SONG_FADE_OUT_TIME, SONG_FINISH_TIME,
};
use tracing::{debug, warn};

use crate::bank::{self, Instrument};
use crate::channel::{
    Channel, ChannelKind, ChannelPool, NoiseChannel, PcmChannel, SquareChannel, TrackId, Voice,
    WaveChannel,
};
use crate::mixer::Mixer;
use crate::player::Player;
use crate::track::{Modt, Track};

/// Tempo accumulator units per sequencer step.
const STEP_THRESHOLD: i32 = (BPM_PER_FRAME * INTERFRAMES) as i32;

/// Upper bound on opcodes executed by one track in one step. Data that
/// jumps in a loop without ever waiting is stopped instead of hanging.
const MAX_OPS_PER_STEP: u32 = 10_000;

/// Wait lengths of opcodes `0x80..=0xB0`; note lengths of `0xCF..=0xFF`
/// use the same table.
pub const LENGTH_TABLE: [u8; 49] = [
    0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 28,
    30, 32, 36, 40, 42, 44, 48, 52, 54, 56, 60, 64, 66, 68, 72, 76, 78, 80, 84, 88, 90, 92, 96,
];

/// Everything outside the player that a sequencer step touches.
pub(crate) struct Env<'a> {
    pub rom: &'a Rom,
    pub channels: &'a mut ChannelPool,
    pub mixer: &'a mut Mixer,
    pub memacc: &'a mut [u8; MEMACC_AREA_SIZE],
    pub mode: &'a AgbplaySoundMode,
}

/// Song-level sequencer state shared by all players.
#[derive(Clone, Debug)]
pub struct Sequencer {
    speed_factor: f32,
    num_loops: i32,
    end_reached: bool,
}

impl Default for Sequencer {
    fn default() -> Self {
        Self { speed_factor: 1.0, num_loops: 0, end_reached: false }
    }
}

impl Sequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget loop count and end state for a new song.
    pub fn restart(&mut self) {
        self.num_loops = 0;
        self.end_reached = false;
    }

    pub fn set_speed_factor(&mut self, speed_factor: f32) {
        self.speed_factor = speed_factor;
    }

    pub fn speed_factor(&self) -> f32 {
        self.speed_factor
    }

    pub fn end_reached(&self) -> bool {
        self.end_reached
    }

    pub fn num_loops(&self) -> i32 {
        self.num_loops
    }

    /// Advance every player by one render tick.
    pub(crate) fn process(&mut self, players: &mut [Player], env: &mut Env<'_>) {
        let mut playing = false;
        for player in players.iter_mut() {
            playing |= self.player_main(player, env);
        }

        if !playing && !self.end_reached {
            debug!("all players stopped");
            env.mixer.start_fade_out(SONG_FINISH_TIME);
            self.end_reached = true;
        }
    }

    fn player_main(&mut self, player: &mut Player, env: &mut Env<'_>) -> bool {
        if !player.playing || player.finished {
            return false;
        }

        player.bpm_stack += (f32::from(player.bpm) * self.speed_factor) as u32 as i32;
        while player.bpm_stack >= STEP_THRESHOLD {
            let bank_pos = player.bank_pos;
            let mut active = false;
            for trk in player.tracks.iter_mut() {
                active |= self.track_main(trk, bank_pos, &mut player.bpm, env);
            }

            player.tick_count += 1;
            player.bpm_stack -= STEP_THRESHOLD;
            if !active {
                player.finished = true;
                player.playing = false;
            }
        }

        for trk in player.tracks.iter_mut() {
            track_vol_pitch(trk, env.channels);
        }

        player.interframe_count += 1;
        player.frame_count = player.interframe_count / u64::from(INTERFRAMES);
        player.playing
    }

    fn track_main(&mut self, trk: &mut Track, bank_pos: usize, bpm: &mut u16, env: &mut Env<'_>) -> bool {
        if !trk.enabled {
            return false;
        }
        match self.step_track(trk, bank_pos, bpm, env) {
            Ok(active) => active,
            Err(err) => {
                warn!(track = ?trk.id, pos = format_args!("{:#08x}", trk.pos), %err, "track data unreadable");
                play_fine(trk, env.channels);
                false
            }
        }
    }

    fn step_track(
        &mut self,
        trk: &mut Track,
        bank_pos: usize,
        bpm: &mut u16,
        env: &mut Env<'_>,
    ) -> Result<bool, RomError> {
        tick_track_notes(trk, env.channels);

        let mut ops = 0;
        while trk.delay == 0 {
            ops += 1;
            if ops > MAX_OPS_PER_STEP {
                warn!(track = ?trk.id, pos = format_args!("{:#08x}", trk.pos), "track never waits");
                play_fine(trk, env.channels);
                return Ok(false);
            }

            let mut cmd = env.rom.read_u8(trk.pos)?;
            if cmd < 0x80 {
                cmd = trk.last_cmd;
                if cmd < 0x80 {
                    warn!(track = ?trk.id, pos = format_args!("{:#08x}", trk.pos), "running status without command");
                    play_fine(trk, env.channels);
                    return Ok(false);
                }
            } else {
                trk.pos += 1;
                if cmd >= 0xBD {
                    trk.last_cmd = cmd;
                }
            }

            if cmd >= 0xCF {
                play_note(trk, bank_pos, cmd, env)?;
            } else if cmd >= 0xB1 {
                self.play_command(trk, cmd, bpm, env)?;
                if !trk.enabled {
                    return Ok(false);
                }
            } else {
                trk.delay = u16::from(LENGTH_TABLE[usize::from(cmd - 0x80)]);
            }
        }

        trk.delay -= 1;
        step_lfo(trk);
        Ok(true)
    }

    fn play_command(
        &mut self,
        trk: &mut Track,
        cmd: u8,
        bpm: &mut u16,
        env: &mut Env<'_>,
    ) -> Result<(), RomError> {
        let rom = env.rom;
        match cmd {
            // FINE
            0xB1 => play_fine(trk, env.channels),
            // GOTO
            0xB2 => {
                if trk.id.track == 0 {
                    let max_loops = env.mode.max_loops;
                    if max_loops != LOOP_ENDLESS {
                        let loops = self.num_loops;
                        self.num_loops += 1;
                        if loops >= i32::from(max_loops) && !self.end_reached {
                            debug!(loops, "loop limit reached");
                            self.end_reached = true;
                            env.mixer.start_fade_out(SONG_FADE_OUT_TIME);
                        }
                    }
                }
                trk.pos = rom.read_agb_ptr(trk.pos)?;
            }
            // PATT
            0xB3 => {
                if trk.return_pos.try_push(trk.pos + 4).is_err() {
                    warn!(track = ?trk.id, "pattern calls nested too deep");
                    play_fine(trk, env.channels);
                    return Ok(());
                }
                trk.pos = rom.read_agb_ptr(trk.pos)?;
            }
            // PEND
            0xB4 => {
                if let Some(pos) = trk.return_pos.pop() {
                    trk.pos = pos;
                }
            }
            // REPT
            0xB5 => {
                let count = read_arg(rom, trk)?;
                if count == 0 {
                    play_fine(trk, env.channels);
                    return Ok(());
                }
                trk.rept_count = trk.rept_count.wrapping_add(1);
                if trk.rept_count < count {
                    trk.pos = rom.read_agb_ptr(trk.pos)?;
                } else {
                    trk.rept_count = 0;
                    trk.pos += 4;
                }
            }
            0xB9 => memacc(trk, env)?,
            0xBA => trk.priority = read_arg(rom, trk)?,
            0xBB => *bpm = u16::from(read_arg(rom, trk)?) * 2,
            0xBC => trk.key_shift = read_arg(rom, trk)? as i8,
            0xBD => trk.prog = read_arg(rom, trk)?,
            0xBE => {
                trk.vol = read_arg(rom, trk)?;
                trk.update_volume = true;
            }
            0xBF => {
                trk.pan = (read_arg(rom, trk)? as i8).wrapping_sub(0x40);
                trk.update_volume = true;
            }
            0xC0 => {
                trk.bend = (read_arg(rom, trk)? as i8).wrapping_sub(0x40);
                trk.update_pitch = true;
            }
            0xC1 => {
                trk.bendr = read_arg(rom, trk)?;
                trk.update_pitch = true;
            }
            0xC2 => {
                trk.lfos = read_arg(rom, trk)?;
                if trk.lfos == 0 {
                    trk.reset_lfo_value();
                }
            }
            0xC3 => {
                trk.lfodl = read_arg(rom, trk)?;
                trk.lfodl_count = trk.lfodl;
            }
            0xC4 => {
                trk.mod_depth = read_arg(rom, trk)?;
                if trk.mod_depth == 0 {
                    trk.reset_lfo_value();
                }
            }
            0xC5 => {
                let modt = Modt::from(read_arg(rom, trk)?);
                if modt != trk.modt {
                    trk.modt = modt;
                    trk.update_volume = true;
                    trk.update_pitch = true;
                }
            }
            0xC8 => {
                trk.tune = (read_arg(rom, trk)? as i8).wrapping_sub(0x40);
                trk.update_pitch = true;
            }
            0xCD => xcmd(trk, env)?,
            // EOT
            0xCE => {
                let mut key = rom.read_u8(trk.pos)?;
                if key >= 0x80 {
                    key = trk.last_note_key;
                } else {
                    trk.pos += 1;
                    trk.last_note_key = key;
                }
                let found = env.channels.newest_of_track_mut(trk.id, |c| {
                    !c.is_dead() && !c.is_releasing() && c.note().midi_key_track_data == key
                });
                if let Some(chn) = found {
                    chn.release(false);
                }
            }
            _ => {
                debug!(track = ?trk.id, cmd = format_args!("{cmd:#04x}"), "unsupported command");
                play_fine(trk, env.channels);
            }
        }
        Ok(())
    }
}

fn read_arg(rom: &Rom, trk: &mut Track) -> Result<u8, RomError> {
    let value = rom.read_u8(trk.pos)?;
    trk.pos += 1;
    Ok(value)
}

/// Release and let go of every channel, then disable the track.
fn play_fine(trk: &mut Track, channels: &mut ChannelPool) {
    for chn in channels.of_track_mut(trk.id) {
        chn.release(false);
        chn.detach();
    }
    trk.enabled = false;
    trk.active_notes.clear();
    trk.active_voice_types = m4a_ir::VoiceFlags::empty();
}

/// Count down note lengths and rebuild the track's held-key display.
fn tick_track_notes(trk: &mut Track, channels: &mut ChannelPool) {
    trk.active_notes.clear();
    trk.active_voice_types = m4a_ir::VoiceFlags::empty();
    for chn in channels.of_track_mut(trk.id) {
        if chn.tick_note() {
            trk.active_notes.set(chn.note().midi_key_track_data % NUM_NOTES as u8);
            trk.active_voice_types |= chn.voice_flags();
        }
    }
}

/// LFO output for a phase: a triangle scaled by the modulation depth.
fn lfo_point(phase: u8, depth: u8) -> i32 {
    let point = if phase.wrapping_sub(64) as i8 >= 0 {
        128 - i32::from(phase)
    } else {
        i32::from(phase as i8)
    };
    (point * i32::from(depth)) >> 6
}

fn step_lfo(trk: &mut Track) {
    if trk.lfos == 0 || trk.mod_depth == 0 {
        return;
    }
    if trk.lfodl_count != 0 {
        trk.lfodl_count -= 1;
        return;
    }
    trk.lfo_phase = trk.lfo_phase.wrapping_add(trk.lfos);
    let point = lfo_point(trk.lfo_phase, trk.mod_depth);
    if i32::from(trk.lfo_value) != point {
        trk.lfo_value = point as i8;
        if trk.modt == Modt::Pitch {
            trk.update_pitch = true;
        } else {
            trk.update_volume = true;
        }
    }
}

/// Push pending volume and pitch changes to the track's channels.
fn track_vol_pitch(trk: &mut Track, channels: &mut ChannelPool) {
    if !trk.enabled {
        return;
    }
    trk.pitch = trk.get_pitch();
    if !trk.update_volume && !trk.update_pitch {
        return;
    }

    let (vol, pan, pitch) = (trk.get_vol(), trk.get_pan(), trk.pitch);
    for chn in channels.of_track_mut(trk.id) {
        if trk.update_volume {
            chn.set_vol(vol, pan);
        }
        if trk.update_pitch {
            chn.set_pitch(pitch);
        }
    }
    trk.update_volume = false;
    trk.update_pitch = false;
}

fn play_note(trk: &mut Track, bank_pos: usize, cmd: u8, env: &mut Env<'_>) -> Result<(), RomError> {
    let rom = env.rom;
    trk.last_note_len = LENGTH_TABLE[usize::from(cmd - 0xCF)];

    if rom.read_u8(trk.pos)? < 0x80 {
        trk.last_note_key = read_arg(rom, trk)?;
        if rom.read_u8(trk.pos)? < 0x80 {
            trk.last_note_vel = read_arg(rom, trk)?;
            if rom.read_u8(trk.pos)? < 0x80 {
                trk.last_note_len = trk.last_note_len.wrapping_add(read_arg(rom, trk)?);
            }
        }
    }

    if trk.prog > 127 {
        return Ok(());
    }

    let record = match bank::lookup(rom, bank_pos, trk.prog, trk.last_note_key) {
        Ok(record) => record,
        Err(err) => {
            warn!(track = ?trk.id, prog = trk.prog, %err, "note skipped");
            return Ok(());
        }
    };

    trk.lfodl_count = trk.lfodl;
    if trk.lfodl != 0 {
        trk.reset_lfo_value();
    }

    let note = Note {
        length: trk.last_note_len,
        midi_key_track_data: trk.last_note_key,
        midi_key_pitch: record.pitch_key,
        velocity: trk.last_note_vel,
        priority: trk.priority,
        rhythm_pan: record.rhythm_pan,
        pseudo_echo_vol: trk.pseudo_echo_vol,
        pseudo_echo_len: trk.pseudo_echo_len,
        track_idx: trk.id.track,
        player_idx: trk.id.player,
    };

    let (adsr, instrument) = match bank::read_voice(rom, &record) {
        Ok(voice) => voice,
        Err(err) => {
            warn!(track = ?trk.id, prog = trk.prog, %err, "note skipped");
            return Ok(());
        }
    };

    let mode = env.mode;
    let kind = match instrument {
        Instrument::Square1 { .. } => ChannelKind::Square1,
        Instrument::Square2 { .. } => ChannelKind::Square2,
        Instrument::Wave { .. } => ChannelKind::Wave,
        Instrument::Noise { .. } => ChannelKind::Noise,
        Instrument::Pcm { .. } => ChannelKind::Pcm,
    };
    if kind != ChannelKind::Pcm && !cgb_note_allowed(env.channels, kind, mode.cgb_polyphony, &note, trk.id) {
        return Ok(());
    }

    let sustain_bug = mode.emulate_cgb_sustain_bug;
    let voice = match instrument {
        Instrument::Square1 { duty, sweep } => Voice::Square(SquareChannel::new(duty, sweep, sustain_bug)),
        Instrument::Square2 { duty } => Voice::Square(SquareChannel::new(duty, 0, sustain_bug)),
        Instrument::Wave { wave_ptr } => Voice::Wave(WaveChannel::new(
            rom,
            wave_ptr,
            mode.accurate_ch3_quantization,
            mode.accurate_ch3_volume,
            sustain_bug,
        )),
        Instrument::Noise { np } => Voice::Noise(NoiseChannel::new(np, sustain_bug)),
        Instrument::Pcm { info, fixed } => Voice::Pcm(PcmChannel::new(
            rom.clone(),
            info,
            fixed,
            mode.resampler_type_normal,
            mode.resampler_type_fixed,
        )),
    };

    let chn = Channel::new(trk.id, note, adsr, voice);
    if !chn.is_dead() {
        env.channels.insert(kind, chn);
    }

    trk.update_volume = true;
    trk.update_pitch = true;
    Ok(())
}

/// Apply the tone generator polyphony policy to `kind`'s list before a new
/// note. Returns `false` if a channel with higher precedence keeps playing.
fn cgb_note_allowed(
    channels: &mut ChannelPool,
    kind: ChannelKind,
    policy: CgbPolyphony,
    note: &Note,
    track: TrackId,
) -> bool {
    // equal priority goes to the track ordered first
    let outranks = |chn: &Channel| {
        let playing = chn.note().priority;
        playing > note.priority
            || (playing == note.priority && chn.track().map_or(true, |t| t < track))
    };

    match policy {
        CgbPolyphony::Poly => true,
        CgbPolyphony::MonoStrict => {
            if let Some(chn) = channels.iter(kind).find(|c| !c.is_dead()) {
                if !chn.is_releasing() && outranks(chn) {
                    return false;
                }
            }
            channels.clear_kind(kind);
            true
        }
        CgbPolyphony::MonoSmooth => {
            let mut blocked = false;
            channels.for_each_mut(kind, |chn| {
                if blocked {
                    return;
                }
                if chn.env_state() < EnvState::PseudoEcho && !chn.is_fast_releasing() && outranks(chn) {
                    blocked = true;
                    return;
                }
                chn.release(true);
            });
            !blocked
        }
    }
}

fn memacc(trk: &mut Track, env: &mut Env<'_>) -> Result<(), RomError> {
    let rom = env.rom;
    let op = read_arg(rom, trk)?;
    let addr = usize::from(read_arg(rom, trk)?);
    let data = read_arg(rom, trk)?;
    let mem = &mut *env.memacc;
    let indirect = mem[usize::from(data)];

    if op <= 5 {
        mem[addr] = match op {
            0 => data,
            1 => mem[addr].wrapping_add(data),
            2 => mem[addr].wrapping_sub(data),
            3 => indirect,
            4 => mem[addr].wrapping_add(indirect),
            _ => mem[addr].wrapping_sub(indirect),
        };
        return Ok(());
    }
    if op > 17 {
        return Ok(());
    }

    // 6..=11 compare against the operand, 12..=17 against memory
    let (lhs, rhs) = (mem[addr], if op < 12 { data } else { indirect });
    let branch = match (op - 6) % 6 {
        0 => lhs == rhs,
        1 => lhs != rhs,
        2 => lhs > rhs,
        3 => lhs >= rhs,
        4 => lhs <= rhs,
        _ => lhs < rhs,
    };

    if branch {
        trk.pos = rom.read_agb_ptr(trk.pos)?;
    } else {
        trk.pos += 4;
    }
    Ok(())
}

fn xcmd(trk: &mut Track, env: &mut Env<'_>) -> Result<(), RomError> {
    let rom = env.rom;
    match read_arg(rom, trk)? {
        // XXX and XEND
        0 | 3 => play_fine(trk, env.channels),
        // XWAVE, XSOFF
        1 | 13 => trk.pos += 4,
        // XTYPE, XATTA, XDECA, XSUST, XRELA, XLENG, XSWEE
        2 | 4 | 5 | 6 | 7 | 10 | 11 => trk.pos += 1,
        8 => trk.pseudo_echo_vol = read_arg(rom, trk)?,
        9 => trk.pseudo_echo_len = read_arg(rom, trk)?,
        // XWAIT
        12 => {
            trk.delay = rom.read_u16(trk.pos)?;
            trk.pos += 2;
        }
        sub => {
            debug!(track = ?trk.id, sub, "unsupported extended command");
            play_fine(trk, env.channels);
        }
    }
    Ok(())
}
