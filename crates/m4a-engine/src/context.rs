//! The engine as a whole: cartridge, players, channels and mixer, driven
//! through the m4a library's entry points.

use alloc::vec::Vec;

use m4a_ir::{
    meter_level, AgbplaySoundMode, Mp2kSoundMode, PlayerInfo, PlayerVisualizerState, Rom,
    RomError, SongInfo, SongTableInfo, StereoSample, TrackVisualizerState, VisualizerState,
    AGB_FPS, MAX_PLAYERS, MEMACC_AREA_SIZE, STREAM_SAMPLERATE,
};
use tracing::{debug, warn};

use crate::channel::{ChannelKind, ChannelPool};
use crate::loudness::{Loudness, METER_LOWPASS_FREQ};
use crate::mixer::Mixer;
use crate::player::Player;
use crate::sequencer::{Env, Sequencer};

pub struct Context {
    rom: Rom,
    mp2k_mode: Mp2kSoundMode,
    agbplay_mode: AgbplaySoundMode,
    song_table: SongTableInfo,
    players: Vec<Player>,
    sequencer: Sequencer,
    mixer: Mixer,
    channels: ChannelPool,
    memacc: [u8; MEMACC_AREA_SIZE],
    master_buffer: Vec<StereoSample>,
    master_loudness: Loudness,
    primary_player: usize,
}

impl Context {
    pub fn new(
        rom: Rom,
        mp2k_mode: Mp2kSoundMode,
        agbplay_mode: AgbplaySoundMode,
        song_table: SongTableInfo,
        player_table: &[PlayerInfo],
    ) -> Self {
        Self::with_sample_rate(rom, mp2k_mode, agbplay_mode, song_table, player_table, STREAM_SAMPLERATE)
    }

    pub fn with_sample_rate(
        rom: Rom,
        mp2k_mode: Mp2kSoundMode,
        agbplay_mode: AgbplaySoundMode,
        song_table: SongTableInfo,
        player_table: &[PlayerInfo],
        sample_rate: u32,
    ) -> Self {
        if player_table.len() > MAX_PLAYERS {
            warn!(players = player_table.len(), "player table truncated to {MAX_PLAYERS}");
        }

        let mixer = Mixer::new(sample_rate, 1.0);
        let reverb = mixer.make_reverb(&agbplay_mode, mp2k_mode.rev);
        let players = player_table
            .iter()
            .take(MAX_PLAYERS)
            .enumerate()
            .map(|(i, info)| Player::new(info, i as u8, &reverb, sample_rate))
            .collect();

        let mut ctx = Self {
            rom,
            mp2k_mode,
            agbplay_mode,
            song_table,
            players,
            sequencer: Sequencer::new(),
            mixer,
            channels: ChannelPool::new(),
            memacc: [0; MEMACC_AREA_SIZE],
            master_buffer: Vec::new(),
            master_loudness: Loudness::new(METER_LOWPASS_FREQ, sample_rate),
            primary_player: 0,
        };
        ctx.mixer.update_fixed_mode_rate(&mut ctx.players, &ctx.mp2k_mode, &ctx.agbplay_mode);
        ctx.mixer.update_reverb(&mut ctx.players, ctx.mp2k_mode.rev);
        ctx
    }

    /// Run one render tick: sequence, then mix into the master buffer.
    pub fn sound_main(&mut self) {
        let mut env = Env {
            rom: &self.rom,
            channels: &mut self.channels,
            mixer: &mut self.mixer,
            memacc: &mut self.memacc,
            mode: &self.agbplay_mode,
        };
        self.sequencer.process(&mut self.players, &mut env);
        self.mixer
            .process(&mut self.players, &mut self.channels, &mut self.master_buffer, &self.mp2k_mode);
    }

    /// Apply an m4a sound mode word. Zero fields keep their current value.
    pub fn sound_mode(&mut self, mode: u32) {
        let reverb = (mode & 0xFF) as u8;
        if reverb & 0x80 != 0 {
            self.mp2k_mode.rev = reverb;
            self.mixer.update_reverb(&mut self.players, reverb);
        }

        // bits 8..12 select the channel count, which is unbounded here

        let vol = ((mode >> 12) & 0xF) as u8;
        if vol != 0 {
            self.mp2k_mode.vol = vol;
        }

        let freq = ((mode >> 16) & 0xF) as u8;
        if freq != 0 {
            self.mp2k_mode.freq = freq;
            self.mixer.update_fixed_mode_rate(&mut self.players, &self.mp2k_mode, &self.agbplay_mode);
        }

        let dac = ((mode >> 20) & 0xF) as u8;
        if dac != 0 {
            self.mp2k_mode.dac_config = dac;
        }
    }

    pub fn sound_mode_reverb(&mut self, reverb: u8) {
        if reverb & 0x80 != 0 {
            self.mp2k_mode.rev = reverb;
            self.mixer.update_reverb(&mut self.players, reverb);
        }
    }

    /// Song header position and player of table entry `song_id`.
    fn song_entry(&self, song_id: u16) -> Result<(usize, usize), RomError> {
        let table_pos = self.song_table.pos + usize::from(song_id) * 8;
        let song_pos = if self.rom.read_u32(table_pos)? != 0 {
            self.rom.read_agb_ptr(table_pos)?
        } else {
            0
        };
        let player = usize::from(self.rom.read_u8(table_pos + 4)?);
        Ok((song_pos, player))
    }

    /// Resolve a table entry for one of the `song_num_*` calls. Out of range
    /// ids start silence on player 0.
    fn checked_entry(&mut self, song_id: u16) -> Option<(usize, usize)> {
        if song_id >= self.song_table.count {
            warn!(song_id, count = self.song_table.count, "song id out of range");
            self.mplay_start(0, 0);
            return None;
        }
        match self.song_entry(song_id) {
            Ok((song_pos, player)) if player < self.players.len() => {
                self.primary_player = player;
                Some((song_pos, player))
            }
            Ok((_, player)) => {
                warn!(song_id, player, "song table names a missing player");
                None
            }
            Err(err) => {
                warn!(song_id, %err, "song table entry unreadable");
                None
            }
        }
    }

    pub fn song_num_start(&mut self, song_id: u16) {
        if let Some((song_pos, player)) = self.checked_entry(song_id) {
            debug!(song_id, player, pos = format_args!("{song_pos:#08x}"), "song start");
            self.mplay_start(player, song_pos);
        }
    }

    /// Start the song unless it is already running on its player.
    pub fn song_num_start_or_change(&mut self, song_id: u16) {
        if let Some((song_pos, idx)) = self.checked_entry(song_id) {
            let player = &self.players[idx];
            // the running song is recognised by its sound bank position
            if song_pos != player.bank_pos || player.finished || !player.playing {
                self.mplay_start(idx, song_pos);
            }
        }
    }

    /// Start the song, or resume it if it is merely paused.
    pub fn song_num_start_or_continue(&mut self, song_id: u16) {
        if let Some((song_pos, idx)) = self.checked_entry(song_id) {
            let player = &self.players[idx];
            if song_pos != player.song_header_pos || player.finished {
                self.mplay_start(idx, song_pos);
            } else if !player.playing {
                self.mplay_continue(idx);
            }
        }
    }

    pub fn song_num_stop(&mut self, song_id: u16) {
        if song_id >= self.song_table.count {
            warn!(song_id, count = self.song_table.count, "cannot stop song out of range");
            return;
        }
        match self.song_entry(song_id) {
            Ok((_, player)) => self.mplay_stop(player),
            Err(err) => warn!(song_id, %err, "song table entry unreadable"),
        }
    }

    pub fn mplay_start(&mut self, player_idx: usize, song_pos: usize) {
        let Some(player) = self.players.get_mut(player_idx) else {
            warn!(player = player_idx, "no such player");
            return;
        };

        if player.use_priority && player.song_header_pos != 0 && song_pos != 0 && player.playing {
            match self.rom.read_u8(song_pos + 2) {
                Ok(priority) if player.priority > priority => return,
                Ok(_) => {}
                Err(err) => {
                    warn!(%err, "song header unreadable");
                    return;
                }
            }
        }

        for trk in player.tracks.iter_mut() {
            trk.stop(&mut self.channels);
        }
        player.init(&self.rom, song_pos);
        let reverb = player.reverb;

        self.sequencer.restart();
        self.mixer.reset_fade();
        if reverb & 0x80 != 0 {
            self.sound_mode_reverb(reverb);
        }
    }

    pub fn mplay_stop(&mut self, player_idx: usize) {
        let Some(player) = self.players.get_mut(player_idx) else {
            warn!(player = player_idx, "no such player");
            return;
        };
        player.playing = false;
        for trk in player.tracks.iter_mut() {
            trk.stop(&mut self.channels);
        }
    }

    pub fn mplay_all_stop(&mut self) {
        for idx in 0..self.players.len() {
            self.mplay_stop(idx);
        }
    }

    pub fn mplay_continue(&mut self, player_idx: usize) {
        if let Some(player) = self.players.get_mut(player_idx) {
            player.playing = true;
        }
    }

    pub fn mplay_is_playing(&self, player_idx: usize) -> bool {
        self.players.get(player_idx).is_some_and(|p| p.playing)
    }

    /// Drop every channel.
    pub fn sound_clear(&mut self) {
        self.channels.clear();
    }

    /// The song has stopped or looped out and its fade has finished.
    pub fn has_ended(&self) -> bool {
        self.sequencer.end_reached() && self.mixer.is_fade_done()
    }

    pub fn set_speed_factor(&mut self, speed_factor: f32) {
        self.sequencer.set_speed_factor(speed_factor);
    }

    pub fn speed_factor(&self) -> f32 {
        self.sequencer.speed_factor()
    }

    /// Mute or unmute a track of the primary player.
    pub fn set_track_muted(&mut self, track: usize, muted: bool) {
        if let Some(trk) = self
            .players
            .get_mut(self.primary_player)
            .and_then(|p| p.tracks.get_mut(track))
        {
            trk.muted = muted;
        }
    }

    pub fn is_track_muted(&self, track: usize) -> bool {
        self.players
            .get(self.primary_player)
            .and_then(|p| p.tracks.get(track))
            .is_some_and(|t| t.muted)
    }

    pub fn song_info(&self) -> SongInfo {
        match self.players.get(self.primary_player) {
            Some(player) => SongInfo {
                song_header_pos: player.song_header_pos,
                voice_table_pos: player.bank_pos,
                reverb: player.reverb,
                priority: player.priority,
                player_idx: player.index,
            },
            None => SongInfo::default(),
        }
    }

    /// Build a snapshot for display. Advances the loudness meters.
    pub fn visualizer_state(&mut self) -> VisualizerState {
        let bpm_factor = self.sequencer.speed_factor();
        let players = self
            .players
            .iter_mut()
            .map(|player| {
                let tracks = player
                    .tracks
                    .iter_mut()
                    .map(|trk| {
                        trk.loudness.process(&trk.audio_buffer);
                        let (left, right) = trk.loudness.level();
                        TrackVisualizerState {
                            track_ptr: trk.pos,
                            env_l_float: left,
                            env_r_float: right,
                            is_calling: trk.pattern_level() > 0,
                            is_muted: trk.muted,
                            vol: trk.vol,
                            modulation: trk.mod_depth,
                            prog: trk.prog,
                            pan: trk.pan,
                            pitch: trk.pitch,
                            env_l: meter_level(left),
                            env_r: meter_level(right),
                            delay: trk.delay,
                            active_notes: trk.active_notes,
                            active_voice_types: trk.active_voice_types,
                        }
                    })
                    .collect();
                PlayerVisualizerState {
                    tracks,
                    tracks_used: usize::from(player.tracks_used),
                    bpm: player.bpm,
                    bpm_factor,
                    time: (player.frame_count / u64::from(AGB_FPS)) as f32,
                }
            })
            .collect();

        self.master_loudness.process(&self.master_buffer);
        let (master_vol_left, master_vol_right) = self.master_loudness.level();

        VisualizerState {
            players,
            master_vol_left,
            master_vol_right,
            active_channels: self.channels.ids(ChannelKind::Pcm).len(),
            primary_player: self.primary_player,
        }
    }

    pub fn rom(&self) -> &Rom {
        &self.rom
    }

    pub fn mp2k_sound_mode(&self) -> &Mp2kSoundMode {
        &self.mp2k_mode
    }

    pub fn agbplay_sound_mode(&self) -> &AgbplaySoundMode {
        &self.agbplay_mode
    }

    pub fn song_table(&self) -> &SongTableInfo {
        &self.song_table
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn primary_player(&self) -> usize {
        self.primary_player
    }

    pub fn channels(&self) -> &ChannelPool {
        &self.channels
    }

    /// Output of the last tick.
    pub fn master_buffer(&self) -> &[StereoSample] {
        &self.master_buffer
    }

    pub fn sample_rate(&self) -> u32 {
        self.mixer.sample_rate()
    }

    pub fn samples_per_buffer(&self) -> usize {
        self.mixer.samples_per_buffer()
    }

    pub fn memacc(&self) -> &[u8; MEMACC_AREA_SIZE] {
        &self.memacc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use m4a_ir::AGB_MAP_ROM;

    const TABLE: usize = 0x100;

    fn put_ptr(bytes: &mut [u8], at: usize, pos: u32) {
        bytes[at..at + 4].copy_from_slice(&(AGB_MAP_ROM + pos).to_le_bytes());
    }

    /// Two songs on player 0: song 0 waits forever, song 1 ends at once.
    fn context() -> Context {
        let mut bytes = vec![0u8; 0x400];
        // song headers at 0x200 and 0x240
        for (i, (header, track)) in [(0x200usize, 0x300u32), (0x240, 0x320)].into_iter().enumerate() {
            put_ptr(&mut bytes, TABLE + i * 8, header as u32);
            bytes[header] = 1;
            bytes[header + 2] = 10 + i as u8;
            put_ptr(&mut bytes, header + 8, track);
        }
        // song 0: wait 96, goto self
        bytes[0x300] = 0xB0;
        bytes[0x301] = 0xB2;
        put_ptr(&mut bytes, 0x302, 0x300);
        bytes[0x320] = 0xB1;

        let song_table = SongTableInfo { pos: TABLE, count: 2, table_idx: 0 };
        Context::new(
            Rom::from_vec(bytes),
            Mp2kSoundMode::default().resolved(),
            AgbplaySoundMode::default(),
            song_table,
            &[PlayerInfo::default(), PlayerInfo::default()],
        )
    }

    #[test]
    fn song_start_reads_table() {
        let mut ctx = context();
        ctx.song_num_start(0);
        let info = ctx.song_info();
        assert_eq!(info.song_header_pos, 0x200);
        assert_eq!(info.priority, 10);
        assert!(ctx.mplay_is_playing(0));
        ctx.sound_main();
        assert_eq!(ctx.master_buffer().len(), ctx.samples_per_buffer());
        assert!(!ctx.has_ended());
    }

    #[test]
    fn out_of_range_song_plays_nothing() {
        let mut ctx = context();
        ctx.song_num_start(0);
        ctx.song_num_start(7);
        assert!(!ctx.mplay_is_playing(0));
        assert_eq!(ctx.song_info().song_header_pos, 0);
    }

    #[test]
    fn finished_song_ends_after_fade() {
        let mut ctx = context();
        ctx.song_num_start(1);
        let mut ticks = 0;
        while !ctx.has_ended() {
            ctx.sound_main();
            ticks += 1;
            assert!(ticks < 1000);
        }
        assert!(ticks > 200);
    }

    #[test]
    fn stop_and_continue() {
        let mut ctx = context();
        ctx.song_num_start(0);
        ctx.song_num_stop(0);
        assert!(!ctx.mplay_is_playing(0));
        ctx.song_num_start_or_continue(0);
        assert!(ctx.mplay_is_playing(0));
        assert_eq!(ctx.song_info().song_header_pos, 0x200);
    }

    #[test]
    fn priority_keeps_current_song() {
        let mut ctx = context();
        for player in &mut ctx.players {
            player.use_priority = true;
        }
        ctx.song_num_start(1);
        ctx.mplay_start(0, 0x200);
        // song 1 has priority 11, song 0 only 10
        assert_eq!(ctx.song_info().song_header_pos, 0x240);
    }

    #[test]
    fn sound_mode_word() {
        let mut ctx = context();
        ctx.sound_mode(0x0093_A0C0);
        let mode = ctx.mp2k_sound_mode();
        assert_eq!(mode.rev, 0xC0);
        assert_eq!(mode.vol, 0xA);
        assert_eq!(mode.freq, 3);
        assert_eq!(mode.dac_config, 9);
        assert_eq!(ctx.mixer.fixed_mode_rate(), 10512);

        ctx.sound_mode(0x0000_0040);
        assert_eq!(ctx.mp2k_sound_mode().rev, 0xC0);
    }

    #[test]
    fn visualizer_snapshot() {
        let mut ctx = context();
        ctx.song_num_start(0);
        ctx.set_track_muted(0, true);
        for _ in 0..4 {
            ctx.sound_main();
        }
        let state = ctx.visualizer_state();
        assert_eq!(state.players.len(), 2);
        let player = &state.players[0];
        assert_eq!(player.tracks_used, 1);
        assert_eq!(player.bpm, 150);
        let trk = &player.tracks[0];
        assert!(trk.is_muted);
        assert_eq!(trk.track_ptr, 0x301);
        assert_eq!(trk.delay, 95);
        assert_eq!(state.active_channels, 0);
        assert!(ctx.is_track_muted(0));
    }

    #[test]
    fn sound_clear_drops_channels() {
        let mut ctx = context();
        ctx.sound_clear();
        assert!(ctx.channels().is_empty());
    }
}
