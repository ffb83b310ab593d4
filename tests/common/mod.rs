//! Synthetic cartridge images for integration tests.
//!
//! Layout of every image built here:
//! - song table at `TABLE`
//! - song headers at `HEADERS`, 0x40 bytes apart
//! - one voice group at `BANK`: 0 = looped PCM saw, 1 = square 50%,
//!   2 = noise, 3 = PCM saw with slow release
//! - the saw sample at `SAMPLE`
//! - track data from `DATA` on, placed by the caller

#![allow(dead_code)]

use m4a_engine::Context;
use m4a_ir::{AgbplaySoundMode, Mp2kSoundMode, PlayerInfo, Rom, SongTableInfo, AGB_MAP_ROM};

pub const TABLE: usize = 0x100;
pub const HEADERS: usize = 0x200;
pub const BANK: usize = 0x800;
pub const SAMPLE: usize = 0xC00;
pub const DATA: usize = 0x2000;
const SAMPLE_LEN: usize = 0x400;
const IMAGE_SIZE: usize = 0x8000;

pub const PROG_SAW: u8 = 0;
pub const PROG_SQUARE: u8 = 1;
pub const PROG_NOISE: u8 = 2;
pub const PROG_SAW_SLOW: u8 = 3;

/// Commands used by the tests.
pub mod op {
    pub const FINE: u8 = 0xB1;
    pub const GOTO: u8 = 0xB2;
    pub const PATT: u8 = 0xB3;
    pub const PEND: u8 = 0xB4;
    pub const TEMPO: u8 = 0xBB;
    pub const VOICE: u8 = 0xBD;
    pub const VOL: u8 = 0xBE;
    pub const PAN: u8 = 0xBF;
    pub const EOT: u8 = 0xCE;
    pub const TIE: u8 = 0xCF;
    pub const W1: u8 = 0x81;
    pub const W48: u8 = 0xA0;
    pub const W96: u8 = 0xB0;
    pub const N24: u8 = 0xE7;
    pub const N60: u8 = 0xF3;
}

pub struct RomBuilder {
    bytes: Vec<u8>,
    songs: u16,
}

impl RomBuilder {
    pub fn new() -> Self {
        let mut b = Self { bytes: vec![0; IMAGE_SIZE], songs: 0 };
        b.voices();
        b
    }

    fn voices(&mut self) {
        let v = BANK;
        // 0: PCM saw, instant attack, full sustain, fast release
        self.ptr(v + 4, SAMPLE);
        self.put(v + 8, &[0xFF, 0, 0xFF, 0]);
        // 1: square 1, duty 50%
        self.put(v + 12, &[0x01, 60, 0, 0]);
        self.put(v + 16, &[2, 0, 0, 0]);
        self.put(v + 20, &[0, 0, 15, 0]);
        // 2: noise, long period
        self.put(v + 24, &[0x04, 60, 0, 0]);
        self.put(v + 28, &[0, 0, 0, 0]);
        self.put(v + 32, &[0, 0, 15, 0]);
        // 3: PCM saw, slow release
        self.ptr(v + 40, SAMPLE);
        self.put(v + 44, &[0xFF, 0, 0xFF, 0xF0]);

        self.bytes[SAMPLE + 3] = 0x40;
        self.put(SAMPLE + 4, &(8363u32 * 1024).to_le_bytes());
        self.put(SAMPLE + 12, &(SAMPLE_LEN as u32).to_le_bytes());
        for i in 0..SAMPLE_LEN {
            self.bytes[SAMPLE + 16 + i] = ((i % 64) as u8 * 4).wrapping_sub(128);
        }
    }

    pub fn put(&mut self, at: usize, data: &[u8]) {
        self.bytes[at..at + data.len()].copy_from_slice(data);
    }

    pub fn ptr(&mut self, at: usize, pos: usize) {
        self.put(at, &(AGB_MAP_ROM + pos as u32).to_le_bytes());
    }

    /// Add a song on `player` whose tracks start at the given positions.
    /// Returns the song id.
    pub fn song(&mut self, player: u8, priority: u8, tracks: &[usize]) -> u16 {
        let id = self.songs;
        let header = HEADERS + usize::from(id) * 0x40;
        let entry = TABLE + usize::from(id) * 8;
        self.ptr(entry, header);
        self.bytes[entry + 4] = player;
        self.bytes[entry + 6] = player;

        self.bytes[header] = tracks.len() as u8;
        self.bytes[header + 2] = priority;
        self.ptr(header + 4, BANK);
        for (i, &pos) in tracks.iter().enumerate() {
            self.ptr(header + 8 + 4 * i, pos);
        }
        self.songs += 1;
        id
    }

    pub fn song_count(&self) -> u16 {
        self.songs
    }

    pub fn build(self) -> Rom {
        Rom::from_vec(self.bytes)
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Track data being written at a fixed position.
pub struct Seq {
    start: usize,
    data: Vec<u8>,
}

impl Seq {
    pub fn at(start: usize) -> Self {
        Self { start, data: Vec::new() }
    }

    pub fn pos(&self) -> usize {
        self.start + self.data.len()
    }

    pub fn bytes(mut self, bytes: &[u8]) -> Self {
        self.data.extend_from_slice(bytes);
        self
    }

    /// A command followed by a cartridge pointer to `target`.
    pub fn jump(mut self, cmd: u8, target: usize) -> Self {
        self.data.push(cmd);
        self.data.extend_from_slice(&(AGB_MAP_ROM + target as u32).to_le_bytes());
        self
    }

    pub fn write(self, rom: &mut RomBuilder) -> usize {
        rom.put(self.start, &self.data);
        self.start
    }
}

pub fn context(rom: Rom, songs: u16, players: usize, agbplay: AgbplaySoundMode) -> Context {
    Context::new(
        rom,
        Mp2kSoundMode::default().resolved(),
        agbplay,
        SongTableInfo { pos: TABLE, count: songs, table_idx: 0 },
        &vec![PlayerInfo::default(); players],
    )
}

/// Run the engine until player `player` has stepped `n` more ticks.
pub fn run_ticks(ctx: &mut Context, player: usize, n: u64) {
    let target = ctx.players()[player].tick_count + n;
    let mut guard = 0;
    while ctx.players()[player].tick_count < target {
        ctx.sound_main();
        guard += 1;
        assert!(guard < 100_000, "player {player} stopped ticking");
    }
}

/// Render `buffers` ticks of audio.
pub fn render(ctx: &mut Context, buffers: usize) -> Vec<m4a_ir::StereoSample> {
    let mut out = Vec::with_capacity(buffers * ctx.samples_per_buffer());
    for _ in 0..buffers {
        ctx.sound_main();
        out.extend_from_slice(ctx.master_buffer());
    }
    out
}
