//! Engine timing and layout constants.

/// Sub-divisions of one 60 Hz frame used for envelope and volume ramps.
pub const INTERFRAMES: u32 = 4;
/// Native frame rate of the handheld.
pub const AGB_FPS: u32 = 60;
/// Tempo accumulator threshold per interframe tick.
pub const BPM_PER_FRAME: u32 = 150;
/// Number of distinct MIDI keys.
pub const NUM_NOTES: usize = 128;
/// Program number of a track that has not selected an instrument yet.
pub const PROG_UNDEFINED: u8 = 0xFF;
/// Upper bound on tracks per player.
pub const MAX_TRACKS: usize = 16;
/// Upper bound on players in one context.
pub const MAX_PLAYERS: usize = 32;
/// Depth of the pattern call stack.
pub const TRACK_CALL_STACK_SIZE: usize = 3;
/// Default host output rate.
pub const STREAM_SAMPLERATE: u32 = 48_000;
/// Fade applied when the loop limit is reached.
pub const SONG_FADE_OUT_TIME: u32 = 10_000;
/// Fade applied when every track has hit end-of-track.
pub const SONG_FINISH_TIME: u32 = 1_000;
/// Base address of the cartridge in the handheld's memory map.
pub const AGB_MAP_ROM: u32 = 0x0800_0000;
/// Size of the scratch memory operated on by the MEMACC opcode.
pub const MEMACC_AREA_SIZE: usize = 256;
/// Size of one instrument record in a sound bank.
pub const INSTRUMENT_SIZE: u32 = 12;
/// Size of a PCM sample header.
pub const SAMPLE_HEADER_SIZE: u32 = 16;
/// `max_loops` value meaning "loop forever".
pub const LOOP_ENDLESS: i8 = -1;

/// Number of output samples produced per render tick.
pub const fn samples_per_buffer(sample_rate: u32) -> usize {
    (sample_rate / (AGB_FPS * INTERFRAMES)) as usize
}

/// Instrument type bits in a bank record.
pub mod bank_type {
    pub const PCM: u8 = 0x00;
    pub const SQ1: u8 = 0x01;
    pub const SQ2: u8 = 0x02;
    pub const WAVE: u8 = 0x03;
    pub const NOISE: u8 = 0x04;
    pub const CGB: u8 = 0x07;
    pub const FIX: u8 = 0x08;
    pub const SPLIT: u8 = 0x40;
    pub const RHYTHM: u8 = 0x80;
}
