//! Cartridge image handling for m4aplay.
//!
//! Loads raw cartridge images from disk, checks their header, and reads
//! song tables at positions supplied by the caller.

mod cartridge;
mod song_table;

pub use cartridge::{load_rom, load_rom_bytes, CartridgeHeader, LoadOptions, AGB_ROM_SIZE, MIN_ROM_SIZE};
pub use song_table::{read_player_table, read_song_table, resolve_song_count, SongEntry};

use m4a_ir::RomError;

/// Error type for cartridge loading.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("cannot read cartridge image: {0}")]
    Io(#[from] std::io::Error),
    #[error("cartridge image too small ({0} bytes)")]
    TooSmall(usize),
    #[error("cartridge image too large ({0} bytes)")]
    TooLarge(usize),
    #[error("ROM verification: bad Nintendo logo")]
    BadLogo,
    #[error("ROM verification: bad header checksum {found:#04x}, expected {expected:#04x}")]
    BadChecksum { found: u8, expected: u8 },
    #[error("song table at {pos:#x} has no valid entries")]
    EmptySongTable { pos: usize },
    #[error(transparent)]
    Rom(#[from] RomError),
}
