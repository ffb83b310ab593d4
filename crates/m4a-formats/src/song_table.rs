//! Song and player tables at caller-supplied positions.

use m4a_ir::{PlayerInfo, Rom, RomError, SongTableInfo, MAX_PLAYERS};
use tracing::debug;

use crate::FormatError;

const ENTRY_SIZE: usize = 8;
const PLAYER_ENTRY_SIZE: usize = 12;

/// One row of the song table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SongEntry {
    /// ROM offset of the song header, 0 for an empty slot.
    pub song_pos: usize,
    pub player: u8,
}

/// Read `count` entries of the table at `pos`. Entries whose pointer is
/// invalid read as empty slots.
pub fn read_song_table(rom: &Rom, pos: usize, count: u16) -> Result<Vec<SongEntry>, FormatError> {
    (0..usize::from(count))
        .map(|i| {
            let at = pos + i * ENTRY_SIZE;
            let song_pos = rom.read_agb_ptr(at).unwrap_or(0);
            Ok(SongEntry { song_pos, player: rom.read_u8(at + 4)? })
        })
        .collect()
}

/// Fill in an automatic song count by counting the well-formed entries at
/// the start of the table.
pub fn resolve_song_count(rom: &Rom, info: &mut SongTableInfo) -> Result<(), FormatError> {
    if info.count != SongTableInfo::COUNT_AUTO {
        return Ok(());
    }
    let mut count = 0u16;
    // COUNT_AUTO itself can never be a real count
    while count < SongTableInfo::COUNT_AUTO - 1
        && is_valid_entry(rom, info.pos + usize::from(count) * ENTRY_SIZE)
    {
        count += 1;
    }
    if count == 0 {
        return Err(FormatError::EmptySongTable { pos: info.pos });
    }
    debug!(pos = format_args!("{:#x}", info.pos), count, "song count resolved");
    info.count = count;
    Ok(())
}

/// Read `count` player table entries: max tracks and the priority flag.
pub fn read_player_table(rom: &Rom, pos: usize, count: usize) -> Result<Vec<PlayerInfo>, FormatError> {
    (0..count.min(MAX_PLAYERS))
        .map(|i| {
            let at = pos + i * PLAYER_ENTRY_SIZE;
            Ok(PlayerInfo {
                max_tracks: rom.read_u8(at + 8)?,
                use_priority: rom.read_u8(at + 10)? != 0,
            })
        })
        .collect()
}

fn is_valid_entry(rom: &Rom, pos: usize) -> bool {
    check_entry(rom, pos).unwrap_or(false)
}

fn check_entry(rom: &Rom, pos: usize) -> Result<bool, RomError> {
    if !rom.valid_range(pos, ENTRY_SIZE) || !rom.valid_pointer(rom.read_u32(pos)?) {
        return Ok(false);
    }
    let [p1, z1, p2, z2] = [0, 1, 2, 3].map(|i| rom.read_u8(pos + 4 + i).unwrap_or(0xFF));
    if z1 != 0 || z2 != 0 || p1 != p2 {
        return Ok(false);
    }

    let song = rom.read_agb_ptr(pos)?;
    let header = rom.slice(song, 4)?;
    // blank songs have an all-zero header
    if header.iter().all(|&b| b == 0) {
        return Ok(true);
    }
    if !rom.valid_pointer(rom.read_u32(song + 4)?) {
        return Ok(false);
    }
    for trk in 0..usize::from(header[0]) {
        if !rom.valid_pointer(rom.read_u32(song + 8 + trk * 4)?) {
            return Ok(false);
        }
    }
    Ok(true)
}
