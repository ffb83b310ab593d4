//! Per-game playback profiles stored as TOML.
//!
//! A profile names where the game keeps its song table, how its players
//! are configured and which sound mode it runs the engine in. Every field
//! may be omitted; omitted sound mode fields stay "auto" until
//! [`Profile::resolve`] fills them in for playback.

use std::path::{Path, PathBuf};

use m4a_engine::Context;
use m4a_formats::{read_song_table, resolve_song_count, FormatError};
use m4a_ir::{AgbplaySoundMode, Mp2kSoundMode, PlayerInfo, Rom, SongTableInfo, MAX_PLAYERS};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("cannot read profile {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid profile: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("cannot serialize profile: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("profile has no song table position")]
    MissingSongTable,
    #[error(transparent)]
    Format(#[from] FormatError),
}

/// A named song in the profile's playlist.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaylistEntry {
    pub name: String,
    pub id: u16,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub name: String,
    pub author: String,
    pub description: String,
    /// Four-letter codes of the games this profile applies to.
    pub game_codes: Vec<String>,
    pub playlist: Vec<PlaylistEntry>,
    pub song_table: SongTableInfo,
    /// Empty means one default player per player index the song table uses.
    pub player_table: Vec<PlayerInfo>,
    pub mp2k_sound_mode: Mp2kSoundMode,
    pub agbplay_sound_mode: AgbplaySoundMode,
}

impl Profile {
    pub fn from_toml_str(s: &str) -> Result<Self, ProfileError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ProfileError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|source| ProfileError::Io { path: path.to_path_buf(), source })?;
        let profile = Self::from_toml_str(&text)?;
        debug!(path = %path.display(), name = %profile.name, "profile loaded");
        Ok(profile)
    }

    pub fn to_toml_string(&self) -> Result<String, ProfileError> {
        Ok(toml::to_string(self)?)
    }

    pub fn matches_game(&self, game_code: &str) -> bool {
        self.game_codes.iter().any(|c| c.eq_ignore_ascii_case(game_code))
    }

    /// Copy of the profile with every "auto" value replaced by what
    /// playback of `rom` will use.
    pub fn resolve(&self, rom: &Rom) -> Result<Self, ProfileError> {
        if self.song_table.pos == SongTableInfo::POS_AUTO {
            return Err(ProfileError::MissingSongTable);
        }

        let mut resolved = self.clone();
        resolved.mp2k_sound_mode.resolve_auto();
        resolve_song_count(rom, &mut resolved.song_table)?;

        if resolved.player_table.is_empty() {
            let entries = read_song_table(rom, resolved.song_table.pos, resolved.song_table.count)?;
            let num_players = entries
                .iter()
                .map(|e| usize::from(e.player) + 1)
                .max()
                .unwrap_or(1)
                .min(MAX_PLAYERS);
            resolved.player_table = vec![PlayerInfo::default(); num_players];
        }
        Ok(resolved)
    }

    /// Engine context for playback at `sample_rate`. Call on a resolved
    /// profile.
    pub fn build_context(&self, rom: Rom, sample_rate: u32) -> Context {
        Context::with_sample_rate(
            rom,
            self.mp2k_sound_mode,
            self.agbplay_sound_mode,
            self.song_table,
            &self.player_table,
            sample_rate,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use m4a_ir::{ReverbType, AGB_MAP_ROM};

    const EXAMPLE: &str = r#"
name = "Test Game"
game_codes = ["ATSE", "ATSP"]

[song_table]
pos = 0x100
count = 2

[[player_table]]
max_tracks = 10
use_priority = true

[[playlist]]
name = "Title"
id = 1

[mp2k_sound_mode]
vol = 12
rev = 0x90

[agbplay_sound_mode]
reverb_type = "gs1"
max_loops = 2
"#;

    #[test]
    fn parses_with_defaults() {
        let p = Profile::from_toml_str(EXAMPLE).unwrap();
        assert_eq!(p.name, "Test Game");
        assert_eq!(p.song_table.pos, 0x100);
        assert_eq!(p.song_table.count, 2);
        assert_eq!(p.player_table, vec![PlayerInfo { max_tracks: 10, use_priority: true }]);
        assert_eq!(p.playlist[0], PlaylistEntry { name: "Title".into(), id: 1 });
        assert_eq!(p.mp2k_sound_mode.vol, 12);
        assert_eq!(p.mp2k_sound_mode.freq, Mp2kSoundMode::FREQ_AUTO);
        assert_eq!(p.agbplay_sound_mode.reverb_type, ReverbType::Gs1);
        assert_eq!(p.agbplay_sound_mode.max_loops, 2);
        assert_eq!(p.agbplay_sound_mode.dma_buffer_len, 0x630);
        assert!(p.matches_game("atsp"));
        assert!(!p.matches_game("BPEE"));
    }

    #[test]
    fn empty_profile_is_default() {
        assert_eq!(Profile::from_toml_str("").unwrap(), Profile::default());
    }

    #[test]
    fn bad_toml_is_a_parse_error() {
        let err = Profile::from_toml_str("song_table = 3").unwrap_err();
        assert!(matches!(err, ProfileError::Parse(_)));
    }

    #[test]
    fn toml_round_trip() {
        let p = Profile::from_toml_str(EXAMPLE).unwrap();
        let text = p.to_toml_string().unwrap();
        assert_eq!(Profile::from_toml_str(&text).unwrap(), p);
    }

    fn rom() -> Rom {
        let mut data = vec![0u8; 0x400];
        // two blank songs, on players 0 and 2
        for (i, player) in [0u8, 2].into_iter().enumerate() {
            let entry = 0x100 + i * 8;
            data[entry..entry + 4].copy_from_slice(&(AGB_MAP_ROM + 0x200).to_le_bytes());
            data[entry + 4] = player;
            data[entry + 6] = player;
        }
        Rom::from_vec(data)
    }

    #[test]
    fn resolve_fills_auto_values() {
        let profile = Profile {
            song_table: SongTableInfo { pos: 0x100, ..SongTableInfo::default() },
            ..Profile::default()
        };
        let resolved = profile.resolve(&rom()).unwrap();
        assert_eq!(resolved.song_table.count, 2);
        assert_eq!(resolved.player_table.len(), 3);
        assert_eq!(resolved.mp2k_sound_mode, Mp2kSoundMode::default().resolved());

        let ctx = resolved.build_context(rom(), 48000);
        assert_eq!(ctx.players().len(), 3);
    }

    #[test]
    fn resolve_needs_a_table() {
        assert!(matches!(Profile::default().resolve(&rom()), Err(ProfileError::MissingSongTable)));
    }
}
