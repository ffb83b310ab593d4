//! Sound mode and table configuration records.

use alloc::string::{String, ToString};
use core::fmt;
use core::str::FromStr;

/// Interpolation algorithm used to convert a channel's rate to the output rate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum ResamplerType {
    Nearest,
    Linear,
    Sinc,
    Blep,
    #[default]
    Blamp,
}

/// Reverb post-filter applied per track.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum ReverbType {
    #[default]
    Normal,
    Gs1,
    Gs2,
    Mgat,
    Test,
    None,
}

/// Voice allocation policy for the tone generator channels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum CgbPolyphony {
    #[default]
    MonoStrict,
    MonoSmooth,
    Poly,
}

/// Error returned when a mode name does not parse.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{name}'")]
pub struct ParseModeError {
    kind: &'static str,
    name: String,
}

macro_rules! named_modes {
    ($ty:ty, $kind:literal, { $($name:literal => $variant:expr),+ $(,)? }) => {
        impl FromStr for $ty {
            type Err = ParseModeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_ascii_lowercase().as_str() {
                    $($name => Ok($variant),)+
                    _ => Err(ParseModeError { kind: $kind, name: s.to_string() }),
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let name = match self {
                    $(v if *v == $variant => $name,)+
                    _ => "?",
                };
                f.write_str(name)
            }
        }
    };
}

named_modes!(ResamplerType, "resampler", {
    "nearest" => ResamplerType::Nearest,
    "linear" => ResamplerType::Linear,
    "sinc" => ResamplerType::Sinc,
    "blep" => ResamplerType::Blep,
    "blamp" => ResamplerType::Blamp,
});

named_modes!(ReverbType, "reverb", {
    "normal" => ReverbType::Normal,
    "gs1" => ReverbType::Gs1,
    "gs2" => ReverbType::Gs2,
    "mgat" => ReverbType::Mgat,
    "test" => ReverbType::Test,
    "none" => ReverbType::None,
});

named_modes!(CgbPolyphony, "polyphony", {
    "mono-strict" => CgbPolyphony::MonoStrict,
    "mono-smooth" => CgbPolyphony::MonoSmooth,
    "poly" => CgbPolyphony::Poly,
});

/// The engine's own sound mode as the game would configure it.
///
/// Fields holding their `*_AUTO` value have not been determined yet and
/// are filled in by [`Mp2kSoundMode::resolve_auto`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Mp2kSoundMode {
    /// PCM master volume, 0..=15.
    pub vol: u8,
    /// Reverb byte; bit 7 enables it.
    pub rev: u8,
    /// Index into the fixed mode rate table.
    pub freq: u8,
    pub max_channels: u8,
    pub dac_config: u8,
}

impl Mp2kSoundMode {
    pub const VOL_AUTO: u8 = 0xFF;
    pub const REV_AUTO: u8 = 0x7F;
    pub const FREQ_AUTO: u8 = 0xFF;
    pub const CHN_AUTO: u8 = 0xFF;
    pub const DAC_AUTO: u8 = 0xFF;

    /// Replace every auto field with the engine's power-on default.
    pub fn resolve_auto(&mut self) {
        if self.vol == Self::VOL_AUTO {
            self.vol = 15;
        }
        if self.rev == Self::REV_AUTO {
            self.rev = 0;
        }
        if self.freq == Self::FREQ_AUTO {
            self.freq = 4;
        }
        if self.max_channels == Self::CHN_AUTO {
            self.max_channels = 12;
        }
        if self.dac_config == Self::DAC_AUTO {
            self.dac_config = 9;
        }
    }

    pub fn resolved(mut self) -> Self {
        self.resolve_auto();
        self
    }
}

impl Default for Mp2kSoundMode {
    fn default() -> Self {
        Self {
            vol: Self::VOL_AUTO,
            rev: Self::REV_AUTO,
            freq: Self::FREQ_AUTO,
            max_channels: Self::CHN_AUTO,
            dac_config: Self::DAC_AUTO,
        }
    }
}

/// Host-side rendering options.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct AgbplaySoundMode {
    pub resampler_type_normal: ResamplerType,
    pub resampler_type_fixed: ResamplerType,
    pub reverb_type: ReverbType,
    pub cgb_polyphony: CgbPolyphony,
    pub dma_buffer_len: u32,
    /// Number of loops before fading out; -1 loops forever.
    pub max_loops: i8,
    pub pad_silence_seconds_start: f64,
    pub pad_silence_seconds_end: f64,
    pub accurate_ch3_quantization: bool,
    pub accurate_ch3_volume: bool,
    pub emulate_cgb_sustain_bug: bool,
}

impl Default for AgbplaySoundMode {
    fn default() -> Self {
        Self {
            resampler_type_normal: ResamplerType::Blamp,
            resampler_type_fixed: ResamplerType::Blep,
            reverb_type: ReverbType::Normal,
            cgb_polyphony: CgbPolyphony::MonoStrict,
            dma_buffer_len: 0x630,
            max_loops: 1,
            pad_silence_seconds_start: 0.0,
            pad_silence_seconds_end: 0.0,
            accurate_ch3_quantization: true,
            accurate_ch3_volume: true,
            emulate_cgb_sustain_bug: true,
        }
    }
}

/// Location of the song table inside the cartridge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SongTableInfo {
    /// ROM offset of the table.
    pub pos: usize,
    pub count: u16,
    pub table_idx: u8,
}

impl SongTableInfo {
    pub const POS_AUTO: usize = 0;
    pub const COUNT_AUTO: u16 = 0xFFFF;
}

impl Default for SongTableInfo {
    fn default() -> Self {
        Self { pos: Self::POS_AUTO, count: Self::COUNT_AUTO, table_idx: 0 }
    }
}

/// Per-player limits from the game's player table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PlayerInfo {
    pub max_tracks: u8,
    pub use_priority: bool,
}

impl Default for PlayerInfo {
    fn default() -> Self {
        Self { max_tracks: crate::MAX_TRACKS as u8, use_priority: false }
    }
}

/// Header information about the song currently loaded on the primary player.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SongInfo {
    pub song_header_pos: usize,
    pub voice_table_pos: usize,
    pub reverb: u8,
    pub priority: u8,
    pub player_idx: u8,
}
