//! Voice type flags reported to the visualizer.

use bitflags::bitflags;

bitflags! {
    /// Synthesis path(s) a channel or track is currently using.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct VoiceFlags: u32 {
        const PCM = 0x1;
        const DPCM_GAMEFREAK = 0x2;
        const ADPCM_CAMELOT = 0x4;
        const SYNTH_PWM = 0x8;
        const SYNTH_SAW = 0x10;
        const SYNTH_TRI = 0x20;
        const PSG_SQ_12 = 0x40;
        const PSG_SQ_25 = 0x80;
        const PSG_SQ_50 = 0x100;
        const PSG_SQ_75 = 0x200;
        const PSG_SQ_12_SWEEP = 0x400;
        const PSG_SQ_25_SWEEP = 0x800;
        const PSG_SQ_50_SWEEP = 0x1000;
        const PSG_SQ_75_SWEEP = 0x2000;
        const PSG_WAVE = 0x4000;
        const PSG_NOISE_7 = 0x8000;
        const PSG_NOISE_15 = 0x10000;

        const ANY_PCM = Self::PCM.bits() | Self::DPCM_GAMEFREAK.bits() | Self::ADPCM_CAMELOT.bits();
        const ANY_SYNTH = Self::SYNTH_PWM.bits() | Self::SYNTH_SAW.bits() | Self::SYNTH_TRI.bits();
    }
}

impl VoiceFlags {
    /// Square voice flag for a duty cycle index, with or without sweep.
    pub fn square(duty: u32, sweep: bool) -> Self {
        match (duty % 4, sweep) {
            (0, false) => Self::PSG_SQ_12,
            (1, false) => Self::PSG_SQ_25,
            (2, false) => Self::PSG_SQ_50,
            (_, false) => Self::PSG_SQ_75,
            (0, true) => Self::PSG_SQ_12_SWEEP,
            (1, true) => Self::PSG_SQ_25_SWEEP,
            (2, true) => Self::PSG_SQ_50_SWEEP,
            (_, true) => Self::PSG_SQ_75_SWEEP,
        }
    }
}
