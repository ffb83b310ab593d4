//! Sound bank decoding.
//!
//! A bank is a table of 12-byte instrument records indexed by program
//! number. Key-split and rhythm records redirect through a second table
//! by key; the record they resolve to describes a tone generator voice or
//! a PCM sample.

use m4a_ir::{bank_type, Adsr, Rom, RomError, SampleInfo, INSTRUMENT_SIZE, SAMPLE_HEADER_SIZE};

/// Why a note could not be resolved to a playable voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BankError {
    #[error("key split instrument at {pos:#08x} resolves to another split/rhythm")]
    RecursiveSplit { pos: usize },
    #[error("rhythm instrument at {pos:#08x} resolves to another split/rhythm")]
    RecursiveRhythm { pos: usize },
    #[error("invalid tone generator type {kind:#04x} at {pos:#08x}")]
    InvalidCgbType { pos: usize, kind: u8 },
    #[error("unsupported sample encoding {mode:#04x} at {pos:#08x}")]
    UnsupportedSample { pos: usize, mode: u8 },
    #[error("sample header at {pos:#08x} reaches beyond end of file")]
    SampleHeaderOutOfRange { pos: usize },
    #[error(transparent)]
    Rom(#[from] RomError),
}

/// The sound source of a resolved instrument.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Instrument {
    Square1 { duty: u32, sweep: u8 },
    Square2 { duty: u32 },
    /// Cartridge address of the 16-byte wave.
    Wave { wave_ptr: u32 },
    Noise { np: u32 },
    Pcm { info: SampleInfo, fixed: bool },
}

/// An instrument record after key-split/rhythm indirection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InstrumentRecord {
    /// ROM offset of the 12-byte record.
    pub pos: usize,
    /// Key used for pitch; rhythm instruments substitute their own.
    pub pitch_key: u8,
    pub rhythm_pan: i8,
}

/// Everything needed to start a channel for one note.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ResolvedNote {
    pub instrument: Instrument,
    pub adsr: Adsr,
    pub pitch_key: u8,
    pub rhythm_pan: i8,
}

/// Resolve program `prog` played at `key` in the bank at `bank_pos`.
pub fn resolve(rom: &Rom, bank_pos: usize, prog: u8, key: u8) -> Result<ResolvedNote, BankError> {
    let record = lookup(rom, bank_pos, prog, key)?;
    let (adsr, instrument) = read_voice(rom, &record)?;
    Ok(ResolvedNote { instrument, adsr, pitch_key: record.pitch_key, rhythm_pan: record.rhythm_pan })
}

/// Find the record that plays `key` on program `prog`.
pub fn lookup(rom: &Rom, bank_pos: usize, prog: u8, key: u8) -> Result<InstrumentRecord, BankError> {
    let mut pos = bank_pos + usize::from(prog) * INSTRUMENT_SIZE as usize;
    let mut pitch_key = key;
    let mut rhythm_pan = 0i8;

    let kind = rom.read_u8(pos)?;
    if kind & bank_type::SPLIT != 0 {
        let sub_bank = rom.read_agb_ptr(pos + 4)?;
        let key_map = rom.read_agb_ptr(pos + 8)?;
        let mapped = rom.read_u8(key_map + usize::from(key))?;
        let split_pos = pos;
        pos = sub_bank + usize::from(mapped) * INSTRUMENT_SIZE as usize;
        if is_indirect(rom.read_u8(pos)?) {
            return Err(BankError::RecursiveSplit { pos: split_pos });
        }
    } else if kind == bank_type::RHYTHM {
        let sub_bank = rom.read_agb_ptr(pos + 4)?;
        let rhythm_pos = pos;
        pos = sub_bank + usize::from(key) * INSTRUMENT_SIZE as usize;
        if is_indirect(rom.read_u8(pos)?) {
            return Err(BankError::RecursiveRhythm { pos: rhythm_pos });
        }
        let pan = rom.read_u8(pos + 3)?;
        if pan & 0x80 != 0 {
            rhythm_pan = ((i16::from(pan) - 0xC0) * 2) as i8;
        }
        pitch_key = rom.read_u8(pos + 1)?;
    }

    Ok(InstrumentRecord { pos, pitch_key, rhythm_pan })
}

/// Read the envelope and sound source of a resolved record.
pub fn read_voice(rom: &Rom, record: &InstrumentRecord) -> Result<(Adsr, Instrument), BankError> {
    let pos = record.pos;
    let adsr = Adsr::new(
        rom.read_u8(pos + 8)?,
        rom.read_u8(pos + 9)?,
        rom.read_u8(pos + 10)?,
        rom.read_u8(pos + 11)?,
    );
    Ok((adsr, read_source(rom, pos)?))
}

fn is_indirect(kind: u8) -> bool {
    kind & bank_type::SPLIT != 0 || kind == bank_type::RHYTHM
}

fn read_source(rom: &Rom, instr_pos: usize) -> Result<Instrument, BankError> {
    let kind = rom.read_u8(instr_pos)?;

    if kind & bank_type::CGB != 0 {
        let sweep = rom.read_u8(instr_pos + 3)?;
        let param = rom.read_u32(instr_pos + 4)?;
        return match kind & bank_type::CGB {
            bank_type::SQ1 => Ok(Instrument::Square1 { duty: param, sweep }),
            bank_type::SQ2 => Ok(Instrument::Square2 { duty: param }),
            bank_type::WAVE => Ok(Instrument::Wave { wave_ptr: param }),
            bank_type::NOISE => Ok(Instrument::Noise { np: param }),
            _ => Err(BankError::InvalidCgbType { pos: instr_pos, kind }),
        };
    }

    let sample_pos = rom.read_agb_ptr(instr_pos + 4)?;
    let gamefreak_compressed = match rom.read_u8(sample_pos)? {
        0 => false,
        1 => true,
        mode => return Err(BankError::UnsupportedSample { pos: sample_pos, mode }),
    };
    if !rom.valid_range(sample_pos, SAMPLE_HEADER_SIZE as usize) {
        return Err(BankError::SampleHeaderOutOfRange { pos: sample_pos });
    }
    let info = SampleInfo {
        sample_pos,
        mid_c_freq: rom.read_u32(sample_pos + 4)? as f32 / 1024.0,
        loop_pos: rom.read_u32(sample_pos + 8)?,
        end_pos: rom.read_u32(sample_pos + 12)?,
        loop_enabled: rom.read_u8(sample_pos + 3)? & 0xC0 != 0,
        gamefreak_compressed,
    };
    Ok(Instrument::Pcm { info, fixed: kind & bank_type::FIX != 0 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use m4a_ir::AGB_MAP_ROM;

    const BANK: usize = 0x100;
    const SUB_BANK: usize = 0x200;
    const KEY_MAP: usize = 0x300;
    const SAMPLE: usize = 0x400;

    struct Image(Vec<u8>);

    impl Image {
        fn new() -> Self {
            Self(vec![0; 0x800])
        }

        fn record(&mut self, pos: usize, bytes: [u8; 4], word: u32, adsr: [u8; 4]) {
            self.0[pos..pos + 4].copy_from_slice(&bytes);
            self.0[pos + 4..pos + 8].copy_from_slice(&word.to_le_bytes());
            self.0[pos + 8..pos + 12].copy_from_slice(&adsr);
        }

        fn ptr(pos: usize) -> u32 {
            AGB_MAP_ROM + pos as u32
        }

        fn sample(&mut self, mode: u8, loop_flag: u8, freq: u32, loop_pos: u32, end: u32) {
            self.0[SAMPLE] = mode;
            self.0[SAMPLE + 3] = loop_flag;
            self.0[SAMPLE + 4..SAMPLE + 8].copy_from_slice(&freq.to_le_bytes());
            self.0[SAMPLE + 8..SAMPLE + 12].copy_from_slice(&loop_pos.to_le_bytes());
            self.0[SAMPLE + 12..SAMPLE + 16].copy_from_slice(&end.to_le_bytes());
        }

        fn rom(self) -> Rom {
            Rom::from_vec(self.0)
        }
    }

    #[test]
    fn direct_pcm_instrument() {
        let mut img = Image::new();
        img.record(BANK + 12, [0x08, 60, 0, 0], Image::ptr(SAMPLE), [0xFF, 0xF0, 0xC0, 0x80]);
        img.sample(0, 0x40, 13379 * 1024, 4, 100);
        let note = resolve(&img.rom(), BANK, 1, 72).unwrap();
        assert_eq!(note.pitch_key, 72);
        assert_eq!(note.adsr, Adsr::new(0xFF, 0xF0, 0xC0, 0x80));
        let Instrument::Pcm { info, fixed } = note.instrument else { panic!("{note:?}") };
        assert!(fixed);
        assert!(info.loop_enabled);
        assert!(!info.gamefreak_compressed);
        assert_eq!(info.mid_c_freq, 13379.0);
        assert_eq!((info.loop_pos, info.end_pos, info.sample_pos), (4, 100, SAMPLE));
    }

    #[test]
    fn cgb_types() {
        let mut img = Image::new();
        img.record(BANK, [0x01, 60, 0, 0x32], 2, [0, 0, 15, 0]);
        img.record(BANK + 12, [0x0A, 60, 0, 0], 1, [0, 0, 15, 0]);
        img.record(BANK + 24, [0x03, 60, 0, 0], Image::ptr(0x500), [0, 0, 15, 0]);
        img.record(BANK + 36, [0x0C, 60, 0, 0], 1, [0, 0, 15, 0]);
        img.record(BANK + 48, [0x05, 60, 0, 0], 0, [0, 0, 15, 0]);
        let rom = img.rom();
        assert_eq!(resolve(&rom, BANK, 0, 60).unwrap().instrument, Instrument::Square1 { duty: 2, sweep: 0x32 });
        assert_eq!(resolve(&rom, BANK, 1, 60).unwrap().instrument, Instrument::Square2 { duty: 1 });
        assert_eq!(
            resolve(&rom, BANK, 2, 60).unwrap().instrument,
            Instrument::Wave { wave_ptr: Image::ptr(0x500) }
        );
        assert_eq!(resolve(&rom, BANK, 3, 60).unwrap().instrument, Instrument::Noise { np: 1 });
        assert_eq!(
            resolve(&rom, BANK, 4, 60),
            Err(BankError::InvalidCgbType { pos: BANK + 48, kind: 0x05 })
        );
    }

    #[test]
    fn key_split_maps_through_key_table() {
        let mut img = Image::new();
        img.record(BANK, [0x40, 0, 0, 0], Image::ptr(SUB_BANK), [0; 4]);
        img.0[BANK + 8..BANK + 12].copy_from_slice(&Image::ptr(KEY_MAP).to_le_bytes());
        img.0[KEY_MAP + 50] = 2;
        img.record(SUB_BANK + 24, [0x02, 0, 0, 0], 3, [1, 2, 3, 4]);
        let note = resolve(&img.rom(), BANK, 0, 50).unwrap();
        assert_eq!(note.instrument, Instrument::Square2 { duty: 3 });
        assert_eq!(note.pitch_key, 50);
        assert_eq!(note.adsr, Adsr::new(1, 2, 3, 4));
    }

    #[test]
    fn rhythm_substitutes_key_and_pan() {
        let mut img = Image::new();
        img.record(BANK, [0x80, 0, 0, 0], Image::ptr(SUB_BANK), [0; 4]);
        img.record(SUB_BANK + 36 * 12, [0x04, 42, 0, 0xD0], 0, [0, 0, 15, 0]);
        img.record(SUB_BANK + 37 * 12, [0x04, 43, 0, 0x40], 0, [0, 0, 15, 0]);
        let rom = img.rom();
        let note = resolve(&rom, BANK, 0, 36).unwrap();
        assert_eq!(note.pitch_key, 42);
        assert_eq!(note.rhythm_pan, 32);
        assert_eq!(resolve(&rom, BANK, 0, 37).unwrap().rhythm_pan, 0);
    }

    #[test]
    fn recursive_indirection_is_rejected() {
        let mut img = Image::new();
        img.record(BANK, [0x80, 0, 0, 0], Image::ptr(SUB_BANK), [0; 4]);
        img.record(SUB_BANK + 36 * 12, [0x40, 0, 0, 0], 0, [0; 4]);
        assert_eq!(
            resolve(&img.rom(), BANK, 0, 36),
            Err(BankError::RecursiveRhythm { pos: BANK })
        );
    }

    #[test]
    fn sample_errors() {
        let mut img = Image::new();
        img.record(BANK, [0x00, 0, 0, 0], Image::ptr(SAMPLE), [0; 4]);
        img.record(BANK + 12, [0x00, 0, 0, 0], 0x1234, [0; 4]);
        img.sample(3, 0, 0, 0, 0);
        let rom = img.rom();
        assert_eq!(resolve(&rom, BANK, 0, 60), Err(BankError::UnsupportedSample { pos: SAMPLE, mode: 3 }));
        assert!(matches!(resolve(&rom, BANK, 1, 60), Err(BankError::Rom(RomError::InvalidPointer { .. }))));
    }
}
