//! Raw cartridge images and their header.

use std::path::Path;

use m4a_ir::Rom;
use tracing::{debug, info};

use crate::FormatError;

/// Largest image the cartridge bus can map.
pub const AGB_ROM_SIZE: usize = 0x0200_0000;
/// An image must at least hold the header.
pub const MIN_ROM_SIZE: usize = 0x200;

const LOGO_POS: usize = 0x04;
const TITLE_POS: usize = 0xA0;
const GAME_CODE_POS: usize = 0xAC;
const MAKER_CODE_POS: usize = 0xB0;
const VERSION_POS: usize = 0xBC;
const CHECKSUM_POS: usize = 0xBD;

const LOGO: [u8; 156] = [
    0x24, 0xff, 0xae, 0x51, 0x69, 0x9a, 0xa2, 0x21, 0x3d, 0x84, 0x82, 0x0a, 0x84, 0xe4, 0x09, 0xad,
    0x11, 0x24, 0x8b, 0x98, 0xc0, 0x81, 0x7f, 0x21, 0xa3, 0x52, 0xbe, 0x19, 0x93, 0x09, 0xce, 0x20,
    0x10, 0x46, 0x4a, 0x4a, 0xf8, 0x27, 0x31, 0xec, 0x58, 0xc7, 0xe8, 0x33, 0x82, 0xe3, 0xce, 0xbf,
    0x85, 0xf4, 0xdf, 0x94, 0xce, 0x4b, 0x09, 0xc1, 0x94, 0x56, 0x8a, 0xc0, 0x13, 0x72, 0xa7, 0xfc,
    0x9f, 0x84, 0x4d, 0x73, 0xa3, 0xca, 0x9a, 0x61, 0x58, 0x97, 0xa3, 0x27, 0xfc, 0x03, 0x98, 0x76,
    0x23, 0x1d, 0xc7, 0x61, 0x03, 0x04, 0xae, 0x56, 0xbf, 0x38, 0x84, 0x00, 0x40, 0xa7, 0x0e, 0xfd,
    0xff, 0x52, 0xfe, 0x03, 0x6f, 0x95, 0x30, 0xf1, 0x97, 0xfb, 0xc0, 0x85, 0x60, 0xd6, 0x80, 0x25,
    0xa9, 0x63, 0xbe, 0x03, 0x01, 0x4e, 0x38, 0xe2, 0xf9, 0xa2, 0x34, 0xff, 0xbb, 0x3e, 0x03, 0x44,
    0x78, 0x00, 0x90, 0xcb, 0x88, 0x11, 0x3a, 0x94, 0x65, 0xc0, 0x7c, 0x63, 0x87, 0xf0, 0x3c, 0xaf,
    0xd6, 0x25, 0xe4, 0x8b, 0x38, 0x0a, 0xac, 0x72, 0x21, 0xd4, 0xf8, 0x07,
];

/// How strictly an image is checked on load.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadOptions {
    /// Check the boot logo and header checksum. Size limits always apply.
    pub verify_header: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self { verify_header: true }
    }
}

/// Identification fields from the cartridge header.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CartridgeHeader {
    pub title: String,
    pub game_code: String,
    pub maker_code: String,
    pub version: u8,
    pub checksum: u8,
}

impl CartridgeHeader {
    pub fn parse(rom: &Rom) -> Result<Self, FormatError> {
        Ok(Self {
            title: read_string(rom, TITLE_POS, 12)?,
            game_code: read_string(rom, GAME_CODE_POS, 4)?,
            maker_code: read_string(rom, MAKER_CODE_POS, 2)?,
            version: rom.read_u8(VERSION_POS)?,
            checksum: rom.read_u8(CHECKSUM_POS)?,
        })
    }

    /// Checksum the header should carry.
    pub fn expected_checksum(rom: &Rom) -> Result<u8, FormatError> {
        let sum = rom
            .slice(TITLE_POS, CHECKSUM_POS - TITLE_POS)?
            .iter()
            .fold(0u8, |acc, &b| acc.wrapping_sub(b));
        Ok(sum.wrapping_sub(0x19))
    }
}

/// Read a cartridge image from disk.
pub fn load_rom(path: impl AsRef<Path>, options: LoadOptions) -> Result<Rom, FormatError> {
    let path = path.as_ref();
    let data = std::fs::read(path)?;
    debug!(path = %path.display(), size = data.len(), "read cartridge image");
    load_rom_bytes(data, options)
}

/// Validate an in-memory cartridge image.
pub fn load_rom_bytes(data: Vec<u8>, options: LoadOptions) -> Result<Rom, FormatError> {
    if data.len() < MIN_ROM_SIZE {
        return Err(FormatError::TooSmall(data.len()));
    }
    if data.len() > AGB_ROM_SIZE {
        return Err(FormatError::TooLarge(data.len()));
    }

    let rom = Rom::from_vec(data);
    if options.verify_header {
        verify(&rom)?;
    }
    if let Ok(header) = CartridgeHeader::parse(&rom) {
        info!(title = %header.title, code = %header.game_code, size = rom.len(), "cartridge loaded");
    }
    Ok(rom)
}

fn verify(rom: &Rom) -> Result<(), FormatError> {
    if rom.slice(LOGO_POS, LOGO.len())? != LOGO {
        return Err(FormatError::BadLogo);
    }
    let found = rom.read_u8(CHECKSUM_POS)?;
    let expected = CartridgeHeader::expected_checksum(rom)?;
    if found != expected {
        return Err(FormatError::BadChecksum { found, expected });
    }
    Ok(())
}

/// NUL-terminated string of at most `limit` bytes.
fn read_string(rom: &Rom, pos: usize, limit: usize) -> Result<String, FormatError> {
    let bytes = rom.slice(pos, limit)?;
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    Ok(bytes[..end].iter().map(|&b| char::from(b)).collect())
}
