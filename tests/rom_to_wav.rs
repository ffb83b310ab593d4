//! Cartridge image to WAV file, through a profile like the CLI does it.

mod common;

use std::path::PathBuf;

use common::{op, RomBuilder, Seq, DATA, PROG_SAW, PROG_SQUARE, TABLE};
use m4a_formats::{load_rom_bytes, FormatError, LoadOptions};
use m4a_master::{render_song, render_song_stems, write_rendered, Profile};

const SAMPLE_RATE: u32 = 48_000;

/// Song 0: two tracks that play briefly and stop. Song 1: loops forever.
fn image() -> Vec<u8> {
    let mut rom = RomBuilder::new();
    let lead = Seq::at(DATA)
        .bytes(&[op::VOICE, PROG_SAW, op::VOL, 100, op::N24, 60, 100, op::W48, op::FINE])
        .write(&mut rom);
    let bass = Seq::at(DATA + 0x100)
        .bytes(&[op::VOICE, PROG_SQUARE, op::VOL, 80, op::N24, 36, 100, op::W48, op::FINE])
        .write(&mut rom);
    rom.song(0, 0, &[lead, bass]);
    let looping = Seq::at(DATA + 0x200)
        .bytes(&[op::VOICE, PROG_SAW, op::N24, 64, 100, op::W48])
        .jump(op::GOTO, DATA + 0x202)
        .write(&mut rom);
    rom.song(0, 0, &[looping]);
    rom.into_bytes()
}

fn profile(toml: &str) -> Profile {
    Profile::from_toml_str(toml).expect("profile parses")
}

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("m4aplay-{}-{name}", std::process::id()))
}

#[test]
fn unverified_image_is_rejected_by_default() {
    let err = load_rom_bytes(image(), LoadOptions::default()).unwrap_err();
    assert!(matches!(err, FormatError::BadLogo));
}

#[test]
fn profile_resolves_song_count_and_players() {
    let rom = load_rom_bytes(image(), LoadOptions { verify_header: false }).unwrap();
    let resolved = profile(&format!("[song_table]\npos = {TABLE}\n")).resolve(&rom).unwrap();
    assert_eq!(resolved.song_table.count, 2);
    assert_eq!(resolved.player_table.len(), 1);
}

#[test]
fn short_song_renders_to_its_end() {
    let rom = load_rom_bytes(image(), LoadOptions { verify_header: false }).unwrap();
    let resolved = profile(&format!(
        "[song_table]\npos = {TABLE}\n\n[agbplay_sound_mode]\npad_silence_seconds_start = 0.5\npad_silence_seconds_end = 0.25\n"
    ))
    .resolve(&rom)
    .unwrap();

    let mut ctx = resolved.build_context(rom, SAMPLE_RATE);
    let spb = ctx.samples_per_buffer();
    let rendered = render_song(&mut ctx, 0, Some(60.0));

    assert!(rendered.ended);
    assert_eq!(rendered.tracks.len(), 1);
    let master = &rendered.tracks[0];
    assert_eq!(master.len(), 24_000 + rendered.ticks * spb + 12_000);
    assert!(master[..24_000].iter().all(|s| s.is_silent()));
    assert!(master[24_000..].iter().any(|s| !s.is_silent()));
}

#[test]
fn endless_song_stops_at_the_limit() {
    let rom = load_rom_bytes(image(), LoadOptions { verify_header: false }).unwrap();
    let resolved = profile(&format!(
        "[song_table]\npos = {TABLE}\n\n[agbplay_sound_mode]\nmax_loops = -1\n"
    ))
    .resolve(&rom)
    .unwrap();

    let mut ctx = resolved.build_context(rom, SAMPLE_RATE);
    let spb = ctx.samples_per_buffer();
    let rendered = render_song(&mut ctx, 1, Some(2.0));

    assert!(!rendered.ended);
    let expected_ticks = (2.0 * f64::from(SAMPLE_RATE) / spb as f64).ceil() as usize;
    assert_eq!(rendered.ticks, expected_ticks);
    assert!(rendered.seconds() >= 2.0);
}

#[test]
fn stems_write_one_file_per_track() {
    let rom = load_rom_bytes(image(), LoadOptions { verify_header: false }).unwrap();
    let resolved = profile(&format!("[song_table]\npos = {TABLE}\n")).resolve(&rom).unwrap();
    let mut ctx = resolved.build_context(rom, SAMPLE_RATE);
    let rendered = render_song_stems(&mut ctx, 0, Some(60.0));

    assert_eq!(rendered.tracks.len(), 2);
    assert_eq!(rendered.tracks[0].len(), rendered.tracks[1].len());

    let base = temp_path("stems.wav");
    let files = write_rendered(&rendered, &base, true).unwrap();
    assert_eq!(files.len(), 2);
    for (i, file) in files.iter().enumerate() {
        let bytes = std::fs::read(file).unwrap();
        assert_eq!(&bytes[..4], b"RIFF");
        assert_eq!(bytes.len(), 44 + rendered.tracks[i].len() * 4);
        std::fs::remove_file(file).unwrap();
    }
}
