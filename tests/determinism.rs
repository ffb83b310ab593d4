//! Rendering is a pure function of the cartridge and the calls made.

mod common;

use common::{context, op, render, RomBuilder, Seq, DATA, PROG_NOISE, PROG_SAW, PROG_SQUARE};
use m4a_engine::Context;
use m4a_ir::AgbplaySoundMode;

/// Song 0 plays a saw melody over a square bass, song 1 a noise beat.
fn two_song_context() -> Context {
    let mut rom = RomBuilder::new();
    let melody = Seq::at(DATA)
        .bytes(&[op::VOICE, PROG_SAW, op::VOL, 110, op::PAN, 0x30])
        .bytes(&[op::N24, 60, 100, op::W48, op::N24, 64, 90, op::W48, op::N24, 67, 80, op::W48])
        .bytes(&[op::FINE])
        .write(&mut rom);
    let bass = Seq::at(DATA + 0x100)
        .bytes(&[op::VOICE, PROG_SQUARE, op::VOL, 90, op::PAN, 0x50])
        .bytes(&[op::TIE, 36, 100, op::W96, op::EOT, 36, op::W48, op::FINE])
        .write(&mut rom);
    let beat = Seq::at(DATA + 0x200)
        .bytes(&[op::VOICE, PROG_NOISE, op::VOL, 120])
        .bytes(&[op::N24, 50, 127, op::W48, op::N24, 60, 127, op::W48, op::FINE])
        .write(&mut rom);
    rom.song(0, 0, &[melody, bass]);
    rom.song(0, 0, &[beat]);
    context(rom.build(), 2, 1, AgbplaySoundMode::default())
}

#[test]
fn same_song_renders_identically_in_fresh_contexts() {
    let mut a = two_song_context();
    let mut b = two_song_context();
    a.song_num_start(0);
    b.song_num_start(0);
    let first = render(&mut a, 300);
    let second = render(&mut b, 300);
    assert_eq!(first, second);
    assert!(first.iter().any(|s| !s.is_silent()));
}

#[test]
fn restarting_after_another_song_reproduces_the_audio() {
    let mut ctx = two_song_context();

    ctx.song_num_start(0);
    let first = render(&mut ctx, 300);

    ctx.song_num_start(1);
    let other = render(&mut ctx, 150);
    assert_ne!(first[..other.len()], other[..]);

    ctx.song_num_start(0);
    let again = render(&mut ctx, 300);
    assert_eq!(first, again);
}

#[test]
fn song_state_resets_on_restart() {
    let mut ctx = two_song_context();
    ctx.song_num_start(0);
    render(&mut ctx, 120);
    assert!(ctx.players()[0].tick_count > 0);

    ctx.song_num_start(1);
    let player = &ctx.players()[0];
    assert_eq!(player.tick_count, 0);
    assert_eq!(player.tracks_used, 1);
    assert!(player.playing);
    assert!(!player.finished);
    assert!(ctx.channels().all().all(|c| c.is_dead()));
}
