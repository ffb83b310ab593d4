//! The realtime paths must not touch the heap once warmed up.
//!
//! `RingConsumer::take` runs inside the audio callback; `Context::sound_main`
//! runs on the render thread once per buffer. Both are checked under
//! `assert_no_alloc` (debug builds abort on any allocation).

mod common;

use assert_no_alloc::{assert_no_alloc, AllocDisabler};
use common::{context, op, RomBuilder, Seq, DATA, PROG_SAW, PROG_SQUARE};
use m4a_audio::sample_ring;
use m4a_ir::{AgbplaySoundMode, StereoSample};

#[cfg(debug_assertions)]
#[global_allocator]
static A: AllocDisabler = AllocDisabler;

#[test]
fn ring_take_is_alloc_free() {
    let (mut prod, mut cons) = sample_ring(4096);
    let block = vec![StereoSample::new(0.25, -0.25); 800];
    assert!(prod.put(&block));
    let mut out = vec![StereoSample::silence(); 256];

    assert_no_alloc(|| {
        assert!(cons.take(&mut out));
        assert!(cons.take(&mut out));
        assert!(cons.take(&mut out));
        // underrun fills silence
        assert!(!cons.take(&mut out));
    });
    assert!(out.iter().all(|s| s.is_silent()));
}

#[test]
fn held_notes_render_alloc_free() {
    let mut rom = RomBuilder::new();
    let lead = Seq::at(DATA)
        .bytes(&[op::VOICE, PROG_SQUARE, op::VOL, 100, op::TIE, 72, 100])
        .bytes(&[op::W96, op::W96, op::W96, op::W96, op::EOT, 72, op::FINE])
        .write(&mut rom);
    let pad = Seq::at(DATA + 0x100)
        .bytes(&[op::VOICE, PROG_SAW, op::VOL, 90, op::TIE, 48, 100])
        .bytes(&[op::W96, op::W96, op::W96, op::W96, op::EOT, 48, op::FINE])
        .write(&mut rom);
    rom.song(0, 0, &[lead, pad]);
    let mut ctx = context(rom.build(), 1, 1, AgbplaySoundMode::default());
    ctx.song_num_start(0);

    // note-on and the first buffers size every scratch area
    for _ in 0..200 {
        ctx.sound_main();
    }

    assert_no_alloc(|| {
        for _ in 0..400 {
            ctx.sound_main();
        }
    });
    assert!(ctx.master_buffer().iter().any(|s| !s.is_silent()));
}
