//! Offline rendering of whole songs.
//!
//! The engine is ticked as fast as possible until the song has looped out
//! and faded, or until an optional length limit. Silence padding from the
//! sound mode is added around the result.

use std::path::{Path, PathBuf};

use m4a_engine::Context;
use m4a_ir::StereoSample;
use tracing::{debug, info};

use crate::wav::write_wav_file;

/// A rendered song: the master mix or one buffer per track.
#[derive(Clone, Debug, Default)]
pub struct Rendered {
    pub sample_rate: u32,
    pub tracks: Vec<Vec<StereoSample>>,
    /// Engine ticks run, excluding padding.
    pub ticks: usize,
    /// Whether the song ended by itself rather than hitting the limit.
    pub ended: bool,
}

impl Rendered {
    pub fn seconds(&self) -> f64 {
        let len = self.tracks.first().map_or(0, Vec::len);
        len as f64 / f64::from(self.sample_rate)
    }
}

/// Render the master mix of `song_id`, stopping after `max_seconds` of
/// song audio if given.
pub fn render_song(ctx: &mut Context, song_id: u16, max_seconds: Option<f64>) -> Rendered {
    render(ctx, song_id, max_seconds, false)
}

/// Render every track the song uses into its own buffer.
pub fn render_song_stems(ctx: &mut Context, song_id: u16, max_seconds: Option<f64>) -> Rendered {
    render(ctx, song_id, max_seconds, true)
}

fn render(ctx: &mut Context, song_id: u16, max_seconds: Option<f64>, stems: bool) -> Rendered {
    ctx.song_num_start(song_id);

    let sample_rate = ctx.sample_rate();
    let spb = ctx.samples_per_buffer();
    let player = ctx.primary_player();
    let num_tracks = if stems {
        ctx.players().get(player).map_or(0, |p| usize::from(p.tracks_used))
    } else {
        1
    };
    let mode = *ctx.agbplay_sound_mode();
    let max_ticks = max_seconds.map(|s| (s * f64::from(sample_rate) / spb as f64).ceil() as usize);
    let pad_start = pad_len(mode.pad_silence_seconds_start, sample_rate);
    let pad_end = pad_len(mode.pad_silence_seconds_end, sample_rate);

    let mut tracks = vec![vec![StereoSample::silence(); pad_start]; num_tracks];
    let mut ticks = 0;
    let mut ended = false;

    loop {
        if max_ticks.is_some_and(|max| ticks >= max) {
            break;
        }
        ctx.sound_main();
        if ctx.has_ended() {
            ended = true;
            break;
        }
        if stems {
            if let Some(p) = ctx.players().get(player) {
                for (out, trk) in tracks.iter_mut().zip(&p.tracks) {
                    out.extend_from_slice(&trk.audio_buffer);
                }
            }
        } else {
            tracks[0].extend_from_slice(ctx.master_buffer());
        }
        ticks += 1;
    }

    for out in &mut tracks {
        out.resize(out.len() + pad_end, StereoSample::silence());
    }
    debug!(song_id, ticks, ended, tracks = num_tracks, "render finished");
    Rendered { sample_rate, tracks, ticks, ended }
}

fn pad_len(seconds: f64, sample_rate: u32) -> usize {
    if seconds <= 0.0 {
        return 0;
    }
    (seconds * f64::from(sample_rate)).round() as usize
}

/// File name of stem `track` next to `base`: `song.wav` becomes
/// `song.03.wav`.
pub fn stem_path(base: &Path, track: usize) -> PathBuf {
    let stem = base.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    base.with_file_name(format!("{stem}.{track:02}.wav"))
}

/// Write a render to `path`, or one file per track for stems.
pub fn write_rendered(rendered: &Rendered, path: &Path, stems: bool) -> std::io::Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for (i, samples) in rendered.tracks.iter().enumerate() {
        let out = if stems { stem_path(path, i) } else { path.to_path_buf() };
        write_wav_file(&out, samples, rendered.sample_rate)?;
        info!(path = %out.display(), seconds = samples.len() as f64 / f64::from(rendered.sample_rate), "wrote wav");
        written.push(out);
    }
    Ok(written)
}
