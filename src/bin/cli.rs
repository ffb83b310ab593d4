//! m4aplay CLI: live playback and WAV export of MP2K songs.
//!
//! Usage:
//!   m4a-cli game.gba --song-table 0x6b49f0 --song 3
//!   m4a-cli game.gba --profile game.toml --song 3 --wav song.wav
//!   m4a-cli game.gba --profile game.toml --song 3 --wav song.wav --stems

use std::error::Error;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use m4a_formats::read_player_table;
use m4a_ir::AGB_MAP_ROM;
use m4a_master::{
    load_rom, render_song, render_song_stems, write_rendered, CartridgeHeader, Controller,
    LoadOptions, Profile, ResamplerType, ReverbType, Rom,
};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "m4a-cli", version, about = "Play or render MP2K (m4a) music from GBA cartridge images")]
struct Args {
    /// Cartridge image (.gba)
    rom: PathBuf,

    /// Song number in the song table
    #[arg(long, short = 's', default_value = "0")]
    song: u16,

    /// TOML profile describing the game's tables and sound mode
    #[arg(long, short = 'p')]
    profile: Option<PathBuf>,

    /// Song table position (ROM offset or cartridge address, hex with 0x)
    #[arg(long, value_parser = parse_offset)]
    song_table: Option<usize>,

    /// Number of songs in the table; counted from the table when omitted
    #[arg(long)]
    song_count: Option<u16>,

    /// Player table position (ROM offset or cartridge address)
    #[arg(long, value_parser = parse_offset)]
    player_table: Option<usize>,

    /// Number of player table entries
    #[arg(long, default_value = "4")]
    player_count: usize,

    /// Render to this WAV file instead of playing live
    #[arg(long, short = 'w')]
    wav: Option<PathBuf>,

    /// With --wav, write one file per track
    #[arg(long)]
    stems: bool,

    /// Stop after this many seconds of song audio
    #[arg(long)]
    seconds: Option<f64>,

    /// Sample rate for WAV export
    #[arg(long, default_value = "48000")]
    sample_rate: u32,

    /// Resampler for PCM channels (nearest, linear, sinc, blep, blamp)
    #[arg(long)]
    resampler: Option<ResamplerType>,

    /// Reverb algorithm (normal, gs1, gs2, mgat, test, none)
    #[arg(long)]
    reverb: Option<ReverbType>,

    /// Loops before fading out; -1 loops forever
    #[arg(long, allow_hyphen_values = true)]
    max_loops: Option<i8>,

    /// Skip the cartridge header check
    #[arg(long)]
    no_verify: bool,
}

/// Accept `0x` hex or decimal; cartridge addresses map to ROM offsets.
fn parse_offset(s: &str) -> Result<usize, String> {
    let value = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    }
    .map_err(|e| format!("invalid offset '{s}': {e}"))?;
    Ok(if value >= AGB_MAP_ROM { value - AGB_MAP_ROM } else { value } as usize)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), Box<dyn Error>> {
    let rom = load_rom(&args.rom, LoadOptions { verify_header: !args.no_verify })?;
    let header = CartridgeHeader::parse(&rom)?;
    println!("Title:    {}", header.title);
    println!("Code:     {}", header.game_code);

    let profile = build_profile(args, &rom, &header)?;
    let resolved = profile.resolve(&rom)?;
    println!("Songs:    {} (table at {:#x})", resolved.song_table.count, resolved.song_table.pos);
    println!("Players:  {}", resolved.player_table.len());
    println!();

    match &args.wav {
        Some(path) => render_to_wav(args, rom, &resolved, path),
        None => play_audio(args, rom, &resolved),
    }
}

fn build_profile(args: &Args, rom: &Rom, header: &CartridgeHeader) -> Result<Profile, Box<dyn Error>> {
    let mut profile = match &args.profile {
        Some(path) => Profile::load(path)?,
        None => Profile::default(),
    };
    if !profile.game_codes.is_empty() && !profile.matches_game(&header.game_code) {
        warn!(code = %header.game_code, profile = %profile.name, "profile is for a different game");
    }

    if let Some(pos) = args.song_table {
        profile.song_table.pos = pos;
    }
    if let Some(count) = args.song_count {
        profile.song_table.count = count;
    }
    if let Some(pos) = args.player_table {
        profile.player_table = read_player_table(rom, pos, args.player_count)?;
    }

    let mode = &mut profile.agbplay_sound_mode;
    if let Some(resampler) = args.resampler {
        mode.resampler_type_normal = resampler;
    }
    if let Some(reverb) = args.reverb {
        mode.reverb_type = reverb;
    }
    if let Some(loops) = args.max_loops {
        mode.max_loops = loops;
    }
    Ok(profile)
}

fn play_audio(args: &Args, rom: Rom, profile: &Profile) -> Result<(), Box<dyn Error>> {
    let ctrl = Controller::new(rom, profile)?;
    ctrl.load_song(args.song)?;
    ctrl.play()?;
    println!("Playing song {}... (Ctrl-C to quit)", args.song);

    let limit = args.seconds.map(Duration::from_secs_f64);
    let start = std::time::Instant::now();
    while !ctrl.has_ended() && !limit.is_some_and(|l| start.elapsed() >= l) {
        let state = ctrl.visualizer_state();
        if let Some(player) = state.primary() {
            print!(
                "\rTime: {:6.1}s | BPM: {:3} | Tracks: {:2} | Channels: {:2}",
                player.time, player.bpm, player.tracks_used, state.active_channels
            );
            let _ = std::io::stdout().flush();
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    println!("\rDone.{:60}", "");
    Ok(())
}

fn render_to_wav(args: &Args, rom: Rom, profile: &Profile, path: &Path) -> Result<(), Box<dyn Error>> {
    println!("Rendering song {} to {} at {} Hz...", args.song, path.display(), args.sample_rate);

    let mut ctx = profile.build_context(rom, args.sample_rate);
    let rendered = if args.stems {
        render_song_stems(&mut ctx, args.song, args.seconds)
    } else {
        render_song(&mut ctx, args.song, args.seconds)
    };
    if !rendered.ended {
        warn!(seconds = rendered.seconds(), "song did not end within the limit");
    }

    let files = write_rendered(&rendered, path, args.stems)?;
    println!("Wrote {} file(s), {:.1} seconds.", files.len(), rendered.seconds());
    Ok(())
}
