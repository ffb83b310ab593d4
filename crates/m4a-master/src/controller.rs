//! Live playback on a dedicated render thread.
//!
//! The controller owns the render thread and the audio output. Commands
//! travel over a channel and are applied between engine ticks; every
//! command waits for the render thread's reply. The visualizer snapshot is
//! published after every tick under a mutex that is held only for the copy.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TryRecvError};
use m4a_audio::{sample_ring, AudioError, AudioOutput, CpalOutput, RingCloser, RingConsumer, RingProducer};
use m4a_engine::Context;
use m4a_ir::{Rom, SongInfo, StereoSample, VisualizerState, MAX_TRACKS};
use tracing::{debug, info, warn};

use crate::profile::{Profile, ProfileError};

/// Base of the integer speed scale; 64 is normal speed.
const SPEED_UNIT: u32 = 64;
const SPEED_MAX: u32 = 1024;
/// Callback blocks kept buffered ahead of the device.
const NUM_BUFFERS: usize = 2;
const MIN_RING_CAPACITY: usize = 16384;

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error(transparent)]
    Audio(#[from] AudioError),
    #[error(transparent)]
    Profile(#[from] ProfileError),
    #[error("cannot start render thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("render thread is not running")]
    Disconnected,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Command {
    LoadSong(u16),
    Play,
    Pause,
    Stop,
    SpeedDouble,
    SpeedHalve,
    SetSpeedFactor(f32),
    Mute(usize, bool),
    ToggleMute(usize),
    SongInfo,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Reply {
    Done,
    Playing(bool),
    SongInfo(SongInfo),
}

struct Request {
    command: Command,
    reply: Sender<Reply>,
}

#[derive(Default)]
struct Shared {
    snapshot: Mutex<VisualizerState>,
    ended: AtomicBool,
    quit: AtomicBool,
}

/// Handle to a running render thread.
pub struct Controller {
    requests: Sender<Request>,
    shared: Arc<Shared>,
    closer: RingCloser,
    thread: Option<JoinHandle<()>>,
    sample_rate: u32,
    output: Option<CpalOutput>,
}

impl Controller {
    /// Open the default audio device and start playback of `rom` as
    /// described by `profile`. No song is playing until
    /// [`load_song`](Self::load_song) and [`play`](Self::play).
    pub fn new(rom: Rom, profile: &Profile) -> Result<Self, ControllerError> {
        let mut output = CpalOutput::new()?;
        let profile = profile.resolve(&rom)?;
        let ctx = profile.build_context(rom, output.sample_rate());

        let (producer, consumer) = sample_ring(ring_capacity(&ctx));
        output.build_stream(consumer)?;
        let mut controller = Self::spawn(ctx, producer)?;
        output.start()?;
        controller.output = Some(output);
        Ok(controller)
    }

    /// Start the render thread without an audio device. The caller drains
    /// the returned consumer.
    pub fn headless(ctx: Context) -> Result<(Self, RingConsumer), ControllerError> {
        let (producer, consumer) = sample_ring(ring_capacity(&ctx));
        Ok((Self::spawn(ctx, producer)?, consumer))
    }

    fn spawn(mut ctx: Context, producer: RingProducer) -> Result<Self, ControllerError> {
        // leave the primary player stopped on a valid song
        ctx.song_num_start(0);
        ctx.song_num_stop(0);

        producer.set_num_buffers(NUM_BUFFERS);
        let closer = producer.closer();
        let shared = Arc::new(Shared::default());
        let (requests, rx) = unbounded();
        let sample_rate = ctx.sample_rate();

        let render = RenderThread {
            silence: vec![StereoSample::silence(); ctx.samples_per_buffer()],
            ctx,
            producer,
            requests: rx,
            shared: shared.clone(),
            paused: false,
            song_ended: false,
            speed: SPEED_UNIT,
            muted: [false; MAX_TRACKS],
        };
        let thread = std::thread::Builder::new()
            .name("m4a render".into())
            .spawn(move || render.run())
            .map_err(ControllerError::Spawn)?;

        info!(sample_rate, "render thread started");
        Ok(Self { requests, shared, closer, thread: Some(thread), sample_rate, output: None })
    }

    fn send(&self, command: Command) -> Result<Reply, ControllerError> {
        let (reply, rx) = bounded(1);
        self.requests
            .send(Request { command, reply })
            .map_err(|_| ControllerError::Disconnected)?;
        rx.recv().map_err(|_| ControllerError::Disconnected)
    }

    /// Stop everything and cue `song_id` on its player.
    pub fn load_song(&self, song_id: u16) -> Result<(), ControllerError> {
        self.send(Command::LoadSong(song_id)).map(drop)
    }

    /// Resume if paused, otherwise restart the cued song.
    pub fn play(&self) -> Result<(), ControllerError> {
        self.send(Command::Play).map(drop)
    }

    /// Toggle pause. Returns whether the song is playing afterwards.
    pub fn pause(&self) -> Result<bool, ControllerError> {
        match self.send(Command::Pause)? {
            Reply::Playing(playing) => Ok(playing),
            _ => Ok(false),
        }
    }

    /// Stop and rewind the current song.
    pub fn stop(&self) -> Result<(), ControllerError> {
        self.send(Command::Stop).map(drop)
    }

    pub fn speed_double(&self) -> Result<(), ControllerError> {
        self.send(Command::SpeedDouble).map(drop)
    }

    pub fn speed_halve(&self) -> Result<(), ControllerError> {
        self.send(Command::SpeedHalve).map(drop)
    }

    pub fn set_speed_factor(&self, factor: f32) -> Result<(), ControllerError> {
        self.send(Command::SetSpeedFactor(factor)).map(drop)
    }

    pub fn mute(&self, track: usize, muted: bool) -> Result<(), ControllerError> {
        self.send(Command::Mute(track, muted)).map(drop)
    }

    pub fn toggle_mute(&self, track: usize) -> Result<(), ControllerError> {
        self.send(Command::ToggleMute(track)).map(drop)
    }

    pub fn song_info(&self) -> Result<SongInfo, ControllerError> {
        match self.send(Command::SongInfo)? {
            Reply::SongInfo(info) => Ok(info),
            _ => Ok(SongInfo::default()),
        }
    }

    /// Latest snapshot published by the render thread.
    pub fn visualizer_state(&self) -> VisualizerState {
        match self.shared.snapshot.lock() {
            Ok(state) => state.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// The current song has finished and faded out.
    pub fn has_ended(&self) -> bool {
        self.shared.ended.load(Ordering::Acquire)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.shared.quit.store(true, Ordering::Release);
        self.closer.close();
        if let Some(mut output) = self.output.take() {
            if let Err(err) = output.stop() {
                warn!(%err, "failed to stop audio stream");
            }
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("render thread panicked");
            }
        }
    }
}

fn ring_capacity(ctx: &Context) -> usize {
    (ctx.samples_per_buffer() * 8).max(MIN_RING_CAPACITY)
}

struct RenderThread {
    ctx: Context,
    producer: RingProducer,
    requests: Receiver<Request>,
    shared: Arc<Shared>,
    silence: Vec<StereoSample>,
    paused: bool,
    song_ended: bool,
    speed: u32,
    muted: [bool; MAX_TRACKS],
}

impl RenderThread {
    fn run(mut self) {
        while !self.shared.quit.load(Ordering::Acquire) {
            if !self.drain_requests() {
                break;
            }

            let delivered = if self.paused {
                self.producer.put(&self.silence)
            } else {
                self.ctx.sound_main();
                self.publish();
                self.producer.put(self.ctx.master_buffer())
            };
            if !delivered {
                break;
            }

            if self.ctx.has_ended() && !self.song_ended {
                self.ctx.mplay_all_stop();
                self.ctx.sound_clear();
                self.song_ended = true;
                self.shared.ended.store(true, Ordering::Release);
                debug!("song ended");
            }
        }
        debug!("render thread exiting");
    }

    /// Apply all pending commands. Returns false once the controller is gone.
    fn drain_requests(&mut self) -> bool {
        loop {
            match self.requests.try_recv() {
                Ok(req) => {
                    let reply = self.apply(req.command);
                    // the caller may have given up waiting
                    let _ = req.reply.send(reply);
                }
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            }
        }
    }

    fn apply(&mut self, command: Command) -> Reply {
        let primary = self.ctx.primary_player();
        match command {
            Command::LoadSong(song_id) => {
                self.muted = [false; MAX_TRACKS];
                self.ctx.mplay_all_stop();
                self.ctx.song_num_start(song_id);
                self.ctx.mplay_stop(self.ctx.primary_player());
                self.paused = false;
            }
            Command::Play => {
                if self.paused {
                    self.paused = false;
                } else {
                    self.restart_primary(primary);
                }
            }
            Command::Pause => {
                if self.ctx.mplay_is_playing(primary) {
                    self.paused = !self.paused;
                } else {
                    self.restart_primary(primary);
                    self.paused = false;
                }
                return Reply::Playing(!self.paused);
            }
            Command::Stop => {
                let pos = self.song_header_pos(primary);
                self.ctx.mplay_all_stop();
                self.ctx.mplay_start(primary, pos);
                self.ctx.mplay_stop(primary);
                self.set_ended(false);
                self.paused = false;
            }
            Command::SpeedDouble => self.set_speed((self.speed << 1).min(SPEED_MAX)),
            Command::SpeedHalve => self.set_speed((self.speed >> 1).max(1)),
            Command::SetSpeedFactor(factor) => {
                self.speed = (factor * SPEED_UNIT as f32).round().clamp(1.0, SPEED_MAX as f32) as u32;
                self.ctx.set_speed_factor(factor);
            }
            Command::Mute(track, muted) => {
                if let Some(m) = self.muted.get_mut(track) {
                    *m = muted;
                    self.ctx.set_track_muted(track, muted);
                }
            }
            Command::ToggleMute(track) => {
                if let Some(m) = self.muted.get_mut(track) {
                    *m = !*m;
                    let muted = *m;
                    self.ctx.set_track_muted(track, muted);
                }
            }
            Command::SongInfo => return Reply::SongInfo(self.ctx.song_info()),
        }
        Reply::Done
    }

    fn song_header_pos(&self, player: usize) -> usize {
        self.ctx.players().get(player).map_or(0, |p| p.song_header_pos)
    }

    fn restart_primary(&mut self, primary: usize) {
        let pos = self.song_header_pos(primary);
        self.ctx.mplay_start(primary, pos);
        for (track, &muted) in self.muted.iter().enumerate() {
            self.ctx.set_track_muted(track, muted);
        }
        self.set_ended(false);
    }

    fn set_ended(&mut self, ended: bool) {
        self.song_ended = ended;
        self.shared.ended.store(ended, Ordering::Release);
    }

    fn set_speed(&mut self, speed: u32) {
        self.speed = speed;
        self.ctx.set_speed_factor(speed as f32 / SPEED_UNIT as f32);
    }

    fn publish(&mut self) {
        let state = self.ctx.visualizer_state();
        match self.shared.snapshot.lock() {
            Ok(mut snapshot) => *snapshot = state,
            Err(poisoned) => *poisoned.into_inner() = state,
        }
    }
}
