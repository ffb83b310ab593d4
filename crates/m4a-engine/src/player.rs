//! A music player: a bounded set of tracks sharing one tempo.

use arrayvec::ArrayVec;
use m4a_ir::{PlayerInfo, Rom, RomError, MAX_TRACKS};
use tracing::warn;

use crate::channel::TrackId;
use crate::reverb::Reverb;
use crate::track::Track;

/// Tempo at song start.
pub const DEFAULT_BPM: u16 = 150;

#[derive(Clone, Debug)]
pub struct Player {
    pub tracks: ArrayVec<Track, MAX_TRACKS>,

    pub playing: bool,
    pub finished: bool,

    pub interframe_count: u64,
    pub frame_count: u64,
    pub tick_count: u64,
    pub bpm_stack: i32,
    pub bpm: u16,

    pub song_header_pos: usize,
    pub bank_pos: usize,
    pub tracks_used: u8,
    pub reverb: u8,
    pub priority: u8,

    pub index: u8,
    pub use_priority: bool,
}

impl Player {
    pub fn new(info: &PlayerInfo, index: u8, reverb: &Reverb, sample_rate: u32) -> Self {
        let limit = usize::from(info.max_tracks).min(MAX_TRACKS);
        let tracks = (0..limit)
            .map(|t| Track::new(TrackId::new(usize::from(index), t), reverb.clone(), sample_rate))
            .collect();
        Self {
            tracks,
            playing: false,
            finished: true,
            interframe_count: 0,
            frame_count: 0,
            tick_count: 0,
            bpm_stack: 0,
            bpm: 0,
            song_header_pos: 0,
            bank_pos: 0,
            tracks_used: 0,
            reverb: 0,
            priority: 0,
            index,
            use_priority: info.use_priority,
        }
    }

    /// Load the song whose header is at `header_pos`; 0 loads nothing.
    ///
    /// A header that cannot be read leaves the player stopped.
    pub fn init(&mut self, rom: &Rom, header_pos: usize) {
        self.song_header_pos = header_pos;
        self.tracks_used = 0;
        self.playing = false;
        self.finished = true;

        if header_pos != 0 {
            if let Err(err) = self.read_header(rom, header_pos) {
                warn!(pos = format_args!("{header_pos:#08x}"), %err, "bad song header");
                self.tracks_used = 0;
                self.playing = false;
                self.finished = true;
            }
        }

        for trk in self.tracks.iter_mut().skip(usize::from(self.tracks_used)) {
            trk.init(0);
        }

        self.bpm_stack = 0;
        self.bpm = DEFAULT_BPM;
        self.tick_count = 0;
        self.interframe_count = 0;
        self.frame_count = 0;
    }

    fn read_header(&mut self, rom: &Rom, header_pos: usize) -> Result<(), RomError> {
        let num_tracks = rom.read_u8(header_pos)?;
        self.priority = rom.read_u8(header_pos + 2)?;
        self.reverb = rom.read_u8(header_pos + 3)?;
        self.bank_pos = if rom.valid_pointer(rom.read_u32(header_pos + 4)?) {
            rom.read_agb_ptr(header_pos + 4)?
        } else {
            0
        };
        self.tracks_used = num_tracks.min(self.tracks.len() as u8);

        for (i, trk) in self.tracks.iter_mut().take(usize::from(self.tracks_used)).enumerate() {
            let ptr_pos = header_pos + 8 + 4 * i;
            match rom.read_agb_ptr(ptr_pos) {
                Ok(pos) => trk.init(pos),
                Err(err) => {
                    warn!(track = i, %err, "track pointer invalid, track disabled");
                    trk.init(0);
                }
            }
        }

        self.playing = true;
        self.finished = self.tracks_used == 0;
        Ok(())
    }

    /// Seconds of song time played so far.
    pub fn time(&self) -> f32 {
        self.frame_count as f32 / m4a_ir::AGB_FPS as f32
    }
}

/// Look up a track by id.
pub(crate) fn track_mut(players: &mut [Player], id: TrackId) -> Option<&mut Track> {
    players
        .get_mut(usize::from(id.player))
        .and_then(|p| p.tracks.get_mut(usize::from(id.track)))
}
