use bytes::Bytes;
use serde::Serialize;

/// Upper bound on the number of audio tracks a multi-track output can carry.
pub const MAX_AUDIO_TRACKS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    Video,
    Audio,
}

/// Rational mapping from packet timestamps to seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timebase {
    pub num: u32,
    pub den: u32,
}

impl Timebase {
    pub fn new(num: u32, den: u32) -> Self {
        debug_assert!(den != 0, "timebase denominator must be non-zero");
        Self { num, den }
    }

    /// Converts `ticks` in this timebase to microseconds. The intermediate is
    /// widened so large tick values cannot overflow.
    pub fn ticks_to_usec(&self, ticks: i64) -> i64 {
        (ticks as i128 * 1_000_000 * self.num as i128 / self.den as i128) as i64
    }

    /// Duration of a single tick in microseconds. For video encoders the
    /// timebase is the frame interval, so this is one frame.
    pub fn tick_duration_usec(&self) -> i64 {
        self.num as i64 * 1_000_000 / self.den as i64
    }

    pub fn ticks_to_seconds(&self, ticks: i64) -> f64 {
        ticks as f64 * self.num as f64 / self.den as f64
    }
}

/// Result codes reported by a sink when it stops, normally or otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopCode {
    Success,
    BadPath,
    ConnectFailed,
    InvalidStream,
    Error,
    Disconnected,
    Unsupported,
    NoSpace,
    EncodeError,
    HdrDisabled,
}

/// Capabilities a sink declares when it is created. These decide which data
/// paths the output wires up and which operations it accepts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputFlags {
    pub video: bool,
    pub audio: bool,
    pub encoded: bool,
    pub multi_track: bool,
    pub service: bool,
    pub can_pause: bool,
    pub force_encoder: bool,
}

/// Override for the raw video feed an output subscribes to. Zero fields are
/// filled from the output's preferred size at connect time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VideoConversion {
    pub width: u32,
    pub height: u32,
}

/// Override for the raw audio feed an output subscribes to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AudioConversion {
    pub sample_rate: u32,
    pub channels: u32,
}

/// One raw video frame, timestamped in nanoseconds.
#[derive(Debug, Clone)]
pub struct RawVideoFrame {
    pub timestamp: u64,
    pub data: Bytes,
}

/// A batch of raw audio frames, timestamped in nanoseconds.
#[derive(Debug, Clone)]
pub struct RawAudioFrame {
    pub timestamp: u64,
    pub frames: u32,
    pub data: Bytes,
}
