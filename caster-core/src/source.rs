use std::sync::Arc;

use crate::types::{AudioConversion, RawAudioFrame, RawVideoFrame, VideoConversion};

pub type RawVideoCallback = Arc<dyn Fn(&RawVideoFrame) + Send + Sync>;
pub type RawAudioCallback = Arc<dyn Fn(usize, &RawAudioFrame) + Send + Sync>;

/// A raw video feed. At most one output is connected at a time; frames are
/// pushed on the source's own thread with nanosecond timestamps.
pub trait RawVideoSource: Send + Sync {
    fn connect(&self, conversion: Option<VideoConversion>, callback: RawVideoCallback);
    fn disconnect(&self);

    fn frame_interval_ns(&self) -> u64;

    /// Frames produced since the source started, used to snapshot counters
    /// when a capture begins.
    fn total_frames(&self) -> u32 {
        0
    }
}

/// A raw audio feed with up to [`MAX_AUDIO_TRACKS`](crate::MAX_AUDIO_TRACKS)
/// independent mixes.
pub trait RawAudioSource: Send + Sync {
    fn connect(&self, mix_idx: usize, conversion: Option<AudioConversion>, callback: RawAudioCallback);
    fn disconnect(&self, mix_idx: usize);

    fn sample_rate(&self) -> u32;
}
