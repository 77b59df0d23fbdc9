use serde_json::Value;

use crate::packet::EncoderPacket;
use crate::types::{OutputFlags, RawAudioFrame, RawVideoFrame};

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct SinkInitError(pub String);

/// The pluggable consumer of finished packets and frames: a file muxer, a
/// network streamer, a recording buffer.
///
/// A sink receives a [`WeakOutput`](crate::WeakOutput) when it is created and
/// reports lifecycle transitions back through it: `begin_data_capture` once
/// its connection handshake succeeds, `signal_stop` on disconnect or
/// completion. `start` may connect asynchronously; returning `true` only
/// means the attempt is underway. `stop` receives the wall-clock timestamp
/// the sink should flush to, or zero for an immediate teardown.
pub trait Sink: Send {
    fn flags(&self) -> OutputFlags;

    fn start(&mut self) -> bool;
    fn stop(&mut self, end_ts: u64);

    fn encoded_packet(&mut self, packet: &EncoderPacket) {
        let _ = packet;
    }

    fn raw_video(&mut self, frame: &RawVideoFrame) {
        let _ = frame;
    }

    fn raw_audio(&mut self, mix_idx: usize, frame: &RawAudioFrame) {
        let _ = (mix_idx, frame);
    }

    /// Default settings merged underneath the caller-supplied blob at
    /// creation.
    fn defaults(&self) -> Value {
        Value::Null
    }

    fn update(&mut self, settings: &Value) {
        let _ = settings;
    }

    fn is_ready_to_update(&self) -> bool {
        true
    }

    fn total_bytes(&self) -> u64 {
        0
    }

    fn dropped_frames(&self) -> i32 {
        0
    }

    fn congestion(&self) -> f32 {
        0.0
    }

    fn connect_time_ms(&self) -> i32 {
        -1
    }
}
