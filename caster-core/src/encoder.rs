use std::sync::{Arc, Mutex, Weak};

use crate::packet::EncoderPacket;
use crate::pause::PauseTracker;
use crate::types::{PacketKind, Timebase};

pub type PacketCallback = Arc<dyn Fn(EncoderPacket) + Send + Sync>;

/// A per-track encoder the output drives. Encoders produce packets with
/// monotonically nondecreasing `dts` on their own threads and feed at most
/// one output at a time.
pub trait Encoder: Send + Sync {
    fn name(&self) -> &str;
    fn kind(&self) -> PacketKind;
    fn timebase(&self) -> Timebase;

    /// Begins producing packets into `callback`. Returns `false` when the
    /// encoder cannot start.
    fn start(&self, callback: PacketCallback) -> bool;
    fn stop(&self);

    /// One-time setup ahead of `start`; safe to call repeatedly.
    fn initialize(&self) -> bool {
        true
    }

    fn is_active(&self) -> bool;

    /// Pause window shared with the output for frame-grid pause alignment.
    fn pause(&self) -> &PauseTracker;

    fn pairing(&self) -> &PairingState;

    fn last_error(&self) -> Option<String> {
        None
    }

    /// Video encoders report their frame interval for pause quantization.
    fn frame_interval_ns(&self) -> u64 {
        0
    }
}

/// Pairing couples one audio encoder to a video encoder before start so the
/// audio side buffers until video produces its first frame at time base
/// zero. The inner mutex doubles as the encoder's init lock; pairing locks
/// audio before video.
#[derive(Default)]
pub struct PairingState {
    inner: Mutex<PairingInner>,
}

#[derive(Default)]
struct PairingInner {
    partner: Option<Weak<dyn Encoder>>,
    wait_for_video: bool,
}

impl PairingState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_paired(&self) -> bool {
        self.inner.lock().unwrap().partner.is_some()
    }

    pub fn partner(&self) -> Option<Arc<dyn Encoder>> {
        self.inner.lock().unwrap().partner.as_ref().and_then(Weak::upgrade)
    }

    pub fn waits_for_video(&self) -> bool {
        self.inner.lock().unwrap().wait_for_video
    }

    /// Encoders clear their pairing when they stop.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.partner = None;
        inner.wait_for_video = false;
    }
}

impl std::fmt::Debug for PairingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairingState")
            .field("paired", &self.is_paired())
            .finish()
    }
}

/// Couples `audio` to `video` if both are inactive and unpaired. The audio
/// side is marked to wait for the video encoder's first frame.
pub(crate) fn pair_encoders(video: &Arc<dyn Encoder>, audio: &Arc<dyn Encoder>) -> bool {
    let mut audio_pairing = audio.pairing().inner.lock().unwrap();
    let mut video_pairing = video.pairing().inner.lock().unwrap();

    if audio.is_active()
        || video.is_active()
        || audio_pairing.partner.is_some()
        || video_pairing.partner.is_some()
    {
        return false;
    }

    audio_pairing.wait_for_video = true;
    audio_pairing.partner = Some(Arc::downgrade(video));
    video_pairing.partner = Some(Arc::downgrade(audio));
    true
}
