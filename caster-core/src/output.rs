use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::captions::{CaptionQueue, DEFAULT_DISPLAY_DURATION};
use crate::delay::{DelayBuffer, DelayEvent, DelayFlags};
use crate::encoder::{pair_encoders, Encoder, PacketCallback};
use crate::error::{BindError, CaptionError, OutputInitError, PauseError, StartError};
use crate::event::{Event, EventEmitter};
use crate::interleave::Interleaver;
use crate::packet::EncoderPacket;
use crate::pause::{closest_video_ts, PauseTracker};
use crate::reconnect::{jittered_retry_exp, Backoff};
use crate::service::Service;
use crate::sink::{Sink, SinkInitError};
use crate::source::{RawAudioCallback, RawAudioSource, RawVideoCallback, RawVideoSource};
use crate::thread_utils::{spawn_named, ManualResetEvent};
use crate::types::{
    AudioConversion, OutputFlags, PacketKind, RawAudioFrame, RawVideoFrame, StopCode,
    VideoConversion, MAX_AUDIO_TRACKS,
};

// Lock order on the data path, outermost first: delay, interleaved,
// captions, sink. The pause mutexes are leaves and never held across any of
// the above.

fn now_ns() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_nanos() as u64
}

fn frames_to_ns(frames: u64, sample_rate: u32) -> u64 {
    (frames as u128 * 1_000_000_000 / sample_rate.max(1) as u128) as u64
}

#[derive(Debug, Clone)]
pub struct OutputOptions {
    pub name: String,
    pub settings: Value,
}

/// Lifecycle phase derived from the orthogonal state flags; several flags
/// can be true at once (e.g. reconnecting while a delay is still buffering),
/// so the flags stay authoritative and this is the observer's view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputPhase {
    Idle,
    Active,
    Paused,
    Stopping,
    Reconnecting,
    DelayedStarting,
    DelayedActive,
}

/// Strong handle to an output. Cloning is cheap; the output is torn down
/// when the last strong handle drops.
#[derive(Clone)]
pub struct Output {
    inner: Arc<OutputInner>,
}

/// Weak handle held by sinks and services; upgrades only while a strong
/// handle is alive.
#[derive(Clone, Default)]
pub struct WeakOutput {
    inner: Weak<OutputInner>,
}

impl WeakOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upgrade(&self) -> Option<Output> {
        self.inner.upgrade().map(|inner| Output { inner })
    }
}

pub(crate) struct OutputInner {
    name: String,
    flags: OutputFlags,
    emitter: Arc<EventEmitter>,

    sink: Mutex<Option<Box<dyn Sink>>>,
    settings: Mutex<Value>,

    video_encoder: Mutex<Option<Arc<dyn Encoder>>>,
    audio_encoders: Mutex<[Option<Arc<dyn Encoder>>; MAX_AUDIO_TRACKS]>,
    service: Mutex<Option<Arc<dyn Service>>>,
    video_source: Mutex<Option<Arc<dyn RawVideoSource>>>,
    audio_source: Mutex<Option<Arc<dyn RawAudioSource>>>,
    video_conversion: Mutex<Option<VideoConversion>>,
    audio_conversion: Mutex<Option<AudioConversion>>,

    interleaved: Mutex<Interleaver>,
    delay: Mutex<DelayBuffer>,
    captions: Mutex<CaptionQueue>,
    pause: PauseTracker,

    active: AtomicBool,
    data_active: AtomicBool,
    paused: AtomicBool,
    reconnecting: AtomicBool,
    delay_active: AtomicBool,
    delay_capturing: AtomicBool,
    end_capture_worker_active: AtomicBool,
    reconnect_worker_active: AtomicBool,

    stopping_event: ManualResetEvent,
    reconnect_stop_event: ManualResetEvent,

    end_capture_worker: Mutex<Option<JoinHandle<()>>>,
    reconnect_worker: Mutex<Option<JoinHandle<()>>>,

    backoff: Mutex<Backoff>,
    reconnect_retry_sec: AtomicU32,
    reconnect_retry_max: AtomicU32,
    reconnect_retry_exp: f64,

    delay_sec: AtomicU32,
    delay_flags: Mutex<DelayFlags>,
    delay_cur_preserve: AtomicBool,
    active_delay_ns: AtomicU64,
    delay_restart_refs: AtomicI64,

    stop_code: Mutex<StopCode>,
    last_error: Mutex<Option<String>>,

    scaled_width: AtomicU32,
    scaled_height: AtomicU32,
    mixer_mask: AtomicUsize,

    total_frames: AtomicU32,
    total_audio_frames: AtomicU64,
    starting_frame_count: AtomicU32,
    audio_start_ts: AtomicU64,
    video_start_ts: AtomicU64,
    sample_rate: AtomicU32,
}

impl Output {
    /// Creates an output around a sink built by `make_sink`, which receives
    /// a weak handle it can use for `begin_data_capture` and `signal_stop`
    /// callbacks once its connection work completes.
    pub fn new<F>(
        options: OutputOptions,
        emitter: Arc<EventEmitter>,
        make_sink: F,
    ) -> Result<Self, OutputInitError>
    where
        F: FnOnce(WeakOutput, &Value) -> Result<Box<dyn Sink>, SinkInitError>,
    {
        let name = options.name.clone();
        let mut init_error = None;

        let inner = Arc::new_cyclic(|weak: &Weak<OutputInner>| {
            let (sink, flags) = match make_sink(WeakOutput { inner: weak.clone() }, &options.settings) {
                Ok(sink) => {
                    let flags = sink.flags();
                    (Some(sink), flags)
                }
                Err(err) => {
                    init_error = Some(err);
                    (None, OutputFlags::default())
                }
            };

            // Sink defaults sit underneath whatever the caller supplied.
            let settings = match sink.as_ref() {
                Some(sink) => {
                    let mut base = sink.defaults();
                    merge_settings(&mut base, &options.settings);
                    base
                }
                None => options.settings.clone(),
            };

            OutputInner {
                name: options.name,
                flags,
                emitter,
                sink: Mutex::new(sink),
                settings: Mutex::new(settings),
                video_encoder: Mutex::new(None),
                audio_encoders: Mutex::new(Default::default()),
                service: Mutex::new(None),
                video_source: Mutex::new(None),
                audio_source: Mutex::new(None),
                video_conversion: Mutex::new(None),
                audio_conversion: Mutex::new(None),
                interleaved: Mutex::new(Interleaver::new(1)),
                delay: Mutex::new(DelayBuffer::default()),
                captions: Mutex::new(CaptionQueue::default()),
                pause: PauseTracker::new(),
                active: AtomicBool::new(false),
                data_active: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                reconnecting: AtomicBool::new(false),
                delay_active: AtomicBool::new(false),
                delay_capturing: AtomicBool::new(false),
                end_capture_worker_active: AtomicBool::new(false),
                reconnect_worker_active: AtomicBool::new(false),
                stopping_event: ManualResetEvent::new(true),
                reconnect_stop_event: ManualResetEvent::new(false),
                end_capture_worker: Mutex::new(None),
                reconnect_worker: Mutex::new(None),
                backoff: Mutex::new(Backoff::new(2, jittered_retry_exp())),
                reconnect_retry_sec: AtomicU32::new(2),
                reconnect_retry_max: AtomicU32::new(20),
                reconnect_retry_exp: jittered_retry_exp(),
                delay_sec: AtomicU32::new(0),
                delay_flags: Mutex::new(DelayFlags::default()),
                delay_cur_preserve: AtomicBool::new(false),
                active_delay_ns: AtomicU64::new(0),
                delay_restart_refs: AtomicI64::new(0),
                stop_code: Mutex::new(StopCode::Success),
                last_error: Mutex::new(None),
                scaled_width: AtomicU32::new(0),
                scaled_height: AtomicU32::new(0),
                mixer_mask: AtomicUsize::new(0),
                total_frames: AtomicU32::new(0),
                total_audio_frames: AtomicU64::new(0),
                starting_frame_count: AtomicU32::new(0),
                audio_start_ts: AtomicU64::new(0),
                video_start_ts: AtomicU64::new(0),
                sample_rate: AtomicU32::new(0),
            }
        });

        match init_error {
            Some(err) => {
                error!(output = name.as_str(), "Failed to create output sink");
                Err(OutputInitError::Sink(name, err))
            }
            None => {
                debug!(output = name.as_str(), "Output created");
                Ok(Self { inner })
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn flags(&self) -> OutputFlags {
        self.inner.flags
    }

    pub fn downgrade(&self) -> WeakOutput {
        WeakOutput {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Active here includes the reconnect limbo: the output still owns its
    /// encoders and will resume without a new `start` call.
    pub fn active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire) || self.inner.reconnecting.load(Ordering::Acquire)
    }

    pub fn reconnecting(&self) -> bool {
        self.inner.reconnecting.load(Ordering::Acquire)
    }

    pub fn paused(&self) -> bool {
        self.inner.paused.load(Ordering::Acquire)
    }

    pub fn phase(&self) -> OutputPhase {
        let inner = &self.inner;
        if inner.reconnecting.load(Ordering::Acquire) {
            OutputPhase::Reconnecting
        } else if inner.stopping() {
            OutputPhase::Stopping
        } else if inner.delay_active.load(Ordering::Acquire) {
            if inner.delay_capturing.load(Ordering::Acquire) {
                OutputPhase::DelayedActive
            } else {
                OutputPhase::DelayedStarting
            }
        } else if inner.active.load(Ordering::Acquire) {
            if inner.paused.load(Ordering::Acquire) {
                OutputPhase::Paused
            } else {
                OutputPhase::Active
            }
        } else {
            OutputPhase::Idle
        }
    }

    pub fn start(&self) -> Result<(), StartError> {
        let inner = &self.inner;
        if inner.sink.lock().unwrap().is_none() {
            error!(output = inner.name.as_str(), "Cannot start an output without a sink");
            return Err(StartError::NoSink(inner.name.clone()));
        }
        if inner.active.load(Ordering::Acquire) || inner.reconnecting.load(Ordering::Acquire) {
            return Err(StartError::AlreadyActive(inner.name.clone()));
        }

        if inner.flags.service {
            let service = inner.service.lock().unwrap().clone();
            let Some(service) = service else {
                return Err(StartError::NoService(inner.name.clone()));
            };
            if !service.initialize(self) {
                return Err(StartError::ServiceRejected(inner.name.clone()));
            }
        }

        if inner.flags.encoded && inner.delay_sec.load(Ordering::Acquire) > 0 {
            inner.delay_start()
        } else if inner.actual_start() {
            inner.emit_with(|output| Event::Starting { output });
            Ok(())
        } else {
            Err(StartError::SinkRejected(inner.name.clone()))
        }
    }

    pub fn stop(&self) {
        let inner = &self.inner;
        if inner.sink.lock().unwrap().is_none() {
            return;
        }
        if !inner.active.load(Ordering::Acquire) && !inner.reconnecting.load(Ordering::Acquire) {
            return;
        }
        if inner.reconnecting.load(Ordering::Acquire) {
            self.force_stop();
            return;
        }

        if inner.flags.encoded && inner.active_delay_ns.load(Ordering::Acquire) > 0 {
            inner.delay_stop();
        } else if !inner.stopping() {
            inner.emit_with(|output| Event::Stopping { output });
            inner.actual_stop(false, now_ns());
        }
    }

    pub fn force_stop(&self) {
        let inner = &self.inner;
        if !inner.stopping() {
            *inner.stop_code.lock().unwrap() = StopCode::Success;
            inner.emit_with(|output| Event::Stopping { output });
        }
        inner.actual_stop(true, 0);
    }

    /// Called by the sink on disconnect or completion; decides between
    /// reconnecting and finalizing the stop.
    pub fn signal_stop(&self, code: StopCode) {
        let inner = &self.inner;
        *inner.stop_code.lock().unwrap() = code;

        if inner.can_reconnect(code) {
            if inner.delay_active.load(Ordering::Acquire) {
                inner.delay_restart_refs.fetch_add(1, Ordering::AcqRel);
            }
            inner.end_data_capture_internal(false);
            inner.reconnect();
        } else {
            if inner.delay_active.load(Ordering::Acquire) {
                inner.delay_active.store(false, Ordering::Release);
            }
            inner.end_data_capture_internal(true);
        }
    }

    pub fn pause(&self, pause: bool) -> Result<(), PauseError> {
        let inner = &self.inner;
        if !inner.flags.can_pause {
            warn!(output = inner.name.as_str(), "Output cannot be paused");
            return Err(PauseError::NotPausable(inner.name.clone()));
        }
        if !inner.active.load(Ordering::Acquire) {
            return Err(PauseError::NotActive(inner.name.clone()));
        }
        if inner.paused.load(Ordering::Acquire) == pause {
            return Ok(());
        }

        let success = if inner.flags.encoded {
            inner.encoded_pause(pause)
        } else {
            inner.raw_pause(pause)
        };

        if success {
            inner.paused.store(pause, Ordering::Release);
            inner.emit_with(|output| {
                if pause {
                    Event::Pause { output }
                } else {
                    Event::Unpause { output }
                }
            });
            info!(
                output = inner.name.as_str(),
                "Output {}paused",
                if pause { "" } else { "un" }
            );
            Ok(())
        } else {
            Err(PauseError::InvalidTransition(inner.name.clone()))
        }
    }

    /// Sinks call this once their connection handshake succeeds and data may
    /// begin to flow.
    pub fn begin_data_capture(&self) -> bool {
        self.inner.begin_data_capture()
    }

    pub fn end_data_capture(&self) {
        self.inner.end_data_capture_internal(true);
    }

    pub fn can_begin_data_capture(&self) -> bool {
        self.inner.can_begin_data_capture()
    }

    pub fn initialize_encoders(&self) -> bool {
        self.inner.initialize_encoders()
    }

    // ---------------------------------------------------------------- binding

    pub fn set_video_encoder(&self, encoder: Arc<dyn Encoder>) -> Result<(), BindError> {
        let inner = &self.inner;
        if encoder.kind() != PacketKind::Video {
            warn!(output = inner.name.as_str(), "Encoder passed is not a video encoder");
            return Err(BindError::WrongKind(inner.name.clone()));
        }
        if inner.active.load(Ordering::Acquire) {
            warn!(
                output = inner.name.as_str(),
                "Tried to set the video encoder while the output is active"
            );
            return Err(BindError::ActiveOutput(inner.name.clone()));
        }
        *inner.video_encoder.lock().unwrap() = Some(encoder);
        Ok(())
    }

    pub fn set_audio_encoder(&self, idx: usize, encoder: Arc<dyn Encoder>) -> Result<(), BindError> {
        let inner = &self.inner;
        if encoder.kind() != PacketKind::Audio {
            warn!(output = inner.name.as_str(), "Encoder passed is not an audio encoder");
            return Err(BindError::WrongKind(inner.name.clone()));
        }
        if inner.active.load(Ordering::Acquire) {
            warn!(
                output = inner.name.as_str(),
                track = idx,
                "Tried to set an audio encoder while the output is active"
            );
            return Err(BindError::ActiveOutput(inner.name.clone()));
        }
        let limit = if inner.flags.multi_track { MAX_AUDIO_TRACKS } else { 1 };
        if idx >= limit {
            return Err(BindError::TrackOutOfRange(inner.name.clone(), idx));
        }
        inner.audio_encoders.lock().unwrap()[idx] = Some(encoder);
        Ok(())
    }

    pub fn video_encoder(&self) -> Option<Arc<dyn Encoder>> {
        self.inner.video_encoder.lock().unwrap().clone()
    }

    pub fn audio_encoder(&self, idx: usize) -> Option<Arc<dyn Encoder>> {
        let limit = if self.inner.flags.multi_track { MAX_AUDIO_TRACKS } else { 1 };
        if idx >= limit {
            return None;
        }
        self.inner.audio_encoders.lock().unwrap()[idx].clone()
    }

    /// Binds a service; a service already bound elsewhere is stolen from its
    /// previous output.
    pub fn set_service(&self, service: Arc<dyn Service>) -> Result<(), BindError> {
        let inner = &self.inner;
        if inner.active.load(Ordering::Acquire) {
            return Err(BindError::ActiveOutput(inner.name.clone()));
        }
        if service.binding().is_active() {
            return Err(BindError::ServiceBusy);
        }

        if let Some(previous) = service.binding().bound_output() {
            previous.inner.service.lock().unwrap().take();
        }
        service.binding().bind(self.downgrade());

        let previous = inner.service.lock().unwrap().replace(service.clone());
        if let Some(previous) = previous {
            if !Arc::ptr_eq(&previous, &service) {
                previous.binding().unbind();
            }
        }
        Ok(())
    }

    pub fn service(&self) -> Option<Arc<dyn Service>> {
        self.inner.service.lock().unwrap().clone()
    }

    pub fn set_media(
        &self,
        video: Option<Arc<dyn RawVideoSource>>,
        audio: Option<Arc<dyn RawAudioSource>>,
    ) {
        *self.inner.video_source.lock().unwrap() = video;
        *self.inner.audio_source.lock().unwrap() = audio;
    }

    pub fn set_video_conversion(&self, conversion: VideoConversion) {
        *self.inner.video_conversion.lock().unwrap() = Some(conversion);
    }

    pub fn set_audio_conversion(&self, conversion: AudioConversion) {
        *self.inner.audio_conversion.lock().unwrap() = Some(conversion);
    }

    pub fn set_mixer(&self, mix_idx: usize) {
        if !self.inner.active.load(Ordering::Acquire) {
            self.inner.mixer_mask.store(1 << mix_idx, Ordering::Release);
        }
    }

    pub fn set_mixers(&self, mask: usize) {
        self.inner.mixer_mask.store(mask, Ordering::Release);
    }

    pub fn mixers(&self) -> usize {
        self.inner.mixer_mask.load(Ordering::Acquire)
    }

    pub fn set_preferred_size(&self, width: u32, height: u32) -> Result<(), BindError> {
        let inner = &self.inner;
        if !inner.flags.video {
            return Ok(());
        }
        if inner.active.load(Ordering::Acquire) {
            warn!(
                output = inner.name.as_str(),
                "Cannot set the preferred resolution while the output is active"
            );
            return Err(BindError::ActiveOutput(inner.name.clone()));
        }
        inner.scaled_width.store(width, Ordering::Release);
        inner.scaled_height.store(height, Ordering::Release);
        Ok(())
    }

    pub fn width(&self) -> u32 {
        self.inner.scaled_width.load(Ordering::Acquire)
    }

    pub fn height(&self) -> u32 {
        self.inner.scaled_height.load(Ordering::Acquire)
    }

    // ----------------------------------------------------------------- delay

    pub fn set_delay(&self, delay_sec: u32, flags: DelayFlags) {
        self.inner.delay_sec.store(delay_sec, Ordering::Release);
        *self.inner.delay_flags.lock().unwrap() = flags;
    }

    pub fn delay_sec(&self) -> u32 {
        self.inner.delay_sec.load(Ordering::Acquire)
    }

    pub fn active_delay_ns(&self) -> u64 {
        self.inner.active_delay_ns.load(Ordering::Acquire)
    }

    /// How much stream time is currently held in the delay buffer.
    pub fn buffered_delay_ns(&self) -> u64 {
        self.inner.delay.lock().unwrap().buffered_ns(now_ns())
    }

    // ------------------------------------------------------------- reconnect

    pub fn set_reconnect_settings(&self, retry_max: u32, retry_sec: u32) {
        self.inner.reconnect_retry_max.store(retry_max, Ordering::Release);
        self.inner.reconnect_retry_sec.store(retry_sec, Ordering::Release);
    }

    // -------------------------------------------------------------- captions

    pub fn caption_text(&self, text: &str) -> Result<(), CaptionError> {
        self.caption_text_with_duration(text, DEFAULT_DISPLAY_DURATION)
    }

    pub fn caption_text_with_duration(
        &self,
        text: &str,
        display_duration: f64,
    ) -> Result<(), CaptionError> {
        let inner = &self.inner;
        if !inner.active.load(Ordering::Acquire) {
            return Err(CaptionError::NotActive(inner.name.clone()));
        }
        debug!(output = inner.name.as_str(), "Caption text: {text}");
        inner.captions.lock().unwrap().push_text(text, display_duration);
        Ok(())
    }

    pub fn push_caption_data(&self, triples: &[[u8; 3]]) {
        self.inner.captions.lock().unwrap().push_cc_data(triples);
    }

    // ----------------------------------------------------------------- stats

    pub fn total_frames(&self) -> u32 {
        self.inner.total_frames.load(Ordering::Acquire)
    }

    pub fn pause_offset_ns(&self) -> u64 {
        self.inner.pause.offset_ns()
    }

    pub fn total_bytes(&self) -> u64 {
        let inner = &self.inner;
        if inner.delay_active.load(Ordering::Acquire) && !inner.delay_capturing.load(Ordering::Acquire)
        {
            return 0;
        }
        inner
            .sink
            .lock()
            .unwrap()
            .as_ref()
            .map(|sink| sink.total_bytes())
            .unwrap_or(0)
    }

    pub fn frames_dropped(&self) -> i32 {
        self.inner
            .sink
            .lock()
            .unwrap()
            .as_ref()
            .map(|sink| sink.dropped_frames())
            .unwrap_or(0)
    }

    pub fn congestion(&self) -> f32 {
        self.inner
            .sink
            .lock()
            .unwrap()
            .as_ref()
            .map(|sink| sink.congestion().clamp(0.0, 1.0))
            .unwrap_or(0.0)
    }

    pub fn connect_time_ms(&self) -> i32 {
        self.inner
            .sink
            .lock()
            .unwrap()
            .as_ref()
            .map(|sink| sink.connect_time_ms())
            .unwrap_or(-1)
    }

    pub fn is_ready_to_update(&self) -> bool {
        self.inner
            .sink
            .lock()
            .unwrap()
            .as_ref()
            .map(|sink| sink.is_ready_to_update())
            .unwrap_or(true)
    }

    /// Merges `settings` into the stored blob and forwards the result to the
    /// sink.
    pub fn update(&self, settings: &Value) {
        let inner = &self.inner;
        let merged = {
            let mut stored = inner.settings.lock().unwrap();
            merge_settings(&mut stored, settings);
            stored.clone()
        };
        if let Some(sink) = inner.sink.lock().unwrap().as_mut() {
            sink.update(&merged);
        }
    }

    pub fn settings(&self) -> Value {
        self.inner.settings.lock().unwrap().clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.last_error_full()
    }

    pub fn set_last_error(&self, message: Option<String>) {
        *self.inner.last_error.lock().unwrap() = message;
    }

    pub fn stop_code(&self) -> StopCode {
        *self.inner.stop_code.lock().unwrap()
    }

    // -------------------------------------------------- sink-facing signals

    pub fn signal_writing(&self) {
        self.inner.emit_with(|output| Event::Writing { output });
    }

    pub fn signal_wrote(&self) {
        self.inner.emit_with(|output| Event::Wrote { output });
    }

    pub fn signal_writing_error(&self) {
        self.inner.emit_with(|output| Event::WritingError { output });
    }
}

impl std::fmt::Debug for Output {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Output")
            .field("name", &self.inner.name)
            .field("flags", &self.inner.flags)
            .field("phase", &self.phase())
            .finish()
    }
}

impl OutputInner {
    fn emit_with(&self, make: impl FnOnce(String) -> Event) {
        self.emitter.emit(make(self.name.clone()));
    }

    fn stopping(&self) -> bool {
        !self.stopping_event.is_set()
    }

    fn last_error_full(&self) -> Option<String> {
        if let Some(message) = self.last_error.lock().unwrap().clone() {
            return Some(message);
        }
        if let Some(video) = self.video_encoder.lock().unwrap().clone() {
            if let Some(message) = video.last_error() {
                return Some(message);
            }
        }
        let audio_encoders = self.audio_encoders.lock().unwrap().clone();
        for encoder in audio_encoders.into_iter().flatten() {
            if let Some(message) = encoder.last_error() {
                return Some(message);
            }
        }
        None
    }

    fn num_audio_tracks(&self) -> usize {
        if !self.flags.multi_track {
            return 1;
        }
        let encoders = self.audio_encoders.lock().unwrap();
        encoders.iter().take_while(|slot| slot.is_some()).count()
    }

    fn bound_audio_encoders(&self) -> Vec<Arc<dyn Encoder>> {
        let tracks = self.num_audio_tracks();
        let encoders = self.audio_encoders.lock().unwrap();
        encoders.iter().take(tracks).flatten().cloned().collect()
    }

    // ----------------------------------------------------------- start/stop

    fn actual_start(self: &Arc<Self>) -> bool {
        self.stopping_event.wait();
        *self.stop_code.lock().unwrap() = StopCode::Success;
        *self.last_error.lock().unwrap() = None;

        let success = {
            let mut sink = self.sink.lock().unwrap();
            match sink.as_mut() {
                Some(sink) => sink.start(),
                None => false,
            }
        };

        if success && self.flags.video && !self.flags.encoded {
            if let Some(source) = self.video_source.lock().unwrap().clone() {
                self.starting_frame_count
                    .store(source.total_frames(), Ordering::Release);
            }
        }

        if self.delay_restart_refs.load(Ordering::Acquire) > 0 {
            self.delay_restart_refs.fetch_sub(1, Ordering::AcqRel);
        }

        self.captions.lock().unwrap().reset_for_start();
        success
    }

    fn actual_stop(self: &Arc<Self>, force: bool, ts: u64) {
        if self.stopping() && !force {
            return;
        }

        self.resume_if_paused();
        self.stopping_event.reset();

        let was_reconnecting =
            self.reconnecting.load(Ordering::Acquire) && !self.delay_active.load(Ordering::Acquire);
        if self.reconnecting.load(Ordering::Acquire) {
            self.reconnect_stop_event.set();
            if self.reconnect_worker_active.load(Ordering::Acquire) {
                let handle = self.reconnect_worker.lock().unwrap().take();
                if let Some(handle) = handle {
                    if handle.thread().id() != std::thread::current().id() {
                        let _ = handle.join();
                    }
                }
            }
        }

        let mut call_stop = true;
        if force && self.delay_active.load(Ordering::Acquire) {
            call_stop = self.delay_capturing.load(Ordering::Acquire);
            self.delay_active.store(false, Ordering::Release);
            self.delay_capturing.store(false, Ordering::Release);
            *self.stop_code.lock().unwrap() = StopCode::Success;
            self.end_data_capture_internal(true);
            self.stopping_event.set();
        }

        let stopped_via_sink = {
            let mut sink = self.sink.lock().unwrap();
            match sink.as_mut() {
                Some(sink) if call_stop => {
                    sink.stop(ts);
                    true
                }
                _ => false,
            }
        };

        if !stopped_via_sink && was_reconnecting {
            *self.stop_code.lock().unwrap() = StopCode::Success;
            self.emit_stopped();
            self.stopping_event.set();
        }

        self.captions.lock().unwrap().clear_text();
    }

    fn resume_if_paused(self: &Arc<Self>) {
        if !self.paused.load(Ordering::Acquire) {
            return;
        }
        let success = if self.flags.encoded {
            self.encoded_pause(false)
        } else {
            self.raw_pause(false)
        };
        if success {
            self.paused.store(false, Ordering::Release);
            self.emit_with(|output| Event::Unpause { output });
        }
    }

    fn can_reconnect(&self, code: StopCode) -> bool {
        let reconnect_active = self.reconnect_retry_max.load(Ordering::Acquire) != 0;
        (self.reconnecting.load(Ordering::Acquire) && code != StopCode::Success)
            || (reconnect_active && code == StopCode::Disconnected)
    }

    fn emit_stopped(&self) {
        let code = *self.stop_code.lock().unwrap();
        let last_error = self.last_error_full();
        self.emit_with(|output| Event::Stopped {
            output,
            code,
            last_error,
        });
    }

    // ---------------------------------------------------------------- delay

    fn delay_start(self: &Arc<Self>) -> Result<(), StartError> {
        let resume = {
            let mut delay = self.delay.lock().unwrap();
            let resume = self.delay_active.load(Ordering::Acquire);
            if resume {
                self.delay_restart_refs.fetch_add(1, Ordering::AcqRel);
            }
            delay.push(now_ns(), DelayEvent::Start);
            resume
        };

        if resume {
            self.emit_with(|output| Event::Starting { output });
            return Ok(());
        }

        if !self.can_begin_data_capture() {
            return Err(StartError::MissingMedia(self.name.clone()));
        }
        if !self.initialize_encoders() {
            return Err(StartError::EncoderFailed(self.name.clone()));
        }
        if self.begin_data_capture() {
            Ok(())
        } else {
            Err(StartError::MissingMedia(self.name.clone()))
        }
    }

    fn delay_stop(self: &Arc<Self>) {
        let now = now_ns();
        self.delay.lock().unwrap().push(now, DelayEvent::Stop(now));
        self.emit_with(|output| Event::Stopping { output });
    }

    fn process_delay(self: &Arc<Self>, packet: EncoderPacket) {
        let now = now_ns();
        let delay_ns = self.active_delay_ns.load(Ordering::Acquire);
        let ready = {
            let mut delay = self.delay.lock().unwrap();
            delay.push(now, DelayEvent::Packet(packet));
            delay.drain_ready(now, delay_ns)
        };

        for event in ready {
            match event {
                DelayEvent::Packet(packet) => {
                    if self.delay_capturing.load(Ordering::Acquire)
                        && !self.end_capture_worker_active.load(Ordering::Acquire)
                    {
                        self.terminal_packet(packet);
                    }
                }
                DelayEvent::Start => {
                    self.actual_start();
                }
                DelayEvent::Stop(ts) => {
                    self.actual_stop(false, ts);
                }
            }
        }
    }

    fn cleanup_delay(&self) {
        let preserve = self.delay_cur_preserve.load(Ordering::Acquire);
        let mut delay = self.delay.lock().unwrap();
        if !preserve && !self.reconnecting.load(Ordering::Acquire) {
            let flushed = delay.flush();
            if flushed > 0 {
                info!(
                    output = self.name.as_str(),
                    entries = flushed,
                    "Flushed delay buffer"
                );
            }
        }
        self.delay_restart_refs.store(0, Ordering::Release);
        self.active_delay_ns.store(0, Ordering::Release);
    }

    // ------------------------------------------------------------- capture

    fn can_begin_data_capture(&self) -> bool {
        if self.delay_active.load(Ordering::Acquire) {
            return true;
        }
        if self.active.load(Ordering::Acquire) {
            return false;
        }

        let flags = self.flags;
        if flags.video {
            let present = if flags.encoded {
                self.video_encoder.lock().unwrap().is_some()
            } else {
                self.video_source.lock().unwrap().is_some()
            };
            if !present {
                return false;
            }
        }
        if flags.audio {
            if flags.encoded {
                let tracks = self.num_audio_tracks();
                if tracks == 0 {
                    return false;
                }
                let encoders = self.audio_encoders.lock().unwrap();
                if encoders.iter().take(tracks).any(|slot| slot.is_none()) {
                    return false;
                }
            } else if self.audio_source.lock().unwrap().is_none() {
                return false;
            }
        }
        if flags.service && self.service.lock().unwrap().is_none() {
            return false;
        }
        true
    }

    fn initialize_encoders(&self) -> bool {
        if self.active.load(Ordering::Acquire) {
            return self.delay_active.load(Ordering::Acquire);
        }
        if !self.flags.encoded {
            return false;
        }

        if self.flags.video {
            let Some(video) = self.video_encoder.lock().unwrap().clone() else {
                return false;
            };
            if !video.initialize() {
                *self.last_error.lock().unwrap() = video.last_error();
                return false;
            }
        }
        if self.flags.audio {
            for encoder in self.bound_audio_encoders() {
                if !encoder.initialize() {
                    *self.last_error.lock().unwrap() = encoder.last_error();
                    return false;
                }
            }
        }
        true
    }

    fn begin_data_capture(self: &Arc<Self>) -> bool {
        if self.delay_active.load(Ordering::Acquire) {
            return self.begin_delayed_capture();
        }
        if self.active.load(Ordering::Acquire) {
            return false;
        }

        self.total_frames.store(0, Ordering::Release);
        if !self.flags.encoded {
            self.reset_raw_state();
        }
        if !self.can_begin_data_capture() {
            return false;
        }

        if self.flags.encoded && self.flags.video && self.flags.audio {
            self.pair_bound_encoders();
        }

        self.data_active.store(true, Ordering::Release);
        self.hook_data_capture();

        if self.flags.service {
            if let Some(service) = self.service.lock().unwrap().clone() {
                service.activate();
                service.binding().set_active(true);
            }
        }

        self.active.store(true, Ordering::Release);
        self.emit_with(|output| Event::Activate { output });

        if self.reconnecting.load(Ordering::Acquire) {
            self.emit_with(|output| Event::ReconnectSuccess { output });
            self.reconnecting.store(false, Ordering::Release);
        } else if self.delay_active.load(Ordering::Acquire) {
            self.emit_with(|output| Event::Starting { output });
        } else {
            self.emit_with(|output| Event::Started { output });
        }
        true
    }

    fn begin_delayed_capture(self: &Arc<Self>) -> bool {
        if self.delay_capturing.load(Ordering::Acquire) {
            return false;
        }

        self.interleaved
            .lock()
            .unwrap()
            .reset(self.num_audio_tracks());
        self.delay_capturing.store(true, Ordering::Release);

        if self.reconnecting.load(Ordering::Acquire) {
            self.emit_with(|output| Event::ReconnectSuccess { output });
            self.reconnecting.store(false, Ordering::Release);
        } else {
            self.emit_with(|output| Event::Started { output });
        }
        true
    }

    fn pair_bound_encoders(&self) {
        let Some(video) = self.video_encoder.lock().unwrap().clone() else {
            return;
        };
        let audios = self.bound_audio_encoders();
        let candidate = audios
            .iter()
            .find(|encoder| !encoder.is_active() && !encoder.pairing().is_paired());
        match candidate {
            Some(audio) => {
                if !pair_encoders(&video, audio) {
                    warn!(
                        output = self.name.as_str(),
                        "Encoder pairing rejected; starting unpaired"
                    );
                }
            }
            None => warn!(
                output = self.name.as_str(),
                "No unpaired audio encoder available; starting unpaired"
            ),
        }
    }

    fn reset_raw_state(&self) {
        self.audio_start_ts.store(0, Ordering::Release);
        self.video_start_ts.store(0, Ordering::Release);
        self.total_audio_frames.store(0, Ordering::Release);
        if let Some(sample_rate) = self.raw_sample_rate() {
            self.sample_rate.store(sample_rate, Ordering::Release);
        }
        self.pause.reset();
    }

    /// A configured conversion override wins over the source's native rate.
    fn raw_sample_rate(&self) -> Option<u32> {
        let conversion = self.audio_conversion.lock().unwrap().clone();
        if let Some(conversion) = conversion {
            if conversion.sample_rate != 0 {
                return Some(conversion.sample_rate);
            }
        }
        self.audio_source
            .lock()
            .unwrap()
            .as_ref()
            .map(|source| source.sample_rate())
    }

    /// Resolves the video conversion handed to the raw source: an explicit
    /// override (zero dimensions backfilled from the preferred size), or one
    /// synthesized from the preferred size alone.
    fn resolved_video_conversion(&self) -> Option<VideoConversion> {
        let width = self.scaled_width.load(Ordering::Acquire);
        let height = self.scaled_height.load(Ordering::Acquire);

        let conversion = self.video_conversion.lock().unwrap().clone();
        if let Some(mut conversion) = conversion {
            if conversion.width == 0 {
                conversion.width = width;
            }
            if conversion.height == 0 {
                conversion.height = height;
            }
            return Some(conversion);
        }

        if width != 0 && height != 0 {
            Some(VideoConversion { width, height })
        } else {
            None
        }
    }

    fn hook_data_capture(self: &Arc<Self>) {
        let flags = self.flags;
        if flags.encoded {
            self.interleaved
                .lock()
                .unwrap()
                .reset(self.num_audio_tracks());

            if self.delay_sec.load(Ordering::Acquire) > 0 {
                let preserve = self.delay_flags.lock().unwrap().preserve_on_disconnect;
                self.active_delay_ns.store(
                    self.delay_sec.load(Ordering::Acquire) as u64 * 1_000_000_000,
                    Ordering::Release,
                );
                self.delay_cur_preserve.store(preserve, Ordering::Release);
                self.delay_active.store(true, Ordering::Release);
                info!(
                    output = self.name.as_str(),
                    delay_sec = self.delay_sec.load(Ordering::Acquire),
                    preserve_on_disconnect = preserve,
                    "Delay active"
                );
            }

            if flags.audio {
                for (track_idx, encoder) in self.bound_audio_encoders().into_iter().enumerate() {
                    if !encoder.start(self.encoded_callback(Some(track_idx))) {
                        warn!(
                            output = self.name.as_str(),
                            track = track_idx,
                            "Audio encoder failed to start"
                        );
                    }
                }
            }
            if flags.video {
                if let Some(encoder) = self.video_encoder.lock().unwrap().clone() {
                    if !encoder.start(self.encoded_callback(None)) {
                        warn!(output = self.name.as_str(), "Video encoder failed to start");
                    }
                }
            }
        } else {
            if flags.video {
                if let Some(source) = self.video_source.lock().unwrap().clone() {
                    source.connect(self.resolved_video_conversion(), self.raw_video_callback());
                }
            }
            if flags.audio {
                self.start_raw_audio();
            }
        }
    }

    fn end_data_capture_internal(self: &Arc<Self>, signal: bool) {
        if !self.active.load(Ordering::Acquire) || !self.data_active.load(Ordering::Acquire) {
            if signal {
                self.emit_stopped();
                *self.stop_code.lock().unwrap() = StopCode::Success;
                self.stopping_event.set();
            }
            return;
        }

        if self.delay_active.load(Ordering::Acquire) {
            self.delay_capturing.store(false, Ordering::Release);
            if self.delay_restart_refs.load(Ordering::Acquire) == 0 {
                self.delay_active.store(false, Ordering::Release);
            } else {
                // A delayed restart is pending; encoders keep running and the
                // delay buffer keeps filling across the reconnect.
                self.stopping_event.set();
                return;
            }
        }

        self.data_active.store(false, Ordering::Release);
        let drawn_frames = if !self.flags.encoded && self.flags.video {
            self.video_source.lock().unwrap().as_ref().map(|source| {
                source
                    .total_frames()
                    .saturating_sub(self.starting_frame_count.load(Ordering::Acquire))
            })
        } else {
            None
        };
        info!(
            output = self.name.as_str(),
            total_frames = self.total_frames.load(Ordering::Acquire),
            drawn_frames,
            "Output stopping"
        );

        self.spawn_end_capture_worker();

        if signal {
            self.emit_stopped();
            *self.stop_code.lock().unwrap() = StopCode::Success;
        }
    }

    fn spawn_end_capture_worker(self: &Arc<Self>) {
        if let Some(handle) = self.end_capture_worker.lock().unwrap().take() {
            let _ = handle.join();
        }

        self.end_capture_worker_active.store(true, Ordering::Release);
        let inner = self.clone();
        let handle = spawn_named(&format!("teardown thread for output {}", self.name), move || {
            inner.end_capture_body();
        });
        *self.end_capture_worker.lock().unwrap() = Some(handle);
    }

    fn end_capture_body(self: Arc<Self>) {
        let flags = self.flags;
        if flags.encoded {
            if flags.video {
                if let Some(encoder) = self.video_encoder.lock().unwrap().clone() {
                    encoder.stop();
                }
            }
            if flags.audio {
                for encoder in self.bound_audio_encoders() {
                    encoder.stop();
                }
            }
        } else {
            if flags.video {
                if let Some(source) = self.video_source.lock().unwrap().clone() {
                    source.disconnect();
                }
            }
            if flags.audio {
                self.stop_raw_audio();
            }
        }

        if flags.service {
            if let Some(service) = self.service.lock().unwrap().clone() {
                service.deactivate();
                service.binding().set_active(false);
            }
        }

        if self.active_delay_ns.load(Ordering::Acquire) > 0 {
            self.cleanup_delay();
        }

        self.active.store(false, Ordering::Release);
        self.emit_with(|output| Event::Deactivate { output });
        self.stopping_event.set();
        self.end_capture_worker_active.store(false, Ordering::Release);
    }

    // ------------------------------------------------------------ callbacks

    fn encoded_callback(self: &Arc<Self>, track_idx: Option<usize>) -> PacketCallback {
        let weak = Arc::downgrade(self);
        Arc::new(move |mut packet: EncoderPacket| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if let Some(track_idx) = track_idx {
                packet.track_idx = track_idx;
            }
            inner.on_encoded_packet(packet);
        })
    }

    fn on_encoded_packet(self: &Arc<Self>, packet: EncoderPacket) {
        if self.active_delay_ns.load(Ordering::Acquire) > 0 {
            self.process_delay(packet);
        } else {
            self.terminal_packet(packet);
        }
    }

    fn terminal_packet(self: &Arc<Self>, packet: EncoderPacket) {
        if self.flags.video && self.flags.audio {
            self.interleave_packet(packet);
        } else {
            self.default_encoded_packet(packet);
        }
    }

    fn interleave_packet(&self, packet: EncoderPacket) {
        if !self.active.load(Ordering::Acquire) {
            return;
        }
        let mut interleaved = self.interleaved.lock().unwrap();
        if let Some(ready) = interleaved.push(packet) {
            self.send_interleaved(ready);
        }
    }

    fn send_interleaved(&self, mut packet: EncoderPacket) {
        if packet.kind == PacketKind::Video {
            self.total_frames.fetch_add(1, Ordering::AcqRel);
            self.captions.lock().unwrap().inject(&mut packet);
        }
        if let Some(sink) = self.sink.lock().unwrap().as_mut() {
            sink.encoded_packet(&packet);
        }
    }

    fn default_encoded_packet(&self, packet: EncoderPacket) {
        if !self.data_active.load(Ordering::Acquire) {
            return;
        }
        if let Some(sink) = self.sink.lock().unwrap().as_mut() {
            sink.encoded_packet(&packet);
        }
        if packet.kind == PacketKind::Video {
            self.total_frames.fetch_add(1, Ordering::AcqRel);
        }
    }

    fn raw_video_callback(self: &Arc<Self>) -> RawVideoCallback {
        let weak = Arc::downgrade(self);
        Arc::new(move |frame: &RawVideoFrame| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner.on_raw_video(frame);
        })
    }

    fn on_raw_video(&self, frame: &RawVideoFrame) {
        if self.pause.video_pause_check(frame.timestamp) {
            return;
        }
        if self.data_active.load(Ordering::Acquire) {
            if let Some(sink) = self.sink.lock().unwrap().as_mut() {
                sink.raw_video(frame);
            }
        }
        self.total_frames.fetch_add(1, Ordering::AcqRel);
    }

    fn first_mixer(&self) -> usize {
        let mask = self.mixer_mask.load(Ordering::Acquire);
        (0..MAX_AUDIO_TRACKS).find(|idx| mask & (1 << idx) != 0).unwrap_or(0)
    }

    fn start_raw_audio(self: &Arc<Self>) {
        let Some(source) = self.audio_source.lock().unwrap().clone() else {
            return;
        };
        if let Some(sample_rate) = self.raw_sample_rate() {
            self.sample_rate.store(sample_rate, Ordering::Release);
        }
        let conversion = self.audio_conversion.lock().unwrap().clone();

        let weak = Arc::downgrade(self);
        let callback: RawAudioCallback = Arc::new(move |mix_idx, frame| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner.on_raw_audio(mix_idx, frame);
        });

        if self.flags.multi_track {
            let mask = self.mixer_mask.load(Ordering::Acquire);
            for idx in 0..MAX_AUDIO_TRACKS {
                if mask & (1 << idx) != 0 {
                    source.connect(idx, conversion, callback.clone());
                }
            }
        } else {
            source.connect(self.first_mixer(), conversion, callback);
        }
    }

    fn stop_raw_audio(&self) {
        let Some(source) = self.audio_source.lock().unwrap().clone() else {
            return;
        };
        if self.flags.multi_track {
            let mask = self.mixer_mask.load(Ordering::Acquire);
            for idx in 0..MAX_AUDIO_TRACKS {
                if mask & (1 << idx) != 0 {
                    source.disconnect(idx);
                }
            }
        } else {
            source.disconnect(self.first_mixer());
        }
    }

    /// Audio that predates the first video frame is trimmed so both raw
    /// streams share a start point.
    fn prepare_audio(&self, frame: &RawAudioFrame) -> Option<RawAudioFrame> {
        if !self.flags.video {
            return Some(frame.clone());
        }

        if self.video_start_ts.load(Ordering::Acquire) == 0 {
            let last_video_ts = self.pause.last_video_ts();
            if last_video_ts == 0 {
                return None;
            }
            let _ = self.video_start_ts.compare_exchange(
                0,
                last_video_ts,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }

        let video_start = self.video_start_ts.load(Ordering::Acquire);
        let mut out = frame.clone();
        if out.timestamp < video_start {
            let sample_rate = self.sample_rate.load(Ordering::Acquire);
            let duration = frames_to_ns(out.frames as u64, sample_rate);
            if out.timestamp + duration <= video_start {
                return None;
            }

            let cutoff_ns = video_start - out.timestamp;
            let cutoff_frames =
                (cutoff_ns as u128 * sample_rate.max(1) as u128 / 1_000_000_000) as u32;
            let bytes_per_frame = if out.frames > 0 {
                out.data.len() / out.frames as usize
            } else {
                0
            };
            let cutoff_bytes = (cutoff_frames as usize * bytes_per_frame).min(out.data.len());
            out.data = out.data.slice(cutoff_bytes..);
            out.frames = out.frames.saturating_sub(cutoff_frames);
            out.timestamp += cutoff_ns;
        }
        Some(out)
    }

    fn on_raw_audio(&self, mix_idx: usize, frame: &RawAudioFrame) {
        if !self.data_active.load(Ordering::Acquire) {
            return;
        }
        let Some(mut out) = self.prepare_audio(frame) else {
            return;
        };
        if self.pause.audio_pause_check(out.timestamp) {
            return;
        }

        let _ = self.audio_start_ts.compare_exchange(
            0,
            out.timestamp,
            Ordering::AcqRel,
            Ordering::Acquire,
        );

        // Frames dropped by the pause filter are excluded from the emitted
        // clock; adding the accumulated pause offset keeps audio aligned
        // with the untouched video timestamps.
        let sample_rate = self.sample_rate.load(Ordering::Acquire);
        let emitted = self.total_audio_frames.fetch_add(out.frames as u64, Ordering::AcqRel);
        out.timestamp = self.audio_start_ts.load(Ordering::Acquire)
            + frames_to_ns(emitted, sample_rate)
            + self.pause.offset_ns();

        if let Some(sink) = self.sink.lock().unwrap().as_mut() {
            sink.raw_audio(mix_idx, &out);
        }
    }

    // ----------------------------------------------------------------- pause

    fn encoded_pause(&self, pause: bool) -> bool {
        let Some(video) = self.video_encoder.lock().unwrap().clone() else {
            return false;
        };
        let audios = self.bound_audio_encoders();

        // Video's pause mutex first, then every audio encoder's; all held
        // until the decision applies to the whole set.
        let video_tracker = video.pause();
        let mut video_guard = video_tracker.lock_data();
        let audio_trackers: Vec<&PauseTracker> = audios.iter().map(|enc| enc.pause()).collect();
        let mut audio_guards: Vec<_> = audio_trackers.iter().map(|t| t.lock_data()).collect();

        let closest =
            closest_video_ts(video_guard.last_video_ts, now_ns(), video.frame_interval_ns());

        if pause {
            if !video_guard.can_begin() || audio_guards.iter().any(|g| !g.can_begin()) {
                return false;
            }
            video_tracker.set_paused(true);
            video_guard.ts_start = closest;
            for (tracker, guard) in audio_trackers.iter().zip(audio_guards.iter_mut()) {
                tracker.set_paused(true);
                guard.ts_start = closest;
            }
        } else {
            if !video_guard.can_end() || audio_guards.iter().any(|g| !g.can_end()) {
                return false;
            }
            video_tracker.set_paused(false);
            video_guard.end_at(closest);
            for (tracker, guard) in audio_trackers.iter().zip(audio_guards.iter_mut()) {
                tracker.set_paused(false);
                guard.end_at(closest);
            }
        }
        true
    }

    fn raw_pause(&self, pause: bool) -> bool {
        let interval = self
            .video_source
            .lock()
            .unwrap()
            .as_ref()
            .map(|source| source.frame_interval_ns())
            .unwrap_or(0);

        let mut guard = self.pause.lock_data();
        let closest = closest_video_ts(guard.last_video_ts, now_ns(), interval);
        if pause {
            if !guard.can_begin() {
                return false;
            }
            guard.ts_start = closest;
            self.pause.set_paused(true);
        } else {
            if !guard.can_end() {
                return false;
            }
            guard.end_at(closest);
            self.pause.set_paused(false);
        }
        true
    }

    // ------------------------------------------------------------- reconnect

    fn reconnect(self: &Arc<Self>) {
        let delay_msec;
        {
            let mut backoff = self.backoff.lock().unwrap();
            if !self.reconnecting.load(Ordering::Acquire) {
                *backoff = Backoff::new(
                    self.reconnect_retry_sec.load(Ordering::Acquire),
                    self.reconnect_retry_exp,
                );
            }

            if backoff.retries() >= self.reconnect_retry_max.load(Ordering::Acquire) {
                drop(backoff);
                *self.stop_code.lock().unwrap() = StopCode::Disconnected;
                self.reconnecting.store(false, Ordering::Release);
                if self.delay_active.load(Ordering::Acquire) {
                    self.delay_active.store(false, Ordering::Release);
                }
                self.end_data_capture_internal(true);
                return;
            }

            if !self.reconnecting.load(Ordering::Acquire) {
                self.reconnecting.store(true, Ordering::Release);
                self.reconnect_stop_event.reset();
            }
            delay_msec = backoff.next_delay_msec();
        }

        *self.stop_code.lock().unwrap() = StopCode::Disconnected;

        self.reconnect_worker_active.store(true, Ordering::Release);
        let inner = self.clone();
        let handle = spawn_named(
            &format!("reconnect thread for output {}", self.name),
            move || inner.reconnect_body(delay_msec),
        );
        *self.reconnect_worker.lock().unwrap() = Some(handle);

        info!(
            output = self.name.as_str(),
            "Reconnecting in {:.02} seconds..",
            delay_msec as f64 / 1000.0
        );
        self.emit_with(|output| Event::Reconnect {
            output,
            timeout_sec: delay_msec / 1000,
        });
    }

    fn reconnect_body(self: Arc<Self>, delay_msec: u64) {
        let cancelled = self
            .reconnect_stop_event
            .wait_timeout(Duration::from_millis(delay_msec));
        if !cancelled {
            // The teardown worker from the disconnect may still be mid-flight;
            // the restart must not race its `active` transition.
            let teardown = self.end_capture_worker.lock().unwrap().take();
            if let Some(handle) = teardown {
                let _ = handle.join();
            }
            self.actual_start();
        }

        if self.reconnect_stop_event.is_set() {
            self.reconnecting.store(false, Ordering::Release);
        }
        self.reconnect_worker_active.store(false, Ordering::Release);
    }
}

impl Drop for OutputInner {
    fn drop(&mut self) {
        if self.active.load(Ordering::Acquire) {
            warn!(output = self.name.as_str(), "Output dropped while still active");
        }
        debug!(output = self.name.as_str(), "Output destroyed");
    }
}

fn merge_settings(base: &mut Value, apply: &Value) {
    match (base, apply) {
        (Value::Object(base_map), Value::Object(apply_map)) => {
            for (key, value) in apply_map {
                let mergeable = value.is_object()
                    && base_map.get(key).map(Value::is_object).unwrap_or(false);
                if mergeable {
                    if let Some(existing) = base_map.get_mut(key) {
                        merge_settings(existing, value);
                    }
                } else {
                    base_map.insert(key.clone(), value.clone());
                }
            }
        }
        (base, apply) => *base = apply.clone(),
    }
}

#[cfg(test)]
mod tests;
