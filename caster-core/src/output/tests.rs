use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam_channel::Receiver;
use serde_json::{json, Value};

use crate::prelude::*;

// ---------------------------------------------------------------- doubles

#[derive(Default)]
struct SinkLog {
    starts: u32,
    stops: Vec<u64>,
    packets: Vec<EncoderPacket>,
    video_frames: Vec<u64>,
    audio_frames: Vec<(usize, u64)>,
    updates: Vec<Value>,
}

struct TestSink {
    flags: OutputFlags,
    weak: WeakOutput,
    log: Arc<Mutex<SinkLog>>,
    fail_next_starts: Arc<AtomicU32>,
    /// Report a successful connection synchronously from `start`, the way a
    /// file sink does. Network sinks call `begin_data_capture` later from
    /// their own thread; tests drive that case by hand.
    auto_capture: bool,
    signal_on_stop: bool,
}

impl Sink for TestSink {
    fn flags(&self) -> OutputFlags {
        self.flags
    }

    fn start(&mut self) -> bool {
        self.log.lock().unwrap().starts += 1;
        if self.fail_next_starts.load(Ordering::Acquire) > 0 {
            self.fail_next_starts.fetch_sub(1, Ordering::AcqRel);
            return false;
        }
        if self.auto_capture {
            if let Some(output) = self.weak.upgrade() {
                return output.begin_data_capture();
            }
        }
        true
    }

    fn stop(&mut self, end_ts: u64) {
        self.log.lock().unwrap().stops.push(end_ts);
        if self.signal_on_stop {
            if let Some(output) = self.weak.upgrade() {
                output.signal_stop(StopCode::Success);
            }
        }
    }

    fn encoded_packet(&mut self, packet: &EncoderPacket) {
        self.log.lock().unwrap().packets.push(packet.clone());
    }

    fn raw_video(&mut self, frame: &RawVideoFrame) {
        self.log.lock().unwrap().video_frames.push(frame.timestamp);
    }

    fn raw_audio(&mut self, mix_idx: usize, frame: &RawAudioFrame) {
        self.log.lock().unwrap().audio_frames.push((mix_idx, frame.timestamp));
    }

    fn update(&mut self, settings: &Value) {
        self.log.lock().unwrap().updates.push(settings.clone());
    }
}

struct TestEncoder {
    kind: PacketKind,
    timebase: Timebase,
    frame_interval_ns: u64,
    active: AtomicBool,
    callback: Mutex<Option<PacketCallback>>,
    pause: PauseTracker,
    pairing: PairingState,
    last_error: Mutex<Option<String>>,
}

impl TestEncoder {
    fn video() -> Arc<Self> {
        Arc::new(Self {
            kind: PacketKind::Video,
            timebase: Timebase::new(1, 30),
            frame_interval_ns: 33_333_333,
            active: AtomicBool::new(false),
            callback: Mutex::new(None),
            pause: PauseTracker::new(),
            pairing: PairingState::new(),
            last_error: Mutex::new(None),
        })
    }

    fn audio() -> Arc<Self> {
        Arc::new(Self {
            kind: PacketKind::Audio,
            timebase: Timebase::new(1, 1000),
            frame_interval_ns: 0,
            active: AtomicBool::new(false),
            callback: Mutex::new(None),
            pause: PauseTracker::new(),
            pairing: PairingState::new(),
            last_error: Mutex::new(None),
        })
    }

    fn produce(&self, dts: i64, keyframe: bool) {
        let callback = self.callback.lock().unwrap().clone();
        if let Some(callback) = callback {
            callback(EncoderPacket::new(
                self.kind,
                dts,
                dts,
                self.timebase,
                keyframe,
                Bytes::from_static(&[0x65, 0x88]),
            ));
        }
    }

    fn has_callback(&self) -> bool {
        self.callback.lock().unwrap().is_some()
    }
}

impl Encoder for TestEncoder {
    fn name(&self) -> &str {
        "test encoder"
    }
    fn kind(&self) -> PacketKind {
        self.kind
    }
    fn timebase(&self) -> Timebase {
        self.timebase
    }
    fn start(&self, callback: PacketCallback) -> bool {
        *self.callback.lock().unwrap() = Some(callback);
        self.active.store(true, Ordering::Release);
        true
    }
    fn stop(&self) {
        self.callback.lock().unwrap().take();
        self.active.store(false, Ordering::Release);
        self.pairing.clear();
    }
    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
    fn pause(&self) -> &PauseTracker {
        &self.pause
    }
    fn pairing(&self) -> &PairingState {
        &self.pairing
    }
    fn last_error(&self) -> Option<String> {
        self.last_error.lock().unwrap().clone()
    }
    fn frame_interval_ns(&self) -> u64 {
        self.frame_interval_ns
    }
}

#[derive(Default)]
struct ServiceLog {
    initialized: u32,
    activated: u32,
    deactivated: u32,
}

struct TestService {
    accept: bool,
    log: Mutex<ServiceLog>,
    binding: ServiceBinding,
}

impl TestService {
    fn new(accept: bool) -> Arc<Self> {
        Arc::new(Self {
            accept,
            log: Mutex::new(ServiceLog::default()),
            binding: ServiceBinding::new(),
        })
    }
}

impl Service for TestService {
    fn name(&self) -> &str {
        "test service"
    }
    fn initialize(&self, _output: &Output) -> bool {
        self.log.lock().unwrap().initialized += 1;
        self.accept
    }
    fn activate(&self) {
        self.log.lock().unwrap().activated += 1;
    }
    fn deactivate(&self) {
        self.log.lock().unwrap().deactivated += 1;
    }
    fn url(&self) -> String {
        "rtmp://ingest.example/live".to_string()
    }
    fn binding(&self) -> &ServiceBinding {
        &self.binding
    }
}

struct TestVideoSource {
    callback: Mutex<Option<RawVideoCallback>>,
}

impl TestVideoSource {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            callback: Mutex::new(None),
        })
    }

    fn push(&self, timestamp: u64) {
        let callback = self.callback.lock().unwrap().clone();
        if let Some(callback) = callback {
            callback(&RawVideoFrame {
                timestamp,
                data: Bytes::new(),
            });
        }
    }

    fn connected(&self) -> bool {
        self.callback.lock().unwrap().is_some()
    }
}

impl RawVideoSource for TestVideoSource {
    fn connect(&self, _conversion: Option<VideoConversion>, callback: RawVideoCallback) {
        *self.callback.lock().unwrap() = Some(callback);
    }
    fn disconnect(&self) {
        self.callback.lock().unwrap().take();
    }
    fn frame_interval_ns(&self) -> u64 {
        1_000_000
    }
}

struct TestAudioSource {
    callbacks: Mutex<HashMap<usize, RawAudioCallback>>,
}

impl TestAudioSource {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            callbacks: Mutex::new(HashMap::new()),
        })
    }

    fn push(&self, mix_idx: usize, timestamp: u64, frames: u32) {
        let callback = self.callbacks.lock().unwrap().get(&mix_idx).cloned();
        if let Some(callback) = callback {
            callback(
                mix_idx,
                &RawAudioFrame {
                    timestamp,
                    frames,
                    data: Bytes::from(vec![0u8; frames as usize * 4]),
                },
            );
        }
    }
}

impl RawAudioSource for TestAudioSource {
    fn connect(&self, mix_idx: usize, _conversion: Option<AudioConversion>, callback: RawAudioCallback) {
        self.callbacks.lock().unwrap().insert(mix_idx, callback);
    }
    fn disconnect(&self, mix_idx: usize) {
        self.callbacks.lock().unwrap().remove(&mix_idx);
    }
    fn sample_rate(&self) -> u32 {
        48_000
    }
}

// ----------------------------------------------------------------- helpers

struct Fixture {
    output: Output,
    log: Arc<Mutex<SinkLog>>,
    events: Receiver<Event>,
    fail_next_starts: Arc<AtomicU32>,
}

fn build_output(flags: OutputFlags, auto_capture: bool, signal_on_stop: bool) -> Fixture {
    let emitter = Arc::new(EventEmitter::new());
    let events = emitter.subscribe();
    let log = Arc::new(Mutex::new(SinkLog::default()));
    let fail_next_starts = Arc::new(AtomicU32::new(0));

    let sink_log = log.clone();
    let sink_fail = fail_next_starts.clone();
    let output = Output::new(
        OutputOptions {
            name: "stream".to_string(),
            settings: json!({ "bitrate": 6000 }),
        },
        emitter,
        move |weak, _settings| {
            Ok(Box::new(TestSink {
                flags,
                weak,
                log: sink_log,
                fail_next_starts: sink_fail,
                auto_capture,
                signal_on_stop,
            }))
        },
    )
    .unwrap();

    Fixture {
        output,
        log,
        events,
        fail_next_starts,
    }
}

fn encoded_flags() -> OutputFlags {
    OutputFlags {
        video: true,
        audio: true,
        encoded: true,
        can_pause: true,
        ..Default::default()
    }
}

fn raw_flags() -> OutputFlags {
    OutputFlags {
        video: true,
        audio: true,
        can_pause: true,
        ..Default::default()
    }
}

fn bind_encoders(output: &Output) -> (Arc<TestEncoder>, Arc<TestEncoder>) {
    let video = TestEncoder::video();
    let audio = TestEncoder::audio();
    output.set_video_encoder(video.clone()).unwrap();
    output.set_audio_encoder(0, audio.clone()).unwrap();
    (video, audio)
}

fn wait_for_event(events: &Receiver<Event>, pred: impl Fn(&Event) -> bool) -> Event {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let remaining = deadline
            .checked_duration_since(Instant::now())
            .expect("timed out waiting for event");
        let event = events.recv_timeout(remaining).expect("event channel closed");
        if pred(&event) {
            return event;
        }
    }
}

fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not met in time");
        std::thread::sleep(Duration::from_millis(5));
    }
}

// ------------------------------------------------------------------- tests

#[test]
fn start_flows_packets_and_stop_finalizes() {
    let fixture = build_output(encoded_flags(), true, true);
    let (video, audio) = bind_encoders(&fixture.output);

    fixture.output.start().unwrap();
    wait_for_event(&fixture.events, |e| matches!(e, Event::Started { .. }));
    assert!(fixture.output.active());
    assert_eq!(fixture.output.phase(), OutputPhase::Active);
    assert!(video.has_callback());
    assert!(audio.has_callback());

    video.produce(0, true);
    audio.produce(0, false);
    audio.produce(33, false);
    video.produce(1, false);
    audio.produce(66, false);
    video.produce(2, false);

    {
        let log = fixture.log.lock().unwrap();
        assert!(!log.packets.is_empty());
        let first = &log.packets[0];
        assert_eq!(first.kind, PacketKind::Video);
        assert_eq!(first.dts, 0);
        for pair in log.packets.windows(2) {
            assert!(pair[0].dts_usec <= pair[1].dts_usec);
        }
    }

    fixture.output.stop();
    wait_for_event(&fixture.events, |e| {
        matches!(e, Event::Stopped { code: StopCode::Success, .. })
    });

    wait_until(|| !fixture.output.active());
    wait_until(|| fixture.output.phase() == OutputPhase::Idle);
    assert_eq!(fixture.log.lock().unwrap().stops.len(), 1);
    assert!(!video.is_active());
    assert!(!audio.is_active());
}

#[test]
fn no_data_reaches_the_sink_before_capture_begins() {
    // A network-style sink: `start` succeeds but capture begins later, once
    // the connection handshake finishes.
    let fixture = build_output(encoded_flags(), false, true);
    let (video, audio) = bind_encoders(&fixture.output);

    fixture.output.start().unwrap();
    wait_for_event(&fixture.events, |e| matches!(e, Event::Starting { .. }));
    assert!(!fixture.output.active());
    assert!(!video.has_callback());

    video.produce(0, true);
    assert!(fixture.log.lock().unwrap().packets.is_empty());

    assert!(fixture.output.can_begin_data_capture());
    assert!(fixture.output.begin_data_capture());
    wait_for_event(&fixture.events, |e| matches!(e, Event::Activate { .. }));
    wait_for_event(&fixture.events, |e| matches!(e, Event::Started { .. }));

    video.produce(0, true);
    audio.produce(0, false);
    audio.produce(40, false);
    video.produce(1, false);
    wait_until(|| !fixture.log.lock().unwrap().packets.is_empty());
}

#[test]
fn disconnect_reconnects_and_recovers() {
    let fixture = build_output(encoded_flags(), true, true);
    let (video, _audio) = bind_encoders(&fixture.output);
    fixture.output.set_reconnect_settings(3, 0);

    fixture.output.start().unwrap();
    wait_for_event(&fixture.events, |e| matches!(e, Event::Started { .. }));
    assert!(video.is_active());

    fixture.output.signal_stop(StopCode::Disconnected);
    wait_for_event(&fixture.events, |e| matches!(e, Event::Reconnect { .. }));
    wait_for_event(&fixture.events, |e| matches!(e, Event::ReconnectSuccess { .. }));

    wait_until(|| fixture.log.lock().unwrap().starts == 2);
    wait_until(|| fixture.output.active() && !fixture.output.reconnecting());
}

#[test]
fn reconnect_gives_up_after_max_retries() {
    let fixture = build_output(encoded_flags(), true, true);
    bind_encoders(&fixture.output);
    fixture.output.set_reconnect_settings(1, 0);

    fixture.output.start().unwrap();
    wait_for_event(&fixture.events, |e| matches!(e, Event::Started { .. }));

    // The reconnect attempt's `start` fails; the sink then reports the
    // disconnect again, which exhausts the single allowed retry.
    fixture.fail_next_starts.store(1, Ordering::Release);
    fixture.output.signal_stop(StopCode::Disconnected);
    wait_for_event(&fixture.events, |e| matches!(e, Event::Reconnect { .. }));
    wait_until(|| fixture.log.lock().unwrap().starts == 2);

    fixture.output.signal_stop(StopCode::Disconnected);
    let stopped = wait_for_event(&fixture.events, |e| matches!(e, Event::Stopped { .. }));
    assert!(matches!(
        stopped,
        Event::Stopped { code: StopCode::Disconnected, .. }
    ));
    wait_until(|| !fixture.output.active());
}

#[test]
fn stop_during_reconnect_degrades_to_force_stop() {
    let fixture = build_output(encoded_flags(), true, true);
    bind_encoders(&fixture.output);
    // Long retry delay so the output stays in the reconnect wait.
    fixture.output.set_reconnect_settings(5, 60);

    fixture.output.start().unwrap();
    wait_for_event(&fixture.events, |e| matches!(e, Event::Started { .. }));

    fixture.output.signal_stop(StopCode::Disconnected);
    wait_for_event(&fixture.events, |e| matches!(e, Event::Reconnect { .. }));
    assert!(fixture.output.reconnecting());
    assert_eq!(fixture.output.phase(), OutputPhase::Reconnecting);

    fixture.output.stop();
    wait_for_event(&fixture.events, |e| {
        matches!(e, Event::Stopped { code: StopCode::Success, .. })
    });
    wait_until(|| !fixture.output.active());
    // The cancelled worker never called the sink again.
    assert_eq!(fixture.log.lock().unwrap().starts, 1);
}

#[test]
fn delayed_start_holds_packets_for_the_window() {
    let fixture = build_output(encoded_flags(), true, true);
    let (video, audio) = bind_encoders(&fixture.output);
    fixture.output.set_delay(1, DelayFlags::default());

    fixture.output.start().unwrap();
    wait_for_event(&fixture.events, |e| matches!(e, Event::Starting { .. }));
    assert_eq!(fixture.output.phase(), OutputPhase::DelayedStarting);
    assert!(video.has_callback(), "encoders start immediately under delay");

    video.produce(0, true);
    audio.produce(0, false);
    audio.produce(33, false);
    // The sink has not even been started yet.
    assert_eq!(fixture.log.lock().unwrap().starts, 0);
    assert_eq!(fixture.output.total_bytes(), 0);

    std::thread::sleep(Duration::from_millis(1100));
    // The next packet drains the aged start marker and the buffered packets.
    video.produce(1, false);
    wait_for_event(&fixture.events, |e| matches!(e, Event::Started { .. }));
    assert_eq!(fixture.output.phase(), OutputPhase::DelayedActive);
    wait_until(|| !fixture.log.lock().unwrap().packets.is_empty());
    {
        let log = fixture.log.lock().unwrap();
        assert_eq!(log.starts, 1);
        assert_eq!(log.packets[0].kind, PacketKind::Video);
        assert_eq!(log.packets[0].dts, 0);
    }

    // A delayed stop is queued and fires once its marker ages out.
    fixture.output.stop();
    wait_for_event(&fixture.events, |e| matches!(e, Event::Stopping { .. }));
    std::thread::sleep(Duration::from_millis(1100));
    audio.produce(66, false);
    wait_for_event(&fixture.events, |e| matches!(e, Event::Stopped { .. }));
    wait_until(|| !fixture.output.active());
}

#[test]
fn raw_pause_drops_frames_and_reclocks_audio() {
    let fixture = build_output(raw_flags(), true, true);
    let video_source = TestVideoSource::new();
    let audio_source = TestAudioSource::new();
    fixture
        .output
        .set_media(Some(video_source.clone()), Some(audio_source.clone()));

    fixture.output.start().unwrap();
    wait_for_event(&fixture.events, |e| matches!(e, Event::Started { .. }));
    assert!(video_source.connected());

    // Frame timestamps must share the clock the pause controller quantizes
    // against, otherwise the computed window never overlaps them.
    video_source.push(super::now_ns());
    audio_source.push(0, super::now_ns(), 480);
    wait_until(|| fixture.log.lock().unwrap().audio_frames.len() == 1);

    fixture.output.pause(true).unwrap();
    wait_for_event(&fixture.events, |e| matches!(e, Event::Pause { .. }));
    assert!(fixture.output.paused());
    assert_eq!(fixture.output.phase(), OutputPhase::Paused);

    std::thread::sleep(Duration::from_millis(20));
    let frames_before = fixture.log.lock().unwrap().video_frames.len();
    video_source.push(super::now_ns());
    audio_source.push(0, super::now_ns(), 480);
    assert_eq!(fixture.log.lock().unwrap().video_frames.len(), frames_before);

    fixture.output.pause(false).unwrap();
    wait_for_event(&fixture.events, |e| matches!(e, Event::Unpause { .. }));
    let offset = fixture.output.pause_offset_ns();
    assert!(offset > 0);

    std::thread::sleep(Duration::from_millis(20));
    video_source.push(super::now_ns());
    audio_source.push(0, super::now_ns(), 480);
    wait_until(|| fixture.log.lock().unwrap().audio_frames.len() == 2);

    let log = fixture.log.lock().unwrap();
    let first_ts = log.audio_frames[0].1;
    let second_ts = log.audio_frames[1].1;
    // 480 frames at 48 kHz is 10 ms of audio; the pause adds its offset on
    // top so audio stays aligned with the untouched video clock.
    assert_eq!(second_ts - first_ts, 10_000_000 + offset);
}

#[test]
fn encoded_pause_spans_all_encoders_on_the_frame_grid() {
    let fixture = build_output(encoded_flags(), true, true);
    let (video, audio) = bind_encoders(&fixture.output);

    fixture.output.start().unwrap();
    wait_for_event(&fixture.events, |e| matches!(e, Event::Started { .. }));

    fixture.output.pause(true).unwrap();
    assert!(video.pause.is_paused());
    assert!(audio.pause.is_paused());
    let video_start = video.pause.lock_data().ts_start;
    let audio_start = audio.pause.lock_data().ts_start;
    assert_eq!(video_start, audio_start);
    assert!(video_start > 0);

    // Pausing again while paused is a no-op, not an error.
    fixture.output.pause(true).unwrap();

    fixture.output.pause(false).unwrap();
    assert!(!video.pause.is_paused());
    assert_eq!(
        video.pause.lock_data().ts_offset,
        audio.pause.lock_data().ts_offset
    );
}

#[test]
fn service_lifecycle_and_binding_steal() {
    let mut flags = encoded_flags();
    flags.service = true;
    let fixture = build_output(flags, true, true);
    bind_encoders(&fixture.output);

    let service = TestService::new(true);
    fixture.output.set_service(service.clone()).unwrap();
    assert!(service.binding().bound_output().is_some());

    fixture.output.start().unwrap();
    wait_for_event(&fixture.events, |e| matches!(e, Event::Started { .. }));
    {
        let log = service.log.lock().unwrap();
        assert_eq!(log.initialized, 1);
        assert_eq!(log.activated, 1);
    }
    assert!(service.binding().is_active());

    fixture.output.stop();
    wait_for_event(&fixture.events, |e| matches!(e, Event::Deactivate { .. }));
    wait_until(|| service.log.lock().unwrap().deactivated == 1);

    // Binding the service to another output detaches this one.
    let other = build_output(encoded_flags(), true, true);
    other.output.set_service(service.clone()).unwrap();
    assert!(fixture.output.service().is_none());
    let bound = service.binding().bound_output().unwrap();
    assert!(Arc::ptr_eq(&bound.inner, &other.output.inner));
}

#[test]
fn rejected_service_blocks_start() {
    let mut flags = encoded_flags();
    flags.service = true;
    let fixture = build_output(flags, true, true);
    bind_encoders(&fixture.output);

    let service = TestService::new(false);
    fixture.output.set_service(service).unwrap();

    assert!(matches!(
        fixture.output.start(),
        Err(StartError::ServiceRejected(_))
    ));
    assert!(!fixture.output.active());
    assert_eq!(fixture.log.lock().unwrap().starts, 0);
}

#[test]
fn captions_require_an_active_output_and_reach_the_stream() {
    let fixture = build_output(encoded_flags(), true, true);
    let (video, audio) = bind_encoders(&fixture.output);

    assert!(matches!(
        fixture.output.caption_text("early"),
        Err(CaptionError::NotActive(_))
    ));

    fixture.output.start().unwrap();
    wait_for_event(&fixture.events, |e| matches!(e, Event::Started { .. }));
    fixture.output.caption_text("LIVE FROM THE STUDIO").unwrap();

    video.produce(0, true);
    audio.produce(0, false);
    audio.produce(33, false);
    video.produce(1, false);
    audio.produce(66, false);

    wait_until(|| {
        let log = fixture.log.lock().unwrap();
        log.packets
            .iter()
            .any(|p| p.kind == PacketKind::Video && p.data.windows(4).any(|w| w == b"GA94"))
    });
}

#[test]
fn update_merges_settings_and_reaches_the_sink() {
    let fixture = build_output(encoded_flags(), true, true);

    fixture.output.update(&json!({ "key": "abc" }));
    fixture.output.update(&json!({ "bitrate": 2500 }));

    let settings = fixture.output.settings();
    assert_eq!(settings["key"], "abc");
    assert_eq!(settings["bitrate"], 2500);

    let log = fixture.log.lock().unwrap();
    assert_eq!(log.updates.len(), 2);
    assert_eq!(log.updates[1]["key"], "abc");
    assert_eq!(log.updates[1]["bitrate"], 2500);
}

#[test]
fn last_error_falls_back_to_encoder_errors() {
    let fixture = build_output(encoded_flags(), true, true);
    let (video, _audio) = bind_encoders(&fixture.output);

    assert_eq!(fixture.output.last_error(), None);

    *video.last_error.lock().unwrap() = Some("x264 rejected the profile".to_string());
    assert_eq!(
        fixture.output.last_error().as_deref(),
        Some("x264 rejected the profile")
    );

    fixture
        .output
        .set_last_error(Some("sink exploded".to_string()));
    assert_eq!(fixture.output.last_error().as_deref(), Some("sink exploded"));
}

#[test]
fn binding_is_rejected_while_active() {
    let fixture = build_output(encoded_flags(), true, true);
    let (video, audio) = bind_encoders(&fixture.output);

    assert!(matches!(
        fixture.output.set_audio_encoder(3, TestEncoder::audio()),
        Err(BindError::TrackOutOfRange(_, 3))
    ));
    assert!(matches!(
        fixture.output.set_video_encoder(TestEncoder::audio()),
        Err(BindError::WrongKind(_))
    ));

    fixture.output.start().unwrap();
    wait_for_event(&fixture.events, |e| matches!(e, Event::Started { .. }));

    assert!(matches!(
        fixture.output.set_video_encoder(TestEncoder::video()),
        Err(BindError::ActiveOutput(_))
    ));
    assert!(matches!(
        fixture.output.set_preferred_size(1280, 720),
        Err(BindError::ActiveOutput(_))
    ));

    // Pairing happened at capture start.
    assert!(video.pairing.is_paired());
    assert!(audio.pairing.waits_for_video());
}

#[test]
fn start_without_sink_media_or_double_start_is_rejected() {
    let fixture = build_output(encoded_flags(), true, true);

    // Encoders missing entirely.
    assert!(!fixture.output.can_begin_data_capture());
    assert!(fixture.output.start().is_err());

    bind_encoders(&fixture.output);
    fixture.output.start().unwrap();
    wait_for_event(&fixture.events, |e| matches!(e, Event::Started { .. }));
    assert!(matches!(
        fixture.output.start(),
        Err(StartError::AlreadyActive(_))
    ));
}
