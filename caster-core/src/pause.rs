use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Pause window for one stream of timestamps.
///
/// `ts_end == 0` means the stream is either currently paused or was never
/// paused. Ending a pause adds the window length to `ts_offset`, which
/// accumulates over repeated pause cycles.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct PauseData {
    pub ts_start: u64,
    pub ts_end: u64,
    pub ts_offset: u64,
    pub last_video_ts: u64,
}

impl PauseData {
    pub fn can_begin(&self) -> bool {
        self.ts_start == 0 && self.ts_end == 0
    }

    pub fn can_end(&self) -> bool {
        self.ts_start != 0 && self.ts_end == 0
    }

    pub fn end_at(&mut self, ts: u64) {
        if self.ts_end == 0 {
            self.ts_end = ts;
            self.ts_offset += self.ts_end - self.ts_start;
        }
    }
}

/// Shared pause state consulted by raw-frame callbacks and encoder loops.
#[derive(Debug, Default)]
pub struct PauseTracker {
    data: Mutex<PauseData>,
    paused: AtomicBool,
}

impl PauseTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn lock_data(&self) -> MutexGuard<'_, PauseData> {
        self.data.lock().unwrap()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub(crate) fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    pub fn offset_ns(&self) -> u64 {
        self.lock_data().ts_offset
    }

    pub fn last_video_ts(&self) -> u64 {
        self.lock_data().last_video_ts
    }

    /// Clears all pause state for a fresh capture cycle.
    pub fn reset(&self) {
        let mut data = self.lock_data();
        *data = PauseData::default();
        drop(data);
        self.set_paused(false);
    }

    /// Records the frame timestamp and reports whether the frame falls inside
    /// the pause window and must be dropped. A frame at or past the window
    /// end closes the window.
    pub fn video_pause_check(&self, timestamp: u64) -> bool {
        let mut data = self.lock_data();
        let mut ignore_frame = false;

        if data.ts_start != 0 {
            if data.ts_end != 0 && timestamp >= data.ts_end {
                data.ts_start = 0;
                data.ts_end = 0;
            } else if timestamp >= data.ts_start {
                ignore_frame = true;
            }
        }

        data.last_video_ts = timestamp;
        ignore_frame
    }

    /// Reports whether an audio batch starting at `timestamp` falls inside
    /// the pause window. Audio never closes the window; the video stream
    /// owns that transition.
    pub fn audio_pause_check(&self, timestamp: u64) -> bool {
        let data = self.lock_data();
        data.ts_start != 0
            && timestamp >= data.ts_start
            && (data.ts_end == 0 || timestamp < data.ts_end)
    }
}

/// Snaps `now` to the video frame grid anchored at `last_video_ts`, at least
/// two frame intervals ahead so in-flight frames are not cut.
pub(crate) fn closest_video_ts(last_video_ts: u64, now: u64, interval: u64) -> u64 {
    if interval == 0 {
        return now;
    }
    let i2 = interval * 2;
    last_video_ts + (now.saturating_sub(last_video_ts) + i2) / interval * interval
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantizes_to_future_frame_boundary() {
        let last = 1_000_000_000;
        let interval = 33_333_333;
        let ts = closest_video_ts(last, 1_050_000_000, interval);

        assert_eq!(ts, last + 3 * interval);
        assert!(ts > 1_050_000_000);
        assert_eq!((ts - last) % interval, 0);
    }

    #[test]
    fn offset_accumulates_over_pause_cycles() {
        let tracker = PauseTracker::new();
        {
            let mut data = tracker.lock_data();
            assert!(data.can_begin());
            data.ts_start = 100;
        }
        {
            let mut data = tracker.lock_data();
            assert!(data.can_end());
            data.end_at(400);
            assert_eq!(data.ts_offset, 300);
        }

        // Window clears once video passes the end, allowing a second cycle.
        assert!(tracker.video_pause_check(200));
        assert!(!tracker.video_pause_check(400));
        {
            let mut data = tracker.lock_data();
            assert!(data.can_begin());
            data.ts_start = 500;
            data.end_at(600);
            assert_eq!(data.ts_offset, 400);
        }
    }

    #[test]
    fn video_frames_inside_window_are_dropped() {
        let tracker = PauseTracker::new();
        tracker.lock_data().ts_start = 1_000;

        assert!(!tracker.video_pause_check(999));
        assert!(tracker.video_pause_check(1_000));
        assert!(tracker.video_pause_check(5_000));
        assert_eq!(tracker.last_video_ts(), 5_000);

        tracker.lock_data().end_at(6_000);
        assert!(tracker.video_pause_check(5_999));
        assert!(!tracker.video_pause_check(6_000));
        // Window is gone; later frames pass.
        assert!(!tracker.video_pause_check(7_000));
    }

    #[test]
    fn audio_skips_inside_window_without_closing_it() {
        let tracker = PauseTracker::new();
        tracker.lock_data().ts_start = 1_000;

        assert!(!tracker.audio_pause_check(500));
        assert!(tracker.audio_pause_check(1_500));

        tracker.lock_data().end_at(2_000);
        assert!(tracker.audio_pause_check(1_999));
        assert!(!tracker.audio_pause_check(2_000));
        // Still set until video closes it.
        assert!(tracker.audio_pause_check(1_500));
    }
}
