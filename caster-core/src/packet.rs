use bytes::Bytes;

use crate::types::{PacketKind, Timebase};

/// One compressed audio or video access unit.
///
/// `dts_usec` is derived from `dts` and must be refreshed whenever `dts`
/// changes; it is the only field the interleaver compares across tracks,
/// since each track carries its own timebase.
#[derive(Debug, Clone)]
pub struct EncoderPacket {
    pub kind: PacketKind,
    pub track_idx: usize,
    pub pts: i64,
    pub dts: i64,
    pub timebase: Timebase,
    pub dts_usec: i64,
    pub keyframe: bool,
    pub priority: i32,
    pub data: Bytes,
}

impl EncoderPacket {
    pub fn new(
        kind: PacketKind,
        pts: i64,
        dts: i64,
        timebase: Timebase,
        keyframe: bool,
        data: Bytes,
    ) -> Self {
        debug_assert!(dts <= pts, "dts must not exceed pts");
        Self {
            kind,
            track_idx: 0,
            pts,
            dts,
            timebase,
            dts_usec: timebase.ticks_to_usec(dts),
            keyframe,
            priority: 0,
            data,
        }
    }

    pub fn refresh_dts_usec(&mut self) {
        self.dts_usec = self.timebase.ticks_to_usec(self.dts);
    }

    /// Shifts both timestamps by the per-track rebase offset so the stream
    /// starts at zero.
    pub(crate) fn apply_offset(&mut self, offset: i64) {
        self.dts -= offset;
        self.pts -= offset;
        self.refresh_dts_usec();
    }

    /// Presentation time of this packet in seconds.
    pub fn pts_seconds(&self) -> f64 {
        self.timebase.ticks_to_seconds(self.pts)
    }
}
