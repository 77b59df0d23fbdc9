use crate::packet::EncoderPacket;
use crate::types::{PacketKind, MAX_AUDIO_TRACKS};

/// Merges per-track encoder streams into one DTS-ordered stream.
///
/// Encoder clocks start at arbitrary offsets, so nothing is released until
/// the first packet of every track has been observed. At that point the
/// buffer head is pruned to the closest audio/video pair, per-track offsets
/// are captured, and everything is rebased so each track starts at zero.
/// After alignment a packet is released only once a packet of the opposing
/// kind with a higher timestamp is buffered, which keeps emission monotonic
/// even though tracks arrive on independent threads.
#[derive(Debug)]
pub(crate) struct Interleaver {
    packets: Vec<EncoderPacket>,
    received_video: bool,
    received_audio: bool,
    highest_video_ts: i64,
    highest_audio_ts: i64,
    video_offset: i64,
    audio_offsets: [i64; MAX_AUDIO_TRACKS],
    audio_tracks: usize,
}

impl Interleaver {
    pub fn new(audio_tracks: usize) -> Self {
        Self {
            packets: Vec::new(),
            received_video: false,
            received_audio: false,
            highest_video_ts: 0,
            highest_audio_ts: 0,
            video_offset: 0,
            audio_offsets: [0; MAX_AUDIO_TRACKS],
            audio_tracks,
        }
    }

    pub fn reset(&mut self, audio_tracks: usize) {
        *self = Self::new(audio_tracks);
    }

    pub fn video_offset(&self) -> i64 {
        self.video_offset
    }

    pub fn audio_offset(&self, track: usize) -> i64 {
        self.audio_offsets[track]
    }

    /// Accepts one packet from an encoder callback and returns the packet
    /// that became ready for the sink, if any.
    pub fn push(&mut self, mut packet: EncoderPacket) -> Option<EncoderPacket> {
        // Until a keyframe arrives there is nothing a sink could decode, so
        // leading video and any audio that precedes it are dropped.
        if packet.kind == PacketKind::Video && !self.received_video && !packet.keyframe {
            self.discard_before_usec(packet.dts_usec);
            return None;
        }

        let was_started = self.received_audio && self.received_video;
        if was_started {
            let offset = self.offset_for(&packet);
            packet.apply_offset(offset);
        } else {
            match packet.kind {
                PacketKind::Video => self.received_video = true,
                PacketKind::Audio => self.received_audio = true,
            }
        }

        let (kind, dts_usec) = (packet.kind, packet.dts_usec);
        self.insert_sorted(packet);
        self.record_high_ts(kind, dts_usec);

        if !(self.received_audio && self.received_video) {
            return None;
        }

        if was_started {
            return self.pop_ready();
        }

        if self.prune_start_packets() && self.initialize_offsets() {
            self.resort();
            return self.pop_ready();
        }
        None
    }

    fn offset_for(&self, packet: &EncoderPacket) -> i64 {
        match packet.kind {
            PacketKind::Video => self.video_offset,
            PacketKind::Audio => self.audio_offsets[packet.track_idx],
        }
    }

    /// Leftmost slot that keeps the buffer ordered by `dts_usec`, video
    /// ahead of audio on ties.
    fn insert_sorted(&mut self, packet: EncoderPacket) {
        let idx = self
            .packets
            .iter()
            .position(|cur| {
                packet.dts_usec < cur.dts_usec
                    || (packet.dts_usec == cur.dts_usec && packet.kind == PacketKind::Video)
            })
            .unwrap_or(self.packets.len());
        self.packets.insert(idx, packet);
    }

    fn record_high_ts(&mut self, kind: PacketKind, dts_usec: i64) {
        match kind {
            PacketKind::Video => self.highest_video_ts = self.highest_video_ts.max(dts_usec),
            PacketKind::Audio => self.highest_audio_ts = self.highest_audio_ts.max(dts_usec),
        }
    }

    fn first_idx(&self, kind: PacketKind, track: usize) -> Option<usize> {
        self.packets
            .iter()
            .position(|p| p.kind == kind && (kind == PacketKind::Video || p.track_idx == track))
    }

    fn last_idx(&self, kind: PacketKind, track: usize) -> Option<usize> {
        self.packets
            .iter()
            .rposition(|p| p.kind == kind && (kind == PacketKind::Video || p.track_idx == track))
    }

    fn discard_to(&mut self, idx: usize) {
        self.packets.drain(..idx);
    }

    fn discard_before_usec(&mut self, dts_usec: i64) {
        let idx = self
            .packets
            .iter()
            .position(|p| p.dts_usec >= dts_usec)
            .unwrap_or(self.packets.len());
        if idx > 0 {
            self.discard_to(idx);
        }
    }

    /// How far the buffer head must be discarded before alignment. `None`
    /// means a required first packet is missing; the received flag for that
    /// stream has been reset and the caller waits for more data.
    fn premature_cutoff(&mut self) -> Option<usize> {
        let Some(video_idx) = self.first_idx(PacketKind::Video, 0) else {
            self.received_video = false;
            return None;
        };
        let video_usec = self.packets[video_idx].dts_usec;
        let frame_usec = self.packets[video_idx].timebase.tick_duration_usec();

        let mut max_idx = video_idx;
        let mut max_diff = 0;
        for track in 0..self.audio_tracks {
            let Some(audio_idx) = self.first_idx(PacketKind::Audio, track) else {
                self.received_audio = false;
                return None;
            };
            max_idx = max_idx.max(audio_idx);
            max_diff = max_diff.max((self.packets[audio_idx].dts_usec - video_usec).abs());
        }

        Some(if max_diff > frame_usec { max_idx + 1 } else { 0 })
    }

    /// Index of the point where audio and video are closest together.
    fn closest_pair_idx(&self) -> usize {
        let Some(video_idx) = self.first_idx(PacketKind::Video, 0) else {
            return 0;
        };
        let video_usec = self.packets[video_idx].dts_usec;

        let mut closest_idx = 0;
        let mut closest_diff = i64::MAX;
        for (idx, packet) in self.packets.iter().enumerate() {
            if packet.kind != PacketKind::Audio {
                continue;
            }
            let diff = (packet.dts_usec - video_usec).abs();
            if diff < closest_diff {
                closest_diff = diff;
                closest_idx = idx;
            }
        }

        video_idx.min(closest_idx)
    }

    fn prune_start_packets(&mut self) -> bool {
        let start_idx = match self.premature_cutoff() {
            None => return false,
            Some(0) => self.closest_pair_idx(),
            Some(cutoff) => cutoff,
        };
        if start_idx > 0 {
            self.discard_to(start_idx);
        }
        true
    }

    fn collect_firsts(&mut self) -> Option<(usize, Vec<usize>)> {
        let video_idx = match self.first_idx(PacketKind::Video, 0) {
            Some(idx) => idx,
            None => {
                self.received_video = false;
                return None;
            }
        };
        let mut audio_idxs = Vec::with_capacity(self.audio_tracks);
        for track in 0..self.audio_tracks {
            match self.first_idx(PacketKind::Audio, track) {
                Some(idx) => audio_idxs.push(idx),
                None => {
                    self.received_audio = false;
                    return None;
                }
            }
        }
        Some((video_idx, audio_idxs))
    }

    /// Captures per-track rebase offsets and applies them to the whole
    /// buffer. Fails (resetting the received flags) when a track cannot be
    /// aligned yet, e.g. no audio past the first video packet.
    fn initialize_offsets(&mut self) -> bool {
        let Some((video_idx, _)) = self.collect_firsts() else {
            return false;
        };
        let video_usec = self.packets[video_idx].dts_usec;

        // Every track needs audio reaching past the first video packet,
        // otherwise the closest-pair decision would be premature.
        for track in 0..self.audio_tracks {
            let Some(last_idx) = self.last_idx(PacketKind::Audio, track) else {
                self.received_audio = false;
                return false;
            };
            if self.packets[last_idx].dts_usec < video_usec {
                self.received_audio = false;
                return false;
            }
        }

        let start_idx = self.closest_pair_idx();
        if start_idx > 0 {
            self.discard_to(start_idx);
        }
        let Some((video_idx, audio_idxs)) = self.collect_firsts() else {
            return false;
        };

        self.video_offset = self.packets[video_idx].pts;
        for (track, &idx) in audio_idxs.iter().enumerate() {
            self.audio_offsets[track] = self.packets[idx].dts;
        }

        self.highest_video_ts -= self.packets[video_idx].dts_usec;
        if !audio_idxs.is_empty() {
            self.highest_audio_ts -= self.packets[audio_idxs[0]].dts_usec;
        }

        let video_offset = self.video_offset;
        let audio_offsets = self.audio_offsets;
        for packet in &mut self.packets {
            let offset = match packet.kind {
                PacketKind::Video => video_offset,
                PacketKind::Audio => audio_offsets[packet.track_idx],
            };
            packet.apply_offset(offset);
        }
        true
    }

    /// Rebasing shifts tracks by different amounts, so the insertion order
    /// can change; rebuild the buffer through the same insertion rule.
    fn resort(&mut self) {
        let old = std::mem::take(&mut self.packets);
        for packet in old {
            self.insert_sorted(packet);
        }
    }

    /// Releases the head packet only when a packet of the opposing kind with
    /// a higher timestamp is buffered; an earlier packet of the other kind
    /// can no longer arrive.
    fn pop_ready(&mut self) -> Option<EncoderPacket> {
        let head = self.packets.first()?;
        let has_higher_opposing = match head.kind {
            PacketKind::Video => self.highest_audio_ts > head.dts_usec,
            PacketKind::Audio => self.highest_video_ts > head.dts_usec,
        };
        if !has_higher_opposing {
            return None;
        }
        Some(self.packets.remove(0))
    }
}
