use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use tracing::debug;

use crate::packet::EncoderPacket;

mod sei;

use self::sei::{parity_valid, user_data_sei, Cea708, NAL_START_CODE};

pub(crate) const DEFAULT_DISPLAY_DURATION: f64 = 2.0;

#[derive(Debug)]
struct CaptionText {
    text: String,
    display_duration: f64,
}

/// Caption inputs for one output: a queue of text lines and a queue of raw
/// CEA-708 byte triples. Injection happens on the video emit path, so both
/// queues and the pacing timestamps live behind the output's caption mutex.
#[derive(Debug, Default)]
pub(crate) struct CaptionQueue {
    text: VecDeque<CaptionText>,
    cc_data: VecDeque<[u8; 3]>,
    /// When the currently displayed text caption stops displaying.
    caption_timestamp: f64,
    /// Last frame timestamp that carried raw cc_data.
    last_caption_timestamp: f64,
}

impl CaptionQueue {
    pub fn push_text(&mut self, text: &str, display_duration: f64) {
        self.text.push_back(CaptionText {
            text: text.to_string(),
            display_duration,
        });
    }

    pub fn push_cc_data(&mut self, triples: &[[u8; 3]]) {
        self.cc_data.extend(triples.iter().copied());
    }

    pub fn clear_text(&mut self) {
        self.text.clear();
    }

    /// Called when a new capture cycle starts; pending raw data from the
    /// previous session is stale, queued text lines are kept.
    pub fn reset_for_start(&mut self) {
        self.caption_timestamp = 0.0;
        self.cc_data.clear();
    }

    /// Appends a caption SEI to a video packet when one is due. Raw cc_data
    /// takes precedence over text; text waits until the previous line has
    /// finished displaying.
    pub fn inject(&mut self, packet: &mut EncoderPacket) {
        if packet.priority > 1 {
            return;
        }

        let frame_timestamp = packet.pts_seconds();

        if !self.cc_data.is_empty() {
            if self.last_caption_timestamp < frame_timestamp {
                self.last_caption_timestamp = frame_timestamp;
                if let Some(sei_nal) = self.render_cc_data() {
                    append_sei(packet, &sei_nal);
                }
            }
        } else if let Some(head) = self.text.front() {
            if self.caption_timestamp <= frame_timestamp {
                debug!(
                    timestamp = frame_timestamp,
                    text = head.text.as_str(),
                    "Sending caption"
                );
                let display_duration = head.display_duration;

                let mut cea708 = Cea708::new();
                for word in sei::text_to_cc_words(&head.text) {
                    cea708.add_cc_data(0, word);
                }
                append_sei(packet, &user_data_sei(&cea708.render()));

                self.text.pop_front();
                self.caption_timestamp = frame_timestamp + display_duration;
            }
        }
    }

    /// Drains the raw triple queue into a CEA-708 frame, keeping only valid
    /// CEA-608 field-1 words.
    fn render_cc_data(&mut self) -> Option<Bytes> {
        let mut cea708 = Cea708::new();
        while let Some(triple) = self.cc_data.pop_front() {
            if triple[0] & 0x3 != 0 {
                continue;
            }
            let word = ((triple[1] as u16) << 8) | triple[2] as u16;
            if word == 0x8080 || word == 0 {
                continue;
            }
            if !parity_valid(word) {
                continue;
            }
            cea708.add_cc_data(triple[0] & 0x3, word);
        }

        if cea708.is_empty() {
            None
        } else {
            Some(user_data_sei(&cea708.render()))
        }
    }
}

/// The SEI goes after the packet's existing payload with an Annex B start
/// code. Splicing it between the parameter sets and the first VCL NAL would
/// be stricter; downstream muxers accept the trailing form.
fn append_sei(packet: &mut EncoderPacket, sei_nal: &[u8]) {
    let mut data = BytesMut::with_capacity(packet.data.len() + NAL_START_CODE.len() + sei_nal.len());
    data.extend_from_slice(&packet.data);
    data.extend_from_slice(&NAL_START_CODE);
    data.extend_from_slice(sei_nal);
    packet.data = data.freeze();
}
