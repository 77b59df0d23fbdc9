use std::collections::VecDeque;

use crate::packet::EncoderPacket;

/// Behavior of the delay window when the sink disconnects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DelayFlags {
    /// Keep buffered packets across a reconnect instead of flushing them.
    pub preserve_on_disconnect: bool,
}

/// Entries scheduled through the delay window. Start and stop markers ride
/// the same queue as packets so lifecycle transitions keep their place in
/// the timeline.
#[derive(Debug)]
pub(crate) enum DelayEvent {
    Packet(EncoderPacket),
    Start,
    Stop(u64),
}

#[derive(Debug, Default)]
pub(crate) struct DelayBuffer {
    entries: VecDeque<(u64, DelayEvent)>,
}

impl DelayBuffer {
    pub fn push(&mut self, now: u64, event: DelayEvent) {
        self.entries.push_back((now, event));
    }

    /// Removes and returns every entry that has aged past `delay_ns`.
    pub fn drain_ready(&mut self, now: u64, delay_ns: u64) -> Vec<DelayEvent> {
        let mut ready = Vec::new();
        while self
            .entries
            .front()
            .is_some_and(|(inserted, _)| now.saturating_sub(*inserted) >= delay_ns)
        {
            if let Some((_, event)) = self.entries.pop_front() {
                ready.push(event);
            }
        }
        ready
    }

    pub fn flush(&mut self) -> usize {
        let flushed = self.entries.len();
        self.entries.clear();
        flushed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Age of the oldest buffered entry, i.e. how much stream time is
    /// currently held back.
    pub fn buffered_ns(&self, now: u64) -> u64 {
        self.entries
            .front()
            .map(|(inserted, _)| now.saturating_sub(*inserted))
            .unwrap_or(0)
    }
}
