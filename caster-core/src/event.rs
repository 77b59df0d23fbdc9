use std::sync::Mutex;

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::Serialize;

use crate::types::StopCode;

/// Lifecycle notifications emitted by outputs. Subscribers receive every
/// event for every output sharing the emitter; the `output` field carries the
/// output name.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    Starting { output: String },
    Started { output: String },
    Stopping { output: String },
    Stopped { output: String, code: StopCode, last_error: Option<String> },
    Activate { output: String },
    Deactivate { output: String },
    Reconnect { output: String, timeout_sec: u64 },
    ReconnectSuccess { output: String },
    Pause { output: String },
    Unpause { output: String },
    Writing { output: String },
    Wrote { output: String },
    WritingError { output: String },
}

/// Fan-out bus for [`Event`]s. The emitter is injected into each output at
/// creation; tests subscribe a recording receiver.
#[derive(Debug, Default)]
pub struct EventEmitter {
    subscribers: Mutex<Vec<Sender<Event>>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<Event> {
        let (sender, receiver) = unbounded();
        self.subscribers.lock().unwrap().push(sender);
        receiver
    }

    pub fn emit(&self, event: Event) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|sender| sender.send(event.clone()).is_ok());
    }
}
