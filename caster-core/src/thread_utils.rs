use std::sync::{Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{span, Level};

/// Manual-reset event: once set it stays set until explicitly reset, and
/// every waiter (current and future) observes it.
#[derive(Debug)]
pub(crate) struct ManualResetEvent {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl ManualResetEvent {
    pub fn new(signaled: bool) -> Self {
        Self {
            signaled: Mutex::new(signaled),
            cond: Condvar::new(),
        }
    }

    pub fn set(&self) {
        let mut signaled = self.signaled.lock().unwrap();
        *signaled = true;
        self.cond.notify_all();
    }

    pub fn reset(&self) {
        *self.signaled.lock().unwrap() = false;
    }

    pub fn is_set(&self) -> bool {
        *self.signaled.lock().unwrap()
    }

    pub fn wait(&self) {
        let mut signaled = self.signaled.lock().unwrap();
        while !*signaled {
            signaled = self.cond.wait(signaled).unwrap();
        }
    }

    /// Waits until the event is set or `timeout` elapses. Returns `true` if
    /// the event was set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut signaled = self.signaled.lock().unwrap();
        while !*signaled {
            let now = std::time::Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, result) = self.cond.wait_timeout(signaled, deadline - now).unwrap();
            signaled = guard;
            if result.timed_out() && !*signaled {
                return false;
            }
        }
        true
    }
}

pub(crate) fn spawn_named<F>(name: &str, body: F) -> JoinHandle<()>
where
    F: FnOnce() + Send + 'static,
{
    let span_name = name.to_string();
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let _span = span!(Level::INFO, "Worker", thread = span_name.as_str()).entered();
            body()
        })
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn wait_timeout_reports_cancellation() {
        let event = Arc::new(ManualResetEvent::new(false));
        assert!(!event.wait_timeout(Duration::from_millis(10)));

        let waiter = event.clone();
        let handle = spawn_named("event waiter", move || {
            assert!(waiter.wait_timeout(Duration::from_secs(5)));
        });
        event.set();
        handle.join().unwrap();
        assert!(event.is_set());

        event.reset();
        assert!(!event.is_set());
    }
}
