use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::output::{Output, WeakOutput};

/// Network endpoint metadata for streaming sinks. A service is bound to at
/// most one output at a time; binding it elsewhere detaches the previous
/// output.
pub trait Service: Send + Sync {
    fn name(&self) -> &str;

    /// Called before the sink starts; returning `false` aborts the start.
    fn initialize(&self, output: &Output) -> bool;

    fn activate(&self);
    fn deactivate(&self);

    fn url(&self) -> String;

    fn key(&self) -> String {
        String::new()
    }

    fn binding(&self) -> &ServiceBinding;
}

/// Weak back-pointer from a service to the output it feeds. Weak in both
/// directions with the output holding the strong reference, so neither side
/// can keep the other alive.
pub struct ServiceBinding {
    output: Mutex<WeakOutput>,
    active: AtomicBool,
}

impl Default for ServiceBinding {
    fn default() -> Self {
        Self {
            output: Mutex::new(WeakOutput::new()),
            active: AtomicBool::new(false),
        }
    }
}

impl ServiceBinding {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bound_output(&self) -> Option<Output> {
        self.output.lock().unwrap().upgrade()
    }

    pub(crate) fn bind(&self, output: WeakOutput) {
        *self.output.lock().unwrap() = output;
    }

    pub(crate) fn unbind(&self) {
        *self.output.lock().unwrap() = WeakOutput::new();
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }
}

impl std::fmt::Debug for ServiceBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceBinding")
            .field("active", &self.is_active())
            .field("bound", &self.bound_output().is_some())
            .finish()
    }
}
