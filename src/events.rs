use tracing::{debug, error, info, warn};

/// Structured events emitted by the core. Presentation (colourised TTY,
/// JSON, plain) is an external concern; observers decide what to do with
/// each event.
#[derive(Debug, Clone)]
pub enum Event {
    /// Outcome of the execution decision function for one module.
    Decision {
        module: String,
        action: String,
        reason: String,
    },
    /// One file-level action taken (or planned, in dry-run) by the deployer.
    Deploy {
        module: String,
        dest: String,
        action: String,
    },
    HookStart {
        module: String,
        phase: String,
    },
    HookEnd {
        module: String,
        phase: String,
        success: bool,
    },
    Warn {
        module: String,
        message: String,
    },
    Fail {
        module: String,
        message: String,
    },
}

pub trait Observer {
    fn event(&self, event: &Event);
}

/// Default observer: forwards everything to `tracing`.
pub struct TracingObserver {
    pub verbose: bool,
}

impl Observer for TracingObserver {
    fn event(&self, event: &Event) {
        match event {
            Event::Decision {
                module,
                action,
                reason,
            } => {
                if self.verbose {
                    info!("{}: {} ({})", module, action, reason);
                } else {
                    debug!("{}: {} ({})", module, action, reason);
                }
            }
            Event::Deploy {
                module,
                dest,
                action,
            } => {
                if self.verbose {
                    info!("{}: {} {}", module, action, dest);
                } else {
                    debug!("{}: {} {}", module, action, dest);
                }
            }
            Event::HookStart { module, phase } => debug!("{}: running {} hook", module, phase),
            Event::HookEnd {
                module,
                phase,
                success,
            } => {
                if *success {
                    debug!("{}: {} hook finished", module, phase);
                } else {
                    warn!("{}: {} hook failed", module, phase);
                }
            }
            Event::Warn { module, message } => warn!("{}: {}", module, message),
            Event::Fail { module, message } => error!("{}: {}", module, message),
        }
    }
}

/// Discards everything; for tests that only care about return values.
pub struct NullObserver;

impl Observer for NullObserver {
    fn event(&self, _event: &Event) {}
}

/// Collects events for inspection in tests.
#[derive(Default)]
pub struct CollectingObserver {
    pub events: std::sync::Mutex<Vec<Event>>,
}

impl Observer for CollectingObserver {
    fn event(&self, event: &Event) {
        self.events.lock().unwrap().push(event.clone());
    }
}
