use std::process::{Child, ExitStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tracing::warn;

use crate::error::{DotsmithError, Result};

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_sigint(_: i32) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Install the SIGINT handler once, at process start. Children run in their
/// own process groups, so the orchestrator decides when a hook sees the
/// interrupt.
pub fn install_interrupt_handler() {
    use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet};
    let action = SigAction::new(
        SigHandler::Handler(handle_sigint),
        SaFlags::empty(),
        SigSet::empty(),
    );
    unsafe {
        if let Err(e) = sigaction(Signal::SIGINT, &action) {
            warn!("failed to install SIGINT handler: {}", e);
        }
    }
}

pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

fn signal_group(child: &Child, signal: Signal) {
    let pgid = Pid::from_raw(child.id() as i32);
    if let Err(e) = killpg(pgid, signal) {
        warn!("failed to signal process group {}: {}", pgid, e);
    }
}

/// Block on a child spawned in its own process group, honouring the global
/// interrupt flag and an optional deadline. On interrupt the signal is
/// propagated to the child's group; on deadline expiry the group is killed.
pub fn wait_child(
    child: &mut Child,
    what: &str,
    deadline: Option<Duration>,
) -> Result<ExitStatus> {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }

        if interrupted() {
            signal_group(child, Signal::SIGINT);
            let _ = child.wait();
            return Err(DotsmithError::Interrupted);
        }

        if let Some(limit) = deadline {
            if start.elapsed() > limit {
                signal_group(child, Signal::SIGKILL);
                let _ = child.wait();
                return Err(DotsmithError::Deadline {
                    what: what.to_string(),
                    seconds: limit.as_secs(),
                });
            }
        }

        std::thread::sleep(Duration::from_millis(50));
    }
}
