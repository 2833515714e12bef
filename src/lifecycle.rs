//! Idle/lifecycle supervisor (C7, §4.6): tracks last-activity and, past a configured
//! threshold, notifies the browser and replaces the current process image.
//!
//! Grounded on the original bridge's `idle_monitor` background thread / `restart_server`
//! pair, reshaped as a single `tokio` task that polls every 10s instead of a daemon
//! thread sleeping in a loop.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::state::AppState;
use crate::wire::OutboundMessage;

const POLL_INTERVAL: Duration = Duration::from_secs(10);
const PRE_RESTART_DELAY: Duration = Duration::from_secs(3);

/// Runs forever, ticking every 10s. Never returns unless the process is replaced, in
/// which case it never returns either — `restart` only comes back on failure.
pub async fn run(state: Arc<AppState>) {
    loop {
        tokio::time::sleep(POLL_INTERVAL).await;

        let config = state.config.read().clone();
        if !config.enable_idle_restart {
            continue;
        }
        let threshold = config.idle_restart_timeout_seconds;
        if threshold == -1 {
            continue;
        }

        let idle = state.idle_seconds();
        if idle > threshold {
            info!(idle, threshold, "idle threshold exceeded, restarting");
            restart(&state).await;
        }
    }
}

/// Best-effort notifies the browser to reload, waits briefly for the message to land on
/// the wire, then replaces this process with a fresh invocation of the same program.
async fn restart(state: &Arc<AppState>) {
    if state.multiplexer.send(&OutboundMessage::reconnect()).is_err() {
        warn!("idle restart: could not notify browser, not connected");
    } else {
        info!("idle restart: sent reconnect command to browser");
    }

    tokio::time::sleep(PRE_RESTART_DELAY).await;
    info!("idle restart: replacing process image");
    exec_self();
}

#[cfg(unix)]
fn exec_self() {
    use std::os::unix::process::CommandExt;

    let exe = match std::env::current_exe() {
        Ok(exe) => exe,
        Err(e) => {
            warn!(error = %e, "idle restart: could not resolve current executable, aborting restart");
            return;
        }
    };
    let args: Vec<String> = std::env::args().skip(1).collect();
    let err = std::process::Command::new(exe).args(args).exec();
    // exec() only returns on failure; a success replaces this process entirely.
    warn!(error = %err, "idle restart: exec failed, process continues running");
}

#[cfg(not(unix))]
fn exec_self() {
    warn!("idle restart is only implemented on unix; ignoring");
}
