//! Hotplug side-channel monitor.
//!
//! Several port-scoped appliance calls (plugging, EDID changes, capture
//! setup, resolution detection) make the appliance autonomously unplug and
//! replug its own side of the cable while the RPC is still in flight. The
//! DUT sees that as a spontaneous hotplug event, and unless the host reacts,
//! its view of the link drifts out of sync with the appliance's.
//!
//! The fix mirrors the appliance's firmware state machine from a dedicated
//! thread: wait for the hotplug event concurrently with the blocking call,
//! then toggle the local connector's DPMS off and back on to force a clean
//! link retrain. The session arms the watch strictly before issuing the RPC
//! so an early event cannot be lost, and always cancels and joins the
//! monitor after the call returns.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::dut::{DpmsMode, DutDisplay, HotplugWatch};

/// How long the monitor waits for the appliance-triggered hotplug before
/// concluding the call did not replug the port.
const HOTPLUG_TIMEOUT: Duration = Duration::from_secs(60);

/// Wait slice between cancellation checks. The watch blocks for at most this
/// long, so a cancel request is honored promptly without busy-waiting.
const POLL_SLICE: Duration = Duration::from_millis(20);

/// Cooperative cancellation flag shared between the session and the monitor
/// thread. Once the monitor has seen the hotplug event it stops checking the
/// token: the DPMS off/on toggle always runs to completion so the connector
/// is never left dark.
#[derive(Debug, Default)]
pub struct CancelToken {
    requested: AtomicBool,
}

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
}

/// A running firmware-state-machine monitor for one connector.
pub struct FsmMonitor {
    thread: thread::JoinHandle<()>,
    token: Arc<CancelToken>,
}

impl FsmMonitor {
    /// Spawns the monitor. `watch` must already be armed; ownership moves to
    /// the monitor thread, which drops it (releasing the underlying event
    /// source) when the thread finishes.
    pub fn spawn(
        dut: Arc<dyn DutDisplay>,
        connector_id: u32,
        watch: Box<dyn HotplugWatch>,
    ) -> io::Result<FsmMonitor> {
        let token = Arc::new(CancelToken::new());
        let thread_token = Arc::clone(&token);
        let thread = thread::Builder::new()
            .name("chamelium-fsm".to_string())
            .spawn(move || run(dut, connector_id, watch, thread_token))?;
        Ok(FsmMonitor { thread, token })
    }

    /// Requests cancellation and waits for the monitor to finish. After this
    /// returns, the hotplug watch has been released.
    pub fn cancel_and_join(self) {
        self.token.request();
        if self.thread.join().is_err() {
            tracing::warn!("fsm monitor thread panicked");
        }
    }
}

fn run(
    dut: Arc<dyn DutDisplay>,
    connector_id: u32,
    mut watch: Box<dyn HotplugWatch>,
    token: Arc<CancelToken>,
) {
    let deadline = Instant::now() + HOTPLUG_TIMEOUT;
    loop {
        if token.is_requested() {
            tracing::debug!(connector_id, "fsm monitor cancelled before hotplug");
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            tracing::warn!(connector_id, "timed out waiting for appliance hotplug");
            return;
        }
        let slice = POLL_SLICE.min(deadline - now);
        match watch.poll(slice) {
            Ok(true) => break,
            Ok(false) => {}
            Err(err) => {
                tracing::warn!(connector_id, error = %err, "hotplug watch failed");
                return;
            }
        }
    }

    // Event seen. From here the toggle must complete even if cancellation
    // was requested in the meantime, so the token is deliberately not
    // checked again.
    tracing::debug!(connector_id, "appliance replugged its port, retraining link");
    if let Err(err) = dut.set_dpms(connector_id, DpmsMode::Off) {
        tracing::warn!(connector_id, error = %err, "dpms off failed");
    }
    if let Err(err) = dut.set_dpms(connector_id, DpmsMode::On) {
        tracing::warn!(connector_id, error = %err, "dpms on failed");
    }
}
