//! The Chamelium session: connection, port control, EDID management and
//! teardown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Once};

use chamelium_rpc::{Arg, Client, Value};

use crate::config::{ChameliumConfig, ConfigError};
use crate::dut::{ConnectorInfo, DutDisplay};
use crate::error::ChameliumError;
use crate::monitor::FsmMonitor;
use crate::port::{resolve_ports, Port};

/// Handle to an EDID blob uploaded to the appliance. The session tracks
/// every live handle and destroys them all at [`Chamelium::close`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdidId(i32);

impl EdidId {
    pub fn raw(self) -> i32 {
        self.0
    }
}

/// A connected appliance session.
///
/// All RPC goes through a single blocking client behind a mutex, so calls
/// from concurrent test threads serialize instead of interleaving on the
/// wire. The port registry is fixed at connect time.
pub struct Chamelium {
    client: Mutex<Client>,
    dut: Arc<dyn DutDisplay>,
    ports: Vec<Port>,
    edids: Mutex<Vec<EdidId>>,
    capturing_port: Mutex<Option<i32>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for Chamelium {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chamelium")
            .field("ports", &self.ports)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl Chamelium {
    /// Connects to the appliance named by `config` and resolves every
    /// configured port mapping against the DUT's connectors.
    pub fn connect(
        config: &ChameliumConfig,
        dut: Arc<dyn DutDisplay>,
    ) -> Result<Chamelium, ChameliumError> {
        let mut client =
            Client::new(&config.url).map_err(ChameliumError::in_call("connect"))?;
        tracing::debug!(url = %config.url, "connecting to chamelium");
        let ports = resolve_ports(&mut client, dut.as_ref(), config)?;
        Ok(Chamelium {
            client: Mutex::new(client),
            dut,
            ports,
            edids: Mutex::new(Vec::new()),
            capturing_port: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// Connects using the rig configuration named by `CHAMELIUM_CONFIG`.
    /// An absent configuration means this machine has no appliance cabled
    /// up, which is `Ok(None)` rather than an error; a present but broken
    /// configuration still fails.
    pub fn from_default_config(
        dut: Arc<dyn DutDisplay>,
    ) -> Result<Option<Chamelium>, ChameliumError> {
        match ChameliumConfig::load_default() {
            Ok(config) => Ok(Some(Chamelium::connect(&config, dut)?)),
            Err(ConfigError::Missing) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub fn ports(&self) -> &[Port] {
        &self.ports
    }

    pub fn port_by_name(&self, name: &str) -> Option<&Port> {
        self.ports.iter().find(|p| p.name() == name)
    }

    /// Current DUT-side state of the connector a port is cabled to.
    pub fn port_connector(
        &self,
        port: &Port,
        reprobe: bool,
    ) -> Result<ConnectorInfo, ChameliumError> {
        Ok(self.dut.connector(port.connector_id(), reprobe)?)
    }

    /// Issues one RPC call. When `fsm_port` is set the call is expected to
    /// trigger the appliance's autonomous replug of that port, so a monitor
    /// is spawned for the cabled connector and torn down again afterwards.
    ///
    /// The hotplug watch is armed before the call is sent: the replug can
    /// land before the RPC reply does, and an unarmed watch would miss it.
    pub(crate) fn rpc(
        &self,
        fsm_port: Option<&Port>,
        method: &str,
        args: &[Arg],
    ) -> Result<Value, ChameliumError> {
        let monitor = match fsm_port {
            Some(port) => {
                let watch = self.dut.watch_hotplug()?;
                Some(FsmMonitor::spawn(
                    Arc::clone(&self.dut),
                    port.connector_id(),
                    watch,
                )?)
            }
            None => None,
        };

        let result = {
            let mut client = match self.client.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            client.call(method, args)
        };

        if let Some(monitor) = monitor {
            monitor.cancel_and_join();
        }
        result.map_err(ChameliumError::in_call(method))
    }

    // Port control.

    pub fn plug(&self, port: &Port) -> Result<(), ChameliumError> {
        tracing::debug!(port = %port.name(), "plugging");
        self.rpc(None, "Plug", &[Arg::Int(port.id())])?;
        Ok(())
    }

    pub fn unplug(&self, port: &Port) -> Result<(), ChameliumError> {
        tracing::debug!(port = %port.name(), "unplugging");
        self.rpc(None, "Unplug", &[Arg::Int(port.id())])?;
        Ok(())
    }

    pub fn is_plugged(&self, port: &Port) -> Result<bool, ChameliumError> {
        self.rpc(None, "IsPlugged", &[Arg::Int(port.id())])?
            .as_bool()
            .map_err(ChameliumError::in_call("IsPlugged"))
    }

    /// Waits until the appliance sees a stable video signal on the port.
    /// The appliance may replug the port while probing, hence the monitor.
    pub fn wait_video_input_stable(
        &self,
        port: &Port,
        timeout_secs: i32,
    ) -> Result<bool, ChameliumError> {
        self.rpc(
            Some(port),
            "WaitVideoInputStable",
            &[Arg::Int(port.id()), Arg::Int(timeout_secs)],
        )?
        .as_bool()
        .map_err(ChameliumError::in_call("WaitVideoInputStable"))
    }

    /// Fires `count` HPD pulses of equal assert/deassert width.
    pub fn fire_hpd_pulses(
        &self,
        port: &Port,
        width_msec: i32,
        count: i32,
    ) -> Result<(), ChameliumError> {
        let widths = vec![width_msec; (count as usize) * 2];
        self.fire_mixed_hpd_pulses(port, &widths)
    }

    /// Fires a pulse train with explicit per-edge widths in milliseconds,
    /// alternating deassert/assert starting from deassert.
    pub fn fire_mixed_hpd_pulses(
        &self,
        port: &Port,
        widths_msec: &[i32],
    ) -> Result<(), ChameliumError> {
        let widths: Vec<Arg> = widths_msec.iter().map(|&w| Arg::Int(w)).collect();
        self.rpc(
            None,
            "FireMixedHpdPulses",
            &[Arg::Int(port.id()), Arg::Array(widths)],
        )?;
        Ok(())
    }

    /// Schedules a single HPD edge `delay_ms` from now. Used to exercise
    /// hotplug handling during suspend, when the DUT cannot issue RPC.
    pub fn schedule_hpd_toggle(
        &self,
        port: &Port,
        delay_ms: i32,
        rising_edge: bool,
    ) -> Result<(), ChameliumError> {
        self.rpc(
            None,
            "ScheduleHpdToggle",
            &[
                Arg::Int(port.id()),
                Arg::Int(delay_ms),
                Arg::Int(rising_edge as i32),
            ],
        )?;
        Ok(())
    }

    pub fn set_ddc_state(&self, port: &Port, enabled: bool) -> Result<(), ChameliumError> {
        tracing::debug!(port = %port.name(), enabled, "setting ddc state");
        self.rpc(
            None,
            "SetDdcState",
            &[Arg::Int(port.id()), Arg::Bool(enabled)],
        )?;
        Ok(())
    }

    pub fn ddc_state(&self, port: &Port) -> Result<bool, ChameliumError> {
        self.rpc(None, "IsDdcEnabled", &[Arg::Int(port.id())])?
            .as_bool()
            .map_err(ChameliumError::in_call("IsDdcEnabled"))
    }

    // EDID management.

    /// Uploads an EDID blob and records the handle for teardown.
    pub fn new_edid(&self, edid: &[u8]) -> Result<EdidId, ChameliumError> {
        let id = self
            .rpc(None, "CreateEdid", &[Arg::Blob(edid.to_vec())])?
            .as_int()
            .map_err(ChameliumError::in_call("CreateEdid"))?;
        let id = EdidId(id);
        match self.edids.lock() {
            Ok(mut edids) => edids.push(id),
            Err(poisoned) => poisoned.into_inner().push(id),
        }
        Ok(id)
    }

    /// Applies an uploaded EDID to a port; `None` restores the appliance's
    /// default EDID for that port.
    pub fn port_set_edid(
        &self,
        port: &Port,
        edid: Option<EdidId>,
    ) -> Result<(), ChameliumError> {
        let raw = edid.map_or(0, EdidId::raw);
        self.rpc(None, "ApplyEdid", &[Arg::Int(port.id()), Arg::Int(raw)])?;
        Ok(())
    }

    pub fn destroy_edid(&self, edid: EdidId) -> Result<(), ChameliumError> {
        self.rpc(None, "DestroyEdid", &[Arg::Int(edid.raw())])?;
        match self.edids.lock() {
            Ok(mut edids) => edids.retain(|&e| e != edid),
            Err(poisoned) => poisoned.into_inner().retain(|&e| e != edid),
        }
        Ok(())
    }

    /// Resets the appliance to a clean state with every port plugged.
    pub fn reset(&self) -> Result<(), ChameliumError> {
        tracing::debug!("resetting chamelium");
        self.rpc(None, "Reset", &[])?;
        Ok(())
    }

    /// Tears the session down: resets the appliance, replugs every
    /// configured port and destroys every EDID uploaded through this
    /// session. Idempotent; errors are logged rather than propagated so a
    /// half-dead appliance cannot wedge teardown.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!("closing chamelium session");

        if let Err(err) = self.reset() {
            tracing::warn!(error = %err, "reset during close failed");
        }
        for port in &self.ports {
            if let Err(err) = self.plug(port) {
                tracing::warn!(port = %port.name(), error = %err, "replug during close failed");
            }
        }
        let edids: Vec<EdidId> = {
            let mut guard = match self.edids.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            std::mem::take(&mut *guard)
        };
        for edid in edids {
            if let Err(err) = self.rpc(None, "DestroyEdid", &[Arg::Int(edid.raw())]) {
                tracing::warn!(edid = edid.raw(), error = %err, "destroying edid during close failed");
            }
        }
    }

    pub(crate) fn note_capturing_port(&self, port_id: i32) {
        match self.capturing_port.lock() {
            Ok(mut guard) => *guard = Some(port_id),
            Err(poisoned) => *poisoned.into_inner() = Some(port_id),
        }
    }

    pub(crate) fn capturing_port_id(&self) -> Option<i32> {
        match self.capturing_port.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

static EXIT_SESSION: Mutex<Option<Arc<Chamelium>>> = Mutex::new(None);
static EXIT_HOOK: Once = Once::new();

extern "C" fn run_exit_cleanup() {
    let session = match EXIT_SESSION.lock() {
        Ok(mut guard) => guard.take(),
        Err(poisoned) => poisoned.into_inner().take(),
    };
    if let Some(session) = session {
        session.close();
    }
}

/// Registers `session` to be closed when the process exits, replacing (and
/// closing) any previously registered session. A process talks to one rack
/// at a time, so one slot suffices.
pub fn register_exit_cleanup(session: &Arc<Chamelium>) {
    EXIT_HOOK.call_once(|| {
        // SAFETY: run_exit_cleanup is a plain extern "C" fn that touches
        // only the static slot above.
        unsafe {
            libc::atexit(run_exit_cleanup);
        }
    });
    let previous = {
        let mut guard = match EXIT_SESSION.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.replace(Arc::clone(session))
    };
    if let Some(previous) = previous {
        if !Arc::ptr_eq(&previous, session) {
            previous.close();
        }
    }
}
