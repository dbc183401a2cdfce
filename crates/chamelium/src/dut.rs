//! Interface boundary to the device under test's display stack.
//!
//! The DRM/KMS helpers are an external collaborator; the session only ever
//! touches the local GPU through [`DutDisplay`], which keeps the whole crate
//! runnable against fakes in tests and keeps libdrm plumbing out of scope.

use std::fmt;
use std::io;
use std::time::Duration;

/// Physical connector type of an appliance port, parsed exactly once from
/// the appliance's `GetConnectorType` reply at session init.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectorKind {
    DisplayPort,
    HdmiA,
    Vga,
    Unknown,
}

impl ConnectorKind {
    /// Maps the appliance's connector-type string. Anything unrecognized is
    /// [`ConnectorKind::Unknown`], which session init treats as a hard
    /// configuration error.
    pub fn from_appliance(s: &str) -> ConnectorKind {
        match s {
            "DP" => ConnectorKind::DisplayPort,
            "HDMI" => ConnectorKind::HdmiA,
            "VGA" => ConnectorKind::Vga,
            _ => ConnectorKind::Unknown,
        }
    }

    /// The DRM connector type string used when synthesizing connector names.
    pub fn as_type_str(self) -> &'static str {
        match self {
            ConnectorKind::DisplayPort => "DP",
            ConnectorKind::HdmiA => "HDMI-A",
            ConnectorKind::Vga => "VGA",
            ConnectorKind::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ConnectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_type_str())
    }
}

/// One connector as reported by the local display stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorInfo {
    pub connector_id: u32,
    pub kind: ConnectorKind,
    pub type_instance: u32,
    pub connected: bool,
}

impl ConnectorInfo {
    /// Synthesized connector name, `<TypeString>-<instance>` (`DP-1`,
    /// `HDMI-A-1`). Configuration entries are matched against this by exact
    /// string equality.
    pub fn name(&self) -> String {
        format!("{}-{}", self.kind.as_type_str(), self.type_instance)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DpmsMode {
    On,
    Off,
}

/// An armed hotplug-event watch.
///
/// Implementations must buffer events from the moment the watch is created:
/// the monitor arms the watch strictly before the RPC call that can trigger
/// the appliance's internal replug is issued, and an event arriving before
/// the first [`HotplugWatch::poll`] must not be lost.
pub trait HotplugWatch: Send {
    /// Waits up to `timeout` for a hotplug event; `Ok(true)` when one
    /// arrived.
    fn poll(&mut self, timeout: Duration) -> io::Result<bool>;
}

/// The local GPU/display stack.
pub trait DutDisplay: Send + Sync {
    fn connectors(&self) -> io::Result<Vec<ConnectorInfo>>;

    /// Live state of one connector, optionally forcing a full re-detection
    /// cycle instead of the current cached state.
    fn connector(&self, connector_id: u32, reprobe: bool) -> io::Result<ConnectorInfo>;

    fn set_dpms(&self, connector_id: u32, mode: DpmsMode) -> io::Result<()>;

    fn watch_hotplug(&self) -> io::Result<Box<dyn HotplugWatch>>;
}
