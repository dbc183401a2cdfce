//! Session, capture and synchronization layer for the Chamelium display
//! capture appliance.
//!
//! The Chamelium is an external box that emulates display sinks (EDID,
//! hotplug) and captures the pixels and audio a GPU actually scans out. This
//! crate drives it over the blocking XML-RPC transport in `chamelium-rpc`
//! and layers on the parts that need care:
//!
//! - a [`Chamelium`] session owning the configured capture ports and every
//!   EDID uploaded during its lifetime, with idempotent teardown that always
//!   leaves the rack's ports plugged (see [`register_exit_cleanup`]);
//! - the hotplug side-channel monitor ([`monitor::FsmMonitor`]): some
//!   port-scoped RPC calls make the appliance autonomously replug its port
//!   mid-call, which the host sees as a spontaneous hotplug event. The
//!   monitor watches for it concurrently with the blocking call and toggles
//!   the local connector off/on to keep host and appliance in sync;
//! - frame/CRC capture and comparison, including a local implementation of
//!   the appliance's pixel checksum so locally rendered framebuffers can be
//!   checked against captured video without shipping pixels both ways.
//!
//! The local DRM/KMS stack is reached only through the [`DutDisplay`] trait,
//! so everything here is testable against fakes.

mod audio;
mod capture;
mod config;
pub mod crc;
mod dut;
mod error;
pub mod frame;
pub mod monitor;
mod port;
mod session;

pub use audio::{AudioFile, AudioFormat, MAX_AUDIO_CHANNELS};
pub use capture::Rect;
pub use config::{ChameliumConfig, ConfigError, PortMapping};
pub use crc::{calculate_fb_crc, Crc, FbCrcJob, MAX_CRC_WORDS};
pub use dut::{ConnectorInfo, ConnectorKind, DpmsMode, DutDisplay, HotplugWatch};
pub use error::ChameliumError;
pub use frame::{set_frame_dump_path, FrameDump, XrgbFrame};
pub use port::Port;
pub use session::{register_exit_cleanup, Chamelium, EdidId};
