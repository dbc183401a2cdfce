#![forbid(unsafe_code)]

//! Blocking XML-RPC client for the Chamelium capture appliance.
//!
//! The appliance speaks plain XML-RPC over HTTP: one `<methodCall>` per
//! request, one `<methodResponse>` (value or fault) per reply. This crate
//! keeps the transport deliberately dumb: it marshals a method name plus a
//! positional, typed argument list, blocks for the full round trip, and
//! exposes the raw fault state for inspection. There is no client-side
//! timeout at this layer; bounding wall-clock exposure during anomalous
//! appliance behaviour is the caller's job (see the hotplug monitor in the
//! `chamelium` crate).

mod client;
mod value;
pub mod wire;

pub use client::{Client, MAX_RESPONSE_SIZE};
pub use value::{Arg, Fault, RpcError, Value};
