//! Port registry: the fixed set of appliance ports a session drives, built
//! once at connect time and immutable afterwards.

use chamelium_rpc::{Arg, Client};

use crate::config::ChameliumConfig;
use crate::dut::{ConnectorKind, DutDisplay};
use crate::error::ChameliumError;

/// One appliance port, bound to the DUT connector it is cabled to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Port {
    id: i32,
    kind: ConnectorKind,
    connector_id: u32,
    name: String,
}

impl Port {
    /// The appliance-side port id used in every port-scoped RPC call.
    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn kind(&self) -> ConnectorKind {
        self.kind
    }

    /// DRM connector id of the DUT connector this port is cabled to.
    pub fn connector_id(&self) -> u32 {
        self.connector_id
    }

    /// DUT-side connector name (`HDMI-A-1`), as configured.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_analog(&self) -> bool {
        self.kind == ConnectorKind::Vga
    }
}

/// Resolves every configured mapping: asks the appliance for each port's
/// connector type and binds the port to the DUT connector whose synthesized
/// name matches the configured one exactly.
pub(crate) fn resolve_ports(
    client: &mut Client,
    dut: &dyn DutDisplay,
    config: &ChameliumConfig,
) -> Result<Vec<Port>, ChameliumError> {
    let connectors = dut.connectors()?;
    let mut ports = Vec::with_capacity(config.mappings.len());

    for mapping in &config.mappings {
        let reply = client
            .call("GetConnectorType", &[Arg::Int(mapping.port_id)])
            .map_err(ChameliumError::in_call("GetConnectorType"))?;
        let type_str = reply
            .as_str()
            .map_err(ChameliumError::in_call("GetConnectorType"))?;
        let kind = ConnectorKind::from_appliance(type_str);
        if kind == ConnectorKind::Unknown {
            tracing::warn!(
                port_id = mapping.port_id,
                type_str,
                "appliance reports an unknown connector type"
            );
            return Err(ChameliumError::UnknownPortType {
                name: mapping.connector_name.clone(),
                type_str: type_str.to_string(),
            });
        }

        let Some(connector) = connectors
            .iter()
            .find(|c| c.name() == mapping.connector_name)
        else {
            tracing::warn!(
                connector = %mapping.connector_name,
                "configured connector not present on the dut"
            );
            return Err(ChameliumError::NoSuchConnector(
                mapping.connector_name.clone(),
            ));
        };

        tracing::debug!(
            port_id = mapping.port_id,
            connector = %mapping.connector_name,
            kind = %kind,
            "mapped appliance port"
        );
        ports.push(Port {
            id: mapping.port_id,
            kind,
            connector_id: connector.connector_id,
            name: mapping.connector_name.clone(),
        });
    }

    Ok(ports)
}
