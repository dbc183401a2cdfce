use chamelium_rpc::RpcError;

use crate::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum ChameliumError {
    #[error("rpc {method} failed: {source}")]
    Rpc {
        method: String,
        #[source]
        source: RpcError,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("dut display error: {0}")]
    Dut(#[from] std::io::Error),

    #[error("no connector named {0:?} on the dut")]
    NoSuchConnector(String),

    #[error("appliance reports unknown connector type {type_str:?} for {name:?}")]
    UnknownPortType { name: String, type_str: String },

    #[error("crc mismatch: reference {reference}, capture {capture}")]
    CrcMismatch { reference: String, capture: String },

    #[error("captured frame does not match reference image")]
    FrameMismatch,

    #[error("frame of {have_w}x{have_h} cannot be cropped to {want_w}x{want_h}")]
    CropTooLarge {
        have_w: i32,
        have_h: i32,
        want_w: i32,
        want_h: i32,
    },

    #[error("frame payload of {len} bytes does not match {width}x{height}")]
    BadFrameSize { len: usize, width: i32, height: i32 },

    #[error("unexpected audio capture format: {0}")]
    AudioFormat(String),
}

impl ChameliumError {
    /// Wraps an [`RpcError`] with the method it came from; meant for
    /// `map_err(ChameliumError::in_call("Method"))` at reply-decoding sites.
    pub(crate) fn in_call(method: &str) -> impl FnOnce(RpcError) -> ChameliumError + '_ {
        move |source| ChameliumError::Rpc {
            method: method.to_string(),
            source,
        }
    }

    /// The fault state behind this error, if it is an RPC failure. Used by
    /// capability probes that gate on the appliance's fault string.
    pub fn rpc_fault(&self) -> Option<chamelium_rpc::Fault> {
        match self {
            ChameliumError::Rpc { source, .. } => Some(source.to_fault()),
            _ => None,
        }
    }
}
