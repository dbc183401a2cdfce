use reqwest::header::CONTENT_TYPE;
use url::Url;

use crate::value::{Arg, Fault, RpcError, Value};
use crate::wire;

/// Maximum accepted response body size.
///
/// Frame dumps are shipped base64-encoded inside the reply, so the limit has
/// to accommodate a full uncompressed frame (15 MB covers 1080p with room to
/// spare, matching the limit the appliance tooling has always used).
pub const MAX_RESPONSE_SIZE: usize = 15 * 1024 * 1024;

/// A blocking XML-RPC client bound to one appliance endpoint.
///
/// Every call starts from a clean fault slate: [`Client::last_fault`]
/// reflects only the outcome of the immediately preceding call. The client
/// never aborts on a fault; callers decide whether a fault is fatal or a
/// negative capability-probe result.
pub struct Client {
    http: reqwest::blocking::Client,
    endpoint: Url,
    last_fault: Option<Fault>,
}

impl Client {
    pub fn new(url: &str) -> Result<Client, RpcError> {
        let endpoint = Url::parse(url)?;
        // The RPC layer enforces no timeout of its own: some appliance calls
        // (capture with a frame count, input-stable waits) legitimately block
        // for a long time, and anomalous-behaviour handling lives in the
        // hotplug monitor above this layer.
        let http = reqwest::blocking::Client::builder()
            .timeout(None)
            .build()?;
        Ok(Client {
            http,
            endpoint,
            last_fault: None,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Issues one RPC call and blocks until the reply is fully received.
    pub fn call(&mut self, method: &str, args: &[Arg]) -> Result<Value, RpcError> {
        self.last_fault = None;
        match self.do_call(method, args) {
            Ok(value) => Ok(value),
            Err(err) => {
                self.last_fault = Some(err.to_fault());
                Err(err)
            }
        }
    }

    /// Fault state of the immediately preceding call, if it failed.
    pub fn last_fault(&self) -> Option<&Fault> {
        self.last_fault.as_ref()
    }

    fn do_call(&self, method: &str, args: &[Arg]) -> Result<Value, RpcError> {
        let body = wire::encode_call(method, args);
        let response = self
            .http
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "text/xml")
            .body(body)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(RpcError::HttpStatus(status.as_u16()));
        }
        if let Some(len) = response.content_length() {
            if len as usize > MAX_RESPONSE_SIZE {
                return Err(RpcError::ResponseTooLarge {
                    len: len as usize,
                    max: MAX_RESPONSE_SIZE,
                });
            }
        }
        let bytes = response.bytes()?;
        if bytes.len() > MAX_RESPONSE_SIZE {
            return Err(RpcError::ResponseTooLarge {
                len: bytes.len(),
                max: MAX_RESPONSE_SIZE,
            });
        }
        wire::decode_response(&bytes)
    }
}
