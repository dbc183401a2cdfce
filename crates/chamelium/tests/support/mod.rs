//! Shared fixtures: an in-process XML-RPC appliance and a fake DUT display
//! stack, so session behavior can be exercised end to end without hardware.
#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use chamelium::{
    ChameliumConfig, ConnectorInfo, ConnectorKind, DpmsMode, DutDisplay, HotplugWatch,
    PortMapping,
};
use chamelium_rpc::{wire, Value};

pub type Responder = dyn Fn(&str, &[Value]) -> Vec<u8> + Send + Sync;

/// A scripted appliance listening on an ephemeral local port. Every decoded
/// call is logged; replies come from the responder the test installs.
pub struct FakeAppliance {
    url: String,
    addr: std::net::SocketAddr,
    calls: Arc<Mutex<Vec<(String, Vec<Value>)>>>,
    shutdown: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl FakeAppliance {
    pub fn start(responder: impl Fn(&str, &[Value]) -> Vec<u8> + Send + Sync + 'static) -> FakeAppliance {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let calls: Arc<Mutex<Vec<(String, Vec<Value>)>>> = Arc::default();
        let shutdown = Arc::new(AtomicBool::new(false));

        let thread_calls = Arc::clone(&calls);
        let thread_shutdown = Arc::clone(&shutdown);
        let responder: Box<Responder> = Box::new(responder);
        let thread = thread::spawn(move || {
            for stream in listener.incoming() {
                if thread_shutdown.load(Ordering::SeqCst) {
                    break;
                }
                let mut stream = match stream {
                    Ok(stream) => stream,
                    Err(_) => break,
                };
                let body = read_http_request(&mut stream);
                let (method, args) = wire::decode_call(&body).unwrap();
                let reply = responder(&method, &args);
                thread_calls.lock().unwrap().push((method, args));
                let header = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/xml\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    reply.len()
                );
                stream.write_all(header.as_bytes()).unwrap();
                stream.write_all(&reply).unwrap();
            }
        });

        FakeAppliance {
            url: format!("http://{addr}/"),
            addr,
            calls,
            shutdown,
            thread: Some(thread),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<(String, Vec<Value>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn method_calls(&self, method: &str) -> Vec<Vec<Value>> {
        self.calls()
            .into_iter()
            .filter(|(m, _)| m == method)
            .map(|(_, args)| args)
            .collect()
    }
}

impl Drop for FakeAppliance {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        // Wake the accept loop.
        let _ = TcpStream::connect(self.addr);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn read_http_request(stream: &mut TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut chunk).unwrap();
        assert!(n > 0, "connection closed mid-request");
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let headers = String::from_utf8_lossy(&buf[..header_end]).to_lowercase();
    let content_length: usize = headers
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .expect("missing content-length")
        .trim()
        .parse()
        .unwrap();
    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).unwrap();
        assert!(n > 0);
        buf.extend_from_slice(&chunk[..n]);
    }
    buf[header_end..header_end + content_length].to_vec()
}

/// Baseline responder covering session init plus the common control calls,
/// with an HDMI port. Tests layer their own methods on top of this.
pub fn baseline_reply(method: &str, _args: &[Value]) -> Option<Vec<u8>> {
    match method {
        "GetConnectorType" => Some(wire::encode_response(&Value::Str("HDMI".to_string()))),
        "Plug" | "Unplug" | "Reset" | "ApplyEdid" | "DestroyEdid" | "SetDdcState" => {
            Some(wire::encode_response(&Value::Int(0)))
        }
        "IsPlugged" | "IsDdcEnabled" => Some(wire::encode_response(&Value::Bool(true))),
        _ => None,
    }
}

pub const HDMI_CONNECTOR_ID: u32 = 42;
pub const HDMI_PORT_ID: i32 = 3;

pub fn hdmi_config(url: &str) -> ChameliumConfig {
    ChameliumConfig {
        url: url.trim_end_matches('/').to_string(),
        mappings: vec![PortMapping {
            connector_name: "HDMI-A-1".to_string(),
            port_id: HDMI_PORT_ID,
        }],
    }
}

/// Fake DRM/KMS stack: a fixed connector list, a DPMS transition log, and
/// manually fired hotplug events.
pub struct FakeDut {
    connectors: Vec<ConnectorInfo>,
    dpms: Mutex<Vec<(u32, DpmsMode)>>,
    watchers: Mutex<Vec<mpsc::Sender<()>>>,
}

impl FakeDut {
    pub fn new(connectors: Vec<ConnectorInfo>) -> Arc<FakeDut> {
        Arc::new(FakeDut {
            connectors,
            dpms: Mutex::default(),
            watchers: Mutex::default(),
        })
    }

    /// One connected HDMI-A-1 connector, matching [`hdmi_config`].
    pub fn hdmi() -> Arc<FakeDut> {
        FakeDut::new(vec![ConnectorInfo {
            connector_id: HDMI_CONNECTOR_ID,
            kind: ConnectorKind::HdmiA,
            type_instance: 1,
            connected: true,
        }])
    }

    /// Delivers a hotplug event to every armed watch.
    pub fn fire_hotplug(&self) {
        for tx in self.watchers.lock().unwrap().iter() {
            let _ = tx.send(());
        }
    }

    pub fn watch_count(&self) -> usize {
        self.watchers.lock().unwrap().len()
    }

    pub fn dpms_log(&self) -> Vec<(u32, DpmsMode)> {
        self.dpms.lock().unwrap().clone()
    }
}

impl DutDisplay for FakeDut {
    fn connectors(&self) -> std::io::Result<Vec<ConnectorInfo>> {
        Ok(self.connectors.clone())
    }

    fn connector(&self, connector_id: u32, _reprobe: bool) -> std::io::Result<ConnectorInfo> {
        self.connectors
            .iter()
            .find(|c| c.connector_id == connector_id)
            .cloned()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no such connector"))
    }

    fn set_dpms(&self, connector_id: u32, mode: DpmsMode) -> std::io::Result<()> {
        self.dpms.lock().unwrap().push((connector_id, mode));
        Ok(())
    }

    fn watch_hotplug(&self) -> std::io::Result<Box<dyn HotplugWatch>> {
        let (tx, rx) = mpsc::channel();
        self.watchers.lock().unwrap().push(tx);
        Ok(Box::new(FakeWatch { rx }))
    }
}

struct FakeWatch {
    rx: mpsc::Receiver<()>,
}

impl HotplugWatch for FakeWatch {
    fn poll(&mut self, timeout: Duration) -> std::io::Result<bool> {
        match self.rx.recv_timeout(timeout) {
            Ok(()) => Ok(true),
            Err(_) => Ok(false),
        }
    }
}
