//! Bench utility for poking a Chamelium directly over XML-RPC: plugging
//! ports, uploading EDIDs, resetting the box. Intended for rig bring-up and
//! debugging, so it talks to the appliance without a DUT-side session.

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context};
use chamelium::ChameliumConfig;
use chamelium_rpc::{Arg, Client};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "chamelium-ctl",
    about = "Drive a Chamelium display-capture appliance over XML-RPC."
)]
struct Args {
    /// Appliance endpoint, e.g. http://192.168.1.2:9992. Falls back to the
    /// CHAMELIUM_CONFIG rig configuration when unset.
    #[arg(long, env = "CHAMELIUM_URL")]
    url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reset the appliance; all ports come back plugged.
    Reset,
    /// Plug a port.
    Plug { port: i32 },
    /// Unplug a port.
    Unplug { port: i32 },
    /// Report whether a port is plugged.
    IsPlugged { port: i32 },
    /// Report the connector type of a port (DP, HDMI, VGA).
    ConnectorType { port: i32 },
    /// Report the resolution the appliance sees on a port.
    DetectResolution { port: i32 },
    /// Upload an EDID blob and print its appliance-side handle.
    UploadEdid { file: PathBuf },
    /// Apply an uploaded EDID to a port; handle 0 restores the default.
    ApplyEdid { port: i32, edid: i32 },
    /// Destroy an uploaded EDID by handle.
    DestroyEdid { edid: i32 },
    /// Enable or disable DDC on a port.
    SetDdc {
        port: i32,
        #[arg(value_parser = parse_on_off)]
        state: bool,
    },
    /// Report whether DDC is enabled on a port.
    Ddc { port: i32 },
}

fn parse_on_off(s: &str) -> Result<bool, String> {
    match s {
        "on" => Ok(true),
        "off" => Ok(false),
        other => Err(format!("expected 'on' or 'off', got {other:?}")),
    }
}

fn endpoint(args: &Args) -> anyhow::Result<String> {
    if let Some(url) = &args.url {
        return Ok(url.clone());
    }
    let config = ChameliumConfig::load_default()
        .context("no --url given and no rig configuration found")?;
    Ok(config.url)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let url = endpoint(&args)?;
    let mut client = Client::new(&url).with_context(|| format!("connecting to {url}"))?;

    match args.command {
        Command::Reset => {
            client.call("Reset", &[])?;
            println!("ok");
        }
        Command::Plug { port } => {
            client.call("Plug", &[Arg::Int(port)])?;
            println!("ok");
        }
        Command::Unplug { port } => {
            client.call("Unplug", &[Arg::Int(port)])?;
            println!("ok");
        }
        Command::IsPlugged { port } => {
            let plugged = client.call("IsPlugged", &[Arg::Int(port)])?.as_bool()?;
            println!("{}", if plugged { "plugged" } else { "unplugged" });
        }
        Command::ConnectorType { port } => {
            let reply = client.call("GetConnectorType", &[Arg::Int(port)])?;
            println!("{}", reply.as_str()?);
        }
        Command::DetectResolution { port } => {
            let reply = client.call("DetectResolution", &[Arg::Int(port)])?;
            let dims = reply.as_array()?;
            let [w, h, ..] = dims else {
                bail!("short resolution reply ({} values)", dims.len());
            };
            println!("{}x{}", w.as_int()?, h.as_int()?);
        }
        Command::UploadEdid { file } => {
            let edid = fs::read(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let id = client.call("CreateEdid", &[Arg::Blob(edid)])?.as_int()?;
            println!("{id}");
        }
        Command::ApplyEdid { port, edid } => {
            client.call("ApplyEdid", &[Arg::Int(port), Arg::Int(edid)])?;
            println!("ok");
        }
        Command::DestroyEdid { edid } => {
            client.call("DestroyEdid", &[Arg::Int(edid)])?;
            println!("ok");
        }
        Command::SetDdc { port, state } => {
            client.call("SetDdcState", &[Arg::Int(port), Arg::Bool(state)])?;
            println!("ok");
        }
        Command::Ddc { port } => {
            let enabled = client.call("IsDdcEnabled", &[Arg::Int(port)])?.as_bool()?;
            println!("{}", if enabled { "enabled" } else { "disabled" });
        }
    }
    Ok(())
}
