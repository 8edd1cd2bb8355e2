//! playd daemon entry point
//!
//! `playd DEVICE_ID [HOST] [PORT]` binds the TCP control surface and runs
//! the reactor until a `quit` command or an interrupt. Without a valid
//! device id it prints usage plus the output device table and exits.

use std::collections::HashMap;
use std::process::ExitCode;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use playd::audio::{list_output_devices, DeviceSink, FileSource, SinkFn, SourceFn};
use playd::constants::{DEFAULT_HOST, DEFAULT_PORT};
use playd::net::Reactor;
use playd::player::Player;

/// File extensions the daemon can decode.
const EXTENSIONS: [&str; 4] = ["mp3", "flac", "ogg", "wav"];

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().collect();

    let Some(device_id) = device_id_from_args(&args) else {
        print_usage(args.first().map(String::as_str).unwrap_or("playd"));
        return ExitCode::FAILURE;
    };

    let host = args
        .get(2)
        .cloned()
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = match args.get(3) {
        None => DEFAULT_PORT,
        Some(raw) => match raw.parse() {
            Ok(port) => port,
            Err(_) => {
                eprintln!("not a valid port: {raw}");
                return ExitCode::FAILURE;
            }
        },
    };

    match run(device_id, &host, port) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if let Some(playd::Error::Net(msg)) = err.downcast_ref::<playd::Error>() {
                eprintln!("Network error: {msg}");
                eprintln!("Is {host}:{port} available?");
            } else {
                eprintln!("Fatal error: {err:#}");
            }
            ExitCode::FAILURE
        }
    }
}

fn run(device_id: usize, host: &str, port: u16) -> anyhow::Result<()> {
    let mut sources: HashMap<String, SourceFn> = HashMap::new();
    for ext in EXTENSIONS {
        sources.insert(ext.to_string(), Box::new(FileSource::build));
    }
    let make_sink: SinkFn = Box::new(DeviceSink::build);

    let player = Player::new(device_id, make_sink, sources);
    let mut reactor = Reactor::new(player);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("cannot start runtime")?;
    let local = tokio::task::LocalSet::new();

    local.block_on(&runtime, reactor.run(host, port))?;
    Ok(())
}

/// Parse and validate the device id argument against the host's output
/// devices. `None` means "show usage".
fn device_id_from_args(args: &[String]) -> Option<usize> {
    let raw = args.get(1)?;
    let id: usize = match raw.parse() {
        Ok(id) => id,
        Err(_) => {
            eprintln!("not a valid device ID: {raw}");
            return None;
        }
    };

    if !list_output_devices().iter().any(|(did, _)| *did == id) {
        eprintln!("no output device with ID: {id}");
        return None;
    }

    Some(id)
}

fn print_usage(progname: &str) {
    eprintln!("usage: {progname} ID [HOST] [PORT]");
    eprintln!("where ID is one of the following numbers:");
    for (id, name) in list_output_devices() {
        eprintln!("\t{id}: {name}");
    }
    eprintln!("default HOST: {DEFAULT_HOST}");
    eprintln!("default PORT: {DEFAULT_PORT}");
}
