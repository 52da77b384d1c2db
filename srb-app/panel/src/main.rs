use std::{net::SocketAddr, path::PathBuf, process::ExitCode};

use clap::Parser;
use srb_core::utils::{
    connection::client::TcpSink,
    errors::ConfigError,
    protocol::{ActuatorId, ProtocolMode},
    CommandClient, PanelConfig, PanelEvent, Status,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::{mpsc, watch},
};
use tracing::{error, info, warn};

const HELP: &str = "commands: connect | disconnect | set <id> <value> | estop | reset | home [angle] | quit";

#[derive(Parser)]
#[clap(version = "1.0", about = "Headless control panel for the serial relay")]
struct Opts {
    /// JSON config file; flags below override it
    #[clap(long)]
    config: Option<PathBuf>,
    /// Relay address, e.g. 192.168.0.101:5001
    #[clap(long)]
    bridge: Option<SocketAddr>,
    /// Debounce window per actuator
    #[clap(long)]
    debounce_ms: Option<u64>,
    /// Send bare `<angle>` lines for this actuator id
    #[clap(long)]
    legacy_id: Option<u8>,
    /// Connect right away instead of waiting for `connect`
    #[clap(long)]
    connect: bool,
}

impl Opts {
    fn to_config(&self) -> Result<PanelConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => PanelConfig::load(path)?,
            None => PanelConfig::default(),
        };
        if let Some(bridge) = self.bridge {
            config.bridge = bridge;
        }
        if let Some(ms) = self.debounce_ms {
            config.debounce_ms = ms;
        }
        if let Some(id) = self.legacy_id {
            config.mode = ProtocolMode::Legacy {
                default_id: ActuatorId(id),
            };
        }
        config.validate()?;
        Ok(config)
    }
}

fn parse_command(line: &str) -> Result<PanelEvent, String> {
    let mut words = line.split_whitespace();
    let event = match words.next() {
        Some("connect") => PanelEvent::Connect,
        Some("disconnect") => PanelEvent::Disconnect,
        Some("estop") => PanelEvent::EmergencyStop,
        Some("reset") => PanelEvent::ResetEmergency,
        Some("quit") | Some("exit") => PanelEvent::Shutdown,
        Some("home") => {
            let angle = match words.next() {
                Some(word) => word.parse().map_err(|_| format!("bad angle: {word}"))?,
                None => 90,
            };
            PanelEvent::Home(angle)
        }
        Some("set") => {
            let (Some(id), Some(value)) = (words.next(), words.next()) else {
                return Err("usage: set <id> <value>".into());
            };
            PanelEvent::Target {
                id: ActuatorId(id.parse().map_err(|_| format!("bad id: {id}"))?),
                value: value.parse().map_err(|_| format!("bad value: {value}"))?,
            }
        }
        _ => return Err(HELP.into()),
    };
    Ok(event)
}

async fn read_operator(
    events: mpsc::Sender<PanelEvent>,
    connect: bool,
) {
    if connect && events.send(PanelEvent::Connect).await.is_err() {
        return;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("stdin failed: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match parse_command(&line) {
            Ok(event) => {
                let quit = event == PanelEvent::Shutdown;
                if events.send(event).await.is_err() || quit {
                    return;
                }
            }
            Err(message) => warn!("{}", message),
        }
    }
    let _ = events.send(PanelEvent::Shutdown).await;
}

async fn show_status(mut status: watch::Receiver<Status>) {
    while status.changed().await.is_ok() {
        let current = *status.borrow_and_update();
        if current.is_error() {
            warn!("{}", current);
        } else {
            info!("{}", current);
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let opts = Opts::parse();
    let config = match opts.to_config() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    info!(bridge = %config.bridge, debounce_ms = config.debounce_ms, "panel ready");
    info!("{}", HELP);

    let (event_tx, event_rx) = mpsc::channel(64);
    let (status_tx, status_rx) = watch::channel(Status::Disconnected);

    tokio::spawn(read_operator(event_tx, opts.connect));
    tokio::spawn(show_status(status_rx));

    let client = CommandClient::new(&config, TcpSink::new(config.bridge));
    client.run(event_rx, status_tx).await;
    ExitCode::SUCCESS
}
