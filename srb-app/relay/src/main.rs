use std::{net::SocketAddr, path::PathBuf, process::ExitCode};

use clap::Parser;
use srb_core::utils::{
    controllers::{LoggingLink, SerialChannel, SerialLink, SerialPortLink},
    errors::RelayError,
    protocol::{ActuatorId, ProtocolMode},
    relay, RelayConfig,
};
use tracing::{error, info};

#[derive(Parser)]
#[clap(version = "1.0", about = "TCP to serial relay for servo and motor panels")]
struct Opts {
    /// JSON config file; flags below override it
    #[clap(long)]
    config: Option<PathBuf>,
    /// Listen address, e.g. 0.0.0.0:5001
    #[clap(long)]
    listen: Option<SocketAddr>,
    /// Serial device of the microcontroller
    #[clap(long)]
    device: Option<String>,
    /// Serial baud rate
    #[clap(long)]
    baud: Option<u32>,
    /// Pending connection backlog
    #[clap(long)]
    backlog: Option<u32>,
    /// End of batch after this much silence from the panel
    #[clap(long)]
    idle_timeout_ms: Option<u64>,
    /// Accept bare `<angle>` lines for this actuator id
    #[clap(long)]
    legacy_id: Option<u8>,
    /// Log serial lines instead of opening the device
    #[clap(long)]
    dry_run: bool,
}

impl Opts {
    fn into_config(self) -> Result<RelayConfig, RelayError> {
        let mut config = match &self.config {
            Some(path) => RelayConfig::load(path)?,
            None => RelayConfig::default(),
        };
        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(device) = self.device {
            config.serial.device = device;
        }
        if let Some(baud) = self.baud {
            config.serial.baud = baud;
        }
        if let Some(backlog) = self.backlog {
            config.backlog = backlog;
        }
        if let Some(ms) = self.idle_timeout_ms {
            config.idle_timeout_ms = ms;
        }
        if let Some(id) = self.legacy_id {
            config.mode = ProtocolMode::Legacy {
                default_id: ActuatorId(id),
            };
        }
        config.serial.dry_run |= self.dry_run;
        config.validate()?;
        Ok(config)
    }
}

async fn serve(config: RelayConfig) -> Result<(), RelayError> {
    let link: Box<dyn SerialLink> = if config.serial.dry_run {
        info!("dry run: serial lines are only logged");
        Box::new(LoggingLink)
    } else {
        Box::new(SerialPortLink::open(&config.serial.device, config.serial.baud)?)
    };
    let channel = SerialChannel::spawn(link, config.table(), config.mode, config.serial.queue_depth)?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };
    relay(&config, channel, shutdown).await
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match Opts::parse().into_config() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    info!(
        listen = %config.listen,
        device = %config.serial.device,
        baud = config.serial.baud,
        "starting relay"
    );

    match serve(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("relay stopped: {}", e);
            ExitCode::FAILURE
        }
    }
}
