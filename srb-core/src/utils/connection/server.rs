//! Relay Server Module
//!
//! Accepts short-lived TCP connections from control panels. Each connection
//! carries one batch of `<id> <angle>` lines; the protocol has no terminator,
//! so a batch ends when the peer closes or stays idle for `idle_timeout`.
//! Decoded commands go to the shared [`SerialChannel`] in arrival order.
//!
//! Malformed lines are logged and skipped. A serial failure is fatal: the
//! server stops accepting connections and `serve` returns the error.

use std::{future::Future, net::SocketAddr, time::Duration};

use tokio::{
    io::{AsyncRead, AsyncReadExt},
    net::{TcpListener, TcpSocket, TcpStream},
    task::JoinSet,
    time::timeout,
};

use crate::utils::{
    config::RelayConfig,
    controllers::SerialChannel,
    errors::{RelayError, SerialError},
    protocol::{decode, ProtocolMode},
};

const READ_CHUNK: usize = 4096;

/// How a connection's payload is read and decoded.
#[derive(Debug, Clone, Copy)]
pub struct BatchSettings {
    pub mode: ProtocolMode,
    pub idle_timeout: Duration,
    pub max_batch_bytes: usize,
}

impl From<&RelayConfig> for BatchSettings {
    fn from(config: &RelayConfig) -> Self {
        BatchSettings {
            mode: config.mode,
            idle_timeout: config.idle_timeout(),
            max_batch_bytes: config.max_batch_bytes,
        }
    }
}

/// What one connection amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionReport {
    pub peer: SocketAddr,
    pub bytes: usize,
    pub forwarded: usize,
    pub rejected: usize,
}

/// Bind the listening socket with address reuse and the configured backlog.
pub fn bind(
    addr: SocketAddr,
    backlog: u32,
) -> Result<TcpListener, RelayError> {
    let bind_err = |source| RelayError::Bind { addr, source };
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(bind_err)?;
    socket.set_reuseaddr(true).map_err(bind_err)?;
    socket.bind(addr).map_err(bind_err)?;
    socket.listen(backlog).map_err(bind_err)
}

/// Bind according to `config` and relay until `shutdown` resolves or the
/// serial channel fails.
pub async fn run(
    config: &RelayConfig,
    channel: SerialChannel,
    shutdown: impl Future<Output = ()>,
) -> Result<(), RelayError> {
    let listener = bind(config.listen, config.backlog)?;
    match listener.local_addr() {
        Ok(addr) => tracing::info!(%addr, backlog = config.backlog, "relay listening"),
        Err(error) => tracing::warn!(%error, "relay listening on unknown address"),
    }
    serve(listener, channel, BatchSettings::from(config), shutdown).await
}

/// Accept loop. Connections are handled concurrently; their serial writes are
/// serialized by the channel.
pub async fn serve(
    listener: TcpListener,
    channel: SerialChannel,
    settings: BatchSettings,
    shutdown: impl Future<Output = ()>,
) -> Result<(), RelayError> {
    let mut handlers = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("shutdown requested, draining connections");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::debug!(%peer, "connection accepted");
                    handlers.spawn(handle_connection(stream, peer, channel.clone(), settings));
                }
                Err(error) => tracing::warn!(%error, "accept failed"),
            },
            Some(joined) = handlers.join_next(), if !handlers.is_empty() => match joined {
                Ok(Ok(report)) => log_report(&report),
                Ok(Err(error)) => {
                    tracing::error!(%error, "serial channel failed, refusing further connections");
                    handlers.abort_all();
                    return Err(error.into());
                }
                Err(error) => tracing::warn!(%error, "connection handler aborted"),
            },
        }
    }

    while let Some(joined) = handlers.join_next().await {
        match joined {
            Ok(Ok(report)) => log_report(&report),
            Ok(Err(error)) => return Err(error.into()),
            Err(error) => tracing::warn!(%error, "connection handler aborted"),
        }
    }
    Ok(())
}

fn log_report(report: &ConnectionReport) {
    tracing::info!(
        peer = %report.peer,
        bytes = report.bytes,
        forwarded = report.forwarded,
        rejected = report.rejected,
        "batch relayed"
    );
}

/// Read one batch from `stream`, decode it and forward the valid lines.
pub async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    channel: SerialChannel,
    settings: BatchSettings,
) -> Result<ConnectionReport, SerialError> {
    let payload = read_batch(&mut stream, settings.idle_timeout, settings.max_batch_bytes).await;
    drop(stream);

    let batch = decode(&payload, settings.mode);
    for error in &batch.errors {
        tracing::warn!(%peer, line = error.line(), raw = error.raw(), "dropping malformed line");
    }

    let forwarded = if batch.is_empty() {
        tracing::debug!(%peer, "empty batch, nothing to forward");
        0
    } else {
        channel.write_batch(&batch.commands).await?
    };

    Ok(ConnectionReport {
        peer,
        bytes: payload.len(),
        forwarded,
        rejected: batch.errors.len(),
    })
}

/// Accumulate bytes until the peer closes, goes quiet for `idle`, or the
/// payload reaches `cap`. A capped payload is cut back to its last complete
/// line.
pub async fn read_batch<R: AsyncRead + Unpin>(
    reader: &mut R,
    idle: Duration,
    cap: usize,
) -> Vec<u8> {
    let mut payload = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        match timeout(idle, reader.read(&mut chunk)).await {
            Err(_) => break,
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => {
                payload.extend_from_slice(&chunk[..n]);
                if payload.len() >= cap {
                    payload.truncate(cap);
                    let keep = payload.iter().rposition(|&b| b == b'\n').map_or(0, |i| i + 1);
                    payload.truncate(keep);
                    tracing::warn!(cap, kept = keep, "batch exceeded size cap, truncated");
                    break;
                }
            }
            Ok(Err(error)) => {
                tracing::warn!(%error, "read failed, processing what arrived");
                break;
            }
        }
    }
    payload
}
