//! Command Client Module
//!
//! Runs inside a control panel and decides when and how targets are sent to
//! the relay:
//!
//! - sends only while [`ConnectionState::Connected`]; a failed send flips the
//!   state to `Disconnected` and the operator must reconnect explicitly
//! - debounces each actuator and coalesces everything that settled into one
//!   batch over one short-lived TCP connection
//! - suppresses a batch identical to the last one delivered
//!
//! Delivery is fire and forget: there is no acknowledgement from the relay and
//! no retry queue. The latest settled value wins.

use core::fmt;
use std::{net::SocketAddr, time::Duration};

use tokio::{
    io::AsyncWriteExt,
    net::TcpStream,
    sync::{mpsc, watch},
    time::{sleep_until, timeout, Instant},
};

use super::debounce::Debouncer;
use crate::utils::{
    config::PanelConfig,
    errors::ClientError,
    protocol::{encode, ActuatorCommand, ActuatorId, ActuatorTable, CommandBatch, ProtocolMode},
};

/// Whether the operator currently allows sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

/// Operator-facing status indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Connected,
    Sent,
    Disconnected,
    SendFailed,
    Unreachable,
    EmergencyStop,
    EmergencyReset,
}

impl Status {
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Status::SendFailed | Status::Unreachable | Status::EmergencyStop
        )
    }
}

impl fmt::Display for Status {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let label = match self {
            Status::Connected => "Estado: Conectado",
            Status::Sent => "Estado: Enviado",
            Status::Disconnected => "Estado: Desconectado (no se envía)",
            Status::SendFailed => "Estado: Desconectado (falló envío)",
            Status::Unreachable => "Estado: No se pudo conectar",
            Status::EmergencyStop => "Estado: EMERGENCIA ACTIVADA",
            Status::EmergencyReset => "Estado: Emergencia reseteada",
        };
        f.write_str(label)
    }
}

/// Result of one send attempt.
#[derive(Debug)]
pub enum SendOutcome {
    /// Delivered this many commands.
    Sent(usize),
    /// Same as the last delivered batch; nothing went on the wire.
    Duplicate,
    /// Not connected; nothing went on the wire.
    NotConnected,
    /// Nothing to send.
    Empty,
    /// Delivery failed and the client is now disconnected.
    Failed(ClientError),
}

/// Events produced by the panel UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelEvent {
    Connect,
    Disconnect,
    Target { id: ActuatorId, value: i32 },
    EmergencyStop,
    ResetEmergency,
    /// Move every non-motor actuator to this angle right away.
    Home(i32),
    Shutdown,
}

/// Transport used by the client to reach the relay.
#[allow(async_fn_in_trait)]
pub trait BatchSink {
    /// Check that the relay accepts connections.
    async fn probe(
        &mut self,
        limit: Duration,
    ) -> Result<(), ClientError>;

    /// Deliver one payload over a fresh connection and close it.
    async fn deliver(
        &mut self,
        payload: &[u8],
        limit: Duration,
    ) -> Result<(), ClientError>;
}

/// TCP transport: one connection per batch, closed right after the write so
/// the relay sees end of batch immediately.
#[derive(Debug, Clone)]
pub struct TcpSink {
    addr: SocketAddr,
}

impl TcpSink {
    pub fn new(addr: SocketAddr) -> Self {
        TcpSink { addr }
    }
}

impl BatchSink for TcpSink {
    async fn probe(
        &mut self,
        limit: Duration,
    ) -> Result<(), ClientError> {
        let addr = self.addr;
        match timeout(limit, TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(source)) => Err(ClientError::Connect { addr, source }),
            Err(_) => Err(ClientError::Timeout {
                addr,
                millis: limit.as_millis() as u64,
            }),
        }
    }

    async fn deliver(
        &mut self,
        payload: &[u8],
        limit: Duration,
    ) -> Result<(), ClientError> {
        let addr = self.addr;
        let exchange = async {
            let mut stream = TcpStream::connect(addr)
                .await
                .map_err(|source| ClientError::Connect { addr, source })?;
            stream
                .write_all(payload)
                .await
                .map_err(|source| ClientError::Write { addr, source })?;
            stream
                .shutdown()
                .await
                .map_err(|source| ClientError::Write { addr, source })
        };
        timeout(limit, exchange)
            .await
            .map_err(|_| ClientError::Timeout {
                addr,
                millis: limit.as_millis() as u64,
            })?
    }
}

/// Send discipline for one panel.
pub struct CommandClient<S> {
    sink: S,
    table: ActuatorTable,
    mode: ProtocolMode,
    send_timeout: Duration,
    probe_timeout: Duration,
    state: ConnectionState,
    status: Status,
    debouncer: Debouncer,
    last_sent: Option<CommandBatch>,
    estop: bool,
}

impl<S: BatchSink> CommandClient<S> {
    /// Create a disconnected client.
    pub fn new(
        config: &PanelConfig,
        sink: S,
    ) -> Self {
        CommandClient {
            sink,
            table: config.table(),
            mode: config.mode,
            send_timeout: config.send_timeout(),
            probe_timeout: config.probe_timeout(),
            state: ConnectionState::Disconnected,
            status: Status::Disconnected,
            debouncer: Debouncer::new(config.debounce()),
            last_sent: None,
            estop: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn last_sent(&self) -> Option<&[ActuatorCommand]> {
        self.last_sent.as_deref()
    }

    pub fn is_emergency_stopped(&self) -> bool {
        self.estop
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.debouncer.next_deadline()
    }

    /// Probe the relay and allow sending if it answers. Motors are then sent
    /// 0 so the session starts from rest.
    pub async fn connect(&mut self) -> Result<(), ClientError> {
        if let Err(error) = self.sink.probe(self.probe_timeout).await {
            self.state = ConnectionState::Disconnected;
            self.status = Status::Unreachable;
            tracing::warn!(%error, "relay unreachable");
            return Err(error);
        }
        self.state = ConnectionState::Connected;
        tracing::info!("connected to relay");

        if let SendOutcome::Failed(error) = self.deliver(self.motor_zeros()).await {
            return Err(error);
        }
        self.status = Status::Connected;
        Ok(())
    }

    /// Stop the motors, then stop sending.
    pub async fn disconnect(&mut self) {
        self.park().await;
        self.state = ConnectionState::Disconnected;
        self.status = Status::Disconnected;
        tracing::info!("disconnected by operator");
    }

    /// Record a new operator target. The value is shaped for its actuator and
    /// its debounce timer restarts. Ignored while the emergency stop is
    /// latched.
    pub fn set_target(
        &mut self,
        id: ActuatorId,
        value: i32,
        now: Instant,
    ) -> Option<ActuatorCommand> {
        if self.estop {
            tracing::debug!(%id, value, "target ignored during emergency stop");
            return None;
        }
        let cmd = self.table.target(id, value);
        self.debouncer.touch(cmd, now);
        Some(cmd)
    }

    /// Send everything that has settled by `now` as one batch.
    pub async fn flush(
        &mut self,
        now: Instant,
    ) -> SendOutcome {
        let batch = self.debouncer.take_settled(now);
        self.send_batch(batch).await
    }

    /// Send a batch unless it is empty, the client is disconnected, or it
    /// matches the last delivered batch.
    pub async fn send_batch(
        &mut self,
        batch: CommandBatch,
    ) -> SendOutcome {
        if batch.is_empty() {
            return SendOutcome::Empty;
        }
        if self.state != ConnectionState::Connected {
            self.status = Status::Disconnected;
            tracing::debug!(len = batch.len(), "not connected, batch dropped");
            return SendOutcome::NotConnected;
        }
        if self.last_sent.as_ref() == Some(&batch) {
            tracing::debug!(len = batch.len(), "batch unchanged, not sending");
            return SendOutcome::Duplicate;
        }
        self.deliver(batch).await
    }

    /// Latch the emergency stop: drop pending targets and send 0 to every
    /// motor at once, bypassing debounce and de-duplication.
    pub async fn emergency_stop(&mut self) -> SendOutcome {
        self.estop = true;
        self.debouncer.clear();
        tracing::warn!("emergency stop latched");

        let outcome = self.deliver(self.motor_zeros()).await;
        if !matches!(outcome, SendOutcome::Failed(_)) {
            self.status = Status::EmergencyStop;
        }
        outcome
    }

    pub fn reset_emergency(&mut self) {
        self.estop = false;
        self.status = Status::EmergencyReset;
        tracing::info!("emergency stop reset");
    }

    /// Move every non-motor actuator to `angle` right away. The move is sent
    /// even if it repeats the last delivered batch.
    pub async fn home(
        &mut self,
        angle: i32,
    ) -> SendOutcome {
        let batch: CommandBatch = self
            .table
            .profiles()
            .filter(|p| !p.class.is_motor())
            .map(|p| self.table.target(p.id, angle))
            .collect();
        for cmd in &batch {
            self.debouncer.cancel(cmd.id);
        }
        self.deliver(batch).await
    }

    /// Stop every motor and drop pending targets.
    pub async fn park(&mut self) -> SendOutcome {
        self.debouncer.clear();
        self.deliver(self.motor_zeros()).await
    }

    fn motor_zeros(&self) -> CommandBatch {
        self.table
            .motors()
            .map(|id| ActuatorCommand { id, angle: 0 })
            .collect()
    }

    async fn deliver(
        &mut self,
        batch: CommandBatch,
    ) -> SendOutcome {
        if batch.is_empty() {
            return SendOutcome::Empty;
        }
        if self.state != ConnectionState::Connected {
            self.status = Status::Disconnected;
            tracing::debug!(len = batch.len(), "not connected, batch dropped");
            return SendOutcome::NotConnected;
        }

        let payload = encode(&batch, self.mode);
        match self.sink.deliver(payload.as_bytes(), self.send_timeout).await {
            Ok(()) => {
                tracing::info!(len = batch.len(), payload = payload.trim_end(), "batch sent");
                let sent = batch.len();
                self.last_sent = Some(batch);
                self.status = Status::Sent;
                SendOutcome::Sent(sent)
            }
            Err(error) => {
                tracing::warn!(%error, "send failed, disconnecting");
                self.state = ConnectionState::Disconnected;
                self.status = Status::SendFailed;
                SendOutcome::Failed(error)
            }
        }
    }

    /// Drive the client from panel events until `Shutdown` or until the
    /// event queue closes. Every status change is published on `status`.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<PanelEvent>,
        status: watch::Sender<Status>,
    ) {
        status.send_replace(self.status);

        loop {
            let deadline = self.debouncer.next_deadline();
            tokio::select! {
                event = events.recv() => match event {
                    Some(PanelEvent::Shutdown) | None => {
                        self.park().await;
                        publish(&status, self.status);
                        break;
                    }
                    Some(event) => self.apply(event).await,
                },
                _ = sleep_until_deadline(deadline) => {
                    self.flush(Instant::now()).await;
                }
            }
            publish(&status, self.status);
        }
        tracing::debug!("command client stopped");
    }

    async fn apply(
        &mut self,
        event: PanelEvent,
    ) {
        match event {
            PanelEvent::Connect => {
                // Failure is already reflected in the status.
                let _ = self.connect().await;
            }
            PanelEvent::Disconnect => self.disconnect().await,
            PanelEvent::Target { id, value } => {
                self.set_target(id, value, Instant::now());
            }
            PanelEvent::EmergencyStop => {
                self.emergency_stop().await;
            }
            PanelEvent::ResetEmergency => self.reset_emergency(),
            PanelEvent::Home(angle) => {
                self.home(angle).await;
            }
            PanelEvent::Shutdown => {}
        }
    }
}

fn publish(
    tx: &watch::Sender<Status>,
    status: Status,
) {
    tx.send_if_modified(|current| {
        let changed = *current != status;
        *current = status;
        changed
    });
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_labels_match_the_panels() {
        assert_eq!(
            Status::Disconnected.to_string(),
            "Estado: Desconectado (no se envía)"
        );
        assert_eq!(Status::Sent.to_string(), "Estado: Enviado");
        assert!(Status::SendFailed.is_error());
        assert!(!Status::Connected.is_error());
    }
}
