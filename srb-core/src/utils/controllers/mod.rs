//! Serial actuator channel.
//!
//! The serial link is owned by a single writer thread. Connection handlers hold
//! a cloneable [`SerialChannel`] and send whole batches through a bounded
//! queue, so lines from concurrent connections are never interleaved.
//!
//! - `link`: the `SerialLink` trait plus serial-port and dry-run links.

pub mod link;

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
};

use tokio::sync::{mpsc, oneshot};

pub use link::{LoggingLink, SerialLink, SerialPortLink};

use crate::utils::{
    errors::SerialError,
    protocol::{encode_line, ActuatorCommand, ActuatorTable, ProtocolMode},
};

/// Default depth of the write queue in front of the serial thread.
pub const DEFAULT_QUEUE_DEPTH: usize = 16;

/// One batch waiting for the serial thread.
struct WriteRequest {
    commands: Vec<ActuatorCommand>,
    reply: oneshot::Sender<Result<usize, SerialError>>,
}

/// Handle to the serial writer. Cheap to clone; all clones feed the same
/// thread.
#[derive(Clone)]
pub struct SerialChannel {
    tx: mpsc::Sender<WriteRequest>,
    table: Arc<ActuatorTable>,
    usable: Arc<AtomicBool>,
}

impl SerialChannel {
    /// Move `link` onto a dedicated writer thread and return a handle to it.
    ///
    /// The thread exits when every handle is dropped or after the first write
    /// failure.
    pub fn spawn<L: SerialLink>(
        link: L,
        table: ActuatorTable,
        mode: ProtocolMode,
        queue_depth: usize,
    ) -> Result<Self, SerialError> {
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        let usable = Arc::new(AtomicBool::new(true));
        let flag = usable.clone();

        thread::Builder::new()
            .name("serial-writer".into())
            .spawn(move || writer_loop(link, rx, mode, flag))
            .map_err(SerialError::Spawn)?;

        Ok(SerialChannel {
            tx,
            table: Arc::new(table),
            usable,
        })
    }

    /// False once a write has failed. A dead channel never recovers.
    pub fn is_usable(&self) -> bool {
        self.usable.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    pub fn table(&self) -> &ActuatorTable {
        &self.table
    }

    /// Clamp and write a single command.
    pub async fn write(
        &self,
        cmd: ActuatorCommand,
    ) -> Result<usize, SerialError> {
        self.write_batch(&[cmd]).await
    }

    /// Clamp every command and write the batch in order, without interleaving
    /// with other batches. Returns the number of lines written.
    ///
    /// On failure, lines written before the failing one stay written.
    pub async fn write_batch(
        &self,
        batch: &[ActuatorCommand],
    ) -> Result<usize, SerialError> {
        if batch.is_empty() {
            return Ok(0);
        }
        if !self.is_usable() {
            return Err(SerialError::Closed);
        }

        let commands = batch.iter().map(|&cmd| self.table.shape(cmd)).collect();
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(WriteRequest { commands, reply })
            .await
            .map_err(|_| SerialError::Closed)?;
        rx.await.map_err(|_| SerialError::Closed)?
    }
}

fn writer_loop<L: SerialLink>(
    mut link: L,
    mut rx: mpsc::Receiver<WriteRequest>,
    mode: ProtocolMode,
    usable: Arc<AtomicBool>,
) {
    while let Some(request) = rx.blocking_recv() {
        let result = write_lines(&mut link, &request.commands, mode);
        let failed = result.is_err();
        if let Err(error) = &result {
            tracing::error!(%error, "serial link failed, closing channel");
            usable.store(false, Ordering::Release);
        }
        // The requester may have gone away; the write happened regardless.
        let _ = request.reply.send(result);
        if failed {
            break;
        }
    }
    tracing::debug!("serial writer stopped");
}

fn write_lines<L: SerialLink>(
    link: &mut L,
    commands: &[ActuatorCommand],
    mode: ProtocolMode,
) -> Result<usize, SerialError> {
    for (written, cmd) in commands.iter().enumerate() {
        let line = encode_line(cmd, mode);
        link.write_line(line.as_bytes())
            .map_err(|source| SerialError::Write { written, source })?;
        tracing::debug!(id = %cmd.id, angle = cmd.angle, "serial tx");
    }
    link.flush().map_err(|source| SerialError::Write {
        written: commands.len(),
        source,
    })?;
    Ok(commands.len())
}
