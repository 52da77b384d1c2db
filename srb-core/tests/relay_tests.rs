use std::{
    io,
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use srb_core::utils::{
    connection::server::{bind, serve, BatchSettings},
    controllers::{SerialChannel, SerialLink},
    errors::{RelayError, SerialError},
    protocol::{ActuatorClass, ActuatorCommand, ActuatorId, ActuatorProfile, ActuatorTable, ProtocolMode},
};
use tokio::{io::AsyncWriteExt, net::TcpStream, sync::oneshot, task::JoinHandle};

/// In-memory serial link. Fails once `fail_at` lines have been written.
#[derive(Clone, Default)]
struct RecordingLink {
    lines: Arc<Mutex<Vec<String>>>,
    fail_at: Option<usize>,
}

impl SerialLink for RecordingLink {
    fn write_line(
        &mut self,
        line: &[u8],
    ) -> io::Result<()> {
        let mut lines = self.lines.lock().unwrap();
        if self.fail_at == Some(lines.len()) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
        }
        lines.push(String::from_utf8(line.to_vec()).unwrap());
        Ok(())
    }
}

struct Relay {
    addr: SocketAddr,
    server: JoinHandle<Result<(), RelayError>>,
    stop: oneshot::Sender<()>,
}

fn servo_table() -> ActuatorTable {
    ActuatorTable::new(Vec::new(), ActuatorClass::Servo)
}

fn start(
    link: RecordingLink,
    table: ActuatorTable,
    mode: ProtocolMode,
) -> Relay {
    let channel = SerialChannel::spawn(link, table, mode, 16).unwrap();
    let listener = bind(SocketAddr::from(([127, 0, 0, 1], 0)), 10).unwrap();
    let addr = listener.local_addr().unwrap();
    let settings = BatchSettings {
        mode,
        idle_timeout: Duration::from_millis(300),
        max_batch_bytes: 64 * 1024,
    };
    let (stop, stopped) = oneshot::channel::<()>();
    let server = tokio::spawn(serve(listener, channel, settings, async {
        let _ = stopped.await;
    }));
    Relay { addr, server, stop }
}

async fn send(
    addr: SocketAddr,
    payload: &[u8],
) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(payload).await.unwrap();
    stream.shutdown().await.unwrap();
}

async fn wait_for_lines(
    lines: &Arc<Mutex<Vec<String>>>,
    count: usize,
) -> Vec<String> {
    for _ in 0..300 {
        {
            let lines = lines.lock().unwrap();
            if lines.len() >= count {
                return lines.clone();
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    lines.lock().unwrap().clone()
}

#[tokio::test]
async fn clamps_and_forwards_in_order() {
    let link = RecordingLink::default();
    let relay = start(link.clone(), servo_table(), ProtocolMode::Multi);

    send(relay.addr, b"1 90\n2 200\n3 -5\n").await;

    let lines = wait_for_lines(&link.lines, 3).await;
    assert_eq!(lines, vec!["1 90\n", "2 180\n", "3 0\n"]);
    let _ = relay.stop.send(());
    assert!(relay.server.await.unwrap().is_ok());
}

#[tokio::test]
async fn malformed_line_is_skipped() {
    let link = RecordingLink::default();
    let relay = start(link.clone(), servo_table(), ProtocolMode::Multi);

    send(relay.addr, b"abc\n2 45\n").await;
    send(relay.addr, b"9 9\n").await;

    let lines = wait_for_lines(&link.lines, 2).await;
    assert_eq!(lines, vec!["2 45\n", "9 9\n"]);
}

#[tokio::test]
async fn valid_lines_survive_interleaved_garbage() {
    let link = RecordingLink::default();
    let relay = start(link.clone(), servo_table(), ProtocolMode::Multi);

    send(relay.addr, b"1 10\nbad\n2 20\n3 x\n\n4 40\n1 2 3\n").await;
    send(relay.addr, b"5 50\n").await;

    let lines = wait_for_lines(&link.lines, 4).await;
    assert_eq!(lines, vec!["1 10\n", "2 20\n", "4 40\n", "5 50\n"]);
}

#[tokio::test]
async fn empty_connection_writes_nothing() {
    let link = RecordingLink::default();
    let relay = start(link.clone(), servo_table(), ProtocolMode::Multi);

    // A reachability probe: connect and close without a payload.
    drop(TcpStream::connect(relay.addr).await.unwrap());
    send(relay.addr, b"\n  \nnope\n").await;
    send(relay.addr, b"1 5\n").await;

    let lines = wait_for_lines(&link.lines, 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(lines, vec!["1 5\n"]);
    assert_eq!(link.lines.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn concurrent_batches_are_never_interleaved() {
    let link = RecordingLink::default();
    let relay = start(link.clone(), servo_table(), ProtocolMode::Multi);

    let mut clients = Vec::new();
    for id in 1..=8u8 {
        let addr = relay.addr;
        clients.push(tokio::spawn(async move {
            let payload: String = (0..20).map(|angle| format!("{id} {angle}\n")).collect();
            send(addr, payload.as_bytes()).await;
        }));
    }
    for client in clients {
        client.await.unwrap();
    }

    let lines = wait_for_lines(&link.lines, 160).await;
    assert_eq!(lines.len(), 160);
    for batch in lines.chunks(20) {
        let id = batch[0].split_whitespace().next().unwrap().to_owned();
        for (angle, line) in batch.iter().enumerate() {
            assert_eq!(*line, format!("{id} {angle}\n"));
        }
    }
}

#[tokio::test]
async fn serial_failure_stops_the_relay() {
    let link = RecordingLink {
        fail_at: Some(1),
        ..RecordingLink::default()
    };
    let relay = start(link.clone(), servo_table(), ProtocolMode::Multi);

    send(relay.addr, b"1 10\n2 20\n3 30\n").await;

    let result = tokio::time::timeout(Duration::from_secs(5), relay.server)
        .await
        .expect("relay should stop on serial failure")
        .unwrap();
    assert!(matches!(
        result,
        Err(RelayError::Serial(SerialError::Write { written: 1, .. }))
    ));
    // The line written before the failure stands; the rest is dropped.
    assert_eq!(*link.lines.lock().unwrap(), vec!["1 10\n"]);
    assert!(TcpStream::connect(relay.addr).await.is_err());
}

#[tokio::test]
async fn legacy_motor_values_are_clamped_and_dead_zoned() {
    let link = RecordingLink::default();
    let table = ActuatorTable::new(
        [ActuatorProfile::new(1, ActuatorClass::Motor { dead_zone_pct: 10 })],
        ActuatorClass::Servo,
    );
    let mode = ProtocolMode::Legacy {
        default_id: ActuatorId(1),
    };
    let relay = start(link.clone(), table, mode);

    send(relay.addr, b"300\n-10\n-120\n2 400\n").await;

    let lines = wait_for_lines(&link.lines, 4).await;
    assert_eq!(lines, vec!["255\n", "0\n", "-120\n", "2 180\n"]);
}

#[tokio::test]
async fn channel_clamps_single_writes() {
    let link = RecordingLink::default();
    let table = ActuatorTable::new(
        [ActuatorProfile::new(2, ActuatorClass::Band { min: 65, max: 125 })],
        ActuatorClass::Servo,
    );
    let channel = SerialChannel::spawn(link.clone(), table, ProtocolMode::Multi, 4).unwrap();

    assert_eq!(channel.write(ActuatorCommand::new(2, 10)).await.unwrap(), 1);
    assert_eq!(channel.write(ActuatorCommand::new(7, 999)).await.unwrap(), 1);
    assert_eq!(channel.write_batch(&[]).await.unwrap(), 0);
    assert_eq!(*link.lines.lock().unwrap(), vec!["2 65\n", "7 180\n"]);
}

#[tokio::test]
async fn failed_channel_stays_closed() {
    let link = RecordingLink {
        fail_at: Some(0),
        ..RecordingLink::default()
    };
    let channel = SerialChannel::spawn(link.clone(), servo_table(), ProtocolMode::Multi, 4).unwrap();
    let other = channel.clone();

    let first = channel.write(ActuatorCommand::new(1, 90)).await;
    assert!(matches!(first, Err(SerialError::Write { written: 0, .. })));
    assert!(!other.is_usable());
    assert!(matches!(
        other.write(ActuatorCommand::new(1, 90)).await,
        Err(SerialError::Closed)
    ));
    assert!(link.lines.lock().unwrap().is_empty());
}
