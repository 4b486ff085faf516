//! Per-connection runtime.
//!
//! Owns one TCP socket and runs the three tasks of a live connection:
//!
//! - **Writer** — drains the `to_peer` channel, encodes in the committed
//!   dialect, writes.
//! - **Reader** — reads frames or lines, decodes, delivers on `from_peer`.
//! - **Heartbeat** — periodic PING plus the liveness deadline, re-armed by
//!   any inbound traffic.
//!
//! All socket writes go through one async mutex on the write half, so a
//! heartbeat can never interleave mid-frame with an application message.
//! Channels are bounded: a full `to_peer` blocks the application, a full
//! `from_peer` blocks the reader (and, through the TCP window, the peer).
//!
//! [`run_link`] adds the outer lifecycle: dial, probe, run, and on any
//! fatal error fire `on_disconnect`, back off and re-dial. Cancellation
//! short-circuits every state including the backoff sleep.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::MissedTickBehavior;

use crate::constants::{HEARTBEAT_PERIOD_MS, LIVENESS_MULTIPLIER, RECONNECT_BACKOFF};
use crate::framing::StreamReader;
use crate::link::{Dialect, DialectPreference, LinkRole};
use crate::probe::probe_dialect;

/// Tuning for one connection's lifecycle.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Dialect decision policy.
    pub dialect: DialectPreference,
    /// Heartbeat period; `None` disables both pings and the liveness
    /// deadline (used on accepted system sockets, where the peer drives
    /// the ping handshake).
    pub heartbeat: Option<Duration>,
    /// Liveness gives up after this many silent heartbeat periods.
    pub liveness_multiplier: u32,
    /// Delay between dial attempts.
    pub backoff: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            dialect: DialectPreference::Auto,
            heartbeat: Some(Duration::from_millis(u64::from(HEARTBEAT_PERIOD_MS))),
            liveness_multiplier: LIVENESS_MULTIPLIER,
            backoff: RECONNECT_BACKOFF,
        }
    }
}

/// Called when a connection reaches CONNECTED: `(is_binary, local_addr)`.
pub type ConnectCallback = Box<dyn Fn(bool, Option<SocketAddr>) + Send + Sync>;

/// Called when a connection dies: `(was_connected)`.
pub type DisconnectCallback = Box<dyn Fn(bool) + Send + Sync>;

/// Lifecycle callbacks for a link.
#[derive(Default)]
pub struct ConnectionHooks {
    /// Fired after the dialect commit, before any traffic.
    pub on_connect: Option<ConnectCallback>,
    /// Fired when the connection dies, before any backoff.
    pub on_disconnect: Option<DisconnectCallback>,
}

impl ConnectionHooks {
    fn connected(&self, is_binary: bool, local: Option<SocketAddr>) {
        if let Some(f) = &self.on_connect {
            f(is_binary, local);
        }
    }

    fn disconnected(&self, was_connected: bool) {
        if let Some(f) = &self.on_disconnect {
            f(was_connected);
        }
    }
}

/// Why a live connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnEnd {
    /// The owner raised the cancel signal.
    Cancelled,
    /// The application dropped its channel ends.
    AppClosed,
    /// Socket error, EOF, framing violation or heartbeat timeout.
    PeerLost,
}

/// Dial `addr` and keep a link alive until cancelled.
///
/// Messages queued on `to_peer` while disconnected are delivered after the
/// next successful dial, in order. Returns when the cancel signal fires or
/// the application closes its channels.
pub async fn run_link<R: LinkRole>(
    addr: String,
    mut to_peer: mpsc::Receiver<R::Tx>,
    from_peer: mpsc::Sender<R::Rx>,
    mut cancel: watch::Receiver<bool>,
    config: ConnectionConfig,
    hooks: ConnectionHooks,
) {
    loop {
        if *cancel.borrow() {
            return;
        }

        log::info!("dialing {addr}");
        let dial = tokio::select! {
            _ = cancel.changed() => return,
            result = TcpStream::connect(&addr) => result,
        };

        match dial {
            Err(e) => {
                log::warn!("dial {addr} failed: {e}");
            }
            Ok(mut stream) => {
                let outcome = tokio::select! {
                    _ = cancel.changed() => return,
                    result = probe_dialect::<R>(&mut stream, config.dialect) => result,
                };
                match outcome {
                    Err(e) => {
                        log::warn!("dialect probe on {addr} failed: {e}");
                    }
                    Ok(outcome) => {
                        let local = stream.local_addr().ok();
                        log::info!("connected to {addr} in {} mode", outcome.dialect);
                        hooks.connected(outcome.dialect.is_binary(), local);

                        let (receiver, end) = run_connected::<R>(
                            stream,
                            outcome.leftover,
                            outcome.dialect,
                            to_peer,
                            from_peer.clone(),
                            &mut cancel,
                            &config,
                        )
                        .await;
                        to_peer = receiver;
                        hooks.disconnected(true);

                        match end {
                            ConnEnd::Cancelled | ConnEnd::AppClosed => return,
                            ConnEnd::PeerLost => {}
                        }
                    }
                }
            }
        }

        log::info!("retrying {addr} in {:.0?}", config.backoff);
        tokio::select! {
            _ = cancel.changed() => return,
            _ = tokio::time::sleep(config.backoff) => {}
        }
    }
}

/// Serve one already-accepted socket (bridge system side). The dialect is
/// whatever the caller committed to; there is no probe and no re-dial.
///
/// Returns the `to_peer` receiver for reuse with the next accepted socket.
pub async fn run_accepted_link<R: LinkRole>(
    stream: TcpStream,
    dialect: Dialect,
    to_peer: mpsc::Receiver<R::Tx>,
    from_peer: mpsc::Sender<R::Rx>,
    cancel: &mut watch::Receiver<bool>,
    config: &ConnectionConfig,
    hooks: &ConnectionHooks,
) -> (mpsc::Receiver<R::Tx>, ConnEnd) {
    let local = stream.local_addr().ok();
    hooks.connected(dialect.is_binary(), local);
    let (receiver, end) =
        run_connected::<R>(stream, Vec::new(), dialect, to_peer, from_peer, cancel, config).await;
    hooks.disconnected(true);
    (receiver, end)
}

/// Run reader, writer and heartbeat for one live socket until something
/// dies. Returns the `to_peer` receiver so the caller can reuse it on the
/// next connection.
async fn run_connected<R: LinkRole>(
    stream: TcpStream,
    leftover: Vec<u8>,
    dialect: Dialect,
    to_peer: mpsc::Receiver<R::Tx>,
    from_peer: mpsc::Sender<R::Rx>,
    cancel: &mut watch::Receiver<bool>,
    config: &ConnectionConfig,
) -> (mpsc::Receiver<R::Tx>, ConnEnd) {
    let (read_half, write_half) = stream.into_split();
    let writer = Arc::new(Mutex::new(write_half));
    let last_rx = Arc::new(StdMutex::new(Instant::now()));

    // Connection-local death signal; any task can raise it
    let (dead_tx, dead_rx) = watch::channel(false);
    let dead_tx = Arc::new(dead_tx);

    let writer_task = tokio::spawn(writer_loop::<R>(
        dialect,
        Arc::clone(&writer),
        to_peer,
        dead_rx.clone(),
        Arc::clone(&dead_tx),
    ));

    let heartbeat_task = config.heartbeat.map(|period| {
        tokio::spawn(heartbeat_loop::<R>(
            dialect,
            Arc::clone(&writer),
            period,
            config.liveness_multiplier,
            Arc::clone(&last_rx),
            dead_rx.clone(),
            Arc::clone(&dead_tx),
        ))
    });

    let end = reader_loop::<R>(
        read_half,
        leftover,
        dialect,
        from_peer,
        &last_rx,
        cancel,
        dead_rx,
    )
    .await;

    // Stop the sibling tasks and wait for them; dropping both socket
    // halves afterwards closes the connection.
    let _ = dead_tx.send(true);
    let (receiver, writer_end) = writer_task.await.unwrap_or_else(|e| {
        // A panicking writer task is a bug; surface it instead of hanging
        panic!("writer task failed: {e}")
    });
    if let Some(task) = heartbeat_task {
        let _ = task.await;
    }

    let end = match (end, writer_end) {
        (ConnEnd::PeerLost, WriterEnd::AppClosed) => ConnEnd::AppClosed,
        (end, _) => end,
    };
    (receiver, end)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterEnd {
    Stopped,
    AppClosed,
}

async fn writer_loop<R: LinkRole>(
    dialect: Dialect,
    writer: Arc<Mutex<OwnedWriteHalf>>,
    mut to_peer: mpsc::Receiver<R::Tx>,
    mut dead_rx: watch::Receiver<bool>,
    dead_tx: Arc<watch::Sender<bool>>,
) -> (mpsc::Receiver<R::Tx>, WriterEnd) {
    let end = loop {
        tokio::select! {
            _ = dead_rx.changed() => break WriterEnd::Stopped,
            msg = to_peer.recv() => match msg {
                None => {
                    log::debug!("to-peer channel closed by application");
                    let _ = dead_tx.send(true);
                    break WriterEnd::AppClosed;
                }
                Some(msg) => {
                    let bytes = R::encode(dialect, &msg);
                    if bytes.is_empty() {
                        continue; // nothing representable in this dialect
                    }
                    let mut w = writer.lock().await;
                    if let Err(e) = w.write_all(&bytes).await {
                        log::warn!("socket write failed: {e}");
                        let _ = dead_tx.send(true);
                        break WriterEnd::Stopped;
                    }
                }
            }
        }
    };
    (to_peer, end)
}

async fn heartbeat_loop<R: LinkRole>(
    dialect: Dialect,
    writer: Arc<Mutex<OwnedWriteHalf>>,
    period: Duration,
    multiplier: u32,
    last_rx: Arc<StdMutex<Instant>>,
    mut dead_rx: watch::Receiver<bool>,
    dead_tx: Arc<watch::Sender<bool>>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // the first tick fires immediately; skip it

    loop {
        tokio::select! {
            _ = dead_rx.changed() => return,
            _ = ticker.tick() => {
                let silence = last_rx.lock().expect("liveness clock").elapsed();
                if silence > period * multiplier {
                    log::warn!(
                        "no inbound traffic for {:.0?} ({multiplier} heartbeat periods), closing",
                        silence
                    );
                    let _ = dead_tx.send(true);
                    return;
                }
                let bytes = R::encode(dialect, &R::ping());
                let mut w = writer.lock().await;
                if let Err(e) = w.write_all(&bytes).await {
                    log::warn!("heartbeat write failed: {e}");
                    let _ = dead_tx.send(true);
                    return;
                }
            }
        }
    }
}

async fn reader_loop<R: LinkRole>(
    read_half: tokio::net::tcp::OwnedReadHalf,
    leftover: Vec<u8>,
    dialect: Dialect,
    from_peer: mpsc::Sender<R::Rx>,
    last_rx: &StdMutex<Instant>,
    cancel: &mut watch::Receiver<bool>,
    mut dead_rx: watch::Receiver<bool>,
) -> ConnEnd {
    let mut reader = StreamReader::new(read_half, leftover);
    let mut parser = R::Parser::default();

    macro_rules! deliver {
        ($msg:expr) => {{
            *last_rx.lock().expect("liveness clock") = Instant::now();
            tokio::select! {
                _ = cancel.changed() => break ConnEnd::Cancelled,
                sent = from_peer.send($msg) => {
                    if sent.is_err() {
                        log::debug!("from-peer channel closed by application");
                        break ConnEnd::AppClosed;
                    }
                }
            }
        }};
    }

    match dialect {
        Dialect::Binary => loop {
            tokio::select! {
                _ = cancel.changed() => break ConnEnd::Cancelled,
                _ = dead_rx.changed() => break ConnEnd::PeerLost,
                frame = reader.read_frame() => match frame {
                    Ok(Some(payload)) => match R::decode_payload(&payload) {
                        Ok(msg) => deliver!(msg),
                        Err(e) => {
                            // One bad message; the framing is still sound
                            log::warn!("dropping undecodable frame ({} bytes): {e}", payload.len());
                            *last_rx.lock().expect("liveness clock") = Instant::now();
                        }
                    },
                    Ok(None) => {
                        log::info!("peer closed the connection");
                        break ConnEnd::PeerLost;
                    }
                    Err(e) => {
                        log::warn!("binary read failed: {e}");
                        break ConnEnd::PeerLost;
                    }
                }
            }
        },
        Dialect::Ascii => loop {
            tokio::select! {
                _ = cancel.changed() => break ConnEnd::Cancelled,
                _ = dead_rx.changed() => break ConnEnd::PeerLost,
                line = reader.read_line() => match line {
                    Ok(Some(line)) => {
                        *last_rx.lock().expect("liveness clock") = Instant::now();
                        if let Some(msg) = R::decode_line(&mut parser, &line) {
                            deliver!(msg);
                        }
                    }
                    Ok(None) => {
                        log::info!("peer closed the connection");
                        break ConnEnd::PeerLost;
                    }
                    Err(e) => {
                        log::warn!("line read failed: {e}");
                        break ConnEnd::PeerLost;
                    }
                }
            }
        },
    }
}
