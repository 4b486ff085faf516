//! WebSocket relay modes.
//!
//! Both ends of the relay speak a JSON envelope, one object per text
//! frame:
//!
//! ```json
//! {"msgsToPanel": [...], "msgsFromPanel": [...],
//!  "auth": {"client_id": "...", "client_secret": "..."},
//!  "status": "...", "error": "...", "message": "..."}
//! ```
//!
//! The transport layer here is envelope-typed: the relay loops send and
//! receive [`WsEnvelope`] values and see control frames as relay events,
//! so tungstenite types never leak past this module.
//!
//! [`run_ws_server`] is the system-side endpoint: it gates each client
//! behind an authentication handshake (`auth_required` → credentials →
//! `ready`), sends the standard panel initialization command set, answers
//! panel pings, and keeps the socket alive with protocol-level pings.
//!
//! [`run_ws_bridge`] is the panel side: it dials a panel over TCP and a
//! relay endpoint over WebSocket, authenticates, and forwards both
//! directions. Panel messages produced before the server says `ready`
//! are not forwarded.

use std::time::Instant;

use anyhow::{bail, Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::connection::{run_link, ConnectionConfig, ConnectionHooks};
use crate::constants::{
    CHANNEL_CAPACITY, HEARTBEAT_PERIOD_MS, RECONNECT_BACKOFF, WS_AUTH_DEADLINE,
    WS_CONTROL_DEADLINE, WS_PING_PERIOD, WS_STALE_TIMEOUT,
};
use crate::link::{DialectPreference, PanelLink};
use crate::schema::{flow, Command, HeartBeatTimer, InboundMessage, OutboundMessage};

/// Client credentials for the relay handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthCredentials {
    /// "Username" for authentication.
    pub client_id: String,
    /// "Password" for authentication.
    pub client_secret: String,
}

/// The relay's JSON envelope. Absent fields are omitted on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WsEnvelope {
    /// System→panel messages.
    #[serde(rename = "msgsToPanel", default, skip_serializing_if = "Vec::is_empty")]
    pub msgs_to_panel: Vec<InboundMessage>,

    /// Panel→system messages.
    #[serde(rename = "msgsFromPanel", default, skip_serializing_if = "Vec::is_empty")]
    pub msgs_from_panel: Vec<OutboundMessage>,

    /// Authentication handshake payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthCredentials>,

    /// Connection status ("auth_required", "ready").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// Error message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Informational message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl WsEnvelope {
    /// Envelope carrying messages toward the panel.
    pub fn to_panel(msgs: Vec<InboundMessage>) -> Self {
        Self {
            msgs_to_panel: msgs,
            ..Default::default()
        }
    }

    /// Envelope carrying messages from the panel.
    pub fn from_panel(msgs: Vec<OutboundMessage>) -> Self {
        Self {
            msgs_from_panel: msgs,
            ..Default::default()
        }
    }

    /// Status envelope with a human-readable note.
    pub fn status(status: &str, message: &str) -> Self {
        Self {
            status: Some(status.to_string()),
            message: Some(message.to_string()),
            ..Default::default()
        }
    }

    /// Error envelope.
    pub fn error(error: &str) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Default::default()
        }
    }
}

/// The standard panel initialization the server pushes once a client is
/// ready: activate, request info/topology/availability, set the heartbeat
/// timer, clear stale state.
fn init_envelope() -> WsEnvelope {
    WsEnvelope::to_panel(vec![InboundMessage::command(Command {
        activate_panel: true,
        send_panel_info: true,
        send_panel_topology: true,
        report_hwc_availability: true,
        clear_all: true,
        set_heartbeat_timer: Some(HeartBeatTimer {
            value: HEARTBEAT_PERIOD_MS,
            ..Default::default()
        }),
        ..Default::default()
    })])
}

// ============================================================================
// Envelope transport
// ============================================================================

/// Stream type of a dialed (possibly TLS) relay connection.
type ClientStream = tokio_tungstenite::MaybeTlsStream<TcpStream>;

/// What a relay loop sees on its WebSocket, one level above raw frames.
#[derive(Debug)]
enum WsEvent {
    /// A decoded envelope from a text frame.
    Envelope(WsEnvelope),
    /// Protocol-level ping that wants a pong.
    Ping(Vec<u8>),
    /// Protocol-level pong; counts as liveness, nothing more.
    Pong,
    /// The peer sent a close frame.
    Closed {
        code: u16,
        reason: String,
    },
}

/// Write half: envelopes out, plus the control frames the relay needs.
struct EnvelopeWriter<S> {
    sink: futures_util::stream::SplitSink<WebSocketStream<S>, Message>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> EnvelopeWriter<S> {
    /// Send one envelope as a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error when the connection is closed or the write fails.
    async fn send(&mut self, envelope: &WsEnvelope) -> Result<()> {
        let json = serde_json::to_string(envelope).expect("envelope serializes");
        self.sink
            .send(Message::Text(json))
            .await
            .context("WebSocket envelope send failed")
    }

    /// Send a protocol-level ping.
    ///
    /// # Errors
    ///
    /// Returns an error when the write fails.
    async fn ping(&mut self) -> Result<()> {
        self.sink
            .send(Message::Ping(b"ping".to_vec()))
            .await
            .context("WebSocket ping failed")
    }

    /// Answer a ping with its payload.
    ///
    /// # Errors
    ///
    /// Returns an error when the write fails.
    async fn pong(&mut self, payload: Vec<u8>) -> Result<()> {
        self.sink
            .send(Message::Pong(payload))
            .await
            .context("WebSocket pong failed")
    }

    /// Best-effort close: announce with a close frame, then shut the sink.
    async fn close(&mut self) {
        let _ = self.sink.send(Message::Close(None)).await;
        let _ = self.sink.close().await;
    }
}

/// Read half: turns the frame stream into [`WsEvent`]s.
struct EnvelopeReader<S> {
    stream: futures_util::stream::SplitStream<WebSocketStream<S>>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> EnvelopeReader<S> {
    /// Next relay-level event; `None` once the stream ends or fails.
    ///
    /// Text frames that do not parse as envelopes are dropped (the
    /// decode-failure policy: lose the one message, keep the connection),
    /// and frame kinds the relay has no use for are skipped.
    async fn next(&mut self) -> Option<WsEvent> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => match serde_json::from_str(&text) {
                    Ok(envelope) => return Some(WsEvent::Envelope(envelope)),
                    Err(e) => log::warn!("invalid envelope dropped: {e}"),
                },
                Ok(Message::Ping(payload)) => return Some(WsEvent::Ping(payload)),
                Ok(Message::Pong(_)) => return Some(WsEvent::Pong),
                Ok(Message::Close(frame)) => {
                    let (code, reason) = frame
                        .map(|f| (f.code.into(), f.reason.to_string()))
                        .unwrap_or((1005, String::new()));
                    return Some(WsEvent::Closed { code, reason });
                }
                Ok(Message::Binary(_)) => log::debug!("binary WebSocket frame ignored"),
                Ok(_) => {} // raw frames
                Err(e) => {
                    log::warn!("WebSocket read failed: {e}");
                    return None;
                }
            }
        }
    }
}

/// Dial a relay endpoint (TLS negotiated for `wss://`).
///
/// # Errors
///
/// Returns an error when the URL is invalid or the handshake fails.
async fn dial(url: &str) -> Result<(EnvelopeWriter<ClientStream>, EnvelopeReader<ClientStream>)> {
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;

    let request = url
        .into_client_request()
        .with_context(|| format!("invalid WebSocket URL: {url}"))?;
    let (stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .context("WebSocket connect failed")?;
    let (sink, stream) = stream.split();
    Ok((EnvelopeWriter { sink }, EnvelopeReader { stream }))
}

/// Accept a WebSocket handshake on an already-accepted TCP socket.
///
/// # Errors
///
/// Returns an error when the client's upgrade request is malformed.
async fn accept(socket: TcpStream) -> Result<(EnvelopeWriter<TcpStream>, EnvelopeReader<TcpStream>)> {
    let stream = tokio_tungstenite::accept_async(socket)
        .await
        .context("WebSocket accept failed")?;
    let (sink, stream) = stream.split();
    Ok((EnvelopeWriter { sink }, EnvelopeReader { stream }))
}

/// True when the URL's scheme carries TLS.
fn is_secure_url(url: &str) -> bool {
    url.starts_with("wss://")
}

// ============================================================================
// Server
// ============================================================================

/// Serve the relay envelope to WebSocket clients.
///
/// Each accepted client is authenticated (when credentials are
/// configured), primed with the panel initialization command set, and
/// handled until it disconnects, goes stale, or the server is cancelled.
///
/// # Errors
///
/// Returns an error when the listen address cannot be bound.
pub async fn run_ws_server(
    listen: String,
    credentials: Option<AuthCredentials>,
    mut cancel: watch::Receiver<bool>,
) -> Result<()> {
    let listener = TcpListener::bind(&listen)
        .await
        .with_context(|| format!("cannot listen on {listen}"))?;
    log::info!("WebSocket relay listening on {listen}");

    loop {
        let accepted = tokio::select! {
            _ = cancel.changed() => return Ok(()),
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Err(e) => log::warn!("accept failed: {e}"),
            Ok((socket, peer)) => {
                log::info!("WebSocket client connected from {peer}");
                let creds = credentials.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_ws_client(socket, creds, cancel).await {
                        log::warn!("WebSocket client {peer} failed: {e}");
                    }
                    log::info!("WebSocket client {peer} closed");
                });
            }
        }
    }
}

async fn handle_ws_client(
    socket: TcpStream,
    credentials: Option<AuthCredentials>,
    mut cancel: watch::Receiver<bool>,
) -> Result<()> {
    let (mut writer, mut reader) = accept(socket).await?;

    if let Some(expected) = &credentials {
        if !authenticate(&mut writer, &mut reader, expected).await? {
            writer.close().await;
            return Ok(());
        }
    }

    writer
        .send(&WsEnvelope::status("ready", "Connection established and authenticated."))
        .await?;
    writer.send(&init_envelope()).await?;

    let mut ping_timer = tokio::time::interval(WS_PING_PERIOD);
    ping_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ping_timer.tick().await;
    let mut last_activity = Instant::now();

    loop {
        tokio::select! {
            _ = cancel.changed() => {
                writer.close().await;
                return Ok(());
            }

            _ = ping_timer.tick() => {
                if last_activity.elapsed() > WS_STALE_TIMEOUT {
                    bail!("client stale for {:?}", last_activity.elapsed());
                }
                // Protocol-level ping with a control-frame deadline, plus
                // an app-level flow ping the panel answers
                timeout(WS_CONTROL_DEADLINE, writer.ping())
                    .await
                    .map_err(|_| anyhow::anyhow!("ping write deadline passed"))??;
                writer
                    .send(&WsEnvelope::to_panel(vec![InboundMessage::flow(flow::PING)]))
                    .await?;
            }

            event = reader.next() => match event {
                None => return Ok(()),
                Some(WsEvent::Envelope(envelope)) => {
                    last_activity = Instant::now();
                    handle_panel_traffic(&mut writer, &envelope).await?;
                }
                Some(WsEvent::Ping(payload)) => {
                    last_activity = Instant::now();
                    writer.pong(payload).await?;
                }
                Some(WsEvent::Pong) => {
                    last_activity = Instant::now();
                }
                Some(WsEvent::Closed { code, reason }) => {
                    log::info!("client closed ({code}: {reason})");
                    return Ok(());
                }
            }
        }
    }
}

async fn handle_panel_traffic<S: AsyncRead + AsyncWrite + Unpin>(
    writer: &mut EnvelopeWriter<S>,
    envelope: &WsEnvelope,
) -> Result<()> {
    for msg in &envelope.msgs_from_panel {
        if msg.flow_message == flow::PING {
            log::debug!("panel ping, acknowledging");
            writer
                .send(&WsEnvelope::to_panel(vec![InboundMessage::flow(flow::ACK)]))
                .await?;
        }
        if let Some(info) = &msg.panel_info {
            if !info.model.is_empty() {
                log::info!("panel model {} serial {}", info.model, info.serial);
            }
        }
        if let Some(top) = &msg.panel_topology {
            if !top.json.is_empty() {
                log::info!("panel topology received ({} bytes)", top.json.len());
            }
        }
        for event in &msg.events {
            log::info!("panel event: HWC#{} {:?}", event.hwc_id, event.kind());
        }
    }
    Ok(())
}

/// The server side of the auth handshake. `Ok(true)` means authenticated.
async fn authenticate<S: AsyncRead + AsyncWrite + Unpin>(
    writer: &mut EnvelopeWriter<S>,
    reader: &mut EnvelopeReader<S>,
    expected: &AuthCredentials,
) -> Result<bool> {
    writer
        .send(&WsEnvelope::status(
            "auth_required",
            "Please authenticate with Client ID/Client Secret.",
        ))
        .await?;

    let deadline = Instant::now() + WS_AUTH_DEADLINE;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            let _ = writer
                .send(&WsEnvelope::error("authentication timeout or failure"))
                .await;
            return Ok(false);
        }

        let event = match timeout(remaining, reader.next()).await {
            Err(_) => {
                let _ = writer
                    .send(&WsEnvelope::error("authentication timeout or failure"))
                    .await;
                return Ok(false);
            }
            Ok(None) => return Ok(false),
            Ok(Some(event)) => event,
        };

        match event {
            WsEvent::Envelope(envelope) => match envelope.auth {
                None => {
                    // Panel traffic before `ready` is dropped, not fatal
                    if !envelope.msgs_from_panel.is_empty() || !envelope.msgs_to_panel.is_empty() {
                        log::warn!("dropping panel messages received before authentication");
                        continue;
                    }
                    let _ = writer
                        .send(&WsEnvelope::error("authentication required"))
                        .await;
                    return Ok(false);
                }
                Some(auth) => {
                    if auth == *expected {
                        log::info!("client authenticated successfully");
                        return Ok(true);
                    }
                    log::warn!("invalid credentials from client");
                    let _ = writer.send(&WsEnvelope::error("invalid credentials")).await;
                    return Ok(false);
                }
            },
            WsEvent::Ping(payload) => writer.pong(payload).await?,
            WsEvent::Pong => {}
            WsEvent::Closed { .. } => return Ok(false),
        }
    }
}

// ============================================================================
// Bridge client
// ============================================================================

/// Options for the panel↔WebSocket bridge.
pub struct WsBridgeOptions {
    /// Dialect policy for the panel connection.
    pub panel_dialect: DialectPreference,
    /// Credentials presented when the server demands authentication.
    pub credentials: Option<AuthCredentials>,
    /// Allow sending credentials over unencrypted `ws://`.
    pub allow_insecure_auth: bool,
}

/// Dial `panel_addr` over TCP and `ws_url` over WebSocket and forward
/// both directions, honoring the server's auth handshake.
///
/// # Errors
///
/// Returns an error on fatal misconfiguration (credentials over `ws://`
/// without the explicit override) and on authentication refusal — the
/// bridge never retries refused credentials.
pub async fn run_ws_bridge(
    panel_addr: String,
    ws_url: String,
    options: WsBridgeOptions,
    mut cancel: watch::Receiver<bool>,
) -> Result<()> {
    if options.credentials.is_some() && !is_secure_url(&ws_url) {
        if !options.allow_insecure_auth {
            bail!(
                "refusing to send credentials over unencrypted {ws_url}; \
                 use wss:// or pass --allow_insecure_auth"
            );
        }
        log::warn!("sending credentials over unencrypted WebSocket ({ws_url})");
    }

    let (to_panel_tx, to_panel_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (from_panel_tx, mut from_panel_rx) = mpsc::channel::<OutboundMessage>(CHANNEL_CAPACITY);

    let hooks = ConnectionHooks {
        on_connect: Some(Box::new(|binary, _| {
            log::info!(
                "panel connected ({})",
                if binary { "binary" } else { "ASCII" }
            );
        })),
        on_disconnect: Some(Box::new(|_| {
            log::info!("panel disconnected");
        })),
    };

    // The link gets its own cancel signal so it can be stopped even when
    // the relay loop exits for its own reasons (e.g. refused credentials)
    let (link_cancel_tx, link_cancel_rx) = watch::channel(false);
    let link = tokio::spawn(run_link::<PanelLink>(
        panel_addr,
        to_panel_rx,
        from_panel_tx,
        link_cancel_rx,
        ConnectionConfig {
            dialect: options.panel_dialect,
            ..Default::default()
        },
        hooks,
    ));

    let result = ws_bridge_loop(
        &ws_url,
        options.credentials.as_ref(),
        &to_panel_tx,
        &mut from_panel_rx,
        &mut cancel,
    )
    .await;

    let _ = link_cancel_tx.send(true);
    drop(to_panel_tx);
    drop(from_panel_rx);
    let _ = link.await;
    result
}

async fn ws_bridge_loop(
    ws_url: &str,
    credentials: Option<&AuthCredentials>,
    to_panel: &mpsc::Sender<InboundMessage>,
    from_panel: &mut mpsc::Receiver<OutboundMessage>,
    cancel: &mut watch::Receiver<bool>,
) -> Result<()> {
    loop {
        if *cancel.borrow() {
            return Ok(());
        }

        log::info!("connecting to relay {ws_url}");
        let connected = tokio::select! {
            _ = cancel.changed() => return Ok(()),
            connected = dial(ws_url) => connected,
        };

        match connected {
            Err(e) => log::warn!("relay connect failed: {e}"),
            Ok((mut writer, mut reader)) => {
                match relay_session(
                    &mut writer,
                    &mut reader,
                    credentials,
                    to_panel,
                    from_panel,
                    cancel,
                )
                .await
                {
                    SessionEnd::Cancelled => {
                        writer.close().await;
                        return Ok(());
                    }
                    SessionEnd::AuthRefused => {
                        writer.close().await;
                        bail!("relay refused the supplied credentials");
                    }
                    SessionEnd::Lost => {}
                }
            }
        }

        log::info!("retrying relay in {:.0?}", RECONNECT_BACKOFF);
        tokio::select! {
            _ = cancel.changed() => return Ok(()),
            _ = tokio::time::sleep(RECONNECT_BACKOFF) => {}
        }
    }
}

enum SessionEnd {
    Cancelled,
    AuthRefused,
    Lost,
}

async fn relay_session(
    writer: &mut EnvelopeWriter<ClientStream>,
    reader: &mut EnvelopeReader<ClientStream>,
    credentials: Option<&AuthCredentials>,
    to_panel: &mpsc::Sender<InboundMessage>,
    from_panel: &mut mpsc::Receiver<OutboundMessage>,
    cancel: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let mut ready = false;
    let mut last_activity = Instant::now();
    let mut stale_timer = tokio::time::interval(WS_PING_PERIOD);
    stale_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    stale_timer.tick().await;

    loop {
        tokio::select! {
            _ = cancel.changed() => return SessionEnd::Cancelled,

            _ = stale_timer.tick() => {
                if last_activity.elapsed() > WS_STALE_TIMEOUT {
                    log::warn!("relay stale for {:?}, reconnecting", last_activity.elapsed());
                    return SessionEnd::Lost;
                }
            }

            msg = from_panel.recv() => match msg {
                None => return SessionEnd::Cancelled,
                Some(msg) => {
                    if !ready {
                        // Keep the panel's session alive ourselves until
                        // the relay starts forwarding
                        if msg.flow_message == flow::PING {
                            let _ = to_panel.try_send(InboundMessage::flow(flow::ACK));
                        }
                        log::debug!("panel message before relay ready, not forwarded");
                        continue;
                    }
                    if writer.send(&WsEnvelope::from_panel(vec![msg])).await.is_err() {
                        return SessionEnd::Lost;
                    }
                }
            },

            event = reader.next() => match event {
                None => return SessionEnd::Lost,
                Some(WsEvent::Envelope(envelope)) => {
                    last_activity = Instant::now();

                    if let Some(error) = &envelope.error {
                        log::error!("relay error: {error}");
                        if error.contains("credentials") || error.contains("authentication") {
                            return SessionEnd::AuthRefused;
                        }
                        continue;
                    }
                    match envelope.status.as_deref() {
                        Some("auth_required") => {
                            let Some(creds) = credentials else {
                                log::error!("relay requires authentication, no credentials given");
                                return SessionEnd::AuthRefused;
                            };
                            let auth = WsEnvelope {
                                auth: Some(creds.clone()),
                                ..Default::default()
                            };
                            if writer.send(&auth).await.is_err() {
                                return SessionEnd::Lost;
                            }
                        }
                        Some("ready") => {
                            log::info!("relay ready, forwarding enabled");
                            ready = true;
                        }
                        Some(other) => log::debug!("relay status: {other}"),
                        None => {}
                    }

                    for msg in envelope.msgs_to_panel {
                        tokio::select! {
                            _ = cancel.changed() => return SessionEnd::Cancelled,
                            sent = to_panel.send(msg) => {
                                if sent.is_err() {
                                    return SessionEnd::Cancelled;
                                }
                            }
                        }
                    }
                }
                Some(WsEvent::Ping(payload)) => {
                    last_activity = Instant::now();
                    if writer.pong(payload).await.is_err() {
                        return SessionEnd::Lost;
                    }
                }
                Some(WsEvent::Pong) => {
                    last_activity = Instant::now();
                }
                Some(WsEvent::Closed { code, reason }) => {
                    log::info!("relay closed ({code}: {reason})");
                    return SessionEnd::Lost;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_shapes() {
        let env = WsEnvelope::status("auth_required", "Please authenticate.");
        let json = serde_json::to_string(&env).unwrap();
        assert!(json.contains("\"status\":\"auth_required\""));
        assert!(!json.contains("msgsToPanel"));

        let env = WsEnvelope::to_panel(vec![InboundMessage::flow(flow::PING)]);
        let json = serde_json::to_string(&env).unwrap();
        assert!(json.contains("\"msgsToPanel\":[{\"FlowMessage\":1}]"));
    }

    #[test]
    fn test_envelope_auth_round_trip() {
        let env = WsEnvelope {
            auth: Some(AuthCredentials {
                client_id: "admin".into(),
                client_secret: "password".into(),
            }),
            ..Default::default()
        };
        let json = serde_json::to_string(&env).unwrap();
        let back: WsEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back.auth.unwrap().client_id, "admin");
    }

    #[test]
    fn test_init_envelope_contents() {
        let env = init_envelope();
        let cmd = env.msgs_to_panel[0].command.as_ref().unwrap();
        assert!(cmd.activate_panel);
        assert!(cmd.clear_all);
        assert_eq!(cmd.set_heartbeat_timer.as_ref().unwrap().value, 3000);
    }

    #[test]
    fn test_is_secure_url() {
        assert!(is_secure_url("wss://relay.example.com/ws"));
        assert!(!is_secure_url("ws://10.0.0.2:8080/ws"));
        assert!(!is_secure_url("http://example.com"));
    }

    #[tokio::test]
    async fn test_dial_invalid_url_returns_error() {
        assert!(dial("not-a-url").await.is_err());
    }

    async fn expect_envelope(reader: &mut EnvelopeReader<ClientStream>) -> WsEnvelope {
        loop {
            match reader.next().await.expect("stream alive") {
                WsEvent::Envelope(envelope) => return envelope,
                WsEvent::Ping(_) | WsEvent::Pong => continue,
                other => panic!("expected envelope, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_server_auth_handshake() {
        let creds = AuthCredentials {
            client_id: "admin".into(),
            client_secret: "password".into(),
        };
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let server_creds = creds.clone();
        let server = tokio::spawn(run_ws_server(addr.to_string(), Some(server_creds), cancel_rx));
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let (mut writer, mut reader) = dial(&format!("ws://{addr}")).await.unwrap();

        // Server advertises auth_required
        let first = expect_envelope(&mut reader).await;
        assert_eq!(first.status.as_deref(), Some("auth_required"));

        // A panel message before authentication is dropped, not fatal
        writer
            .send(&WsEnvelope::from_panel(vec![OutboundMessage::flow(flow::PING)]))
            .await
            .unwrap();

        // Authenticate; server answers ready and then the init commands
        writer
            .send(&WsEnvelope {
                auth: Some(creds),
                ..Default::default()
            })
            .await
            .unwrap();
        let ready = expect_envelope(&mut reader).await;
        assert_eq!(ready.status.as_deref(), Some("ready"));
        let init = expect_envelope(&mut reader).await;
        assert!(init.msgs_to_panel[0].command.as_ref().unwrap().activate_panel);

        cancel_tx.send(true).unwrap();
        let _ = server.await.unwrap();
    }

    #[tokio::test]
    async fn test_server_rejects_bad_credentials() {
        let creds = AuthCredentials {
            client_id: "admin".into(),
            client_secret: "password".into(),
        };
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let server = tokio::spawn(run_ws_server(addr.to_string(), Some(creds), cancel_rx));
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let (mut writer, mut reader) = dial(&format!("ws://{addr}")).await.unwrap();
        let _ = expect_envelope(&mut reader).await;
        writer
            .send(&WsEnvelope {
                auth: Some(AuthCredentials {
                    client_id: "admin".into(),
                    client_secret: "wrong".into(),
                }),
                ..Default::default()
            })
            .await
            .unwrap();
        let reply = expect_envelope(&mut reader).await;
        assert_eq!(reply.error.as_deref(), Some("invalid credentials"));

        server.abort();
    }

    #[tokio::test]
    async fn test_bridge_refuses_insecure_credentials() {
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let result = run_ws_bridge(
            "127.0.0.1:1".into(),
            "ws://relay.example.com/ws".into(),
            WsBridgeOptions {
                panel_dialect: DialectPreference::Auto,
                credentials: Some(AuthCredentials {
                    client_id: "admin".into(),
                    client_secret: "password".into(),
                }),
                allow_insecure_auth: false,
            },
            cancel_rx,
        )
        .await;
        assert!(result.is_err());
    }
}
