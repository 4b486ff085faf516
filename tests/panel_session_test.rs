//! End-to-end session tests against in-process fake panels.
//!
//! These exercise the real code paths — probe, codecs, connection
//! runtime, session orchestration — over loopback TCP sockets, in both
//! dialects.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use panelhub::connection::ConnectionConfig;
use panelhub::framing::{encode_message, FrameDecoder};
use panelhub::schema::{flow, HWCEvent, HWCGfx, HWCState, ImageType, InboundMessage, OutboundMessage};
use panelhub::session::{Session, SessionEvent, SessionOptions};
use panelhub::wire::Wire;
use panelhub::DialectPreference;

/// Serve one binary-dialect panel connection: answer the probe, then
/// stream decoded inbound messages to the test and outbound messages
/// from it.
async fn serve_binary_panel(
    listener: TcpListener,
    seen_tx: mpsc::UnboundedSender<InboundMessage>,
    mut feed_rx: mpsc::UnboundedReceiver<OutboundMessage>,
) {
    let (mut socket, _) = listener.accept().await.unwrap();

    // Probe ping
    let mut header = [0u8; 4];
    socket.read_exact(&mut header).await.unwrap();
    let len = u32::from_le_bytes(header) as usize;
    let mut payload = vec![0u8; len];
    socket.read_exact(&mut payload).await.unwrap();
    assert_eq!(
        InboundMessage::decode(&payload).unwrap().flow_message,
        flow::PING
    );
    socket
        .write_all(&encode_message(&OutboundMessage::flow(flow::ACK)))
        .await
        .unwrap();

    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 4096];
    loop {
        tokio::select! {
            msg = feed_rx.recv() => match msg {
                None => return,
                Some(msg) => socket.write_all(&encode_message(&msg)).await.unwrap(),
            },
            read = socket.read(&mut buf) => match read {
                Ok(0) | Err(_) => return,
                Ok(n) => {
                    for payload in decoder.feed(&buf[..n]).unwrap() {
                        let msg = InboundMessage::decode(&payload).unwrap();
                        if seen_tx.send(msg).is_err() {
                            return;
                        }
                    }
                }
            },
        }
    }
}

async fn recv_event(session: &mut Session) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(5), session.next_event())
        .await
        .expect("session event within deadline")
        .expect("session alive")
}

#[tokio::test]
async fn test_binary_session_startup_and_auto_ack() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    let (feed_tx, feed_rx) = mpsc::unbounded_channel();
    let panel = tokio::spawn(serve_binary_panel(listener, seen_tx, feed_rx));

    let mut session = Session::connect(
        addr.to_string(),
        SessionOptions {
            brightness: Some(5),
            ..Default::default()
        },
    );

    match recv_event(&mut session).await {
        SessionEvent::Connected { binary, .. } => assert!(binary),
        other => panic!("expected Connected, got {other:?}"),
    }

    // The startup command set is the first thing on the wire
    let startup = tokio::time::timeout(Duration::from_secs(5), seen_rx.recv())
        .await
        .unwrap()
        .unwrap();
    let cmd = startup.command.expect("startup command set");
    assert!(cmd.activate_panel);
    assert!(cmd.send_panel_info);
    assert!(cmd.send_panel_topology);
    assert!(cmd.report_hwc_availability);
    assert_eq!(cmd.set_heartbeat_timer.unwrap().value, 3000);
    assert_eq!(cmd.panel_brightness.unwrap().leds, 5);

    // A panel ping is acknowledged without application involvement
    feed_tx.send(OutboundMessage::flow(flow::PING)).unwrap();
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), seen_rx.recv())
            .await
            .unwrap()
            .unwrap();
        if msg.flow_message == flow::ACK {
            break;
        }
    }

    // Events flow to the application in order
    feed_tx
        .send(OutboundMessage::event(HWCEvent::binary(9, true, 0)))
        .unwrap();
    feed_tx
        .send(OutboundMessage::event(HWCEvent::binary(9, false, 0)))
        .unwrap();
    let mut pressed = Vec::new();
    while pressed.len() < 2 {
        if let SessionEvent::Message(msg) = recv_event(&mut session).await {
            for event in &msg.events {
                pressed.push(event.binary.as_ref().unwrap().pressed);
            }
        }
    }
    assert_eq!(pressed, vec![true, false]);

    session.shutdown().await;
    panel.await.unwrap();
}

#[tokio::test]
async fn test_session_state_tracks_panel_reports() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (seen_tx, _seen_rx) = mpsc::unbounded_channel();
    let (feed_tx, feed_rx) = mpsc::unbounded_channel();
    let panel = tokio::spawn(serve_binary_panel(listener, seen_tx, feed_rx));

    let mut session = Session::connect(addr.to_string(), SessionOptions::default());
    recv_event(&mut session).await; // Connected

    feed_tx
        .send(OutboundMessage {
            panel_info: Some(panelhub::schema::PanelInfo {
                model: "RCP-10".into(),
                serial: "1234567".into(),
                ..Default::default()
            }),
            hwc_availability: [(1, 1), (2, 1)].into_iter().collect(),
            ..Default::default()
        })
        .unwrap();

    // Wait for the message to round-trip into observable state
    loop {
        recv_event(&mut session).await;
        let state = session.state();
        if state.info.model == "RCP-10" {
            assert_eq!(state.availability.len(), 2);
            break;
        }
    }

    session.shutdown().await;
    panel.await.unwrap();
}

#[tokio::test]
async fn test_ascii_panel_receives_lines_and_multiline_graphics() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    // An ASCII panel: silent through the probe, then captures lines
    let (lines_tx, mut lines_rx) = mpsc::unbounded_channel::<String>();
    let panel = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 4096];
        let mut pending = Vec::new();
        loop {
            match socket.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => {
                    pending.extend_from_slice(&buf[..n]);
                    while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
                        let line: Vec<u8> = pending.drain(..=pos).collect();
                        let text = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
                        if lines_tx.send(text).is_err() {
                            return;
                        }
                    }
                }
            }
        }
    });

    let session = Session::connect(
        addr.to_string(),
        SessionOptions {
            // The panel side stays silent, so the probe falls back to
            // ASCII; the forced preference makes the intent explicit
            connection: ConnectionConfig {
                dialect: DialectPreference::Ascii,
                ..Default::default()
            },
            startup_commands: false,
            ..Default::default()
        },
    );

    // A graphics payload too large for one line
    let gfx = HWCGfx {
        w: 64,
        h: 32,
        image_type: ImageType::Mono,
        image_data: (0..256u32).map(|i| i as u8).collect(),
        ..Default::default()
    };
    session
        .send(InboundMessage::state(HWCState {
            hwc_ids: vec![5],
            gfx: Some(gfx),
            ..Default::default()
        }))
        .await;

    let mut gfx_lines = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while gfx_lines.len() < 3 {
        let line = tokio::time::timeout_at(deadline, lines_rx.recv())
            .await
            .expect("graphics lines within deadline")
            .unwrap();
        if line.starts_with("HWCg#5=") {
            gfx_lines.push(line);
        }
    }
    assert!(gfx_lines[0].starts_with("HWCg#5=0/"), "{}", gfx_lines[0]);
    assert!(gfx_lines[0].contains(",64x32:"));
    assert!(gfx_lines[1].starts_with("HWCg#5=1:"));
    assert!(gfx_lines[2].starts_with("HWCg#5=2:"));

    session.shutdown().await;
    panel.await.unwrap();
}

#[tokio::test]
async fn test_heartbeat_timeout_triggers_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    // Answers the probe then goes silent; accepts a second connection
    let panel = tokio::spawn(async move {
        for round in 0..2 {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut header = [0u8; 4];
            socket.read_exact(&mut header).await.unwrap();
            let len = u32::from_le_bytes(header) as usize;
            let mut payload = vec![0u8; len];
            socket.read_exact(&mut payload).await.unwrap();
            socket
                .write_all(&encode_message(&OutboundMessage::flow(flow::ACK)))
                .await
                .unwrap();
            if round == 1 {
                return; // test ends here
            }
            // Silence: swallow heartbeats until the runtime gives up
            let mut buf = [0u8; 1024];
            while let Ok(n) = socket.read(&mut buf).await {
                if n == 0 {
                    break;
                }
            }
        }
    });

    let mut session = Session::connect(
        addr.to_string(),
        SessionOptions {
            connection: ConnectionConfig {
                heartbeat: Some(Duration::from_millis(100)),
                liveness_multiplier: 2,
                backoff: Duration::from_millis(100),
                ..Default::default()
            },
            ..Default::default()
        },
    );

    let mut saw = Vec::new();
    while saw.len() < 3 {
        match recv_event(&mut session).await {
            SessionEvent::Connected { .. } => saw.push("connect"),
            SessionEvent::Disconnected => saw.push("disconnect"),
            SessionEvent::Message(_) => {}
        };
    }
    assert_eq!(saw, vec!["connect", "disconnect", "connect"]);

    session.shutdown().await;
    panel.await.unwrap();
}

#[tokio::test]
async fn test_shutdown_completes_with_unreachable_panel() {
    let session = Session::connect("127.0.0.1:1".into(), SessionOptions::default());
    tokio::time::sleep(Duration::from_millis(50)).await;
    tokio::time::timeout(Duration::from_millis(500), session.shutdown())
        .await
        .expect("shutdown returns promptly from backoff");
}
