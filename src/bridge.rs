//! TCP bridge topologies.
//!
//! Both modes put a schema-typed hop between a panel and a system, so a
//! binary panel can serve an ASCII system and vice versa — dialect
//! translation falls out of decoding on one side and re-encoding on the
//! other.
//!
//! - [`run_bridge`]: dial the panel, accept one system connection at a
//!   time on a listen port (a panel in server mode facing a system that
//!   dials in).
//! - [`run_link_mode`]: dial both the panel and the system, synthesizing
//!   the greeting a dialing panel would normally send (`list`, i.e. HELLO)
//!   so the system starts its activation handshake.

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};

use crate::connection::{
    run_accepted_link, run_link, ConnEnd, ConnectionConfig, ConnectionHooks,
};
use crate::constants::CHANNEL_CAPACITY;
use crate::link::{Dialect, DialectPreference, PanelLink, SystemLink};
use crate::schema::{flow, Command, InboundMessage, OutboundMessage};

/// Dialect policy for a bridge's two sides.
#[derive(Debug, Clone, Copy)]
pub struct BridgeDialects {
    /// Policy toward the panel (probed unless forced).
    pub panel: DialectPreference,
    /// Dialect on the system side. Accepted sockets are not probed; the
    /// dial-out link mode probes but honors a forced preference.
    pub system_binary: bool,
}

/// Dial a panel and accept system connections on `listen_port`, one at a
/// time, forwarding messages both ways.
///
/// Runs until cancelled. Messages from the panel queue (bounded) while no
/// system is connected and are delivered to the next one.
///
/// # Errors
///
/// Returns an error when the listen port cannot be bound.
pub async fn run_bridge(
    panel_addr: String,
    listen_port: u16,
    dialects: BridgeDialects,
    mut cancel: watch::Receiver<bool>,
) -> Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", listen_port))
        .await
        .with_context(|| format!("cannot listen on port {listen_port}"))?;
    log::info!("accepting system connections on port {listen_port}");

    let (to_panel_tx, to_panel_rx) = mpsc::channel::<InboundMessage>(CHANNEL_CAPACITY);
    let (from_panel_tx, from_panel_rx) = mpsc::channel::<OutboundMessage>(CHANNEL_CAPACITY);
    let (to_system_tx, mut to_system_rx) = mpsc::channel::<OutboundMessage>(CHANNEL_CAPACITY);
    let (from_system_tx, from_system_rx) = mpsc::channel::<InboundMessage>(CHANNEL_CAPACITY);

    let panel_link = tokio::spawn(run_link::<PanelLink>(
        panel_addr,
        to_panel_rx,
        from_panel_tx,
        cancel.clone(),
        ConnectionConfig {
            dialect: dialects.panel,
            ..Default::default()
        },
        log_hooks("panel"),
    ));

    let pump_to_system = tokio::spawn(pump(from_panel_rx, to_system_tx, cancel.clone()));
    let pump_to_panel = tokio::spawn(pump(from_system_rx, to_panel_tx, cancel.clone()));

    let system_dialect = if dialects.system_binary {
        Dialect::Binary
    } else {
        Dialect::Ascii
    };
    let system_config = ConnectionConfig {
        heartbeat: None, // the panel's pings flow through; no second source
        ..Default::default()
    };
    let system_hooks = log_hooks("system");

    loop {
        let accepted = tokio::select! {
            _ = cancel.changed() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Err(e) => log::warn!("accept failed: {e}"),
            Ok((stream, peer)) => {
                log::info!("system connected from {peer} ({system_dialect} mode)");
                let (returned, end) = run_accepted_link::<SystemLink>(
                    stream,
                    system_dialect,
                    to_system_rx,
                    from_system_tx.clone(),
                    &mut cancel,
                    &system_config,
                    &system_hooks,
                )
                .await;
                to_system_rx = returned;
                if end == ConnEnd::Cancelled {
                    break;
                }
            }
        }
    }

    let _ = panel_link.await;
    let _ = pump_to_system.await;
    let _ = pump_to_panel.await;
    Ok(())
}

/// Dial both a panel and a system, forwarding messages both ways.
///
/// The system side is primed on every connect with the HELLO (`list`)
/// greeting a dialing panel would send; the panel side is asked for its
/// availability map, which a panel in server mode does not volunteer.
///
/// Runs until cancelled.
pub async fn run_link_mode(
    panel_addr: String,
    system_addr: String,
    dialects: BridgeDialects,
    cancel: watch::Receiver<bool>,
) -> Result<()> {
    let (to_panel_tx, to_panel_rx) = mpsc::channel::<InboundMessage>(CHANNEL_CAPACITY);
    let (from_panel_tx, from_panel_rx) = mpsc::channel::<OutboundMessage>(CHANNEL_CAPACITY);
    let (to_system_tx, to_system_rx) = mpsc::channel::<OutboundMessage>(CHANNEL_CAPACITY);
    let (from_system_tx, from_system_rx) = mpsc::channel::<InboundMessage>(CHANNEL_CAPACITY);

    // Prime each side when its connection comes up
    let primer = to_panel_tx.clone();
    let panel_hooks = ConnectionHooks {
        on_connect: Some(Box::new(move |binary, _| {
            log::info!("panel connected ({})", dialect_name(binary));
            let _ = primer.try_send(InboundMessage::command(Command {
                report_hwc_availability: true,
                ..Default::default()
            }));
        })),
        on_disconnect: Some(Box::new(|_| log::info!("panel disconnected"))),
    };

    let greeter = to_system_tx.clone();
    let system_hooks = ConnectionHooks {
        on_connect: Some(Box::new(move |binary, _| {
            log::info!("system connected ({})", dialect_name(binary));
            let _ = greeter.try_send(OutboundMessage::flow(flow::HELLO));
        })),
        on_disconnect: Some(Box::new(|_| log::info!("system disconnected"))),
    };

    let panel_link = tokio::spawn(run_link::<PanelLink>(
        panel_addr,
        to_panel_rx,
        from_panel_tx,
        cancel.clone(),
        ConnectionConfig {
            dialect: dialects.panel,
            ..Default::default()
        },
        panel_hooks,
    ));

    let system_link = tokio::spawn(run_link::<SystemLink>(
        system_addr,
        to_system_rx,
        from_system_tx,
        cancel.clone(),
        ConnectionConfig {
            dialect: if dialects.system_binary {
                DialectPreference::Binary
            } else {
                DialectPreference::Ascii
            },
            heartbeat: None, // the panel's own pings keep both sides live
            ..Default::default()
        },
        system_hooks,
    ));

    let pump_to_system = tokio::spawn(pump(from_panel_rx, to_system_tx, cancel.clone()));
    let pump_to_panel = tokio::spawn(pump(from_system_rx, to_panel_tx, cancel));

    let _ = panel_link.await;
    let _ = system_link.await;
    let _ = pump_to_system.await;
    let _ = pump_to_panel.await;
    Ok(())
}

fn dialect_name(binary: bool) -> &'static str {
    if binary {
        "binary"
    } else {
        "ASCII"
    }
}

fn log_hooks(side: &'static str) -> ConnectionHooks {
    ConnectionHooks {
        on_connect: Some(Box::new(move |binary, _| {
            log::info!("{side} connected ({})", dialect_name(binary));
        })),
        on_disconnect: Some(Box::new(move |_| {
            log::info!("{side} disconnected");
        })),
    }
}

/// Move messages from one side's receive channel to the other side's
/// transmit channel until cancelled or a channel closes.
async fn pump<T: Send + 'static>(
    mut rx: mpsc::Receiver<T>,
    tx: mpsc::Sender<T>,
    mut cancel: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = cancel.changed() => return,
            msg = rx.recv() => match msg {
                None => return,
                Some(msg) => {
                    tokio::select! {
                        _ = cancel.changed() => return,
                        sent = tx.send(msg) => {
                            if sent.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::encode_message;
    use crate::schema::HWCEvent;
    use crate::wire::Wire;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener as TokioListener;

    /// A fake binary panel: answers the probe, emits one event, then
    /// stays quiet and records what it receives.
    async fn fake_binary_panel(listener: TokioListener) {
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
        socket
            .write_all(&encode_message(&OutboundMessage::event(HWCEvent::binary(
                9, true, 0,
            ))))
            .await
            .unwrap();
        // Keep the socket open while the bridge runs
        let mut buf = [0u8; 1024];
        loop {
            match socket.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
        }
    }

    #[tokio::test]
    async fn test_bridge_translates_binary_panel_to_ascii_system() {
        let panel_listener = TokioListener::bind("127.0.0.1:0").await.unwrap();
        let panel_addr = panel_listener.local_addr().unwrap();
        tokio::spawn(fake_binary_panel(panel_listener));

        // Pick a free port for the bridge's system side
        let probe = TokioListener::bind("127.0.0.1:0").await.unwrap();
        let bridge_port = probe.local_addr().unwrap().port();
        drop(probe);

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let bridge = tokio::spawn(run_bridge(
            panel_addr.to_string(),
            bridge_port,
            BridgeDialects {
                panel: DialectPreference::Auto,
                system_binary: false,
            },
            cancel_rx,
        ));
        tokio::time::sleep(Duration::from_millis(200)).await;

        // Connect as an ASCII system and observe the translated event
        let mut system = tokio::net::TcpStream::connect(("127.0.0.1", bridge_port))
            .await
            .unwrap();
        let mut received = String::new();
        let mut buf = [0u8; 1024];
        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        while !received.contains("HWC#9=Down") {
            let n = tokio::time::timeout_at(deadline, system.read(&mut buf))
                .await
                .expect("translated event within deadline")
                .unwrap();
            assert!(n > 0, "bridge closed early");
            received.push_str(&String::from_utf8_lossy(&buf[..n]));
        }

        // And push an ASCII command back toward the binary panel
        system.write_all(b"ActivePanel=1\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        cancel_tx.send(true).unwrap();
        bridge.await.unwrap().unwrap();
    }
}
