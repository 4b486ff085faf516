//! Session orchestration.
//!
//! A [`Session`] is the long-lived handle an application holds on one
//! panel: it owns the connection runtime, issues the startup command set
//! on every (re)connect, answers peer pings, tracks the panel's
//! observable state, and re-polls connection/runtime statistics
//! periodically. It survives reconnects; it dies only when the
//! application calls [`Session::shutdown`], which waits for every child
//! task before returning.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::connection::{run_link, ConnectionConfig, ConnectionHooks};
use crate::constants::{
    CHANNEL_CAPACITY, HEARTBEAT_PERIOD_MS, SESSION_POLL_INTERVAL, SYSSTAT_PERIOD_SEC,
};
use crate::link::PanelLink;
use crate::schema::{
    flow, Brightness, Command, HeartBeatTimer, InboundMessage, OutboundMessage, PanelInfo,
    PublishSystemStat, RunTimeStats,
};

/// Session tuning.
pub struct SessionOptions {
    /// Connection-level policy (dialect, heartbeat, backoff).
    pub connection: ConnectionConfig,
    /// Brightness (0-8) pushed in the startup command set.
    pub brightness: Option<u32>,
    /// System-stat publishing period requested at startup.
    pub sysstat_period_sec: Option<u32>,
    /// Heartbeat period requested *of the panel*, in milliseconds.
    pub heartbeat_ms: u32,
    /// Emit the startup command set on every connect.
    pub startup_commands: bool,
    /// Answer peer PINGs with ACK.
    pub auto_ack: bool,
    /// Re-poll connections and runtime stats at this interval.
    pub poll_interval: Option<Duration>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            brightness: None,
            sysstat_period_sec: Some(SYSSTAT_PERIOD_SEC),
            heartbeat_ms: HEARTBEAT_PERIOD_MS,
            startup_commands: true,
            auto_ack: true,
            poll_interval: Some(SESSION_POLL_INTERVAL),
        }
    }
}

/// What a session surfaces to its application.
#[derive(Debug)]
pub enum SessionEvent {
    /// A connection reached CONNECTED.
    Connected {
        /// Committed to the binary dialect.
        binary: bool,
        /// Local address of the socket.
        local_addr: Option<SocketAddr>,
    },
    /// The connection died; the session will re-dial unless cancelled.
    Disconnected,
    /// A decoded message from the panel.
    Message(OutboundMessage),
}

/// Last-known panel state, updated from every message that carries any of
/// its pieces. Fields arriving separately (the ASCII dialect splits them)
/// merge into the same snapshot.
#[derive(Debug, Clone, Default)]
pub struct PanelState {
    /// A connection is currently up.
    pub connected: bool,
    /// Dialect of the current/last connection.
    pub binary: Option<bool>,
    /// Identity, merged field-by-field.
    pub info: PanelInfo,
    /// Topology JSON document.
    pub topology_json: String,
    /// Topology base SVG.
    pub topology_svg: String,
    /// Availability code per HWC id.
    pub availability: BTreeMap<u32, u32>,
    /// Uptime counters, merged field-by-field.
    pub stats: RunTimeStats,
    /// Panel reports itself asleep.
    pub sleeping: bool,
    /// Peer addresses the panel reports as connected.
    pub connections: Vec<String>,
}

impl PanelState {
    fn absorb(&mut self, msg: &OutboundMessage) {
        if let Some(info) = &msg.panel_info {
            merge_info(&mut self.info, info);
        }
        if let Some(top) = &msg.panel_topology {
            if !top.json.is_empty() {
                self.topology_json = top.json.clone();
            }
            if !top.svgbase.is_empty() {
                self.topology_svg = top.svgbase.clone();
            }
        }
        if let Some(sleep) = &msg.sleep_state {
            self.sleeping = sleep.is_sleeping;
        }
        // A sleeping panel reports everything unavailable; keep the map
        // from before it dozed off.
        if !msg.hwc_availability.is_empty() && !self.sleeping {
            for (id, code) in &msg.hwc_availability {
                self.availability.insert(*id, *code);
            }
        }
        if let Some(conns) = &msg.connections {
            self.connections = conns.connection.clone();
        }
        if let Some(stats) = &msg.run_time_stats {
            if stats.boots_count != 0 {
                self.stats.boots_count = stats.boots_count;
            }
            if stats.total_uptime != 0 {
                self.stats.total_uptime = stats.total_uptime;
            }
            if stats.session_uptime != 0 {
                self.stats.session_uptime = stats.session_uptime;
            }
            if stats.screen_save_on_time != 0 {
                self.stats.screen_save_on_time = stats.screen_save_on_time;
            }
        }
    }
}

fn merge_info(into: &mut PanelInfo, from: &PanelInfo) {
    if !from.name.is_empty() {
        into.name = from.name.clone();
    }
    if !from.model.is_empty() {
        into.model = from.model.clone();
    }
    if !from.serial.is_empty() {
        into.serial = from.serial.clone();
    }
    if !from.software_version.is_empty() {
        into.software_version = from.software_version.clone();
    }
    if !from.platform.is_empty() {
        into.platform = from.platform.clone();
    }
    if from.blue_pill_ready {
        into.blue_pill_ready = true;
    }
    if from.max_clients != 0 {
        into.max_clients = from.max_clients;
    }
    if !from.locked_to_ips.is_empty() {
        into.locked_to_ips = from.locked_to_ips.clone();
    }
}

enum ConnNote {
    Connected {
        binary: bool,
        local_addr: Option<SocketAddr>,
    },
    Disconnected,
}

/// Handle on one panel session.
pub struct Session {
    to_panel: mpsc::Sender<InboundMessage>,
    events: mpsc::Receiver<SessionEvent>,
    state: Arc<StdMutex<PanelState>>,
    cancel: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Session {
    /// Start a session toward `addr`. Dialing, probing and reconnecting
    /// happen in the background from here on.
    pub fn connect(addr: String, options: SessionOptions) -> Session {
        let (to_panel_tx, to_panel_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (from_panel_tx, from_panel_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (note_tx, note_rx) = mpsc::unbounded_channel();

        let state = Arc::new(StdMutex::new(PanelState::default()));

        let connect_note = note_tx.clone();
        let hooks = ConnectionHooks {
            on_connect: Some(Box::new(move |binary, local_addr| {
                let _ = connect_note.send(ConnNote::Connected { binary, local_addr });
            })),
            on_disconnect: Some(Box::new(move |_was_connected| {
                let _ = note_tx.send(ConnNote::Disconnected);
            })),
        };

        let link_task = tokio::spawn(run_link::<PanelLink>(
            addr,
            to_panel_rx,
            from_panel_tx,
            cancel_rx.clone(),
            options.connection.clone(),
            hooks,
        ));

        let loop_task = tokio::spawn(session_loop(
            options,
            from_panel_rx,
            note_rx,
            event_tx,
            to_panel_tx.clone(),
            Arc::clone(&state),
            cancel_rx,
        ));

        Session {
            to_panel: to_panel_tx,
            events: event_rx,
            state,
            cancel: cancel_tx,
            tasks: vec![link_task, loop_task],
        }
    }

    /// A sender for pushing messages to the panel; cloneable and safe to
    /// hold across reconnects.
    pub fn sender(&self) -> mpsc::Sender<InboundMessage> {
        self.to_panel.clone()
    }

    /// Queue one message for the panel. Returns `false` after shutdown.
    pub async fn send(&self, msg: InboundMessage) -> bool {
        self.to_panel.send(msg).await.is_ok()
    }

    /// Next session event; `None` after shutdown.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    /// Copy of the panel's observable state.
    pub fn state(&self) -> PanelState {
        self.state.lock().expect("panel state").clone()
    }

    /// Cancel the session and wait for every child task to exit.
    pub async fn shutdown(self) {
        let Session {
            to_panel,
            events,
            state: _,
            cancel,
            tasks,
        } = self;
        let _ = cancel.send(true);
        // Closing the application-facing ends unblocks a loop stuck on a
        // full channel so it can observe the cancel signal
        drop(events);
        drop(to_panel);
        for task in tasks {
            let _ = task.await;
        }
        drop(cancel);
    }
}

fn startup_message(options: &SessionOptions) -> InboundMessage {
    InboundMessage::command(Command {
        activate_panel: true,
        send_panel_info: true,
        send_panel_topology: true,
        report_hwc_availability: true,
        get_connections: true,
        get_run_time_stats: true,
        set_heartbeat_timer: Some(HeartBeatTimer {
            value: options.heartbeat_ms,
            ..Default::default()
        }),
        publish_system_stat: options.sysstat_period_sec.map(|period_sec| PublishSystemStat {
            period_sec,
            ..Default::default()
        }),
        panel_brightness: options.brightness.map(Brightness::uniform),
        ..Default::default()
    })
}

async fn session_loop(
    options: SessionOptions,
    mut from_panel: mpsc::Receiver<OutboundMessage>,
    mut notes: mpsc::UnboundedReceiver<ConnNote>,
    events: mpsc::Sender<SessionEvent>,
    to_panel: mpsc::Sender<InboundMessage>,
    state: Arc<StdMutex<PanelState>>,
    mut cancel: watch::Receiver<bool>,
) {
    let poll_period = options.poll_interval.unwrap_or(Duration::from_secs(3600));
    let mut poll = tokio::time::interval(poll_period);
    poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    poll.tick().await; // immediate first tick

    loop {
        tokio::select! {
            _ = cancel.changed() => break,

            note = notes.recv() => match note {
                None => break,
                Some(ConnNote::Connected { binary, local_addr }) => {
                    {
                        let mut s = state.lock().expect("panel state");
                        s.connected = true;
                        s.binary = Some(binary);
                    }
                    if options.startup_commands {
                        if to_panel.send(startup_message(&options)).await.is_err() {
                            break;
                        }
                    }
                    let _ = events.try_send(SessionEvent::Connected { binary, local_addr });
                }
                Some(ConnNote::Disconnected) => {
                    state.lock().expect("panel state").connected = false;
                    let _ = events.try_send(SessionEvent::Disconnected);
                }
            },

            msg = from_panel.recv() => match msg {
                None => break,
                Some(msg) => {
                    if options.auto_ack && msg.flow_message == flow::PING {
                        if to_panel.send(InboundMessage::flow(flow::ACK)).await.is_err() {
                            break;
                        }
                    }
                    state.lock().expect("panel state").absorb(&msg);
                    // Backpressure to the reader when the application is
                    // slow; dropped silently once it stops listening.
                    if events.send(SessionEvent::Message(msg)).await.is_err() {
                        while let Ok(m) = from_panel.try_recv() {
                            state.lock().expect("panel state").absorb(&m);
                        }
                    }
                }
            },

            _ = poll.tick(), if options.poll_interval.is_some() => {
                let refresh = InboundMessage::command(Command {
                    get_connections: true,
                    get_run_time_stats: true,
                    ..Default::default()
                });
                if to_panel.try_send(refresh).is_err() {
                    log::debug!("to-panel queue full, skipping stats poll");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{PanelTopology, SleepState};
    use crate::wire::UnknownFields;

    #[test]
    fn test_state_merges_partial_info() {
        let mut state = PanelState::default();
        state.absorb(&OutboundMessage {
            panel_info: Some(PanelInfo {
                model: "RCP-10".into(),
                ..Default::default()
            }),
            ..Default::default()
        });
        state.absorb(&OutboundMessage {
            panel_info: Some(PanelInfo {
                serial: "1234567".into(),
                ..Default::default()
            }),
            ..Default::default()
        });
        assert_eq!(state.info.model, "RCP-10");
        assert_eq!(state.info.serial, "1234567");
    }

    #[test]
    fn test_state_ignores_availability_while_sleeping() {
        let mut state = PanelState::default();
        state.absorb(&OutboundMessage {
            hwc_availability: [(1, 1)].into_iter().collect(),
            ..Default::default()
        });
        state.absorb(&OutboundMessage {
            sleep_state: Some(SleepState {
                is_sleeping: true,
                unknown: UnknownFields::default(),
            }),
            ..Default::default()
        });
        state.absorb(&OutboundMessage {
            hwc_availability: [(1, 0)].into_iter().collect(),
            ..Default::default()
        });
        assert_eq!(state.availability.get(&1), Some(&1));
    }

    #[test]
    fn test_state_keeps_latest_topology() {
        let mut state = PanelState::default();
        state.absorb(&OutboundMessage {
            panel_topology: Some(PanelTopology {
                json: "{}".into(),
                ..Default::default()
            }),
            ..Default::default()
        });
        state.absorb(&OutboundMessage {
            panel_topology: Some(PanelTopology {
                svgbase: "<svg/>".into(),
                ..Default::default()
            }),
            ..Default::default()
        });
        assert_eq!(state.topology_json, "{}");
        assert_eq!(state.topology_svg, "<svg/>");
    }

    #[test]
    fn test_startup_message_contents() {
        let msg = startup_message(&SessionOptions {
            brightness: Some(5),
            ..Default::default()
        });
        let cmd = msg.command.unwrap();
        assert!(cmd.activate_panel);
        assert!(cmd.send_panel_info);
        assert!(cmd.send_panel_topology);
        assert!(cmd.report_hwc_availability);
        assert_eq!(cmd.set_heartbeat_timer.unwrap().value, 3000);
        assert_eq!(cmd.panel_brightness.unwrap().leds, 5);
        assert_eq!(cmd.publish_system_stat.unwrap().period_sec, 15);
    }

    #[tokio::test]
    async fn test_shutdown_joins_all_tasks() {
        // No listener: the session sits in dial/backoff until cancelled
        let session = Session::connect("127.0.0.1:1".into(), SessionOptions::default());
        tokio::time::sleep(Duration::from_millis(50)).await;
        let started = std::time::Instant::now();
        session.shutdown().await;
        assert!(started.elapsed() < Duration::from_millis(200));
    }
}
