//! System→panel lines.
//!
//! Commands are bare keywords or `key=value` settings; state updates are
//! `HWC<kind>#<id>=<args>` lines or a JSON object literal. Graphics
//! arrive through the per-session [`GfxAggregator`], so a parser instance
//! must live as long as its connection.

use crate::schema::{
    Brightness, Command, HeartBeatTimer, HWCColor, HWCExtended, HWCMode, HWCState, HWCText,
    InboundMessage, PublishSystemStat, SleepTimeout, flow,
};
use crate::wire::UnknownFields;

use super::gfx::{gfx_kind, gfx_lines, GfxAggregator};
use super::parse_id;

/// Encode one inbound message as ASCII lines (without terminators).
///
/// Fields the dialect cannot carry (flow values beyond ping/ack/nack,
/// unknown binary fields) are dropped.
pub fn encode_inbound(msg: &InboundMessage, budget: usize) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(cmd) = &msg.command {
        command_lines(cmd, &mut lines);
    }
    for state in &msg.states {
        state_lines(state, budget, &mut lines);
    }
    match msg.flow_message {
        flow::PING => lines.push("ping".into()),
        flow::ACK => lines.push("ack".into()),
        flow::NACK => lines.push("nack".into()),
        _ => {}
    }
    lines
}

fn command_lines(cmd: &Command, lines: &mut Vec<String>) {
    if cmd.activate_panel {
        lines.push("ActivePanel=1".into());
    }
    if cmd.send_panel_info {
        lines.push("list".into());
    }
    if cmd.send_panel_topology {
        lines.push("PanelTopology?".into());
    }
    if cmd.report_hwc_availability {
        lines.push("map?".into());
    }
    if cmd.get_connections {
        lines.push("Connections?".into());
    }
    if cmd.get_run_time_stats {
        lines.push("RunTimeStats?".into());
    }
    if cmd.clear_all {
        lines.push("Clear".into());
    }
    if cmd.clear_displays {
        lines.push("ClearDisplays".into());
    }
    if cmd.clear_leds {
        lines.push("ClearLEDs".into());
    }
    if cmd.wake_up {
        lines.push("WakeUp!".into());
    }
    if cmd.send_burnin_profile {
        lines.push("BurninProfile?".into());
    }
    if let Some(hb) = &cmd.set_heartbeat_timer {
        lines.push(format!("HeartBeatTimer={}", hb.value));
    }
    if let Some(b) = &cmd.panel_brightness {
        if b.leds == b.oleds {
            lines.push(format!("PanelBrightness={}", b.leds));
        } else {
            lines.push(format!("PanelBrightness={},{}", b.leds, b.oleds));
        }
    }
    if let Some(p) = &cmd.publish_system_stat {
        lines.push(format!("PublishSysStat={}", p.period_sec));
    }
    if let Some(s) = &cmd.set_sleep_timeout {
        lines.push(format!("SleepTimer={}", s.value));
    }
}

fn state_lines(state: &HWCState, budget: usize, lines: &mut Vec<String>) {
    if !state.is_applicable() {
        return;
    }
    if state.processors.is_some() {
        // Only the JSON form carries processor requests
        if let Ok(json) = serde_json::to_string(state) {
            lines.push(json);
        }
        return;
    }
    // The line grammar addresses one component at a time; a state
    // targeting several ids becomes one line per id
    for id in &state.hwc_ids {
        if let Some(mode) = &state.mode {
            if mode.timeout_ms != 0 {
                lines.push(format!("HWC#{id}={},{}", mode.packed(), mode.timeout_ms));
            } else {
                lines.push(format!("HWC#{id}={}", mode.packed()));
            }
        }
        if let Some(color) = &state.color {
            lines.push(format!("HWCc#{id}={}", color.ascii_byte()));
        }
        if let Some(x) = &state.extended {
            lines.push(format!("HWCx#{id}={}", x.packed()));
        }
        if let Some(text) = &state.text {
            lines.push(format!("HWCt#{id}={}", text_fields(text)));
        }
        if let Some(gfx) = &state.gfx {
            lines.extend(gfx_lines(*id, gfx, budget));
        }
        if state.publish_raw_adc_values {
            lines.push(format!("HWCrawADCValues#{id}=1"));
        }
    }
}

fn text_fields(t: &HWCText) -> String {
    let clean = |v: &str| v.replace('|', " ");
    let num = |v: u32| if v == 0 { String::new() } else { v.to_string() };
    let inum = |v: i32| if v == 0 { String::new() } else { v.to_string() };
    let flag = |v: bool| if v { "1".to_string() } else { String::new() };

    let fields = [
        t.integer_value.to_string(),
        num(t.formatting),
        num(t.modifier_icon),
        clean(&t.title),
        clean(&t.title2),
        flag(t.solid_header_bar),
        clean(&t.textline1),
        clean(&t.textline2),
        inum(t.integer_value2),
        num(t.pair_mode),
        num(t.scale_type),
        inum(t.range_low),
        inum(t.range_high),
        flag(t.inverted),
        num(t.font),
        num(t.font_size),
    ];
    let last = fields.iter().rposition(|f| !f.is_empty()).unwrap_or(0);
    fields[..=last].join("|")
}

fn parse_text_fields(value: &str) -> HWCText {
    let fields: Vec<&str> = value.split('|').collect();
    let get = |i: usize| fields.get(i).copied().unwrap_or("");
    let num = |i: usize| get(i).parse::<u32>().unwrap_or(0);
    let inum = |i: usize| get(i).parse::<i32>().unwrap_or(0);
    let flag = |i: usize| num(i) != 0;

    HWCText {
        integer_value: inum(0),
        formatting: num(1),
        modifier_icon: num(2),
        title: get(3).to_string(),
        title2: get(4).to_string(),
        solid_header_bar: flag(5),
        textline1: get(6).to_string(),
        textline2: get(7).to_string(),
        integer_value2: inum(8),
        pair_mode: num(9),
        scale_type: num(10),
        range_low: inum(11),
        range_high: inum(12),
        inverted: flag(13),
        font: num(14),
        font_size: num(15),
        unknown: UnknownFields::default(),
    }
}

/// Stateful parser for the system→panel direction of one session.
#[derive(Debug, Default)]
pub struct InboundAsciiParser {
    gfx: GfxAggregator,
}

impl InboundAsciiParser {
    /// Create a parser with empty aggregation state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one line. Returns `None` for blank lines, graphics chunks
    /// that do not yet complete a sequence, and lines this dialect does
    /// not know (logged and skipped, per the decode-failure policy).
    pub fn parse_line(&mut self, line: &str) -> Option<InboundMessage> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        match line {
            "ping" => return Some(InboundMessage::flow(flow::PING)),
            "ack" => return Some(InboundMessage::flow(flow::ACK)),
            "nack" => return Some(InboundMessage::flow(flow::NACK)),
            "list" => {
                return Some(InboundMessage::command(Command {
                    send_panel_info: true,
                    ..Default::default()
                }))
            }
            "PanelTopology?" => {
                return Some(InboundMessage::command(Command {
                    send_panel_topology: true,
                    ..Default::default()
                }))
            }
            "map?" => {
                return Some(InboundMessage::command(Command {
                    report_hwc_availability: true,
                    ..Default::default()
                }))
            }
            "Connections?" => {
                return Some(InboundMessage::command(Command {
                    get_connections: true,
                    ..Default::default()
                }))
            }
            "RunTimeStats?" => {
                return Some(InboundMessage::command(Command {
                    get_run_time_stats: true,
                    ..Default::default()
                }))
            }
            "Clear" => {
                return Some(InboundMessage::command(Command {
                    clear_all: true,
                    ..Default::default()
                }))
            }
            "ClearDisplays" => {
                return Some(InboundMessage::command(Command {
                    clear_displays: true,
                    ..Default::default()
                }))
            }
            "ClearLEDs" => {
                return Some(InboundMessage::command(Command {
                    clear_leds: true,
                    ..Default::default()
                }))
            }
            "WakeUp!" => {
                return Some(InboundMessage::command(Command {
                    wake_up: true,
                    ..Default::default()
                }))
            }
            "BurninProfile?" => {
                return Some(InboundMessage::command(Command {
                    send_burnin_profile: true,
                    ..Default::default()
                }))
            }
            _ => {}
        }

        if line.starts_with('{') {
            return match serde_json::from_str::<HWCState>(line) {
                Ok(state) if state.is_applicable() => Some(InboundMessage::state(state)),
                Ok(_) => {
                    log::debug!("JSON state line without HWCIDs dropped");
                    None
                }
                Err(e) => {
                    log::warn!("invalid JSON state line dropped: {e}");
                    None
                }
            };
        }

        let (key, value) = line.split_once('=')?;

        if let Some((keyword, id_part)) = key.split_once('#') {
            return self.parse_state_line(keyword, id_part, value);
        }

        match key {
            "ActivePanel" => {
                if value.trim() == "1" {
                    Some(InboundMessage::command(Command {
                        activate_panel: true,
                        ..Default::default()
                    }))
                } else {
                    None
                }
            }
            "HeartBeatTimer" => Some(InboundMessage::command(Command {
                set_heartbeat_timer: Some(HeartBeatTimer {
                    value: value.parse().ok()?,
                    unknown: UnknownFields::default(),
                }),
                ..Default::default()
            })),
            "PanelBrightness" => {
                let brightness = match value.split_once(',') {
                    Some((l, o)) => Brightness {
                        leds: l.parse().ok()?,
                        oleds: o.parse().ok()?,
                        unknown: UnknownFields::default(),
                    },
                    None => Brightness::uniform(value.parse().ok()?),
                };
                Some(InboundMessage::command(Command {
                    panel_brightness: Some(brightness),
                    ..Default::default()
                }))
            }
            "PublishSysStat" => Some(InboundMessage::command(Command {
                publish_system_stat: Some(PublishSystemStat {
                    period_sec: value.parse().ok()?,
                    unknown: UnknownFields::default(),
                }),
                ..Default::default()
            })),
            "SleepTimer" => Some(InboundMessage::command(Command {
                set_sleep_timeout: Some(SleepTimeout {
                    value: value.parse().ok()?,
                    unknown: UnknownFields::default(),
                }),
                ..Default::default()
            })),
            _ => {
                log::debug!("unrecognized inbound line dropped: {line}");
                None
            }
        }
    }

    fn parse_state_line(
        &mut self,
        keyword: &str,
        id_part: &str,
        value: &str,
    ) -> Option<InboundMessage> {
        let id = parse_id(id_part)?;
        let mut state = HWCState {
            hwc_ids: vec![id],
            ..Default::default()
        };

        match keyword {
            "HWC" => {
                let (packed, timeout) = match value.split_once(',') {
                    Some((p, t)) => (p.parse().ok()?, t.parse().ok()?),
                    None => (value.parse().ok()?, 0),
                };
                state.mode = Some(HWCMode::from_packed(packed, timeout));
            }
            "HWCc" => {
                state.color = Some(HWCColor::from_ascii_byte(value.parse().ok()?));
            }
            "HWCx" => {
                state.extended = Some(HWCExtended::from_packed(value.parse().ok()?));
            }
            "HWCt" => {
                state.text = Some(parse_text_fields(value));
            }
            "HWCrawADCValues" => {
                if value.trim() == "1" {
                    state.publish_raw_adc_values = true;
                } else {
                    return None;
                }
            }
            _ => {
                let kind = gfx_kind(keyword)?;
                state.gfx = Some(self.gfx.feed(id, kind, value)?);
            }
        }
        Some(InboundMessage::state(state))
    }
}
