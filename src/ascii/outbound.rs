//! Panel→system lines.
//!
//! Events are `HWC#<id>=<descriptor>` lines; panel identity, topology,
//! availability and statistics travel as `key=value` info lines, one
//! field per line (the ASCII dialect never batches them the way binary
//! frames do).

use crate::schema::{
    flow, Connections, HWCEvent, OutboundMessage, PanelInfo, PanelTopology, RunTimeStats,
    SleepState, SysStat,
};
use crate::wire::UnknownFields;

/// Encode one outbound message as ASCII lines (without terminators).
pub fn encode_outbound(msg: &OutboundMessage) -> Vec<String> {
    let mut lines = Vec::new();

    match msg.flow_message {
        flow::PING => lines.push("ping".into()),
        flow::ACK => lines.push("ack".into()),
        flow::NACK => lines.push("nack".into()),
        flow::HELLO => lines.push("list".into()),
        flow::RDY => lines.push("RDY".into()),
        flow::BSY => lines.push("BSY".into()),
        _ => {}
    }

    if let Some(info) = &msg.panel_info {
        panel_info_lines(info, &mut lines);
    }
    if let Some(top) = &msg.panel_topology {
        if !top.json.is_empty() {
            lines.push(format!("_panelTopology_HWC={}", single_line(&top.json)));
        }
        if !top.svgbase.is_empty() {
            lines.push(format!("_panelTopology_svgbase={}", single_line(&top.svgbase)));
        }
    }
    for (id, code) in &msg.hwc_availability {
        lines.push(format!("map={id}:{code}"));
    }
    for event in &msg.events {
        if let Some(line) = event_line(event) {
            lines.push(line);
        }
    }
    if let Some(conns) = &msg.connections {
        lines.push(format!("Connections={}", conns.connection.join(";")));
    }
    if let Some(stats) = &msg.run_time_stats {
        if stats.boots_count != 0 {
            lines.push(format!("BootsCount={}", stats.boots_count));
        }
        if stats.total_uptime != 0 {
            lines.push(format!("TotalUptime={}", stats.total_uptime));
        }
        if stats.session_uptime != 0 {
            lines.push(format!("SessionUptime={}", stats.session_uptime));
        }
        if stats.screen_save_on_time != 0 {
            lines.push(format!("ScreenSaveOnTime={}", stats.screen_save_on_time));
        }
    }
    if let Some(sleep) = &msg.sleep_state {
        lines.push(if sleep.is_sleeping { "sleeping" } else { "awake" }.into());
    }

    lines
}

fn panel_info_lines(info: &PanelInfo, lines: &mut Vec<String>) {
    if !info.name.is_empty() {
        lines.push(format!("_name={}", single_line(&info.name)));
    }
    if !info.model.is_empty() {
        lines.push(format!("_model={}", single_line(&info.model)));
    }
    if !info.serial.is_empty() {
        lines.push(format!("_serial={}", single_line(&info.serial)));
    }
    if !info.software_version.is_empty() {
        lines.push(format!("_version={}", single_line(&info.software_version)));
    }
    if !info.platform.is_empty() {
        lines.push(format!("_platform={}", single_line(&info.platform)));
    }
    if info.blue_pill_ready {
        lines.push("_bluePillReady=1".into());
    }
    if info.max_clients != 0 {
        lines.push(format!("_maxClients={}", info.max_clients));
    }
    if !info.locked_to_ips.is_empty() {
        lines.push(format!("_lockedToIPs={}", info.locked_to_ips.join(";")));
    }
}

fn event_line(event: &HWCEvent) -> Option<String> {
    let id = event.hwc_id;
    if let Some(b) = &event.binary {
        let word = if b.pressed { "Down" } else { "Up" };
        return Some(if b.edge != 0 {
            format!("HWC#{id}={word}:{}", b.edge)
        } else {
            format!("HWC#{id}={word}")
        });
    }
    if let Some(p) = &event.pulsed {
        return Some(format!("HWC#{id}=Enc:{}", p.value));
    }
    if let Some(a) = &event.absolute {
        return Some(format!("HWC#{id}=Abs:{}", a.value));
    }
    if let Some(s) = &event.speed {
        return Some(format!("HWC#{id}=Speed:{}", s.value));
    }
    if let Some(r) = &event.raw_analog {
        return Some(format!("HWC#{id}=Raw:{}", r.value));
    }
    if let Some(s) = &event.sys_stat {
        return Some(format!(
            "SysStat={}|{:.1}|{}|{}|{}",
            s.cpu_usage, s.cpu_temp, s.cpu_freq_current, s.mem_total, s.mem_free
        ));
    }
    log::debug!("event for HWC#{id} has no kind set, skipping");
    None
}

fn single_line(v: &str) -> String {
    if v.contains('\n') {
        v.replace('\n', " ")
    } else {
        v.to_string()
    }
}

/// Parser for the panel→system direction of one session.
///
/// Stateless today (graphics only travel system→panel), but owned per
/// connection like its inbound counterpart.
#[derive(Debug, Default)]
pub struct OutboundAsciiParser;

impl OutboundAsciiParser {
    /// Create a parser.
    pub fn new() -> Self {
        Self
    }

    /// Parse one line. Unknown lines are logged and skipped.
    pub fn parse_line(&mut self, line: &str) -> Option<OutboundMessage> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        match line {
            "ping" => return Some(OutboundMessage::flow(flow::PING)),
            "ack" => return Some(OutboundMessage::flow(flow::ACK)),
            "nack" => return Some(OutboundMessage::flow(flow::NACK)),
            "list" => return Some(OutboundMessage::flow(flow::HELLO)),
            "RDY" => return Some(OutboundMessage::flow(flow::RDY)),
            "BSY" => return Some(OutboundMessage::flow(flow::BSY)),
            "sleeping" | "awake" => {
                return Some(OutboundMessage {
                    sleep_state: Some(SleepState {
                        is_sleeping: line == "sleeping",
                        unknown: UnknownFields::default(),
                    }),
                    ..Default::default()
                })
            }
            _ => {}
        }

        let (key, value) = line.split_once('=')?;

        if let Some(ids_part) = key.strip_prefix("HWC#") {
            let id: u32 = ids_part.parse().ok()?;
            return parse_event(id, value).map(OutboundMessage::event);
        }

        let mut msg = OutboundMessage::default();
        match key {
            "_name" | "_model" | "_serial" | "_version" | "_platform" | "_bluePillReady"
            | "_maxClients" | "_lockedToIPs" => {
                let mut info = PanelInfo::default();
                match key {
                    "_name" => info.name = value.to_string(),
                    "_model" => info.model = value.to_string(),
                    "_serial" => info.serial = value.to_string(),
                    "_version" => info.software_version = value.to_string(),
                    "_platform" => info.platform = value.to_string(),
                    "_bluePillReady" => info.blue_pill_ready = value == "1",
                    "_maxClients" => info.max_clients = value.parse().ok()?,
                    "_lockedToIPs" => {
                        info.locked_to_ips =
                            value.split(';').filter(|s| !s.is_empty()).map(String::from).collect()
                    }
                    _ => unreachable!(),
                }
                msg.panel_info = Some(info);
            }
            "_panelTopology_HWC" => {
                msg.panel_topology = Some(PanelTopology {
                    json: value.to_string(),
                    ..Default::default()
                });
            }
            "_panelTopology_svgbase" => {
                msg.panel_topology = Some(PanelTopology {
                    svgbase: value.to_string(),
                    ..Default::default()
                });
            }
            "map" => {
                let (id, code) = value.split_once(':')?;
                msg.hwc_availability
                    .insert(id.parse().ok()?, code.parse().ok()?);
            }
            "Connections" => {
                msg.connections = Some(Connections {
                    connection: value
                        .split(';')
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect(),
                    unknown: UnknownFields::default(),
                });
            }
            "BootsCount" | "TotalUptime" | "SessionUptime" | "ScreenSaveOnTime" => {
                let mut stats = RunTimeStats::default();
                let parsed = value.parse().ok()?;
                match key {
                    "BootsCount" => stats.boots_count = parsed,
                    "TotalUptime" => stats.total_uptime = parsed,
                    "SessionUptime" => stats.session_uptime = parsed,
                    "ScreenSaveOnTime" => stats.screen_save_on_time = parsed,
                    _ => unreachable!(),
                }
                msg.run_time_stats = Some(stats);
            }
            "SysStat" => {
                let fields: Vec<&str> = value.split('|').collect();
                let num = |i: usize| fields.get(i).and_then(|v| v.parse::<u32>().ok()).unwrap_or(0);
                let stat = SysStat {
                    cpu_usage: num(0),
                    cpu_temp: fields.get(1).and_then(|v| v.parse().ok()).unwrap_or(0.0),
                    cpu_freq_current: num(2),
                    mem_total: num(3),
                    mem_free: num(4),
                    unknown: UnknownFields::default(),
                };
                msg.events.push(HWCEvent {
                    sys_stat: Some(stat),
                    ..Default::default()
                });
            }
            _ => {
                log::debug!("unrecognized outbound line dropped: {line}");
                return None;
            }
        }
        Some(msg)
    }
}

fn parse_event(id: u32, value: &str) -> Option<HWCEvent> {
    let (word, arg) = match value.split_once(':') {
        Some((w, a)) => (w, Some(a)),
        None => (value, None),
    };
    match word {
        "Down" | "Up" => {
            let edge = arg.map_or(Some(0), |a| a.parse().ok())?;
            Some(HWCEvent::binary(id, word == "Down", edge))
        }
        "Enc" => Some(HWCEvent::pulsed(id, arg?.parse().ok()?)),
        "Abs" => Some(HWCEvent::absolute(id, arg?.parse().ok()?)),
        "Speed" => Some(HWCEvent::speed(id, arg?.parse().ok()?)),
        "Raw" => Some(HWCEvent::raw_analog(id, arg?.parse().ok()?)),
        _ => {
            log::debug!("unrecognized event descriptor for HWC#{id}: {value}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip_one(msg: &OutboundMessage) -> Vec<OutboundMessage> {
        let mut parser = OutboundAsciiParser::new();
        encode_outbound(msg)
            .iter()
            .filter_map(|l| parser.parse_line(l))
            .collect()
    }

    #[test]
    fn test_flow_lines() {
        for (value, line) in [
            (flow::PING, "ping"),
            (flow::ACK, "ack"),
            (flow::HELLO, "list"),
            (flow::RDY, "RDY"),
            (flow::BSY, "BSY"),
        ] {
            let msg = OutboundMessage::flow(value);
            assert_eq!(encode_outbound(&msg), vec![line]);
            assert_eq!(round_trip_one(&msg), vec![msg]);
        }
    }

    #[test]
    fn test_event_lines() {
        let cases = [
            (HWCEvent::binary(9, true, 0), "HWC#9=Down"),
            (HWCEvent::binary(9, false, 0), "HWC#9=Up"),
            (HWCEvent::binary(9, true, 5), "HWC#9=Down:5"),
            (HWCEvent::pulsed(10, -2), "HWC#10=Enc:-2"),
            (HWCEvent::absolute(11, 730), "HWC#11=Abs:730"),
            (HWCEvent::speed(12, -90), "HWC#12=Speed:-90"),
            (HWCEvent::raw_analog(13, 512), "HWC#13=Raw:512"),
        ];
        for (event, line) in cases {
            let msg = OutboundMessage::event(event);
            assert_eq!(encode_outbound(&msg), vec![line]);
            assert_eq!(round_trip_one(&msg), vec![msg]);
        }
    }

    #[test]
    fn test_panel_info_one_field_per_line() {
        let msg = OutboundMessage {
            panel_info: Some(PanelInfo {
                model: "RCP-10".into(),
                serial: "1234567".into(),
                max_clients: 4,
                ..Default::default()
            }),
            ..Default::default()
        };
        let lines = encode_outbound(&msg);
        assert_eq!(lines, vec!["_model=RCP-10", "_serial=1234567", "_maxClients=4"]);

        // Each line parses to a sparse PanelInfo carrying just that field
        let parts = round_trip_one(&msg);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].panel_info.as_ref().unwrap().model, "RCP-10");
        assert_eq!(parts[2].panel_info.as_ref().unwrap().max_clients, 4);
    }

    #[test]
    fn test_availability_map_lines() {
        let msg = OutboundMessage {
            hwc_availability: [(1, 1), (38, 4)].into_iter().collect(),
            ..Default::default()
        };
        assert_eq!(encode_outbound(&msg), vec!["map=1:1", "map=38:4"]);
        let parts = round_trip_one(&msg);
        assert_eq!(parts[0].hwc_availability.get(&1), Some(&1));
        assert_eq!(parts[1].hwc_availability.get(&38), Some(&4));
    }

    #[test]
    fn test_topology_lines_round_trip() {
        let msg = OutboundMessage {
            panel_topology: Some(PanelTopology {
                json: r#"{"HWc":[{"id":1}]}"#.into(),
                svgbase: "<svg/>".into(),
                unknown: UnknownFields::default(),
            }),
            ..Default::default()
        };
        let parts = round_trip_one(&msg);
        assert_eq!(parts.len(), 2);
        assert_eq!(
            parts[0].panel_topology.as_ref().unwrap().json,
            r#"{"HWc":[{"id":1}]}"#
        );
        assert_eq!(parts[1].panel_topology.as_ref().unwrap().svgbase, "<svg/>");
    }

    #[test]
    fn test_sysstat_line_round_trip() {
        let msg = OutboundMessage::event(HWCEvent {
            sys_stat: Some(SysStat {
                cpu_usage: 42,
                cpu_temp: 51.5,
                cpu_freq_current: 1200,
                mem_total: 512,
                mem_free: 128,
                unknown: UnknownFields::default(),
            }),
            ..Default::default()
        });
        assert_eq!(encode_outbound(&msg), vec!["SysStat=42|51.5|1200|512|128"]);
        assert_eq!(round_trip_one(&msg), vec![msg]);
    }

    #[test]
    fn test_sleep_lines() {
        let sleeping = OutboundMessage {
            sleep_state: Some(SleepState {
                is_sleeping: true,
                unknown: UnknownFields::default(),
            }),
            ..Default::default()
        };
        assert_eq!(encode_outbound(&sleeping), vec!["sleeping"]);
        assert_eq!(round_trip_one(&sleeping), vec![sleeping]);
    }

    #[test]
    fn test_runtime_stats_split_per_line() {
        let msg = OutboundMessage {
            run_time_stats: Some(RunTimeStats {
                boots_count: 17,
                total_uptime: 5000,
                session_uptime: 0,
                screen_save_on_time: 0,
                unknown: UnknownFields::default(),
            }),
            ..Default::default()
        };
        assert_eq!(encode_outbound(&msg), vec!["BootsCount=17", "TotalUptime=5000"]);
    }

    #[test]
    fn test_garbage_is_skipped() {
        let mut parser = OutboundAsciiParser::new();
        assert!(parser.parse_line("HWC#x=Down").is_none());
        assert!(parser.parse_line("!!!").is_none());
        assert!(parser.parse_line("HWC#9=Warp:9").is_none());
        assert!(parser.parse_line("HWC#9=Down").is_some());
    }
}
