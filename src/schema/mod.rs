//! Raw Panel message schema.
//!
//! Two tagged variant trees cover both wire dialects: [`InboundMessage`]
//! travels system→panel, [`OutboundMessage`] panel→system. All fields are
//! sparse; unknown binary fields are preserved for re-encoding and enum
//! values unknown to this implementation pass through as raw integers.
//!
//! The JSON serde shape mirrors the original tools (PascalCase keys,
//! defaults omitted), so JSON state lines, topology payloads and the
//! WebSocket envelope interoperate with them.

pub mod events;
pub mod state;

pub use events::{
    AbsoluteEvent, BinaryEvent, EventKind, HWCEvent, PulsedEvent, RawAnalogEvent, SpeedEvent,
    SysStat,
};
pub use state::{
    fmt, mode, ColorRGB, HWCColor, HWCExtended, HWCGfx, HWCMode, HWCState, HWCText, ImageType,
    ProcGfxConv, ProcUniText, Processors,
};

use std::collections::BTreeMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::wire::{decode_map_entry_u32, map_entry_u32, FieldValue, UnknownFields, Wire, WireWriter};

pub(crate) fn is_false(v: &bool) -> bool {
    !*v
}

pub(crate) fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

pub(crate) fn is_zero_i32(v: &i32) -> bool {
    *v == 0
}

pub(crate) fn is_zero_f32(v: &f32) -> bool {
    *v == 0.0
}

/// Flow message values, shared by both directions. Values unknown to this
/// table still round-trip as their raw integer.
pub mod flow {
    /// No flow message.
    pub const NONE: u32 = 0;
    /// Liveness probe; the peer answers with [`ACK`] or any other message.
    pub const PING: u32 = 1;
    /// Acknowledgement.
    pub const ACK: u32 = 2;
    /// Negative acknowledgement.
    pub const NACK: u32 = 3;
    /// Greeting a panel sends when it wants the system's state ("list").
    pub const HELLO: u32 = 4;
    /// Panel is ready for traffic.
    pub const RDY: u32 = 5;
    /// Panel is busy; throttle non-essential traffic.
    pub const BSY: u32 = 6;
}

/// System→panel message: a command set, state updates, and/or a flow
/// message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    #[serde(rename = "Command", default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Command>,

    #[serde(rename = "States", default, skip_serializing_if = "Vec::is_empty")]
    pub states: Vec<HWCState>,

    /// One of the [`flow`] values.
    #[serde(rename = "FlowMessage", default, skip_serializing_if = "is_zero_u32")]
    pub flow_message: u32,

    #[serde(skip)]
    pub unknown: UnknownFields,
}

impl InboundMessage {
    /// A bare flow message.
    pub fn flow(value: u32) -> Self {
        Self {
            flow_message: value,
            ..Default::default()
        }
    }

    /// A bare command set.
    pub fn command(command: Command) -> Self {
        Self {
            command: Some(command),
            ..Default::default()
        }
    }

    /// A single state update.
    pub fn state(state: HWCState) -> Self {
        Self {
            states: vec![state],
            ..Default::default()
        }
    }
}

impl Wire for InboundMessage {
    fn encode(&self, w: &mut WireWriter) {
        if let Some(c) = &self.command {
            w.msg_field(1, c);
        }
        for s in &self.states {
            w.msg_field(2, s);
        }
        w.u32_field(3, self.flow_message);
        self.unknown.replay(w);
    }

    fn merge_field(&mut self, field: u32, value: FieldValue<'_>) -> Result<()> {
        match field {
            1 => self.command = Some(value.as_msg()?),
            2 => self.states.push(value.as_msg()?),
            3 => self.flow_message = value.as_u32()?,
            _ => self.unknown.push(field, &value),
        }
        Ok(())
    }
}

/// Panel→system message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// One of the [`flow`] values.
    #[serde(rename = "FlowMessage", default, skip_serializing_if = "is_zero_u32")]
    pub flow_message: u32,

    #[serde(rename = "PanelInfo", default, skip_serializing_if = "Option::is_none")]
    pub panel_info: Option<PanelInfo>,

    #[serde(rename = "PanelTopology", default, skip_serializing_if = "Option::is_none")]
    pub panel_topology: Option<PanelTopology>,

    /// Availability code per HWC id (0 = unavailable).
    #[serde(
        rename = "HWCavailability",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub hwc_availability: BTreeMap<u32, u32>,

    #[serde(rename = "Events", default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<HWCEvent>,

    #[serde(rename = "Connections", default, skip_serializing_if = "Option::is_none")]
    pub connections: Option<Connections>,

    #[serde(rename = "RunTimeStats", default, skip_serializing_if = "Option::is_none")]
    pub run_time_stats: Option<RunTimeStats>,

    #[serde(rename = "SleepState", default, skip_serializing_if = "Option::is_none")]
    pub sleep_state: Option<SleepState>,

    #[serde(skip)]
    pub unknown: UnknownFields,
}

impl OutboundMessage {
    /// A bare flow message.
    pub fn flow(value: u32) -> Self {
        Self {
            flow_message: value,
            ..Default::default()
        }
    }

    /// A single event.
    pub fn event(event: HWCEvent) -> Self {
        Self {
            events: vec![event],
            ..Default::default()
        }
    }
}

impl Wire for OutboundMessage {
    fn encode(&self, w: &mut WireWriter) {
        w.u32_field(1, self.flow_message);
        if let Some(p) = &self.panel_info {
            w.msg_field(2, p);
        }
        if let Some(t) = &self.panel_topology {
            w.msg_field(3, t);
        }
        for (k, v) in &self.hwc_availability {
            map_entry_u32(w, 4, *k, *v);
        }
        for e in &self.events {
            w.msg_field(5, e);
        }
        if let Some(c) = &self.connections {
            w.msg_field(6, c);
        }
        if let Some(r) = &self.run_time_stats {
            w.msg_field(7, r);
        }
        if let Some(s) = &self.sleep_state {
            w.msg_field(8, s);
        }
        self.unknown.replay(w);
    }

    fn merge_field(&mut self, field: u32, value: FieldValue<'_>) -> Result<()> {
        match field {
            1 => self.flow_message = value.as_u32()?,
            2 => self.panel_info = Some(value.as_msg()?),
            3 => self.panel_topology = Some(value.as_msg()?),
            4 => {
                let (k, v) = decode_map_entry_u32(&value)?;
                self.hwc_availability.insert(k, v);
            }
            5 => self.events.push(value.as_msg()?),
            6 => self.connections = Some(value.as_msg()?),
            7 => self.run_time_stats = Some(value.as_msg()?),
            8 => self.sleep_state = Some(value.as_msg()?),
            _ => self.unknown.push(field, &value),
        }
        Ok(())
    }
}

/// Command options a system can send a panel. All booleans are one-shot
/// requests; sub-messages carry parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Command {
    #[serde(rename = "ActivatePanel", default, skip_serializing_if = "is_false")]
    pub activate_panel: bool,

    #[serde(rename = "SendPanelInfo", default, skip_serializing_if = "is_false")]
    pub send_panel_info: bool,

    #[serde(rename = "SendPanelTopology", default, skip_serializing_if = "is_false")]
    pub send_panel_topology: bool,

    #[serde(
        rename = "ReportHWCavailability",
        default,
        skip_serializing_if = "is_false"
    )]
    pub report_hwc_availability: bool,

    #[serde(rename = "GetConnections", default, skip_serializing_if = "is_false")]
    pub get_connections: bool,

    #[serde(rename = "GetRunTimeStats", default, skip_serializing_if = "is_false")]
    pub get_run_time_stats: bool,

    #[serde(rename = "ClearAll", default, skip_serializing_if = "is_false")]
    pub clear_all: bool,

    #[serde(rename = "ClearDisplays", default, skip_serializing_if = "is_false")]
    pub clear_displays: bool,

    #[serde(rename = "ClearLEDs", default, skip_serializing_if = "is_false")]
    pub clear_leds: bool,

    #[serde(rename = "WakeUp", default, skip_serializing_if = "is_false")]
    pub wake_up: bool,

    #[serde(rename = "SendBurninProfile", default, skip_serializing_if = "is_false")]
    pub send_burnin_profile: bool,

    #[serde(
        rename = "SetHeartBeatTimer",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub set_heartbeat_timer: Option<HeartBeatTimer>,

    #[serde(
        rename = "PanelBrightness",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub panel_brightness: Option<Brightness>,

    #[serde(
        rename = "PublishSystemStat",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub publish_system_stat: Option<PublishSystemStat>,

    #[serde(
        rename = "SetSleepTimeout",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub set_sleep_timeout: Option<SleepTimeout>,

    #[serde(skip)]
    pub unknown: UnknownFields,
}

impl Wire for Command {
    fn encode(&self, w: &mut WireWriter) {
        w.bool_field(1, self.activate_panel);
        w.bool_field(2, self.send_panel_info);
        w.bool_field(3, self.send_panel_topology);
        w.bool_field(4, self.report_hwc_availability);
        w.bool_field(5, self.get_connections);
        w.bool_field(6, self.get_run_time_stats);
        w.bool_field(7, self.clear_all);
        w.bool_field(8, self.clear_displays);
        w.bool_field(9, self.clear_leds);
        w.bool_field(10, self.wake_up);
        w.bool_field(11, self.send_burnin_profile);
        if let Some(h) = &self.set_heartbeat_timer {
            w.msg_field(12, h);
        }
        if let Some(b) = &self.panel_brightness {
            w.msg_field(13, b);
        }
        if let Some(p) = &self.publish_system_stat {
            w.msg_field(14, p);
        }
        if let Some(s) = &self.set_sleep_timeout {
            w.msg_field(15, s);
        }
        self.unknown.replay(w);
    }

    fn merge_field(&mut self, field: u32, value: FieldValue<'_>) -> Result<()> {
        match field {
            1 => self.activate_panel = value.as_bool()?,
            2 => self.send_panel_info = value.as_bool()?,
            3 => self.send_panel_topology = value.as_bool()?,
            4 => self.report_hwc_availability = value.as_bool()?,
            5 => self.get_connections = value.as_bool()?,
            6 => self.get_run_time_stats = value.as_bool()?,
            7 => self.clear_all = value.as_bool()?,
            8 => self.clear_displays = value.as_bool()?,
            9 => self.clear_leds = value.as_bool()?,
            10 => self.wake_up = value.as_bool()?,
            11 => self.send_burnin_profile = value.as_bool()?,
            12 => self.set_heartbeat_timer = Some(value.as_msg()?),
            13 => self.panel_brightness = Some(value.as_msg()?),
            14 => self.publish_system_stat = Some(value.as_msg()?),
            15 => self.set_sleep_timeout = Some(value.as_msg()?),
            _ => self.unknown.push(field, &value),
        }
        Ok(())
    }
}

/// Heartbeat period the panel should ping at, in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeartBeatTimer {
    #[serde(rename = "Value", default, skip_serializing_if = "is_zero_u32")]
    pub value: u32,
    #[serde(skip)]
    pub unknown: UnknownFields,
}

impl Wire for HeartBeatTimer {
    fn encode(&self, w: &mut WireWriter) {
        w.u32_field(1, self.value);
        self.unknown.replay(w);
    }

    fn merge_field(&mut self, field: u32, value: FieldValue<'_>) -> Result<()> {
        match field {
            1 => self.value = value.as_u32()?,
            _ => self.unknown.push(field, &value),
        }
        Ok(())
    }
}

/// LED and OLED brightness, each 0-8.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Brightness {
    #[serde(rename = "LEDs", default, skip_serializing_if = "is_zero_u32")]
    pub leds: u32,
    #[serde(rename = "OLEDs", default, skip_serializing_if = "is_zero_u32")]
    pub oleds: u32,
    #[serde(skip)]
    pub unknown: UnknownFields,
}

impl Brightness {
    /// Same brightness for LEDs and OLEDs.
    pub fn uniform(value: u32) -> Self {
        Self {
            leds: value,
            oleds: value,
            unknown: UnknownFields::default(),
        }
    }
}

impl Wire for Brightness {
    fn encode(&self, w: &mut WireWriter) {
        w.u32_field(1, self.leds);
        w.u32_field(2, self.oleds);
        self.unknown.replay(w);
    }

    fn merge_field(&mut self, field: u32, value: FieldValue<'_>) -> Result<()> {
        match field {
            1 => self.leds = value.as_u32()?,
            2 => self.oleds = value.as_u32()?,
            _ => self.unknown.push(field, &value),
        }
        Ok(())
    }
}

/// Ask the panel to publish system statistics every `period_sec` seconds
/// (0 stops publishing).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PublishSystemStat {
    #[serde(rename = "PeriodSec", default, skip_serializing_if = "is_zero_u32")]
    pub period_sec: u32,
    #[serde(skip)]
    pub unknown: UnknownFields,
}

impl Wire for PublishSystemStat {
    fn encode(&self, w: &mut WireWriter) {
        w.u32_field(1, self.period_sec);
        self.unknown.replay(w);
    }

    fn merge_field(&mut self, field: u32, value: FieldValue<'_>) -> Result<()> {
        match field {
            1 => self.period_sec = value.as_u32()?,
            _ => self.unknown.push(field, &value),
        }
        Ok(())
    }
}

/// Screensaver/sleep timeout in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SleepTimeout {
    #[serde(rename = "Value", default, skip_serializing_if = "is_zero_u32")]
    pub value: u32,
    #[serde(skip)]
    pub unknown: UnknownFields,
}

impl Wire for SleepTimeout {
    fn encode(&self, w: &mut WireWriter) {
        w.u32_field(1, self.value);
        self.unknown.replay(w);
    }

    fn merge_field(&mut self, field: u32, value: FieldValue<'_>) -> Result<()> {
        match field {
            1 => self.value = value.as_u32()?,
            _ => self.unknown.push(field, &value),
        }
        Ok(())
    }
}

/// Static panel identity, sent in response to `SendPanelInfo`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PanelInfo {
    #[serde(rename = "Name", default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(rename = "Model", default, skip_serializing_if = "String::is_empty")]
    pub model: String,
    #[serde(rename = "Serial", default, skip_serializing_if = "String::is_empty")]
    pub serial: String,
    #[serde(
        rename = "SoftwareVersion",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub software_version: String,
    #[serde(rename = "Platform", default, skip_serializing_if = "String::is_empty")]
    pub platform: String,
    #[serde(rename = "BluePillReady", default, skip_serializing_if = "is_false")]
    pub blue_pill_ready: bool,
    #[serde(rename = "MaxClients", default, skip_serializing_if = "is_zero_u32")]
    pub max_clients: u32,
    #[serde(rename = "LockedToIPs", default, skip_serializing_if = "Vec::is_empty")]
    pub locked_to_ips: Vec<String>,
    #[serde(skip)]
    pub unknown: UnknownFields,
}

impl Wire for PanelInfo {
    fn encode(&self, w: &mut WireWriter) {
        w.str_field(1, &self.name);
        w.str_field(2, &self.model);
        w.str_field(3, &self.serial);
        w.str_field(4, &self.software_version);
        w.str_field(5, &self.platform);
        w.bool_field(6, self.blue_pill_ready);
        w.u32_field(7, self.max_clients);
        for ip in &self.locked_to_ips {
            w.str_field(8, ip);
        }
        self.unknown.replay(w);
    }

    fn merge_field(&mut self, field: u32, value: FieldValue<'_>) -> Result<()> {
        match field {
            1 => self.name = value.as_str()?.to_string(),
            2 => self.model = value.as_str()?.to_string(),
            3 => self.serial = value.as_str()?.to_string(),
            4 => self.software_version = value.as_str()?.to_string(),
            5 => self.platform = value.as_str()?.to_string(),
            6 => self.blue_pill_ready = value.as_bool()?,
            7 => self.max_clients = value.as_u32()?,
            8 => self.locked_to_ips.push(value.as_str()?.to_string()),
            _ => self.unknown.push(field, &value),
        }
        Ok(())
    }
}

/// Panel self-description: HWC layout JSON plus base SVG artwork.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PanelTopology {
    #[serde(rename = "Json", default, skip_serializing_if = "String::is_empty")]
    pub json: String,
    #[serde(rename = "Svgbase", default, skip_serializing_if = "String::is_empty")]
    pub svgbase: String,
    #[serde(skip)]
    pub unknown: UnknownFields,
}

impl Wire for PanelTopology {
    fn encode(&self, w: &mut WireWriter) {
        w.str_field(1, &self.json);
        w.str_field(2, &self.svgbase);
        self.unknown.replay(w);
    }

    fn merge_field(&mut self, field: u32, value: FieldValue<'_>) -> Result<()> {
        match field {
            1 => self.json = value.as_str()?.to_string(),
            2 => self.svgbase = value.as_str()?.to_string(),
            _ => self.unknown.push(field, &value),
        }
        Ok(())
    }
}

/// Currently connected peer addresses, as the panel reports them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Connections {
    #[serde(rename = "Connection", default, skip_serializing_if = "Vec::is_empty")]
    pub connection: Vec<String>,
    #[serde(skip)]
    pub unknown: UnknownFields,
}

impl Wire for Connections {
    fn encode(&self, w: &mut WireWriter) {
        for c in &self.connection {
            w.str_field(1, c);
        }
        self.unknown.replay(w);
    }

    fn merge_field(&mut self, field: u32, value: FieldValue<'_>) -> Result<()> {
        match field {
            1 => self.connection.push(value.as_str()?.to_string()),
            _ => self.unknown.push(field, &value),
        }
        Ok(())
    }
}

/// Uptime counters, in minutes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunTimeStats {
    #[serde(rename = "BootsCount", default, skip_serializing_if = "is_zero_u32")]
    pub boots_count: u32,
    #[serde(rename = "TotalUptime", default, skip_serializing_if = "is_zero_u32")]
    pub total_uptime: u32,
    #[serde(rename = "SessionUptime", default, skip_serializing_if = "is_zero_u32")]
    pub session_uptime: u32,
    #[serde(
        rename = "ScreenSaveOnTime",
        default,
        skip_serializing_if = "is_zero_u32"
    )]
    pub screen_save_on_time: u32,
    #[serde(skip)]
    pub unknown: UnknownFields,
}

impl Wire for RunTimeStats {
    fn encode(&self, w: &mut WireWriter) {
        w.u32_field(1, self.boots_count);
        w.u32_field(2, self.total_uptime);
        w.u32_field(3, self.session_uptime);
        w.u32_field(4, self.screen_save_on_time);
        self.unknown.replay(w);
    }

    fn merge_field(&mut self, field: u32, value: FieldValue<'_>) -> Result<()> {
        match field {
            1 => self.boots_count = value.as_u32()?,
            2 => self.total_uptime = value.as_u32()?,
            3 => self.session_uptime = value.as_u32()?,
            4 => self.screen_save_on_time = value.as_u32()?,
            _ => self.unknown.push(field, &value),
        }
        Ok(())
    }
}

/// Screensaver state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SleepState {
    #[serde(rename = "IsSleeping", default, skip_serializing_if = "is_false")]
    pub is_sleeping: bool,
    #[serde(skip)]
    pub unknown: UnknownFields,
}

impl Wire for SleepState {
    fn encode(&self, w: &mut WireWriter) {
        w.bool_field(1, self.is_sleeping);
        self.unknown.replay(w);
    }

    fn merge_field(&mut self, field: u32, value: FieldValue<'_>) -> Result<()> {
        match field {
            1 => self.is_sleeping = value.as_bool()?,
            _ => self.unknown.push(field, &value),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_outbound() -> OutboundMessage {
        OutboundMessage {
            flow_message: flow::PING,
            panel_info: Some(PanelInfo {
                name: "Studio A".into(),
                model: "RCP-10".into(),
                serial: "1234567".into(),
                software_version: "2.7.1".into(),
                platform: "bluepill".into(),
                blue_pill_ready: true,
                max_clients: 4,
                locked_to_ips: vec!["10.0.0.2".into(), "10.0.0.3".into()],
                unknown: UnknownFields::default(),
            }),
            panel_topology: Some(PanelTopology {
                json: r#"{"HWc":[]}"#.into(),
                svgbase: "<svg/>".into(),
                unknown: UnknownFields::default(),
            }),
            hwc_availability: [(1, 1), (2, 0), (38, 4)].into_iter().collect(),
            events: vec![HWCEvent::binary(9, true, 0), HWCEvent::absolute(17, 512)],
            connections: Some(Connections {
                connection: vec!["10.0.0.2:51234".into()],
                unknown: UnknownFields::default(),
            }),
            run_time_stats: Some(RunTimeStats {
                boots_count: 17,
                total_uptime: 5000,
                session_uptime: 120,
                screen_save_on_time: 300,
                unknown: UnknownFields::default(),
            }),
            sleep_state: Some(SleepState {
                is_sleeping: false,
                unknown: UnknownFields::default(),
            }),
            unknown: UnknownFields::default(),
        }
    }

    #[test]
    fn test_inbound_wire_round_trip() {
        let msg = InboundMessage {
            command: Some(Command {
                activate_panel: true,
                send_panel_info: true,
                send_panel_topology: true,
                report_hwc_availability: true,
                set_heartbeat_timer: Some(HeartBeatTimer {
                    value: 3000,
                    unknown: UnknownFields::default(),
                }),
                panel_brightness: Some(Brightness::uniform(5)),
                publish_system_stat: Some(PublishSystemStat {
                    period_sec: 15,
                    unknown: UnknownFields::default(),
                }),
                ..Default::default()
            }),
            states: vec![HWCState {
                hwc_ids: vec![1, 2, 3],
                mode: Some(HWCMode {
                    state: mode::ON,
                    ..Default::default()
                }),
                ..Default::default()
            }],
            flow_message: 0,
            unknown: UnknownFields::default(),
        };
        let back = InboundMessage::decode(&msg.encode_to_vec()).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_outbound_wire_round_trip() {
        let msg = full_outbound();
        let back = OutboundMessage::decode(&msg.encode_to_vec()).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_outbound_json_round_trip() {
        let msg = full_outbound();
        let json = serde_json::to_string(&msg).unwrap();
        let back: OutboundMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_empty_messages_encode_empty() {
        assert!(InboundMessage::default().encode_to_vec().is_empty());
        assert!(OutboundMessage::default().encode_to_vec().is_empty());
    }

    #[test]
    fn test_ping_is_tiny() {
        let ping = InboundMessage::flow(flow::PING);
        let bytes = ping.encode_to_vec();
        assert_eq!(bytes, vec![0x18, 0x01]); // tag(3, varint), 1
        assert_eq!(InboundMessage::decode(&bytes).unwrap(), ping);
    }

    #[test]
    fn test_unknown_flow_value_passes_through() {
        let msg = OutboundMessage::flow(42);
        let back = OutboundMessage::decode(&msg.encode_to_vec()).unwrap();
        assert_eq!(back.flow_message, 42);
    }

    #[test]
    fn test_unknown_top_level_field_preserved() {
        let mut w = WireWriter::new();
        w.u32_field(1, flow::ACK);
        w.str_field(57, "from a newer firmware");
        let decoded = OutboundMessage::decode(&w.into_bytes()).unwrap();
        assert_eq!(decoded.flow_message, flow::ACK);
        assert!(!decoded.unknown.is_empty());

        let reencoded = decoded.encode_to_vec();
        let again = OutboundMessage::decode(&reencoded).unwrap();
        assert_eq!(again, decoded);
    }

    #[test]
    fn test_availability_map_round_trip_with_zero_entries() {
        let msg = OutboundMessage {
            hwc_availability: [(0, 0), (5, 2)].into_iter().collect(),
            ..Default::default()
        };
        let back = OutboundMessage::decode(&msg.encode_to_vec()).unwrap();
        assert_eq!(back.hwc_availability, msg.hwc_availability);
    }
}
