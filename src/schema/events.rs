//! Panel-originated events.
//!
//! Each [`HWCEvent`] is tagged with exactly one event kind. Decoders do
//! not enforce the invariant (a misbehaving peer must not kill the
//! connection); [`HWCEvent::kind`] resolves the tag and callers treat a
//! kindless event as a decode failure for that single message.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::wire::{FieldValue, UnknownFields, Wire, WireWriter};

use super::{is_false, is_zero_i32, is_zero_u32};

/// One event from a hardware component (or the panel itself, for system
/// statistics).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HWCEvent {
    /// Originating component id. Zero for panel-level events.
    #[serde(rename = "HWCID", default, skip_serializing_if = "is_zero_u32")]
    pub hwc_id: u32,

    /// Button press/release.
    #[serde(rename = "Binary", default, skip_serializing_if = "Option::is_none")]
    pub binary: Option<BinaryEvent>,

    /// Encoder rotation in signed increments.
    #[serde(rename = "Pulsed", default, skip_serializing_if = "Option::is_none")]
    pub pulsed: Option<PulsedEvent>,

    /// Absolute position (fader, T-bar).
    #[serde(rename = "Absolute", default, skip_serializing_if = "Option::is_none")]
    pub absolute: Option<AbsoluteEvent>,

    /// Velocity (jog wheel).
    #[serde(rename = "Speed", default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<SpeedEvent>,

    /// Unscaled ADC reading.
    #[serde(rename = "RawAnalog", default, skip_serializing_if = "Option::is_none")]
    pub raw_analog: Option<RawAnalogEvent>,

    /// Periodic system statistics.
    #[serde(rename = "SysStat", default, skip_serializing_if = "Option::is_none")]
    pub sys_stat: Option<SysStat>,

    #[serde(skip)]
    pub unknown: UnknownFields,
}

/// Which of the event fields is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Binary,
    Pulsed,
    Absolute,
    Speed,
    RawAnalog,
    SysStat,
}

impl HWCEvent {
    /// A press/release event.
    pub fn binary(hwc_id: u32, pressed: bool, edge: u32) -> Self {
        Self {
            hwc_id,
            binary: Some(BinaryEvent {
                pressed,
                edge,
                unknown: UnknownFields::default(),
            }),
            ..Default::default()
        }
    }

    /// An encoder pulse event.
    pub fn pulsed(hwc_id: u32, value: i32) -> Self {
        Self {
            hwc_id,
            pulsed: Some(PulsedEvent {
                value,
                unknown: UnknownFields::default(),
            }),
            ..Default::default()
        }
    }

    /// An absolute position event.
    pub fn absolute(hwc_id: u32, value: u32) -> Self {
        Self {
            hwc_id,
            absolute: Some(AbsoluteEvent {
                value,
                unknown: UnknownFields::default(),
            }),
            ..Default::default()
        }
    }

    /// A velocity event.
    pub fn speed(hwc_id: u32, value: i32) -> Self {
        Self {
            hwc_id,
            speed: Some(SpeedEvent {
                value,
                unknown: UnknownFields::default(),
            }),
            ..Default::default()
        }
    }

    /// A raw ADC reading event.
    pub fn raw_analog(hwc_id: u32, value: u32) -> Self {
        Self {
            hwc_id,
            raw_analog: Some(RawAnalogEvent {
                value,
                unknown: UnknownFields::default(),
            }),
            ..Default::default()
        }
    }

    /// The event kind, when exactly one kind field is set.
    pub fn kind(&self) -> Option<EventKind> {
        let mut kind = None;
        let mut count = 0;
        if self.binary.is_some() {
            kind = Some(EventKind::Binary);
            count += 1;
        }
        if self.pulsed.is_some() {
            kind = Some(EventKind::Pulsed);
            count += 1;
        }
        if self.absolute.is_some() {
            kind = Some(EventKind::Absolute);
            count += 1;
        }
        if self.speed.is_some() {
            kind = Some(EventKind::Speed);
            count += 1;
        }
        if self.raw_analog.is_some() {
            kind = Some(EventKind::RawAnalog);
            count += 1;
        }
        if self.sys_stat.is_some() {
            kind = Some(EventKind::SysStat);
            count += 1;
        }
        if count == 1 {
            kind
        } else {
            None
        }
    }
}

impl Wire for HWCEvent {
    fn encode(&self, w: &mut WireWriter) {
        w.u32_field(1, self.hwc_id);
        if let Some(b) = &self.binary {
            w.msg_field(2, b);
        }
        if let Some(p) = &self.pulsed {
            w.msg_field(3, p);
        }
        if let Some(a) = &self.absolute {
            w.msg_field(4, a);
        }
        if let Some(s) = &self.speed {
            w.msg_field(5, s);
        }
        if let Some(r) = &self.raw_analog {
            w.msg_field(6, r);
        }
        if let Some(s) = &self.sys_stat {
            w.msg_field(7, s);
        }
        self.unknown.replay(w);
    }

    fn merge_field(&mut self, field: u32, value: FieldValue<'_>) -> Result<()> {
        match field {
            1 => self.hwc_id = value.as_u32()?,
            2 => self.binary = Some(value.as_msg()?),
            3 => self.pulsed = Some(value.as_msg()?),
            4 => self.absolute = Some(value.as_msg()?),
            5 => self.speed = Some(value.as_msg()?),
            6 => self.raw_analog = Some(value.as_msg()?),
            7 => self.sys_stat = Some(value.as_msg()?),
            _ => self.unknown.push(field, &value),
        }
        Ok(())
    }
}

/// Button press or release, with an optional edge bitmask for four-way
/// buttons.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BinaryEvent {
    #[serde(rename = "Pressed", default, skip_serializing_if = "is_false")]
    pub pressed: bool,
    #[serde(rename = "Edge", default, skip_serializing_if = "is_zero_u32")]
    pub edge: u32,
    #[serde(skip)]
    pub unknown: UnknownFields,
}

impl Wire for BinaryEvent {
    fn encode(&self, w: &mut WireWriter) {
        w.bool_field(1, self.pressed);
        w.u32_field(2, self.edge);
        self.unknown.replay(w);
    }

    fn merge_field(&mut self, field: u32, value: FieldValue<'_>) -> Result<()> {
        match field {
            1 => self.pressed = value.as_bool()?,
            2 => self.edge = value.as_u32()?,
            _ => self.unknown.push(field, &value),
        }
        Ok(())
    }
}

/// Signed encoder increment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PulsedEvent {
    #[serde(rename = "Value", default, skip_serializing_if = "is_zero_i32")]
    pub value: i32,
    #[serde(skip)]
    pub unknown: UnknownFields,
}

impl Wire for PulsedEvent {
    fn encode(&self, w: &mut WireWriter) {
        w.i32_field(1, self.value);
        self.unknown.replay(w);
    }

    fn merge_field(&mut self, field: u32, value: FieldValue<'_>) -> Result<()> {
        match field {
            1 => self.value = value.as_i32()?,
            _ => self.unknown.push(field, &value),
        }
        Ok(())
    }
}

/// Absolute position value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AbsoluteEvent {
    #[serde(rename = "Value", default, skip_serializing_if = "is_zero_u32")]
    pub value: u32,
    #[serde(skip)]
    pub unknown: UnknownFields,
}

impl Wire for AbsoluteEvent {
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

/// Signed velocity value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpeedEvent {
    #[serde(rename = "Value", default, skip_serializing_if = "is_zero_i32")]
    pub value: i32,
    #[serde(skip)]
    pub unknown: UnknownFields,
}

impl Wire for SpeedEvent {
    fn encode(&self, w: &mut WireWriter) {
        w.i32_field(1, self.value);
        self.unknown.replay(w);
    }

    fn merge_field(&mut self, field: u32, value: FieldValue<'_>) -> Result<()> {
        match field {
            1 => self.value = value.as_i32()?,
            _ => self.unknown.push(field, &value),
        }
        Ok(())
    }
}

/// Raw ADC reading.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawAnalogEvent {
    #[serde(rename = "Value", default, skip_serializing_if = "is_zero_u32")]
    pub value: u32,
    #[serde(skip)]
    pub unknown: UnknownFields,
}

impl Wire for RawAnalogEvent {
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

/// Panel system statistics, published on request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SysStat {
    /// CPU usage percent.
    #[serde(rename = "CPUUsage", default, skip_serializing_if = "is_zero_u32")]
    pub cpu_usage: u32,
    /// CPU temperature in degrees Celsius.
    #[serde(rename = "CPUTemp", default, skip_serializing_if = "super::is_zero_f32")]
    pub cpu_temp: f32,
    /// Current CPU frequency in kHz.
    #[serde(rename = "CPUFreqCurrent", default, skip_serializing_if = "is_zero_u32")]
    pub cpu_freq_current: u32,
    /// Total memory in kB.
    #[serde(rename = "MemTotal", default, skip_serializing_if = "is_zero_u32")]
    pub mem_total: u32,
    /// Free memory in kB.
    #[serde(rename = "MemFree", default, skip_serializing_if = "is_zero_u32")]
    pub mem_free: u32,
    #[serde(skip)]
    pub unknown: UnknownFields,
}

impl Wire for SysStat {
    fn encode(&self, w: &mut WireWriter) {
        w.u32_field(1, self.cpu_usage);
        w.f32_field(2, self.cpu_temp);
        w.u32_field(3, self.cpu_freq_current);
        w.u32_field(4, self.mem_total);
        w.u32_field(5, self.mem_free);
        self.unknown.replay(w);
    }

    fn merge_field(&mut self, field: u32, value: FieldValue<'_>) -> Result<()> {
        match field {
            1 => self.cpu_usage = value.as_u32()?,
            2 => self.cpu_temp = value.as_f32()?,
            3 => self.cpu_freq_current = value.as_u32()?,
            4 => self.mem_total = value.as_u32()?,
            5 => self.mem_free = value.as_u32()?,
            _ => self.unknown.push(field, &value),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_resolution() {
        assert_eq!(HWCEvent::binary(1, true, 0).kind(), Some(EventKind::Binary));
        assert_eq!(HWCEvent::pulsed(1, -2).kind(), Some(EventKind::Pulsed));
        assert_eq!(HWCEvent::default().kind(), None);

        // Two kinds set at once is invalid
        let mut evt = HWCEvent::binary(1, true, 0);
        evt.pulsed = Some(PulsedEvent {
            value: 1,
            unknown: UnknownFields::default(),
        });
        assert_eq!(evt.kind(), None);
    }

    #[test]
    fn test_event_wire_round_trip() {
        for evt in [
            HWCEvent::binary(9, true, 5),
            HWCEvent::binary(9, false, 0),
            HWCEvent::pulsed(10, -3),
            HWCEvent::absolute(11, 730),
            HWCEvent::speed(12, -90),
            HWCEvent::raw_analog(13, 512),
        ] {
            let back = HWCEvent::decode(&evt.encode_to_vec()).unwrap();
            assert_eq!(back, evt);
        }
    }

    #[test]
    fn test_sysstat_wire_round_trip() {
        let evt = HWCEvent {
            sys_stat: Some(SysStat {
                cpu_usage: 42,
                cpu_temp: 51.5,
                cpu_freq_current: 1_200_000,
                mem_total: 512_000,
                mem_free: 128_000,
                unknown: UnknownFields::default(),
            }),
            ..Default::default()
        };
        let back = HWCEvent::decode(&evt.encode_to_vec()).unwrap();
        assert_eq!(back, evt);
    }

    #[test]
    fn test_event_json_round_trip() {
        let evt = HWCEvent::absolute(5, 100);
        let json = serde_json::to_string(&evt).unwrap();
        assert!(json.contains("\"HWCID\":5"));
        assert!(json.contains("\"Absolute\""));
        let back: HWCEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, evt);
    }
}
