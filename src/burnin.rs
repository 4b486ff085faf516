//! Burn-in testing.
//!
//! A burn-in profile is a JSON file describing what a healthy panel emits
//! when every control is exercised: an initial feedback cycle, display
//! and indicator mappings, and the full expected event list. `--record`
//! builds the profile from a known-good panel; replay drives a unit under
//! test against it and paints progress onto the panel's own displays.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::connection::ConnectionConfig;
use crate::link::DialectPreference;
use crate::schema::{
    mode, Command, HWCColor, HWCEvent, HWCMode, HWCState, HWCText, InboundMessage,
};
use crate::session::{Session, SessionEvent, SessionOptions};
use crate::wire::UnknownFields;

/// One step of the initial feedback cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitialCycleStep {
    /// Target component.
    #[serde(rename = "HWC")]
    pub hwc: u32,
    /// Text to show on the component's display.
    #[serde(rename = "Text", default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    /// Delay before the next step, in milliseconds.
    #[serde(rename = "Delay", default, skip_serializing_if = "is_zero_u64")]
    pub delay_ms: u64,
    /// Output state: `On`, `Off` or `Dimmed`.
    #[serde(rename = "Output", default, skip_serializing_if = "String::is_empty")]
    pub output: String,
    /// LED color number.
    #[serde(rename = "Color", default, skip_serializing_if = "is_zero_u32")]
    pub color: u32,
}

fn is_zero_u64(v: &u64) -> bool {
    *v == 0
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

/// One expected event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProfileEvent {
    /// Originating component.
    #[serde(rename = "HWC")]
    pub hwc: u32,
    /// Component type label, informational.
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    /// Event descriptor in canonical ASCII form (`Down`, `Up`, `Enc:1`).
    #[serde(rename = "action")]
    pub action: String,
    /// Edge bitmask for four-way buttons.
    #[serde(rename = "_edge", default, skip_serializing_if = "is_zero_u32")]
    pub edge: u32,
}

/// A burn-in profile document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BurninProfile {
    /// Feedback steps run once at connect.
    #[serde(rename = "initialCycle", default, skip_serializing_if = "Vec::is_empty")]
    pub initial_cycle: Vec<InitialCycleStep>,
    /// Event-source HWC id → display HWC id for progress feedback.
    #[serde(rename = "displaymap", default, skip_serializing_if = "HashMap::is_empty")]
    pub display_map: HashMap<String, u32>,
    /// Event-source HWC id → indicator HWC id for pass/fail feedback.
    #[serde(rename = "outputmap", default, skip_serializing_if = "HashMap::is_empty")]
    pub output_map: HashMap<String, u32>,
    /// Event descriptors to ignore entirely (e.g. `Raw`).
    #[serde(rename = "ignore", default, skip_serializing_if = "Vec::is_empty")]
    pub ignore: Vec<String>,
    /// Every event a healthy panel emits during the test.
    #[serde(rename = "events", default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<ProfileEvent>,
}

impl BurninProfile {
    /// Load a profile from disk.
    ///
    /// # Errors
    ///
    /// Returns an error when the file is missing or not valid JSON.
    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("cannot read profile {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("profile {} is not valid JSON", path.display()))
    }

    /// Write the profile to disk, pretty-printed.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be written.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self).expect("profile serializes");
        tokio::fs::write(path, text)
            .await
            .with_context(|| format!("cannot write profile {}", path.display()))
    }

    fn is_ignored(&self, action: &str) -> bool {
        self.ignore
            .iter()
            .any(|prefix| action == prefix || action.starts_with(&format!("{prefix}:")))
    }
}

/// Canonical descriptor for matching events against a profile.
fn event_descriptor(event: &HWCEvent) -> Option<(String, u32)> {
    if let Some(b) = &event.binary {
        return Some((if b.pressed { "Down" } else { "Up" }.into(), b.edge));
    }
    if let Some(p) = &event.pulsed {
        return Some((format!("Enc:{}", p.value), 0));
    }
    if let Some(a) = &event.absolute {
        return Some((format!("Abs:{}", a.value), 0));
    }
    if let Some(s) = &event.speed {
        return Some((format!("Speed:{}", s.value), 0));
    }
    if let Some(r) = &event.raw_analog {
        return Some((format!("Raw:{}", r.value), 0));
    }
    None
}

/// Burn-in switches.
pub struct BurninOptions {
    /// Dialect policy toward the panel.
    pub dialect: DialectPreference,
    /// Profile file; required for both record and replay.
    pub file: PathBuf,
    /// Capture a new profile instead of replaying one.
    pub record: bool,
    /// Brightness pushed at startup.
    pub brightness: Option<u32>,
}

/// Run the burn-in tester until cancelled (record) or until the profile
/// is exhausted (replay; keeps running for feedback until cancelled).
pub async fn run_burnin(
    addr: String,
    options: BurninOptions,
    mut cancel: watch::Receiver<bool>,
) -> Result<()> {
    let mut profile = if options.record {
        BurninProfile::default()
    } else {
        BurninProfile::load(&options.file).await?
    };

    let mut session = Session::connect(
        addr,
        SessionOptions {
            connection: ConnectionConfig {
                dialect: options.dialect,
                ..Default::default()
            },
            brightness: options.brightness,
            ..Default::default()
        },
    );

    let mut remaining: HashSet<ProfileEvent> = profile.events.iter().cloned().collect();
    let total = remaining.len();
    if !options.record && total == 0 {
        bail!("profile {} contains no events", options.file.display());
    }
    let mut recorded: HashSet<ProfileEvent> = HashSet::new();

    loop {
        let event = tokio::select! {
            _ = cancel.changed() => break,
            event = session.next_event() => match event {
                None => break,
                Some(event) => event,
            },
        };

        match event {
            SessionEvent::Connected { binary, .. } => {
                log::info!("panel connected ({})", if binary { "binary" } else { "ASCII" });
                if !options.record {
                    run_initial_cycle(&session, &profile).await;
                }
            }
            SessionEvent::Disconnected => log::warn!("panel disconnected"),
            SessionEvent::Message(msg) => {
                for event in &msg.events {
                    let Some((action, edge)) = event_descriptor(event) else {
                        continue;
                    };
                    if profile.is_ignored(&action) {
                        continue;
                    }
                    let key = ProfileEvent {
                        hwc: event.hwc_id,
                        kind: String::new(),
                        action,
                        edge,
                    };

                    if options.record {
                        if recorded.insert(key.clone()) {
                            log::info!(
                                "recorded HWC#{} {} ({} so far)",
                                key.hwc,
                                key.action,
                                recorded.len()
                            );
                        }
                    } else {
                        replay_feedback(&session, &profile, &key, &mut remaining, total).await;
                    }
                }
            }
        }
    }

    session.shutdown().await;

    if options.record {
        profile.events = recorded.into_iter().collect();
        profile.events.sort_by_key(|e| (e.hwc, e.action.clone(), e.edge));
        profile.save(&options.file).await?;
        log::info!(
            "profile with {} events written to {}",
            profile.events.len(),
            options.file.display()
        );
    } else if remaining.is_empty() {
        log::info!("burn-in PASSED: all {total} events seen");
    } else {
        log::warn!("burn-in incomplete: {} of {total} events missing", remaining.len());
        bail!("burn-in incomplete");
    }
    Ok(())
}

/// Push the profile's initial feedback cycle to the panel.
async fn run_initial_cycle(session: &Session, profile: &BurninProfile) {
    session
        .send(InboundMessage::command(Command {
            clear_all: true,
            ..Default::default()
        }))
        .await;

    for step in &profile.initial_cycle {
        let mut state = HWCState {
            hwc_ids: vec![step.hwc],
            ..Default::default()
        };
        if !step.text.is_empty() {
            state.text = Some(HWCText {
                title: step.text.clone(),
                ..Default::default()
            });
        }
        if !step.output.is_empty() {
            state.mode = Some(HWCMode {
                state: match step.output.as_str() {
                    "On" => mode::ON,
                    "Dimmed" => mode::DIMMED,
                    _ => mode::OFF,
                },
                ..Default::default()
            });
        }
        if step.color != 0 {
            state.color = Some(HWCColor {
                index: Some(step.color),
                rgb: None,
                unknown: UnknownFields::default(),
            });
        }
        if !session.send(InboundMessage::state(state)).await {
            return;
        }
        if step.delay_ms != 0 {
            tokio::time::sleep(std::time::Duration::from_millis(step.delay_ms)).await;
        }
    }
}

/// Mark one replayed event as seen and paint progress feedback.
async fn replay_feedback(
    session: &Session,
    profile: &BurninProfile,
    seen: &ProfileEvent,
    remaining: &mut HashSet<ProfileEvent>,
    total: usize,
) {
    let before = remaining.len();
    remaining.retain(|e| !(e.hwc == seen.hwc && e.action == seen.action && e.edge == seen.edge));
    let matched = remaining.len() < before;
    let done = total - remaining.len();

    let source = seen.hwc.to_string();
    if let Some(display) = profile.display_map.get(&source) {
        let text = HWCText {
            integer_value: done as i32,
            title: format!("HWc #{}", seen.hwc),
            textline1: format!("{done}/{total}"),
            solid_header_bar: matched,
            ..Default::default()
        };
        let state = HWCState {
            hwc_ids: vec![*display],
            text: Some(text),
            ..Default::default()
        };
        session.send(InboundMessage::state(state)).await;
    }
    if let Some(output) = profile.output_map.get(&source) {
        let state = HWCState {
            hwc_ids: vec![*output],
            mode: Some(HWCMode {
                state: if matched { mode::ON } else { mode::DIMMED },
                ..Default::default()
            }),
            ..Default::default()
        };
        session.send(InboundMessage::state(state)).await;
    }

    if remaining.is_empty() {
        log::info!("all {total} profile events seen");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_json_shape() {
        let json = r#"{
            "initialCycle": [
                {"HWC": 1, "Text": "Hello", "Delay": 100, "Output": "On", "Color": 3}
            ],
            "displaymap": {"1": 40},
            "outputmap": {"1": 1},
            "ignore": ["Raw"],
            "events": [
                {"HWC": 1, "type": "button", "action": "Down"},
                {"HWC": 1, "type": "button", "action": "Up"},
                {"HWC": 2, "action": "Enc:1", "_edge": 4}
            ]
        }"#;
        let profile: BurninProfile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.initial_cycle.len(), 1);
        assert_eq!(profile.initial_cycle[0].delay_ms, 100);
        assert_eq!(profile.display_map.get("1"), Some(&40));
        assert_eq!(profile.events.len(), 3);
        assert_eq!(profile.events[2].edge, 4);

        // Round-trips through the serializer
        let back: BurninProfile =
            serde_json::from_str(&serde_json::to_string(&profile).unwrap()).unwrap();
        assert_eq!(back.events, profile.events);
    }

    #[test]
    fn test_event_descriptors() {
        assert_eq!(
            event_descriptor(&HWCEvent::binary(1, true, 5)),
            Some(("Down".into(), 5))
        );
        assert_eq!(
            event_descriptor(&HWCEvent::pulsed(2, -1)),
            Some(("Enc:-1".into(), 0))
        );
        assert_eq!(event_descriptor(&HWCEvent::default()), None);
    }

    #[test]
    fn test_ignore_matches_prefix() {
        let profile = BurninProfile {
            ignore: vec!["Raw".into()],
            ..Default::default()
        };
        assert!(profile.is_ignored("Raw:512"));
        assert!(profile.is_ignored("Raw"));
        assert!(!profile.is_ignored("Down"));
    }

    #[tokio::test]
    async fn test_profile_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("burnin.json");
        let profile = BurninProfile {
            events: vec![ProfileEvent {
                hwc: 9,
                kind: "button".into(),
                action: "Down".into(),
                edge: 0,
            }],
            ..Default::default()
        };
        profile.save(&path).await.unwrap();
        let back = BurninProfile::load(&path).await.unwrap();
        assert_eq!(back.events, profile.events);
    }
}
