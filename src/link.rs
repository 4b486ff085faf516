//! Dialect tags and direction-typed codecs.
//!
//! A connection commits to one [`Dialect`] for its lifetime; everything
//! downstream is polymorphic over a [`LinkRole`] — the pairing of what we
//! transmit, what we receive, and the parser state the receive side needs
//! — instead of branching on message direction at every call site.
//!
//! [`PanelLink`] is the usual role: this process is the system, the peer
//! is a panel. [`SystemLink`] is the inverted role the bridge modes use on
//! their system-facing side.

use anyhow::Result;

use crate::ascii::{encode_inbound, encode_outbound, InboundAsciiParser, OutboundAsciiParser};
use crate::constants::GFX_LINE_BUDGET;
use crate::framing::encode_message;
use crate::schema::{flow, InboundMessage, OutboundMessage};
use crate::wire::Wire;

/// The two wire dialects. Decided once per connection by the probe and
/// immutable afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Length-prefixed binary frames.
    Binary,
    /// LF-terminated ASCII lines.
    Ascii,
}

impl Dialect {
    /// True for the binary dialect.
    pub fn is_binary(self) -> bool {
        matches!(self, Dialect::Binary)
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dialect::Binary => write!(f, "binary"),
            Dialect::Ascii => write!(f, "ASCII"),
        }
    }
}

/// How to decide a connection's dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DialectPreference {
    /// Probe the peer and commit to what it speaks.
    #[default]
    Auto,
    /// Probe, but commit to binary regardless.
    Binary,
    /// Probe, but commit to ASCII regardless.
    Ascii,
}

impl DialectPreference {
    /// Resolve the committed dialect given what the probe observed.
    pub fn resolve(self, probed: Dialect) -> Dialect {
        match self {
            DialectPreference::Auto => probed,
            DialectPreference::Binary => Dialect::Binary,
            DialectPreference::Ascii => Dialect::Ascii,
        }
    }
}

fn lines_to_bytes(lines: Vec<String>) -> Vec<u8> {
    let mut buf = Vec::new();
    for line in lines {
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
    }
    buf
}

/// One direction of a Raw Panel link: the message types flowing each way
/// and the codec state the receive side keeps.
pub trait LinkRole: Send + Sync + 'static {
    /// What this process transmits.
    type Tx: std::fmt::Debug + Send + 'static;
    /// What this process receives.
    type Rx: std::fmt::Debug + Send + 'static;
    /// Per-connection ASCII parse state (graphics aggregation lives here).
    type Parser: Default + Send + 'static;

    /// The heartbeat message for this direction.
    fn ping() -> Self::Tx;

    /// True when the received message is a bare liveness ping that wants
    /// an acknowledgement.
    fn is_ping(rx: &Self::Rx) -> bool;

    /// Encode one message in the given dialect. ASCII may produce several
    /// lines; the result is written as one unit.
    fn encode(dialect: Dialect, msg: &Self::Tx) -> Vec<u8>;

    /// Decode one binary frame payload.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed payloads; the caller drops that one
    /// message and keeps the connection.
    fn decode_payload(payload: &[u8]) -> Result<Self::Rx>;

    /// Parse one ASCII line, feeding any multi-line state.
    fn decode_line(parser: &mut Self::Parser, line: &str) -> Option<Self::Rx>;
}

/// This process is a system; the peer is a panel.
pub struct PanelLink;

impl LinkRole for PanelLink {
    type Tx = InboundMessage;
    type Rx = OutboundMessage;
    type Parser = OutboundAsciiParser;

    fn ping() -> InboundMessage {
        InboundMessage::flow(flow::PING)
    }

    fn is_ping(rx: &OutboundMessage) -> bool {
        rx.flow_message == flow::PING
    }

    fn encode(dialect: Dialect, msg: &InboundMessage) -> Vec<u8> {
        match dialect {
            Dialect::Binary => encode_message(msg),
            Dialect::Ascii => lines_to_bytes(encode_inbound(msg, GFX_LINE_BUDGET)),
        }
    }

    fn decode_payload(payload: &[u8]) -> Result<OutboundMessage> {
        OutboundMessage::decode(payload)
    }

    fn decode_line(parser: &mut OutboundAsciiParser, line: &str) -> Option<OutboundMessage> {
        parser.parse_line(line)
    }
}

/// This process speaks for a panel; the peer is a system.
pub struct SystemLink;

impl LinkRole for SystemLink {
    type Tx = OutboundMessage;
    type Rx = InboundMessage;
    type Parser = InboundAsciiParser;

    fn ping() -> OutboundMessage {
        OutboundMessage::flow(flow::PING)
    }

    fn is_ping(rx: &InboundMessage) -> bool {
        rx.flow_message == flow::PING
    }

    fn encode(dialect: Dialect, msg: &OutboundMessage) -> Vec<u8> {
        match dialect {
            Dialect::Binary => encode_message(msg),
            Dialect::Ascii => lines_to_bytes(encode_outbound(msg)),
        }
    }

    fn decode_payload(payload: &[u8]) -> Result<InboundMessage> {
        InboundMessage::decode(payload)
    }

    fn decode_line(parser: &mut InboundAsciiParser, line: &str) -> Option<InboundMessage> {
        parser.parse_line(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Command, HWCEvent};

    #[test]
    fn test_preference_resolution() {
        assert_eq!(DialectPreference::Auto.resolve(Dialect::Ascii), Dialect::Ascii);
        assert_eq!(DialectPreference::Auto.resolve(Dialect::Binary), Dialect::Binary);
        assert_eq!(DialectPreference::Binary.resolve(Dialect::Ascii), Dialect::Binary);
        assert_eq!(DialectPreference::Ascii.resolve(Dialect::Binary), Dialect::Ascii);
    }

    #[test]
    fn test_binary_encode_is_framed_in_both_roles() {
        let panel = PanelLink::encode(Dialect::Binary, &PanelLink::ping());
        let len = u32::from_le_bytes([panel[0], panel[1], panel[2], panel[3]]) as usize;
        assert_eq!(panel.len(), 4 + len);

        let sys = SystemLink::encode(Dialect::Binary, &SystemLink::ping());
        assert_eq!(&sys[..4], &((sys.len() - 4) as u32).to_le_bytes());
    }

    #[test]
    fn test_panel_link_ascii_encode_is_lines() {
        let msg = InboundMessage::command(Command {
            activate_panel: true,
            send_panel_info: true,
            ..Default::default()
        });
        let bytes = PanelLink::encode(Dialect::Ascii, &msg);
        assert_eq!(String::from_utf8(bytes).unwrap(), "ActivePanel=1\nlist\n");
    }

    #[test]
    fn test_system_link_round_trip_both_dialects() {
        let msg = OutboundMessage::event(HWCEvent::absolute(17, 512));

        let framed = SystemLink::encode(Dialect::Binary, &msg);
        let decoded = PanelLink::decode_payload(&framed[4..]).unwrap();
        assert_eq!(decoded, msg);

        let lines = SystemLink::encode(Dialect::Ascii, &msg);
        let mut parser = OutboundAsciiParser::new();
        let text = String::from_utf8(lines).unwrap();
        let decoded = PanelLink::decode_line(&mut parser, text.trim()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_ping_detection() {
        assert!(PanelLink::is_ping(&OutboundMessage::flow(flow::PING)));
        assert!(!PanelLink::is_ping(&OutboundMessage::flow(flow::ACK)));
        assert!(SystemLink::is_ping(&InboundMessage::flow(flow::PING)));
    }
}
