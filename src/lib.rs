//! Raw Panel protocol runtime and toolkit.
//!
//! A bidirectional runtime for "Raw Panel" hardware control surfaces:
//! physical panels with buttons, encoders, faders, displays and LEDs that
//! speak a schema-defined message set in two wire dialects — length-
//! prefixed binary frames and LF-terminated ASCII lines.
//!
//! # Architecture
//!
//! ```text
//! application
//!     │
//! Session (startup commands, auto-ack, observable state, reconnect)
//!     │
//! Connection runtime (reader / writer / heartbeat tasks)
//!     │
//! Dialect probe ──▶ committed codec (binary frames | ASCII lines)
//!     │
//! TCP socket ↔ panel or system
//! ```
//!
//! # Modules
//!
//! - [`schema`] — the Inbound/Outbound message tree
//! - [`wire`] — field-numbered binary payload encoding
//! - [`framing`] — length-prefixed frame layer
//! - [`ascii`] — line codec with multi-line graphics aggregation
//! - [`probe`] — binary-vs-ASCII autodetection
//! - [`connection`] — per-socket task runtime with reconnect
//! - [`session`] — per-panel orchestration
//! - [`bridge`], [`wsrelay`] — relay topologies composed on the above

pub mod ascii;
pub mod bridge;
pub mod burnin;
pub mod connection;
pub mod constants;
pub mod framing;
pub mod inspect;
pub mod link;
pub mod probe;
pub mod schema;
pub mod session;
pub mod wire;
pub mod wsrelay;

pub use link::{Dialect, DialectPreference};
pub use schema::{InboundMessage, OutboundMessage};
pub use session::{PanelState, Session, SessionEvent, SessionOptions};
