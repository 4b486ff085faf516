//! Protocol-wide constants.
//!
//! Centralizes the magic numbers of the Raw Panel runtime so the codecs,
//! connection machinery and relay modes agree on them. Constants are
//! grouped by domain.

use std::time::Duration;

// ============================================================================
// Network defaults
// ============================================================================

/// Default TCP port for Raw Panel endpoints when none is given.
pub const DEFAULT_PORT: u16 = 9923;

/// Largest accepted binary frame payload, in bytes.
///
/// A length header above this is a framing violation and fatal for the
/// connection.
pub const MAX_FRAME_PAYLOAD: u32 = 500_000;

// ============================================================================
// Timeouts
// ============================================================================

/// How long the dialect probe waits for a binary reply before committing
/// to ASCII mode.
pub const PROBE_READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Deadline for the remainder of a binary payload once its length header
/// has been read. Guards against a peer that stalls mid-frame.
pub const PAYLOAD_READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Delay between dial attempts after a connection dies.
pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(3);

// ============================================================================
// Heartbeat
// ============================================================================

/// Heartbeat period requested from the panel and used for our own pings,
/// in milliseconds.
pub const HEARTBEAT_PERIOD_MS: u32 = 3000;

/// Missed-beat multiplier: the connection is declared dead when no inbound
/// traffic arrives for `HEARTBEAT_PERIOD_MS * LIVENESS_MULTIPLIER`.
pub const LIVENESS_MULTIPLIER: u32 = 3;

// ============================================================================
// Channels
// ============================================================================

/// Capacity of the bounded to-peer / from-peer channels. A full channel
/// blocks the producer, propagating backpressure to the application or,
/// via the TCP window, to the peer.
pub const CHANNEL_CAPACITY: usize = 100;

// ============================================================================
// ASCII dialect
// ============================================================================

/// Base64 characters allowed after the `:` on a single graphics line.
/// Payloads above this are split into a multi-line sequence.
pub const GFX_LINE_BUDGET: usize = 120;

/// Raw bytes per multi-line graphics chunk (encodes to at most
/// [`GFX_LINE_BUDGET`] base64 characters).
pub const GFX_CHUNK_BYTES: usize = GFX_LINE_BUDGET / 4 * 3;

// ============================================================================
// Session defaults
// ============================================================================

/// Period for the panel's system-stat publishing requested at startup,
/// in seconds.
pub const SYSSTAT_PERIOD_SEC: u32 = 15;

/// Interval between connection/runtime-stat re-polls within a session.
pub const SESSION_POLL_INTERVAL: Duration = Duration::from_secs(60);

// ============================================================================
// WebSocket relay
// ============================================================================

/// Period for protocol-level WebSocket pings.
pub const WS_PING_PERIOD: Duration = Duration::from_secs(2);

/// Deadline for a WebSocket control frame write.
pub const WS_CONTROL_DEADLINE: Duration = Duration::from_secs(1);

/// A WebSocket peer silent for this long is considered stale.
pub const WS_STALE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long the WebSocket server waits for the first (auth) message.
pub const WS_AUTH_DEADLINE: Duration = Duration::from_secs(5);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_fits_line_budget() {
        // 3 raw bytes become 4 base64 characters
        assert!(GFX_CHUNK_BYTES % 3 == 0);
        assert!(GFX_CHUNK_BYTES / 3 * 4 <= GFX_LINE_BUDGET);
    }

    #[test]
    fn test_timeout_values_are_reasonable() {
        assert!(PROBE_READ_TIMEOUT >= Duration::from_secs(1));
        assert!(RECONNECT_BACKOFF >= Duration::from_secs(1));
        assert!(WS_CONTROL_DEADLINE < WS_PING_PERIOD);
    }
}
