//! Dialect autodetection.
//!
//! A freshly dialed panel may speak either dialect. Probing with a binary
//! ping (rather than an ASCII one) matters: a panel that itself
//! autodetects would otherwise settle on ASCII with an auto-mode system,
//! which is the less efficient encoding for both ends.
//!
//! Sequence:
//!
//! 1. Write a binary-framed PING.
//! 2. Read with a 2 s deadline.
//! 3. A reply whose length header matches the bytes received and whose
//!    payload decodes commits the connection to binary.
//! 4. A timeout, a header/byte-count mismatch or a decode failure commits
//!    to ASCII; a single `\n` is written to flush the binary ping out of
//!    the peer's line buffer.
//!
//! The decision is immutable for the connection's lifetime. Bytes already
//! read are handed to the committed reader, so nothing is lost.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::constants::PROBE_READ_TIMEOUT;
use crate::link::{Dialect, DialectPreference, LinkRole};

/// The probe's verdict plus any bytes consumed while reaching it.
#[derive(Debug)]
pub struct ProbeOutcome {
    /// Committed dialect for this connection.
    pub dialect: Dialect,
    /// Bytes read past the probe reply; seed the committed reader with
    /// them.
    pub leftover: Vec<u8>,
}

/// Probe a freshly dialed connection.
///
/// The ping is encoded for the link's transmit direction, so the same
/// probe serves dialed panels and dialed systems. With a non-auto
/// `preference` the probe still runs (the binary ping doubles as a
/// greeting and primes auto-detecting panels), but the decision is
/// pre-committed.
///
/// # Errors
///
/// Returns the underlying I/O error when the socket dies during the
/// probe.
pub async fn probe_dialect<R: LinkRole>(
    stream: &mut TcpStream,
    preference: DialectPreference,
) -> std::io::Result<ProbeOutcome> {
    let ping = R::encode(Dialect::Binary, &R::ping());
    stream.write_all(&ping).await?;
    log::debug!("probing dialect with binary ping ({} bytes)", ping.len());

    let mut buf = [0u8; 1000];
    let mut leftover = Vec::new();

    let probed = match timeout(PROBE_READ_TIMEOUT, stream.read(&mut buf)).await {
        Err(_) => {
            log::debug!("probe read deadline passed, assuming ASCII peer");
            Dialect::Ascii
        }
        Ok(Err(e)) => return Err(e),
        Ok(Ok(0)) => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "peer closed during dialect probe",
            ))
        }
        Ok(Ok(n)) => {
            let reply = &buf[..n];
            if let Some(dialect) = judge_binary_reply::<R>(reply) {
                dialect
            } else {
                log::debug!(
                    "probe reply not a binary frame: {:?}",
                    String::from_utf8_lossy(reply)
                );
                leftover = reply.to_vec();
                Dialect::Ascii
            }
        }
    };

    let dialect = preference.resolve(probed);
    if dialect == Dialect::Ascii {
        // Flush the binary ping out of an ASCII peer's line buffer
        stream.write_all(b"\n").await?;
    }
    log::info!("committed to {dialect} dialect");

    Ok(ProbeOutcome { dialect, leftover })
}

/// Binary verdict when the reply is a single well-formed frame.
fn judge_binary_reply<R: LinkRole>(reply: &[u8]) -> Option<Dialect> {
    if reply.len() <= 4 {
        return None;
    }
    let declared = u32::from_le_bytes([reply[0], reply[1], reply[2], reply[3]]);
    if declared as usize + 4 != reply.len() {
        return None;
    }
    match R::decode_payload(&reply[4..]) {
        Ok(_) => {
            log::debug!("probe received a well-formed binary reply");
            Some(Dialect::Binary)
        }
        Err(e) => {
            log::debug!("probe reply failed to decode as a message: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::encode_message;
    use crate::link::PanelLink;
    use crate::schema::{flow, OutboundMessage};

    #[test]
    fn test_judge_accepts_framed_ack() {
        let reply = encode_message(&OutboundMessage::flow(flow::ACK));
        assert_eq!(judge_binary_reply::<PanelLink>(&reply), Some(Dialect::Binary));
    }

    #[test]
    fn test_judge_accepts_other_outbound() {
        let reply = encode_message(&OutboundMessage::flow(flow::BSY));
        assert_eq!(judge_binary_reply::<PanelLink>(&reply), Some(Dialect::Binary));
    }

    #[test]
    fn test_judge_rejects_ascii_text() {
        assert_eq!(judge_binary_reply::<PanelLink>(b"ping\nlist\n"), None);
    }

    #[test]
    fn test_judge_rejects_header_mismatch() {
        let mut reply = encode_message(&OutboundMessage::flow(flow::ACK));
        reply.extend_from_slice(b"extra");
        assert_eq!(judge_binary_reply::<PanelLink>(&reply), None);
    }

    #[test]
    fn test_judge_rejects_short_reply() {
        assert_eq!(judge_binary_reply::<PanelLink>(b"ok"), None);
    }
}
