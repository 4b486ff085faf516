//! ASCII dialect codec.
//!
//! The line-oriented form of the Raw Panel protocol: one LF-terminated
//! line per message, except graphics payloads which may span a sequence
//! of lines (see [`gfx`]). Both directions share the grammar's shape but
//! not its vocabulary, so each direction gets its own encoder and parser.

pub mod gfx;
pub mod inbound;
pub mod outbound;

pub use gfx::{gfx_lines, GfxAggregator};
pub use inbound::{encode_inbound, InboundAsciiParser};
pub use outbound::{encode_outbound, OutboundAsciiParser};

/// Parse the id of a `HWC<kind>#<id>=` line. The grammar carries exactly
/// one id per state line; a state targeting several components is
/// emitted as one line per id.
pub(crate) fn parse_id(part: &str) -> Option<u32> {
    part.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_is_singular() {
        assert_eq!(parse_id("7"), Some(7));
        assert_eq!(parse_id(" 38 "), Some(38));
        assert_eq!(parse_id(""), None);
        assert_eq!(parse_id("1,2"), None);
        assert_eq!(parse_id("x"), None);
    }
}
