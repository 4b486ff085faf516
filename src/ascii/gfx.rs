//! Multi-line graphics transfer for the ASCII dialect.
//!
//! A graphics payload that fits the line budget travels as a single line:
//!
//! ```text
//! HWCg#40=0/0,64x32:<base64>
//! ```
//!
//! Larger payloads are split into a sequence, where the first line declares
//! the final sequence number and the dimensions:
//!
//! ```text
//! HWCg#40=0/2,64x32:<base64 chunk>
//! HWCg#40=1:<base64 chunk>
//! HWCg#40=2:<base64 chunk>
//! ```
//!
//! The sequence is complete when `seq == total`. `HWCg` carries MONO,
//! `HWCgGray` 4-bit grayscale and `HWCgRGB` RGB565 pixels. Aggregation
//! state is keyed by `(id, kind)` and lives on the session's reader; a new
//! first line for a key replaces any in-flight partial, and incomplete
//! sequences die with the session.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::schema::{HWCGfx, ImageType};
use crate::wire::UnknownFields;

/// Line keyword for an image encoding.
pub fn gfx_keyword(image_type: ImageType) -> &'static str {
    match image_type {
        ImageType::Gray4 => "HWCgGray",
        ImageType::Rgb16 => "HWCgRGB",
        _ => "HWCg",
    }
}

/// Image encoding for a line keyword, if it is a graphics keyword.
pub fn gfx_kind(keyword: &str) -> Option<ImageType> {
    match keyword {
        "HWCg" => Some(ImageType::Mono),
        "HWCgGray" => Some(ImageType::Gray4),
        "HWCgRGB" => Some(ImageType::Rgb16),
        _ => None,
    }
}

/// Encode a graphics payload for one component id as ASCII lines.
///
/// `budget` caps the base64 characters after the `:`; the raw payload is
/// split so every chunk honors it.
pub fn gfx_lines(id: u32, gfx: &HWCGfx, budget: usize) -> Vec<String> {
    let keyword = gfx_keyword(gfx.image_type);
    let b64 = BASE64.encode(&gfx.image_data);
    if b64.len() <= budget {
        return vec![format!(
            "{keyword}#{id}=0/0,{}x{}:{b64}",
            gfx.w, gfx.h
        )];
    }

    // Chunk the raw bytes on a 3-byte multiple so every chunk encodes to
    // standalone base64 within the budget.
    let chunk_bytes = (budget / 4 * 3).max(3);
    let chunks: Vec<&[u8]> = gfx.image_data.chunks(chunk_bytes).collect();
    let total = chunks.len() - 1;
    chunks
        .iter()
        .enumerate()
        .map(|(seq, chunk)| {
            let b64 = BASE64.encode(chunk);
            if seq == 0 {
                format!("{keyword}#{id}={seq}/{total},{}x{}:{b64}", gfx.w, gfx.h)
            } else {
                format!("{keyword}#{id}={seq}:{b64}")
            }
        })
        .collect()
}

#[derive(Debug)]
struct Partial {
    total: u32,
    next_seq: u32,
    w: u32,
    h: u32,
    b64: String,
}

/// Reassembles multi-line graphics sequences.
#[derive(Debug, Default)]
pub struct GfxAggregator {
    pending: HashMap<(u32, u32), Partial>,
}

impl GfxAggregator {
    /// Create an empty aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one graphics line's value part (`<head>:<base64>`) for the
    /// given id and kind. Returns the assembled image when the line
    /// completes a sequence.
    ///
    /// Malformed lines and length mismatches drop the affected sequence
    /// and return `None`; they never affect other keys.
    pub fn feed(&mut self, id: u32, kind: ImageType, value: &str) -> Option<HWCGfx> {
        let key = (id, kind.raw());
        let (head, b64) = value.split_once(':')?;

        if let Some((seq_part, dims)) = head.split_once('/') {
            // First line: "<seq>/<total>,<W>x<H>"
            let seq: u32 = seq_part.parse().ok()?;
            let (total_part, size) = dims.split_once(',')?;
            let total: u32 = total_part.parse().ok()?;
            let (w, h) = size.split_once('x')?;
            let (w, h) = (w.parse().ok()?, h.parse().ok()?);

            if seq != 0 {
                log::debug!("graphics sequence for HWC#{id} starts at {seq}, ignoring");
                self.pending.remove(&key);
                return None;
            }
            if self.pending.remove(&key).is_some() {
                log::debug!("replacing in-flight graphics sequence for HWC#{id}");
            }
            let partial = Partial {
                total,
                next_seq: 1,
                w,
                h,
                b64: b64.to_string(),
            };
            if total == 0 {
                return Self::assemble(id, kind, partial);
            }
            self.pending.insert(key, partial);
            return None;
        }

        // Continuation line: "<seq>"
        let seq: u32 = head.parse().ok()?;
        let Some(partial) = self.pending.get_mut(&key) else {
            log::debug!("graphics continuation for HWC#{id} with no sequence in flight");
            return None;
        };
        if seq != partial.next_seq {
            log::debug!(
                "graphics sequence for HWC#{id} out of order (expected {}, got {seq})",
                partial.next_seq
            );
            self.pending.remove(&key);
            return None;
        }
        partial.b64.push_str(b64);
        partial.next_seq += 1;

        if seq == partial.total {
            let partial = self.pending.remove(&key)?;
            return Self::assemble(id, kind, partial);
        }
        None
    }

    fn assemble(id: u32, kind: ImageType, partial: Partial) -> Option<HWCGfx> {
        let image_data = match BASE64.decode(partial.b64.as_bytes()) {
            Ok(data) => data,
            Err(e) => {
                log::warn!("graphics for HWC#{id} carried invalid base64: {e}");
                return None;
            }
        };
        let gfx = HWCGfx {
            w: partial.w,
            h: partial.h,
            image_type: kind,
            image_data,
            unknown: UnknownFields::default(),
        };
        if !gfx.len_matches() {
            log::warn!(
                "graphics for HWC#{id} is {} bytes, expected {:?} for {}x{}",
                gfx.image_data.len(),
                gfx.expected_len(),
                gfx.w,
                gfx.h
            );
            return None;
        }
        Some(gfx)
    }
}
