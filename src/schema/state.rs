//! Sparse hardware-component state updates.
//!
//! An [`HWCState`] targets one or more HWC ids and carries only the fields
//! to change; absent fields leave the panel's state untouched. The JSON
//! shape (PascalCase keys, omitted defaults) matches what the original
//! tools emit, so a `{...}` ASCII state line or a WebSocket envelope is
//! interchangeable with them.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::wire::{FieldValue, UnknownFields, Wire, WireWriter};

use super::{is_false, is_zero_i32, is_zero_u32};

/// Display value formatting codes carried in [`HWCText::formatting`].
///
/// Unknown codes pass through as their raw integer.
pub mod fmt {
    /// Plain integer.
    pub const INTEGER: u32 = 0;
    /// Value divided by 10, one decimal.
    pub const FLOAT_1: u32 = 1;
    /// Value divided by 100, two decimals.
    pub const FLOAT_2: u32 = 2;
    /// Value divided by 1000, three decimals.
    pub const FLOAT_3: u32 = 3;
    /// Automatic decimal placement (value scaled by 1000).
    pub const FLOAT_AUTO: u32 = 4;
    /// Percent suffix.
    pub const PERCENT: u32 = 5;
    /// Decibel suffix.
    pub const DB: u32 = 6;
    /// Frame count suffix.
    pub const FRAMES: u32 = 7;
    /// Reciprocal, rendered as `1/x`.
    pub const RECIPROCAL: u32 = 8;
    /// Kelvin color temperature suffix.
    pub const KELVIN: u32 = 9;
    /// Value hidden, only titles/text lines shown.
    pub const HIDDEN: u32 = 10;
    /// Text lines only, value field ignored.
    pub const TEXT_ONLY: u32 = 11;
    /// Raw value, no interpretation.
    pub const RAW: u32 = 12;
}

/// Output mode states carried in [`HWCMode::state`].
pub mod mode {
    /// Output off.
    pub const OFF: u32 = 0;
    /// Output dimmed.
    pub const DIMMED: u32 = 1;
    /// Output on.
    pub const ON: u32 = 2;
}

/// Sparse state update for one or more hardware components.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HWCState {
    /// Target component ids. Must be non-empty to be applicable.
    #[serde(rename = "HWCIDs", default, skip_serializing_if = "Vec::is_empty")]
    pub hwc_ids: Vec<u32>,

    /// Output mode (LED on/off/dimmed, blink pattern).
    #[serde(rename = "HWCMode", default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<HWCMode>,

    /// Output color.
    #[serde(rename = "HWCColor", default, skip_serializing_if = "Option::is_none")]
    pub color: Option<HWCColor>,

    /// Extended value (four-bit interpretation plus a 12-bit value).
    #[serde(rename = "HWCExtended", default, skip_serializing_if = "Option::is_none")]
    pub extended: Option<HWCExtended>,

    /// Display text contents.
    #[serde(rename = "HWCText", default, skip_serializing_if = "Option::is_none")]
    pub text: Option<HWCText>,

    /// Display graphics contents.
    #[serde(rename = "HWCGfx", default, skip_serializing_if = "Option::is_none")]
    pub gfx: Option<HWCGfx>,

    /// Processor requests for the external graphics processors. Carried
    /// losslessly, never interpreted here.
    #[serde(rename = "Processors", default, skip_serializing_if = "Option::is_none")]
    pub processors: Option<Processors>,

    /// Ask the panel to publish raw ADC values for these components.
    #[serde(
        rename = "PublishRawADCValues",
        default,
        skip_serializing_if = "is_false"
    )]
    pub publish_raw_adc_values: bool,

    #[serde(skip)]
    pub unknown: UnknownFields,
}

impl HWCState {
    /// A state update with no target ids changes nothing on the panel.
    pub fn is_applicable(&self) -> bool {
        !self.hwc_ids.is_empty()
    }
}

impl Wire for HWCState {
    fn encode(&self, w: &mut WireWriter) {
        for id in &self.hwc_ids {
            w.u32_field(1, *id);
        }
        if let Some(m) = &self.mode {
            w.msg_field(2, m);
        }
        if let Some(c) = &self.color {
            w.msg_field(3, c);
        }
        if let Some(x) = &self.extended {
            w.msg_field(4, x);
        }
        if let Some(t) = &self.text {
            w.msg_field(5, t);
        }
        if let Some(g) = &self.gfx {
            w.msg_field(6, g);
        }
        if let Some(p) = &self.processors {
            w.msg_field(7, p);
        }
        w.bool_field(8, self.publish_raw_adc_values);
        self.unknown.replay(w);
    }

    fn merge_field(&mut self, field: u32, value: FieldValue<'_>) -> Result<()> {
        match field {
            1 => self.hwc_ids.push(value.as_u32()?),
            2 => self.mode = Some(value.as_msg()?),
            3 => self.color = Some(value.as_msg()?),
            4 => self.extended = Some(value.as_msg()?),
            5 => self.text = Some(value.as_msg()?),
            6 => self.gfx = Some(value.as_msg()?),
            7 => self.processors = Some(value.as_msg()?),
            8 => self.publish_raw_adc_values = value.as_bool()?,
            _ => self.unknown.push(field, &value),
        }
        Ok(())
    }
}

/// Output mode for a component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HWCMode {
    /// One of the [`mode`] states; unknown states pass through raw.
    #[serde(rename = "State", default, skip_serializing_if = "is_zero_u32")]
    pub state: u32,

    /// Blink pattern selector, 0 = steady.
    #[serde(rename = "BlinkPattern", default, skip_serializing_if = "is_zero_u32")]
    pub blink_pattern: u32,

    /// Drive the component's dedicated output rather than its indicator.
    #[serde(rename = "Output", default, skip_serializing_if = "is_false")]
    pub output: bool,

    /// Auto-revert timeout in milliseconds, 0 = none.
    #[serde(rename = "TimeOut", default, skip_serializing_if = "is_zero_u32")]
    pub timeout_ms: u32,

    #[serde(skip)]
    pub unknown: UnknownFields,
}

impl HWCMode {
    /// Pack state, blink pattern and output flag into the single integer
    /// the ASCII dialect carries: state in bits 0-3, blink in bits 4-7,
    /// output in bit 8.
    pub fn packed(&self) -> u32 {
        (self.state & 0xf) | ((self.blink_pattern & 0xf) << 4) | (u32::from(self.output) << 8)
    }

    /// Inverse of [`HWCMode::packed`]. The timeout travels separately.
    pub fn from_packed(packed: u32, timeout_ms: u32) -> Self {
        Self {
            state: packed & 0xf,
            blink_pattern: (packed >> 4) & 0xf,
            output: packed & 0x100 != 0,
            timeout_ms,
            unknown: UnknownFields::default(),
        }
    }
}

impl Wire for HWCMode {
    fn encode(&self, w: &mut WireWriter) {
        w.u32_field(1, self.state);
        w.u32_field(2, self.blink_pattern);
        w.bool_field(3, self.output);
        w.u32_field(4, self.timeout_ms);
        self.unknown.replay(w);
    }

    fn merge_field(&mut self, field: u32, value: FieldValue<'_>) -> Result<()> {
        match field {
            1 => self.state = value.as_u32()?,
            2 => self.blink_pattern = value.as_u32()?,
            3 => self.output = value.as_bool()?,
            4 => self.timeout_ms = value.as_u32()?,
            _ => self.unknown.push(field, &value),
        }
        Ok(())
    }
}

/// Output color: a palette index or a full RGB triple.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HWCColor {
    /// Palette index (0-63).
    #[serde(rename = "ColorIndex", default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,

    /// Full RGB color. Takes precedence over the index when both are set.
    #[serde(rename = "ColorRGB", default, skip_serializing_if = "Option::is_none")]
    pub rgb: Option<ColorRGB>,

    #[serde(skip)]
    pub unknown: UnknownFields,
}

impl HWCColor {
    /// The single color byte of the ASCII dialect: `0x80 | index` for
    /// palette colors, `0xC0 | r:2 g:2 b:2` for RGB (quantized to two bits
    /// per channel).
    pub fn ascii_byte(&self) -> u32 {
        if let Some(rgb) = &self.rgb {
            0xC0 | ((rgb.red >> 6) & 0x3) << 4 | ((rgb.green >> 6) & 0x3) << 2 | ((rgb.blue >> 6) & 0x3)
        } else {
            0x80 | (self.index.unwrap_or(0) & 0x3f)
        }
    }

    /// Inverse of [`HWCColor::ascii_byte`]. Two-bit channels expand to
    /// 0/85/170/255.
    pub fn from_ascii_byte(byte: u32) -> Self {
        if byte & 0xC0 == 0xC0 {
            let expand = |v: u32| (v & 0x3) * 85;
            Self {
                index: None,
                rgb: Some(ColorRGB {
                    red: expand(byte >> 4),
                    green: expand(byte >> 2),
                    blue: expand(byte),
                    unknown: UnknownFields::default(),
                }),
                unknown: UnknownFields::default(),
            }
        } else {
            Self {
                index: Some(byte & 0x3f),
                rgb: None,
                unknown: UnknownFields::default(),
            }
        }
    }
}

impl Wire for HWCColor {
    fn encode(&self, w: &mut WireWriter) {
        if let Some(idx) = self.index {
            w.u32_field(1, idx + 1); // +1 keeps index 0 distinguishable from absent
        }
        if let Some(rgb) = &self.rgb {
            w.msg_field(2, rgb);
        }
        self.unknown.replay(w);
    }

    fn merge_field(&mut self, field: u32, value: FieldValue<'_>) -> Result<()> {
        match field {
            1 => self.index = value.as_u32()?.checked_sub(1),
            2 => self.rgb = Some(value.as_msg()?),
            _ => self.unknown.push(field, &value),
        }
        Ok(())
    }
}

/// 8-bit-per-channel RGB triple.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColorRGB {
    #[serde(rename = "Red", default, skip_serializing_if = "is_zero_u32")]
    pub red: u32,
    #[serde(rename = "Green", default, skip_serializing_if = "is_zero_u32")]
    pub green: u32,
    #[serde(rename = "Blue", default, skip_serializing_if = "is_zero_u32")]
    pub blue: u32,
    #[serde(skip)]
    pub unknown: UnknownFields,
}

impl Wire for ColorRGB {
    fn encode(&self, w: &mut WireWriter) {
        w.u32_field(1, self.red);
        w.u32_field(2, self.green);
        w.u32_field(3, self.blue);
        self.unknown.replay(w);
    }

    fn merge_field(&mut self, field: u32, value: FieldValue<'_>) -> Result<()> {
        match field {
            1 => self.red = value.as_u32()?,
            2 => self.green = value.as_u32()?,
            3 => self.blue = value.as_u32()?,
            _ => self.unknown.push(field, &value),
        }
        Ok(())
    }
}

/// Extended value: a 4-bit interpretation selector and a 12-bit value,
/// used for strength meters, position indicators and the like.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HWCExtended {
    #[serde(rename = "Interpretation", default, skip_serializing_if = "is_zero_u32")]
    pub interpretation: u32,
    #[serde(rename = "Value", default, skip_serializing_if = "is_zero_u32")]
    pub value: u32,
    #[serde(skip)]
    pub unknown: UnknownFields,
}

impl HWCExtended {
    /// The packed form of the ASCII dialect: interpretation in bits 12-15,
    /// value in bits 0-11.
    pub fn packed(&self) -> u32 {
        ((self.interpretation & 0xf) << 12) | (self.value & 0xfff)
    }

    /// Inverse of [`HWCExtended::packed`].
    pub fn from_packed(packed: u32) -> Self {
        Self {
            interpretation: (packed >> 12) & 0xf,
            value: packed & 0xfff,
            unknown: UnknownFields::default(),
        }
    }
}

impl Wire for HWCExtended {
    fn encode(&self, w: &mut WireWriter) {
        w.u32_field(1, self.interpretation);
        w.u32_field(2, self.value);
        self.unknown.replay(w);
    }

    fn merge_field(&mut self, field: u32, value: FieldValue<'_>) -> Result<()> {
        match field {
            1 => self.interpretation = value.as_u32()?,
            2 => self.value = value.as_u32()?,
            _ => self.unknown.push(field, &value),
        }
        Ok(())
    }
}

/// Display text contents for a component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HWCText {
    /// Primary value, rendered according to [`HWCText::formatting`].
    #[serde(rename = "IntegerValue", default, skip_serializing_if = "is_zero_i32")]
    pub integer_value: i32,

    /// One of the [`fmt`] codes (0-12); unknown codes pass through raw.
    #[serde(rename = "Formatting", default, skip_serializing_if = "is_zero_u32")]
    pub formatting: u32,

    /// Icon code overlaid next to the value, 0 = none.
    #[serde(rename = "ModifierIcon", default, skip_serializing_if = "is_zero_u32")]
    pub modifier_icon: u32,

    /// Header title.
    #[serde(rename = "Title", default, skip_serializing_if = "String::is_empty")]
    pub title: String,

    /// Secondary title, shown in pair layouts.
    #[serde(rename = "Title2", default, skip_serializing_if = "String::is_empty")]
    pub title2: String,

    /// Render the header bar solid (inverted) instead of as a separator.
    #[serde(rename = "SolidHeaderBar", default, skip_serializing_if = "is_false")]
    pub solid_header_bar: bool,

    /// First free-text line.
    #[serde(rename = "Textline1", default, skip_serializing_if = "String::is_empty")]
    pub textline1: String,

    /// Second free-text line.
    #[serde(rename = "Textline2", default, skip_serializing_if = "String::is_empty")]
    pub textline2: String,

    /// Secondary value, used in pair layouts.
    #[serde(rename = "IntegerValue2", default, skip_serializing_if = "is_zero_i32")]
    pub integer_value2: i32,

    /// Pair layout selector, 0 = single value.
    #[serde(rename = "PairMode", default, skip_serializing_if = "is_zero_u32")]
    pub pair_mode: u32,

    /// Scale indicator type drawn under the value, 0 = none.
    #[serde(rename = "ScaleType", default, skip_serializing_if = "is_zero_u32")]
    pub scale_type: u32,

    /// Scale lower bound.
    #[serde(rename = "RangeLow", default, skip_serializing_if = "is_zero_i32")]
    pub range_low: i32,

    /// Scale upper bound.
    #[serde(rename = "RangeHigh", default, skip_serializing_if = "is_zero_i32")]
    pub range_high: i32,

    /// Invert the whole display tile.
    #[serde(rename = "Inverted", default, skip_serializing_if = "is_false")]
    pub inverted: bool,

    /// Font selector, 0 = default.
    #[serde(rename = "Font", default, skip_serializing_if = "is_zero_u32")]
    pub font: u32,

    /// Font size selector, 0 = default.
    #[serde(rename = "FontSize", default, skip_serializing_if = "is_zero_u32")]
    pub font_size: u32,

    #[serde(skip)]
    pub unknown: UnknownFields,
}

impl HWCText {
    /// Render [`HWCText::integer_value`] the way the panel's display
    /// formatter would, for console inspection.
    pub fn rendered_value(&self) -> String {
        let v = self.integer_value;
        match self.formatting {
            fmt::INTEGER => format!("{v}"),
            fmt::FLOAT_1 => format!("{:.1}", f64::from(v) / 10.0),
            fmt::FLOAT_2 => format!("{:.2}", f64::from(v) / 100.0),
            fmt::FLOAT_3 => format!("{:.3}", f64::from(v) / 1000.0),
            fmt::FLOAT_AUTO => {
                let f = f64::from(v) / 1000.0;
                if f.abs() >= 100.0 {
                    format!("{f:.0}")
                } else if f.abs() >= 10.0 {
                    format!("{f:.1}")
                } else {
                    format!("{f:.2}")
                }
            }
            fmt::PERCENT => format!("{v}%"),
            fmt::DB => format!("{v}dB"),
            fmt::FRAMES => format!("{v}f"),
            fmt::RECIPROCAL => format!("1/{v}"),
            fmt::KELVIN => format!("{v}K"),
            fmt::HIDDEN => String::new(),
            fmt::TEXT_ONLY => self.textline1.clone(),
            _ => format!("{v}"),
        }
    }
}

impl Wire for HWCText {
    fn encode(&self, w: &mut WireWriter) {
        w.i32_field(1, self.integer_value);
        w.u32_field(2, self.formatting);
        w.u32_field(3, self.modifier_icon);
        w.str_field(4, &self.title);
        w.str_field(5, &self.title2);
        w.bool_field(6, self.solid_header_bar);
        w.str_field(7, &self.textline1);
        w.str_field(8, &self.textline2);
        w.i32_field(9, self.integer_value2);
        w.u32_field(10, self.pair_mode);
        w.u32_field(11, self.scale_type);
        w.i32_field(12, self.range_low);
        w.i32_field(13, self.range_high);
        w.bool_field(14, self.inverted);
        w.u32_field(15, self.font);
        w.u32_field(16, self.font_size);
        self.unknown.replay(w);
    }

    fn merge_field(&mut self, field: u32, value: FieldValue<'_>) -> Result<()> {
        match field {
            1 => self.integer_value = value.as_i32()?,
            2 => self.formatting = value.as_u32()?,
            3 => self.modifier_icon = value.as_u32()?,
            4 => self.title = value.as_str()?.to_string(),
            5 => self.title2 = value.as_str()?.to_string(),
            6 => self.solid_header_bar = value.as_bool()?,
            7 => self.textline1 = value.as_str()?.to_string(),
            8 => self.textline2 = value.as_str()?.to_string(),
            9 => self.integer_value2 = value.as_i32()?,
            10 => self.pair_mode = value.as_u32()?,
            11 => self.scale_type = value.as_u32()?,
            12 => self.range_low = value.as_i32()?,
            13 => self.range_high = value.as_i32()?,
            14 => self.inverted = value.as_bool()?,
            15 => self.font = value.as_u32()?,
            16 => self.font_size = value.as_u32()?,
            _ => self.unknown.push(field, &value),
        }
        Ok(())
    }
}

/// Pixel encodings for [`HWCGfx`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageType {
    /// 1 bit per pixel, MSB first within each byte.
    Mono,
    /// 4 bits per pixel grayscale, left pixel in the high nibble.
    Gray4,
    /// 16 bits per pixel RGB565, big-endian.
    Rgb16,
    /// Encoding unknown to this implementation, raw value preserved.
    Other(u32),
}

impl Default for ImageType {
    fn default() -> Self {
        ImageType::Mono
    }
}

impl ImageType {
    /// Raw protocol value.
    pub fn raw(self) -> u32 {
        match self {
            ImageType::Mono => 0,
            ImageType::Gray4 => 1,
            ImageType::Rgb16 => 2,
            ImageType::Other(v) => v,
        }
    }

    /// From the raw protocol value, preserving unknown codes.
    pub fn from_raw(v: u32) -> Self {
        match v {
            0 => ImageType::Mono,
            1 => ImageType::Gray4,
            2 => ImageType::Rgb16,
            other => ImageType::Other(other),
        }
    }

    /// Bits per pixel, when the encoding is known.
    pub fn bits_per_pixel(self) -> Option<u32> {
        match self {
            ImageType::Mono => Some(1),
            ImageType::Gray4 => Some(4),
            ImageType::Rgb16 => Some(16),
            ImageType::Other(_) => None,
        }
    }
}

impl Serialize for ImageType {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u32(self.raw())
    }
}

impl<'de> Deserialize<'de> for ImageType {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        Ok(ImageType::from_raw(u32::deserialize(d)?))
    }
}

mod b64 {
    //! Base64 (de)serialization for raw pixel buffers, matching the JSON
    //! form the original tools produce for byte fields.

    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(d)?;
        STANDARD
            .decode(text.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Raw graphics contents for a display component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HWCGfx {
    /// Image width in pixels.
    #[serde(rename = "W", default, skip_serializing_if = "is_zero_u32")]
    pub w: u32,

    /// Image height in pixels.
    #[serde(rename = "H", default, skip_serializing_if = "is_zero_u32")]
    pub h: u32,

    /// Pixel encoding.
    #[serde(rename = "ImageType", default)]
    pub image_type: ImageType,

    /// Packed pixel buffer, `W * H * bpp / 8` bytes.
    #[serde(rename = "ImageData", default, with = "b64")]
    pub image_data: Vec<u8>,

    #[serde(skip)]
    pub unknown: UnknownFields,
}

impl HWCGfx {
    /// The buffer length the declared dimensions and encoding demand, when
    /// the encoding is known. Rows are bit-packed without padding.
    pub fn expected_len(&self) -> Option<usize> {
        let bpp = self.image_type.bits_per_pixel()?;
        Some(((self.w as usize) * (self.h as usize) * (bpp as usize)).div_ceil(8))
    }

    /// Whether the pixel buffer length matches the declared dimensions.
    /// Unknown encodings are accepted as-is.
    pub fn len_matches(&self) -> bool {
        match self.expected_len() {
            Some(expected) => self.image_data.len() == expected,
            None => true,
        }
    }
}

impl Wire for HWCGfx {
    fn encode(&self, w: &mut WireWriter) {
        w.u32_field(1, self.w);
        w.u32_field(2, self.h);
        w.u32_field(3, self.image_type.raw());
        w.bytes_field(4, &self.image_data);
        self.unknown.replay(w);
    }

    fn merge_field(&mut self, field: u32, value: FieldValue<'_>) -> Result<()> {
        match field {
            1 => self.w = value.as_u32()?,
            2 => self.h = value.as_u32()?,
            3 => self.image_type = ImageType::from_raw(value.as_u32()?),
            4 => self.image_data = value.as_bytes()?.to_vec(),
            _ => self.unknown.push(field, &value),
        }
        Ok(())
    }
}

/// Processor requests destined for the external graphics processors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Processors {
    /// Image conversion/scaling request.
    #[serde(rename = "GfxConv", default, skip_serializing_if = "Option::is_none")]
    pub gfx_conv: Option<ProcGfxConv>,

    /// Unicode text rendering request.
    #[serde(rename = "UniText", default, skip_serializing_if = "Option::is_none")]
    pub uni_text: Option<ProcUniText>,

    #[serde(skip)]
    pub unknown: UnknownFields,
}

impl Wire for Processors {
    fn encode(&self, w: &mut WireWriter) {
        if let Some(g) = &self.gfx_conv {
            w.msg_field(1, g);
        }
        if let Some(t) = &self.uni_text {
            w.msg_field(2, t);
        }
        self.unknown.replay(w);
    }

    fn merge_field(&mut self, field: u32, value: FieldValue<'_>) -> Result<()> {
        match field {
            1 => self.gfx_conv = Some(value.as_msg()?),
            2 => self.uni_text = Some(value.as_msg()?),
            _ => self.unknown.push(field, &value),
        }
        Ok(())
    }
}

/// Image conversion request: scale the attached image to `w` x `h` in the
/// given encoding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcGfxConv {
    #[serde(rename = "W", default, skip_serializing_if = "is_zero_u32")]
    pub w: u32,
    #[serde(rename = "H", default, skip_serializing_if = "is_zero_u32")]
    pub h: u32,
    #[serde(rename = "ImageType", default)]
    pub image_type: ImageType,
    /// Scaling strategy selector (fit, fill, stretch).
    #[serde(rename = "Scaling", default, skip_serializing_if = "is_zero_u32")]
    pub scaling: u32,
    #[serde(skip)]
    pub unknown: UnknownFields,
}

impl Wire for ProcGfxConv {
    fn encode(&self, w: &mut WireWriter) {
        w.u32_field(1, self.w);
        w.u32_field(2, self.h);
        w.u32_field(3, self.image_type.raw());
        w.u32_field(4, self.scaling);
        self.unknown.replay(w);
    }

    fn merge_field(&mut self, field: u32, value: FieldValue<'_>) -> Result<()> {
        match field {
            1 => self.w = value.as_u32()?,
            2 => self.h = value.as_u32()?,
            3 => self.image_type = ImageType::from_raw(value.as_u32()?),
            4 => self.scaling = value.as_u32()?,
            _ => self.unknown.push(field, &value),
        }
        Ok(())
    }
}

/// Unicode text rendering request for panels without native glyph support.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcUniText {
    #[serde(rename = "Text", default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(rename = "Title", default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(skip)]
    pub unknown: UnknownFields,
}

impl Wire for ProcUniText {
    fn encode(&self, w: &mut WireWriter) {
        w.str_field(1, &self.text);
        w.str_field(2, &self.title);
        self.unknown.replay(w);
    }

    fn merge_field(&mut self, field: u32, value: FieldValue<'_>) -> Result<()> {
        match field {
            1 => self.text = value.as_str()?.to_string(),
            2 => self.title = value.as_str()?.to_string(),
            _ => self.unknown.push(field, &value),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_packing_round_trip() {
        let m = HWCMode {
            state: mode::ON,
            blink_pattern: 3,
            output: true,
            timeout_ms: 0,
            unknown: UnknownFields::default(),
        };
        assert_eq!(HWCMode::from_packed(m.packed(), 0), m);
    }

    #[test]
    fn test_color_index_byte() {
        let c = HWCColor {
            index: Some(5),
            rgb: None,
            unknown: UnknownFields::default(),
        };
        assert_eq!(c.ascii_byte(), 0x85);
        assert_eq!(HWCColor::from_ascii_byte(0x85), c);
    }

    #[test]
    fn test_color_rgb_byte_quantizes() {
        let c = HWCColor {
            index: None,
            rgb: Some(ColorRGB {
                red: 255,
                green: 0,
                blue: 170,
                unknown: UnknownFields::default(),
            }),
            unknown: UnknownFields::default(),
        };
        let byte = c.ascii_byte();
        assert_eq!(byte & 0xC0, 0xC0);
        let back = HWCColor::from_ascii_byte(byte);
        let rgb = back.rgb.unwrap();
        assert_eq!((rgb.red, rgb.green, rgb.blue), (255, 0, 170));
    }

    #[test]
    fn test_color_index_zero_survives_wire() {
        let c = HWCColor {
            index: Some(0),
            rgb: None,
            unknown: UnknownFields::default(),
        };
        let back = HWCColor::decode(&c.encode_to_vec()).unwrap();
        assert_eq!(back.index, Some(0));
    }

    #[test]
    fn test_extended_packing_round_trip() {
        let x = HWCExtended {
            interpretation: 5,
            value: 0xabc,
            unknown: UnknownFields::default(),
        };
        assert_eq!(HWCExtended::from_packed(x.packed()), x);
    }

    #[test]
    fn test_gfx_expected_len() {
        let gfx = HWCGfx {
            w: 64,
            h: 32,
            image_type: ImageType::Mono,
            image_data: vec![0; 256],
            unknown: UnknownFields::default(),
        };
        assert_eq!(gfx.expected_len(), Some(256));
        assert!(gfx.len_matches());

        let rgb = HWCGfx {
            w: 64,
            h: 32,
            image_type: ImageType::Rgb16,
            image_data: vec![],
            unknown: UnknownFields::default(),
        };
        assert_eq!(rgb.expected_len(), Some(64 * 32 * 2));
        assert!(!rgb.len_matches());
    }

    #[test]
    fn test_state_wire_round_trip() {
        let state = HWCState {
            hwc_ids: vec![3, 4],
            mode: Some(HWCMode {
                state: mode::DIMMED,
                ..Default::default()
            }),
            text: Some(HWCText {
                integer_value: -250,
                formatting: fmt::FLOAT_2,
                title: "Gain".into(),
                solid_header_bar: true,
                ..Default::default()
            }),
            ..Default::default()
        };
        let back = HWCState::decode(&state.encode_to_vec()).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn test_state_json_shape() {
        let state = HWCState {
            hwc_ids: vec![9],
            extended: Some(HWCExtended {
                interpretation: 2,
                value: 500,
                unknown: UnknownFields::default(),
            }),
            ..Default::default()
        };
        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"HWCIDs\":[9]"));
        assert!(json.contains("\"HWCExtended\""));
        assert!(!json.contains("HWCText"));

        let back: HWCState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn test_rendered_value_formats() {
        let mut t = HWCText {
            integer_value: 1234,
            ..Default::default()
        };
        assert_eq!(t.rendered_value(), "1234");
        t.formatting = fmt::FLOAT_2;
        assert_eq!(t.rendered_value(), "12.34");
        t.formatting = fmt::PERCENT;
        assert_eq!(t.rendered_value(), "1234%");
        t.formatting = fmt::RECIPROCAL;
        assert_eq!(t.rendered_value(), "1/1234");
        t.formatting = fmt::HIDDEN;
        assert_eq!(t.rendered_value(), "");
    }
}
