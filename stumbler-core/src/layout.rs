//! Beacon layout grammar.
//!
//! A layout is a comma-separated list of terms describing where, relative to
//! the start of a PDU payload, a beacon format keeps each of its fields:
//!
//! - `i:<start>-<end>[b|l|v]*`  identifier (`l` little-endian, `v` variable length)
//! - `d:<start>-<end>[b|l]*`    data field
//! - `m:<start>-<end>=<hex>`    type code (required)
//! - `s:<start>-<end>=<hex>`    service UUID (dashes allowed)
//! - `p:<start>-<end>[:<int>]`  transmit power with optional correction
//!
//! Offsets are inclusive. Terms with any other prefix are ignored so layouts
//! written for richer parsers still load.

use std::fmt;
use std::str::FromStr;

use tracing::debug;

use crate::types::{hex_decode, Result, StumblerError};

/// Apple iBeacon (manufacturer data, company 0x004C).
pub const IBEACON_LAYOUT: &str = "m:2-3=0215,i:4-19,i:20-21,i:22-23,p:24-24";

/// AltBeacon (manufacturer data, any company id).
pub const ALTBEACON_LAYOUT: &str = "m:2-3=beac,i:4-19,i:20-21,i:22-23,p:24-24,d:25-25";

/// Eddystone-UID (service data, UUID 0xFEAA, frame 0x00).
pub const EDDYSTONE_UID_LAYOUT: &str = "s:0-1=feaa,m:2-2=00,p:3-3:-41,i:4-13,i:14-19";

/// Eddystone-URL (service data, frame 0x10). The encoded URL is variable length.
pub const EDDYSTONE_URL_LAYOUT: &str = "s:0-1=feaa,m:2-2=10,p:3-3:-41,i:4-21v";

/// Eddystone-TLM (service data, frame 0x20). Telemetry only, no identifiers.
pub const EDDYSTONE_TLM_LAYOUT: &str = "s:0-1=feaa,m:2-2=20,d:3-3,d:4-5,d:6-7,d:8-11,d:12-15";

/// Largest offset a term may name. Advertisements, extended region included,
/// never come close.
pub const MAX_OFFSET: usize = 255;

/// Layouts used when the configuration does not list any.
pub const DEFAULT_LAYOUTS: &[&str] = &[
    IBEACON_LAYOUT,
    ALTBEACON_LAYOUT,
    EDDYSTONE_UID_LAYOUT,
    EDDYSTONE_URL_LAYOUT,
    EDDYSTONE_TLM_LAYOUT,
];

// ---------------------------------------------------------------------------
// Segments
// ---------------------------------------------------------------------------

/// Identifier or data-field byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub start_offset: usize,
    pub end_offset: usize,
    pub little_endian: bool,
    /// Identifier may stop early at the end of the PDU.
    pub variable_length: bool,
}

impl Segment {
    pub fn byte_len(&self) -> usize {
        self.end_offset.saturating_sub(self.start_offset).saturating_add(1)
    }
}

/// Fixed bytes identifying the beacon format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeCode {
    pub start_offset: usize,
    pub end_offset: usize,
    pub value: u64,
}

impl TypeCode {
    pub fn byte_len(&self) -> usize {
        self.end_offset.saturating_sub(self.start_offset).saturating_add(1)
    }

    /// Big-endian encoding of the value, sized to the segment.
    pub fn bytes(&self) -> Vec<u8> {
        sized_be_bytes(self.value, self.byte_len())
    }
}

/// Service UUID as written in the layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceUuid {
    /// 16- or 32-bit assigned number.
    Short(u64),
    /// Full 128-bit UUID, already in over-the-air (reversed) byte order.
    Long([u8; 16]),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceUuidSegment {
    pub start_offset: usize,
    pub end_offset: usize,
    pub uuid: ServiceUuid,
}

impl ServiceUuidSegment {
    pub fn byte_len(&self) -> usize {
        self.end_offset.saturating_sub(self.start_offset).saturating_add(1)
    }

    /// Bytes expected in the advertisement at the segment offset.
    pub fn bytes(&self) -> Vec<u8> {
        match self.uuid {
            ServiceUuid::Long(bytes) => bytes.to_vec(),
            ServiceUuid::Short(value) => {
                let mut bytes = sized_be_bytes(value, self.byte_len());
                bytes.reverse();
                bytes
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerSegment {
    pub start_offset: usize,
    pub end_offset: usize,
    pub correction: Option<i32>,
}

/// Big-endian bytes of `value`, left-padded or truncated to `len`.
fn sized_be_bytes(value: u64, len: usize) -> Vec<u8> {
    let be = value.to_be_bytes();
    if len >= be.len() {
        let mut out = vec![0u8; len - be.len()];
        out.extend_from_slice(&be);
        out
    } else {
        be[be.len() - len..].to_vec()
    }
}

// ---------------------------------------------------------------------------
// BeaconLayout
// ---------------------------------------------------------------------------

/// Parsed beacon layout. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconLayout {
    pub identifiers: Vec<Segment>,
    pub data_fields: Vec<Segment>,
    pub type_code: TypeCode,
    pub service_uuid: Option<ServiceUuidSegment>,
    pub power: Option<PowerSegment>,
    /// Zero-pad advertisements shorter than the layout before extraction.
    pub allow_pdu_overflow: bool,
    layout_size: usize,
    text: String,
}

impl BeaconLayout {
    /// Parse a layout string. Fails when the type code is missing or a
    /// recognized term is malformed.
    pub fn parse(text: &str) -> Result<Self> {
        let invalid = |reason: String| StumblerError::InvalidLayout {
            layout: text.to_string(),
            reason,
        };

        let mut identifiers = Vec::new();
        let mut data_fields = Vec::new();
        let mut type_code: Option<TypeCode> = None;
        let mut service_uuid = None;
        let mut power = None;

        for term in text.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            match parse_term(term).map_err(invalid)? {
                Some(Term::Identifier(seg)) => identifiers.push(seg),
                Some(Term::Data(seg)) => data_fields.push(seg),
                Some(Term::TypeCode(tc)) => {
                    if type_code.is_none() {
                        type_code = Some(tc);
                    }
                }
                Some(Term::ServiceUuid(seg)) => service_uuid = Some(seg),
                Some(Term::Power(seg)) => power = Some(seg),
                None => debug!(term, "ignoring unrecognized layout term"),
            }
        }

        let type_code = type_code.ok_or_else(|| invalid("missing type code (m:) term".into()))?;

        let max_end = identifiers
            .iter()
            .chain(data_fields.iter())
            .map(|s| s.end_offset)
            .chain(std::iter::once(type_code.end_offset))
            .chain(service_uuid.iter().map(|s: &ServiceUuidSegment| s.end_offset))
            .chain(power.iter().map(|p: &PowerSegment| p.end_offset))
            .max()
            .unwrap_or(type_code.end_offset);

        Ok(BeaconLayout {
            identifiers,
            data_fields,
            type_code,
            service_uuid,
            power,
            allow_pdu_overflow: true,
            layout_size: max_end + 1,
            text: text.to_string(),
        })
    }

    /// Maximum end offset across all segments, plus one.
    pub fn layout_size(&self) -> usize {
        self.layout_size
    }

    /// The layout text this was parsed from.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn with_pdu_overflow(mut self, allow: bool) -> Self {
        self.allow_pdu_overflow = allow;
        self
    }
}

impl FromStr for BeaconLayout {
    type Err = StumblerError;

    fn from_str(s: &str) -> Result<Self> {
        BeaconLayout::parse(s)
    }
}

impl fmt::Display for BeaconLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Parse a list of layout strings, failing on the first invalid one.
pub fn parse_layouts<S: AsRef<str>>(texts: &[S]) -> Result<Vec<BeaconLayout>> {
    texts.iter().map(|t| BeaconLayout::parse(t.as_ref())).collect()
}

/// The built-in layouts in [`DEFAULT_LAYOUTS`].
pub fn default_layouts() -> Vec<BeaconLayout> {
    DEFAULT_LAYOUTS
        .iter()
        .filter_map(|t| BeaconLayout::parse(t).ok())
        .collect()
}

// ---------------------------------------------------------------------------
// Term grammar
// ---------------------------------------------------------------------------

enum Term {
    Identifier(Segment),
    Data(Segment),
    TypeCode(TypeCode),
    ServiceUuid(ServiceUuidSegment),
    Power(PowerSegment),
}

/// Match one term against the five patterns. `Ok(None)` for unknown terms.
fn parse_term(term: &str) -> std::result::Result<Option<Term>, String> {
    let Some((kind, body)) = term.split_once(':') else {
        return Ok(None);
    };

    let term = match kind {
        "i" => {
            let (range, flags) = split_flags(body);
            let (start, end) = parse_range(range, term)?;
            let flags = parse_flags(flags, "blv", term)?;
            Term::Identifier(Segment {
                start_offset: start,
                end_offset: end,
                little_endian: flags.contains('l'),
                variable_length: flags.contains('v'),
            })
        }
        "d" => {
            let (range, flags) = split_flags(body);
            let (start, end) = parse_range(range, term)?;
            let flags = parse_flags(flags, "bl", term)?;
            Term::Data(Segment {
                start_offset: start,
                end_offset: end,
                little_endian: flags.contains('l'),
                variable_length: false,
            })
        }
        "m" => {
            let (range, hex) = body
                .split_once('=')
                .ok_or_else(|| format!("type code term {term:?} has no value"))?;
            let (start, end) = parse_range(range, term)?;
            let value = parse_hex_u64(hex, term)?;
            Term::TypeCode(TypeCode {
                start_offset: start,
                end_offset: end,
                value,
            })
        }
        "s" => {
            let (range, hex) = body
                .split_once('=')
                .ok_or_else(|| format!("service UUID term {term:?} has no value"))?;
            let (start, end) = parse_range(range, term)?;
            let stripped: String = hex.chars().filter(|c| *c != '-').collect();
            let uuid = if end - start + 1 == 16 {
                let bytes = hex_decode(&stripped)
                    .filter(|b| b.len() == 16)
                    .ok_or_else(|| format!("service UUID in {term:?} is not 128 bits"))?;
                let mut long = [0u8; 16];
                for (dst, src) in long.iter_mut().zip(bytes.iter().rev()) {
                    *dst = *src;
                }
                ServiceUuid::Long(long)
            } else {
                ServiceUuid::Short(parse_hex_u64(&stripped, term)?)
            };
            Term::ServiceUuid(ServiceUuidSegment {
                start_offset: start,
                end_offset: end,
                uuid,
            })
        }
        "p" => {
            let (range, correction) = match body.split_once(':') {
                Some((range, c)) => {
                    let c = c
                        .parse::<i32>()
                        .map_err(|_| format!("bad power correction in {term:?}"))?;
                    (range, Some(c))
                }
                None => (body, None),
            };
            let (start, end) = parse_range(range, term)?;
            Term::Power(PowerSegment {
                start_offset: start,
                end_offset: end,
                correction,
            })
        }
        _ => return Ok(None),
    };
    Ok(Some(term))
}

/// Split `"4-19lv"` into `("4-19", "lv")`.
fn split_flags(body: &str) -> (&str, &str) {
    let idx = body
        .find(|c: char| !(c.is_ascii_digit() || c == '-'))
        .unwrap_or(body.len());
    body.split_at(idx)
}

fn parse_range(range: &str, term: &str) -> std::result::Result<(usize, usize), String> {
    let (start, end) = range
        .split_once('-')
        .ok_or_else(|| format!("expected <start>-<end> in {term:?}"))?;
    let start: usize = start
        .parse()
        .map_err(|_| format!("bad start offset in {term:?}"))?;
    let end: usize = end
        .parse()
        .map_err(|_| format!("bad end offset in {term:?}"))?;
    if end < start {
        return Err(format!("end offset before start offset in {term:?}"));
    }
    if end > MAX_OFFSET {
        return Err(format!("offset beyond {MAX_OFFSET} in {term:?}"));
    }
    Ok((start, end))
}

fn parse_flags<'a>(
    flags: &'a str,
    allowed: &str,
    term: &str,
) -> std::result::Result<&'a str, String> {
    match flags.chars().find(|c| !allowed.contains(*c)) {
        Some(c) => Err(format!("unknown flag {c:?} in {term:?}")),
        None => Ok(flags),
    }
}

fn parse_hex_u64(hex: &str, term: &str) -> std::result::Result<u64, String> {
    if hex.is_empty() {
        return Err(format!("empty hex value in {term:?}"));
    }
    u64::from_str_radix(hex, 16).map_err(|_| format!("bad hex value in {term:?}"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
