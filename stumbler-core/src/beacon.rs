//! Decode BLE advertisements against beacon layouts.
//!
//! Candidate PDUs are manufacturer data (any length) and service data whose
//! UUID framing length equals the layout's service-UUID segment. The first
//! candidate whose fixed bytes match the layout wins. Not finding a beacon is
//! the common case for real scan data and yields `None`, never an error.

use std::borrow::Cow;

use serde::Serialize;
use tracing::trace;

use crate::identifier::{bytes_to_identifier, Identifier};
use crate::layout::{BeaconLayout, Segment};
use crate::pdu::{split_pdus, Pdu};

/// A beacon recognized by a layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BeaconData {
    /// Type code value of the matching layout.
    pub beacon_type: u64,
    pub identifiers: Vec<Identifier>,
    pub data_fields: Vec<u64>,
}

/// Decode `bytes` with a single layout.
pub fn decode(layout: &BeaconLayout, bytes: &[u8]) -> Option<BeaconData> {
    let type_code = layout.type_code.bytes();
    let service_uuid = layout.service_uuid.map(|s| s.bytes());
    let service_len = layout.service_uuid.map(|s| s.byte_len());

    let pdu = split_pdus(bytes)
        .into_iter()
        .filter(|pdu| is_candidate(pdu, service_len))
        .find(|pdu| pdu_matches(layout, bytes, pdu, &type_code, service_uuid.as_deref()))?;

    trace!(
        layout = layout.as_str(),
        ad_type = pdu.ad_type,
        start = pdu.start_index,
        "beacon layout matched"
    );
    Some(extract(layout, bytes, &pdu))
}

/// Try each layout in order; return the first match and the layout it used.
pub fn decode_first<'a>(
    layouts: &'a [BeaconLayout],
    bytes: &[u8],
) -> Option<(&'a BeaconLayout, BeaconData)> {
    layouts
        .iter()
        .find_map(|layout| decode(layout, bytes).map(|data| (layout, data)))
}

fn is_candidate(pdu: &Pdu, service_len: Option<usize>) -> bool {
    if pdu.is_manufacturer_data() {
        return true;
    }
    service_len.is_some() && pdu.service_uuid_length() == service_len
}

fn pdu_matches(
    layout: &BeaconLayout,
    bytes: &[u8],
    pdu: &Pdu,
    type_code: &[u8],
    service_uuid: Option<&[u8]>,
) -> bool {
    match (layout.service_uuid, service_uuid) {
        (Some(segment), Some(uuid)) => {
            let framing_ok = pdu.is_manufacturer_data()
                || pdu.service_uuid_length() == Some(segment.byte_len());
            // Framed formats carry the type code at the tail of the type-code
            // segment, so it is read from the end offset here.
            let uuid_at = pdu.start_index.checked_add(segment.start_offset);
            let type_code_at = pdu.start_index.checked_add(layout.type_code.end_offset);
            framing_ok
                && bytes_at(bytes, uuid_at, uuid)
                && bytes_at(bytes, type_code_at, type_code)
        }
        _ => {
            let type_code_at = pdu.start_index.checked_add(layout.type_code.start_offset);
            bytes_at(bytes, type_code_at, type_code)
        }
    }
}

/// True if `expected` appears at `offset` in `bytes`. Out of range, or an
/// offset that overflowed, is a mismatch.
fn bytes_at(bytes: &[u8], offset: Option<usize>, expected: &[u8]) -> bool {
    offset
        .and_then(|start| start.checked_add(expected.len()).map(|end| start..end))
        .and_then(|range| bytes.get(range))
        .is_some_and(|window| window == expected)
}

fn extract(layout: &BeaconLayout, bytes: &[u8], pdu: &Pdu) -> BeaconData {
    let required = pdu.start_index.saturating_add(layout.layout_size());
    let buf: Cow<'_, [u8]> = if layout.allow_pdu_overflow && bytes.len() < required {
        let mut padded = bytes.to_vec();
        padded.resize(required, 0);
        Cow::Owned(padded)
    } else {
        Cow::Borrowed(bytes)
    };

    let mut identifiers = Vec::with_capacity(layout.identifiers.len());
    for segment in &layout.identifiers {
        let Some((start, end)) = identifier_range(segment, pdu) else {
            continue;
        };
        match buf.get(start..=end) {
            Some(raw) => identifiers.push(bytes_to_identifier(raw, segment.little_endian)),
            None => trace!(start, end, "identifier outside advertisement, skipped"),
        }
    }

    let data_fields = layout
        .data_fields
        .iter()
        .map(|segment| {
            absolute_range(segment, pdu)
                .and_then(|(start, end)| buf.get(start..=end))
                .map(|raw| unsigned_value(raw, segment.little_endian))
                .unwrap_or(0)
        })
        .collect();

    BeaconData {
        beacon_type: layout.type_code.value,
        identifiers,
        data_fields,
    }
}

/// Segment offsets shifted to the PDU start. `None` on overflow.
fn absolute_range(segment: &Segment, pdu: &Pdu) -> Option<(usize, usize)> {
    Some((
        pdu.start_index.checked_add(segment.start_offset)?,
        pdu.start_index.checked_add(segment.end_offset)?,
    ))
}

/// Absolute byte range of an identifier. Variable-length identifiers stop at
/// the PDU end; `None` when that leaves nothing.
fn identifier_range(segment: &Segment, pdu: &Pdu) -> Option<(usize, usize)> {
    let (start, end) = absolute_range(segment, pdu)?;
    if segment.variable_length && end > pdu.end_index {
        if pdu.end_index < start {
            return None;
        }
        return Some((start, pdu.end_index));
    }
    Some((start, end))
}

fn unsigned_value(raw: &[u8], little_endian: bool) -> u64 {
    let fold = |acc: u64, b: &u8| (acc << 8) | *b as u64;
    if little_endian {
        raw.iter().rev().fold(0, fold)
    } else {
        raw.iter().fold(0, fold)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::*;
    use uuid::Uuid;

    const KNOWN_UUID: [u8; 16] = [
        0x2F, 0x23, 0x44, 0x54, 0xCF, 0x6D, 0x4A, 0x0F, 0xAD, 0xF2, 0xF4, 0x91, 0x1B, 0xA9, 0xFF,
        0xA6,
    ];

    fn altbeacon_bytes(major: u16, minor: u16) -> Vec<u8> {
        let mut bytes = vec![0x1B, 0xFF, 0x18, 0x01, 0xBE, 0xAC];
        bytes.extend_from_slice(&KNOWN_UUID);
        bytes.extend_from_slice(&major.to_be_bytes());
        bytes.extend_from_slice(&minor.to_be_bytes());
        bytes.push(0xC5); // power
        bytes.push(0x7A); // reserved
        bytes
    }

    fn ibeacon_bytes(major: u16, minor: u16) -> Vec<u8> {
        let mut bytes = vec![0x02, 0x01, 0x06, 0x1A, 0xFF, 0x4C, 0x00, 0x02, 0x15];
        bytes.extend_from_slice(&KNOWN_UUID);
        bytes.extend_from_slice(&major.to_be_bytes());
        bytes.extend_from_slice(&minor.to_be_bytes());
        bytes.push(0xC3);
        bytes
    }

    fn layout(text: &str) -> BeaconLayout {
        BeaconLayout::parse(text).unwrap()
    }

    #[test]
    fn test_altbeacon_roundtrip() {
        let data = decode(&layout(ALTBEACON_LAYOUT), &altbeacon_bytes(1, 2)).unwrap();
        assert_eq!(data.beacon_type, 0xBEAC);
        assert_eq!(
            data.identifiers,
            vec![
                Identifier::Uuid(Uuid::from_bytes(KNOWN_UUID)),
                Identifier::Int(1),
                Identifier::Int(2),
            ]
        );
        assert_eq!(data.data_fields, vec![0x7A]);
    }

    #[test]
    fn test_ibeacon_after_flags_pdu() {
        let data = decode(&layout(IBEACON_LAYOUT), &ibeacon_bytes(300, 65535)).unwrap();
        assert_eq!(data.beacon_type, 0x0215);
        assert_eq!(data.identifiers[1], Identifier::Int(300));
        assert_eq!(data.identifiers[2], Identifier::Int(65535));
        assert!(data.data_fields.is_empty());
    }

    #[test]
    fn test_wrong_layout_is_none() {
        assert!(decode(&layout(ALTBEACON_LAYOUT), &ibeacon_bytes(1, 1)).is_none());
        assert!(decode(&layout(IBEACON_LAYOUT), &altbeacon_bytes(1, 1)).is_none());
    }

    #[test]
    fn test_decode_first_picks_matching_layout() {
        let layouts = default_layouts();
        let (matched, data) = decode_first(&layouts, &ibeacon_bytes(7, 8)).unwrap();
        assert_eq!(matched.as_str(), IBEACON_LAYOUT);
        assert_eq!(data.identifiers[1], Identifier::Int(7));

        assert!(decode_first(&layouts, &[0x02, 0x01, 0x06]).is_none());
    }

    #[test]
    fn test_eddystone_uid() {
        let mut bytes = vec![0x03, 0x03, 0xAA, 0xFE, 0x17, 0x16, 0xAA, 0xFE, 0x00, 0xE7];
        bytes.extend_from_slice(&[0x8B, 0x0C, 0xA7, 0x50, 0x09, 0x54, 0x77, 0xCB, 0x3E, 0x77]);
        bytes.extend_from_slice(&[0x00, 0x00, 0x00, 0x00, 0x00, 0x01]);
        bytes.extend_from_slice(&[0x00, 0x00]);

        let data = decode(&layout(EDDYSTONE_UID_LAYOUT), &bytes).unwrap();
        assert_eq!(data.beacon_type, 0x00);
        assert_eq!(
            data.identifiers,
            vec![
                Identifier::Hex("0x8b0ca750095477cb3e77".into()),
                Identifier::Hex("0x000000000001".into()),
            ]
        );
    }

    #[test]
    fn test_eddystone_tlm_data_fields() {
        let bytes = vec![
            0x11, 0x16, 0xAA, 0xFE, 0x20, 0x00, 0x0B, 0xB8, 0x17, 0x80, 0x00, 0x00, 0x01, 0x00,
            0x00, 0x00, 0x00, 0x64,
        ];
        let data = decode(&layout(EDDYSTONE_TLM_LAYOUT), &bytes).unwrap();
        assert!(data.identifiers.is_empty());
        assert_eq!(data.data_fields, vec![0, 3000, 0x1780, 256, 100]);
    }

    #[test]
    fn test_little_endian_data_field() {
        let bytes = vec![0x06, 0xFF, 0x01, 0x02, 0x34, 0x12, 0x00];
        let data = decode(&layout("m:0-1=0102,d:2-3l,d:2-3"), &bytes).unwrap();
        assert_eq!(data.data_fields, vec![0x1234, 0x3412]);
    }

    #[test]
    fn test_variable_length_identifier_truncated_to_pdu() {
        // URL frame with a 6-byte encoded URL.
        let bytes = vec![
            0x0B, 0x16, 0xAA, 0xFE, 0x10, 0xEB, 0x03, 0x67, 0x6F, 0x6F, 0x2E, 0x67,
        ];
        let data = decode(&layout(EDDYSTONE_URL_LAYOUT), &bytes).unwrap();
        assert_eq!(data.identifiers, vec![Identifier::Hex("0x03676f6f2e67".into())]);
    }

    #[test]
    fn test_zero_length_variable_identifier_skipped() {
        let bytes = vec![0x05, 0x16, 0xAA, 0xFE, 0x10, 0xEB];
        let data = decode(&layout(EDDYSTONE_URL_LAYOUT), &bytes).unwrap();
        assert!(data.identifiers.is_empty());
    }

    #[test]
    fn test_short_advertisement_zero_padded() {
        // Minor, power and reserved byte missing.
        let mut bytes = altbeacon_bytes(9, 9);
        bytes.truncate(bytes.len() - 4);
        let data = decode(&layout(ALTBEACON_LAYOUT), &bytes).unwrap();
        assert_eq!(data.identifiers.len(), 3);
        assert_eq!(data.identifiers[1], Identifier::Int(9));
        assert_eq!(data.identifiers[2], Identifier::Int(0));
        assert_eq!(data.data_fields, vec![0]);
    }

    #[test]
    fn test_no_overflow_policy_skips_missing_fields() {
        let mut bytes = altbeacon_bytes(9, 9);
        bytes.truncate(bytes.len() - 4);
        let strict = layout(ALTBEACON_LAYOUT).with_pdu_overflow(false);
        let data = decode(&strict, &bytes).unwrap();
        assert_eq!(data.identifiers.len(), 2);
        assert_eq!(data.data_fields, vec![0]);
    }

    #[test]
    fn test_service_type_code_read_from_end_offset() {
        let framed = layout("s:0-1=feaa,m:2-3=0102,i:4-5");

        // Type code bytes start at the segment's end offset (3).
        let tail = vec![0x07, 0x16, 0xAA, 0xFE, 0x00, 0x01, 0x02, 0x33];
        let data = decode(&framed, &tail).unwrap();
        assert_eq!(data.beacon_type, 0x0102);
        assert_eq!(data.identifiers, vec![Identifier::Int(0x0233)]);

        // Type code at the start offset does not match framed layouts.
        let head = vec![0x07, 0x16, 0xAA, 0xFE, 0x01, 0x02, 0x00, 0x33];
        assert!(decode(&framed, &head).is_none());
    }

    #[test]
    fn test_service_data_length_must_match_uuid_segment() {
        // 16-bit service data is not a candidate for a 128-bit UUID layout.
        let long = layout("s:0-15=0000feaa-0000-1000-8000-00805f9b34fb,m:16-16=00,i:17-18");
        let bytes = vec![0x05, 0x16, 0xAA, 0xFE, 0x00, 0x01];
        assert!(decode(&long, &bytes).is_none());
    }

    #[test]
    fn test_long_service_uuid_match() {
        let long = layout("s:0-15=0000feaa-0000-1000-8000-00805f9b34fb,m:16-16=00,i:17-18");
        let mut bytes = vec![0x14, 0x21];
        let mut uuid = [
            0x00, 0x00, 0xFE, 0xAA, 0x00, 0x00, 0x10, 0x00, 0x80, 0x00, 0x00, 0x80, 0x5F, 0x9B,
            0x34, 0xFB,
        ];
        uuid.reverse();
        bytes.extend_from_slice(&uuid);
        bytes.extend_from_slice(&[0x00, 0x12, 0x34]);
        let data = decode(&long, &bytes).unwrap();
        assert_eq!(data.identifiers, vec![Identifier::Int(0x1234)]);
    }

    #[test]
    fn test_service_layout_ignores_service_data_without_layout_uuid() {
        // Manufacturer layouts never look at service data PDUs.
        let bytes = vec![0x05, 0x16, 0x02, 0x15, 0x00, 0x01];
        assert!(decode(&layout("m:0-1=0215,i:2-3"), &bytes).is_none());
    }

    #[test]
    fn test_extended_region_beacon() {
        let mut bytes = vec![0x02, 0x01, 0x06, 0x00];
        bytes.resize(31, 0);
        bytes.extend(altbeacon_bytes(4, 5));
        let data = decode(&layout(ALTBEACON_LAYOUT), &bytes).unwrap();
        assert_eq!(data.identifiers[2], Identifier::Int(5));
    }

    #[test]
    fn test_extreme_offsets_do_not_panic() {
        // Layouts edited after parsing can still carry offsets near usize::MAX.
        let mut type_code_far = layout("m:0-0=01");
        type_code_far.type_code.start_offset = usize::MAX - 1;
        type_code_far.type_code.end_offset = usize::MAX - 1;
        assert!(decode(&type_code_far, &[0x02, 0xFF, 0x00]).is_none());

        let mut identifier_far = layout("m:0-0=ff,i:1-2,d:3-4");
        identifier_far.identifiers[0].end_offset = usize::MAX - 5;
        identifier_far.data_fields[0].start_offset = usize::MAX;
        identifier_far.data_fields[0].end_offset = usize::MAX;
        let data = decode(&identifier_far, &[0x02, 0xFF, 0xFF]).unwrap();
        assert!(data.identifiers.is_empty());
        assert_eq!(data.data_fields, vec![0]);

        let mut framed_far = layout("s:0-1=feaa,m:2-2=00,i:3-4");
        let service = framed_far.service_uuid.as_mut().unwrap();
        service.start_offset = usize::MAX - 1;
        service.end_offset = usize::MAX;
        assert!(decode(&framed_far, &[0x05, 0x16, 0xAA, 0xFE, 0x00, 0x01]).is_none());
    }

    #[test]
    fn test_decode_never_panics() {
        let mut layouts = default_layouts();
        layouts.push(layout("m:0-0=ff,i:1-40v,d:41-60l"));
        layouts.push(layout("s:2-5=12345678,m:6-9=1,i:0-0").with_pdu_overflow(false));

        // xorshift keeps the corpus deterministic
        let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
        let mut next = move || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state
        };

        for _ in 0..2000 {
            let len = (next() % 64) as usize;
            let mut bytes: Vec<u8> = (0..len).map(|_| next() as u8).collect();
            // Bias toward plausible framing.
            if len > 2 && next() % 2 == 0 {
                bytes[1] = [0xFF, 0x16, 0x20, 0x21, 0x07][(next() % 5) as usize];
            }
            for l in &layouts {
                if let Some(data) = decode(l, &bytes) {
                    assert_eq!(data.beacon_type, l.type_code.value);
                    assert_eq!(data.data_fields.len(), l.data_fields.len());
                }
            }
        }
    }
}
