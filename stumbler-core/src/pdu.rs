//! Split raw BLE advertisement bytes into length-prefixed AD structures (PDUs).
//!
//! AD structure format: `[length] [type] [payload...]` where `length` counts
//! the type byte plus the payload. A zero length terminates the sequence.
//! Legacy advertising data is capped at 31 bytes; anything past that boundary
//! (extended advertising, or scan response appended by the platform) is split
//! as a second, independent sequence.

/// Maximum size of legacy (primary) advertising data.
pub const PRIMARY_ADV_LEN: usize = 31;

/// Manufacturer specific data.
pub const AD_MANUFACTURER_DATA: u8 = 0xFF;
/// Service data, 16-bit UUID.
pub const AD_SERVICE_DATA_16: u8 = 0x16;
/// Service data, 32-bit UUID.
pub const AD_SERVICE_DATA_32: u8 = 0x20;
/// Service data, 128-bit UUID.
pub const AD_SERVICE_DATA_128: u8 = 0x21;
/// Complete list of 128-bit service UUIDs.
pub const AD_COMPLETE_UUID_128: u8 = 0x07;

/// A view into one AD structure of a raw advertisement buffer.
///
/// `start_index..=end_index` is the payload (after the type byte). For a PDU
/// with no payload `end_index` is `start_index - 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pdu {
    pub ad_type: u8,
    pub declared_length: u8,
    pub start_index: usize,
    pub end_index: usize,
}

impl Pdu {
    /// Number of payload bytes actually present in the buffer.
    pub fn actual_length(&self) -> usize {
        (self.end_index + 1).saturating_sub(self.start_index)
    }

    /// Payload slice of `bytes`. Empty when the PDU carries no payload.
    pub fn payload<'a>(&self, bytes: &'a [u8]) -> &'a [u8] {
        if self.actual_length() == 0 {
            return &[];
        }
        bytes
            .get(self.start_index..=self.end_index)
            .unwrap_or(&[])
    }

    /// UUID byte length that service-data framing of this AD type carries,
    /// or `None` for AD types that are not service framing.
    pub fn service_uuid_length(&self) -> Option<usize> {
        match self.ad_type {
            AD_SERVICE_DATA_16 => Some(2),
            AD_SERVICE_DATA_32 => Some(4),
            AD_SERVICE_DATA_128 | AD_COMPLETE_UUID_128 => Some(16),
            _ => None,
        }
    }

    pub fn is_manufacturer_data(&self) -> bool {
        self.ad_type == AD_MANUFACTURER_DATA
    }
}

/// Split an advertisement into PDUs.
///
/// Never fails: truncated PDUs are clamped to the end of the buffer and a PDU
/// whose payload would start past the end is dropped (ending its sequence).
pub fn split_pdus(bytes: &[u8]) -> Vec<Pdu> {
    let mut pdus = split_region(bytes, 0, bytes.len().min(PRIMARY_ADV_LEN));
    if bytes.len() > PRIMARY_ADV_LEN {
        pdus.extend(split_region(bytes, PRIMARY_ADV_LEN, bytes.len()));
    }
    pdus
}

/// Walk AD structures starting at `start` while the cursor is before `end`.
/// Indices in the returned PDUs are absolute within `bytes`.
fn split_region(bytes: &[u8], start: usize, end: usize) -> Vec<Pdu> {
    let mut pdus = Vec::new();
    let mut index = start;
    while index < end {
        match parse_pdu(bytes, index) {
            Some(pdu) => {
                index += pdu.declared_length as usize + 1;
                pdus.push(pdu);
            }
            None => break,
        }
    }
    pdus
}

fn parse_pdu(bytes: &[u8], index: usize) -> Option<Pdu> {
    if bytes.len().saturating_sub(index) < 2 {
        return None;
    }
    let length = bytes[index];
    if length == 0 {
        return None;
    }
    let ad_type = bytes[index + 1];
    let start_index = index + 2;
    if start_index >= bytes.len() {
        return None;
    }
    let end_index = (index + length as usize).min(bytes.len() - 1);
    Some(Pdu {
        ad_type,
        declared_length: length,
        start_index,
        end_index,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
