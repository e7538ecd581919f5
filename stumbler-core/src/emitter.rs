//! Radio emitters (Wi-Fi access points, cell towers, Bluetooth beacons) and
//! timestamped observations of them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::beacon::decode_first;
use crate::layout::BeaconLayout;
use crate::position::Position;
use crate::types::MacAddress;

/// SSID suffix by which network owners opt out of geolocation databases.
pub const OPT_OUT_SUFFIX: &str = "_nomap";

/// A discoverable radio device with a stable identity.
pub trait Emitter {
    /// Key under which the latest observation of this emitter is kept.
    fn unique_key(&self) -> String;
}

/// An emitter as seen at `timestamp` (device monotonic clock, ms).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation<E> {
    pub emitter: E,
    pub timestamp: i64,
}

impl<E> Observation<E> {
    pub fn new(emitter: E, timestamp: i64) -> Self {
        Observation { emitter, timestamp }
    }

    /// Milliseconds between this observation and the position it is attributed to.
    /// Positive when the emitter was seen before the fix.
    pub fn age_at(&self, position: &Position) -> i64 {
        position.timestamp - self.timestamp
    }
}

// ---------------------------------------------------------------------------
// Wi-Fi
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WifiAccessPoint {
    pub mac_address: MacAddress,
    #[serde(default)]
    pub ssid: Option<String>,
    #[serde(default)]
    pub frequency: Option<u32>,
    #[serde(default)]
    pub channel: Option<u16>,
    #[serde(default)]
    pub signal_strength: Option<i32>,
    #[serde(default)]
    pub signal_to_noise_ratio: Option<i32>,
}

impl WifiAccessPoint {
    pub fn new(mac_address: MacAddress, ssid: Option<&str>) -> Self {
        WifiAccessPoint {
            mac_address,
            ssid: ssid.map(str::to_string),
            frequency: None,
            channel: None,
            signal_strength: None,
            signal_to_noise_ratio: None,
        }
    }

    /// Hidden or opted-out networks must never be reported.
    pub fn is_hidden(&self) -> bool {
        match self.ssid.as_deref() {
            None => true,
            Some(ssid) => {
                ssid.trim().is_empty()
                    || ssid.ends_with(OPT_OUT_SUFFIX)
                    || ssid.chars().all(|c| c == '\0')
            }
        }
    }
}

impl Emitter for WifiAccessPoint {
    fn unique_key(&self) -> String {
        self.mac_address.to_string()
    }
}

// ---------------------------------------------------------------------------
// Cellular
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RadioType {
    Gsm,
    Wcdma,
    Lte,
    Nr,
}

impl fmt::Display for RadioType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RadioType::Gsm => write!(f, "gsm"),
            RadioType::Wcdma => write!(f, "wcdma"),
            RadioType::Lte => write!(f, "lte"),
            RadioType::Nr => write!(f, "nr"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellTower {
    pub radio_type: RadioType,
    pub mobile_country_code: Option<u16>,
    /// Kept as text: leading zeros are significant ("01" != "001").
    pub mobile_network_code: Option<String>,
    #[serde(default)]
    pub location_area_code: Option<u32>,
    #[serde(default)]
    pub cell_id: Option<u64>,
    #[serde(default)]
    pub primary_scrambling_code: Option<u16>,
    #[serde(default)]
    pub signal_strength: Option<i32>,
    #[serde(default)]
    pub asu: Option<i32>,
    #[serde(default)]
    pub timing_advance: Option<i32>,
    #[serde(default)]
    pub arfcn: Option<u32>,
}

impl CellTower {
    /// A tower with neither a cell id nor a scrambling code cannot be told apart
    /// from its neighbours.
    pub fn is_identifiable(&self) -> bool {
        self.cell_id.is_some() || self.primary_scrambling_code.is_some()
    }
}

impl Emitter for CellTower {
    fn unique_key(&self) -> String {
        fn opt<T: fmt::Display>(v: &Option<T>) -> String {
            v.as_ref().map(|v| v.to_string()).unwrap_or_default()
        }
        format!(
            "{}/{}/{}/{}/{}/{}",
            self.radio_type,
            opt(&self.mobile_country_code),
            opt(&self.mobile_network_code),
            opt(&self.location_area_code),
            opt(&self.cell_id),
            opt(&self.primary_scrambling_code),
        )
    }
}

// ---------------------------------------------------------------------------
// Bluetooth
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BluetoothBeacon {
    pub mac_address: MacAddress,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub signal_strength: Option<i32>,
    #[serde(default)]
    pub beacon_type: Option<u64>,
    #[serde(default)]
    pub id1: Option<String>,
    #[serde(default)]
    pub id2: Option<String>,
    #[serde(default)]
    pub id3: Option<String>,
}

impl BluetoothBeacon {
    /// Build a beacon from a raw advertisement, filling the beacon type and
    /// first three identifiers from the first layout that recognizes it.
    pub fn from_advertisement(
        mac_address: MacAddress,
        name: Option<String>,
        signal_strength: Option<i32>,
        advertisement: &[u8],
        layouts: &[BeaconLayout],
    ) -> Self {
        let mut beacon = BluetoothBeacon {
            mac_address,
            name,
            signal_strength,
            beacon_type: None,
            id1: None,
            id2: None,
            id3: None,
        };
        if let Some((_, data)) = decode_first(layouts, advertisement) {
            let mut ids = data.identifiers.iter().map(|id| id.to_string());
            beacon.beacon_type = Some(data.beacon_type);
            beacon.id1 = ids.next();
            beacon.id2 = ids.next();
            beacon.id3 = ids.next();
        }
        beacon
    }
}

impl Emitter for BluetoothBeacon {
    fn unique_key(&self) -> String {
        self.mac_address.to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
