use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Station identifier of a broadcasting ITS unit
pub type StationId = u32;

/// ITS message kinds this probe understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// Cooperative Awareness Message (periodic position report)
    Cam,
    /// Decentralized Environmental Notification Message (hazard report)
    Denm,
}

impl MessageKind {
    /// Map the ITS PDU header messageID to a kind
    pub fn from_message_id(id: u8) -> Option<Self> {
        match id {
            message_ids::DENM => Some(MessageKind::Denm),
            message_ids::CAM => Some(MessageKind::Cam),
            _ => None,
        }
    }

    pub fn message_id(&self) -> u8 {
        match self {
            MessageKind::Cam => message_ids::CAM,
            MessageKind::Denm => message_ids::DENM,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Cam => write!(f, "CAM"),
            MessageKind::Denm => write!(f, "DENM"),
        }
    }
}

/// ITS PDU header messageID values (ETSI TS 102 894-2)
pub mod message_ids {
    pub const DENM: u8 = 1;
    pub const CAM: u8 = 2;
}

/// A frame as seen on the V2X interface: protocol metadata plus encoded payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct V2xFrame {
    /// ITS PDU header messageID, `None` for non-ITS traffic
    pub message_id: Option<u8>,
    /// GeoNetworking source address
    pub gn_address: String,
    pub payload: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

impl V2xFrame {
    pub fn new(message_id: Option<u8>, gn_address: String, payload: Vec<u8>) -> Self {
        Self {
            message_id,
            gn_address,
            payload,
            timestamp: Utc::now(),
        }
    }
}

/// Awareness message attributes read by the probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cam {
    #[serde(rename = "stationID")]
    pub station_id: StationId,
    /// Latitude scaled by 1e7
    pub latitude: i32,
    /// Longitude scaled by 1e7
    pub longitude: i32,
    /// Heading in degrees clockwise from north
    #[serde(rename = "headingValue")]
    pub heading_value: u16,
    #[serde(rename = "speedValue")]
    pub speed_value: u16,
}

impl Cam {
    pub fn lat_degrees(&self) -> f64 {
        encoding::descale_coordinate(self.latitude)
    }

    pub fn lon_degrees(&self) -> f64 {
        encoding::descale_coordinate(self.longitude)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventType {
    #[serde(rename = "causeCode")]
    pub cause_code: u8,
    #[serde(rename = "subCauseCode")]
    pub sub_cause_code: u8,
}

/// DENM situation container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Situation {
    #[serde(rename = "informationQuality")]
    pub information_quality: u8,
    #[serde(rename = "eventType")]
    pub event_type: EventType,
}

/// Hazard message attributes read or forged by the probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Denm {
    pub protocol_version: u8,
    #[serde(rename = "messageID")]
    pub message_id: u8,
    #[serde(rename = "stationID")]
    pub station_id: StationId,
    #[serde(rename = "originatingStationID")]
    pub originating_station_id: StationId,
    pub sequence_number: u16,
    pub detection_time: u64,
    pub reference_time: u64,
    pub latitude: i32,
    pub longitude: i32,
    pub semi_major_confidence: u16,
    pub semi_minor_confidence: u16,
    pub semi_major_orientation: u16,
    pub altitude_value: i32,
    pub altitude_confidence: String,
    pub validity_duration: u32,
    pub station_type: u8,
    pub situation: Situation,
}

impl Denm {
    pub fn sub_cause_code(&self) -> u8 {
        self.situation.event_type.sub_cause_code
    }
}

/// A decoded message, tagged by kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum V2xMessage {
    Cam(Cam),
    Denm(Denm),
}

impl V2xMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            V2xMessage::Cam(_) => MessageKind::Cam,
            V2xMessage::Denm(_) => MessageKind::Denm,
        }
    }

    pub fn station_id(&self) -> StationId {
        match self {
            V2xMessage::Cam(cam) => cam.station_id,
            V2xMessage::Denm(denm) => denm.station_id,
        }
    }
}

/// Fixed-point helpers for ITS coordinates (1e-7 degree units)
pub mod encoding {
    pub const COORDINATE_SCALE: f64 = 1e7;

    pub fn descale_coordinate(value: i32) -> f64 {
        value as f64 * 1e-7
    }

    /// Encode degrees to fixed point, truncating toward zero
    pub fn scale_coordinate(degrees: f64) -> i32 {
        (degrees * COORDINATE_SCALE) as i32
    }
}

/// Flatten a serializable message into dot-joined field paths
/// (`situation.eventType.subCauseCode` and so on).
pub fn flatten_fields<T: Serialize>(msg: &T) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    if let Ok(value) = serde_json::to_value(msg) {
        match value {
            Value::Object(map) => flatten_into(&mut out, None, map),
            other => {
                out.insert(String::new(), other);
            }
        }
    }
    out
}

fn flatten_into(out: &mut BTreeMap<String, Value>, prefix: Option<&str>, map: Map<String, Value>) {
    for (key, value) in map {
        let path = match prefix {
            Some(p) => format!("{}.{}", p, key),
            None => key,
        };
        match value {
            Value::Object(inner) => flatten_into(out, Some(&path), inner),
            leaf => {
                out.insert(path, leaf);
            }
        }
    }
}

/// Look up a dot path against flattened fields, trying the full path first and
/// then progressively shorter suffixes of it.
pub fn lookup_path<'a>(fields: &'a BTreeMap<String, Value>, path: &str) -> Option<&'a Value> {
    let segments: Vec<&str> = path.split('.').collect();
    (0..segments.len()).find_map(|start| fields.get(&segments[start..].join(".")))
}
