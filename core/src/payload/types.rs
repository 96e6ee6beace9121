// Payload types: location input and encoded sync payload

use super::codec::EncodingError;
use crate::transport::ble::{GattProfile, GattWrite};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Size of the encoded date/time block
pub const DATE_TIME_LEN: usize = 7;

/// Size of the encoded location block
pub const LOCATION_LEN: usize = 32;

/// A GPS fix supplied by an external location provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    /// When the fix was taken
    pub timestamp: DateTime<Utc>,
    /// Degrees, WGS84
    pub latitude: f64,
    /// Degrees, WGS84
    pub longitude: f64,
    /// Metres above the WGS84 ellipsoid
    pub altitude: Option<f64>,
    /// Horizontal accuracy radius in metres
    pub accuracy: Option<f32>,
}

impl LocationSample {
    pub fn new(timestamp: DateTime<Utc>, latitude: f64, longitude: f64) -> Self {
        Self {
            timestamp,
            latitude,
            longitude,
            altitude: None,
            accuracy: None,
        }
    }

    pub fn with_altitude(mut self, altitude: f64) -> Self {
        self.altitude = Some(altitude);
        self
    }

    pub fn with_accuracy(mut self, accuracy: f32) -> Self {
        self.accuracy = Some(accuracy);
        self
    }

    /// Check coordinates against the ranges the wire format can carry
    pub fn validate(&self) -> Result<(), EncodingError> {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(EncodingError::InvalidLatitude(self.latitude));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(EncodingError::InvalidLongitude(self.longitude));
        }
        if let Some(altitude) = self.altitude {
            if !altitude.is_finite() {
                return Err(EncodingError::InvalidAltitude(altitude));
            }
        }
        Ok(())
    }

    /// Age of the fix relative to `now` (zero for fixes from the future)
    pub fn age_at(&self, now: DateTime<Utc>) -> std::time::Duration {
        (now - self.timestamp).to_std().unwrap_or_default()
    }
}

/// Encoded bytes for one sync tick
///
/// The date/time block is always present. The location block is absent when
/// no usable fix was available, in which case only the time is synced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPayload {
    pub date_time: [u8; DATE_TIME_LEN],
    pub location: Option<[u8; LOCATION_LEN]>,
}

impl SyncPayload {
    /// Characteristic writes in the order they must be sent: date/time first
    pub fn writes(&self, profile: &GattProfile) -> Vec<GattWrite> {
        let mut writes = vec![GattWrite {
            target: profile.date_time,
            data: self.date_time.to_vec(),
        }];
        if let Some(location) = &self.location {
            writes.push(GattWrite {
                target: profile.location,
                data: location.to_vec(),
            });
        }
        writes
    }

    /// All blocks concatenated, for diagnostics
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.date_time.to_vec();
        if let Some(location) = &self.location {
            bytes.extend_from_slice(location);
        }
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample(latitude: f64, longitude: f64) -> LocationSample {
        LocationSample::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            latitude,
            longitude,
        )
    }

    #[test]
    fn test_validate_accepts_valid_coordinates() {
        assert!(sample(45.4642, 9.19).validate().is_ok());
        assert!(sample(-90.0, 180.0).validate().is_ok());
        assert!(sample(90.0, -180.0).with_altitude(-12.5).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        assert!(matches!(
            sample(91.0, 0.0).validate(),
            Err(EncodingError::InvalidLatitude(_))
        ));
        assert!(matches!(
            sample(0.0, -180.5).validate(),
            Err(EncodingError::InvalidLongitude(_))
        ));
        assert!(matches!(
            sample(f64::NAN, 0.0).validate(),
            Err(EncodingError::InvalidLatitude(_))
        ));
        assert!(matches!(
            sample(0.0, 0.0).with_altitude(f64::INFINITY).validate(),
            Err(EncodingError::InvalidAltitude(_))
        ));
    }

    #[test]
    fn test_age_at() {
        let fix = sample(0.0, 0.0);
        let later = Utc.with_ymd_and_hms(2024, 5, 1, 12, 5, 0).unwrap();
        let earlier = Utc.with_ymd_and_hms(2024, 5, 1, 11, 0, 0).unwrap();

        assert_eq!(fix.age_at(later).as_secs(), 300);
        assert_eq!(fix.age_at(earlier).as_secs(), 0);
    }

    #[test]
    fn test_payload_writes_order() {
        let profile = GattProfile::default();
        let payload = SyncPayload {
            date_time: [1; DATE_TIME_LEN],
            location: Some([2; LOCATION_LEN]),
        };

        let writes = payload.writes(&profile);
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].target, profile.date_time);
        assert_eq!(writes[1].target, profile.location);
        // Each write carries exactly one fixed-size block
        assert_eq!(writes[0].data, vec![1; DATE_TIME_LEN]);
        assert_eq!(writes[1].data, vec![2; LOCATION_LEN]);

        let bytes = payload.to_bytes();
        assert_eq!(bytes.len(), DATE_TIME_LEN + LOCATION_LEN);
        assert_eq!(&bytes[..DATE_TIME_LEN], &writes[0].data[..]);
    }

    #[test]
    fn test_time_only_payload_has_single_write() {
        let payload = SyncPayload {
            date_time: [1; DATE_TIME_LEN],
            location: None,
        };

        let writes = payload.writes(&GattProfile::default());
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].data.len(), DATE_TIME_LEN);
        assert_eq!(payload.to_bytes(), writes[0].data);
    }
}
