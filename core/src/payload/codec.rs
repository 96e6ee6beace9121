// Payload codec: fixed little-endian layout understood by the camera
//
// Date/time block (7 bytes, camera-local wall clock):
//
//   0..2  year   u16
//   2     month  1-12
//   3     day    1-31
//   4     hour   0-23
//   5     minute 0-59
//   6     second 0-59
//
// Location block (32 bytes):
//
//   0..8    latitude   f64 degrees
//   8..16   longitude  f64 degrees
//   16..24  altitude   f64 metres, 0.0 when unknown
//   24..31  fix time   date/time block layout, UTC
//   31      datum      0 = WGS84

use super::types::{LocationSample, SyncPayload, DATE_TIME_LEN, LOCATION_LEN};
use chrono::{
    DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc,
};
use thiserror::Error;

/// Datum byte for WGS84 coordinates
pub const DATUM_WGS84: u8 = 0;

/// Errors for payload encoding and decoding
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EncodingError {
    #[error("Latitude out of range: {0}")]
    InvalidLatitude(f64),
    #[error("Longitude out of range: {0}")]
    InvalidLongitude(f64),
    #[error("Altitude is not finite: {0}")]
    InvalidAltitude(f64),
    #[error("Year {0} does not fit the wire format")]
    YearOutOfRange(i32),
    #[error("Expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("Invalid field: {0}")]
    InvalidField(String),
}

/// Serializes time and location into [`SyncPayload`]s
pub struct PayloadEncoder;

impl PayloadEncoder {
    /// Encode one sync tick
    ///
    /// The time is written as the wall-clock reading in its own offset, since
    /// the camera has no notion of time zones.
    pub fn encode(
        time: &DateTime<FixedOffset>,
        location: Option<&LocationSample>,
    ) -> Result<SyncPayload, EncodingError> {
        let date_time = Self::encode_date_time(&time.naive_local())?;
        let location = match location {
            Some(sample) => Some(Self::encode_location(sample)?),
            None => None,
        };
        Ok(SyncPayload {
            date_time,
            location,
        })
    }

    /// Encode the 7-byte date/time block
    pub fn encode_date_time(time: &NaiveDateTime) -> Result<[u8; DATE_TIME_LEN], EncodingError> {
        let mut bytes = [0u8; DATE_TIME_LEN];
        write_date_time(&mut bytes, time)?;
        Ok(bytes)
    }

    /// Encode the 32-byte location block
    pub fn encode_location(sample: &LocationSample) -> Result<[u8; LOCATION_LEN], EncodingError> {
        sample.validate()?;

        let mut bytes = [0u8; LOCATION_LEN];
        bytes[0..8].copy_from_slice(&sample.latitude.to_le_bytes());
        bytes[8..16].copy_from_slice(&sample.longitude.to_le_bytes());
        bytes[16..24].copy_from_slice(&sample.altitude.unwrap_or(0.0).to_le_bytes());
        write_date_time(&mut bytes[24..31], &sample.timestamp.naive_utc())?;
        bytes[31] = DATUM_WGS84;
        Ok(bytes)
    }
}

/// Parses payloads back; the camera is the only production decoder
pub struct PayloadDecoder;

impl PayloadDecoder {
    pub fn decode(
        payload: &SyncPayload,
    ) -> Result<(NaiveDateTime, Option<LocationSample>), EncodingError> {
        let time = Self::decode_date_time(&payload.date_time)?;
        let location = match &payload.location {
            Some(bytes) => Some(Self::decode_location(bytes)?),
            None => None,
        };
        Ok((time, location))
    }

    pub fn decode_date_time(bytes: &[u8]) -> Result<NaiveDateTime, EncodingError> {
        check_len(bytes, DATE_TIME_LEN)?;
        read_date_time(bytes)
    }

    /// Decode a location block; altitude is always present, accuracy never is
    pub fn decode_location(bytes: &[u8]) -> Result<LocationSample, EncodingError> {
        check_len(bytes, LOCATION_LEN)?;

        if bytes[31] != DATUM_WGS84 {
            return Err(EncodingError::InvalidField(format!("datum {}", bytes[31])));
        }

        let sample = LocationSample {
            timestamp: Utc.from_utc_datetime(&read_date_time(&bytes[24..31])?),
            latitude: read_f64(&bytes[0..8]),
            longitude: read_f64(&bytes[8..16]),
            altitude: Some(read_f64(&bytes[16..24])),
            accuracy: None,
        };
        sample.validate()?;
        Ok(sample)
    }
}

fn check_len(bytes: &[u8], expected: usize) -> Result<(), EncodingError> {
    if bytes.len() != expected {
        return Err(EncodingError::InvalidLength {
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}

// chrono folds leap seconds into the nanosecond field, so second() is <= 59
fn write_date_time(out: &mut [u8], time: &NaiveDateTime) -> Result<(), EncodingError> {
    let year = u16::try_from(time.year()).map_err(|_| EncodingError::YearOutOfRange(time.year()))?;
    out[0..2].copy_from_slice(&year.to_le_bytes());
    out[2] = time.month() as u8;
    out[3] = time.day() as u8;
    out[4] = time.hour() as u8;
    out[5] = time.minute() as u8;
    out[6] = time.second() as u8;
    Ok(())
}

fn read_date_time(bytes: &[u8]) -> Result<NaiveDateTime, EncodingError> {
    let year = u16::from_le_bytes([bytes[0], bytes[1]]) as i32;
    let date = NaiveDate::from_ymd_opt(year, bytes[2] as u32, bytes[3] as u32).ok_or_else(|| {
        EncodingError::InvalidField(format!("date {}-{}-{}", year, bytes[2], bytes[3]))
    })?;
    let time = NaiveTime::from_hms_opt(bytes[4] as u32, bytes[5] as u32, bytes[6] as u32)
        .ok_or_else(|| {
            EncodingError::InvalidField(format!("time {}:{}:{}", bytes[4], bytes[5], bytes[6]))
        })?;
    Ok(NaiveDateTime::new(date, time))
}

fn read_f64(bytes: &[u8]) -> f64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    f64::from_le_bytes(raw)
}
