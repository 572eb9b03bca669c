//! Observation records emitted by the producer.
//!
//! A [`Record`] is one row of the analysis: where the vessel was, how it was
//! moving, and whether the detector flagged it. Only the position is
//! mandatory. Every other field may be missing and is then *unknown*; it is
//! never defaulted to zero.
//!
//! # Wire format
//!
//! The producer serializes records as JSON objects with upper-case AIS keys:
//!
//! ```text
//! {"LAT": 33.7, "LON": -78.8, "BaseDateTime": "2024-01-01T00:00:00",
//!  "SOG": 11.2, "COG": 201.5, "Change": 0.4,
//!  "anomaly": 0, "oil_spill": 0, "image_path": null}
//! ```
//!
//! Flags accept booleans or integers (`0` is clear, anything else is set,
//! including the raw isolation-forest label `-1`) and are written back as
//! `0`/`1`. Keys the schema doesn't know are kept in [`Record::extra`] and
//! re-serialized untouched when the record is forwarded.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants::RECORD_EVENT;

/// Errors produced while decoding a frame payload into a [`Record`].
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    /// The payload is not a JSON object matching the record schema.
    #[error("invalid record payload: {0}")]
    Json(#[from] serde_json::Error),

    /// The payload decoded but the position is not on the globe.
    #[error("position out of range: lat={lat}, lon={lon}")]
    PositionOutOfRange {
        /// Decoded latitude.
        lat: f64,
        /// Decoded longitude.
        lon: f64,
    },
}

/// One structured observation recovered from the producer stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Latitude in decimal degrees.
    #[serde(rename = "LAT")]
    pub lat: f64,

    /// Longitude in decimal degrees.
    #[serde(rename = "LON")]
    pub lon: f64,

    /// Producer-defined timestamp, opaque to the relay.
    #[serde(rename = "BaseDateTime", default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    /// Speed over ground in knots.
    #[serde(rename = "SOG", default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,

    /// Course over ground in degrees.
    #[serde(rename = "COG", default, skip_serializing_if = "Option::is_none")]
    pub course: Option<f64>,

    /// Speed change relative to the previous record of the same vessel.
    #[serde(rename = "Change", default, skip_serializing_if = "Option::is_none")]
    pub speed_delta: Option<f64>,

    /// Whether the detector flagged this record as anomalous.
    #[serde(default, with = "flag", skip_serializing_if = "Option::is_none")]
    pub anomaly: Option<bool>,

    /// Whether a spill was detected near this record.
    #[serde(default, with = "flag", skip_serializing_if = "Option::is_none")]
    pub oil_spill: Option<bool>,

    /// Relative path of an artifact (spill visualization) the viewer may fetch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,

    /// Keys outside the schema, preserved for forwarding.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Record {
    /// Create a record with only a position; everything else unknown.
    #[must_use]
    pub fn at(lat: f64, lon: f64) -> Self {
        Self {
            lat,
            lon,
            timestamp: None,
            speed: None,
            course: None,
            speed_delta: None,
            anomaly: None,
            oil_spill: None,
            image_path: None,
            extra: Map::new(),
        }
    }

    /// Decode a frame payload.
    ///
    /// Payloads that parse but lack a position, or whose position is not a
    /// valid coordinate, are rejected like any other malformed payload.
    pub fn decode(payload: &[u8]) -> Result<Self, RecordError> {
        let record: Self = serde_json::from_slice(payload)?;
        if !(-90.0..=90.0).contains(&record.lat) || !(-180.0..=180.0).contains(&record.lon) {
            return Err(RecordError::PositionOutOfRange {
                lat: record.lat,
                lon: record.lon,
            });
        }
        Ok(record)
    }

    /// True only when the anomaly flag is known and set.
    #[must_use]
    pub fn is_anomaly(&self) -> bool {
        self.anomaly == Some(true)
    }

    /// True only when the spill flag is known and set.
    #[must_use]
    pub fn is_oil_spill(&self) -> bool {
        self.oil_spill == Some(true)
    }

    /// Bare file name of the artifact reference, if any.
    ///
    /// The producer reports paths relative to its own working directory
    /// (`oil_spill_images/oil_spill_12.png`); only the last segment is
    /// meaningful to the artifact endpoint.
    #[must_use]
    pub fn artifact_name(&self) -> Option<&str> {
        self.image_path
            .as_deref()
            .and_then(|path| path.rsplit(['/', '\\']).next())
            .filter(|name| !name.is_empty())
    }
}

/// Message sent to every subscriber for each extracted record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordUpdate {
    /// Event name, always [`RECORD_EVENT`] for record updates.
    pub event: String,
    /// The record, re-serialized.
    pub data: Record,
}

impl RecordUpdate {
    /// Wrap a record in the update envelope.
    #[must_use]
    pub fn new(record: Record) -> Self {
        Self {
            event: RECORD_EVENT.to_string(),
            data: record,
        }
    }

    /// Whether this message carries a record update.
    #[must_use]
    pub fn is_record(&self) -> bool {
        self.event == RECORD_EVENT
    }
}

/// Serde adapter for binary flags that may arrive as bool or integer.
mod flag {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Bool(bool),
        Int(i64),
        Float(f64),
    }

    pub fn serialize<S: Serializer>(value: &Option<bool>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(set) => serializer.serialize_u8(u8::from(*set)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<bool>, D::Error> {
        Ok(match Option::<Repr>::deserialize(deserializer)? {
            None => None,
            Some(Repr::Bool(set)) => Some(set),
            Some(Repr::Int(raw)) => Some(raw != 0),
            Some(Repr::Float(raw)) => Some(raw != 0.0),
        })
    }
}
