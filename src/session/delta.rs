//! Visual deltas: what a viewer must draw after applying one record.

use std::fmt;

use serde::Serialize;

use super::geo::{LatLng, ViewFit};
use crate::record::Record;

const UNKNOWN: &str = "unknown";

/// How a marker is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerStyle {
    /// First position of the session.
    Start,
    /// Position flagged by the detector.
    Anomaly,
    /// Latest ordinary position.
    Current,
    /// Former current position, drawn small and neutral.
    Trail,
}

impl MarkerStyle {
    /// Fill color used by map front-ends.
    #[must_use]
    pub fn color(self) -> &'static str {
        match self {
            Self::Start => "green",
            Self::Anomaly => "red",
            Self::Current => "blue",
            Self::Trail => "black",
        }
    }
}

/// Details attached to a marker, shown when it is selected.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PopupInfo {
    /// Latitude.
    pub lat: f64,
    /// Longitude.
    pub lon: f64,
    /// Producer timestamp.
    pub time: Option<String>,
    /// Speed over ground, knots.
    pub speed: Option<f64>,
    /// Course over ground, degrees.
    pub course: Option<f64>,
    /// Speed change, knots.
    pub speed_delta: Option<f64>,
    /// Anomaly flag.
    pub anomaly: Option<bool>,
    /// Spill flag.
    pub oil_spill: Option<bool>,
}

impl From<&Record> for PopupInfo {
    fn from(record: &Record) -> Self {
        Self {
            lat: record.lat,
            lon: record.lon,
            time: record.timestamp.clone(),
            speed: record.speed,
            course: record.course,
            speed_delta: record.speed_delta,
            anomaly: record.anomaly,
            oil_spill: record.oil_spill,
        }
    }
}

fn or_unknown<T>(value: Option<T>, render: impl FnOnce(T) -> String) -> String {
    value.map_or_else(|| UNKNOWN.to_string(), render)
}

fn yes_no(flag: bool, yes: &str, no: &str) -> String {
    let text = if flag { yes } else { no };
    text.to_string()
}

impl fmt::Display for PopupInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Latitude: {}", self.lat)?;
        writeln!(f, "Longitude: {}", self.lon)?;
        writeln!(f, "Time: {}", self.time.as_deref().unwrap_or(UNKNOWN))?;
        writeln!(f, "Speed: {}", or_unknown(self.speed, |v| format!("{v} knots")))?;
        writeln!(f, "Course: {}", or_unknown(self.course, |v| format!("{v}°")))?;
        writeln!(
            f,
            "Speed Change: {}",
            or_unknown(self.speed_delta, |v| format!("{v:.2} knots"))
        )?;
        writeln!(
            f,
            "Anomaly: {}",
            or_unknown(self.anomaly, |v| yes_no(v, "Yes", "No"))
        )?;
        write!(
            f,
            "Oil Spill: {}",
            or_unknown(self.oil_spill, |v| yes_no(v, "Detected", "Not Detected"))
        )
    }
}

/// One drawing instruction.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DrawOp {
    /// Remove every marker, ring and overlay.
    ClearAll,
    /// Move the view back to its initial position.
    ResetView {
        /// View center.
        center: LatLng,
        /// Zoom level.
        zoom: u8,
    },
    /// Hide the artifact panel.
    HideArtifact,
    /// Create (or replace) the marker for `key`.
    PlaceMarker {
        /// Identity key of the marker.
        key: String,
        /// Marker position.
        position: LatLng,
        /// Marker style.
        style: MarkerStyle,
        /// Popup details.
        popup: PopupInfo,
    },
    /// Change the style of an existing marker.
    Restyle {
        /// Identity key of the marker.
        key: String,
        /// New style.
        style: MarkerStyle,
    },
    /// Ring around an anomaly marker.
    HighlightRing {
        /// Identity key of the ringed marker.
        key: String,
        /// Ring center.
        center: LatLng,
        /// Radius in meters.
        radius_m: f64,
    },
    /// Large overlay marking a suspected spill.
    SpillOverlay {
        /// Overlay center.
        center: LatLng,
        /// Radius in meters.
        radius_m: f64,
        /// Overlay label.
        label: String,
    },
    /// Show an artifact image with the record's details.
    ShowArtifact {
        /// Where to fetch the artifact from.
        url: String,
        /// Details shown next to the artifact.
        details: PopupInfo,
    },
    /// Fit the view to some bounds.
    FitBounds(ViewFit),
}

/// Anomaly status shown in the status row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Anomaly flag set.
    AnomalyDetected,
    /// Anomaly flag clear.
    Normal,
    /// Anomaly flag missing.
    Unknown,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::AnomalyDetected => "Anomaly Detected",
            Self::Normal => "Normal",
            Self::Unknown => "Unknown",
        })
    }
}

/// Single-row dashboard summary of the latest record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusRow {
    /// Latitude, 3 decimals.
    pub lat: String,
    /// Longitude, 3 decimals.
    pub lon: String,
    /// Course over ground, 1 decimal.
    pub course: String,
    /// Speed over ground, 1 decimal.
    pub speed: String,
    /// Anomaly status.
    pub status: Status,
    /// `Yes`, `No` or `unknown`.
    pub anomaly: String,
}

impl From<&Record> for StatusRow {
    fn from(record: &Record) -> Self {
        let (status, anomaly) = match record.anomaly {
            Some(true) => (Status::AnomalyDetected, "Yes"),
            Some(false) => (Status::Normal, "No"),
            None => (Status::Unknown, UNKNOWN),
        };
        Self {
            lat: format!("{:.3}", record.lat),
            lon: format!("{:.3}", record.lon),
            course: or_unknown(record.course, |v| format!("{v:.1}")),
            speed: or_unknown(record.speed, |v| format!("{v:.1}")),
            status,
            anomaly: anomaly.to_string(),
        }
    }
}

impl fmt::Display for StatusRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LAT {} LON {} COG {} SOG {} | {} | anomaly: {}",
            self.lat, self.lon, self.course, self.speed, self.status, self.anomaly
        )
    }
}

/// Everything a viewer must change after one record, in order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisualDelta {
    /// Drawing instructions, to be applied in order.
    pub ops: Vec<DrawOp>,
    /// Status row for the record.
    pub status: StatusRow,
}

impl VisualDelta {
    /// Whether this delta starts with a loop-restart reset.
    #[must_use]
    pub fn is_reset(&self) -> bool {
        matches!(self.ops.first(), Some(DrawOp::ClearAll))
    }

    /// Key and style of the marker placed by this delta.
    #[must_use]
    pub fn placed_marker(&self) -> Option<(&str, MarkerStyle)> {
        self.ops.iter().find_map(|op| match op {
            DrawOp::PlaceMarker { key, style, .. } => Some((key.as_str(), *style)),
            _ => None,
        })
    }

    /// Whether this delta auto-fits the view.
    #[must_use]
    pub fn fits_view(&self) -> bool {
        self.ops.iter().any(|op| matches!(op, DrawOp::FitBounds(_)))
    }
}
