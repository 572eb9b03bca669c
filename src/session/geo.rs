//! Geographic primitives for view fitting.

use serde::Serialize;

use crate::constants::{AUTO_FIT_MAX_ZOOM, AUTO_FIT_PADDING_PX};

/// A point in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatLng {
    /// Latitude.
    pub lat: f64,
    /// Longitude.
    pub lon: f64,
}

impl LatLng {
    /// Construct a point.
    #[must_use]
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

impl From<(f64, f64)> for LatLng {
    fn from((lat, lon): (f64, f64)) -> Self {
        Self { lat, lon }
    }
}

/// Axis-aligned lat/lon rectangle. Never empty: it always covers at least
/// one point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bounds {
    /// Minimum latitude and longitude.
    pub south_west: LatLng,
    /// Maximum latitude and longitude.
    pub north_east: LatLng,
}

impl Bounds {
    /// Bounds covering a single point.
    #[must_use]
    pub fn at(point: LatLng) -> Self {
        Self {
            south_west: point,
            north_east: point,
        }
    }

    /// Smallest bounds covering every point, or `None` if there are none.
    pub fn covering(points: impl IntoIterator<Item = LatLng>) -> Option<Self> {
        let mut points = points.into_iter();
        let mut bounds = Self::at(points.next()?);
        for point in points {
            bounds.extend(point);
        }
        Some(bounds)
    }

    /// Grow to include `point`.
    pub fn extend(&mut self, point: LatLng) {
        self.south_west.lat = self.south_west.lat.min(point.lat);
        self.south_west.lon = self.south_west.lon.min(point.lon);
        self.north_east.lat = self.north_east.lat.max(point.lat);
        self.north_east.lon = self.north_east.lon.max(point.lon);
    }

    /// Whether `point` lies inside (edges included).
    #[must_use]
    pub fn contains(&self, point: LatLng) -> bool {
        (self.south_west.lat..=self.north_east.lat).contains(&point.lat)
            && (self.south_west.lon..=self.north_east.lon).contains(&point.lon)
    }
}

/// A request to fit the view to some bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ViewFit {
    /// Area to show.
    pub bounds: Bounds,
    /// Upper zoom limit, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_zoom: Option<u8>,
    /// Padding around the bounds, in pixels.
    pub padding_px: u16,
}

impl ViewFit {
    /// Auto-fit after each record: capped zoom and padded edges.
    #[must_use]
    pub fn auto(bounds: Bounds) -> Self {
        Self {
            bounds,
            max_zoom: Some(AUTO_FIT_MAX_ZOOM),
            padding_px: AUTO_FIT_PADDING_PX,
        }
    }

    /// Explicit fit with no zoom cap and no padding.
    #[must_use]
    pub fn exact(bounds: Bounds) -> Self {
        Self {
            bounds,
            max_zoom: None,
            padding_px: 0,
        }
    }
}
