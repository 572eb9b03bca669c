//! Per-subscriber session state machine.
//!
//! A [`SessionState`] turns the record stream into map drawing instructions.
//! It is a plain value with no I/O: every viewer owns one, feeds it each
//! record with [`SessionState::apply`] and renders the returned
//! [`VisualDelta`].
//!
//! Markers are identified by a key derived from their position. The first
//! record of a session gets a start marker; its position doubles as the loop
//! sentinel. When that position comes around again the producer has started
//! another pass over its input, so the whole session is cleared and the
//! record becomes the start of a new one.

pub mod delta;
pub mod geo;

use std::collections::HashMap;

pub use delta::{DrawOp, MarkerStyle, PopupInfo, Status, StatusRow, VisualDelta};
pub use geo::{Bounds, LatLng, ViewFit};

use crate::constants::{
    ARTIFACT_ROUTE_PREFIX, HIGHLIGHT_RING_RADIUS_M, INITIAL_VIEW_CENTER, INITIAL_VIEW_ZOOM,
    NOTHING_TO_FOCUS_NOTICE, SPILL_OVERLAY_RADIUS_M,
};
use crate::record::Record;

const SPILL_OVERLAY_LABEL: &str = "Potential Oil Spill Detected";

/// Identity key of the marker for a position.
#[must_use]
pub fn marker_key(lat: f64, lon: f64) -> String {
    format!("{lat}-{lon}")
}

/// Answer to [`SessionState::focus_on_anomalies`].
#[derive(Debug, Clone, PartialEq)]
pub enum Focus {
    /// Fit the view to exactly the anomaly positions.
    Fit(ViewFit),
    /// No anomaly seen this session.
    NothingToFocus,
}

impl Focus {
    /// User-visible notice, if any.
    #[must_use]
    pub fn notice(&self) -> Option<&'static str> {
        match self {
            Self::Fit(_) => None,
            Self::NothingToFocus => Some(NOTHING_TO_FOCUS_NOTICE),
        }
    }
}

/// Visual state of one subscriber.
#[derive(Debug, Default)]
pub struct SessionState {
    markers: HashMap<String, MarkerStyle>,
    anomalies: Vec<LatLng>,
    bounds: Option<Bounds>,
    first_seen: Option<String>,
    current: Option<String>,
    interacted: bool,
    applied: u64,
}

impl SessionState {
    /// Fresh session with no markers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one record and return what must be drawn, in order.
    pub fn apply(&mut self, record: &Record) -> VisualDelta {
        let key = marker_key(record.lat, record.lon);
        let position = LatLng::new(record.lat, record.lon);
        let mut ops = Vec::new();

        if self.applied > 0 && self.first_seen.as_deref() == Some(key.as_str()) {
            log::debug!("[Session] Loop restart at {key}");
            self.reset(&mut ops);
        }
        self.applied += 1;

        let popup = PopupInfo::from(record);
        if self.markers.is_empty() {
            self.place(&mut ops, &key, position, MarkerStyle::Start, popup);
            self.first_seen = Some(key);
        } else if record.is_anomaly() {
            self.place(&mut ops, &key, position, MarkerStyle::Anomaly, popup.clone());
            ops.push(DrawOp::HighlightRing {
                key,
                center: position,
                radius_m: HIGHLIGHT_RING_RADIUS_M,
            });
            self.anomalies.push(position);

            if record.is_oil_spill() {
                ops.push(DrawOp::SpillOverlay {
                    center: position,
                    radius_m: SPILL_OVERLAY_RADIUS_M,
                    label: SPILL_OVERLAY_LABEL.to_string(),
                });
                match record.artifact_name() {
                    Some(name) => ops.push(DrawOp::ShowArtifact {
                        url: format!("{ARTIFACT_ROUTE_PREFIX}/{name}"),
                        details: popup,
                    }),
                    // An image from an earlier spill must not stay up.
                    None => ops.push(DrawOp::HideArtifact),
                }
            }
        } else {
            if let Some(previous) = self.current.take() {
                if previous != key {
                    if let Some(style) = self.markers.get_mut(&previous) {
                        *style = MarkerStyle::Trail;
                        ops.push(DrawOp::Restyle {
                            key: previous,
                            style: MarkerStyle::Trail,
                        });
                    }
                }
            }
            self.place(&mut ops, &key, position, MarkerStyle::Current, popup);
            self.current = Some(key);
        }

        let bounds = self.bounds.get_or_insert(Bounds::at(position));
        bounds.extend(position);
        if !self.interacted {
            ops.push(DrawOp::FitBounds(ViewFit::auto(*bounds)));
        }

        VisualDelta {
            ops,
            status: StatusRow::from(record),
        }
    }

    /// Record a manual pan or zoom. Auto-fit stays off until the next loop
    /// restart.
    pub fn mark_interacted(&mut self) {
        self.interacted = true;
    }

    /// View fit over every anomaly of this session.
    #[must_use]
    pub fn focus_on_anomalies(&self) -> Focus {
        Bounds::covering(self.anomalies.iter().copied())
            .map_or(Focus::NothingToFocus, |bounds| Focus::Fit(ViewFit::exact(bounds)))
    }

    /// Number of markers on the map.
    #[must_use]
    pub fn marker_count(&self) -> usize {
        self.markers.len()
    }

    /// Style of the marker for `key`, if it exists.
    #[must_use]
    pub fn marker_style(&self, key: &str) -> Option<MarkerStyle> {
        self.markers.get(key).copied()
    }

    /// Number of anomaly markers this session.
    #[must_use]
    pub fn anomaly_count(&self) -> usize {
        self.anomalies.len()
    }

    /// Accumulated bounds of this session.
    #[must_use]
    pub fn bounds(&self) -> Option<Bounds> {
        self.bounds
    }

    /// Key of the session's start marker.
    #[must_use]
    pub fn first_seen(&self) -> Option<&str> {
        self.first_seen.as_deref()
    }

    /// Key of the current-position marker.
    #[must_use]
    pub fn current_marker(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Whether auto-fit is suppressed.
    #[must_use]
    pub fn has_interacted(&self) -> bool {
        self.interacted
    }

    fn place(
        &mut self,
        ops: &mut Vec<DrawOp>,
        key: &str,
        position: LatLng,
        style: MarkerStyle,
        popup: PopupInfo,
    ) {
        // A replaced current marker stops being current.
        if style != MarkerStyle::Current && self.current.as_deref() == Some(key) {
            self.current = None;
        }
        self.markers.insert(key.to_string(), style);
        ops.push(DrawOp::PlaceMarker {
            key: key.to_string(),
            position,
            style,
            popup,
        });
    }

    fn reset(&mut self, ops: &mut Vec<DrawOp>) {
        ops.push(DrawOp::ClearAll);
        ops.push(DrawOp::ResetView {
            center: INITIAL_VIEW_CENTER.into(),
            zoom: INITIAL_VIEW_ZOOM,
        });
        ops.push(DrawOp::HideArtifact);

        self.markers.clear();
        self.anomalies.clear();
        self.bounds = None;
        self.first_seen = None;
        self.current = None;
        self.interacted = false;
    }
}
