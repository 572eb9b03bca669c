//! Application-wide constants for spillwatch.
//!
//! Defaults for values that are also configurable live here so the config
//! layer, the supervisor and the tests agree on them. Constants are grouped
//! by the component that owns them.

use std::time::Duration;

// ============================================================================
// Producer stream framing
// ============================================================================

/// Literal that opens an embedded record in the producer's stdout.
pub const START_SENTINEL: &str = "JSON_START";

/// Literal that closes an embedded record in the producer's stdout.
pub const END_SENTINEL: &str = "JSON_END";

/// Maximum number of unconsumed bytes kept between frames.
///
/// A producer that never emits a closing sentinel would otherwise grow the
/// buffer without bound. Exceeding this forces a supervised restart.
pub const DEFAULT_MAX_BUFFER_BYTES: usize = 1024 * 1024;

/// How much of an undecodable payload is echoed into the log.
pub const LOGGED_PAYLOAD_LIMIT: usize = 256;

// ============================================================================
// Producer supervision
// ============================================================================

/// Flat delay between a producer exit and the next launch.
pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(5);

/// Read buffer size for the producer's stdout.
pub const STDOUT_READ_BUFFER: usize = 8 * 1024;

/// Default producer program.
pub const DEFAULT_PRODUCER_PROGRAM: &str = "python";

/// Default producer script, passed as the only argument.
pub const DEFAULT_PRODUCER_SCRIPT: &str = "final.py";

/// Default working directory of the producer, relative to the server's cwd.
pub const DEFAULT_PRODUCER_DIR: &str = "python_scripts";

/// Directory (inside the producer's working directory) holding artifacts.
pub const DEFAULT_ARTIFACT_SUBDIR: &str = "oil_spill_images";

// ============================================================================
// Server
// ============================================================================

/// Default HTTP/WebSocket listen address.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:3000";

/// Event name carried by every record update sent to viewers.
pub const RECORD_EVENT: &str = "anomaly-data";

/// URL prefix under which artifacts are served.
pub const ARTIFACT_ROUTE_PREFIX: &str = "/artifacts";

// ============================================================================
// Viewer map state
// ============================================================================

/// Initial map center (latitude, longitude), restored on loop restart.
pub const INITIAL_VIEW_CENTER: (f64, f64) = (33.1, -78.9);

/// Initial map zoom, restored on loop restart.
pub const INITIAL_VIEW_ZOOM: u8 = 9;

/// Zoom cap applied when auto-fitting to the session bounds.
pub const AUTO_FIT_MAX_ZOOM: u8 = 10;

/// Padding in pixels applied when auto-fitting to the session bounds.
pub const AUTO_FIT_PADDING_PX: u16 = 50;

/// Radius in meters of the ring drawn around an anomaly marker.
pub const HIGHLIGHT_RING_RADIUS_M: f64 = 20.0;

/// Radius in meters of the overlay drawn for a suspected spill.
pub const SPILL_OVERLAY_RADIUS_M: f64 = 500.0;

/// Notice shown when focusing on anomalies before any were seen.
pub const NOTHING_TO_FOCUS_NOTICE: &str = "No anomalies detected yet.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinels_are_distinct_and_not_prefixes() {
        assert_ne!(START_SENTINEL, END_SENTINEL);
        assert!(!START_SENTINEL.starts_with(END_SENTINEL));
        assert!(!END_SENTINEL.starts_with(START_SENTINEL));
    }

    #[test]
    fn test_restart_delay_is_reasonable() {
        assert!(DEFAULT_RESTART_DELAY >= Duration::from_secs(1));
        assert!(DEFAULT_RESTART_DELAY <= Duration::from_secs(60));
    }

    #[test]
    fn test_buffer_limit_exceeds_read_buffer() {
        // A single read must never overflow an empty buffer on its own.
        assert!(DEFAULT_MAX_BUFFER_BYTES > STDOUT_READ_BUFFER);
    }

    #[test]
    fn test_auto_fit_zoom_not_below_initial_view() {
        assert!(AUTO_FIT_MAX_ZOOM >= INITIAL_VIEW_ZOOM);
    }

    #[test]
    fn test_spill_overlay_larger_than_highlight_ring() {
        assert!(SPILL_OVERLAY_RADIUS_M > HIGHLIGHT_RING_RADIUS_M);
    }
}
