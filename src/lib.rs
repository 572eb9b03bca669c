//! Spillwatch - vessel anomaly relay.
//!
//! Runs an external detector process, extracts the JSON records it prints
//! between sentinel markers, and fans them out to WebSocket subscribers.
//! A command-line viewer turns the stream back into map drawing operations.
//!
//! # Architecture
//!
//! - **Supervisor** - owns the producer process; start on demand, restart on exit
//! - **Framing** - sentinel-delimited record extraction from raw stdout bytes
//! - **Hub** - subscriber registry and record fan-out
//! - **Server** - axum adapter: subscriptions, artifacts, status
//! - **Session** - per-viewer visual state machine
//!
//! # Modules
//!
//! - [`supervisor`] - producer lifecycle
//! - [`framing`] - frame extraction
//! - [`hub`] - broadcast
//! - [`session`] - viewer state
//! - [`config`] - configuration loading/saving

// Library modules
pub mod framing;
pub mod hub;
pub mod record;
pub mod server;
pub mod session;
pub mod supervisor;
pub mod viewer;
pub mod ws;

pub mod config;
pub mod constants;
pub mod env;

// Re-export commonly used types
pub use config::{Config, ProducerConfig};
pub use framing::{FrameExtractor, SentinelBuffer};
pub use hub::{BroadcastHub, Subscription};
pub use record::{Record, RecordUpdate};
pub use session::{SessionState, VisualDelta};
pub use supervisor::{ProducerState, Supervisor, SupervisorOptions};
