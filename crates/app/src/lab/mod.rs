//! Face capture lab: grabs frames, finds the face, compresses each frame with
//! two codecs and tracks how faithful the reconstructions are over time.
//!
//! The module is split into focused submodules:
//! - `config`: CLI configuration parsing.
//! - `pipeline`: Supervisor and the capture → detect → measure loop.
//! - `processing`: Face detection and the face crop.
//! - `encoding`: Codec round trips and stream JPEG encoding.
//! - `series`: Epoch-tagged, time-ordered metrics series.
//! - `state`: Shared source, series and latest frames.
//! - `preview`: Single-frame renders of each processing step.
//! - `server`: Actix Web endpoints.
//! - `sweep`: One-shot quality sweep.
//! - `watchdog`: Stall detection for pipeline stages.
//! - `data`: Shared structs passed between stages.
//! - `annotation`: Drawing primitives for the live view.

/// Re-export settings so callers can configure runs without reaching into
/// submodules.
pub use config::{LabCliArgs, LabConfig, SweepArgs, SweepConfig, TelemetryOptions};
/// Serve the live lab with a ready-made configuration.
pub use pipeline::run;
/// Measure both codecs across a range of qualities on one frame.
pub use sweep::run_sweep;
pub(crate) use telemetry::install as install_telemetry;

mod annotation;
mod config;
mod context;
mod data;
mod encoding;
mod pipeline;
mod preview;
mod processing;
mod series;
mod server;
mod state;
mod sweep;
mod telemetry;
mod watchdog;
