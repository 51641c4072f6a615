// THEORY:
// This file is the main entry point for the `depth_scene` library crate.
// It defines the public API exposed to robot controllers and other consumers.
//
// The high-level interface is the `NavPipeline` (with `NavConfig` and `NavReport`),
// which runs the per-frame chain: depth frames are levelled by the plane fitter,
// fused into an overhead height map, searched for people, and colour frames feed face
// probes and the background subtractor. `NavService` puts one pipeline behind a tokio
// actor. The component modules (`core_modules`) stay public so callers that need a
// single stage, such as a calibration tool running only the plane fitter, can use it
// directly.

pub mod core_modules;
pub mod error;
pub mod params;
pub mod pipeline;
pub mod service;

pub use error::{Error, Result};
pub use params::{ParamSet, Tunable};
pub use pipeline::{FrameSet, NavConfig, NavPipeline, NavReport};
pub use service::NavService;
