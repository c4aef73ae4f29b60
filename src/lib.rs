//! sonarfall: sidescan sonar waterfall engine
//!
//! Composites a stream of sidescan pings into a scrolling waterfall raster with
//! slant-range and speed correction, and supports measurement and marking on the
//! corrected geometry.

pub mod types;
pub mod config;
pub mod io;
pub mod core;

#[cfg(feature = "python")]
mod python;

// Re-export main types
pub use types::{
    ColorMapId, GeoPosition, InteractionMode, Marker, NavState, PingLine, Raster, SidescanMarkInfo,
    WaterfallError, WaterfallResult,
};
pub use config::WaterfallConfig;
pub use io::{MarkerStore, MemoryPingSource, PingSource};
pub use core::{EngineEvent, WaterfallEngine};
