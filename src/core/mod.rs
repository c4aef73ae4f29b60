//! Waterfall processing stages

pub mod geometry;
pub mod line_store;
pub mod radiometric;
pub mod compositor;
pub mod measurement;
pub mod marker_corrector;
pub mod zoom;
pub mod scheduler;
pub mod engine;

// Re-export main types
pub use geometry::SidescanPoint;
pub use line_store::{LineStore, PlacedLine, BatchCommit};
pub use radiometric::{ColorMap, GainParams, HistogramNormalizer, IntensityMode, RadiometricPipeline, RadiometricSettings};
pub use compositor::{Compositor, CompositorParams, CompositeReport};
pub use measurement::{InfoReadout, InteractionState, MarkBox, MarkerOverlay, MeasurementEngine, MeasurementOutcome};
pub use marker_corrector::{CorrectionOutcome, CorrectionSession, MarkerCorrection, MarkerCorrector, PreviewSide};
pub use zoom::{ZoomParams, ZoomRenderer, ZoomView, ZoomWindow};
pub use scheduler::{Debounced, Scheduler};
pub use engine::{EngineEvent, WaterfallEngine};
