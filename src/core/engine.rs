use crate::config::WaterfallConfig;
use crate::core::compositor::{CompositeReport, Compositor};
use crate::core::geometry::ruler_step;
use crate::core::line_store::LineStore;
use crate::core::marker_corrector::{CorrectionOutcome, CorrectionSession, MarkerCorrector};
use crate::core::measurement::{marker_overlays, MarkerOverlay, MeasurementEngine, MeasurementOutcome};
use crate::core::radiometric::{GainParams, RadiometricPipeline};
use crate::core::scheduler::{Debounced, Scheduler};
use crate::core::zoom::{ZoomRenderer, ZoomView, ZoomWindow};
use crate::io::markers::MarkerStore;
use crate::io::source::PingSource;
use crate::types::{ColorMapId, InteractionMode, Marker, Raster, WaterfallError, WaterfallResult};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

/// Notifications emitted by the engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Advanced { from_ts: i64, to_ts: i64, report: CompositeReport },
    /// Buffer and stored lines were dropped
    Cleared,
    ModeChanged(InteractionMode),
    SettingsChanged,
    MarkerAdded(Marker),
    MarkerRemoved(Marker),
    MarkersCorrected(usize),
    /// Pointer has rested for the debounce interval; visible-window work can run
    PointerSettled { x: i32, y: i32 },
    /// Pointer idle long enough to hide transient affordances
    PointerIdle,
}

/// Command surface offered to a viewer
///
/// The viewer drives the engine with time advances, settings and pointer events.
/// The engine reports back through return values and an [`EngineEvent`] channel;
/// it never calls into the viewer.
pub struct WaterfallEngine {
    source: Arc<dyn PingSource>,
    subsystem_id: u32,
    config: WaterfallConfig,
    store: Arc<LineStore>,
    compositor: Compositor,
    pipeline: RadiometricPipeline,
    measurement: MeasurementEngine,
    zoom: ZoomRenderer,
    markers: Vec<Marker>,
    marker_store: Option<MarkerStore>,
    pointer: Option<(i32, i32)>,
    /// Paused zoom lines, resolved once the pointer settles
    zoom_window: Arc<RwLock<Option<ZoomWindow>>>,
    recompute: Debounced,
    fade: Debounced,
    _scheduler: Scheduler,
    events_tx: Sender<EngineEvent>,
    events_rx: Receiver<EngineEvent>,
}

impl WaterfallEngine {
    pub fn new(
        source: Arc<dyn PingSource>,
        subsystem_id: u32,
        width: usize,
        height: usize,
        config: WaterfallConfig,
    ) -> WaterfallResult<Self> {
        config.validate()?;
        let subsystems = source.subsystem_ids();
        if !subsystems.is_empty() && !subsystems.contains(&subsystem_id) {
            return Err(WaterfallError::InvalidParameter(format!(
                "Subsystem {} not in source (available: {:?})",
                subsystem_id, subsystems
            )));
        }

        let scheduler = Scheduler::new()?;
        let recompute = scheduler.debounced(Duration::from_millis(config.pointer_debounce_ms));
        let fade = scheduler.debounced(Duration::from_millis(config.fade_timeout_ms));
        let (events_tx, events_rx) = mpsc::channel();

        let pipeline = RadiometricPipeline::new(config.radiometric_settings());
        let mut config = config;
        config.auto_gain = pipeline.settings().auto_gain;
        config.log_decompression = pipeline.settings().log_decompression;

        log::info!(
            "🌊 Waterfall engine for subsystem {} ({}x{}), colormap {}",
            subsystem_id,
            width,
            height,
            config.colormap
        );

        Ok(Self {
            source,
            subsystem_id,
            compositor: Compositor::with_params(width, height, config.compositor_params()),
            zoom: ZoomRenderer::with_params(config.zoom_params()),
            config,
            store: Arc::new(LineStore::new()),
            pipeline,
            measurement: MeasurementEngine::new(),
            markers: Vec::new(),
            marker_store: None,
            pointer: None,
            zoom_window: Arc::new(RwLock::new(None)),
            recompute,
            fade,
            _scheduler: scheduler,
            events_tx,
            events_rx,
        })
    }

    /// Persist markers through `store` and load what it already holds
    pub fn with_marker_store(mut self, store: MarkerStore) -> WaterfallResult<Self> {
        self.markers = store.load()?;
        self.marker_store = Some(store);
        Ok(self)
    }

    fn emit(&self, event: EngineEvent) {
        // The receiver lives as long as the engine
        let _ = self.events_tx.send(event);
    }

    pub fn events(&self) -> &Receiver<EngineEvent> {
        &self.events_rx
    }

    pub fn drain_events(&self) -> Vec<EngineEvent> {
        self.events_rx.try_iter().collect()
    }

    pub fn config(&self) -> &WaterfallConfig {
        &self.config
    }

    pub fn subsystem_id(&self) -> u32 {
        self.subsystem_id
    }

    pub fn line_store(&self) -> &LineStore {
        &self.store
    }

    pub fn image(&self) -> &Raster {
        self.compositor.buffer()
    }

    pub fn width(&self) -> usize {
        self.compositor.width()
    }

    pub fn height(&self) -> usize {
        self.compositor.height()
    }

    /// Across-track range and tick spacing for the ruler
    pub fn ruler(&self) -> (f64, u32) {
        let range = self.compositor.range_for_ruler();
        (range, ruler_step(range))
    }

    fn composite_window(&mut self, from_ts: i64, to_ts: i64) -> WaterfallResult<CompositeReport> {
        let params = self.pipeline.request_params(&self.config.gain_params());
        let lines = self
            .source
            .get_lines_between(from_ts, to_ts, self.subsystem_id, &params)?;
        Ok(self.compositor.advance(lines, &self.store, &self.pipeline))
    }

    /// Composite pings in `(prev_ts, cur_ts]`
    ///
    /// A backwards jump of the timeline clears the waterfall.
    pub fn advance(&mut self, prev_ts: i64, cur_ts: i64) -> WaterfallResult<CompositeReport> {
        self.measurement.on_frame();
        if cur_ts < prev_ts {
            log::debug!("Timeline moved back ({} -> {}), clearing", prev_ts, cur_ts);
            self.clear();
            return Ok(CompositeReport::default());
        }
        if cur_ts == prev_ts {
            return Ok(CompositeReport::default());
        }

        let report = self.composite_window(prev_ts, cur_ts)?;
        self.emit(EngineEvent::Advanced {
            from_ts: prev_ts,
            to_ts: cur_ts,
            report: report.clone(),
        });
        Ok(report)
    }

    pub fn clear(&mut self) {
        self.compositor.clear(&self.store);
        self.emit(EngineEvent::Cleared);
    }

    /// `(oldest - 1, newest]` of the retained lines
    fn visible_window(&self) -> Option<(i64, i64)> {
        let snapshot = self.store.snapshot();
        let oldest = snapshot.first()?.timestamp_ms;
        let newest = snapshot.last()?.timestamp_ms;
        Some((oldest - 1, newest))
    }

    /// Re-render the visible time window with the current settings
    fn rebuild(&mut self) -> WaterfallResult<()> {
        let window = self.visible_window();

        self.clear();
        if let Some((from_ts, to_ts)) = window {
            let report = self.composite_window(from_ts, to_ts)?;
            log::debug!("Rebuilt {} lines between {} and {}", report.drawn, from_ts, to_ts);
        }
        self.emit(EngineEvent::SettingsChanged);
        Ok(())
    }

    fn rebuild_pipeline(&mut self) -> WaterfallResult<()> {
        self.pipeline = RadiometricPipeline::new(self.config.radiometric_settings());
        let resolved = self.pipeline.settings();
        self.config.auto_gain = resolved.auto_gain;
        self.config.log_decompression = resolved.log_decompression;
        self.rebuild()
    }

    pub fn resize(&mut self, width: usize, height: usize) -> WaterfallResult<()> {
        let window = self.visible_window();
        self.reset_zoom_window();

        self.compositor.resize(width, height, &self.store);
        self.emit(EngineEvent::Cleared);
        if let Some((from_ts, to_ts)) = window {
            self.composite_window(from_ts, to_ts)?;
        }
        Ok(())
    }

    pub fn interaction_mode(&self) -> InteractionMode {
        self.measurement.mode()
    }

    pub fn set_interaction_mode(&mut self, mode: InteractionMode) {
        self.measurement.set_mode(mode);
        self.emit(EngineEvent::ModeChanged(mode));
    }

    pub fn set_zoom_enabled(&mut self, enabled: bool) {
        self.measurement.set_zoom_enabled(enabled);
    }

    pub fn set_timeline_running(&mut self, running: bool) {
        self.measurement.set_timeline_running(running);
    }

    pub fn set_gain_params(
        &mut self,
        normalization: f64,
        tvg_gain: f64,
        window_min: f64,
        window_width: f64,
    ) -> WaterfallResult<()> {
        let mut candidate = self.config.clone();
        candidate.set_gain_params(&GainParams {
            normalization,
            tvg_gain,
            window_min,
            window_width,
        });
        candidate.validate()?;
        self.config = candidate;
        self.rebuild()
    }

    /// Enabling automatic gain turns logarithmic decompression off
    pub fn set_auto_gain(&mut self, enabled: bool) -> WaterfallResult<()> {
        self.config.auto_gain = enabled;
        if enabled {
            self.config.log_decompression = false;
        }
        self.rebuild_pipeline()
    }

    /// Enabling logarithmic decompression turns automatic gain off
    pub fn set_log_decompression(&mut self, enabled: bool, factor: f64) -> WaterfallResult<()> {
        if enabled && !(factor > 0.0) {
            return Err(WaterfallError::InvalidParameter(format!(
                "decompression factor must be positive, got {}",
                factor
            )));
        }
        self.config.log_decompression = enabled;
        self.config.log_decompression_factor = factor;
        if enabled {
            self.config.auto_gain = false;
        }
        self.rebuild_pipeline()
    }

    pub fn set_slant_correction(&mut self, enabled: bool) -> WaterfallResult<()> {
        self.config.slant_range_correction = enabled;
        self.rebuild_pipeline()
    }

    pub fn set_speed_correction(&mut self, enabled: bool) -> WaterfallResult<()> {
        self.config.speed_correction = enabled;
        self.compositor.set_speed_correction(enabled);
        self.rebuild()
    }

    pub fn set_colormap(&mut self, colormap: ColorMapId) -> WaterfallResult<()> {
        self.config.colormap = colormap;
        self.rebuild_pipeline()
    }

    fn reset_zoom_window(&self) {
        *self.zoom_window.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Line window the paused zoom draws, once the pointer has settled
    pub fn zoom_window(&self) -> Option<ZoomWindow> {
        *self.zoom_window.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn schedule_pointer_tasks(&self, x: i32, y: i32) {
        let tx = self.events_tx.clone();
        let store = Arc::clone(&self.store);
        let cache = Arc::clone(&self.zoom_window);
        let zoom = self.zoom;
        let (width, height) = (self.compositor.width(), self.compositor.height());
        self.recompute.schedule(move || {
            let window = zoom.line_window((x, y), width, height, &store);
            log::trace!("Pointer settled at ({}, {}): {:?}", x, y, window);
            *cache.write().unwrap_or_else(PoisonError::into_inner) = window;
            let _ = tx.send(EngineEvent::PointerSettled { x, y });
        });
        let tx = self.events_tx.clone();
        self.fade.schedule(move || {
            let _ = tx.send(EngineEvent::PointerIdle);
        });
    }

    pub fn pointer_moved(&mut self, x: i32, y: i32) -> MeasurementOutcome {
        self.pointer = Some((x, y));
        self.schedule_pointer_tasks(x, y);
        self.measurement
            .pointer_moved(x, y, &self.store, self.compositor.width())
    }

    pub fn pointer_pressed(&mut self, x: i32, y: i32) -> WaterfallResult<MeasurementOutcome> {
        self.pointer = Some((x, y));
        self.measurement
            .pointer_pressed(x, y, &self.store, self.compositor.width())
    }

    pub fn pointer_released(&mut self, x: i32, y: i32) -> MeasurementOutcome {
        self.pointer = Some((x, y));
        self.measurement.pointer_released(x, y)
    }

    /// Pointer left the waterfall
    pub fn pointer_exited(&mut self) {
        self.pointer = None;
        self.recompute.cancel();
        self.fade.cancel();
        self.reset_zoom_window();
    }

    /// Label the pending box and store the resulting marker
    pub fn confirm_mark(&mut self, label: &str) -> WaterfallResult<Marker> {
        let marker = self
            .measurement
            .confirm_mark(label, self.compositor.width(), self.config.colormap)?;
        self.add_marker(marker.clone())?;
        Ok(marker)
    }

    pub fn cancel_mark(&mut self) {
        self.measurement.cancel_mark();
    }

    pub fn zoom_view(&self) -> Option<ZoomView> {
        if !self.measurement.state().zoom_enabled {
            return None;
        }
        let pointer = self.pointer?;
        let window = self.zoom_window();
        self.zoom.render(
            pointer,
            self.measurement.is_timeline_running(),
            self.compositor.buffer(),
            &self.store,
            window.as_ref(),
            self.compositor.range_for_ruler(),
        )
    }

    fn persist(&self) -> WaterfallResult<()> {
        match &self.marker_store {
            Some(store) => store.save(&self.markers),
            None => Ok(()),
        }
    }

    pub fn add_marker(&mut self, marker: Marker) -> WaterfallResult<()> {
        if marker.label.trim().is_empty() {
            return Err(WaterfallError::InvalidParameter("marker label is empty".to_string()));
        }
        if self.markers.iter().any(|m| m.same_identity(&marker)) {
            return Err(WaterfallError::InvalidState(format!(
                "marker '{}' at {} ms already exists",
                marker.label, marker.timestamp_ms
            )));
        }

        self.markers.push(marker.clone());
        if let Err(e) = self.persist() {
            self.markers.pop();
            return Err(e);
        }
        self.emit(EngineEvent::MarkerAdded(marker));
        Ok(())
    }

    /// Remove by label and timestamp; returns whether anything was removed
    pub fn remove_marker(&mut self, marker: &Marker) -> WaterfallResult<bool> {
        let Some(pos) = self.markers.iter().position(|m| m.same_identity(marker)) else {
            return Ok(false);
        };
        let removed = self.markers.remove(pos);
        if let Err(e) = self.persist() {
            self.markers.insert(pos, removed);
            return Err(e);
        }
        self.emit(EngineEvent::MarkerRemoved(removed));
        Ok(true)
    }

    pub fn get_markers(&self) -> Vec<Marker> {
        self.markers.clone()
    }

    /// Where stored markers fall on the current buffer
    pub fn marker_overlays(&self) -> Vec<MarkerOverlay> {
        marker_overlays(&self.markers, &self.store, self.compositor.width())
    }

    /// Start correcting legacy markers against the retained lines
    pub fn fix_old_marks(&self) -> WaterfallResult<CorrectionSession> {
        MarkerCorrector::prepare(&self.markers, &self.store)
    }

    /// Apply the caller's decision on a correction session
    ///
    /// Returns the number of markers replaced.
    pub fn resolve_correction(&mut self, outcome: CorrectionOutcome) -> WaterfallResult<usize> {
        match outcome {
            CorrectionOutcome::Committed(corrected) => {
                let previous = self.markers.clone();
                let mut replaced = 0;
                for marker in corrected {
                    if let Some(slot) = self.markers.iter_mut().find(|m| m.same_identity(&marker)) {
                        *slot = marker;
                        replaced += 1;
                    }
                }
                if let Err(e) = self.persist() {
                    self.markers = previous;
                    return Err(e);
                }
                log::info!("Corrected {} legacy marks", replaced);
                self.emit(EngineEvent::MarkersCorrected(replaced));
                Ok(replaced)
            }
            CorrectionOutcome::Cancelled => Ok(0),
            CorrectionOutcome::Preview { .. } => Err(WaterfallError::InvalidState(
                "correction must be committed or cancelled".to_string(),
            )),
        }
    }

    pub fn save_markers(&self) -> WaterfallResult<()> {
        match &self.marker_store {
            Some(store) => store.save(&self.markers),
            None => Err(WaterfallError::InvalidState("no marker store configured".to_string())),
        }
    }

    pub fn load_markers(&mut self) -> WaterfallResult<usize> {
        let store = self
            .marker_store
            .as_ref()
            .ok_or_else(|| WaterfallError::InvalidState("no marker store configured".to_string()))?;
        self.markers = store.load()?;
        Ok(self.markers.len())
    }
}
