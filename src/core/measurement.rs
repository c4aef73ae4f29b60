use crate::core::geometry::{
    distance_between, height_between, horizontal_distance_checked, horizontal_distance_from_index,
    index_from_distance,
    pixel_x_from_sample_index, point_from_index, sample_index_from_pixel_x, slant_distance_between,
    SidescanPoint,
};
use crate::core::line_store::{LineStore, PlacedLine};
use crate::types::{
    ColorMapId, GeoPosition, InteractionMode, Marker, SidescanMarkInfo, WaterfallError, WaterfallResult,
    MARK_VERSION_HORIZONTAL,
};

/// Maximum points held in MEASURE mode
pub const MAX_MEASURE_POINTS: usize = 2;

/// A pointer press resolved onto a line
#[derive(Debug, Clone)]
pub struct MeasurePoint {
    pub x: i32,
    pub y: i32,
    pub line: PlacedLine,
    pub point: SidescanPoint,
}

impl MeasurePoint {
    fn resolve(x: i32, y: i32, store: &LineStore, width: usize) -> WaterfallResult<Self> {
        let line = store
            .line_at_row(y as i64)
            .ok_or(WaterfallError::NoLineAtPointer { x, y })?;
        let index = sample_index_from_pixel_x(x, &line, width);
        let point = point_from_index(index, &line, line.is_slant_corrected);
        Ok(Self { x, y, line, point })
    }
}

/// Mode plus per-mode scratch state
#[derive(Debug, Clone, Default)]
pub struct InteractionState {
    pub mode: InteractionMode,
    pub zoom_enabled: bool,
    pub point_buffer: Vec<MeasurePoint>,
}

/// Box being drawn in MARK mode, centred on the press point
#[derive(Debug, Clone)]
pub struct MarkBox {
    pub anchor_x: i32,
    pub anchor_y: i32,
    pub pointer_x: i32,
    pub pointer_y: i32,
    anchor_line: PlacedLine,
}

impl MarkBox {
    pub fn width_px(&self) -> u32 {
        (self.pointer_x - self.anchor_x).unsigned_abs() * 2
    }

    pub fn height_px(&self) -> u32 {
        (self.pointer_y - self.anchor_y).unsigned_abs() * 2
    }

    /// Top-left corner in image pixels
    pub fn origin(&self) -> (i32, i32) {
        (
            self.anchor_x - (self.pointer_x - self.anchor_x).abs(),
            self.anchor_y - (self.pointer_y - self.anchor_y).abs(),
        )
    }

    pub fn anchor_timestamp(&self) -> i64 {
        self.anchor_line.timestamp_ms
    }
}

/// Navigation readout for the line under the pointer
#[derive(Debug, Clone, PartialEq)]
pub struct InfoReadout {
    pub timestamp_ms: i64,
    /// Horizontal-corrected location under the pointer
    pub location: GeoPosition,
    pub depth: f64,
    pub altitude: f64,
    pub roll_deg: f64,
    pub yaw_deg: f64,
    /// Ground distance from the vehicle to the horizontal location
    pub horizontal_range: f64,
    /// Ground distance from the vehicle to the uncorrected location
    pub slant_range: f64,
    /// Sample lies before the first bottom return; `location` is clamped to nadir
    pub in_water_column: bool,
}

impl InfoReadout {
    pub fn for_pointer(x: i32, line: &PlacedLine, width: usize) -> Self {
        let index = sample_index_from_pixel_x(x, line, width);
        let horizontal = point_from_index(index, line, true);
        let slant = point_from_index(index, line, false);
        let fix = line.nav.position;
        let in_water_column = match horizontal_distance_checked(index, line) {
            Ok(_) => false,
            Err(e) => {
                log::debug!("Pointer at column {}: {}", x, e);
                true
            }
        };
        Self {
            timestamp_ms: line.timestamp_ms,
            location: horizontal.location,
            depth: line.nav.depth,
            altitude: line.nav.altitude,
            roll_deg: line.nav.roll.to_degrees(),
            yaw_deg: line.nav.yaw.to_degrees(),
            horizontal_range: fix.horizontal_distance_to(&horizontal.location),
            slant_range: fix.horizontal_distance_to(&slant.location),
            in_water_column,
        }
    }
}

/// Result of a pointer event
#[derive(Debug, Clone)]
pub enum MeasurementOutcome {
    /// Nothing to show
    Idle,
    Info(InfoReadout),
    /// First measurement point placed
    PointAdded { count: usize },
    Distance { horizontal: f64, slant: f64 },
    /// First height point placed
    HeightAnchor,
    /// Height from the anchor to the pointer (`fixed` once the second point is pressed)
    Height { meters: f64, fixed: bool },
    /// Box being dragged
    MarkBox(MarkBox),
    /// Box released and waiting for [`MeasurementEngine::confirm_mark`]
    MarkPending(MarkBox),
}

/// Interaction state machine
#[derive(Debug, Default)]
pub struct MeasurementEngine {
    state: InteractionState,
    timeline_running: bool,
    height_anchor: Option<MeasurePoint>,
    height_x: Option<i32>,
    mark_box: Option<MarkBox>,
    pending_mark: Option<MarkBox>,
}

impl MeasurementEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &InteractionState {
        &self.state
    }

    pub fn mode(&self) -> InteractionMode {
        self.state.mode
    }

    pub fn pending_mark(&self) -> Option<&MarkBox> {
        self.pending_mark.as_ref()
    }

    pub fn height_anchor(&self) -> Option<&MeasurePoint> {
        self.height_anchor.as_ref()
    }

    fn clear_measurements(&mut self) {
        self.state.point_buffer.clear();
        self.height_anchor = None;
        self.height_x = None;
    }

    pub fn set_mode(&mut self, mode: InteractionMode) {
        if mode != self.state.mode {
            log::debug!("Interaction mode {:?} -> {:?}", self.state.mode, mode);
        }
        self.state.mode = mode;
        self.clear_measurements();
        self.mark_box = None;
        self.pending_mark = None;
    }

    pub fn set_zoom_enabled(&mut self, enabled: bool) {
        self.state.zoom_enabled = enabled;
    }

    pub fn set_timeline_running(&mut self, running: bool) {
        self.timeline_running = running;
        if running {
            self.clear_measurements();
            self.mark_box = None;
        }
    }

    pub fn is_timeline_running(&self) -> bool {
        self.timeline_running
    }

    /// Per-frame housekeeping; measurements only live while paused
    pub fn on_frame(&mut self) {
        if self.timeline_running {
            self.clear_measurements();
        }
    }

    pub fn pointer_moved(&mut self, x: i32, y: i32, store: &LineStore, width: usize) -> MeasurementOutcome {
        match self.state.mode {
            InteractionMode::Info => match store.line_at_row(y as i64) {
                Some(line) => MeasurementOutcome::Info(InfoReadout::for_pointer(x, &line, width)),
                None => MeasurementOutcome::Idle,
            },
            InteractionMode::Mark => match self.mark_box.as_mut() {
                Some(mark) => {
                    mark.pointer_x = x;
                    mark.pointer_y = y;
                    MeasurementOutcome::MarkBox(mark.clone())
                }
                None => MeasurementOutcome::Idle,
            },
            InteractionMode::MeasureHeight if !self.timeline_running => {
                match (&self.height_anchor, self.height_x) {
                    (Some(anchor), None) => {
                        let index = sample_index_from_pixel_x(x, &anchor.line, width);
                        MeasurementOutcome::Height {
                            meters: height_between(anchor.point.index, index, &anchor.line),
                            fixed: false,
                        }
                    }
                    _ => MeasurementOutcome::Idle,
                }
            }
            _ => MeasurementOutcome::Idle,
        }
    }

    /// Primary button press
    ///
    /// Fails with `NoLineAtPointer` (state untouched) when an action needs a line
    /// and none is under the pointer.
    pub fn pointer_pressed(
        &mut self,
        x: i32,
        y: i32,
        store: &LineStore,
        width: usize,
    ) -> WaterfallResult<MeasurementOutcome> {
        match self.state.mode {
            InteractionMode::None => Ok(MeasurementOutcome::Idle),
            InteractionMode::Info => Ok(self.pointer_moved(x, y, store, width)),
            InteractionMode::Mark => {
                if self.timeline_running {
                    return Err(WaterfallError::InvalidState(
                        "cannot place marks while the timeline is playing".to_string(),
                    ));
                }
                let anchor_line = store.line_at_row(y as i64).ok_or_else(|| {
                    log::warn!("Marking where no line was found below the pointer ({}, {})", x, y);
                    WaterfallError::NoLineAtPointer { x, y }
                })?;
                let mark = MarkBox {
                    anchor_x: x,
                    anchor_y: y,
                    pointer_x: x,
                    pointer_y: y,
                    anchor_line,
                };
                self.pending_mark = None;
                self.mark_box = Some(mark.clone());
                Ok(MeasurementOutcome::MarkBox(mark))
            }
            InteractionMode::Measure => {
                if self.timeline_running {
                    return Ok(MeasurementOutcome::Idle);
                }
                let point = MeasurePoint::resolve(x, y, store, width)?;
                let buffer = &mut self.state.point_buffer;
                if buffer.len() >= MAX_MEASURE_POINTS {
                    buffer.clear();
                }
                buffer.push(point);

                if let [a, b] = buffer.as_slice() {
                    let horizontal = distance_between(a.point.index, &a.line, b.point.index, &b.line);
                    let slant = slant_distance_between(a.point.index, &a.line, b.point.index, &b.line);
                    log::debug!("Measured {:.3} m (slant {:.3} m)", horizontal, slant);
                    Ok(MeasurementOutcome::Distance { horizontal, slant })
                } else {
                    Ok(MeasurementOutcome::PointAdded { count: buffer.len() })
                }
            }
            InteractionMode::MeasureHeight => {
                if self.timeline_running {
                    return Ok(MeasurementOutcome::Idle);
                }
                if self.height_anchor.is_some() && self.height_x.is_some() {
                    self.height_anchor = None;
                    self.height_x = None;
                }
                if let Some(anchor) = &self.height_anchor {
                    let index = sample_index_from_pixel_x(x, &anchor.line, width);
                    let meters = height_between(anchor.point.index, index, &anchor.line);
                    self.height_x = Some(x);
                    return Ok(MeasurementOutcome::Height { meters, fixed: true });
                }
                self.height_anchor = Some(MeasurePoint::resolve(x, y, store, width)?);
                Ok(MeasurementOutcome::HeightAnchor)
            }
        }
    }

    pub fn pointer_released(&mut self, x: i32, y: i32) -> MeasurementOutcome {
        match self.mark_box.take() {
            Some(mut mark) if self.state.mode == InteractionMode::Mark => {
                mark.pointer_x = x;
                mark.pointer_y = y;
                self.pending_mark = Some(mark.clone());
                MeasurementOutcome::MarkPending(mark)
            }
            _ => MeasurementOutcome::Idle,
        }
    }

    /// Turn the pending box into a horizontal-corrected marker
    ///
    /// Geometry comes from the line under the press point, not the release point.
    pub fn confirm_mark(&mut self, label: &str, width: usize, colormap: ColorMapId) -> WaterfallResult<Marker> {
        let label = label.trim();
        if label.is_empty() {
            return Err(WaterfallError::InvalidParameter("marker label is empty".to_string()));
        }
        let mark = self
            .pending_mark
            .take()
            .ok_or_else(|| WaterfallError::InvalidState("no mark awaiting a label".to_string()))?;

        let line = &mark.anchor_line;
        let ss_x = sample_index_from_pixel_x(mark.anchor_x, line, width);
        let point = point_from_index(ss_x, line, true);
        let distance_to_nadir = horizontal_distance_from_index(ss_x, line, true);

        let w_img = mark.width_px();
        let h_img = mark.height_px();
        let half = (w_img / 2) as i32;
        let port = sample_index_from_pixel_x(mark.anchor_x - half, line, width);
        let starboard = sample_index_from_pixel_x(mark.anchor_x + half, line, width);
        let width_meters =
            horizontal_distance_from_index(starboard, line, true) - horizontal_distance_from_index(port, line, true);

        log::info!(
            "Marker '{}' at {} ms, {:.2} m from nadir, {:.2} m wide",
            label,
            line.timestamp_ms,
            distance_to_nadir,
            width_meters
        );

        Ok(Marker {
            label: label.to_string(),
            timestamp_ms: line.timestamp_ms,
            lat_rad: point.location.lat_rad,
            lon_rad: point.location.lon_rad,
            sidescan: Some(SidescanMarkInfo {
                distance_to_nadir,
                y_px: mark.anchor_y as i64,
                box_width_px: w_img,
                box_height_px: h_img,
                width_meters,
                subsystem_id: line.subsystem_id,
                colormap_id: colormap,
                version: MARK_VERSION_HORIZONTAL,
            }),
        })
    }

    pub fn cancel_mark(&mut self) {
        self.mark_box = None;
        self.pending_mark = None;
    }
}

/// Where a stored marker lands on the current buffer
#[derive(Debug, Clone, PartialEq)]
pub enum MarkerOverlay {
    /// Sidescan box centred at `(x, y)`
    Box {
        label: String,
        x: i32,
        y: i64,
        width_px: i32,
        height_px: i32,
    },
    /// Time-only marker drawn across the row
    Row { label: String, y: i64 },
}

/// Place visible markers using the newer line of the pair that brackets each timestamp
pub fn marker_overlays(markers: &[Marker], store: &LineStore, width: usize) -> Vec<MarkerOverlay> {
    markers
        .iter()
        .filter_map(|marker| {
            let (_, line) = store.bracketing_pair(marker.timestamp_ms)?;
            let label = marker.label.clone();
            let Some(info) = &marker.sidescan else {
                return Some(MarkerOverlay::Row { label, y: line.y_pos });
            };

            let ss_x = index_from_distance(info.distance_to_nadir, &line, true);
            let x = pixel_x_from_sample_index(ss_x, &line, width);
            let mut width_px = info.box_width_px.max(3) as i32;
            let height_px = info.box_height_px.max(3) as i32;

            if info.box_width_px > 0 && info.width_meters > 0.0 {
                let half = info.width_meters / 2.0;
                let port = index_from_distance(info.distance_to_nadir - half, &line, true);
                let starboard = index_from_distance(info.distance_to_nadir + half, &line, true);
                width_px =
                    pixel_x_from_sample_index(starboard, &line, width) - pixel_x_from_sample_index(port, &line, width);
            }

            Some(MarkerOverlay::Box {
                label,
                x,
                y: line.y_pos,
                width_px,
                height_px,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NavState, PingLine};
    use approx::assert_abs_diff_eq;

    const WIDTH: usize = 200;

    fn store_with_lines(count: i64) -> LineStore {
        let store = LineStore::new();
        let origin = GeoPosition::from_degrees(41.18, -8.70);
        // Oldest first; newest ends up at row 0
        let batch = (0..count)
            .map(|i| {
                let nav = NavState {
                    position: origin.offset_by(i as f64 * 0.5, 0.0),
                    altitude: 5.0,
                    depth: 2.0,
                    roll: 0.05,
                    speed: 1.5,
                    ..Default::default()
                };
                let mut line = PingLine::new(i * 100, 3, 20.0, vec![0.5; 400], nav);
                line.is_slant_corrected = true;
                (line, count - 1 - i)
            })
            .collect();
        store.commit_batch(batch, count as u32, 500);
        store
    }

    #[test]
    fn test_measure_buffer_never_exceeds_two() {
        let store = store_with_lines(20);
        let mut engine = MeasurementEngine::new();
        engine.set_mode(InteractionMode::Measure);

        let first = engine.pointer_pressed(150, 2, &store, WIDTH).unwrap();
        assert!(matches!(first, MeasurementOutcome::PointAdded { count: 1 }));

        let second = engine.pointer_pressed(170, 12, &store, WIDTH).unwrap();
        match second {
            MeasurementOutcome::Distance { horizontal, slant } => {
                assert!(horizontal > 0.0);
                assert!(slant > 0.0);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(engine.state().point_buffer.len(), 2);

        engine.pointer_pressed(160, 5, &store, WIDTH).unwrap();
        assert_eq!(engine.state().point_buffer.len(), 1);
    }

    #[test]
    fn test_measure_without_line_is_rejected() {
        let store = store_with_lines(5);
        let mut engine = MeasurementEngine::new();
        engine.set_mode(InteractionMode::Measure);
        engine.pointer_pressed(150, 1, &store, WIDTH).unwrap();

        let err = engine.pointer_pressed(150, 300, &store, WIDTH).unwrap_err();
        assert!(matches!(err, WaterfallError::NoLineAtPointer { x: 150, y: 300 }));
        assert_eq!(engine.state().point_buffer.len(), 1);
    }

    #[test]
    fn test_mode_switch_and_playback_clear_buffers() {
        let store = store_with_lines(10);
        let mut engine = MeasurementEngine::new();
        engine.set_mode(InteractionMode::Measure);
        engine.pointer_pressed(150, 1, &store, WIDTH).unwrap();
        engine.set_mode(InteractionMode::MeasureHeight);
        assert!(engine.state().point_buffer.is_empty());

        engine.pointer_pressed(150, 1, &store, WIDTH).unwrap();
        assert!(engine.height_anchor().is_some());
        engine.set_timeline_running(true);
        engine.on_frame();
        assert!(engine.height_anchor().is_none());

        let outcome = engine.pointer_pressed(150, 1, &store, WIDTH).unwrap();
        assert!(matches!(outcome, MeasurementOutcome::Idle));
    }

    #[test]
    fn test_height_workflow() {
        let store = store_with_lines(10);
        let mut engine = MeasurementEngine::new();
        engine.set_mode(InteractionMode::MeasureHeight);

        assert!(matches!(
            engine.pointer_pressed(160, 4, &store, WIDTH).unwrap(),
            MeasurementOutcome::HeightAnchor
        ));
        match engine.pointer_moved(180, 7, &store, WIDTH) {
            MeasurementOutcome::Height { meters, fixed } => {
                assert!(meters > 0.0);
                assert!(!fixed);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        match engine.pointer_pressed(180, 4, &store, WIDTH).unwrap() {
            MeasurementOutcome::Height { fixed, .. } => assert!(fixed),
            other => panic!("unexpected outcome {:?}", other),
        }
        // Third press starts over with a new anchor
        assert!(matches!(
            engine.pointer_pressed(150, 4, &store, WIDTH).unwrap(),
            MeasurementOutcome::HeightAnchor
        ));
    }

    #[test]
    fn test_info_readout() {
        let store = store_with_lines(10);
        let mut engine = MeasurementEngine::new();
        match engine.pointer_moved(180, 0, &store, WIDTH) {
            MeasurementOutcome::Info(info) => {
                assert_eq!(info.timestamp_ms, 900);
                assert_abs_diff_eq!(info.altitude, 5.0);
                assert_abs_diff_eq!(info.roll_deg, 0.05f64.to_degrees(), epsilon = 1e-9);
                assert!(info.horizontal_range < info.slant_range);
                assert!(!info.in_water_column);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(matches!(engine.pointer_moved(180, 400, &store, WIDTH), MeasurementOutcome::Idle));
    }

    #[test]
    fn test_info_readout_flags_water_column() {
        let store = store_with_lines(10);
        let line = store.line_at_row(0).unwrap();
        let nadir = InfoReadout::for_pointer(WIDTH as i32 / 2, &line, WIDTH);
        assert!(nadir.in_water_column);
        assert_abs_diff_eq!(nadir.horizontal_range, 0.0, epsilon = 1e-6);

        let far = InfoReadout::for_pointer(20, &line, WIDTH);
        assert!(!far.in_water_column);
    }

    #[test]
    fn test_mark_uses_anchor_line_and_horizontal_geometry() {
        let store = store_with_lines(20);
        let mut engine = MeasurementEngine::new();
        engine.set_mode(InteractionMode::Mark);

        engine.pointer_pressed(160, 3, &store, WIDTH).unwrap();
        engine.pointer_moved(170, 8, &store, WIDTH);
        let pending = engine.pointer_released(170, 8);
        let MeasurementOutcome::MarkPending(mark) = pending else {
            panic!("expected pending mark");
        };
        assert_eq!((mark.width_px(), mark.height_px()), (20, 10));
        assert_eq!(mark.origin(), (150, -2));

        let marker = engine.confirm_mark("rock", WIDTH, ColorMapId::Jet).unwrap();
        // Row 3 holds the line placed 3 rows below the newest
        assert_eq!(marker.timestamp_ms, 1600);
        let info = marker.sidescan.as_ref().unwrap();
        assert_eq!(info.version, MARK_VERSION_HORIZONTAL);
        assert_eq!(info.subsystem_id, 3);
        assert_eq!(info.colormap_id, ColorMapId::Jet);
        assert!(info.distance_to_nadir > 0.0);
        assert!(info.width_meters > 0.0);
        assert!(engine.pending_mark().is_none());

        let overlays = marker_overlays(&[marker], &store, WIDTH);
        match &overlays[0] {
            MarkerOverlay::Box { x, width_px, .. } => {
                assert!((x - 160).abs() <= 1);
                assert!((width_px - 20).abs() <= 2);
            }
            other => panic!("unexpected overlay {:?}", other),
        }
    }

    #[test]
    fn test_mark_rejections() {
        let store = store_with_lines(5);
        let mut engine = MeasurementEngine::new();
        engine.set_mode(InteractionMode::Mark);

        assert!(engine.pointer_pressed(100, 50, &store, WIDTH).is_err());
        assert!(engine.confirm_mark("x", WIDTH, ColorMapId::Bronze).is_err());

        engine.set_timeline_running(true);
        assert!(matches!(
            engine.pointer_pressed(100, 1, &store, WIDTH),
            Err(WaterfallError::InvalidState(_))
        ));
    }
}
