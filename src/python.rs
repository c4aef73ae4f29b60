use crate::config::WaterfallConfig;
use crate::core::compositor::CompositeReport;
use crate::core::measurement::MeasurementOutcome;
use crate::core::WaterfallEngine;
use crate::io::{MarkerStore, MemoryPingSource};
use crate::types::{GeoPosition, InteractionMode, Marker, NavState, PingLine, WaterfallError};
use numpy::{PyReadonlyArray1, ToPyArray};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;
use std::path::Path;
use std::sync::Arc;

fn to_py_err(e: WaterfallError) -> PyErr {
    match e {
        WaterfallError::InvalidParameter(_) | WaterfallError::NoLineAtPointer { .. } => {
            PyValueError::new_err(e.to_string())
        }
        _ => PyRuntimeError::new_err(e.to_string()),
    }
}

fn parse_mode(mode: &str) -> PyResult<InteractionMode> {
    match mode.to_lowercase().as_str() {
        "none" => Ok(InteractionMode::None),
        "info" => Ok(InteractionMode::Info),
        "mark" => Ok(InteractionMode::Mark),
        "measure" => Ok(InteractionMode::Measure),
        "measure_height" => Ok(InteractionMode::MeasureHeight),
        _ => Err(PyValueError::new_err(format!("Invalid interaction mode: {}", mode))),
    }
}

fn marker_dict(py: Python, m: &Marker) -> PyResult<PyObject> {
    let d = PyDict::new(py);
    d.set_item("label", &m.label)?;
    d.set_item("timestamp_ms", m.timestamp_ms)?;
    d.set_item("lat_deg", m.lat_rad.to_degrees())?;
    d.set_item("lon_deg", m.lon_rad.to_degrees())?;
    if let Some(s) = &m.sidescan {
        d.set_item("distance_to_nadir", s.distance_to_nadir)?;
        d.set_item("width_meters", s.width_meters)?;
        d.set_item("version", s.version)?;
    }
    Ok(d.into())
}

fn report_dict(py: Python, r: &CompositeReport) -> PyResult<PyObject> {
    let d = PyDict::new(py);
    d.set_item("received", r.received)?;
    d.set_item("duplicates", r.duplicates)?;
    d.set_item("empty", r.empty)?;
    d.set_item("drawn", r.drawn)?;
    d.set_item("total_shift", r.total_shift)?;
    d.set_item("rows_shifted", r.rows_shifted)?;
    d.set_item("evicted", r.commit.evicted)?;
    Ok(d.into())
}

fn outcome_dict(py: Python, o: &MeasurementOutcome) -> PyResult<PyObject> {
    let d = PyDict::new(py);
    match o {
        MeasurementOutcome::Idle => d.set_item("kind", "idle")?,
        MeasurementOutcome::Info(info) => {
            d.set_item("kind", "info")?;
            d.set_item("lat_deg", info.location.lat_degrees())?;
            d.set_item("lon_deg", info.location.lon_degrees())?;
            d.set_item("depth", info.depth)?;
            d.set_item("altitude", info.altitude)?;
            d.set_item("roll_deg", info.roll_deg)?;
            d.set_item("yaw_deg", info.yaw_deg)?;
            d.set_item("horizontal_range", info.horizontal_range)?;
            d.set_item("slant_range", info.slant_range)?;
            d.set_item("in_water_column", info.in_water_column)?;
        }
        MeasurementOutcome::PointAdded { count } => {
            d.set_item("kind", "point")?;
            d.set_item("count", *count)?;
        }
        MeasurementOutcome::Distance { horizontal, slant } => {
            d.set_item("kind", "distance")?;
            d.set_item("horizontal", *horizontal)?;
            d.set_item("slant", *slant)?;
        }
        MeasurementOutcome::HeightAnchor => d.set_item("kind", "height_anchor")?,
        MeasurementOutcome::Height { meters, fixed } => {
            d.set_item("kind", "height")?;
            d.set_item("meters", *meters)?;
            d.set_item("fixed", *fixed)?;
        }
        MeasurementOutcome::MarkBox(mark) | MeasurementOutcome::MarkPending(mark) => {
            let kind = if matches!(o, MeasurementOutcome::MarkBox(_)) { "mark_box" } else { "mark_pending" };
            d.set_item("kind", kind)?;
            d.set_item("origin", mark.origin())?;
            d.set_item("size", (mark.width_px(), mark.height_px()))?;
        }
    }
    Ok(d.into())
}

/// In-memory ping collection fed from Python
#[pyclass(name = "PingSource")]
#[derive(Clone, Default)]
struct PyPingSource {
    inner: MemoryPingSource,
}

#[pymethods]
impl PyPingSource {
    #[new]
    fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::too_many_arguments)]
    #[pyo3(signature = (timestamp_ms, subsystem_id, range, samples, lat_deg, lon_deg, altitude, depth=0.0, roll=0.0, yaw=0.0, speed=0.0))]
    fn add_ping(
        &mut self,
        timestamp_ms: i64,
        subsystem_id: u32,
        range: f64,
        samples: PyReadonlyArray1<f64>,
        lat_deg: f64,
        lon_deg: f64,
        altitude: f64,
        depth: f64,
        roll: f64,
        yaw: f64,
        speed: f64,
    ) {
        let nav = NavState {
            position: GeoPosition::from_degrees(lat_deg, lon_deg),
            altitude,
            depth,
            roll,
            pitch: 0.0,
            yaw,
            speed,
        };
        let samples = samples.as_array().to_vec();
        self.inner
            .push(PingLine::new(timestamp_ms, subsystem_id, range, samples, nav));
    }

    fn __len__(&self) -> usize {
        self.inner.len()
    }
}

#[pyclass(name = "WaterfallEngine")]
struct PyWaterfallEngine {
    inner: WaterfallEngine,
}

#[pymethods]
impl PyWaterfallEngine {
    #[new]
    /// Markers persist under `log_dir` when given, else under the platform data dir for `session`
    #[pyo3(signature = (source, subsystem_id, width, height, log_dir=None, session=None))]
    fn new(
        source: PyRef<PyPingSource>,
        subsystem_id: u32,
        width: usize,
        height: usize,
        log_dir: Option<String>,
        session: Option<String>,
    ) -> PyResult<Self> {
        let mut inner = WaterfallEngine::new(
            Arc::new(source.inner.clone()),
            subsystem_id,
            width,
            height,
            WaterfallConfig::default(),
        )
        .map_err(to_py_err)?;
        let store = match (log_dir, session) {
            (Some(dir), _) => Some(MarkerStore::for_log_dir(Path::new(&dir))),
            (None, Some(session)) => Some(MarkerStore::for_session(&session)),
            (None, None) => None,
        };
        if let Some(store) = store {
            inner = inner.with_marker_store(store).map_err(to_py_err)?;
        }
        Ok(Self { inner })
    }

    fn advance(&mut self, py: Python, prev_ts: i64, cur_ts: i64) -> PyResult<PyObject> {
        let report = self.inner.advance(prev_ts, cur_ts).map_err(to_py_err)?;
        report_dict(py, &report)
    }

    /// Waterfall raster as a (height, width, 3) uint8 array
    fn image(&self, py: Python) -> PyObject {
        self.inner.image().to_pyarray(py).into()
    }

    fn set_interaction_mode(&mut self, mode: &str) -> PyResult<()> {
        self.inner.set_interaction_mode(parse_mode(mode)?);
        Ok(())
    }

    fn set_zoom_enabled(&mut self, enabled: bool) {
        self.inner.set_zoom_enabled(enabled);
    }

    fn set_timeline_running(&mut self, running: bool) {
        self.inner.set_timeline_running(running);
    }

    fn set_gain_params(&mut self, normalization: f64, tvg: f64, window_min: f64, window_width: f64) -> PyResult<()> {
        self.inner
            .set_gain_params(normalization, tvg, window_min, window_width)
            .map_err(to_py_err)
    }

    fn set_auto_gain(&mut self, enabled: bool) -> PyResult<()> {
        self.inner.set_auto_gain(enabled).map_err(to_py_err)
    }

    fn set_log_decompression(&mut self, enabled: bool, factor: f64) -> PyResult<()> {
        self.inner.set_log_decompression(enabled, factor).map_err(to_py_err)
    }

    fn set_slant_correction(&mut self, enabled: bool) -> PyResult<()> {
        self.inner.set_slant_correction(enabled).map_err(to_py_err)
    }

    fn set_speed_correction(&mut self, enabled: bool) -> PyResult<()> {
        self.inner.set_speed_correction(enabled).map_err(to_py_err)
    }

    fn pointer_moved(&mut self, py: Python, x: i32, y: i32) -> PyResult<PyObject> {
        let outcome = self.inner.pointer_moved(x, y);
        outcome_dict(py, &outcome)
    }

    fn pointer_pressed(&mut self, py: Python, x: i32, y: i32) -> PyResult<PyObject> {
        let outcome = self.inner.pointer_pressed(x, y).map_err(to_py_err)?;
        outcome_dict(py, &outcome)
    }

    fn pointer_released(&mut self, py: Python, x: i32, y: i32) -> PyResult<PyObject> {
        let outcome = self.inner.pointer_released(x, y);
        outcome_dict(py, &outcome)
    }

    fn confirm_mark(&mut self, py: Python, label: &str) -> PyResult<PyObject> {
        let marker = self.inner.confirm_mark(label).map_err(to_py_err)?;
        marker_dict(py, &marker)
    }

    fn cancel_mark(&mut self) {
        self.inner.cancel_mark();
    }

    fn add_marker(&mut self, label: &str, timestamp_ms: i64, lat_deg: f64, lon_deg: f64) -> PyResult<()> {
        self.inner
            .add_marker(Marker::new(label, timestamp_ms, lat_deg.to_radians(), lon_deg.to_radians()))
            .map_err(to_py_err)
    }

    fn remove_marker(&mut self, label: &str, timestamp_ms: i64) -> PyResult<bool> {
        self.inner
            .remove_marker(&Marker::new(label, timestamp_ms, 0.0, 0.0))
            .map_err(to_py_err)
    }

    fn get_markers(&self, py: Python) -> PyResult<Vec<PyObject>> {
        self.inner.get_markers().iter().map(|m| marker_dict(py, m)).collect()
    }

    /// Commit horizontal corrections for every legacy marker; returns how many changed
    fn fix_old_marks(&mut self) -> PyResult<usize> {
        let session = self.inner.fix_old_marks().map_err(to_py_err)?;
        self.inner.resolve_correction(session.commit()).map_err(to_py_err)
    }

    fn zoom_view(&self, py: Python) -> Option<PyObject> {
        self.inner.zoom_view().map(|z| z.image.to_pyarray(py).into())
    }

    fn resize(&mut self, width: usize, height: usize) -> PyResult<()> {
        self.inner.resize(width, height).map_err(to_py_err)
    }
}

/// Python module definition
#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_class::<PyPingSource>()?;
    m.add_class::<PyWaterfallEngine>()?;
    Ok(())
}
