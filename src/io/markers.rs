use crate::types::{ColorMapId, Marker, SidescanMarkInfo, WaterfallError, WaterfallResult};
use chrono::{TimeZone, Utc};
use quick_xml::de::from_str;
use quick_xml::se::to_string;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename = "markers")]
struct MarkerDocument {
    #[serde(rename = "@session", default)]
    session: String,
    #[serde(rename = "marker", default)]
    markers: Vec<MarkerRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MarkerRecord {
    #[serde(rename = "@label")]
    label: String,
    #[serde(rename = "@timestamp")]
    timestamp_ms: i64,
    #[serde(rename = "@time", default)]
    time: String,
    #[serde(rename = "@lat")]
    lat_rad: f64,
    #[serde(rename = "@lon")]
    lon_rad: f64,
    #[serde(rename = "sidescan", default)]
    sidescan: Vec<SidescanRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SidescanRecord {
    #[serde(rename = "@distanceToNadir")]
    distance_to_nadir: f64,
    #[serde(rename = "@y", default)]
    y_px: i64,
    #[serde(rename = "@w", default)]
    box_width_px: u32,
    #[serde(rename = "@h", default)]
    box_height_px: u32,
    #[serde(rename = "@wMeters", default)]
    width_meters: f64,
    #[serde(rename = "@subsystem", default)]
    subsystem_id: u32,
    #[serde(rename = "@colormap", default)]
    colormap: String,
    /// Files written before correction tracking have no version
    #[serde(rename = "@version", default)]
    version: u32,
}

fn rfc3339(timestamp_ms: i64) -> String {
    Utc.timestamp_millis_opt(timestamp_ms)
        .single()
        .map(|t| t.to_rfc3339())
        .unwrap_or_default()
}

impl From<&Marker> for MarkerRecord {
    fn from(m: &Marker) -> Self {
        Self {
            label: m.label.clone(),
            timestamp_ms: m.timestamp_ms,
            time: rfc3339(m.timestamp_ms),
            lat_rad: m.lat_rad,
            lon_rad: m.lon_rad,
            sidescan: m
                .sidescan
                .iter()
                .map(|s| SidescanRecord {
                    distance_to_nadir: s.distance_to_nadir,
                    y_px: s.y_px,
                    box_width_px: s.box_width_px,
                    box_height_px: s.box_height_px,
                    width_meters: s.width_meters,
                    subsystem_id: s.subsystem_id,
                    colormap: s.colormap_id.to_string(),
                    version: s.version,
                })
                .collect(),
        }
    }
}

impl From<MarkerRecord> for Marker {
    fn from(r: MarkerRecord) -> Self {
        let sidescan = r.sidescan.into_iter().next().map(|s| {
            let colormap_id = if s.colormap.is_empty() {
                ColorMapId::default()
            } else {
                s.colormap.parse().unwrap_or_else(|e| {
                    log::warn!("Marker '{}': {}; using default colormap", r.label, e);
                    ColorMapId::default()
                })
            };
            SidescanMarkInfo {
                distance_to_nadir: s.distance_to_nadir,
                y_px: s.y_px,
                box_width_px: s.box_width_px,
                box_height_px: s.box_height_px,
                width_meters: s.width_meters,
                subsystem_id: s.subsystem_id,
                colormap_id,
                version: s.version,
            }
        });
        Marker {
            label: r.label,
            timestamp_ms: r.timestamp_ms,
            lat_rad: r.lat_rad,
            lon_rad: r.lon_rad,
            sidescan,
        }
    }
}

/// Marker file for one log session
///
/// One XML document per session:
///
/// ```xml
/// <markers session="dive-03">
///   <marker label="rock" timestamp="1700000000000" time="2023-11-14T22:13:20+00:00" lat="0.71" lon="-0.15">
///     <sidescan distanceToNadir="12.4" y="40" w="20" h="10" wMeters="3.1" subsystem="0" colormap="Bronze" version="1"/>
///   </marker>
/// </markers>
/// ```
#[derive(Debug, Clone)]
pub struct MarkerStore {
    path: PathBuf,
    session: String,
}

impl MarkerStore {
    pub fn new(path: impl Into<PathBuf>, session: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            session: session.into(),
        }
    }

    /// `<log_dir>/mra/marks.xml`
    pub fn for_log_dir(log_dir: &Path) -> Self {
        let session = log_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::new(log_dir.join("mra").join("marks.xml"), session)
    }

    /// `<base>/sonarfall/<session>/marks.xml`
    pub fn for_session_in(base: &Path, session: &str) -> Self {
        Self::new(base.join("sonarfall").join(session).join("marks.xml"), session)
    }

    /// Session without a log directory, stored under the platform data dir
    pub fn for_session(session: &str) -> Self {
        let base = dirs::data_dir().unwrap_or_else(std::env::temp_dir);
        Self::for_session_in(&base, session)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    /// Read the session's markers; a missing file is an empty collection
    pub fn load(&self) -> WaterfallResult<Vec<Marker>> {
        if !self.path.exists() {
            log::debug!("No marker file at {}", self.path.display());
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)?;
        let doc: MarkerDocument = from_str(&content).map_err(|e| {
            WaterfallError::Persistence(format!("Failed to parse {}: {}", self.path.display(), e))
        })?;

        let markers: Vec<Marker> = doc.markers.into_iter().map(Marker::from).collect();
        log::info!(
            "Loaded {} markers ({} legacy) from {}",
            markers.len(),
            markers.iter().filter(|m| m.is_legacy_sidescan()).count(),
            self.path.display()
        );
        Ok(markers)
    }

    /// Write the full collection, in order
    pub fn save(&self, markers: &[Marker]) -> WaterfallResult<()> {
        let doc = MarkerDocument {
            session: self.session.clone(),
            markers: markers.iter().map(MarkerRecord::from).collect(),
        };
        let xml = to_string(&doc)
            .map_err(|e| WaterfallError::Persistence(format!("Failed to serialize markers: {}", e)))?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, xml)?;
        log::info!("Saved {} markers to {}", markers.len(), self.path.display());
        Ok(())
    }
}
