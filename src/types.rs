use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};

/// Composited waterfall image (rows x columns x RGB)
pub type Raster = Array3<u8>;

/// A single colormapped pixel row (columns x RGB)
pub type Strip = Array2<u8>;

/// WGS84 semi-major axis in meters
pub const WGS84_A: f64 = 6_378_137.0;
/// WGS84 first eccentricity squared
pub const WGS84_E2: f64 = 0.00669437999014;

/// Geographic position (radians, WGS84)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GeoPosition {
    pub lat_rad: f64,
    pub lon_rad: f64,
}

impl GeoPosition {
    pub fn new(lat_rad: f64, lon_rad: f64) -> Self {
        Self { lat_rad, lon_rad }
    }

    pub fn from_degrees(lat_deg: f64, lon_deg: f64) -> Self {
        Self::new(lat_deg.to_radians(), lon_deg.to_radians())
    }

    pub fn lat_degrees(&self) -> f64 {
        self.lat_rad.to_degrees()
    }

    pub fn lon_degrees(&self) -> f64 {
        self.lon_rad.to_degrees()
    }

    /// Meridian and prime-vertical radii of curvature at a latitude
    fn radii(lat_rad: f64) -> (f64, f64) {
        let s = lat_rad.sin();
        let w = (1.0 - WGS84_E2 * s * s).sqrt();
        let meridian = WGS84_A * (1.0 - WGS84_E2) / (w * w * w);
        let normal = WGS84_A / w;
        (meridian, normal)
    }

    /// Move this position by a local north/east offset in meters
    pub fn offset_by(&self, north_m: f64, east_m: f64) -> Self {
        let (meridian, normal) = Self::radii(self.lat_rad);
        let lat_rad = self.lat_rad + north_m / meridian;
        let cos_lat = self.lat_rad.cos().max(1e-12);
        let lon_rad = self.lon_rad + east_m / (normal * cos_lat);
        Self { lat_rad, lon_rad }
    }

    /// Local (north, east) displacement in meters from `self` to `other`
    pub fn displacement_to(&self, other: &GeoPosition) -> (f64, f64) {
        let mean_lat = 0.5 * (self.lat_rad + other.lat_rad);
        let (meridian, normal) = Self::radii(mean_lat);
        let north = (other.lat_rad - self.lat_rad) * meridian;
        let east = (other.lon_rad - self.lon_rad) * normal * mean_lat.cos();
        (north, east)
    }

    /// Horizontal distance in meters on the local tangent plane
    pub fn horizontal_distance_to(&self, other: &GeoPosition) -> f64 {
        let (n, e) = self.displacement_to(other);
        (n * n + e * e).sqrt()
    }
}

/// Vehicle navigation state sampled at ping time
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NavState {
    pub position: GeoPosition,
    /// Altitude above the seafloor (meters)
    pub altitude: f64,
    /// Depth below the surface (meters)
    pub depth: f64,
    /// Radians
    pub roll: f64,
    /// Radians
    pub pitch: f64,
    /// Heading in radians, clockwise from north
    pub yaw: f64,
    /// Forward speed over ground (m/s)
    pub speed: f64,
}

/// One decoded sidescan ping
#[derive(Debug, Clone)]
pub struct PingLine {
    pub timestamp_ms: i64,
    pub subsystem_id: u32,
    /// Maximum slant range per side (meters)
    pub range: f64,
    /// Port samples first, starboard last; nadir at the centre
    pub samples: Vec<f64>,
    pub nav: NavState,
    /// Rows this line occupies in the waterfall (assigned at composite time)
    pub y_size: u32,
    pub is_slant_corrected: bool,
    /// Colormapped strip at native sample resolution (assigned at composite time)
    pub corrected_strip: Option<Strip>,
}

impl PingLine {
    pub fn new(timestamp_ms: i64, subsystem_id: u32, range: f64, samples: Vec<f64>, nav: NavState) -> Self {
        Self {
            timestamp_ms,
            subsystem_id,
            range,
            samples,
            nav,
            y_size: 1,
            is_slant_corrected: false,
            corrected_strip: None,
        }
    }

    pub fn x_size(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Colormaps available for the waterfall
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ColorMapId {
    #[default]
    Bronze,
    Grayscale,
    Jet,
    BrownToWhite,
}

impl std::fmt::Display for ColorMapId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColorMapId::Bronze => write!(f, "Bronze"),
            ColorMapId::Grayscale => write!(f, "Grayscale"),
            ColorMapId::Jet => write!(f, "Jet"),
            ColorMapId::BrownToWhite => write!(f, "BrownToWhite"),
        }
    }
}

impl std::str::FromStr for ColorMapId {
    type Err = WaterfallError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bronze" => Ok(ColorMapId::Bronze),
            "grayscale" | "greyscale" | "gray" => Ok(ColorMapId::Grayscale),
            "jet" => Ok(ColorMapId::Jet),
            "browntowhite" => Ok(ColorMapId::BrownToWhite),
            _ => Err(WaterfallError::InvalidParameter(format!("Unknown colormap: {}", s))),
        }
    }
}

/// Marker correction status
pub const MARK_VERSION_SLANT: u32 = 0;
pub const MARK_VERSION_HORIZONTAL: u32 = 1;

/// Sidescan-specific marker fields
#[derive(Debug, Clone, PartialEq)]
pub struct SidescanMarkInfo {
    /// Signed across-track distance (negative is port)
    pub distance_to_nadir: f64,
    /// Image row at marking time
    pub y_px: i64,
    pub box_width_px: u32,
    pub box_height_px: u32,
    pub width_meters: f64,
    pub subsystem_id: u32,
    pub colormap_id: ColorMapId,
    /// 0 = legacy slant-referenced, 1 = horizontal-corrected
    pub version: u32,
}

impl SidescanMarkInfo {
    pub fn is_legacy(&self) -> bool {
        self.version < MARK_VERSION_HORIZONTAL
    }
}

/// User-placed annotation
#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    pub label: String,
    pub timestamp_ms: i64,
    pub lat_rad: f64,
    pub lon_rad: f64,
    pub sidescan: Option<SidescanMarkInfo>,
}

impl Marker {
    /// Plain time marker without sidescan geometry
    pub fn new(label: impl Into<String>, timestamp_ms: i64, lat_rad: f64, lon_rad: f64) -> Self {
        Self {
            label: label.into(),
            timestamp_ms,
            lat_rad,
            lon_rad,
            sidescan: None,
        }
    }

    pub fn location(&self) -> GeoPosition {
        GeoPosition::new(self.lat_rad, self.lon_rad)
    }

    /// Markers are identified by label and timestamp
    pub fn same_identity(&self, other: &Marker) -> bool {
        self.label == other.label && self.timestamp_ms == other.timestamp_ms
    }

    pub fn is_legacy_sidescan(&self) -> bool {
        self.sidescan.as_ref().map(|s| s.is_legacy()).unwrap_or(false)
    }
}

/// Waterfall interaction modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InteractionMode {
    None,
    #[default]
    Info,
    Mark,
    Measure,
    MeasureHeight,
}

/// Error types for waterfall processing
#[derive(Debug, thiserror::Error)]
pub enum WaterfallError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Degenerate geometry: slant distance {slant} <= altitude {altitude}")]
    GeometryDegenerate { slant: f64, altitude: f64 },

    #[error("No sidescan line under pointer at ({x}, {y})")]
    NoLineAtPointer { x: i32, y: i32 },

    #[error("Ping at {timestamp_ms} ms has no sample data")]
    EmptySampleData { timestamp_ms: i64 },

    #[error("Duplicate ping timestamp {timestamp_ms} ms")]
    DuplicateTimestamp { timestamp_ms: i64 },

    #[error("No bracketing lines for marker '{label}'")]
    UncorrectableMarker { label: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Ping source error: {0}")]
    Source(String),
}

/// Result type for waterfall operations
pub type WaterfallResult<T> = Result<T, WaterfallError>;
