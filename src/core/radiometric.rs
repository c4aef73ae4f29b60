use crate::core::geometry::sample_index_from_pixel_x;
use crate::types::{ColorMapId, PingLine, Strip};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Manual gain parameters handed to the ping source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GainParams {
    /// Normalization ceiling applied to the per-side averages
    pub normalization: f64,
    /// Time-variable gain divisor (<= 0 disables TVG)
    pub tvg_gain: f64,
    /// Lower edge of the intensity window [0, 1]
    pub window_min: f64,
    /// Width of the intensity window [0, 1]
    pub window_width: f64,
}

impl Default for GainParams {
    fn default() -> Self {
        Self {
            normalization: 0.2,
            tvg_gain: 280.0,
            window_min: 0.0,
            window_width: 1.0,
        }
    }
}

impl GainParams {
    /// Neutral parameters requested while automatic gain is active
    pub fn histogram_default() -> Self {
        Self {
            normalization: 1.0,
            tvg_gain: 0.0,
            window_min: 0.0,
            window_width: 1.0,
        }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Per-side normalization, time-variable gain and intensity windowing
///
/// Does not touch the input slice.
pub fn apply_normalization_and_tvg(data: &[f64], params: &GainParams) -> Vec<f64> {
    let middle = data.len() / 2;
    if middle == 0 {
        return data.to_vec();
    }

    let (port, starboard) = data.split_at(middle);
    let norm = if params.normalization > 0.0 { params.normalization } else { 1.0 };
    let avg_port = port.iter().sum::<f64>() / (middle as f64 * norm);
    let avg_starboard = starboard.iter().sum::<f64>() / (middle as f64 * norm);

    let min_val = round2(params.window_min.clamp(0.0, 1.0));
    let max_val = round2((min_val + params.window_width.max(0.0)).clamp(0.0, 1.0));
    let windowed = (min_val > 0.0 || max_val < 1.0) && max_val > min_val;

    let half_sample = 0.5 / middle as f64;

    data.iter()
        .enumerate()
        .map(|(c, &sample)| {
            let (r, avg) = if c < middle {
                (c as f64 / middle as f64, avg_port)
            } else {
                (1.0 - (c - middle) as f64 / middle as f64, avg_starboard)
            };

            let boosted = if params.tvg_gain > 0.0 {
                let gain = (30.0 * r.max(half_sample).ln()).abs();
                sample * 10f64.powf(gain / params.tvg_gain)
            } else {
                sample
            };

            let mut v = if avg > 0.0 { boosted / avg } else { 0.0 };
            if windowed && v.is_finite() {
                v = (v - min_val) / (max_val - min_val);
            }
            v
        })
        .collect()
}

/// Empirical gain normalization (EGN) built from the subsystem's own data
///
/// Keeps the running mean intensity of every across-track sample index and
/// divides each new sample by it, which flattens beam pattern and range
/// attenuation without manual gain settings.
#[derive(Debug, Clone)]
pub struct HistogramNormalizer {
    sums: Vec<f64>,
    counts: Vec<u64>,
    /// Output level of a sample equal to its column mean
    target_level: f64,
}

impl Default for HistogramNormalizer {
    fn default() -> Self {
        Self {
            sums: Vec::new(),
            counts: Vec::new(),
            target_level: 0.5,
        }
    }
}

impl HistogramNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a set of lines
    pub fn from_lines<'a, I>(lines: I) -> Self
    where
        I: IntoIterator<Item = &'a PingLine>,
    {
        let mut normalizer = Self::new();
        for line in lines {
            normalizer.accumulate(&line.samples);
        }
        normalizer
    }

    /// Add one line of raw samples to the statistics
    pub fn accumulate(&mut self, samples: &[f64]) {
        if samples.is_empty() {
            return;
        }
        if samples.len() != self.sums.len() {
            if !self.sums.is_empty() {
                log::debug!(
                    "EGN statistics reset: line length changed {} -> {}",
                    self.sums.len(),
                    samples.len()
                );
            }
            self.sums = vec![0.0; samples.len()];
            self.counts = vec![0; samples.len()];
        }
        for (i, &s) in samples.iter().enumerate() {
            if s.is_finite() {
                self.sums[i] += s;
                self.counts[i] += 1;
            }
        }
    }

    pub fn mean_at(&self, index: usize) -> Option<f64> {
        match (self.sums.get(index), self.counts.get(index)) {
            (Some(&sum), Some(&count)) if count > 0 => Some(sum / count as f64),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.counts.iter().all(|&c| c == 0)
    }

    /// Remap samples to [0, 1]
    pub fn normalize(&self, samples: &[f64]) -> Vec<f64> {
        samples
            .iter()
            .enumerate()
            .map(|(i, &s)| match self.mean_at(i) {
                Some(mean) if mean > 0.0 && s.is_finite() => (s / mean * self.target_level).clamp(0.0, 1.0),
                _ => 0.0,
            })
            .collect()
    }
}

/// Logarithmic decompression of a log-compressed intensity in [0, 1]
pub fn decompress(sample: f64, factor: f64) -> f64 {
    if factor <= 0.0 || !sample.is_finite() {
        return sample;
    }
    ((1.0 + factor).powf(sample) - 1.0) / factor
}

/// Interpolated colormap over [0, 1]
#[derive(Debug)]
pub struct ColorMap {
    pub id: ColorMapId,
    stops: &'static [(f64, [u8; 3])],
}

const BRONZE_STOPS: &[(f64, [u8; 3])] = &[
    (0.0, [0, 0, 0]),
    (0.3, [94, 50, 21]),
    (0.6, [189, 115, 56]),
    (0.85, [236, 196, 125]),
    (1.0, [255, 255, 230]),
];

const GRAYSCALE_STOPS: &[(f64, [u8; 3])] = &[(0.0, [0, 0, 0]), (1.0, [255, 255, 255])];

const JET_STOPS: &[(f64, [u8; 3])] = &[
    (0.0, [0, 0, 255]),
    (0.25, [0, 255, 255]),
    (0.5, [255, 255, 0]),
    (0.75, [255, 0, 0]),
    (1.0, [128, 0, 0]),
];

const BROWN_TO_WHITE_STOPS: &[(f64, [u8; 3])] = &[
    (0.0, [61, 34, 14]),
    (0.5, [181, 140, 96]),
    (1.0, [255, 255, 255]),
];

static COLORMAPS: [ColorMap; 4] = [
    ColorMap { id: ColorMapId::Bronze, stops: BRONZE_STOPS },
    ColorMap { id: ColorMapId::Grayscale, stops: GRAYSCALE_STOPS },
    ColorMap { id: ColorMapId::Jet, stops: JET_STOPS },
    ColorMap { id: ColorMapId::BrownToWhite, stops: BROWN_TO_WHITE_STOPS },
];

impl ColorMap {
    pub fn get(id: ColorMapId) -> &'static ColorMap {
        match id {
            ColorMapId::Bronze => &COLORMAPS[0],
            ColorMapId::Grayscale => &COLORMAPS[1],
            ColorMapId::Jet => &COLORMAPS[2],
            ColorMapId::BrownToWhite => &COLORMAPS[3],
        }
    }

    /// Colour for a value in [0, 1]; out-of-range values saturate, NaN is the low end
    pub fn color(&self, value: f64) -> [u8; 3] {
        let v = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };

        let first = self.stops[0];
        if v <= first.0 {
            return first.1;
        }
        for pair in self.stops.windows(2) {
            let (p0, c0) = pair[0];
            let (p1, c1) = pair[1];
            if v <= p1 {
                let t = if p1 > p0 { (v - p0) / (p1 - p0) } else { 0.0 };
                let mut out = [0u8; 3];
                for k in 0..3 {
                    let a = c0[k] as f64;
                    let b = c1[k] as f64;
                    out[k] = (a + (b - a) * t).round().clamp(0.0, 255.0) as u8;
                }
                return out;
            }
        }
        self.stops[self.stops.len() - 1].1
    }

    /// Map a line of intensities to a 1xN strip
    pub fn colorize(&self, data: &[f64]) -> Strip {
        let mut strip = Array2::<u8>::zeros((data.len(), 3));
        for (i, &v) in data.iter().enumerate() {
            let [r, g, b] = self.color(v);
            strip[[i, 0]] = r;
            strip[[i, 1]] = g;
            strip[[i, 2]] = b;
        }
        strip
    }
}

/// How intensities are brought to [0, 1] before colour mapping
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IntensityMode {
    /// Manual gain only (already applied by the source)
    Manual,
    /// Empirical gain normalization
    AutoGain,
    /// Logarithmic decompression with the given factor
    LogDecompression(f64),
}

/// User-facing radiometric switches
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RadiometricSettings {
    pub colormap: ColorMapId,
    pub auto_gain: bool,
    pub log_decompression: bool,
    pub log_decompression_factor: f64,
    pub slant_range_correction: bool,
}

impl Default for RadiometricSettings {
    fn default() -> Self {
        Self {
            colormap: ColorMapId::Bronze,
            auto_gain: false,
            log_decompression: false,
            log_decompression_factor: 10.0,
            slant_range_correction: true,
        }
    }
}

impl RadiometricSettings {
    /// Automatic gain wins when both it and decompression are requested
    pub fn resolve(&mut self) -> IntensityMode {
        if self.auto_gain {
            if self.log_decompression {
                log::warn!("Automatic gain and logarithmic decompression both requested; disabling decompression");
                self.log_decompression = false;
            }
            IntensityMode::AutoGain
        } else if self.log_decompression {
            IntensityMode::LogDecompression(self.log_decompression_factor)
        } else {
            IntensityMode::Manual
        }
    }
}

/// Per-line intensity correction and colour mapping
#[derive(Debug, Clone)]
pub struct RadiometricPipeline {
    settings: RadiometricSettings,
    mode: IntensityMode,
}

impl RadiometricPipeline {
    pub fn new(mut settings: RadiometricSettings) -> Self {
        let mode = settings.resolve();
        Self { settings, mode }
    }

    pub fn settings(&self) -> &RadiometricSettings {
        &self.settings
    }

    pub fn mode(&self) -> IntensityMode {
        self.mode
    }

    /// Gain parameters to request from the source for this pipeline
    pub fn request_params(&self, user: &GainParams) -> GainParams {
        match self.mode {
            IntensityMode::AutoGain => GainParams::histogram_default(),
            _ => *user,
        }
    }

    /// Automatic gain or decompression, per the resolved mode
    pub fn correct_intensities(&self, samples: &[f64], normalizer: &HistogramNormalizer) -> Vec<f64> {
        match self.mode {
            IntensityMode::AutoGain => normalizer.normalize(samples),
            IntensityMode::LogDecompression(factor) => samples.iter().map(|&s| decompress(s, factor)).collect(),
            IntensityMode::Manual => samples.to_vec(),
        }
    }

    /// Colour-map a line and record whether it is slant corrected
    pub fn process(&self, line: &mut PingLine, normalizer: &HistogramNormalizer) {
        let data = self.correct_intensities(&line.samples, normalizer);
        line.corrected_strip = Some(ColorMap::get(self.settings.colormap).colorize(&data));
        line.is_slant_corrected = self.settings.slant_range_correction;
    }

    /// Resample a processed line to `width` image columns
    ///
    /// Each output column pulls the sample under it through the geometry
    /// transform, which is linear for uncorrected lines and the slant-to-horizontal
    /// remap for corrected ones.
    pub fn render_row(line: &PingLine, width: usize) -> Option<Strip> {
        let strip = line.corrected_strip.as_ref()?;
        if strip.nrows() == 0 || width == 0 {
            return None;
        }
        let mut row = Array2::<u8>::zeros((width, 3));
        for px in 0..width {
            let idx = sample_index_from_pixel_x(px as i32, line, width).min(strip.nrows() - 1);
            for k in 0..3 {
                row[[px, k]] = strip[[idx, k]];
            }
        }
        Some(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geometry::index_from_distance;
    use crate::types::NavState;
    use approx::assert_abs_diff_eq;

    fn ramp_line(n: usize) -> PingLine {
        let samples = (0..n).map(|i| 0.1 + (i as f64 / n as f64) * 0.5).collect();
        PingLine::new(
            0,
            0,
            20.0,
            samples,
            NavState {
                altitude: 5.0,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_normalization_and_tvg_is_finite() {
        let data = vec![0.4; 64];
        let out = apply_normalization_and_tvg(&data, &GainParams::default());
        assert_eq!(out.len(), 64);
        assert!(out.iter().all(|v| v.is_finite()));
        // Far range gets more gain than near range
        assert!(out[0] > out[31]);
        assert!(out[63] > out[32]);
    }

    #[test]
    fn test_neutral_params_only_normalize() {
        let data = vec![0.4; 10];
        let out = apply_normalization_and_tvg(&data, &GainParams::histogram_default());
        for v in out {
            assert_abs_diff_eq!(v, 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_egn_flattens_profile() {
        let a = ramp_line(32);
        let normalizer = HistogramNormalizer::from_lines([&a, &a]);
        let out = normalizer.normalize(&a.samples);
        for v in out {
            assert_abs_diff_eq!(v, 0.5, epsilon = 1e-12);
        }

        let empty = HistogramNormalizer::new();
        assert!(empty.is_empty());
        assert!(empty.normalize(&a.samples).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_decompress_endpoints() {
        assert_abs_diff_eq!(decompress(0.0, 10.0), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(decompress(1.0, 10.0), 1.0, epsilon = 1e-12);
        assert!(decompress(0.5, 10.0) < 0.5);
        assert_eq!(decompress(0.3, 0.0), 0.3);
    }

    #[test]
    fn test_colormap_endpoints() {
        let gray = ColorMap::get(ColorMapId::Grayscale);
        assert_eq!(gray.color(0.0), [0, 0, 0]);
        assert_eq!(gray.color(1.0), [255, 255, 255]);
        assert_eq!(gray.color(2.0), [255, 255, 255]);
        assert_eq!(gray.color(f64::NAN), [0, 0, 0]);
        assert_eq!(gray.color(0.5), [128, 128, 128]);

        let jet = ColorMap::get(ColorMapId::Jet);
        assert_eq!(jet.color(0.25), [0, 255, 255]);
    }

    #[test]
    fn test_auto_gain_overrides_decompression() {
        let line = ramp_line(32);
        let normalizer = HistogramNormalizer::from_lines([&line]);

        let both = RadiometricPipeline::new(RadiometricSettings {
            auto_gain: true,
            log_decompression: true,
            ..Default::default()
        });
        let auto_only = RadiometricPipeline::new(RadiometricSettings {
            auto_gain: true,
            ..Default::default()
        });

        assert_eq!(both.mode(), IntensityMode::AutoGain);
        assert!(!both.settings().log_decompression);

        let mut a = line.clone();
        let mut b = line.clone();
        both.process(&mut a, &normalizer);
        auto_only.process(&mut b, &normalizer);
        assert_eq!(a.corrected_strip, b.corrected_strip);
        assert_eq!(both.request_params(&GainParams::default()), GainParams::histogram_default());
    }

    #[test]
    fn test_render_row_removes_water_column() {
        let mut line = ramp_line(200);
        let normalizer = HistogramNormalizer::new();
        let pipeline = RadiometricPipeline::new(RadiometricSettings {
            colormap: ColorMapId::Grayscale,
            ..Default::default()
        });
        pipeline.process(&mut line, &normalizer);
        assert!(line.is_slant_corrected);

        let row = RadiometricPipeline::render_row(&line, 200).unwrap();
        assert_eq!(row.dim(), (200, 3));

        // Column next to nadir shows a sample from beyond the 5 m water column
        let first_bottom = index_from_distance(line.nav.altitude, &line, false);
        assert_eq!(first_bottom, 125);
        let idx = sample_index_from_pixel_x(101, &line, 200);
        assert!(idx >= first_bottom);
        let strip = line.corrected_strip.as_ref().unwrap();
        assert_eq!(row[[101, 0]], strip[[idx, 0]]);

        line.is_slant_corrected = false;
        let linear = RadiometricPipeline::render_row(&line, 100).unwrap();
        assert_eq!(linear.dim(), (100, 3));
        let strip = line.corrected_strip.as_ref().unwrap();
        assert_eq!(linear[[10, 0]], strip[[20, 0]]);
    }
}
