use crate::core::compositor::CompositorParams;
use crate::core::radiometric::{GainParams, RadiometricSettings};
use crate::core::zoom::ZoomParams;
use crate::types::{ColorMapId, WaterfallError, WaterfallResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Waterfall viewer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename = "waterfall", default)]
pub struct WaterfallConfig {
    pub normalization: f64,
    pub tvg_gain: f64,
    pub window_min: f64,
    pub window_width: f64,
    pub colormap: ColorMapId,
    pub slant_range_correction: bool,
    pub speed_correction: bool,
    pub auto_gain: bool,
    pub log_decompression: bool,
    pub log_decompression_factor: f64,
    pub zoom_box_size: usize,
    pub zoom_view_size: usize,
    pub zoom_vertical_scale: usize,
    pub zoom_min_lines: usize,
    pub pointer_debounce_ms: u64,
    pub fade_timeout_ms: u64,
    pub data_gap_secs: f64,
}

impl Default for WaterfallConfig {
    fn default() -> Self {
        Self {
            normalization: 0.2,
            tvg_gain: 280.0,
            window_min: 0.0,
            window_width: 1.0,
            colormap: ColorMapId::Bronze,
            slant_range_correction: true,
            speed_correction: false,
            auto_gain: false,
            log_decompression: false,
            log_decompression_factor: 10.0,
            zoom_box_size: 100,
            zoom_view_size: 300,
            zoom_vertical_scale: 3,
            zoom_min_lines: 100,
            pointer_debounce_ms: 500,
            fade_timeout_ms: 5000,
            data_gap_secs: 0.5,
        }
    }
}

impl WaterfallConfig {
    pub fn validate(&self) -> WaterfallResult<()> {
        if !(self.normalization > 0.0) {
            return Err(WaterfallError::InvalidParameter(format!(
                "normalization must be positive, got {}",
                self.normalization
            )));
        }
        if !(0.0..=1.0).contains(&self.window_min) || !(0.0..=1.0).contains(&self.window_width) {
            return Err(WaterfallError::InvalidParameter(format!(
                "window min/width must be within [0, 1], got {}/{}",
                self.window_min, self.window_width
            )));
        }
        if self.zoom_box_size == 0 || self.zoom_view_size == 0 || self.zoom_vertical_scale == 0 {
            return Err(WaterfallError::InvalidParameter("zoom sizes must be non-zero".to_string()));
        }
        if !(self.data_gap_secs > 0.0) {
            return Err(WaterfallError::InvalidParameter(format!(
                "data gap must be positive, got {}",
                self.data_gap_secs
            )));
        }
        Ok(())
    }

    pub fn gain_params(&self) -> GainParams {
        GainParams {
            normalization: self.normalization,
            tvg_gain: self.tvg_gain,
            window_min: self.window_min,
            window_width: self.window_width,
        }
    }

    pub fn set_gain_params(&mut self, params: &GainParams) {
        self.normalization = params.normalization;
        self.tvg_gain = params.tvg_gain;
        self.window_min = params.window_min;
        self.window_width = params.window_width;
    }

    pub fn radiometric_settings(&self) -> RadiometricSettings {
        RadiometricSettings {
            colormap: self.colormap,
            auto_gain: self.auto_gain,
            log_decompression: self.log_decompression,
            log_decompression_factor: self.log_decompression_factor,
            slant_range_correction: self.slant_range_correction,
        }
    }

    pub fn compositor_params(&self) -> CompositorParams {
        CompositorParams {
            speed_correction: self.speed_correction,
            data_gap_secs: self.data_gap_secs,
        }
    }

    pub fn zoom_params(&self) -> ZoomParams {
        ZoomParams {
            box_size: self.zoom_box_size,
            view_size: self.zoom_view_size,
            vertical_scale: self.zoom_vertical_scale,
            min_lines: self.zoom_min_lines,
        }
    }

    pub fn to_xml(&self) -> WaterfallResult<String> {
        quick_xml::se::to_string(self)
            .map_err(|e| WaterfallError::Persistence(format!("Failed to serialize config: {}", e)))
    }

    pub fn from_xml(xml: &str) -> WaterfallResult<Self> {
        let config: Self = quick_xml::de::from_str(xml)
            .map_err(|e| WaterfallError::Persistence(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> WaterfallResult<Self> {
        let xml = std::fs::read_to_string(path)?;
        let config = Self::from_xml(&xml)?;
        log::info!("Loaded waterfall config from {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> WaterfallResult<()> {
        std::fs::write(path, self.to_xml()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WaterfallConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.gain_params(), GainParams::default());
        assert_eq!(config.zoom_params(), ZoomParams::default());
        assert_eq!(config.compositor_params(), CompositorParams::default());
    }

    #[test]
    fn test_xml_round_trip_and_partial_documents() {
        let config = WaterfallConfig {
            colormap: ColorMapId::Jet,
            auto_gain: true,
            tvg_gain: 150.0,
            ..Default::default()
        };
        let xml = config.to_xml().unwrap();
        assert!(xml.starts_with("<waterfall>"));
        assert_eq!(WaterfallConfig::from_xml(&xml).unwrap(), config);

        let partial = WaterfallConfig::from_xml("<waterfall><speed_correction>true</speed_correction></waterfall>").unwrap();
        assert!(partial.speed_correction);
        assert_eq!(partial.normalization, 0.2);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let bad = WaterfallConfig {
            window_min: 1.5,
            ..Default::default()
        };
        assert!(matches!(bad.validate(), Err(WaterfallError::InvalidParameter(_))));
        assert!(WaterfallConfig::from_xml("<waterfall><normalization>0</normalization></waterfall>").is_err());
    }
}
