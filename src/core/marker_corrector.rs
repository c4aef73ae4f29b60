use crate::core::geometry::{horizontal_distance_from_index, index_from_distance, point_from_index};
use crate::core::line_store::LineStore;
use crate::types::{Marker, WaterfallError, WaterfallResult, MARK_VERSION_HORIZONTAL};

/// Slant and horizontal candidates for one marker
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerCorrection {
    pub original: Marker,
    pub corrected: Marker,
    /// False when no pair of stored lines bracketed the marker (identity correction)
    pub bracketed: bool,
}

/// Which candidate a session is currently showing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewSide {
    Original,
    Corrected,
}

/// Result handed back to the caller at each step of the workflow
#[derive(Debug, Clone, PartialEq)]
pub enum CorrectionOutcome {
    Preview { original: Vec<Marker>, corrected: Vec<Marker> },
    Committed(Vec<Marker>),
    Cancelled,
}

/// Re-derives horizontal coordinates for legacy slant-referenced markers
///
/// Nothing here mutates caller state: a [`CorrectionSession`] holds both
/// candidates for every marker and the caller chooses what to persist.
pub struct MarkerCorrector;

impl MarkerCorrector {
    /// Both candidates for a single marker
    pub fn correct(marker: &Marker, store: &LineStore) -> MarkerCorrection {
        let identity = MarkerCorrection {
            original: marker.clone(),
            corrected: marker.clone(),
            bracketed: false,
        };
        let Some(info) = &marker.sidescan else {
            return identity;
        };
        let Some((_, line)) = store.bracketing_pair(marker.timestamp_ms) else {
            let err = WaterfallError::UncorrectableMarker {
                label: marker.label.clone(),
            };
            log::warn!("{}; keeping its coordinates", err);
            return identity;
        };

        let slant = info.distance_to_nadir;
        let ss_x = index_from_distance(slant, &line, false);
        let horizontal = horizontal_distance_from_index(ss_x, &line, true);

        let half = info.width_meters / 2.0;
        let port = index_from_distance(slant - half, &line, false);
        let starboard = index_from_distance(slant + half, &line, false);
        let width_meters =
            horizontal_distance_from_index(starboard, &line, true) - horizontal_distance_from_index(port, &line, true);

        let point = point_from_index(ss_x, &line, true);

        let mut corrected = marker.clone();
        corrected.lat_rad = point.location.lat_rad;
        corrected.lon_rad = point.location.lon_rad;
        if let Some(c) = corrected.sidescan.as_mut() {
            c.distance_to_nadir = horizontal;
            c.width_meters = width_meters;
        }

        log::debug!(
            "Marker '{}': {:.3} m slant -> {:.3} m horizontal",
            marker.label,
            slant,
            horizontal
        );
        MarkerCorrection {
            original: marker.clone(),
            corrected,
            bracketed: true,
        }
    }

    /// Open a session over every legacy sidescan marker in `markers`
    pub fn prepare(markers: &[Marker], store: &LineStore) -> WaterfallResult<CorrectionSession> {
        let corrections: Vec<MarkerCorrection> = markers
            .iter()
            .filter(|m| m.is_legacy_sidescan())
            .map(|m| Self::correct(m, store))
            .collect();

        if corrections.is_empty() {
            return Err(WaterfallError::InvalidState("no marks to adjust".to_string()));
        }
        log::info!(
            "Prepared correction of {} legacy marks ({} without bracketing lines)",
            corrections.len(),
            corrections.iter().filter(|c| !c.bracketed).count()
        );
        Ok(CorrectionSession {
            corrections,
            showing: PreviewSide::Corrected,
        })
    }
}

/// Test / revert / commit workflow over a set of corrections
#[derive(Debug, Clone)]
pub struct CorrectionSession {
    corrections: Vec<MarkerCorrection>,
    showing: PreviewSide,
}

impl CorrectionSession {
    pub fn corrections(&self) -> &[MarkerCorrection] {
        &self.corrections
    }

    pub fn showing(&self) -> PreviewSide {
        self.showing
    }

    pub fn preview(&self) -> CorrectionOutcome {
        CorrectionOutcome::Preview {
            original: self.corrections.iter().map(|c| c.original.clone()).collect(),
            corrected: self.corrections.iter().map(|c| c.corrected.clone()).collect(),
        }
    }

    /// Markers as they should currently be drawn
    pub fn displayed(&self) -> Vec<Marker> {
        self.corrections
            .iter()
            .map(|c| match self.showing {
                PreviewSide::Original => c.original.clone(),
                PreviewSide::Corrected => c.corrected.clone(),
            })
            .collect()
    }

    pub fn apply_corrected(&mut self) -> Vec<Marker> {
        self.showing = PreviewSide::Corrected;
        self.displayed()
    }

    pub fn revert(&mut self) -> Vec<Marker> {
        self.showing = PreviewSide::Original;
        self.displayed()
    }

    /// Corrected candidates, stamped as horizontal-corrected
    pub fn commit(self) -> CorrectionOutcome {
        let committed = self
            .corrections
            .into_iter()
            .map(|c| {
                let mut m = c.corrected;
                if let Some(info) = m.sidescan.as_mut() {
                    info.version = MARK_VERSION_HORIZONTAL;
                }
                m
            })
            .collect();
        CorrectionOutcome::Committed(committed)
    }

    pub fn cancel(self) -> CorrectionOutcome {
        CorrectionOutcome::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ColorMapId, GeoPosition, NavState, PingLine, SidescanMarkInfo, MARK_VERSION_SLANT};

    fn store() -> LineStore {
        let store = LineStore::new();
        let origin = GeoPosition::from_degrees(41.18, -8.70);
        let batch = (0..4)
            .map(|i| {
                let nav = NavState {
                    position: origin.offset_by(i as f64, 0.0),
                    altitude: 6.0,
                    ..Default::default()
                };
                (PingLine::new(1000 + i * 100, 0, 30.0, vec![0.5; 600], nav), 3 - i)
            })
            .collect();
        store.commit_batch(batch, 4, 100);
        store
    }

    fn legacy(label: &str, ts: i64) -> Marker {
        let mut m = Marker::new(label, ts, 0.7187, -0.1518);
        m.sidescan = Some(SidescanMarkInfo {
            distance_to_nadir: 15.0,
            y_px: 2,
            box_width_px: 20,
            box_height_px: 10,
            width_meters: 4.0,
            subsystem_id: 0,
            colormap_id: ColorMapId::Bronze,
            version: MARK_VERSION_SLANT,
        });
        m
    }

    #[test]
    fn test_bracketed_marker_gets_distinct_candidate() {
        let store = store();
        let c = MarkerCorrector::correct(&legacy("a", 1150), &store);
        assert!(c.bracketed);

        let slant = c.original.sidescan.as_ref().unwrap();
        let horiz = c.corrected.sidescan.as_ref().unwrap();
        assert!(horiz.distance_to_nadir < slant.distance_to_nadir);
        assert!(horiz.distance_to_nadir > 0.0);
        assert!(horiz.width_meters > 0.0);
        assert_ne!(c.corrected.lat_rad, c.original.lat_rad);
        // Candidates are never committed by `correct`
        assert_eq!(horiz.version, MARK_VERSION_SLANT);
    }

    #[test]
    fn test_unbracketed_marker_is_identity() {
        let store = store();
        let c = MarkerCorrector::correct(&legacy("late", 9000), &store);
        assert!(!c.bracketed);
        assert_eq!(c.original, c.corrected);
    }

    #[test]
    fn test_session_workflow() {
        let store = store();
        let mut current = legacy("current", 1100);
        if let Some(info) = current.sidescan.as_mut() {
            info.version = MARK_VERSION_HORIZONTAL;
        }
        let markers = vec![legacy("a", 1150), current, legacy("b", 9000)];

        let mut session = MarkerCorrector::prepare(&markers, &store).unwrap();
        assert_eq!(session.corrections().len(), 2);
        assert_eq!(session.showing(), PreviewSide::Corrected);

        let reverted = session.revert();
        assert_eq!(reverted[0], markers[0]);
        let applied = session.apply_corrected();
        assert_ne!(applied[0], markers[0]);

        match session.preview() {
            CorrectionOutcome::Preview { original, corrected } => {
                assert_eq!(original.len(), corrected.len());
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        match session.clone().commit() {
            CorrectionOutcome::Committed(committed) => {
                assert!(committed.iter().all(|m| !m.is_legacy_sidescan()));
                // Identity-corrected markers still get the version bump
                assert_eq!(committed[1].lat_rad, markers[2].lat_rad);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(session.cancel(), CorrectionOutcome::Cancelled);
        // Input is untouched
        assert!(markers[0].is_legacy_sidescan());
    }

    #[test]
    fn test_nothing_to_adjust() {
        let store = store();
        let err = MarkerCorrector::prepare(&[Marker::new("plain", 1100, 0.0, 0.0)], &store).unwrap_err();
        assert!(matches!(err, WaterfallError::InvalidState(_)));
    }
}
