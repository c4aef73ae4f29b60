use crate::core::line_store::{BatchCommit, LineStore};
use crate::core::radiometric::{HistogramNormalizer, RadiometricPipeline};
use crate::types::{PingLine, Raster, Strip, WaterfallError};
use ndarray::{s, Array3};

/// Compositor parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompositorParams {
    /// Scale each line's height by the distance travelled since the previous ping
    pub speed_correction: bool,
    /// Elapsed time above which consecutive pings are treated as a data gap
    pub data_gap_secs: f64,
}

impl Default for CompositorParams {
    fn default() -> Self {
        Self {
            speed_correction: false,
            data_gap_secs: 0.5,
        }
    }
}

/// Counters for a single advance
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompositeReport {
    pub received: usize,
    /// Consecutive duplicates plus lines not newer than the store
    pub duplicates: usize,
    pub empty: usize,
    pub drawn: usize,
    /// Sum of `y_size` over the composited batch
    pub total_shift: u32,
    /// Rows the buffer actually moved, `min(total_shift, height)`
    pub rows_shifted: u32,
    pub commit: BatchCommit,
}

struct RenderedLine {
    line: PingLine,
    row: Option<Strip>,
}

/// Waterfall raster owner
///
/// Row 0 of the buffer is the newest ping. Each advance scrolls the existing
/// content toward higher rows by the total height of the incoming batch and
/// draws the new lines into the freed rows at the top.
pub struct Compositor {
    width: usize,
    height: usize,
    params: CompositorParams,
    buffer: Raster,
    shadow: Raster,
    prev_ping_ts: Option<i64>,
    range_for_ruler: f64,
    normalizer: HistogramNormalizer,
}

impl Compositor {
    pub fn new(width: usize, height: usize) -> Self {
        Self::with_params(width, height, CompositorParams::default())
    }

    pub fn with_params(width: usize, height: usize, params: CompositorParams) -> Self {
        Self {
            width,
            height,
            params,
            buffer: Array3::zeros((height, width, 3)),
            shadow: Array3::zeros((height, width, 3)),
            prev_ping_ts: None,
            range_for_ruler: 0.0,
            normalizer: HistogramNormalizer::new(),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn params(&self) -> &CompositorParams {
        &self.params
    }

    pub fn set_speed_correction(&mut self, enabled: bool) {
        self.params.speed_correction = enabled;
    }

    pub fn buffer(&self) -> &Raster {
        &self.buffer
    }

    /// Range of the most recently composited line, for the ruler
    pub fn range_for_ruler(&self) -> f64 {
        self.range_for_ruler
    }

    pub fn normalizer(&self) -> &HistogramNormalizer {
        &self.normalizer
    }

    /// Drop consecutive equal timestamps (the later line wins) and anything not
    /// newer than what the store already holds
    fn dedup(&self, mut batch: Vec<PingLine>, newest_stored: Option<i64>, report: &mut CompositeReport) -> Vec<PingLine> {
        batch.sort_by_key(|l| l.timestamp_ms);

        let mut lines: Vec<PingLine> = Vec::with_capacity(batch.len());
        for line in batch {
            if newest_stored.map_or(false, |newest| line.timestamp_ms <= newest) {
                log::debug!("Skipping stale line at {} ms", line.timestamp_ms);
                report.duplicates += 1;
                continue;
            }
            if lines.last().map_or(false, |prev| prev.timestamp_ms == line.timestamp_ms) {
                let err = WaterfallError::DuplicateTimestamp {
                    timestamp_ms: line.timestamp_ms,
                };
                log::debug!("{}", err);
                lines.pop();
                report.duplicates += 1;
            }
            lines.push(line);
        }
        lines
    }

    /// Rows occupied by `line`, from the elapsed time since the previous ping
    ///
    /// Never more than the buffer height, whatever the navigation says.
    fn line_height(&self, line: &PingLine) -> u32 {
        let prev = self.prev_ping_ts;
        if !self.params.speed_correction || line.range <= 0.0 {
            return 1;
        }
        let Some(prev) = prev else {
            return 1;
        };

        let elapsed = (line.timestamp_ms - prev) as f64 / 1000.0;
        if elapsed > self.params.data_gap_secs {
            return 1;
        }
        let size = (elapsed * line.nav.speed * (self.width as f64 / (2.0 * line.range))).round();
        if !(size.is_finite() && size > 0.0) {
            return 1;
        }
        let max_rows = self.height.max(1) as f64;
        if size > max_rows {
            log::warn!(
                "Line at {} ms would span {} rows (speed {} m/s); clamping to {}",
                line.timestamp_ms,
                size,
                line.nav.speed,
                max_rows
            );
        }
        (size.min(max_rows) as u32).max(1)
    }

    fn scroll(&mut self, shift: usize) {
        if shift == 0 {
            return;
        }
        if shift >= self.height {
            self.buffer.fill(0);
            return;
        }
        self.shadow.assign(&self.buffer);
        let keep = self.height - shift;
        self.buffer
            .slice_mut(s![shift.., .., ..])
            .assign(&self.shadow.slice(s![..keep, .., ..]));
        self.buffer.slice_mut(s![..shift, .., ..]).fill(0);
    }

    fn render_all(&self, lines: Vec<PingLine>, pipeline: &RadiometricPipeline) -> Vec<RenderedLine> {
        let width = self.width;
        let normalizer = &self.normalizer;
        let render = move |mut line: PingLine| {
            if line.is_empty() {
                return RenderedLine { line, row: None };
            }
            pipeline.process(&mut line, normalizer);
            let row = RadiometricPipeline::render_row(&line, width);
            RenderedLine { line, row }
        };

        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;
            lines.into_par_iter().map(render).collect()
        }
        #[cfg(not(feature = "parallel"))]
        {
            lines.into_iter().map(render).collect()
        }
    }

    fn draw_rows(&mut self, row: Option<&Strip>, y_pos: usize, y_size: usize) {
        let y_end = (y_pos + y_size).min(self.height);
        for y in y_pos..y_end {
            let mut target = self.buffer.slice_mut(s![y, .., ..]);
            match row {
                Some(strip) => target.assign(strip),
                None => target.fill(0),
            }
        }
    }

    /// Composite a batch of newly decoded lines and commit them to `store`
    pub fn advance(&mut self, batch: Vec<PingLine>, store: &LineStore, pipeline: &RadiometricPipeline) -> CompositeReport {
        let mut report = CompositeReport {
            received: batch.len(),
            ..Default::default()
        };
        if batch.is_empty() || self.width == 0 || self.height == 0 {
            return report;
        }

        let mut lines = self.dedup(batch, store.newest_timestamp(), &mut report);

        for line in lines.iter_mut() {
            line.y_size = self.line_height(line);
            self.prev_ping_ts = Some(line.timestamp_ms);
            if !line.is_empty() {
                self.normalizer.accumulate(&line.samples);
            }
        }

        let total_rows: u64 = lines.iter().map(|l| l.y_size as u64).sum();
        let total_shift = u32::try_from(total_rows).unwrap_or(u32::MAX);
        report.total_shift = total_shift;
        report.rows_shifted = total_shift.min(self.height as u32);
        if total_shift as usize > self.height {
            log::debug!("Batch of {} rows exceeds buffer height {}", total_shift, self.height);
        }
        self.scroll(total_shift as usize);

        let rendered = self.render_all(lines, pipeline);

        // Oldest line sits below every newer line of the batch
        let mut below = total_shift as i64;
        let mut to_commit = Vec::with_capacity(rendered.len());
        for RenderedLine { line, row } in rendered {
            below -= line.y_size as i64;
            let y_pos = below;
            if y_pos >= self.height as i64 {
                continue;
            }
            self.draw_rows(row.as_ref(), y_pos as usize, line.y_size as usize);

            if row.is_none() {
                let err = WaterfallError::EmptySampleData {
                    timestamp_ms: line.timestamp_ms,
                };
                log::warn!("{}", err);
                report.empty += 1;
                continue;
            }
            report.drawn += 1;
            self.range_for_ruler = line.range;
            to_commit.push((line, y_pos));
        }

        report.commit = store.commit_batch(to_commit, total_shift, self.height);
        log::debug!(
            "Composited {} lines ({} rows, {} duplicates, {} empty, {} evicted)",
            report.drawn,
            report.total_shift,
            report.duplicates,
            report.empty,
            report.commit.evicted
        );
        report
    }

    /// Blank the buffer and forget stored lines and statistics
    pub fn clear(&mut self, store: &LineStore) {
        self.buffer.fill(0);
        self.shadow.fill(0);
        self.prev_ping_ts = None;
        self.normalizer = HistogramNormalizer::new();
        store.clear();
    }

    /// Recreate the buffers at a new size; stored lines are dropped
    pub fn resize(&mut self, width: usize, height: usize, store: &LineStore) {
        log::info!("Resizing waterfall buffer to {}x{}", width, height);
        self.width = width;
        self.height = height;
        self.buffer = Array3::zeros((height, width, 3));
        self.shadow = Array3::zeros((height, width, 3));
        self.clear(store);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::radiometric::RadiometricSettings;
    use crate::types::{ColorMapId, NavState};

    fn gray_pipeline() -> RadiometricPipeline {
        RadiometricPipeline::new(RadiometricSettings {
            colormap: ColorMapId::Grayscale,
            slant_range_correction: false,
            ..Default::default()
        })
    }

    fn line(ts: i64, value: f64) -> PingLine {
        PingLine::new(
            ts,
            0,
            10.0,
            vec![value; 64],
            NavState {
                altitude: 2.0,
                speed: 10.0,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_duplicate_timestamps_keep_one_line() {
        let store = LineStore::new();
        let mut compositor = Compositor::new(32, 50);
        let report = compositor.advance(vec![line(0, 0.2), line(100, 0.4), line(100, 0.9)], &store, &gray_pipeline());

        assert_eq!(report.duplicates, 1);
        assert_eq!(store.len(), 2);
        let snap = store.snapshot();
        assert!(snap.iter().all(|p| p.y_size == 1));
        // The later of the two equal timestamps is the one retained
        assert_eq!(snap[1].samples[0], 0.9);
    }

    #[test]
    fn test_rows_strictly_decrease_across_batch() {
        let store = LineStore::new();
        let mut compositor = Compositor::new(32, 50);
        let batch = (0..6).map(|i| line(i * 100, 0.5)).collect();
        let report = compositor.advance(batch, &store, &gray_pipeline());

        assert_eq!(report.total_shift, 6);
        let rows: Vec<i64> = store.snapshot().iter().map(|p| p.y_pos).collect();
        assert_eq!(rows, vec![5, 4, 3, 2, 1, 0]);
    }

    #[test]
    fn test_scroll_moves_content_down() {
        let store = LineStore::new();
        let mut compositor = Compositor::new(16, 8);
        let pipeline = gray_pipeline();

        compositor.advance(vec![line(0, 1.0)], &store, &pipeline);
        assert_eq!(compositor.buffer()[[0, 5, 0]], 255);

        compositor.advance(vec![line(100, 0.0)], &store, &pipeline);
        assert_eq!(compositor.buffer()[[0, 5, 0]], 0);
        assert_eq!(compositor.buffer()[[1, 5, 0]], 255);
        assert_eq!(store.line_at_row(1).map(|p| p.timestamp_ms), Some(0));
    }

    #[test]
    fn test_speed_correction_and_data_gap() {
        let store = LineStore::new();
        let mut compositor = Compositor::with_params(
            100,
            200,
            CompositorParams {
                speed_correction: true,
                ..Default::default()
            },
        );
        // 0.1 s at 10 m/s is 1 m, and 100 px span 20 m: 5 rows
        let batch = vec![line(0, 0.5), line(100, 0.5), line(1100, 0.5)];
        let report = compositor.advance(batch, &store, &gray_pipeline());

        let sizes: Vec<u32> = store.snapshot().iter().map(|p| p.y_size).collect();
        assert_eq!(sizes, vec![1, 5, 1]);
        assert_eq!(report.total_shift, 7);
        assert_eq!(report.rows_shifted, 7);
    }

    #[test]
    fn test_runaway_speed_is_clamped_to_height() {
        let store = LineStore::new();
        let mut compositor = Compositor::with_params(
            100,
            30,
            CompositorParams {
                speed_correction: true,
                ..Default::default()
            },
        );
        let batch = (0..3)
            .map(|i| {
                let mut l = line(i * 100, 0.5);
                l.nav.speed = 1e12;
                l
            })
            .collect();
        let report = compositor.advance(batch, &store, &gray_pipeline());

        assert_eq!(report.total_shift, 1 + 30 + 30);
        assert_eq!(report.rows_shifted, 30);
        // Only the newest line fits
        assert_eq!(store.len(), 1);
        assert_eq!(store.line_at_row(0).map(|p| p.y_size), Some(30));

        // The waterfall keeps advancing afterwards
        let next = compositor.advance(vec![line(250, 0.5)], &store, &gray_pipeline());
        assert_eq!(next.drawn, 1);
    }

    #[test]
    fn test_empty_line_keeps_row_accounting() {
        let store = LineStore::new();
        let mut compositor = Compositor::new(16, 20);
        let mut empty = line(100, 0.5);
        empty.samples.clear();
        let report = compositor.advance(vec![line(0, 1.0), empty, line(200, 1.0)], &store, &gray_pipeline());

        assert_eq!(report.empty, 1);
        assert_eq!(report.drawn, 2);
        assert_eq!(report.total_shift, 3);
        let rows: Vec<i64> = store.snapshot().iter().map(|p| p.y_pos).collect();
        assert_eq!(rows, vec![2, 0]);
        assert_eq!(compositor.buffer()[[1, 3, 0]], 0);
    }

    #[test]
    fn test_oversized_batch_fills_buffer() {
        let store = LineStore::new();
        let mut compositor = Compositor::new(8, 4);
        let batch = (0..10).map(|i| line(i * 10, 1.0)).collect();
        let report = compositor.advance(batch, &store, &gray_pipeline());

        assert_eq!(report.total_shift, 10);
        assert_eq!(report.rows_shifted, 4);
        assert_eq!(store.len(), 4);
        assert!(store.snapshot().iter().all(|p| p.y_pos < 4));
        assert!(compositor.buffer().iter().all(|&v| v == 255));
    }

    #[test]
    fn test_resize_clears_store() {
        let store = LineStore::new();
        let mut compositor = Compositor::new(8, 4);
        compositor.advance(vec![line(0, 1.0)], &store, &gray_pipeline());
        compositor.resize(16, 10, &store);

        assert!(store.is_empty());
        assert_eq!(compositor.buffer().dim(), (10, 16, 3));
    }
}
