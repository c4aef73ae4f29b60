use crate::core::geometry::{sample_index_from_pixel_x, zoom_ruler_step};
use crate::core::line_store::{LineStore, PlacedLine};
use crate::types::{Raster, Strip};
use ndarray::{s, Array3};

/// Zoom parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoomParams {
    /// Side of the square source box in waterfall pixels
    pub box_size: usize,
    /// Side of the square zoom panel
    pub view_size: usize,
    /// Output rows per line in the paused view
    pub vertical_scale: usize,
    /// Lines needed under the box before the paused view is drawn
    pub min_lines: usize,
}

impl Default for ZoomParams {
    fn default() -> Self {
        Self {
            box_size: 100,
            view_size: 300,
            vertical_scale: 3,
            min_lines: 100,
        }
    }
}

/// A rendered zoom panel and where it goes
#[derive(Debug, Clone)]
pub struct ZoomView {
    /// `view_size x view_size x 3`
    pub image: Raster,
    /// Top-left corner of the source box in the waterfall
    pub box_origin: (usize, usize),
    /// Top-left corner of the panel in the waterfall (opposite side to the pointer)
    pub panel_origin: (i64, i64),
    /// Across-track meters covered by the box
    pub zoom_range: f64,
    pub ruler_step: f64,
    /// True when rebuilt from stored lines rather than cropped from the buffer
    pub resampled: bool,
}

/// Lines under the zoom box for a settled pointer, by timestamp
///
/// Timestamps survive a rebuild of the waterfall, row positions do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoomWindow {
    pub pointer: (i32, i32),
    pub oldest_ts: i64,
    pub newest_ts: i64,
    pub line_count: usize,
}

/// Magnified view around the pointer
///
/// While streaming the composited buffer is cropped and scaled. While paused the
/// view is rebuilt from the stored lines at native sample resolution, one line per
/// `vertical_scale` output rows.
#[derive(Debug, Clone, Copy)]
pub struct ZoomRenderer {
    params: ZoomParams,
}

impl ZoomRenderer {
    pub fn new() -> Self {
        Self::with_params(ZoomParams::default())
    }

    pub fn with_params(params: ZoomParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ZoomParams {
        &self.params
    }

    /// Top-left corner of the box around `pointer`, kept inside the buffer
    fn box_origin(&self, pointer: (i32, i32), width: usize, height: usize) -> Option<(usize, usize)> {
        let z = self.params.box_size;
        if z == 0 || width < z || height < z {
            return None;
        }
        let half = (z / 2) as i64;
        let x0 = (pointer.0 as i64 - half).clamp(0, (width - z) as i64) as usize;
        let y0 = (pointer.1 as i64 - half).clamp(0, (height - z) as i64) as usize;
        Some((x0, y0))
    }

    /// Resolve which stored lines the paused view would draw for `pointer`
    ///
    /// Meant to run once the pointer has settled, not on every move.
    pub fn line_window(&self, pointer: (i32, i32), width: usize, height: usize, store: &LineStore) -> Option<ZoomWindow> {
        let (_, top) = self.box_origin(pointer, width, height)?;
        let lines = store.rows_between(top as i64, (top + self.params.box_size) as i64);
        let newest = lines.first()?;
        let oldest = lines.last()?;
        Some(ZoomWindow {
            pointer,
            oldest_ts: oldest.timestamp_ms,
            newest_ts: newest.timestamp_ms,
            line_count: lines.len(),
        })
    }

    /// Build the zoom panel for the pointer at `(x, y)`
    ///
    /// The paused view draws the lines of `window`. Returns `None` when the buffer
    /// is smaller than the box, or when paused without a window or with too few
    /// lines in it.
    pub fn render(
        &self,
        pointer: (i32, i32),
        streaming: bool,
        buffer: &Raster,
        store: &LineStore,
        window: Option<&ZoomWindow>,
        range_for_ruler: f64,
    ) -> Option<ZoomView> {
        let (height, width, _) = buffer.dim();
        let z = self.params.box_size;
        let view = self.params.view_size;
        if view == 0 {
            return None;
        }
        let box_origin = self.box_origin(pointer, width, height)?;

        let panel_x = if pointer.0 <= (width / 2) as i32 {
            width as i64 - (view as i64 + 1)
        } else {
            1
        };
        let panel_origin = (panel_x, height as i64 - (view as i64 + 1));

        let image = if streaming {
            self.crop_and_magnify(buffer, box_origin)
        } else {
            let window = window?;
            // Top of the box first
            let mut lines = store.lines_between(window.oldest_ts, window.newest_ts);
            lines.reverse();
            self.resample_lines(pointer.0, &lines, width)?
        };

        let zoom_range = z as f64 * (range_for_ruler * 2.0) / width as f64;
        Some(ZoomView {
            image,
            box_origin,
            panel_origin,
            zoom_range,
            ruler_step: zoom_ruler_step(zoom_range),
            resampled: !streaming,
        })
    }

    fn crop_and_magnify(&self, buffer: &Raster, (x0, y0): (usize, usize)) -> Raster {
        let z = self.params.box_size;
        let view = self.params.view_size;
        let crop = buffer.slice(s![y0..y0 + z, x0..x0 + z, ..]);

        let mut out = Array3::<u8>::zeros((view, view, 3));
        for r in 0..view {
            let sr = r * z / view;
            for c in 0..view {
                let sc = c * z / view;
                for k in 0..3 {
                    out[[r, c, k]] = crop[[sr, sc, k]];
                }
            }
        }
        out
    }

    fn resample_lines(&self, pointer_x: i32, lines: &[PlacedLine], width: usize) -> Option<Raster> {
        let z = self.params.box_size as i32;
        let view = self.params.view_size;
        let scale = self.params.vertical_scale.max(1);

        if lines.len() < self.params.min_lines {
            log::debug!("Zoom needs {} lines under the box, found {}", self.params.min_lines, lines.len());
            return None;
        }

        let mut left = pointer_x - z / 2;
        let mut right = pointer_x + z / 2;
        if left < 0 {
            left = 0;
            right = z;
        } else if right > width as i32 {
            left = width as i32 - z;
            right = width as i32;
        }

        let mut out = Array3::<u8>::zeros((view, view, 3));
        for (k, line) in lines.iter().enumerate() {
            let row0 = k * scale;
            if row0 >= view {
                break;
            }
            let Some(strip) = line.corrected_strip.as_ref() else {
                continue;
            };
            let begin = sample_index_from_pixel_x(left, line, width);
            let end = if right >= width as i32 {
                line.x_size()
            } else {
                sample_index_from_pixel_x(right, line, width)
            };
            if end <= begin {
                continue;
            }

            let row = Self::stretch(strip, begin, end.min(strip.nrows()), view);
            for r in row0..(row0 + scale).min(view) {
                out.slice_mut(s![r, .., ..]).assign(&row);
            }
        }
        Some(out)
    }

    /// Nearest-neighbour stretch of `strip[begin..end]` to `len` columns
    fn stretch(strip: &Strip, begin: usize, end: usize, len: usize) -> Strip {
        let span = end.saturating_sub(begin).max(1);
        let mut row = Strip::zeros((len, 3));
        for c in 0..len {
            let src = (begin + c * span / len).min(strip.nrows().saturating_sub(1));
            for k in 0..3 {
                row[[c, k]] = strip[[src, k]];
            }
        }
        row
    }
}

impl Default for ZoomRenderer {
    fn default() -> Self {
        Self::new()
    }
}
