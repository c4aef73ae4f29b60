use crate::types::{GeoPosition, PingLine, WaterfallError, WaterfallResult};

/// A resolved position on a sidescan line
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SidescanPoint {
    /// Sample index within the line
    pub index: usize,
    /// Signed across-track distance from nadir (negative is port)
    pub distance_to_nadir: f64,
    /// Geographic location of the sample
    pub location: GeoPosition,
}

/// Sign that is zero at zero
fn signum0(v: f64) -> f64 {
    if v > 0.0 {
        1.0
    } else if v < 0.0 {
        -1.0
    } else {
        0.0
    }
}

fn altitude_of(line: &PingLine) -> f64 {
    let alt = line.nav.altitude;
    if alt.is_finite() && alt > 0.0 {
        alt
    } else {
        0.0
    }
}

fn clamp_index(idx: usize, line: &PingLine) -> usize {
    idx.min(line.x_size().saturating_sub(1))
}

/// Altitude expressed in image pixels for an image `width` columns wide
fn altitude_in_pixels(line: &PingLine, width: usize) -> f64 {
    if line.range <= 0.0 {
        return 0.0;
    }
    altitude_of(line) * (width as f64 / (line.range * 2.0))
}

/// Continuous forward map from sample index to image column
fn pixel_x_continuous(idx: f64, line: &PingLine, width: usize) -> f64 {
    let w = width as f64;
    let ximg = idx * w / line.x_size() as f64;
    if !line.is_slant_corrected {
        return ximg;
    }
    let h = altitude_in_pixels(line, width);
    let d = w / 2.0 - ximg;
    w / 2.0 - signum0(d) * (d * d - h * h).max(0.0).sqrt()
}

/// Continuous inverse map from image column to sample index
fn sample_index_continuous(px: f64, line: &PingLine, width: usize) -> f64 {
    let w = width as f64;
    let len = line.x_size() as f64;
    if !line.is_slant_corrected {
        return px * len / w;
    }
    let h = altitude_in_pixels(line, width);
    let c = px - w / 2.0;
    let d1 = signum0(c) * (c * c + h * h).sqrt();
    (d1 + w / 2.0) * len / w
}

/// Image column of a raw sample index
pub fn pixel_x_from_sample_index(idx: usize, line: &PingLine, width: usize) -> i32 {
    if line.is_empty() || width == 0 {
        return 0;
    }
    let idx = clamp_index(idx, line);
    let px = pixel_x_continuous(idx as f64, line, width).round();
    px.clamp(0.0, (width - 1) as f64) as i32
}

/// Sample index under an image column (exact inverse of [`pixel_x_from_sample_index`])
pub fn sample_index_from_pixel_x(px: i32, line: &PingLine, width: usize) -> usize {
    if line.is_empty() || width == 0 {
        return 0;
    }
    let px = (px.max(0) as usize).min(width - 1) as f64;
    let idx = sample_index_continuous(px, line, width).round();
    let max_idx = (line.x_size() - 1) as f64;
    idx.clamp(0.0, max_idx) as usize
}

/// Uncorrected slant distance of a sample from nadir (negative is port)
pub fn slant_distance_from_index(idx: usize, line: &PingLine) -> f64 {
    if line.is_empty() {
        return 0.0;
    }
    let idx = clamp_index(idx, line) as f64;
    let len = line.x_size() as f64;
    line.range * (2.0 * idx / len - 1.0)
}

/// Across-track distance of a sample, optionally slant corrected
///
/// A ping's samples span `[-range, +range]` across track, port first. The
/// corrected distance is `sqrt(slant² - altitude²)`; samples inside the water
/// column (slant <= altitude) give exactly 0, never NaN.
pub fn horizontal_distance_from_index(idx: usize, line: &PingLine, slant_corrected: bool) -> f64 {
    let slant = slant_distance_from_index(idx, line);
    if !slant_corrected {
        return slant;
    }
    let alt = altitude_of(line);
    if slant.abs() <= alt {
        return 0.0;
    }
    signum0(slant) * (slant * slant - alt * alt).sqrt()
}

/// Like [`horizontal_distance_from_index`] with slant correction, but reports the
/// water-column case instead of clamping it
pub fn horizontal_distance_checked(idx: usize, line: &PingLine) -> WaterfallResult<f64> {
    let slant = slant_distance_from_index(idx, line);
    let altitude = altitude_of(line);
    if altitude > 0.0 && slant.abs() <= altitude {
        return Err(WaterfallError::GeometryDegenerate {
            slant: slant.abs(),
            altitude,
        });
    }
    Ok(horizontal_distance_from_index(idx, line, true))
}

/// Sample index for an across-track distance
pub fn index_from_distance(distance: f64, line: &PingLine, slant_corrected: bool) -> usize {
    if line.is_empty() || line.range <= 0.0 {
        return 0;
    }
    let slant = if slant_corrected {
        let alt = altitude_of(line);
        signum0(distance) * (distance * distance + alt * alt).sqrt()
    } else {
        distance
    };
    let len = line.x_size() as f64;
    let idx = ((slant / line.range + 1.0) * len / 2.0).round();
    idx.clamp(0.0, len - 1.0) as usize
}

/// Local (north, east) offset of a sample relative to its line's navigation fix
fn across_track_offset(distance: f64, line: &PingLine) -> (f64, f64) {
    let yaw = line.nav.yaw;
    (-distance * yaw.sin(), distance * yaw.cos())
}

/// Resolve a sample index to a geographic point (starboard is positive)
pub fn point_from_index(idx: usize, line: &PingLine, slant_corrected: bool) -> SidescanPoint {
    let index = clamp_index(idx, line);
    let distance_to_nadir = horizontal_distance_from_index(index, line, slant_corrected);
    let (north, east) = across_track_offset(distance_to_nadir, line);
    SidescanPoint {
        index,
        distance_to_nadir,
        location: line.nav.position.offset_by(north, east),
    }
}

fn distance_between_impl(
    idx_a: usize,
    line_a: &PingLine,
    idx_b: usize,
    line_b: &PingLine,
    slant_corrected: bool,
) -> f64 {
    let da = horizontal_distance_from_index(idx_a, line_a, slant_corrected);
    let db = horizontal_distance_from_index(idx_b, line_b, slant_corrected);

    let (an, ae) = across_track_offset(da, line_a);
    let (fix_n, fix_e) = line_a.nav.position.displacement_to(&line_b.nav.position);
    let (bn, be) = across_track_offset(db, line_b);

    let dn = fix_n + bn - an;
    let de = fix_e + be - ae;
    (dn * dn + de * de).sqrt()
}

/// Horizontal distance between samples on two (possibly non-adjacent) lines
pub fn distance_between(idx_a: usize, line_a: &PingLine, idx_b: usize, line_b: &PingLine) -> f64 {
    distance_between_impl(idx_a, line_a, idx_b, line_b, true)
}

/// Distance between samples on two lines without slant correction
pub fn slant_distance_between(idx_a: usize, line_a: &PingLine, idx_b: usize, line_b: &PingLine) -> f64 {
    distance_between_impl(idx_a, line_a, idx_b, line_b, false)
}

/// Object height from the two ends of its acoustic shadow on one line
///
/// Similar triangles: `height / altitude = shadow_length / far_slant_range`.
pub fn height_between(idx_near: usize, idx_far: usize, line: &PingLine) -> f64 {
    let p1 = slant_distance_from_index(idx_near, line);
    let p2 = slant_distance_from_index(idx_far, line);

    let shadow = (p2 - p1).abs();
    let far = p1.abs().max(p2.abs());
    if far <= 0.0 {
        return 0.0;
    }
    shadow * altitude_of(line) / far
}

/// Tick spacing in meters for the waterfall range ruler
pub fn ruler_step(range: f64) -> u32 {
    let r = range.max(0.0) as u32;
    match r {
        0..=10 => 1,
        11..=20 => 2,
        21..=50 => 5,
        51..=100 => 10,
        101..=200 => 20,
        _ => 50,
    }
}

/// Tick spacing in meters for the zoom view ruler
pub fn zoom_ruler_step(zoom_range: f64) -> f64 {
    if zoom_range > 40.0 {
        10.0
    } else if zoom_range > 20.0 {
        5.0
    } else if zoom_range > 10.0 {
        2.0
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GeoPosition, NavState};
    use approx::assert_abs_diff_eq;

    fn test_line(samples: usize, range: f64, altitude: f64, corrected: bool) -> PingLine {
        let nav = NavState {
            position: GeoPosition::from_degrees(41.18, -8.70),
            altitude,
            depth: 3.0,
            yaw: 0.0,
            speed: 1.5,
            ..Default::default()
        };
        let mut line = PingLine::new(0, 0, range, vec![0.5; samples], nav);
        line.is_slant_corrected = corrected;
        line
    }

    #[test]
    fn test_uncorrected_pixel_mapping_is_linear() {
        let line = test_line(1000, 50.0, 5.0, false);
        assert_eq!(pixel_x_from_sample_index(500, &line, 500), 250);
        assert_eq!(sample_index_from_pixel_x(250, &line, 500), 500);
        assert_eq!(sample_index_from_pixel_x(-20, &line, 500), 0);
        assert_eq!(sample_index_from_pixel_x(10_000, &line, 500), 998);
    }

    #[test]
    fn test_round_trip_outside_water_column() {
        let line = test_line(1000, 50.0, 10.0, true);
        // 10 m altitude on a 50 m range covers 100 samples each side of nadir
        for idx in (0..1000).filter(|i| (*i as i64 - 500).abs() > 101) {
            let px = pixel_x_from_sample_index(idx, &line, 1000);
            let back = sample_index_from_pixel_x(px, &line, 1000);
            assert!((back as i64 - idx as i64).abs() <= 1, "idx {} -> px {} -> {}", idx, px, back);
        }
    }

    #[test]
    fn test_water_column_collapses_to_nadir() {
        let line = test_line(1000, 50.0, 10.0, true);
        assert_eq!(pixel_x_from_sample_index(450, &line, 1000), 500);
        assert_eq!(pixel_x_from_sample_index(550, &line, 1000), 500);
    }

    #[test]
    fn test_horizontal_distance_clamps_at_nadir() {
        // 5 m altitude, sample at exactly 5 m slant
        let line = test_line(100, 10.0, 5.0, false);
        let idx = 75; // 10 * (150/100 - 1) = 5 m
        assert_abs_diff_eq!(slant_distance_from_index(idx, &line), 5.0, epsilon = 1e-9);
        assert_eq!(horizontal_distance_from_index(idx, &line, true), 0.0);
        assert!(horizontal_distance_checked(idx, &line).is_err());

        for i in 0..100 {
            assert!(!horizontal_distance_from_index(i, &line, true).is_nan());
        }
    }

    #[test]
    fn test_horizontal_distance_pythagoras() {
        let line = test_line(100, 10.0, 6.0, false);
        // index 90 -> 8 m slant starboard, index 10 -> 8 m port
        assert_abs_diff_eq!(horizontal_distance_from_index(90, &line, true), (64.0f64 - 36.0).sqrt(), epsilon = 1e-9);
        assert_abs_diff_eq!(horizontal_distance_from_index(10, &line, true), -(64.0f64 - 36.0).sqrt(), epsilon = 1e-9);
        assert_abs_diff_eq!(horizontal_distance_from_index(90, &line, false), 8.0, epsilon = 1e-9);
    }

    #[test]
    fn test_index_from_distance_inverts_distance() {
        let line = test_line(1000, 40.0, 7.0, false);
        for idx in [0usize, 120, 320, 700, 950, 999] {
            let d = horizontal_distance_from_index(idx, &line, false);
            assert_eq!(index_from_distance(d, &line, false), idx);
        }
        let d = horizontal_distance_from_index(900, &line, true);
        assert_eq!(index_from_distance(d, &line, true), 900);
    }

    #[test]
    fn test_point_projection_follows_heading() {
        let mut line = test_line(100, 10.0, 0.0, false);
        line.nav.yaw = 0.0;
        let p = point_from_index(90, &line, true);
        let (n, e) = line.nav.position.displacement_to(&p.location);
        assert_abs_diff_eq!(n, 0.0, epsilon = 1e-3);
        assert_abs_diff_eq!(e, 8.0, epsilon = 1e-3);

        line.nav.yaw = std::f64::consts::FRAC_PI_2; // heading east, starboard is south
        let p = point_from_index(90, &line, true);
        let (n, e) = line.nav.position.displacement_to(&p.location);
        assert_abs_diff_eq!(n, -8.0, epsilon = 1e-3);
        assert_abs_diff_eq!(e, 0.0, epsilon = 1e-3);
    }

    #[test]
    fn test_distance_between_lines() {
        let a = test_line(100, 10.0, 0.0, false);
        let mut b = test_line(100, 10.0, 0.0, false);
        b.nav.position = a.nav.position.offset_by(3.0, 0.0);

        // Same sample on both lines: pure along-track displacement
        assert_abs_diff_eq!(distance_between(90, &a, 90, &b), 3.0, epsilon = 1e-3);
        // 4 m across, 3 m along
        assert_abs_diff_eq!(distance_between(70, &a, 90, &b), 5.0, epsilon = 1e-3);
        assert_abs_diff_eq!(slant_distance_between(70, &a, 90, &b), 5.0, epsilon = 1e-3);
    }

    #[test]
    fn test_height_from_shadow() {
        let line = test_line(100, 20.0, 10.0, false);
        // near edge 12 m, far edge 16 m -> h = 4 * 10 / 16
        let near = 80; // 20 * (160/100 - 1) = 12
        let far = 90; // 16
        assert_abs_diff_eq!(height_between(near, far, &line), 2.5, epsilon = 1e-9);
        assert_abs_diff_eq!(height_between(far, near, &line), 2.5, epsilon = 1e-9);
        assert_eq!(height_between(50, 50, &line), 0.0);
    }

    #[test]
    fn test_ruler_steps() {
        assert_eq!(ruler_step(8.0), 1);
        assert_eq!(ruler_step(30.0), 5);
        assert_eq!(ruler_step(150.0), 20);
        assert_eq!(zoom_ruler_step(45.0), 10.0);
        assert_eq!(zoom_ruler_step(5.0), 1.0);
    }
}
