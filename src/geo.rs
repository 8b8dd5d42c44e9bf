//! Bounding box from a center point + size (spec §1 non-goals: "no
//! geographic projection beyond a simple mean-latitude equirectangular
//! mapping used for bounding-box filtering").
//!
//! Grounded on `trunk/smrender.c`'s window-setup code: `wc = mean_lat_len /
//! cos(mean_lat * pi / 180)` widens the longitude span as latitude departs
//! from the equator, so a box that looks square on a Mercator-ish chart
//! still covers a roughly constant ground distance in both directions.

use std::f64::consts::PI;

/// The `<scale|sizeM|sizeD>` portion of the CLI's positional argument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScaleSpec {
    /// Bare number: a cartographic scale (e.g. `50000` for 1:50000). This
    /// only resolves to a bbox in terms of paper size and DPI, which are
    /// out of scope here; see [`bbox_from_center`].
    Scale(f64),
    /// `Nm` suffix: N arc-minutes of latitude (original_source's nautical
    /// convention, one arc-minute of latitude is one nautical mile).
    SizeMinutes(f64),
    /// `Nd` suffix: N degrees of latitude.
    SizeDegrees(f64),
}

/// Parses the positional `<lat>:<lon>:<scale|sizeM|sizeD>` argument.
pub fn parse_center_arg(arg: &str) -> Result<(f64, f64, ScaleSpec), String> {
    let mut parts = arg.splitn(3, ':');
    let lat = parts.next().ok_or_else(|| "missing latitude".to_string())?;
    let lon = parts.next().ok_or_else(|| "missing longitude".to_string())?;
    let size = parts.next().ok_or_else(|| "missing scale/size".to_string())?;

    let lat: f64 = lat.parse().map_err(|_| format!("invalid latitude '{lat}'"))?;
    let lon: f64 = lon.parse().map_err(|_| format!("invalid longitude '{lon}'"))?;
    let scale = parse_scale_spec(size)?;

    Ok((lat, lon, scale))
}

fn parse_scale_spec(s: &str) -> Result<ScaleSpec, String> {
    if let Some(n) = s.strip_suffix(['m', 'M']) {
        let v: f64 = n.parse().map_err(|_| format!("invalid size '{s}'"))?;
        return Ok(ScaleSpec::SizeMinutes(v));
    }
    if let Some(n) = s.strip_suffix(['d', 'D']) {
        let v: f64 = n.parse().map_err(|_| format!("invalid size '{s}'"))?;
        return Ok(ScaleSpec::SizeDegrees(v));
    }
    let v: f64 = s.parse().map_err(|_| format!("invalid scale '{s}'"))?;
    Ok(ScaleSpec::Scale(v))
}

/// Computes `(min_lat, min_lon, max_lat, max_lon)` around `(lat, lon)`.
///
/// Returns `None` for a bare [`ScaleSpec::Scale`]: resolving a cartographic
/// scale to ground distance needs paper width and DPI, which belong to the
/// out-of-scope drawing backend. Callers should log and fall back to
/// unrestricted loading in that case.
pub fn bbox_from_center(lat: f64, lon: f64, scale: ScaleSpec) -> Option<(f64, f64, f64, f64)> {
    let mean_lat_len = match scale {
        ScaleSpec::Scale(_) => return None,
        ScaleSpec::SizeMinutes(minutes) => minutes / 60.0,
        ScaleSpec::SizeDegrees(degrees) => degrees,
    };

    let wc = mean_lat_len / (lat * PI / 180.0).cos();
    let min_lat = lat - mean_lat_len / 2.0;
    let max_lat = lat + mean_lat_len / 2.0;
    let min_lon = lon - wc / 2.0;
    let max_lon = lon + wc / 2.0;
    Some((min_lat, min_lon, max_lat, max_lon))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_scale() {
        let (lat, lon, scale) = parse_center_arg("45.0:14.0:50000").unwrap();
        assert_eq!(lat, 45.0);
        assert_eq!(lon, 14.0);
        assert_eq!(scale, ScaleSpec::Scale(50000.0));
    }

    #[test]
    fn parses_minutes_and_degrees() {
        assert_eq!(parse_scale_spec("12m").unwrap(), ScaleSpec::SizeMinutes(12.0));
        assert_eq!(parse_scale_spec("0.5d").unwrap(), ScaleSpec::SizeDegrees(0.5));
    }

    #[test]
    fn rejects_malformed_argument() {
        assert!(parse_center_arg("45.0:14.0").is_err());
        assert!(parse_center_arg("nope:14.0:1d").is_err());
    }

    #[test]
    fn scale_alone_has_no_bbox() {
        assert_eq!(bbox_from_center(45.0, 14.0, ScaleSpec::Scale(50000.0)), None);
    }

    #[test]
    fn degrees_bbox_is_centered() {
        let (min_lat, min_lon, max_lat, max_lon) = bbox_from_center(0.0, 0.0, ScaleSpec::SizeDegrees(2.0)).unwrap();
        // at the equator cos(0) == 1, so the box is square.
        assert_eq!((min_lat, max_lat), (-1.0, 1.0));
        assert_eq!((min_lon, max_lon), (-1.0, 1.0));
    }

    #[test]
    fn off_equator_widens_longitude_span() {
        let (min_lat, min_lon, max_lat, max_lon) = bbox_from_center(60.0, 10.0, ScaleSpec::SizeDegrees(1.0)).unwrap();
        assert!(max_lat - min_lat < max_lon - min_lon);
    }
}
