//! Point transforms between coordinate reference systems.
//!
//! Pure Rust via `proj4rs` with PROJ strings resolved from the
//! `crs-definitions` database, so the engine carries no GDAL or system PROJ
//! requirement. Transforms between identical CRSs are short-circuited.

use super::ReprojectError;
use proj4rs::proj::Proj;
use proj4rs::transform::transform;

/// Returns the PROJ4 string for an EPSG code, if the code is known.
fn proj_string(epsg: u16) -> Option<&'static str> {
    crs_definitions::from_code(epsg).map(|def| def.proj4)
}

/// True if the EPSG code denotes a geographic (lon/lat, degrees) CRS.
///
/// proj4rs works in radians for geographic systems, so both ends of a
/// transform need degree/radian conversion when geographic.
fn is_geographic(epsg: u16) -> bool {
    if let Some(proj_str) = proj_string(epsg) {
        proj_str.contains("+proj=longlat")
    } else {
        epsg == 4326 || (4000..5000).contains(&epsg)
    }
}

/// One-direction point transformer between two EPSG-coded CRSs.
pub struct CrsTransformer {
    /// `None` when source and target are the same CRS.
    projs: Option<(Proj, Proj)>,
    from_geographic: bool,
    to_geographic: bool,
}

impl CrsTransformer {
    /// Builds a transformer from `from_epsg` to `to_epsg`.
    ///
    /// # Errors
    ///
    /// Returns [`ReprojectError::Projection`] if either code is absent from
    /// the CRS database or its PROJ string fails to parse.
    pub fn new(from_epsg: u16, to_epsg: u16) -> Result<Self, ReprojectError> {
        if from_epsg == to_epsg {
            return Ok(Self {
                projs: None,
                from_geographic: false,
                to_geographic: false,
            });
        }

        let from_str = proj_string(from_epsg).ok_or_else(|| {
            ReprojectError::Projection(format!("EPSG:{from_epsg} is not in the CRS database"))
        })?;
        let to_str = proj_string(to_epsg).ok_or_else(|| {
            ReprojectError::Projection(format!("EPSG:{to_epsg} is not in the CRS database"))
        })?;

        let from_proj = Proj::from_proj_string(from_str).map_err(|e| {
            ReprojectError::Projection(format!("invalid projection EPSG:{from_epsg}: {e:?}"))
        })?;
        let to_proj = Proj::from_proj_string(to_str).map_err(|e| {
            ReprojectError::Projection(format!("invalid projection EPSG:{to_epsg}: {e:?}"))
        })?;

        Ok(Self {
            projs: Some((from_proj, to_proj)),
            from_geographic: is_geographic(from_epsg),
            to_geographic: is_geographic(to_epsg),
        })
    }

    /// True if this transformer passes points through unchanged.
    pub fn is_identity(&self) -> bool {
        self.projs.is_none()
    }

    /// Transforms a single point.
    ///
    /// # Errors
    ///
    /// Returns [`ReprojectError::Projection`] when the point is outside the
    /// projection's domain. Callers sampling a pixel grid treat that as
    /// "outside source coverage", not as a fatal condition.
    pub fn transform(&self, x: f64, y: f64) -> Result<(f64, f64), ReprojectError> {
        let Some((from_proj, to_proj)) = &self.projs else {
            return Ok((x, y));
        };

        let (x_in, y_in) = if self.from_geographic {
            (x.to_radians(), y.to_radians())
        } else {
            (x, y)
        };

        let mut point = (x_in, y_in, 0.0);
        transform(from_proj, to_proj, &mut point)
            .map_err(|e| ReprojectError::Projection(format!("transform failed: {e:?}")))?;

        if self.to_geographic {
            Ok((point.0.to_degrees(), point.1.to_degrees()))
        } else {
            Ok((point.0, point.1))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-6;

    #[test]
    fn test_identity_same_crs() {
        let t = CrsTransformer::new(4326, 4326).unwrap();
        assert!(t.is_identity());
        let (x, y) = t.transform(117.5, -34.5).unwrap();
        assert!((x - 117.5).abs() < EPS);
        assert!((y - (-34.5)).abs() < EPS);
    }

    #[test]
    fn test_4326_to_3857_origin() {
        let t = CrsTransformer::new(4326, 3857).unwrap();
        let (x, y) = t.transform(0.0, 0.0).unwrap();
        assert!(x.abs() < EPS);
        assert!(y.abs() < EPS);
    }

    #[test]
    fn test_roundtrip_4326_3857() {
        let fwd = CrsTransformer::new(4326, 3857).unwrap();
        let back = CrsTransformer::new(3857, 4326).unwrap();
        for (lon, lat) in [(117.5, -34.5), (141.2, -37.8), (-122.4, 37.8)] {
            let (x, y) = fwd.transform(lon, lat).unwrap();
            let (lon2, lat2) = back.transform(x, y).unwrap();
            assert!((lon - lon2).abs() < EPS, "lon: {lon} != {lon2}");
            assert!((lat - lat2).abs() < EPS, "lat: {lat} != {lat2}");
        }
    }

    #[test]
    fn test_utm_zone_transform() {
        // Perth sits in UTM zone 50 south; easting near zone centre.
        let t = CrsTransformer::new(4326, 32750).unwrap();
        let (x, y) = t.transform(117.0, -34.5).unwrap();
        assert!(x > 300_000.0 && x < 700_000.0, "easting: {x}");
        assert!(y > 6_000_000.0 && y < 6_500_000.0, "northing: {y}");
    }

    #[test]
    fn test_unknown_epsg_is_error() {
        let result = CrsTransformer::new(4326, 65000);
        assert!(matches!(result, Err(ReprojectError::Projection(_))));
    }
}
