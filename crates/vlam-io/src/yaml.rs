//! YAML map file reading and writing.
//!
//! The persisted schema:
//!
//! ```yaml
//! marker_length: 0.1
//! map_style: 1
//! markers:
//!   - id: 0
//!     u: 1
//!     f: 1
//!     xyz: [0.0, 0.0, 0.0]
//!     rpy: [0.0, 0.0, 0.0]
//!     cov: [0.0, ...]        # 36 entries, omitted when map_style is 0
//! ```
//!
//! A missing `map_style` reads as pose-only. Errors carry descriptive
//! messages so the caller's initialization fallback can log them.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use vlam_core::{Map, MapStyle, Marker, Real, TransformWithCovariance};

/// Errors from reading or writing a map file.
#[derive(Debug, Error)]
pub enum MapFileError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("map file invalid: {0}")]
    Model(String),
}

#[derive(Debug, Serialize, Deserialize)]
struct MarkerEntry {
    id: i32,
    /// Update count.
    u: u32,
    /// Fixed flag, 0 or 1.
    f: i32,
    xyz: [Real; 3],
    rpy: [Real; 3],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cov: Option<Vec<Real>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MapFile {
    marker_length: Real,
    #[serde(default)]
    map_style: i32,
    markers: Vec<MarkerEntry>,
}

fn marker_to_entry(marker: &Marker, map_style: MapStyle) -> Result<MarkerEntry, MapFileError> {
    let mu = marker.t_map_marker().mu().ok_or_else(|| {
        MapFileError::Model(format!("marker {} has no pose", marker.id()))
    })?;

    let cov = if map_style == MapStyle::Pose {
        None
    } else {
        let cov = marker
            .t_map_marker()
            .covariance()
            .copied()
            .unwrap_or_else(vlam_core::Cov6::zeros);
        // Row-major flattening of the 6x6.
        Some(cov.transpose().as_slice().to_vec())
    };

    Ok(MarkerEntry {
        id: marker.id(),
        u: marker.update_count(),
        f: i32::from(marker.is_fixed()),
        xyz: [mu[0], mu[1], mu[2]],
        rpy: [mu[3], mu[4], mu[5]],
        cov,
    })
}

fn entry_to_marker(entry: &MarkerEntry, map_style: MapStyle) -> Result<Marker, MapFileError> {
    let mu = [
        entry.xyz[0],
        entry.xyz[1],
        entry.xyz[2],
        entry.rpy[0],
        entry.rpy[1],
        entry.rpy[2],
    ];

    let t_map_marker = if map_style == MapStyle::Pose {
        TransformWithCovariance::from_mu(&mu)
    } else {
        let cov = entry.cov.as_ref().ok_or_else(|| {
            MapFileError::Model(format!("marker {} missing covariance", entry.id))
        })?;
        let cov: &[Real; 36] = cov.as_slice().try_into().map_err(|_| {
            MapFileError::Model(format!(
                "marker {} covariance has {} entries, expected 36",
                entry.id,
                cov.len()
            ))
        })?;
        TransformWithCovariance::from_mu_cov(&mu, cov)
    };

    let mut marker = Marker::new(entry.id, t_map_marker);
    marker.set_is_fixed(entry.f != 0);
    marker.set_update_count(entry.u);
    Ok(marker)
}

/// Serialize a map to a YAML string.
pub fn map_to_yaml_string(map: &Map) -> Result<String, MapFileError> {
    let file = MapFile {
        marker_length: map.marker_length(),
        map_style: map.map_style().as_code(),
        markers: map
            .markers()
            .map(|m| marker_to_entry(m, map.map_style()))
            .collect::<Result<_, _>>()?,
    };
    Ok(serde_yaml::to_string(&file)?)
}

/// Parse a map from a YAML string.
pub fn map_from_yaml_str(yaml: &str) -> Result<Map, MapFileError> {
    let file: MapFile = serde_yaml::from_str(yaml)?;

    let map_style = MapStyle::from_code(file.map_style)
        .ok_or_else(|| MapFileError::Model(format!("unknown map_style {}", file.map_style)))?;

    let mut map = Map::new(map_style, file.marker_length);
    for entry in &file.markers {
        let marker = entry_to_marker(entry, map_style)?;
        map.add_marker(marker)
            .map_err(|e| MapFileError::Model(e.to_string()))?;
    }
    Ok(map)
}

/// Write a map to a YAML file.
pub fn save_map<P: AsRef<Path>>(map: &Map, path: P) -> Result<(), MapFileError> {
    std::fs::write(path, map_to_yaml_string(map)?)?;
    Ok(())
}

/// Read a map from a YAML file.
pub fn load_map<P: AsRef<Path>>(path: P) -> Result<Map, MapFileError> {
    map_from_yaml_str(&std::fs::read_to_string(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vlam_core::Cov6;

    fn covariance_map() -> Map {
        let mut map = Map::new(MapStyle::Covariance, 0.1);

        let fixed = Marker::new_fixed(0, TransformWithCovariance::identity());
        map.add_marker(fixed).unwrap();

        let mut cov = Cov6::zeros();
        for r in 0..6 {
            for c in 0..6 {
                cov[(r, c)] = if r == c {
                    0.01 + r as Real * 0.001
                } else {
                    1e-4 * (r * 6 + c) as Real
                };
            }
        }
        let mut floating = Marker::new(2, TransformWithCovariance::from_iso_cov(
            vlam_core::iso_from_mu(&[0.4, -0.1, 0.02, 0.01, -0.02, 0.5]),
            cov,
        ));
        floating.set_update_count(7);
        map.add_marker(floating).unwrap();

        map
    }

    #[test]
    fn covariance_map_roundtrip() {
        let map = covariance_map();
        let yaml = map_to_yaml_string(&map).unwrap();
        let parsed = map_from_yaml_str(&yaml).unwrap();

        assert_eq!(parsed.map_style(), MapStyle::Covariance);
        assert!((parsed.marker_length() - 0.1).abs() < 1e-15);
        assert_eq!(parsed.len(), 2);

        for original in map.markers() {
            let restored = parsed.find_marker(original.id()).unwrap();
            assert_eq!(restored.is_fixed(), original.is_fixed());
            assert_eq!(restored.update_count(), original.update_count());

            let mu_orig = original.t_map_marker().mu().unwrap();
            let mu_rest = restored.t_map_marker().mu().unwrap();
            for i in 0..6 {
                assert!((mu_orig[i] - mu_rest[i]).abs() < 1e-12, "mu[{}]", i);
            }

            let cov_orig = original.t_map_marker().covariance().unwrap();
            let cov_rest = restored.t_map_marker().covariance().unwrap();
            for r in 0..6 {
                for c in 0..6 {
                    assert!(
                        (cov_orig[(r, c)] - cov_rest[(r, c)]).abs() < 1e-12,
                        "cov[({}, {})]",
                        r,
                        c
                    );
                }
            }
        }
    }

    #[test]
    fn pose_style_omits_covariance() {
        let mut map = Map::new(MapStyle::Pose, 0.2);
        map.add_marker(Marker::new_fixed(1, TransformWithCovariance::identity()))
            .unwrap();
        let yaml = map_to_yaml_string(&map).unwrap();
        assert!(!yaml.contains("cov"), "unexpected covariance in:\n{yaml}");

        let parsed = map_from_yaml_str(&yaml).unwrap();
        assert_eq!(parsed.map_style(), MapStyle::Pose);
        assert!(parsed.find_marker(1).unwrap().is_fixed());
    }

    #[test]
    fn missing_map_style_reads_as_pose() {
        let yaml = "\
marker_length: 0.15
markers:
  - id: 4
    u: 2
    f: 0
    xyz: [1.0, 2.0, 3.0]
    rpy: [0.0, 0.0, 0.1]
";
        let map = map_from_yaml_str(yaml).unwrap();
        assert_eq!(map.map_style(), MapStyle::Pose);
        let marker = map.find_marker(4).unwrap();
        assert_eq!(marker.update_count(), 2);
        assert!(!marker.is_fixed());
        assert!((marker.t_map_marker().mu().unwrap()[0] - 1.0).abs() < 1e-15);
    }

    #[test]
    fn wrong_covariance_length_is_an_error() {
        let yaml = "\
marker_length: 0.1
map_style: 1
markers:
  - id: 0
    u: 1
    f: 1
    xyz: [0.0, 0.0, 0.0]
    rpy: [0.0, 0.0, 0.0]
    cov: [1.0, 2.0]
";
        let err = map_from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, MapFileError::Model(_)), "got {err:?}");
    }

    #[test]
    fn malformed_yaml_is_a_parse_error() {
        let err = map_from_yaml_str(": not yaml [").unwrap_err();
        assert!(matches!(err, MapFileError::Parse(_)), "got {err:?}");
    }

    #[test]
    fn file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.yaml");

        let map = covariance_map();
        save_map(&map, &path).unwrap();
        let loaded = load_map(&path).unwrap();

        assert_eq!(loaded.len(), map.len());
        assert_eq!(loaded.map_style(), map.map_style());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = load_map("/nonexistent/map.yaml").unwrap_err();
        assert!(matches!(err, MapFileError::Io(_)), "got {err:?}");
    }
}
