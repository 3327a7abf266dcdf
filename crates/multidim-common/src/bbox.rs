//! Bounding box types and operations.

use serde::{Deserialize, Serialize};

/// A geographic or projected bounding box.
///
/// For geographic CRS (EPSG:4326), coordinates are in degrees.
/// Datasets on a 0..360 longitude axis keep that convention here.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    /// Create a new bounding box from corner coordinates.
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Build the extent covered by cell-centered coordinate axes.
    ///
    /// Each axis is expanded by half of its spacing so the box covers the
    /// cell edges rather than the cell centers. Axes may be descending.
    /// Returns `None` when either axis is empty or contains no finite value.
    pub fn from_cell_centers(xs: &[f64], ys: &[f64]) -> Option<Self> {
        let (min_x, max_x, half_x) = axis_extent(xs)?;
        let (min_y, max_y, half_y) = axis_extent(ys)?;

        Some(Self {
            min_x: min_x - half_x,
            min_y: min_y - half_y,
            max_x: max_x + half_x,
            max_y: max_y + half_y,
        })
    }
}

fn axis_extent(values: &[f64]) -> Option<(f64, f64, f64)> {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return None;
    }

    let min = finite.iter().copied().fold(f64::INFINITY, f64::min);
    let max = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let half_step = if finite.len() > 1 {
        ((max - min) / (finite.len() - 1) as f64) / 2.0
    } else {
        0.0
    };

    Some((min, max, half_step))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_cell_centers_expands_by_half_cell() {
        // 5 degree cells, centered like the usual global lat/lon fixtures
        let lons: Vec<f64> = (0..72).map(|i| -177.5 + 5.0 * i as f64).collect();
        let lats: Vec<f64> = (0..36).map(|i| -87.5 + 5.0 * i as f64).collect();

        let bbox = BoundingBox::from_cell_centers(&lons, &lats).unwrap();
        assert!((bbox.min_x + 180.0).abs() < 1e-9);
        assert!((bbox.max_x - 180.0).abs() < 1e-9);
        assert!((bbox.min_y + 90.0).abs() < 1e-9);
        assert!((bbox.max_y - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_from_cell_centers_descending_axis() {
        let lats = [45.0, 35.0, 25.0];
        let lons = [10.0, 20.0];

        let bbox = BoundingBox::from_cell_centers(&lons, &lats).unwrap();
        assert_eq!(bbox.min_y, 20.0);
        assert_eq!(bbox.max_y, 50.0);
        assert_eq!(bbox.min_x, 5.0);
        assert_eq!(bbox.max_x, 25.0);
    }

    #[test]
    fn test_from_cell_centers_empty_axis() {
        assert!(BoundingBox::from_cell_centers(&[], &[1.0]).is_none());
        assert!(BoundingBox::from_cell_centers(&[f64::NAN], &[1.0]).is_none());
    }
}
