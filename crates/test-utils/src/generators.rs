//! Test data generators for synthetic gridded data.
//!
//! These generators create predictable, verifiable patterns so tests can
//! check exactly which values came back from a store.

/// Creates a test grid with predictable values.
///
/// Each cell value is calculated as: `col * 1000 + row`
///
/// This makes it easy to verify that data is being read correctly by
/// checking that grid[row][col] == col * 1000 + row.
///
/// # Example
///
/// ```
/// use test_utils::create_test_grid;
///
/// let grid = create_test_grid(10, 5);
/// assert_eq!(grid.len(), 50); // 10 * 5
/// assert_eq!(grid[0], 0.0);   // col=0, row=0 -> 0*1000 + 0
/// assert_eq!(grid[1], 1000.0); // col=1, row=0 -> 1*1000 + 0
/// assert_eq!(grid[10], 1.0);  // col=0, row=1 -> 0*1000 + 1
/// ```
pub fn create_test_grid(width: usize, height: usize) -> Vec<f64> {
    let mut data = Vec::with_capacity(width * height);
    for row in 0..height {
        for col in 0..width {
            data.push((col * 1000 + row) as f64);
        }
    }
    data
}

/// A stack of `layers` test grids; layer `t` is offset by `t * 1_000_000`.
pub fn create_test_cube(layers: usize, width: usize, height: usize) -> Vec<f64> {
    let grid = create_test_grid(width, height);
    (0..layers)
        .flat_map(|t| grid.iter().map(move |v| v + (t * 1_000_000) as f64))
        .collect()
}

/// `n` cell-center coordinates evenly covering `[min, max]`.
///
/// ```
/// use test_utils::cell_centers;
///
/// assert_eq!(cell_centers(-180.0, 180.0, 4), vec![-135.0, -45.0, 45.0, 135.0]);
/// ```
pub fn cell_centers(min: f64, max: f64, n: usize) -> Vec<f64> {
    let step = (max - min) / n as f64;
    (0..n).map(|i| min + step * (i as f64 + 0.5)).collect()
}

/// `0, 1, 2, …, n - 1` as f64.
pub fn ramp(n: usize) -> Vec<f64> {
    (0..n).map(|i| i as f64).collect()
}

/// Replace every `every`-th value (starting at 0) with `fill`.
pub fn with_gaps(mut data: Vec<f64>, every: usize, fill: f64) -> Vec<f64> {
    if every > 0 {
        for v in data.iter_mut().step_by(every) {
            *v = fill;
        }
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_test_cube_offsets_layers() {
        let cube = create_test_cube(2, 3, 2);
        assert_eq!(cube.len(), 12);
        assert_eq!(cube[0], 0.0);
        assert_eq!(cube[6], 1_000_000.0);
    }

    #[test]
    fn test_cell_centers_descending() {
        assert_eq!(cell_centers(90.0, -90.0, 2), vec![45.0, -45.0]);
    }

    #[test]
    fn test_with_gaps() {
        let data = with_gaps(ramp(5), 2, f64::NAN);
        assert!(data[0].is_nan());
        assert_eq!(data[1], 1.0);
        assert!(data[2].is_nan());
        assert!(data[4].is_nan());
    }
}
