//! Ready-made datasets covering the layouts the reader has to handle.

use serde_json::json;

use crate::generators::{cell_centers, create_test_cube, create_test_grid, ramp, with_gaps};
use crate::store::{ArraySpec, DType, StoreFixture};

/// Dimensions of [`consolidated_v2`].
pub const CLIMATE_SHAPE: [u64; 3] = [10, 36, 72];

/// Data variables of [`consolidated_v2`], sorted.
pub const CLIMATE_VARIABLES: [&str; 4] = ["CDD0", "DISPH", "FROST_DAYS", "GWETPROF"];

fn lat_lon(fixture: &mut StoreFixture, node: &str, ny: usize, nx: usize, v3: bool) {
    let lat = ArraySpec::coordinate("lat", DType::F64, cell_centers(-90.0, 90.0, ny))
        .attr("units", "degrees_north")
        .attr("standard_name", "latitude");
    let lon = ArraySpec::coordinate("lon", DType::F64, cell_centers(-180.0, 180.0, nx))
        .attr("units", "degrees_east")
        .attr("standard_name", "longitude");
    if v3 {
        fixture.v3_array(node, "lat", lat).v3_array(node, "lon", lon);
    } else {
        fixture.v2_array(node, "lat", lat).v2_array(node, "lon", lon);
    }
}

/// Global monthly climate indicators, Zarr v2 with `.zmetadata`.
///
/// `time` (10, days since 2000-01-01) × `lat` (36) × `lon` (72), bounds
/// are the whole globe.
pub fn consolidated_v2() -> StoreFixture {
    let [nt, ny, nx] = CLIMATE_SHAPE.map(|n| n as usize);
    let dims = ["time", "lat", "lon"];

    let mut fixture = StoreFixture::new();
    fixture.v2_group("", json!({"title": "Climate indicators", "Conventions": "CF-1.8"}));
    lat_lon(&mut fixture, "", ny, nx, false);
    fixture.v2_array(
        "",
        "time",
        ArraySpec::coordinate("time", DType::I64, (0..nt).map(|i| (i * 31) as f64).collect())
            .attr("units", "days since 2000-01-01")
            .attr("calendar", "standard"),
    );

    let cube = create_test_cube(nt, nx, ny);
    let days: Vec<f64> = cube.iter().map(|v| (v % 31.0).floor()).collect();
    fixture
        .v2_array(
            "",
            "CDD0",
            ArraySpec::new(DType::F32, &dims, &CLIMATE_SHAPE, days.clone()).attr("units", "days"),
        )
        .v2_array(
            "",
            "DISPH",
            ArraySpec::new(DType::F32, &dims, &CLIMATE_SHAPE, cube.iter().map(|v| v / 1000.0).collect())
                .attr("units", "m"),
        )
        .v2_array(
            "",
            "FROST_DAYS",
            ArraySpec::new(DType::I16, &dims, &CLIMATE_SHAPE, days).fill_value(-1),
        )
        .v2_array(
            "",
            "GWETPROF",
            ArraySpec::new(DType::F64, &dims, &CLIMATE_SHAPE, vec![0.5; cube.len()]).attr("units", "1"),
        )
        .consolidate_v2("");
    fixture
}

/// Two variables on a projected `y`/`x` grid, Zarr v2 without `.zmetadata`.
///
/// `var1` is a [`create_test_grid`] pattern, `var2` has `-9999` holes.
pub fn unconsolidated_v2() -> StoreFixture {
    let (ny, nx) = (4usize, 5usize);
    let mut fixture = StoreFixture::new();
    fixture
        .v2_group("", json!({"source": "unconsolidated"}))
        .v2_array("", "x", ArraySpec::coordinate("x", DType::F64, cell_centers(0.0, 5000.0, nx)))
        .v2_array("", "y", ArraySpec::coordinate("y", DType::F64, cell_centers(4000.0, 0.0, ny)))
        .v2_array(
            "",
            "var1",
            ArraySpec::new(DType::F32, &["y", "x"], &[ny as u64, nx as u64], create_test_grid(nx, ny)),
        )
        .v2_array(
            "",
            "var2",
            ArraySpec::new(
                DType::F64,
                &["y", "x"],
                &[ny as u64, nx as u64],
                with_gaps(ramp(nx * ny), 4, -9999.0),
            )
            .attr("_FillValue", -9999.0),
        );
    fixture
}

/// Zarr v3 store with a `surface` subgroup, optionally consolidated.
///
/// Root: `temperature` (time 3 × lat 4 × lon 8). `surface`: `pressure`
/// (lat 4 × lon 8).
pub fn zarr_v3(consolidated: bool) -> StoreFixture {
    let (nt, ny, nx) = (3usize, 4usize, 8usize);
    let mut fixture = StoreFixture::new();
    fixture.v3_group("", json!({"title": "v3 fixture"}));
    lat_lon(&mut fixture, "", ny, nx, true);
    fixture
        .v3_array(
            "",
            "time",
            ArraySpec::coordinate("time", DType::F64, vec![0.0, 6.0, 12.0])
                .attr("units", "hours since 2024-01-15T00:00:00Z"),
        )
        .v3_array(
            "",
            "temperature",
            ArraySpec::new(
                DType::F32,
                &["time", "lat", "lon"],
                &[nt as u64, ny as u64, nx as u64],
                create_test_cube(nt, nx, ny),
            )
            .attr("units", "K"),
        )
        .v3_group("surface", json!({"description": "surface fields"}));
    lat_lon(&mut fixture, "surface", ny, nx, true);
    fixture.v3_array(
        "surface",
        "pressure",
        ArraySpec::new(
            DType::F64,
            &["lat", "lon"],
            &[ny as u64, nx as u64],
            vec![101_325.0; ny * nx],
        )
        .attr("units", "Pa"),
    );

    if consolidated {
        fixture.consolidate_v3("");
    }
    fixture
}

/// Three-level pyramid (`0` finest, `2` coarsest) with a `multiscales`
/// attribute, Zarr v2 with root `.zmetadata`. Each level holds `value`.
pub fn pyramid() -> StoreFixture {
    let mut fixture = StoreFixture::new();
    fixture.v2_group(
        "",
        json!({"multiscales": [{"datasets": [{"path": "0"}, {"path": "1"}, {"path": "2"}]}]}),
    );

    for level in 0..3u32 {
        let node = level.to_string();
        let n = 16usize >> level;
        fixture
            .v2_group(&node, json!({"level": level}))
            .v2_array(&node, "x", ArraySpec::coordinate("x", DType::F64, cell_centers(-180.0, 180.0, n)))
            .v2_array(&node, "y", ArraySpec::coordinate("y", DType::F64, cell_centers(90.0, -90.0, n)))
            .v2_array(
                &node,
                "value",
                ArraySpec::new(DType::F32, &["y", "x"], &[n as u64, n as u64], create_test_grid(n, n)),
            );
    }

    fixture.consolidate_v2("");
    fixture
}

/// A 365-day model calendar that must stay undecoded.
pub fn noleap_time() -> StoreFixture {
    let mut fixture = StoreFixture::new();
    fixture.v2_group("", json!({}));
    lat_lon(&mut fixture, "", 2, 4, false);
    fixture
        .v2_array(
            "",
            "time",
            ArraySpec::coordinate("time", DType::F64, vec![0.0, 365.0, 730.0])
                .attr("units", "days since 0001-01-01 00:00:00")
                .attr("calendar", "noleap"),
        )
        .v2_array(
            "",
            "tas",
            ArraySpec::new(DType::F32, &["time", "lat", "lon"], &[3, 2, 4], vec![288.0; 24]),
        )
        .consolidate_v2("");
    fixture
}

/// A single `flat` variable holding `value` everywhere.
pub fn constant(value: f64) -> StoreFixture {
    let mut fixture = StoreFixture::new();
    fixture.v2_group("", json!({}));
    lat_lon(&mut fixture, "", 6, 6, false);
    fixture
        .v2_array(
            "",
            "flat",
            ArraySpec::new(DType::F64, &["lat", "lon"], &[6, 6], vec![value; 36]),
        )
        .consolidate_v2("");
    fixture
}

/// A float variable whose every third value is NaN (the Zarr fill value).
pub fn nan_filled() -> StoreFixture {
    let mut fixture = StoreFixture::new();
    fixture.v2_group("", json!({}));
    lat_lon(&mut fixture, "", 3, 4, false);
    fixture
        .v2_array(
            "",
            "sparse",
            ArraySpec::new(DType::F32, &["lat", "lon"], &[3, 4], with_gaps(ramp(12), 3, f64::NAN)),
        )
        .consolidate_v2("");
    fixture
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consolidated_v2_layout() {
        let fixture = consolidated_v2();
        assert!(fixture.contains(".zmetadata"));
        for name in CLIMATE_VARIABLES {
            assert!(fixture.contains(&format!("{}/.zarray", name)), "{}", name);
            assert!(fixture.contains(&format!("{}/0.0.0", name)), "{}", name);
        }
    }

    #[test]
    fn test_unconsolidated_has_no_index() {
        let fixture = unconsolidated_v2();
        assert!(!fixture.contains(".zmetadata"));
        assert!(fixture.contains("var1/0.0"));
    }

    #[test]
    fn test_pyramid_levels() {
        let fixture = pyramid();
        for level in ["0", "1", "2"] {
            assert!(fixture.contains(&format!("{}/.zgroup", level)));
            assert!(fixture.contains(&format!("{}/value/0.0", level)));
        }
        assert!(!fixture.contains("3/.zgroup"));
    }

    #[test]
    fn test_v3_chunk_keys() {
        let fixture = zarr_v3(false);
        assert!(fixture.contains("temperature/c/0/0/0"));
        assert!(fixture.contains("surface/pressure/c/0/0"));
    }
}
