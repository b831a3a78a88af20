//! Grid-cell indexing.
//!
//! Pre-aggregated ocean profiles are keyed by 2°×2° latitude/longitude
//! cells identified by their center coordinates. [`resolve`] maps any
//! free-form coordinate pair to the id of the cell containing it, and is
//! shared by every endpoint that addresses stored rows so the runtime key
//! space matches the one written at ingestion time.

/// Default cell size in degrees, matching the ingestion job.
pub const DEFAULT_CELL_SIZE: f64 = 2.0;

/// Resolve a latitude/longitude pair to its grid-cell id.
///
/// The cell center is `floor(coord / cell_size) * cell_size + cell_size/2`
/// per axis, so a coordinate exactly on a cell boundary belongs to the cell
/// above it. The mapping is pure, total, and deterministic.
///
/// # Example
///
/// ```rust
/// use floatchat::grid;
///
/// assert_eq!(grid::resolve(12.3, 61.4, 2.0), "13.0_61.0");
/// ```
pub fn resolve(lat: f64, lng: f64, cell_size: f64) -> String {
    let lat_center = (lat / cell_size).floor() * cell_size + cell_size / 2.0;
    let lng_center = (lng / cell_size).floor() * cell_size + cell_size / 2.0;
    format!("{}_{}", fmt_coord(lat_center), fmt_coord(lng_center))
}

/// Render a cell-center coordinate the way the ingestion job rendered it:
/// whole numbers keep one decimal place (`13.0`), fractional centers render
/// minimally (`13.5`).
fn fmt_coord(value: f64) -> String {
    if value == value.trunc() {
        format!("{:.1}", value)
    } else {
        format!("{}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_cell() {
        // floor(12.3/2)*2+1 = 13, floor(61.4/2)*2+1 = 61
        assert_eq!(resolve(12.3, 61.4, 2.0), "13.0_61.0");
    }

    #[test]
    fn test_same_cell_same_id() {
        let a = resolve(12.1, 60.2, 2.0);
        let b = resolve(13.9, 61.9, 2.0);
        assert_eq!(a, b);
    }

    #[test]
    fn test_boundary_belongs_to_cell_above() {
        // 12.0 is a multiple of the cell size: floor semantics put it in
        // the cell centered at 13.0, not 11.0.
        assert_eq!(resolve(12.0, 60.0, 2.0), "13.0_61.0");
        assert_eq!(resolve(11.999, 60.0, 2.0), "11.0_61.0");
    }

    #[test]
    fn test_negative_coordinates() {
        // floor(-0.5) = -1, center = -2 + 1 = -1
        assert_eq!(resolve(-1.0, -1.0, 2.0), "-1.0_-1.0");
        assert_eq!(resolve(-2.0, -2.0, 2.0), "-1.0_-1.0");
        assert_eq!(resolve(-2.1, -2.1, 2.0), "-3.0_-3.0");
    }

    #[test]
    fn test_deterministic() {
        for _ in 0..3 {
            assert_eq!(resolve(8.77, 73.12, 2.0), resolve(8.77, 73.12, 2.0));
        }
    }

    #[test]
    fn test_fractional_center() {
        // cell_size 1.0 gives half-degree centers
        assert_eq!(resolve(0.2, 0.7, 1.0), "0.5_0.5");
    }
}
