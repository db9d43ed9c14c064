//! Line-of-sight checks over a walkability grid.
//!
//! Integer Bresenham walk between the truncated endpoints. At every step the
//! pivot cell is checked, and when the line changes row/column the one or two
//! cells adjacent to the corner are checked too, so the line cannot slip
//! diagonally between two blocked cells. Adapted from Dedu's supercover line
//! algorithm.

use crate::grid::{Grid, WALKABLE};

/// Whether a straight walk between the two world-space points stays on
/// walkable cells. `from` must itself be on a walkable cell.
pub fn can_walk(grid: &Grid, from: (f64, f64), to: (f64, f64)) -> bool {
    walk_line(grid, from, to).is_none()
}

/// The furthest point on the straight line from `from` toward `to` that is
/// still confirmed walkable. Returns `None` if `from` itself is not
/// walkable.
pub fn safe_walk_to(grid: &Grid, from: (f64, f64), to: (f64, f64)) -> Option<(f64, f64)> {
    if !grid.is_walkable(from.0, from.1) {
        return None;
    }
    match walk_line(grid, from, to) {
        None => Some(to),
        Some((gx, gy)) => Some(((gx + grid.min_x()) as f64, (gy + grid.min_y()) as f64)),
    }
}

/// Runs the rasterized walk. Returns `None` if every checked cell is
/// walkable, otherwise the last confirmed-walkable grid coordinate before
/// the first failing check.
fn walk_line(grid: &Grid, from: (f64, f64), to: (f64, f64)) -> Option<(i64, i64)> {
    let mut x = from.0.trunc() as i64 - grid.min_x();
    let mut y = from.1.trunc() as i64 - grid.min_y();
    let mut dx = to.0.trunc() as i64 - from.0.trunc() as i64;
    let mut dy = to.1.trunc() as i64 - from.1.trunc() as i64;

    if grid.cell(x, y) != Some(WALKABLE) {
        return Some((x, y));
    }

    let ystep = if dy < 0 {
        dy = -dy;
        -1
    } else {
        1
    };
    let xstep = if dx < 0 {
        dx = -dx;
        -1
    } else {
        1
    };
    let ddy = 2 * dy;
    let ddx = 2 * dx;

    let walkable = |gx: i64, gy: i64| grid.cell(gx, gy) == Some(WALKABLE);

    if ddx >= ddy {
        // First octant: 0 <= |slope| <= 1.
        let mut error = dx;
        let mut errorprev = dx;
        for _ in 0..dx {
            x += xstep;
            error += ddy;
            if error > ddx {
                y += ystep;
                error -= ddx;
                if error + errorprev < ddx {
                    // The line also crossed the cell below the corner.
                    if !walkable(x, y - ystep) {
                        return Some((x - xstep, y - ystep));
                    }
                } else if error + errorprev > ddx {
                    // The line also crossed the cell left of the corner.
                    if !walkable(x - xstep, y) {
                        return Some((x - xstep, y - ystep));
                    }
                } else {
                    // Exact corner crossing: both neighbors matter.
                    if !walkable(x, y - ystep) || !walkable(x - xstep, y) {
                        return Some((x - xstep, y - ystep));
                    }
                }
            }
            if !walkable(x, y) {
                return Some((x - xstep, y));
            }
            errorprev = error;
        }
    } else {
        let mut error = dy;
        let mut errorprev = dy;
        for _ in 0..dy {
            y += ystep;
            error += ddx;
            if error > ddy {
                x += xstep;
                error -= ddy;
                if error + errorprev < ddy {
                    if !walkable(x - xstep, y) {
                        return Some((x - xstep, y - ystep));
                    }
                } else if error + errorprev > ddy {
                    if !walkable(x, y - ystep) {
                        return Some((x - xstep, y - ystep));
                    }
                } else {
                    if !walkable(x - xstep, y) || !walkable(x, y - ystep) {
                        return Some((x - xstep, y - ystep));
                    }
                }
            }
            if !walkable(x, y) {
                return Some((x, y - ystep));
            }
            errorprev = error;
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::data::{MapGeometry, Segment, SpawnPoint};
    use shared::distance;

    fn walled_grid() -> Grid {
        let geometry = MapGeometry {
            min_x: -50,
            min_y: -50,
            max_x: 50,
            max_y: 50,
            x_lines: vec![Segment {
                at: 5,
                from: 10,
                to: 20,
            }],
            y_lines: vec![],
        };
        Grid::build(
            &geometry,
            &[SpawnPoint {
                x: 0.0,
                y: 0.0,
                facing: None,
            }],
        )
    }

    #[test]
    fn test_straight_walk_on_open_ground() {
        let grid = walled_grid();
        assert!(can_walk(&grid, (0.0, 0.0), (0.0, 5.0)));
        assert!(can_walk(&grid, (0.0, 0.0), (40.0, -40.0)));
        assert!(can_walk(&grid, (0.0, 0.0), (0.0, 0.0)));
    }

    #[test]
    fn test_wall_blocks_crossing() {
        let grid = walled_grid();
        // Crossing the padded band around the wall at x=5, y in [10, 20].
        assert!(!can_walk(&grid, (-10.0, 15.0), (20.0, 15.0)));
        // Going around it above is fine.
        assert!(can_walk(&grid, (-10.0, 0.0), (20.0, 0.0)));
    }

    #[test]
    fn test_symmetry_for_walkable_endpoints() {
        let grid = walled_grid();
        let pairs = [
            ((0.0, 0.0), (30.0, 30.0)),
            ((-20.0, 15.0), (30.0, 15.0)),
            ((-40.0, -40.0), (40.0, 40.0)),
            ((0.0, 30.0), (20.0, 15.0)),
        ];
        for (a, b) in pairs {
            if grid.is_walkable(a.0, a.1) && grid.is_walkable(b.0, b.1) {
                assert_eq!(
                    can_walk(&grid, a, b),
                    can_walk(&grid, b, a),
                    "asymmetric result for {:?} <-> {:?}",
                    a,
                    b
                );
            }
        }
    }

    #[test]
    fn test_safe_walk_stops_before_wall() {
        let grid = walled_grid();
        let from = (-10.0, 15.0);
        let to = (20.0, 15.0);
        let safe = safe_walk_to(&grid, from, to).unwrap();

        assert!(grid.is_walkable(safe.0, safe.1));
        // The clamp lies between the start and the wall band.
        assert!(safe.0 >= from.0 && safe.0 < 5.0);
        assert!(distance(from.0, from.1, safe.0, safe.1) <= distance(from.0, from.1, to.0, to.1));
    }

    #[test]
    fn test_safe_walk_reaches_open_goal() {
        let grid = walled_grid();
        let safe = safe_walk_to(&grid, (0.0, 0.0), (25.0, -25.0)).unwrap();
        assert_eq!(safe, (25.0, -25.0));
    }

    #[test]
    fn test_safe_walk_from_blocked_start() {
        let grid = walled_grid();
        // (0, 15) is inside the padded band.
        assert!(safe_walk_to(&grid, (0.0, 15.0), (30.0, 15.0)).is_none());
    }
}
