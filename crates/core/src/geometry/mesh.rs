use crate::mapping::{MeshGridConfig, Point2};
use crate::Result;

const INSIDE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq)]
struct Triangle {
    dst: [Point2; 3],
    uv: [Point2; 3],
    min: Point2,
    max: Point2,
}

impl Triangle {
    fn new(dst: [Point2; 3], uv: [Point2; 3]) -> Self {
        let min = Point2::new(
            dst.iter().map(|p| p.x).fold(f64::INFINITY, f64::min),
            dst.iter().map(|p| p.y).fold(f64::INFINITY, f64::min),
        );
        let max = Point2::new(
            dst.iter().map(|p| p.x).fold(f64::NEG_INFINITY, f64::max),
            dst.iter().map(|p| p.y).fold(f64::NEG_INFINITY, f64::max),
        );
        Self { dst, uv, min, max }
    }

    fn bounds_contain(&self, p: Point2) -> bool {
        p.x >= self.min.x - INSIDE_EPSILON
            && p.x <= self.max.x + INSIDE_EPSILON
            && p.y >= self.min.y - INSIDE_EPSILON
            && p.y <= self.max.y + INSIDE_EPSILON
    }

    /// Barycentric weights of `p` in destination space, `None` for a
    /// zero-area triangle.
    fn weights(&self, p: Point2) -> Option<[f64; 3]> {
        let [a, b, c] = self.dst;
        let den = (b.y - c.y) * (a.x - c.x) + (c.x - b.x) * (a.y - c.y);
        if den.abs() < 1e-15 {
            return None;
        }
        let wa = ((b.y - c.y) * (p.x - c.x) + (c.x - b.x) * (p.y - c.y)) / den;
        let wb = ((c.y - a.y) * (p.x - c.x) + (a.x - c.x) * (p.y - c.y)) / den;
        Some([wa, wb, 1.0 - wa - wb])
    }
}

fn blend(points: &[Point2; 3], w: [f64; 3]) -> Point2 {
    Point2::new(
        points[0].x * w[0] + points[1].x * w[1] + points[2].x * w[2],
        points[0].y * w[0] + points[1].y * w[1] + points[2].y * w[2],
    )
}

/// Triangulated mesh warp. Each cell is split into the triangles
/// `(p00, p01, p10)` and `(p10, p01, p11)`.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshWarp {
    rows: usize,
    cols: usize,
    points: Vec<Point2>,
    triangles: Vec<Triangle>,
}

impl MeshWarp {
    pub fn build(grid: &MeshGridConfig) -> Result<Self> {
        grid.validate()?;
        let (rows, cols) = (grid.rows, grid.cols);
        let points: Vec<Point2> = grid.points.iter().flatten().copied().collect();

        let mut triangles = Vec::with_capacity(rows * cols * 2);
        for r in 0..rows {
            for c in 0..cols {
                let at = |row: usize, col: usize| points[row * (cols + 1) + col];
                let uv = |row: usize, col: usize| MeshGridConfig::rest_position(rows, cols, row, col);
                let (p00, p10, p01, p11) = (at(r, c), at(r, c + 1), at(r + 1, c), at(r + 1, c + 1));
                let (u00, u10, u01, u11) = (uv(r, c), uv(r, c + 1), uv(r + 1, c), uv(r + 1, c + 1));
                triangles.push(Triangle::new([p00, p01, p10], [u00, u01, u10]));
                triangles.push(Triangle::new([p10, p01, p11], [u10, u01, u11]));
            }
        }

        Ok(Self {
            rows,
            cols,
            points,
            triangles,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    fn point(&self, row: usize, col: usize) -> Point2 {
        self.points[row * (self.cols + 1) + col]
    }

    /// Source UV to output position.
    pub fn forward(&self, uv: Point2) -> Option<Point2> {
        if !uv.in_unit_square(0.0) {
            return None;
        }
        let cx = uv.x * self.cols as f64;
        let cy = uv.y * self.rows as f64;
        let c = (cx.floor() as usize).min(self.cols - 1);
        let r = (cy.floor() as usize).min(self.rows - 1);
        let (fu, fv) = (cx - c as f64, cy - r as f64);

        let p00 = self.point(r, c);
        let p10 = self.point(r, c + 1);
        let p01 = self.point(r + 1, c);
        let p11 = self.point(r + 1, c + 1);

        Some(if fu + fv <= 1.0 {
            blend(&[p00, p01, p10], [1.0 - fu - fv, fv, fu])
        } else {
            blend(&[p10, p01, p11], [1.0 - fv, 1.0 - fu, fu + fv - 1.0])
        })
    }

    /// Output position to source UV; `None` outside the warped mesh.
    pub fn inverse(&self, p: Point2) -> Option<Point2> {
        self.triangles
            .iter()
            .filter(|triangle| triangle.bounds_contain(p))
            .find_map(|triangle| {
                let w = triangle.weights(p)?;
                w.iter()
                    .all(|weight| *weight >= -INSIDE_EPSILON)
                    .then(|| blend(&triangle.uv, w))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Point2, b: Point2) -> bool {
        a.distance(b) < 1e-9
    }

    #[test]
    fn regular_grid_samples_as_identity() {
        let warp = MeshWarp::build(&MeshGridConfig::regular(3, 4)).unwrap();
        assert_eq!(warp.triangle_count(), 24);

        for i in 0..=20 {
            for j in 0..=20 {
                let uv = Point2::new(i as f64 / 20.0, j as f64 / 20.0);
                assert!(close(warp.forward(uv).unwrap(), uv), "forward {uv:?}");
                assert!(close(warp.inverse(uv).unwrap(), uv), "inverse {uv:?}");
            }
        }
    }

    #[test]
    fn control_points_map_exactly() {
        let mut grid = MeshGridConfig::regular(2, 2);
        grid.points[1][1] = Point2::new(0.6, 0.4);
        let warp = MeshWarp::build(&grid).unwrap();

        assert!(close(
            warp.forward(Point2::new(0.5, 0.5)).unwrap(),
            Point2::new(0.6, 0.4)
        ));
        assert!(close(
            warp.inverse(Point2::new(0.6, 0.4)).unwrap(),
            Point2::new(0.5, 0.5)
        ));
        let corner = warp.forward(Point2::new(1.0, 1.0)).unwrap();
        assert!(close(corner, Point2::new(1.0, 1.0)));
    }

    #[test]
    fn forward_then_inverse_is_stable_inside_warped_cells() {
        let mut grid = MeshGridConfig::regular(2, 2);
        grid.points[0][0] = Point2::new(0.1, 0.05);
        grid.points[2][2] = Point2::new(0.9, 0.95);
        grid.points[1][1] = Point2::new(0.55, 0.5);
        let warp = MeshWarp::build(&grid).unwrap();

        for uv in [
            Point2::new(0.2, 0.3),
            Point2::new(0.75, 0.6),
            Point2::new(0.4, 0.9),
        ] {
            let out = warp.forward(uv).unwrap();
            assert!(close(warp.inverse(out).unwrap(), uv), "uv {uv:?}");
        }
    }

    #[test]
    fn points_outside_the_mesh_have_no_source() {
        let mut grid = MeshGridConfig::regular(1, 1);
        grid.points[0][0] = Point2::new(0.2, 0.2);
        grid.points[0][1] = Point2::new(0.8, 0.2);
        grid.points[1][0] = Point2::new(0.2, 0.8);
        grid.points[1][1] = Point2::new(0.8, 0.8);
        let warp = MeshWarp::build(&grid).unwrap();

        assert!(warp.inverse(Point2::new(0.05, 0.5)).is_none());
        assert!(warp.forward(Point2::new(1.5, 0.5)).is_none());
    }

    #[test]
    fn invalid_grid_is_rejected() {
        let mut grid = MeshGridConfig::regular(2, 2);
        grid.points.pop();
        assert!(MeshWarp::build(&grid).is_err());
    }
}
