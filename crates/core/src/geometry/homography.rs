use glam::{DMat3, DVec3};

use crate::mapping::Point2;
use crate::{Result, ShowSyncError};

/// Unit-square corners in `[TL, TR, BL, BR]` order.
pub const UNIT_SQUARE: [Point2; 4] = [
    Point2::new(0.0, 0.0),
    Point2::new(1.0, 0.0),
    Point2::new(0.0, 1.0),
    Point2::new(1.0, 1.0),
];

const JACOBI_MAX_SWEEPS: usize = 64;
const DEGENERATE_EPSILON: f64 = 1e-12;

/// 3x3 projective transform, normalised so that the bottom-right entry is 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography {
    m: DMat3,
}

impl Homography {
    pub const IDENTITY: Homography = Homography { m: DMat3::IDENTITY };

    /// Maps the unit square onto `corners` (`[TL, TR, BL, BR]`).
    pub fn from_unit_square(corners: &[Point2; 4]) -> Result<Self> {
        Self::solve(&UNIT_SQUARE, corners)
    }

    /// Direct Linear Transform over four correspondences.
    ///
    /// The 8x9 system `A h = 0` is solved for its null-space vector: the right
    /// singular vector of `A` with the smallest singular value, obtained as
    /// the eigenvector of `AᵀA` with the smallest eigenvalue.
    pub fn solve(src: &[Point2; 4], dst: &[Point2; 4]) -> Result<Self> {
        let mut a = [[0.0_f64; 9]; 8];
        for (i, (s, d)) in src.iter().zip(dst.iter()).enumerate() {
            a[2 * i] = [-s.x, -s.y, -1.0, 0.0, 0.0, 0.0, s.x * d.x, s.y * d.x, d.x];
            a[2 * i + 1] = [0.0, 0.0, 0.0, -s.x, -s.y, -1.0, s.x * d.y, s.y * d.y, d.y];
        }

        let mut ata = [[0.0_f64; 9]; 9];
        for (r, row) in ata.iter_mut().enumerate() {
            for (c, cell) in row.iter_mut().enumerate() {
                *cell = a.iter().map(|eq| eq[r] * eq[c]).sum();
            }
        }

        let (values, vectors) = symmetric_eigen(ata);
        let mut order: Vec<usize> = (0..9).collect();
        order.sort_by(|&i, &j| values[i].total_cmp(&values[j]));
        let largest = values[order[8]].abs().max(f64::MIN_POSITIVE);
        if values[order[1]].abs() <= DEGENERATE_EPSILON * largest {
            return Err(ShowSyncError::config(
                "perspective corners are degenerate (null space is not unique)",
            ));
        }

        let h: Vec<f64> = (0..9).map(|r| vectors[r][order[0]]).collect();
        if h[8].abs() < DEGENERATE_EPSILON {
            return Err(ShowSyncError::config(
                "perspective corners are degenerate (H[2][2] is zero)",
            ));
        }

        // `h` is row-major; glam stores columns.
        let rows = [
            [h[0] / h[8], h[1] / h[8], h[2] / h[8]],
            [h[3] / h[8], h[4] / h[8], h[5] / h[8]],
            [h[6] / h[8], h[7] / h[8], 1.0],
        ];
        let homography = Self {
            m: DMat3::from_cols_array_2d(&rows).transpose(),
        };
        if homography.determinant().abs() < DEGENERATE_EPSILON {
            return Err(ShowSyncError::config("perspective transform is singular"));
        }
        Ok(homography)
    }

    /// Row-major copy of the matrix.
    pub fn matrix(&self) -> [[f64; 3]; 3] {
        self.m.transpose().to_cols_array_2d()
    }

    pub fn as_dmat3(&self) -> DMat3 {
        self.m
    }

    pub fn determinant(&self) -> f64 {
        self.m.determinant()
    }

    /// Projects `p` with the perspective divide; `None` when the point maps
    /// to infinity.
    pub fn apply(&self, p: Point2) -> Option<Point2> {
        let v = self.m * DVec3::new(p.x, p.y, 1.0);
        if v.z.abs() < DEGENERATE_EPSILON {
            return None;
        }
        Some(Point2::new(v.x / v.z, v.y / v.z))
    }

    pub fn inverse(&self) -> Result<Self> {
        if self.determinant().abs() < DEGENERATE_EPSILON {
            return Err(ShowSyncError::config("perspective transform is singular"));
        }
        let inv = self.m.inverse();
        let scale = inv.z_axis.z;
        if scale.abs() < DEGENERATE_EPSILON {
            // Projective matrices are defined up to scale; keep the raw inverse.
            return Ok(Self { m: inv });
        }
        Ok(Self { m: inv * (1.0 / scale) })
    }
}

/// Cyclic Jacobi eigen decomposition of a symmetric 9x9 matrix. Returns the
/// eigenvalues and the eigenvectors as columns.
fn symmetric_eigen(mut a: [[f64; 9]; 9]) -> ([f64; 9], [[f64; 9]; 9]) {
    let mut v = [[0.0_f64; 9]; 9];
    for (i, row) in v.iter_mut().enumerate() {
        row[i] = 1.0;
    }

    let total: f64 = a.iter().flatten().map(|x| x * x).sum();
    for _ in 0..JACOBI_MAX_SWEEPS {
        let off: f64 = (0..9)
            .flat_map(|p| (p + 1..9).map(move |q| (p, q)))
            .map(|(p, q)| a[p][q] * a[p][q])
            .sum();
        if off <= 1e-30 * total.max(f64::MIN_POSITIVE) {
            break;
        }

        for p in 0..9 {
            for q in p + 1..9 {
                if a[p][q] == 0.0 {
                    continue;
                }
                let theta = (a[q][q] - a[p][p]) / (2.0 * a[p][q]);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for k in 0..9 {
                    let (akp, akq) = (a[k][p], a[k][q]);
                    a[k][p] = c * akp - s * akq;
                    a[k][q] = s * akp + c * akq;
                }
                for k in 0..9 {
                    let (apk, aqk) = (a[p][k], a[q][k]);
                    a[p][k] = c * apk - s * aqk;
                    a[q][k] = s * apk + c * aqk;
                }
                for row in v.iter_mut() {
                    let (vkp, vkq) = (row[p], row[q]);
                    row[p] = c * vkp - s * vkq;
                    row[q] = s * vkp + c * vkq;
                }
            }
        }
    }

    let mut values = [0.0; 9];
    for (i, value) in values.iter_mut().enumerate() {
        *value = a[i][i];
    }
    (values, v)
}
