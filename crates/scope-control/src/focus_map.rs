//! Planar focus map from three focused positions.

use scope_core::error::{ScopeError, ScopeResult};
use serde::{Deserialize, Serialize};

/// Focus plane `z = a·x + b·y + c` (all in mm).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FocusMap {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    /// The (x, y, z) points the plane was fitted through.
    pub points: [(f64, f64, f64); 3],
}

fn det3(m: [[f64; 3]; 3]) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

impl FocusMap {
    /// Fit the plane through three points. Colinear points are rejected.
    pub fn from_points(points: [(f64, f64, f64); 3]) -> ScopeResult<Self> {
        let [(x1, y1, z1), (x2, y2, z2), (x3, y3, z3)] = points;
        let det = det3([[x1, y1, 1.0], [x2, y2, 1.0], [x3, y3, 1.0]]);
        // twice the triangle area; tiny means the points are (nearly) colinear
        if det.abs() < 1e-9 {
            return Err(ScopeError::Calibration(
                "focus map points are colinear".into(),
            ));
        }
        let a = det3([[z1, y1, 1.0], [z2, y2, 1.0], [z3, y3, 1.0]]) / det;
        let b = det3([[x1, z1, 1.0], [x2, z2, 1.0], [x3, z3, 1.0]]) / det;
        let c = det3([[x1, y1, z1], [x2, y2, z2], [x3, y3, z3]]) / det;
        Ok(Self { a, b, c, points })
    }

    pub fn z_at(&self, x_mm: f64, y_mm: f64) -> f64 {
        self.a * x_mm + self.b * y_mm + self.c
    }
}
