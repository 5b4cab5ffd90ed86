//! Geometric utilities for vertex fitting.
//!
//! Point/line/segment helpers in 3D and 2D, and the weighted multi-line
//! least-squares intersection solver used by the vertex fit.

use nalgebra::{Matrix3, Vector2, Vector3};

/// Relative eigenvalue threshold below which the normal matrix of the
/// line-intersection problem is treated as singular.
const SINGULAR_TOLERANCE: f64 = 1.0e-10;

/// Squared distance between two 3D points.
#[inline]
pub fn dist2(a: &Vector3<f64>, b: &Vector3<f64>) -> f64 {
    (a - b).norm_squared()
}

/// Position of the orthogonal projection of `p` along `p0 → p1`, as a
/// fraction of the segment length.
///
/// The value is not clamped: negative values lie before `p0`, values above
/// one lie beyond `p1`. A zero-length segment yields `0.0`.
pub fn segment_projection_fraction(p: &Vector3<f64>, p0: &Vector3<f64>, p1: &Vector3<f64>) -> f64 {
    let v1 = p1 - p0;
    let len2 = v1.norm_squared();
    if len2 <= 0.0 {
        return 0.0;
    }
    (p - p0).dot(&v1) / len2
}

/// Orthogonal projection of `p` onto the infinite line through `p0` and `p1`.
pub fn project_onto_line(p: &Vector3<f64>, p0: &Vector3<f64>, p1: &Vector3<f64>) -> Vector3<f64> {
    p0 + (p1 - p0) * segment_projection_fraction(p, p0, p1)
}

/// Squared distance from `p` to the closed segment `p0 – p1`.
pub fn distance2_to_segment(p: &Vector3<f64>, p0: &Vector3<f64>, p1: &Vector3<f64>) -> f64 {
    let f = segment_projection_fraction(p, p0, p1).clamp(0.0, 1.0);
    (p0 + (p1 - p0) * f - p).norm_squared()
}

/// Squared distance from a 2D point to the closed 2D segment `p0 – p1`.
pub fn distance2_to_segment_2d(p: &Vector2<f64>, p0: &Vector2<f64>, p1: &Vector2<f64>) -> f64 {
    let v1 = p1 - p0;
    let len2 = v1.norm_squared();
    let f = if len2 > 0.0 {
        ((p - p0).dot(&v1) / len2).clamp(0.0, 1.0)
    } else {
        0.0
    };
    (p0 + v1 * f - p).norm_squared()
}

// ============================================================================
// MULTI-LINE INTERSECTION
// ============================================================================

/// Result of the least-squares intersection of several 3D lines.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineIntersection {
    /// Point minimizing the weighted sum of squared distances to all lines.
    pub point: Vector3<f64>,

    /// Mean squared (unweighted) distance from `point` to the lines.
    pub mse: f64,
}

/// Weighted least-squares intersection of 3D lines.
///
/// Each line is given by two distinct points. The solution minimizes
///
/// ```text
/// Σ wᵢ · |(I − dᵢdᵢᵀ)(p − aᵢ)|²
/// ```
///
/// where `aᵢ` is a point on line `i` and `dᵢ` its unit direction, which
/// reduces to the 3×3 system `(Σ wᵢ Pᵢ) p = Σ wᵢ Pᵢ aᵢ` with `Pᵢ = I − dᵢdᵢᵀ`.
///
/// Returns `None` when the system is degenerate: fewer than two usable lines,
/// all lines parallel, non-positive total weight, or a length mismatch
/// between `lines` and `weights`.
pub fn solve_least_squares_3d(
    lines: &[(Vector3<f64>, Vector3<f64>)],
    weights: &[f64],
) -> Option<LineIntersection> {
    if lines.len() != weights.len() || lines.len() < 2 {
        return None;
    }

    let mut a = Matrix3::zeros();
    let mut b = Vector3::zeros();
    let mut used = 0usize;

    for ((p0, p1), &w) in lines.iter().zip(weights) {
        let dir = p1 - p0;
        let len = dir.norm();
        if len <= f64::EPSILON || !(w > 0.0) {
            continue;
        }
        let d = dir / len;
        let proj = Matrix3::identity() - d * d.transpose();
        a += proj * w;
        b += proj * p0 * w;
        used += 1;
    }

    if used < 2 {
        return None;
    }

    // Parallel lines leave the normal matrix rank-deficient along their
    // common direction.
    let eigen = a.symmetric_eigenvalues();
    let max_ev = eigen.max();
    let min_ev = eigen.min();
    if !(max_ev > 0.0) || min_ev <= SINGULAR_TOLERANCE * max_ev {
        return None;
    }

    let point = a.lu().solve(&b)?;
    if !point.iter().all(|c| c.is_finite()) {
        return None;
    }

    let mse = lines
        .iter()
        .map(|(p0, p1)| dist2(&point, &project_onto_line(&point, p0, p1)))
        .sum::<f64>()
        / lines.len() as f64;

    Some(LineIntersection { point, mse })
}

// ============================================================================
// TESTS
// ============================================================================
