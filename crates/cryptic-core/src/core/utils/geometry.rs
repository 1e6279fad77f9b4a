use nalgebra::{Point3, Vector3};
use std::f64::consts::PI;

/// Torsion angle in radians, in `(-pi, pi]`, defined by four points.
///
/// Returns `None` when any three consecutive points are collinear.
pub fn dihedral_angle(
    p0: &Point3<f64>,
    p1: &Point3<f64>,
    p2: &Point3<f64>,
    p3: &Point3<f64>,
) -> Option<f64> {
    let b0 = p0 - p1;
    let b1 = p2 - p1;
    let b2 = p3 - p2;

    let b1_norm = b1.norm();
    if b1_norm < 1e-9 {
        return None;
    }
    let b1_unit = b1 / b1_norm;

    let v = b0 - b1_unit * b0.dot(&b1_unit);
    let w = b2 - b1_unit * b2.dot(&b1_unit);
    if v.norm_squared() < 1e-18 || w.norm_squared() < 1e-18 {
        return None;
    }

    let x = v.dot(&w);
    let y = b1_unit.cross(&v).dot(&w);
    Some(y.atan2(x))
}

/// Angle at `b` formed by `a-b-c`, in radians.
pub fn bond_angle(a: &Point3<f64>, b: &Point3<f64>, c: &Point3<f64>) -> Option<f64> {
    let u = a - b;
    let v = c - b;
    let denom = u.norm() * v.norm();
    if denom < 1e-12 {
        return None;
    }
    Some((u.dot(&v) / denom).clamp(-1.0, 1.0).acos())
}

pub fn centroid<I>(points: I) -> Option<Point3<f64>>
where
    I: IntoIterator<Item = Point3<f64>>,
{
    let mut sum = Vector3::zeros();
    let mut count = 0usize;
    for p in points {
        sum += p.coords;
        count += 1;
    }
    (count > 0).then(|| Point3::from(sum / count as f64))
}

pub fn radius_of_gyration(points: &[Point3<f64>], center: &Point3<f64>) -> f64 {
    if points.is_empty() {
        return 0.0;
    }
    let sum: f64 = points.iter().map(|p| (p - center).norm_squared()).sum();
    (sum / points.len() as f64).sqrt()
}

/// Radius of the circle through three points; `None` when they are collinear.
pub fn circumradius(a: &Point3<f64>, b: &Point3<f64>, c: &Point3<f64>) -> Option<f64> {
    let ab = (b - a).norm();
    let bc = (c - b).norm();
    let ca = (a - c).norm();
    let twice_area = (b - a).cross(&(c - a)).norm();
    if twice_area < 1e-9 {
        return None;
    }
    Some(ab * bc * ca / (2.0 * twice_area))
}

/// Quasi-uniform unit vectors on the sphere (golden-spiral lattice).
pub fn fibonacci_sphere(n: usize) -> Vec<Vector3<f64>> {
    let golden_angle = PI * (3.0 - 5.0_f64.sqrt());
    (0..n)
        .map(|i| {
            let y = 1.0 - 2.0 * (i as f64 + 0.5) / n as f64;
            let r = (1.0 - y * y).max(0.0).sqrt();
            let theta = golden_angle * i as f64;
            Vector3::new(r * theta.cos(), y, r * theta.sin())
        })
        .collect()
}

/// Root-mean-square deviation of a set of positions from their mean.
pub fn root_mean_square_fluctuation(positions: &[Point3<f64>]) -> Option<f64> {
    let mean = centroid(positions.iter().copied())?;
    Some(radius_of_gyration(positions, &mean))
}
