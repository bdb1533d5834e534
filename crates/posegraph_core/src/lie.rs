//! Exp/log maps and adjoints on SO(3), SE(3) and SE(2).
//!
//! Tangent vectors are ordered `[rho; phi]` (translation first, rotation
//! last); SE(3) transforms are homogeneous 4x4 matrices, SE(2) transforms
//! homogeneous 3x3 matrices.

use nalgebra::{Matrix2, Matrix3, Matrix4, Matrix6, Vector2, Vector3, Vector6};

const SMALL_ANGLE: f64 = 1e-10;

/// Skew-symmetric matrix of a 3-vector, `skew(w) * v == w.cross(&v)`.
pub fn skew(w: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -w.z, w.y, w.z, 0.0, -w.x, -w.y, w.x, 0.0)
}

fn vee(m: &Matrix3<f64>) -> Vector3<f64> {
    Vector3::new(m[(2, 1)], m[(0, 2)], m[(1, 0)])
}

/// Rodrigues formula.
pub fn exp_so3(phi: &Vector3<f64>) -> Matrix3<f64> {
    let theta = phi.norm();
    let w = skew(phi);
    if theta < SMALL_ANGLE {
        return Matrix3::identity() + w + w * w * 0.5;
    }
    let a = theta.sin() / theta;
    let b = (1.0 - theta.cos()) / (theta * theta);
    Matrix3::identity() + w * a + w * w * b
}

/// Inverse of the Rodrigues formula.
pub fn log_so3(r: &Matrix3<f64>) -> Vector3<f64> {
    let cos_theta = ((r.trace() - 1.0) * 0.5).clamp(-1.0, 1.0);
    let theta = cos_theta.acos();
    let anti = vee(&((r - r.transpose()) * 0.5));

    if theta < SMALL_ANGLE {
        return anti;
    }
    if std::f64::consts::PI - theta < 1e-6 {
        // sin(theta) vanishes; recover the axis from R = 2*a*a^T - I + O(pi - theta).
        let b = (r + Matrix3::identity()) * 0.5;
        let k = (0..3)
            .max_by(|&i, &j| b[(i, i)].partial_cmp(&b[(j, j)]).expect("finite rotation"))
            .unwrap();
        let mut axis = Vector3::zeros();
        axis[k] = b[(k, k)].max(0.0).sqrt();
        for i in 0..3 {
            if i != k {
                axis[i] = b[(i, k)] / axis[k];
            }
        }
        axis.normalize_mut();
        if axis.dot(&anti) < 0.0 {
            axis = -axis;
        }
        return axis * theta;
    }
    anti * (theta / theta.sin())
}

/// Left Jacobian of SO(3); maps tangent translations through the rotation
/// when composing `exp_se3`.
fn v_so3(phi: &Vector3<f64>) -> Matrix3<f64> {
    let theta = phi.norm();
    let w = skew(phi);
    if theta < SMALL_ANGLE {
        return Matrix3::identity() + w * 0.5 + w * w * (1.0 / 6.0);
    }
    let theta2 = theta * theta;
    let a = (1.0 - theta.cos()) / theta2;
    let b = (theta - theta.sin()) / (theta2 * theta);
    Matrix3::identity() + w * a + w * w * b
}

fn v_so3_inv(phi: &Vector3<f64>) -> Matrix3<f64> {
    let theta = phi.norm();
    let w = skew(phi);
    if theta < SMALL_ANGLE {
        return Matrix3::identity() - w * 0.5 + w * w * (1.0 / 12.0);
    }
    let theta2 = theta * theta;
    let coeff = 1.0 / theta2 - (1.0 + theta.cos()) / (2.0 * theta * theta.sin());
    Matrix3::identity() - w * 0.5 + w * w * coeff
}

/// Builds a homogeneous SE(3) matrix from rotation and translation.
pub fn make_se3(r: &Matrix3<f64>, t: &Vector3<f64>) -> Matrix4<f64> {
    let mut out = Matrix4::identity();
    out.fixed_view_mut::<3, 3>(0, 0).copy_from(r);
    out.fixed_view_mut::<3, 1>(0, 3).copy_from(t);
    out
}

/// Splits a homogeneous SE(3) matrix into rotation and translation.
pub fn make_rt(t: &Matrix4<f64>) -> (Matrix3<f64>, Vector3<f64>) {
    (
        t.fixed_view::<3, 3>(0, 0).into_owned(),
        t.fixed_view::<3, 1>(0, 3).into_owned(),
    )
}

pub fn exp_se3(xi: &Vector6<f64>) -> Matrix4<f64> {
    let rho = xi.fixed_rows::<3>(0).into_owned();
    let phi = xi.fixed_rows::<3>(3).into_owned();
    let r = exp_so3(&phi);
    let t = v_so3(&phi) * rho;
    make_se3(&r, &t)
}

pub fn log_se3(t: &Matrix4<f64>) -> Vector6<f64> {
    let (r, p) = make_rt(t);
    let phi = log_so3(&r);
    let rho = v_so3_inv(&phi) * p;
    let mut xi = Vector6::zeros();
    xi.fixed_rows_mut::<3>(0).copy_from(&rho);
    xi.fixed_rows_mut::<3>(3).copy_from(&phi);
    xi
}

/// Closed-form inverse `(R, t) -> (R^T, -R^T t)`.
pub fn inv_se3(t: &Matrix4<f64>) -> Matrix4<f64> {
    let (r, p) = make_rt(t);
    let rt = r.transpose();
    make_se3(&rt, &(-(&rt * p)))
}

/// Adjoint of SE(3) for the `[rho; phi]` ordering:
/// `T * exp_se3(xi) * T^-1 == exp_se3(adjoint_se3(T) * xi)`.
pub fn adjoint_se3(t: &Matrix4<f64>) -> Matrix6<f64> {
    let (r, p) = make_rt(t);
    let mut adj = Matrix6::zeros();
    adj.fixed_view_mut::<3, 3>(0, 0).copy_from(&r);
    adj.fixed_view_mut::<3, 3>(0, 3).copy_from(&(skew(&p) * r));
    adj.fixed_view_mut::<3, 3>(3, 3).copy_from(&r);
    adj
}

/// Planar rotation matrix.
pub fn rot2(theta: f64) -> Matrix2<f64> {
    let (s, c) = theta.sin_cos();
    Matrix2::new(c, -s, s, c)
}

fn v_se2(theta: f64) -> Matrix2<f64> {
    if theta.abs() < SMALL_ANGLE {
        return Matrix2::new(1.0, -theta * 0.5, theta * 0.5, 1.0);
    }
    let a = theta.sin() / theta;
    let b = (1.0 - theta.cos()) / theta;
    Matrix2::new(a, -b, b, a)
}

/// Builds a homogeneous SE(2) matrix from rotation and translation.
pub fn make_se2(r: &Matrix2<f64>, t: &Vector2<f64>) -> Matrix3<f64> {
    let mut out = Matrix3::identity();
    out.fixed_view_mut::<2, 2>(0, 0).copy_from(r);
    out.fixed_view_mut::<2, 1>(0, 2).copy_from(t);
    out
}

/// Splits a homogeneous SE(2) matrix into rotation and translation.
pub fn make_rt2(t: &Matrix3<f64>) -> (Matrix2<f64>, Vector2<f64>) {
    (
        t.fixed_view::<2, 2>(0, 0).into_owned(),
        t.fixed_view::<2, 1>(0, 2).into_owned(),
    )
}

pub fn exp_se2(xi: &Vector3<f64>) -> Matrix3<f64> {
    let rho = Vector2::new(xi.x, xi.y);
    let theta = xi.z;
    make_se2(&rot2(theta), &(v_se2(theta) * rho))
}

pub fn log_se2(t: &Matrix3<f64>) -> Vector3<f64> {
    let theta = t[(1, 0)].atan2(t[(0, 0)]);
    let v = v_se2(theta);
    let det = v[(0, 0)] * v[(1, 1)] - v[(0, 1)] * v[(1, 0)];
    let v_inv = Matrix2::new(v[(1, 1)], -v[(0, 1)], -v[(1, 0)], v[(0, 0)]) / det;
    let rho = v_inv * Vector2::new(t[(0, 2)], t[(1, 2)]);
    Vector3::new(rho.x, rho.y, theta)
}

pub fn inv_se2(t: &Matrix3<f64>) -> Matrix3<f64> {
    let (r, p) = make_rt2(t);
    let rt = r.transpose();
    make_se2(&rt, &(-(&rt * p)))
}

/// Adjoint of SE(2) for the `[rho; theta]` ordering.
pub fn adjoint_se2(t: &Matrix3<f64>) -> Matrix3<f64> {
    let (r, p) = make_rt2(t);
    let mut adj = Matrix3::identity();
    adj.fixed_view_mut::<2, 2>(0, 0).copy_from(&r);
    adj[(0, 2)] = p.y;
    adj[(1, 2)] = -p.x;
    adj
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mat_close<const R: usize, const C: usize>(
        a: &nalgebra::SMatrix<f64, R, C>,
        b: &nalgebra::SMatrix<f64, R, C>,
        tol: f64,
    ) -> bool {
        (a - b).amax() < tol
    }

    #[test]
    fn skew_matches_cross_product() {
        let w = Vector3::new(0.3, -1.2, 2.5);
        let v = Vector3::new(-0.7, 0.1, 0.4);
        assert!((skew(&w) * v - w.cross(&v)).norm() < 1e-15);
    }

    #[test]
    fn exp_so3_of_zero_is_identity() {
        assert!(mat_close(
            &exp_so3(&Vector3::zeros()),
            &Matrix3::identity(),
            1e-15
        ));
    }

    #[test]
    fn so3_exp_log_roundtrip() {
        for phi in [
            Vector3::new(0.1, 0.2, -0.3),
            Vector3::new(1e-12, 0.0, 0.0),
            Vector3::new(2.0, -1.0, 0.5),
            Vector3::new(3.1, 0.2, 0.1), // close to pi in magnitude
        ] {
            let back = log_so3(&exp_so3(&phi));
            assert!(
                (back - phi).norm() < 1e-8,
                "roundtrip failed for {phi:?}: {back:?}"
            );
        }
    }

    #[test]
    fn se3_exp_log_roundtrip() {
        let xi = Vector6::from_column_slice(&[0.2, -0.1, 0.4, 0.05, 0.0, 0.5]);
        let back = log_se3(&exp_se3(&xi));
        assert!((back - xi).norm() < 1e-10);
    }

    #[test]
    fn se3_inverse_is_exact() {
        let t = exp_se3(&Vector6::from_column_slice(&[1.0, 2.0, 3.0, 0.1, 0.2, 0.3]));
        assert!(mat_close(&(t * inv_se3(&t)), &Matrix4::identity(), 1e-12));
    }

    #[test]
    fn se3_adjoint_matches_conjugation() {
        let t = exp_se3(&Vector6::from_column_slice(&[0.5, -0.2, 0.8, 0.3, -0.1, 0.4]));
        let xi = Vector6::from_column_slice(&[0.01, 0.02, -0.03, 0.02, -0.01, 0.015]);
        let lhs = t * exp_se3(&xi) * inv_se3(&t);
        let rhs = exp_se3(&(adjoint_se3(&t) * xi));
        assert!(mat_close(&lhs, &rhs, 1e-8));
    }

    #[test]
    fn se2_exp_log_roundtrip() {
        for xi in [
            Vector3::new(0.5, -0.2, 0.8),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.1, 0.1, -2.5),
        ] {
            let back = log_se2(&exp_se2(&xi));
            assert!((back - xi).norm() < 1e-10, "roundtrip failed for {xi:?}");
        }
    }

    #[test]
    fn se2_adjoint_matches_conjugation() {
        let t = exp_se2(&Vector3::new(1.0, -0.5, 0.7));
        let xi = Vector3::new(0.02, -0.01, 0.03);
        let lhs = t * exp_se2(&xi) * inv_se2(&t);
        let rhs = exp_se2(&(adjoint_se2(&t) * xi));
        assert!(mat_close(&lhs, &rhs, 1e-8));
    }
}
