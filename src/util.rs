use faer::prelude::*;

/// Cartesian 3-vector used by the induction kernels.
pub type Vec3 = [f64; 3];

/// Unit quaternion `[w, i, j, k]`.
pub type Quat = [f64; 4];

pub const QUAT_IDENTITY: Quat = [1., 0., 0., 0.];

#[inline]
pub fn add(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

#[inline]
pub fn sub(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
pub fn scale(s: f64, a: Vec3) -> Vec3 {
    [s * a[0], s * a[1], s * a[2]]
}

#[inline]
pub fn dot(a: Vec3, b: Vec3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

// Returns the cross product of two vectors
#[inline]
pub fn cross(a: Vec3, b: Vec3) -> Vec3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

#[inline]
pub fn norm(a: Vec3) -> f64 {
    dot(a, a).sqrt()
}

/// Returns the unit vector of `a`, or zero if `a` is shorter than machine epsilon.
#[inline]
pub fn normalize(a: Vec3) -> Vec3 {
    let m = norm(a);
    if m < f64::EPSILON {
        [0., 0., 0.]
    } else {
        scale(1. / m, a)
    }
}

/// Reads column `j` of a `[3][n]` matrix.
#[inline]
pub fn col3(m: MatRef<f64>, j: usize) -> Vec3 {
    [m[(0, j)], m[(1, j)], m[(2, j)]]
}

/// Writes `v` into column `j` of a `[3][n]` matrix.
#[inline]
pub fn set_col3(mut m: MatMut<f64>, j: usize, v: Vec3) {
    m[(0, j)] = v[0];
    m[(1, j)] = v[1];
    m[(2, j)] = v[2];
}

/// Multiplies a 3x3 matrix with a vector.
#[inline]
pub fn mat3_vec(m: MatRef<f64>, v: Vec3) -> Vec3 {
    [
        m[(0, 0)] * v[0] + m[(0, 1)] * v[1] + m[(0, 2)] * v[2],
        m[(1, 0)] * v[0] + m[(1, 1)] * v[1] + m[(1, 2)] * v[2],
        m[(2, 0)] * v[0] + m[(2, 1)] * v[1] + m[(2, 2)] * v[2],
    ]
}

/// Multiplies the transpose of a 3x3 matrix with a vector.
#[inline]
pub fn mat3t_vec(m: MatRef<f64>, v: Vec3) -> Vec3 {
    mat3_vec(m.transpose(), v)
}

/// Skew-symmetric cross product matrix, `skew(a) * b == a x b`.
pub fn skew(v: Vec3) -> Mat<f64> {
    mat![
        [0., -v[2], v[1]],
        [v[2], 0., -v[0]],
        [-v[1], v[0], 0.],
    ]
}

/// Rotation matrix equivalent of a quaternion.
pub fn quat_as_matrix(q: Quat) -> Mat<f64> {
    let (w, i, j, k) = (q[0], q[1], q[2], q[3]);
    let ww = w * w;
    let ii = i * i;
    let jj = j * j;
    let kk = k * k;
    let ij = i * j * 2.;
    let wk = w * k * 2.;
    let wj = w * j * 2.;
    let ik = i * k * 2.;
    let jk = j * k * 2.;
    let wi = w * i * 2.;

    mat![
        [ww + ii - jj - kk, ij - wk, ik + wj],
        [ij + wk, ww - ii + jj - kk, jk - wi],
        [ik - wj, jk + wi, ww - ii - jj + kk],
    ]
}

#[inline]
pub fn quat_inverse(q: Quat) -> Quat {
    let m = (q[0] * q[0] + q[1] * q[1] + q[2] * q[2] + q[3] * q[3]).sqrt();
    [q[0] / m, -q[1] / m, -q[2] / m, -q[3] / m]
}

/// Composition `q1 * q2`, normalized.
pub fn quat_compose(q1: Quat, q2: Quat) -> Quat {
    let q = [
        q1[0] * q2[0] - q1[1] * q2[1] - q1[2] * q2[2] - q1[3] * q2[3],
        q1[0] * q2[1] + q1[1] * q2[0] + q1[2] * q2[3] - q1[3] * q2[2],
        q1[0] * q2[2] - q1[1] * q2[3] + q1[2] * q2[0] + q1[3] * q2[1],
        q1[0] * q2[3] + q1[1] * q2[2] - q1[2] * q2[1] + q1[3] * q2[0],
    ];
    let m = (q[0] * q[0] + q[1] * q[1] + q[2] * q[2] + q[3] * q[3]).sqrt();
    [q[0] / m, q[1] / m, q[2] / m, q[3] / m]
}

/// Quaternion from a rotation vector (axis times angle).
pub fn quat_from_rotation_vector(v: Vec3) -> Quat {
    let angle = norm(v);
    if angle < 1e-12 {
        QUAT_IDENTITY
    } else {
        let (sin, cos) = (angle / 2.).sin_cos();
        let factor = sin / angle;
        [cos, v[0] * factor, v[1] * factor, v[2] * factor]
    }
}

/// Rotation vector (axis times angle) of a quaternion.
pub fn quat_as_rotation_vector(q: Quat) -> Vec3 {
    let m = (q[0] * q[0] + q[1] * q[1] + q[2] * q[2] + q[3] * q[3]).sqrt();
    let (w, x, y, z) = (q[0] / m, q[1] / m, q[2] / m, q[3] / m);
    let mut angle = 2. * w.clamp(-1., 1.).acos();
    if angle > std::f64::consts::PI {
        angle -= 2. * std::f64::consts::PI;
    }
    let s = (1. - w * w).max(0.).sqrt();
    if s < 1e-10 {
        [0., 0., 0.]
    } else {
        let factor = angle / s;
        [x * factor, y * factor, z * factor]
    }
}

/// Rotation matrix about a unit axis.
pub fn rotation_about_axis(axis: Vec3, angle: f64) -> Mat<f64> {
    quat_as_matrix(quat_from_rotation_vector(scale(angle, normalize(axis))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    #[test]
    fn test_quat_compose_matches_matrix_product() {
        let q1 = quat_from_rotation_vector([0.3, -0.2, 0.9]);
        let q2 = quat_from_rotation_vector([-0.7, 0.1, 0.4]);
        let r = quat_as_matrix(quat_compose(q1, q2));
        let r12 = &quat_as_matrix(q1) * &quat_as_matrix(q2);
        let v = [1.5, -2.0, 0.25];
        let a = mat3_vec(r.as_ref(), v);
        let b = mat3_vec(r12.as_ref(), v);
        for i in 0..3 {
            assert_relative_eq!(a[i], b[i], epsilon = 1e-12);
        }
    }

    #[test]
    fn test_rotation_vector_round_trip() {
        let v = [0.1, 0.4, -0.3];
        let w = quat_as_rotation_vector(quat_from_rotation_vector(v));
        for i in 0..3 {
            assert_relative_eq!(v[i], w[i], epsilon = 1e-12);
        }
    }

    #[test]
    fn test_skew_is_cross_product() {
        let a = [1., 2., 3.];
        let b = [-0.5, 4., 0.2];
        let c = mat3_vec(skew(a).as_ref(), b);
        let d = cross(a, b);
        for i in 0..3 {
            assert_relative_eq!(c[i], d[i], epsilon = 1e-14);
        }
    }

    #[test]
    fn test_rotation_about_z() {
        let r = rotation_about_axis([0., 0., 1.], PI / 2.);
        let v = mat3_vec(r.as_ref(), [1., 0., 0.]);
        assert_relative_eq!(v[0], 0., epsilon = 1e-12);
        assert_relative_eq!(v[1], 1., epsilon = 1e-12);
        assert_relative_eq!(v[2], 0., epsilon = 1e-12);
    }
}
