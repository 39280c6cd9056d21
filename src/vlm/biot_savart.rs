//! Induction kernels for straight vortex filaments, vortex rings and point
//! sources.

use std::f64::consts::PI;

use crate::util::{cross, dot, norm, scale, sub, Vec3};

/// Velocity induced at `x` by a straight filament from `a` to `b` with
/// circulation `gamma`. Points closer than `radius` to the filament line or to
/// either end receive exactly zero.
#[inline]
pub fn segment(x: Vec3, a: Vec3, b: Vec3, gamma: f64, radius: f64) -> Vec3 {
    let r1 = sub(x, a);
    let r2 = sub(x, b);
    let r0 = sub(b, a);
    let r1_norm = norm(r1);
    let r2_norm = norm(r2);
    let r0_norm = norm(r0);
    if r1_norm < radius || r2_norm < radius || r0_norm < f64::EPSILON {
        return [0., 0., 0.];
    }

    let r1_x_r2 = cross(r1, r2);
    let r1_x_r2_sq = dot(r1_x_r2, r1_x_r2);

    // Perpendicular distance from the filament line
    if r1_x_r2_sq.sqrt() / r0_norm < radius {
        return [0., 0., 0.];
    }

    let k = gamma / (4. * PI * r1_x_r2_sq)
        * (dot(r0, r1) / r1_norm - dot(r0, r2) / r2_norm);
    scale(k, r1_x_r2)
}

/// Velocity induced at `x` by a ring `A -> B -> C -> D -> A`.
#[inline]
pub fn ring(x: Vec3, corners: &[Vec3; 4], gamma: f64, radius: f64) -> Vec3 {
    let mut v = [0., 0., 0.];
    (0..4).for_each(|i| {
        let s = segment(x, corners[i], corners[(i + 1) % 4], gamma, radius);
        v = [v[0] + s[0], v[1] + s[1], v[2] + s[2]];
    });
    v
}

/// Velocity induced at `x` by a point source of total strength
/// `sigma * area` placed at `centre`.
#[inline]
pub fn point_source(x: Vec3, centre: Vec3, sigma: f64, area: f64, radius: f64) -> Vec3 {
    let r = sub(x, centre);
    let d = norm(r);
    if d < radius {
        return [0., 0., 0.];
    }
    scale(sigma * area / (4. * PI * d * d * d), r)
}
