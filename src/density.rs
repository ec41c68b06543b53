//! Cloud density field: an ellipsoid perturbed by fBm noise.

use glam::DVec3;

use crate::noise::fbm;

/// Densities at or below this contribute nothing to a march step
pub const DENSITY_THRESHOLD: f64 = 0.001;

/// Smallest ellipsoid radius the core accepts before inverting
pub const MIN_SIZE: f64 = 1e-4;

/// Invert ellipsoid radii. Components are clamped to [`MIN_SIZE`] so the
/// result never contains an infinity.
#[inline]
pub fn inverse_size(size: DVec3) -> DVec3 {
    let clamped = DVec3::new(
        sanitize_size(size.x),
        sanitize_size(size.y),
        sanitize_size(size.z),
    );
    clamped.recip()
}

#[inline]
fn sanitize_size(v: f64) -> f64 {
    if v.is_nan() {
        MIN_SIZE
    } else {
        v.max(MIN_SIZE)
    }
}

/// `1 - |point * inv_size|`: positive inside the unit ellipsoid
#[inline]
pub fn ellipse(point: DVec3, inv_size: DVec3) -> f64 {
    1.0 - (point * inv_size).length()
}

/// Shape and noise controls shared by every instance of a layer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DensityField {
    pub scatter: f64,
    pub roughness: f64,
    pub minimum_density: f64,
    pub animation_strength: f64,
}

impl DensityField {
    /// Occupancy in [0, 1] at `point` (instance-local coordinates)
    #[inline]
    pub fn density(&self, point: DVec3, inv_size: DVec3, shape_seed: f64, pulse: f64) -> f64 {
        density(
            point,
            inv_size,
            self.scatter,
            shape_seed,
            self.roughness,
            pulse,
            self.minimum_density,
        )
    }

    /// Cheap upper bound on the unclamped density.
    ///
    /// fBm never exceeds `0.9375 * (1 + animation_strength)`, so
    /// `ellipse + scatter + (1 + scatter) * animation_strength + minimum_density`
    /// dominates the true value whenever scatter and strength are non-negative.
    #[inline]
    pub fn upper_bound(&self, point: DVec3, inv_size: DVec3) -> f64 {
        ellipse(point, inv_size)
            + self.scatter
            + (1.0 + self.scatter) * self.animation_strength
            + self.minimum_density
    }

    /// True when the bound rules out any contribution at `point`
    #[inline]
    pub fn can_skip(&self, point: DVec3, inv_size: DVec3) -> bool {
        !(self.upper_bound(point, inv_size) > 0.0)
    }
}

/// Density at `point`: `clamp(ellipse + fbm * scatter + minimum_density, 0, 1)`.
///
/// `inv_size` must not contain zero components; NaN results collapse to 0.
#[inline]
pub fn density(
    point: DVec3,
    inv_size: DVec3,
    scatter: f64,
    shape_seed: f64,
    roughness: f64,
    pulse: f64,
    minimum_density: f64,
) -> f64 {
    let raw = ellipse(point, inv_size) + fbm(point, shape_seed, roughness, pulse) * scatter
        + minimum_density;
    if raw.is_nan() {
        0.0
    } else {
        raw.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // (point, expected) for inv_size = 2, scatter = 2.2, shape = 0.5453, roughness = 2
    const DENSITY_TABLE: [(f64, f64, f64, f64); 4] = [
        (0.0, 0.0, 0.0, 1.0),
        (0.4, 0.1, -0.2, 1.0),
        (0.6, 0.3, 0.2, 0.5787615059669547),
        (1.0, 0.5, 0.0, 0.0),
    ];

    #[test]
    fn test_density_pinned_values() {
        for &(x, y, z, expected) in &DENSITY_TABLE {
            let v = density(
                DVec3::new(x, y, z),
                DVec3::splat(2.0),
                2.2,
                0.5453,
                2.0,
                0.0,
                0.0,
            );
            assert!(
                (v - expected).abs() < 1e-5,
                "density({}, {}, {}) = {}, expected {}",
                x,
                y,
                z,
                v,
                expected
            );
        }
    }

    #[test]
    fn test_density_with_negative_minimum() {
        let inv = DVec3::new(0.5, 1.0, 0.5);
        let a = density(DVec3::new(0.9, 0.2, 0.1), inv, 1.0, 1.3, 2.0, 0.0, -0.5);
        let b = density(DVec3::new(1.4, 0.3, -0.2), inv, 1.0, 1.3, 2.0, 0.0, -0.5);
        assert!((a - 0.4436857922953803).abs() < 1e-5);
        assert!((b - 0.18923638324585212).abs() < 1e-5);
    }

    #[test]
    fn test_density_range() {
        let field = DensityField {
            scatter: 6.0,
            roughness: 2.5,
            minimum_density: 0.3,
            animation_strength: 0.0,
        };
        for i in 0..300 {
            let t = i as f64 * 0.21;
            let p = DVec3::new(t.sin() * 4.0, (t * 0.7).cos() * 2.0, t * 0.05 - 7.0);
            let v = field.density(p, DVec3::new(0.5, 1.0, 0.5), 0.5453, 0.0);
            assert!((0.0..=1.0).contains(&v), "density out of range: {}", v);
        }
    }

    #[test]
    fn test_inverse_size_never_infinite() {
        let inv = inverse_size(DVec3::new(0.0, -3.0, f64::NAN));
        assert!(inv.is_finite());
        assert_eq!(inv, DVec3::splat(1.0 / MIN_SIZE));
        assert_eq!(inverse_size(DVec3::new(2.0, 1.0, 0.5)), DVec3::new(0.5, 1.0, 2.0));
    }

    #[test]
    fn test_nan_point_yields_zero() {
        let v = density(DVec3::splat(f64::NAN), DVec3::ONE, 1.0, 0.5, 2.0, 0.0, 0.0);
        assert_eq!(v, 0.0);
    }

    #[test]
    fn test_upper_bound_dominates_raw_density() {
        let inv = DVec3::new(0.5, 1.0, 0.5);
        for (k, strength) in [0.0, 0.4, 1.5].into_iter().enumerate() {
            let field = DensityField {
                scatter: 2.0 + k as f64,
                roughness: 2.0,
                minimum_density: -0.2,
                animation_strength: strength,
            };
            for i in 0..200 {
                let t = i as f64 * 0.37;
                let p = DVec3::new(t.cos() * 6.0, t.sin() * 3.0, (t * 0.3).sin() * 6.0);
                let pulse = crate::noise::animation_pulse(t, 1.0, strength);
                let raw = ellipse(p, inv)
                    + fbm(p, 0.7, field.roughness, pulse) * field.scatter
                    + field.minimum_density;
                assert!(raw <= field.upper_bound(p, inv));
            }
        }
    }
}
