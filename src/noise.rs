//! Noise Generation Utilities
//!
//! Sine hashes, 3D value noise and the fixed four-octave fractional Brownian
//! motion (fBm) that perturbs every cloud's ellipsoid. All functions are pure:
//! identical inputs give bit-identical outputs.

use glam::{DMat3, DVec3};

use crate::math3d::{fract, mix, smoothstep};

/// Integer part of the sine-hash multiplier. The shape seed supplies the
/// fractional part, so a shape of 0.5453 gives the classic 43758.5453.
pub const HASH_SCALE: f64 = 43758.0;

/// Shape seed used for per-pixel dither jitter
pub const DITHER_SHAPE: f64 = 0.5453;

// Lattice strides: y-neighbors are 57 apart, z-neighbors 113 apart.
const Y_STRIDE: f64 = 57.0;
const Z_STRIDE: f64 = 113.0;

/// Octave rotation/shear, column-major
const OCTAVE_ROTATION: DMat3 = DMat3::from_cols_array(&[
    0.00, 0.80, 0.60, //
    -0.80, 0.36, -0.48, //
    -0.60, -0.48, 0.64,
]);

/// Per-octave frequency drift added on top of roughness
const OCTAVE_DRIFT: f64 = 0.01;

/// Octave amplitudes, summing to 0.9375
pub const OCTAVE_WEIGHTS: [f64; 4] = [0.5, 0.25, 0.125, 0.0625];

/// Sine hash in [0, 1).
#[inline]
pub fn hash1d(n: f64, shape_seed: f64) -> f64 {
    fract((n.sin() + n.cos()) * (HASH_SCALE + shape_seed))
}

/// Three decorrelated [0, 1) draws for the same key
#[inline]
pub fn hash3d(n: f64, seed: f64) -> DVec3 {
    DVec3::new(
        hash1d(n, seed),
        hash1d(n + 57.31, seed),
        hash1d(n + 113.97, seed),
    )
}

/// Periodic breathing offset added to every animated hash:
/// `strength * sin(time * speed / 3)^5`.
///
/// The odd power keeps the sign and sharpens the peaks relative to a plain sine.
#[inline]
pub fn animation_pulse(time: f64, speed: f64, strength: f64) -> f64 {
    let s = (time * speed / 3.0).sin();
    strength * (s * s * s * s * s)
}

#[inline]
fn animated_hash(n: f64, shape_seed: f64, pulse: f64) -> f64 {
    hash1d(n, shape_seed) + pulse
}

/// 3D value noise with smoothstep interpolation.
/// Returns a value in [pulse, 1 + pulse).
pub fn value_noise(point: DVec3, shape_seed: f64, pulse: f64) -> f64 {
    let p = point.floor();
    let f = point - p;
    let fx = smoothstep(f.x);
    let fy = smoothstep(f.y);
    let fz = smoothstep(f.z);

    let n = p.x + p.y * Y_STRIDE + Z_STRIDE * p.z;
    let h = |offset: f64| animated_hash(n + offset, shape_seed, pulse);

    mix(
        mix(mix(h(0.0), h(1.0), fx), mix(h(57.0), h(58.0), fx), fy),
        mix(mix(h(113.0), h(114.0), fx), mix(h(170.0), h(171.0), fx), fy),
        fz,
    )
}

/// Four-octave fBm. Between octaves the sample point is rotated by a fixed
/// matrix and scaled by `roughness + k * 0.01` for k = 2, 3, 1.
pub fn fbm(point: DVec3, shape_seed: f64, roughness: f64, pulse: f64) -> f64 {
    let mut p = point;
    let mut f = 0.0;
    f += OCTAVE_WEIGHTS[0] * value_noise(p, shape_seed, pulse);
    p = OCTAVE_ROTATION * p * (roughness + 2.0 * OCTAVE_DRIFT);
    f += OCTAVE_WEIGHTS[1] * value_noise(p, shape_seed, pulse);
    p = OCTAVE_ROTATION * p * (roughness + 3.0 * OCTAVE_DRIFT);
    f += OCTAVE_WEIGHTS[2] * value_noise(p, shape_seed, pulse);
    p = OCTAVE_ROTATION * p * (roughness + OCTAVE_DRIFT);
    f += OCTAVE_WEIGHTS[3] * value_noise(p, shape_seed, pulse);
    f
}

#[cfg(test)]
mod tests {
    use super::*;

    // Reference values computed independently in double precision.
    const HASH_TABLE: [(f64, f64, f64); 5] = [
        (0.0, 0.5453, 0.5452999999979511),
        (1.0, 0.5453, 0.3891343774012057),
        (57.0, 0.5453, 0.7985126740895794),
        (-3.5, 83.0, 0.48985762481970596),
        (12.25, -2.0, 0.08828773891582387),
    ];

    const NOISE_TABLE: [(f64, f64, f64, f64); 4] = [
        (0.5, 0.5, 0.5, 0.6747785403622402),
        (1.25, -0.75, 2.5, 0.3634009471195636),
        (-3.1, 0.2, 7.9, 0.7163351238045448),
        (10.6, 4.4, -8.8, 0.4764143521435618),
    ];

    const FBM_TABLE: [(f64, f64, f64, f64, f64); 4] = [
        (0.5, 0.5, 0.5, 2.0, 0.5501487467165871),
        (1.25, -0.75, 2.5, 2.0, 0.37761709708520175),
        (-3.1, 0.2, 7.9, 1.5, 0.5339939857994395),
        (0.3, 0.1, -0.4, 3.0, 0.6105235536592735),
    ];

    #[test]
    fn test_hash1d_pinned_values() {
        for &(n, shape, expected) in &HASH_TABLE {
            let v = hash1d(n, shape);
            assert!(
                (v - expected).abs() < 1e-6,
                "hash1d({}, {}) = {}, expected {}",
                n,
                shape,
                v,
                expected
            );
        }
    }

    #[test]
    fn test_hash1d_deterministic() {
        let v1 = hash1d(12.75, 3.2);
        let v2 = hash1d(12.75, 3.2);
        assert_eq!(v1.to_bits(), v2.to_bits());
    }

    #[test]
    fn test_hash1d_range() {
        for i in -500..500 {
            for shape in [-5.0, -0.3, 0.0, 0.5453, 4.9, 83.0, 31999.0] {
                let v = hash1d(i as f64 * 0.731, shape);
                assert!((0.0..1.0).contains(&v), "hash1d out of range: {}", v);
            }
        }
    }

    #[test]
    fn test_hash3d_components_differ() {
        let h = hash3d(7.0, 83.0);
        assert!(h.x != h.y && h.y != h.z);
        assert!(h.cmpge(DVec3::ZERO).all() && h.cmplt(DVec3::ONE).all());
    }

    #[test]
    fn test_value_noise_at_lattice_point_is_corner_hash() {
        // At an integer point every weight is zero, so only corner n + 0 counts
        let p = DVec3::new(2.0, 1.0, -1.0);
        let n = 2.0 + 57.0 - 113.0;
        assert_eq!(value_noise(p, 0.5453, 0.0), hash1d(n, 0.5453));
    }

    #[test]
    fn test_value_noise_pinned_values() {
        for &(x, y, z, expected) in &NOISE_TABLE {
            let v = value_noise(DVec3::new(x, y, z), 0.5453, 0.0);
            assert!(
                (v - expected).abs() < 1e-6,
                "value_noise({}, {}, {}) = {}, expected {}",
                x,
                y,
                z,
                v,
                expected
            );
        }
    }

    #[test]
    fn test_fbm_pinned_values() {
        for &(x, y, z, roughness, expected) in &FBM_TABLE {
            let v = fbm(DVec3::new(x, y, z), 0.5453, roughness, 0.0);
            assert!(
                (v - expected).abs() < 1e-6,
                "fbm({}, {}, {}, r={}) = {}, expected {}",
                x,
                y,
                z,
                roughness,
                v,
                expected
            );
        }
    }

    #[test]
    fn test_fbm_range() {
        for i in 0..200 {
            let t = i as f64 * 0.173;
            let p = DVec3::new(t.sin() * 9.0, t * 0.5 - 3.0, t.cos() * 7.0);
            let v = fbm(p, 1.25, 2.0, 0.0);
            assert!((0.0..0.9375).contains(&v), "fbm out of range: {}", v);
        }
    }

    #[test]
    fn test_pulse_shifts_noise_uniformly() {
        let p = DVec3::new(0.3, 1.7, -2.2);
        let base = value_noise(p, 0.5453, 0.0);
        let pulsed = value_noise(p, 0.5453, 0.25);
        assert!((pulsed - base - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_animation_pulse_bounds_and_sign() {
        assert_eq!(animation_pulse(0.0, 1.0, 2.0), 0.0);
        for i in 0..400 {
            let v = animation_pulse(i as f64 * 0.05, 1.3, 0.8);
            assert!(v.abs() <= 0.8 + 1e-12);
        }
        // sin^5 keeps the sign of sin
        let t = 3.0 * 1.5 * std::f64::consts::PI; // sin(1.5 pi) = -1
        assert!((animation_pulse(t, 1.0, 1.0) + 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_value_noise_continuity() {
        for i in 0..100 {
            let x = i as f64 * 0.1;
            let v1 = value_noise(DVec3::new(x, 0.4, 0.2), 0.5453, 0.0);
            let v2 = value_noise(DVec3::new(x + 0.001, 0.4, 0.2), 0.5453, 0.0);
            assert!((v1 - v2).abs() < 0.05, "Noise discontinuity at x={}", x);
        }
    }
}
