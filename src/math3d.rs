//! 3D Math Utilities for the Cloud Renderer
//!
//! Shader-style scalar helpers (`fract`, `mix`, GLSL `mod`) with the exact
//! semantics the ray marcher relies on, plus the camera that produces the
//! inverse matrices handed to the per-pixel evaluation.

use glam::{DMat4, DVec2, DVec3, DVec4};
use serde::{Deserialize, Serialize};

/// GLSL `fract`: `x - floor(x)`, always in [0, 1) for finite input.
///
/// Not `f64::fract`, which truncates toward zero and goes negative for
/// negative input.
#[inline]
pub fn fract(x: f64) -> f64 {
    x - x.floor()
}

/// GLSL `mix`: `a * (1 - t) + b * t`
#[inline]
pub fn mix(a: f64, b: f64, t: f64) -> f64 {
    a * (1.0 - t) + b * t
}

/// Vector `mix` with a scalar weight
#[inline]
pub fn mix_vec(a: DVec3, b: DVec3, t: f64) -> DVec3 {
    a * (1.0 - t) + b * t
}

/// GLSL `mod`: `x - y * floor(x / y)`, result takes the sign of `y`
#[inline]
pub fn glsl_mod(x: f64, y: f64) -> f64 {
    x - y * (x / y).floor()
}

/// GLSL `step`: 0.0 if `x < edge`, else 1.0
#[inline]
pub fn step(edge: f64, x: f64) -> f64 {
    if x < edge {
        0.0
    } else {
        1.0
    }
}

/// Smoothstep weight: 3t² - 2t³
#[inline]
pub fn smoothstep(t: f64) -> f64 {
    t * t * (3.0 - 2.0 * t)
}

/// Normalize, falling back to `fallback` for zero-length or non-finite input
#[inline]
pub fn normalize_or(v: DVec3, fallback: DVec3) -> DVec3 {
    v.try_normalize().unwrap_or(fallback)
}

/// Approximate equality check for floating point comparison
#[inline]
pub fn approx_eq(a: DVec3, b: DVec3, epsilon: f64) -> bool {
    (a - b).abs().max_element() < epsilon
}

// ============================================================================
// Camera
// ============================================================================

/// Perspective look-at camera (right-handed, GL clip space)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    pub position: DVec3,
    pub target: DVec3,
    /// Vertical field of view in degrees
    pub fov_y: f64,
    pub near: f64,
    pub far: f64,
}

impl Camera {
    pub fn new(position: DVec3, target: DVec3) -> Self {
        Self {
            position,
            target,
            ..Self::default()
        }
    }

    /// World-space forward direction
    pub fn forward(&self) -> DVec3 {
        normalize_or(self.target - self.position, DVec3::NEG_Z)
    }

    pub fn view_matrix(&self) -> DMat4 {
        let forward = self.forward();
        // look_at degenerates when forward is parallel to up
        let up = if forward.cross(DVec3::Y).length_squared() < 1e-12 {
            DVec3::Z
        } else {
            DVec3::Y
        };
        DMat4::look_at_rh(self.position, self.position + forward, up)
    }

    pub fn projection_matrix(&self, aspect: f64) -> DMat4 {
        DMat4::perspective_rh_gl(self.fov_y.to_radians(), aspect.max(1e-6), self.near, self.far)
    }

    /// Rotate the camera around its own position (yaw about world Y, then pitch)
    pub fn turn(&mut self, yaw: f64, pitch: f64) {
        let offset = self.target - self.position;
        let distance = offset.length().max(1e-6);
        let dir = offset / distance;

        let current_pitch = dir.y.clamp(-1.0, 1.0).asin();
        let current_yaw = dir.x.atan2(-dir.z);
        let limit = 89.0_f64.to_radians();
        let new_pitch = (current_pitch + pitch).clamp(-limit, limit);
        let new_yaw = current_yaw + yaw;

        let (sin_p, cos_p) = new_pitch.sin_cos();
        let (sin_y, cos_y) = new_yaw.sin_cos();
        let new_dir = DVec3::new(cos_p * sin_y, sin_p, -cos_p * cos_y);
        self.target = self.position + new_dir * distance;
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: DVec3::ZERO,
            target: DVec3::new(0.0, 0.3, -1.0),
            fov_y: 60.0,
            near: 0.1,
            far: 1000.0,
        }
    }
}

/// Reconstruct a world-space ray direction from a screen UV in [0,1]²
/// (origin bottom-left), the way a fragment shader does from `gl_FragCoord`.
pub fn unproject_direction(uv: DVec2, inverse_projection: &DMat4, inverse_view: &DMat4) -> DVec3 {
    let ndc = uv * 2.0 - DVec2::ONE;
    let point = *inverse_projection * DVec4::new(ndc.x, ndc.y, -1.0, 1.0);
    let world = *inverse_view * DVec4::new(point.x, point.y, point.z, 0.0);
    normalize_or(world.truncate(), DVec3::NEG_Z)
}
