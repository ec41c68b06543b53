//! Sky/Sun Compositor
//!
//! Background gradient, sun disc and the final two-layer blend.

use glam::DVec3;

use crate::march::LayerSample;
use crate::math3d::{mix_vec, step};

/// Glare tint added on top of every pixel, scaled by `sun_dot^8`
pub const GLARE_COLOR: DVec3 = DVec3::new(0.2, 0.08, 0.04);
pub const GLARE_GAIN: f64 = 1.4;
const GLARE_POWER: i32 = 8;

// Sun falloff exponent at sun_size = 1 and sun_size = 0
const SOFT_SUN_EXPONENT: f64 = 6.0;
const SHARP_SUN_EXPONENT: f64 = 80.0;

/// How two layer results are merged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LayerBlend {
    /// `mix(near_over_sky, far_over_sky, near_alpha)`
    #[default]
    MixByNearAlpha,
}

/// Sky gradient and sun, with the light direction already normalized
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkyModel {
    pub sky_color: DVec3,
    pub fade_color: DVec3,
    pub fade_factor: f64,
    pub fade_shift: f64,
    pub sun_color: DVec3,
    pub sun_intensity: f64,
    pub sun_size: f64,
    pub light_dir: DVec3,
}

impl SkyModel {
    /// Base sky, shifted only for rays below `fade_shift`
    #[inline]
    pub fn gradient(&self, dir: DVec3) -> DVec3 {
        self.sky_color - self.fade_color * (self.fade_factor * (dir.y - self.fade_shift).min(0.0))
    }

    /// Cosine between the view ray and the sun, clamped to [0, 1]
    #[inline]
    pub fn sun_dot(&self, dir: DVec3) -> f64 {
        self.light_dir.dot(dir).clamp(0.0, 1.0)
    }

    /// Falloff exponent: a larger sun size gives a softer, wider disc
    #[inline]
    pub fn sun_exponent(&self) -> f64 {
        self.sun_size * SOFT_SUN_EXPONENT + (1.0 - self.sun_size) * SHARP_SUN_EXPONENT
    }

    #[inline]
    pub fn sun(&self, sun_dot: f64) -> DVec3 {
        self.sun_color * (self.sun_intensity * sun_dot.powf(self.sun_exponent()))
    }

    /// Everything behind the clouds
    #[inline]
    pub fn background(&self, dir: DVec3) -> DVec3 {
        self.gradient(dir) + self.sun(self.sun_dot(dir))
    }
}

#[inline]
pub fn sun_glare(sun_dot: f64) -> DVec3 {
    GLARE_COLOR * (GLARE_GAIN * sun_dot.powi(GLARE_POWER))
}

/// Merge both layers over `background` and add the glare
pub fn composite(
    near: &LayerSample,
    far: &LayerSample,
    background: DVec3,
    sun_dot: f64,
    blend: LayerBlend,
) -> DVec3 {
    let near_over = near.over(background);
    let far_over = far.over(background);
    let blended = match blend {
        LayerBlend::MixByNearAlpha => mix_vec(near_over, far_over, near.alpha),
    };
    blended + sun_glare(sun_dot)
}

/// 1.0 where the pixel counts as cloud, 0.0 for sky
#[inline]
pub fn cloud_mask(near_alpha: f64, far_alpha: f64) -> f64 {
    step(0.5, 1.0 - near_alpha * far_alpha)
}
