//! Volumetric Integrator
//!
//! Front-to-back ray march through one cloud layer. Each step takes the
//! governing (maximum) density over the layer's instances. Where that is
//! visible, a short shadow ray toward the light gives self-shadowing. Color
//! accumulates against a running transmittance that starts at 1 (clear sky)
//! and only ever decreases.
//!
//! The `alpha` this module returns is transmittance, i.e. how much of the
//! background still shows through, not coverage.

use glam::DVec3;

use crate::placement::{is_visible, CloudEnsemble, SkipMask};

/// Per-step density to opacity gain, normalized by step count
pub const OPACITY_GAIN: f64 = 20.0;

/// Shadow extinction: `exp(-mean_shadow_density * SHADOW_EXTINCTION)`
pub const SHADOW_EXTINCTION: f64 = 3.0;

/// A world-space ray with unit direction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: DVec3,
    pub dir: DVec3,
}

impl Ray {
    pub fn new(origin: DVec3, dir: DVec3) -> Self {
        Self { origin, dir }
    }

    #[inline]
    pub fn at(&self, t: f64) -> DVec3 {
        self.origin + self.dir * t
    }
}

/// Sample counts and lengths for one layer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarchSettings {
    pub steps: u32,
    pub shadow_steps: u32,
    pub march_length: f64,
    pub shadow_length: f64,
    pub cloud_color: DVec3,
    /// Sky light leaking into the cloud body
    pub sky_color: DVec3,
}

impl MarchSettings {
    #[inline]
    pub fn step_length(&self) -> f64 {
        self.march_length / f64::from(self.steps.max(1))
    }

    #[inline]
    pub fn shadow_step_length(&self) -> f64 {
        self.shadow_length / f64::from(self.shadow_steps.max(1))
    }

    /// Opacity a density sample adds over one step, in [0, 1]
    #[inline]
    pub fn step_opacity(&self, density: f64) -> f64 {
        (density / f64::from(self.steps.max(1)) * OPACITY_GAIN).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarchStatus {
    Marching,
    /// Transmittance reached zero
    TerminatedOpaque,
    /// All steps consumed
    TerminatedMaxSteps,
}

impl MarchStatus {
    #[inline]
    pub fn is_done(self) -> bool {
        self != MarchStatus::Marching
    }
}

/// Per-ray accumulator
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarchState {
    pub color: DVec3,
    /// Remaining transmittance: 1 = nothing hit yet
    pub alpha: f64,
    pub position: DVec3,
    pub step: u32,
    pub status: MarchStatus,
}

/// Final color and transmittance of a layer along one ray
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerSample {
    pub color: DVec3,
    pub alpha: f64,
}

impl LayerSample {
    /// Nothing in the way
    pub const CLEAR: Self = Self {
        color: DVec3::ZERO,
        alpha: 1.0,
    };

    /// The layer composited over a background color
    #[inline]
    pub fn over(&self, background: DVec3) -> DVec3 {
        self.color + background * self.alpha
    }
}

impl From<MarchState> for LayerSample {
    fn from(state: MarchState) -> Self {
        Self {
            color: state.color,
            alpha: state.alpha,
        }
    }
}

/// Marches rays through one ensemble toward a fixed light
pub struct LayerMarcher<'a> {
    ensemble: &'a CloudEnsemble,
    settings: &'a MarchSettings,
    light_dir: DVec3,
}

impl<'a> LayerMarcher<'a> {
    /// `light_dir` must be unit length
    pub fn new(ensemble: &'a CloudEnsemble, settings: &'a MarchSettings, light_dir: DVec3) -> Self {
        Self {
            ensemble,
            settings,
            light_dir,
        }
    }

    /// Fresh state at `ray.origin + ray.dir * (turbulence * step_length + ray_shift)`
    pub fn start(&self, ray: &Ray, turbulence: f64, ray_shift: f64) -> MarchState {
        let status = if self.settings.steps == 0 {
            MarchStatus::TerminatedMaxSteps
        } else {
            MarchStatus::Marching
        };
        MarchState {
            color: DVec3::ZERO,
            alpha: 1.0,
            position: ray.at(turbulence * self.settings.step_length() + ray_shift),
            step: 0,
            status,
        }
    }

    /// Take one step. No-op once the state has terminated.
    pub fn advance(&self, state: &mut MarchState, ray: &Ray, jitter: f64, mask: &mut SkipMask) {
        if state.status.is_done() {
            return;
        }

        let density = self.ensemble.sample(state.position, mask);
        if is_visible(density) {
            let shadow = self.shadow(state.position, jitter, mask);
            let opacity = self.settings.step_opacity(density);

            state.color += self.settings.cloud_color * (shadow * opacity) * state.alpha;
            state.alpha *= 1.0 - opacity;
            state.color += self.settings.sky_color * opacity * state.alpha;
        }

        state.position += ray.dir * self.settings.step_length();
        state.step += 1;

        if state.alpha <= 0.0 {
            state.status = MarchStatus::TerminatedOpaque;
        } else if state.step >= self.settings.steps {
            state.status = MarchStatus::TerminatedMaxSteps;
        }
    }

    /// Light transmittance from `position` toward the light, in (0, 1].
    ///
    /// Each shadow sample uses the same max-over-instances density as the
    /// primary ray, with skip flags recomputed at the shadow position.
    pub fn shadow(&self, position: DVec3, jitter: f64, mask: &mut SkipMask) -> f64 {
        let steps = self.settings.shadow_steps;
        if steps == 0 {
            return 1.0;
        }
        let step_length = self.settings.shadow_step_length();
        let mut light_position = position + self.light_dir * jitter * step_length;
        let mut accumulated = 0.0;
        for _ in 0..steps {
            light_position += self.light_dir * step_length;
            accumulated += self.ensemble.sample(light_position, mask);
        }
        (-accumulated / f64::from(steps) * SHADOW_EXTINCTION).exp()
    }

    /// March `ray` to completion
    pub fn march(&self, ray: &Ray, turbulence: f64, ray_shift: f64, jitter: f64) -> MarchState {
        let mut mask = SkipMask::new();
        let mut state = self.start(ray, turbulence, ray_shift);
        while !state.status.is_done() {
            self.advance(&mut state, ray, jitter, &mut mask);
        }
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::density::DensityField;
    use crate::math3d::glsl_mod;
    use crate::placement::{CloudInstance, EnsembleSettings, SKY_CUTOFF};

    fn settings() -> MarchSettings {
        MarchSettings {
            steps: 48,
            shadow_steps: 8,
            march_length: 16.0,
            shadow_length: 2.0,
            cloud_color: DVec3::new(0.918, 0.749, 0.42),
            sky_color: DVec3::new(0.2, 0.498, 1.0),
        }
    }

    fn layer(count: u32) -> EnsembleSettings {
        EnsembleSettings {
            seed: 83.0,
            instance_count: count,
            size: DVec3::new(2.0, 1.0, 2.0),
            shape: 0.5453,
            shift_speed: 1.0,
            animation_speed: 1.0,
            animation_strength: 0.0,
        }
    }

    /// Ensemble placed at the moment instance 1 sits mid-cycle, where its
    /// transition scale is ~1
    fn ensemble(scatter: f64, minimum_density: f64, count: u32) -> CloudEnsemble {
        let layer = layer(count);
        let field = DensityField {
            scatter,
            roughness: 2.0,
            minimum_density,
            animation_strength: 0.0,
        };
        let first = CloudInstance::place(1, &layer, 0.0);
        let time = glsl_mod(SKY_CUTOFF - first.shift.wrapped, 2.0 * SKY_CUTOFF) / first.speed;
        CloudEnsemble::new(&layer, field, time)
    }

    /// A ray along -Z straight through instance 1's center
    fn ray_through_first(ensemble: &CloudEnsemble) -> Ray {
        let target = ensemble.instances()[0].center;
        Ray::new(target + DVec3::new(0.0, 0.0, 6.0), DVec3::NEG_Z)
    }

    #[test]
    fn test_empty_field_stays_clear() {
        let ensemble = ensemble(0.0, -1.0, 16);
        let settings = settings();
        let marcher = LayerMarcher::new(&ensemble, &settings, DVec3::Y);
        let ray = Ray::new(DVec3::ZERO, DVec3::Y);
        let state = marcher.march(&ray, 0.0, 0.0, 0.0);
        assert_eq!(state.color, DVec3::ZERO);
        assert_eq!(state.alpha, 1.0);
        assert_eq!(state.status, MarchStatus::TerminatedMaxSteps);
        assert_eq!(state.step, 48);
    }

    #[test]
    fn test_transmittance_monotonic_and_color_non_decreasing() {
        let ensemble = ensemble(2.2, 0.2, 24);
        let settings = settings();
        let light = DVec3::new(-1.2, 2.1, -1.0).normalize();
        let marcher = LayerMarcher::new(&ensemble, &settings, light);
        let ray = ray_through_first(&ensemble);

        let mut mask = SkipMask::new();
        let mut state = marcher.start(&ray, 0.0, 0.0);
        let mut previous = state;
        let mut hit = false;
        while !state.status.is_done() {
            marcher.advance(&mut state, &ray, 0.5, &mut mask);
            assert!(state.alpha <= previous.alpha, "transmittance increased");
            assert!(state.alpha >= 0.0);
            assert!(state.color.cmpge(previous.color).all(), "color decreased");
            assert!(state.color.cmpge(DVec3::ZERO).all());
            hit |= state.alpha < previous.alpha;
            previous = state;
        }
        assert!(hit, "ray through an instance center should hit cloud");
    }

    #[test]
    fn test_opaque_termination() {
        // Dense field and a huge gain per step saturate in one step
        let ensemble = ensemble(0.0, 5.0, 4);
        let mut settings = settings();
        settings.steps = 10;
        let marcher = LayerMarcher::new(&ensemble, &settings, DVec3::Y);
        // density 1 / 10 steps * 20 = opacity 1
        let ray = ray_through_first(&ensemble);
        let state = marcher.march(&ray, 0.0, 0.0, 0.0);
        assert_eq!(state.status, MarchStatus::TerminatedOpaque);
        assert_eq!(state.alpha, 0.0);
        assert!(state.step < 10);
    }

    #[test]
    fn test_start_offset_by_turbulence_and_shift() {
        let ensemble = ensemble(0.0, -1.0, 1);
        let settings = settings();
        let marcher = LayerMarcher::new(&ensemble, &settings, DVec3::Y);
        let ray = Ray::new(DVec3::ZERO, DVec3::X);
        let state = marcher.start(&ray, 0.5, 2.0);
        let expected = 0.5 * settings.step_length() + 2.0;
        assert!((state.position.x - expected).abs() < 1e-12);
    }

    #[test]
    fn test_shadow_is_one_in_empty_space() {
        let ensemble = ensemble(2.2, 0.0, 8);
        let settings = settings();
        let marcher = LayerMarcher::new(&ensemble, &settings, DVec3::Y);
        let mut mask = SkipMask::new();
        let far = DVec3::new(0.0, 10.0 * SKY_CUTOFF, 0.0);
        assert_eq!(marcher.shadow(far, 0.3, &mut mask), 1.0);
    }

    #[test]
    fn test_shadow_darker_inside_cloud() {
        let ensemble = ensemble(0.0, 0.5, 1);
        let settings = settings();
        let marcher = LayerMarcher::new(&ensemble, &settings, DVec3::Y);
        let mut mask = SkipMask::new();
        let center = ensemble.instances()[0].center;
        let inside = marcher.shadow(center, 0.0, &mut mask);
        assert!(inside < 1.0 && inside > 0.0);
    }

    #[test]
    fn test_step_opacity_clamped() {
        let settings = settings();
        assert_eq!(settings.step_opacity(0.0), 0.0);
        assert_eq!(settings.step_opacity(100.0), 1.0);
        assert!((settings.step_opacity(0.5) - 0.5 / 48.0 * 20.0).abs() < 1e-12);
    }

    #[test]
    fn test_layer_sample_over_background() {
        let bg = DVec3::new(0.1, 0.2, 0.3);
        assert_eq!(LayerSample::CLEAR.over(bg), bg);
        let opaque = LayerSample {
            color: DVec3::ONE,
            alpha: 0.0,
        };
        assert_eq!(opaque.over(bg), DVec3::ONE);
    }
}
