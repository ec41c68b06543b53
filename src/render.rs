//! Per-frame Evaluation
//!
//! [`FrameRenderer`] holds everything that is constant across one frame (light
//! direction, both placed ensembles, the turbulence phase) and evaluates
//! pixels as pure functions of their screen coordinate. Rows are shaded in
//! parallel with rayon.

use glam::{DVec2, DVec3};
use rayon::prelude::*;

use crate::display::PixelBuffer;
use crate::march::{LayerMarcher, LayerSample, MarchSettings, Ray};
use crate::math3d::{fract, normalize_or, unproject_direction};
use crate::noise::{hash1d, DITHER_SHAPE};
use crate::params::{RenderSettings, ViewParameters};
use crate::placement::CloudEnsemble;
use crate::sky::{cloud_mask, composite, sun_glare, SkyModel};

// Row stride used when hashing a UV into a dither value
const DITHER_ROW_STRIDE: f64 = 50.0;

// ============================================================================
// View selection
// ============================================================================

/// What ends up in the color channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DebugView {
    /// Both layers composited over the sky
    #[default]
    Final,
    /// Near layer over the sky only
    NearLayer,
    /// Far layer over the sky only
    FarLayer,
    /// Grayscale combined transmittance
    Transmittance,
    /// The binary cloud/sky classification
    CloudMask,
    /// Sky gradient, sun and glare without any clouds
    SkyOnly,
}

impl DebugView {
    pub const ALL: [DebugView; 6] = [
        DebugView::Final,
        DebugView::NearLayer,
        DebugView::FarLayer,
        DebugView::Transmittance,
        DebugView::CloudMask,
        DebugView::SkyOnly,
    ];

    /// Cycle to the next view
    pub fn next(self) -> Self {
        let index = Self::ALL.iter().position(|v| *v == self).unwrap_or(0);
        Self::ALL[(index + 1) % Self::ALL.len()]
    }

    pub fn name(self) -> &'static str {
        match self {
            DebugView::Final => "final",
            DebugView::NearLayer => "near layer",
            DebugView::FarLayer => "far layer",
            DebugView::Transmittance => "transmittance",
            DebugView::CloudMask => "cloud mask",
            DebugView::SkyOnly => "sky only",
        }
    }

    fn needs_near(self) -> bool {
        !matches!(self, DebugView::FarLayer | DebugView::SkyOnly)
    }

    fn needs_far(self) -> bool {
        !matches!(self, DebugView::NearLayer | DebugView::SkyOnly)
    }
}

/// What ends up in the alpha channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlphaMode {
    /// Always 1
    #[default]
    Opaque,
    /// 1 for cloud, 0 for sky, for a downstream tile pass
    CloudMask,
}

impl AlphaMode {
    pub fn toggled(self) -> Self {
        match self {
            AlphaMode::Opaque => AlphaMode::CloudMask,
            AlphaMode::CloudMask => AlphaMode::Opaque,
        }
    }
}

/// Whether the image changes over time with these settings
pub fn is_animated(settings: &RenderSettings, noise: bool) -> bool {
    let cloud = &settings.cloud;
    noise
        || cloud.turbulence != 0.0
        || cloud.shift_speed != 0.0
        || (cloud.animation_strength > 0.0 && cloud.animation_speed != 0.0)
}

/// Identity of a rendered frame. Two frames with equal keys produce identical
/// images, so the second one can be skipped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameKey {
    settings: RenderSettings,
    view: ViewParameters,
}

impl FrameKey {
    pub fn new(settings: &RenderSettings, view: &ViewParameters) -> Self {
        let mut view = *view;
        if !is_animated(settings, view.noise) {
            view.time = 0.0;
        }
        Self {
            settings: *settings,
            view,
        }
    }
}

// ============================================================================
// FrameRenderer
// ============================================================================

struct Layer {
    ensemble: CloudEnsemble,
    /// Ray start offset from the eye
    offset: DVec3,
}

pub struct FrameRenderer {
    settings: RenderSettings,
    view: ViewParameters,
    sky: SkyModel,
    march: MarchSettings,
    near: Layer,
    far: Layer,
    turbulence_phase: f64,
}

impl FrameRenderer {
    pub fn new(settings: &RenderSettings, view: &ViewParameters) -> Self {
        let cloud = &settings.cloud;
        let scene = &settings.scene;
        let time = view.time;

        let light_dir = normalize_or(scene.sun_position, DVec3::Y);
        let sky = SkyModel {
            sky_color: scene.sky_color,
            fade_color: scene.sky_fade_color,
            fade_factor: scene.sky_fade_factor,
            fade_shift: scene.sky_fade_shift,
            sun_color: scene.sun_color,
            sun_intensity: scene.sun_intensity,
            sun_size: scene.sun_size,
            light_dir,
        };

        let forward = normalize_or(view.camera_direction, DVec3::NEG_Z);
        let field = cloud.density_field();
        let near = Layer {
            ensemble: CloudEnsemble::new(&cloud.near_ensemble(), field, time),
            offset: forward * cloud.cloud_offset,
        };
        let far = Layer {
            ensemble: CloudEnsemble::new(&cloud.far_ensemble(), field, time),
            offset: forward * cloud.background_offset + DVec3::Y * cloud.background_up_shift,
        };
        log::debug!(
            "Placed {} near and {} far instances at t={:.3}",
            near.ensemble.instances().len(),
            far.ensemble.instances().len(),
            time
        );

        Self {
            settings: *settings,
            view: *view,
            sky,
            march: cloud.march_settings(scene.sky_color),
            near,
            far,
            turbulence_phase: fract(time * cloud.turbulence),
        }
    }

    pub fn light_dir(&self) -> DVec3 {
        self.sky.light_dir
    }

    /// World-space view ray for a UV in [0,1]² (origin bottom-left)
    pub fn camera_ray(&self, uv: DVec2) -> DVec3 {
        unproject_direction(uv, &self.view.inverse_projection, &self.view.inverse_view)
    }

    /// Per-pixel dither in [0, 1), or 0 with noise disabled
    pub fn jitter(&self, uv: DVec2) -> f64 {
        if self.view.noise {
            hash1d(uv.x + uv.y * DITHER_ROW_STRIDE + self.view.time, DITHER_SHAPE)
        } else {
            0.0
        }
    }

    fn march_layer(&self, layer: &Layer, eye: DVec3, dir: DVec3, jitter: f64) -> LayerSample {
        let marcher = LayerMarcher::new(&layer.ensemble, &self.march, self.sky.light_dir);
        let ray = Ray::new(eye + layer.offset, dir);
        marcher
            .march(&ray, self.turbulence_phase, 0.0, jitter)
            .into()
    }

    /// Shade one explicit ray from `eye` along unit `dir`. Returns RGBA with
    /// color unclamped.
    pub fn shade_ray(&self, eye: DVec3, dir: DVec3, jitter: f64) -> [f64; 4] {
        let view = self.settings.debug_view;
        let near = if view.needs_near() {
            self.march_layer(&self.near, eye, dir, jitter)
        } else {
            LayerSample::CLEAR
        };
        let far = if view.needs_far() {
            self.march_layer(&self.far, eye, dir, jitter)
        } else {
            LayerSample::CLEAR
        };

        let background = self.sky.background(dir);
        let sun_dot = self.sky.sun_dot(dir);
        let mask = cloud_mask(near.alpha, far.alpha);

        let color = match view {
            DebugView::Final => composite(&near, &far, background, sun_dot, self.settings.blend),
            DebugView::NearLayer => near.over(background),
            DebugView::FarLayer => far.over(background),
            DebugView::Transmittance => DVec3::splat(near.alpha * far.alpha),
            DebugView::CloudMask => DVec3::splat(mask),
            DebugView::SkyOnly => background + sun_glare(sun_dot),
        };
        let alpha = match self.settings.alpha_mode {
            AlphaMode::Opaque => 1.0,
            AlphaMode::CloudMask => mask,
        };
        [color.x, color.y, color.z, alpha]
    }

    /// Shade the pixel at `uv` as seen from the camera
    pub fn render_pixel(&self, uv: DVec2) -> [f64; 4] {
        let dir = self.camera_ray(uv);
        self.shade_ray(self.view.camera_position, dir, self.jitter(uv))
    }

    /// Fill `buffer`, sampling pixel centers. Row 0 is the top of the image.
    pub fn render(&self, buffer: &mut PixelBuffer) {
        let width = buffer.width();
        let height = buffer.height();
        if width == 0 || height == 0 {
            return;
        }
        let inv_w = 1.0 / width as f64;
        let inv_h = 1.0 / height as f64;

        buffer
            .as_bytes_mut()
            .par_chunks_exact_mut(width as usize * 4)
            .enumerate()
            .for_each(|(row, pixels)| {
                let v = 1.0 - (row as f64 + 0.5) * inv_h;
                for (column, pixel) in pixels.chunks_exact_mut(4).enumerate() {
                    let uv = DVec2::new((column as f64 + 0.5) * inv_w, v);
                    PixelBuffer::write_color(pixel, self.render_pixel(uv));
                }
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math3d::Camera;
    use crate::params::{CloudParameters, SceneParameters};

    fn clear_sky_settings() -> RenderSettings {
        RenderSettings {
            cloud: CloudParameters {
                scatter: 0.0,
                minimum_density: -1.0,
                ..CloudParameters::default()
            },
            scene: SceneParameters {
                sun_position: DVec3::new(4.0, 3.5, -1.0),
                sky_color: DVec3::new(0.2, 0.498, 1.0),
                ..SceneParameters::default()
            },
            ..RenderSettings::default()
        }
    }

    fn view(time: f64, noise: bool) -> ViewParameters {
        ViewParameters::from_camera(&Camera::default(), 64, 36, time, noise)
    }

    #[test]
    fn test_clear_sky_straight_up_matches_closed_form() {
        let settings = clear_sky_settings();
        let renderer = FrameRenderer::new(&settings, &view(3.0, false));
        let rgba = renderer.shade_ray(DVec3::ZERO, DVec3::Y, 0.0);

        let scene = &settings.scene;
        let sun_dot = 3.5 / (4.0_f64 * 4.0 + 3.5 * 3.5 + 1.0).sqrt();
        let exponent = scene.sun_size * 6.0 + (1.0 - scene.sun_size) * 80.0;
        let expected = scene.sky_color
            + scene.sun_color * scene.sun_intensity * sun_dot.powf(exponent)
            + DVec3::new(0.2, 0.08, 0.04) * 1.4 * sun_dot.powi(8);

        for i in 0..3 {
            assert!(
                (rgba[i] - expected[i]).abs() < 1e-12,
                "channel {}: {} vs {}",
                i,
                rgba[i],
                expected[i]
            );
        }
        assert_eq!(rgba[3], 1.0);
    }

    #[test]
    fn test_clear_sky_matches_sky_only_view() {
        let settings = clear_sky_settings();
        let sky_only = RenderSettings {
            debug_view: DebugView::SkyOnly,
            ..settings
        };
        let v = view(1.0, false);
        let a = FrameRenderer::new(&settings, &v);
        let b = FrameRenderer::new(&sky_only, &v);
        for uv in [DVec2::new(0.1, 0.2), DVec2::new(0.5, 0.5), DVec2::new(0.9, 0.95)] {
            let pa = a.render_pixel(uv);
            let pb = b.render_pixel(uv);
            for i in 0..4 {
                assert!((pa[i] - pb[i]).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_render_pixel_deterministic() {
        let settings = RenderSettings::default();
        let v = view(7.25, true);
        let a = FrameRenderer::new(&settings, &v);
        let b = FrameRenderer::new(&settings, &v);
        let uv = DVec2::new(0.37, 0.61);
        let pa = a.render_pixel(uv);
        let pb = b.render_pixel(uv);
        for i in 0..4 {
            assert_eq!(pa[i].to_bits(), pb[i].to_bits());
        }
    }

    #[test]
    fn test_cloud_mask_alpha_mode_is_binary() {
        let settings = RenderSettings {
            alpha_mode: AlphaMode::CloudMask,
            ..RenderSettings::default()
        };
        let renderer = FrameRenderer::new(&settings, &view(0.0, false));
        for i in 0..10 {
            let uv = DVec2::new(i as f64 / 10.0 + 0.05, 0.45);
            let alpha = renderer.render_pixel(uv)[3];
            assert!(alpha == 0.0 || alpha == 1.0);
        }
        let clear = FrameRenderer::new(
            &RenderSettings {
                alpha_mode: AlphaMode::CloudMask,
                ..clear_sky_settings()
            },
            &view(0.0, false),
        );
        assert_eq!(clear.render_pixel(DVec2::splat(0.5))[3], 0.0);
    }

    #[test]
    fn test_jitter_only_with_noise() {
        let uv = DVec2::new(0.25, 0.75);
        let off = FrameRenderer::new(&RenderSettings::default(), &view(2.0, false));
        assert_eq!(off.jitter(uv), 0.0);
        let on = FrameRenderer::new(&RenderSettings::default(), &view(2.0, true));
        let j = on.jitter(uv);
        assert!((0.0..1.0).contains(&j));
        assert_eq!(j, hash1d(0.25 + 0.75 * 50.0 + 2.0, 0.5453));
    }

    #[test]
    fn test_zero_sun_falls_back_to_up() {
        let mut settings = RenderSettings::default();
        settings.scene.sun_position = DVec3::ZERO;
        let renderer = FrameRenderer::new(&settings, &view(0.0, false));
        assert_eq!(renderer.light_dir(), DVec3::Y);
        let rgba = renderer.render_pixel(DVec2::splat(0.5));
        assert!(rgba.iter().all(|c| c.is_finite()));
    }

    #[test]
    fn test_debug_view_cycles_through_all() {
        let mut view = DebugView::Final;
        for _ in 0..DebugView::ALL.len() {
            view = view.next();
        }
        assert_eq!(view, DebugView::Final);
        assert_eq!(DebugView::Final.next(), DebugView::NearLayer);
        assert_eq!(AlphaMode::Opaque.toggled().toggled(), AlphaMode::Opaque);
    }

    #[test]
    fn test_static_frames_share_key() {
        let mut settings = RenderSettings::default();
        settings.cloud.shift_speed = 0.0;
        settings.cloud.animation_strength = 0.0;
        assert!(!is_animated(&settings, false));
        assert_eq!(
            FrameKey::new(&settings, &view(1.0, false)),
            FrameKey::new(&settings, &view(9.0, false))
        );
        assert!(is_animated(&settings, true));
        assert_ne!(
            FrameKey::new(&settings, &view(1.0, true)),
            FrameKey::new(&settings, &view(9.0, true))
        );
    }

    #[test]
    fn test_negative_turbulence_still_animates() {
        let mut settings = RenderSettings::default();
        settings.cloud.shift_speed = 0.0;
        settings.cloud.animation_strength = 0.0;
        settings.cloud.turbulence = -0.37;
        assert!(is_animated(&settings, false));

        let (early, late) = (view(1.0, false), view(1.5, false));
        assert_ne!(FrameKey::new(&settings, &early), FrameKey::new(&settings, &late));

        let a = FrameRenderer::new(&settings, &early);
        let b = FrameRenderer::new(&settings, &late);
        let changed = (0..36)
            .flat_map(|y| (0..64).map(move |x| (x, y)))
            .map(|(x, y)| DVec2::new((x as f64 + 0.5) / 64.0, (y as f64 + 0.5) / 36.0))
            .filter(|uv| a.render_pixel(*uv) != b.render_pixel(*uv))
            .count();
        assert!(changed > 0);
    }

    #[test]
    fn test_render_fills_buffer() {
        let settings = clear_sky_settings();
        let renderer = FrameRenderer::new(&settings, &view(0.0, false));
        let mut buffer = PixelBuffer::with_size(8, 4);
        renderer.render(&mut buffer);
        // Clear sky is blue-dominant everywhere
        for y in 0..4 {
            for x in 0..8 {
                let (r, _, b, a) = buffer.get_pixel_rgba(x, y).unwrap();
                assert!(b > r);
                assert_eq!(a, 255);
            }
        }
    }
}
