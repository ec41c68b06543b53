//! Render parameters, presets and validation
//!
//! [`Preset`] is the flat, user-editable JSON form. It is validated into an
//! immutable [`RenderSettings`] snapshot, which is all the renderer ever sees.

use glam::{DMat4, DVec3};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

use crate::density::{DensityField, MIN_SIZE};
use crate::march::MarchSettings;
use crate::math3d::Camera;
use crate::placement::{EnsembleSettings, MAX_INSTANCES};
use crate::render::{AlphaMode, DebugView};
use crate::sky::LayerBlend;

// Far layer derivation
const FAR_SIZE_SCALE: f64 = 0.5;
const FAR_COUNT_SCALE: u32 = 2;
const FAR_ANIMATION_SCALE: f64 = 0.25;
const FAR_SEED_OFFSET: f64 = 101.0;

/// Upper limits for march sample counts
pub const MAX_STEPS: u32 = 512;
pub const MAX_SHADOW_STEPS: u32 = 64;

// ============================================================================
// Errors
// ============================================================================

/// A parameter value the renderer refuses to run with
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must be finite, got {value}")]
    NonFinite { field: &'static str, value: f64 },

    #[error("cloud size must be > 0 on every axis, got {0:?}")]
    NonPositiveSize([f64; 3]),

    #[error("instance count must be in 1..={max}, got {count}", max = MAX_INSTANCES)]
    InstanceCount { count: u32 },

    #[error("{field} must be in 1..={max}, got {value}")]
    StepCount {
        field: &'static str,
        value: u32,
        max: u32,
    },

    #[error("{field} must be > 0, got {value}")]
    NonPositiveLength { field: &'static str, value: f64 },

    #[error("{field} must be >= 0, got {value}")]
    Negative { field: &'static str, value: f64 },

    #[error("sun size must be in [0, 1], got {0}")]
    SunSize(f64),

    #[error("sun position must not be the zero vector")]
    ZeroSunDirection,
}

/// Failure loading, saving or patching a preset
#[derive(Debug, thiserror::Error)]
pub enum PresetError {
    #[error("preset I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid preset JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid preset: {0}")]
    Invalid(#[from] ConfigError),

    #[error("preset patch must be a JSON object")]
    NotAnObject,

    #[error("invalid color '{0}', expected #rrggbb")]
    Color(String),
}

// ============================================================================
// Colors
// ============================================================================

/// An sRGB color stored as `#rrggbb` in presets
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HexColor(pub DVec3);

impl HexColor {
    pub const WHITE: HexColor = HexColor(DVec3::ONE);

    pub fn from_rgb8(r: u8, g: u8, b: u8) -> Self {
        Self(DVec3::new(r as f64, g as f64, b as f64) / 255.0)
    }

    pub fn to_rgb8(self) -> [u8; 3] {
        let c = (self.0.clamp(DVec3::ZERO, DVec3::ONE) * 255.0).round();
        [c.x as u8, c.y as u8, c.z as u8]
    }

    pub fn parse(text: &str) -> Result<Self, PresetError> {
        let hex = text.trim().trim_start_matches('#');
        if hex.len() != 6 || !hex.is_ascii() {
            return Err(PresetError::Color(text.to_string()));
        }
        let channel = |i: usize| {
            u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| PresetError::Color(text.to_string()))
        };
        Ok(Self::from_rgb8(channel(0)?, channel(2)?, channel(4)?))
    }
}

impl fmt::Display for HexColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [r, g, b] = self.to_rgb8();
        write!(f, "#{:02x}{:02x}{:02x}", r, g, b)
    }
}

impl TryFrom<String> for HexColor {
    type Error = PresetError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<HexColor> for String {
    fn from(color: HexColor) -> Self {
        color.to_string()
    }
}

// ============================================================================
// Validated parameter snapshots
// ============================================================================

/// Per-layer cloud controls, validated
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CloudParameters {
    pub seed: f64,
    pub instance_count: u32,
    /// Ellipsoid radii
    pub size: DVec3,
    pub minimum_density: f64,
    pub roughness: f64,
    pub scatter: f64,
    pub shape: f64,
    pub animation_speed: f64,
    pub animation_strength: f64,
    pub color: DVec3,
    pub steps: u32,
    pub shadow_steps: u32,
    pub march_length: f64,
    pub shadow_length: f64,
    pub shift_speed: f64,
    pub cloud_offset: f64,
    pub background_offset: f64,
    pub background_up_shift: f64,
    /// Rate at which the primary ray start slides through one step
    pub turbulence: f64,
}

impl CloudParameters {
    pub fn density_field(&self) -> DensityField {
        DensityField {
            scatter: self.scatter,
            roughness: self.roughness,
            minimum_density: self.minimum_density,
            animation_strength: self.animation_strength,
        }
    }

    pub fn near_ensemble(&self) -> EnsembleSettings {
        EnsembleSettings {
            seed: self.seed,
            instance_count: self.instance_count,
            size: self.size,
            shape: self.shape,
            shift_speed: self.shift_speed,
            animation_speed: self.animation_speed,
            animation_strength: self.animation_strength,
        }
    }

    /// The background layer: smaller, denser, slower and reseeded
    pub fn far_ensemble(&self) -> EnsembleSettings {
        EnsembleSettings {
            seed: self.seed + FAR_SEED_OFFSET,
            instance_count: self
                .instance_count
                .saturating_mul(FAR_COUNT_SCALE)
                .min(MAX_INSTANCES as u32),
            size: self.size * FAR_SIZE_SCALE,
            animation_speed: self.animation_speed * FAR_ANIMATION_SCALE,
            ..self.near_ensemble()
        }
    }

    pub fn march_settings(&self, sky_color: DVec3) -> MarchSettings {
        MarchSettings {
            steps: self.steps,
            shadow_steps: self.shadow_steps,
            march_length: self.march_length,
            shadow_length: self.shadow_length,
            cloud_color: self.color,
            sky_color,
        }
    }
}

impl Default for CloudParameters {
    fn default() -> Self {
        Self {
            seed: 83.0,
            instance_count: 24,
            size: DVec3::new(2.0, 1.0, 2.0),
            minimum_density: 0.0,
            roughness: 2.0,
            scatter: 2.2,
            shape: 0.5453,
            animation_speed: 1.0,
            animation_strength: 0.1,
            color: HexColor::from_rgb8(0xea, 0xbf, 0x6b).0,
            steps: 48,
            shadow_steps: 8,
            march_length: 16.0,
            shadow_length: 2.0,
            shift_speed: 1.0,
            cloud_offset: 0.0,
            background_offset: 16.0,
            background_up_shift: 2.0,
            turbulence: 0.0,
        }
    }
}

/// Sky and sun, validated
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneParameters {
    /// Direction toward the sun, normalized before use
    pub sun_position: DVec3,
    pub sun_intensity: f64,
    pub sun_size: f64,
    pub sun_color: DVec3,
    pub sky_color: DVec3,
    pub sky_fade_color: DVec3,
    pub sky_fade_factor: f64,
    pub sky_fade_shift: f64,
}

impl Default for SceneParameters {
    fn default() -> Self {
        Self {
            sun_position: DVec3::new(-1.2, 2.1, -1.0),
            sun_intensity: 0.6,
            sun_size: 0.5,
            sun_color: HexColor::from_rgb8(0xff, 0x99, 0x19).0,
            sky_color: HexColor::from_rgb8(0x33, 0x7f, 0xff).0,
            sky_fade_color: DVec3::ONE,
            sky_fade_factor: 1.0,
            sky_fade_shift: 0.2,
        }
    }
}

/// Everything the renderer needs besides the camera, immutable per frame
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RenderSettings {
    pub cloud: CloudParameters,
    pub scene: SceneParameters,
    pub debug_view: DebugView,
    pub alpha_mode: AlphaMode,
    pub blend: LayerBlend,
}

/// Camera and timing inputs for one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewParameters {
    pub inverse_projection: DMat4,
    /// Camera-to-world
    pub inverse_view: DMat4,
    pub camera_position: DVec3,
    /// World-space forward direction, used to push layers along the view axis
    pub camera_direction: DVec3,
    pub resolution: (u32, u32),
    /// Elapsed time in seconds
    pub time: f64,
    /// Per-pixel dither jitter
    pub noise: bool,
}

impl ViewParameters {
    pub fn from_camera(camera: &Camera, width: u32, height: u32, time: f64, noise: bool) -> Self {
        let aspect = width.max(1) as f64 / height.max(1) as f64;
        Self {
            inverse_projection: camera.projection_matrix(aspect).inverse(),
            inverse_view: camera.view_matrix().inverse(),
            camera_position: camera.position,
            camera_direction: camera.forward(),
            resolution: (width, height),
            time,
            noise,
        }
    }
}

// ============================================================================
// Preset
// ============================================================================

/// Flat, serializable dump of every tunable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preset {
    pub seed: f64,
    pub instance_count: u32,
    pub size: [f64; 3],
    pub minimum_density: f64,
    pub roughness: f64,
    pub scatter: f64,
    pub shape: f64,
    pub animation_speed: f64,
    pub animation_strength: f64,
    pub cloud_color: HexColor,
    pub steps: u32,
    pub shadow_steps: u32,
    pub march_length: f64,
    pub shadow_length: f64,
    pub shift_speed: f64,
    pub cloud_offset: f64,
    pub background_offset: f64,
    pub background_up_shift: f64,
    pub turbulence: f64,

    pub sun_position: [f64; 3],
    pub sun_intensity: f64,
    pub sun_size: f64,
    pub sun_color: HexColor,
    pub sky_color: HexColor,
    pub sky_fade_color: HexColor,
    pub sky_fade_factor: f64,
    pub sky_fade_shift: f64,

    pub camera_position: [f64; 3],
    pub camera_target: [f64; 3],
    pub fov: f64,
    pub noise: bool,
}

impl Default for Preset {
    fn default() -> Self {
        Self::from_parts(
            &CloudParameters::default(),
            &SceneParameters::default(),
            &Camera::default(),
        )
    }
}

/// Clamp to `[min, max]`, replacing NaN and infinities with `fallback`
fn clamp_or(value: f64, min: f64, max: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        fallback
    }
}

fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

impl Preset {
    pub fn from_parts(cloud: &CloudParameters, scene: &SceneParameters, camera: &Camera) -> Self {
        Self {
            seed: cloud.seed,
            instance_count: cloud.instance_count,
            size: cloud.size.to_array(),
            minimum_density: cloud.minimum_density,
            roughness: cloud.roughness,
            scatter: cloud.scatter,
            shape: cloud.shape,
            animation_speed: cloud.animation_speed,
            animation_strength: cloud.animation_strength,
            cloud_color: HexColor(cloud.color),
            steps: cloud.steps,
            shadow_steps: cloud.shadow_steps,
            march_length: cloud.march_length,
            shadow_length: cloud.shadow_length,
            shift_speed: cloud.shift_speed,
            cloud_offset: cloud.cloud_offset,
            background_offset: cloud.background_offset,
            background_up_shift: cloud.background_up_shift,
            turbulence: cloud.turbulence,
            sun_position: scene.sun_position.to_array(),
            sun_intensity: scene.sun_intensity,
            sun_size: scene.sun_size,
            sun_color: HexColor(scene.sun_color),
            sky_color: HexColor(scene.sky_color),
            sky_fade_color: HexColor(scene.sky_fade_color),
            sky_fade_factor: scene.sky_fade_factor,
            sky_fade_shift: scene.sky_fade_shift,
            camera_position: camera.position.to_array(),
            camera_target: camera.target.to_array(),
            fov: camera.fov_y,
            noise: false,
        }
    }

    pub fn camera(&self) -> Camera {
        Camera {
            position: DVec3::from_array(self.camera_position),
            target: DVec3::from_array(self.camera_target),
            fov_y: self.fov,
            ..Camera::default()
        }
    }

    pub fn set_camera(&mut self, camera: &Camera) {
        self.camera_position = camera.position.to_array();
        self.camera_target = camera.target.to_array();
        self.fov = camera.fov_y;
    }

    /// Check every field and build the renderer's snapshot
    pub fn validate(&self) -> Result<RenderSettings, ConfigError> {
        let finite = [
            ("seed", self.seed),
            ("size.x", self.size[0]),
            ("size.y", self.size[1]),
            ("size.z", self.size[2]),
            ("minimum_density", self.minimum_density),
            ("roughness", self.roughness),
            ("scatter", self.scatter),
            ("shape", self.shape),
            ("animation_speed", self.animation_speed),
            ("animation_strength", self.animation_strength),
            ("march_length", self.march_length),
            ("shadow_length", self.shadow_length),
            ("shift_speed", self.shift_speed),
            ("cloud_offset", self.cloud_offset),
            ("background_offset", self.background_offset),
            ("background_up_shift", self.background_up_shift),
            ("turbulence", self.turbulence),
            ("sun_position.x", self.sun_position[0]),
            ("sun_position.y", self.sun_position[1]),
            ("sun_position.z", self.sun_position[2]),
            ("sun_intensity", self.sun_intensity),
            ("sun_size", self.sun_size),
            ("sky_fade_factor", self.sky_fade_factor),
            ("sky_fade_shift", self.sky_fade_shift),
        ];
        for (field, value) in finite {
            if !value.is_finite() {
                return Err(ConfigError::NonFinite { field, value });
            }
        }

        if self.size.iter().any(|s| *s <= 0.0) {
            return Err(ConfigError::NonPositiveSize(self.size));
        }
        if self.instance_count == 0 || self.instance_count as usize > MAX_INSTANCES {
            return Err(ConfigError::InstanceCount {
                count: self.instance_count,
            });
        }
        if self.steps == 0 || self.steps > MAX_STEPS {
            return Err(ConfigError::StepCount {
                field: "steps",
                value: self.steps,
                max: MAX_STEPS,
            });
        }
        if self.shadow_steps == 0 || self.shadow_steps > MAX_SHADOW_STEPS {
            return Err(ConfigError::StepCount {
                field: "shadow_steps",
                value: self.shadow_steps,
                max: MAX_SHADOW_STEPS,
            });
        }
        for (field, value) in [
            ("march_length", self.march_length),
            ("shadow_length", self.shadow_length),
        ] {
            if value <= 0.0 {
                return Err(ConfigError::NonPositiveLength { field, value });
            }
        }
        // The density early-out bound needs the first two non-negative
        for (field, value) in [
            ("scatter", self.scatter),
            ("animation_strength", self.animation_strength),
            ("sun_intensity", self.sun_intensity),
            ("turbulence", self.turbulence),
        ] {
            if value < 0.0 {
                return Err(ConfigError::Negative { field, value });
            }
        }
        if !(0.0..=1.0).contains(&self.sun_size) {
            return Err(ConfigError::SunSize(self.sun_size));
        }
        let sun_position = DVec3::from_array(self.sun_position);
        if sun_position.length_squared() == 0.0 {
            return Err(ConfigError::ZeroSunDirection);
        }

        let cloud = CloudParameters {
            seed: self.seed,
            instance_count: self.instance_count,
            size: DVec3::from_array(self.size),
            minimum_density: self.minimum_density,
            roughness: self.roughness,
            scatter: self.scatter,
            shape: self.shape,
            animation_speed: self.animation_speed,
            animation_strength: self.animation_strength,
            color: self.cloud_color.0,
            steps: self.steps,
            shadow_steps: self.shadow_steps,
            march_length: self.march_length,
            shadow_length: self.shadow_length,
            shift_speed: self.shift_speed,
            cloud_offset: self.cloud_offset,
            background_offset: self.background_offset,
            background_up_shift: self.background_up_shift,
            turbulence: self.turbulence,
        };
        let scene = SceneParameters {
            sun_position,
            sun_intensity: self.sun_intensity,
            sun_size: self.sun_size,
            sun_color: self.sun_color.0,
            sky_color: self.sky_color.0,
            sky_fade_color: self.sky_fade_color.0,
            sky_fade_factor: self.sky_fade_factor,
            sky_fade_shift: self.sky_fade_shift,
        };
        Ok(RenderSettings {
            cloud,
            scene,
            ..RenderSettings::default()
        })
    }

    /// Nearest preset that passes [`Preset::validate`], using the tweak
    /// ranges. Non-finite values fall back to defaults.
    pub fn clamped(&self) -> Self {
        let d = Self::default();
        let clamp_size = |v: f64, fallback: f64| clamp_or(v, MIN_SIZE, 100.0, fallback);
        let mut sun_position = [
            finite_or(self.sun_position[0], d.sun_position[0]),
            finite_or(self.sun_position[1], d.sun_position[1]),
            finite_or(self.sun_position[2], d.sun_position[2]),
        ];
        if DVec3::from_array(sun_position).length_squared() == 0.0 {
            sun_position = d.sun_position;
        }

        Self {
            seed: clamp_or(self.seed, 1.0, 32000.0, d.seed),
            instance_count: self.instance_count.clamp(1, MAX_INSTANCES as u32),
            size: [
                clamp_size(self.size[0], d.size[0]),
                clamp_size(self.size[1], d.size[1]),
                clamp_size(self.size[2], d.size[2]),
            ],
            minimum_density: clamp_or(self.minimum_density, -5.0, 5.0, d.minimum_density),
            roughness: clamp_or(self.roughness, 0.0, 5.0, d.roughness),
            scatter: clamp_or(self.scatter, 0.0, 20.0, d.scatter),
            shape: clamp_or(self.shape, -5.0, 5.0, d.shape),
            animation_speed: clamp_or(self.animation_speed, 0.0, 5.0, d.animation_speed),
            animation_strength: clamp_or(self.animation_strength, 0.0, 5.0, d.animation_strength),
            cloud_color: self.cloud_color,
            steps: self.steps.clamp(1, MAX_STEPS),
            shadow_steps: self.shadow_steps.clamp(1, MAX_SHADOW_STEPS),
            march_length: clamp_or(self.march_length, 0.1, 200.0, d.march_length),
            shadow_length: clamp_or(self.shadow_length, 0.01, 50.0, d.shadow_length),
            shift_speed: clamp_or(self.shift_speed, -100.0, 100.0, d.shift_speed),
            cloud_offset: clamp_or(self.cloud_offset, -100.0, 100.0, d.cloud_offset),
            background_offset: clamp_or(self.background_offset, -100.0, 100.0, d.background_offset),
            background_up_shift: clamp_or(
                self.background_up_shift,
                -100.0,
                100.0,
                d.background_up_shift,
            ),
            turbulence: clamp_or(self.turbulence, 0.0, 10.0, d.turbulence),
            sun_position,
            sun_intensity: clamp_or(self.sun_intensity, 0.0, 1.0, d.sun_intensity),
            sun_size: clamp_or(self.sun_size, 0.0, 1.0, d.sun_size),
            sun_color: self.sun_color,
            sky_color: self.sky_color,
            sky_fade_color: self.sky_fade_color,
            sky_fade_factor: clamp_or(self.sky_fade_factor, 0.0, 10.0, d.sky_fade_factor),
            sky_fade_shift: clamp_or(self.sky_fade_shift, -4.0, 4.0, d.sky_fade_shift),
            camera_position: self.camera_position,
            camera_target: self.camera_target,
            fov: clamp_or(self.fov, 1.0, 170.0, d.fov),
            noise: self.noise,
        }
    }

    /// Overlay the fields present in a partial JSON object
    pub fn merge_patch(&self, patch: &serde_json::Value) -> Result<Self, PresetError> {
        let fields = patch.as_object().ok_or(PresetError::NotAnObject)?;
        let mut merged = serde_json::to_value(self)?;
        if let Some(target) = merged.as_object_mut() {
            for (key, value) in fields {
                if !target.contains_key(key) {
                    log::warn!("Ignoring unknown preset field '{}'", key);
                    continue;
                }
                target.insert(key.clone(), value.clone());
            }
        }
        Ok(serde_json::from_value(merged)?)
    }

    /// Save preset to a JSON file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), PresetError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Load preset from a JSON file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PresetError> {
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}
