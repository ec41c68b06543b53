//! Instance Placement & Cyclic Shift
//!
//! Every cloud instance is derived from its 1-based index and the layer seed.
//! Instances scroll along [`SHIFT_AXIS`], wrapping every `2 * SKY_CUTOFF`
//! units. Near the wrap boundary an instance's inverse size is inflated by
//! `1 / tanh(..)` so it shrinks to nothing before it teleports, and each wrap
//! re-keys its hash so a respawn never repeats the previous pass.

use glam::DVec3;

use crate::density::{inverse_size, DensityField, DENSITY_THRESHOLD};
use crate::math3d::{glsl_mod, mix};
use crate::noise::{animation_pulse, hash1d, hash3d};

/// Capacity of the per-sample skip buffer, and the hard cap on instances
pub const MAX_INSTANCES: usize = 128;

/// Distance from the field center to the wrap boundary
pub const SKY_CUTOFF: f64 = 25.0;

/// Scroll direction
pub const SHIFT_AXIS: DVec3 = DVec3::X;

/// Volume instances are scattered across, centered on the field origin
pub const BOUNDING_BOX: DVec3 = DVec3::new(50.0, 4.0, 50.0);

/// Slowest instance scrolls at this fraction of the global shift speed
pub const MIN_SHIFT_FACTOR: f64 = 0.5;

/// Spread of per-instance phase offsets along the scroll axis
pub const PHASE_SCALE: f64 = 1000.0;

/// Hash key increment per completed wrap
pub const WRAP_REHASH: f64 = 13.213;

/// Transition zone width as a multiple of the instance size along the axis
pub const TRANSITION_FACTOR: f64 = 2.0;

const PHASE_SEED_OFFSET: f64 = 37.2;
const SHAPE_SEED_OFFSET: f64 = 5.1;
const ANIMATION_SEED_OFFSET: f64 = 71.3;
const ANIMATION_PHASE_SCALE: f64 = 10.0;

// Floor for fade_in * fade_out, keeps the inverse size finite at the boundary
const MIN_FADE: f64 = 1e-6;

/// Position of an instance within its wrap cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CyclicShift {
    /// Distance travelled in the current cycle, in [0, 2 * cutoff)
    pub wrapped: f64,
    /// Number of completed cycles
    pub wrap_count: f64,
}

impl CyclicShift {
    pub fn new(raw: f64, cutoff: f64) -> Self {
        let period = 2.0 * cutoff;
        Self {
            wrapped: glsl_mod(raw, period),
            wrap_count: (raw / period).floor(),
        }
    }

    /// Signed displacement from the field center along the axis
    #[inline]
    pub fn displacement(&self, cutoff: f64) -> f64 {
        self.wrapped - cutoff
    }
}

/// Inverse-size multiplier near the wrap boundary: `1 / (fade_in * fade_out)`,
/// where both fades are `tanh` ramps over the transition zone.
///
/// Equals ~1 in the middle of the cycle and grows without bound towards
/// either end.
pub fn transition_scale(wrapped: f64, size: DVec3, cutoff: f64) -> f64 {
    let zone = (size * TRANSITION_FACTOR).dot(SHIFT_AXIS).max(f64::MIN_POSITIVE);
    let fade_in = (wrapped / zone).tanh();
    let fade_out = ((2.0 * cutoff - wrapped) / zone).tanh();
    1.0 / (fade_in * fade_out).max(MIN_FADE)
}

/// Per-layer inputs to instance placement
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnsembleSettings {
    pub seed: f64,
    pub instance_count: u32,
    pub size: DVec3,
    pub shape: f64,
    pub shift_speed: f64,
    pub animation_speed: f64,
    pub animation_strength: f64,
}

/// A placed cloud instance for one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CloudInstance {
    /// 1-based index
    pub index: u32,
    /// Index re-keyed by the wrap counter
    pub effective_hash: f64,
    pub shift: CyclicShift,
    pub speed: f64,
    pub phase: f64,
    /// World-space center (field origin relative)
    pub center: DVec3,
    /// Inverse radii including the transition scale
    pub inv_size: DVec3,
    /// Shape seed for this instance's noise
    pub shape: f64,
    /// Animation pulse at this frame's time
    pub pulse: f64,
}

impl CloudInstance {
    /// Place instance `index` (1-based) at `time`
    pub fn place(index: u32, settings: &EnsembleSettings, time: f64) -> Self {
        let c = f64::from(index);
        let s = settings.seed;

        let speed = mix(
            MIN_SHIFT_FACTOR * settings.shift_speed,
            settings.shift_speed,
            hash1d(c, s).abs(),
        );
        let phase = hash1d(c, s + PHASE_SEED_OFFSET) * PHASE_SCALE;
        let shift = CyclicShift::new(speed * time + phase, SKY_CUTOFF);

        let effective_hash = c + shift.wrap_count * WRAP_REHASH;
        let offset = hash3d(effective_hash, s) * BOUNDING_BOX - BOUNDING_BOX / 2.0;
        let center = offset + SHIFT_AXIS * shift.displacement(SKY_CUTOFF);

        let scale = transition_scale(shift.wrapped, settings.size, SKY_CUTOFF);
        let inv_size = inverse_size(settings.size) * scale;

        let shape = settings.shape + hash1d(effective_hash, s + SHAPE_SEED_OFFSET);
        let anim_phase = hash1d(effective_hash, s + ANIMATION_SEED_OFFSET) * ANIMATION_PHASE_SCALE;
        let pulse = animation_pulse(
            time + anim_phase,
            settings.animation_speed,
            settings.animation_strength,
        );

        Self {
            index,
            effective_hash,
            shift,
            speed,
            phase,
            center,
            inv_size,
            shape,
            pulse,
        }
    }

    #[inline]
    pub fn local(&self, position: DVec3) -> DVec3 {
        position - self.center
    }

    #[inline]
    pub fn can_skip(&self, position: DVec3, field: &DensityField) -> bool {
        field.can_skip(self.local(position), self.inv_size)
    }

    #[inline]
    pub fn density(&self, position: DVec3, field: &DensityField) -> f64 {
        field.density(self.local(position), self.inv_size, self.shape, self.pulse)
    }
}

/// Which instances the bound test excluded at one sample position
#[derive(Debug, Clone, Copy)]
pub struct SkipMask {
    flags: [bool; MAX_INSTANCES],
    len: usize,
}

impl SkipMask {
    pub fn new() -> Self {
        Self {
            flags: [false; MAX_INSTANCES],
            len: 0,
        }
    }

    /// Recompute flags for `position`
    pub fn evaluate(&mut self, ensemble: &CloudEnsemble, position: DVec3) {
        self.len = ensemble.instances.len();
        for (flag, instance) in self.flags.iter_mut().zip(&ensemble.instances) {
            *flag = instance.can_skip(position, &ensemble.field);
        }
    }

    #[inline]
    pub fn is_skipped(&self, slot: usize) -> bool {
        slot < self.len && self.flags[slot]
    }
}

impl Default for SkipMask {
    fn default() -> Self {
        Self::new()
    }
}

/// All instances of one layer, placed for one frame
#[derive(Debug, Clone)]
pub struct CloudEnsemble {
    instances: Vec<CloudInstance>,
    field: DensityField,
}

impl CloudEnsemble {
    /// Place every instance of a layer. Counts above [`MAX_INSTANCES`] are
    /// clamped.
    pub fn new(settings: &EnsembleSettings, field: DensityField, time: f64) -> Self {
        let count = (settings.instance_count as usize).min(MAX_INSTANCES);
        if count < settings.instance_count as usize {
            log::warn!(
                "instance count {} exceeds capacity, clamped to {}",
                settings.instance_count,
                MAX_INSTANCES
            );
        }
        let instances = (1..=count as u32)
            .map(|index| CloudInstance::place(index, settings, time))
            .collect();
        Self { instances, field }
    }

    #[inline]
    pub fn instances(&self) -> &[CloudInstance] {
        &self.instances
    }

    #[inline]
    pub fn field(&self) -> &DensityField {
        &self.field
    }

    /// Governing density at `position`: the maximum over non-skipped
    /// instances. Overlapping instances do not stack.
    pub fn sample(&self, position: DVec3, mask: &mut SkipMask) -> f64 {
        mask.evaluate(self, position);
        let mut max_density = 0.0_f64;
        for (slot, instance) in self.instances.iter().enumerate() {
            if mask.is_skipped(slot) {
                continue;
            }
            max_density = max_density.max(instance.density(position, &self.field));
        }
        max_density
    }
}

/// True when a density sample is thick enough to shade
#[inline]
pub fn is_visible(density: f64) -> bool {
    density > DENSITY_THRESHOLD
}
