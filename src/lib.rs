//! cloudscape: a CPU ray-marched volumetric cloudscape
//!
//! Clouds are ellipsoids perturbed by fBm noise. Each layer is an ensemble of
//! up to [`placement::MAX_INSTANCES`] instances that scroll, wrap and breathe,
//! all derived from one seed. Every pixel is a pure function of its screen
//! coordinate and an immutable per-frame snapshot:
//!
//! ```text
//! Preset --validate--> RenderSettings --+
//! Camera + time -----> ViewParameters --+--> FrameRenderer --> PixelBuffer
//! ```
//!
//! Leaf-first: [`noise`] → [`density`] → [`placement`] → [`march`] →
//! [`sky`] → [`render`].

pub mod density;
pub mod display;
pub mod march;
pub mod math3d;
pub mod noise;
pub mod params;
pub mod placement;
pub mod remote;
pub mod render;
pub mod sky;
pub mod util;

pub use params::{ConfigError, Preset, PresetError, RenderSettings, ViewParameters};
pub use render::{AlphaMode, DebugView, FrameRenderer};
