use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use sdl2::keyboard::Keycode;

use cloudscape::display::{Display, InputEvent, PixelBuffer, RenderTarget, DEFAULT_HEIGHT, DEFAULT_WIDTH};
use cloudscape::math3d::Camera;
use cloudscape::remote::ParameterFeed;
use cloudscape::render::FrameKey;
use cloudscape::util::FrameTimer;
use cloudscape::{AlphaMode, DebugView, FrameRenderer, Preset, RenderSettings, ViewParameters};

const YAW_STEP: f64 = 5.0;
const PITCH_STEP: f64 = 3.0;
const FPS_LOG_INTERVAL: Duration = Duration::from_secs(5);
const HEADLESS_FRAME_TIME: f64 = 1.0 / 60.0;

#[derive(Parser, Debug)]
#[command(name = "cloudscape", version, about = "Ray-marched volumetric cloudscape")]
struct Args {
    /// Window width
    #[arg(short, long, default_value_t = DEFAULT_WIDTH)]
    width: u32,

    /// Window height
    #[arg(long, default_value_t = DEFAULT_HEIGHT)]
    height: u32,

    /// Window size as WxH, overrides --width/--height (e.g. 1280x720)
    #[arg(short, long, value_parser = parse_resolution)]
    resolution: Option<(u32, u32)>,

    /// Disable VSync for uncapped framerate
    #[arg(long)]
    no_vsync: bool,

    /// Preset file, loaded at startup if present and used by S/L
    #[arg(short, long, default_value = "preset.json")]
    preset: PathBuf,

    /// MQTT broker host for live parameter patches
    #[arg(long)]
    mqtt: Option<String>,

    /// MQTT topic carrying JSON parameter patches
    #[arg(long, default_value = ParameterFeed::default_topic())]
    topic: String,

    /// Render this many frames without a window, log timings and exit
    #[arg(long)]
    headless: Option<u32>,

    /// Internal render resolution divisor; SDL scales the result up
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u32).range(1..=16))]
    scale: u32,
}

fn parse_resolution(s: &str) -> Result<(u32, u32), String> {
    let (w, h) = s
        .split_once('x')
        .ok_or_else(|| format!("expected WxH, got '{}'", s))?;
    let w = w.parse::<u32>().map_err(|e| e.to_string())?;
    let h = h.parse::<u32>().map_err(|e| e.to_string())?;
    if w == 0 || h == 0 {
        return Err("resolution must be non-zero".to_string());
    }
    Ok((w, h))
}

/// Live, mutable application state. The renderer only ever sees the
/// immutable snapshots built from it.
struct AppState {
    preset: Preset,
    settings: RenderSettings,
    camera: Camera,
    debug_view: DebugView,
    alpha_mode: AlphaMode,
    noise: bool,
    paused: bool,
    time: f64,
}

impl AppState {
    fn from_preset(preset: Preset) -> Result<Self> {
        let (preset, settings) = match preset.validate() {
            Ok(settings) => (preset, settings),
            Err(e) => {
                log::warn!("Preset rejected ({}), clamping to valid ranges", e);
                let clamped = preset.clamped();
                let settings = clamped.validate().context("clamped preset is still invalid")?;
                (clamped, settings)
            }
        };
        Ok(Self {
            camera: preset.camera(),
            noise: preset.noise,
            preset,
            settings,
            debug_view: DebugView::default(),
            alpha_mode: AlphaMode::default(),
            paused: false,
            time: 0.0,
        })
    }

    fn snapshot(&self) -> RenderSettings {
        RenderSettings {
            debug_view: self.debug_view,
            alpha_mode: self.alpha_mode,
            ..self.settings
        }
    }

    fn view(&self, width: u32, height: u32) -> ViewParameters {
        ViewParameters::from_camera(&self.camera, width, height, self.time, self.noise)
    }

    /// Merge a remote patch; rejected patches leave the state untouched
    fn apply_patch(&mut self, patch: &serde_json::Value) {
        let merged = match self.preset.merge_patch(patch) {
            Ok(merged) => merged,
            Err(e) => {
                log::warn!("Rejected parameter patch: {}", e);
                return;
            }
        };
        let clamped = merged.clamped();
        if clamped != merged {
            log::warn!("Parameter patch clamped to valid ranges");
        }
        match clamped.validate() {
            Ok(settings) => {
                self.camera = clamped.camera();
                self.noise = clamped.noise;
                self.preset = clamped;
                self.settings = settings;
                log::debug!("Applied parameter patch {}", patch);
            }
            Err(e) => log::warn!("Rejected parameter patch: {}", e),
        }
    }

    fn save(&mut self, path: &Path) {
        self.preset.set_camera(&self.camera);
        self.preset.noise = self.noise;
        match self.preset.save(path) {
            Ok(()) => log::info!("Preset saved to {}", path.display()),
            Err(e) => log::error!("Failed to save preset: {}", e),
        }
    }

    fn load(&mut self, path: &Path) {
        let loaded = Preset::load(path).map_err(anyhow::Error::from).and_then(Self::from_preset);
        match loaded {
            Ok(state) => {
                *self = Self {
                    debug_view: self.debug_view,
                    alpha_mode: self.alpha_mode,
                    paused: self.paused,
                    time: self.time,
                    ..state
                };
                log::info!("Preset loaded from {}", path.display());
            }
            Err(e) => log::error!("Failed to load preset: {:#}", e),
        }
    }
}

fn initial_preset(path: &Path) -> Preset {
    if !path.exists() {
        log::info!("No preset at {}, using defaults", path.display());
        return Preset::default();
    }
    match Preset::load(path) {
        Ok(preset) => {
            log::info!("Loaded preset from {}", path.display());
            preset
        }
        Err(e) => {
            log::warn!("Ignoring preset {}: {}", path.display(), e);
            Preset::default()
        }
    }
}

fn run_headless(state: &mut AppState, width: u32, height: u32, frames: u32) {
    let mut buffer = PixelBuffer::with_size(width, height);
    let mut timer = FrameTimer::new(frames.max(1) as usize);
    log::info!("Headless: rendering {} frames at {}x{}", frames, width, height);

    for frame in 0..frames {
        let settings = state.snapshot();
        let view = state.view(width, height);
        let start = Instant::now();
        FrameRenderer::new(&settings, &view).render(&mut buffer);
        let elapsed = start.elapsed().as_secs_f64();
        timer.record(elapsed);
        log::debug!("Frame {} rendered in {:.2} ms", frame, elapsed * 1000.0);
        state.time += HEADLESS_FRAME_TIME;
    }
    log::info!("Headless: {}", timer.summary());
}

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let args = Args::parse();
    let (width, height) = args.resolution.unwrap_or((args.width, args.height));
    let render_width = (width / args.scale).max(1);
    let render_height = (height / args.scale).max(1);

    let mut state = AppState::from_preset(initial_preset(&args.preset))?;

    if let Some(frames) = args.headless {
        run_headless(&mut state, render_width, render_height, frames);
        return Ok(());
    }

    let feed = match &args.mqtt {
        Some(host) => match ParameterFeed::connect(host, &args.topic) {
            Ok(feed) => Some(feed),
            Err(e) => {
                log::warn!("{}", e);
                None
            }
        },
        None => None,
    };

    let (mut display, texture_creator) =
        Display::with_options("cloudscape", width, height, !args.no_vsync).map_err(anyhow::Error::msg)?;
    let mut target = RenderTarget::with_size(&texture_creator, render_width, render_height)
        .map_err(anyhow::Error::msg)?;
    let mut buffer = PixelBuffer::with_size(render_width, render_height);

    log::info!(
        "Window {}x{}, rendering at {}x{}, VSync {}",
        display.width(),
        display.height(),
        target.width(),
        target.height(),
        if args.no_vsync { "off" } else { "on" }
    );
    log::info!("Controls:");
    log::info!("  Space      - Pause/resume time");
    log::info!("  Arrows     - Turn camera");
    log::info!("  N          - Toggle dither noise");
    log::info!("  V          - Cycle debug view");
    log::info!("  M          - Toggle alpha mode");
    log::info!("  S / L      - Save / load preset");
    log::info!("  F          - Log frame timing");
    log::info!("  Escape     - Quit");

    let mut frame_timer = FrameTimer::new(60);
    let mut render_timer = FrameTimer::new(60);
    let mut last_key: Option<FrameKey> = None;
    let mut last_fps_log = Instant::now();

    'main: loop {
        let dt = frame_timer.tick();

        for event in display.poll_events() {
            let key = match event {
                InputEvent::Quit => break 'main,
                InputEvent::KeyDown(key) => key,
            };
            match key {
                Keycode::Escape => break 'main,
                Keycode::Space => {
                    state.paused = !state.paused;
                    log::info!("Time {}", if state.paused { "paused" } else { "running" });
                },
                Keycode::N => {
                    state.noise = !state.noise;
                    log::info!("Noise {}", if state.noise { "on" } else { "off" });
                },
                Keycode::V => {
                    state.debug_view = state.debug_view.next();
                    log::info!("Debug view: {}", state.debug_view.name());
                    let title = format!("cloudscape - {}", state.debug_view.name());
                    if let Err(e) = display.set_title(&title) {
                        log::warn!("Failed to set title: {}", e);
                    }
                },
                Keycode::M => {
                    state.alpha_mode = state.alpha_mode.toggled();
                    log::info!("Alpha mode: {:?}", state.alpha_mode);
                },
                Keycode::Left => state.camera.turn(-YAW_STEP.to_radians(), 0.0),
                Keycode::Right => state.camera.turn(YAW_STEP.to_radians(), 0.0),
                Keycode::Up => state.camera.turn(0.0, PITCH_STEP.to_radians()),
                Keycode::Down => state.camera.turn(0.0, -PITCH_STEP.to_radians()),
                Keycode::S => state.save(&args.preset),
                Keycode::L => state.load(&args.preset),
                Keycode::F => {
                    log::info!("Frame: {}", frame_timer.summary());
                    log::info!("Render: {}", render_timer.summary());
                },
                _ => {},
            }
        }

        if let Some(feed) = &feed {
            for patch in feed.poll() {
                state.apply_patch(&patch);
            }
        }

        if !state.paused {
            state.time += dt;
        }

        let settings = state.snapshot();
        let view = state.view(render_width, render_height);
        let key = FrameKey::new(&settings, &view);
        if last_key != Some(key) {
            let start = Instant::now();
            FrameRenderer::new(&settings, &view).render(&mut buffer);
            render_timer.record(start.elapsed().as_secs_f64());
            target.upload(&buffer).map_err(anyhow::Error::msg)?;
            last_key = Some(key);
        }

        display.present(&target).map_err(anyhow::Error::msg)?;

        if last_fps_log.elapsed() >= FPS_LOG_INTERVAL {
            log::debug!("Render: {}", render_timer.summary());
            last_fps_log = Instant::now();
        }
    }

    Ok(())
}
