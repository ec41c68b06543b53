//! SDL2 window and the software frame buffer it presents

mod pixel_buffer;

pub use pixel_buffer::{quantize, PixelBuffer};

use sdl2::event::Event;
use sdl2::keyboard::Keycode;
use sdl2::pixels::PixelFormatEnum;
use sdl2::render::{Canvas, Texture, TextureCreator};
use sdl2::video::{Window, WindowContext};
use sdl2::EventPump;

pub const DEFAULT_WIDTH: u32 = 640;
pub const DEFAULT_HEIGHT: u32 = 360;

/// Window the downscaled cloud render is stretched over
pub struct Display {
    canvas: Canvas<Window>,
    event_pump: EventPump,
    width: u32,
    height: u32,
}

/// Streaming texture the render buffer is uploaded into. Its size may be
/// smaller than the window; SDL scales it up on copy.
pub struct RenderTarget<'a> {
    texture: Texture<'a>,
    width: u32,
    height: u32,
}

#[derive(Debug, Clone)]
pub enum InputEvent {
    Quit,
    KeyDown(Keycode),
}

impl Display {
    /// Open a `width x height` window. The returned texture creator outlives
    /// the window borrow and builds the [`RenderTarget`]. Turning vsync off
    /// lets the render timer measure raw ray-march cost.
    pub fn with_options(
        title: &str,
        width: u32,
        height: u32,
        vsync: bool,
    ) -> Result<(Self, TextureCreator<WindowContext>), String> {
        let sdl_context = sdl2::init()?;
        let video_subsystem = sdl_context.video()?;

        let window = video_subsystem
            .window(title, width, height)
            .position_centered()
            .build()
            .map_err(|e| e.to_string())?;

        let builder = window.into_canvas().accelerated();
        let builder = if vsync { builder.present_vsync() } else { builder };
        let canvas = builder.build().map_err(|e| e.to_string())?;

        let texture_creator = canvas.texture_creator();
        let event_pump = sdl_context.event_pump()?;

        Ok((
            Self {
                canvas,
                event_pump,
                width,
                height,
            },
            texture_creator,
        ))
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn set_title(&mut self, title: &str) -> Result<(), String> {
        self.canvas
            .window_mut()
            .set_title(title)
            .map_err(|e| e.to_string())
    }

    /// Show the target texture stretched over the window
    pub fn present(&mut self, target: &RenderTarget) -> Result<(), String> {
        self.canvas.copy(&target.texture, None, None)?;
        self.canvas.present();
        Ok(())
    }

    /// Drain pending SDL events, keeping only quit requests and key presses
    pub fn poll_events(&mut self) -> Vec<InputEvent> {
        self.event_pump
            .poll_iter()
            .filter_map(|event| match event {
                Event::Quit { .. } => Some(InputEvent::Quit),
                // Repeats are kept so a held arrow key keeps turning the camera
                Event::KeyDown {
                    keycode: Some(key), ..
                } => Some(InputEvent::KeyDown(key)),
                _ => None,
            })
            .collect()
    }
}

impl<'a> RenderTarget<'a> {
    /// Target at the internal render resolution, usually the window size
    /// divided by the render scale
    pub fn with_size(
        texture_creator: &'a TextureCreator<WindowContext>,
        width: u32,
        height: u32,
    ) -> Result<Self, String> {
        let texture = texture_creator
            .create_texture_streaming(PixelFormatEnum::RGBA8888, width, height)
            .map_err(|e| e.to_string())?;
        Ok(Self {
            texture,
            width,
            height,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Upload `buffer` into the target texture
    pub fn upload(&mut self, buffer: &PixelBuffer) -> Result<(), String> {
        if buffer.width() != self.width || buffer.height() != self.height {
            return Err(format!(
                "buffer is {}x{}, render target is {}x{}",
                buffer.width(),
                buffer.height(),
                self.width,
                self.height
            ));
        }
        self.texture
            .update(None, buffer.as_bytes(), (buffer.width() * 4) as usize)
            .map_err(|e| e.to_string())
    }
}
