use std::sync::Arc;
use std::time::Instant;

use color_eyre::Result;
use glam::{Vec2, Vec4};
use image::{DynamicImage, Rgba, RgbaImage};
use winit::application::ApplicationHandler;
use winit::event::{ElementState, KeyEvent, StartCause, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowId};

use crate::renderer::batch::quad::Quad;
use crate::renderer::batch::TexturedQuad;
use crate::renderer::config::RenderConfig;
use crate::renderer::resources::texture::Texture;
use crate::renderer::Renderer;

const STATS_LOG_INTERVAL_FRAMES: u64 = 120;

/// Demo application: a camera drifting over a field of colored and textured
/// quads, with a static overlay on top.
pub struct App {
    window: Option<Arc<Window>>,
    renderer: Option<Renderer>,
    checkerboard: Option<Arc<Texture>>,

    start_time: Instant,
    frame_count: u64,
    close_requested: bool,
}

impl App {
    pub fn run() -> Result<()> {
        let event_loop = EventLoop::new()?;
        let mut app = Self {
            window: None,
            renderer: None,
            checkerboard: None,
            start_time: Instant::now(),
            frame_count: 0,
            close_requested: false,
        };
        event_loop.run_app(&mut app)?;
        Ok(())
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = Arc::new(event_loop.create_window(
            Window::default_attributes().with_title("quadra"),
        )?);
        let renderer = Renderer::new(window.clone(), RenderConfig::default())?;

        let checkerboard = renderer.create_texture(
            &checkerboard_image(64, 8),
            "Checkerboard texture",
        )?;

        self.window = Some(window);
        self.renderer = Some(renderer);
        self.checkerboard = Some(checkerboard);
        Ok(())
    }

    fn draw_frame(&mut self) -> Result<()> {
        let Some(renderer) = self.renderer.as_mut() else {
            return Ok(());
        };
        let t = self.start_time.elapsed().as_secs_f32();

        renderer.camera().set_position(Vec2::new(t.sin() * 2.0, t.cos() * 2.0));
        renderer.camera().set_zoom(24.0 + (t * 0.5).sin() * 8.0);

        // Scene: a grid of quads, every other one textured, submitted as one
        // mixed-texture array.
        let mut grid = Vec::with_capacity(21 * 21);
        for y in -10..=10 {
            for x in -10..=10 {
                let position = Vec2::new(x as f32 * 1.2, y as f32 * 1.2);
                let size = Vec2::splat(1.0);
                if (x + y) % 2 == 0 {
                    let color = Vec4::new(
                        (x as f32 / 10.0 + 1.0) * 0.5,
                        (y as f32 / 10.0 + 1.0) * 0.5,
                        (t.sin() + 1.0) * 0.5,
                        1.0,
                    );
                    grid.push(TexturedQuad {
                        quad: Quad { position, size, color },
                        texture: None,
                    });
                } else {
                    grid.push(TexturedQuad {
                        quad: Quad { position, size, color: Vec4::ONE },
                        texture: self.checkerboard.clone(),
                    });
                }
            }
        }
        let scene = renderer.scene();
        scene.draw_quad_array(&grid);

        // A highlight strip under the camera's path, one texture for the row.
        let strip: Vec<Quad> = (-10..=10)
            .map(|x| Quad {
                position: Vec2::new(x as f32 * 1.2, 13.0),
                size: Vec2::new(1.0, 0.4),
                color: Vec4::new(1.0, 0.8, 0.2, 1.0),
            })
            .collect();
        scene.draw_quads(&strip, self.checkerboard.as_ref());

        // Overlay: translucent panel in the corner of the world
        renderer.ui().draw_quad(
            Vec2::new(-14.0, -14.0),
            Vec2::new(6.0, 3.0),
            Vec4::new(0.0, 0.0, 0.0, 0.6),
            None,
        );

        renderer.draw()?;

        self.frame_count += 1;
        if self.frame_count % STATS_LOG_INTERVAL_FRAMES == 0 {
            let stats = renderer.stats();
            log::info!(
                "frame {}: scene {} quads / {} draws ({} truncated), ui {} quads / {} draws, camera {:?} zoom {:.1}",
                self.frame_count,
                stats.scene.drawn_quads,
                stats.scene.draw_calls,
                stats.scene.truncated_quads,
                stats.ui.drawn_quads,
                stats.ui.draw_calls,
                renderer.camera().get_position(),
                renderer.camera().get_zoom(),
            );
        }
        Ok(())
    }
}

impl ApplicationHandler for App {
    fn new_events(&mut self, _event_loop: &ActiveEventLoop, _cause: StartCause) {}

    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.init(event_loop) {
                log::error!("renderer init failed: {e:?}");
                event_loop.exit();
            }
        }
    }

    fn window_event(
        &mut self,
        _event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        let Some(window) = self.window.as_ref() else {
            return;
        };
        if window_id != window.id() {
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                self.close_requested = true;
            }
            WindowEvent::Resized(_new_size) => {
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.request_resize();
                }
            }
            WindowEvent::ScaleFactorChanged { .. } => {
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.request_resize();
                }
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.draw_frame() {
                    log::error!("draw failed: {e:?}");
                    self.close_requested = true;
                }
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        logical_key: key,
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => {
                if let Key::Named(NamedKey::Escape) = key.as_ref() {
                    self.close_requested = true;
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.close_requested {
            event_loop.exit();
            return;
        }
        if let Some(window) = self.window.as_ref() {
            window.request_redraw();
        }
    }
}

fn checkerboard_image(size: u32, cells: u32) -> DynamicImage {
    let cell = (size / cells).max(1);
    let img = RgbaImage::from_fn(size, size, |x, y| {
        if ((x / cell) + (y / cell)) % 2 == 0 {
            Rgba([0xf0, 0xf0, 0xf0, 0xff])
        } else {
            Rgba([0x30, 0x30, 0x30, 0xff])
        }
    });
    DynamicImage::ImageRgba8(img)
}
