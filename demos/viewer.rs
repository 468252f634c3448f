//! Editor viewer.
//!
//! Renders the selected model into the viewport, runs the gamma pass and
//! composites the result into the window.
//!
//! Controls: WASD/Space/Shift move, right mouse drag looks around,
//! `Tab` cycles models, `L` cycles the active light count, arrow keys
//! rotate the object, `G` toggles the gamma pass. Drop an image or a
//! `.gltf`/`.glb` file onto the window to load it in the background.

use std::path::Path;
use std::time::Instant;

use ash_editor_renderer::config::MAX_DIR_LIGHTS;
use ash_editor_renderer::prelude::*;
use ash_editor_renderer::renderer::{AssetJob, CameraController, Priority};
use glam::Vec3;
use winit::{
    application::ApplicationHandler,
    event::{DeviceEvent, DeviceId, ElementState, MouseButton, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

struct App {
    // Dropped before the window it presents to.
    renderer: Option<Renderer>,
    window: Option<Window>,
    scene: SceneState,
    controller: CameraController,
    looking: bool,
    gamma_enabled: bool,
    last_frame: Instant,
}

impl Default for App {
    fn default() -> Self {
        Self {
            renderer: None,
            window: None,
            scene: SceneState::default(),
            controller: CameraController::default(),
            looking: false,
            gamma_enabled: true,
            last_frame: Instant::now(),
        }
    }
}

impl App {
    fn handle_key(&mut self, code: KeyCode) {
        let Some(renderer) = &mut self.renderer else {
            return;
        };
        match code {
            KeyCode::Tab => {
                let count = renderer.model_count().max(1);
                self.scene.selected_model = (self.scene.selected_model + 1) % count;
                log::info!("Selected model {}", self.scene.selected_model);
            }
            KeyCode::KeyL => {
                self.scene.active_lights = self.scene.active_lights % MAX_DIR_LIGHTS + 1;
                for (i, light) in self.scene.lights.iter_mut().enumerate() {
                    light.euler = Vec3::new(0.0, i as f32 * 1.2, -0.6);
                }
                log::info!("{} active lights", self.scene.active_lights);
            }
            KeyCode::ArrowLeft => self.scene.object_euler.y -= 0.1,
            KeyCode::ArrowRight => self.scene.object_euler.y += 0.1,
            KeyCode::ArrowUp => self.scene.object_euler.x -= 0.1,
            KeyCode::ArrowDown => self.scene.object_euler.x += 0.1,
            KeyCode::KeyG => {
                self.gamma_enabled = !self.gamma_enabled;
                if let Err(e) = renderer.set_effect_active(0, self.gamma_enabled) {
                    log::warn!("Cannot toggle gamma pass: {e}");
                }
            }
            _ => {}
        }
    }

    fn load_dropped(&mut self, path: &Path) {
        let Some(renderer) = &self.renderer else {
            return;
        };
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        let job = match extension.as_deref() {
            Some("gltf" | "glb") => AssetJob::Gltf {
                path: path.to_path_buf(),
            },
            Some("png" | "jpg" | "jpeg") => AssetJob::TextureFile {
                name: path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("dropped")
                    .to_string(),
                path: path.to_path_buf(),
                kind: TextureKind::Diffuse,
            },
            _ => {
                log::warn!("Unsupported file dropped: {}", path.display());
                return;
            }
        };
        if let Some(id) = renderer.submit_asset(job, Priority::High) {
            log::info!("Queued {} as job {id}", path.display());
        }
    }

    fn redraw(&mut self) {
        let now = Instant::now();
        let delta = (now - self.last_frame).as_secs_f32();
        self.last_frame = now;
        self.controller.update(&mut self.scene.camera, delta);

        let Some(renderer) = &mut self.renderer else {
            return;
        };
        if let Err(e) = renderer.poll_assets() {
            log::error!("Asset integration failed: {e}");
        }
        match renderer.draw_frame(&self.scene) {
            Ok(FrameOutcome::Presented) => {
                let frames = renderer.frame_count();
                if frames % 600 == 0 {
                    log::debug!("{frames} frames, {:?}", renderer.stats());
                }
            }
            Ok(FrameOutcome::Skipped(reason)) => log::trace!("Frame skipped: {reason:?}"),
            Err(e) if e.is_recoverable() => log::warn!("Recoverable frame error: {e}"),
            Err(e) => log::error!("Render error: {e}"),
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let window_attrs = Window::default_attributes()
            .with_title("Ash Editor")
            .with_inner_size(winit::dpi::LogicalSize::new(1280, 720));

        let window = match event_loop.create_window(window_attrs) {
            Ok(window) => window,
            Err(e) => {
                log::error!("Failed to create window: {e}");
                event_loop.exit();
                return;
            }
        };
        let size = window.inner_size();
        let surface_provider = WindowSurfaceProvider::new(&window, size.width, size.height);

        match Renderer::new(&surface_provider, RendererConfig::from_env()) {
            Ok(renderer) => {
                log::info!("Renderer initialized: {:?}", renderer.swapchain_summary());
                self.renderer = Some(renderer);
                self.window = Some(window);
            }
            Err(e) => {
                log::error!("Failed to create renderer: {e}");
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                self.renderer = None;
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(renderer) = &mut self.renderer {
                    renderer.resize(size.width, size.height);
                }
            }
            WindowEvent::KeyboardInput { event, .. } => {
                self.controller.handle_key_event(&event);
                if event.state == ElementState::Pressed && !event.repeat {
                    if let PhysicalKey::Code(code) = event.physical_key {
                        self.handle_key(code);
                    }
                }
            }
            WindowEvent::MouseInput {
                state,
                button: MouseButton::Right,
                ..
            } => {
                self.looking = state == ElementState::Pressed;
            }
            WindowEvent::DroppedFile(path) => self.load_dropped(&path),
            WindowEvent::RedrawRequested => {
                self.redraw();
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }

    fn device_event(&mut self, _event_loop: &ActiveEventLoop, _id: DeviceId, event: DeviceEvent) {
        if let DeviceEvent::MouseMotion { delta } = event {
            if self.looking {
                self.controller
                    .handle_mouse_motion((delta.0 as f32, delta.1 as f32));
            }
        }
    }
}

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::default();
    event_loop.run_app(&mut app)?;
    Ok(())
}
