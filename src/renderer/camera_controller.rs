use std::collections::HashSet;

use glam::Vec3;
use winit::event::{ElementState, KeyEvent};
use winit::keyboard::{KeyCode, PhysicalKey};

use super::scene::Camera;

/// First-person controls for a [`Camera`].
pub struct CameraController {
    keys_pressed: HashSet<KeyCode>,
    mouse_delta: (f32, f32),
    pub speed: f32,
    pub mouse_sensitivity: f32,
}

impl Default for CameraController {
    fn default() -> Self {
        Self {
            keys_pressed: HashSet::new(),
            mouse_delta: (0.0, 0.0),
            speed: 5.0,
            mouse_sensitivity: 0.01,
        }
    }
}

impl CameraController {
    pub fn handle_key_event(&mut self, event: &KeyEvent) {
        if let PhysicalKey::Code(code) = event.physical_key {
            self.set_key(code, event.state == ElementState::Pressed);
        }
    }

    pub fn set_key(&mut self, code: KeyCode, pressed: bool) {
        if pressed {
            self.keys_pressed.insert(code);
        } else {
            self.keys_pressed.remove(&code);
        }
    }

    pub fn handle_mouse_motion(&mut self, delta: (f32, f32)) {
        self.mouse_delta.0 += delta.0;
        self.mouse_delta.1 += delta.1;
    }

    /// Applies held keys and accumulated mouse motion to `camera`.
    pub fn update(&mut self, camera: &mut Camera, delta_time: f32) {
        let mut direction = Vec3::ZERO;
        for &key in &self.keys_pressed {
            match key {
                KeyCode::KeyW => direction.z += 1.0,
                KeyCode::KeyS => direction.z -= 1.0,
                KeyCode::KeyD => direction.x += 1.0,
                KeyCode::KeyA => direction.x -= 1.0,
                KeyCode::Space => direction.y += 1.0,
                KeyCode::ShiftLeft | KeyCode::ShiftRight => direction.y -= 1.0,
                _ => {}
            }
        }

        if direction != Vec3::ZERO {
            let direction = direction.normalize();
            let movement =
                camera.forward() * direction.z + camera.right() * direction.x + Vec3::Y * direction.y;
            camera.position += movement * self.speed * delta_time;
        }

        let (dx, dy) = std::mem::take(&mut self.mouse_delta);
        if dx != 0.0 || dy != 0.0 {
            camera.yaw = (camera.yaw - dx * self.mouse_sensitivity).rem_euclid(std::f32::consts::TAU);
            let max_pitch = std::f32::consts::FRAC_PI_2 - 0.1;
            camera.pitch = (camera.pitch - dy * self.mouse_sensitivity).clamp(-max_pitch, max_pitch);
        }
    }
}
