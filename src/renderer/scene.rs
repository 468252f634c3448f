use glam::{Mat4, Vec3};

use super::uniforms::{DirLight, LightBufferData, MatrixBufferData, PerObjectData};
use crate::config::MAX_DIR_LIGHTS;

/// Perspective camera described by position and yaw/pitch (radians).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub yaw: f32,
    pub pitch: f32,
    pub fov_y_degrees: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    /// At `(0, 0, 3)` looking down `-Z`.
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 3.0),
            yaw: std::f32::consts::PI,
            pitch: 0.0,
            fov_y_degrees: 70.0,
            near: 0.1,
            far: 300.0,
        }
    }
}

impl Camera {
    pub fn forward(&self) -> Vec3 {
        Vec3::new(
            self.yaw.sin() * self.pitch.cos(),
            self.pitch.sin(),
            self.yaw.cos() * self.pitch.cos(),
        )
    }

    pub fn right(&self) -> Vec3 {
        self.forward().cross(Vec3::Y).normalize_or_zero()
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_to_rh(self.position, self.forward(), Vec3::Y)
    }

    /// Right-handed perspective with Y flipped for Vulkan clip space.
    pub fn projection(&self, aspect: f32) -> Mat4 {
        let mut proj = Mat4::perspective_rh(
            self.fov_y_degrees.to_radians(),
            aspect.max(f32::EPSILON),
            self.near,
            self.far,
        );
        proj.y_axis.y *= -1.0;
        proj
    }
}

/// Editor-controlled directional light.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LightControl {
    /// Rotation applied to `+X`, radians, XYZ order.
    pub euler: Vec3,
    pub ambient: f32,
}

impl Default for LightControl {
    fn default() -> Self {
        Self {
            euler: Vec3::ZERO,
            ambient: 0.1,
        }
    }
}

/// Everything the editor can change between frames.
#[derive(Clone, Debug)]
pub struct SceneState {
    pub camera: Camera,
    pub lights: [LightControl; MAX_DIR_LIGHTS],
    pub active_lights: usize,
    pub object_euler: Vec3,
    pub selected_model: usize,
}

impl Default for SceneState {
    fn default() -> Self {
        Self {
            camera: Camera::default(),
            lights: [LightControl::default(); MAX_DIR_LIGHTS],
            active_lights: 1,
            object_euler: Vec3::ZERO,
            selected_model: 0,
        }
    }
}

impl SceneState {
    pub fn active_lights(&self) -> &[LightControl] {
        &self.lights[..self.active_lights.min(MAX_DIR_LIGHTS)]
    }
}

/// Uniform payloads for one frame, packed from a [`SceneState`].
#[derive(Clone, Copy, Debug)]
pub struct FrameInput {
    pub matrices: MatrixBufferData,
    pub lights: LightBufferData,
    pub object: PerObjectData,
    pub selected_model: usize,
}

impl FrameInput {
    pub fn from_scene(scene: &SceneState, aspect: f32) -> Self {
        let lights: Vec<DirLight> = scene
            .active_lights()
            .iter()
            .map(|l| DirLight::from_euler(l.euler, l.ambient))
            .collect();
        Self {
            matrices: MatrixBufferData::new(scene.camera.view(), scene.camera.projection(aspect)),
            lights: LightBufferData::from_lights(&lights),
            object: PerObjectData::from_euler(scene.object_euler),
            selected_model: scene.selected_model,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn default_camera_looks_down_negative_z() {
        let camera = Camera::default();
        assert!((camera.forward() - Vec3::NEG_Z).length() < 1e-6);
    }

    #[test]
    fn origin_projects_to_screen_center() {
        let scene = SceneState::default();
        let input = FrameInput::from_scene(&scene, 16.0 / 9.0);
        let clip = input.matrices.view_proj * Vec4::new(0.0, 0.0, 0.0, 1.0);
        let ndc = clip / clip.w;
        assert!(ndc.x.abs() < 1e-5 && ndc.y.abs() < 1e-5);
        assert!(ndc.z > 0.0 && ndc.z < 1.0);
    }

    #[test]
    fn projection_flips_y() {
        let camera = Camera::default();
        let up = camera.projection(1.0) * camera.view() * Vec4::new(0.0, 0.5, 0.0, 1.0);
        assert!(up.y / up.w < 0.0);
    }

    #[test]
    fn only_active_lights_are_packed() {
        let mut scene = SceneState::default();
        scene.active_lights = 2;
        scene.lights[1].ambient = 0.4;
        let input = FrameInput::from_scene(&scene, 1.0);
        assert_eq!(input.lights.num_active_lights, 2);
        assert_eq!(input.lights.dir_lights[1].ambient, 0.4);
        assert_eq!(input.lights.dir_lights[2], DirLight::default());
    }
}
