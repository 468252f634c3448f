use bytemuck::{Pod, Zeroable};
use glam::{EulerRot, Mat4, Quat, Vec3};

use crate::config::MAX_DIR_LIGHTS;

/// Set 0, binding 0.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct MatrixBufferData {
    pub view: Mat4,
    pub proj: Mat4,
    pub view_proj: Mat4,
    pub inv_view_proj: Mat4,
}

impl MatrixBufferData {
    pub fn new(view: Mat4, proj: Mat4) -> Self {
        let view_proj = proj * view;
        Self {
            view,
            proj,
            view_proj,
            inv_view_proj: view_proj.inverse(),
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct DirLight {
    pub direction: [f32; 4],
    pub color: [f32; 4],
    pub ambient: f32,
    pub _pad: [f32; 3],
}

impl DirLight {
    /// White light pointing along `+X` rotated by `euler` (radians, XYZ order).
    pub fn from_euler(euler: Vec3, ambient: f32) -> Self {
        let direction = light_direction(euler);
        Self {
            direction: [direction.x, direction.y, direction.z, 0.0],
            color: [1.0, 1.0, 1.0, 1.0],
            ambient,
            _pad: [0.0; 3],
        }
    }
}

/// Set 0, binding 1. Matches the std140 layout of the lighting shader.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct LightBufferData {
    pub num_active_lights: u32,
    pub _pad: [u32; 3],
    pub dir_lights: [DirLight; MAX_DIR_LIGHTS],
}

impl LightBufferData {
    /// Packs up to [`MAX_DIR_LIGHTS`] lights; extra entries are ignored.
    pub fn from_lights(lights: &[DirLight]) -> Self {
        let mut data = Self::zeroed();
        let count = lights.len().min(MAX_DIR_LIGHTS);
        data.dir_lights[..count].copy_from_slice(&lights[..count]);
        data.num_active_lights = count as u32;
        data
    }
}

/// Set 1, binding 0 (dynamic).
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct PerObjectData {
    pub world: Mat4,
}

impl PerObjectData {
    pub fn from_euler(euler: Vec3) -> Self {
        Self {
            world: Mat4::from_quat(euler_quat(euler)),
        }
    }
}

pub fn euler_quat(euler: Vec3) -> Quat {
    Quat::from_euler(EulerRot::XYZ, euler.x, euler.y, euler.z)
}

pub fn light_direction(euler: Vec3) -> Vec3 {
    euler_quat(euler) * Vec3::X
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn gpu_struct_sizes_match_shader_layout() {
        assert_eq!(std::mem::size_of::<MatrixBufferData>(), 256);
        assert_eq!(std::mem::size_of::<DirLight>(), 48);
        assert_eq!(std::mem::size_of::<LightBufferData>(), 16 + 48 * MAX_DIR_LIGHTS);
        assert_eq!(std::mem::size_of::<PerObjectData>(), 64);
    }

    #[test]
    fn zero_euler_points_along_x() {
        let dir = light_direction(Vec3::ZERO);
        assert!((dir - Vec3::X).length() < 1e-6);
    }

    #[test]
    fn yaw_rotates_light_direction() {
        let dir = light_direction(Vec3::new(0.0, 0.0, FRAC_PI_2));
        assert!((dir - Vec3::Y).length() < 1e-5);
    }

    #[test]
    fn light_count_is_clamped() {
        let lights = vec![DirLight::from_euler(Vec3::ZERO, 0.1); MAX_DIR_LIGHTS + 3];
        let data = LightBufferData::from_lights(&lights);
        assert_eq!(data.num_active_lights as usize, MAX_DIR_LIGHTS);
        assert_eq!(data.dir_lights[0].ambient, 0.1);
    }

    #[test]
    fn inverse_view_proj_round_trips() {
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 3.0), Vec3::ZERO, Vec3::Y);
        let proj = Mat4::perspective_rh(1.2, 16.0 / 9.0, 0.1, 300.0);
        let data = MatrixBufferData::new(view, proj);
        let identity = data.view_proj * data.inv_view_proj;
        assert!(identity.abs_diff_eq(Mat4::IDENTITY, 1e-4));
    }
}
