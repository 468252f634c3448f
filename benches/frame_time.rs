//! CPU-side frame work: descriptor layout hashing, uniform packing and
//! submission assembly. None of these touch the GPU.

use ash::vk::{self, Handle};
use ash_editor_renderer::renderer::frame::assemble_submission;
use ash_editor_renderer::renderer::mipmap_channel::MergedBatch;
use ash_editor_renderer::vulkan::{LayoutBinding, LayoutSpec};
use ash_editor_renderer::prelude::*;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use glam::Vec3;

fn layout_hashing(c: &mut Criterion) {
    let mut group = c.benchmark_group("layout_hashing");

    for count in [2u32, 4, 8] {
        let bindings: Vec<LayoutBinding> = (0..count)
            .rev()
            .map(|binding| {
                LayoutBinding::new(
                    binding,
                    vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                    vk::ShaderStageFlags::FRAGMENT,
                )
            })
            .collect();

        group.bench_with_input(BenchmarkId::new("normalize_and_hash", count), &bindings, |b, bindings| {
            b.iter(|| LayoutSpec::new(black_box(bindings.clone())).structural_hash())
        });
    }

    group.finish();
}

fn uniform_packing(c: &mut Criterion) {
    let mut group = c.benchmark_group("uniform_packing");

    let mut scene = SceneState::default();
    scene.active_lights = 4;
    for (i, light) in scene.lights.iter_mut().enumerate() {
        light.euler = Vec3::new(0.3 * i as f32, 0.1, 0.0);
    }

    group.bench_function("frame_input_from_scene", |b| {
        b.iter(|| FrameInput::from_scene(black_box(&scene), black_box(16.0 / 9.0)))
    });

    group.bench_function("camera_orbit_step", |b| {
        let mut scene = scene.clone();
        b.iter(|| {
            scene.camera.yaw += 0.01;
            scene.object_euler.y += 0.01;
            FrameInput::from_scene(&scene, 16.0 / 9.0)
        })
    });

    group.finish();
}

fn submission_assembly(c: &mut Criterion) {
    let mut group = c.benchmark_group("submission_assembly");
    let viewport = vk::CommandBuffer::from_raw(1);
    let editor = vk::CommandBuffer::from_raw(2);
    let batch = MergedBatch {
        command_buffer: vk::CommandBuffer::from_raw(3),
        textures: vec!["albedo".to_string(), "normal".to_string()],
    };

    group.bench_function("two_buffers", |b| {
        b.iter(|| assemble_submission(black_box(viewport), black_box(editor), None))
    });

    group.bench_function("with_mip_batch", |b| {
        b.iter(|| assemble_submission(black_box(viewport), black_box(editor), Some(&batch)))
    });

    group.finish();
}

criterion_group!(benches, layout_hashing, uniform_packing, submission_assembly);
criterion_main!(benches);
