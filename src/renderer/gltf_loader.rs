use std::path::{Path, PathBuf};

use rayon::prelude::*;

use super::material::MaterialDesc;
use super::model::{MeshData, Vertex};
use super::texture::TextureKind;
use crate::{RendererError, Result};

/// External image referenced by a glTF material.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextureRef {
    pub name: String,
    pub path: PathBuf,
    pub kind: TextureKind,
}

/// CPU-side contents of a glTF file.
#[derive(Debug, Default)]
pub struct GltfScene {
    pub meshes: Vec<MeshData>,
    pub materials: Vec<MaterialDesc>,
    pub textures: Vec<TextureRef>,
}

fn asset_error(path: &Path, reason: impl ToString) -> RendererError {
    RendererError::AssetLoad {
        name: path.display().to_string(),
        reason: reason.to_string(),
    }
}

/// Reads every triangle primitive of every mesh plus the materials they use.
///
/// Only URI image sources are followed; embedded images fall back to defaults.
pub fn load_gltf(path: &Path) -> Result<GltfScene> {
    let gltf::Gltf { document, blob } =
        gltf::Gltf::open(path).map_err(|e| asset_error(path, e))?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    let buffers =
        gltf::import_buffers(&document, Some(base), blob).map_err(|e| asset_error(path, e))?;

    let model_name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("model")
        .to_string();

    let mut scene = GltfScene::default();
    for material in document.materials() {
        let Some(index) = material.index() else {
            continue;
        };
        let mut desc = MaterialDesc::new(material_name(&model_name, index));
        let pbr = material.pbr_metallic_roughness();
        desc.albedo = pbr
            .base_color_texture()
            .and_then(|info| texture_ref(base, info.texture(), TextureKind::Diffuse))
            .map(|t| scene.push_texture(t));
        desc.normal = material
            .normal_texture()
            .and_then(|info| texture_ref(base, info.texture(), TextureKind::Normal))
            .map(|t| scene.push_texture(t));
        desc.roughness = pbr
            .metallic_roughness_texture()
            .and_then(|info| texture_ref(base, info.texture(), TextureKind::Roughness))
            .map(|t| scene.push_texture(t));
        scene.materials.push(desc);
    }

    for mesh in document.meshes() {
        for primitive in mesh.primitives() {
            if primitive.mode() != gltf::mesh::Mode::Triangles {
                log::warn!(
                    "Skipping non-triangle primitive in mesh {:?} of {}",
                    mesh.name(),
                    path.display()
                );
                continue;
            }
            let reader = primitive.reader(|buffer| Some(&buffers[buffer.index()].0[..]));
            let Some(positions) = reader.read_positions() else {
                continue;
            };
            let positions: Vec<[f32; 3]> = positions.collect();
            let normals: Vec<[f32; 3]> = reader
                .read_normals()
                .map(|n| n.collect())
                .unwrap_or_default();
            let uvs: Vec<[f32; 2]> = reader
                .read_tex_coords(0)
                .map(|t| t.into_f32().collect())
                .unwrap_or_default();
            let tangents: Vec<[f32; 4]> = reader
                .read_tangents()
                .map(|t| t.collect())
                .unwrap_or_default();

            let vertices = build_vertices(&positions, &normals, &uvs, &tangents);
            let indices: Vec<u32> = match reader.read_indices() {
                Some(indices) => indices.into_u32().collect(),
                None => (0..vertices.len() as u32).collect(),
            };

            scene.meshes.push(MeshData {
                vertices,
                indices,
                material: primitive
                    .material()
                    .index()
                    .map(|i| material_name(&model_name, i)),
            });
        }
    }

    if scene.meshes.is_empty() {
        return Err(asset_error(path, "no triangle meshes"));
    }
    log::info!(
        "Parsed {}: {} meshes, {} materials, {} textures",
        path.display(),
        scene.meshes.len(),
        scene.materials.len(),
        scene.textures.len()
    );
    Ok(scene)
}

impl GltfScene {
    fn push_texture(&mut self, texture: TextureRef) -> String {
        let name = texture.name.clone();
        if !self.textures.iter().any(|t| t.name == name) {
            self.textures.push(texture);
        }
        name
    }
}

fn material_name(model: &str, index: usize) -> String {
    format!("{model}#{index}")
}

fn texture_ref(base: &Path, texture: gltf::Texture<'_>, kind: TextureKind) -> Option<TextureRef> {
    match texture.source().source() {
        gltf::image::Source::Uri { uri, .. } if !uri.starts_with("data:") => {
            let path = base.join(uri);
            Some(TextureRef {
                name: format!("{}:{}", path.display(), kind.name()),
                path,
                kind,
            })
        }
        _ => None,
    }
}

/// Interleaves attribute streams; missing streams default per vertex.
pub fn build_vertices(
    positions: &[[f32; 3]],
    normals: &[[f32; 3]],
    uvs: &[[f32; 2]],
    tangents: &[[f32; 4]],
) -> Vec<Vertex> {
    positions
        .par_iter()
        .enumerate()
        .map(|(i, &position)| Vertex {
            position,
            uv: uvs.get(i).copied().unwrap_or([0.0, 0.0]),
            normal: normals.get(i).copied().unwrap_or([0.0, 0.0, 1.0]),
            tangent: tangents.get(i).copied().unwrap_or([0.0; 4]),
        })
        .collect()
}
