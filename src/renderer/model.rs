use std::sync::Arc;

use ash::vk;
use bytemuck::{Pod, Zeroable};

use crate::vulkan::allocator::{AllocatedBuffer, Allocator, MemoryLocation};
use crate::vulkan::pipeline::VertexInput;
use crate::vulkan::upload::UploadContext;
use crate::{RendererError, Result};

/// Interleaved vertex at binding 0.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub uv: [f32; 2],
    pub normal: [f32; 3],
    pub tangent: [f32; 4],
}

impl Vertex {
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: std::mem::size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    pub fn attribute_descriptions() -> Vec<vk::VertexInputAttributeDescription> {
        let attribute = |location, format, offset| vk::VertexInputAttributeDescription {
            location,
            binding: 0,
            format,
            offset,
        };
        vec![
            attribute(0, vk::Format::R32G32B32_SFLOAT, 0),
            attribute(1, vk::Format::R32G32_SFLOAT, 12),
            attribute(2, vk::Format::R32G32B32_SFLOAT, 20),
            attribute(3, vk::Format::R32G32B32A32_SFLOAT, 32),
        ]
    }

    pub fn input() -> VertexInput {
        VertexInput::Interleaved {
            binding: Self::binding_description(),
            attributes: Self::attribute_descriptions(),
        }
    }
}

/// Geometry of one submesh, already decoded.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub material: Option<String>,
}

impl MeshData {
    /// The unit triangle used when nothing else is loaded.
    pub fn triangle() -> Self {
        let vertex = |x: f32, y: f32, u: f32, v: f32| Vertex {
            position: [x, y, 0.0],
            uv: [u, v],
            normal: [0.0, 0.0, 1.0],
            tangent: [1.0, 0.0, 0.0, 1.0],
        };
        Self {
            vertices: vec![
                vertex(0.0, 0.5, 0.5, 0.0),
                vertex(-0.5, -0.5, 0.0, 1.0),
                vertex(0.5, -0.5, 1.0, 1.0),
            ],
            indices: vec![0, 1, 2],
            material: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.vertices.is_empty() || self.indices.is_empty() {
            return Err(RendererError::AssetLoad {
                name: "mesh".into(),
                reason: "mesh has no geometry".into(),
            });
        }
        let count = self.vertices.len() as u32;
        if let Some(bad) = self.indices.iter().find(|&&i| i >= count) {
            return Err(RendererError::AssetLoad {
                name: "mesh".into(),
                reason: format!("index {bad} out of range for {count} vertices"),
            });
        }
        Ok(())
    }
}

/// Device-local vertex and index buffers of one submesh.
pub struct Mesh {
    vertex_buffer: AllocatedBuffer,
    index_buffer: AllocatedBuffer,
    index_count: u32,
    pub material: Option<String>,
}

impl Mesh {
    pub fn upload(allocator: &Arc<Allocator>, upload: &UploadContext, data: &MeshData) -> Result<Self> {
        data.validate()?;
        let vertex_buffer = upload_buffer(
            allocator,
            upload,
            bytemuck::cast_slice(&data.vertices),
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )?;
        let index_buffer = upload_buffer(
            allocator,
            upload,
            bytemuck::cast_slice(&data.indices),
            vk::BufferUsageFlags::INDEX_BUFFER,
        )?;
        Ok(Self {
            vertex_buffer,
            index_buffer,
            index_count: data.indices.len() as u32,
            material: data.material.clone(),
        })
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn draw(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        unsafe {
            device.cmd_bind_vertex_buffers(cmd, 0, &[self.vertex_buffer.handle()], &[0]);
            device.cmd_bind_index_buffer(cmd, self.index_buffer.handle(), 0, vk::IndexType::UINT32);
            device.cmd_draw_indexed(cmd, self.index_count, 1, 0, 0, 0);
        }
    }
}

/// Copies `bytes` into a new device-local buffer through a staging buffer.
fn upload_buffer(
    allocator: &Arc<Allocator>,
    upload: &UploadContext,
    bytes: &[u8],
    usage: vk::BufferUsageFlags,
) -> Result<AllocatedBuffer> {
    let staging = allocator.create_staging_buffer(bytes)?;
    let buffer = allocator.create_buffer(
        bytes.len() as vk::DeviceSize,
        usage | vk::BufferUsageFlags::TRANSFER_DST,
        MemoryLocation::GpuOnly,
    )?;
    let size = bytes.len() as vk::DeviceSize;
    upload.immediate_submit(|device, cmd| unsafe {
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        device.cmd_copy_buffer(cmd, staging.handle(), buffer.handle(), &[region]);
    })?;
    Ok(buffer)
}

/// A named sequence of meshes.
pub struct Model {
    pub name: String,
    pub meshes: Vec<Mesh>,
}

impl Model {
    pub fn upload(
        allocator: &Arc<Allocator>,
        upload: &UploadContext,
        name: &str,
        meshes: &[MeshData],
    ) -> Result<Self> {
        let meshes = meshes
            .iter()
            .map(|data| Mesh::upload(allocator, upload, data))
            .collect::<Result<Vec<_>>>()
            .map_err(|e| match e {
                RendererError::AssetLoad { reason, .. } => RendererError::AssetLoad {
                    name: name.to_string(),
                    reason,
                },
                other => other,
            })?;
        Ok(Self {
            name: name.to_string(),
            meshes,
        })
    }

    /// Issues one indexed draw per mesh. `bind_material` runs before each draw.
    pub fn draw<F>(&self, device: &ash::Device, cmd: vk::CommandBuffer, mut bind_material: F)
    where
        F: FnMut(Option<&str>),
    {
        for mesh in &self.meshes {
            bind_material(mesh.material.as_deref());
            mesh.draw(device, cmd);
        }
    }
}

/// Ordered list of models; the index is what the editor selects.
#[derive(Default)]
pub struct ModelManager<M = Model> {
    models: Vec<M>,
}

impl<M> ModelManager<M> {
    pub fn new() -> Self {
        Self { models: Vec::new() }
    }

    /// Appends a model and returns its index.
    pub fn push(&mut self, model: M) -> usize {
        self.models.push(model);
        self.models.len() - 1
    }

    pub fn get(&self, index: usize) -> Option<&M> {
        self.models.get(index)
    }

    /// Model at `index`, or the first model when the index is out of range.
    pub fn selected(&self, index: usize) -> Option<&M> {
        self.models.get(index).or_else(|| self.models.first())
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &M> {
        self.models.iter()
    }

    pub fn clear(&mut self) {
        self.models.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_layout_matches_attributes() {
        assert_eq!(std::mem::size_of::<Vertex>(), 48);
        let attributes = Vertex::attribute_descriptions();
        assert_eq!(attributes.len(), 4);
        assert_eq!(attributes[1].offset, std::mem::offset_of!(Vertex, uv) as u32);
        assert_eq!(attributes[2].offset, std::mem::offset_of!(Vertex, normal) as u32);
        assert_eq!(attributes[3].offset, std::mem::offset_of!(Vertex, tangent) as u32);
        assert_eq!(Vertex::binding_description().stride, 48);
    }

    #[test]
    fn triangle_is_valid() {
        let triangle = MeshData::triangle();
        triangle.validate().unwrap();
        assert_eq!(triangle.vertices[0].position, [0.0, 0.5, 0.0]);
        assert_eq!(triangle.indices, vec![0, 1, 2]);
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let mut mesh = MeshData::triangle();
        mesh.indices.push(3);
        assert!(matches!(mesh.validate(), Err(RendererError::AssetLoad { .. })));
        assert!(MeshData::default().validate().is_err());
    }

    #[test]
    fn selection_falls_back_to_first_model() {
        let mut models = ModelManager::new();
        assert!(models.selected(0).is_none());
        models.push("cube");
        models.push("suzanne");
        assert_eq!(models.selected(1), Some(&"suzanne"));
        assert_eq!(models.selected(7), Some(&"cube"));
    }
}
