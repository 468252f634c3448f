use std::sync::Arc;

use ash::vk;

use super::material::{MaterialDesc, MaterialLibrary};
use super::mipmap_channel::{DeviceBatchRecorder, MipmapChannel};
use super::model::{MeshData, Model, ModelManager};
use super::pipeline_cache::PipelineCache;
use super::texture::{PixelData, Texture, TextureKind, TextureUploader};
use super::texture_library::TextureLibrary;
use super::worker::GpuAssetLoader;
use crate::config::RendererConfig;
use crate::vulkan::allocator::Allocator;
use crate::vulkan::descriptor_allocator::{DescriptorAllocator, DevicePoolBackend};
use crate::vulkan::descriptor_layout::{DescriptorLayoutCache, DeviceLayoutFactory};
use crate::vulkan::device::VulkanDevice;
use crate::vulkan::upload::UploadContext;
use crate::{RendererError, Result};

pub fn create_linear_sampler(device: &ash::Device) -> Result<vk::Sampler> {
    let info = vk::SamplerCreateInfo::default()
        .mag_filter(vk::Filter::LINEAR)
        .min_filter(vk::Filter::LINEAR)
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
        .address_mode_u(vk::SamplerAddressMode::REPEAT)
        .address_mode_v(vk::SamplerAddressMode::REPEAT)
        .address_mode_w(vk::SamplerAddressMode::REPEAT)
        .min_lod(0.0)
        .max_lod(vk::LOD_CLAMP_NONE)
        .border_color(vk::BorderColor::INT_OPAQUE_BLACK);
    unsafe { device.create_sampler(&info, None) }
        .map_err(|e| RendererError::VulkanError(format!("Failed to create sampler: {e}")))
}

/// Root owner of device-lifetime resources.
///
/// Fields drop in declaration order: libraries first, then descriptor pools and
/// layouts, then the pipeline cache, upload context and finally the allocator.
pub struct ResourceManager {
    pub materials: MaterialLibrary,
    pub models: ModelManager,
    pub textures: TextureLibrary,
    /// Sets that live as long as the device: frame slots and materials.
    pub static_descriptors: DescriptorAllocator,
    /// Sets rebuilt with the swapchain: post-process inputs and the overlay.
    pub swapchain_descriptors: DescriptorAllocator,
    pub layouts: DescriptorLayoutCache,
    pub pipeline_cache: PipelineCache,
    pub mipmaps: Arc<MipmapChannel>,
    uploader: TextureUploader,
    upload: Arc<UploadContext>,
    sampler: vk::Sampler,
    allocator: Arc<Allocator>,
    device: Arc<ash::Device>,
}

impl ResourceManager {
    pub fn new(device: &VulkanDevice, config: &RendererConfig) -> Result<Self> {
        let handle = Arc::clone(&device.device);
        let allocator = Arc::new(Allocator::new(device)?);
        let upload = Arc::new(UploadContext::new(
            Arc::clone(&handle),
            Arc::clone(&device.upload_queue),
        )?);
        let sampler = create_linear_sampler(&handle)?;
        let recorder = DeviceBatchRecorder::new(Arc::clone(&handle), device.queue_families.graphics)?;

        let mut resources = Self {
            materials: MaterialLibrary::new(sampler),
            models: ModelManager::new(),
            textures: TextureLibrary::new(),
            static_descriptors: DescriptorAllocator::new(
                DevicePoolBackend::new(Arc::clone(&handle)),
                config.pool_ratios.clone(),
                config.pool_chunk_size,
            ),
            swapchain_descriptors: DescriptorAllocator::new(
                DevicePoolBackend::new(Arc::clone(&handle)),
                config.pool_ratios.clone(),
                config.pool_chunk_size,
            ),
            layouts: DescriptorLayoutCache::new(DeviceLayoutFactory::new(Arc::clone(&handle))),
            pipeline_cache: PipelineCache::with_persistence(
                Arc::clone(&handle),
                config.pipeline_cache_file.clone(),
            )?,
            mipmaps: Arc::new(MipmapChannel::new(recorder)),
            uploader: TextureUploader::new(device, Arc::clone(&allocator), Arc::clone(&upload)),
            upload,
            sampler,
            allocator,
            device: handle,
        };
        resources.install_fallbacks()?;
        log::info!("Resource manager initialized");
        Ok(resources)
    }

    /// One 1x1 texture per kind plus the material that samples only those.
    fn install_fallbacks(&mut self) -> Result<()> {
        for kind in TextureKind::ALL {
            let texture = self
                .uploader
                .upload(&format!("__fallback_{}", kind.name()), &PixelData::fallback(kind))?;
            self.textures.set_fallback(kind, texture);
        }
        self.materials.build_fallback(
            &self.textures,
            &mut self.layouts,
            &mut self.static_descriptors,
            self.device.as_ref(),
        )
    }

    pub fn device(&self) -> &Arc<ash::Device> {
        &self.device
    }

    pub fn allocator(&self) -> &Arc<Allocator> {
        &self.allocator
    }

    pub fn upload(&self) -> &Arc<UploadContext> {
        &self.upload
    }

    pub fn sampler(&self) -> vk::Sampler {
        self.sampler
    }

    /// Handler for the asset worker sharing this manager's queues and allocator.
    pub fn asset_loader(&self) -> GpuAssetLoader {
        GpuAssetLoader::new(
            Arc::clone(&self.allocator),
            Arc::clone(&self.upload),
            self.uploader.clone(),
            Arc::clone(&self.mipmaps),
        )
    }

    /// Uploads a texture with its full mip chain and makes it usable immediately.
    pub fn load_texture(&mut self, name: &str, pixels: &PixelData) -> Result<()> {
        let texture = self.uploader.upload(name, pixels)?;
        self.insert_texture(texture, false)?;
        Ok(())
    }

    /// Adds a texture produced elsewhere. A replaced texture is dropped once the device is idle.
    ///
    /// Returns `true` when the texture is usable on insertion, either because it
    /// was uploaded whole or because its mips already executed; materials
    /// sampling it are rebuilt in that case.
    pub fn insert_texture(&mut self, texture: Texture, deferred: bool) -> Result<bool> {
        let name = texture.name.clone();
        let (replaced, ready) = if deferred {
            let inserted = self.textures.insert_deferred(&name, texture);
            (inserted.replaced, inserted.ready)
        } else {
            (self.textures.insert_ready(&name, texture), true)
        };
        if let Some(old) = replaced {
            log::debug!("Replacing texture '{name}'");
            unsafe { self.device.device_wait_idle()? };
            drop(old);
        }
        if ready {
            let rebuilt = self.refresh_materials(std::slice::from_ref(&name))?;
            log::debug!("Texture '{name}' usable, {rebuilt} materials rebuilt");
        }
        Ok(ready)
    }

    /// Marks textures whose mips have executed as ready and rebuilds dependent materials.
    pub fn textures_ready(&mut self, names: &[String]) -> Result<usize> {
        for name in names {
            if !self.textures.mark_ready(name) {
                log::trace!("Texture '{name}' ready before insertion");
            }
        }
        self.refresh_materials(names)
    }

    fn refresh_materials(&mut self, names: &[String]) -> Result<usize> {
        self.materials.refresh(
            names,
            &self.textures,
            &mut self.layouts,
            &mut self.static_descriptors,
            self.device.as_ref(),
        )
    }

    pub fn add_material(&mut self, desc: MaterialDesc) -> Result<()> {
        self.materials.insert(
            desc,
            &self.textures,
            &mut self.layouts,
            &mut self.static_descriptors,
            self.device.as_ref(),
        )
    }

    /// Uploads geometry synchronously and returns the model's index.
    pub fn upload_model(&mut self, name: &str, meshes: &[MeshData]) -> Result<usize> {
        let model = Model::upload(&self.allocator, &self.upload, name, meshes)?;
        Ok(self.models.push(model))
    }

    pub fn material_layout(&mut self) -> Result<vk::DescriptorSetLayout> {
        self.materials.layout(&mut self.layouts)
    }
}

impl Drop for ResourceManager {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
        }
        // Layouts hold the sampler as an immutable sampler.
        self.swapchain_descriptors.destroy_pools();
        self.static_descriptors.destroy_pools();
        self.layouts.destroy_all();
        unsafe { self.device.destroy_sampler(self.sampler, None) };

        let discarded = self.mipmaps.discard_pending();
        if !discarded.is_empty() {
            log::debug!("Discarded {} unsubmitted mip batches", discarded.len());
        }
    }
}
