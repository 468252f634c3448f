use std::collections::HashMap;

use ash::vk;

use super::texture::TextureKind;
use super::texture_library::{Sampled, TextureLibrary};
use crate::vulkan::descriptor_allocator::{DescriptorAllocator, PoolBackend};
use crate::vulkan::descriptor_builder::{DescriptorBuilder, DescriptorWriter};
use crate::vulkan::descriptor_layout::{DescriptorLayoutCache, LayoutFactory};
use crate::Result;

/// Set 2 binding order.
pub const MATERIAL_SLOTS: [TextureKind; 3] = [
    TextureKind::Diffuse,
    TextureKind::Normal,
    TextureKind::Roughness,
];

pub const FALLBACK_MATERIAL: &str = "__fallback";

/// Texture names a material samples; `None` samples the kind's fallback.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MaterialDesc {
    pub name: String,
    pub albedo: Option<String>,
    pub normal: Option<String>,
    pub roughness: Option<String>,
}

impl MaterialDesc {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn texture_for(&self, kind: TextureKind) -> Option<&str> {
        match kind {
            TextureKind::Diffuse => self.albedo.as_deref(),
            TextureKind::Normal => self.normal.as_deref(),
            TextureKind::Roughness | TextureKind::Metallic => self.roughness.as_deref(),
            _ => None,
        }
    }

    pub fn uses_texture(&self, texture: &str) -> bool {
        MATERIAL_SLOTS
            .iter()
            .any(|&kind| self.texture_for(kind) == Some(texture))
    }
}

pub struct Material {
    pub desc: MaterialDesc,
    pub set: vk::DescriptorSet,
}

/// Per-material descriptor sets (set 2) with a fallback for unknown materials.
pub struct MaterialLibrary {
    materials: HashMap<String, Material>,
    fallback: Option<Material>,
    sampler: vk::Sampler,
}

impl MaterialLibrary {
    pub fn new(sampler: vk::Sampler) -> Self {
        Self {
            materials: HashMap::new(),
            fallback: None,
            sampler,
        }
    }

    fn builder<T: Sampled>(&self, desc: &MaterialDesc, textures: &TextureLibrary<T>) -> DescriptorBuilder {
        MATERIAL_SLOTS
            .iter()
            .enumerate()
            .fold(DescriptorBuilder::new(), |builder, (binding, &kind)| {
                builder.bind_image_immutable(
                    binding as u32,
                    textures.view_or_fallback(desc.texture_for(kind), kind),
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    self.sampler,
                    vk::ShaderStageFlags::FRAGMENT,
                )
            })
    }

    /// Layout of set 2, resolved through the cache.
    pub fn layout<F: LayoutFactory>(&self, layouts: &mut DescriptorLayoutCache<F>) -> Result<vk::DescriptorSetLayout> {
        self.builder(&MaterialDesc::default(), &TextureLibrary::<NoTexture>::new())
            .build_layout(layouts)
    }

    /// Builds or rebuilds a material's set from the textures currently ready.
    pub fn insert<T, F, B, W>(
        &mut self,
        desc: MaterialDesc,
        textures: &TextureLibrary<T>,
        layouts: &mut DescriptorLayoutCache<F>,
        allocator: &mut DescriptorAllocator<B>,
        writer: &W,
    ) -> Result<()>
    where
        T: Sampled,
        F: LayoutFactory,
        B: PoolBackend,
        W: DescriptorWriter + ?Sized,
    {
        let (set, _) = self.builder(&desc, textures).build(layouts, allocator, writer)?;
        let material = Material { desc, set };
        if material.desc.name == FALLBACK_MATERIAL {
            self.fallback = Some(material);
        } else {
            self.materials.insert(material.desc.name.clone(), material);
        }
        Ok(())
    }

    /// Gives the fallback material a set sampling only fallback textures.
    pub fn build_fallback<T, F, B, W>(
        &mut self,
        textures: &TextureLibrary<T>,
        layouts: &mut DescriptorLayoutCache<F>,
        allocator: &mut DescriptorAllocator<B>,
        writer: &W,
    ) -> Result<()>
    where
        T: Sampled,
        F: LayoutFactory,
        B: PoolBackend,
        W: DescriptorWriter + ?Sized,
    {
        self.insert(MaterialDesc::new(FALLBACK_MATERIAL), textures, layouts, allocator, writer)
    }

    /// Rebuilds every material that samples one of `ready`. Returns how many were rebuilt.
    pub fn refresh<T, F, B, W>(
        &mut self,
        ready: &[String],
        textures: &TextureLibrary<T>,
        layouts: &mut DescriptorLayoutCache<F>,
        allocator: &mut DescriptorAllocator<B>,
        writer: &W,
    ) -> Result<usize>
    where
        T: Sampled,
        F: LayoutFactory,
        B: PoolBackend,
        W: DescriptorWriter + ?Sized,
    {
        let stale: Vec<MaterialDesc> = self
            .materials
            .values()
            .filter(|m| ready.iter().any(|t| m.desc.uses_texture(t)))
            .map(|m| m.desc.clone())
            .collect();
        let count = stale.len();
        for desc in stale {
            log::debug!("Rebuilding material '{}'", desc.name);
            self.insert(desc, textures, layouts, allocator, writer)?;
        }
        Ok(count)
    }

    /// Set for `name`, or the fallback set when the material is unknown.
    pub fn set_or_fallback(&self, name: Option<&str>) -> vk::DescriptorSet {
        name.and_then(|n| self.materials.get(n))
            .or(self.fallback.as_ref())
            .map_or(vk::DescriptorSet::null(), |m| m.set)
    }

    pub fn get(&self, name: &str) -> Option<&Material> {
        self.materials.get(name)
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }
}

/// Stand-in used to resolve the layout without any textures.
struct NoTexture;

impl Sampled for NoTexture {
    fn view(&self) -> vk::ImageView {
        vk::ImageView::null()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vulkan::descriptor_allocator::PoolSizeRatios;
    use crate::vulkan::descriptor_layout::LayoutSpec;
    use ash::vk::Handle;
    use std::cell::RefCell;

    struct Layouts;
    impl LayoutFactory for Layouts {
        fn create_layout(&self, spec: &LayoutSpec) -> Result<vk::DescriptorSetLayout> {
            Ok(vk::DescriptorSetLayout::from_raw(spec.structural_hash() | 1))
        }
        fn destroy_layout(&self, _layout: vk::DescriptorSetLayout) {}
    }

    #[derive(Default)]
    struct Pools {
        next_set: u64,
    }
    impl PoolBackend for Pools {
        fn create_pool(&mut self, _: &[vk::DescriptorPoolSize], _: u32) -> Result<vk::DescriptorPool> {
            Ok(vk::DescriptorPool::from_raw(1))
        }
        fn allocate_set(
            &mut self,
            _: vk::DescriptorPool,
            _: vk::DescriptorSetLayout,
        ) -> std::result::Result<vk::DescriptorSet, vk::Result> {
            self.next_set += 1;
            Ok(vk::DescriptorSet::from_raw(self.next_set))
        }
        fn reset_pool(&mut self, _: vk::DescriptorPool) -> Result<()> {
            Ok(())
        }
        fn destroy_pool(&mut self, _: vk::DescriptorPool) {}
    }

    #[derive(Default)]
    struct Views(RefCell<Vec<vk::ImageView>>);
    impl DescriptorWriter for Views {
        fn write_descriptors(&self, writes: &[vk::WriteDescriptorSet<'_>]) {
            for write in writes {
                let info = unsafe { &*write.p_image_info };
                self.0.borrow_mut().push(info.image_view);
            }
        }
    }

    struct Tex(u64);
    impl Sampled for Tex {
        fn view(&self) -> vk::ImageView {
            vk::ImageView::from_raw(self.0)
        }
    }

    fn textures() -> TextureLibrary<Tex> {
        let mut textures = TextureLibrary::new();
        textures.set_fallback(TextureKind::Diffuse, Tex(10));
        textures.set_fallback(TextureKind::Normal, Tex(11));
        textures.set_fallback(TextureKind::Roughness, Tex(12));
        textures
    }

    fn brick() -> MaterialDesc {
        MaterialDesc {
            albedo: Some("brick_albedo".into()),
            ..MaterialDesc::new("brick")
        }
    }

    #[test]
    fn unknown_material_binds_fallback() {
        let textures = textures();
        let mut layouts = DescriptorLayoutCache::new(Layouts);
        let mut allocator = DescriptorAllocator::new(Pools::default(), PoolSizeRatios::default(), 8);
        let mut library = MaterialLibrary::new(vk::Sampler::from_raw(5));
        library
            .build_fallback(&textures, &mut layouts, &mut allocator, &Views::default())
            .unwrap();

        let fallback = library.set_or_fallback(None);
        assert_ne!(fallback, vk::DescriptorSet::null());
        assert_eq!(library.set_or_fallback(Some("missing")), fallback);
        assert!(library.is_empty());
    }

    #[test]
    fn pending_texture_samples_fallback_until_refresh() {
        let mut textures = textures();
        let mut layouts = DescriptorLayoutCache::new(Layouts);
        let mut allocator = DescriptorAllocator::new(Pools::default(), PoolSizeRatios::default(), 8);
        let mut library = MaterialLibrary::new(vk::Sampler::from_raw(5));
        let writer = Views::default();

        textures.insert_deferred("brick_albedo", Tex(42));
        library
            .insert(brick(), &textures, &mut layouts, &mut allocator, &writer)
            .unwrap();
        let before = library.set_or_fallback(Some("brick"));
        assert_eq!(writer.0.borrow()[0].as_raw(), 10);

        textures.mark_ready("brick_albedo");
        let rebuilt = library
            .refresh(&["brick_albedo".to_string()], &textures, &mut layouts, &mut allocator, &writer)
            .unwrap();
        assert_eq!(rebuilt, 1);
        assert_ne!(library.set_or_fallback(Some("brick")), before);
        assert_eq!(writer.0.borrow()[3].as_raw(), 42);
    }

    #[test]
    fn texture_ready_before_arrival_still_rebuilds_material() {
        let mut textures = textures();
        let mut layouts = DescriptorLayoutCache::new(Layouts);
        let mut allocator = DescriptorAllocator::new(Pools::default(), PoolSizeRatios::default(), 8);
        let mut library = MaterialLibrary::new(vk::Sampler::from_raw(5));
        let writer = Views::default();
        library
            .insert(brick(), &textures, &mut layouts, &mut allocator, &writer)
            .unwrap();

        // Mip batch retired before the worker's texture event was drained.
        assert!(!textures.mark_ready("brick_albedo"));
        let rebuilt = library
            .refresh(&["brick_albedo".to_string()], &textures, &mut layouts, &mut allocator, &writer)
            .unwrap();
        assert_eq!(rebuilt, 1);
        assert_eq!(writer.0.borrow()[3].as_raw(), 10);

        let inserted = textures.insert_deferred("brick_albedo", Tex(42));
        assert!(inserted.ready);
        library
            .refresh(&["brick_albedo".to_string()], &textures, &mut layouts, &mut allocator, &writer)
            .unwrap();
        assert_eq!(writer.0.borrow()[6].as_raw(), 42);
    }

    #[test]
    fn refresh_ignores_unrelated_textures() {
        let textures = textures();
        let mut layouts = DescriptorLayoutCache::new(Layouts);
        let mut allocator = DescriptorAllocator::new(Pools::default(), PoolSizeRatios::default(), 8);
        let mut library = MaterialLibrary::new(vk::Sampler::from_raw(5));
        let writer = Views::default();
        library
            .insert(brick(), &textures, &mut layouts, &mut allocator, &writer)
            .unwrap();
        let rebuilt = library
            .refresh(&["other".to_string()], &textures, &mut layouts, &mut allocator, &writer)
            .unwrap();
        assert_eq!(rebuilt, 0);
    }

    #[test]
    fn layout_is_shared_with_material_sets() {
        let textures = textures();
        let mut layouts = DescriptorLayoutCache::new(Layouts);
        let mut allocator = DescriptorAllocator::new(Pools::default(), PoolSizeRatios::default(), 8);
        let mut library = MaterialLibrary::new(vk::Sampler::from_raw(5));
        let layout = library.layout(&mut layouts).unwrap();
        library
            .insert(brick(), &textures, &mut layouts, &mut allocator, &Views::default())
            .unwrap();
        assert_eq!(layouts.len(), 1);
        assert_eq!(library.layout(&mut layouts).unwrap(), layout);
    }
}
