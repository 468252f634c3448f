use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use ash::vk;

use crate::{RendererError, Result};

/// One binding of a descriptor set layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LayoutBinding {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub count: u32,
    pub stages: vk::ShaderStageFlags,
    /// Sampler baked into the layout for every array element.
    pub immutable_sampler: Option<vk::Sampler>,
}

impl LayoutBinding {
    pub fn new(binding: u32, descriptor_type: vk::DescriptorType, stages: vk::ShaderStageFlags) -> Self {
        Self {
            binding,
            descriptor_type,
            count: 1,
            stages,
            immutable_sampler: None,
        }
    }

    pub fn with_immutable_sampler(mut self, sampler: vk::Sampler) -> Self {
        self.immutable_sampler = Some(sampler);
        self
    }

    /// `binding | type << 16 | count << 24 | stages << 40`
    fn packed(&self) -> u64 {
        u64::from(self.binding)
            | (self.descriptor_type.as_raw() as u64) << 16
            | u64::from(self.count) << 24
            | u64::from(self.stages.as_raw()) << 40
    }
}

/// Normalized layout description: bindings sorted by binding index.
///
/// Two specs listing the same bindings in a different order compare equal and
/// hash identically.
#[derive(Clone, Debug, Default)]
pub struct LayoutSpec {
    bindings: Vec<LayoutBinding>,
}

impl LayoutSpec {
    pub fn new(mut bindings: Vec<LayoutBinding>) -> Self {
        bindings.sort_by_key(|b| b.binding);
        Self { bindings }
    }

    pub fn bindings(&self) -> &[LayoutBinding] {
        &self.bindings
    }

    /// `h(N) ^ fold(h(packed(binding)))`
    pub fn structural_hash(&self) -> u64 {
        let mut result = hash_u64(self.bindings.len() as u64);
        for binding in &self.bindings {
            result ^= hash_u64(binding.packed());
        }
        result
    }
}

fn hash_u64(value: u64) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

impl PartialEq for LayoutSpec {
    fn eq(&self, other: &Self) -> bool {
        self.bindings == other.bindings
    }
}

impl Eq for LayoutSpec {}

impl Hash for LayoutSpec {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.structural_hash());
    }
}

/// Creates and destroys layout objects for the cache.
pub trait LayoutFactory {
    fn create_layout(&self, spec: &LayoutSpec) -> Result<vk::DescriptorSetLayout>;
    fn destroy_layout(&self, layout: vk::DescriptorSetLayout);
}

/// Layout factory backed by a logical device.
pub struct DeviceLayoutFactory {
    device: Arc<ash::Device>,
}

impl DeviceLayoutFactory {
    pub fn new(device: Arc<ash::Device>) -> Self {
        Self { device }
    }
}

impl LayoutFactory for DeviceLayoutFactory {
    fn create_layout(&self, spec: &LayoutSpec) -> Result<vk::DescriptorSetLayout> {
        let samplers: Vec<Vec<vk::Sampler>> = spec
            .bindings()
            .iter()
            .map(|b| match b.immutable_sampler {
                Some(sampler) => vec![sampler; b.count as usize],
                None => Vec::new(),
            })
            .collect();

        let bindings: Vec<vk::DescriptorSetLayoutBinding> = spec
            .bindings()
            .iter()
            .zip(&samplers)
            .map(|(b, immutable)| {
                let binding = vk::DescriptorSetLayoutBinding::default()
                    .binding(b.binding)
                    .descriptor_type(b.descriptor_type)
                    .descriptor_count(b.count)
                    .stage_flags(b.stages);
                if immutable.is_empty() {
                    binding
                } else {
                    binding.immutable_samplers(immutable)
                }
            })
            .collect();

        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);

        unsafe {
            self.device
                .create_descriptor_set_layout(&create_info, None)
                .map_err(|e| {
                    RendererError::VulkanError(format!(
                        "Failed to create descriptor set layout: {e}"
                    ))
                })
        }
    }

    fn destroy_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe { self.device.destroy_descriptor_set_layout(layout, None) };
    }
}

/// Deduplicates descriptor set layouts by structure. Owns every layout it returns.
pub struct DescriptorLayoutCache<F: LayoutFactory = DeviceLayoutFactory> {
    factory: F,
    layouts: HashMap<LayoutSpec, vk::DescriptorSetLayout>,
}

impl<F: LayoutFactory> DescriptorLayoutCache<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            layouts: HashMap::new(),
        }
    }

    /// Returns the cached layout for `spec`, creating it on first use.
    pub fn get_or_create(&mut self, spec: &LayoutSpec) -> Result<vk::DescriptorSetLayout> {
        if let Some(&layout) = self.layouts.get(spec) {
            return Ok(layout);
        }
        let layout = self.factory.create_layout(spec)?;
        log::debug!(
            "Created descriptor set layout with {} bindings ({} cached)",
            spec.bindings().len(),
            self.layouts.len() + 1
        );
        self.layouts.insert(spec.clone(), layout);
        Ok(layout)
    }

    /// Convenience wrapper normalizing `bindings` first.
    pub fn get_or_create_from(&mut self, bindings: &[LayoutBinding]) -> Result<vk::DescriptorSetLayout> {
        self.get_or_create(&LayoutSpec::new(bindings.to_vec()))
    }

    pub fn len(&self) -> usize {
        self.layouts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty()
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn destroy_all(&mut self) {
        for (_, layout) in self.layouts.drain() {
            self.factory.destroy_layout(layout);
        }
    }
}

impl<F: LayoutFactory> Drop for DescriptorLayoutCache<F> {
    fn drop(&mut self) {
        self.destroy_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use std::cell::Cell;

    #[derive(Default)]
    struct CountingFactory {
        created: Cell<u64>,
        destroyed: Cell<u64>,
    }

    impl LayoutFactory for CountingFactory {
        fn create_layout(&self, _spec: &LayoutSpec) -> Result<vk::DescriptorSetLayout> {
            self.created.set(self.created.get() + 1);
            Ok(vk::DescriptorSetLayout::from_raw(self.created.get()))
        }

        fn destroy_layout(&self, _layout: vk::DescriptorSetLayout) {
            self.destroyed.set(self.destroyed.get() + 1);
        }
    }

    fn ubo(binding: u32, stages: vk::ShaderStageFlags) -> LayoutBinding {
        LayoutBinding::new(binding, vk::DescriptorType::UNIFORM_BUFFER, stages)
    }

    #[test]
    fn binding_order_does_not_matter() {
        let a = LayoutSpec::new(vec![
            ubo(1, vk::ShaderStageFlags::VERTEX),
            ubo(0, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT),
        ]);
        let b = LayoutSpec::new(vec![
            ubo(0, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT),
            ubo(1, vk::ShaderStageFlags::VERTEX),
        ]);
        assert_eq!(a, b);
        assert_eq!(a.structural_hash(), b.structural_hash());
    }

    #[test]
    fn different_stages_are_distinct() {
        let a = LayoutSpec::new(vec![ubo(0, vk::ShaderStageFlags::VERTEX)]);
        let b = LayoutSpec::new(vec![ubo(0, vk::ShaderStageFlags::FRAGMENT)]);
        assert_ne!(a, b);
        assert_ne!(a.structural_hash(), b.structural_hash());
    }

    #[test]
    fn cache_reuses_layouts() {
        let mut cache = DescriptorLayoutCache::new(CountingFactory::default());
        let spec = LayoutSpec::new(vec![ubo(0, vk::ShaderStageFlags::VERTEX)]);
        let first = cache.get_or_create(&spec).unwrap();
        let second = cache.get_or_create(&spec).unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.factory().created.get(), 1);
    }

    #[test]
    fn destroy_all_releases_every_layout() {
        let mut cache = DescriptorLayoutCache::new(CountingFactory::default());
        cache
            .get_or_create_from(&[ubo(0, vk::ShaderStageFlags::VERTEX)])
            .unwrap();
        cache
            .get_or_create_from(&[ubo(0, vk::ShaderStageFlags::FRAGMENT)])
            .unwrap();
        cache.destroy_all();
        assert!(cache.is_empty());
        assert_eq!(cache.factory().destroyed.get(), 2);
    }

    #[test]
    fn immutable_sampler_distinguishes_layouts() {
        let sampled = LayoutBinding::new(
            0,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            vk::ShaderStageFlags::FRAGMENT,
        );
        let a = LayoutSpec::new(vec![sampled]);
        let b = LayoutSpec::new(vec![sampled.with_immutable_sampler(vk::Sampler::from_raw(7))]);
        assert_ne!(a, b);
    }
}
