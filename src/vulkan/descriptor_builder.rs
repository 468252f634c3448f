use ash::vk;

use super::descriptor_allocator::{DescriptorAllocator, PoolBackend};
use super::descriptor_layout::{DescriptorLayoutCache, LayoutBinding, LayoutFactory, LayoutSpec};
use crate::Result;

/// Applies descriptor writes.
pub trait DescriptorWriter {
    fn write_descriptors(&self, writes: &[vk::WriteDescriptorSet<'_>]);
}

impl DescriptorWriter for ash::Device {
    fn write_descriptors(&self, writes: &[vk::WriteDescriptorSet<'_>]) {
        unsafe { self.update_descriptor_sets(writes, &[]) };
    }
}

#[derive(Clone, Copy, Debug)]
enum Resource {
    Buffer(vk::DescriptorBufferInfo),
    Image(vk::DescriptorImageInfo),
}

#[derive(Clone, Copy, Debug)]
struct PendingWrite {
    binding: u32,
    descriptor_type: vk::DescriptorType,
    resource: Resource,
}

/// Accumulates bindings, then resolves the layout, allocates and fills a set in one call.
///
/// ```ignore
/// let (set, layout) = DescriptorBuilder::new()
///     .bind_buffer(0, matrices, vk::DescriptorType::UNIFORM_BUFFER, stages)
///     .bind_buffer(1, lights, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::FRAGMENT)
///     .build(&mut layouts, &mut descriptors, device.as_ref())?;
/// ```
#[derive(Clone, Debug, Default)]
pub struct DescriptorBuilder {
    bindings: Vec<LayoutBinding>,
    writes: Vec<PendingWrite>,
}

impl DescriptorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind_buffer(
        mut self,
        binding: u32,
        info: vk::DescriptorBufferInfo,
        descriptor_type: vk::DescriptorType,
        stages: vk::ShaderStageFlags,
    ) -> Self {
        self.bindings
            .push(LayoutBinding::new(binding, descriptor_type, stages));
        self.writes.push(PendingWrite {
            binding,
            descriptor_type,
            resource: Resource::Buffer(info),
        });
        self
    }

    pub fn bind_image(
        mut self,
        binding: u32,
        info: vk::DescriptorImageInfo,
        descriptor_type: vk::DescriptorType,
        stages: vk::ShaderStageFlags,
    ) -> Self {
        self.bindings
            .push(LayoutBinding::new(binding, descriptor_type, stages));
        self.writes.push(PendingWrite {
            binding,
            descriptor_type,
            resource: Resource::Image(info),
        });
        self
    }

    /// Combined image sampler whose sampler is baked into the layout.
    pub fn bind_image_immutable(
        mut self,
        binding: u32,
        view: vk::ImageView,
        layout: vk::ImageLayout,
        sampler: vk::Sampler,
        stages: vk::ShaderStageFlags,
    ) -> Self {
        let descriptor_type = vk::DescriptorType::COMBINED_IMAGE_SAMPLER;
        self.bindings.push(
            LayoutBinding::new(binding, descriptor_type, stages).with_immutable_sampler(sampler),
        );
        self.writes.push(PendingWrite {
            binding,
            descriptor_type,
            resource: Resource::Image(vk::DescriptorImageInfo {
                sampler,
                image_view: view,
                image_layout: layout,
            }),
        });
        self
    }

    pub fn layout_spec(&self) -> LayoutSpec {
        LayoutSpec::new(self.bindings.clone())
    }

    /// Resolves the layout through the cache without allocating a set.
    pub fn build_layout<F: LayoutFactory>(
        &self,
        layouts: &mut DescriptorLayoutCache<F>,
    ) -> Result<vk::DescriptorSetLayout> {
        layouts.get_or_create(&self.layout_spec())
    }

    /// Allocates a set and writes every accumulated binding into it.
    ///
    /// Nothing is written when layout creation or allocation fails.
    pub fn build<F, B, W>(
        &self,
        layouts: &mut DescriptorLayoutCache<F>,
        allocator: &mut DescriptorAllocator<B>,
        writer: &W,
    ) -> Result<(vk::DescriptorSet, vk::DescriptorSetLayout)>
    where
        F: LayoutFactory,
        B: PoolBackend,
        W: DescriptorWriter + ?Sized,
    {
        let layout = self.build_layout(layouts)?;
        let set = allocator.allocate(layout)?;

        let writes: Vec<vk::WriteDescriptorSet<'_>> = self
            .writes
            .iter()
            .map(|pending| {
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(pending.binding)
                    .descriptor_type(pending.descriptor_type);
                match &pending.resource {
                    Resource::Buffer(info) => write.buffer_info(std::slice::from_ref(info)),
                    Resource::Image(info) => write.image_info(std::slice::from_ref(info)),
                }
            })
            .collect();

        writer.write_descriptors(&writes);
        Ok((set, layout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vulkan::descriptor_allocator::PoolSizeRatios;
    use crate::RendererError;
    use ash::vk::Handle;
    use std::cell::RefCell;

    struct Layouts;
    impl LayoutFactory for Layouts {
        fn create_layout(&self, spec: &LayoutSpec) -> Result<vk::DescriptorSetLayout> {
            Ok(vk::DescriptorSetLayout::from_raw(
                spec.structural_hash() | 1,
            ))
        }
        fn destroy_layout(&self, _layout: vk::DescriptorSetLayout) {}
    }

    struct Pools {
        fail: bool,
    }
    impl PoolBackend for Pools {
        fn create_pool(
            &mut self,
            _sizes: &[vk::DescriptorPoolSize],
            _max_sets: u32,
        ) -> Result<vk::DescriptorPool> {
            Ok(vk::DescriptorPool::from_raw(1))
        }
        fn allocate_set(
            &mut self,
            _pool: vk::DescriptorPool,
            _layout: vk::DescriptorSetLayout,
        ) -> std::result::Result<vk::DescriptorSet, vk::Result> {
            if self.fail {
                Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY)
            } else {
                Ok(vk::DescriptorSet::from_raw(42))
            }
        }
        fn reset_pool(&mut self, _pool: vk::DescriptorPool) -> Result<()> {
            Ok(())
        }
        fn destroy_pool(&mut self, _pool: vk::DescriptorPool) {}
    }

    #[derive(Default)]
    struct RecordingWriter {
        writes: RefCell<Vec<(vk::DescriptorSet, u32, vk::DescriptorType)>>,
    }
    impl DescriptorWriter for RecordingWriter {
        fn write_descriptors(&self, writes: &[vk::WriteDescriptorSet<'_>]) {
            self.writes.borrow_mut().extend(
                writes
                    .iter()
                    .map(|w| (w.dst_set, w.dst_binding, w.descriptor_type)),
            );
        }
    }

    fn per_pass_builder() -> DescriptorBuilder {
        let buffer = vk::DescriptorBufferInfo {
            buffer: vk::Buffer::from_raw(9),
            offset: 0,
            range: 256,
        };
        DescriptorBuilder::new()
            .bind_buffer(
                1,
                buffer,
                vk::DescriptorType::UNIFORM_BUFFER,
                vk::ShaderStageFlags::FRAGMENT,
            )
            .bind_buffer(
                0,
                buffer,
                vk::DescriptorType::UNIFORM_BUFFER,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            )
    }

    #[test]
    fn build_patches_destination_set_into_every_write() {
        let mut layouts = DescriptorLayoutCache::new(Layouts);
        let mut allocator =
            DescriptorAllocator::new(Pools { fail: false }, PoolSizeRatios::default(), 8);
        let writer = RecordingWriter::default();

        let (set, _) = per_pass_builder()
            .build(&mut layouts, &mut allocator, &writer)
            .unwrap();

        let writes = writer.writes.borrow();
        assert_eq!(writes.len(), 2);
        assert!(writes.iter().all(|(dst, _, _)| *dst == set));
        assert_eq!(layouts.len(), 1);
    }

    #[test]
    fn failed_allocation_writes_nothing() {
        let mut layouts = DescriptorLayoutCache::new(Layouts);
        let mut allocator =
            DescriptorAllocator::new(Pools { fail: true }, PoolSizeRatios::default(), 8);
        let writer = RecordingWriter::default();

        let result = per_pass_builder().build(&mut layouts, &mut allocator, &writer);

        assert!(matches!(result, Err(RendererError::DescriptorAllocation(_))));
        assert!(writer.writes.borrow().is_empty());
    }

    #[test]
    fn layout_spec_is_sorted() {
        let spec = per_pass_builder().layout_spec();
        let order: Vec<u32> = spec.bindings().iter().map(|b| b.binding).collect();
        assert_eq!(order, vec![0, 1]);
    }
}
