use std::cell::{Cell, RefCell};

use ash::vk::{self, Handle};

use ash_editor_renderer::vulkan::{
    DescriptorAllocator, DescriptorBuilder, DescriptorLayoutCache, DescriptorWriter, LayoutBinding,
    LayoutFactory, LayoutSpec, PoolBackend, PoolSizeRatios,
};
use ash_editor_renderer::{RendererError, Result};

#[derive(Default)]
struct FakeFactory {
    created: Cell<u64>,
}

impl LayoutFactory for FakeFactory {
    fn create_layout(&self, _spec: &LayoutSpec) -> Result<vk::DescriptorSetLayout> {
        self.created.set(self.created.get() + 1);
        Ok(vk::DescriptorSetLayout::from_raw(0x100 + self.created.get()))
    }

    fn destroy_layout(&self, _layout: vk::DescriptorSetLayout) {}
}

/// Pools that hold `max_sets` sets each, failing like a real pool once full.
#[derive(Default)]
struct BoundedBackend {
    capacities: Vec<u32>,
    used: Vec<u32>,
}

impl PoolBackend for BoundedBackend {
    fn create_pool(&mut self, _sizes: &[vk::DescriptorPoolSize], max_sets: u32) -> Result<vk::DescriptorPool> {
        self.capacities.push(max_sets);
        self.used.push(0);
        Ok(vk::DescriptorPool::from_raw(self.capacities.len() as u64))
    }

    fn allocate_set(
        &mut self,
        pool: vk::DescriptorPool,
        _layout: vk::DescriptorSetLayout,
    ) -> std::result::Result<vk::DescriptorSet, vk::Result> {
        let index = pool.as_raw() as usize - 1;
        if self.used[index] == self.capacities[index] {
            return Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY);
        }
        self.used[index] += 1;
        Ok(vk::DescriptorSet::from_raw(
            (pool.as_raw() << 32) | u64::from(self.used[index]),
        ))
    }

    fn reset_pool(&mut self, pool: vk::DescriptorPool) -> Result<()> {
        self.used[pool.as_raw() as usize - 1] = 0;
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

fn ubo(binding: u32, stages: vk::ShaderStageFlags) -> LayoutBinding {
    LayoutBinding::new(binding, vk::DescriptorType::UNIFORM_BUFFER, stages)
}

#[test]
fn layouts_differing_only_in_binding_order_share_a_handle() {
    let vs = vk::ShaderStageFlags::VERTEX;
    let vs_fs = vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT;
    let mut cache = DescriptorLayoutCache::new(FakeFactory::default());

    let a = cache
        .get_or_create(&LayoutSpec::new(vec![ubo(1, vs), ubo(0, vs_fs)]))
        .unwrap();
    let b = cache
        .get_or_create(&LayoutSpec::new(vec![ubo(0, vs_fs), ubo(1, vs)]))
        .unwrap();

    assert_eq!(a, b);
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.factory().created.get(), 1);
}

#[test]
fn pool_growth_covers_fifteen_hundred_sets() {
    let mut allocator =
        DescriptorAllocator::new(BoundedBackend::default(), PoolSizeRatios::default(), 1000);
    let mut cache = DescriptorLayoutCache::new(FakeFactory::default());
    let layout = cache
        .get_or_create_from(&[ubo(0, vk::ShaderStageFlags::VERTEX)])
        .unwrap();

    let mut sets = Vec::with_capacity(1500);
    for _ in 0..1500 {
        sets.push(allocator.allocate(layout).unwrap());
    }

    let stats = allocator.stats();
    assert!(stats.pools_created >= 2);
    assert!(stats.retries <= 1);
    assert_eq!(stats.sets_allocated, 1500);
    sets.sort_by_key(|s| s.as_raw());
    sets.dedup();
    assert_eq!(sets.len(), 1500);
}

#[test]
fn exhausted_allocation_retries_once_then_reports() {
    struct AlwaysFull {
        pools: u64,
        attempts: u32,
    }

    impl PoolBackend for AlwaysFull {
        fn create_pool(&mut self, _sizes: &[vk::DescriptorPoolSize], _max_sets: u32) -> Result<vk::DescriptorPool> {
            self.pools += 1;
            Ok(vk::DescriptorPool::from_raw(self.pools))
        }

        fn allocate_set(
            &mut self,
            _pool: vk::DescriptorPool,
            _layout: vk::DescriptorSetLayout,
        ) -> std::result::Result<vk::DescriptorSet, vk::Result> {
            self.attempts += 1;
            Err(vk::Result::ERROR_FRAGMENTED_POOL)
        }

        fn reset_pool(&mut self, _pool: vk::DescriptorPool) -> Result<()> {
            Ok(())
        }

        fn destroy_pool(&mut self, _pool: vk::DescriptorPool) {}
    }

    let mut allocator = DescriptorAllocator::new(
        AlwaysFull {
            pools: 0,
            attempts: 0,
        },
        PoolSizeRatios::default(),
        8,
    );
    let err = allocator
        .allocate(vk::DescriptorSetLayout::from_raw(7))
        .unwrap_err();

    assert!(matches!(
        err,
        RendererError::DescriptorAllocation(vk::Result::ERROR_FRAGMENTED_POOL)
    ));
    assert_eq!(allocator.backend().attempts, 2);
    assert_eq!(allocator.stats().pools_created, 2);
    assert_eq!(allocator.stats().retries, 1);
    assert_eq!(allocator.stats().sets_allocated, 0);
}

#[test]
fn builder_writes_every_binding_into_the_new_set() {
    let mut cache = DescriptorLayoutCache::new(FakeFactory::default());
    let mut allocator =
        DescriptorAllocator::new(BoundedBackend::default(), PoolSizeRatios::default(), 4);
    let writer = RecordingWriter::default();
    let buffer = vk::DescriptorBufferInfo {
        buffer: vk::Buffer::from_raw(1),
        offset: 0,
        range: 64,
    };

    let (set, layout) = DescriptorBuilder::new()
        .bind_buffer(
            0,
            buffer,
            vk::DescriptorType::UNIFORM_BUFFER,
            vk::ShaderStageFlags::VERTEX,
        )
        .bind_buffer(
            1,
            buffer,
            vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
            vk::ShaderStageFlags::VERTEX,
        )
        .build(&mut cache, &mut allocator, &writer)
        .unwrap();

    assert_eq!(cache.len(), 1);
    assert_ne!(layout, vk::DescriptorSetLayout::null());
    let writes = writer.writes.borrow();
    assert_eq!(writes.len(), 2);
    assert!(writes.iter().all(|&(dst, _, _)| dst == set));
    assert!(writes
        .iter()
        .any(|&(_, b, ty)| b == 1 && ty == vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC));
}

#[test]
fn reset_recycles_pools_without_creating_more() {
    let mut allocator =
        DescriptorAllocator::new(BoundedBackend::default(), PoolSizeRatios::default(), 2);
    let layout = vk::DescriptorSetLayout::from_raw(9);
    for _ in 0..3 {
        allocator.allocate(layout).unwrap();
    }
    assert_eq!(allocator.stats().pools_created, 2);

    allocator.reset_all().unwrap();
    for _ in 0..4 {
        allocator.allocate(layout).unwrap();
    }
    assert_eq!(allocator.stats().pools_created, 2);
}
