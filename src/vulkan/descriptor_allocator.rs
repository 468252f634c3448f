use std::sync::Arc;

use ash::vk;
use log::{debug, warn};

use crate::{RendererError, Result};

/// Per-type descriptor capacity of a new pool, as a multiple of the set count.
#[derive(Clone, Debug, PartialEq)]
pub struct PoolSizeRatios(pub Vec<(vk::DescriptorType, f32)>);

impl Default for PoolSizeRatios {
    fn default() -> Self {
        Self(vec![
            (vk::DescriptorType::SAMPLER, 0.5),
            (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 4.0),
            (vk::DescriptorType::SAMPLED_IMAGE, 4.0),
            (vk::DescriptorType::STORAGE_IMAGE, 1.0),
            (vk::DescriptorType::UNIFORM_TEXEL_BUFFER, 1.0),
            (vk::DescriptorType::STORAGE_TEXEL_BUFFER, 1.0),
            (vk::DescriptorType::UNIFORM_BUFFER, 2.0),
            (vk::DescriptorType::STORAGE_BUFFER, 2.0),
            (vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, 1.0),
            (vk::DescriptorType::STORAGE_BUFFER_DYNAMIC, 1.0),
            (vk::DescriptorType::INPUT_ATTACHMENT, 0.5),
        ])
    }
}

impl PoolSizeRatios {
    pub fn pool_sizes(&self, set_count: u32) -> Vec<vk::DescriptorPoolSize> {
        self.0
            .iter()
            .map(|&(ty, ratio)| vk::DescriptorPoolSize {
                ty,
                descriptor_count: ((ratio * set_count as f32) as u32).max(1),
            })
            .collect()
    }
}

/// Descriptor pool operations used by [`DescriptorAllocator`].
pub trait PoolBackend {
    fn create_pool(
        &mut self,
        sizes: &[vk::DescriptorPoolSize],
        max_sets: u32,
    ) -> Result<vk::DescriptorPool>;

    fn allocate_set(
        &mut self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> std::result::Result<vk::DescriptorSet, vk::Result>;

    fn reset_pool(&mut self, pool: vk::DescriptorPool) -> Result<()>;

    fn destroy_pool(&mut self, pool: vk::DescriptorPool);
}

pub struct DevicePoolBackend {
    device: Arc<ash::Device>,
}

impl DevicePoolBackend {
    pub fn new(device: Arc<ash::Device>) -> Self {
        Self { device }
    }
}

impl PoolBackend for DevicePoolBackend {
    fn create_pool(
        &mut self,
        sizes: &[vk::DescriptorPoolSize],
        max_sets: u32,
    ) -> Result<vk::DescriptorPool> {
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(sizes);
        unsafe {
            self.device
                .create_descriptor_pool(&create_info, None)
                .map_err(|e| {
                    RendererError::VulkanError(format!("Failed to create descriptor pool: {e}"))
                })
        }
    }

    fn allocate_set(
        &mut self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> std::result::Result<vk::DescriptorSet, vk::Result> {
        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        unsafe { self.device.allocate_descriptor_sets(&alloc_info) }.map(|sets| sets[0])
    }

    fn reset_pool(&mut self, pool: vk::DescriptorPool) -> Result<()> {
        unsafe {
            self.device
                .reset_descriptor_pool(pool, vk::DescriptorPoolResetFlags::empty())?;
        }
        Ok(())
    }

    fn destroy_pool(&mut self, pool: vk::DescriptorPool) {
        unsafe { self.device.destroy_descriptor_pool(pool, None) };
    }
}

/// Counters for pool growth.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    pub pools_created: u32,
    pub retries: u32,
    pub sets_allocated: u64,
}

/// Grows a list of descriptor pools on demand.
///
/// Pools are never freed individually: `reset_all` recycles every pool at once
/// and teardown destroys them.
pub struct DescriptorAllocator<B: PoolBackend = DevicePoolBackend> {
    backend: B,
    ratios: PoolSizeRatios,
    sets_per_pool: u32,
    current: Option<vk::DescriptorPool>,
    used: Vec<vk::DescriptorPool>,
    free: Vec<vk::DescriptorPool>,
    stats: AllocatorStats,
}

impl<B: PoolBackend> DescriptorAllocator<B> {
    pub fn new(backend: B, ratios: PoolSizeRatios, sets_per_pool: u32) -> Self {
        Self {
            backend,
            ratios,
            sets_per_pool: sets_per_pool.max(1),
            current: None,
            used: Vec::new(),
            free: Vec::new(),
            stats: AllocatorStats::default(),
        }
    }

    pub fn allocate(&mut self, layout: vk::DescriptorSetLayout) -> Result<vk::DescriptorSet> {
        let pool = match self.current {
            Some(pool) => pool,
            None => self.grab_pool()?,
        };

        let set = match self.backend.allocate_set(pool, layout) {
            Ok(set) => set,
            Err(vk::Result::ERROR_FRAGMENTED_POOL | vk::Result::ERROR_OUT_OF_POOL_MEMORY) => {
                self.stats.retries += 1;
                debug!("Descriptor pool exhausted; retrying with a fresh pool");
                let pool = self.grab_pool()?;
                self.backend.allocate_set(pool, layout).map_err(|e| {
                    warn!("Descriptor allocation failed after retry: {e}");
                    RendererError::DescriptorAllocation(e)
                })?
            }
            Err(e) => return Err(RendererError::DescriptorAllocation(e)),
        };

        self.stats.sets_allocated += 1;
        Ok(set)
    }

    /// Recycles every pool; sets allocated before become invalid.
    pub fn reset_all(&mut self) -> Result<()> {
        for pool in self.used.drain(..) {
            self.backend.reset_pool(pool)?;
            self.free.push(pool);
        }
        self.current = None;
        Ok(())
    }

    pub fn stats(&self) -> AllocatorStats {
        self.stats
    }

    pub fn used_pools(&self) -> usize {
        self.used.len()
    }

    pub fn free_pools(&self) -> usize {
        self.free.len()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn grab_pool(&mut self) -> Result<vk::DescriptorPool> {
        let pool = match self.free.pop() {
            Some(pool) => pool,
            None => {
                let sizes = self.ratios.pool_sizes(self.sets_per_pool);
                let pool = self.backend.create_pool(&sizes, self.sets_per_pool)?;
                self.stats.pools_created += 1;
                debug!(
                    "Created descriptor pool #{} ({} sets)",
                    self.stats.pools_created, self.sets_per_pool
                );
                pool
            }
        };
        self.used.push(pool);
        self.current = Some(pool);
        Ok(pool)
    }

    pub fn destroy_pools(&mut self) {
        for pool in self.used.drain(..).chain(self.free.drain(..)) {
            self.backend.destroy_pool(pool);
        }
        self.current = None;
    }
}

impl<B: PoolBackend> Drop for DescriptorAllocator<B> {
    fn drop(&mut self) {
        self.destroy_pools();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[derive(Default)]
    struct CountingBackend {
        next_pool: u64,
        resets: u32,
        destroyed: u32,
    }

    impl PoolBackend for CountingBackend {
        fn create_pool(
            &mut self,
            _sizes: &[vk::DescriptorPoolSize],
            _max_sets: u32,
        ) -> Result<vk::DescriptorPool> {
            self.next_pool += 1;
            Ok(vk::DescriptorPool::from_raw(self.next_pool))
        }

        fn allocate_set(
            &mut self,
            pool: vk::DescriptorPool,
            _layout: vk::DescriptorSetLayout,
        ) -> std::result::Result<vk::DescriptorSet, vk::Result> {
            Ok(vk::DescriptorSet::from_raw(pool.as_raw() * 1000))
        }

        fn reset_pool(&mut self, _pool: vk::DescriptorPool) -> Result<()> {
            self.resets += 1;
            Ok(())
        }

        fn destroy_pool(&mut self, _pool: vk::DescriptorPool) {
            self.destroyed += 1;
        }
    }

    #[test]
    fn ratios_scale_with_set_count() {
        let sizes = PoolSizeRatios::default().pool_sizes(1000);
        let ubo = sizes
            .iter()
            .find(|s| s.ty == vk::DescriptorType::UNIFORM_BUFFER)
            .unwrap();
        assert_eq!(ubo.descriptor_count, 2000);
        let sampler = sizes
            .iter()
            .find(|s| s.ty == vk::DescriptorType::SAMPLER)
            .unwrap();
        assert_eq!(sampler.descriptor_count, 500);
    }

    #[test]
    fn tiny_ratios_still_reserve_one_descriptor() {
        let ratios = PoolSizeRatios(vec![(vk::DescriptorType::INPUT_ATTACHMENT, 0.5)]);
        assert_eq!(ratios.pool_sizes(1)[0].descriptor_count, 1);
    }

    #[test]
    fn reset_moves_pools_to_free_list() {
        let mut allocator =
            DescriptorAllocator::new(CountingBackend::default(), PoolSizeRatios::default(), 16);
        allocator.allocate(vk::DescriptorSetLayout::null()).unwrap();
        assert_eq!(allocator.used_pools(), 1);

        allocator.reset_all().unwrap();
        assert_eq!(allocator.used_pools(), 0);
        assert_eq!(allocator.free_pools(), 1);
        assert_eq!(allocator.backend().resets, 1);

        // The recycled pool is reused rather than creating another.
        allocator.allocate(vk::DescriptorSetLayout::null()).unwrap();
        assert_eq!(allocator.stats().pools_created, 1);
        assert_eq!(allocator.free_pools(), 0);
    }

    #[test]
    fn destroy_releases_used_and_free_pools() {
        let mut allocator =
            DescriptorAllocator::new(CountingBackend::default(), PoolSizeRatios::default(), 16);
        allocator.allocate(vk::DescriptorSetLayout::null()).unwrap();
        allocator.reset_all().unwrap();
        allocator.allocate(vk::DescriptorSetLayout::null()).unwrap();
        allocator.reset_all().unwrap();
        allocator.allocate(vk::DescriptorSetLayout::null()).unwrap();
        allocator.destroy_pools();
        assert_eq!(allocator.backend().destroyed, 1);
    }

    #[test]
    fn unknown_failures_are_not_retried() {
        struct Failing;
        impl PoolBackend for Failing {
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
                Err(vk::Result::ERROR_DEVICE_LOST)
            }
            fn reset_pool(&mut self, _pool: vk::DescriptorPool) -> Result<()> {
                Ok(())
            }
            fn destroy_pool(&mut self, _pool: vk::DescriptorPool) {}
        }

        let mut allocator = DescriptorAllocator::new(Failing, PoolSizeRatios::default(), 4);
        let err = allocator
            .allocate(vk::DescriptorSetLayout::null())
            .unwrap_err();
        assert!(matches!(
            err,
            RendererError::DescriptorAllocation(vk::Result::ERROR_DEVICE_LOST)
        ));
        assert_eq!(allocator.stats().retries, 0);
        assert_eq!(allocator.stats().pools_created, 1);
    }
}
