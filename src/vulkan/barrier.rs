use ash::vk;

/// A layout change over a range of mip levels of a single-layer image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LayoutTransition {
    pub old: vk::ImageLayout,
    pub new: vk::ImageLayout,
    pub base_mip: u32,
    pub level_count: u32,
    pub aspect: vk::ImageAspectFlags,
}

impl LayoutTransition {
    pub fn color(old: vk::ImageLayout, new: vk::ImageLayout) -> Self {
        Self::color_mips(old, new, 0, 1)
    }

    pub fn color_mips(
        old: vk::ImageLayout,
        new: vk::ImageLayout,
        base_mip: u32,
        level_count: u32,
    ) -> Self {
        Self {
            old,
            new,
            base_mip,
            level_count,
            aspect: vk::ImageAspectFlags::COLOR,
        }
    }

    pub fn range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: self.aspect,
            base_mip_level: self.base_mip,
            level_count: self.level_count,
            base_array_layer: 0,
            layer_count: 1,
        }
    }
}

/// Access mask and pipeline stage implied by `layout` on the given side of a barrier.
pub fn layout_scope(layout: vk::ImageLayout, source: bool) -> (vk::AccessFlags, vk::PipelineStageFlags) {
    match layout {
        vk::ImageLayout::UNDEFINED => (
            vk::AccessFlags::empty(),
            vk::PipelineStageFlags::TOP_OF_PIPE,
        ),
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => (
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TRANSFER,
        ),
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => (
            vk::AccessFlags::TRANSFER_READ,
            vk::PipelineStageFlags::TRANSFER,
        ),
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => (
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::FRAGMENT_SHADER | vk::PipelineStageFlags::COMPUTE_SHADER,
        ),
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => (
            if source {
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE
            } else {
                vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
            },
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ),
        vk::ImageLayout::GENERAL => (
            vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
            vk::PipelineStageFlags::COMPUTE_SHADER,
        ),
        vk::ImageLayout::PRESENT_SRC_KHR => (
            vk::AccessFlags::empty(),
            if source {
                vk::PipelineStageFlags::BOTTOM_OF_PIPE
            } else {
                vk::PipelineStageFlags::TOP_OF_PIPE
            },
        ),
        _ => (
            vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
            vk::PipelineStageFlags::ALL_COMMANDS,
        ),
    }
}

/// Records a layout transition, deriving stages and access masks from the layouts.
pub fn transition_image(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    transition: LayoutTransition,
) {
    let (src_access, src_stage) = layout_scope(transition.old, true);
    let (dst_access, dst_stage) = layout_scope(transition.new, false);

    let barrier = vk::ImageMemoryBarrier::default()
        .old_layout(transition.old)
        .new_layout(transition.new)
        .src_access_mask(src_access)
        .dst_access_mask(dst_access)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(transition.range());

    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            src_stage,
            dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }
}

/// Execution and memory dependency on an image without a layout change.
#[derive(Clone, Copy, Debug)]
pub struct ImageDependency {
    pub layout: vk::ImageLayout,
    pub src_stage: vk::PipelineStageFlags,
    pub src_access: vk::AccessFlags,
    pub dst_stage: vk::PipelineStageFlags,
    pub dst_access: vk::AccessFlags,
}

impl ImageDependency {
    /// Storage write in one dispatch before a sampled read in the next.
    pub fn compute_to_compute() -> Self {
        Self {
            layout: vk::ImageLayout::GENERAL,
            src_stage: vk::PipelineStageFlags::COMPUTE_SHADER,
            src_access: vk::AccessFlags::SHADER_WRITE,
            dst_stage: vk::PipelineStageFlags::COMPUTE_SHADER,
            dst_access: vk::AccessFlags::SHADER_READ,
        }
    }

    /// Storage write in a dispatch before a sampled read in a fragment shader.
    pub fn compute_to_fragment() -> Self {
        Self {
            layout: vk::ImageLayout::GENERAL,
            src_stage: vk::PipelineStageFlags::COMPUTE_SHADER,
            src_access: vk::AccessFlags::SHADER_WRITE,
            dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
            dst_access: vk::AccessFlags::SHADER_READ,
        }
    }

    pub fn record(&self, device: &ash::Device, cmd: vk::CommandBuffer, image: vk::Image) {
        let barrier = vk::ImageMemoryBarrier::default()
            .old_layout(self.layout)
            .new_layout(self.layout)
            .src_access_mask(self.src_access)
            .dst_access_mask(self.dst_access)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(
                LayoutTransition::color(self.layout, self.layout).range(),
            );

        unsafe {
            device.cmd_pipeline_barrier(
                cmd,
                self.src_stage,
                self.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undefined_source_has_no_access() {
        let (access, stage) = layout_scope(vk::ImageLayout::UNDEFINED, true);
        assert!(access.is_empty());
        assert_eq!(stage, vk::PipelineStageFlags::TOP_OF_PIPE);
    }

    #[test]
    fn transfer_layouts_use_transfer_stage() {
        let (write, stage) = layout_scope(vk::ImageLayout::TRANSFER_DST_OPTIMAL, true);
        assert_eq!(write, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(stage, vk::PipelineStageFlags::TRANSFER);
        let (read, _) = layout_scope(vk::ImageLayout::TRANSFER_SRC_OPTIMAL, false);
        assert_eq!(read, vk::AccessFlags::TRANSFER_READ);
    }

    #[test]
    fn general_dependencies_keep_the_layout() {
        for dep in [
            ImageDependency::compute_to_compute(),
            ImageDependency::compute_to_fragment(),
        ] {
            assert_eq!(dep.layout, vk::ImageLayout::GENERAL);
            assert_eq!(dep.src_access, vk::AccessFlags::SHADER_WRITE);
            assert_eq!(dep.dst_access, vk::AccessFlags::SHADER_READ);
        }
        assert_eq!(
            ImageDependency::compute_to_fragment().dst_stage,
            vk::PipelineStageFlags::FRAGMENT_SHADER
        );
    }

    #[test]
    fn mip_range_covers_requested_levels() {
        let t = LayoutTransition::color_mips(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            3,
            2,
        );
        let range = t.range();
        assert_eq!(range.base_mip_level, 3);
        assert_eq!(range.level_count, 2);
        assert_eq!(range.layer_count, 1);
    }
}
