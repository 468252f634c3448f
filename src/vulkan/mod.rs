pub mod allocator;
pub mod barrier;
pub mod deletion_queue;
pub mod descriptor_allocator;
pub mod descriptor_builder;
pub mod descriptor_layout;
pub mod device;
pub mod instance;
pub mod pipeline;
pub mod render_pass;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod upload;

pub use allocator::{AllocatedBuffer, AllocatedImage, Allocator, ImageDesc, MemoryLocation};
pub use barrier::{transition_image, ImageDependency, LayoutTransition};
pub use deletion_queue::DeletionQueue;
pub use descriptor_allocator::{
    AllocatorStats, DescriptorAllocator, DevicePoolBackend, PoolBackend, PoolSizeRatios,
};
pub use descriptor_builder::{DescriptorBuilder, DescriptorWriter};
pub use descriptor_layout::{
    DescriptorLayoutCache, DeviceLayoutFactory, LayoutBinding, LayoutFactory, LayoutSpec,
};
pub use device::{QueueFamilies, SharedQueue, VulkanDevice};
pub use instance::VulkanInstance;
pub use pipeline::{FixedFunctionState, Pipeline, PipelineBuilder, ShaderKind, VertexInput};
pub use surface::{SurfaceProvider, WindowSurfaceProvider};
pub use swapchain::{SurfaceSupport, Swapchain, SwapchainPlan, SwapchainSummary};
pub use sync::FrameSync;
pub use upload::UploadContext;
