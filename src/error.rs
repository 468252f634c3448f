use std::path::PathBuf;

use ash::vk;
use thiserror::Error;

/// Errors produced by the renderer.
///
/// Variants follow the failure classes the frame core distinguishes:
/// environment failures are fatal, build-time failures abort a pipeline build,
/// surface failures trigger a swapchain rebuild and asset failures fall back to
/// default resources.
#[derive(Debug, Error)]
pub enum RendererError {
    #[error("device initialization failed: {0}")]
    DeviceInitFailed(String),

    #[error("required extension unavailable: {0}")]
    MissingExtension(String),

    #[error("failed to load shader {path}: {reason}")]
    ShaderLoad { path: PathBuf, reason: String },

    #[error("pipeline build failed: {0}")]
    PipelineBuild(String),

    #[error("swapchain out of date")]
    SwapchainOutOfDate,

    #[error("descriptor set allocation failed: {0}")]
    DescriptorAllocation(vk::Result),

    #[error("failed to load asset '{name}': {reason}")]
    AssetLoad { name: String, reason: String },

    #[error("vulkan call failed: {0}")]
    Vulkan(#[from] vk::Result),

    #[error("vulkan error: {0}")]
    VulkanError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RendererError>;

impl RendererError {
    /// Whether the error means the surface changed and the swapchain must be rebuilt.
    pub fn is_surface_lost(&self) -> bool {
        matches!(
            self,
            RendererError::SwapchainOutOfDate
                | RendererError::Vulkan(vk::Result::ERROR_OUT_OF_DATE_KHR)
        )
    }

    /// Whether the renderer can keep running after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RendererError::SwapchainOutOfDate
                | RendererError::AssetLoad { .. }
                | RendererError::Vulkan(vk::Result::ERROR_OUT_OF_DATE_KHR)
                | RendererError::Vulkan(vk::Result::SUBOPTIMAL_KHR)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_date_is_surface_loss() {
        assert!(RendererError::SwapchainOutOfDate.is_surface_lost());
        assert!(RendererError::Vulkan(vk::Result::ERROR_OUT_OF_DATE_KHR).is_surface_lost());
        assert!(!RendererError::Vulkan(vk::Result::ERROR_DEVICE_LOST).is_surface_lost());
    }

    #[test]
    fn environment_failures_are_fatal() {
        assert!(!RendererError::DeviceInitFailed("no gpu".into()).is_recoverable());
        assert!(!RendererError::MissingExtension("VK_KHR_surface".into()).is_recoverable());
        assert!(RendererError::AssetLoad {
            name: "brick".into(),
            reason: "missing".into()
        }
        .is_recoverable());
    }

    #[test]
    fn display_includes_context() {
        let err = RendererError::ShaderLoad {
            path: PathBuf::from("shaders/missing.spv"),
            reason: "not found".into(),
        };
        assert_eq!(
            err.to_string(),
            "failed to load shader shaders/missing.spv: not found"
        );
    }
}
