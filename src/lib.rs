//! Editor-style Vulkan renderer built on `ash`.
//!
//! The crate is split the same way the renderer is reasoned about:
//!
//! - [`vulkan`] holds thin wrappers over the API: instance/device bootstrap,
//!   the VMA allocator, descriptor layout cache and pool allocator, the pipeline
//!   builder, swapchain management and the upload context.
//! - [`renderer`] holds the frame core: the double-buffered frame executor,
//!   the post-process compute stack, texture/model/material libraries and the
//!   asset worker thread.

pub mod config;
pub mod error;
pub mod renderer;
pub mod vulkan;

pub use config::RendererConfig;
pub use error::{RendererError, Result};
pub use vulkan::{SurfaceProvider, WindowSurfaceProvider};

/// Commonly used types for applications driving the renderer.
pub mod prelude {
    pub use crate::config::RendererConfig;
    pub use crate::error::{RendererError, Result};
    pub use crate::renderer::{
        EditorOverlay, FrameInput, FrameOutcome, LightControl, MeshData, Renderer, SceneState,
        SkipReason, TextureKind, Vertex,
    };
    pub use crate::vulkan::{SurfaceProvider, WindowSurfaceProvider};
}
