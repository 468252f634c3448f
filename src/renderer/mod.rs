pub mod camera_controller;
pub mod editor;
pub mod frame;
#[cfg(feature = "gltf_loading")]
pub mod gltf_loader;
pub mod material;
pub mod mipmap_channel;
pub mod model;
pub mod pipeline_cache;
pub mod post_process;
#[allow(clippy::module_inception)]
mod renderer;
pub mod resources;
pub mod scene;
pub mod targets;
pub mod texture;
pub mod texture_library;
pub mod uniforms;
pub mod worker;

pub use camera_controller::CameraController;
pub use editor::{EditorOverlay, OverlaySetup, ViewportComposite};
pub use frame::{FrameOutcome, FrameStats, SkipReason, FRAMES_IN_FLIGHT};
pub use material::MaterialDesc;
pub use model::{MeshData, Vertex};
pub use post_process::{EffectChain, PostProcessStack};
pub use renderer::{Renderer, GAMMA_EFFECT};
pub use scene::{Camera, FrameInput, LightControl, SceneState};
pub use texture::{PixelData, TextureKind};
pub use worker::{AssetJob, AssetWorker, JobHandler, Priority};
